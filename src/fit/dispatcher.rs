//! Bounded-parallel execution of fitting jobs.
//!
//! Jobs run on a dedicated rayon pool with exactly `n_cpus` workers. Each
//! worker blocks on its child process, so at most `n_cpus` fitter processes
//! exist at any time and a free worker takes the next job straight away.
//!
//! Every job reports a [`JobStatus`]; nothing is dropped on the floor.

use std::fs::File;
use std::time::{Duration, Instant};

use rayon::prelude::*;
use serde::Serialize;

use crate::domain::FitterCommand;
use crate::error::AppError;
use crate::fit::jobs::FitJob;

/// How a job ended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum JobStatus {
    Succeeded,
    /// The process ran and exited unsuccessfully. `code` is `None` when it
    /// was terminated by a signal.
    Failed { code: Option<i32> },
    /// The process could not be started (or its log could not be opened).
    LaunchFailed { message: String },
}

impl JobStatus {
    pub fn is_success(&self) -> bool {
        matches!(self, JobStatus::Succeeded)
    }
}

/// Job plus its result.
#[derive(Debug, Clone, Serialize)]
pub struct JobOutcome {
    pub job: FitJob,
    #[serde(flatten)]
    pub status: JobStatus,
    #[serde(serialize_with = "serialize_secs")]
    pub elapsed: Duration,
}

fn serialize_secs<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_f64(d.as_secs_f64())
}

/// Run `jobs` with at most `n_cpus` in flight, returning outcomes in job order.
///
/// `execute` performs one job; [`run_fitter`] is the production executor.
pub fn dispatch<F>(jobs: Vec<FitJob>, n_cpus: usize, execute: F) -> Result<Vec<JobOutcome>, AppError>
where
    F: Fn(&FitJob) -> JobStatus + Sync,
{
    if n_cpus == 0 {
        return Err(AppError::new(2, "The number of CPUs must be at least 1."));
    }
    if jobs.is_empty() {
        return Ok(Vec::new());
    }

    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(n_cpus)
        .thread_name(|idx| format!("gamlss-job-{idx}"))
        .build()
        .map_err(|e| AppError::new(4, format!("Failed to start the job pool: {e}")))?;

    log::info!("Dispatching {} job(s) on {n_cpus} worker(s)", jobs.len());

    let outcomes = pool.install(|| {
        jobs.into_par_iter()
            .map(|job| {
                let started = Instant::now();
                let status = execute(&job);
                let elapsed = started.elapsed();
                match &status {
                    JobStatus::Succeeded => log::info!(
                        "[{}] {} finished in {:.1}s",
                        job.partition,
                        job.metric,
                        elapsed.as_secs_f64()
                    ),
                    JobStatus::Failed { code } => log::error!(
                        "[{}] {} failed (exit {}); see {}",
                        job.partition,
                        job.metric,
                        code.map(|c| c.to_string()).unwrap_or_else(|| "signal".to_string()),
                        job.log_path.display()
                    ),
                    JobStatus::LaunchFailed { message } => log::error!(
                        "[{}] {} could not be launched: {message}",
                        job.partition,
                        job.metric
                    ),
                }
                JobOutcome {
                    job,
                    status,
                    elapsed,
                }
            })
            .collect()
    });
    Ok(outcomes)
}

/// Run one job as an external process, sending stdout and stderr to its log.
pub fn run_fitter(fitter: &FitterCommand, job: &FitJob) -> JobStatus {
    let log = match File::create(&job.log_path) {
        Ok(f) => f,
        Err(e) => {
            return JobStatus::LaunchFailed {
                message: format!("cannot create log '{}': {e}", job.log_path.display()),
            };
        }
    };
    let log_err = match log.try_clone() {
        Ok(f) => f,
        Err(e) => {
            return JobStatus::LaunchFailed {
                message: format!("cannot share log handle: {e}"),
            };
        }
    };

    log::debug!("Running {}", fitter.describe(job));
    let mut cmd = fitter.command_for(job);
    cmd.stdout(log).stderr(log_err);

    match cmd.status() {
        Ok(status) if status.success() => JobStatus::Succeeded,
        Ok(status) => JobStatus::Failed {
            code: status.code(),
        },
        Err(e) => JobStatus::LaunchFailed {
            message: format!("{}: {e}", fitter.describe(job)),
        },
    }
}
