//! Fitting job construction.
//!
//! A job is one external fitter invocation over one partition (or stratum)
//! and one metric. The full job list is built, and every input file written,
//! before the first process is launched.

use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use serde::Serialize;

use crate::domain::{AnalysisMode, FitterCommand, Stratum};
use crate::error::AppError;
use crate::partition::Partition;

/// File naming inside the output directory.
#[derive(Debug, Clone)]
pub struct OutputLayout {
    root: PathBuf,
    mode: AnalysisMode,
}

impl OutputLayout {
    pub fn new(root: impl Into<PathBuf>, mode: AnalysisMode) -> Self {
        Self {
            root: root.into(),
            mode,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `<root>/<key>_data.csv`
    pub fn partition_csv(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}_data.csv"))
    }

    /// `<root>/<key>_low_bval_data.csv` / `<root>/<key>_high_bval_data.csv`
    pub fn stratum_csv(&self, key: &str, stratum: Stratum) -> PathBuf {
        self.root.join(format!("{key}_{}_data.csv", stratum.file_tag()))
    }

    /// Directory the fitter writes into: `<root>/<key>` for bundles, `<root>` otherwise.
    pub fn job_dir(&self, key: &str) -> PathBuf {
        match self.mode {
            AnalysisMode::Bundle => self.root.join(key),
            AnalysisMode::Network => self.root.clone(),
        }
    }

    /// `<job dir>/<metric>_gamlss.log`
    pub fn log_path(&self, key: &str, metric: &str) -> PathBuf {
        self.job_dir(key).join(format!("{metric}_gamlss.log"))
    }

    /// `<root>/<key>_GAMLSS_centiles.png`
    pub fn figure_path(&self, key: &str) -> PathBuf {
        self.root.join(format!("{key}_GAMLSS_centiles.png"))
    }

    pub fn summary_path(&self) -> PathBuf {
        self.root.join("run_summary.json")
    }
}

/// One external fitter invocation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FitJob {
    pub partition: String,
    pub metric: String,
    pub input_csv: PathBuf,
    pub output_dir: PathBuf,
    pub log_path: PathBuf,
}

impl FitJob {
    /// Fitter arguments: `--input <csv> --output <dir> --metric <name>`.
    pub fn fitter_args(&self) -> Vec<OsString> {
        vec![
            "--input".into(),
            self.input_csv.clone().into_os_string(),
            "--output".into(),
            self.output_dir.clone().into_os_string(),
            "--metric".into(),
            self.metric.clone().into(),
        ]
    }
}

impl FitterCommand {
    /// Build the process for `job` (stdio is left to the caller).
    pub fn command_for(&self, job: &FitJob) -> Command {
        let mut cmd = match &self.interpreter {
            Some(interpreter) => {
                let mut cmd = Command::new(interpreter);
                cmd.arg(&self.script);
                cmd
            }
            None => Command::new(&self.script),
        };
        cmd.args(job.fitter_args());
        cmd
    }

    /// Shell-like rendering of the command line, for logs.
    pub fn describe(&self, job: &FitJob) -> String {
        let mut parts = Vec::new();
        if let Some(interpreter) = &self.interpreter {
            parts.push(interpreter.clone());
        }
        parts.push(self.script.display().to_string());
        parts.extend(
            job.fitter_args()
                .into_iter()
                .map(|a| a.to_string_lossy().into_owned()),
        );
        parts.join(" ")
    }
}

/// Jobs for every (partition, metric) pair, in partition then metric order.
///
/// A metric with strata yields one job per stratum instead of one over the
/// whole partition.
pub fn build_jobs(partitions: &[Partition], metrics: &[String], layout: &OutputLayout) -> Vec<FitJob> {
    let mut jobs = Vec::new();
    for part in partitions {
        let output_dir = layout.job_dir(&part.key);
        for metric in metrics {
            let strata: Vec<_> = part
                .strata
                .iter()
                .filter(|s| s.metric.strip_suffix(s.stratum.metric_suffix()) == Some(metric.as_str()))
                .collect();

            if strata.is_empty() {
                jobs.push(FitJob {
                    partition: part.key.clone(),
                    metric: metric.clone(),
                    input_csv: layout.partition_csv(&part.key),
                    output_dir: output_dir.clone(),
                    log_path: layout.log_path(&part.key, metric),
                });
                continue;
            }

            for stratum in strata {
                jobs.push(FitJob {
                    partition: part.key.clone(),
                    metric: stratum.metric.clone(),
                    input_csv: layout.stratum_csv(&part.key, stratum.stratum),
                    output_dir: output_dir.clone(),
                    log_path: layout.log_path(&part.key, &stratum.metric),
                });
            }
        }
    }
    jobs
}

/// Write every partition (and stratum) CSV and create the job directories.
///
/// Returns the written CSV paths.
pub fn materialize(partitions: &[Partition], layout: &OutputLayout) -> Result<Vec<PathBuf>, AppError> {
    let mut written = Vec::new();
    for part in partitions {
        let path = layout.partition_csv(&part.key);
        part.table.write_csv(&path)?;
        written.push(path);

        for stratum in &part.strata {
            let path = layout.stratum_csv(&part.key, stratum.stratum);
            stratum.table.write_csv(&path)?;
            written.push(path);
        }

        let dir = layout.job_dir(&part.key);
        fs::create_dir_all(&dir).map_err(|e| {
            AppError::new(2, format!("Failed to create job directory '{}': {e}", dir.display()))
        })?;
    }
    log::info!("Materialized {} partition file(s)", written.len());
    Ok(written)
}
