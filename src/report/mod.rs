//! Run summary: what was partitioned, which jobs ran, how they ended.
//!
//! The same [`RunReport`] feeds the terminal summary (`format`) and the
//! `run_summary.json` file left in the output directory.

use std::fs::File;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::{AnalysisMode, RunConfig, Stratum};
use crate::error::AppError;
use crate::fit::{JobOutcome, OutputLayout};
use crate::partition::Partition;

mod format;

pub use format::*;

/// Rows and data file for one stratum.
#[derive(Debug, Clone, Serialize)]
pub struct StratumSummary {
    pub stratum: Stratum,
    pub metric: String,
    pub rows: usize,
    pub data_csv: PathBuf,
}

/// Rows and data file for one partition.
#[derive(Debug, Clone, Serialize)]
pub struct PartitionSummary {
    pub key: String,
    pub rows: usize,
    pub data_csv: PathBuf,
    pub strata: Vec<StratumSummary>,
}

/// Everything recorded about one orchestrator run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub tool: String,
    pub generated_at: DateTime<Utc>,
    pub mode: AnalysisMode,
    pub in_table: PathBuf,
    pub output_dir: PathBuf,
    pub n_cpus: usize,
    pub metrics: Vec<String>,
    pub partitions: Vec<PartitionSummary>,
    pub jobs: Vec<JobOutcome>,
    pub figures: Vec<PathBuf>,
}

impl RunReport {
    pub fn new(config: &RunConfig, partitions: &[Partition], layout: &OutputLayout) -> Self {
        let partitions = partitions
            .iter()
            .map(|p| PartitionSummary {
                key: p.key.clone(),
                rows: p.table.len(),
                data_csv: layout.partition_csv(&p.key),
                strata: p
                    .strata
                    .iter()
                    .map(|s| StratumSummary {
                        stratum: s.stratum,
                        metric: s.metric.clone(),
                        rows: s.table.len(),
                        data_csv: layout.stratum_csv(&p.key, s.stratum),
                    })
                    .collect(),
            })
            .collect();

        Self {
            tool: "gamlss".to_string(),
            generated_at: Utc::now(),
            mode: config.mode,
            in_table: config.in_table.clone(),
            output_dir: config.output_dir.clone(),
            n_cpus: config.n_cpus,
            metrics: config.metrics.clone(),
            partitions,
            jobs: Vec::new(),
            figures: Vec::new(),
        }
    }

    pub fn failed_jobs(&self) -> impl Iterator<Item = &JobOutcome> {
        self.jobs.iter().filter(|o| !o.status.is_success())
    }

    pub fn has_failures(&self) -> bool {
        self.failed_jobs().next().is_some()
    }
}

/// Write the report as pretty-printed JSON.
pub fn write_run_summary_json(path: &Path, report: &RunReport) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::new(2, format!("Failed to create run summary '{}': {e}", path.display())))?;
    serde_json::to_writer_pretty(file, report)
        .map_err(|e| AppError::new(2, format!("Failed to write run summary: {e}")))?;
    Ok(())
}
