//! Terminal formatting of the run summary.
//!
//! Formatting lives here so the orchestration code only assembles data.

use crate::domain::AnalysisMode;
use crate::fit::JobStatus;
use crate::report::RunReport;

/// Format the run summary (partitions, job outcomes, figures).
pub fn format_run_summary(report: &RunReport) -> String {
    let mut out = String::new();

    out.push_str("=== gamlss - GAMLSS centile run ===\n");
    let mode = match report.mode {
        AnalysisMode::Bundle => "bundle",
        AnalysisMode::Network => "network",
    };
    out.push_str(&format!("Mode: {mode}\n"));
    out.push_str(&format!("Input: {}\n", report.in_table.display()));
    out.push_str(&format!("Output: {}\n", report.output_dir.display()));
    out.push_str(&format!("Metrics: {}\n", report.metrics.join(", ")));

    out.push_str(&format!("\nPartitions ({}):\n", report.partitions.len()));
    for p in &report.partitions {
        out.push_str(&format!("- {:<24} rows={}", p.key, p.rows));
        for s in &p.strata {
            out.push_str(&format!(" | {}={}", s.metric, s.rows));
        }
        out.push('\n');
    }

    let failed = report.failed_jobs().count();
    out.push_str(&format!(
        "\nJobs: {} total | {} succeeded | {} failed | {} worker(s)\n",
        report.jobs.len(),
        report.jobs.len() - failed,
        failed,
        report.n_cpus
    ));
    for outcome in report.failed_jobs() {
        let reason = match &outcome.status {
            JobStatus::Failed { code: Some(code) } => format!("exit code {code}"),
            JobStatus::Failed { code: None } => "killed by signal".to_string(),
            JobStatus::LaunchFailed { message } => format!("not launched: {message}"),
            JobStatus::Succeeded => continue,
        };
        out.push_str(&format!(
            "  FAILED {}/{} ({reason}); log: {}\n",
            outcome.job.partition,
            outcome.job.metric,
            outcome.job.log_path.display()
        ));
    }

    if !report.figures.is_empty() {
        out.push_str("\nFigures:\n");
        for fig in &report.figures {
            out.push_str(&format!("- {}\n", fig.display()));
        }
    }

    out
}
