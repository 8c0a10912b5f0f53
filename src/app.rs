//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - loads `.env` and parses CLI arguments
//! - sets up logging
//! - turns arguments into a `RunConfig` and runs the pipeline
//! - prints the run summary

use std::collections::HashSet;

use clap::Parser;

use crate::cli::{BundleArgs, Cli, Command, ExtractArgs, NetworkArgs, OrchestratorArgs};
use crate::domain::{AnalysisMode, FigureConfig, FitterCommand, RunConfig, StratificationRule};
use crate::error::AppError;
use crate::volume::{ExtractRequest, extract_first_volume};

pub mod pipeline;

/// Entry point for the `gamlss` binary.
pub fn run() -> Result<(), AppError> {
    // Fitter paths may come from a `.env` file next to the data.
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Bundle(args) => handle_orchestrator(&bundle_config(&args)),
        Command::Network(args) => handle_orchestrator(&network_config(&args)),
        Command::ExtractFirstVolume(args) => handle_extract(&args),
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    // `RUST_LOG` wins over `-v`.
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}

fn handle_orchestrator(config: &RunConfig) -> Result<(), AppError> {
    let run = pipeline::run_orchestrator(config)?;
    println!("{}", crate::report::format_run_summary(&run.report));

    if !run.succeeded() {
        return Err(AppError::new(
            5,
            format!(
                "{} fitting job(s) failed; see the logs listed above and {}.",
                run.report.failed_jobs().count(),
                run.summary_path.display()
            ),
        ));
    }
    Ok(())
}

fn handle_extract(args: &ExtractArgs) -> Result<(), AppError> {
    let outputs = extract_first_volume(&ExtractRequest {
        dwi: args.dwi.clone(),
        bval: args.bval.clone(),
        bvec: args.bvec.clone(),
        out_prefix: args.out_prefix.clone(),
        dir_orig: args.dir_orig,
        dir_new: args.dir_new,
    })?;
    println!("Fieldmap: {}", outputs.fieldmap.display());
    println!("DWI:      {}", outputs.dwi.display());
    println!("bval:     {}", outputs.bval.display());
    println!("bvec:     {}", outputs.bvec.display());
    Ok(())
}

/// Metric names in first-seen order. A repeated name would launch two jobs
/// writing the same files.
fn unique_metrics(metrics: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(metrics.len());
    for metric in metrics {
        if seen.insert(metric.as_str()) {
            out.push(metric.clone());
        } else {
            log::warn!("Metric {metric} was given more than once; fitting it once.");
        }
    }
    out
}

fn common_config(args: &OrchestratorArgs, mode: AnalysisMode) -> RunConfig {
    RunConfig {
        mode,
        in_table: args.in_table.clone(),
        output_dir: args.output_dir.clone(),
        metrics: unique_metrics(&args.metrics),
        bundles: None,
        fitter: FitterCommand {
            interpreter: (!args.no_interpreter).then(|| args.interpreter.clone()),
            script: args.rscript.clone(),
        },
        n_cpus: args.n_cpus,
        force: args.force,
        separator: args.separator,
        stratification: None,
        figure: (!args.no_plot).then(|| FigureConfig {
            font_name: args.font.clone(),
            font_file: args.font_file.clone(),
            width: args.width,
            height: args.height,
        }),
    }
}

pub fn bundle_config(args: &BundleArgs) -> RunConfig {
    let mut config = common_config(&args.common, AnalysisMode::Bundle);
    config.bundles = args.bundles.clone();
    if !args.no_stratify {
        config.stratification = Some(StratificationRule {
            metric: args.stratified_metric.clone(),
            low_b_cohorts: args.low_b_cohorts.clone(),
            high_b_cohorts: args.high_b_cohorts.clone(),
        });
    }
    config
}

pub fn network_config(args: &NetworkArgs) -> RunConfig {
    common_config(&args.common, AnalysisMode::Network)
}
