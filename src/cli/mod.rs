//! Command-line parsing for the GAMLSS centile orchestrators.
//!
//! The goal of this module is to keep **argument parsing** separate from the
//! pipeline code: `app` turns these structs into a `RunConfig`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::domain::{PhaseEncoding, Separator};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(name = "gamlss", version, about = "Normative GAMLSS centile curves for diffusion MRI metrics")]
pub struct Cli {
    /// Increase log verbosity (-v info, -vv debug). `RUST_LOG` takes precedence.
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fit per-bundle centile curves and draw one figure per bundle.
    Bundle(BundleArgs),
    /// Fit network-level centile curves and draw one figure for the run.
    Network(NetworkArgs),
    /// Split the first DWI volume off as a fieldmap and trim the gradient tables.
    ExtractFirstVolume(ExtractArgs),
}

/// Options shared by both orchestrators.
#[derive(Debug, Args, Clone)]
pub struct OrchestratorArgs {
    /// Observation table (CSV or TSV).
    pub in_table: PathBuf,

    /// Output directory (must not exist unless --force is given).
    pub output_dir: PathBuf,

    /// Metric column(s) to fit.
    #[arg(long = "metric", value_name = "NAME", num_args = 1.., required = true)]
    pub metrics: Vec<String>,

    /// Fitter script invoked once per job.
    #[arg(long, value_name = "PATH", env = "GAMLSS_RSCRIPT")]
    pub rscript: PathBuf,

    /// Program used to run the fitter script.
    #[arg(long, value_name = "PROG", env = "GAMLSS_INTERPRETER", default_value = "Rscript")]
    pub interpreter: String,

    /// Run the fitter script directly instead of through an interpreter.
    #[arg(long)]
    pub no_interpreter: bool,

    /// Maximum number of fitter processes running at once.
    #[arg(short = 'n', long, default_value_t = 1)]
    pub n_cpus: usize,

    /// Delete and recreate the output directory if it exists.
    #[arg(short, long)]
    pub force: bool,

    /// Field separator of the input table.
    #[arg(long = "sep", value_enum, default_value_t = Separator::Auto)]
    pub separator: Separator,

    /// Font family name searched for in the system font directories.
    #[arg(long, default_value = "DejaVuSans")]
    pub font: String,

    /// Font file to use instead of searching by name.
    #[arg(long, value_name = "PATH")]
    pub font_file: Option<PathBuf>,

    /// Figure width (pixels).
    #[arg(long, default_value_t = 2700)]
    pub width: u32,

    /// Figure height (pixels).
    #[arg(long, default_value_t = 900)]
    pub height: u32,

    /// Fit only; do not draw figures.
    #[arg(long)]
    pub no_plot: bool,
}

/// `gamlss bundle` options.
#[derive(Debug, Args, Clone)]
pub struct BundleArgs {
    #[command(flatten)]
    pub common: OrchestratorArgs,

    /// Bundle(s) to fit (default: every bundle in the table).
    #[arg(long = "bundle", value_name = "NAME", num_args = 1..)]
    pub bundles: Option<Vec<String>>,

    /// Metric fitted separately for low- and high-b-value cohorts.
    #[arg(long, default_value = "afd_fixel")]
    pub stratified_metric: String,

    /// Cohorts acquired with a single low b-value shell.
    #[arg(long, value_name = "COHORT", num_args = 1.., default_values = ["MYRNA", "GESTE", "PING"])]
    pub low_b_cohorts: Vec<String>,

    /// Cohorts acquired with multiple / high b-value shells.
    #[arg(long, value_name = "COHORT", num_args = 1.., default_values = ["BCP", "ABCD", "BANDA"])]
    pub high_b_cohorts: Vec<String>,

    /// Fit the stratified metric like any other metric.
    #[arg(long)]
    pub no_stratify: bool,
}

/// `gamlss network` options.
#[derive(Debug, Args, Clone)]
pub struct NetworkArgs {
    #[command(flatten)]
    pub common: OrchestratorArgs,
}

/// `gamlss extract-first-volume` options.
#[derive(Debug, Args, Clone)]
pub struct ExtractArgs {
    /// 4D diffusion image (.nii or .nii.gz).
    pub dwi: PathBuf,
    /// b-values text file.
    pub bval: PathBuf,
    /// b-vectors text file.
    pub bvec: PathBuf,
    /// Output prefix, e.g. `sub-01/ses-1/sub-01_ses-1`.
    pub out_prefix: PathBuf,
    /// Phase-encoding direction of the diffusion series.
    #[arg(value_enum)]
    pub dir_orig: PhaseEncoding,
    /// Phase-encoding direction recorded for the extracted fieldmap.
    #[arg(value_enum)]
    pub dir_new: PhaseEncoding,
}
