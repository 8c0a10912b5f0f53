//! Orchestrator pipeline shared by the `bundle` and `network` subcommands.
//!
//! Order matters: everything that can be checked without side effects (output
//! directory, table columns, missing values, font) is checked before the
//! output directory is touched or a single fitter process starts.
//!
//! output check -> load -> partition/validate -> font -> prepare output ->
//! materialize + jobs -> dispatch -> summary -> figures

use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::{AnalysisMode, RunConfig};
use crate::error::AppError;
use crate::fit::{FitJob, JobStatus, OutputLayout, build_jobs, dispatch, materialize, run_fitter};
use crate::io::{load_table, scan_centiles};
use crate::partition::{partition_by_bundle, partition_network};
use crate::plot::{FigureStyle, build_panels, render_figure, resolve_font};
use crate::report::{RunReport, write_run_summary_json};

/// All outputs of one orchestrator run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub report: RunReport,
    /// Partition and stratum CSVs handed to the fitter.
    pub data_files: Vec<PathBuf>,
    pub summary_path: PathBuf,
}

impl RunOutput {
    pub fn succeeded(&self) -> bool {
        !self.report.has_failures()
    }
}

/// Run the pipeline with the external fitter.
pub fn run_orchestrator(config: &RunConfig) -> Result<RunOutput, AppError> {
    let fitter = config.fitter.clone();
    run_orchestrator_with(config, move |job| run_fitter(&fitter, job))
}

/// Run the pipeline with a custom job executor.
///
/// Failed jobs do not make this return `Err`: they are recorded in the report
/// (and `run_summary.json`) and no figures are drawn.
pub fn run_orchestrator_with<F>(config: &RunConfig, execute: F) -> Result<RunOutput, AppError>
where
    F: Fn(&FitJob) -> JobStatus + Sync,
{
    // 1) Refuse to clobber results before doing anything else.
    check_output_dir(&config.output_dir, config.force)?;
    if config.n_cpus == 0 {
        return Err(AppError::new(2, "The number of CPUs must be at least 1."));
    }

    // 2) Load and validate every partition.
    let table = load_table(&config.in_table, config.separator)?;
    let rule = config.stratification.as_ref();
    let partitions = match config.mode {
        AnalysisMode::Bundle => {
            partition_by_bundle(&table, config.bundles.as_deref(), &config.metrics, rule)?
        }
        AnalysisMode::Network => partition_network(&table, &config.metrics, rule)?,
    };
    log::info!("{} partition(s) validated", partitions.len());

    // 3) A missing font is fatal; find out before fitting for hours.
    let style = match &config.figure {
        Some(fig) => Some(FigureStyle {
            font: resolve_font(&fig.font_name, fig.font_file.as_deref())?,
            width: fig.width,
            height: fig.height,
        }),
        None => None,
    };

    // 4) Output directory, partition files and the full job list.
    prepare_output_dir(&config.output_dir, config.force)?;
    let layout = OutputLayout::new(&config.output_dir, config.mode);
    let data_files = materialize(&partitions, &layout)?;
    let jobs = build_jobs(&partitions, &config.metrics, &layout);

    // 5) Fit.
    let mut report = RunReport::new(config, &partitions, &layout);
    report.jobs = dispatch(jobs, config.n_cpus, execute)?;
    let summary_path = layout.summary_path();
    write_run_summary_json(&summary_path, &report)?;

    if report.has_failures() {
        log::error!(
            "{} job(s) failed; skipping figures. Logs are kept in {}",
            report.failed_jobs().count(),
            layout.root().display()
        );
        return Ok(RunOutput {
            report,
            data_files,
            summary_path,
        });
    }

    // 6) Figures.
    if let Some(style) = &style {
        for part in &partitions {
            let centiles = scan_centiles(&layout.job_dir(&part.key))?;
            let panels = build_panels(part, &config.metrics, &centiles, rule)?;
            let path = layout.figure_path(&part.key);
            render_figure(&path, &panels, style)?;
            report.figures.push(path);
        }
        write_run_summary_json(&summary_path, &report)?;
    }

    Ok(RunOutput {
        report,
        data_files,
        summary_path,
    })
}

/// An existing output directory is only acceptable with `force`.
fn check_output_dir(dir: &Path, force: bool) -> Result<(), AppError> {
    if dir.exists() && !force {
        return Err(AppError::new(
            2,
            format!(
                "Output directory '{}' already exists. Use --force to overwrite it.",
                dir.display()
            ),
        ));
    }
    Ok(())
}

fn prepare_output_dir(dir: &Path, force: bool) -> Result<(), AppError> {
    if force && dir.exists() {
        log::warn!("Removing existing output directory {}", dir.display());
        fs::remove_dir_all(dir)
            .map_err(|e| AppError::new(2, format!("Failed to remove '{}': {e}", dir.display())))?;
    }
    fs::create_dir_all(dir)
        .map_err(|e| AppError::new(2, format!("Failed to create '{}': {e}", dir.display())))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;
    use crate::domain::{FigureConfig, FitterCommand, Separator, StratificationRule};

    const HEADER: &str = "subject\tsession\tbundle\tfa\tafd_fixel\tage\tsex\tcohort";

    fn write_table(dir: &Path, rows: &[String]) -> PathBuf {
        let path = dir.join("tracts.tsv");
        let mut text = format!("{HEADER}\n");
        for row in rows {
            text.push_str(row);
            text.push('\n');
        }
        fs::write(&path, text).unwrap();
        path
    }

    fn ten_rows() -> Vec<String> {
        let cohorts = ["BCP", "ABCD", "PING", "MYRNA", "BANDA"];
        (0..10)
            .map(|i| {
                format!(
                    "sub-{i:02}\tses-1\tAF_L\t0.4{i}\t0.3{i}\t{}\t{}\t{}",
                    i + 1,
                    if i % 2 == 0 { "M" } else { "F" },
                    cohorts[i % cohorts.len()]
                )
            })
            .collect()
    }

    /// Font bundled under `tests/fixtures`, so figures render on hosts without fonts.
    fn test_figure() -> FigureConfig {
        FigureConfig {
            font_name: "test".to_string(),
            font_file: Some(Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/DejaVuSansMono.ttf")),
            width: 1200,
            height: 400,
        }
    }

    fn config(in_table: PathBuf, output_dir: PathBuf, metrics: &[&str]) -> RunConfig {
        RunConfig {
            mode: AnalysisMode::Bundle,
            in_table,
            output_dir,
            metrics: metrics.iter().map(|m| m.to_string()).collect(),
            bundles: None,
            fitter: FitterCommand {
                interpreter: Some("sh".to_string()),
                script: PathBuf::from("fit.sh"),
            },
            n_cpus: 2,
            force: false,
            separator: Separator::Auto,
            stratification: None,
            figure: None,
        }
    }

    /// Executor standing in for the fitter: writes flat centiles and a log.
    fn fake_fitter(job: &FitJob) -> JobStatus {
        let mut csv = String::from("age,prob,metric\n");
        for age in [0.0, 5.0, 10.0, 15.0] {
            csv.push_str(&format!("{age},0.05,0.41\n{age},0.5,0.44\n{age},0.95,0.47\n"));
        }
        let path = job.output_dir.join(format!("{}_centiles_by_age.csv", job.metric));
        fs::write(path, csv).unwrap();
        fs::write(&job.log_path, "ok\n").unwrap();
        JobStatus::Succeeded
    }

    #[cfg(unix)]
    #[test]
    fn ten_row_bundle_run_over_an_existing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let table = write_table(dir.path(), &ten_rows());
        let script = dir.path().join("fit.sh");
        fs::write(
            &script,
            r#"
while [ $# -gt 0 ]; do
  case "$1" in
    --input) in="$2"; shift 2 ;;
    --output) out="$2"; shift 2 ;;
    --metric) m="$2"; shift 2 ;;
    *) shift ;;
  esac
done
echo "fitting $m from $in"
{
  echo "age,prob,metric"
  for a in 0 4 8 12; do
    echo "$a,0.05,0.41"
    echo "$a,0.5,0.44"
    echo "$a,0.95,0.47"
  done
} > "$out/${m}_centiles_by_age.csv"
"#,
        )
        .unwrap();

        let out = dir.path().join("out");
        fs::create_dir_all(&out).unwrap();
        fs::write(out.join("stale.txt"), "old run").unwrap();

        let mut cfg = config(table, out.clone(), &["fa"]);
        cfg.force = true;
        cfg.fitter.script = script;
        cfg.figure = Some(test_figure());

        let run = run_orchestrator(&cfg).unwrap();
        assert!(run.succeeded());
        assert!(!out.join("stale.txt").exists());
        assert_eq!(run.data_files, vec![out.join("AF_L_data.csv")]);
        assert_eq!(run.report.jobs.len(), 1);

        let log = fs::read_to_string(out.join("AF_L/fa_gamlss.log")).unwrap();
        assert!(log.contains("fitting fa"));
        let written = fs::read_to_string(out.join("AF_L_data.csv")).unwrap();
        assert_eq!(written.lines().count(), 11);
        assert!(run.summary_path.exists());

        assert_eq!(run.report.figures, vec![out.join("AF_L_GAMLSS_centiles.png")]);
        let png = fs::read(out.join("AF_L_GAMLSS_centiles.png")).unwrap();
        assert_eq!(&png[1..4], b"PNG");
    }

    #[test]
    fn missing_sex_aborts_before_any_job() {
        let dir = tempfile::tempdir().unwrap();
        let mut rows = ten_rows();
        rows[3] = "sub-03\tses-1\tAF_L\t0.43\t0.33\t4\t\tMYRNA".to_string();
        let table = write_table(dir.path(), &rows);
        let out = dir.path().join("out");

        let launched = AtomicUsize::new(0);
        let err = run_orchestrator_with(&config(table, out.clone(), &["fa"]), |job| {
            launched.fetch_add(1, Ordering::SeqCst);
            fake_fitter(job)
        })
        .unwrap_err();

        assert_eq!(err.exit_code(), 3);
        assert!(err.message().contains("AF_L"));
        assert!(err.message().contains("sex"));
        assert!(err.message().contains("line 5"));
        assert_eq!(launched.load(Ordering::SeqCst), 0);
        assert!(!out.exists());
    }

    #[test]
    fn existing_output_without_force_is_left_alone() {
        let dir = tempfile::tempdir().unwrap();
        let table = write_table(dir.path(), &ten_rows());
        let out = dir.path().join("out");
        fs::create_dir_all(&out).unwrap();
        fs::write(out.join("keep.txt"), "results").unwrap();

        let err = run_orchestrator_with(&config(table, out.clone(), &["fa"]), fake_fitter).unwrap_err();
        assert_eq!(err.exit_code(), 2);
        assert!(out.join("keep.txt").exists());
    }

    #[test]
    fn failed_jobs_are_reported_and_skip_figures() {
        let dir = tempfile::tempdir().unwrap();
        let table = write_table(dir.path(), &ten_rows());
        let out = dir.path().join("out");
        let mut cfg = config(table, out.clone(), &["fa", "afd_fixel"]);
        cfg.figure = Some(test_figure());

        let run = run_orchestrator_with(&cfg, |job| {
            if job.metric == "afd_fixel" {
                JobStatus::Failed { code: Some(1) }
            } else {
                fake_fitter(job)
            }
        })
        .unwrap();

        assert!(!run.succeeded());
        assert_eq!(run.report.failed_jobs().count(), 1);
        assert!(run.report.figures.is_empty());
        let summary = fs::read_to_string(&run.summary_path).unwrap();
        assert!(summary.contains("\"failed\""));
    }

    #[test]
    fn stratified_metric_runs_two_jobs_and_plots_both_strata() {
        let dir = tempfile::tempdir().unwrap();
        let table = write_table(dir.path(), &ten_rows());
        let out = dir.path().join("out");
        let mut cfg = config(table, out.clone(), &["fa", "afd_fixel"]);
        cfg.stratification = Some(StratificationRule::default());
        cfg.figure = Some(test_figure());

        let run = run_orchestrator_with(&cfg, fake_fitter).unwrap();
        let metrics: Vec<_> = run.report.jobs.iter().map(|o| o.job.metric.as_str()).collect();
        assert_eq!(metrics, ["fa", "afd_fixel_lowb", "afd_fixel_highb"]);
        assert!(out.join("AF_L_low_bval_data.csv").exists());
        assert!(out.join("AF_L_high_bval_data.csv").exists());
        assert_eq!(run.report.figures, vec![out.join("AF_L_GAMLSS_centiles.png")]);
        let png = fs::read(out.join("AF_L_GAMLSS_centiles.png")).unwrap();
        assert_eq!(&png[1..4], b"PNG");
    }

    #[test]
    fn stratified_metric_without_stratum_cohorts_aborts_before_any_job() {
        let dir = tempfile::tempdir().unwrap();
        let rows: Vec<String> = ten_rows()
            .into_iter()
            .map(|row| {
                let (rest, _) = row.rsplit_once('\t').unwrap();
                format!("{rest}\tHCP")
            })
            .collect();
        let table = write_table(dir.path(), &rows);
        let out = dir.path().join("out");
        let mut cfg = config(table, out.clone(), &["afd_fixel"]);
        cfg.stratification = Some(StratificationRule::default());

        let launched = AtomicUsize::new(0);
        let err = run_orchestrator_with(&cfg, |job| {
            launched.fetch_add(1, Ordering::SeqCst);
            fake_fitter(job)
        })
        .unwrap_err();

        assert_eq!(err.exit_code(), 3);
        assert!(err.message().contains("AF_L"));
        assert_eq!(launched.load(Ordering::SeqCst), 0);
        assert!(!out.exists());
    }

    #[test]
    fn network_mode_writes_into_the_root() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("network.csv");
        let mut text = String::from("subject,GlobalEfficiency,age,sex,cohort\n");
        for i in 0..6 {
            text.push_str(&format!("s{i},0.4{i},{},F,ABCD\n", i + 2));
        }
        fs::write(&path, text).unwrap();
        let out = dir.path().join("out");
        let mut cfg = config(path, out.clone(), &["GlobalEfficiency"]);
        cfg.mode = AnalysisMode::Network;
        cfg.n_cpus = 1;

        let run = run_orchestrator_with(&cfg, fake_fitter).unwrap();
        assert_eq!(run.data_files, vec![out.join("network_data.csv")]);
        assert_eq!(run.report.jobs[0].job.output_dir, out);
        assert!(out.join("GlobalEfficiency_gamlss.log").exists());
    }
}
