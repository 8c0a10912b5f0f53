//! Shared domain types.
//!
//! These types describe a run (which table, which metrics, how to call the
//! fitter) and the small vocabularies the data uses (sex labels, b-value
//! strata, phase-encoding directions).

use std::path::PathBuf;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Column holding the subject age in years.
pub const AGE_COLUMN: &str = "age";
/// Column holding the sex label.
pub const SEX_COLUMN: &str = "sex";
/// Column holding the acquisition cohort (study) name.
pub const COHORT_COLUMN: &str = "cohort";
/// Column holding the white-matter bundle name (bundle mode only).
pub const BUNDLE_COLUMN: &str = "bundle";

/// File name suffix the external fitter uses for its centile output.
pub const CENTILES_SUFFIX: &str = "_centiles_by_age.csv";

/// Partition key used for network-level runs (the whole table is one partition).
pub const NETWORK_PARTITION: &str = "network";

/// Which orchestrator is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalysisMode {
    /// One partition per bundle; each partition gets its own job directory.
    Bundle,
    /// A single partition over the whole table.
    Network,
}

/// Field separator of the input table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Separator {
    /// Tab when the header line contains a tab, comma otherwise.
    Auto,
    Tab,
    Comma,
}

impl Separator {
    /// Resolve to a delimiter byte, sniffing `header_line` for `Auto`.
    pub fn resolve(self, header_line: &str) -> u8 {
        match self {
            Separator::Tab => b'\t',
            Separator::Comma => b',',
            Separator::Auto if header_line.contains('\t') => b'\t',
            Separator::Auto => b',',
        }
    }
}

/// Sex label of an observation, used for the scatter marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Sex {
    Male,
    Female,
    Other,
}

impl Sex {
    /// Case-insensitive: `m`, `male`, `man` are male; `f`, `female`, `woman` female.
    pub fn from_label(label: &str) -> Self {
        match label.trim().to_ascii_lowercase().as_str() {
            "m" | "male" | "man" => Sex::Male,
            "f" | "female" | "woman" => Sex::Female,
            _ => Sex::Other,
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Sex::Male => "Male",
            Sex::Female => "Female",
            Sex::Other => "Other",
        }
    }
}

/// Diffusion acquisition stratum for the b-value-stratified metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stratum {
    /// Single-shell, low b-value acquisitions.
    LowB,
    /// Multi-shell, high b-value acquisitions.
    HighB,
}

impl Stratum {
    pub const ALL: [Stratum; 2] = [Stratum::LowB, Stratum::HighB];

    /// Suffix appended to the metric column name in the stratum's table.
    pub fn metric_suffix(self) -> &'static str {
        match self {
            Stratum::LowB => "_lowb",
            Stratum::HighB => "_highb",
        }
    }

    /// Tag used in the stratum's materialized CSV name.
    pub fn file_tag(self) -> &'static str {
        match self {
            Stratum::LowB => "low_bval",
            Stratum::HighB => "high_bval",
        }
    }

    /// Legend label.
    pub fn display_name(self) -> &'static str {
        match self {
            Stratum::LowB => "Single-shell",
            Stratum::HighB => "Multi-shell",
        }
    }
}

/// Rule splitting one metric into two cohort-based strata that are fitted separately.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StratificationRule {
    pub metric: String,
    pub low_b_cohorts: Vec<String>,
    pub high_b_cohorts: Vec<String>,
}

impl Default for StratificationRule {
    fn default() -> Self {
        Self {
            metric: "afd_fixel".to_string(),
            low_b_cohorts: vec!["MYRNA".into(), "GESTE".into(), "PING".into()],
            high_b_cohorts: vec!["BCP".into(), "ABCD".into(), "BANDA".into()],
        }
    }
}

impl StratificationRule {
    pub fn cohorts(&self, stratum: Stratum) -> &[String] {
        match stratum {
            Stratum::LowB => &self.low_b_cohorts,
            Stratum::HighB => &self.high_b_cohorts,
        }
    }

    /// Renamed metric column for a stratum, e.g. `afd_fixel_lowb`.
    pub fn stratum_metric(&self, stratum: Stratum) -> String {
        format!("{}{}", self.metric, stratum.metric_suffix())
    }

    pub fn applies_to(&self, metric: &str) -> bool {
        self.metric == metric
    }
}

/// How the external fitter is launched.
///
/// The command line is `[interpreter] script --input <csv> --output <dir> --metric <name>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FitterCommand {
    /// Program used to run the script (e.g. `Rscript`). `None` runs the script directly.
    pub interpreter: Option<String>,
    pub script: PathBuf,
}

/// Figure options; `None` in [`RunConfig::figure`] disables plotting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FigureConfig {
    /// Font name searched for in the system font directories.
    pub font_name: String,
    /// Explicit font file, bypassing the search.
    pub font_file: Option<PathBuf>,
    pub width: u32,
    pub height: u32,
}

/// Fully resolved configuration of one orchestrator run.
#[derive(Debug, Clone)]
pub struct RunConfig {
    pub mode: AnalysisMode,
    pub in_table: PathBuf,
    pub output_dir: PathBuf,
    pub metrics: Vec<String>,
    /// Bundles to fit; `None` means every bundle in the table.
    pub bundles: Option<Vec<String>>,
    pub fitter: FitterCommand,
    pub n_cpus: usize,
    pub force: bool,
    pub separator: Separator,
    pub stratification: Option<StratificationRule>,
    pub figure: Option<FigureConfig>,
}

/// Phase-encoding direction label used in BIDS file names (`dir-<label>`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[allow(clippy::upper_case_acronyms)]
pub enum PhaseEncoding {
    #[value(name = "AP")]
    AP,
    #[value(name = "PA")]
    PA,
    #[value(name = "LR")]
    LR,
    #[value(name = "RL")]
    RL,
    #[value(name = "SI")]
    SI,
    #[value(name = "IS")]
    IS,
}

impl PhaseEncoding {
    pub fn label(self) -> &'static str {
        match self {
            PhaseEncoding::AP => "AP",
            PhaseEncoding::PA => "PA",
            PhaseEncoding::LR => "LR",
            PhaseEncoding::RL => "RL",
            PhaseEncoding::SI => "SI",
            PhaseEncoding::IS => "IS",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auto_separator_sniffs_tabs() {
        assert_eq!(Separator::Auto.resolve("subject\tsession\tbundle"), b'\t');
        assert_eq!(Separator::Auto.resolve("subject,session,age"), b',');
        assert_eq!(Separator::Comma.resolve("a\tb"), b',');
    }

    #[test]
    fn sex_labels_are_case_insensitive() {
        assert_eq!(Sex::from_label("M"), Sex::Male);
        assert_eq!(Sex::from_label(" female "), Sex::Female);
        assert_eq!(Sex::from_label("unknown"), Sex::Other);
    }

    #[test]
    fn default_rule_names_strata_columns() {
        let rule = StratificationRule::default();
        assert!(rule.applies_to("afd_fixel"));
        assert_eq!(rule.stratum_metric(Stratum::LowB), "afd_fixel_lowb");
        assert_eq!(rule.stratum_metric(Stratum::HighB), "afd_fixel_highb");
        assert!(rule.cohorts(Stratum::LowB).iter().any(|c| c == "PING"));
    }
}
