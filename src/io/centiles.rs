//! Reading the fitter's centile output.
//!
//! The external fitter writes `<metric>_centiles_by_age.csv` in long format
//! (`age`, `prob`, `metric`). Here it is pivoted into one row per age and one
//! column per probability level. No interpolation happens: the ages in the
//! file define the plotted domain.

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::path::Path;

use crate::domain::CENTILES_SUFFIX;
use crate::error::AppError;
use crate::io::table::is_missing;

/// Probabilities compared within this tolerance are the same column.
const PROB_EPS: f64 = 1e-9;

/// Wide centile table for one metric.
#[derive(Debug, Clone, PartialEq)]
pub struct CentileTable {
    pub metric: String,
    /// Distinct ages, ascending.
    pub ages: Vec<f64>,
    /// Distinct probability levels, ascending.
    pub probs: Vec<f64>,
    /// `values[age_idx][prob_idx]`; `None` where the fitter gave no value.
    pub values: Vec<Vec<Option<f64>>>,
}

impl CentileTable {
    /// Pivot long `(age, prob, value)` rows. Duplicate `(age, prob)` pairs are an error.
    pub fn from_long(metric: impl Into<String>, rows: &[(f64, f64, Option<f64>)]) -> Result<Self, AppError> {
        let metric = metric.into();
        let ages = sorted_distinct(rows.iter().map(|r| r.0));
        let probs = sorted_distinct(rows.iter().map(|r| r.1));

        let mut values = vec![vec![None; probs.len()]; ages.len()];
        let mut seen = vec![vec![false; probs.len()]; ages.len()];
        for &(age, prob, value) in rows {
            let i = position(&ages, age);
            let j = position(&probs, prob);
            if seen[i][j] {
                return Err(AppError::new(
                    4,
                    format!("Centiles for {metric}: duplicate entry for age {age} and prob {prob}."),
                ));
            }
            seen[i][j] = true;
            values[i][j] = value;
        }

        Ok(Self {
            metric,
            ages,
            probs,
            values,
        })
    }

    /// `(age, value)` series for one probability level, skipping gaps.
    pub fn column(&self, prob: f64) -> Option<Vec<(f64, f64)>> {
        let j = self.probs.iter().position(|p| (p - prob).abs() < PROB_EPS)?;
        Some(
            self.ages
                .iter()
                .zip(&self.values)
                .filter_map(|(&age, row)| row[j].map(|v| (age, v)))
                .collect(),
        )
    }

    /// Like [`column`](Self::column) but an error naming the metric when absent.
    pub fn require_column(&self, prob: f64) -> Result<Vec<(f64, f64)>, AppError> {
        self.column(prob).ok_or_else(|| {
            AppError::new(
                4,
                format!("Centiles for {} have no prob = {prob} column.", self.metric),
            )
        })
    }
}

/// Read one long-format centile file.
pub fn read_centiles(path: &Path, metric: &str) -> Result<CentileTable, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::new(4, format!("Failed to open centiles '{}': {e}", path.display())))?;
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .flexible(true)
        .from_reader(file);

    let headers = reader
        .headers()
        .map_err(|e| AppError::new(4, format!("Failed to read centile headers: {e}")))?
        .clone();
    let header_map: HashMap<String, usize> = headers
        .iter()
        .enumerate()
        .map(|(idx, name)| (name.trim().to_string(), idx))
        .collect();
    let column = |name: &str| {
        header_map.get(name).copied().ok_or_else(|| {
            AppError::new(
                4,
                format!("Centile file '{}' has no `{name}` column.", path.display()),
            )
        })
    };
    let (age_idx, prob_idx, value_idx) = (column("age")?, column("prob")?, column("metric")?);

    let mut rows = Vec::new();
    for (idx, result) in reader.records().enumerate() {
        let line = idx + 2;
        let record = result
            .map_err(|e| AppError::new(4, format!("{}: CSV parse error: {e}", path.display())))?;
        let field = |i: usize| record.get(i).unwrap_or_default();
        let parse = |i: usize, name: &str| -> Result<Option<f64>, AppError> {
            let raw = field(i);
            if is_missing(raw) {
                return Ok(None);
            }
            raw.parse::<f64>().map(Some).map_err(|_| {
                AppError::new(
                    4,
                    format!("{} line {line}: invalid `{name}` value '{raw}'.", path.display()),
                )
            })
        };
        let (Some(age), Some(prob)) = (parse(age_idx, "age")?, parse(prob_idx, "prob")?) else {
            return Err(AppError::new(
                4,
                format!("{} line {line}: missing `age` or `prob`.", path.display()),
            ));
        };
        rows.push((age, prob, parse(value_idx, "metric")?));
    }

    CentileTable::from_long(metric, &rows)
}

/// Load every `*_centiles_by_age.csv` in `dir`, keyed by metric name.
pub fn scan_centiles(dir: &Path) -> Result<BTreeMap<String, CentileTable>, AppError> {
    let entries = fs::read_dir(dir)
        .map_err(|e| AppError::new(4, format!("Failed to list '{}': {e}", dir.display())))?;

    let mut out = BTreeMap::new();
    for entry in entries {
        let entry = entry.map_err(|e| AppError::new(4, format!("Failed to list '{}': {e}", dir.display())))?;
        let name = entry.file_name();
        let Some(metric) = name.to_str().and_then(|n| n.strip_suffix(CENTILES_SUFFIX)) else {
            continue;
        };
        if metric.is_empty() {
            continue;
        }
        let table = read_centiles(&entry.path(), metric)?;
        log::debug!(
            "Loaded centiles for {metric}: {} ages x {} probs",
            table.ages.len(),
            table.probs.len()
        );
        out.insert(metric.to_string(), table);
    }
    Ok(out)
}

fn sorted_distinct(values: impl Iterator<Item = f64>) -> Vec<f64> {
    let mut v: Vec<f64> = values.collect();
    v.sort_by(|a, b| a.total_cmp(b));
    v.dedup_by(|a, b| (*a - *b).abs() < PROB_EPS);
    v
}

fn position(sorted: &[f64], value: f64) -> usize {
    sorted
        .iter()
        .position(|v| (v - value).abs() < PROB_EPS)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pivot_sorts_ages_and_probs() {
        let rows = [
            (2.0, 0.95, Some(0.6)),
            (1.0, 0.5, Some(0.4)),
            (2.0, 0.05, Some(0.3)),
            (1.0, 0.05, Some(0.2)),
            (2.0, 0.5, Some(0.45)),
            (1.0, 0.95, None),
        ];
        let table = CentileTable::from_long("fa", &rows).unwrap();
        assert_eq!(table.ages, vec![1.0, 2.0]);
        assert_eq!(table.probs, vec![0.05, 0.5, 0.95]);
        assert_eq!(table.column(0.05).unwrap(), vec![(1.0, 0.2), (2.0, 0.3)]);
        assert_eq!(table.column(0.95).unwrap(), vec![(2.0, 0.6)]);
        assert!(table.column(0.25).is_none());
    }

    #[test]
    fn duplicate_cells_are_rejected() {
        let rows = [(1.0, 0.5, Some(0.4)), (1.0, 0.5, Some(0.41))];
        assert!(CentileTable::from_long("fa", &rows).is_err());
    }

    #[test]
    fn scan_picks_up_only_centile_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("fa_centiles_by_age.csv"),
            "\"\",\"age\",\"prob\",\"metric\"\n\"1\",0,0.5,0.3\n\"2\",1,0.5,NA\n",
        )
        .unwrap();
        fs::write(dir.path().join("fa_gamlss.log"), "log").unwrap();
        fs::write(dir.path().join("notes.csv"), "a,b\n").unwrap();

        let found = scan_centiles(dir.path()).unwrap();
        assert_eq!(found.keys().collect::<Vec<_>>(), ["fa"]);
        let fa = &found["fa"];
        assert_eq!(fa.ages, vec![0.0, 1.0]);
        assert_eq!(fa.column(0.5).unwrap(), vec![(0.0, 0.3)]);
    }

    #[test]
    fn missing_metric_column_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("md_centiles_by_age.csv");
        fs::write(&path, "age,prob,value\n0,0.5,1\n").unwrap();
        let err = read_centiles(&path, "md").unwrap_err();
        assert_eq!(err.exit_code(), 4);
        assert!(err.message().contains("`metric`"));
    }
}
