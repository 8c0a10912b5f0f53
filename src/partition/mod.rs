//! Partitioning of the observation table into fitting units.
//!
//! A partition is the subset of rows for one bundle (or the whole table for
//! network-level runs). Every partition is checked for completeness before
//! anything is written, so a bad row aborts the run without side effects.

use crate::domain::{
    AGE_COLUMN, BUNDLE_COLUMN, COHORT_COLUMN, NETWORK_PARTITION, SEX_COLUMN, StratificationRule,
    Stratum,
};
use crate::error::AppError;
use crate::io::table::ObservationTable;

/// Cohort-filtered, column-renamed copy of a partition for one b-value stratum.
#[derive(Debug, Clone)]
pub struct StratumPartition {
    pub stratum: Stratum,
    /// Renamed metric column (e.g. `afd_fixel_lowb`).
    pub metric: String,
    pub table: ObservationTable,
}

/// Rows for one partition key.
#[derive(Debug, Clone)]
pub struct Partition {
    pub key: String,
    pub table: ObservationTable,
    /// Strata of the stratified metric, empty when no rule applies.
    pub strata: Vec<StratumPartition>,
}

impl Partition {
    pub fn stratum(&self, stratum: Stratum) -> Option<&StratumPartition> {
        self.strata.iter().find(|s| s.stratum == stratum)
    }
}

/// Columns that must exist and be complete for a fit over `metrics`.
pub fn fit_columns(metrics: &[String]) -> Vec<&str> {
    metrics
        .iter()
        .map(String::as_str)
        .chain([AGE_COLUMN, SEX_COLUMN, COHORT_COLUMN])
        .collect()
}

/// Split the table by bundle.
///
/// `bundles` selects and orders the partitions; `None` takes every bundle in
/// first-appearance order.
pub fn partition_by_bundle(
    table: &ObservationTable,
    bundles: Option<&[String]>,
    metrics: &[String],
    rule: Option<&StratificationRule>,
) -> Result<Vec<Partition>, AppError> {
    let mut required = fit_columns(metrics);
    required.push(BUNDLE_COLUMN);
    table.require_columns(&required)?;

    let keys = match bundles {
        Some(keys) => keys.to_vec(),
        None => table.distinct(BUNDLE_COLUMN)?,
    };
    if keys.is_empty() {
        return Err(AppError::new(3, "The table contains no bundle values to fit."));
    }

    keys.into_iter()
        .map(|key| {
            let subset = table.filter_eq(BUNDLE_COLUMN, &key)?;
            if subset.is_empty() {
                return Err(AppError::new(
                    3,
                    format!("Bundle {key} has no rows in the input table."),
                ));
            }
            build_partition(key, subset, metrics, rule)
        })
        .collect()
}

/// Treat the whole table as a single network-level partition.
pub fn partition_network(
    table: &ObservationTable,
    metrics: &[String],
    rule: Option<&StratificationRule>,
) -> Result<Vec<Partition>, AppError> {
    table.require_columns(&fit_columns(metrics))?;
    if table.is_empty() {
        return Err(AppError::new(3, "The input table has no rows."));
    }
    Ok(vec![build_partition(
        NETWORK_PARTITION.to_string(),
        table.clone(),
        metrics,
        rule,
    )?])
}

fn build_partition(
    key: String,
    table: ObservationTable,
    metrics: &[String],
    rule: Option<&StratificationRule>,
) -> Result<Partition, AppError> {
    check_complete(&key, &table, metrics)?;

    let strata = match rule {
        Some(rule) if metrics.iter().any(|m| rule.applies_to(m)) => stratify(&key, &table, rule)?,
        _ => Vec::new(),
    };

    log::debug!(
        "Partition {key}: {} rows, {} strata",
        table.len(),
        strata.len()
    );
    Ok(Partition { key, table, strata })
}

/// Fail if any metric/age/sex/cohort value is missing.
fn check_complete(key: &str, table: &ObservationTable, metrics: &[String]) -> Result<(), AppError> {
    let columns = fit_columns(metrics);
    let Some(first) = table.first_missing(&columns)? else {
        return Ok(());
    };
    let offending = table.columns_with_missing(&columns)?;
    let subject = if key == NETWORK_PARTITION {
        "Data".to_string()
    } else {
        format!("Bundle {key}")
    };
    Err(AppError::new(
        3,
        format!(
            "{subject} contains NA values in the metric, age, sex, or cohort columns \
             ({}; first at line {}, column `{}`). \
             Please remove these rows before fitting the GAMLSS model.",
            offending.join(", "),
            first.line,
            first.column
        ),
    ))
}

fn stratify(
    key: &str,
    table: &ObservationTable,
    rule: &StratificationRule,
) -> Result<Vec<StratumPartition>, AppError> {
    let mut out = Vec::new();
    for stratum in Stratum::ALL {
        let metric = rule.stratum_metric(stratum);
        let subset = table
            .filter_in(COHORT_COLUMN, rule.cohorts(stratum))?
            .renamed(&rule.metric, &metric)?;
        if subset.is_empty() {
            log::warn!(
                "Partition {key}: no rows from the {} cohorts ({}); skipping {metric}.",
                stratum.display_name(),
                rule.cohorts(stratum).join(", ")
            );
            continue;
        }
        out.push(StratumPartition {
            stratum,
            metric,
            table: subset,
        });
    }
    if out.is_empty() {
        return Err(AppError::new(
            3,
            format!(
                "Partition {key}: no rows from the {} cohorts ({}) or the {} cohorts ({}); \
                 {} cannot be fitted per acquisition stratum.",
                Stratum::LowB.display_name(),
                rule.cohorts(Stratum::LowB).join(", "),
                Stratum::HighB.display_name(),
                rule.cohorts(Stratum::HighB).join(", "),
                rule.metric
            ),
        ));
    }
    Ok(out)
}
