//! b-value / b-vector text tables.
//!
//! Both files are whitespace-separated numbers. b-values are read as one flat
//! list whatever the line layout; b-vectors keep their rows (usually three,
//! one per axis) with one column per volume.

use std::fs;
use std::path::Path;

use crate::error::AppError;

/// b-vectors as rows of per-volume components.
#[derive(Debug, Clone, PartialEq)]
pub struct Bvecs {
    pub rows: Vec<Vec<f64>>,
}

impl Bvecs {
    /// Number of volumes described (columns per row).
    pub fn columns(&self) -> usize {
        self.rows.first().map_or(0, Vec::len)
    }

    /// Drop the first column of every row.
    pub fn without_first(&self) -> Self {
        Self {
            rows: self
                .rows
                .iter()
                .map(|row| row.iter().skip(1).copied().collect())
                .collect(),
        }
    }
}

fn parse_numbers(line: &str, path: &Path, line_no: usize) -> Result<Vec<f64>, AppError> {
    line.split_whitespace()
        .map(|tok| {
            tok.parse::<f64>().map_err(|_| {
                AppError::new(
                    3,
                    format!("{} line {line_no}: '{tok}' is not a number.", path.display()),
                )
            })
        })
        .collect()
}

fn read_text(path: &Path) -> Result<String, AppError> {
    fs::read_to_string(path)
        .map_err(|e| AppError::new(2, format!("Failed to read '{}': {e}", path.display())))
}

/// Parse b-values from text; all lines are concatenated.
pub fn parse_bvals(text: &str, path: &Path) -> Result<Vec<f64>, AppError> {
    let mut out = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        out.extend(parse_numbers(line, path, idx + 1)?);
    }
    Ok(out)
}

/// Parse b-vectors from text; blank lines are skipped and rows must be equally long.
pub fn parse_bvecs(text: &str, path: &Path) -> Result<Bvecs, AppError> {
    let mut rows: Vec<Vec<f64>> = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let row = parse_numbers(line, path, idx + 1)?;
        if row.is_empty() {
            continue;
        }
        if let Some(expected) = rows.first().map(Vec::len).filter(|n| *n != row.len()) {
            return Err(AppError::new(
                3,
                format!(
                    "{} line {}: expected {expected} values, found {}.",
                    path.display(),
                    idx + 1,
                    row.len()
                ),
            ));
        }
        rows.push(row);
    }
    Ok(Bvecs { rows })
}

pub fn read_bvals(path: &Path) -> Result<Vec<f64>, AppError> {
    parse_bvals(&read_text(path)?, path)
}

pub fn read_bvecs(path: &Path) -> Result<Bvecs, AppError> {
    parse_bvecs(&read_text(path)?, path)
}

/// One b-value per line, six decimals.
pub fn format_bvals(bvals: &[f64]) -> String {
    bvals.iter().map(|v| format!("{v:.6}\n")).collect()
}

/// One row per line, space separated, six decimals.
pub fn format_bvecs(bvecs: &Bvecs) -> String {
    bvecs
        .rows
        .iter()
        .map(|row| {
            let cells: Vec<String> = row.iter().map(|v| format!("{v:.6}")).collect();
            format!("{}\n", cells.join(" "))
        })
        .collect()
}
