//! Observation table loading and manipulation.
//!
//! The observation table is the long-format dataframe handed to the
//! orchestrators: one row per (subject, session[, bundle]) with metric
//! columns plus `age`, `sex` and `cohort`.
//!
//! Values are kept as strings so that a partition can be written back out
//! byte-for-byte for the external fitter; numeric parsing only happens for
//! the columns that are actually plotted.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use csv::StringRecord;

use crate::domain::Separator;
use crate::error::AppError;

/// Tokens read as missing values (pandas' default NA set, minus the exotic ones).
const NA_TOKENS: [&str; 11] = [
    "NA", "N/A", "n/a", "NaN", "nan", "-NaN", "null", "NULL", "None", "<NA>", "#N/A",
];

/// Whether a raw field counts as a missing value.
pub fn is_missing(value: &str) -> bool {
    let value = value.trim();
    value.is_empty() || NA_TOKENS.contains(&value)
}

/// First missing value found by [`ObservationTable::first_missing`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MissingValue {
    /// 1-based line number in the source file (the header is line 1).
    pub line: usize,
    pub column: String,
}

/// In-memory delimited table.
#[derive(Debug, Clone, PartialEq)]
pub struct ObservationTable {
    headers: Vec<String>,
    rows: Vec<Vec<String>>,
    /// Source line of each row, kept through filtering for error messages.
    lines: Vec<usize>,
}

impl ObservationTable {
    /// Build a table from already split rows. Rows must match the header width.
    pub fn from_rows(headers: Vec<String>, rows: Vec<Vec<String>>) -> Result<Self, AppError> {
        for (idx, row) in rows.iter().enumerate() {
            if row.len() != headers.len() {
                return Err(AppError::new(
                    2,
                    format!(
                        "Row {} has {} fields, expected {}.",
                        idx + 1,
                        row.len(),
                        headers.len()
                    ),
                ));
            }
        }
        let lines = (0..rows.len()).map(|idx| idx + 2).collect();
        Ok(Self { headers, rows, lines })
    }

    pub fn headers(&self) -> &[String] {
        &self.headers
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h == name)
    }

    fn index_of(&self, name: &str) -> Result<usize, AppError> {
        self.column_index(name)
            .ok_or_else(|| AppError::new(2, format!("Missing required column: `{name}`")))
    }

    /// Fail with one message listing every absent column.
    pub fn require_columns(&self, names: &[&str]) -> Result<(), AppError> {
        let missing: Vec<String> = names
            .iter()
            .filter(|name| self.column_index(name).is_none())
            .map(|name| format!("`{name}`"))
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        Err(AppError::new(
            2,
            format!(
                "Missing required column{}: {}",
                if missing.len() > 1 { "s" } else { "" },
                missing.join(", ")
            ),
        ))
    }

    /// Distinct non-missing values of a column, in first-appearance order.
    pub fn distinct(&self, column: &str) -> Result<Vec<String>, AppError> {
        let idx = self.index_of(column)?;
        let mut seen = HashSet::new();
        let mut out = Vec::new();
        for row in &self.rows {
            let value = row[idx].trim();
            if is_missing(value) {
                continue;
            }
            if seen.insert(value.to_string()) {
                out.push(value.to_string());
            }
        }
        Ok(out)
    }

    /// Rows whose `column` equals `value` (after trimming).
    pub fn filter_eq(&self, column: &str, value: &str) -> Result<Self, AppError> {
        let idx = self.index_of(column)?;
        Ok(self.retain(|row| row[idx].trim() == value))
    }

    /// Rows whose `column` is one of `values`.
    pub fn filter_in(&self, column: &str, values: &[String]) -> Result<Self, AppError> {
        let idx = self.index_of(column)?;
        let set: HashSet<&str> = values.iter().map(String::as_str).collect();
        Ok(self.retain(|row| set.contains(row[idx].trim())))
    }

    fn retain(&self, keep: impl Fn(&[String]) -> bool) -> Self {
        let mut rows = Vec::new();
        let mut lines = Vec::new();
        for (row, line) in self.rows.iter().zip(&self.lines) {
            if keep(row) {
                rows.push(row.clone());
                lines.push(*line);
            }
        }
        Self {
            headers: self.headers.clone(),
            rows,
            lines,
        }
    }

    /// Copy of the table with one column renamed.
    pub fn renamed(&self, from: &str, to: &str) -> Result<Self, AppError> {
        let idx = self.index_of(from)?;
        if from != to && self.column_index(to).is_some() {
            return Err(AppError::new(
                2,
                format!("Cannot rename `{from}` to `{to}`: column `{to}` already exists."),
            ));
        }
        let mut out = self.clone();
        out.headers[idx] = to.to_string();
        Ok(out)
    }

    /// Raw (trimmed) values of a column.
    pub fn text_column(&self, column: &str) -> Result<Vec<&str>, AppError> {
        let idx = self.index_of(column)?;
        Ok(self.rows.iter().map(|row| row[idx].trim()).collect())
    }

    /// Parse a column as numbers; missing values become `None`.
    pub fn numeric_column(&self, column: &str) -> Result<Vec<Option<f64>>, AppError> {
        let idx = self.index_of(column)?;
        self.rows
            .iter()
            .zip(&self.lines)
            .map(|(row, line)| {
                let raw = row[idx].trim();
                if is_missing(raw) {
                    return Ok(None);
                }
                raw.parse::<f64>().map(Some).map_err(|_| {
                    AppError::new(
                        3,
                        format!("Line {line}: `{column}` value '{raw}' is not a number."),
                    )
                })
            })
            .collect()
    }

    /// First missing value (row-major) among `columns`, if any.
    pub fn first_missing(&self, columns: &[&str]) -> Result<Option<MissingValue>, AppError> {
        let indices = columns
            .iter()
            .map(|c| self.index_of(c).map(|idx| (idx, *c)))
            .collect::<Result<Vec<_>, _>>()?;
        for (row, line) in self.rows.iter().zip(&self.lines) {
            for &(idx, column) in &indices {
                if is_missing(&row[idx]) {
                    return Ok(Some(MissingValue {
                        line: *line,
                        column: column.to_string(),
                    }));
                }
            }
        }
        Ok(None)
    }

    /// Columns among `columns` that contain at least one missing value.
    pub fn columns_with_missing(&self, columns: &[&str]) -> Result<Vec<String>, AppError> {
        let mut out = Vec::new();
        for column in columns {
            let idx = self.index_of(column)?;
            if self.rows.iter().any(|row| is_missing(&row[idx])) {
                out.push(column.to_string());
            }
        }
        Ok(out)
    }

    /// Write the table as comma-separated CSV with a header row.
    pub fn write_csv(&self, path: &Path) -> Result<(), AppError> {
        let mut writer = csv::Writer::from_path(path).map_err(|e| {
            AppError::new(2, format!("Failed to create CSV '{}': {e}", path.display()))
        })?;
        writer
            .write_record(&self.headers)
            .map_err(|e| AppError::new(2, format!("Failed to write CSV header: {e}")))?;
        for row in &self.rows {
            writer
                .write_record(row)
                .map_err(|e| AppError::new(2, format!("Failed to write CSV row: {e}")))?;
        }
        writer
            .flush()
            .map_err(|e| AppError::new(2, format!("Failed to flush CSV '{}': {e}", path.display())))?;
        Ok(())
    }
}

/// Load a tab- or comma-separated table.
pub fn load_table(path: &Path, separator: Separator) -> Result<ObservationTable, AppError> {
    let content = fs::read_to_string(path)
        .map_err(|e| AppError::new(2, format!("Failed to read table '{}': {e}", path.display())))?;

    let header_line = content.lines().next().unwrap_or_default();
    let delimiter = separator.resolve(header_line);

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .trim(csv::Trim::All)
        .from_reader(content.as_bytes());

    let headers = reader
        .headers()
        .map_err(|e| AppError::new(2, format!("Failed to read table headers: {e}")))?
        .clone();
    let headers = normalize_headers(&headers)?;

    let mut rows = Vec::new();
    let mut lines = Vec::new();
    for (idx, result) in reader.records().enumerate() {
        let record = result.map_err(|e| {
            AppError::new(2, format!("Failed to parse '{}': {e}", path.display()))
        })?;
        rows.push(record.iter().map(str::to_string).collect());
        lines.push(
            record
                .position()
                .map(|p| p.line() as usize)
                .unwrap_or(idx + 2),
        );
    }

    log::info!(
        "Loaded {} rows x {} columns from {}",
        rows.len(),
        headers.len(),
        path.display()
    );

    Ok(ObservationTable { headers, rows, lines })
}

fn normalize_headers(headers: &StringRecord) -> Result<Vec<String>, AppError> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut out = Vec::with_capacity(headers.len());
    for (idx, name) in headers.iter().enumerate() {
        // Spreadsheet exports sometimes prefix the first header with a BOM.
        let name = name.trim().trim_start_matches('\u{feff}').to_string();
        if let Some(first) = seen.insert(name.clone(), idx) {
            return Err(AppError::new(
                2,
                format!(
                    "Duplicate column `{name}` (positions {} and {}).",
                    first + 1,
                    idx + 1
                ),
            ));
        }
        out.push(name);
    }
    Ok(out)
}
