// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Dataset loading and cleaning
//!
//! Tables are CSV files with a header row, the record identifier in the first
//! column, the ground truth in the last column and features in between.

use crate::aggregate::{percentile, OrderedMap};
use crate::error::{ColtraneError, Result};
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};

/// Tokens read as missing values
const MISSING_TOKENS: &[&str] = &["", "NA", "N/A", "NaN", "nan", "null", "NULL", "None", "#N/A"];

/// A single table cell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Cell {
    Number(f64),
    Text(String),
    Missing,
}

impl Cell {
    /// Parse a raw CSV field
    pub fn parse(raw: &str) -> Self {
        let trimmed = raw.trim();
        if MISSING_TOKENS.contains(&trimmed) {
            Cell::Missing
        } else if let Ok(value) = trimmed.parse::<f64>() {
            if value.is_nan() {
                Cell::Missing
            } else {
                Cell::Number(value)
            }
        } else {
            Cell::Text(trimmed.to_string())
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Cell::Number(v) => Some(*v),
            _ => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, Cell::Missing)
    }

    pub fn is_text(&self) -> bool {
        matches!(self, Cell::Text(_))
    }

    fn key(&self) -> CellKey {
        match self {
            // -0.0 and 0.0 are the same record value
            Cell::Number(v) if *v == 0.0 => CellKey::Number(0),
            Cell::Number(v) => CellKey::Number(v.to_bits()),
            Cell::Text(s) => CellKey::Text(s.clone()),
            Cell::Missing => CellKey::Missing,
        }
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Number(v) => write!(f, "{}", v),
            Cell::Text(s) => write!(f, "{}", s),
            Cell::Missing => write!(f, "NaN"),
        }
    }
}

/// Hashable identity of a cell, used for duplicate detection
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum CellKey {
    Number(u64),
    Text(String),
    Missing,
}

/// Descriptive statistics of one numerical attribute
#[derive(Debug, Clone, Serialize)]
pub struct Description {
    pub count: usize,
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    #[serde(rename = "25%")]
    pub p25: f64,
    #[serde(rename = "50%")]
    pub p50: f64,
    #[serde(rename = "75%")]
    pub p75: f64,
    pub max: f64,
}

/// Short description used in batch summaries and logs
#[derive(Debug, Clone, Serialize)]
pub struct DatasetSummary {
    pub name: String,
    pub path: Option<String>,
    pub rows: usize,
    pub attributes: Vec<String>,
}

/// A loaded table with derived feature rows and labels
///
/// `x` and `y` are recomputed together after every mutation, so they always
/// hold the same number of rows as the table.
#[derive(Debug, Clone)]
pub struct Dataset {
    name: String,
    path: Option<PathBuf>,
    header: Vec<String>,
    rows: Vec<Vec<Cell>>,
    x: Vec<Vec<Cell>>,
    y: Vec<Cell>,
}

impl Dataset {
    /// Load a CSV table from disk
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file = File::open(path).map_err(|e| ColtraneError::data_load(path, e.to_string()))?;
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .from_reader(file);

        let header: Vec<String> = reader
            .headers()
            .map_err(|e| ColtraneError::data_load(path, e.to_string()))?
            .iter()
            .map(|h| h.trim().to_string())
            .collect();

        let mut rows = Vec::new();
        for (idx, record) in reader.records().enumerate() {
            let record = record
                .map_err(|e| ColtraneError::data_load(path, format!("record {}: {}", idx, e)))?;
            rows.push(record.iter().map(Cell::parse).collect());
        }

        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "dataset".to_string());

        let dataset = Self::build(name, Some(path.to_path_buf()), header, rows)?;
        tracing::info!(
            "Loaded {} ({} rows, {} attributes)",
            dataset.name,
            dataset.len(),
            dataset.attributes().len()
        );
        Ok(dataset)
    }

    /// Build an in-memory dataset with the same validation as [`Dataset::load`]
    pub fn from_rows(name: impl Into<String>, header: Vec<String>, rows: Vec<Vec<Cell>>) -> Result<Self> {
        Self::build(name.into(), None, header, rows)
    }

    fn build(name: String, path: Option<PathBuf>, header: Vec<String>, rows: Vec<Vec<Cell>>) -> Result<Self> {
        let origin = path.clone().unwrap_or_else(|| PathBuf::from(&name));

        if header.len() < 2 {
            return Err(ColtraneError::data_load(
                origin,
                format!("expected at least 2 columns (id, label), found {}", header.len()),
            ));
        }
        if let Some((idx, row)) = rows.iter().enumerate().find(|(_, r)| r.len() != header.len()) {
            return Err(ColtraneError::data_load(
                origin,
                format!("row {} has {} fields, header has {}", idx, row.len(), header.len()),
            ));
        }

        let mut dataset = Self {
            name,
            path,
            header,
            rows,
            x: Vec::new(),
            y: Vec::new(),
        };
        dataset.refresh();
        Ok(dataset)
    }

    fn refresh(&mut self) {
        let last = self.header.len() - 1;
        self.x = self.rows.iter().map(|r| r[1..last].to_vec()).collect();
        self.y = self.rows.iter().map(|r| r[last].clone()).collect();
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    /// Feature column names
    pub fn attributes(&self) -> &[String] {
        &self.header[1..self.header.len() - 1]
    }

    pub fn label_name(&self) -> &str {
        &self.header[self.header.len() - 1]
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Feature rows
    pub fn x(&self) -> &[Vec<Cell>] {
        &self.x
    }

    /// Ground truth values
    pub fn y(&self) -> &[Cell] {
        &self.y
    }

    pub fn ids(&self) -> impl Iterator<Item = &Cell> {
        self.rows.iter().map(|r| &r[0])
    }

    /// Labels rendered as strings
    pub fn label_strings(&self) -> Vec<String> {
        self.y.iter().map(|c| c.to_string()).collect()
    }

    /// Feature and label columns (everything but the id), column-major
    pub fn xy_columns(&self) -> Vec<(String, Vec<Cell>)> {
        (1..self.header.len())
            .map(|col| {
                let values = self.rows.iter().map(|r| r[col].clone()).collect();
                (self.header[col].clone(), values)
            })
            .collect()
    }

    /// Values of one feature column
    pub fn attribute_values(&self, index: usize) -> Vec<&Cell> {
        self.x.iter().map(|r| &r[index]).collect()
    }

    /// Number of missing cells across the whole table
    pub fn missing_count(&self) -> usize {
        self.rows.iter().flatten().filter(|c| c.is_missing()).count()
    }

    /// A column is categorical when any of its values is a string
    pub fn is_categorical(&self, attribute_index: usize) -> bool {
        self.x.iter().any(|r| r[attribute_index].is_text())
    }

    /// Dense feature matrix; missing cells become NaN
    pub fn numeric_features(&self) -> Result<Array2<f64>> {
        let attributes = self.attributes();
        let width = attributes.len();
        let mut values = Vec::with_capacity(self.x.len() * width);
        for (row, cells) in self.x.iter().enumerate() {
            for (col, cell) in cells.iter().enumerate() {
                values.push(match cell {
                    Cell::Number(v) => *v,
                    Cell::Missing => f64::NAN,
                    Cell::Text(s) => {
                        return Err(ColtraneError::InvalidInput(format!(
                            "attribute '{}' is categorical (row {} holds '{}')",
                            attributes[col], row, s
                        )))
                    }
                });
            }
        }
        Array2::from_shape_vec((self.x.len(), width), values).map_err(|e| ColtraneError::Shape {
            expected: format!("{} x {} features", self.x.len(), width),
            actual: e.to_string(),
        })
    }

    /// Drop records holding a missing attribute or label value.
    ///
    /// Returns the number of dropped rows.
    pub fn drop_missing(&mut self) -> usize {
        let before = self.rows.len();
        self.rows.retain(|r| !r[1..].iter().any(Cell::is_missing));
        self.refresh();

        let dropped = before - self.rows.len();
        tracing::debug!("{}: dropped {} rows with missing values", self.name, dropped);
        dropped
    }

    /// Drop duplicate records.
    ///
    /// Records equal in features and label keep their first occurrence.
    /// Records equal in features but carrying different labels are
    /// contradictory and are all dropped. Returns the number of dropped rows.
    pub fn drop_duplicates(&mut self) -> usize {
        let before = self.rows.len();

        let mut seen: HashSet<Vec<CellKey>> = HashSet::new();
        self.rows.retain(|r| seen.insert(r[1..].iter().map(Cell::key).collect()));

        let last = self.header.len() - 1;
        let feature_key = |r: &Vec<Cell>| -> Vec<CellKey> { r[1..last].iter().map(Cell::key).collect() };

        let mut occurrences: HashMap<Vec<CellKey>, usize> = HashMap::new();
        for row in &self.rows {
            *occurrences.entry(feature_key(row)).or_insert(0) += 1;
        }
        self.rows.retain(|r| occurrences.get(&feature_key(r)).copied().unwrap_or(0) == 1);
        self.refresh();

        let dropped = before - self.rows.len();
        tracing::debug!("{}: dropped {} duplicate or contradictory rows", self.name, dropped);
        dropped
    }

    /// Descriptive statistics of every numerical attribute
    pub fn describe(&self) -> OrderedMap<Description> {
        let mut description = OrderedMap::new();

        for (idx, attribute) in self.attributes().iter().enumerate() {
            if self.is_categorical(idx) {
                continue;
            }
            let mut values: Vec<f64> = self.x.iter().filter_map(|r| r[idx].as_f64()).collect();
            if values.is_empty() {
                continue;
            }
            values.sort_by(|a, b| a.total_cmp(b));

            let n = values.len() as f64;
            let mean = values.iter().sum::<f64>() / n;
            let std = if values.len() > 1 {
                (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
            } else {
                f64::NAN
            };

            description.insert(
                attribute.clone(),
                Description {
                    count: values.len(),
                    mean,
                    std,
                    min: values[0],
                    p25: percentile(&values, 25.0),
                    p50: percentile(&values, 50.0),
                    p75: percentile(&values, 75.0),
                    max: values[values.len() - 1],
                },
            );
        }

        description
    }

    pub fn summary(&self) -> DatasetSummary {
        DatasetSummary {
            name: self.name.clone(),
            path: self
                .path
                .as_ref()
                .and_then(|p| p.file_name())
                .map(|f| f.to_string_lossy().to_string()),
            rows: self.len(),
            attributes: self.attributes().to_vec(),
        }
    }
}

/// All `*.csv` files of one directory
#[derive(Debug, Clone)]
pub struct DatasetCollection {
    dir: PathBuf,
    files: Vec<PathBuf>,
}

impl DatasetCollection {
    /// List the CSV files of a directory, sorted by file name
    pub fn scan(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let entries = std::fs::read_dir(dir).map_err(|e| ColtraneError::data_load(dir, e.to_string()))?;

        let mut files = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let is_csv = path
                .extension()
                .map(|ext| ext.eq_ignore_ascii_case("csv"))
                .unwrap_or(false);
            if path.is_file() && is_csv {
                files.push(path);
            }
        }

        if files.is_empty() {
            return Err(ColtraneError::EmptyInput { path: dir.to_path_buf() });
        }
        files.sort();

        tracing::info!("Found {} CSV files in {}", files.len(), dir.display());
        Ok(Self {
            dir: dir.to_path_buf(),
            files,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn files(&self) -> &[PathBuf] {
        &self.files
    }

    /// Load datasets one at a time
    pub fn datasets(&self) -> impl Iterator<Item = Result<Dataset>> + '_ {
        self.files.iter().map(Dataset::load)
    }

    pub fn load_all(&self) -> Result<Vec<Dataset>> {
        self.datasets().collect()
    }
}
