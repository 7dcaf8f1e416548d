// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Dataset inspection
//!
//! Computes record and attribute counts, class balance, descriptive
//! statistics and correlation matrices of a dataset, then hands the result
//! to the run logger.

use crate::aggregate::{balance, Balance, OrderedMap};
use crate::config::InspectionConfig;
use crate::datasets::{Cell, Dataset, Description};
use crate::domain::Domain;
use crate::error::Result;
use crate::logging::RunLogger;
use crate::plot::{Chart, ChartRenderer, SvgRenderer};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;

/// Correlation coefficient family
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CorrelationMethod {
    Pearson,
    Kendall,
    Spearman,
}

impl CorrelationMethod {
    pub const ALL: [CorrelationMethod; 3] = [Self::Pearson, Self::Kendall, Self::Spearman];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pearson => "pearson",
            Self::Kendall => "kendall",
            Self::Spearman => "spearman",
        }
    }

    fn coefficient(&self, a: &[f64], b: &[f64]) -> f64 {
        match self {
            Self::Pearson => pearson(a, b),
            Self::Kendall => kendall_tau_b(a, b),
            Self::Spearman => pearson(&average_ranks(a), &average_ranks(b)),
        }
    }
}

/// Square correlation matrix over named columns; NaN where undefined
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CorrelationMatrix {
    pub labels: Vec<String>,
    pub matrix: Vec<Vec<f64>>,
}

impl CorrelationMatrix {
    /// Correlations over the numeric columns, using pairwise-complete rows
    pub fn compute(columns: &[(String, Vec<Option<f64>>)], method: CorrelationMethod) -> Self {
        let n = columns.len();
        let mut matrix = vec![vec![f64::NAN; n]; n];

        for i in 0..n {
            for j in i..n {
                let (a, b): (Vec<f64>, Vec<f64>) = columns[i]
                    .1
                    .iter()
                    .zip(&columns[j].1)
                    .filter_map(|(x, y)| Some(((*x)?, (*y)?)))
                    .unzip();
                let value = method.coefficient(&a, &b);
                matrix[i][j] = value;
                matrix[j][i] = value;
            }
        }

        Self {
            labels: columns.iter().map(|(name, _)| name.clone()).collect(),
            matrix,
        }
    }

    pub fn get(&self, a: &str, b: &str) -> Option<f64> {
        let i = self.labels.iter().position(|l| l == a)?;
        let j = self.labels.iter().position(|l| l == b)?;
        Some(self.matrix[i][j])
    }
}

pub fn pearson(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    if n < 2 {
        return f64::NAN;
    }
    let mean_a = a[..n].iter().sum::<f64>() / n as f64;
    let mean_b = b[..n].iter().sum::<f64>() / n as f64;

    let (mut cov, mut var_a, mut var_b) = (0.0, 0.0, 0.0);
    for (x, y) in a.iter().zip(b) {
        let (dx, dy) = (x - mean_a, y - mean_b);
        cov += dx * dy;
        var_a += dx * dx;
        var_b += dy * dy;
    }

    if var_a == 0.0 || var_b == 0.0 {
        return f64::NAN;
    }
    (cov / (var_a.sqrt() * var_b.sqrt())).clamp(-1.0, 1.0)
}

/// 1-based ranks, ties share their average rank
pub fn average_ranks(values: &[f64]) -> Vec<f64> {
    let mut order: Vec<usize> = (0..values.len()).collect();
    order.sort_by(|&i, &j| values[i].total_cmp(&values[j]));

    let mut ranks = vec![0.0; values.len()];
    let mut start = 0;
    while start < order.len() {
        let mut end = start + 1;
        while end < order.len() && values[order[end]] == values[order[start]] {
            end += 1;
        }
        let rank = (start + end + 1) as f64 / 2.0;
        for &idx in &order[start..end] {
            ranks[idx] = rank;
        }
        start = end;
    }
    ranks
}

/// Kendall's tau-b, accounting for ties in either variable
pub fn kendall_tau_b(a: &[f64], b: &[f64]) -> f64 {
    let n = a.len().min(b.len());
    if n < 2 {
        return f64::NAN;
    }

    let (mut concordant, mut discordant) = (0i64, 0i64);
    let (mut only_a_tied, mut only_b_tied) = (0i64, 0i64);
    for i in 0..n {
        for j in i + 1..n {
            let da = a[i] - a[j];
            let db = b[i] - b[j];
            match (da == 0.0, db == 0.0) {
                (true, true) => {}
                (true, false) => only_a_tied += 1,
                (false, true) => only_b_tied += 1,
                (false, false) if (da > 0.0) == (db > 0.0) => concordant += 1,
                (false, false) => discordant += 1,
            }
        }
    }

    let untied_a = (concordant + discordant + only_b_tied) as f64;
    let untied_b = (concordant + discordant + only_a_tied) as f64;
    if untied_a == 0.0 || untied_b == 0.0 {
        return f64::NAN;
    }
    (concordant - discordant) as f64 / (untied_a * untied_b).sqrt()
}

#[derive(Debug, Clone, Serialize)]
pub struct Records {
    pub count: usize,
    pub missing_values: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct Attributes {
    pub count: usize,
    pub categorical: Vec<String>,
    pub numerical: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Correlations {
    pub pearson: CorrelationMatrix,
    pub kendall: CorrelationMatrix,
    pub spearman: CorrelationMatrix,
}

impl Correlations {
    fn by_method(&self) -> [(CorrelationMethod, &CorrelationMatrix); 3] {
        [
            (CorrelationMethod::Pearson, &self.pearson),
            (CorrelationMethod::Kendall, &self.kendall),
            (CorrelationMethod::Spearman, &self.spearman),
        ]
    }
}

/// Structured result of inspecting one dataset
#[derive(Debug, Clone, Serialize)]
pub struct Inspection {
    pub dataset: String,
    pub records: Records,
    pub attributes: Attributes,
    pub balance: Balance,
    pub correlations: Correlations,
    pub description: OrderedMap<Description>,
    /// Domain-specific findings
    pub post: Value,
}

/// Numeric columns of the attribute and label table
fn numeric_columns(dataset: &Dataset) -> Vec<(String, Vec<Option<f64>>)> {
    dataset
        .xy_columns()
        .into_iter()
        .filter(|(_, cells)| !cells.iter().any(Cell::is_text))
        .map(|(name, cells)| (name, cells.iter().map(Cell::as_f64).collect()))
        .collect()
}

pub struct Inspector {
    domain: Box<dyn Domain>,
    config: InspectionConfig,
    renderer: Arc<dyn ChartRenderer>,
}

impl Inspector {
    pub fn new(domain: impl Domain + 'static, config: InspectionConfig) -> Self {
        Self {
            domain: Box::new(domain),
            config,
            renderer: Arc::new(SvgRenderer::default()),
        }
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn ChartRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    /// Compute the inspection without touching the filesystem
    pub fn inspect(&self, dataset: &Dataset) -> Inspection {
        let (categorical, numerical): (Vec<(usize, &String)>, Vec<(usize, &String)>) = dataset
            .attributes()
            .iter()
            .enumerate()
            .partition(|(idx, _)| dataset.is_categorical(*idx));
        let names = |list: Vec<(usize, &String)>| -> Vec<String> { list.into_iter().map(|(_, n)| n.clone()).collect() };

        let columns = numeric_columns(dataset);
        let labels = dataset.label_strings();

        Inspection {
            dataset: dataset.name().to_string(),
            records: Records {
                count: dataset.len(),
                missing_values: dataset.missing_count(),
            },
            attributes: Attributes {
                count: dataset.attributes().len(),
                categorical: names(categorical),
                numerical: names(numerical),
            },
            balance: balance(labels.iter().map(String::as_str)),
            correlations: Correlations {
                pearson: CorrelationMatrix::compute(&columns, CorrelationMethod::Pearson),
                kendall: CorrelationMatrix::compute(&columns, CorrelationMethod::Kendall),
                spearman: CorrelationMatrix::compute(&columns, CorrelationMethod::Spearman),
            },
            description: dataset.describe(),
            post: self.domain.on_inspect(dataset),
        }
    }

    /// Inspect and write `<output>/<dataset>/inspection/`
    pub fn inspect_and_log(&self, dataset: &Dataset) -> Result<Inspection> {
        let inspection = self.inspect(dataset);
        let renderer = self.config.render_charts.then(|| self.renderer.clone());
        let logger = RunLogger::create(
            self.config.output_dir.join(dataset.name()).join("inspection"),
            renderer,
        )?;

        logger.save_json("summary", &inspection)?;
        logger.save_json("description", &inspection.description)?;
        for (method, matrix) in inspection.correlations.by_method() {
            let name = format!("correlation-{}", method.as_str());
            logger.save_json(&name, matrix)?;
            logger.save_chart(
                &name,
                &Chart::Heatmap {
                    title: format!("{} {} correlation", dataset.name(), method.as_str()),
                    labels: matrix.labels.clone(),
                    values: matrix.matrix.clone(),
                },
            )?;
        }
        for (name, chart) in self.domain.inspect_charts(dataset) {
            logger.save_chart(&name, &chart)?;
        }

        tracing::info!(
            "Inspected {}: {} records, {} attributes ({} categorical), {} missing values",
            inspection.dataset,
            inspection.records.count,
            inspection.attributes.count,
            inspection.attributes.categorical.len(),
            inspection.records.missing_values
        );
        Ok(inspection)
    }

    pub fn inspect_all(&self, datasets: &[Dataset]) -> Result<Vec<Inspection>> {
        datasets.iter().map(|d| self.inspect_and_log(d)).collect()
    }
}
