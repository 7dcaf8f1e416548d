// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Feature transformers and the label encoder

use crate::datasets::Cell;
use crate::error::{ColtraneError, Result};
use crate::pipeline::{check_samples, check_width, Transformer};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

fn fitted_state(fitted: bool, value: Value) -> Value {
    if fitted {
        value
    } else {
        Value::Null
    }
}

/// Per-column statistic over the non-NaN values of each column
fn column_stat(x: ArrayView2<f64>, stat: impl Fn(&[f64]) -> f64) -> Array1<f64> {
    x.axis_iter(Axis(1))
        .map(|col| {
            let present: Vec<f64> = col.iter().copied().filter(|v| !v.is_nan()).collect();
            stat(&present)
        })
        .collect()
}

fn mean_of(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().sum::<f64>() / values.len() as f64
    }
}

/// Z-score scaling: (x - mean) / std
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StandardScaler {
    mean: Array1<f64>,
    scale: Array1<f64>,
    fitted: bool,
}

impl StandardScaler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transformer for StandardScaler {
    fn name(&self) -> &str {
        "StandardScaler"
    }

    fn params(&self) -> Value {
        json!({})
    }

    fn state(&self) -> Value {
        fitted_state(self.fitted, json!({ "mean": self.mean.to_vec(), "scale": self.scale.to_vec() }))
    }

    fn fit(&mut self, x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<()> {
        check_samples(x, y)?;
        self.mean = column_stat(x, mean_of);
        self.scale = column_stat(x, |values| {
            let mean = mean_of(values);
            let n = values.len().max(1) as f64;
            let std = (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n).sqrt();
            // Constant columns are centred but not scaled
            if std == 0.0 {
                1.0
            } else {
                std
            }
        });
        self.fitted = true;
        Ok(())
    }

    fn transform(&self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        if !self.fitted {
            return Err(ColtraneError::NotFitted);
        }
        check_width(x, self.mean.len())?;
        Ok((&x - &self.mean) / &self.scale)
    }

    fn box_clone(&self) -> Box<dyn Transformer> {
        Box::new(self.clone())
    }
}

/// Min-max scaling into [0, 1]
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MinMaxScaler {
    min: Array1<f64>,
    range: Array1<f64>,
    fitted: bool,
}

impl MinMaxScaler {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transformer for MinMaxScaler {
    fn name(&self) -> &str {
        "MinMaxScaler"
    }

    fn params(&self) -> Value {
        json!({ "feature_range": [0.0, 1.0] })
    }

    fn state(&self) -> Value {
        fitted_state(self.fitted, json!({ "min": self.min.to_vec(), "range": self.range.to_vec() }))
    }

    fn fit(&mut self, x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<()> {
        check_samples(x, y)?;
        self.min = column_stat(x, |values| {
            let lo = values.iter().copied().fold(f64::INFINITY, f64::min);
            if lo.is_finite() {
                lo
            } else {
                0.0
            }
        });
        let max = column_stat(x, |values| values.iter().copied().fold(f64::NEG_INFINITY, f64::max));
        self.range = (&max - &self.min).mapv(|r| if r > 0.0 && r.is_finite() { r } else { 1.0 });
        self.fitted = true;
        Ok(())
    }

    fn transform(&self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        if !self.fitted {
            return Err(ColtraneError::NotFitted);
        }
        check_width(x, self.min.len())?;
        Ok((&x - &self.min) / &self.range)
    }

    fn box_clone(&self) -> Box<dyn Transformer> {
        Box::new(self.clone())
    }
}

/// Replaces NaN with the column mean seen during fitting
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MeanImputer {
    means: Array1<f64>,
    fitted: bool,
}

impl MeanImputer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Transformer for MeanImputer {
    fn name(&self) -> &str {
        "MeanImputer"
    }

    fn params(&self) -> Value {
        json!({ "strategy": "mean" })
    }

    fn state(&self) -> Value {
        fitted_state(self.fitted, json!({ "means": self.means.to_vec() }))
    }

    fn fit(&mut self, x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<()> {
        check_samples(x, y)?;
        self.means = column_stat(x, mean_of);
        self.fitted = true;
        Ok(())
    }

    fn transform(&self, x: ArrayView2<f64>) -> Result<Array2<f64>> {
        if !self.fitted {
            return Err(ColtraneError::NotFitted);
        }
        check_width(x, self.means.len())?;

        let mut out = x.to_owned();
        for (mut col, &mean) in out.axis_iter_mut(Axis(1)).zip(self.means.iter()) {
            col.mapv_inplace(|v| if v.is_nan() { mean } else { v });
        }
        Ok(out)
    }

    fn box_clone(&self) -> Box<dyn Transformer> {
        Box::new(self.clone())
    }
}

/// Maps label values to class ids 0..k
///
/// Classes are ordered numerically when every label is a number and
/// lexicographically otherwise.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LabelEncoder {
    classes: Vec<String>,
    fitted: bool,
}

impl LabelEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(&self) -> &str {
        "LabelEncoder"
    }

    pub fn fit(&mut self, labels: &[Cell]) -> Result<()> {
        if let Some(idx) = labels.iter().position(Cell::is_missing) {
            return Err(ColtraneError::InvalidInput(format!("label at row {} is missing", idx)));
        }

        let all_numeric = labels.iter().all(|c| c.as_f64().is_some());
        let mut classes: Vec<(Option<f64>, String)> = labels
            .iter()
            .map(|c| (c.as_f64(), c.to_string()))
            .collect();

        if all_numeric {
            classes.sort_by(|a, b| a.0.unwrap_or(0.0).total_cmp(&b.0.unwrap_or(0.0)));
        } else {
            classes.sort_by(|a, b| a.1.cmp(&b.1));
        }
        classes.dedup_by(|a, b| a.1 == b.1);

        self.classes = classes.into_iter().map(|(_, s)| s).collect();
        self.fitted = true;
        tracing::debug!("Label encoder fitted with {} classes", self.classes.len());
        Ok(())
    }

    pub fn transform(&self, labels: &[Cell]) -> Result<Vec<f64>> {
        if !self.fitted {
            return Err(ColtraneError::NotFitted);
        }
        labels
            .iter()
            .map(|label| {
                let key = label.to_string();
                self.classes
                    .iter()
                    .position(|c| *c == key)
                    .map(|i| i as f64)
                    .ok_or_else(|| ColtraneError::InvalidInput(format!("unseen label '{}'", key)))
            })
            .collect()
    }

    pub fn inverse_transform(&self, ids: &[f64]) -> Result<Vec<String>> {
        ids.iter()
            .map(|&id| {
                let idx = id.round();
                if idx < 0.0 {
                    return Err(ColtraneError::InvalidInput(format!("unknown class id {}", id)));
                }
                self.classes
                    .get(idx as usize)
                    .cloned()
                    .ok_or_else(|| ColtraneError::InvalidInput(format!("unknown class id {}", id)))
            })
            .collect()
    }

    pub fn classes(&self) -> &[String] {
        &self.classes
    }

    pub fn is_fitted(&self) -> bool {
        self.fitted
    }
}
