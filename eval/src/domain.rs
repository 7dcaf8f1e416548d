// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Task-specific hooks for processing and inspection
//!
//! The processor and inspector are task agnostic. Whatever depends on the
//! kind of target (class confusion, residuals, class balance) lives behind
//! the [`Domain`] strategy.

use crate::aggregate::{aggregate, average_matrices, balance, OrderedMap};
use crate::datasets::Dataset;
use crate::error::Result;
use crate::metrics::{ClassificationReport, ConfusionMatrix};
use crate::plot::Chart;
use crate::processing::{BatchResult, SplitResult};
use serde_json::{json, Value};
use std::collections::BTreeSet;

pub trait Domain: Send + Sync {
    fn name(&self) -> &str;

    /// Extra per-split document, written as `post.json`
    fn on_split_complete(&self, split: &SplitResult) -> Result<Option<Value>>;

    /// Extra batch-level document, written as `post.json`
    fn on_batch_complete(&self, result: &BatchResult) -> Result<Option<Value>>;

    /// Named charts written next to the batch summary
    fn batch_charts(&self, _result: &BatchResult) -> Vec<(String, Chart)> {
        Vec::new()
    }

    /// Target-specific part of a dataset inspection
    fn on_inspect(&self, dataset: &Dataset) -> Value;

    fn inspect_charts(&self, dataset: &Dataset) -> Vec<(String, Chart)>;
}

/// Class-label targets
#[derive(Debug, Clone, Copy, Default)]
pub struct Classification;

impl Classification {
    fn class_ids(result: &BatchResult) -> Vec<i64> {
        let ids: BTreeSet<i64> = result
            .splits()
            .iter()
            .flat_map(|s| s.y_true.iter().chain(&s.y_pred))
            .map(|v| v.round() as i64)
            .collect();
        ids.into_iter().collect()
    }

    fn class_name(result: &BatchResult, id: i64) -> String {
        usize::try_from(id)
            .ok()
            .and_then(|idx| result.classes().and_then(|c| c.get(idx)))
            .cloned()
            .unwrap_or_else(|| id.to_string())
    }

    fn averaged_confusion(result: &BatchResult) -> Result<(Vec<String>, Vec<Vec<f64>>)> {
        let ids = Self::class_ids(result);
        let matrices = result
            .splits()
            .iter()
            .map(|s| ConfusionMatrix::with_labels(&s.y_true, &s.y_pred, ids.clone()).map(|cm| cm.to_f64()))
            .collect::<Result<Vec<_>>>()?;
        let names = ids.iter().map(|&id| Self::class_name(result, id)).collect();
        Ok((names, average_matrices(&matrices)?))
    }
}

impl Domain for Classification {
    fn name(&self) -> &str {
        "classification"
    }

    fn on_split_complete(&self, split: &SplitResult) -> Result<Option<Value>> {
        let report = ClassificationReport::from_predictions(&split.y_true, &split.y_pred)?;
        Ok(Some(serde_json::to_value(report)?))
    }

    fn on_batch_complete(&self, result: &BatchResult) -> Result<Option<Value>> {
        if result.is_empty() {
            return Ok(None);
        }
        let (labels, matrix) = Self::averaged_confusion(result)?;

        let y_true: Vec<f64> = result.splits().iter().flat_map(|s| s.y_true.iter().copied()).collect();
        let y_pred: Vec<f64> = result.splits().iter().flat_map(|s| s.y_pred.iter().copied()).collect();
        let pooled = ClassificationReport::from_predictions(&y_true, &y_pred)?;

        Ok(Some(json!({
            "labels": labels,
            "average_confusion_matrix": matrix,
            "pooled": pooled,
        })))
    }

    fn batch_charts(&self, result: &BatchResult) -> Vec<(String, Chart)> {
        let Ok((labels, matrix)) = Self::averaged_confusion(result) else {
            return Vec::new();
        };
        let normalised = matrix
            .into_iter()
            .map(|row| {
                let total: f64 = row.iter().sum();
                row.into_iter()
                    .map(|v| if total > 0.0 { v / total } else { 0.0 })
                    .collect()
            })
            .collect();

        vec![(
            "confusion".to_string(),
            Chart::Heatmap {
                title: "Averaged confusion matrix (row share)".to_string(),
                labels,
                values: normalised,
            },
        )]
    }

    fn on_inspect(&self, dataset: &Dataset) -> Value {
        let labels = dataset.label_strings();
        json!({ "balance": balance(labels.iter().map(String::as_str)) })
    }

    fn inspect_charts(&self, dataset: &Dataset) -> Vec<(String, Chart)> {
        let labels = dataset.label_strings();
        let counts = balance(labels.iter().map(String::as_str)).counts;
        let mut charts = vec![(
            "balance".to_string(),
            Chart::Bars {
                title: format!("{} class balance", dataset.name()),
                labels: counts.keys().map(str::to_string).collect(),
                values: counts.values().map(|&c| c as f64).collect(),
            },
        )];

        for (idx, attribute) in dataset.attributes().iter().enumerate() {
            if dataset.is_categorical(idx) {
                continue;
            }
            let mut by_label: OrderedMap<Vec<f64>> = counts.keys().map(|l| (l, Vec::new())).collect();
            for (label, cell) in labels.iter().zip(dataset.attribute_values(idx)) {
                if let (Some(values), Some(v)) = (by_label.get_mut(label), cell.as_f64()) {
                    values.push(v);
                }
            }
            charts.push((
                format!("features_distribution_{}", file_stem(attribute)),
                Chart::BoxPlot {
                    title: format!("{} {} by {}", dataset.name(), attribute, dataset.label_name()),
                    series: by_label.iter().map(|(l, v)| (l.to_string(), v.clone())).collect(),
                },
            ));
        }
        charts
    }
}

/// Column name made safe for a file name
fn file_stem(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect()
}

/// Continuous targets
#[derive(Debug, Clone, Copy, Default)]
pub struct Regression;

const HISTOGRAM_BINS: usize = 20;

fn residuals(split: &SplitResult) -> impl Iterator<Item = f64> + '_ {
    split.y_pred.iter().zip(&split.y_true).map(|(p, t)| p - t)
}

fn numeric_targets(dataset: &Dataset) -> Vec<f64> {
    dataset.y().iter().filter_map(|c| c.as_f64()).collect()
}

impl Domain for Regression {
    fn name(&self) -> &str {
        "regression"
    }

    fn on_split_complete(&self, split: &SplitResult) -> Result<Option<Value>> {
        let values: Vec<f64> = residuals(split).collect();
        Ok(Some(json!({ "residuals": aggregate(&values) })))
    }

    fn on_batch_complete(&self, result: &BatchResult) -> Result<Option<Value>> {
        let values: Vec<f64> = result.splits().iter().flat_map(residuals).collect();
        Ok(Some(json!({ "residuals": aggregate(&values) })))
    }

    fn batch_charts(&self, result: &BatchResult) -> Vec<(String, Chart)> {
        vec![(
            "residuals".to_string(),
            Chart::Histogram {
                title: format!("{} residuals", result.dataset()),
                values: result.splits().iter().flat_map(residuals).collect(),
                bins: HISTOGRAM_BINS,
            },
        )]
    }

    fn on_inspect(&self, dataset: &Dataset) -> Value {
        json!({ "target": aggregate(&numeric_targets(dataset)) })
    }

    fn inspect_charts(&self, dataset: &Dataset) -> Vec<(String, Chart)> {
        vec![(
            "target".to_string(),
            Chart::Histogram {
                title: format!("{} {}", dataset.name(), dataset.label_name()),
                values: numeric_targets(dataset),
                bins: HISTOGRAM_BINS,
            },
        )]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasets::Cell;
    use crate::estimators::DummyClassifier;
    use crate::metrics::ScoreMap;
    use crate::pipeline::Pipeline;
    use crate::processing::Performance;
    use crate::testing::{iris_like, linear_like};

    fn split(index: usize, y_true: Vec<f64>, y_pred: Vec<f64>) -> SplitResult {
        SplitResult {
            index,
            scores: ScoreMap::new(),
            pipeline: Pipeline::builder().estimator("dummy", DummyClassifier::new()).build().unwrap(),
            performance: Performance {
                fit_seconds: 0.0,
                predict_seconds: 0.0,
                predict_record_seconds: 0.0,
            },
            train_size: 0,
            test_size: y_true.len(),
            y_true,
            y_pred,
        }
    }

    #[test]
    fn test_averaged_confusion_aligns_classes() {
        // Class 2 only appears in the second split
        let result = BatchResult::new(
            "abc",
            "toy",
            Some(vec!["a".into(), "b".into(), "c".into()]),
            vec![
                split(0, vec![0.0, 1.0], vec![0.0, 1.0]),
                split(1, vec![0.0, 2.0], vec![0.0, 1.0]),
            ],
        );

        let post = Classification.on_batch_complete(&result).unwrap().unwrap();
        assert_eq!(post["labels"], json!(["a", "b", "c"]));
        assert_eq!(
            post["average_confusion_matrix"],
            json!([[1.0, 0.0, 0.0], [0.0, 0.5, 0.0], [0.0, 0.5, 0.0]])
        );
        assert_eq!(post["pooled"]["confusion_matrix"]["matrix"][2][1], 1);
    }

    #[test]
    fn test_split_report() {
        let post = Classification
            .on_split_complete(&split(0, vec![0.0, 1.0, 1.0], vec![0.0, 1.0, 0.0]))
            .unwrap()
            .unwrap();
        assert_eq!(post["confusion_matrix"]["matrix"], json!([[1, 0], [1, 1]]));
    }

    #[test]
    fn test_regression_residuals() {
        let result = BatchResult::new(
            "abc",
            "toy",
            None,
            vec![split(0, vec![1.0, 2.0], vec![1.5, 1.0]), split(1, vec![0.0], vec![0.5])],
        );
        let post = Regression.on_batch_complete(&result).unwrap().unwrap();
        assert_eq!(post["residuals"]["min"], -1.0);
        assert_eq!(post["residuals"]["max"], 0.5);

        let charts = Regression.batch_charts(&result);
        assert_eq!(charts[0].0, "residuals");
    }

    #[test]
    fn test_inspect_hooks() {
        let iris = iris_like(0);
        let value = Classification.on_inspect(&iris);
        assert_eq!(value["balance"]["counts"]["setosa"], 50);
        let names: Vec<String> = Classification.inspect_charts(&iris).into_iter().map(|(n, _)| n).collect();
        assert_eq!(
            names,
            [
                "balance",
                "features_distribution_sepal_length",
                "features_distribution_sepal_width",
                "features_distribution_petal_length",
                "features_distribution_petal_width",
            ]
        );

        let linear = linear_like(0);
        let value = Regression.on_inspect(&linear);
        assert!(value["target"]["mean"].is_number());
    }

    #[test]
    fn test_features_distribution_groups_by_label() {
        let header = ["id", "size", "colour", "kind"].map(String::from).to_vec();
        let rows = vec![
            vec![Cell::Number(0.0), Cell::Number(1.0), Cell::Text("red".into()), Cell::Text("a".into())],
            vec![Cell::Number(1.0), Cell::Missing, Cell::Text("red".into()), Cell::Text("b".into())],
            vec![Cell::Number(2.0), Cell::Number(3.0), Cell::Text("blue".into()), Cell::Text("a".into())],
            vec![Cell::Number(3.0), Cell::Number(4.0), Cell::Text("blue".into()), Cell::Text("b".into())],
        ];
        let dataset = Dataset::from_rows("toy", header, rows).unwrap();

        let charts = Classification.inspect_charts(&dataset);
        assert_eq!(charts.len(), 2);
        let (name, chart) = &charts[1];
        assert_eq!(name, "features_distribution_size");
        match chart {
            Chart::BoxPlot { series, .. } => {
                assert_eq!(series[0], ("a".to_string(), vec![1.0, 3.0]));
                assert_eq!(series[1], ("b".to_string(), vec![4.0]));
            }
            other => panic!("unexpected chart {:?}", other),
        }
    }
}
