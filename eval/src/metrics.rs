// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Evaluation metrics and scorers
//!
//! Implements:
//! - Multi-class confusion matrix
//! - Accuracy, balanced accuracy, precision, recall, F1 (binary/macro/micro/weighted)
//! - MSE, RMSE, MAE and R² for regression
//! - `Scorer`: a named metric with its parameters, resolved once up front
//!
//! Class labels travel as `f64` class ids (the output of a label encoder or a
//! numeric label column) and are compared after rounding.

use crate::aggregate::OrderedMap;
use crate::error::{ColtraneError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

/// Scores of one split, keyed by scorer name in scorer order
pub type ScoreMap = OrderedMap<f64>;

fn class_id(value: f64) -> i64 {
    value.round() as i64
}

fn check_lengths(y_true: &[f64], y_pred: &[f64]) -> Result<()> {
    if y_true.is_empty() {
        return Err(ColtraneError::InvalidInput("cannot score an empty prediction".to_string()));
    }
    if y_true.len() != y_pred.len() {
        return Err(ColtraneError::Shape {
            expected: format!("{} predictions", y_true.len()),
            actual: format!("{} predictions", y_pred.len()),
        });
    }
    Ok(())
}

/// Confusion matrix over the union of true and predicted classes
///
/// Rows are true classes, columns predicted classes, both in ascending order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub labels: Vec<i64>,
    pub matrix: Vec<Vec<usize>>,
}

impl ConfusionMatrix {
    /// Create from ground truth and predictions
    pub fn from_predictions(y_true: &[f64], y_pred: &[f64]) -> Result<Self> {
        check_lengths(y_true, y_pred)?;

        let labels: BTreeSet<i64> = y_true.iter().chain(y_pred).map(|&v| class_id(v)).collect();
        let labels: Vec<i64> = labels.into_iter().collect();
        Self::with_labels(y_true, y_pred, labels)
    }

    /// Create with an explicit class list; samples outside it are ignored
    pub fn with_labels(y_true: &[f64], y_pred: &[f64], labels: Vec<i64>) -> Result<Self> {
        check_lengths(y_true, y_pred)?;

        let k = labels.len();
        let mut matrix = vec![vec![0usize; k]; k];
        for (&t, &p) in y_true.iter().zip(y_pred) {
            let row = labels.iter().position(|&l| l == class_id(t));
            let col = labels.iter().position(|&l| l == class_id(p));
            if let (Some(row), Some(col)) = (row, col) {
                matrix[row][col] += 1;
            }
        }

        Ok(Self { labels, matrix })
    }

    /// Total number of samples
    pub fn total(&self) -> usize {
        self.matrix.iter().flatten().sum()
    }

    fn correct(&self) -> usize {
        (0..self.labels.len()).map(|i| self.matrix[i][i]).sum()
    }

    /// Number of true samples of class `i`
    pub fn support(&self, i: usize) -> usize {
        self.matrix[i].iter().sum()
    }

    fn predicted(&self, i: usize) -> usize {
        self.matrix.iter().map(|row| row[i]).sum()
    }

    /// Accuracy: correct / total
    pub fn accuracy(&self) -> f64 {
        let total = self.total();
        if total == 0 {
            return 0.0;
        }
        self.correct() as f64 / total as f64
    }

    /// Precision of class `i`: TP / (TP + FP)
    pub fn precision(&self, i: usize) -> f64 {
        ratio(self.matrix[i][i], self.predicted(i))
    }

    /// Recall of class `i`: TP / (TP + FN)
    pub fn recall(&self, i: usize) -> f64 {
        ratio(self.matrix[i][i], self.support(i))
    }

    /// F1 of class `i`
    pub fn f1_score(&self, i: usize) -> f64 {
        harmonic(self.precision(i), self.recall(i))
    }

    /// Mean recall over classes present in the ground truth
    pub fn balanced_accuracy(&self) -> f64 {
        let present: Vec<usize> = (0..self.labels.len()).filter(|&i| self.support(i) > 0).collect();
        if present.is_empty() {
            return 0.0;
        }
        present.iter().map(|&i| self.recall(i)).sum::<f64>() / present.len() as f64
    }

    /// Matrix as floats, for averaging across splits
    pub fn to_f64(&self) -> Vec<Vec<f64>> {
        self.matrix
            .iter()
            .map(|row| row.iter().map(|&c| c as f64).collect())
            .collect()
    }
}

fn ratio(num: usize, denom: usize) -> f64 {
    if denom == 0 {
        return 0.0;
    }
    num as f64 / denom as f64
}

fn harmonic(precision: f64, recall: f64) -> f64 {
    let denom = precision + recall;
    if denom == 0.0 {
        return 0.0;
    }
    2.0 * precision * recall / denom
}

/// How per-class scores are combined
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Average {
    /// Score of the positive class (id 1); two classes only
    Binary,
    /// Unweighted mean over classes
    Macro,
    /// Global counts
    Micro,
    /// Mean weighted by class support
    Weighted,
}

impl Average {
    pub fn as_str(&self) -> &'static str {
        match self {
            Average::Binary => "binary",
            Average::Macro => "macro",
            Average::Micro => "micro",
            Average::Weighted => "weighted",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "binary" => Ok(Average::Binary),
            "macro" => Ok(Average::Macro),
            "micro" => Ok(Average::Micro),
            "weighted" => Ok(Average::Weighted),
            other => Err(ColtraneError::InvalidInput(format!("unknown average '{}'", other))),
        }
    }
}

#[derive(Clone, Copy)]
enum ClassScore {
    Precision,
    Recall,
    F1,
}

fn averaged(y_true: &[f64], y_pred: &[f64], average: Average, score: ClassScore) -> Result<f64> {
    let cm = ConfusionMatrix::from_predictions(y_true, y_pred)?;
    let per_class = |i: usize| match score {
        ClassScore::Precision => cm.precision(i),
        ClassScore::Recall => cm.recall(i),
        ClassScore::F1 => cm.f1_score(i),
    };

    match average {
        Average::Binary => {
            if cm.labels.len() > 2 {
                return Err(ColtraneError::InvalidInput(format!(
                    "target is multiclass ({} classes) but average is 'binary'",
                    cm.labels.len()
                )));
            }
            match cm.labels.iter().position(|&l| l == 1) {
                Some(i) => Ok(per_class(i)),
                None if cm.labels.len() < 2 => Ok(0.0),
                None => Err(ColtraneError::InvalidInput(format!(
                    "positive class 1 is not among labels {:?}",
                    cm.labels
                ))),
            }
        }
        Average::Macro => {
            let k = cm.labels.len();
            Ok((0..k).map(per_class).sum::<f64>() / k as f64)
        }
        // Single-label micro precision, recall and F1 all equal accuracy
        Average::Micro => Ok(cm.accuracy()),
        Average::Weighted => {
            let total = cm.total() as f64;
            Ok((0..cm.labels.len())
                .map(|i| per_class(i) * cm.support(i) as f64 / total)
                .sum())
        }
    }
}

pub fn accuracy(y_true: &[f64], y_pred: &[f64]) -> Result<f64> {
    Ok(ConfusionMatrix::from_predictions(y_true, y_pred)?.accuracy())
}

pub fn balanced_accuracy(y_true: &[f64], y_pred: &[f64]) -> Result<f64> {
    Ok(ConfusionMatrix::from_predictions(y_true, y_pred)?.balanced_accuracy())
}

pub fn precision(y_true: &[f64], y_pred: &[f64], average: Average) -> Result<f64> {
    averaged(y_true, y_pred, average, ClassScore::Precision)
}

pub fn recall(y_true: &[f64], y_pred: &[f64], average: Average) -> Result<f64> {
    averaged(y_true, y_pred, average, ClassScore::Recall)
}

pub fn f1_score(y_true: &[f64], y_pred: &[f64], average: Average) -> Result<f64> {
    averaged(y_true, y_pred, average, ClassScore::F1)
}

pub fn mean_squared_error(y_true: &[f64], y_pred: &[f64]) -> Result<f64> {
    check_lengths(y_true, y_pred)?;
    let sum: f64 = y_true.iter().zip(y_pred).map(|(t, p)| (t - p).powi(2)).sum();
    Ok(sum / y_true.len() as f64)
}

pub fn mean_absolute_error(y_true: &[f64], y_pred: &[f64]) -> Result<f64> {
    check_lengths(y_true, y_pred)?;
    let sum: f64 = y_true.iter().zip(y_pred).map(|(t, p)| (t - p).abs()).sum();
    Ok(sum / y_true.len() as f64)
}

/// Coefficient of determination
///
/// Constant ground truth scores 1.0 for a perfect prediction and 0.0 otherwise.
pub fn r2_score(y_true: &[f64], y_pred: &[f64]) -> Result<f64> {
    check_lengths(y_true, y_pred)?;
    let mean = y_true.iter().sum::<f64>() / y_true.len() as f64;
    let residual: f64 = y_true.iter().zip(y_pred).map(|(t, p)| (t - p).powi(2)).sum();
    let total: f64 = y_true.iter().map(|t| (t - mean).powi(2)).sum();

    if total == 0.0 {
        return Ok(if residual == 0.0 { 1.0 } else { 0.0 });
    }
    Ok(1.0 - residual / total)
}

/// Per-class precision, recall, F1 and support
#[derive(Debug, Clone, Serialize)]
pub struct ClassMetrics {
    pub precision: f64,
    pub recall: f64,
    pub f1_score: f64,
    pub support: usize,
}

/// Confusion matrix with per-class metrics, logged per split
#[derive(Debug, Clone, Serialize)]
pub struct ClassificationReport {
    pub confusion_matrix: ConfusionMatrix,
    pub accuracy: f64,
    pub balanced_accuracy: f64,
    pub per_class: OrderedMap<ClassMetrics>,
}

impl ClassificationReport {
    pub fn from_confusion_matrix(cm: ConfusionMatrix) -> Self {
        let per_class = cm
            .labels
            .iter()
            .enumerate()
            .map(|(i, label)| {
                (
                    label.to_string(),
                    ClassMetrics {
                        precision: cm.precision(i),
                        recall: cm.recall(i),
                        f1_score: cm.f1_score(i),
                        support: cm.support(i),
                    },
                )
            })
            .collect();

        Self {
            accuracy: cm.accuracy(),
            balanced_accuracy: cm.balanced_accuracy(),
            per_class,
            confusion_matrix: cm,
        }
    }

    pub fn from_predictions(y_true: &[f64], y_pred: &[f64]) -> Result<Self> {
        Ok(Self::from_confusion_matrix(ConfusionMatrix::from_predictions(y_true, y_pred)?))
    }

    /// Format as a human-readable string
    pub fn format(&self) -> String {
        let mut out = String::new();
        out.push_str("Classification Report\n=====================\n");
        out.push_str(&format!("Accuracy:          {:.4}\n", self.accuracy));
        out.push_str(&format!("Balanced Accuracy: {:.4}\n\n", self.balanced_accuracy));
        out.push_str(&format!("{:<10} {:>9} {:>9} {:>9} {:>8}\n", "class", "precision", "recall", "f1", "support"));
        for (label, m) in self.per_class.iter() {
            out.push_str(&format!(
                "{:<10} {:>9.4} {:>9.4} {:>9.4} {:>8}\n",
                label, m.precision, m.recall, m.f1_score, m.support
            ));
        }
        out
    }
}

/// User-supplied scoring function over (y_true, y_pred)
pub type ScoreFn = Arc<dyn Fn(&[f64], &[f64]) -> Result<f64> + Send + Sync>;

/// The function a scorer applies, with its parameters already resolved
#[derive(Clone)]
pub enum Metric {
    Accuracy,
    BalancedAccuracy,
    Precision(Average),
    Recall(Average),
    F1(Average),
    MeanSquaredError,
    RootMeanSquaredError,
    MeanAbsoluteError,
    R2,
    Custom(ScoreFn),
}

impl Metric {
    pub fn function_name(&self) -> &'static str {
        match self {
            Metric::Accuracy => "accuracy",
            Metric::BalancedAccuracy => "balanced_accuracy",
            Metric::Precision(_) => "precision",
            Metric::Recall(_) => "recall",
            Metric::F1(_) => "f1",
            Metric::MeanSquaredError => "mean_squared_error",
            Metric::RootMeanSquaredError => "root_mean_squared_error",
            Metric::MeanAbsoluteError => "mean_absolute_error",
            Metric::R2 => "r2",
            Metric::Custom(_) => "custom",
        }
    }

    fn apply(&self, y_true: &[f64], y_pred: &[f64]) -> Result<f64> {
        match self {
            Metric::Accuracy => accuracy(y_true, y_pred),
            Metric::BalancedAccuracy => balanced_accuracy(y_true, y_pred),
            Metric::Precision(avg) => precision(y_true, y_pred, *avg),
            Metric::Recall(avg) => recall(y_true, y_pred, *avg),
            Metric::F1(avg) => f1_score(y_true, y_pred, *avg),
            Metric::MeanSquaredError => mean_squared_error(y_true, y_pred),
            Metric::RootMeanSquaredError => mean_squared_error(y_true, y_pred).map(f64::sqrt),
            Metric::MeanAbsoluteError => mean_absolute_error(y_true, y_pred),
            Metric::R2 => r2_score(y_true, y_pred),
            Metric::Custom(f) => f(y_true, y_pred),
        }
    }
}

impl fmt::Debug for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Metric::Precision(avg) | Metric::Recall(avg) | Metric::F1(avg) => {
                write!(f, "{}({})", self.function_name(), avg.as_str())
            }
            _ => write!(f, "{}", self.function_name()),
        }
    }
}

/// A named scoring function with its parameter map
#[derive(Debug, Clone)]
pub struct Scorer {
    name: String,
    metric: Metric,
    params: Map<String, Value>,
}

impl Scorer {
    fn builtin(metric: Metric) -> Self {
        let mut params = Map::new();
        let mut name = metric.function_name().to_string();
        if let Metric::Precision(avg) | Metric::Recall(avg) | Metric::F1(avg) = &metric {
            params.insert("average".to_string(), json!(avg.as_str()));
            if *avg != Average::Binary {
                name = format!("{}_{}", name, avg.as_str());
            }
        }
        Self { name, metric, params }
    }

    pub fn accuracy() -> Self {
        Self::builtin(Metric::Accuracy)
    }

    pub fn balanced_accuracy() -> Self {
        Self::builtin(Metric::BalancedAccuracy)
    }

    pub fn precision(average: Average) -> Self {
        Self::builtin(Metric::Precision(average))
    }

    pub fn recall(average: Average) -> Self {
        Self::builtin(Metric::Recall(average))
    }

    pub fn f1(average: Average) -> Self {
        Self::builtin(Metric::F1(average))
    }

    pub fn mean_squared_error() -> Self {
        Self::builtin(Metric::MeanSquaredError)
    }

    pub fn root_mean_squared_error() -> Self {
        Self::builtin(Metric::RootMeanSquaredError)
    }

    pub fn mean_absolute_error() -> Self {
        Self::builtin(Metric::MeanAbsoluteError)
    }

    pub fn r2() -> Self {
        Self::builtin(Metric::R2)
    }

    /// Wrap an arbitrary scoring function
    pub fn custom<F>(name: impl Into<String>, params: Map<String, Value>, f: F) -> Self
    where
        F: Fn(&[f64], &[f64]) -> Result<f64> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            metric: Metric::Custom(Arc::new(f)),
            params,
        }
    }

    /// Resolve a builtin scorer from its function name and parameters.
    ///
    /// Unknown names and parameters are rejected here, not at scoring time.
    pub fn from_name(function: &str, params: &Map<String, Value>) -> Result<Self> {
        let average = || -> Result<Average> {
            match params.get("average") {
                None => Ok(Average::Binary),
                Some(Value::String(s)) => Average::parse(s),
                Some(other) => Err(ColtraneError::InvalidInput(format!("average must be a string, got {}", other))),
            }
        };

        const NONE: &[&str] = &[];
        const AVERAGE: &[&str] = &["average"];

        let (metric, accepted) = match function {
            "accuracy" => (Metric::Accuracy, NONE),
            "balanced_accuracy" => (Metric::BalancedAccuracy, NONE),
            "precision" => (Metric::Precision(average()?), AVERAGE),
            "recall" => (Metric::Recall(average()?), AVERAGE),
            "f1" => (Metric::F1(average()?), AVERAGE),
            "mse" | "mean_squared_error" => (Metric::MeanSquaredError, NONE),
            "rmse" | "root_mean_squared_error" => (Metric::RootMeanSquaredError, NONE),
            "mae" | "mean_absolute_error" => (Metric::MeanAbsoluteError, NONE),
            "r2" => (Metric::R2, NONE),
            other => return Err(ColtraneError::InvalidInput(format!("unknown scorer '{}'", other))),
        };

        if let Some(unknown) = params.keys().find(|k| !accepted.contains(&k.as_str())) {
            return Err(ColtraneError::InvalidInput(format!(
                "scorer '{}' does not accept parameter '{}'",
                function, unknown
            )));
        }

        Ok(Self::builtin(metric))
    }

    /// Rename the scorer; names key the score maps
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn metric(&self) -> &Metric {
        &self.metric
    }

    pub fn params(&self) -> &Map<String, Value> {
        &self.params
    }

    pub fn score(&self, y_true: &[f64], y_pred: &[f64]) -> Result<f64> {
        self.metric.apply(y_true, y_pred)
    }

    /// Serializable description for batch summaries
    pub fn describe(&self) -> Value {
        json!({
            "name": self.name,
            "function": self.metric.function_name(),
            "params": self.params,
        })
    }
}

/// Apply every scorer, in order, to one split's predictions
pub fn evaluate(scorers: &[Scorer], y_true: &[f64], y_pred: &[f64]) -> Result<ScoreMap> {
    let mut scores = ScoreMap::new();
    for scorer in scorers {
        scores.insert(scorer.name(), scorer.score(y_true, y_pred)?);
    }
    Ok(scores)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    #[test]
    fn test_confusion_matrix_perfect() {
        let y = vec![0.0, 1.0, 2.0, 1.0];
        let cm = ConfusionMatrix::from_predictions(&y, &y).unwrap();

        assert_eq!(cm.labels, vec![0, 1, 2]);
        assert_eq!(cm.total(), 4);
        assert_abs_diff_eq!(cm.accuracy(), 1.0);
        assert_eq!(cm.matrix[1][1], 2);
    }

    #[test]
    fn test_confusion_matrix_multiclass() {
        let y_true = vec![0.0, 0.0, 1.0, 1.0, 2.0, 2.0];
        let y_pred = vec![0.0, 1.0, 1.0, 1.0, 2.0, 0.0];
        let cm = ConfusionMatrix::from_predictions(&y_true, &y_pred).unwrap();

        assert_eq!(cm.matrix, vec![vec![1, 1, 0], vec![0, 2, 0], vec![1, 0, 1]]);
        assert_abs_diff_eq!(cm.precision(1), 2.0 / 3.0, epsilon = 1e-12);
        assert_abs_diff_eq!(cm.recall(2), 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(cm.accuracy(), 4.0 / 6.0, epsilon = 1e-12);
    }

    #[test]
    fn test_averages() {
        let y_true = vec![0.0, 0.0, 1.0, 1.0, 2.0, 2.0];
        let y_pred = vec![0.0, 1.0, 1.0, 1.0, 2.0, 0.0];

        // per-class precision: 1/2, 2/3, 1
        let macro_p = precision(&y_true, &y_pred, Average::Macro).unwrap();
        assert_abs_diff_eq!(macro_p, (0.5 + 2.0 / 3.0 + 1.0) / 3.0, epsilon = 1e-12);

        let micro_f1 = f1_score(&y_true, &y_pred, Average::Micro).unwrap();
        assert_abs_diff_eq!(micro_f1, 4.0 / 6.0, epsilon = 1e-12);

        // per-class recall: 1/2, 1, 1/2 with equal support
        let weighted_r = recall(&y_true, &y_pred, Average::Weighted).unwrap();
        assert_abs_diff_eq!(weighted_r, 2.0 / 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_binary_average_rejects_multiclass() {
        let y_true = vec![0.0, 1.0, 2.0];
        let err = precision(&y_true, &y_true, Average::Binary).unwrap_err();
        assert!(matches!(err, ColtraneError::InvalidInput(_)));
    }

    #[test]
    fn test_binary_average_scores_positive_class() {
        let y_true = vec![1.0, 1.0, 0.0, 0.0];
        let y_pred = vec![1.0, 0.0, 1.0, 0.0];
        assert_abs_diff_eq!(precision(&y_true, &y_pred, Average::Binary).unwrap(), 0.5);
        assert_abs_diff_eq!(recall(&y_true, &y_pred, Average::Binary).unwrap(), 0.5);
    }

    #[test]
    fn test_zero_division_is_zero() {
        let y_true = vec![0.0, 0.0];
        let y_pred = vec![1.0, 1.0];
        assert_eq!(precision(&y_true, &y_pred, Average::Binary).unwrap(), 0.0);
    }

    #[test]
    fn test_regression_metrics() {
        let y_true = vec![3.0, -0.5, 2.0, 7.0];
        let y_pred = vec![2.5, 0.0, 2.0, 8.0];

        assert_abs_diff_eq!(mean_squared_error(&y_true, &y_pred).unwrap(), 0.375, epsilon = 1e-12);
        assert_abs_diff_eq!(mean_absolute_error(&y_true, &y_pred).unwrap(), 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(r2_score(&y_true, &y_pred).unwrap(), 0.948_608_137, epsilon = 1e-6);
    }

    #[test]
    fn test_r2_constant_truth() {
        let y = vec![2.0, 2.0];
        assert_eq!(r2_score(&y, &y).unwrap(), 1.0);
        assert_eq!(r2_score(&y, &[1.0, 2.0]).unwrap(), 0.0);
    }

    #[test]
    fn test_length_mismatch() {
        assert!(accuracy(&[1.0], &[1.0, 0.0]).is_err());
        assert!(accuracy(&[], &[]).is_err());
    }

    #[test]
    fn test_scorer_from_name() {
        let mut params = Map::new();
        params.insert("average".to_string(), json!("macro"));

        let scorer = Scorer::from_name("f1", &params).unwrap();
        assert_eq!(scorer.name(), "f1_macro");
        assert_eq!(scorer.params().get("average"), Some(&json!("macro")));

        assert!(Scorer::from_name("accuracy", &params).is_err());
        assert!(Scorer::from_name("nonsense", &Map::new()).is_err());

        let mut bad = Map::new();
        bad.insert("average".to_string(), json!("sideways"));
        assert!(Scorer::from_name("recall", &bad).is_err());
    }

    #[test]
    fn test_evaluate_keeps_scorer_order() {
        let scorers = vec![
            Scorer::recall(Average::Macro),
            Scorer::accuracy(),
            Scorer::custom("always_one", Map::new(), |_, _| Ok(1.0)),
        ];
        let y = vec![0.0, 1.0, 1.0];

        let scores = evaluate(&scorers, &y, &y).unwrap();
        let keys: Vec<&str> = scores.keys().collect();
        assert_eq!(keys, vec!["recall_macro", "accuracy", "always_one"]);
        assert_eq!(scores.get("always_one"), Some(&1.0));
    }

    #[test]
    fn test_classification_report_format() {
        let report = ClassificationReport::from_predictions(&[0.0, 1.0, 1.0], &[0.0, 1.0, 0.0]).unwrap();
        let formatted = report.format();

        assert!(formatted.contains("Classification Report"));
        assert!(formatted.contains("Accuracy"));
        assert_eq!(report.per_class.len(), 2);
    }
}
