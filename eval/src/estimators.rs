// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Reference estimators
//!
//! Implements:
//! - Dummy classifier (most frequent or stratified-random class)
//! - Dummy regressor (training mean)
//! - Gaussian naive Bayes
//! - k-nearest neighbours classifier
//! - Linear regression with optional ridge penalty
//!
//! Classifiers work on class ids (labels rounded to integers) and predict
//! class ids back as `f64`.

use crate::error::{ColtraneError, Result};
use crate::pipeline::{check_prediction, check_training, Estimator};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2, Axis};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

fn class_of(label: f64) -> i64 {
    label.round() as i64
}

fn class_counts(y: ArrayView1<f64>) -> BTreeMap<i64, usize> {
    let mut counts = BTreeMap::new();
    for &label in y {
        *counts.entry(class_of(label)).or_insert(0) += 1;
    }
    counts
}

/// Most frequent class; ties go to the smallest id
fn majority(counts: &BTreeMap<i64, usize>) -> Option<i64> {
    counts
        .iter()
        .fold(None, |best: Option<(i64, usize)>, (&class, &count)| match best {
            Some((_, c)) if c >= count => best,
            _ => Some((class, count)),
        })
        .map(|(class, _)| class)
}

fn state_of(fitted: bool, value: Value) -> Value {
    if fitted {
        value
    } else {
        Value::Null
    }
}

fn rows_json(matrix: &Array2<f64>) -> Vec<Vec<f64>> {
    matrix.outer_iter().map(|row| row.to_vec()).collect()
}

/// Strategy used by [`DummyClassifier`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DummyStrategy {
    MostFrequent,
    Stratified { seed: u64 },
}

/// Baseline classifier ignoring the features
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DummyClassifier {
    strategy: DummyStrategy,
    classes: Vec<i64>,
    priors: Vec<f64>,
    majority: Option<i64>,
}

impl Default for DummyClassifier {
    fn default() -> Self {
        Self::with_strategy(DummyStrategy::MostFrequent)
    }
}

impl DummyClassifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_strategy(strategy: DummyStrategy) -> Self {
        Self {
            strategy,
            classes: Vec::new(),
            priors: Vec::new(),
            majority: None,
        }
    }

    fn draw(&self, rng: &mut ChaCha8Rng, fallback: i64) -> f64 {
        let draw: f64 = rng.gen();
        let mut cumulative = 0.0;
        for (class, prior) in self.classes.iter().zip(&self.priors) {
            cumulative += prior;
            if draw < cumulative {
                return *class as f64;
            }
        }
        fallback as f64
    }
}

impl Estimator for DummyClassifier {
    fn name(&self) -> &str {
        "DummyClassifier"
    }

    fn params(&self) -> Value {
        json!({ "strategy": self.strategy })
    }

    fn state(&self) -> Value {
        state_of(
            self.majority.is_some(),
            json!({ "classes": self.classes, "priors": self.priors, "majority": self.majority }),
        )
    }

    fn fit(&mut self, x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<()> {
        check_training(x, y)?;
        let counts = class_counts(y);
        let total = y.len() as f64;

        self.classes = counts.keys().copied().collect();
        self.priors = counts.values().map(|&c| c as f64 / total).collect();
        self.majority = majority(&counts);
        Ok(())
    }

    fn predict(&self, x: ArrayView2<f64>) -> Result<Array1<f64>> {
        let majority = self.majority.ok_or(ColtraneError::NotFitted)?;

        match self.strategy {
            DummyStrategy::MostFrequent => Ok(Array1::from_elem(x.nrows(), majority as f64)),
            DummyStrategy::Stratified { seed } => {
                let mut rng = ChaCha8Rng::seed_from_u64(seed);
                Ok((0..x.nrows()).map(|_| self.draw(&mut rng, majority)).collect())
            }
        }
    }

    fn box_clone(&self) -> Box<dyn Estimator> {
        Box::new(self.clone())
    }
}

/// Baseline regressor predicting the training mean
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DummyRegressor {
    mean: Option<f64>,
}

impl DummyRegressor {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Estimator for DummyRegressor {
    fn name(&self) -> &str {
        "DummyRegressor"
    }

    fn params(&self) -> Value {
        json!({ "strategy": "mean" })
    }

    fn state(&self) -> Value {
        state_of(self.mean.is_some(), json!({ "mean": self.mean }))
    }

    fn fit(&mut self, x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<()> {
        check_training(x, y)?;
        self.mean = y.mean();
        Ok(())
    }

    fn predict(&self, x: ArrayView2<f64>) -> Result<Array1<f64>> {
        let mean = self.mean.ok_or(ColtraneError::NotFitted)?;
        Ok(Array1::from_elem(x.nrows(), mean))
    }

    fn box_clone(&self) -> Box<dyn Estimator> {
        Box::new(self.clone())
    }
}

/// Gaussian naive Bayes classifier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GaussianNaiveBayes {
    var_smoothing: f64,
    classes: Vec<i64>,
    log_priors: Vec<f64>,
    /// One row per class
    means: Array2<f64>,
    variances: Array2<f64>,
}

impl Default for GaussianNaiveBayes {
    fn default() -> Self {
        Self::with_smoothing(1e-9)
    }
}

impl GaussianNaiveBayes {
    pub fn new() -> Self {
        Self::default()
    }

    /// Portion of the largest feature variance added to every variance
    pub fn with_smoothing(var_smoothing: f64) -> Self {
        Self {
            var_smoothing,
            classes: Vec::new(),
            log_priors: Vec::new(),
            means: Array2::zeros((0, 0)),
            variances: Array2::zeros((0, 0)),
        }
    }

    fn joint_log_likelihood(&self, row: ArrayView1<f64>, class_idx: usize) -> f64 {
        let means = self.means.row(class_idx);
        let variances = self.variances.row(class_idx);

        let log_likelihood: f64 = row
            .iter()
            .zip(means.iter().zip(variances.iter()))
            .map(|(v, (m, var))| {
                -0.5 * (2.0 * std::f64::consts::PI * var).ln() - (v - m).powi(2) / (2.0 * var)
            })
            .sum();

        self.log_priors[class_idx] + log_likelihood
    }
}

impl Estimator for GaussianNaiveBayes {
    fn name(&self) -> &str {
        "GaussianNaiveBayes"
    }

    fn params(&self) -> Value {
        json!({ "var_smoothing": self.var_smoothing })
    }

    fn state(&self) -> Value {
        state_of(
            !self.classes.is_empty(),
            json!({
                "classes": self.classes,
                "log_priors": self.log_priors,
                "means": rows_json(&self.means),
                "variances": rows_json(&self.variances),
            }),
        )
    }

    fn fit(&mut self, x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<()> {
        let width = check_training(x, y)?;
        let n = x.nrows() as f64;

        let max_variance = x.var_axis(Axis(0), 0.0).fold(0.0_f64, |m, &v| m.max(v));
        let epsilon = self.var_smoothing * max_variance;

        let counts = class_counts(y);
        self.classes = counts.keys().copied().collect();
        self.log_priors = counts.values().map(|&c| (c as f64 / n).ln()).collect();
        self.means = Array2::zeros((self.classes.len(), width));
        self.variances = Array2::zeros((self.classes.len(), width));

        for (idx, &class) in self.classes.iter().enumerate() {
            let members: Vec<usize> = y
                .iter()
                .enumerate()
                .filter(|(_, &label)| class_of(label) == class)
                .map(|(row, _)| row)
                .collect();
            let rows = x.select(Axis(0), &members);

            // Every class has at least one member, so the means exist
            if let Some(means) = rows.mean_axis(Axis(0)) {
                self.means.row_mut(idx).assign(&means);
            }
            // Floor keeps log densities finite for constant features
            let variances = rows.var_axis(Axis(0), 0.0).mapv(|v| (v + epsilon).max(f64::MIN_POSITIVE));
            self.variances.row_mut(idx).assign(&variances);
        }

        Ok(())
    }

    fn predict(&self, x: ArrayView2<f64>) -> Result<Array1<f64>> {
        if self.classes.is_empty() {
            return Err(ColtraneError::NotFitted);
        }
        check_prediction(x, self.means.ncols())?;

        Ok(x.outer_iter()
            .map(|row| {
                let mut best = 0;
                let mut best_score = f64::NEG_INFINITY;
                for idx in 0..self.classes.len() {
                    let score = self.joint_log_likelihood(row, idx);
                    if score > best_score {
                        best = idx;
                        best_score = score;
                    }
                }
                self.classes[best] as f64
            })
            .collect())
    }

    fn box_clone(&self) -> Box<dyn Estimator> {
        Box::new(self.clone())
    }
}

/// k-nearest neighbours classifier with uniform weights and euclidean distance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KNeighborsClassifier {
    n_neighbors: usize,
    #[serde(skip)]
    train_x: Array2<f64>,
    #[serde(skip)]
    train_y: Vec<i64>,
}

impl Default for KNeighborsClassifier {
    fn default() -> Self {
        Self::new(5)
    }
}

impl KNeighborsClassifier {
    pub fn new(n_neighbors: usize) -> Self {
        Self {
            n_neighbors: n_neighbors.max(1),
            train_x: Array2::zeros((0, 0)),
            train_y: Vec::new(),
        }
    }

    fn vote(&self, row: ArrayView1<f64>) -> i64 {
        let mut distances: Vec<(f64, usize)> = self
            .train_x
            .outer_iter()
            .enumerate()
            .map(|(idx, train)| {
                let diff = &train - &row;
                (diff.dot(&diff), idx)
            })
            .collect();
        distances.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));

        let mut votes = BTreeMap::new();
        for &(_, idx) in distances.iter().take(self.n_neighbors) {
            *votes.entry(self.train_y[idx]).or_insert(0usize) += 1;
        }
        majority(&votes).unwrap_or(0)
    }
}

impl Estimator for KNeighborsClassifier {
    fn name(&self) -> &str {
        "KNeighborsClassifier"
    }

    fn params(&self) -> Value {
        json!({ "n_neighbors": self.n_neighbors, "weights": "uniform", "metric": "euclidean" })
    }

    fn state(&self) -> Value {
        state_of(!self.train_y.is_empty(), json!({ "n_samples_fit": self.train_y.len() }))
    }

    fn fit(&mut self, x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<()> {
        check_training(x, y)?;
        if x.nrows() < self.n_neighbors {
            return Err(ColtraneError::InvalidInput(format!(
                "n_neighbors = {} exceeds {} training samples",
                self.n_neighbors,
                x.nrows()
            )));
        }
        self.train_x = x.to_owned();
        self.train_y = y.iter().map(|&v| class_of(v)).collect();
        Ok(())
    }

    fn predict(&self, x: ArrayView2<f64>) -> Result<Array1<f64>> {
        if self.train_y.is_empty() {
            return Err(ColtraneError::NotFitted);
        }
        check_prediction(x, self.train_x.ncols())?;
        Ok(x.outer_iter().map(|row| self.vote(row) as f64).collect())
    }

    fn box_clone(&self) -> Box<dyn Estimator> {
        Box::new(self.clone())
    }
}

/// Ordinary least squares, or ridge regression when `alpha > 0`
///
/// Solved through the normal equations on centred data, so the intercept
/// is never penalised.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinearRegression {
    alpha: f64,
    coefficients: Array1<f64>,
    intercept: Option<f64>,
}

impl Default for LinearRegression {
    fn default() -> Self {
        Self::ridge(0.0)
    }
}

impl LinearRegression {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn ridge(alpha: f64) -> Self {
        Self {
            alpha: alpha.max(0.0),
            coefficients: Array1::zeros(0),
            intercept: None,
        }
    }

    pub fn coefficients(&self) -> ArrayView1<f64> {
        self.coefficients.view()
    }

    pub fn intercept(&self) -> Option<f64> {
        self.intercept
    }
}

/// Solve the symmetric positive-definite system `a · w = b` by Cholesky
/// decomposition; `None` when `a` is numerically singular
fn cholesky_solve(a: &Array2<f64>, b: &Array1<f64>) -> Option<Array1<f64>> {
    let n = a.nrows();
    let tolerance = 1e-12 * a.diag().iter().fold(f64::MIN_POSITIVE, |m, v| m.max(v.abs()));

    let mut l = Array2::<f64>::zeros((n, n));
    for i in 0..n {
        for j in 0..=i {
            let sum: f64 = (0..j).map(|k| l[[i, k]] * l[[j, k]]).sum();
            if i == j {
                let diag = a[[i, i]] - sum;
                if diag <= tolerance {
                    return None;
                }
                l[[i, i]] = diag.sqrt();
            } else {
                l[[i, j]] = (a[[i, j]] - sum) / l[[j, j]];
            }
        }
    }

    // L z = b, then Lᵀ w = z
    let mut z = Array1::<f64>::zeros(n);
    for i in 0..n {
        let sum: f64 = (0..i).map(|k| l[[i, k]] * z[k]).sum();
        z[i] = (b[i] - sum) / l[[i, i]];
    }
    let mut w = Array1::<f64>::zeros(n);
    for i in (0..n).rev() {
        let sum: f64 = (i + 1..n).map(|k| l[[k, i]] * w[k]).sum();
        w[i] = (z[i] - sum) / l[[i, i]];
    }
    Some(w)
}

impl Estimator for LinearRegression {
    fn name(&self) -> &str {
        "LinearRegression"
    }

    fn params(&self) -> Value {
        json!({ "alpha": self.alpha, "fit_intercept": true })
    }

    fn state(&self) -> Value {
        state_of(
            self.intercept.is_some(),
            json!({ "coefficients": self.coefficients.to_vec(), "intercept": self.intercept }),
        )
    }

    fn fit(&mut self, x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<()> {
        check_training(x, y)?;

        let x_mean = x
            .mean_axis(Axis(0))
            .ok_or_else(|| ColtraneError::InvalidInput("cannot fit on zero samples".to_string()))?;
        let y_mean = y.mean().unwrap_or(0.0);

        let x_centred = &x - &x_mean;
        let y_centred = y.mapv(|v| v - y_mean);

        let mut gram = x_centred.t().dot(&x_centred);
        gram.diag_mut().mapv_inplace(|d| d + self.alpha);
        let moment = x_centred.t().dot(&y_centred);

        let coefficients = cholesky_solve(&gram, &moment).ok_or_else(|| {
            ColtraneError::Computation("singular design matrix, consider a ridge penalty".to_string())
        })?;

        self.intercept = Some(y_mean - coefficients.dot(&x_mean));
        self.coefficients = coefficients;
        Ok(())
    }

    fn predict(&self, x: ArrayView2<f64>) -> Result<Array1<f64>> {
        let intercept = self.intercept.ok_or(ColtraneError::NotFitted)?;
        check_prediction(x, self.coefficients.len())?;
        Ok(x.dot(&self.coefficients) + intercept)
    }

    fn box_clone(&self) -> Box<dyn Estimator> {
        Box::new(self.clone())
    }
}

/// Names accepted by [`estimator_by_name`]
pub const ESTIMATOR_NAMES: &[&str] = &["dummy", "stratified", "dummy-regressor", "naive-bayes", "knn", "linear", "ridge"];

/// Construct an estimator from its command-line name
pub fn estimator_by_name(name: &str, seed: u64) -> Result<Box<dyn Estimator>> {
    let estimator: Box<dyn Estimator> = match name {
        "dummy" => Box::new(DummyClassifier::new()),
        "stratified" => Box::new(DummyClassifier::with_strategy(DummyStrategy::Stratified { seed })),
        "dummy-regressor" => Box::new(DummyRegressor::new()),
        "naive-bayes" | "nb" => Box::new(GaussianNaiveBayes::new()),
        "knn" => Box::new(KNeighborsClassifier::default()),
        "linear" => Box::new(LinearRegression::new()),
        "ridge" => Box::new(LinearRegression::ridge(1.0)),
        other => {
            return Err(ColtraneError::InvalidInput(format!(
                "unknown model '{}', expected one of {:?}",
                other, ESTIMATOR_NAMES
            )))
        }
    };
    Ok(estimator)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::{array, s};

    fn two_blobs() -> (Array2<f64>, Array1<f64>) {
        let x = array![
            [0.0, 0.1],
            [0.2, 0.0],
            [0.1, 0.3],
            [3.0, 3.1],
            [3.2, 2.9],
            [2.9, 3.0],
            [3.1, 3.3]
        ];
        let y = array![0.0, 0.0, 0.0, 1.0, 1.0, 1.0, 1.0];
        (x, y)
    }

    #[test]
    fn test_dummy_classifier_majority() {
        let (x, y) = two_blobs();
        let mut model = DummyClassifier::new();
        assert!(model.predict(x.view()).is_err());

        model.fit(x.view(), y.view()).unwrap();
        assert_eq!(model.predict(x.slice(s![..2, ..])).unwrap(), array![1.0, 1.0]);
    }

    #[test]
    fn test_majority_tie_prefers_smallest_class() {
        let mut counts = BTreeMap::new();
        counts.insert(2, 3);
        counts.insert(0, 3);
        counts.insert(1, 1);
        assert_eq!(majority(&counts), Some(0));
    }

    #[test]
    fn test_stratified_dummy_is_seeded() {
        let (x, y) = two_blobs();
        let mut a = DummyClassifier::with_strategy(DummyStrategy::Stratified { seed: 7 });
        let mut b = a.clone();
        a.fit(x.view(), y.view()).unwrap();
        b.fit(x.view(), y.view()).unwrap();

        let pa = a.predict(x.view()).unwrap();
        assert_eq!(pa, b.predict(x.view()).unwrap());
        assert!(pa.iter().all(|&p| p == 0.0 || p == 1.0));
    }

    #[test]
    fn test_dummy_regressor() {
        let x = array![[1.0], [2.0], [3.0]];
        let mut model = DummyRegressor::new();
        model.fit(x.view(), array![1.0, 2.0, 6.0].view()).unwrap();
        assert_eq!(model.predict(x.slice(s![..1, ..])).unwrap(), array![3.0]);
    }

    #[test]
    fn test_gaussian_naive_bayes() {
        let (x, y) = two_blobs();
        let mut model = GaussianNaiveBayes::new();
        model.fit(x.view(), y.view()).unwrap();

        assert_eq!(model.predict(x.view()).unwrap(), y);
        assert_eq!(
            model.predict(array![[0.05, 0.05], [3.05, 3.0]].view()).unwrap(),
            array![0.0, 1.0]
        );
        assert!(model.predict(array![[1.0]].view()).is_err());
        assert_eq!(model.state()["means"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_naive_bayes_constant_feature() {
        let x = array![[1.0, 0.0], [1.0, 0.2], [1.0, 5.0], [1.0, 5.2]];
        let y = array![0.0, 0.0, 1.0, 1.0];
        let mut model = GaussianNaiveBayes::new();
        model.fit(x.view(), y.view()).unwrap();
        assert_eq!(model.predict(x.view()).unwrap(), y);
    }

    #[test]
    fn test_knn() {
        let (x, y) = two_blobs();
        let mut model = KNeighborsClassifier::new(3);
        model.fit(x.view(), y.view()).unwrap();
        assert_eq!(
            model.predict(array![[0.1, 0.1], [3.0, 3.0]].view()).unwrap(),
            array![0.0, 1.0]
        );

        let mut too_many = KNeighborsClassifier::new(50);
        assert!(too_many.fit(x.view(), y.view()).is_err());
    }

    #[test]
    fn test_linear_regression_recovers_line() {
        let x = Array2::from_shape_fn((10, 2), |(i, j)| {
            if j == 0 {
                i as f64
            } else {
                ((i * i) % 7) as f64
            }
        });
        let y = x.map_axis(Axis(1), |r| 3.0 + 2.0 * r[0] - 0.5 * r[1]);

        let mut model = LinearRegression::new();
        model.fit(x.view(), y.view()).unwrap();

        assert_abs_diff_eq!(model.coefficients()[0], 2.0, epsilon = 1e-8);
        assert_abs_diff_eq!(model.coefficients()[1], -0.5, epsilon = 1e-8);
        assert_abs_diff_eq!(model.intercept().unwrap(), 3.0, epsilon = 1e-8);

        let predictions = model.predict(x.view()).unwrap();
        for (p, t) in predictions.iter().zip(y.iter()) {
            assert_abs_diff_eq!(*p, *t, epsilon = 1e-8);
        }
    }

    #[test]
    fn test_linear_regression_singular() {
        let x = Array2::from_shape_fn((5, 2), |(i, j)| (i * (j + 1)) as f64);
        let y = Array1::from_shape_fn(5, |i| i as f64);

        let mut ols = LinearRegression::new();
        assert!(matches!(ols.fit(x.view(), y.view()), Err(ColtraneError::Computation(_))));

        let mut ridge = LinearRegression::ridge(0.1);
        assert!(ridge.fit(x.view(), y.view()).is_ok());
    }

    #[test]
    fn test_estimators_reject_missing_features() {
        let (mut x, y) = two_blobs();
        x[[2, 1]] = f64::NAN;

        let mut ols = LinearRegression::new();
        assert!(matches!(ols.fit(x.view(), y.view()), Err(ColtraneError::InvalidInput(_))));

        let (clean, _) = two_blobs();
        let mut nb = GaussianNaiveBayes::new();
        nb.fit(clean.view(), y.view()).unwrap();
        assert!(matches!(nb.predict(x.view()), Err(ColtraneError::InvalidInput(_))));
    }

    #[test]
    fn test_estimator_by_name() {
        assert_eq!(estimator_by_name("knn", 0).unwrap().name(), "KNeighborsClassifier");
        assert!(estimator_by_name("svm", 0).is_err());
    }
}
