// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Model pipelines
//!
//! A pipeline is an ordered list of named steps: zero or more transformers
//! followed by exactly one estimator. Cloning a pipeline deep-copies every
//! step, which is how cross-validation folds get independent model state.

use crate::error::{ColtraneError, Result};
use ndarray::{Array1, Array2, ArrayView1, ArrayView2};
use serde_json::{json, Value};
use std::fmt;

/// A fitted data transformation (scaling, imputation, ...)
pub trait Transformer: Send + Sync + fmt::Debug {
    /// Step type name, used in logs
    fn name(&self) -> &str;

    /// Hyper-parameters
    fn params(&self) -> Value;

    /// Fitted parameters (null before fitting)
    fn state(&self) -> Value;

    fn fit(&mut self, x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<()>;

    fn transform(&self, x: ArrayView2<f64>) -> Result<Array2<f64>>;

    fn box_clone(&self) -> Box<dyn Transformer>;
}

/// A model that learns from features and predicts targets
pub trait Estimator: Send + Sync + fmt::Debug {
    /// Step type name, used in logs
    fn name(&self) -> &str;

    /// Hyper-parameters
    fn params(&self) -> Value;

    /// Fitted parameters (null before fitting)
    fn state(&self) -> Value;

    fn fit(&mut self, x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<()>;

    fn predict(&self, x: ArrayView2<f64>) -> Result<Array1<f64>>;

    fn box_clone(&self) -> Box<dyn Estimator>;
}

/// One pipeline step
#[derive(Debug)]
pub enum Step {
    Transform(Box<dyn Transformer>),
    Estimate(Box<dyn Estimator>),
}

impl Step {
    pub fn transform(t: impl Transformer + 'static) -> Self {
        Step::Transform(Box::new(t))
    }

    pub fn estimator(e: impl Estimator + 'static) -> Self {
        Step::Estimate(Box::new(e))
    }

    pub fn type_name(&self) -> &str {
        match self {
            Step::Transform(t) => t.name(),
            Step::Estimate(e) => e.name(),
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            Step::Transform(_) => "transformer",
            Step::Estimate(_) => "estimator",
        }
    }

    fn params(&self) -> Value {
        match self {
            Step::Transform(t) => t.params(),
            Step::Estimate(e) => e.params(),
        }
    }

    fn state(&self) -> Value {
        match self {
            Step::Transform(t) => t.state(),
            Step::Estimate(e) => e.state(),
        }
    }
}

impl Clone for Step {
    fn clone(&self) -> Self {
        match self {
            Step::Transform(t) => Step::Transform(t.box_clone()),
            Step::Estimate(e) => Step::Estimate(e.box_clone()),
        }
    }
}

/// Ordered transform steps ending in one estimator
#[derive(Debug, Clone)]
pub struct Pipeline {
    steps: Vec<(String, Step)>,
}

impl Pipeline {
    /// Validate and assemble a pipeline
    pub fn new(steps: Vec<(String, Step)>) -> Result<Self> {
        if steps.is_empty() {
            return Err(ColtraneError::InvalidBatch("pipeline has no steps".to_string()));
        }

        let last = steps.len() - 1;
        for (idx, (name, step)) in steps.iter().enumerate() {
            match (idx == last, step) {
                (true, Step::Transform(_)) => {
                    return Err(ColtraneError::InvalidBatch(format!(
                        "last pipeline step '{}' must be an estimator",
                        name
                    )))
                }
                (false, Step::Estimate(_)) => {
                    return Err(ColtraneError::InvalidBatch(format!(
                        "intermediate pipeline step '{}' must be a transformer",
                        name
                    )))
                }
                _ => {}
            }
            if steps[..idx].iter().any(|(other, _)| other == name) {
                return Err(ColtraneError::InvalidBatch(format!("duplicate step name '{}'", name)));
            }
        }

        Ok(Self { steps })
    }

    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    pub fn steps(&self) -> &[(String, Step)] {
        &self.steps
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Fit every step in order, feeding each transformer's output forward
    pub fn fit(&mut self, x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<()> {
        if x.nrows() != y.len() {
            return Err(ColtraneError::Shape {
                expected: format!("{} targets", x.nrows()),
                actual: format!("{} targets", y.len()),
            });
        }

        let mut current: Option<Array2<f64>> = None;
        for (_, step) in self.steps.iter_mut() {
            let input = current.as_ref().map_or(x.view(), |m| m.view());
            match step {
                Step::Transform(t) => {
                    t.fit(input, y)?;
                    let out = t.transform(input)?;
                    current = Some(out);
                }
                Step::Estimate(e) => e.fit(input, y)?,
            }
        }
        Ok(())
    }

    pub fn predict(&self, x: ArrayView2<f64>) -> Result<Array1<f64>> {
        let mut current: Option<Array2<f64>> = None;
        for (_, step) in &self.steps {
            let input = current.as_ref().map_or(x.view(), |m| m.view());
            match step {
                Step::Transform(t) => current = Some(t.transform(input)?),
                Step::Estimate(e) => return e.predict(input),
            }
        }
        // Pipeline::new guarantees a final estimator
        Err(ColtraneError::InvalidBatch("pipeline has no estimator".to_string()))
    }

    /// Step names, types and hyper-parameters
    pub fn describe(&self) -> Value {
        Value::Array(
            self.steps
                .iter()
                .map(|(name, step)| {
                    json!({
                        "name": name,
                        "kind": step.kind(),
                        "step": step.type_name(),
                        "params": step.params(),
                    })
                })
                .collect(),
        )
    }

    /// Description plus fitted state of every step
    pub fn snapshot(&self) -> Value {
        Value::Array(
            self.steps
                .iter()
                .map(|(name, step)| {
                    json!({
                        "name": name,
                        "step": step.type_name(),
                        "params": step.params(),
                        "state": step.state(),
                    })
                })
                .collect(),
        )
    }
}

/// Fluent construction of a [`Pipeline`]
#[derive(Debug, Default)]
pub struct PipelineBuilder {
    steps: Vec<(String, Step)>,
}

impl PipelineBuilder {
    pub fn transform(mut self, name: impl Into<String>, t: impl Transformer + 'static) -> Self {
        self.steps.push((name.into(), Step::transform(t)));
        self
    }

    pub fn estimator(mut self, name: impl Into<String>, e: impl Estimator + 'static) -> Self {
        self.steps.push((name.into(), Step::estimator(e)));
        self
    }

    pub fn build(self) -> Result<Pipeline> {
        Pipeline::new(self.steps)
    }
}

/// Reject matrices without `n_features` columns
pub(crate) fn check_width(x: ArrayView2<f64>, n_features: usize) -> Result<()> {
    if x.ncols() != n_features {
        return Err(ColtraneError::Shape {
            expected: format!("{} features", n_features),
            actual: format!("{} features", x.ncols()),
        });
    }
    Ok(())
}

/// Reject empty training sets and mismatched targets, returning the feature count
///
/// Missing values (NaN) pass; transformers such as imputers consume them.
pub(crate) fn check_samples(x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<usize> {
    if x.nrows() == 0 {
        return Err(ColtraneError::InvalidInput("cannot fit on zero samples".to_string()));
    }
    if x.nrows() != y.len() {
        return Err(ColtraneError::Shape {
            expected: format!("{} targets", x.nrows()),
            actual: format!("{} targets", y.len()),
        });
    }
    Ok(x.ncols())
}

/// Reject non-finite feature values
pub(crate) fn check_finite(x: ArrayView2<f64>) -> Result<()> {
    match x.indexed_iter().find(|(_, v)| !v.is_finite()) {
        Some(((row, col), v)) => Err(ColtraneError::InvalidInput(format!(
            "feature {} of sample {} is {}, impute or drop missing values first",
            col, row, v
        ))),
        None => Ok(()),
    }
}

/// Estimator training checks: [`check_samples`] plus finite features and targets
pub(crate) fn check_training(x: ArrayView2<f64>, y: ArrayView1<f64>) -> Result<usize> {
    let width = check_samples(x, y)?;
    check_finite(x)?;
    if let Some(idx) = y.iter().position(|v| !v.is_finite()) {
        return Err(ColtraneError::InvalidInput(format!("target of sample {} is not finite", idx)));
    }
    Ok(width)
}

/// Estimator prediction checks: column count and finite features
pub(crate) fn check_prediction(x: ArrayView2<f64>, n_features: usize) -> Result<()> {
    check_width(x, n_features)?;
    check_finite(x)
}
