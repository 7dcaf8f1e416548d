// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Cross-validation research harness
//!
//! This crate provides:
//! - Tabular CSV datasets with cleaning and descriptive statistics
//! - Model pipelines of transformers and a final estimator
//! - Cross-validation splitters (k-fold, repeated, stratified, shuffle, leave-one-out)
//! - Named scorers resolved once per batch
//! - A fold evaluation loop, sequential or on a worker pool
//! - Aggregated per-batch logs, domain hooks and charts
//! - Dataset inspection with correlation matrices

pub mod aggregate;
pub mod batch;
pub mod config;
pub mod datasets;
pub mod domain;
pub mod error;
pub mod estimators;
pub mod inspection;
pub mod logging;
pub mod metrics;
pub mod pipeline;
pub mod plot;
pub mod preprocessing;
pub mod processing;
pub mod split;

#[cfg(test)]
mod testing;

pub use aggregate::{aggregate, group_by_key, OrderedMap, Percentiles, Summary};
pub use batch::{Batch, BatchBuilder};
pub use config::{InspectionConfig, ProcessorConfig};
pub use datasets::{Cell, Dataset, DatasetCollection};
pub use domain::{Classification, Domain, Regression};
pub use error::{ColtraneError, Result};
pub use inspection::{CorrelationMethod, Inspection, Inspector};
pub use metrics::{Average, ClassificationReport, ConfusionMatrix, ScoreMap, Scorer};
pub use pipeline::{Estimator, Pipeline, Step, Transformer};
pub use plot::{Chart, ChartRenderer, SvgRenderer};
pub use processing::{evaluate, BatchReport, BatchResult, Performance, Processor, SplitResult};
pub use split::{Fold, KFold, LeaveOneOut, RepeatedKFold, ShuffleSplit, Splitter, StratifiedKFold};
