// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Error types for the evaluation harness

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias used across the crate
pub type Result<T> = std::result::Result<T, ColtraneError>;

#[derive(Error, Debug)]
pub enum ColtraneError {
    /// Malformed or unreadable input table
    #[error("failed to load data from {path}: {reason}")]
    DataLoad { path: PathBuf, reason: String },

    /// Directory scan found nothing to load
    #[error("directory {path} contains no `.csv` files")]
    EmptyInput { path: PathBuf },

    /// Fit, predict or score failed inside one cross-validation fold
    #[error("fold {fold} failed: {source}")]
    FoldExecution {
        fold: usize,
        #[source]
        source: Box<ColtraneError>,
    },

    #[error("invalid batch: {0}")]
    InvalidBatch(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("model not fitted")]
    NotFitted,

    #[error("invalid shape: expected {expected}, got {actual}")]
    Shape { expected: String, actual: String },

    #[error("computation error: {0}")]
    Computation(String),

    #[error("thread pool error: {0}")]
    ThreadPool(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl ColtraneError {
    pub(crate) fn data_load(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        ColtraneError::DataLoad {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub(crate) fn in_fold(fold: usize, source: ColtraneError) -> Self {
        ColtraneError::FoldExecution {
            fold,
            source: Box::new(source),
        }
    }

    /// True for errors raised from inside a cross-validation fold
    pub fn is_fold_failure(&self) -> bool {
        matches!(self, ColtraneError::FoldExecution { .. })
    }
}
