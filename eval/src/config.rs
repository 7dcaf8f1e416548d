// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Run configuration for processing and inspection

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Configuration for the batch processor
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessorConfig {
    /// Root of the log directory tree
    pub output_dir: PathBuf,
    /// Show progress bars for batches and folds
    pub show_progress: bool,
    /// Worker threads for parallel batches (None = available cores)
    pub workers: Option<usize>,
    /// Render charts next to the aggregated documents
    pub render_charts: bool,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("logs"),
            show_progress: true,
            workers: None,
            render_charts: true,
        }
    }
}

impl ProcessorConfig {
    /// Number of workers the fold pool should use
    pub fn worker_count(&self) -> usize {
        match self.workers {
            Some(n) if n > 0 => n,
            _ => available_workers(),
        }
    }
}

/// Configuration for the data inspector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InspectionConfig {
    /// Root of the log directory tree
    pub output_dir: PathBuf,
    /// Render heatmaps and distribution charts
    pub render_charts: bool,
}

impl Default for InspectionConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("logs"),
            render_charts: true,
        }
    }
}

pub(crate) fn available_workers() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_count_defaults_to_cores() {
        let config = ProcessorConfig::default();
        assert!(config.worker_count() >= 1);

        let config = ProcessorConfig {
            workers: Some(3),
            ..ProcessorConfig::default()
        };
        assert_eq!(config.worker_count(), 3);

        let config = ProcessorConfig {
            workers: Some(0),
            ..ProcessorConfig::default()
        };
        assert_eq!(config.worker_count(), available_workers());
    }

    #[test]
    fn test_config_roundtrips_through_json() {
        let config = InspectionConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: InspectionConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.output_dir, config.output_dir);
        assert!(parsed.render_charts);
    }
}
