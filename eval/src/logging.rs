// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Run artifacts on disk
//!
//! A [`RunLogger`] owns one directory of the log tree. Documents are written
//! as pretty-printed JSON and charts through the configured renderer.

use crate::error::Result;
use crate::plot::{Chart, ChartRenderer};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Clone)]
pub struct RunLogger {
    dir: PathBuf,
    renderer: Option<Arc<dyn ChartRenderer>>,
}

impl std::fmt::Debug for RunLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunLogger")
            .field("dir", &self.dir)
            .field("charts", &self.renderer.is_some())
            .finish()
    }
}

impl RunLogger {
    /// Create (or reuse) `dir`; charts are skipped without a renderer
    pub fn create(dir: impl Into<PathBuf>, renderer: Option<Arc<dyn ChartRenderer>>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir, renderer })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Logger for a subdirectory, sharing the renderer
    pub fn child(&self, name: impl AsRef<Path>) -> Result<Self> {
        Self::create(self.dir.join(name), self.renderer.clone())
    }

    /// Write `<name>.json`
    pub fn save_json<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<PathBuf> {
        let path = self.dir.join(format!("{}.json", name));
        let json = serde_json::to_string_pretty(value)?;
        std::fs::write(&path, json)?;
        tracing::debug!("Wrote {}", path.display());
        Ok(path)
    }

    /// Render and write `<name>.<ext>`; returns `None` when charts are disabled
    pub fn save_chart(&self, name: &str, chart: &Chart) -> Result<Option<PathBuf>> {
        let Some(renderer) = &self.renderer else {
            return Ok(None);
        };
        let bytes = renderer.render(chart)?;
        let path = self.dir.join(format!("{}.{}", name, renderer.extension()));
        std::fs::write(&path, bytes)?;
        tracing::debug!("Rendered {} to {}", chart.title(), path.display());
        Ok(Some(path))
    }
}
