// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Chart data and rendering
//!
//! Charts are plain data built by the evaluation and inspection code. Only
//! the run logger turns them into image bytes, through a [`ChartRenderer`].

use crate::aggregate::percentile;
use crate::error::{ColtraneError, Result};
use serde::{Deserialize, Serialize};
use std::fmt::Write;

/// Data of one chart
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Chart {
    Bars {
        title: String,
        labels: Vec<String>,
        values: Vec<f64>,
    },
    BoxPlot {
        title: String,
        series: Vec<(String, Vec<f64>)>,
    },
    Heatmap {
        title: String,
        labels: Vec<String>,
        values: Vec<Vec<f64>>,
    },
    Histogram {
        title: String,
        values: Vec<f64>,
        bins: usize,
    },
}

impl Chart {
    pub fn title(&self) -> &str {
        match self {
            Chart::Bars { title, .. }
            | Chart::BoxPlot { title, .. }
            | Chart::Heatmap { title, .. }
            | Chart::Histogram { title, .. } => title,
        }
    }
}

/// Turns chart data into an image document
pub trait ChartRenderer: Send + Sync {
    /// File extension of rendered documents, without the dot
    fn extension(&self) -> &str;

    fn render(&self, chart: &Chart) -> Result<Vec<u8>>;
}

/// Renders standalone SVG documents
#[derive(Debug, Clone)]
pub struct SvgRenderer {
    pub width: f64,
    pub height: f64,
}

impl Default for SvgRenderer {
    fn default() -> Self {
        Self {
            width: 640.0,
            height: 400.0,
        }
    }
}

const MARGIN: f64 = 50.0;
const BAR_COLOUR: &str = "#4c72b0";

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

fn finite_range(values: impl Iterator<Item = f64>) -> Option<(f64, f64)> {
    values
        .filter(|v| v.is_finite())
        .fold(None, |range, v| match range {
            None => Some((v, v)),
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
        })
}

/// Blue for -1, white for 0, red for +1
fn diverging_colour(value: f64) -> String {
    if !value.is_finite() {
        return "#cccccc".to_string();
    }
    let v = value.clamp(-1.0, 1.0);
    let fade = |t: f64| (255.0 * (1.0 - t)).round() as u8;
    if v >= 0.0 {
        format!("#ff{:02x}{:02x}", fade(v), fade(v))
    } else {
        format!("#{:02x}{:02x}ff", fade(-v), fade(-v))
    }
}

impl SvgRenderer {
    fn plot_width(&self) -> f64 {
        self.width - 2.0 * MARGIN
    }

    fn plot_height(&self) -> f64 {
        self.height - 2.0 * MARGIN
    }

    fn open(&self, out: &mut String, title: &str) -> std::fmt::Result {
        writeln!(
            out,
            r#"<svg xmlns="http://www.w3.org/2000/svg" width="{w}" height="{h}" viewBox="0 0 {w} {h}" font-family="sans-serif" font-size="11">"#,
            w = self.width,
            h = self.height
        )?;
        writeln!(out, r#"<rect width="100%" height="100%" fill="white"/>"#)?;
        writeln!(
            out,
            r#"<text x="{}" y="{}" text-anchor="middle" font-size="14">{}</text>"#,
            self.width / 2.0,
            MARGIN / 2.0,
            escape(title)
        )
    }

    fn axes(&self, out: &mut String, lo: f64, hi: f64) -> std::fmt::Result {
        let bottom = self.height - MARGIN;
        writeln!(
            out,
            r#"<line x1="{m}" y1="{m}" x2="{m}" y2="{b}" stroke="black"/><line x1="{m}" y1="{b}" x2="{r}" y2="{b}" stroke="black"/>"#,
            m = MARGIN,
            b = bottom,
            r = self.width - MARGIN
        )?;
        writeln!(
            out,
            r#"<text x="{}" y="{}" text-anchor="end">{:.3}</text><text x="{}" y="{}" text-anchor="end">{:.3}</text>"#,
            MARGIN - 4.0,
            bottom,
            lo,
            MARGIN - 4.0,
            MARGIN + 4.0,
            hi
        )
    }

    /// Map a value onto the vertical pixel axis
    fn y_of(&self, value: f64, lo: f64, hi: f64) -> f64 {
        let span = if hi > lo { hi - lo } else { 1.0 };
        self.height - MARGIN - (value - lo) / span * self.plot_height()
    }

    fn bars(&self, out: &mut String, labels: &[String], values: &[f64]) -> std::fmt::Result {
        let (lo, hi) = finite_range(values.iter().copied().chain(std::iter::once(0.0))).unwrap_or((0.0, 1.0));
        self.axes(out, lo, hi)?;

        let slot = self.plot_width() / values.len().max(1) as f64;
        let baseline = self.y_of(0.0, lo, hi);
        for (idx, (label, &value)) in labels.iter().zip(values).enumerate() {
            let x = MARGIN + idx as f64 * slot + slot * 0.1;
            let top = if value.is_finite() { self.y_of(value, lo, hi) } else { baseline };
            writeln!(
                out,
                r#"<rect x="{:.2}" y="{:.2}" width="{:.2}" height="{:.2}" fill="{}"/>"#,
                x,
                top.min(baseline),
                slot * 0.8,
                (baseline - top).abs(),
                BAR_COLOUR
            )?;
            writeln!(
                out,
                r#"<text x="{:.2}" y="{:.2}" text-anchor="middle">{}</text>"#,
                x + slot * 0.4,
                self.height - MARGIN + 14.0,
                escape(label)
            )?;
        }
        Ok(())
    }

    fn box_plot(&self, out: &mut String, series: &[(String, Vec<f64>)]) -> std::fmt::Result {
        let (lo, hi) = finite_range(series.iter().flat_map(|(_, v)| v.iter().copied())).unwrap_or((0.0, 1.0));
        self.axes(out, lo, hi)?;

        let slot = self.plot_width() / series.len().max(1) as f64;
        for (idx, (name, values)) in series.iter().enumerate() {
            let centre = MARGIN + (idx as f64 + 0.5) * slot;
            writeln!(
                out,
                r#"<text x="{:.2}" y="{:.2}" text-anchor="middle">{}</text>"#,
                centre,
                self.height - MARGIN + 14.0,
                escape(name)
            )?;

            let mut sorted: Vec<f64> = values.iter().copied().filter(|v| v.is_finite()).collect();
            if sorted.is_empty() {
                continue;
            }
            sorted.sort_by(f64::total_cmp);
            let [q0, q1, q2, q3, q4] = [0.0, 25.0, 50.0, 75.0, 100.0].map(|q| self.y_of(percentile(&sorted, q), lo, hi));
            let half = slot * 0.25;

            writeln!(
                out,
                r#"<line x1="{c:.2}" y1="{q0:.2}" x2="{c:.2}" y2="{q4:.2}" stroke="black"/>"#,
                c = centre,
                q0 = q0,
                q4 = q4
            )?;
            writeln!(
                out,
                r#"<rect x="{:.2}" y="{:.2}" width="{:.2}" height="{:.2}" fill="{}" stroke="black"/>"#,
                centre - half,
                q3,
                2.0 * half,
                (q1 - q3).max(0.5),
                BAR_COLOUR
            )?;
            writeln!(
                out,
                r#"<line x1="{:.2}" y1="{m:.2}" x2="{:.2}" y2="{m:.2}" stroke="white" stroke-width="2"/>"#,
                centre - half,
                centre + half,
                m = q2
            )?;
        }
        Ok(())
    }

    fn heatmap(&self, out: &mut String, labels: &[String], values: &[Vec<f64>]) -> std::fmt::Result {
        let n = labels.len().max(1) as f64;
        let cell_w = self.plot_width() / n;
        let cell_h = self.plot_height() / n;

        for (i, row) in values.iter().enumerate() {
            for (j, &value) in row.iter().enumerate() {
                let x = MARGIN + j as f64 * cell_w;
                let y = MARGIN + i as f64 * cell_h;
                writeln!(
                    out,
                    r#"<rect x="{:.2}" y="{:.2}" width="{:.2}" height="{:.2}" fill="{}" stroke="white"/>"#,
                    x,
                    y,
                    cell_w,
                    cell_h,
                    diverging_colour(value)
                )?;
                let text = if value.is_finite() { format!("{:.2}", value) } else { "-".to_string() };
                writeln!(
                    out,
                    r#"<text x="{:.2}" y="{:.2}" text-anchor="middle">{}</text>"#,
                    x + cell_w / 2.0,
                    y + cell_h / 2.0 + 4.0,
                    text
                )?;
            }
        }
        for (idx, label) in labels.iter().enumerate() {
            writeln!(
                out,
                r#"<text x="{:.2}" y="{:.2}" text-anchor="end">{}</text>"#,
                MARGIN - 4.0,
                MARGIN + (idx as f64 + 0.5) * cell_h + 4.0,
                escape(label)
            )?;
            writeln!(
                out,
                r#"<text x="{:.2}" y="{:.2}" text-anchor="middle">{}</text>"#,
                MARGIN + (idx as f64 + 0.5) * cell_w,
                self.height - MARGIN + 14.0,
                escape(label)
            )?;
        }
        Ok(())
    }
}

/// Equal-width bin counts over the finite values
pub fn histogram_counts(values: &[f64], bins: usize) -> Vec<(f64, f64, usize)> {
    let bins = bins.max(1);
    let Some((lo, hi)) = finite_range(values.iter().copied()) else {
        return Vec::new();
    };
    let width = if hi > lo { (hi - lo) / bins as f64 } else { 1.0 };

    let mut counts = vec![0usize; bins];
    for &v in values.iter().filter(|v| v.is_finite()) {
        let idx = (((v - lo) / width) as usize).min(bins - 1);
        counts[idx] += 1;
    }

    counts
        .into_iter()
        .enumerate()
        .map(|(i, c)| (lo + i as f64 * width, lo + (i + 1) as f64 * width, c))
        .collect()
}

impl ChartRenderer for SvgRenderer {
    fn extension(&self) -> &str {
        "svg"
    }

    fn render(&self, chart: &Chart) -> Result<Vec<u8>> {
        let mut out = String::new();
        let svg_error = |e: std::fmt::Error| ColtraneError::Computation(format!("failed to render chart: {}", e));

        self.open(&mut out, chart.title()).map_err(svg_error)?;
        match chart {
            Chart::Bars { labels, values, .. } => {
                if labels.len() != values.len() {
                    return Err(ColtraneError::Shape {
                        expected: format!("{} bar values", labels.len()),
                        actual: format!("{} bar values", values.len()),
                    });
                }
                self.bars(&mut out, labels, values).map_err(svg_error)?;
            }
            Chart::BoxPlot { series, .. } => self.box_plot(&mut out, series).map_err(svg_error)?,
            Chart::Heatmap { labels, values, .. } => {
                if values.len() != labels.len() || values.iter().any(|r| r.len() != labels.len()) {
                    return Err(ColtraneError::Shape {
                        expected: format!("{n}x{n} heatmap", n = labels.len()),
                        actual: "ragged matrix".to_string(),
                    });
                }
                self.heatmap(&mut out, labels, values).map_err(svg_error)?;
            }
            Chart::Histogram { values, bins, .. } => {
                let counts = histogram_counts(values, *bins);
                let labels: Vec<String> = counts.iter().map(|(lo, _, _)| format!("{:.2}", lo)).collect();
                let heights: Vec<f64> = counts.iter().map(|(_, _, c)| *c as f64).collect();
                self.bars(&mut out, &labels, &heights).map_err(svg_error)?;
            }
        }
        out.push_str("</svg>\n");

        Ok(out.into_bytes())
    }
}
