// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Standalone dataset inspector
//!
//! Writes counts, class balance, descriptive statistics and correlation
//! matrices for a CSV file or every CSV file of a directory.

use anyhow::{Context, Result};
use clap::{Parser, ValueEnum};
use coltrane::datasets::{Dataset, DatasetCollection};
use coltrane::{Classification, InspectionConfig, Inspector, Regression};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Task {
    Classification,
    Regression,
}

#[derive(Parser, Debug)]
#[command(name = "inspect-data")]
#[command(about = "Describe CSV datasets before cross-validation")]
#[command(version)]
struct Args {
    /// CSV file or directory of CSV files
    #[arg(short, long)]
    data: PathBuf,

    /// Root of the log directory tree
    #[arg(short, long, default_value = "logs")]
    output: PathBuf,

    #[arg(short, long, value_enum, default_value_t = Task::Classification)]
    task: Task,

    /// Drop rows with missing values and duplicated feature vectors first
    #[arg(long)]
    clean: bool,

    /// Skip chart rendering
    #[arg(long)]
    no_charts: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    let mut datasets = if args.data.is_dir() {
        DatasetCollection::scan(&args.data)?.load_all()?
    } else {
        vec![Dataset::load(&args.data)?]
    };

    if args.clean {
        for dataset in &mut datasets {
            let dropped = dataset.drop_missing() + dataset.drop_duplicates();
            tracing::info!("Cleaned {}: {} rows dropped", dataset.name(), dropped);
        }
    }

    let config = InspectionConfig {
        output_dir: args.output.clone(),
        render_charts: !args.no_charts,
    };
    let inspector = match args.task {
        Task::Classification => Inspector::new(Classification, config),
        Task::Regression => Inspector::new(Regression, config),
    };

    let inspections = inspector.inspect_all(&datasets).context("Inspection failed")?;

    for inspection in &inspections {
        println!("\nDataset: {}", inspection.dataset);
        println!("  Records: {}", inspection.records.count);
        println!("  Missing values: {}", inspection.records.missing_values);
        println!(
            "  Attributes: {} ({} numerical, {} categorical)",
            inspection.attributes.count,
            inspection.attributes.numerical.len(),
            inspection.attributes.categorical.len()
        );

        println!("\n  Label distribution:");
        for (label, count) in inspection.balance.counts.iter() {
            println!(
                "    {}: {} ({:.1}%)",
                label,
                count,
                *count as f64 / inspection.records.count.max(1) as f64 * 100.0
            );
        }
    }

    println!("\nInspection logs written to: {}", args.output.display());
    Ok(())
}
