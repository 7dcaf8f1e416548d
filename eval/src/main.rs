// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Cross-validation CLI
//!
//! Usage:
//!   coltrane --data ./data/iris.csv --model naive-bayes --folds 5 --repeats 2
//!   coltrane --data ./data --task regression --model ridge --parallel

use anyhow::{bail, Context, Result};
use clap::{Parser, ValueEnum};
use coltrane::datasets::{Dataset, DatasetCollection};
use coltrane::estimators::{estimator_by_name, ESTIMATOR_NAMES};
use coltrane::metrics::Scorer;
use coltrane::pipeline::{Estimator, Pipeline, Step};
use coltrane::preprocessing::{LabelEncoder, MeanImputer, MinMaxScaler, StandardScaler};
use coltrane::split::{KFold, RepeatedKFold, Splitter, StratifiedKFold};
use coltrane::{Batch, Classification, Processor, ProcessorConfig, Regression};
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Task {
    Classification,
    Regression,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Scaler {
    None,
    Standard,
    Minmax,
}

#[derive(Parser, Debug)]
#[command(name = "coltrane")]
#[command(about = "Cross-validate model pipelines on CSV datasets")]
#[command(version)]
struct Args {
    /// CSV file or directory of CSV files
    #[arg(short, long)]
    data: PathBuf,

    /// Root of the log directory tree
    #[arg(short, long, default_value = "logs")]
    output: PathBuf,

    /// Estimator (see --list)
    #[arg(short, long, default_value = "naive-bayes")]
    model: String,

    /// Feature scaling step
    #[arg(long, value_enum, default_value_t = Scaler::Standard)]
    scaler: Scaler,

    /// Replace missing feature values with the training mean
    #[arg(long)]
    impute: bool,

    /// Drop rows with missing values and duplicated feature vectors first
    #[arg(long)]
    clean: bool,

    /// Number of folds
    #[arg(short, long, default_value_t = 5)]
    folds: usize,

    /// Repetitions of k-fold with fresh shuffles
    #[arg(short, long, default_value_t = 1)]
    repeats: usize,

    /// Random seed for reproducibility
    #[arg(short, long, default_value_t = 42)]
    seed: u64,

    #[arg(short, long, value_enum, default_value_t = Task::Classification)]
    task: Task,

    /// Scorers as `name` or `name:average`, comma-separated (default depends on task)
    #[arg(long)]
    scorers: Option<String>,

    /// Run folds on a worker pool
    #[arg(long)]
    parallel: bool,

    /// Worker threads (default: available cores)
    #[arg(short, long)]
    workers: Option<usize>,

    /// Skip chart rendering
    #[arg(long)]
    no_charts: bool,

    /// Hide progress bars
    #[arg(long)]
    quiet: bool,

    /// List available models and exit
    #[arg(long)]
    list: bool,
}

fn parse_scorers(list: &str) -> Result<Vec<Scorer>> {
    list.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|item| {
            let (function, average) = match item.split_once(':') {
                Some((f, avg)) => (f, Some(avg)),
                None => (item, None),
            };
            let mut params = Map::new();
            if let Some(avg) = average {
                params.insert("average".to_string(), Value::String(avg.to_string()));
            }
            Scorer::from_name(function, &params).with_context(|| format!("Invalid scorer '{}'", item))
        })
        .collect()
}

fn default_scorers(task: Task) -> &'static str {
    match task {
        Task::Classification => "accuracy,balanced_accuracy,precision:macro,recall:macro,f1:macro",
        Task::Regression => "r2,mse,rmse,mae",
    }
}

fn load_datasets(path: &Path) -> Result<Vec<Dataset>> {
    if path.is_dir() {
        Ok(DatasetCollection::scan(path)?.load_all()?)
    } else {
        Ok(vec![Dataset::load(path)?])
    }
}

fn build_pipeline(args: &Args) -> Result<Pipeline> {
    let mut steps = Vec::new();
    if args.impute {
        steps.push(("imputer".to_string(), Step::transform(MeanImputer::new())));
    }
    match args.scaler {
        Scaler::None => {}
        Scaler::Standard => steps.push(("scaler".to_string(), Step::transform(StandardScaler::new()))),
        Scaler::Minmax => steps.push(("scaler".to_string(), Step::transform(MinMaxScaler::new()))),
    }
    steps.push(("model".to_string(), Step::Estimate(estimator_by_name(&args.model, args.seed)?)));
    Ok(Pipeline::new(steps)?)
}

fn build_splitter(args: &Args) -> Box<dyn Splitter> {
    let seed = Some(args.seed);
    match (args.repeats, args.task) {
        (r, _) if r > 1 => Box::new(RepeatedKFold::new(args.folds, r, seed)),
        (_, Task::Classification) => Box::new(StratifiedKFold::shuffled(args.folds, seed)),
        (_, Task::Regression) => Box::new(KFold::shuffled(args.folds, seed)),
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    if args.list {
        println!("Available models:");
        for name in ESTIMATOR_NAMES {
            let model = estimator_by_name(name, args.seed)?;
            println!("  {:<16} {}", name, model.name());
        }
        return Ok(());
    }

    let scorer_list = args.scorers.clone().unwrap_or_else(|| default_scorers(args.task).to_string());
    let scorers = parse_scorers(&scorer_list)?;
    if scorers.is_empty() {
        bail!("No scorers given");
    }

    let datasets = load_datasets(&args.data).with_context(|| format!("Failed to load {}", args.data.display()))?;

    let mut batches = Vec::with_capacity(datasets.len());
    for mut dataset in datasets {
        if args.clean {
            let missing = dataset.drop_missing();
            let duplicates = dataset.drop_duplicates();
            tracing::info!(
                "Cleaned {}: dropped {} rows with missing values, {} duplicated rows",
                dataset.name(),
                missing,
                duplicates
            );
        }

        let name = dataset.name().to_string();
        let mut builder = Batch::builder(dataset)
            .pipeline(build_pipeline(&args)?)
            .boxed_splitter(build_splitter(&args))
            .scorers(scorers.clone())
            .parallel(args.parallel);
        if matches!(args.task, Task::Classification) {
            builder = builder.encoder(LabelEncoder::new());
        }
        batches.push(builder.build().with_context(|| format!("Invalid batch for {}", name))?);
    }

    let config = ProcessorConfig {
        output_dir: args.output.clone(),
        show_progress: !args.quiet,
        workers: args.workers,
        render_charts: !args.no_charts,
    };
    let processor = match args.task {
        Task::Classification => Processor::new(Classification, config),
        Task::Regression => Processor::new(Regression, config),
    };

    let reports = processor.process(batches)?;

    println!("\n{}", "=".repeat(70));
    println!("CROSS-VALIDATION SUMMARY");
    println!("{}", "=".repeat(70));

    let mut markdown = String::from("# Cross-validation report\n\n");
    for report in &reports {
        let md = report.result.to_markdown();
        println!("\n{}", md);
        println!("Logs: {}", report.directory.display());
        markdown.push_str(&md);
        markdown.push('\n');
    }

    std::fs::create_dir_all(&args.output)?;
    let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
    let md_path = args.output.join(format!("report_{}.md", timestamp));
    std::fs::write(&md_path, markdown).context("Failed to write report")?;
    println!("\nMarkdown report saved to: {}", md_path.display());

    Ok(())
}
