// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Batch evaluation
//!
//! [`evaluate`] is the cross-validation loop: fit a fresh copy of the
//! pipeline on every training partition, score it on the held-out partition
//! and collect the results by fold index. [`Processor`] wraps the loop with
//! the log tree, domain hooks and progress reporting.

use crate::aggregate::{aggregate_groups, group_by_key, OrderedMap, Summary};
use crate::batch::Batch;
use crate::config::ProcessorConfig;
use crate::domain::Domain;
use crate::error::{ColtraneError, Result};
use crate::logging::RunLogger;
use crate::metrics::{self, ScoreMap};
use crate::pipeline::Pipeline;
use crate::plot::{Chart, ChartRenderer, SvgRenderer};
use crate::split::Fold;
use chrono::Utc;
use indicatif::{ProgressBar, ProgressStyle};
use ndarray::{Array1, ArrayView1, Axis};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::PathBuf;
use std::sync::{Arc, OnceLock};
use std::time::Instant;

/// Wall-clock timings of one split
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Performance {
    pub fit_seconds: f64,
    pub predict_seconds: f64,
    /// Prediction time divided by the test partition size
    pub predict_record_seconds: f64,
}

impl Performance {
    fn as_map(&self) -> OrderedMap<f64> {
        let mut map = OrderedMap::new();
        map.insert("fit_seconds", self.fit_seconds);
        map.insert("predict_seconds", self.predict_seconds);
        map.insert("predict_record_seconds", self.predict_record_seconds);
        map
    }
}

/// Outcome of one cross-validation fold
#[derive(Debug, Clone)]
pub struct SplitResult {
    pub index: usize,
    pub scores: ScoreMap,
    /// Pipeline fitted on this fold's training partition
    pub pipeline: Pipeline,
    pub performance: Performance,
    pub train_size: usize,
    pub test_size: usize,
    pub y_true: Vec<f64>,
    pub y_pred: Vec<f64>,
}

/// All split results of one batch, ordered by fold index
#[derive(Debug)]
pub struct BatchResult {
    batch_id: String,
    dataset: String,
    classes: Option<Vec<String>>,
    splits: Vec<SplitResult>,
    grouped: OnceLock<OrderedMap<Vec<f64>>>,
    aggregated: OnceLock<OrderedMap<Summary>>,
    performance: OnceLock<OrderedMap<Summary>>,
}

impl BatchResult {
    pub fn new(
        batch_id: impl Into<String>,
        dataset: impl Into<String>,
        classes: Option<Vec<String>>,
        mut splits: Vec<SplitResult>,
    ) -> Self {
        splits.sort_by_key(|s| s.index);
        Self {
            batch_id: batch_id.into(),
            dataset: dataset.into(),
            classes,
            splits,
            grouped: OnceLock::new(),
            aggregated: OnceLock::new(),
            performance: OnceLock::new(),
        }
    }

    pub fn batch_id(&self) -> &str {
        &self.batch_id
    }

    pub fn dataset(&self) -> &str {
        &self.dataset
    }

    /// Encoder classes, indexed by class id
    pub fn classes(&self) -> Option<&[String]> {
        self.classes.as_deref()
    }

    pub fn splits(&self) -> &[SplitResult] {
        &self.splits
    }

    pub fn len(&self) -> usize {
        self.splits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.splits.is_empty()
    }

    /// Scorer name to per-split values, in scorer order
    pub fn grouped_scores(&self) -> &OrderedMap<Vec<f64>> {
        self.grouped
            .get_or_init(|| group_by_key(self.splits.iter().map(|s| &s.scores)))
    }

    pub fn aggregated_scores(&self) -> &OrderedMap<Summary> {
        self.aggregated
            .get_or_init(|| aggregate_groups(self.grouped_scores()))
    }

    pub fn aggregated_performance(&self) -> &OrderedMap<Summary> {
        self.performance.get_or_init(|| {
            let maps: Vec<OrderedMap<f64>> = self.splits.iter().map(|s| s.performance.as_map()).collect();
            aggregate_groups(&group_by_key(&maps))
        })
    }

    /// Markdown table of the aggregated scores
    pub fn to_markdown(&self) -> String {
        let mut md = String::new();
        md.push_str(&format!("## {} / {}\n\n", self.dataset, self.batch_id));
        md.push_str(&format!("Splits: {}\n\n", self.splits.len()));
        md.push_str("| Scorer | Mean | Std | Min | Median | Max |\n");
        md.push_str("|--------|------|-----|-----|--------|-----|\n");
        for (name, s) in self.aggregated_scores().iter() {
            md.push_str(&format!(
                "| {} | {:.4} | {:.4} | {:.4} | {:.4} | {:.4} |\n",
                name, s.mean, s.std, s.min, s.percentiles.p50, s.max
            ));
        }
        md
    }
}

/// Receives progress from the evaluation loop
pub trait FoldObserver: Sync {
    fn on_folds(&self, _count: usize) {}

    fn on_fold(&self, _split: &SplitResult) {}
}

impl FoldObserver for () {}

impl FoldObserver for ProgressBar {
    fn on_folds(&self, count: usize) {
        self.set_length(count as u64);
    }

    fn on_fold(&self, _split: &SplitResult) {
        self.inc(1);
    }
}

fn run_fold(batch: &Batch, labels: ArrayView1<f64>, fold: &Fold) -> Result<SplitResult> {
    let x = batch.features();
    let x_train = x.select(Axis(0), &fold.train);
    let y_train = labels.select(Axis(0), &fold.train);
    let x_test = x.select(Axis(0), &fold.test);
    let y_test = labels.select(Axis(0), &fold.test).to_vec();

    let mut pipeline = batch.pipeline().clone();

    let start = Instant::now();
    pipeline.fit(x_train.view(), y_train.view())?;
    let fit_seconds = start.elapsed().as_secs_f64();

    let start = Instant::now();
    let y_pred = pipeline.predict(x_test.view())?.to_vec();
    let predict_seconds = start.elapsed().as_secs_f64();

    let scores = metrics::evaluate(batch.scorers(), &y_test, &y_pred)?;

    tracing::debug!("Fold {} fitted in {:.4}s", fold.index, fit_seconds);

    Ok(SplitResult {
        index: fold.index,
        scores,
        pipeline,
        performance: Performance {
            fit_seconds,
            predict_seconds,
            predict_record_seconds: predict_seconds / fold.test.len().max(1) as f64,
        },
        train_size: fold.train.len(),
        test_size: fold.test.len(),
        y_true: y_test,
        y_pred,
    })
}

/// Run every fold of `batch`; parallel batches use `workers` threads
pub fn evaluate(batch: &Batch, workers: usize) -> Result<BatchResult> {
    evaluate_with(batch, workers, &())
}

/// [`evaluate`] reporting progress to `observer`
pub fn evaluate_with(batch: &Batch, workers: usize, observer: &dyn FoldObserver) -> Result<BatchResult> {
    let dataset = batch.dataset();

    // The encoder sees every label before splitting
    let (labels, classes) = match batch.encoder() {
        Some(template) => {
            let mut encoder = template.clone();
            encoder.fit(dataset.y())?;
            (encoder.transform(dataset.y())?, Some(encoder.classes().to_vec()))
        }
        None => (batch.raw_labels()?, None),
    };
    let labels = Array1::from(labels);

    let folds = batch.splitter().split(dataset.len(), &dataset.label_strings())?;
    observer.on_folds(folds.len());
    tracing::info!(
        "Evaluating batch {} on {}: {} folds{}",
        batch.id(),
        dataset.name(),
        folds.len(),
        if batch.is_parallel() { " in parallel" } else { "" }
    );

    let task = |fold: &Fold| -> Result<SplitResult> {
        let split = run_fold(batch, labels.view(), fold).map_err(|e| ColtraneError::in_fold(fold.index, e))?;
        observer.on_fold(&split);
        Ok(split)
    };

    let splits: Vec<SplitResult> = if batch.is_parallel() {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .build()
            .map_err(|e| ColtraneError::ThreadPool(e.to_string()))?;
        pool.install(|| folds.par_iter().map(task).collect::<Result<Vec<_>>>())?
    } else {
        folds.iter().map(task).collect::<Result<Vec<_>>>()?
    };

    Ok(BatchResult::new(batch.id(), dataset.name(), classes, splits))
}

/// Written artifacts of one processed batch
#[derive(Debug)]
pub struct BatchReport {
    pub id: String,
    pub directory: PathBuf,
    pub result: BatchResult,
}

/// Evaluates batches and writes their log trees
pub struct Processor {
    domain: Box<dyn Domain>,
    config: ProcessorConfig,
    renderer: Arc<dyn ChartRenderer>,
}

impl Processor {
    pub fn new(domain: impl Domain + 'static, config: ProcessorConfig) -> Self {
        Self {
            domain: Box::new(domain),
            config,
            renderer: Arc::new(SvgRenderer::default()),
        }
    }

    pub fn with_renderer(mut self, renderer: Arc<dyn ChartRenderer>) -> Self {
        self.renderer = renderer;
        self
    }

    pub fn config(&self) -> &ProcessorConfig {
        &self.config
    }

    pub fn domain(&self) -> &dyn Domain {
        self.domain.as_ref()
    }

    fn progress_bar(&self, template: &str) -> ProgressBar {
        if !self.config.show_progress {
            return ProgressBar::hidden();
        }
        let bar = ProgressBar::new(0);
        if let Ok(style) = ProgressStyle::with_template(template) {
            bar.set_style(style.progress_chars("#>-"));
        }
        bar
    }

    /// Evaluate and log every batch in order; the first failure stops the run
    pub fn process(&self, batches: Vec<Batch>) -> Result<Vec<BatchReport>> {
        let batch_bar = self.progress_bar("{spinner:.green} Batches [{wide_bar:.cyan/blue}] {pos}/{len}");
        batch_bar.set_length(batches.len() as u64);

        let mut reports = Vec::with_capacity(batches.len());
        for batch in &batches {
            reports.push(self.process_batch(batch)?);
            batch_bar.inc(1);
        }

        batch_bar.finish_and_clear();
        self.log_comparison(&reports)?;
        Ok(reports)
    }

    /// Per-dataset comparison of every batch of the run, in
    /// `<output>/<dataset>/aggregate/`
    fn log_comparison(&self, reports: &[BatchReport]) -> Result<()> {
        let mut by_dataset: OrderedMap<Vec<&BatchReport>> = OrderedMap::new();
        for report in reports {
            let dataset = report.result.dataset();
            match by_dataset.get_mut(dataset) {
                Some(group) => group.push(report),
                None => by_dataset.insert(dataset, vec![report]),
            }
        }

        let renderer = self.config.render_charts.then(|| self.renderer.clone());
        for (dataset, group) in by_dataset.iter() {
            let logger = RunLogger::create(
                self.config.output_dir.join(dataset).join("aggregate"),
                renderer.clone(),
            )?;

            // scorer -> batch id -> per-split values
            let mut scores: OrderedMap<OrderedMap<Vec<f64>>> = OrderedMap::new();
            for report in group {
                for (name, values) in report.result.grouped_scores().iter() {
                    match scores.get_mut(name) {
                        Some(by_batch) => by_batch.insert(report.id.as_str(), values.clone()),
                        None => scores.insert(name, OrderedMap::from_iter([(report.id.as_str(), values.clone())])),
                    }
                }
            }
            logger.save_json("scores", &scores)?;

            for (name, by_batch) in scores.iter() {
                let series = by_batch.iter().map(|(id, values)| (id.to_string(), values.clone())).collect();
                logger.save_chart(
                    name,
                    &Chart::BoxPlot {
                        title: format!("{} {} by batch", dataset, name),
                        series,
                    },
                )?;
            }
            tracing::debug!("Compared {} batches of {} in {}", group.len(), dataset, logger.dir().display());
        }
        Ok(())
    }

    pub fn process_batch(&self, batch: &Batch) -> Result<BatchReport> {
        let renderer = self.config.render_charts.then(|| self.renderer.clone());
        let logger = RunLogger::create(
            self.config.output_dir.join(batch.dataset().name()).join(batch.id()),
            renderer,
        )?;

        logger.save_json(
            "batch",
            &json!({
                "id": batch.id(),
                "domain": self.domain.name(),
                "summary": batch.summary(),
                "config": &self.config,
                "timestamp": Utc::now().to_rfc3339(),
                "version": env!("CARGO_PKG_VERSION"),
            }),
        )?;

        let fold_bar = self.progress_bar("{spinner:.green} Folds   [{wide_bar:.cyan/blue}] {pos}/{len}");
        let outcome = evaluate_with(batch, self.config.worker_count(), &fold_bar);
        fold_bar.finish_and_clear();

        let result = match outcome {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!("Batch {} aborted: {}", batch.id(), e);
                return Err(e);
            }
        };

        self.log_result(&logger, &result)?;

        tracing::info!("Batch {} finished, logs in {}", batch.id(), logger.dir().display());
        for (name, summary) in result.aggregated_scores().iter() {
            tracing::info!("  {}: {:.4} ± {:.4}", name, summary.mean, summary.std);
        }

        Ok(BatchReport {
            id: batch.id().to_string(),
            directory: logger.dir().to_path_buf(),
            result,
        })
    }

    fn log_result(&self, logger: &RunLogger, result: &BatchResult) -> Result<()> {
        let splits = logger.child("splits")?;
        for split in result.splits() {
            let dir = splits.child(split.index.to_string())?;
            dir.save_json("pipeline", &split.pipeline.snapshot())?;
            dir.save_json("scores", &split.scores)?;
            dir.save_json(
                "performance",
                &json!({
                    "performance": split.performance,
                    "train_size": split.train_size,
                    "test_size": split.test_size,
                }),
            )?;
            if let Some(post) = self.domain.on_split_complete(split)? {
                dir.save_json("post", &post)?;
            }
        }

        logger.save_json("summary", result.aggregated_scores())?;
        logger.save_json("performance", result.aggregated_performance())?;
        if let Some(post) = self.domain.on_batch_complete(result)? {
            logger.save_json("post", &post)?;
        }

        let series = result
            .grouped_scores()
            .iter()
            .map(|(name, values)| (name.to_string(), values.clone()))
            .collect();
        logger.save_chart(
            "metrics",
            &Chart::BoxPlot {
                title: format!("{} scores", result.dataset()),
                series,
            },
        )?;
        for (name, chart) in self.domain.batch_charts(result) {
            logger.save_chart(&name, &chart)?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datasets::{Cell, Dataset};
    use crate::domain::{Classification, Regression};
    use crate::estimators::{DummyClassifier, GaussianNaiveBayes, LinearRegression};
    use crate::metrics::{Average, Scorer};
    use crate::preprocessing::{LabelEncoder, StandardScaler};
    use crate::split::{KFold, RepeatedKFold};
    use crate::testing::{iris_like, linear_like};
    use serde_json::{Map, Value};
    use tempfile::TempDir;

    fn iris_batch(parallel: bool, scorers: Vec<Scorer>) -> Batch {
        Batch::builder(iris_like(3))
            .pipeline(
                Pipeline::builder()
                    .transform("scaler", StandardScaler::new())
                    .estimator("model", GaussianNaiveBayes::new())
                    .build()
                    .unwrap(),
            )
            .splitter(RepeatedKFold::new(5, 2, Some(42)))
            .scorers(scorers)
            .encoder(LabelEncoder::new())
            .parallel(parallel)
            .build()
            .unwrap()
    }

    fn default_scorers() -> Vec<Scorer> {
        vec![
            Scorer::accuracy(),
            Scorer::precision(Average::Macro),
            Scorer::recall(Average::Macro),
            Scorer::f1(Average::Weighted),
        ]
    }

    fn read_json(path: &std::path::Path) -> Value {
        serde_json::from_str(&std::fs::read_to_string(path).unwrap()).unwrap()
    }

    fn quiet_config(dir: &TempDir) -> ProcessorConfig {
        ProcessorConfig {
            output_dir: dir.path().to_path_buf(),
            show_progress: false,
            workers: Some(4),
            render_charts: true,
        }
    }

    #[test]
    fn test_iris_repeated_k_fold_produces_ten_splits() {
        let batch = iris_batch(false, default_scorers());
        let result = evaluate(&batch, 1).unwrap();

        assert_eq!(result.len(), 10);
        for (idx, split) in result.splits().iter().enumerate() {
            assert_eq!(split.index, idx);
            assert_eq!(split.test_size, 30);
            assert_eq!(split.train_size, 120);
            let names: Vec<&str> = split.scores.keys().collect();
            assert_eq!(names, ["accuracy", "precision_macro", "recall_macro", "f1_weighted"]);
        }

        let accuracy = result.aggregated_scores().get("accuracy").unwrap();
        assert!(accuracy.mean > 0.8);
        assert!(accuracy.min <= accuracy.mean && accuracy.mean <= accuracy.max);
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let sequential = evaluate(&iris_batch(false, default_scorers()), 1).unwrap();
        let parallel = evaluate(&iris_batch(true, default_scorers()), 4).unwrap();

        assert_eq!(sequential.grouped_scores(), parallel.grouped_scores());
        assert_eq!(sequential.aggregated_scores(), parallel.aggregated_scores());
        for (a, b) in sequential.splits().iter().zip(parallel.splits()) {
            assert_eq!(a.index, b.index);
            assert_eq!(a.y_pred, b.y_pred);
        }
    }

    #[test]
    fn test_failing_scorer_aborts_batch() {
        let tmp = TempDir::new().unwrap();
        let batch = iris_batch(false, vec![Scorer::accuracy(), Scorer::precision(Average::Binary)]);
        let processor = Processor::new(Classification, quiet_config(&tmp));

        let err = processor.process(vec![batch]).unwrap_err();
        assert!(err.is_fold_failure());

        let dir = tmp.path().join("iris");
        let batch_dir = std::fs::read_dir(&dir).unwrap().next().unwrap().unwrap().path();
        assert!(batch_dir.join("batch.json").is_file());
        assert!(!batch_dir.join("summary.json").exists());
    }

    #[test]
    fn test_processor_writes_log_tree() {
        let tmp = TempDir::new().unwrap();
        let batch = iris_batch(true, default_scorers());
        let id = batch.id().to_string();
        let processor = Processor::new(Classification, quiet_config(&tmp));

        let reports = processor.process(vec![batch]).unwrap();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].id, id);

        let dir = tmp.path().join("iris").join(&id);
        assert_eq!(reports[0].directory, dir);
        for file in ["batch.json", "summary.json", "performance.json", "post.json", "metrics.svg"] {
            assert!(dir.join(file).is_file(), "missing {}", file);
        }
        for file in ["pipeline.json", "scores.json", "performance.json", "post.json"] {
            assert!(dir.join("splits/9").join(file).is_file(), "missing split file {}", file);
        }

        let summary: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(dir.join("summary.json")).unwrap()).unwrap();
        let keys: Vec<&String> = summary.as_object().unwrap().keys().collect();
        assert_eq!(keys, ["accuracy", "precision_macro", "recall_macro", "f1_weighted"]);
        assert!(summary["accuracy"]["percentiles"]["50"].is_number());
    }

    #[test]
    fn test_regression_batch() {
        let batch = Batch::builder(linear_like(5))
            .pipeline(Pipeline::builder().estimator("ols", LinearRegression::new()).build().unwrap())
            .splitter(KFold::shuffled(4, Some(1)))
            .scorers([Scorer::r2(), Scorer::mean_absolute_error()])
            .build()
            .unwrap();

        let tmp = TempDir::new().unwrap();
        let processor = Processor::new(Regression, quiet_config(&tmp));
        let reports = processor.process(vec![batch]).unwrap();

        let r2 = reports[0].result.aggregated_scores().get("r2").unwrap();
        assert!(r2.min > 0.99);
        assert!(reports[0].directory.join("residuals.svg").is_file());
    }

    #[test]
    fn test_aggregated_performance_keys() {
        let result = evaluate(&iris_batch(false, vec![Scorer::accuracy()]), 1).unwrap();
        let keys: Vec<&str> = result.aggregated_performance().keys().collect();
        assert_eq!(keys, ["fit_seconds", "predict_seconds", "predict_record_seconds"]);
        assert!(result.to_markdown().contains("| accuracy |"));
    }

    #[test]
    fn test_parallel_failing_fold_aborts_batch() {
        let batch = iris_batch(true, vec![Scorer::accuracy(), Scorer::precision(Average::Binary)]);
        let err = evaluate(&batch, 4).unwrap_err();
        assert!(err.is_fold_failure());
    }

    #[test]
    fn test_missing_feature_fails_fold() {
        let header = ["id", "a", "target"].map(String::from).to_vec();
        let rows = (0..10)
            .map(|i| {
                let a = if i == 3 { Cell::Missing } else { Cell::Number(i as f64) };
                vec![Cell::Number(i as f64), a, Cell::Number(2.0 * i as f64 + 1.0)]
            })
            .collect();
        let dataset = Dataset::from_rows("gappy", header, rows).unwrap();
        let batch = Batch::builder(dataset)
            .pipeline(Pipeline::builder().estimator("ols", LinearRegression::new()).build().unwrap())
            .splitter(KFold::new(2))
            .scorer(Scorer::mean_squared_error())
            .build()
            .unwrap();

        match evaluate(&batch, 1).unwrap_err() {
            ColtraneError::FoldExecution { source, .. } => {
                assert!(matches!(*source, ColtraneError::InvalidInput(_)))
            }
            other => panic!("expected a fold failure, got {}", other),
        }
    }

    #[test]
    fn test_undefined_score_is_logged_as_null() {
        let undefined = Scorer::custom("undefined", Map::new(), |_, _| Ok(f64::NAN));
        let batch = iris_batch(false, vec![Scorer::accuracy(), undefined]);
        let tmp = TempDir::new().unwrap();
        let processor = Processor::new(Classification, quiet_config(&tmp));

        let reports = processor.process(vec![batch]).unwrap();
        let summary = read_json(&reports[0].directory.join("summary.json"));
        assert!(summary["undefined"]["mean"].is_null());
        assert!(summary["undefined"]["percentiles"]["50"].is_null());
        assert!(summary["accuracy"]["mean"].is_number());
        assert!(reports[0].directory.join("metrics.svg").is_file());
    }

    #[test]
    fn test_run_aggregate_compares_batches() {
        let tmp = TempDir::new().unwrap();
        let naive_bayes = iris_batch(false, vec![Scorer::accuracy(), Scorer::f1(Average::Macro)]);
        let dummy = Batch::builder(iris_like(3))
            .pipeline(Pipeline::builder().estimator("dummy", DummyClassifier::new()).build().unwrap())
            .splitter(RepeatedKFold::new(5, 2, Some(42)))
            .scorers([Scorer::accuracy(), Scorer::f1(Average::Macro)])
            .encoder(LabelEncoder::new())
            .build()
            .unwrap();
        let ids = [naive_bayes.id().to_string(), dummy.id().to_string()];
        assert_ne!(ids[0], ids[1]);

        let processor = Processor::new(Classification, quiet_config(&tmp));
        processor.process(vec![naive_bayes, dummy]).unwrap();

        let dir = tmp.path().join("iris").join("aggregate");
        let scores = read_json(&dir.join("scores.json"));
        let metrics: Vec<&String> = scores.as_object().unwrap().keys().collect();
        assert_eq!(metrics, ["accuracy", "f1_macro"]);
        let batches: Vec<&String> = scores["accuracy"].as_object().unwrap().keys().collect();
        assert_eq!(batches, [&ids[0], &ids[1]]);
        assert_eq!(scores["accuracy"][&ids[1]].as_array().unwrap().len(), 10);

        assert!(dir.join("accuracy.svg").is_file());
        assert!(dir.join("f1_macro.svg").is_file());
    }
}
