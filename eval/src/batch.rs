// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Evaluation batches
//!
//! A [`Batch`] bundles one dataset with the pipeline, splitter and scorers
//! it is evaluated with. It is validated once in [`BatchBuilder::build`]
//! and immutable afterwards.

use crate::datasets::{Cell, Dataset};
use crate::error::{ColtraneError, Result};
use crate::metrics::Scorer;
use crate::pipeline::Pipeline;
use crate::preprocessing::LabelEncoder;
use crate::split::Splitter;
use ndarray::{Array2, ArrayView2};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::sync::Arc;

/// Hex characters kept from the summary digest
const ID_LENGTH: usize = 12;

/// Dataset, pipeline, splitter and scorers evaluated together
#[derive(Debug)]
pub struct Batch {
    dataset: Arc<Dataset>,
    pipeline: Pipeline,
    splitter: Box<dyn Splitter>,
    scorers: Vec<Scorer>,
    encoder: Option<LabelEncoder>,
    parallel: bool,
    features: Array2<f64>,
    id: String,
}

impl Batch {
    pub fn builder(dataset: impl Into<Arc<Dataset>>) -> BatchBuilder {
        BatchBuilder::new(dataset.into())
    }

    pub fn dataset(&self) -> &Dataset {
        &self.dataset
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn splitter(&self) -> &dyn Splitter {
        self.splitter.as_ref()
    }

    pub fn scorers(&self) -> &[Scorer] {
        &self.scorers
    }

    pub fn encoder(&self) -> Option<&LabelEncoder> {
        self.encoder.as_ref()
    }

    pub fn is_parallel(&self) -> bool {
        self.parallel
    }

    /// Numeric feature rows, computed once at construction
    pub fn features(&self) -> ArrayView2<f64> {
        self.features.view()
    }

    /// Short identifier derived from the summary, stable across runs
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Labels as numbers, without an encoder
    pub(crate) fn raw_labels(&self) -> Result<Vec<f64>> {
        numeric_labels(self.dataset.y())
    }

    /// Deterministic description of everything the batch evaluates
    pub fn summary(&self) -> Value {
        let mut summary = identity(
            &self.dataset,
            &self.pipeline,
            self.splitter.as_ref(),
            &self.scorers,
            self.encoder.as_ref(),
        );
        if let Value::Object(map) = &mut summary {
            map.insert("parallel".to_string(), json!(self.parallel));
        }
        summary
    }
}

fn numeric_labels(labels: &[Cell]) -> Result<Vec<f64>> {
    labels
        .iter()
        .enumerate()
        .map(|(row, cell)| {
            cell.as_f64().ok_or_else(|| {
                ColtraneError::InvalidBatch(format!(
                    "label '{}' at row {} is not numeric, add a label encoder",
                    cell, row
                ))
            })
        })
        .collect()
}

/// Summary fields that define the experiment (everything but `parallel`)
fn identity(
    dataset: &Dataset,
    pipeline: &Pipeline,
    splitter: &dyn Splitter,
    scorers: &[Scorer],
    encoder: Option<&LabelEncoder>,
) -> Value {
    json!({
        "dataset": dataset.summary(),
        "pipeline": pipeline.describe(),
        "splitter": {
            "name": splitter.name(),
            "params": splitter.params(),
        },
        "scorers": scorers.iter().map(Scorer::describe).collect::<Vec<_>>(),
        "encoder": encoder.map(|e| e.name()),
    })
}

fn short_id(identity: &Value) -> Result<String> {
    let compact = serde_json::to_vec(identity)?;
    let digest = Sha256::digest(&compact);
    let mut id = hex::encode(digest);
    id.truncate(ID_LENGTH);
    Ok(id)
}

/// Builder for [`Batch`]
pub struct BatchBuilder {
    dataset: Arc<Dataset>,
    pipeline: Option<Pipeline>,
    splitter: Option<Box<dyn Splitter>>,
    scorers: Vec<Scorer>,
    encoder: Option<LabelEncoder>,
    parallel: bool,
}

impl BatchBuilder {
    fn new(dataset: Arc<Dataset>) -> Self {
        Self {
            dataset,
            pipeline: None,
            splitter: None,
            scorers: Vec::new(),
            encoder: None,
            parallel: false,
        }
    }

    pub fn pipeline(mut self, pipeline: Pipeline) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    pub fn splitter(mut self, splitter: impl Splitter + 'static) -> Self {
        self.splitter = Some(Box::new(splitter));
        self
    }

    pub fn boxed_splitter(mut self, splitter: Box<dyn Splitter>) -> Self {
        self.splitter = Some(splitter);
        self
    }

    pub fn scorer(mut self, scorer: Scorer) -> Self {
        self.scorers.push(scorer);
        self
    }

    pub fn scorers(mut self, scorers: impl IntoIterator<Item = Scorer>) -> Self {
        self.scorers.extend(scorers);
        self
    }

    pub fn encoder(mut self, encoder: LabelEncoder) -> Self {
        self.encoder = Some(encoder);
        self
    }

    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn build(self) -> Result<Batch> {
        let pipeline = self
            .pipeline
            .ok_or_else(|| ColtraneError::InvalidBatch("no pipeline given".to_string()))?;
        let splitter = self
            .splitter
            .ok_or_else(|| ColtraneError::InvalidBatch("no splitter given".to_string()))?;

        if self.dataset.is_empty() {
            return Err(ColtraneError::InvalidBatch(format!(
                "dataset '{}' has no rows",
                self.dataset.name()
            )));
        }
        splitter.check(self.dataset.len())?;

        if self.scorers.is_empty() {
            return Err(ColtraneError::InvalidBatch("no scorers given".to_string()));
        }
        for (idx, scorer) in self.scorers.iter().enumerate() {
            if self.scorers[..idx].iter().any(|s| s.name() == scorer.name()) {
                return Err(ColtraneError::InvalidBatch(format!(
                    "duplicate scorer name '{}'",
                    scorer.name()
                )));
            }
        }

        let features = self
            .dataset
            .numeric_features()
            .map_err(|e| ColtraneError::InvalidBatch(e.to_string()))?;
        if self.encoder.is_none() {
            numeric_labels(self.dataset.y())?;
        }

        let id = short_id(&identity(
            &self.dataset,
            &pipeline,
            splitter.as_ref(),
            &self.scorers,
            self.encoder.as_ref(),
        ))?;

        tracing::debug!("Built batch {} for dataset {}", id, self.dataset.name());

        Ok(Batch {
            dataset: self.dataset,
            pipeline,
            splitter,
            scorers: self.scorers,
            encoder: self.encoder,
            parallel: self.parallel,
            features,
            id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::estimators::GaussianNaiveBayes;
    use crate::metrics::Average;
    use crate::preprocessing::StandardScaler;
    use crate::split::{KFold, RepeatedKFold};
    use crate::testing::iris_like;

    fn pipeline() -> Pipeline {
        Pipeline::builder()
            .transform("scaler", StandardScaler::new())
            .estimator("model", GaussianNaiveBayes::new())
            .build()
            .unwrap()
    }

    fn builder(parallel: bool) -> BatchBuilder {
        Batch::builder(iris_like(0))
            .pipeline(pipeline())
            .splitter(RepeatedKFold::new(5, 2, Some(1)))
            .scorer(Scorer::accuracy())
            .scorer(Scorer::f1(Average::Macro))
            .encoder(LabelEncoder::new())
            .parallel(parallel)
    }

    #[test]
    fn test_build_and_summary() {
        let batch = builder(false).build().unwrap();
        let summary = batch.summary();

        assert_eq!(summary["dataset"]["rows"], 150);
        assert_eq!(summary["pipeline"][1]["step"], "GaussianNaiveBayes");
        assert_eq!(summary["splitter"]["name"], "RepeatedKFold");
        assert_eq!(summary["scorers"][1]["name"], "f1_macro");
        assert_eq!(summary["encoder"], "LabelEncoder");
        assert_eq!(summary["parallel"], false);

        let keys: Vec<&String> = summary.as_object().unwrap().keys().collect();
        assert_eq!(keys, ["dataset", "pipeline", "splitter", "scorers", "encoder", "parallel"]);
        assert_eq!(batch.features().dim(), (150, 4));
    }

    #[test]
    fn test_id_ignores_parallel_flag() {
        let sequential = builder(false).build().unwrap();
        let parallel = builder(true).build().unwrap();
        assert_eq!(sequential.id(), parallel.id());
        assert_eq!(sequential.id().len(), 12);

        let other = builder(false).scorer(Scorer::accuracy().named("acc")).build().unwrap();
        assert_ne!(sequential.id(), other.id());
    }

    #[test]
    fn test_build_validation() {
        assert!(Batch::builder(iris_like(0))
            .splitter(KFold::new(5))
            .scorer(Scorer::accuracy())
            .build()
            .is_err());

        let no_scorers = Batch::builder(iris_like(0))
            .pipeline(pipeline())
            .splitter(KFold::new(5))
            .encoder(LabelEncoder::new())
            .build();
        assert!(matches!(no_scorers, Err(ColtraneError::InvalidBatch(_))));

        let duplicate = builder(false).scorer(Scorer::accuracy()).build();
        assert!(matches!(duplicate, Err(ColtraneError::InvalidBatch(_))));

        let too_many_folds = Batch::builder(iris_like(0))
            .pipeline(pipeline())
            .splitter(KFold::new(500))
            .scorer(Scorer::accuracy())
            .encoder(LabelEncoder::new())
            .build();
        assert!(too_many_folds.is_err());
    }

    #[test]
    fn test_text_labels_need_encoder() {
        let result = Batch::builder(iris_like(0))
            .pipeline(pipeline())
            .splitter(KFold::new(5))
            .scorer(Scorer::accuracy())
            .build();
        assert!(matches!(result, Err(ColtraneError::InvalidBatch(_))));
    }

    #[test]
    fn test_text_features_rejected() {
        let header = ["id", "colour", "label"].map(String::from).to_vec();
        let rows = (0..6)
            .map(|i| {
                vec![
                    Cell::Number(i as f64),
                    Cell::Text(if i % 2 == 0 { "red" } else { "blue" }.to_string()),
                    Cell::Number((i % 2) as f64),
                ]
            })
            .collect();
        let dataset = Dataset::from_rows("colours", header, rows).unwrap();

        let result = Batch::builder(dataset)
            .pipeline(pipeline())
            .splitter(KFold::new(2))
            .scorer(Scorer::accuracy())
            .build();
        assert!(matches!(result, Err(ColtraneError::InvalidBatch(_))));
    }
}
