// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Cross-validation splitters
//!
//! Every splitter turns a sample count (and, for stratification, the label
//! of every sample) into an ordered list of train/test index folds. Seeded
//! splitters are reproducible; unseeded ones draw from OS entropy.

use crate::error::{ColtraneError, Result};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_chacha::ChaCha8Rng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::fmt;

/// One train/test partition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Fold {
    pub index: usize,
    pub train: Vec<usize>,
    pub test: Vec<usize>,
}

/// A cross-validation strategy
pub trait Splitter: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    fn params(&self) -> Value;

    /// Fail early when the strategy cannot split `n_samples` rows
    fn check(&self, n_samples: usize) -> Result<()>;

    fn split(&self, n_samples: usize, labels: &[String]) -> Result<Vec<Fold>>;
}

fn rng_for(seed: Option<u64>) -> ChaCha8Rng {
    match seed {
        Some(seed) => ChaCha8Rng::seed_from_u64(seed),
        None => ChaCha8Rng::from_entropy(),
    }
}

fn check_splits(n_splits: usize, n_samples: usize) -> Result<()> {
    if n_splits < 2 {
        return Err(ColtraneError::InvalidBatch(format!(
            "n_splits must be at least 2, got {}",
            n_splits
        )));
    }
    if n_samples < n_splits {
        return Err(ColtraneError::InvalidBatch(format!(
            "cannot split {} samples into {} folds",
            n_samples, n_splits
        )));
    }
    Ok(())
}

/// First `n % k` folds get one extra sample
fn fold_sizes(n_samples: usize, n_splits: usize) -> impl Iterator<Item = usize> {
    let base = n_samples / n_splits;
    let remainder = n_samples % n_splits;
    (0..n_splits).map(move |i| if i < remainder { base + 1 } else { base })
}

/// Cut an index order into consecutive test blocks
fn consecutive_folds(order: &[usize], n_splits: usize, first_index: usize) -> Vec<Fold> {
    let mut folds = Vec::with_capacity(n_splits);
    let mut start = 0;

    for (i, size) in fold_sizes(order.len(), n_splits).enumerate() {
        let test = order[start..start + size].to_vec();
        let train = order[..start]
            .iter()
            .chain(order[start + size..].iter())
            .copied()
            .collect();
        folds.push(Fold {
            index: first_index + i,
            train,
            test,
        });
        start += size;
    }

    folds
}

/// K-fold with optional shuffling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KFold {
    pub n_splits: usize,
    pub shuffle: bool,
    pub seed: Option<u64>,
}

impl KFold {
    pub fn new(n_splits: usize) -> Self {
        Self {
            n_splits,
            shuffle: false,
            seed: None,
        }
    }

    pub fn shuffled(n_splits: usize, seed: Option<u64>) -> Self {
        Self {
            n_splits,
            shuffle: true,
            seed,
        }
    }
}

impl Splitter for KFold {
    fn name(&self) -> &str {
        "KFold"
    }

    fn params(&self) -> Value {
        json!({ "n_splits": self.n_splits, "shuffle": self.shuffle, "seed": self.seed })
    }

    fn check(&self, n_samples: usize) -> Result<()> {
        check_splits(self.n_splits, n_samples)
    }

    fn split(&self, n_samples: usize, _labels: &[String]) -> Result<Vec<Fold>> {
        self.check(n_samples)?;
        let mut order: Vec<usize> = (0..n_samples).collect();
        if self.shuffle {
            order.shuffle(&mut rng_for(self.seed));
        }
        Ok(consecutive_folds(&order, self.n_splits, 0))
    }
}

/// K-fold repeated `n_repeats` times with a fresh shuffle each repetition
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepeatedKFold {
    pub n_splits: usize,
    pub n_repeats: usize,
    pub seed: Option<u64>,
}

impl RepeatedKFold {
    pub fn new(n_splits: usize, n_repeats: usize, seed: Option<u64>) -> Self {
        Self {
            n_splits,
            n_repeats,
            seed,
        }
    }
}

impl Splitter for RepeatedKFold {
    fn name(&self) -> &str {
        "RepeatedKFold"
    }

    fn params(&self) -> Value {
        json!({ "n_splits": self.n_splits, "n_repeats": self.n_repeats, "seed": self.seed })
    }

    fn check(&self, n_samples: usize) -> Result<()> {
        if self.n_repeats == 0 {
            return Err(ColtraneError::InvalidBatch("n_repeats must be at least 1".to_string()));
        }
        check_splits(self.n_splits, n_samples)
    }

    fn split(&self, n_samples: usize, _labels: &[String]) -> Result<Vec<Fold>> {
        self.check(n_samples)?;
        let mut rng = rng_for(self.seed);
        let mut folds = Vec::with_capacity(self.n_splits * self.n_repeats);

        for repeat in 0..self.n_repeats {
            let mut order: Vec<usize> = (0..n_samples).collect();
            order.shuffle(&mut rng);
            folds.extend(consecutive_folds(&order, self.n_splits, repeat * self.n_splits));
        }

        Ok(folds)
    }
}

/// K-fold keeping each class's share roughly equal across folds
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StratifiedKFold {
    pub n_splits: usize,
    pub shuffle: bool,
    pub seed: Option<u64>,
}

impl StratifiedKFold {
    pub fn new(n_splits: usize) -> Self {
        Self {
            n_splits,
            shuffle: false,
            seed: None,
        }
    }

    pub fn shuffled(n_splits: usize, seed: Option<u64>) -> Self {
        Self {
            n_splits,
            shuffle: true,
            seed,
        }
    }
}

impl Splitter for StratifiedKFold {
    fn name(&self) -> &str {
        "StratifiedKFold"
    }

    fn params(&self) -> Value {
        json!({ "n_splits": self.n_splits, "shuffle": self.shuffle, "seed": self.seed })
    }

    fn check(&self, n_samples: usize) -> Result<()> {
        check_splits(self.n_splits, n_samples)
    }

    fn split(&self, n_samples: usize, labels: &[String]) -> Result<Vec<Fold>> {
        self.check(n_samples)?;
        if labels.len() != n_samples {
            return Err(ColtraneError::Shape {
                expected: format!("{} labels", n_samples),
                actual: format!("{} labels", labels.len()),
            });
        }

        let mut by_class: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for (idx, label) in labels.iter().enumerate() {
            by_class.entry(label.as_str()).or_default().push(idx);
        }

        let mut rng = rng_for(self.seed);
        let mut assignment = vec![0usize; n_samples];
        let mut position = 0;
        for members in by_class.values_mut() {
            if self.shuffle {
                members.shuffle(&mut rng);
            }
            // Dealing class by class round-robin keeps fold sizes within one
            for &idx in members.iter() {
                assignment[idx] = position % self.n_splits;
                position += 1;
            }
        }

        Ok((0..self.n_splits)
            .map(|fold| {
                let (test, train): (Vec<usize>, Vec<usize>) =
                    (0..n_samples).partition(|&idx| assignment[idx] == fold);
                Fold {
                    index: fold,
                    train,
                    test,
                }
            })
            .collect())
    }
}

/// Independent random train/test partitions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShuffleSplit {
    pub n_splits: usize,
    pub test_size: f64,
    pub seed: Option<u64>,
}

impl ShuffleSplit {
    pub fn new(n_splits: usize, test_size: f64, seed: Option<u64>) -> Self {
        Self {
            n_splits,
            test_size,
            seed,
        }
    }

    fn n_test(&self, n_samples: usize) -> usize {
        (self.test_size * n_samples as f64).ceil() as usize
    }
}

impl Splitter for ShuffleSplit {
    fn name(&self) -> &str {
        "ShuffleSplit"
    }

    fn params(&self) -> Value {
        json!({ "n_splits": self.n_splits, "test_size": self.test_size, "seed": self.seed })
    }

    fn check(&self, n_samples: usize) -> Result<()> {
        if self.n_splits == 0 {
            return Err(ColtraneError::InvalidBatch("n_splits must be at least 1".to_string()));
        }
        if !(self.test_size > 0.0 && self.test_size < 1.0) {
            return Err(ColtraneError::InvalidBatch(format!(
                "test_size must lie in (0, 1), got {}",
                self.test_size
            )));
        }
        let n_test = self.n_test(n_samples);
        if n_test == 0 || n_test >= n_samples {
            return Err(ColtraneError::InvalidBatch(format!(
                "test_size {} leaves an empty partition of {} samples",
                self.test_size, n_samples
            )));
        }
        Ok(())
    }

    fn split(&self, n_samples: usize, _labels: &[String]) -> Result<Vec<Fold>> {
        self.check(n_samples)?;
        let n_test = self.n_test(n_samples);
        let mut rng = rng_for(self.seed);

        Ok((0..self.n_splits)
            .map(|index| {
                let mut order: Vec<usize> = (0..n_samples).collect();
                order.shuffle(&mut rng);
                let (test, train) = order.split_at(n_test);
                Fold {
                    index,
                    train: train.to_vec(),
                    test: test.to_vec(),
                }
            })
            .collect())
    }
}

/// One fold per sample, each holding out that sample
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LeaveOneOut;

impl Splitter for LeaveOneOut {
    fn name(&self) -> &str {
        "LeaveOneOut"
    }

    fn params(&self) -> Value {
        json!({})
    }

    fn check(&self, n_samples: usize) -> Result<()> {
        if n_samples < 2 {
            return Err(ColtraneError::InvalidBatch(format!(
                "leave-one-out needs at least 2 samples, got {}",
                n_samples
            )));
        }
        Ok(())
    }

    fn split(&self, n_samples: usize, _labels: &[String]) -> Result<Vec<Fold>> {
        self.check(n_samples)?;
        Ok((0..n_samples)
            .map(|index| Fold {
                index,
                train: (0..n_samples).filter(|&i| i != index).collect(),
                test: vec![index],
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    fn assert_partition(fold: &Fold, n: usize) {
        let train: HashSet<usize> = fold.train.iter().copied().collect();
        let test: HashSet<usize> = fold.test.iter().copied().collect();
        assert!(train.is_disjoint(&test));
        assert_eq!(train.len() + test.len(), n);
    }

    #[test]
    fn test_k_fold_sizes() {
        let folds = KFold::new(3).split(10, &[]).unwrap();
        let sizes: Vec<usize> = folds.iter().map(|f| f.test.len()).collect();
        assert_eq!(sizes, vec![4, 3, 3]);
        assert_eq!(folds[0].test, vec![0, 1, 2, 3]);
        for fold in &folds {
            assert_partition(fold, 10);
        }
    }

    #[test]
    fn test_k_fold_covers_every_sample_once() {
        let folds = KFold::shuffled(4, Some(42)).split(21, &[]).unwrap();
        let mut seen: Vec<usize> = folds.iter().flat_map(|f| f.test.clone()).collect();
        seen.sort_unstable();
        assert_eq!(seen, (0..21).collect::<Vec<_>>());
    }

    #[test]
    fn test_seeded_split_is_reproducible() {
        let a = RepeatedKFold::new(5, 2, Some(3)).split(30, &[]).unwrap();
        let b = RepeatedKFold::new(5, 2, Some(3)).split(30, &[]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_repeated_k_fold() {
        let folds = RepeatedKFold::new(5, 2, Some(0)).split(150, &[]).unwrap();
        assert_eq!(folds.len(), 10);
        assert_eq!(folds.iter().map(|f| f.index).collect::<Vec<_>>(), (0..10).collect::<Vec<_>>());
        for fold in &folds {
            assert_eq!(fold.test.len(), 30);
            assert_partition(fold, 150);
        }
        assert_ne!(folds[0].test, folds[5].test);
    }

    #[test]
    fn test_stratified_k_fold_balances_classes() {
        let labels: Vec<String> = (0..30).map(|i| if i % 3 == 0 { "a" } else { "b" }.to_string()).collect();
        let folds = StratifiedKFold::shuffled(5, Some(1)).split(30, &labels).unwrap();

        for fold in &folds {
            assert_partition(fold, 30);
            assert_eq!(fold.test.len(), 6);
            let a_count = fold.test.iter().filter(|&&i| labels[i] == "a").count();
            assert_eq!(a_count, 2);
        }
    }

    #[test]
    fn test_shuffle_split() {
        let folds = ShuffleSplit::new(3, 0.25, Some(9)).split(10, &[]).unwrap();
        assert_eq!(folds.len(), 3);
        for fold in &folds {
            assert_eq!(fold.test.len(), 3);
            assert_partition(fold, 10);
        }
        assert!(ShuffleSplit::new(3, 1.5, None).check(10).is_err());
    }

    #[test]
    fn test_leave_one_out() {
        let folds = LeaveOneOut.split(4, &[]).unwrap();
        assert_eq!(folds.len(), 4);
        assert_eq!(folds[2].test, vec![2]);
        assert_eq!(folds[2].train, vec![0, 1, 3]);
        assert!(LeaveOneOut.check(1).is_err());
    }

    #[test]
    fn test_check_rejects_small_datasets() {
        assert!(KFold::new(5).check(4).is_err());
        assert!(KFold::new(1).check(100).is_err());
        assert!(RepeatedKFold::new(5, 0, None).check(100).is_err());
        assert!(StratifiedKFold::new(3).check(3).is_ok());
    }
}
