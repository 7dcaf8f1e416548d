// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Aggregation of per-split measurements
//!
//! Pure helpers that reduce lists of scalars into summary statistics and
//! group repeated keys across splits. Nothing here allocates state between
//! calls; every function is deterministic in its input.

use crate::error::{ColtraneError, Result};
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::collections::BTreeMap;

/// Insertion-ordered string-keyed map
///
/// Scores, grouped scores and class balances are small, and their key order
/// is meaningful in logs (scorer order, first-seen order), so a vector of
/// pairs is enough.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderedMap<V> {
    entries: Vec<(String, V)>,
}

impl<V> Default for OrderedMap<V> {
    fn default() -> Self {
        Self { entries: Vec::new() }
    }
}

impl<V> OrderedMap<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace, keeping the original position of an existing key
    pub fn insert(&mut self, key: impl Into<String>, value: V) {
        let key = key.into();
        match self.entries.iter_mut().find(|(k, _)| *k == key) {
            Some((_, slot)) => *slot = value,
            None => self.entries.push((key, value)),
        }
    }

    pub fn get(&self, key: &str) -> Option<&V> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn get_mut(&mut self, key: &str) -> Option<&mut V> {
        self.entries.iter_mut().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn values(&self) -> impl Iterator<Item = &V> {
        self.entries.iter().map(|(_, v)| v)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &V)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V> FromIterator<(K, V)> for OrderedMap<V> {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = OrderedMap::new();
        for (k, v) in iter {
            map.insert(k, v);
        }
        map
    }
}

impl<V: Serialize> Serialize for OrderedMap<V> {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (k, v) in &self.entries {
            map.serialize_entry(k, v)?;
        }
        map.end()
    }
}

/// Percentiles 0, 25, 50, 75 and 100 of a sample
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Percentiles {
    #[serde(rename = "0")]
    pub p0: f64,
    #[serde(rename = "25")]
    pub p25: f64,
    #[serde(rename = "50")]
    pub p50: f64,
    #[serde(rename = "75")]
    pub p75: f64,
    #[serde(rename = "100")]
    pub p100: f64,
}

/// Summary statistics of a list of per-split scalars
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub mean: f64,
    pub min: f64,
    pub max: f64,
    /// Population standard deviation
    pub std: f64,
    pub percentiles: Percentiles,
}

impl Summary {
    fn undefined() -> Self {
        Self {
            mean: f64::NAN,
            min: f64::NAN,
            max: f64::NAN,
            std: f64::NAN,
            percentiles: Percentiles {
                p0: f64::NAN,
                p25: f64::NAN,
                p50: f64::NAN,
                p75: f64::NAN,
                p100: f64::NAN,
            },
        }
    }
}

/// Reduce values to mean, min, max, std and percentiles.
///
/// Returns `None` for an empty slice. A NaN anywhere makes every statistic
/// NaN, written as `null` in logs.
pub fn aggregate(values: &[f64]) -> Option<Summary> {
    if values.is_empty() {
        return None;
    }
    if values.iter().any(|v| v.is_nan()) {
        return Some(Summary::undefined());
    }

    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let n = values.len() as f64;
    let min = sorted[0];
    let max = sorted[sorted.len() - 1];
    // Rounding can push the mean of near-equal values just outside [min, max]
    let mean = (values.iter().sum::<f64>() / n).clamp(min, max);
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

    Some(Summary {
        mean,
        min,
        max,
        std: variance.sqrt(),
        percentiles: Percentiles {
            p0: min,
            p25: percentile(&sorted, 25.0),
            p50: percentile(&sorted, 50.0),
            p75: percentile(&sorted, 75.0),
            p100: max,
        },
    })
}

/// Linear-interpolated percentile of an ascending slice.
pub fn percentile(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            let rank = (q.clamp(0.0, 100.0) / 100.0) * (n - 1) as f64;
            let lo = rank.floor() as usize;
            let hi = rank.ceil() as usize;
            let weight = rank - lo as f64;
            sorted[lo] + (sorted[hi] - sorted[lo]) * weight
        }
    }
}

/// Group the values of many maps by key, preserving first-seen key order.
pub fn group_by_key<'a, T: Clone + 'a>(
    maps: impl IntoIterator<Item = &'a OrderedMap<T>>,
) -> OrderedMap<Vec<T>> {
    let mut grouped: OrderedMap<Vec<T>> = OrderedMap::new();

    for map in maps {
        for (key, value) in map.iter() {
            match grouped.get_mut(key) {
                Some(values) => values.push(value.clone()),
                None => grouped.insert(key, vec![value.clone()]),
            }
        }
    }

    grouped
}

/// Aggregate every group, skipping empty ones
pub fn aggregate_groups(grouped: &OrderedMap<Vec<f64>>) -> OrderedMap<Summary> {
    grouped
        .iter()
        .filter_map(|(key, values)| aggregate(values).map(|summary| (key, summary)))
        .collect()
}

/// Class balance: label counts plus summary statistics over the counts
#[derive(Debug, Clone, Serialize)]
pub struct Balance {
    pub counts: OrderedMap<usize>,
    pub stats: Option<Summary>,
}

/// Count occurrences of each label, ordered by label
pub fn balance<'a>(labels: impl IntoIterator<Item = &'a str>) -> Balance {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for label in labels {
        *counts.entry(label).or_insert(0) += 1;
    }

    let values: Vec<f64> = counts.values().map(|&c| c as f64).collect();

    Balance {
        counts: counts.into_iter().collect(),
        stats: aggregate(&values),
    }
}

/// Element-wise average of equally shaped matrices
pub fn average_matrices(matrices: &[Vec<Vec<f64>>]) -> Result<Vec<Vec<f64>>> {
    let first = matrices
        .first()
        .ok_or_else(|| ColtraneError::InvalidInput("no matrices to average".to_string()))?;
    let rows = first.len();
    let cols = first.first().map_or(0, |r| r.len());

    let mut sum = vec![vec![0.0; cols]; rows];
    for matrix in matrices {
        if matrix.len() != rows || matrix.iter().any(|r| r.len() != cols) {
            return Err(ColtraneError::Shape {
                expected: format!("{}x{}", rows, cols),
                actual: format!("{}x{}", matrix.len(), matrix.first().map_or(0, |r| r.len())),
            });
        }
        for (acc_row, row) in sum.iter_mut().zip(matrix) {
            for (acc, v) in acc_row.iter_mut().zip(row) {
                *acc += v;
            }
        }
    }

    let n = matrices.len() as f64;
    Ok(sum
        .into_iter()
        .map(|row| row.into_iter().map(|v| v / n).collect())
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_aggregate_known_values() {
        let summary = aggregate(&[1.0, 2.0, 3.0, 4.0]).unwrap();

        assert_abs_diff_eq!(summary.mean, 2.5, epsilon = 1e-12);
        assert_abs_diff_eq!(summary.min, 1.0);
        assert_abs_diff_eq!(summary.max, 4.0);
        assert_abs_diff_eq!(summary.std, 1.25f64.sqrt(), epsilon = 1e-12);
        assert_abs_diff_eq!(summary.percentiles.p25, 1.75, epsilon = 1e-12);
        assert_abs_diff_eq!(summary.percentiles.p50, 2.5, epsilon = 1e-12);
        assert_abs_diff_eq!(summary.percentiles.p75, 3.25, epsilon = 1e-12);
    }

    #[test]
    fn test_aggregate_empty() {
        assert!(aggregate(&[]).is_none());
    }

    #[test]
    fn test_aggregate_single_value() {
        let summary = aggregate(&[0.7]).unwrap();
        assert_eq!(summary.mean, 0.7);
        assert_eq!(summary.std, 0.0);
        assert_eq!(summary.percentiles.p50, 0.7);
    }

    #[test]
    fn test_aggregate_bounds_hold_for_random_inputs() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);

        for _ in 0..500 {
            let len = rng.gen_range(1..40);
            let values: Vec<f64> = (0..len).map(|_| rng.gen_range(-1e3..1e3)).collect();
            let summary = aggregate(&values).unwrap();

            assert!(summary.min <= summary.mean);
            assert!(summary.mean <= summary.max);
            assert_eq!(summary.percentiles.p0, summary.min);
            assert_eq!(summary.percentiles.p100, summary.max);
            assert!(summary.percentiles.p25 <= summary.percentiles.p50);
            assert!(summary.percentiles.p50 <= summary.percentiles.p75);
        }
    }

    #[test]
    fn test_aggregate_nan_yields_null_summary() {
        let summary = aggregate(&[1.0, f64::NAN]).unwrap();
        assert!(summary.mean.is_nan());
        assert!(summary.min.is_nan() && summary.max.is_nan());
        assert!(summary.percentiles.p50.is_nan());

        let json = serde_json::to_value(summary).unwrap();
        assert!(json["mean"].is_null());
        assert!(json["percentiles"]["100"].is_null());

        let infinite = aggregate(&[f64::NEG_INFINITY, 0.0, f64::INFINITY]).unwrap();
        assert_eq!(infinite.min, f64::NEG_INFINITY);
        assert_eq!(infinite.max, f64::INFINITY);
    }

    #[test]
    fn test_aggregate_repeated_value_keeps_mean_in_range() {
        let values = vec![0.1; 3];
        let summary = aggregate(&values).unwrap();
        assert!(summary.mean <= summary.max);
        assert!(summary.mean >= summary.min);
    }

    #[test]
    fn test_group_by_key_preserves_first_seen_order() {
        let a: OrderedMap<f64> = [("recall", 0.5), ("accuracy", 0.9)].into_iter().collect();
        let b: OrderedMap<f64> = [("accuracy", 0.8), ("f1", 0.3), ("recall", 0.4)].into_iter().collect();

        let grouped = group_by_key([&a, &b]);

        let keys: Vec<&str> = grouped.keys().collect();
        assert_eq!(keys, vec!["recall", "accuracy", "f1"]);
        assert_eq!(grouped.get("accuracy").unwrap(), &vec![0.9, 0.8]);
        assert_eq!(grouped.get("f1").unwrap(), &vec![0.3]);
    }

    #[test]
    fn test_ordered_map_serializes_in_order() {
        let map: OrderedMap<u32> = [("zeta", 1), ("alpha", 2)].into_iter().collect();
        let json = serde_json::to_string(&map).unwrap();
        assert_eq!(json, r#"{"zeta":1,"alpha":2}"#);
    }

    #[test]
    fn test_balance_counts_sorted_by_label() {
        let labels = ["b", "a", "b", "c", "b"];
        let balance = balance(labels.iter().copied());

        let keys: Vec<&str> = balance.counts.keys().collect();
        assert_eq!(keys, vec!["a", "b", "c"]);
        assert_eq!(balance.counts.get("b"), Some(&3));
        assert_abs_diff_eq!(balance.stats.unwrap().mean, 5.0 / 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_average_matrices() {
        let m1 = vec![vec![1.0, 0.0], vec![0.0, 3.0]];
        let m2 = vec![vec![3.0, 2.0], vec![0.0, 1.0]];

        let avg = average_matrices(&[m1, m2]).unwrap();
        assert_eq!(avg, vec![vec![2.0, 1.0], vec![0.0, 2.0]]);
    }

    #[test]
    fn test_average_matrices_shape_mismatch() {
        let m1 = vec![vec![1.0, 0.0]];
        let m2 = vec![vec![1.0]];
        assert!(average_matrices(&[m1, m2]).is_err());
        assert!(average_matrices(&[]).is_err());
    }
}
