// SPDX-License-Identifier: AGPL-3.0-or-later
// SPDX-FileCopyrightText: 2024 Hyperpolymath

//! Deterministic datasets shared by unit tests

use crate::datasets::{Cell, Dataset};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;

const SPECIES: [(&str, [f64; 4]); 3] = [
    ("setosa", [5.0, 3.4, 1.5, 0.25]),
    ("versicolor", [5.9, 2.8, 4.3, 1.3]),
    ("virginica", [6.6, 3.0, 5.5, 2.0]),
];

/// 150 rows, 4 features, 3 text-labelled classes of 50
pub(crate) fn iris_like(seed: u64) -> Dataset {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let header = ["id", "sepal_length", "sepal_width", "petal_length", "petal_width", "species"]
        .map(String::from)
        .to_vec();

    let mut rows = Vec::with_capacity(150);
    for (class, (name, centre)) in SPECIES.iter().enumerate() {
        for i in 0..50 {
            let mut row = vec![Cell::Number((class * 50 + i) as f64)];
            for mean in centre {
                let noise: f64 = rng.gen_range(-0.4..0.4);
                row.push(Cell::Number(((mean + noise) * 100.0).round() / 100.0));
            }
            row.push(Cell::Text(name.to_string()));
            rows.push(row);
        }
    }

    // from_rows only fails on malformed headers
    Dataset::from_rows("iris", header, rows).unwrap()
}

/// y = 1.5 * a - 2 * b + 4 + noise over 60 rows
pub(crate) fn linear_like(seed: u64) -> Dataset {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let header = ["id", "a", "b", "target"].map(String::from).to_vec();

    let rows = (0..60)
        .map(|i| {
            let a: f64 = rng.gen_range(0.0..10.0);
            let b: f64 = rng.gen_range(-5.0..5.0);
            let noise: f64 = rng.gen_range(-0.1..0.1);
            vec![
                Cell::Number(i as f64),
                Cell::Number(a),
                Cell::Number(b),
                Cell::Number(1.5 * a - 2.0 * b + 4.0 + noise),
            ]
        })
        .collect();

    Dataset::from_rows("linear", header, rows).unwrap()
}
