//! Testing utilities for plrm.
//!
//! Small deterministic data sets and approximate comparison helpers shared by
//! unit tests, integration tests and benchmarks.
//!
//! ```
//! use plrm::testing::{assert_slice_approx_eq, toy_examples, DEFAULT_TOLERANCE};
//!
//! let data = toy_examples();
//! assert_eq!(data.len(), 3);
//! assert_slice_approx_eq(&[0.5, 0.5], &[0.5, 0.5], DEFAULT_TOLERANCE, "uniform");
//! ```

use std::collections::BTreeSet;

use approx::AbsDiffEq;

use crate::data::Example;
use crate::repr::SparseCoefficientMatrix;

// =============================================================================
// Constants
// =============================================================================

/// Default tolerance for probability and coefficient comparisons.
pub const DEFAULT_TOLERANCE: f64 = 1e-9;

// =============================================================================
// Assertions
// =============================================================================

/// Assert that two slices are approximately equal element-wise.
///
/// # Panics
///
/// Panics if lengths differ or any element differs by more than tolerance.
pub fn assert_slice_approx_eq(actual: &[f64], expected: &[f64], tolerance: f64, context: &str) {
    assert_eq!(
        actual.len(),
        expected.len(),
        "{context}: length mismatch - got {}, expected {}",
        actual.len(),
        expected.len()
    );

    for (i, (a, e)) in actual.iter().zip(expected.iter()).enumerate() {
        assert!(
            a.abs_diff_eq(e, tolerance),
            "{context}[{i}]: {a} ≠ {e} (diff={}, tolerance={tolerance})",
            (a - e).abs()
        );
    }
}

/// Assert that two matrices hold approximately the same coefficients.
///
/// Absent entries compare as zero, so a dropped row equals a stored row of
/// zeros.
pub fn assert_matrix_approx_eq(
    actual: &SparseCoefficientMatrix,
    expected: &SparseCoefficientMatrix,
    tolerance: f64,
) {
    let entries = |m: &SparseCoefficientMatrix| {
        m.iter_rows()
            .flat_map(|(f, row)| row.iter().map(move |c| (f, c.class)))
            .collect::<BTreeSet<_>>()
    };
    for (feature, class) in entries(actual).union(&entries(expected)) {
        let a = actual.get(*feature, *class);
        let e = expected.get(*feature, *class);
        assert!(
            a.abs_diff_eq(&e, tolerance),
            "w[{feature}][{class}]: {a} ≠ {e} (diff={}, tolerance={tolerance})",
            (a - e).abs()
        );
    }
}

// =============================================================================
// Data sets
// =============================================================================

/// Three examples, two features, two classes, labeled for task 0.
///
/// Feature 1 indicates class 0, feature 2 indicates class 1, and the third
/// example mixes both.
pub fn toy_examples() -> Vec<Example> {
    vec![
        labeled(&[(1, 1.0)], 0),
        labeled(&[(2, 1.0)], 1),
        labeled(&[(1, 0.5), (2, 0.5)], 1),
    ]
}

/// Deterministic sparse data set for task 0.
///
/// Each example activates up to three of `n_features` features (indices
/// `1..=n_features`) with values in `[0.25, 1.25]`. The label is a function
/// of the first active feature, so the data are learnable but noisy.
pub fn synthetic_examples(n_examples: usize, n_features: usize, n_classes: usize) -> Vec<Example> {
    let n_features = n_features.max(1);
    let n_classes = n_classes.max(1);
    (0..n_examples)
        .map(|i| {
            let features: Vec<(usize, f64)> = (0..3)
                .map(|j| {
                    let feature = 1 + (i * 7 + j * 13 + i / 3) % n_features;
                    let value = 0.25 + ((i + 2 * j) % 5) as f64 / 4.0;
                    (feature, value)
                })
                .collect::<std::collections::BTreeMap<_, _>>()
                .into_iter()
                .collect();
            let first = features[0].0;
            let label = if i % 11 == 0 {
                (first + 1) % n_classes
            } else {
                first % n_classes
            };
            labeled(&features, label)
        })
        .collect()
}

fn labeled(features: &[(usize, f64)], class: usize) -> Example {
    // Indices are unique, non-zero and values finite by construction.
    match Example::labeled(features.iter().copied(), class) {
        Ok(example) => example,
        Err(e) => unreachable!("fixture example is valid: {e}"),
    }
}
