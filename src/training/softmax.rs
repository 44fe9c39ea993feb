//! Stabilized softmax scoring and residuals.

use crate::data::Example;
use crate::repr::{MatrixError, SparseCoefficientMatrix};

// =============================================================================
// Transforms
// =============================================================================

/// Softmax in place: `p_k = exp(s_k − max) / Σ exp(s_j − max)`.
#[inline]
pub fn softmax_in_place(scores: &mut [f64]) {
    if scores.is_empty() {
        return;
    }

    // Subtract max for numerical stability
    let max_val = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);

    let mut sum = 0.0;
    for s in scores.iter_mut() {
        *s = (*s - max_val).exp();
        sum += *s;
    }

    if sum > 0.0 {
        for s in scores.iter_mut() {
            *s /= sum;
        }
    }
}

/// Log-softmax in place: `log p_k = (s_k − max) − log Σ exp(s_j − max)`.
#[inline]
pub fn log_softmax_in_place(scores: &mut [f64]) {
    if scores.is_empty() {
        return;
    }

    let max_val = scores.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let log_norm = scores.iter().map(|&s| (s - max_val).exp()).sum::<f64>().ln();
    for s in scores.iter_mut() {
        *s = (*s - max_val) - log_norm;
    }
}

// =============================================================================
// Scoring
// =============================================================================

/// Raw per-class dot products `Σ_f x_f · w[f][k]`.
pub fn dot_products(
    matrix: &SparseCoefficientMatrix,
    example: &Example,
    n_classes: usize,
) -> Result<Vec<f64>, MatrixError> {
    let mut scores = vec![0.0; n_classes];
    matrix.accumulate_dot(example.features(), &mut scores)?;
    Ok(scores)
}

/// Class probabilities of `example` under `matrix`.
pub fn apply_model(
    matrix: &SparseCoefficientMatrix,
    example: &Example,
    n_classes: usize,
) -> Result<Vec<f64>, MatrixError> {
    let mut scores = dot_products(matrix, example, n_classes)?;
    softmax_in_place(&mut scores);
    Ok(scores)
}

/// Class log-probabilities of `example` under `matrix`.
pub fn apply_model_log(
    matrix: &SparseCoefficientMatrix,
    example: &Example,
    n_classes: usize,
) -> Result<Vec<f64>, MatrixError> {
    let mut scores = dot_products(matrix, example, n_classes)?;
    log_softmax_in_place(&mut scores);
    Ok(scores)
}

/// Residual `1{k = label} − p_k`, or `None` without a label.
///
/// A label outside `probs` yields `None` as well; callers that must reject
/// such labels check them first.
pub fn adj_weights(probs: &[f64], label: Option<usize>) -> Option<Vec<f64>> {
    let label = label.filter(|&l| l < probs.len())?;
    let mut residual: Vec<f64> = probs.iter().map(|&p| -p).collect();
    residual[label] += 1.0;
    Some(residual)
}
