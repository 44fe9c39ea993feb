//! Row-sparse coefficient matrix.

use std::collections::BTreeMap;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use super::{ClassRenumbering, MatrixError};

/// One `(class, weight)` entry of a coefficient row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Coef {
    pub class: usize,
    pub value: f64,
}

impl Coef {
    #[inline]
    pub fn new(class: usize, value: f64) -> Self {
        Self { class, value }
    }
}

/// Per-feature, per-class weights stored row-sparse.
///
/// Maps a feature index to a list of [`Coef`] with strictly increasing
/// class indices. Rows that were never touched are absent, so memory is
/// proportional to the number of stored `(feature, class)` pairs rather than
/// to `n_features × n_classes`.
///
/// A row is *dense* when it lists every class `0..n` in order. Adding a dense
/// vector to a dense row of the same length is an elementwise accumulation;
/// any other row is first materialized as dense.
///
/// # Example
///
/// ```
/// use plrm::repr::SparseCoefficientMatrix;
///
/// let mut m = SparseCoefficientMatrix::new();
/// m.add_dense_row(4, &[0.5, -0.5], 0.1).unwrap();
/// assert_eq!(m.get(4, 0), 0.05);
/// assert_eq!(m.get(4, 1), -0.05);
/// assert_eq!(m.get(9, 0), 0.0);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SparseCoefficientMatrix {
    rows: BTreeMap<usize, Vec<Coef>>,
}

impl SparseCoefficientMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored rows.
    #[inline]
    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    #[inline]
    pub fn has_row(&self, feature: usize) -> bool {
        self.rows.contains_key(&feature)
    }

    /// Sorted coefficients of `feature`, empty if the row is absent.
    #[inline]
    pub fn get_row(&self, feature: usize) -> &[Coef] {
        self.rows.get(&feature).map_or(&[], Vec::as_slice)
    }

    /// Single coefficient; absent entries read as zero.
    pub fn get(&self, feature: usize, class: usize) -> f64 {
        let row = self.get_row(feature);
        row.binary_search_by_key(&class, |c| c.class)
            .map_or(0.0, |i| row[i].value)
    }

    /// Iterate stored rows in feature order.
    pub fn iter_rows(&self) -> impl Iterator<Item = (usize, &[Coef])> + '_ {
        self.rows.iter().map(|(&f, row)| (f, row.as_slice()))
    }

    /// Stored feature indices in order.
    pub fn features(&self) -> impl Iterator<Item = usize> + '_ {
        self.rows.keys().copied()
    }

    // =========================================================================
    // Updates
    // =========================================================================

    /// Add `scalar * values` into row `feature`.
    ///
    /// `values[k]` is the increment direction for class `k`. A row of a
    /// different length is materialized dense over `values.len()` classes
    /// before accumulating; an absent row is allocated.
    ///
    /// # Errors
    ///
    /// [`MatrixError::LengthMismatch`] if the row stores a class at or beyond
    /// `values.len()`. The row is left untouched.
    pub fn add_dense_row(
        &mut self,
        feature: usize,
        values: &[f64],
        scalar: f64,
    ) -> Result<(), MatrixError> {
        let row = self.dense_row_mut(feature, values.len())?;
        for (c, &v) in row.iter_mut().zip(values) {
            c.value += scalar * v;
        }
        Ok(())
    }

    /// Like [`add_dense_row`](Self::add_dense_row), but never moves a
    /// coefficient across `crease`.
    ///
    /// When an update would carry a coefficient from one side of `crease` to
    /// the other, the coefficient is set to exactly `crease` and the matching
    /// entry of `values` is zeroed, so callers reusing the direction do not
    /// push through the crease again. Coefficients sitting exactly at the
    /// crease move freely.
    pub fn add_dense_row_capped(
        &mut self,
        feature: usize,
        values: &mut [f64],
        scalar: f64,
        crease: f64,
    ) -> Result<(), MatrixError> {
        let row = self.dense_row_mut(feature, values.len())?;
        for (c, v) in row.iter_mut().zip(values.iter_mut()) {
            let old = c.value - crease;
            let new = c.value + scalar * *v;
            let crossed = (old > 0.0 && new < crease) || (old < 0.0 && new > crease);
            if crossed {
                c.value = crease;
                *v = 0.0;
            } else {
                c.value = new;
            }
        }
        Ok(())
    }

    /// Merge `coefs` into row `feature`, overwriting classes already stored.
    ///
    /// # Errors
    ///
    /// [`MatrixError::UnsortedRow`] if `coefs` is not strictly increasing by class.
    pub fn set_elements(&mut self, feature: usize, coefs: &[Coef]) -> Result<(), MatrixError> {
        if coefs.windows(2).any(|w| w[0].class >= w[1].class) {
            return Err(MatrixError::UnsortedRow { feature });
        }
        if coefs.is_empty() {
            return Ok(());
        }

        let row = self.rows.entry(feature).or_default();
        let mut merged = Vec::with_capacity(row.len() + coefs.len());
        let (mut i, mut j) = (0, 0);
        while i < row.len() && j < coefs.len() {
            match row[i].class.cmp(&coefs[j].class) {
                std::cmp::Ordering::Less => {
                    merged.push(row[i]);
                    i += 1;
                }
                std::cmp::Ordering::Greater => {
                    merged.push(coefs[j]);
                    j += 1;
                }
                std::cmp::Ordering::Equal => {
                    merged.push(coefs[j]);
                    i += 1;
                    j += 1;
                }
            }
        }
        merged.extend_from_slice(&row[i..]);
        merged.extend_from_slice(&coefs[j..]);
        *row = merged;
        Ok(())
    }

    /// Set a single coefficient.
    pub fn set(&mut self, feature: usize, class: usize, value: f64) {
        // A single entry is trivially sorted.
        let _ = self.set_elements(feature, &[Coef::new(class, value)]);
    }

    /// Remove a row, returning its coefficients.
    pub fn drop_row(&mut self, feature: usize) -> Option<Vec<Coef>> {
        self.rows.remove(&feature)
    }

    /// Strip coefficients that are exactly zero; drops the row if nothing is left.
    ///
    /// Returns `true` if the row still exists.
    pub fn compress_row(&mut self, feature: usize) -> bool {
        let Some(row) = self.rows.get_mut(&feature) else {
            return false;
        };
        row.retain(|c| c.value != 0.0);
        if row.is_empty() {
            self.rows.remove(&feature);
            false
        } else {
            true
        }
    }

    /// [`compress_row`](Self::compress_row) on every row.
    pub fn compress(&mut self) {
        self.rows.retain(|_, row| {
            row.retain(|c| c.value != 0.0);
            !row.is_empty()
        });
    }

    /// Apply `f(class, &mut value)` to every stored coefficient of a row.
    pub fn update_row(&mut self, feature: usize, mut f: impl FnMut(usize, &mut f64)) {
        if let Some(row) = self.rows.get_mut(&feature) {
            for c in row.iter_mut() {
                f(c.class, &mut c.value);
            }
        }
    }

    /// `true` if the row is absent or all its coefficients are zero.
    pub fn is_row_zero(&self, feature: usize) -> bool {
        self.get_row(feature).iter().all(|c| c.value == 0.0)
    }

    /// Renumber classes, dropping deleted columns and rows left empty.
    ///
    /// # Errors
    ///
    /// [`MatrixError::RenumberingTooShort`] if a stored class is not covered.
    /// The matrix is unchanged on error.
    pub fn delete_columns(&mut self, renumbering: &ClassRenumbering) -> Result<(), MatrixError> {
        let mut rows = BTreeMap::new();
        for (&feature, row) in &self.rows {
            let mut new_row = Vec::with_capacity(row.len());
            for c in row {
                if let Some(class) = renumbering.map_class(c.class)? {
                    new_row.push(Coef::new(class, c.value));
                }
            }
            if !new_row.is_empty() {
                new_row.sort_by_key(|c| c.class);
                rows.insert(feature, new_row);
            }
        }
        self.rows = rows;
        Ok(())
    }

    // =========================================================================
    // Norms and scoring
    // =========================================================================

    /// Sum of squared coefficients.
    pub fn square_of_norm(&self) -> f64 {
        self.rows
            .values()
            .flat_map(|row| row.iter())
            .map(|c| c.value * c.value)
            .sum()
    }

    /// Sum of absolute coefficients.
    pub fn l1_norm(&self) -> f64 {
        self.rows
            .values()
            .flat_map(|row| row.iter())
            .map(|c| c.value.abs())
            .sum()
    }

    /// Number of non-zero coefficients.
    pub fn nz_count(&self) -> usize {
        self.rows
            .values()
            .flat_map(|row| row.iter())
            .filter(|c| c.value != 0.0)
            .count()
    }

    /// Accumulate `Σ_f x_f · w[f][k]` into `scores[k]` for the given features.
    ///
    /// # Errors
    ///
    /// [`MatrixError::ClassOutOfRange`] if a row stores a class beyond `scores.len()`.
    pub fn accumulate_dot(
        &self,
        features: &[(usize, f64)],
        scores: &mut [f64],
    ) -> Result<(), MatrixError> {
        for &(feature, x) in features {
            accumulate_row(feature, self.get_row(feature), x, scores)?;
        }
        Ok(())
    }

    /// Dense `[max_feature + 1, n_classes]` copy, for serialization layers.
    ///
    /// # Errors
    ///
    /// [`MatrixError::ClassOutOfRange`] if a stored class is `>= n_classes`.
    pub fn to_array(&self, n_classes: usize) -> Result<Array2<f64>, MatrixError> {
        let n_rows = self.rows.keys().next_back().map_or(0, |&f| f + 1);
        let mut out = Array2::zeros((n_rows, n_classes));
        for (&feature, row) in &self.rows {
            for c in row {
                if c.class >= n_classes {
                    return Err(MatrixError::ClassOutOfRange {
                        feature,
                        class: c.class,
                        n_classes,
                    });
                }
                out[[feature, c.class]] = c.value;
            }
        }
        Ok(out)
    }

    /// Row `feature` materialized dense over `n_classes`, allocated if absent.
    fn dense_row_mut(&mut self, feature: usize, n_classes: usize) -> Result<&mut Vec<Coef>, MatrixError> {
        let row = self.rows.entry(feature).or_default();
        if is_dense(row, n_classes) {
            return Ok(row);
        }
        if let Some(last) = row.last() {
            if last.class >= n_classes {
                return Err(MatrixError::LengthMismatch {
                    feature,
                    expected: last.class + 1,
                    got: n_classes,
                });
            }
        }
        let mut dense: Vec<Coef> = (0..n_classes).map(|class| Coef::new(class, 0.0)).collect();
        for c in row.iter() {
            dense[c.class].value = c.value;
        }
        *row = dense;
        Ok(row)
    }
}

/// A strictly increasing row of length `n` ending at `n - 1` lists every class.
#[inline]
fn is_dense(row: &[Coef], n_classes: usize) -> bool {
    row.len() == n_classes && row.last().map_or(true, |c| c.class + 1 == n_classes)
}

#[inline]
pub(crate) fn accumulate_row(
    feature: usize,
    row: &[Coef],
    x: f64,
    scores: &mut [f64],
) -> Result<(), MatrixError> {
    for c in row {
        let Some(score) = scores.get_mut(c.class) else {
            return Err(MatrixError::ClassOutOfRange {
                feature,
                class: c.class,
                n_classes: scores.len(),
            });
        };
        *score += x * c.value;
    }
    Ok(())
}

// =============================================================================
// Tests
// =============================================================================
