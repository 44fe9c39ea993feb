//! Dense-row auxiliary matrix.

use std::collections::BTreeMap;

use ndarray::Array2;
use serde::{Deserialize, Serialize};

use super::{ClassRenumbering, MatrixError};

/// Sparse in features, dense across classes.
///
/// Every stored row has exactly `n_classes` entries; absent rows read as all
/// zeros. Growing the class count extends every stored row eagerly, so a
/// length mismatch on update is always a caller fault.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DenseAuxiliaryMatrix {
    n_classes: usize,
    rows: BTreeMap<usize, Vec<f64>>,
}

impl DenseAuxiliaryMatrix {
    pub fn new(n_classes: usize) -> Self {
        Self {
            n_classes,
            rows: BTreeMap::new(),
        }
    }

    #[inline]
    pub fn n_classes(&self) -> usize {
        self.n_classes
    }

    #[inline]
    pub fn n_rows(&self) -> usize {
        self.rows.len()
    }

    #[inline]
    pub fn get_row(&self, feature: usize) -> Option<&[f64]> {
        self.rows.get(&feature).map(Vec::as_slice)
    }

    #[inline]
    pub fn get(&self, feature: usize, class: usize) -> f64 {
        self.rows
            .get(&feature)
            .and_then(|row| row.get(class))
            .copied()
            .unwrap_or(0.0)
    }

    pub fn iter_rows(&self) -> impl Iterator<Item = (usize, &[f64])> + '_ {
        self.rows.iter().map(|(&f, row)| (f, row.as_slice()))
    }

    pub fn features(&self) -> impl Iterator<Item = usize> + '_ {
        self.rows.keys().copied()
    }

    /// Add `scalar * values` into row `feature`, allocating it if absent.
    pub fn add_dense_row(
        &mut self,
        feature: usize,
        values: &[f64],
        scalar: f64,
    ) -> Result<(), MatrixError> {
        self.check_len(feature, values.len())?;
        let row = self.row_mut(feature);
        for (w, &v) in row.iter_mut().zip(values) {
            *w += scalar * v;
        }
        Ok(())
    }

    /// Add `delta` to a single entry, allocating the row if absent.
    pub fn add(&mut self, feature: usize, class: usize, delta: f64) -> Result<(), MatrixError> {
        if class >= self.n_classes {
            return Err(MatrixError::ClassOutOfRange {
                feature,
                class,
                n_classes: self.n_classes,
            });
        }
        self.row_mut(feature)[class] += delta;
        Ok(())
    }

    /// Replace row `feature`.
    pub fn set_row(&mut self, feature: usize, values: Vec<f64>) -> Result<(), MatrixError> {
        self.check_len(feature, values.len())?;
        self.rows.insert(feature, values);
        Ok(())
    }

    pub fn drop_row(&mut self, feature: usize) -> Option<Vec<f64>> {
        self.rows.remove(&feature)
    }

    /// Drop the row if every entry is zero. Returns `true` if the row still exists.
    pub fn compress_row(&mut self, feature: usize) -> bool {
        if self.is_row_zero(feature) {
            self.rows.remove(&feature);
            false
        } else {
            true
        }
    }

    pub fn update_row(&mut self, feature: usize, mut f: impl FnMut(usize, &mut f64)) {
        if let Some(row) = self.rows.get_mut(&feature) {
            for (class, v) in row.iter_mut().enumerate() {
                f(class, v);
            }
        }
    }

    pub fn is_row_zero(&self, feature: usize) -> bool {
        self.rows
            .get(&feature)
            .map_or(true, |row| row.iter().all(|&v| v == 0.0))
    }

    /// Append a zero column to every row.
    pub fn add_class(&mut self) {
        self.n_classes += 1;
        for row in self.rows.values_mut() {
            row.push(0.0);
        }
    }

    /// Renumber classes; the map must cover exactly the current classes.
    pub fn delete_columns(&mut self, renumbering: &ClassRenumbering) -> Result<(), MatrixError> {
        if renumbering.len() < self.n_classes {
            return Err(MatrixError::RenumberingTooShort {
                len: renumbering.len(),
                class: self.n_classes - 1,
            });
        }
        let n_new = renumbering.new_class_count();
        let mut rows = BTreeMap::new();
        for (&feature, row) in &self.rows {
            let mut new_row = vec![0.0; n_new];
            for (class, &v) in row.iter().enumerate() {
                if let Some(new) = renumbering.map_class(class)? {
                    new_row[new] = v;
                }
            }
            rows.insert(feature, new_row);
        }
        self.rows = rows;
        self.n_classes = n_new;
        Ok(())
    }

    pub fn square_of_norm(&self) -> f64 {
        self.rows.values().flatten().map(|v| v * v).sum()
    }

    pub fn l1_norm(&self) -> f64 {
        self.rows.values().flatten().map(|v| v.abs()).sum()
    }

    pub fn nz_count(&self) -> usize {
        self.rows.values().flatten().filter(|&&v| v != 0.0).count()
    }

    /// Dense `[max_feature + 1, n_classes]` copy.
    pub fn to_array(&self) -> Array2<f64> {
        let n_rows = self.rows.keys().next_back().map_or(0, |&f| f + 1);
        let mut out = Array2::zeros((n_rows, self.n_classes));
        for (&feature, row) in &self.rows {
            for (class, &v) in row.iter().enumerate() {
                out[[feature, class]] = v;
            }
        }
        out
    }

    fn check_len(&self, feature: usize, got: usize) -> Result<(), MatrixError> {
        if got != self.n_classes {
            return Err(MatrixError::LengthMismatch {
                feature,
                expected: self.n_classes,
                got,
            });
        }
        Ok(())
    }

    fn row_mut(&mut self, feature: usize) -> &mut Vec<f64> {
        let n_classes = self.n_classes;
        self.rows
            .entry(feature)
            .or_insert_with(|| vec![0.0; n_classes])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_rows_read_zero() {
        let m = DenseAuxiliaryMatrix::new(3);
        assert_eq!(m.get(4, 2), 0.0);
        assert!(m.get_row(4).is_none());
        assert!(m.is_row_zero(4));
    }

    #[test]
    fn add_dense_row_checks_length() {
        let mut m = DenseAuxiliaryMatrix::new(2);
        m.add_dense_row(1, &[1.0, 2.0], 0.5).unwrap();
        assert_eq!(m.get_row(1), Some(&[0.5, 1.0][..]));

        let err = m.add_dense_row(1, &[1.0, 2.0, 3.0], 1.0).unwrap_err();
        assert!(matches!(err, MatrixError::LengthMismatch { expected: 2, got: 3, .. }));
    }

    #[test]
    fn single_entry_add() {
        let mut m = DenseAuxiliaryMatrix::new(3);
        m.add(0, 2, 1.5).unwrap();
        assert_eq!(m.get_row(0), Some(&[0.0, 0.0, 1.5][..]));
        assert!(m.add(0, 3, 1.0).is_err());
    }

    #[test]
    fn class_growth_and_deletion() {
        let mut m = DenseAuxiliaryMatrix::new(2);
        m.set_row(0, vec![1.0, 2.0]).unwrap();
        m.add_class();
        assert_eq!(m.get_row(0), Some(&[1.0, 2.0, 0.0][..]));

        m.delete_columns(&ClassRenumbering::deleting(3, &[0])).unwrap();
        assert_eq!(m.n_classes(), 2);
        assert_eq!(m.get_row(0), Some(&[2.0, 0.0][..]));
    }

    #[test]
    fn compress_drops_zero_rows() {
        let mut m = DenseAuxiliaryMatrix::new(2);
        m.set_row(3, vec![0.0, 0.0]).unwrap();
        m.set_row(4, vec![0.0, 1.0]).unwrap();
        assert!(!m.compress_row(3));
        assert!(m.compress_row(4));
        assert_eq!(m.n_rows(), 1);
        assert_eq!(m.nz_count(), 1);
        assert_eq!(m.l1_norm(), 1.0);
        assert_eq!(m.to_array().shape(), &[5, 2]);
    }
}
