//! Coefficient matrix representations.
//!
//! - [`SparseCoefficientMatrix`]: row-sparse per-feature, per-class weights.
//!   Each row is a list of [`Coef`] sorted by class.
//! - [`DenseAuxiliaryMatrix`]: sparse in features, dense across classes.
//!   Used for the latent `V⁺`/`V⁻` pair of the exponentiated-gradient learner.
//!
//! Both grow monotonically as features are observed and shrink their class
//! dimension only through [`ClassRenumbering`].

mod dense_aux;
mod sparse;

pub use dense_aux::DenseAuxiliaryMatrix;
pub use sparse::{Coef, SparseCoefficientMatrix};
pub(crate) use sparse::accumulate_row;

use serde::{Deserialize, Serialize};

// =============================================================================
// MatrixError
// =============================================================================

/// Data-integrity faults raised by matrix operations.
///
/// These indicate a corrupted matrix or a caller bug; nothing is truncated
/// or padded to hide them.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MatrixError {
    /// A dense vector does not cover the columns stored in a row.
    #[error("row {feature}: length mismatch, expected at least {expected} columns, got {got}")]
    LengthMismatch {
        feature: usize,
        expected: usize,
        got: usize,
    },

    /// A stored class index is outside the declared class count.
    #[error("row {feature}: class {class} out of range for {n_classes} classes")]
    ClassOutOfRange {
        feature: usize,
        class: usize,
        n_classes: usize,
    },

    /// Coefficients passed to a merge are not strictly increasing by class.
    #[error("row {feature}: coefficients are not sorted by strictly increasing class")]
    UnsortedRow { feature: usize },

    /// The renumbering map does not cover every stored class.
    #[error("renumbering covers {len} classes but class {class} is stored")]
    RenumberingTooShort { len: usize, class: usize },

    /// Two old classes map to the same new class.
    #[error("renumbering maps more than one class to {0}")]
    InvalidRenumbering(usize),
}

// =============================================================================
// ClassRenumbering
// =============================================================================

/// Old class index → new class index, or deleted.
///
/// Supplied when a task's class set shrinks. Entry `i` is the new index of
/// old class `i`, or `None` if the class is removed.
///
/// # Example
///
/// ```
/// use plrm::repr::ClassRenumbering;
///
/// // Delete class 1 of 3; class 2 becomes 1.
/// let map = ClassRenumbering::deleting(3, &[1]);
/// assert_eq!(map.get(0), Some(0));
/// assert_eq!(map.get(1), None);
/// assert_eq!(map.get(2), Some(1));
/// assert_eq!(map.new_class_count(), 2);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassRenumbering {
    map: Vec<Option<usize>>,
}

impl ClassRenumbering {
    /// Create from an explicit map. New indices must be unique.
    pub fn new(map: Vec<Option<usize>>) -> Result<Self, MatrixError> {
        let mut seen = map.iter().flatten().copied().collect::<Vec<_>>();
        seen.sort_unstable();
        if let Some(w) = seen.windows(2).find(|w| w[0] == w[1]) {
            return Err(MatrixError::InvalidRenumbering(w[0]));
        }
        Ok(Self { map })
    }

    /// Delete `deleted` classes out of `n_classes`, compacting the rest in order.
    pub fn deleting(n_classes: usize, deleted: &[usize]) -> Self {
        let mut next = 0;
        let map = (0..n_classes)
            .map(|class| {
                if deleted.contains(&class) {
                    None
                } else {
                    next += 1;
                    Some(next - 1)
                }
            })
            .collect();
        Self { map }
    }

    /// Identity map on `n_classes` classes.
    pub fn identity(n_classes: usize) -> Self {
        Self {
            map: (0..n_classes).map(Some).collect(),
        }
    }

    /// New index of `old`, or `None` if deleted or not covered.
    #[inline]
    pub fn get(&self, old: usize) -> Option<usize> {
        self.map.get(old).copied().flatten()
    }

    /// Number of old classes covered.
    #[inline]
    pub fn len(&self) -> usize {
        self.map.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }

    /// Class count after renumbering (largest new index + 1).
    pub fn new_class_count(&self) -> usize {
        self.map.iter().flatten().map(|&c| c + 1).max().unwrap_or(0)
    }

    /// Map `old`, failing if it is not covered by the map.
    pub(crate) fn map_class(&self, old: usize) -> Result<Option<usize>, MatrixError> {
        match self.map.get(old) {
            Some(&new) => Ok(new),
            None => Err(MatrixError::RenumberingTooShort {
                len: self.map.len(),
                class: old,
            }),
        }
    }
}
