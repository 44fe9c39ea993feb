//! Sparse labeled training examples.

use serde::{Deserialize, Serialize};

/// Reserved feature index carrying the intercept.
///
/// Every [`Example`] holds this feature with value `1.0`, so row
/// `DUMMY_FEATURE` of a coefficient matrix acts as the per-class bias.
pub const DUMMY_FEATURE: usize = 0;

/// Identifier of a task (a set of mutually exclusive classes).
pub type TaskId = usize;

/// Errors raised while constructing an [`Example`].
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ExampleError {
    /// The reserved intercept feature was supplied with a value other than 1.0.
    #[error("feature {DUMMY_FEATURE} is reserved for the intercept, got value {0}")]
    ReservedFeature(f64),

    /// The same feature index occurs twice.
    #[error("duplicate feature index {0}")]
    DuplicateFeature(usize),

    /// A feature value is NaN or infinite.
    #[error("feature {feature} has non-finite value {value}")]
    NonFiniteValue { feature: usize, value: f64 },

    /// Multiplicity must be at least 1.
    #[error("multiplicity must be at least 1")]
    ZeroMultiplicity,
}

/// A sparse training example.
///
/// Features are stored as `(feature_index, value)` pairs sorted by index with
/// the intercept [`DUMMY_FEATURE`] always first. Explicit zeros are dropped.
///
/// Labels are kept per task: `labels[task]` is the true class index for that
/// task, or `None` if the example carries no label for it. Unlabeled tasks
/// skip the example during training.
///
/// `multiplicity` lets a data set collapse identical examples; batch
/// optimization weights each example by it.
///
/// # Example
///
/// ```
/// use plrm::data::{Example, DUMMY_FEATURE};
///
/// let ex = Example::labeled(vec![(7, 2.0), (3, 1.0)], 1).unwrap();
/// assert_eq!(ex.features(), &[(DUMMY_FEATURE, 1.0), (3, 1.0), (7, 2.0)]);
/// assert_eq!(ex.label(0), Some(1));
/// assert_eq!(ex.label(1), None);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Example {
    features: Vec<(usize, f64)>,
    labels: Vec<Option<usize>>,
    multiplicity: u32,
}

impl Example {
    /// Create an example from unsorted feature pairs and per-task labels.
    pub fn new(
        features: impl IntoIterator<Item = (usize, f64)>,
        labels: Vec<Option<usize>>,
    ) -> Result<Self, ExampleError> {
        let mut pairs: Vec<(usize, f64)> = Vec::new();
        for (feature, value) in features {
            if !value.is_finite() {
                return Err(ExampleError::NonFiniteValue { feature, value });
            }
            if feature == DUMMY_FEATURE {
                if value != 1.0 {
                    return Err(ExampleError::ReservedFeature(value));
                }
                continue;
            }
            if value != 0.0 {
                pairs.push((feature, value));
            }
        }
        pairs.sort_by_key(|&(feature, _)| feature);
        if let Some(w) = pairs.windows(2).find(|w| w[0].0 == w[1].0) {
            return Err(ExampleError::DuplicateFeature(w[0].0));
        }

        let mut features = Vec::with_capacity(pairs.len() + 1);
        features.push((DUMMY_FEATURE, 1.0));
        features.extend(pairs);

        Ok(Self {
            features,
            labels,
            multiplicity: 1,
        })
    }

    /// Example labeled for task 0 only.
    pub fn labeled(
        features: impl IntoIterator<Item = (usize, f64)>,
        class: usize,
    ) -> Result<Self, ExampleError> {
        Self::new(features, vec![Some(class)])
    }

    /// Example without any label.
    pub fn unlabeled(features: impl IntoIterator<Item = (usize, f64)>) -> Result<Self, ExampleError> {
        Self::new(features, Vec::new())
    }

    /// Set the multiplicity (number of identical copies this example stands for).
    pub fn with_multiplicity(mut self, multiplicity: u32) -> Result<Self, ExampleError> {
        if multiplicity == 0 {
            return Err(ExampleError::ZeroMultiplicity);
        }
        self.multiplicity = multiplicity;
        Ok(self)
    }

    /// Active features, sorted, intercept first.
    #[inline]
    pub fn features(&self) -> &[(usize, f64)] {
        &self.features
    }

    /// True class for `task`, if labeled.
    #[inline]
    pub fn label(&self, task: TaskId) -> Option<usize> {
        self.labels.get(task).copied().flatten()
    }

    /// All per-task labels.
    #[inline]
    pub fn labels(&self) -> &[Option<usize>] {
        &self.labels
    }

    #[inline]
    pub fn multiplicity(&self) -> u32 {
        self.multiplicity
    }

    /// Squared Euclidean norm of the feature vector, intercept included.
    pub fn square_norm(&self) -> f64 {
        self.features.iter().map(|&(_, v)| v * v).sum()
    }
}
