//! plrm: sparse polytomous logistic regression.
//!
//! Multi-class linear softmax classifiers trained online from a stream of
//! sparse examples, with lazy prior-based regularization, and refined to
//! convergence in full-batch mode.
//!
//! # Key Types
//!
//! - [`Example`] - Sparse feature vector with per-task labels
//! - [`SparseCoefficientMatrix`] - Row-sparse per-feature, per-class weights
//! - [`LearnerConfig`] - Configuration builder
//! - [`Learner`] - One block per task, absorbing examples online
//! - [`AsdOptimizer`] - Batch refinement by Adaptive Steepest Descent
//!
//! # Example
//!
//! ```
//! use plrm::{Example, Learner, LearnerConfig};
//! use plrm::training::{AsdParams, Prior, PriorSet};
//!
//! let config = LearnerConfig::builder()
//!     .learning_rate(0.1)
//!     .priors(PriorSet::uniform(Prior::gaussian(0.0, 1.0)))
//!     .build()
//!     .unwrap();
//!
//! let mut learner = Learner::new(config);
//! learner.create_block(0, 2).unwrap();
//!
//! let data = vec![
//!     Example::labeled([(1, 1.0)], 0).unwrap(),
//!     Example::labeled([(2, 1.0)], 1).unwrap(),
//! ];
//! learner.absorb(&data).unwrap();
//! learner.refine(0, &data, AsdParams::default()).unwrap();
//!
//! let p = learner.score(0, &data[1]).unwrap();
//! assert!(p[1] > 0.5);
//! ```

// Re-export approx traits for users who want to compare scores
pub use approx;

pub mod data;
pub mod model;
pub mod repr;
pub mod testing;
pub mod training;

// =============================================================================
// Convenience Re-exports
// =============================================================================

pub use data::{Example, ExampleError, TaskId, DUMMY_FEATURE};
pub use model::{Algorithm, ConfigError, LearnerConfig};
pub use repr::{ClassRenumbering, Coef, DenseAuxiliaryMatrix, MatrixError, SparseCoefficientMatrix};
pub use training::{AsdOptimizer, AsdOutcome, AsdParams, Learner, LearnerError, Prior, PriorSet};
