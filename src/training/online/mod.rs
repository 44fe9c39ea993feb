//! Online learners.
//!
//! A learner keeps one *block* per task. Every block implements
//! [`BlockModel`]: score an example, absorb labeled examples one at a time,
//! and export its state. The update rule is picked by the tagged
//! [`LearnerBlock`] variant:
//!
//! - [`TruncatedGradientBlock`]: additive softmax gradient steps on a sparse
//!   matrix with lazy truncation. Supports batch refinement.
//! - [`ExponentiatedGradientBlock`]: multiplicative updates on a dual
//!   `V⁺`/`V⁻` pair with L1-bounded effective weights.
//!
//! [`Learner`] owns the blocks of every task.

mod block;
mod exponentiated;
mod learner;
mod truncated;

pub use block::{BlockModel, BlockState, LearnerBlock};
pub use exponentiated::ExponentiatedGradientBlock;
pub use learner::Learner;
pub use truncated::TruncatedGradientBlock;

use crate::data::TaskId;
use crate::model::ConfigError;
use crate::repr::MatrixError;
use crate::training::asd::AsdError;
use crate::training::prior::PriorError;

/// Errors raised by learners and their blocks.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LearnerError {
    #[error("no block for task {0}")]
    UnknownTask(TaskId),

    #[error("task {0} already has a block")]
    TaskExists(TaskId),

    #[error("label {label} out of range for {n_classes} classes")]
    LabelOutOfRange { label: usize, n_classes: usize },

    /// The block's update rule has no batch counterpart.
    #[error("batch refinement is not supported by this block")]
    BatchUnsupported,

    #[error(transparent)]
    Matrix(#[from] MatrixError),

    #[error(transparent)]
    Prior(#[from] PriorError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Asd(#[from] AsdError),
}
