//! Training: everything that mutates a model.
//!
//! ## Online
//!
//! - [`Learner`]: one block per task, absorbing examples one at a time
//! - [`TruncatedGradientBlock`], [`ExponentiatedGradientBlock`]: update rules
//! - [`TruncationPolicy`]: lazy periodic shrinkage
//! - [`Prior`], [`PriorSet`]: Gaussian/Laplace shrinkage rules and their scopes
//!
//! ## Batch
//!
//! - [`AsdOptimizer`]: Adaptive Steepest Descent to a penalized optimum
//!
//! ## Shared
//!
//! - [`softmax`]: stabilized scoring and residuals
//! - [`TrainingLogger`], [`Verbosity`]: gated logging

pub mod asd;
mod logger;
pub mod online;
mod prior;
pub mod softmax;
mod truncation;

pub use asd::{AsdError, AsdOptimizer, AsdOutcome, AsdParams, StepSizeMode, Termination};
pub use logger::{TrainingLogger, Verbosity};
pub use online::{
    BlockModel, BlockState, ExponentiatedGradientBlock, Learner, LearnerBlock, LearnerError,
    TruncatedGradientBlock,
};
pub use prior::{PowerMemo, Prior, PriorError, PriorKind, PriorSet, Skew};
pub use truncation::{Replay, Truncatable, TruncationParams, TruncationPolicy};
