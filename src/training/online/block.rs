//! The block capability trait and its tagged dispatch.

use serde::{Deserialize, Serialize};

use super::{ExponentiatedGradientBlock, LearnerError, TruncatedGradientBlock};
use crate::data::{Example, TaskId};
use crate::model::{Algorithm, ConfigError, LearnerConfig};
use crate::repr::{ClassRenumbering, DenseAuxiliaryMatrix, SparseCoefficientMatrix};
use crate::training::asd::{AsdOutcome, AsdParams};

// =============================================================================
// BlockModel
// =============================================================================

/// What every learner block can do.
pub trait BlockModel {
    fn n_classes(&self) -> usize;

    /// Class probabilities of `example`.
    fn score(&self, example: &Example) -> Result<Vec<f64>, LearnerError>;

    /// Class log-probabilities of `example`.
    fn log_score(&self, example: &Example) -> Result<Vec<f64>, LearnerError>;

    /// Absorb one example for `task`. Returns `false` if it carries no label
    /// for the task and was skipped.
    fn absorb_example(&mut self, example: &Example, task: TaskId) -> Result<bool, LearnerError>;

    /// Settle deferred maintenance at the end of a pass.
    fn finish_absorb(&mut self);

    /// Absorb `examples` in order, then [`finish_absorb`](Self::finish_absorb).
    ///
    /// Returns the number of examples used.
    fn absorb(&mut self, examples: &[Example], task: TaskId) -> Result<usize, LearnerError> {
        let mut used = 0;
        for example in examples {
            if self.absorb_example(example, task)? {
                used += 1;
            }
        }
        self.finish_absorb();
        Ok(used)
    }

    /// Snapshot of the learned parameters with no deferred maintenance owed.
    fn export_state(&self) -> BlockState;

    /// Append a class. Returns its index.
    fn add_class(&mut self) -> usize;

    /// Renumber classes, dropping deleted columns.
    fn delete_classes(&mut self, renumbering: &ClassRenumbering) -> Result<(), LearnerError>;
}

// =============================================================================
// BlockState
// =============================================================================

/// Exported block parameters, for serialization layers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum BlockState {
    Sparse {
        n_classes: usize,
        matrix: SparseCoefficientMatrix,
    },
    Dual {
        n_classes: usize,
        positive: DenseAuxiliaryMatrix,
        negative: DenseAuxiliaryMatrix,
        scale: f64,
    },
}

impl BlockState {
    pub fn n_classes(&self) -> usize {
        match self {
            BlockState::Sparse { n_classes, .. } | BlockState::Dual { n_classes, .. } => *n_classes,
        }
    }
}

// =============================================================================
// LearnerBlock
// =============================================================================

/// A block of one of the supported algorithms.
///
/// Cloning is a deep copy: a branched block shares nothing with its source.
#[derive(Debug, Clone)]
pub enum LearnerBlock {
    TruncatedGradient(TruncatedGradientBlock),
    ExponentiatedGradient(ExponentiatedGradientBlock),
}

impl LearnerBlock {
    /// Empty block for `config.algorithm`.
    pub fn new(config: &LearnerConfig, n_classes: usize) -> Result<Self, ConfigError> {
        Ok(match config.algorithm {
            Algorithm::TruncatedGradient => {
                LearnerBlock::TruncatedGradient(TruncatedGradientBlock::new(config, n_classes)?)
            }
            Algorithm::ExponentiatedGradient { scale } => LearnerBlock::ExponentiatedGradient(
                ExponentiatedGradientBlock::new(config, n_classes, scale)?,
            ),
        })
    }

    /// Batch refinement; only truncated-gradient blocks support it.
    pub fn refine(
        &mut self,
        examples: &[Example],
        task: TaskId,
        params: AsdParams,
    ) -> Result<AsdOutcome, LearnerError> {
        match self {
            LearnerBlock::TruncatedGradient(b) => b.refine(examples, task, params),
            LearnerBlock::ExponentiatedGradient(_) => Err(LearnerError::BatchUnsupported),
        }
    }

    fn inner(&self) -> &dyn BlockModel {
        match self {
            LearnerBlock::TruncatedGradient(b) => b,
            LearnerBlock::ExponentiatedGradient(b) => b,
        }
    }

    fn inner_mut(&mut self) -> &mut dyn BlockModel {
        match self {
            LearnerBlock::TruncatedGradient(b) => b,
            LearnerBlock::ExponentiatedGradient(b) => b,
        }
    }
}

impl BlockModel for LearnerBlock {
    fn n_classes(&self) -> usize {
        self.inner().n_classes()
    }

    fn score(&self, example: &Example) -> Result<Vec<f64>, LearnerError> {
        self.inner().score(example)
    }

    fn log_score(&self, example: &Example) -> Result<Vec<f64>, LearnerError> {
        self.inner().log_score(example)
    }

    fn absorb_example(&mut self, example: &Example, task: TaskId) -> Result<bool, LearnerError> {
        self.inner_mut().absorb_example(example, task)
    }

    fn finish_absorb(&mut self) {
        self.inner_mut().finish_absorb()
    }

    fn export_state(&self) -> BlockState {
        self.inner().export_state()
    }

    fn add_class(&mut self) -> usize {
        self.inner_mut().add_class()
    }

    fn delete_classes(&mut self, renumbering: &ClassRenumbering) -> Result<(), LearnerError> {
        self.inner_mut().delete_classes(renumbering)
    }
}
