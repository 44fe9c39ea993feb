//! Truncated-gradient learner block.

use super::{BlockModel, BlockState, LearnerError};
use crate::data::{Example, TaskId};
use crate::model::{ConfigError, LearnerConfig};
use crate::repr::{accumulate_row, ClassRenumbering, MatrixError, SparseCoefficientMatrix};
use crate::training::asd::{AsdOptimizer, AsdOutcome, AsdParams};
use crate::training::prior::PriorSet;
use crate::training::softmax::{adj_weights, apply_model, log_softmax_in_place, softmax_in_place};
use crate::training::truncation::TruncationPolicy;

/// Online softmax regression with lazily truncated sparse weights.
///
/// For each labeled example:
///
/// 1. flush owed truncation on every active row,
/// 2. score the example and form the residual `1{k = y} − p_k`,
/// 3. add `η·x_f·residual` into every active row,
/// 4. count the example toward the next truncation epoch.
///
/// Rows of features never seen stay absent.
#[derive(Debug, Clone)]
pub struct TruncatedGradientBlock {
    n_classes: usize,
    learning_rate: f64,
    matrix: SparseCoefficientMatrix,
    truncation: TruncationPolicy,
    priors: Option<PriorSet>,
    gravity: f64,
}

impl TruncatedGradientBlock {
    pub fn new(config: &LearnerConfig, n_classes: usize) -> Result<Self, ConfigError> {
        if n_classes == 0 {
            return Err(ConfigError::InvalidClassCount(n_classes));
        }
        Ok(Self {
            n_classes,
            learning_rate: config.learning_rate,
            matrix: SparseCoefficientMatrix::new(),
            truncation: config.truncation_policy()?,
            priors: config.priors.clone(),
            gravity: config.truncation.gravity,
        })
    }

    /// Stored weights. Rows may still owe truncation; see
    /// [`finish_absorb`](BlockModel::finish_absorb).
    pub fn matrix(&self) -> &SparseCoefficientMatrix {
        &self.matrix
    }

    pub fn truncation(&self) -> &TruncationPolicy {
        &self.truncation
    }

    /// Restore weights, e.g. from a persisted model. The new rows owe no
    /// truncation.
    pub fn set_matrix(&mut self, matrix: SparseCoefficientMatrix) -> Result<(), LearnerError> {
        let out_of_range = matrix.iter_rows().find_map(|(feature, row)| {
            row.last()
                .filter(|c| c.class >= self.n_classes)
                .map(|c| (feature, c.class))
        });
        if let Some((feature, class)) = out_of_range {
            return Err(MatrixError::ClassOutOfRange {
                feature,
                class,
                n_classes: self.n_classes,
            }
            .into());
        }
        self.truncation.apply_truncation_to_all_rows(&mut []);
        self.matrix = matrix;
        Ok(())
    }

    /// Raw dot products using rows as they read after owed truncation.
    fn dot_products(&self, example: &Example) -> Result<Vec<f64>, LearnerError> {
        let mut scores = vec![0.0; self.n_classes];
        for &(feature, x) in example.features() {
            let row = self.matrix.get_row(feature);
            if self.truncation.pending(feature) == 0 {
                accumulate_row(feature, row, x, &mut scores)?;
            } else {
                let effective = self.truncation.effective_row(feature, row);
                accumulate_row(feature, &effective, x, &mut scores)?;
            }
        }
        Ok(scores)
    }

    /// Refine the weights to convergence on `examples` for `task`.
    ///
    /// Owed truncation is flushed first. Uses the block's priors, or its
    /// gravity when none are configured.
    pub fn refine(
        &mut self,
        examples: &[Example],
        task: TaskId,
        params: AsdParams,
    ) -> Result<AsdOutcome, LearnerError> {
        self.finish_absorb();
        let optimizer = AsdOptimizer::new(params, self.priors.as_ref(), self.gravity)?;
        Ok(optimizer.optimize(&mut self.matrix, self.n_classes, examples, task)?)
    }
}

impl BlockModel for TruncatedGradientBlock {
    fn n_classes(&self) -> usize {
        self.n_classes
    }

    fn score(&self, example: &Example) -> Result<Vec<f64>, LearnerError> {
        let mut scores = self.dot_products(example)?;
        softmax_in_place(&mut scores);
        Ok(scores)
    }

    fn log_score(&self, example: &Example) -> Result<Vec<f64>, LearnerError> {
        let mut scores = self.dot_products(example)?;
        log_softmax_in_place(&mut scores);
        Ok(scores)
    }

    fn absorb_example(&mut self, example: &Example, task: TaskId) -> Result<bool, LearnerError> {
        let Some(label) = example.label(task) else {
            return Ok(false);
        };
        if label >= self.n_classes {
            return Err(LearnerError::LabelOutOfRange {
                label,
                n_classes: self.n_classes,
            });
        }

        for &(feature, _) in example.features() {
            self.truncation
                .apply_truncation(feature, &mut [&mut self.matrix]);
        }

        let probs = apply_model(&self.matrix, example, self.n_classes)?;
        let Some(residual) = adj_weights(&probs, Some(label)) else {
            return Ok(false);
        };
        for &(feature, x) in example.features() {
            self.matrix
                .add_dense_row(feature, &residual, self.learning_rate * x)?;
        }

        self.truncation.request_truncation();
        Ok(true)
    }

    fn finish_absorb(&mut self) {
        self.truncation
            .apply_truncation_to_all_rows(&mut [&mut self.matrix]);
    }

    fn export_state(&self) -> BlockState {
        let mut matrix = self.matrix.clone();
        let mut truncation = self.truncation.clone();
        truncation.apply_truncation_to_all_rows(&mut [&mut matrix]);
        BlockState::Sparse {
            n_classes: self.n_classes,
            matrix,
        }
    }

    fn add_class(&mut self) -> usize {
        self.n_classes += 1;
        self.n_classes - 1
    }

    fn delete_classes(&mut self, renumbering: &ClassRenumbering) -> Result<(), LearnerError> {
        let n_new = renumbering.new_class_count();
        if n_new == 0 {
            return Err(ConfigError::InvalidClassCount(0).into());
        }
        if renumbering.len() < self.n_classes {
            return Err(MatrixError::RenumberingTooShort {
                len: renumbering.len(),
                class: self.n_classes - 1,
            }
            .into());
        }
        self.finish_absorb();
        self.matrix.delete_columns(renumbering)?;
        self.n_classes = n_new;
        Ok(())
    }
}
