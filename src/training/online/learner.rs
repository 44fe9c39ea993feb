//! Multi-task learner.

use std::collections::BTreeMap;

use super::{BlockModel, BlockState, LearnerBlock, LearnerError};
use crate::data::{Example, TaskId};
use crate::model::LearnerConfig;
use crate::repr::ClassRenumbering;
use crate::training::asd::{AsdOutcome, AsdParams};
use crate::training::logger::TrainingLogger;

/// One block per task, all built from the same configuration.
///
/// # Example
///
/// ```
/// use plrm::data::Example;
/// use plrm::model::LearnerConfig;
/// use plrm::training::Learner;
///
/// let mut learner = Learner::new(LearnerConfig::default());
/// learner.create_block(0, 2).unwrap();
///
/// let data = vec![
///     Example::labeled([(1, 1.0)], 0).unwrap(),
///     Example::labeled([(2, 1.0)], 1).unwrap(),
/// ];
/// learner.absorb(&data).unwrap();
///
/// let p = learner.score(0, &data[0]).unwrap();
/// assert!(p[0] > p[1]);
/// ```
#[derive(Debug, Clone)]
pub struct Learner {
    config: LearnerConfig,
    blocks: BTreeMap<TaskId, LearnerBlock>,
    logger: TrainingLogger,
}

impl Learner {
    pub fn new(config: LearnerConfig) -> Self {
        let logger = TrainingLogger::new(config.verbosity).with_label("learner");
        Self {
            config,
            blocks: BTreeMap::new(),
            logger,
        }
    }

    pub fn config(&self) -> &LearnerConfig {
        &self.config
    }

    /// Tasks with a block, in order.
    pub fn tasks(&self) -> impl Iterator<Item = TaskId> + '_ {
        self.blocks.keys().copied()
    }

    /// Create an empty block for `task`.
    pub fn create_block(&mut self, task: TaskId, n_classes: usize) -> Result<(), LearnerError> {
        if self.blocks.contains_key(&task) {
            return Err(LearnerError::TaskExists(task));
        }
        let block = LearnerBlock::new(&self.config, n_classes)?;
        self.blocks.insert(task, block);
        Ok(())
    }

    /// Create a block for `task` as a deep copy of the block of `from`.
    ///
    /// The two blocks evolve independently afterwards.
    pub fn branch_block(&mut self, task: TaskId, from: TaskId) -> Result<(), LearnerError> {
        if self.blocks.contains_key(&task) {
            return Err(LearnerError::TaskExists(task));
        }
        let block = self.block(from)?.clone();
        self.blocks.insert(task, block);
        Ok(())
    }

    pub fn remove_block(&mut self, task: TaskId) -> Result<LearnerBlock, LearnerError> {
        self.blocks
            .remove(&task)
            .ok_or(LearnerError::UnknownTask(task))
    }

    pub fn block(&self, task: TaskId) -> Result<&LearnerBlock, LearnerError> {
        self.blocks.get(&task).ok_or(LearnerError::UnknownTask(task))
    }

    pub fn block_mut(&mut self, task: TaskId) -> Result<&mut LearnerBlock, LearnerError> {
        self.blocks
            .get_mut(&task)
            .ok_or(LearnerError::UnknownTask(task))
    }

    /// Absorb a batch into every block. Each block sees the examples in order
    /// and skips those without a label for its task.
    pub fn absorb(&mut self, examples: &[Example]) -> Result<(), LearnerError> {
        for (&task, block) in self.blocks.iter_mut() {
            let used = block.absorb(examples, task)?;
            let rows = match block {
                LearnerBlock::TruncatedGradient(b) => b.matrix().n_rows(),
                LearnerBlock::ExponentiatedGradient(b) => b.positive().n_rows(),
            };
            self.logger.log_absorb(task, used, rows);
        }
        Ok(())
    }

    pub fn score(&self, task: TaskId, example: &Example) -> Result<Vec<f64>, LearnerError> {
        self.block(task)?.score(example)
    }

    pub fn log_score(&self, task: TaskId, example: &Example) -> Result<Vec<f64>, LearnerError> {
        self.block(task)?.log_score(example)
    }

    /// Append a class to `task`. Returns its index.
    pub fn add_class(&mut self, task: TaskId) -> Result<usize, LearnerError> {
        Ok(self.block_mut(task)?.add_class())
    }

    /// Shrink the class set of `task`.
    pub fn renumber_classes(
        &mut self,
        task: TaskId,
        renumbering: &ClassRenumbering,
    ) -> Result<(), LearnerError> {
        self.block_mut(task)?.delete_classes(renumbering)
    }

    pub fn export_state(&self, task: TaskId) -> Result<BlockState, LearnerError> {
        Ok(self.block(task)?.export_state())
    }

    /// Batch-refine the block of `task` on `examples`.
    pub fn refine(
        &mut self,
        task: TaskId,
        examples: &[Example],
        params: AsdParams,
    ) -> Result<AsdOutcome, LearnerError> {
        self.block_mut(task)?.refine(examples, task, params)
    }
}
