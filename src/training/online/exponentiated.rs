//! Exponentiated-gradient learner block over a dual `V⁺`/`V⁻` pair.

use std::collections::BTreeSet;

use super::{BlockModel, BlockState, LearnerError};
use crate::data::{Example, TaskId};
use crate::model::{ConfigError, LearnerConfig};
use crate::repr::{ClassRenumbering, Coef, DenseAuxiliaryMatrix, MatrixError, SparseCoefficientMatrix};
use crate::training::softmax::{adj_weights, log_softmax_in_place, softmax_in_place};
use crate::training::truncation::TruncationPolicy;

/// Online softmax regression with multiplicative updates.
///
/// Weights are never stored. Each observed feature `f` carries two
/// non-negative latent rows and
///
/// ```text
/// w[f][k] = U · (exp(V⁺[f][k]) − exp(V⁻[f][k])) / Z_k
/// Z_k     = Σ_{observed f} (exp(V⁺[f][k]) + exp(V⁻[f][k]))
/// ```
///
/// so `Σ_f |w[f][k]| <= U` for every class. An update `δ = η·r_k·x_f` grows
/// `V⁺` when positive and `V⁻` by `|δ|` when negative.
///
/// Truncation shrinks both latent matrices. The normalizer couples every
/// row, so all rows are flushed as soon as an epoch opens.
#[derive(Debug, Clone)]
pub struct ExponentiatedGradientBlock {
    n_classes: usize,
    learning_rate: f64,
    scale: f64,
    positive: DenseAuxiliaryMatrix,
    negative: DenseAuxiliaryMatrix,
    observed: BTreeSet<usize>,
    normalizer: Vec<f64>,
    truncation: TruncationPolicy,
}

impl ExponentiatedGradientBlock {
    pub fn new(config: &LearnerConfig, n_classes: usize, scale: f64) -> Result<Self, ConfigError> {
        if n_classes == 0 {
            return Err(ConfigError::InvalidClassCount(n_classes));
        }
        if !scale.is_finite() || scale <= 0.0 {
            return Err(ConfigError::InvalidScale(scale));
        }
        Ok(Self {
            n_classes,
            learning_rate: config.learning_rate,
            scale,
            positive: DenseAuxiliaryMatrix::new(n_classes),
            negative: DenseAuxiliaryMatrix::new(n_classes),
            observed: BTreeSet::new(),
            normalizer: vec![0.0; n_classes],
            truncation: config.truncation_policy()?,
        })
    }

    pub fn scale(&self) -> f64 {
        self.scale
    }

    pub fn positive(&self) -> &DenseAuxiliaryMatrix {
        &self.positive
    }

    pub fn negative(&self) -> &DenseAuxiliaryMatrix {
        &self.negative
    }

    /// Per-class normalizers `Z_k`.
    pub fn normalizer(&self) -> &[f64] {
        &self.normalizer
    }

    /// Effective weight of `(feature, class)`; zero for unobserved features.
    pub fn weight(&self, feature: usize, class: usize) -> f64 {
        if !self.observed.contains(&feature) || class >= self.n_classes {
            return 0.0;
        }
        let diff = self.positive.get(feature, class).exp() - self.negative.get(feature, class).exp();
        self.scale * diff / self.normalizer[class]
    }

    /// Effective weights of every observed feature.
    pub fn weights(&self) -> SparseCoefficientMatrix {
        let mut out = SparseCoefficientMatrix::new();
        for &feature in &self.observed {
            let row: Vec<Coef> = (0..self.n_classes)
                .map(|class| Coef::new(class, self.weight(feature, class)))
                .filter(|c| c.value != 0.0)
                .collect();
            // Built in class order.
            let _ = out.set_elements(feature, &row);
        }
        out
    }

    /// Rebuild `Z` from the latent matrices.
    fn recompute_normalizer(&mut self) {
        // Absent rows contribute exp(0) + exp(0).
        let base = 2.0 * self.observed.len() as f64;
        self.normalizer = vec![base; self.n_classes];
        for matrix in [&self.positive, &self.negative] {
            for (_, row) in matrix.iter_rows() {
                for (z, &v) in self.normalizer.iter_mut().zip(row) {
                    *z += v.exp() - 1.0;
                }
            }
        }
    }

    fn dot_products(&self, example: &Example) -> Vec<f64> {
        let mut scores = vec![0.0; self.n_classes];
        for &(feature, x) in example.features() {
            if !self.observed.contains(&feature) {
                continue;
            }
            for (class, s) in scores.iter_mut().enumerate() {
                *s += x * self.weight(feature, class);
            }
        }
        scores
    }

    fn check_renumbering(&self, renumbering: &ClassRenumbering) -> Result<usize, LearnerError> {
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
        Ok(n_new)
    }
}

impl BlockModel for ExponentiatedGradientBlock {
    fn n_classes(&self) -> usize {
        self.n_classes
    }

    fn score(&self, example: &Example) -> Result<Vec<f64>, LearnerError> {
        let mut scores = self.dot_products(example);
        softmax_in_place(&mut scores);
        Ok(scores)
    }

    fn log_score(&self, example: &Example) -> Result<Vec<f64>, LearnerError> {
        let mut scores = self.dot_products(example);
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

        let probs = self.score(example)?;
        let Some(residual) = adj_weights(&probs, Some(label)) else {
            return Ok(false);
        };

        for &(feature, x) in example.features() {
            if self.observed.insert(feature) {
                for z in self.normalizer.iter_mut() {
                    *z += 2.0;
                }
            }
            for (class, &r) in residual.iter().enumerate() {
                let delta = self.learning_rate * r * x;
                if delta == 0.0 {
                    continue;
                }
                let latent = if delta > 0.0 {
                    &mut self.positive
                } else {
                    &mut self.negative
                };
                let old = latent.get(feature, class);
                latent.add(feature, class, delta.abs())?;
                self.normalizer[class] += latent.get(feature, class).exp() - old.exp();
            }
        }

        if self.truncation.request_truncation() && self.truncation.is_active() {
            self.finish_absorb();
        }
        Ok(true)
    }

    fn finish_absorb(&mut self) {
        self.truncation
            .apply_truncation_to_all_rows(&mut [&mut self.positive, &mut self.negative]);
        self.recompute_normalizer();
    }

    fn export_state(&self) -> BlockState {
        BlockState::Dual {
            n_classes: self.n_classes,
            positive: self.positive.clone(),
            negative: self.negative.clone(),
            scale: self.scale,
        }
    }

    fn add_class(&mut self) -> usize {
        self.positive.add_class();
        self.negative.add_class();
        self.normalizer.push(2.0 * self.observed.len() as f64);
        self.n_classes += 1;
        self.n_classes - 1
    }

    fn delete_classes(&mut self, renumbering: &ClassRenumbering) -> Result<(), LearnerError> {
        let n_new = self.check_renumbering(renumbering)?;
        self.finish_absorb();
        let mut positive = self.positive.clone();
        positive.delete_columns(renumbering)?;
        self.negative.delete_columns(renumbering)?;
        self.positive = positive;
        self.n_classes = n_new;
        self.recompute_normalizer();
        Ok(())
    }
}
