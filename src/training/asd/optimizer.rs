//! Adaptive Steepest Descent over one task's coefficient matrix.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use super::params::{AsdError, AsdParams, StepSizeMode};
use crate::data::{Example, TaskId};
use crate::repr::SparseCoefficientMatrix;
use crate::training::logger::TrainingLogger;
use crate::training::prior::{Prior, PriorKind, PriorSet, Skew};
use crate::training::softmax::apply_model_log;

// ============================================================================
// Outcome
// ============================================================================

/// Why refinement stopped. All variants are successful outcomes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Termination {
    /// `‖A‖ <= gradient_epsilon`.
    ZeroGradient,
    /// `|ΔL| < epsilon`.
    SmallChange,
    /// Iteration budget spent.
    MaxIterations,
    /// No example carries a label for the task.
    NoExamples,
}

/// Result of a refinement pass.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AsdOutcome {
    /// Descent steps taken.
    pub iterations: usize,
    /// Penalized average log-likelihood of the final matrix.
    pub loglik: f64,
    pub termination: Termination,
    /// `L` at every evaluation, in order.
    pub history: Vec<f64>,
}

// ============================================================================
// Penalty
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
enum Penalty {
    None,
    Gaussian { variance: f64 },
    Laplace { lambda: f64 },
}

impl Penalty {
    fn from_prior(prior: &Prior) -> Result<Self, AsdError> {
        if prior.skew != Skew::Symmetric {
            return Err(AsdError::UnsupportedSkew);
        }
        if prior.theta.is_some_and(f64::is_finite) {
            return Err(AsdError::UnsupportedPrior("theta"));
        }
        if prior.mode != 0.0 {
            return Err(AsdError::UnsupportedPrior("mode"));
        }
        if prior.variance == 0.0 {
            return Err(AsdError::DegeneratePrior);
        }
        if prior.variance.is_infinite() {
            return Ok(Penalty::None);
        }
        Ok(match prior.kind {
            PriorKind::Gaussian => Penalty::Gaussian {
                variance: prior.variance,
            },
            PriorKind::Laplace => Penalty::Laplace {
                lambda: prior.lambda(),
            },
        })
    }

    fn value(&self, matrix: &SparseCoefficientMatrix) -> f64 {
        match *self {
            Penalty::None => 0.0,
            Penalty::Gaussian { variance } => matrix.square_of_norm() / (2.0 * variance),
            Penalty::Laplace { lambda } => lambda * matrix.l1_norm(),
        }
    }

    /// Data gradient `g` at coefficient `b` minus the penalty (sub)gradient.
    #[inline]
    fn adjust(&self, b: f64, g: f64) -> f64 {
        match *self {
            Penalty::None => g,
            Penalty::Gaussian { variance } => g - b / variance,
            Penalty::Laplace { lambda } => {
                if b > 0.0 {
                    g - lambda
                } else if b < 0.0 {
                    g + lambda
                } else if g.abs() <= lambda {
                    0.0
                } else {
                    g - lambda * g.signum()
                }
            }
        }
    }

    #[inline]
    fn inverse_variance(&self) -> f64 {
        match *self {
            Penalty::Gaussian { variance } => 1.0 / variance,
            _ => 0.0,
        }
    }
}

// ============================================================================
// Batch and direction
// ============================================================================

/// Labeled examples of one task.
struct Batch<'a> {
    examples: Vec<(&'a Example, usize)>,
    /// `n = Σ m`
    weight: f64,
    /// `Σ m·‖x‖²`
    weighted_square_norm: f64,
}

impl<'a> Batch<'a> {
    fn new(examples: &'a [Example], task: TaskId, n_classes: usize) -> Result<Self, AsdError> {
        let mut batch = Batch {
            examples: Vec::new(),
            weight: 0.0,
            weighted_square_norm: 0.0,
        };
        for example in examples {
            let Some(label) = example.label(task) else {
                continue;
            };
            if label >= n_classes {
                return Err(AsdError::ClassCountMismatch { label, n_classes });
            }
            let m = example.multiplicity() as f64;
            batch.weight += m;
            batch.weighted_square_norm += m * example.square_norm();
            batch.examples.push((example, label));
        }
        Ok(batch)
    }
}

/// Search direction `A`, dense over the rows that can change.
struct Direction {
    n_classes: usize,
    features: Vec<usize>,
    values: Vec<f64>,
}

impl Direction {
    fn new(features: Vec<usize>, n_classes: usize) -> Self {
        let values = vec![0.0; features.len() * n_classes];
        Self {
            n_classes,
            features,
            values,
        }
    }

    fn clear(&mut self) {
        self.values.fill(0.0);
    }

    fn position(&self, feature: usize) -> Option<usize> {
        self.features.binary_search(&feature).ok()
    }

    fn row(&self, feature: usize) -> Option<&[f64]> {
        let i = self.position(feature)?;
        Some(&self.values[i * self.n_classes..(i + 1) * self.n_classes])
    }

    fn row_mut(&mut self, feature: usize) -> Option<&mut [f64]> {
        let i = self.position(feature)?;
        Some(&mut self.values[i * self.n_classes..(i + 1) * self.n_classes])
    }

    fn square_norm(&self) -> f64 {
        self.values.iter().map(|v| v * v).sum()
    }
}

// ============================================================================
// AsdOptimizer
// ============================================================================

/// Full-batch refinement of a sparse coefficient matrix.
///
/// Maximizes `L = mean(m·log P(true class)) − penalty` by steepest ascent.
/// Each iteration takes a step along the penalized gradient `A` and then,
/// optionally, keeps doubling the step along `A` while `L` improves.
///
/// Only a single uniform prior is supported. Under a Laplace prior steps are
/// capped at zero so no coefficient crosses the non-differentiable crease in
/// one move, and the adaptive step size is replaced by the safe one.
///
/// The matrix must not owe any lazy truncation when refinement starts.
#[derive(Debug, Clone)]
pub struct AsdOptimizer {
    params: AsdParams,
    penalty: Penalty,
    step_size: StepSizeMode,
    logger: TrainingLogger,
}

impl AsdOptimizer {
    /// Build an optimizer for `priors`, falling back to `gravity`.
    ///
    /// Without explicit priors a positive `gravity` g becomes a Laplace prior
    /// of variance `g²`; zero gravity means no penalty.
    pub fn new(
        params: AsdParams,
        priors: Option<&PriorSet>,
        gravity: f64,
    ) -> Result<Self, AsdError> {
        params.validate()?;
        if !gravity.is_finite() || gravity < 0.0 {
            return Err(AsdError::InvalidGravity(gravity));
        }

        let prior = match priors.filter(|set| set.is_configured()) {
            Some(set) => Some(set.uniform_prior().ok_or(AsdError::MixedPriors)?),
            None if gravity > 0.0 => Some(Prior::laplace(0.0, gravity * gravity)),
            None => None,
        };
        let penalty = match prior {
            Some(prior) => Penalty::from_prior(&prior)?,
            None => Penalty::None,
        };

        let logger = TrainingLogger::new(params.verbosity).with_label("asd");
        let step_size = match (penalty, params.step_size) {
            (Penalty::Laplace { .. }, StepSizeMode::Adaptive) => {
                log::info!("[asd] Laplace prior in effect, using the safe step size");
                StepSizeMode::Safe
            }
            (_, mode) => mode,
        };

        Ok(Self {
            params,
            penalty,
            step_size,
            logger,
        })
    }

    pub fn params(&self) -> &AsdParams {
        &self.params
    }

    /// Step-size mode actually used.
    pub fn step_size(&self) -> StepSizeMode {
        self.step_size
    }

    /// Penalized average log-likelihood of `matrix` on the task's labeled examples.
    pub fn log_likelihood(
        &self,
        matrix: &SparseCoefficientMatrix,
        n_classes: usize,
        examples: &[Example],
        task: TaskId,
    ) -> Result<f64, AsdError> {
        let batch = Batch::new(examples, task, n_classes)?;
        self.loglik(matrix, n_classes, &batch)
    }

    /// Refine `matrix` to a local optimum on the task's labeled examples.
    pub fn optimize(
        &self,
        matrix: &mut SparseCoefficientMatrix,
        n_classes: usize,
        examples: &[Example],
        task: TaskId,
    ) -> Result<AsdOutcome, AsdError> {
        let batch = Batch::new(examples, task, n_classes)?;
        if batch.examples.is_empty() {
            return Ok(AsdOutcome {
                iterations: 0,
                loglik: -self.penalty.value(matrix),
                termination: Termination::NoExamples,
                history: Vec::new(),
            });
        }

        let mut domain: BTreeSet<usize> = matrix.features().collect();
        for (example, _) in &batch.examples {
            domain.extend(example.features().iter().map(|&(f, _)| f));
        }
        let mut direction = Direction::new(domain.into_iter().collect(), n_classes);

        self.logger
            .start_refinement(batch.examples.len(), n_classes, self.params.max_iterations);

        let gradient_floor = self.params.gradient_epsilon * self.params.gradient_epsilon;
        let mut history = Vec::new();
        let mut previous: Option<f64> = None;
        let mut steps = 0;
        let mut termination = Termination::MaxIterations;
        let mut loglik = f64::NEG_INFINITY;

        for iteration in 0..self.params.max_iterations {
            direction.clear();
            loglik = self.accumulate(matrix, n_classes, &batch, &mut direction)?;
            history.push(loglik);

            if let Some(prev) = previous {
                let delta = loglik - prev;
                if delta < 0.0 {
                    self.logger.anomaly(format_args!(
                        "iteration {}: L decreased by {:.3e}",
                        iteration, -delta
                    ));
                }
                if delta.abs() < self.params.epsilon {
                    termination = Termination::SmallChange;
                    break;
                }
            }
            previous = Some(loglik);

            self.penalize(matrix, &mut direction);
            let norm_sq = direction.square_norm();
            if norm_sq <= gradient_floor {
                termination = Termination::ZeroGradient;
                break;
            }

            let rate = self.step_rate(&batch, &direction, norm_sq);
            self.logger.log_iteration(iteration, loglik, norm_sq, rate);
            self.take_step(matrix, &mut direction, rate)?;
            steps += 1;

            if self.params.bonus_steps {
                let accepted = self.bonus_steps(matrix, n_classes, &batch, &mut direction, rate, iteration)?;
                self.logger.log_bonus_steps(iteration, accepted);
            }
        }

        if termination == Termination::MaxIterations {
            loglik = self.loglik(matrix, n_classes, &batch)?;
            history.push(loglik);
            self.logger.warn(format_args!(
                "stopped after {} iterations without converging",
                self.params.max_iterations
            ));
        } else {
            let reason = match termination {
                Termination::ZeroGradient => "zero gradient",
                _ => "small change",
            };
            self.logger.log_converged(steps, loglik, reason);
        }
        matrix.compress();
        self.logger.finish_refinement(steps, loglik);

        Ok(AsdOutcome {
            iterations: steps,
            loglik,
            termination,
            history,
        })
    }

    /// `L` only.
    fn loglik(
        &self,
        matrix: &SparseCoefficientMatrix,
        n_classes: usize,
        batch: &Batch<'_>,
    ) -> Result<f64, AsdError> {
        if batch.examples.is_empty() {
            return Ok(-self.penalty.value(matrix));
        }
        let mut total = 0.0;
        for &(example, label) in &batch.examples {
            let log_probs = apply_model_log(matrix, example, n_classes)?;
            total += example.multiplicity() as f64 * log_probs[label];
        }
        Ok(total / batch.weight - self.penalty.value(matrix))
    }

    /// `L`, accumulating the data gradient `(1/n)·Σ m·r⊗x` into `direction`.
    fn accumulate(
        &self,
        matrix: &SparseCoefficientMatrix,
        n_classes: usize,
        batch: &Batch<'_>,
        direction: &mut Direction,
    ) -> Result<f64, AsdError> {
        let mut total = 0.0;
        let mut residual = vec![0.0; n_classes];
        for &(example, label) in &batch.examples {
            let m = example.multiplicity() as f64;
            let log_probs = apply_model_log(matrix, example, n_classes)?;
            total += m * log_probs[label];

            for (r, &lp) in residual.iter_mut().zip(&log_probs) {
                *r = -lp.exp();
            }
            residual[label] += 1.0;

            let scale = m / batch.weight;
            for &(feature, x) in example.features() {
                if let Some(row) = direction.row_mut(feature) {
                    for (g, &r) in row.iter_mut().zip(&residual) {
                        *g += scale * r * x;
                    }
                }
            }
        }
        Ok(total / batch.weight - self.penalty.value(matrix))
    }

    fn penalize(&self, matrix: &SparseCoefficientMatrix, direction: &mut Direction) {
        if self.penalty == Penalty::None {
            return;
        }
        let n_classes = direction.n_classes;
        for (i, &feature) in direction.features.iter().enumerate() {
            let row = &mut direction.values[i * n_classes..(i + 1) * n_classes];
            for (class, g) in row.iter_mut().enumerate() {
                *g = self.penalty.adjust(matrix.get(feature, class), *g);
            }
        }
    }

    fn step_rate(&self, batch: &Batch<'_>, direction: &Direction, norm_sq: f64) -> f64 {
        let inv_var = self.penalty.inverse_variance();
        let safe = batch.weight / (batch.weighted_square_norm + batch.weight * inv_var);
        match self.step_size {
            StepSizeMode::Safe => safe,
            StepSizeMode::Adaptive => {
                // Bound the curvature along A by the largest directional
                // derivative of each example's scores.
                let mut curvature = 0.0;
                let mut derivative = vec![0.0; direction.n_classes];
                for &(example, _) in &batch.examples {
                    derivative.fill(0.0);
                    for &(feature, x) in example.features() {
                        if let Some(row) = direction.row(feature) {
                            for (d, &a) in derivative.iter_mut().zip(row) {
                                *d += x * a;
                            }
                        }
                    }
                    let max = derivative.iter().fold(0.0f64, |acc, d| acc.max(d.abs()));
                    curvature += example.multiplicity() as f64 * max * max;
                }
                let denominator = curvature / batch.weight + norm_sq * inv_var;
                if denominator > 0.0 {
                    norm_sq / denominator
                } else {
                    safe
                }
            }
        }
    }

    /// `w += rate·A`, capped at zero under a Laplace prior.
    fn take_step(
        &self,
        matrix: &mut SparseCoefficientMatrix,
        direction: &mut Direction,
        rate: f64,
    ) -> Result<(), AsdError> {
        let n_classes = direction.n_classes;
        let capped = matches!(self.penalty, Penalty::Laplace { .. });
        for (i, &feature) in direction.features.iter().enumerate() {
            let row = &mut direction.values[i * n_classes..(i + 1) * n_classes];
            if row.iter().all(|&a| a == 0.0) {
                continue;
            }
            if capped {
                matrix.add_dense_row_capped(feature, row, rate, 0.0)?;
            } else {
                matrix.add_dense_row(feature, row, rate)?;
            }
        }
        Ok(())
    }

    /// Keep stepping along `direction` while `L` improves, doubling the rate
    /// before each step: `2η`, `4η`, ...
    ///
    /// Returns the number of accepted steps. The first rejected step is undone.
    fn bonus_steps(
        &self,
        matrix: &mut SparseCoefficientMatrix,
        n_classes: usize,
        batch: &Batch<'_>,
        direction: &mut Direction,
        rate: f64,
        iteration: usize,
    ) -> Result<usize, AsdError> {
        let mut current = self.loglik(matrix, n_classes, batch)?;
        let mut extra = rate * 2.0;
        for accepted in 0..self.params.max_bonus_steps {
            let snapshot = matrix.clone();
            self.take_step(matrix, direction, extra)?;
            let next = self.loglik(matrix, n_classes, batch)?;
            if next > current {
                current = next;
                extra *= 2.0;
            } else {
                *matrix = snapshot;
                return Ok(accepted);
            }
        }
        if self.params.max_bonus_steps > 0 {
            self.logger.anomaly(format_args!(
                "iteration {}: bonus steps reached the cap of {}",
                iteration, self.params.max_bonus_steps
            ));
        }
        Ok(self.params.max_bonus_steps)
    }
}

// ============================================================================
// Tests
// ============================================================================
