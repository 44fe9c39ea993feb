//! Verbosity-gated training output over the `log` facade.

use serde::{Deserialize, Serialize};

/// Verbosity level for training output.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Verbosity {
    /// No output.
    #[default]
    Silent,
    /// Warnings only.
    Warning,
    /// Progress summaries.
    Info,
    /// Per-iteration detail.
    Debug,
}

/// Logger for online passes and batch refinement.
///
/// Progress messages and [`warn`](Self::warn) are gated by [`Verbosity`].
/// Numerical anomalies go through [`anomaly`](Self::anomaly) and are always
/// emitted.
#[derive(Debug, Clone)]
pub struct TrainingLogger {
    verbosity: Verbosity,
    label: &'static str,
}

impl TrainingLogger {
    pub fn new(verbosity: Verbosity) -> Self {
        Self {
            verbosity,
            label: "training",
        }
    }

    /// Prefix messages with `label` (e.g. `"asd"`).
    pub fn with_label(mut self, label: &'static str) -> Self {
        self.label = label;
        self
    }

    #[inline]
    pub fn verbosity(&self) -> Verbosity {
        self.verbosity
    }

    pub fn start_refinement(&self, n_examples: usize, n_classes: usize, max_iterations: usize) {
        if self.verbosity >= Verbosity::Info {
            log::info!(
                "[{}] refining on {} examples, {} classes (max {} iterations)",
                self.label,
                n_examples,
                n_classes,
                max_iterations
            );
        }
    }

    pub fn log_iteration(&self, iteration: usize, loglik: f64, grad_norm_sq: f64, rate: f64) {
        if self.verbosity >= Verbosity::Debug {
            log::debug!(
                "[{}] iter {:>4}: L = {:.9}, |A|^2 = {:.3e}, eta = {:.3e}",
                self.label,
                iteration,
                loglik,
                grad_norm_sq,
                rate
            );
        }
    }

    pub fn log_bonus_steps(&self, iteration: usize, accepted: usize) {
        if self.verbosity >= Verbosity::Debug && accepted > 0 {
            log::debug!(
                "[{}] iter {:>4}: accepted {} bonus steps",
                self.label,
                iteration,
                accepted
            );
        }
    }

    pub fn log_converged(&self, iteration: usize, loglik: f64, reason: &str) {
        if self.verbosity >= Verbosity::Info {
            log::info!(
                "[{}] converged after {} iterations ({}), L = {:.9}",
                self.label,
                iteration,
                reason,
                loglik
            );
        }
    }

    pub fn log_absorb(&self, task: usize, n_examples: usize, n_rows: usize) {
        if self.verbosity >= Verbosity::Info {
            log::info!(
                "[{}] task {}: absorbed {} examples, {} stored rows",
                self.label,
                task,
                n_examples,
                n_rows
            );
        }
    }

    /// `true` if messages at `level` pass the gate.
    #[inline]
    pub fn is_enabled(&self, level: Verbosity) -> bool {
        level != Verbosity::Silent && self.verbosity >= level
    }

    pub fn warn(&self, message: std::fmt::Arguments<'_>) {
        if self.is_enabled(Verbosity::Warning) {
            log::warn!("[{}] {}", self.label, message);
        }
    }

    /// Always emitted.
    pub fn anomaly(&self, message: std::fmt::Arguments<'_>) {
        log::warn!("[{}] {}", self.label, message);
    }

    pub fn finish_refinement(&self, iterations: usize, loglik: f64) {
        if self.verbosity >= Verbosity::Info {
            log::info!(
                "[{}] refinement finished: {} iterations, L = {:.9}",
                self.label,
                iterations,
                loglik
            );
        }
    }
}
