//! Lazy truncation: periodic shrinkage deferred until a row is touched.
//!
//! Every `K`-th call to [`TruncationPolicy::request_truncation`] opens a new
//! *epoch*: every stored coefficient now owes one more shrinkage step. Nothing
//! is applied at that point. A row settles its debt when it is next read or
//! written ([`TruncationPolicy::apply_truncation`]) or when the whole matrix
//! is flushed ([`TruncationPolicy::apply_truncation_to_all_rows`]).
//!
//! With [`Replay::Exact`] the owed steps are replayed one at a time, so a
//! lazily maintained matrix is bit-identical to one truncated eagerly at
//! every epoch.
//!
//! # Pending counts
//!
//! The owed count of feature `f` is `epoch − last_flush(f)`. Only features
//! flushed individually since the last full flush are tracked; all others
//! share `base_epoch`, so opening an epoch is O(1).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::prior::{PowerMemo, Prior, PriorSet};
use crate::model::ConfigError;
use crate::repr::{Coef, DenseAuxiliaryMatrix, SparseCoefficientMatrix};

// =============================================================================
// Parameters
// =============================================================================

/// How owed shrinkage steps are applied when a row is flushed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Replay {
    /// Replay steps one by one, stopping at a fixed point.
    #[default]
    Exact,
    /// One closed-form step: `λ·mult` or `factor^mult`.
    ClosedForm,
}

/// Truncation schedule and legacy gravity.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TruncationParams {
    /// Plain shrink-toward-zero per epoch, scaled by `η·K`. Used only when no
    /// priors are configured. `0` disables truncation.
    pub gravity: f64,

    /// Shrink only coefficients with `|w| <= theta`. `None` is unconditional.
    pub theta: Option<f64>,

    /// Cadence `K`: an epoch opens every `period` examples.
    pub period: u64,

    pub replay: Replay,
}

impl Default for TruncationParams {
    fn default() -> Self {
        Self {
            gravity: 0.0,
            theta: None,
            period: 1,
            replay: Replay::Exact,
        }
    }
}

impl TruncationParams {
    /// Plain truncation with `gravity` every `period` examples.
    pub fn gravity(gravity: f64, period: u64) -> Self {
        Self {
            gravity,
            period,
            ..Self::default()
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.period == 0 {
            return Err(ConfigError::InvalidPeriod);
        }
        if !self.gravity.is_finite() || self.gravity < 0.0 {
            return Err(ConfigError::InvalidGravity(self.gravity));
        }
        if let Some(theta) = self.theta {
            if theta.is_nan() || theta < 0.0 {
                return Err(ConfigError::InvalidTheta(theta));
            }
        }
        Ok(())
    }
}

// =============================================================================
// Truncatable
// =============================================================================

/// A matrix whose rows can be shrunk in place.
pub trait Truncatable {
    /// Stored feature indices.
    fn stored_features(&self) -> Vec<usize>;

    /// Apply `f(class, &mut value)` to every stored entry of a row.
    fn map_row(&mut self, feature: usize, f: &mut dyn FnMut(usize, &mut f64));

    /// Remove zero entries, dropping the row if nothing is left.
    fn settle_row(&mut self, feature: usize);
}

impl Truncatable for SparseCoefficientMatrix {
    fn stored_features(&self) -> Vec<usize> {
        self.features().collect()
    }

    fn map_row(&mut self, feature: usize, f: &mut dyn FnMut(usize, &mut f64)) {
        self.update_row(feature, f);
    }

    fn settle_row(&mut self, feature: usize) {
        self.compress_row(feature);
    }
}

impl Truncatable for DenseAuxiliaryMatrix {
    fn stored_features(&self) -> Vec<usize> {
        self.features().collect()
    }

    fn map_row(&mut self, feature: usize, f: &mut dyn FnMut(usize, &mut f64)) {
        self.update_row(feature, f);
    }

    fn settle_row(&mut self, feature: usize) {
        self.compress_row(feature);
    }
}

// =============================================================================
// ShrinkRule
// =============================================================================

/// Which prior governs each coefficient.
#[derive(Debug, Clone, PartialEq)]
enum ShrinkRule {
    Off,
    Uniform(Prior),
    Scoped(PriorSet),
}

impl ShrinkRule {
    #[inline]
    fn prior(&self, class: usize, feature: usize) -> Option<Prior> {
        match self {
            ShrinkRule::Off => None,
            ShrinkRule::Uniform(p) => Some(*p),
            ShrinkRule::Scoped(set) => Some(set.lookup(class, feature)),
        }
    }
}

// =============================================================================
// TruncationPolicy
// =============================================================================

/// Deferred shrinkage scheduler for one learner block.
///
/// # Example
///
/// ```
/// use plrm::repr::SparseCoefficientMatrix;
/// use plrm::training::{TruncationParams, TruncationPolicy};
///
/// let mut m = SparseCoefficientMatrix::new();
/// m.set(3, 0, 1.0);
///
/// // gravity 1.0, η = 0.1, K = 2  ⇒  step 0.2 every 2 examples
/// let params = TruncationParams::gravity(1.0, 2);
/// let mut policy = TruncationPolicy::new(&params, 0.1, None).unwrap();
///
/// for _ in 0..4 {
///     policy.request_truncation();
/// }
/// assert_eq!(policy.pending(3), 2);
///
/// policy.apply_truncation(3, &mut [&mut m]);
/// assert!((m.get(3, 0) - 0.6).abs() < 1e-12);
/// assert_eq!(policy.pending(3), 0);
/// ```
#[derive(Debug, Clone)]
pub struct TruncationPolicy {
    period: u64,
    /// Rate handed to priors: `η·K`.
    rate: f64,
    rule: ShrinkRule,
    replay: Replay,
    steps: u64,
    epoch: u64,
    base_epoch: u64,
    flushed: HashMap<usize, u64>,
    memo: PowerMemo,
}

impl TruncationPolicy {
    /// Build a policy for learning rate `learning_rate`.
    ///
    /// Configured priors, a non-flat default included, take precedence over
    /// gravity. A set without scoped priors is applied uniformly without
    /// per-coefficient lookup.
    ///
    /// # Errors
    ///
    /// Invalid parameters, or a Gaussian prior whose variance is smaller than
    /// the per-epoch rate `η·K`.
    pub fn new(
        params: &TruncationParams,
        learning_rate: f64,
        priors: Option<&PriorSet>,
    ) -> Result<Self, ConfigError> {
        params.validate()?;
        let rate = learning_rate * params.period as f64;

        let rule = match priors.filter(|set| set.is_configured()) {
            Some(set) => {
                set.validate()?;
                set.check_rate(rate)?;
                match set.uniform_prior() {
                    Some(prior) => ShrinkRule::Uniform(prior),
                    None => ShrinkRule::Scoped(set.clone()),
                }
            }
            None if params.gravity > 0.0 => ShrinkRule::Uniform(
                Prior::laplace_lambda(0.0, params.gravity * rate).with_theta(params.theta),
            ),
            None => ShrinkRule::Off,
        };

        Ok(Self {
            period: params.period,
            rate,
            rule,
            replay: params.replay,
            steps: 0,
            epoch: 0,
            base_epoch: 0,
            flushed: HashMap::new(),
            memo: PowerMemo::new(),
        })
    }

    /// A policy that never shrinks anything.
    pub fn disabled() -> Self {
        Self {
            period: 1,
            rate: 0.0,
            rule: ShrinkRule::Off,
            replay: Replay::Exact,
            steps: 0,
            epoch: 0,
            base_epoch: 0,
            flushed: HashMap::new(),
            memo: PowerMemo::new(),
        }
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        !matches!(self.rule, ShrinkRule::Off)
    }

    #[inline]
    pub fn period(&self) -> u64 {
        self.period
    }

    /// Examples counted so far.
    #[inline]
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// Epochs opened so far.
    #[inline]
    pub fn epoch(&self) -> u64 {
        self.epoch
    }

    /// Count one example. Returns `true` if this opened a new epoch.
    pub fn request_truncation(&mut self) -> bool {
        self.steps += 1;
        if self.steps % self.period == 0 {
            self.epoch += 1;
            true
        } else {
            false
        }
    }

    /// Shrinkage steps owed by `feature`.
    #[inline]
    pub fn pending(&self, feature: usize) -> u64 {
        let last = self.flushed.get(&feature).copied().unwrap_or(self.base_epoch);
        self.epoch - last
    }

    /// Settle the debt of one row across `matrices`.
    pub fn apply_truncation(&mut self, feature: usize, matrices: &mut [&mut dyn Truncatable]) {
        let mult = self.pending(feature);
        if mult == 0 {
            return;
        }
        for matrix in matrices.iter_mut() {
            self.shrink_row(&mut **matrix, feature, mult);
        }
        self.flushed.insert(feature, self.epoch);
    }

    /// Settle the debt of every stored row.
    pub fn apply_truncation_to_all_rows(&mut self, matrices: &mut [&mut dyn Truncatable]) {
        if self.epoch != self.base_epoch || !self.flushed.is_empty() {
            for matrix in matrices.iter_mut() {
                for feature in matrix.stored_features() {
                    let mult = self.pending(feature);
                    if mult > 0 {
                        self.shrink_row(&mut **matrix, feature, mult);
                    }
                }
            }
        }
        self.flushed.clear();
        self.base_epoch = self.epoch;
    }

    /// Row `feature` as it would read after flushing, without mutating.
    pub fn effective_row(&self, feature: usize, row: &[Coef]) -> Vec<Coef> {
        let mult = self.pending(feature);
        if mult == 0 || !self.is_active() || row.is_empty() {
            return row.to_vec();
        }
        let mut scratch = SparseCoefficientMatrix::new();
        // Stored rows are sorted by class.
        if scratch.set_elements(feature, row).is_err() {
            return row.to_vec();
        }
        let mut memo = PowerMemo::new();
        shrink(&self.rule, self.replay, self.rate, &mut memo, &mut scratch, feature, mult);
        scratch.get_row(feature).to_vec()
    }

    fn shrink_row(&mut self, matrix: &mut dyn Truncatable, feature: usize, mult: u64) {
        shrink(&self.rule, self.replay, self.rate, &mut self.memo, matrix, feature, mult);
    }
}

/// Apply `mult` owed steps to one row.
fn shrink(
    rule: &ShrinkRule,
    replay: Replay,
    rate: f64,
    memo: &mut PowerMemo,
    matrix: &mut dyn Truncatable,
    feature: usize,
    mult: u64,
) {
    if matches!(rule, ShrinkRule::Off) {
        return;
    }
    match replay {
        Replay::Exact => {
            for _ in 0..mult {
                let mut changed = false;
                matrix.map_row(feature, &mut |class: usize, value: &mut f64| {
                    if let Some(prior) = rule.prior(class, feature) {
                        let next = prior.step_unchecked(*value, rate);
                        if next != *value {
                            *value = next;
                            changed = true;
                        }
                    }
                });
                if !changed {
                    break;
                }
            }
        }
        Replay::ClosedForm => {
            matrix.map_row(feature, &mut |class: usize, value: &mut f64| {
                if let Some(prior) = rule.prior(class, feature) {
                    *value = prior.closed_form_unchecked(*value, rate, mult, memo);
                }
            });
        }
    }
    matrix.settle_row(feature);
}

// =============================================================================
// Tests
// =============================================================================
