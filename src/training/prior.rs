//! Priors: per-coefficient shrinkage rules.
//!
//! A [`Prior`] pulls a coefficient toward its mode:
//!
//! - **Gaussian** (≈ L2): multiplies the deviation from the mode by
//!   `1 − η/variance` per step.
//! - **Laplace** (≈ L1): subtracts `λ = √(2/variance)` from the deviation per
//!   step, clamping at the mode so the deviation never changes sign.
//!
//! Both honor a [`Skew`] (shrink only on one side of the mode) and an optional
//! `theta` gate (shrink only while the deviation is within `theta`).
//!
//! [`PriorSet`] resolves which prior governs a `(class, feature)` coefficient:
//! coefficient-specific, then class, then feature, then global, then the
//! default Laplace prior.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

// =============================================================================
// Errors
// =============================================================================

/// Prior configuration errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PriorError {
    /// Gaussian shrink factor `1 − rate/variance` would be negative.
    #[error("learning rate {rate} exceeds Gaussian prior variance {variance}")]
    LearningRateTooLarge { rate: f64, variance: f64 },

    #[error("prior variance must be non-negative, got {0}")]
    NegativeVariance(f64),

    #[error("prior mode must be finite, got {0}")]
    InvalidMode(f64),

    #[error("prior theta must be non-negative, got {0}")]
    InvalidTheta(f64),
}

// =============================================================================
// Prior
// =============================================================================

/// Shape of a prior.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriorKind {
    Gaussian,
    #[default]
    Laplace,
}

/// Which side(s) of the mode a prior acts on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Skew {
    /// Only values below the mode are shrunk (skew −1).
    Below,
    #[default]
    Symmetric,
    /// Only values above the mode are shrunk (skew +1).
    Above,
}

impl Skew {
    /// Map a `{-1, 0, 1}` sign to a skew; other values are symmetric.
    pub fn from_sign(sign: i8) -> Self {
        match sign {
            s if s < 0 => Skew::Below,
            0 => Skew::Symmetric,
            _ => Skew::Above,
        }
    }

    #[inline]
    fn admits(self, deviation: f64) -> bool {
        match self {
            Skew::Below => deviation < 0.0,
            Skew::Symmetric => true,
            Skew::Above => deviation > 0.0,
        }
    }
}

/// A single shrinkage rule.
///
/// `variance = 0` snaps to the mode; `variance = ∞` is a no-op.
///
/// # Example
///
/// ```
/// use plrm::training::Prior;
///
/// let g = Prior::gaussian(0.0, 1.0);
/// assert!((g.apply(5.0, 0.1, 1).unwrap() - 4.5).abs() < 1e-12);
///
/// let l = Prior::laplace_lambda(0.0, 0.2);
/// assert_eq!(l.apply(0.15, 0.1, 1).unwrap(), 0.0);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Prior {
    pub kind: PriorKind,
    pub mode: f64,
    /// `∞` is written as `null` by JSON and read back as `∞`.
    #[serde(deserialize_with = "deserialize_variance")]
    pub variance: f64,
    #[serde(default)]
    pub skew: Skew,
    /// Shrink only while `|value − mode| <= theta`. `None` is unconditional.
    #[serde(default)]
    pub theta: Option<f64>,
    /// `false` makes mode and variance relative to the next less specific prior.
    #[serde(default = "absolute_default")]
    pub absolute: bool,
}

fn absolute_default() -> bool {
    true
}

fn deserialize_variance<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::INFINITY))
}

impl Default for Prior {
    /// Flat Laplace prior centered at zero.
    fn default() -> Self {
        Self::laplace(0.0, f64::INFINITY)
    }
}

impl Prior {
    pub fn gaussian(mode: f64, variance: f64) -> Self {
        Self {
            kind: PriorKind::Gaussian,
            mode,
            variance,
            skew: Skew::Symmetric,
            theta: None,
            absolute: true,
        }
    }

    pub fn laplace(mode: f64, variance: f64) -> Self {
        Self {
            kind: PriorKind::Laplace,
            ..Self::gaussian(mode, variance)
        }
    }

    /// Laplace prior from its rate: `variance = 2/λ²`.
    pub fn laplace_lambda(mode: f64, lambda: f64) -> Self {
        let variance = if lambda == 0.0 {
            f64::INFINITY
        } else if lambda.is_infinite() {
            0.0
        } else {
            2.0 / (lambda * lambda)
        };
        Self::laplace(mode, variance)
    }

    pub fn with_skew(mut self, skew: Skew) -> Self {
        self.skew = skew;
        self
    }

    pub fn with_theta(mut self, theta: Option<f64>) -> Self {
        self.theta = theta;
        self
    }

    /// Mark as relative to the next less specific prior.
    pub fn relative(mut self) -> Self {
        self.absolute = false;
        self
    }

    /// Laplace rate `λ = √(2/variance)`; `∞` at zero variance, `0` at infinite.
    pub fn lambda(&self) -> f64 {
        if self.variance == 0.0 {
            f64::INFINITY
        } else if self.variance.is_infinite() {
            0.0
        } else {
            (2.0 / self.variance).sqrt()
        }
    }

    /// `true` if applying this prior never changes a value.
    pub fn is_flat(&self) -> bool {
        self.variance.is_infinite() || self.theta == Some(0.0)
    }

    pub fn validate(&self) -> Result<(), PriorError> {
        if !self.mode.is_finite() {
            return Err(PriorError::InvalidMode(self.mode));
        }
        if self.variance.is_nan() || self.variance < 0.0 {
            return Err(PriorError::NegativeVariance(self.variance));
        }
        if let Some(theta) = self.theta {
            if theta.is_nan() || theta < 0.0 {
                return Err(PriorError::InvalidTheta(theta));
            }
        }
        Ok(())
    }

    /// Reject a rate whose Gaussian factor `1 − rate/variance` would be negative.
    pub fn check_rate(&self, rate: f64) -> Result<(), PriorError> {
        if self.kind == PriorKind::Gaussian
            && self.variance > 0.0
            && self.variance.is_finite()
            && rate / self.variance > 1.0
        {
            return Err(PriorError::LearningRateTooLarge {
                rate,
                variance: self.variance,
            });
        }
        Ok(())
    }

    /// Resolve a relative prior against `base`.
    ///
    /// The mode becomes an offset from `base.mode` and the variance a
    /// multiplier of `base.variance`. Absolute priors are returned unchanged.
    pub fn resolve_against(&self, base: &Prior) -> Prior {
        if self.absolute {
            return *self;
        }
        Prior {
            mode: base.mode + self.mode,
            variance: base.variance * self.variance,
            absolute: true,
            ..*self
        }
    }

    /// One shrinkage step with learning rate `rate`.
    pub fn step(&self, value: f64, rate: f64) -> Result<f64, PriorError> {
        self.check_rate(rate)?;
        Ok(self.step_unchecked(value, rate))
    }

    /// `mult` shrinkage steps, replayed one at a time.
    ///
    /// Stops early once the value reaches a fixed point, so the cost is
    /// bounded by `mult` and by how fast the value settles.
    pub fn apply(&self, value: f64, rate: f64, mult: u64) -> Result<f64, PriorError> {
        self.check_rate(rate)?;
        let mut v = value;
        for _ in 0..mult {
            let next = self.step_unchecked(v, rate);
            if next == v {
                break;
            }
            v = next;
        }
        Ok(v)
    }

    /// `mult` shrinkage steps in closed form: `factor^mult` or `λ·mult`.
    ///
    /// Equal to [`apply`](Self::apply) up to rounding.
    pub fn apply_closed_form(
        &self,
        value: f64,
        rate: f64,
        mult: u64,
        memo: &mut PowerMemo,
    ) -> Result<f64, PriorError> {
        self.check_rate(rate)?;
        Ok(self.closed_form_unchecked(value, rate, mult, memo))
    }

    /// Penalty term `−log density` (up to a constant) at `value`.
    pub fn penalty(&self, value: f64) -> f64 {
        let d = value - self.mode;
        match self.kind {
            PriorKind::Gaussian if self.variance.is_infinite() => 0.0,
            PriorKind::Gaussian => d * d / (2.0 * self.variance),
            PriorKind::Laplace => {
                let lambda = self.lambda();
                if lambda == 0.0 {
                    0.0
                } else {
                    lambda * d.abs()
                }
            }
        }
    }

    /// Closed-form shrinkage without the rate check.
    pub(crate) fn closed_form_unchecked(
        &self,
        value: f64,
        rate: f64,
        mult: u64,
        memo: &mut PowerMemo,
    ) -> f64 {
        let deviation = value - self.mode;
        if mult == 0 || !self.gates_open(deviation) {
            return value;
        }
        match self.kind {
            PriorKind::Gaussian => {
                if self.variance.is_infinite() {
                    value
                } else if self.variance == 0.0 {
                    self.mode
                } else {
                    let factor = memo.pow(1.0 - rate / self.variance, mult);
                    self.mode + deviation * factor
                }
            }
            PriorKind::Laplace => self.laplace_shrink(value, self.lambda() * mult as f64),
        }
    }

    /// One step without the rate check.
    pub(crate) fn step_unchecked(&self, value: f64, rate: f64) -> f64 {
        let deviation = value - self.mode;
        if !self.gates_open(deviation) {
            return value;
        }
        match self.kind {
            PriorKind::Gaussian => {
                if self.variance.is_infinite() {
                    value
                } else if self.variance == 0.0 {
                    self.mode
                } else {
                    self.mode + deviation * (1.0 - rate / self.variance)
                }
            }
            PriorKind::Laplace => self.laplace_shrink(value, self.lambda()),
        }
    }

    /// Move `value` toward the mode by `amount`, stopping at the mode.
    #[inline]
    fn laplace_shrink(&self, value: f64, amount: f64) -> f64 {
        if amount == 0.0 {
            return value;
        }
        let deviation = value - self.mode;
        if deviation.abs() <= amount {
            self.mode
        } else if deviation > 0.0 {
            value - amount
        } else {
            value + amount
        }
    }

    #[inline]
    fn gates_open(&self, deviation: f64) -> bool {
        deviation != 0.0
            && self.skew.admits(deviation)
            && self.theta.map_or(true, |t| deviation.abs() <= t)
    }
}

// =============================================================================
// PowerMemo
// =============================================================================

/// Memo table for `base^exp`, owned by whoever runs closed-form shrinkage.
#[derive(Debug, Clone, Default)]
pub struct PowerMemo {
    table: HashMap<(u64, u64), f64>,
}

impl PowerMemo {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn pow(&mut self, base: f64, exp: u64) -> f64 {
        *self
            .table
            .entry((base.to_bits(), exp))
            .or_insert_with(|| base.powf(exp as f64))
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }
}

// =============================================================================
// PriorSet
// =============================================================================

/// Scoped priors with most-specific-wins lookup.
///
/// # Example
///
/// ```
/// use plrm::training::{Prior, PriorSet};
///
/// let mut set = PriorSet::new();
/// set.set_global(Prior::gaussian(0.0, 10.0));
/// set.set_class(1, Prior::laplace(0.0, 2.0));
/// set.set_coefficient(1, 5, Prior::gaussian(1.0, 1.0));
///
/// assert_eq!(set.lookup(0, 5), Prior::gaussian(0.0, 10.0));
/// assert_eq!(set.lookup(1, 4), Prior::laplace(0.0, 2.0));
/// assert_eq!(set.lookup(1, 5), Prior::gaussian(1.0, 1.0));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PriorSet {
    /// Fallback when nothing more specific is configured.
    #[serde(default)]
    default: Prior,
    #[serde(default)]
    global: Option<Prior>,
    #[serde(default)]
    by_feature: BTreeMap<usize, Prior>,
    #[serde(default)]
    by_class: BTreeMap<usize, Prior>,
    /// class → feature → prior
    #[serde(default)]
    by_coefficient: BTreeMap<usize, BTreeMap<usize, Prior>>,
}

impl PriorSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set with a single global prior.
    pub fn uniform(prior: Prior) -> Self {
        Self {
            global: Some(prior),
            ..Self::default()
        }
    }

    /// Replace the fallback prior. Relative fallbacks are made absolute.
    pub fn with_default(mut self, prior: Prior) -> Self {
        self.default = Prior {
            absolute: true,
            ..prior
        };
        self
    }

    pub fn set_global(&mut self, prior: Prior) {
        self.global = Some(prior);
    }

    pub fn set_feature(&mut self, feature: usize, prior: Prior) {
        self.by_feature.insert(feature, prior);
    }

    pub fn set_class(&mut self, class: usize, prior: Prior) {
        self.by_class.insert(class, prior);
    }

    pub fn set_coefficient(&mut self, class: usize, feature: usize, prior: Prior) {
        self.by_coefficient
            .entry(class)
            .or_default()
            .insert(feature, prior);
    }

    pub fn default_prior(&self) -> &Prior {
        &self.default
    }

    pub fn global(&self) -> Option<&Prior> {
        self.global.as_ref()
    }

    /// `true` if lookup can return anything other than a flat prior.
    pub fn is_configured(&self) -> bool {
        !self.default.is_flat() || self.global.is_some() || self.has_scoped()
    }

    /// `true` if any feature-, class- or coefficient-scoped prior exists.
    pub fn has_scoped(&self) -> bool {
        !self.by_feature.is_empty() || !self.by_class.is_empty() || !self.by_coefficient.is_empty()
    }

    /// The prior every coefficient resolves to, when nothing is scoped.
    pub fn uniform_prior(&self) -> Option<Prior> {
        if self.has_scoped() {
            return None;
        }
        Some(self.resolve(None, None))
    }

    /// Resolve the prior governing `(class, feature)`.
    ///
    /// Levels are folded from least to most specific; an absolute prior
    /// replaces what came before, a relative one refines it.
    pub fn lookup(&self, class: usize, feature: usize) -> Prior {
        self.resolve(Some(class), Some(feature))
    }

    /// `None` stands for a class or feature with no prior of its own.
    fn resolve(&self, class: Option<usize>, feature: Option<usize>) -> Prior {
        let levels = [
            self.global.as_ref(),
            feature.and_then(|f| self.by_feature.get(&f)),
            class.and_then(|c| self.by_class.get(&c)),
            class
                .zip(feature)
                .and_then(|(c, f)| self.by_coefficient.get(&c).and_then(|row| row.get(&f))),
        ];
        levels
            .into_iter()
            .flatten()
            .fold(self.default, |base, prior| prior.resolve_against(&base))
    }

    /// Every configured prior, default included.
    pub fn iter(&self) -> impl Iterator<Item = &Prior> + '_ {
        std::iter::once(&self.default)
            .chain(self.global.iter())
            .chain(self.by_feature.values())
            .chain(self.by_class.values())
            .chain(self.by_coefficient.values().flat_map(|row| row.values()))
    }

    pub fn validate(&self) -> Result<(), PriorError> {
        self.iter().try_for_each(Prior::validate)
    }

    /// Check `rate` against every Gaussian prior reachable by lookup.
    ///
    /// Every combination of configured class and feature keys is resolved,
    /// plus an unconfigured key on each axis, so relative priors are checked
    /// against the level they actually refine.
    pub fn check_rate(&self, rate: f64) -> Result<(), PriorError> {
        let mut classes: BTreeSet<usize> = self.by_class.keys().copied().collect();
        let mut features: BTreeSet<usize> = self.by_feature.keys().copied().collect();
        for (&class, row) in &self.by_coefficient {
            classes.insert(class);
            features.extend(row.keys().copied());
        }

        let features: Vec<Option<usize>> = std::iter::once(None)
            .chain(features.into_iter().map(Some))
            .collect();
        for class in std::iter::once(None).chain(classes.into_iter().map(Some)) {
            for &feature in &features {
                self.resolve(class, feature).check_rate(rate)?;
            }
        }
        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================
