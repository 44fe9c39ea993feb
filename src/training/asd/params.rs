//! Parameters and errors for Adaptive Steepest Descent.

use serde::{Deserialize, Serialize};

use crate::repr::MatrixError;
use crate::training::Verbosity;

// ============================================================================
// AsdError
// ============================================================================

/// Errors raised by batch refinement.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum AsdError {
    /// Feature-, class- or coefficient-scoped priors are configured.
    #[error("batch refinement supports a single uniform prior, found scoped priors")]
    MixedPriors,

    #[error("batch refinement does not support skewed priors")]
    UnsupportedSkew,

    /// A prior feature other than skew that the optimizer cannot honor.
    #[error("batch refinement does not support prior {0}")]
    UnsupportedPrior(&'static str),

    /// Zero variance pins every coefficient; there is nothing to optimize.
    #[error("batch refinement needs a prior with positive variance")]
    DegeneratePrior,

    #[error("{field} must be non-negative and finite, got {value}")]
    InvalidEpsilon { field: &'static str, value: f64 },

    #[error("gravity must be non-negative and finite, got {0}")]
    InvalidGravity(f64),

    #[error("label {label} out of range for {n_classes} classes")]
    ClassCountMismatch { label: usize, n_classes: usize },

    #[error(transparent)]
    Matrix(#[from] MatrixError),
}

// ============================================================================
// AsdParams
// ============================================================================

/// How the base step size of each iteration is chosen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum StepSizeMode {
    /// `η = n / (Σ m·‖x‖² + n/variance)`; never overshoots a quadratic bound.
    #[default]
    Safe,
    /// Derived from the gradient direction and the per-example maximum
    /// absolute directional derivative. Replaced by `Safe` under a Laplace
    /// prior.
    Adaptive,
}

/// Parameters for batch refinement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AsdParams {
    /// Stop when `|ΔL|` falls below this.
    pub epsilon: f64,

    /// Stop when `‖A‖` falls to or below this.
    pub gradient_epsilon: f64,

    pub max_iterations: usize,

    pub step_size: StepSizeMode,

    // --- Bonus steps ---
    /// Keep doubling the step along the same direction while `L` improves.
    pub bonus_steps: bool,

    /// Cap on bonus steps per iteration. Hitting it logs a warning.
    pub max_bonus_steps: usize,

    // --- Logging ---
    pub verbosity: Verbosity,
}

impl Default for AsdParams {
    fn default() -> Self {
        Self {
            epsilon: 1e-8,
            gradient_epsilon: 1e-10,
            max_iterations: 1000,
            step_size: StepSizeMode::default(),
            bonus_steps: true,
            max_bonus_steps: 30,
            verbosity: Verbosity::default(),
        }
    }
}

impl AsdParams {
    pub fn validate(&self) -> Result<(), AsdError> {
        for (field, value) in [
            ("epsilon", self.epsilon),
            ("gradient_epsilon", self.gradient_epsilon),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(AsdError::InvalidEpsilon { field, value });
            }
        }
        Ok(())
    }
}
