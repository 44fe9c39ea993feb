//! High-level learner configuration with builder pattern.
//!
//! [`LearnerConfig`] gathers everything a learner block needs: the update
//! algorithm, the learning rate, the truncation schedule, and optional
//! priors. The builder is generated by `bon` and validates on `build()`.
//!
//! # Example
//!
//! ```
//! use plrm::model::{Algorithm, LearnerConfig};
//! use plrm::training::{Prior, PriorSet, TruncationParams};
//!
//! // All defaults: truncated gradient, η = 0.1, no regularization
//! let config = LearnerConfig::builder().build().unwrap();
//!
//! // Laplace prior applied every 10 examples
//! let config = LearnerConfig::builder()
//!     .learning_rate(0.05)
//!     .truncation(TruncationParams { period: 10, ..Default::default() })
//!     .priors(PriorSet::uniform(Prior::laplace(0.0, 2.0)))
//!     .build()
//!     .unwrap();
//!
//! // Exponentiated gradient
//! let config = LearnerConfig::builder()
//!     .algorithm(Algorithm::ExponentiatedGradient { scale: 4.0 })
//!     .build()
//!     .unwrap();
//! ```

use bon::Builder;
use serde::{Deserialize, Serialize};

use crate::training::{PriorError, PriorSet, TruncationParams, TruncationPolicy, Verbosity};

// =============================================================================
// ConfigError
// =============================================================================

/// Errors that can occur during configuration validation.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("learning_rate must be positive and finite, got {0}")]
    InvalidLearningRate(f64),

    #[error("truncation period must be at least 1")]
    InvalidPeriod,

    #[error("gravity must be non-negative and finite, got {0}")]
    InvalidGravity(f64),

    #[error("theta must be non-negative, got {0}")]
    InvalidTheta(f64),

    #[error("exponentiated-gradient scale must be positive and finite, got {0}")]
    InvalidScale(f64),

    #[error("a block needs at least one class, got {0}")]
    InvalidClassCount(usize),

    #[error(transparent)]
    Prior(#[from] PriorError),
}

// =============================================================================
// Algorithm
// =============================================================================

/// Online update rule of a learner block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub enum Algorithm {
    /// Additive gradient steps on a sparse matrix with lazy truncation.
    #[default]
    TruncatedGradient,
    /// Multiplicative updates on a dual `V⁺`/`V⁻` pair.
    ///
    /// `scale` bounds the L1 norm of each class's effective weights.
    ExponentiatedGradient { scale: f64 },
}

// =============================================================================
// LearnerConfig
// =============================================================================

/// Configuration shared by every block of a learner.
#[derive(Debug, Clone, PartialEq, Builder, Serialize, Deserialize)]
#[builder(
    derive(Clone, Debug),
    finish_fn(vis = "", name = __build_internal)
)]
pub struct LearnerConfig {
    /// Update rule. Default: truncated gradient.
    #[builder(default)]
    #[serde(default)]
    pub algorithm: Algorithm,

    /// Online learning rate η. Default: 0.1.
    #[builder(default = 0.1)]
    pub learning_rate: f64,

    /// Truncation schedule and legacy gravity.
    #[builder(default)]
    #[serde(default)]
    pub truncation: TruncationParams,

    /// Priors used by truncation and batch refinement. Take precedence over
    /// gravity when set.
    #[serde(default)]
    pub priors: Option<PriorSet>,

    /// Verbosity level. Default: `Silent`.
    #[builder(default)]
    #[serde(default)]
    pub verbosity: Verbosity,
}

/// Custom finishing function that validates the config.
impl<S: learner_config_builder::IsComplete> LearnerConfigBuilder<S> {
    /// Build and validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] if any parameter is invalid:
    /// - `learning_rate <= 0`
    /// - truncation period `0`, negative gravity or theta
    /// - exponentiated-gradient `scale <= 0`
    /// - invalid priors, or a Gaussian prior with variance below `η·K`
    pub fn build(self) -> Result<LearnerConfig, ConfigError> {
        let config = self.__build_internal();
        config.validate()?;
        Ok(config)
    }
}

impl LearnerConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.learning_rate.is_finite() || self.learning_rate <= 0.0 {
            return Err(ConfigError::InvalidLearningRate(self.learning_rate));
        }

        if let Algorithm::ExponentiatedGradient { scale } = self.algorithm {
            if !scale.is_finite() || scale <= 0.0 {
                return Err(ConfigError::InvalidScale(scale));
            }
        }

        // Also checks priors against the per-epoch rate.
        self.truncation_policy().map(|_| ())
    }

    /// A fresh truncation policy for one block.
    pub fn truncation_policy(&self) -> Result<TruncationPolicy, ConfigError> {
        TruncationPolicy::new(&self.truncation, self.learning_rate, self.priors.as_ref())
    }
}

impl Default for LearnerConfig {
    fn default() -> Self {
        Self::builder().build().expect("default config is valid")
    }
}

// =============================================================================
// Tests
// =============================================================================
