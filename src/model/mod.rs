//! High-level configuration.
//!
//! [`LearnerConfig`] is built with a validated builder and shared by every
//! block of a [`Learner`](crate::training::Learner).

mod config;

pub use config::{Algorithm, ConfigError, LearnerConfig};
