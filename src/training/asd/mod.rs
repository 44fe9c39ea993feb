//! Adaptive Steepest Descent: full-batch refinement of one task's matrix.
//!
//! Each iteration:
//!
//! 1. Score every labeled example, compute residuals and the penalized
//!    average log-likelihood `L`.
//! 2. Stop if `|ΔL| < epsilon`.
//! 3. Form the penalized gradient `A` (Gaussian: `−B/variance`; Laplace: a
//!    subgradient that is exactly zero inside `[−λ, λ]` at a zero coefficient).
//! 4. Stop if `‖A‖ <= gradient_epsilon`.
//! 5. Pick a step size (safe, or adaptive along `A`) and step, capping at
//!    zero under a Laplace prior.
//! 6. Optionally take bonus steps with a doubling rate while `L` improves.
//!
//! Example multiplicities weight scores, gradients and step sizes.

mod optimizer;
mod params;

pub use optimizer::{AsdOptimizer, AsdOutcome, Termination};
pub use params::{AsdError, AsdParams, StepSizeMode};
