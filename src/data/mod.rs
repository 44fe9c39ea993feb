//! Training data abstractions.
//!
//! Training data is a stream of sparse [`Example`]s. Each example lists its
//! active features as `(feature_index, value)` pairs and carries zero or one
//! true class per task.
//!
//! # Intercept
//!
//! Feature [`DUMMY_FEATURE`] is reserved: every example has it with value
//! `1.0`, so the matching matrix row acts as a bias term.

mod example;

pub use example::{Example, ExampleError, TaskId, DUMMY_FEATURE};
