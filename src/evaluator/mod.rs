//! Condition evaluation.
//!
//! [`evaluate_condition`] walks a [`Condition`](crate::schema::Condition)
//! tree against a field lookup, short-circuiting left to right; the pure
//! per-operator helpers live in [`operators`].

pub mod condition;
pub mod operators;

pub use condition::{evaluate_condition, lookup_path};
