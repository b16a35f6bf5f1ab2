//! Error types for the recipe engine.
//!
//! - [`ActionError`]: errors raised during a single action invocation.
//! - [`EngineError`]: validation, admission, scheduling and run-level errors.

pub mod action_error;
pub mod engine_error;

pub use action_error::ActionError;
pub use engine_error::EngineError;

/// Convenience alias for engine-level results.
pub type EngineResult<T> = Result<T, EngineError>;
/// Convenience alias for action-level results.
pub type ActionResult<T> = Result<T, ActionError>;
