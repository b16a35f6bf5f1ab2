//! Engine-level error taxonomy.

use thiserror::Error;

/// Errors surfaced by the engine outside a single action invocation.
///
/// `Throttled` is not a failure: it marks a trigger suppressed by policy.
/// `QueueFull` is returned synchronously from admission so the caller can
/// retry or alert instead of losing the event silently.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Validation error: {0}")]
    Validation(String),
    #[error("Trigger throttled: {0}")]
    Throttled(String),
    #[error("Execution queue full (capacity {0})")]
    QueueFull(usize),
    #[error("Execution timed out")]
    Timeout,
    #[error("Execution cancelled")]
    Cancelled,
    #[error("Execution not found: {0}")]
    ExecutionNotFound(String),
    #[error("Recipe not found: {0}")]
    RecipeNotFound(String),
    #[error("No handler registered for action type: {0}")]
    HandlerNotFound(String),
    #[error("Action failed: action={action_id}, error={message}")]
    ActionFailed { action_id: String, message: String },
    #[error("Internal error: {0}")]
    Internal(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_engine_error_display() {
        assert_eq!(
            EngineError::Validation("duplicate action id".into()).to_string(),
            "Validation error: duplicate action id"
        );
        assert_eq!(
            EngineError::Throttled("r1".into()).to_string(),
            "Trigger throttled: r1"
        );
        assert_eq!(
            EngineError::QueueFull(50).to_string(),
            "Execution queue full (capacity 50)"
        );
        assert_eq!(EngineError::Timeout.to_string(), "Execution timed out");
        assert_eq!(EngineError::Cancelled.to_string(), "Execution cancelled");
        assert_eq!(
            EngineError::HandlerNotFound("email".into()).to_string(),
            "No handler registered for action type: email"
        );
        assert_eq!(
            EngineError::ActionFailed {
                action_id: "a1".into(),
                message: "boom".into()
            }
            .to_string(),
            "Action failed: action=a1, error=boom"
        );
    }
}
