//! Per-action errors returned by handlers and the invocation layer.

use thiserror::Error;

/// Action-level errors.  Handlers classify failures as retryable or not so
/// the retry layer can decide without string matching; `retry_after_secs`
/// overrides the computed backoff when a provider supplies one.
#[derive(Debug, Error, Clone)]
pub enum ActionError {
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("Template error: {0}")]
    Template(String),
    #[error("Timeout: action execution exceeded time limit")]
    Timeout,
    #[error("{message}")]
    Handler {
        message: String,
        retryable: bool,
        retry_after_secs: Option<u64>,
    },
    #[error("Execution cancelled")]
    Cancelled,
}

impl ActionError {
    /// A transient handler failure worth retrying.
    pub fn retryable(message: impl Into<String>) -> Self {
        ActionError::Handler {
            message: message.into(),
            retryable: true,
            retry_after_secs: None,
        }
    }

    /// A permanent handler failure.
    pub fn fatal(message: impl Into<String>) -> Self {
        ActionError::Handler {
            message: message.into(),
            retryable: false,
            retry_after_secs: None,
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            ActionError::Timeout => true,
            ActionError::Handler { retryable, .. } => *retryable,
            ActionError::Config(_) | ActionError::Template(_) | ActionError::Cancelled => false,
        }
    }

    pub fn retry_after_secs(&self) -> Option<u64> {
        match self {
            ActionError::Handler {
                retry_after_secs, ..
            } => *retry_after_secs,
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ActionError::retryable("503").is_retryable());
        assert!(!ActionError::fatal("bad address").is_retryable());
        assert!(ActionError::Timeout.is_retryable());
        assert!(!ActionError::Config("missing field".into()).is_retryable());
        assert!(!ActionError::Template("syntax".into()).is_retryable());
        assert!(!ActionError::Cancelled.is_retryable());
    }

    #[test]
    fn test_retry_after_hint() {
        let err = ActionError::Handler {
            message: "rate limited".into(),
            retryable: true,
            retry_after_secs: Some(30),
        };
        assert_eq!(err.retry_after_secs(), Some(30));
        assert_eq!(ActionError::Timeout.retry_after_secs(), None);
    }

    #[test]
    fn test_display_uses_message() {
        assert_eq!(ActionError::retryable("boom").to_string(), "boom");
        assert_eq!(
            ActionError::Config("x".into()).to_string(),
            "Configuration error: x"
        );
    }
}
