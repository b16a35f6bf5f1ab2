//! Action handler registry.
//!
//! Leaf actions (email, calendar, task, notification, file, webhook, custom)
//! are executed by host-registered handlers; the engine owns control flow and
//! retry policy but never the side effects.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::ActionError;
use crate::execution::ExecutionContext;

/// Executes one action type.  Implementations are expected to honor the
/// timeout passed via `context.action_timeout_secs` and to classify failures
/// as retryable or not (see [`ActionError`]).
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn execute(
        &self,
        action_type: &str,
        config: &Value,
        context: &ExecutionContext,
    ) -> Result<Value, ActionError>;
}

/// Registry of action handlers keyed by action type string.
#[derive(Default)]
pub struct ActionHandlerRegistry {
    handlers: HashMap<String, Arc<dyn ActionHandler>>,
}

impl ActionHandlerRegistry {
    pub fn new() -> Self {
        ActionHandlerRegistry {
            handlers: HashMap::new(),
        }
    }

    pub fn register(&mut self, action_type: &str, handler: Arc<dyn ActionHandler>) {
        self.handlers.insert(action_type.to_string(), handler);
    }

    pub fn get(&self, action_type: &str) -> Option<Arc<dyn ActionHandler>> {
        self.handlers.get(action_type).cloned()
    }

    pub fn contains(&self, action_type: &str) -> bool {
        self.handlers.contains_key(action_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct EchoHandler;

    #[async_trait]
    impl ActionHandler for EchoHandler {
        async fn execute(
            &self,
            action_type: &str,
            config: &Value,
            _context: &ExecutionContext,
        ) -> Result<Value, ActionError> {
            Ok(json!({"type": action_type, "config": config}))
        }
    }

    #[tokio::test]
    async fn test_register_and_execute() {
        let mut registry = ActionHandlerRegistry::new();
        registry.register("email", Arc::new(EchoHandler));

        let handler = registry.get("email").unwrap();
        let out = handler
            .execute("email", &json!({"op": "archive"}), &ExecutionContext::default())
            .await
            .unwrap();
        assert_eq!(out["config"]["op"], json!("archive"));
    }

    #[test]
    fn test_missing_handler() {
        let registry = ActionHandlerRegistry::new();
        assert!(registry.get("calendar").is_none());
        assert!(!registry.contains("calendar"));
    }
}
