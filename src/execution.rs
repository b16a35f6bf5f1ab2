//! Execution records: one [`Execution`] per triggered run, one
//! [`ActionExecution`] per leaf action invocation (loop iterations append one
//! record per iteration).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

use crate::schema::{Recipe, TriggerType};

/// Execution status.  Transitions are monotonic: once a terminal status is
/// reached the execution never re-enters `Queued` or `Running`.
#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Timeout,
    Cancelled,
    Paused,
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed
                | ExecutionStatus::Failed
                | ExecutionStatus::Timeout
                | ExecutionStatus::Cancelled
        )
    }
}

/// An event pushed by an external trigger source (mailbox poller, calendar
/// webhook, file watcher, cron, webhook receiver).
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct TriggerEvent {
    pub trigger_type: TriggerType,
    #[serde(default)]
    pub payload: Value,
    #[serde(default = "Utc::now")]
    pub occurred_at: DateTime<Utc>,
}

impl TriggerEvent {
    pub fn new(trigger_type: TriggerType, payload: Value) -> Self {
        TriggerEvent {
            trigger_type,
            payload,
            occurred_at: Utc::now(),
        }
    }
}

/// Per-execution context handed to action handlers.
#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct ExecutionContext {
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub workspace: Option<String>,
    /// Snapshot of the triggering event payload.
    #[serde(default)]
    pub trigger: Value,
    /// Execution-scope variable seed.
    #[serde(default)]
    pub variables: HashMap<String, Value>,
    #[serde(default)]
    pub environment: HashMap<String, String>,
    /// Per-action timeout the handler is expected to honor, when set.
    #[serde(default)]
    pub action_timeout_secs: Option<u64>,
}

/// A dispatched request waiting for admission by the scheduler.
#[derive(Debug, Clone)]
pub struct ExecutionRequest {
    pub recipe: Arc<Recipe>,
    pub event: TriggerEvent,
    pub context: ExecutionContext,
}

/// Top-level error of a failed execution, detailed enough to reconstruct what
/// failed without engine-internal logs.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ExecutionError {
    /// Id of the action that produced the failure.
    pub action: String,
    pub message: String,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Execution {
    pub id: String,
    pub recipe_id: String,
    pub status: ExecutionStatus,
    pub event: TriggerEvent,
    pub context: ExecutionContext,
    /// Ordered per-leaf run records.
    #[serde(default)]
    pub actions: Vec<ActionExecution>,
    #[serde(default)]
    pub error: Option<ExecutionError>,
    pub queued_at: DateTime<Utc>,
    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl Execution {
    pub fn new(recipe_id: &str, event: TriggerEvent, context: ExecutionContext) -> Self {
        Execution {
            id: uuid::Uuid::new_v4().to_string(),
            recipe_id: recipe_id.to_string(),
            status: ExecutionStatus::Queued,
            event,
            context,
            actions: Vec::new(),
            error: None,
            queued_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    /// Set a terminal status exactly once; later attempts are ignored so
    /// status transitions stay monotonic.
    pub fn finish(&mut self, status: ExecutionStatus) {
        debug_assert!(status.is_terminal());
        if self.status.is_terminal() {
            return;
        }
        self.status = status;
        self.finished_at = Some(Utc::now());
    }

    pub fn duration_ms(&self) -> u64 {
        match (self.started_at, self.finished_at) {
            (Some(start), Some(end)) => (end - start).num_milliseconds().max(0) as u64,
            _ => 0,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ActionExecution {
    pub action_id: String,
    pub action_type: String,
    pub status: ExecutionStatus,
    #[serde(default)]
    pub input: Value,
    #[serde(default)]
    pub output: Value,
    #[serde(default)]
    pub error: Option<String>,
    /// One entry per failed attempt, in order; never longer than the retry
    /// policy's `max_attempts`.
    #[serde(default)]
    pub retries: Vec<RetryAttempt>,
    /// Engine annotations, e.g. a loop-limit note on the last record a capped
    /// loop produced.
    #[serde(default)]
    pub note: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
}

impl ActionExecution {
    pub fn started(action_id: &str, action_type: &str, input: Value) -> Self {
        ActionExecution {
            action_id: action_id.to_string(),
            action_type: action_type.to_string(),
            status: ExecutionStatus::Running,
            input,
            output: Value::Null,
            error: None,
            retries: Vec::new(),
            note: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct RetryAttempt {
    pub attempt: u32,
    pub at: DateTime<Utc>,
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_terminal_statuses() {
        assert!(ExecutionStatus::Completed.is_terminal());
        assert!(ExecutionStatus::Failed.is_terminal());
        assert!(ExecutionStatus::Timeout.is_terminal());
        assert!(ExecutionStatus::Cancelled.is_terminal());
        assert!(!ExecutionStatus::Queued.is_terminal());
        assert!(!ExecutionStatus::Running.is_terminal());
        assert!(!ExecutionStatus::Paused.is_terminal());
    }

    #[test]
    fn test_finish_is_monotonic() {
        let event = TriggerEvent::new(TriggerType::Webhook, json!({}));
        let mut execution = Execution::new("r1", event, ExecutionContext::default());
        execution.status = ExecutionStatus::Running;
        execution.finish(ExecutionStatus::Completed);
        assert_eq!(execution.status, ExecutionStatus::Completed);

        // A later cancel must not overwrite the terminal status.
        execution.finish(ExecutionStatus::Cancelled);
        assert_eq!(execution.status, ExecutionStatus::Completed);
    }

    #[test]
    fn test_execution_serde_roundtrip_keeps_records() {
        let event = TriggerEvent::new(TriggerType::Email, json!({"subject": "hi"}));
        let mut execution = Execution::new("r1", event, ExecutionContext::default());
        let mut record = ActionExecution::started("a1", "email", json!({"op": "archive"}));
        record.retries.push(RetryAttempt {
            attempt: 1,
            at: Utc::now(),
            error: "connection reset".into(),
        });
        record.status = ExecutionStatus::Completed;
        execution.actions.push(record);

        let round: Execution =
            serde_json::from_value(serde_json::to_value(&execution).unwrap()).unwrap();
        assert_eq!(round.actions.len(), 1);
        assert_eq!(round.actions[0].retries.len(), 1);
        assert_eq!(round.actions[0].retries[0].error, "connection reset");
    }
}
