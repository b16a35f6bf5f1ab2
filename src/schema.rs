//! Recipe data model.
//!
//! A [`Recipe`] pairs one [`Trigger`] with an ordered tree of [`Action`]s plus
//! the policies that govern a run (timeouts, concurrency, throttling, retry).
//! Recipes are produced by an out-of-scope builder and are read-only to the
//! engine at run time, except for `stats` and `last_executed_at`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

// ================================
// Recipe
// ================================

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Recipe {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    pub owner: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    pub trigger: Trigger,
    pub actions: Vec<Action>,
    #[serde(default)]
    pub settings: RecipeSettings,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub last_executed_at: Option<DateTime<Utc>>,
}

fn default_enabled() -> bool {
    true
}

// ================================
// Trigger
// ================================

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Trigger {
    #[serde(flatten)]
    pub config: TriggerConfig,
    /// Optional condition tree applied to the event payload before dispatch.
    #[serde(default)]
    pub conditions: Option<Condition>,
    #[serde(default)]
    pub throttling: Option<Throttling>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Email,
    Calendar,
    Schedule,
    File,
    Webhook,
    Custom,
}

impl std::fmt::Display for TriggerType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TriggerType::Email => "email",
            TriggerType::Calendar => "calendar",
            TriggerType::Schedule => "schedule",
            TriggerType::File => "file",
            TriggerType::Webhook => "webhook",
            TriggerType::Custom => "custom",
        };
        write!(f, "{}", s)
    }
}

/// Provider-specific trigger configuration, tagged by `type`.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerConfig {
    Email(EmailTriggerConfig),
    Calendar(CalendarTriggerConfig),
    Schedule(ScheduleTriggerConfig),
    File(FileTriggerConfig),
    Webhook(WebhookTriggerConfig),
    Custom(CustomTriggerConfig),
}

impl TriggerConfig {
    pub fn trigger_type(&self) -> TriggerType {
        match self {
            TriggerConfig::Email(_) => TriggerType::Email,
            TriggerConfig::Calendar(_) => TriggerType::Calendar,
            TriggerConfig::Schedule(_) => TriggerType::Schedule,
            TriggerConfig::File(_) => TriggerType::File,
            TriggerConfig::Webhook(_) => TriggerType::Webhook,
            TriggerConfig::Custom(_) => TriggerType::Custom,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct EmailTriggerConfig {
    #[serde(default)]
    pub account: Option<String>,
    #[serde(default)]
    pub folder: Option<String>,
    #[serde(default)]
    pub from_contains: Option<String>,
    #[serde(default)]
    pub subject_contains: Option<String>,
    #[serde(default)]
    pub case_sensitive: bool,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct CalendarTriggerConfig {
    #[serde(default)]
    pub calendar: Option<String>,
    #[serde(default)]
    pub title_contains: Option<String>,
    #[serde(default)]
    pub attendee_contains: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct ScheduleTriggerConfig {
    /// Cron expression owned by the external scheduler; matched verbatim.
    #[serde(default)]
    pub expression: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct FileTriggerConfig {
    #[serde(default)]
    pub path: Option<String>,
    #[serde(default)]
    pub pattern_contains: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct WebhookTriggerConfig {
    #[serde(default)]
    pub endpoint: Option<String>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct CustomTriggerConfig {
    #[serde(default)]
    pub event_name: Option<String>,
    #[serde(flatten)]
    pub extra: HashMap<String, Value>,
}

// ================================
// Throttling
// ================================

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Throttling {
    None,
    RateLimit {
        count: u32,
        period_seconds: u64,
    },
    Debounce {
        debounce_seconds: u64,
    },
    OncePerPeriod {
        period: ThrottlePeriod,
        /// "HH:MM" boundary shift for `day` periods.
        #[serde(default)]
        reset_time: Option<String>,
    },
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ThrottlePeriod {
    Hour,
    Day,
    Week,
    Month,
}

// ================================
// Condition
// ================================

/// One node of a condition tree.  The node's own `field`/`operator`/`value`
/// test is combined with each nested condition using that child's `logic`
/// connective (default AND), short-circuited left to right.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Condition {
    pub field: String,
    pub operator: ConditionOperator,
    #[serde(default)]
    pub value: Value,
    #[serde(default)]
    pub logic: Option<ConditionLogic>,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConditionLogic {
    And,
    Or,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    GreaterThan,
    LessThan,
    GreaterThanOrEqual,
    LessThanOrEqual,
    In,
    NotIn,
    Exists,
    NotExists,
    Regex,
    IsEmpty,
    IsNotEmpty,
}

// ================================
// Action
// ================================

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct Action {
    /// Unique within the recipe, including nested actions.
    pub id: String,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(flatten)]
    pub config: ActionConfig,
    /// Pre-execution guard; when false the action is skipped silently.
    #[serde(default)]
    pub conditions: Option<Condition>,
    #[serde(default)]
    pub error_handling: Option<ErrorHandling>,
    #[serde(default)]
    pub continue_on_error: bool,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub retry: Option<RetryPolicy>,
}

/// Action configuration, tagged by `type`.  Leaf configs are opaque to the
/// engine and interpreted by the registered handler; control-flow configs are
/// typed and dispatched once at the interpreter boundary.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionConfig {
    Email {
        #[serde(default)]
        config: Value,
    },
    Calendar {
        #[serde(default)]
        config: Value,
    },
    Task {
        #[serde(default)]
        config: Value,
    },
    Notification {
        #[serde(default)]
        config: Value,
    },
    File {
        #[serde(default)]
        config: Value,
    },
    Webhook {
        #[serde(default)]
        config: Value,
    },
    Custom {
        #[serde(default)]
        config: Value,
    },
    Conditional {
        condition: Condition,
        #[serde(default)]
        true_actions: Vec<Action>,
        #[serde(default)]
        false_actions: Vec<Action>,
    },
    Loop {
        #[serde(flatten)]
        kind: LoopKind,
        #[serde(default = "default_max_iterations")]
        max_iterations: u32,
        #[serde(default)]
        actions: Vec<Action>,
    },
    StopExecution {},
    PauseExecution {},
    ResumeExecution {},
}

fn default_max_iterations() -> u32 {
    100
}

impl ActionConfig {
    /// Handler registry key for leaf actions; `None` for control flow.
    pub fn handler_type(&self) -> Option<&'static str> {
        match self {
            ActionConfig::Email { .. } => Some("email"),
            ActionConfig::Calendar { .. } => Some("calendar"),
            ActionConfig::Task { .. } => Some("task"),
            ActionConfig::Notification { .. } => Some("notification"),
            ActionConfig::File { .. } => Some("file"),
            ActionConfig::Webhook { .. } => Some("webhook"),
            ActionConfig::Custom { .. } => Some("custom"),
            _ => None,
        }
    }

    pub fn leaf_config(&self) -> Option<&Value> {
        match self {
            ActionConfig::Email { config }
            | ActionConfig::Calendar { config }
            | ActionConfig::Task { config }
            | ActionConfig::Notification { config }
            | ActionConfig::File { config }
            | ActionConfig::Webhook { config }
            | ActionConfig::Custom { config } => Some(config),
            _ => None,
        }
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(tag = "loop_type", rename_all = "snake_case")]
pub enum LoopKind {
    /// Iterate a variable-resolved sequence.
    ForEach {
        /// Variable name (or `{{ ... }}` template) producing the sequence.
        source: String,
        #[serde(default = "default_item_variable")]
        item_variable: String,
    },
    /// Re-evaluate `condition` before each iteration.
    While { condition: Condition },
    /// Run a fixed number of times.
    Repeat { count: u32 },
}

fn default_item_variable() -> String {
    "item".to_string()
}

// ================================
// Error handling & retry
// ================================

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ErrorHandling {
    pub strategy: ErrorStrategy,
    #[serde(default)]
    pub fallback_actions: Vec<Action>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ErrorStrategy {
    Ignore,
    Stop,
    Retry,
    Fallback,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_delay_seconds")]
    pub delay_seconds: f64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_max_delay_seconds")]
    pub max_delay_seconds: f64,
    /// Substring matches against the error message; empty means retry any
    /// retryable error.
    #[serde(default)]
    pub retry_conditions: Vec<String>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: default_max_attempts(),
            delay_seconds: default_delay_seconds(),
            backoff_multiplier: default_backoff_multiplier(),
            max_delay_seconds: default_max_delay_seconds(),
            retry_conditions: Vec::new(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_delay_seconds() -> f64 {
    1.0
}
fn default_backoff_multiplier() -> f64 {
    2.0
}
fn default_max_delay_seconds() -> f64 {
    60.0
}

// ================================
// Settings
// ================================

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct RecipeSettings {
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    #[serde(default)]
    pub max_executions_per_hour: Option<u32>,
    #[serde(default)]
    pub max_concurrent_executions: Option<usize>,
    #[serde(default)]
    pub priority: RecipePriority,
    #[serde(default)]
    pub log_level: Option<String>,
    /// Seed variables for the recipe scope.
    #[serde(default)]
    pub variables: HashMap<String, VariableDef>,
    /// Computed variables, evaluated lazily once per execution.
    #[serde(default)]
    pub computed: HashMap<String, ComputedVariable>,
    #[serde(default)]
    pub environment: HashMap<String, String>,
}

/// A recipe variable: either a plain JSON value or a detailed form carrying
/// the `encrypted` flag.
#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(untagged)]
pub enum VariableDef {
    Detailed {
        value: Value,
        #[serde(default)]
        encrypted: bool,
    },
    Plain(Value),
}

impl VariableDef {
    pub fn value(&self) -> &Value {
        match self {
            VariableDef::Detailed { value, .. } => value,
            VariableDef::Plain(value) => value,
        }
    }

    pub fn is_encrypted(&self) -> bool {
        matches!(self, VariableDef::Detailed { encrypted: true, .. })
    }
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ComputedVariable {
    pub source: ComputedSource,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ComputedSource {
    /// Expression evaluated against the currently resolved variables.
    pub transform: String,
}

#[derive(Deserialize, Serialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default)]
#[serde(rename_all = "snake_case")]
pub enum RecipePriority {
    Low,
    #[default]
    Normal,
    High,
}

// ================================
// Stats
// ================================

/// Capacity of the `recent_executions` ring buffer.
pub const RECENT_EXECUTIONS_CAP: usize = 100;

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct AutomationStats {
    pub total_executions: u64,
    pub successful_executions: u64,
    pub failed_executions: u64,
    pub success_rate: f64,
    pub avg_execution_time_ms: f64,
    /// Ring buffer of the most recent terminal executions, oldest first.
    #[serde(default)]
    pub recent_executions: Vec<ExecutionSummary>,
    #[serde(default)]
    pub last_executed_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct ExecutionSummary {
    pub execution_id: String,
    pub status: crate::execution::ExecutionStatus,
    pub duration_ms: u64,
    pub finished_at: DateTime<Utc>,
}

impl Recipe {
    /// Total number of actions in the tree, nested lists included.
    pub fn action_count(&self) -> usize {
        fn count(actions: &[Action]) -> usize {
            actions
                .iter()
                .map(|a| {
                    1 + match &a.config {
                        ActionConfig::Conditional {
                            true_actions,
                            false_actions,
                            ..
                        } => count(true_actions) + count(false_actions),
                        ActionConfig::Loop { actions, .. } => count(actions),
                        _ => 0,
                    } + a
                        .error_handling
                        .as_ref()
                        .map(|eh| count(&eh.fallback_actions))
                        .unwrap_or(0)
                })
                .sum()
        }
        count(&self.actions)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn minimal_recipe_json() -> Value {
        json!({
            "id": "r1",
            "name": "Archive newsletters",
            "owner": "user@example.com",
            "trigger": {
                "type": "email",
                "folder": "INBOX",
                "from_contains": "newsletter"
            },
            "actions": [
                {"id": "a1", "type": "email", "config": {"op": "archive"}}
            ]
        })
    }

    #[test]
    fn test_recipe_deserialize_minimal() {
        let recipe: Recipe = serde_json::from_value(minimal_recipe_json()).unwrap();
        assert!(recipe.enabled);
        assert_eq!(recipe.trigger.config.trigger_type(), TriggerType::Email);
        assert_eq!(recipe.actions.len(), 1);
        assert_eq!(recipe.actions[0].config.handler_type(), Some("email"));
        assert_eq!(recipe.settings.priority, RecipePriority::Normal);
    }

    #[test]
    fn test_action_config_tagged_by_type() {
        let action: Action = serde_json::from_value(json!({
            "id": "c1",
            "type": "conditional",
            "condition": {"field": "subject", "operator": "contains", "value": "urgent"},
            "true_actions": [
                {"id": "n1", "type": "notification", "config": {"text": "ping"}}
            ]
        }))
        .unwrap();
        match &action.config {
            ActionConfig::Conditional {
                true_actions,
                false_actions,
                ..
            } => {
                assert_eq!(true_actions.len(), 1);
                assert!(false_actions.is_empty());
            }
            other => panic!("Expected conditional, got {:?}", other),
        }
    }

    #[test]
    fn test_loop_kind_flattened() {
        let action: Action = serde_json::from_value(json!({
            "id": "l1",
            "type": "loop",
            "loop_type": "for_each",
            "source": "attachments",
            "actions": [
                {"id": "f1", "type": "file", "config": {"op": "save"}}
            ]
        }))
        .unwrap();
        match &action.config {
            ActionConfig::Loop {
                kind: LoopKind::ForEach { source, item_variable },
                max_iterations,
                actions,
            } => {
                assert_eq!(source, "attachments");
                assert_eq!(item_variable, "item");
                assert_eq!(*max_iterations, 100);
                assert_eq!(actions.len(), 1);
            }
            other => panic!("Expected for_each loop, got {:?}", other),
        }
    }

    #[test]
    fn test_retry_policy_defaults() {
        let policy: RetryPolicy = serde_json::from_value(json!({})).unwrap();
        assert_eq!(policy.max_attempts, 3);
        assert_eq!(policy.delay_seconds, 1.0);
        assert_eq!(policy.backoff_multiplier, 2.0);
        assert_eq!(policy.max_delay_seconds, 60.0);
        assert!(policy.retry_conditions.is_empty());
    }

    #[test]
    fn test_throttling_tagged() {
        let t: Throttling = serde_json::from_value(json!({
            "type": "rate_limit", "count": 3, "period_seconds": 60
        }))
        .unwrap();
        assert!(matches!(
            t,
            Throttling::RateLimit { count: 3, period_seconds: 60 }
        ));

        let t: Throttling = serde_json::from_value(json!({
            "type": "once_per_period", "period": "day", "reset_time": "06:00"
        }))
        .unwrap();
        assert!(matches!(t, Throttling::OncePerPeriod { .. }));
    }

    #[test]
    fn test_variable_def_forms() {
        let plain: VariableDef = serde_json::from_value(json!("hello")).unwrap();
        assert!(!plain.is_encrypted());
        assert_eq!(plain.value(), &json!("hello"));

        let detailed: VariableDef =
            serde_json::from_value(json!({"value": "s3cret", "encrypted": true})).unwrap();
        assert!(detailed.is_encrypted());
    }

    #[test]
    fn test_priority_ordering() {
        assert!(RecipePriority::High > RecipePriority::Normal);
        assert!(RecipePriority::Normal > RecipePriority::Low);
    }

    #[test]
    fn test_action_count_recursive() {
        let recipe: Recipe = serde_json::from_value(json!({
            "id": "r1",
            "name": "n",
            "owner": "o",
            "trigger": {"type": "webhook"},
            "actions": [
                {"id": "a1", "type": "loop", "loop_type": "repeat", "count": 2,
                 "actions": [{"id": "a2", "type": "task"}]},
                {"id": "a3", "type": "email"}
            ]
        }))
        .unwrap();
        assert_eq!(recipe.action_count(), 3);
    }
}
