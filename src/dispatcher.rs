//! Trigger dispatch.
//!
//! Decides whether an incoming trigger event starts an execution of a recipe:
//! enabled flag, trigger type, provider filter fields, the trigger's condition
//! tree over the event payload, then throttling.  Denials are cheap and leave
//! no execution record.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;

use crate::evaluator::{evaluate_condition, lookup_path};
use crate::events::{EngineEvent, EventEmitter};
use crate::execution::{ExecutionContext, ExecutionRequest, TriggerEvent};
use crate::schema::{Recipe, Throttling, TriggerConfig};
use crate::throttle::ThrottleGuard;

#[derive(Debug)]
pub enum DispatchDecision {
    Dispatch(ExecutionRequest),
    Deny(DenyReason),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    RecipeDisabled,
    TriggerTypeMismatch,
    FilterMismatch,
    ConditionsNotMet,
    Throttled,
    HourlyLimitReached,
}

pub struct TriggerDispatcher {
    throttle: Arc<ThrottleGuard>,
    emitter: EventEmitter,
}

impl TriggerDispatcher {
    pub fn new(throttle: Arc<ThrottleGuard>, emitter: EventEmitter) -> Self {
        TriggerDispatcher { throttle, emitter }
    }

    /// Match `event` against `recipe` and, if everything passes, build the
    /// execution request for the scheduler.  Throttle state is only touched
    /// after the cheaper checks pass, so filtered-out events never consume
    /// rate-limit budget.
    pub fn evaluate(&self, recipe: &Arc<Recipe>, event: &TriggerEvent) -> DispatchDecision {
        if !recipe.enabled {
            return DispatchDecision::Deny(DenyReason::RecipeDisabled);
        }
        if recipe.trigger.config.trigger_type() != event.trigger_type {
            return DispatchDecision::Deny(DenyReason::TriggerTypeMismatch);
        }
        if !filter_matches(&recipe.trigger.config, &event.payload) {
            return DispatchDecision::Deny(DenyReason::FilterMismatch);
        }
        if let Some(condition) = &recipe.trigger.conditions {
            let mut lookup = |field: &str| lookup_path(&event.payload, field);
            if !evaluate_condition(condition, &mut lookup) {
                return DispatchDecision::Deny(DenyReason::ConditionsNotMet);
            }
        }

        let now = Utc::now();
        if let Some(policy) = &recipe.trigger.throttling {
            if !self.throttle.should_admit(&recipe.id, policy, now) {
                self.emitter.emit(EngineEvent::TriggerThrottled {
                    recipe_id: recipe.id.clone(),
                    timestamp: now,
                });
                return DispatchDecision::Deny(DenyReason::Throttled);
            }
        }
        if let Some(limit) = recipe.settings.max_executions_per_hour {
            // The per-recipe hourly cap is an implicit rate limit with its own
            // throttle state, independent of the trigger's policy.
            let hourly = Throttling::RateLimit {
                count: limit,
                period_seconds: 3600,
            };
            let key = format!("{}::hourly", recipe.id);
            if !self.throttle.should_admit(&key, &hourly, now) {
                self.emitter.emit(EngineEvent::TriggerThrottled {
                    recipe_id: recipe.id.clone(),
                    timestamp: now,
                });
                return DispatchDecision::Deny(DenyReason::HourlyLimitReached);
            }
        }

        let context = ExecutionContext {
            user: Some(recipe.owner.clone()),
            workspace: None,
            trigger: event.payload.clone(),
            variables: Default::default(),
            environment: recipe.settings.environment.clone(),
            action_timeout_secs: None,
        };
        DispatchDecision::Dispatch(ExecutionRequest {
            recipe: recipe.clone(),
            event: event.clone(),
            context,
        })
    }

    /// Drop throttle state for a removed recipe.
    pub fn forget(&self, recipe_id: &str) {
        self.throttle.forget(recipe_id);
        self.throttle.forget(&format!("{}::hourly", recipe_id));
    }
}

/// Provider filter fields from the trigger config, matched against the event
/// payload.  Unset fields match anything.
fn filter_matches(config: &TriggerConfig, payload: &Value) -> bool {
    match config {
        TriggerConfig::Email(email) => {
            let ci = !email.case_sensitive;
            opt_eq(&email.account, payload, "account")
                && opt_eq(&email.folder, payload, "folder")
                && opt_contains(&email.from_contains, payload, "from", ci)
                && opt_contains(&email.subject_contains, payload, "subject", ci)
        }
        TriggerConfig::Calendar(cal) => {
            opt_eq(&cal.calendar, payload, "calendar")
                && opt_contains(&cal.title_contains, payload, "title", true)
                && match &cal.attendee_contains {
                    None => true,
                    Some(needle) => attendee_matches(payload, needle),
                }
        }
        TriggerConfig::Schedule(schedule) => opt_eq(&schedule.expression, payload, "expression"),
        TriggerConfig::File(file) => {
            let path_ok = match &file.path {
                None => true,
                Some(prefix) => payload_str(payload, "path")
                    .map(|p| p.starts_with(prefix.as_str()))
                    .unwrap_or(false),
            };
            path_ok && opt_contains(&file.pattern_contains, payload, "path", true)
        }
        TriggerConfig::Webhook(webhook) => opt_eq(&webhook.endpoint, payload, "endpoint"),
        TriggerConfig::Custom(custom) => opt_eq(&custom.event_name, payload, "event_name"),
    }
}

fn payload_str<'a>(payload: &'a Value, key: &str) -> Option<&'a str> {
    payload.get(key)?.as_str()
}

fn opt_eq(expected: &Option<String>, payload: &Value, key: &str) -> bool {
    match expected {
        None => true,
        Some(expected) => payload_str(payload, key) == Some(expected.as_str()),
    }
}

fn opt_contains(needle: &Option<String>, payload: &Value, key: &str, ci: bool) -> bool {
    match needle {
        None => true,
        Some(needle) => match payload_str(payload, key) {
            None => false,
            Some(hay) => {
                if ci {
                    hay.to_lowercase().contains(&needle.to_lowercase())
                } else {
                    hay.contains(needle.as_str())
                }
            }
        },
    }
}

fn attendee_matches(payload: &Value, needle: &str) -> bool {
    let needle = needle.to_lowercase();
    match payload.get("attendees") {
        Some(Value::Array(list)) => list
            .iter()
            .filter_map(Value::as_str)
            .any(|a| a.to_lowercase().contains(&needle)),
        Some(Value::String(s)) => s.to_lowercase().contains(&needle),
        _ => false,
    }
}
