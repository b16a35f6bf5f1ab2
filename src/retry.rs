//! Retry & error handling around a single action invocation.
//!
//! The interpreter resolves the action's config and strategy; this module owns
//! the attempt loop: per-attempt timeout, retryability gating, capped
//! exponential backoff, and the per-attempt records that end up in
//! `ActionExecution.retries`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::ActionError;
use crate::events::{EngineEvent, EventEmitter};
use crate::execution::{ExecutionContext, RetryAttempt};
use crate::handler::ActionHandler;
use crate::schema::RetryPolicy;

/// Delay before the next attempt, given how many attempts have completed.
/// `delay_seconds * backoff_multiplier^(completed - 1)`, capped at
/// `max_delay_seconds`; a provider-supplied `retry_after` hint wins.
pub fn calculate_retry_delay(
    policy: &RetryPolicy,
    completed_attempts: u32,
    error: &ActionError,
) -> Duration {
    if let Some(after) = error.retry_after_secs() {
        return Duration::from_secs(after);
    }
    let exponent = completed_attempts.saturating_sub(1) as i32;
    let secs = policy.delay_seconds * policy.backoff_multiplier.powi(exponent);
    let capped = secs.min(policy.max_delay_seconds).max(0.0);
    Duration::from_secs_f64(capped)
}

/// Empty conditions retry any retryable error; otherwise the error message
/// must contain one of the listed substrings.
pub fn error_matches_conditions(error: &ActionError, conditions: &[String]) -> bool {
    if conditions.is_empty() {
        return true;
    }
    let message = error.to_string();
    conditions.iter().any(|c| message.contains(c.as_str()))
}

/// One handler call under the action timeout.  Cancellation never interrupts
/// an in-flight call; the token is observed between attempts instead.
pub async fn invoke_once(
    handler: &Arc<dyn ActionHandler>,
    action_type: &str,
    config: &Value,
    context: &ExecutionContext,
    timeout: Option<Duration>,
) -> Result<Value, ActionError> {
    let call = handler.execute(action_type, config, context);
    match timeout {
        Some(limit) => match tokio::time::timeout(limit, call).await {
            Ok(r) => r,
            Err(_) => Err(ActionError::Timeout),
        },
        None => call.await,
    }
}

/// Outcome of the attempt loop.
pub struct AttemptOutcome {
    pub result: Result<Value, ActionError>,
    /// One entry per failed attempt, in order.
    pub attempts: Vec<RetryAttempt>,
}

/// Run the handler up to `max_attempts` times.  `policy == None` means a
/// single attempt.  Retries happen only for retryable errors that match the
/// policy's retry conditions; exhaustion returns the last error.
/// Cancellation is cooperative: it is checked between attempts and during
/// backoff waits, never against an in-flight handler call.
#[allow(clippy::too_many_arguments)]
pub async fn run_with_retry(
    handler: &Arc<dyn ActionHandler>,
    action_type: &str,
    config: &Value,
    context: &ExecutionContext,
    policy: Option<&RetryPolicy>,
    timeout: Option<Duration>,
    cancel: &CancellationToken,
    emitter: &EventEmitter,
    execution_id: &str,
    action_id: &str,
) -> AttemptOutcome {
    let max_attempts = policy.map(|p| p.max_attempts.max(1)).unwrap_or(1);
    let mut attempts = Vec::new();
    let mut last_error = None;

    for attempt in 1..=max_attempts {
        match invoke_once(handler, action_type, config, context, timeout).await {
            Ok(output) => {
                return AttemptOutcome {
                    result: Ok(output),
                    attempts,
                };
            }
            Err(ActionError::Cancelled) => {
                return AttemptOutcome {
                    result: Err(ActionError::Cancelled),
                    attempts,
                };
            }
            Err(error) => {
                attempts.push(RetryAttempt {
                    attempt,
                    at: Utc::now(),
                    error: error.to_string(),
                });

                let matched_policy = if attempt < max_attempts && error.is_retryable() {
                    policy.filter(|p| error_matches_conditions(&error, &p.retry_conditions))
                } else {
                    None
                };

                if let Some(policy) = matched_policy {
                    let delay = calculate_retry_delay(policy, attempt, &error);
                    if emitter.is_active() {
                        emitter.emit(EngineEvent::ActionRetry {
                            execution_id: execution_id.to_string(),
                            action_id: action_id.to_string(),
                            attempt,
                            error: error.to_string(),
                            timestamp: Utc::now(),
                        });
                    }
                    last_error = Some(error);
                    if cancel.is_cancelled() {
                        return AttemptOutcome {
                            result: Err(ActionError::Cancelled),
                            attempts,
                        };
                    }
                    if !delay.is_zero() {
                        tokio::select! {
                            _ = cancel.cancelled() => {
                                return AttemptOutcome {
                                    result: Err(ActionError::Cancelled),
                                    attempts,
                                };
                            }
                            _ = tokio::time::sleep(delay) => {}
                        }
                    }
                } else {
                    return AttemptOutcome {
                        result: Err(error),
                        attempts,
                    };
                }
            }
        }
    }

    AttemptOutcome {
        result: Err(last_error.unwrap_or_else(|| ActionError::fatal("unknown error"))),
        attempts,
    }
}
