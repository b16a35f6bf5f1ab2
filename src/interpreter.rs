//! Action interpreter.
//!
//! Walks a recipe's action tree sequentially: condition gates, conditional
//! branches, the three loop forms, the stop/pause/resume flow actions, and
//! leaf invocation through the handler registry with per-action retry and
//! error strategy.  Cancellation is cooperative and checked between actions
//! and at loop iteration boundaries.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::{watch, Notify};
use tokio_util::sync::CancellationToken;

use crate::context::{GlobalScope, SecretCipher, VariableContext, VariableScope};
use crate::error::ActionError;
use crate::evaluator::{evaluate_condition, lookup_path};
use crate::events::{EngineEvent, EventEmitter};
use crate::execution::{ActionExecution, Execution, ExecutionError, ExecutionStatus};
use crate::handler::ActionHandlerRegistry;
use crate::retry::run_with_retry;
use crate::schema::{Action, ActionConfig, Condition, ErrorStrategy, LoopKind, Recipe, RetryPolicy};
use crate::template::TemplateEngine;

/// Run-control surface shared between the scheduler and a running
/// interpretation.  Cancellation wins over everything, including a pause.
///
/// Observers subscribe to the status channel; the interpreter broadcasts the
/// Paused/Running toggle when it actually parks and resumes, and the
/// scheduler broadcasts the queued/running/terminal transitions.
pub struct ExecutionSignals {
    pub cancel: CancellationToken,
    paused: AtomicBool,
    resume: Notify,
    status_tx: watch::Sender<ExecutionStatus>,
}

impl Default for ExecutionSignals {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionSignals {
    pub fn new() -> Self {
        let (status_tx, _) = watch::channel(ExecutionStatus::Queued);
        ExecutionSignals {
            cancel: CancellationToken::new(),
            paused: AtomicBool::new(false),
            resume: Notify::new(),
            status_tx,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ExecutionStatus> {
        self.status_tx.subscribe()
    }

    pub fn broadcast(&self, status: ExecutionStatus) {
        let _ = self.status_tx.send(status);
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::SeqCst);
        self.resume.notify_waiters();
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// Block while paused.  Returns `false` if cancelled while waiting.
    pub async fn wait_while_paused(&self) -> bool {
        if !self.is_paused() {
            return true;
        }
        self.broadcast(ExecutionStatus::Paused);
        while self.is_paused() {
            let notified = self.resume.notified();
            if !self.is_paused() {
                break;
            }
            tokio::select! {
                _ = self.cancel.cancelled() => return false,
                _ = notified => {}
            }
        }
        self.broadcast(ExecutionStatus::Running);
        true
    }
}

/// How control leaves a list of actions.
enum Flow {
    /// Proceed to the next sibling.
    Continue,
    /// An action failed and no strategy absorbed it; bubbles up to fail the
    /// execution unless an enclosing action's `continue_on_error` swallows it.
    FailBranch,
    /// Terminate the whole execution with this status.
    Halt(ExecutionStatus),
}

pub struct ActionInterpreter {
    registry: Arc<ActionHandlerRegistry>,
    global: GlobalScope,
    cipher: Arc<dyn SecretCipher>,
    templates: Arc<TemplateEngine>,
    emitter: EventEmitter,
    /// Policy applied when an action selects the retry strategy without its
    /// own policy.
    default_retry: RetryPolicy,
}

impl ActionInterpreter {
    pub fn new(
        registry: Arc<ActionHandlerRegistry>,
        global: GlobalScope,
        cipher: Arc<dyn SecretCipher>,
        templates: Arc<TemplateEngine>,
        emitter: EventEmitter,
        default_retry: RetryPolicy,
    ) -> Self {
        ActionInterpreter {
            registry,
            global,
            cipher,
            templates,
            emitter,
            default_retry,
        }
    }

    /// Interpret the recipe's action tree for one execution.  Mutates the
    /// execution's action records in place and returns the terminal status.
    pub async fn run(
        &self,
        recipe: &Recipe,
        execution: &mut Execution,
        signals: &ExecutionSignals,
    ) -> ExecutionStatus {
        let mut vars = VariableContext::new(
            self.global.clone(),
            self.cipher.clone(),
            self.templates.clone(),
        );
        vars.seed_recipe(&recipe.settings);
        for (name, value) in &execution.context.variables {
            vars.set(VariableScope::Execution, name, value.clone());
        }
        vars.set(
            VariableScope::Execution,
            "trigger",
            execution.context.trigger.clone(),
        );

        match self
            .run_actions(&recipe.actions, execution, &mut vars, signals)
            .await
        {
            Flow::Continue => ExecutionStatus::Completed,
            Flow::FailBranch => ExecutionStatus::Failed,
            Flow::Halt(status) => status,
        }
    }

    fn run_actions<'a>(
        &'a self,
        actions: &'a [Action],
        execution: &'a mut Execution,
        vars: &'a mut VariableContext,
        signals: &'a ExecutionSignals,
    ) -> Pin<Box<dyn Future<Output = Flow> + Send + 'a>> {
        Box::pin(async move {
            for action in actions {
                if signals.cancel.is_cancelled() {
                    return Flow::Halt(ExecutionStatus::Cancelled);
                }
                if !signals.wait_while_paused().await {
                    return Flow::Halt(ExecutionStatus::Cancelled);
                }

                if let Some(condition) = &action.conditions {
                    if !eval_against_vars(condition, vars) {
                        // Guard failed: skipped silently, no record.
                        continue;
                    }
                }

                let flow = match &action.config {
                    ActionConfig::Conditional {
                        condition,
                        true_actions,
                        false_actions,
                    } => {
                        let branch = if eval_against_vars(condition, vars) {
                            true_actions
                        } else {
                            false_actions
                        };
                        self.run_actions(branch, &mut *execution, &mut *vars, signals)
                            .await
                    }
                    ActionConfig::Loop {
                        kind,
                        max_iterations,
                        actions: body,
                    } => {
                        self.run_loop(
                            action,
                            kind,
                            *max_iterations,
                            body,
                            &mut *execution,
                            &mut *vars,
                            signals,
                        )
                        .await
                    }
                    ActionConfig::StopExecution {} => Flow::Halt(ExecutionStatus::Cancelled),
                    ActionConfig::PauseExecution {} => {
                        signals.pause();
                        execution.status = ExecutionStatus::Paused;
                        if !signals.wait_while_paused().await {
                            return Flow::Halt(ExecutionStatus::Cancelled);
                        }
                        execution.status = ExecutionStatus::Running;
                        Flow::Continue
                    }
                    ActionConfig::ResumeExecution {} => {
                        signals.resume();
                        Flow::Continue
                    }
                    _ => self.run_leaf(action, &mut *execution, &mut *vars, signals).await,
                };

                match flow {
                    Flow::Continue => {}
                    Flow::FailBranch => {
                        if action.continue_on_error {
                            // The absorbed failure stays on the action
                            // records only; a completed execution carries no
                            // top-level error.
                            execution.error = None;
                            continue;
                        }
                        return Flow::FailBranch;
                    }
                    Flow::Halt(status) => return Flow::Halt(status),
                }
            }
            Flow::Continue
        })
    }

    #[allow(clippy::too_many_arguments)]
    async fn run_loop(
        &self,
        action: &Action,
        kind: &LoopKind,
        max_iterations: u32,
        body: &[Action],
        execution: &mut Execution,
        vars: &mut VariableContext,
        signals: &ExecutionSignals,
    ) -> Flow {
        let mut capped = false;
        let mut flow = Flow::Continue;
        let records_before = execution.actions.len();

        match kind {
            LoopKind::ForEach {
                source,
                item_variable,
            } => {
                let items = match resolve_loop_source(source, vars) {
                    Ok(items) => items,
                    Err(e) => {
                        return self.fail_composite(action, execution, e.to_string());
                    }
                };
                for (index, item) in items.iter().enumerate() {
                    if index as u32 >= max_iterations {
                        capped = true;
                        break;
                    }
                    if signals.cancel.is_cancelled() {
                        return Flow::Halt(ExecutionStatus::Cancelled);
                    }
                    vars.set(VariableScope::Step, item_variable, item.clone());
                    vars.set(VariableScope::Step, "loop_index", Value::from(index));
                    flow = self
                        .run_actions(body, &mut *execution, &mut *vars, signals)
                        .await;
                    if !matches!(flow, Flow::Continue) {
                        break;
                    }
                }
                vars.unset_step(item_variable);
                vars.unset_step("loop_index");
            }
            LoopKind::While { condition } => {
                let mut iterations = 0u32;
                while eval_against_vars(condition, vars) {
                    if iterations >= max_iterations {
                        capped = true;
                        break;
                    }
                    if signals.cancel.is_cancelled() {
                        return Flow::Halt(ExecutionStatus::Cancelled);
                    }
                    vars.set(VariableScope::Step, "loop_index", Value::from(iterations));
                    flow = self
                        .run_actions(body, &mut *execution, &mut *vars, signals)
                        .await;
                    iterations += 1;
                    if !matches!(flow, Flow::Continue) {
                        break;
                    }
                }
                vars.unset_step("loop_index");
            }
            LoopKind::Repeat { count } => {
                let bound = (*count).min(max_iterations);
                capped = *count > max_iterations;
                for index in 0..bound {
                    if signals.cancel.is_cancelled() {
                        return Flow::Halt(ExecutionStatus::Cancelled);
                    }
                    vars.set(VariableScope::Step, "loop_index", Value::from(index));
                    flow = self
                        .run_actions(body, &mut *execution, &mut *vars, signals)
                        .await;
                    if !matches!(flow, Flow::Continue) {
                        break;
                    }
                }
                vars.unset_step("loop_index");
            }
        }

        if capped {
            tracing::warn!(
                action_id = %action.id,
                max_iterations,
                "loop stopped at iteration limit"
            );
            // Attach the note to the loop's own last record; a loop whose
            // body produced none must not annotate an earlier action.
            if execution.actions.len() > records_before {
                if let Some(last) = execution.actions.last_mut() {
                    last.note = Some(format!(
                        "loop '{}' stopped at iteration limit ({})",
                        action.id, max_iterations
                    ));
                }
            }
        }

        flow
    }

    async fn run_leaf(
        &self,
        action: &Action,
        execution: &mut Execution,
        vars: &mut VariableContext,
        signals: &ExecutionSignals,
    ) -> Flow {
        let Some(action_type) = action.config.handler_type() else {
            return Flow::Continue;
        };
        let Some(handler) = self.registry.get(action_type) else {
            return self.fail_composite(
                action,
                execution,
                format!("no handler registered for action type '{}'", action_type),
            );
        };

        let raw = action.config.leaf_config().cloned().unwrap_or(Value::Null);
        let resolved = match vars.resolve_config(&raw) {
            Ok(resolved) => resolved,
            Err(e) => return self.fail_composite(action, execution, e.to_string()),
        };

        let mut record = ActionExecution::started(&action.id, action_type, resolved.clone());
        self.emitter.emit(EngineEvent::ActionStarted {
            execution_id: execution.id.clone(),
            action_id: action.id.clone(),
            timestamp: Utc::now(),
        });

        let strategy = action
            .error_handling
            .as_ref()
            .map(|h| h.strategy)
            .unwrap_or(ErrorStrategy::Stop);
        let policy = if strategy == ErrorStrategy::Retry {
            Some(action.retry.clone().unwrap_or_else(|| self.default_retry.clone()))
        } else {
            None
        };
        let timeout = action
            .timeout_secs
            .or(execution.context.action_timeout_secs)
            .map(Duration::from_secs);

        let outcome = run_with_retry(
            &handler,
            action_type,
            &resolved,
            &execution.context,
            policy.as_ref(),
            timeout,
            &signals.cancel,
            &self.emitter,
            &execution.id,
            &action.id,
        )
        .await;
        record.retries = outcome.attempts;
        record.finished_at = Some(Utc::now());

        let flow = match outcome.result {
            Ok(output) => {
                record.status = ExecutionStatus::Completed;
                record.output = output.clone();
                vars.set(VariableScope::Step, "last_output", output.clone());
                vars.set(VariableScope::Execution, &action.id, output);
                Flow::Continue
            }
            Err(ActionError::Cancelled) => {
                record.status = ExecutionStatus::Cancelled;
                record.error = Some(ActionError::Cancelled.to_string());
                Flow::Halt(ExecutionStatus::Cancelled)
            }
            Err(error) => {
                record.status = ExecutionStatus::Failed;
                record.error = Some(error.to_string());
                tracing::warn!(
                    action_id = %action.id,
                    error = %error,
                    "action failed"
                );
                match strategy {
                    ErrorStrategy::Ignore => Flow::Continue,
                    ErrorStrategy::Fallback => {
                        let fallback = action
                            .error_handling
                            .as_ref()
                            .map(|h| h.fallback_actions.as_slice())
                            .unwrap_or(&[]);
                        record.note = Some("fallback actions taken".into());
                        let outer = execution.actions.len();
                        execution.actions.push(record);
                        let flow = self
                            .run_actions(fallback, &mut *execution, &mut *vars, signals)
                            .await;
                        return match flow {
                            Flow::Continue => {
                                // The outer record's status reflects the
                                // fallback's success; the primary error stays
                                // on it for forensics.
                                if let Some(rec) = execution.actions.get_mut(outer) {
                                    rec.status = ExecutionStatus::Completed;
                                }
                                self.finish_leaf(execution, action, ExecutionStatus::Completed);
                                Flow::Continue
                            }
                            other => {
                                // Report the primary failure, not the
                                // fallback's.
                                execution.error = Some(ExecutionError {
                                    action: action.id.clone(),
                                    message: error.to_string(),
                                });
                                self.finish_leaf(execution, action, ExecutionStatus::Failed);
                                other
                            }
                        };
                    }
                    // Stop, or a retry policy that ran out of attempts.
                    ErrorStrategy::Stop | ErrorStrategy::Retry => {
                        self.set_error(execution, action, error.to_string());
                        Flow::FailBranch
                    }
                }
            }
        };

        let status = record.status;
        execution.actions.push(record);
        self.finish_leaf(execution, action, status);
        flow
    }

    fn finish_leaf(&self, execution: &Execution, action: &Action, status: ExecutionStatus) {
        self.emitter.emit(EngineEvent::ActionFinished {
            execution_id: execution.id.clone(),
            action_id: action.id.clone(),
            status,
            timestamp: Utc::now(),
        });
    }

    /// Record a failure that happened before (or instead of) a handler call,
    /// e.g. a bad loop source, a template error, or a missing handler.
    fn fail_composite(&self, action: &Action, execution: &mut Execution, message: String) -> Flow {
        tracing::warn!(action_id = %action.id, error = %message, "action failed");
        let action_type = action.config.handler_type().unwrap_or("loop");
        let mut record = ActionExecution::started(&action.id, action_type, Value::Null);
        record.status = ExecutionStatus::Failed;
        record.error = Some(message.clone());
        record.finished_at = Some(Utc::now());
        execution.actions.push(record);
        self.set_error(execution, action, message);
        Flow::FailBranch
    }

    fn set_error(&self, execution: &mut Execution, action: &Action, message: String) {
        // First failure wins; an outer fallback failure must not mask it.
        if execution.error.is_none() {
            execution.error = Some(ExecutionError {
                action: action.id.clone(),
                message,
            });
        }
    }
}

/// Evaluate a condition tree with fields resolved through the variable
/// scopes, dotted paths descending into structured values.
fn eval_against_vars(condition: &Condition, vars: &mut VariableContext) -> bool {
    let mut lookup = |field: &str| lookup_variable_path(vars, field);
    evaluate_condition(condition, &mut lookup)
}

fn lookup_variable_path(vars: &mut VariableContext, field: &str) -> Option<Value> {
    if let Some(v) = vars.resolve(field) {
        return Some(v);
    }
    let (head, rest) = field.split_once('.')?;
    let root = vars.resolve(head)?;
    lookup_path(&root, rest)
}

/// A loop source is either a variable name or a `{{ ... }}` expression; it
/// must produce a sequence.
fn resolve_loop_source(source: &str, vars: &mut VariableContext) -> Result<Vec<Value>, ActionError> {
    let value = if source.contains("{{") {
        let rendered = vars.interpolate(source)?;
        serde_json::from_str(&rendered)
            .unwrap_or_else(|_| Value::String(rendered))
    } else {
        lookup_variable_path(vars, source).unwrap_or(Value::Null)
    };
    match value {
        Value::Array(items) => Ok(items),
        other => Err(ActionError::Config(format!(
            "loop source '{}' did not resolve to a sequence (got {})",
            source, other
        ))),
    }
}
