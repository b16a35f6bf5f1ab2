//! Engine facade.
//!
//! Owns the recipe set and wires the dispatcher, scheduler, store, and
//! variable state together behind one handle.  Hosts construct it through
//! [`EngineBuilder`], register action handlers, add recipes, then feed trigger
//! events in.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;

use crate::config::EngineConfig;
use crate::context::{GlobalScope, NoDecrypt, SecretCipher};
use crate::dispatcher::{DenyReason, DispatchDecision, TriggerDispatcher};
use crate::error::EngineError;
use crate::events::{EventEmitter, EventReceiver};
use crate::execution::{Execution, TriggerEvent};
use crate::handler::{ActionHandler, ActionHandlerRegistry};
use crate::interpreter::ActionInterpreter;
use crate::schema::{Action, ActionConfig, AutomationStats, Recipe, RetryPolicy};
use crate::scheduler::{ExecutionHandle, ExecutionScheduler};
use crate::store::ExecutionStore;
use crate::template::TemplateEngine;
use crate::throttle::ThrottleGuard;
use crate::validation::validate_recipe;

pub struct EngineBuilder {
    config: EngineConfig,
    registry: ActionHandlerRegistry,
    cipher: Arc<dyn SecretCipher>,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineBuilder {
    pub fn new() -> Self {
        EngineBuilder {
            config: EngineConfig::default(),
            registry: ActionHandlerRegistry::new(),
            cipher: Arc::new(NoDecrypt),
        }
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn register_handler(mut self, action_type: &str, handler: Arc<dyn ActionHandler>) -> Self {
        self.registry.register(action_type, handler);
        self
    }

    pub fn cipher(mut self, cipher: Arc<dyn SecretCipher>) -> Self {
        self.cipher = cipher;
        self
    }

    /// Build without an event stream.  Must be called within a tokio runtime.
    pub fn build(self) -> Engine {
        self.build_inner(EventEmitter::disabled())
    }

    /// Build with an engine event stream attached.
    pub fn build_with_events(self) -> (Engine, EventReceiver) {
        let (emitter, rx) = EventEmitter::channel();
        (self.build_inner(emitter), rx)
    }

    fn build_inner(self, emitter: EventEmitter) -> Engine {
        let registry = Arc::new(self.registry);
        let store = Arc::new(ExecutionStore::new());
        let global: GlobalScope = Arc::new(RwLock::new(Default::default()));
        let templates = Arc::new(TemplateEngine::new());
        let throttle = Arc::new(ThrottleGuard::new());

        let default_retry = RetryPolicy {
            max_attempts: self.config.retry.max_attempts,
            delay_seconds: self.config.retry.delay_seconds,
            backoff_multiplier: self.config.retry.backoff_multiplier,
            max_delay_seconds: self.config.retry.max_delay_seconds,
            retry_conditions: Vec::new(),
        };
        let interpreter = ActionInterpreter::new(
            registry.clone(),
            global.clone(),
            self.cipher,
            templates,
            emitter.clone(),
            default_retry,
        );
        let scheduler =
            ExecutionScheduler::new(self.config, interpreter, store.clone(), emitter.clone());
        let dispatcher = TriggerDispatcher::new(throttle, emitter);

        Engine {
            recipes: DashMap::new(),
            registry,
            dispatcher,
            scheduler,
            store,
            global,
        }
    }
}

pub struct Engine {
    recipes: DashMap<String, Arc<Recipe>>,
    registry: Arc<ActionHandlerRegistry>,
    dispatcher: TriggerDispatcher,
    scheduler: ExecutionScheduler,
    store: Arc<ExecutionStore>,
    global: GlobalScope,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Validate and register a recipe.  Every leaf action type must have a
    /// registered handler.
    pub fn add_recipe(&self, recipe: Recipe) -> Result<(), EngineError> {
        validate_recipe(&recipe)?;
        if let Some(missing) = self.first_missing_handler(&recipe.actions) {
            return Err(EngineError::HandlerNotFound(missing.to_string()));
        }
        self.recipes.insert(recipe.id.clone(), Arc::new(recipe));
        Ok(())
    }

    pub fn remove_recipe(&self, recipe_id: &str) -> Result<(), EngineError> {
        self.recipes
            .remove(recipe_id)
            .ok_or_else(|| EngineError::RecipeNotFound(recipe_id.to_string()))?;
        self.dispatcher.forget(recipe_id);
        Ok(())
    }

    pub fn set_recipe_enabled(&self, recipe_id: &str, enabled: bool) -> Result<(), EngineError> {
        let mut entry = self
            .recipes
            .get_mut(recipe_id)
            .ok_or_else(|| EngineError::RecipeNotFound(recipe_id.to_string()))?;
        Arc::make_mut(&mut *entry).enabled = enabled;
        Ok(())
    }

    pub fn recipe(&self, recipe_id: &str) -> Option<Arc<Recipe>> {
        self.recipes.get(recipe_id).map(|r| r.clone())
    }

    pub fn recipe_ids(&self) -> Vec<String> {
        self.recipes.iter().map(|r| r.id.clone()).collect()
    }

    /// Fan a trigger event out to every matching recipe.  One result per
    /// dispatched recipe; denials (disabled, filters, conditions, throttling)
    /// produce no entry.  A full queue surfaces as an error for that recipe.
    pub fn handle_event(&self, event: &TriggerEvent) -> Vec<Result<ExecutionHandle, EngineError>> {
        let candidates: Vec<Arc<Recipe>> = self.recipes.iter().map(|r| r.clone()).collect();
        let mut results = Vec::new();
        for recipe in candidates {
            match self.dispatcher.evaluate(&recipe, event) {
                DispatchDecision::Dispatch(request) => {
                    self.stamp_last_executed(&recipe.id);
                    results.push(self.scheduler.submit(request));
                }
                DispatchDecision::Deny(reason) => {
                    tracing::debug!(
                        recipe_id = %recipe.id,
                        reason = ?reason,
                        "trigger event not dispatched"
                    );
                }
            }
        }
        results
    }

    /// Dispatch an event to one recipe, surfacing the denial reason.
    pub fn trigger_recipe(
        &self,
        recipe_id: &str,
        event: &TriggerEvent,
    ) -> Result<ExecutionHandle, EngineError> {
        let recipe = self
            .recipes
            .get(recipe_id)
            .map(|r| r.clone())
            .ok_or_else(|| EngineError::RecipeNotFound(recipe_id.to_string()))?;
        match self.dispatcher.evaluate(&recipe, event) {
            DispatchDecision::Dispatch(request) => {
                self.stamp_last_executed(recipe_id);
                self.scheduler.submit(request)
            }
            DispatchDecision::Deny(DenyReason::Throttled)
            | DispatchDecision::Deny(DenyReason::HourlyLimitReached) => {
                Err(EngineError::Throttled(recipe_id.to_string()))
            }
            DispatchDecision::Deny(reason) => Err(EngineError::Validation(format!(
                "event did not match recipe '{}': {:?}",
                recipe_id, reason
            ))),
        }
    }

    pub fn cancel_execution(&self, execution_id: &str) -> Result<(), EngineError> {
        if self.scheduler.cancel(execution_id) {
            Ok(())
        } else {
            Err(EngineError::ExecutionNotFound(execution_id.to_string()))
        }
    }

    pub fn pause_execution(&self, execution_id: &str) -> Result<(), EngineError> {
        if self.scheduler.pause(execution_id) {
            Ok(())
        } else {
            Err(EngineError::ExecutionNotFound(execution_id.to_string()))
        }
    }

    pub fn resume_execution(&self, execution_id: &str) -> Result<(), EngineError> {
        if self.scheduler.resume(execution_id) {
            Ok(())
        } else {
            Err(EngineError::ExecutionNotFound(execution_id.to_string()))
        }
    }

    pub fn execution(&self, execution_id: &str) -> Option<Execution> {
        self.store.get(execution_id)
    }

    pub fn executions_for_recipe(&self, recipe_id: &str) -> Vec<Execution> {
        self.store.executions_for_recipe(recipe_id)
    }

    pub fn recipe_stats(&self, recipe_id: &str) -> Option<AutomationStats> {
        self.store.get_stats(recipe_id)
    }

    pub fn set_global_variable(&self, name: &str, value: Value) {
        self.global.write().insert(name.to_string(), value);
    }

    pub fn global_variable(&self, name: &str) -> Option<Value> {
        self.global.read().get(name).cloned()
    }

    fn stamp_last_executed(&self, recipe_id: &str) {
        if let Some(mut entry) = self.recipes.get_mut(recipe_id) {
            Arc::make_mut(&mut *entry).last_executed_at = Some(Utc::now());
        }
    }

    fn first_missing_handler<'a>(&self, actions: &'a [Action]) -> Option<&'a str> {
        for action in actions {
            if let Some(ty) = action.config.handler_type() {
                if !self.registry.contains(ty) {
                    return Some(ty);
                }
            }
            let nested: Option<&str> = match &action.config {
                ActionConfig::Conditional {
                    true_actions,
                    false_actions,
                    ..
                } => self
                    .first_missing_handler(true_actions)
                    .or_else(|| self.first_missing_handler(false_actions)),
                ActionConfig::Loop { actions, .. } => self.first_missing_handler(actions),
                _ => None,
            };
            if nested.is_some() {
                return nested;
            }
            if let Some(handling) = &action.error_handling {
                if let Some(missing) = self.first_missing_handler(&handling.fallback_actions) {
                    return Some(missing);
                }
            }
        }
        None
    }
}
