//! Recipe validation.
//!
//! Structural checks run before a recipe is accepted into the engine, so a
//! malformed recipe is rejected before scheduling rather than failing mid-run.
//! The action-tree depth cap guards against unbounded recursion independently
//! of the runtime `max_iterations` cap.

use std::collections::HashSet;

use crate::error::EngineError;
use crate::schema::{Action, ActionConfig, LoopKind, Recipe};

/// Maximum nesting depth of conditional/loop/fallback action trees.
pub const MAX_ACTION_DEPTH: usize = 16;

pub fn validate_recipe(recipe: &Recipe) -> Result<(), EngineError> {
    if recipe.id.is_empty() {
        return Err(EngineError::Validation("recipe id is empty".into()));
    }
    if recipe.actions.is_empty() {
        return Err(EngineError::Validation(format!(
            "recipe '{}' has no actions",
            recipe.id
        )));
    }
    let mut seen = HashSet::new();
    validate_actions(&recipe.actions, 1, &mut seen)?;
    Ok(())
}

fn validate_actions(
    actions: &[Action],
    depth: usize,
    seen: &mut HashSet<String>,
) -> Result<(), EngineError> {
    if depth > MAX_ACTION_DEPTH {
        return Err(EngineError::Validation(format!(
            "action tree deeper than {} levels",
            MAX_ACTION_DEPTH
        )));
    }
    for action in actions {
        if action.id.is_empty() {
            return Err(EngineError::Validation("action id is empty".into()));
        }
        if !seen.insert(action.id.clone()) {
            return Err(EngineError::Validation(format!(
                "duplicate action id '{}'",
                action.id
            )));
        }
        if let Some(retry) = &action.retry {
            if retry.max_attempts < 1 {
                return Err(EngineError::Validation(format!(
                    "action '{}': retry max_attempts must be >= 1",
                    action.id
                )));
            }
            if retry.delay_seconds < 0.0 || retry.max_delay_seconds < 0.0 {
                return Err(EngineError::Validation(format!(
                    "action '{}': retry delays must be non-negative",
                    action.id
                )));
            }
        }
        match &action.config {
            ActionConfig::Conditional {
                true_actions,
                false_actions,
                ..
            } => {
                validate_actions(true_actions, depth + 1, seen)?;
                validate_actions(false_actions, depth + 1, seen)?;
            }
            ActionConfig::Loop {
                kind,
                max_iterations,
                actions,
            } => {
                if *max_iterations < 1 {
                    return Err(EngineError::Validation(format!(
                        "action '{}': max_iterations must be >= 1",
                        action.id
                    )));
                }
                if let LoopKind::Repeat { count } = kind {
                    if *count < 1 {
                        return Err(EngineError::Validation(format!(
                            "action '{}': repeat count must be >= 1",
                            action.id
                        )));
                    }
                }
                validate_actions(actions, depth + 1, seen)?;
            }
            _ => {}
        }
        if let Some(handling) = &action.error_handling {
            validate_actions(&handling.fallback_actions, depth + 1, seen)?;
        }
    }
    Ok(())
}
