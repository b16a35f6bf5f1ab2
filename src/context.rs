//! Variable Context Manager.
//!
//! Four scopes (step, execution, recipe, global) resolved in that order,
//! first hit wins.  Computed variables are evaluated lazily the first time
//! they are read in an execution and cached for the remainder of the run.
//! Encrypted variables stay opaque everywhere except template interpolation,
//! which consults the engine's [`SecretCipher`].

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

use crate::error::ActionError;
use crate::schema::RecipeSettings;
use crate::template::TemplateEngine;

/// Shared global scope; one per engine, shared by all executions.
pub type GlobalScope = Arc<RwLock<HashMap<String, Value>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VariableScope {
    Global,
    Recipe,
    Execution,
    Step,
}

/// Decrypts opaque variable values at interpolation time.  Installed by the
/// host; the default refuses and leaves the opaque form in place.
pub trait SecretCipher: Send + Sync {
    fn decrypt(&self, opaque: &str) -> Option<String>;
}

/// Default cipher: never decrypts.
pub struct NoDecrypt;

impl SecretCipher for NoDecrypt {
    fn decrypt(&self, _opaque: &str) -> Option<String> {
        None
    }
}

pub struct VariableContext {
    global: GlobalScope,
    recipe: HashMap<String, Value>,
    execution: HashMap<String, Value>,
    step: HashMap<String, Value>,
    /// name -> transform expression
    computed: HashMap<String, String>,
    computed_cache: HashMap<String, Value>,
    encrypted: HashSet<String>,
    cipher: Arc<dyn SecretCipher>,
    templates: Arc<TemplateEngine>,
}

impl VariableContext {
    pub fn new(
        global: GlobalScope,
        cipher: Arc<dyn SecretCipher>,
        templates: Arc<TemplateEngine>,
    ) -> Self {
        VariableContext {
            global,
            recipe: HashMap::new(),
            execution: HashMap::new(),
            step: HashMap::new(),
            computed: HashMap::new(),
            computed_cache: HashMap::new(),
            encrypted: HashSet::new(),
            cipher,
            templates,
        }
    }

    /// Seed the recipe scope (variables, computed definitions, encrypted
    /// flags) from recipe settings.
    pub fn seed_recipe(&mut self, settings: &RecipeSettings) {
        for (name, def) in &settings.variables {
            self.recipe.insert(name.clone(), def.value().clone());
            if def.is_encrypted() {
                self.encrypted.insert(name.clone());
            }
        }
        for (name, computed) in &settings.computed {
            self.computed
                .insert(name.clone(), computed.source.transform.clone());
        }
    }

    /// Last-write-wins within a tier.
    pub fn set(&mut self, scope: VariableScope, name: &str, value: Value) {
        match scope {
            VariableScope::Global => {
                self.global.write().insert(name.to_string(), value);
            }
            VariableScope::Recipe => {
                self.recipe.insert(name.to_string(), value);
            }
            VariableScope::Execution => {
                self.execution.insert(name.to_string(), value);
            }
            VariableScope::Step => {
                self.step.insert(name.to_string(), value);
            }
        }
    }

    /// Resolution order: step -> execution -> recipe -> global, then computed.
    /// Encrypted variables resolve to their stored opaque form.
    pub fn resolve(&mut self, name: &str) -> Option<Value> {
        if let Some(v) = self
            .step
            .get(name)
            .or_else(|| self.execution.get(name))
            .or_else(|| self.recipe.get(name))
        {
            return Some(v.clone());
        }
        if let Some(v) = self.global.read().get(name) {
            return Some(v.clone());
        }
        self.resolve_computed(name)
    }

    pub fn has(&mut self, name: &str) -> bool {
        self.resolve(name).is_some()
    }

    /// Remove a single step-scope binding.
    pub fn unset_step(&mut self, name: &str) {
        self.step.remove(name);
    }

    /// Render a template with encrypted values decrypted at the point of
    /// substitution only.
    pub fn interpolate(&mut self, template: &str) -> Result<String, ActionError> {
        let vars = self.interpolation_map();
        self.templates.render(template, &vars)
    }

    /// Resolve a whole action config, decrypting at substitution.
    pub fn resolve_config(&mut self, config: &Value) -> Result<Value, ActionError> {
        let vars = self.interpolation_map();
        let templates = self.templates.clone();
        templates.resolve_config(config, &vars)
    }

    /// Merged view of all scopes with shadowing applied (step wins).
    /// Encrypted values stay opaque; computed values are forced and cached.
    pub fn resolved_map(&mut self) -> HashMap<String, Value> {
        let mut merged: HashMap<String, Value> = self.global.read().clone();
        for (k, v) in &self.recipe {
            merged.insert(k.clone(), v.clone());
        }
        for (k, v) in &self.execution {
            merged.insert(k.clone(), v.clone());
        }
        for (k, v) in &self.step {
            merged.insert(k.clone(), v.clone());
        }
        let computed_names: Vec<String> = self.computed.keys().cloned().collect();
        for name in computed_names {
            if !merged.contains_key(&name) {
                if let Some(v) = self.resolve_computed(&name) {
                    merged.insert(name, v);
                }
            }
        }
        merged
    }

    fn interpolation_map(&mut self) -> HashMap<String, Value> {
        let mut merged = self.resolved_map();
        for name in &self.encrypted {
            let Some(Value::String(opaque)) = merged.get(name) else {
                continue;
            };
            if let Some(plain) = self.cipher.decrypt(opaque) {
                merged.insert(name.clone(), Value::String(plain));
            }
        }
        merged
    }

    fn resolve_computed(&mut self, name: &str) -> Option<Value> {
        if let Some(cached) = self.computed_cache.get(name) {
            return Some(cached.clone());
        }
        let transform = self.computed.get(name)?.clone();

        // Evaluate against the plain scopes; computed variables cannot see
        // each other, which keeps the evaluation non-recursive.
        let mut plain: HashMap<String, Value> = self.global.read().clone();
        for (k, v) in &self.recipe {
            plain.insert(k.clone(), v.clone());
        }
        for (k, v) in &self.execution {
            plain.insert(k.clone(), v.clone());
        }
        for (k, v) in &self.step {
            plain.insert(k.clone(), v.clone());
        }

        match self.templates.eval_expression(&transform, &plain) {
            Ok(value) => {
                self.computed_cache.insert(name.to_string(), value.clone());
                Some(value)
            }
            Err(e) => {
                tracing::warn!("computed variable '{}' failed to evaluate: {}", name, e);
                None
            }
        }
    }
}
