//! Template engine wrapping minijinja.
//!
//! Used to resolve `{{ ... }}` placeholders in action configs and to evaluate
//! computed-variable transform expressions.  Undefined variables render as an
//! empty string rather than erroring.

use std::collections::HashMap;

use minijinja::value::ValueKind;
use minijinja::Environment;
use serde_json::Value;

use crate::error::ActionError;

pub struct TemplateEngine {
    env: Environment<'static>,
}

impl TemplateEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();

        env.set_formatter(json_bool_formatter);
        env.add_filter("default", default_filter);
        env.add_filter("upper", upper_filter);
        env.add_filter("lower", lower_filter);
        env.add_filter("trim", trim_filter);

        TemplateEngine { env }
    }

    /// Render a template string against the variable map.
    pub fn render(
        &self,
        template: &str,
        variables: &HashMap<String, Value>,
    ) -> Result<String, ActionError> {
        let tmpl = self
            .env
            .template_from_str(template)
            .map_err(|e| ActionError::Template(format!("Template compile error: {}", e)))?;

        tmpl.render(to_minijinja_context(variables))
            .map_err(|e| ActionError::Template(format!("Template render error: {}", e)))
    }

    /// Evaluate a bare expression (computed-variable transforms), returning
    /// the resulting JSON value.
    pub fn eval_expression(
        &self,
        expression: &str,
        variables: &HashMap<String, Value>,
    ) -> Result<Value, ActionError> {
        let expr = self
            .env
            .compile_expression(expression)
            .map_err(|e| ActionError::Template(format!("Expression compile error: {}", e)))?;

        let result = expr
            .eval(to_minijinja_context(variables))
            .map_err(|e| ActionError::Template(format!("Expression eval error: {}", e)))?;

        serde_json::to_value(result)
            .map_err(|e| ActionError::Template(format!("Expression result error: {}", e)))
    }

    /// Walk a JSON config and render every string leaf containing a
    /// placeholder; non-template strings pass through untouched.
    pub fn resolve_config(
        &self,
        config: &Value,
        variables: &HashMap<String, Value>,
    ) -> Result<Value, ActionError> {
        match config {
            Value::String(s) if s.contains("{{") || s.contains("{%") => {
                Ok(Value::String(self.render(s, variables)?))
            }
            Value::Array(items) => {
                let resolved: Result<Vec<Value>, ActionError> = items
                    .iter()
                    .map(|item| self.resolve_config(item, variables))
                    .collect();
                Ok(Value::Array(resolved?))
            }
            Value::Object(map) => {
                let mut resolved = serde_json::Map::with_capacity(map.len());
                for (key, value) in map {
                    resolved.insert(key.clone(), self.resolve_config(value, variables)?);
                }
                Ok(Value::Object(resolved))
            }
            other => Ok(other.clone()),
        }
    }
}

impl Default for TemplateEngine {
    fn default() -> Self {
        Self::new()
    }
}

/// Substituted booleans keep their JSON spelling (`true`/`false`) instead of
/// the default title-case rendering.
fn json_bool_formatter(
    out: &mut minijinja::Output,
    state: &minijinja::State,
    value: &minijinja::Value,
) -> Result<(), minijinja::Error> {
    if value.kind() == ValueKind::Bool {
        write!(out, "{}", if value.is_true() { "true" } else { "false" })?;
        return Ok(());
    }
    minijinja::escape_formatter(out, state, value)
}

fn to_minijinja_context(variables: &HashMap<String, Value>) -> minijinja::Value {
    let json_value = serde_json::to_value(variables).unwrap_or(Value::Object(Default::default()));
    minijinja::Value::from_serialize(&json_value)
}

fn default_filter(value: minijinja::Value, default: Option<minijinja::Value>) -> minijinja::Value {
    if value.is_undefined() || value.is_none() {
        default.unwrap_or(minijinja::Value::from(""))
    } else {
        value
    }
}

fn upper_filter(value: String) -> String {
    value.to_uppercase()
}

fn lower_filter(value: String) -> String {
    value.to_lowercase()
}

fn trim_filter(value: String) -> String {
    value.trim().to_string()
}
