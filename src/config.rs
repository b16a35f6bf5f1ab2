//! Engine configuration.
//!
//! Constructed once at startup and passed by handle into the scheduler and
//! throttling guard; no ambient singletons, so tests build isolated engines.

use serde::{Deserialize, Serialize};

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct EngineConfig {
    #[serde(default = "default_max_concurrent_executions")]
    pub max_concurrent_executions: usize,
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
    /// Default execution deadline when recipe settings do not set one.
    #[serde(default = "default_timeout_secs")]
    pub default_timeout_secs: u64,
    #[serde(default)]
    pub retry: RetryDefaults,
    #[serde(default)]
    pub limits: ResourceLimits,
    #[serde(default)]
    pub security: SecurityConfig,
    #[serde(default)]
    pub plugins: PluginConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            max_concurrent_executions: default_max_concurrent_executions(),
            queue_size: default_queue_size(),
            default_timeout_secs: default_timeout_secs(),
            retry: RetryDefaults::default(),
            limits: ResourceLimits::default(),
            security: SecurityConfig::default(),
            plugins: PluginConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

fn default_max_concurrent_executions() -> usize {
    10
}
fn default_queue_size() -> usize {
    100
}
fn default_timeout_secs() -> u64 {
    300
}

/// Engine-wide retry defaults, used when an action enables the retry strategy
/// without its own policy.
#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct RetryDefaults {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_delay_seconds")]
    pub delay_seconds: f64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
    #[serde(default = "default_max_delay_seconds")]
    pub max_delay_seconds: f64,
}

impl Default for RetryDefaults {
    fn default() -> Self {
        RetryDefaults {
            max_attempts: default_max_attempts(),
            delay_seconds: default_delay_seconds(),
            backoff_multiplier: default_backoff_multiplier(),
            max_delay_seconds: default_max_delay_seconds(),
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

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct ResourceLimits {
    #[serde(default)]
    pub memory_mb: Option<u64>,
    #[serde(default)]
    pub cpu_percent: Option<u8>,
    #[serde(default)]
    pub disk_mb: Option<u64>,
    #[serde(default)]
    pub network_requests_per_minute: Option<u32>,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct SecurityConfig {
    #[serde(default)]
    pub sandboxed: bool,
    #[serde(default)]
    pub allowed_domains: Vec<String>,
    #[serde(default)]
    pub allowed_ips: Vec<String>,
    #[serde(default)]
    pub max_file_size: Option<u64>,
    #[serde(default)]
    pub allow_script_execution: bool,
    #[serde(default)]
    pub allow_network_access: bool,
}

#[derive(Deserialize, Serialize, Debug, Clone, Default)]
pub struct PluginConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub auto_discovery: bool,
    #[serde(default)]
    pub trusted_plugins: Vec<String>,
    #[serde(default)]
    pub max_plugin_execution_time: Option<u64>,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_retention_days")]
    pub retention_days: u32,
    #[serde(default)]
    pub max_log_size: Option<u64>,
    #[serde(default)]
    pub enable_metrics: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: default_log_level(),
            retention_days: default_retention_days(),
            max_log_size: None,
            enable_metrics: false,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_retention_days() -> u32 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_concurrent_executions, 10);
        assert_eq!(config.queue_size, 100);
        assert_eq!(config.default_timeout_secs, 300);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_partial_deserialize() {
        let config: EngineConfig = serde_json::from_value(json!({
            "max_concurrent_executions": 2,
            "queue_size": 5,
            "retry": {"max_attempts": 1}
        }))
        .unwrap();
        assert_eq!(config.max_concurrent_executions, 2);
        assert_eq!(config.queue_size, 5);
        assert_eq!(config.retry.max_attempts, 1);
        // Unspecified nested sections fall back to defaults.
        assert_eq!(config.retry.delay_seconds, 1.0);
        assert_eq!(config.default_timeout_secs, 300);
    }
}
