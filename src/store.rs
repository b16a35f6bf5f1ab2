//! Execution store & stats aggregator.
//!
//! In-memory persistence of execution records plus per-recipe rolling stats.
//! Stats updates are atomic per recipe: each recipe owns one `DashMap` entry,
//! mutated under that entry's lock, so concurrent completions of the same
//! recipe never lose counts and unrelated recipes never contend.

use chrono::Utc;
use dashmap::DashMap;

use crate::execution::{Execution, ExecutionStatus};
use crate::schema::{AutomationStats, ExecutionSummary, RECENT_EXECUTIONS_CAP};

#[derive(Default)]
pub struct ExecutionStore {
    executions: DashMap<String, Execution>,
    stats: DashMap<String, AutomationStats>,
}

impl ExecutionStore {
    pub fn new() -> Self {
        ExecutionStore {
            executions: DashMap::new(),
            stats: DashMap::new(),
        }
    }

    /// Persist the execution record; terminal executions also fold into the
    /// owning recipe's stats.
    pub fn record(&self, execution: &Execution) {
        self.executions
            .insert(execution.id.clone(), execution.clone());
        if execution.status.is_terminal() {
            self.update_stats(execution);
        }
    }

    pub fn get(&self, execution_id: &str) -> Option<Execution> {
        self.executions.get(execution_id).map(|e| e.clone())
    }

    pub fn get_stats(&self, recipe_id: &str) -> Option<AutomationStats> {
        self.stats.get(recipe_id).map(|s| s.clone())
    }

    /// Executions recorded for a recipe, unordered.
    pub fn executions_for_recipe(&self, recipe_id: &str) -> Vec<Execution> {
        self.executions
            .iter()
            .filter(|entry| entry.recipe_id == recipe_id)
            .map(|entry| entry.clone())
            .collect()
    }

    fn update_stats(&self, execution: &Execution) {
        let finished_at = execution.finished_at.unwrap_or_else(Utc::now);
        let mut entry = self.stats.entry(execution.recipe_id.clone()).or_default();

        entry.total_executions += 1;
        if execution.status == ExecutionStatus::Completed {
            entry.successful_executions += 1;
        } else {
            entry.failed_executions += 1;
        }
        entry.success_rate = entry.successful_executions as f64 / entry.total_executions as f64;
        entry.last_executed_at = Some(finished_at);

        entry.recent_executions.push(ExecutionSummary {
            execution_id: execution.id.clone(),
            status: execution.status,
            duration_ms: execution.duration_ms(),
            finished_at,
        });
        while entry.recent_executions.len() > RECENT_EXECUTIONS_CAP {
            entry.recent_executions.remove(0);
        }

        // Windowed average over the retained ring buffer.
        let total: u64 = entry.recent_executions.iter().map(|s| s.duration_ms).sum();
        entry.avg_execution_time_ms = total as f64 / entry.recent_executions.len() as f64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution::{ExecutionContext, TriggerEvent};
    use crate::schema::TriggerType;
    use chrono::Duration;
    use serde_json::json;

    fn terminal_execution(recipe_id: &str, status: ExecutionStatus, ms: i64) -> Execution {
        let event = TriggerEvent::new(TriggerType::Webhook, json!({}));
        let mut execution = Execution::new(recipe_id, event, ExecutionContext::default());
        let start = Utc::now();
        execution.started_at = Some(start);
        execution.status = status;
        execution.finished_at = Some(start + Duration::milliseconds(ms));
        execution
    }

    #[test]
    fn test_record_and_get() {
        let store = ExecutionStore::new();
        let execution = terminal_execution("r1", ExecutionStatus::Completed, 10);
        let id = execution.id.clone();
        store.record(&execution);
        assert!(store.get(&id).is_some());
        assert!(store.get("missing").is_none());
    }

    #[test]
    fn test_stats_counts_and_rate() {
        let store = ExecutionStore::new();
        store.record(&terminal_execution("r1", ExecutionStatus::Completed, 100));
        store.record(&terminal_execution("r1", ExecutionStatus::Completed, 200));
        store.record(&terminal_execution("r1", ExecutionStatus::Failed, 300));

        let stats = store.get_stats("r1").unwrap();
        assert_eq!(stats.total_executions, 3);
        assert_eq!(stats.successful_executions, 2);
        assert_eq!(stats.failed_executions, 1);
        assert!((stats.success_rate - 2.0 / 3.0).abs() < 1e-9);
        assert!((stats.avg_execution_time_ms - 200.0).abs() < 1e-9);
    }

    #[test]
    fn test_timeout_and_cancelled_count_as_failures() {
        let store = ExecutionStore::new();
        store.record(&terminal_execution("r1", ExecutionStatus::Timeout, 10));
        store.record(&terminal_execution("r1", ExecutionStatus::Cancelled, 10));
        let stats = store.get_stats("r1").unwrap();
        assert_eq!(stats.failed_executions, 2);
    }

    #[test]
    fn test_non_terminal_not_aggregated() {
        let store = ExecutionStore::new();
        let event = TriggerEvent::new(TriggerType::Webhook, json!({}));
        let execution = Execution::new("r1", event, ExecutionContext::default());
        store.record(&execution);
        assert!(store.get_stats("r1").is_none());
    }

    #[test]
    fn test_recent_executions_ring_buffer() {
        let store = ExecutionStore::new();
        for _ in 0..RECENT_EXECUTIONS_CAP + 5 {
            store.record(&terminal_execution("r1", ExecutionStatus::Completed, 10));
        }
        let stats = store.get_stats("r1").unwrap();
        assert_eq!(stats.recent_executions.len(), RECENT_EXECUTIONS_CAP);
        assert_eq!(stats.total_executions, (RECENT_EXECUTIONS_CAP + 5) as u64);
    }

    #[test]
    fn test_stats_isolated_per_recipe() {
        let store = ExecutionStore::new();
        store.record(&terminal_execution("r1", ExecutionStatus::Completed, 10));
        store.record(&terminal_execution("r2", ExecutionStatus::Failed, 10));
        assert_eq!(store.get_stats("r1").unwrap().successful_executions, 1);
        assert_eq!(store.get_stats("r2").unwrap().failed_executions, 1);
    }
}
