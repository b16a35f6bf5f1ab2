//! Execution scheduler.
//!
//! Admission control for dispatched executions: a bounded queue drained in
//! priority order (FIFO within a priority), a global concurrency cap, and
//! per-recipe caps.  A queued execution whose recipe is at its cap is skipped
//! over, not dropped.  Each admitted execution runs on its own task under the
//! recipe's deadline; callers observe progress through an [`ExecutionHandle`].

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::sync::{watch, Notify};
use tokio_util::sync::CancellationToken;

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::events::{EngineEvent, EventEmitter};
use crate::execution::{Execution, ExecutionRequest, ExecutionStatus};
use crate::interpreter::{ActionInterpreter, ExecutionSignals};
use crate::schema::{Recipe, RecipePriority};
use crate::store::ExecutionStore;

/// Caller-side view of one execution.
pub struct ExecutionHandle {
    execution_id: String,
    recipe_id: String,
    status: watch::Receiver<ExecutionStatus>,
    signals: Arc<ExecutionSignals>,
    store: Arc<ExecutionStore>,
}

impl ExecutionHandle {
    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    pub fn recipe_id(&self) -> &str {
        &self.recipe_id
    }

    pub fn status(&self) -> ExecutionStatus {
        *self.status.borrow()
    }

    /// Wait until the execution reaches a terminal status.
    pub async fn wait(&mut self) -> ExecutionStatus {
        loop {
            let current = *self.status.borrow();
            if current.is_terminal() {
                return current;
            }
            if self.status.changed().await.is_err() {
                return *self.status.borrow();
            }
        }
    }

    /// Wait for the terminal status and fold it into the error taxonomy:
    /// `Completed` is `Ok`, everything else maps to the matching error with
    /// the failing action's detail pulled from the store.
    pub async fn outcome(&mut self) -> Result<(), EngineError> {
        match self.wait().await {
            ExecutionStatus::Completed => Ok(()),
            ExecutionStatus::Timeout => Err(EngineError::Timeout),
            ExecutionStatus::Cancelled => Err(EngineError::Cancelled),
            _ => {
                let detail = self
                    .store
                    .get(&self.execution_id)
                    .and_then(|execution| execution.error);
                Err(match detail {
                    Some(error) => EngineError::ActionFailed {
                        action_id: error.action,
                        message: error.message,
                    },
                    None => EngineError::Internal(format!(
                        "execution {} failed without error detail",
                        self.execution_id
                    )),
                })
            }
        }
    }

    /// Request cooperative cancellation; observed between actions, at loop
    /// iteration boundaries, and between retry attempts.  An in-flight
    /// handler call is left to finish under its own timeout.
    pub fn cancel(&self) {
        self.signals.cancel.cancel();
    }

    pub fn pause(&self) {
        self.signals.pause();
    }

    pub fn resume(&self) {
        self.signals.resume();
    }
}

struct QueuedItem {
    execution: Execution,
    recipe: Arc<Recipe>,
    signals: Arc<ExecutionSignals>,
}

#[derive(Default)]
struct QueueState {
    high: VecDeque<QueuedItem>,
    normal: VecDeque<QueuedItem>,
    low: VecDeque<QueuedItem>,
    running_total: usize,
    running_per_recipe: HashMap<String, usize>,
}

impl QueueState {
    fn queued_len(&self) -> usize {
        self.high.len() + self.normal.len() + self.low.len()
    }
}

struct SchedulerInner {
    config: EngineConfig,
    interpreter: ActionInterpreter,
    store: Arc<ExecutionStore>,
    emitter: EventEmitter,
    state: Mutex<QueueState>,
    signals: DashMap<String, Arc<ExecutionSignals>>,
    wake: Notify,
    shutdown: CancellationToken,
}

pub struct ExecutionScheduler {
    inner: Arc<SchedulerInner>,
}

impl ExecutionScheduler {
    /// Build the scheduler and spawn its pump task.  Must be called from
    /// within a tokio runtime.
    pub fn new(
        config: EngineConfig,
        interpreter: ActionInterpreter,
        store: Arc<ExecutionStore>,
        emitter: EventEmitter,
    ) -> Self {
        let inner = Arc::new(SchedulerInner {
            config,
            interpreter,
            store,
            emitter,
            state: Mutex::new(QueueState::default()),
            signals: DashMap::new(),
            wake: Notify::new(),
            shutdown: CancellationToken::new(),
        });
        let pump = inner.clone();
        tokio::spawn(async move {
            pump.run_pump().await;
        });
        ExecutionScheduler { inner }
    }

    /// Enqueue a dispatched execution.  Fails synchronously when the queue is
    /// at capacity.
    pub fn submit(&self, request: ExecutionRequest) -> Result<ExecutionHandle, EngineError> {
        let recipe = request.recipe;
        let execution = Execution::new(&recipe.id, request.event, request.context);
        let signals = Arc::new(ExecutionSignals::new());

        let handle = ExecutionHandle {
            execution_id: execution.id.clone(),
            recipe_id: recipe.id.clone(),
            status: signals.subscribe(),
            signals: signals.clone(),
            store: self.inner.store.clone(),
        };

        {
            let mut state = self.inner.state.lock();
            if state.queued_len() >= self.inner.config.queue_size {
                return Err(EngineError::QueueFull(self.inner.config.queue_size));
            }
            self.inner.store.record(&execution);
            self.inner.emitter.emit(EngineEvent::ExecutionQueued {
                execution_id: execution.id.clone(),
                recipe_id: recipe.id.clone(),
                timestamp: Utc::now(),
            });
            self.inner
                .signals
                .insert(execution.id.clone(), signals.clone());
            let item = QueuedItem {
                execution,
                recipe: recipe.clone(),
                signals,
            };
            match recipe.settings.priority {
                RecipePriority::High => state.high.push_back(item),
                RecipePriority::Normal => state.normal.push_back(item),
                RecipePriority::Low => state.low.push_back(item),
            }
        }
        self.inner.wake.notify_one();
        Ok(handle)
    }

    /// Cancel by execution id.  A queued execution is removed and finalized
    /// immediately; a running one is cancelled cooperatively.
    pub fn cancel(&self, execution_id: &str) -> bool {
        if let Some(item) = self.inner.remove_queued(execution_id) {
            self.inner
                .finalize(item.execution, &item.signals, ExecutionStatus::Cancelled);
            return true;
        }
        if let Some(signals) = self.inner.signals.get(execution_id) {
            signals.cancel.cancel();
            return true;
        }
        false
    }

    pub fn pause(&self, execution_id: &str) -> bool {
        match self.inner.signals.get(execution_id) {
            Some(signals) => {
                signals.pause();
                true
            }
            None => false,
        }
    }

    pub fn resume(&self, execution_id: &str) -> bool {
        match self.inner.signals.get(execution_id) {
            Some(signals) => {
                signals.resume();
                true
            }
            None => false,
        }
    }

    pub fn queued_len(&self) -> usize {
        self.inner.state.lock().queued_len()
    }

    pub fn running_len(&self) -> usize {
        self.inner.state.lock().running_total
    }
}

impl Drop for ExecutionScheduler {
    fn drop(&mut self) {
        self.inner.shutdown.cancel();
    }
}

impl SchedulerInner {
    async fn run_pump(self: Arc<Self>) {
        loop {
            match self.try_dequeue() {
                Some(item) => {
                    let inner = self.clone();
                    tokio::spawn(async move {
                        inner.run_one(item).await;
                    });
                }
                None => {
                    tokio::select! {
                        _ = self.shutdown.cancelled() => break,
                        _ = self.wake.notified() => {}
                    }
                }
            }
        }
    }

    /// Pop the next admissible execution: highest priority first, FIFO within
    /// a priority, skipping recipes at their concurrency cap.
    fn try_dequeue(&self) -> Option<QueuedItem> {
        let mut state = self.state.lock();
        if state.running_total >= self.config.max_concurrent_executions {
            return None;
        }
        let QueueState {
            high,
            normal,
            low,
            running_total,
            running_per_recipe,
        } = &mut *state;
        for queue in [high, normal, low] {
            if let Some(item) = pop_admissible(queue, running_per_recipe) {
                *running_total += 1;
                *running_per_recipe
                    .entry(item.recipe.id.clone())
                    .or_insert(0) += 1;
                return Some(item);
            }
        }
        None
    }

    async fn run_one(&self, item: QueuedItem) {
        let QueuedItem {
            mut execution,
            recipe,
            signals,
        } = item;

        execution.status = ExecutionStatus::Running;
        execution.started_at = Some(Utc::now());
        signals.broadcast(ExecutionStatus::Running);
        self.store.record(&execution);
        self.emitter.emit(EngineEvent::ExecutionStarted {
            execution_id: execution.id.clone(),
            recipe_id: recipe.id.clone(),
            timestamp: Utc::now(),
        });
        tracing::debug!(
            execution_id = %execution.id,
            recipe_id = %recipe.id,
            "execution started"
        );

        let deadline = Duration::from_secs(
            recipe
                .settings
                .timeout_secs
                .unwrap_or(self.config.default_timeout_secs),
        );
        let status = {
            let mut run = Box::pin(self.interpreter.run(&recipe, &mut execution, &signals));
            tokio::select! {
                status = &mut run => status,
                _ = tokio::time::sleep(deadline) => {
                    // The deadline also covers time spent paused.
                    signals.cancel.cancel();
                    ExecutionStatus::Timeout
                }
            }
        };

        self.finalize(execution, &signals, status);

        let mut state = self.state.lock();
        state.running_total -= 1;
        if let Some(count) = state.running_per_recipe.get_mut(&recipe.id) {
            *count -= 1;
            if *count == 0 {
                state.running_per_recipe.remove(&recipe.id);
            }
        }
        drop(state);
        self.wake.notify_one();
    }

    fn finalize(
        &self,
        mut execution: Execution,
        signals: &ExecutionSignals,
        status: ExecutionStatus,
    ) {
        execution.finish(status);
        let terminal = execution.status;
        self.signals.remove(&execution.id);
        self.store.record(&execution);
        self.emitter.emit(EngineEvent::ExecutionFinished {
            execution_id: execution.id.clone(),
            recipe_id: execution.recipe_id.clone(),
            status: terminal,
            timestamp: Utc::now(),
        });
        tracing::debug!(
            execution_id = %execution.id,
            status = ?terminal,
            "execution finished"
        );
        signals.broadcast(terminal);
    }

    fn remove_queued(&self, execution_id: &str) -> Option<QueuedItem> {
        let mut state = self.state.lock();
        let QueueState {
            high, normal, low, ..
        } = &mut *state;
        for queue in [high, normal, low] {
            if let Some(idx) = queue.iter().position(|i| i.execution.id == execution_id) {
                return queue.remove(idx);
            }
        }
        None
    }
}

fn pop_admissible(
    queue: &mut VecDeque<QueuedItem>,
    running: &HashMap<String, usize>,
) -> Option<QueuedItem> {
    let idx = queue
        .iter()
        .position(
            |item| match item.recipe.settings.max_concurrent_executions {
                Some(cap) => running.get(&item.recipe.id).copied().unwrap_or(0) < cap,
                None => true,
            },
        )?;
    queue.remove(idx)
}
