//! Engine events.
//!
//! Optional observability stream: the emitter is cheap to clone, never blocks
//! the engine, and drops events once the receiver goes away.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::execution::ExecutionStatus;

#[derive(Clone, Debug, Serialize)]
pub enum EngineEvent {
    ExecutionQueued {
        execution_id: String,
        recipe_id: String,
        timestamp: DateTime<Utc>,
    },
    ExecutionStarted {
        execution_id: String,
        recipe_id: String,
        timestamp: DateTime<Utc>,
    },
    ExecutionFinished {
        execution_id: String,
        recipe_id: String,
        status: ExecutionStatus,
        timestamp: DateTime<Utc>,
    },
    ActionStarted {
        execution_id: String,
        action_id: String,
        timestamp: DateTime<Utc>,
    },
    ActionFinished {
        execution_id: String,
        action_id: String,
        status: ExecutionStatus,
        timestamp: DateTime<Utc>,
    },
    ActionRetry {
        execution_id: String,
        action_id: String,
        attempt: u32,
        error: String,
        timestamp: DateTime<Utc>,
    },
    TriggerThrottled {
        recipe_id: String,
        timestamp: DateTime<Utc>,
    },
}

pub type EventReceiver = mpsc::UnboundedReceiver<EngineEvent>;

#[derive(Clone, Default)]
pub struct EventEmitter {
    tx: Option<mpsc::UnboundedSender<EngineEvent>>,
    active: Arc<AtomicBool>,
}

impl EventEmitter {
    /// An emitter that drops everything.
    pub fn disabled() -> Self {
        EventEmitter {
            tx: None,
            active: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn channel() -> (Self, EventReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let emitter = EventEmitter {
            tx: Some(tx),
            active: Arc::new(AtomicBool::new(true)),
        };
        (emitter, rx)
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    pub fn emit(&self, event: EngineEvent) {
        let Some(tx) = &self.tx else {
            return;
        };
        if !self.is_active() {
            return;
        }
        if tx.send(event).is_err() {
            // Receiver dropped; stop producing.
            self.active.store(false, Ordering::Relaxed);
        }
    }
}
