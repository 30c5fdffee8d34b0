//! Status fan-out for UI-ish consumers (tray icon, overlay, logs).
//!
//! Consumers are decoupled: a slow subscriber lags and drops old events
//! without ever blocking the pipeline. A consumer joining mid-session gets
//! the current snapshot up front, so it can render immediately instead of
//! waiting for the next transition.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::state::PipelineState;

const CHANNEL_CAPACITY: usize = 64;

/// One observed status change.
#[derive(Debug, Clone, Serialize)]
pub struct StatusEvent {
    pub state: PipelineState,
    pub timestamp: DateTime<Utc>,
}

/// Broadcasts pipeline status to any number of subscribers.
///
/// The engine task is the only publisher, so subscribers observe every
/// transition in the order it happened (modulo lag drops).
#[derive(Debug, Clone)]
pub struct StatusBroadcaster {
    current: Arc<Mutex<StatusEvent>>,
    tx: broadcast::Sender<StatusEvent>,
}

impl StatusBroadcaster {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            current: Arc::new(Mutex::new(StatusEvent {
                state: PipelineState::Idle,
                timestamp: Utc::now(),
            })),
            tx,
        }
    }

    /// Publish a new state to all subscribers. Never blocks; with no
    /// subscribers the event is simply dropped.
    pub fn publish(&self, state: PipelineState) {
        let event = StatusEvent {
            state,
            timestamp: Utc::now(),
        };
        *self.current.lock().expect("status mutex poisoned") = event.clone();
        let _ = self.tx.send(event);
    }

    /// Subscribe, returning the current snapshot plus a live receiver.
    pub fn subscribe(&self) -> (StatusEvent, broadcast::Receiver<StatusEvent>) {
        // Lock held across subscribe so the snapshot and the stream line
        // up: no transition can slip between them.
        let current = self.current.lock().expect("status mutex poisoned");
        (current.clone(), self.tx.subscribe())
    }

    pub fn current(&self) -> PipelineState {
        self.current.lock().expect("status mutex poisoned").state
    }
}

impl Default for StatusBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}
