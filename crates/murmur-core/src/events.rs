use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Terminal outcome of a dictation session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionOutcome {
    /// Speech was transcribed and delivered.
    Completed,
    /// The capability reported no intelligible speech.
    NoSpeech,
    /// The transcription call failed.
    Failed,
}

/// Outbound pipeline events for external consumers (stats dashboard).
///
/// Events carry metadata only — never audio samples and never the
/// transcript body. The stats collaborator owns its own persistence
/// format; this enum is the wire contract.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[non_exhaustive]
pub enum PipelineEvent {
    /// A recording session started (chord engaged).
    SessionStarted {
        session_id: Uuid,
        model: String,
        timestamp: DateTime<Utc>,
    },

    /// A session reached a terminal transcription outcome.
    SessionFinished {
        session_id: Uuid,
        outcome: SessionOutcome,
        duration_secs: f64,
        text_length: usize,
        timestamp: DateTime<Utc>,
    },

    /// A session was discarded as an accidental tap (below MinDuration).
    SessionDiscarded {
        session_id: Uuid,
        duration_secs: f64,
        timestamp: DateTime<Utc>,
    },

    /// A chord engagement was rejected because a transcription was in
    /// flight.
    SessionRejected { timestamp: DateTime<Utc> },

    /// Transcribed text could not be delivered to the focused target.
    InjectionFailed {
        session_id: Uuid,
        reason: String,
        timestamp: DateTime<Utc>,
    },

    /// The global key hook was lost (sleep, suspend, or hook conflict).
    HookLost {
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

impl PipelineEvent {
    /// Returns the timestamp of the event.
    pub fn timestamp(&self) -> DateTime<Utc> {
        match self {
            PipelineEvent::SessionStarted { timestamp, .. }
            | PipelineEvent::SessionFinished { timestamp, .. }
            | PipelineEvent::SessionDiscarded { timestamp, .. }
            | PipelineEvent::SessionRejected { timestamp }
            | PipelineEvent::InjectionFailed { timestamp, .. }
            | PipelineEvent::HookLost { timestamp, .. } => *timestamp,
        }
    }

    /// Returns a stable event name for logging and downstream routing.
    pub fn event_name(&self) -> &'static str {
        match self {
            PipelineEvent::SessionStarted { .. } => "session_started",
            PipelineEvent::SessionFinished { .. } => "session_finished",
            PipelineEvent::SessionDiscarded { .. } => "session_discarded",
            PipelineEvent::SessionRejected { .. } => "session_rejected",
            PipelineEvent::InjectionFailed { .. } => "injection_failed",
            PipelineEvent::HookLost { .. } => "hook_lost",
        }
    }
}

/// In-process event bus for pipeline events.
///
/// Thin wrapper over a tokio broadcast channel. Publishing never blocks
/// and never fails: with no subscribers the event is simply dropped.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Publish an event to all current subscribers.
    pub fn publish(&self, event: PipelineEvent) {
        tracing::debug!(event = event.event_name(), "Pipeline event");
        let _ = self.tx.send(event);
    }

    /// Subscribe to the event stream from this point forward.
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }
}
