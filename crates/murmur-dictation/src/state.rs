//! Pipeline lifecycle state machine.
//!
//! Every status change flows through [`StateMachine::transition`], which
//! rejects anything outside the allowed table. The engine task is the only
//! caller, so observers always see transitions in the order they happened.

use std::fmt;
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use murmur_core::error::{MurmurError, Result};

/// Externally visible pipeline states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelineState {
    /// Waiting for the chord.
    Idle,
    /// Chord held, capturing audio.
    Recording,
    /// A buffer is in flight to the transcription capability.
    Transcribing,
    /// A new session was rejected because one is still transcribing.
    Busy,
    /// A session ended in an error; transient, always returns to Idle.
    Error,
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PipelineState::Idle => "idle",
            PipelineState::Recording => "recording",
            PipelineState::Transcribing => "transcribing",
            PipelineState::Busy => "busy",
            PipelineState::Error => "error",
        };
        write!(f, "{}", name)
    }
}

impl PipelineState {
    /// Whether a direct transition to `target` is allowed.
    pub fn can_transition_to(&self, target: PipelineState) -> bool {
        use PipelineState::*;
        matches!(
            (self, target),
            (Idle, Recording)
                | (Recording, Transcribing)
                | (Recording, Idle)
                | (Recording, Error)
                | (Transcribing, Idle)
                | (Transcribing, Busy)
                | (Transcribing, Error)
                | (Busy, Idle)
                | (Error, Idle)
        )
    }
}

/// Thread-safe holder for the current pipeline state.
#[derive(Debug, Clone)]
pub struct StateMachine {
    state: Arc<Mutex<PipelineState>>,
}

impl StateMachine {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(PipelineState::Idle)),
        }
    }

    pub fn current(&self) -> PipelineState {
        *self.state.lock().expect("state mutex poisoned")
    }

    /// Apply a transition, rejecting any move outside the allowed table.
    pub fn transition(&self, to: PipelineState) -> Result<()> {
        let mut state = self.state.lock().expect("state mutex poisoned");
        if !state.can_transition_to(to) {
            return Err(MurmurError::State {
                from: state.to_string(),
                to: to.to_string(),
            });
        }
        tracing::debug!(from = %state, to = %to, "Pipeline state transition");
        *state = to;
        Ok(())
    }

    /// Force back to Idle from any state. Recovery path only.
    pub fn reset(&self) {
        let mut state = self.state.lock().expect("state mutex poisoned");
        if *state != PipelineState::Idle {
            tracing::warn!(from = %state, "Resetting pipeline state to idle");
            *state = PipelineState::Idle;
        }
    }
}

impl Default for StateMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_starts_idle() {
        let machine = StateMachine::new();
        assert_eq!(machine.current(), PipelineState::Idle);
    }

    #[test]
    fn test_full_session_path() {
        let machine = StateMachine::new();
        machine.transition(PipelineState::Recording).unwrap();
        machine.transition(PipelineState::Transcribing).unwrap();
        machine.transition(PipelineState::Idle).unwrap();
        assert_eq!(machine.current(), PipelineState::Idle);
    }

    #[test]
    fn test_discarded_session_path() {
        let machine = StateMachine::new();
        machine.transition(PipelineState::Recording).unwrap();
        // Below-minimum recordings skip transcription entirely.
        machine.transition(PipelineState::Idle).unwrap();
    }

    #[test]
    fn test_busy_path() {
        let machine = StateMachine::new();
        machine.transition(PipelineState::Recording).unwrap();
        machine.transition(PipelineState::Transcribing).unwrap();
        machine.transition(PipelineState::Busy).unwrap();
        machine.transition(PipelineState::Idle).unwrap();
    }

    #[test]
    fn test_error_always_returns_to_idle() {
        let machine = StateMachine::new();
        machine.transition(PipelineState::Recording).unwrap();
        machine.transition(PipelineState::Error).unwrap();
        machine.transition(PipelineState::Idle).unwrap();
    }

    #[test]
    fn test_invalid_transitions_rejected() {
        let machine = StateMachine::new();
        assert!(machine.transition(PipelineState::Transcribing).is_err());
        assert!(machine.transition(PipelineState::Busy).is_err());
        assert!(machine.transition(PipelineState::Error).is_err());
        // State unchanged after a rejected transition.
        assert_eq!(machine.current(), PipelineState::Idle);
    }

    #[test]
    fn test_busy_cannot_error() {
        let machine = StateMachine::new();
        machine.transition(PipelineState::Recording).unwrap();
        machine.transition(PipelineState::Transcribing).unwrap();
        machine.transition(PipelineState::Busy).unwrap();
        assert!(machine.transition(PipelineState::Error).is_err());
    }

    #[test]
    fn test_reset_forces_idle() {
        let machine = StateMachine::new();
        machine.transition(PipelineState::Recording).unwrap();
        machine.reset();
        assert_eq!(machine.current(), PipelineState::Idle);
    }

    #[test]
    fn test_state_error_names_both_states() {
        let machine = StateMachine::new();
        let err = machine.transition(PipelineState::Busy).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("idle"));
        assert!(msg.contains("busy"));
    }
}
