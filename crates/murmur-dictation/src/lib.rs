//! Murmur Dictation crate - push-to-talk coordination.
//!
//! Connects the hotkey monitor, the audio recorder, the transcription
//! dispatcher, and the text injector into one pipeline:
//! hold the chord, speak, release, and the transcript lands in the
//! focused application.

pub mod engine;
pub mod hotkey;
pub mod state;
pub mod status;
pub mod text_inject;

pub use engine::Engine;
pub use hotkey::{Chord, ChordKey, ChordTracker, Edge, HotkeyMonitor, MonitorEvent};
pub use state::{PipelineState, StateMachine};
pub use status::{StatusBroadcaster, StatusEvent};
pub use text_inject::{DesktopInjector, InjectionMethod, MockSink, TextSink};
