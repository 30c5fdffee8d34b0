//! The pipeline engine: one task owning the whole session lifecycle.
//!
//! All session mutation happens inside [`Engine::run`]'s select loop, so
//! there is no session state shared across tasks and no ordering races
//! between a release edge, the max-duration deadline, and a transcription
//! completion. Collaborators hang off the edges: the hotkey monitor feeds
//! edges in, the dispatcher and injector are driven from here, and status
//! and stats events fan out through broadcast channels.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{mpsc, oneshot, watch};
use uuid::Uuid;

use murmur_audio::{AudioCapture, EndOutcome, Recorder, SessionHandle};
use murmur_core::config::{MurmurConfig, SessionSettings};
use murmur_core::error::{MurmurError, Result};
use murmur_core::events::{EventBus, PipelineEvent, SessionOutcome};
use murmur_transcribe::{Dispatcher, Outcome, Submission, Transcriber, TranscriptionResult};

use crate::hotkey::{Edge, MonitorEvent};
use crate::state::{PipelineState, StateMachine};
use crate::status::StatusBroadcaster;
use crate::text_inject::TextSink;

/// Bound on waiting out an in-flight transcription at shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// A recording in progress, owned by the engine loop.
struct ActiveSession {
    handle: SessionHandle,
    settings: SessionSettings,
}

/// A transcription in flight, owned by the engine loop.
struct Inflight {
    session_id: Uuid,
    duration_secs: f64,
    rx: oneshot::Receiver<TranscriptionResult>,
}

/// Resolves when the in-flight transcription completes; pends forever when
/// nothing is in flight.
async fn next_result(
    inflight: &mut Option<Inflight>,
) -> std::result::Result<TranscriptionResult, oneshot::error::RecvError> {
    match inflight.as_mut() {
        Some(inflight) => (&mut inflight.rx).await,
        None => std::future::pending().await,
    }
}

/// Coordinates hotkey edges, recording, transcription, and injection.
pub struct Engine<C: AudioCapture, T: Transcriber> {
    config: MurmurConfig,
    state: StateMachine,
    status: StatusBroadcaster,
    events: EventBus,
    recorder: Recorder<C>,
    dispatcher: Dispatcher<T>,
    injector: Arc<dyn TextSink>,
}

impl<C: AudioCapture, T: Transcriber> Engine<C, T> {
    pub fn new(
        config: MurmurConfig,
        capture: C,
        transcriber: T,
        injector: Arc<dyn TextSink>,
    ) -> Self {
        let recorder = Recorder::new(capture, config.audio.clone());
        let dispatcher = Dispatcher::new(
            transcriber,
            Duration::from_secs(config.transcription.timeout_secs),
        );
        Self {
            config,
            state: StateMachine::new(),
            status: StatusBroadcaster::new(),
            events: EventBus::default(),
            recorder,
            dispatcher,
            injector,
        }
    }

    /// Status fan-out handle; clone before calling [`Engine::run`].
    pub fn status(&self) -> StatusBroadcaster {
        self.status.clone()
    }

    /// Stats event bus handle; clone before calling [`Engine::run`].
    pub fn events(&self) -> EventBus {
        self.events.clone()
    }

    /// Drive the pipeline until shutdown is signalled or the hook is lost.
    ///
    /// Hook loss is fatal: without the hook no further edges can arrive,
    /// so the engine winds down (discarding any active recording, waiting
    /// out any in-flight transcription up to the grace bound) and returns
    /// the hook error.
    pub async fn run(
        self,
        mut monitor_rx: mpsc::UnboundedReceiver<MonitorEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) -> Result<()> {
        let mut active: Option<ActiveSession> = None;
        let mut inflight: Option<Inflight> = None;

        loop {
            let deadline = match &active {
                Some(session) => tokio::time::Instant::from_std(
                    session.handle.deadline(self.recorder.max_duration()),
                ),
                None => tokio::time::Instant::now() + Duration::from_secs(3600),
            };

            tokio::select! {
                event = monitor_rx.recv() => match event {
                    Some(MonitorEvent::Edge(Edge::Engage)) => {
                        self.on_engage(&mut active, &inflight);
                    }
                    Some(MonitorEvent::Edge(Edge::Disengage)) => {
                        self.finish_recording(&mut active, &mut inflight);
                    }
                    Some(MonitorEvent::HookLost(reason)) => {
                        tracing::error!(reason = %reason, "Global key hook lost");
                        self.events.publish(PipelineEvent::HookLost {
                            reason: reason.clone(),
                            timestamp: Utc::now(),
                        });
                        self.wind_down(&mut active).await;
                        return Err(MurmurError::Hook(reason));
                    }
                    None => {
                        let reason = "Hotkey channel closed".to_string();
                        self.wind_down(&mut active).await;
                        return Err(MurmurError::Hook(reason));
                    }
                },

                result = next_result(&mut inflight) => {
                    if let Some(done) = inflight.take() {
                        self.on_transcription_done(done, result).await;
                    }
                }

                _ = tokio::time::sleep_until(deadline), if active.is_some() => {
                    tracing::info!(
                        max_secs = self.config.audio.max_duration_secs,
                        "Recording hit the duration ceiling, finalizing"
                    );
                    self.finish_recording(&mut active, &mut inflight);
                }

                _ = shutdown.changed() => {
                    tracing::info!("Shutdown requested");
                    self.wind_down(&mut active).await;
                    return Ok(());
                }
            }
        }
    }

    /// Chord engaged: open a recording session, or reject if one session
    /// is still transcribing.
    fn on_engage(&self, active: &mut Option<ActiveSession>, inflight: &Option<Inflight>) {
        if active.is_some() {
            // Duplicate engage under event stress; the tracker should have
            // collapsed this, so just ignore it.
            return;
        }
        if inflight.is_some() || self.dispatcher.is_inflight() {
            tracing::info!("Chord engaged while transcription in flight, rejecting session");
            // A repeated rejection finds the state already Busy.
            if self.state.current() == PipelineState::Transcribing {
                self.set_state(PipelineState::Busy);
            }
            self.events.publish(PipelineEvent::SessionRejected {
                timestamp: Utc::now(),
            });
            return;
        }

        // Settings are read exactly once per session, here.
        let settings = self.config.session_settings();
        self.set_state(PipelineState::Recording);
        match self.recorder.begin() {
            Ok(handle) => {
                self.events.publish(PipelineEvent::SessionStarted {
                    session_id: handle.id,
                    model: settings.model.clone(),
                    timestamp: handle.started_at,
                });
                *active = Some(ActiveSession { handle, settings });
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to open capture stream");
                self.fail_to_idle();
            }
        }
    }

    /// Chord released or deadline hit: close the stream and either discard
    /// the recording or hand it to the dispatcher.
    fn finish_recording(&self, active: &mut Option<ActiveSession>, inflight: &mut Option<Inflight>) {
        let Some(ActiveSession { handle, settings }) = active.take() else {
            return;
        };
        let session_id = handle.id;

        match self.recorder.end(handle) {
            EndOutcome::Discarded { duration_secs } => {
                // Accidental tap: no transcription, no error surfaced.
                self.set_state(PipelineState::Idle);
                self.events.publish(PipelineEvent::SessionDiscarded {
                    session_id,
                    duration_secs,
                    timestamp: Utc::now(),
                });
            }
            EndOutcome::Finalized(buffer) => {
                let duration_secs = buffer.duration_secs();
                self.set_state(PipelineState::Transcribing);
                match self.dispatcher.submit(buffer, &settings) {
                    Submission::Accepted(rx) => {
                        *inflight = Some(Inflight {
                            session_id,
                            duration_secs,
                            rx,
                        });
                    }
                    Submission::Busy => {
                        // The engine is the only submitter and only submits
                        // with nothing in flight; getting here is a bug.
                        tracing::error!(
                            session_id = %session_id,
                            "Dispatcher rejected a submit with no known in-flight call"
                        );
                        self.set_state(PipelineState::Idle);
                    }
                }
            }
        }
    }

    /// A transcription call reached its terminal outcome.
    async fn on_transcription_done(
        &self,
        done: Inflight,
        result: std::result::Result<TranscriptionResult, oneshot::error::RecvError>,
    ) {
        let result = match result {
            Ok(result) => result,
            Err(_) => {
                tracing::error!(
                    session_id = %done.session_id,
                    "Transcription worker dropped without a result"
                );
                self.fail_to_idle();
                self.publish_finished(&done, SessionOutcome::Failed, 0);
                return;
            }
        };

        match result.outcome {
            Outcome::Ok => {
                let text_length = result.text.chars().count();
                let injector = Arc::clone(&self.injector);
                let text = result.text;
                // Delivery blocks for the focus/restore delays; edges
                // arriving meanwhile queue on the edge channel.
                let delivered =
                    tokio::task::spawn_blocking(move || injector.deliver(&text)).await;

                match delivered {
                    Ok(Ok(())) => {
                        self.set_state(PipelineState::Idle);
                        self.publish_finished(&done, SessionOutcome::Completed, text_length);
                    }
                    Ok(Err(e)) => {
                        tracing::error!(
                            session_id = %done.session_id,
                            error = %e,
                            "Text injection failed"
                        );
                        self.events.publish(PipelineEvent::InjectionFailed {
                            session_id: done.session_id,
                            reason: e.to_string(),
                            timestamp: Utc::now(),
                        });
                        self.fail_to_idle();
                        self.publish_finished(&done, SessionOutcome::Completed, text_length);
                    }
                    Err(e) => {
                        tracing::error!(
                            session_id = %done.session_id,
                            error = %e,
                            "Injection task panicked"
                        );
                        self.fail_to_idle();
                        self.publish_finished(&done, SessionOutcome::Completed, text_length);
                    }
                }
            }
            Outcome::NoSpeech => {
                // Silent no-op from the user's point of view.
                tracing::info!(session_id = %done.session_id, "No speech detected");
                self.set_state(PipelineState::Idle);
                self.publish_finished(&done, SessionOutcome::NoSpeech, 0);
            }
            Outcome::Failed(reason) => {
                tracing::warn!(
                    session_id = %done.session_id,
                    reason = %reason,
                    "Transcription failed"
                );
                self.fail_to_idle();
                self.publish_finished(&done, SessionOutcome::Failed, 0);
            }
        }
    }

    fn publish_finished(&self, done: &Inflight, outcome: SessionOutcome, text_length: usize) {
        self.events.publish(PipelineEvent::SessionFinished {
            session_id: done.session_id,
            outcome,
            duration_secs: done.duration_secs,
            text_length,
            timestamp: Utc::now(),
        });
    }

    /// Apply and broadcast a state transition. A transition outside the
    /// table is a bug in the engine; rather than leave the pipeline wedged
    /// in whatever state it was in, force it back to Idle and say so.
    fn set_state(&self, to: PipelineState) {
        match self.state.transition(to) {
            Ok(()) => self.status.publish(to),
            Err(e) => {
                tracing::error!(error = %e, "Refusing state transition, recovering to idle");
                self.state.reset();
                self.status.publish(PipelineState::Idle);
            }
        }
    }

    /// Settle back to Idle after a failure, showing the transient Error
    /// state where the table allows it. From Busy the table goes straight
    /// to Idle; the first session's failure is still recorded in events.
    fn fail_to_idle(&self) {
        match self.state.current() {
            PipelineState::Idle => {}
            PipelineState::Busy => self.set_state(PipelineState::Idle),
            _ => {
                self.set_state(PipelineState::Error);
                self.set_state(PipelineState::Idle);
            }
        }
    }

    /// Stop any active recording (discarding its audio) and wait out an
    /// in-flight transcription up to the grace bound.
    async fn wind_down(&self, active: &mut Option<ActiveSession>) {
        if let Some(ActiveSession { handle, .. }) = active.take() {
            let session_id = handle.id;
            // The buffer is dropped unheard; at teardown delivering text to
            // some window would be a surprise, losing it is not.
            let _ = self.recorder.end(handle);
            tracing::info!(session_id = %session_id, "Active recording discarded at wind-down");
            self.set_state(PipelineState::Idle);
        }
        self.dispatcher.shutdown(SHUTDOWN_GRACE).await;
    }
}
