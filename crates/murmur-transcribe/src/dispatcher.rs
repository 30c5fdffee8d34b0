//! Single-flight dispatch into the transcription capability.
//!
//! At most one transcription call runs at a time. A buffer arriving while
//! one is in flight is rejected immediately and dropped; queuing would
//! only produce stale, out-of-order injections. There is no retry: the
//! user re-recording is the recovery path.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{oneshot, Semaphore};
use tokio::task::JoinHandle;

use murmur_audio::FinalizedBuffer;
use murmur_core::config::SessionSettings;

use crate::{Outcome, TranscribeRequest, Transcriber, TranscriptionResult};

/// Immediate answer to a submission attempt.
pub enum Submission {
    /// The call was started; completion arrives on the receiver.
    Accepted(oneshot::Receiver<TranscriptionResult>),
    /// A call is already in flight; the buffer was dropped.
    Busy,
}

/// Serializes calls into the transcription capability.
pub struct Dispatcher<T: Transcriber> {
    transcriber: Arc<T>,
    timeout: Duration,
    slot: Arc<Semaphore>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Transcriber> Dispatcher<T> {
    pub fn new(transcriber: T, timeout: Duration) -> Self {
        Self {
            transcriber: Arc::new(transcriber),
            timeout,
            slot: Arc::new(Semaphore::new(1)),
            worker: Mutex::new(None),
        }
    }

    /// Whether a transcription call is currently in flight.
    pub fn is_inflight(&self) -> bool {
        self.slot.available_permits() == 0
    }

    /// Start a transcription call for a finalized buffer.
    ///
    /// Returns `Busy` without queuing when a call is in flight. Otherwise
    /// the call runs on a worker task under a bounded timeout; the buffer
    /// is consumed by the call and freed when it returns, whatever the
    /// outcome.
    pub fn submit(&self, buffer: FinalizedBuffer, settings: &SessionSettings) -> Submission {
        let permit = match Arc::clone(&self.slot).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                tracing::warn!(
                    session_id = %buffer.session_id,
                    "Transcription in flight, rejecting new buffer"
                );
                return Submission::Busy;
            }
        };

        let session_id = buffer.session_id;
        let request = TranscribeRequest {
            sample_rate: buffer.sample_rate,
            samples: buffer.samples,
            model: settings.model.clone(),
            language: settings.language.clone(),
        };

        let (tx, rx) = oneshot::channel();
        let transcriber = Arc::clone(&self.transcriber);
        let timeout = self.timeout;

        let handle = tokio::spawn(async move {
            let _permit = permit;

            let outcome = match tokio::time::timeout(timeout, transcriber.transcribe(request)).await
            {
                Ok(Ok(crate::Transcript::Text(text))) => {
                    let text = text.trim().to_string();
                    if text.is_empty() {
                        (String::new(), Outcome::NoSpeech)
                    } else {
                        (text, Outcome::Ok)
                    }
                }
                Ok(Ok(crate::Transcript::NoSpeech)) => (String::new(), Outcome::NoSpeech),
                Ok(Err(e)) => {
                    tracing::warn!(session_id = %session_id, error = %e, "Transcription failed");
                    (String::new(), Outcome::Failed(e.to_string()))
                }
                Err(_) => {
                    tracing::warn!(
                        session_id = %session_id,
                        timeout_secs = timeout.as_secs(),
                        "Transcription timed out"
                    );
                    (
                        String::new(),
                        Outcome::Failed(format!(
                            "Transcription exceeded {}s ceiling",
                            timeout.as_secs()
                        )),
                    )
                }
            };

            let (text, outcome) = outcome;
            let _ = tx.send(TranscriptionResult {
                session_id,
                text,
                outcome,
            });
        });

        *self.worker.lock().expect("worker mutex poisoned") = Some(handle);
        Submission::Accepted(rx)
    }

    /// Wind down with a bounded grace period.
    ///
    /// Waits up to `grace` for the in-flight call, then aborts it. An
    /// unbounded wait on a stalled engine would keep the process from
    /// exiting.
    pub async fn shutdown(&self, grace: Duration) {
        if !self.is_inflight() {
            return;
        }
        tracing::info!(grace_secs = grace.as_secs(), "Waiting for in-flight transcription");

        if tokio::time::timeout(grace, self.slot.acquire())
            .await
            .is_err()
        {
            let handle = self.worker.lock().expect("worker mutex poisoned").take();
            if let Some(handle) = handle {
                tracing::warn!("Aborting stalled transcription call");
                handle.abort();
            }
        }
    }
}
