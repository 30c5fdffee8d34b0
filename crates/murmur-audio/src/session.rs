//! Recording session lifecycle: open stream, buffer, finalize.
//!
//! The recorder owns the duration policy. A session shorter than
//! MinDuration is an accidental tap and is discarded without ever reaching
//! transcription; the buffer is bounded at MaxDuration worth of samples.
//! Duration is derived from sample count rather than wall-clock time, so
//! it matches the audio that was actually captured.

use std::time::Instant;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use murmur_core::config::AudioConfig;
use murmur_core::error::Result;

use crate::{AudioBuffer, AudioCapture, CaptureHandle};

/// A finalized recording, ready for transcription.
///
/// Exactly one consumer takes ownership; once the transcription call has
/// run, the samples are dropped with it. The type deliberately has no
/// serialization or file-writing surface.
#[derive(Debug)]
pub struct FinalizedBuffer {
    pub session_id: Uuid,
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl FinalizedBuffer {
    /// Audio duration derived from the sample count.
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Result of ending a recording session.
#[derive(Debug)]
pub enum EndOutcome {
    /// The recording met the duration floor and was handed off.
    Finalized(FinalizedBuffer),
    /// The recording was below MinDuration and was dropped.
    Discarded { duration_secs: f64 },
}

/// An open recording session.
///
/// Mutated only through the capture stream (sample appends) and consumed
/// exactly once by [`Recorder::end`].
pub struct SessionHandle {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    opened: Instant,
    buffer: AudioBuffer,
    capture: CaptureHandle,
}

impl SessionHandle {
    /// The instant at which MaxDuration elapses and the session must be
    /// auto-finalized regardless of key state.
    pub fn deadline(&self, max_duration: std::time::Duration) -> Instant {
        self.opened + max_duration
    }

    /// Samples captured so far.
    pub fn buffered_samples(&self) -> usize {
        self.buffer.len()
    }
}

/// Owns one capture lifecycle at a time: begin opens the stream, end
/// finalizes or discards.
pub struct Recorder<C: AudioCapture> {
    capture: C,
    config: AudioConfig,
}

impl<C: AudioCapture> Recorder<C> {
    pub fn new(capture: C, config: AudioConfig) -> Self {
        Self { capture, config }
    }

    /// Duration floor below which a recording is an accidental tap.
    pub fn min_duration(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.config.min_duration_ms)
    }

    /// Duration ceiling after which a recording is force-finalized.
    pub fn max_duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.config.max_duration_secs)
    }

    /// Start capturing into a fresh bounded buffer.
    pub fn begin(&self) -> Result<SessionHandle> {
        let max_samples =
            (self.config.max_duration_secs as usize) * (self.config.sample_rate as usize);
        let buffer = AudioBuffer::new(max_samples);
        let capture = self.capture.open(buffer.clone())?;

        let handle = SessionHandle {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            opened: Instant::now(),
            buffer,
            capture,
        };
        tracing::info!(session_id = %handle.id, "Recording session started");
        Ok(handle)
    }

    /// Stop the stream, drain the buffer, and apply the duration policy.
    ///
    /// After this call the recorder holds no reference to the audio; the
    /// finalized buffer has exactly one owner.
    pub fn end(&self, handle: SessionHandle) -> EndOutcome {
        let SessionHandle {
            id,
            buffer,
            capture,
            ..
        } = handle;

        // Waits for the stream's final callback before draining.
        capture.close();
        let samples = buffer.take();
        let duration_secs = samples.len() as f64 / self.config.sample_rate as f64;

        if duration_secs < self.min_duration().as_secs_f64() {
            tracing::debug!(
                session_id = %id,
                duration_secs,
                "Recording below duration floor, discarding"
            );
            return EndOutcome::Discarded { duration_secs };
        }

        tracing::info!(session_id = %id, duration_secs, "Recording finalized");
        EndOutcome::Finalized(FinalizedBuffer {
            session_id: id,
            samples,
            sample_rate: self.config.sample_rate,
        })
    }
}
