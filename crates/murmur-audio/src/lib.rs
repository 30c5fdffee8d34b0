//! Murmur Audio crate - capture stream abstraction and the bounded
//! in-memory recording buffer.
//!
//! Audio samples live exclusively in memory for the lifetime of one
//! session: the capture callback appends into an [`AudioBuffer`], the
//! recorder drains it into a [`session::FinalizedBuffer`], and the
//! transcription worker drops that buffer after the engine call. Nothing
//! in this crate can write samples to persistent storage.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use murmur_core::error::{MurmurError, Result};

pub mod capture;
pub mod session;

pub use capture::CpalCapture;
pub use session::{EndOutcome, FinalizedBuffer, Recorder, SessionHandle};

/// Bounded, shared buffer of f32 PCM samples.
///
/// Appended to from the capture callback thread, drained once by the
/// recorder. Appends beyond capacity are truncated: a session can never
/// hold more than MaxDuration worth of audio, whatever the key state.
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    samples: Arc<Mutex<Vec<f32>>>,
    max_samples: usize,
}

impl AudioBuffer {
    /// Create a buffer holding at most `max_samples` samples.
    pub fn new(max_samples: usize) -> Self {
        Self {
            samples: Arc::new(Mutex::new(Vec::new())),
            max_samples,
        }
    }

    /// Append samples, keeping only what fits under the capacity ceiling.
    pub fn push(&self, data: &[f32]) {
        if let Ok(mut buf) = self.samples.lock() {
            let remaining = self.max_samples.saturating_sub(buf.len());
            let take = remaining.min(data.len());
            buf.extend_from_slice(&data[..take]);
        }
    }

    /// Take all buffered samples, leaving the buffer empty.
    pub fn take(&self) -> Vec<f32> {
        if let Ok(mut buf) = self.samples.lock() {
            std::mem::take(&mut *buf)
        } else {
            Vec::new()
        }
    }

    /// Number of samples currently buffered.
    pub fn len(&self) -> usize {
        self.samples.lock().map(|b| b.len()).unwrap_or(0)
    }

    /// Whether the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the buffer has reached its capacity ceiling.
    pub fn is_full(&self) -> bool {
        self.len() >= self.max_samples
    }

    /// Capacity ceiling in samples.
    pub fn capacity(&self) -> usize {
        self.max_samples
    }
}

/// A source of microphone audio.
///
/// `open` starts delivering samples into `sink` until the returned handle
/// is closed. Implementations must deliver mono f32 PCM at the rate they
/// were configured with.
pub trait AudioCapture: Send + Sync {
    fn open(&self, sink: AudioBuffer) -> Result<CaptureHandle>;
}

/// Handle to a running capture stream.
///
/// Closing sets the stop flag and joins the stream thread, which gives the
/// backend a chance to flush its final callback before the buffer is
/// drained.
pub struct CaptureHandle {
    stop: Arc<AtomicBool>,
    join: Option<std::thread::JoinHandle<()>>,
}

impl CaptureHandle {
    /// Handle backed by a dedicated stream thread.
    pub fn with_thread(stop: Arc<AtomicBool>, join: std::thread::JoinHandle<()>) -> Self {
        Self {
            stop,
            join: Some(join),
        }
    }

    /// Handle with no thread to join (mock sources).
    pub fn detached(stop: Arc<AtomicBool>) -> Self {
        Self { stop, join: None }
    }

    /// Stop the stream and wait for it to flush.
    pub fn close(mut self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(join) = self.join.take() {
            if join.join().is_err() {
                tracing::warn!("Capture stream thread panicked during close");
            }
        }
    }
}

impl Drop for CaptureHandle {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

/// Mock capture source for tests.
///
/// Fills the sink with a fixed number of samples the moment the stream is
/// opened, so session duration (derived from sample count) is fully
/// deterministic. Can be configured to fail on open to exercise the
/// capture-error path.
#[derive(Debug, Clone)]
pub struct MockCapture {
    samples_per_open: usize,
    fail_on_open: bool,
}

impl MockCapture {
    /// A source that yields `samples_per_open` samples per session.
    pub fn new(samples_per_open: usize) -> Self {
        Self {
            samples_per_open,
            fail_on_open: false,
        }
    }

    /// A source whose device cannot be opened.
    pub fn failing() -> Self {
        Self {
            samples_per_open: 0,
            fail_on_open: true,
        }
    }
}

impl AudioCapture for MockCapture {
    fn open(&self, sink: AudioBuffer) -> Result<CaptureHandle> {
        if self.fail_on_open {
            return Err(MurmurError::Capture(
                "Mock capture device unavailable".to_string(),
            ));
        }
        sink.push(&vec![0.05f32; self.samples_per_open]);
        Ok(CaptureHandle::detached(Arc::new(AtomicBool::new(false))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_buffer_push_and_take() {
        let buffer = AudioBuffer::new(10);
        buffer.push(&[0.1, 0.2, 0.3]);
        assert_eq!(buffer.len(), 3);

        let samples = buffer.take();
        assert_eq!(samples, vec![0.1, 0.2, 0.3]);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_buffer_truncates_at_capacity() {
        let buffer = AudioBuffer::new(5);
        buffer.push(&[0.0; 3]);
        buffer.push(&[1.0; 4]);

        assert_eq!(buffer.len(), 5);
        assert!(buffer.is_full());

        // The earliest samples win; later input past the ceiling is dropped.
        let samples = buffer.take();
        assert_eq!(samples[..3], [0.0, 0.0, 0.0]);
        assert_eq!(samples[3..], [1.0, 1.0]);
    }

    #[test]
    fn test_buffer_push_when_full_is_noop() {
        let buffer = AudioBuffer::new(2);
        buffer.push(&[0.1, 0.2]);
        buffer.push(&[0.9]);
        assert_eq!(buffer.take(), vec![0.1, 0.2]);
    }

    #[test]
    fn test_buffer_clone_shares_storage() {
        let a = AudioBuffer::new(10);
        let b = a.clone();
        a.push(&[0.5]);
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn test_mock_capture_fills_sink() {
        let capture = MockCapture::new(100);
        let buffer = AudioBuffer::new(1000);
        let handle = capture.open(buffer.clone()).unwrap();
        handle.close();
        assert_eq!(buffer.len(), 100);
    }

    #[test]
    fn test_mock_capture_failing() {
        let capture = MockCapture::failing();
        let buffer = AudioBuffer::new(1000);
        assert!(matches!(
            capture.open(buffer),
            Err(MurmurError::Capture(_))
        ));
    }

    #[test]
    fn test_mock_capture_respects_sink_capacity() {
        let capture = MockCapture::new(100);
        let buffer = AudioBuffer::new(10);
        capture.open(buffer.clone()).unwrap().close();
        assert_eq!(buffer.len(), 10);
    }
}
