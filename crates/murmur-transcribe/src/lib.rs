//! Murmur Transcribe crate - the opaque transcription capability and the
//! single-flight dispatcher in front of it.
//!
//! The acoustic model is deliberately behind a narrow trait: samples in,
//! text or a no-speech marker out. Everything about model loading and
//! inference lives on the other side of [`Transcriber`].

use std::future::Future;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use murmur_core::error::{MurmurError, Result};

pub mod dispatcher;

pub use dispatcher::{Dispatcher, Submission};

/// One transcription request.
///
/// Carries the per-session settings snapshot (model, language) so a config
/// edit mid-flight cannot change an already-submitted call.
#[derive(Debug)]
pub struct TranscribeRequest {
    /// Mono f32 PCM samples in [-1.0, 1.0].
    pub samples: Vec<f32>,
    /// Sample rate of `samples` in Hz.
    pub sample_rate: u32,
    /// Model identifier chosen at session start.
    pub model: String,
    /// Language code, or "auto".
    pub language: String,
}

/// What the capability reported for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transcript {
    /// Recognized speech.
    Text(String),
    /// The engine found no intelligible content. Not an error.
    NoSpeech,
}

/// Terminal outcome of a dispatched transcription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Ok,
    NoSpeech,
    Failed(String),
}

/// The dispatcher's answer for one session.
#[derive(Debug, Clone)]
pub struct TranscriptionResult {
    pub session_id: uuid::Uuid,
    /// Transcribed text; empty unless `outcome` is `Ok`.
    pub text: String,
    pub outcome: Outcome,
}

/// The transcription capability.
///
/// Implementations may take seconds per call; the dispatcher runs them on
/// a worker task so the hotkey path never waits on them. The request is
/// consumed, so the audio samples are freed as soon as the call returns.
pub trait Transcriber: Send + Sync + 'static {
    fn transcribe(
        &self,
        request: TranscribeRequest,
    ) -> impl Future<Output = Result<Transcript>> + Send;
}

/// Scripted behavior for [`MockTranscriber`].
#[derive(Debug, Clone)]
pub enum MockReply {
    Text(String),
    NoSpeech,
    Fail(String),
}

/// Mock transcription capability for tests and engine-less development.
///
/// Returns a scripted reply after an optional delay and records what it
/// was asked, so tests can assert call counts and the settings snapshot
/// that travelled with the request.
#[derive(Debug, Clone)]
pub struct MockTranscriber {
    reply: MockReply,
    delay: Duration,
    calls: Arc<AtomicUsize>,
    last_model: Arc<Mutex<Option<String>>>,
}

impl MockTranscriber {
    pub fn replying(text: &str) -> Self {
        Self::new(MockReply::Text(text.to_string()), Duration::ZERO)
    }

    pub fn new(reply: MockReply, delay: Duration) -> Self {
        Self {
            reply,
            delay,
            calls: Arc::new(AtomicUsize::new(0)),
            last_model: Arc::new(Mutex::new(None)),
        }
    }

    /// Number of transcription calls made so far.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Model identifier from the most recent request.
    pub fn last_model(&self) -> Option<String> {
        self.last_model.lock().expect("mock mutex poisoned").clone()
    }
}

impl Transcriber for MockTranscriber {
    async fn transcribe(&self, request: TranscribeRequest) -> Result<Transcript> {
        if request.samples.is_empty() {
            return Err(MurmurError::Transcription(
                "Cannot transcribe empty audio".to_string(),
            ));
        }

        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_model.lock().expect("mock mutex poisoned") = Some(request.model.clone());

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        match &self.reply {
            MockReply::Text(text) => Ok(Transcript::Text(text.clone())),
            MockReply::NoSpeech => Ok(Transcript::NoSpeech),
            MockReply::Fail(reason) => Err(MurmurError::Transcription(reason.clone())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> TranscribeRequest {
        TranscribeRequest {
            samples: vec![0.1; 16_000],
            sample_rate: 16_000,
            model: "base".to_string(),
            language: "en".to_string(),
        }
    }

    #[tokio::test]
    async fn test_mock_returns_text() {
        let mock = MockTranscriber::replying("hello world");
        let transcript = mock.transcribe(request()).await.unwrap();
        assert_eq!(transcript, Transcript::Text("hello world".to_string()));
        assert_eq!(mock.calls(), 1);
    }

    #[tokio::test]
    async fn test_mock_records_model() {
        let mock = MockTranscriber::replying("x");
        let mut req = request();
        req.model = "medium".to_string();
        mock.transcribe(req).await.unwrap();
        assert_eq!(mock.last_model().as_deref(), Some("medium"));
    }

    #[tokio::test]
    async fn test_mock_no_speech() {
        let mock = MockTranscriber::new(MockReply::NoSpeech, Duration::ZERO);
        assert_eq!(
            mock.transcribe(request()).await.unwrap(),
            Transcript::NoSpeech
        );
    }

    #[tokio::test]
    async fn test_mock_failure() {
        let mock = MockTranscriber::new(MockReply::Fail("model crashed".to_string()), Duration::ZERO);
        let err = mock.transcribe(request()).await.unwrap_err();
        assert!(matches!(err, MurmurError::Transcription(_)));
    }

    #[tokio::test]
    async fn test_mock_rejects_empty_audio() {
        let mock = MockTranscriber::replying("x");
        let req = TranscribeRequest {
            samples: vec![],
            sample_rate: 16_000,
            model: "base".to_string(),
            language: "en".to_string(),
        };
        assert!(mock.transcribe(req).await.is_err());
        assert_eq!(mock.calls(), 0);
    }
}
