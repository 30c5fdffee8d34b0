use thiserror::Error;

/// Top-level error type for the Murmur pipeline.
///
/// Each variant maps to one failure class of the dictation lifecycle.
/// Subsystem crates return `MurmurError` directly so the `?` operator works
/// across crate boundaries without conversion boilerplate.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum MurmurError {
    /// The global key hook could not be installed or was lost. Fatal at
    /// startup; the process cannot do push-to-talk without it.
    #[error("Key hook error: {0}")]
    Hook(String),

    /// The capture device could not be opened or failed mid-session.
    /// Per-session; the pipeline returns to Idle.
    #[error("Capture error: {0}")]
    Capture(String),

    /// The transcription capability reported a fault. Reported once, never
    /// retried; a fresh recording is the recovery path.
    #[error("Transcription error: {0}")]
    Transcription(String),

    /// Text could not be delivered to the focused target. Non-fatal; the
    /// transcript stays on the clipboard as a manual-paste fallback.
    #[error("Injection error: {0}")]
    Injection(String),

    /// A new session was rejected because a transcription is in flight.
    #[error("A transcription is already in flight")]
    Busy,

    /// An invalid pipeline state transition was requested.
    #[error("Invalid state transition: {from} -> {to}")]
    State { from: String, to: String },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<toml::de::Error> for MurmurError {
    fn from(e: toml::de::Error) -> Self {
        MurmurError::Config(e.to_string())
    }
}

/// Convenience result alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, MurmurError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let e = MurmurError::Hook("permission denied".to_string());
        assert_eq!(e.to_string(), "Key hook error: permission denied");

        let e = MurmurError::State {
            from: "Idle".to_string(),
            to: "Transcribing".to_string(),
        };
        assert_eq!(e.to_string(), "Invalid state transition: Idle -> Transcribing");
    }

    #[test]
    fn test_error_from_io() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let e: MurmurError = io.into();
        assert!(matches!(e, MurmurError::Io(_)));
    }

    #[test]
    fn test_busy_display() {
        assert_eq!(
            MurmurError::Busy.to_string(),
            "A transcription is already in flight"
        );
    }
}
