use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{MurmurError, Result};

/// Top-level configuration for the Murmur application.
///
/// Loaded from `~/.murmur/config.toml` by default. Each section corresponds
/// to one pipeline component or cross-cutting concern.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MurmurConfig {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub hotkey: HotkeyConfig,
    #[serde(default)]
    pub audio: AudioConfig,
    #[serde(default)]
    pub transcription: TranscriptionConfig,
    #[serde(default)]
    pub injection: InjectionConfig,
    #[serde(default)]
    pub feedback: FeedbackConfig,
}

impl MurmurConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: MurmurConfig = toml::from_str(&content)?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| MurmurError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Snapshot the per-session settings.
    ///
    /// The pipeline reads settings exactly once, when a session starts;
    /// config changes never take effect mid-recording.
    pub fn session_settings(&self) -> SessionSettings {
        SessionSettings {
            model: self.transcription.model.clone(),
            language: self.transcription.language.clone(),
            indicator_enabled: self.feedback.indicator_enabled,
            sound_effects_enabled: self.feedback.sound_effects_enabled,
        }
    }
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    /// Log level: trace, debug, info, warn, error.
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
        }
    }
}

/// Push-to-talk hotkey configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HotkeyConfig {
    /// Key chord that must be held to record, e.g. "ctrl+win".
    pub chord: String,
    /// Window for collapsing key-repeat and bounce events, in milliseconds.
    pub debounce_ms: u64,
}

impl Default for HotkeyConfig {
    fn default() -> Self {
        Self {
            chord: "ctrl+win".to_string(),
            debounce_ms: 50,
        }
    }
}

/// Audio capture configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Capture sample rate in Hz. Whisper-family models want 16000.
    pub sample_rate: u32,
    /// Number of channels captured (downmixed to mono regardless).
    pub channels: u16,
    /// Recordings shorter than this are treated as accidental taps and
    /// discarded without transcription.
    pub min_duration_ms: u64,
    /// Hard ceiling on recording length; reaching it finalizes the session
    /// even while the chord is still held.
    pub max_duration_secs: u64,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            sample_rate: 16_000,
            channels: 1,
            min_duration_ms: 500,
            max_duration_secs: 120,
        }
    }
}

/// Transcription capability configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TranscriptionConfig {
    /// Model identifier handed to the transcription capability
    /// (e.g. "tiny", "base", "small", "medium").
    pub model: String,
    /// Transcription language code, or "auto".
    pub language: String,
    /// Ceiling on a single transcription call, in seconds.
    pub timeout_secs: u64,
}

impl Default for TranscriptionConfig {
    fn default() -> Self {
        Self {
            model: "base".to_string(),
            language: "en".to_string(),
            timeout_secs: 60,
        }
    }
}

/// Text injection configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InjectionConfig {
    /// Delivery method: "clipboard" (set + paste + restore) or
    /// "keystrokes" (direct synthetic typing).
    pub method: String,
    /// Delay before restoring the prior clipboard contents after a paste,
    /// in milliseconds.
    pub restore_delay_ms: u64,
    /// Delay before delivery, letting the target window settle focus.
    pub focus_delay_ms: u64,
}

impl Default for InjectionConfig {
    fn default() -> Self {
        Self {
            method: "clipboard".to_string(),
            restore_delay_ms: 300,
            focus_delay_ms: 100,
        }
    }
}

/// Feedback toggles consumed by external status collaborators.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedbackConfig {
    /// Whether the floating recording indicator should be shown.
    pub indicator_enabled: bool,
    /// Whether start/stop sound effects should be played.
    pub sound_effects_enabled: bool,
}

impl Default for FeedbackConfig {
    fn default() -> Self {
        Self {
            indicator_enabled: true,
            sound_effects_enabled: true,
        }
    }
}

/// Settings snapshot taken once at session start.
///
/// Carried with the session so that mid-recording config edits cannot
/// change the model, language, or feedback behavior of a session already
/// in progress.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSettings {
    pub model: String,
    pub language: String,
    pub indicator_enabled: bool,
    pub sound_effects_enabled: bool,
}

impl Default for SessionSettings {
    fn default() -> Self {
        MurmurConfig::default().session_settings()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = MurmurConfig::default();
        assert_eq!(config.hotkey.chord, "ctrl+win");
        assert_eq!(config.audio.sample_rate, 16_000);
        assert_eq!(config.audio.min_duration_ms, 500);
        assert_eq!(config.audio.max_duration_secs, 120);
        assert_eq!(config.transcription.model, "base");
        assert_eq!(config.injection.method, "clipboard");
        assert!(config.feedback.indicator_enabled);
    }

    #[test]
    fn test_load_missing_file_falls_back() {
        let config = MurmurConfig::load_or_default(Path::new("/nonexistent/config.toml"));
        assert_eq!(config.transcription.model, "base");
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");

        let mut config = MurmurConfig::default();
        config.transcription.model = "small".to_string();
        config.hotkey.chord = "ctrl+alt".to_string();
        config.save(&path).unwrap();

        let loaded = MurmurConfig::load(&path).unwrap();
        assert_eq!(loaded.transcription.model, "small");
        assert_eq!(loaded.hotkey.chord, "ctrl+alt");
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[transcription]\nmodel = \"medium\"\n").unwrap();

        let config = MurmurConfig::load(&path).unwrap();
        assert_eq!(config.transcription.model, "medium");
        // Untouched sections keep their defaults.
        assert_eq!(config.audio.sample_rate, 16_000);
        assert_eq!(config.hotkey.chord, "ctrl+win");
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "not valid toml [[[").unwrap();

        let result = MurmurConfig::load(&path);
        assert!(matches!(result, Err(MurmurError::Config(_))));
    }

    #[test]
    fn test_session_settings_snapshot() {
        let mut config = MurmurConfig::default();
        config.transcription.model = "tiny".to_string();
        config.feedback.sound_effects_enabled = false;

        let settings = config.session_settings();
        assert_eq!(settings.model, "tiny");
        assert!(!settings.sound_effects_enabled);

        // Later config edits do not affect an existing snapshot.
        config.transcription.model = "medium".to_string();
        assert_eq!(settings.model, "tiny");
    }
}
