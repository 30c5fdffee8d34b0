//! Delivery of transcribed text into the focused application.
//!
//! The clipboard method saves the user's clipboard, plants the transcript,
//! sends the platform paste chord, then restores what was saved. If the
//! paste chord itself cannot be delivered, the transcript is deliberately
//! left on the clipboard so the user can paste it by hand.

use std::sync::Mutex;
use std::time::Duration;

use arboard::Clipboard;
use enigo::{Direction, Enigo, Key, Keyboard, Settings};

use murmur_core::config::InjectionConfig;
use murmur_core::error::{MurmurError, Result};

/// Where delivered text goes. The pipeline never formats or edits it.
pub trait TextSink: Send + Sync {
    /// Deliver `text` to the focused application. Blocking.
    fn deliver(&self, text: &str) -> Result<()>;
}

/// How the injector puts text into the focused window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InjectionMethod {
    /// Plant on the clipboard and send the paste chord. Fast, robust with
    /// non-ASCII text.
    Clipboard,
    /// Synthesize each character as a keystroke. No clipboard involvement,
    /// slower, and layout-sensitive.
    Keystrokes,
}

impl InjectionMethod {
    pub fn parse(name: &str) -> Result<Self> {
        match name.trim().to_lowercase().as_str() {
            "clipboard" => Ok(InjectionMethod::Clipboard),
            "keystrokes" => Ok(InjectionMethod::Keystrokes),
            other => Err(MurmurError::Config(format!(
                "Unknown injection method: '{}'",
                other
            ))),
        }
    }
}

/// Injects text into whatever application currently has keyboard focus.
///
/// One injection runs at a time; the clipboard is shared mutable state and
/// two overlapping save/plant/restore sequences would corrupt each other.
pub struct DesktopInjector {
    method: InjectionMethod,
    restore_delay: Duration,
    focus_delay: Duration,
    lock: Mutex<()>,
}

impl DesktopInjector {
    pub fn new(config: &InjectionConfig) -> Result<Self> {
        Ok(Self {
            method: InjectionMethod::parse(&config.method)?,
            restore_delay: Duration::from_millis(config.restore_delay_ms),
            focus_delay: Duration::from_millis(config.focus_delay_ms),
            lock: Mutex::new(()),
        })
    }

    fn open_keyboard(&self) -> Result<Enigo> {
        Enigo::new(&Settings::default())
            .map_err(|e| MurmurError::Injection(format!("Failed to open input backend: {:?}", e)))
    }

    #[cfg(target_os = "macos")]
    const PASTE_MODIFIER: Key = Key::Meta;
    #[cfg(not(target_os = "macos"))]
    const PASTE_MODIFIER: Key = Key::Control;

    fn send_paste_chord(&self) -> Result<()> {
        let mut enigo = self.open_keyboard()?;
        enigo
            .key(Self::PASTE_MODIFIER, Direction::Press)
            .and_then(|_| enigo.key(Key::Unicode('v'), Direction::Click))
            .and_then(|_| enigo.key(Self::PASTE_MODIFIER, Direction::Release))
            .map_err(|e| MurmurError::Injection(format!("Failed to send paste chord: {:?}", e)))
    }

    fn deliver_via_clipboard(&self, text: &str) -> Result<()> {
        let mut clipboard = Clipboard::new()
            .map_err(|e| MurmurError::Injection(format!("Failed to open clipboard: {:?}", e)))?;

        // Non-text or empty clipboard reads back as None and simply is not
        // restored afterwards.
        let saved = clipboard.get_text().ok();

        clipboard
            .set_text(text.to_string())
            .map_err(|e| MurmurError::Injection(format!("Failed to set clipboard: {:?}", e)))?;

        // Give the focused window a beat to settle after the chord release
        // before keystrokes arrive.
        std::thread::sleep(self.focus_delay);

        if let Err(e) = self.send_paste_chord() {
            // Leave the transcript on the clipboard as a manual fallback.
            tracing::warn!(error = %e, "Paste failed, transcript left on clipboard");
            return Err(e);
        }

        // The paste is asynchronous from the target's point of view;
        // restoring too early would paste the old clipboard instead.
        std::thread::sleep(self.restore_delay);
        if let Some(saved) = saved {
            if let Err(e) = clipboard.set_text(saved) {
                tracing::warn!(error = %e, "Failed to restore previous clipboard");
            }
        }

        Ok(())
    }

    fn deliver_via_keystrokes(&self, text: &str) -> Result<()> {
        let mut enigo = self.open_keyboard()?;
        std::thread::sleep(self.focus_delay);
        enigo
            .text(text)
            .map_err(|e| MurmurError::Injection(format!("Failed to type text: {:?}", e)))
    }
}

impl TextSink for DesktopInjector {
    fn deliver(&self, text: &str) -> Result<()> {
        if text.is_empty() {
            return Ok(());
        }
        let _guard = self.lock.lock().expect("injection mutex poisoned");
        tracing::debug!(
            chars = text.chars().count(),
            method = ?self.method,
            "Injecting text"
        );
        match self.method {
            InjectionMethod::Clipboard => self.deliver_via_clipboard(text),
            InjectionMethod::Keystrokes => self.deliver_via_keystrokes(text),
        }
    }
}

/// Records deliveries instead of touching the desktop. Test double.
#[derive(Debug, Clone, Default)]
pub struct MockSink {
    delivered: std::sync::Arc<Mutex<Vec<String>>>,
    fail: bool,
}

impl MockSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            delivered: Default::default(),
            fail: true,
        }
    }

    pub fn delivered(&self) -> Vec<String> {
        self.delivered.lock().expect("mock mutex poisoned").clone()
    }
}

impl TextSink for MockSink {
    fn deliver(&self, text: &str) -> Result<()> {
        if self.fail {
            return Err(MurmurError::Injection(
                "Simulated injection failure".to_string(),
            ));
        }
        self.delivered
            .lock()
            .expect("mock mutex poisoned")
            .push(text.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_parse() {
        assert_eq!(
            InjectionMethod::parse("clipboard").unwrap(),
            InjectionMethod::Clipboard
        );
        assert_eq!(
            InjectionMethod::parse("Keystrokes").unwrap(),
            InjectionMethod::Keystrokes
        );
        assert!(InjectionMethod::parse("telepathy").is_err());
    }

    #[test]
    fn test_injector_rejects_unknown_method() {
        let config = InjectionConfig {
            method: "telepathy".to_string(),
            ..InjectionConfig::default()
        };
        assert!(DesktopInjector::new(&config).is_err());
    }

    #[test]
    fn test_mock_sink_records_deliveries() {
        let sink = MockSink::new();
        sink.deliver("hello").unwrap();
        sink.deliver("world").unwrap();
        assert_eq!(sink.delivered(), vec!["hello", "world"]);
    }

    #[test]
    fn test_mock_sink_failure() {
        let sink = MockSink::failing();
        assert!(sink.deliver("hello").is_err());
        assert!(sink.delivered().is_empty());
    }
}
