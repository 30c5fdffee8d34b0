//! Push-to-talk chord detection from raw system-wide key events.
//!
//! The OS hook (rdev) runs as a blocking loop on its own thread and only
//! ever translates raw events into edge events on a channel; the pipeline
//! engine consumes that channel. The hook callback never calls back into
//! pipeline state, so a state change triggered by an edge can never
//! re-enter the hook.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};

use tokio::sync::mpsc;

use murmur_core::error::{MurmurError, Result};

/// A logical key that can participate in a chord.
///
/// Left/right modifier variants collapse into one logical key: a user who
/// configures "ctrl" means either Ctrl.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChordKey {
    Control,
    Meta,
    Alt,
    Shift,
    Space,
    Function(u8),
    Character(char),
}

impl ChordKey {
    /// Parse one chord token, e.g. "ctrl", "win", "f9", "d".
    pub fn parse(token: &str) -> Result<Self> {
        let token = token.trim().to_lowercase();
        match token.as_str() {
            "ctrl" | "control" => Ok(ChordKey::Control),
            "win" | "meta" | "super" | "cmd" => Ok(ChordKey::Meta),
            "alt" => Ok(ChordKey::Alt),
            "shift" => Ok(ChordKey::Shift),
            "space" => Ok(ChordKey::Space),
            _ => {
                if let Some(n) = token.strip_prefix('f').and_then(|n| n.parse::<u8>().ok()) {
                    if (1..=24).contains(&n) {
                        return Ok(ChordKey::Function(n));
                    }
                }
                let mut chars = token.chars();
                match (chars.next(), chars.next()) {
                    (Some(c), None) if c.is_ascii_alphanumeric() => Ok(ChordKey::Character(c)),
                    _ => Err(MurmurError::Config(format!(
                        "Unknown chord key: '{}'",
                        token
                    ))),
                }
            }
        }
    }

    /// Map a raw rdev key to its logical chord key, if it can be part of
    /// a chord.
    pub fn from_rdev(key: rdev::Key) -> Option<Self> {
        use rdev::Key;
        match key {
            Key::ControlLeft | Key::ControlRight => Some(ChordKey::Control),
            Key::MetaLeft | Key::MetaRight => Some(ChordKey::Meta),
            Key::Alt | Key::AltGr => Some(ChordKey::Alt),
            Key::ShiftLeft | Key::ShiftRight => Some(ChordKey::Shift),
            Key::Space => Some(ChordKey::Space),
            Key::F1 => Some(ChordKey::Function(1)),
            Key::F2 => Some(ChordKey::Function(2)),
            Key::F3 => Some(ChordKey::Function(3)),
            Key::F4 => Some(ChordKey::Function(4)),
            Key::F5 => Some(ChordKey::Function(5)),
            Key::F6 => Some(ChordKey::Function(6)),
            Key::F7 => Some(ChordKey::Function(7)),
            Key::F8 => Some(ChordKey::Function(8)),
            Key::F9 => Some(ChordKey::Function(9)),
            Key::F10 => Some(ChordKey::Function(10)),
            Key::F11 => Some(ChordKey::Function(11)),
            Key::F12 => Some(ChordKey::Function(12)),
            Key::KeyA => Some(ChordKey::Character('a')),
            Key::KeyB => Some(ChordKey::Character('b')),
            Key::KeyC => Some(ChordKey::Character('c')),
            Key::KeyD => Some(ChordKey::Character('d')),
            Key::KeyE => Some(ChordKey::Character('e')),
            Key::KeyF => Some(ChordKey::Character('f')),
            Key::KeyG => Some(ChordKey::Character('g')),
            Key::KeyH => Some(ChordKey::Character('h')),
            Key::KeyI => Some(ChordKey::Character('i')),
            Key::KeyJ => Some(ChordKey::Character('j')),
            Key::KeyK => Some(ChordKey::Character('k')),
            Key::KeyL => Some(ChordKey::Character('l')),
            Key::KeyM => Some(ChordKey::Character('m')),
            Key::KeyN => Some(ChordKey::Character('n')),
            Key::KeyO => Some(ChordKey::Character('o')),
            Key::KeyP => Some(ChordKey::Character('p')),
            Key::KeyQ => Some(ChordKey::Character('q')),
            Key::KeyR => Some(ChordKey::Character('r')),
            Key::KeyS => Some(ChordKey::Character('s')),
            Key::KeyT => Some(ChordKey::Character('t')),
            Key::KeyU => Some(ChordKey::Character('u')),
            Key::KeyV => Some(ChordKey::Character('v')),
            Key::KeyW => Some(ChordKey::Character('w')),
            Key::KeyX => Some(ChordKey::Character('x')),
            Key::KeyY => Some(ChordKey::Character('y')),
            Key::KeyZ => Some(ChordKey::Character('z')),
            _ => None,
        }
    }
}

/// The key set that must be simultaneously held to record.
#[derive(Debug, Clone)]
pub struct Chord {
    keys: HashSet<ChordKey>,
    debounce: Duration,
}

impl Chord {
    /// Parse a chord spec like "ctrl+win" or "f9".
    pub fn parse(spec: &str, debounce: Duration) -> Result<Self> {
        let keys = spec
            .split('+')
            .filter(|t| !t.trim().is_empty())
            .map(ChordKey::parse)
            .collect::<Result<HashSet<_>>>()?;
        if keys.is_empty() {
            return Err(MurmurError::Config("Chord has no keys".to_string()));
        }
        Ok(Self { keys, debounce })
    }

    pub fn keys(&self) -> &HashSet<ChordKey> {
        &self.keys
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }
}

/// Edge-triggered chord transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    /// All required keys went down: start recording.
    Engage,
    /// The first required key came up: stop recording.
    Disengage,
}

/// Pure edge detector over a stream of raw key events.
///
/// - A Down for a key already held is an OS key-repeat and is ignored, so
///   holding the chord never re-fires Engage.
/// - Engage fires exactly once per transition to "all required keys down";
///   Disengage fires exactly once, on the first required key release —
///   deliberately not waiting for the rest, since users stagger releases.
/// - A chord completing again within the debounce window of its own
///   disengage is switch bounce and does not start a new session.
#[derive(Debug)]
pub struct ChordTracker {
    chord: Chord,
    down: HashSet<ChordKey>,
    engaged: bool,
    last_disengage: Option<Instant>,
}

impl ChordTracker {
    pub fn new(chord: Chord) -> Self {
        Self {
            chord,
            down: HashSet::new(),
            engaged: false,
            last_disengage: None,
        }
    }

    pub fn is_engaged(&self) -> bool {
        self.engaged
    }

    /// Feed a key-down event. Returns an edge if one fired.
    pub fn key_down(&mut self, key: ChordKey, at: Instant) -> Option<Edge> {
        if !self.down.insert(key) {
            // Key-repeat: the key is still down, nothing changed.
            return None;
        }
        if self.engaged || !self.chord.keys.is_subset(&self.down) {
            return None;
        }
        if let Some(last) = self.last_disengage {
            if at.duration_since(last) < self.chord.debounce {
                return None;
            }
        }
        self.engaged = true;
        Some(Edge::Engage)
    }

    /// Feed a key-up event. Returns an edge if one fired.
    pub fn key_up(&mut self, key: ChordKey, at: Instant) -> Option<Edge> {
        self.down.remove(&key);
        if self.engaged && self.chord.keys.contains(&key) {
            self.engaged = false;
            self.last_disengage = Some(at);
            return Some(Edge::Disengage);
        }
        None
    }

    /// Forget all held keys, emitting a synthetic Disengage if engaged.
    ///
    /// Used when the hook is lost or the system suspends, so a session can
    /// never be stuck recording on keys the hook will never see released.
    pub fn reset(&mut self) -> Option<Edge> {
        self.down.clear();
        if self.engaged {
            self.engaged = false;
            self.last_disengage = Some(Instant::now());
            return Some(Edge::Disengage);
        }
        None
    }
}

/// Divergence between consecutive events' clocks that means the machine
/// slept in between.
const SUSPEND_GAP: Duration = Duration::from_secs(2);

/// Detects system sleep/suspend between consecutive hook events.
///
/// The monotonic clock stops across a suspend while the wall clock keeps
/// running, so a wall-clock delta far ahead of the monotonic delta between
/// two events means the machine slept. Held keys never survive a suspend;
/// their release events were swallowed, so the tracker must be reset.
#[derive(Debug, Default)]
struct SuspendDetector {
    last: Option<(SystemTime, Instant)>,
}

impl SuspendDetector {
    fn new() -> Self {
        Self::default()
    }

    fn observe(&mut self) -> bool {
        self.observe_at(SystemTime::now(), Instant::now())
    }

    /// Record one event's clocks; returns true if a suspend happened since
    /// the previous event.
    fn observe_at(&mut self, wall: SystemTime, mono: Instant) -> bool {
        let slept = match self.last {
            Some((last_wall, last_mono)) => {
                let wall_delta = wall.duration_since(last_wall).unwrap_or(Duration::ZERO);
                let mono_delta = mono.duration_since(last_mono);
                wall_delta.saturating_sub(mono_delta) > SUSPEND_GAP
            }
            None => false,
        };
        self.last = Some((wall, mono));
        slept
    }
}

/// Events delivered by the monitor to the pipeline engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorEvent {
    Edge(Edge),
    /// The OS hook could not be installed or stopped delivering events.
    /// Arriving before any edge, this is the fatal startup condition.
    HookLost(String),
}

/// Owns the OS key-hook thread and the edge channel.
pub struct HotkeyMonitor {
    stop: Arc<AtomicBool>,
}

impl HotkeyMonitor {
    /// Install the global hook and start producing edges.
    ///
    /// The hook loop runs on a dedicated thread; install failures surface
    /// as a `HookLost` event on the returned channel.
    pub fn start(chord: Chord) -> Result<(Self, mpsc::UnboundedReceiver<MonitorEvent>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let stop = Arc::new(AtomicBool::new(false));
        let stop_cb = Arc::clone(&stop);
        let tx_err = tx.clone();

        std::thread::Builder::new()
            .name("murmur-hotkey".to_string())
            .spawn(move || {
                let tracker = Arc::new(Mutex::new(ChordTracker::new(chord)));
                let tracker_cb = Arc::clone(&tracker);
                let mut detector = SuspendDetector::new();

                let callback = move |event: rdev::Event| {
                    if stop_cb.load(Ordering::SeqCst) {
                        return;
                    }
                    let Ok(mut tracker) = tracker_cb.lock() else {
                        return;
                    };

                    // Any event arriving after a suspend gap means held
                    // keys are gone and their releases were swallowed.
                    if detector.observe() {
                        if let Some(edge) = tracker.reset() {
                            tracing::warn!("System suspend detected, releasing the chord");
                            let _ = tx.send(MonitorEvent::Edge(edge));
                        }
                    }

                    let edge = match event.event_type {
                        rdev::EventType::KeyPress(key) => ChordKey::from_rdev(key)
                            .and_then(|k| tracker.key_down(k, Instant::now())),
                        rdev::EventType::KeyRelease(key) => ChordKey::from_rdev(key)
                            .and_then(|k| tracker.key_up(k, Instant::now())),
                        _ => None,
                    };
                    if let Some(edge) = edge {
                        let _ = tx.send(MonitorEvent::Edge(edge));
                    }
                };

                // Blocks for the lifetime of the hook. Returning at all
                // means the hook is gone.
                let reason = match rdev::listen(callback) {
                    Ok(()) => "Key hook terminated".to_string(),
                    Err(e) => format!("Failed to run key hook: {:?}", e),
                };

                // A dead hook will never see the chord released; disengage
                // synthetically before reporting the loss.
                if let Ok(mut tracker) = tracker.lock() {
                    if let Some(edge) = tracker.reset() {
                        let _ = tx_err.send(MonitorEvent::Edge(edge));
                    }
                }
                let _ = tx_err.send(MonitorEvent::HookLost(reason));
            })
            .map_err(|e| MurmurError::Hook(format!("Failed to spawn hook thread: {}", e)))?;

        Ok((Self { stop }, rx))
    }

    /// Make the hook callback inert. The OS hook itself cannot be
    /// uninstalled portably; the thread stays parked in `listen`.
    pub fn stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ctrl_win(debounce_ms: u64) -> Chord {
        Chord::parse("ctrl+win", Duration::from_millis(debounce_ms)).unwrap()
    }

    fn at(base: Instant, ms: u64) -> Instant {
        base + Duration::from_millis(ms)
    }

    #[test]
    fn test_chord_parse() {
        let chord = ctrl_win(50);
        assert_eq!(chord.keys().len(), 2);
        assert!(chord.keys().contains(&ChordKey::Control));
        assert!(chord.keys().contains(&ChordKey::Meta));
    }

    #[test]
    fn test_chord_parse_aliases() {
        assert_eq!(ChordKey::parse("super").unwrap(), ChordKey::Meta);
        assert_eq!(ChordKey::parse("cmd").unwrap(), ChordKey::Meta);
        assert_eq!(ChordKey::parse("control").unwrap(), ChordKey::Control);
        assert_eq!(ChordKey::parse("f9").unwrap(), ChordKey::Function(9));
        assert_eq!(ChordKey::parse("d").unwrap(), ChordKey::Character('d'));
    }

    #[test]
    fn test_chord_parse_rejects_garbage() {
        assert!(ChordKey::parse("hyper").is_err());
        assert!(Chord::parse("", Duration::ZERO).is_err());
        assert!(Chord::parse("ctrl+wat", Duration::ZERO).is_err());
    }

    #[test]
    fn test_engage_fires_once_when_chord_completes() {
        let base = Instant::now();
        let mut tracker = ChordTracker::new(ctrl_win(50));

        assert_eq!(tracker.key_down(ChordKey::Control, at(base, 0)), None);
        assert_eq!(
            tracker.key_down(ChordKey::Meta, at(base, 10)),
            Some(Edge::Engage)
        );
        assert!(tracker.is_engaged());
    }

    #[test]
    fn test_key_order_is_irrelevant() {
        let base = Instant::now();
        let mut tracker = ChordTracker::new(ctrl_win(50));
        assert_eq!(tracker.key_down(ChordKey::Meta, at(base, 0)), None);
        assert_eq!(
            tracker.key_down(ChordKey::Control, at(base, 5)),
            Some(Edge::Engage)
        );
    }

    #[test]
    fn test_key_repeat_never_refires_engage() {
        let base = Instant::now();
        let mut tracker = ChordTracker::new(ctrl_win(50));
        tracker.key_down(ChordKey::Control, at(base, 0));
        tracker.key_down(ChordKey::Meta, at(base, 10));

        // OS key-repeat delivers a stream of Downs while held.
        for ms in (100..1000).step_by(30) {
            assert_eq!(tracker.key_down(ChordKey::Control, at(base, ms)), None);
            assert_eq!(tracker.key_down(ChordKey::Meta, at(base, ms + 1)), None);
        }
        assert!(tracker.is_engaged());
    }

    #[test]
    fn test_first_release_disengages() {
        let base = Instant::now();
        let mut tracker = ChordTracker::new(ctrl_win(50));
        tracker.key_down(ChordKey::Control, at(base, 0));
        tracker.key_down(ChordKey::Meta, at(base, 10));

        // Releasing any one required key disengages immediately.
        assert_eq!(
            tracker.key_up(ChordKey::Meta, at(base, 500)),
            Some(Edge::Disengage)
        );
        // The staggered second release produces nothing further.
        assert_eq!(tracker.key_up(ChordKey::Control, at(base, 530)), None);
        assert!(!tracker.is_engaged());
    }

    #[test]
    fn test_exactly_one_disengage() {
        let base = Instant::now();
        let mut tracker = ChordTracker::new(ctrl_win(50));
        tracker.key_down(ChordKey::Control, at(base, 0));
        tracker.key_down(ChordKey::Meta, at(base, 10));

        assert_eq!(
            tracker.key_up(ChordKey::Control, at(base, 100)),
            Some(Edge::Disengage)
        );
        // A duplicate release of the same key cannot fire again.
        assert_eq!(tracker.key_up(ChordKey::Control, at(base, 110)), None);
    }

    #[test]
    fn test_unrelated_keys_do_not_trigger_edges() {
        let base = Instant::now();
        let mut tracker = ChordTracker::new(ctrl_win(50));
        tracker.key_down(ChordKey::Control, at(base, 0));
        assert_eq!(tracker.key_down(ChordKey::Character('x'), at(base, 5)), None);
        tracker.key_down(ChordKey::Meta, at(base, 10));
        assert_eq!(tracker.key_up(ChordKey::Character('x'), at(base, 20)), None);
        assert!(tracker.is_engaged());
    }

    #[test]
    fn test_bounce_within_debounce_window_is_suppressed() {
        let base = Instant::now();
        let mut tracker = ChordTracker::new(ctrl_win(50));
        tracker.key_down(ChordKey::Control, at(base, 0));
        tracker.key_down(ChordKey::Meta, at(base, 10));
        tracker.key_up(ChordKey::Meta, at(base, 100));

        // Chatter: the key re-closes 5ms after releasing.
        assert_eq!(tracker.key_down(ChordKey::Meta, at(base, 105)), None);
        assert!(!tracker.is_engaged());
    }

    #[test]
    fn test_reengage_after_debounce_window() {
        let base = Instant::now();
        let mut tracker = ChordTracker::new(ctrl_win(50));
        tracker.key_down(ChordKey::Control, at(base, 0));
        tracker.key_down(ChordKey::Meta, at(base, 10));
        tracker.key_up(ChordKey::Meta, at(base, 100));

        assert_eq!(
            tracker.key_down(ChordKey::Meta, at(base, 200)),
            Some(Edge::Engage)
        );
    }

    #[test]
    fn test_reset_emits_synthetic_disengage_when_engaged() {
        let base = Instant::now();
        let mut tracker = ChordTracker::new(ctrl_win(50));
        tracker.key_down(ChordKey::Control, at(base, 0));
        tracker.key_down(ChordKey::Meta, at(base, 10));

        assert_eq!(tracker.reset(), Some(Edge::Disengage));
        assert!(!tracker.is_engaged());
    }

    #[test]
    fn test_reset_when_idle_is_silent() {
        let mut tracker = ChordTracker::new(ctrl_win(50));
        assert_eq!(tracker.reset(), None);
    }

    #[test]
    fn test_partial_chord_never_engages() {
        let base = Instant::now();
        let mut tracker = ChordTracker::new(ctrl_win(50));
        assert_eq!(tracker.key_down(ChordKey::Control, at(base, 0)), None);
        assert_eq!(tracker.key_up(ChordKey::Control, at(base, 100)), None);
        assert!(!tracker.is_engaged());
    }

    #[test]
    fn test_suspend_detector_flags_wall_clock_jump() {
        let mut detector = SuspendDetector::new();
        let wall = SystemTime::now();
        let mono = Instant::now();
        assert!(!detector.observe_at(wall, mono));

        // 60s of wall time but only 1s of monotonic time: the machine
        // slept for the difference.
        assert!(detector.observe_at(
            wall + Duration::from_secs(60),
            mono + Duration::from_secs(1)
        ));
    }

    #[test]
    fn test_suspend_detector_quiet_idle_is_not_suspend() {
        let mut detector = SuspendDetector::new();
        let wall = SystemTime::now();
        let mono = Instant::now();
        detector.observe_at(wall, mono);

        // A long gap with both clocks agreeing is just an idle user.
        assert!(!detector.observe_at(
            wall + Duration::from_secs(600),
            mono + Duration::from_secs(600)
        ));
    }

    #[test]
    fn test_suspend_detector_resets_baseline_after_wake() {
        let mut detector = SuspendDetector::new();
        let wall = SystemTime::now();
        let mono = Instant::now();
        detector.observe_at(wall, mono);
        assert!(detector.observe_at(
            wall + Duration::from_secs(120),
            mono + Duration::from_secs(1)
        ));

        // Events after the wake measure against the wake, not the sleep.
        assert!(!detector.observe_at(
            wall + Duration::from_secs(121),
            mono + Duration::from_secs(2)
        ));
    }

    #[test]
    fn test_tracker_does_not_stay_engaged_across_suspend() {
        let base = Instant::now();
        let mut tracker = ChordTracker::new(ctrl_win(50));
        tracker.key_down(ChordKey::Control, at(base, 0));
        tracker.key_down(ChordKey::Meta, at(base, 10));
        assert!(tracker.is_engaged());

        // Suspend while engaged: the releases were swallowed, the reset
        // stands in for them with one synthetic Disengage.
        assert_eq!(tracker.reset(), Some(Edge::Disengage));
        assert!(!tracker.is_engaged());

        // The stale physical releases arriving after resume are inert.
        assert_eq!(tracker.key_up(ChordKey::Control, at(base, 5_000)), None);
        assert_eq!(tracker.key_up(ChordKey::Meta, at(base, 5_010)), None);

        // A fresh chord press starts a new session normally.
        assert_eq!(tracker.key_down(ChordKey::Control, at(base, 10_000)), None);
        assert_eq!(
            tracker.key_down(ChordKey::Meta, at(base, 10_010)),
            Some(Edge::Engage)
        );
    }

    #[test]
    fn test_from_rdev_collapses_modifier_sides() {
        assert_eq!(
            ChordKey::from_rdev(rdev::Key::ControlLeft),
            Some(ChordKey::Control)
        );
        assert_eq!(
            ChordKey::from_rdev(rdev::Key::ControlRight),
            Some(ChordKey::Control)
        );
        assert_eq!(
            ChordKey::from_rdev(rdev::Key::MetaLeft),
            Some(ChordKey::Meta)
        );
        assert_eq!(ChordKey::from_rdev(rdev::Key::Escape), None);
    }
}
