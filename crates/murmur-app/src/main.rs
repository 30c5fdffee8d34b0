//! Murmur application binary - composition root.
//!
//! Ties together all Murmur crates into a single executable:
//! 1. Load configuration from TOML (flags > env > file > defaults)
//! 2. Build the pipeline: cpal capture, transcription dispatcher,
//!    desktop text injector
//! 3. Install the global key hook and start the engine loop
//! 4. Fan status out to the log (stand-in for a tray indicator) and
//!    pipeline events out to a stats file
//! 5. Wind down in bounded time on Ctrl-C or hook loss

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tokio::sync::{broadcast, watch};

use murmur_audio::CpalCapture;
use murmur_core::config::MurmurConfig;
use murmur_core::events::EventBus;
use murmur_dictation::{Chord, DesktopInjector, Engine, HotkeyMonitor, StatusBroadcaster};
use murmur_transcribe::{MockReply, MockTranscriber};

mod cli;

use cli::CliArgs;

/// Log every status transition. Stands in for the tray indicator until a
/// UI front-end subscribes here instead.
async fn status_logger(status: StatusBroadcaster) {
    let (snapshot, mut rx) = status.subscribe();
    tracing::info!(state = %snapshot.state, "Pipeline status");
    loop {
        match rx.recv().await {
            Ok(event) => tracing::info!(state = %event.state, "Pipeline status"),
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                tracing::warn!(missed, "Status consumer lagged")
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
}

/// Append one JSON line per pipeline event to the stats file.
///
/// Events carry metadata only (never the transcript body), so the file is
/// safe to keep around for a usage dashboard.
async fn stats_forwarder(events: EventBus, path: PathBuf) {
    let mut rx = events.subscribe();
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(missed)) => {
                tracing::warn!(missed, "Stats consumer lagged");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        let line = match serde_json::to_string(&event) {
            Ok(line) => line,
            Err(e) => {
                tracing::warn!(error = %e, "Failed to serialize pipeline event");
                continue;
            }
        };
        if let Err(e) = append_line(&path, &line) {
            tracing::warn!(path = %path.display(), error = %e, "Failed to write stats line");
        }
    }
}

fn append_line(path: &Path, line: &str) -> std::io::Result<()> {
    use std::io::Write;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    writeln!(file, "{}", line)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = CliArgs::parse();

    // Config before tracing so its log level can seed the filter.
    let config_file = args.resolve_config_path();
    let mut config = MurmurConfig::load_or_default(&config_file);
    if let Some(model) = args.model.clone() {
        config.transcription.model = model;
    }
    if let Some(chord) = args.chord.clone() {
        config.hotkey.chord = chord;
    }

    let log_level = args.resolve_log_level(&config.general.log_level);
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&log_level)),
        )
        .init();

    tracing::info!("Starting Murmur v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        path = %config_file.display(),
        model = %config.transcription.model,
        chord = %config.hotkey.chord,
        "Configuration loaded"
    );

    let chord = Chord::parse(
        &config.hotkey.chord,
        Duration::from_millis(config.hotkey.debounce_ms),
    )?;
    let injector = Arc::new(DesktopInjector::new(&config.injection)?);
    let capture = CpalCapture::new(config.audio.clone());

    // TODO: swap in a whisper.cpp-backed Transcriber; until then every
    // session resolves as no-speech.
    let transcriber = MockTranscriber::new(MockReply::NoSpeech, Duration::ZERO);

    let engine = Engine::new(config, capture, transcriber, injector);

    tokio::spawn(status_logger(engine.status()));

    let stats_path = config_file
        .parent()
        .map(|dir| dir.join("stats.jsonl"))
        .unwrap_or_else(|| PathBuf::from("stats.jsonl"));
    tokio::spawn(stats_forwarder(engine.events(), stats_path));

    // Global key hook; install failure arrives as a HookLost event and
    // makes the engine return an error below.
    let (monitor, edges) = HotkeyMonitor::start(chord)?;
    tracing::info!("Hotkey monitor started, hold the chord to dictate");

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut engine_task = tokio::spawn(engine.run(edges, shutdown_rx));

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Ctrl-C received, shutting down");
            monitor.stop();
            let _ = shutdown_tx.send(true);
            match engine_task.await {
                Ok(Ok(())) => tracing::info!("Pipeline stopped"),
                Ok(Err(e)) => {
                    tracing::error!(error = %e, "Pipeline stopped with error");
                    return Err(e.into());
                }
                Err(e) => {
                    tracing::error!(error = %e, "Engine task panicked");
                    return Err(e.into());
                }
            }
        }
        // The engine only returns on its own when the hook is lost.
        result = &mut engine_task => {
            monitor.stop();
            match result {
                Ok(Ok(())) => tracing::info!("Pipeline stopped"),
                Ok(Err(e)) => {
                    tracing::error!(error = %e, "Pipeline stopped: global key hook unavailable");
                    return Err(e.into());
                }
                Err(e) => {
                    tracing::error!(error = %e, "Engine task panicked");
                    return Err(e.into());
                }
            }
        }
    }

    Ok(())
}
