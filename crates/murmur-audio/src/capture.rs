//! Microphone capture via cpal.
//!
//! The stream lives on a dedicated thread because `cpal::Stream` is not
//! `Send` on every backend. The callback downmixes to mono, resamples to
//! the configured rate, and appends into the session's [`AudioBuffer`];
//! it never blocks on anything downstream.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};

use murmur_core::config::AudioConfig;
use murmur_core::error::{MurmurError, Result};

use crate::{AudioBuffer, AudioCapture, CaptureHandle};

/// How long `open` waits for the stream thread to report startup.
const OPEN_TIMEOUT: Duration = Duration::from_secs(5);

/// Linear-interpolation resampler.
///
/// Good enough for speech heading into a transcription model; avoids
/// pulling a full resampling stack into the capture path.
pub fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate || samples.is_empty() {
        return samples.to_vec();
    }
    let ratio = to_rate as f64 / from_rate as f64;
    let new_len = (samples.len() as f64 * ratio) as usize;
    (0..new_len)
        .map(|i| {
            let src_idx = i as f64 / ratio;
            let idx = src_idx as usize;
            let frac = (src_idx - idx as f64) as f32;
            if idx + 1 < samples.len() {
                samples[idx] * (1.0 - frac) + samples[idx + 1] * frac
            } else {
                samples.get(idx).copied().unwrap_or(0.0)
            }
        })
        .collect()
}

/// Downmix interleaved multi-channel audio to mono by averaging.
pub fn downmix(data: &[f32], channels: usize) -> Vec<f32> {
    if channels <= 1 {
        return data.to_vec();
    }
    data.chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

/// Microphone capture source backed by the default cpal input device.
#[derive(Debug, Clone)]
pub struct CpalCapture {
    config: AudioConfig,
}

impl CpalCapture {
    pub fn new(config: AudioConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &AudioConfig {
        &self.config
    }
}

impl AudioCapture for CpalCapture {
    fn open(&self, sink: AudioBuffer) -> Result<CaptureHandle> {
        let target_rate = self.config.sample_rate;
        let stop = Arc::new(AtomicBool::new(false));
        let stop_thread = Arc::clone(&stop);

        // The thread reports stream startup (or failure) back through this
        // channel so `open` can surface device errors synchronously.
        let (ready_tx, ready_rx) = mpsc::channel::<Result<()>>();

        let join = std::thread::Builder::new()
            .name("murmur-capture".to_string())
            .spawn(move || {
                run_stream(target_rate, sink, stop_thread, ready_tx);
            })
            .map_err(|e| MurmurError::Capture(format!("Failed to spawn capture thread: {}", e)))?;

        match ready_rx.recv_timeout(OPEN_TIMEOUT) {
            Ok(Ok(())) => Ok(CaptureHandle::with_thread(stop, join)),
            Ok(Err(e)) => {
                let _ = join.join();
                Err(e)
            }
            Err(_) => {
                stop.store(true, Ordering::SeqCst);
                Err(MurmurError::Capture(
                    "Timed out waiting for the capture stream to start".to_string(),
                ))
            }
        }
    }
}

fn run_stream(
    target_rate: u32,
    sink: AudioBuffer,
    stop: Arc<AtomicBool>,
    ready_tx: mpsc::Sender<Result<()>>,
) {
    let host = cpal::default_host();
    let device = match host.default_input_device() {
        Some(d) => d,
        None => {
            let _ = ready_tx.send(Err(MurmurError::Capture(
                "No default input device".to_string(),
            )));
            return;
        }
    };

    let supported = match device.default_input_config() {
        Ok(c) => c,
        Err(e) => {
            let _ = ready_tx.send(Err(MurmurError::Capture(format!(
                "No usable input config: {}",
                e
            ))));
            return;
        }
    };

    let device_rate = supported.sample_rate().0;
    let channels = supported.channels() as usize;
    tracing::debug!(
        device_rate,
        channels,
        target_rate,
        "Opening capture stream"
    );

    let stream = device.build_input_stream(
        &supported.config(),
        move |data: &[f32], _| {
            if sink.is_full() {
                return;
            }
            let mono = downmix(data, channels);
            let resampled = resample(&mono, device_rate, target_rate);
            sink.push(&resampled);
        },
        |e| tracing::warn!(error = %e, "Capture stream error"),
        None,
    );

    let stream = match stream {
        Ok(s) => s,
        Err(e) => {
            let _ = ready_tx.send(Err(MurmurError::Capture(format!(
                "Failed to build input stream: {}",
                e
            ))));
            return;
        }
    };

    if let Err(e) = stream.play() {
        let _ = ready_tx.send(Err(MurmurError::Capture(format!(
            "Failed to start input stream: {}",
            e
        ))));
        return;
    }

    let _ = ready_tx.send(Ok(()));

    // The stream delivers via its own callback thread; this thread only
    // keeps it alive until the session closes the handle.
    while !stop.load(Ordering::SeqCst) {
        std::thread::sleep(Duration::from_millis(20));
    }
    drop(stream);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resample_identity() {
        let samples = vec![0.1, 0.2, 0.3];
        assert_eq!(resample(&samples, 16_000, 16_000), samples);
    }

    #[test]
    fn test_resample_halves_length() {
        let samples = vec![0.0; 480];
        let out = resample(&samples, 48_000, 16_000);
        assert_eq!(out.len(), 160);
    }

    #[test]
    fn test_resample_empty() {
        assert!(resample(&[], 48_000, 16_000).is_empty());
    }

    #[test]
    fn test_resample_interpolates() {
        // Upsampling a ramp should stay within the input's value range.
        let samples = vec![0.0, 1.0];
        let out = resample(&samples, 8_000, 16_000);
        assert_eq!(out.len(), 4);
        assert!(out.iter().all(|s| (0.0..=1.0).contains(s)));
    }

    #[test]
    fn test_downmix_mono_passthrough() {
        let data = vec![0.1, 0.2];
        assert_eq!(downmix(&data, 1), data);
    }

    #[test]
    fn test_downmix_stereo_averages() {
        let data = vec![0.0, 1.0, 0.5, 0.5];
        assert_eq!(downmix(&data, 2), vec![0.5, 0.5]);
    }
}
