//! WAV handling and optional microphone capture
//!
//! whisper.cpp only reads 16 kHz mono WAV reliably, so every recording is
//! normalized to that before it reaches an engine.

use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};
use tracing::info;

use crate::error::{Result, VoiceIssuesError};

/// Sample rate expected by whisper.
pub const WHISPER_SAMPLE_RATE: u32 = 16_000;

/// Decoded recording, mono at [`WHISPER_SAMPLE_RATE`].
#[derive(Debug, Clone, PartialEq)]
pub struct MonoAudio {
    /// Samples in `-1.0..=1.0`
    pub samples: Vec<f32>,
}

impl MonoAudio {
    /// Length in seconds.
    pub fn duration_secs(&self) -> f32 {
        // Precision loss is irrelevant at recording lengths
        #[allow(clippy::cast_precision_loss, clippy::as_conversions)]
        let len = self.samples.len() as f32;
        len / 16_000.0
    }
}

/// Downmix interleaved frames to mono and resample linearly to 16 kHz.
pub fn to_whisper_mono(interleaved: &[f32], channels: u16, sample_rate: u32) -> MonoAudio {
    let channels = usize::from(channels.max(1));
    let mono: Vec<f32> = interleaved
        .chunks(channels)
        .map(|frame| {
            #[allow(clippy::cast_precision_loss, clippy::as_conversions)]
            let count = frame.len() as f32;
            frame.iter().sum::<f32>() / count
        })
        .collect();

    if sample_rate == WHISPER_SAMPLE_RATE || mono.is_empty() || sample_rate == 0 {
        return MonoAudio { samples: mono };
    }

    let ratio = f64::from(sample_rate) / f64::from(WHISPER_SAMPLE_RATE);
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss,
        clippy::as_conversions
    )]
    let samples = {
        let out_len = (mono.len() as u64 * u64::from(WHISPER_SAMPLE_RATE) / u64::from(sample_rate))
            as usize;
        (0..out_len)
            .map(|i| {
                let pos = i as f64 * ratio;
                let idx = pos.floor() as usize;
                let frac = (pos - pos.floor()) as f32;
                let a = mono.get(idx).copied().unwrap_or_default();
                let b = mono.get(idx + 1).copied().unwrap_or(a);
                a + (b - a) * frac
            })
            .collect()
    };
    MonoAudio { samples }
}

/// Read any WAV hound understands and normalize it for whisper.
pub fn read_wav(path: &Path) -> Result<MonoAudio> {
    let mut reader = WavReader::open(path)
        .map_err(|e| VoiceIssuesError::transcription(path, format!("cannot read WAV: {e}")))?;
    let spec = reader.spec();

    let samples: std::result::Result<Vec<f32>, hound::Error> = match spec.sample_format {
        SampleFormat::Float => reader.samples::<f32>().collect(),
        SampleFormat::Int => {
            let shift = spec.bits_per_sample.saturating_sub(1).min(31);
            #[allow(clippy::cast_precision_loss, clippy::as_conversions)]
            let scale = (1_i64 << shift) as f32;
            reader
                .samples::<i32>()
                .map(|s| {
                    s.map(|v| {
                        #[allow(clippy::cast_precision_loss, clippy::as_conversions)]
                        let v = v as f32;
                        v / scale
                    })
                })
                .collect()
        }
    };
    let samples = samples
        .map_err(|e| VoiceIssuesError::transcription(path, format!("corrupt WAV data: {e}")))?;
    Ok(to_whisper_mono(&samples, spec.channels, spec.sample_rate))
}

/// Write 16-bit PCM mono at 16 kHz.
pub fn write_wav(path: &Path, audio: &MonoAudio) -> Result<()> {
    let spec = WavSpec {
        channels: 1,
        sample_rate: WHISPER_SAMPLE_RATE,
        bits_per_sample: 16,
        sample_format: SampleFormat::Int,
    };
    let to_io = |e: hound::Error| match e {
        hound::Error::IoError(io) => io,
        other => std::io::Error::other(other),
    };
    let mut writer = WavWriter::create(path, spec)
        .map_err(|e| VoiceIssuesError::persistence("create", path, to_io(e)))?;
    for &sample in &audio.samples {
        #[allow(clippy::cast_possible_truncation, clippy::as_conversions)]
        let pcm = (sample.clamp(-1.0, 1.0) * f32::from(i16::MAX)).round() as i16;
        writer
            .write_sample(pcm)
            .map_err(|e| VoiceIssuesError::persistence("write", path, to_io(e)))?;
    }
    writer
        .finalize()
        .map_err(|e| VoiceIssuesError::persistence("finalize", path, to_io(e)))?;
    info!("Wrote {:.1}s of audio to {}", audio.duration_secs(), path.display());
    Ok(())
}

/// Re-encode `src` as 16 kHz mono 16-bit PCM at `dest`.
pub fn rewrite_wav(src: &Path, dest: &Path) -> Result<()> {
    write_wav(dest, &read_wav(src)?)
}

/// Reject recordings that are missing or hold no audio.
pub fn validate_recording(path: &Path) -> Result<f32> {
    if !path.is_file() {
        return Err(VoiceIssuesError::transcription(path, "audio file not found"));
    }
    let Ok(audio) = read_wav(path) else {
        // Not a WAV we can decode; the engine may still accept it
        return Ok(0.0);
    };
    if audio.samples.is_empty() {
        return Err(VoiceIssuesError::transcription(path, "recording is empty"));
    }
    Ok(audio.duration_secs())
}

/// Index of the first device name passing the allow/deny filters.
///
/// Matching is a case-insensitive substring test; an empty allowlist admits
/// every device not on the denylist.
pub fn pick_device(names: &[String], allowlist: &[String], denylist: &[String]) -> Option<usize> {
    let lower = |items: &[String]| items.iter().map(|s| s.to_lowercase()).collect::<Vec<_>>();
    let allow = lower(allowlist);
    let deny = lower(denylist);
    names.iter().position(|name| {
        let name = name.to_lowercase();
        let allowed = allow.is_empty() || allow.iter().any(|a| name.contains(a.as_str()));
        allowed && !deny.iter().any(|d| name.contains(d.as_str()))
    })
}

#[cfg(feature = "capture")]
pub use recorder::AudioRecorder;

#[cfg(feature = "capture")]
mod recorder {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
    use tracing::{info, warn};

    use super::{MonoAudio, pick_device, to_whisper_mono};
    use crate::config::Devices;
    use crate::error::{Result, VoiceIssuesError};

    /// Audio recorder capturing from the first input device the filters admit
    pub struct AudioRecorder {
        /// Device name filters
        devices: Devices,
    }

    impl AudioRecorder {
        /// Create new audio recorder
        pub const fn new(devices: Devices) -> Self {
            Self { devices }
        }

        /// Record until `stop_signal` is set, returning 16 kHz mono audio
        pub fn record_until_stopped(&self, stop_signal: &Arc<AtomicBool>) -> Result<MonoAudio> {
            let device = self.select_device()?;
            let device_name = device
                .description()
                .map(|d| d.name().to_string())
                .unwrap_or_else(|_| "Unknown".to_string());
            info!("Using input device: {}", device_name);

            let config = device
                .default_input_config()
                .map_err(|e| device_error(&device_name, &e))?;
            info!("Input config: {:?}", config);
            let channels = config.channels();
            let stream_config: cpal::StreamConfig = config.into();
            let sample_rate = stream_config.sample_rate;

            let samples = Arc::new(Mutex::new(Vec::new()));
            let samples_clone = Arc::clone(&samples);

            let stream = device
                .build_input_stream(
                    &stream_config,
                    move |data: &[f32], _: &cpal::InputCallbackInfo| {
                        let mut samples_lock =
                            samples_clone.lock().unwrap_or_else(|e| e.into_inner());
                        samples_lock.extend_from_slice(data);
                    },
                    |err| warn!("Audio stream error: {}", err),
                    None,
                )
                .map_err(|e| device_error(&device_name, &e))?;

            stream.play().map_err(|e| device_error(&device_name, &e))?;

            while !stop_signal.load(Ordering::Acquire) {
                std::thread::sleep(std::time::Duration::from_millis(50));
            }

            drop(stream);

            let recorded = std::mem::take(&mut *samples.lock().unwrap_or_else(|e| e.into_inner()));
            info!("Recorded {} samples", recorded.len());

            Ok(to_whisper_mono(&recorded, channels, sample_rate))
        }

        /// First input device passing the configured filters
        fn select_device(&self) -> Result<cpal::Device> {
            let host = cpal::default_host();
            let devices: Vec<cpal::Device> = host
                .input_devices()
                .map_err(|e| device_error("input devices", &e))?
                .collect();
            let names: Vec<String> = devices
                .iter()
                .map(|d| {
                    d.description()
                        .map(|desc| desc.name().to_string())
                        .unwrap_or_default()
                })
                .collect();

            pick_device(&names, &self.devices.allowlist, &self.devices.denylist)
                .and_then(|index| devices.into_iter().nth(index))
                .or_else(|| {
                    if self.devices.allowlist.is_empty() && self.devices.denylist.is_empty() {
                        host.default_input_device()
                    } else {
                        None
                    }
                })
                .ok_or_else(|| {
                    VoiceIssuesError::transcription(
                        "microphone",
                        "no input device matches the configured device filters",
                    )
                })
        }
    }

    /// Wrap a cpal error for the named device
    fn device_error(device: &str, err: &dyn std::fmt::Display) -> VoiceIssuesError {
        VoiceIssuesError::transcription(device, format!("audio device error: {err}"))
    }
}
