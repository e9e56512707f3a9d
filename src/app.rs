//! Capture pipeline
//!
//! Owns the configuration, the selected repo and its checklist store, and
//! drives one capture: audio (or a typed transcript) in, pending entries out.

use std::path::Path;

use tracing::{debug, info};

use crate::config::{RepoTarget, SttProvider, VoiceConfig};
use crate::error::Result;
use crate::segment::Segmenter;
use crate::store::IssueStore;
use crate::transcribe::{Transcriber, transcriber_for};

/// What a capture produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureOutcome {
    /// Issue texts extracted from the transcript
    pub segments: Vec<String>,
    /// Entries appended to the checklist
    pub appended: usize,
}

/// Holds the components one session works with.
#[derive(Debug)]
pub struct App {
    /// Loaded configuration
    config: VoiceConfig,
    /// Repo and checklist being written
    repo: RepoTarget,
    /// Phrase-based transcript splitter
    segmenter: Segmenter,
    /// Checklist persistence
    store: IssueStore,
}

impl App {
    /// Select the repo (`alias` or the configured default) and prepare its store.
    pub fn new(config: VoiceConfig, alias: Option<&str>) -> Result<Self> {
        let repo = config.select_repo(alias)?;
        let segmenter = config.segmenter()?;
        let store = IssueStore::new(&repo.issues_file);

        info!(
            "Repo '{}' uses {} ({:?})",
            repo.alias,
            repo.issues_file.display(),
            repo.source
        );

        Ok(Self {
            config,
            repo,
            segmenter,
            store,
        })
    }

    /// Loaded configuration
    pub const fn config(&self) -> &VoiceConfig {
        &self.config
    }

    /// Selected repo
    pub const fn repo(&self) -> &RepoTarget {
        &self.repo
    }

    /// Store of the selected repo's checklist
    pub const fn store(&self) -> &IssueStore {
        &self.store
    }

    /// Segmenter built from the configured phrases
    pub const fn segmenter(&self) -> &Segmenter {
        &self.segmenter
    }

    /// Split `transcript` into issues and append them as pending entries.
    pub fn capture_transcript(&self, transcript: &str) -> Result<CaptureOutcome> {
        let segments = self.segmenter.split(transcript);
        for (i, segment) in segments.iter().enumerate() {
            debug!("Segment {}: {}", i + 1, segment);
        }
        if segments.is_empty() {
            info!("Transcript contained no issues");
        }

        let appended = self.store.append(&segments)?;
        Ok(CaptureOutcome { segments, appended })
    }

    /// Transcribe `audio` with `provider` (or the configured one) and capture the text.
    pub fn capture_audio(
        &self,
        audio: &Path,
        provider: Option<SttProvider>,
    ) -> Result<CaptureOutcome> {
        let provider = provider.unwrap_or(self.config.stt.provider);
        let transcriber = transcriber_for(&self.config, provider)?;
        self.capture_with(transcriber.as_ref(), audio)
    }

    /// Transcribe `audio` with an already built transcriber and capture the text.
    pub fn capture_with(
        &self,
        transcriber: &dyn Transcriber,
        audio: &Path,
    ) -> Result<CaptureOutcome> {
        info!("Transcribing {} with {}", audio.display(), transcriber.name());
        let transcript = transcriber.transcribe(audio)?;
        debug!("Transcript: {}", transcript);
        self.capture_transcript(&transcript)
    }
}

#[cfg(feature = "capture")]
mod recording {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread::JoinHandle;

    use tracing::{info, warn};

    use super::{App, CaptureOutcome};
    use crate::audio::{AudioRecorder, MonoAudio, write_wav};
    use crate::config::SttProvider;
    use crate::error::{Result, VoiceIssuesError};

    /// Recorder thread and the flag that stops it
    struct Recording {
        /// Set to end the capture
        stop_signal: Arc<AtomicBool>,
        /// Thread returning the recorded audio
        thread: JoinHandle<Result<MonoAudio>>,
    }

    impl App {
        /// Record from the microphone until Enter is pressed, then capture.
        pub fn record_and_capture(&self, provider: Option<SttProvider>) -> Result<CaptureOutcome> {
            let recording = self.start_recording();

            let mut line = String::new();
            if let Err(e) = std::io::stdin().read_line(&mut line) {
                warn!("Failed to read stop key, stopping recording: {}", e);
            }

            let audio = Self::finish_recording(recording)?;
            if audio.samples.is_empty() {
                return Err(VoiceIssuesError::transcription(
                    "microphone",
                    "no audio was recorded",
                ));
            }

            let wav = tempfile::Builder::new()
                .prefix("voice-issues-")
                .suffix(".wav")
                .tempfile()
                .map_err(|e| {
                    VoiceIssuesError::persistence("create", std::env::temp_dir(), e)
                })?;
            write_wav(wav.path(), &audio)?;
            info!("Recorded {:.1}s of audio", audio.duration_secs());

            self.capture_audio(wav.path(), provider)
        }

        /// Start recording audio in a background thread.
        fn start_recording(&self) -> Recording {
            info!("Recording started, press Enter to stop");

            let stop_signal = Arc::new(AtomicBool::new(false));
            let recorder = AudioRecorder::new(self.config.devices.clone());
            let signal = Arc::clone(&stop_signal);

            Recording {
                stop_signal,
                thread: std::thread::spawn(move || recorder.record_until_stopped(&signal)),
            }
        }

        /// Stop the recorder and wait for its audio.
        fn finish_recording(recording: Recording) -> Result<MonoAudio> {
            info!("Recording stopped, transcribing...");
            recording.stop_signal.store(true, Ordering::Release);

            recording.thread.join().map_err(|_| {
                VoiceIssuesError::transcription("microphone", "recording thread panicked")
            })?
        }
    }
}
