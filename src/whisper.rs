//! In-process Whisper engine (`embedded-whisper` feature)

use std::path::{Path, PathBuf};

use tracing::{debug, info};
use whisper_rs::{FullParams, SamplingStrategy, WhisperContext, WhisperContextParameters};

use crate::audio::{MonoAudio, read_wav};
use crate::error::{Result, VoiceIssuesError};
use crate::transcribe::Transcriber;

/// Whisper model linked into the process
pub struct WhisperEngine {
    /// Loaded model
    ctx: WhisperContext,
    /// Model file, for error messages
    model_path: PathBuf,
    /// Decoder threads
    threads: i32,
    /// Language code; `None` lets whisper detect it
    language: Option<String>,
}

impl WhisperEngine {
    /// Load the GGML model at `model_path`.
    pub fn load(model_path: &Path, threads: usize, language: Option<String>) -> Result<Self> {
        let fail = |message: String| VoiceIssuesError::transcription(model_path, message);
        if !model_path.is_file() {
            return Err(fail("whisper model not found".to_owned()));
        }
        let path_str = model_path
            .to_str()
            .ok_or_else(|| fail("model path is not valid UTF-8".to_owned()))?;

        info!("Loading whisper model {}", model_path.display());
        let ctx = WhisperContext::new_with_params(path_str, WhisperContextParameters::default())
            .map_err(|e| fail(format!("cannot load model: {e}")))?;

        Ok(Self {
            ctx,
            model_path: model_path.to_path_buf(),
            threads: i32::try_from(threads.max(1)).unwrap_or(4),
            language: language.filter(|l| !l.trim().is_empty() && l != "auto"),
        })
    }

    /// Greedy decoding without console output
    fn params(&self) -> FullParams<'_, '_> {
        let mut params = FullParams::new(SamplingStrategy::Greedy { best_of: 1 });
        params.set_n_threads(self.threads);
        params.set_language(self.language.as_deref());
        params.set_print_progress(false);
        params.set_print_special(false);
        params.set_print_realtime(false);
        params.set_print_timestamps(false);
        params
    }

    /// Decode 16 kHz mono audio into text.
    pub fn transcribe_audio(&self, audio: &MonoAudio) -> Result<String> {
        let fail = |message: String| VoiceIssuesError::transcription(&self.model_path, message);

        let mut state = self
            .ctx
            .create_state()
            .map_err(|e| fail(format!("cannot create decoder state: {e}")))?;
        state
            .full(self.params(), &audio.samples)
            .map_err(|e| fail(format!("decoding failed: {e}")))?;

        let mut pieces = Vec::new();
        for index in 0..state.full_n_segments() {
            let Some(segment) = state.get_segment(index) else {
                continue;
            };
            let piece = segment
                .to_str()
                .map_err(|e| fail(format!("segment {index} is not valid text: {e}")))?;
            pieces.push(piece.trim().to_owned());
        }
        debug!("whisper produced {} segment(s)", pieces.len());

        Ok(pieces.join(" ").trim().to_owned())
    }
}

impl Transcriber for WhisperEngine {
    fn transcribe(&self, audio: &Path) -> Result<String> {
        let recording = read_wav(audio)?;
        if recording.samples.is_empty() {
            return Err(VoiceIssuesError::transcription(audio, "recording is empty"));
        }
        info!(
            "Transcribing {} ({:.1}s) in-process",
            audio.display(),
            recording.duration_secs()
        );
        self.transcribe_audio(&recording)
    }

    fn name(&self) -> &'static str {
        "whisper-rs"
    }
}
