//! Speech-to-text providers
//!
//! The capture pipeline only needs `audio file -> text`; each provider wraps
//! one engine behind [`Transcriber`]. Failures are reported with the binary,
//! model or audio path involved and are never retried beyond the single WAV
//! rewrite whisper.cpp sometimes needs.

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{debug, info, warn};

use crate::audio::{rewrite_wav, validate_recording};
use crate::config::{SttProvider, VoiceConfig};
use crate::error::{Result, VoiceIssuesError};
use crate::store::read_optional;

/// Something that turns a recording into text
pub trait Transcriber {
    /// Transcribe the audio file at `audio`.
    fn transcribe(&self, audio: &Path) -> Result<String>;

    /// Short engine name for logs
    fn name(&self) -> &'static str;
}

/// Build the transcriber selected by `provider`.
pub fn transcriber_for(config: &VoiceConfig, provider: SttProvider) -> Result<Box<dyn Transcriber>> {
    match provider {
        SttProvider::Stub => Ok(Box::new(StubProvider::default())),
        SttProvider::WhisperCpp => {
            let (binary, model) = config.whisper_paths()?;
            Ok(Box::new(WhisperCppProvider::new(
                &binary,
                &model,
                config.stt.language.clone(),
            )?))
        }
        #[cfg(feature = "embedded-whisper")]
        SttProvider::WhisperRs => Ok(Box::new(crate::whisper::WhisperEngine::load(
            &config.whisper_model()?,
            config.stt.threads.unwrap_or(4),
            config.stt.language.clone(),
        )?)),
        #[cfg(not(feature = "embedded-whisper"))]
        SttProvider::WhisperRs => Err(VoiceIssuesError::config(
            config.source(),
            "stt.provider \"whisper_rs\" needs a build with --features embedded-whisper",
        )),
    }
}

/// Provider that ignores the audio and returns preset text, or stdin
#[derive(Debug, Default)]
pub struct StubProvider {
    /// Text to return instead of reading stdin
    text: Option<String>,
}

impl StubProvider {
    /// Stub that always answers with `text`
    pub fn with_text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
        }
    }
}

impl Transcriber for StubProvider {
    fn transcribe(&self, _audio: &Path) -> Result<String> {
        if let Some(text) = &self.text {
            return Ok(text.clone());
        }
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .map_err(|e| VoiceIssuesError::transcription("<stdin>", e.to_string()))?;
        Ok(text)
    }

    fn name(&self) -> &'static str {
        "stub"
    }
}

/// Outcome of one whisper.cpp run
enum Attempt {
    /// Transcript text
    Text(String),
    /// Engine could not read the input or wrote nothing; a rewritten WAV may help
    Unreadable(String),
    /// Any other failure
    Failed(String),
}

/// Runs the whisper.cpp command-line binary
#[derive(Debug, Clone)]
pub struct WhisperCppProvider {
    /// Executable
    binary: PathBuf,
    /// GGML model
    model: PathBuf,
    /// Language code passed with `-l`
    language: Option<String>,
}

impl WhisperCppProvider {
    /// Check that binary and model exist.
    ///
    /// A configured `main` binary is swapped for a sibling `whisper-cli`,
    /// which replaced it in newer whisper.cpp releases.
    pub fn new(binary: &Path, model: &Path, language: Option<String>) -> Result<Self> {
        let binary = prefer_whisper_cli(binary);
        if !binary.is_file() {
            return Err(VoiceIssuesError::transcription(
                &binary,
                "whisper.cpp binary not found",
            ));
        }
        if !model.is_file() {
            return Err(VoiceIssuesError::transcription(
                model,
                "whisper.cpp model not found",
            ));
        }
        Ok(Self {
            binary,
            model: model.to_path_buf(),
            language: language.filter(|l| !l.trim().is_empty()),
        })
    }

    /// Executable that will be run
    pub fn binary(&self) -> &Path {
        &self.binary
    }

    /// One invocation of the binary writing `<out_base>.txt`
    fn run_once(&self, input: &Path, out_base: &Path) -> Result<Attempt> {
        let mut cmd = Command::new(&self.binary);
        cmd.arg("-m")
            .arg(&self.model)
            .arg("-f")
            .arg(input)
            .arg("-otxt")
            .arg("-of")
            .arg(out_base);
        if let Some(language) = &self.language {
            cmd.arg("-l").arg(language);
        }
        debug!("Running {:?}", cmd);

        let output = cmd.output().map_err(|e| {
            VoiceIssuesError::transcription(&self.binary, format!("cannot start whisper.cpp: {e}"))
        })?;
        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_owned();

        if !output.status.success() {
            let message = [stderr.as_str(), stdout.as_str()]
                .into_iter()
                .find(|s| !s.is_empty())
                .unwrap_or("unknown error")
                .to_owned();
            if message.to_lowercase().contains("failed to read audio") {
                return Ok(Attempt::Unreadable(message));
            }
            return Ok(Attempt::Failed(format!("exited with {}: {message}", output.status)));
        }
        if !stderr.is_empty() {
            debug!("whisper.cpp stderr: {}", stderr);
        }

        let out_txt = out_base.with_extension("txt");
        match read_optional(&out_txt)? {
            Some(text) => Ok(Attempt::Text(text.trim().to_owned())),
            None => Ok(Attempt::Unreadable(format!(
                "no transcription output; stdout={}, stderr={}",
                or_na(&stdout),
                or_na(&stderr)
            ))),
        }
    }

    /// Error naming the binary
    fn failure(&self, detail: &str) -> VoiceIssuesError {
        VoiceIssuesError::transcription(&self.binary, format!("whisper.cpp failed: {detail}"))
    }
}

impl Transcriber for WhisperCppProvider {
    fn transcribe(&self, audio: &Path) -> Result<String> {
        let seconds = validate_recording(audio)?;
        info!("Transcribing {} ({:.1}s) with whisper.cpp", audio.display(), seconds);

        let workdir = tempfile::Builder::new()
            .prefix("voice-issues-")
            .tempdir()
            .map_err(|e| {
                VoiceIssuesError::persistence("create temporary directory in", std::env::temp_dir(), e)
            })?;
        let out_base = workdir.path().join("whisper_out");

        match self.run_once(audio, &out_base)? {
            Attempt::Text(text) => Ok(text),
            Attempt::Unreadable(detail) if is_wav(audio) => {
                warn!(
                    "whisper.cpp could not use {} ({}); retrying with a re-encoded copy",
                    audio.display(),
                    detail
                );
                let fixed = workdir.path().join("rewritten.wav");
                rewrite_wav(audio, &fixed)?;
                match self.run_once(&fixed, &out_base)? {
                    Attempt::Text(text) => Ok(text),
                    Attempt::Unreadable(detail) | Attempt::Failed(detail) => {
                        Err(self.failure(&detail))
                    }
                }
            }
            Attempt::Unreadable(detail) | Attempt::Failed(detail) => Err(self.failure(&detail)),
        }
    }

    fn name(&self) -> &'static str {
        "whisper.cpp"
    }
}

/// Swap a legacy `main` executable for `whisper-cli` in the same directory.
fn prefer_whisper_cli(binary: &Path) -> PathBuf {
    let is_main = binary
        .file_stem()
        .is_some_and(|stem| stem.eq_ignore_ascii_case("main"));
    if is_main {
        let cli = binary.with_file_name("whisper-cli");
        let cli = match binary.extension() {
            Some(ext) => cli.with_extension(ext),
            None => cli,
        };
        if cli.is_file() {
            return cli;
        }
    }
    binary.to_path_buf()
}

/// Whether the path has a `.wav` extension.
fn is_wav(path: &Path) -> bool {
    path.extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("wav"))
}

/// "n/a" for empty output.
fn or_na(s: &str) -> &str {
    if s.is_empty() { "n/a" } else { s }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{MonoAudio, write_wav};
    use std::fs;
    use tempfile::TempDir;

    fn sample_wav(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("take.wav");
        write_wav(&path, &MonoAudio { samples: vec![0.1; 1600] }).unwrap();
        path
    }

    #[test]
    fn missing_binary_and_model_are_named() {
        let dir = TempDir::new().unwrap();
        let model = dir.path().join("ggml-base.en.bin");
        let binary = dir.path().join("whisper-cli");

        let err = WhisperCppProvider::new(&binary, &model, None).unwrap_err();
        assert!(err.to_string().contains("whisper-cli"), "{err}");
        assert!(err.to_string().contains("binary not found"), "{err}");

        fs::write(&binary, "").unwrap();
        let err = WhisperCppProvider::new(&binary, &model, None).unwrap_err();
        assert!(err.to_string().contains("ggml-base.en.bin"), "{err}");
    }

    #[test]
    fn main_binary_falls_back_to_whisper_cli() {
        let dir = TempDir::new().unwrap();
        let model = dir.path().join("model.bin");
        fs::write(&model, "").unwrap();
        fs::write(dir.path().join("main"), "").unwrap();
        fs::write(dir.path().join("whisper-cli"), "").unwrap();

        let provider = WhisperCppProvider::new(&dir.path().join("main"), &model, None).unwrap();
        assert_eq!(provider.binary(), dir.path().join("whisper-cli"));
    }

    #[test]
    fn whisper_cpp_without_paths_is_a_config_error() {
        let config = VoiceConfig::from_json(r#"{"stt":{"provider":"whisper_cpp"}}"#, Path::new("c.json"))
            .unwrap();
        let err = transcriber_for(&config, SttProvider::WhisperCpp).err().unwrap();
        assert!(matches!(err, VoiceIssuesError::Config { .. }), "{err}");
    }

    #[test]
    fn stub_returns_preset_text() {
        let stub = StubProvider::with_text("one next issue two");
        assert_eq!(stub.transcribe(Path::new("ignored.wav")).unwrap(), "one next issue two");
    }

    #[cfg(unix)]
    fn fake_whisper(dir: &TempDir, body: &str) -> (PathBuf, PathBuf) {
        use std::os::unix::fs::PermissionsExt;

        let script = dir.path().join("whisper-cli");
        let source = format!(
            "#!/bin/sh\nin=\"\"\nout=\"\"\nwhile [ $# -gt 0 ]; do\n  case \"$1\" in\n    -f) in=\"$2\"; shift ;;\n    -of) out=\"$2\"; shift ;;\n  esac\n  shift\ndone\n{body}\n"
        );
        fs::write(&script, source).unwrap();
        fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
        let model = dir.path().join("model.bin");
        fs::write(&model, "").unwrap();
        (script, model)
    }

    #[cfg(unix)]
    #[test]
    fn reads_transcript_written_by_binary() {
        let dir = TempDir::new().unwrap();
        let (binary, model) = fake_whisper(
            &dir,
            "printf ' first issue next issue second issue \\n' > \"$out.txt\"",
        );
        let provider = WhisperCppProvider::new(&binary, &model, Some("en".to_owned())).unwrap();
        let text = provider.transcribe(&sample_wav(&dir)).unwrap();
        assert_eq!(text, "first issue next issue second issue");
    }

    #[cfg(unix)]
    #[test]
    fn failure_reports_stderr() {
        let dir = TempDir::new().unwrap();
        let (binary, model) = fake_whisper(&dir, "echo 'model is corrupt' >&2\nexit 3");
        let provider = WhisperCppProvider::new(&binary, &model, None).unwrap();
        let err = provider.transcribe(&sample_wav(&dir)).unwrap_err();
        assert!(err.to_string().contains("model is corrupt"), "{err}");
    }

    #[cfg(unix)]
    #[test]
    fn unreadable_wav_is_rewritten_once() {
        let dir = TempDir::new().unwrap();
        let (binary, model) = fake_whisper(
            &dir,
            "case \"$in\" in\n  *rewritten.wav) printf 'recovered' > \"$out.txt\" ;;\n  *) echo 'error: failed to read audio data as wav' >&2; exit 1 ;;\nesac",
        );
        let provider = WhisperCppProvider::new(&binary, &model, None).unwrap();
        assert_eq!(provider.transcribe(&sample_wav(&dir)).unwrap(), "recovered");
    }

    #[test]
    fn missing_audio_is_reported_before_running() {
        let dir = TempDir::new().unwrap();
        let binary = dir.path().join("whisper-cli");
        let model = dir.path().join("model.bin");
        fs::write(&binary, "").unwrap();
        fs::write(&model, "").unwrap();
        let provider = WhisperCppProvider::new(&binary, &model, None).unwrap();
        let err = provider.transcribe(&dir.path().join("nothing.wav")).unwrap_err();
        assert!(err.to_string().contains("nothing.wav"), "{err}");
    }
}
