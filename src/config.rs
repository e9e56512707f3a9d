//! Configuration loading from `.voice_config.json` and `.env`
//!
//! The config is read once at start-up into a [`VoiceConfig`] that is passed
//! to every component. `.env` (via dotenvy) can point at a different config
//! file and override the log level.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::checklist::Checklist;
use crate::error::{Result, VoiceIssuesError};
use crate::segment::Segmenter;
use crate::store::{read_optional, write_atomic};

/// Config file looked up in the working directory.
pub const CONFIG_FILE_NAME: &str = ".voice_config.json";

/// Pre-rename config location in the home directory, migrated on first load.
const LEGACY_CONFIG_FILE_NAME: &str = ".voice_issues_config.json";

/// Environment variable holding an alternative config path.
pub const CONFIG_ENV: &str = "VOICE_ISSUES_CONFIG";

/// Environment variable overriding `logging.level`.
pub const LOG_ENV: &str = "VOICE_ISSUES_LOG";

/// Checklist location inside a repo.
pub const REPO_LOCAL_ISSUES: &str = ".voice/voice-issues.md";

/// Older root-level checklist location.
pub const LEGACY_ISSUES: &str = "voice-issues.md";

/// Whole configuration file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct VoiceConfig {
    /// Repo alias used when none is given on the command line
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default_repo: Option<String>,
    /// Repo alias (or path) to repo settings
    pub repos: BTreeMap<String, RepoEntry>,
    /// Trigger phrases
    pub phrases: Phrases,
    /// Speech-to-text engine selection
    pub stt: SttConfig,
    /// Hotkey bindings for the desktop front end
    pub hotkeys: Hotkeys,
    /// Input device filters
    pub devices: Devices,
    /// Realtime relay endpoints
    pub realtime: Realtime,
    /// Log output
    pub logging: Logging,
    /// Keys this version does not know about, kept when saving
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
    /// File the config was read from
    #[serde(skip)]
    source: PathBuf,
    /// Legacy file this config was copied from during load
    #[serde(skip)]
    migrated_from: Option<PathBuf>,
}

/// Settings for one repo
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RepoEntry {
    /// Repo root; defaults to the alias itself
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    /// Checklist path, relative to the repo root unless absolute
    #[serde(skip_serializing_if = "Option::is_none")]
    pub issues_file: Option<PathBuf>,
}

/// Spoken trigger phrases
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Phrases {
    /// Phrases separating two issues
    pub next_issue: Vec<String>,
    /// Phrases ending the capture
    pub stop: Vec<String>,
}

impl Phrases {
    /// Built-in `nextIssue` phrases.
    fn default_next_issue() -> Vec<String> {
        vec!["next issue".to_owned(), "next point".to_owned()]
    }

    /// Built-in `stop` phrases.
    fn default_stop() -> Vec<String> {
        vec!["end issues".to_owned(), "stop issues".to_owned()]
    }
}

impl Default for Phrases {
    fn default() -> Self {
        Self {
            next_issue: Self::default_next_issue(),
            stop: Self::default_stop(),
        }
    }
}

/// Which engine turns audio into text
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SttProvider {
    /// Transcript typed or piped in, no audio involved
    #[default]
    Stub,
    /// whisper.cpp command-line binary
    WhisperCpp,
    /// whisper linked in-process (`embedded-whisper` feature)
    WhisperRs,
}

impl FromStr for SttProvider {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "stub" => Ok(Self::Stub),
            "whisper_cpp" | "whispercpp" => Ok(Self::WhisperCpp),
            "whisper_rs" | "embedded" => Ok(Self::WhisperRs),
            other => Err(format!(
                "unknown STT provider '{other}' (expected stub, whisper_cpp or whisper_rs)"
            )),
        }
    }
}

/// Speech-to-text settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SttConfig {
    /// Engine to use
    pub provider: SttProvider,
    /// whisper.cpp executable
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binary_path: Option<PathBuf>,
    /// GGML model file
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<PathBuf>,
    /// Spoken language code, engine default when unset
    #[serde(skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    /// Preferred capture sample rate
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_samplerate: Option<u32>,
    /// Preferred capture channel count
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_channels: Option<u16>,
    /// Inference threads for the in-process engine
    #[serde(skip_serializing_if = "Option::is_none")]
    pub threads: Option<usize>,
}

/// Hotkey bindings, consumed by the desktop front end
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Hotkeys {
    /// Start/stop recording
    pub toggle: String,
    /// Quit the recorder
    pub quit: String,
}

impl Default for Hotkeys {
    fn default() -> Self {
        Self {
            toggle: "ctrl+alt+i".to_owned(),
            quit: "ctrl+alt+q".to_owned(),
        }
    }
}

/// Input device filters (case-insensitive substrings of device names)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Devices {
    /// Only devices matching one of these are used, if non-empty
    pub allowlist: Vec<String>,
    /// Devices matching any of these are skipped
    pub denylist: Vec<String>,
}

/// Realtime transcript relay endpoints
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Realtime {
    /// Websocket the relay publishes transcripts on
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ws_url: Option<String>,
    /// HTTP endpoint transcripts are posted to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub post_url: Option<String>,
}

/// Log output settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Logging {
    /// trace, debug, info, warn or error
    pub level: String,
    /// Append logs to this file instead of stderr
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
}

impl Default for Logging {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            file: None,
        }
    }
}

/// How the checklist path of a repo was chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssuesFileSource {
    /// `issuesFile` set in the config
    Configured,
    /// Repo-local `.voice/voice-issues.md` holding entries
    RepoLocal,
    /// Root-level `voice-issues.md`
    Legacy,
    /// Nothing exists yet; the repo-local path will be created
    Default,
}

/// Repo and checklist a session writes to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoTarget {
    /// Alias the repo was selected by
    pub alias: String,
    /// Repo root
    pub repo_path: PathBuf,
    /// Checklist file
    pub issues_file: PathBuf,
    /// Why this checklist was picked
    pub source: IssuesFileSource,
}

impl VoiceConfig {
    /// Load `.env`, locate the config file and parse it.
    ///
    /// Lookup order: `explicit`, `$VOICE_ISSUES_CONFIG`, `./.voice_config.json`.
    /// When the default file is missing, a legacy `~/.voice_issues_config.json`
    /// is copied into place.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        // .env is optional here, unlike the config file itself
        let _ = dotenvy::dotenv();

        let from_env = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        let use_default = explicit.is_none() && from_env.is_none();
        let path = explicit
            .map(Path::to_path_buf)
            .or(from_env)
            .map_or_else(|| PathBuf::from(CONFIG_FILE_NAME), |p| expand_home(&p));

        if use_default
            && !path.exists()
            && let Some(legacy) = dirs::home_dir().map(|home| home.join(LEGACY_CONFIG_FILE_NAME))
            && let Some(raw) = read_optional(&legacy)?
        {
            write_atomic(&path, raw.as_bytes())?;
            let mut config = Self::from_json(&raw, &path)?;
            config.migrated_from = Some(legacy);
            return Ok(config);
        }

        Self::load_from(&path)
    }

    /// Parse the config file at `path`.
    pub fn load_from(path: &Path) -> Result<Self> {
        let raw = read_optional(path)?.ok_or_else(|| {
            VoiceIssuesError::config(
                path,
                "config file not found; create it from .voice_config.sample.json",
            )
        })?;
        Self::from_json(&raw, path)
    }

    /// Parse config JSON read from `source`.
    pub fn from_json(raw: &str, source: &Path) -> Result<Self> {
        let raw = raw.trim_start_matches('\u{feff}');
        let mut config: Self = serde_json::from_str(raw)
            .map_err(|e| VoiceIssuesError::config(source, format!("invalid JSON: {e}")))?;
        if config.phrases.next_issue.is_empty() {
            config.phrases.next_issue = Phrases::default_next_issue();
        }
        if config.phrases.stop.is_empty() {
            config.phrases.stop = Phrases::default_stop();
        }
        config.source = source.to_path_buf();
        Ok(config)
    }

    /// Write the config back to the file it was loaded from.
    pub fn save(&self) -> Result<()> {
        let mut json = serde_json::to_string_pretty(self)
            .map_err(|e| VoiceIssuesError::config(&self.source, format!("cannot serialize: {e}")))?;
        json.push('\n');
        write_atomic(&self.source, json.as_bytes())
    }

    /// File the config was read from.
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Legacy config file that was migrated during [`VoiceConfig::load`].
    pub fn migrated_from(&self) -> Option<&Path> {
        self.migrated_from.as_deref()
    }

    /// Effective log level, `$VOICE_ISSUES_LOG` taking precedence.
    pub fn log_level(&self) -> String {
        std::env::var(LOG_ENV).unwrap_or_else(|_| self.logging.level.clone())
    }

    /// Segmenter for the configured phrases.
    pub fn segmenter(&self) -> Result<Segmenter> {
        Segmenter::new(&self.phrases.next_issue, &self.phrases.stop).map_err(|e| {
            VoiceIssuesError::config(&self.source, format!("phrases cannot be compiled: {e}"))
        })
    }

    /// Pick the repo to work on and resolve its checklist.
    pub fn select_repo(&self, alias: Option<&str>) -> Result<RepoTarget> {
        let key = alias
            .map(str::to_owned)
            .or_else(|| self.default_repo.clone())
            .ok_or_else(|| {
                VoiceIssuesError::config(&self.source, "no repo selected and defaultRepo is not set")
            })?;

        let (name, entry) = match self.repos.get_key_value(&key) {
            Some(found) => found,
            None => {
                let wanted = canonical(&self.resolve_path(Path::new(&key)));
                self.repos
                    .iter()
                    .find(|(name, entry)| canonical(&self.repo_root(name, entry)) == wanted)
                    .ok_or_else(|| {
                        VoiceIssuesError::config(
                            &self.source,
                            format!("repos.\"{key}\" is missing"),
                        )
                    })?
            }
        };

        let repo_path = self.repo_root(name, entry);
        let (issues_file, source) = resolve_issues_file(&repo_path, entry.issues_file.as_deref());
        Ok(RepoTarget {
            alias: name.clone(),
            repo_path,
            issues_file,
            source,
        })
    }

    /// Register `repo_path` with a repo-local checklist and make it the default.
    pub fn register_repo(&mut self, repo_path: &Path) -> RepoTarget {
        let key = repo_path.display().to_string();
        self.repos.insert(
            key.clone(),
            RepoEntry {
                path: None,
                issues_file: Some(PathBuf::from(REPO_LOCAL_ISSUES)),
            },
        );
        self.default_repo = Some(key.clone());
        RepoTarget {
            alias: key,
            repo_path: repo_path.to_path_buf(),
            issues_file: repo_path.join(REPO_LOCAL_ISSUES),
            source: IssuesFileSource::Configured,
        }
    }

    /// whisper.cpp binary and model paths; both must be configured.
    pub fn whisper_paths(&self) -> Result<(PathBuf, PathBuf)> {
        let binary = self
            .stt
            .binary_path
            .as_deref()
            .ok_or_else(|| VoiceIssuesError::config(&self.source, "stt.binaryPath is not set"))?;
        Ok((self.resolve_path(binary), self.whisper_model()?))
    }

    /// Model path; must be configured.
    pub fn whisper_model(&self) -> Result<PathBuf> {
        self.stt
            .model
            .as_deref()
            .map(|model| self.resolve_path(model))
            .ok_or_else(|| VoiceIssuesError::config(&self.source, "stt.model is not set"))
    }

    /// Root directory of a configured repo.
    fn repo_root(&self, name: &str, entry: &RepoEntry) -> PathBuf {
        self.resolve_path(entry.path.as_deref().unwrap_or_else(|| Path::new(name)))
    }

    /// Expand `~` and anchor relative paths at the config file's directory.
    fn resolve_path(&self, path: &Path) -> PathBuf {
        let path = expand_home(path);
        if path.is_absolute() {
            return path;
        }
        match self.source.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir.join(path),
            _ => path,
        }
    }
}

/// Choose the checklist file for a repo.
///
/// A configured path always wins. Otherwise the repo-local file is used when
/// it holds at least one entry, then an existing legacy root-level file, and
/// finally the repo-local path, which the first append creates.
pub fn resolve_issues_file(
    repo_path: &Path,
    configured: Option<&Path>,
) -> (PathBuf, IssuesFileSource) {
    if let Some(configured) = configured {
        let configured = expand_home(configured);
        let path = if configured.is_absolute() {
            configured
        } else {
            repo_path.join(configured)
        };
        return (path, IssuesFileSource::Configured);
    }

    let local = repo_path.join(REPO_LOCAL_ISSUES);
    let populated = std::fs::read_to_string(&local)
        .map(|content| !Checklist::parse(&content).is_empty())
        .unwrap_or(false);
    if populated {
        return (local, IssuesFileSource::RepoLocal);
    }

    let legacy = repo_path.join(LEGACY_ISSUES);
    if legacy.is_file() {
        return (legacy, IssuesFileSource::Legacy);
    }
    (local, IssuesFileSource::Default)
}

/// Replace a leading `~` with the home directory.
pub fn expand_home(path: &Path) -> PathBuf {
    if let Ok(rest) = path.strip_prefix("~")
        && let Some(home) = dirs::home_dir()
    {
        return home.join(rest);
    }
    path.to_path_buf()
}

/// Canonical form for path comparison, falling back to the path itself.
fn canonical(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
