//! voice-issues: turn spoken issue lists into a markdown checklist.
//!
//! A recording (or a typed transcript) is split on spoken trigger phrases
//! into issue texts, which are appended as pending entries to a per-repo
//! checklist file. The checklist is shared with an automation agent that
//! flips entry states, so every write re-reads the file first.

pub mod app;
pub mod audio;
pub mod checklist;
pub mod config;
pub mod error;
pub mod segment;
pub mod store;
pub mod transcribe;
#[cfg(feature = "embedded-whisper")]
pub mod whisper;

pub use app::{App, CaptureOutcome};
pub use checklist::{Checklist, EntryRef, IssueEntry, IssueState, MoveDirection};
pub use config::{RepoTarget, SttProvider, VoiceConfig};
pub use error::{Result, VoiceIssuesError};
pub use segment::{SegmentStream, Segmenter};
pub use store::IssueStore;
pub use transcribe::Transcriber;
