//! Error taxonomy shared by the library modules

use std::path::PathBuf;

use thiserror::Error;

/// Result alias for library operations
pub type Result<T> = std::result::Result<T, VoiceIssuesError>;

/// Everything that can go wrong between the microphone and the checklist file
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum VoiceIssuesError {
    /// Missing or invalid configuration field
    #[error("invalid configuration ({}): {message}", path.display())]
    Config {
        /// Config file (or resolved path) the problem was found in
        path: PathBuf,
        /// Field and problem description
        message: String,
    },

    /// Speech-to-text engine failure, missing binary or missing model
    #[error("transcription failed ({}): {message}", path.display())]
    Transcription {
        /// Binary, model or audio path that was attempted
        path: PathBuf,
        /// What went wrong
        message: String,
    },

    /// Checklist file could not be created, read or written
    #[error("failed to {action} {}", path.display())]
    Persistence {
        /// Operation that failed, e.g. "create directory"
        action: &'static str,
        /// Path the operation targeted
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Mutation targeted an entry that does not exist (any more)
    #[error("no issue matching '{target}' in {}", path.display())]
    NotFound {
        /// Index or text the caller asked for
        target: String,
        /// Checklist file that was searched
        path: PathBuf,
    },

    /// Checklist changed on disk after the mutation that undo would revert
    #[error("{} changed since the last mutation; refusing to undo", path.display())]
    UndoConflict {
        /// Checklist file
        path: PathBuf,
    },
}

impl VoiceIssuesError {
    /// Build a [`VoiceIssuesError::Config`]
    pub fn config(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Config {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Build a [`VoiceIssuesError::Transcription`]
    pub fn transcription(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Transcription {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Build a [`VoiceIssuesError::Persistence`]
    pub fn persistence(
        action: &'static str,
        path: impl Into<PathBuf>,
        source: std::io::Error,
    ) -> Self {
        Self::Persistence {
            action,
            path: path.into(),
            source,
        }
    }
}
