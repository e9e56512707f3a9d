//! Exit codes for the CLI.
//!
//! Each error class gets its own code so scripts driving the tool can tell
//! a bad config from a busy checklist.

use voice_issues::VoiceIssuesError;

/// Exit codes for CLI operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    /// Operation completed successfully
    Success = 0,
    /// General/unspecified error
    GeneralError = 1,
    /// Missing or invalid configuration
    ConfigError = 3,
    /// Speech-to-text engine, model or recording failure
    TranscriptionFailed = 4,
    /// Checklist file could not be read or written
    PersistenceFailed = 5,
    /// Targeted issue does not exist
    NotFound = 6,
    /// Checklist changed since the change undo would revert
    UndoConflict = 7,
}

impl ExitCode {
    /// Convert to i32 for process exit.
    pub const fn as_i32(self) -> i32 {
        self as i32
    }

    /// Code for the first library error in the chain.
    pub fn for_error(err: &anyhow::Error) -> Self {
        let Some(err) = err
            .chain()
            .find_map(|cause| cause.downcast_ref::<VoiceIssuesError>())
        else {
            return Self::GeneralError;
        };
        match err {
            VoiceIssuesError::Config { .. } => Self::ConfigError,
            VoiceIssuesError::Transcription { .. } => Self::TranscriptionFailed,
            VoiceIssuesError::Persistence { .. } => Self::PersistenceFailed,
            VoiceIssuesError::NotFound { .. } => Self::NotFound,
            VoiceIssuesError::UndoConflict { .. } => Self::UndoConflict,
            _ => Self::GeneralError,
        }
    }
}

impl std::fmt::Display for ExitCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Success => write!(f, "success"),
            Self::GeneralError => write!(f, "general error"),
            Self::ConfigError => write!(f, "configuration error"),
            Self::TranscriptionFailed => write!(f, "transcription failed"),
            Self::PersistenceFailed => write!(f, "persistence failed"),
            Self::NotFound => write!(f, "issue not found"),
            Self::UndoConflict => write!(f, "undo conflict"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;

    #[test]
    fn library_errors_map_through_context() {
        let err = Err::<(), _>(VoiceIssuesError::NotFound {
            target: "#3".to_owned(),
            path: "issues.md".into(),
        })
        .context("Failed to mark issue")
        .unwrap_err();
        assert_eq!(ExitCode::for_error(&err), ExitCode::NotFound);
        assert_eq!(ExitCode::for_error(&err).as_i32(), 6);
    }

    #[test]
    fn foreign_errors_are_general() {
        let err = anyhow::anyhow!("stdin closed");
        assert_eq!(ExitCode::for_error(&err), ExitCode::GeneralError);
    }
}
