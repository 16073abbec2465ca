use thiserror::Error;

/// Failures a capture cycle or a command can run into. Capture and analysis failures end up
/// inside a failed [ActivityRecord](crate::daemon::storage::entities::ActivityRecord), everything
/// else is reported back to the caller of a command.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RecorderError {
    #[error("Failed to capture screenshot: {0}")]
    CaptureFailed(String),
    #[error("Failed to analyze screenshot: {0}")]
    AnalysisFailed(String),
    #[error("Invalid command: {0}")]
    InvalidCommand(String),
    #[error("Unknown command: {0}")]
    UnknownCommand(String),
    #[error(transparent)]
    InvalidState(#[from] StateError),
    #[error("Failed to write activity data: {0}")]
    StorageWriteFailed(String),
}

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum StateError {
    #[error("Recording is already running")]
    AlreadyRecording,
    #[error("Recording is not running")]
    NotRecording,
}

impl RecorderError {
    pub fn capture(error: impl std::fmt::Display) -> Self {
        Self::CaptureFailed(error.to_string())
    }

    pub fn analysis(error: impl std::fmt::Display) -> Self {
        Self::AnalysisFailed(error.to_string())
    }

    /// Keeps the whole context chain of an [anyhow::Error], which is what makes storage errors
    /// readable on the extension side.
    pub fn storage(error: anyhow::Error) -> Self {
        Self::StorageWriteFailed(format!("{error:#}"))
    }
}
