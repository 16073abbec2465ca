use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{daemon::storage::entities::ActivityRecord, error::StateError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordingState {
    Idle,
    Recording {
        interval: u64,
        started_at: DateTime<Utc>,
    },
}

/// Counters of the current process, reported by `get_status`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub started_at: Option<DateTime<Utc>>,
    pub successful: usize,
    pub failed: usize,
}

/// In-memory state of the host. Lives as long as the process and is owned by the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionState {
    recording: RecordingState,
    last_capture: Option<DateTime<Utc>>,
    successful: usize,
    failed: usize,
}

impl Default for SessionState {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionState {
    pub fn new() -> Self {
        Self {
            recording: RecordingState::Idle,
            last_capture: None,
            successful: 0,
            failed: 0,
        }
    }

    pub fn recording(&self) -> RecordingState {
        self.recording
    }

    pub fn is_recording(&self) -> bool {
        matches!(self.recording, RecordingState::Recording { .. })
    }

    /// Interval of the running schedule.
    pub fn interval(&self) -> Option<u64> {
        match self.recording {
            RecordingState::Recording { interval, .. } => Some(interval),
            RecordingState::Idle => None,
        }
    }

    pub fn last_capture(&self) -> Option<DateTime<Utc>> {
        self.last_capture
    }

    pub fn start(&mut self, interval: u64, now: DateTime<Utc>) -> Result<(), StateError> {
        if self.is_recording() {
            return Err(StateError::AlreadyRecording);
        }
        self.recording = RecordingState::Recording {
            interval,
            started_at: now,
        };
        Ok(())
    }

    pub fn stop(&mut self) -> Result<(), StateError> {
        if !self.is_recording() {
            return Err(StateError::NotRecording);
        }
        self.recording = RecordingState::Idle;
        Ok(())
    }

    /// Called once the record of a cycle has been stored.
    pub fn record_cycle(&mut self, record: &ActivityRecord) {
        self.last_capture = Some(record.timestamp);
        if record.successful {
            self.successful += 1;
        } else {
            self.failed += 1;
        }
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            started_at: match self.recording {
                RecordingState::Recording { started_at, .. } => Some(started_at),
                RecordingState::Idle => None,
            },
            successful: self.successful,
            failed: self.failed,
        }
    }
}
