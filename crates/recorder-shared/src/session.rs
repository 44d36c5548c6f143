//! Session state and recording results

use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::CaptureParameters;

/// Unique identifier of one capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SessionId(pub Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of the capture session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum SessionState {
    /// No session; ready for a new start
    Idle = 0,
    /// Acquiring sink, encoder and capture surface
    Starting = 1,
    /// Frames are flowing into the output
    Capturing = 2,
    /// Finalizing the container and releasing resources
    Stopping = 3,
    /// Unrecoverable error; rolling back to idle
    Failed = 4,
}

impl SessionState {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Inverse of [`SessionState::as_u8`]; unknown values read as `Failed`
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => SessionState::Idle,
            1 => SessionState::Starting,
            2 => SessionState::Capturing,
            3 => SessionState::Stopping,
            _ => SessionState::Failed,
        }
    }

    /// Whether a keep-alive announcement should be visible in this state
    pub fn is_active(self) -> bool {
        matches!(
            self,
            SessionState::Starting | SessionState::Capturing | SessionState::Stopping
        )
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "Idle",
            SessionState::Starting => "Starting",
            SessionState::Capturing => "Capturing",
            SessionState::Stopping => "Stopping",
            SessionState::Failed => "Failed",
        };
        f.write_str(name)
    }
}

/// Whether a recording was finalized cleanly
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutputIntegrity {
    /// Container index and duration written; playable end to end
    Finalized,
    /// Capture or finalize failed; the file may end early or be unplayable
    PossiblyTruncated { reason: String },
}

impl OutputIntegrity {
    pub fn is_finalized(&self) -> bool {
        matches!(self, OutputIntegrity::Finalized)
    }
}

/// Result of a session that reached `Capturing` and was torn down
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordingSummary {
    pub session_id: SessionId,
    pub location: PathBuf,
    pub params: CaptureParameters,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    /// Media duration written to the container, in milliseconds
    pub duration_ms: u64,
    pub frames_encoded: u64,
    pub frames_dropped: u64,
    pub bytes_written: u64,
    pub integrity: OutputIntegrity,
}

/// Snapshot of the controller for status displays
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionStatus {
    pub state: SessionState,
    pub session_id: Option<SessionId>,
    pub output_location: Option<PathBuf>,
    pub params: Option<CaptureParameters>,
    pub started_at: Option<DateTime<Utc>>,
}

impl SessionStatus {
    pub fn idle() -> Self {
        Self {
            state: SessionState::Idle,
            session_id: None,
            output_location: None,
            params: None,
            started_at: None,
        }
    }
}
