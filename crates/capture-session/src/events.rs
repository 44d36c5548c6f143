//! Session notifications

use std::sync::Arc;

use recorder_shared::{RecordingSummary, SessionState};

/// Emitted by the controller as sessions progress
#[derive(Debug, Clone)]
pub enum SessionEvent {
    StateChanged {
        from: SessionState,
        to: SessionState,
    },
    /// A session that reached `Capturing` has been torn down
    RecordingFinished(RecordingSummary),
}

/// Called synchronously on the thread performing the transition.
///
/// Callbacks may call `query_state` or `status` but must not call `start` or `stop`.
pub type EventCallback = Arc<dyn Fn(&SessionEvent) + Send + Sync>;
