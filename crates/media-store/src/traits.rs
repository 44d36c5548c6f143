//! Output sink abstraction

use std::fs::File;
use std::path::{Path, PathBuf};

use recorder_shared::WritableStream;
use tracing::warn;
use uuid::Uuid;

use crate::SinkResult;

/// Lifecycle of a [`SinkHandle`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkState {
    Open,
    Closed,
    Discarded,
}

/// Owned destination of one recording
#[derive(Debug)]
pub struct SinkHandle {
    id: Uuid,
    location: PathBuf,
    staging: PathBuf,
    mime_type: String,
    file: Option<File>,
    state: SinkState,
}

impl SinkHandle {
    /// Wrap an opened staging file that will be published at `location`
    pub fn new(location: PathBuf, staging: PathBuf, mime_type: &str, file: File) -> Self {
        Self {
            id: Uuid::new_v4(),
            location,
            staging,
            mime_type: mime_type.to_string(),
            file: Some(file),
            state: SinkState::Open,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Where the artifact lives once closed
    pub fn location(&self) -> &Path {
        &self.location
    }

    /// Where bytes go while the sink is open
    pub fn staging(&self) -> &Path {
        &self.staging
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn state(&self) -> SinkState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == SinkState::Open
    }

    pub fn file(&self) -> Option<&File> {
        self.file.as_ref()
    }

    /// Mark an open handle finished and hand back its file; `None` once finished
    pub fn finish(&mut self, state: SinkState) -> Option<File> {
        let file = self.file.take()?;
        self.state = state;
        Some(file)
    }
}

impl Drop for SinkHandle {
    fn drop(&mut self) {
        if self.state == SinkState::Open {
            warn!(
                "Sink {} dropped while open, staged bytes left at {}",
                self.id,
                self.staging.display()
            );
        }
    }
}

/// Destination for recorded media.
///
/// `close` and `discard` are idempotent per handle. Closing a sink that never
/// received a byte leaves nothing behind.
pub trait OutputSink: Send + Sync {
    /// Reserve a collision-free location derived from `suggested_name`
    fn open(&self, suggested_name: &str, mime_type: &str) -> SinkResult<(SinkHandle, PathBuf)>;

    /// Independent writer positioned at the start of the staged artifact
    fn writable_stream(&self, handle: &SinkHandle) -> SinkResult<Box<dyn WritableStream>>;

    /// Publish the artifact; returns the bytes written
    fn close(&self, handle: &mut SinkHandle) -> SinkResult<u64>;

    /// Keep the bytes of an artifact that may be incomplete under a name
    /// players will not pick up (see [`truncated_path`](crate::truncated_path))
    fn close_truncated(&self, handle: &mut SinkHandle) -> SinkResult<u64>;

    /// Remove the staged artifact
    fn discard(&self, handle: &mut SinkHandle) -> SinkResult<()>;
}
