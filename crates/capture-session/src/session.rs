//! The capture session aggregate

use std::path::{Path, PathBuf};
use std::time::Instant;

use capture::SurfaceHandle;
use chrono::{DateTime, Utc};
use encoder::EncoderPipeline;
use media_store::SinkHandle;
use recorder_shared::{CaptureParameters, GrantId, SessionId, SessionStatus, SessionState};

/// Resources of one live session.
///
/// Only the controller touches these handles. Each is taken out of its slot
/// exactly once during teardown, so nothing can be released twice.
pub struct CaptureSession {
    pub(crate) id: SessionId,
    pub(crate) grant_id: GrantId,
    pub(crate) params: CaptureParameters,
    pub(crate) started_at: DateTime<Utc>,
    pub(crate) capture_started: Option<Instant>,
    pub(crate) output_location: Option<PathBuf>,
    pub(crate) sink: Option<SinkHandle>,
    pub(crate) encoder: Option<Box<dyn EncoderPipeline>>,
    pub(crate) surface: Option<SurfaceHandle>,
    pub(crate) announced: bool,
}

impl CaptureSession {
    pub(crate) fn new(grant_id: GrantId, params: CaptureParameters) -> Self {
        Self {
            id: SessionId::new(),
            grant_id,
            params,
            started_at: Utc::now(),
            capture_started: None,
            output_location: None,
            sink: None,
            encoder: None,
            surface: None,
            announced: false,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn grant_id(&self) -> GrantId {
        self.grant_id
    }

    pub fn params(&self) -> &CaptureParameters {
        &self.params
    }

    pub fn output_location(&self) -> Option<&Path> {
        self.output_location.as_deref()
    }

    /// Text shown by the keep-alive announcement
    pub fn description(&self) -> String {
        format!(
            "Recording screen {}x{} @ {} fps",
            self.params.width,
            self.params.height,
            self.params.frame_rate.as_u32()
        )
    }

    pub(crate) fn status(&self, state: SessionState) -> SessionStatus {
        SessionStatus {
            state,
            session_id: Some(self.id),
            output_location: self.output_location.clone(),
            params: Some(self.params),
            started_at: Some(self.started_at),
        }
    }

    /// Whether any resource is still held
    pub fn holds_resources(&self) -> bool {
        self.sink.is_some() || self.encoder.is_some() || self.surface.is_some() || self.announced
    }
}

impl std::fmt::Debug for CaptureSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CaptureSession")
            .field("id", &self.id)
            .field("params", &self.params)
            .field("output_location", &self.output_location)
            .field("sink", &self.sink.is_some())
            .field("encoder", &self.encoder.is_some())
            .field("surface", &self.surface)
            .field("announced", &self.announced)
            .finish()
    }
}
