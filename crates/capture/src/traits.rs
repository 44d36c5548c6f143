//! Capture surface binder abstraction

use recorder_shared::{AuthorizationToken, DEFAULT_DENSITY_DPI};

use crate::{CaptureResult, CapturedFrame, InputSurface, SurfaceHandle};

/// Geometry of a virtual capture surface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BindRequest {
    /// Surface width in pixels
    pub width: u32,
    /// Surface height in pixels
    pub height: u32,
    /// Rate at which the mirror should deliver frames
    pub refresh_hint_hz: u32,
    /// Density the screen is mirrored at
    pub density_dpi: u32,
}

impl BindRequest {
    pub fn new(width: u32, height: u32, refresh_hint_hz: u32) -> Self {
        Self {
            width,
            height,
            refresh_hint_hz,
            density_dpi: DEFAULT_DENSITY_DPI,
        }
    }
}

/// Source of screen contents mirrored into a capture surface
pub trait ScreenSource: Send {
    /// Human-readable source name for logs
    fn name(&self) -> &str;

    /// Produce the current screen contents at the given size
    fn next_frame(&mut self, width: u32, height: u32) -> CaptureResult<CapturedFrame>;
}

/// Binds a platform capture surface to an encoder input surface
pub trait CaptureSurfaceBinder: Send + Sync {
    /// Redeem the grant and start mirroring into `surface`.
    ///
    /// The token is consumed whether or not binding succeeds.
    fn bind(
        &self,
        token: AuthorizationToken,
        surface: InputSurface,
        request: BindRequest,
    ) -> CaptureResult<SurfaceHandle>;

    /// Stop frame delivery while keeping the binding. Idempotent.
    fn halt(&self, handle: &mut SurfaceHandle) -> CaptureStats;

    /// Release the binding. Idempotent.
    fn unbind(&self, handle: &mut SurfaceHandle);
}

/// Capture statistics
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CaptureStats {
    /// Frames accepted by the input surface
    pub frames_captured: u64,
    /// Frames dropped because the encoder fell behind
    pub frames_dropped: u64,
    /// Frames the source failed to produce
    pub source_errors: u64,
    /// Measured delivery rate
    pub current_fps: f64,
}
