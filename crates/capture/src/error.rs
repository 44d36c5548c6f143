//! Capture error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("Screen capture not available")]
    NotAvailable,

    #[error("Capture grant expired")]
    GrantExpired,

    #[error("Invalid surface size: {width}x{height}")]
    InvalidSize { width: u32, height: u32 },

    #[error("Frame size {frame_width}x{frame_height} does not match surface {width}x{height}")]
    SizeMismatch {
        frame_width: u32,
        frame_height: u32,
        width: u32,
        height: u32,
    },

    #[error("Capture initialization failed: {0}")]
    InitFailed(String),

    #[error("Frame capture failed: {0}")]
    CaptureFailed(String),

    #[error("Input surface closed")]
    SurfaceClosed,

    #[error("Surface already released")]
    AlreadyReleased,

    #[error("Timeout waiting for {0}")]
    Timeout(&'static str),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type CaptureResult<T> = Result<T, CaptureError>;
