//! Error types for the shared model

use thiserror::Error;

/// Validation error for shared types
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Unsupported frame rate: {0} (expected 30, 60 or 90)")]
    UnsupportedFrameRate(u32),

    #[error("Unknown quality tier: {0}")]
    UnknownQuality(String),

    #[error("Invalid dimensions: {width}x{height} (must be positive and even)")]
    InvalidDimensions { width: u32, height: u32 },

    #[error("Bitrate must be positive")]
    InvalidBitrate,

    #[error("Missing required field: {0}")]
    MissingField(&'static str),
}

/// Result type alias for shared-model operations
pub type ProtocolResult<T> = Result<T, ProtocolError>;
