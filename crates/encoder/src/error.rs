//! Encoder error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EncoderError {
    #[error("Encoder initialization failed: {0}")]
    InitFailed(String),

    #[error("Encoding failed: {0}")]
    EncodingFailed(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unsupported resolution: {width}x{height}")]
    UnsupportedResolution { width: u32, height: u32 },

    #[error("Encoder not initialized")]
    NotInitialized,

    #[error("Pipeline is {actual}, expected {expected}")]
    InvalidState {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Muxer error: {0}")]
    Mux(String),

    #[error("Finalize failed: {0}")]
    FinalizeFailed(String),

    #[error("Timeout waiting for {0}")]
    Timeout(&'static str),

    #[error("Pipeline aborted")]
    Aborted,

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type EncoderResult<T> = Result<T, EncoderError>;
