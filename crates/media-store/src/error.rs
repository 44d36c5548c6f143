//! Sink error types

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Output location unavailable: {path}: {source}")]
    LocationUnavailable {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Unsupported MIME type: {0}")]
    UnsupportedMimeType(String),

    #[error("No free output name for {0}")]
    NamesExhausted(String),

    #[error("Sink already closed")]
    AlreadyClosed,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type SinkResult<T> = Result<T, SinkError>;
