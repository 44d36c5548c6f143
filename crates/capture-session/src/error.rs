//! Session error types

use capture::CaptureError;
use encoder::EncoderError;
use media_store::SinkError;
use recorder_shared::{GrantId, ProtocolError, SessionState};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Capture authorization denied: {0}")]
    AuthorizationDenied(String),

    #[error("Authorization grant {0} has expired")]
    AuthorizationExpired(GrantId),

    #[error("Authorization grant {0} was already used")]
    AuthorizationReused(GrantId),

    #[error("Encoder configuration failed: {0}")]
    EncoderConfig(EncoderError),

    #[error("Capture surface bind failed: {0}")]
    SurfaceBind(CaptureError),

    #[error("Output sink open failed: {0}")]
    SinkOpen(SinkError),

    #[error("Encoder start failed: {0}")]
    EncoderStart(EncoderError),

    #[error("Keep-alive announcement failed: {0}")]
    KeepAlive(String),

    #[error("Capture failed mid-recording: {0}")]
    MidCaptureFailure(String),

    #[error("Finalize failed: {0}")]
    Finalize(String),

    #[error("A capture session is already active (state: {0})")]
    AlreadyActive(SessionState),

    #[error("Invalid capture parameters: {0}")]
    InvalidParameters(#[from] ProtocolError),

    #[error("Timed out during {phase}")]
    Timeout { phase: &'static str },
}

impl SessionError {
    /// Map an encoder failure during configure
    pub fn encoder_config(e: EncoderError) -> Self {
        match e {
            EncoderError::Timeout(_) => SessionError::Timeout {
                phase: "encoder configure",
            },
            other => SessionError::EncoderConfig(other),
        }
    }

    /// Map an encoder failure during start
    pub fn encoder_start(e: EncoderError) -> Self {
        match e {
            EncoderError::Timeout(_) => SessionError::Timeout {
                phase: "encoder start",
            },
            other => SessionError::EncoderStart(other),
        }
    }

    /// Map a binder failure; an expired grant is an authorization problem
    pub fn surface_bind(e: CaptureError, grant_id: GrantId) -> Self {
        match e {
            CaptureError::GrantExpired => SessionError::AuthorizationExpired(grant_id),
            CaptureError::Timeout(_) => SessionError::Timeout {
                phase: "surface bind",
            },
            other => SessionError::SurfaceBind(other),
        }
    }
}

pub type SessionResult<T> = Result<T, SessionError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeouts_keep_phase() {
        let e = SessionError::encoder_config(EncoderError::Timeout("encoder initialization"));
        assert!(matches!(
            e,
            SessionError::Timeout {
                phase: "encoder configure"
            }
        ));

        let e = SessionError::surface_bind(CaptureError::Timeout("capture source"), GrantId::new());
        assert_eq!(e.to_string(), "Timed out during surface bind");
    }

    #[test]
    fn test_expired_grant_maps_to_authorization() {
        let grant = GrantId::new();
        assert!(matches!(
            SessionError::surface_bind(CaptureError::GrantExpired, grant),
            SessionError::AuthorizationExpired(g) if g == grant
        ));
    }
}
