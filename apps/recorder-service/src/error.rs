//! HTTP error responses

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use capture_session::SessionError;
use recorder_shared::ProtocolError;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error(transparent)]
    Session(#[from] SessionError),

    #[error("Invalid request: {0}")]
    InvalidRequest(#[from] ProtocolError),

    #[error("Malformed body: {0}")]
    MalformedBody(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Session(e) => match e {
                SessionError::AlreadyActive(_) => StatusCode::CONFLICT,
                SessionError::AuthorizationDenied(_) => StatusCode::FORBIDDEN,
                SessionError::AuthorizationExpired(_) | SessionError::AuthorizationReused(_) => {
                    StatusCode::GONE
                }
                SessionError::InvalidParameters(_) => StatusCode::UNPROCESSABLE_ENTITY,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            ApiError::InvalidRequest(_) => StatusCode::UNPROCESSABLE_ENTITY,
            ApiError::MalformedBody(_) => StatusCode::BAD_REQUEST,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Stable machine-readable name of the failure
    pub fn kind(&self) -> &'static str {
        match self {
            ApiError::Session(e) => match e {
                SessionError::AuthorizationDenied(_) => "authorization_denied",
                SessionError::AuthorizationExpired(_) => "authorization_expired",
                SessionError::AuthorizationReused(_) => "authorization_reused",
                SessionError::EncoderConfig(_) => "encoder_config",
                SessionError::SurfaceBind(_) => "surface_bind",
                SessionError::SinkOpen(_) => "sink_open",
                SessionError::EncoderStart(_) => "encoder_start",
                SessionError::KeepAlive(_) => "keep_alive",
                SessionError::MidCaptureFailure(_) => "mid_capture_failure",
                SessionError::Finalize(_) => "finalize",
                SessionError::AlreadyActive(_) => "already_active",
                SessionError::InvalidParameters(_) => "invalid_parameters",
                SessionError::Timeout { .. } => "timeout",
            },
            ApiError::InvalidRequest(_) => "invalid_parameters",
            ApiError::MalformedBody(_) => "malformed_body",
            ApiError::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = Json(json!({
            "error": self.to_string(),
            "kind": self.kind(),
        }));
        (status, body).into_response()
    }
}

pub type ApiResult<T> = Result<T, ApiError>;
