//! Local control API

use axum::body::Bytes;
use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use capture_session::StopOutcome;
use recorder_shared::{AuthorizationRequest, FrameRate, QualityTier};
use serde::Deserialize;
use serde_json::{Value, json};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::error::{ApiError, ApiResult};
use crate::state::AppState;

/// Body of `POST /recording/start`; every field is optional
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct StartRequest {
    pub frame_rate: Option<u32>,
    pub quality: Option<String>,
}

impl StartRequest {
    fn parse(body: &[u8]) -> ApiResult<Self> {
        if body.iter().all(|b| b.is_ascii_whitespace()) {
            return Ok(Self::default());
        }
        serde_json::from_slice(body).map_err(|e| ApiError::MalformedBody(e.to_string()))
    }

    fn resolve(self, defaults: AuthorizationRequest) -> ApiResult<AuthorizationRequest> {
        let frame_rate = match self.frame_rate {
            Some(fps) => FrameRate::try_from(fps)?,
            None => defaults.frame_rate,
        };
        let quality = match self.quality {
            Some(name) => name.parse::<QualityTier>()?,
            None => defaults.quality,
        };
        Ok(AuthorizationRequest {
            frame_rate,
            quality,
        })
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/recording", get(recording_handler))
        .route("/recording/start", post(start_handler))
        .route("/recording/stop", post(stop_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Health check endpoint
async fn health_handler() -> &'static str {
    "OK"
}

/// Current session, last recording and indicator
async fn recording_handler(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "status": state.controller.status(),
        "last_recording": state.controller.last_recording(),
        "announcement": state.announcer.current(),
    }))
}

/// Authorize, then start a session with the granted token
async fn start_handler(
    State(state): State<AppState>,
    body: Bytes,
) -> ApiResult<(StatusCode, Json<Value>)> {
    let request = StartRequest::parse(&body)?.resolve(state.defaults)?;
    info!(
        "Start requested: {} fps, {:?} quality",
        request.frame_rate, request.quality
    );

    let outcome = state.broker.request(request).outcome().await;

    let controller = state.controller.clone();
    let session_id = tokio::task::spawn_blocking(move || controller.start_from_outcome(outcome))
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))??;

    Ok((
        StatusCode::CREATED,
        Json(json!({
            "session_id": session_id,
            "status": state.controller.status(),
        })),
    ))
}

/// Stop a running session; a no-op when nothing is recording
async fn stop_handler(State(state): State<AppState>) -> ApiResult<Json<Value>> {
    let controller = state.controller.clone();
    let outcome = tokio::task::spawn_blocking(move || controller.stop())
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?;

    let body = match outcome {
        StopOutcome::Finished(summary) => json!({ "stopped": true, "recording": summary }),
        StopOutcome::NotCapturing(state) => json!({ "stopped": false, "state": state }),
    };
    Ok(Json(body))
}
