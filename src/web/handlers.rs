use axum::{body::Bytes, extract::State, http::StatusCode, Json};
use serde::Serialize;
use std::sync::Arc;

use crate::error::{AppError, Result};
use crate::state::AppState;
use crate::webrtc::{SessionDescription, SessionStatus};

/// Health check response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

pub async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Accept a browser offer and answer once candidate gathering is done
///
/// The body is decoded by hand so malformed JSON maps to a 400 carrying the
/// decoder's message.
pub async fn offer(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Json<SessionDescription>> {
    let offer: SessionDescription =
        serde_json::from_slice(&body).map_err(|e| AppError::BadRequest(e.to_string()))?;

    let answer = state.sessions.handle_offer(offer).await?;
    Ok(Json(answer))
}

/// Plain OPTIONS returns 200 with an empty body
pub async fn offer_options() -> StatusCode {
    StatusCode::OK
}

#[derive(Serialize)]
pub struct StatusResponse {
    pub version: &'static str,
    pub session: Option<SessionStatus>,
}

pub async fn status(State(state): State<Arc<AppState>>) -> Json<StatusResponse> {
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION"),
        session: state.sessions.status().await,
    })
}
