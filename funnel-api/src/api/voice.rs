//! Voice relay endpoint

use axum::{
    extract::{ws::rejection::WebSocketUpgradeRejection, State, WebSocketUpgrade},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use tracing::info;

use crate::error::ApiError;
use crate::relay;
use crate::AppState;

/// GET /voice
///
/// Plain HTTP requests are refused with 400; a missing upstream key is a
/// server configuration error.
pub async fn voice_socket(
    State(state): State<AppState>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    let Ok(ws) = upgrade else {
        return (StatusCode::BAD_REQUEST, "Expected WebSocket connection").into_response();
    };
    let Some(api_key) = state.voice.api_key.clone() else {
        return ApiError::Misconfigured("OPENAI_API_KEY not configured".to_string()).into_response();
    };

    info!("voice relay: client connected");
    let config = Arc::clone(&state.voice);
    ws.on_upgrade(move |socket| relay::run_session(socket, config, api_key))
}
