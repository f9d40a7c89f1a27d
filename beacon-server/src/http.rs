//! Plain HTTP endpoints that sit next to the WebSocket route: health probe,
//! ICE server advertisement, and short-lived token issuance.

use crate::server::AppState;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

pub async fn health_check(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "ok",
        "connections": state.registry.connection_count(),
        "rooms": state.registry.room_count(),
    }))
}

pub async fn ice_servers(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({ "iceServers": &state.config.ice_servers }))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenRequest {
    pub user_id: String,
    #[serde(default)]
    pub room_id: Option<String>,
}

/// Mint a short-lived connection token. Disabled (503) when no signing secret
/// is configured.
pub async fn issue_token(
    State(state): State<AppState>,
    Json(request): Json<TokenRequest>,
) -> Response {
    if request.user_id.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "userId is required" })),
        )
            .into_response();
    }

    match state
        .verifier
        .issue(&request.user_id, request.room_id.as_deref())
    {
        Ok(token) => Json(json!({
            "token": token,
            "expiresIn": state.verifier.ttl().as_secs(),
        }))
        .into_response(),
        Err(e) => {
            warn!(error = %e, "token issuance unavailable");
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "error": "token issuance is not configured" })),
            )
                .into_response()
        }
    }
}
