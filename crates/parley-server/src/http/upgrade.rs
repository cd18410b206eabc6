//! `GET /ws`: token handoff and WebSocket upgrade.

use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{Query, State};
use axum::response::Response;
use futures::StreamExt;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::error::ApiError;
use crate::server::AppState;
use crate::websocket::run_connection;

/// Query string of `GET /ws`.
#[derive(Debug, Deserialize)]
pub struct ConnectParams {
    /// One-time token from a login.
    pub token: Option<String>,
}

/// GET /ws?token=...
///
/// The token is consumed only once the request is known to be a valid
/// upgrade, so a malformed request does not burn it. If the handshake fails
/// after that point the login is released.
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(params): Query<ConnectParams>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Result<Response, ApiError> {
    let token = params
        .token
        .filter(|t| !t.is_empty())
        .ok_or(ApiError::MissingToken)?;
    let ws = ws.map_err(|rejection| ApiError::Upgrade {
        status: rejection.status(),
        message: rejection.body_text(),
    })?;
    if state.shutdown.is_shutting_down() {
        return Err(ApiError::ShuttingDown);
    }

    let admission = state.sessions.consume_token(&token)?;
    debug!(user = %admission.name, "token redeemed");

    let user_id = admission.user_id;
    let sessions = state.sessions.clone();
    let ctx = state.connection_context();

    Ok(ws
        .max_message_size(state.config.max_message_size)
        .on_failed_upgrade(move |e| {
            warn!(error = %e, "websocket upgrade failed");
            sessions.release(user_id);
        })
        .on_upgrade(move |socket| async move {
            let (sink, stream) = socket.split();
            let _ = run_connection(sink, stream, admission, ctx).await;
        }))
}
