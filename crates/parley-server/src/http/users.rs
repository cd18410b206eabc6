//! Account, login, and roster endpoints.

use axum::Json;
use axum::extract::State;
use axum::extract::rejection::JsonRejection;
use axum::http::header::{self, HeaderMap, HeaderName, HeaderValue};
use axum::response::IntoResponse;
use chrono::SecondsFormat;
use parley_sessions::UserId;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::ServerConfig;
use crate::error::ApiError;
use crate::server::AppState;

/// `X-Rate-Limit` response header.
pub const X_RATE_LIMIT: HeaderName = HeaderName::from_static("x-rate-limit");
/// `X-Expires-After` response header.
pub const X_EXPIRES_AFTER: HeaderName = HeaderName::from_static("x-expires-after");

/// Request body for `POST /user` and `POST /user/login`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserCreds {
    /// Account name.
    pub user_name: String,
    /// Plain-text password.
    pub password: String,
}

/// `POST /user` response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateUserResponse {
    /// Registered name.
    pub user_name: String,
    /// Assigned id.
    pub id: UserId,
}

/// `POST /user/login` response.
#[derive(Debug, Clone, Serialize)]
pub struct LoginResponse {
    /// WebSocket URL carrying the one-time token.
    pub url: String,
}

/// `GET /users` response.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveUsersResponse {
    /// Connected participant names, sorted.
    pub active_users: Vec<String>,
}

/// POST /user
pub async fn create_user(
    State(state): State<AppState>,
    body: Result<Json<UserCreds>, JsonRejection>,
) -> Result<Json<CreateUserResponse>, ApiError> {
    let Json(creds) = body?;
    let id = state.sessions.create_user(&creds.user_name, &creds.password)?;
    info!(user = %creds.user_name, %id, "user registered");
    Ok(Json(CreateUserResponse {
        user_name: creds.user_name,
        id,
    }))
}

/// POST /user/login
pub async fn login(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<UserCreds>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(creds) = body?;
    let grant = state.sessions.login(&creds.user_name, &creds.password)?;
    info!(user = %creds.user_name, expires_at = %grant.expires_at, "login granted");

    let request_host = headers.get(header::HOST).and_then(|v| v.to_str().ok());
    let url = format!(
        "{}/ws?token={}",
        ws_base(&state.config, request_host),
        grant.token
    );
    let expires = HeaderValue::try_from(grant.expires_at.to_rfc3339_opts(SecondsFormat::Secs, true))
        .map_err(|_| ApiError::Internal)?;

    Ok((
        [
            (X_RATE_LIMIT, HeaderValue::from(state.config.rate_limit)),
            (X_EXPIRES_AFTER, expires),
        ],
        Json(LoginResponse { url }),
    ))
}

/// GET /users
pub async fn active_users(State(state): State<AppState>) -> Result<Json<ActiveUsersResponse>, ApiError> {
    let active_users = state.hub.active_users().await?;
    Ok(Json(ActiveUsersResponse { active_users }))
}

/// Base of login URLs: configured public URL, else the request's `Host`,
/// else the bind address.
fn ws_base(config: &ServerConfig, request_host: Option<&str>) -> String {
    if let Some(public) = &config.public_url {
        return public.trim_end_matches('/').to_string();
    }
    match request_host {
        Some(host) => format!("ws://{host}"),
        None => format!("ws://{}", config.bind_addr()),
    }
}
