//! HTTP error responses.

use axum::extract::rejection::JsonRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use parley_sessions::SessionError;
use thiserror::Error;

use crate::hub::HubError;

/// Errors surfaced by HTTP handlers. Rendered as a status code and a
/// plain-text body.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Account or login failure.
    #[error(transparent)]
    Session(#[from] SessionError),

    /// `GET /ws` without a `token` query parameter.
    #[error("missing onetime token")]
    MissingToken,

    /// The request is not a valid WebSocket upgrade.
    #[error("{message}")]
    Upgrade {
        /// Status chosen by the upgrade extractor.
        status: StatusCode,
        /// Extractor's explanation.
        message: String,
    },

    /// Unparseable request body.
    #[error("{0}")]
    BadRequest(String),

    /// The server is draining and refuses new work.
    #[error("server is shutting down")]
    ShuttingDown,

    /// The hub could not answer.
    #[error(transparent)]
    Hub(#[from] HubError),

    /// Unexpected failure.
    #[error("internal server error")]
    Internal,
}

impl ApiError {
    /// Status code for this error.
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Session(e) => session_status(e),
            Self::MissingToken | Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Upgrade { status, .. } => *status,
            Self::ShuttingDown | Self::Hub(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

fn session_status(err: &SessionError) -> StatusCode {
    match err {
        SessionError::InvalidCredentials { .. } | SessionError::Credential(_) => {
            StatusCode::BAD_REQUEST
        }
        SessionError::UserAlreadyRegistered | SessionError::AlreadyLoggedIn => StatusCode::CONFLICT,
        SessionError::InvalidUsernameOrPassword | SessionError::InvalidToken => {
            StatusCode::UNAUTHORIZED
        }
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self::BadRequest(rejection.body_text())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::warn!(error = %self, %status, "request failed");
        } else {
            tracing::debug!(error = %self, %status, "request rejected");
        }
        (status, self.to_string()).into_response()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
