//! Session and credential error types.
//!
//! Display strings are part of the HTTP contract: they are returned verbatim
//! as response bodies.

use thiserror::Error;

/// Failures from [`CredentialHasher`](crate::CredentialHasher).
#[derive(Debug, Error, PartialEq, Eq)]
pub enum CredentialError {
    /// Refused to hash an empty password.
    #[error("empty password provided")]
    EmptyPassword,
    /// Stored credential string is not in `alg$salt$digest` form.
    #[error("malformed credential hash")]
    Malformed,
}

/// Failures from [`SessionRegistry`](crate::SessionRegistry) operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    /// Username or password too short.
    #[error("username must be at least {min_name} characters and password at least {min_password}")]
    InvalidCredentials {
        /// Minimum username length.
        min_name: usize,
        /// Minimum password length.
        min_password: usize,
    },

    /// A user with this name already exists.
    #[error("user already registered")]
    UserAlreadyRegistered,

    /// Unknown user or wrong password.
    #[error("invalid username or password")]
    InvalidUsernameOrPassword,

    /// The user holds an active login.
    #[error("user already logged in")]
    AlreadyLoggedIn,

    /// Token unknown, already consumed, or expired.
    #[error("invalid onetime token")]
    InvalidToken,

    /// Hashing failed.
    #[error(transparent)]
    Credential(#[from] CredentialError),
}

/// Convenience alias for session results.
pub type Result<T> = std::result::Result<T, SessionError>;

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
