//! User sessions and the one-time connect token handoff.
//!
//! A login mints a token; the streaming endpoint redeems it exactly once.
//! All state lives behind one mutex and no operation does I/O while holding
//! it.

use std::collections::HashMap;
use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Duration, SubsecRound, Utc};
use parking_lot::Mutex;
use parley_settings::AuthSettings;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::credential::CredentialHasher;
use crate::errors::{Result, SessionError};

/// Minimum username length, in characters.
pub const MIN_NAME_LEN: usize = 4;
/// Minimum password length, in characters.
pub const MIN_PASSWORD_LEN: usize = 8;
/// Longest token lifetime honored; larger settings are clamped.
pub const MAX_TOKEN_TTL_SECS: u64 = 7 * 24 * 60 * 60;

/// Stable user identity.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(Uuid);

impl UserId {
    /// Generate a new time-ordered id.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for UserId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Result of a successful login.
#[derive(Clone, Debug)]
pub struct LoginGrant {
    /// Who logged in.
    pub user_id: UserId,
    /// One-time token to present at the streaming endpoint.
    pub token: String,
    /// When the token stops being accepted.
    pub expires_at: DateTime<Utc>,
}

/// Result of redeeming a token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Admission {
    /// Who was admitted.
    pub user_id: UserId,
    /// Display name.
    pub name: String,
}

#[derive(Debug)]
struct PendingToken {
    value: String,
    expires_at: DateTime<Utc>,
}

#[derive(Debug)]
struct Session {
    name: String,
    credential: String,
    logged_in: bool,
    token: Option<PendingToken>,
}

impl Session {
    /// A login whose token expired unredeemed no longer blocks a new login.
    fn holds_login(&self, now: DateTime<Utc>) -> bool {
        match &self.token {
            Some(token) => self.logged_in && token.expires_at > now,
            None => self.logged_in,
        }
    }
}

#[derive(Default)]
struct Inner {
    sessions: HashMap<UserId, Session>,
    by_name: HashMap<String, UserId>,
}

/// Check username/password length rules.
pub fn validate_credentials(name: &str, password: &str) -> Result<()> {
    if name.chars().count() < MIN_NAME_LEN || password.chars().count() < MIN_PASSWORD_LEN {
        return Err(SessionError::InvalidCredentials {
            min_name: MIN_NAME_LEN,
            min_password: MIN_PASSWORD_LEN,
        });
    }
    Ok(())
}

/// Users, their credentials, login state, and pending tokens.
pub struct SessionRegistry {
    hasher: CredentialHasher,
    token_ttl: Duration,
    token_bytes: usize,
    inner: Mutex<Inner>,
}

impl SessionRegistry {
    /// Empty registry configured from `settings`.
    pub fn new(settings: &AuthSettings) -> Self {
        Self {
            hasher: CredentialHasher::new(settings.hash_algorithm),
            token_ttl: Duration::seconds(
                i64::try_from(settings.token_ttl_secs.min(MAX_TOKEN_TTL_SECS)).unwrap_or_default(),
            ),
            token_bytes: settings.token_bytes.max(16),
            inner: Mutex::new(Inner::default()),
        }
    }

    /// Register a new user.
    pub fn create_user(&self, name: &str, password: &str) -> Result<UserId> {
        validate_credentials(name, password)?;
        // hash before taking the lock
        let credential = self.hasher.hash(password)?;

        let mut inner = self.inner.lock();
        if inner.by_name.contains_key(name) {
            return Err(SessionError::UserAlreadyRegistered);
        }
        let id = UserId::new();
        let _ = inner.by_name.insert(name.to_string(), id);
        let _ = inner.sessions.insert(
            id,
            Session {
                name: name.to_string(),
                credential,
                logged_in: false,
                token: None,
            },
        );
        info!(user = name, %id, "user registered");
        Ok(id)
    }

    /// Verify credentials and mint a one-time token.
    ///
    /// Replaces any previous token for the user.
    pub fn login(&self, name: &str, password: &str) -> Result<LoginGrant> {
        validate_credentials(name, password)?;
        let token = self.mint_token();
        let now = Utc::now();
        let expires_at = (now + self.token_ttl).trunc_subsecs(0);

        let mut inner = self.inner.lock();
        let id = *inner
            .by_name
            .get(name)
            .ok_or(SessionError::InvalidUsernameOrPassword)?;
        let session = inner
            .sessions
            .get_mut(&id)
            .ok_or(SessionError::InvalidUsernameOrPassword)?;
        if !self.hasher.verify(password, &session.credential) {
            return Err(SessionError::InvalidUsernameOrPassword);
        }
        if session.holds_login(now) {
            return Err(SessionError::AlreadyLoggedIn);
        }
        session.logged_in = true;
        session.token = Some(PendingToken {
            value: token.clone(),
            expires_at,
        });
        info!(user = name, %expires_at, "login issued token");
        Ok(LoginGrant {
            user_id: id,
            token,
            expires_at,
        })
    }

    /// Redeem a token. Succeeds at most once per token.
    ///
    /// An expired token is cleared and the login it held is released.
    pub fn consume_token(&self, token: &str) -> Result<Admission> {
        let now = Utc::now();
        let mut inner = self.inner.lock();
        let (id, session) = inner
            .sessions
            .iter_mut()
            .find(|(_, s)| s.token.as_ref().is_some_and(|t| t.value == token))
            .ok_or(SessionError::InvalidToken)?;
        let pending = session.token.take().ok_or(SessionError::InvalidToken)?;
        if pending.expires_at <= now {
            session.logged_in = false;
            debug!(user = %session.name, "expired token presented");
            return Err(SessionError::InvalidToken);
        }
        Ok(Admission {
            user_id: *id,
            name: session.name.clone(),
        })
    }

    /// Clear the logged-in flag, typically when the user's connection ends.
    pub fn release(&self, user_id: UserId) {
        let mut inner = self.inner.lock();
        if let Some(session) = inner.sessions.get_mut(&user_id) {
            session.logged_in = false;
            session.token = None;
            debug!(user = %session.name, "session released");
        }
    }

    /// Whether `name` currently holds a login.
    pub fn is_logged_in(&self, name: &str) -> bool {
        let inner = self.inner.lock();
        inner
            .by_name
            .get(name)
            .and_then(|id| inner.sessions.get(id))
            .is_some_and(|s| s.holds_login(Utc::now()))
    }

    /// Number of registered users.
    pub fn user_count(&self) -> usize {
        self.inner.lock().sessions.len()
    }

    fn mint_token(&self) -> String {
        let mut bytes = vec![0u8; self.token_bytes];
        rand::rng().fill_bytes(&mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
