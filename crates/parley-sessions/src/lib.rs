//! # parley-sessions
//!
//! User accounts and the login-to-stream handoff.
//!
//! - [`SessionRegistry`]: signup, login, one-time token redemption, release
//! - [`CredentialHasher`]: salted SHA-256/SHA-512 password digests

#![deny(unsafe_code)]

pub mod credential;
pub mod errors;
pub mod registry;

pub use credential::CredentialHasher;
pub use errors::{CredentialError, Result, SessionError};
pub use registry::{
    Admission, LoginGrant, MIN_NAME_LEN, MIN_PASSWORD_LEN, SessionRegistry, UserId,
    validate_credentials,
};
