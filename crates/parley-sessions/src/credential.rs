//! Salted password digests.
//!
//! Stored form: `<alg>$<salt>$<digest>`, both parts base64 (standard, no
//! padding). The algorithm tag is stored so a hasher can verify credentials
//! produced under a different default.

use base64::Engine;
use base64::engine::general_purpose::STANDARD_NO_PAD;
use parley_settings::HashAlgorithm;
use rand::RngCore;
use sha2::{Digest, Sha256, Sha512};

use crate::errors::CredentialError;

const SALT_LEN: usize = 16;

/// Hashes and verifies passwords with SHA-256 or SHA-512.
#[derive(Clone, Copy, Debug, Default)]
pub struct CredentialHasher {
    algorithm: HashAlgorithm,
}

impl CredentialHasher {
    /// Hasher producing digests with `algorithm`.
    pub fn new(algorithm: HashAlgorithm) -> Self {
        Self { algorithm }
    }

    /// Digest `password` under a fresh random salt.
    pub fn hash(&self, password: &str) -> Result<String, CredentialError> {
        if password.is_empty() {
            return Err(CredentialError::EmptyPassword);
        }
        let mut salt = [0u8; SALT_LEN];
        rand::rng().fill_bytes(&mut salt);
        let digest = digest(self.algorithm, &salt, password);
        Ok(format!(
            "{}${}${}",
            tag(self.algorithm),
            STANDARD_NO_PAD.encode(salt),
            STANDARD_NO_PAD.encode(digest)
        ))
    }

    /// Whether `password` matches a stored credential.
    ///
    /// Malformed stored values never match.
    pub fn verify(&self, password: &str, stored: &str) -> bool {
        match parse(stored) {
            Ok((algorithm, salt, expected)) => {
                constant_time_eq(&digest(algorithm, &salt, password), &expected)
            }
            Err(_) => false,
        }
    }
}

fn tag(algorithm: HashAlgorithm) -> &'static str {
    match algorithm {
        HashAlgorithm::Sha256 => "sha256",
        HashAlgorithm::Sha512 => "sha512",
    }
}

fn digest(algorithm: HashAlgorithm, salt: &[u8], password: &str) -> Vec<u8> {
    match algorithm {
        HashAlgorithm::Sha256 => {
            let mut hasher = Sha256::new();
            hasher.update(salt);
            hasher.update(password.as_bytes());
            hasher.finalize().to_vec()
        }
        HashAlgorithm::Sha512 => {
            let mut hasher = Sha512::new();
            hasher.update(salt);
            hasher.update(password.as_bytes());
            hasher.finalize().to_vec()
        }
    }
}

fn parse(stored: &str) -> Result<(HashAlgorithm, Vec<u8>, Vec<u8>), CredentialError> {
    let mut parts = stored.splitn(3, '$');
    let (Some(alg), Some(salt), Some(digest)) = (parts.next(), parts.next(), parts.next()) else {
        return Err(CredentialError::Malformed);
    };
    let algorithm = match alg {
        "sha256" => HashAlgorithm::Sha256,
        "sha512" => HashAlgorithm::Sha512,
        _ => return Err(CredentialError::Malformed),
    };
    let salt = STANDARD_NO_PAD
        .decode(salt)
        .map_err(|_| CredentialError::Malformed)?;
    let digest = STANDARD_NO_PAD
        .decode(digest)
        .map_err(|_| CredentialError::Malformed)?;
    Ok((algorithm, salt, digest))
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
