//! Salted, iterated SHA-256 password hashing.
//!
//! Stored form: `sha256$<iterations>$<salt b64>$<digest b64>`.

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use thiserror::Error;
use uuid::Uuid;

const SCHEME: &str = "sha256";
pub const DEFAULT_ITERATIONS: u32 = 10_000;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CredentialError {
    #[error("unsupported hash scheme '{0}'")]
    UnsupportedScheme(String),
    #[error("malformed password hash")]
    Malformed,
}

struct StoredHash {
    iterations: u32,
    salt: Vec<u8>,
    digest: Vec<u8>,
}

impl StoredHash {
    fn parse(stored: &str) -> Result<Self, CredentialError> {
        let mut parts = stored.split('$');
        let scheme = parts.next().ok_or(CredentialError::Malformed)?;
        if scheme != SCHEME {
            return Err(CredentialError::UnsupportedScheme(scheme.to_string()));
        }
        let iterations = parts
            .next()
            .and_then(|raw| raw.parse::<u32>().ok())
            .filter(|iterations| *iterations > 0)
            .ok_or(CredentialError::Malformed)?;
        let salt = decode_part(parts.next())?;
        let digest = decode_part(parts.next())?;
        if parts.next().is_some() {
            return Err(CredentialError::Malformed);
        }
        Ok(Self {
            iterations,
            salt,
            digest,
        })
    }
}

fn decode_part(part: Option<&str>) -> Result<Vec<u8>, CredentialError> {
    let part = part.ok_or(CredentialError::Malformed)?;
    STANDARD_NO_PAD
        .decode(part)
        .map_err(|_| CredentialError::Malformed)
}

fn derive(password: &str, salt: &[u8], iterations: u32) -> Vec<u8> {
    let mut hasher = Sha256::new();
    hasher.update(salt);
    hasher.update(password.as_bytes());
    let mut digest = hasher.finalize();
    for _ in 1..iterations {
        let mut hasher = Sha256::new();
        hasher.update(salt);
        hasher.update(digest);
        digest = hasher.finalize();
    }
    digest.to_vec()
}

pub fn hash_password(password: &str) -> String {
    hash_password_with(password, DEFAULT_ITERATIONS)
}

pub fn hash_password_with(password: &str, iterations: u32) -> String {
    let iterations = iterations.max(1);
    let salt = Uuid::new_v4().into_bytes();
    let digest = derive(password, &salt, iterations);
    format!(
        "{SCHEME}${iterations}${}${}",
        STANDARD_NO_PAD.encode(salt),
        STANDARD_NO_PAD.encode(digest)
    )
}

/// Checks `password` against a stored hash without early exit on mismatch.
pub fn verify_password(password: &str, stored: &str) -> Result<bool, CredentialError> {
    let stored = StoredHash::parse(stored)?;
    let candidate = derive(password, &stored.salt, stored.iterations);
    Ok(bool::from(candidate.as_slice().ct_eq(&stored.digest)))
}
