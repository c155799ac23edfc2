//! Password hashing using Argon2id.
//!
//! Digests are PHC strings (`$argon2id$v=19$...`) that embed their own salt
//! and parameters, so verification needs nothing but the stored string.

use std::fmt;

use argon2::{
    Argon2,
    password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString, rand_core::OsRng},
};

/// Errors from [`hash_password`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PasswordError {
    /// The plaintext was empty
    Empty,
    /// The hasher itself failed
    Hash(String),
}

impl fmt::Display for PasswordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "Password must not be empty"),
            Self::Hash(msg) => write!(f, "Failed to hash password: {}", msg),
        }
    }
}

impl std::error::Error for PasswordError {}

/// Hash a password with a fresh random salt.
///
/// Two calls with the same input return different digests.
pub fn hash_password(password: &str) -> Result<String, PasswordError> {
    if password.is_empty() {
        return Err(PasswordError::Empty);
    }

    let salt = SaltString::generate(&mut OsRng);

    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|hash| hash.to_string())
        .map_err(|e| PasswordError::Hash(e.to_string()))
}

/// Verify a password against a stored digest.
///
/// Returns `false` on mismatch and on a digest that does not parse.
pub fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed_hash) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed_hash)
            .is_ok(),
        Err(_) => false,
    }
}

/// [`hash_password`] on the blocking pool.
pub async fn hash_password_blocking(password: String) -> Result<String, PasswordError> {
    tokio::task::spawn_blocking(move || hash_password(&password))
        .await
        .map_err(|e| PasswordError::Hash(e.to_string()))?
}

/// [`verify_password`] on the blocking pool. A panicked worker counts as a
/// mismatch.
pub async fn verify_password_blocking(password: String, hash: String) -> bool {
    tokio::task::spawn_blocking(move || verify_password(&password, &hash))
        .await
        .unwrap_or(false)
}
