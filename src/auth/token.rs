//! Signed session tokens.
//!
//! Tokens are compact HS256 JWTs carrying `{sub, id, role, exp}`. They are
//! stateless: a token is valid exactly when its signature verifies under the
//! process secret and `exp` lies in the future. Nothing is stored server-side.

use std::fmt;

use chrono::{Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::auth::context::Identity;
use crate::auth::error::AuthError;
use crate::types::{TokenFingerprint, UserRole};

/// Signing algorithm for every token this server issues or accepts.
pub const TOKEN_ALGORITHM: Algorithm = Algorithm::HS256;

/// Claims written into an issued token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// Subject (username)
    pub sub: String,
    /// User id
    pub id: i64,
    /// User role
    pub role: String,
    /// Expiration time (Unix timestamp, seconds)
    pub exp: i64,
}

/// Claims as read back from a presented token. `sub` and `id` are checked
/// explicitly so a token that lacks them is rejected even when signed by us.
#[derive(Debug, Deserialize)]
struct PresentedClaims {
    sub: Option<String>,
    id: Option<i64>,
    role: Option<String>,
    exp: i64,
}

/// A token that passed signature and expiry checks.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VerifiedToken {
    pub identity: Identity,
    /// Expiration time (Unix timestamp, seconds)
    pub expires_at: i64,
}

/// Encodes and verifies session tokens with the process-wide secret.
///
/// Immutable after construction; share it behind an `Arc`.
pub struct TokenCodec {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
}

impl fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenCodec")
            .field("algorithm", &TOKEN_ALGORITHM)
            .finish_non_exhaustive()
    }
}

impl TokenCodec {
    /// Create a codec for the given secret.
    pub fn new(secret: &[u8]) -> Self {
        let mut validation = Validation::new(TOKEN_ALGORITHM);
        // Expiry is exact: a token is dead the second `exp` passes.
        validation.leeway = 0;
        validation.validate_exp = true;
        validation.set_required_spec_claims(&["exp"]);

        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
        }
    }

    /// Issue a token for `identity` that expires `ttl` from now.
    ///
    /// A negative `ttl` yields an already-expired token.
    pub fn issue(&self, identity: &Identity, ttl: Duration) -> Result<String, AuthError> {
        let expires_at = Utc::now().timestamp() + ttl.num_seconds();
        self.issue_until(identity, expires_at)
    }

    /// Issue a token for `identity` with an explicit expiry timestamp.
    pub fn issue_until(&self, identity: &Identity, expires_at: i64) -> Result<String, AuthError> {
        let claims = Claims {
            sub: identity.username().to_string(),
            id: identity.id(),
            role: identity.role().to_string(),
            exp: expires_at,
        };

        encode(&Header::new(TOKEN_ALGORITHM), &claims, &self.encoding_key)
            .map_err(|e| AuthError::Internal(format!("Failed to sign token: {}", e)))
    }

    /// Verify signature and expiry, then pull the identity out of the claims.
    pub fn verify(&self, token: &str) -> Result<VerifiedToken, AuthError> {
        let token_data = decode::<PresentedClaims>(token, &self.decoding_key, &self.validation)
            .map_err(|e| match e.kind() {
                ErrorKind::ExpiredSignature => AuthError::ExpiredToken,
                _ => AuthError::InvalidToken(e.to_string()),
            })?;

        let claims = token_data.claims;

        // jsonwebtoken already checked this; with zero leeway the two agree.
        if claims.exp <= Utc::now().timestamp() {
            return Err(AuthError::ExpiredToken);
        }

        let (Some(sub), Some(id)) = (claims.sub, claims.id) else {
            return Err(AuthError::InvalidToken(
                "missing required claims".to_string(),
            ));
        };

        if sub.is_empty() {
            return Err(AuthError::InvalidToken("empty subject".to_string()));
        }

        let role = match claims.role {
            Some(role) => role.parse::<UserRole>().map_err(AuthError::InvalidToken)?,
            None => UserRole::User,
        };

        Ok(VerifiedToken {
            identity: Identity::new(sub, id, role),
            expires_at: claims.exp,
        })
    }
}

/// Short SHA-256 fingerprint of a token for log lines.
pub fn token_fingerprint(token: &str) -> TokenFingerprint {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    TokenFingerprint::new(&digest[..12])
}
