//! Per-request identity resolution.
//!
//! The resolver pulls a token out of the request (bearer header first, then
//! the `access_token` cookie) and verifies it locally. It never talks to the
//! credential store, so protected routes cost no database round-trip.

use std::sync::Arc;

use axum::http::HeaderMap;
use axum::http::header::{AUTHORIZATION, COOKIE};
use tracing::debug;

use crate::auth::context::Identity;
use crate::auth::error::AuthError;
use crate::auth::token::{TokenCodec, token_fingerprint};

/// Cookie used by browser page flows.
pub const ACCESS_TOKEN_COOKIE: &str = "access_token";

/// Verifies presented tokens and yields the caller's identity.
#[derive(Debug, Clone)]
pub struct IdentityResolver {
    codec: Arc<TokenCodec>,
}

impl IdentityResolver {
    pub fn new(codec: Arc<TokenCodec>) -> Self {
        Self { codec }
    }

    /// Resolve a raw token into an identity.
    ///
    /// `None` or an empty token is [`AuthError::MissingToken`]; anything that
    /// fails verification is [`AuthError::InvalidToken`] or
    /// [`AuthError::ExpiredToken`].
    pub fn resolve(&self, raw_token: Option<&str>) -> Result<Identity, AuthError> {
        let token = raw_token
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or(AuthError::MissingToken)?;

        match self.codec.verify(token) {
            Ok(verified) => Ok(verified.identity),
            Err(e) => {
                debug!(token = %token_fingerprint(token), error = %e, "Token rejected");
                Err(e)
            }
        }
    }

    /// Resolve the identity carried by a request's headers.
    pub fn resolve_headers(&self, headers: &HeaderMap) -> Result<Identity, AuthError> {
        self.resolve(token_from_headers(headers))
    }
}

/// Token from `Authorization: Bearer <token>`. The scheme is matched
/// case-insensitively.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.trim().split_once(' ')?;

    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }

    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Value of the named cookie, searching every `Cookie` header.
pub fn get_cookie<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.trim().trim_matches('"'))
        .filter(|value| !value.is_empty())
}

/// Token from the bearer header, falling back to the `access_token` cookie.
pub fn token_from_headers(headers: &HeaderMap) -> Option<&str> {
    bearer_token(headers).or_else(|| get_cookie(headers, ACCESS_TOKEN_COOKIE))
}
