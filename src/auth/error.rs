//! Authentication errors and their HTTP representation.

use std::fmt;

use axum::Json;
use axum::http::{StatusCode, header};
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::auth::user_store::DuplicateUser;

/// Public detail for every token verification failure.
pub const CREDENTIALS_NOT_VALIDATED: &str = "Could not validate credentials";

/// Public detail for a failed login. Never says which field was wrong.
pub const INCORRECT_LOGIN: &str = "Incorrect username or password";

/// Authentication errors.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// No token in the Authorization header or the cookie
    MissingToken,
    /// Malformed, foreign-signed or incomplete token
    InvalidToken(String),
    /// Well-formed token past its expiry
    ExpiredToken,
    /// Unknown username or wrong password
    InvalidCredentials,
    /// Refresh attempted with a token that does not verify
    RefreshRejected,
    /// Authenticated but not allowed to perform the action
    Forbidden,
    /// Username or email already taken
    Conflict(String),
    /// Malformed registration or login payload
    InvalidRequest(String),
    /// Credential store failed or timed out
    StoreUnavailable(String),
    /// Anything else (hashing, signing)
    Internal(String),
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingToken => write!(f, "Not authenticated"),
            Self::InvalidToken(msg) => write!(f, "Invalid token: {}", msg),
            Self::ExpiredToken => write!(f, "Token has expired"),
            Self::InvalidCredentials => write!(f, "{}", INCORRECT_LOGIN),
            Self::RefreshRejected => write!(f, "Could not refresh token"),
            Self::Forbidden => write!(f, "Insufficient privileges"),
            Self::Conflict(msg) => write!(f, "Conflict: {}", msg),
            Self::InvalidRequest(msg) => write!(f, "Invalid request: {}", msg),
            Self::StoreUnavailable(msg) => write!(f, "Credential store unavailable: {}", msg),
            Self::Internal(msg) => write!(f, "Internal error: {}", msg),
        }
    }
}

impl std::error::Error for AuthError {}

impl AuthError {
    /// Whether this is one of the token verification failures.
    pub fn is_token_rejection(&self) -> bool {
        matches!(
            self,
            Self::MissingToken | Self::InvalidToken(_) | Self::ExpiredToken
        )
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::MissingToken
            | Self::InvalidToken(_)
            | Self::ExpiredToken
            | Self::InvalidCredentials
            | Self::RefreshRejected => StatusCode::UNAUTHORIZED,
            Self::Forbidden => StatusCode::FORBIDDEN,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::InvalidRequest(_) => StatusCode::BAD_REQUEST,
            Self::StoreUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The message a client is allowed to see.
    ///
    /// Expired and forged tokens share one message, and store or internal
    /// failures never leak their cause.
    pub fn public_detail(&self) -> String {
        match self {
            Self::InvalidToken(_) | Self::ExpiredToken => CREDENTIALS_NOT_VALIDATED.to_string(),
            Self::StoreUnavailable(_) => "Service temporarily unavailable".to_string(),
            Self::Internal(_) => "Internal server error".to_string(),
            Self::Conflict(msg) | Self::InvalidRequest(msg) => msg.clone(),
            other => other.to_string(),
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        if matches!(self, Self::StoreUnavailable(_) | Self::Internal(_)) {
            tracing::error!("{}", self);
        } else if self.is_token_rejection() {
            tracing::debug!("{}", self);
        }

        let status = self.status_code();
        let body = Json(json!({ "detail": self.public_detail() }));

        if status == StatusCode::UNAUTHORIZED {
            (status, [(header::WWW_AUTHENTICATE, "Bearer")], body).into_response()
        } else {
            (status, body).into_response()
        }
    }
}

impl From<anyhow::Error> for AuthError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast_ref::<DuplicateUser>() {
            Some(duplicate) => Self::Conflict(duplicate.to_string()),
            None => Self::StoreUnavailable(err.to_string()),
        }
    }
}
