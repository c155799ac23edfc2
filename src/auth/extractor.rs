//! Authentication extractors for HTTP requests.
//!
//! Handlers take [`CurrentUser`], [`PageUser`] or [`AdminUser`] as an argument
//! and axum runs identity resolution before the handler body. The three
//! differ only in how a failure is rendered.

use std::sync::Arc;

use axum::extract::{FromRef, FromRequestParts};
use axum::http::StatusCode;
use axum::http::header::{LOCATION, SET_COOKIE};
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};
use tracing::debug;

use crate::auth::context::Identity;
use crate::auth::error::AuthError;
use crate::auth::resolver::IdentityResolver;

/// Where page flows send unauthenticated browsers.
pub const LOGIN_PAGE_PATH: &str = "/auth/login-page";

/// `Set-Cookie` value that clears the session cookie.
pub const EXPIRED_ACCESS_TOKEN_COOKIE: &str = "access_token=; Max-Age=0; Path=/; HttpOnly";

/// Identity of an API caller.
///
/// Rejects with a JSON 401 carrying `WWW-Authenticate: Bearer`.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub Identity);

impl<S> FromRequestParts<S> for CurrentUser
where
    Arc<IdentityResolver>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let resolver = Arc::<IdentityResolver>::from_ref(state);
        resolver.resolve_headers(&parts.headers).map(CurrentUser)
    }
}

/// Identity of a browser on a server-rendered page.
///
/// Any resolution failure becomes a redirect to the login page that also
/// drops the stale cookie.
#[derive(Debug, Clone)]
pub struct PageUser(pub Identity);

/// Rejection for [`PageUser`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoginRedirect;

impl IntoResponse for LoginRedirect {
    fn into_response(self) -> Response {
        (
            StatusCode::FOUND,
            [
                (LOCATION, LOGIN_PAGE_PATH),
                (SET_COOKIE, EXPIRED_ACCESS_TOKEN_COOKIE),
            ],
        )
            .into_response()
    }
}

impl<S> FromRequestParts<S> for PageUser
where
    Arc<IdentityResolver>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = LoginRedirect;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let resolver = Arc::<IdentityResolver>::from_ref(state);
        resolver
            .resolve_headers(&parts.headers)
            .map(PageUser)
            .map_err(|e| {
                debug!(path = %parts.uri.path(), reason = %e, "Redirecting to login page");
                LoginRedirect
            })
    }
}

/// Identity of a caller holding the admin role.
#[derive(Debug, Clone)]
pub struct AdminUser(pub Identity);

impl<S> FromRequestParts<S> for AdminUser
where
    Arc<IdentityResolver>: FromRef<S>,
    S: Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let CurrentUser(identity) = CurrentUser::from_request_parts(parts, state).await?;

        if !identity.is_admin() {
            debug!(user_id = identity.id(), "Admin route refused");
            return Err(AuthError::Forbidden);
        }

        Ok(AdminUser(identity))
    }
}
