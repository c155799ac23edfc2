// REST API for the auth core

use std::fmt;
use std::sync::Arc;

use axum::{
    Form, Router,
    extract::{
        FromRef, State,
        rejection::{FormRejection, JsonRejection},
    },
    http::{HeaderMap, StatusCode, header::SET_COOKIE},
    response::{IntoResponse, Json},
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::auth::{
    AdminUser, AuthError, Authenticator, CurrentUser, EXPIRED_ACCESS_TOKEN_COOKIE, Identity,
    IdentityResolver, NewUser, TokenResponse, UserStore, bearer_token,
};
use crate::db::UserSummary;
use crate::types::UserRole;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub authenticator: Arc<Authenticator>,
    pub resolver: Arc<IdentityResolver>,
    pub users: UserStore,
}

impl FromRef<AppState> for Arc<IdentityResolver> {
    fn from_ref(state: &AppState) -> Self {
        state.resolver.clone()
    }
}

impl FromRef<AppState> for Arc<Authenticator> {
    fn from_ref(state: &AppState) -> Self {
        state.authenticator.clone()
    }
}

impl FromRef<AppState> for UserStore {
    fn from_ref(state: &AppState) -> Self {
        state.users.clone()
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/healthy", get(health_check))
        .route("/auth/", post(register_user))
        .route("/auth/token", post(login_for_access_token))
        .route("/auth/refresh", post(refresh_access_token))
        .route("/auth/me", get(current_user))
        .route("/auth/logout", post(logout))
        .route("/admin/users", get(list_users))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(state)
}

/// Login form fields, as sent by OAuth2 password-flow clients.
#[derive(Deserialize)]
pub struct LoginForm {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for LoginForm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoginForm")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Body returned after a successful registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredUser {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub role: UserRole,
}

async fn health_check() -> Json<Value> {
    Json(serde_json::json!({ "status": "Healthy" }))
}

async fn register_user(
    State(authenticator): State<Arc<Authenticator>>,
    payload: Result<Json<NewUser>, JsonRejection>,
) -> Result<(StatusCode, Json<RegisteredUser>), AuthError> {
    let Json(new_user) = payload.map_err(|e| AuthError::InvalidRequest(e.body_text()))?;
    let user = authenticator.register(new_user).await?;

    Ok((
        StatusCode::CREATED,
        Json(RegisteredUser {
            id: user.id,
            username: user.username,
            email: user.email,
            role: user.role,
        }),
    ))
}

async fn login_for_access_token(
    State(authenticator): State<Arc<Authenticator>>,
    form: Result<Form<LoginForm>, FormRejection>,
) -> Result<Json<TokenResponse>, AuthError> {
    let Form(form) = form.map_err(|e| AuthError::InvalidRequest(e.body_text()))?;
    let token = authenticator.login(&form.username, &form.password).await?;
    Ok(Json(token))
}

async fn refresh_access_token(
    State(authenticator): State<Arc<Authenticator>>,
    headers: HeaderMap,
) -> Result<Json<TokenResponse>, AuthError> {
    let token = bearer_token(&headers).ok_or(AuthError::RefreshRejected)?;
    Ok(Json(authenticator.refresh(token)?))
}

async fn current_user(CurrentUser(identity): CurrentUser) -> Json<Identity> {
    Json(identity)
}

/// Clears the browser cookie. Issued tokens stay valid until they expire.
async fn logout() -> impl IntoResponse {
    (
        StatusCode::NO_CONTENT,
        [(SET_COOKIE, EXPIRED_ACCESS_TOKEN_COOKIE)],
    )
}

async fn list_users(
    AdminUser(admin): AdminUser,
    State(users): State<UserStore>,
) -> Result<Json<Vec<UserSummary>>, AuthError> {
    let records = users.list_users().await?;
    info!(admin_id = admin.id(), count = records.len(), "Listed users");

    Ok(Json(records.into_iter().map(UserSummary::from).collect()))
}
