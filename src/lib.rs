// Core modules
pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod types;

// Re-export key types and functions
pub use api::{AppState, create_router};
pub use auth::{
    AuthError, Authenticator, CredentialStore, Identity, IdentityResolver, NewUser, TokenCodec,
    TokenResponse, UserStore,
};
pub use config::{AuthSettings, SecretKey};
pub use db::{DatabaseConfig, UserRecord, create_connection, ensure_schema};
pub use types::{UserRole, Username};

use std::sync::Arc;

use anyhow::Result;

/// Convenience function to wire the auth core into a ready-to-serve state.
///
/// Connects to the database, ensures the schema, then builds the shared
/// codec, authenticator and resolver from `settings`.
pub async fn create_app_state(
    db_config: DatabaseConfig,
    settings: &AuthSettings,
) -> Result<AppState> {
    let db = create_connection(db_config).await?;
    ensure_schema(&db).await?;

    let users = UserStore::new(db);
    let codec = Arc::new(TokenCodec::new(settings.secret_key.as_bytes()));
    let authenticator = Authenticator::new(Arc::new(users.clone()), codec.clone(), settings)?;

    Ok(AppState {
        authenticator: Arc::new(authenticator),
        resolver: Arc::new(IdentityResolver::new(codec)),
        users,
    })
}
