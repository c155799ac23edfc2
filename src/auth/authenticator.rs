//! Login, registration, token issuance and refresh.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::auth::context::Identity;
use crate::auth::error::AuthError;
use crate::auth::password::{
    PasswordError, hash_password, hash_password_blocking, verify_password_blocking,
};
use crate::auth::token::{TokenCodec, token_fingerprint};
use crate::auth::user_store::{CredentialStore, DuplicateUser, StoreFuture};
use crate::config::AuthSettings;
use crate::db::schema::{UserCreate, UserRecord};
use crate::types::UserRole;

/// Body returned by the login and refresh endpoints.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
}

impl TokenResponse {
    pub fn bearer(access_token: String) -> Self {
        Self {
            access_token,
            token_type: "bearer".to_string(),
        }
    }
}

/// Registration payload.
///
/// `role` is accepted so that old clients keep working, but it is never
/// honoured: new accounts always start as [`UserRole::User`].
#[derive(Clone, Deserialize)]
pub struct NewUser {
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub password: String,
    #[serde(default)]
    pub phone_number: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
}

impl fmt::Debug for NewUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewUser")
            .field("username", &self.username)
            .field("email", &self.email)
            .field("first_name", &self.first_name)
            .field("last_name", &self.last_name)
            .field("password", &"<redacted>")
            .field("phone_number", &self.phone_number)
            .field("role", &self.role)
            .finish()
    }
}

impl NewUser {
    fn validate(&self) -> Result<(), AuthError> {
        let required = [
            ("username", &self.username),
            ("email", &self.email),
            ("first_name", &self.first_name),
            ("last_name", &self.last_name),
        ];

        for (field, value) in required {
            if value.trim().is_empty() {
                return Err(AuthError::InvalidRequest(format!("{} must not be empty", field)));
            }
        }

        if self.password.is_empty() {
            return Err(AuthError::InvalidRequest(
                "password must not be empty".to_string(),
            ));
        }

        if !self.email.contains('@') {
            return Err(AuthError::InvalidRequest("email is not valid".to_string()));
        }

        Ok(())
    }
}

/// Verifies credentials against the store and issues session tokens.
pub struct Authenticator {
    store: Arc<dyn CredentialStore>,
    codec: Arc<TokenCodec>,
    token_ttl: chrono::Duration,
    lookup_timeout: Duration,
    /// Digest verified on lookup misses so that an unknown username costs
    /// the same as a wrong password.
    dummy_hash: String,
}

impl Authenticator {
    /// Create a new authenticator.
    pub fn new(
        store: Arc<dyn CredentialStore>,
        codec: Arc<TokenCodec>,
        settings: &AuthSettings,
    ) -> Result<Self, AuthError> {
        let dummy_hash = hash_password("timing-equaliser-not-a-real-password")
            .map_err(|e| AuthError::Internal(e.to_string()))?;

        Ok(Self {
            store,
            codec,
            token_ttl: settings.token_ttl_chrono(),
            lookup_timeout: settings.lookup_timeout,
            dummy_hash,
        })
    }

    /// Get reference to the token codec.
    pub fn codec(&self) -> &Arc<TokenCodec> {
        &self.codec
    }

    /// Lifetime of tokens issued by [`login`](Self::login) and
    /// [`refresh`](Self::refresh).
    pub fn token_ttl(&self) -> chrono::Duration {
        self.token_ttl
    }

    /// Check a username/password pair and return the matching user.
    ///
    /// Unknown users, wrong passwords and deactivated accounts all yield
    /// [`AuthError::InvalidCredentials`].
    pub async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<UserRecord, AuthError> {
        let found = self
            .bounded(self.store.find_user_by_username(username))
            .await?;

        let Some(user) = found else {
            let _ = verify_password_blocking(password.to_string(), self.dummy_hash.clone()).await;
            debug!(username, "Login rejected: unknown user");
            return Err(AuthError::InvalidCredentials);
        };

        if !verify_password_blocking(password.to_string(), user.hashed_password.clone()).await {
            debug!(username, "Login rejected: password mismatch");
            return Err(AuthError::InvalidCredentials);
        }

        if !user.is_active {
            debug!(username, "Login rejected: account deactivated");
            return Err(AuthError::InvalidCredentials);
        }

        Ok(user)
    }

    /// Sign a token for `identity` valid for `ttl`.
    pub fn issue_token(
        &self,
        identity: &Identity,
        ttl: chrono::Duration,
    ) -> Result<String, AuthError> {
        self.codec.issue(identity, ttl)
    }

    /// Authenticate and issue a token with the configured lifetime.
    pub async fn login(&self, username: &str, password: &str) -> Result<TokenResponse, AuthError> {
        let user = self.authenticate(username, password).await?;
        let token = self.issue_token(&Identity::from(&user), self.token_ttl)?;

        info!(
            user_id = user.id,
            token = %token_fingerprint(&token),
            "User logged in"
        );

        Ok(TokenResponse::bearer(token))
    }

    /// Exchange a still-valid token for a new one with a full lifetime.
    ///
    /// The presented token goes through the same checks as any protected
    /// request; an expired or forged token is never revived. The new expiry
    /// is always strictly later than the old one.
    pub fn refresh(&self, token: &str) -> Result<TokenResponse, AuthError> {
        let verified = self.codec.verify(token).map_err(|e| {
            debug!(token = %token_fingerprint(token), error = %e, "Refresh rejected");
            AuthError::RefreshRejected
        })?;

        let expires_at =
            (Utc::now().timestamp() + self.token_ttl.num_seconds()).max(verified.expires_at + 1);

        let new_token = self
            .codec
            .issue_until(&verified.identity, expires_at)
            .map_err(|e| {
                warn!(error = %e, "Failed to sign refreshed token");
                AuthError::RefreshRejected
            })?;

        debug!(
            user_id = verified.identity.id(),
            old = %token_fingerprint(token),
            new = %token_fingerprint(&new_token),
            "Token refreshed"
        );

        Ok(TokenResponse::bearer(new_token))
    }

    /// Register a new regular user.
    pub async fn register(&self, new_user: NewUser) -> Result<UserRecord, AuthError> {
        if let Some(requested) = new_user.role.as_deref()
            && requested != UserRole::User.as_str()
        {
            warn!(
                username = %new_user.username,
                requested_role = requested,
                "Ignoring role requested at registration"
            );
        }

        self.provision(new_user, UserRole::User).await
    }

    /// Create an account with an explicit role.
    ///
    /// Reserved for administrative tooling; the public registration path
    /// goes through [`register`](Self::register).
    pub async fn provision(
        &self,
        new_user: NewUser,
        role: UserRole,
    ) -> Result<UserRecord, AuthError> {
        new_user.validate()?;

        let NewUser {
            username,
            email,
            first_name,
            last_name,
            password,
            phone_number,
            ..
        } = new_user;

        if self
            .bounded(self.store.find_user_by_username(&username))
            .await?
            .is_some()
        {
            return Err(AuthError::Conflict(DuplicateUser::Username.to_string()));
        }

        if self
            .bounded(self.store.find_user_by_email(&email))
            .await?
            .is_some()
        {
            return Err(AuthError::Conflict(DuplicateUser::Email.to_string()));
        }

        let hashed_password = hash_password_blocking(password).await.map_err(|e| match e {
            PasswordError::Empty => AuthError::InvalidRequest(e.to_string()),
            PasswordError::Hash(_) => AuthError::Internal(e.to_string()),
        })?;

        let create = UserCreate {
            username,
            email,
            first_name,
            last_name,
            hashed_password,
            role,
            phone_number,
        };

        let user = self.bounded(self.store.insert_user(&create)).await?;

        info!(user_id = user.id, username = %user.username, role = %user.role, "User registered");

        Ok(user)
    }

    /// Run a store operation under the lookup timeout.
    async fn bounded<T>(&self, op: StoreFuture<'_, T>) -> Result<T, AuthError> {
        tokio::time::timeout(self.lookup_timeout, op)
            .await
            .map_err(|_| AuthError::StoreUnavailable("credential store timed out".to_string()))?
            .map_err(AuthError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::user_store::UserStore;
    use crate::auth::user_store::tests::{setup_test_db, user_create};
    use crate::config::SecretKey;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const SECRET: &[u8] = b"0123456789abcdef0123456789abcdef";

    fn settings() -> AuthSettings {
        AuthSettings::new(SecretKey::new(SECRET).unwrap())
    }

    async fn setup() -> (Authenticator, UserStore) {
        let store = UserStore::new(setup_test_db().await);
        let codec = Arc::new(TokenCodec::new(SECRET));
        let auth = Authenticator::new(Arc::new(store.clone()), codec, &settings()).unwrap();
        (auth, store)
    }

    async fn seed_alice(store: &UserStore) -> UserRecord {
        let hash = hash_password("correct").unwrap();
        store.insert_user(&user_create("alice", &hash)).await.unwrap()
    }

    fn new_user(username: &str, password: &str) -> NewUser {
        NewUser {
            username: username.to_string(),
            email: format!("{}@example.com", username),
            first_name: "First".to_string(),
            last_name: "Last".to_string(),
            password: password.to_string(),
            phone_number: None,
            role: None,
        }
    }

    #[tokio::test]
    async fn test_login_returns_token_for_subject() {
        let (auth, store) = setup().await;
        let alice = seed_alice(&store).await;

        let response = auth.login("alice", "correct").await.unwrap();
        assert_eq!(response.token_type, "bearer");

        let verified = auth.codec().verify(&response.access_token).unwrap();
        assert_eq!(verified.identity.username().as_str(), "alice");
        assert_eq!(verified.identity.id(), alice.id);
        assert_eq!(verified.identity.role(), UserRole::User);
    }

    #[tokio::test]
    async fn test_wrong_password_and_unknown_user_look_the_same() {
        let (auth, store) = setup().await;
        seed_alice(&store).await;

        let wrong_password = auth.login("alice", "wrong").await.unwrap_err();
        let unknown_user = auth.login("mallory", "correct").await.unwrap_err();

        assert_eq!(wrong_password, AuthError::InvalidCredentials);
        assert_eq!(wrong_password, unknown_user);
        assert_eq!(wrong_password.public_detail(), unknown_user.public_detail());
        assert_eq!(wrong_password.to_string(), "Incorrect username or password");
    }

    #[tokio::test]
    async fn test_deactivated_user_cannot_login() {
        let (auth, store) = setup().await;
        seed_alice(&store).await;
        store.set_active("alice", false).await.unwrap();

        assert_eq!(
            auth.login("alice", "correct").await.unwrap_err(),
            AuthError::InvalidCredentials
        );
    }

    #[tokio::test]
    async fn test_concurrent_logins_yield_independent_tokens() {
        let (auth, store) = setup().await;
        seed_alice(&store).await;

        let (a, b) = tokio::join!(auth.login("alice", "correct"), auth.login("alice", "correct"));
        let (a, b) = (a.unwrap(), b.unwrap());

        assert!(auth.codec().verify(&a.access_token).is_ok());
        assert!(auth.codec().verify(&b.access_token).is_ok());
    }

    #[tokio::test]
    async fn test_refresh_preserves_identity_and_extends_expiry() {
        let (auth, _store) = setup().await;
        let identity = Identity::new("alice", 7, UserRole::Admin);

        // Even a token issued with the full ttl must come back strictly later.
        for ttl in [chrono::Duration::seconds(30), auth.token_ttl()] {
            let token = auth.issue_token(&identity, ttl).unwrap();
            let original = auth.codec().verify(&token).unwrap();

            let refreshed = auth.refresh(&token).unwrap();
            let renewed = auth.codec().verify(&refreshed.access_token).unwrap();

            assert_eq!(renewed.identity, original.identity);
            assert!(renewed.expires_at > original.expires_at);
        }
    }

    #[tokio::test]
    async fn test_refresh_rejects_expired_token() {
        let (auth, _store) = setup().await;
        let identity = Identity::new("alice", 1, UserRole::User);
        let token = auth
            .issue_token(&identity, chrono::Duration::seconds(-1))
            .unwrap();

        assert_eq!(auth.refresh(&token), Err(AuthError::RefreshRejected));
    }

    #[tokio::test]
    async fn test_refresh_rejects_tampered_and_foreign_tokens() {
        let (auth, _store) = setup().await;
        let identity = Identity::new("alice", 1, UserRole::User);
        let token = auth
            .issue_token(&identity, chrono::Duration::minutes(5))
            .unwrap();

        let sig_start = token.rfind('.').unwrap() + 1;
        let replacement = if token.as_bytes()[sig_start] == b'x' { "y" } else { "x" };
        let mut tampered = token.clone();
        tampered.replace_range(sig_start..sig_start + 1, replacement);

        assert_eq!(auth.refresh(&tampered), Err(AuthError::RefreshRejected));

        let foreign = TokenCodec::new(b"ffffffffffffffffffffffffffffffff")
            .issue(&identity, chrono::Duration::minutes(5))
            .unwrap();
        assert_eq!(auth.refresh(&foreign), Err(AuthError::RefreshRejected));
        assert_eq!(auth.refresh("garbage"), Err(AuthError::RefreshRejected));
    }

    #[tokio::test]
    async fn test_register_hashes_and_defaults_role() {
        let (auth, store) = setup().await;

        let mut payload = new_user("carol", "hunter22");
        payload.role = Some("admin".to_string());

        let user = auth.register(payload).await.unwrap();
        assert_eq!(user.role, UserRole::User);
        assert_ne!(user.hashed_password, "hunter22");
        assert!(user.hashed_password.starts_with("$argon2"));

        let stored = store.find_user_by_username("carol").await.unwrap().unwrap();
        assert_eq!(stored.role, UserRole::User);

        assert!(auth.login("carol", "hunter22").await.is_ok());
    }

    #[tokio::test]
    async fn test_register_conflicts() {
        let (auth, _store) = setup().await;
        auth.register(new_user("dave", "pw")).await.unwrap();

        let same_name = auth.register(new_user("dave", "pw")).await.unwrap_err();
        assert!(matches!(same_name, AuthError::Conflict(_)));

        let mut same_email = new_user("dave2", "pw");
        same_email.email = "dave@example.com".to_string();
        let err = auth.register(same_email).await.unwrap_err();
        assert!(matches!(err, AuthError::Conflict(_)));
    }

    /// Store whose lookups never see existing users, so every registration
    /// reaches the insert as if it had lost a race.
    struct StaleReadStore {
        inner: UserStore,
    }

    impl CredentialStore for StaleReadStore {
        fn find_user_by_username<'a>(
            &'a self,
            _username: &'a str,
        ) -> StoreFuture<'a, Option<UserRecord>> {
            Box::pin(async { Ok(None) })
        }

        fn find_user_by_email<'a>(
            &'a self,
            _email: &'a str,
        ) -> StoreFuture<'a, Option<UserRecord>> {
            Box::pin(async { Ok(None) })
        }

        fn insert_user<'a>(&'a self, create: &'a UserCreate) -> StoreFuture<'a, UserRecord> {
            self.inner.insert_user(create)
        }
    }

    #[tokio::test]
    async fn test_duplicate_caught_at_insert_is_conflict() {
        let store = StaleReadStore {
            inner: UserStore::new(setup_test_db().await),
        };
        let auth = Authenticator::new(
            Arc::new(store),
            Arc::new(TokenCodec::new(SECRET)),
            &settings(),
        )
        .unwrap();

        auth.register(new_user("race", "pw")).await.unwrap();

        let mut same_name = new_user("race", "pw");
        same_name.email = "race2@example.com".to_string();
        assert_eq!(
            auth.register(same_name).await.unwrap_err(),
            AuthError::Conflict("Username already registered".to_string())
        );

        let mut same_email = new_user("race2", "pw");
        same_email.email = "race@example.com".to_string();
        assert_eq!(
            auth.register(same_email).await.unwrap_err(),
            AuthError::Conflict("Email already registered".to_string())
        );
    }

    #[tokio::test]
    async fn test_concurrent_registrations_of_one_username() {
        let (auth, store) = setup().await;

        let auth = &auth;
        let attempt = move |n: usize| {
            let mut payload = new_user("race", "pw");
            payload.email = format!("race{}@example.com", n);
            auth.register(payload)
        };

        let (a, b, c, d) = tokio::join!(attempt(0), attempt(1), attempt(2), attempt(3));
        let results = [a, b, c, d];

        let created = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(created, 1);
        for err in results.iter().filter_map(|r| r.as_ref().err()) {
            assert!(matches!(err, AuthError::Conflict(_)), "got {:?}", err);
        }

        assert_eq!(store.list_users().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_register_validation() {
        let (auth, _store) = setup().await;

        let err = auth.register(new_user("erin", "")).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidRequest(_)));

        let err = auth.register(new_user("", "pw")).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidRequest(_)));

        let mut bad_email = new_user("frank", "pw");
        bad_email.email = "not-an-email".to_string();
        let err = auth.register(bad_email).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidRequest(_)));
    }

    #[tokio::test]
    async fn test_provision_admin() {
        let (auth, _store) = setup().await;

        let admin = auth
            .provision(new_user("denis", "adminpw"), UserRole::Admin)
            .await
            .unwrap();
        assert_eq!(admin.role, UserRole::Admin);

        let token = auth.login("denis", "adminpw").await.unwrap();
        let verified = auth.codec().verify(&token.access_token).unwrap();
        assert!(verified.identity.is_admin());
    }

    #[test]
    fn test_new_user_debug_redacts_password() {
        let debug = format!("{:?}", new_user("gina", "plaintext-secret"));
        assert!(!debug.contains("plaintext-secret"));
        assert!(debug.contains("<redacted>"));
    }

    /// Store whose lookups never finish.
    struct HangingStore {
        calls: AtomicUsize,
    }

    impl CredentialStore for HangingStore {
        fn find_user_by_username<'a>(
            &'a self,
            _username: &'a str,
        ) -> StoreFuture<'a, Option<UserRecord>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(std::future::pending())
        }

        fn find_user_by_email<'a>(
            &'a self,
            _email: &'a str,
        ) -> StoreFuture<'a, Option<UserRecord>> {
            Box::pin(std::future::pending())
        }

        fn insert_user<'a>(&'a self, _create: &'a UserCreate) -> StoreFuture<'a, UserRecord> {
            Box::pin(std::future::pending())
        }
    }

    #[tokio::test]
    async fn test_hung_store_times_out() {
        let store = Arc::new(HangingStore {
            calls: AtomicUsize::new(0),
        });
        let settings = settings().with_lookup_timeout(Duration::from_millis(50));
        let auth = Authenticator::new(
            store.clone(),
            Arc::new(TokenCodec::new(SECRET)),
            &settings,
        )
        .unwrap();

        let err = auth.login("alice", "correct").await.unwrap_err();
        assert!(matches!(err, AuthError::StoreUnavailable(_)));
        assert_eq!(store.calls.load(Ordering::SeqCst), 1);
    }
}
