//! Credential storage.
//!
//! The auth core talks to user records only through [`CredentialStore`]; the
//! SurrealDB-backed [`UserStore`] is the production implementation and also
//! carries the administrative paths (role changes, deactivation, listing).

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use anyhow::{Result, anyhow};

use crate::db::Db;
use crate::db::schema::{USER_FIELDS, UserCreate, UserRecord};
use crate::types::UserRole;

/// Boxed future returned by [`CredentialStore`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T>> + Send + 'a>>;

/// Read/insert access to user records needed by the authenticator.
pub trait CredentialStore: Send + Sync {
    /// Look up a user by login name.
    fn find_user_by_username<'a>(&'a self, username: &'a str)
    -> StoreFuture<'a, Option<UserRecord>>;

    /// Look up a user by email address.
    fn find_user_by_email<'a>(&'a self, email: &'a str) -> StoreFuture<'a, Option<UserRecord>>;

    /// Insert a new user. The password in `create` is already hashed.
    fn insert_user<'a>(&'a self, create: &'a UserCreate) -> StoreFuture<'a, UserRecord>;
}

/// Insert rejected by a unique index.
///
/// Returned inside the `anyhow::Error` of [`CredentialStore::insert_user`]
/// so callers can tell a lost registration race from a store failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DuplicateUser {
    Username,
    Email,
}

impl DuplicateUser {
    /// Classify a SurrealDB error raised by the `user_username` or
    /// `user_email` index.
    fn from_index_error(err: &surrealdb::Error) -> Option<Self> {
        let msg = err.to_string();
        if !msg.contains("already contains") {
            return None;
        }

        if msg.contains("`user_username`") {
            Some(Self::Username)
        } else if msg.contains("`user_email`") {
            Some(Self::Email)
        } else {
            None
        }
    }
}

impl fmt::Display for DuplicateUser {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Username => write!(f, "Username already registered"),
            Self::Email => write!(f, "Email already registered"),
        }
    }
}

impl std::error::Error for DuplicateUser {}

#[derive(Debug, serde::Deserialize)]
struct IdCounter {
    last_id: i64,
}

/// User store for database operations.
#[derive(Clone)]
pub struct UserStore {
    db: Db,
}

impl UserStore {
    /// Create a new user store.
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    /// Get a user by numeric id.
    pub async fn find_user_by_id(&self, id: i64) -> Result<Option<UserRecord>> {
        let query = format!("SELECT {} FROM type::thing('user', $id)", USER_FIELDS);

        let mut res = self.db.query(query).bind(("id", id)).await?;

        let users: Vec<UserRecord> = res.take(0)?;
        Ok(users.into_iter().next())
    }

    /// List all users ordered by id.
    pub async fn list_users(&self) -> Result<Vec<UserRecord>> {
        let query = format!("SELECT {} FROM user ORDER BY id ASC", USER_FIELDS);

        let mut res = self.db.query(query).await?;

        let users: Vec<UserRecord> = res.take(0)?;
        Ok(users)
    }

    /// Change the role of a user. Returns `false` if no such user exists.
    pub async fn set_role(&self, username: &str, role: UserRole) -> Result<bool> {
        let query = r#"
            UPDATE user SET role = $role
            WHERE username = $username
            RETURN username
        "#;

        let mut res = self
            .db
            .query(query)
            .bind(("username", username.to_string()))
            .bind(("role", role.as_str()))
            .await?;

        let updated: Vec<serde_json::Value> = res.take(0)?;
        Ok(!updated.is_empty())
    }

    /// Activate or deactivate a user. Returns `false` if no such user exists.
    pub async fn set_active(&self, username: &str, is_active: bool) -> Result<bool> {
        let query = r#"
            UPDATE user SET is_active = $is_active
            WHERE username = $username
            RETURN username
        "#;

        let mut res = self
            .db
            .query(query)
            .bind(("username", username.to_string()))
            .bind(("is_active", is_active))
            .await?;

        let updated: Vec<serde_json::Value> = res.take(0)?;
        Ok(!updated.is_empty())
    }

    async fn find_one_by(&self, field: &'static str, value: &str) -> Result<Option<UserRecord>> {
        let query = format!(
            "SELECT {} FROM user WHERE {} = $value LIMIT 1",
            USER_FIELDS, field
        );

        let mut res = self
            .db
            .query(query)
            .bind(("value", value.to_string()))
            .await?;

        let users: Vec<UserRecord> = res.take(0)?;
        Ok(users.into_iter().next())
    }

    /// Allocate the next numeric user id.
    async fn next_user_id(&self) -> Result<i64> {
        let query = r#"
            UPSERT id_counter:user SET last_id = (last_id OR 0) + 1
            RETURN last_id
        "#;

        let mut res = self.db.query(query).await?;

        let counters: Vec<IdCounter> = res.take(0)?;
        counters
            .into_iter()
            .next()
            .map(|c| c.last_id)
            .ok_or_else(|| anyhow!("Failed to allocate user id"))
    }

    async fn create_user(&self, create: &UserCreate) -> Result<UserRecord> {
        let id = self.next_user_id().await?;

        let query = r#"
            CREATE type::thing('user', $id) CONTENT {
                username: $username,
                email: $email,
                first_name: $first_name,
                last_name: $last_name,
                hashed_password: $hashed_password,
                role: $role,
                is_active: true,
                phone_number: $phone_number
            } RETURN username
        "#;

        let mut res = self
            .db
            .query(query)
            .bind(("id", id))
            .bind(("username", create.username.clone()))
            .bind(("email", create.email.clone()))
            .bind(("first_name", create.first_name.clone()))
            .bind(("last_name", create.last_name.clone()))
            .bind(("hashed_password", create.hashed_password.clone()))
            .bind(("role", create.role.as_str()))
            .bind(("phone_number", create.phone_number.clone()))
            .await
            .map_err(insert_error)?;

        // Surfaces unique-index and ASSERT violations.
        let _created: Vec<serde_json::Value> = res.take(0).map_err(insert_error)?;

        self.find_user_by_id(id)
            .await?
            .ok_or_else(|| anyhow!("Failed to create user"))
    }
}

fn insert_error(err: surrealdb::Error) -> anyhow::Error {
    match DuplicateUser::from_index_error(&err) {
        Some(duplicate) => duplicate.into(),
        None => err.into(),
    }
}

impl CredentialStore for UserStore {
    fn find_user_by_username<'a>(
        &'a self,
        username: &'a str,
    ) -> StoreFuture<'a, Option<UserRecord>> {
        Box::pin(self.find_one_by("username", username))
    }

    fn find_user_by_email<'a>(&'a self, email: &'a str) -> StoreFuture<'a, Option<UserRecord>> {
        Box::pin(self.find_one_by("email", email))
    }

    fn insert_user<'a>(&'a self, create: &'a UserCreate) -> StoreFuture<'a, UserRecord> {
        Box::pin(self.create_user(create))
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::db::{DatabaseConfig, create_connection, ensure_schema};

    pub(crate) async fn setup_test_db() -> Db {
        let config = DatabaseConfig {
            url: "memory".to_string(),
            ..Default::default()
        };
        let db = create_connection(config).await.unwrap();
        ensure_schema(&db).await.unwrap();
        db
    }

    pub(crate) fn user_create(username: &str, hashed_password: &str) -> UserCreate {
        UserCreate {
            username: username.to_string(),
            email: format!("{}@example.com", username),
            first_name: "Test".to_string(),
            last_name: "User".to_string(),
            hashed_password: hashed_password.to_string(),
            role: UserRole::User,
            phone_number: Some("(111)-111-1111".to_string()),
        }
    }

    #[tokio::test]
    async fn test_insert_and_find_user() {
        let store = UserStore::new(setup_test_db().await);

        let created = store
            .insert_user(&user_create("alice", "$argon2id$fake"))
            .await
            .unwrap();

        assert_eq!(created.username, "alice");
        assert_eq!(created.email, "alice@example.com");
        assert_eq!(created.role, UserRole::User);
        assert!(created.is_active);

        let found = store.find_user_by_username("alice").await.unwrap().unwrap();
        assert_eq!(found.id, created.id);
        assert_eq!(found.hashed_password, "$argon2id$fake");

        let by_email = store
            .find_user_by_email("alice@example.com")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(by_email.id, created.id);
    }

    #[tokio::test]
    async fn test_find_missing_user() {
        let store = UserStore::new(setup_test_db().await);

        assert!(store.find_user_by_username("nobody").await.unwrap().is_none());
        assert!(store.find_user_by_id(999).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_ids_are_sequential_and_unique() {
        let store = UserStore::new(setup_test_db().await);

        let first = store.insert_user(&user_create("first", "h")).await.unwrap();
        let second = store.insert_user(&user_create("second", "h")).await.unwrap();

        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
    }

    #[tokio::test]
    async fn test_duplicate_username_rejected_by_index() {
        let store = UserStore::new(setup_test_db().await);

        store.insert_user(&user_create("alice", "h")).await.unwrap();

        let mut dup = user_create("alice", "h");
        dup.email = "other@example.com".to_string();
        let err = store.insert_user(&dup).await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<DuplicateUser>(),
            Some(&DuplicateUser::Username)
        );
    }

    #[tokio::test]
    async fn test_duplicate_email_rejected_by_index() {
        let store = UserStore::new(setup_test_db().await);

        store.insert_user(&user_create("alice", "h")).await.unwrap();

        let mut dup = user_create("alice2", "h");
        dup.email = "alice@example.com".to_string();
        let err = store.insert_user(&dup).await.unwrap_err();
        assert_eq!(err.downcast_ref::<DuplicateUser>(), Some(&DuplicateUser::Email));
    }

    #[tokio::test]
    async fn test_empty_hash_rejected_by_schema() {
        let store = UserStore::new(setup_test_db().await);
        let err = store.insert_user(&user_create("alice", "")).await.unwrap_err();
        assert!(err.downcast_ref::<DuplicateUser>().is_none());
    }

    #[tokio::test]
    async fn test_set_role_and_active() {
        let store = UserStore::new(setup_test_db().await);
        store.insert_user(&user_create("bob", "h")).await.unwrap();

        assert!(store.set_role("bob", UserRole::Admin).await.unwrap());
        assert!(!store.set_role("ghost", UserRole::Admin).await.unwrap());

        let bob = store.find_user_by_username("bob").await.unwrap().unwrap();
        assert_eq!(bob.role, UserRole::Admin);

        assert!(store.set_active("bob", false).await.unwrap());
        let bob = store.find_user_by_username("bob").await.unwrap().unwrap();
        assert!(!bob.is_active);
    }

    #[tokio::test]
    async fn test_list_users() {
        let store = UserStore::new(setup_test_db().await);
        store.insert_user(&user_create("a", "h")).await.unwrap();
        store.insert_user(&user_create("b", "h")).await.unwrap();

        let users = store.list_users().await.unwrap();
        let names: Vec<_> = users.iter().map(|u| u.username.as_str()).collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
