//! Record types for the `user` table.

use serde::{Deserialize, Serialize};

use crate::types::{UserRole, Username};

/// Projection used by every user query. Flattens the record id into the
/// numeric key the rest of the application works with.
pub const USER_FIELDS: &str = "record::id(id) AS id, username, email, first_name, last_name, \
     hashed_password, role, is_active, phone_number";

/// Persisted user account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    /// Numeric identifier, unique per user
    pub id: i64,
    /// Login name, unique
    pub username: String,
    /// Contact email, unique
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    /// Argon2 digest in PHC string format
    pub hashed_password: String,
    pub role: UserRole,
    /// Inactive users cannot log in
    pub is_active: bool,
    pub phone_number: Option<String>,
}

impl UserRecord {
    pub fn username(&self) -> Username {
        Username::new(self.username.clone())
    }
}

/// Data needed to insert a user. The password is already hashed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserCreate {
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub hashed_password: String,
    pub role: UserRole,
    pub phone_number: Option<String>,
}

/// Public view of a user, safe to return from the API.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserSummary {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: UserRole,
    pub is_active: bool,
    pub phone_number: Option<String>,
}

impl From<UserRecord> for UserSummary {
    fn from(user: UserRecord) -> Self {
        Self {
            id: user.id,
            username: user.username,
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
            role: user.role,
            is_active: user.is_active,
            phone_number: user.phone_number,
        }
    }
}
