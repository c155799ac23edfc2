//! Request-scoped identity resolved from a verified session token.

use serde::{Deserialize, Serialize};

use crate::db::UserRecord;
use crate::types::{UserRole, Username};

/// Identity extracted from a verified token.
///
/// Handlers receive this and scope every data access to `id`. It lives for
/// one request and is never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    /// Token subject
    username: Username,
    /// Database id of the user
    id: i64,
    role: UserRole,
}

impl Identity {
    /// Create a new identity.
    pub fn new(username: impl Into<Username>, id: i64, role: UserRole) -> Self {
        Self {
            username: username.into(),
            id,
            role,
        }
    }

    pub fn username(&self) -> &Username {
        &self.username
    }

    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn role(&self) -> UserRole {
        self.role
    }

    /// Check if this identity carries the admin role.
    pub fn is_admin(&self) -> bool {
        self.role.is_admin()
    }
}

impl From<&UserRecord> for Identity {
    fn from(user: &UserRecord) -> Self {
        Self::new(user.username(), user.id, user.role)
    }
}
