use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::permission::{Permission, Role};

/// Username of the sentinel account that owns links created without authentication
pub const ANONYMOUS_USERNAME: &str = "anonymous";

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct User {
    pub id: i64,
    pub username: String,
    #[serde(skip_serializing, default)]
    pub password_hash: String,
    #[sqlx(try_from = "i64")]
    pub permissions: Permission,
    /// Linked external chat account, if any
    pub chat_id: Option<i64>,
    pub created_at: i64,
}

impl User {
    pub fn is_anonymous(&self) -> bool {
        self.username == ANONYMOUS_USERNAME
    }

    pub fn role(&self) -> Option<Role> {
        Role::from_permissions(self.permissions)
    }
}
