//! Host User Enumeration

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// A host user account
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserInfo {
    pub id: String,
    pub name: String,
    /// Host administrator flag, informational only
    pub is_administrator: bool,
}

#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// List every user known to the host
    async fn list_users(&self) -> Result<Vec<UserInfo>>;

    /// Look up a user by id, returning `Ok(None)` when the host has no such user
    async fn get_user(&self, user_id: &str) -> Result<Option<UserInfo>> {
        Ok(self
            .list_users()
            .await?
            .into_iter()
            .find(|user| user.id == user_id))
    }
}
