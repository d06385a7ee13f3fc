//! Per-User Library Permissions
//!
//! The host stores, for each user, either a blanket "all folders" grant or an
//! explicit set of accessible library ids. The core only ever narrows the
//! blanket grant into an explicit set and edits the ids it manages.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::Result;

/// Current access state of a user
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserAccess {
    /// User sees every library regardless of `enabled_libraries`
    pub all_folders_enabled: bool,
    /// Explicitly granted library ids
    pub enabled_libraries: HashSet<String>,
}

/// Permission store trait
///
/// # Example
///
/// ```ignore
/// use bridge_traits::permissions::PermissionStore;
///
/// async fn grant(store: &dyn PermissionStore, user: &str, library: &str) -> Result<()> {
///     let mut ids = store.get_accessible_libraries(user).await?;
///     ids.insert(library.to_string());
///     store.set_accessible_libraries(user, ids).await
/// }
/// ```
#[async_trait]
pub trait PermissionStore: Send + Sync {
    /// Read the explicit set of library ids a user may access
    async fn get_accessible_libraries(&self, user_id: &str) -> Result<HashSet<String>>;

    /// Replace the explicit set of library ids a user may access
    async fn set_accessible_libraries(&self, user_id: &str, library_ids: HashSet<String>)
        -> Result<()>;

    /// Whether the user currently has blanket access to every library
    async fn is_all_folders_enabled(&self, user_id: &str) -> Result<bool>;

    /// Enable or disable blanket access to every library
    async fn set_all_folders_enabled(&self, user_id: &str, enabled: bool) -> Result<()>;

    /// Read the full access state in one call
    async fn get_user_access(&self, user_id: &str) -> Result<UserAccess> {
        Ok(UserAccess {
            all_folders_enabled: self.is_all_folders_enabled(user_id).await?,
            enabled_libraries: self.get_accessible_libraries(user_id).await?,
        })
    }
}
