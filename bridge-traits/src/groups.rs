//! Optional Directory Group Lookup
//!
//! Hosts that integrate with a directory service (typically LDAP) can inject a
//! [`GroupMembershipProvider`] so users are assigned languages from their
//! group membership. The capability is optional: when it is not injected the
//! core simply skips group-driven assignment, and a provider that is wired up
//! but currently offline answers [`GroupMembership::Unavailable`].

use async_trait::async_trait;

use crate::error::Result;

/// Outcome of a group lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupMembership {
    /// Groups the user belongs to
    Groups(Vec<String>),
    /// The backing directory cannot be reached or is not configured
    Unavailable,
}

#[async_trait]
pub trait GroupMembershipProvider: Send + Sync {
    /// Resolve the groups of a host user
    async fn user_groups(&self, user_id: &str) -> Result<GroupMembership>;
}
