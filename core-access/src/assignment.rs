//! # Language Assignment
//!
//! Maintains the single [`UserLanguageConfig`] record of each user.
//!
//! Assignments come from three places: an administrator (manual), a
//! directory group mapping, or the default alternative given to new users.
//! Automated sources never overwrite a manual assignment. These operations
//! only edit configuration; callers reconcile permissions afterwards.

use crate::error::{AccessError, Result};
use bridge_traits::groups::{GroupMembership, GroupMembershipProvider};
use bridge_traits::time::Clock;
use bridge_traits::users::UserDirectory;
use core_library::models::{
    AlternativeId, AssignmentSource, GroupMapping, PluginConfiguration, UserLanguageConfig,
};
use core_library::store::ConfigurationStore;
use core_library::LibraryError;
use core_runtime::events::{AccessEvent, CoreEvent, EventBus};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Result of [`LanguageAssignmentService::sync_user_from_groups`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GroupSyncOutcome {
    /// No group provider, or the provider could not answer
    Unavailable,
    /// None of the user's groups is mapped
    NoMatchingGroup,
    /// The user has a manual assignment that groups must not override
    ManualAssignmentKept,
    /// The mapped alternative is already assigned
    Unchanged,
    Assigned(Option<AlternativeId>),
}

pub struct LanguageAssignmentService {
    store: Arc<ConfigurationStore>,
    users: Arc<dyn UserDirectory>,
    groups: Option<Arc<dyn GroupMembershipProvider>>,
    clock: Arc<dyn Clock>,
    event_bus: EventBus,
}

impl LanguageAssignmentService {
    pub fn new(
        store: Arc<ConfigurationStore>,
        users: Arc<dyn UserDirectory>,
        clock: Arc<dyn Clock>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            store,
            users,
            groups: None,
            clock,
            event_bus,
        }
    }

    pub fn with_group_provider(mut self, provider: Arc<dyn GroupMembershipProvider>) -> Self {
        self.groups = Some(provider);
        self
    }

    pub fn user_config(&self, user_id: &str) -> Option<UserLanguageConfig> {
        self.store
            .read(|config| config.user_config(user_id).cloned())
    }

    /// Manually assign a user to an alternative, or to the sources with `None`.
    ///
    /// Puts the user under management. Reassigning replaces the existing record.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn assign_user(
        &self,
        user_id: &str,
        alternative_id: Option<AlternativeId>,
    ) -> Result<UserLanguageConfig> {
        self.ensure_host_user(user_id).await?;

        let now = self.clock.now();
        let user_id_owned = user_id.to_string();
        let record = self
            .store
            .modify(move |config| {
                if let Some(id) = alternative_id {
                    if config.alternative(id).is_none() {
                        return Err(LibraryError::not_found("LanguageAlternative", id));
                    }
                }
                Ok(upsert(
                    config,
                    &user_id_owned,
                    UserLanguageConfig {
                        user_id: user_id_owned.clone(),
                        selected_alternative_id: alternative_id,
                        is_plugin_managed: true,
                        manually_set: true,
                        set_by: AssignmentSource::Manual,
                        set_at: now,
                    },
                ))
            })
            .await
            .map_err(|e| match e {
                LibraryError::NotFound { id, .. } => AccessError::AlternativeNotFound {
                    alternative_id: id,
                },
                other => other.into(),
            })?;

        info!(alternative_id = ?alternative_id, "User assigned");
        self.emit(&record);
        Ok(record)
    }

    /// Reset a user to the source libraries and drop the manual flag.
    ///
    /// Returns `false` when the user had no record.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn clear_user_assignment(&self, user_id: &str) -> Result<bool> {
        let now = self.clock.now();
        let user_id_owned = user_id.to_string();
        let cleared = self
            .store
            .try_update(move |config| match config.user_config_mut(&user_id_owned) {
                Some(record) => {
                    record.selected_alternative_id = None;
                    record.manually_set = false;
                    record.set_by = AssignmentSource::Manual;
                    record.set_at = now;
                    true
                }
                None => false,
            })
            .await?;

        if cleared {
            if let Some(record) = self.user_config(user_id) {
                self.emit(&record);
            }
        }
        Ok(cleared)
    }

    /// Turn management on or off for a user, creating the record if needed.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn set_plugin_managed(
        &self,
        user_id: &str,
        managed: bool,
    ) -> Result<UserLanguageConfig> {
        self.ensure_host_user(user_id).await?;

        let now = self.clock.now();
        let user_id_owned = user_id.to_string();
        let record = self
            .store
            .modify(move |config| {
                let record = match config.user_config_mut(&user_id_owned) {
                    Some(record) => {
                        record.is_plugin_managed = managed;
                        record.clone()
                    }
                    None => {
                        let record = UserLanguageConfig {
                            user_id: user_id_owned.clone(),
                            selected_alternative_id: None,
                            is_plugin_managed: managed,
                            manually_set: false,
                            set_by: AssignmentSource::Manual,
                            set_at: now,
                        };
                        config.user_configs.push(record.clone());
                        record
                    }
                };
                Ok(record)
            })
            .await?;

        debug!(managed, "Plugin management updated");
        Ok(record)
    }

    /// Forget a user deleted from the host
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn remove_user(&self, user_id: &str) -> Result<bool> {
        let user_id_owned = user_id.to_string();
        let removed = self
            .store
            .try_update(move |config| {
                let before = config.user_configs.len();
                config.user_configs.retain(|c| c.user_id != user_id_owned);
                config.user_configs.len() != before
            })
            .await?;

        if removed {
            info!("Removed language config of deleted user");
        }
        Ok(removed)
    }

    /// Give a new user the default alternative when auto-management is on.
    ///
    /// Users that already have a record are left alone. A default that no
    /// longer resolves assigns the source libraries.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn apply_default_assignment(
        &self,
        user_id: &str,
    ) -> Result<Option<UserLanguageConfig>> {
        let now = self.clock.now();
        let user_id_owned = user_id.to_string();
        let record = self
            .store
            .modify(move |config| {
                if !config.auto_manage_new_users || config.user_config(&user_id_owned).is_some() {
                    return Ok(None);
                }
                let default = config
                    .default_alternative_id
                    .filter(|id| config.alternative(*id).is_some());
                let record = UserLanguageConfig {
                    user_id: user_id_owned.clone(),
                    selected_alternative_id: default,
                    is_plugin_managed: true,
                    manually_set: false,
                    set_by: AssignmentSource::AutoDefault,
                    set_at: now,
                };
                config.user_configs.push(record.clone());
                Ok(Some(record))
            })
            .await?;

        if let Some(record) = &record {
            info!(alternative_id = ?record.selected_alternative_id, "Default assignment applied");
            self.emit(record);
        }
        Ok(record)
    }

    /// Assign a user from their directory groups.
    ///
    /// The highest-priority mapped group wins; ties go to the mapping listed
    /// first. Manual assignments are never overwritten.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn sync_user_from_groups(&self, user_id: &str) -> Result<GroupSyncOutcome> {
        let Some(provider) = &self.groups else {
            return Ok(GroupSyncOutcome::Unavailable);
        };

        let groups = match provider.user_groups(user_id).await? {
            GroupMembership::Groups(groups) => groups,
            GroupMembership::Unavailable => {
                debug!("Group provider unavailable");
                return Ok(GroupSyncOutcome::Unavailable);
            }
        };

        let now = self.clock.now();
        let user_id_owned = user_id.to_string();
        let (outcome, record) = self
            .store
            .modify(move |config| {
                let Some(mapping) = best_mapping(&config.group_mappings, &groups) else {
                    return Ok((GroupSyncOutcome::NoMatchingGroup, None));
                };
                let alternative_id = mapping
                    .alternative_id
                    .filter(|id| config.alternative(*id).is_some());

                let existing = config.user_config(&user_id_owned);
                match existing {
                    Some(existing) if existing.manually_set => {
                        return Ok((GroupSyncOutcome::ManualAssignmentKept, None));
                    }
                    Some(existing)
                        if existing.selected_alternative_id == alternative_id
                            && existing.set_by == AssignmentSource::Group =>
                    {
                        return Ok((GroupSyncOutcome::Unchanged, None));
                    }
                    _ => {}
                }
                // An explicit opt-out survives group changes
                let is_plugin_managed = existing.map_or(true, |e| e.is_plugin_managed);

                let record = upsert(
                    config,
                    &user_id_owned,
                    UserLanguageConfig {
                        user_id: user_id_owned.clone(),
                        selected_alternative_id: alternative_id,
                        is_plugin_managed,
                        manually_set: false,
                        set_by: AssignmentSource::Group,
                        set_at: now,
                    },
                );
                Ok((GroupSyncOutcome::Assigned(alternative_id), Some(record)))
            })
            .await?;

        if let Some(record) = &record {
            info!(alternative_id = ?record.selected_alternative_id, "Assigned from group mapping");
            self.emit(record);
        }
        Ok(outcome)
    }

    async fn ensure_host_user(&self, user_id: &str) -> Result<()> {
        match self.users.get_user(user_id).await? {
            Some(_) => Ok(()),
            None => Err(AccessError::UserNotFound {
                user_id: user_id.to_string(),
            }),
        }
    }

    fn emit(&self, record: &UserLanguageConfig) {
        self.event_bus
            .emit(CoreEvent::Access(AccessEvent::AssignmentChanged {
                user_id: record.user_id.clone(),
                alternative_id: record.selected_alternative_id.map(|id| id.to_string()),
                set_by: record.set_by.to_string(),
            }))
            .ok();
    }
}

/// Replace the user's record, keeping exactly one per user
fn upsert(
    config: &mut PluginConfiguration,
    user_id: &str,
    record: UserLanguageConfig,
) -> UserLanguageConfig {
    config.user_configs.retain(|c| c.user_id != user_id);
    config.user_configs.push(record.clone());
    record
}

fn best_mapping<'a>(mappings: &'a [GroupMapping], groups: &[String]) -> Option<&'a GroupMapping> {
    mappings
        .iter()
        .filter(|m| groups.iter().any(|g| g.eq_ignore_ascii_case(&m.group_name)))
        .fold(None, |best: Option<&GroupMapping>, m| match best {
            Some(b) if b.priority >= m.priority => Some(b),
            _ => Some(m),
        })
}
