//! # Access Reconciler
//!
//! Rewrites host permissions so each managed user sees the libraries of
//! their language alternative.
//!
//! Only libraries referenced by the configuration (mirror sources and mirror
//! targets) are ever added or removed. Everything else a user can open is
//! preserved as-is. Blanket "all folders" access is replaced by the explicit
//! list of libraries it covered, so non-managed libraries stay visible.
//!
//! Per-user failures during a full pass are logged and collected; they never
//! stop the remaining users from being reconciled.

use crate::error::{AccessError, Result};
use crate::expected::resolve_expected_access;
use bridge_traits::library::LibraryDirectory;
use bridge_traits::permissions::PermissionStore;
use bridge_traits::users::UserDirectory;
use core_library::store::ConfigurationStore;
use core_runtime::events::{AccessEvent, CoreEvent, EventBus};
use futures::stream::{self, StreamExt};
use std::collections::HashSet;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

pub const DEFAULT_RECONCILE_CONCURRENCY: usize = 4;

/// One user whose reconciliation failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserFailure {
    pub user_id: String,
    pub message: String,
}

/// Outcome of [`AccessReconciler::reconcile_all_users`]
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileSummary {
    /// Users whose permissions were rewritten
    pub changed: Vec<String>,
    pub unchanged: usize,
    pub failed: Vec<UserFailure>,
    /// Managed users with no matching host user
    pub unknown_users: Vec<String>,
    /// Users not reached because the pass was cancelled
    pub not_attempted: usize,
}

impl ReconcileSummary {
    pub fn total(&self) -> usize {
        self.changed.len()
            + self.unchanged
            + self.failed.len()
            + self.unknown_users.len()
            + self.not_attempted
    }
}

/// Library ids shared by every user in one pass
struct PassContext {
    live: HashSet<String>,
    managed: HashSet<String>,
}

enum UserOutcome {
    Changed,
    Unchanged,
    Failed(String),
    NotAttempted,
}

pub struct AccessReconciler {
    store: Arc<ConfigurationStore>,
    libraries: Arc<dyn LibraryDirectory>,
    users: Arc<dyn UserDirectory>,
    permissions: Arc<dyn PermissionStore>,
    event_bus: EventBus,
    concurrency: usize,
}

impl AccessReconciler {
    pub fn new(
        store: Arc<ConfigurationStore>,
        libraries: Arc<dyn LibraryDirectory>,
        users: Arc<dyn UserDirectory>,
        permissions: Arc<dyn PermissionStore>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            store,
            libraries,
            users,
            permissions,
            event_bus,
            concurrency: DEFAULT_RECONCILE_CONCURRENCY,
        }
    }

    /// Users reconciled in parallel during a full pass
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Managed library ids the user should see.
    ///
    /// Empty for users the core does not manage; callers must not read that
    /// as "revoke everything".
    pub async fn expected_library_access(&self, user_id: &str) -> Result<HashSet<String>> {
        let live = self.live_library_ids().await?;
        Ok(self
            .store
            .read(|config| resolve_expected_access(config, user_id, Some(&live)))
            .unwrap_or_default())
    }

    /// Bring one user's permissions in line. Returns whether anything changed.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn reconcile_user_access(&self, user_id: &str) -> Result<bool> {
        let context = self.pass_context().await?;
        self.reconcile_with(user_id, &context).await
    }

    /// Reconcile every managed user known to the host.
    #[instrument(skip(self, cancel))]
    pub async fn reconcile_all_users(&self, cancel: &CancellationToken) -> Result<ReconcileSummary> {
        let context = self.pass_context().await?;
        let host_users: HashSet<String> = self
            .users
            .list_users()
            .await?
            .into_iter()
            .map(|user| user.id)
            .collect();

        let managed_users: Vec<String> = self.store.read(|config| {
            config
                .user_configs
                .iter()
                .filter(|user| user.is_plugin_managed)
                .map(|user| user.user_id.clone())
                .collect()
        });

        let mut summary = ReconcileSummary::default();
        let (known, unknown): (Vec<String>, Vec<String>) = managed_users
            .into_iter()
            .partition(|user_id| host_users.contains(user_id));
        for user_id in &unknown {
            debug!(user_id = %user_id, "Managed user has no host account, skipping");
        }
        summary.unknown_users = unknown;

        info!(users = known.len(), concurrency = self.concurrency, "Reconciling user access");

        let context = &context;
        let outcomes: Vec<(String, UserOutcome)> = stream::iter(known)
            .map(|user_id| async move {
                if cancel.is_cancelled() {
                    return (user_id, UserOutcome::NotAttempted);
                }
                let outcome = match self.reconcile_with(&user_id, context).await {
                    Ok(true) => UserOutcome::Changed,
                    Ok(false) => UserOutcome::Unchanged,
                    Err(e) => {
                        warn!(user_id = %user_id, error = %e, "User reconciliation failed");
                        UserOutcome::Failed(e.to_string())
                    }
                };
                (user_id, outcome)
            })
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        for (user_id, outcome) in outcomes {
            match outcome {
                UserOutcome::Changed => summary.changed.push(user_id),
                UserOutcome::Unchanged => summary.unchanged += 1,
                UserOutcome::Failed(message) => summary.failed.push(UserFailure { user_id, message }),
                UserOutcome::NotAttempted => summary.not_attempted += 1,
            }
        }
        summary.changed.sort();

        info!(
            changed = summary.changed.len(),
            unchanged = summary.unchanged,
            failed = summary.failed.len(),
            unknown = summary.unknown_users.len(),
            "User access reconciled"
        );
        Ok(summary)
    }

    /// Add libraries to a user's access without removing anything.
    ///
    /// Users with blanket access already see them and are left untouched.
    #[instrument(skip(self, library_ids), fields(user_id = %user_id))]
    pub async fn add_libraries_to_user_access(
        &self,
        user_id: &str,
        library_ids: &[String],
    ) -> Result<bool> {
        if self.permissions.is_all_folders_enabled(user_id).await? {
            return Ok(false);
        }

        let mut enabled = self.permissions.get_accessible_libraries(user_id).await?;
        let before = enabled.len();
        enabled.extend(library_ids.iter().cloned());
        let added = enabled.len() - before;
        if added == 0 {
            return Ok(false);
        }

        self.permissions
            .set_accessible_libraries(user_id, enabled)
            .await?;
        debug!(added, "Restored library access");
        self.emit(user_id, added, 0);
        Ok(true)
    }

    /// Give each source back to the managed users who should see it again.
    ///
    /// Returns the number of users whose access grew.
    #[instrument(skip(self, source_ids))]
    pub async fn restore_sources(&self, source_ids: &[String]) -> Result<usize> {
        if source_ids.is_empty() {
            return Ok(0);
        }

        let live = self.live_library_ids().await?;
        let affected: Vec<(String, Vec<String>)> = self.store.read(|config| {
            config
                .user_configs
                .iter()
                .filter_map(|user| {
                    let expected = resolve_expected_access(config, &user.user_id, Some(&live))?;
                    let restore: Vec<String> = source_ids
                        .iter()
                        .filter(|id| expected.contains(*id))
                        .cloned()
                        .collect();
                    (!restore.is_empty()).then(|| (user.user_id.clone(), restore))
                })
                .collect()
        });

        let mut restored = 0;
        for (user_id, library_ids) in affected {
            match self.add_libraries_to_user_access(&user_id, &library_ids).await {
                Ok(true) => restored += 1,
                Ok(false) => {}
                Err(e) => warn!(user_id = %user_id, error = %e, "Could not restore source access"),
            }
        }

        info!(users = restored, sources = source_ids.len(), "Restored source access");
        Ok(restored)
    }

    /// Managed users whose expected access includes `library_id`
    pub fn users_expecting(&self, library_id: &str) -> Vec<String> {
        self.store.read(|config| {
            config
                .user_configs
                .iter()
                .filter(|user| {
                    resolve_expected_access(config, &user.user_id, None)
                        .is_some_and(|expected| expected.contains(library_id))
                })
                .map(|user| user.user_id.clone())
                .collect()
        })
    }

    // ========================================================================
    // Internals
    // ========================================================================

    async fn reconcile_with(&self, user_id: &str, context: &PassContext) -> Result<bool> {
        let expected = match self
            .store
            .read(|config| resolve_expected_access(config, user_id, Some(&context.live)))
        {
            Some(expected) => expected,
            None => {
                debug!(user_id = %user_id, "User not managed, permissions left untouched");
                return Ok(false);
            }
        };

        let access = self.permissions.get_user_access(user_id).await?;
        let current = if access.all_folders_enabled {
            context.live.clone()
        } else {
            access.enabled_libraries.clone()
        };

        let desired: HashSet<String> = current
            .iter()
            .filter(|id| !context.managed.contains(*id))
            .cloned()
            .chain(expected)
            .collect();

        if !access.all_folders_enabled && desired == current {
            return Ok(false);
        }

        let added = desired.difference(&current).count();
        let removed = current.difference(&desired).count();

        // Grant the explicit list before dropping blanket access
        self.permissions
            .set_accessible_libraries(user_id, desired)
            .await?;
        if access.all_folders_enabled {
            self.permissions
                .set_all_folders_enabled(user_id, false)
                .await?;
        }

        debug!(user_id = %user_id, added, removed, "User access updated");
        self.emit(user_id, added, removed);
        Ok(true)
    }

    async fn pass_context(&self) -> Result<PassContext> {
        Ok(PassContext {
            live: self.live_library_ids().await?,
            managed: self.store.read(|config| config.managed_library_ids()),
        })
    }

    async fn live_library_ids(&self) -> Result<HashSet<String>> {
        Ok(self
            .libraries
            .list_libraries()
            .await
            .map_err(AccessError::from)?
            .into_iter()
            .map(|library| library.id)
            .collect())
    }

    fn emit(&self, user_id: &str, added: usize, removed: usize) {
        self.event_bus
            .emit(CoreEvent::Access(AccessEvent::UserReconciled {
                user_id: user_id.to_string(),
                added,
                removed,
            }))
            .ok();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::library::{CreateLibraryRequest, LibraryInfo};
    use bridge_traits::users::UserInfo;
    use chrono::Utc;
    use core_library::models::{
        AlternativeId, AssignmentSource, LanguageAlternative, LibraryMirror, MirrorStatus,
        PluginConfiguration, UserLanguageConfig,
    };
    use mockall::mock;
    use mockall::predicate::*;
    use std::path::PathBuf;

    mock! {
        Libraries {}

        #[async_trait]
        impl LibraryDirectory for Libraries {
            async fn list_libraries(&self) -> BridgeResult<Vec<LibraryInfo>>;
            async fn create_library(&self, request: CreateLibraryRequest) -> BridgeResult<String>;
            async fn delete_library(&self, library_id: &str) -> BridgeResult<()>;
        }
    }

    mock! {
        Users {}

        #[async_trait]
        impl UserDirectory for Users {
            async fn list_users(&self) -> BridgeResult<Vec<UserInfo>>;
        }
    }

    mock! {
        Permissions {}

        #[async_trait]
        impl PermissionStore for Permissions {
            async fn get_accessible_libraries(&self, user_id: &str) -> BridgeResult<HashSet<String>>;
            async fn set_accessible_libraries(
                &self,
                user_id: &str,
                library_ids: HashSet<String>,
            ) -> BridgeResult<()>;
            async fn is_all_folders_enabled(&self, user_id: &str) -> BridgeResult<bool>;
            async fn set_all_folders_enabled(&self, user_id: &str, enabled: bool) -> BridgeResult<()>;
        }
    }

    fn ids(values: &[&str]) -> HashSet<String> {
        values.iter().map(|s| s.to_string()).collect()
    }

    fn library(id: &str) -> LibraryInfo {
        LibraryInfo {
            id: id.into(),
            name: id.into(),
            collection_type: None,
            locations: vec![PathBuf::from("/media").join(id)],
        }
    }

    fn libraries(live: &[&'static str]) -> MockLibraries {
        let live: Vec<&'static str> = live.to_vec();
        let mut mock = MockLibraries::new();
        mock.expect_list_libraries()
            .returning(move || Ok(live.iter().map(|id| library(id)).collect()));
        mock
    }

    fn users(ids: &[&'static str]) -> MockUsers {
        let ids: Vec<&'static str> = ids.to_vec();
        let mut mock = MockUsers::new();
        mock.expect_list_users().returning(move || {
            Ok(ids
                .iter()
                .map(|id| UserInfo {
                    id: id.to_string(),
                    name: id.to_string(),
                    is_administrator: false,
                })
                .collect())
        });
        mock
    }

    /// Movies `m1` mirrored in Portuguese as `pt1`; `other` is unmanaged
    fn store(users: &[(&str, bool)]) -> Arc<ConfigurationStore> {
        let mut mirror = LibraryMirror::new("m1", "Movies", "/mirrors/pt/Movies", None);
        mirror.target_library_id = Some("pt1".into());
        mirror.status = MirrorStatus::Synced;
        let portuguese = LanguageAlternative {
            id: AlternativeId::new(),
            name: "Portuguese".into(),
            locale_code: "pt-BR".into(),
            metadata_language: "pt".into(),
            metadata_country: "BR".into(),
            destination_base_path: PathBuf::from("/mirrors/pt"),
            mirrors: vec![mirror],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        let alternative_id = portuguese.id;
        Arc::new(ConfigurationStore::in_memory(PluginConfiguration {
            alternatives: vec![portuguese],
            user_configs: users
                .iter()
                .map(|(id, managed)| UserLanguageConfig {
                    user_id: id.to_string(),
                    selected_alternative_id: Some(alternative_id),
                    is_plugin_managed: *managed,
                    manually_set: true,
                    set_by: AssignmentSource::Manual,
                    set_at: Utc::now(),
                })
                .collect(),
            ..Default::default()
        }))
    }

    fn reconciler(
        store: Arc<ConfigurationStore>,
        libraries: MockLibraries,
        users: MockUsers,
        permissions: MockPermissions,
    ) -> AccessReconciler {
        AccessReconciler::new(
            store,
            Arc::new(libraries),
            Arc::new(users),
            Arc::new(permissions),
            EventBus::new(16),
        )
    }

    #[tokio::test]
    async fn test_swaps_source_for_mirror_and_keeps_unmanaged() {
        let mut permissions = MockPermissions::new();
        permissions
            .expect_is_all_folders_enabled()
            .returning(|_| Ok(false));
        permissions
            .expect_get_accessible_libraries()
            .returning(|_| Ok(ids(&["m1", "other"])));
        permissions
            .expect_set_accessible_libraries()
            .with(eq("ana"), eq(ids(&["pt1", "other"])))
            .times(1)
            .returning(|_, _| Ok(()));
        permissions.expect_set_all_folders_enabled().never();

        let reconciler = reconciler(
            store(&[("ana", true)]),
            libraries(&["m1", "pt1", "other"]),
            users(&["ana"]),
            permissions,
        );

        assert!(reconciler.reconcile_user_access("ana").await.unwrap());
    }

    #[tokio::test]
    async fn test_second_pass_is_a_no_op() {
        let mut permissions = MockPermissions::new();
        permissions
            .expect_is_all_folders_enabled()
            .returning(|_| Ok(false));
        permissions
            .expect_get_accessible_libraries()
            .returning(|_| Ok(ids(&["pt1", "other"])));
        permissions.expect_set_accessible_libraries().never();

        let reconciler = reconciler(
            store(&[("ana", true)]),
            libraries(&["m1", "pt1", "other"]),
            users(&["ana"]),
            permissions,
        );

        assert!(!reconciler.reconcile_user_access("ana").await.unwrap());
    }

    #[tokio::test]
    async fn test_all_folders_is_expanded_then_disabled() {
        let mut permissions = MockPermissions::new();
        permissions
            .expect_is_all_folders_enabled()
            .returning(|_| Ok(true));
        permissions
            .expect_get_accessible_libraries()
            .returning(|_| Ok(HashSet::new()));
        let mut seq = mockall::Sequence::new();
        permissions
            .expect_set_accessible_libraries()
            .with(eq("ana"), eq(ids(&["pt1", "other"])))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));
        permissions
            .expect_set_all_folders_enabled()
            .with(eq("ana"), eq(false))
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(()));

        let reconciler = reconciler(
            store(&[("ana", true)]),
            libraries(&["m1", "pt1", "other"]),
            users(&["ana"]),
            permissions,
        );

        assert!(reconciler.reconcile_user_access("ana").await.unwrap());
    }

    #[tokio::test]
    async fn test_unmanaged_user_is_never_touched() {
        let mut permissions = MockPermissions::new();
        permissions.expect_get_accessible_libraries().never();
        permissions.expect_set_accessible_libraries().never();
        permissions.expect_set_all_folders_enabled().never();

        let reconciler = reconciler(
            store(&[("diego", false)]),
            libraries(&["m1", "pt1"]),
            users(&["diego"]),
            permissions,
        );

        assert!(!reconciler.reconcile_user_access("diego").await.unwrap());
        assert!(!reconciler.reconcile_user_access("nobody").await.unwrap());
        assert!(reconciler
            .expected_library_access("diego")
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_reconcile_all_isolates_failures() {
        let mut permissions = MockPermissions::new();
        permissions
            .expect_is_all_folders_enabled()
            .returning(|_| Ok(false));
        permissions
            .expect_get_accessible_libraries()
            .returning(|_| Ok(ids(&["m1"])));
        permissions
            .expect_set_accessible_libraries()
            .returning(|user_id, _| {
                if user_id == "bad" {
                    Err(bridge_traits::BridgeError::OperationFailed("locked".into()))
                } else {
                    Ok(())
                }
            });

        let reconciler = reconciler(
            store(&[("ana", true), ("bad", true), ("ghost", true), ("diego", false)]),
            libraries(&["m1", "pt1"]),
            users(&["ana", "bad", "diego"]),
            permissions,
        )
        .with_concurrency(2);

        let summary = reconciler
            .reconcile_all_users(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(summary.changed, vec!["ana".to_string()]);
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].user_id, "bad");
        assert_eq!(summary.unknown_users, vec!["ghost".to_string()]);
        assert_eq!(summary.total(), 3);
    }

    #[tokio::test]
    async fn test_reconcile_all_cancelled() {
        let mut permissions = MockPermissions::new();
        permissions.expect_set_accessible_libraries().never();

        let reconciler = reconciler(
            store(&[("ana", true)]),
            libraries(&["m1", "pt1"]),
            users(&["ana"]),
            permissions,
        );
        let cancel = CancellationToken::new();
        cancel.cancel();

        let summary = reconciler.reconcile_all_users(&cancel).await.unwrap();
        assert_eq!(summary.not_attempted, 1);
    }

    #[tokio::test]
    async fn test_add_libraries_is_additive() {
        let mut permissions = MockPermissions::new();
        permissions
            .expect_is_all_folders_enabled()
            .returning(|_| Ok(false));
        permissions
            .expect_get_accessible_libraries()
            .returning(|_| Ok(ids(&["other"])));
        permissions
            .expect_set_accessible_libraries()
            .with(eq("ana"), eq(ids(&["other", "m1"])))
            .times(1)
            .returning(|_, _| Ok(()));

        let reconciler = reconciler(
            store(&[("ana", true)]),
            libraries(&["m1"]),
            users(&["ana"]),
            permissions,
        );

        assert!(reconciler
            .add_libraries_to_user_access("ana", &["m1".to_string(), "other".to_string()])
            .await
            .unwrap());
    }
}
