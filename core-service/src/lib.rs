//! Core service façade and bootstrap helpers.
//!
//! This crate wires host-provided bridge implementations (libraries, users,
//! permissions, filesystem, configuration storage) into the language mirror
//! engines and exposes them as a single [`PolyglotService`]. Hosts running on
//! a regular operating system typically enable the `desktop-shims` feature,
//! which supplies the tokio filesystem and JSON configuration file adapters
//! from `bridge-desktop`.
//!
//! Structural changes (mirror created or deleted, assignment changed, orphan
//! cleanup) are followed by a permission reconciliation so users always see
//! the libraries of their language.
//!
//! ## Lifecycle
//!
//! [`PolyglotService::start`] subscribes to the event bus and spawns the host
//! event loop plus the optional periodic orphan sweep.
//! [`PolyglotService::stop`] cancels in-flight work, waits for the tasks to
//! finish and only then releases the subscription.

pub mod error;
mod lifecycle;

pub use error::{Result, ServiceError};

use bridge_traits::library::LibraryDirectory;
use core_access::{
    AccessReconciler, GroupSyncOutcome, LanguageAssignmentService, ReconcileSummary,
};
use core_library::{
    AlternativeId, AlternativeRepository, ConfigurationStore, LanguageAlternative, LibraryMirror,
    MirrorId, NewAlternative, PluginConfiguration, UserLanguageConfig,
};
use core_runtime::config::CoreConfig;
use core_runtime::events::{CoreEvent, EventBus, EventStream, HostEvent};
use core_sync::{MirrorSyncEngine, OrphanCleanupResult, OrphanDetector, SyncAllSummary, SyncKind, SyncReport};
use lifecycle::Lifecycle;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

struct Inner {
    config: CoreConfig,
    store: Arc<ConfigurationStore>,
    repository: Arc<AlternativeRepository>,
    engine: Arc<MirrorSyncEngine>,
    orphans: OrphanDetector,
    reconciler: AccessReconciler,
    assignments: LanguageAssignmentService,
    event_bus: EventBus,
    lifecycle: Mutex<Option<Lifecycle>>,
}

/// Primary façade exposed to host applications.
#[derive(Clone)]
pub struct PolyglotService {
    inner: Arc<Inner>,
}

impl PolyglotService {
    /// Create a service from a validated configuration.
    ///
    /// The plugin configuration is loaded from the injected persistence, or
    /// starts empty and in memory when there is none.
    pub async fn new(config: CoreConfig) -> Result<Self> {
        config.validate()?;

        let store = Arc::new(match &config.configuration_persistence {
            Some(persistence) => ConfigurationStore::load(Arc::clone(persistence)).await?,
            None => ConfigurationStore::in_memory(PluginConfiguration::default()),
        });
        let event_bus = EventBus::new(config.settings.event_buffer_size);

        let repository = Arc::new(AlternativeRepository::new(
            Arc::clone(&store),
            Arc::clone(&config.clock),
        ));
        let engine = Arc::new(MirrorSyncEngine::new(
            Arc::clone(&repository),
            Arc::clone(&config.library_directory),
            Arc::clone(&config.file_system),
            event_bus.clone(),
        ));
        let orphans = OrphanDetector::new(
            Arc::clone(&repository),
            Arc::clone(&config.library_directory),
            engine.clone(),
            event_bus.clone(),
        );
        let reconciler = AccessReconciler::new(
            Arc::clone(&store),
            Arc::clone(&config.library_directory),
            Arc::clone(&config.user_directory),
            Arc::clone(&config.permission_store),
            event_bus.clone(),
        )
        .with_concurrency(config.settings.reconcile_concurrency);

        let mut assignments = LanguageAssignmentService::new(
            Arc::clone(&store),
            Arc::clone(&config.user_directory),
            Arc::clone(&config.clock),
            event_bus.clone(),
        );
        if config.features.enable_group_assignment {
            if let Some(provider) = &config.group_provider {
                assignments = assignments.with_group_provider(Arc::clone(provider));
            }
        }

        info!(
            alternatives = store.read(|c| c.alternatives.len()),
            users = store.read(|c| c.user_configs.len()),
            "Polyglot service initialized"
        );

        Ok(Self {
            inner: Arc::new(Inner {
                config,
                store,
                repository,
                engine,
                orphans,
                reconciler,
                assignments,
                event_bus,
                lifecycle: Mutex::new(None),
            }),
        })
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn event_bus(&self) -> &EventBus {
        &self.inner.event_bus
    }

    pub fn subscribe_events(&self) -> EventStream {
        EventStream::new(self.inner.event_bus.subscribe())
    }

    pub fn store(&self) -> &Arc<ConfigurationStore> {
        &self.inner.store
    }

    pub fn repository(&self) -> &Arc<AlternativeRepository> {
        &self.inner.repository
    }

    pub fn engine(&self) -> &Arc<MirrorSyncEngine> {
        &self.inner.engine
    }

    pub fn reconciler(&self) -> &AccessReconciler {
        &self.inner.reconciler
    }

    pub fn assignments(&self) -> &LanguageAssignmentService {
        &self.inner.assignments
    }

    /// Push a host notification to the running event loop
    pub fn publish_host_event(&self, event: HostEvent) {
        if self.inner.event_bus.emit(CoreEvent::Host(event)).is_err() {
            debug!("Host event published with no running event loop");
        }
    }

    // ========================================================================
    // Alternatives and mirrors
    // ========================================================================

    pub async fn create_alternative(&self, input: NewAlternative) -> Result<LanguageAlternative> {
        Ok(self.inner.repository.create_alternative(input).await?)
    }

    /// Delete an alternative with all of its mirrors.
    #[instrument(skip(self, cancel), fields(alternative_id = %alternative_id))]
    pub async fn delete_alternative(
        &self,
        alternative_id: AlternativeId,
        delete_libraries: bool,
        delete_files: bool,
        cancel: &CancellationToken,
    ) -> Result<LanguageAlternative> {
        let alternative = self
            .inner
            .repository
            .get_alternative(alternative_id)
            .ok_or_else(|| not_found("LanguageAlternative", alternative_id))?;

        for mirror in &alternative.mirrors {
            self.remove_mirror_and_restore(mirror, delete_libraries, delete_files)
                .await?;
        }
        let removed = self
            .inner
            .repository
            .delete_alternative(alternative_id)
            .await?;

        self.reconcile_after_change(cancel).await;
        Ok(removed)
    }

    /// Register a mirror of a host library under an alternative.
    pub async fn add_mirror(
        &self,
        alternative_id: AlternativeId,
        source_library_id: &str,
    ) -> Result<LibraryMirror> {
        let source = self
            .inner
            .config
            .library_directory
            .get_library(source_library_id)
            .await?
            .ok_or_else(|| not_found("Library", source_library_id))?;

        Ok(self.inner.repository.add_mirror(alternative_id, &source).await?)
    }

    /// Build a mirror and give its users the new library.
    pub async fn create_mirror(
        &self,
        mirror_id: MirrorId,
        cancel: &CancellationToken,
    ) -> Result<SyncReport> {
        let report = self.inner.engine.create_mirror(mirror_id, cancel).await?;
        self.reconcile_after_change(cancel).await;
        Ok(report)
    }

    pub async fn sync_mirror(
        &self,
        mirror_id: MirrorId,
        cancel: &CancellationToken,
    ) -> Result<SyncReport> {
        let report = self.inner.engine.sync_mirror(mirror_id, cancel).await?;
        if report.kind == SyncKind::Full {
            self.reconcile_after_change(cancel).await;
        }
        Ok(report)
    }

    pub async fn sync_all_mirrors(&self, cancel: &CancellationToken) -> SyncAllSummary {
        let summary = self.inner.engine.sync_all_mirrors(cancel).await;
        if summary.reports.iter().any(|r| r.kind == SyncKind::Full) {
            self.reconcile_after_change(cancel).await;
        }
        summary
    }

    /// Delete a mirror; its users see the source again.
    #[instrument(skip(self, cancel), fields(mirror_id = %mirror_id))]
    pub async fn delete_mirror(
        &self,
        mirror_id: MirrorId,
        delete_library: bool,
        delete_files: bool,
        cancel: &CancellationToken,
    ) -> Result<LibraryMirror> {
        let (_, mirror) = self
            .inner
            .repository
            .find_mirror(mirror_id)
            .ok_or_else(|| not_found("LibraryMirror", mirror_id))?;

        let removed = self
            .remove_mirror_and_restore(&mirror, delete_library, delete_files)
            .await?;
        self.reconcile_after_change(cancel).await;
        Ok(removed)
    }

    // ========================================================================
    // Users
    // ========================================================================

    pub async fn assign_user(
        &self,
        user_id: &str,
        alternative_id: Option<AlternativeId>,
    ) -> Result<UserLanguageConfig> {
        let record = self
            .inner
            .assignments
            .assign_user(user_id, alternative_id)
            .await?;
        self.inner.reconciler.reconcile_user_access(user_id).await?;
        Ok(record)
    }

    pub async fn clear_user_assignment(&self, user_id: &str) -> Result<bool> {
        let cleared = self.inner.assignments.clear_user_assignment(user_id).await?;
        if cleared {
            self.inner.reconciler.reconcile_user_access(user_id).await?;
        }
        Ok(cleared)
    }

    pub async fn set_plugin_managed(
        &self,
        user_id: &str,
        managed: bool,
    ) -> Result<UserLanguageConfig> {
        let record = self
            .inner
            .assignments
            .set_plugin_managed(user_id, managed)
            .await?;
        if managed {
            self.inner.reconciler.reconcile_user_access(user_id).await?;
        }
        Ok(record)
    }

    pub async fn expected_library_access(&self, user_id: &str) -> Result<HashSet<String>> {
        Ok(self.inner.reconciler.expected_library_access(user_id).await?)
    }

    pub async fn reconcile_all_users(&self, cancel: &CancellationToken) -> Result<ReconcileSummary> {
        Ok(self.inner.reconciler.reconcile_all_users(cancel).await?)
    }

    // ========================================================================
    // Drift and host events
    // ========================================================================

    /// Clean orphaned mirrors, restore lost sources, then reconcile.
    #[instrument(skip(self, cancel))]
    pub async fn run_orphan_cleanup(&self, cancel: &CancellationToken) -> Result<OrphanCleanupResult> {
        let result = self.inner.orphans.detect_and_clean(cancel).await?;
        if result.is_empty() {
            return Ok(result);
        }

        self.inner
            .reconciler
            .restore_sources(&result.sources_without_mirror)
            .await?;
        self.reconcile_after_change(cancel).await;

        info!(
            cleaned = result.cleaned.len(),
            failed = result.failed.len(),
            restored_sources = result.sources_without_mirror.len(),
            "Orphan cleanup finished"
        );
        Ok(result)
    }

    /// React to one host notification
    #[instrument(skip(self, cancel))]
    pub async fn handle_host_event(&self, event: HostEvent, cancel: &CancellationToken) -> Result<()> {
        match event {
            HostEvent::LibraryRemoved { library_id } => {
                let managed = self
                    .inner
                    .store
                    .read(|config| config.managed_library_ids().contains(&library_id));
                if managed {
                    self.run_orphan_cleanup(cancel).await?;
                } else {
                    debug!(library_id = %library_id, "Removed library is not managed");
                }
            }
            HostEvent::UserCreated { user_id } => {
                self.assign_new_user(&user_id).await?;
                self.inner.reconciler.reconcile_user_access(&user_id).await?;
            }
            HostEvent::UserDeleted { user_id } => {
                self.inner.assignments.remove_user(&user_id).await?;
            }
        }
        Ok(())
    }

    /// Rebuild what individual host events would have done.
    ///
    /// Host users without a record get their group or default assignment,
    /// records of users the host no longer lists are dropped, then every
    /// user is reconciled and orphaned mirrors are cleaned.
    #[instrument(skip(self, cancel))]
    pub async fn catch_up_host_events(&self, cancel: &CancellationToken) -> Result<()> {
        let host_users: HashSet<String> = self
            .inner
            .config
            .user_directory
            .list_users()
            .await?
            .into_iter()
            .map(|user| user.id)
            .collect();
        let known: HashSet<String> = self.inner.store.read(|config| {
            config
                .user_configs
                .iter()
                .map(|user| user.user_id.clone())
                .collect()
        });

        for user_id in known.difference(&host_users) {
            self.inner.assignments.remove_user(user_id).await?;
        }
        for user_id in host_users.difference(&known) {
            if cancel.is_cancelled() {
                break;
            }
            self.assign_new_user(user_id).await?;
        }

        let summary = self.reconcile_all_users(cancel).await?;
        let cleanup = self.run_orphan_cleanup(cancel).await?;
        info!(
            changed = summary.changed.len(),
            orphans = cleanup.cleaned.len(),
            "Caught up with host state"
        );
        Ok(())
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Subscribe to host events and start background work.
    pub async fn start(&self) -> Result<()> {
        let mut lifecycle = self.inner.lifecycle.lock().await;
        if lifecycle.is_some() {
            return Err(ServiceError::AlreadyRunning);
        }
        *lifecycle = Some(Lifecycle::start(self.clone(), &self.inner.config));
        info!("Polyglot service started");
        Ok(())
    }

    /// Cancel background work and wait for it to finish. Idempotent.
    pub async fn stop(&self) -> Result<()> {
        let lifecycle = self.inner.lifecycle.lock().await.take();
        if let Some(lifecycle) = lifecycle {
            lifecycle.shutdown().await;
            info!("Polyglot service stopped");
        }
        Ok(())
    }

    pub async fn is_running(&self) -> bool {
        self.inner.lifecycle.lock().await.is_some()
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Group assignment first, the default alternative otherwise
    async fn assign_new_user(&self, user_id: &str) -> Result<()> {
        let outcome = self.inner.assignments.sync_user_from_groups(user_id).await?;
        if !matches!(outcome, GroupSyncOutcome::Assigned(_)) {
            self.inner
                .assignments
                .apply_default_assignment(user_id)
                .await?;
        }
        Ok(())
    }

    /// Delete a mirror and give its users the source back right away
    async fn remove_mirror_and_restore(
        &self,
        mirror: &LibraryMirror,
        delete_library: bool,
        delete_files: bool,
    ) -> Result<LibraryMirror> {
        let affected = match &mirror.target_library_id {
            Some(target) => self.inner.reconciler.users_expecting(target),
            None => Vec::new(),
        };

        let removed = self
            .inner
            .engine
            .delete_mirror(mirror.id, delete_library, delete_files)
            .await?;

        let source = [mirror.source_library_id.clone()];
        for user_id in affected {
            if let Err(e) = self
                .inner
                .reconciler
                .add_libraries_to_user_access(&user_id, &source)
                .await
            {
                warn!(user_id = %user_id, error = %e, "Could not restore source access");
            }
        }
        Ok(removed)
    }

    async fn reconcile_after_change(&self, cancel: &CancellationToken) {
        match self.inner.reconciler.reconcile_all_users(cancel).await {
            Ok(summary) if !summary.failed.is_empty() => {
                warn!(failed = summary.failed.len(), "Some users could not be reconciled");
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Reconciliation after change failed"),
        }
    }
}

fn not_found(entity_type: &str, id: impl ToString) -> ServiceError {
    ServiceError::NotFound {
        entity_type: entity_type.to_string(),
        id: id.to_string(),
    }
}

/// Build a service with the desktop filesystem and configuration file.
///
/// ```ignore
/// let service = core_service::bootstrap_desktop(libraries, users, permissions).await?;
/// service.start().await?;
/// ```
#[cfg(feature = "desktop-shims")]
pub async fn bootstrap_desktop(
    libraries: Arc<dyn LibraryDirectory>,
    users: Arc<dyn bridge_traits::users::UserDirectory>,
    permissions: Arc<dyn bridge_traits::permissions::PermissionStore>,
) -> Result<PolyglotService> {
    let config = CoreConfig::builder()
        .library_directory(libraries)
        .user_directory(users)
        .permission_store(permissions)
        .build()?;
    PolyglotService::new(config).await
}
