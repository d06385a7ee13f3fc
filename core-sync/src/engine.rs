//! # Mirror Sync Engine
//!
//! Builds and maintains mirror trees of hardlinks.
//!
//! ## Operations
//!
//! - [`create_mirror`](MirrorSyncEngine::create_mirror): probe that the
//!   target can hold hardlinks, walk the whole source, link every file the
//!   classifier accepts, then create the host library with the alternative's
//!   metadata language.
//! - [`sync_mirror`](MirrorSyncEngine::sync_mirror): diff source and mirror
//!   trees by relative path, link what is missing, remove what disappeared,
//!   relink files that point at another inode. A second run with no source
//!   changes performs no filesystem mutation.
//! - [`delete_mirror`](MirrorSyncEngine::delete_mirror): drop the host library
//!   and/or the mirror tree, then the record. Source files are never touched.
//! - [`sync_all_mirrors`](MirrorSyncEngine::sync_all_mirrors): incremental
//!   sync of every mirror, failures isolated per mirror.
//!
//! ## Concurrency
//!
//! Operations on one mirror are serialized through a per-mirror async lock;
//! different mirrors run concurrently. Every walk observes the cancellation
//! token between files. A cancelled run leaves the mirror in `Syncing`, and
//! the next create or sync resumes from whatever is already linked.

use crate::classifier::FileClassifier;
use crate::error::{Result, SyncError};
use crate::job::{
    FileFailure, MirrorFailure, SyncAllSummary, SyncKind, SyncProgress, SyncReport, SyncStats,
    MAX_REPORTED_FAILURES,
};
use crate::linker::{LinkOperator, LinkOutcome};
use crate::progress::{EventBusProgressSink, ProgressReporter, ProgressSink};
use bridge_traits::library::{CreateLibraryRequest, LibraryDirectory, LibraryInfo};
use bridge_traits::storage::FileSystemAccess;
use core_library::alternatives::{sanitize_folder_name, AlternativeRepository};
use core_library::models::{LanguageAlternative, LibraryMirror, MirrorId};
use core_runtime::events::{CoreEvent, EventBus, MirrorEvent};
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex as AsyncMutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

/// (source root, mirror root) pair for one source location
type LocationPair = (PathBuf, PathBuf);

pub struct MirrorSyncEngine {
    repository: Arc<AlternativeRepository>,
    libraries: Arc<dyn LibraryDirectory>,
    fs: Arc<dyn FileSystemAccess>,
    linker: LinkOperator,
    event_bus: EventBus,
    progress: Option<Arc<dyn ProgressSink>>,
    locks: Mutex<HashMap<MirrorId, Arc<AsyncMutex<()>>>>,
}

impl MirrorSyncEngine {
    /// Progress is published on the event bus unless another sink is set.
    pub fn new(
        repository: Arc<AlternativeRepository>,
        libraries: Arc<dyn LibraryDirectory>,
        fs: Arc<dyn FileSystemAccess>,
        event_bus: EventBus,
    ) -> Self {
        let progress: Arc<dyn ProgressSink> = Arc::new(EventBusProgressSink::new(event_bus.clone()));
        Self {
            repository,
            libraries,
            linker: LinkOperator::new(Arc::clone(&fs)),
            fs,
            event_bus,
            progress: Some(progress),
            locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_progress_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = Some(sink);
        self
    }

    pub fn repository(&self) -> &Arc<AlternativeRepository> {
        &self.repository
    }

    // ========================================================================
    // Public operations
    // ========================================================================

    /// Full initial sync of a mirror, creating its host library.
    #[instrument(skip(self, cancel), fields(mirror_id = %mirror_id))]
    pub async fn create_mirror(
        &self,
        mirror_id: MirrorId,
        cancel: &CancellationToken,
    ) -> Result<SyncReport> {
        let lock = self.mirror_lock(mirror_id);
        let _guard = lock.lock().await;

        let (alternative, mirror) = self.load(mirror_id)?;
        self.create_locked(&alternative, mirror, cancel).await
    }

    /// Incremental sync. A mirror without a library is created instead.
    #[instrument(skip(self, cancel), fields(mirror_id = %mirror_id))]
    pub async fn sync_mirror(
        &self,
        mirror_id: MirrorId,
        cancel: &CancellationToken,
    ) -> Result<SyncReport> {
        let lock = self.mirror_lock(mirror_id);
        let _guard = lock.lock().await;

        let (alternative, mirror) = self.load(mirror_id)?;
        match mirror.target_library_id.clone() {
            Some(target_library_id) => {
                self.sync_locked(&alternative, mirror, target_library_id, cancel)
                    .await
            }
            None => {
                debug!("Mirror has no library yet, running full create");
                self.create_locked(&alternative, mirror, cancel).await
            }
        }
    }

    /// Remove a mirror record, optionally with its host library and its files.
    #[instrument(skip(self), fields(mirror_id = %mirror_id))]
    pub async fn delete_mirror(
        &self,
        mirror_id: MirrorId,
        delete_library: bool,
        delete_files: bool,
    ) -> Result<LibraryMirror> {
        let lock = self.mirror_lock(mirror_id);
        let guard = lock.lock().await;

        let (_, mirror) = self.load(mirror_id)?;

        if delete_files {
            self.ensure_safe_to_delete(&mirror).await?;
        }

        if delete_library {
            if let Some(target) = &mirror.target_library_id {
                match self.libraries.delete_library(target).await {
                    Ok(()) => info!(target_library_id = %target, "Deleted mirror library"),
                    Err(e) if e.is_not_found() => {
                        debug!(target_library_id = %target, "Mirror library already gone")
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }

        if delete_files && self.fs.is_directory(&mirror.target_path).await? {
            self.fs.remove_dir_all(&mirror.target_path).await?;
            info!(target_path = ?mirror.target_path, "Deleted mirror files");
        }

        let removed = self.repository.remove_mirror(mirror_id).await?;

        drop(guard);
        self.locks.lock().remove(&mirror_id);

        self.emit(MirrorEvent::Deleted {
            mirror_id: mirror_id.to_string(),
            library_deleted: delete_library,
            files_deleted: delete_files,
        });

        Ok(removed)
    }

    /// Forget a mirror's library after the host removed it. Files stay.
    #[instrument(skip(self), fields(mirror_id = %mirror_id))]
    pub async fn reset_mirror_target(&self, mirror_id: MirrorId) -> Result<LibraryMirror> {
        let lock = self.mirror_lock(mirror_id);
        let _guard = lock.lock().await;

        let mirror = self
            .repository
            .update_mirror(mirror_id, |m| {
                m.reset_target();
                Ok(())
            })
            .await?;
        info!("Mirror reset to pending");
        Ok(mirror)
    }

    /// Incremental sync of every mirror, isolating failures per mirror.
    #[instrument(skip(self, cancel))]
    pub async fn sync_all_mirrors(&self, cancel: &CancellationToken) -> SyncAllSummary {
        let mirrors = self.repository.list_mirrors();
        let mut summary = SyncAllSummary::default();

        info!(count = mirrors.len(), "Syncing all mirrors");

        for (_, mirror) in mirrors {
            if cancel.is_cancelled() {
                summary.not_attempted.push(mirror.id);
                continue;
            }

            match self.sync_mirror(mirror.id, cancel).await {
                Ok(report) => summary.reports.push(report),
                Err(SyncError::Cancelled) => summary.not_attempted.push(mirror.id),
                Err(e) => {
                    error!(mirror_id = %mirror.id, error = %e, "Mirror sync failed");
                    summary.failed.push(MirrorFailure {
                        mirror_id: mirror.id,
                        source_library_id: mirror.source_library_id.clone(),
                        message: e.to_string(),
                    });
                }
            }
        }

        info!(
            synced = summary.reports.len(),
            failed = summary.failed.len(),
            not_attempted = summary.not_attempted.len(),
            "Sync-all finished"
        );
        summary
    }

    // ========================================================================
    // Create
    // ========================================================================

    async fn create_locked(
        &self,
        alternative: &LanguageAlternative,
        mirror: LibraryMirror,
        cancel: &CancellationToken,
    ) -> Result<SyncReport> {
        let started = Instant::now();
        let source = self.source_library(&mirror).await?;
        let pairs = location_pairs(&source, &mirror.target_path)?;
        let classifier = self.classifier();

        let mut plan = Vec::new();
        for (source_root, mirror_root) in &pairs {
            for relative in self.linker.scan(source_root, &classifier, cancel).await? {
                plan.push((source_root.join(&relative), mirror_root.join(&relative)));
            }
        }

        // Cross-device is fatal and must surface before the mirror leaves its state
        if let Err(e) = self.probe(&pairs, &plan).await {
            error!(error = %e, "Mirror target cannot hold hardlinks");
            let message = e.to_string();
            self.repository
                .update_mirror(mirror.id, |m| {
                    m.record_error(message.clone());
                    Ok(())
                })
                .await?;
            self.emit(MirrorEvent::SyncFailed {
                mirror_id: mirror.id.to_string(),
                message,
            });
            return Err(e);
        }

        self.begin(alternative, &mirror, SyncKind::Full).await?;

        let result = self
            .run_create(alternative, &mirror, &source, plan, cancel, started)
            .await;
        self.settle_failure(&mirror, result).await
    }

    async fn run_create(
        &self,
        alternative: &LanguageAlternative,
        mirror: &LibraryMirror,
        source: &LibraryInfo,
        plan: Vec<(PathBuf, PathBuf)>,
        cancel: &CancellationToken,
        started: Instant,
    ) -> Result<SyncReport> {
        let mut run = Run::new(self.progress.clone(), mirror.id, plan.len() as u64);

        for (source_path, mirror_path) in &plan {
            if cancel.is_cancelled() {
                warn!(processed = run.progress.items_processed, "Create cancelled");
                return Err(SyncError::Cancelled);
            }
            run.record_link(mirror_path, self.linker.link(source_path, mirror_path).await);
            run.advance();
        }

        let target_library_id = match &mirror.target_library_id {
            Some(id) => id.clone(),
            None => {
                let request = CreateLibraryRequest {
                    name: format!("{} ({})", source.name, alternative.name),
                    path: mirror.target_path.clone(),
                    collection_type: mirror.collection_type.clone(),
                    metadata_language: alternative.metadata_language.clone(),
                    metadata_country: alternative.metadata_country.clone(),
                };
                let id = self.libraries.create_library(request).await?;
                info!(target_library_id = %id, "Created mirror library");
                id
            }
        };

        self.finish(mirror, SyncKind::Full, target_library_id, run, started)
            .await
    }

    async fn probe(&self, pairs: &[LocationPair], plan: &[(PathBuf, PathBuf)]) -> Result<()> {
        for (source_root, mirror_root) in pairs {
            let sample = plan
                .iter()
                .find(|(source_path, _)| source_path.starts_with(source_root))
                .map(|(source_path, _)| source_path);

            match sample {
                Some(sample) => self.linker.probe(sample, mirror_root).await?,
                None => self.fs.create_dir_all(mirror_root).await?,
            }
        }
        Ok(())
    }

    // ========================================================================
    // Incremental sync
    // ========================================================================

    async fn sync_locked(
        &self,
        alternative: &LanguageAlternative,
        mirror: LibraryMirror,
        target_library_id: String,
        cancel: &CancellationToken,
    ) -> Result<SyncReport> {
        let started = Instant::now();
        let source = self.source_library(&mirror).await?;
        let pairs = location_pairs(&source, &mirror.target_path)?;

        self.begin(alternative, &mirror, SyncKind::Incremental)
            .await?;

        let result = self
            .run_incremental(&mirror, &pairs, target_library_id, cancel, started)
            .await;
        self.settle_failure(&mirror, result).await
    }

    async fn run_incremental(
        &self,
        mirror: &LibraryMirror,
        pairs: &[LocationPair],
        target_library_id: String,
        cancel: &CancellationToken,
        started: Instant,
    ) -> Result<SyncReport> {
        let classifier = self.classifier();

        let mut to_check = Vec::new();
        let mut to_link = Vec::new();
        let mut to_remove = Vec::new();

        for (source_root, mirror_root) in pairs {
            let source_files: BTreeSet<PathBuf> = self
                .linker
                .scan(source_root, &classifier, cancel)
                .await?
                .into_iter()
                .collect();
            let mirror_files: BTreeSet<PathBuf> = self
                .linker
                .scan(mirror_root, &classifier, cancel)
                .await?
                .into_iter()
                .collect();

            for relative in &source_files {
                let pair = (source_root.join(relative), mirror_root.join(relative));
                if mirror_files.contains(relative) {
                    to_check.push(pair);
                } else {
                    to_link.push(pair);
                }
            }
            for relative in mirror_files.difference(&source_files) {
                to_remove.push((mirror_root.clone(), mirror_root.join(relative)));
            }
        }

        debug!(
            check = to_check.len(),
            link = to_link.len(),
            remove = to_remove.len(),
            "Computed mirror diff"
        );

        let total = (to_check.len() + to_link.len() + to_remove.len()) as u64;
        let mut run = Run::new(self.progress.clone(), mirror.id, total);

        for (source_path, mirror_path) in &to_check {
            ensure_not_cancelled(cancel)?;
            match self.linker.is_linked(source_path, mirror_path).await {
                Ok(true) => run.stats.unchanged += 1,
                // Same path, different inode: relink
                Ok(false) => {
                    run.record_link(mirror_path, self.linker.link(source_path, mirror_path).await)
                }
                Err(e) => run.record_failure(mirror_path, e.to_string()),
            }
            run.advance();
        }

        for (source_path, mirror_path) in &to_link {
            ensure_not_cancelled(cancel)?;
            run.record_link(mirror_path, self.linker.link(source_path, mirror_path).await);
            run.advance();
        }

        for (mirror_root, mirror_path) in &to_remove {
            ensure_not_cancelled(cancel)?;
            match self.linker.remove(mirror_path).await {
                Ok(removed) => {
                    if removed {
                        run.stats.removed += 1;
                    }
                    match self.linker.prune_empty_parents(mirror_root, mirror_path).await {
                        Ok(pruned) => run.stats.directories_pruned += pruned as u64,
                        Err(e) => debug!(path = ?mirror_path, error = %e, "Could not prune directories"),
                    }
                }
                Err(e) => run.record_failure(mirror_path, e.to_string()),
            }
            run.advance();
        }

        if run.stats.operations() > 0 {
            if let Err(e) = self.libraries.refresh_library(&target_library_id).await {
                warn!(target_library_id = %target_library_id, error = %e, "Library refresh failed");
            }
        }

        self.finish(mirror, SyncKind::Incremental, target_library_id, run, started)
            .await
    }

    // ========================================================================
    // Shared steps
    // ========================================================================

    async fn begin(
        &self,
        alternative: &LanguageAlternative,
        mirror: &LibraryMirror,
        kind: SyncKind,
    ) -> Result<()> {
        self.repository
            .update_mirror(mirror.id, |m| m.start_sync())
            .await?;

        info!(kind = kind.as_str(), source_library_id = %mirror.source_library_id, "Mirror sync started");
        self.emit(MirrorEvent::SyncStarted {
            mirror_id: mirror.id.to_string(),
            alternative_id: alternative.id.to_string(),
            source_library_id: mirror.source_library_id.clone(),
            is_full_sync: kind == SyncKind::Full,
        });
        Ok(())
    }

    async fn finish(
        &self,
        mirror: &LibraryMirror,
        kind: SyncKind,
        target_library_id: String,
        mut run: Run,
        started: Instant,
    ) -> Result<SyncReport> {
        run.reporter.report(100);
        let now = self.repository.clock().now();
        let mut report = SyncReport {
            mirror_id: mirror.id,
            kind,
            target_library_id: Some(target_library_id.clone()),
            status: mirror.status,
            stats: run.stats,
            failures: run.failures,
            duration: started.elapsed(),
        };

        let file_count = report.stats.file_count();
        let updated = match report.failure_summary() {
            None => {
                self.repository
                    .update_mirror(mirror.id, |m| {
                        m.mark_synced(target_library_id.clone(), file_count, now)
                    })
                    .await?
            }
            Some(summary) => {
                warn!(failed = report.stats.failed, "Mirror sync finished with failures");
                self.repository
                    .update_mirror(mirror.id, |m| {
                        m.mark_failed(summary, Some(target_library_id.clone()), Some(file_count), now)
                    })
                    .await?
            }
        };
        report.status = updated.status;

        info!(
            status = %report.status,
            linked = report.stats.linked,
            removed = report.stats.removed,
            relinked = report.stats.relinked,
            unchanged = report.stats.unchanged,
            failed = report.stats.failed,
            duration_ms = report.duration.as_millis() as u64,
            "Mirror sync finished"
        );

        self.emit(MirrorEvent::SyncCompleted {
            mirror_id: mirror.id.to_string(),
            target_library_id: report.target_library_id.clone(),
            files_linked: report.stats.linked + report.stats.relinked,
            files_removed: report.stats.removed,
            failed_files: report.stats.failed,
            duration_ms: report.duration.as_millis() as u64,
        });

        Ok(report)
    }

    /// Move the mirror to `Error` for failures after `begin`; cancellation
    /// leaves it in `Syncing`.
    async fn settle_failure(
        &self,
        mirror: &LibraryMirror,
        result: Result<SyncReport>,
    ) -> Result<SyncReport> {
        let error = match result {
            Ok(report) => return Ok(report),
            Err(SyncError::Cancelled) => return Err(SyncError::Cancelled),
            Err(e) => e,
        };

        error!(error = %error, "Mirror sync failed");
        let now = self.repository.clock().now();
        let message = error.to_string();
        if let Err(e) = self
            .repository
            .update_mirror(mirror.id, |m| m.mark_failed(message.clone(), None, None, now))
            .await
        {
            warn!(error = %e, "Could not record mirror failure");
        }

        self.emit(MirrorEvent::SyncFailed {
            mirror_id: mirror.id.to_string(),
            message,
        });
        Err(error)
    }

    async fn ensure_safe_to_delete(&self, mirror: &LibraryMirror) -> Result<()> {
        let target = &mirror.target_path;
        if !target.is_absolute() || target.parent().is_none() {
            return Err(SyncError::UnsafeTarget {
                path: target.clone(),
                reason: "not an absolute, non-root path".to_string(),
            });
        }

        for library in self.libraries.list_libraries().await? {
            if mirror.target_library_id.as_deref() == Some(library.id.as_str()) {
                continue;
            }
            if let Some(location) = library.locations.iter().find(|l| l.starts_with(target)) {
                return Err(SyncError::UnsafeTarget {
                    path: target.clone(),
                    reason: format!(
                        "contains location {} of library {}",
                        location.display(),
                        library.id
                    ),
                });
            }
        }
        Ok(())
    }

    fn load(&self, mirror_id: MirrorId) -> Result<(LanguageAlternative, LibraryMirror)> {
        self.repository
            .find_mirror(mirror_id)
            .ok_or_else(|| SyncError::MirrorNotFound {
                mirror_id: mirror_id.to_string(),
            })
    }

    async fn source_library(&self, mirror: &LibraryMirror) -> Result<LibraryInfo> {
        self.libraries
            .get_library(&mirror.source_library_id)
            .await?
            .ok_or_else(|| SyncError::SourceLibraryMissing {
                library_id: mirror.source_library_id.clone(),
            })
    }

    fn classifier(&self) -> FileClassifier {
        self.repository
            .store()
            .read(|config| FileClassifier::new(&config.classification))
    }

    fn mirror_lock(&self, mirror_id: MirrorId) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock();
        Arc::clone(locks.entry(mirror_id).or_default())
    }

    fn emit(&self, event: MirrorEvent) {
        self.event_bus.emit(CoreEvent::Mirror(event)).ok();
    }
}

// ============================================================================
// Helpers
// ============================================================================

/// Accumulates counters, failures and progress of one run
struct Run {
    stats: SyncStats,
    failures: Vec<FileFailure>,
    progress: SyncProgress,
    reporter: ProgressReporter,
}

impl Run {
    fn new(sink: Option<Arc<dyn ProgressSink>>, mirror_id: MirrorId, total: u64) -> Self {
        let mut reporter = ProgressReporter::new(sink, mirror_id);
        reporter.report(0);
        Self {
            stats: SyncStats::default(),
            failures: Vec::new(),
            progress: SyncProgress::new(total),
            reporter,
        }
    }

    fn advance(&mut self) {
        self.progress.advance();
        self.reporter.report(self.progress.percent());
    }

    fn record_link(&mut self, path: &Path, outcome: Result<LinkOutcome>) {
        match outcome {
            Ok(LinkOutcome::Created) => self.stats.linked += 1,
            Ok(LinkOutcome::Replaced) => self.stats.relinked += 1,
            Ok(LinkOutcome::AlreadyLinked) => self.stats.unchanged += 1,
            Err(e) => self.record_failure(path, e.to_string()),
        }
    }

    fn record_failure(&mut self, path: &Path, message: String) {
        warn!(path = ?path, error = %message, "File operation failed");
        self.stats.failed += 1;
        if self.failures.len() < MAX_REPORTED_FAILURES {
            self.failures.push(FileFailure {
                path: path.to_path_buf(),
                message,
            });
        }
    }
}

fn ensure_not_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        warn!("Sync cancelled");
        return Err(SyncError::Cancelled);
    }
    Ok(())
}

/// Map each source location to its folder in the mirror.
///
/// One location maps onto the mirror root; several each get a subfolder
/// named after the location.
fn location_pairs(source: &LibraryInfo, target_root: &Path) -> Result<Vec<LocationPair>> {
    match source.locations.as_slice() {
        [] => Err(SyncError::InvalidInput {
            field: "locations".to_string(),
            message: format!("library {} has no locations", source.id),
        }),
        [single] => Ok(vec![(single.clone(), target_root.to_path_buf())]),
        many => {
            let mut used = HashSet::new();
            Ok(many
                .iter()
                .map(|location| {
                    let base = location
                        .file_name()
                        .map(|n| sanitize_folder_name(&n.to_string_lossy()))
                        .unwrap_or_else(|| "library".to_string());
                    let mut name = base.clone();
                    let mut n = 2;
                    while !used.insert(name.clone()) {
                        name = format!("{} ({})", base, n);
                        n += 1;
                    }
                    (location.clone(), target_root.join(name))
                })
                .collect())
        }
    }
}
