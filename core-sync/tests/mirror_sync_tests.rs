//! Integration tests for mirror create / sync / delete
//!
//! These tests run the engine against real hardlinks in temporary
//! directories and an in-memory host library directory:
//! - Full create with classification and library creation
//! - Idempotent incremental sync (no filesystem mutation on the second run)
//! - Additions, deletions and relinks picked up incrementally
//! - Cross-device failure before any work starts
//! - Cancellation leaving the mirror resumable
//! - Per-file link failures ending in `Error` without aborting the walk
//! - Operations on one mirror serialized, different mirrors concurrent
//! - Delete with and without files, and the source-location safety check

#![cfg(unix)]

use async_trait::async_trait;
use bridge_desktop::TokioFileSystem;
use bridge_traits::{
    error::{BridgeError, Result as BridgeResult},
    library::{CreateLibraryRequest, LibraryDirectory, LibraryInfo},
    storage::{DirectoryEntry, FileIdentity, FileSystemAccess},
    time::SystemClock,
};
use core_library::{
    AlternativeRepository, ConfigurationStore, MirrorId, MirrorStatus, NewAlternative,
    PluginConfiguration,
};
use core_runtime::events::{CoreEvent, EventBus, MirrorEvent};
use core_sync::{MirrorSyncEngine, SyncError, SyncKind};
use parking_lot::Mutex;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

// ============================================================================
// Host fakes
// ============================================================================

#[derive(Default)]
struct FakeLibraries {
    libraries: Mutex<Vec<LibraryInfo>>,
    created: Mutex<Vec<CreateLibraryRequest>>,
    refreshed: Mutex<Vec<String>>,
    next_id: AtomicUsize,
}

impl FakeLibraries {
    fn with(libraries: Vec<LibraryInfo>) -> Self {
        Self {
            libraries: Mutex::new(libraries),
            ..Default::default()
        }
    }

    fn remove(&self, id: &str) {
        self.libraries.lock().retain(|l| l.id != id);
    }
}

#[async_trait]
impl LibraryDirectory for FakeLibraries {
    async fn list_libraries(&self) -> BridgeResult<Vec<LibraryInfo>> {
        Ok(self.libraries.lock().clone())
    }

    async fn create_library(&self, request: CreateLibraryRequest) -> BridgeResult<String> {
        let id = format!("lib-{}", self.next_id.fetch_add(1, Ordering::SeqCst));
        self.libraries.lock().push(LibraryInfo {
            id: id.clone(),
            name: request.name.clone(),
            collection_type: request.collection_type.clone(),
            locations: vec![request.path.clone()],
        });
        self.created.lock().push(request);
        Ok(id)
    }

    async fn delete_library(&self, library_id: &str) -> BridgeResult<()> {
        let mut libraries = self.libraries.lock();
        let before = libraries.len();
        libraries.retain(|l| l.id != library_id);
        if libraries.len() == before {
            return Err(BridgeError::NotFound {
                kind: "Library".into(),
                id: library_id.into(),
            });
        }
        Ok(())
    }

    async fn refresh_library(&self, library_id: &str) -> BridgeResult<()> {
        self.refreshed.lock().push(library_id.to_string());
        Ok(())
    }
}

/// Real filesystem that counts mutating calls
#[derive(Default)]
struct CountingFs {
    inner: TokioFileSystem,
    mutations: AtomicUsize,
}

impl CountingFs {
    fn mutations(&self) -> usize {
        self.mutations.load(Ordering::SeqCst)
    }

    fn bump(&self) {
        self.mutations.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl FileSystemAccess for CountingFs {
    async fn exists(&self, path: &Path) -> BridgeResult<bool> {
        self.inner.exists(path).await
    }

    async fn is_directory(&self, path: &Path) -> BridgeResult<bool> {
        self.inner.is_directory(path).await
    }

    async fn create_dir_all(&self, path: &Path) -> BridgeResult<()> {
        self.inner.create_dir_all(path).await
    }

    async fn list_directory(&self, path: &Path) -> BridgeResult<Vec<DirectoryEntry>> {
        self.inner.list_directory(path).await
    }

    async fn create_hard_link(&self, original: &Path, link: &Path) -> BridgeResult<()> {
        self.bump();
        self.inner.create_hard_link(original, link).await
    }

    async fn remove_file(&self, path: &Path) -> BridgeResult<()> {
        self.bump();
        self.inner.remove_file(path).await
    }

    async fn remove_dir(&self, path: &Path) -> BridgeResult<()> {
        self.bump();
        self.inner.remove_dir(path).await
    }

    async fn remove_dir_all(&self, path: &Path) -> BridgeResult<()> {
        self.bump();
        self.inner.remove_dir_all(path).await
    }

    async fn file_identity(&self, path: &Path) -> BridgeResult<Option<FileIdentity>> {
        self.inner.file_identity(path).await
    }
}

/// Filesystem whose hardlinks always cross a device boundary
#[derive(Default)]
struct CrossDeviceFs {
    inner: TokioFileSystem,
}

#[async_trait]
impl FileSystemAccess for CrossDeviceFs {
    async fn exists(&self, path: &Path) -> BridgeResult<bool> {
        self.inner.exists(path).await
    }

    async fn is_directory(&self, path: &Path) -> BridgeResult<bool> {
        self.inner.is_directory(path).await
    }

    async fn create_dir_all(&self, path: &Path) -> BridgeResult<()> {
        self.inner.create_dir_all(path).await
    }

    async fn list_directory(&self, path: &Path) -> BridgeResult<Vec<DirectoryEntry>> {
        self.inner.list_directory(path).await
    }

    async fn create_hard_link(&self, original: &Path, link: &Path) -> BridgeResult<()> {
        Err(BridgeError::CrossDevice {
            source_path: original.to_path_buf(),
            target_path: link.to_path_buf(),
        })
    }

    async fn remove_file(&self, path: &Path) -> BridgeResult<()> {
        self.inner.remove_file(path).await
    }

    async fn remove_dir(&self, path: &Path) -> BridgeResult<()> {
        self.inner.remove_dir(path).await
    }

    async fn remove_dir_all(&self, path: &Path) -> BridgeResult<()> {
        self.inner.remove_dir_all(path).await
    }

    async fn file_identity(&self, path: &Path) -> BridgeResult<Option<FileIdentity>> {
        self.inner.file_identity(path).await
    }
}

/// Filesystem on which linking any file whose name contains `broken` fails
struct FlakyFs {
    inner: TokioFileSystem,
    broken: &'static str,
}

#[async_trait]
impl FileSystemAccess for FlakyFs {
    async fn exists(&self, path: &Path) -> BridgeResult<bool> {
        self.inner.exists(path).await
    }

    async fn is_directory(&self, path: &Path) -> BridgeResult<bool> {
        self.inner.is_directory(path).await
    }

    async fn create_dir_all(&self, path: &Path) -> BridgeResult<()> {
        self.inner.create_dir_all(path).await
    }

    async fn list_directory(&self, path: &Path) -> BridgeResult<Vec<DirectoryEntry>> {
        self.inner.list_directory(path).await
    }

    async fn create_hard_link(&self, original: &Path, link: &Path) -> BridgeResult<()> {
        if link.to_string_lossy().contains(self.broken) {
            return Err(BridgeError::OperationFailed("permission denied".into()));
        }
        self.inner.create_hard_link(original, link).await
    }

    async fn remove_file(&self, path: &Path) -> BridgeResult<()> {
        self.inner.remove_file(path).await
    }

    async fn remove_dir(&self, path: &Path) -> BridgeResult<()> {
        self.inner.remove_dir(path).await
    }

    async fn remove_dir_all(&self, path: &Path) -> BridgeResult<()> {
        self.inner.remove_dir_all(path).await
    }

    async fn file_identity(&self, path: &Path) -> BridgeResult<Option<FileIdentity>> {
        self.inner.file_identity(path).await
    }
}

/// Slow directory listings that record how many run at the same time
#[derive(Default)]
struct OverlapFs {
    inner: TokioFileSystem,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl OverlapFs {
    fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FileSystemAccess for OverlapFs {
    async fn exists(&self, path: &Path) -> BridgeResult<bool> {
        self.inner.exists(path).await
    }

    async fn is_directory(&self, path: &Path) -> BridgeResult<bool> {
        self.inner.is_directory(path).await
    }

    async fn create_dir_all(&self, path: &Path) -> BridgeResult<()> {
        self.inner.create_dir_all(path).await
    }

    async fn list_directory(&self, path: &Path) -> BridgeResult<Vec<DirectoryEntry>> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        let result = self.inner.list_directory(path).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }

    async fn create_hard_link(&self, original: &Path, link: &Path) -> BridgeResult<()> {
        self.inner.create_hard_link(original, link).await
    }

    async fn remove_file(&self, path: &Path) -> BridgeResult<()> {
        self.inner.remove_file(path).await
    }

    async fn remove_dir(&self, path: &Path) -> BridgeResult<()> {
        self.inner.remove_dir(path).await
    }

    async fn remove_dir_all(&self, path: &Path) -> BridgeResult<()> {
        self.inner.remove_dir_all(path).await
    }

    async fn file_identity(&self, path: &Path) -> BridgeResult<Option<FileIdentity>> {
        self.inner.file_identity(path).await
    }
}

// ============================================================================
// Harness
// ============================================================================

struct Harness {
    dir: TempDir,
    source_root: PathBuf,
    libraries: Arc<FakeLibraries>,
    repository: Arc<AlternativeRepository>,
    mirror_id: MirrorId,
    target_path: PathBuf,
    bus: EventBus,
}

impl Harness {
    async fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let source_root = dir.path().join("media/movies");
        write(&source_root, "Heat (1995)/Heat (1995).mkv", "heat");
        write(&source_root, "Heat (1995)/Heat (1995).pt.srt", "legendas");
        write(&source_root, "Heat (1995)/movie.nfo", "<movie/>");
        write(&source_root, "Heat (1995)/poster.jpg", "jpg");
        write(&source_root, "Heat (1995)/metadata/info.xml", "<x/>");
        write(&source_root, "Heat (1995)/trickplay/320/0.jpg", "tile");
        write(&source_root, "Ronin (1998)/Ronin (1998).mkv", "ronin");

        let source = LibraryInfo {
            id: "m1".into(),
            name: "Movies".into(),
            collection_type: Some("movies".into()),
            locations: vec![source_root.clone()],
        };
        let libraries = Arc::new(FakeLibraries::with(vec![source.clone()]));

        let repository = Arc::new(AlternativeRepository::new(
            Arc::new(ConfigurationStore::in_memory(PluginConfiguration::default())),
            Arc::new(SystemClock),
        ));
        let alternative = repository
            .create_alternative(NewAlternative {
                name: "Portuguese".into(),
                locale_code: "pt-BR".into(),
                metadata_language: "pt".into(),
                metadata_country: "BR".into(),
                destination_base_path: dir.path().join("mirrors/pt"),
            })
            .await
            .unwrap();
        let mirror = repository.add_mirror(alternative.id, &source).await.unwrap();

        Self {
            target_path: mirror.target_path.clone(),
            mirror_id: mirror.id,
            dir,
            source_root,
            libraries,
            repository,
            bus: EventBus::new(256),
        }
    }

    fn engine(&self, fs: Arc<dyn FileSystemAccess>) -> MirrorSyncEngine {
        MirrorSyncEngine::new(
            Arc::clone(&self.repository),
            self.libraries.clone(),
            fs,
            self.bus.clone(),
        )
    }

    fn status(&self) -> MirrorStatus {
        self.repository.find_mirror(self.mirror_id).unwrap().1.status
    }
}

fn write(root: &Path, relative: &str, content: &str) {
    let path = root.join(relative);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(path, content).unwrap();
}

fn same_inode(a: &Path, b: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;
    let (a, b) = (fs::metadata(a).unwrap(), fs::metadata(b).unwrap());
    a.ino() == b.ino() && a.dev() == b.dev()
}

// ============================================================================
// Create
// ============================================================================

#[tokio::test]
async fn test_create_links_media_and_creates_library() {
    let h = Harness::new().await;
    let fs_access = Arc::new(CountingFs::default());
    let engine = h.engine(fs_access.clone());
    let mut rx = h.bus.subscribe();

    let report = engine
        .create_mirror(h.mirror_id, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.kind, SyncKind::Full);
    assert_eq!(report.status, MirrorStatus::Synced);
    assert_eq!(report.stats.linked, 4);
    assert!(report.is_success());

    let target = &h.target_path;
    assert!(same_inode(
        &h.source_root.join("Heat (1995)/Heat (1995).mkv"),
        &target.join("Heat (1995)/Heat (1995).mkv")
    ));
    assert!(target.join("Heat (1995)/Heat (1995).pt.srt").exists());
    assert!(target.join("Heat (1995)/trickplay/320/0.jpg").exists());
    assert!(target.join("Ronin (1998)/Ronin (1998).mkv").exists());
    assert!(!target.join("Heat (1995)/movie.nfo").exists());
    assert!(!target.join("Heat (1995)/poster.jpg").exists());
    assert!(!target.join("Heat (1995)/metadata").exists());

    let created = h.libraries.created.lock().clone();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].name, "Movies (Portuguese)");
    assert_eq!(created[0].metadata_language, "pt");
    assert_eq!(created[0].metadata_country, "BR");
    assert_eq!(created[0].collection_type.as_deref(), Some("movies"));
    assert_eq!(&created[0].path, target);

    let (_, mirror) = h.repository.find_mirror(h.mirror_id).unwrap();
    assert_eq!(mirror.target_library_id, report.target_library_id);
    assert_eq!(mirror.last_file_count, Some(4));
    assert!(mirror.last_error.is_none());

    assert!(matches!(
        rx.recv().await.unwrap(),
        CoreEvent::Mirror(MirrorEvent::SyncStarted { is_full_sync: true, .. })
    ));

    // Source untouched
    assert!(h.source_root.join("Heat (1995)/movie.nfo").exists());
}

#[tokio::test]
async fn test_cross_device_fails_before_any_work() {
    let h = Harness::new().await;
    let engine = h.engine(Arc::new(CrossDeviceFs::default()));

    let err = engine
        .create_mirror(h.mirror_id, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(err.is_cross_device());
    assert_eq!(h.status(), MirrorStatus::Pending);
    assert!(h.libraries.created.lock().is_empty());

    let (_, mirror) = h.repository.find_mirror(h.mirror_id).unwrap();
    assert!(mirror.last_error.is_some());
    assert!(mirror.target_library_id.is_none());
}

#[tokio::test]
async fn test_missing_source_library_is_reported() {
    let h = Harness::new().await;
    h.libraries.remove("m1");
    let engine = h.engine(Arc::new(TokioFileSystem::new()));

    let err = engine
        .create_mirror(h.mirror_id, &CancellationToken::new())
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::SourceLibraryMissing { .. }));
    assert_eq!(h.status(), MirrorStatus::Pending);
}

#[tokio::test]
async fn test_cancelled_create_is_resumable() {
    let h = Harness::new().await;
    let engine = h.engine(Arc::new(TokioFileSystem::new()));

    let cancel = CancellationToken::new();
    cancel.cancel();
    let err = engine.create_mirror(h.mirror_id, &cancel).await.unwrap_err();
    assert!(matches!(err, SyncError::Cancelled));

    let report = engine
        .sync_mirror(h.mirror_id, &CancellationToken::new())
        .await
        .unwrap();
    assert_eq!(report.kind, SyncKind::Full);
    assert_eq!(h.status(), MirrorStatus::Synced);
}

// ============================================================================
// Incremental sync
// ============================================================================

#[tokio::test]
async fn test_second_sync_performs_no_operations() {
    let h = Harness::new().await;
    let fs_access = Arc::new(CountingFs::default());
    let engine = h.engine(fs_access.clone());
    let cancel = CancellationToken::new();

    engine.create_mirror(h.mirror_id, &cancel).await.unwrap();
    let first = engine.sync_mirror(h.mirror_id, &cancel).await.unwrap();
    assert_eq!(first.kind, SyncKind::Incremental);
    assert_eq!(first.stats.operations(), 0);

    let before = fs_access.mutations();
    let second = engine.sync_mirror(h.mirror_id, &cancel).await.unwrap();

    assert_eq!(fs_access.mutations(), before);
    assert_eq!(second.stats.operations(), 0);
    assert_eq!(second.stats.unchanged, 4);
    assert_eq!(second.status, MirrorStatus::Synced);
    assert!(h.libraries.refreshed.lock().is_empty());
}

#[tokio::test]
async fn test_incremental_sync_applies_source_changes() {
    let h = Harness::new().await;
    let engine = h.engine(Arc::new(TokioFileSystem::new()));
    let cancel = CancellationToken::new();
    let report = engine.create_mirror(h.mirror_id, &cancel).await.unwrap();
    let target_library_id = report.target_library_id.unwrap();

    // New title, removed title, replaced file, host metadata inside the mirror
    write(&h.source_root, "Alien (1979)/Alien (1979).mkv", "alien");
    fs::remove_dir_all(h.source_root.join("Ronin (1998)")).unwrap();
    fs::remove_file(h.source_root.join("Heat (1995)/Heat (1995).mkv")).unwrap();
    write(&h.source_root, "Heat (1995)/Heat (1995).mkv", "heat remastered");
    write(&h.target_path, "Heat (1995)/movie.nfo", "<filme/>");

    let report = engine.sync_mirror(h.mirror_id, &cancel).await.unwrap();

    assert_eq!(report.stats.linked, 1);
    assert_eq!(report.stats.removed, 1);
    assert_eq!(report.stats.relinked, 1);
    assert_eq!(report.stats.directories_pruned, 1);
    assert_eq!(report.status, MirrorStatus::Synced);

    assert!(h.target_path.join("Alien (1979)/Alien (1979).mkv").exists());
    assert!(!h.target_path.join("Ronin (1998)").exists());
    assert!(same_inode(
        &h.source_root.join("Heat (1995)/Heat (1995).mkv"),
        &h.target_path.join("Heat (1995)/Heat (1995).mkv")
    ));
    assert_eq!(
        fs::read_to_string(h.target_path.join("Heat (1995)/movie.nfo")).unwrap(),
        "<filme/>"
    );
    assert_eq!(*h.libraries.refreshed.lock(), vec![target_library_id]);
}

#[tokio::test]
async fn test_sync_all_isolates_failures() {
    let h = Harness::new().await;
    let engine = h.engine(Arc::new(TokioFileSystem::new()));
    let cancel = CancellationToken::new();
    engine.create_mirror(h.mirror_id, &cancel).await.unwrap();

    let broken = LibraryInfo {
        id: "s1".into(),
        name: "Shows".into(),
        collection_type: Some("tvshows".into()),
        locations: vec![h.dir.path().join("media/shows")],
    };
    let alternative_id = h.repository.list_alternatives()[0].id;
    let broken_mirror = h.repository.add_mirror(alternative_id, &broken).await.unwrap();

    let summary = engine.sync_all_mirrors(&cancel).await;

    assert_eq!(summary.total(), 2);
    assert_eq!(summary.reports.len(), 1);
    assert_eq!(summary.failed.len(), 1);
    assert_eq!(summary.failed[0].mirror_id, broken_mirror.id);
    assert_eq!(summary.failed[0].source_library_id, "s1");
}

#[tokio::test]
async fn test_sync_all_cancelled_attempts_nothing() {
    let h = Harness::new().await;
    let engine = h.engine(Arc::new(TokioFileSystem::new()));
    let cancel = CancellationToken::new();
    cancel.cancel();

    let summary = engine.sync_all_mirrors(&cancel).await;

    assert_eq!(summary.not_attempted, vec![h.mirror_id]);
    assert_eq!(h.status(), MirrorStatus::Pending);
}

// ============================================================================
// Delete
// ============================================================================

#[tokio::test]
async fn test_delete_with_files_keeps_source() {
    let h = Harness::new().await;
    let engine = h.engine(Arc::new(TokioFileSystem::new()));
    let report = engine
        .create_mirror(h.mirror_id, &CancellationToken::new())
        .await
        .unwrap();
    let target_library_id = report.target_library_id.unwrap();

    engine.delete_mirror(h.mirror_id, true, true).await.unwrap();

    assert!(!h.target_path.exists());
    assert_eq!(
        fs::read_to_string(h.source_root.join("Heat (1995)/Heat (1995).mkv")).unwrap(),
        "heat"
    );
    assert!(h
        .libraries
        .libraries
        .lock()
        .iter()
        .all(|l| l.id != target_library_id));
    assert!(h.repository.find_mirror(h.mirror_id).is_none());
}

#[tokio::test]
async fn test_delete_record_only_keeps_library_and_files() {
    let h = Harness::new().await;
    let engine = h.engine(Arc::new(TokioFileSystem::new()));
    engine
        .create_mirror(h.mirror_id, &CancellationToken::new())
        .await
        .unwrap();

    engine.delete_mirror(h.mirror_id, false, false).await.unwrap();

    assert!(h.target_path.join("Ronin (1998)/Ronin (1998).mkv").exists());
    assert_eq!(h.libraries.libraries.lock().len(), 2);
    assert!(h.repository.find_mirror(h.mirror_id).is_none());
}

#[tokio::test]
async fn test_delete_tolerates_missing_library() {
    let h = Harness::new().await;
    let engine = h.engine(Arc::new(TokioFileSystem::new()));
    let report = engine
        .create_mirror(h.mirror_id, &CancellationToken::new())
        .await
        .unwrap();
    h.libraries.remove(&report.target_library_id.unwrap());

    engine.delete_mirror(h.mirror_id, true, false).await.unwrap();
    assert!(h.repository.find_mirror(h.mirror_id).is_none());
}

#[tokio::test]
async fn test_delete_refuses_target_containing_a_source() {
    let h = Harness::new().await;
    let engine = h.engine(Arc::new(TokioFileSystem::new()));

    // Another library lives inside the mirror folder
    h.libraries.libraries.lock().push(LibraryInfo {
        id: "nested".into(),
        name: "Nested".into(),
        collection_type: None,
        locations: vec![h.target_path.join("nested")],
    });

    let err = engine.delete_mirror(h.mirror_id, false, true).await.unwrap_err();
    assert!(matches!(err, SyncError::UnsafeTarget { .. }));
    assert!(h.repository.find_mirror(h.mirror_id).is_some());
}

#[tokio::test]
async fn test_delete_unknown_mirror() {
    let h = Harness::new().await;
    let engine = h.engine(Arc::new(TokioFileSystem::new()));

    let err = engine
        .delete_mirror(MirrorId::new(), true, true)
        .await
        .unwrap_err();
    assert!(matches!(err, SyncError::MirrorNotFound { .. }));
}

// ============================================================================
// Per-file failures and serialization
// ============================================================================

#[tokio::test]
async fn test_single_link_failure_does_not_stop_the_walk() {
    let h = Harness::new().await;
    let engine = h.engine(Arc::new(FlakyFs {
        inner: TokioFileSystem::new(),
        broken: "Ronin",
    }));

    let report = engine
        .create_mirror(h.mirror_id, &CancellationToken::new())
        .await
        .unwrap();

    assert_eq!(report.status, MirrorStatus::Error);
    assert_eq!(report.stats.linked, 3);
    assert_eq!(report.stats.failed, 1);
    assert_eq!(report.failures.len(), 1);
    assert!(report.failures[0].path.ends_with("Ronin (1998)/Ronin (1998).mkv"));

    let (_, mirror) = h.repository.find_mirror(h.mirror_id).unwrap();
    assert_eq!(mirror.status, MirrorStatus::Error);
    assert_eq!(mirror.target_library_id.as_deref(), Some("lib-0"));
    let last_error = mirror.last_error.unwrap();
    assert!(last_error.starts_with("1 of 4 files failed"), "{}", last_error);
    assert!(last_error.contains("Ronin"));

    // Files after the failing one were still linked
    assert!(h.target_path.join("Heat (1995)/trickplay/320/0.jpg").exists());
    assert!(!h.target_path.join("Ronin (1998)/Ronin (1998).mkv").exists());
}

#[tokio::test]
async fn test_operations_on_one_mirror_are_serialized() {
    let h = Harness::new().await;
    h.engine(Arc::new(TokioFileSystem::new()))
        .create_mirror(h.mirror_id, &CancellationToken::new())
        .await
        .unwrap();

    let fs_access = Arc::new(OverlapFs::default());
    let engine = h.engine(fs_access.clone());
    let cancel = CancellationToken::new();

    let (first, second) = tokio::join!(
        engine.sync_mirror(h.mirror_id, &cancel),
        engine.sync_mirror(h.mirror_id, &cancel)
    );

    assert_eq!(first.unwrap().stats.operations(), 0);
    assert_eq!(second.unwrap().stats.operations(), 0);
    assert_eq!(fs_access.max_in_flight(), 1);
}

#[tokio::test]
async fn test_different_mirrors_sync_concurrently() {
    let h = Harness::new().await;
    let source = h.libraries.list_libraries().await.unwrap().remove(0);
    let spanish = h
        .repository
        .create_alternative(NewAlternative {
            name: "Spanish".into(),
            locale_code: "es-ES".into(),
            metadata_language: "es".into(),
            metadata_country: "ES".into(),
            destination_base_path: h.dir.path().join("mirrors/es"),
        })
        .await
        .unwrap();
    let other = h.repository.add_mirror(spanish.id, &source).await.unwrap();

    let fs_access = Arc::new(OverlapFs::default());
    let engine = h.engine(fs_access.clone());
    let cancel = CancellationToken::new();

    let (portuguese, spanish) = tokio::join!(
        engine.create_mirror(h.mirror_id, &cancel),
        engine.create_mirror(other.id, &cancel)
    );

    assert_eq!(portuguese.unwrap().status, MirrorStatus::Synced);
    assert_eq!(spanish.unwrap().status, MirrorStatus::Synced);
    assert!(fs_access.max_in_flight() >= 2);
}
