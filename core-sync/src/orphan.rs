//! # Orphan Detection
//!
//! Compares every known mirror with the libraries that still exist on the
//! host and repairs drift:
//!
//! - **source deleted**: the mirror, its library and its files are removed.
//!   The files are unreachable from any remaining library.
//! - **target deleted**: the mirror goes back to `Pending` without a target.
//!   Source files are untouched, and the source is reported so callers can
//!   restore it to users who were looking at the mirror.
//!
//! Mirrors without drift are left alone. Cleanup failures are isolated per
//! mirror.

use crate::engine::MirrorSyncEngine;
use crate::error::{Result, SyncError};
use async_trait::async_trait;
use bridge_traits::library::LibraryDirectory;
use core_library::alternatives::AlternativeRepository;
use core_library::models::{AlternativeId, LibraryMirror, MirrorId};
use core_runtime::events::{CoreEvent, EventBus, MirrorEvent, OrphanReason};
use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument};

/// Mutations the detector needs from the sync engine
#[async_trait]
pub trait MirrorCleaner: Send + Sync {
    async fn delete_mirror(
        &self,
        mirror_id: MirrorId,
        delete_library: bool,
        delete_files: bool,
    ) -> Result<()>;

    async fn reset_mirror_target(&self, mirror_id: MirrorId) -> Result<()>;
}

#[async_trait]
impl MirrorCleaner for MirrorSyncEngine {
    async fn delete_mirror(
        &self,
        mirror_id: MirrorId,
        delete_library: bool,
        delete_files: bool,
    ) -> Result<()> {
        MirrorSyncEngine::delete_mirror(self, mirror_id, delete_library, delete_files)
            .await
            .map(|_| ())
    }

    async fn reset_mirror_target(&self, mirror_id: MirrorId) -> Result<()> {
        MirrorSyncEngine::reset_mirror_target(self, mirror_id)
            .await
            .map(|_| ())
    }
}

/// A mirror that drifted from the live library set
#[derive(Debug, Clone, PartialEq)]
pub struct OrphanedMirror {
    pub alternative_id: AlternativeId,
    pub mirror: LibraryMirror,
    pub reason: OrphanReason,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CleanedMirror {
    pub mirror: LibraryMirror,
    pub reason: OrphanReason,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FailedCleanup {
    pub mirror: LibraryMirror,
    pub reason: OrphanReason,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrphanCleanupResult {
    pub cleaned: Vec<CleanedMirror>,
    pub failed: Vec<FailedCleanup>,
    /// Live source libraries that lost their mirror, sorted
    pub sources_without_mirror: Vec<String>,
}

impl OrphanCleanupResult {
    pub fn is_empty(&self) -> bool {
        self.cleaned.is_empty() && self.failed.is_empty()
    }
}

/// Classify mirrors against the ids of libraries that currently exist.
///
/// A missing source wins over a missing target.
pub fn classify_orphans(
    mirrors: &[(AlternativeId, LibraryMirror)],
    live_library_ids: &HashSet<String>,
) -> Vec<OrphanedMirror> {
    mirrors
        .iter()
        .filter_map(|(alternative_id, mirror)| {
            let reason = if !live_library_ids.contains(&mirror.source_library_id) {
                OrphanReason::SourceDeleted
            } else {
                match &mirror.target_library_id {
                    Some(target) if !live_library_ids.contains(target) => {
                        OrphanReason::TargetDeleted
                    }
                    _ => return None,
                }
            };
            Some(OrphanedMirror {
                alternative_id: *alternative_id,
                mirror: mirror.clone(),
                reason,
            })
        })
        .collect()
}

pub struct OrphanDetector {
    repository: Arc<AlternativeRepository>,
    libraries: Arc<dyn LibraryDirectory>,
    cleaner: Arc<dyn MirrorCleaner>,
    event_bus: EventBus,
}

impl OrphanDetector {
    pub fn new(
        repository: Arc<AlternativeRepository>,
        libraries: Arc<dyn LibraryDirectory>,
        cleaner: Arc<dyn MirrorCleaner>,
        event_bus: EventBus,
    ) -> Self {
        Self {
            repository,
            libraries,
            cleaner,
            event_bus,
        }
    }

    /// Mirrors that currently drift from the host, without touching them
    pub async fn detect(&self) -> Result<Vec<OrphanedMirror>> {
        let live: HashSet<String> = self
            .libraries
            .list_libraries()
            .await?
            .into_iter()
            .map(|library| library.id)
            .collect();

        Ok(classify_orphans(&self.repository.list_mirrors(), &live))
    }

    #[instrument(skip(self, cancel))]
    pub async fn detect_and_clean(&self, cancel: &CancellationToken) -> Result<OrphanCleanupResult> {
        let orphans = self.detect().await?;
        let mut result = OrphanCleanupResult::default();
        if orphans.is_empty() {
            return Ok(result);
        }

        info!(count = orphans.len(), "Cleaning orphaned mirrors");
        let mut restored = BTreeSet::new();

        for orphan in orphans {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }

            let mirror_id = orphan.mirror.id;
            let outcome = match orphan.reason {
                OrphanReason::SourceDeleted => {
                    self.cleaner.delete_mirror(mirror_id, true, true).await
                }
                OrphanReason::TargetDeleted => self.cleaner.reset_mirror_target(mirror_id).await,
            };

            match outcome {
                Ok(()) => {
                    info!(
                        mirror_id = %mirror_id,
                        source_library_id = %orphan.mirror.source_library_id,
                        reason = %orphan.reason,
                        "Orphaned mirror cleaned"
                    );
                    if orphan.reason == OrphanReason::TargetDeleted {
                        restored.insert(orphan.mirror.source_library_id.clone());
                    }
                    self.event_bus
                        .emit(CoreEvent::Mirror(MirrorEvent::OrphanCleaned {
                            mirror_id: mirror_id.to_string(),
                            source_library_id: orphan.mirror.source_library_id.clone(),
                            reason: orphan.reason,
                        }))
                        .ok();
                    result.cleaned.push(CleanedMirror {
                        mirror: orphan.mirror,
                        reason: orphan.reason,
                    });
                }
                Err(e) => {
                    error!(mirror_id = %mirror_id, reason = %orphan.reason, error = %e, "Orphan cleanup failed");
                    result.failed.push(FailedCleanup {
                        mirror: orphan.mirror,
                        reason: orphan.reason,
                        error: e.to_string(),
                    });
                }
            }
        }

        result.sources_without_mirror = restored.into_iter().collect();
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bridge_traits::error::Result as BridgeResult;
    use bridge_traits::library::{CreateLibraryRequest, LibraryInfo};
    use bridge_traits::time::SystemClock;
    use core_library::models::{LanguageAlternative, PluginConfiguration};
    use core_library::store::ConfigurationStore;
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
        Cleaner {}

        #[async_trait]
        impl MirrorCleaner for Cleaner {
            async fn delete_mirror(
                &self,
                mirror_id: MirrorId,
                delete_library: bool,
                delete_files: bool,
            ) -> Result<()>;
            async fn reset_mirror_target(&self, mirror_id: MirrorId) -> Result<()>;
        }
    }

    fn mirror(source: &str, target: Option<&str>) -> LibraryMirror {
        let mut mirror = LibraryMirror::new(source, source, format!("/mirrors/{}", source), None);
        mirror.target_library_id = target.map(String::from);
        mirror
    }

    fn live(ids: &[&str]) -> HashSet<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    fn library(id: &str) -> LibraryInfo {
        LibraryInfo {
            id: id.into(),
            name: id.into(),
            collection_type: None,
            locations: vec![PathBuf::from(format!("/media/{}", id))],
        }
    }

    fn repository(mirrors: Vec<LibraryMirror>) -> Arc<AlternativeRepository> {
        let now = chrono::Utc::now();
        let config = PluginConfiguration {
            alternatives: vec![LanguageAlternative {
                id: AlternativeId::new(),
                name: "Portuguese".into(),
                locale_code: "pt-BR".into(),
                metadata_language: "pt".into(),
                metadata_country: "BR".into(),
                destination_base_path: PathBuf::from("/mirrors/pt"),
                mirrors,
                created_at: now,
                updated_at: now,
            }],
            ..Default::default()
        };
        Arc::new(AlternativeRepository::new(
            Arc::new(ConfigurationStore::in_memory(config)),
            Arc::new(SystemClock),
        ))
    }

    #[test]
    fn test_classify_orphans() {
        let alt = AlternativeId::new();
        let mirrors = vec![
            (alt, mirror("gone", Some("t1"))),
            (alt, mirror("m1", Some("t-gone"))),
            (alt, mirror("m2", Some("t2"))),
            (alt, mirror("m3", None)),
        ];

        let orphans = classify_orphans(&mirrors, &live(&["t1", "m1", "m2", "t2", "m3"]));

        assert_eq!(orphans.len(), 2);
        assert_eq!(orphans[0].mirror.source_library_id, "gone");
        assert_eq!(orphans[0].reason, OrphanReason::SourceDeleted);
        assert_eq!(orphans[1].mirror.source_library_id, "m1");
        assert_eq!(orphans[1].reason, OrphanReason::TargetDeleted);
    }

    #[test]
    fn test_missing_source_wins_over_missing_target() {
        let alt = AlternativeId::new();
        let orphans = classify_orphans(&[(alt, mirror("gone", Some("t-gone")))], &live(&[]));
        assert_eq!(orphans[0].reason, OrphanReason::SourceDeleted);
    }

    #[tokio::test]
    async fn test_source_deleted_deletes_files_and_target_deleted_resets() {
        let source_gone = mirror("gone", Some("t1"));
        let target_gone = mirror("m1", Some("t-gone"));
        let healthy = mirror("m2", Some("t2"));
        let (source_gone_id, target_gone_id) = (source_gone.id, target_gone.id);
        let repo = repository(vec![source_gone, target_gone, healthy]);

        let mut libraries = MockLibraries::new();
        libraries
            .expect_list_libraries()
            .returning(|| Ok(vec![library("t1"), library("m1"), library("m2"), library("t2")]));

        let mut cleaner = MockCleaner::new();
        cleaner
            .expect_delete_mirror()
            .with(eq(source_gone_id), eq(true), eq(true))
            .times(1)
            .returning(|_, _, _| Ok(()));
        cleaner
            .expect_reset_mirror_target()
            .with(eq(target_gone_id))
            .times(1)
            .returning(|_| Ok(()));

        let bus = EventBus::new(16);
        let mut rx = bus.subscribe();
        let detector = OrphanDetector::new(repo, Arc::new(libraries), Arc::new(cleaner), bus);

        let result = detector
            .detect_and_clean(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.cleaned.len(), 2);
        assert!(result.failed.is_empty());
        assert_eq!(result.sources_without_mirror, vec!["m1".to_string()]);

        let reasons: Vec<_> = result.cleaned.iter().map(|c| c.reason.as_str()).collect();
        assert_eq!(reasons, vec!["source deleted", "target deleted"]);

        for _ in 0..2 {
            assert!(matches!(
                rx.recv().await.unwrap(),
                CoreEvent::Mirror(MirrorEvent::OrphanCleaned { .. })
            ));
        }
    }

    #[tokio::test]
    async fn test_cleanup_failure_is_isolated() {
        let first = mirror("gone-a", Some("t1"));
        let second = mirror("gone-b", Some("t2"));
        let first_id = first.id;
        let repo = repository(vec![first, second]);

        let mut libraries = MockLibraries::new();
        libraries.expect_list_libraries().returning(|| Ok(vec![]));

        let mut cleaner = MockCleaner::new();
        cleaner
            .expect_delete_mirror()
            .times(2)
            .returning(move |id, _, _| {
                if id == first_id {
                    Err(SyncError::UnsafeTarget {
                        path: PathBuf::from("/media"),
                        reason: "contains a source location".into(),
                    })
                } else {
                    Ok(())
                }
            });

        let detector = OrphanDetector::new(
            repo,
            Arc::new(libraries),
            Arc::new(cleaner),
            EventBus::new(16),
        );
        let result = detector
            .detect_and_clean(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.cleaned.len(), 1);
        assert_eq!(result.failed.len(), 1);
        assert_eq!(result.failed[0].mirror.id, first_id);
        assert!(result.sources_without_mirror.is_empty());
    }

    #[tokio::test]
    async fn test_no_drift_touches_nothing() {
        let repo = repository(vec![mirror("m1", Some("t1"))]);

        let mut libraries = MockLibraries::new();
        libraries
            .expect_list_libraries()
            .returning(|| Ok(vec![library("m1"), library("t1")]));
        let mut cleaner = MockCleaner::new();
        cleaner.expect_delete_mirror().never();
        cleaner.expect_reset_mirror_target().never();

        let detector = OrphanDetector::new(
            repo,
            Arc::new(libraries),
            Arc::new(cleaner),
            EventBus::new(4),
        );
        let result = detector
            .detect_and_clean(&CancellationToken::new())
            .await
            .unwrap();
        assert!(result.is_empty());
    }
}
