//! # Mirror Sync Results
//!
//! Structured outcomes of create, incremental sync and sync-all runs.
//! Per-file failures are data here, not errors: a run that could not link
//! some files still completes and reports them.

use core_library::models::{MirrorId, MirrorStatus};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Failures kept verbatim in a report; the rest are only counted
pub const MAX_REPORTED_FAILURES: usize = 50;

/// The kind of sync being performed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncKind {
    /// Initial walk that also creates the mirror library
    Full,
    /// Set difference between the source and mirror trees
    Incremental,
}

impl SyncKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncKind::Full => "full",
            SyncKind::Incremental => "incremental",
        }
    }
}

/// File operation counters of one run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncStats {
    /// Links newly created
    pub linked: u64,
    /// Mirror files whose source disappeared
    pub removed: u64,
    /// Mirror files that pointed at a different inode and were re-linked
    pub relinked: u64,
    /// Files already linked correctly
    pub unchanged: u64,
    pub failed: u64,
    pub directories_pruned: u64,
}

impl SyncStats {
    /// Filesystem mutations performed
    pub fn operations(&self) -> u64 {
        self.linked + self.removed + self.relinked + self.directories_pruned
    }

    /// Files present in the mirror after the run
    pub fn file_count(&self) -> u64 {
        self.linked + self.relinked + self.unchanged
    }
}

/// One file that could not be linked or removed
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFailure {
    pub path: PathBuf,
    pub message: String,
}

/// Outcome of a single mirror run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncReport {
    pub mirror_id: MirrorId,
    pub kind: SyncKind,
    pub target_library_id: Option<String>,
    pub status: MirrorStatus,
    pub stats: SyncStats,
    /// First [`MAX_REPORTED_FAILURES`] failures
    pub failures: Vec<FileFailure>,
    pub duration: Duration,
}

impl SyncReport {
    pub fn is_success(&self) -> bool {
        self.stats.failed == 0
    }

    /// Aggregated message stored on the mirror when files failed
    pub fn failure_summary(&self) -> Option<String> {
        if self.stats.failed == 0 {
            return None;
        }
        let total = self.stats.file_count() + self.stats.failed;
        let mut message = format!("{} of {} files failed", self.stats.failed, total);
        if let Some(first) = self.failures.first() {
            message.push_str(&format!(
                " (first: {}: {})",
                first.path.display(),
                first.message
            ));
        }
        Some(message)
    }
}

/// Per-mirror failure in a sync-all pass
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorFailure {
    pub mirror_id: MirrorId,
    pub source_library_id: String,
    pub message: String,
}

/// Outcome of [`MirrorSyncEngine::sync_all_mirrors`](crate::engine::MirrorSyncEngine::sync_all_mirrors)
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncAllSummary {
    pub reports: Vec<SyncReport>,
    pub failed: Vec<MirrorFailure>,
    /// Mirrors not attempted because the pass was cancelled
    pub not_attempted: Vec<MirrorId>,
}

impl SyncAllSummary {
    pub fn total(&self) -> usize {
        self.reports.len() + self.failed.len() + self.not_attempted.len()
    }
}

/// Running progress of one mirror walk
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncProgress {
    pub items_total: u64,
    pub items_processed: u64,
}

impl SyncProgress {
    pub fn new(items_total: u64) -> Self {
        Self {
            items_total,
            items_processed: 0,
        }
    }

    pub fn advance(&mut self) {
        self.items_processed = (self.items_processed + 1).min(self.items_total);
    }

    /// 0 to 100; an empty walk counts as complete
    pub fn percent(&self) -> u8 {
        if self.items_total == 0 {
            return 100;
        }
        ((self.items_processed as f64 / self.items_total as f64) * 100.0).min(100.0) as u8
    }
}
