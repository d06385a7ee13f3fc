//! Hardlink primitives and classified tree scans

use crate::classifier::{Classification, FileClassifier};
use crate::error::{Result, SyncError};
use bridge_traits::storage::FileSystemAccess;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

/// What [`LinkOperator::link`] did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkOutcome {
    Created,
    /// Target already pointed at the source inode
    AlreadyLinked,
    /// Target existed as a different file and was re-linked
    Replaced,
}

/// Creates, checks and removes the hardlinks of a mirror tree
#[derive(Clone)]
pub struct LinkOperator {
    fs: Arc<dyn FileSystemAccess>,
}

impl LinkOperator {
    pub fn new(fs: Arc<dyn FileSystemAccess>) -> Self {
        Self { fs }
    }

    /// Link `target` to `source`, creating parent directories as needed.
    pub async fn link(&self, source: &Path, target: &Path) -> Result<LinkOutcome> {
        let mut outcome = LinkOutcome::Created;

        if self.fs.exists(target).await? {
            if self.is_linked(source, target).await? {
                return Ok(LinkOutcome::AlreadyLinked);
            }
            self.fs.remove_file(target).await?;
            outcome = LinkOutcome::Replaced;
        } else if let Some(parent) = target.parent() {
            self.fs.create_dir_all(parent).await?;
        }

        self.fs
            .create_hard_link(source, target)
            .await
            .map_err(SyncError::from_bridge)?;

        trace!(source = ?source, target = ?target, outcome = ?outcome, "Linked file");
        Ok(outcome)
    }

    /// Whether both paths refer to the same inode
    pub async fn is_linked(&self, source: &Path, target: &Path) -> Result<bool> {
        Ok(self.fs.is_same_file(source, target).await?)
    }

    /// Remove a mirror file. Returns `false` when it was already gone.
    pub async fn remove(&self, path: &Path) -> Result<bool> {
        match self.fs.remove_file(path).await {
            Ok(()) => Ok(true),
            Err(e) if e.is_not_found() => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Remove directories left empty between `path` and `root` (exclusive).
    pub async fn prune_empty_parents(&self, root: &Path, path: &Path) -> Result<usize> {
        let mut removed = 0;
        let mut current = path.parent();

        while let Some(dir) = current {
            if dir == root || !dir.starts_with(root) {
                break;
            }
            if !self.fs.is_directory(dir).await? || !self.fs.list_directory(dir).await?.is_empty()
            {
                break;
            }
            self.fs.remove_dir(dir).await?;
            removed += 1;
            current = dir.parent();
        }

        Ok(removed)
    }

    /// Verify that `target_root` can hold hardlinks to `sample`.
    ///
    /// Links the sample under a throwaway name and removes it again. A
    /// cross-device failure surfaces as [`SyncError::CrossDevice`].
    pub async fn probe(&self, sample: &Path, target_root: &Path) -> Result<()> {
        self.fs.create_dir_all(target_root).await?;

        let probe = target_root.join(format!(".polyglot-probe-{}", uuid::Uuid::new_v4()));
        self.fs
            .create_hard_link(sample, &probe)
            .await
            .map_err(|e| match SyncError::from_bridge(e) {
                SyncError::CrossDevice { .. } => SyncError::CrossDevice {
                    source_path: sample.to_path_buf(),
                    target_path: target_root.to_path_buf(),
                },
                other => other,
            })?;
        self.remove(&probe).await?;

        debug!(sample = ?sample, target_root = ?target_root, "Hardlink probe succeeded");
        Ok(())
    }

    /// Relative paths of every file under `root` the classifier would link.
    ///
    /// Skipped directories are pruned without being listed. A missing root
    /// yields an empty list. Paths are sorted.
    pub async fn scan(
        &self,
        root: &Path,
        classifier: &FileClassifier,
        cancel: &CancellationToken,
    ) -> Result<Vec<PathBuf>> {
        if !self.fs.is_directory(root).await? {
            return Ok(Vec::new());
        }

        // Stop descending once cancelled; the check below reports it
        let descend = |dir: &Path| {
            !cancel.is_cancelled()
                && dir.strip_prefix(root).map_or(false, |relative| {
                    classifier.classify_relative(relative, true) != Classification::Skip
                })
        };
        let files = self.fs.walk_filtered(root, &descend).await?;

        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        Ok(files
            .into_iter()
            .filter(|relative| {
                let keep = classifier.classify_relative(relative, false) != Classification::Skip;
                if !keep {
                    trace!(path = ?relative, "Skipping");
                }
                keep
            })
            .collect())
    }
}
