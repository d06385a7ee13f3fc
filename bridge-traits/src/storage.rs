//! Storage and File System Abstractions
//!
//! Provides the filesystem primitives the mirror engine needs (listing,
//! hardlinking, removal, file identity) and a persistence hook for the
//! plugin configuration blob.

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::error::Result;

/// A single entry returned by [`FileSystemAccess::list_directory`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub path: PathBuf,
    pub is_directory: bool,
}

/// Identity of the inode backing a path
///
/// Two paths with equal identities are hardlinks to the same content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FileIdentity {
    pub device: u64,
    pub inode: u64,
}

/// File system access trait
///
/// Abstracts the file operations used by mirror synchronization. Source and
/// mirror roots are expected to live on one filesystem; adapters must report
/// a cross-filesystem hardlink attempt as
/// [`BridgeError::CrossDevice`](crate::BridgeError::CrossDevice) rather than
/// falling back to copying.
///
/// # Example
///
/// ```ignore
/// use bridge_traits::storage::FileSystemAccess;
///
/// async fn link(fs: &dyn FileSystemAccess, src: &Path, dst: &Path) -> Result<()> {
///     if let Some(parent) = dst.parent() {
///         fs.create_dir_all(parent).await?;
///     }
///     fs.create_hard_link(src, dst).await
/// }
/// ```
#[async_trait]
pub trait FileSystemAccess: Send + Sync {
    /// Check if a file or directory exists
    async fn exists(&self, path: &Path) -> Result<bool>;

    /// Check if a path is an existing directory
    async fn is_directory(&self, path: &Path) -> Result<bool>;

    /// Create a directory and all parent directories if they don't exist
    async fn create_dir_all(&self, path: &Path) -> Result<()>;

    /// List the immediate children of a directory
    async fn list_directory(&self, path: &Path) -> Result<Vec<DirectoryEntry>>;

    /// Create `link` as a hardlink to `original`
    ///
    /// Fails with `CrossDevice` when the two paths are on different filesystems.
    async fn create_hard_link(&self, original: &Path, link: &Path) -> Result<()>;

    /// Delete a file
    async fn remove_file(&self, path: &Path) -> Result<()>;

    /// Delete an empty directory
    async fn remove_dir(&self, path: &Path) -> Result<()>;

    /// Delete a directory and all its contents
    async fn remove_dir_all(&self, path: &Path) -> Result<()>;

    /// Identity of the inode behind `path`, if the platform exposes one
    async fn file_identity(&self, path: &Path) -> Result<Option<FileIdentity>>;

    /// Recursively walk `root`, returning paths of all files relative to it
    ///
    /// Directories are descended but not returned.
    async fn walk(&self, root: &Path) -> Result<Vec<PathBuf>> {
        self.walk_filtered(root, &|_: &Path| true).await
    }

    /// Like [`walk`](Self::walk), but only descends into subdirectories for
    /// which `descend` returns `true`. Rejected subtrees are never listed.
    async fn walk_filtered(
        &self,
        root: &Path,
        descend: &(dyn for<'p> Fn(&'p Path) -> bool + Send + Sync),
    ) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        let mut pending = vec![root.to_path_buf()];

        while let Some(dir) = pending.pop() {
            for entry in self.list_directory(&dir).await? {
                if entry.is_directory {
                    if descend(&entry.path) {
                        pending.push(entry.path);
                    }
                } else if let Ok(relative) = entry.path.strip_prefix(root) {
                    files.push(relative.to_path_buf());
                }
            }
        }

        files.sort();
        Ok(files)
    }

    /// Whether two paths are hardlinks to the same inode
    ///
    /// Returns `false` when either path is missing or identity is unsupported.
    async fn is_same_file(&self, a: &Path, b: &Path) -> Result<bool> {
        let (Some(left), Some(right)) = (self.file_identity(a).await?, self.file_identity(b).await?)
        else {
            return Ok(false);
        };
        Ok(left == right)
    }
}

/// Durable storage for the serialized plugin configuration
///
/// The core owns the serialization format; adapters only move bytes.
#[async_trait]
pub trait ConfigurationPersistence: Send + Sync {
    /// Load the last saved configuration, or `None` on first run
    async fn load(&self) -> Result<Option<Vec<u8>>>;

    /// Replace the saved configuration
    ///
    /// Implementations should make the replacement atomic.
    async fn save(&self, data: &[u8]) -> Result<()>;
}
