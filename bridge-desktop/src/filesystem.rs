//! File System Access Implementation using Tokio

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    storage::{DirectoryEntry, FileIdentity, FileSystemAccess},
};
use std::io;
use std::path::Path;
use tokio::fs;
use tracing::debug;

/// `EXDEV` on Linux and macOS
#[cfg(unix)]
const CROSS_DEVICE_OS_ERROR: i32 = 18;

/// `ERROR_NOT_SAME_DEVICE`
#[cfg(windows)]
const CROSS_DEVICE_OS_ERROR: i32 = 17;

/// Tokio-based file system implementation
///
/// Hardlinks are created with `tokio::fs::hard_link`. Inode identity is
/// available on Unix only; on other platforms `file_identity` returns `None`
/// and already-linked detection degrades to "not linked".
#[derive(Debug, Clone, Default)]
pub struct TokioFileSystem;

impl TokioFileSystem {
    pub fn new() -> Self {
        Self
    }

    /// Convert std::io::Error to BridgeError
    fn map_io_error(e: io::Error) -> BridgeError {
        BridgeError::Io(e)
    }

    /// Map a hardlink failure, keeping cross-device failures distinct
    fn map_link_error(e: io::Error, original: &Path, link: &Path) -> BridgeError {
        if is_cross_device(&e) {
            BridgeError::CrossDevice {
                source_path: original.to_path_buf(),
                target_path: link.to_path_buf(),
            }
        } else {
            BridgeError::Io(e)
        }
    }
}

#[cfg(any(unix, windows))]
fn is_cross_device(e: &io::Error) -> bool {
    e.raw_os_error() == Some(CROSS_DEVICE_OS_ERROR)
}

#[cfg(not(any(unix, windows)))]
fn is_cross_device(_e: &io::Error) -> bool {
    false
}

#[async_trait]
impl FileSystemAccess for TokioFileSystem {
    async fn exists(&self, path: &Path) -> Result<bool> {
        fs::try_exists(path).await.map_err(Self::map_io_error)
    }

    async fn is_directory(&self, path: &Path) -> Result<bool> {
        match fs::metadata(path).await {
            Ok(metadata) => Ok(metadata.is_dir()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Self::map_io_error(e)),
        }
    }

    async fn create_dir_all(&self, path: &Path) -> Result<()> {
        fs::create_dir_all(path)
            .await
            .map_err(Self::map_io_error)?;
        Ok(())
    }

    async fn list_directory(&self, path: &Path) -> Result<Vec<DirectoryEntry>> {
        let mut entries = Vec::new();
        let mut read_dir = fs::read_dir(path).await.map_err(Self::map_io_error)?;

        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(Self::map_io_error)?
        {
            let file_type = entry.file_type().await.map_err(Self::map_io_error)?;
            entries.push(DirectoryEntry {
                path: entry.path(),
                is_directory: file_type.is_dir(),
            });
        }

        debug!(path = ?path, count = entries.len(), "Listed directory");
        Ok(entries)
    }

    async fn create_hard_link(&self, original: &Path, link: &Path) -> Result<()> {
        fs::hard_link(original, link)
            .await
            .map_err(|e| Self::map_link_error(e, original, link))?;
        debug!(original = ?original, link = ?link, "Created hardlink");
        Ok(())
    }

    async fn remove_file(&self, path: &Path) -> Result<()> {
        fs::remove_file(path).await.map_err(Self::map_io_error)?;
        debug!(path = ?path, "Removed file");
        Ok(())
    }

    async fn remove_dir(&self, path: &Path) -> Result<()> {
        fs::remove_dir(path).await.map_err(Self::map_io_error)?;
        debug!(path = ?path, "Removed directory");
        Ok(())
    }

    async fn remove_dir_all(&self, path: &Path) -> Result<()> {
        fs::remove_dir_all(path)
            .await
            .map_err(Self::map_io_error)?;
        debug!(path = ?path, "Removed directory tree");
        Ok(())
    }

    #[cfg(unix)]
    async fn file_identity(&self, path: &Path) -> Result<Option<FileIdentity>> {
        use std::os::unix::fs::MetadataExt;

        match fs::symlink_metadata(path).await {
            Ok(metadata) => Ok(Some(FileIdentity {
                device: metadata.dev(),
                inode: metadata.ino(),
            })),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Self::map_io_error(e)),
        }
    }

    #[cfg(not(unix))]
    async fn file_identity(&self, _path: &Path) -> Result<Option<FileIdentity>> {
        Ok(None)
    }
}
