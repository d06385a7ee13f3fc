use bridge_traits::error::BridgeError;
use core_library::error::LibraryError;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Mirror {mirror_id} not found")]
    MirrorNotFound { mirror_id: String },

    #[error("Source library {library_id} no longer exists")]
    SourceLibraryMissing { library_id: String },

    #[error("Source and mirror are on different filesystems: {} -> {}", source_path.display(), target_path.display())]
    CrossDevice {
        source_path: PathBuf,
        target_path: PathBuf,
    },

    #[error("Refusing to delete {}: {reason}", path.display())]
    UnsafeTarget { path: PathBuf, reason: String },

    #[error("Invalid input: {field} - {message}")]
    InvalidInput { field: String, message: String },

    #[error("Sync cancelled")]
    Cancelled,

    #[error("Library error: {0}")]
    Library(#[from] LibraryError),

    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),
}

impl SyncError {
    /// Map a bridge failure, keeping cross-device failures distinct
    pub(crate) fn from_bridge(error: BridgeError) -> Self {
        match error {
            BridgeError::CrossDevice {
                source_path,
                target_path,
            } => SyncError::CrossDevice {
                source_path,
                target_path,
            },
            other => SyncError::Bridge(other),
        }
    }

    pub fn is_cross_device(&self) -> bool {
        matches!(self, SyncError::CrossDevice { .. })
    }
}

pub type Result<T> = std::result::Result<T, SyncError>;
