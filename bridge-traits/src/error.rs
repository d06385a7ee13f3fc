use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),

    #[error("Bridge operation failed: {0}")]
    OperationFailed(String),

    #[error("{kind} not found: {id}")]
    NotFound { kind: String, id: String },

    #[error("Cannot hardlink across devices: {} -> {}", source_path.display(), target_path.display())]
    CrossDevice {
        source_path: PathBuf,
        target_path: PathBuf,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Whether this error reports a missing host entity
    pub fn is_not_found(&self) -> bool {
        match self {
            BridgeError::NotFound { .. } => true,
            BridgeError::Io(e) => e.kind() == std::io::ErrorKind::NotFound,
            _ => false,
        }
    }

    /// Whether this error reports a hardlink attempt across filesystems
    pub fn is_cross_device(&self) -> bool {
        matches!(self, BridgeError::CrossDevice { .. })
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;
