use bridge_traits::error::BridgeError;
use core_library::error::LibraryError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AccessError {
    #[error("User {user_id} does not exist on the host")]
    UserNotFound { user_id: String },

    #[error("Language alternative {alternative_id} not found")]
    AlternativeNotFound { alternative_id: String },

    #[error("Invalid input: {field} - {message}")]
    InvalidInput { field: String, message: String },

    #[error("Reconciliation cancelled")]
    Cancelled,

    #[error("Library error: {0}")]
    Library(#[from] LibraryError),

    #[error("Bridge error: {0}")]
    Bridge(#[from] BridgeError),
}

pub type Result<T> = std::result::Result<T, AccessError>;
