//! Host Library Management
//!
//! Narrow view of the host's library manager: enough to enumerate existing
//! libraries and to create or delete the mirror libraries the core owns.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::Result;

/// A library as reported by the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryInfo {
    /// Host-assigned library identifier
    pub id: String,
    /// Display name
    pub name: String,
    /// Host collection type (e.g. "movies", "tvshows"), if any
    pub collection_type: Option<String>,
    /// Filesystem locations backing the library
    pub locations: Vec<PathBuf>,
}

/// Parameters for creating a mirror library on the host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateLibraryRequest {
    pub name: String,
    pub path: PathBuf,
    pub collection_type: Option<String>,
    /// Preferred metadata language (ISO 639-1, e.g. "pt")
    pub metadata_language: String,
    /// Metadata country code (ISO 3166-1, e.g. "BR")
    pub metadata_country: String,
}

/// Library directory trait
///
/// # Example
///
/// ```ignore
/// use bridge_traits::library::LibraryDirectory;
///
/// async fn library_exists(dir: &dyn LibraryDirectory, id: &str) -> Result<bool> {
///     Ok(dir.list_libraries().await?.iter().any(|l| l.id == id))
/// }
/// ```
#[async_trait]
pub trait LibraryDirectory: Send + Sync {
    /// List every library currently registered with the host
    async fn list_libraries(&self) -> Result<Vec<LibraryInfo>>;

    /// Create a library and return its host identifier
    async fn create_library(&self, request: CreateLibraryRequest) -> Result<String>;

    /// Delete a library record
    ///
    /// Implementations must not touch the files under the library's locations.
    /// Deleting an unknown id should return [`BridgeError::NotFound`](crate::BridgeError::NotFound).
    async fn delete_library(&self, library_id: &str) -> Result<()>;

    /// Ask the host to rescan a library after its files changed
    async fn refresh_library(&self, _library_id: &str) -> Result<()> {
        Ok(())
    }

    /// Look up a single library by id
    async fn get_library(&self, library_id: &str) -> Result<Option<LibraryInfo>> {
        Ok(self
            .list_libraries()
            .await?
            .into_iter()
            .find(|library| library.id == library_id))
    }
}
