//! Domain models for language alternatives, library mirrors and user assignments
//!
//! Everything here is plain data persisted as part of [`PluginConfiguration`].
//! A [`LanguageAlternative`] owns its [`LibraryMirror`]s; mirrors have no
//! lifecycle of their own outside the alternative that lists them.

use crate::error::{LibraryError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

// ============================================================================
// Identifiers
// ============================================================================

/// Unique identifier for a language alternative
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AlternativeId(pub Uuid);

impl AlternativeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> std::result::Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for AlternativeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for AlternativeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Unique identifier for a library mirror
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MirrorId(pub Uuid);

impl MirrorId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn from_string(s: &str) -> std::result::Result<Self, uuid::Error> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

impl Default for MirrorId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for MirrorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ============================================================================
// Mirror Status
// ============================================================================

/// Lifecycle state of a library mirror
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MirrorStatus {
    /// Configured but never synced, or reset after its library was removed
    Pending,
    /// A create or incremental sync is running (or was cancelled mid-way)
    Syncing,
    /// Last sync linked every file
    Synced,
    /// Last sync failed or finished with per-file failures
    Error,
}

impl MirrorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MirrorStatus::Pending => "pending",
            MirrorStatus::Syncing => "syncing",
            MirrorStatus::Synced => "synced",
            MirrorStatus::Error => "error",
        }
    }
}

impl FromStr for MirrorStatus {
    type Err = LibraryError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(MirrorStatus::Pending),
            "syncing" => Ok(MirrorStatus::Syncing),
            "synced" => Ok(MirrorStatus::Synced),
            "error" => Ok(MirrorStatus::Error),
            _ => Err(LibraryError::invalid("status", format!("unknown status '{}'", s))),
        }
    }
}

impl fmt::Display for MirrorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// Library Mirror
// ============================================================================

/// A hardlinked copy of one source library, presented in another language
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LibraryMirror {
    pub id: MirrorId,
    pub source_library_id: String,
    pub source_library_name: String,
    /// Host id of the mirror library, set once the library is created
    pub target_library_id: Option<String>,
    /// Root directory the mirror tree is linked into
    pub target_path: PathBuf,
    pub collection_type: Option<String>,
    pub status: MirrorStatus,
    pub last_synced_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub last_file_count: Option<u64>,
}

impl LibraryMirror {
    pub fn new(
        source_library_id: impl Into<String>,
        source_library_name: impl Into<String>,
        target_path: impl Into<PathBuf>,
        collection_type: Option<String>,
    ) -> Self {
        Self {
            id: MirrorId::new(),
            source_library_id: source_library_id.into(),
            source_library_name: source_library_name.into(),
            target_library_id: None,
            target_path: target_path.into(),
            collection_type,
            status: MirrorStatus::Pending,
            last_synced_at: None,
            last_error: None,
            last_file_count: None,
        }
    }

    /// Whether users assigned to this mirror's alternative should see it
    /// instead of the source library.
    ///
    /// A mirror is ready once its library exists and it has been through at
    /// least one sync; a pending mirror never hides the source.
    pub fn is_ready(&self) -> bool {
        self.target_library_id.is_some() && self.status != MirrorStatus::Pending
    }

    /// Enter `Syncing`. Allowed from every state so a cancelled sync can resume.
    pub fn start_sync(&mut self) -> Result<()> {
        self.validate_transition(MirrorStatus::Syncing)?;
        self.status = MirrorStatus::Syncing;
        Ok(())
    }

    /// Finish a sync in which every file was handled.
    pub fn mark_synced(
        &mut self,
        target_library_id: String,
        file_count: u64,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.validate_transition(MirrorStatus::Synced)?;
        self.status = MirrorStatus::Synced;
        self.target_library_id = Some(target_library_id);
        self.last_synced_at = Some(at);
        self.last_error = None;
        self.last_file_count = Some(file_count);
        Ok(())
    }

    /// Finish a sync that failed outright or had per-file failures.
    ///
    /// `target_library_id` is kept when the library was already created.
    pub fn mark_failed(
        &mut self,
        message: impl Into<String>,
        target_library_id: Option<String>,
        file_count: Option<u64>,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.validate_transition(MirrorStatus::Error)?;
        self.status = MirrorStatus::Error;
        if target_library_id.is_some() {
            self.target_library_id = target_library_id;
        }
        self.last_synced_at = Some(at);
        self.last_error = Some(message.into());
        if file_count.is_some() {
            self.last_file_count = file_count;
        }
        Ok(())
    }

    /// Record a failure detected before any work started, without leaving
    /// the current state.
    pub fn record_error(&mut self, message: impl Into<String>) {
        self.last_error = Some(message.into());
    }

    /// Forget the mirror library after the host removed it. Files stay on disk.
    pub fn reset_target(&mut self) {
        self.target_library_id = None;
        self.status = MirrorStatus::Pending;
        self.last_error = None;
    }

    fn validate_transition(&self, to: MirrorStatus) -> Result<()> {
        let valid = match (self.status, to) {
            // Every state may start a sync; Syncing -> Syncing resumes a cancelled run
            (_, MirrorStatus::Syncing) => true,

            // From Syncing
            (MirrorStatus::Syncing, MirrorStatus::Synced) => true,
            (MirrorStatus::Syncing, MirrorStatus::Error) => true,

            // Completion is only reachable through Syncing
            _ => false,
        };

        if !valid {
            return Err(LibraryError::InvalidStateTransition {
                from: self.status.as_str().to_string(),
                to: to.as_str().to_string(),
                reason: format!(
                    "Cannot transition mirror {} from {} to {}",
                    self.id,
                    self.status.as_str(),
                    to.as_str()
                ),
            });
        }

        Ok(())
    }
}

// ============================================================================
// Language Alternative
// ============================================================================

/// A presentation language with its own set of mirrored libraries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LanguageAlternative {
    pub id: AlternativeId,
    pub name: String,
    /// Locale identifier such as `pt-BR`, unique across alternatives
    pub locale_code: String,
    /// Metadata language passed to created libraries (ISO 639-1)
    pub metadata_language: String,
    /// Metadata country passed to created libraries (ISO 3166-1)
    pub metadata_country: String,
    /// Directory under which each mirror gets its own folder
    pub destination_base_path: PathBuf,
    pub mirrors: Vec<LibraryMirror>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LanguageAlternative {
    pub fn mirror(&self, mirror_id: MirrorId) -> Option<&LibraryMirror> {
        self.mirrors.iter().find(|m| m.id == mirror_id)
    }

    pub fn mirror_mut(&mut self, mirror_id: MirrorId) -> Option<&mut LibraryMirror> {
        self.mirrors.iter_mut().find(|m| m.id == mirror_id)
    }

    pub fn mirror_for_source(&self, source_library_id: &str) -> Option<&LibraryMirror> {
        self.mirrors
            .iter()
            .find(|m| m.source_library_id == source_library_id)
    }
}

// ============================================================================
// User Assignment
// ============================================================================

/// Who made the current language assignment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssignmentSource {
    Manual,
    Group,
    AutoDefault,
}

impl AssignmentSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentSource::Manual => "Manual",
            AssignmentSource::Group => "Group",
            AssignmentSource::AutoDefault => "AutoDefault",
        }
    }
}

impl fmt::Display for AssignmentSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Language assignment of a single user. One record per user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserLanguageConfig {
    pub user_id: String,
    /// `None` selects the source libraries
    pub selected_alternative_id: Option<AlternativeId>,
    /// Master switch: when false the core never touches this user's permissions
    pub is_plugin_managed: bool,
    /// Set by an administrator; automated assignment must not overwrite it
    pub manually_set: bool,
    pub set_by: AssignmentSource,
    pub set_at: DateTime<Utc>,
}

/// Maps a directory group to a language alternative
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupMapping {
    pub group_name: String,
    /// `None` maps the group to the source libraries
    pub alternative_id: Option<AlternativeId>,
    /// Higher wins when a user is in several mapped groups
    pub priority: i32,
}

// ============================================================================
// File Classification Settings
// ============================================================================

/// Extension and directory sets driving which files are mirrored
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileClassificationSettings {
    /// File extensions never linked (host writes per-language metadata there)
    pub excluded_extensions: Vec<String>,
    /// Directory names whose whole subtree is skipped
    pub excluded_directories: Vec<String>,
    /// Directory names whose whole subtree is linked regardless of extension.
    /// Entries starting with `.` also match as a name suffix (`Movie.trickplay`).
    pub included_directories: Vec<String>,
}

impl Default for FileClassificationSettings {
    fn default() -> Self {
        Self {
            excluded_extensions: [".nfo", ".jpg", ".jpeg", ".png", ".gif", ".webp", ".bmp", ".tbn"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            excluded_directories: ["metadata", "extrafanart", "extrathumbs", ".actors"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            included_directories: ["trickplay", ".trickplay"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

impl FileClassificationSettings {
    /// Lower-cased, de-duplicated copy; extensions gain a leading dot.
    pub fn normalized(&self) -> Self {
        fn normalize(values: &[String], dotted: bool) -> Vec<String> {
            let mut seen = HashSet::new();
            values
                .iter()
                .map(|v| v.trim().to_lowercase())
                .filter(|v| !v.is_empty() && v != ".")
                .map(|v| {
                    if dotted && !v.starts_with('.') {
                        format!(".{}", v)
                    } else {
                        v
                    }
                })
                .filter(|v| seen.insert(v.clone()))
                .collect()
        }

        Self {
            excluded_extensions: normalize(&self.excluded_extensions, true),
            excluded_directories: normalize(&self.excluded_directories, false),
            included_directories: normalize(&self.included_directories, false),
        }
    }
}

// ============================================================================
// Plugin Configuration
// ============================================================================

/// Root of everything persisted by the core
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PluginConfiguration {
    pub alternatives: Vec<LanguageAlternative>,
    pub user_configs: Vec<UserLanguageConfig>,
    pub classification: FileClassificationSettings,
    /// Alternative given to newly created users when auto-management is on
    pub default_alternative_id: Option<AlternativeId>,
    /// Put new host users under management automatically
    pub auto_manage_new_users: bool,
    pub group_mappings: Vec<GroupMapping>,
}

impl PluginConfiguration {
    pub fn alternative(&self, id: AlternativeId) -> Option<&LanguageAlternative> {
        self.alternatives.iter().find(|a| a.id == id)
    }

    pub fn alternative_mut(&mut self, id: AlternativeId) -> Option<&mut LanguageAlternative> {
        self.alternatives.iter_mut().find(|a| a.id == id)
    }

    /// Locate a mirror together with the alternative that owns it
    pub fn find_mirror(&self, mirror_id: MirrorId) -> Option<(&LanguageAlternative, &LibraryMirror)> {
        self.alternatives
            .iter()
            .find_map(|alt| alt.mirror(mirror_id).map(|mirror| (alt, mirror)))
    }

    pub fn find_mirror_mut(&mut self, mirror_id: MirrorId) -> Option<&mut LibraryMirror> {
        self.alternatives
            .iter_mut()
            .find_map(|alt| alt.mirror_mut(mirror_id))
    }

    /// All mirrors paired with their owning alternative id
    pub fn mirrors(&self) -> impl Iterator<Item = (AlternativeId, &LibraryMirror)> {
        self.alternatives
            .iter()
            .flat_map(|alt| alt.mirrors.iter().map(move |m| (alt.id, m)))
    }

    pub fn user_config(&self, user_id: &str) -> Option<&UserLanguageConfig> {
        self.user_configs.iter().find(|c| c.user_id == user_id)
    }

    pub fn user_config_mut(&mut self, user_id: &str) -> Option<&mut UserLanguageConfig> {
        self.user_configs.iter_mut().find(|c| c.user_id == user_id)
    }

    /// Source library ids referenced by at least one mirror
    pub fn managed_source_ids(&self) -> HashSet<String> {
        self.mirrors()
            .map(|(_, m)| m.source_library_id.clone())
            .collect()
    }

    /// Every library id this configuration references, as source or target
    pub fn managed_library_ids(&self) -> HashSet<String> {
        let mut ids = self.managed_source_ids();
        ids.extend(
            self.mirrors()
                .filter_map(|(_, m)| m.target_library_id.clone()),
        );
        ids
    }
}
