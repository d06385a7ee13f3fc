//! # Core Configuration Module
//!
//! Runtime wiring for the language mirror core.
//!
//! ## Overview
//!
//! A builder collects the host bridges and service settings into a
//! [`CoreConfig`]. `build()` fails fast with an actionable
//! [`Error::CapabilityMissing`] when a required bridge is absent, so a
//! misconfigured host is caught at startup instead of on the first sync.
//!
//! ## Required Dependencies
//!
//! - `LibraryDirectory` - enumerate, create and delete host libraries
//! - `UserDirectory` - enumerate host users
//! - `PermissionStore` - per-user accessible library sets
//! - `FileSystemAccess` - hardlinks and tree walks (desktop default: tokio fs)
//!
//! ## Optional Dependencies
//!
//! - `ConfigurationPersistence` - durable plugin configuration
//!   (desktop default: JSON file in the user config directory)
//! - `GroupMembershipProvider` - group-driven language assignment
//! - `Clock` - time source, defaults to the system clock
//!
//! ## Usage
//!
//! ```ignore
//! use core_runtime::config::CoreConfig;
//! use std::sync::Arc;
//!
//! let config = CoreConfig::builder()
//!     .library_directory(Arc::new(HostLibraries))
//!     .user_directory(Arc::new(HostUsers))
//!     .permission_store(Arc::new(HostPermissions))
//!     .file_system(Arc::new(TokioFileSystem::new()))
//!     .orphan_sweep_interval(Duration::from_secs(3600))
//!     .build()?;
//! ```

use crate::error::{Error, Result};
use crate::events::DEFAULT_EVENT_BUFFER_SIZE;
use bridge_traits::{
    Clock, ConfigurationPersistence, FileSystemAccess, GroupMembershipProvider, LibraryDirectory,
    PermissionStore, SystemClock, UserDirectory,
};
use std::sync::Arc;
use std::time::Duration;

/// Orphan sweeps more frequent than this would hammer the host library manager
const MIN_ORPHAN_SWEEP_INTERVAL: Duration = Duration::from_secs(10);

const MAX_RECONCILE_CONCURRENCY: usize = 64;

/// Core configuration for the language mirror core.
///
/// Use [`CoreConfigBuilder`] to construct instances.
#[derive(Clone)]
pub struct CoreConfig {
    pub library_directory: Arc<dyn LibraryDirectory>,
    pub user_directory: Arc<dyn UserDirectory>,
    pub permission_store: Arc<dyn PermissionStore>,
    pub file_system: Arc<dyn FileSystemAccess>,

    /// Durable storage for the plugin configuration; in-memory only when absent
    pub configuration_persistence: Option<Arc<dyn ConfigurationPersistence>>,

    /// Directory group lookup (optional capability)
    pub group_provider: Option<Arc<dyn GroupMembershipProvider>>,

    pub clock: Arc<dyn Clock>,

    pub settings: ServiceSettings,

    pub features: FeatureFlags,
}

impl std::fmt::Debug for CoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreConfig")
            .field("library_directory", &"LibraryDirectory { ... }")
            .field("user_directory", &"UserDirectory { ... }")
            .field("permission_store", &"PermissionStore { ... }")
            .field("file_system", &"FileSystemAccess { ... }")
            .field(
                "configuration_persistence",
                &self
                    .configuration_persistence
                    .as_ref()
                    .map(|_| "ConfigurationPersistence { ... }"),
            )
            .field(
                "group_provider",
                &self
                    .group_provider
                    .as_ref()
                    .map(|_| "GroupMembershipProvider { ... }"),
            )
            .field("settings", &self.settings)
            .field("features", &self.features)
            .finish()
    }
}

/// Tunables for the background service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSettings {
    /// Capacity of the event bus channel
    pub event_buffer_size: usize,

    /// Interval of the periodic orphan sweep; `None` disables it
    pub orphan_sweep_interval: Option<Duration>,

    /// Number of users reconciled in parallel during an all-users pass
    pub reconcile_concurrency: usize,

    /// Run a full reconciliation when the service starts
    pub reconcile_on_start: bool,
}

impl Default for ServiceSettings {
    fn default() -> Self {
        Self {
            event_buffer_size: DEFAULT_EVENT_BUFFER_SIZE,
            orphan_sweep_interval: None,
            reconcile_concurrency: 4,
            reconcile_on_start: false,
        }
    }
}

/// Feature flags control optional functionality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FeatureFlags {
    /// Assign languages from directory groups (requires GroupMembershipProvider)
    pub enable_group_assignment: bool,

    /// Run the periodic orphan sweep (requires an orphan sweep interval)
    pub enable_periodic_cleanup: bool,
}

impl CoreConfig {
    pub fn builder() -> CoreConfigBuilder {
        CoreConfigBuilder::default()
    }

    /// Validates settings and feature flags against the injected bridges.
    pub fn validate(&self) -> Result<()> {
        if self.settings.event_buffer_size == 0 {
            return Err(Error::Config(
                "Event buffer size must be greater than 0".to_string(),
            ));
        }

        if self.settings.reconcile_concurrency == 0
            || self.settings.reconcile_concurrency > MAX_RECONCILE_CONCURRENCY
        {
            return Err(Error::Config(format!(
                "Reconcile concurrency must be between 1 and {}",
                MAX_RECONCILE_CONCURRENCY
            )));
        }

        if let Some(interval) = self.settings.orphan_sweep_interval {
            if interval < MIN_ORPHAN_SWEEP_INTERVAL {
                return Err(Error::Config(format!(
                    "Orphan sweep interval must be at least {}s",
                    MIN_ORPHAN_SWEEP_INTERVAL.as_secs()
                )));
            }
        }

        if self.features.enable_group_assignment && self.group_provider.is_none() {
            return Err(Error::Config(
                "Group assignment enabled but no GroupMembershipProvider provided. \
                 Disable the feature or inject a GroupMembershipProvider implementation."
                    .to_string(),
            ));
        }

        if self.features.enable_periodic_cleanup && self.settings.orphan_sweep_interval.is_none()
        {
            return Err(Error::Config(
                "Periodic cleanup enabled but no orphan sweep interval set. \
                 Use .orphan_sweep_interval() to configure it."
                    .to_string(),
            ));
        }

        Ok(())
    }
}

fn capability_missing(capability: &str, purpose: &str) -> Error {
    Error::CapabilityMissing {
        capability: capability.to_string(),
        message: format!(
            "{} implementation is required to {}. Inject the host adapter with .{}()",
            capability,
            purpose,
            setter_name(capability)
        ),
    }
}

fn setter_name(capability: &str) -> String {
    let mut name = String::new();
    for (i, ch) in capability.chars().enumerate() {
        if ch.is_uppercase() {
            if i > 0 {
                name.push('_');
            }
            name.extend(ch.to_lowercase());
        } else {
            name.push(ch);
        }
    }
    name.replace("file_system_access", "file_system")
}

#[cfg(feature = "desktop-shims")]
fn provide_default_file_system() -> Result<Arc<dyn FileSystemAccess>> {
    let fs: Arc<dyn FileSystemAccess> = Arc::new(bridge_desktop::TokioFileSystem::new());
    Ok(fs)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_file_system() -> Result<Arc<dyn FileSystemAccess>> {
    Err(Error::CapabilityMissing {
        capability: "FileSystemAccess".to_string(),
        message: "FileSystemAccess implementation is required to create and remove hardlinks. \
                 Desktop: enable the 'desktop-shims' feature to use the default TokioFileSystem. \
                 Other hosts: inject an adapter with .file_system()."
            .to_string(),
    })
}

#[cfg(feature = "desktop-shims")]
fn provide_default_persistence() -> Option<Arc<dyn ConfigurationPersistence>> {
    let persistence: Arc<dyn ConfigurationPersistence> =
        Arc::new(bridge_desktop::JsonFileConfigurationPersistence::default_location());
    Some(persistence)
}

#[cfg(not(feature = "desktop-shims"))]
fn provide_default_persistence() -> Option<Arc<dyn ConfigurationPersistence>> {
    None
}

/// Builder for [`CoreConfig`].
#[derive(Default)]
pub struct CoreConfigBuilder {
    library_directory: Option<Arc<dyn LibraryDirectory>>,
    user_directory: Option<Arc<dyn UserDirectory>>,
    permission_store: Option<Arc<dyn PermissionStore>>,
    file_system: Option<Arc<dyn FileSystemAccess>>,
    configuration_persistence: Option<Arc<dyn ConfigurationPersistence>>,
    group_provider: Option<Arc<dyn GroupMembershipProvider>>,
    clock: Option<Arc<dyn Clock>>,
    settings: ServiceSettings,
    features: FeatureFlags,
}

impl CoreConfigBuilder {
    pub fn library_directory(mut self, directory: Arc<dyn LibraryDirectory>) -> Self {
        self.library_directory = Some(directory);
        self
    }

    pub fn user_directory(mut self, directory: Arc<dyn UserDirectory>) -> Self {
        self.user_directory = Some(directory);
        self
    }

    pub fn permission_store(mut self, store: Arc<dyn PermissionStore>) -> Self {
        self.permission_store = Some(store);
        self
    }

    /// Sets the filesystem adapter.
    ///
    /// With the `desktop-shims` feature a `TokioFileSystem` is used when this
    /// is not called.
    pub fn file_system(mut self, fs: Arc<dyn FileSystemAccess>) -> Self {
        self.file_system = Some(fs);
        self
    }

    pub fn configuration_persistence(
        mut self,
        persistence: Arc<dyn ConfigurationPersistence>,
    ) -> Self {
        self.configuration_persistence = Some(persistence);
        self
    }

    /// Injects the optional directory group capability.
    pub fn group_provider(mut self, provider: Arc<dyn GroupMembershipProvider>) -> Self {
        self.group_provider = Some(provider);
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn event_buffer_size(mut self, size: usize) -> Self {
        self.settings.event_buffer_size = size;
        self
    }

    pub fn orphan_sweep_interval(mut self, interval: Duration) -> Self {
        self.settings.orphan_sweep_interval = Some(interval);
        self
    }

    pub fn reconcile_concurrency(mut self, concurrency: usize) -> Self {
        self.settings.reconcile_concurrency = concurrency;
        self
    }

    pub fn reconcile_on_start(mut self, enabled: bool) -> Self {
        self.settings.reconcile_on_start = enabled;
        self
    }

    pub fn enable_group_assignment(mut self, enabled: bool) -> Self {
        self.features.enable_group_assignment = enabled;
        self
    }

    pub fn enable_periodic_cleanup(mut self, enabled: bool) -> Self {
        self.features.enable_periodic_cleanup = enabled;
        self
    }

    pub fn settings(mut self, settings: ServiceSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn features(mut self, features: FeatureFlags) -> Self {
        self.features = features;
        self
    }

    /// Builds the final `CoreConfig`.
    ///
    /// # Errors
    ///
    /// - `CapabilityMissing` when a required bridge was not injected
    /// - `Config` when settings are out of range or a feature flag lacks its bridge
    pub fn build(self) -> Result<CoreConfig> {
        let library_directory = self.library_directory.ok_or_else(|| {
            capability_missing("LibraryDirectory", "create and delete mirror libraries")
        })?;

        let user_directory = self
            .user_directory
            .ok_or_else(|| capability_missing("UserDirectory", "enumerate host users"))?;

        let permission_store = self.permission_store.ok_or_else(|| {
            capability_missing("PermissionStore", "reconcile user library access")
        })?;

        let file_system = match self.file_system {
            Some(fs) => fs,
            None => provide_default_file_system()?,
        };

        let configuration_persistence = self
            .configuration_persistence
            .or_else(provide_default_persistence);

        let config = CoreConfig {
            library_directory,
            user_directory,
            permission_store,
            file_system,
            configuration_persistence,
            group_provider: self.group_provider,
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemClock)),
            settings: self.settings,
            features: self.features,
        };

        config.validate()?;

        Ok(config)
    }
}
