//! Snapshot-read / copy-mutate-swap configuration store
//!
//! Readers load the current `Arc<PluginConfiguration>` without locking and
//! only ever receive owned values derived from it. Writers are serialized:
//! each mutation runs on a fresh clone, the clone is persisted, and only
//! then is it published with a single atomic swap. A reader therefore sees
//! either the configuration before a mutation or after it, never a mix.

use crate::error::{LibraryError, Result};
use crate::models::PluginConfiguration;
use arc_swap::ArcSwap;
use bridge_traits::storage::ConfigurationPersistence;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, instrument, warn};

pub struct ConfigurationStore {
    current: ArcSwap<PluginConfiguration>,
    /// Serializes writers across the persist + swap step
    write_lock: Mutex<()>,
    persistence: Option<Arc<dyn ConfigurationPersistence>>,
}

impl ConfigurationStore {
    /// Store kept only in memory
    pub fn in_memory(config: PluginConfiguration) -> Self {
        Self {
            current: ArcSwap::from_pointee(config),
            write_lock: Mutex::new(()),
            persistence: None,
        }
    }

    pub fn with_persistence(
        config: PluginConfiguration,
        persistence: Arc<dyn ConfigurationPersistence>,
    ) -> Self {
        Self {
            current: ArcSwap::from_pointee(config),
            write_lock: Mutex::new(()),
            persistence: Some(persistence),
        }
    }

    /// Load the saved configuration, starting from defaults when nothing was saved yet
    #[instrument(skip(persistence))]
    pub async fn load(persistence: Arc<dyn ConfigurationPersistence>) -> Result<Self> {
        let config = match persistence.load().await? {
            Some(bytes) => {
                let config: PluginConfiguration = serde_json::from_slice(&bytes)?;
                info!(
                    alternatives = config.alternatives.len(),
                    users = config.user_configs.len(),
                    "Loaded plugin configuration"
                );
                config
            }
            None => PluginConfiguration::default(),
        };

        Ok(Self::with_persistence(config, persistence))
    }

    /// Project a value out of the current snapshot.
    ///
    /// The selector only sees a shared reference to an immutable snapshot, so
    /// whatever it returns is detached from live state.
    pub fn read<T, F>(&self, selector: F) -> T
    where
        F: FnOnce(&PluginConfiguration) -> T,
    {
        let snapshot = self.current.load();
        selector(&snapshot)
    }

    /// Isolated deep copy of the whole configuration
    pub fn snapshot(&self) -> PluginConfiguration {
        self.read(|config| config.clone())
    }

    /// Apply `mutation` to a fresh copy and publish it.
    pub async fn update<F>(&self, mutation: F) -> Result<()>
    where
        F: FnOnce(&mut PluginConfiguration),
    {
        self.modify(|config| {
            mutation(config);
            Ok(())
        })
        .await
    }

    /// Apply `mutation` and publish only when it returns `true`.
    pub async fn try_update<F>(&self, mutation: F) -> Result<bool>
    where
        F: FnOnce(&mut PluginConfiguration) -> bool,
    {
        let _guard = self.write_lock.lock().await;

        let mut next = PluginConfiguration::clone(&self.current.load());
        if !mutation(&mut next) {
            debug!("Configuration mutation declined, nothing published");
            return Ok(false);
        }

        self.publish(next).await?;
        Ok(true)
    }

    /// Apply a fallible mutation that also produces a value.
    ///
    /// Nothing is published when the mutation returns an error or leaves the
    /// configuration equal to the current one.
    pub async fn modify<T, F>(&self, mutation: F) -> Result<T>
    where
        F: FnOnce(&mut PluginConfiguration) -> Result<T>,
    {
        let _guard = self.write_lock.lock().await;

        let current = self.current.load_full();
        let mut next = PluginConfiguration::clone(&current);
        let value = mutation(&mut next)?;

        if next == *current {
            debug!("Configuration unchanged, nothing published");
            return Ok(value);
        }

        self.publish(next).await?;
        Ok(value)
    }

    /// Persist then swap. Must be called with the write lock held.
    async fn publish(&self, next: PluginConfiguration) -> Result<()> {
        if let Some(persistence) = &self.persistence {
            let bytes = serde_json::to_vec_pretty(&next)?;
            if let Err(e) = persistence.save(&bytes).await {
                warn!(error = %e, "Failed to persist configuration, keeping previous version");
                return Err(LibraryError::Persistence(e.to_string()));
            }
        }

        self.current.store(Arc::new(next));
        Ok(())
    }
}

impl std::fmt::Debug for ConfigurationStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigurationStore")
            .field("persistent", &self.persistence.is_some())
            .finish()
    }
}
