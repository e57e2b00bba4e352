//! Service construction from a loaded [`Config`].

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use portico_mcp::{ConnectionManager, ManagerConfig, SyncStats};
use portico_registry::RegistryService;

use crate::config::{Config, ConnectionConfig, RegistryConfig};
use crate::servers::load_servers;

impl RegistryConfig {
    #[must_use]
    pub fn to_service_config(&self) -> portico_registry::RegistryConfig {
        portico_registry::RegistryConfig {
            base_url: self.base_url.clone(),
            remote_enabled: self.remote_enabled,
            catalog_path: self.catalog_path.clone(),
            cache_ttl: Duration::from_secs(self.cache_ttl_secs),
            max_attempts: self.max_attempts,
            base_delay: Duration::from_millis(self.base_delay_ms),
            max_delay: Duration::from_millis(self.max_delay_ms),
            attempt_timeout: Duration::from_secs(self.attempt_timeout_secs),
        }
    }
}

impl ConnectionConfig {
    #[must_use]
    pub fn to_manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            connect_timeout: Duration::from_secs(self.connect_timeout_secs),
            handshake_timeout: Duration::from_secs(self.handshake_timeout_secs),
            retry_base_delay: Duration::from_millis(self.retry_base_delay_ms),
            retry_max_delay: Duration::from_millis(self.retry_max_delay_ms),
            max_auto_retries: self.max_auto_retries,
            error_history_capacity: self.error_history_capacity,
        }
    }
}

/// The registry service and connection manager, built from one config.
pub struct Services {
    pub config: Config,
    pub registry: Arc<RegistryService>,
    pub manager: ConnectionManager,
}

impl Services {
    /// # Errors
    ///
    /// Returns an error if the config is invalid or the registry HTTP client cannot be
    /// built.
    pub fn build(config: Config) -> anyhow::Result<Self> {
        config.validate()?;
        let registry = RegistryService::new(config.registry.to_service_config())
            .context("failed to create registry service")?;
        let manager = ConnectionManager::new(config.connection.to_manager_config());
        tracing::debug!(
            registry = %config.registry.base_url,
            remote = config.registry.remote_enabled,
            "services initialized"
        );
        Ok(Self {
            config,
            registry: Arc::new(registry),
            manager,
        })
    }

    /// Load config from `path` (see [`Config::load`]) and build services.
    ///
    /// # Errors
    ///
    /// Propagates load, validation, and construction errors.
    pub fn from_path(path: &Path) -> anyhow::Result<Self> {
        Self::build(Config::load(path)?)
    }

    /// Register the configured server list with the manager. Nothing is connected.
    ///
    /// # Errors
    ///
    /// Returns an error if the server list file exists but cannot be parsed.
    pub async fn load_servers(&self) -> anyhow::Result<SyncStats> {
        let servers = load_servers(&self.config.servers_path).await?;
        let stats = self.manager.sync_servers(servers).await;
        if !stats.rejected.is_empty() {
            tracing::warn!(rejected = ?stats.rejected, "some servers were rejected");
        }
        Ok(stats)
    }
}
