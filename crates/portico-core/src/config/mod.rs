mod env;
mod types;


pub use types::*;

use std::path::{Path, PathBuf};

use anyhow::{Context, bail};

impl Config {
    /// Load configuration from a TOML file with env var overrides.
    ///
    /// Falls back to defaults when the file does not exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("failed to read config file {}", path.display()))?;
            toml::from_str::<Self>(&content).context("failed to parse config file")?
        } else {
            tracing::debug!(path = %path.display(), "config file not found, using defaults");
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// # Errors
    ///
    /// Returns an error naming the first zero timeout, zero attempt count, or empty
    /// registry URL.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.registry.base_url.trim().is_empty() {
            bail!("registry.base_url must not be empty");
        }
        if self.registry.max_attempts == 0 {
            bail!("registry.max_attempts must be at least 1");
        }
        if self.registry.attempt_timeout_secs == 0 {
            bail!("registry.attempt_timeout_secs must be greater than 0");
        }
        if self.connection.connect_timeout_secs == 0 {
            bail!("connection.connect_timeout_secs must be greater than 0");
        }
        if self.connection.handshake_timeout_secs == 0 {
            bail!("connection.handshake_timeout_secs must be greater than 0");
        }
        if self.connection.error_history_capacity == 0 {
            bail!("connection.error_history_capacity must be at least 1");
        }
        Ok(())
    }
}

/// Priority: explicit path > `PORTICO_CONFIG` env > `config/default.toml`.
#[must_use]
pub fn resolve_config_path(explicit: Option<&Path>) -> PathBuf {
    if let Some(path) = explicit {
        return path.to_path_buf();
    }
    if let Ok(path) = std::env::var("PORTICO_CONFIG") {
        return PathBuf::from(path);
    }
    PathBuf::from("config/default.toml")
}
