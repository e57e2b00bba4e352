use std::path::PathBuf;

use super::Config;

/// Values that switch the remote registry off. Anything else, including an empty
/// value, leaves it on.
const REMOTE_DISABLED_VALUES: [&str; 6] = ["false", "0", "off", "disable", "disabled", "no"];

pub(crate) fn remote_flag_enabled(value: &str) -> bool {
    let value = value.trim().to_ascii_lowercase();
    !REMOTE_DISABLED_VALUES.contains(&value.as_str())
}

impl Config {
    pub(crate) fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("PORTICO_REGISTRY_URL")
            && !v.trim().is_empty()
        {
            self.registry.base_url = v.trim().to_owned();
        }
        if let Ok(v) = std::env::var("PORTICO_REGISTRY_REMOTE") {
            self.registry.remote_enabled = remote_flag_enabled(&v);
        }
        if let Ok(v) = std::env::var("PORTICO_CATALOG_PATH") {
            self.registry.catalog_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("PORTICO_SERVERS_PATH") {
            self.servers_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("PORTICO_CONNECT_TIMEOUT") {
            if let Ok(secs) = v.parse::<u64>() {
                self.connection.connect_timeout_secs = secs;
            } else {
                tracing::warn!("ignoring invalid PORTICO_CONNECT_TIMEOUT value: {v}");
            }
        }
        if let Ok(v) = std::env::var("PORTICO_HANDSHAKE_TIMEOUT") {
            if let Ok(secs) = v.parse::<u64>() {
                self.connection.handshake_timeout_secs = secs;
            } else {
                tracing::warn!("ignoring invalid PORTICO_HANDSHAKE_TIMEOUT value: {v}");
            }
        }
        if let Ok(v) = std::env::var("PORTICO_MAX_AUTO_RETRIES")
            && let Ok(n) = v.parse::<u32>()
        {
            self.connection.max_auto_retries = n;
        }
    }
}
