//! The host's JSON server list.

use std::collections::HashSet;
use std::path::Path;

use anyhow::Context;
use portico_mcp::ServerConfig;

/// Read the server list at `path`.
///
/// A missing file is an empty list. Entries that fail to parse are skipped with a
/// warning, as are repeated ids after the first.
///
/// # Errors
///
/// Returns an error if the file exists but is unreadable or not a JSON array.
pub async fn load_servers(path: &Path) -> anyhow::Result<Vec<ServerConfig>> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            tracing::debug!(path = %path.display(), "server list not found");
            return Ok(Vec::new());
        }
        Err(e) => {
            return Err(e).with_context(|| format!("failed to read {}", path.display()));
        }
    };

    let values: Vec<serde_json::Value> = serde_json::from_str(&raw)
        .with_context(|| format!("{} is not a JSON array", path.display()))?;

    let mut seen = HashSet::new();
    let mut servers = Vec::with_capacity(values.len());
    for (index, value) in values.into_iter().enumerate() {
        match serde_json::from_value::<ServerConfig>(value) {
            Ok(server) if seen.insert(server.id.clone()) => servers.push(server),
            Ok(server) => {
                tracing::warn!(server_id = %server.id, "duplicate server id, skipping");
            }
            Err(e) => {
                tracing::warn!(index, path = %path.display(), "skipping invalid server entry: {e}");
            }
        }
    }
    Ok(servers)
}

/// Write `servers` to `path` as pretty JSON, creating parent directories.
///
/// # Errors
///
/// Returns an error if serialization or any filesystem step fails.
pub async fn save_servers(path: &Path, servers: &[ServerConfig]) -> anyhow::Result<()> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(servers).context("failed to serialize server list")?;
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("failed to write {}", path.display()))
}

/// Insert `server`, replacing any entry with the same id. Returns `true` if replaced.
pub fn upsert(servers: &mut Vec<ServerConfig>, server: ServerConfig) -> bool {
    if let Some(existing) = servers.iter_mut().find(|s| s.id == server.id) {
        *existing = server;
        true
    } else {
        servers.push(server);
        false
    }
}
