//! Local static catalog shipped alongside the host.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::entry::RegistryEntry;
use crate::error::RegistryError;

#[derive(Deserialize)]
struct CatalogFile {
    servers: Vec<serde_json::Value>,
}

#[derive(Debug, Clone)]
pub struct LocalCatalog {
    path: PathBuf,
}

impl LocalCatalog {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every well-formed entry from the catalog file.
    ///
    /// Malformed entries are skipped with a warning; unknown keys are ignored.
    ///
    /// # Errors
    ///
    /// Returns `RegistryError::Catalog` if the file cannot be read or is not a
    /// `{ "servers": [...] }` document.
    pub async fn load(&self) -> Result<Vec<RegistryEntry>, RegistryError> {
        let catalog_error = |message: String| RegistryError::Catalog {
            path: self.path.clone(),
            message,
        };

        let raw = tokio::fs::read_to_string(&self.path)
            .await
            .map_err(|e| catalog_error(e.to_string()))?;
        let file: CatalogFile =
            serde_json::from_str(&raw).map_err(|e| catalog_error(e.to_string()))?;

        let entries: Vec<RegistryEntry> = file
            .servers
            .into_iter()
            .enumerate()
            .filter_map(|(index, value)| match serde_json::from_value(value) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    tracing::warn!(
                        path = %self.path.display(),
                        index,
                        "skipping malformed catalog entry: {e}"
                    );
                    None
                }
            })
            .collect();

        tracing::debug!(
            path = %self.path.display(),
            entries = entries.len(),
            "loaded local catalog"
        );
        Ok(entries)
    }
}
