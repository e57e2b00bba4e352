use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("registry request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("invalid registry URL: {0}")]
    Url(#[from] url::ParseError),

    #[error("registry returned HTTP {status}")]
    Status { status: u16 },

    #[error("malformed registry response: {0}")]
    Parse(String),

    #[error("registry returned no usable servers")]
    Empty,

    #[error("registry request timed out after {0:?}")]
    Timeout(Duration),

    #[error("catalog {}: {message}", path.display())]
    Catalog { path: PathBuf, message: String },

    #[error("registry entry '{id}' is not installable: {reason}")]
    NotInstallable { id: String, reason: String },

    #[error("registry entry '{0}' not found")]
    EntryNotFound(String),
}

impl RegistryError {
    /// Stable short code recorded in registry stats.
    #[must_use]
    pub fn code(&self) -> String {
        match self {
            Self::Http(_) | Self::Url(_) => "REMOTE_UNREACHABLE".to_owned(),
            Self::Status { status } => format!("HTTP_{status}"),
            Self::Parse(_) => "REMOTE_PARSE_ERROR".to_owned(),
            Self::Empty => "REMOTE_EMPTY".to_owned(),
            Self::Timeout(_) => "REMOTE_TIMEOUT".to_owned(),
            Self::Catalog { .. } => "CATALOG_UNAVAILABLE".to_owned(),
            Self::NotInstallable { .. } => "NOT_INSTALLABLE".to_owned(),
            Self::EntryNotFound(_) => "ENTRY_NOT_FOUND".to_owned(),
        }
    }
}
