//! Discovery of installable MCP server templates.
//!
//! Remote pages are fetched with bounded retries and cached; when the registry is
//! unreachable the service degrades to the cached page or a local static catalog.

pub mod catalog;
pub mod convert;
pub mod entry;
pub mod error;
pub mod remote;
pub mod search;
pub mod service;

pub use catalog::LocalCatalog;
pub use convert::{convert_to_server_config, registry_server_id};
pub use entry::{
    Difficulty, InstallCommand, RegistryEntry, Repository, ServerTemplate, is_server_installable,
    is_valid_npm_package_name, normalize_github_url,
};
pub use error::RegistryError;
pub use remote::{CatalogFetcher, DEFAULT_REGISTRY_URL, HttpCatalogFetcher, RemotePage};
pub use search::{ResultSource, SearchMode, SearchRequest, SearchResult};
pub use service::{RegistryConfig, RegistryService, RegistryStats};
