//! Remote registry client and normalization of its loosely-typed records.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use chrono::{DateTime, Utc};
use portico_mcp::ServerType;
use serde::Deserialize;
use serde_json::{Value, json};

use crate::entry::{
    InstallCommand, PLACEHOLDER_COMMAND, RegistryEntry, Repository, ServerTemplate, github_repo,
    is_denylisted, is_valid_npm_package_name, normalize_github_url,
};
use crate::error::RegistryError;
use crate::search::SearchRequest;

pub const DEFAULT_REGISTRY_URL: &str = "https://api.pulsemcp.com/v0beta";
const MAX_RESPONSE_BYTES: usize = 4 * 1024 * 1024;
const SOURCE_TAG: &str = "pulsemcp";

/// One page of normalized remote results.
#[derive(Debug, Clone, PartialEq)]
pub struct RemotePage {
    pub entries: Vec<RegistryEntry>,
    pub total: usize,
    pub has_more: bool,
}

pub type FetchFuture<'a> =
    Pin<Box<dyn Future<Output = Result<RemotePage, RegistryError>> + Send + 'a>>;

/// Source of remote registry pages.
pub trait CatalogFetcher: Send + Sync {
    /// Fetch the page described by `request`.
    ///
    /// # Errors
    ///
    /// Any transport, status, or body problem; an empty page is `RegistryError::Empty`.
    fn fetch<'a>(&'a self, request: &'a SearchRequest) -> FetchFuture<'a>;
}

pub struct HttpCatalogFetcher {
    client: reqwest::Client,
    base_url: String,
}

impl HttpCatalogFetcher {
    /// # Errors
    ///
    /// Returns `RegistryError::Http` if the HTTP client cannot be constructed.
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, RegistryError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("portico/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.into(),
        })
    }

    fn servers_url(&self, request: &SearchRequest) -> Result<url::Url, RegistryError> {
        let mut url = url::Url::parse(&format!("{}/servers", self.base_url.trim_end_matches('/')))?;
        {
            let mut pairs = url.query_pairs_mut();
            if let Some(query) = &request.query {
                pairs.append_pair("query", query);
            }
            if !request.tags.is_empty() {
                pairs.append_pair("tags", &request.tags.join(","));
            }
            pairs.append_pair("page", &request.page.to_string());
            pairs.append_pair("limit", &request.limit.to_string());
        }
        Ok(url)
    }
}

impl CatalogFetcher for HttpCatalogFetcher {
    fn fetch<'a>(&'a self, request: &'a SearchRequest) -> FetchFuture<'a> {
        Box::pin(async move {
            let url = self.servers_url(request)?;
            tracing::debug!(%url, "fetching remote registry page");

            let resp = self
                .client
                .get(url)
                .header("Accept", "application/json")
                .send()
                .await?;

            if !resp.status().is_success() {
                return Err(RegistryError::Status {
                    status: resp.status().as_u16(),
                });
            }

            let bytes = resp.bytes().await?;
            if bytes.len() > MAX_RESPONSE_BYTES {
                return Err(RegistryError::Parse(format!(
                    "response body too large ({} bytes)",
                    bytes.len()
                )));
            }
            let payload: Value =
                serde_json::from_slice(&bytes).map_err(|e| RegistryError::Parse(e.to_string()))?;
            normalize_payload(&payload, Utc::now())
        })
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawRepository {
    Url(String),
    Object {
        #[serde(default)]
        url: Option<String>,
    },
}

#[derive(Deserialize, Default)]
struct RawLaunch {
    #[serde(default)]
    command: Option<String>,
    #[serde(default)]
    args: Vec<String>,
    #[serde(default)]
    env: HashMap<String, Value>,
}

#[derive(Deserialize, Default)]
#[serde(default)]
struct RawServer {
    id: Option<String>,
    name: Option<String>,
    package_name: Option<String>,
    package_registry: Option<String>,
    short_description: Option<String>,
    description: Option<String>,
    source_code_url: Option<String>,
    repository: Option<RawRepository>,
    tags: Option<Vec<String>>,
    keywords: Option<Vec<String>>,
    category: Option<String>,
    github_stars: Option<u64>,
    package_download_count: Option<u64>,
    downloads: Option<u64>,
    install_count: Option<u64>,
    author: Option<String>,
    version: Option<String>,
    license: Option<String>,
    updated_at: Option<String>,
    config: Option<RawLaunch>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_owned())
        .filter(|v| !v.is_empty())
}

/// String, number, and boolean values become strings; anything else is dropped.
fn env_map(raw: HashMap<String, Value>) -> HashMap<String, String> {
    raw.into_iter()
        .filter_map(|(key, value)| {
            let value = match value {
                Value::String(s) => s,
                Value::Number(n) => n.to_string(),
                Value::Bool(b) => b.to_string(),
                _ => return None,
            };
            Some((key, value))
        })
        .collect()
}

fn synthesize_install(
    name: &str,
    package: Option<&str>,
    registry: Option<&str>,
    repository: Option<&str>,
) -> InstallCommand {
    if let Some(package) = package {
        return match registry {
            Some(r) if r.eq_ignore_ascii_case("pypi") => InstallCommand::new("uvx", [package]),
            _ => InstallCommand::new("npx", ["-y", package]),
        };
    }
    if let Some((owner, repo)) = repository.and_then(github_repo) {
        return InstallCommand::new("npx", ["-y".to_owned(), format!("github:{owner}/{repo}")]);
    }
    InstallCommand::new(
        PLACEHOLDER_COMMAND,
        [format!("Server {name} is missing install information")],
    )
}

/// Map one remote record into an entry; `None` if it has no usable identity.
fn normalize_server(raw: Value, now: DateTime<Utc>) -> Option<RegistryEntry> {
    let raw: RawServer = match serde_json::from_value(raw) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::debug!("skipping malformed registry record: {e}");
            return None;
        }
    };

    let id = non_blank(raw.id)
        .or_else(|| non_blank(raw.name.clone()))
        .or_else(|| non_blank(raw.package_name.clone()))?;
    let name = non_blank(raw.name).unwrap_or_else(|| id.clone());
    let package_registry = non_blank(raw.package_registry).map(|r| r.to_lowercase());

    let package_name = non_blank(raw.package_name).filter(|package| {
        if is_denylisted(package) {
            return false;
        }
        package_registry.as_deref() != Some("npm") || is_valid_npm_package_name(package)
    });

    let repository_url = non_blank(raw.source_code_url)
        .or_else(|| match raw.repository {
            Some(RawRepository::Url(url)) => non_blank(Some(url)),
            Some(RawRepository::Object { url }) => non_blank(url),
            None => None,
        })
        .map(|url| normalize_github_url(&url).unwrap_or(url));

    let install = match raw.config {
        Some(launch) if non_blank(launch.command.clone()).is_some() => InstallCommand {
            command: launch.command.unwrap_or_default().trim().to_owned(),
            args: launch.args,
            env: env_map(launch.env),
        },
        _ => synthesize_install(
            &name,
            package_name.as_deref(),
            package_registry.as_deref(),
            repository_url.as_deref(),
        ),
    };

    let template = ServerTemplate {
        server_type: ServerType::Custom,
        config: json!({
            "command": install.command,
            "args": install.args,
            "env": install.env,
        }),
    };

    let downloads = raw
        .package_download_count
        .or(raw.downloads)
        .or(raw.install_count);
    let popularity = raw.github_stars.into_iter().chain(downloads).max().unwrap_or(0);

    let updated_at = raw
        .updated_at
        .as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map_or(now, |t| t.with_timezone(&Utc));

    Some(RegistryEntry {
        id,
        name,
        description: non_blank(raw.short_description)
            .or_else(|| non_blank(raw.description))
            .unwrap_or_default(),
        category: non_blank(raw.category),
        popularity,
        difficulty: None,
        tags: raw.tags.or(raw.keywords).unwrap_or_default(),
        template: Some(template),
        install_command: Some(install),
        package_name,
        package_registry,
        repository: repository_url.map(|url| Repository {
            kind: "git".to_owned(),
            url,
        }),
        author: non_blank(raw.author),
        version: non_blank(raw.version),
        license: non_blank(raw.license),
        updated_at: Some(updated_at),
        source: Some(SOURCE_TAG.to_owned()),
    })
}

#[derive(Deserialize)]
struct RawPage {
    #[serde(default)]
    servers: Option<Vec<Value>>,
    #[serde(default)]
    total_count: Option<usize>,
    #[serde(default)]
    next: Option<Value>,
}

/// Normalize a `{servers, total_count, next}` payload.
///
/// # Errors
///
/// `RegistryError::Parse` if `servers` is missing, `RegistryError::Empty` if no record
/// survives normalization.
pub fn normalize_payload(payload: &Value, now: DateTime<Utc>) -> Result<RemotePage, RegistryError> {
    let page = RawPage::deserialize(payload).map_err(|e| RegistryError::Parse(e.to_string()))?;
    let servers = page
        .servers
        .ok_or_else(|| RegistryError::Parse("missing `servers` array".to_owned()))?;

    let received = servers.len();
    let entries: Vec<RegistryEntry> = servers
        .into_iter()
        .filter_map(|raw| normalize_server(raw, now))
        .collect();
    if entries.is_empty() {
        return Err(RegistryError::Empty);
    }
    if entries.len() < received {
        tracing::debug!(
            received,
            kept = entries.len(),
            "dropped unusable registry records"
        );
    }

    Ok(RemotePage {
        total: page.total_count.unwrap_or(entries.len()),
        has_more: page.next.is_some_and(|next| !next.is_null()),
        entries,
    })
}
