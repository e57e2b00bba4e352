use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::McpError;

const GITHUB_PACKAGE: &str = "@modelcontextprotocol/server-github";
const POSTGRES_PACKAGE: &str = "@modelcontextprotocol/server-postgres";
const GITHUB_TOKEN_ENV: &str = "GITHUB_PERSONAL_ACCESS_TOKEN";

/// Discriminant of [`ServerKind`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerType {
    Filesystem,
    Github,
    Postgres,
    Sqlite,
    #[default]
    Custom,
}

impl ServerType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Filesystem => "filesystem",
            Self::Github => "github",
            Self::Postgres => "postgres",
            Self::Sqlite => "sqlite",
            Self::Custom => "custom",
        }
    }
}

impl fmt::Display for ServerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One configured server instance, as handed over by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConfig {
    pub id: String,
    pub name: String,
    /// Type tag plus its payload; serialized as `config: { "type": ..., ... }`.
    #[serde(rename = "config")]
    pub kind: ServerKind,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry_id: Option<String>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl ServerConfig {
    #[must_use]
    pub fn new(id: impl Into<String>, name: impl Into<String>, kind: ServerKind) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            name: name.into(),
            kind,
            enabled: false,
            registry_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[must_use]
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    #[must_use]
    pub fn server_type(&self) -> ServerType {
        self.kind.server_type()
    }

    /// Reject configs whose payload is structurally present but unusable.
    ///
    /// # Errors
    ///
    /// Returns `McpError::InvalidConfig` describing the first problem found.
    pub fn validate(&self) -> Result<(), McpError> {
        let invalid = |message: &str| McpError::InvalidConfig {
            server_id: self.id.clone(),
            message: message.to_owned(),
        };

        if self.id.trim().is_empty() {
            return Err(invalid("missing required parameter: id"));
        }
        if self.name.trim().is_empty() {
            return Err(invalid("missing required parameter: name"));
        }

        match &self.kind {
            ServerKind::Filesystem(fs) => {
                if fs.root_path.as_os_str().is_empty() {
                    return Err(invalid("missing required parameter: rootPath"));
                }
            }
            ServerKind::Github(gh) => {
                if gh.token.trim().is_empty() {
                    return Err(invalid("missing required parameter: token"));
                }
            }
            ServerKind::Postgres(pg) => {
                if pg.connection_string.trim().is_empty() {
                    return Err(invalid("missing required parameter: connectionString"));
                }
            }
            ServerKind::Sqlite(db) => {
                if db.database_path.as_os_str().is_empty() {
                    return Err(invalid("missing required parameter: databasePath"));
                }
            }
            ServerKind::Custom(custom) => match (&custom.command, &custom.url) {
                (Some(_), Some(_)) => {
                    return Err(invalid("invalid configuration: both command and url are set"));
                }
                (None, None) => {
                    return Err(invalid("missing required parameter: command or url"));
                }
                (Some(command), None) if command.trim().is_empty() => {
                    return Err(invalid("missing required parameter: command"));
                }
                (None, Some(raw)) => {
                    let url = url::Url::parse(raw)
                        .map_err(|e| invalid(&format!("invalid configuration: url {e}")))?;
                    if !matches!(url.scheme(), "http" | "https") {
                        return Err(invalid("invalid configuration: url must be http(s)"));
                    }
                }
                (Some(_), None) => {}
            },
        }
        Ok(())
    }
}

/// Type-specific payload, tagged by `type`.
///
/// A JSON payload whose fields do not match its tag fails to deserialize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ServerKind {
    Filesystem(FilesystemConfig),
    Github(GithubConfig),
    Postgres(PostgresConfig),
    Sqlite(SqliteConfig),
    Custom(CustomConfig),
}

impl ServerKind {
    #[must_use]
    pub fn server_type(&self) -> ServerType {
        match self {
            Self::Filesystem(_) => ServerType::Filesystem,
            Self::Github(_) => ServerType::Github,
            Self::Postgres(_) => ServerType::Postgres,
            Self::Sqlite(_) => ServerType::Sqlite,
            Self::Custom(_) => ServerType::Custom,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct FilesystemConfig {
    pub root_path: PathBuf,
    #[serde(default)]
    pub read_only: bool,
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct GithubConfig {
    pub token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

impl fmt::Debug for GithubConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GithubConfig")
            .field("token", &"[REDACTED]")
            .field("command", &self.command)
            .field("args", &self.args)
            .finish()
    }
}

#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct PostgresConfig {
    pub connection_string: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

impl fmt::Debug for PostgresConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PostgresConfig")
            .field("connection_string", &"[REDACTED]")
            .field("command", &self.command)
            .field("args", &self.args)
            .finish()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct SqliteConfig {
    pub database_path: PathBuf,
}

#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct CustomConfig {
    /// Stdio transport: command to spawn.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub env: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,
    /// HTTP transport: remote MCP server URL.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl fmt::Debug for CustomConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redacted: HashMap<&str, &str> = self
            .env
            .keys()
            .map(|k| (k.as_str(), "[REDACTED]"))
            .collect();
        f.debug_struct("CustomConfig")
            .field("command", &self.command)
            .field("args", &self.args)
            .field("env", &redacted)
            .field("cwd", &self.cwd)
            .field("url", &self.url)
            .finish()
    }
}

/// Child-process invocation for stdio-based servers.
#[derive(Clone, PartialEq, Eq)]
pub struct LaunchSpec {
    pub command: String,
    pub args: Vec<String>,
    pub env: HashMap<String, String>,
    pub cwd: Option<PathBuf>,
}

impl fmt::Debug for LaunchSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LaunchSpec")
            .field("command", &self.command)
            .field("args", &self.args.len())
            .field("env", &self.env.keys().collect::<Vec<_>>())
            .field("cwd", &self.cwd)
            .finish()
    }
}

impl GithubConfig {
    #[must_use]
    pub fn launch_spec(&self) -> LaunchSpec {
        let (command, args) = match &self.command {
            Some(command) => (command.clone(), self.args.clone()),
            None => ("npx".to_owned(), vec!["-y".to_owned(), GITHUB_PACKAGE.to_owned()]),
        };
        LaunchSpec {
            command,
            args,
            env: HashMap::from([(GITHUB_TOKEN_ENV.to_owned(), self.token.clone())]),
            cwd: None,
        }
    }
}

impl PostgresConfig {
    #[must_use]
    pub fn launch_spec(&self) -> LaunchSpec {
        let (command, mut args) = match &self.command {
            Some(command) => (command.clone(), self.args.clone()),
            None => ("npx".to_owned(), vec!["-y".to_owned(), POSTGRES_PACKAGE.to_owned()]),
        };
        args.push(self.connection_string.clone());
        LaunchSpec {
            command,
            args,
            env: HashMap::new(),
            cwd: None,
        }
    }
}

impl CustomConfig {
    /// `None` for URL-based servers.
    #[must_use]
    pub fn launch_spec(&self) -> Option<LaunchSpec> {
        self.command.as_ref().map(|command| LaunchSpec {
            command: command.clone(),
            args: self.args.clone(),
            env: self.env.clone(),
            cwd: self.cwd.clone(),
        })
    }
}
