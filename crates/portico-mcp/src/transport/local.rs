//! In-process transports for server types that need no child process.

use std::path::{Path, PathBuf};

use serde_json::json;
use sqlx::SqlitePool;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};

use super::{BoxFuture, Transport};
use crate::error::McpError;
use crate::server::{FilesystemConfig, SqliteConfig};
use crate::tool::ToolDescriptor;

async fn require_path(server_id: &str, path: &Path) -> Result<std::fs::Metadata, McpError> {
    tokio::fs::metadata(path)
        .await
        .map_err(|e| McpError::Connection {
            server_id: server_id.to_owned(),
            message: if e.kind() == std::io::ErrorKind::NotFound {
                format!("path does not exist: {}", path.display())
            } else {
                format!("{}: {e}", path.display())
            },
        })
}

fn path_schema(extra: serde_json::Value) -> serde_json::Value {
    let mut properties = json!({ "path": { "type": "string" } });
    if let (Some(base), Some(extra)) = (properties.as_object_mut(), extra.as_object()) {
        base.extend(extra.clone());
    }
    json!({ "type": "object", "properties": properties, "required": ["path"] })
}

/// Directory-rooted server. Tool discovery is local introspection of the root.
#[derive(Debug)]
pub struct FilesystemTransport {
    server_id: String,
    root: PathBuf,
    read_only: bool,
}

impl FilesystemTransport {
    /// # Errors
    ///
    /// Returns `McpError::Connection` if the root path is missing or not a directory.
    pub async fn open(server_id: &str, config: &FilesystemConfig) -> Result<Self, McpError> {
        let meta = require_path(server_id, &config.root_path).await?;
        if !meta.is_dir() {
            return Err(McpError::Connection {
                server_id: server_id.to_owned(),
                message: format!("not a directory: {}", config.root_path.display()),
            });
        }
        Ok(Self {
            server_id: server_id.to_owned(),
            root: config.root_path.clone(),
            read_only: config.read_only,
        })
    }

    fn manifest(&self) -> Vec<ToolDescriptor> {
        let mut tools = vec![
            ToolDescriptor::new("read_file", "Read the contents of a file", path_schema(json!({}))),
            ToolDescriptor::new(
                "list_directory",
                "List the entries of a directory",
                path_schema(json!({})),
            ),
            ToolDescriptor::new(
                "search_files",
                "Recursively search for files matching a pattern",
                path_schema(json!({ "pattern": { "type": "string" } })),
            ),
            ToolDescriptor::new(
                "get_file_info",
                "Retrieve size, timestamps, and type of a path",
                path_schema(json!({})),
            ),
        ];
        if !self.read_only {
            tools.push(ToolDescriptor::new(
                "write_file",
                "Create or overwrite a file",
                path_schema(json!({ "content": { "type": "string" } })),
            ));
            tools.push(ToolDescriptor::new(
                "create_directory",
                "Create a directory and any missing parents",
                path_schema(json!({})),
            ));
        }
        tools
    }

    async fn introspect(&self) -> Result<(), McpError> {
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| McpError::Handshake {
                server_id: self.server_id.clone(),
                message: format!("{}: {e}", self.root.display()),
            })?;
        let first = entries.next_entry().await.map_err(|e| McpError::Handshake {
            server_id: self.server_id.clone(),
            message: e.to_string(),
        })?;
        tracing::debug!(
            server_id = %self.server_id,
            root = %self.root.display(),
            empty = first.is_none(),
            "filesystem root readable"
        );
        Ok(())
    }
}

impl Transport for FilesystemTransport {
    fn handshake(&self) -> BoxFuture<'_, Result<Vec<ToolDescriptor>, McpError>> {
        Box::pin(async move {
            self.introspect().await?;
            Ok(self.manifest())
        })
    }

    fn list_tools(&self) -> BoxFuture<'_, Result<Vec<ToolDescriptor>, McpError>> {
        self.handshake()
    }

    fn ping(&self) -> BoxFuture<'_, Result<(), McpError>> {
        Box::pin(async move { require_path(&self.server_id, &self.root).await.map(|_| ()) })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async {})
    }
}

/// Read-only access to a local `SQLite` database file.
#[derive(Debug)]
pub struct SqliteTransport {
    server_id: String,
    pool: SqlitePool,
}

impl SqliteTransport {
    /// # Errors
    ///
    /// Returns `McpError::Connection` if the file is missing or cannot be opened.
    pub async fn open(server_id: &str, config: &SqliteConfig) -> Result<Self, McpError> {
        require_path(server_id, &config.database_path).await?;

        let opts = SqliteConnectOptions::new()
            .filename(&config.database_path)
            .read_only(true)
            .create_if_missing(false);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await
            .map_err(|e| McpError::Connection {
                server_id: server_id.to_owned(),
                message: e.to_string(),
            })?;

        Ok(Self {
            server_id: server_id.to_owned(),
            pool,
        })
    }

    async fn schema_version(&self) -> Result<i64, McpError> {
        let (version,): (i64,) = sqlx::query_as("PRAGMA schema_version")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| McpError::Handshake {
                server_id: self.server_id.clone(),
                message: e.to_string(),
            })?;
        Ok(version)
    }

    fn manifest() -> Vec<ToolDescriptor> {
        vec![
            ToolDescriptor::new(
                "read_query",
                "Execute a SELECT query",
                json!({
                    "type": "object",
                    "properties": { "query": { "type": "string" } },
                    "required": ["query"]
                }),
            ),
            ToolDescriptor::new(
                "list_tables",
                "List all tables in the database",
                json!({ "type": "object", "properties": {} }),
            ),
            ToolDescriptor::new(
                "describe_table",
                "Show the schema of a table",
                json!({
                    "type": "object",
                    "properties": { "table_name": { "type": "string" } },
                    "required": ["table_name"]
                }),
            ),
        ]
    }
}

impl Transport for SqliteTransport {
    fn handshake(&self) -> BoxFuture<'_, Result<Vec<ToolDescriptor>, McpError>> {
        Box::pin(async move {
            let version = self.schema_version().await?;
            tracing::debug!(server_id = %self.server_id, version, "sqlite schema readable");
            Ok(Self::manifest())
        })
    }

    fn list_tools(&self) -> BoxFuture<'_, Result<Vec<ToolDescriptor>, McpError>> {
        self.handshake()
    }

    fn ping(&self) -> BoxFuture<'_, Result<(), McpError>> {
        Box::pin(async move { self.schema_version().await.map(|_| ()) })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move { self.pool.close().await })
    }
}
