use std::sync::Arc;

use rmcp::ServiceExt;
use rmcp::service::RunningService;
use rmcp::transport::TokioChildProcess;
use rmcp::transport::streamable_http_client::StreamableHttpClientTransport;
use tokio::process::Command;
use tokio::sync::Mutex;

use super::{BoxFuture, Transport};
use crate::error::McpError;
use crate::server::LaunchSpec;
use crate::tool::ToolDescriptor;

type ClientService = RunningService<rmcp::RoleClient, ()>;

/// Established but not yet initialized endpoint.
enum Pending {
    Child(TokioChildProcess),
    Http(String),
}

/// MCP client over a child process (stdio) or Streamable HTTP.
pub struct RmcpTransport {
    server_id: String,
    pending: Mutex<Option<Pending>>,
    service: Mutex<Option<Arc<ClientService>>>,
}

impl std::fmt::Debug for RmcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RmcpTransport")
            .field("server_id", &self.server_id)
            .finish_non_exhaustive()
    }
}

impl RmcpTransport {
    /// Spawn the server process. The MCP handshake happens in [`Transport::handshake`].
    ///
    /// # Errors
    ///
    /// Returns `McpError::Connection` if the process cannot be spawned. A missing
    /// executable is reported as "executable not found".
    pub fn spawn(server_id: &str, spec: &LaunchSpec) -> Result<Self, McpError> {
        let mut cmd = Command::new(&spec.command);
        cmd.args(&spec.args);
        for (k, v) in &spec.env {
            cmd.env(k, v);
        }
        if let Some(dir) = &spec.cwd {
            cmd.current_dir(dir);
        }

        let process = TokioChildProcess::new(cmd).map_err(|e| McpError::Connection {
            server_id: server_id.into(),
            message: if e.kind() == std::io::ErrorKind::NotFound {
                format!("executable not found: {}", spec.command)
            } else {
                e.to_string()
            },
        })?;

        tracing::debug!(server_id, command = %spec.command, "spawned MCP server process");
        Ok(Self::with_pending(server_id, Pending::Child(process)))
    }

    /// Prepare a Streamable HTTP session; the connection opens during the handshake.
    ///
    /// # Errors
    ///
    /// Returns `McpError::InvalidConfig` if the URL cannot be parsed.
    pub fn http(server_id: &str, url: &str) -> Result<Self, McpError> {
        let parsed = url::Url::parse(url).map_err(|e| McpError::InvalidConfig {
            server_id: server_id.into(),
            message: format!("invalid configuration: url {e}"),
        })?;
        if parsed.host_str().is_none() {
            return Err(McpError::InvalidConfig {
                server_id: server_id.into(),
                message: "invalid configuration: url is missing a host".into(),
            });
        }
        Ok(Self::with_pending(server_id, Pending::Http(url.to_owned())))
    }

    fn with_pending(server_id: &str, pending: Pending) -> Self {
        Self {
            server_id: server_id.to_owned(),
            pending: Mutex::new(Some(pending)),
            service: Mutex::new(None),
        }
    }

    async fn initialize(&self) -> Result<Arc<ClientService>, McpError> {
        let pending = self
            .pending
            .lock()
            .await
            .take()
            .ok_or_else(|| McpError::Handshake {
                server_id: self.server_id.clone(),
                message: "transport already initialized or closed".into(),
            })?;

        let service = match pending {
            Pending::Child(process) => {
                ().serve(process).await.map_err(|e| self.handshake_error(&e))?
            }
            Pending::Http(url) => {
                let transport = StreamableHttpClientTransport::from_uri(url);
                ().serve(transport).await.map_err(|e| self.handshake_error(&e))?
            }
        };

        tracing::debug!(server_id = %self.server_id, "MCP handshake acknowledged");

        let service = Arc::new(service);
        *self.service.lock().await = Some(Arc::clone(&service));
        Ok(service)
    }

    fn handshake_error(&self, e: &impl std::fmt::Display) -> McpError {
        McpError::Handshake {
            server_id: self.server_id.clone(),
            message: e.to_string(),
        }
    }

    async fn live_service(&self) -> Result<Arc<ClientService>, McpError> {
        self.service
            .lock()
            .await
            .clone()
            .ok_or_else(|| McpError::Connection {
                server_id: self.server_id.clone(),
                message: "connection closed".into(),
            })
    }

    async fn fetch_tools(&self, service: &ClientService) -> Result<Vec<ToolDescriptor>, McpError> {
        let tools = service
            .list_all_tools()
            .await
            .map_err(|e| McpError::ToolList {
                server_id: self.server_id.clone(),
                message: e.to_string(),
            })?;

        Ok(tools
            .into_iter()
            .map(|t| ToolDescriptor {
                name: t.name.to_string(),
                description: t.description.map_or_else(String::new, |d| d.to_string()),
                input_schema: serde_json::to_value(&*t.input_schema).unwrap_or_default(),
            })
            .collect())
    }
}

impl Transport for RmcpTransport {
    fn handshake(&self) -> BoxFuture<'_, Result<Vec<ToolDescriptor>, McpError>> {
        Box::pin(async move {
            let service = self.initialize().await?;
            self.fetch_tools(&service).await
        })
    }

    fn list_tools(&self) -> BoxFuture<'_, Result<Vec<ToolDescriptor>, McpError>> {
        Box::pin(async move {
            let service = self.live_service().await?;
            self.fetch_tools(&service).await
        })
    }

    fn ping(&self) -> BoxFuture<'_, Result<(), McpError>> {
        Box::pin(async move {
            let service = self.live_service().await?;
            self.fetch_tools(&service).await.map(|_| ())
        })
    }

    fn close(&self) -> BoxFuture<'_, ()> {
        Box::pin(async move {
            self.pending.lock().await.take();
            let Some(service) = self.service.lock().await.take() else {
                return;
            };
            match Arc::try_unwrap(service) {
                Ok(service) => {
                    if let Err(e) = service.cancel().await {
                        tracing::debug!(server_id = %self.server_id, "MCP shutdown error: {e}");
                    }
                }
                Err(_arc) => {
                    tracing::debug!(
                        server_id = %self.server_id,
                        "service still referenced, closing when the last call completes"
                    );
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn http_rejects_invalid_url() {
        let err = RmcpTransport::http("remote", "not-a-url").unwrap_err();
        assert!(matches!(err, McpError::InvalidConfig { .. }));
    }

    #[test]
    fn http_accepts_valid_url() {
        assert!(RmcpTransport::http("remote", "https://mcp.example.com/mcp").is_ok());
    }

    #[tokio::test]
    async fn spawn_missing_executable_is_configuration_error() {
        let spec = LaunchSpec {
            command: "portico-definitely-not-installed".into(),
            args: Vec::new(),
            env: HashMap::new(),
            cwd: None,
        };
        let err = RmcpTransport::spawn("ghost", &spec).unwrap_err();
        assert!(err.to_string().contains("executable not found"));
        assert_eq!(
            err.classification().error_type,
            crate::classify::ErrorType::Configuration
        );
    }

    #[tokio::test]
    async fn list_tools_before_handshake_fails() {
        let transport = RmcpTransport::http("remote", "https://mcp.example.com/mcp").unwrap();
        let err = transport.list_tools().await.unwrap_err();
        assert!(matches!(err, McpError::Connection { .. }));
        transport.close().await;
    }
}
