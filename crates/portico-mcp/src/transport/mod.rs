//! Per-server-type transports.
//!
//! `open` establishes the transport (process spawned, file opened); `handshake`
//! performs the protocol exchange and returns the tool manifest. The connection
//! manager maps these two steps onto `connecting` and `handshaking`.

mod local;
mod remote;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub use local::{FilesystemTransport, SqliteTransport};
pub use remote::RmcpTransport;

use crate::error::McpError;
use crate::server::{ServerConfig, ServerKind};
use crate::tool::ToolDescriptor;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// An established connection to one server.
pub trait Transport: Send + Sync {
    /// Protocol handshake; yields the server's tool manifest.
    fn handshake(&self) -> BoxFuture<'_, Result<Vec<ToolDescriptor>, McpError>>;

    /// Re-run capability discovery on an already handshaken transport.
    fn list_tools(&self) -> BoxFuture<'_, Result<Vec<ToolDescriptor>, McpError>>;

    /// Lightweight liveness round-trip.
    fn ping(&self) -> BoxFuture<'_, Result<(), McpError>>;

    /// Release the underlying process, pool, or session. Idempotent.
    fn close(&self) -> BoxFuture<'_, ()>;
}

/// Opens a transport for a validated [`ServerConfig`].
pub trait TransportFactory: Send + Sync {
    fn open<'a>(
        &'a self,
        config: &'a ServerConfig,
    ) -> BoxFuture<'a, Result<Arc<dyn Transport>, McpError>>;
}

/// Dispatches on [`ServerKind`] to the built-in transports.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultTransportFactory;

impl TransportFactory for DefaultTransportFactory {
    fn open<'a>(
        &'a self,
        config: &'a ServerConfig,
    ) -> BoxFuture<'a, Result<Arc<dyn Transport>, McpError>> {
        Box::pin(async move {
            let id = config.id.as_str();
            let transport: Arc<dyn Transport> = match &config.kind {
                ServerKind::Filesystem(fs) => Arc::new(FilesystemTransport::open(id, fs).await?),
                ServerKind::Sqlite(db) => Arc::new(SqliteTransport::open(id, db).await?),
                ServerKind::Github(gh) => Arc::new(RmcpTransport::spawn(id, &gh.launch_spec())?),
                ServerKind::Postgres(pg) => {
                    Arc::new(RmcpTransport::spawn(id, &pg.launch_spec())?)
                }
                ServerKind::Custom(custom) => match (custom.launch_spec(), &custom.url) {
                    (Some(spec), _) => Arc::new(RmcpTransport::spawn(id, &spec)?),
                    (None, Some(url)) => Arc::new(RmcpTransport::http(id, url)?),
                    (None, None) => {
                        return Err(McpError::InvalidConfig {
                            server_id: id.to_owned(),
                            message: "missing required parameter: command or url".into(),
                        });
                    }
                },
            };
            Ok(transport)
        })
    }
}
