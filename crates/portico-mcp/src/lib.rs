//! MCP server lifecycle: connection state machine, failure classification, and tool fan-out.

pub mod broker;
pub mod classify;
pub mod error;
pub mod history;
pub mod manager;
pub mod server;
pub mod state;
pub mod tool;
pub mod transport;

pub use broker::{ChannelSubscriber, SubscriptionId, ToolBroker, ToolSubscriber};
pub use classify::{
    Classification, ErrorRecord, ErrorType, Severity, classify, classify_message, create_error,
};
pub use error::McpError;
pub use history::ErrorHistory;
pub use manager::{ConnectionManager, ManagerConfig, SyncStats, TestReport};
pub use server::{
    CustomConfig, FilesystemConfig, GithubConfig, LaunchSpec, PostgresConfig, ServerConfig,
    ServerKind, ServerType, SqliteConfig,
};
pub use state::{ConnectionState, StateEvent};
pub use tool::{ToolDescriptor, ToolSnapshot};
pub use transport::{DefaultTransportFactory, Transport, TransportFactory};
