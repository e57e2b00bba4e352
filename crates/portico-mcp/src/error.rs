use crate::classify::{Classification, ErrorType, classify_message};
use crate::state::ConnectionState;

#[derive(Debug, thiserror::Error)]
pub enum McpError {
    #[error("connection failed for server '{server_id}': {message}")]
    Connection { server_id: String, message: String },

    #[error("handshake failed for server '{server_id}': {message}")]
    Handshake { server_id: String, message: String },

    #[error("tool discovery failed for server '{server_id}': {message}")]
    ToolList { server_id: String, message: String },

    #[error("server '{server_id}' not found")]
    ServerNotFound { server_id: String },

    #[error("server '{server_id}' is already registered")]
    DuplicateServer { server_id: String },

    #[error("invalid configuration for server '{server_id}': {message}")]
    InvalidConfig { server_id: String, message: String },

    #[error("cannot {operation} server '{server_id}' while {state}")]
    InvalidState {
        server_id: String,
        state: ConnectionState,
        operation: &'static str,
    },

    #[error("illegal transition for server '{server_id}': {from} -> {to}")]
    InvalidTransition {
        server_id: String,
        from: ConnectionState,
        to: ConnectionState,
    },

    #[error("{operation} timed out after {timeout:?} for server '{server_id}'")]
    Timeout {
        server_id: String,
        operation: &'static str,
        timeout: std::time::Duration,
    },

    #[error("operation on server '{server_id}' was cancelled")]
    Cancelled { server_id: String },
}

impl McpError {
    #[must_use]
    pub fn server_id(&self) -> &str {
        match self {
            Self::Connection { server_id, .. }
            | Self::Handshake { server_id, .. }
            | Self::ToolList { server_id, .. }
            | Self::ServerNotFound { server_id }
            | Self::DuplicateServer { server_id }
            | Self::InvalidConfig { server_id, .. }
            | Self::InvalidState { server_id, .. }
            | Self::InvalidTransition { server_id, .. }
            | Self::Timeout { server_id, .. }
            | Self::Cancelled { server_id } => server_id,
        }
    }

    /// Map this error into the failure taxonomy.
    ///
    /// Misuse of the manager API (unknown ids, bad configs, wrong state) is always a
    /// configuration problem; transport-level failures are classified by message.
    #[must_use]
    pub fn classification(&self) -> Classification {
        match self {
            Self::ServerNotFound { .. }
            | Self::DuplicateServer { .. }
            | Self::InvalidConfig { .. }
            | Self::InvalidState { .. }
            | Self::InvalidTransition { .. } => Classification::of(ErrorType::Configuration),
            Self::Timeout { .. } => Classification::of(ErrorType::Network),
            Self::Connection { message, .. }
            | Self::Handshake { message, .. }
            | Self::ToolList { message, .. } => classify_message(message),
            Self::Cancelled { .. } => Classification::of(ErrorType::Unknown),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connection_error_display() {
        let err = McpError::Connection {
            server_id: "github".into(),
            message: "refused".into(),
        };
        assert_eq!(
            err.to_string(),
            "connection failed for server 'github': refused"
        );
    }

    #[test]
    fn server_not_found_display() {
        let err = McpError::ServerNotFound {
            server_id: "missing".into(),
        };
        assert_eq!(err.to_string(), "server 'missing' not found");
    }

    #[test]
    fn invalid_state_display() {
        let err = McpError::InvalidState {
            server_id: "fs".into(),
            state: ConnectionState::Error,
            operation: "refresh tools on",
        };
        assert_eq!(err.to_string(), "cannot refresh tools on server 'fs' while error");
    }

    #[test]
    fn timeout_error_display() {
        let err = McpError::Timeout {
            server_id: "slow".into(),
            operation: "handshake",
            timeout: std::time::Duration::from_secs(30),
        };
        assert_eq!(
            err.to_string(),
            "handshake timed out after 30s for server 'slow'"
        );
    }

    #[test]
    fn unknown_server_is_configuration_class() {
        let err = McpError::ServerNotFound {
            server_id: "ghost".into(),
        };
        let class = err.classification();
        assert_eq!(class.error_type, ErrorType::Configuration);
        assert!(!class.auto_retry);
    }

    #[test]
    fn timeout_is_network_class() {
        let err = McpError::Timeout {
            server_id: "slow".into(),
            operation: "connect",
            timeout: std::time::Duration::from_secs(5),
        };
        let class = err.classification();
        assert_eq!(class.error_type, ErrorType::Network);
        assert!(class.auto_retry);
    }

    #[test]
    fn server_id_is_not_used_for_classification() {
        let err = McpError::Connection {
            server_id: "unauthorized-mirror".into(),
            message: "connection refused".into(),
        };
        assert_eq!(err.classification().error_type, ErrorType::Network);
    }
}
