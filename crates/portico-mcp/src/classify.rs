//! Pattern-based failure classification.
//!
//! Rules are evaluated in a fixed order and the first matching rule wins, so a message
//! that mentions both "timeout" and "unauthorized" is always `authentication`.

use std::error::Error as StdError;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::McpError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorType {
    Network,
    Authentication,
    Protocol,
    Resource,
    Configuration,
    Unknown,
}

impl ErrorType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Authentication => "authentication",
            Self::Protocol => "protocol",
            Self::Resource => "resource",
            Self::Configuration => "configuration",
            Self::Unknown => "unknown",
        }
    }

    fn code_prefix(self) -> &'static str {
        match self {
            Self::Network => "NET",
            Self::Authentication => "AUTH",
            Self::Protocol => "PROTO",
            Self::Resource => "RES",
            Self::Configuration => "CFG",
            Self::Unknown => "UNK",
        }
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

/// Outcome of classifying one failure signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Classification {
    #[serde(rename = "type")]
    pub error_type: ErrorType,
    pub severity: Severity,
    pub recoverable: bool,
    pub auto_retry: bool,
    pub user_action: bool,
    pub remediation_steps: Vec<String>,
    pub description: String,
}

impl Classification {
    /// Canonical classification for a taxonomy bucket.
    #[must_use]
    pub fn of(error_type: ErrorType) -> Self {
        let (severity, recoverable, auto_retry, user_action) = match error_type {
            ErrorType::Network => (Severity::Medium, true, true, false),
            ErrorType::Authentication => (Severity::High, true, false, true),
            ErrorType::Protocol => (Severity::High, false, false, true),
            ErrorType::Resource | ErrorType::Configuration | ErrorType::Unknown => {
                (Severity::Medium, true, false, true)
            }
        };

        Self {
            error_type,
            severity,
            recoverable,
            auto_retry,
            user_action,
            remediation_steps: remediation(error_type)
                .iter()
                .map(|s| (*s).to_owned())
                .collect(),
            description: description(error_type).to_owned(),
        }
    }

    /// Whether the connection manager may schedule a retry without the user.
    #[must_use]
    pub fn should_auto_retry(&self) -> bool {
        self.recoverable && self.auto_retry
    }
}

struct Rule {
    error_type: ErrorType,
    patterns: &'static [&'static str],
}

const RULES: &[Rule] = &[
    Rule {
        error_type: ErrorType::Authentication,
        patterns: &[
            "unauthorized",
            "unauthorised",
            "forbidden",
            "status 401",
            "status: 401",
            "status 403",
            "status: 403",
            "authentication failed",
            "invalid token",
            "token expired",
            "expired token",
            "invalid credentials",
            "bad credentials",
            "invalid api key",
        ],
    },
    Rule {
        error_type: ErrorType::Configuration,
        patterns: &[
            "missing required",
            "missing parameter",
            "required parameter",
            "invalid configuration",
            "missing config",
            "executable not found",
            "command not found",
            "is not recognized as",
            "unsupported server type",
        ],
    },
    Rule {
        error_type: ErrorType::Resource,
        patterns: &[
            "no such file",
            "enoent",
            "file not found",
            "does not exist",
            "not a directory",
            "permission denied",
            "eacces",
            "eperm",
            "no space left",
            "too many open files",
            "unable to open database",
        ],
    },
    Rule {
        error_type: ErrorType::Protocol,
        patterns: &[
            "malformed",
            "invalid json",
            "parse error",
            "unexpected token",
            "expected value",
            "method not found",
            "unsupported method",
            "unknown method",
            "protocol error",
            "invalid response",
            "unsupported protocol version",
            "-32700",
            "-32601",
        ],
    },
    Rule {
        error_type: ErrorType::Network,
        patterns: &[
            "connection refused",
            "econnrefused",
            "connection reset",
            "econnreset",
            "timed out",
            "timeout",
            "etimedout",
            "dns",
            "enotfound",
            "getaddrinfo",
            "failed to lookup address",
            "network is unreachable",
            "host unreachable",
            "broken pipe",
            "connection closed",
        ],
    },
];

/// Classify a raw failure message.
#[must_use]
pub fn classify_message(message: &str) -> Classification {
    let lowered = message.to_lowercase();
    let error_type = RULES
        .iter()
        .find(|rule| rule.patterns.iter().any(|p| lowered.contains(p)))
        .map_or(ErrorType::Unknown, |rule| rule.error_type);
    Classification::of(error_type)
}

/// Classify an error, including its whole `source()` chain.
///
/// An [`McpError`] keeps its own variant-based classification.
#[must_use]
pub fn classify(error: &(dyn StdError + 'static)) -> Classification {
    if let Some(mcp) = error.downcast_ref::<McpError>() {
        return mcp.classification();
    }
    classify_message(&chain_message(error))
}

fn chain_message(error: &(dyn StdError + 'static)) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(inner) = source {
        message.push_str(": ");
        message.push_str(&inner.to_string());
        source = inner.source();
    }
    message
}

/// A classified failure observed for one server.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorRecord {
    #[serde(rename = "type")]
    pub error_type: ErrorType,
    pub code: String,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub server_id: String,
    pub recoverable: bool,
    pub severity: Severity,
    pub description: String,
    pub remediation_steps: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ErrorRecord {
    #[must_use]
    pub fn new(
        classification: &Classification,
        message: impl Into<String>,
        server_id: impl Into<String>,
        details: Option<serde_json::Value>,
    ) -> Self {
        let message = message.into();
        let timestamp = Utc::now();
        Self {
            error_type: classification.error_type,
            code: error_code(classification.error_type, &message, timestamp),
            message,
            timestamp,
            server_id: server_id.into(),
            recoverable: classification.recoverable,
            severity: classification.severity,
            description: classification.description.clone(),
            remediation_steps: classification.remediation_steps.clone(),
            details,
        }
    }
}

/// Classify `error` and stamp it into an [`ErrorRecord`] for `server_id`.
#[must_use]
pub fn create_error(
    error: &(dyn StdError + 'static),
    server_id: &str,
    details: Option<serde_json::Value>,
) -> ErrorRecord {
    let classification = classify(error);
    ErrorRecord::new(&classification, chain_message(error), server_id, details)
}

const CODE_FRAGMENT_WORDS: usize = 3;
const CODE_FRAGMENT_MAX: usize = 32;

fn error_code(error_type: ErrorType, message: &str, at: DateTime<Utc>) -> String {
    let fragment: String = message
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|w| !w.is_empty())
        .take(CODE_FRAGMENT_WORDS)
        .collect::<Vec<_>>()
        .join("_")
        .to_ascii_uppercase()
        .chars()
        .take(CODE_FRAGMENT_MAX)
        .collect();
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    let fragment = if fragment.is_empty() { "ERROR" } else { &fragment };
    format!(
        "{}_{fragment}_{}_{}",
        error_type.code_prefix(),
        at.timestamp_millis(),
        &suffix[..6]
    )
}

fn description(error_type: ErrorType) -> &'static str {
    match error_type {
        ErrorType::Network => "The server could not be reached over its transport.",
        ErrorType::Authentication => "The server rejected the supplied credentials.",
        ErrorType::Protocol => "The server sent a message that does not follow the MCP protocol.",
        ErrorType::Resource => {
            "A file, directory, or system resource required by the server is unavailable."
        }
        ErrorType::Configuration => "The server configuration is incomplete or invalid.",
        ErrorType::Unknown => "The server failed for an unrecognized reason.",
    }
}

fn remediation(error_type: ErrorType) -> &'static [&'static str] {
    match error_type {
        ErrorType::Network => &[
            "Check that the server process or endpoint is running",
            "Verify network connectivity and proxy settings",
            "Wait for the automatic retry or reconnect manually",
        ],
        ErrorType::Authentication => &[
            "Verify the API token or credentials for this server",
            "Regenerate the token if it has expired",
            "Confirm the token has the required scopes",
        ],
        ErrorType::Protocol => &[
            "Update the server package to a version compatible with this client",
            "Check the server logs for malformed output on stdout",
        ],
        ErrorType::Resource => &[
            "Check that the configured path exists",
            "Grant read permission to the configured path",
        ],
        ErrorType::Configuration => &[
            "Review the server configuration for missing fields",
            "Make sure the launch command is installed and on PATH",
        ],
        ErrorType::Unknown => &[
            "Inspect the error message and server logs",
            "Retry the connection",
            "Remove and re-add the server if the problem persists",
        ],
    }
}
