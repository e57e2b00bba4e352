use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a single configured server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Handshaking,
    Ready,
    /// Ready and actively used by a caller. The manager itself never enters this state.
    Connected,
    Error,
}

impl ConnectionState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Handshaking => "handshaking",
            Self::Ready => "ready",
            Self::Connected => "connected",
            Self::Error => "error",
        }
    }

    /// `ready` or `connected`.
    #[must_use]
    pub fn is_ready(self) -> bool {
        matches!(self, Self::Ready | Self::Connected)
    }

    /// A connection attempt is underway.
    #[must_use]
    pub fn is_in_progress(self) -> bool {
        matches!(self, Self::Connecting | Self::Handshaking)
    }

    /// States in which a `connect` request is a no-op.
    #[must_use]
    pub fn is_active(self) -> bool {
        self.is_in_progress() || self.is_ready()
    }

    /// Whether `self -> next` is one of the permitted lifecycle edges.
    ///
    /// Every state may fall back to `disconnected` (disconnect or remove).
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        use ConnectionState::{Connected, Connecting, Disconnected, Error, Handshaking, Ready};

        matches!(
            (self, next),
            (_, Disconnected)
                | (Disconnected | Error, Connecting)
                | (Connecting, Handshaking | Error)
                | (Handshaking, Ready | Error)
                | (Ready, Ready)
                | (Ready | Connected, Error)
        )
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Emitted on every state change of a managed server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StateEvent {
    pub server_id: String,
    pub from: ConnectionState,
    pub to: ConnectionState,
    pub at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::ConnectionState::{self, *};

    const ALL: [ConnectionState; 6] = [
        Disconnected,
        Connecting,
        Handshaking,
        Ready,
        Connected,
        Error,
    ];

    #[test]
    fn permitted_edges() {
        assert!(Disconnected.can_transition_to(Connecting));
        assert!(Connecting.can_transition_to(Handshaking));
        assert!(Connecting.can_transition_to(Error));
        assert!(Handshaking.can_transition_to(Ready));
        assert!(Handshaking.can_transition_to(Error));
        assert!(Ready.can_transition_to(Ready));
        assert!(Ready.can_transition_to(Error));
        assert!(Connected.can_transition_to(Error));
        assert!(Error.can_transition_to(Connecting));
    }

    #[test]
    fn every_state_can_disconnect() {
        for state in ALL {
            assert!(state.can_transition_to(Disconnected), "{state} -> disconnected");
        }
    }

    #[test]
    fn forbidden_edges() {
        assert!(!Disconnected.can_transition_to(Ready));
        assert!(!Disconnected.can_transition_to(Handshaking));
        assert!(!Connecting.can_transition_to(Ready));
        assert!(!Handshaking.can_transition_to(Connecting));
        assert!(!Ready.can_transition_to(Connecting));
        assert!(!Error.can_transition_to(Ready));
        assert!(!Error.can_transition_to(Error));
        assert!(!Ready.can_transition_to(Connected));
    }

    #[test]
    fn activity_predicates() {
        assert!(Connecting.is_active());
        assert!(Handshaking.is_active());
        assert!(Ready.is_active());
        assert!(Connected.is_active());
        assert!(!Disconnected.is_active());
        assert!(!Error.is_active());
        assert!(Connected.is_ready());
        assert!(!Handshaking.is_ready());
    }

    #[test]
    fn serde_uses_lowercase_names() {
        let json = serde_json::to_string(&Handshaking).unwrap();
        assert_eq!(json, "\"handshaking\"");
        let back: ConnectionState = serde_json::from_str("\"error\"").unwrap();
        assert_eq!(back, Error);
    }
}
