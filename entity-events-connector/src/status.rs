use chrono::{DateTime, Utc};
use serde::Serialize;
use std::{fmt, time::Duration};

/// Lifecycle of the single shared connection.
///
/// Only the connection task writes it; everyone else observes it through
/// [`ConnectionStatus`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Reconnecting => "reconnecting",
        };
        f.write_str(s)
    }
}

/// Ready state of the underlying socket, as a browser WebSocket reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ReadyState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// Point-in-time view of the connection, as returned by `status()`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionStatus {
    pub is_connected: bool,
    pub ready_state: ReadyState,
    pub reconnect_attempts: u32,
    pub max_reconnect_attempts: u32,
    pub last_heartbeat: Option<DateTime<Utc>>,
    pub connection_state: ConnectionState,
}

impl ConnectionStatus {
    pub(crate) fn initial(max_reconnect_attempts: u32) -> Self {
        Self {
            is_connected: false,
            ready_state: ReadyState::Closed,
            reconnect_attempts: 0,
            max_reconnect_attempts,
            last_heartbeat: None,
            connection_state: ConnectionState::Disconnected,
        }
    }
}

/// Lifecycle notifications published on `ConnectionHandle::events()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionEvent {
    Connected,
    Disconnected {
        code: u16,
        reason: String,
        was_clean: bool,
    },
    /// A retry has been scheduled `delay` from now.
    Reconnecting { attempt: u32, delay: Duration },
    /// Every allowed retry failed; the connection stays down until `connect()` is
    /// called again.
    MaxReconnectAttemptsReached { attempts: u32 },
    /// A transport-level error. Does not change the connection state by itself.
    Error { message: String },
}
