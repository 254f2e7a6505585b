use serde::{Deserialize, Serialize};
use std::time::Duration;

/// The top-level configuration for the `entity-events-connector` library.
///
/// This struct aggregates the event-source endpoint, reconnection and heartbeat
/// behavior, and internal channel sizing. It is typically deserialized from a
/// configuration file and passed to the `ConnectionManager` upon initialization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct ConnectorConfig {
    #[serde(default)]
    pub endpoint: EndpointConfig,
    #[serde(default)]
    pub reconnect: ReconnectConfig,
    #[serde(default)]
    pub heartbeat: HeartbeatConfig,
    #[serde(default)]
    pub channels: ChannelConfig,
}

/// Where the remote event source lives.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct EndpointConfig {
    /// Host (and optional port) of the event source, e.g. `api.example.com:8443`.
    pub host: String,
    /// Use `wss` instead of `ws`. Mirrors whether the hosting page is served securely.
    pub secure: bool,
    /// Request path of the WebSocket endpoint.
    pub path: String,
    /// Upper bound for a single transport open, in milliseconds.
    #[serde(alias = "connect_timeout_ms")]
    pub connect_timeout_ms: u64,
}

/// Exponential backoff settings applied after an unclean close.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ReconnectConfig {
    /// Number of retries scheduled before the connection gives up for good.
    #[serde(alias = "max_attempts")]
    pub max_attempts: u32,
    #[serde(alias = "base_delay_ms")]
    pub base_delay_ms: u64,
    /// Ceiling applied after jitter has been added.
    #[serde(alias = "max_delay_ms")]
    pub max_delay_ms: u64,
    /// Upper bound (exclusive) of the random jitter added to every delay.
    #[serde(alias = "max_jitter_ms")]
    pub max_jitter_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct HeartbeatConfig {
    /// Interval between `ping` frames while connected. Zero is treated as one second.
    #[serde(alias = "interval_secs")]
    pub interval_secs: u64,
}

/// Defines capacities for the MPSC/broadcast channels within the connector.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct ChannelConfig {
    /// The buffer capacity for the command channel to the connection task.
    #[serde(alias = "command_buffer")]
    pub command_buffer: usize,
    /// How many lifecycle events a lagging `events()` receiver may fall behind.
    #[serde(alias = "lifecycle_event_buffer")]
    pub lifecycle_event_buffer: usize,
}

impl EndpointConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

impl HeartbeatConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1:3000".to_string(),
            secure: false,
            path: "/ws".to_string(),
            connect_timeout_ms: 10_000,
        }
    }
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            max_jitter_ms: 1_000,
        }
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self { interval_secs: 30 }
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            command_buffer: 64,
            lifecycle_event_buffer: 64,
        }
    }
}
