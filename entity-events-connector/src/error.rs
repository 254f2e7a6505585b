use thiserror::Error;

/// Errors raised by a [`Transport`](crate::transport::Transport) implementation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("Failed to open connection: {0}")]
    Open(String),

    #[error("Connection attempt timed out after {0} ms")]
    Timeout(u64),

    #[error("Failed to send frame: {0}")]
    Send(String),

    #[error("Connection is closed")]
    Closed,
}

/// Reasons a `connect()` call can be rejected.
///
/// This is `Clone` because a single in-flight connect outcome is shared by every
/// caller that asked for it while the attempt was pending.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConnectError {
    /// The endpoint URL could not be constructed. Not retried automatically.
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error(transparent)]
    Transport(#[from] TransportError),

    /// `disconnect()` was requested before the attempt finished.
    #[error("Connect attempt was aborted by disconnect")]
    Aborted,

    /// The background connection task is no longer running.
    #[error("Connection manager is not running")]
    ManagerStopped,
}

/// Why an inbound frame was dropped by the dispatcher.
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Configuration errors reported when attaching an `UpdateFeed`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FeedError {
    #[error("Batching and throttling cannot be enabled on the same feed")]
    ConflictingPolicies,

    #[error("Batch size must be at least 1")]
    ZeroBatchSize,

    #[error("At least one event type is required when the feed uses the WebSocket")]
    NoEventTypes,

    #[error("Polling interval must be greater than zero")]
    ZeroInterval,
}
