//! Client-side real-time event layer for the entity-management API.
//!
//! This crate keeps one connection to the remote event source alive and fans the
//! events it pushes out to any number of independent consumers.
//!
//! # Key Components
//!
//! *   [`workers::ConnectionManager`]: owns the single transport connection. It
//!     reconnects with exponential backoff and jitter after unclean closes, sends
//!     heartbeats, and replays every active subscription after each (re)connect.
//!     Interact with it through the clonable [`workers::ConnectionHandle`].
//! *   [`registry`]: maps event types (and the `"*"` wildcard) to listeners and
//!     sends `subscribe`/`unsubscribe` control frames on the first/last listener.
//! *   [`dispatcher`]: parses inbound frames, swallows heartbeat acknowledgements,
//!     and invokes listeners with per-listener panic isolation.
//! *   [`feed`]: per-consumer update policies (selective filters, throttling,
//!     batching, polling fallback) on top of a raw subscription.
//! *   [`transport`]: the seam between the manager and the network, with a
//!     WebSocket implementation and an in-process loopback.
pub mod backoff;
/// Defines configuration structures for the connector.
pub mod config;
pub mod dispatcher;
pub mod endpoint;
pub mod error;
/// Wire frames exchanged with the event source.
pub mod events;
pub mod feed;
pub mod registry;
pub mod status;
pub mod transport;
/// The connection manager task and its public handle.
pub mod workers;

pub use endpoint::Credentials;
pub use events::{InboundMessage, Severity, WILDCARD};
pub use feed::{Update, UpdateFeed, UpdatePolicy};
pub use registry::Subscription;
pub use status::{ConnectionEvent, ConnectionState, ConnectionStatus};
pub use workers::{ConnectionHandle, ConnectionManager};
