//! # Connection Manager
//!
//! This module defines the `ConnectionManager`, the single owner of the transport
//! connection shared by every consumer in the process.
//!
//! ## Core Components
//!
//! - [`ConnectionManager`]: The background task. It owns the connection state, the
//!   reconnect counter and the heartbeat timer, and is consumed when its `run`
//!   method is spawned.
//! - [`ConnectionHandle`]: A clonable, thread-safe handle that provides the public
//!   API (`connect`, `disconnect`, `subscribe`, `status`).
//!
//! Subscriptions live in a shared [`SubscriptionRegistry`]; the manager replays
//! them after every successful (re)connect.

mod connection;

use crate::{
    backoff::ReconnectPolicy,
    config::ConnectorConfig,
    dispatcher::MessageDispatcher,
    endpoint::Credentials,
    error::ConnectError,
    events::{ClientFrame, InboundMessage},
    registry::{Subscription, SubscriptionRegistry},
    status::{ConnectionEvent, ConnectionStatus},
    transport::{Transport, WebSocketTransport},
};
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use url::Url;

/// Commands sent from a [`ConnectionHandle`] to the running manager.
#[derive(Debug)]
pub(crate) enum Command {
    Connect {
        credentials: Credentials,
        reply: oneshot::Sender<Result<(), ConnectError>>,
    },
    Disconnect {
        reply: oneshot::Sender<()>,
    },
    Shutdown,
}

/// A clonable handle for interacting with the running [`ConnectionManager`].
///
/// Every consumer in the application should share handles to one manager so
/// they share one transport connection and one subscription registry.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    command_tx: mpsc::Sender<Command>,
    registry: Arc<SubscriptionRegistry>,
    status_rx: watch::Receiver<ConnectionStatus>,
    events_tx: broadcast::Sender<ConnectionEvent>,
}

impl ConnectionHandle {
    /// Opens the connection, embedding the credentials in the endpoint URL.
    ///
    /// Calls made while an attempt is already in flight share that attempt's
    /// outcome instead of opening a second connection. Calling this while
    /// connected resolves immediately.
    pub async fn connect(&self, credentials: Credentials) -> Result<(), ConnectError> {
        let (reply, reply_rx) = oneshot::channel();
        self.command_tx
            .send(Command::Connect { credentials, reply })
            .await
            .map_err(|_| ConnectError::ManagerStopped)?;
        reply_rx.await.map_err(|_| ConnectError::ManagerStopped)?
    }

    /// Clears every subscription, stops the heartbeat and any pending reconnect,
    /// and closes the connection cleanly. Resolves once the state is `disconnected`.
    pub async fn disconnect(&self) {
        self.registry.clear();
        let (reply, reply_rx) = oneshot::channel();
        if self
            .command_tx
            .send(Command::Disconnect { reply })
            .await
            .is_err()
        {
            tracing::warn!("Failed to send disconnect: connection manager may be down");
            return;
        }
        let _ = reply_rx.await;
    }

    /// Registers `callback` for `event_type` (or [`WILDCARD`](crate::events::WILDCARD)).
    pub fn subscribe<F>(&self, event_type: impl Into<String>, callback: F) -> Subscription
    where
        F: Fn(&Value, &InboundMessage) + Send + Sync + 'static,
    {
        self.registry.subscribe(event_type, callback)
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status_rx.borrow().clone()
    }

    pub fn is_connected(&self) -> bool {
        self.status_rx.borrow().is_connected
    }

    /// A receiver that is notified on every status change.
    pub fn state_changes(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_rx.clone()
    }

    /// Lifecycle notifications emitted from now on.
    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events_tx.subscribe()
    }

    pub fn registry(&self) -> &Arc<SubscriptionRegistry> {
        &self.registry
    }

    /// Stops the manager task. The connection, if open, is closed cleanly.
    pub async fn shutdown(&self) {
        if self.command_tx.send(Command::Shutdown).await.is_err() {
            tracing::warn!("Failed to send shutdown: connection manager may already be down");
        }
    }
}

/// The background service that owns the shared connection.
///
/// It is created once, its [`run()`](ConnectionManager::run) method is spawned as a
/// background task, and the [`ConnectionHandle`] is then the only way to interact
/// with it.
pub struct ConnectionManager {
    config: Arc<ConnectorConfig>,
    transport: Arc<dyn Transport>,
    registry: Arc<SubscriptionRegistry>,
    dispatcher: MessageDispatcher,
    policy: ReconnectPolicy,
    command_rx: mpsc::Receiver<Command>,
    outbound_rx: mpsc::UnboundedReceiver<ClientFrame>,
    status_tx: watch::Sender<ConnectionStatus>,
    events_tx: broadcast::Sender<ConnectionEvent>,
    /// Endpoint of the last `connect()`, reused by reconnect attempts.
    url: Option<Url>,
    attempts: u32,
}

impl ConnectionManager {
    /// Creates a new `ConnectionManager` and its associated [`ConnectionHandle`].
    ///
    /// The manager does nothing until [`run()`](ConnectionManager::run) is spawned,
    /// and does not open a connection until `connect()` is called on a handle.
    pub fn new(config: Arc<ConnectorConfig>, transport: Arc<dyn Transport>) -> (Self, ConnectionHandle) {
        let (command_tx, command_rx) = mpsc::channel(config.channels.command_buffer);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, _) = broadcast::channel(config.channels.lifecycle_event_buffer);
        let (status_tx, status_rx) =
            watch::channel(ConnectionStatus::initial(config.reconnect.max_attempts));

        let registry = Arc::new(SubscriptionRegistry::new(outbound_tx));
        let policy = ReconnectPolicy::from(&config.reconnect);

        let manager = Self {
            config,
            transport,
            registry: registry.clone(),
            dispatcher: MessageDispatcher::new(registry.clone()),
            policy,
            command_rx,
            outbound_rx,
            status_tx,
            events_tx: events_tx.clone(),
            url: None,
            attempts: 0,
        };
        let handle = ConnectionHandle {
            command_tx,
            registry,
            status_rx,
            events_tx,
        };
        (manager, handle)
    }

    /// Creates a manager backed by the WebSocket transport.
    pub fn websocket(config: Arc<ConnectorConfig>) -> (Self, ConnectionHandle) {
        let transport = Arc::new(WebSocketTransport::new(config.endpoint.connect_timeout()));
        Self::new(config, transport)
    }
}
