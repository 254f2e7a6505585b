#![allow(dead_code)]

use entity_events_connector::{
    config::ConnectorConfig,
    events::{ClientFrame, InboundMessage},
    transport::{LoopbackPeer, LoopbackServer, LoopbackTransport},
    ConnectionEvent, ConnectionHandle, ConnectionManager, ConnectionState, Credentials,
};
use serde_json::Value;
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
};

/// A running connection manager wired to an in-process event source.
pub struct TestEnvironment {
    pub handle: ConnectionHandle,
    pub server: LoopbackServer,
    pub task: JoinHandle<anyhow::Result<()>>,
}

impl TestEnvironment {
    pub fn start() -> Self {
        Self::with_config(test_config())
    }

    pub fn with_config(config: ConnectorConfig) -> Self {
        let (transport, server) = LoopbackTransport::pair();
        let (manager, handle) = ConnectionManager::new(Arc::new(config), Arc::new(transport));
        let task = tokio::spawn(manager.run());
        Self {
            handle,
            server,
            task,
        }
    }

    /// Connects anonymously and returns the server side of the new connection.
    pub async fn connect(&mut self) -> LoopbackPeer {
        self.handle
            .connect(Credentials::anonymous())
            .await
            .expect("connect should succeed");
        self.server
            .accept()
            .await
            .expect("server should see the connection")
    }

    pub async fn wait_for_state(&self, state: ConnectionState) {
        let mut changes = self.handle.state_changes();
        tokio::time::timeout(
            Duration::from_secs(600),
            changes.wait_for(|status| status.connection_state == state),
        )
        .await
        .expect("timed out waiting for state")
        .expect("connection manager stopped");
    }
}

pub fn test_config() -> ConnectorConfig {
    let mut config = ConnectorConfig::default();
    config.endpoint.host = "events.test:8080".to_string();
    config.reconnect.max_attempts = 3;
    config.reconnect.base_delay_ms = 100;
    config
}

/// Lets every runnable task make progress. With a paused clock the sleep only
/// completes once the runtime is otherwise idle.
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(10)).await;
}

/// Subscribes a listener that forwards everything it sees into a channel.
pub fn recording_listener(
    handle: &ConnectionHandle,
    event_type: &str,
) -> (
    entity_events_connector::Subscription,
    mpsc::UnboundedReceiver<(Value, InboundMessage)>,
) {
    let (tx, rx) = mpsc::unbounded_channel();
    let subscription = handle.subscribe(event_type, move |data, message| {
        let _ = tx.send((data.clone(), message.clone()));
    });
    (subscription, rx)
}

/// Subscribe frames only, ignoring heartbeats and unsubscribes.
pub fn subscribed_types(frames: &[ClientFrame]) -> Vec<String> {
    let mut types: Vec<String> = frames
        .iter()
        .filter_map(|frame| match frame {
            ClientFrame::Subscribe { event_type } => Some(event_type.clone()),
            _ => None,
        })
        .collect();
    types.sort();
    types
}

/// Collects lifecycle events until `stop` matches one (inclusive).
pub async fn collect_events_until(
    events: &mut broadcast::Receiver<ConnectionEvent>,
    stop: impl Fn(&ConnectionEvent) -> bool,
) -> Vec<ConnectionEvent> {
    let mut seen = Vec::new();
    loop {
        let event = tokio::time::timeout(Duration::from_secs(600), events.recv())
            .await
            .expect("timed out waiting for lifecycle event")
            .expect("lifecycle channel closed");
        let done = stop(&event);
        seen.push(event);
        if done {
            return seen;
        }
    }
}
