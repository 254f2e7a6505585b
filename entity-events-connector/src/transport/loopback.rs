use super::{CloseInfo, Transport, TransportConnection, TransportEvent};
use crate::{error::TransportError, events::ClientFrame};
use async_trait::async_trait;
use serde_json::Value;
use std::{
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};
use tokio::sync::mpsc;
use url::Url;

#[derive(Debug)]
struct ServerState {
    accepting: bool,
    open_delay: Duration,
    opened: Vec<Url>,
}

#[derive(Debug)]
struct Shared {
    state: Mutex<ServerState>,
    peers_tx: mpsc::UnboundedSender<LoopbackPeer>,
}

impl Shared {
    fn state(&self) -> MutexGuard<'_, ServerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Client half of an in-process event source.
#[derive(Debug, Clone)]
pub struct LoopbackTransport {
    shared: Arc<Shared>,
}

/// Server half of an in-process event source. Every connection the client opens
/// shows up here as a [`LoopbackPeer`].
#[derive(Debug)]
pub struct LoopbackServer {
    shared: Arc<Shared>,
    peers_rx: mpsc::UnboundedReceiver<LoopbackPeer>,
}

impl LoopbackTransport {
    /// Creates a connected transport/server pair. The server accepts connections
    /// until told otherwise.
    pub fn pair() -> (Self, LoopbackServer) {
        let (peers_tx, peers_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared {
            state: Mutex::new(ServerState {
                accepting: true,
                open_delay: Duration::ZERO,
                opened: Vec::new(),
            }),
            peers_tx,
        });
        (
            Self {
                shared: shared.clone(),
            },
            LoopbackServer { shared, peers_rx },
        )
    }
}

impl LoopbackServer {
    /// When `false`, every subsequent open fails as if the server were unreachable.
    pub fn set_accepting(&self, accepting: bool) {
        self.shared.state().accepting = accepting;
    }

    /// Delays every subsequent open by `delay` before it succeeds or fails.
    pub fn set_open_delay(&self, delay: Duration) {
        self.shared.state().open_delay = delay;
    }

    /// Number of open attempts seen so far, successful or not.
    pub fn open_count(&self) -> usize {
        self.shared.state().opened.len()
    }

    /// URLs of every open attempt, in order.
    pub fn opened_urls(&self) -> Vec<Url> {
        self.shared.state().opened.clone()
    }

    /// Waits for the next accepted connection.
    pub async fn accept(&mut self) -> Option<LoopbackPeer> {
        self.peers_rx.recv().await
    }
}

#[async_trait]
impl Transport for LoopbackTransport {
    async fn open(&self, url: &Url) -> Result<Box<dyn TransportConnection>, TransportError> {
        let (accepting, delay) = {
            let mut state = self.shared.state();
            state.opened.push(url.clone());
            (state.accepting, state.open_delay)
        };
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if !accepting {
            return Err(TransportError::Open("connection refused".to_string()));
        }

        let (to_server, from_client) = mpsc::unbounded_channel();
        let (to_client, from_server) = mpsc::unbounded_channel();
        let client_close = Arc::new(Mutex::new(None));
        let peer = LoopbackPeer {
            to_client,
            from_client,
            client_close: client_close.clone(),
        };
        self.shared
            .peers_tx
            .send(peer)
            .map_err(|_| TransportError::Open("loopback server is gone".to_string()))?;

        Ok(Box::new(LoopbackConnection {
            to_server: Some(to_server),
            from_server,
            client_close,
        }))
    }
}

struct LoopbackConnection {
    to_server: Option<mpsc::UnboundedSender<String>>,
    from_server: mpsc::UnboundedReceiver<TransportEvent>,
    client_close: Arc<Mutex<Option<CloseInfo>>>,
}

#[async_trait]
impl TransportConnection for LoopbackConnection {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        let sender = self.to_server.as_ref().ok_or(TransportError::Closed)?;
        sender.send(text).map_err(|_| TransportError::Closed)
    }

    async fn recv(&mut self) -> TransportEvent {
        match self.from_server.recv().await {
            Some(event) => event,
            None => TransportEvent::Closed(CloseInfo::abnormal("loopback peer dropped")),
        }
    }

    async fn close(&mut self, code: u16, reason: &str) {
        *self
            .client_close
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(CloseInfo::from_code(code, reason));
        self.to_server = None;
    }
}

/// The server's view of one client connection.
#[derive(Debug)]
pub struct LoopbackPeer {
    to_client: mpsc::UnboundedSender<TransportEvent>,
    from_client: mpsc::UnboundedReceiver<String>,
    client_close: Arc<Mutex<Option<CloseInfo>>>,
}

impl LoopbackPeer {
    pub fn send_text(&self, text: impl Into<String>) {
        let _ = self.to_client.send(TransportEvent::Text(text.into()));
    }

    pub fn send_json(&self, value: &Value) {
        self.send_text(value.to_string());
    }

    /// Reports a transport error to the client without closing the connection.
    pub fn send_error(&self, message: impl Into<String>) {
        let _ = self.to_client.send(TransportEvent::Error(message.into()));
    }

    /// Closes the connection from the server side with the given code.
    pub fn close(self, code: u16, reason: &str) {
        let _ = self
            .to_client
            .send(TransportEvent::Closed(CloseInfo::from_code(code, reason)));
    }

    /// Drops the connection without a closing handshake.
    pub fn drop_connection(self) {
        let _ = self
            .to_client
            .send(TransportEvent::Closed(CloseInfo::abnormal("connection reset")));
    }

    /// Waits for the next text frame sent by the client. `None` once the client closed.
    pub async fn recv_text(&mut self) -> Option<String> {
        self.from_client.recv().await
    }

    /// Waits for the next frame sent by the client and decodes it as a control frame.
    pub async fn recv_frame(&mut self) -> Option<ClientFrame> {
        let text = self.recv_text().await?;
        serde_json::from_str(&text).ok()
    }

    /// Returns every frame the client has sent so far without waiting.
    pub fn drain_frames(&mut self) -> Vec<ClientFrame> {
        let mut frames = Vec::new();
        while let Ok(text) = self.from_client.try_recv() {
            if let Ok(frame) = serde_json::from_str(&text) {
                frames.push(frame);
            }
        }
        frames
    }

    /// The close code and reason the client used, once it has closed.
    pub fn client_close(&self) -> Option<CloseInfo> {
        self.client_close
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}
