//! # Transport Seam
//!
//! The connection manager never talks to a socket directly. It opens connections
//! through a [`Transport`] and then drives the returned [`TransportConnection`].
//!
//! - [`WebSocketTransport`]: the production client, built on `tokio-tungstenite`.
//! - [`LoopbackTransport`]: an in-process transport whose far side is driven by a
//!   [`LoopbackServer`]; handy for embedding a local event source and for tests.

mod loopback;
mod websocket;

pub use loopback::{LoopbackPeer, LoopbackServer, LoopbackTransport};
pub use websocket::WebSocketTransport;

use crate::error::TransportError;
use async_trait::async_trait;
use url::Url;

/// Close code sent by `disconnect()`; the only code treated as a clean close.
pub const NORMAL_CLOSURE: u16 = 1000;
/// Close code reported when the connection ended without a closing handshake.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// How and why a connection closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    pub code: u16,
    pub reason: String,
    pub was_clean: bool,
}

impl CloseInfo {
    pub fn clean(reason: impl Into<String>) -> Self {
        Self {
            code: NORMAL_CLOSURE,
            reason: reason.into(),
            was_clean: true,
        }
    }

    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self {
            code: ABNORMAL_CLOSURE,
            reason: reason.into(),
            was_clean: false,
        }
    }

    /// Builds the close info for a received close code.
    pub fn from_code(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
            was_clean: code == NORMAL_CLOSURE,
        }
    }
}

/// Something that happened on an open connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A text frame from the event source.
    Text(String),
    /// A transport-level error. The connection may still be usable; a `Closed`
    /// event follows if it is not.
    Error(String),
    /// The connection is gone. No further events are produced after this.
    Closed(CloseInfo),
}

/// Opens connections to an event source.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    async fn open(&self, url: &Url) -> Result<Box<dyn TransportConnection>, TransportError>;
}

/// A single open connection.
#[async_trait]
pub trait TransportConnection: Send {
    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Waits for the next event. Must be cancel-safe: dropping the future before it
    /// completes must not lose a frame.
    async fn recv(&mut self) -> TransportEvent;

    /// Performs a closing handshake. Errors are ignored; the connection is unusable
    /// afterwards either way.
    async fn close(&mut self, code: u16, reason: &str);
}
