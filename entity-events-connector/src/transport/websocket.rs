use super::{CloseInfo, Transport, TransportConnection, TransportEvent};
use crate::error::TransportError;
use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::{
        self,
        protocol::{frame::coding::CloseCode, CloseFrame},
        Message,
    },
    MaybeTlsStream, WebSocketStream,
};
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// WebSocket client transport (`ws://` and `wss://` via rustls).
#[derive(Debug, Clone)]
pub struct WebSocketTransport {
    connect_timeout: Duration,
}

impl WebSocketTransport {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(&self, url: &Url) -> Result<Box<dyn TransportConnection>, TransportError> {
        tracing::debug!("Opening WebSocket connection to {}", redacted(url));

        let connected = tokio::time::timeout(self.connect_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| TransportError::Timeout(self.connect_timeout.as_millis() as u64))?;

        match connected {
            Ok((stream, _response)) => Ok(Box::new(WebSocketConnection {
                stream,
                failed: false,
            })),
            Err(tungstenite::Error::Http(response)) => Err(TransportError::Open(format!(
                "HTTP {} during WebSocket handshake",
                response.status()
            ))),
            Err(e) => Err(TransportError::Open(e.to_string())),
        }
    }
}

struct WebSocketConnection {
    stream: WsStream,
    /// Set after a fatal stream error; the next `recv` reports the close.
    failed: bool,
}

#[async_trait]
impl TransportConnection for WebSocketConnection {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.stream
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn recv(&mut self) -> TransportEvent {
        if self.failed {
            return TransportEvent::Closed(CloseInfo::abnormal("WebSocket stream failed"));
        }
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return TransportEvent::Text(text.to_string()),
                Some(Ok(Message::Binary(bytes))) => {
                    return match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => TransportEvent::Text(text),
                        Err(e) => TransportEvent::Error(format!("Non UTF-8 binary frame: {}", e)),
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    let info = match frame {
                        Some(frame) => CloseInfo::from_code(frame.code.into(), frame.reason.to_string()),
                        // 1005: close frame without a status code
                        None => CloseInfo::from_code(1005, "Server closed connection"),
                    };
                    return TransportEvent::Closed(info);
                }
                // Control frames are answered by tungstenite itself.
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => continue,
                Some(Err(tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed)) | None => {
                    return TransportEvent::Closed(CloseInfo::abnormal("WebSocket stream ended"));
                }
                Some(Err(e)) => {
                    self.failed = matches!(e, tungstenite::Error::Io(_) | tungstenite::Error::Protocol(_));
                    return TransportEvent::Error(e.to_string());
                }
            }
        }
    }

    async fn close(&mut self, code: u16, reason: &str) {
        let frame = CloseFrame {
            code: CloseCode::from(code),
            reason: reason.to_string().into(),
        };
        if let Err(e) = self.stream.close(Some(frame)).await {
            tracing::debug!("Ignoring error during WebSocket close: {}", e);
        }
    }
}

/// Strips the query string so bearer tokens never end up in logs.
fn redacted(url: &Url) -> String {
    let mut url = url.clone();
    url.set_query(None);
    url.to_string()
}
