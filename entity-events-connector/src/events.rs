//! Wire-level frame types exchanged with the event source.
//!
//! All frames are JSON text. Outbound frames are the control protocol
//! ([`ClientFrame`]); inbound frames are either the heartbeat acknowledgement or a
//! domain event ([`InboundMessage`]).

use crate::error::FrameError;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Sentinel event type whose listeners receive every dispatched message.
pub const WILDCARD: &str = "*";

/// Event type of the heartbeat request sent by the client.
pub const PING: &str = "ping";

/// Event type of the heartbeat acknowledgement. Never reaches listeners.
pub const PONG: &str = "pong";

/// Control frames sent from the client to the event source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ClientFrame {
    Subscribe {
        #[serde(rename = "eventType")]
        event_type: String,
    },
    Unsubscribe {
        #[serde(rename = "eventType")]
        event_type: String,
    },
    Ping,
}

impl ClientFrame {
    pub fn to_json(&self) -> String {
        // Serializing a plain tagged enum of strings cannot fail.
        serde_json::to_string(self).unwrap_or_default()
    }
}

/// Severity attached to user-facing notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Success,
    /// Any severity string this client does not know about.
    #[serde(other)]
    Unknown,
}

/// A domain event pushed by the event source.
///
/// Constructed per frame and discarded after dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub data: Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entity: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tenant: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl InboundMessage {
    pub fn is_pong(&self) -> bool {
        self.event_type == PONG
    }
}

/// Parses one inbound text frame.
pub fn parse_frame(text: &str) -> Result<InboundMessage, FrameError> {
    Ok(serde_json::from_str(text)?)
}
