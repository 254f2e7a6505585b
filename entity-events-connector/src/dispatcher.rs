//! # Message Dispatcher
//!
//! Turns raw inbound frames into listener invocations.
//!
//! Malformed frames are logged and dropped. Heartbeat acknowledgements (`pong`)
//! are consumed here and never reach a listener, wildcard listeners included.
//! Every other message goes to the listeners of its event type and then to the
//! wildcard listeners. Each invocation runs behind its own panic boundary, so a
//! failing listener cannot stop the remaining ones or take down the connection.

use crate::{
    events::{parse_frame, InboundMessage},
    registry::SubscriptionRegistry,
};
use std::{
    any::Any,
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
};

/// What happened to one inbound frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The frame was not valid JSON or lacked a `type`.
    Dropped,
    /// A `pong` heartbeat acknowledgement.
    Heartbeat,
    Dispatched { delivered: usize, failed: usize },
}

#[derive(Debug, Clone)]
pub struct MessageDispatcher {
    registry: Arc<SubscriptionRegistry>,
}

impl MessageDispatcher {
    pub fn new(registry: Arc<SubscriptionRegistry>) -> Self {
        Self { registry }
    }

    /// Parses and routes one text frame.
    pub fn handle_frame(&self, text: &str) -> DispatchOutcome {
        match parse_frame(text) {
            Ok(message) => self.dispatch(&message),
            Err(e) => {
                tracing::warn!("Dropping inbound frame: {}", e);
                DispatchOutcome::Dropped
            }
        }
    }

    /// Routes an already parsed message.
    pub fn dispatch(&self, message: &InboundMessage) -> DispatchOutcome {
        if message.is_pong() {
            tracing::trace!("Heartbeat acknowledged");
            return DispatchOutcome::Heartbeat;
        }

        let mut delivered = 0;
        let mut failed = 0;
        for listener in self.registry.snapshot(&message.event_type) {
            // Unsubscribed after the snapshot was taken.
            if !listener.is_active() {
                continue;
            }
            let callback = listener.callback();
            match catch_unwind(AssertUnwindSafe(|| callback(&message.data, message))) {
                Ok(()) => delivered += 1,
                Err(panic) => {
                    failed += 1;
                    tracing::error!(
                        event_type = %message.event_type,
                        "Listener panicked: {}",
                        panic_message(panic.as_ref())
                    );
                }
            }
        }

        if delivered == 0 && failed == 0 {
            tracing::trace!("No listeners for '{}'", message.event_type);
        }
        DispatchOutcome::Dispatched { delivered, failed }
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
