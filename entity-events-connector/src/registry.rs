//! # Subscription Registry
//!
//! Maps event types to the listeners interested in them and keeps the remote side
//! in step: a `subscribe` control frame goes out when the first listener for an
//! event type arrives and an `unsubscribe` frame when the last one leaves.
//!
//! Control frames go on an unbounded queue to the connection task, which sends
//! them if the transport is open and discards them otherwise. The set of event
//! types held here is what the connection task replays after every successful
//! (re)connect, so the remote side is reconciled even when frames were discarded
//! while offline.

use crate::events::{ClientFrame, InboundMessage, WILDCARD};
use dashmap::{mapref::entry::Entry, DashMap};
use serde_json::Value;
use std::{
    fmt,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, PoisonError, RwLock, RwLockReadGuard, Weak,
    },
};
use tokio::sync::mpsc;

/// A listener callback. Receives the message payload and the full message.
pub type Listener = Arc<dyn Fn(&Value, &InboundMessage) + Send + Sync>;

/// Identifies one registered listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

#[derive(Clone)]
pub(crate) struct ListenerEntry {
    id: ListenerId,
    active: Arc<AtomicBool>,
    callback: Listener,
}

impl ListenerEntry {
    pub(crate) fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    pub(crate) fn callback(&self) -> &Listener {
        &self.callback
    }
}

pub struct SubscriptionRegistry {
    subscriptions: DashMap<String, Vec<ListenerEntry>>,
    next_id: AtomicU64,
    outbound: mpsc::UnboundedSender<ClientFrame>,
    /// Held shared while a listener change queues its control frame, and
    /// exclusively while the connection task takes its replay set.
    replay: RwLock<()>,
}

impl SubscriptionRegistry {
    pub(crate) fn new(outbound: mpsc::UnboundedSender<ClientFrame>) -> Self {
        Self {
            subscriptions: DashMap::new(),
            next_id: AtomicU64::new(1),
            outbound,
            replay: RwLock::new(()),
        }
    }

    /// Registers `callback` for `event_type`. Use [`WILDCARD`] to receive every message.
    ///
    /// The returned [`Subscription`] removes the listener when it is dropped or
    /// explicitly unsubscribed.
    pub fn subscribe<F>(self: &Arc<Self>, event_type: impl Into<String>, callback: F) -> Subscription
    where
        F: Fn(&Value, &InboundMessage) + Send + Sync + 'static,
    {
        let event_type = event_type.into();
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let entry = ListenerEntry {
            id,
            active: Arc::new(AtomicBool::new(true)),
            callback: Arc::new(callback),
        };

        let _replay = self.replay_guard();
        match self.subscriptions.entry(event_type.clone()) {
            Entry::Occupied(mut occupied) => {
                occupied.get_mut().push(entry);
                tracing::debug!("Added listener {:?} to existing subscription '{}'", id, event_type);
            }
            Entry::Vacant(vacant) => {
                // The frame is queued while the shard lock is held so a racing
                // unsubscribe for the same type cannot overtake it.
                let _guard = vacant.insert(vec![entry]);
                tracing::debug!("Created subscription '{}'", event_type);
                self.send_control(ClientFrame::Subscribe {
                    event_type: event_type.clone(),
                });
            }
        }

        Subscription {
            registry: Some(Arc::downgrade(self)),
            event_type,
            id,
        }
    }

    /// Removes one listener. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, event_type: &str, id: ListenerId) -> bool {
        let replay = self.replay_guard();
        let Entry::Occupied(mut occupied) = self.subscriptions.entry(event_type.to_string()) else {
            return false;
        };
        let Some(position) = occupied.get().iter().position(|entry| entry.id == id) else {
            return false;
        };

        let removed = occupied.get_mut().remove(position);
        removed.active.store(false, Ordering::Release);

        if occupied.get().is_empty() {
            self.send_control(ClientFrame::Unsubscribe {
                event_type: event_type.to_string(),
            });
            occupied.remove();
            tracing::debug!("Removed subscription '{}'", event_type);
        } else {
            drop(occupied);
        }
        drop(replay);
        // The callback may own other subscriptions; release it only after the
        // shard lock is gone.
        drop(removed);
        true
    }

    /// Copies the listeners that should see a message of `event_type`: the
    /// type's own listeners first, then the wildcard listeners.
    ///
    /// Dispatch iterates this copy, so listeners added or removed by a callback
    /// take effect from the next message on.
    pub(crate) fn snapshot(&self, event_type: &str) -> Vec<ListenerEntry> {
        let mut listeners = Vec::new();
        if event_type != WILDCARD {
            if let Some(entries) = self.subscriptions.get(event_type) {
                listeners.extend(entries.iter().cloned());
            }
        }
        if let Some(entries) = self.subscriptions.get(WILDCARD) {
            listeners.extend(entries.iter().cloned());
        }
        listeners
    }

    /// Every event type with at least one listener.
    pub fn event_types(&self) -> Vec<String> {
        self.subscriptions
            .iter()
            .map(|entry| entry.key().clone())
            .collect()
    }

    pub fn listener_count(&self, event_type: &str) -> usize {
        self.subscriptions
            .get(event_type)
            .map_or(0, |entries| entries.len())
    }

    pub fn is_empty(&self) -> bool {
        self.subscriptions.is_empty()
    }

    /// Drops every subscription without notifying the remote side.
    pub(crate) fn clear(&self) {
        let mut removed = Vec::new();
        for event_type in self.event_types() {
            if let Some((_, listeners)) = self.subscriptions.remove(&event_type) {
                for listener in &listeners {
                    listener.active.store(false, Ordering::Release);
                }
                removed.push(listeners);
            }
        }
        tracing::debug!("Subscription registry cleared");
        // Dropped with no shard locked, so owned `Subscription`s can unsubscribe.
        drop(removed);
    }

    /// Runs `drain` and then snapshots the tracked event types, with no
    /// subscribe or unsubscribe able to interleave.
    ///
    /// Frames queued before the call are superseded by the returned set; frames
    /// queued after it describe changes the set does not contain yet.
    pub(crate) fn resync(&self, drain: impl FnOnce()) -> Vec<String> {
        let _exclusive = self.replay.write().unwrap_or_else(PoisonError::into_inner);
        drain();
        self.event_types()
    }

    fn replay_guard(&self) -> RwLockReadGuard<'_, ()> {
        self.replay.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn send_control(&self, frame: ClientFrame) {
        if let Err(e) = self.outbound.send(frame) {
            tracing::debug!("Connection task gone, dropping {:?}", e.0);
        }
    }
}

impl fmt::Debug for SubscriptionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionRegistry")
            .field("event_types", &self.event_types())
            .finish()
    }
}

/// Keeps one listener registered. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes its listener immediately"]
pub struct Subscription {
    registry: Option<Weak<SubscriptionRegistry>>,
    event_type: String,
    id: ListenerId,
}

impl Subscription {
    pub fn event_type(&self) -> &str {
        &self.event_type
    }

    pub fn id(&self) -> ListenerId {
        self.id
    }

    /// Removes the listener. No dispatch that starts after this returns will call it.
    pub fn unsubscribe(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(registry) = self.registry.take().and_then(|weak| weak.upgrade()) {
            registry.unsubscribe(&self.event_type, self.id);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("event_type", &self.event_type)
            .field("id", &self.id)
            .finish()
    }
}
