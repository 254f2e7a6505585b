//! # Update Feeds
//!
//! An [`UpdateFeed`] is what a consumer attaches to receive refined updates. It sits
//! on top of the shared connection without changing it: it subscribes to its event
//! types through a [`ConnectionHandle`] and applies its own [`UpdatePolicy`]:
//!
//! - **Selective updates**: every filter entry must pass before an update goes further.
//! - **Batching**: buffer updates and deliver them as one `Update::Batch` when the
//!   buffer is full or the batch timeout has elapsed since the first buffered item.
//! - **Throttling**: debounce, delivering only the latest update once the window has
//!   been quiet.
//! - **Polling fallback**: while the connection is unavailable (or not used at all),
//!   the callback receives `Update::Poll` on a fixed interval.
//!
//! A feed moves `idle -> subscribing -> active` and back to `idle` when stopped or
//! dropped. Stopping drops its subscriptions and aborts its worker task, which owns
//! every timer; unflushed batch items and pending throttled updates are discarded.

mod policy;
mod worker;

pub use policy::{BatchPolicy, FilterPredicate, FilterRule, UpdatePolicy};

use crate::{
    error::FeedError,
    events::InboundMessage,
    registry::Subscription,
    status::ConnectionStatus,
    workers::ConnectionHandle,
};
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc, Mutex, MutexGuard, PoisonError,
};
use tokio::{sync::mpsc, task::JoinHandle};
use worker::{FeedInput, FeedWorker};

/// An update that passed the feed's filters, as it sat in a buffer.
#[derive(Debug, Clone, PartialEq)]
pub struct BufferedUpdate {
    pub data: Value,
    pub message: InboundMessage,
    pub received_at: DateTime<Utc>,
}

impl BufferedUpdate {
    fn into_single(self) -> Update {
        Update::Single {
            data: self.data,
            message: self.message,
        }
    }
}

/// What the consumer callback receives.
#[derive(Debug, Clone, PartialEq)]
pub enum Update {
    Single { data: Value, message: InboundMessage },
    Batch(Vec<BufferedUpdate>),
    /// Polling tick while the connection is unavailable. Carries no data.
    Poll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedState {
    Idle,
    /// Subscribed, waiting for the connection to come up.
    Subscribing,
    Active,
}

pub type UpdateCallback = Arc<dyn Fn(Update) + Send + Sync>;

/// State shared between a feed and its worker task.
#[derive(Debug)]
struct FeedShared {
    state: Mutex<FeedState>,
    update_count: AtomicU64,
    last_update: Mutex<Option<DateTime<Utc>>>,
}

impl FeedShared {
    fn state(&self) -> MutexGuard<'_, FeedState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: FeedState) {
        *self.state() = state;
    }

    /// Moves to `to` only if the feed is still in `from`.
    fn promote(&self, from: FeedState, to: FeedState) {
        let mut state = self.state();
        if *state == from {
            *state = to;
        }
    }

    fn record_delivery(&self) {
        self.update_count.fetch_add(1, Ordering::Relaxed);
        *self
            .last_update
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(Utc::now());
    }
}

/// Resources held while a feed is started. Dropping this releases all of them.
struct RunningFeed {
    subscriptions: Vec<Subscription>,
    worker: JoinHandle<()>,
    inputs: mpsc::UnboundedSender<FeedInput>,
}

impl Drop for RunningFeed {
    fn drop(&mut self) {
        self.subscriptions.clear();
        self.worker.abort();
    }
}

/// A consumer's refined view of the shared connection.
pub struct UpdateFeed {
    handle: ConnectionHandle,
    policy: Arc<UpdatePolicy>,
    callback: UpdateCallback,
    shared: Arc<FeedShared>,
    running: Option<RunningFeed>,
}

impl UpdateFeed {
    /// Validates `policy` and attaches a feed. The feed starts immediately unless
    /// `policy.enabled` is `false`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn attach<F>(handle: ConnectionHandle, policy: UpdatePolicy, callback: F) -> Result<Self, FeedError>
    where
        F: Fn(Update) + Send + Sync + 'static,
    {
        policy.validate()?;
        let mut feed = Self {
            handle,
            policy: Arc::new(policy),
            callback: Arc::new(callback),
            shared: Arc::new(FeedShared {
                state: Mutex::new(FeedState::Idle),
                update_count: AtomicU64::new(0),
                last_update: Mutex::new(None),
            }),
            running: None,
        };
        if feed.policy.enabled {
            feed.start();
        }
        Ok(feed)
    }

    /// Subscribes and starts the worker. Does nothing if already started.
    pub fn start(&mut self) {
        if self.running.is_some() {
            return;
        }

        let (inputs, inputs_rx) = mpsc::unbounded_channel();
        let mut subscriptions = Vec::new();

        if self.policy.use_websocket {
            self.shared.set_state(FeedState::Subscribing);
            for event_type in &self.policy.event_types {
                let policy = self.policy.clone();
                let inputs = inputs.clone();
                let subscription = self.handle.subscribe(event_type.clone(), move |data, message| {
                    if !policy.accepts(data, message) {
                        return;
                    }
                    let _ = inputs.send(FeedInput::Update(BufferedUpdate {
                        data: data.clone(),
                        message: message.clone(),
                        received_at: Utc::now(),
                    }));
                });
                subscriptions.push(subscription);
            }
            tracing::debug!("Feed subscribed to {:?}", self.policy.event_types);

            if self.policy.auto_connect && !self.handle.is_connected() {
                let handle = self.handle.clone();
                let credentials = self.policy.credentials.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle.connect(credentials).await {
                        tracing::warn!("Feed auto-connect failed: {}", e);
                    }
                });
            }
        } else {
            self.shared.set_state(FeedState::Active);
        }

        let worker = FeedWorker::new(
            self.policy.clone(),
            self.callback.clone(),
            self.shared.clone(),
            inputs_rx,
            self.handle.state_changes(),
        );
        self.running = Some(RunningFeed {
            subscriptions,
            worker: tokio::spawn(worker.run()),
            inputs,
        });
    }

    /// Unsubscribes and cancels every pending timer.
    pub fn stop(&mut self) {
        if self.running.take().is_some() {
            tracing::debug!("Feed stopped");
        }
        self.shared.set_state(FeedState::Idle);
    }

    pub fn toggle(&mut self) {
        if self.is_active() {
            self.stop();
        } else {
            self.start();
        }
    }

    pub fn is_active(&self) -> bool {
        self.running.is_some()
    }

    pub fn is_connected(&self) -> bool {
        self.handle.is_connected()
    }

    pub fn state(&self) -> FeedState {
        *self.shared.state()
    }

    /// Direct access to the shared connection's `subscribe`, outside this feed's policy.
    pub fn subscribe<F>(&self, event_type: impl Into<String>, callback: F) -> Subscription
    where
        F: Fn(&Value, &InboundMessage) + Send + Sync + 'static,
    {
        self.handle.subscribe(event_type, callback)
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.handle.status()
    }

    /// When the callback last received anything.
    pub fn last_update(&self) -> Option<DateTime<Utc>> {
        *self
            .shared
            .last_update
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// How many times the callback has been invoked.
    pub fn update_count(&self) -> u64 {
        self.shared.update_count.load(Ordering::Relaxed)
    }

    /// Flushes the batch buffer now instead of waiting for size or timeout.
    pub fn process_batch(&self) {
        if let Some(running) = &self.running {
            let _ = running.inputs.send(FeedInput::Flush);
        }
    }

    pub fn policy(&self) -> &UpdatePolicy {
        &self.policy
    }
}

impl Drop for UpdateFeed {
    fn drop(&mut self) {
        self.stop();
    }
}
