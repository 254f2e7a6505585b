use super::{BufferedUpdate, FeedShared, FeedState, Update, UpdateCallback, UpdatePolicy};
use crate::{dispatcher::panic_message, status::ConnectionStatus};
use std::{
    panic::{catch_unwind, AssertUnwindSafe},
    sync::Arc,
    time::Duration,
};
use tokio::{
    sync::{mpsc, watch},
    time::{self, Instant, MissedTickBehavior},
};

/// Stand-in deadline for timers that are not armed.
const FAR_FUTURE: Duration = Duration::from_secs(86_400 * 365);

pub(super) enum FeedInput {
    Update(BufferedUpdate),
    /// Deliver whatever is buffered right now.
    Flush,
}

/// Owns every timer of one feed: throttle, batch timeout and the polling fallback.
/// Aborting the task releases all of them.
pub(super) struct FeedWorker {
    policy: Arc<UpdatePolicy>,
    callback: UpdateCallback,
    shared: Arc<FeedShared>,
    inputs: mpsc::UnboundedReceiver<FeedInput>,
    status: watch::Receiver<ConnectionStatus>,
    buffer: Vec<BufferedUpdate>,
    batch_deadline: Option<Instant>,
    pending: Option<BufferedUpdate>,
    throttle_deadline: Option<Instant>,
}

impl FeedWorker {
    pub(super) fn new(
        policy: Arc<UpdatePolicy>,
        callback: UpdateCallback,
        shared: Arc<FeedShared>,
        inputs: mpsc::UnboundedReceiver<FeedInput>,
        status: watch::Receiver<ConnectionStatus>,
    ) -> Self {
        Self {
            policy,
            callback,
            shared,
            inputs,
            status,
            buffer: Vec::new(),
            batch_deadline: None,
            pending: None,
            throttle_deadline: None,
        }
    }

    pub(super) async fn run(mut self) {
        let period = self.policy.interval;
        let mut poll = time::interval_at(Instant::now() + period, period);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut status_open = self.policy.use_websocket;
        let mut was_polling = true;

        loop {
            let connected = status_open && self.status.borrow_and_update().is_connected;
            if connected {
                self.shared.promote(FeedState::Subscribing, FeedState::Active);
            }
            let polling = !connected;
            if polling && !was_polling {
                tracing::debug!("Connection unavailable, falling back to polling every {:?}", period);
                poll.reset();
            }
            was_polling = polling;

            let batch_at = self.batch_deadline.unwrap_or_else(|| Instant::now() + FAR_FUTURE);
            let throttle_at = self.throttle_deadline.unwrap_or_else(|| Instant::now() + FAR_FUTURE);

            tokio::select! {
                input = self.inputs.recv() => match input {
                    Some(FeedInput::Update(update)) => self.on_update(update),
                    Some(FeedInput::Flush) => self.flush_batch(),
                    None => break,
                },
                _ = time::sleep_until(batch_at), if self.batch_deadline.is_some() => self.flush_batch(),
                _ = time::sleep_until(throttle_at), if self.throttle_deadline.is_some() => self.deliver_pending(),
                _ = poll.tick(), if polling => self.deliver(Update::Poll),
                changed = self.status.changed(), if status_open => {
                    if changed.is_err() {
                        tracing::debug!("Connection manager gone; feed keeps polling");
                        status_open = false;
                    }
                }
            }
        }
    }

    fn on_update(&mut self, update: BufferedUpdate) {
        if self.policy.batch.enabled {
            self.buffer.push(update);
            if self.buffer.len() >= self.policy.batch.size {
                self.flush_batch();
            } else if self.batch_deadline.is_none() {
                self.batch_deadline = Some(Instant::now() + self.policy.batch.timeout);
            }
            return;
        }

        if !self.policy.throttle.is_zero() {
            // Last value wins; every update restarts the window.
            self.pending = Some(update);
            self.throttle_deadline = Some(Instant::now() + self.policy.throttle);
            return;
        }

        self.deliver(update.into_single());
    }

    fn flush_batch(&mut self) {
        self.batch_deadline = None;
        if self.buffer.is_empty() {
            return;
        }
        let items = std::mem::take(&mut self.buffer);
        tracing::trace!("Flushing batch of {} update(s)", items.len());
        self.deliver(Update::Batch(items));
    }

    fn deliver_pending(&mut self) {
        self.throttle_deadline = None;
        if let Some(update) = self.pending.take() {
            self.deliver(update.into_single());
        }
    }

    fn deliver(&self, update: Update) {
        self.shared.record_delivery();
        let callback = &self.callback;
        if let Err(panic) = catch_unwind(AssertUnwindSafe(|| callback(update))) {
            tracing::error!("Feed callback panicked: {}", panic_message(panic.as_ref()));
        }
    }
}
