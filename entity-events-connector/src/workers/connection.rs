use super::{Command, ConnectionManager};
use crate::{
    endpoint::{self, Credentials},
    error::{ConnectError, TransportError},
    events::ClientFrame,
    status::{ConnectionEvent, ConnectionState, ReadyState},
    transport::{CloseInfo, Transport, TransportConnection, TransportEvent, NORMAL_CLOSURE},
};
use chrono::Utc;
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::oneshot,
    time::{self, Instant, MissedTickBehavior},
};
use url::Url;

type ConnectReply = oneshot::Sender<Result<(), ConnectError>>;

/// Where the connection task currently is.
enum Phase {
    /// No connection and nothing scheduled.
    Idle,
    Open(Box<dyn TransportConnection>),
    /// Waiting out a backoff delay before the next reconnect attempt.
    Backoff(Duration),
    Stopped,
}

enum OpenOutcome {
    Opened(Box<dyn TransportConnection>),
    Failed(TransportError),
    /// `disconnect()` arrived while the open was in flight.
    Aborted(oneshot::Sender<()>),
    Stopped,
}

impl ConnectionManager {
    /// Runs the connection task until [`ConnectionHandle::shutdown`](super::ConnectionHandle::shutdown)
    /// is called or every handle is dropped.
    pub async fn run(mut self) -> anyhow::Result<()> {
        tracing::info!("Connection manager started");
        let mut phase = Phase::Idle;
        loop {
            phase = match phase {
                Phase::Idle => self.idle().await,
                Phase::Open(connection) => self.serve(connection).await,
                Phase::Backoff(delay) => self.backoff(delay).await,
                Phase::Stopped => break,
            };
        }
        self.registry.clear();
        self.set_state(ConnectionState::Disconnected, ReadyState::Closed);
        tracing::info!("Connection manager has shut down");
        Ok(())
    }

    async fn idle(&mut self) -> Phase {
        loop {
            tokio::select! {
                command = self.command_rx.recv() => match command {
                    Some(Command::Connect { credentials, reply }) => {
                        return self.connect(credentials, reply).await;
                    }
                    Some(Command::Disconnect { reply }) => {
                        self.set_state(ConnectionState::Disconnected, ReadyState::Closed);
                        let _ = reply.send(());
                    }
                    Some(Command::Shutdown) | None => return Phase::Stopped,
                },
                Some(frame) = self.outbound_rx.recv() => discard(frame),
            }
        }
    }

    /// Handles an explicit `connect()`.
    async fn connect(&mut self, credentials: Credentials, reply: ConnectReply) -> Phase {
        let url = match endpoint::build_url(&self.config.endpoint, &credentials) {
            Ok(url) => url,
            Err(e) => {
                tracing::error!("Cannot connect: {}", e);
                self.set_state(ConnectionState::Disconnected, ReadyState::Closed);
                let _ = reply.send(Err(e));
                return Phase::Idle;
            }
        };

        self.url = Some(url.clone());
        self.set_state(ConnectionState::Connecting, ReadyState::Connecting);

        let mut waiters = vec![reply];
        match self.open_interruptible(url, &mut waiters).await {
            OpenOutcome::Opened(mut connection) => {
                self.on_open(connection.as_mut()).await;
                answer(waiters, Ok(()));
                Phase::Open(connection)
            }
            OpenOutcome::Failed(e) => {
                tracing::warn!("Connect failed: {}", e);
                self.emit(ConnectionEvent::Error {
                    message: e.to_string(),
                });
                self.set_state(ConnectionState::Disconnected, ReadyState::Closed);
                answer(waiters, Err(e.into()));
                Phase::Idle
            }
            OpenOutcome::Aborted(ack) => {
                self.set_state(ConnectionState::Disconnected, ReadyState::Closed);
                answer(waiters, Err(ConnectError::Aborted));
                let _ = ack.send(());
                Phase::Idle
            }
            OpenOutcome::Stopped => {
                answer(waiters, Err(ConnectError::ManagerStopped));
                Phase::Stopped
            }
        }
    }

    /// Opens the transport while still answering commands. Further `connect()`
    /// calls join `waiters` instead of starting another open.
    async fn open_interruptible(&mut self, url: Url, waiters: &mut Vec<ConnectReply>) -> OpenOutcome {
        let open = open_transport(self.transport.clone(), url);
        tokio::pin!(open);

        loop {
            tokio::select! {
                result = &mut open => {
                    return match result {
                        Ok(connection) => OpenOutcome::Opened(connection),
                        Err(e) => OpenOutcome::Failed(e),
                    };
                }
                command = self.command_rx.recv() => match command {
                    Some(Command::Connect { reply, .. }) => {
                        tracing::debug!("Connect requested while connecting; joining the attempt in flight");
                        waiters.push(reply);
                    }
                    Some(Command::Disconnect { reply }) => return OpenOutcome::Aborted(reply),
                    Some(Command::Shutdown) | None => return OpenOutcome::Stopped,
                },
                Some(frame) = self.outbound_rx.recv() => discard(frame),
            }
        }
    }

    /// Bookkeeping for a freshly opened connection: reset the retry counter and
    /// replay every tracked subscription.
    async fn on_open(&mut self, connection: &mut dyn TransportConnection) {
        self.attempts = 0;
        self.status_tx.send_modify(|status| {
            status.reconnect_attempts = 0;
        });
        self.set_state(ConnectionState::Connected, ReadyState::Open);
        tracing::info!("Connected to event source");
        self.emit(ConnectionEvent::Connected);

        let outbound_rx = &mut self.outbound_rx;
        let event_types = self.registry.resync(|| {
            while let Ok(frame) = outbound_rx.try_recv() {
                discard(frame);
            }
        });
        self.resubscribe_all(connection, event_types).await;
    }

    async fn resubscribe_all(&self, connection: &mut dyn TransportConnection, event_types: Vec<String>) {
        if event_types.is_empty() {
            return;
        }
        tracing::info!("Re-subscribing {} event type(s)", event_types.len());
        for event_type in event_types {
            let frame = ClientFrame::Subscribe { event_type };
            if let Err(e) = connection.send(frame.to_json()).await {
                tracing::warn!("Failed to re-subscribe: {}", e);
            }
        }
    }

    /// Drives an open connection until it closes or a command ends it.
    async fn serve(&mut self, mut connection: Box<dyn TransportConnection>) -> Phase {
        let period = self.config.heartbeat.interval();
        let mut heartbeat = time::interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                event = connection.recv() => match event {
                    TransportEvent::Text(text) => {
                        self.dispatcher.handle_frame(&text);
                    }
                    TransportEvent::Error(message) => {
                        tracing::warn!("Transport error: {}", message);
                        self.emit(ConnectionEvent::Error { message });
                    }
                    TransportEvent::Closed(info) => return self.on_close(info),
                },
                Some(frame) = self.outbound_rx.recv() => {
                    if let Err(e) = connection.send(frame.to_json()).await {
                        tracing::warn!("Failed to send {:?}: {}", frame, e);
                    }
                }
                _ = heartbeat.tick() => {
                    match connection.send(ClientFrame::Ping.to_json()).await {
                        Ok(()) => {
                            let now = Utc::now();
                            self.status_tx.send_modify(|status| status.last_heartbeat = Some(now));
                        }
                        Err(e) => tracing::warn!("Heartbeat ping failed: {}", e),
                    }
                }
                command = self.command_rx.recv() => match command {
                    Some(Command::Connect { reply, .. }) => {
                        let _ = reply.send(Ok(()));
                    }
                    Some(Command::Disconnect { reply }) => {
                        self.close_cleanly(connection.as_mut(), "client disconnect").await;
                        let _ = reply.send(());
                        return Phase::Idle;
                    }
                    Some(Command::Shutdown) | None => {
                        self.close_cleanly(connection.as_mut(), "client shutdown").await;
                        return Phase::Stopped;
                    }
                },
            }
        }
    }

    async fn close_cleanly(&mut self, connection: &mut dyn TransportConnection, reason: &str) {
        self.set_state(self.state(), ReadyState::Closing);
        connection.close(NORMAL_CLOSURE, reason).await;
        self.set_state(ConnectionState::Disconnected, ReadyState::Closed);
        tracing::info!("Disconnected: {}", reason);
        self.emit(ConnectionEvent::Disconnected {
            code: NORMAL_CLOSURE,
            reason: reason.to_string(),
            was_clean: true,
        });
    }

    fn on_close(&mut self, info: CloseInfo) -> Phase {
        tracing::info!(
            code = info.code,
            was_clean = info.was_clean,
            "Connection closed: {}",
            info.reason
        );
        self.emit(ConnectionEvent::Disconnected {
            code: info.code,
            reason: info.reason.clone(),
            was_clean: info.was_clean,
        });

        if info.was_clean {
            self.set_state(ConnectionState::Disconnected, ReadyState::Closed);
            return Phase::Idle;
        }
        self.schedule_reconnect()
    }

    /// Called after every unclean close, including a failed reconnect attempt.
    fn schedule_reconnect(&mut self) -> Phase {
        if !self.policy.can_retry(self.attempts) {
            tracing::warn!(
                "Max reconnect attempts ({}) reached, giving up",
                self.policy.max_attempts
            );
            self.set_state(ConnectionState::Disconnected, ReadyState::Closed);
            self.emit(ConnectionEvent::MaxReconnectAttemptsReached {
                attempts: self.attempts,
            });
            return Phase::Idle;
        }

        self.attempts += 1;
        let attempt = self.attempts;
        let delay = self.policy.next_delay(attempt);
        self.status_tx.send_modify(|status| status.reconnect_attempts = attempt);
        self.set_state(ConnectionState::Reconnecting, ReadyState::Closed);
        tracing::info!(
            "Attempting reconnection in {}ms (attempt {}/{})",
            delay.as_millis(),
            attempt,
            self.policy.max_attempts
        );
        self.emit(ConnectionEvent::Reconnecting { attempt, delay });
        Phase::Backoff(delay)
    }

    /// Waits out the backoff delay, then makes one reconnect attempt.
    async fn backoff(&mut self, delay: Duration) -> Phase {
        let sleep = time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = &mut sleep => break,
                command = self.command_rx.recv() => match command {
                    // An explicit connect cancels the pending retry and tries now.
                    Some(Command::Connect { credentials, reply }) => {
                        return self.connect(credentials, reply).await;
                    }
                    Some(Command::Disconnect { reply }) => {
                        self.set_state(ConnectionState::Disconnected, ReadyState::Closed);
                        tracing::info!("Pending reconnect cancelled by disconnect");
                        let _ = reply.send(());
                        return Phase::Idle;
                    }
                    Some(Command::Shutdown) | None => return Phase::Stopped,
                },
                Some(frame) = self.outbound_rx.recv() => discard(frame),
            }
        }

        self.reconnect().await
    }

    async fn reconnect(&mut self) -> Phase {
        let Some(url) = self.url.clone() else {
            self.set_state(ConnectionState::Disconnected, ReadyState::Closed);
            return Phase::Idle;
        };
        self.set_state(ConnectionState::Reconnecting, ReadyState::Connecting);

        let mut waiters = Vec::new();
        match self.open_interruptible(url, &mut waiters).await {
            OpenOutcome::Opened(mut connection) => {
                tracing::info!("Reconnection successful");
                self.on_open(connection.as_mut()).await;
                answer(waiters, Ok(()));
                Phase::Open(connection)
            }
            OpenOutcome::Failed(e) => {
                tracing::warn!("Reconnection attempt {} failed: {}", self.attempts, e);
                self.emit(ConnectionEvent::Error {
                    message: e.to_string(),
                });
                answer(waiters, Err(e.into()));
                self.schedule_reconnect()
            }
            OpenOutcome::Aborted(ack) => {
                self.set_state(ConnectionState::Disconnected, ReadyState::Closed);
                answer(waiters, Err(ConnectError::Aborted));
                let _ = ack.send(());
                Phase::Idle
            }
            OpenOutcome::Stopped => {
                answer(waiters, Err(ConnectError::ManagerStopped));
                Phase::Stopped
            }
        }
    }

    fn state(&self) -> ConnectionState {
        self.status_tx.borrow().connection_state
    }

    fn set_state(&self, state: ConnectionState, ready_state: ReadyState) {
        self.status_tx.send_if_modified(|status| {
            let changed = status.connection_state != state || status.ready_state != ready_state;
            status.connection_state = state;
            status.ready_state = ready_state;
            status.is_connected = state == ConnectionState::Connected;
            changed
        });
    }

    fn emit(&self, event: ConnectionEvent) {
        // No receivers is fine.
        let _ = self.events_tx.send(event);
    }
}

async fn open_transport(
    transport: Arc<dyn Transport>,
    url: Url,
) -> Result<Box<dyn TransportConnection>, TransportError> {
    transport.open(&url).await
}

fn answer(waiters: Vec<ConnectReply>, result: Result<(), ConnectError>) {
    for waiter in waiters {
        let _ = waiter.send(result.clone());
    }
}

fn discard(frame: ClientFrame) {
    tracing::debug!("Not connected, discarding {:?}", frame);
}
