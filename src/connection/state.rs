//! Connection state, events and the admission block shared between callers
//! and the driver task.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, info};

use crate::command::Command;
use crate::config::ConnectionConfig;
use crate::connection::handshake::ServerInfo;
use crate::error::{RedisError, Result};
use crate::monitor::MonitorEvent;
use crate::pubsub::{PubSubMessage, SubscriptionAck};
use crate::queue::OfflineQueue;

/// Lifecycle of one connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ConnectionState {
    Initial,
    Connecting,
    /// Transport is open, handshake in progress.
    Connected,
    Ready,
    /// Ready, with at least one subscription (or one pending).
    Subscriber,
    Reconnecting,
    Closing,
    Closed,
}

impl ConnectionState {
    /// Commands go straight to the socket.
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Ready | Self::Subscriber)
    }

    /// Commands may wait in the offline queue.
    pub fn accepts_offline(self) -> bool {
        matches!(
            self,
            Self::Initial | Self::Connecting | Self::Connected | Self::Reconnecting
        )
    }

    pub fn is_closed(self) -> bool {
        self == Self::Closed
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Initial => "initial",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Ready => "ready",
            Self::Subscriber => "subscriber",
            Self::Reconnecting => "reconnecting",
            Self::Closing => "closing",
            Self::Closed => "closed",
        };
        f.write_str(name)
    }
}

/// Notifications published by a connection.
#[derive(Debug, Clone)]
pub enum ConnectionEvent {
    /// Transport opened, handshake starting.
    Connect,
    /// Handshake done, offline queue flushed.
    Ready,
    /// First subscription acknowledged.
    Subscriber,
    /// A new attempt is scheduled after `delay`.
    Reconnecting { attempt: u32, delay: Duration },
    /// An (un)subscribe acknowledgement.
    Subscription(SubscriptionAck),
    /// Every written command has been answered.
    Idle,
    /// A command observed while in MONITOR mode.
    Monitor(MonitorEvent),
    /// Connection-level failure.
    Error(Arc<RedisError>),
    /// The reply stream could not be understood; the connection was closed.
    ProtocolError(Arc<RedisError>),
    /// The connection is closed for good.
    End,
}

/// State guarded together so that admitting a command and changing state
/// never interleave.
struct Admission {
    state: ConnectionState,
    offline: OfflineQueue,
    commands: mpsc::UnboundedSender<Command>,
}

/// Everything a [`Client`](crate::client::Client) and its driver share.
pub(crate) struct Shared {
    pub(crate) config: ConnectionConfig,
    admission: Mutex<Admission>,
    state_tx: watch::Sender<ConnectionState>,
    events: broadcast::Sender<ConnectionEvent>,
    messages: broadcast::Sender<PubSubMessage>,
    server_info: Mutex<Option<ServerInfo>>,
    terminal: Mutex<Option<RedisError>>,
}

impl Shared {
    pub(crate) fn new(config: ConnectionConfig, commands: mpsc::UnboundedSender<Command>) -> Self {
        let capacity = config.event_capacity.max(1);
        let (state_tx, _) = watch::channel(ConnectionState::Initial);
        let (events, _) = broadcast::channel(capacity);
        let (messages, _) = broadcast::channel(capacity);
        let offline = OfflineQueue::new(config.offline_queue_limit);
        Self {
            config,
            admission: Mutex::new(Admission {
                state: ConnectionState::Initial,
                offline,
                commands,
            }),
            state_tx,
            events,
            messages,
            server_info: Mutex::new(None),
            terminal: Mutex::new(None),
        }
    }

    // ── Caller side ────────────────────────────────────────────────

    /// Hand a command to the connection, or reject it.
    pub(crate) fn admit(&self, cmd: Command) -> Result<()> {
        let mut adm = self.admission.lock();
        match adm.state {
            s if s.is_connected() => adm.commands.send(cmd).map_err(|_| RedisError::Closed),
            ConnectionState::Closing | ConnectionState::Closed => Err(RedisError::Closed),
            _ if !self.config.enable_offline_queue => Err(RedisError::QueueRejected(
                "connection is not ready and the offline queue is disabled".into(),
            )),
            _ => adm.offline.push(cmd).map_err(|_| {
                RedisError::QueueRejected("offline queue is full".into())
            }),
        }
    }

    pub(crate) fn state(&self) -> ConnectionState {
        *self.state_tx.borrow()
    }

    pub(crate) fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.state_tx.subscribe()
    }

    pub(crate) fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.events.subscribe()
    }

    pub(crate) fn messages(&self) -> broadcast::Receiver<PubSubMessage> {
        self.messages.subscribe()
    }

    pub(crate) fn offline_queue_len(&self) -> usize {
        self.admission.lock().offline.len()
    }

    pub(crate) fn server_info(&self) -> Option<ServerInfo> {
        self.server_info.lock().clone()
    }

    /// Why the connection closed, when it did not close on request.
    pub(crate) fn terminal_error(&self) -> Option<RedisError> {
        self.terminal.lock().clone()
    }

    // ── Driver side ────────────────────────────────────────────────

    fn set_state(&self, adm: &mut Admission, next: ConnectionState) {
        if adm.state != next {
            debug!(from = %adm.state, to = %next, "connection state");
            adm.state = next;
            self.state_tx.send_replace(next);
        }
    }

    pub(crate) fn transition(&self, next: ConnectionState) {
        let mut adm = self.admission.lock();
        self.set_state(&mut adm, next);
    }

    /// Become ready and take the offline queue in one step, so nothing
    /// admitted afterwards can overtake it.
    pub(crate) fn go_ready(&self) -> Vec<Command> {
        let mut adm = self.admission.lock();
        let queued = adm.offline.take_all();
        self.set_state(&mut adm, ConnectionState::Ready);
        queued
    }

    /// Leave the connected states. Commands admitted to the old socket but
    /// never written go back to the offline queue ahead of anything newer.
    pub(crate) fn go_offline(
        &self,
        next: ConnectionState,
        unwritten: &mut mpsc::UnboundedReceiver<Command>,
    ) {
        let mut adm = self.admission.lock();
        self.set_state(&mut adm, next);
        let mut requeued = 0usize;
        while let Ok(cmd) = unwritten.try_recv() {
            if self.config.enable_offline_queue {
                adm.offline.push_admitted(cmd);
                requeued += 1;
            } else {
                cmd.resolve(Err(RedisError::QueueRejected(
                    "connection lost and the offline queue is disabled".into(),
                )));
            }
        }
        if requeued > 0 {
            debug!(requeued, "unwritten commands moved to the offline queue");
        }
    }

    /// Mirror the pub/sub mode into the state. Returns `true` when the
    /// connection just entered subscriber mode.
    pub(crate) fn set_subscriber(&self, subscriber: bool) -> bool {
        let mut adm = self.admission.lock();
        match (adm.state, subscriber) {
            (ConnectionState::Ready, true) => {
                self.set_state(&mut adm, ConnectionState::Subscriber);
                true
            }
            (ConnectionState::Subscriber, false) => {
                self.set_state(&mut adm, ConnectionState::Ready);
                false
            }
            _ => false,
        }
    }

    /// Stop admitting. Commands not yet written are returned; the offline
    /// queue is failed with `Closed`.
    pub(crate) fn begin_close(
        &self,
        unwritten: &mut mpsc::UnboundedReceiver<Command>,
    ) -> Vec<Command> {
        let mut adm = self.admission.lock();
        self.set_state(&mut adm, ConnectionState::Closing);
        let failed = adm.offline.flush_with(|| RedisError::Closed);
        if failed > 0 {
            debug!(failed, "offline queue failed on close");
        }
        let mut pending = Vec::new();
        while let Ok(cmd) = unwritten.try_recv() {
            pending.push(cmd);
        }
        pending
    }

    /// Final state. Anything still waiting to be written fails with `err`.
    pub(crate) fn finish(
        &self,
        unwritten: &mut mpsc::UnboundedReceiver<Command>,
        err: Option<RedisError>,
    ) {
        let mut adm = self.admission.lock();
        let reason = err.clone().unwrap_or(RedisError::Closed);
        let mut failed = adm.offline.flush_with(|| reason.clone());
        while let Ok(cmd) = unwritten.try_recv() {
            cmd.resolve(Err(reason.clone()));
            failed += 1;
        }
        if failed > 0 {
            info!(failed, error = %reason, "pending commands failed");
        }
        *self.terminal.lock() = err;
        self.set_state(&mut adm, ConnectionState::Closed);
    }

    pub(crate) fn set_server_info(&self, info: Option<ServerInfo>) {
        *self.server_info.lock() = info;
    }

    pub(crate) fn emit(&self, event: ConnectionEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    pub(crate) fn publish(&self, message: PubSubMessage) {
        let _ = self.messages.send(message);
    }
}

// ── Tests ──────────────────────────────────────────────────────────
