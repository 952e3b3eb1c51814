//! Caller-facing client handle.
//!
//! A [`Client`] is a cheap, cloneable handle to one connection. Every clone
//! talks to the same background driver task; commands from all clones are
//! written in the order they were admitted.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, watch};

use crate::command::{Command, Pending};
use crate::config::ConnectionConfig;
use crate::connection::driver::{Control, Driver};
use crate::connection::handshake::ServerInfo;
use crate::connection::state::{ConnectionEvent, ConnectionState, Shared};
use crate::error::{RedisError, Result};
use crate::pubsub::{PubSubMessage, SubscriptionAck, SubscriptionKind};
use crate::resp::decoder::{ReplyDecoder, RespDecoder};
use crate::resp::types::RespValue;

// ── Client ─────────────────────────────────────────────────────────

/// Handle to a single Redis connection.
///
/// `send` never waits on the network: it returns a [`Pending`] that
/// resolves when the reply arrives or the command fails.
#[derive(Clone)]
pub struct Client {
    shared: Arc<Shared>,
    control: mpsc::UnboundedSender<Control>,
}

impl Client {
    /// Create a client and start connecting in the background.
    ///
    /// Must be called from within a tokio runtime.
    pub fn new(config: ConnectionConfig) -> Self {
        let decoder = Box::new(RespDecoder::with_max_buf(config.max_buffer_size));
        Self::with_decoder(config, decoder)
    }

    /// Like [`Client::new`], with a custom reply decoder.
    pub fn with_decoder(config: ConnectionConfig, decoder: Box<dyn ReplyDecoder>) -> Self {
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let shared = Arc::new(Shared::new(config, commands_tx));
        let driver = Driver::new(shared.clone(), commands_rx, control_rx, decoder);
        tokio::spawn(driver.run());
        Self {
            shared,
            control: control_tx,
        }
    }

    /// Create a client and wait until it is ready.
    pub async fn connect(config: ConnectionConfig) -> Result<Self> {
        let client = Self::new(config);
        client.wait_ready().await?;
        Ok(client)
    }

    /// Issue a command.
    ///
    /// Fails immediately with [`RedisError::QueueRejected`] when the
    /// connection is not ready and cannot buffer the command, or with
    /// [`RedisError::Closed`] once closing.
    pub fn send<I, A>(&self, name: &str, args: I) -> Result<Pending>
    where
        I: IntoIterator<Item = A>,
        A: AsRef<[u8]>,
    {
        let (cmd, rx) = Command::new(name, args);
        self.shared.admit(cmd)?;
        Ok(Pending::new(rx))
    }

    /// Issue a command and wait for its reply. Error replies become
    /// [`RedisError::Server`].
    pub async fn execute<I, A>(&self, name: &str, args: I) -> Result<RespValue>
    where
        I: IntoIterator<Item = A>,
        A: AsRef<[u8]>,
    {
        self.send(name, args)?.await
    }

    // ── Pub/sub ────────────────────────────────────────────────────

    /// Subscribe to channels. Resolves with one ack per channel.
    pub fn subscribe<I, A>(&self, channels: I) -> Result<Pending<Vec<SubscriptionAck>>>
    where
        I: IntoIterator<Item = A>,
        A: AsRef<[u8]>,
    {
        self.send_subscription(SubscriptionKind::Subscribe, channels)
    }

    /// Unsubscribe from channels; none means all of them.
    pub fn unsubscribe<I, A>(&self, channels: I) -> Result<Pending<Vec<SubscriptionAck>>>
    where
        I: IntoIterator<Item = A>,
        A: AsRef<[u8]>,
    {
        self.send_subscription(SubscriptionKind::Unsubscribe, channels)
    }

    /// Subscribe to patterns.
    pub fn psubscribe<I, A>(&self, patterns: I) -> Result<Pending<Vec<SubscriptionAck>>>
    where
        I: IntoIterator<Item = A>,
        A: AsRef<[u8]>,
    {
        self.send_subscription(SubscriptionKind::PSubscribe, patterns)
    }

    /// Unsubscribe from patterns; none means all of them.
    pub fn punsubscribe<I, A>(&self, patterns: I) -> Result<Pending<Vec<SubscriptionAck>>>
    where
        I: IntoIterator<Item = A>,
        A: AsRef<[u8]>,
    {
        self.send_subscription(SubscriptionKind::PUnsubscribe, patterns)
    }

    fn send_subscription<I, A>(
        &self,
        kind: SubscriptionKind,
        names: I,
    ) -> Result<Pending<Vec<SubscriptionAck>>>
    where
        I: IntoIterator<Item = A>,
        A: AsRef<[u8]>,
    {
        let (cmd, rx) = Command::new(kind.command_name(), names);
        self.shared.admit(cmd)?;
        Ok(Pending::with_map(rx, acks_from_reply))
    }

    /// Enter MONITOR mode. Observed commands arrive as
    /// [`ConnectionEvent::Monitor`]; the mode is restored after a reconnect.
    pub fn monitor(&self) -> Result<Pending> {
        self.send("MONITOR", Vec::<&[u8]>::new())
    }

    /// Published messages (both channel and pattern deliveries).
    pub fn messages(&self) -> broadcast::Receiver<PubSubMessage> {
        self.shared.messages()
    }

    // ── State ──────────────────────────────────────────────────────

    /// Connection lifecycle notifications.
    pub fn events(&self) -> broadcast::Receiver<ConnectionEvent> {
        self.shared.events()
    }

    pub fn state(&self) -> ConnectionState {
        self.shared.state()
    }

    pub fn state_changes(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_changes()
    }

    /// Wait until the connection is usable. Fails if it closes first.
    pub async fn wait_ready(&self) -> Result<()> {
        let mut rx = self.shared.state_changes();
        let state = match rx.wait_for(|s| s.is_connected() || s.is_closed()).await {
            Ok(state) => *state,
            Err(_) => ConnectionState::Closed,
        };
        if state.is_connected() {
            Ok(())
        } else {
            Err(self.shared.terminal_error().unwrap_or(RedisError::Closed))
        }
    }

    /// Metadata from the last successful readiness probe.
    pub fn server_info(&self) -> Option<ServerInfo> {
        self.shared.server_info()
    }

    /// Commands waiting for a connection.
    pub fn offline_queue_len(&self) -> usize {
        self.shared.offline_queue_len()
    }

    /// Close the connection and wait until it is closed.
    ///
    /// Graceful (`force = false`): commands already admitted are written,
    /// `QUIT` follows, and replies are awaited up to the configured close
    /// timeout. Forceful: every pending command fails with
    /// [`RedisError::Closed`] immediately.
    pub async fn close(&self, force: bool) {
        let mut rx = self.shared.state_changes();
        if self.control.send(Control::Close { force }).is_err() {
            return;
        }
        let _ = rx.wait_for(|s| s.is_closed()).await;
    }
}

fn acks_from_reply(value: RespValue) -> Result<Vec<SubscriptionAck>> {
    SubscriptionAck::list_from_value(value)
        .ok_or_else(|| RedisError::Protocol("unexpected subscription reply".into()))
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("addr", &self.shared.config.display_addr())
            .field("state", &self.state())
            .finish()
    }
}
