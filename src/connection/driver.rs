//! Connection driver.
//!
//! One tokio task per connection. It is the only owner of the socket, the
//! reply decoder, the command queue and the pub/sub state; callers reach it
//! through the admission block in [`Shared`] and the control channel.

use std::io;
use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use crate::command::Command;
use crate::connection::handshake::{handshake, ServerInfo};
use crate::connection::state::{ConnectionEvent, ConnectionState, Shared};
use crate::connection::transport::Transport;
use crate::error::{RedisError, Result};
use crate::monitor::MonitorEvent;
use crate::pubsub::{classify, PubSubPush, PubSubState, Reply, SubscriptionAck, SubscriptionKind};
use crate::queue::CommandQueue;
use crate::resp::decoder::ReplyDecoder;
use crate::resp::types::RespValue;
use crate::retry::{ReconnectPolicy, RetryDecision};

const READ_CAPACITY: usize = 64 * 1024;

/// Requests from [`Client`](crate::client::Client) handles.
#[derive(Debug)]
pub(crate) enum Control {
    Close { force: bool },
}

/// Why a connection cycle ended.
enum Exit {
    /// Socket lost; reconnect if allowed.
    Lost(RedisError),
    /// Unrecoverable; close.
    Fatal(RedisError),
    /// Closed on request.
    Closed,
}

enum Step {
    Close { force: bool },
    Read(io::Result<usize>),
    Write(Command),
}

/// `None` means every handle is gone.
fn close_request(ctl: Option<Control>) -> bool {
    match ctl {
        Some(Control::Close { force }) => force,
        None => true,
    }
}

fn eof() -> RedisError {
    RedisError::Transport(io::Error::new(
        io::ErrorKind::UnexpectedEof,
        "connection closed by server",
    ))
}

type RestorePlan = Vec<(SubscriptionKind, Vec<Bytes>)>;

fn merge_restore(plan: &mut RestorePlan, kind: SubscriptionKind, names: &[Bytes]) {
    match plan.iter_mut().find(|(k, _)| *k == kind) {
        Some((_, existing)) => {
            for name in names {
                if !existing.contains(name) {
                    existing.push(name.clone());
                }
            }
        }
        None => plan.push((kind, names.to_vec())),
    }
}

/// Drop from `plan` what offline (p)unsubscribes are about to remove, so the
/// replay does not resubscribe it behind their back. An argument-less one
/// clears its whole namespace.
fn prune_restore(plan: &mut RestorePlan, offline: &[Command]) {
    for cmd in offline {
        let Some(kind) = cmd.subscription_kind().filter(|k| k.is_unsubscribe()) else {
            continue;
        };
        let target = kind.subscribing();
        if cmd.args().is_empty() {
            plan.retain(|(k, _)| *k != target);
        } else {
            for (_, names) in plan.iter_mut().filter(|(k, _)| *k == target) {
                names.retain(|name| !cmd.args().contains(name));
            }
        }
    }
    plan.retain(|(_, names)| !names.is_empty());
}

fn is_monitor(cmd: &Command) -> bool {
    cmd.name().eq_ignore_ascii_case("MONITOR")
}

/// Open the transport and run the handshake.
async fn establish(
    shared: &Shared,
    decoder: &mut dyn ReplyDecoder,
) -> Result<(Transport, Option<ServerInfo>)> {
    let config = &shared.config;
    let mut transport = Transport::connect(config).await?;
    shared.transition(ConnectionState::Connected);
    shared.emit(ConnectionEvent::Connect);
    debug!(addr = %config.display_addr(), nodelay = transport.nodelay(), "transport open");

    decoder.reset();
    let info = handshake(&mut transport, decoder, config).await?;
    Ok((transport, info))
}

pub(crate) struct Driver {
    shared: Arc<Shared>,
    commands: mpsc::UnboundedReceiver<Command>,
    control: mpsc::UnboundedReceiver<Control>,
    decoder: Box<dyn ReplyDecoder>,
    policy: ReconnectPolicy,
    queue: CommandQueue,
    pubsub: PubSubState,
    /// Subscriptions to re-establish on the next connection.
    restore: RestorePlan,
    /// MONITOR acknowledged on the current socket.
    monitoring: bool,
    /// Re-issue MONITOR on the next connection.
    restore_monitor: bool,
    write_buf: BytesMut,
}

impl Driver {
    pub(crate) fn new(
        shared: Arc<Shared>,
        commands: mpsc::UnboundedReceiver<Command>,
        control: mpsc::UnboundedReceiver<Control>,
        decoder: Box<dyn ReplyDecoder>,
    ) -> Self {
        let policy = ReconnectPolicy::new(shared.config.retry.clone());
        Self {
            shared,
            commands,
            control,
            decoder,
            policy,
            queue: CommandQueue::new(),
            pubsub: PubSubState::new(),
            restore: Vec::new(),
            monitoring: false,
            restore_monitor: false,
            write_buf: BytesMut::new(),
        }
    }

    /// Connect, serve, reconnect, until closed.
    pub(crate) async fn run(mut self) {
        loop {
            self.shared.transition(ConnectionState::Connecting);
            self.policy.record_attempt();
            debug!(
                addr = %self.shared.config.display_addr(),
                attempt = self.policy.attempts(),
                "connecting"
            );

            let attempt = tokio::select! {
                biased;
                ctl = self.control.recv() => Err(close_request(ctl)),
                res = establish(&self.shared, self.decoder.as_mut()) => Ok(res),
            };

            let exit = match attempt {
                Err(force) => {
                    self.close_disconnected(force);
                    return;
                }
                Ok(Ok((transport, info))) => self.serve(transport, info).await,
                Ok(Err(e)) if e.is_retryable() => Exit::Lost(e),
                Ok(Err(e)) => Exit::Fatal(e),
            };

            match exit {
                Exit::Closed => return,
                Exit::Fatal(e) => {
                    self.fail(e);
                    return;
                }
                Exit::Lost(e) => {
                    if !self.reconnect_after(e).await {
                        return;
                    }
                }
            }
        }
    }

    // ── Connected ──────────────────────────────────────────────────

    async fn serve(&mut self, mut transport: Transport, info: Option<ServerInfo>) -> Exit {
        self.shared.set_server_info(info);
        self.policy.reset();

        // Offline commands first, then the subscriptions to restore.
        let mut batch = self.shared.go_ready();
        let replayed = batch.len();
        let mut restore = std::mem::take(&mut self.restore);
        prune_restore(&mut restore, &batch);
        for (kind, names) in restore {
            debug!(kind = kind.as_str(), count = names.len(), "restoring subscriptions");
            batch.push(Command::internal(kind.command_name(), names));
        }
        if std::mem::take(&mut self.restore_monitor) {
            debug!("restoring monitor mode");
            batch.push(Command::internal("MONITOR", Vec::<Bytes>::new()));
        }
        info!(addr = %self.shared.config.display_addr(), replayed, "connection ready");
        self.shared.emit(ConnectionEvent::Ready);

        if !batch.is_empty() {
            if let Err(e) = self.write(&mut transport, batch).await {
                return Exit::Lost(e);
            }
        }

        let mut read_buf = BytesMut::with_capacity(READ_CAPACITY);
        loop {
            let step = tokio::select! {
                biased;
                ctl = self.control.recv() => Step::Close { force: close_request(ctl) },
                read = transport.read_buf(&mut read_buf) => Step::Read(read),
                Some(cmd) = self.commands.recv() => Step::Write(cmd),
            };

            match step {
                Step::Close { force } => {
                    self.close_connected(transport, force).await;
                    return Exit::Closed;
                }
                Step::Read(Ok(0)) => return Exit::Lost(eof()),
                Step::Read(Ok(_)) => {
                    let result = self.on_data(&read_buf);
                    read_buf.clear();
                    if let Err(e) = result {
                        return Exit::Fatal(e);
                    }
                }
                Step::Read(Err(e)) => return Exit::Lost(e.into()),
                Step::Write(cmd) => {
                    let mut batch = vec![cmd];
                    while let Ok(cmd) = self.commands.try_recv() {
                        batch.push(cmd);
                    }
                    if let Err(e) = self.write(&mut transport, batch).await {
                        return Exit::Lost(e);
                    }
                }
            }
        }
    }

    /// Write a batch in one syscall. Commands join the queue before the
    /// write so a failed write fails them as in-flight.
    async fn write(&mut self, transport: &mut Transport, batch: Vec<Command>) -> Result<()> {
        self.write_buf.clear();
        let count = batch.len();
        for cmd in batch {
            cmd.encode_into(&mut self.write_buf);
            if let Some(kind) = cmd.subscription_kind() {
                self.pubsub.command_sent(kind, cmd.expected_acks());
            }
            self.queue.push(cmd);
        }
        trace!(commands = count, bytes = self.write_buf.len(), "write");
        transport.write_all(&self.write_buf).await?;
        Ok(())
    }

    /// Feed socket bytes and dispatch every complete reply.
    fn on_data(&mut self, data: &[u8]) -> Result<()> {
        for (value, _) in self.decoder.feed(data)? {
            self.dispatch(value)?;
        }
        Ok(())
    }

    fn dispatch(&mut self, value: RespValue) -> Result<()> {
        let expecting_ack = self
            .queue
            .front()
            .and_then(Command::subscription_kind)
            .is_some();
        match classify(value, self.pubsub.is_subscriber(), expecting_ack) {
            Reply::Value(RespValue::SimpleString(line)) if self.monitoring => {
                match MonitorEvent::parse(&line) {
                    Some(event) => {
                        trace!(args = ?event.args, "monitor");
                        self.shared.emit(ConnectionEvent::Monitor(event));
                        Ok(())
                    }
                    None => self.resolve_head(Ok(RespValue::SimpleString(line))),
                }
            }
            Reply::Value(v) => self.resolve_head(Ok(v)),
            Reply::Error(msg) => self.resolve_head(Err(RedisError::server(msg))),
            Reply::Push(PubSubPush::Message(msg)) => {
                trace!(channel = ?msg.channel, "message");
                self.shared.publish(msg);
                Ok(())
            }
            Reply::Push(PubSubPush::Ack(ack)) => {
                self.on_ack(ack);
                Ok(())
            }
        }
    }

    fn resolve_head(&mut self, result: Result<RespValue>) -> Result<()> {
        let cmd = self.queue.pop_front().ok_or_else(|| {
            RedisError::Protocol("reply received with no command awaiting it".into())
        })?;
        if let Some(kind) = cmd.subscription_kind() {
            self.pubsub.command_settled(kind, cmd.leftover_acks());
            self.sync_mode();
        }
        if is_monitor(&cmd) && result.is_ok() && !self.monitoring {
            info!("entered monitor mode");
            self.monitoring = true;
        }
        cmd.resolve(result);
        self.idle_check();
        Ok(())
    }

    fn on_ack(&mut self, ack: SubscriptionAck) {
        self.pubsub.apply_ack(&ack);
        self.shared.emit(ConnectionEvent::Subscription(ack.clone()));

        let head_kind = self.queue.front().and_then(Command::subscription_kind);
        if head_kind == Some(ack.kind) {
            let empty = self.pubsub.namespace_empty(ack.kind);
            let done = self
                .queue
                .front_mut()
                .is_some_and(|cmd| cmd.record_ack(&ack, empty));
            if done {
                if let Some(cmd) = self.queue.pop_front() {
                    self.pubsub.command_settled(ack.kind, cmd.leftover_acks());
                    cmd.complete_acks();
                }
                self.sync_mode();
                self.idle_check();
                return;
            }
        }
        self.sync_mode();
    }

    fn sync_mode(&mut self) {
        if self.shared.set_subscriber(self.pubsub.is_subscriber()) {
            info!("entered subscriber mode");
            self.shared.emit(ConnectionEvent::Subscriber);
        }
    }

    fn idle_check(&self) {
        if self.queue.is_empty() {
            self.shared.emit(ConnectionEvent::Idle);
        }
    }

    // ── Loss and reconnection ──────────────────────────────────────

    /// Keep what the server forgot: acknowledged subscriptions plus restore
    /// commands that were still in flight.
    fn remember_subscriptions(&mut self) {
        let mut plan = self.pubsub.connection_lost();
        for cmd in self.queue.iter().filter(|cmd| !cmd.has_waiter()) {
            if let Some(kind @ (SubscriptionKind::Subscribe | SubscriptionKind::PSubscribe)) =
                cmd.subscription_kind()
            {
                merge_restore(&mut plan, kind, cmd.args());
            }
        }
        if !plan.is_empty() {
            self.restore = plan;
        }
        let monitor_in_flight = self
            .queue
            .iter()
            .any(|cmd| !cmd.has_waiter() && is_monitor(cmd));
        self.restore_monitor |= std::mem::take(&mut self.monitoring) || monitor_in_flight;
    }

    /// Returns `false` once the driver should stop.
    async fn reconnect_after(&mut self, err: RedisError) -> bool {
        warn!(addr = %self.shared.config.display_addr(), error = %err, "connection lost");
        self.remember_subscriptions();
        let oldest = self.queue.front().map(|cmd| cmd.enqueued_at().elapsed());
        let broken = self
            .queue
            .flush_with(|| RedisError::ConnectionBroken(err.to_string()));
        if broken > 0 {
            warn!(failed = broken, ?oldest, "in-flight commands failed");
        }
        self.shared.emit(ConnectionEvent::Error(Arc::new(err.clone())));

        if !self.shared.config.reconnect {
            self.finish(Some(err));
            return false;
        }

        self.shared
            .go_offline(ConnectionState::Reconnecting, &mut self.commands);

        let delay = match self.policy.next_delay() {
            RetryDecision::Retry(delay) => delay,
            RetryDecision::Exhausted => {
                let attempts = self.policy.attempts();
                error!(attempts, "reconnection attempts exhausted");
                let e = RedisError::ReconnectExhausted { attempts };
                self.shared.emit(ConnectionEvent::Error(Arc::new(e.clone())));
                self.finish(Some(e));
                return false;
            }
        };

        let attempt = self.policy.attempts() + 1;
        info!(attempt, ?delay, "reconnecting");
        self.shared
            .emit(ConnectionEvent::Reconnecting { attempt, delay });

        let stop = tokio::select! {
            biased;
            ctl = self.control.recv() => Some(close_request(ctl)),
            _ = tokio::time::sleep(delay) => None,
        };
        match stop {
            Some(force) => {
                self.close_disconnected(force);
                false
            }
            None => true,
        }
    }

    /// Unrecoverable error: fail everything and close.
    fn fail(&mut self, err: RedisError) {
        error!(addr = %self.shared.config.display_addr(), error = %err, "connection failed");
        let failed = self.queue.flush_with(|| err.clone());
        if failed > 0 {
            warn!(failed, "in-flight commands failed");
        }
        let event = Arc::new(err.clone());
        if matches!(err, RedisError::Protocol(_)) {
            self.shared.emit(ConnectionEvent::ProtocolError(event));
        } else {
            self.shared.emit(ConnectionEvent::Error(event));
        }
        self.finish(Some(err));
    }

    fn finish(&mut self, err: Option<RedisError>) {
        self.restore.clear();
        self.restore_monitor = false;
        self.monitoring = false;
        self.shared.finish(&mut self.commands, err);
        self.shared.emit(ConnectionEvent::End);
        info!(addr = %self.shared.config.display_addr(), "connection closed");
    }

    // ── Close ──────────────────────────────────────────────────────

    /// Close requested while no socket is usable.
    fn close_disconnected(&mut self, force: bool) {
        debug!(force, "close while disconnected");
        for cmd in self.shared.begin_close(&mut self.commands) {
            cmd.resolve(Err(RedisError::Closed));
        }
        self.finish(None);
    }

    /// Close requested on a live socket. Graceful: write what was admitted,
    /// then QUIT, and wait for the replies. Force: fail everything now.
    async fn close_connected(&mut self, mut transport: Transport, force: bool) {
        let unwritten = self.shared.begin_close(&mut self.commands);
        if force {
            let mut failed = unwritten.len();
            for cmd in unwritten {
                cmd.resolve(Err(RedisError::Closed));
            }
            failed += self.queue.flush_with(|| RedisError::Closed);
            debug!(failed, "force close");
        } else {
            let mut batch = unwritten;
            batch.push(Command::internal("QUIT", Vec::<Bytes>::new()));
            let timeout = self.shared.config.close_timeout();
            let drained = match self.write(&mut transport, batch).await {
                Ok(()) => match timeout {
                    Some(limit) => tokio::time::timeout(limit, self.drain(&mut transport))
                        .await
                        .unwrap_or_else(|_| {
                            Err(RedisError::Timeout(format!(
                                "graceful close did not finish within {limit:?}"
                            )))
                        }),
                    None => self.drain(&mut transport).await,
                },
                Err(e) => Err(RedisError::ConnectionBroken(e.to_string())),
            };
            if let Err(e) = drained {
                let failed = self.queue.flush_with(|| e.clone());
                warn!(failed, error = %e, "graceful close cut short");
            }
        }
        let _ = transport.shutdown().await;
        self.finish(None);
    }

    /// Read until every written command has its reply.
    async fn drain(&mut self, transport: &mut Transport) -> Result<()> {
        let mut buf = BytesMut::with_capacity(READ_CAPACITY);
        while !self.queue.is_empty() {
            buf.clear();
            if transport.read_buf(&mut buf).await? == 0 {
                return Err(RedisError::ConnectionBroken(
                    "connection closed before close completed".into(),
                ));
            }
            self.on_data(&buf)?;
        }
        Ok(())
    }
}

// ── Tests ──────────────────────────────────────────────────────────
