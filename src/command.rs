//! Commands and their completions.
//!
//! A [`Command`] is created when the caller issues a request and carries a
//! single-use completion slot. It is resolved exactly once: with its reply,
//! or with the error that ended its connection. [`Pending`] is the caller's
//! side of that slot.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use bytes::{Bytes, BytesMut};
use tokio::sync::oneshot;

use crate::error::{RedisError, Result};
use crate::pubsub::{SubscriptionAck, SubscriptionKind};
use crate::resp::types::RespValue;
use crate::resp::writer::encode_command_into;

type Completion = oneshot::Sender<Result<RespValue>>;

/// Reply handling class of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    /// One reply, popped in FIFO order.
    Regular,
    /// Answered by one push-shaped acknowledgement per name.
    PubSub(SubscriptionKind),
}

impl CommandKind {
    /// Classify by command name (case-insensitive).
    pub fn from_name(name: &str) -> Self {
        match SubscriptionKind::from_command(name) {
            Some(kind) => Self::PubSub(kind),
            None => Self::Regular,
        }
    }
}

/// A request on its way to (or waiting for a reply from) the server.
#[derive(Debug)]
pub struct Command {
    name: String,
    args: Vec<Bytes>,
    kind: CommandKind,
    enqueued_at: Instant,
    completion: Option<Completion>,
    /// Acks still expected; `None` for an argument-less unsubscribe, which
    /// runs until its namespace is empty.
    acks_remaining: Option<usize>,
    acks: Vec<RespValue>,
}

impl Command {
    /// Build a command together with the receiving side of its completion.
    pub fn new<I, A>(name: &str, args: I) -> (Self, oneshot::Receiver<Result<RespValue>>)
    where
        I: IntoIterator<Item = A>,
        A: AsRef<[u8]>,
    {
        let (tx, rx) = oneshot::channel();
        let mut cmd = Self::internal(name, args);
        cmd.completion = Some(tx);
        (cmd, rx)
    }

    /// A command nobody waits on (resubscription, QUIT).
    pub fn internal<I, A>(name: &str, args: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: AsRef<[u8]>,
    {
        let args: Vec<Bytes> = args
            .into_iter()
            .map(|a| Bytes::copy_from_slice(a.as_ref()))
            .collect();
        let kind = CommandKind::from_name(name);
        let acks_remaining = match kind {
            CommandKind::PubSub(k) if args.is_empty() && k.is_unsubscribe() => None,
            CommandKind::PubSub(_) => Some(args.len()),
            CommandKind::Regular => Some(0),
        };
        Self {
            name: name.to_string(),
            args,
            kind,
            enqueued_at: Instant::now(),
            completion: None,
            acks_remaining,
            acks: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn args(&self) -> &[Bytes] {
        &self.args
    }

    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    pub fn enqueued_at(&self) -> Instant {
        self.enqueued_at
    }

    /// Subscription kind for pub/sub-class commands.
    pub fn subscription_kind(&self) -> Option<SubscriptionKind> {
        match self.kind {
            CommandKind::PubSub(kind) => Some(kind),
            CommandKind::Regular => None,
        }
    }

    /// Whether a caller is waiting on this command.
    pub fn has_waiter(&self) -> bool {
        self.completion.is_some()
    }

    /// Acks still expected; 1 stands in for an open-ended unsubscribe.
    pub fn expected_acks(&self) -> usize {
        self.acks_remaining.unwrap_or(1)
    }

    /// Acks reserved at write time that have not arrived. An open-ended
    /// unsubscribe reserves one and has consumed it after its first ack.
    pub fn leftover_acks(&self) -> usize {
        match self.acks_remaining {
            Some(n) => n,
            None if self.acks.is_empty() => 1,
            None => 0,
        }
    }

    /// Append the wire frame for this command.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        encode_command_into(buf, self.name.as_bytes(), &self.args);
    }

    /// Record one acknowledgement. Returns `true` once the command is done.
    ///
    /// `namespace_empty` is the state of the ack's namespace after applying it;
    /// it ends an argument-less unsubscribe.
    pub fn record_ack(&mut self, ack: &SubscriptionAck, namespace_empty: bool) -> bool {
        self.acks.push(ack.to_value());
        match self.acks_remaining.as_mut() {
            Some(remaining) => {
                *remaining = remaining.saturating_sub(1);
                *remaining == 0
            }
            None => ack.name.is_none() || namespace_empty,
        }
    }

    /// Resolve with the accumulated acks (pub/sub) as an array.
    pub fn complete_acks(mut self) {
        let acks = std::mem::take(&mut self.acks);
        self.resolve(Ok(RespValue::Array(acks)));
    }

    /// Deliver the result. A caller that stopped waiting is not an error.
    pub fn resolve(mut self, result: Result<RespValue>) {
        if let Some(tx) = self.completion.take() {
            let _ = tx.send(result);
        }
    }
}

/// Future side of a command's completion.
///
/// Resolves once with the reply or the error that ended the command.
#[derive(Debug)]
pub struct Pending<T = RespValue> {
    rx: oneshot::Receiver<Result<RespValue>>,
    map: fn(RespValue) -> Result<T>,
}

impl Pending<RespValue> {
    pub(crate) fn new(rx: oneshot::Receiver<Result<RespValue>>) -> Self {
        Self { rx, map: Ok }
    }
}

impl<T> Pending<T> {
    pub(crate) fn with_map(
        rx: oneshot::Receiver<Result<RespValue>>,
        map: fn(RespValue) -> Result<T>,
    ) -> Self {
        Self { rx, map }
    }
}

impl<T> Future for Pending<T> {
    type Output = Result<T>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let map = self.map;
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Ready(Ok(result)) => Poll::Ready(result.and_then(map)),
            Poll::Ready(Err(_)) => Poll::Ready(Err(RedisError::ConnectionBroken(
                "command dropped before completion".into(),
            ))),
            Poll::Pending => Poll::Pending,
        }
    }
}

// ── Tests ──────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn ack(kind: SubscriptionKind, name: Option<&'static str>, count: i64) -> SubscriptionAck {
        SubscriptionAck {
            kind,
            name: name.map(|n| Bytes::from_static(n.as_bytes())),
            count,
        }
    }

    #[test]
    fn classify_names() {
        assert_eq!(CommandKind::from_name("GET"), CommandKind::Regular);
        assert_eq!(
            CommandKind::from_name("subscribe"),
            CommandKind::PubSub(SubscriptionKind::Subscribe)
        );
        assert_eq!(
            CommandKind::from_name("PUnsubscribe"),
            CommandKind::PubSub(SubscriptionKind::PUnsubscribe)
        );
    }

    #[test]
    fn encodes_name_and_args() {
        let cmd = Command::internal("SET", ["k", "v"]);
        let mut buf = BytesMut::new();
        cmd.encode_into(&mut buf);
        assert_eq!(&buf[..], b"*3\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n");
        assert!(!cmd.has_waiter());
    }

    #[tokio::test]
    async fn resolve_delivers_once() {
        let (cmd, rx) = Command::new("GET", ["k"]);
        assert!(cmd.has_waiter());
        cmd.resolve(Ok(RespValue::from("v")));
        assert_eq!(Pending::new(rx).await.unwrap(), RespValue::from("v"));
    }

    #[tokio::test]
    async fn dropped_command_is_broken() {
        let (cmd, rx) = Command::new("GET", ["k"]);
        drop(cmd);
        let err = Pending::new(rx).await.unwrap_err();
        assert!(matches!(err, RedisError::ConnectionBroken(_)));
    }

    #[test]
    fn resolve_after_caller_left_is_silent() {
        let (cmd, rx) = Command::new("GET", ["k"]);
        drop(rx);
        cmd.resolve(Err(RedisError::Closed));
    }

    #[test]
    fn subscribe_counts_one_ack_per_name() {
        let (mut cmd, _rx) = Command::new("SUBSCRIBE", ["a", "b"]);
        assert_eq!(cmd.expected_acks(), 2);
        assert_eq!(cmd.leftover_acks(), 2);
        assert!(!cmd.record_ack(&ack(SubscriptionKind::Subscribe, Some("a"), 1), false));
        assert!(cmd.record_ack(&ack(SubscriptionKind::Subscribe, Some("b"), 2), false));
    }

    #[test]
    fn bare_unsubscribe_runs_until_namespace_empty() {
        let (mut cmd, _rx) = Command::new("UNSUBSCRIBE", Vec::<&str>::new());
        assert_eq!(cmd.expected_acks(), 1);
        assert!(!cmd.record_ack(&ack(SubscriptionKind::Unsubscribe, Some("a"), 1), false));
        assert!(cmd.record_ack(&ack(SubscriptionKind::Unsubscribe, Some("b"), 0), true));
        assert_eq!(cmd.leftover_acks(), 0);
    }

    #[test]
    fn bare_unsubscribe_with_nothing_subscribed() {
        let (mut cmd, _rx) = Command::new("UNSUBSCRIBE", Vec::<&str>::new());
        assert!(cmd.record_ack(&ack(SubscriptionKind::Unsubscribe, None, 0), true));
    }

    #[tokio::test]
    async fn complete_acks_resolves_array() {
        let (mut cmd, rx) = Command::new("PSUBSCRIBE", ["n*"]);
        assert!(cmd.record_ack(&ack(SubscriptionKind::PSubscribe, Some("n*"), 1), false));
        cmd.complete_acks();
        let value = Pending::new(rx).await.unwrap();
        assert_eq!(
            value,
            RespValue::Array(vec![RespValue::Array(vec![
                RespValue::from("psubscribe"),
                RespValue::from("n*"),
                RespValue::Integer(1),
            ])])
        );
    }
}
