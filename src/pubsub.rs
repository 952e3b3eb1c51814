//! Pub/sub state and reply routing.
//!
//! Replies are classified into an explicit [`Reply`] before dispatch, so a
//! pushed message or a subscription ack is never mistaken for the reply to
//! the command at the head of the queue.

use std::collections::HashMap;

use bytes::Bytes;

use crate::resp::types::RespValue;

/// The four subscription commands and their acknowledgements.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SubscriptionKind {
    Subscribe,
    Unsubscribe,
    PSubscribe,
    PUnsubscribe,
}

impl SubscriptionKind {
    /// Match a command name (case-insensitive).
    pub fn from_command(name: &str) -> Option<Self> {
        Self::from_bytes(name.to_ascii_lowercase().as_bytes())
    }

    /// Match the first element of an acknowledgement.
    pub fn from_bytes(kind: &[u8]) -> Option<Self> {
        match kind {
            b"subscribe" => Some(Self::Subscribe),
            b"unsubscribe" => Some(Self::Unsubscribe),
            b"psubscribe" => Some(Self::PSubscribe),
            b"punsubscribe" => Some(Self::PUnsubscribe),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Subscribe => "subscribe",
            Self::Unsubscribe => "unsubscribe",
            Self::PSubscribe => "psubscribe",
            Self::PUnsubscribe => "punsubscribe",
        }
    }

    pub fn command_name(self) -> &'static str {
        match self {
            Self::Subscribe => "SUBSCRIBE",
            Self::Unsubscribe => "UNSUBSCRIBE",
            Self::PSubscribe => "PSUBSCRIBE",
            Self::PUnsubscribe => "PUNSUBSCRIBE",
        }
    }

    pub fn is_unsubscribe(self) -> bool {
        matches!(self, Self::Unsubscribe | Self::PUnsubscribe)
    }

    /// Pattern namespace vs literal channel namespace.
    pub fn is_pattern(self) -> bool {
        matches!(self, Self::PSubscribe | Self::PUnsubscribe)
    }

    /// The subscribing command of the same namespace.
    pub fn subscribing(self) -> Self {
        if self.is_pattern() {
            Self::PSubscribe
        } else {
            Self::Subscribe
        }
    }
}

/// One `(kind, name, count)` acknowledgement.
///
/// `name` is `None` for the ack the server sends when unsubscribing from
/// everything while nothing is subscribed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriptionAck {
    pub kind: SubscriptionKind,
    pub name: Option<Bytes>,
    pub count: i64,
}

impl SubscriptionAck {
    /// Parse `[kind, name|nil, count]`.
    pub fn from_items(items: &[RespValue]) -> Option<Self> {
        let [kind, name, count] = items else {
            return None;
        };
        let kind = SubscriptionKind::from_bytes(kind.as_bytes()?)?;
        let name = match name {
            RespValue::Null => None,
            other => Some(other.to_bytes()?),
        };
        let count = count.as_int()?;
        Some(Self { kind, name, count })
    }

    /// Back to the wire shape, as handed to the command's waiter.
    pub fn to_value(&self) -> RespValue {
        RespValue::Array(vec![
            RespValue::BulkString(Bytes::from_static(self.kind.as_str().as_bytes())),
            match &self.name {
                Some(name) => RespValue::BulkString(name.clone()),
                None => RespValue::Null,
            },
            RespValue::Integer(self.count),
        ])
    }

    /// Parse the array a pub/sub command resolves with.
    pub fn list_from_value(value: RespValue) -> Option<Vec<Self>> {
        value
            .into_array()?
            .into_iter()
            .map(|v| Self::from_items(&v.into_array()?))
            .collect()
    }
}

/// A published message delivered to this connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PubSubMessage {
    /// Set when delivered through a pattern subscription.
    pub pattern: Option<Bytes>,
    pub channel: Bytes,
    pub payload: Bytes,
}

/// Push-shaped replies that bypass FIFO correlation (or, for acks, follow
/// their own counting protocol).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PubSubPush {
    Message(PubSubMessage),
    Ack(SubscriptionAck),
}

/// A decoded reply, tagged for routing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Value(RespValue),
    Push(PubSubPush),
    Error(String),
}

/// Tag a decoded reply.
///
/// `subscriber_mode`: the connection currently holds subscriptions.
/// `expecting_ack`: the head of the command queue is a pub/sub command.
pub fn classify(value: RespValue, subscriber_mode: bool, expecting_ack: bool) -> Reply {
    match value {
        RespValue::Error(msg) => Reply::Error(msg),
        RespValue::Array(items) if subscriber_mode || expecting_ack => {
            match classify_push(&items, subscriber_mode) {
                Some(push) => Reply::Push(push),
                None => Reply::Value(RespValue::Array(items)),
            }
        }
        other => Reply::Value(other),
    }
}

fn classify_push(items: &[RespValue], subscriber_mode: bool) -> Option<PubSubPush> {
    let head = items.first()?.as_bytes()?;
    match (head, items.len()) {
        (b"message", 3) if subscriber_mode => Some(PubSubPush::Message(PubSubMessage {
            pattern: None,
            channel: items[1].to_bytes()?,
            payload: items[2].to_bytes()?,
        })),
        (b"pmessage", 4) if subscriber_mode => Some(PubSubPush::Message(PubSubMessage {
            pattern: Some(items[1].to_bytes()?),
            channel: items[2].to_bytes()?,
            payload: items[3].to_bytes()?,
        })),
        (_, 3) => SubscriptionAck::from_items(items).map(PubSubPush::Ack),
        _ => None,
    }
}

/// Subscriptions held on the current socket.
#[derive(Debug, Default)]
pub struct PubSubState {
    /// channel → subscription count reported by its ack
    channels: HashMap<Bytes, i64>,
    /// pattern → subscription count reported by its ack
    patterns: HashMap<Bytes, i64>,
    pending_subscribe: usize,
    pending_unsubscribe: usize,
    subscriber: bool,
}

impl PubSubState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscriber mode: pushes are routed here instead of the command queue.
    pub fn is_subscriber(&self) -> bool {
        self.subscriber
    }

    pub fn channels(&self) -> impl Iterator<Item = &Bytes> {
        self.channels.keys()
    }

    pub fn patterns(&self) -> impl Iterator<Item = &Bytes> {
        self.patterns.keys()
    }

    pub fn pending_subscribe_count(&self) -> usize {
        self.pending_subscribe
    }

    pub fn pending_unsubscribe_count(&self) -> usize {
        self.pending_unsubscribe
    }

    /// No channels, no patterns.
    pub fn is_empty(&self) -> bool {
        self.channels.is_empty() && self.patterns.is_empty()
    }

    /// Whether the namespace of `kind` holds nothing.
    pub fn namespace_empty(&self, kind: SubscriptionKind) -> bool {
        if kind.is_pattern() {
            self.patterns.is_empty()
        } else {
            self.channels.is_empty()
        }
    }

    /// Account for a pub/sub command written to the socket.
    pub fn command_sent(&mut self, kind: SubscriptionKind, expected_acks: usize) {
        if kind.is_unsubscribe() {
            self.pending_unsubscribe += expected_acks;
        } else {
            self.pending_subscribe += expected_acks;
        }
    }

    /// A pub/sub command finished with `leftover` acks it had reserved but
    /// never received (argument-less unsubscribe, duplicates).
    pub fn command_settled(&mut self, kind: SubscriptionKind, leftover: usize) {
        if kind.is_unsubscribe() {
            self.pending_unsubscribe = self.pending_unsubscribe.saturating_sub(leftover);
        } else {
            self.pending_subscribe = self.pending_subscribe.saturating_sub(leftover);
        }
        self.refresh_mode();
    }

    /// Apply an acknowledgement. Returns the mode after applying it.
    pub fn apply_ack(&mut self, ack: &SubscriptionAck) -> bool {
        let namespace = if ack.kind.is_pattern() {
            &mut self.patterns
        } else {
            &mut self.channels
        };
        if ack.kind.is_unsubscribe() {
            self.pending_unsubscribe = self.pending_unsubscribe.saturating_sub(1);
            if let Some(name) = &ack.name {
                namespace.remove(name);
            }
        } else {
            self.pending_subscribe = self.pending_subscribe.saturating_sub(1);
            if let Some(name) = &ack.name {
                namespace.insert(name.clone(), ack.count);
            }
            self.subscriber = true;
        }
        self.refresh_mode();
        self.subscriber
    }

    fn refresh_mode(&mut self) {
        if self.subscriber
            && self.is_empty()
            && self.pending_subscribe == 0
            && self.pending_unsubscribe == 0
        {
            self.subscriber = false;
        }
    }

    /// The socket is gone: the server forgot every subscription. Returns the
    /// commands that restore them on the next connection.
    pub fn connection_lost(&mut self) -> Vec<(SubscriptionKind, Vec<Bytes>)> {
        let channels: Vec<Bytes> = self.channels.drain().map(|(k, _)| k).collect();
        let patterns: Vec<Bytes> = self.patterns.drain().map(|(k, _)| k).collect();
        self.pending_subscribe = 0;
        self.pending_unsubscribe = 0;
        self.subscriber = false;

        let mut restore = Vec::new();
        if !channels.is_empty() {
            restore.push((SubscriptionKind::Subscribe, channels));
        }
        if !patterns.is_empty() {
            restore.push((SubscriptionKind::PSubscribe, patterns));
        }
        restore
    }
}

// ── Tests ──────────────────────────────────────────────────────────
