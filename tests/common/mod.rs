//! Shared helpers for integration tests.
//!
//! An in-process mock Redis server on `127.0.0.1:0`: it speaks enough RESP
//! for the connection engine (handshake, strings, counters, pub/sub), logs
//! every command it receives per connection, and lets a test override any
//! reply with a hook.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::time::Duration;

use bytes::BytesMut;
use rediswire::config::{Backoff, ConnectionConfig, RetryConfig};
use rediswire::resp::{ReplyDecoder, RespDecoder, RespValue};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast;

static TRACING: Once = Once::new();

/// Install a `RUST_LOG` driven subscriber once per test binary.
pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

pub const INFO_READY: &str = "# Server\r\nredis_version:7.0.0\r\nrole:master\r\nloading:0\r\n";

/// What the server does with one command.
pub enum Action {
    /// Use the built-in behaviour.
    Default,
    /// Write these bytes.
    Reply(Vec<u8>),
    /// Swallow the command.
    Silent,
    /// Drop the connection without replying.
    Close,
}

/// `hook(connection_index, args)`; args[0] is the upper-cased command name.
pub type Hook = Arc<dyn Fn(usize, &[Vec<u8>]) -> Action + Send + Sync>;

struct Inner {
    hook: Option<Hook>,
    password: Option<String>,
    store: Mutex<HashMap<Vec<u8>, Vec<u8>>>,
    log: Mutex<Vec<(usize, String)>>,
    connections: AtomicUsize,
    publish: broadcast::Sender<(Vec<u8>, Vec<u8>)>,
    /// `(connection_index, monitor line)` for every command received.
    monitor: broadcast::Sender<(usize, String)>,
    kill: broadcast::Sender<()>,
}

pub struct MockServer {
    pub port: u16,
    inner: Arc<Inner>,
}

impl MockServer {
    pub async fn start() -> Self {
        Self::build(None, None).await
    }

    pub async fn with_hook(hook: impl Fn(usize, &[Vec<u8>]) -> Action + Send + Sync + 'static) -> Self {
        Self::build(Some(Arc::new(hook)), None).await
    }

    pub async fn with_password(password: &str) -> Self {
        Self::build(None, Some(password.to_string())).await
    }

    async fn build(hook: Option<Hook>, password: Option<String>) -> Self {
        init_tracing();
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (publish, _) = broadcast::channel(64);
        let (monitor, _) = broadcast::channel(256);
        let (kill, _) = broadcast::channel(4);
        let inner = Arc::new(Inner {
            hook,
            password,
            store: Mutex::new(HashMap::new()),
            log: Mutex::new(Vec::new()),
            connections: AtomicUsize::new(0),
            publish,
            monitor,
            kill,
        });

        let accept = inner.clone();
        tokio::spawn(async move {
            loop {
                let Ok((socket, _)) = listener.accept().await else {
                    return;
                };
                let idx = accept.connections.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve(socket, idx, accept.clone()));
            }
        });

        Self { port, inner }
    }

    /// Client config for this server with fast, deterministic retries.
    pub fn config(&self) -> ConnectionConfig {
        ConnectionConfig {
            retry: fast_retry(None),
            ..ConnectionConfig::tcp("127.0.0.1", self.port)
        }
    }

    /// Connections accepted so far.
    pub fn connections(&self) -> usize {
        self.inner.connections.load(Ordering::SeqCst)
    }

    /// Every command received, as `(connection_index, "NAME arg ...")`.
    pub fn log(&self) -> Vec<(usize, String)> {
        self.inner.log.lock().unwrap().clone()
    }

    /// Commands received on one connection, handshake included.
    pub fn commands_on(&self, conn: usize) -> Vec<String> {
        self.log()
            .into_iter()
            .filter(|(c, _)| *c == conn)
            .map(|(_, cmd)| cmd)
            .collect()
    }

    /// Commands received on one connection, without the handshake.
    pub fn user_commands_on(&self, conn: usize) -> Vec<String> {
        self.commands_on(conn)
            .into_iter()
            .filter(|cmd| !matches!(first_word(cmd), "AUTH" | "SELECT" | "INFO" | "PING"))
            .collect()
    }

    /// Drop every open connection.
    pub fn kill_connections(&self) {
        let _ = self.inner.kill.send(());
    }

    /// Deliver a message to subscribers on every connection.
    pub fn publish(&self, channel: &str, payload: &str) {
        let _ = self
            .inner
            .publish
            .send((channel.as_bytes().to_vec(), payload.as_bytes().to_vec()));
    }
}

fn first_word(cmd: &str) -> &str {
    cmd.split(' ').next().unwrap_or("")
}

pub fn fast_retry(max_attempts: Option<u32>) -> RetryConfig {
    RetryConfig {
        initial_delay_ms: 10,
        max_delay_ms: 50,
        backoff: Backoff::Fixed,
        jitter: 0.0,
        max_attempts,
        max_elapsed_ms: None,
    }
}

/// Poll `cond` until it holds or two seconds pass.
pub async fn eventually(mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    while !cond() {
        assert!(tokio::time::Instant::now() < deadline, "condition not reached in time");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

// ── Wire helpers ───────────────────────────────────────────────────

pub fn bulk(data: &[u8]) -> Vec<u8> {
    let mut out = format!("${}\r\n", data.len()).into_bytes();
    out.extend_from_slice(data);
    out.extend_from_slice(b"\r\n");
    out
}

fn push(items: &[Vec<u8>]) -> Vec<u8> {
    let mut out = format!("*{}\r\n", items.len()).into_bytes();
    for item in items {
        out.extend_from_slice(item);
    }
    out
}

fn ack(kind: &str, name: Option<&[u8]>, count: usize) -> Vec<u8> {
    push(&[
        bulk(kind.as_bytes()),
        name.map_or_else(|| b"$-1\r\n".to_vec(), bulk),
        format!(":{count}\r\n").into_bytes(),
    ])
}

fn glob_match(pattern: &[u8], text: &[u8]) -> bool {
    match pattern.split_first() {
        None => text.is_empty(),
        Some((b'*', rest)) => (0..=text.len()).any(|i| glob_match(rest, &text[i..])),
        Some((c, rest)) => text.first() == Some(c) && glob_match(rest, &text[1..]),
    }
}

/// `1339518083.107412 [0 127.0.0.1:<conn>] "SET" "k" "v"`
fn monitor_line(conn: usize, args: &[Vec<u8>]) -> String {
    let quoted: Vec<String> = args
        .iter()
        .map(|a| {
            let text = String::from_utf8_lossy(a).replace('\\', "\\\\").replace('"', "\\\"");
            format!("\"{text}\"")
        })
        .collect();
    format!("1339518083.107412 [0 127.0.0.1:{conn}] {}", quoted.join(" "))
}

// ── Connection handling ────────────────────────────────────────────

#[derive(Default)]
struct Subscriptions {
    channels: Vec<Vec<u8>>,
    patterns: Vec<Vec<u8>>,
    monitoring: bool,
}

impl Subscriptions {
    fn count(&self) -> usize {
        self.channels.len() + self.patterns.len()
    }
}

async fn serve(mut socket: TcpStream, idx: usize, inner: Arc<Inner>) {
    let mut decoder = RespDecoder::new();
    let mut buf = BytesMut::with_capacity(4096);
    let mut subs = Subscriptions::default();
    let mut published = inner.publish.subscribe();
    let mut kill = inner.kill.subscribe();
    let mut monitored: Option<broadcast::Receiver<(usize, String)>> = None;

    loop {
        tokio::select! {
            _ = kill.recv() => return,
            line = async { monitored.as_mut().unwrap().recv().await }, if monitored.is_some() => {
                let Ok((from, line)) = line else { continue };
                if from != idx && socket.write_all(format!("+{line}\r\n").as_bytes()).await.is_err() {
                    return;
                }
            }
            msg = published.recv() => {
                let Ok((channel, payload)) = msg else { continue };
                let mut out = Vec::new();
                if subs.channels.contains(&channel) {
                    out.extend(push(&[bulk(b"message"), bulk(&channel), bulk(&payload)]));
                }
                for pattern in &subs.patterns {
                    if glob_match(pattern, &channel) {
                        out.extend(push(&[bulk(b"pmessage"), bulk(pattern), bulk(&channel), bulk(&payload)]));
                    }
                }
                if !out.is_empty() && socket.write_all(&out).await.is_err() {
                    return;
                }
            }
            read = socket.read_buf(&mut buf) => {
                match read {
                    Ok(0) | Err(_) => return,
                    Ok(_) => {}
                }
                let Ok(frames) = decoder.feed(&buf) else { return };
                buf.clear();
                for (frame, _) in frames {
                    let mut args: Vec<Vec<u8>> = frame
                        .into_array()
                        .unwrap_or_default()
                        .iter()
                        .filter_map(|v| v.as_bytes().map(<[u8]>::to_vec))
                        .collect();
                    if args.is_empty() {
                        continue;
                    }
                    args[0].make_ascii_uppercase();
                    let line = args
                        .iter()
                        .map(|a| String::from_utf8_lossy(a).into_owned())
                        .collect::<Vec<_>>()
                        .join(" ");
                    let _ = inner.monitor.send((idx, monitor_line(idx, &args)));
                    inner.log.lock().unwrap().push((idx, line));

                    let action = match &inner.hook {
                        Some(hook) => hook(idx, &args),
                        None => Action::Default,
                    };
                    let reply = match action {
                        Action::Default => default_reply(&inner, &mut subs, &args),
                        Action::Reply(bytes) => Some(bytes),
                        Action::Silent => continue,
                        Action::Close => return,
                    };
                    if subs.monitoring && monitored.is_none() {
                        monitored = Some(inner.monitor.subscribe());
                    }
                    match reply {
                        Some(bytes) => {
                            if socket.write_all(&bytes).await.is_err() {
                                return;
                            }
                        }
                        // QUIT
                        None => {
                            let _ = socket.write_all(b"+OK\r\n").await;
                            let _ = socket.shutdown().await;
                            return;
                        }
                    }
                }
            }
        }
    }
}

/// Built-in behaviour. `None` means reply `+OK` and close.
fn default_reply(inner: &Inner, subs: &mut Subscriptions, args: &[Vec<u8>]) -> Option<Vec<u8>> {
    let name = String::from_utf8_lossy(&args[0]).into_owned();
    let rest = &args[1..];
    let reply = match name.as_str() {
        "PING" if subs.count() > 0 => push(&[bulk(b"pong"), bulk(b"")]),
        "PING" => b"+PONG\r\n".to_vec(),
        "INFO" => bulk(INFO_READY.as_bytes()),
        "SELECT" => b"+OK\r\n".to_vec(),
        "AUTH" => match (&inner.password, rest.last()) {
            (Some(expected), Some(given)) if expected.as_bytes() == given.as_slice() => {
                b"+OK\r\n".to_vec()
            }
            _ => b"-WRONGPASS invalid username-password pair or user is disabled.\r\n".to_vec(),
        },
        "SET" if rest.len() >= 2 => {
            inner.store.lock().unwrap().insert(rest[0].clone(), rest[1].clone());
            b"+OK\r\n".to_vec()
        }
        "GET" if rest.len() == 1 => match inner.store.lock().unwrap().get(&rest[0]) {
            Some(v) => bulk(v),
            None => b"$-1\r\n".to_vec(),
        },
        "INCR" if rest.len() == 1 => {
            let mut store = inner.store.lock().unwrap();
            let current = store
                .get(&rest[0])
                .and_then(|v| std::str::from_utf8(v).ok()?.parse::<i64>().ok())
                .unwrap_or(0);
            store.insert(rest[0].clone(), (current + 1).to_string().into_bytes());
            format!(":{}\r\n", current + 1).into_bytes()
        }
        "PUBLISH" if rest.len() == 2 => {
            let _ = inner.publish.send((rest[0].clone(), rest[1].clone()));
            b":1\r\n".to_vec()
        }
        "SUBSCRIBE" | "PSUBSCRIBE" => {
            let kind = name.to_ascii_lowercase();
            let mut out = Vec::new();
            for target in rest {
                let set = if name == "SUBSCRIBE" { &mut subs.channels } else { &mut subs.patterns };
                if !set.contains(target) {
                    set.push(target.clone());
                }
                out.extend(ack(&kind, Some(target.as_slice()), subs.count()));
            }
            out
        }
        "UNSUBSCRIBE" | "PUNSUBSCRIBE" => {
            let kind = name.to_ascii_lowercase();
            let pattern = name == "PUNSUBSCRIBE";
            let targets: Vec<Vec<u8>> = if rest.is_empty() {
                if pattern { subs.patterns.clone() } else { subs.channels.clone() }
            } else {
                rest.to_vec()
            };
            if targets.is_empty() {
                ack(&kind, None, subs.count())
            } else {
                let mut out = Vec::new();
                for target in targets {
                    let set = if pattern { &mut subs.patterns } else { &mut subs.channels };
                    set.retain(|c| *c != target);
                    out.extend(ack(&kind, Some(target.as_slice()), subs.count()));
                }
                out
            }
        }
        "MONITOR" => {
            subs.monitoring = true;
            b"+OK\r\n".to_vec()
        }
        "QUIT" => return None,
        _ => format!("-ERR unknown command '{name}'\r\n").into_bytes(),
    };
    Some(reply)
}

/// Read a reply value as UTF-8 for assertions.
pub fn text(value: &RespValue) -> &str {
    value.as_str().unwrap_or_else(|| panic!("expected a string reply, got {value:?}"))
}
