//! Shared fixtures for the integration tests.
//!
//! [`MockRpcServer`] is a scriptable JSON-RPC peer on a random local port.

#![allow(dead_code)]

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use rpc_connector_rs::config::{ClientConfig, ReconnectConfig};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Notify};
use tokio_tungstenite::accept_async;
use tokio_tungstenite::tungstenite::Message;

static INIT: Once = Once::new();

/// Routes library logs through env_logger once per test binary.
pub fn setup() {
    INIT.call_once(|| {
        env_logger::builder().is_test(true).try_init().ok();
    });
}

/// Maps one decoded inbound request to the frames sent back.
pub type Responder = Arc<dyn Fn(&Value) -> Vec<String> + Send + Sync>;

/// Returned by a responder to close the socket right after the frames before it.
pub const HANG_UP: &str = "\u{0}hang-up";

#[derive(Clone, Debug)]
enum Control {
    Frame(String),
    Drop,
}

/// Replies to every request with `{"echo": params}`.
pub fn echo_responder() -> Responder {
    Arc::new(|request: &Value| vec![result_frame(&request["id"], json!({ "echo": request["params"] }))])
}

/// Echoes every request except `silent`, which never gets a reply.
pub fn echo_except(silent: &'static str) -> Responder {
    Arc::new(move |request: &Value| {
        if request["method"] == silent {
            Vec::new()
        } else {
            vec![result_frame(&request["id"], json!({ "echo": request["params"] }))]
        }
    })
}

pub fn result_frame(id: &Value, result: Value) -> String {
    json!({ "jsonrpc": "2.0", "id": id, "result": result }).to_string()
}

pub fn error_frame(id: &Value, code: i64, message: &str) -> String {
    json!({ "jsonrpc": "2.0", "id": id, "error": { "code": code, "message": message } })
        .to_string()
}

pub fn notification_frame(channel: &str, params: Value) -> String {
    json!({ "jsonrpc": "2.0", "method": channel, "params": params }).to_string()
}

pub struct MockRpcServer {
    pub addr: SocketAddr,
    received: Arc<Mutex<Vec<Value>>>,
    connections: Arc<AtomicUsize>,
    pings: Arc<AtomicUsize>,
    control: broadcast::Sender<Control>,
    shutdown: Arc<Notify>,
}

impl MockRpcServer {
    pub async fn start(responder: Responder) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let received = Arc::new(Mutex::new(Vec::new()));
        let connections = Arc::new(AtomicUsize::new(0));
        let pings = Arc::new(AtomicUsize::new(0));
        let (control, _) = broadcast::channel(64);
        let shutdown = Arc::new(Notify::new());

        let server = Self {
            addr,
            received: received.clone(),
            connections: connections.clone(),
            pings: pings.clone(),
            control: control.clone(),
            shutdown: shutdown.clone(),
        };

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    accepted = listener.accept() => {
                        let Ok((stream, _)) = accepted else { break };
                        connections.fetch_add(1, Ordering::SeqCst);
                        tokio::spawn(Self::handle_connection(
                            stream,
                            responder.clone(),
                            received.clone(),
                            pings.clone(),
                            control.subscribe(),
                            shutdown.clone(),
                        ));
                    }
                    _ = shutdown.notified() => break,
                }
            }
        });

        server
    }

    async fn handle_connection(
        stream: TcpStream,
        responder: Responder,
        received: Arc<Mutex<Vec<Value>>>,
        pings: Arc<AtomicUsize>,
        mut control: broadcast::Receiver<Control>,
        shutdown: Arc<Notify>,
    ) {
        let Ok(ws_stream) = accept_async(stream).await else {
            return;
        };
        let (mut write, mut read) = ws_stream.split();

        loop {
            tokio::select! {
                msg = read.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        let Ok(request) = serde_json::from_str::<Value>(&text) else {
                            continue;
                        };
                        received.lock().push(request.clone());
                        for frame in responder(&request) {
                            if frame == HANG_UP {
                                return;
                            }
                            if write.send(Message::Text(frame)).await.is_err() {
                                return;
                            }
                        }
                    }
                    Some(Ok(Message::Ping(payload))) => {
                        pings.fetch_add(1, Ordering::SeqCst);
                        let _ = write.send(Message::Pong(payload)).await;
                    }
                    Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
                    Some(Ok(_)) => {}
                },
                command = control.recv() => match command {
                    Ok(Control::Frame(frame)) => {
                        if write.send(Message::Text(frame)).await.is_err() {
                            return;
                        }
                    }
                    // Abrupt drop: no close handshake.
                    Ok(Control::Drop) | Err(_) => return,
                },
                _ = shutdown.notified() => return,
            }
        }
    }

    pub fn url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Client config for this server with fast, test-sized timings.
    pub fn config(&self) -> ClientConfig {
        let mut config = ClientConfig::new(self.url(), "http://127.0.0.1:1");
        config.dial_timeout = Duration::from_secs(2);
        config.write_timeout = Duration::from_secs(2);
        config.reconnect = ReconnectConfig {
            enabled: false,
            max_attempts: 5,
            base_wait: Duration::from_millis(50),
            max_wait: Duration::from_millis(200),
        };
        config
    }

    /// Sends a raw text frame to every open connection.
    pub fn push(&self, frame: String) {
        let _ = self.control.send(Control::Frame(frame));
    }

    /// Drops every open connection without a close handshake.
    pub fn drop_connections(&self) {
        let _ = self.control.send(Control::Drop);
    }

    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    /// Keepalive pings received across all connections.
    pub fn pings(&self) -> usize {
        self.pings.load(Ordering::SeqCst)
    }

    pub fn received(&self) -> Vec<Value> {
        self.received.lock().clone()
    }

    pub fn received_method(&self, method: &str) -> Vec<Value> {
        self.received()
            .into_iter()
            .filter(|request| request["method"] == method)
            .collect()
    }

    pub fn shutdown(&self) {
        self.shutdown.notify_waiters();
    }
}

impl Drop for MockRpcServer {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Polls `predicate` every 10ms, panicking after `limit`.
pub async fn eventually<F>(limit: Duration, predicate: F)
where
    F: Fn() -> bool,
{
    let deadline = tokio::time::Instant::now() + limit;
    while !predicate() {
        if tokio::time::Instant::now() >= deadline {
            panic!("condition not met within {:?}", limit);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}
