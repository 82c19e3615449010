//! Persistent WebSocket connection.
//!
//! A [`Transport`] owns at most one live socket at a time. Every successful
//! [`Transport::connect`] mints a new connection generation: a fresh shutdown
//! signal plus three tasks bound to it (reader, writer, pinger). Tasks only ever
//! watch the signal of the generation they were spawned for, so a loop from a
//! torn-down connection can never observe, or be confused by, the signal of the
//! connection that replaced it.
//!
//! Writes go through the generation's writer task over a channel; the caller
//! waits on a per-frame acknowledgement bounded by its deadline. No lock is held
//! across socket I/O.

use crate::error::{Result, RpcError};
use crate::websocket::codec::{self, InboundMessage, Notification, Request, Response};
use crate::websocket::id::RequestIdGenerator;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::*;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{timeout, MissedTickBehavior};
use tokio_tungstenite::tungstenite::protocol::{Message, WebSocketConfig};
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};
use url::Url;

const OUTBOUND_BUFFER: usize = 64;
const PING_WRITE_TIMEOUT: Duration = Duration::from_secs(5);
const CLOSE_GRACE: Duration = Duration::from_secs(1);

// Type alias for the WebSocket stream
type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Receives everything the read loop observes.
///
/// Callbacks run on the transport's own tasks and must not block.
pub trait TransportListener: Send + Sync {
    fn on_response(&self, response: Response);
    fn on_notification(&self, notification: Notification);
    fn on_error(&self, error: RpcError);
    /// Fired exactly once per connection lost to a read/transport failure.
    /// Not fired for an explicit [`Transport::close`].
    fn on_disconnect(&self);
}

/// Socket-level settings for a [`Transport`].
#[derive(Debug, Clone)]
pub struct TransportOptions {
    pub ping_interval: Duration,
    pub max_message_size: usize,
}

impl Default for TransportOptions {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_secs(15),
            max_message_size: 64 << 20,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

struct Outbound {
    message: Message,
    ack: oneshot::Sender<Result<()>>,
}

/// Handles for the live generation. Dropping it releases the writer channel.
struct Connection {
    generation: u64,
    outbound: mpsc::Sender<Outbound>,
    done: watch::Sender<bool>,
}

enum State {
    Disconnected,
    Connecting,
    Connected(Connection),
}

pub struct Transport {
    url: Url,
    options: TransportOptions,
    ids: RequestIdGenerator,
    generations: AtomicU64,
    state: Mutex<State>,
    listener: RwLock<Option<Arc<dyn TransportListener>>>,
}

impl Transport {
    pub fn new(url: &str, options: TransportOptions) -> Result<Self> {
        let url = Url::parse(url)?;
        Ok(Self {
            url,
            options,
            ids: RequestIdGenerator::new(),
            generations: AtomicU64::new(0),
            state: Mutex::new(State::Disconnected),
            listener: RwLock::new(None),
        })
    }

    pub fn url(&self) -> &Url {
        &self.url
    }

    pub fn set_listener(&self, listener: Arc<dyn TransportListener>) {
        *self.listener.write() = Some(listener);
    }

    pub fn next_id(&self) -> u64 {
        self.ids.next_id()
    }

    pub fn state(&self) -> ConnectionState {
        match &*self.state.lock() {
            State::Disconnected => ConnectionState::Disconnected,
            State::Connecting => ConnectionState::Connecting,
            State::Connected(_) => ConnectionState::Connected,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }

    /// Generation number of the live connection, if any.
    pub fn generation(&self) -> Option<u64> {
        match &*self.state.lock() {
            State::Connected(conn) => Some(conn.generation),
            _ => None,
        }
    }

    /// Dials the endpoint and starts the generation's background tasks.
    ///
    /// Connecting while already connected is a no-op.
    pub async fn connect(self: &Arc<Self>, dial_timeout: Duration) -> Result<()> {
        {
            let mut state = self.state.lock();
            match *state {
                State::Connected(_) => {
                    debug!("connect() called on a live connection, ignoring");
                    return Ok(());
                }
                State::Connecting => {
                    return Err(RpcError::WebsocketError(
                        "connection attempt already in progress".to_string(),
                    ))
                }
                State::Disconnected => *state = State::Connecting,
            }
        }

        info!("Connecting to WebSocket: {}", self.url);
        let ws_config = WebSocketConfig {
            max_message_size: Some(self.options.max_message_size),
            max_frame_size: Some(self.options.max_message_size),
            ..WebSocketConfig::default()
        };
        let dialed = timeout(
            dial_timeout,
            connect_async_with_config(self.url.as_str(), Some(ws_config)),
        )
        .await;

        let ws_stream = match dialed {
            Ok(Ok((ws_stream, response))) => {
                debug!("WebSocket handshake status: {}", response.status());
                ws_stream
            }
            Ok(Err(e)) => {
                *self.state.lock() = State::Disconnected;
                return Err(RpcError::DialError {
                    url: self.url.to_string(),
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                *self.state.lock() = State::Disconnected;
                return Err(RpcError::DialError {
                    url: self.url.to_string(),
                    reason: format!("timed out after {:?}", dial_timeout),
                });
            }
        };

        let (write, read) = ws_stream.split();
        let generation = self.generations.fetch_add(1, Ordering::Relaxed) + 1;
        let (done_tx, done_rx) = watch::channel(false);
        let (outbound_tx, outbound_rx) = mpsc::channel::<Outbound>(OUTBOUND_BUFFER);

        *self.state.lock() = State::Connected(Connection {
            generation,
            outbound: outbound_tx.clone(),
            done: done_tx,
        });
        info!("WebSocket connected (generation {})", generation);

        tokio::spawn(write_loop(generation, write, outbound_rx, done_rx.clone()));
        tokio::spawn(Arc::clone(self).read_loop(generation, read, done_rx.clone()));
        tokio::spawn(Arc::clone(self).ping_loop(generation, outbound_tx, done_rx));
        Ok(())
    }

    /// Assigns an ID, encodes the call and writes it as one frame.
    ///
    /// `deadline` bounds the write only, not the eventual reply.
    pub async fn send(&self, method: &str, params: Value, deadline: Duration) -> Result<u64> {
        let request = Request::new(self.next_id(), method, params);
        self.send_request(&request, deadline).await?;
        Ok(request.id)
    }

    /// Writes a call whose ID was already taken from [`Transport::next_id`].
    pub async fn send_request(&self, request: &Request, deadline: Duration) -> Result<()> {
        let text = codec::encode_request(request)?;
        let outbound = self.outbound()?;
        trace!("Sending WS call id={} method={}", request.id, request.method);
        write_frame(&outbound, Message::Text(text), deadline).await
    }

    /// Tears down the live connection, if any. Idempotent.
    pub async fn close(&self) {
        let conn = {
            let mut state = self.state.lock();
            match std::mem::replace(&mut *state, State::Disconnected) {
                State::Connected(conn) => Some(conn),
                other => {
                    *state = other;
                    None
                }
            }
        };
        let Some(conn) = conn else {
            return;
        };

        info!("Closing WebSocket connection (generation {})", conn.generation);
        // Best effort: the writer may already be gone.
        if let Err(e) = write_frame(&conn.outbound, Message::Close(None), CLOSE_GRACE).await {
            debug!("Close frame not delivered: {}", e);
        }
        let _ = conn.done.send(true);
    }

    fn outbound(&self) -> Result<mpsc::Sender<Outbound>> {
        match &*self.state.lock() {
            State::Connected(conn) => Ok(conn.outbound.clone()),
            _ => Err(RpcError::NotConnected),
        }
    }

    fn listener(&self) -> Option<Arc<dyn TransportListener>> {
        self.listener.read().clone()
    }

    fn report_error(&self, error: RpcError) {
        match self.listener() {
            Some(listener) => listener.on_error(error),
            None => warn!("WebSocket error with no listener attached: {}", error),
        }
    }

    /// Drops the live connection if it still belongs to `generation`.
    ///
    /// Returns false when the generation was already replaced or closed.
    fn retire(&self, generation: u64) -> bool {
        let mut state = self.state.lock();
        let current = matches!(&*state, State::Connected(conn) if conn.generation == generation);
        if !current {
            return false;
        }
        if let State::Connected(conn) = std::mem::replace(&mut *state, State::Disconnected) {
            let _ = conn.done.send(true);
        }
        true
    }

    fn dispatch(&self, bytes: &[u8]) {
        match codec::decode(bytes) {
            Ok(message) => {
                let Some(listener) = self.listener() else {
                    return;
                };
                match message {
                    InboundMessage::Response(response) => listener.on_response(response),
                    InboundMessage::Notification(notification) => {
                        listener.on_notification(notification)
                    }
                }
            }
            Err(e) => {
                warn!("Dropping undecodable WS frame: {}", e);
                self.report_error(e);
            }
        }
    }

    async fn read_loop(
        self: Arc<Self>,
        generation: u64,
        mut read: SplitStream<WsStream>,
        mut done: watch::Receiver<bool>,
    ) {
        let failure = loop {
            let frame = tokio::select! {
                _ = done.changed() => {
                    debug!("Reader for generation {} shut down", generation);
                    return;
                }
                frame = read.next() => frame,
            };
            match frame {
                Some(Ok(Message::Text(text))) => {
                    trace!("Received WS Text: {}", text);
                    self.dispatch(text.as_bytes());
                }
                Some(Ok(Message::Binary(bin))) => self.dispatch(&bin),
                Some(Ok(Message::Close(close_frame))) => {
                    warn!("Received WS Close frame: {:?}", close_frame);
                    break RpcError::WebsocketError(format!(
                        "connection closed by peer: {:?}",
                        close_frame
                    ));
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    error!("WebSocket read error: {}", e);
                    break RpcError::WebsocketError(format!("read failed: {}", e));
                }
                None => {
                    info!("WebSocket stream ended (read None).");
                    break RpcError::WebsocketError("stream ended".to_string());
                }
            }
        };

        // close() took this generation out before the read failed: not a disconnect.
        if *done.borrow() || !self.retire(generation) {
            debug!("Reader for generation {} exited after close", generation);
            return;
        }
        self.report_error(failure);
        if let Some(listener) = self.listener() {
            listener.on_disconnect();
        }
        info!("WebSocket reader task finished (generation {}).", generation);
    }

    async fn ping_loop(
        self: Arc<Self>,
        generation: u64,
        outbound: mpsc::Sender<Outbound>,
        mut done: watch::Receiver<bool>,
    ) {
        if self.options.ping_interval.is_zero() {
            return;
        }
        let mut ticker = tokio::time::interval(self.options.ping_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // Skip the first immediate tick
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = done.changed() => return,
                _ = ticker.tick() => {}
            }
            if let Err(e) = write_frame(&outbound, Message::Ping(Vec::new()), PING_WRITE_TIMEOUT).await
            {
                if !*done.borrow() {
                    warn!("Ping failed on generation {}: {}", generation, e);
                    self.report_error(e);
                }
                return;
            }
            trace!("Sent WS Ping (generation {})", generation);
        }
    }
}

async fn write_frame(
    outbound: &mpsc::Sender<Outbound>,
    message: Message,
    deadline: Duration,
) -> Result<()> {
    let (ack, acked) = oneshot::channel();
    let write = async {
        outbound
            .send(Outbound { message, ack })
            .await
            .map_err(|_| RpcError::WebsocketError("writer task stopped".to_string()))?;
        acked
            .await
            .map_err(|_| RpcError::WebsocketError("writer task stopped".to_string()))?
    };
    match timeout(deadline, write).await {
        Ok(result) => result,
        Err(_) => Err(RpcError::Timeout(format!(
            "write not completed within {:?}",
            deadline
        ))),
    }
}

async fn write_loop(
    generation: u64,
    mut write: SplitSink<WsStream, Message>,
    mut outbound: mpsc::Receiver<Outbound>,
    mut done: watch::Receiver<bool>,
) {
    loop {
        let command = tokio::select! {
            biased;
            command = outbound.recv() => match command {
                Some(command) => command,
                None => break,
            },
            _ = done.changed() => break,
        };
        let closing = matches!(command.message, Message::Close(_));
        let result = write
            .send(command.message)
            .await
            .map_err(|e| RpcError::WebsocketError(format!("write failed: {}", e)));
        let failed = result.is_err();
        if let Err(e) = &result {
            error!("WebSocket send error: {}. Stopping writer task.", e);
        }
        let _ = command.ack.send(result);
        if failed || closing {
            break;
        }
    }
    let _ = timeout(CLOSE_GRACE, write.close()).await;
    debug!("WebSocket writer task finished (generation {}).", generation);
}
