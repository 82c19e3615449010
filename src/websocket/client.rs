use crate::auth::Credentials;
use crate::config::ClientConfig;
use crate::error::{Result, RpcError};
use crate::websocket::codec::{Notification, Request, Response};
use crate::websocket::handler::ChannelHandler;
use crate::websocket::reconnect::{PostReconnectHook, ReconnectSupervisor};
use crate::websocket::transport::{Transport, TransportListener, TransportOptions};
use log::*;
use parking_lot::Mutex;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, OnceLock, Weak};
use std::time::Duration;
use tokio::sync::oneshot;

pub const LOGIN_METHOD: &str = "public/login";
pub const PUBLIC_SUBSCRIBE: &str = "public/subscribe";
pub const PUBLIC_UNSUBSCRIBE: &str = "public/unsubscribe";
pub const PRIVATE_SUBSCRIBE: &str = "private/subscribe";
pub const PRIVATE_UNSUBSCRIBE: &str = "private/unsubscribe";

/// Channel name prefixes of account-scoped streams.
pub const PRIVATE_CHANNEL_PREFIXES: &[&str] = &["account.", "session.", "mm."];

pub fn is_private_channel(channel: &str) -> bool {
    PRIVATE_CHANNEL_PREFIXES
        .iter()
        .any(|prefix| channel.starts_with(prefix))
}

type PendingCalls = Mutex<HashMap<u64, oneshot::Sender<Response>>>;

struct ClientInner {
    transport: Arc<Transport>,
    config: ClientConfig,
    credentials: Option<Credentials>,
    pending: PendingCalls,
    handlers: Mutex<HashMap<String, ChannelHandler>>,
    supervisor: OnceLock<Arc<ReconnectSupervisor>>,
}

/// JSON-RPC client over a persistent WebSocket.
///
/// Correlates responses to callers by request ID and routes notifications to
/// per-channel handlers. Cheap to clone; clones share one connection.
///
/// # Examples
///
/// ```no_run
/// use rpc_connector_rs::config::ClientConfig;
/// use rpc_connector_rs::websocket::{ChannelHandler, RpcClient};
/// use serde_json::{json, Value};
///
/// #[tokio::main]
/// async fn main() {
///     let config = ClientConfig::new("wss://example.com/ws/api/v2", "https://example.com/api/v2");
///     let client = RpcClient::connect(config, None).await.expect("Failed to connect");
///
///     let instruments: Value = client
///         .call("public/instruments", json!({}))
///         .await
///         .expect("Call failed");
///     println!("{}", instruments);
///
///     client
///         .subscribe("ticker.BTC-PERP.1000ms", ChannelHandler::value(|tick| println!("{}", tick)))
///         .await
///         .expect("Subscribe failed");
/// }
/// ```
#[derive(Clone)]
pub struct RpcClient {
    inner: Arc<ClientInner>,
}

impl RpcClient {
    /// Builds a client without dialing.
    pub fn new(config: ClientConfig, credentials: Option<Credentials>) -> Result<Self> {
        let transport = Arc::new(Transport::new(
            &config.ws_url,
            TransportOptions {
                ping_interval: config.ping_interval,
                max_message_size: config.max_message_size,
            },
        )?);

        let inner = Arc::new(ClientInner {
            transport: Arc::clone(&transport),
            config,
            credentials,
            pending: Mutex::new(HashMap::new()),
            handlers: Mutex::new(HashMap::new()),
            supervisor: OnceLock::new(),
        });

        transport.set_listener(Arc::new(ClientListener(Arc::downgrade(&inner))));

        if inner.config.reconnect.enabled {
            let supervisor = ReconnectSupervisor::new(
                transport,
                &inner.config.reconnect,
                inner.config.dial_timeout,
                Some(restore_hook(Arc::downgrade(&inner))),
            );
            let _ = inner.supervisor.set(Arc::new(supervisor));
        }

        Ok(Self { inner })
    }

    /// Builds a client, dials, logs in when credentials are set and starts
    /// reconnect supervision.
    pub async fn connect(config: ClientConfig, credentials: Option<Credentials>) -> Result<Self> {
        let client = Self::new(config, credentials)?;
        client.open().await?;
        Ok(client)
    }

    /// Dials (if needed), logs in when credentials are set and starts supervision.
    pub async fn open(&self) -> Result<()> {
        self.inner
            .transport
            .connect(self.inner.config.dial_timeout)
            .await?;
        if self.inner.credentials.is_some() {
            if let Err(e) = self.login().await {
                self.inner.transport.close().await;
                return Err(e);
            }
        }
        if let Some(supervisor) = self.inner.supervisor.get() {
            supervisor.start();
        }
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.inner.transport.is_connected()
    }

    pub fn transport(&self) -> &Arc<Transport> {
        &self.inner.transport
    }

    pub fn supervisor(&self) -> Option<&Arc<ReconnectSupervisor>> {
        self.inner.supervisor.get()
    }

    /// Number of calls currently awaiting a response.
    pub fn pending_calls(&self) -> usize {
        self.inner.pending.lock().len()
    }

    /// Channels with a registered handler.
    pub fn channels(&self) -> Vec<String> {
        self.inner.handlers.lock().keys().cloned().collect()
    }

    /// Sends a call and waits for its result, decoded as `R`.
    ///
    /// Waits until the response arrives or the connection is torn down.
    /// Dropping the returned future abandons the wait. An absent result decodes
    /// from `null`, so use `()` or `Option<T>` when the method may return none.
    pub async fn call<P, R>(&self, method: &str, params: P) -> Result<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        self.call_until(method, params, std::future::pending()).await
    }

    /// [`call`](Self::call) bounded by `wait`; fails with [`RpcError::Timeout`].
    pub async fn call_with_timeout<P, R>(&self, method: &str, params: P, wait: Duration) -> Result<R>
    where
        P: Serialize,
        R: DeserializeOwned,
    {
        self.call_until(method, params, expiry(method, wait)).await
    }

    /// [`call`](Self::call) that gives up when `cancel` resolves, returning its error.
    pub async fn call_until<P, R, C>(&self, method: &str, params: P, cancel: C) -> Result<R>
    where
        P: Serialize,
        R: DeserializeOwned,
        C: Future<Output = RpcError>,
    {
        let result = self.call_raw_until(method, params, cancel).await?;
        Ok(serde_json::from_value(result.unwrap_or(Value::Null))?)
    }

    /// Sends a call and returns the untyped result, `None` when absent.
    pub async fn call_raw<P: Serialize>(&self, method: &str, params: P) -> Result<Option<Value>> {
        self.call_raw_until(method, params, std::future::pending())
            .await
    }

    pub async fn call_raw_until<P, C>(
        &self,
        method: &str,
        params: P,
        cancel: C,
    ) -> Result<Option<Value>>
    where
        P: Serialize,
        C: Future<Output = RpcError>,
    {
        let params = serde_json::to_value(params)?;
        let request = Request::new(self.inner.transport.next_id(), method, params);

        // Registered before the write so a fast reply cannot miss its waiter.
        let (tx, rx) = oneshot::channel();
        self.inner.pending.lock().insert(request.id, tx);
        let _pending = PendingGuard {
            id: request.id,
            pending: &self.inner.pending,
        };

        self.inner
            .transport
            .send_request(&request, self.inner.config.write_timeout)
            .await?;
        debug!("Call {} ({}) sent, waiting for response", request.id, method);

        tokio::pin!(cancel);
        let response = tokio::select! {
            cause = &mut cancel => {
                debug!("Call {} ({}) abandoned: {}", request.id, method, cause);
                return Err(cause);
            }
            response = rx => response.map_err(|_| RpcError::ConnectionClosed)?,
        };

        if let Some(error) = response.error {
            return Err(RpcError::ApiError {
                code: error.code,
                message: error.message,
            });
        }
        Ok(response.result)
    }

    /// Authenticates the session with a fresh token from the credentials.
    pub async fn login(&self) -> Result<()> {
        let credentials = self.inner.credentials.as_ref().ok_or_else(|| {
            RpcError::AuthenticationError("no credentials configured".to_string())
        })?;
        let mut params = json!({ "token": credentials.token()? });
        if let Some(account) = credentials.account() {
            params["account"] = Value::String(account.to_string());
        }
        self.control_call(LOGIN_METHOD, params).await?;
        info!("Logged in");
        Ok(())
    }

    /// Registers `handler` for `channel` without any wire traffic.
    /// Replaces an existing handler for the same channel.
    pub fn register_handler(&self, channel: impl Into<String>, handler: ChannelHandler) {
        self.inner.handlers.lock().insert(channel.into(), handler);
    }

    pub fn remove_handler(&self, channel: &str) -> Option<ChannelHandler> {
        self.inner.handlers.lock().remove(channel)
    }

    /// Registers `handler` and subscribes to `channel`.
    ///
    /// The registration is rolled back if the subscribe call fails.
    pub async fn subscribe(&self, channel: &str, handler: ChannelHandler) -> Result<()> {
        self.register_handler(channel, handler);
        let method = if is_private_channel(channel) {
            PRIVATE_SUBSCRIBE
        } else {
            PUBLIC_SUBSCRIBE
        };
        if let Err(e) = self.control_call(method, json!({ "channels": [channel] })).await {
            self.remove_handler(channel);
            return Err(e);
        }
        Ok(())
    }

    /// Removes the handler for `channel` and unsubscribes from it.
    pub async fn unsubscribe(&self, channel: &str) -> Result<()> {
        self.remove_handler(channel);
        let method = if is_private_channel(channel) {
            PRIVATE_UNSUBSCRIBE
        } else {
            PUBLIC_UNSUBSCRIBE
        };
        self.control_call(method, json!({ "channels": [channel] }))
            .await?;
        Ok(())
    }

    /// Re-authenticates (when credentials are set) and reissues subscriptions
    /// for every registered channel. Used as the post-reconnect hook.
    pub async fn restore_session(&self) -> Result<()> {
        if self.inner.credentials.is_some() {
            self.login().await?;
        }

        let (private, public): (Vec<String>, Vec<String>) = self
            .channels()
            .into_iter()
            .partition(|channel| is_private_channel(channel));

        if !private.is_empty() {
            info!("Resubscribing to {} private channels...", private.len());
            self.control_call(PRIVATE_SUBSCRIBE, json!({ "channels": private }))
                .await?;
        }
        if !public.is_empty() {
            info!("Resubscribing to {} public channels...", public.len());
            self.control_call(PUBLIC_SUBSCRIBE, json!({ "channels": public }))
                .await?;
        }
        Ok(())
    }

    /// Login and subscription traffic, bounded by `request_timeout`.
    async fn control_call(&self, method: &str, params: Value) -> Result<Option<Value>> {
        let wait = self.inner.config.request_timeout;
        self.call_raw_until(method, params, expiry(method, wait))
            .await
    }

    /// Stops reconnect supervision, closes the socket and fails every
    /// outstanding call with [`RpcError::ConnectionClosed`]. Idempotent.
    pub async fn close(&self) {
        info!("Stopping WebSocket client...");
        if let Some(supervisor) = self.inner.supervisor.get() {
            supervisor.stop();
        }
        self.inner.transport.close().await;
        self.inner.fail_pending();
    }
}

impl ClientInner {
    fn fail_pending(&self) {
        let drained: Vec<_> = self.pending.lock().drain().collect();
        if !drained.is_empty() {
            warn!("Failing {} outstanding calls: connection closed", drained.len());
        }
        // Dropping the senders resolves each waiter with ConnectionClosed.
        drop(drained);
    }

    fn deliver(&self, response: Response) {
        let Some(id) = response.id else {
            debug!("Dropping response without id: {:?}", response.error);
            return;
        };
        let waiter = self.pending.lock().remove(&id);
        match waiter {
            Some(tx) => {
                let _ = tx.send(response);
            }
            None => trace!("Dropping response for unknown call id {}", id),
        }
    }

    fn route(&self, notification: Notification) {
        let handler = self.handlers.lock().get(&notification.method).cloned();
        let Some(handler) = handler else {
            trace!("No handler for channel {}", notification.method);
            return;
        };
        let Notification { method, params } = notification;
        tokio::spawn(async move {
            if let Err(e) = handler.dispatch(params) {
                debug!("Dropping notification on {}: {}", method, e);
            }
        });
    }
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        if let Some(supervisor) = self.supervisor.get() {
            supervisor.stop();
        }
        // The socket tasks keep the transport alive; release them too.
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            let transport = Arc::clone(&self.transport);
            runtime.spawn(async move { transport.close().await });
        }
    }
}

/// Removes the pending entry however the call ends, including when the
/// caller's future is dropped.
struct PendingGuard<'a> {
    id: u64,
    pending: &'a PendingCalls,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.pending.lock().remove(&self.id);
    }
}

struct ClientListener(Weak<ClientInner>);

impl TransportListener for ClientListener {
    fn on_response(&self, response: Response) {
        if let Some(inner) = self.0.upgrade() {
            inner.deliver(response);
        }
    }

    fn on_notification(&self, notification: Notification) {
        if let Some(inner) = self.0.upgrade() {
            inner.route(notification);
        }
    }

    fn on_error(&self, error: RpcError) {
        warn!("WebSocket error: {}", error);
    }

    fn on_disconnect(&self) {
        let Some(inner) = self.0.upgrade() else {
            return;
        };
        warn!("WebSocket disconnected from {}", inner.transport.url());
        inner.fail_pending();
        if let Some(supervisor) = inner.supervisor.get() {
            supervisor.spawn_reconnect();
        }
    }
}

fn expiry(method: &str, wait: Duration) -> impl Future<Output = RpcError> {
    let method = method.to_string();
    async move {
        tokio::time::sleep(wait).await;
        RpcError::Timeout(format!("{} got no response within {:?}", method, wait))
    }
}

fn restore_hook(inner: Weak<ClientInner>) -> PostReconnectHook {
    Arc::new(move || {
        let inner = inner.clone();
        Box::pin(async move {
            match inner.upgrade() {
                Some(inner) => RpcClient { inner }.restore_session().await,
                None => Err(RpcError::Cancelled("client dropped".to_string())),
            }
        })
    })
}
