use crate::backoff::ExponentialBackoff;
use crate::config::ReconnectConfig;
use crate::error::{Result, RpcError};
use crate::websocket::transport::Transport;
use futures_util::future::{BoxFuture, FutureExt};
use log::*;
use parking_lot::Mutex;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::sleep;

/// Runs after a physical reconnect succeeds (re-authenticate, re-subscribe).
/// A failure tears the fresh connection down and counts as a failed attempt.
pub type PostReconnectHook = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Drives reconnect attempts for one [`Transport`].
pub struct ReconnectSupervisor {
    transport: Arc<Transport>,
    max_attempts: Option<u32>,
    backoff: ExponentialBackoff,
    dial_timeout: Duration,
    hook: Option<PostReconnectHook>,
    stop: Mutex<Option<watch::Sender<bool>>>,
    in_flight: AtomicBool,
    retrigger: AtomicBool,
}

impl ReconnectSupervisor {
    pub fn new(
        transport: Arc<Transport>,
        config: &ReconnectConfig,
        dial_timeout: Duration,
        hook: Option<PostReconnectHook>,
    ) -> Self {
        Self {
            transport,
            max_attempts: config.attempt_bound(),
            backoff: ExponentialBackoff::new(config.base_wait).with_max(config.max_wait),
            dial_timeout,
            hook,
            stop: Mutex::new(None),
            in_flight: AtomicBool::new(false),
            retrigger: AtomicBool::new(false),
        }
    }

    /// Begins supervision. Starting a running supervisor is a no-op.
    pub fn start(&self) {
        let mut stop = self.stop.lock();
        if stop.is_none() {
            let (tx, _rx) = watch::channel(false);
            *stop = Some(tx);
            debug!("Reconnect supervisor started for {}", self.transport.url());
        }
    }

    /// Ends supervision and cancels any attempt loop waiting in backoff.
    /// Safe to call repeatedly.
    pub fn stop(&self) {
        if let Some(tx) = self.stop.lock().take() {
            let _ = tx.send(true);
            debug!("Reconnect supervisor stopped for {}", self.transport.url());
        }
    }

    pub fn is_running(&self) -> bool {
        self.stop.lock().is_some()
    }

    pub fn max_attempts(&self) -> Option<u32> {
        self.max_attempts
    }

    /// Spawns an attempt loop unless one is already running or supervision is stopped.
    ///
    /// A disconnect observed while a loop is in flight is not dropped: the loop
    /// runs again if it ends without a live connection.
    pub fn spawn_reconnect(self: &Arc<Self>) {
        if !self.is_running() {
            debug!("Disconnect observed while supervisor is stopped, not reconnecting");
            return;
        }
        // Must be set before checking in_flight.
        self.retrigger.store(true, Ordering::SeqCst);
        if self.in_flight.swap(true, Ordering::SeqCst) {
            debug!("Reconnect already in progress, flagged for re-check");
            return;
        }
        let supervisor = Arc::clone(self);
        tokio::spawn(async move {
            loop {
                supervisor.retrigger.store(false, Ordering::SeqCst);
                match supervisor.trigger_reconnect().await {
                    Ok(()) if supervisor.needs_reconnect() => {
                        warn!("[Reconnect] Connection lost again right after restore, reconnecting");
                        continue;
                    }
                    Ok(()) => {}
                    Err(e) => error!("Reconnect gave up: {}", e),
                }
                supervisor.in_flight.store(false, Ordering::SeqCst);
                // A disconnect that raced with the release above.
                if supervisor.retrigger.swap(false, Ordering::SeqCst)
                    && supervisor.needs_reconnect()
                    && !supervisor.in_flight.swap(true, Ordering::SeqCst)
                {
                    continue;
                }
                break;
            }
        });
    }

    fn needs_reconnect(&self) -> bool {
        self.is_running() && !self.transport.is_connected()
    }

    /// Runs the attempt loop until reconnected, out of attempts, or stopped.
    pub async fn trigger_reconnect(&self) -> Result<()> {
        let stopped = self.stopped();
        self.trigger_reconnect_until(stopped).await
    }

    /// Like [`trigger_reconnect`](Self::trigger_reconnect), with a caller-supplied
    /// cancellation. If `cancel` resolves during a backoff wait, its error is
    /// returned as is.
    pub async fn trigger_reconnect_until<C>(&self, cancel: C) -> Result<()>
    where
        C: Future<Output = RpcError>,
    {
        tokio::pin!(cancel);
        let mut attempt: u32 = 0;
        loop {
            attempt += 1;
            if let Some(max) = self.max_attempts {
                if attempt > max {
                    error!("[Reconnect] Max attempts ({}) reached. Stopping.", max);
                    return Err(RpcError::MaxAttemptsExceeded { attempts: max });
                }
            }

            let wait = self.backoff.delay(attempt);
            warn!(
                "[Reconnect] Attempt {} to {} in {:?}...",
                attempt,
                self.transport.url(),
                wait
            );
            tokio::select! {
                cause = &mut cancel => return Err(cause),
                _ = sleep(wait) => {}
            }

            if let Err(e) = self.transport.connect(self.dial_timeout).await {
                warn!("[Reconnect] Attempt {} failed: {}", attempt, e);
                continue;
            }
            // Cancelled while dialing: do not leave a connection behind.
            if let Some(cause) = (&mut cancel).now_or_never() {
                self.transport.close().await;
                return Err(cause);
            }

            if let Some(hook) = &self.hook {
                if let Err(e) = hook().await {
                    warn!(
                        "[Reconnect] Post-reconnect hook failed on attempt {}: {}",
                        attempt, e
                    );
                    self.transport.close().await;
                    continue;
                }
            }

            info!("[Reconnect] Connection restored after {} attempt(s).", attempt);
            return Ok(());
        }
    }

    /// Resolves once `stop()` is called; never resolves if not started.
    fn stopped(&self) -> impl Future<Output = RpcError> + Send + 'static {
        let rx = self.stop.lock().as_ref().map(|tx| tx.subscribe());
        async move {
            match rx {
                Some(mut rx) => {
                    while !*rx.borrow() {
                        if rx.changed().await.is_err() {
                            break;
                        }
                    }
                }
                None => std::future::pending::<()>().await,
            }
            RpcError::Cancelled("reconnect supervisor stopped".to_string())
        }
    }
}
