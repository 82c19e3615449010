use crate::error::{Result, RpcError};
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

const DEFAULT_DIAL_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_PING_INTERVAL_MS: u64 = 15_000;
const DEFAULT_WRITE_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_REQUEST_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_HTTP_TIMEOUT_MS: u64 = 10_000;
const DEFAULT_MAX_RETRIES: u32 = 3;
const DEFAULT_RETRY_BASE_WAIT_MS: u64 = 500;
// Order book snapshots for wide instruments routinely exceed tungstenite's 16 MiB default.
const DEFAULT_MAX_MESSAGE_SIZE: usize = 64 << 20;

const ENV_PREFIX: &str = "RPC_CONNECTOR_";

/// Reconnect policy consumed by [`crate::websocket::ReconnectSupervisor`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReconnectConfig {
    pub enabled: bool,
    /// Attempt bound per reconnect cycle, `0` means unbounded.
    pub max_attempts: u32,
    pub base_wait: Duration,
    pub max_wait: Duration,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 10,
            base_wait: Duration::from_secs(1),
            max_wait: Duration::from_secs(30),
        }
    }
}

impl ReconnectConfig {
    pub fn attempt_bound(&self) -> Option<u32> {
        (self.max_attempts > 0).then_some(self.max_attempts)
    }
}

/// Settings shared by the WebSocket client and the HTTP executor.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientConfig {
    pub ws_url: String,
    pub rest_url: String,
    pub dial_timeout: Duration,
    pub ping_interval: Duration,
    /// Deadline for writing a single frame (not for waiting on the reply).
    pub write_timeout: Duration,
    /// Reply deadline for the login and subscription calls the client issues
    /// itself, including the ones replayed after a reconnect.
    pub request_timeout: Duration,
    pub max_message_size: usize,
    pub http_timeout: Duration,
    pub max_retries: u32,
    pub retry_base_wait: Duration,
    pub reconnect: ReconnectConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ws_url: "ws://127.0.0.1:8080/ws".to_string(),
            rest_url: "http://127.0.0.1:8080".to_string(),
            dial_timeout: Duration::from_millis(DEFAULT_DIAL_TIMEOUT_MS),
            ping_interval: Duration::from_millis(DEFAULT_PING_INTERVAL_MS),
            write_timeout: Duration::from_millis(DEFAULT_WRITE_TIMEOUT_MS),
            request_timeout: Duration::from_millis(DEFAULT_REQUEST_TIMEOUT_MS),
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            http_timeout: Duration::from_millis(DEFAULT_HTTP_TIMEOUT_MS),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_wait: Duration::from_millis(DEFAULT_RETRY_BASE_WAIT_MS),
            reconnect: ReconnectConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Default settings pointed at explicit endpoints.
    pub fn new(ws_url: impl Into<String>, rest_url: impl Into<String>) -> Self {
        Self {
            ws_url: ws_url.into(),
            rest_url: rest_url.into(),
            ..Self::default()
        }
    }

    /// Defaults overlaid with `RPC_CONNECTOR_*` environment variables.
    ///
    /// Durations are read as milliseconds. Recognised keys: `WS_URL`,
    /// `REST_URL`, `DIAL_TIMEOUT_MS`, `PING_INTERVAL_MS`, `WRITE_TIMEOUT_MS`,
    /// `REQUEST_TIMEOUT_MS`, `HTTP_TIMEOUT_MS`, `MAX_RETRIES`, `RETRY_BASE_WAIT_MS`,
    /// `RECONNECT`, `RECONNECT_MAX_ATTEMPTS`, `RECONNECT_BASE_WAIT_MS`,
    /// `RECONNECT_MAX_WAIT_MS`.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(format!("{}{}", ENV_PREFIX, key)).ok())
    }

    fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        if let Some(url) = lookup("WS_URL") {
            config.ws_url = url;
        }
        if let Some(url) = lookup("REST_URL") {
            config.rest_url = url;
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "DIAL_TIMEOUT_MS")? {
            config.dial_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "PING_INTERVAL_MS")? {
            config.ping_interval = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "WRITE_TIMEOUT_MS")? {
            config.write_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "REQUEST_TIMEOUT_MS")? {
            config.request_timeout = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "HTTP_TIMEOUT_MS")? {
            config.http_timeout = Duration::from_millis(ms);
        }
        if let Some(n) = parse_var(&lookup, "MAX_RETRIES")? {
            config.max_retries = n;
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "RETRY_BASE_WAIT_MS")? {
            config.retry_base_wait = Duration::from_millis(ms);
        }
        if let Some(enabled) = parse_var(&lookup, "RECONNECT")? {
            config.reconnect.enabled = enabled;
        }
        if let Some(n) = parse_var(&lookup, "RECONNECT_MAX_ATTEMPTS")? {
            config.reconnect.max_attempts = n;
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "RECONNECT_BASE_WAIT_MS")? {
            config.reconnect.base_wait = Duration::from_millis(ms);
        }
        if let Some(ms) = parse_var::<u64, _>(&lookup, "RECONNECT_MAX_WAIT_MS")? {
            config.reconnect.max_wait = Duration::from_millis(ms);
        }
        Ok(config)
    }
}

fn parse_var<T, F>(lookup: &F, key: &str) -> Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw.trim().parse::<T>().map(Some).map_err(|e| {
            RpcError::ConfigError(format!(
                "invalid value '{}' for {}{}: {}",
                raw, ENV_PREFIX, key, e
            ))
        }),
    }
}
