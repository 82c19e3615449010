use reqwest::header::HeaderMap;
use reqwest::StatusCode;
use serde_json::Value;
use thiserror::Error;
use url::ParseError;

pub type Result<T, E = RpcError> = std::result::Result<T, E>;

#[derive(Error, Debug)]
pub enum RpcError {
    #[error("Client Error: status={status}, code={code}, message={message}, data={data:?}")]
    ClientError {
        status: StatusCode,
        code: i64,
        message: String,
        data: Option<Value>,
        header: HeaderMap,
    },

    #[error("Server Error: status={status}, code={code}, message={message}")]
    ServerError {
        status: StatusCode,
        code: i64,
        message: String,
        header: HeaderMap,
    },

    /// Error object reported by the peer inside a well-formed response.
    #[error("API Error: code={code}, message={message}")]
    ApiError { code: i64, message: String },

    #[error("Dial Error: could not connect to {url}: {reason}")]
    DialError { url: String, reason: String },

    #[error("WebSocket Error: {0}")]
    WebsocketError(String),

    #[error("Not connected")]
    NotConnected,

    /// Raised to callers whose wait was outstanding when the connection tore down.
    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Decode Error: {reason}: {source}")]
    DecodeError {
        reason: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Timeout: {0}")]
    Timeout(String),

    #[error("Cancelled: {0}")]
    Cancelled(String),

    #[error("Max retries exceeded after {attempts} attempts: {last}")]
    MaxRetriesExceeded {
        attempts: u32,
        #[source]
        last: Box<RpcError>,
    },

    #[error("Reconnect failed: max attempts ({attempts}) exceeded")]
    MaxAttemptsExceeded { attempts: u32 },

    #[error("Authentication Error: {0}")]
    AuthenticationError(String),

    #[error("Configuration Error: {0}")]
    ConfigError(String),

    #[error("HTTP Request Error: {0}")]
    ReqwestError(#[from] reqwest::Error),

    #[error("JSON Serialization/Deserialization Error: {0}")]
    SerdeError(#[from] serde_json::Error),

    #[error("Query Encoding Error: {0}")]
    QueryEncodeError(#[from] serde_qs::Error),

    #[error("URL Parsing Error: {0}")]
    UrlParseError(#[from] ParseError),

    #[error("Invalid HTTP Header Value: {0}")]
    InvalidHeaderValue(#[from] reqwest::header::InvalidHeaderValue),
}

impl RpcError {
    /// Whether the HTTP executor should try the exchange again.
    ///
    /// Network-level failures and 5xx responses are retryable; client errors,
    /// API errors and local encode/decode failures are terminal.
    pub fn is_retryable(&self) -> bool {
        match self {
            RpcError::ServerError { .. } => true,
            RpcError::ReqwestError(e) => !e.is_builder() && !e.is_decode(),
            _ => false,
        }
    }

    /// The `(code, message)` pair when the peer reported a structured error.
    pub fn api_error(&self) -> Option<(i64, &str)> {
        match self {
            RpcError::ApiError { code, message }
            | RpcError::ClientError { code, message, .. }
            | RpcError::ServerError { code, message, .. } => Some((*code, message.as_str())),
            _ => None,
        }
    }
}
