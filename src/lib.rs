pub mod auth;
pub mod backoff;
pub mod config;
pub mod error;
pub mod rest;
pub mod websocket;
pub use error::{Result, RpcError};
