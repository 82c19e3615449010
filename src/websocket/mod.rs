//! JSON-RPC client over a persistent WebSocket connection.
//!
//! The module is layered leaf-first:
//!
//! - [`codec`]: JSON-RPC 2.0 framing, classifying inbound frames as responses or notifications
//! - [`RequestIdGenerator`]: monotonic call IDs shared by every connection of a transport
//! - [`Transport`]: owns the socket, runs the read, write and keepalive tasks, reports to a
//!   [`TransportListener`]
//! - [`ReconnectSupervisor`]: capped exponential backoff reconnects with a post-reconnect hook
//! - [`RpcClient`]: send-and-await calls correlated by ID, plus a channel-keyed handler registry
//!
//! # Architecture
//!
//! Each successful dial mints a connection generation with its own shutdown signal. The reader,
//! writer and pinger tasks of that generation only watch their own signal, so a reconnect never
//! races with the shutdown of the connection it replaces.
//!
//! - Responses may arrive in any order; they are matched to waiters by `id`
//! - A response for an unknown `id` is dropped (the caller gave up or it is a duplicate)
//! - Notifications are dispatched on their own task so a slow handler never stalls the reader
//! - On disconnect, outstanding calls fail with [`RpcError::ConnectionClosed`] and the
//!   supervisor reconnects, logs in again and resubscribes every registered channel
//!
//! # Usage
//!
//! ```no_run
//! use rpc_connector_rs::auth::Credentials;
//! use rpc_connector_rs::config::ClientConfig;
//! use rpc_connector_rs::websocket::{ChannelHandler, RpcClient};
//! use serde::Deserialize;
//! use serde_json::json;
//!
//! #[derive(Debug, Deserialize)]
//! struct OrderUpdate {
//!     order_id: String,
//!     status: String,
//! }
//!
//! #[tokio::main]
//! async fn main() {
//!     let config = ClientConfig::from_env().expect("Invalid configuration");
//!     let credentials = Credentials::from_token("your_token").with_account("your_account");
//!     let client = RpcClient::connect(config, Some(credentials))
//!         .await
//!         .expect("Failed to connect");
//!
//!     // Private channel: resubscribed with `private/subscribe` after a reconnect
//!     client
//!         .subscribe(
//!             "account.orders",
//!             ChannelHandler::typed(|update: OrderUpdate| println!("{:?}", update)),
//!         )
//!         .await
//!         .expect("Failed to subscribe");
//!
//!     let portfolio: serde_json::Value = client
//!         .call("private/portfolio", json!({}))
//!         .await
//!         .expect("Call failed");
//!     println!("{}", portfolio);
//!
//!     client.close().await;
//! }
//! ```
//!
//! [`RpcError::ConnectionClosed`]: crate::error::RpcError::ConnectionClosed

pub mod client;
pub mod codec;
pub mod handler;
pub mod id;
pub mod reconnect;
pub mod transport;

pub use client::{is_private_channel, RpcClient};
pub use codec::{ErrorObject, InboundMessage, Notification, Request, Response};
pub use handler::{ChannelHandler, PayloadKind};
pub use id::RequestIdGenerator;
pub use reconnect::{PostReconnectHook, ReconnectSupervisor};
pub use transport::{ConnectionState, Transport, TransportListener, TransportOptions};
