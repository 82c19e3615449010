// tests/transport.rs

mod common;

use common::{echo_responder, eventually, notification_frame, MockRpcServer};
use parking_lot::Mutex;
use rpc_connector_rs::websocket::{
    ConnectionState, Notification, Response, Transport, TransportListener, TransportOptions,
};
use rpc_connector_rs::RpcError;
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::time::Duration;
use tokio_test::{assert_err, assert_ok};

const WAIT: Duration = Duration::from_secs(5);
const WRITE: Duration = Duration::from_secs(1);

#[derive(Default)]
struct Recorder {
    responses: Mutex<Vec<Response>>,
    notifications: Mutex<Vec<Notification>>,
    errors: AtomicUsize,
    disconnects: AtomicUsize,
}

impl TransportListener for Recorder {
    fn on_response(&self, response: Response) {
        self.responses.lock().push(response);
    }

    fn on_notification(&self, notification: Notification) {
        self.notifications.lock().push(notification);
    }

    fn on_error(&self, _error: RpcError) {
        self.errors.fetch_add(1, Ordering::SeqCst);
    }

    fn on_disconnect(&self) {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
    }
}

async fn connected(server: &MockRpcServer) -> (Arc<Transport>, Arc<Recorder>) {
    let transport = Arc::new(assert_ok!(Transport::new(
        &server.url(),
        TransportOptions::default()
    )));
    let recorder = Arc::new(Recorder::default());
    transport.set_listener(recorder.clone());
    assert_ok!(transport.connect(WAIT).await);
    (transport, recorder)
}

#[tokio::test]
async fn test_send_requires_connection() {
    let transport = assert_ok!(Transport::new("ws://127.0.0.1:9", TransportOptions::default()));
    assert_eq!(transport.state(), ConnectionState::Disconnected);

    let err = assert_err!(transport.send("public/test", json!({}), WRITE).await);
    assert!(matches!(err, RpcError::NotConnected));
}

#[tokio::test]
async fn test_refused_dial_reports_dial_error() {
    let transport = Arc::new(assert_ok!(Transport::new(
        "ws://127.0.0.1:9",
        TransportOptions::default()
    )));
    let err = assert_err!(transport.connect(Duration::from_secs(2)).await);
    assert!(matches!(err, RpcError::DialError { .. }), "unexpected error: {:?}", err);
    assert_eq!(transport.state(), ConnectionState::Disconnected);
}

#[tokio::test]
async fn test_invalid_url_is_rejected() {
    let result = Transport::new("not a url", TransportOptions::default());
    assert!(matches!(result, Err(RpcError::UrlParseError(_))));
}

#[tokio::test]
async fn test_connect_is_noop_when_connected() {
    common::setup();
    let server = MockRpcServer::start(echo_responder()).await;
    let (transport, _recorder) = connected(&server).await;
    let generation = transport.generation();

    assert_ok!(transport.connect(WAIT).await);
    assert_eq!(transport.generation(), generation);
    assert_eq!(server.connections(), 1);
    transport.close().await;
}

#[tokio::test]
async fn test_frames_are_classified_for_listener() {
    common::setup();
    let server = MockRpcServer::start(echo_responder()).await;
    let (transport, recorder) = connected(&server).await;

    let id = assert_ok!(transport.send("public/get_time", json!({}), WRITE).await);
    server.push(notification_frame("ticker.BTC-PERP", json!({ "price": 1 })));
    server.push("{\"broken\":".to_string());

    eventually(WAIT, || {
        !recorder.responses.lock().is_empty()
            && !recorder.notifications.lock().is_empty()
            && recorder.errors.load(Ordering::SeqCst) == 1
    })
    .await;

    assert_eq!(recorder.responses.lock()[0].id, Some(id));
    assert_eq!(recorder.notifications.lock()[0].method, "ticker.BTC-PERP");
    assert!(transport.is_connected());
    transport.close().await;
}

#[tokio::test]
async fn test_ids_are_strictly_increasing() {
    common::setup();
    let server = MockRpcServer::start(echo_responder()).await;
    let (transport, _recorder) = connected(&server).await;

    let mut last = 0;
    for _ in 0..10 {
        let id = assert_ok!(transport.send("public/test", json!({}), WRITE).await);
        assert!(id > last);
        last = id;
    }
    transport.close().await;
}

#[tokio::test]
async fn test_peer_drop_fires_disconnect_once() {
    common::setup();
    let server = MockRpcServer::start(echo_responder()).await;
    let (transport, recorder) = connected(&server).await;

    server.drop_connections();

    eventually(WAIT, || recorder.disconnects.load(Ordering::SeqCst) == 1).await;
    assert_eq!(transport.state(), ConnectionState::Disconnected);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(recorder.disconnects.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_close_is_not_a_disconnect() {
    common::setup();
    let server = MockRpcServer::start(echo_responder()).await;
    let (transport, recorder) = connected(&server).await;

    transport.close().await;
    transport.close().await;
    assert_eq!(transport.state(), ConnectionState::Disconnected);

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(recorder.disconnects.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_reconnect_starts_new_generation() {
    common::setup();
    let server = MockRpcServer::start(echo_responder()).await;
    let (transport, recorder) = connected(&server).await;
    let first = transport.generation().unwrap();

    transport.close().await;
    assert_ok!(transport.connect(WAIT).await);
    let second = transport.generation().unwrap();
    assert!(second > first);

    // The retired generation's reader must not tear down the new connection.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(transport.is_connected());
    assert_eq!(recorder.disconnects.load(Ordering::SeqCst), 0);
    assert_ok!(transport.send("public/test", json!({}), WRITE).await);
    transport.close().await;
}

#[tokio::test]
async fn test_keepalive_pings_reach_peer_without_disturbing_traffic() {
    common::setup();
    let server = MockRpcServer::start(echo_responder()).await;
    let transport = Arc::new(assert_ok!(Transport::new(
        &server.url(),
        TransportOptions {
            ping_interval: Duration::from_millis(20),
            ..TransportOptions::default()
        }
    )));
    let recorder = Arc::new(Recorder::default());
    transport.set_listener(recorder.clone());
    assert_ok!(transport.connect(WAIT).await);

    eventually(WAIT, || server.pings() >= 2).await;
    assert_ok!(transport.send("public/test", json!({}), WRITE).await);
    eventually(WAIT, || recorder.responses.lock().len() == 1).await;
    assert_eq!(recorder.errors.load(Ordering::SeqCst), 0);
    transport.close().await;
}

#[tokio::test]
async fn test_zero_ping_interval_sends_no_pings() {
    common::setup();
    let server = MockRpcServer::start(echo_responder()).await;
    let transport = Arc::new(assert_ok!(Transport::new(
        &server.url(),
        TransportOptions {
            ping_interval: Duration::ZERO,
            ..TransportOptions::default()
        }
    )));
    assert_ok!(transport.connect(WAIT).await);

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(server.pings(), 0);
    assert!(transport.is_connected());
    transport.close().await;
}
