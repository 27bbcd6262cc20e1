use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio::time;
use tokio_tungstenite::tungstenite;

use chat_gateway::bridge::broker::{Broker, MemoryBroker};
use chat_gateway::bridge::PubSubBridge;
use chat_gateway::config::Config;
use chat_gateway::error::BridgeError;
use chat_gateway::gateway::registry::ConnectionRegistry;
use chat_gateway::AppState;

pub type WsClient =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Wraps the in-memory broker and counts broker-level operations, so tests
/// can assert that a rejected message never reached the broker.
pub struct CountingBroker {
    inner: Arc<MemoryBroker>,
    pub publishes: AtomicUsize,
    pub subscribes: AtomicUsize,
    pub unsubscribes: AtomicUsize,
}

#[async_trait]
impl Broker for CountingBroker {
    async fn publish(&self, channel: &str, payload: &str) -> Result<(), BridgeError> {
        self.publishes.fetch_add(1, Ordering::SeqCst);
        self.inner.publish(channel, payload).await
    }

    async fn subscribe(&self, channel: &str) -> Result<(), BridgeError> {
        self.subscribes.fetch_add(1, Ordering::SeqCst);
        self.inner.subscribe(channel).await
    }

    async fn unsubscribe(&self, channel: &str) -> Result<(), BridgeError> {
        self.unsubscribes.fetch_add(1, Ordering::SeqCst);
        self.inner.unsubscribe(channel).await
    }
}

/// Build an `AppState` over the in-memory broker.
pub fn test_state() -> (AppState, Arc<CountingBroker>) {
    let (memory, incoming) = MemoryBroker::new();
    let spy = Arc::new(CountingBroker {
        inner: memory,
        publishes: AtomicUsize::new(0),
        subscribes: AtomicUsize::new(0),
        unsubscribes: AtomicUsize::new(0),
    });
    let bridge = PubSubBridge::new(Arc::clone(&spy) as Arc<dyn Broker>, incoming, None);
    let state = AppState {
        bridge,
        registry: Arc::new(ConnectionRegistry::new()),
        config: Arc::new(Config {
            port: 0,
            broker_url: None,
        }),
    };
    (state, spy)
}

/// Start an actual TCP server for WebSocket testing. The server runs in
/// the background.
pub async fn start_ws_server() -> (SocketAddr, AppState, Arc<CountingBroker>) {
    let (state, spy) = test_state();
    let app = chat_gateway::routes::router().with_state(state.clone());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    (addr, state, spy)
}

/// Connect a client and consume the plain-text welcome greeting.
pub async fn connect(addr: SocketAddr) -> WsClient {
    let url = format!("ws://{addr}/");
    let (mut ws, _) = tokio_tungstenite::connect_async(&url)
        .await
        .expect("ws connect");

    let msg = time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("timeout waiting for welcome")
        .expect("stream ended")
        .expect("ws read error");
    let text = msg.into_text().expect("welcome should be text");
    assert_eq!(&*text, "Welcome to the chat server!");

    ws
}

/// Send one JSON frame.
pub async fn send_json(ws: &mut WsClient, value: serde_json::Value) {
    ws.send(tungstenite::Message::Text(value.to_string().into()))
        .await
        .expect("ws send");
}

/// Read the next text frame as JSON.
pub async fn recv_json(ws: &mut WsClient) -> serde_json::Value {
    let msg = time::timeout(Duration::from_secs(5), ws.next())
        .await
        .expect("timeout waiting for frame")
        .expect("stream ended")
        .expect("ws read error");
    let text = msg.into_text().expect("not text");
    serde_json::from_str(&text).expect("frame should be JSON")
}

/// Read frames until one carries the given `event`, skipping others
/// (acks arrive interleaved with relayed traffic).
pub async fn recv_event(ws: &mut WsClient, event: &str) -> serde_json::Value {
    for _ in 0..10 {
        let frame = recv_json(ws).await;
        if frame["event"] == event {
            return frame;
        }
    }
    panic!("no {event} frame within 10 frames");
}

/// Assert that no frame arrives within the window.
pub async fn assert_silent(ws: &mut WsClient, window: Duration) {
    let result = time::timeout(window, ws.next()).await;
    assert!(
        result.is_err(),
        "expected silence, got: {:?}",
        result.unwrap()
    );
}
