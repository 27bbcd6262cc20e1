use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::mpsc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use chat_gateway::bridge::broker::{Broker, BrokerMessage, MemoryBroker, RedisBroker};
use chat_gateway::bridge::{PubSubBridge, TrafficObserver};
use chat_gateway::config::Config;
use chat_gateway::gateway::registry::ConnectionRegistry;
use chat_gateway::AppState;

#[tokio::main]
async fn main() {
    // Load .env file (silently skip if missing — env vars may be set externally)
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env();
    let port = config.port;

    // The process-wide broker connection pair: Redis when configured,
    // in-process loopback otherwise.
    let (broker, incoming): (Arc<dyn Broker>, mpsc::UnboundedReceiver<BrokerMessage>) =
        match &config.broker_url {
            Some(url) => {
                let (broker, incoming) = RedisBroker::connect(url)
                    .await
                    .expect("failed to connect to broker");
                tracing::info!(%url, "connected to broker");
                (broker, incoming)
            }
            None => {
                tracing::warn!("BROKER_URL not set; using in-process broker (no cross-instance fan-out)");
                let (broker, incoming) = MemoryBroker::new();
                (broker, incoming)
            }
        };

    // Diagnostic wildcard view of all group traffic.
    let observer: TrafficObserver = Box::new(|group_id, payload| {
        tracing::debug!(%group_id, sender_id = %payload.sender_id, "group traffic");
    });
    let bridge = PubSubBridge::new(broker, incoming, Some(observer));

    let state = AppState {
        bridge,
        registry: Arc::new(ConnectionRegistry::new()),
        config: Arc::new(config),
    };

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = chat_gateway::routes::router()
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    tracing::info!(%addr, "chat-gateway listening");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("failed to bind");
    axum::serve(listener, app).await.expect("server error");
}
