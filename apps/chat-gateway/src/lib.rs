pub mod bridge;
pub mod config;
pub mod error;
pub mod gateway;
pub mod routes;

use std::sync::Arc;

use bridge::PubSubBridge;
use config::Config;
use gateway::registry::ConnectionRegistry;

/// Shared application state available to all handlers.
///
/// The bridge is constructed once (in `main` or a test harness) and passed
/// in here explicitly — nothing reaches for an ambient singleton, and every
/// gateway sharing this state shares the one broker connection pair.
#[derive(Clone)]
pub struct AppState {
    pub bridge: Arc<PubSubBridge>,
    pub registry: Arc<ConnectionRegistry>,
    pub config: Arc<Config>,
}
