/// Gateway configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Port the WebSocket server binds to.
    pub port: u16,
    /// Broker connection string (e.g. `redis://localhost:6379/0`). Unset
    /// means the in-process loopback broker — fine for a single instance,
    /// no cross-instance fan-out.
    pub broker_url: Option<String>,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self {
            port: std::env::var("PORT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(4000),
            broker_url: std::env::var("BROKER_URL").ok().filter(|s| !s.is_empty()),
        }
    }
}
