use std::fmt;

/// Errors surfaced by the Pub/Sub bridge to its callers.
///
/// A failed publish or subscribe is reported to the connection that asked
/// for it (as an `error` envelope); it never takes the gateway down.
#[derive(Debug)]
pub enum BridgeError {
    /// The broker rejected or failed an operation.
    Broker(String),
    /// A channel payload could not be serialized or parsed.
    Payload(serde_json::Error),
}

impl fmt::Display for BridgeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BridgeError::Broker(msg) => write!(f, "broker error: {msg}"),
            BridgeError::Payload(err) => write!(f, "payload error: {err}"),
        }
    }
}

impl std::error::Error for BridgeError {}

impl From<redis::RedisError> for BridgeError {
    fn from(err: redis::RedisError) -> Self {
        BridgeError::Broker(err.to_string())
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        BridgeError::Payload(err)
    }
}
