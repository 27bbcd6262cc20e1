//! Per-socket connection handle.

use tokio::sync::mpsc;

use chat_common::Envelope;

/// Handle to one live socket, owned by its event loop for the lifetime of
/// the connection (created on accept, gone after the close sweep).
///
/// Lifecycle: `Connecting` covers the upgrade window before the connection
/// is registered; registration opens it; removal from the registry is the
/// terminal close. Handlers only ever see an open connection.
pub struct Connection {
    /// Unique connection identifier (`conn_` prefixed ULID).
    pub conn_id: String,
    /// Queue drained by the socket's write half.
    outbound: mpsc::UnboundedSender<Envelope>,
}

impl Connection {
    pub fn new(conn_id: String, outbound: mpsc::UnboundedSender<Envelope>) -> Self {
        Self { conn_id, outbound }
    }

    /// Enqueue an envelope for this socket. Never blocks; a send after the
    /// write half is gone is quietly dropped (the loop is already closing).
    pub fn send(&self, envelope: Envelope) {
        if self.outbound.send(envelope).is_err() {
            tracing::debug!(conn_id = %self.conn_id, "outbound queue closed; dropping envelope");
        }
    }

    /// Clone of the outbound sender, for bridge callbacks bound to this
    /// connection.
    pub fn outbound(&self) -> mpsc::UnboundedSender<Envelope> {
        self.outbound.clone()
    }
}
