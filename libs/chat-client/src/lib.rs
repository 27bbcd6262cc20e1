//! Client connection state machine for the chat gateway.
//!
//! Owns one logical WebSocket: connect/reconnect with bounded exponential
//! backoff, and a ping/pong heartbeat that force-closes a silently dead
//! transport. Delivery is at-most-one-attempt per send while connected;
//! nothing is queued on the caller's behalf.

mod backoff;
mod task;

use std::sync::Arc;

use tokio::sync::{mpsc, watch};

use chat_common::id::{prefix, prefixed_ulid};
use chat_common::Envelope;

/// Tri-state connection status, suitable for a presence indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting,
    Connected,
}

/// Callback invoked for every relayed `groupMessage` / `directMessage`.
///
/// The gateway does not deduplicate the sender's own group messages; a
/// consumer that does not want self-echo compares `senderId` against
/// [`ChatClient::client_id`].
pub type MessageCallback = Arc<dyn Fn(Envelope) + Send + Sync>;

/// Instruction from the handle to the supervisor task.
pub(crate) enum Command {
    Send(Envelope),
    Shutdown,
}

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Gateway URL, e.g. `ws://localhost:4000`.
    pub url: String,
    /// Reconnects scheduled before the state goes terminal-disconnected.
    pub max_reconnect_attempts: u32,
    /// Base delay for exponential backoff (milliseconds).
    pub base_reconnect_delay_ms: u64,
    /// Maximum backoff delay (milliseconds).
    pub max_reconnect_delay_ms: u64,
    /// Heartbeat ping cadence (milliseconds).
    pub ping_interval_ms: u64,
    /// How long a ping may go unanswered (milliseconds).
    pub pong_timeout_ms: u64,
    /// Self-asserted sender identity, stable for this client instance.
    pub client_id: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: "ws://localhost:4000".to_string(),
            max_reconnect_attempts: 5,
            base_reconnect_delay_ms: 1000,
            max_reconnect_delay_ms: 30_000,
            ping_interval_ms: 15_000,
            pong_timeout_ms: 5000,
            client_id: prefixed_ulid(prefix::CLIENT),
        }
    }
}

/// Handle to one logical gateway connection.
///
/// All background activity (dialing, heartbeat, backoff waits) runs in a
/// supervisor task owned by this handle; [`ChatClient::shutdown`] or
/// exhausting the reconnect schedule ends that task and with it every
/// pending timer.
pub struct ChatClient {
    config: ClientConfig,
    on_message: MessageCallback,
    status_tx: watch::Sender<ConnectionStatus>,
    status_rx: watch::Receiver<ConnectionStatus>,
    command_tx: Option<mpsc::UnboundedSender<Command>>,
}

impl ChatClient {
    pub fn new(
        config: ClientConfig,
        on_message: impl Fn(Envelope) + Send + Sync + 'static,
    ) -> Self {
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Disconnected);
        Self {
            config,
            on_message: Arc::new(on_message),
            status_tx,
            status_rx,
            command_tx: None,
        }
    }

    /// The self-asserted sender identity this client stamps on messages.
    pub fn client_id(&self) -> &str {
        &self.config.client_id
    }

    /// Current connection status.
    pub fn status(&self) -> ConnectionStatus {
        *self.status_rx.borrow()
    }

    /// Watch the status as it changes (presence indicators).
    pub fn status_watch(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_rx.clone()
    }

    /// Start the connection, or restart it after a terminal disconnect.
    ///
    /// The live transport status is the guard: anything but `Disconnected`
    /// means an attempt is already in flight and the call is a no-op.
    pub fn connect(&mut self) {
        if self.status() != ConnectionStatus::Disconnected {
            tracing::debug!("already connecting or connected");
            return;
        }

        // Flip the status before the supervisor runs, so an immediate
        // second connect() sees the attempt in flight.
        let _ = self.status_tx.send(ConnectionStatus::Connecting);

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        self.command_tx = Some(command_tx);
        tokio::spawn(task::run(
            self.config.clone(),
            self.status_tx.clone(),
            command_rx,
            Arc::clone(&self.on_message),
        ));
    }

    /// Join a group; relayed traffic for it starts flowing to the message
    /// callback once the gateway acks.
    pub fn join_group(&self, group_id: &str) {
        self.send_if_connected(Envelope::JoinGroup {
            group_id: group_id.to_string(),
        });
    }

    /// Publish a message to a group. The sender hears its own message back
    /// if it joined the group.
    pub fn send_group_message(&self, group_id: &str, message: &str) {
        self.send_if_connected(Envelope::GroupMessage {
            group_id: group_id.to_string(),
            message: message.to_string(),
            sender_id: self.config.client_id.clone(),
        });
    }

    /// Send a direct message. The gateway currently echoes it back to this
    /// client's own socket only.
    pub fn send_direct_message(&self, message: &str) {
        self.send_if_connected(Envelope::DirectMessage {
            message: message.to_string(),
            sender_id: self.config.client_id.clone(),
        });
    }

    /// Tear down: the supervisor closes the socket and exits without
    /// scheduling a reconnect; no timer or callback fires afterwards.
    pub fn shutdown(&mut self) {
        if let Some(command_tx) = self.command_tx.take() {
            let _ = command_tx.send(Command::Shutdown);
        }
    }

    /// At most one attempt per call: warn and drop unless Connected.
    fn send_if_connected(&self, envelope: Envelope) {
        if self.status() != ConnectionStatus::Connected {
            tracing::warn!("socket is not connected; dropping send");
            return;
        }
        let Some(command_tx) = &self.command_tx else {
            tracing::warn!("socket is not connected; dropping send");
            return;
        };
        if command_tx.send(Command::Send(envelope)).is_err() {
            tracing::warn!("connection task is gone; dropping send");
        }
    }
}

impl Drop for ChatClient {
    fn drop(&mut self) {
        // Dropping command_tx closes the channel; the supervisor treats
        // that as a shutdown.
        self.command_tx.take();
    }
}
