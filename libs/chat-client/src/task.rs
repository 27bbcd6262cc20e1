//! Supervisor task: owns the socket, the reconnect loop, and the
//! heartbeat. Everything time-driven lives inside this task, so ending it
//! (shutdown, terminal disconnect) deterministically ends every timer.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::time;
use tokio_tungstenite::tungstenite::Message;

use chat_common::Envelope;

use crate::backoff::Backoff;
use crate::{ClientConfig, Command, ConnectionStatus, MessageCallback};

/// Why a session ended.
enum SessionEnd {
    /// Explicit teardown: exit without scheduling a reconnect.
    Shutdown,
    /// Anything else — clean close, transport error, heartbeat failure.
    /// All feed the same reconnect path.
    Closed,
}

/// Connect/reconnect loop. Returns when shut down or when the reconnect
/// schedule is exhausted (terminal until an external `connect()`).
pub(crate) async fn run(
    config: ClientConfig,
    status_tx: watch::Sender<ConnectionStatus>,
    mut command_rx: mpsc::UnboundedReceiver<Command>,
    on_message: MessageCallback,
) {
    let mut backoff = Backoff::new(config.base_reconnect_delay_ms, config.max_reconnect_delay_ms);

    loop {
        let _ = status_tx.send(ConnectionStatus::Connecting);
        let end = connect_and_run(&config, &status_tx, &mut command_rx, &on_message, &mut backoff).await;
        let _ = status_tx.send(ConnectionStatus::Disconnected);

        match end {
            SessionEnd::Shutdown => break,
            SessionEnd::Closed => {
                if backoff.attempts() >= config.max_reconnect_attempts {
                    tracing::error!(
                        attempts = backoff.attempts(),
                        "max reconnection attempts reached"
                    );
                    break;
                }
                let delay = backoff.next_delay();
                tracing::info!(
                    delay_ms = delay.as_millis() as u64,
                    attempt = backoff.attempts(),
                    "reconnecting after backoff"
                );
                let _ = status_tx.send(ConnectionStatus::Connecting);
                if wait_or_shutdown(delay, &mut command_rx).await {
                    let _ = status_tx.send(ConnectionStatus::Disconnected);
                    break;
                }
            }
        }
    }
}

/// One connection attempt: dial, then run the session until it ends.
async fn connect_and_run(
    config: &ClientConfig,
    status_tx: &watch::Sender<ConnectionStatus>,
    command_rx: &mut mpsc::UnboundedReceiver<Command>,
    on_message: &MessageCallback,
    backoff: &mut Backoff,
) -> SessionEnd {
    let ws = tokio::select! {
        result = tokio_tungstenite::connect_async(config.url.as_str()) => match result {
            Ok((ws, _response)) => ws,
            Err(e) => {
                tracing::warn!(url = %config.url, error = %e, "connect failed");
                return SessionEnd::Closed;
            }
        },
        // A shutdown issued mid-dial must still win.
        () = shutdown_requested(command_rx) => return SessionEnd::Shutdown,
    };

    tracing::debug!(url = %config.url, "socket open");
    backoff.reset();
    let _ = status_tx.send(ConnectionStatus::Connected);

    let (mut ws_tx, mut ws_rx) = ws.split();

    let mut ping_timer = time::interval(Duration::from_millis(config.ping_interval_ms));
    ping_timer.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
    ping_timer.tick().await; // First tick fires immediately; skip it.

    // Armed while a ping is awaiting its pong; cleared on receipt.
    let mut pong_deadline: Option<time::Instant> = None;

    let end = loop {
        let pong_overdue = async {
            match pong_deadline {
                Some(at) => time::sleep_until(at).await,
                None => std::future::pending().await,
            }
        };

        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<Envelope>(&text) {
                            Ok(Envelope::Pong) => {
                                pong_deadline = None;
                            }
                            Ok(envelope @ (Envelope::GroupMessage { .. } | Envelope::DirectMessage { .. })) => {
                                (on_message.as_ref())(envelope);
                            }
                            Ok(other) => {
                                tracing::debug!(?other, "unhandled event");
                            }
                            Err(e) => {
                                // Welcome banner and other non-envelope frames.
                                tracing::debug!(error = %e, "ignoring unparseable frame");
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break SessionEnd::Closed,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        // Logged here; the close path below is what drives
                        // the state machine.
                        tracing::warn!(error = %e, "socket error");
                        break SessionEnd::Closed;
                    }
                }
            }

            cmd = command_rx.recv() => {
                match cmd {
                    Some(Command::Send(envelope)) => {
                        let json = match serde_json::to_string(&envelope) {
                            Ok(j) => j,
                            Err(e) => {
                                tracing::error!(error = %e, "failed to serialize envelope");
                                continue;
                            }
                        };
                        // At most one attempt per call; a failed write ends
                        // the session instead of retrying the send.
                        if ws_tx.send(Message::Text(json.into())).await.is_err() {
                            break SessionEnd::Closed;
                        }
                    }
                    Some(Command::Shutdown) | None => {
                        let _ = ws_tx.send(Message::Close(None)).await;
                        break SessionEnd::Shutdown;
                    }
                }
            }

            _ = ping_timer.tick() => {
                if pong_deadline.is_some() {
                    // Protocol violation: never stack a second ping on an
                    // unanswered one.
                    tracing::warn!("previous ping still unanswered at next tick; forcing close");
                    break SessionEnd::Closed;
                }
                let ping = Envelope::Ping {
                    sender_id: config.client_id.clone(),
                };
                let json = match serde_json::to_string(&ping) {
                    Ok(j) => j,
                    Err(e) => {
                        tracing::error!(error = %e, "failed to serialize ping");
                        continue;
                    }
                };
                if ws_tx.send(Message::Text(json.into())).await.is_err() {
                    break SessionEnd::Closed;
                }
                pong_deadline =
                    Some(time::Instant::now() + Duration::from_millis(config.pong_timeout_ms));
            }

            _ = pong_overdue => {
                tracing::warn!("pong overdue; forcing close");
                break SessionEnd::Closed;
            }
        }
    };

    if matches!(end, SessionEnd::Closed) {
        // Force-close the transport; it may already be gone.
        let _ = ws_tx.send(Message::Close(None)).await;
    }
    end
}

/// Sleep out a backoff delay, still honoring shutdown. Returns true if a
/// shutdown arrived. Sends issued while disconnected are dropped with a
/// warning (at-most-one-attempt, no queuing).
async fn wait_or_shutdown(delay: Duration, command_rx: &mut mpsc::UnboundedReceiver<Command>) -> bool {
    let sleep = time::sleep(delay);
    tokio::pin!(sleep);
    loop {
        tokio::select! {
            () = &mut sleep => return false,
            cmd = command_rx.recv() => match cmd {
                Some(Command::Send(_)) => {
                    tracing::warn!("socket is not connected; dropping send");
                }
                Some(Command::Shutdown) | None => return true,
            },
        }
    }
}

/// Resolve only when a shutdown is requested (or the handle is gone);
/// sends arriving meanwhile are dropped with a warning.
async fn shutdown_requested(command_rx: &mut mpsc::UnboundedReceiver<Command>) {
    loop {
        match command_rx.recv().await {
            Some(Command::Send(_)) => {
                tracing::warn!("socket is not connected; dropping send");
            }
            Some(Command::Shutdown) | None => return,
        }
    }
}
