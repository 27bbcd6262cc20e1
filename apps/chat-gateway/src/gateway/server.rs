//! WebSocket upgrade handler and per-connection event loop.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use chat_common::id::{prefix, prefixed_ulid};
use chat_common::Envelope;

use crate::AppState;

use super::connection::Connection;
use super::handler;

/// Greeting sent on accept. Predates the tagged envelope; clients treat
/// frames that do not parse as noise.
const WELCOME: &str = "Welcome to the chat server!";

pub fn router() -> Router<AppState> {
    Router::new().route("/", get(ws_upgrade))
}

async fn ws_upgrade(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_connection(socket, state))
}

/// Own one socket from accept to the close sweep.
///
/// A single loop services both directions: inbound frames are handled in
/// arrival order, and envelopes queued by handlers or bridge callbacks are
/// drained to the write half. Different connections run concurrently.
async fn handle_connection(socket: WebSocket, state: AppState) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let conn_id = prefixed_ulid(prefix::CONNECTION);
    let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel();
    state.registry.register(conn_id.clone());
    let conn = Connection::new(conn_id.clone(), outbound_tx);

    tracing::info!(%conn_id, "socket connected");

    if ws_tx.send(Message::Text(WELCOME.into())).await.is_err() {
        teardown(&state, &conn_id).await;
        return;
    }

    loop {
        tokio::select! {
            // Client sends us a frame.
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match serde_json::from_str::<Envelope>(&text) {
                            Ok(envelope) => handler::handle_event(&state, &conn, envelope).await,
                            Err(e) => {
                                // Recovered locally: answer and stay open.
                                tracing::debug!(%conn_id, error = %e, "unparseable frame");
                                conn.send(Envelope::error("Invalid message format"));
                            }
                        }
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        tracing::debug!(%conn_id, ?e, "ws read error");
                        break;
                    }
                    _ => continue,
                }
            }

            // An envelope queued for this socket (handler reply or relayed
            // group traffic from a bridge callback).
            queued = outbound_rx.recv() => {
                match queued {
                    Some(envelope) => {
                        let json = match serde_json::to_string(&envelope) {
                            Ok(j) => j,
                            Err(e) => {
                                tracing::error!(%conn_id, error = %e, "failed to serialize outbound envelope");
                                continue;
                            }
                        };
                        if ws_tx.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    teardown(&state, &conn_id).await;
    tracing::info!(%conn_id, "socket disconnected");
}

/// Release everything the connection held. Safe to call more than once —
/// the registry sweep only yields each handle the first time.
async fn teardown(state: &AppState, conn_id: &str) {
    for handle in state.registry.remove(conn_id) {
        state.bridge.unsubscribe(&handle).await;
    }
}
