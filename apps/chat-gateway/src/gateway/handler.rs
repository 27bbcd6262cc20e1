//! Inbound event dispatch: one handler per client→server event.
//!
//! Every handler validates first and answers on the sender's own socket.
//! Group traffic is never fanned out locally — it goes through the broker
//! and comes back via each member's subscription, so a joined sender hears
//! its own message (clients suppress self-echo by `senderId`).

use std::sync::Arc;

use chat_common::{Envelope, GroupPayload};

use crate::bridge::GroupCallback;
use crate::AppState;

use super::connection::Connection;

/// Dispatch one parsed inbound envelope.
///
/// The match is exhaustive over the envelope union, so a new event cannot
/// be added without routing it here.
pub async fn handle_event(state: &AppState, conn: &Connection, envelope: Envelope) {
    if let Err(reason) = envelope.validate() {
        tracing::debug!(conn_id = %conn.conn_id, %reason, "rejected invalid envelope");
        conn.send(Envelope::error(reason));
        return;
    }

    match envelope {
        Envelope::JoinGroup { group_id } => handle_join_group(state, conn, group_id).await,
        Envelope::GroupMessage {
            group_id,
            message,
            sender_id,
        } => handle_group_message(state, conn, group_id, message, sender_id).await,
        Envelope::DirectMessage { message, sender_id } => {
            handle_direct_message(conn, message, sender_id)
        }
        Envelope::Ping { sender_id } => handle_ping(conn, &sender_id),
        // Server→client events arriving inbound are client bugs, not faults.
        Envelope::Pong
        | Envelope::GroupMessageAck { .. }
        | Envelope::JoinGroupAck { .. }
        | Envelope::Error { .. } => {
            tracing::debug!(conn_id = %conn.conn_id, "ignoring server-bound event from client");
        }
    }
}

/// Subscribe this connection to a group's broker channel.
///
/// Re-joining is acked without creating a second subscription, so one
/// publish never double-delivers to a socket.
async fn handle_join_group(state: &AppState, conn: &Connection, group_id: String) {
    tracing::info!(conn_id = %conn.conn_id, %group_id, "joining group");

    if !state.registry.join_group(&conn.conn_id, &group_id) {
        conn.send(Envelope::JoinGroupAck {
            data: format!("Joined group {group_id}"),
        });
        return;
    }

    let outbound = conn.outbound();
    let relay_group = group_id.clone();
    let callback: GroupCallback = Arc::new(move |payload: GroupPayload| {
        // Dispatch only: enqueue for this socket's writer and return, never
        // block the bridge delivery loop.
        let _ = outbound.send(Envelope::GroupMessage {
            group_id: relay_group.clone(),
            message: payload.message,
            sender_id: payload.sender_id,
        });
    });

    match state.bridge.subscribe(&group_id, callback).await {
        Ok(handle) => {
            state.registry.add_subscription(&conn.conn_id, handle);
            conn.send(Envelope::JoinGroupAck {
                data: format!("Joined group {group_id}"),
            });
        }
        Err(e) => {
            state.registry.leave_group(&conn.conn_id, &group_id);
            tracing::warn!(conn_id = %conn.conn_id, %group_id, error = %e, "bridge subscribe failed");
            conn.send(Envelope::error(format!("Failed to join group {group_id}")));
        }
    }
}

/// Publish a group message to the broker and ack the sender.
async fn handle_group_message(
    state: &AppState,
    conn: &Connection,
    group_id: String,
    message: String,
    sender_id: String,
) {
    tracing::debug!(conn_id = %conn.conn_id, %group_id, %sender_id, "publishing group message");

    let payload = GroupPayload { sender_id, message };
    match state.bridge.publish(&group_id, &payload).await {
        Ok(()) => conn.send(Envelope::GroupMessageAck {
            data: format!("Message sent to {group_id}"),
        }),
        Err(e) => {
            tracing::warn!(conn_id = %conn.conn_id, %group_id, error = %e, "bridge publish failed");
            conn.send(Envelope::error(format!("Failed to publish to group {group_id}")));
        }
    }
}

/// Echo a direct message back to the sender's own socket.
///
/// Known gap: there is no peer routing by id — the registry keys by
/// connection, not sender, and nothing maps a `senderId` to a socket.
fn handle_direct_message(conn: &Connection, message: String, sender_id: String) {
    conn.send(Envelope::DirectMessage { message, sender_id });
}

/// Liveness responder; touches no group state.
fn handle_ping(conn: &Connection, sender_id: &str) {
    tracing::trace!(conn_id = %conn.conn_id, %sender_id, "ping");
    conn.send(Envelope::Pong);
}
