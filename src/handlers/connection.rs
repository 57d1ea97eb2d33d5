//! Connection lifecycle handlers.

use crate::protocol::ServerMessage;
use crate::state::{AppState, PeerSession};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc::UnboundedSender, RwLock};
use uuid::Uuid;

/// Register a new authenticated connection and bring the user online.
pub async fn handle_connection(
    state: &Arc<AppState>,
    user_id: &str,
    sender: UnboundedSender<ServerMessage>,
) -> String {
    let connection_id = Uuid::new_v4().to_string();

    let session = PeerSession {
        user_id: user_id.to_string(),
        connection_id: connection_id.clone(),
        room_id: RwLock::new(None),
        sender: sender.clone(),
        connected_at: Instant::now(),
    };

    if state.sessions.insert(user_id.to_string(), session).is_some() {
        tracing::info!(user_id = %user_id, "session replaced by new connection");
    }

    crate::handlers::presence::set_online(state, user_id);

    let _ = sender.send(ServerMessage::Connected {
        user_id: user_id.to_string(),
        connection_id: connection_id.clone(),
    });

    tracing::info!(user_id = %user_id, connection_id = %connection_id, "New connection established");
    connection_id
}

/// Disconnect teardown. Runs as an explicit ordered sequence; each step is
/// independent and best-effort, so one failing step never blocks the rest.
pub async fn handle_disconnect(state: &Arc<AppState>, user_id: &str, connection_id: &str) {
    // A replaced socket must not tear down its successor's state.
    if state
        .sessions
        .remove_if(user_id, |_, s| s.connection_id == connection_id)
        .is_none()
    {
        tracing::debug!(user_id = %user_id, connection_id = %connection_id, "stale socket closed, no teardown");
        return;
    }

    // 1. Typing indicators.
    crate::handlers::typing::clear_for_user(state, user_id).await;

    // 2/3. Queue entry and active match.
    let cleanup = state.matcher.disconnect(user_id).await;
    if cleanup.was_queued {
        tracing::info!(user_id = %user_id, "removed queue entry on disconnect");
    }
    if let Some(partner) = &cleanup.partner {
        crate::handlers::matching::close_room(state, partner).await;
        state.notify(partner, ServerMessage::PartnerLeft);
        tracing::info!(user_id = %user_id, partner = %partner, "match torn down on disconnect");
    }

    // 4. Presence: delayed offline flip after the grace window.
    crate::handlers::presence::schedule_offline(state.clone(), user_id.to_string());

    tracing::info!(user_id = %user_id, "Connection closed");
}

/// Heartbeat: refresh presence activity and ack.
pub fn handle_heartbeat(
    state: &Arc<AppState>,
    user_id: &str,
    sender: &UnboundedSender<ServerMessage>,
) {
    crate::handlers::presence::touch(state, user_id);
    let _ = sender.send(ServerMessage::HeartbeatAck);
}
