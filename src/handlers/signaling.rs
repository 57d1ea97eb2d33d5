//! WebRTC signaling relay.
//!
//! Payloads (SDP, ICE candidates, media flags) are opaque blobs; the relay
//! only validates room membership and the per-room call state machine.

use crate::state::{AppState, CallState};
use std::sync::Arc;

/// Resolve the caller's room and the other member, or report the conflict.
fn room_and_peer(state: &Arc<AppState>, user_id: &str, room_id: &str) -> Option<String> {
    let room = state.rooms.get(room_id)?;
    if !room.contains(user_id) {
        return None;
    }
    room.peer_of(user_id).map(str::to_string)
}

async fn current_room(state: &Arc<AppState>, user_id: &str) -> Option<String> {
    let session = state.sessions.get(user_id)?;
    let room_id = session.room_id.read().await.clone();
    room_id
}

fn conflict(state: &Arc<AppState>, user_id: &str, message: &str) {
    state.notify(
        user_id,
        crate::protocol::ServerMessage::Error {
            code: "state_conflict".to_string(),
            message: message.to_string(),
        },
    );
}

/// Offer: no-call → offering; forwarded verbatim to the other member.
pub async fn handle_offer(state: &Arc<AppState>, user_id: &str, payload: serde_json::Value) {
    let Some(room_id) = current_room(state, user_id).await else {
        return conflict(state, user_id, "not in a match room");
    };
    let Some(peer) = room_and_peer(state, user_id, &room_id) else {
        return conflict(state, user_id, "not a member of this room");
    };

    {
        let Some(room) = state.rooms.get(&room_id) else {
            return conflict(state, user_id, "not in a match room");
        };
        let mut call = room.call.lock().await;
        if *call != CallState::Idle {
            return conflict(state, user_id, "call already in progress");
        }
        *call = CallState::Offering {
            from: user_id.to_string(),
        };
    }

    state.notify(
        &peer,
        crate::protocol::ServerMessage::Offer {
            from: user_id.to_string(),
            payload,
        },
    );
    tracing::debug!(from = %user_id, room_id = %room_id, "Relayed offer");
}

/// Answer: offering → connected; forwarded to the original offerer.
pub async fn handle_answer(state: &Arc<AppState>, user_id: &str, payload: serde_json::Value) {
    let Some(room_id) = current_room(state, user_id).await else {
        return conflict(state, user_id, "not in a match room");
    };
    if room_and_peer(state, user_id, &room_id).is_none() {
        return conflict(state, user_id, "not a member of this room");
    }

    let offerer = {
        let Some(room) = state.rooms.get(&room_id) else {
            return conflict(state, user_id, "not in a match room");
        };
        let mut call = room.call.lock().await;
        match call.clone() {
            CallState::Offering { from } if from != user_id => {
                *call = CallState::Connected;
                from
            }
            CallState::Offering { .. } => {
                return conflict(state, user_id, "cannot answer own offer");
            }
            _ => return conflict(state, user_id, "no pending offer to answer"),
        }
    };

    state.notify(
        &offerer,
        crate::protocol::ServerMessage::Answer {
            from: user_id.to_string(),
            payload,
        },
    );
    tracing::debug!(from = %user_id, room_id = %room_id, "Relayed answer");
}

/// ICE candidate: valid while offering or connected; no state change.
/// Per-sender ordering is preserved by the per-connection channel.
pub async fn handle_ice_candidate(
    state: &Arc<AppState>,
    user_id: &str,
    payload: serde_json::Value,
) {
    let Some(room_id) = current_room(state, user_id).await else {
        return conflict(state, user_id, "not in a match room");
    };
    let Some(peer) = room_and_peer(state, user_id, &room_id) else {
        return conflict(state, user_id, "not a member of this room");
    };

    {
        let Some(room) = state.rooms.get(&room_id) else {
            return conflict(state, user_id, "not in a match room");
        };
        let call = room.call.lock().await;
        if *call == CallState::Idle {
            return conflict(state, user_id, "no call in progress");
        }
    }

    state.notify(
        &peer,
        crate::protocol::ServerMessage::IceCandidate {
            from: user_id.to_string(),
            payload,
        },
    );
    tracing::debug!(from = %user_id, room_id = %room_id, "Relayed ICE candidate");
}

/// Media toggle: forwarded to the other member, no call-state constraint.
pub async fn handle_media_toggle(
    state: &Arc<AppState>,
    user_id: &str,
    payload: serde_json::Value,
) {
    let Some(room_id) = current_room(state, user_id).await else {
        return conflict(state, user_id, "not in a match room");
    };
    let Some(peer) = room_and_peer(state, user_id, &room_id) else {
        return conflict(state, user_id, "not a member of this room");
    };

    state.notify(
        &peer,
        crate::protocol::ServerMessage::MediaToggle {
            from: user_id.to_string(),
            payload,
        },
    );
    tracing::debug!(from = %user_id, room_id = %room_id, "Relayed media toggle");
}

/// End call: any state → no-call, so a new offer can restart in-room.
pub async fn handle_end_call(state: &Arc<AppState>, user_id: &str) {
    let Some(room_id) = current_room(state, user_id).await else {
        return conflict(state, user_id, "not in a match room");
    };
    let Some(peer) = room_and_peer(state, user_id, &room_id) else {
        return conflict(state, user_id, "not a member of this room");
    };

    if let Some(room) = state.rooms.get(&room_id) {
        *room.call.lock().await = CallState::Idle;
    }

    state.notify(
        &peer,
        crate::protocol::ServerMessage::CallEnded {
            from: user_id.to_string(),
        },
    );
    tracing::debug!(from = %user_id, room_id = %room_id, "Call ended");
}
