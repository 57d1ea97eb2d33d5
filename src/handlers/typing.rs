//! Typing indicator with auto-expiry.
//!
//! At most one live timer exists per (conversation, user) pair; a new
//! typing-start aborts and replaces the previous one.

use crate::protocol::ServerMessage;
use crate::state::{AppState, TypingTimer};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

static TIMER_TOKEN: AtomicU64 = AtomicU64::new(1);

/// Resolve the other member of the user's room, checking the room actually
/// backs this conversation.
async fn conversation_peer(
    state: &Arc<AppState>,
    user_id: &str,
    conversation_id: &str,
) -> Option<String> {
    let session = state.sessions.get(user_id)?;
    let room_id = session.room_id.read().await.clone()?;
    drop(session);
    let room = state.rooms.get(&room_id)?;
    if room.conversation_id != conversation_id {
        return None;
    }
    room.peer_of(user_id).map(str::to_string)
}

/// Broadcast "typing" to the partner and (re-)arm the expiry timer.
pub async fn handle_typing_start(state: &Arc<AppState>, user_id: &str, conversation_id: &str) {
    let Some(partner) = conversation_peer(state, user_id, conversation_id).await else {
        tracing::debug!(user_id = %user_id, conversation_id = %conversation_id, "typing signal outside an active room, dropped");
        return;
    };

    state.notify(
        &partner,
        ServerMessage::UserTyping {
            conversation_id: conversation_id.to_string(),
            user_id: user_id.to_string(),
        },
    );

    let key = (conversation_id.to_string(), user_id.to_string());
    let token = TIMER_TOKEN.fetch_add(1, Ordering::Relaxed);
    let expiry = Duration::from_secs(state.config.typing.expiry_secs);

    let task_state = state.clone();
    let task_key = key.clone();
    let task_partner = partner;
    let handle = tokio::spawn(async move {
        tokio::time::sleep(expiry).await;
        let expired = task_state
            .typing
            .remove_if(&task_key, |_, timer| timer.token == token)
            .is_some();
        if expired {
            task_state.notify(
                &task_partner,
                ServerMessage::UserStoppedTyping {
                    conversation_id: task_key.0.clone(),
                    user_id: task_key.1.clone(),
                },
            );
        }
    });

    if let Some(previous) = state.typing.insert(key, TypingTimer { token, handle }) {
        previous.handle.abort();
    }
}

/// Explicit stop: cancel the timer and broadcast immediately.
pub async fn handle_typing_stop(state: &Arc<AppState>, user_id: &str, conversation_id: &str) {
    let key = (conversation_id.to_string(), user_id.to_string());
    if let Some((_, timer)) = state.typing.remove(&key) {
        timer.handle.abort();
    }

    if let Some(partner) = conversation_peer(state, user_id, conversation_id).await {
        state.notify(
            &partner,
            ServerMessage::UserStoppedTyping {
                conversation_id: conversation_id.to_string(),
                user_id: user_id.to_string(),
            },
        );
    }
}

/// Disconnect cleanup: clear every timer the user holds and tell the
/// partner they stopped. Runs before the match registry is torn down.
pub async fn clear_for_user(state: &Arc<AppState>, user_id: &str) {
    let keys: Vec<(String, String)> = state
        .typing
        .iter()
        .filter(|entry| entry.key().1 == user_id)
        .map(|entry| entry.key().clone())
        .collect();
    if keys.is_empty() {
        return;
    }

    let partner = state.matcher.partner_of(user_id).await;
    for key in keys {
        if let Some((_, timer)) = state.typing.remove(&key) {
            timer.handle.abort();
        }
        if let Some(partner) = &partner {
            state.notify(
                partner,
                ServerMessage::UserStoppedTyping {
                    conversation_id: key.0,
                    user_id: user_id.to_string(),
                },
            );
        }
    }
}
