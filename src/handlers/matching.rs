//! Search lifecycle handlers: start, stop, skip, and match announcement.

use crate::matching::{MatchResult, SearchOutcome};
use crate::protocol::{SearchPrefs, ServerMessage};
use crate::state::{AppState, MatchRoom};
use std::sync::Arc;

/// Enqueue the user and run the search; pushes the resulting event(s).
pub async fn handle_start_search(
    state: &Arc<AppState>,
    user_id: &str,
    prefs: SearchPrefs,
    local: bool,
) {
    let connection_id = match state.sessions.get(user_id) {
        Some(session) => session.connection_id.clone(),
        None => return,
    };

    match state
        .matcher
        .start_search(user_id, &connection_id, prefs, local)
        .await
    {
        Ok(SearchOutcome::Queued { position }) => {
            state.notify(user_id, ServerMessage::Searching { position });
            tracing::info!(user_id = %user_id, position = position, local = local, "User queued");
        }
        Ok(SearchOutcome::Matched(result)) => announce_match(state, *result).await,
        // Another invocation owns this user's outcome.
        Ok(SearchOutcome::Superseded) => {}
        Err(err) => {
            tracing::warn!(user_id = %user_id, error = %err, "start-search rejected");
            state.notify(user_id, err.to_envelope());
        }
    }
}

/// Create the shared signaling room and push match-found to both sides.
pub async fn announce_match(state: &Arc<AppState>, result: MatchResult) {
    let room = MatchRoom::new(
        result.match_id.clone(),
        result.conversation_id.clone(),
        [
            result.searcher.user_id.clone(),
            result.partner.user_id.clone(),
        ],
        result.mode,
    );
    state.rooms.insert(result.match_id.clone(), room);

    for (side, other) in [
        (&result.searcher, &result.partner),
        (&result.partner, &result.searcher),
    ] {
        if let Some(session) = state.sessions.get(&side.user_id) {
            *session.room_id.write().await = Some(result.match_id.clone());
            let _ = session.sender.send(ServerMessage::MatchFound {
                match_id: result.match_id.clone(),
                conversation_id: result.conversation_id.clone(),
                partner: other.profile.clone(),
                mode: result.mode,
                distance_km: result.distance_km,
            });
        }
    }

    tracing::info!(
        match_id = %result.match_id,
        a = %result.searcher.user_id,
        b = %result.partner.user_id,
        conversation_id = %result.conversation_id,
        distance_km = ?result.distance_km,
        "Match found"
    );
}

/// Idempotent stop: always acked, even with no queue entry left.
pub async fn handle_stop_search(state: &Arc<AppState>, user_id: &str) {
    let removed = state.matcher.stop_search(user_id).await;
    state.notify(user_id, ServerMessage::SearchStopped);
    if removed {
        tracing::info!(user_id = %user_id, "User stopped searching");
    }
}

/// Tear down the caller's active match and notify the partner.
pub async fn handle_skip(state: &Arc<AppState>, user_id: &str) {
    match state.matcher.skip(user_id).await {
        Ok(partner) => {
            close_room(state, user_id).await;
            state.notify(user_id, ServerMessage::Skipped);
            state.notify(&partner, ServerMessage::PartnerSkipped);
            tracing::info!(user_id = %user_id, partner = %partner, "User skipped match");
        }
        Err(err) => {
            state.notify(user_id, err.to_envelope());
        }
    }
}

/// Remove the room the user's session is joined to and clear both members'
/// room bindings. The conversation row is untouched.
pub async fn close_room(state: &Arc<AppState>, user_id: &str) -> Option<String> {
    let room_id = {
        let session = state.sessions.get(user_id)?;
        let taken = session.room_id.write().await.take();
        taken
    }?;

    if let Some((_, room)) = state.rooms.remove(&room_id) {
        for member in room.users.iter().filter(|m| m.as_str() != user_id) {
            if let Some(session) = state.sessions.get(member.as_str()) {
                *session.room_id.write().await = None;
            }
        }
        tracing::info!(room_id = %room_id, "Room closed");
    }
    Some(room_id)
}

/// One pass of the optional periodic retry policy: re-run the search for
/// every waiting user.
pub async fn run_retry_pass(state: &Arc<AppState>) {
    for user_id in state.matcher.waiting().await {
        match state.matcher.research(&user_id).await {
            Ok(Some(result)) => announce_match(state, result).await,
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(user_id = %user_id, error = %err, "retry search failed");
            }
        }
    }
}
