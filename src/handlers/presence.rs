//! Presence tracking with a disconnect grace period.

use crate::protocol::{PresenceEntry, ServerMessage};
use crate::state::{AppState, PresenceRecord, PresenceStatus};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc::UnboundedSender;

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Mark a user online and broadcast the status change. Bumping the epoch
/// cancels any pending offline flip from a previous disconnect.
pub fn set_online(state: &Arc<AppState>, user_id: &str) {
    {
        let mut record = state
            .presence
            .entry(user_id.to_string())
            .or_insert_with(|| PresenceRecord {
                status: PresenceStatus::Offline,
                last_activity: 0,
                epoch: 0,
            });
        record.status = PresenceStatus::Online;
        record.last_activity = now_secs();
        record.epoch += 1;
    }

    broadcast_except(
        state,
        user_id,
        ServerMessage::UserOnline {
            user_id: user_id.to_string(),
        },
    );
}

/// Schedule the delayed offline check. If the user reconnects inside the
/// grace window the epoch moves on and the flip is dropped, so rapid
/// reconnect cycles cause no spurious offline events.
pub fn schedule_offline(state: Arc<AppState>, user_id: String) {
    let epoch = match state.presence.get(&user_id) {
        Some(record) => record.epoch,
        None => return,
    };
    let grace = Duration::from_secs(state.config.presence.grace_secs);

    tokio::spawn(async move {
        tokio::time::sleep(grace).await;

        if state.sessions.contains_key(&user_id) {
            return;
        }
        let last_seen = {
            let Some(mut record) = state.presence.get_mut(&user_id) else {
                return;
            };
            if record.epoch != epoch {
                return;
            }
            record.status = PresenceStatus::Offline;
            record.last_activity = now_secs();
            record.last_activity
        };

        broadcast_except(
            &state,
            &user_id,
            ServerMessage::UserOffline {
                user_id: user_id.clone(),
                last_seen,
            },
        );
        tracing::info!(user_id = %user_id, "User offline after grace period");
    });
}

/// Refresh last-activity without a status change.
pub fn touch(state: &Arc<AppState>, user_id: &str) {
    if let Some(mut record) = state.presence.get_mut(user_id) {
        record.last_activity = now_secs();
    }
}

/// Point-in-time bulk status snapshot; not a standing subscription.
pub fn handle_subscribe(
    state: &Arc<AppState>,
    sender: &UnboundedSender<ServerMessage>,
    user_ids: Vec<String>,
) {
    let statuses = user_ids
        .into_iter()
        .map(|id| match state.presence.get(&id) {
            Some(record) => PresenceEntry {
                user_id: id,
                status: record.status.as_str().to_string(),
                last_seen: match record.status {
                    PresenceStatus::Offline => Some(record.last_activity),
                    _ => None,
                },
            },
            None => PresenceEntry {
                user_id: id,
                status: PresenceStatus::Offline.as_str().to_string(),
                last_seen: None,
            },
        })
        .collect();

    let _ = sender.send(ServerMessage::PresenceStatus { statuses });
}

/// Status broadcast to every live connection except the subject.
fn broadcast_except(state: &Arc<AppState>, except_user_id: &str, message: ServerMessage) {
    for session in state.sessions.iter() {
        if session.user_id != except_user_id {
            let _ = session.sender.send(message.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::directory::{Directory, MemoryDirectory};
    use tokio::sync::mpsc;

    fn state() -> Arc<AppState> {
        let mut config = Config::default();
        config.presence.grace_secs = 1;
        Arc::new(AppState::new(
            config,
            Arc::new(Directory::in_memory(Arc::new(MemoryDirectory::new()))),
        ))
    }

    #[tokio::test(start_paused = true)]
    async fn offline_flip_fires_after_grace_when_no_socket_remains() {
        let state = state();
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn = crate::handlers::connection::handle_connection(&state, "a", tx).await;
        crate::handlers::connection::handle_disconnect(&state, "a", &conn).await;

        tokio::time::sleep(Duration::from_secs(2)).await;
        let record = state.presence.get("a").unwrap();
        assert_eq!(record.status, PresenceStatus::Offline);
    }

    #[tokio::test(start_paused = true)]
    async fn reconnect_inside_grace_cancels_the_flip() {
        let state = state();
        let (tx, _rx) = mpsc::unbounded_channel();
        let conn = crate::handlers::connection::handle_connection(&state, "a", tx).await;
        crate::handlers::connection::handle_disconnect(&state, "a", &conn).await;

        // Reconnect before the grace window elapses.
        let (tx2, _rx2) = mpsc::unbounded_channel();
        crate::handlers::connection::handle_connection(&state, "a", tx2).await;

        tokio::time::sleep(Duration::from_secs(2)).await;
        let record = state.presence.get("a").unwrap();
        assert_eq!(record.status, PresenceStatus::Online);
    }

    #[tokio::test]
    async fn snapshot_reports_offline_for_unknown_users() {
        let state = state();
        let (tx, mut rx) = mpsc::unbounded_channel();
        crate::handlers::connection::handle_connection(&state, "a", tx.clone()).await;

        handle_subscribe(&state, &tx, vec!["a".into(), "ghost".into()]);
        let msg = loop {
            match rx.try_recv().unwrap() {
                ServerMessage::PresenceStatus { statuses } => break statuses,
                _ => continue,
            }
        };
        assert_eq!(msg.len(), 2);
        assert_eq!(msg[0].status, "online");
        assert_eq!(msg[1].status, "offline");
        assert!(msg[1].last_seen.is_none());
    }
}
