//! Application state.

use crate::config::Config;
use crate::directory::Directory;
use crate::matching::Matcher;
use crate::protocol::{Mode, ServerMessage};
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc::UnboundedSender, Mutex, RwLock};
use tokio::task::JoinHandle;

/// Global application state
pub struct AppState {
    /// Live sessions (user_id -> PeerSession)
    pub sessions: DashMap<String, PeerSession>,
    /// Match rooms (match_id -> MatchRoom)
    pub rooms: DashMap<String, MatchRoom>,
    /// Presence records (user_id -> PresenceRecord)
    pub presence: DashMap<String, PresenceRecord>,
    /// Live typing timers ((conversation_id, user_id) -> TypingTimer)
    pub typing: DashMap<(String, String), TypingTimer>,
    /// Matchmaking core
    pub matcher: Matcher,
    /// Collaborator handles
    pub directory: Arc<Directory>,
    /// Configuration
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(config: Config, directory: Arc<Directory>) -> Self {
        Self {
            sessions: DashMap::new(),
            rooms: DashMap::new(),
            presence: DashMap::new(),
            typing: DashMap::new(),
            matcher: Matcher::new(directory.clone()),
            directory,
            config: Arc::new(config),
        }
    }

    /// Push a message to a user's live connection, if any.
    pub fn notify(&self, user_id: &str, message: ServerMessage) {
        if let Some(session) = self.sessions.get(user_id) {
            let _ = session.sender.send(message);
        }
    }
}

/// One authenticated WebSocket connection.
pub struct PeerSession {
    pub user_id: String,
    /// Distinguishes this socket from a replaced or stale one.
    pub connection_id: String,
    /// Match room this connection is joined to.
    pub room_id: RwLock<Option<String>>,
    pub sender: UnboundedSender<ServerMessage>,
    #[allow(dead_code)]
    pub connected_at: Instant,
}

/// Per-room WebRTC call state machine. "Ended" is a reset to Idle so a new
/// offer can restart a call in the same room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallState {
    Idle,
    Offering { from: String },
    Connected,
}

/// The shared signaling room backing an active match.
pub struct MatchRoom {
    pub id: String,
    pub conversation_id: String,
    pub users: [String; 2],
    #[allow(dead_code)]
    pub mode: Mode,
    pub call: Mutex<CallState>,
    #[allow(dead_code)]
    pub created_at: Instant,
}

impl MatchRoom {
    pub fn new(id: String, conversation_id: String, users: [String; 2], mode: Mode) -> Self {
        Self {
            id,
            conversation_id,
            users,
            mode,
            call: Mutex::new(CallState::Idle),
            created_at: Instant::now(),
        }
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.users.iter().any(|u| u == user_id)
    }

    /// The other room member.
    pub fn peer_of(&self, user_id: &str) -> Option<&str> {
        match &self.users {
            [a, b] if a == user_id => Some(b.as_str()),
            [a, b] if b == user_id => Some(a.as_str()),
            _ => None,
        }
    }
}

/// Online/idle/offline presence state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceStatus {
    Online,
    /// Reserved for an activity-age transition; nothing sets it yet.
    #[allow(dead_code)]
    Idle,
    Offline,
}

impl PresenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PresenceStatus::Online => "online",
            PresenceStatus::Idle => "idle",
            PresenceStatus::Offline => "offline",
        }
    }
}

pub struct PresenceRecord {
    pub status: PresenceStatus,
    /// Unix seconds of the last heartbeat or connect.
    pub last_activity: u64,
    /// Bumped on every connect; a pending offline flip only fires if the
    /// epoch it captured is still current.
    pub epoch: u64,
}

/// A pending auto-expiry for one (conversation, user) typing indicator.
pub struct TypingTimer {
    pub token: u64,
    pub handle: JoinHandle<()>,
}
