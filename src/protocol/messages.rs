//! Client-server message protocol definitions.

use serde::{Deserialize, Serialize};

/// Session mode a searcher is asking for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    Chat,
    Video,
}

/// Gender as recorded on a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Gender {
    Male,
    Female,
    Other,
}

/// Gender a searcher is willing to be matched with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GenderPref {
    Male,
    Female,
    Other,
    All,
}

impl GenderPref {
    pub fn accepts(&self, gender: Gender) -> bool {
        match self {
            GenderPref::All => true,
            GenderPref::Male => gender == Gender::Male,
            GenderPref::Female => gender == Gender::Female,
            GenderPref::Other => gender == Gender::Other,
        }
    }
}

/// Search preferences attached to a start-search request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchPrefs {
    pub mode: Mode,
    pub age_min: u8,
    pub age_max: u8,
    pub gender: GenderPref,
    /// Max distance in kilometers; only honored for local (geo) searches.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub radius_km: Option<f64>,
}

/// Public profile fields pushed to the partner on match.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicProfile {
    pub user_id: String,
    pub name: String,
    pub age: u8,
    pub gender: Gender,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub bio: Option<String>,
    pub interests: Vec<String>,
}

/// Point-in-time presence snapshot entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PresenceEntry {
    pub user_id: String,
    pub status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<u64>,
}

/// Client → server messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ClientMessage {
    // Connection
    Heartbeat,

    // Search lifecycle
    StartSearch {
        prefs: SearchPrefs,
        /// True for the geo-constrained (local) queue.
        #[serde(default)]
        local: bool,
    },
    StopSearch,
    Skip,

    // WebRTC Signaling (payloads are opaque)
    Offer {
        payload: serde_json::Value,
    },
    Answer {
        payload: serde_json::Value,
    },
    IceCandidate {
        payload: serde_json::Value,
    },
    MediaToggle {
        payload: serde_json::Value,
    },
    EndCall,

    // Typing
    TypingStart {
        conversation_id: String,
    },
    TypingStop {
        conversation_id: String,
    },

    // Presence
    PresenceSubscribe {
        user_ids: Vec<String>,
    },
}

/// Server → client messages
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum ServerMessage {
    // Connection
    Connected {
        user_id: String,
        connection_id: String,
    },
    HeartbeatAck,
    Error {
        code: String,
        message: String,
    },

    // Search lifecycle
    Searching {
        position: usize,
    },
    SearchStopped,
    Skipped,
    PartnerSkipped,
    PartnerLeft,

    // Match result
    MatchFound {
        match_id: String,
        conversation_id: String,
        partner: PublicProfile,
        mode: Mode,
        #[serde(skip_serializing_if = "Option::is_none")]
        distance_km: Option<f64>,
    },

    // WebRTC Signaling
    Offer {
        from: String,
        payload: serde_json::Value,
    },
    Answer {
        from: String,
        payload: serde_json::Value,
    },
    IceCandidate {
        from: String,
        payload: serde_json::Value,
    },
    MediaToggle {
        from: String,
        payload: serde_json::Value,
    },
    CallEnded {
        from: String,
    },

    // Typing
    UserTyping {
        conversation_id: String,
        user_id: String,
    },
    UserStoppedTyping {
        conversation_id: String,
        user_id: String,
    },

    // Presence
    UserOnline {
        user_id: String,
    },
    UserOffline {
        user_id: String,
        last_seen: u64,
    },
    PresenceStatus {
        statuses: Vec<PresenceEntry>,
    },
}
