//! External collaborator boundary: identity, profiles, locations, blocks,
//! and the durable conversation store.
//!
//! The matching authority only sees these traits; the durable engines behind
//! them (relational store, key-value cache, geocoding) live in other
//! services. `MemoryDirectory` backs tests and single-node demo deployments.

use crate::geo::Coordinates;
use crate::protocol::{Gender, Mode, PublicProfile};
use anyhow::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

/// Full profile record as stored by the profile collaborator.
#[derive(Debug, Clone)]
pub struct Profile {
    pub user_id: String,
    pub name: String,
    pub age: u8,
    pub gender: Gender,
    pub avatar: Option<String>,
    pub bio: Option<String>,
    pub interests: Vec<String>,
    /// Soft-delete flag; deleted users never pass candidate re-validation.
    pub deleted: bool,
}

impl Profile {
    pub fn public(&self) -> PublicProfile {
        PublicProfile {
            user_id: self.user_id.clone(),
            name: self.name.clone(),
            age: self.age,
            gender: self.gender,
            avatar: self.avatar.clone(),
            bio: self.bio.clone(),
            interests: self.interests.clone(),
        }
    }
}

/// Durable conversation row.
#[derive(Debug, Clone)]
pub struct Conversation {
    pub id: String,
    pub participants: (String, String),
    pub mode: Mode,
    pub active: bool,
    pub last_message_at: u64,
}

/// Resolves an authenticated connection token to a stable user id.
#[async_trait]
pub trait Identity: Send + Sync {
    async fn resolve(&self, token: &str) -> Result<Option<String>>;
}

#[async_trait]
pub trait ProfileStore: Send + Sync {
    async fn fetch(&self, user_id: &str) -> Result<Option<Profile>>;
}

#[async_trait]
pub trait LocationStore: Send + Sync {
    async fn fetch(&self, user_id: &str) -> Result<Option<Coordinates>>;
}

#[async_trait]
pub trait BlockStore: Send + Sync {
    /// Symmetric: true if either user blocks the other.
    async fn is_blocked(&self, a: &str, b: &str) -> Result<bool>;
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Order-independent lookup of an active conversation for the pair.
    async fn find_active(&self, a: &str, b: &str) -> Result<Option<String>>;
    async fn create(&self, a: &str, b: &str, mode: Mode) -> Result<String>;
    /// Mark active again and bump last-activity.
    async fn reactivate(&self, conversation_id: &str) -> Result<()>;
}

fn now_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// In-memory implementation of every collaborator trait.
pub struct MemoryDirectory {
    pub tokens: DashMap<String, String>,
    pub profiles: DashMap<String, Profile>,
    pub locations: DashMap<String, Coordinates>,
    pub blocks: DashMap<(String, String), ()>,
    pub conversations: DashMap<String, Conversation>,
    next_conversation: AtomicU64,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self {
            tokens: DashMap::new(),
            profiles: DashMap::new(),
            locations: DashMap::new(),
            blocks: DashMap::new(),
            conversations: DashMap::new(),
            next_conversation: AtomicU64::new(1),
        }
    }

    pub fn insert_profile(&self, profile: Profile) {
        // Token scheme for memory mode: "token-<user_id>".
        self.tokens
            .insert(format!("token-{}", profile.user_id), profile.user_id.clone());
        self.profiles.insert(profile.user_id.clone(), profile);
    }

    pub fn set_location(&self, user_id: &str, coords: Coordinates) {
        self.locations.insert(user_id.to_string(), coords);
    }

    pub fn block(&self, blocker: &str, blocked: &str) {
        self.blocks
            .insert((blocker.to_string(), blocked.to_string()), ());
    }
}

impl Default for MemoryDirectory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Identity for MemoryDirectory {
    async fn resolve(&self, token: &str) -> Result<Option<String>> {
        Ok(self.tokens.get(token).map(|id| id.clone()))
    }
}

#[async_trait]
impl ProfileStore for MemoryDirectory {
    async fn fetch(&self, user_id: &str) -> Result<Option<Profile>> {
        Ok(self.profiles.get(user_id).map(|p| p.clone()))
    }
}

#[async_trait]
impl LocationStore for MemoryDirectory {
    async fn fetch(&self, user_id: &str) -> Result<Option<Coordinates>> {
        Ok(self.locations.get(user_id).map(|c| *c))
    }
}

#[async_trait]
impl BlockStore for MemoryDirectory {
    async fn is_blocked(&self, a: &str, b: &str) -> Result<bool> {
        Ok(self
            .blocks
            .contains_key(&(a.to_string(), b.to_string()))
            || self.blocks.contains_key(&(b.to_string(), a.to_string())))
    }
}

#[async_trait]
impl ConversationStore for MemoryDirectory {
    async fn find_active(&self, a: &str, b: &str) -> Result<Option<String>> {
        Ok(self
            .conversations
            .iter()
            .find(|entry| {
                let (p, q) = &entry.participants;
                entry.active && ((p == a && q == b) || (p == b && q == a))
            })
            .map(|entry| entry.id.clone()))
    }

    async fn create(&self, a: &str, b: &str, mode: Mode) -> Result<String> {
        let id = format!("conv-{}", self.next_conversation.fetch_add(1, Ordering::Relaxed));
        self.conversations.insert(
            id.clone(),
            Conversation {
                id: id.clone(),
                participants: (a.to_string(), b.to_string()),
                mode,
                active: true,
                last_message_at: now_secs(),
            },
        );
        Ok(id)
    }

    async fn reactivate(&self, conversation_id: &str) -> Result<()> {
        if let Some(mut conv) = self.conversations.get_mut(conversation_id) {
            conv.active = true;
            conv.last_message_at = now_secs();
        }
        Ok(())
    }
}

/// Bundle of every collaborator handle the server needs.
pub struct Directory {
    pub identity: std::sync::Arc<dyn Identity>,
    pub profiles: std::sync::Arc<dyn ProfileStore>,
    pub locations: std::sync::Arc<dyn LocationStore>,
    pub blocks: std::sync::Arc<dyn BlockStore>,
    pub conversations: std::sync::Arc<dyn ConversationStore>,
}

impl Directory {
    /// Every collaborator served by one in-memory directory.
    pub fn in_memory(dir: std::sync::Arc<MemoryDirectory>) -> Self {
        Self {
            identity: dir.clone(),
            profiles: dir.clone(),
            locations: dir.clone(),
            blocks: dir.clone(),
            conversations: dir,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn profile(id: &str, age: u8, gender: Gender) -> Profile {
        Profile {
            user_id: id.to_string(),
            name: id.to_string(),
            age,
            gender,
            avatar: None,
            bio: None,
            interests: vec![],
            deleted: false,
        }
    }

    #[tokio::test]
    async fn block_check_is_symmetric() {
        let dir = MemoryDirectory::new();
        dir.block("a", "b");
        assert!(dir.is_blocked("a", "b").await.unwrap());
        assert!(dir.is_blocked("b", "a").await.unwrap());
        assert!(!dir.is_blocked("a", "c").await.unwrap());
    }

    #[tokio::test]
    async fn find_active_is_order_independent() {
        let dir = MemoryDirectory::new();
        let id = dir.create("a", "b", Mode::Chat).await.unwrap();
        assert_eq!(dir.find_active("b", "a").await.unwrap(), Some(id.clone()));
        assert_eq!(dir.find_active("a", "b").await.unwrap(), Some(id));
    }

    #[tokio::test]
    async fn token_resolution() {
        let dir = Arc::new(MemoryDirectory::new());
        dir.insert_profile(profile("u1", 25, Gender::Female));
        assert_eq!(dir.resolve("token-u1").await.unwrap(), Some("u1".to_string()));
        assert_eq!(dir.resolve("bogus").await.unwrap(), None);
    }
}
