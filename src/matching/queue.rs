//! Wait queues for the global and geo-constrained match pools.

use crate::geo::Coordinates;
use crate::protocol::SearchPrefs;
use std::time::Instant;

/// A user waiting in one of the two queues. Owned by exactly one queue;
/// the matcher guarantees a user id never appears in both.
#[derive(Debug, Clone)]
pub struct QueuedUser {
    pub user_id: String,
    pub connection_id: String,
    pub prefs: SearchPrefs,
    /// Present for geo-queue entries only.
    pub coords: Option<Coordinates>,
    pub enqueued_at: Instant,
}

/// Ordered waiting set. Arrival order is the tie-breaker for the global
/// queue, so entries are kept in enqueue order.
#[derive(Debug, Default)]
pub struct WaitQueue {
    entries: Vec<QueuedUser>,
}

impl WaitQueue {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn push(&mut self, entry: QueuedUser) {
        self.entries.push(entry);
    }

    /// 1-based queue position, as reported in the searching ack.
    pub fn position(&self, user_id: &str) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.user_id == user_id)
            .map(|i| i + 1)
    }

    pub fn contains(&self, user_id: &str) -> bool {
        self.entries.iter().any(|e| e.user_id == user_id)
    }

    /// Remove a user's entry if present; idempotent.
    pub fn remove(&mut self, user_id: &str) -> Option<QueuedUser> {
        let idx = self.entries.iter().position(|e| e.user_id == user_id)?;
        Some(self.entries.remove(idx))
    }

    pub fn iter(&self) -> impl Iterator<Item = &QueuedUser> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// User ids in arrival order, oldest first.
    pub fn user_ids(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.user_id.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{GenderPref, Mode};

    fn entry(user_id: &str) -> QueuedUser {
        QueuedUser {
            user_id: user_id.to_string(),
            connection_id: format!("conn-{}", user_id),
            prefs: SearchPrefs {
                mode: Mode::Chat,
                age_min: 18,
                age_max: 99,
                gender: GenderPref::All,
                radius_km: None,
            },
            coords: None,
            enqueued_at: Instant::now(),
        }
    }

    #[test]
    fn positions_are_one_based_arrival_order() {
        let mut q = WaitQueue::new();
        q.push(entry("a"));
        q.push(entry("b"));
        assert_eq!(q.position("a"), Some(1));
        assert_eq!(q.position("b"), Some(2));
        assert_eq!(q.position("c"), None);
    }

    #[test]
    fn remove_is_idempotent_and_shifts_positions() {
        let mut q = WaitQueue::new();
        q.push(entry("a"));
        q.push(entry("b"));
        assert!(q.remove("a").is_some());
        assert!(q.remove("a").is_none());
        assert_eq!(q.position("b"), Some(1));
    }
}
