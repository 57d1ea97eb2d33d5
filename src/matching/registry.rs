//! Active match registry: the single source of truth for "is this user in
//! a session".

use std::collections::HashMap;

/// Symmetric map of currently paired users. An unordered pair (a, b) is
/// stored as two directed entries `a -> b` and `b -> a`; both are always
/// inserted and removed together. The registry itself is not synchronized;
/// it lives inside the matcher's single coordination point.
#[derive(Debug, Default)]
pub struct ActiveMatchRegistry {
    pairs: HashMap<String, String>,
}

impl ActiveMatchRegistry {
    pub fn new() -> Self {
        Self { pairs: HashMap::new() }
    }

    /// Record a pair. Panics in debug builds if either side is already
    /// matched; callers check `is_matched` under the same lock first.
    pub fn pair(&mut self, a: &str, b: &str) {
        debug_assert!(!self.pairs.contains_key(a));
        debug_assert!(!self.pairs.contains_key(b));
        self.pairs.insert(a.to_string(), b.to_string());
        self.pairs.insert(b.to_string(), a.to_string());
    }

    /// Remove `a`'s entry and its symmetric counterpart. Returns the former
    /// partner, or None if `a` was not matched (idempotent).
    pub fn unpair(&mut self, a: &str) -> Option<String> {
        let partner = self.pairs.remove(a)?;
        self.pairs.remove(&partner);
        Some(partner)
    }

    pub fn partner_of(&self, a: &str) -> Option<&str> {
        self.pairs.get(a).map(|s| s.as_str())
    }

    pub fn is_matched(&self, a: &str) -> bool {
        self.pairs.contains_key(a)
    }

    /// Number of active matches (pairs, not directed entries).
    pub fn len(&self) -> usize {
        self.pairs.len() / 2
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }
}
