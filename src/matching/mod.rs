//! Matchmaking core: wait queues, the active match registry, and the
//! compatibility search.
//!
//! All queue/registry mutation goes through one `Mutex<MatchState>` so that
//! no two searches interleave their read-modify-write. Collaborator I/O
//! (profile, block, conversation lookups) runs outside the lock; the final
//! remove-from-queue + register-pair step re-validates and commits under it.

pub mod queue;
pub mod registry;

use crate::directory::{Directory, Profile};
use crate::error::MatchError;
use crate::geo::distance_km;
use crate::protocol::{Mode, PublicProfile, SearchPrefs};
use queue::{QueuedUser, WaitQueue};
use registry::ActiveMatchRegistry;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Mutex;
use uuid::Uuid;

/// Queues and registry, guarded as one unit.
#[derive(Default)]
struct MatchState {
    global: WaitQueue,
    local: WaitQueue,
    registry: ActiveMatchRegistry,
}

impl MatchState {
    fn queue(&self, local: bool) -> &WaitQueue {
        if local {
            &self.local
        } else {
            &self.global
        }
    }

    fn queue_mut(&mut self, local: bool) -> &mut WaitQueue {
        if local {
            &mut self.local
        } else {
            &mut self.global
        }
    }

    /// Position in whichever queue holds the user, if any.
    fn position(&self, user_id: &str) -> Option<usize> {
        self.global
            .position(user_id)
            .or_else(|| self.local.position(user_id))
    }

    fn purge(&mut self, user_id: &str) -> bool {
        let a = self.global.remove(user_id).is_some();
        let b = self.local.remove(user_id).is_some();
        a || b
    }
}

/// One side of a confirmed match.
#[derive(Debug, Clone)]
pub struct MatchedSide {
    pub user_id: String,
    pub connection_id: String,
    pub profile: PublicProfile,
}

/// A confirmed pairing, ready to be announced to both sides.
#[derive(Debug, Clone)]
pub struct MatchResult {
    pub match_id: String,
    pub conversation_id: String,
    pub mode: Mode,
    /// Computed distance for geo matches, rounded to 0.1 km.
    pub distance_km: Option<f64>,
    pub searcher: MatchedSide,
    pub partner: MatchedSide,
}

/// Result of a start-search call.
#[derive(Debug)]
pub enum SearchOutcome {
    /// No compatible candidate yet; the user waits at this 1-based position.
    Queued { position: usize },
    Matched(Box<MatchResult>),
    /// A concurrent search already matched or removed this user; the other
    /// invocation owns the announcement.
    Superseded,
}

/// What a disconnect teardown found and removed.
#[derive(Debug, Default)]
pub struct DisconnectCleanup {
    pub was_queued: bool,
    pub partner: Option<String>,
}

enum ScanResult {
    Matched(Box<MatchResult>),
    Superseded,
    NoCandidate,
}

pub struct Matcher {
    state: Mutex<MatchState>,
    directory: Arc<Directory>,
}

impl Matcher {
    pub fn new(directory: Arc<Directory>) -> Self {
        Self {
            state: Mutex::new(MatchState::default()),
            directory,
        }
    }

    /// Enqueue a user and immediately run the compatibility search.
    pub async fn start_search(
        &self,
        user_id: &str,
        connection_id: &str,
        prefs: SearchPrefs,
        local: bool,
    ) -> Result<SearchOutcome, MatchError> {
        if prefs.age_min > prefs.age_max {
            return Err(MatchError::Validation(format!(
                "invalid age range [{}, {}]",
                prefs.age_min, prefs.age_max
            )));
        }

        let profile = match self.directory.profiles.fetch(user_id).await? {
            Some(p) if !p.deleted => p,
            _ => {
                // Stale entries for a vanished user are dropped.
                self.state.lock().await.purge(user_id);
                return Err(MatchError::NotFound("user not found".into()));
            }
        };

        let coords = if local {
            if prefs.radius_km.is_none() {
                return Err(MatchError::Validation(
                    "radius required for local search".into(),
                ));
            }
            match self.directory.locations.fetch(user_id).await? {
                Some(c) => Some(c),
                None => {
                    return Err(MatchError::Validation(
                        "location required for local search".into(),
                    ))
                }
            }
        } else {
            None
        };

        let entry = {
            let mut st = self.state.lock().await;
            if st.registry.is_matched(user_id) {
                return Err(MatchError::StateConflict("already matched".into()));
            }
            // Idempotent re-enqueue: report the current position.
            if let Some(position) = st.position(user_id) {
                return Ok(SearchOutcome::Queued { position });
            }
            let entry = QueuedUser {
                user_id: user_id.to_string(),
                connection_id: connection_id.to_string(),
                prefs,
                coords,
                enqueued_at: Instant::now(),
            };
            st.queue_mut(local).push(entry.clone());
            entry
        };

        match self.scan(&entry, &profile, local).await? {
            ScanResult::Matched(result) => Ok(SearchOutcome::Matched(result)),
            ScanResult::Superseded => Ok(SearchOutcome::Superseded),
            ScanResult::NoCandidate => {
                let st = self.state.lock().await;
                match st.position(user_id) {
                    Some(position) => Ok(SearchOutcome::Queued { position }),
                    // Removed while we were scanning (stop or disconnect).
                    None => Ok(SearchOutcome::Superseded),
                }
            }
        }
    }

    /// Re-run the search for an already-queued user. Used by the optional
    /// periodic retry policy; a lone queued user is otherwise only matched
    /// when another enqueue triggers a fresh search.
    pub async fn research(&self, user_id: &str) -> Result<Option<MatchResult>, MatchError> {
        let found = {
            let st = self.state.lock().await;
            let found = st
                .global
                .iter()
                .find(|e| e.user_id == user_id)
                .map(|e| (e.clone(), false))
                .or_else(|| {
                    st.local
                        .iter()
                        .find(|e| e.user_id == user_id)
                        .map(|e| (e.clone(), true))
                });
            found
        };
        let Some((entry, local)) = found else {
            return Ok(None);
        };

        let profile = match self.directory.profiles.fetch(user_id).await? {
            Some(p) if !p.deleted => p,
            _ => {
                self.state.lock().await.purge(user_id);
                return Err(MatchError::NotFound("user not found".into()));
            }
        };

        match self.scan(&entry, &profile, local).await? {
            ScanResult::Matched(result) => Ok(Some(*result)),
            _ => Ok(None),
        }
    }

    /// Candidate scan: cheap filters and ordering under the lock, live
    /// re-validation outside it, then a re-checked claim.
    async fn scan(
        &self,
        searcher: &QueuedUser,
        searcher_profile: &Profile,
        local: bool,
    ) -> Result<ScanResult, MatchError> {
        let candidates = {
            let st = self.state.lock().await;
            let mut candidates: Vec<(QueuedUser, Option<f64>)> = Vec::new();
            for cand in st.queue(local).iter() {
                if cand.user_id == searcher.user_id
                    || st.registry.is_matched(&cand.user_id)
                    || cand.prefs.mode != searcher.prefs.mode
                {
                    continue;
                }
                if local {
                    let (Some(a), Some(b)) = (searcher.coords, cand.coords) else {
                        continue;
                    };
                    let d = distance_km(a, b);
                    let within = searcher.prefs.radius_km.map_or(false, |r| d <= r)
                        && cand.prefs.radius_km.map_or(false, |r| d <= r);
                    if !within {
                        continue;
                    }
                    candidates.push((cand.clone(), Some(d)));
                } else {
                    candidates.push((cand.clone(), None));
                }
            }
            // Geo queue: nearest first. Global queue keeps arrival order.
            if local {
                candidates.sort_by(|x, y| {
                    x.1.partial_cmp(&y.1).unwrap_or(std::cmp::Ordering::Equal)
                });
            }
            candidates
        };

        for (cand, dist) in candidates {
            let cand_profile = match self.directory.profiles.fetch(&cand.user_id).await {
                Ok(Some(p)) if !p.deleted => p,
                Ok(_) => {
                    // Candidate vanished; purge their stale entry and move on.
                    self.state.lock().await.purge(&cand.user_id);
                    continue;
                }
                Err(err) => {
                    tracing::warn!(candidate = %cand.user_id, error = %err, "candidate profile fetch failed, skipping");
                    continue;
                }
            };

            // Canonical check order: mutual gender, mutual age, block.
            if !searcher.prefs.gender.accepts(cand_profile.gender)
                || !cand.prefs.gender.accepts(searcher_profile.gender)
            {
                continue;
            }
            let age_ok = (searcher.prefs.age_min..=searcher.prefs.age_max)
                .contains(&cand_profile.age)
                && (cand.prefs.age_min..=cand.prefs.age_max).contains(&searcher_profile.age);
            if !age_ok {
                continue;
            }
            if self
                .directory
                .blocks
                .is_blocked(&searcher.user_id, &cand.user_id)
                .await?
            {
                continue;
            }

            // Claim: re-validate and commit remove+register as one step.
            let cand_entry = {
                let mut st = self.state.lock().await;
                let searcher_waiting = st.queue(local).contains(&searcher.user_id)
                    && !st.registry.is_matched(&searcher.user_id);
                if !searcher_waiting {
                    return Ok(ScanResult::Superseded);
                }
                if !st.queue(local).contains(&cand.user_id)
                    || st.registry.is_matched(&cand.user_id)
                {
                    continue;
                }
                st.queue_mut(local).remove(&searcher.user_id);
                let cand_entry = st.queue_mut(local).remove(&cand.user_id);
                st.registry.pair(&searcher.user_id, &cand.user_id);
                cand_entry
            };

            let conversation_id = match self
                .resolve_conversation(&searcher.user_id, &cand.user_id, searcher.prefs.mode)
                .await
            {
                Ok(id) => id,
                Err(err) => {
                    // Only the searcher's operation fails: unwind the pair
                    // and put the candidate back where they were waiting.
                    let mut st = self.state.lock().await;
                    st.registry.unpair(&searcher.user_id);
                    if let Some(entry) = cand_entry {
                        st.queue_mut(local).push(entry);
                    }
                    return Err(err);
                }
            };

            return Ok(ScanResult::Matched(Box::new(MatchResult {
                match_id: Uuid::new_v4().to_string(),
                conversation_id,
                mode: searcher.prefs.mode,
                distance_km: dist.map(|d| (d * 10.0).round() / 10.0),
                searcher: MatchedSide {
                    user_id: searcher.user_id.clone(),
                    connection_id: searcher.connection_id.clone(),
                    profile: searcher_profile.public(),
                },
                partner: MatchedSide {
                    user_id: cand.user_id.clone(),
                    connection_id: cand.connection_id.clone(),
                    profile: cand_profile.public(),
                },
            })));
        }

        Ok(ScanResult::NoCandidate)
    }

    /// Conversation binder: reuse the pair's active conversation or create
    /// one. Only invoked inside the already-exclusive match selection.
    async fn resolve_conversation(
        &self,
        a: &str,
        b: &str,
        mode: Mode,
    ) -> Result<String, MatchError> {
        if let Some(id) = self.directory.conversations.find_active(a, b).await? {
            self.directory.conversations.reactivate(&id).await?;
            Ok(id)
        } else {
            Ok(self.directory.conversations.create(a, b, mode).await?)
        }
    }

    /// Remove the user's queue entry if present. Idempotent.
    pub async fn stop_search(&self, user_id: &str) -> bool {
        self.state.lock().await.purge(user_id)
    }

    /// Tear down the caller's active match. Returns the former partner.
    pub async fn skip(&self, user_id: &str) -> Result<String, MatchError> {
        let mut st = self.state.lock().await;
        st.registry
            .unpair(user_id)
            .ok_or_else(|| MatchError::StateConflict("no active match to skip".into()))
    }

    /// Disconnect teardown: drop any queue entry and unpair in one pass.
    /// Safe to call on already-cleaned-up state.
    pub async fn disconnect(&self, user_id: &str) -> DisconnectCleanup {
        let mut st = self.state.lock().await;
        DisconnectCleanup {
            was_queued: st.purge(user_id),
            partner: st.registry.unpair(user_id),
        }
    }

    pub async fn partner_of(&self, user_id: &str) -> Option<String> {
        self.state
            .lock()
            .await
            .registry
            .partner_of(user_id)
            .map(str::to_string)
    }

    pub async fn is_matched(&self, user_id: &str) -> bool {
        self.state.lock().await.registry.is_matched(user_id)
    }

    /// Users currently waiting, oldest first, for the retry policy.
    pub async fn waiting(&self) -> Vec<String> {
        let st = self.state.lock().await;
        let mut ids = st.global.user_ids();
        ids.extend(st.local.user_ids());
        ids
    }

    /// (global queue, local queue, active matches) gauges for /health.
    pub async fn gauges(&self) -> (usize, usize, usize) {
        let st = self.state.lock().await;
        (st.global.len(), st.local.len(), st.registry.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::directory::MemoryDirectory;
    use crate::geo::Coordinates;
    use crate::protocol::{Gender, GenderPref};

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

    fn prefs(mode: Mode, lo: u8, hi: u8, gender: GenderPref) -> SearchPrefs {
        SearchPrefs {
            mode,
            age_min: lo,
            age_max: hi,
            gender,
            radius_km: None,
        }
    }

    fn geo_prefs(radius: f64) -> SearchPrefs {
        SearchPrefs {
            mode: Mode::Video,
            age_min: 18,
            age_max: 99,
            gender: GenderPref::All,
            radius_km: Some(radius),
        }
    }

    fn setup() -> (Arc<MemoryDirectory>, Matcher) {
        let dir = Arc::new(MemoryDirectory::new());
        let matcher = Matcher::new(Arc::new(Directory::in_memory(dir.clone())));
        (dir, matcher)
    }

    // About 4 km north of the origin.
    const FOUR_KM_LAT: f64 = 0.036;

    #[tokio::test]
    async fn compatible_pair_matches_with_shared_conversation() {
        let (dir, matcher) = setup();
        dir.insert_profile(profile("a", 25, Gender::Male));
        dir.insert_profile(profile("b", 25, Gender::Female));

        let first = matcher
            .start_search("a", "c-a", prefs(Mode::Chat, 20, 30, GenderPref::All), false)
            .await
            .unwrap();
        assert!(matches!(first, SearchOutcome::Queued { position: 1 }));

        let second = matcher
            .start_search("b", "c-b", prefs(Mode::Chat, 20, 30, GenderPref::All), false)
            .await
            .unwrap();
        let result = match second {
            SearchOutcome::Matched(r) => r,
            other => panic!("expected match, got {:?}", other),
        };
        assert_eq!(result.partner.user_id, "a");
        assert_eq!(result.searcher.user_id, "b");
        assert!(result.distance_km.is_none());

        // Both queues empty, registry symmetric.
        let (g, l, m) = matcher.gauges().await;
        assert_eq!((g, l, m), (0, 0, 1));
        assert_eq!(matcher.partner_of("a").await.as_deref(), Some("b"));
        assert_eq!(matcher.partner_of("b").await.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn mode_mismatch_does_not_match() {
        let (dir, matcher) = setup();
        dir.insert_profile(profile("a", 25, Gender::Male));
        dir.insert_profile(profile("b", 25, Gender::Female));

        matcher
            .start_search("a", "c-a", prefs(Mode::Chat, 18, 99, GenderPref::All), false)
            .await
            .unwrap();
        let out = matcher
            .start_search("b", "c-b", prefs(Mode::Video, 18, 99, GenderPref::All), false)
            .await
            .unwrap();
        assert!(matches!(out, SearchOutcome::Queued { .. }));
    }

    #[tokio::test]
    async fn mutual_age_check_goes_both_ways() {
        let (dir, matcher) = setup();
        dir.insert_profile(profile("a", 40, Gender::Male));
        dir.insert_profile(profile("b", 25, Gender::Female));

        // b's age fits a's range, but a's age does not fit b's.
        matcher
            .start_search("a", "c-a", prefs(Mode::Chat, 18, 99, GenderPref::All), false)
            .await
            .unwrap();
        let out = matcher
            .start_search("b", "c-b", prefs(Mode::Chat, 20, 30, GenderPref::All), false)
            .await
            .unwrap();
        assert!(matches!(out, SearchOutcome::Queued { .. }));
    }

    #[tokio::test]
    async fn mutual_gender_check_goes_both_ways() {
        let (dir, matcher) = setup();
        dir.insert_profile(profile("a", 25, Gender::Male));
        dir.insert_profile(profile("b", 25, Gender::Female));

        // a accepts anyone; b only wants women.
        matcher
            .start_search("a", "c-a", prefs(Mode::Chat, 18, 99, GenderPref::All), false)
            .await
            .unwrap();
        let out = matcher
            .start_search("b", "c-b", prefs(Mode::Chat, 18, 99, GenderPref::Female), false)
            .await
            .unwrap();
        assert!(matches!(out, SearchOutcome::Queued { .. }));
    }

    #[tokio::test]
    async fn blocked_pair_never_matches() {
        let (dir, matcher) = setup();
        dir.insert_profile(profile("a", 25, Gender::Male));
        dir.insert_profile(profile("b", 25, Gender::Female));
        dir.block("b", "a");

        matcher
            .start_search("a", "c-a", prefs(Mode::Chat, 18, 99, GenderPref::All), false)
            .await
            .unwrap();
        let out = matcher
            .start_search("b", "c-b", prefs(Mode::Chat, 18, 99, GenderPref::All), false)
            .await
            .unwrap();
        assert!(matches!(out, SearchOutcome::Queued { .. }));
    }

    #[tokio::test]
    async fn geo_match_requires_mutual_radius() {
        let (dir, matcher) = setup();
        dir.insert_profile(profile("a", 25, Gender::Male));
        dir.insert_profile(profile("b", 25, Gender::Female));
        dir.set_location("a", Coordinates { lat: 0.0, lng: 0.0 });
        dir.set_location("b", Coordinates { lat: FOUR_KM_LAT, lng: 0.0 });

        // a would accept (5 km radius) but b's 3 km radius excludes a.
        matcher
            .start_search("a", "c-a", geo_prefs(5.0), true)
            .await
            .unwrap();
        let out = matcher
            .start_search("b", "c-b", geo_prefs(3.0), true)
            .await
            .unwrap();
        assert!(matches!(out, SearchOutcome::Queued { .. }));

        // Both still queued.
        let (_, l, m) = matcher.gauges().await;
        assert_eq!((l, m), (2, 0));
    }

    #[tokio::test]
    async fn geo_match_reports_distance_and_picks_nearest() {
        let (dir, matcher) = setup();
        dir.insert_profile(profile("far", 25, Gender::Male));
        dir.insert_profile(profile("near", 25, Gender::Male));
        dir.insert_profile(profile("s", 25, Gender::Female));
        dir.set_location("far", Coordinates { lat: FOUR_KM_LAT, lng: 0.0 });
        dir.set_location("near", Coordinates { lat: FOUR_KM_LAT / 4.0, lng: 0.0 });
        dir.set_location("s", Coordinates { lat: 0.0, lng: 0.0 });

        // Both waiting users only accept women, so they cannot pair with
        // each other while they wait.
        let men_prefs = SearchPrefs {
            gender: GenderPref::Female,
            ..geo_prefs(10.0)
        };

        // "far" enqueued first; nearest-first ordering must still win.
        matcher.start_search("far", "c-f", men_prefs.clone(), true).await.unwrap();
        matcher.start_search("near", "c-n", men_prefs, true).await.unwrap();
        let out = matcher.start_search("s", "c-s", geo_prefs(10.0), true).await.unwrap();
        let result = match out {
            SearchOutcome::Matched(r) => r,
            other => panic!("expected match, got {:?}", other),
        };
        assert_eq!(result.partner.user_id, "near");
        let d = result.distance_km.unwrap();
        assert!(d > 0.5 && d < 1.5, "got {}", d);
    }

    #[tokio::test]
    async fn local_search_without_location_is_rejected() {
        let (dir, matcher) = setup();
        dir.insert_profile(profile("a", 25, Gender::Male));
        let err = matcher
            .start_search("a", "c-a", geo_prefs(5.0), true)
            .await
            .unwrap_err();
        assert!(matches!(err, MatchError::Validation(_)));
        let (_, l, _) = matcher.gauges().await;
        assert_eq!(l, 0);
    }

    #[tokio::test]
    async fn unknown_user_is_rejected_and_purged() {
        let (_, matcher) = setup();
        let err = matcher
            .start_search("ghost", "c-g", prefs(Mode::Chat, 18, 99, GenderPref::All), false)
            .await
            .unwrap_err();
        assert!(matches!(err, MatchError::NotFound(_)));
    }

    #[tokio::test]
    async fn re_enqueue_is_idempotent_and_reports_position() {
        let (dir, matcher) = setup();
        dir.insert_profile(profile("a", 25, Gender::Male));
        dir.insert_profile(profile("b", 60, Gender::Male));

        matcher
            .start_search("b", "c-b", prefs(Mode::Chat, 55, 99, GenderPref::All), false)
            .await
            .unwrap();
        matcher
            .start_search("a", "c-a", prefs(Mode::Chat, 18, 30, GenderPref::All), false)
            .await
            .unwrap();
        let again = matcher
            .start_search("a", "c-a", prefs(Mode::Chat, 18, 30, GenderPref::All), false)
            .await
            .unwrap();
        match again {
            SearchOutcome::Queued { position } => assert_eq!(position, 2),
            other => panic!("expected queued, got {:?}", other),
        }
        let (g, _, _) = matcher.gauges().await;
        assert_eq!(g, 2);
    }

    #[tokio::test]
    async fn already_matched_user_cannot_search() {
        let (dir, matcher) = setup();
        dir.insert_profile(profile("a", 25, Gender::Male));
        dir.insert_profile(profile("b", 25, Gender::Female));
        matcher
            .start_search("a", "c-a", prefs(Mode::Chat, 18, 99, GenderPref::All), false)
            .await
            .unwrap();
        matcher
            .start_search("b", "c-b", prefs(Mode::Chat, 18, 99, GenderPref::All), false)
            .await
            .unwrap();

        let err = matcher
            .start_search("a", "c-a", prefs(Mode::Chat, 18, 99, GenderPref::All), false)
            .await
            .unwrap_err();
        assert!(matches!(err, MatchError::StateConflict(_)));
    }

    #[tokio::test]
    async fn stop_search_is_idempotent() {
        let (dir, matcher) = setup();
        dir.insert_profile(profile("a", 25, Gender::Male));
        matcher
            .start_search("a", "c-a", prefs(Mode::Chat, 18, 99, GenderPref::All), false)
            .await
            .unwrap();
        assert!(matcher.stop_search("a").await);
        assert!(!matcher.stop_search("a").await);
        let (g, l, _) = matcher.gauges().await;
        assert_eq!((g, l), (0, 0));
    }

    #[tokio::test]
    async fn skip_clears_registry_for_both_sides() {
        let (dir, matcher) = setup();
        dir.insert_profile(profile("a", 25, Gender::Male));
        dir.insert_profile(profile("b", 25, Gender::Female));
        matcher
            .start_search("a", "c-a", prefs(Mode::Chat, 18, 99, GenderPref::All), false)
            .await
            .unwrap();
        matcher
            .start_search("b", "c-b", prefs(Mode::Chat, 18, 99, GenderPref::All), false)
            .await
            .unwrap();

        assert_eq!(matcher.skip("a").await.unwrap(), "b");
        assert!(!matcher.is_matched("a").await);
        assert!(!matcher.is_matched("b").await);

        // Skip with no active match is a state conflict.
        let err = matcher.skip("a").await.unwrap_err();
        assert!(matches!(err, MatchError::StateConflict(_)));
    }

    #[tokio::test]
    async fn rematch_after_skip_reuses_the_conversation() {
        let (dir, matcher) = setup();
        dir.insert_profile(profile("a", 25, Gender::Male));
        dir.insert_profile(profile("b", 25, Gender::Female));
        let p = prefs(Mode::Chat, 18, 99, GenderPref::All);

        matcher.start_search("a", "c-a", p.clone(), false).await.unwrap();
        let first = match matcher.start_search("b", "c-b", p.clone(), false).await.unwrap() {
            SearchOutcome::Matched(r) => r.conversation_id.clone(),
            other => panic!("expected match, got {:?}", other),
        };

        matcher.skip("a").await.unwrap();
        matcher.start_search("a", "c-a", p.clone(), false).await.unwrap();
        let second = match matcher.start_search("b", "c-b", p, false).await.unwrap() {
            SearchOutcome::Matched(r) => r.conversation_id.clone(),
            other => panic!("expected match, got {:?}", other),
        };
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn matched_users_are_not_candidates_for_a_third_searcher() {
        let (dir, matcher) = setup();
        dir.insert_profile(profile("a", 25, Gender::Male));
        dir.insert_profile(profile("b", 25, Gender::Female));
        dir.insert_profile(profile("c", 25, Gender::Other));
        let p = prefs(Mode::Chat, 18, 99, GenderPref::All);

        matcher.start_search("a", "c-a", p.clone(), false).await.unwrap();
        matcher.start_search("b", "c-b", p.clone(), false).await.unwrap();
        let out = matcher.start_search("c", "c-c", p, false).await.unwrap();
        assert!(matches!(out, SearchOutcome::Queued { position: 1 }));

        // No user id is both queued and registered.
        assert!(!matcher.is_matched("c").await);
        assert_eq!(matcher.gauges().await, (1, 0, 1));
    }

    #[tokio::test]
    async fn no_double_match_under_concurrent_searches() {
        let (dir, matcher) = setup();
        let matcher = Arc::new(matcher);
        for id in ["a", "b", "c", "d"] {
            dir.insert_profile(profile(id, 25, Gender::Other));
        }
        let p = prefs(Mode::Chat, 18, 99, GenderPref::All);

        let mut matched = Vec::new();
        let mut handles = Vec::new();
        for id in ["a", "b", "c", "d"] {
            let m = matcher.clone();
            let p = p.clone();
            handles.push(tokio::spawn(async move {
                m.start_search(id, &format!("c-{}", id), p, false).await
            }));
        }
        for h in handles {
            if let SearchOutcome::Matched(r) = h.await.unwrap().unwrap() {
                matched.push((r.searcher.user_id.clone(), r.partner.user_id.clone()));
            }
        }

        // Every announced pair is disjoint and the registry pairs everyone
        // at most once.
        let mut seen = std::collections::HashSet::new();
        for (x, y) in &matched {
            assert!(seen.insert(x.clone()), "{} matched twice", x);
            assert!(seen.insert(y.clone()), "{} matched twice", y);
        }
        let (g, _, m) = matcher.gauges().await;
        assert_eq!(g + 2 * m, 4);
    }

    struct UnavailableConversations;

    #[async_trait::async_trait]
    impl crate::directory::ConversationStore for UnavailableConversations {
        async fn find_active(&self, _a: &str, _b: &str) -> anyhow::Result<Option<String>> {
            Err(anyhow::anyhow!("conversation store unreachable"))
        }

        async fn create(&self, _a: &str, _b: &str, _mode: Mode) -> anyhow::Result<String> {
            Err(anyhow::anyhow!("conversation store unreachable"))
        }

        async fn reactivate(&self, _conversation_id: &str) -> anyhow::Result<()> {
            Err(anyhow::anyhow!("conversation store unreachable"))
        }
    }

    #[tokio::test]
    async fn binder_failure_requeues_the_candidate() {
        let dir = Arc::new(MemoryDirectory::new());
        dir.insert_profile(profile("a", 25, Gender::Male));
        dir.insert_profile(profile("b", 25, Gender::Female));
        let directory = Directory {
            identity: dir.clone(),
            profiles: dir.clone(),
            locations: dir.clone(),
            blocks: dir.clone(),
            conversations: Arc::new(UnavailableConversations),
        };
        let matcher = Matcher::new(Arc::new(directory));
        let p = prefs(Mode::Chat, 18, 99, GenderPref::All);

        matcher.start_search("b", "c-b", p.clone(), false).await.unwrap();
        let err = matcher.start_search("a", "c-a", p, false).await.unwrap_err();
        assert!(matches!(err, MatchError::Collaborator(_)));

        // The searcher's operation failed; the candidate's queued state
        // survives and the registry holds no half-committed pair.
        assert!(!matcher.is_matched("a").await);
        assert!(!matcher.is_matched("b").await);
        let st = matcher.gauges().await;
        assert_eq!(st, (1, 0, 0));
    }

    #[tokio::test]
    async fn disconnect_cleans_queue_and_registry() {
        let (dir, matcher) = setup();
        dir.insert_profile(profile("a", 25, Gender::Male));
        dir.insert_profile(profile("b", 25, Gender::Female));
        let p = prefs(Mode::Chat, 18, 99, GenderPref::All);

        matcher.start_search("a", "c-a", p.clone(), false).await.unwrap();
        matcher.start_search("b", "c-b", p, false).await.unwrap();

        let cleanup = matcher.disconnect("a").await;
        assert!(!cleanup.was_queued);
        assert_eq!(cleanup.partner.as_deref(), Some("b"));
        assert!(!matcher.is_matched("b").await);

        // Re-entrant: a second teardown finds nothing.
        let again = matcher.disconnect("a").await;
        assert!(!again.was_queued);
        assert!(again.partner.is_none());
    }

    #[tokio::test]
    async fn lone_searcher_is_never_matched() {
        let (dir, matcher) = setup();
        dir.insert_profile(profile("a", 25, Gender::Male));
        let out = matcher
            .start_search("a", "c-a", prefs(Mode::Chat, 18, 99, GenderPref::All), false)
            .await
            .unwrap();
        assert!(matches!(out, SearchOutcome::Queued { position: 1 }));
        assert!(matcher.research("a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn research_matches_waiting_pair() {
        let (dir, matcher) = setup();
        dir.insert_profile(profile("a", 25, Gender::Male));
        dir.insert_profile(profile("b", 60, Gender::Male));

        // Incompatible at enqueue time (age), so both wait.
        matcher
            .start_search("a", "c-a", prefs(Mode::Chat, 18, 30, GenderPref::All), false)
            .await
            .unwrap();
        matcher
            .start_search("b", "c-b", prefs(Mode::Chat, 18, 99, GenderPref::All), false)
            .await
            .unwrap();

        // b's profile "changes" (simulated by re-inserting a younger one);
        // the periodic retry can now pair them.
        dir.insert_profile(profile("b", 28, Gender::Male));
        let result = matcher.research("a").await.unwrap().unwrap();
        assert_eq!(result.partner.user_id, "b");
        assert_eq!(matcher.gauges().await, (0, 0, 1));
    }
}
