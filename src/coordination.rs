use std::{
    collections::HashSet,
    sync::Mutex,
    time::{Duration, Instant},
};

use dashmap::{DashMap, mapref::entry::Entry};
use uuid::Uuid;

use crate::player::{PlayerUsername, normalize_username};

pub type InteractionId = Uuid;

pub type MatchId = String;

#[derive(Clone, Debug, PartialEq)]
pub struct PendingReport {
    pub reporter: PlayerUsername,
    pub claimed_winner: PlayerUsername,
}

#[derive(Clone, Debug)]
pub struct PendingRematch {
    pub player1: PlayerUsername,
    pub player2: PlayerUsername,
    pub accepted: HashSet<String>,
    pub offered_at: Instant,
}

impl PendingRematch {
    fn is_participant(&self, handle: &str) -> bool {
        let handle = normalize_username(handle);
        normalize_username(&self.player1) == handle || normalize_username(&self.player2) == handle
    }
}

#[derive(Debug)]
pub enum RematchResponse {
    /// No rematch window is open for the match (never offered, resolved, or
    /// expired).
    NoWindow,
    NotParticipant,
    /// The responder already accepted once.
    Duplicate,
    /// First acceptance recorded, waiting for the other participant.
    Waiting,
    /// Both participants accepted; the window is consumed.
    Ready(PendingRematch),
    /// The responder declined; the window is consumed.
    Declined(PendingRematch),
}

/// Process-local coordination maps. A handle appears in `player_locks` iff
/// the player is engaged in an invite, an active match, or a rematch window.
/// All keys are lowercase-normalized handles.
pub struct CoordinationState {
    player_locks: DashMap<String, InteractionId>,
    pending_reports: DashMap<MatchId, PendingReport>,
    pending_rematches: DashMap<MatchId, PendingRematch>,
    claim_guard: Mutex<()>,
}

impl CoordinationState {
    pub fn new() -> Self {
        Self {
            player_locks: DashMap::new(),
            pending_reports: DashMap::new(),
            pending_rematches: DashMap::new(),
            claim_guard: Mutex::new(()),
        }
    }

    /// Combined check-and-claim: both handles must be free, and both are
    /// claimed together. The guard serializes claims so two overlapping
    /// invites cannot both succeed.
    pub fn claim_pair(
        &self,
        a: &PlayerUsername,
        b: &PlayerUsername,
        id: InteractionId,
    ) -> Result<(), ()> {
        let a = normalize_username(a);
        let b = normalize_username(b);
        let _guard = self.claim_guard.lock().expect("Failed to lock claim guard");
        if self.player_locks.contains_key(&a) || self.player_locks.contains_key(&b) {
            return Err(());
        }
        self.player_locks.insert(a, id);
        self.player_locks.insert(b, id);
        Ok(())
    }

    /// Consumes an invite: verifies the challenger still holds it, then
    /// rotates both handles to a fresh id for the match phase. A repeated
    /// accept no longer matches the invite id and fails, so one invite can
    /// produce at most one match. The locks themselves stay held.
    pub fn begin_match(
        &self,
        challenger: &PlayerUsername,
        opponent: &PlayerUsername,
        id: InteractionId,
    ) -> Result<InteractionId, ()> {
        let _guard = self.claim_guard.lock().expect("Failed to lock claim guard");
        if self.lock_of(challenger) != Some(id) {
            return Err(());
        }
        let next = Uuid::new_v4();
        self.player_locks.insert(normalize_username(challenger), next);
        self.player_locks.insert(normalize_username(opponent), next);
        Ok(next)
    }

    /// Lenient release: removes whatever is present for either handle.
    pub fn release_pair(&self, a: &PlayerUsername, b: &PlayerUsername) {
        self.player_locks.remove(&normalize_username(a));
        self.player_locks.remove(&normalize_username(b));
    }

    pub fn lock_of(&self, handle: &PlayerUsername) -> Option<InteractionId> {
        self.player_locks
            .get(&normalize_username(handle))
            .map(|entry| *entry.value())
    }

    pub fn is_locked(&self, handle: &PlayerUsername) -> bool {
        self.player_locks.contains_key(&normalize_username(handle))
    }

    /// Insert-if-absent. A second report for the same match never overwrites
    /// the first; the existing report is returned instead.
    pub fn insert_report(
        &self,
        match_id: &MatchId,
        report: PendingReport,
    ) -> Result<(), PendingReport> {
        match self.pending_reports.entry(match_id.clone()) {
            Entry::Occupied(entry) => Err(entry.get().clone()),
            Entry::Vacant(entry) => {
                entry.insert(report);
                Ok(())
            }
        }
    }

    pub fn get_report(&self, match_id: &MatchId) -> Option<PendingReport> {
        self.pending_reports
            .get(match_id)
            .map(|entry| entry.value().clone())
    }

    pub fn remove_report(&self, match_id: &MatchId) -> Option<PendingReport> {
        self.pending_reports.remove(match_id).map(|(_, v)| v)
    }

    pub fn offer_rematch(&self, match_id: &MatchId, p1: PlayerUsername, p2: PlayerUsername) {
        self.pending_rematches.insert(
            match_id.clone(),
            PendingRematch {
                player1: p1,
                player2: p2,
                accepted: HashSet::new(),
                offered_at: Instant::now(),
            },
        );
    }

    pub fn get_rematch(&self, match_id: &MatchId) -> Option<PendingRematch> {
        self.pending_rematches
            .get(match_id)
            .map(|entry| entry.value().clone())
    }

    /// Applies a participant's response to an open rematch window. Removal
    /// is the commit point: whichever caller removes the entry first wins
    /// any race with a concurrent decline or expiry.
    pub fn respond_rematch(
        &self,
        match_id: &MatchId,
        responder: &PlayerUsername,
        accept: bool,
    ) -> RematchResponse {
        if !accept {
            let Some(entry) = self.pending_rematches.get(match_id) else {
                return RematchResponse::NoWindow;
            };
            if !entry.is_participant(responder) {
                return RematchResponse::NotParticipant;
            }
            drop(entry);
            return match self.pending_rematches.remove(match_id) {
                Some((_, pending)) => RematchResponse::Declined(pending),
                None => RematchResponse::NoWindow,
            };
        }

        let ready = {
            let Some(mut entry) = self.pending_rematches.get_mut(match_id) else {
                return RematchResponse::NoWindow;
            };
            if !entry.is_participant(responder) {
                return RematchResponse::NotParticipant;
            }
            if !entry.accepted.insert(normalize_username(responder)) {
                return RematchResponse::Duplicate;
            }
            entry.accepted.len() == 2
        };
        if !ready {
            return RematchResponse::Waiting;
        }
        match self.pending_rematches.remove(match_id) {
            Some((_, pending)) => RematchResponse::Ready(pending),
            None => RematchResponse::NoWindow,
        }
    }

    /// Removes and returns every rematch window older than `window`.
    pub fn take_expired_rematches(&self, window: Duration) -> Vec<(MatchId, PendingRematch)> {
        let expired: Vec<MatchId> = self
            .pending_rematches
            .iter()
            .filter(|entry| entry.value().offered_at.elapsed() > window)
            .map(|entry| entry.key().clone())
            .collect();
        expired
            .into_iter()
            .filter_map(|id| self.pending_rematches.remove(&id))
            .collect()
    }
}

impl Default for CoordinationState {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claim_pair_rejects_overlap() {
        let state = CoordinationState::new();
        let first = Uuid::new_v4();
        state
            .claim_pair(&"a".to_string(), &"b".to_string(), first)
            .expect("Failed to claim free pair");

        assert!(
            state
                .claim_pair(&"c".to_string(), &"B".to_string(), Uuid::new_v4())
                .is_err()
        );
        assert!(!state.is_locked(&"c".to_string()));
        assert_eq!(state.lock_of(&"b".to_string()), Some(first));

        state.release_pair(&"a".to_string(), &"b".to_string());
        assert!(
            state
                .claim_pair(&"c".to_string(), &"b".to_string(), Uuid::new_v4())
                .is_ok()
        );
    }

    #[test]
    fn test_begin_match_consumes_invite() {
        let state = CoordinationState::new();
        let invite = Uuid::new_v4();
        state
            .claim_pair(&"a".to_string(), &"b".to_string(), invite)
            .expect("Failed to claim free pair");

        let match_phase = state
            .begin_match(&"a".to_string(), &"b".to_string(), invite)
            .expect("Failed to consume invite");
        assert_ne!(match_phase, invite);
        assert_eq!(state.lock_of(&"a".to_string()), Some(match_phase));
        assert_eq!(state.lock_of(&"b".to_string()), Some(match_phase));

        // The invite id is spent; a repeat accept fails.
        assert!(
            state
                .begin_match(&"a".to_string(), &"b".to_string(), invite)
                .is_err()
        );

        state.release_pair(&"a".to_string(), &"b".to_string());
        assert!(!state.is_locked(&"a".to_string()));
    }

    #[test]
    fn test_second_report_never_overwrites() {
        let state = CoordinationState::new();
        let match_id = "m1".to_string();
        let first = PendingReport {
            reporter: "a".to_string(),
            claimed_winner: "a".to_string(),
        };
        state
            .insert_report(&match_id, first.clone())
            .expect("Failed to insert first report");

        let second = PendingReport {
            reporter: "b".to_string(),
            claimed_winner: "b".to_string(),
        };
        let existing = state.insert_report(&match_id, second).unwrap_err();
        assert_eq!(existing, first);
        assert_eq!(state.get_report(&match_id), Some(first));
    }

    #[test]
    fn test_rematch_accept_accept() {
        let state = CoordinationState::new();
        let match_id = "m1".to_string();
        state.offer_rematch(&match_id, "a".to_string(), "b".to_string());

        assert!(matches!(
            state.respond_rematch(&match_id, &"a".to_string(), true),
            RematchResponse::Waiting
        ));
        assert!(matches!(
            state.respond_rematch(&match_id, &"a".to_string(), true),
            RematchResponse::Duplicate
        ));
        assert!(matches!(
            state.respond_rematch(&match_id, &"b".to_string(), true),
            RematchResponse::Ready(_)
        ));
        // The window is consumed.
        assert!(matches!(
            state.respond_rematch(&match_id, &"a".to_string(), true),
            RematchResponse::NoWindow
        ));
    }

    #[test]
    fn test_rematch_decline_consumes_window() {
        let state = CoordinationState::new();
        let match_id = "m1".to_string();
        state.offer_rematch(&match_id, "a".to_string(), "b".to_string());

        assert!(matches!(
            state.respond_rematch(&match_id, &"c".to_string(), false),
            RematchResponse::NotParticipant
        ));
        assert!(matches!(
            state.respond_rematch(&match_id, &"b".to_string(), false),
            RematchResponse::Declined(_)
        ));
        assert!(matches!(
            state.respond_rematch(&match_id, &"a".to_string(), true),
            RematchResponse::NoWindow
        ));
    }

    #[test]
    fn test_expired_rematches_are_removed() {
        let state = CoordinationState::new();
        state.offer_rematch(&"m1".to_string(), "a".to_string(), "b".to_string());

        assert!(state.take_expired_rematches(Duration::from_secs(60)).is_empty());
        let expired = state.take_expired_rematches(Duration::ZERO);
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].0, "m1");
        assert!(state.get_rematch(&"m1".to_string()).is_none());
    }
}
