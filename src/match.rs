use std::{sync::Arc, time::Duration};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::{
    ServiceError, ServiceResult,
    client::{ArcChannelService, ChannelService},
    coordination::{CoordinationState, MatchId, PendingReport, RematchResponse},
    persistence::matches::{ArcMatchRepository, MatchRepository},
    player::{PlayerId, PlayerUsername, normalize_username},
    pool::CharacterName,
    protocol::{MatchUpdate, MatchUpdateStatus, PushFrame},
    rating::RatingEngine,
};

#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchStatus {
    Active,
    Completed,
    Disputed,
}

impl MatchStatus {
    pub fn as_column(&self) -> &'static str {
        match self {
            MatchStatus::Active => "ACTIVE",
            MatchStatus::Completed => "COMPLETED",
            MatchStatus::Disputed => "DISPUTED",
        }
    }

    pub fn from_column(value: &str) -> Option<Self> {
        match value {
            "ACTIVE" => Some(MatchStatus::Active),
            "COMPLETED" => Some(MatchStatus::Completed),
            "DISPUTED" => Some(MatchStatus::Disputed),
            _ => None,
        }
    }
}

/// One participant of a match. The audit fields stay empty until the match
/// completes with an agreed winner.
#[derive(Clone, Debug, PartialEq)]
pub struct MatchSide {
    pub username: PlayerUsername,
    pub player_id: Option<PlayerId>,
    pub character: CharacterName,
    pub elo_before: Option<i32>,
    pub elo_after: Option<i32>,
    pub k_factor: Option<i32>,
}

impl MatchSide {
    pub fn new(
        username: PlayerUsername,
        player_id: Option<PlayerId>,
        character: CharacterName,
    ) -> Self {
        Self {
            username,
            player_id,
            character,
            elo_before: None,
            elo_after: None,
            k_factor: None,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct MatchRecord {
    pub id: MatchId,
    pub player1: MatchSide,
    pub player2: MatchSide,
    pub status: MatchStatus,
    pub winner_username: Option<PlayerUsername>,
    pub winner_id: Option<PlayerId>,
    pub played_at: i64,
}

impl MatchRecord {
    pub fn new_active(player1: MatchSide, player2: MatchSide) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            player1,
            player2,
            status: MatchStatus::Active,
            winner_username: None,
            winner_id: None,
            played_at: chrono::Utc::now().timestamp(),
        }
    }

    pub fn side_of(&self, handle: &str) -> Option<&MatchSide> {
        let handle = normalize_username(handle);
        if normalize_username(&self.player1.username) == handle {
            Some(&self.player1)
        } else if normalize_username(&self.player2.username) == handle {
            Some(&self.player2)
        } else {
            None
        }
    }

    pub fn is_participant(&self, handle: &str) -> bool {
        self.side_of(handle).is_some()
    }
}

#[async_trait::async_trait]
pub trait MatchService {
    async fn report(
        &self,
        match_id: &MatchId,
        reporter: &PlayerUsername,
        claimed_winner: &PlayerUsername,
    ) -> ServiceResult<()>;

    /// Returns the final status of the match: `Completed` when both reports
    /// agree, `Disputed` otherwise.
    async fn confirm(
        &self,
        match_id: &MatchId,
        confirmer: &PlayerUsername,
        claimed_winner: &PlayerUsername,
    ) -> ServiceResult<MatchStatus>;

    /// Returns the id of the newly created match once both participants have
    /// accepted.
    async fn rematch(
        &self,
        match_id: &MatchId,
        responder: &PlayerUsername,
        accept: bool,
    ) -> ServiceResult<Option<MatchId>>;
}

pub type ArcMatchService = Arc<Box<dyn MatchService + Send + Sync>>;

pub struct MatchServiceImpl {
    coordination: Arc<CoordinationState>,
    match_repository: ArcMatchRepository,
    channel: ArcChannelService,
    rating_engine: Arc<RatingEngine>,
    confirm_locks: DashMap<MatchId, Arc<Mutex<()>>>,
}

impl MatchServiceImpl {
    pub fn new(
        coordination: Arc<CoordinationState>,
        match_repository: ArcMatchRepository,
        channel: ArcChannelService,
        rating_engine: Arc<RatingEngine>,
    ) -> Self {
        Self {
            coordination,
            match_repository,
            channel,
            rating_engine,
            confirm_locks: DashMap::new(),
        }
    }

    /// Serializes finalization per match-id: without this, two concurrent
    /// confirms could both pass the report/status guards and run the rating
    /// engine twice for the same match.
    async fn confirm_guard(&self, match_id: &MatchId) -> OwnedMutexGuard<()> {
        let mutex = self
            .confirm_locks
            .entry(match_id.clone())
            .or_default()
            .value()
            .clone();
        mutex.lock_owned().await
    }

    fn load_active_match(&self, match_id: &MatchId) -> ServiceResult<MatchRecord> {
        let Some(record) = self.match_repository.find_by_id(match_id)? else {
            return ServiceError::not_found("Match not found");
        };
        if record.status != MatchStatus::Active {
            return ServiceError::invalid_state("Match is already finalized");
        }
        Ok(record)
    }

    fn push_to_both(&self, record_p1: &PlayerUsername, record_p2: &PlayerUsername, update: MatchUpdate) {
        let frame = PushFrame::MatchUpdates(update);
        self.channel.push_to(record_p1, &frame);
        self.channel.push_to(record_p2, &frame);
    }
}

#[async_trait::async_trait]
impl MatchService for MatchServiceImpl {
    async fn report(
        &self,
        match_id: &MatchId,
        reporter: &PlayerUsername,
        claimed_winner: &PlayerUsername,
    ) -> ServiceResult<()> {
        let record = self.load_active_match(match_id)?;
        if !record.is_participant(reporter) {
            return ServiceError::forbidden("You are not a participant of this match");
        }
        let Some(winner_side) = record.side_of(claimed_winner) else {
            return ServiceError::validation_err("Claimed winner is not a participant");
        };
        let report = PendingReport {
            reporter: reporter.clone(),
            claimed_winner: winner_side.username.clone(),
        };
        if self.coordination.insert_report(match_id, report).is_err() {
            return ServiceError::busy("Match result already reported");
        }
        log::info!(
            "Match {} reported by {}: winner {}",
            match_id,
            reporter,
            claimed_winner
        );

        let update = MatchUpdate {
            reporter_username: Some(reporter.clone()),
            claimed_winner: Some(claimed_winner.clone()),
            ..MatchUpdate::new(
                Some(match_id.clone()),
                MatchUpdateStatus::AwaitingConfirmation,
                record.player1.username.clone(),
                record.player2.username.clone(),
            )
        };
        self.push_to_both(&record.player1.username, &record.player2.username, update);
        Ok(())
    }

    async fn confirm(
        &self,
        match_id: &MatchId,
        confirmer: &PlayerUsername,
        claimed_winner: &PlayerUsername,
    ) -> ServiceResult<MatchStatus> {
        let _guard = self.confirm_guard(match_id).await;

        let Some(pending) = self.coordination.get_report(match_id) else {
            return ServiceError::invalid_state("No report to confirm for this match");
        };
        if normalize_username(&pending.reporter) == normalize_username(confirmer) {
            return ServiceError::busy("You already reported this match");
        }
        let mut record = self.load_active_match(match_id)?;
        if !record.is_participant(confirmer) {
            return ServiceError::forbidden("You are not a participant of this match");
        }
        if !record.is_participant(claimed_winner) {
            return ServiceError::validation_err("Claimed winner is not a participant");
        }

        let agreed =
            normalize_username(&pending.claimed_winner) == normalize_username(claimed_winner);
        let rating_result = if agreed {
            let winner = record
                .side_of(&pending.claimed_winner)
                .map(|side| (side.username.clone(), side.player_id))
                .expect("Reported winner was validated as a participant");
            // Ratings move first; the pending report is only consumed after
            // everything has committed, so a transient failure here leaves
            // the confirmation retriable.
            let result = self
                .rating_engine
                .apply_match_result(&mut record, &winner.0)
                .await?;
            record.status = MatchStatus::Completed;
            record.winner_username = Some(winner.0);
            record.winner_id = winner.1;
            Some(result)
        } else {
            record.status = MatchStatus::Disputed;
            None
        };
        if !self.match_repository.finalize_if_active(&record)? {
            return ServiceError::invalid_state("Match is already finalized");
        }

        self.coordination.remove_report(match_id);
        self.coordination.offer_rematch(
            match_id,
            record.player1.username.clone(),
            record.player2.username.clone(),
        );
        log::info!(
            "Match {} finalized as {} (confirmed by {})",
            match_id,
            record.status.as_column(),
            confirmer
        );

        let update = MatchUpdate {
            result: Some(record.status),
            winner_username: record.winner_username.clone(),
            player1_elo_delta: rating_result.as_ref().map(|r| r.player1.delta),
            player2_elo_delta: rating_result.as_ref().map(|r| r.player2.delta),
            player1_new_elo: rating_result.as_ref().map(|r| r.player1.rating_after),
            player2_new_elo: rating_result.as_ref().map(|r| r.player2.rating_after),
            ..MatchUpdate::new(
                Some(match_id.clone()),
                MatchUpdateStatus::RematchOffered,
                record.player1.username.clone(),
                record.player2.username.clone(),
            )
        };
        self.push_to_both(&record.player1.username, &record.player2.username, update);
        Ok(record.status)
    }

    async fn rematch(
        &self,
        match_id: &MatchId,
        responder: &PlayerUsername,
        accept: bool,
    ) -> ServiceResult<Option<MatchId>> {
        match self.coordination.respond_rematch(match_id, responder, accept) {
            RematchResponse::NoWindow => {
                ServiceError::invalid_state("No rematch window open for this match")
            }
            RematchResponse::NotParticipant => {
                ServiceError::forbidden("You are not a participant of this match")
            }
            RematchResponse::Duplicate => {
                ServiceError::busy("You already accepted the rematch")
            }
            RematchResponse::Waiting => {
                let (player1, player2) = match self.coordination.get_rematch(match_id) {
                    Some(pending) => (pending.player1, pending.player2),
                    None => (responder.clone(), responder.clone()),
                };
                let update = MatchUpdate::new(
                    Some(match_id.clone()),
                    MatchUpdateStatus::RematchWaiting,
                    player1,
                    player2,
                );
                self.channel
                    .push_to(responder, &PushFrame::MatchUpdates(update));
                Ok(None)
            }
            RematchResponse::Declined(pending) => {
                self.coordination
                    .release_pair(&pending.player1, &pending.player2);
                log::info!("Rematch for match {} declined by {}", match_id, responder);
                let update = MatchUpdate::new(
                    Some(match_id.clone()),
                    MatchUpdateStatus::RematchDeclined,
                    pending.player1.clone(),
                    pending.player2.clone(),
                );
                self.push_to_both(&pending.player1, &pending.player2, update);
                Ok(None)
            }
            RematchResponse::Ready(_) => {
                let Some(previous) = self.match_repository.find_by_id(match_id)? else {
                    return ServiceError::internal("Previous match vanished");
                };
                // Characters do not change across a rematch; the locks stay
                // held so the players remain continuously busy.
                let record = MatchRecord::new_active(
                    MatchSide::new(
                        previous.player1.username.clone(),
                        previous.player1.player_id,
                        previous.player1.character.clone(),
                    ),
                    MatchSide::new(
                        previous.player2.username.clone(),
                        previous.player2.player_id,
                        previous.player2.character.clone(),
                    ),
                );
                self.match_repository.insert(&record)?;
                log::info!(
                    "Rematch of {} started as match {} ({} vs {})",
                    match_id,
                    record.id,
                    record.player1.username,
                    record.player2.username
                );
                let update = MatchUpdate {
                    player1_character: Some(record.player1.character.clone()),
                    player2_character: Some(record.player2.character.clone()),
                    ..MatchUpdate::new(
                        Some(record.id.clone()),
                        MatchUpdateStatus::Started,
                        record.player1.username.clone(),
                        record.player2.username.clone(),
                    )
                };
                self.push_to_both(&record.player1.username, &record.player2.username, update);
                Ok(Some(record.id))
            }
        }
    }
}

/// Sweeps expired rematch windows, treating expiry as a decline.
pub struct RematchExpiryJob {
    coordination: Arc<CoordinationState>,
    channel: ArcChannelService,
    window: Duration,
}

impl RematchExpiryJob {
    pub fn new(
        coordination: Arc<CoordinationState>,
        channel: ArcChannelService,
        window: Duration,
    ) -> Self {
        Self {
            coordination,
            channel,
            window,
        }
    }

    pub async fn run(&self) {
        let mut interval = tokio::time::interval(Duration::from_secs(1));
        loop {
            interval.tick().await;
            self.sweep();
        }
    }

    pub fn sweep(&self) {
        for (match_id, pending) in self.coordination.take_expired_rematches(self.window) {
            log::info!("Rematch window for match {} expired", match_id);
            self.coordination
                .release_pair(&pending.player1, &pending.player2);
            let update = MatchUpdate::new(
                Some(match_id),
                MatchUpdateStatus::RematchDeclined,
                pending.player1.clone(),
                pending.player2.clone(),
            );
            let frame = PushFrame::MatchUpdates(update);
            self.channel.push_to(&pending.player1, &frame);
            self.channel.push_to(&pending.player2, &frame);
        }
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use crate::{
        client::MockChannelService,
        persistence::{
            matches::{MatchRepository, SqliteMatchRepository},
            new_memory_pool,
            players::{PlayerRepository, SqlitePlayerRepository},
            ratings::{RatingKey, RatingRepository, SqliteRatingRepository},
        },
        player::Player,
    };

    use super::*;

    struct Fixture {
        service: MatchServiceImpl,
        coordination: Arc<CoordinationState>,
        channel: MockChannelService,
        matches: ArcMatchRepository,
        ratings: crate::persistence::ratings::ArcRatingRepository,
        engine: Arc<RatingEngine>,
        a: Player,
        b: Player,
    }

    fn setup() -> Fixture {
        setup_with_lock_timeout(Duration::from_secs(5))
    }

    fn setup_with_lock_timeout(lock_timeout: Duration) -> Fixture {
        let pool = new_memory_pool();
        let players = SqlitePlayerRepository::new(pool.clone());
        let a = Player::new("a".to_string(), "hash".to_string());
        let b = Player::new("b".to_string(), "hash".to_string());
        players.insert(&a).expect("Failed to insert");
        players.insert(&b).expect("Failed to insert");

        let matches: ArcMatchRepository =
            Arc::new(Box::new(SqliteMatchRepository::new(pool.clone())));
        let ratings: crate::persistence::ratings::ArcRatingRepository =
            Arc::new(Box::new(SqliteRatingRepository::new(pool)));
        let engine = Arc::new(RatingEngine::new(ratings.clone(), lock_timeout));
        let coordination = Arc::new(CoordinationState::new());
        let channel = MockChannelService::default();
        let channel_arc: ArcChannelService = Arc::new(Box::new(channel.clone()));

        let service = MatchServiceImpl::new(
            coordination.clone(),
            matches.clone(),
            channel_arc,
            engine.clone(),
        );
        Fixture {
            service,
            coordination,
            channel,
            matches,
            ratings,
            engine,
            a,
            b,
        }
    }

    /// Inserts an ACTIVE match and claims both player locks, as an accepted
    /// invite would have.
    fn start_match(fixture: &Fixture) -> MatchId {
        let record = MatchRecord::new_active(
            MatchSide::new("a".to_string(), Some(fixture.a.id), "Fox".to_string()),
            MatchSide::new("b".to_string(), Some(fixture.b.id), "Marth".to_string()),
        );
        fixture.matches.insert(&record).expect("Failed to insert");
        fixture
            .coordination
            .claim_pair(&"a".to_string(), &"b".to_string(), Uuid::new_v4())
            .expect("Failed to claim pair");
        record.id
    }

    fn rating_of(fixture: &Fixture, player: &Player, character: &str) -> Option<i32> {
        fixture
            .ratings
            .get(&RatingKey {
                player_id: player.id,
                character: character.to_string(),
            })
            .expect("Failed to query")
            .map(|row| row.rating)
    }

    #[tokio::test]
    async fn test_happy_path() {
        let fixture = setup();
        let match_id = start_match(&fixture);

        fixture
            .service
            .report(&match_id, &"a".to_string(), &"a".to_string())
            .await
            .expect("Failed to report");
        let outcome = fixture
            .service
            .confirm(&match_id, &"b".to_string(), &"a".to_string())
            .await
            .expect("Failed to confirm");
        assert_eq!(outcome, MatchStatus::Completed);

        let record = fixture
            .matches
            .find_by_id(&match_id)
            .expect("Failed to query")
            .expect("Match not found");
        assert_eq!(record.status, MatchStatus::Completed);
        assert_eq!(record.winner_username, Some("a".to_string()));
        assert_eq!(record.winner_id, Some(fixture.a.id));
        assert_eq!(record.player1.elo_before, Some(1200));
        assert_eq!(record.player1.elo_after, Some(1220));
        assert_eq!(record.player1.k_factor, Some(40));
        assert_eq!(record.player2.elo_after, Some(1180));

        assert_eq!(rating_of(&fixture, &fixture.a, "Fox"), Some(1220));
        assert_eq!(rating_of(&fixture, &fixture.b, "Marth"), Some(1180));

        // Both players stay locked through the rematch window.
        assert!(fixture.coordination.is_locked(&"a".to_string()));
        assert!(fixture.coordination.is_locked(&"b".to_string()));
        assert!(fixture.coordination.get_rematch(&match_id).is_some());
        assert!(fixture.coordination.get_report(&match_id).is_none());

        let to_a = fixture.channel.frames_for("a");
        assert_eq!(to_a.len(), 2);
        assert!(matches!(
            &to_a[0],
            PushFrame::MatchUpdates(u) if u.status == MatchUpdateStatus::AwaitingConfirmation
                && u.reporter_username == Some("a".to_string())
        ));
        let PushFrame::MatchUpdates(offered) = &to_a[1] else {
            panic!("Expected a match update");
        };
        assert_eq!(offered.status, MatchUpdateStatus::RematchOffered);
        assert_eq!(offered.result, Some(MatchStatus::Completed));
        assert_eq!(offered.winner_username, Some("a".to_string()));
        assert_eq!(offered.player1_elo_delta, Some(20));
        assert_eq!(offered.player2_elo_delta, Some(-20));
        assert_eq!(offered.player1_new_elo, Some(1220));
        assert_eq!(offered.player2_new_elo, Some(1180));
        assert_eq!(fixture.channel.frames_for("b").len(), 2);
    }

    #[tokio::test]
    async fn test_disagreement_disputes_without_rating_movement() {
        let fixture = setup();
        let match_id = start_match(&fixture);

        fixture
            .service
            .report(&match_id, &"a".to_string(), &"a".to_string())
            .await
            .expect("Failed to report");
        let outcome = fixture
            .service
            .confirm(&match_id, &"b".to_string(), &"b".to_string())
            .await
            .expect("Failed to confirm");
        assert_eq!(outcome, MatchStatus::Disputed);

        let record = fixture
            .matches
            .find_by_id(&match_id)
            .expect("Failed to query")
            .expect("Match not found");
        assert_eq!(record.status, MatchStatus::Disputed);
        assert_eq!(record.winner_username, None);
        assert_eq!(record.player1.elo_before, None);
        assert_eq!(record.player2.elo_after, None);

        assert_eq!(rating_of(&fixture, &fixture.a, "Fox"), None);
        assert_eq!(rating_of(&fixture, &fixture.b, "Marth"), None);

        // Disputed matches still open a rematch window.
        assert!(fixture.coordination.get_rematch(&match_id).is_some());
        let to_b = fixture.channel.frames_for("b");
        let PushFrame::MatchUpdates(offered) = &to_b[1] else {
            panic!("Expected a match update");
        };
        assert_eq!(offered.result, Some(MatchStatus::Disputed));
        assert_eq!(offered.winner_username, None);
        assert_eq!(offered.player1_elo_delta, None);
    }

    #[tokio::test]
    async fn test_second_report_is_rejected_and_ignored() {
        let fixture = setup();
        let match_id = start_match(&fixture);

        fixture
            .service
            .report(&match_id, &"a".to_string(), &"a".to_string())
            .await
            .expect("Failed to report");
        let second = fixture
            .service
            .report(&match_id, &"b".to_string(), &"b".to_string())
            .await;
        assert!(matches!(second, Err(ServiceError::Busy(_))));

        let pending = fixture
            .coordination
            .get_report(&match_id)
            .expect("Report vanished");
        assert_eq!(pending.reporter, "a");
        assert_eq!(pending.claimed_winner, "a");

        // The confirm resolves against the first report.
        let outcome = fixture
            .service
            .confirm(&match_id, &"b".to_string(), &"a".to_string())
            .await
            .expect("Failed to confirm");
        assert_eq!(outcome, MatchStatus::Completed);
    }

    #[tokio::test]
    async fn test_reporter_cannot_confirm() {
        let fixture = setup();
        let match_id = start_match(&fixture);

        fixture
            .service
            .report(&match_id, &"a".to_string(), &"a".to_string())
            .await
            .expect("Failed to report");
        let result = fixture
            .service
            .confirm(&match_id, &"a".to_string(), &"a".to_string())
            .await;
        assert!(matches!(result, Err(ServiceError::Busy(_))));
    }

    #[tokio::test]
    async fn test_confirm_without_report() {
        let fixture = setup();
        let match_id = start_match(&fixture);
        let result = fixture
            .service
            .confirm(&match_id, &"b".to_string(), &"a".to_string())
            .await;
        assert!(matches!(result, Err(ServiceError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_report_validates_claimed_winner() {
        let fixture = setup();
        let match_id = start_match(&fixture);
        let result = fixture
            .service
            .report(&match_id, &"a".to_string(), &"c".to_string())
            .await;
        assert!(matches!(result, Err(ServiceError::Validation(_))));
        assert!(fixture.coordination.get_report(&match_id).is_none());
    }

    #[tokio::test]
    async fn test_rating_engine_failure_keeps_confirm_retriable() {
        let fixture = setup_with_lock_timeout(Duration::from_millis(20));
        let match_id = start_match(&fixture);

        fixture
            .service
            .report(&match_id, &"a".to_string(), &"a".to_string())
            .await
            .expect("Failed to report");

        let held = fixture
            .engine
            .hold_lock_for_test(&RatingKey {
                player_id: fixture.a.id,
                character: "Fox".to_string(),
            })
            .await;
        let result = fixture
            .service
            .confirm(&match_id, &"b".to_string(), &"a".to_string())
            .await;
        assert!(matches!(result, Err(ServiceError::ResourceBusy(_))));

        // The report survived the transient failure and the match is still
        // active, so the confirmation can simply be retried.
        assert!(fixture.coordination.get_report(&match_id).is_some());
        let record = fixture
            .matches
            .find_by_id(&match_id)
            .expect("Failed to query")
            .expect("Match not found");
        assert_eq!(record.status, MatchStatus::Active);

        drop(held);
        let outcome = fixture
            .service
            .confirm(&match_id, &"b".to_string(), &"a".to_string())
            .await
            .expect("Failed to confirm after retry");
        assert_eq!(outcome, MatchStatus::Completed);
    }

    #[tokio::test]
    async fn test_racing_confirms_apply_ratings_once() {
        let fixture = setup();
        let match_id = start_match(&fixture);

        fixture
            .service
            .report(&match_id, &"a".to_string(), &"a".to_string())
            .await
            .expect("Failed to report");

        let b = "b".to_string();
        let a = "a".to_string();
        let (first, second) = tokio::join!(
            fixture.service.confirm(&match_id, &b, &a),
            fixture.service.confirm(&match_id, &b, &a),
        );
        let succeeded = [&first, &second]
            .iter()
            .filter(|result| result.is_ok())
            .count();
        assert_eq!(succeeded, 1);

        // A single Elo step, not two.
        assert_eq!(rating_of(&fixture, &fixture.a, "Fox"), Some(1220));
        assert_eq!(rating_of(&fixture, &fixture.b, "Marth"), Some(1180));
        let record = fixture
            .matches
            .find_by_id(&match_id)
            .expect("Failed to query")
            .expect("Match not found");
        assert_eq!(record.status, MatchStatus::Completed);
        assert_eq!(record.player1.elo_after, Some(1220));
    }

    #[tokio::test]
    async fn test_rematch_accept_accept_starts_new_match() {
        let fixture = setup();
        let match_id = start_match(&fixture);
        fixture
            .service
            .report(&match_id, &"a".to_string(), &"a".to_string())
            .await
            .expect("Failed to report");
        fixture
            .service
            .confirm(&match_id, &"b".to_string(), &"a".to_string())
            .await
            .expect("Failed to confirm");

        let first = fixture
            .service
            .rematch(&match_id, &"a".to_string(), true)
            .await
            .expect("Failed to accept rematch");
        assert_eq!(first, None);
        let to_a = fixture.channel.frames_for("a");
        assert!(matches!(
            to_a.last().unwrap(),
            PushFrame::MatchUpdates(u) if u.status == MatchUpdateStatus::RematchWaiting
        ));

        let new_match_id = fixture
            .service
            .rematch(&match_id, &"b".to_string(), true)
            .await
            .expect("Failed to accept rematch")
            .expect("Expected a new match");
        assert_ne!(new_match_id, match_id);

        let new_record = fixture
            .matches
            .find_by_id(&new_match_id)
            .expect("Failed to query")
            .expect("Match not found");
        assert_eq!(new_record.status, MatchStatus::Active);
        assert_eq!(new_record.player1.character, "Fox");
        assert_eq!(new_record.player2.character, "Marth");

        // Locks were retained across the whole transition.
        assert!(fixture.coordination.is_locked(&"a".to_string()));
        assert!(fixture.coordination.is_locked(&"b".to_string()));
        assert!(fixture.coordination.get_rematch(&match_id).is_none());

        let to_b = fixture.channel.frames_for("b");
        assert!(matches!(
            to_b.last().unwrap(),
            PushFrame::MatchUpdates(u) if u.status == MatchUpdateStatus::Started
                && u.match_id == Some(new_match_id.clone())
                && u.player1_character == Some("Fox".to_string())
        ));
    }

    #[tokio::test]
    async fn test_rematch_rejects_non_participant() {
        let fixture = setup();
        let match_id = start_match(&fixture);
        fixture
            .service
            .report(&match_id, &"a".to_string(), &"a".to_string())
            .await
            .expect("Failed to report");
        fixture
            .service
            .confirm(&match_id, &"b".to_string(), &"a".to_string())
            .await
            .expect("Failed to confirm");

        let result = fixture
            .service
            .rematch(&match_id, &"c".to_string(), true)
            .await;
        assert!(matches!(result, Err(ServiceError::Forbidden(_))));
        assert!(fixture.coordination.get_rematch(&match_id).is_some());
    }

    #[tokio::test]
    async fn test_rematch_decline_releases_locks() {
        let fixture = setup();
        let match_id = start_match(&fixture);
        fixture
            .service
            .report(&match_id, &"a".to_string(), &"a".to_string())
            .await
            .expect("Failed to report");
        fixture
            .service
            .confirm(&match_id, &"b".to_string(), &"a".to_string())
            .await
            .expect("Failed to confirm");

        fixture
            .service
            .rematch(&match_id, &"b".to_string(), false)
            .await
            .expect("Failed to decline rematch");
        assert!(!fixture.coordination.is_locked(&"a".to_string()));
        assert!(!fixture.coordination.is_locked(&"b".to_string()));

        // First decliner wins; the other participant's response is too late.
        let late = fixture
            .service
            .rematch(&match_id, &"a".to_string(), true)
            .await;
        assert!(matches!(late, Err(ServiceError::InvalidState(_))));

        let to_a = fixture.channel.frames_for("a");
        assert!(matches!(
            to_a.last().unwrap(),
            PushFrame::MatchUpdates(u) if u.status == MatchUpdateStatus::RematchDeclined
        ));
    }

    #[tokio::test]
    async fn test_expiry_job_releases_locks() {
        let fixture = setup();
        let match_id = start_match(&fixture);
        fixture
            .service
            .report(&match_id, &"a".to_string(), &"a".to_string())
            .await
            .expect("Failed to report");
        fixture
            .service
            .confirm(&match_id, &"b".to_string(), &"a".to_string())
            .await
            .expect("Failed to confirm");

        let channel_arc: ArcChannelService = Arc::new(Box::new(fixture.channel.clone()));
        let job = RematchExpiryJob::new(
            fixture.coordination.clone(),
            channel_arc,
            Duration::ZERO,
        );
        job.sweep();

        assert!(fixture.coordination.get_rematch(&match_id).is_none());
        assert!(!fixture.coordination.is_locked(&"a".to_string()));
        assert!(!fixture.coordination.is_locked(&"b".to_string()));
        let to_b = fixture.channel.frames_for("b");
        assert!(matches!(
            to_b.last().unwrap(),
            PushFrame::MatchUpdates(u) if u.status == MatchUpdateStatus::RematchDeclined
        ));
    }
}
