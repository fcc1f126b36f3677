use std::{sync::Arc, time::Duration};

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::{
    ServiceError, ServiceResult, elo,
    r#match::MatchRecord,
    persistence::ratings::{ArcRatingRepository, RatingKey, RatingRepository, RatingRow},
    player::{PlayerUsername, normalize_username},
    pool::CharacterName,
};

#[derive(Clone, Debug, PartialEq)]
pub struct RatedSide {
    pub username: PlayerUsername,
    pub character: CharacterName,
    pub rating_before: i32,
    pub rating_after: i32,
    pub delta: i32,
    pub k_factor: i32,
}

#[derive(Clone, Debug, PartialEq)]
pub struct MatchRatingResult {
    pub player1: RatedSide,
    pub player2: RatedSide,
}

/// Applies an agreed match result to both per-character rating rows under
/// pessimistic per-row locks, and fills the audit fields on the match
/// record. The caller persists the record.
pub struct RatingEngine {
    repository: ArcRatingRepository,
    row_locks: DashMap<RatingKey, Arc<Mutex<()>>>,
    lock_timeout: Duration,
}

/// The single place that chooses multi-row lock order: ascending by row key.
fn ordered<'a>(a: &'a RatingKey, b: &'a RatingKey) -> (&'a RatingKey, &'a RatingKey) {
    if a <= b { (a, b) } else { (b, a) }
}

impl RatingEngine {
    pub fn new(repository: ArcRatingRepository, lock_timeout: Duration) -> Self {
        Self {
            repository,
            row_locks: DashMap::new(),
            lock_timeout,
        }
    }

    async fn lock_row(&self, key: &RatingKey) -> ServiceResult<OwnedMutexGuard<()>> {
        let mutex = self
            .row_locks
            .entry(key.clone())
            .or_default()
            .value()
            .clone();
        tokio::time::timeout(self.lock_timeout, mutex.lock_owned())
            .await
            .map_err(|_| {
                ServiceError::ResourceBusy(format!(
                    "Timed out waiting for rating row {}:{}",
                    key.player_id, key.character
                ))
            })
    }

    #[cfg(test)]
    pub async fn hold_lock_for_test(&self, key: &RatingKey) -> OwnedMutexGuard<()> {
        let mutex = self
            .row_locks
            .entry(key.clone())
            .or_default()
            .value()
            .clone();
        mutex.lock_owned().await
    }

    pub async fn apply_match_result(
        &self,
        record: &mut MatchRecord,
        winner: &PlayerUsername,
    ) -> ServiceResult<MatchRatingResult> {
        let winner_key = normalize_username(winner);
        let player1_won = normalize_username(&record.player1.username) == winner_key;
        if !player1_won && normalize_username(&record.player2.username) != winner_key {
            return ServiceError::internal("Winner is not a participant of the match");
        }

        let key1 = Self::rating_key_of(record, true)?;
        let key2 = Self::rating_key_of(record, false)?;

        let (first, second) = ordered(&key1, &key2);
        let _guard1 = self.lock_row(first).await?;
        let _guard2 = self.lock_row(second).await?;

        let mut images: Option<(RatingRow, RatingRow, elo::EloOutcome, elo::EloOutcome)> = None;
        self.repository
            .update_pair(&key1, &key2, &mut |pre1, pre2| {
                let outcome1 = elo::rate(pre1.rating, pre1.total_games(), pre2.rating, player1_won);
                let outcome2 =
                    elo::rate(pre2.rating, pre2.total_games(), pre1.rating, !player1_won);
                let new1 = Self::advance_row(pre1, outcome1, player1_won);
                let new2 = Self::advance_row(pre2, outcome2, !player1_won);
                images = Some((pre1.clone(), pre2.clone(), outcome1, outcome2));
                (new1, new2)
            })?;

        let (pre1, pre2, outcome1, outcome2) =
            images.expect("update_pair must invoke the calc closure");

        record.player1.elo_before = Some(pre1.rating);
        record.player1.elo_after = Some(outcome1.new_rating);
        record.player1.k_factor = Some(outcome1.k_factor);
        record.player2.elo_before = Some(pre2.rating);
        record.player2.elo_after = Some(outcome2.new_rating);
        record.player2.k_factor = Some(outcome2.k_factor);

        Ok(MatchRatingResult {
            player1: RatedSide {
                username: record.player1.username.clone(),
                character: record.player1.character.clone(),
                rating_before: pre1.rating,
                rating_after: outcome1.new_rating,
                delta: outcome1.delta,
                k_factor: outcome1.k_factor,
            },
            player2: RatedSide {
                username: record.player2.username.clone(),
                character: record.player2.character.clone(),
                rating_before: pre2.rating,
                rating_after: outcome2.new_rating,
                delta: outcome2.delta,
                k_factor: outcome2.k_factor,
            },
        })
    }

    fn rating_key_of(record: &MatchRecord, first: bool) -> ServiceResult<RatingKey> {
        let side = if first {
            &record.player1
        } else {
            &record.player2
        };
        let Some(player_id) = side.player_id else {
            return ServiceError::internal(format!(
                "Participant {} has no resolved identity",
                side.username
            ));
        };
        Ok(RatingKey {
            player_id,
            character: side.character.clone(),
        })
    }

    fn advance_row(pre: &RatingRow, outcome: elo::EloOutcome, won: bool) -> RatingRow {
        let mut row = pre.clone();
        row.rating = outcome.new_rating;
        row.peak_rating = row.peak_rating.max(outcome.new_rating);
        if won {
            row.wins += 1;
        } else {
            row.losses += 1;
        }
        row
    }
}
