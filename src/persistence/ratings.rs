use std::sync::Arc;

use rusqlite::{Row, Transaction};
use uuid::Uuid;

use crate::{
    elo::INITIAL_RATING,
    persistence::{DatabaseError, DatabaseResult, DbPool, get_connection},
    player::PlayerId,
    pool::CharacterName,
};

/// Identity of a per-character rating row. The derived ordering (player id,
/// then character) is the ascending order used for lock acquisition.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct RatingKey {
    pub player_id: PlayerId,
    pub character: CharacterName,
}

#[derive(Clone, Debug, PartialEq)]
pub struct RatingRow {
    pub player_id: PlayerId,
    pub character: CharacterName,
    pub rating: i32,
    pub peak_rating: i32,
    pub wins: u32,
    pub losses: u32,
}

impl RatingRow {
    pub fn total_games(&self) -> u32 {
        self.wins + self.losses
    }
}

pub trait RatingRepository {
    /// Runs `calc` over the authoritative pre-images of both rows inside one
    /// transaction, writes the returned rows back, and refreshes each
    /// player's denormalized aggregate from the just-updated values. Rows
    /// that do not exist yet are created at the initial rating first.
    fn update_pair(
        &self,
        key1: &RatingKey,
        key2: &RatingKey,
        calc: &mut dyn FnMut(&RatingRow, &RatingRow) -> (RatingRow, RatingRow),
    ) -> DatabaseResult<(RatingRow, RatingRow)>;

    fn get(&self, key: &RatingKey) -> DatabaseResult<Option<RatingRow>>;
    fn rows_for_player(&self, player_id: &PlayerId) -> DatabaseResult<Vec<RatingRow>>;
}

pub type ArcRatingRepository = Arc<Box<dyn RatingRepository + Send + Sync>>;

pub struct SqliteRatingRepository {
    pool: DbPool,
}

impl SqliteRatingRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn row_to_rating(row: &Row) -> Result<RatingRow, rusqlite::Error> {
        let player_id: String = row.get("player_id")?;
        Ok(RatingRow {
            player_id: Uuid::parse_str(&player_id).map_err(|_| rusqlite::Error::InvalidQuery)?,
            character: row.get("character")?,
            rating: row.get("rating")?,
            peak_rating: row.get("peak_rating")?,
            wins: row.get("wins")?,
            losses: row.get("losses")?,
        })
    }

    fn get_or_create(tx: &Transaction, key: &RatingKey) -> Result<RatingRow, rusqlite::Error> {
        let existing = tx
            .query_row(
                "SELECT * FROM ratings WHERE player_id = ?1 AND character = ?2",
                rusqlite::params![key.player_id.to_string(), key.character],
                Self::row_to_rating,
            )
            .map(Some)
            .or_else(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => Ok(None),
                other => Err(other),
            })?;
        if let Some(row) = existing {
            return Ok(row);
        }
        // A fresh (player, character) pair starts at the initial rating
        // independent of the player's other characters.
        let now = chrono::Utc::now().timestamp();
        tx.execute(
            "INSERT INTO ratings (player_id, character, rating, peak_rating, wins, losses, created_at, updated_at) VALUES (?1, ?2, ?3, ?3, 0, 0, ?4, ?4)",
            rusqlite::params![key.player_id.to_string(), key.character, INITIAL_RATING, now],
        )?;
        Ok(RatingRow {
            player_id: key.player_id,
            character: key.character.clone(),
            rating: INITIAL_RATING,
            peak_rating: INITIAL_RATING,
            wins: 0,
            losses: 0,
        })
    }

    fn write_row(tx: &Transaction, row: &RatingRow) -> Result<(), rusqlite::Error> {
        tx.execute(
            "UPDATE ratings SET rating = ?1, peak_rating = ?2, wins = ?3, losses = ?4, updated_at = ?5 WHERE player_id = ?6 AND character = ?7",
            rusqlite::params![
                row.rating,
                row.peak_rating,
                row.wins,
                row.losses,
                chrono::Utc::now().timestamp(),
                row.player_id.to_string(),
                row.character,
            ],
        )?;
        Ok(())
    }

    fn refresh_aggregate(
        tx: &Transaction,
        player_id: &PlayerId,
        wins_delta: u32,
        losses_delta: u32,
    ) -> Result<(), rusqlite::Error> {
        let id = player_id.to_string();
        tx.execute(
            "UPDATE players SET wins = wins + ?1, losses = losses + ?2, rating = (SELECT MAX(rating) FROM ratings WHERE player_id = ?3) WHERE id = ?3",
            rusqlite::params![wins_delta, losses_delta, id],
        )?;
        tx.execute(
            "UPDATE players SET peak_rating = MAX(peak_rating, rating) WHERE id = ?1",
            rusqlite::params![id],
        )?;
        Ok(())
    }
}

impl RatingRepository for SqliteRatingRepository {
    fn update_pair(
        &self,
        key1: &RatingKey,
        key2: &RatingKey,
        calc: &mut dyn FnMut(&RatingRow, &RatingRow) -> (RatingRow, RatingRow),
    ) -> DatabaseResult<(RatingRow, RatingRow)> {
        let mut conn = get_connection(&self.pool)?;
        let tx = conn.transaction().map_err(DatabaseError::QueryError)?;

        let pre1 = Self::get_or_create(&tx, key1).map_err(DatabaseError::QueryError)?;
        let pre2 = Self::get_or_create(&tx, key2).map_err(DatabaseError::QueryError)?;

        let (new1, new2) = calc(&pre1, &pre2);

        Self::write_row(&tx, &new1).map_err(DatabaseError::QueryError)?;
        Self::write_row(&tx, &new2).map_err(DatabaseError::QueryError)?;
        Self::refresh_aggregate(
            &tx,
            &key1.player_id,
            new1.wins - pre1.wins,
            new1.losses - pre1.losses,
        )
        .map_err(DatabaseError::QueryError)?;
        Self::refresh_aggregate(
            &tx,
            &key2.player_id,
            new2.wins - pre2.wins,
            new2.losses - pre2.losses,
        )
        .map_err(DatabaseError::QueryError)?;

        tx.commit().map_err(DatabaseError::QueryError)?;
        Ok((new1, new2))
    }

    fn get(&self, key: &RatingKey) -> DatabaseResult<Option<RatingRow>> {
        let conn = get_connection(&self.pool)?;
        conn.query_row(
            "SELECT * FROM ratings WHERE player_id = ?1 AND character = ?2",
            rusqlite::params![key.player_id.to_string(), key.character],
            Self::row_to_rating,
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(DatabaseError::QueryError(other)),
        })
    }

    fn rows_for_player(&self, player_id: &PlayerId) -> DatabaseResult<Vec<RatingRow>> {
        let conn = get_connection(&self.pool)?;
        let mut stmt = conn
            .prepare("SELECT * FROM ratings WHERE player_id = ?1 ORDER BY character")
            .map_err(DatabaseError::QueryError)?;
        let rows = stmt
            .query_map([player_id.to_string()], Self::row_to_rating)
            .map_err(DatabaseError::QueryError)?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row.map_err(DatabaseError::QueryError)?);
        }
        Ok(result)
    }
}
