use std::sync::Arc;

use rusqlite::Row;
use uuid::Uuid;

use crate::{
    coordination::MatchId,
    persistence::{DatabaseError, DatabaseResult, DbPool, get_connection},
    player::{PlayerUsername, normalize_username},
    pool::CharacterName,
    r#match::{MatchRecord, MatchSide, MatchStatus},
};

pub trait MatchRepository {
    fn insert(&self, record: &MatchRecord) -> DatabaseResult<()>;
    fn find_by_id(&self, id: &MatchId) -> DatabaseResult<Option<MatchRecord>>;

    /// Writes the record's terminal status, winner, and audit columns, but
    /// only if the stored row is still ACTIVE. Returns whether the
    /// transition was claimed; false means another caller finalized first.
    fn finalize_if_active(&self, record: &MatchRecord) -> DatabaseResult<bool>;

    // Projection queries for the read-only surfaces.
    fn recent_by_player(
        &self,
        username: &PlayerUsername,
        limit: u32,
    ) -> DatabaseResult<Vec<MatchRecord>>;
    fn recent_by_player_character(
        &self,
        username: &PlayerUsername,
        character: &CharacterName,
        limit: u32,
    ) -> DatabaseResult<Vec<MatchRecord>>;
    fn count_by_player(&self, username: &PlayerUsername) -> DatabaseResult<u32>;
}

pub type ArcMatchRepository = Arc<Box<dyn MatchRepository + Send + Sync>>;

pub struct SqliteMatchRepository {
    pool: DbPool,
}

impl SqliteMatchRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn opt_uuid(value: Option<String>) -> Option<Uuid> {
        value.and_then(|s| Uuid::parse_str(&s).ok())
    }

    fn row_to_record(row: &Row) -> Result<MatchRecord, rusqlite::Error> {
        Ok(MatchRecord {
            id: row.get("id")?,
            player1: MatchSide {
                username: row.get("player1_username")?,
                player_id: Self::opt_uuid(row.get("player1_id")?),
                character: row.get("player1_character")?,
                elo_before: row.get("player1_elo_before")?,
                elo_after: row.get("player1_elo_after")?,
                k_factor: row.get("player1_k_factor")?,
            },
            player2: MatchSide {
                username: row.get("player2_username")?,
                player_id: Self::opt_uuid(row.get("player2_id")?),
                character: row.get("player2_character")?,
                elo_before: row.get("player2_elo_before")?,
                elo_after: row.get("player2_elo_after")?,
                k_factor: row.get("player2_k_factor")?,
            },
            status: MatchStatus::from_column(&row.get::<_, String>("status")?)
                .ok_or(rusqlite::Error::InvalidQuery)?,
            winner_username: row.get("winner_username")?,
            winner_id: Self::opt_uuid(row.get("winner_id")?),
            played_at: row.get("played_at")?,
        })
    }

    fn query_records(
        &self,
        sql: &str,
        params: &[&dyn rusqlite::ToSql],
    ) -> DatabaseResult<Vec<MatchRecord>> {
        let conn = get_connection(&self.pool)?;
        let mut stmt = conn.prepare(sql).map_err(DatabaseError::QueryError)?;
        let rows = stmt
            .query_map(params, Self::row_to_record)
            .map_err(DatabaseError::QueryError)?;
        let mut result = Vec::new();
        for row in rows {
            result.push(row.map_err(DatabaseError::QueryError)?);
        }
        Ok(result)
    }
}

impl MatchRepository for SqliteMatchRepository {
    fn insert(&self, record: &MatchRecord) -> DatabaseResult<()> {
        let conn = get_connection(&self.pool)?;
        conn.execute(
            "INSERT INTO matches (id, player1_username, player2_username, winner_username, player1_id, player2_id, winner_id, player1_character, player2_character, status, played_at, player1_elo_before, player1_elo_after, player2_elo_before, player2_elo_after, player1_k_factor, player2_k_factor) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17)",
            rusqlite::params![
                record.id,
                record.player1.username,
                record.player2.username,
                record.winner_username,
                record.player1.player_id.map(|id| id.to_string()),
                record.player2.player_id.map(|id| id.to_string()),
                record.winner_id.map(|id| id.to_string()),
                record.player1.character,
                record.player2.character,
                record.status.as_column(),
                record.played_at,
                record.player1.elo_before,
                record.player1.elo_after,
                record.player2.elo_before,
                record.player2.elo_after,
                record.player1.k_factor,
                record.player2.k_factor,
            ],
        )
        .map_err(DatabaseError::QueryError)?;
        Ok(())
    }

    fn find_by_id(&self, id: &MatchId) -> DatabaseResult<Option<MatchRecord>> {
        let conn = get_connection(&self.pool)?;
        conn.query_row(
            "SELECT * FROM matches WHERE id = ?1",
            [id],
            Self::row_to_record,
        )
        .map(Some)
        .or_else(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => Ok(None),
            other => Err(DatabaseError::QueryError(other)),
        })
    }

    fn finalize_if_active(&self, record: &MatchRecord) -> DatabaseResult<bool> {
        let conn = get_connection(&self.pool)?;
        let updated = conn
            .execute(
                "UPDATE matches SET winner_username = ?1, winner_id = ?2, status = ?3, player1_elo_before = ?4, player1_elo_after = ?5, player2_elo_before = ?6, player2_elo_after = ?7, player1_k_factor = ?8, player2_k_factor = ?9 WHERE id = ?10 AND status = 'ACTIVE'",
                rusqlite::params![
                    record.winner_username,
                    record.winner_id.map(|id| id.to_string()),
                    record.status.as_column(),
                    record.player1.elo_before,
                    record.player1.elo_after,
                    record.player2.elo_before,
                    record.player2.elo_after,
                    record.player1.k_factor,
                    record.player2.k_factor,
                    record.id,
                ],
            )
            .map_err(DatabaseError::QueryError)?;
        Ok(updated > 0)
    }

    fn recent_by_player(
        &self,
        username: &PlayerUsername,
        limit: u32,
    ) -> DatabaseResult<Vec<MatchRecord>> {
        let key = normalize_username(username);
        self.query_records(
            "SELECT * FROM matches WHERE LOWER(player1_username) = ?1 OR LOWER(player2_username) = ?1 ORDER BY played_at DESC LIMIT ?2",
            &[&key, &limit],
        )
    }

    fn recent_by_player_character(
        &self,
        username: &PlayerUsername,
        character: &CharacterName,
        limit: u32,
    ) -> DatabaseResult<Vec<MatchRecord>> {
        let key = normalize_username(username);
        self.query_records(
            "SELECT * FROM matches WHERE (LOWER(player1_username) = ?1 AND player1_character = ?2) OR (LOWER(player2_username) = ?1 AND player2_character = ?2) ORDER BY played_at DESC LIMIT ?3",
            &[&key, character, &limit],
        )
    }

    fn count_by_player(&self, username: &PlayerUsername) -> DatabaseResult<u32> {
        let conn = get_connection(&self.pool)?;
        let key = normalize_username(username);
        conn.query_row(
            "SELECT COUNT(*) FROM matches WHERE LOWER(player1_username) = ?1 OR LOWER(player2_username) = ?1",
            [&key],
            |row| row.get(0),
        )
        .map_err(DatabaseError::QueryError)
    }
}
