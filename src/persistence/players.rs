use std::sync::Arc;

use rusqlite::Row;
use uuid::Uuid;

use crate::{
    persistence::{DatabaseError, DatabaseResult, DbPool, get_connection},
    player::{Player, PlayerId, PlayerUsername, normalize_username},
};

pub trait PlayerRepository {
    fn insert(&self, player: &Player) -> DatabaseResult<()>;
    fn find_by_username(&self, username: &PlayerUsername) -> DatabaseResult<Option<Player>>;
    fn find_by_id(&self, id: &PlayerId) -> DatabaseResult<Option<Player>>;
}

pub type ArcPlayerRepository = Arc<Box<dyn PlayerRepository + Send + Sync>>;

pub struct SqlitePlayerRepository {
    pool: DbPool,
}

impl SqlitePlayerRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    fn row_to_player(row: &Row) -> Result<Player, rusqlite::Error> {
        let id: String = row.get("id")?;
        Ok(Player {
            id: Uuid::parse_str(&id).map_err(|_| rusqlite::Error::InvalidQuery)?,
            username: row.get("username")?,
            password_hash: row.get("password")?,
            rating: row.get("rating")?,
            peak_rating: row.get("peak_rating")?,
            wins: row.get("wins")?,
            losses: row.get("losses")?,
            created_at: row.get("created_at")?,
        })
    }
}

impl PlayerRepository for SqlitePlayerRepository {
    fn insert(&self, player: &Player) -> DatabaseResult<()> {
        let conn = get_connection(&self.pool)?;
        conn.execute(
            "INSERT INTO players (id, username, username_lower, password, rating, peak_rating, wins, losses, created_at) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            rusqlite::params![
                player.id.to_string(),
                player.username,
                normalize_username(&player.username),
                player.password_hash,
                player.rating,
                player.peak_rating,
                player.wins,
                player.losses,
                player.created_at,
            ],
        )
        .map_err(DatabaseError::QueryError)?;
        Ok(())
    }

    fn find_by_username(&self, username: &PlayerUsername) -> DatabaseResult<Option<Player>> {
        let conn = get_connection(&self.pool)?;
        let mut stmt = conn
            .prepare("SELECT * FROM players WHERE username_lower = ?1")
            .map_err(DatabaseError::QueryError)?;
        let mut rows = stmt
            .query_map([normalize_username(username)], |row| {
                Self::row_to_player(row)
            })
            .map_err(DatabaseError::QueryError)?;
        match rows.next() {
            Some(player) => Ok(Some(player.map_err(DatabaseError::QueryError)?)),
            None => Ok(None),
        }
    }

    fn find_by_id(&self, id: &PlayerId) -> DatabaseResult<Option<Player>> {
        let conn = get_connection(&self.pool)?;
        let mut stmt = conn
            .prepare("SELECT * FROM players WHERE id = ?1")
            .map_err(DatabaseError::QueryError)?;
        let mut rows = stmt
            .query_map([id.to_string()], |row| Self::row_to_player(row))
            .map_err(DatabaseError::QueryError)?;
        match rows.next() {
            Some(player) => Ok(Some(player.map_err(DatabaseError::QueryError)?)),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::persistence::new_memory_pool;

    use super::*;

    #[test]
    fn test_insert_and_find() {
        let repo = SqlitePlayerRepository::new(new_memory_pool());
        let player = Player::new("Falcon".to_string(), "hash".to_string());
        repo.insert(&player).expect("Failed to insert");

        let by_name = repo
            .find_by_username(&"falcon".to_string())
            .expect("Failed to query")
            .expect("Player not found");
        assert_eq!(by_name, player);

        let by_id = repo
            .find_by_id(&player.id)
            .expect("Failed to query")
            .expect("Player not found");
        assert_eq!(by_id.username, "Falcon");

        assert!(
            repo.find_by_username(&"nobody".to_string())
                .expect("Failed to query")
                .is_none()
        );
    }
}
