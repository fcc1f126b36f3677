use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use thiserror::Error;

use crate::ServiceError;

pub mod matches;
pub mod players;
pub mod ratings;

pub type DbPool = Pool<SqliteConnectionManager>;

pub type DatabaseResult<T> = Result<T, DatabaseError>;

#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("failed to get DB connection: {0}")]
    ConnectionError(#[from] r2d2::Error),

    #[error("query failed: {0}")]
    QueryError(#[from] rusqlite::Error),
}

impl From<DatabaseError> for ServiceError {
    fn from(value: DatabaseError) -> Self {
        ServiceError::Internal(value.to_string())
    }
}

pub fn new_pool_from_env() -> DbPool {
    let db_path = std::env::var("LADDER_DB").expect("LADDER_DB env var not set");
    let manager = SqliteConnectionManager::file(db_path);
    Pool::builder()
        .max_size(5)
        .build(manager)
        .expect("Failed to create DB pool")
}

pub fn get_connection(pool: &DbPool) -> DatabaseResult<PooledConnection<SqliteConnectionManager>> {
    pool.get().map_err(DatabaseError::ConnectionError)
}

pub const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS players (
    id TEXT PRIMARY KEY,
    username TEXT NOT NULL,
    username_lower TEXT NOT NULL UNIQUE,
    password TEXT NOT NULL,
    rating INTEGER NOT NULL DEFAULT 1200,
    peak_rating INTEGER NOT NULL DEFAULT 1200,
    wins INTEGER NOT NULL DEFAULT 0,
    losses INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL
);
CREATE TABLE IF NOT EXISTS ratings (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    player_id TEXT NOT NULL,
    character TEXT NOT NULL,
    rating INTEGER NOT NULL DEFAULT 1200,
    peak_rating INTEGER NOT NULL DEFAULT 1200,
    wins INTEGER NOT NULL DEFAULT 0,
    losses INTEGER NOT NULL DEFAULT 0,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL,
    UNIQUE(player_id, character)
);
CREATE TABLE IF NOT EXISTS matches (
    id TEXT PRIMARY KEY,
    player1_username TEXT NOT NULL,
    player2_username TEXT NOT NULL,
    winner_username TEXT,
    player1_id TEXT,
    player2_id TEXT,
    winner_id TEXT,
    player1_character TEXT NOT NULL,
    player2_character TEXT NOT NULL,
    status TEXT NOT NULL,
    played_at INTEGER NOT NULL,
    player1_elo_before INTEGER,
    player1_elo_after INTEGER,
    player2_elo_before INTEGER,
    player2_elo_after INTEGER,
    player1_k_factor INTEGER,
    player2_k_factor INTEGER
);
CREATE INDEX IF NOT EXISTS idx_matches_player1 ON matches(player1_username, played_at);
CREATE INDEX IF NOT EXISTS idx_matches_player2 ON matches(player2_username, played_at);
";

pub fn init_schema(pool: &DbPool) -> DatabaseResult<()> {
    let conn = get_connection(pool)?;
    conn.execute_batch(SCHEMA_SQL)
        .map_err(DatabaseError::QueryError)?;
    Ok(())
}

/// Single-connection in-memory pool for tests. One connection only, so every
/// checkout observes the same database.
pub fn new_memory_pool() -> DbPool {
    let manager = SqliteConnectionManager::memory();
    let pool = Pool::builder()
        .max_size(1)
        .build(manager)
        .expect("Failed to create in-memory DB pool");
    init_schema(&pool).expect("Failed to create schema");
    pool
}
