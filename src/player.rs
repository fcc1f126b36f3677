use std::sync::Arc;

use rustrict::CensorStr;
use uuid::Uuid;

use crate::{
    ServiceError, ServiceResult,
    elo::INITIAL_RATING,
    persistence::players::{ArcPlayerRepository, PlayerRepository},
};

pub type PlayerUsername = String;

pub type PlayerId = Uuid;

/// Handles are case-preserved for display and lowercased for comparison.
pub fn normalize_username(username: &str) -> String {
    username.to_ascii_lowercase()
}

#[derive(Clone, Debug, PartialEq)]
pub struct Player {
    pub id: PlayerId,
    pub username: PlayerUsername,
    pub password_hash: String,
    pub rating: i32,
    pub peak_rating: i32,
    pub wins: u32,
    pub losses: u32,
    pub created_at: i64,
}

impl Player {
    pub fn new(username: PlayerUsername, password_hash: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            username,
            password_hash,
            rating: INITIAL_RATING,
            peak_rating: INITIAL_RATING,
            wins: 0,
            losses: 0,
            created_at: chrono::Utc::now().timestamp(),
        }
    }
}

pub trait PlayerService {
    fn register(&self, username: &PlayerUsername, password: &str) -> ServiceResult<Player>;
    fn validate_login(&self, username: &PlayerUsername, password: &str) -> ServiceResult<Player>;
    fn fetch_by_username(&self, username: &PlayerUsername) -> ServiceResult<Option<Player>>;
    fn resolve_id(&self, username: &PlayerUsername) -> Option<PlayerId>;
    fn resolve_username(&self, id: &PlayerId) -> Option<PlayerUsername>;
}

pub type ArcPlayerService = Arc<Box<dyn PlayerService + Send + Sync>>;

pub struct PlayerServiceImpl {
    repository: ArcPlayerRepository,
    player_cache: Arc<moka::sync::Cache<String, Player>>,
}

impl PlayerServiceImpl {
    pub fn new(repository: ArcPlayerRepository) -> Self {
        Self {
            repository,
            player_cache: Arc::new(moka::sync::Cache::builder().max_capacity(1000).build()),
        }
    }

    fn validate_username(username: &str) -> ServiceResult<()> {
        if username.len() < 3 || username.len() > 16 {
            return ServiceError::validation_err("Username must be between 3 and 16 characters");
        }
        if username
            .chars()
            .next()
            .is_none_or(|c| !c.is_ascii_alphabetic())
        {
            return ServiceError::validation_err("Username must start with a letter");
        }
        if username
            .chars()
            .any(|c| !c.is_ascii_alphanumeric() && c != '_')
        {
            return ServiceError::validation_err("Username must be alphanumeric");
        }
        if username.is_inappropriate() {
            return ServiceError::validation_err("Username contains inappropriate content");
        }
        Ok(())
    }
}

impl PlayerService for PlayerServiceImpl {
    fn register(&self, username: &PlayerUsername, password: &str) -> ServiceResult<Player> {
        Self::validate_username(username)?;
        if password.len() < 8 {
            return ServiceError::validation_err("Password must be at least 8 characters");
        }
        if self.repository.find_by_username(username)?.is_some() {
            return ServiceError::validation_err("Username already taken");
        }
        let password_hash = bcrypt::hash(password, bcrypt::DEFAULT_COST)
            .map_err(|e| ServiceError::Internal(format!("Failed to hash password: {}", e)))?;
        let player = Player::new(username.clone(), password_hash);
        self.repository.insert(&player)?;
        log::info!("Registered player {} ({})", player.username, player.id);
        Ok(player)
    }

    fn validate_login(&self, username: &PlayerUsername, password: &str) -> ServiceResult<Player> {
        let Some(player) = self.fetch_by_username(username)? else {
            return ServiceError::unauthorized("Invalid username or password");
        };
        let is_valid = bcrypt::verify(password, &player.password_hash)
            .map_err(|_| ServiceError::Unauthorized("Invalid username or password".into()))?;
        if !is_valid {
            return ServiceError::unauthorized("Invalid username or password");
        }
        Ok(player)
    }

    fn fetch_by_username(&self, username: &PlayerUsername) -> ServiceResult<Option<Player>> {
        let key = normalize_username(username);
        if let Some(player) = self.player_cache.get(&key) {
            return Ok(Some(player));
        }
        let player = self.repository.find_by_username(username)?;
        if let Some(ref p) = player {
            self.player_cache.insert(key, p.clone());
        }
        Ok(player)
    }

    fn resolve_id(&self, username: &PlayerUsername) -> Option<PlayerId> {
        self.fetch_by_username(username).ok()?.map(|p| p.id)
    }

    fn resolve_username(&self, id: &PlayerId) -> Option<PlayerUsername> {
        self.repository
            .find_by_id(id)
            .ok()?
            .map(|p| p.username)
    }
}

#[cfg(test)]
mod tests {
    use crate::persistence::{new_memory_pool, players::SqlitePlayerRepository};

    use super::*;

    fn service() -> PlayerServiceImpl {
        let repo = SqlitePlayerRepository::new(new_memory_pool());
        PlayerServiceImpl::new(Arc::new(Box::new(repo)))
    }

    #[test]
    fn test_register_and_login() {
        let service = service();
        let player = service
            .register(&"Falcon".to_string(), "hunter2hunter2")
            .expect("Failed to register");
        assert_eq!(player.rating, INITIAL_RATING);
        assert_eq!(player.peak_rating, INITIAL_RATING);

        let logged_in = service
            .validate_login(&"Falcon".to_string(), "hunter2hunter2")
            .expect("Failed to log in");
        assert_eq!(logged_in.id, player.id);

        assert!(
            service
                .validate_login(&"Falcon".to_string(), "wrong-password")
                .is_err()
        );
    }

    #[test]
    fn test_duplicate_username_rejected_case_insensitive() {
        let service = service();
        service
            .register(&"Falcon".to_string(), "hunter2hunter2")
            .expect("Failed to register");
        assert!(matches!(
            service.register(&"fAlCoN".to_string(), "hunter2hunter2"),
            Err(ServiceError::Validation(_))
        ));
    }

    #[test]
    fn test_username_rules() {
        let service = service();
        for bad in ["ab", "1falcon", "fal con", "way_too_long_username"] {
            assert!(
                service.register(&bad.to_string(), "hunter2hunter2").is_err(),
                "expected {:?} to be rejected",
                bad
            );
        }
    }

    #[test]
    fn test_identity_resolver_roundtrip() {
        let service = service();
        let player = service
            .register(&"Falcon".to_string(), "hunter2hunter2")
            .expect("Failed to register");
        assert_eq!(service.resolve_id(&"Falcon".to_string()), Some(player.id));
        assert_eq!(
            service.resolve_username(&player.id),
            Some("Falcon".to_string())
        );
        assert_eq!(service.resolve_id(&"Nobody".to_string()), None);
    }
}
