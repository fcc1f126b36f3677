use std::sync::Arc;

use dashmap::DashMap;

use crate::player::{PlayerUsername, normalize_username};

pub type CharacterName = String;

/// Substituted when a player has no character checked in at match creation.
pub const UNKNOWN_CHARACTER: &str = "Unknown";

/// Boundary to the live pool: the only thing the coordinator needs from it
/// is each player's currently-selected character.
pub trait CharacterPool {
    fn current_character(&self, player: &PlayerUsername) -> Option<CharacterName>;
}

pub type ArcCharacterPool = Arc<Box<dyn CharacterPool + Send + Sync>>;

pub struct InMemoryCharacterPool {
    checked_in: DashMap<String, CharacterName>,
}

impl InMemoryCharacterPool {
    pub fn new() -> Self {
        Self {
            checked_in: DashMap::new(),
        }
    }

    pub fn check_in(&self, player: &PlayerUsername, character: CharacterName) {
        self.checked_in.insert(normalize_username(player), character);
    }

    pub fn check_out(&self, player: &PlayerUsername) {
        self.checked_in.remove(&normalize_username(player));
    }
}

impl Default for InMemoryCharacterPool {
    fn default() -> Self {
        Self::new()
    }
}

impl CharacterPool for InMemoryCharacterPool {
    fn current_character(&self, player: &PlayerUsername) -> Option<CharacterName> {
        self.checked_in
            .get(&normalize_username(player))
            .map(|entry| entry.value().clone())
    }
}

impl CharacterPool for Arc<InMemoryCharacterPool> {
    fn current_character(&self, player: &PlayerUsername) -> Option<CharacterName> {
        self.as_ref().current_character(player)
    }
}
