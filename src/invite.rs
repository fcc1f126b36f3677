use std::sync::Arc;

use uuid::Uuid;

use crate::{
    ServiceError, ServiceResult,
    client::{ArcChannelService, ChannelService},
    coordination::{CoordinationState, InteractionId, MatchId},
    r#match::{MatchRecord, MatchSide},
    persistence::matches::{ArcMatchRepository, MatchRepository},
    player::{Player, PlayerService, PlayerUsername, normalize_username},
    pool::{ArcCharacterPool, CharacterPool, UNKNOWN_CHARACTER},
    protocol::{InviteNotice, InviteStatus, MatchUpdate, MatchUpdateStatus, PushFrame},
};

#[async_trait::async_trait]
pub trait InviteService {
    /// Claims both players and notifies the target. Fails with `Busy` when
    /// either player is already engaged.
    async fn invite(
        &self,
        challenger: &PlayerUsername,
        target: &PlayerUsername,
    ) -> ServiceResult<InteractionId>;

    /// Creates the match once the target accepts. Characters are read from
    /// the live pool at this moment.
    async fn accept(
        &self,
        interaction_id: InteractionId,
        challenger: &PlayerUsername,
        opponent: &PlayerUsername,
    ) -> ServiceResult<MatchId>;

    async fn decline(
        &self,
        interaction_id: InteractionId,
        challenger: &PlayerUsername,
        opponent: &PlayerUsername,
    ) -> ServiceResult<()>;

    async fn cancel(
        &self,
        interaction_id: InteractionId,
        challenger: &PlayerUsername,
        opponent: &PlayerUsername,
    ) -> ServiceResult<()>;
}

pub type ArcInviteService = Arc<Box<dyn InviteService + Send + Sync>>;

pub struct InviteServiceImpl {
    coordination: Arc<CoordinationState>,
    player_service: crate::player::ArcPlayerService,
    pool: ArcCharacterPool,
    match_repository: ArcMatchRepository,
    channel: ArcChannelService,
}

impl InviteServiceImpl {
    pub fn new(
        coordination: Arc<CoordinationState>,
        player_service: crate::player::ArcPlayerService,
        pool: ArcCharacterPool,
        match_repository: ArcMatchRepository,
        channel: ArcChannelService,
    ) -> Self {
        Self {
            coordination,
            player_service,
            pool,
            match_repository,
            channel,
        }
    }

    fn fetch_known_player(&self, username: &PlayerUsername) -> ServiceResult<Player> {
        match self.player_service.fetch_by_username(username)? {
            Some(player) => Ok(player),
            None => ServiceError::not_found(format!("Unknown player {}", username)),
        }
    }

    fn character_or_unknown(&self, username: &PlayerUsername) -> String {
        self.pool
            .current_character(username)
            .unwrap_or_else(|| UNKNOWN_CHARACTER.to_string())
    }
}

#[async_trait::async_trait]
impl InviteService for InviteServiceImpl {
    async fn invite(
        &self,
        challenger: &PlayerUsername,
        target: &PlayerUsername,
    ) -> ServiceResult<InteractionId> {
        if challenger.trim().is_empty() || target.trim().is_empty() {
            return ServiceError::validation_err("Challenger and target are required");
        }
        if normalize_username(challenger) == normalize_username(target) {
            return ServiceError::validation_err("You cannot invite yourself");
        }
        let challenger = self.fetch_known_player(challenger)?;
        let target = self.fetch_known_player(target)?;

        let interaction_id = Uuid::new_v4();
        if self
            .coordination
            .claim_pair(&challenger.username, &target.username, interaction_id)
            .is_err()
        {
            return ServiceError::busy("One of the players is already in a match or invite");
        }
        log::info!(
            "Invite {} created: {} -> {}",
            interaction_id,
            challenger.username,
            target.username
        );

        let notice = InviteNotice {
            invite_id: interaction_id,
            from: challenger.username.clone(),
            status: InviteStatus::Pending,
        };
        self.channel
            .push_to(&target.username, &PushFrame::Invites(notice));
        Ok(interaction_id)
    }

    async fn accept(
        &self,
        interaction_id: InteractionId,
        challenger: &PlayerUsername,
        opponent: &PlayerUsername,
    ) -> ServiceResult<MatchId> {
        if self
            .coordination
            .begin_match(challenger, opponent, interaction_id)
            .is_err()
        {
            return ServiceError::invalid_state("Invite is no longer valid");
        }
        // Identity resolution is best-effort at match creation; a missing
        // account leaves the id column empty.
        let challenger_id = self.player_service.resolve_id(challenger);
        let opponent_id = self.player_service.resolve_id(opponent);

        let record = MatchRecord::new_active(
            MatchSide::new(
                challenger.clone(),
                challenger_id,
                self.character_or_unknown(challenger),
            ),
            MatchSide::new(
                opponent.clone(),
                opponent_id,
                self.character_or_unknown(opponent),
            ),
        );
        self.match_repository.insert(&record)?;
        log::info!(
            "Match {} started: {} ({}) vs {} ({})",
            record.id,
            record.player1.username,
            record.player1.character,
            record.player2.username,
            record.player2.character
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
        let frame = PushFrame::MatchUpdates(update);
        self.channel.push_to(&record.player1.username, &frame);
        self.channel.push_to(&record.player2.username, &frame);
        Ok(record.id)
    }

    async fn decline(
        &self,
        interaction_id: InteractionId,
        challenger: &PlayerUsername,
        opponent: &PlayerUsername,
    ) -> ServiceResult<()> {
        // Lenient release: the locks are soft, and the caller proved
        // membership out of band.
        self.coordination.release_pair(challenger, opponent);
        log::info!(
            "Invite {} declined by {} (challenger {})",
            interaction_id,
            opponent,
            challenger
        );
        let update = MatchUpdate::new(
            None,
            MatchUpdateStatus::Declined,
            challenger.clone(),
            opponent.clone(),
        );
        self.channel
            .push_to(challenger, &PushFrame::MatchUpdates(update));
        Ok(())
    }

    async fn cancel(
        &self,
        interaction_id: InteractionId,
        challenger: &PlayerUsername,
        opponent: &PlayerUsername,
    ) -> ServiceResult<()> {
        if self.coordination.lock_of(challenger) != Some(interaction_id) {
            return ServiceError::busy("No matching invite to cancel");
        }
        self.coordination.release_pair(challenger, opponent);
        log::info!("Invite {} cancelled by {}", interaction_id, challenger);
        let notice = InviteNotice {
            invite_id: interaction_id,
            from: challenger.clone(),
            status: InviteStatus::Cancelled,
        };
        self.channel.push_to(opponent, &PushFrame::Invites(notice));
        Ok(())
    }
}
