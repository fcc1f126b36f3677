use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{player::PlayerUsername, r#match::MatchStatus};

/// A frame pushed over a player's channel, tagged with the logical inbox it
/// belongs to so clients can route without inspecting the payload.
#[derive(Clone, Debug, Serialize, PartialEq)]
#[serde(tag = "inbox", rename_all = "camelCase")]
pub enum PushFrame {
    Invites(InviteNotice),
    MatchUpdates(MatchUpdate),
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InviteNotice {
    pub invite_id: Uuid,
    pub from: PlayerUsername,
    pub status: InviteStatus,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InviteStatus {
    Pending,
    Cancelled,
}

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MatchUpdateStatus {
    Started,
    AwaitingConfirmation,
    RematchOffered,
    RematchWaiting,
    RematchDeclined,
    Declined,
}

/// Envelope for the `matchUpdates` inbox. Fields that do not apply to the
/// given status are serialized as null.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MatchUpdate {
    pub match_id: Option<String>,
    pub status: MatchUpdateStatus,
    pub player1: PlayerUsername,
    pub player2: PlayerUsername,
    pub reporter_username: Option<PlayerUsername>,
    pub claimed_winner: Option<PlayerUsername>,
    pub result: Option<MatchStatus>,
    pub winner_username: Option<PlayerUsername>,
    pub player1_elo_delta: Option<i32>,
    pub player2_elo_delta: Option<i32>,
    pub player1_new_elo: Option<i32>,
    pub player2_new_elo: Option<i32>,
    pub player1_character: Option<String>,
    pub player2_character: Option<String>,
}

impl MatchUpdate {
    pub fn new(
        match_id: Option<String>,
        status: MatchUpdateStatus,
        player1: PlayerUsername,
        player2: PlayerUsername,
    ) -> Self {
        Self {
            match_id,
            status,
            player1,
            player2,
            reporter_username: None,
            claimed_winner: None,
            result: None,
            winner_username: None,
            player1_elo_delta: None,
            player2_elo_delta: None,
            player1_new_elo: None,
            player2_new_elo: None,
            player1_character: None,
            player2_character: None,
        }
    }
}
