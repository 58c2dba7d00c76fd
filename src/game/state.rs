//! Duel State Definitions
//!
//! Snapshot-friendly state for a single two-player duel. Every type here is
//! `Clone + Serialize` so the engine can hand out copies without exposing its
//! table.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::card::{Card, CardId};
use crate::game::DuelConfig;

// =============================================================================
// IDENTITY
// =============================================================================

/// Resolved caller principal (post-authentication).
///
/// The unique key for connections, queue entries and duel seats.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    /// Wrap a resolved identity string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow as `&str`.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Identity {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Identity {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Unique duel identifier.
pub type DuelId = Uuid;

// =============================================================================
// PLAYER STATE
// =============================================================================

/// One seat in a duel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerState {
    /// Who sits here.
    pub identity: Identity,
    /// Remaining hit points; the player loses at 0 or below.
    pub hit_points: i32,
    /// Hit points at the start of the duel.
    pub max_hit_points: i32,
    /// Mana available this turn.
    pub mana: u32,
    /// Mana ceiling.
    pub max_mana: u32,
    /// Cards in hand.
    pub hand: Vec<Card>,
    /// Cards on the board.
    pub play_area: Vec<Card>,
    /// Cards left in the (notional) deck.
    pub deck_size: u32,
}

impl PlayerState {
    /// Fresh seat with the configured starting values and an opening hand.
    pub fn new(identity: Identity, hand: Vec<Card>, config: &DuelConfig) -> Self {
        Self {
            identity,
            hit_points: config.starting_hit_points,
            max_hit_points: config.starting_hit_points,
            mana: config.starting_mana,
            max_mana: config.max_mana,
            hand,
            play_area: Vec::new(),
            deck_size: config.deck_size,
        }
    }

    /// True once hit points are exhausted.
    pub fn is_defeated(&self) -> bool {
        self.hit_points <= 0
    }

    /// First copy of `card_id` on the board.
    pub fn board_card(&self, card_id: CardId) -> Option<&Card> {
        self.play_area.iter().find(|c| c.id == card_id)
    }

    /// First copy of `card_id` in hand.
    pub fn hand_card(&self, card_id: CardId) -> Option<&Card> {
        self.hand.iter().find(|c| c.id == card_id)
    }
}

// =============================================================================
// DUEL
// =============================================================================

/// Duel lifecycle status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum DuelStatus {
    /// Accepting actions.
    Active,
    /// Ended; further actions are discarded.
    Finished,
}

/// Why a duel ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EndReason {
    /// A player dropped to 0 hit points or below.
    Knockout,
    /// The turn ceiling was reached; no winner.
    TurnLimit,
}

/// One game instance between exactly two identities.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Duel {
    /// Duel identifier.
    pub id: DuelId,
    /// Seats, in fixed order (index 0 moves first).
    pub players: [PlayerState; 2],
    /// Current turn number, starting at 1.
    pub turn_count: u32,
    /// Seat whose turn it is (0 or 1).
    pub active_player_index: usize,
    /// Lifecycle status.
    pub status: DuelStatus,
    /// Winner, if the duel ended by knockout.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub winner: Option<Identity>,
    /// How the duel ended.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_reason: Option<EndReason>,
    /// Creation time.
    pub started_at: DateTime<Utc>,
    /// When the duel finished.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ended_at: Option<DateTime<Utc>>,
}

impl Duel {
    /// New active duel; seat 0 moves first.
    pub fn new(id: DuelId, first: PlayerState, second: PlayerState) -> Self {
        Self {
            id,
            players: [first, second],
            turn_count: 1,
            active_player_index: 0,
            status: DuelStatus::Active,
            winner: None,
            end_reason: None,
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    /// Seat index of `identity`, if seated.
    pub fn seat_of(&self, identity: &Identity) -> Option<usize> {
        self.players.iter().position(|p| &p.identity == identity)
    }

    /// Whether `identity` plays in this duel.
    pub fn is_participant(&self, identity: &Identity) -> bool {
        self.seat_of(identity).is_some()
    }

    /// The player whose turn it is.
    pub fn active_player(&self) -> &PlayerState {
        &self.players[self.active_player_index]
    }

    /// Whether the duel has ended.
    pub fn is_finished(&self) -> bool {
        self.status == DuelStatus::Finished
    }

    /// Identities in seat order.
    pub fn identities(&self) -> [Identity; 2] {
        [
            self.players[0].identity.clone(),
            self.players[1].identity.clone(),
        ]
    }

    /// Mark the duel finished.
    pub fn finish(&mut self, reason: EndReason, winner: Option<Identity>) {
        self.status = DuelStatus::Finished;
        self.end_reason = Some(reason);
        self.winner = winner;
        self.ended_at = Some(Utc::now());
    }
}

/// Index of the other seat.
#[inline]
pub fn opponent_of(seat: usize) -> usize {
    (seat + 1) % 2
}
