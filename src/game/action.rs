//! Duel Actions
//!
//! A mutating request from one player. Transient: it is queued once and
//! consumed once by the engine's worker.

use serde::{Deserialize, Serialize};

use crate::game::card::CardId;
use crate::game::state::{DuelId, Identity};

/// Kind of action.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ActionKind {
    /// Move a card from hand to the play area.
    #[serde(alias = "play_card")]
    PlayCard,
    /// Strike with a card, at a card or at the opponent.
    Attack,
    /// End the turn.
    #[serde(alias = "endTurn")]
    Pass,
}

/// A player action addressed to one duel.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Action {
    /// Target duel.
    pub duel_id: DuelId,
    /// Acting player.
    pub actor: Identity,
    /// What to do.
    pub kind: ActionKind,
    /// Card played or attacking.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card_id: Option<CardId>,
    /// Card attacked; `None` means a direct attack.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_card_id: Option<CardId>,
}

impl Action {
    /// End-of-turn action.
    pub fn pass(duel_id: DuelId, actor: impl Into<Identity>) -> Self {
        Self {
            duel_id,
            actor: actor.into(),
            kind: ActionKind::Pass,
            card_id: None,
            target_card_id: None,
        }
    }

    /// Attack with `card_id`, at `target` or directly at the opponent.
    pub fn attack(
        duel_id: DuelId,
        actor: impl Into<Identity>,
        card_id: CardId,
        target: Option<CardId>,
    ) -> Self {
        Self {
            duel_id,
            actor: actor.into(),
            kind: ActionKind::Attack,
            card_id: Some(card_id),
            target_card_id: target,
        }
    }

    /// Put `card_id` from hand into play.
    pub fn play_card(duel_id: DuelId, actor: impl Into<Identity>, card_id: CardId) -> Self {
        Self {
            duel_id,
            actor: actor.into(),
            kind: ActionKind::PlayCard,
            card_id: Some(card_id),
            target_card_id: None,
        }
    }
}
