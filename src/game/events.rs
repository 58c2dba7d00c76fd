//! Duel Events
//!
//! Published by the engine after each applied action so the delivery layer can
//! fan state out to the two players.

use crate::game::state::{Duel, DuelId, EndReason, Identity};

/// Engine notification.
#[derive(Clone, Debug)]
pub enum DuelEvent {
    /// State changed; carries the post-action snapshot.
    Updated(Box<Duel>),
    /// Duel just ended.
    Finished {
        /// Duel that ended.
        duel_id: DuelId,
        /// Both players, seat order.
        players: [Identity; 2],
        /// Winner, if any.
        winner: Option<Identity>,
        /// Why it ended.
        reason: EndReason,
    },
}

impl DuelEvent {
    /// Duel this event concerns.
    pub fn duel_id(&self) -> DuelId {
        match self {
            DuelEvent::Updated(duel) => duel.id,
            DuelEvent::Finished { duel_id, .. } => *duel_id,
        }
    }

    /// Identities that should receive this event.
    pub fn recipients(&self) -> [Identity; 2] {
        match self {
            DuelEvent::Updated(duel) => duel.identities(),
            DuelEvent::Finished { players, .. } => players.clone(),
        }
    }
}
