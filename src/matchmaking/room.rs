//! Rooms and Waiting Entries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::game::state::{DuelId, Identity};

/// Unique room identifier.
pub type RoomId = Uuid;

/// A player waiting to be paired.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WaitingEntry {
    /// Who is waiting.
    #[serde(rename = "userId")]
    pub identity: Identity,
    /// When they joined the queue.
    pub enqueued_at: DateTime<Utc>,
}

impl WaitingEntry {
    /// Entry stamped now.
    pub fn new(identity: Identity) -> Self {
        Self {
            identity,
            enqueued_at: Utc::now(),
        }
    }
}

/// Room lifecycle status.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RoomStatus {
    /// One player, waiting for an opponent.
    Waiting,
    /// Two players paired, duel not yet started.
    Ready,
    /// Duel in progress.
    Active,
}

/// Matchmaking grouping of one or two players.
///
/// Holds one player while `Waiting` and exactly two while `Ready`/`Active`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Room {
    /// Room identifier.
    pub id: RoomId,
    /// Members in pairing order.
    pub players: Vec<WaitingEntry>,
    /// Lifecycle status.
    pub status: RoomStatus,
    /// Duel played in this room, once created.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duel_id: Option<DuelId>,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last status change.
    pub updated_at: DateTime<Utc>,
}

impl Room {
    /// Singleton room for a player still waiting.
    pub fn waiting(entry: WaitingEntry) -> Self {
        Self::with_players(vec![entry], RoomStatus::Waiting)
    }

    /// Paired room, ready to start.
    pub fn paired(first: WaitingEntry, second: WaitingEntry) -> Self {
        Self::with_players(vec![first, second], RoomStatus::Ready)
    }

    fn with_players(players: Vec<WaitingEntry>, status: RoomStatus) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            players,
            status,
            duel_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Member identities in pairing order.
    pub fn identities(&self) -> impl Iterator<Item = &Identity> {
        self.players.iter().map(|p| &p.identity)
    }

    /// Whether `identity` is a member.
    pub fn contains(&self, identity: &Identity) -> bool {
        self.identities().any(|id| id == identity)
    }

    /// Set status and bump `updated_at`.
    pub fn set_status(&mut self, status: RoomStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}
