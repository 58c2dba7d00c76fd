//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket. Every frame is
//! a JSON [`Envelope`]: a `type` tag, an optional `userId` and free-form
//! `content`.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use thiserror::Error;

use crate::game::action::{Action, ActionKind};
use crate::game::card::CardId;
use crate::game::engine::DuelError;
use crate::game::state::{Duel, DuelId, EndReason, Identity};
use crate::matchmaking::{MatchmakingError, Room, RoomId};

// =============================================================================
// ENVELOPE
// =============================================================================

/// The typed message unit exchanged with connections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    /// Message type tag.
    #[serde(rename = "type")]
    pub kind: String,
    /// Sender or addressee, when relevant.
    #[serde(rename = "userId", default, skip_serializing_if = "Option::is_none")]
    pub sender: Option<Identity>,
    /// Message body.
    #[serde(default, alias = "payload", skip_serializing_if = "Value::is_null")]
    pub content: Value,
}

/// Protocol decoding errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// Frame is not a JSON envelope.
    #[error("invalid message format: {0}")]
    InvalidJson(#[from] serde_json::Error),

    /// Envelope content does not fit its type.
    #[error("invalid {kind} payload: {source}")]
    InvalidPayload {
        /// Envelope type.
        kind: String,
        /// Decoding failure.
        #[source]
        source: serde_json::Error,
    },
}

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum ClientMessage {
    /// Join matchmaking.
    FindMatch,
    /// Leave matchmaking.
    CancelMatch,
    /// Submit a duel action.
    GameAction(GameActionPayload),
    /// Application-level ping.
    Ping,
    /// Any other type tag.
    Unknown(String),
}

/// Body of a `gameAction` message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameActionPayload {
    /// Target duel.
    pub duel_id: DuelId,
    /// Action kind.
    #[serde(alias = "actionType")]
    pub kind: ActionKind,
    /// Card played or attacking.
    #[serde(default)]
    pub card_id: Option<CardId>,
    /// Card attacked.
    #[serde(default, alias = "targetId")]
    pub target_card_id: Option<CardId>,
}

impl GameActionPayload {
    /// Bind the payload to the connection's identity.
    pub fn into_action(self, actor: Identity) -> Action {
        Action {
            duel_id: self.duel_id,
            actor,
            kind: self.kind,
            card_id: self.card_id,
            target_card_id: self.target_card_id,
        }
    }
}

impl ClientMessage {
    /// Parse a text frame.
    pub fn from_json(s: &str) -> Result<Self, ProtocolError> {
        let envelope: Envelope = serde_json::from_str(s)?;
        Self::from_envelope(envelope)
    }

    /// Interpret an envelope by its type tag.
    pub fn from_envelope(envelope: Envelope) -> Result<Self, ProtocolError> {
        let message = match envelope.kind.as_str() {
            "findMatch" => Self::FindMatch,
            "cancelMatch" => Self::CancelMatch,
            "ping" => Self::Ping,
            "gameAction" => {
                let payload = serde_json::from_value(envelope.content).map_err(|source| {
                    ProtocolError::InvalidPayload {
                        kind: envelope.kind.clone(),
                        source,
                    }
                })?;
                Self::GameAction(payload)
            }
            _ => Self::Unknown(envelope.kind),
        };
        Ok(message)
    }
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Error codes carried by `error` envelopes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Frame could not be parsed.
    InvalidMessage,
    /// Type tag not understood.
    UnknownType,
    /// Already in the matchmaking queue.
    AlreadyQueued,
    /// Match already started.
    AlreadyStarted,
    /// Room does not exist.
    RoomNotFound,
    /// Room in the wrong state.
    InvalidRoomState,
    /// Not queued or in a room.
    NotQueued,
    /// Duel does not exist.
    DuelNotFound,
    /// Caller is not seated in the duel.
    NotParticipant,
    /// Server-side failure.
    InternalError,
}

impl From<&MatchmakingError> for ErrorCode {
    fn from(err: &MatchmakingError) -> Self {
        match err {
            MatchmakingError::AlreadyQueued => Self::AlreadyQueued,
            MatchmakingError::AlreadyStarted => Self::AlreadyStarted,
            MatchmakingError::RoomNotFound => Self::RoomNotFound,
            MatchmakingError::InvalidRoomState(_) => Self::InvalidRoomState,
            MatchmakingError::NotQueued | MatchmakingError::NotInRoom => Self::NotQueued,
        }
    }
}

impl From<&DuelError> for ErrorCode {
    fn from(err: &DuelError) -> Self {
        match err {
            DuelError::DuelNotFound(_) => Self::DuelNotFound,
            DuelError::EngineStopped => Self::InternalError,
        }
    }
}

/// Content of an `error` envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    /// Machine-readable code.
    pub code: ErrorCode,
    /// Human-readable message.
    pub message: String,
}

fn to_content<T: Serialize>(value: &T) -> Value {
    // Only derived types go through here; they always serialize
    serde_json::to_value(value).unwrap_or_default()
}

impl Envelope {
    /// Bare envelope.
    pub fn new(kind: impl Into<String>, sender: Option<Identity>, content: Value) -> Self {
        Self {
            kind: kind.into(),
            sender,
            content,
        }
    }

    /// Room snapshot after `findMatch`.
    pub fn room_joined(identity: &Identity, room: &Room) -> Self {
        Self::new("roomJoined", Some(identity.clone()), to_content(room))
    }

    /// Both players are paired.
    pub fn game_ready(room: &Room) -> Self {
        Self::new("gameReady", None, to_content(room))
    }

    /// Duel created for a paired room.
    pub fn game_start(room_id: RoomId, duel_id: DuelId, players: &[Identity; 2]) -> Self {
        Self::new(
            "gameStart",
            None,
            json!({
                "roomId": room_id,
                "duelId": duel_id,
                "players": players,
            }),
        )
    }

    /// Matchmaking cancelled.
    pub fn match_cancelled(identity: &Identity) -> Self {
        Self::new("matchCancelled", Some(identity.clone()), Value::Null)
    }

    /// Duel snapshot on duel-scoped connect.
    pub fn duel_data(duel: &Duel) -> Self {
        Self::new("duelData", None, to_content(duel))
    }

    /// Duel snapshot after an applied action.
    pub fn duel_update(duel: &Duel) -> Self {
        Self::new("duelUpdate", None, to_content(duel))
    }

    /// Duel finished.
    pub fn duel_ended(duel_id: DuelId, winner: Option<&Identity>, reason: EndReason) -> Self {
        Self::new(
            "duelEnded",
            None,
            json!({
                "duelId": duel_id,
                "winner": winner,
                "reason": reason,
            }),
        )
    }

    /// Rejected request.
    pub fn error(code: ErrorCode, message: impl Into<String>) -> Self {
        let body = ErrorBody {
            code,
            message: message.into(),
        };
        Self::new("error", None, to_content(&body))
    }

    /// Reply to `ping`.
    pub fn pong(identity: &Identity) -> Self {
        Self::new("pong", Some(identity.clone()), Value::Null)
    }

    /// A connection registered.
    pub fn user_connected(identity: &Identity) -> Self {
        Self::new("userConnected", Some(identity.clone()), json!({ "userId": identity }))
    }

    /// Serialize to a text frame.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Parse from a text frame.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

// =============================================================================
// TESTS
// =============================================================================
