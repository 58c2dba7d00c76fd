//! Session Handling
//!
//! Translates inbound messages into matchmaking and duel calls and routes
//! their results back through the registry. Every rejected request becomes an
//! `error` envelope for the originating connection; nothing here is fatal.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use crate::game::engine::DuelEngine;
use crate::game::state::{DuelId, Identity};
use crate::matchmaking::Matchmaker;
use crate::network::protocol::{ClientMessage, Envelope, ErrorCode, GameActionPayload};
use crate::network::registry::{Hub, HubError};

/// Shared handler for every connection.
#[derive(Clone)]
pub struct SessionHandler {
    hub: Hub,
    matchmaking: Arc<Matchmaker>,
    duels: Arc<DuelEngine>,
}

impl SessionHandler {
    /// Handler over the shared components.
    pub fn new(hub: Hub, matchmaking: Arc<Matchmaker>, duels: Arc<DuelEngine>) -> Self {
        Self {
            hub,
            matchmaking,
            duels,
        }
    }

    /// Handle one text frame from `identity`.
    pub async fn handle_text(&self, identity: &Identity, text: &str) {
        match ClientMessage::from_json(text) {
            Ok(message) => self.handle_message(identity, message).await,
            Err(e) => {
                debug!(user = %identity, "Invalid message: {}", e);
                self.reply(identity, Envelope::error(ErrorCode::InvalidMessage, e.to_string()))
                    .await;
            }
        }
    }

    /// Dispatch a decoded message.
    #[instrument(skip(self, message))]
    pub async fn handle_message(&self, identity: &Identity, message: ClientMessage) {
        match message {
            ClientMessage::FindMatch => self.find_match(identity).await,
            ClientMessage::CancelMatch => self.cancel_match(identity).await,
            ClientMessage::GameAction(payload) => self.game_action(identity, payload).await,
            ClientMessage::Ping => self.reply(identity, Envelope::pong(identity)).await,
            ClientMessage::Unknown(kind) => {
                debug!(user = %identity, "Unknown message type {}", kind);
                self.reply(
                    identity,
                    Envelope::error(ErrorCode::UnknownType, format!("unknown message type: {}", kind)),
                )
                .await;
            }
        }
    }

    async fn find_match(&self, identity: &Identity) {
        let outcome = match self.matchmaking.join_queue(identity).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(user = %identity, "Matchmaking failed: {}", e);
                self.reply(identity, Envelope::error(ErrorCode::from(&e), e.to_string())).await;
                return;
            }
        };

        let room = outcome.room;
        self.reply(identity, Envelope::room_joined(identity, &room)).await;

        // Repeated requests for an existing room only get roomJoined
        if outcome.paired {
            let ready = Envelope::game_ready(&room);
            for player in room.identities() {
                self.reply(player, ready.clone()).await;
            }
        }
    }

    async fn cancel_match(&self, identity: &Identity) {
        match self.matchmaking.cancel_match(identity).await {
            Ok(()) => self.reply(identity, Envelope::match_cancelled(identity)).await,
            Err(e) => {
                debug!(user = %identity, "Cancel failed: {}", e);
                self.reply(identity, Envelope::error(ErrorCode::from(&e), e.to_string())).await;
            }
        }
    }

    async fn game_action(&self, identity: &Identity, payload: GameActionPayload) {
        let action = payload.into_action(identity.clone());
        if let Err(e) = self.duels.submit_action(action).await {
            debug!(user = %identity, "Action not queued: {}", e);
            self.reply(identity, Envelope::error(ErrorCode::from(&e), e.to_string())).await;
        }
    }

    /// Duel-scoped connect: send the caller a current snapshot.
    #[instrument(skip(self))]
    pub async fn connect_duel(&self, identity: &Identity, duel_id: DuelId) {
        // Reflect everything already queued
        if let Err(e) = self.duels.flush().await {
            warn!("Duel engine unavailable: {}", e);
        }

        let envelope = match self.duels.get_duel(&duel_id).await {
            Ok(duel) if duel.is_participant(identity) => {
                info!(user = %identity, duel = %duel_id, "Joined duel");
                Envelope::duel_data(&duel)
            }
            Ok(_) => Envelope::error(ErrorCode::NotParticipant, "not a participant in this duel"),
            Err(e) => Envelope::error(ErrorCode::from(&e), e.to_string()),
        };
        self.reply(identity, envelope).await;
    }

    async fn reply(&self, identity: &Identity, envelope: Envelope) {
        match self.hub.send_to_user(identity, envelope).await {
            Ok(()) => {}
            Err(HubError::Stopped) => warn!("Registry stopped"),
            Err(e) => debug!("Reply dropped: {}", e),
        }
    }
}
