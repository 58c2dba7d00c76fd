//! Matchmaking Coordinator
//!
//! Owns the waiting queue, the room table and the identity→room index. Every
//! mutation takes the write lock; `get_room`/`get_user_room` share the read
//! lock. Pairing is strict FIFO on queue position.

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures_util::future::BoxFuture;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, info, instrument, warn};

use crate::game::state::{DuelId, Identity};
use crate::matchmaking::room::{Room, RoomId, RoomStatus, WaitingEntry};

/// Matchmaking errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MatchmakingError {
    /// Identity already has a queue entry.
    #[error("already in matchmaking queue")]
    AlreadyQueued,
    /// The identity's room is ready or active.
    #[error("cannot cancel: game already started")]
    AlreadyStarted,
    /// No room with this id.
    #[error("room not found")]
    RoomNotFound,
    /// Room is not in a state that allows the operation.
    #[error("invalid room state: {0}")]
    InvalidRoomState(String),
    /// Identity is neither queued nor in a room.
    #[error("not in queue or room")]
    NotQueued,
    /// Identity has no room.
    #[error("not in any room")]
    NotInRoom,
}

/// Raised when two players are paired.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MatchFound {
    /// The new `Ready` room.
    pub room_id: RoomId,
    /// Players in pairing order.
    pub players: [Identity; 2],
}

/// Result of a join request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinOutcome {
    /// The caller's room.
    pub room: Room,
    /// True only for the request that completed the pairing.
    pub paired: bool,
}

/// Async hook run (on its own task) for every pairing.
pub type MatchCallback = Arc<dyn Fn(MatchFound) -> BoxFuture<'static, ()> + Send + Sync>;

/// Queue and room counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStatus {
    /// Queue entries.
    pub queue_size: usize,
    /// Rooms of any status.
    pub total_rooms: usize,
    /// Rooms with a duel in progress.
    pub active_rooms: usize,
    /// Singleton rooms.
    pub waiting_rooms: usize,
}

#[derive(Default)]
struct MatchmakingState {
    queue: VecDeque<WaitingEntry>,
    rooms: BTreeMap<RoomId, Room>,
    user_rooms: BTreeMap<Identity, RoomId>,
}

impl MatchmakingState {
    fn is_queued(&self, identity: &Identity) -> bool {
        self.queue.iter().any(|e| &e.identity == identity)
    }

    fn dequeue(&mut self, identity: &Identity) -> bool {
        let before = self.queue.len();
        self.queue.retain(|e| &e.identity != identity);
        self.queue.len() != before
    }

    /// Drop `identity`'s waiting room, if it has one.
    fn discard_waiting_room(&mut self, identity: &Identity) {
        let Some(room_id) = self.user_rooms.get(identity).copied() else {
            return;
        };
        if self.rooms.get(&room_id).map(|r| r.status) == Some(RoomStatus::Waiting) {
            self.rooms.remove(&room_id);
            self.user_rooms.remove(identity);
        }
    }

    /// Pair the two oldest queue entries, if there are two.
    fn try_pair(&mut self) -> Option<Room> {
        if self.queue.len() < 2 {
            return None;
        }
        let first = self.queue.pop_front()?;
        let second = self.queue.pop_front()?;

        self.discard_waiting_room(&first.identity);
        self.discard_waiting_room(&second.identity);

        let room = Room::paired(first, second);
        for identity in room.identities() {
            self.user_rooms.insert(identity.clone(), room.id);
        }
        self.rooms.insert(room.id, room.clone());
        Some(room)
    }

    fn count(&self, status: RoomStatus) -> usize {
        self.rooms.values().filter(|r| r.status == status).count()
    }
}

/// The matchmaking coordinator.
pub struct Matchmaker {
    state: RwLock<MatchmakingState>,
    on_match: OnceLock<MatchCallback>,
}

impl Matchmaker {
    /// Empty coordinator without a match callback.
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MatchmakingState::default()),
            on_match: OnceLock::new(),
        }
    }

    /// Install the pairing hook. Only the first call takes effect.
    pub fn set_match_callback(&self, callback: MatchCallback) {
        if self.on_match.set(callback).is_err() {
            warn!("Match callback already set; ignoring");
        }
    }

    /// Join the queue, or return the room the identity already has.
    pub async fn find_match(&self, identity: &Identity) -> Result<Room, MatchmakingError> {
        self.join_queue(identity).await.map(|outcome| outcome.room)
    }

    /// [`find_match`](Self::find_match), also reporting whether this call paired.
    #[instrument(skip(self))]
    pub async fn join_queue(&self, identity: &Identity) -> Result<JoinOutcome, MatchmakingError> {
        let (room, found) = {
            let mut state = self.state.write().await;

            if let Some(room_id) = state.user_rooms.get(identity).copied() {
                if let Some(room) = state.rooms.get(&room_id) {
                    return Ok(JoinOutcome {
                        room: room.clone(),
                        paired: false,
                    });
                }
                state.user_rooms.remove(identity);
            }

            if state.is_queued(identity) {
                return Err(MatchmakingError::AlreadyQueued);
            }

            state.queue.push_back(WaitingEntry::new(identity.clone()));
            info!("Queued {}; queue size {}", identity, state.queue.len());

            match state.try_pair() {
                Some(room) => {
                    let players = [room.players[0].identity.clone(), room.players[1].identity.clone()];
                    info!(room = %room.id, first = %players[0], second = %players[1], "Players paired");
                    let found = MatchFound {
                        room_id: room.id,
                        players,
                    };
                    (room, Some(found))
                }
                None => {
                    let room = Room::waiting(WaitingEntry::new(identity.clone()));
                    state.user_rooms.insert(identity.clone(), room.id);
                    state.rooms.insert(room.id, room.clone());
                    debug!(room = %room.id, "Waiting room created");
                    (room, None)
                }
            }
        };

        let paired = found.is_some();
        // Lock released; the callback calls back into us
        if let (Some(found), Some(callback)) = (found, self.on_match.get()) {
            tokio::spawn(callback(found));
        }

        Ok(JoinOutcome { room, paired })
    }

    /// Leave the queue and drop a waiting room.
    #[instrument(skip(self))]
    pub async fn cancel_match(&self, identity: &Identity) -> Result<(), MatchmakingError> {
        let mut state = self.state.write().await;

        let room_status = state
            .user_rooms
            .get(identity)
            .and_then(|id| state.rooms.get(id))
            .map(|r| r.status);

        if matches!(room_status, Some(RoomStatus::Ready | RoomStatus::Active)) {
            return Err(MatchmakingError::AlreadyStarted);
        }

        let dequeued = state.dequeue(identity);
        let had_room = room_status.is_some();
        state.discard_waiting_room(identity);
        // Dangling index entry
        state.user_rooms.remove(identity);

        if dequeued || had_room {
            info!("Matchmaking cancelled for {}", identity);
            Ok(())
        } else {
            Err(MatchmakingError::NotQueued)
        }
    }

    /// Move a `Ready` room to `Active`.
    #[instrument(skip(self))]
    pub async fn start_game(&self, room_id: RoomId) -> Result<(), MatchmakingError> {
        let mut state = self.state.write().await;
        let room = state
            .rooms
            .get_mut(&room_id)
            .ok_or(MatchmakingError::RoomNotFound)?;

        if room.players.len() != 2 {
            return Err(MatchmakingError::InvalidRoomState(format!(
                "room must have exactly 2 players, has {}",
                room.players.len()
            )));
        }
        if room.status != RoomStatus::Ready {
            return Err(MatchmakingError::InvalidRoomState(format!(
                "room status must be ready, is {:?}",
                room.status
            )));
        }

        room.set_status(RoomStatus::Active);
        info!(room = %room_id, "Room started");
        Ok(())
    }

    /// Record the duel being played in a paired room.
    pub async fn attach_duel(&self, room_id: RoomId, duel_id: DuelId) -> Result<(), MatchmakingError> {
        let mut state = self.state.write().await;
        let room = state
            .rooms
            .get_mut(&room_id)
            .ok_or(MatchmakingError::RoomNotFound)?;
        if room.status == RoomStatus::Waiting {
            return Err(MatchmakingError::InvalidRoomState(
                "waiting rooms have no duel".to_string(),
            ));
        }
        room.duel_id = Some(duel_id);
        Ok(())
    }

    /// Rooms with an attached duel.
    pub async fn attached_duels(&self) -> Vec<(RoomId, DuelId)> {
        self.state
            .read()
            .await
            .rooms
            .values()
            .filter_map(|r| r.duel_id.map(|duel_id| (r.id, duel_id)))
            .collect()
    }

    /// Snapshot of a room.
    pub async fn get_room(&self, room_id: RoomId) -> Result<Room, MatchmakingError> {
        self.state
            .read()
            .await
            .rooms
            .get(&room_id)
            .cloned()
            .ok_or(MatchmakingError::RoomNotFound)
    }

    /// Snapshot of the identity's room. Dangling index entries are pruned.
    pub async fn get_user_room(&self, identity: &Identity) -> Result<Room, MatchmakingError> {
        {
            let state = self.state.read().await;
            let room_id = state
                .user_rooms
                .get(identity)
                .ok_or(MatchmakingError::NotInRoom)?;
            if let Some(room) = state.rooms.get(room_id) {
                return Ok(room.clone());
            }
        }

        let mut state = self.state.write().await;
        if let Some(room_id) = state.user_rooms.get(identity).copied() {
            if let Some(room) = state.rooms.get(&room_id) {
                return Ok(room.clone());
            }
            state.user_rooms.remove(identity);
        }
        Err(MatchmakingError::RoomNotFound)
    }

    /// Release a finished duel's room so its players can queue again.
    pub async fn complete_duel(&self, duel_id: DuelId) -> bool {
        let room_id = self
            .state
            .read()
            .await
            .rooms
            .values()
            .find(|r| r.duel_id == Some(duel_id))
            .map(|r| r.id);
        match room_id {
            Some(room_id) => self.complete_room(room_id).await,
            None => false,
        }
    }

    /// Close one room. Index entries now pointing elsewhere are left alone.
    pub async fn complete_room(&self, room_id: RoomId) -> bool {
        let mut state = self.state.write().await;
        let Some(room) = state.rooms.remove(&room_id) else {
            return false;
        };
        for identity in room.identities() {
            if state.user_rooms.get(identity) == Some(&room_id) {
                state.user_rooms.remove(identity);
            }
        }
        debug!(room = %room_id, "Room closed");
        true
    }

    /// Sweep waiting rooms older than `max_age`.
    pub async fn cleanup_expired(&self, max_age: Duration) -> usize {
        self.cleanup_expired_at(Utc::now(), max_age).await
    }

    /// Sweep relative to an explicit clock. Ready and active rooms are kept.
    pub async fn cleanup_expired_at(&self, now: DateTime<Utc>, max_age: Duration) -> usize {
        let max_age = ChronoDuration::from_std(max_age).unwrap_or(ChronoDuration::MAX);
        let mut state = self.state.write().await;

        let expired: Vec<RoomId> = state
            .rooms
            .values()
            .filter(|r| r.status == RoomStatus::Waiting)
            .filter(|r| now.signed_duration_since(r.created_at) > max_age)
            .map(|r| r.id)
            .collect();

        for room_id in &expired {
            let Some(room) = state.rooms.remove(room_id) else {
                continue;
            };
            for identity in room.identities() {
                state.user_rooms.remove(identity);
                state.dequeue(identity);
            }
            info!(room = %room_id, "Expired waiting room removed");
        }

        expired.len()
    }

    /// Current counters.
    pub async fn queue_status(&self) -> QueueStatus {
        let state = self.state.read().await;
        QueueStatus {
            queue_size: state.queue.len(),
            total_rooms: state.rooms.len(),
            active_rooms: state.count(RoomStatus::Active),
            waiting_rooms: state.count(RoomStatus::Waiting),
        }
    }
}

impl Default for Matchmaker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn id(s: &str) -> Identity {
        Identity::from(s)
    }

    #[tokio::test]
    async fn test_find_match_is_idempotent() {
        let mm = Matchmaker::new();
        let first = mm.find_match(&id("alice")).await.unwrap();
        let second = mm.find_match(&id("alice")).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.status, RoomStatus::Waiting);
        assert_eq!(mm.queue_status().await.queue_size, 1);
    }

    #[tokio::test]
    async fn test_already_queued_without_room() {
        let mm = Matchmaker::new();
        mm.find_match(&id("alice")).await.unwrap();

        // Simulate the room vanishing while the queue entry stays
        {
            let mut state = mm.state.write().await;
            state.rooms.clear();
        }

        let err = mm.find_match(&id("alice")).await.unwrap_err();
        assert_eq!(err, MatchmakingError::AlreadyQueued);
    }

    #[tokio::test]
    async fn test_fifo_pairing() {
        let mm = Matchmaker::new();
        mm.find_match(&id("alice")).await.unwrap();
        let room = mm.find_match(&id("bob")).await.unwrap();

        assert_eq!(room.status, RoomStatus::Ready);
        let members: Vec<_> = room.identities().map(|i| i.as_str()).collect();
        assert_eq!(members, vec!["alice", "bob"]);

        // Alice's waiting room was superseded
        assert_eq!(mm.get_user_room(&id("alice")).await.unwrap().id, room.id);
        let status = mm.queue_status().await;
        assert_eq!(status.queue_size, 0);
        assert_eq!(status.total_rooms, 1);
        assert_eq!(status.waiting_rooms, 0);
    }

    #[tokio::test]
    async fn test_third_player_waits() {
        let mm = Matchmaker::new();
        mm.find_match(&id("alice")).await.unwrap();
        mm.find_match(&id("bob")).await.unwrap();
        let room = mm.find_match(&id("carol")).await.unwrap();
        assert_eq!(room.status, RoomStatus::Waiting);
        assert_eq!(room.players.len(), 1);
    }

    #[tokio::test]
    async fn test_cancel_waiting_removes_everything() {
        let mm = Matchmaker::new();
        let room = mm.find_match(&id("alice")).await.unwrap();

        mm.cancel_match(&id("alice")).await.unwrap();

        assert_eq!(mm.get_room(room.id).await.unwrap_err(), MatchmakingError::RoomNotFound);
        assert_eq!(mm.get_user_room(&id("alice")).await.unwrap_err(), MatchmakingError::NotInRoom);
        assert_eq!(mm.queue_status().await, QueueStatus::default());

        // Can queue again afterwards
        assert_eq!(mm.find_match(&id("alice")).await.unwrap().status, RoomStatus::Waiting);
    }

    #[tokio::test]
    async fn test_cancel_started_fails() {
        let mm = Matchmaker::new();
        mm.find_match(&id("alice")).await.unwrap();
        let room = mm.find_match(&id("bob")).await.unwrap();

        assert_eq!(mm.cancel_match(&id("alice")).await, Err(MatchmakingError::AlreadyStarted));
        mm.start_game(room.id).await.unwrap();
        assert_eq!(mm.cancel_match(&id("bob")).await, Err(MatchmakingError::AlreadyStarted));
    }

    #[tokio::test]
    async fn test_cancel_unknown() {
        let mm = Matchmaker::new();
        assert_eq!(mm.cancel_match(&id("ghost")).await, Err(MatchmakingError::NotQueued));
    }

    #[tokio::test]
    async fn test_start_game_transitions() {
        let mm = Matchmaker::new();
        let waiting = mm.find_match(&id("alice")).await.unwrap();
        assert!(matches!(
            mm.start_game(waiting.id).await,
            Err(MatchmakingError::InvalidRoomState(_))
        ));

        let room = mm.find_match(&id("bob")).await.unwrap();
        mm.start_game(room.id).await.unwrap();
        assert_eq!(mm.get_room(room.id).await.unwrap().status, RoomStatus::Active);
        assert!(matches!(
            mm.start_game(room.id).await,
            Err(MatchmakingError::InvalidRoomState(_))
        ));
        assert_eq!(
            mm.start_game(uuid::Uuid::new_v4()).await,
            Err(MatchmakingError::RoomNotFound)
        );
        assert_eq!(mm.queue_status().await.active_rooms, 1);
    }

    #[tokio::test]
    async fn test_cleanup_only_sweeps_waiting() {
        let mm = Matchmaker::new();
        mm.find_match(&id("alice")).await.unwrap();
        mm.find_match(&id("bob")).await.unwrap();
        let waiting = mm.find_match(&id("carol")).await.unwrap();

        let later = Utc::now() + ChronoDuration::minutes(10);
        let removed = mm.cleanup_expired_at(later, Duration::from_secs(300)).await;

        assert_eq!(removed, 1);
        assert!(mm.get_room(waiting.id).await.is_err());
        assert!(mm.get_user_room(&id("alice")).await.is_ok());
        assert_eq!(mm.queue_status().await.queue_size, 0);
    }

    #[tokio::test]
    async fn test_cleanup_keeps_fresh_rooms() {
        let mm = Matchmaker::new();
        mm.find_match(&id("alice")).await.unwrap();
        assert_eq!(mm.cleanup_expired(Duration::from_secs(300)).await, 0);
        assert_eq!(mm.queue_status().await.waiting_rooms, 1);
    }

    #[tokio::test]
    async fn test_complete_duel_frees_players() {
        let mm = Matchmaker::new();
        mm.find_match(&id("alice")).await.unwrap();
        let room = mm.find_match(&id("bob")).await.unwrap();
        let duel_id = uuid::Uuid::new_v4();
        mm.start_game(room.id).await.unwrap();
        mm.attach_duel(room.id, duel_id).await.unwrap();

        assert!(mm.complete_duel(duel_id).await);

        assert!(mm.get_room(room.id).await.is_err());
        let fresh = mm.find_match(&id("alice")).await.unwrap();
        assert_eq!(fresh.status, RoomStatus::Waiting);

        // A late repeat must not touch the new waiting room
        assert!(!mm.complete_duel(duel_id).await);
        assert_eq!(mm.get_user_room(&id("alice")).await.unwrap().id, fresh.id);
    }

    #[tokio::test]
    async fn test_join_queue_reports_pairing_once() {
        let mm = Matchmaker::new();
        assert!(!mm.join_queue(&id("alice")).await.unwrap().paired);

        let outcome = mm.join_queue(&id("bob")).await.unwrap();
        assert!(outcome.paired);
        assert_eq!(outcome.room.status, RoomStatus::Ready);

        // Repeats return the same room without pairing again
        for who in ["alice", "bob"] {
            let again = mm.join_queue(&id(who)).await.unwrap();
            assert!(!again.paired);
            assert_eq!(again.room.id, outcome.room.id);
        }
    }

    #[tokio::test]
    async fn test_attach_duel_and_complete_room() {
        let mm = Matchmaker::new();
        let waiting = mm.find_match(&id("alice")).await.unwrap();
        let duel_id = uuid::Uuid::new_v4();
        assert!(matches!(
            mm.attach_duel(waiting.id, duel_id).await,
            Err(MatchmakingError::InvalidRoomState(_))
        ));

        let room = mm.find_match(&id("bob")).await.unwrap();
        mm.start_game(room.id).await.unwrap();
        mm.attach_duel(room.id, duel_id).await.unwrap();
        assert_eq!(mm.attached_duels().await, vec![(room.id, duel_id)]);

        assert!(mm.complete_duel(duel_id).await);
        assert!(!mm.complete_duel(duel_id).await);
        assert!(!mm.complete_room(room.id).await);
        assert!(mm.attached_duels().await.is_empty());
        assert_eq!(mm.get_user_room(&id("bob")).await.unwrap_err(), MatchmakingError::NotInRoom);
    }

    #[tokio::test]
    async fn test_complete_room_keeps_newer_index_entries() {
        let mm = Matchmaker::new();
        mm.find_match(&id("alice")).await.unwrap();
        let old = mm.find_match(&id("bob")).await.unwrap();

        let newer = uuid::Uuid::new_v4();
        mm.state.write().await.user_rooms.insert(id("alice"), newer);

        assert!(mm.complete_room(old.id).await);
        let state = mm.state.read().await;
        assert_eq!(state.user_rooms.get(&id("alice")), Some(&newer));
        assert!(!state.user_rooms.contains_key(&id("bob")));
    }

    #[tokio::test]
    async fn test_callback_runs_outside_lock() {
        let mm = Arc::new(Matchmaker::new());
        let (tx, mut rx) = mpsc::channel(1);

        let inner = mm.clone();
        mm.set_match_callback(Arc::new(move |found: MatchFound| -> BoxFuture<'static, ()> {
            let mm = inner.clone();
            let tx = tx.clone();
            Box::pin(async move {
                // Would deadlock if invoked under the write lock
                mm.start_game(found.room_id).await.unwrap();
                let _ = tx.send(found).await;
            })
        }));

        mm.find_match(&id("alice")).await.unwrap();
        let room = mm.find_match(&id("bob")).await.unwrap();

        let found = rx.recv().await.unwrap();
        assert_eq!(found.room_id, room.id);
        assert_eq!(found.players, [id("alice"), id("bob")]);
        assert_eq!(mm.get_room(room.id).await.unwrap().status, RoomStatus::Active);
    }
}
