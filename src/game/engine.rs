//! Duel Engine
//!
//! Owns every in-progress duel. Mutating actions flow through one bounded
//! queue into a single worker task, so actions for the same duel are applied
//! in submission order and nothing else writes duel state after creation.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{Duration as ChronoDuration, Utc};
use tokio::sync::{broadcast, mpsc, oneshot, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::core::rng::DeterministicRng;
use crate::game::action::Action;
use crate::game::card::CardCatalog;
use crate::game::events::DuelEvent;
use crate::game::rules::{apply_action, DuelConfig};
use crate::game::state::{Duel, DuelId, Identity, PlayerState};

type DuelTable = Arc<RwLock<BTreeMap<DuelId, Duel>>>;

/// Buffered events per subscriber before it starts lagging.
const EVENT_CAPACITY: usize = 256;

/// Duel engine errors surfaced to callers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DuelError {
    /// No duel with this id.
    #[error("duel {0} not found")]
    DuelNotFound(DuelId),

    /// Worker task has stopped.
    #[error("duel engine stopped")]
    EngineStopped,
}

/// Work items for the worker.
enum EngineCommand {
    Apply(Action),
    Flush(oneshot::Sender<()>),
}

/// The duel engine.
pub struct DuelEngine {
    duels: DuelTable,
    commands: mpsc::Sender<EngineCommand>,
    events: broadcast::Sender<DuelEvent>,
    catalog: CardCatalog,
    config: DuelConfig,
}

impl DuelEngine {
    /// Create the engine and spawn its worker.
    ///
    /// The worker exits once the engine is dropped.
    pub fn spawn(catalog: CardCatalog, config: DuelConfig) -> (Self, JoinHandle<()>) {
        let duels: DuelTable = Arc::new(RwLock::new(BTreeMap::new()));
        let (commands, rx) = mpsc::channel(config.action_queue_capacity.max(1));
        let (events, _) = broadcast::channel(EVENT_CAPACITY);

        let worker = Worker {
            duels: duels.clone(),
            events: events.clone(),
            config: config.clone(),
        };
        let handle = tokio::spawn(worker.run(rx));

        let engine = Self {
            duels,
            commands,
            events,
            catalog,
            config,
        };
        (engine, handle)
    }

    /// Create a duel between two identities and deal opening hands.
    pub async fn create_duel(&self, first: Identity, second: Identity) -> DuelId {
        let id = Uuid::new_v4();
        let mut rng = DeterministicRng::for_deal(id.as_bytes(), &[first.as_str(), second.as_str()]);

        let hand_size = self.config.opening_hand_size;
        let first_hand = self.catalog.draw(&mut rng, hand_size);
        let second_hand = self.catalog.draw(&mut rng, hand_size);

        let duel = Duel::new(
            id,
            PlayerState::new(first.clone(), first_hand, &self.config),
            PlayerState::new(second.clone(), second_hand, &self.config),
        );

        self.duels.write().await.insert(id, duel);
        info!(duel = %id, %first, %second, "Duel created");
        id
    }

    /// Queue an action. Returns once queued, not once applied.
    pub async fn submit_action(&self, action: Action) -> Result<(), DuelError> {
        if !self.duels.read().await.contains_key(&action.duel_id) {
            return Err(DuelError::DuelNotFound(action.duel_id));
        }

        self.commands
            .send(EngineCommand::Apply(action))
            .await
            .map_err(|_| DuelError::EngineStopped)
    }

    /// Wait until every action queued before this call has been processed.
    pub async fn flush(&self) -> Result<(), DuelError> {
        let (tx, rx) = oneshot::channel();
        self.commands
            .send(EngineCommand::Flush(tx))
            .await
            .map_err(|_| DuelError::EngineStopped)?;
        rx.await.map_err(|_| DuelError::EngineStopped)
    }

    /// Read-only snapshot of a duel.
    pub async fn get_duel(&self, id: &DuelId) -> Result<Duel, DuelError> {
        self.duels
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or(DuelError::DuelNotFound(*id))
    }

    /// Whether `id` exists and is still being played.
    pub async fn is_live(&self, id: &DuelId) -> bool {
        self.duels
            .read()
            .await
            .get(id)
            .is_some_and(|duel| !duel.is_finished())
    }

    /// Subscribe to state-change events.
    ///
    /// Events are lossy for slow subscribers; duel state is authoritative.
    pub fn subscribe(&self) -> broadcast::Receiver<DuelEvent> {
        self.events.subscribe()
    }

    /// Drop finished duels that ended more than `ttl` ago. Returns how many.
    pub async fn cleanup_finished(&self, ttl: std::time::Duration) -> usize {
        let ttl = ChronoDuration::from_std(ttl).unwrap_or(ChronoDuration::MAX);
        let now = Utc::now();

        let mut duels = self.duels.write().await;
        let before = duels.len();
        duels.retain(|_, duel| match duel.ended_at {
            Some(ended) if duel.is_finished() => now.signed_duration_since(ended) <= ttl,
            _ => true,
        });
        let removed = before - duels.len();
        if removed > 0 {
            debug!("Removed {} finished duels", removed);
        }
        removed
    }

    /// Number of duels in the table (active and finished).
    pub async fn duel_count(&self) -> usize {
        self.duels.read().await.len()
    }
}

/// The single consumer of the action queue.
struct Worker {
    duels: DuelTable,
    events: broadcast::Sender<DuelEvent>,
    config: DuelConfig,
}

impl Worker {
    async fn run(self, mut rx: mpsc::Receiver<EngineCommand>) {
        while let Some(command) = rx.recv().await {
            match command {
                EngineCommand::Apply(action) => self.process(action).await,
                EngineCommand::Flush(done) => {
                    let _ = done.send(());
                }
            }
        }
        debug!("Duel engine worker stopped");
    }

    async fn process(&self, action: Action) {
        let mut duels = self.duels.write().await;

        let Some(duel) = duels.get_mut(&action.duel_id) else {
            warn!(duel = %action.duel_id, "Action for unknown duel dropped");
            return;
        };

        let result = match apply_action(duel, &action, &self.config) {
            Ok(result) => result,
            Err(reason) => {
                debug!(duel = %action.duel_id, actor = %action.actor, %reason, "Action discarded");
                return;
            }
        };

        debug!(duel = %duel.id, actor = %action.actor, effect = ?result.effect, "Action applied");

        // No subscribers is fine
        let _ = self.events.send(DuelEvent::Updated(Box::new(duel.clone())));

        if let Some(reason) = result.ended {
            info!(duel = %duel.id, ?reason, winner = ?result.winner, "Duel finished");
            let _ = self.events.send(DuelEvent::Finished {
                duel_id: duel.id,
                players: duel.identities(),
                winner: result.winner,
                reason,
            });
        }
    }
}
