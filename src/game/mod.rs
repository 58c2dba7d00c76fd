//! Game Logic Module
//!
//! Card catalog, duel state and the engine that applies actions.
//!
//! ## Module Structure
//!
//! - `card`: Card definitions and catalog loading
//! - `state`: Duel and player state
//! - `action`: Player actions
//! - `rules`: Pure action resolution and end-of-duel checks
//! - `engine`: Duel table plus the single-consumer action worker
//! - `events`: Notifications published after each applied action

pub mod action;
pub mod card;
pub mod engine;
pub mod events;
pub mod rules;
pub mod state;

// Re-export key types
pub use action::{Action, ActionKind};
pub use card::{BuiltinCardSource, Card, CardCatalog, CardId, CardSource, CatalogError, JsonFileCardSource};
pub use engine::{DuelEngine, DuelError};
pub use events::DuelEvent;
pub use rules::{apply_action, check_duel_end, ActionEffect, ActionRejected, ActionResult, DuelConfig};
pub use state::{Duel, DuelId, DuelStatus, EndReason, Identity, PlayerState};
