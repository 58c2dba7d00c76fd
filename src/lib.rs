//! # Card Duel Server
//!
//! Real-time session coordinator for a two-player, turn-based card game.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     CARD DUEL SERVER                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Deterministic primitives                  │
//! │  └── rng.rs      - Seeded Xorshift128+ for dealing           │
//! │                                                              │
//! │  game/           - Duel logic                                │
//! │  ├── card.rs     - Card catalog and sources                  │
//! │  ├── state.rs    - Duel and player state                     │
//! │  ├── action.rs   - Player actions                            │
//! │  ├── rules.rs    - Action resolution, end conditions         │
//! │  ├── engine.rs   - Duel table and single action worker       │
//! │  └── events.rs   - Post-action notifications                 │
//! │                                                              │
//! │  matchmaking/    - FIFO pairing                              │
//! │  ├── room.rs     - Rooms and waiting entries                 │
//! │  └── coordinator.rs - Queue, room table, sweeps              │
//! │                                                              │
//! │  network/        - Delivery                                  │
//! │  ├── registry.rs - Connection registry (control loop)        │
//! │  ├── connection.rs - Read/write pumps                        │
//! │  ├── protocol.rs - Envelope and message types                │
//! │  ├── auth.rs     - JWT identity resolution                   │
//! │  ├── session.rs  - Inbound message handling                  │
//! │  └── server.rs   - WebSocket server                          │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Ownership
//!
//! Each piece of shared state has exactly one writer:
//! - the connection map belongs to the registry's control loop
//! - the queue and room table sit behind the matchmaker's lock
//! - duel state is only mutated by the engine's worker
//!
//! Everything else goes through their operations.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod core;
pub mod game;
pub mod matchmaking;
pub mod network;

// Re-export commonly used types
pub use core::rng::DeterministicRng;
pub use game::{Action, ActionKind, Card, CardCatalog, Duel, DuelConfig, DuelEngine, DuelError, DuelId, Identity};
pub use matchmaking::{Matchmaker, MatchmakingError, Room, RoomStatus};
pub use network::{Envelope, GameServer, Hub, HubError, ServerConfig};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Passes after which a duel ends without a winner.
pub const TURN_LIMIT: u32 = 30;

/// Hit points each player starts with.
pub const STARTING_HIT_POINTS: i32 = 30;

/// Mana on the first turn.
pub const STARTING_MANA: u32 = 1;

/// Mana ceiling.
pub const MAX_MANA: u32 = 10;

/// Cards dealt to each player.
pub const OPENING_HAND_SIZE: usize = 3;

/// Notional deck size.
pub const DECK_SIZE: u32 = 30;
