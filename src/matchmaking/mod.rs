//! Matchmaking
//!
//! Pairs waiting players into rooms and hands finished pairings to whoever
//! creates the duel. Never touches connections.

pub mod coordinator;
pub mod room;

pub use coordinator::{JoinOutcome, MatchCallback, MatchFound, Matchmaker, MatchmakingError, QueueStatus};
pub use room::{Room, RoomId, RoomStatus, WaitingEntry};
