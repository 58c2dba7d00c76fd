//! Core deterministic helpers.
//!
//! Nothing in here touches the network or the clock, so every type can be
//! exercised directly in unit tests.

pub mod rng;

pub use rng::{derive_deal_seed, DeterministicRng};
