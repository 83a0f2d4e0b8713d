//! # ClickMine Engine
//!
//! The automation core: one state machine per (account, program) pair,
//! the job rotation it cycles through, the lookaside entity resolver,
//! and the FIFO admission queue that throttles rate-limited operations.
//! [`fleet::MinerFleet`] wires all of it together per account.

pub mod fleet;
pub mod jobs;
pub mod miner;
pub mod patterns;
pub mod queue;
pub mod resolver;

pub use fleet::MinerFleet;
pub use jobs::JobRotation;
pub use miner::{Miner, MinerCommand, MinerHandle, MinerParams};
pub use queue::{ConcurrencyQueue, JobToken};
pub use resolver::{EntityResolver, PeerTarget};

#[cfg(test)]
pub(crate) mod testutil;
