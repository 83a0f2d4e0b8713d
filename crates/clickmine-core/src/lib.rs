//! # ClickMine Core
//!
//! Shared foundation for the mining fleet: the workspace error type,
//! TOML configuration, domain types, the observability sink every miner
//! reports into, and the text scrapers that pull numbers and claim
//! tokens out of bot replies and reward pages.

pub mod config;
pub mod error;
pub mod observe;
pub mod text;
pub mod types;

pub use config::MinerConfig;
pub use error::{MinerError, Result};
