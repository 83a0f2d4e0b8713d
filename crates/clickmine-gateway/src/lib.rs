//! HTTP and websocket control plane for the miner fleet.
//!
//! Read-only fleet/log views, start/stop commands, and a websocket
//! that fans out miner updates and log lines to connected observers.

pub mod routes;
pub mod server;
pub mod ws;

pub use server::{AppState, build_router, serve};
