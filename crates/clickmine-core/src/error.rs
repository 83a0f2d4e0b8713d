//! Workspace-wide error type.

use thiserror::Error;

/// Every failure the fleet can surface, grouped by the subsystem that
/// raised it.
#[derive(Error, Debug)]
pub enum MinerError {
    #[error("Config error: {0}")]
    Config(String),

    #[error("Store error: {0}")]
    Store(String),

    #[error("Client error: {0}")]
    Client(String),

    #[error("Solver error: {0}")]
    Solver(String),

    /// A handle could not be turned into an addressable peer.
    #[error("Entity resolution failed: {0}")]
    Resolution(String),

    /// `end` was called with a token the queue never admitted. The
    /// queue and its caller have desynchronized; this is a bug, not a
    /// recoverable runtime condition.
    #[error("Queue desync: token {0} was never admitted")]
    QueueDesync(u64),

    #[error("Gateway error: {0}")]
    Gateway(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, MinerError>;
