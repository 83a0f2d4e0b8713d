//! The [`ChatSession`] trait: every operation a miner performs against
//! the chat platform. Flood waits are a distinguished error so callers
//! can sleep out the mandated pause and retry the same operation.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use clickmine_core::types::{PeerKind, PeerRef};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;

use crate::types::ChatEvent;

/// Errors surfaced by a chat session.
#[derive(Error, Debug, Clone)]
pub enum ClientError {
    /// Provider-mandated throttle: retry after `seconds`.
    #[error("flood wait: retry after {seconds}s")]
    FloodWait { seconds: u64 },

    /// Anything else the platform refused; opaque to the caller.
    #[error("rpc error: {0}")]
    Rpc(String),
}

pub type ClientResult<T> = std::result::Result<T, ClientError>;

/// Raw network resolution result. `kind` and `id` may be absent when
/// the platform returns a reference we cannot derive an id from.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResolvedPeer {
    #[serde(default)]
    pub kind: Option<PeerKind>,
    #[serde(default)]
    pub id: Option<i64>,
    #[serde(default)]
    pub access_hash: i64,
}

/// One current channel membership of the account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Membership {
    pub peer: PeerRef,
    pub joined_at: DateTime<Utc>,
}

/// Async boundary to the chat platform. One session per account,
/// shared by all of that account's miners.
#[async_trait]
pub trait ChatSession: Send + Sync {
    async fn send_message(&self, peer: &PeerRef, text: &str) -> ClientResult<()>;

    /// Press an inline button by its callback data.
    async fn click_button(&self, peer: &PeerRef, message_id: i64, data: &str) -> ClientResult<()>;

    /// `/start` a bot, optionally with a referral parameter.
    async fn start_bot(&self, bot: &PeerRef, referral: Option<&str>) -> ClientResult<()>;

    async fn unblock(&self, peer: &PeerRef) -> ClientResult<()>;

    async fn block(&self, peer: &PeerRef) -> ClientResult<()>;

    async fn join_channel(&self, peer: &PeerRef) -> ClientResult<()>;

    async fn leave_channel(&self, peer: &PeerRef) -> ClientResult<()>;

    /// Ask the platform to resolve a handle or invite link.
    async fn resolve_handle(&self, handle: &str) -> ClientResult<ResolvedPeer>;

    /// Channels this account is currently a member of.
    async fn channel_memberships(&self) -> ClientResult<Vec<Membership>>;

    /// Subscribe to the account's inbound event stream.
    fn subscribe(&self) -> broadcast::Receiver<ChatEvent>;

    /// Wait for the next inbound message in `peer`'s chat.
    async fn wait_for_message(&self, peer: &PeerRef, timeout: Duration) -> ClientResult<ChatEvent> {
        let mut events = self.subscribe();
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(ClientError::Rpc(format!(
                    "timed out waiting for a reply in chat {}",
                    peer.id
                )));
            }
            match tokio::time::timeout(remaining, events.recv()).await {
                Ok(Ok(event)) if event.peer.id == peer.id => return Ok(event),
                Ok(Ok(_)) => continue,
                Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
                Ok(Err(broadcast::error::RecvError::Closed)) => {
                    return Err(ClientError::Rpc("event stream closed".to_string()));
                }
                Err(_) => {
                    return Err(ClientError::Rpc(format!(
                        "timed out waiting for a reply in chat {}",
                        peer.id
                    )));
                }
            }
        }
    }
}
