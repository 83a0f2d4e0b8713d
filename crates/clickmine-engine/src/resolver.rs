//! Per-account entity resolution with a lookaside cache.
//!
//! Handles resolve through three layers before touching the network:
//! already-resolved [`PeerRef`]s pass straight through, then the
//! in-memory cache, then the store. Network resolutions are persisted
//! and counted so an account's daily resolve volume can be observed.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::{debug, warn};

use clickmine_client::{ChatSession, ClientError};
use clickmine_core::error::{MinerError, Result};
use clickmine_core::types::PeerRef;
use clickmine_store::{EntityRecord, Store};

/// Something a chat operation can be aimed at.
#[derive(Debug, Clone)]
pub enum PeerTarget {
    /// A public handle that still needs resolution.
    Handle(String),
    /// A peer we already hold the id and access hash for.
    Peer(PeerRef),
}

impl From<&str> for PeerTarget {
    fn from(handle: &str) -> Self {
        Self::Handle(handle.to_string())
    }
}

impl From<String> for PeerTarget {
    fn from(handle: String) -> Self {
        Self::Handle(handle)
    }
}

impl From<PeerRef> for PeerTarget {
    fn from(peer: PeerRef) -> Self {
        Self::Peer(peer)
    }
}

impl From<&PeerRef> for PeerTarget {
    fn from(peer: &PeerRef) -> Self {
        Self::Peer(*peer)
    }
}

/// Resolves handles for a single account.
///
/// Resolutions are account-scoped because access hashes are only valid
/// for the session that obtained them.
pub struct EntityResolver {
    phone: String,
    session: Arc<dyn ChatSession>,
    store: Arc<Store>,
    cache: RwLock<HashMap<String, PeerRef>>,
}

impl EntityResolver {
    pub fn new(phone: impl Into<String>, session: Arc<dyn ChatSession>, store: Arc<Store>) -> Self {
        Self {
            phone: phone.into(),
            session,
            store,
            cache: RwLock::new(HashMap::new()),
        }
    }

    /// Resolve `target` to a usable [`PeerRef`].
    pub async fn resolve(&self, target: impl Into<PeerTarget>) -> Result<PeerRef> {
        let handle = match target.into() {
            PeerTarget::Peer(peer) => return Ok(peer),
            PeerTarget::Handle(handle) => normalize(&handle),
        };

        if let Some(peer) = self.cache.read().await.get(&handle) {
            return Ok(*peer);
        }

        if let Some(record) = self.store.entity(&self.phone, &handle)? {
            let peer = PeerRef {
                kind: record.kind,
                id: record.id,
                access_hash: record.access_hash,
            };
            self.cache.write().await.insert(handle, peer);
            return Ok(peer);
        }

        let peer = self.resolve_remote(&handle).await?;
        self.store.save_entity(&EntityRecord {
            phone: self.phone.clone(),
            handle: handle.clone(),
            id: peer.id,
            access_hash: peer.access_hash,
            kind: peer.kind,
        })?;
        self.store.record_request(&self.phone)?;
        debug!(phone = %self.phone, %handle, id = peer.id, "resolved entity");
        self.cache.write().await.insert(handle, peer);
        Ok(peer)
    }

    async fn resolve_remote(&self, handle: &str) -> Result<PeerRef> {
        let resolved = loop {
            match self.session.resolve_handle(handle).await {
                Ok(resolved) => break resolved,
                Err(ClientError::FloodWait { seconds }) => {
                    warn!(phone = %self.phone, %handle, seconds, "flood wait while resolving");
                    tokio::time::sleep(Duration::from_secs(seconds)).await;
                }
                Err(e) => return Err(MinerError::Client(e.to_string())),
            }
        };

        let (Some(kind), Some(id)) = (resolved.kind, resolved.id) else {
            return Err(MinerError::Resolution(format!(
                "{handle} did not resolve to a concrete peer"
            )));
        };
        Ok(PeerRef { kind, id, access_hash: resolved.access_hash })
    }
}

/// Handles are stored without the `@` sigil.
fn normalize(handle: &str) -> String {
    handle.trim().trim_start_matches('@').to_string()
}
