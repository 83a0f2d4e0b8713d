//! Shared test doubles for the engine crate.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::{Notify, broadcast};

use clickmine_client::{
    ChatEvent, ChatSession, ClientError, ClientResult, InlineButton, Membership, ReplyMarkup,
    ResolvedPeer,
};
use clickmine_core::types::{PeerKind, PeerRef};

/// Outbound operation recorded by the fake session.
#[derive(Debug, Clone, PartialEq)]
pub enum Op {
    Send { peer_id: i64, text: String },
    Click { peer_id: i64, message_id: i64, data: String },
    StartBot { peer_id: i64, referral: Option<String> },
    Unblock(i64),
    Block(i64),
    Join(i64),
    Leave(i64),
}

/// Scriptable in-memory [`ChatSession`].
///
/// Every handle resolves deterministically unless an explicit
/// resolution is installed; failures are consumed from per-operation
/// queues in FIFO order.
pub struct FakeSession {
    pub ops: Mutex<Vec<Op>>,
    pub resolve_calls: AtomicUsize,
    resolutions: Mutex<HashMap<String, ResolvedPeer>>,
    send_failures: Mutex<VecDeque<ClientError>>,
    join_failures: Mutex<VecDeque<ClientError>>,
    join_gate: Mutex<Option<Arc<Notify>>>,
    memberships: Mutex<Vec<Membership>>,
    events: broadcast::Sender<ChatEvent>,
}

impl FakeSession {
    pub fn new() -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            ops: Mutex::new(Vec::new()),
            resolve_calls: AtomicUsize::new(0),
            resolutions: Mutex::new(HashMap::new()),
            send_failures: Mutex::new(VecDeque::new()),
            join_failures: Mutex::new(VecDeque::new()),
            join_gate: Mutex::new(None),
            memberships: Mutex::new(Vec::new()),
            events,
        })
    }

    pub fn ops(&self) -> Vec<Op> {
        self.ops.lock().unwrap().clone()
    }

    pub fn clear_ops(&self) {
        self.ops.lock().unwrap().clear();
    }

    pub fn sent_texts(&self) -> Vec<String> {
        self.ops()
            .into_iter()
            .filter_map(|op| match op {
                Op::Send { text, .. } => Some(text),
                _ => None,
            })
            .collect()
    }

    pub fn push_event(&self, event: ChatEvent) {
        let _ = self.events.send(event);
    }

    pub fn set_resolution(&self, handle: &str, resolved: ResolvedPeer) {
        self.resolutions.lock().unwrap().insert(handle.to_string(), resolved);
    }

    pub fn queue_send_failure(&self, error: ClientError) {
        self.send_failures.lock().unwrap().push_back(error);
    }

    pub fn queue_join_failure(&self, error: ClientError) {
        self.join_failures.lock().unwrap().push_back(error);
    }

    pub fn set_join_gate(&self, gate: Arc<Notify>) {
        *self.join_gate.lock().unwrap() = Some(gate);
    }

    pub fn set_memberships(&self, memberships: Vec<Membership>) {
        *self.memberships.lock().unwrap() = memberships;
    }

    fn record(&self, op: Op) {
        self.ops.lock().unwrap().push(op);
    }
}

/// Stable id derived from a handle so repeated resolutions agree.
pub fn handle_id(handle: &str) -> i64 {
    handle.bytes().fold(1000_i64, |acc, b| acc + i64::from(b))
}

pub fn peer(kind: PeerKind, id: i64) -> PeerRef {
    PeerRef { kind, id, access_hash: id * 7 }
}

/// Event from a bot chat with plain text.
pub fn text_event(chat: PeerRef, sender: &str, text: &str) -> ChatEvent {
    ChatEvent {
        peer: chat,
        message_id: 1,
        sender: sender.to_string(),
        text: text.to_string(),
        markup: None,
    }
}

/// Event carrying a button grid; rows of (label, url, callback_data).
pub fn markup_event(
    chat: PeerRef,
    sender: &str,
    text: &str,
    rows: Vec<Vec<(&str, Option<&str>, Option<&str>)>>,
) -> ChatEvent {
    let rows = rows
        .into_iter()
        .map(|row| {
            row.into_iter()
                .map(|(label, url, data)| InlineButton {
                    label: label.to_string(),
                    url: url.map(str::to_string),
                    callback_data: data.map(str::to_string),
                })
                .collect()
        })
        .collect();
    ChatEvent {
        peer: chat,
        message_id: 1,
        sender: sender.to_string(),
        text: text.to_string(),
        markup: Some(ReplyMarkup { rows }),
    }
}

#[async_trait]
impl ChatSession for FakeSession {
    async fn send_message(&self, peer: &PeerRef, text: &str) -> ClientResult<()> {
        if let Some(failure) = self.send_failures.lock().unwrap().pop_front() {
            return Err(failure);
        }
        self.record(Op::Send { peer_id: peer.id, text: text.to_string() });
        Ok(())
    }

    async fn click_button(&self, peer: &PeerRef, message_id: i64, data: &str) -> ClientResult<()> {
        self.record(Op::Click { peer_id: peer.id, message_id, data: data.to_string() });
        Ok(())
    }

    async fn start_bot(&self, bot: &PeerRef, referral: Option<&str>) -> ClientResult<()> {
        self.record(Op::StartBot { peer_id: bot.id, referral: referral.map(str::to_string) });
        Ok(())
    }

    async fn unblock(&self, peer: &PeerRef) -> ClientResult<()> {
        self.record(Op::Unblock(peer.id));
        Ok(())
    }

    async fn block(&self, peer: &PeerRef) -> ClientResult<()> {
        self.record(Op::Block(peer.id));
        Ok(())
    }

    async fn join_channel(&self, peer: &PeerRef) -> ClientResult<()> {
        if let Some(failure) = self.join_failures.lock().unwrap().pop_front() {
            return Err(failure);
        }
        self.record(Op::Join(peer.id));
        let gate = self.join_gate.lock().unwrap().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        Ok(())
    }

    async fn leave_channel(&self, peer: &PeerRef) -> ClientResult<()> {
        self.record(Op::Leave(peer.id));
        Ok(())
    }

    async fn resolve_handle(&self, handle: &str) -> ClientResult<ResolvedPeer> {
        self.resolve_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(resolved) = self.resolutions.lock().unwrap().get(handle) {
            return Ok(resolved.clone());
        }
        Ok(ResolvedPeer {
            kind: Some(PeerKind::User),
            id: Some(handle_id(handle)),
            access_hash: 7,
        })
    }

    async fn channel_memberships(&self) -> ClientResult<Vec<Membership>> {
        Ok(self.memberships.lock().unwrap().clone())
    }

    fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }
}
