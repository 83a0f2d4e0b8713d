//! JSON bridge to the local session daemon.
//!
//! Commands go over HTTP, one POST per call, wrapped in the bridge's
//! `{ok, result, error, seconds}` envelope. Inbound updates arrive on a
//! websocket and are fanned out through a broadcast channel so every
//! miner of the account sees every event.

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::json;
use tokio::sync::broadcast;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use clickmine_core::config::BridgeConfig;
use clickmine_core::types::PeerRef;

use crate::session::{ChatSession, ClientError, ClientResult, Membership, ResolvedPeer};
use crate::types::ChatEvent;

/// Delay before reconnecting a dropped update stream.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);

#[derive(Debug, Deserialize)]
struct BridgeReply<T> {
    ok: bool,
    result: Option<T>,
    error: Option<String>,
    seconds: Option<u64>,
}

/// One account's session on the bridge daemon.
pub struct BridgeSession {
    http: reqwest::Client,
    base_url: String,
    phone: String,
    events: broadcast::Sender<ChatEvent>,
}

impl BridgeSession {
    /// Start (or reattach to) the account's session on the bridge and
    /// begin streaming its updates.
    pub async fn connect(
        config: &BridgeConfig,
        phone: &str,
        api_id: i64,
        api_hash: &str,
        token: &str,
    ) -> ClientResult<Self> {
        let (events, _) = broadcast::channel(256);
        let session = Self {
            http: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            phone: phone.to_string(),
            events,
        };
        session
            .ack(
                "session.start",
                json!({ "api_id": api_id, "api_hash": api_hash, "token": token }),
            )
            .await?;
        session.spawn_listener(&config.ws_url);
        Ok(session)
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> ClientResult<T> {
        let reply: BridgeReply<T> = self.post(method, params).await?;
        if !reply.ok {
            return Err(decode_error(reply.error, reply.seconds));
        }
        reply
            .result
            .ok_or_else(|| ClientError::Rpc(format!("bridge reply for {method} carried no result")))
    }

    /// Call whose result payload we do not care about.
    async fn ack(&self, method: &str, params: serde_json::Value) -> ClientResult<()> {
        let reply: BridgeReply<serde_json::Value> = self.post(method, params).await?;
        if !reply.ok {
            return Err(decode_error(reply.error, reply.seconds));
        }
        Ok(())
    }

    async fn post<T: DeserializeOwned>(
        &self,
        method: &str,
        params: serde_json::Value,
    ) -> ClientResult<BridgeReply<T>> {
        let body = json!({ "phone": self.phone, "method": method, "params": params });
        let response = self
            .http
            .post(format!("{}/rpc", self.base_url))
            .json(&body)
            .send()
            .await
            .map_err(|e| ClientError::Rpc(format!("bridge call {method} failed: {e}")))?;
        response
            .json()
            .await
            .map_err(|e| ClientError::Rpc(format!("invalid bridge reply for {method}: {e}")))
    }

    /// Read the account's update socket forever, reconnecting on any
    /// drop. Undecodable frames are logged and skipped.
    fn spawn_listener(&self, ws_base: &str) {
        let url = format!("{}/updates/{}", ws_base.trim_end_matches('/'), self.phone);
        let events = self.events.clone();
        let phone = self.phone.clone();
        tokio::spawn(async move {
            loop {
                match tokio_tungstenite::connect_async(&url).await {
                    Ok((stream, _)) => {
                        tracing::info!("update stream connected for {phone}");
                        let (_, mut read) = stream.split();
                        while let Some(frame) = read.next().await {
                            match frame {
                                Ok(WsMessage::Text(text)) => {
                                    match serde_json::from_str::<ChatEvent>(&text) {
                                        Ok(event) => {
                                            let _ = events.send(event);
                                        }
                                        Err(e) => {
                                            tracing::warn!("undecodable update for {phone}: {e}")
                                        }
                                    }
                                }
                                Ok(WsMessage::Close(_)) => {
                                    tracing::info!("update stream closed for {phone}");
                                    break;
                                }
                                Err(e) => {
                                    tracing::error!("update stream error for {phone}: {e}");
                                    break;
                                }
                                _ => {}
                            }
                        }
                    }
                    Err(e) => {
                        tracing::error!("update stream connect failed for {phone}: {e}");
                    }
                }
                tokio::time::sleep(RECONNECT_DELAY).await;
            }
        });
    }
}

/// Map a bridge error envelope onto [`ClientError`]. Flood waits come
/// either as an explicit `seconds` field or encoded in the error name
/// (`FLOOD_WAIT_42`).
fn decode_error(error: Option<String>, seconds: Option<u64>) -> ClientError {
    let message = error.unwrap_or_else(|| "unknown bridge error".to_string());
    if message.starts_with("FLOOD_WAIT") {
        let seconds = seconds
            .or_else(|| message.rsplit('_').next().and_then(|s| s.parse().ok()))
            .unwrap_or(60);
        return ClientError::FloodWait { seconds };
    }
    if let Some(seconds) = seconds {
        return ClientError::FloodWait { seconds };
    }
    ClientError::Rpc(message)
}

#[async_trait]
impl ChatSession for BridgeSession {
    async fn send_message(&self, peer: &PeerRef, text: &str) -> ClientResult<()> {
        self.ack("messages.send", json!({ "peer": peer, "text": text })).await
    }

    async fn click_button(&self, peer: &PeerRef, message_id: i64, data: &str) -> ClientResult<()> {
        self.ack(
            "messages.click",
            json!({ "peer": peer, "message_id": message_id, "data": data }),
        )
        .await
    }

    async fn start_bot(&self, bot: &PeerRef, referral: Option<&str>) -> ClientResult<()> {
        self.ack("bots.start", json!({ "peer": bot, "referral": referral })).await
    }

    async fn unblock(&self, peer: &PeerRef) -> ClientResult<()> {
        self.ack("contacts.unblock", json!({ "peer": peer })).await
    }

    async fn block(&self, peer: &PeerRef) -> ClientResult<()> {
        self.ack("contacts.block", json!({ "peer": peer })).await
    }

    async fn join_channel(&self, peer: &PeerRef) -> ClientResult<()> {
        self.ack("channels.join", json!({ "peer": peer })).await
    }

    async fn leave_channel(&self, peer: &PeerRef) -> ClientResult<()> {
        self.ack("channels.leave", json!({ "peer": peer })).await
    }

    async fn resolve_handle(&self, handle: &str) -> ClientResult<ResolvedPeer> {
        self.call("contacts.resolve", json!({ "handle": handle })).await
    }

    async fn channel_memberships(&self) -> ClientResult<Vec<Membership>> {
        self.call("channels.list", json!({})).await
    }

    fn subscribe(&self) -> broadcast::Receiver<ChatEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flood_wait_from_seconds_field() {
        let err = decode_error(Some("FLOOD_WAIT".to_string()), Some(42));
        assert!(matches!(err, ClientError::FloodWait { seconds: 42 }));
    }

    #[test]
    fn flood_wait_from_error_suffix() {
        let err = decode_error(Some("FLOOD_WAIT_17".to_string()), None);
        assert!(matches!(err, ClientError::FloodWait { seconds: 17 }));
    }

    #[test]
    fn plain_error_stays_rpc() {
        let err = decode_error(Some("USERNAME_INVALID".to_string()), None);
        assert!(matches!(err, ClientError::Rpc(m) if m == "USERNAME_INVALID"));
    }

    #[test]
    fn reply_envelope_decodes_without_result() {
        let reply: BridgeReply<serde_json::Value> =
            serde_json::from_str(r#"{"ok": true}"#).unwrap();
        assert!(reply.ok);
        assert!(reply.result.is_none());
    }

    #[test]
    fn chat_event_decodes_from_bridge_json() {
        let event: ChatEvent = serde_json::from_str(
            r#"{
                "peer": {"kind": "user", "id": 9000, "access_hash": 77},
                "message_id": 5,
                "sender": "@Litecoin_click_bot",
                "text": "Available balance: 0.002 LTC",
                "markup": {"rows": [[{"label": "Skip", "callback_data": "skip"}]]}
            }"#,
        )
        .unwrap();
        assert_eq!(event.peer.id, 9000);
        assert_eq!(event.markup.unwrap().first_button().unwrap().label, "Skip");
    }
}
