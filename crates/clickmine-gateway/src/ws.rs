//! Websocket fan-out of miner updates and log lines.
//!
//! Protocol:
//! → Client sends: {"type":"join","token":"..."}
//! ← Server sends: {"type":"joined"}
//! ← Server sends: one frame per sink event, e.g.
//!   {"type":"miner_update",...} / {"type":"log",...}

use std::sync::Arc;

use axum::extract::State;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::response::IntoResponse;
use serde::Deserialize;
use tokio::sync::broadcast;

use super::server::AppState;

#[derive(Debug, Deserialize)]
struct JoinFrame {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    token: String,
}

/// WebSocket upgrade handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>) {
    if !join(&mut socket, &state).await {
        return;
    }
    tracing::info!("websocket observer connected");

    let mut events = state.sink.subscribe();
    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(event) => {
                    let Ok(payload) = serde_json::to_string(&event) else { continue };
                    if socket.send(Message::Text(payload.into())).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            },
            inbound = socket.recv() => match inbound {
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => continue,
                Some(Err(_)) => break,
            },
        }
    }
    tracing::info!("websocket observer disconnected");
}

/// The first frame must be a join carrying a valid token (when one is
/// configured). Anything else drops the connection.
async fn join(socket: &mut WebSocket, state: &AppState) -> bool {
    let Some(Ok(Message::Text(first))) = socket.recv().await else {
        return false;
    };
    let Ok(frame) = serde_json::from_str::<JoinFrame>(&first) else {
        return false;
    };
    if frame.kind != "join" {
        return false;
    }
    if !token_matches(&state.config.access_token, &frame.token) {
        let _ = socket
            .send(Message::Text(
                r#"{"type":"error","error":"invalid token"}"#.to_string().into(),
            ))
            .await;
        return false;
    }
    socket
        .send(Message::Text(r#"{"type":"joined"}"#.to_string().into()))
        .await
        .is_ok()
}

fn token_matches(expected: &str, provided: &str) -> bool {
    expected.is_empty() || expected == provided
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_expected_token_admits_everyone() {
        assert!(token_matches("", ""));
        assert!(token_matches("", "anything"));
    }

    #[test]
    fn configured_token_must_match_exactly() {
        assert!(token_matches("secret", "secret"));
        assert!(!token_matches("secret", ""));
        assert!(!token_matches("secret", "Secret"));
    }

    #[test]
    fn join_frame_decodes_with_and_without_token() {
        let frame: JoinFrame =
            serde_json::from_str(r#"{"type":"join","token":"abc"}"#).unwrap();
        assert_eq!(frame.kind, "join");
        assert_eq!(frame.token, "abc");

        let bare: JoinFrame = serde_json::from_str(r#"{"type":"join"}"#).unwrap();
        assert!(bare.token.is_empty());
    }
}
