//! API route handlers for the gateway.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use clickmine_core::observe::LogEntry;
use clickmine_engine::MinerCommand;

use super::server::AppState;

pub async fn health(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "ok": true,
        "accounts": state.fleet.account_count(),
        "miners": state.fleet.miner_count(),
        "uptime_secs": state.started_at.elapsed().as_secs(),
    }))
}

/// Per-account snapshots with all-time totals merged in.
pub async fn list_miners(State(state): State<Arc<AppState>>) -> Response {
    match state.fleet.snapshot() {
        Ok(accounts) => Json(accounts).into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"ok": false, "error": e.to_string()})),
        )
            .into_response(),
    }
}

pub async fn logs(State(state): State<Arc<AppState>>) -> Json<Vec<LogEntry>> {
    Json(state.sink.history())
}

/// Start/stop request; omitted filters mean "all".
#[derive(Debug, Deserialize)]
pub struct ControlRequest {
    #[serde(default)]
    pub phone: Option<String>,
    /// Bot handle or coin label.
    #[serde(default)]
    pub program: Option<String>,
    pub start: bool,
}

pub async fn control_miners(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ControlRequest>,
) -> Json<serde_json::Value> {
    let command = if req.start { MinerCommand::Start } else { MinerCommand::Stop };
    let reached = state
        .fleet
        .control(req.phone.as_deref(), req.program.as_deref(), command)
        .await;
    Json(serde_json::json!({ "ok": reached > 0, "reached": reached }))
}
