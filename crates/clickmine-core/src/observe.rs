//! Observability sink shared by every miner.
//!
//! Keeps a bounded in-memory history of structured log lines and fans
//! miner updates out over a broadcast channel. Everything here is fire
//! and forget: a slow or absent observer never blocks or fails the
//! workflow that reported the event.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::types::MinerUpdate;

/// Severity of a log entry. `Audit` marks operator-relevant events
/// (withdrawals, flood waits) that deserve their own trail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Info,
    Warn,
    Error,
    Audit,
}

/// One structured log line kept in the ring buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Utc>,
    pub level: LogLevel,
    pub phone: String,
    pub program: String,
    pub message: String,
}

/// Event fanned out to connected observers.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SinkEvent {
    MinerUpdate(MinerUpdate),
    Log(LogEntry),
}

pub struct EventSink {
    history: Mutex<VecDeque<LogEntry>>,
    capacity: usize,
    events: broadcast::Sender<SinkEvent>,
}

impl EventSink {
    pub fn new(capacity: usize) -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            history: Mutex::new(VecDeque::with_capacity(capacity.min(256))),
            capacity: capacity.max(1),
            events,
        }
    }

    /// Record a log line: mirror it to tracing, keep it in history,
    /// push it to observers.
    pub fn log(&self, level: LogLevel, phone: &str, program: &str, message: impl Into<String>) {
        let entry = LogEntry {
            timestamp: Utc::now(),
            level,
            phone: phone.to_string(),
            program: program.to_string(),
            message: message.into(),
        };
        match level {
            LogLevel::Info => {
                tracing::info!(phone = %entry.phone, program = %entry.program, "{}", entry.message)
            }
            LogLevel::Warn => {
                tracing::warn!(phone = %entry.phone, program = %entry.program, "{}", entry.message)
            }
            LogLevel::Error => {
                tracing::error!(phone = %entry.phone, program = %entry.program, "{}", entry.message)
            }
            LogLevel::Audit => {
                tracing::info!(target: "clickmine::audit", phone = %entry.phone, program = %entry.program, "{}", entry.message)
            }
        }
        if let Ok(mut history) = self.history.lock() {
            if history.len() >= self.capacity {
                history.pop_front();
            }
            history.push_back(entry.clone());
        }
        let _ = self.events.send(SinkEvent::Log(entry));
    }

    /// Operator-relevant event that must land in the audit trail.
    pub fn audit(&self, phone: &str, program: &str, message: impl Into<String>) {
        self.log(LogLevel::Audit, phone, program, message);
    }

    /// Fan a miner state change out to observers.
    pub fn broadcast(&self, update: MinerUpdate) {
        let _ = self.events.send(SinkEvent::MinerUpdate(update));
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SinkEvent> {
        self.events.subscribe()
    }

    /// Current history, oldest entry first.
    pub fn history(&self) -> Vec<LogEntry> {
        self.history
            .lock()
            .map(|h| h.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn history_is_bounded_and_ordered() {
        let sink = EventSink::new(3);
        for i in 0..5 {
            sink.log(LogLevel::Info, "+100", "LTC", format!("line {i}"));
        }
        let history = sink.history();
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].message, "line 2");
        assert_eq!(history[2].message, "line 4");
    }

    #[tokio::test]
    async fn subscribers_receive_log_events() {
        let sink = EventSink::new(10);
        let mut rx = sink.subscribe();
        sink.log(LogLevel::Warn, "+100", "LTC", "heads up");
        match rx.recv().await.unwrap() {
            SinkEvent::Log(entry) => {
                assert_eq!(entry.level, LogLevel::Warn);
                assert_eq!(entry.message, "heads up");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn audit_entries_are_kept_in_history() {
        let sink = EventSink::new(10);
        sink.audit("+100", "LTC", "withdrawal confirmed");
        let history = sink.history();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].level, LogLevel::Audit);
    }
}
