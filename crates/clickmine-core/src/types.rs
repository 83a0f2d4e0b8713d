//! Domain types shared across the fleet.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of a resolved platform peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PeerKind {
    User,
    Chat,
    Channel,
}

impl PeerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PeerKind::User => "user",
            PeerKind::Chat => "chat",
            PeerKind::Channel => "channel",
        }
    }

    pub fn parse(value: &str) -> Option<PeerKind> {
        match value {
            "user" => Some(PeerKind::User),
            "chat" => Some(PeerKind::Chat),
            "channel" => Some(PeerKind::Channel),
            _ => None,
        }
    }
}

impl std::fmt::Display for PeerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A fully resolved, addressable peer reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRef {
    pub kind: PeerKind,
    pub id: i64,
    pub access_hash: i64,
}

/// One reward program a miner talks to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardProgram {
    /// Handle of the reward bot, e.g. `@Litecoin_click_bot`.
    pub handle: String,
    /// Coin label used in logs and snapshots.
    pub coin: String,
    /// Balance threshold above which a withdrawal is initiated.
    pub min_withdraw: f64,
    /// Payout address sent when the bot asks where to withdraw.
    #[serde(default)]
    pub address: String,
}

/// Task categories a miner rotates through. The serialized names are
/// the exact commands the reward bots understand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TaskKind {
    #[serde(rename = "Visit sites")]
    VisitSites,
    #[serde(rename = "Message bots")]
    MessageBots,
    #[serde(rename = "Join chats")]
    JoinChats,
}

impl TaskKind {
    /// Chat command that selects this category.
    pub fn command(&self) -> &'static str {
        match self {
            TaskKind::VisitSites => "Visit sites",
            TaskKind::MessageBots => "Message bots",
            TaskKind::JoinChats => "Join chats",
        }
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.command())
    }
}

/// Operator-visible run state of one miner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    Paused,
    Working,
    Sleeping,
}

/// Full state of one miner at a point in time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinerSnapshot {
    /// Handle of the reward bot this miner drives.
    pub entity: String,
    pub coin: String,
    pub min_withdraw: f64,
    pub address: String,
    pub current_job: Option<TaskKind>,
    pub state: RunState,
    pub completed_tasks: u64,
    pub skipped_tasks: u64,
    pub balance: f64,
    pub earned: f64,
    pub started_at: DateTime<Utc>,
}

/// A miner snapshot tagged with its owning account, fanned out to
/// observers on every state change.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinerUpdate {
    pub phone: String,
    pub snapshot: MinerSnapshot,
}

/// Per-account aggregate served by the control plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountSnapshot {
    pub phone: String,
    pub miners: Vec<MinerSnapshot>,
    pub all_time_earned: f64,
    pub all_time_completed_tasks: i64,
    pub all_time_skipped_tasks: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_kind_serializes_to_bot_command() {
        let json = serde_json::to_string(&TaskKind::VisitSites).unwrap();
        assert_eq!(json, "\"Visit sites\"");
        let back: TaskKind = serde_json::from_str("\"Join chats\"").unwrap();
        assert_eq!(back, TaskKind::JoinChats);
    }

    #[test]
    fn run_state_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&RunState::Sleeping).unwrap(), "\"sleeping\"");
    }

    #[test]
    fn peer_kind_round_trips_through_str() {
        for kind in [PeerKind::User, PeerKind::Chat, PeerKind::Channel] {
            assert_eq!(PeerKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(PeerKind::parse("bot"), None);
    }
}
