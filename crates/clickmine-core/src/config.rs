//! Fleet configuration, loaded from a TOML file.
//!
//! Every field has a default so an empty file (or no file at all) still
//! yields a runnable configuration.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{MinerError, Result};
use crate::types::RewardProgram;

/// Root configuration for the whole fleet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MinerConfig {
    /// Directory holding the database and anything else the fleet persists.
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    #[serde(default)]
    pub gateway: GatewayConfig,

    #[serde(default)]
    pub bridge: BridgeConfig,

    #[serde(default)]
    pub solver: SolverConfig,

    #[serde(default)]
    pub mining: MiningConfig,

    /// Reward programs every account mines.
    #[serde(default = "default_programs")]
    pub programs: Vec<RewardProgram>,
}

/// HTTP control plane.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_host")]
    pub host: String,
    #[serde(default = "default_gateway_port")]
    pub port: u16,
    /// Access token required on API calls. Empty means no auth.
    #[serde(default)]
    pub access_token: String,
    /// Allowed CORS origin. Empty means any origin.
    #[serde(default)]
    pub cors_origin: String,
}

/// Local session-bridge daemon the fleet speaks MTProto through.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default = "default_bridge_url")]
    pub base_url: String,
    #[serde(default = "default_bridge_ws_url")]
    pub ws_url: String,
}

/// Anti-bot bypass service (FlareSolverr compatible).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolverConfig {
    #[serde(default = "default_solver_url")]
    pub base_url: String,
    /// Name of the browser session held open on the solver.
    #[serde(default = "default_solver_session")]
    pub session: String,
    /// How many page fetches may run on the solver at once.
    #[serde(default = "default_solver_sessions")]
    pub max_sessions: usize,
}

/// Knobs of the mining workflow itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MiningConfig {
    /// Referral code passed when starting a reward bot.
    #[serde(default)]
    pub referral_code: String,
    /// Pause between task categories, in seconds.
    #[serde(default = "default_cooldown")]
    pub cooldown_secs: u64,
    /// Pause between spotting an actionable reply and acting on it.
    #[serde(default = "default_action_delay")]
    pub action_delay_secs: u64,
    /// Pause before initiating a withdrawal after a balance report.
    #[serde(default = "default_withdraw_delay")]
    pub withdraw_delay_secs: u64,
    /// Channel joins allowed per account per hour.
    #[serde(default = "default_join_cap")]
    pub join_cap_per_hour: u32,
    /// Memberships older than this many hours are dropped when a join
    /// fails and slots must be freed.
    #[serde(default = "default_join_retention")]
    pub join_retention_hours: u32,
    /// How long to wait for a messaged bot's first reply, in seconds.
    #[serde(default = "default_bot_reply_timeout")]
    pub bot_reply_timeout_secs: u64,
}

fn default_data_dir() -> String {
    "~/.clickmine".to_string()
}

fn default_programs() -> Vec<RewardProgram> {
    vec![
        RewardProgram {
            handle: "@Litecoin_click_bot".to_string(),
            coin: "LTC".to_string(),
            min_withdraw: 0.001,
            address: String::new(),
        },
        RewardProgram {
            handle: "@BCH_clickbot".to_string(),
            coin: "BCH".to_string(),
            min_withdraw: 0.00005,
            address: String::new(),
        },
        RewardProgram {
            handle: "@Zcash_click_bot".to_string(),
            coin: "ZEC".to_string(),
            min_withdraw: 0.0002,
            address: String::new(),
        },
    ]
}

fn default_gateway_host() -> String {
    "127.0.0.1".to_string()
}

fn default_gateway_port() -> u16 {
    3000
}

fn default_bridge_url() -> String {
    "http://127.0.0.1:8552".to_string()
}

fn default_bridge_ws_url() -> String {
    "ws://127.0.0.1:8552".to_string()
}

fn default_solver_url() -> String {
    "http://localhost:8191/v1".to_string()
}

fn default_solver_session() -> String {
    "MinerSession".to_string()
}

fn default_solver_sessions() -> usize {
    1
}

fn default_cooldown() -> u64 {
    10
}

fn default_action_delay() -> u64 {
    2
}

fn default_withdraw_delay() -> u64 {
    2
}

fn default_join_cap() -> u32 {
    10
}

fn default_join_retention() -> u32 {
    24
}

fn default_bot_reply_timeout() -> u64 {
    30
}

impl Default for MinerConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            gateway: GatewayConfig::default(),
            bridge: BridgeConfig::default(),
            solver: SolverConfig::default(),
            mining: MiningConfig::default(),
            programs: default_programs(),
        }
    }
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            host: default_gateway_host(),
            port: default_gateway_port(),
            access_token: String::new(),
            cors_origin: String::new(),
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            base_url: default_bridge_url(),
            ws_url: default_bridge_ws_url(),
        }
    }
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            base_url: default_solver_url(),
            session: default_solver_session(),
            max_sessions: default_solver_sessions(),
        }
    }
}

impl Default for MiningConfig {
    fn default() -> Self {
        Self {
            referral_code: String::new(),
            cooldown_secs: default_cooldown(),
            action_delay_secs: default_action_delay(),
            withdraw_delay_secs: default_withdraw_delay(),
            join_cap_per_hour: default_join_cap(),
            join_retention_hours: default_join_retention(),
            bot_reply_timeout_secs: default_bot_reply_timeout(),
        }
    }
}

impl MinerConfig {
    /// Load from the default path; a missing file yields defaults.
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    /// Load from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| MinerError::Config(format!("read {}: {e}", path.display())))?;
        toml::from_str(&raw).map_err(|e| MinerError::Config(format!("parse {}: {e}", path.display())))
    }

    /// `~/.clickmine/config.toml`
    pub fn default_path() -> PathBuf {
        dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(".clickmine")
            .join("config.toml")
    }

    /// Resolved data directory, with a leading `~` expanded.
    pub fn data_dir(&self) -> PathBuf {
        expand_home(&self.data_dir)
    }

    /// Path of the SQLite database.
    pub fn db_path(&self) -> PathBuf {
        self.data_dir().join("clickmine.db")
    }
}

fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    PathBuf::from(path)
}
