//! Fleet wiring: one miner per (account, reward program) pair.
//!
//! Accounts share nothing with each other except the store and the
//! global bypass gate. Within an account, all miners share one entity
//! resolver and one channel-join gate so the account-wide join cap
//! holds across programs.

use std::sync::Arc;

use tracing::info;

use clickmine_client::ChatSession;
use clickmine_core::config::MinerConfig;
use clickmine_core::error::Result;
use clickmine_core::observe::EventSink;
use clickmine_core::types::AccountSnapshot;
use clickmine_solver::SolverClient;
use clickmine_store::Store;

use crate::miner::{Miner, MinerCommand, MinerHandle, MinerParams};
use crate::queue::ConcurrencyQueue;
use crate::resolver::EntityResolver;

struct Account {
    phone: String,
    miners: Vec<MinerHandle>,
}

pub struct MinerFleet {
    config: MinerConfig,
    store: Arc<Store>,
    solver: Arc<SolverClient>,
    bypass_gate: Arc<ConcurrencyQueue>,
    sink: Arc<EventSink>,
    accounts: Vec<Account>,
}

impl MinerFleet {
    pub fn new(
        config: MinerConfig,
        store: Arc<Store>,
        solver: Arc<SolverClient>,
        sink: Arc<EventSink>,
    ) -> Self {
        let bypass_gate = Arc::new(ConcurrencyQueue::new(config.solver.max_sessions));
        Self { config, store, solver, bypass_gate, sink, accounts: Vec::new() }
    }

    /// Spawn one miner per configured program for this account.
    /// Miners start paused.
    pub fn add_account(&mut self, phone: &str, session: Arc<dyn ChatSession>) {
        let resolver =
            Arc::new(EntityResolver::new(phone, session.clone(), self.store.clone()));
        let join_gate = Arc::new(ConcurrencyQueue::new(1));
        let miners = self
            .config
            .programs
            .iter()
            .map(|program| {
                Miner::spawn(MinerParams {
                    phone: phone.to_string(),
                    program: program.clone(),
                    session: session.clone(),
                    resolver: resolver.clone(),
                    store: self.store.clone(),
                    solver: self.solver.clone(),
                    bypass_gate: self.bypass_gate.clone(),
                    join_gate: join_gate.clone(),
                    sink: self.sink.clone(),
                    mining: self.config.mining.clone(),
                })
            })
            .collect();
        info!(phone, programs = self.config.programs.len(), "account added to fleet");
        self.accounts.push(Account { phone: phone.to_string(), miners });
    }

    /// Send `command` to every miner matching the filters; a program
    /// filter matches the bot handle or the coin label. Returns how
    /// many miners were reached.
    pub async fn control(
        &self,
        phone: Option<&str>,
        program: Option<&str>,
        command: MinerCommand,
    ) -> usize {
        let mut reached = 0;
        for account in &self.accounts {
            if phone.is_some_and(|p| p != account.phone) {
                continue;
            }
            for miner in &account.miners {
                if program.is_some_and(|p| !targets(miner, p)) {
                    continue;
                }
                if miner.send(command).await {
                    reached += 1;
                }
            }
        }
        reached
    }

    pub async fn start_all(&self) -> usize {
        info!(miners = self.miner_count(), "🚀 starting fleet");
        self.control(None, None, MinerCommand::Start).await
    }

    pub async fn stop_all(&self) -> usize {
        info!(miners = self.miner_count(), "🛑 stopping fleet");
        self.control(None, None, MinerCommand::Stop).await
    }

    /// Live per-account view, merged with all-time store totals.
    pub fn snapshot(&self) -> Result<Vec<AccountSnapshot>> {
        let mut out = Vec::with_capacity(self.accounts.len());
        for account in &self.accounts {
            let stats = self.store.statistics(&account.phone)?.unwrap_or_default();
            out.push(AccountSnapshot {
                phone: account.phone.clone(),
                miners: account.miners.iter().map(MinerHandle::snapshot).collect(),
                all_time_earned: stats.earned,
                all_time_completed_tasks: stats.completed_tasks,
                all_time_skipped_tasks: stats.skipped_tasks,
            });
        }
        Ok(out)
    }

    pub fn account_count(&self) -> usize {
        self.accounts.len()
    }

    pub fn miner_count(&self) -> usize {
        self.accounts.iter().map(|a| a.miners.len()).sum()
    }
}

fn targets(miner: &MinerHandle, program: &str) -> bool {
    miner.program.eq_ignore_ascii_case(program) || miner.coin.eq_ignore_ascii_case(program)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::FakeSession;
    use clickmine_core::types::RunState;

    fn fleet_with_account() -> (MinerFleet, Arc<Store>) {
        let store = Arc::new(Store::open_in_memory().unwrap());
        store.create_session("+100", 1, "hash", "token").unwrap();
        let mut fleet = MinerFleet::new(
            MinerConfig::default(),
            store.clone(),
            Arc::new(SolverClient::new(&MinerConfig::default().solver)),
            Arc::new(EventSink::new(64)),
        );
        fleet.add_account("+100", FakeSession::new());
        (fleet, store)
    }

    #[tokio::test]
    async fn one_miner_per_account_program_pair() {
        let (fleet, _store) = fleet_with_account();
        assert_eq!(fleet.account_count(), 1);
        assert_eq!(fleet.miner_count(), MinerConfig::default().programs.len());
    }

    #[tokio::test]
    async fn control_targets_by_handle_or_coin() {
        let (fleet, _store) = fleet_with_account();
        assert_eq!(fleet.control(Some("+100"), Some("LTC"), MinerCommand::Stop).await, 1);
        assert_eq!(
            fleet
                .control(Some("+100"), Some("@Zcash_click_bot"), MinerCommand::Stop)
                .await,
            1
        );
        assert_eq!(fleet.control(Some("+100"), None, MinerCommand::Stop).await, 3);
        assert_eq!(fleet.control(Some("+999"), None, MinerCommand::Stop).await, 0);
        assert_eq!(fleet.control(Some("+100"), Some("DOGE"), MinerCommand::Stop).await, 0);
    }

    #[tokio::test]
    async fn snapshot_merges_lifetime_statistics() {
        let (fleet, store) = fleet_with_account();
        store.increment_earned("+100", 1.5).unwrap();
        store.increment_completed("+100").unwrap();

        let accounts = fleet.snapshot().unwrap();
        assert_eq!(accounts.len(), 1);
        let account = &accounts[0];
        assert_eq!(account.phone, "+100");
        assert_eq!(account.miners.len(), 3);
        assert_eq!(account.all_time_earned, 1.5);
        assert_eq!(account.all_time_completed_tasks, 1);
        assert!(account.miners.iter().all(|m| m.state == RunState::Paused));
    }
}
