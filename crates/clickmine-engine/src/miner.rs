//! One miner per (account, reward program): a state machine that
//! classifies the program bot's replies and answers with the next
//! scripted action.
//!
//! A miner owns its job rotation outright. The chat session, resolver,
//! store and admission gates are shared and arrive as references at
//! construction, so the machine's full state is enumerable from its
//! fields. Handlers run one at a time: the event loop awaits each
//! handler before pulling the next inbound event, and events that
//! arrive faster than they are consumed buffer in the broadcast
//! channel (dropped with a warning once the channel lags).

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use tokio::sync::{broadcast, mpsc, watch};
use tracing::{debug, warn};

use clickmine_client::{ChatEvent, ChatSession, ClientError, ClientResult};
use clickmine_core::config::MiningConfig;
use clickmine_core::error::{MinerError, Result};
use clickmine_core::observe::{EventSink, LogLevel};
use clickmine_core::text;
use clickmine_core::types::{MinerSnapshot, MinerUpdate, PeerRef, RewardProgram, RunState};
use clickmine_solver::{Solution, SolverClient};
use clickmine_store::Store;

use crate::jobs::JobRotation;
use crate::patterns::{ReplyKind, classify};
use crate::queue::ConcurrencyQueue;
use crate::resolver::EntityResolver;

/// Command every reward bot answers with the account balance.
const BALANCE_QUERY: &str = "💰 Balance";
/// Command that opens the withdrawal dialogue.
const WITHDRAW_QUERY: &str = "💵 Withdraw";
/// Reply to the withdrawal amount prompt.
const MAX_AMOUNT: &str = "Max amount";

/// Operator commands accepted by a running miner.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MinerCommand {
    Start,
    Stop,
}

/// Everything a miner needs at construction.
pub struct MinerParams {
    pub phone: String,
    pub program: RewardProgram,
    pub session: Arc<dyn ChatSession>,
    pub resolver: Arc<EntityResolver>,
    pub store: Arc<Store>,
    pub solver: Arc<SolverClient>,
    /// Global gate in front of the anti-bot bypass service.
    pub bypass_gate: Arc<ConcurrencyQueue>,
    /// Account-wide gate in front of channel joins.
    pub join_gate: Arc<ConcurrencyQueue>,
    pub sink: Arc<EventSink>,
    pub mining: MiningConfig,
}

/// Control handle to a spawned miner task.
pub struct MinerHandle {
    pub phone: String,
    /// Handle of the reward bot this miner drives.
    pub program: String,
    pub coin: String,
    commands: mpsc::Sender<MinerCommand>,
    snapshot: watch::Receiver<MinerSnapshot>,
}

impl MinerHandle {
    pub fn snapshot(&self) -> MinerSnapshot {
        self.snapshot.borrow().clone()
    }

    /// Deliver a command; false when the miner task has exited.
    pub async fn send(&self, command: MinerCommand) -> bool {
        self.commands.send(command).await.is_ok()
    }
}

/// Outcome of one channel-join attempt.
#[derive(Debug)]
enum JoinOutcome {
    Joined,
    CapReached,
}

pub struct Miner {
    phone: String,
    program: RewardProgram,
    session: Arc<dyn ChatSession>,
    resolver: Arc<EntityResolver>,
    store: Arc<Store>,
    solver: Arc<SolverClient>,
    bypass_gate: Arc<ConcurrencyQueue>,
    join_gate: Arc<ConcurrencyQueue>,
    sink: Arc<EventSink>,
    mining: MiningConfig,

    rotation: JobRotation,
    paused: bool,
    state: RunState,
    needs_balance_check: bool,
    bot: Option<PeerRef>,
    balance: f64,
    earned: f64,
    completed_tasks: u64,
    skipped_tasks: u64,
    started_at: DateTime<Utc>,
    snapshot_tx: watch::Sender<MinerSnapshot>,
}

impl Miner {
    /// Spawn the miner's event loop and return its control handle.
    /// The miner starts paused; send [`MinerCommand::Start`] to mine.
    pub fn spawn(params: MinerParams) -> MinerHandle {
        let (commands, commands_rx) = mpsc::channel(8);
        let miner = Miner::new(params);
        let handle = MinerHandle {
            phone: miner.phone.clone(),
            program: miner.program.handle.clone(),
            coin: miner.program.coin.clone(),
            commands,
            snapshot: miner.snapshot_tx.subscribe(),
        };
        tokio::spawn(miner.run(commands_rx));
        handle
    }

    fn new(params: MinerParams) -> Self {
        let MinerParams {
            phone,
            program,
            session,
            resolver,
            store,
            solver,
            bypass_gate,
            join_gate,
            sink,
            mining,
        } = params;
        let rotation = JobRotation::new();
        let started_at = Utc::now();
        let (snapshot_tx, _) = watch::channel(MinerSnapshot {
            entity: program.handle.clone(),
            coin: program.coin.clone(),
            min_withdraw: program.min_withdraw,
            address: program.address.clone(),
            current_job: rotation.current(),
            state: RunState::Paused,
            completed_tasks: 0,
            skipped_tasks: 0,
            balance: 0.0,
            earned: 0.0,
            started_at,
        });
        Self {
            phone,
            program,
            session,
            resolver,
            store,
            solver,
            bypass_gate,
            join_gate,
            sink,
            mining,
            rotation,
            paused: true,
            state: RunState::Paused,
            needs_balance_check: false,
            bot: None,
            balance: 0.0,
            earned: 0.0,
            completed_tasks: 0,
            skipped_tasks: 0,
            started_at,
            snapshot_tx,
        }
    }

    async fn run(mut self, mut commands: mpsc::Receiver<MinerCommand>) {
        let mut events = self.session.subscribe();
        let balance_timer = tokio::time::sleep(balance_interval());
        tokio::pin!(balance_timer);

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(MinerCommand::Start) => self.start().await,
                    Some(MinerCommand::Stop) => self.stop(),
                    None => break,
                },
                () = &mut balance_timer => {
                    balance_timer
                        .as_mut()
                        .reset(tokio::time::Instant::now() + balance_interval());
                    if !self.paused {
                        self.needs_balance_check = true;
                        debug!(phone = %self.phone, coin = %self.program.coin, "balance check armed");
                    }
                }
                event = events.recv() => match event {
                    Ok(event) => self.on_event(&event).await,
                    Err(broadcast::error::RecvError::Lagged(dropped)) => {
                        warn!(
                            phone = %self.phone,
                            coin = %self.program.coin,
                            dropped,
                            "event stream lagged, messages dropped"
                        );
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    }

    async fn start(&mut self) {
        if !self.paused {
            return;
        }
        self.paused = false;
        self.state = RunState::Working;
        self.started_at = Utc::now();
        self.log(LogLevel::Info, "⛏️ miner starting");
        if let Err(e) = self.handshake().await {
            self.log(LogLevel::Error, format!("startup handshake failed: {e}"));
            self.paused = true;
            self.state = RunState::Paused;
        }
        self.publish();
    }

    fn stop(&mut self) {
        if self.paused {
            return;
        }
        self.paused = true;
        self.state = RunState::Paused;
        self.log(LogLevel::Info, "⏸️ miner paused");
        self.publish();
    }

    /// Unblock and `/start` the program bot, ask for the balance, then
    /// kick off the first job category.
    async fn handshake(&mut self) -> Result<()> {
        let bot = self.resolver.resolve(self.program.handle.as_str()).await?;
        self.bot = Some(bot);
        self.guarded("unblock bot", || self.session.unblock(&bot)).await?;
        let referral = &self.mining.referral_code;
        let referral = (!referral.is_empty()).then_some(referral.as_str());
        self.guarded("start bot", || self.session.start_bot(&bot, referral)).await?;
        self.pause_for(self.mining.action_delay_secs).await;
        self.send_text(BALANCE_QUERY).await?;
        self.begin_current_job().await
    }

    async fn on_event(&mut self, event: &ChatEvent) {
        if self.paused {
            return;
        }
        let Some(bot) = self.bot else { return };
        if event.peer.id != bot.id {
            return;
        }
        if let Err(e) = self.dispatch(event).await {
            self.log(LogLevel::Error, format!("task failed: {e}"));
            self.skip_task(event).await;
        }
    }

    async fn dispatch(&mut self, event: &ChatEvent) -> Result<()> {
        match classify(&event.text) {
            Some(ReplyKind::ConsentGate) => self.accept_terms(event).await,
            Some(ReplyKind::NoAds) => self.finish_category().await,
            Some(ReplyKind::Refusal) => self.refuse_task(event).await,
            Some(ReplyKind::InvalidTask) => self.resend_job().await,
            Some(ReplyKind::Earned) => self.collect_reward(event).await,
            Some(ReplyKind::Balance) => self.check_balance(event).await,
            Some(ReplyKind::WithdrawAddress) => self.send_withdraw_address().await,
            Some(ReplyKind::WithdrawAmount) => self.send_text(MAX_AMOUNT).await,
            Some(ReplyKind::WithdrawConfirm) => self.confirm_withdraw(event).await,
            None => self.run_task(event).await,
        }
    }

    /// Visit the gate message's legal links through the bypass service
    /// so the platform sees them opened, then acknowledge and resume.
    async fn accept_terms(&mut self, event: &ChatEvent) -> Result<()> {
        self.log(LogLevel::Info, "consent gate hit, acknowledging terms");
        if let Some(markup) = &event.markup {
            for button in markup.buttons() {
                if let Some(url) = &button.url {
                    self.fetch_via_bypass(url).await?;
                }
            }
        }
        self.click_labeled(event, &["agree", "accept"]).await?;
        self.pause_for(self.mining.action_delay_secs).await;
        self.begin_current_job().await
    }

    /// End of the current category: rotate, run the deferred balance
    /// check when a full cycle just completed, cool down, resume.
    async fn finish_category(&mut self) -> Result<()> {
        let wrapped = self.rotation.advance();
        self.log(LogLevel::Info, "category exhausted, rotating");
        if wrapped && self.needs_balance_check {
            self.needs_balance_check = false;
            self.send_text(BALANCE_QUERY).await?;
        }
        self.state = RunState::Sleeping;
        self.publish();
        self.pause_for(self.mining.cooldown_secs).await;
        self.begin_current_job().await
    }

    async fn refuse_task(&mut self, event: &ChatEvent) -> Result<()> {
        self.log(LogLevel::Warn, format!("bot refused: {}", event.text));
        self.click_labeled(event, &["skip"]).await?;
        Ok(())
    }

    /// The platform lost track of the task we were sent; asking for
    /// the category again is idempotent.
    async fn resend_job(&mut self) -> Result<()> {
        self.log(LogLevel::Warn, "task no longer valid, requesting a fresh one");
        self.begin_current_job().await
    }

    async fn collect_reward(&mut self, event: &ChatEvent) -> Result<()> {
        let Some(amount) = text::leading_amount(&event.text) else {
            return Ok(());
        };
        self.balance += amount;
        self.earned += amount;
        self.store.increment_earned(&self.phone, amount)?;
        self.log(LogLevel::Info, format!("💰 earned {amount} {}", self.program.coin));
        self.publish();
        Ok(())
    }

    async fn check_balance(&mut self, event: &ChatEvent) -> Result<()> {
        let Some(amount) = text::leading_amount(&event.text) else {
            return Ok(());
        };
        self.balance = amount;
        self.publish();
        if amount > self.program.min_withdraw {
            self.log(
                LogLevel::Info,
                format!("balance {amount} above {}, withdrawing", self.program.min_withdraw),
            );
            self.pause_for(self.mining.withdraw_delay_secs).await;
            self.send_text(WITHDRAW_QUERY).await?;
        }
        Ok(())
    }

    async fn send_withdraw_address(&mut self) -> Result<()> {
        if self.program.address.is_empty() {
            self.log(LogLevel::Warn, "no payout address configured, ignoring withdrawal prompt");
            return Ok(());
        }
        let address = self.program.address.clone();
        self.send_text(&address).await
    }

    async fn confirm_withdraw(&mut self, event: &ChatEvent) -> Result<()> {
        if !self.click_labeled(event, &["confirm", "yes"]).await? {
            self.send_text("Confirm").await?;
        }
        self.sink.audit(
            &self.phone,
            &self.program.coin,
            format!("withdrawal of {} {} confirmed", self.balance, self.program.coin),
        );
        Ok(())
    }

    /// Fallback for replies no pattern claims: the task message
    /// itself. The first control tells us which workflow to run.
    async fn run_task(&mut self, event: &ChatEvent) -> Result<()> {
        let Some(button) = event.markup.as_ref().and_then(|m| m.first_button()) else {
            return Ok(());
        };
        let label = button.label.to_lowercase();
        let Some(url) = button.url.clone() else {
            return Ok(());
        };

        let done = if label.contains("website") {
            self.visit_site(&url).await?
        } else if label.contains("bot") {
            self.message_bot(&url).await?
        } else if label.contains("channel") || label.contains("group") {
            self.join_chat(event, &url).await?
        } else {
            debug!(phone = %self.phone, label = %button.label, "unrecognized control, ignoring");
            return Ok(());
        };
        if done {
            self.task_completed();
        }
        Ok(())
    }

    /// Solve the page through the bypass service, wait out the
    /// embedded countdown, then submit the reward claim with the
    /// user agent the solver browsed with.
    async fn visit_site(&mut self, url: &str) -> Result<bool> {
        self.log(LogLevel::Info, format!("🌐 visiting {url}"));
        let solution = self.fetch_via_bypass(url).await?;
        let Some((claim_url, wait_secs)) = text::claim_request(&solution.response, &solution.url)
        else {
            self.log(LogLevel::Warn, "page carries no reward claim, moving on");
            return Ok(false);
        };
        self.state = RunState::Sleeping;
        self.publish();
        self.pause_for(wait_secs).await;
        self.state = RunState::Working;
        self.publish();
        self.solver.direct_get(&claim_url, &solution.user_agent).await?;
        self.log(LogLevel::Info, "✅ reward claim submitted");
        Ok(true)
    }

    /// Start the advertised bot, relay its first reply back to the
    /// program bot as proof of contact, then drop the contact.
    async fn message_bot(&mut self, url: &str) -> Result<bool> {
        let Some((handle, referral)) = text::bot_start_link(url) else {
            return Err(MinerError::Resolution(format!("no startable bot in {url}")));
        };
        self.log(LogLevel::Info, format!("🤖 messaging {handle}"));
        let target = self.resolver.resolve(handle.as_str()).await?;
        let timeout = Duration::from_secs(self.mining.bot_reply_timeout_secs);
        self.guarded("unblock bot", || self.session.unblock(&target)).await?;
        self.guarded("start bot", || self.session.start_bot(&target, referral.as_deref()))
            .await?;
        let reply = self
            .guarded("await bot reply", || self.session.wait_for_message(&target, timeout))
            .await?;
        self.send_text(&reply.text).await?;
        self.guarded("block bot", || self.session.block(&target)).await?;
        Ok(true)
    }

    async fn join_chat(&mut self, event: &ChatEvent, url: &str) -> Result<bool> {
        let Some(target) = text::chat_target(url) else {
            return Err(MinerError::Resolution(format!("no joinable target in {url}")));
        };
        let token = self.join_gate.issue();
        self.join_gate.wait(token).await;
        let outcome = self.join_admitted(event, &target).await;
        self.join_gate.end(token).await?;
        match outcome? {
            JoinOutcome::Joined => Ok(true),
            JoinOutcome::CapReached => {
                self.log(LogLevel::Warn, "hourly join cap reached, switching category");
                self.finish_category().await?;
                Ok(false)
            }
        }
    }

    /// Runs while holding an admission slot of the account's join
    /// gate. On a non-flood join failure, memberships older than the
    /// retention window are dropped and the join retried once.
    async fn join_admitted(&mut self, event: &ChatEvent, target: &str) -> Result<JoinOutcome> {
        let joins = self.store.join_count(&self.phone)?;
        if joins >= i64::from(self.mining.join_cap_per_hour) {
            return Ok(JoinOutcome::CapReached);
        }
        self.log(LogLevel::Info, format!("📢 joining {target}"));
        let peer = self.resolver.resolve(target).await?;
        if let Err(e) = self.join_once(&peer).await {
            self.log(
                LogLevel::Warn,
                format!("join failed ({e}), freeing stale memberships and retrying"),
            );
            self.leave_stale_channels().await?;
            self.join_once(&peer).await?;
        }
        self.store.record_join(&self.phone)?;
        self.click_labeled(event, &["joined"]).await?;
        Ok(JoinOutcome::Joined)
    }

    async fn join_once(&self, peer: &PeerRef) -> Result<()> {
        self.guarded("join channel", || self.session.join_channel(peer)).await
    }

    async fn leave_stale_channels(&mut self) -> Result<()> {
        let cutoff = Utc::now() - chrono::Duration::hours(i64::from(self.mining.join_retention_hours));
        let memberships = self
            .guarded("list memberships", || self.session.channel_memberships())
            .await?;
        for membership in memberships {
            if membership.joined_at < cutoff {
                let peer = membership.peer;
                self.guarded("leave channel", || self.session.leave_channel(&peer)).await?;
            }
        }
        Ok(())
    }

    async fn begin_current_job(&mut self) -> Result<()> {
        let Some(job) = self.rotation.current() else {
            self.log(LogLevel::Warn, "no job categories left to run");
            return Ok(());
        };
        self.state = RunState::Working;
        self.send_text(job.command()).await?;
        self.publish();
        Ok(())
    }

    /// Retry `op` through provider flood waits. Unbounded on purpose:
    /// the platform, not us, decides how long the pause lasts. Every
    /// other error surfaces to the caller.
    async fn guarded<T, F, Fut>(&self, what: &str, mut op: F) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ClientResult<T>>,
    {
        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(ClientError::FloodWait { seconds }) => self.flood_pause(what, seconds).await,
                Err(e) => return Err(MinerError::Client(e.to_string())),
            }
        }
    }

    async fn flood_pause(&self, what: &str, seconds: u64) {
        warn!(
            phone = %self.phone,
            coin = %self.program.coin,
            seconds,
            what,
            "flood wait, backing off"
        );
        self.sink.audit(
            &self.phone,
            &self.program.coin,
            format!("flood wait {seconds}s on {what}"),
        );
        tokio::time::sleep(Duration::from_secs(seconds)).await;
    }

    async fn send_text(&self, text: &str) -> Result<()> {
        let bot = self.bot_peer()?;
        self.guarded("send message", || self.session.send_message(&bot, text)).await
    }

    /// Click the first button whose label matches any needle; true if
    /// a button was clicked.
    async fn click_labeled(&self, event: &ChatEvent, needles: &[&str]) -> Result<bool> {
        let Some(markup) = &event.markup else { return Ok(false) };
        let Some(button) = needles.iter().find_map(|n| markup.find_button(n)) else {
            return Ok(false);
        };
        let Some(data) = button.callback_data.clone() else { return Ok(false) };
        let bot = self.bot_peer()?;
        self.guarded("click button", || {
            self.session.click_button(&bot, event.message_id, &data)
        })
        .await?;
        Ok(true)
    }

    /// Fetch a URL through the bypass service, holding one slot of
    /// the global bypass gate for the duration of the call.
    async fn fetch_via_bypass(&self, url: &str) -> Result<Solution> {
        let token = self.bypass_gate.issue();
        self.bypass_gate.wait(token).await;
        let result = self.solver.get(url).await;
        self.bypass_gate.end(token).await?;
        result
    }

    fn task_completed(&mut self) {
        self.completed_tasks += 1;
        if let Err(e) = self.store.increment_completed(&self.phone) {
            self.log(LogLevel::Error, format!("failed to record completed task: {e}"));
        }
        self.publish();
    }

    async fn skip_task(&mut self, event: &ChatEvent) {
        if let Err(e) = self.click_labeled(event, &["skip"]).await {
            self.log(LogLevel::Warn, format!("could not skip task: {e}"));
        }
        self.skipped_tasks += 1;
        if let Err(e) = self.store.increment_skipped(&self.phone) {
            self.log(LogLevel::Error, format!("failed to record skipped task: {e}"));
        }
        self.publish();
    }

    fn bot_peer(&self) -> Result<PeerRef> {
        self.bot
            .ok_or_else(|| MinerError::Client("program bot not resolved yet".to_string()))
    }

    fn log(&self, level: LogLevel, message: impl Into<String>) {
        self.sink.log(level, &self.phone, &self.program.coin, message);
    }

    async fn pause_for(&self, seconds: u64) {
        if seconds > 0 {
            tokio::time::sleep(Duration::from_secs(seconds)).await;
        }
    }

    fn publish(&self) {
        let snapshot = MinerSnapshot {
            entity: self.program.handle.clone(),
            coin: self.program.coin.clone(),
            min_withdraw: self.program.min_withdraw,
            address: self.program.address.clone(),
            current_job: self.rotation.current(),
            state: self.state,
            completed_tasks: self.completed_tasks,
            skipped_tasks: self.skipped_tasks,
            balance: self.balance,
            earned: self.earned,
            started_at: self.started_at,
        };
        let _ = self.snapshot_tx.send(snapshot.clone());
        self.sink.broadcast(MinerUpdate { phone: self.phone.clone(), snapshot });
    }
}

/// Randomized so the fleet's balance checks never form a fixed,
/// detectable cadence.
fn balance_interval() -> Duration {
    Duration::from_secs(rand::thread_rng().gen_range(55 * 60..=65 * 60))
}
