//! # ClickMine — Reward-Bot Mining Fleet
//!
//! Runs one miner per (account, reward program) pair, each driving a
//! scripted conversation with its bot, and serves a small control plane
//! for monitoring and start/stop.
//!
//! Usage:
//!   clickmine                            # Run the fleet (config from ~/.clickmine)
//!   clickmine --config ./clickmine.toml  # Custom config path
//!   clickmine --add-session --phone +84901234567 \
//!       --api-id 12345 --api-hash a1b2c3 --session-token XYZ
//!                                        # Register an account and exit

use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use clickmine_client::BridgeSession;
use clickmine_core::MinerConfig;
use clickmine_core::observe::EventSink;
use clickmine_engine::MinerFleet;
use clickmine_gateway::AppState;
use clickmine_solver::SolverClient;
use clickmine_store::Store;

#[derive(Parser)]
#[command(name = "clickmine", version, about = "⛏️ ClickMine — reward-bot mining fleet")]
struct Cli {
    /// Path to the TOML config file (default: ~/.clickmine/config.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Register an account in the store and exit
    #[arg(long)]
    add_session: bool,

    /// Phone number (used with --add-session)
    #[arg(long, default_value = "")]
    phone: String,

    /// Platform API id (used with --add-session)
    #[arg(long, default_value = "0")]
    api_id: i64,

    /// Platform API hash (used with --add-session)
    #[arg(long, default_value = "")]
    api_hash: String,

    /// Authorized session token for the bridge (used with --add-session)
    #[arg(long, default_value = "")]
    session_token: String,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        "debug,hyper=info,reqwest=info,rustls=info"
    } else {
        "info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)))
        .with_target(false)
        .init();

    // Load configuration
    let config = match cli.config.as_deref() {
        Some(path) => MinerConfig::load_from(Path::new(path))?,
        None => MinerConfig::load()?,
    };

    // Ensure the data directory exists
    std::fs::create_dir_all(config.data_dir())?;

    // Open database
    let store = Arc::new(Store::open(&config.db_path())?);

    // --add-session: register an account and exit
    if cli.add_session {
        println!("⛏️  ClickMine — account setup\n");

        if cli.phone.is_empty() || cli.api_hash.is_empty() || cli.session_token.is_empty() {
            anyhow::bail!(
                "--add-session needs --phone, --api-id, --api-hash and --session-token"
            );
        }

        match store.session(&cli.phone)? {
            Some(_) => {
                println!("⚠️  Account '{}' is already registered.", cli.phone);
            }
            None => {
                store.create_session(&cli.phone, cli.api_id, &cli.api_hash, &cli.session_token)?;
                println!("✅ Account registered:");
                println!("   Phone:  {}", cli.phone);
                println!("   API id: {}", cli.api_id);
            }
        }
        return Ok(());
    }

    println!("⛏️  ClickMine v{}", env!("CARGO_PKG_VERSION"));
    println!("   🌐 Control plane: http://{}:{}", config.gateway.host, config.gateway.port);
    println!("   🗄️  Database:      {}", config.db_path().display());
    println!("   🧩 Programs:      {}", config.programs.len());
    println!();

    // Event sink feeding the websocket stream and the log endpoint
    let sink = Arc::new(EventSink::new(1000));

    // Challenge solver; a missing daemon only degrades task handling,
    // so startup carries on without it.
    let solver = Arc::new(SolverClient::new(&config.solver));
    if let Err(e) = solver.create_session().await {
        tracing::warn!("challenge solver not reachable yet: {e}");
    }

    // Connect every stored account through the session bridge
    let sessions = store.sessions()?;
    if sessions.is_empty() {
        tracing::warn!("no accounts registered; add one with --add-session");
    }

    let mut fleet = MinerFleet::new(config.clone(), store.clone(), solver, sink.clone());
    for record in &sessions {
        match BridgeSession::connect(
            &config.bridge,
            &record.phone,
            record.api_id,
            &record.api_hash,
            &record.token,
        )
        .await
        {
            Ok(session) => fleet.add_account(&record.phone, Arc::new(session)),
            Err(e) => tracing::error!(phone = %record.phone, "bridge connection failed: {e}"),
        }
    }
    let fleet = Arc::new(fleet);

    fleet.start_all().await;

    // Serve the control plane until interrupted
    let state = AppState::new(config.gateway.clone(), fleet.clone(), sink);
    tokio::select! {
        result = clickmine_gateway::serve(state) => result?,
        _ = tokio::signal::ctrl_c() => {
            fleet.stop_all().await;
        }
    }

    Ok(())
}
