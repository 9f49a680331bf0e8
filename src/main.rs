//! Flash Arbitrage Engine - Main Entry Point
//!
//! `run` starts the scan, validate and execute pipeline; `worker` runs one
//! supervised execution worker; `reset-breaker` asks a running orchestrator
//! to reset its circuit breaker.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use flash_arb_engine::{
    arbitrage::{OpportunityDetector, PriceQuoter},
    config::ConfigError,
    errors::{CircuitBreaker, ErrorRecovery, RecoveryAction},
    execution::{ExecutionDispatcher, ExecutionEngine, FileApprovalGate, Wallet},
    network::{
        ChainClient, EndpointProbe, HttpPriceFeed, JsonRpcProbe, PriceBook, PriceFeed, RpcChainClient, RpcManager,
        run_health_probe,
    },
    orchestrator::{
        IpcDir, PerformanceTracker, RestartPolicy, RoutingRules, StrategyRouter, Supervisor, TaskSupervisor,
        TokioLauncher, TracingAlertSink, WorkerRuntime,
    },
    pools::OnChainPoolSource,
    queue::{MemoryQueue, WorkQueue},
    storage::AuditLog,
    utils,
    validation::{HealthMonitor, ValidationEngine},
    *,
};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

const PRICE_REFRESH_SECS: u64 = 30;
const SUMMARY_INTERVAL_SECS: u64 = 60;

#[derive(Parser)]
#[command(name = "flash-arb-engine", version, about = "Triangular flash-loan arbitrage engine")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Scan, validate and execute (default)
    Run,
    /// Run one supervised execution worker
    Worker {
        #[arg(long)]
        name: String,
    },
    /// Ask the running orchestrator to reset its circuit breaker
    ResetBreaker,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenv::dotenv().ok();
    let cli = Cli::parse();

    let config = match Config::load() {
        Ok(config) => Arc::new(config),
        Err(e) => {
            eprintln!("❌ {}", e);
            return ExitCode::from(2);
        }
    };

    let result = match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_engine(config).await,
        Commands::Worker { name } => run_worker(config, &name).await,
        Commands::ResetBreaker => request_reset(&config),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("❌ {:#}", e);
            eprintln!("❌ {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn request_reset(config: &Config) -> Result<()> {
    let ipc = IpcDir::new(&config.orchestrator.ipc_dir)?;
    let marker = ipc.request_breaker_reset()?;
    println!("🔓 Breaker reset requested ({})", marker.display());
    Ok(())
}

fn load_wallets(config: &Config) -> Result<Vec<Wallet>, ConfigError> {
    config.wallet_keys.iter().map(Wallet::from_key).collect()
}

fn price_feed(config: &Config) -> Result<Option<Arc<dyn PriceFeed>>> {
    Ok(match &config.detector.price_feed_url {
        Some(url) => Some(Arc::new(HttpPriceFeed::new(url.clone())?) as Arc<dyn PriceFeed>),
        None => None,
    })
}

/// Chain access, prices and system health, shared by both process kinds.
struct Core {
    manager: Arc<RpcManager>,
    chain: Arc<dyn ChainClient>,
    prices: PriceBook,
    feed: Option<Arc<dyn PriceFeed>>,
    health: Arc<HealthMonitor>,
    audit: Arc<AuditLog>,
    breaker: Arc<CircuitBreaker>,
}

impl Core {
    fn build(config: &Config) -> Result<Self> {
        let manager = Arc::new(RpcManager::new(&config.chains)?);
        let chain: Arc<dyn ChainClient> = Arc::new(RpcChainClient::new(manager.clone(), config.chain.clone()));
        let prices = PriceBook::new(&config.tokens);
        let feed = price_feed(config)?;
        let health = Arc::new(HealthMonitor::new(
            chain.clone(),
            config.flash_loan_contract,
            config.execution.min_contract_balance_eth,
            prices.clone(),
            feed.clone(),
            Duration::from_secs(config.execution.health_ttl_secs),
        ));
        Ok(Self {
            manager,
            chain,
            prices,
            feed,
            health,
            audit: Arc::new(AuditLog::new(&config.output_dir)?),
            breaker: Arc::new(CircuitBreaker::new(config.orchestrator.restart_breaker_threshold)),
        })
    }

    fn execution_engine(&self, config: &Arc<Config>) -> Result<ExecutionEngine> {
        let approvals = Arc::new(FileApprovalGate::new(&config.execution.approval_dir)?);
        Ok(ExecutionEngine::new(
            config.clone(),
            self.chain.clone(),
            self.health.clone(),
            self.prices.clone(),
            approvals,
            self.breaker.clone(),
        ))
    }
}

async fn run_engine(config: Arc<Config>) -> Result<()> {
    let _logging_guard = utils::setup_logging(&config.output_dir, "engine.log")?;
    utils::setup_output_directories(&config.output_dir)?;

    let chain_config = config.active_chain();
    info!("⚡ Flash Arbitrage Engine v{}", env!("CARGO_PKG_VERSION"));
    info!("📋 Configuration:");
    info!("   Chain: {} (id {})", chain_config.name, chain_config.chain_id);
    info!("   RPC endpoints: {}", chain_config.rpc_urls.len());
    info!("   Flash loan contract: {}", config.flash_loan_contract);
    info!("   Triangles: {} across {} DEXs", config.triangles.len(), config.dexes.len());
    info!("   Min spread: {} bps", config.thresholds.min_spread_bps);
    info!("   Min ROI after gas: {}%", config.thresholds.min_roi_after_gas_pct);
    info!("   Wallets: {}", config.wallet_keys.len());
    info!("   Trade Execution: {}", config.execution.enable_trade_execution);
    if config.execution.enable_trade_execution {
        info!("   Max Gas Price: {} gwei", config.execution.max_gas_price_gwei);
        info!("   Rotation: {}", String::from(config.execution.rotation));
    } else {
        info!("   ⚠️  DRY RUN - validated trades are logged, never submitted");
    }

    let core = Core::build(&config)?;
    let wallets = load_wallets(&config)?;

    let candidates: Arc<dyn WorkQueue> = Arc::new(MemoryQueue::new("candidates"));
    let validated: Arc<dyn WorkQueue> = Arc::new(MemoryQueue::new("validated"));
    let tracker = Arc::new(PerformanceTracker::new());

    let source = Arc::new(OnChainPoolSource::new(core.chain.clone(), config.tokens.clone()));
    let quoter = Arc::new(PriceQuoter::new(source, &config));
    let detector = Arc::new(OpportunityDetector::new(
        config.clone(),
        quoter,
        core.prices.clone(),
        core.chain.clone(),
        candidates.clone(),
    ));
    let validator = Arc::new(ValidationEngine::new(
        config.thresholds.clone(),
        core.health.clone(),
        candidates,
        validated.clone(),
        core.audit.clone(),
        tracker.clone(),
    ));

    let recovery = Arc::new(ErrorRecovery::new());
    let cancel = CancellationToken::new();
    let mut tasks = TaskSupervisor::new(cancel.clone(), recovery.clone());
    let restart = RestartPolicy::OnFailure {
        max_restarts: config.orchestrator.max_restarts,
        backoff: Duration::from_secs(2),
    };

    let probe: Arc<dyn EndpointProbe> = Arc::new(JsonRpcProbe::new(Duration::from_millis(config.rpc.probe_timeout_ms))?);
    {
        let manager = core.manager.clone();
        let interval = Duration::from_secs(config.rpc.probe_interval_secs.max(1));
        tasks.spawn("rpc-probe", restart, move |cancel| {
            let manager = manager.clone();
            let probe = probe.clone();
            async move {
                run_health_probe(manager, probe, interval, cancel).await;
                Ok::<(), EngineError>(())
            }
        });
    }

    if let Some(feed) = core.feed.clone() {
        let prices = core.prices.clone();
        tasks.spawn("price-feed", restart, move |cancel| {
            let prices = prices.clone();
            let feed = feed.clone();
            async move {
                let mut ticker = tokio::time::interval(Duration::from_secs(PRICE_REFRESH_SECS));
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => return Ok::<(), EngineError>(()),
                        _ = ticker.tick() => { prices.refresh(feed.as_ref()).await; }
                    }
                }
            }
        });
    }

    tasks.spawn("detector", restart, move |cancel| detector.clone().run(cancel));
    tasks.spawn("validator", restart, move |cancel| validator.clone().run(cancel));

    let (results_tx, results_rx) = mpsc::channel(64);
    {
        let tracker = tracker.clone();
        let audit = core.audit.clone();
        let breaker = core.breaker.clone();
        tasks.spawn_once("tracker", move |cancel| {
            tracker.run(results_rx, audit, breaker, Duration::from_secs(SUMMARY_INTERVAL_SECS), cancel)
        });
    }

    if config.orchestrator.workers.is_empty() {
        info!("🚀 Executing in-process with {} wallet slots", wallets.len());
        let engine = Arc::new(core.execution_engine(&config)?);
        let dispatcher = ExecutionDispatcher::new(engine, validated, config.execution.rotation, results_tx.clone());
        tasks.spawn_once("dispatcher", move |cancel| dispatcher.run(wallets, cancel));
    } else {
        info!("🚀 Routing to {} worker processes", config.orchestrator.workers.len());
        let supervisor = Arc::new(Supervisor::new(
            &config.orchestrator,
            Arc::new(TokioLauncher),
            IpcDir::new(&config.orchestrator.ipc_dir)?,
            core.breaker.clone(),
            Arc::new(TracingAlertSink),
        ));
        let router = Arc::new(StrategyRouter::new(
            RoutingRules::from_settings(&config.orchestrator),
            validated,
            supervisor.clone(),
            core.breaker.clone(),
        ));
        let monitor_interval = Duration::from_secs(config.orchestrator.monitor_interval_secs.max(1));
        let route_interval = Duration::from_millis(config.orchestrator.route_interval_ms.max(10));
        tasks.spawn_once("supervisor", move |cancel| supervisor.run(monitor_interval, cancel));
        tasks.spawn("router", restart, move |cancel| router.clone().run(route_interval, cancel));
    }

    info!("\n🚀 Engine running, Ctrl+C to stop\n");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("\n📛 Received shutdown signal (Ctrl+C)...");
                break;
            }
            finished = tasks.join_next() => match finished {
                Some((name, Ok(()))) => info!("✓ Task {} finished", name),
                Some((name, Err(e))) => {
                    if let RecoveryAction::Shutdown { reason } = e.recovery() {
                        error!("🛑 Task {} cannot continue: {}", name, reason);
                        break;
                    }
                    warn!("⚠️ Task {} gave up: {}", name, e);
                }
                None => break,
            }
        }
    }

    drop(results_tx);
    tasks.shutdown().await;
    core.manager.close().await;

    let errors = recovery.snapshot().await;
    if !errors.is_empty() {
        info!("Error counts by class: {:?}", errors);
    }
    info!("👋 Engine stopped");
    Ok(())
}

async fn run_worker(config: Arc<Config>, name: &str) -> Result<()> {
    let _logging_guard = utils::setup_logging(&config.output_dir, &format!("worker-{}.log", name))?;
    utils::setup_output_directories(&config.output_dir)?;

    let position = config
        .orchestrator
        .workers
        .iter()
        .position(|w| w.name == name)
        .with_context(|| format!("worker `{}` is not configured", name))?;
    let mut wallets = load_wallets(&config)?;
    if wallets.is_empty() {
        return Err(ConfigError::missing("WALLET_PRIVATE_KEYS").into());
    }
    let wallet = wallets.swap_remove(position % wallets.len());
    info!("👷 Worker {} using wallet {}", name, wallet.address());

    let core = Core::build(&config)?;
    let engine = Arc::new(core.execution_engine(&config)?);
    let runtime = WorkerRuntime::new(
        name,
        IpcDir::new(&config.orchestrator.ipc_dir)?,
        engine,
        Duration::from_secs(config.orchestrator.heartbeat_interval_secs.max(1)),
    )?
    .with_audit(core.audit.clone());

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                cancel.cancel();
            }
        });
    }

    let result = runtime.run(wallet, cancel).await;
    core.manager.close().await;
    Ok(result?)
}
