#[macro_use]
extern crate log;

use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

mod amount;
mod btc;
mod config;
mod db;
mod error;
mod evm;
mod fee;
mod indexer;
mod oracle;
mod service;
#[cfg(test)]
mod test_utils;
mod utils;

use btc::{bitcoind::BitcoindPaymentSender, BtcExplorer, PaymentSender, ResilientExplorer};
use db::Store;
use evm::{ContractClient, EvmJsonRpcClient};
use oracle::{HttpPriceOracle, PriceOracle};
use service::scheduler::spawn_job;

/// ICY <-> BTC bridge reconciliation service
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// path to config file
    #[arg(short, long, default_value_t = String::from("config.toml"))]
    config: String,

    #[command(subcommand)]
    subcommand: Option<Subcommand>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let args = Args::parse();
    info!("Starting {}", crate::get_app_info!());

    match args.subcommand {
        None => {
            let cfg = config::read_config(&args.config)?;
            run_app(cfg).await
        }
        Some(subcmd) => subcmd.run(&args.config).await,
    }
}

#[derive(Debug, Parser)]
struct IndexCmd {
    /// index into memory instead of the database and only report counts
    #[arg(long)]
    dry_run: bool,
}

#[derive(Debug, Parser)]
struct StaleClaimsCmd {
    /// claims older than this many seconds are reported
    #[arg(long, default_value_t = 600)]
    max_age_secs: i64,
}

#[derive(Debug, Parser)]
enum Subcommand {
    #[command(about = "Apply database migrations")]
    Migrate,

    #[command(about = "Cleans all data from the bridge db")]
    ResetDB,

    #[command(about = "Run one BTC indexing cycle")]
    IndexBtc(IndexCmd),

    #[command(about = "Run one ICY transfer indexing cycle")]
    IndexIcy(IndexCmd),

    #[command(about = "Run one swap event indexing cycle")]
    IndexSwaps(IndexCmd),

    #[command(about = "Run one settlement cycle over pending swap requests")]
    Settle,

    #[command(about = "Run one payout cycle over pending BTC transactions")]
    Payout,

    #[command(about = "Probe the explorer endpoints and print their health")]
    Endpoints,

    #[command(about = "List claimed requests that were never finalized")]
    StaleClaims(StaleClaimsCmd),
}

impl Subcommand {
    async fn run(&self, cfg_path: &str) -> anyhow::Result<()> {
        let cfg = config::read_config(cfg_path)?;
        match self {
            Subcommand::Migrate => migrate(cfg).await,
            Subcommand::ResetDB => reset_db(cfg).await,
            Subcommand::IndexBtc(cmd) => index_btc(cfg, cmd).await,
            Subcommand::IndexIcy(cmd) => index_icy(cfg, cmd).await,
            Subcommand::IndexSwaps(cmd) => index_swaps(cfg, cmd).await,
            Subcommand::Settle => settle(cfg).await,
            Subcommand::Payout => payout(cfg).await,
            Subcommand::Endpoints => endpoints(cfg).await,
            Subcommand::StaleClaims(cmd) => stale_claims(cfg, cmd).await,
        }
    }
}

async fn open_store(cfg: &config::Config) -> anyhow::Result<Arc<dyn Store>> {
    let repo: db::Repo = db::open_postgres_db(cfg.db.clone()).await?;
    Ok(Arc::new(repo))
}

async fn open_index_store(cfg: &config::Config, dry_run: bool) -> anyhow::Result<Arc<dyn Store>> {
    if dry_run {
        info!("Dry run: indexing into memory");
        return Ok(Arc::new(db::MemoryStore::new()));
    }
    open_store(cfg).await
}

fn build_explorer(cfg: &config::Config) -> anyhow::Result<Arc<ResilientExplorer>> {
    let explorer = ResilientExplorer::new(&cfg.btc.explorer.explorer_config())?;
    Ok(Arc::new(explorer))
}

fn build_contract(cfg: &config::Config) -> anyhow::Result<Arc<dyn ContractClient>> {
    Ok(Arc::new(EvmJsonRpcClient::new(&cfg.evm)?))
}

async fn run_app(cfg: config::Config) -> anyhow::Result<()> {
    let deadline = cfg.scheduler.cycle_deadline();
    let fee = cfg.fee.fee_config()?;

    let store = open_store(&cfg).await?;
    let explorer: Arc<dyn BtcExplorer> = build_explorer(&cfg)?;
    let contract = build_contract(&cfg)?;
    let oracle: Arc<dyn PriceOracle> = Arc::new(HttpPriceOracle::new(&cfg.oracle)?);
    let sender: Arc<dyn PaymentSender> = Arc::new(BitcoindPaymentSender::new(&cfg.btc)?);

    let btc_indexer =
        indexer::BtcIndexer::new(&cfg.btc, deadline, store.clone(), explorer.clone());
    let icy_indexer =
        indexer::IcyIndexer::new(&cfg.evm, deadline, store.clone(), contract.clone());
    let swap_indexer =
        indexer::SwapIndexer::new(&cfg.evm, fee, deadline, store.clone(), contract.clone());
    let settlement =
        service::SettlementEngine::new(&cfg.btc, fee, store.clone(), contract.clone(), oracle);
    let payout = service::PayoutProcessor::new(&cfg.btc, store.clone(), explorer, sender);

    let cancel = CancellationToken::new();
    let sch = &cfg.scheduler;
    let handles = vec![
        spawn_job(Arc::new(btc_indexer), Duration::from_secs(sch.btc_index_secs), cancel.clone()),
        spawn_job(Arc::new(icy_indexer), Duration::from_secs(sch.icy_index_secs), cancel.clone()),
        spawn_job(Arc::new(swap_indexer), Duration::from_secs(sch.swap_index_secs), cancel.clone()),
        spawn_job(Arc::new(settlement), Duration::from_secs(sch.settlement_secs), cancel.clone()),
        spawn_job(Arc::new(payout), Duration::from_secs(sch.payout_secs), cancel.clone()),
    ];

    tokio::signal::ctrl_c().await?;
    // signal jobs to stop running
    cancel.cancel();

    for handle in handles {
        handle.await?;
    }

    log::info!("Application successfully shut down");

    Ok(())
}

async fn migrate(mut cfg: config::Config) -> anyhow::Result<()> {
    cfg.db.automigrate = false;
    let repo: db::Repo = db::open_postgres_db(cfg.db).await?;
    repo.migrate().await?;
    info!("Migrations applied");
    Ok(())
}

async fn reset_db(mut cfg: config::Config) -> anyhow::Result<()> {
    cfg.db.automigrate = false;
    let repo: db::Repo = db::open_postgres_db(cfg.db).await?;
    repo.reset_schema().await?;
    info!("Database schema recreated");
    Ok(())
}

async fn index_btc(cfg: config::Config, cmd: &IndexCmd) -> anyhow::Result<()> {
    let store = open_index_store(&cfg, cmd.dry_run).await?;
    let explorer: Arc<dyn BtcExplorer> = build_explorer(&cfg)?;
    let indexer =
        indexer::BtcIndexer::new(&cfg.btc, cfg.scheduler.cycle_deadline(), store, explorer);

    let outcome = indexer.run_once().await?;
    println!("btc indexer: {:?}", outcome);
    Ok(())
}

async fn index_icy(cfg: config::Config, cmd: &IndexCmd) -> anyhow::Result<()> {
    let store = open_index_store(&cfg, cmd.dry_run).await?;
    let contract = build_contract(&cfg)?;
    let indexer =
        indexer::IcyIndexer::new(&cfg.evm, cfg.scheduler.cycle_deadline(), store, contract);

    let outcome = indexer.run_once().await?;
    println!("icy indexer: {:?}", outcome);
    Ok(())
}

async fn index_swaps(cfg: config::Config, cmd: &IndexCmd) -> anyhow::Result<()> {
    let fee = cfg.fee.fee_config()?;
    let store = open_index_store(&cfg, cmd.dry_run).await?;
    let contract = build_contract(&cfg)?;
    let indexer = indexer::SwapIndexer::new(
        &cfg.evm,
        fee,
        cfg.scheduler.cycle_deadline(),
        store,
        contract,
    );

    let outcome = indexer.run_once().await?;
    println!("swap indexer: {:?}", outcome);
    Ok(())
}

async fn settle(cfg: config::Config) -> anyhow::Result<()> {
    let fee = cfg.fee.fee_config()?;
    let store = open_store(&cfg).await?;
    let contract = build_contract(&cfg)?;
    let oracle: Arc<dyn PriceOracle> = Arc::new(HttpPriceOracle::new(&cfg.oracle)?);
    let engine = service::SettlementEngine::new(&cfg.btc, fee, store, contract, oracle);

    let report = engine.process_swap_requests().await?;
    println!("settlement: {}", report);
    Ok(())
}

async fn payout(cfg: config::Config) -> anyhow::Result<()> {
    let store = open_store(&cfg).await?;
    let explorer: Arc<dyn BtcExplorer> = build_explorer(&cfg)?;
    let sender: Arc<dyn PaymentSender> = Arc::new(BitcoindPaymentSender::new(&cfg.btc)?);
    let processor = service::PayoutProcessor::new(&cfg.btc, store, explorer, sender);

    let report = processor.process_pending_btc_transactions().await?;
    println!("payout: {}", report);
    Ok(())
}

async fn endpoints(cfg: config::Config) -> anyhow::Result<()> {
    let explorer = build_explorer(&cfg)?;

    match explorer.get_balance(&cfg.btc.treasury_address).await {
        Ok(balance) => println!("treasury {} balance: {} BTC", cfg.btc.treasury_address, balance),
        Err(err) => println!("balance probe failed: {}", err),
    }

    println!(
        "{:<48} {:<10} {:>9} {:>9} {:>10}",
        "endpoint", "state", "failures", "requests", "avg"
    );
    for snap in explorer.endpoint_snapshots() {
        println!(
            "{:<48} {:<10} {:>9} {:>9} {:>10}",
            snap.url,
            snap.state.to_string(),
            snap.consecutive_failures,
            snap.request_count,
            utils::format_millis(snap.average_response_time),
        );
        if let Some(at) = snap.last_failure_time {
            println!("    last failure at {}", at.to_rfc3339());
        }
    }
    Ok(())
}

async fn stale_claims(cfg: config::Config, cmd: &StaleClaimsCmd) -> anyhow::Result<()> {
    let store = open_store(&cfg).await?;
    let cutoff = chrono::Utc::now().timestamp() - cmd.max_age_secs;

    for request in store.find_stale_swap_request_claims(cutoff).await? {
        println!(
            "swap_request icy_tx_hash={} btc_address={} claimed_at={}",
            request.icy_transaction_hash,
            request.btc_address,
            request.claimed_at.unwrap_or_default()
        );
    }
    for payout in store.find_stale_processed_btc_claims(cutoff).await? {
        println!(
            "btc_payout swap_tx_hash={} btc_address={} total={} claimed_at={}",
            payout.swap_transaction_hash,
            payout.btc_address,
            payout.total,
            payout.claimed_at.unwrap_or_default()
        );
    }
    Ok(())
}
