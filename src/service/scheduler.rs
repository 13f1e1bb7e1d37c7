use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::{task::JoinHandle, time::sleep};
use tokio_util::sync::CancellationToken;

use crate::indexer::{BtcIndexer, IcyIndexer, RunOutcome, SwapIndexer};

use super::{PayoutProcessor, SettlementEngine};

/// A periodic unit of work. Failures are logged by the job itself; the loop
/// keeps ticking.
#[async_trait]
pub trait Job: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    async fn tick(&self);
}

pub fn spawn_job(job: Arc<dyn Job>, interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(run(job, interval, cancel))
}

async fn run(job: Arc<dyn Job>, interval: Duration, stop_signal: CancellationToken) {
    loop {
        tokio::select! {
            _ = job.tick() => {}
            _ = stop_signal.cancelled() => {
                info!("Job interrupted by shutdown: job={}", job.name());
                break;
            }
        }

        tokio::select! {
            _ = sleep(interval) => {
                continue;
            }
            _ = stop_signal.cancelled() => {
                info!("Gracefully shutting down job: job={}", job.name());
                break;
            }
        };
    }
}

fn log_index_outcome(name: &str, result: Result<RunOutcome, crate::error::IndexError>) {
    match result {
        Ok(RunOutcome::Completed(inserted)) => {
            debug!("Indexing cycle done: indexer={} inserted={}", name, inserted)
        }
        Ok(RunOutcome::Skipped) => debug!("Indexing cycle skipped: indexer={}", name),
        Err(err) => error!("Indexing cycle failed: indexer={} error={}", name, err),
    }
}

#[async_trait]
impl Job for BtcIndexer {
    fn name(&self) -> &'static str {
        "btc_indexer"
    }

    async fn tick(&self) {
        log_index_outcome(self.name(), self.run_once().await);
    }
}

#[async_trait]
impl Job for IcyIndexer {
    fn name(&self) -> &'static str {
        "icy_indexer"
    }

    async fn tick(&self) {
        log_index_outcome(self.name(), self.run_once().await);
    }
}

#[async_trait]
impl Job for SwapIndexer {
    fn name(&self) -> &'static str {
        "swap_indexer"
    }

    async fn tick(&self) {
        log_index_outcome(self.name(), self.run_once().await);
    }
}

#[async_trait]
impl Job for SettlementEngine {
    fn name(&self) -> &'static str {
        "settlement"
    }

    async fn tick(&self) {
        if let Err(err) = self.process_swap_requests().await {
            error!("Settlement cycle failed: error={}", err);
        }
    }
}

#[async_trait]
impl Job for PayoutProcessor {
    fn name(&self) -> &'static str {
        "payout"
    }

    async fn tick(&self) {
        if let Err(err) = self.process_pending_btc_transactions().await {
            error!("Payout cycle failed: error={}", err);
        }
    }
}
