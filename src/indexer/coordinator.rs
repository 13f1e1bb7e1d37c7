//! Shared plumbing of the indexers: single-flight leases, the per-cycle
//! deadline and checkpoint resolution for EVM event streams.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::IndexError;
use crate::evm::{ContractClient, ContractError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunOutcome {
    /// The cycle ran to the end and inserted this many rows.
    Completed(usize),
    /// Another run of the same indexer was in flight.
    Skipped,
}

/// Per-indexer lock that keeps an indexer from running alongside itself.
#[derive(Clone)]
pub struct SingleFlight {
    name: &'static str,
    lock: Arc<Mutex<()>>,
}

/// Held for the whole run; dropping it releases the indexer.
pub struct Lease {
    _guard: OwnedMutexGuard<()>,
}

impl SingleFlight {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn try_acquire(&self) -> Option<Lease> {
        self.lock
            .clone()
            .try_lock_owned()
            .ok()
            .map(|guard| Lease { _guard: guard })
    }
}

/// Runs `cycle` under the lease of `flight`, bounded by `deadline`.
pub async fn run_exclusive<F, Fut>(
    flight: &SingleFlight,
    deadline: Duration,
    cycle: F,
) -> Result<RunOutcome, IndexError>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<usize, IndexError>>,
{
    let Some(_lease) = flight.try_acquire() else {
        debug!("Indexer busy, skipping run: indexer={}", flight.name());
        return Ok(RunOutcome::Skipped);
    };

    match tokio::time::timeout(deadline, cycle()).await {
        Ok(result) => result.map(RunOutcome::Completed),
        Err(_) => Err(IndexError::Deadline(deadline)),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checkpoint {
    /// Block of the newest stored row, if any.
    pub last_indexed: Option<u64>,
    /// First block the next cycle has to look at.
    pub next_block: u64,
}

/// Derives where an EVM indexer resumes. `latest` is the hash and stored block
/// of the newest persisted row.
pub async fn resolve_evm_checkpoint(
    contract: &dyn ContractClient,
    latest: Option<(&str, i64)>,
    genesis_block: u64,
) -> Result<Checkpoint, IndexError> {
    let Some((hash, stored_block)) = latest else {
        return Ok(Checkpoint {
            last_indexed: None,
            next_block: genesis_block,
        });
    };

    let block = match contract.get_transaction_receipt(hash).await {
        Ok(receipt) => receipt.block_number,
        Err(ContractError::NotFound(_)) => {
            warn!(
                "Receipt of latest indexed transaction not found, using stored block: tx_hash={} block={}",
                hash, stored_block
            );
            u64::try_from(stored_block).unwrap_or_default()
        }
        Err(err) => return Err(err.into()),
    };

    Ok(Checkpoint {
        last_indexed: Some(block),
        next_block: std::cmp::max(block + 1, genesis_block),
    })
}

/// Splits `[from, to]` into inclusive windows of at most `max_range` blocks.
pub fn block_windows(from: u64, to: u64, max_range: u64) -> Vec<(u64, u64)> {
    let span = std::cmp::max(max_range, 1);
    let mut windows = Vec::new();
    let mut start = from;
    while start <= to {
        let end = std::cmp::min(start.saturating_add(span - 1), to);
        windows.push((start, end));
        if end == u64::MAX {
            break;
        }
        start = end + 1;
    }
    windows
}
