use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use crate::config;
use crate::db::{self, Store};
use crate::error::IndexError;
use crate::evm::{normalize_address, ContractClient, ContractEvent, EventData, EventKind};

use super::coordinator::{block_windows, resolve_evm_checkpoint, run_exclusive, RunOutcome, SingleFlight};

static ICY_INDEXER_ID: &str = "icy_indexer";

/// Indexes ICY token transfers in and out of the watched address.
pub struct IcyIndexer {
    store: Arc<dyn Store>,
    contract: Arc<dyn ContractClient>,
    watched_address: String,
    genesis_block: u64,
    max_block_range: u64,
    deadline: Duration,
    flight: SingleFlight,
}

impl IcyIndexer {
    pub fn new(
        evm_cfg: &config::EVMConfig,
        deadline: Duration,
        store: Arc<dyn Store>,
        contract: Arc<dyn ContractClient>,
    ) -> Self {
        Self {
            store,
            contract,
            watched_address: normalize_address(&evm_cfg.watched_address),
            genesis_block: evm_cfg.icy_genesis_block,
            max_block_range: evm_cfg.max_block_range,
            deadline,
            flight: SingleFlight::new(ICY_INDEXER_ID),
        }
    }

    pub async fn run_once(&self) -> Result<RunOutcome, IndexError> {
        run_exclusive(&self.flight, self.deadline, || self.index()).await
    }

    async fn index(&self) -> Result<usize, IndexError> {
        let latest = self.store.get_latest_icy_transaction().await?;
        let checkpoint = resolve_evm_checkpoint(
            self.contract.as_ref(),
            latest
                .as_ref()
                .map(|tx| (tx.transaction_hash.as_str(), tx.block_number)),
            self.genesis_block,
        )
        .await?;
        let head = self.contract.block_number().await?;

        let mut total = 0;
        for (from, to) in block_windows(checkpoint.next_block, head, self.max_block_range) {
            let events = self
                .contract
                .filter_events(EventKind::IcyTransfer, from, to)
                .await?;
            let records = self.to_records(events, checkpoint.last_indexed);
            if records.is_empty() {
                continue;
            }
            let inserted = self.store.insert_icy_transactions(&records).await?;
            debug!(
                "ICY window indexed: from={} to={} found={} inserted={}",
                from,
                to,
                records.len(),
                inserted
            );
            total += inserted;
        }

        info!(
            "ICY transactions indexed: from={} head={} inserted={}",
            checkpoint.next_block, head, total
        );
        Ok(total)
    }

    fn to_records(
        &self,
        mut events: Vec<ContractEvent>,
        last_indexed: Option<u64>,
    ) -> Vec<db::IcyTransaction> {
        events.sort_by_key(|e| (e.block_number, e.log_index));

        let now = chrono::Utc::now().timestamp();
        let mut seen = HashSet::new();
        let mut records = Vec::new();
        for event in events {
            if last_indexed.is_some_and(|last| event.block_number <= last) {
                continue;
            }
            let (from, to, value) = match event.data {
                EventData::Transfer { from, to, value } => (from, to, value),
                EventData::Undecodable(reason) => {
                    warn!(
                        "Skip undecodable transfer log: tx_hash={} log_index={} reason={}",
                        event.transaction_hash, event.log_index, reason
                    );
                    continue;
                }
                EventData::Swap { .. } => continue,
            };

            let (direction, counterparty) = if to == self.watched_address {
                (db::DIRECTION_IN, from)
            } else if from == self.watched_address {
                (db::DIRECTION_OUT, to)
            } else {
                continue;
            };

            // one row per transaction, the first matching log wins
            if !seen.insert(event.transaction_hash.clone()) {
                continue;
            }
            records.push(db::IcyTransaction {
                transaction_hash: event.transaction_hash,
                block_number: event.block_number as i64,
                log_index: event.log_index as i64,
                direction: direction.to_owned(),
                counterparty_address: counterparty,
                amount: value.to_string(),
                created_at: now,
                ..Default::default()
            });
        }
        records
    }
}
