use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use alloy_primitives::U256;

use crate::amount::{Amount, BTC_DECIMALS};
use crate::config;
use crate::db::{self, Store};
use crate::error::IndexError;
use crate::evm::{ContractClient, ContractEvent, EventData, EventKind};
use crate::fee::{self, FeeConfig, FeeError};

use super::coordinator::{block_windows, resolve_evm_checkpoint, run_exclusive, RunOutcome, SingleFlight};

static SWAP_INDEXER_ID: &str = "swap_indexer";

/// Indexes `Swap` events of the swap contract and queues their BTC payouts.
pub struct SwapIndexer {
    store: Arc<dyn Store>,
    contract: Arc<dyn ContractClient>,
    fee: FeeConfig,
    genesis_block: u64,
    max_block_range: u64,
    deadline: Duration,
    flight: SingleFlight,
}

struct DecodedSwap {
    event: ContractEvent,
    icy_amount: U256,
    btc_address: String,
    btc_amount: U256,
}

impl SwapIndexer {
    pub fn new(
        evm_cfg: &config::EVMConfig,
        fee: FeeConfig,
        deadline: Duration,
        store: Arc<dyn Store>,
        contract: Arc<dyn ContractClient>,
    ) -> Self {
        Self {
            store,
            contract,
            fee,
            genesis_block: evm_cfg.swap_genesis_block,
            max_block_range: evm_cfg.max_block_range,
            deadline,
            flight: SingleFlight::new(SWAP_INDEXER_ID),
        }
    }

    pub async fn run_once(&self) -> Result<RunOutcome, IndexError> {
        run_exclusive(&self.flight, self.deadline, || self.index()).await
    }

    async fn index(&self) -> Result<usize, IndexError> {
        let latest = self.store.get_latest_swap_event().await?;
        let checkpoint = resolve_evm_checkpoint(
            self.contract.as_ref(),
            latest
                .as_ref()
                .map(|e| (e.transaction_hash.as_str(), e.block_number)),
            self.genesis_block,
        )
        .await?;
        let head = self.contract.block_number().await?;

        let mut total = 0;
        for (from, to) in block_windows(checkpoint.next_block, head, self.max_block_range) {
            let events = self.contract.filter_events(EventKind::Swap, from, to).await?;
            let swaps = decode_swaps(events, checkpoint.last_indexed);
            if swaps.is_empty() {
                continue;
            }

            let mut batch = Vec::with_capacity(swaps.len());
            for swap in swaps {
                let sender = self
                    .contract
                    .get_transaction_by_hash(&swap.event.transaction_hash)
                    .await?
                    .sender;
                batch.push(self.to_rows(swap, sender));
            }

            let inserted = self.store.insert_swap_events(&batch).await?;
            debug!(
                "Swap window indexed: from={} to={} found={} inserted={}",
                from,
                to,
                batch.len(),
                inserted
            );
            total += inserted;
        }

        info!(
            "Swap events indexed: from={} head={} inserted={}",
            checkpoint.next_block, head, total
        );
        Ok(total)
    }

    fn to_rows(&self, swap: DecodedSwap, sender: String) -> (db::SwapEvent, db::ProcessedBtcTransaction) {
        let now = chrono::Utc::now().timestamp();
        let hash = swap.event.transaction_hash.clone();
        let subtotal = Amount::new(swap.btc_amount, BTC_DECIMALS);

        let mut processed = db::ProcessedBtcTransaction {
            swap_transaction_hash: hash.clone(),
            btc_address: swap.btc_address.clone(),
            subtotal: subtotal.to_base_units(),
            created_at: now,
            updated_at: now,
            ..Default::default()
        };
        match fee::quote(&subtotal, &self.fee) {
            Ok(quote) => {
                processed.service_fee = quote.service_fee.to_base_units();
                processed.total = quote.total.to_base_units();
                processed.status = db::STATUS_PENDING.to_owned();
            }
            Err(err) => {
                warn!(
                    "Swap payout can't cover fee, marking failed: tx_hash={} subtotal={} error={}",
                    hash, subtotal, err
                );
                processed.service_fee = match err {
                    FeeError::FeeExceedsSubtotal { fee, .. } => fee.to_base_units(),
                    _ => "0".to_owned(),
                };
                processed.total = "0".to_owned();
                processed.status = db::STATUS_FAILED.to_owned();
            }
        }

        let event = db::SwapEvent {
            transaction_hash: hash,
            block_number: swap.event.block_number as i64,
            log_index: swap.event.log_index as i64,
            from_address: sender,
            icy_amount: swap.icy_amount.to_string(),
            btc_address: swap.btc_address,
            btc_amount: swap.btc_amount.to_string(),
            created_at: now,
            ..Default::default()
        };
        (event, processed)
    }
}

fn decode_swaps(mut events: Vec<ContractEvent>, last_indexed: Option<u64>) -> Vec<DecodedSwap> {
    events.sort_by_key(|e| (e.block_number, e.log_index));

    let mut seen = HashSet::new();
    let mut swaps = Vec::new();
    for event in events {
        if last_indexed.is_some_and(|last| event.block_number <= last) {
            continue;
        }
        let (icy_amount, btc_address, btc_amount) = match &event.data {
            EventData::Swap {
                icy_amount,
                btc_address,
                btc_amount,
            } => (*icy_amount, btc_address.clone(), *btc_amount),
            EventData::Undecodable(reason) => {
                warn!(
                    "Skip undecodable swap log: tx_hash={} log_index={} reason={}",
                    event.transaction_hash, event.log_index, reason
                );
                continue;
            }
            EventData::Transfer { .. } => continue,
        };
        if !seen.insert(event.transaction_hash.clone()) {
            continue;
        }
        swaps.push(DecodedSwap {
            event,
            icy_amount,
            btc_address,
            btc_amount,
        });
    }
    swaps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amount::FeeRate;
    use crate::db::MemoryStore;
    use crate::test_utils::MockContract;

    fn evm_config() -> config::EVMConfig {
        config::EVMConfig {
            rpc_url: "http://localhost:8545".into(),
            icy_token_address: "0x01".into(),
            swap_contract_address: "0x02".into(),
            operator_address: "0x03".into(),
            watched_address: "0x04".into(),
            max_block_range: 2000,
            icy_genesis_block: 1,
            swap_genesis_block: 1,
            timeout_ms: 1000,
        }
    }

    fn fee_config() -> FeeConfig {
        FeeConfig {
            rate: FeeRate::parse("0.01").unwrap(),
            min_fee_sats: 2000,
        }
    }

    fn swap(hash: &str, block: u64, btc_amount: u64) -> ContractEvent {
        ContractEvent {
            transaction_hash: hash.into(),
            block_number: block,
            log_index: 0,
            data: EventData::Swap {
                icy_amount: U256::from(btc_amount) * U256::from(1_000u64),
                btc_address: "tb1qdest".into(),
                btc_amount: U256::from(btc_amount),
            },
        }
    }

    fn setup() -> (Arc<MemoryStore>, Arc<MockContract>, SwapIndexer) {
        let store = Arc::new(MemoryStore::new());
        let contract = Arc::new(MockContract::new(50));
        let idx = SwapIndexer::new(
            &evm_config(),
            fee_config(),
            Duration::from_secs(5),
            store.clone(),
            contract.clone(),
        );
        (store, contract, idx)
    }

    #[tokio::test]
    async fn stores_event_with_sender_and_pending_payout() {
        let (store, contract, idx) = setup();
        contract.push_event(EventKind::Swap, swap("0xs1", 10, 100_000));
        contract.set_sender("0xs1", "0x00000000000000000000000000000000000000aa");

        assert_eq!(idx.run_once().await.unwrap(), RunOutcome::Completed(1));

        let events = store.swap_events();
        assert_eq!(events[0].from_address, "0x00000000000000000000000000000000000000aa");
        assert_eq!(events[0].btc_amount, "100000");

        let payouts = store.processed_btc_transactions();
        assert_eq!(payouts.len(), 1);
        assert_eq!(payouts[0].swap_transaction_hash, "0xs1");
        assert_eq!(payouts[0].service_fee, "2000");
        assert_eq!(payouts[0].total, "98000");
        assert_eq!(payouts[0].status, db::STATUS_PENDING);
    }

    #[tokio::test]
    async fn fee_above_subtotal_is_recorded_failed() {
        let (store, contract, idx) = setup();
        contract.push_event(EventKind::Swap, swap("0xs1", 10, 1_500));

        idx.run_once().await.unwrap();

        let payout = &store.processed_btc_transactions()[0];
        assert_eq!(payout.status, db::STATUS_FAILED);
        assert_eq!(payout.total, "0");
        assert_eq!(payout.service_fee, "2000");
    }

    #[tokio::test]
    async fn existing_payout_row_is_left_untouched() {
        let (store, contract, idx) = setup();
        let existing = db::ProcessedBtcTransaction {
            swap_transaction_hash: "0xs1".into(),
            icy_transaction_hash: Some("0xicy".into()),
            btc_address: "tb1qdest".into(),
            subtotal: "100000".into(),
            service_fee: "2000".into(),
            total: "98000".into(),
            status: db::STATUS_PENDING.into(),
            ..Default::default()
        };
        store
            .insert_swap_events(&[(
                db::SwapEvent {
                    transaction_hash: "0xother".into(),
                    ..Default::default()
                },
                existing,
            )])
            .await
            .unwrap();
        contract.push_event(EventKind::Swap, swap("0xs1", 10, 100_000));
        contract.push_event(EventKind::Swap, swap("0xother", 1, 100_000));

        idx.run_once().await.unwrap();

        let payouts = store.processed_btc_transactions();
        assert_eq!(payouts.len(), 1);
        assert_eq!(payouts[0].icy_transaction_hash.as_deref(), Some("0xicy"));
        assert_eq!(store.swap_events().len(), 2);
    }

    #[tokio::test]
    async fn rerun_is_idempotent() {
        let (store, contract, idx) = setup();
        contract.push_event(EventKind::Swap, swap("0xs1", 10, 100_000));
        contract.push_event(EventKind::Swap, swap("0xs2", 12, 500_000));

        assert_eq!(idx.run_once().await.unwrap(), RunOutcome::Completed(2));
        assert_eq!(idx.run_once().await.unwrap(), RunOutcome::Completed(0));
        assert_eq!(store.swap_events().len(), 2);
        assert_eq!(store.processed_btc_transactions()[1].total, "495000");
    }

    #[tokio::test]
    async fn failed_insert_stores_neither_event_nor_payout() {
        let (store, contract, idx) = setup();
        contract.push_event(EventKind::Swap, swap("0xs1", 10, 100_000));
        contract.push_event(EventKind::Swap, swap("0xs2", 12, 500_000));
        store.fail_next("insert_swap_events");

        assert!(matches!(idx.run_once().await, Err(IndexError::Store(_))));
        assert!(store.swap_events().is_empty());
        assert!(store.processed_btc_transactions().is_empty());

        assert_eq!(idx.run_once().await.unwrap(), RunOutcome::Completed(2));
        assert_eq!(store.swap_events().len(), 2);
        assert_eq!(store.processed_btc_transactions().len(), 2);
    }

    #[tokio::test]
    async fn sender_lookup_error_aborts_window_and_retry_recovers() {
        let (store, contract, idx) = setup();
        contract.push_event(EventKind::Swap, swap("0xs1", 10, 100_000));
        contract.set_lookup_failing("0xs1", true);

        assert!(matches!(idx.run_once().await, Err(IndexError::Contract(_))));
        assert!(store.swap_events().is_empty());
        assert!(store.processed_btc_transactions().is_empty());

        contract.set_lookup_failing("0xs1", false);
        assert_eq!(idx.run_once().await.unwrap(), RunOutcome::Completed(1));
        let payouts = store.processed_btc_transactions();
        assert_eq!(payouts.len(), 1);
        assert_eq!(payouts[0].swap_transaction_hash, "0xs1");
        assert_eq!(payouts[0].status, db::STATUS_PENDING);
    }

    #[tokio::test]
    async fn committed_windows_survive_a_later_failure() {
        let store = Arc::new(MemoryStore::new());
        let contract = Arc::new(MockContract::new(10));
        let cfg = config::EVMConfig {
            max_block_range: 5,
            ..evm_config()
        };
        let idx = SwapIndexer::new(&cfg, fee_config(), Duration::from_secs(5), store.clone(), contract.clone());
        contract.push_event(EventKind::Swap, swap("0xs1", 3, 100_000));
        contract.push_event(EventKind::Swap, swap("0xs2", 8, 100_000));
        contract.set_lookup_failing("0xs2", true);

        assert!(matches!(idx.run_once().await, Err(IndexError::Contract(_))));
        let events = store.swap_events();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].transaction_hash, "0xs1");

        contract.set_lookup_failing("0xs2", false);
        assert_eq!(idx.run_once().await.unwrap(), RunOutcome::Completed(1));
        assert_eq!(store.swap_events().len(), 2);
        assert_eq!(
            contract.filter_calls()[2..],
            [(EventKind::Swap, 4, 8), (EventKind::Swap, 9, 10)]
        );
    }
}
