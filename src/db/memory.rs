//! In-memory store used by tests and dry runs.
//!
//! All state sits behind one mutex, so each trait call observes and mutates a
//! consistent snapshot, which gives the same all-or-nothing behaviour as a
//! database transaction.

use std::collections::HashSet;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use super::models::*;
use super::{Store, StoreError};

#[derive(Default)]
struct State {
    btc_transactions: Vec<BtcTransaction>,
    icy_transactions: Vec<IcyTransaction>,
    swap_events: Vec<SwapEvent>,
    swap_requests: Vec<SwapRequest>,
    processed: Vec<ProcessedBtcTransaction>,
    next_id: i64,
}

impl State {
    fn next_id(&mut self) -> i64 {
        self.next_id += 1;
        self.next_id
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
    faults: Mutex<HashSet<&'static str>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn faults(&self) -> MutexGuard<'_, HashSet<&'static str>> {
        self.faults.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Makes the next call of `operation` fail without touching any state.
    pub fn fail_next(&self, operation: &'static str) {
        self.faults().insert(operation);
    }

    fn check_fault(&self, operation: &'static str) -> Result<(), StoreError> {
        if self.faults().remove(operation) {
            return Err(StoreError::Injected(operation));
        }
        Ok(())
    }

    pub fn btc_transactions(&self) -> Vec<BtcTransaction> {
        self.state().btc_transactions.clone()
    }

    pub fn icy_transactions(&self) -> Vec<IcyTransaction> {
        self.state().icy_transactions.clone()
    }

    pub fn swap_events(&self) -> Vec<SwapEvent> {
        self.state().swap_events.clone()
    }

    pub fn processed_btc_transactions(&self) -> Vec<ProcessedBtcTransaction> {
        self.state().processed.clone()
    }

    fn insert_processed(state: &mut State, row: &ProcessedBtcTransaction) {
        if state
            .processed
            .iter()
            .any(|p| p.swap_transaction_hash == row.swap_transaction_hash)
        {
            return;
        }
        let mut row = row.clone();
        row.id = state.next_id();
        state.processed.push(row);
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn get_latest_btc_transaction(&self) -> Result<Option<BtcTransaction>, StoreError> {
        self.check_fault("get_latest_btc_transaction")?;
        let state = self.state();
        Ok(state
            .btc_transactions
            .iter()
            .max_by_key(|t| (t.block_number, t.id))
            .cloned())
    }

    async fn insert_btc_transactions(&self, txs: &[BtcTransaction]) -> Result<usize, StoreError> {
        self.check_fault("insert_btc_transactions")?;
        let mut state = self.state();
        let mut inserted = 0;
        for tx in txs.iter() {
            if state
                .btc_transactions
                .iter()
                .any(|t| t.transaction_hash == tx.transaction_hash)
            {
                continue;
            }
            let mut row = tx.clone();
            row.id = state.next_id();
            state.btc_transactions.push(row);
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn get_latest_icy_transaction(&self) -> Result<Option<IcyTransaction>, StoreError> {
        self.check_fault("get_latest_icy_transaction")?;
        let state = self.state();
        Ok(state
            .icy_transactions
            .iter()
            .max_by_key(|t| (t.block_number, t.log_index))
            .cloned())
    }

    async fn get_icy_transaction_by_hash(
        &self,
        hash: &str,
    ) -> Result<Option<IcyTransaction>, StoreError> {
        let state = self.state();
        Ok(state
            .icy_transactions
            .iter()
            .find(|t| t.transaction_hash == hash)
            .cloned())
    }

    async fn insert_icy_transactions(&self, txs: &[IcyTransaction]) -> Result<usize, StoreError> {
        self.check_fault("insert_icy_transactions")?;
        let mut state = self.state();
        let mut inserted = 0;
        for tx in txs.iter() {
            if state
                .icy_transactions
                .iter()
                .any(|t| t.transaction_hash == tx.transaction_hash)
            {
                continue;
            }
            let mut row = tx.clone();
            row.id = state.next_id();
            state.icy_transactions.push(row);
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn get_latest_swap_event(&self) -> Result<Option<SwapEvent>, StoreError> {
        self.check_fault("get_latest_swap_event")?;
        let state = self.state();
        Ok(state
            .swap_events
            .iter()
            .max_by_key(|e| (e.block_number, e.log_index))
            .cloned())
    }

    async fn insert_swap_events(
        &self,
        batch: &[(SwapEvent, ProcessedBtcTransaction)],
    ) -> Result<usize, StoreError> {
        self.check_fault("insert_swap_events")?;
        let mut state = self.state();
        let mut inserted = 0;
        for (event, processed) in batch.iter() {
            if state
                .swap_events
                .iter()
                .any(|e| e.transaction_hash == event.transaction_hash)
            {
                continue;
            }
            let mut row = event.clone();
            row.id = state.next_id();
            state.swap_events.push(row);
            Self::insert_processed(&mut state, processed);
            inserted += 1;
        }
        Ok(inserted)
    }

    async fn insert_swap_request(&self, request: &SwapRequest) -> Result<(), StoreError> {
        let mut state = self.state();
        let mut row = request.clone();
        row.id = state.next_id();
        state.swap_requests.push(row);
        Ok(())
    }

    async fn get_swap_request(
        &self,
        icy_tx_hash: &str,
    ) -> Result<Option<SwapRequest>, StoreError> {
        let state = self.state();
        Ok(state
            .swap_requests
            .iter()
            .find(|r| r.icy_transaction_hash == icy_tx_hash)
            .cloned())
    }

    async fn find_pending_swap_requests(&self) -> Result<Vec<SwapRequest>, StoreError> {
        self.check_fault("find_pending_swap_requests")?;
        let state = self.state();
        Ok(state
            .swap_requests
            .iter()
            .filter(|r| r.is_pending())
            .cloned()
            .collect())
    }

    async fn find_stale_swap_request_claims(
        &self,
        claimed_before: i64,
    ) -> Result<Vec<SwapRequest>, StoreError> {
        let state = self.state();
        Ok(state
            .swap_requests
            .iter()
            .filter(|r| r.is_pending() && r.claimed_at.is_some_and(|at| at < claimed_before))
            .cloned()
            .collect())
    }

    async fn claim_swap_request(&self, icy_tx_hash: &str) -> Result<bool, StoreError> {
        self.check_fault("claim_swap_request")?;
        let now = chrono::Utc::now().timestamp();
        let mut state = self.state();
        let Some(row) = state.swap_requests.iter_mut().find(|r| {
            r.icy_transaction_hash == icy_tx_hash && r.is_pending() && r.claimed_at.is_none()
        }) else {
            return Ok(false);
        };
        row.claimed_at = Some(now);
        row.updated_at = now;
        Ok(true)
    }

    async fn release_swap_request(&self, icy_tx_hash: &str) -> Result<(), StoreError> {
        self.check_fault("release_swap_request")?;
        let mut state = self.state();
        if let Some(row) = state
            .swap_requests
            .iter_mut()
            .find(|r| r.icy_transaction_hash == icy_tx_hash && r.is_pending())
        {
            row.claimed_at = None;
            row.updated_at = chrono::Utc::now().timestamp();
        }
        Ok(())
    }

    async fn fail_swap_request(&self, icy_tx_hash: &str) -> Result<bool, StoreError> {
        self.check_fault("fail_swap_request")?;
        let mut state = self.state();
        let Some(row) = state
            .swap_requests
            .iter_mut()
            .find(|r| r.icy_transaction_hash == icy_tx_hash && r.is_pending() && r.claimed_at.is_none())
        else {
            return Ok(false);
        };
        row.status = STATUS_FAILED.to_string();
        row.updated_at = chrono::Utc::now().timestamp();
        Ok(true)
    }

    async fn complete_swap_request(
        &self,
        icy_tx_hash: &str,
        swap_tx_hash: &str,
        processed: &ProcessedBtcTransaction,
    ) -> Result<bool, StoreError> {
        self.check_fault("complete_swap_request")?;
        let mut state = self.state();
        let Some(row) = state
            .swap_requests
            .iter_mut()
            .find(|r| r.icy_transaction_hash == icy_tx_hash && r.is_pending())
        else {
            return Ok(false);
        };
        row.status = STATUS_COMPLETED.to_string();
        row.swap_transaction_hash = Some(swap_tx_hash.to_string());
        row.updated_at = chrono::Utc::now().timestamp();
        Self::insert_processed(&mut state, processed);
        Ok(true)
    }

    async fn get_processed_btc_transaction(
        &self,
        swap_tx_hash: &str,
    ) -> Result<Option<ProcessedBtcTransaction>, StoreError> {
        let state = self.state();
        Ok(state
            .processed
            .iter()
            .find(|p| p.swap_transaction_hash == swap_tx_hash)
            .cloned())
    }

    async fn find_pending_processed_btc_transactions(
        &self,
    ) -> Result<Vec<ProcessedBtcTransaction>, StoreError> {
        self.check_fault("find_pending_processed_btc_transactions")?;
        let state = self.state();
        Ok(state
            .processed
            .iter()
            .filter(|p| p.is_pending())
            .cloned()
            .collect())
    }

    async fn find_stale_processed_btc_claims(
        &self,
        claimed_before: i64,
    ) -> Result<Vec<ProcessedBtcTransaction>, StoreError> {
        let state = self.state();
        Ok(state
            .processed
            .iter()
            .filter(|p| p.is_pending() && p.claimed_at.is_some_and(|at| at < claimed_before))
            .cloned()
            .collect())
    }

    async fn claim_processed_btc_transaction(
        &self,
        swap_tx_hash: &str,
    ) -> Result<bool, StoreError> {
        self.check_fault("claim_processed_btc_transaction")?;
        let now = chrono::Utc::now().timestamp();
        let mut state = self.state();
        let Some(row) = state.processed.iter_mut().find(|p| {
            p.swap_transaction_hash == swap_tx_hash && p.is_pending() && p.claimed_at.is_none()
        }) else {
            return Ok(false);
        };
        row.claimed_at = Some(now);
        row.updated_at = now;
        Ok(true)
    }

    async fn release_processed_btc_transaction(
        &self,
        swap_tx_hash: &str,
    ) -> Result<(), StoreError> {
        self.check_fault("release_processed_btc_transaction")?;
        let mut state = self.state();
        if let Some(row) = state
            .processed
            .iter_mut()
            .find(|p| p.swap_transaction_hash == swap_tx_hash && p.is_pending())
        {
            row.claimed_at = None;
            row.updated_at = chrono::Utc::now().timestamp();
        }
        Ok(())
    }

    async fn complete_processed_btc_transaction(
        &self,
        swap_tx_hash: &str,
        outbound_tx_hash: &str,
        network_fee: &str,
    ) -> Result<bool, StoreError> {
        self.check_fault("complete_processed_btc_transaction")?;
        let mut state = self.state();
        let Some(row) = state
            .processed
            .iter_mut()
            .find(|p| p.swap_transaction_hash == swap_tx_hash && p.is_pending())
        else {
            return Ok(false);
        };
        row.status = STATUS_COMPLETED.to_string();
        row.outbound_tx_hash = Some(outbound_tx_hash.to_string());
        row.network_fee = Some(network_fee.to_string());
        row.updated_at = chrono::Utc::now().timestamp();
        Ok(true)
    }

    async fn fail_processed_btc_transaction(
        &self,
        swap_tx_hash: &str,
    ) -> Result<bool, StoreError> {
        self.check_fault("fail_processed_btc_transaction")?;
        let mut state = self.state();
        let Some(row) = state
            .processed
            .iter_mut()
            .find(|p| p.swap_transaction_hash == swap_tx_hash && p.is_pending() && p.claimed_at.is_none())
        else {
            return Ok(false);
        };
        row.status = STATUS_FAILED.to_string();
        row.updated_at = chrono::Utc::now().timestamp();
        Ok(true)
    }
}
