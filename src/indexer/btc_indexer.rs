use std::sync::Arc;
use std::time::Duration;

use crate::btc::{BtcExplorer, ExplorerTx, EXPLORER_PAGE_SIZE};
use crate::config;
use crate::db::{self, Store};
use crate::error::IndexError;

use super::coordinator::{run_exclusive, RunOutcome, SingleFlight};

static BTC_INDEXER_ID: &str = "btc_indexer";

/// Indexes the confirmed history of the treasury address.
pub struct BtcIndexer {
    store: Arc<dyn Store>,
    explorer: Arc<dyn BtcExplorer>,
    treasury_address: String,
    genesis_txid: Option<String>,
    deadline: Duration,
    flight: SingleFlight,
}

impl BtcIndexer {
    pub fn new(
        btc_cfg: &config::BTCConfig,
        deadline: Duration,
        store: Arc<dyn Store>,
        explorer: Arc<dyn BtcExplorer>,
    ) -> Self {
        Self {
            store,
            explorer,
            treasury_address: btc_cfg.treasury_address.clone(),
            genesis_txid: btc_cfg.explorer.genesis_txid.clone(),
            deadline,
            flight: SingleFlight::new(BTC_INDEXER_ID),
        }
    }

    pub async fn run_once(&self) -> Result<RunOutcome, IndexError> {
        run_exclusive(&self.flight, self.deadline, || self.index()).await
    }

    async fn index(&self) -> Result<usize, IndexError> {
        let stop_hash = match self.store.get_latest_btc_transaction().await? {
            Some(latest) => Some(latest.transaction_hash),
            None => self.genesis_txid.clone(),
        };

        let fetched = self.fetch_new_transactions(stop_hash.as_deref()).await?;
        if fetched.is_empty() {
            debug!("No new BTC transactions: address={}", self.treasury_address);
            return Ok(0);
        }

        let now = chrono::Utc::now().timestamp();
        let mut records = Vec::with_capacity(fetched.len());
        // explorer pages are newest first
        for tx in fetched.iter().rev() {
            match classify_transaction(tx, &self.treasury_address) {
                Ok(mut record) => {
                    record.created_at = now;
                    records.push(record);
                }
                Err(reason) => {
                    warn!("Skip BTC transaction: txid={} reason={}", tx.txid, reason);
                }
            }
        }
        records.sort_by_key(|r| r.block_number);

        let inserted = self.store.insert_btc_transactions(&records).await?;
        info!(
            "BTC transactions indexed: address={} fetched={} inserted={}",
            self.treasury_address,
            fetched.len(),
            inserted
        );
        Ok(inserted)
    }

    /// Pages backward from the newest transaction until the stop hash or the
    /// end of the history.
    async fn fetch_new_transactions(
        &self,
        stop_hash: Option<&str>,
    ) -> Result<Vec<ExplorerTx>, IndexError> {
        let mut collected = Vec::new();
        let mut cursor: Option<String> = None;

        loop {
            let page = self
                .explorer
                .get_transactions_by_address(&self.treasury_address, cursor.as_deref())
                .await?;
            let page_len = page.len();
            let last_txid = page.last().map(|tx| tx.txid.clone());
            debug!(
                "Fetched BTC page: address={} cursor={:?} size={}",
                self.treasury_address, cursor, page_len
            );

            for tx in page {
                if stop_hash == Some(tx.txid.as_str()) {
                    return Ok(collected);
                }
                collected.push(tx);
            }

            if page_len < EXPLORER_PAGE_SIZE {
                return Ok(collected);
            }
            cursor = last_txid;
        }
    }
}

/// Turns an explorer entry into a ledger row from the point of view of
/// `treasury`. Incoming when no input spends from the treasury.
pub fn classify_transaction(
    tx: &ExplorerTx,
    treasury: &str,
) -> Result<db::BtcTransaction, String> {
    let status = tx.status.as_ref().ok_or("missing status")?;
    if !status.confirmed {
        return Err("unconfirmed".to_owned());
    }
    let (Some(height), Some(time)) = (status.block_height, status.block_time) else {
        return Err("missing block height or time".to_owned());
    };

    let is_treasury = |addr: &Option<String>| addr.as_deref() == Some(treasury);
    let spends_from_treasury = tx
        .vin
        .iter()
        .any(|input| input.prevout.as_ref().is_some_and(|p| is_treasury(&p.scriptpubkey_address)));

    let (direction, amount, counterparty) = if !spends_from_treasury {
        let amount: u64 = tx
            .vout
            .iter()
            .filter(|out| is_treasury(&out.scriptpubkey_address))
            .map(|out| out.value)
            .sum();
        if amount == 0 {
            return Err("does not pay the treasury".to_owned());
        }
        let sender = tx
            .vin
            .iter()
            .filter_map(|input| input.prevout.as_ref()?.scriptpubkey_address.clone())
            .find(|addr| addr != treasury)
            .unwrap_or_default();
        (db::DIRECTION_IN, amount, sender)
    } else {
        let foreign: Vec<_> = tx
            .vout
            .iter()
            .filter(|out| out.scriptpubkey_address.is_some() && !is_treasury(&out.scriptpubkey_address))
            .collect();
        let Some(first) = foreign.first() else {
            return Err("no output to a foreign address".to_owned());
        };
        let amount: u64 = foreign.iter().map(|out| out.value).sum();
        let receiver = first.scriptpubkey_address.clone().unwrap_or_default();
        (db::DIRECTION_OUT, amount, receiver)
    };

    Ok(db::BtcTransaction {
        transaction_hash: tx.txid.clone(),
        block_number: height as i64,
        block_time: time,
        direction: direction.to_owned(),
        counterparty_address: counterparty,
        amount: amount.to_string(),
        ..Default::default()
    })
}
