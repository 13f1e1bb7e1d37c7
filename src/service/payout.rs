use std::sync::Arc;

use crate::amount::Amount;
use crate::btc::{validate_address, BtcExplorer, PaymentSender};
use crate::config;
use crate::db::{self, Store, StoreError};
use crate::error::SettlementError;
use crate::indexer::coordinator::SingleFlight;

use super::{CycleReport, Disposition};

/// Pays out pending `ProcessedBtcTransaction` rows from the treasury.
pub struct PayoutProcessor {
    store: Arc<dyn Store>,
    explorer: Arc<dyn BtcExplorer>,
    sender: Arc<dyn PaymentSender>,
    treasury_address: String,
    net: bitcoin::Network,
    flight: SingleFlight,
}

impl PayoutProcessor {
    pub fn new(
        btc_cfg: &config::BTCConfig,
        store: Arc<dyn Store>,
        explorer: Arc<dyn BtcExplorer>,
        sender: Arc<dyn PaymentSender>,
    ) -> Self {
        Self {
            store,
            explorer,
            sender,
            treasury_address: btc_cfg.treasury_address.clone(),
            net: btc_cfg.get_network(),
            flight: SingleFlight::new("payout"),
        }
    }

    pub async fn process_pending_btc_transactions(&self) -> Result<CycleReport, SettlementError> {
        let Some(_lease) = self.flight.try_acquire() else {
            debug!("Payout already running, skipping");
            return Ok(CycleReport::default());
        };

        let pending = self.store.find_pending_processed_btc_transactions().await?;
        let mut report = CycleReport::default();
        if pending.is_empty() {
            return Ok(report);
        }

        // fetched once per cycle and tracked locally as payments go out
        let mut balance = self.explorer.get_balance(&self.treasury_address).await?;
        for row in pending.iter() {
            match self.pay(row, &mut balance).await {
                Ok(disposition) => report.record(disposition),
                Err(err) => {
                    error!(
                        "Can't pay out swap: swap_tx_hash={} error={}",
                        row.swap_transaction_hash, err
                    );
                    report.errors += 1;
                }
            }
        }

        info!("Pending BTC payouts processed: {} balance={}", report, balance);
        Ok(report)
    }

    /// Pending payouts whose claim is older than `max_age_secs`.
    pub async fn stale_claims(
        &self,
        max_age_secs: i64,
    ) -> Result<Vec<db::ProcessedBtcTransaction>, SettlementError> {
        let cutoff = chrono::Utc::now().timestamp() - max_age_secs;
        Ok(self.store.find_stale_processed_btc_claims(cutoff).await?)
    }

    async fn pay(
        &self,
        row: &db::ProcessedBtcTransaction,
        balance: &mut Amount,
    ) -> Result<Disposition, StoreError> {
        let swap_hash = row.swap_transaction_hash.as_str();

        if let Some(claimed_at) = row.claimed_at {
            warn!(
                "Payout claimed but not finalized, needs reconciliation: swap_tx_hash={} claimed_at={}",
                swap_hash, claimed_at
            );
            return Ok(Disposition::Skipped);
        }

        if !validate_address(&row.btc_address, self.net) {
            warn!(
                "Invalid payout address, failing payout: swap_tx_hash={} btc_address={}",
                swap_hash, row.btc_address
            );
            return self.fail(swap_hash).await;
        }

        let total = match row.total() {
            Ok(total) if !total.is_zero() => total,
            Ok(_) => {
                warn!("Zero payout, failing: swap_tx_hash={}", swap_hash);
                return self.fail(swap_hash).await;
            }
            Err(err) => {
                warn!("Invalid payout total: swap_tx_hash={} error={}", swap_hash, err);
                return self.fail(swap_hash).await;
            }
        };

        let Some(remaining) = balance.checked_sub(&total) else {
            warn!(
                "Treasury balance too low, payout deferred: swap_tx_hash={} total={} balance={}",
                swap_hash, total, balance
            );
            return Ok(Disposition::Deferred);
        };

        if !self.store.claim_processed_btc_transaction(swap_hash).await? {
            return Ok(Disposition::Skipped);
        }

        let (txid, network_fee) = match self.sender.send_payment(&row.btc_address, &total).await {
            Ok(sent) => sent,
            Err(err) => {
                warn!("BTC payment failed, will retry: swap_tx_hash={} error={}", swap_hash, err);
                self.store.release_processed_btc_transaction(swap_hash).await?;
                return Ok(Disposition::Deferred);
            }
        };
        *balance = remaining
            .checked_sub(&network_fee)
            .unwrap_or_else(|| Amount::zero(remaining.decimals));

        if !self
            .store
            .complete_processed_btc_transaction(swap_hash, &txid, &network_fee.to_base_units())
            .await?
        {
            warn!(
                "Payout changed while sending: swap_tx_hash={} outbound_tx_hash={}",
                swap_hash, txid
            );
            return Ok(Disposition::Skipped);
        }

        info!(
            "BTC payout sent: swap_tx_hash={} outbound_tx_hash={} total={} network_fee={}",
            swap_hash, txid, total, network_fee
        );
        Ok(Disposition::Completed)
    }

    async fn fail(&self, swap_hash: &str) -> Result<Disposition, StoreError> {
        if self.store.fail_processed_btc_transaction(swap_hash).await? {
            Ok(Disposition::Failed)
        } else {
            Ok(Disposition::Skipped)
        }
    }
}
