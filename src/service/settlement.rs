use std::sync::Arc;

use crate::btc::validate_address;
use crate::config;
use crate::db::{self, Store, StoreError};
use crate::error::SettlementError;
use crate::evm::ContractClient;
use crate::fee::{self, FeeConfig};
use crate::indexer::coordinator::SingleFlight;
use crate::oracle::PriceOracle;

use super::{CycleReport, Disposition};

/// Turns pending swap requests into on-chain swaps.
pub struct SettlementEngine {
    store: Arc<dyn Store>,
    contract: Arc<dyn ContractClient>,
    oracle: Arc<dyn PriceOracle>,
    net: bitcoin::Network,
    fee: FeeConfig,
    flight: SingleFlight,
}

impl SettlementEngine {
    pub fn new(
        btc_cfg: &config::BTCConfig,
        fee: FeeConfig,
        store: Arc<dyn Store>,
        contract: Arc<dyn ContractClient>,
        oracle: Arc<dyn PriceOracle>,
    ) -> Self {
        Self {
            store,
            contract,
            oracle,
            net: btc_cfg.get_network(),
            fee,
            flight: SingleFlight::new("settlement"),
        }
    }

    pub async fn process_swap_requests(&self) -> Result<CycleReport, SettlementError> {
        let Some(_lease) = self.flight.try_acquire() else {
            debug!("Settlement already running, skipping");
            return Ok(CycleReport::default());
        };

        let pending = self.store.find_pending_swap_requests().await?;
        let mut report = CycleReport::default();
        for request in pending.iter() {
            match self.settle(request).await {
                Ok(disposition) => report.record(disposition),
                Err(err) => {
                    error!(
                        "Can't settle swap request: icy_tx_hash={} error={}",
                        request.icy_transaction_hash, err
                    );
                    report.errors += 1;
                }
            }
        }

        if !pending.is_empty() {
            info!("Swap requests processed: {}", report);
        }
        Ok(report)
    }

    /// Pending requests whose claim is older than `max_age_secs`. Their swap
    /// may already be on chain, so they are never retried automatically.
    pub async fn stale_claims(&self, max_age_secs: i64) -> Result<Vec<db::SwapRequest>, SettlementError> {
        let cutoff = chrono::Utc::now().timestamp() - max_age_secs;
        Ok(self.store.find_stale_swap_request_claims(cutoff).await?)
    }

    async fn settle(&self, request: &db::SwapRequest) -> Result<Disposition, StoreError> {
        let icy_hash = request.icy_transaction_hash.as_str();

        // a claimed request may already be on chain, no other transition applies
        if let Some(claimed_at) = request.claimed_at {
            warn!(
                "Swap request claimed but not finalized, needs reconciliation: icy_tx_hash={} claimed_at={}",
                icy_hash, claimed_at
            );
            return Ok(Disposition::Skipped);
        }

        if self.store.get_icy_transaction_by_hash(icy_hash).await?.is_none() {
            debug!("ICY transaction not indexed yet: icy_tx_hash={}", icy_hash);
            return Ok(Disposition::Deferred);
        }

        if !validate_address(&request.btc_address, self.net) {
            warn!(
                "Invalid BTC address, failing request: icy_tx_hash={} btc_address={}",
                icy_hash, request.btc_address
            );
            return self.fail(icy_hash).await;
        }

        let price = match self.oracle.get_realtime_icy_btc().await {
            Ok(price) => price,
            Err(err) => {
                warn!("Can't get ICY/BTC price: icy_tx_hash={} error={}", icy_hash, err);
                return Ok(Disposition::Deferred);
            }
        };

        let icy_amount = match request.icy_amount() {
            Ok(amount) => amount,
            Err(err) => {
                warn!("Invalid ICY amount: icy_tx_hash={} error={}", icy_hash, err);
                return self.fail(icy_hash).await;
            }
        };
        let quote = match fee::sat_amount(&icy_amount, &price).and_then(|sats| fee::quote(&sats, &self.fee)) {
            Ok(quote) => quote,
            Err(err) => {
                warn!("Can't quote swap, failing request: icy_tx_hash={} error={}", icy_hash, err);
                return self.fail(icy_hash).await;
            }
        };

        if !self.store.claim_swap_request(icy_hash).await? {
            return Ok(Disposition::Skipped);
        }

        let swap_hash = match self
            .contract
            .submit_swap(&icy_amount, &request.btc_address, &quote.subtotal)
            .await
        {
            Ok(hash) => hash,
            Err(err) => {
                warn!("Swap submission failed, will retry: icy_tx_hash={} error={}", icy_hash, err);
                self.store.release_swap_request(icy_hash).await?;
                return Ok(Disposition::Deferred);
            }
        };

        let now = chrono::Utc::now().timestamp();
        let processed = db::ProcessedBtcTransaction {
            swap_transaction_hash: swap_hash.clone(),
            icy_transaction_hash: Some(icy_hash.to_owned()),
            btc_address: request.btc_address.clone(),
            subtotal: quote.subtotal.to_base_units(),
            service_fee: quote.service_fee.to_base_units(),
            total: quote.total.to_base_units(),
            status: db::STATUS_PENDING.to_owned(),
            created_at: now,
            updated_at: now,
            ..Default::default()
        };

        // the claim stays set if this fails, so the swap is never sent twice
        if !self
            .store
            .complete_swap_request(icy_hash, &swap_hash, &processed)
            .await?
        {
            warn!(
                "Swap request changed while settling: icy_tx_hash={} swap_tx_hash={}",
                icy_hash, swap_hash
            );
            return Ok(Disposition::Skipped);
        }

        info!(
            "Swap request settled: icy_tx_hash={} swap_tx_hash={} subtotal={} fee={} total={}",
            icy_hash, swap_hash, quote.subtotal, quote.service_fee, quote.total
        );
        Ok(Disposition::Completed)
    }

    async fn fail(&self, icy_hash: &str) -> Result<Disposition, StoreError> {
        if self.store.fail_swap_request(icy_hash).await? {
            Ok(Disposition::Failed)
        } else {
            Ok(Disposition::Skipped)
        }
    }
}
