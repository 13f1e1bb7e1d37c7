use std::str::FromStr;
use std::sync::Arc;

use async_trait::async_trait;
use bitcoincore_rpc::{Auth, Client, RpcApi};

use super::{PaymentError, PaymentSender};
use crate::amount::Amount;
use crate::config;

/// Pays from the treasury wallet loaded in bitcoind.
pub struct BitcoindPaymentSender {
    net: bitcoin::Network,
    rpc: Arc<Client>,
}

impl BitcoindPaymentSender {
    pub fn new(btc_cfg: &config::BTCConfig) -> Result<Self, PaymentError> {
        let rpc = Client::new(
            &btc_cfg.rpc_address,
            Auth::UserPass(btc_cfg.rpc_user.clone(), btc_cfg.rpc_password.clone()),
        )
        .map_err(|err| PaymentError::Send(err.to_string()))?;

        Ok(Self {
            net: btc_cfg.get_network(),
            rpc: Arc::new(rpc),
        })
    }
}

#[async_trait]
impl PaymentSender for BitcoindPaymentSender {
    async fn send_payment(
        &self,
        address: &str,
        amount: &Amount,
    ) -> Result<(String, Amount), PaymentError> {
        let address = bitcoin::Address::from_str(address)
            .map_err(|_| PaymentError::InvalidAddress(address.to_owned()))?
            .require_network(self.net)
            .map_err(|_| PaymentError::InvalidAddress(address.to_owned()))?;
        let sats = amount
            .to_sats()
            .filter(|sats| *sats > 0)
            .ok_or_else(|| PaymentError::InvalidAmount(amount.to_string()))?;

        let rpc = self.rpc.clone();
        tokio::task::spawn_blocking(move || {
            let txid = rpc
                .send_to_address(
                    &address,
                    bitcoin::Amount::from_sat(sats),
                    None,
                    None,
                    None,
                    None,
                    None,
                    None,
                )
                .map_err(|err| PaymentError::Send(err.to_string()))?;

            // payment is already broadcast, fee lookup is best effort
            let fee = match rpc.get_transaction(&txid, None) {
                Ok(info) => info
                    .fee
                    .map(|fee| fee.to_sat().unsigned_abs())
                    .unwrap_or_default(),
                Err(err) => {
                    warn!("Can't get wallet transaction fee: txid={} error={}", txid, err);
                    0
                }
            };

            Ok((txid.to_string(), Amount::sats(fee)))
        })
        .await
        .map_err(|err| PaymentError::Send(err.to_string()))?
    }
}
