use std::str::FromStr;

use async_trait::async_trait;
use serde::Deserialize;

use crate::amount::Amount;

pub mod bitcoind;
pub mod circuit_breaker;
pub mod resilient;
pub mod transport;

pub use resilient::{EndpointSnapshot, ResilientExplorer};
pub use transport::TransportError;

/// Esplora returns confirmed address history in pages of this size.
pub const EXPLORER_PAGE_SIZE: usize = 25;

#[derive(Debug, thiserror::Error)]
pub enum ExplorerError {
    #[error("no available endpoint")]
    NoAvailableEndpoint,
    #[error("all endpoints failed after {attempts} attempts, last error: {last}")]
    AllEndpointsFailed { attempts: usize, last: TransportError },
    #[error("request rejected: {0}")]
    Rejected(TransportError),
    #[error("can't decode explorer response: {0}")]
    Decode(String),
}

#[derive(Debug, thiserror::Error)]
pub enum PaymentError {
    #[error("invalid destination address {0}")]
    InvalidAddress(String),
    #[error("invalid amount {0}")]
    InvalidAmount(String),
    #[error("payment failed: {0}")]
    Send(String),
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExplorerTx {
    pub txid: String,
    #[serde(default)]
    pub vin: Vec<TxInput>,
    #[serde(default)]
    pub vout: Vec<TxOutput>,
    #[serde(default)]
    pub status: Option<TxStatus>,
    #[serde(default)]
    pub fee: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TxInput {
    #[serde(default)]
    pub prevout: Option<TxOutput>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TxOutput {
    #[serde(default)]
    pub scriptpubkey_address: Option<String>,
    pub value: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TxStatus {
    pub confirmed: bool,
    pub block_height: Option<u64>,
    pub block_time: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AddressInfo {
    pub address: String,
    pub chain_stats: ChainStats,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ChainStats {
    pub funded_txo_sum: u64,
    pub spent_txo_sum: u64,
}

#[async_trait]
pub trait BtcExplorer: Send + Sync {
    /// Confirmed history of `address`, newest first. `cursor` is the txid of the
    /// last transaction of the previous page.
    async fn get_transactions_by_address(
        &self,
        address: &str,
        cursor: Option<&str>,
    ) -> Result<Vec<ExplorerTx>, ExplorerError>;

    /// Confirmed balance in satoshis.
    async fn get_balance(&self, address: &str) -> Result<Amount, ExplorerError>;

    /// Broadcasts a raw transaction and returns its txid.
    async fn send_transaction(&self, raw_tx_hex: &str) -> Result<String, ExplorerError>;

    fn endpoint_snapshots(&self) -> Vec<EndpointSnapshot>;
}

/// Pays out BTC from the bridge treasury. Returns the txid and the network fee.
#[async_trait]
pub trait PaymentSender: Send + Sync {
    async fn send_payment(
        &self,
        address: &str,
        amount: &Amount,
    ) -> Result<(String, Amount), PaymentError>;
}

/// Checks that `address` parses and belongs to `network`.
pub fn validate_address(address: &str, network: bitcoin::Network) -> bool {
    match bitcoin::Address::from_str(address) {
        Ok(unchecked) => unchecked.require_network(network).is_ok(),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validates_address_network() {
        let mainnet = "bc1qar0srrr7xfkvy5l643lydnw9re59gtzzwf5mdq";
        assert!(validate_address(mainnet, bitcoin::Network::Bitcoin));
        assert!(!validate_address(mainnet, bitcoin::Network::Testnet));
        assert!(!validate_address("not-an-address", bitcoin::Network::Bitcoin));
    }

    #[test]
    fn decodes_esplora_transaction() {
        let body = r#"[{
            "txid": "aa11",
            "vin": [{"prevout": {"scriptpubkey_address": "bc1qsender", "value": 15000}}],
            "vout": [
                {"scriptpubkey_address": "bc1qtreasury", "value": 10000},
                {"scriptpubkey_address": "bc1qsender", "value": 4000},
                {"scriptpubkey": "6a", "value": 0}
            ],
            "status": {"confirmed": true, "block_height": 800000, "block_time": 1700000000},
            "fee": 1000
        }]"#;
        let txs: Vec<ExplorerTx> = serde_json::from_str(body).unwrap();
        assert_eq!(txs.len(), 1);
        assert_eq!(txs[0].vout.len(), 3);
        assert!(txs[0].vout[2].scriptpubkey_address.is_none());
        assert_eq!(txs[0].status.as_ref().unwrap().block_height, Some(800000));
    }
}
