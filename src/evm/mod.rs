use async_trait::async_trait;
use alloy_primitives::U256;

use crate::amount::Amount;

mod json_rpc;

pub use json_rpc::EvmJsonRpcClient;

pub const TRANSFER_EVENT: &str = "Transfer(address,address,uint256)";
pub const SWAP_EVENT: &str = "Swap(uint256,string,uint256)";
pub const SWAP_FUNCTION: &str = "swap(uint256,string,uint256)";

#[derive(Debug, thiserror::Error)]
pub enum ContractError {
    #[error("rpc error {code}: {message}")]
    Rpc { code: i64, message: String },
    #[error("transport error: {0}")]
    Transport(String),
    #[error("can't decode response: {0}")]
    Decode(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

/// Which on-chain event stream to query.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// ERC20 `Transfer` logs of the ICY token.
    IcyTransfer,
    /// `Swap` logs of the swap contract.
    Swap,
}

impl std::fmt::Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IcyTransfer => write!(f, "icy_transfer"),
            Self::Swap => write!(f, "swap"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContractEvent {
    pub transaction_hash: String,
    pub block_number: u64,
    pub log_index: u64,
    pub data: EventData,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventData {
    Transfer {
        from: String,
        to: String,
        value: U256,
    },
    Swap {
        icy_amount: U256,
        btc_address: String,
        btc_amount: U256,
    },
    /// The log matched the filter but its payload could not be decoded.
    Undecodable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Receipt {
    pub block_number: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TxInfo {
    pub sender: String,
    pub chain_id: Option<u64>,
}

#[async_trait]
pub trait ContractClient: Send + Sync {
    /// Logs of `kind` in the inclusive block range `[from_block, to_block]`.
    async fn filter_events(
        &self,
        kind: EventKind,
        from_block: u64,
        to_block: u64,
    ) -> Result<Vec<ContractEvent>, ContractError>;

    async fn get_transaction_receipt(&self, hash: &str) -> Result<Receipt, ContractError>;

    async fn get_transaction_by_hash(&self, hash: &str) -> Result<TxInfo, ContractError>;

    async fn block_number(&self) -> Result<u64, ContractError>;

    /// Calls `swap(icy_amount, btc_address, sat_amount)` on the swap contract
    /// and returns the transaction hash.
    async fn submit_swap(
        &self,
        icy_amount: &Amount,
        btc_address: &str,
        sat_amount: &Amount,
    ) -> Result<String, ContractError>;
}

/// Lowercases and `0x`-prefixes an address so comparisons are case-insensitive.
pub fn normalize_address(address: &str) -> String {
    let trimmed = address.trim();
    let body = trimmed
        .strip_prefix("0x")
        .or_else(|| trimmed.strip_prefix("0X"))
        .unwrap_or(trimmed);
    format!("0x{}", body.to_lowercase())
}

/// Parses a `0x`-prefixed hex quantity.
pub fn parse_hex_u64(s: &str) -> Result<u64, ContractError> {
    let digits = s.strip_prefix("0x").unwrap_or(s);
    u64::from_str_radix(digits, 16).map_err(|_| ContractError::Decode(format!("bad quantity {}", s)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_addresses() {
        assert_eq!(
            normalize_address("0xAbCDef0000000000000000000000000000000001"),
            "0xabcdef0000000000000000000000000000000001"
        );
        assert_eq!(normalize_address("ABCD"), "0xabcd");
    }

    #[test]
    fn parses_hex_quantities() {
        assert_eq!(parse_hex_u64("0x1").unwrap(), 1);
        assert_eq!(parse_hex_u64("0x12a05f200").unwrap(), 5_000_000_000);
        assert!(parse_hex_u64("0xzz").is_err());
    }
}
