use serde::Serialize;
use sqlx::prelude::FromRow;

use crate::amount::{Amount, AmountError, BTC_DECIMALS, ICY_DECIMALS};

pub const STATUS_PENDING: &str = "pending";
pub const STATUS_COMPLETED: &str = "completed";
pub const STATUS_FAILED: &str = "failed";

pub const DIRECTION_IN: &str = "in";
pub const DIRECTION_OUT: &str = "out";

#[derive(Default, Clone, Debug, FromRow, Serialize, PartialEq, Eq)]
pub struct BtcTransaction {
    pub id: i64,
    pub transaction_hash: String,
    pub block_number: i64,
    pub block_time: i64,
    pub direction: String,
    pub counterparty_address: String,
    pub amount: String,
    pub created_at: i64,
}

impl BtcTransaction {
    pub fn amount(&self) -> Result<Amount, AmountError> {
        Amount::from_base_units(&self.amount, BTC_DECIMALS)
    }
}

#[derive(Default, Clone, Debug, FromRow, Serialize, PartialEq, Eq)]
pub struct IcyTransaction {
    pub id: i64,
    pub transaction_hash: String,
    pub block_number: i64,
    pub log_index: i64,
    pub direction: String,
    pub counterparty_address: String,
    pub amount: String,
    pub created_at: i64,
}

impl IcyTransaction {
    pub fn amount(&self) -> Result<Amount, AmountError> {
        Amount::from_base_units(&self.amount, ICY_DECIMALS)
    }
}

#[derive(Default, Clone, Debug, FromRow, Serialize, PartialEq, Eq)]
pub struct SwapEvent {
    pub id: i64,
    pub transaction_hash: String,
    pub block_number: i64,
    pub log_index: i64,
    pub from_address: String,
    pub icy_amount: String,
    pub btc_address: String,
    pub btc_amount: String,
    pub created_at: i64,
}

#[derive(Default, Clone, Debug, FromRow, Serialize, PartialEq, Eq)]
pub struct SwapRequest {
    pub id: i64,
    pub icy_transaction_hash: String,
    pub btc_address: String,
    pub icy_amount: String,
    pub status: String, // pending, completed, failed
    pub swap_transaction_hash: Option<String>,
    pub claimed_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl SwapRequest {
    pub fn icy_amount(&self) -> Result<Amount, AmountError> {
        Amount::from_base_units(&self.icy_amount, ICY_DECIMALS)
    }

    pub fn is_pending(&self) -> bool {
        self.status.as_str() == STATUS_PENDING
    }
}

#[derive(Default, Clone, Debug, FromRow, Serialize, PartialEq, Eq)]
pub struct ProcessedBtcTransaction {
    pub id: i64,
    pub swap_transaction_hash: String,
    pub icy_transaction_hash: Option<String>,
    pub btc_address: String,
    pub subtotal: String,
    pub service_fee: String,
    pub total: String,
    pub status: String, // pending, completed, failed
    pub outbound_tx_hash: Option<String>,
    pub network_fee: Option<String>,
    pub claimed_at: Option<i64>,
    pub created_at: i64,
    pub updated_at: i64,
}

impl ProcessedBtcTransaction {
    pub fn total(&self) -> Result<Amount, AmountError> {
        Amount::from_base_units(&self.total, BTC_DECIMALS)
    }

    pub fn is_pending(&self) -> bool {
        self.status.as_str() == STATUS_PENDING
    }
}
