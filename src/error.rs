use std::time::Duration;

use crate::btc::ExplorerError;
use crate::db::StoreError;
use crate::evm::ContractError;

/// Failure of one indexing cycle. Block windows committed before the failure
/// stay committed and the next cycle resumes after them; the failing window
/// leaves no rows behind.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    #[error("explorer: {0}")]
    Explorer(#[from] ExplorerError),
    #[error("contract: {0}")]
    Contract(#[from] ContractError),
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("indexing cycle exceeded deadline of {0:?}")]
    Deadline(Duration),
}

/// Failure of a settlement or payout cycle as a whole. Per-request problems
/// are handled row by row and never surface here.
#[derive(Debug, thiserror::Error)]
pub enum SettlementError {
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("explorer: {0}")]
    Explorer(#[from] ExplorerError),
}
