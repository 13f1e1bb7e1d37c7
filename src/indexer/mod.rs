mod btc_indexer;
pub mod coordinator;
mod icy_indexer;
mod swap_indexer;

pub use btc_indexer::BtcIndexer;
pub use coordinator::RunOutcome;
pub use icy_indexer::IcyIndexer;
pub use swap_indexer::SwapIndexer;
