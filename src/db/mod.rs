use async_trait::async_trait;
use sqlx::migrate::Migrator;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres};

use crate::config::DBConfig;

mod memory;
mod models;

pub use memory::MemoryStore;
pub use models::*;

static MIGRATOR: Migrator = sqlx::migrate!("src/db/migrations");

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    #[error("injected failure: {0}")]
    Injected(&'static str),
}

/// Persistence contract of the bridge. Every method that writes more than one
/// row commits all of them or none of them.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get_latest_btc_transaction(&self) -> Result<Option<BtcTransaction>, StoreError>;
    /// Inserts the batch in one transaction, skipping hashes already stored.
    /// Returns the number of new rows.
    async fn insert_btc_transactions(&self, txs: &[BtcTransaction]) -> Result<usize, StoreError>;

    async fn get_latest_icy_transaction(&self) -> Result<Option<IcyTransaction>, StoreError>;
    async fn get_icy_transaction_by_hash(
        &self,
        hash: &str,
    ) -> Result<Option<IcyTransaction>, StoreError>;
    async fn insert_icy_transactions(&self, txs: &[IcyTransaction]) -> Result<usize, StoreError>;

    async fn get_latest_swap_event(&self) -> Result<Option<SwapEvent>, StoreError>;
    /// Inserts swap events together with their payout rows. A payout row whose
    /// swap hash already exists is left untouched.
    async fn insert_swap_events(
        &self,
        batch: &[(SwapEvent, ProcessedBtcTransaction)],
    ) -> Result<usize, StoreError>;

    async fn insert_swap_request(&self, request: &SwapRequest) -> Result<(), StoreError>;
    async fn get_swap_request(&self, icy_tx_hash: &str)
        -> Result<Option<SwapRequest>, StoreError>;
    async fn find_pending_swap_requests(&self) -> Result<Vec<SwapRequest>, StoreError>;
    /// Pending requests claimed before `claimed_before` (unix seconds). These
    /// were sent but never finalized and need an operator to reconcile them.
    async fn find_stale_swap_request_claims(
        &self,
        claimed_before: i64,
    ) -> Result<Vec<SwapRequest>, StoreError>;
    /// Marks a pending, unclaimed request as being worked on. Returns false when
    /// another worker holds it or it is no longer pending.
    async fn claim_swap_request(&self, icy_tx_hash: &str) -> Result<bool, StoreError>;
    async fn release_swap_request(&self, icy_tx_hash: &str) -> Result<(), StoreError>;
    /// pending -> failed. A claimed request is left alone, its swap may be on chain.
    async fn fail_swap_request(&self, icy_tx_hash: &str) -> Result<bool, StoreError>;
    /// pending -> completed plus creation of the payout row, atomically.
    async fn complete_swap_request(
        &self,
        icy_tx_hash: &str,
        swap_tx_hash: &str,
        processed: &ProcessedBtcTransaction,
    ) -> Result<bool, StoreError>;

    async fn get_processed_btc_transaction(
        &self,
        swap_tx_hash: &str,
    ) -> Result<Option<ProcessedBtcTransaction>, StoreError>;
    async fn find_pending_processed_btc_transactions(
        &self,
    ) -> Result<Vec<ProcessedBtcTransaction>, StoreError>;
    async fn find_stale_processed_btc_claims(
        &self,
        claimed_before: i64,
    ) -> Result<Vec<ProcessedBtcTransaction>, StoreError>;
    async fn claim_processed_btc_transaction(&self, swap_tx_hash: &str)
        -> Result<bool, StoreError>;
    async fn release_processed_btc_transaction(&self, swap_tx_hash: &str)
        -> Result<(), StoreError>;
    async fn complete_processed_btc_transaction(
        &self,
        swap_tx_hash: &str,
        outbound_tx_hash: &str,
        network_fee: &str,
    ) -> Result<bool, StoreError>;
    /// pending -> failed, unless the payout is claimed.
    async fn fail_processed_btc_transaction(&self, swap_tx_hash: &str)
        -> Result<bool, StoreError>;
}

pub async fn open_postgres_db(config: DBConfig) -> Result<Repo, StoreError> {
    let pool = PgPoolOptions::new()
        .max_connections(20)
        .connect(&config.dsn)
        .await?;
    let repo = Repo { pool };
    if config.automigrate {
        repo.migrate().await?;
    }
    Ok(repo)
}

pub struct Repo {
    pub pool: PgPool,
}

impl Repo {
    pub async fn migrate(&self) -> Result<(), StoreError> {
        MIGRATOR.run(&self.pool).await?;
        Ok(())
    }

    pub async fn reset_schema(&self) -> Result<(), StoreError> {
        let _ = sqlx::query("DROP SCHEMA public CASCADE")
            .execute(&self.pool)
            .await?;

        let _ = sqlx::query("CREATE SCHEMA public")
            .execute(&self.pool)
            .await?;
        self.migrate().await?;
        Ok(())
    }

    async fn insert_processed_btc_transaction(
        dbtx: &mut sqlx::Transaction<'_, Postgres>,
        row: &ProcessedBtcTransaction,
    ) -> Result<u64, StoreError> {
        let result = sqlx::query(
            "INSERT INTO onchain_btc_processed_transactions (
                swap_transaction_hash,
                icy_transaction_hash,
                btc_address,
                subtotal,
                service_fee,
                total,
                status,
                created_at,
                updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             ON CONFLICT (swap_transaction_hash) DO NOTHING",
        )
        .bind(&row.swap_transaction_hash)
        .bind(&row.icy_transaction_hash)
        .bind(&row.btc_address)
        .bind(&row.subtotal)
        .bind(&row.service_fee)
        .bind(&row.total)
        .bind(&row.status)
        .bind(row.created_at)
        .bind(row.updated_at)
        .execute(&mut **dbtx)
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl Store for Repo {
    async fn get_latest_btc_transaction(&self) -> Result<Option<BtcTransaction>, StoreError> {
        let result = sqlx::query_as::<_, BtcTransaction>(
            "SELECT * FROM onchain_btc_transactions ORDER BY block_number DESC, id DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(result)
    }

    async fn insert_btc_transactions(&self, txs: &[BtcTransaction]) -> Result<usize, StoreError> {
        let mut dbtx = self.pool.begin().await?;
        let mut inserted = 0;
        for tx in txs.iter() {
            let result = sqlx::query(
                "INSERT INTO onchain_btc_transactions (
                    transaction_hash,
                    block_number,
                    block_time,
                    direction,
                    counterparty_address,
                    amount,
                    created_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)
                 ON CONFLICT (transaction_hash) DO NOTHING",
            )
            .bind(&tx.transaction_hash)
            .bind(tx.block_number)
            .bind(tx.block_time)
            .bind(&tx.direction)
            .bind(&tx.counterparty_address)
            .bind(&tx.amount)
            .bind(tx.created_at)
            .execute(&mut *dbtx)
            .await?;
            inserted += result.rows_affected() as usize;
        }
        dbtx.commit().await?;
        Ok(inserted)
    }

    async fn get_latest_icy_transaction(&self) -> Result<Option<IcyTransaction>, StoreError> {
        let result = sqlx::query_as::<_, IcyTransaction>(
            "SELECT * FROM onchain_icy_transactions
             ORDER BY block_number DESC, log_index DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(result)
    }

    async fn get_icy_transaction_by_hash(
        &self,
        hash: &str,
    ) -> Result<Option<IcyTransaction>, StoreError> {
        let result = sqlx::query_as::<_, IcyTransaction>(
            "SELECT * FROM onchain_icy_transactions WHERE transaction_hash = $1",
        )
        .bind(hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(result)
    }

    async fn insert_icy_transactions(&self, txs: &[IcyTransaction]) -> Result<usize, StoreError> {
        let mut dbtx = self.pool.begin().await?;
        let mut inserted = 0;
        for tx in txs.iter() {
            let result = sqlx::query(
                "INSERT INTO onchain_icy_transactions (
                    transaction_hash,
                    block_number,
                    log_index,
                    direction,
                    counterparty_address,
                    amount,
                    created_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7)
                 ON CONFLICT (transaction_hash) DO NOTHING",
            )
            .bind(&tx.transaction_hash)
            .bind(tx.block_number)
            .bind(tx.log_index)
            .bind(&tx.direction)
            .bind(&tx.counterparty_address)
            .bind(&tx.amount)
            .bind(tx.created_at)
            .execute(&mut *dbtx)
            .await?;
            inserted += result.rows_affected() as usize;
        }
        dbtx.commit().await?;
        Ok(inserted)
    }

    async fn get_latest_swap_event(&self) -> Result<Option<SwapEvent>, StoreError> {
        let result = sqlx::query_as::<_, SwapEvent>(
            "SELECT * FROM onchain_icy_swap_events
             ORDER BY block_number DESC, log_index DESC LIMIT 1",
        )
        .fetch_optional(&self.pool)
        .await?;
        Ok(result)
    }

    async fn insert_swap_events(
        &self,
        batch: &[(SwapEvent, ProcessedBtcTransaction)],
    ) -> Result<usize, StoreError> {
        let mut dbtx = self.pool.begin().await?;
        let mut inserted = 0;
        for (event, processed) in batch.iter() {
            let result = sqlx::query(
                "INSERT INTO onchain_icy_swap_events (
                    transaction_hash,
                    block_number,
                    log_index,
                    from_address,
                    icy_amount,
                    btc_address,
                    btc_amount,
                    created_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                 ON CONFLICT (transaction_hash) DO NOTHING",
            )
            .bind(&event.transaction_hash)
            .bind(event.block_number)
            .bind(event.log_index)
            .bind(&event.from_address)
            .bind(&event.icy_amount)
            .bind(&event.btc_address)
            .bind(&event.btc_amount)
            .bind(event.created_at)
            .execute(&mut *dbtx)
            .await?;

            if result.rows_affected() == 0 {
                continue;
            }
            inserted += 1;
            Self::insert_processed_btc_transaction(&mut dbtx, processed).await?;
        }
        dbtx.commit().await?;
        Ok(inserted)
    }

    async fn insert_swap_request(&self, request: &SwapRequest) -> Result<(), StoreError> {
        let _ = sqlx::query(
            "INSERT INTO swap_requests
                (icy_transaction_hash, btc_address, icy_amount, status, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&request.icy_transaction_hash)
        .bind(&request.btc_address)
        .bind(&request.icy_amount)
        .bind(&request.status)
        .bind(request.created_at)
        .bind(request.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_swap_request(
        &self,
        icy_tx_hash: &str,
    ) -> Result<Option<SwapRequest>, StoreError> {
        let result = sqlx::query_as::<_, SwapRequest>(
            "SELECT * FROM swap_requests WHERE icy_transaction_hash = $1",
        )
        .bind(icy_tx_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(result)
    }

    async fn find_pending_swap_requests(&self) -> Result<Vec<SwapRequest>, StoreError> {
        let result = sqlx::query_as::<_, SwapRequest>(
            "SELECT * FROM swap_requests WHERE status = 'pending' ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(result)
    }

    async fn find_stale_swap_request_claims(
        &self,
        claimed_before: i64,
    ) -> Result<Vec<SwapRequest>, StoreError> {
        let result = sqlx::query_as::<_, SwapRequest>(
            "SELECT * FROM swap_requests
             WHERE status = 'pending' AND claimed_at < $1 ORDER BY claimed_at ASC",
        )
        .bind(claimed_before)
        .fetch_all(&self.pool)
        .await?;
        Ok(result)
    }

    async fn claim_swap_request(&self, icy_tx_hash: &str) -> Result<bool, StoreError> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            "UPDATE swap_requests SET claimed_at = $1, updated_at = $1
             WHERE icy_transaction_hash = $2 AND status = 'pending' AND claimed_at IS NULL",
        )
        .bind(now)
        .bind(icy_tx_hash)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn release_swap_request(&self, icy_tx_hash: &str) -> Result<(), StoreError> {
        let _ = sqlx::query(
            "UPDATE swap_requests SET claimed_at = NULL, updated_at = $1
             WHERE icy_transaction_hash = $2 AND status = 'pending'",
        )
        .bind(chrono::Utc::now().timestamp())
        .bind(icy_tx_hash)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn fail_swap_request(&self, icy_tx_hash: &str) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE swap_requests SET status = 'failed', updated_at = $1
             WHERE icy_transaction_hash = $2 AND status = 'pending' AND claimed_at IS NULL",
        )
        .bind(chrono::Utc::now().timestamp())
        .bind(icy_tx_hash)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn complete_swap_request(
        &self,
        icy_tx_hash: &str,
        swap_tx_hash: &str,
        processed: &ProcessedBtcTransaction,
    ) -> Result<bool, StoreError> {
        let mut dbtx = self.pool.begin().await?;

        let result = sqlx::query(
            "UPDATE swap_requests
             SET status = 'completed', swap_transaction_hash = $1, updated_at = $2
             WHERE icy_transaction_hash = $3 AND status = 'pending'",
        )
        .bind(swap_tx_hash)
        .bind(chrono::Utc::now().timestamp())
        .bind(icy_tx_hash)
        .execute(&mut *dbtx)
        .await?;

        if result.rows_affected() != 1 {
            dbtx.rollback().await?;
            return Ok(false);
        }

        Self::insert_processed_btc_transaction(&mut dbtx, processed).await?;
        dbtx.commit().await?;
        Ok(true)
    }

    async fn get_processed_btc_transaction(
        &self,
        swap_tx_hash: &str,
    ) -> Result<Option<ProcessedBtcTransaction>, StoreError> {
        let result = sqlx::query_as::<_, ProcessedBtcTransaction>(
            "SELECT * FROM onchain_btc_processed_transactions WHERE swap_transaction_hash = $1",
        )
        .bind(swap_tx_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(result)
    }

    async fn find_pending_processed_btc_transactions(
        &self,
    ) -> Result<Vec<ProcessedBtcTransaction>, StoreError> {
        let result = sqlx::query_as::<_, ProcessedBtcTransaction>(
            "SELECT * FROM onchain_btc_processed_transactions
             WHERE status = 'pending' ORDER BY id ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(result)
    }

    async fn find_stale_processed_btc_claims(
        &self,
        claimed_before: i64,
    ) -> Result<Vec<ProcessedBtcTransaction>, StoreError> {
        let result = sqlx::query_as::<_, ProcessedBtcTransaction>(
            "SELECT * FROM onchain_btc_processed_transactions
             WHERE status = 'pending' AND claimed_at < $1 ORDER BY claimed_at ASC",
        )
        .bind(claimed_before)
        .fetch_all(&self.pool)
        .await?;
        Ok(result)
    }

    async fn claim_processed_btc_transaction(
        &self,
        swap_tx_hash: &str,
    ) -> Result<bool, StoreError> {
        let now = chrono::Utc::now().timestamp();
        let result = sqlx::query(
            "UPDATE onchain_btc_processed_transactions SET claimed_at = $1, updated_at = $1
             WHERE swap_transaction_hash = $2 AND status = 'pending' AND claimed_at IS NULL",
        )
        .bind(now)
        .bind(swap_tx_hash)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn release_processed_btc_transaction(
        &self,
        swap_tx_hash: &str,
    ) -> Result<(), StoreError> {
        let _ = sqlx::query(
            "UPDATE onchain_btc_processed_transactions SET claimed_at = NULL, updated_at = $1
             WHERE swap_transaction_hash = $2 AND status = 'pending'",
        )
        .bind(chrono::Utc::now().timestamp())
        .bind(swap_tx_hash)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn complete_processed_btc_transaction(
        &self,
        swap_tx_hash: &str,
        outbound_tx_hash: &str,
        network_fee: &str,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE onchain_btc_processed_transactions
             SET status = 'completed', outbound_tx_hash = $1, network_fee = $2, updated_at = $3
             WHERE swap_transaction_hash = $4 AND status = 'pending'",
        )
        .bind(outbound_tx_hash)
        .bind(network_fee)
        .bind(chrono::Utc::now().timestamp())
        .bind(swap_tx_hash)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn fail_processed_btc_transaction(
        &self,
        swap_tx_hash: &str,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE onchain_btc_processed_transactions SET status = 'failed', updated_at = $1
             WHERE swap_transaction_hash = $2 AND status = 'pending' AND claimed_at IS NULL",
        )
        .bind(chrono::Utc::now().timestamp())
        .bind(swap_tx_hash)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}
