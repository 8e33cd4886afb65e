use async_trait::async_trait;
use thiserror::Error;

use super::account::AccountId;
use super::batch::{BatchStatus, ImportBatch, ImportBatchId};
use super::category::{Category, ProcessingState};
use super::period::DateRange;
use super::transaction::{Transaction, TransactionFilter, TransactionId, TransactionStatus};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(String),
    #[error("duplicate key: {0}")]
    Duplicate(String),
    #[error("storage backend error: {0}")]
    Backend(String),
}

/// Durable, keyed storage for transactions. Implementations must reject a
/// second insert of the same natural key with `StoreError::Duplicate`; that
/// constraint is the safety net under concurrent imports of one account.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn save(&self, tx: &Transaction) -> Result<(), StoreError>;

    /// Bulk insert as a single logical operation.
    async fn save_all(&self, txs: &[Transaction]) -> Result<(), StoreError>;

    async fn find_by_id(&self, id: &TransactionId) -> Result<Option<Transaction>, StoreError>;

    async fn find_by_account_and_range(
        &self,
        account: &AccountId,
        range: &DateRange,
    ) -> Result<Vec<Transaction>, StoreError>;

    async fn find_by_batch(&self, batch: &ImportBatchId) -> Result<Vec<Transaction>, StoreError>;

    async fn find_matching(&self, filter: &TransactionFilter)
        -> Result<Vec<Transaction>, StoreError>;

    /// Advance the status of every transaction in a batch. Transactions whose
    /// current status does not precede `status` are left untouched. Returns
    /// the number updated.
    async fn update_status_by_batch(
        &self,
        batch: &ImportBatchId,
        status: TransactionStatus,
    ) -> Result<usize, StoreError>;

    async fn count_by_status(&self, status: TransactionStatus) -> Result<usize, StoreError>;
}

#[async_trait]
pub trait ImportBatchStore: Send + Sync {
    /// Insert or update; a batch is updated in place when finalized.
    async fn save(&self, batch: &ImportBatch) -> Result<(), StoreError>;

    async fn find_by_id(&self, id: &ImportBatchId) -> Result<Option<ImportBatch>, StoreError>;

    async fn find_by_account(&self, account: &AccountId) -> Result<Vec<ImportBatch>, StoreError>;

    async fn find_most_recent_by_account(
        &self,
        account: &AccountId,
    ) -> Result<Option<ImportBatch>, StoreError>;

    async fn find_by_status(&self, status: BatchStatus) -> Result<Vec<ImportBatch>, StoreError>;

    async fn find_by_range(&self, range: &DateRange) -> Result<Vec<ImportBatch>, StoreError>;

    /// Allocate the next batch sequence number for the account. Must be
    /// atomic per account; two concurrent imports never share a number.
    async fn next_sequence_number(&self, account: &AccountId) -> Result<i64, StoreError>;
}

#[async_trait]
pub trait CategoryStore: Send + Sync {
    async fn save(&self, category: &Category) -> Result<(), StoreError>;
    async fn save_all(&self, categories: &[Category]) -> Result<(), StoreError>;
    async fn find_by_id(&self, id: &str) -> Result<Option<Category>, StoreError>;
    async fn find_all(&self) -> Result<Vec<Category>, StoreError>;
    async fn delete(&self, id: &str) -> Result<(), StoreError>;
}

#[async_trait]
pub trait ProcessingStateStore: Send + Sync {
    async fn upsert(&self, state: &ProcessingState) -> Result<(), StoreError>;

    async fn find_by_transaction(
        &self,
        id: &TransactionId,
    ) -> Result<Option<ProcessingState>, StoreError>;

    async fn find_by_account(
        &self,
        account: &AccountId,
    ) -> Result<Vec<ProcessingState>, StoreError>;
}
