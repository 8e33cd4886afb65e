//! In-memory store and source implementations. Used by tests throughout the
//! workspace and usable as a lightweight backend in their own right.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use kasa_core::{
    AccountId, BankSource, BatchStatus, Category, CategoryStore, DateRange, ImportBatch,
    ImportBatchId, ImportBatchStore, ProcessingState, ProcessingStateStore, RawBankRecord,
    SourceError, StoreError, Transaction, TransactionFilter, TransactionId, TransactionStatus,
    TransactionStore,
};

const DEFAULT_MAX_RANGE_DAYS: i64 = 90;

/// Keeps transactions in insertion order and enforces the same natural-key
/// uniqueness the SQLite backend does.
#[derive(Default)]
pub struct MemoryTransactionStore {
    items: Mutex<Vec<Transaction>>,
}

impl MemoryTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TransactionStore for MemoryTransactionStore {
    async fn save(&self, tx: &Transaction) -> Result<(), StoreError> {
        let mut items = self.items.lock().unwrap();
        if items.iter().any(|t| t.id == tx.id) {
            return Err(StoreError::Duplicate(tx.id.to_string()));
        }
        items.push(tx.clone());
        Ok(())
    }

    async fn save_all(&self, txs: &[Transaction]) -> Result<(), StoreError> {
        let mut items = self.items.lock().unwrap();
        // All-or-nothing: check every key before inserting any.
        for tx in txs {
            if items.iter().any(|t| t.id == tx.id) {
                return Err(StoreError::Duplicate(tx.id.to_string()));
            }
        }
        items.extend(txs.iter().cloned());
        Ok(())
    }

    async fn find_by_id(&self, id: &TransactionId) -> Result<Option<Transaction>, StoreError> {
        let items = self.items.lock().unwrap();
        Ok(items.iter().find(|t| &t.id == id).cloned())
    }

    async fn find_by_account_and_range(
        &self,
        account: &AccountId,
        range: &DateRange,
    ) -> Result<Vec<Transaction>, StoreError> {
        let items = self.items.lock().unwrap();
        Ok(items
            .iter()
            .filter(|t| &t.id.account == account && range.contains(t.date))
            .cloned()
            .collect())
    }

    async fn find_by_batch(&self, batch: &ImportBatchId) -> Result<Vec<Transaction>, StoreError> {
        let items = self.items.lock().unwrap();
        Ok(items
            .iter()
            .filter(|t| &t.import_batch_id == batch)
            .cloned()
            .collect())
    }

    async fn find_matching(
        &self,
        filter: &TransactionFilter,
    ) -> Result<Vec<Transaction>, StoreError> {
        let items = self.items.lock().unwrap();
        Ok(items.iter().filter(|t| filter.matches(t)).cloned().collect())
    }

    async fn update_status_by_batch(
        &self,
        batch: &ImportBatchId,
        status: TransactionStatus,
    ) -> Result<usize, StoreError> {
        let mut items = self.items.lock().unwrap();
        let mut updated = 0;
        for tx in items.iter_mut() {
            if &tx.import_batch_id == batch && tx.status.can_advance_to(status) {
                tx.status = status;
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn count_by_status(&self, status: TransactionStatus) -> Result<usize, StoreError> {
        let items = self.items.lock().unwrap();
        Ok(items.iter().filter(|t| t.status == status).count())
    }
}

#[derive(Default)]
pub struct MemoryBatchStore {
    items: Mutex<Vec<ImportBatch>>,
    sequences: Mutex<HashMap<String, i64>>,
}

impl MemoryBatchStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ImportBatchStore for MemoryBatchStore {
    async fn save(&self, batch: &ImportBatch) -> Result<(), StoreError> {
        let mut items = self.items.lock().unwrap();
        match items.iter_mut().find(|b| b.id == batch.id) {
            Some(existing) => *existing = batch.clone(),
            None => items.push(batch.clone()),
        }
        Ok(())
    }

    async fn find_by_id(&self, id: &ImportBatchId) -> Result<Option<ImportBatch>, StoreError> {
        let items = self.items.lock().unwrap();
        Ok(items.iter().find(|b| &b.id == id).cloned())
    }

    async fn find_by_account(&self, account: &AccountId) -> Result<Vec<ImportBatch>, StoreError> {
        let items = self.items.lock().unwrap();
        Ok(items
            .iter()
            .filter(|b| &b.account == account)
            .cloned()
            .collect())
    }

    async fn find_most_recent_by_account(
        &self,
        account: &AccountId,
    ) -> Result<Option<ImportBatch>, StoreError> {
        let items = self.items.lock().unwrap();
        Ok(items
            .iter()
            .filter(|b| &b.account == account)
            .max_by_key(|b| b.id.sequence)
            .cloned())
    }

    async fn find_by_status(&self, status: BatchStatus) -> Result<Vec<ImportBatch>, StoreError> {
        let items = self.items.lock().unwrap();
        Ok(items.iter().filter(|b| b.status == status).cloned().collect())
    }

    async fn find_by_range(&self, range: &DateRange) -> Result<Vec<ImportBatch>, StoreError> {
        let items = self.items.lock().unwrap();
        Ok(items
            .iter()
            .filter(|b| b.range.start() <= range.end() && b.range.end() >= range.start())
            .cloned()
            .collect())
    }

    async fn next_sequence_number(&self, account: &AccountId) -> Result<i64, StoreError> {
        let mut sequences = self.sequences.lock().unwrap();
        let next = sequences.entry(account.to_string()).or_insert(0);
        *next += 1;
        Ok(*next)
    }
}

#[derive(Default)]
pub struct MemoryCategoryStore {
    items: Mutex<HashMap<String, Category>>,
}

impl MemoryCategoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CategoryStore for MemoryCategoryStore {
    async fn save(&self, category: &Category) -> Result<(), StoreError> {
        let mut items = self.items.lock().unwrap();
        items.insert(category.id.clone(), category.clone());
        Ok(())
    }

    async fn save_all(&self, categories: &[Category]) -> Result<(), StoreError> {
        let mut items = self.items.lock().unwrap();
        for category in categories {
            items.insert(category.id.clone(), category.clone());
        }
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Category>, StoreError> {
        let items = self.items.lock().unwrap();
        Ok(items.get(id).cloned())
    }

    async fn find_all(&self) -> Result<Vec<Category>, StoreError> {
        let items = self.items.lock().unwrap();
        let mut all: Vec<Category> = items.values().cloned().collect();
        all.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(all)
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let mut items = self.items.lock().unwrap();
        items
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NotFound(id.to_string()))
    }
}

#[derive(Default)]
pub struct MemoryStateStore {
    items: Mutex<HashMap<TransactionId, ProcessingState>>,
}

impl MemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ProcessingStateStore for MemoryStateStore {
    async fn upsert(&self, state: &ProcessingState) -> Result<(), StoreError> {
        let mut items = self.items.lock().unwrap();
        items.insert(state.transaction_id.clone(), state.clone());
        Ok(())
    }

    async fn find_by_transaction(
        &self,
        id: &TransactionId,
    ) -> Result<Option<ProcessingState>, StoreError> {
        let items = self.items.lock().unwrap();
        Ok(items.get(id).cloned())
    }

    async fn find_by_account(
        &self,
        account: &AccountId,
    ) -> Result<Vec<ProcessingState>, StoreError> {
        let items = self.items.lock().unwrap();
        Ok(items
            .values()
            .filter(|s| &s.transaction_id.account == account)
            .cloned()
            .collect())
    }
}

/// Programmable bank source: serves a canned record set or a canned failure,
/// and counts fetches so tests can assert call behaviour.
pub struct MockBankSource {
    records: Mutex<Vec<RawBankRecord>>,
    failure: Mutex<Option<SourceError>>,
    max_range_days: i64,
    fetches: AtomicUsize,
}

impl MockBankSource {
    pub fn with_records(records: Vec<RawBankRecord>) -> Self {
        MockBankSource {
            records: Mutex::new(records),
            failure: Mutex::new(None),
            max_range_days: DEFAULT_MAX_RANGE_DAYS,
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn failing(error: SourceError) -> Self {
        MockBankSource {
            records: Mutex::new(Vec::new()),
            failure: Mutex::new(Some(error)),
            max_range_days: DEFAULT_MAX_RANGE_DAYS,
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn set_records(&self, records: Vec<RawBankRecord>) {
        *self.records.lock().unwrap() = records;
    }

    pub fn set_failure(&self, error: Option<SourceError>) {
        *self.failure.lock().unwrap() = error;
    }

    pub fn fetch_calls(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl BankSource for MockBankSource {
    fn validate_range(&self, range: &DateRange) -> Result<(), SourceError> {
        if range.days() > self.max_range_days {
            return Err(SourceError::InvalidRange(format!(
                "range spans {} days, maximum is {}",
                range.days(),
                self.max_range_days
            )));
        }
        Ok(())
    }

    async fn fetch(
        &self,
        _account: &AccountId,
        range: &DateRange,
    ) -> Result<Vec<RawBankRecord>, SourceError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if let Some(error) = self.failure.lock().unwrap().clone() {
            return Err(error);
        }
        let records = self.records.lock().unwrap();
        Ok(records
            .iter()
            .filter(|r| r.date.map(|d| range.contains(d)).unwrap_or(true))
            .cloned()
            .collect())
    }
}
