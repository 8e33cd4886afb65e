use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;

use kasa_core::{
    AccountId, BankSource, BatchStateError, DateRange, ImportBatch, ImportBatchId,
    ImportBatchStore, SourceError, StoreError, TransactionStore,
};

use crate::mapper::map_record;
use crate::reconcile::reconcile;

#[derive(Debug, Error)]
pub enum ImportError {
    #[error(transparent)]
    Source(#[from] SourceError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Batch(#[from] BatchStateError),
}

/// Runs one import: validate range, open a batch, fetch, map, reconcile,
/// persist the new transactions, finalize the batch. Source and store
/// failures after the batch is opened are captured into the batch record so
/// every attempt leaves an auditable trail.
pub struct ImportService {
    source: Arc<dyn BankSource>,
    transactions: Arc<dyn TransactionStore>,
    batches: Arc<dyn ImportBatchStore>,
}

impl ImportService {
    pub fn new(
        source: Arc<dyn BankSource>,
        transactions: Arc<dyn TransactionStore>,
        batches: Arc<dyn ImportBatchStore>,
    ) -> Self {
        ImportService {
            source,
            transactions,
            batches,
        }
    }

    pub async fn import(
        &self,
        account: &AccountId,
        range: DateRange,
    ) -> Result<ImportBatch, ImportError> {
        // Range problems surface directly; no batch exists yet.
        self.source.validate_range(&range)?;

        let sequence = self.batches.next_sequence_number(account).await?;
        let batch_id = ImportBatchId::new(account.to_string(), sequence);
        let now = Utc::now();
        let mut batch = ImportBatch::start(batch_id.clone(), account.clone(), range, now);
        self.batches.save(&batch).await?;
        tracing::info!(batch = %batch.id, %range, "import started");

        let raw = match self.source.fetch(account, &range).await {
            Ok(records) => records,
            Err(e) => {
                tracing::warn!(batch = %batch.id, error = %e, "bank fetch failed");
                return self.finalize_failed(batch, e.to_string()).await;
            }
        };

        let mut mapped = Vec::with_capacity(raw.len());
        let mut map_failures = 0usize;
        for record in &raw {
            match map_record(record, account, &batch_id, now) {
                Ok(tx) => mapped.push(tx),
                Err(e) => {
                    map_failures += 1;
                    tracing::warn!(batch = %batch.id, error = %e, "skipping unmappable record");
                }
            }
        }

        let existing = match self
            .transactions
            .find_by_account_and_range(account, &range)
            .await
        {
            Ok(txs) => txs,
            Err(e) => return self.finalize_failed(batch, e.to_string()).await,
        };

        let result = reconcile(mapped, &existing);
        if !result.new.is_empty() {
            if let Err(e) = self.transactions.save_all(&result.new).await {
                return self.finalize_failed(batch, e.to_string()).await;
            }
        }

        let total = result.total();
        let message = completion_message(total, result.duplicates, map_failures);
        batch.complete(total, message, Utc::now())?;
        self.batches.save(&batch).await?;
        tracing::info!(
            batch = %batch.id,
            total,
            new = result.new.len(),
            duplicates = result.duplicates,
            map_failures,
            "import completed"
        );
        Ok(batch)
    }

    async fn finalize_failed(
        &self,
        mut batch: ImportBatch,
        error: String,
    ) -> Result<ImportBatch, ImportError> {
        batch.fail(error, Utc::now())?;
        self.batches.save(&batch).await?;
        Ok(batch)
    }
}

fn completion_message(total: usize, duplicates: usize, map_failures: usize) -> Option<String> {
    let mut parts = Vec::new();
    if duplicates > 0 {
        if duplicates == total {
            parts.push(format!("All {total} transactions were already imported"));
        } else {
            parts.push(format!(
                "Imported {} new transactions, skipped {} duplicates",
                total - duplicates,
                duplicates
            ));
        }
    }
    if map_failures > 0 {
        parts.push(format!("{map_failures} records failed mapping"));
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("; "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryBatchStore, MemoryTransactionStore, MockBankSource};
    use chrono::NaiveDate;
    use kasa_core::{BatchStatus, RawBankRecord, TransactionStatus};
    use rust_decimal::Decimal;

    fn account() -> AccountId {
        AccountId::new("2010", "123456789").unwrap()
    }

    fn range() -> DateRange {
        DateRange::new(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
        )
        .unwrap()
    }

    fn record(external_id: &str) -> RawBankRecord {
        RawBankRecord {
            date: NaiveDate::from_ymd_opt(2024, 1, 15),
            amount: Some(Decimal::from(100)),
            currency: Some("CZK".to_string()),
            transaction_type: Some("Card payment".to_string()),
            comment: Some("TEST".to_string()),
            external_id: Some(external_id.to_string()),
            ..Default::default()
        }
    }

    fn records(n: usize) -> Vec<RawBankRecord> {
        (1..=n).map(|i| record(&format!("tx-{i}"))).collect()
    }

    struct Fixture {
        source: Arc<MockBankSource>,
        transactions: Arc<MemoryTransactionStore>,
        batches: Arc<MemoryBatchStore>,
        service: ImportService,
    }

    fn fixture(source: MockBankSource) -> Fixture {
        let source = Arc::new(source);
        let transactions = Arc::new(MemoryTransactionStore::new());
        let batches = Arc::new(MemoryBatchStore::new());
        let service = ImportService::new(
            source.clone(),
            transactions.clone(),
            batches.clone(),
        );
        Fixture {
            source,
            transactions,
            batches,
            service,
        }
    }

    #[tokio::test]
    async fn successful_import_persists_and_completes() {
        let f = fixture(MockBankSource::with_records(records(5)));
        let batch = f.service.import(&account(), range()).await.unwrap();

        assert_eq!(batch.status, BatchStatus::Completed);
        assert_eq!(batch.transaction_count, 5);
        assert!(batch.error_message.is_none());
        assert!(batch.end_time.is_some());

        let stored = f.transactions.find_by_batch(&batch.id).await.unwrap();
        assert_eq!(stored.len(), 5);
        assert!(stored.iter().all(|t| t.status == TransactionStatus::Imported));
    }

    #[tokio::test]
    async fn second_run_skips_everything_as_duplicates() {
        let f = fixture(MockBankSource::with_records(records(5)));

        let first = f.service.import(&account(), range()).await.unwrap();
        assert_eq!(first.transaction_count, 5);
        assert!(first.error_message.is_none());

        let second = f.service.import(&account(), range()).await.unwrap();
        assert_eq!(second.status, BatchStatus::Completed);
        assert_eq!(second.transaction_count, 5);
        assert_eq!(
            second.error_message.as_deref(),
            Some("All 5 transactions were already imported")
        );

        // Total stored is still 5; nothing was inserted under the second batch.
        let all = f
            .transactions
            .find_by_account_and_range(&account(), &range())
            .await
            .unwrap();
        assert_eq!(all.len(), 5);
        assert!(f
            .transactions
            .find_by_batch(&second.id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn partial_duplicates_reported_in_message() {
        let f = fixture(MockBankSource::with_records(records(5)));
        f.service.import(&account(), range()).await.unwrap();

        f.source.set_records(records(10));
        let batch = f.service.import(&account(), range()).await.unwrap();

        assert_eq!(batch.transaction_count, 10);
        assert_eq!(
            batch.error_message.as_deref(),
            Some("Imported 5 new transactions, skipped 5 duplicates")
        );
        let all = f
            .transactions
            .find_by_account_and_range(&account(), &range())
            .await
            .unwrap();
        assert_eq!(all.len(), 10);
        assert_eq!(f.transactions.find_by_batch(&batch.id).await.unwrap().len(), 5);
    }

    #[tokio::test]
    async fn source_failure_finalizes_batch_as_failed() {
        let f = fixture(MockBankSource::failing(SourceError::Connection(
            "connection refused".to_string(),
        )));
        let batch = f.service.import(&account(), range()).await.unwrap();

        assert_eq!(batch.status, BatchStatus::Failed);
        assert!(batch
            .error_message
            .as_deref()
            .unwrap()
            .contains("connection refused"));
        assert!(batch.end_time.is_some());
        assert!(f
            .transactions
            .find_by_account_and_range(&account(), &range())
            .await
            .unwrap()
            .is_empty());

        // The failed batch is persisted, not just returned.
        let stored = f.batches.find_by_id(&batch.id).await.unwrap().unwrap();
        assert_eq!(stored.status, BatchStatus::Failed);
    }

    #[tokio::test]
    async fn invalid_range_creates_no_batch() {
        let source = MockBankSource::with_records(records(1));
        let f = fixture(source);
        let wide = DateRange::new(
            NaiveDate::from_ymd_opt(2023, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
        )
        .unwrap();

        let err = f.service.import(&account(), wide).await.unwrap_err();
        assert!(matches!(err, ImportError::Source(SourceError::InvalidRange(_))));
        assert!(f.batches.find_by_account(&account()).await.unwrap().is_empty());
        assert_eq!(f.source.fetch_calls(), 0);
    }

    #[tokio::test]
    async fn unmappable_records_are_skipped_and_counted() {
        let mut recs = records(3);
        recs.push(RawBankRecord::default()); // no mandatory fields at all
        let f = fixture(MockBankSource::with_records(recs));

        let batch = f.service.import(&account(), range()).await.unwrap();
        assert_eq!(batch.status, BatchStatus::Completed);
        assert_eq!(batch.transaction_count, 3);
        assert_eq!(
            batch.error_message.as_deref(),
            Some("1 records failed mapping")
        );
        assert_eq!(f.transactions.find_by_batch(&batch.id).await.unwrap().len(), 3);
    }

    #[tokio::test]
    async fn sequence_numbers_increase_per_account() {
        let f = fixture(MockBankSource::with_records(records(1)));
        let first = f.service.import(&account(), range()).await.unwrap();
        let second = f.service.import(&account(), range()).await.unwrap();
        assert_eq!(first.id.sequence, 1);
        assert_eq!(second.id.sequence, 2);

        let recent = f
            .batches
            .find_most_recent_by_account(&account())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(recent.id, second.id);
    }

    #[test]
    fn completion_message_variants() {
        assert_eq!(completion_message(5, 0, 0), None);
        assert_eq!(
            completion_message(5, 5, 0).as_deref(),
            Some("All 5 transactions were already imported")
        );
        assert_eq!(
            completion_message(10, 5, 0).as_deref(),
            Some("Imported 5 new transactions, skipped 5 duplicates")
        );
        assert_eq!(
            completion_message(3, 0, 2).as_deref(),
            Some("2 records failed mapping")
        );
        assert_eq!(
            completion_message(4, 4, 1).as_deref(),
            Some("All 4 transactions were already imported; 1 records failed mapping")
        );
        assert_eq!(completion_message(0, 0, 0), None);
    }
}
