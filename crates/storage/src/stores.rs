use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;

use kasa_core::{
    AccountId, BatchStatus, Category, CategoryStore, Currency, DateRange, ImportBatch,
    ImportBatchId, ImportBatchStore, Money, ProcessingState, ProcessingStateStore, StoreError,
    Transaction, TransactionFilter, TransactionId, TransactionStatus, TransactionStore,
};

use crate::db::DbPool;

fn map_sqlx(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db) = &e {
        if db.is_unique_violation() {
            return StoreError::Duplicate(db.message().to_string());
        }
    }
    StoreError::Backend(e.to_string())
}

fn corrupt(what: &str, value: &str) -> StoreError {
    StoreError::Backend(format!("corrupt {what} in row: '{value}'"))
}

fn parse_date(s: &str) -> Result<NaiveDate, StoreError> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| corrupt("date", s))
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| corrupt("timestamp", s))
}

fn parse_amount(s: &str) -> Result<Decimal, StoreError> {
    Decimal::from_str(s).map_err(|_| corrupt("amount", s))
}

fn parse_tx_status(s: &str) -> Result<TransactionStatus, StoreError> {
    match s {
        "Imported" => Ok(TransactionStatus::Imported),
        "Categorized" => Ok(TransactionStatus::Categorized),
        "Submitted" => Ok(TransactionStatus::Submitted),
        other => Err(corrupt("transaction status", other)),
    }
}

fn parse_batch_status(s: &str) -> Result<BatchStatus, StoreError> {
    match s {
        "Started" => Ok(BatchStatus::Started),
        "Completed" => Ok(BatchStatus::Completed),
        "Failed" => Ok(BatchStatus::Failed),
        other => Err(corrupt("batch status", other)),
    }
}

// ── Transactions ──────────────────────────────────────────────────────────────

type TransactionRow = (
    String,         // bank_id
    String,         // bank_account_id
    String,         // external_id
    String,         // date
    String,         // amount
    String,         // currency
    String,         // description
    Option<String>, // counterparty
    Option<String>, // counter_account
    Option<String>, // reference
    String,         // batch_prefix
    i64,            // batch_seq
    String,         // status
    String,         // created_at
    String,         // updated_at
);

const TRANSACTION_COLUMNS: &str = "bank_id, bank_account_id, external_id, date, amount, \
     currency, description, counterparty, counter_account, reference, batch_prefix, \
     batch_seq, status, created_at, updated_at";

fn row_to_transaction(r: TransactionRow) -> Result<Transaction, StoreError> {
    let account = AccountId::new(&r.0, &r.1).map_err(|e| corrupt("account id", &e.to_string()))?;
    Ok(Transaction {
        id: TransactionId::new(account, r.2),
        date: parse_date(&r.3)?,
        amount: Money::new(parse_amount(&r.4)?, Currency::new(&r.5)),
        description: r.6,
        counterparty: r.7,
        counter_account: r.8,
        reference: r.9,
        import_batch_id: ImportBatchId::new(r.10, r.11),
        status: parse_tx_status(&r.12)?,
        created_at: parse_timestamp(&r.13)?,
        updated_at: parse_timestamp(&r.14)?,
    })
}

pub struct SqliteTransactionStore {
    pool: DbPool,
}

impl SqliteTransactionStore {
    pub fn new(pool: DbPool) -> Self {
        SqliteTransactionStore { pool }
    }
}

fn insert_transaction_query(tx: &Transaction) -> sqlx::query::Query<'_, sqlx::Sqlite, sqlx::sqlite::SqliteArguments<'_>> {
    sqlx::query(
        "INSERT INTO transactions (bank_id, bank_account_id, external_id, date, amount, \
         currency, description, counterparty, counter_account, reference, batch_prefix, \
         batch_seq, status, created_at, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(tx.id.account.bank_id())
    .bind(tx.id.account.bank_account_id())
    .bind(&tx.id.external_id)
    .bind(tx.date.to_string())
    .bind(tx.amount.amount().to_string())
    .bind(tx.amount.currency().code())
    .bind(&tx.description)
    .bind(&tx.counterparty)
    .bind(&tx.counter_account)
    .bind(&tx.reference)
    .bind(&tx.import_batch_id.account_prefix)
    .bind(tx.import_batch_id.sequence)
    .bind(tx.status.to_string())
    .bind(tx.created_at.to_rfc3339())
    .bind(tx.updated_at.to_rfc3339())
}

#[async_trait]
impl TransactionStore for SqliteTransactionStore {
    async fn save(&self, tx: &Transaction) -> Result<(), StoreError> {
        insert_transaction_query(tx)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(())
    }

    async fn save_all(&self, txs: &[Transaction]) -> Result<(), StoreError> {
        // One database transaction; a conflict rolls the whole insert back.
        let mut db_tx = self.pool.begin().await.map_err(map_sqlx)?;
        for tx in txs {
            insert_transaction_query(tx)
                .execute(&mut *db_tx)
                .await
                .map_err(map_sqlx)?;
        }
        db_tx.commit().await.map_err(map_sqlx)?;
        Ok(())
    }

    async fn find_by_id(&self, id: &TransactionId) -> Result<Option<Transaction>, StoreError> {
        let row = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions \
             WHERE bank_id = ? AND bank_account_id = ? AND external_id = ?"
        ))
        .bind(id.account.bank_id())
        .bind(id.account.bank_account_id())
        .bind(&id.external_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;

        row.map(row_to_transaction).transpose()
    }

    async fn find_by_account_and_range(
        &self,
        account: &AccountId,
        range: &DateRange,
    ) -> Result<Vec<Transaction>, StoreError> {
        let rows = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions \
             WHERE bank_id = ? AND bank_account_id = ? AND date >= ? AND date <= ? \
             ORDER BY date, id"
        ))
        .bind(account.bank_id())
        .bind(account.bank_account_id())
        .bind(range.start().to_string())
        .bind(range.end().to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;

        rows.into_iter().map(row_to_transaction).collect()
    }

    async fn find_by_batch(&self, batch: &ImportBatchId) -> Result<Vec<Transaction>, StoreError> {
        let rows = sqlx::query_as::<_, TransactionRow>(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM transactions \
             WHERE batch_prefix = ? AND batch_seq = ? ORDER BY id"
        ))
        .bind(&batch.account_prefix)
        .bind(batch.sequence)
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;

        rows.into_iter().map(row_to_transaction).collect()
    }

    async fn find_matching(
        &self,
        filter: &TransactionFilter,
    ) -> Result<Vec<Transaction>, StoreError> {
        // Account narrows in SQL; the substring fields reuse the same
        // matching rules as the in-memory store.
        let rows = match &filter.account {
            Some(account) => {
                sqlx::query_as::<_, TransactionRow>(&format!(
                    "SELECT {TRANSACTION_COLUMNS} FROM transactions \
                     WHERE bank_id = ? AND bank_account_id = ? ORDER BY id"
                ))
                .bind(account.bank_id())
                .bind(account.bank_account_id())
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query_as::<_, TransactionRow>(&format!(
                    "SELECT {TRANSACTION_COLUMNS} FROM transactions ORDER BY id"
                ))
                .fetch_all(&self.pool)
                .await
            }
        }
        .map_err(map_sqlx)?;

        let txs: Result<Vec<Transaction>, StoreError> =
            rows.into_iter().map(row_to_transaction).collect();
        Ok(txs?.into_iter().filter(|t| filter.matches(t)).collect())
    }

    async fn update_status_by_batch(
        &self,
        batch: &ImportBatchId,
        status: TransactionStatus,
    ) -> Result<usize, StoreError> {
        use TransactionStatus::*;
        let preceding: Vec<String> = [Imported, Categorized, Submitted]
            .iter()
            .filter(|s| s.can_advance_to(status))
            .map(|s| format!("'{s}'"))
            .collect();
        if preceding.is_empty() {
            return Ok(0);
        }

        let result = sqlx::query(&format!(
            "UPDATE transactions SET status = ?, updated_at = ? \
             WHERE batch_prefix = ? AND batch_seq = ? AND status IN ({})",
            preceding.join(", ")
        ))
        .bind(status.to_string())
        .bind(Utc::now().to_rfc3339())
        .bind(&batch.account_prefix)
        .bind(batch.sequence)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;

        Ok(result.rows_affected() as usize)
    }

    async fn count_by_status(&self, status: TransactionStatus) -> Result<usize, StoreError> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM transactions WHERE status = ?")
                .bind(status.to_string())
                .fetch_one(&self.pool)
                .await
                .map_err(map_sqlx)?;
        Ok(count as usize)
    }
}

// ── Import batches ────────────────────────────────────────────────────────────

type BatchRow = (
    String,         // batch_prefix
    i64,            // batch_seq
    String,         // bank_id
    String,         // bank_account_id
    String,         // start_date
    String,         // end_date
    String,         // status
    i64,            // transaction_count
    Option<String>, // error_message
    String,         // start_time
    Option<String>, // end_time
    String,         // created_at
    String,         // updated_at
);

const BATCH_COLUMNS: &str = "batch_prefix, batch_seq, bank_id, bank_account_id, start_date, \
     end_date, status, transaction_count, error_message, start_time, end_time, created_at, \
     updated_at";

fn row_to_batch(r: BatchRow) -> Result<ImportBatch, StoreError> {
    let account = AccountId::new(&r.2, &r.3).map_err(|e| corrupt("account id", &e.to_string()))?;
    let range = DateRange::new(parse_date(&r.4)?, parse_date(&r.5)?)
        .map_err(|e| corrupt("date range", &e.to_string()))?;
    Ok(ImportBatch {
        id: ImportBatchId::new(r.0, r.1),
        account,
        range,
        status: parse_batch_status(&r.6)?,
        transaction_count: r.7 as usize,
        error_message: r.8,
        start_time: parse_timestamp(&r.9)?,
        end_time: r.10.as_deref().map(parse_timestamp).transpose()?,
        created_at: parse_timestamp(&r.11)?,
        updated_at: parse_timestamp(&r.12)?,
    })
}

pub struct SqliteBatchStore {
    pool: DbPool,
}

impl SqliteBatchStore {
    pub fn new(pool: DbPool) -> Self {
        SqliteBatchStore { pool }
    }
}

#[async_trait]
impl ImportBatchStore for SqliteBatchStore {
    async fn save(&self, batch: &ImportBatch) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO import_batches (batch_prefix, batch_seq, bank_id, bank_account_id, \
             start_date, end_date, status, transaction_count, error_message, start_time, \
             end_time, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT (batch_prefix, batch_seq) DO UPDATE SET \
             status = excluded.status, \
             transaction_count = excluded.transaction_count, \
             error_message = excluded.error_message, \
             end_time = excluded.end_time, \
             updated_at = excluded.updated_at",
        )
        .bind(&batch.id.account_prefix)
        .bind(batch.id.sequence)
        .bind(batch.account.bank_id())
        .bind(batch.account.bank_account_id())
        .bind(batch.range.start().to_string())
        .bind(batch.range.end().to_string())
        .bind(batch.status.to_string())
        .bind(batch.transaction_count as i64)
        .bind(&batch.error_message)
        .bind(batch.start_time.to_rfc3339())
        .bind(batch.end_time.map(|t| t.to_rfc3339()))
        .bind(batch.created_at.to_rfc3339())
        .bind(batch.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn find_by_id(&self, id: &ImportBatchId) -> Result<Option<ImportBatch>, StoreError> {
        let row = sqlx::query_as::<_, BatchRow>(&format!(
            "SELECT {BATCH_COLUMNS} FROM import_batches \
             WHERE batch_prefix = ? AND batch_seq = ?"
        ))
        .bind(&id.account_prefix)
        .bind(id.sequence)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;

        row.map(row_to_batch).transpose()
    }

    async fn find_by_account(&self, account: &AccountId) -> Result<Vec<ImportBatch>, StoreError> {
        let rows = sqlx::query_as::<_, BatchRow>(&format!(
            "SELECT {BATCH_COLUMNS} FROM import_batches \
             WHERE bank_id = ? AND bank_account_id = ? ORDER BY batch_seq"
        ))
        .bind(account.bank_id())
        .bind(account.bank_account_id())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;

        rows.into_iter().map(row_to_batch).collect()
    }

    async fn find_most_recent_by_account(
        &self,
        account: &AccountId,
    ) -> Result<Option<ImportBatch>, StoreError> {
        let row = sqlx::query_as::<_, BatchRow>(&format!(
            "SELECT {BATCH_COLUMNS} FROM import_batches \
             WHERE bank_id = ? AND bank_account_id = ? ORDER BY batch_seq DESC LIMIT 1"
        ))
        .bind(account.bank_id())
        .bind(account.bank_account_id())
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;

        row.map(row_to_batch).transpose()
    }

    async fn find_by_status(&self, status: BatchStatus) -> Result<Vec<ImportBatch>, StoreError> {
        let rows = sqlx::query_as::<_, BatchRow>(&format!(
            "SELECT {BATCH_COLUMNS} FROM import_batches WHERE status = ? \
             ORDER BY batch_prefix, batch_seq"
        ))
        .bind(status.to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;

        rows.into_iter().map(row_to_batch).collect()
    }

    async fn find_by_range(&self, range: &DateRange) -> Result<Vec<ImportBatch>, StoreError> {
        let rows = sqlx::query_as::<_, BatchRow>(&format!(
            "SELECT {BATCH_COLUMNS} FROM import_batches \
             WHERE start_date <= ? AND end_date >= ? ORDER BY batch_prefix, batch_seq"
        ))
        .bind(range.end().to_string())
        .bind(range.start().to_string())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;

        rows.into_iter().map(row_to_batch).collect()
    }

    async fn next_sequence_number(&self, account: &AccountId) -> Result<i64, StoreError> {
        // Upsert counter; the single statement keeps allocation atomic
        // per account.
        let next: i64 = sqlx::query_scalar(
            "INSERT INTO batch_sequences (account, next_seq) VALUES (?, 1) \
             ON CONFLICT (account) DO UPDATE SET next_seq = next_seq + 1 \
             RETURNING next_seq",
        )
        .bind(account.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(next)
    }
}

// ── Categories ────────────────────────────────────────────────────────────────

pub struct SqliteCategoryStore {
    pool: DbPool,
}

impl SqliteCategoryStore {
    pub fn new(pool: DbPool) -> Self {
        SqliteCategoryStore { pool }
    }

    async fn insert(&self, category: &Category) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO categories (id, name, parent_id) VALUES (?, ?, ?) \
             ON CONFLICT (id) DO UPDATE SET name = excluded.name, \
             parent_id = excluded.parent_id",
        )
        .bind(&category.id)
        .bind(&category.name)
        .bind(&category.parent_id)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }
}

#[async_trait]
impl CategoryStore for SqliteCategoryStore {
    async fn save(&self, category: &Category) -> Result<(), StoreError> {
        self.insert(category).await
    }

    async fn save_all(&self, categories: &[Category]) -> Result<(), StoreError> {
        for category in categories {
            self.insert(category).await?;
        }
        Ok(())
    }

    async fn find_by_id(&self, id: &str) -> Result<Option<Category>, StoreError> {
        let row = sqlx::query_as::<_, (String, String, Option<String>)>(
            "SELECT id, name, parent_id FROM categories WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;

        Ok(row.map(|(id, name, parent_id)| Category {
            id,
            name,
            parent_id,
        }))
    }

    async fn find_all(&self) -> Result<Vec<Category>, StoreError> {
        let rows = sqlx::query_as::<_, (String, String, Option<String>)>(
            "SELECT id, name, parent_id FROM categories ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;

        Ok(rows
            .into_iter()
            .map(|(id, name, parent_id)| Category {
                id,
                name,
                parent_id,
            })
            .collect())
    }

    async fn delete(&self, id: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM categories WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx)?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id.to_string()));
        }
        Ok(())
    }
}

// ── Processing states ─────────────────────────────────────────────────────────

type StateRow = (
    String,         // bank_id
    String,         // bank_account_id
    String,         // external_id
    Option<String>, // suggested_category
    Option<f64>,    // suggested_confidence
    Option<String>, // override_category
    Option<String>, // suggested_payee
    Option<String>, // override_payee
    Option<String>, // suggested_memo
    Option<String>, // override_memo
    String,         // created_at
    String,         // updated_at
);

const STATE_COLUMNS: &str = "bank_id, bank_account_id, external_id, suggested_category, \
     suggested_confidence, override_category, suggested_payee, override_payee, \
     suggested_memo, override_memo, created_at, updated_at";

fn row_to_state(r: StateRow) -> Result<ProcessingState, StoreError> {
    let account = AccountId::new(&r.0, &r.1).map_err(|e| corrupt("account id", &e.to_string()))?;
    Ok(ProcessingState {
        transaction_id: TransactionId::new(account, r.2),
        suggested_category: r.3,
        suggested_confidence: r.4.map(|c| c as f32),
        override_category: r.5,
        suggested_payee: r.6,
        override_payee: r.7,
        suggested_memo: r.8,
        override_memo: r.9,
        created_at: parse_timestamp(&r.10)?,
        updated_at: parse_timestamp(&r.11)?,
    })
}

pub struct SqliteStateStore {
    pool: DbPool,
}

impl SqliteStateStore {
    pub fn new(pool: DbPool) -> Self {
        SqliteStateStore { pool }
    }
}

#[async_trait]
impl ProcessingStateStore for SqliteStateStore {
    async fn upsert(&self, state: &ProcessingState) -> Result<(), StoreError> {
        sqlx::query(
            "INSERT INTO processing_states (bank_id, bank_account_id, external_id, \
             suggested_category, suggested_confidence, override_category, suggested_payee, \
             override_payee, suggested_memo, override_memo, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT (bank_id, bank_account_id, external_id) DO UPDATE SET \
             suggested_category = excluded.suggested_category, \
             suggested_confidence = excluded.suggested_confidence, \
             override_category = excluded.override_category, \
             suggested_payee = excluded.suggested_payee, \
             override_payee = excluded.override_payee, \
             suggested_memo = excluded.suggested_memo, \
             override_memo = excluded.override_memo, \
             updated_at = excluded.updated_at",
        )
        .bind(state.transaction_id.account.bank_id())
        .bind(state.transaction_id.account.bank_account_id())
        .bind(&state.transaction_id.external_id)
        .bind(&state.suggested_category)
        .bind(state.suggested_confidence.map(|c| c as f64))
        .bind(&state.override_category)
        .bind(&state.suggested_payee)
        .bind(&state.override_payee)
        .bind(&state.suggested_memo)
        .bind(&state.override_memo)
        .bind(state.created_at.to_rfc3339())
        .bind(state.updated_at.to_rfc3339())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx)?;
        Ok(())
    }

    async fn find_by_transaction(
        &self,
        id: &TransactionId,
    ) -> Result<Option<ProcessingState>, StoreError> {
        let row = sqlx::query_as::<_, StateRow>(&format!(
            "SELECT {STATE_COLUMNS} FROM processing_states \
             WHERE bank_id = ? AND bank_account_id = ? AND external_id = ?"
        ))
        .bind(id.account.bank_id())
        .bind(id.account.bank_account_id())
        .bind(&id.external_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(map_sqlx)?;

        row.map(row_to_state).transpose()
    }

    async fn find_by_account(
        &self,
        account: &AccountId,
    ) -> Result<Vec<ProcessingState>, StoreError> {
        let rows = sqlx::query_as::<_, StateRow>(&format!(
            "SELECT {STATE_COLUMNS} FROM processing_states \
             WHERE bank_id = ? AND bank_account_id = ? ORDER BY external_id"
        ))
        .bind(account.bank_id())
        .bind(account.bank_account_id())
        .fetch_all(&self.pool)
        .await
        .map_err(map_sqlx)?;

        rows.into_iter().map(row_to_state).collect()
    }
}
