use std::str::FromStr;
use std::sync::Arc;

use chrono::NaiveDate;
use thiserror::Error;

use kasa_core::{
    AccountId, AccountIdError, BankSource, BatchStatus, Category, CategoryStore, DateRange,
    DateRangeError, ImportBatch, ImportBatchId, ImportBatchStore, StoreError, TransactionId,
};
use kasa_import::{CategorizationService, CategorizeError, FioClient, ImportError, ImportService};
use kasa_storage::{
    create_db, SqliteBatchStore, SqliteCategoryStore, SqliteStateStore, SqliteTransactionStore,
};

use crate::config::{AppConfig, ConfigError};

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("database error: {0}")]
    Db(#[from] sqlx::Error),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Import(#[from] ImportError),
    #[error(transparent)]
    Categorize(#[from] CategorizeError),
    #[error(transparent)]
    Account(#[from] AccountIdError),
    #[error(transparent)]
    Range(#[from] DateRangeError),
    #[error("invalid date '{0}': expected YYYY-MM-DD")]
    InvalidDate(String),
    #[error("invalid batch id '{0}': expected ACCOUNT/BANK-SEQ")]
    InvalidBatchId(String),
    #[error("invalid transaction id '{0}': expected ACCOUNT/BANK:EXTERNAL_ID")]
    InvalidTransactionId(String),
    #[error("unknown category: {0}")]
    UnknownCategory(String),
}

/// Shared handles for one CLI invocation: the sqlite pool wrapped in the
/// concrete stores, plus the loaded configuration.
pub struct AppContext {
    pub config: AppConfig,
    pub transactions: Arc<SqliteTransactionStore>,
    pub batches: Arc<SqliteBatchStore>,
    pub categories: Arc<SqliteCategoryStore>,
    pub states: Arc<SqliteStateStore>,
}

impl AppContext {
    pub async fn init(config: AppConfig) -> Result<Self, AppError> {
        let url = config.database_url()?;
        let pool = create_db(&url).await?;
        tracing::debug!(%url, "database opened");
        let ctx = AppContext {
            transactions: Arc::new(SqliteTransactionStore::new(pool.clone())),
            batches: Arc::new(SqliteBatchStore::new(pool.clone())),
            categories: Arc::new(SqliteCategoryStore::new(pool.clone())),
            states: Arc::new(SqliteStateStore::new(pool)),
            config,
        };
        ctx.seed_categories().await?;
        Ok(ctx)
    }

    /// The sentinel and every category named in the rules must exist before
    /// suggestions or overrides can reference them.
    async fn seed_categories(&self) -> Result<(), AppError> {
        let categorizer = self.config.categorizer();
        let mut seed = vec![Category::uncategorized(), categorizer.default_category];
        seed.extend(categorizer.rules.into_iter().map(|r| r.category));
        self.categories.save_all(&seed).await?;
        Ok(())
    }

    fn categorization_service(&self) -> CategorizationService {
        CategorizationService::new(
            self.transactions.clone(),
            self.states.clone(),
            self.config.categorizer(),
        )
    }
}

fn parse_date(s: &str) -> Result<NaiveDate, AppError> {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").map_err(|_| AppError::InvalidDate(s.to_string()))
}

fn parse_transaction_id(s: &str) -> Result<TransactionId, AppError> {
    let (account, external_id) = s
        .split_once(':')
        .ok_or_else(|| AppError::InvalidTransactionId(s.to_string()))?;
    if external_id.is_empty() {
        return Err(AppError::InvalidTransactionId(s.to_string()));
    }
    let account = AccountId::from_str(account)
        .map_err(|_| AppError::InvalidTransactionId(s.to_string()))?;
    Ok(TransactionId::new(account, external_id))
}

pub async fn import(ctx: &AppContext, account: &str, from: &str, to: &str) -> Result<(), AppError> {
    let token = ctx.config.fio_token()?;
    let source: Arc<dyn BankSource> = match &ctx.config.fio.base_url {
        Some(base_url) => Arc::new(FioClient::with_base_url(base_url, token)),
        None => Arc::new(FioClient::new(token)),
    };
    run_import(ctx, source, account, from, to).await
}

pub(crate) async fn run_import(
    ctx: &AppContext,
    source: Arc<dyn BankSource>,
    account: &str,
    from: &str,
    to: &str,
) -> Result<(), AppError> {
    let account = AccountId::from_str(account)?;
    let range = DateRange::new(parse_date(from)?, parse_date(to)?)?;

    let service = ImportService::new(source, ctx.transactions.clone(), ctx.batches.clone());
    let batch = service.import(&account, range).await?;

    println!("Batch {} {}", batch.id, batch.status);
    match batch.status {
        BatchStatus::Completed => {
            if let Some(message) = &batch.error_message {
                println!("{message}");
            }
        }
        _ => {
            println!(
                "Import failed: {}",
                batch.error_message.as_deref().unwrap_or("unknown error")
            );
        }
    }
    Ok(())
}

pub async fn categorize(ctx: &AppContext, batch: &str) -> Result<(), AppError> {
    let batch_id = ImportBatchId::from_str(batch)
        .map_err(|_| AppError::InvalidBatchId(batch.to_string()))?;
    let count = ctx
        .categorization_service()
        .categorize_batch(&batch_id)
        .await?;
    println!("Categorized {count} transactions in batch {batch_id}");
    Ok(())
}

pub async fn batches(ctx: &AppContext, account: Option<&str>) -> Result<(), AppError> {
    let batches = match account {
        Some(account) => {
            let account = AccountId::from_str(account)?;
            ctx.batches.find_by_account(&account).await?
        }
        None => {
            let mut all = Vec::new();
            for status in [BatchStatus::Started, BatchStatus::Completed, BatchStatus::Failed] {
                all.extend(ctx.batches.find_by_status(status).await?);
            }
            all.sort_by(|a, b| {
                (&a.id.account_prefix, a.id.sequence).cmp(&(&b.id.account_prefix, b.id.sequence))
            });
            all
        }
    };

    if batches.is_empty() {
        println!("No import batches");
        return Ok(());
    }
    for batch in &batches {
        print_batch(batch);
    }
    Ok(())
}

fn print_batch(batch: &ImportBatch) {
    println!(
        "{}  {}  {}  {} transactions{}",
        batch.id,
        batch.status,
        batch.range,
        batch.transaction_count,
        batch
            .error_message
            .as_deref()
            .map(|m| format!("  ({m})"))
            .unwrap_or_default()
    );
}

pub async fn set_category(
    ctx: &AppContext,
    tx: &str,
    category: &str,
    memo: Option<String>,
    payee: Option<String>,
) -> Result<(), AppError> {
    let id = parse_transaction_id(tx)?;
    let category = ctx
        .categories
        .find_by_id(category)
        .await?
        .ok_or_else(|| AppError::UnknownCategory(category.to_string()))?;

    let service = ctx.categorization_service();
    service.update_category(&id, &category, memo, payee).await?;
    service.note_feedback(&id, &category);
    println!("Set category of {id} to {}", category.id);
    Ok(())
}
