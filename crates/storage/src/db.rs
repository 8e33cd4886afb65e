use sqlx::{sqlite::SqlitePoolOptions, Pool, Sqlite};

pub type DbPool = Pool<Sqlite>;

/// Open (or create) the database and bring the schema up to date.
/// `url` is a sqlite connection string, e.g. `sqlite:kasa.db?mode=rwc`
/// or `sqlite::memory:` in tests.
pub async fn create_db(url: &str) -> Result<DbPool, sqlx::Error> {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect(url)
        .await?;

    sqlx::query("PRAGMA journal_mode = WAL")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA foreign_keys = ON")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA synchronous = NORMAL")
        .execute(&pool)
        .await?;
    sqlx::query("PRAGMA busy_timeout = 5000")
        .execute(&pool)
        .await?;

    run_migrations(&pool).await?;

    Ok(pool)
}

async fn run_migrations(pool: &DbPool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS transactions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            bank_id TEXT NOT NULL,
            bank_account_id TEXT NOT NULL,
            external_id TEXT NOT NULL,
            date TEXT NOT NULL,
            amount TEXT NOT NULL,
            currency TEXT NOT NULL,
            description TEXT NOT NULL,
            counterparty TEXT,
            counter_account TEXT,
            reference TEXT,
            batch_prefix TEXT NOT NULL,
            batch_seq INTEGER NOT NULL,
            status TEXT NOT NULL,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            UNIQUE (bank_id, bank_account_id, external_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS import_batches (
            batch_prefix TEXT NOT NULL,
            batch_seq INTEGER NOT NULL,
            bank_id TEXT NOT NULL,
            bank_account_id TEXT NOT NULL,
            start_date TEXT NOT NULL,
            end_date TEXT NOT NULL,
            status TEXT NOT NULL,
            transaction_count INTEGER NOT NULL DEFAULT 0,
            error_message TEXT,
            start_time TEXT NOT NULL,
            end_time TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (batch_prefix, batch_seq)
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS batch_sequences (
            account TEXT PRIMARY KEY,
            next_seq INTEGER NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS categories (
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            parent_id TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS processing_states (
            bank_id TEXT NOT NULL,
            bank_account_id TEXT NOT NULL,
            external_id TEXT NOT NULL,
            suggested_category TEXT,
            suggested_confidence REAL,
            override_category TEXT,
            suggested_payee TEXT,
            override_payee TEXT,
            suggested_memo TEXT,
            override_memo TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (bank_id, bank_account_id, external_id)
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
