pub mod db;
pub mod stores;

pub use db::{create_db, DbPool};
pub use stores::{SqliteBatchStore, SqliteCategoryStore, SqliteStateStore, SqliteTransactionStore};
