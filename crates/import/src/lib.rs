pub mod categorize;
pub mod fio;
pub mod mapper;
pub mod memory;
pub mod reconcile;
pub mod service;

pub use categorize::{
    BulkUpdate, CategorizationService, CategorizeError, Categorizer, CategorizerConfig,
    CategoryChanged, KeywordRule, Suggestion,
};
pub use fio::FioClient;
pub use mapper::{map_record, MapError};
pub use memory::{
    MemoryBatchStore, MemoryCategoryStore, MemoryStateStore, MemoryTransactionStore,
    MockBankSource,
};
pub use reconcile::{reconcile, Reconciliation};
pub use service::{ImportError, ImportService};
