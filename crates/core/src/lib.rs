pub mod account;
pub mod batch;
pub mod category;
pub mod money;
pub mod period;
pub mod source;
pub mod store;
pub mod transaction;

pub use account::{AccountId, AccountIdError};
pub use batch::{BatchStateError, BatchStatus, ImportBatch, ImportBatchId};
pub use category::{effective, Category, ProcessingState};
pub use money::{Currency, Money, MoneyError};
pub use period::{DateRange, DateRangeError};
pub use source::{BankSource, RawBankRecord, SourceError};
pub use store::{
    CategoryStore, ImportBatchStore, ProcessingStateStore, StoreError, TransactionStore,
};
pub use transaction::{Transaction, TransactionFilter, TransactionId, TransactionStatus};
