use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::account::AccountId;
use super::batch::ImportBatchId;
use super::money::Money;

/// Natural key of a transaction within an account. The external id is the
/// bank's own transaction identifier and drives duplicate detection.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransactionId {
    pub account: AccountId,
    pub external_id: String,
}

impl TransactionId {
    pub fn new(account: AccountId, external_id: impl Into<String>) -> Self {
        TransactionId {
            account,
            external_id: external_id.into(),
        }
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.account, self.external_id)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TransactionStatus {
    Imported,
    Categorized,
    Submitted,
}

impl TransactionStatus {
    /// Status only ever moves forward: Imported -> Categorized -> Submitted.
    pub fn can_advance_to(self, next: TransactionStatus) -> bool {
        next > self
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionStatus::Imported => write!(f, "Imported"),
            TransactionStatus::Categorized => write!(f, "Categorized"),
            TransactionStatus::Submitted => write!(f, "Submitted"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    pub date: NaiveDate,
    pub amount: Money,
    pub description: String,
    pub counterparty: Option<String>,
    pub counter_account: Option<String>,
    pub reference: Option<String>,
    pub import_batch_id: ImportBatchId,
    pub status: TransactionStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Bulk-update selector. All present fields must match; substring matches are
/// case-insensitive.
#[derive(Debug, Clone, Default)]
pub struct TransactionFilter {
    pub account: Option<AccountId>,
    pub description_contains: Option<String>,
    pub counterparty_contains: Option<String>,
    pub transaction_type: Option<String>,
}

impl TransactionFilter {
    pub fn matches(&self, tx: &Transaction) -> bool {
        if let Some(account) = &self.account {
            if &tx.id.account != account {
                return false;
            }
        }
        if let Some(needle) = &self.description_contains {
            if !contains_ci(&tx.description, needle) {
                return false;
            }
        }
        if let Some(needle) = &self.counterparty_contains {
            match &tx.counterparty {
                Some(cp) if contains_ci(cp, needle) => {}
                _ => return false,
            }
        }
        if let Some(tx_type) = &self.transaction_type {
            // The mapper renders the description as "<type> - <comment>",
            // so the type is matched against the description head.
            if !starts_with_ci(&tx.description, tx_type) {
                return false;
            }
        }
        true
    }
}

fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

fn starts_with_ci(haystack: &str, prefix: &str) -> bool {
    haystack.to_lowercase().starts_with(&prefix.to_lowercase())
}
