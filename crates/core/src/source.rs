use async_trait::async_trait;
use chrono::NaiveDate;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::account::AccountId;
use super::period::DateRange;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum SourceError {
    #[error("invalid date range: {0}")]
    InvalidRange(String),
    #[error("bank connection failed: {0}")]
    Connection(String),
    #[error("bank rejected credentials: {0}")]
    Auth(String),
}

/// One transaction as the bank reports it, before any validation. Every
/// field is optional here; the mapper decides what is mandatory.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawBankRecord {
    pub date: Option<NaiveDate>,
    pub amount: Option<Decimal>,
    pub currency: Option<String>,
    pub counter_account: Option<String>,
    pub counter_bank_code: Option<String>,
    pub counter_bank_name: Option<String>,
    pub counterparty_name: Option<String>,
    pub constant_symbol: Option<String>,
    pub variable_symbol: Option<String>,
    pub specific_symbol: Option<String>,
    pub transaction_type: Option<String>,
    pub comment: Option<String>,
    pub external_id: Option<String>,
}

/// External feed of raw transactions for an account and date range.
#[async_trait]
pub trait BankSource: Send + Sync {
    /// Check the range against the source's constraints (e.g. maximum span)
    /// before any batch is opened.
    fn validate_range(&self, range: &DateRange) -> Result<(), SourceError>;

    async fn fetch(
        &self,
        account: &AccountId,
        range: &DateRange,
    ) -> Result<Vec<RawBankRecord>, SourceError>;
}
