use chrono::{DateTime, Utc};
use thiserror::Error;

use kasa_core::{
    AccountId, Currency, ImportBatchId, Money, RawBankRecord, Transaction, TransactionId,
    TransactionStatus,
};

#[derive(Debug, Clone, Error, PartialEq)]
pub enum MapError {
    #[error("missing field {0}")]
    MissingField(&'static str),
}

/// Convert one raw bank record into a canonical transaction. Pure: the same
/// inputs always produce the same transaction.
///
/// Mandatory fields are checked in a fixed order (date, amount, currency,
/// external id) and the first absentee names the error.
pub fn map_record(
    raw: &RawBankRecord,
    account: &AccountId,
    batch: &ImportBatchId,
    now: DateTime<Utc>,
) -> Result<Transaction, MapError> {
    let date = raw.date.ok_or(MapError::MissingField("date"))?;
    let amount = raw.amount.ok_or(MapError::MissingField("amount"))?;
    let currency = raw
        .currency
        .as_deref()
        .ok_or(MapError::MissingField("currency"))?;
    let external_id = raw
        .external_id
        .as_deref()
        .filter(|id| !id.is_empty())
        .ok_or(MapError::MissingField("external_id"))?;

    Ok(Transaction {
        id: TransactionId::new(account.clone(), external_id),
        date,
        amount: Money::new(amount, Currency::new(currency)),
        description: build_description(raw),
        counterparty: raw
            .counterparty_name
            .clone()
            .or_else(|| raw.counter_bank_name.clone()),
        counter_account: build_counter_account(raw),
        reference: build_reference(raw),
        import_batch_id: batch.clone(),
        status: TransactionStatus::Imported,
        created_at: now,
        updated_at: now,
    })
}

/// `"<account>/<bankCode>"` when both halves are present, the present half
/// alone otherwise.
fn build_counter_account(raw: &RawBankRecord) -> Option<String> {
    match (&raw.counter_account, &raw.counter_bank_code) {
        (Some(account), Some(code)) => Some(format!("{account}/{code}")),
        (Some(account), None) => Some(account.clone()),
        (None, Some(code)) => Some(code.clone()),
        (None, None) => None,
    }
}

/// Payment symbols in fixed KS, VS, SS order, e.g. `"KS:308, VS:20240115"`.
fn build_reference(raw: &RawBankRecord) -> Option<String> {
    let mut parts = Vec::new();
    if let Some(ks) = &raw.constant_symbol {
        parts.push(format!("KS:{ks}"));
    }
    if let Some(vs) = &raw.variable_symbol {
        parts.push(format!("VS:{vs}"));
    }
    if let Some(ss) = &raw.specific_symbol {
        parts.push(format!("SS:{ss}"));
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(", "))
    }
}

fn build_description(raw: &RawBankRecord) -> String {
    match (&raw.transaction_type, &raw.comment) {
        (Some(tx_type), Some(comment)) => format!("{tx_type} - {comment}"),
        (Some(tx_type), None) => tx_type.clone(),
        (None, Some(comment)) => comment.clone(),
        (None, None) => "Unknown transaction".to_string(),
    }
}
