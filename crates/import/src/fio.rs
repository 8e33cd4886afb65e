use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::StatusCode;
use rust_decimal::Decimal;
use serde::Deserialize;

use kasa_core::{AccountId, BankSource, DateRange, RawBankRecord, SourceError};

/// The Fio API serves at most this many days per statement request.
pub const MAX_RANGE_DAYS: i64 = 90;

const DEFAULT_BASE_URL: &str = "https://fioapi.fio.cz/v1/rest";

/// REST client for the Fio bank statement API. The account is implied by the
/// token, so the account id only scopes the produced records.
pub struct FioClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl FioClient {
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_base_url(DEFAULT_BASE_URL, token)
    }

    pub fn with_base_url(base_url: impl Into<String>, token: impl Into<String>) -> Self {
        FioClient {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            token: token.into(),
        }
    }
}

#[async_trait]
impl BankSource for FioClient {
    fn validate_range(&self, range: &DateRange) -> Result<(), SourceError> {
        if range.days() > MAX_RANGE_DAYS {
            return Err(SourceError::InvalidRange(format!(
                "range spans {} days, maximum is {MAX_RANGE_DAYS}",
                range.days()
            )));
        }
        Ok(())
    }

    async fn fetch(
        &self,
        _account: &AccountId,
        range: &DateRange,
    ) -> Result<Vec<RawBankRecord>, SourceError> {
        self.validate_range(range)?;

        let url = format!(
            "{}/periods/{}/{}/{}/transactions.json",
            self.base_url,
            self.token,
            range.start().format("%Y-%m-%d"),
            range.end().format("%Y-%m-%d"),
        );

        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| SourceError::Connection(e.to_string()))?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(SourceError::Auth(format!(
                    "bank API returned {}",
                    response.status()
                )));
            }
            status if !status.is_success() => {
                return Err(SourceError::Connection(format!(
                    "bank API returned {status}"
                )));
            }
            _ => {}
        }

        let payload: FioPayload = response
            .json()
            .await
            .map_err(|e| SourceError::Connection(format!("malformed bank response: {e}")))?;

        Ok(payload.into_records())
    }
}

// Fio's statement format names transaction fields "columnN", each an object
// with a `value` plus metadata we ignore.

#[derive(Debug, Deserialize)]
struct FioPayload {
    #[serde(rename = "accountStatement")]
    account_statement: FioStatement,
}

#[derive(Debug, Deserialize)]
struct FioStatement {
    #[serde(rename = "transactionList")]
    transaction_list: FioTransactionList,
}

#[derive(Debug, Deserialize)]
struct FioTransactionList {
    #[serde(default)]
    transaction: Vec<FioTransaction>,
}

#[derive(Debug, Deserialize)]
struct FioField<T> {
    value: T,
}

#[derive(Debug, Default, Deserialize)]
struct FioTransaction {
    #[serde(rename = "column0")]
    date: Option<FioField<String>>,
    #[serde(rename = "column1")]
    amount: Option<FioField<f64>>,
    #[serde(rename = "column14")]
    currency: Option<FioField<String>>,
    #[serde(rename = "column2")]
    counter_account: Option<FioField<String>>,
    #[serde(rename = "column3")]
    counter_bank_code: Option<FioField<String>>,
    #[serde(rename = "column12")]
    counter_bank_name: Option<FioField<String>>,
    #[serde(rename = "column7")]
    counterparty_name: Option<FioField<String>>,
    #[serde(rename = "column4")]
    constant_symbol: Option<FioField<String>>,
    #[serde(rename = "column5")]
    variable_symbol: Option<FioField<String>>,
    #[serde(rename = "column6")]
    specific_symbol: Option<FioField<String>>,
    #[serde(rename = "column8")]
    transaction_type: Option<FioField<String>>,
    #[serde(rename = "column16")]
    comment: Option<FioField<String>>,
    #[serde(rename = "column22")]
    external_id: Option<FioField<i64>>,
}

impl FioPayload {
    fn into_records(self) -> Vec<RawBankRecord> {
        self.account_statement
            .transaction_list
            .transaction
            .into_iter()
            .map(FioTransaction::into_record)
            .collect()
    }
}

impl FioTransaction {
    fn into_record(self) -> RawBankRecord {
        RawBankRecord {
            date: self.date.and_then(|f| parse_fio_date(&f.value)),
            amount: self
                .amount
                .and_then(|f| Decimal::from_f64_retain(f.value))
                .map(|d| d.round_dp(2)),
            currency: self.currency.map(|f| f.value),
            counter_account: self.counter_account.map(|f| f.value),
            counter_bank_code: self.counter_bank_code.map(|f| f.value),
            counter_bank_name: self.counter_bank_name.map(|f| f.value),
            counterparty_name: self.counterparty_name.map(|f| f.value),
            constant_symbol: self.constant_symbol.map(|f| f.value),
            variable_symbol: self.variable_symbol.map(|f| f.value),
            specific_symbol: self.specific_symbol.map(|f| f.value),
            transaction_type: self.transaction_type.map(|f| f.value),
            comment: self.comment.map(|f| f.value),
            external_id: self.external_id.map(|f| f.value.to_string()),
        }
    }
}

/// Fio dates carry a timezone suffix, e.g. `"2024-01-15+0100"`; only the
/// date part matters here.
fn parse_fio_date(s: &str) -> Option<NaiveDate> {
    let date_part = s.get(..10)?;
    NaiveDate::parse_from_str(date_part, "%Y-%m-%d").ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validate_range_enforces_max_span() {
        let client = FioClient::new("test-token");
        let ok = DateRange::new(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 3, 31).unwrap(),
        )
        .unwrap();
        assert!(client.validate_range(&ok).is_ok());

        let too_wide = DateRange::new(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 6, 30).unwrap(),
        )
        .unwrap();
        assert!(matches!(
            client.validate_range(&too_wide),
            Err(SourceError::InvalidRange(_))
        ));
    }

    #[test]
    fn parse_fio_date_strips_timezone() {
        assert_eq!(
            parse_fio_date("2024-01-15+0100"),
            NaiveDate::from_ymd_opt(2024, 1, 15)
        );
        assert_eq!(parse_fio_date("2024-01-15"), NaiveDate::from_ymd_opt(2024, 1, 15));
        assert_eq!(parse_fio_date("garbage"), None);
        assert_eq!(parse_fio_date(""), None);
    }

    #[test]
    fn payload_maps_to_raw_records() {
        let json = r#"{
            "accountStatement": {
                "transactionList": {
                    "transaction": [
                        {
                            "column0": { "value": "2024-01-15+0100" },
                            "column1": { "value": -249.90 },
                            "column14": { "value": "CZK" },
                            "column2": { "value": "987654321" },
                            "column3": { "value": "0800" },
                            "column5": { "value": "20240115" },
                            "column7": { "value": "UBER B.V." },
                            "column8": { "value": "Card payment" },
                            "column16": { "value": "UBER TRIP" },
                            "column22": { "value": 26662847710 }
                        },
                        {
                            "column0": { "value": "2024-01-16+0100" },
                            "column1": { "value": 1500.00 },
                            "column14": { "value": "CZK" },
                            "column22": { "value": 26662847711 }
                        }
                    ]
                }
            }
        }"#;

        let payload: FioPayload = serde_json::from_str(json).unwrap();
        let records = payload.into_records();
        assert_eq!(records.len(), 2);

        let first = &records[0];
        assert_eq!(first.date, NaiveDate::from_ymd_opt(2024, 1, 15));
        assert_eq!(first.amount, Some(Decimal::new(-24990, 2)));
        assert_eq!(first.currency.as_deref(), Some("CZK"));
        assert_eq!(first.counter_account.as_deref(), Some("987654321"));
        assert_eq!(first.counter_bank_code.as_deref(), Some("0800"));
        assert_eq!(first.variable_symbol.as_deref(), Some("20240115"));
        assert_eq!(first.counterparty_name.as_deref(), Some("UBER B.V."));
        assert_eq!(first.transaction_type.as_deref(), Some("Card payment"));
        assert_eq!(first.comment.as_deref(), Some("UBER TRIP"));
        assert_eq!(first.external_id.as_deref(), Some("26662847710"));

        let second = &records[1];
        assert_eq!(second.amount, Some(Decimal::new(150000, 2)));
        assert_eq!(second.counter_account, None);
        assert_eq!(second.comment, None);
    }

    #[test]
    fn empty_transaction_list_parses() {
        let json = r#"{
            "accountStatement": { "transactionList": { "transaction": [] } }
        }"#;
        let payload: FioPayload = serde_json::from_str(json).unwrap();
        assert!(payload.into_records().is_empty());
    }
}
