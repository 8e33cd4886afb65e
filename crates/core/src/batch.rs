use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use super::account::AccountId;
use super::period::DateRange;

/// Identifies one import run: the account's string form plus a sequence
/// number allocated by the batch store, monotonically increasing per account.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImportBatchId {
    pub account_prefix: String,
    pub sequence: i64,
}

impl ImportBatchId {
    pub fn new(account_prefix: impl Into<String>, sequence: i64) -> Self {
        ImportBatchId {
            account_prefix: account_prefix.into(),
            sequence,
        }
    }
}

impl fmt::Display for ImportBatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.account_prefix, self.sequence)
    }
}

impl FromStr for ImportBatchId {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (prefix, seq) = s
            .rsplit_once('-')
            .ok_or_else(|| format!("invalid batch id: '{s}'"))?;
        let sequence = seq
            .parse::<i64>()
            .map_err(|_| format!("invalid batch sequence: '{seq}'"))?;
        Ok(ImportBatchId::new(prefix, sequence))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BatchStatus {
    Started,
    Completed,
    Failed,
}

impl BatchStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, BatchStatus::Completed | BatchStatus::Failed)
    }
}

impl fmt::Display for BatchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchStatus::Started => write!(f, "Started"),
            BatchStatus::Completed => write!(f, "Completed"),
            BatchStatus::Failed => write!(f, "Failed"),
        }
    }
}

#[derive(Debug, Clone, Error, PartialEq)]
#[error("batch is already finalized as {status}")]
pub struct BatchStateError {
    pub status: BatchStatus,
}

/// Audit record of one import run. Created `Started`, finalized exactly once
/// as `Completed` or `Failed`; `end_time` is set iff the batch is terminal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportBatch {
    pub id: ImportBatchId,
    pub account: AccountId,
    pub range: DateRange,
    pub status: BatchStatus,
    pub transaction_count: usize,
    pub error_message: Option<String>,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ImportBatch {
    pub fn start(
        id: ImportBatchId,
        account: AccountId,
        range: DateRange,
        now: DateTime<Utc>,
    ) -> Self {
        ImportBatch {
            id,
            account,
            range,
            status: BatchStatus::Started,
            transaction_count: 0,
            error_message: None,
            start_time: now,
            end_time: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Finalize the run as completed. `message` carries informational text
    /// such as duplicate-skip counts.
    pub fn complete(
        &mut self,
        transaction_count: usize,
        message: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), BatchStateError> {
        self.check_open()?;
        self.status = BatchStatus::Completed;
        self.transaction_count = transaction_count;
        self.error_message = message;
        self.end_time = Some(now);
        self.updated_at = now;
        Ok(())
    }

    /// Finalize the run as failed, capturing the error text in the record.
    pub fn fail(&mut self, error: String, now: DateTime<Utc>) -> Result<(), BatchStateError> {
        self.check_open()?;
        self.status = BatchStatus::Failed;
        self.error_message = Some(error);
        self.end_time = Some(now);
        self.updated_at = now;
        Ok(())
    }

    fn check_open(&self) -> Result<(), BatchStateError> {
        if self.status.is_terminal() {
            return Err(BatchStateError {
                status: self.status,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn batch() -> ImportBatch {
        let account = AccountId::new("2010", "123456789").unwrap();
        let range = DateRange::new(
            NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
            NaiveDate::from_ymd_opt(2024, 1, 31).unwrap(),
        )
        .unwrap();
        ImportBatch::start(
            ImportBatchId::new(account.to_string(), 1),
            account,
            range,
            Utc::now(),
        )
    }

    #[test]
    fn starts_open_without_end_time() {
        let b = batch();
        assert_eq!(b.status, BatchStatus::Started);
        assert!(b.end_time.is_none());
        assert_eq!(b.transaction_count, 0);
    }

    #[test]
    fn complete_sets_count_message_and_end_time() {
        let mut b = batch();
        b.complete(5, Some("skipped 2 duplicates".to_string()), Utc::now())
            .unwrap();
        assert_eq!(b.status, BatchStatus::Completed);
        assert_eq!(b.transaction_count, 5);
        assert!(b.end_time.is_some());
        assert_eq!(b.error_message.as_deref(), Some("skipped 2 duplicates"));
    }

    #[test]
    fn fail_captures_error_and_end_time() {
        let mut b = batch();
        b.fail("connection refused".to_string(), Utc::now()).unwrap();
        assert_eq!(b.status, BatchStatus::Failed);
        assert_eq!(b.error_message.as_deref(), Some("connection refused"));
        assert!(b.end_time.is_some());
    }

    #[test]
    fn terminal_batches_cannot_be_reopened() {
        let mut b = batch();
        b.complete(3, None, Utc::now()).unwrap();
        assert_eq!(
            b.fail("late error".to_string(), Utc::now()),
            Err(BatchStateError {
                status: BatchStatus::Completed
            })
        );
        assert_eq!(
            b.complete(9, None, Utc::now()),
            Err(BatchStateError {
                status: BatchStatus::Completed
            })
        );
    }

    #[test]
    fn end_time_tracks_terminal_status() {
        let mut b = batch();
        assert_eq!(b.end_time.is_some(), b.status.is_terminal());
        b.fail("boom".to_string(), Utc::now()).unwrap();
        assert_eq!(b.end_time.is_some(), b.status.is_terminal());
    }

    #[test]
    fn batch_id_parse_round_trip() {
        let id = ImportBatchId::new("123456789/2010", 42);
        assert_eq!(id.to_string(), "123456789/2010-42");
        let parsed: ImportBatchId = id.to_string().parse().unwrap();
        assert_eq!(parsed, id);
    }

    #[test]
    fn batch_id_parse_rejects_garbage() {
        assert!("no-sequence-here".parse::<ImportBatchId>().is_err());
        assert!("plain".parse::<ImportBatchId>().is_err());
    }
}
