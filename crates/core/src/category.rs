use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::transaction::TransactionId;

pub const UNCATEGORIZED_ID: &str = "uncategorized";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub name: String,
    pub parent_id: Option<String>,
}

impl Category {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Category {
            id: id.into(),
            name: name.into(),
            parent_id: None,
        }
    }

    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    /// The default sentinel every transaction falls back to.
    pub fn uncategorized() -> Self {
        Category::new(UNCATEGORIZED_ID, "Uncategorized")
    }

    pub fn is_uncategorized(&self) -> bool {
        self.id == UNCATEGORIZED_ID
    }
}

/// Latest-wins resolution: an explicit user override beats the suggestion.
pub fn effective<T: Clone>(suggested: &Option<T>, overridden: &Option<T>) -> Option<T> {
    overridden.clone().or_else(|| suggested.clone())
}

/// Side-car record per transaction tracking the automated suggestion and any
/// user override for category, payee and memo. Only the latest state is kept.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessingState {
    pub transaction_id: TransactionId,
    pub suggested_category: Option<String>,
    pub suggested_confidence: Option<f32>,
    pub override_category: Option<String>,
    pub suggested_payee: Option<String>,
    pub override_payee: Option<String>,
    pub suggested_memo: Option<String>,
    pub override_memo: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProcessingState {
    pub fn new(transaction_id: TransactionId, now: DateTime<Utc>) -> Self {
        ProcessingState {
            transaction_id,
            suggested_category: None,
            suggested_confidence: None,
            override_category: None,
            suggested_payee: None,
            override_payee: None,
            suggested_memo: None,
            override_memo: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn record_suggestion(
        &mut self,
        category: String,
        confidence: f32,
        payee: Option<String>,
        memo: Option<String>,
        now: DateTime<Utc>,
    ) {
        self.suggested_category = Some(category);
        self.suggested_confidence = Some(confidence);
        self.suggested_payee = payee;
        self.suggested_memo = memo;
        self.updated_at = now;
    }

    pub fn apply_override(
        &mut self,
        category: String,
        memo: Option<String>,
        payee: Option<String>,
        now: DateTime<Utc>,
    ) {
        self.override_category = Some(category);
        if memo.is_some() {
            self.override_memo = memo;
        }
        if payee.is_some() {
            self.override_payee = payee;
        }
        self.updated_at = now;
    }

    pub fn effective_category(&self) -> Option<String> {
        effective(&self.suggested_category, &self.override_category)
    }

    pub fn effective_payee(&self) -> Option<String> {
        effective(&self.suggested_payee, &self.override_payee)
    }

    pub fn effective_memo(&self) -> Option<String> {
        effective(&self.suggested_memo, &self.override_memo)
    }
}
