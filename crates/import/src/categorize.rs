use std::sync::Arc;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;

use kasa_core::{
    Category, ImportBatchId, ProcessingState, ProcessingStateStore, StoreError, Transaction,
    TransactionFilter, TransactionId, TransactionStatus, TransactionStore,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeywordRule {
    pub keyword: String,
    pub category: Category,
    pub confidence: f32,
}

/// Immutable categorizer configuration. Updating rules means building a new
/// config, not mutating this one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategorizerConfig {
    #[serde(default)]
    pub rules: Vec<KeywordRule>,
    pub default_category: Category,
    pub default_confidence: f32,
}

impl Default for CategorizerConfig {
    fn default() -> Self {
        CategorizerConfig {
            rules: Vec::new(),
            default_category: Category::uncategorized(),
            default_confidence: 0.2,
        }
    }
}

impl CategorizerConfig {
    pub fn from_toml(toml_content: &str) -> Result<Self, String> {
        toml::from_str(toml_content).map_err(|e| format!("Failed to parse TOML: {e}"))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Suggestion {
    pub category: Category,
    pub confidence: f32,
}

/// Keyword rule engine: rules are tried in insertion order, a rule matches on
/// a case-insensitive substring hit in any text field, first match wins, and
/// no match falls back to the configured default. Never fails per item.
pub struct Categorizer {
    config: CategorizerConfig,
}

impl Categorizer {
    pub fn new(config: CategorizerConfig) -> Self {
        Categorizer { config }
    }

    pub fn suggest(&self, tx: &Transaction) -> Suggestion {
        let haystacks = [
            Some(tx.description.as_str()),
            tx.counterparty.as_deref(),
            tx.reference.as_deref(),
        ];

        for rule in &self.config.rules {
            let keyword = rule.keyword.to_lowercase();
            let hit = haystacks
                .iter()
                .flatten()
                .any(|text| text.to_lowercase().contains(&keyword));
            if hit {
                return Suggestion {
                    category: rule.category.clone(),
                    confidence: rule.confidence,
                };
            }
        }

        Suggestion {
            category: self.config.default_category.clone(),
            confidence: self.config.default_confidence,
        }
    }

    pub fn suggest_all(&self, txs: &[Transaction]) -> Vec<Suggestion> {
        txs.iter().map(|tx| self.suggest(tx)).collect()
    }
}

/// Arithmetic mean over the confidences that are present. Absent scores are
/// excluded, not zeroed; an empty input yields `None`.
pub fn mean_confidence(values: &[Option<f32>]) -> Option<f32> {
    let present: Vec<f32> = values.iter().flatten().copied().collect();
    if present.is_empty() {
        return None;
    }
    Some(present.iter().sum::<f32>() / present.len() as f32)
}

#[derive(Debug, Clone, PartialEq)]
pub struct CategoryChanged {
    pub transaction_id: TransactionId,
    pub category: Category,
}

/// One bulk recategorization request.
#[derive(Debug, Clone, Default)]
pub struct BulkUpdate {
    pub filter: TransactionFilter,
    pub memo: Option<String>,
    pub payee: Option<String>,
}

#[derive(Debug, Error)]
pub enum CategorizeError {
    #[error("transaction not found: {0}")]
    UnknownTransaction(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Categorization pass and manual-override handling, persisted through the
/// processing-state side-car. User overrides always win over suggestions.
pub struct CategorizationService {
    transactions: Arc<dyn TransactionStore>,
    states: Arc<dyn ProcessingStateStore>,
    categorizer: Categorizer,
    events: Option<mpsc::UnboundedSender<CategoryChanged>>,
}

impl CategorizationService {
    pub fn new(
        transactions: Arc<dyn TransactionStore>,
        states: Arc<dyn ProcessingStateStore>,
        config: CategorizerConfig,
    ) -> Self {
        CategorizationService {
            transactions,
            states,
            categorizer: Categorizer::new(config),
            events: None,
        }
    }

    /// Attach a channel that receives a `CategoryChanged` event per override.
    pub fn with_events(mut self, events: mpsc::UnboundedSender<CategoryChanged>) -> Self {
        self.events = Some(events);
        self
    }

    /// Suggest a category for every transaction in the batch, record the
    /// suggestions, and advance the batch to `Categorized`. Returns the
    /// number of transactions processed.
    pub async fn categorize_batch(
        &self,
        batch: &ImportBatchId,
    ) -> Result<usize, CategorizeError> {
        let txs = self.transactions.find_by_batch(batch).await?;
        let now = Utc::now();

        for tx in &txs {
            let suggestion = self.categorizer.suggest(tx);
            let mut state = match self.states.find_by_transaction(&tx.id).await? {
                Some(state) => state,
                None => ProcessingState::new(tx.id.clone(), now),
            };
            state.record_suggestion(
                suggestion.category.id.clone(),
                suggestion.confidence,
                tx.counterparty.clone(),
                Some(tx.description.clone()),
                now,
            );
            self.states.upsert(&state).await?;
        }

        self.transactions
            .update_status_by_batch(batch, TransactionStatus::Categorized)
            .await?;
        tracing::info!(batch = %batch, count = txs.len(), "batch categorized");
        Ok(txs.len())
    }

    /// Record a user override for one transaction. Fails only when the
    /// transaction is unknown.
    pub async fn update_category(
        &self,
        id: &TransactionId,
        category: &Category,
        memo: Option<String>,
        payee: Option<String>,
    ) -> Result<(), CategorizeError> {
        self.transactions
            .find_by_id(id)
            .await?
            .ok_or_else(|| CategorizeError::UnknownTransaction(id.to_string()))?;

        self.apply_override(id, category, memo, payee).await
    }

    /// Apply the same override to every transaction matching the filter.
    /// Returns the number of transactions updated.
    pub async fn bulk_update_category(
        &self,
        update: &BulkUpdate,
        category: &Category,
    ) -> Result<usize, CategorizeError> {
        let matches = self.transactions.find_matching(&update.filter).await?;
        for tx in &matches {
            self.apply_override(&tx.id, category, update.memo.clone(), update.payee.clone())
                .await?;
        }
        tracing::info!(
            category = %category.id,
            count = matches.len(),
            "bulk category update"
        );
        Ok(matches.len())
    }

    /// Learning hook: overrides are the feedback signal for future rule
    /// tuning. Currently records nothing beyond a log line.
    pub fn note_feedback(&self, id: &TransactionId, category: &Category) {
        tracing::debug!(transaction = %id, category = %category.id, "categorization feedback noted");
    }

    async fn apply_override(
        &self,
        id: &TransactionId,
        category: &Category,
        memo: Option<String>,
        payee: Option<String>,
    ) -> Result<(), CategorizeError> {
        let now = Utc::now();
        let mut state = match self.states.find_by_transaction(id).await? {
            Some(state) => state,
            None => ProcessingState::new(id.clone(), now),
        };
        state.apply_override(category.id.clone(), memo, payee, now);
        self.states.upsert(&state).await?;

        if let Some(events) = &self.events {
            let _ = events.send(CategoryChanged {
                transaction_id: id.clone(),
                category: category.clone(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryStateStore, MemoryTransactionStore};
    use chrono::NaiveDate;
    use kasa_core::{AccountId, Currency, Money};
    use rust_decimal::Decimal;

    fn account() -> AccountId {
        AccountId::new("2010", "123456789").unwrap()
    }

    fn tx(external_id: &str, description: &str) -> Transaction {
        let now = Utc::now();
        Transaction {
            id: TransactionId::new(account(), external_id),
            date: NaiveDate::from_ymd_opt(2024, 1, 15).unwrap(),
            amount: Money::new(Decimal::from(-250), Currency::new("CZK")),
            description: description.to_string(),
            counterparty: None,
            counter_account: None,
            reference: None,
            import_batch_id: ImportBatchId::new(account().to_string(), 1),
            status: TransactionStatus::Imported,
            created_at: now,
            updated_at: now,
        }
    }

    fn config() -> CategorizerConfig {
        CategorizerConfig {
            rules: vec![
                KeywordRule {
                    keyword: "UBER".to_string(),
                    category: Category::new("transport", "Transportation"),
                    confidence: 0.9,
                },
                KeywordRule {
                    keyword: "TESCO".to_string(),
                    category: Category::new("groceries", "Groceries"),
                    confidence: 0.85,
                },
            ],
            default_category: Category::uncategorized(),
            default_confidence: 0.2,
        }
    }

    #[test]
    fn keyword_match_is_case_insensitive() {
        let categorizer = Categorizer::new(config());
        let s = categorizer.suggest(&tx("tx-1", "Card payment - uber trip"));
        assert_eq!(s.category.id, "transport");
        assert_eq!(s.confidence, 0.9);
    }

    #[test]
    fn first_matching_rule_wins() {
        let mut cfg = config();
        cfg.rules.push(KeywordRule {
            keyword: "UBER".to_string(),
            category: Category::new("other", "Other"),
            confidence: 0.5,
        });
        let categorizer = Categorizer::new(cfg);
        let s = categorizer.suggest(&tx("tx-1", "UBER"));
        assert_eq!(s.category.id, "transport");
    }

    #[test]
    fn no_match_falls_back_to_default() {
        let categorizer = Categorizer::new(config());
        let s = categorizer.suggest(&tx("tx-1", "Transfer - rent"));
        assert!(s.category.is_uncategorized());
        assert_eq!(s.confidence, 0.2);
    }

    #[test]
    fn counterparty_is_searched_too() {
        let categorizer = Categorizer::new(config());
        let mut t = tx("tx-1", "Card payment");
        t.counterparty = Some("TESCO STORES CR".to_string());
        assert_eq!(categorizer.suggest(&t).category.id, "groceries");
    }

    #[test]
    fn suggest_all_never_fails_per_item() {
        let categorizer = Categorizer::new(config());
        let txs = vec![tx("tx-1", "UBER"), tx("tx-2", "nothing matches")];
        let suggestions = categorizer.suggest_all(&txs);
        assert_eq!(suggestions.len(), 2);
        assert_eq!(suggestions[0].category.id, "transport");
        assert!(suggestions[1].category.is_uncategorized());
    }

    #[test]
    fn mean_confidence_excludes_missing_scores() {
        assert_eq!(mean_confidence(&[Some(0.8), None, Some(0.4)]), Some(0.6));
        assert_eq!(mean_confidence(&[None, None]), None);
        assert_eq!(mean_confidence(&[]), None);
    }

    #[test]
    fn config_from_toml() {
        let toml = r#"
            default_confidence = 0.25

            [default_category]
            id = "uncategorized"
            name = "Uncategorized"

            [[rules]]
            keyword = "UBER"
            confidence = 0.9

            [rules.category]
            id = "transport"
            name = "Transportation"
        "#;
        let cfg = CategorizerConfig::from_toml(toml).unwrap();
        assert_eq!(cfg.rules.len(), 1);
        assert_eq!(cfg.rules[0].category.name, "Transportation");
        assert_eq!(cfg.default_confidence, 0.25);
    }

    #[test]
    fn config_from_invalid_toml_errors() {
        assert!(CategorizerConfig::from_toml("not [ valid").is_err());
    }

    struct Fixture {
        transactions: Arc<MemoryTransactionStore>,
        states: Arc<MemoryStateStore>,
        service: CategorizationService,
        events: mpsc::UnboundedReceiver<CategoryChanged>,
    }

    async fn fixture(txs: Vec<Transaction>) -> Fixture {
        let transactions = Arc::new(MemoryTransactionStore::new());
        transactions.save_all(&txs).await.unwrap();
        let states = Arc::new(MemoryStateStore::new());
        let (tx_events, events) = mpsc::unbounded_channel();
        let service =
            CategorizationService::new(transactions.clone(), states.clone(), config())
                .with_events(tx_events);
        Fixture {
            transactions,
            states,
            service,
            events,
        }
    }

    #[tokio::test]
    async fn categorize_batch_records_suggestions_and_advances_status() {
        let f = fixture(vec![tx("tx-1", "UBER TRIP"), tx("tx-2", "mystery")]).await;
        let batch = ImportBatchId::new(account().to_string(), 1);

        let count = f.service.categorize_batch(&batch).await.unwrap();
        assert_eq!(count, 2);

        let state = f
            .states
            .find_by_transaction(&TransactionId::new(account(), "tx-1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state.effective_category().as_deref(), Some("transport"));
        assert_eq!(state.suggested_confidence, Some(0.9));

        let stored = f.transactions.find_by_batch(&batch).await.unwrap();
        assert!(stored
            .iter()
            .all(|t| t.status == TransactionStatus::Categorized));
    }

    #[tokio::test]
    async fn update_category_override_beats_suggestion() {
        let f = fixture(vec![tx("tx-1", "UBER TRIP")]).await;
        let batch = ImportBatchId::new(account().to_string(), 1);
        f.service.categorize_batch(&batch).await.unwrap();

        let id = TransactionId::new(account(), "tx-1");
        let food = Category::new("food", "Food");
        f.service
            .update_category(&id, &food, Some("lunch".to_string()), None)
            .await
            .unwrap();

        let state = f.states.find_by_transaction(&id).await.unwrap().unwrap();
        assert_eq!(state.effective_category().as_deref(), Some("food"));
        assert_eq!(state.effective_memo().as_deref(), Some("lunch"));
        // Suggestion is still on record underneath.
        assert_eq!(state.suggested_category.as_deref(), Some("transport"));
    }

    #[tokio::test]
    async fn update_category_unknown_transaction_errors() {
        let f = fixture(vec![]).await;
        let id = TransactionId::new(account(), "ghost");
        let err = f
            .service
            .update_category(&id, &Category::uncategorized(), None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, CategorizeError::UnknownTransaction(_)));
    }

    #[tokio::test]
    async fn update_category_emits_event() {
        let mut f = fixture(vec![tx("tx-1", "UBER TRIP")]).await;
        let id = TransactionId::new(account(), "tx-1");
        let transport = Category::new("transport", "Transportation");
        f.service
            .update_category(&id, &transport, None, None)
            .await
            .unwrap();

        let event = f.events.try_recv().unwrap();
        assert_eq!(event.transaction_id, id);
        assert_eq!(event.category.id, "transport");
    }

    #[tokio::test]
    async fn bulk_update_by_description_substring() {
        let f = fixture(vec![
            tx("tx-1", "Card payment - UBER TRIP"),
            tx("tx-2", "Card payment - TESCO"),
            tx("tx-3", "Transfer - rent"),
        ])
        .await;

        let update = BulkUpdate {
            filter: TransactionFilter {
                description_contains: Some("UBER".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let transport = Category::new("transport", "Transportation");
        let count = f
            .service
            .bulk_update_category(&update, &transport)
            .await
            .unwrap();
        assert_eq!(count, 1);

        let state = f
            .states
            .find_by_transaction(&TransactionId::new(account(), "tx-1"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state.effective_category().as_deref(), Some("transport"));
        assert!(f
            .states
            .find_by_transaction(&TransactionId::new(account(), "tx-3"))
            .await
            .unwrap()
            .is_none());
    }
}
