use std::collections::HashSet;

use kasa_core::{Transaction, TransactionId};

#[derive(Debug, Clone)]
pub struct Reconciliation {
    /// Candidates not yet in the store, in their original order.
    pub new: Vec<Transaction>,
    pub duplicates: usize,
}

impl Reconciliation {
    pub fn total(&self) -> usize {
        self.new.len() + self.duplicates
    }
}

/// Partition freshly fetched candidates into new vs already-seen by exact
/// `TransactionId`. Total: every candidate lands in exactly one side.
pub fn reconcile(candidates: Vec<Transaction>, existing: &[Transaction]) -> Reconciliation {
    let seen: HashSet<&TransactionId> = existing.iter().map(|t| &t.id).collect();

    let mut new = Vec::new();
    let mut duplicates = 0;
    for tx in candidates {
        if seen.contains(&tx.id) {
            duplicates += 1;
        } else {
            new.push(tx);
        }
    }

    Reconciliation { new, duplicates }
}
