//! Transaction storage.
//!
//! The pipeline only needs per-user history in timestamp order, lookups by id
//! and category updates. [`InMemoryTransactionStore`] keeps each user's
//! history sorted on insert so reads never sort.

use crate::error::{PipelineError, PipelineResult};
use crate::types::transaction::{CategorySource, DateRange, Transaction};
use std::collections::HashMap;
use std::sync::RwLock;
use uuid::Uuid;

/// Per-user transaction storage.
pub trait TransactionStore: Send + Sync {
    /// Store one transaction.
    fn insert(&self, transaction: Transaction) -> PipelineResult<()>;

    /// Store several transactions under one lock acquisition.
    fn insert_batch(&self, transactions: Vec<Transaction>) -> PipelineResult<()>;

    /// Find a user's transaction by id.
    fn get(&self, user_id: &str, id: Uuid) -> PipelineResult<Option<Transaction>>;

    /// A user's transactions inside `range`, oldest first.
    fn list(&self, user_id: &str, range: &DateRange) -> PipelineResult<Vec<Transaction>>;

    /// Set a transaction's category.
    ///
    /// Returns the updated transaction, or `None` if the user has no such transaction.
    fn update_category(
        &self,
        user_id: &str,
        id: Uuid,
        category: String,
        source: CategorySource,
        confidence: Option<f64>,
    ) -> PipelineResult<Option<Transaction>>;

    /// Number of transactions stored for a user.
    fn count(&self, user_id: &str) -> PipelineResult<usize>;
}

/// Process-local store, one sorted vector per user.
#[derive(Default)]
pub struct InMemoryTransactionStore {
    users: RwLock<HashMap<String, Vec<Transaction>>>,
}

impl InMemoryTransactionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn lock_error<E: std::fmt::Display>(e: E) -> PipelineError {
    PipelineError::Internal(format!("Lock error: {}", e))
}

/// Insert after any records with the same timestamp, keeping arrival order among ties.
fn insert_sorted(history: &mut Vec<Transaction>, transaction: Transaction) {
    let at = history.partition_point(|tx| tx.timestamp <= transaction.timestamp);
    history.insert(at, transaction);
}

impl TransactionStore for InMemoryTransactionStore {
    fn insert(&self, transaction: Transaction) -> PipelineResult<()> {
        let mut users = self.users.write().map_err(lock_error)?;
        let history = users.entry(transaction.user_id.clone()).or_default();
        insert_sorted(history, transaction);
        Ok(())
    }

    fn insert_batch(&self, transactions: Vec<Transaction>) -> PipelineResult<()> {
        let mut users = self.users.write().map_err(lock_error)?;
        for transaction in transactions {
            let history = users.entry(transaction.user_id.clone()).or_default();
            insert_sorted(history, transaction);
        }
        Ok(())
    }

    fn get(&self, user_id: &str, id: Uuid) -> PipelineResult<Option<Transaction>> {
        let users = self.users.read().map_err(lock_error)?;
        Ok(users
            .get(user_id)
            .and_then(|history| history.iter().find(|tx| tx.id == id))
            .cloned())
    }

    fn list(&self, user_id: &str, range: &DateRange) -> PipelineResult<Vec<Transaction>> {
        let users = self.users.read().map_err(lock_error)?;
        Ok(users
            .get(user_id)
            .map(|history| {
                history
                    .iter()
                    .filter(|tx| range.contains(tx.timestamp))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    fn update_category(
        &self,
        user_id: &str,
        id: Uuid,
        category: String,
        source: CategorySource,
        confidence: Option<f64>,
    ) -> PipelineResult<Option<Transaction>> {
        let mut users = self.users.write().map_err(lock_error)?;
        let Some(tx) = users
            .get_mut(user_id)
            .and_then(|history| history.iter_mut().find(|tx| tx.id == id))
        else {
            return Ok(None);
        };
        tx.category = Some(category);
        tx.category_source = Some(source);
        tx.category_confidence = confidence;
        Ok(Some(tx.clone()))
    }

    fn count(&self, user_id: &str) -> PipelineResult<usize> {
        let users = self.users.read().map_err(lock_error)?;
        Ok(users.get(user_id).map_or(0, Vec::len))
    }
}
