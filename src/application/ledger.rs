use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::sync::watch;

use crate::domain::{
    self, AccountId, Transaction, TransactionId, TransactionKind, TransferAttemptId,
};
use crate::storage::{Collection, ObjectStore, StoreError, from_document, to_document};

use super::EngineError;

/// Owns the cached copy of the `transactions` collection.
///
/// Nothing here touches balances. Callers that change money must pair a
/// ledger write with an explicit balance delta.
pub struct TransactionLedger {
    store: Arc<dyn ObjectStore>,
    entries: watch::Sender<Arc<Vec<Transaction>>>,
}

impl TransactionLedger {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        let (entries, _) = watch::channel(Arc::new(Vec::new()));
        Self { store, entries }
    }

    /// Fetch every entry from the store and replace the cache.
    pub async fn load(&self) -> Result<Vec<Transaction>, EngineError> {
        let documents = self.store.list(Collection::Transactions).await?;
        let transactions = documents
            .into_iter()
            .map(from_document)
            .collect::<Result<Vec<Transaction>, _>>()?;

        tracing::debug!(count = transactions.len(), "ledger loaded");
        self.entries.send_replace(Arc::new(transactions.clone()));
        Ok(transactions)
    }

    /// Cached entries in storage insertion order.
    pub fn list(&self) -> Arc<Vec<Transaction>> {
        Arc::clone(&self.entries.borrow())
    }

    /// Cached entries sorted by timestamp, oldest first.
    pub fn chronological(&self) -> Vec<Transaction> {
        let mut entries = self.list().as_ref().clone();
        entries.sort_by_key(|tx| tx.timestamp);
        entries
    }

    pub fn for_account(&self, account_id: AccountId) -> Vec<Transaction> {
        self.list()
            .iter()
            .filter(|tx| tx.account_id == account_id)
            .cloned()
            .collect()
    }

    pub fn find(&self, id: TransactionId) -> Option<Transaction> {
        self.list().iter().find(|tx| tx.id == id).cloned()
    }

    /// The leg of transfer `transfer_id` recorded in `account_id`'s ledger.
    pub fn transfer_leg(
        &self,
        transfer_id: TransferAttemptId,
        account_id: AccountId,
    ) -> Option<Transaction> {
        self.list()
            .iter()
            .find(|tx| tx.transfer_id == Some(transfer_id) && tx.account_id == account_id)
            .cloned()
    }

    /// True if any entry belongs to, or was transferred from/to, `account_id`.
    pub fn references(&self, account_id: AccountId) -> bool {
        self.list().iter().any(|tx| {
            tx.account_id == account_id
                || tx.origin_account_id == Some(account_id)
                || tx.destination_account_id == Some(account_id)
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<Vec<Transaction>>> {
        self.entries.subscribe()
    }

    /// Persist one entry. Balances are left alone.
    pub async fn append(&self, transaction: Transaction) -> Result<Transaction, StoreError> {
        let document = to_document(&transaction)?;
        let stored = self.store.create(Collection::Transactions, document).await?;
        let stored: Transaction = from_document(stored)?;

        self.entries.send_modify(|entries| {
            Arc::make_mut(entries).push(stored.clone());
        });
        Ok(stored)
    }

    /// Replace an entry with a new version of itself. Balances are left alone.
    pub async fn update(&self, mut transaction: Transaction) -> Result<Transaction, EngineError> {
        let current = self
            .find(transaction.id)
            .ok_or(EngineError::TransactionNotFound(transaction.id))?;
        transaction.version = current.version + 1;

        let document = to_document(&transaction)?;
        let stored = self
            .store
            .replace(Collection::Transactions, &transaction.id.to_string(), document)
            .await?;
        let stored: Transaction = from_document(stored)?;

        self.entries.send_modify(|entries| {
            if let Some(slot) = Arc::make_mut(entries).iter_mut().find(|tx| tx.id == stored.id) {
                *slot = stored.clone();
            }
        });
        Ok(stored)
    }

    /// Delete an entry. Balances are left alone.
    pub async fn remove(&self, id: TransactionId) -> Result<Transaction, EngineError> {
        let current = self.find(id).ok_or(EngineError::TransactionNotFound(id))?;
        self.store
            .delete(Collection::Transactions, &id.to_string())
            .await?;

        self.entries.send_modify(|entries| {
            Arc::make_mut(entries).retain(|tx| tx.id != id);
        });
        Ok(current)
    }

    /// Sum of |amount| over cached entries of `kind`.
    pub fn aggregate(&self, kind: TransactionKind) -> Decimal {
        domain::aggregate(kind, &self.list())
    }
}
