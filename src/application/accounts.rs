use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::sync::watch;

use crate::domain::{Account, AccountId, resolve_active};
use crate::storage::{Collection, ObjectStore, from_document, to_document};

use super::EngineError;

/// Immutable view of the cached accounts and the account resolved as active.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AccountSnapshot {
    pub accounts: Arc<Vec<Account>>,
    pub active: Option<Account>,
}

impl AccountSnapshot {
    fn from_accounts(accounts: Vec<Account>) -> Self {
        let active = resolve_active(&accounts).cloned();
        Self {
            accounts: Arc::new(accounts),
            active,
        }
    }
}

/// Owns the authoritative in-memory copy of the `accounts` collection.
///
/// The cache only changes after a remote write succeeds, and the active
/// account is recomputed from the cached set on every change.
pub struct AccountStore {
    store: Arc<dyn ObjectStore>,
    snapshot: watch::Sender<AccountSnapshot>,
}

impl AccountStore {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        let (snapshot, _) = watch::channel(AccountSnapshot::default());
        Self { store, snapshot }
    }

    /// Fetch every account from the store and replace the cache.
    pub async fn load(&self) -> Result<Vec<Account>, EngineError> {
        let documents = self.store.list(Collection::Accounts).await?;
        let accounts = documents
            .into_iter()
            .map(from_document)
            .collect::<Result<Vec<Account>, _>>()?;

        tracing::debug!(count = accounts.len(), "accounts loaded");
        self.snapshot
            .send_replace(AccountSnapshot::from_accounts(accounts.clone()));
        Ok(accounts)
    }

    /// Current snapshot. Never performs I/O.
    pub fn snapshot(&self) -> AccountSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn accounts(&self) -> Arc<Vec<Account>> {
        Arc::clone(&self.snapshot.borrow().accounts)
    }

    /// The primary active account, else the first active one.
    pub fn active(&self) -> Option<Account> {
        self.snapshot.borrow().active.clone()
    }

    pub fn active_accounts(&self) -> Vec<Account> {
        self.snapshot
            .borrow()
            .accounts
            .iter()
            .filter(|a| a.active)
            .cloned()
            .collect()
    }

    pub fn get(&self, id: AccountId) -> Option<Account> {
        self.snapshot
            .borrow()
            .accounts
            .iter()
            .find(|a| a.id == id)
            .cloned()
    }

    /// Receive a new snapshot every time the cache changes.
    pub fn subscribe(&self) -> watch::Receiver<AccountSnapshot> {
        self.snapshot.subscribe()
    }

    /// Create or update one account.
    ///
    /// Balances are never written here: a new account must open at zero, and
    /// an existing account keeps its cached balance whatever the caller sent.
    pub async fn upsert(&self, mut account: Account) -> Result<Account, EngineError> {
        let existing = self.get(account.id);

        match &existing {
            Some(current) => account.balance = current.balance,
            None if account.balance != Decimal::ZERO => {
                return Err(EngineError::OpeningBalanceNotZero);
            }
            None => {}
        }

        if account.active && account.is_primary {
            let snapshot = self.snapshot();
            if let Some(other) = snapshot
                .accounts
                .iter()
                .find(|a| a.id != account.id && a.active && a.is_primary)
            {
                return Err(EngineError::PrimaryConflict {
                    current: other.name.clone(),
                });
            }
        }

        self.persist(account, existing.is_none()).await
    }

    /// Flip the `active` flag of an account.
    pub async fn set_active_flag(
        &self,
        id: AccountId,
        active: bool,
    ) -> Result<Account, EngineError> {
        let account = self.get(id).ok_or(EngineError::AccountNotFound(id))?;
        self.upsert(account.with_active(active)).await
    }

    /// Make `id` the primary account.
    ///
    /// Any previous primary is demoted first, so a failure part-way leaves no
    /// primary rather than two.
    pub async fn set_primary(&self, id: AccountId) -> Result<Account, EngineError> {
        let target = self.get(id).ok_or(EngineError::AccountNotFound(id))?;

        let previous: Vec<Account> = self
            .accounts()
            .iter()
            .filter(|a| a.id != id && a.is_primary)
            .cloned()
            .collect();
        for account in previous {
            tracing::debug!(account = %account.id, "demoting previous primary account");
            self.persist(account.with_primary(false), false).await?;
        }

        self.persist(target.with_primary(true), false).await
    }

    /// Delete an account remotely and drop it from the cache.
    pub async fn remove(&self, id: AccountId) -> Result<Account, EngineError> {
        let account = self.get(id).ok_or(EngineError::AccountNotFound(id))?;
        self.store
            .delete(Collection::Accounts, &id.to_string())
            .await?;

        self.snapshot.send_modify(|snapshot| {
            let remaining: Vec<Account> = snapshot
                .accounts
                .iter()
                .filter(|a| a.id != id)
                .cloned()
                .collect();
            *snapshot = AccountSnapshot::from_accounts(remaining);
        });
        Ok(account)
    }

    /// Merge a confirmed remote copy of an account into the cache.
    pub(crate) fn merge(&self, account: Account) {
        self.snapshot.send_modify(|snapshot| {
            let mut accounts = snapshot.accounts.as_ref().clone();
            match accounts.iter_mut().find(|a| a.id == account.id) {
                Some(slot) => *slot = account,
                None => accounts.push(account),
            }
            *snapshot = AccountSnapshot::from_accounts(accounts);
        });
    }

    async fn persist(&self, account: Account, is_new: bool) -> Result<Account, EngineError> {
        let document = to_document(&account)?;
        let stored = if is_new {
            self.store.create(Collection::Accounts, document).await?
        } else {
            self.store
                .replace(Collection::Accounts, &account.id.to_string(), document)
                .await?
        };

        let stored: Account = from_document(stored)?;
        self.merge(stored.clone());
        Ok(stored)
    }
}
