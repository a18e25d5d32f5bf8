use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Serialize;

use crate::domain::{Account, AccountId};
use crate::storage::{Collection, ObjectStore, StoreError, from_document, to_document};

use super::{AccountStore, EngineError};

#[derive(Serialize)]
struct BalancePatch {
    balance: Decimal,
}

/// The only writer of account balances.
///
/// Reads the current balance from the Account Store snapshot rather than the
/// store, so the caller must be the sole writer for the result to be correct.
/// Debit preconditions are the caller's job; nothing is re-validated here.
pub struct BalanceMutator {
    store: Arc<dyn ObjectStore>,
    accounts: Arc<AccountStore>,
}

impl BalanceMutator {
    pub fn new(store: Arc<dyn ObjectStore>, accounts: Arc<AccountStore>) -> Self {
        Self { store, accounts }
    }

    /// Write `current + delta` as the account's balance with one partial update.
    pub async fn apply_delta(
        &self,
        account_id: AccountId,
        delta: Decimal,
    ) -> Result<Account, EngineError> {
        let current = self
            .accounts
            .get(account_id)
            .ok_or(EngineError::AccountNotFound(account_id))?;
        let balance = current.balance + delta;

        let failed = |source: StoreError| EngineError::BalanceUpdateFailed { account_id, source };
        let patch = to_document(&BalancePatch { balance }).map_err(failed)?;
        let stored = self
            .store
            .patch(Collection::Accounts, &account_id.to_string(), patch)
            .await
            .map_err(failed)?;
        let updated: Account = from_document(stored).map_err(failed)?;

        tracing::debug!(
            account = %account_id,
            %delta,
            balance = %updated.balance,
            "balance updated"
        );
        self.accounts.merge(updated.clone());
        Ok(updated)
    }
}
