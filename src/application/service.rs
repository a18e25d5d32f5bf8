use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tokio::sync::watch;

use crate::domain::{
    Account, AccountId, Transaction, TransactionId, TransactionKind, TransferAttempt,
    TransferAttemptId, TransferRecord,
};
use crate::storage::{Collection, ObjectStore, from_document};

use super::{
    AccountStore, EngineConfig, EngineError, IntegrityReport, LedgerView, PendingPosting,
    PostingReceipt, Reconciler, StatementLine, TransactionLedger, TransferOrchestrator,
    TransferReceipt, TransferRequest, build_integrity_report, statement,
};

/// Application facade wiring every component around one object store.
/// This is the primary interface for any client (CLI, tests, embedding apps).
///
/// Every mutating call republishes the derived view, whether it succeeded or
/// failed part-way.
pub struct Engine {
    store: Arc<dyn ObjectStore>,
    accounts: Arc<AccountStore>,
    ledger: Arc<TransactionLedger>,
    orchestrator: TransferOrchestrator,
    reconciler: Reconciler,
}

impl Engine {
    pub fn new(store: Arc<dyn ObjectStore>, config: EngineConfig) -> Self {
        let accounts = Arc::new(AccountStore::new(Arc::clone(&store)));
        let ledger = Arc::new(TransactionLedger::new(Arc::clone(&store)));
        let orchestrator = TransferOrchestrator::new(
            Arc::clone(&store),
            Arc::clone(&accounts),
            Arc::clone(&ledger),
        );
        let reconciler = Reconciler::new(Arc::clone(&accounts), Arc::clone(&ledger), &config);

        Self {
            store,
            accounts,
            ledger,
            orchestrator,
            reconciler,
        }
    }

    /// Build an engine and fill both caches from the store.
    pub async fn open(
        store: Arc<dyn ObjectStore>,
        config: EngineConfig,
    ) -> Result<Self, EngineError> {
        let engine = Self::new(store, config);
        engine.load().await?;
        Ok(engine)
    }

    /// Refresh accounts and ledger from the store.
    #[tracing::instrument(skip(self), err)]
    pub async fn load(&self) -> Result<(), EngineError> {
        let result = async {
            self.accounts.load().await?;
            self.ledger.load().await?;
            Ok::<(), EngineError>(())
        }
        .await;
        self.published(result)
    }

    fn published<T>(&self, result: Result<T, EngineError>) -> Result<T, EngineError> {
        self.reconciler.publish();
        result
    }

    // ========================
    // Accounts
    // ========================

    pub fn get_accounts(&self) -> Arc<Vec<Account>> {
        self.accounts.accounts()
    }

    pub fn get_active_account(&self) -> Option<Account> {
        self.accounts.active()
    }

    pub fn get_account(&self, id: AccountId) -> Option<Account> {
        self.accounts.get(id)
    }

    /// Find an account by exact name, then by account number, then by id.
    pub fn find_account(&self, key: &str) -> Option<Account> {
        let accounts = self.accounts.accounts();
        accounts
            .iter()
            .find(|a| a.name == key)
            .or_else(|| accounts.iter().find(|a| a.account_number == key))
            .or_else(|| accounts.iter().find(|a| a.id.to_string() == key))
            .cloned()
    }

    /// Open a new, active, zero-balance account.
    #[tracing::instrument(skip(self), err)]
    pub async fn open_account(
        &self,
        name: &str,
        agency_code: &str,
        account_number: &str,
        overdraft_limit: Decimal,
    ) -> Result<Account, EngineError> {
        if name.trim().is_empty() {
            return Err(EngineError::InvalidAccount(
                "account name cannot be empty".to_string(),
            ));
        }
        if overdraft_limit < Decimal::ZERO {
            return Err(EngineError::InvalidAmount(
                "Overdraft limit cannot be negative".to_string(),
            ));
        }
        let account = Account::new(name, agency_code, account_number)
            .with_overdraft_limit(overdraft_limit);
        self.upsert_account(account).await
    }

    #[tracing::instrument(skip(self, account), fields(account = %account.id), err)]
    pub async fn upsert_account(&self, account: Account) -> Result<Account, EngineError> {
        let result = self.accounts.upsert(account).await;
        self.published(result)
    }

    #[tracing::instrument(skip(self), err)]
    pub async fn set_primary(&self, id: AccountId) -> Result<Account, EngineError> {
        let result = self.accounts.set_primary(id).await;
        self.published(result)
    }

    #[tracing::instrument(skip(self), err)]
    pub async fn set_account_active(
        &self,
        id: AccountId,
        active: bool,
    ) -> Result<Account, EngineError> {
        let result = self.accounts.set_active_flag(id, active).await;
        self.published(result)
    }

    /// Delete an account no ledger entry refers to.
    #[tracing::instrument(skip(self), err)]
    pub async fn remove_account(&self, id: AccountId) -> Result<Account, EngineError> {
        if self.ledger.references(id) {
            return Err(EngineError::AccountInUse(id));
        }
        let result = self.accounts.remove(id).await;
        self.published(result)
    }

    // ========================
    // Ledger
    // ========================

    /// Cached entries in storage insertion order.
    pub fn get_transactions(&self) -> Arc<Vec<Transaction>> {
        self.ledger.list()
    }

    pub fn get_account_transactions(&self, account_id: AccountId) -> Vec<Transaction> {
        self.ledger.for_account(account_id)
    }

    pub fn get_transaction(&self, id: TransactionId) -> Option<Transaction> {
        self.ledger.find(id)
    }

    pub fn aggregate(&self, kind: TransactionKind) -> Decimal {
        self.ledger.aggregate(kind)
    }

    /// Post an income or expense entry on `account`, or on the active account.
    #[tracing::instrument(skip(self, description), err)]
    pub async fn create_transaction(
        &self,
        account: Option<AccountId>,
        kind: TransactionKind,
        amount: Decimal,
        description: &str,
        timestamp: DateTime<Utc>,
    ) -> Result<PostingReceipt, EngineError> {
        let account_id = match account {
            Some(id) => id,
            None => self
                .accounts
                .active()
                .map(|a| a.id)
                .ok_or(EngineError::NoActiveAccount)?,
        };
        let result = self
            .orchestrator
            .post(account_id, kind, amount, description.to_string(), timestamp)
            .await;
        self.published(result)
    }

    /// Replace a stored entry without touching any balance.
    #[tracing::instrument(skip(self, transaction), fields(transaction = %transaction.id), err)]
    pub async fn update_transaction(
        &self,
        transaction: Transaction,
    ) -> Result<Transaction, EngineError> {
        let result = self.ledger.update(transaction).await;
        self.published(result)
    }

    /// Delete a stored entry without touching any balance.
    #[tracing::instrument(skip(self), err)]
    pub async fn delete_transaction(&self, id: TransactionId) -> Result<Transaction, EngineError> {
        let result = self.ledger.remove(id).await;
        self.published(result)
    }

    /// Replace an income/expense entry and rebalance its account.
    #[tracing::instrument(skip(self, transaction), fields(transaction = %transaction.id), err)]
    pub async fn amend_transaction(
        &self,
        transaction: Transaction,
    ) -> Result<PostingReceipt, EngineError> {
        let result = self.orchestrator.amend(transaction).await;
        self.published(result)
    }

    /// Delete an income/expense entry and reverse its effect on the balance.
    #[tracing::instrument(skip(self), err)]
    pub async fn void_transaction(&self, id: TransactionId) -> Result<Account, EngineError> {
        let result = self.orchestrator.void(id).await;
        self.published(result)
    }

    // ========================
    // Money movements
    // ========================

    #[tracing::instrument(skip(self, description), err)]
    pub async fn deposit(
        &self,
        account_id: AccountId,
        amount: Decimal,
        description: &str,
    ) -> Result<PostingReceipt, EngineError> {
        let result = self
            .orchestrator
            .deposit(account_id, amount, description, Utc::now())
            .await;
        self.published(result)
    }

    #[tracing::instrument(skip(self, description), err)]
    pub async fn withdraw(
        &self,
        account_id: AccountId,
        amount: Decimal,
        description: &str,
    ) -> Result<PostingReceipt, EngineError> {
        let result = self
            .orchestrator
            .withdraw(account_id, amount, description, Utc::now())
            .await;
        self.published(result)
    }

    /// Move money between two accounts. `origin = None` uses the active account.
    pub async fn transfer(
        &self,
        origin: Option<AccountId>,
        destination: AccountId,
        description: &str,
        amount: Decimal,
    ) -> Result<TransferReceipt, EngineError> {
        self.transfer_with(TransferRequest::new(origin, destination, description, amount))
            .await
    }

    #[tracing::instrument(skip(self), err)]
    pub async fn transfer_with(
        &self,
        request: TransferRequest,
    ) -> Result<TransferReceipt, EngineError> {
        let result = self.orchestrator.transfer(request).await;
        self.published(result)
    }

    /// Finish a transfer that stopped after its debit leg was written.
    #[tracing::instrument(skip(self), err)]
    pub async fn resume_transfer(
        &self,
        attempt_id: TransferAttemptId,
    ) -> Result<TransferReceipt, EngineError> {
        let result = self.orchestrator.resume_transfer(attempt_id).await;
        self.published(result)
    }

    /// Apply the balance change of a posting whose entry is already recorded.
    #[tracing::instrument(skip(self), err)]
    pub async fn resume_posting(
        &self,
        transaction_id: TransactionId,
    ) -> Result<Account, EngineError> {
        let result = self.orchestrator.resume_posting(transaction_id).await;
        self.published(result)
    }

    pub fn pending_transfers(&self) -> Vec<TransferAttempt> {
        self.orchestrator.unsettled_transfers()
    }

    pub fn pending_postings(&self) -> Vec<PendingPosting> {
        self.orchestrator.unsettled_postings()
    }

    pub fn transfer_attempt(&self, attempt_id: TransferAttemptId) -> Option<TransferAttempt> {
        self.orchestrator.attempt(attempt_id)
    }

    /// Audit records of past transfers, read straight from the store.
    pub async fn transfer_records(&self) -> Result<Vec<TransferRecord>, EngineError> {
        let documents = self.store.list(Collection::Transfers).await?;
        let mut records = documents
            .into_iter()
            .map(from_document)
            .collect::<Result<Vec<TransferRecord>, _>>()?;
        records.sort_by_key(|r| r.timestamp);
        Ok(records)
    }

    /// Wait for background audit writes. Call before shutting down.
    pub async fn drain_audit(&self) {
        self.orchestrator.drain_audit().await;
    }

    // ========================
    // Derived state
    // ========================

    pub fn view(&self) -> Arc<LedgerView> {
        self.reconciler.current()
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<LedgerView>> {
        self.reconciler.subscribe()
    }

    pub fn statement(&self, account_id: AccountId) -> Result<Vec<StatementLine>, EngineError> {
        if self.accounts.get(account_id).is_none() {
            return Err(EngineError::AccountNotFound(account_id));
        }
        Ok(statement(account_id, &self.ledger.list()))
    }

    /// Reload both collections and compare every balance with its ledger.
    #[tracing::instrument(skip(self), err)]
    pub async fn check_integrity(&self) -> Result<IntegrityReport, EngineError> {
        self.load().await?;
        let report = build_integrity_report(&self.accounts.accounts(), &self.ledger.list());
        if report.is_healthy() {
            tracing::info!(
                accounts = report.accounts_checked,
                transactions = report.transactions_checked,
                "integrity check passed"
            );
        } else {
            tracing::warn!(
                discrepancies = report.discrepancies.len(),
                orphans = report.orphan_entries.len(),
                unmatched = report.unmatched_transfers.len(),
                "integrity check found problems"
            );
        }
        Ok(report)
    }
}
