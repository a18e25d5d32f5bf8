//! Ordered, non-atomic money movements.
//!
//! A transfer runs as: validate, spawn the audit record, append the debit
//! leg, debit the origin, append the credit leg, credit the destination. The
//! debit always precedes the credit. Once the debit leg is written the only
//! way out is forward, through [`TransferOrchestrator::resume_transfer`].

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rust_decimal::Decimal;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::domain::{
    Account, AccountId, Transaction, TransactionId, TransactionKind, TransferAttempt,
    TransferAttemptId, TransferRecord, TransferStage, default_transfer_description,
};
use crate::storage::{Collection, ObjectStore, StoreError, to_document};

use super::{
    AccountStore, BalanceMutator, EngineError, PendingOperation, TransactionLedger, WriteStep,
};

/// A transfer as submitted by a caller.
#[derive(Debug, Clone)]
pub struct TransferRequest {
    /// Caller-supplied attempt id. Re-submitting a known id never moves money twice.
    pub attempt_id: Option<TransferAttemptId>,
    /// Explicit origin; `None` uses the active account
    pub origin: Option<AccountId>,
    pub destination: AccountId,
    pub description: String,
    pub amount: Decimal,
}

impl TransferRequest {
    pub fn new(
        origin: Option<AccountId>,
        destination: AccountId,
        description: impl Into<String>,
        amount: Decimal,
    ) -> Self {
        Self {
            attempt_id: None,
            origin,
            destination,
            description: description.into(),
            amount,
        }
    }

    pub fn with_attempt_id(mut self, attempt_id: TransferAttemptId) -> Self {
        self.attempt_id = Some(attempt_id);
        self
    }
}

/// Result of a settled transfer
#[derive(Debug, Clone)]
pub struct TransferReceipt {
    pub attempt: TransferAttempt,
    pub origin: Account,
    pub destination: Account,
    pub debit: Transaction,
    pub credit: Transaction,
}

/// Result of a single-account posting
#[derive(Debug, Clone)]
pub struct PostingReceipt {
    pub transaction: Transaction,
    pub account: Account,
}

/// A balance delta whose ledger side already committed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingPosting {
    pub transaction_id: TransactionId,
    pub account_id: AccountId,
    pub delta: Decimal,
}

pub struct TransferOrchestrator {
    store: Arc<dyn ObjectStore>,
    accounts: Arc<AccountStore>,
    ledger: Arc<TransactionLedger>,
    mutator: BalanceMutator,
    attempts: Mutex<HashMap<TransferAttemptId, TransferAttempt>>,
    postings: Mutex<HashMap<TransactionId, PendingPosting>>,
    audit: Mutex<Vec<JoinHandle<()>>>,
}

impl TransferOrchestrator {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        accounts: Arc<AccountStore>,
        ledger: Arc<TransactionLedger>,
    ) -> Self {
        let mutator = BalanceMutator::new(Arc::clone(&store), Arc::clone(&accounts));
        Self {
            store,
            accounts,
            ledger,
            mutator,
            attempts: Mutex::new(HashMap::new()),
            postings: Mutex::new(HashMap::new()),
            audit: Mutex::new(Vec::new()),
        }
    }

    // ========================
    // Transfers
    // ========================

    /// Move `amount` from the origin to the destination.
    pub async fn transfer(
        &self,
        request: TransferRequest,
    ) -> Result<TransferReceipt, EngineError> {
        if let Some(id) = request.attempt_id {
            if let Some(existing) = self.attempt(id) {
                if !Self::same_movement(&existing, &request) {
                    return Err(EngineError::AttemptMismatch(id));
                }
                tracing::info!(
                    attempt = %id,
                    stage = %existing.stage,
                    "transfer attempt resubmitted"
                );
                return self.run(existing).await;
            }
        }

        let attempt = self.validate(&request)?;
        tracing::info!(
            attempt = %attempt.id,
            origin = %attempt.origin,
            destination = %attempt.destination,
            amount = %attempt.amount,
            "transfer validated"
        );

        self.record_audit(&attempt);
        self.run(attempt).await
    }

    /// Continue a transfer from the last step that committed.
    pub async fn resume_transfer(
        &self,
        attempt_id: TransferAttemptId,
    ) -> Result<TransferReceipt, EngineError> {
        let attempt = self
            .attempt(attempt_id)
            .ok_or(EngineError::TransferAttemptNotFound(attempt_id))?;
        tracing::info!(attempt = %attempt_id, stage = %attempt.stage, "resuming transfer");
        self.run(attempt).await
    }

    pub fn attempt(&self, attempt_id: TransferAttemptId) -> Option<TransferAttempt> {
        self.attempts.lock().get(&attempt_id).cloned()
    }

    /// Attempts that wrote something but have not settled.
    pub fn unsettled_transfers(&self) -> Vec<TransferAttempt> {
        let mut pending: Vec<TransferAttempt> = self
            .attempts
            .lock()
            .values()
            .filter(|a| !a.is_settled())
            .cloned()
            .collect();
        pending.sort_by_key(|a| a.timestamp);
        pending
    }

    /// A resubmission must name the same movement; an omitted origin matches any.
    fn same_movement(existing: &TransferAttempt, request: &TransferRequest) -> bool {
        existing.destination == request.destination
            && existing.amount == request.amount
            && request.origin.is_none_or(|origin| origin == existing.origin)
    }

    fn validate(&self, request: &TransferRequest) -> Result<TransferAttempt, EngineError> {
        if request.amount <= Decimal::ZERO {
            return Err(EngineError::InvalidAmount(
                "Amount must be positive".to_string(),
            ));
        }

        let destination = self
            .accounts
            .get(request.destination)
            .ok_or(EngineError::AccountNotFound(request.destination))?;
        if !destination.active {
            return Err(EngineError::DestinationInactive {
                name: destination.name,
            });
        }

        let origin = match request.origin {
            Some(id) => self.accounts.get(id),
            None => self.accounts.active(),
        }
        .ok_or(EngineError::NoOriginSelected)?;

        if origin.id == destination.id {
            return Err(EngineError::SameAccount);
        }
        Self::ensure_covered(&origin, request.amount)?;

        let description = if request.description.trim().is_empty() {
            default_transfer_description(&destination.name)
        } else {
            request.description.clone()
        };

        Ok(TransferAttempt::new(
            request.attempt_id.unwrap_or_else(Uuid::new_v4),
            origin.id,
            destination.id,
            request.amount,
            description,
        ))
    }

    /// Spawn the audit write as an independent task. Its outcome is only logged.
    fn record_audit(&self, attempt: &TransferAttempt) {
        let store = Arc::clone(&self.store);
        let record = TransferRecord::for_attempt(attempt);
        let attempt_id = attempt.id;

        let handle = tokio::spawn(async move {
            let result = match to_document(&record) {
                Ok(document) => store.create(Collection::Transfers, document).await.map(|_| ()),
                Err(err) => Err(err),
            };
            match result {
                Ok(()) => tracing::debug!(attempt = %attempt_id, "transfer audit record written"),
                Err(source) => {
                    let err = EngineError::AuditWriteFailed {
                        attempt: attempt_id,
                        source,
                    };
                    tracing::warn!(error = %err, "transfer audit record lost");
                }
            }
        });

        let mut audit = self.audit.lock();
        audit.retain(|h| !h.is_finished());
        audit.push(handle);
    }

    /// Wait for every outstanding audit write to finish.
    pub async fn drain_audit(&self) {
        let handles = std::mem::take(&mut *self.audit.lock());
        for handle in handles {
            if let Err(err) = handle.await {
                tracing::warn!(error = %err, "audit task did not complete");
            }
        }
    }

    async fn run(&self, mut attempt: TransferAttempt) -> Result<TransferReceipt, EngineError> {
        loop {
            match attempt.stage {
                TransferStage::Validated => {
                    let leg = Transaction::debit_leg(
                        attempt.id,
                        attempt.origin,
                        attempt.destination,
                        attempt.amount,
                        attempt.description.clone(),
                        attempt.timestamp,
                    );
                    match self.ledger.append(leg).await {
                        Ok(entry) => {
                            attempt.debit_entry = Some(entry.id);
                            self.commit(&mut attempt, TransferStage::DebitRecorded);
                        }
                        Err(source) => {
                            // Nothing moved yet, so the attempt can be dropped.
                            self.attempts.lock().remove(&attempt.id);
                            return Err(EngineError::RemoteWrite {
                                step: WriteStep::RecordDebit,
                                committed: Vec::new(),
                                operation: PendingOperation::None,
                                source,
                            });
                        }
                    }
                }

                TransferStage::DebitRecorded => {
                    let origin = self
                        .accounts
                        .get(attempt.origin)
                        .ok_or(EngineError::AccountNotFound(attempt.origin))?;
                    Self::ensure_covered(&origin, attempt.amount).map_err(|reason| {
                        tracing::warn!(
                            attempt = %attempt.id,
                            error = %reason,
                            "origin debit blocked"
                        );
                        EngineError::StepBlocked {
                            step: WriteStep::DebitOrigin,
                            committed: vec![WriteStep::RecordDebit],
                            operation: PendingOperation::Transfer(attempt.id),
                            reason: Box::new(reason),
                        }
                    })?;

                    self.mutator
                        .apply_delta(attempt.origin, -attempt.amount)
                        .await
                        .map_err(|err| match err {
                            EngineError::BalanceUpdateFailed { source, .. } => {
                                tracing::warn!(attempt = %attempt.id, "origin debit failed");
                                EngineError::RemoteWrite {
                                    step: WriteStep::DebitOrigin,
                                    committed: vec![WriteStep::RecordDebit],
                                    operation: PendingOperation::Transfer(attempt.id),
                                    source,
                                }
                            }
                            other => other,
                        })?;
                    self.commit(&mut attempt, TransferStage::OriginDebited);
                }

                TransferStage::OriginDebited => {
                    let entry = match self.ledger.transfer_leg(attempt.id, attempt.destination) {
                        Some(entry) => entry,
                        None => {
                            let leg = Transaction::credit_leg(
                                attempt.id,
                                attempt.origin,
                                attempt.destination,
                                attempt.amount,
                                attempt.description.clone(),
                                attempt.timestamp,
                            );
                            self.ledger.append(leg).await.map_err(|source| {
                                self.in_flight(&attempt, WriteStep::RecordCredit, source)
                            })?
                        }
                    };
                    attempt.credit_entry = Some(entry.id);
                    self.commit(&mut attempt, TransferStage::CreditRecorded);
                }

                TransferStage::CreditRecorded => {
                    self.mutator
                        .apply_delta(attempt.destination, attempt.amount)
                        .await
                        .map_err(|err| match err {
                            EngineError::BalanceUpdateFailed { source, .. } => {
                                self.in_flight(&attempt, WriteStep::CreditDestination, source)
                            }
                            other => other,
                        })?;
                    self.commit(&mut attempt, TransferStage::Settled);
                    tracing::info!(
                        attempt = %attempt.id,
                        amount = %attempt.amount,
                        "transfer settled"
                    );
                }

                TransferStage::Settled => return self.receipt(&attempt),
            }
        }
    }

    /// Record a completed step in the journal.
    fn commit(&self, attempt: &mut TransferAttempt, stage: TransferStage) {
        attempt.advance(stage);
        tracing::debug!(attempt = %attempt.id, stage = %stage, "transfer step committed");
        self.attempts.lock().insert(attempt.id, attempt.clone());
    }

    fn in_flight(
        &self,
        attempt: &TransferAttempt,
        step: WriteStep,
        source: StoreError,
    ) -> EngineError {
        tracing::error!(
            attempt = %attempt.id,
            origin = %attempt.origin,
            destination = %attempt.destination,
            amount = %attempt.amount,
            step = %step,
            "transfer left in flight"
        );
        EngineError::PartialTransfer {
            attempt: attempt.id,
            origin: attempt.origin,
            destination: attempt.destination,
            amount: attempt.amount,
            step,
            stage: attempt.stage,
            source,
        }
    }

    fn receipt(&self, attempt: &TransferAttempt) -> Result<TransferReceipt, EngineError> {
        let origin = self
            .accounts
            .get(attempt.origin)
            .ok_or(EngineError::AccountNotFound(attempt.origin))?;
        let destination = self
            .accounts
            .get(attempt.destination)
            .ok_or(EngineError::AccountNotFound(attempt.destination))?;
        let debit = self.find_entry(attempt, attempt.debit_entry, WriteStep::RecordDebit)?;
        let credit = self.find_entry(attempt, attempt.credit_entry, WriteStep::RecordCredit)?;

        Ok(TransferReceipt {
            attempt: attempt.clone(),
            origin,
            destination,
            debit,
            credit,
        })
    }

    fn find_entry(
        &self,
        attempt: &TransferAttempt,
        id: Option<TransactionId>,
        step: WriteStep,
    ) -> Result<Transaction, EngineError> {
        let id = id.ok_or(EngineError::MissingTransferLeg {
            attempt: attempt.id,
            step,
        })?;
        self.ledger
            .find(id)
            .ok_or(EngineError::TransactionNotFound(id))
    }

    fn ensure_covered(account: &Account, amount: Decimal) -> Result<(), EngineError> {
        if account.can_cover(amount) {
            Ok(())
        } else {
            Err(EngineError::InsufficientFunds {
                account_name: account.name.clone(),
                balance: account.balance,
                required: amount,
            })
        }
    }

    // ========================
    // Single-account postings
    // ========================

    pub async fn deposit(
        &self,
        account_id: AccountId,
        amount: Decimal,
        description: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Result<PostingReceipt, EngineError> {
        self.post(account_id, TransactionKind::Income, amount, description.into(), timestamp)
            .await
    }

    pub async fn withdraw(
        &self,
        account_id: AccountId,
        amount: Decimal,
        description: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Result<PostingReceipt, EngineError> {
        self.post(account_id, TransactionKind::Expense, amount, description.into(), timestamp)
            .await
    }

    /// Append an income or expense entry, then apply its delta.
    pub async fn post(
        &self,
        account_id: AccountId,
        kind: TransactionKind,
        amount: Decimal,
        description: String,
        timestamp: DateTime<Utc>,
    ) -> Result<PostingReceipt, EngineError> {
        if kind == TransactionKind::Transfer {
            return Err(EngineError::UnsupportedKind(kind));
        }
        if amount <= Decimal::ZERO {
            return Err(EngineError::InvalidAmount(
                "Amount must be positive".to_string(),
            ));
        }

        let account = self
            .accounts
            .get(account_id)
            .ok_or(EngineError::AccountNotFound(account_id))?;
        if kind == TransactionKind::Expense {
            Self::ensure_covered(&account, amount)?;
        }

        let entry = Transaction::new(account_id, kind, amount, description, timestamp);
        let entry = self
            .ledger
            .append(entry)
            .await
            .map_err(|source| EngineError::RemoteWrite {
                step: WriteStep::RecordEntry,
                committed: Vec::new(),
                operation: PendingOperation::None,
                source,
            })?;

        let account = self
            .apply_posting(
                PendingPosting {
                    transaction_id: entry.id,
                    account_id,
                    delta: entry.signed_amount(),
                },
                WriteStep::RecordEntry,
            )
            .await?;

        tracing::info!(
            account = %account_id,
            kind = %kind,
            amount = %amount,
            "posting settled"
        );
        Ok(PostingReceipt {
            transaction: entry,
            account,
        })
    }

    /// Retry the balance half of a posting whose ledger half already committed.
    pub async fn resume_posting(
        &self,
        transaction_id: TransactionId,
    ) -> Result<Account, EngineError> {
        let pending = self
            .postings
            .lock()
            .get(&transaction_id)
            .cloned()
            .ok_or(EngineError::TransactionNotFound(transaction_id))?;

        if pending.delta < Decimal::ZERO {
            let account = self
                .accounts
                .get(pending.account_id)
                .ok_or(EngineError::AccountNotFound(pending.account_id))?;
            Self::ensure_covered(&account, -pending.delta).map_err(|reason| {
                EngineError::StepBlocked {
                    step: WriteStep::ApplyBalance,
                    committed: vec![WriteStep::RecordEntry],
                    operation: PendingOperation::Posting(transaction_id),
                    reason: Box::new(reason),
                }
            })?;
        }

        tracing::info!(transaction = %transaction_id, "resuming posting");
        self.apply_posting(pending, WriteStep::RecordEntry).await
    }

    pub fn unsettled_postings(&self) -> Vec<PendingPosting> {
        self.postings.lock().values().cloned().collect()
    }

    fn ensure_posting_settled(&self, transaction_id: TransactionId) -> Result<(), EngineError> {
        if self.postings.lock().contains_key(&transaction_id) {
            return Err(EngineError::PostingUnsettled(transaction_id));
        }
        Ok(())
    }

    async fn apply_posting(
        &self,
        posting: PendingPosting,
        committed: WriteStep,
    ) -> Result<Account, EngineError> {
        self.postings
            .lock()
            .insert(posting.transaction_id, posting.clone());

        let account = self
            .mutator
            .apply_delta(posting.account_id, posting.delta)
            .await
            .map_err(|err| match err {
                EngineError::BalanceUpdateFailed { source, .. } => {
                    tracing::warn!(
                        transaction = %posting.transaction_id,
                        "ledger entry committed without its balance change"
                    );
                    EngineError::RemoteWrite {
                        step: WriteStep::ApplyBalance,
                        committed: vec![committed],
                        operation: PendingOperation::Posting(posting.transaction_id),
                        source,
                    }
                }
                other => other,
            })?;

        self.postings.lock().remove(&posting.transaction_id);
        Ok(account)
    }

    // ========================
    // Corrections
    // ========================

    /// Replace an income/expense entry and apply the difference to the balance.
    pub async fn amend(&self, updated: Transaction) -> Result<PostingReceipt, EngineError> {
        let current = self
            .ledger
            .find(updated.id)
            .ok_or(EngineError::TransactionNotFound(updated.id))?;
        if current.is_transfer() || updated.is_transfer() {
            return Err(EngineError::TransferLegImmutable(updated.id));
        }
        self.ensure_posting_settled(current.id)?;
        if updated.account_id != current.account_id {
            return Err(EngineError::InvalidCorrection(
                "an entry cannot move to another account".to_string(),
            ));
        }
        if updated.amount <= Decimal::ZERO {
            return Err(EngineError::InvalidAmount(
                "Amount must be positive".to_string(),
            ));
        }

        let delta = updated.signed_amount() - current.signed_amount();
        let account = self
            .accounts
            .get(current.account_id)
            .ok_or(EngineError::AccountNotFound(current.account_id))?;
        if delta < Decimal::ZERO {
            Self::ensure_covered(&account, -delta)?;
        }

        let stored = self.ledger.update(updated).await?;
        if delta.is_zero() {
            return Ok(PostingReceipt {
                transaction: stored,
                account,
            });
        }

        let account = self
            .apply_posting(
                PendingPosting {
                    transaction_id: stored.id,
                    account_id: stored.account_id,
                    delta,
                },
                WriteStep::CorrectEntry,
            )
            .await?;
        tracing::info!(transaction = %stored.id, %delta, "entry amended");
        Ok(PostingReceipt {
            transaction: stored,
            account,
        })
    }

    /// Remove an income/expense entry and reverse its effect on the balance.
    pub async fn void(&self, id: TransactionId) -> Result<Account, EngineError> {
        let current = self
            .ledger
            .find(id)
            .ok_or(EngineError::TransactionNotFound(id))?;
        if current.is_transfer() {
            return Err(EngineError::TransferLegImmutable(id));
        }
        self.ensure_posting_settled(id)?;

        let delta = -current.signed_amount();
        let account = self
            .accounts
            .get(current.account_id)
            .ok_or(EngineError::AccountNotFound(current.account_id))?;
        if delta < Decimal::ZERO {
            Self::ensure_covered(&account, -delta)?;
        }

        self.ledger.remove(id).await?;
        let account = self
            .apply_posting(
                PendingPosting {
                    transaction_id: id,
                    account_id: current.account_id,
                    delta,
                },
                WriteStep::CorrectEntry,
            )
            .await?;
        tracing::info!(transaction = %id, "entry voided");
        Ok(account)
    }
}
