use rust_decimal::Decimal;
use thiserror::Error;

use crate::domain::{
    AccountId, TransactionId, TransactionKind, TransferAttemptId, TransferStage,
};
use crate::storage::StoreError;

/// One remote write an operation performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WriteStep {
    /// Append an income/expense entry
    RecordEntry,
    /// Apply a posting's balance delta
    ApplyBalance,
    /// Append a transfer's debit leg to the origin ledger
    RecordDebit,
    /// Reduce the origin balance
    DebitOrigin,
    /// Append a transfer's credit leg to the destination ledger
    RecordCredit,
    /// Increase the destination balance
    CreditDestination,
    /// Replace or delete a ledger entry
    CorrectEntry,
}

impl WriteStep {
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteStep::RecordEntry => "record entry",
            WriteStep::ApplyBalance => "apply balance",
            WriteStep::RecordDebit => "record debit leg",
            WriteStep::DebitOrigin => "debit origin",
            WriteStep::RecordCredit => "record credit leg",
            WriteStep::CreditDestination => "credit destination",
            WriteStep::CorrectEntry => "correct entry",
        }
    }
}

impl std::fmt::Display for WriteStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The operation a failed remote write belongs to, for resuming it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PendingOperation {
    Transfer(TransferAttemptId),
    Posting(TransactionId),
    None,
}

/// Broad classes callers branch on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Rejected before any write
    Validation,
    /// A read or single-write failed with no partial progress
    StoreUnavailable,
    /// A step failed after earlier steps committed
    RemoteWrite,
    /// Origin debited, destination not credited
    PartialTransfer,
    /// Audit record failed; never returned from an operation
    Audit,
}

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Account not found: {0}")]
    AccountNotFound(AccountId),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(TransactionId),

    #[error("Transfer attempt not found: {0}")]
    TransferAttemptNotFound(TransferAttemptId),

    #[error("Destination account '{name}' is inactive")]
    DestinationInactive { name: String },

    #[error("No origin account selected")]
    NoOriginSelected,

    #[error("No active account")]
    NoActiveAccount,

    #[error("Origin and destination are the same account")]
    SameAccount,

    #[error("Insufficient funds in account {account_name}: balance {balance}, required {required}")]
    InsufficientFunds {
        account_name: String,
        balance: Decimal,
        required: Decimal,
    },

    #[error("Account '{current}' is already the primary active account")]
    PrimaryConflict { current: String },

    #[error("New accounts must open with a zero balance; post the opening amount as a deposit")]
    OpeningBalanceNotZero,

    #[error("Account {0} is referenced by ledger entries")]
    AccountInUse(AccountId),

    #[error("Transaction {0} is a transfer leg and cannot be corrected on its own")]
    TransferLegImmutable(TransactionId),

    #[error("Invalid account: {0}")]
    InvalidAccount(String),

    #[error("Invalid correction: {0}")]
    InvalidCorrection(String),

    #[error("Transactions of kind '{0}' cannot be posted directly")]
    UnsupportedKind(TransactionKind),

    #[error("Transaction {0} has an unapplied balance change; resume the posting first")]
    PostingUnsettled(TransactionId),

    #[error("Transfer attempt {0} was already submitted for a different movement")]
    AttemptMismatch(TransferAttemptId),

    #[error("Store unavailable: {0}")]
    StoreUnavailable(#[source] StoreError),

    #[error("Balance update failed for account {account_id}: {source}")]
    BalanceUpdateFailed {
        account_id: AccountId,
        #[source]
        source: StoreError,
    },

    #[error("Step '{step}' failed after {} committed step(s): {source}", .committed.len())]
    RemoteWrite {
        step: WriteStep,
        committed: Vec<WriteStep>,
        operation: PendingOperation,
        #[source]
        source: StoreError,
    },

    #[error("Step '{step}' is blocked after {} committed step(s): {reason}", .committed.len())]
    StepBlocked {
        step: WriteStep,
        committed: Vec<WriteStep>,
        operation: PendingOperation,
        #[source]
        reason: Box<EngineError>,
    },

    #[error("Transfer {attempt} has no ledger entry for step '{step}'")]
    MissingTransferLeg {
        attempt: TransferAttemptId,
        step: WriteStep,
    },

    #[error(
        "Transfer {attempt} of {amount} is in flight: origin {origin} was debited \
         but step '{step}' for destination {destination} failed: {source}"
    )]
    PartialTransfer {
        attempt: TransferAttemptId,
        origin: AccountId,
        destination: AccountId,
        amount: Decimal,
        step: WriteStep,
        stage: TransferStage,
        #[source]
        source: StoreError,
    },

    #[error("Audit record for transfer {attempt} could not be written: {source}")]
    AuditWriteFailed {
        attempt: TransferAttemptId,
        #[source]
        source: StoreError,
    },
}

impl EngineError {
    pub fn class(&self) -> ErrorClass {
        match self {
            EngineError::StoreUnavailable(_)
            | EngineError::BalanceUpdateFailed { .. }
            | EngineError::MissingTransferLeg { .. } => ErrorClass::StoreUnavailable,
            EngineError::RemoteWrite { .. } | EngineError::StepBlocked { .. } => {
                ErrorClass::RemoteWrite
            }
            EngineError::PartialTransfer { .. } => ErrorClass::PartialTransfer,
            EngineError::AuditWriteFailed { .. } => ErrorClass::Audit,
            _ => ErrorClass::Validation,
        }
    }

    /// True when the operation made no writes at all.
    pub fn is_validation(&self) -> bool {
        self.class() == ErrorClass::Validation
    }

    /// True when the operation left committed steps behind that a resume can finish.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.class(),
            ErrorClass::RemoteWrite | ErrorClass::PartialTransfer
        )
    }

    /// The operation to resume after this error, if any.
    pub fn pending_operation(&self) -> PendingOperation {
        match self {
            EngineError::RemoteWrite { operation, .. }
            | EngineError::StepBlocked { operation, .. } => *operation,
            EngineError::PartialTransfer { attempt, .. } => PendingOperation::Transfer(*attempt),
            _ => PendingOperation::None,
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        EngineError::StoreUnavailable(err)
    }
}
