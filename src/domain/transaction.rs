use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{AccountId, TransferAttemptId};

pub type TransactionId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionKind {
    Income,
    Expense,
    Transfer,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Income => "income",
            TransactionKind::Expense => "expense",
            TransactionKind::Transfer => "transfer",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "income" => Some(TransactionKind::Income),
            "expense" => Some(TransactionKind::Expense),
            "transfer" => Some(TransactionKind::Transfer),
            _ => None,
        }
    }
}

impl std::fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One entry in an account's ledger.
///
/// Entries are append-only: a correction replaces the stored document with a
/// new `version` under the same id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: TransactionId,
    /// The account whose ledger this entry belongs to
    pub account_id: AccountId,
    pub timestamp: DateTime<Utc>,
    pub description: String,
    /// Always a positive magnitude; the sign comes from `kind`
    pub amount: Decimal,
    pub kind: TransactionKind,
    /// Present only for transfer legs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub destination_account_id: Option<AccountId>,
    /// Present only for transfer legs
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub origin_account_id: Option<AccountId>,
    /// Transfer attempt both legs belong to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transfer_id: Option<TransferAttemptId>,
    #[serde(default = "initial_version")]
    pub version: u32,
}

fn initial_version() -> u32 {
    1
}

impl Transaction {
    /// Create a single-account entry (income or expense).
    pub fn new(
        account_id: AccountId,
        kind: TransactionKind,
        amount: Decimal,
        description: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        assert!(amount > Decimal::ZERO, "Transaction amount must be positive");
        Self {
            id: Uuid::new_v4(),
            account_id,
            timestamp,
            description: description.into(),
            amount,
            kind,
            destination_account_id: None,
            origin_account_id: None,
            transfer_id: None,
            version: initial_version(),
        }
    }

    /// Create the debit leg of a transfer, recorded in the origin's ledger.
    pub fn debit_leg(
        transfer_id: TransferAttemptId,
        origin: AccountId,
        destination: AccountId,
        amount: Decimal,
        description: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let mut tx = Self::new(
            origin,
            TransactionKind::Transfer,
            amount,
            description,
            timestamp,
        );
        tx.origin_account_id = Some(origin);
        tx.destination_account_id = Some(destination);
        tx.transfer_id = Some(transfer_id);
        tx
    }

    /// Create the credit leg of a transfer, recorded in the destination's ledger.
    pub fn credit_leg(
        transfer_id: TransferAttemptId,
        origin: AccountId,
        destination: AccountId,
        amount: Decimal,
        description: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        let mut tx = Self::debit_leg(
            transfer_id,
            origin,
            destination,
            amount,
            description,
            timestamp,
        );
        tx.account_id = destination;
        tx
    }

    pub fn is_transfer(&self) -> bool {
        self.kind == TransactionKind::Transfer
    }

    /// True for the leg that moves money into its account.
    pub fn is_credit_leg(&self) -> bool {
        self.is_transfer() && self.destination_account_id == Some(self.account_id)
    }

    /// The effect of this entry on its own account's balance.
    pub fn signed_amount(&self) -> Decimal {
        let magnitude = self.amount.abs();
        match self.kind {
            TransactionKind::Income => magnitude,
            TransactionKind::Expense => -magnitude,
            TransactionKind::Transfer if self.is_credit_leg() => magnitude,
            TransactionKind::Transfer => -magnitude,
        }
    }
}
