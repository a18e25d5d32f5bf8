use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{AccountId, TransactionId};

/// Identifies one execution of a transfer. Re-submitting the same id never
/// moves money twice.
pub type TransferAttemptId = Uuid;

/// Audit-only record of a transfer. Never consulted to compute balances.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferRecord {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub description: String,
    pub amount: Decimal,
    pub origin_account_id: AccountId,
    pub destination_account_id: AccountId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transfer_id: Option<TransferAttemptId>,
}

impl TransferRecord {
    pub fn for_attempt(attempt: &TransferAttempt) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: attempt.timestamp,
            description: attempt.description.clone(),
            amount: attempt.amount,
            origin_account_id: attempt.origin,
            destination_account_id: attempt.destination,
            transfer_id: Some(attempt.id),
        }
    }
}

/// Progress of a transfer attempt. Each stage names the last step that committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferStage {
    /// Preconditions checked, nothing written yet
    Validated,
    /// Debit leg appended to the origin's ledger
    DebitRecorded,
    /// Origin balance reduced
    OriginDebited,
    /// Credit leg appended to the destination's ledger
    CreditRecorded,
    /// Destination balance increased
    Settled,
}

impl TransferStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStage::Validated => "validated",
            TransferStage::DebitRecorded => "debit_recorded",
            TransferStage::OriginDebited => "origin_debited",
            TransferStage::CreditRecorded => "credit_recorded",
            TransferStage::Settled => "settled",
        }
    }

    /// True once money has left the origin but has not yet fully arrived.
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            TransferStage::OriginDebited | TransferStage::CreditRecorded
        )
    }
}

impl std::fmt::Display for TransferStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Journal entry for one transfer execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferAttempt {
    pub id: TransferAttemptId,
    pub origin: AccountId,
    pub destination: AccountId,
    pub amount: Decimal,
    pub description: String,
    pub timestamp: DateTime<Utc>,
    pub stage: TransferStage,
    pub debit_entry: Option<TransactionId>,
    pub credit_entry: Option<TransactionId>,
}

impl TransferAttempt {
    pub fn new(
        id: TransferAttemptId,
        origin: AccountId,
        destination: AccountId,
        amount: Decimal,
        description: impl Into<String>,
    ) -> Self {
        assert!(amount > Decimal::ZERO, "Transfer amount must be positive");
        Self {
            id,
            origin,
            destination,
            amount,
            description: description.into(),
            timestamp: Utc::now(),
            stage: TransferStage::Validated,
            debit_entry: None,
            credit_entry: None,
        }
    }

    pub fn is_settled(&self) -> bool {
        self.stage == TransferStage::Settled
    }

    /// Advance to `stage`. Stages only move forward.
    pub fn advance(&mut self, stage: TransferStage) {
        debug_assert!(stage > self.stage, "transfer stage moved backwards");
        self.stage = stage;
    }
}

/// Default description for a transfer that was submitted without one.
pub fn default_transfer_description(destination_name: &str) -> String {
    format!("Transfer to {}", destination_name)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_attempt() -> TransferAttempt {
        TransferAttempt::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            Uuid::new_v4(),
            dec!(300),
            "rent",
        )
    }

    #[test]
    fn test_new_attempt_starts_validated() {
        let attempt = sample_attempt();
        assert_eq!(attempt.stage, TransferStage::Validated);
        assert!(!attempt.is_settled());
        assert!(attempt.debit_entry.is_none());
    }

    #[test]
    fn test_stage_ordering() {
        assert!(TransferStage::Validated < TransferStage::DebitRecorded);
        assert!(TransferStage::DebitRecorded < TransferStage::OriginDebited);
        assert!(TransferStage::OriginDebited < TransferStage::CreditRecorded);
        assert!(TransferStage::CreditRecorded < TransferStage::Settled);
    }

    #[test]
    fn test_in_flight_stages() {
        assert!(!TransferStage::Validated.is_in_flight());
        assert!(!TransferStage::DebitRecorded.is_in_flight());
        assert!(TransferStage::OriginDebited.is_in_flight());
        assert!(TransferStage::CreditRecorded.is_in_flight());
        assert!(!TransferStage::Settled.is_in_flight());
    }

    #[test]
    fn test_record_mirrors_attempt() {
        let attempt = sample_attempt();
        let record = TransferRecord::for_attempt(&attempt);

        assert_eq!(record.amount, attempt.amount);
        assert_eq!(record.origin_account_id, attempt.origin);
        assert_eq!(record.destination_account_id, attempt.destination);
        assert_eq!(record.transfer_id, Some(attempt.id));
    }

    #[test]
    fn test_default_description() {
        assert_eq!(default_transfer_description("Savings"), "Transfer to Savings");
    }

    #[test]
    #[should_panic(expected = "Transfer amount must be positive")]
    fn test_attempt_requires_positive_amount() {
        TransferAttempt::new(Uuid::new_v4(), Uuid::new_v4(), Uuid::new_v4(), dec!(0), "x");
    }
}
