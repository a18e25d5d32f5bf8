use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type AccountId = Uuid;

/// A checking account held by the session owner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub id: AccountId,
    pub name: String,
    pub agency_code: String,
    pub account_number: String,
    pub balance: Decimal,
    pub active: bool,
    pub is_primary: bool,
    /// How far below zero the balance may go. Zero disallows negative balances.
    #[serde(default)]
    pub overdraft_limit: Decimal,
}

impl Account {
    /// Create a new active, non-primary account with a zero balance.
    pub fn new(
        name: impl Into<String>,
        agency_code: impl Into<String>,
        account_number: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            agency_code: agency_code.into(),
            account_number: account_number.into(),
            balance: Decimal::ZERO,
            active: true,
            is_primary: false,
            overdraft_limit: Decimal::ZERO,
        }
    }

    pub fn with_primary(mut self, primary: bool) -> Self {
        self.is_primary = primary;
        self
    }

    pub fn with_active(mut self, active: bool) -> Self {
        self.active = active;
        self
    }

    pub fn with_overdraft_limit(mut self, limit: Decimal) -> Self {
        self.overdraft_limit = limit;
        self
    }

    /// Returns true if `amount` can leave this account without breaching the overdraft limit.
    pub fn can_cover(&self, amount: Decimal) -> bool {
        self.balance + self.overdraft_limit >= amount
    }

    fn is_active_primary(&self) -> bool {
        self.active && self.is_primary
    }
}

/// Resolve the active account: the primary active account, else the first
/// active account, else none.
pub fn resolve_active(accounts: &[Account]) -> Option<&Account> {
    accounts
        .iter()
        .find(|a| a.is_active_primary())
        .or_else(|| accounts.iter().find(|a| a.active))
}

/// Returns the ids of every active account flagged as primary.
/// More than one entry means the at-most-one-primary rule is broken.
pub fn active_primaries(accounts: &[Account]) -> Vec<AccountId> {
    accounts
        .iter()
        .filter(|a| a.is_active_primary())
        .map(|a| a.id)
        .collect()
}
