use std::collections::BTreeMap;

use chrono::{DateTime, Datelike, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::domain::{
    self, Account, AccountId, Discrepancy, Transaction, TransactionId, TransactionKind,
    TransferAttemptId, active_primaries,
};

/// Everything a presentation layer needs, derived from the two cached snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerView {
    pub accounts: Vec<Account>,
    pub active: Option<Account>,
    pub totals: Totals,
    pub months: Vec<MonthlyBucket>,
    /// Most recent entries, newest first
    pub recent: Vec<Transaction>,
    pub discrepancies: Vec<Discrepancy>,
}

impl LedgerView {
    pub fn is_consistent(&self) -> bool {
        self.discrepancies.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Totals {
    pub income: Decimal,
    pub expense: Decimal,
    pub transfers: Decimal,
    /// Sum of every account balance
    pub balance: Decimal,
}

/// Income, expense and transfer volume for one calendar month.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonthlyBucket {
    pub year: i32,
    pub month: u32,
    pub income: Decimal,
    pub expense: Decimal,
    pub transfers_out: Decimal,
}

impl MonthlyBucket {
    fn empty(year: i32, month: u32) -> Self {
        Self {
            year,
            month,
            income: Decimal::ZERO,
            expense: Decimal::ZERO,
            transfers_out: Decimal::ZERO,
        }
    }

    pub fn net(&self) -> Decimal {
        self.income - self.expense
    }

    pub fn label(&self) -> String {
        format!("{:04}-{:02}", self.year, self.month)
    }
}

/// One row of an account statement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementLine {
    pub transaction_id: TransactionId,
    pub timestamp: DateTime<Utc>,
    pub description: String,
    pub kind: TransactionKind,
    /// Effect on this account's balance
    pub amount: Decimal,
    pub running_balance: Decimal,
}

/// Result of a full consistency check
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegrityReport {
    pub accounts_checked: usize,
    pub transactions_checked: usize,
    pub discrepancies: Vec<Discrepancy>,
    /// Entries whose account no longer exists
    pub orphan_entries: Vec<TransactionId>,
    /// Transfers whose debit leg has no credit leg
    pub unmatched_transfers: Vec<TransferAttemptId>,
    /// Active primaries, listed only when there is more than one
    pub primary_conflicts: Vec<AccountId>,
}

impl IntegrityReport {
    pub fn is_healthy(&self) -> bool {
        self.discrepancies.is_empty()
            && self.orphan_entries.is_empty()
            && self.unmatched_transfers.is_empty()
            && self.primary_conflicts.is_empty()
    }
}

/// Derive the published view from account and ledger snapshots.
pub fn derive_view(
    accounts: &[Account],
    active: Option<&Account>,
    transactions: &[Transaction],
    recent_limit: usize,
) -> LedgerView {
    let totals = Totals {
        income: domain::aggregate(TransactionKind::Income, transactions),
        expense: domain::aggregate(TransactionKind::Expense, transactions),
        transfers: domain::aggregate(TransactionKind::Transfer, transactions),
        balance: accounts.iter().map(|a| a.balance).sum(),
    };

    LedgerView {
        accounts: accounts.to_vec(),
        active: active.cloned(),
        totals,
        months: monthly_buckets(transactions),
        recent: recent(transactions, recent_limit),
        discrepancies: domain::find_discrepancies(accounts, transactions),
    }
}

/// Per-month volumes, oldest month first.
pub fn monthly_buckets(transactions: &[Transaction]) -> Vec<MonthlyBucket> {
    let mut buckets: BTreeMap<(i32, u32), MonthlyBucket> = BTreeMap::new();

    for tx in transactions {
        let key = (tx.timestamp.year(), tx.timestamp.month());
        let bucket = buckets
            .entry(key)
            .or_insert_with(|| MonthlyBucket::empty(key.0, key.1));
        let amount = tx.amount.abs();
        match tx.kind {
            TransactionKind::Income => bucket.income += amount,
            TransactionKind::Expense => bucket.expense += amount,
            TransactionKind::Transfer if !tx.is_credit_leg() => bucket.transfers_out += amount,
            TransactionKind::Transfer => {}
        }
    }

    buckets.into_values().collect()
}

/// The `limit` newest entries, newest first.
pub fn recent(transactions: &[Transaction], limit: usize) -> Vec<Transaction> {
    let mut sorted = transactions.to_vec();
    sorted.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    sorted.truncate(limit);
    sorted
}

/// Chronological entries of one account with the balance after each.
pub fn statement(account_id: AccountId, transactions: &[Transaction]) -> Vec<StatementLine> {
    let mut entries: Vec<&Transaction> = transactions
        .iter()
        .filter(|tx| tx.account_id == account_id)
        .collect();
    entries.sort_by_key(|tx| tx.timestamp);

    let mut running = Decimal::ZERO;
    entries
        .into_iter()
        .map(|tx| {
            running += tx.signed_amount();
            StatementLine {
                transaction_id: tx.id,
                timestamp: tx.timestamp,
                description: tx.description.clone(),
                kind: tx.kind,
                amount: tx.signed_amount(),
                running_balance: running,
            }
        })
        .collect()
}

pub fn build_integrity_report(
    accounts: &[Account],
    transactions: &[Transaction],
) -> IntegrityReport {
    let mut primary_conflicts = active_primaries(accounts);
    if primary_conflicts.len() < 2 {
        primary_conflicts.clear();
    }

    IntegrityReport {
        accounts_checked: accounts.len(),
        transactions_checked: transactions.len(),
        discrepancies: domain::find_discrepancies(accounts, transactions),
        orphan_entries: domain::orphan_entries(accounts, transactions)
            .into_iter()
            .map(|tx| tx.id)
            .collect(),
        unmatched_transfers: domain::unmatched_transfers(transactions),
        primary_conflicts,
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    use super::*;

    fn at(year: i32, month: u32, day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(year, month, day, 12, 0, 0).unwrap()
    }

    fn entry(
        account: AccountId,
        kind: TransactionKind,
        amount: Decimal,
        ts: DateTime<Utc>,
    ) -> Transaction {
        Transaction::new(account, kind, amount, "entry", ts)
    }

    #[test]
    fn test_monthly_buckets_split_by_month() {
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let attempt = Uuid::new_v4();
        let transactions = vec![
            entry(a, TransactionKind::Income, dec!(1000), at(2024, 1, 5)),
            entry(a, TransactionKind::Expense, dec!(200), at(2024, 1, 20)),
            Transaction::debit_leg(attempt, a, b, dec!(300), "t", at(2024, 2, 1)),
            Transaction::credit_leg(attempt, a, b, dec!(300), "t", at(2024, 2, 1)),
        ];

        let months = monthly_buckets(&transactions);
        assert_eq!(months.len(), 2);
        assert_eq!(months[0].label(), "2024-01");
        assert_eq!(months[0].net(), dec!(800));
        assert_eq!(months[1].transfers_out, dec!(300));
        assert_eq!(months[1].income, Decimal::ZERO);
    }

    #[test]
    fn test_recent_is_newest_first_and_limited() {
        let a = Uuid::new_v4();
        let transactions: Vec<_> = (1..=7)
            .map(|day| entry(a, TransactionKind::Income, dec!(1), at(2024, 3, day)))
            .collect();

        let recent = recent(&transactions, 5);
        assert_eq!(recent.len(), 5);
        assert_eq!(recent[0].timestamp, at(2024, 3, 7));
        assert_eq!(recent[4].timestamp, at(2024, 3, 3));
    }

    #[test]
    fn test_statement_running_balance() {
        let a = Uuid::new_v4();
        let transactions = vec![
            entry(a, TransactionKind::Expense, dec!(200), at(2024, 1, 2)),
            entry(a, TransactionKind::Income, dec!(1000), at(2024, 1, 1)),
            entry(Uuid::new_v4(), TransactionKind::Income, dec!(5), at(2024, 1, 1)),
        ];

        let lines = statement(a, &transactions);
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0].running_balance, dec!(1000));
        assert_eq!(lines[1].amount, dec!(-200));
        assert_eq!(lines[1].running_balance, dec!(800));
    }

    #[test]
    fn test_view_reports_totals_and_drift() {
        let mut main = Account::new("Main", "0001", "1");
        main.balance = dec!(900);
        let transactions = vec![
            entry(main.id, TransactionKind::Income, dec!(1000), at(2024, 1, 1)),
            entry(main.id, TransactionKind::Expense, dec!(200), at(2024, 1, 2)),
        ];

        let view = derive_view(std::slice::from_ref(&main), Some(&main), &transactions, 5);
        assert_eq!(view.totals.income, dec!(1000));
        assert_eq!(view.totals.expense, dec!(200));
        assert_eq!(view.totals.balance, dec!(900));
        assert!(!view.is_consistent());
        assert_eq!(view.discrepancies[0].difference(), dec!(100));
    }

    #[test]
    fn test_integrity_report_on_clean_data() {
        let mut main = Account::new("Main", "0001", "1");
        main.balance = dec!(10);
        let transactions = vec![entry(main.id, TransactionKind::Income, dec!(10), at(2024, 1, 1))];

        let report = build_integrity_report(&[main], &transactions);
        assert!(report.is_healthy());
        assert_eq!(report.transactions_checked, 1);
    }
}
