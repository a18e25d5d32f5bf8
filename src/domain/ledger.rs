use std::collections::{HashMap, HashSet};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::{Account, AccountId, Transaction, TransactionKind, TransferAttemptId};

/// Compute the balance a single account should hold from its ledger entries.
/// Balance = sum of the signed amounts of every entry owned by the account
pub fn compute_balance(account_id: AccountId, transactions: &[Transaction]) -> Decimal {
    transactions
        .iter()
        .filter(|tx| tx.account_id == account_id)
        .map(Transaction::signed_amount)
        .sum()
}

/// Compute ledger balances for all accounts.
/// Accounts without entries are absent from the map (balance = 0).
pub fn compute_all_balances(transactions: &[Transaction]) -> HashMap<AccountId, Decimal> {
    let mut balances: HashMap<AccountId, Decimal> = HashMap::new();

    for tx in transactions {
        *balances.entry(tx.account_id).or_insert(Decimal::ZERO) += tx.signed_amount();
    }

    balances
}

/// Sum of |amount| over entries of `kind`. Each transfer is counted once, by its debit leg.
pub fn aggregate(kind: TransactionKind, transactions: &[Transaction]) -> Decimal {
    transactions
        .iter()
        .filter(|tx| tx.kind == kind)
        .filter(|tx| !tx.is_credit_leg())
        .map(|tx| tx.amount.abs())
        .sum()
}

/// An account whose stored balance disagrees with its ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Discrepancy {
    pub account_id: AccountId,
    pub account_name: String,
    pub balance: Decimal,
    pub ledger_total: Decimal,
}

impl Discrepancy {
    /// Stored balance minus what the ledger says it should be.
    pub fn difference(&self) -> Decimal {
        self.balance - self.ledger_total
    }
}

/// List every account whose balance differs from the sum of its ledger entries.
pub fn find_discrepancies(accounts: &[Account], transactions: &[Transaction]) -> Vec<Discrepancy> {
    let ledger = compute_all_balances(transactions);

    accounts
        .iter()
        .filter_map(|account| {
            let ledger_total = ledger.get(&account.id).copied().unwrap_or(Decimal::ZERO);
            (account.balance != ledger_total).then(|| Discrepancy {
                account_id: account.id,
                account_name: account.name.clone(),
                balance: account.balance,
                ledger_total,
            })
        })
        .collect()
}

/// Transfer attempts whose debit leg has no matching credit leg.
pub fn unmatched_transfers(transactions: &[Transaction]) -> Vec<TransferAttemptId> {
    let credited: HashSet<TransferAttemptId> = transactions
        .iter()
        .filter(|tx| tx.is_credit_leg())
        .filter_map(|tx| tx.transfer_id)
        .collect();

    let mut missing: Vec<TransferAttemptId> = transactions
        .iter()
        .filter(|tx| tx.is_transfer() && !tx.is_credit_leg())
        .filter_map(|tx| tx.transfer_id)
        .filter(|id| !credited.contains(id))
        .collect();
    missing.dedup();
    missing
}

/// Entries that reference an account not present in `accounts`.
pub fn orphan_entries<'a>(
    accounts: &[Account],
    transactions: &'a [Transaction],
) -> Vec<&'a Transaction> {
    let known: HashSet<AccountId> = accounts.iter().map(|a| a.id).collect();
    transactions
        .iter()
        .filter(|tx| !known.contains(&tx.account_id))
        .collect()
}
