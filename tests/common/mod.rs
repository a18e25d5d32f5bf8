// Allow dead_code because these helpers are used across different test files
// which are compiled separately
#![allow(dead_code)]

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, NaiveDate, Utc};
use rust_decimal::Decimal;
use saldo::application::{Engine, EngineConfig};
use saldo::domain::{Account, compute_balance};
use saldo::storage::{MemoryStore, SqliteStore};
use tempfile::TempDir;

/// Engine over an in-memory store, with the store kept for fault injection
pub fn memory_engine() -> (Engine, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    let engine = Engine::new(store.clone(), EngineConfig::default());
    (engine, store)
}

/// Engine over a SQLite database in a temporary directory
pub async fn sqlite_engine() -> Result<(Engine, TempDir)> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("test.db");
    let store = SqliteStore::init_path(db_path.to_str().unwrap()).await?;
    let engine = Engine::open(Arc::new(store), EngineConfig::default()).await?;
    Ok((engine, temp_dir))
}

/// Helper to parse a date string into DateTime<Utc>
pub fn parse_date(date_str: &str) -> DateTime<Utc> {
    NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap()
        .and_utc()
}

/// Test fixture: two accounts, A funded with 1000 and B empty
pub struct Funded {
    pub a: Account,
    pub b: Account,
}

impl Funded {
    pub async fn create(engine: &Engine) -> Result<Self> {
        let a = engine
            .open_account("A", "0001", "1001", Decimal::ZERO)
            .await?;
        let b = engine
            .open_account("B", "0001", "1002", Decimal::ZERO)
            .await?;
        engine
            .deposit(a.id, Decimal::from(1000), "opening deposit")
            .await?;
        Ok(Self {
            a: engine.get_account(a.id).unwrap(),
            b,
        })
    }
}

/// Current cached balance of an account
pub fn balance(engine: &Engine, account: &Account) -> Decimal {
    engine.get_account(account.id).unwrap().balance
}

/// Assert every account balance equals the sum of its ledger entries
pub fn assert_consistent(engine: &Engine) {
    let transactions = engine.get_transactions();
    for account in engine.get_accounts().iter() {
        assert_eq!(
            account.balance,
            compute_balance(account.id, &transactions),
            "balance of {} drifted from its ledger",
            account.name
        );
    }
}
