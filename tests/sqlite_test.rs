mod common;

use std::sync::Arc;

use anyhow::Result;
use common::{Funded, assert_consistent, balance, sqlite_engine};
use rust_decimal_macros::dec;
use saldo::application::{Engine, EngineConfig};
use saldo::storage::{Collection, ObjectStore, SqliteStore, StoreError};
use serde_json::json;
use tempfile::TempDir;

#[tokio::test]
async fn test_engine_state_survives_reopen() -> Result<()> {
    let (engine, temp) = sqlite_engine().await?;
    let Funded { a, b } = Funded::create(&engine).await?;
    engine.deposit(b.id, dec!(200), "opening deposit").await?;
    engine.transfer(Some(a.id), b.id, "rent", dec!(300)).await?;
    engine.set_primary(b.id).await?;
    engine.drain_audit().await;

    let path = temp.path().join("test.db");
    let store = SqliteStore::open_path(path.to_str().unwrap()).await?;
    let reopened = Engine::open(Arc::new(store), EngineConfig::default()).await?;

    assert_eq!(balance(&reopened, &a), dec!(700));
    assert_eq!(balance(&reopened, &b), dec!(500));
    assert_eq!(reopened.get_active_account().map(|acc| acc.id), Some(b.id));
    assert_eq!(reopened.get_transactions(), engine.get_transactions());

    let records = reopened.transfer_records().await?;
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].amount, dec!(300));

    assert!(reopened.check_integrity().await?.is_healthy());
    assert_consistent(&reopened);
    Ok(())
}

#[tokio::test]
async fn test_store_keeps_insertion_order() -> Result<()> {
    let temp = TempDir::new()?;
    let path = temp.path().join("order.db");
    let store = SqliteStore::init_path(path.to_str().unwrap()).await?;

    for name in ["zeta", "alpha", "mid"] {
        store
            .create(Collection::Accounts, json!({ "name": name }))
            .await?;
    }

    let names: Vec<String> = store
        .list(Collection::Accounts)
        .await?
        .iter()
        .map(|doc| doc["name"].as_str().unwrap().to_string())
        .collect();
    assert_eq!(names, vec!["zeta", "alpha", "mid"]);
    Ok(())
}

#[tokio::test]
async fn test_patch_merges_fields() -> Result<()> {
    let temp = TempDir::new()?;
    let path = temp.path().join("patch.db");
    let store = SqliteStore::init_path(path.to_str().unwrap()).await?;

    let created = store
        .create(
            Collection::Accounts,
            json!({ "id": "acc-1", "name": "Main", "balance": "10.00" }),
        )
        .await?;
    assert_eq!(created["id"], "acc-1");

    let patched = store
        .patch(Collection::Accounts, "acc-1", json!({ "balance": "25.00" }))
        .await?;
    assert_eq!(patched["balance"], "25.00");
    assert_eq!(patched["name"], "Main");

    let listed = store.list(Collection::Accounts).await?;
    assert_eq!(listed, vec![patched]);
    Ok(())
}

#[tokio::test]
async fn test_missing_and_duplicate_documents() -> Result<()> {
    let temp = TempDir::new()?;
    let path = temp.path().join("errors.db");
    let store = SqliteStore::init_path(path.to_str().unwrap()).await?;

    let missing = store
        .patch(Collection::Transactions, "nope", json!({ "amount": "1" }))
        .await;
    assert!(matches!(missing, Err(StoreError::NotFound { .. })));

    let deleted = store.delete(Collection::Transactions, "nope").await;
    assert!(matches!(deleted, Err(StoreError::NotFound { .. })));

    store
        .create(Collection::Transfers, json!({ "id": "t-1" }))
        .await?;
    let duplicate = store
        .create(Collection::Transfers, json!({ "id": "t-1" }))
        .await;
    assert!(matches!(duplicate, Err(StoreError::Conflict { .. })));
    Ok(())
}

#[tokio::test]
async fn test_open_missing_database_fails() -> Result<()> {
    let temp = TempDir::new()?;
    let path = temp.path().join("absent.db");

    let result = SqliteStore::open_path(path.to_str().unwrap()).await;
    assert!(result.is_err());
    Ok(())
}
