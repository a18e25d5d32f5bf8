mod common;

use anyhow::Result;
use common::{Funded, assert_consistent, balance, memory_engine};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use saldo::application::{
    EngineError, ErrorClass, PendingOperation, TransferRequest, WriteStep,
};
use saldo::domain::{TransferStage, TransferRecord};
use saldo::storage::{Collection, Fault, StoreOp, from_document};
use uuid::Uuid;

fn audit_records(store: &saldo::storage::MemoryStore) -> Vec<TransferRecord> {
    store
        .documents(Collection::Transfers)
        .into_iter()
        .map(|doc| from_document(doc).unwrap())
        .collect()
}

#[tokio::test]
async fn test_transfer_moves_funds_and_writes_both_legs() -> Result<()> {
    let (engine, store) = memory_engine();
    let Funded { a, b } = Funded::create(&engine).await?;
    engine.deposit(b.id, dec!(200), "opening deposit").await?;

    let receipt = engine.transfer(Some(a.id), b.id, "rent", dec!(300)).await?;
    engine.drain_audit().await;

    assert_eq!(balance(&engine, &a), dec!(700));
    assert_eq!(balance(&engine, &b), dec!(500));
    assert_eq!(receipt.origin.balance, dec!(700));
    assert_eq!(receipt.destination.balance, dec!(500));
    assert!(receipt.attempt.is_settled());

    let debit_legs: Vec<_> = engine
        .get_account_transactions(a.id)
        .into_iter()
        .filter(|tx| tx.is_transfer())
        .collect();
    assert_eq!(debit_legs.len(), 1);
    assert_eq!(debit_legs[0].amount, dec!(300));
    assert_eq!(debit_legs[0].signed_amount(), dec!(-300));

    let credit_legs: Vec<_> = engine
        .get_account_transactions(b.id)
        .into_iter()
        .filter(|tx| tx.is_transfer())
        .collect();
    assert_eq!(credit_legs.len(), 1);
    assert_eq!(credit_legs[0].signed_amount(), dec!(300));
    assert_eq!(credit_legs[0].transfer_id, debit_legs[0].transfer_id);

    let records = audit_records(&store);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].origin_account_id, a.id);
    assert_eq!(records[0].destination_account_id, b.id);
    assert_eq!(records[0].amount, dec!(300));
    assert_eq!(records[0].description, "rent");

    assert_consistent(&engine);
    Ok(())
}

#[tokio::test]
async fn test_insufficient_funds_writes_nothing() -> Result<()> {
    let (engine, store) = memory_engine();
    let Funded { a, b } = Funded::create(&engine).await?;
    engine.deposit(b.id, dec!(200), "opening deposit").await?;

    let writes = store.write_count();
    let entries = engine.get_transactions();

    let result = engine.transfer(Some(a.id), b.id, "rent", dec!(1500)).await;
    engine.drain_audit().await;

    match result {
        Err(EngineError::InsufficientFunds {
            balance, required, ..
        }) => {
            assert_eq!(balance, dec!(1000));
            assert_eq!(required, dec!(1500));
        }
        other => panic!("expected InsufficientFunds, got {:?}", other),
    }
    assert_eq!(store.write_count(), writes);
    assert_eq!(engine.get_transactions(), entries);
    assert_eq!(balance(&engine, &a), dec!(1000));
    assert_eq!(balance(&engine, &b), dec!(200));
    assert!(audit_records(&store).is_empty());
    Ok(())
}

#[tokio::test]
async fn test_inactive_destination_is_rejected() -> Result<()> {
    let (engine, store) = memory_engine();
    let Funded { a, b } = Funded::create(&engine).await?;
    engine.set_account_active(b.id, false).await?;

    let writes = store.write_count();
    let result = engine.transfer(Some(a.id), b.id, "rent", dec!(10)).await;

    let err = result.unwrap_err();
    assert!(matches!(err, EngineError::DestinationInactive { ref name } if name == "B"));
    assert!(err.is_validation());
    assert_eq!(store.write_count(), writes);
    Ok(())
}

#[tokio::test]
async fn test_validation_failures() -> Result<()> {
    let (engine, _store) = memory_engine();
    let Funded { a, b } = Funded::create(&engine).await?;

    let zero = engine.transfer(Some(a.id), b.id, "x", Decimal::ZERO).await;
    assert!(matches!(zero, Err(EngineError::InvalidAmount(_))));

    let negative = engine.transfer(Some(a.id), b.id, "x", dec!(-5)).await;
    assert!(matches!(negative, Err(EngineError::InvalidAmount(_))));

    let same = engine.transfer(Some(a.id), a.id, "x", dec!(5)).await;
    assert!(matches!(same, Err(EngineError::SameAccount)));

    let unknown_origin = engine.transfer(Some(Uuid::new_v4()), b.id, "x", dec!(5)).await;
    assert!(matches!(unknown_origin, Err(EngineError::NoOriginSelected)));

    let unknown_destination = engine.transfer(Some(a.id), Uuid::new_v4(), "x", dec!(5)).await;
    assert!(matches!(
        unknown_destination,
        Err(EngineError::AccountNotFound(_))
    ));

    assert!(engine.get_account_transactions(b.id).is_empty());
    Ok(())
}

#[tokio::test]
async fn test_origin_defaults_to_active_account() -> Result<()> {
    let (engine, _store) = memory_engine();
    let Funded { a, b } = Funded::create(&engine).await?;
    assert_eq!(engine.get_active_account().map(|acc| acc.id), Some(a.id));

    let receipt = engine.transfer(None, b.id, "", dec!(100)).await?;

    assert_eq!(receipt.origin.id, a.id);
    assert_eq!(receipt.debit.description, "Transfer to B");
    assert_eq!(balance(&engine, &a), dec!(900));
    Ok(())
}

#[tokio::test]
async fn test_overdraft_limit_allows_negative_balance() -> Result<()> {
    let (engine, _store) = memory_engine();
    let a = engine
        .open_account("Credit line", "0001", "9", dec!(100))
        .await?;
    let b = engine.open_account("B", "0001", "2", Decimal::ZERO).await?;

    engine.transfer(Some(a.id), b.id, "advance", dec!(80)).await?;
    assert_eq!(balance(&engine, &a), dec!(-80));

    let over = engine.transfer(Some(a.id), b.id, "again", dec!(30)).await;
    assert!(matches!(over, Err(EngineError::InsufficientFunds { .. })));
    assert_consistent(&engine);
    Ok(())
}

#[tokio::test]
async fn test_credit_failure_is_partial_transfer() -> Result<()> {
    let (engine, store) = memory_engine();
    let Funded { a, b } = Funded::create(&engine).await?;
    engine.deposit(b.id, dec!(200), "opening deposit").await?;
    store.inject(Fault::on(StoreOp::Patch, Collection::Accounts).for_id(b.id));

    let err = engine
        .transfer(Some(a.id), b.id, "rent", dec!(300))
        .await
        .unwrap_err();

    assert_eq!(err.class(), ErrorClass::PartialTransfer);
    assert!(!err.is_validation());
    assert!(err.is_retryable());
    match &err {
        EngineError::PartialTransfer {
            origin,
            destination,
            amount,
            step,
            stage,
            ..
        } => {
            assert_eq!(*origin, a.id);
            assert_eq!(*destination, b.id);
            assert_eq!(*amount, dec!(300));
            assert_eq!(*step, WriteStep::CreditDestination);
            assert_eq!(*stage, TransferStage::CreditRecorded);
        }
        other => panic!("expected PartialTransfer, got {:?}", other),
    }

    // Origin reflects the debit, destination is untouched.
    assert_eq!(balance(&engine, &a), dec!(700));
    assert_eq!(balance(&engine, &b), dec!(200));
    assert!(!engine.view().is_consistent());
    assert_eq!(engine.pending_transfers().len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_resume_finishes_partial_transfer_once() -> Result<()> {
    let (engine, store) = memory_engine();
    let Funded { a, b } = Funded::create(&engine).await?;
    store.inject(Fault::on(StoreOp::Patch, Collection::Accounts).for_id(b.id));

    let err = engine
        .transfer(Some(a.id), b.id, "rent", dec!(300))
        .await
        .unwrap_err();
    let PendingOperation::Transfer(attempt) = err.pending_operation() else {
        panic!("expected a resumable transfer, got {:?}", err);
    };

    let receipt = engine.resume_transfer(attempt).await?;
    assert!(receipt.attempt.is_settled());
    assert_eq!(balance(&engine, &a), dec!(700));
    assert_eq!(balance(&engine, &b), dec!(300));

    // Resuming a settled attempt is a no-op.
    let writes = store.write_count();
    let again = engine.resume_transfer(attempt).await?;
    assert_eq!(again.credit.id, receipt.credit.id);
    assert_eq!(store.write_count(), writes);
    assert_eq!(balance(&engine, &b), dec!(300));

    assert!(engine.pending_transfers().is_empty());
    assert!(engine.view().is_consistent());
    assert_consistent(&engine);
    Ok(())
}

#[tokio::test]
async fn test_resume_after_credit_leg_failure_writes_one_leg() -> Result<()> {
    let (engine, store) = memory_engine();
    let Funded { a, b } = Funded::create(&engine).await?;
    // The debit leg goes through, the credit leg fails.
    store.inject(Fault::on(StoreOp::Create, Collection::Transactions).after(1));

    let err = engine
        .transfer(Some(a.id), b.id, "rent", dec!(250))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        EngineError::PartialTransfer {
            step: WriteStep::RecordCredit,
            ..
        }
    ));
    assert!(engine.get_account_transactions(b.id).is_empty());

    let PendingOperation::Transfer(attempt) = err.pending_operation() else {
        panic!("expected a resumable transfer");
    };
    engine.resume_transfer(attempt).await?;

    assert_eq!(engine.get_account_transactions(b.id).len(), 1);
    assert_eq!(balance(&engine, &b), dec!(250));
    assert_consistent(&engine);
    Ok(())
}

#[tokio::test]
async fn test_debit_failure_is_remote_write_not_partial() -> Result<()> {
    let (engine, store) = memory_engine();
    let Funded { a, b } = Funded::create(&engine).await?;
    store.inject(Fault::on(StoreOp::Patch, Collection::Accounts).for_id(a.id));

    let err = engine
        .transfer(Some(a.id), b.id, "rent", dec!(300))
        .await
        .unwrap_err();

    match &err {
        EngineError::RemoteWrite {
            step, committed, ..
        } => {
            assert_eq!(*step, WriteStep::DebitOrigin);
            assert_eq!(committed, &vec![WriteStep::RecordDebit]);
        }
        other => panic!("expected RemoteWrite, got {:?}", other),
    }
    assert_eq!(err.class(), ErrorClass::RemoteWrite);
    assert_eq!(balance(&engine, &a), dec!(1000));
    assert_eq!(balance(&engine, &b), Decimal::ZERO);

    let PendingOperation::Transfer(attempt) = err.pending_operation() else {
        panic!("expected a resumable transfer");
    };
    let receipt = engine.resume_transfer(attempt).await?;
    assert_eq!(receipt.origin.balance, dec!(700));
    assert_eq!(receipt.destination.balance, dec!(300));
    assert_consistent(&engine);
    Ok(())
}

#[tokio::test]
async fn test_resume_rechecks_funds_before_debit() -> Result<()> {
    let (engine, store) = memory_engine();
    let Funded { a, b } = Funded::create(&engine).await?;
    store.inject(Fault::on(StoreOp::Patch, Collection::Accounts).for_id(a.id));

    let err = engine
        .transfer(Some(a.id), b.id, "rent", dec!(800))
        .await
        .unwrap_err();
    let PendingOperation::Transfer(attempt) = err.pending_operation() else {
        panic!("expected a resumable transfer");
    };

    engine.withdraw(a.id, dec!(500), "groceries").await?;
    let err = engine.resume_transfer(attempt).await.unwrap_err();

    // The debit leg is already in the ledger, so this is not a clean rejection.
    assert!(!err.is_validation());
    assert!(err.is_retryable());
    assert_eq!(err.pending_operation(), PendingOperation::Transfer(attempt));
    match &err {
        EngineError::StepBlocked {
            step,
            committed,
            reason,
            ..
        } => {
            assert_eq!(*step, WriteStep::DebitOrigin);
            assert_eq!(committed, &vec![WriteStep::RecordDebit]);
            assert!(matches!(**reason, EngineError::InsufficientFunds { .. }));
        }
        other => panic!("expected StepBlocked, got {:?}", other),
    }
    assert_eq!(balance(&engine, &a), dec!(500));
    assert_eq!(balance(&engine, &b), Decimal::ZERO);
    assert_eq!(engine.pending_transfers().len(), 1);

    // Once funds arrive the same attempt settles.
    engine.deposit(a.id, dec!(300), "refund").await?;
    let receipt = engine.resume_transfer(attempt).await?;
    assert_eq!(receipt.origin.balance, Decimal::ZERO);
    assert_eq!(receipt.destination.balance, dec!(800));
    assert_consistent(&engine);
    Ok(())
}

#[tokio::test]
async fn test_debit_leg_failure_commits_nothing() -> Result<()> {
    let (engine, store) = memory_engine();
    let Funded { a, b } = Funded::create(&engine).await?;
    let entries = engine.get_transactions();
    store.inject(Fault::on(StoreOp::Create, Collection::Transactions));

    let err = engine
        .transfer(Some(a.id), b.id, "rent", dec!(300))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        EngineError::RemoteWrite {
            step: WriteStep::RecordDebit,
            ref committed,
            ..
        } if committed.is_empty()
    ));
    assert_eq!(err.pending_operation(), PendingOperation::None);
    assert_eq!(engine.get_transactions(), entries);
    assert!(engine.pending_transfers().is_empty());
    assert_consistent(&engine);
    Ok(())
}

#[tokio::test]
async fn test_audit_failure_does_not_fail_transfer() -> Result<()> {
    let (engine, store) = memory_engine();
    let Funded { a, b } = Funded::create(&engine).await?;
    store.inject(Fault::on(StoreOp::Create, Collection::Transfers));

    let receipt = engine.transfer(Some(a.id), b.id, "rent", dec!(300)).await?;
    engine.drain_audit().await;

    assert!(receipt.attempt.is_settled());
    assert!(audit_records(&store).is_empty());
    assert_eq!(balance(&engine, &b), dec!(300));
    assert_consistent(&engine);
    Ok(())
}

#[tokio::test]
async fn test_resubmitted_attempt_id_moves_money_once() -> Result<()> {
    let (engine, store) = memory_engine();
    let Funded { a, b } = Funded::create(&engine).await?;
    let attempt = Uuid::new_v4();
    let request =
        TransferRequest::new(Some(a.id), b.id, "rent", dec!(300)).with_attempt_id(attempt);

    let first = engine.transfer_with(request.clone()).await?;
    let second = engine.transfer_with(request).await?;
    engine.drain_audit().await;

    assert_eq!(first.attempt.id, attempt);
    assert_eq!(first.debit.id, second.debit.id);
    assert_eq!(balance(&engine, &a), dec!(700));
    assert_eq!(balance(&engine, &b), dec!(300));
    assert_eq!(audit_records(&store).len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_reused_attempt_id_for_another_movement_is_rejected() -> Result<()> {
    let (engine, _store) = memory_engine();
    let Funded { a, b } = Funded::create(&engine).await?;
    let c = engine.open_account("C", "0002", "7", Decimal::ZERO).await?;
    let attempt = Uuid::new_v4();
    engine
        .transfer_with(
            TransferRequest::new(Some(a.id), b.id, "rent", dec!(300)).with_attempt_id(attempt),
        )
        .await?;

    let other_destination = engine
        .transfer_with(
            TransferRequest::new(Some(a.id), c.id, "gift", dec!(50)).with_attempt_id(attempt),
        )
        .await;
    let other_amount = engine
        .transfer_with(
            TransferRequest::new(Some(a.id), b.id, "rent", dec!(50)).with_attempt_id(attempt),
        )
        .await;
    let other_origin = engine
        .transfer_with(
            TransferRequest::new(Some(c.id), b.id, "rent", dec!(300)).with_attempt_id(attempt),
        )
        .await;

    for result in [other_destination, other_amount, other_origin] {
        let err = result.unwrap_err();
        assert!(matches!(err, EngineError::AttemptMismatch(id) if id == attempt));
        assert!(err.is_validation());
    }
    assert_eq!(balance(&engine, &a), dec!(700));
    assert_eq!(balance(&engine, &b), dec!(300));
    assert_eq!(balance(&engine, &c), Decimal::ZERO);

    // Omitting the origin still matches the original movement.
    let again = engine
        .transfer_with(TransferRequest::new(None, b.id, "rent", dec!(300)).with_attempt_id(attempt))
        .await?;
    assert_eq!(again.attempt.id, attempt);
    assert_eq!(balance(&engine, &a), dec!(700));
    assert_consistent(&engine);
    Ok(())
}

#[tokio::test]
async fn test_resume_unknown_attempt() -> Result<()> {
    let (engine, _store) = memory_engine();
    let result = engine.resume_transfer(Uuid::new_v4()).await;
    assert!(matches!(result, Err(EngineError::TransferAttemptNotFound(_))));
    Ok(())
}

#[tokio::test]
async fn test_transfers_preserve_invariant() -> Result<()> {
    let (engine, _store) = memory_engine();
    let Funded { a, b } = Funded::create(&engine).await?;
    let c = engine.open_account("C", "0002", "7", Decimal::ZERO).await?;

    engine.transfer(Some(a.id), b.id, "one", dec!(400)).await?;
    engine.transfer(Some(b.id), c.id, "two", dec!(150.50)).await?;
    engine.transfer(Some(c.id), a.id, "three", dec!(50.25)).await?;
    engine.withdraw(b.id, dec!(49.50), "fee").await?;

    assert_eq!(balance(&engine, &a), dec!(650.25));
    assert_eq!(balance(&engine, &b), dec!(200));
    assert_eq!(balance(&engine, &c), dec!(100.25));
    assert_consistent(&engine);
    assert_eq!(engine.aggregate(saldo::domain::TransactionKind::Transfer), dec!(600.75));
    Ok(())
}
