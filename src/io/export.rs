use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::io::Write;

use crate::application::Engine;
use crate::domain::{Account, AccountId, Transaction, TransferRecord, format_amount};

/// Store snapshot for full export
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub version: String,
    pub exported_at: DateTime<Utc>,
    pub accounts: Vec<Account>,
    pub transactions: Vec<Transaction>,
    pub transfers: Vec<TransferRecord>,
}

/// Exporter for converting engine state to CSV or JSON
pub struct Exporter<'a> {
    engine: &'a Engine,
}

impl<'a> Exporter<'a> {
    pub fn new(engine: &'a Engine) -> Self {
        Self { engine }
    }

    fn account_names(&self) -> HashMap<AccountId, String> {
        self.engine
            .get_accounts()
            .iter()
            .map(|a| (a.id, a.name.clone()))
            .collect()
    }

    /// Export ledger entries to CSV, oldest first
    pub fn export_transactions_csv<W: Write>(&self, writer: W) -> Result<usize> {
        let names = self.account_names();
        let name_of = |id: Option<AccountId>| {
            id.map(|id| names.get(&id).cloned().unwrap_or_else(|| id.to_string()))
                .unwrap_or_default()
        };

        let mut transactions = self.engine.get_transactions().as_ref().clone();
        transactions.sort_by_key(|tx| tx.timestamp);

        let mut csv_writer = csv::Writer::from_writer(writer);
        csv_writer.write_record([
            "id",
            "timestamp",
            "account",
            "kind",
            "amount",
            "signed_amount",
            "description",
            "origin",
            "destination",
            "transfer_id",
            "version",
        ])?;

        for tx in &transactions {
            csv_writer.write_record(&[
                tx.id.to_string(),
                tx.timestamp.to_rfc3339(),
                name_of(Some(tx.account_id)),
                tx.kind.as_str().to_string(),
                format_amount(tx.amount),
                format_amount(tx.signed_amount()),
                tx.description.clone(),
                name_of(tx.origin_account_id),
                name_of(tx.destination_account_id),
                tx.transfer_id.map(|id| id.to_string()).unwrap_or_default(),
                tx.version.to_string(),
            ])?;
        }

        csv_writer.flush()?;
        Ok(transactions.len())
    }

    /// Export account balances to CSV
    pub fn export_balances_csv<W: Write>(&self, writer: W) -> Result<usize> {
        let accounts = self.engine.get_accounts();
        let mut csv_writer = csv::Writer::from_writer(writer);

        csv_writer.write_record([
            "account",
            "agency",
            "number",
            "active",
            "primary",
            "balance",
            "overdraft_limit",
        ])?;

        for account in accounts.iter() {
            csv_writer.write_record(&[
                account.name.clone(),
                account.agency_code.clone(),
                account.account_number.clone(),
                account.active.to_string(),
                account.is_primary.to_string(),
                format_amount(account.balance),
                format_amount(account.overdraft_limit),
            ])?;
        }

        csv_writer.flush()?;
        Ok(accounts.len())
    }

    /// Export every collection as one JSON snapshot
    pub async fn export_full_json<W: Write>(&self, mut writer: W) -> Result<StoreSnapshot> {
        let transfers = self.engine.transfer_records().await?;

        let snapshot = StoreSnapshot {
            version: env!("CARGO_PKG_VERSION").to_string(),
            exported_at: Utc::now(),
            accounts: self.engine.get_accounts().as_ref().clone(),
            transactions: self.engine.get_transactions().as_ref().clone(),
            transfers,
        };

        let json = serde_json::to_string_pretty(&snapshot)?;
        writer.write_all(json.as_bytes())?;
        writer.flush()?;

        Ok(snapshot)
    }
}
