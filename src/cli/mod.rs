use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};

use crate::application::{Engine, EngineConfig, EngineError, ErrorClass};
use crate::domain::{Account, AccountId, TransactionKind, format_amount, parse_amount};
use crate::storage::SqliteStore;

/// Saldo - consistent balances, ledger and transfers over a document store
#[derive(Parser)]
#[command(name = "saldo")]
#[command(about = "Keeps account balances, ledger entries and transfer records consistent")]
#[command(version)]
pub struct Cli {
    /// Database file path
    #[arg(short, long, env = "SALDO_DATABASE", default_value = "saldo.db")]
    pub database: String,

    /// Number of entries shown as recent activity
    #[arg(long, env = "SALDO_RECENT", default_value_t = crate::application::DEFAULT_RECENT_LIMIT)]
    pub recent: usize,

    /// Emit logs as JSON
    #[arg(long, env = "SALDO_LOG_JSON", global = true)]
    pub log_json: bool,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Initialize a new database
    Init,

    /// Account management commands
    #[command(subcommand)]
    Account(AccountCommands),

    /// Record income on an account
    Deposit {
        /// Amount (e.g., "50.00" or "50")
        amount: String,

        /// Account name or number (defaults to the active account)
        #[arg(short, long)]
        account: Option<String>,

        /// Description of the entry
        #[arg(short, long, default_value = "")]
        description: String,

        /// Date of the entry (YYYY-MM-DD, defaults to now)
        #[arg(long)]
        date: Option<String>,
    },

    /// Record an expense on an account
    Withdraw {
        /// Amount (e.g., "50.00" or "50")
        amount: String,

        /// Account name or number (defaults to the active account)
        #[arg(short, long)]
        account: Option<String>,

        /// Description of the entry
        #[arg(short, long, default_value = "")]
        description: String,

        /// Date of the entry (YYYY-MM-DD, defaults to now)
        #[arg(long)]
        date: Option<String>,
    },

    /// Move money between two accounts
    Transfer {
        /// Amount to transfer
        amount: String,

        /// Origin account (defaults to the active account)
        #[arg(long)]
        from: Option<String>,

        /// Destination account
        #[arg(long)]
        to: String,

        /// Description (defaults to "Transfer to <destination>")
        #[arg(short, long, default_value = "")]
        description: String,
    },

    /// List ledger entries, newest first
    Transactions {
        /// Filter by account
        #[arg(short, long)]
        account: Option<String>,

        /// Maximum number of entries to show
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// Show an account's entries with a running balance
    Statement {
        /// Account name or number
        account: String,
    },

    /// Totals, monthly volumes and recent activity
    Summary,

    /// List audit records of past transfers
    Audit,

    /// Verify that every balance matches its ledger
    Check,

    /// Export data to CSV or JSON
    Export {
        /// What to export: transactions, balances, full
        export_type: String,

        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<String>,
    },
}

#[derive(Subcommand)]
pub enum AccountCommands {
    /// Open a new account with a zero balance
    Open {
        /// Account name
        name: String,

        /// Agency (branch) code
        #[arg(long, default_value = "0001")]
        agency: String,

        /// Account number
        #[arg(long)]
        number: String,

        /// How far below zero the balance may go
        #[arg(long, default_value = "0")]
        overdraft: String,

        /// Make it the primary account
        #[arg(long)]
        primary: bool,
    },

    /// List accounts
    List {
        /// Include inactive accounts
        #[arg(short, long)]
        all: bool,
    },

    /// Show account details
    Show {
        /// Account name or number
        name: String,
    },

    /// Make an account the primary one
    Primary {
        /// Account name or number
        name: String,
    },

    /// Re-activate an account
    Activate {
        /// Account name or number
        name: String,
    },

    /// Deactivate an account
    Deactivate {
        /// Account name or number
        name: String,
    },

    /// Remove an account with no ledger entries
    Remove {
        /// Account name or number
        name: String,
    },
}

impl Cli {
    async fn engine(&self) -> Result<Engine> {
        let store = SqliteStore::open_path(&self.database).await?;
        let config = EngineConfig::default().with_recent_limit(self.recent);
        let engine = Engine::open(Arc::new(store), config)
            .await
            .context("Failed to load accounts and ledger")?;
        Ok(engine)
    }

    pub async fn run(self) -> Result<()> {
        if matches!(self.command, Commands::Init) {
            SqliteStore::init_path(&self.database).await?;
            println!("Database initialized: {}", self.database);
            return Ok(());
        }

        let engine = self.engine().await?;
        let result = run_command(&engine, self.command).await;
        // Audit writes run in the background; let them land before exit.
        engine.drain_audit().await;
        result
    }
}

async fn run_command(engine: &Engine, command: Commands) -> Result<()> {
    match command {
        Commands::Init => anyhow::bail!("init runs before the engine is opened"),

        Commands::Account(account_cmd) => run_account_command(engine, account_cmd).await?,

        Commands::Deposit {
            amount,
            account,
            description,
            date,
        } => {
            run_posting_command(
                engine,
                TransactionKind::Income,
                &amount,
                account,
                &description,
                date,
            )
            .await?
        }

        Commands::Withdraw {
            amount,
            account,
            description,
            date,
        } => {
            run_posting_command(
                engine,
                TransactionKind::Expense,
                &amount,
                account,
                &description,
                date,
            )
            .await?
        }

        Commands::Transfer {
            amount,
            from,
            to,
            description,
        } => {
            let amount =
                parse_amount(&amount).context("Invalid amount format. Use '50.00' or '50'")?;
            let origin = from.map(|name| lookup(engine, &name)).transpose()?;
            let destination = lookup(engine, &to)?;

            let receipt = engine
                .transfer(origin.map(|a| a.id), destination.id, &description, amount)
                .await
                .map_err(explain)?;

            println!(
                "Transferred {} {} -> {} ({})",
                format_amount(receipt.attempt.amount),
                receipt.origin.name,
                receipt.destination.name,
                receipt.attempt.description
            );
            println!(
                "  {}: {}   {}: {}",
                receipt.origin.name,
                format_amount(receipt.origin.balance),
                receipt.destination.name,
                format_amount(receipt.destination.balance)
            );
        }

        Commands::Transactions { account, limit } => {
            run_transactions_command(engine, account, limit)?
        }

        Commands::Statement { account } => run_statement_command(engine, &account)?,

        Commands::Summary => run_summary_command(engine),

        Commands::Audit => run_audit_command(engine).await?,

        Commands::Check => run_check_command(engine).await?,

        Commands::Export {
            export_type,
            output,
        } => run_export_command(engine, &export_type, output.as_deref()).await?,
    }
    Ok(())
}

async fn run_account_command(engine: &Engine, cmd: AccountCommands) -> Result<()> {
    match cmd {
        AccountCommands::Open {
            name,
            agency,
            number,
            overdraft,
            primary,
        } => {
            let overdraft = parse_amount(&overdraft).context("Invalid overdraft limit")?;
            let account = engine
                .open_account(&name, &agency, &number, overdraft)
                .await?;
            let account = if primary {
                engine.set_primary(account.id).await?
            } else {
                account
            };
            println!(
                "Opened account: {} ({}/{})",
                account.name, account.agency_code, account.account_number
            );
        }

        AccountCommands::List { all } => {
            let accounts = engine.get_accounts();
            let active = engine.get_active_account().map(|a| a.id);
            let shown: Vec<&Account> = accounts.iter().filter(|a| all || a.active).collect();

            if shown.is_empty() {
                println!("No accounts found.");
            } else {
                println!(
                    "{:<2} {:<20} {:<8} {:<12} {:>12} STATUS",
                    "", "NAME", "AGENCY", "NUMBER", "BALANCE"
                );
                println!("{}", "-".repeat(66));
                for account in shown {
                    let marker = if Some(account.id) == active { "*" } else { "" };
                    println!(
                        "{:<2} {:<20} {:<8} {:<12} {:>12} {}",
                        marker,
                        truncate(&account.name, 20),
                        account.agency_code,
                        account.account_number,
                        format_amount(account.balance),
                        status(account)
                    );
                }
            }
        }

        AccountCommands::Show { name } => {
            let account = lookup(engine, &name)?;
            let entries = engine.get_account_transactions(account.id);
            let last_activity = entries.iter().map(|tx| tx.timestamp).max();

            println!("Account: {}", account.name);
            println!("  ID:             {}", account.id);
            println!("  Agency:         {}", account.agency_code);
            println!("  Number:         {}", account.account_number);
            println!("  Status:         {}", status(&account));
            println!("  Overdraft:      {}", format_amount(account.overdraft_limit));
            println!();
            println!("  Balance:        {}", format_amount(account.balance));
            println!("  Entries:        {}", entries.len());
            if let Some(last) = last_activity {
                println!("  Last activity:  {}", last.format("%Y-%m-%d %H:%M:%S"));
            }
        }

        AccountCommands::Primary { name } => {
            let account = lookup(engine, &name)?;
            engine.set_primary(account.id).await?;
            println!("Primary account: {}", account.name);
        }

        AccountCommands::Activate { name } => {
            let account = lookup(engine, &name)?;
            engine.set_account_active(account.id, true).await?;
            println!("Activated account: {}", account.name);
        }

        AccountCommands::Deactivate { name } => {
            let account = lookup(engine, &name)?;
            engine.set_account_active(account.id, false).await?;
            println!("Deactivated account: {}", account.name);
        }

        AccountCommands::Remove { name } => {
            let account = lookup(engine, &name)?;
            engine.remove_account(account.id).await?;
            println!("Removed account: {}", account.name);
        }
    }
    Ok(())
}

async fn run_posting_command(
    engine: &Engine,
    kind: TransactionKind,
    amount: &str,
    account: Option<String>,
    description: &str,
    date: Option<String>,
) -> Result<()> {
    let amount = parse_amount(amount).context("Invalid amount format. Use '50.00' or '50'")?;
    let account = account.map(|name| lookup(engine, &name)).transpose()?;
    let timestamp = match date {
        Some(date_str) => parse_date(&date_str)
            .with_context(|| format!("Invalid date format '{}'. Use YYYY-MM-DD", date_str))?,
        None => Utc::now(),
    };

    let receipt = engine
        .create_transaction(account.map(|a| a.id), kind, amount, description, timestamp)
        .await
        .map_err(explain)?;

    println!(
        "Recorded {}: {} on {} (balance {})",
        kind,
        format_amount(receipt.transaction.amount),
        receipt.account.name,
        format_amount(receipt.account.balance)
    );
    Ok(())
}

fn run_transactions_command(
    engine: &Engine,
    account: Option<String>,
    limit: Option<usize>,
) -> Result<()> {
    let mut entries = match account {
        Some(name) => engine.get_account_transactions(lookup(engine, &name)?.id),
        None => engine.get_transactions().as_ref().clone(),
    };
    entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
    if let Some(limit) = limit {
        entries.truncate(limit);
    }

    if entries.is_empty() {
        println!("No transactions found.");
        return Ok(());
    }

    let names = engine.get_accounts();
    let name_of = |id: AccountId| {
        names
            .iter()
            .find(|a| a.id == id)
            .map(|a| a.name.as_str())
            .unwrap_or("?")
    };

    println!(
        "{:<12} {:<15} {:<9} {:>12} DESCRIPTION",
        "DATE", "ACCOUNT", "KIND", "AMOUNT"
    );
    println!("{}", "-".repeat(70));
    for tx in &entries {
        println!(
            "{:<12} {:<15} {:<9} {:>12} {}",
            tx.timestamp.format("%Y-%m-%d"),
            truncate(name_of(tx.account_id), 15),
            tx.kind,
            format_amount(tx.signed_amount()),
            truncate(&tx.description, 30)
        );
    }
    Ok(())
}

fn run_statement_command(engine: &Engine, name: &str) -> Result<()> {
    let account = lookup(engine, name)?;
    let lines = engine.statement(account.id)?;

    println!("Statement: {}", account.name);
    println!();
    if lines.is_empty() {
        println!("No transactions found.");
        return Ok(());
    }

    println!(
        "{:<12} {:<9} {:>12} {:>12} DESCRIPTION",
        "DATE", "KIND", "AMOUNT", "BALANCE"
    );
    println!("{}", "-".repeat(70));
    for line in &lines {
        println!(
            "{:<12} {:<9} {:>12} {:>12} {}",
            line.timestamp.format("%Y-%m-%d"),
            line.kind,
            format_amount(line.amount),
            format_amount(line.running_balance),
            truncate(&line.description, 30)
        );
    }
    Ok(())
}

fn run_summary_command(engine: &Engine) {
    let view = engine.view();

    match &view.active {
        Some(account) => println!("Active account: {}", account.name),
        None => println!("Active account: none"),
    }
    println!();
    println!("  {:<12} {:>12}", "Income:", format_amount(view.totals.income));
    println!("  {:<12} {:>12}", "Expenses:", format_amount(view.totals.expense));
    println!("  {:<12} {:>12}", "Transfers:", format_amount(view.totals.transfers));
    println!("  {}", "-".repeat(25));
    println!("  {:<12} {:>12}", "Balance:", format_amount(view.totals.balance));
    println!();

    if !view.months.is_empty() {
        println!(
            "{:<10} {:>12} {:>12} {:>12} {:>12}",
            "MONTH", "INCOME", "EXPENSE", "NET", "TRANSFERS"
        );
        println!("{}", "-".repeat(62));
        for month in &view.months {
            println!(
                "{:<10} {:>12} {:>12} {:>12} {:>12}",
                month.label(),
                format_amount(month.income),
                format_amount(month.expense),
                format_amount(month.net()),
                format_amount(month.transfers_out)
            );
        }
        println!();
    }

    if !view.recent.is_empty() {
        println!("Recent activity:");
        for tx in &view.recent {
            println!(
                "  {:<12} {:<9} {:>12} {}",
                tx.timestamp.format("%Y-%m-%d"),
                tx.kind,
                format_amount(tx.signed_amount()),
                truncate(&tx.description, 30)
            );
        }
    }

    if !view.is_consistent() {
        println!();
        println!(
            "Warning: {} account(s) disagree with the ledger. Run `saldo check`.",
            view.discrepancies.len()
        );
    }
}

async fn run_audit_command(engine: &Engine) -> Result<()> {
    let records = engine.transfer_records().await?;
    if records.is_empty() {
        println!("No transfers recorded.");
        return Ok(());
    }

    let names = engine.get_accounts();
    let name_of = |id: AccountId| {
        names
            .iter()
            .find(|a| a.id == id)
            .map(|a| a.name.as_str())
            .unwrap_or("?")
    };

    println!(
        "{:<12} {:>10} {:<15} {:<15} DESCRIPTION",
        "DATE", "AMOUNT", "FROM", "TO"
    );
    println!("{}", "-".repeat(70));
    for record in records.iter().rev() {
        println!(
            "{:<12} {:>10} {:<15} {:<15} {}",
            record.timestamp.format("%Y-%m-%d"),
            format_amount(record.amount),
            truncate(name_of(record.origin_account_id), 15),
            truncate(name_of(record.destination_account_id), 15),
            truncate(&record.description, 30)
        );
    }
    Ok(())
}

async fn run_check_command(engine: &Engine) -> Result<()> {
    println!("Checking ledger integrity...\n");

    let report = engine.check_integrity().await?;

    println!("Accounts:     {}", report.accounts_checked);
    println!("Transactions: {}", report.transactions_checked);
    println!();

    if report.is_healthy() {
        println!("Ledger is consistent.");
        return Ok(());
    }

    println!("Issues found:");
    for discrepancy in &report.discrepancies {
        println!(
            "  - {}: balance {} but ledger says {} (off by {})",
            discrepancy.account_name,
            format_amount(discrepancy.balance),
            format_amount(discrepancy.ledger_total),
            format_amount(discrepancy.difference())
        );
    }
    for id in &report.orphan_entries {
        println!("  - entry {} belongs to an unknown account", id);
    }
    for id in &report.unmatched_transfers {
        println!("  - transfer {} has no credit leg", id);
    }
    if !report.primary_conflicts.is_empty() {
        println!(
            "  - {} active accounts are flagged primary",
            report.primary_conflicts.len()
        );
    }
    anyhow::bail!("Ledger integrity check failed");
}

async fn run_export_command(
    engine: &Engine,
    export_type: &str,
    output: Option<&str>,
) -> Result<()> {
    use crate::io::Exporter;
    use std::fs::File;
    use std::io::{Write, stdout};

    let exporter = Exporter::new(engine);

    let writer: Box<dyn Write> = match output {
        Some(path) => {
            let file = File::create(path)
                .with_context(|| format!("Failed to create output file: {}", path))?;
            Box::new(file)
        }
        None => Box::new(stdout()),
    };

    match export_type {
        "transactions" => {
            let count = exporter.export_transactions_csv(writer)?;
            if output.is_some() {
                eprintln!("Exported {} transactions", count);
            }
        }
        "balances" => {
            let count = exporter.export_balances_csv(writer)?;
            if output.is_some() {
                eprintln!("Exported {} balances", count);
            }
        }
        "full" => {
            let snapshot = exporter.export_full_json(writer).await?;
            if output.is_some() {
                eprintln!(
                    "Exported full store: {} accounts, {} transactions, {} transfers",
                    snapshot.accounts.len(),
                    snapshot.transactions.len(),
                    snapshot.transfers.len()
                );
            }
        }
        _ => {
            anyhow::bail!(
                "Invalid export type '{}'. Valid types: transactions, balances, full",
                export_type
            );
        }
    }

    Ok(())
}

/// Attach recovery guidance to errors that left partial progress behind.
fn explain(err: EngineError) -> anyhow::Error {
    let hint = match err.class() {
        ErrorClass::PartialTransfer => Some(concat!(
            "Funds left the origin but did not reach the destination. ",
            "Run `saldo check` and correct the destination manually."
        )),
        ErrorClass::RemoteWrite => {
            Some("Some writes committed before the failure. Run `saldo check` to see what drifted.")
        }
        _ => None,
    };
    match hint {
        Some(hint) => anyhow::Error::new(err).context(hint),
        None => err.into(),
    }
}

fn lookup(engine: &Engine, key: &str) -> Result<Account> {
    engine
        .find_account(key)
        .ok_or_else(|| anyhow::anyhow!("Account not found: {}", key))
}

fn status(account: &Account) -> &'static str {
    match (account.active, account.is_primary) {
        (true, true) => "active, primary",
        (true, false) => "active",
        (false, true) => "inactive, primary",
        (false, false) => "inactive",
    }
}

fn truncate(s: &str, max_len: usize) -> String {
    if s.chars().count() <= max_len {
        s.to_string()
    } else {
        let head: String = s.chars().take(max_len - 3).collect();
        format!("{}...", head)
    }
}

fn parse_date(date_str: &str) -> Result<DateTime<Utc>> {
    use chrono::NaiveDate;

    let naive_date = NaiveDate::parse_from_str(date_str, "%Y-%m-%d")
        .context("Date must be in YYYY-MM-DD format")?;

    let naive_datetime = naive_date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| anyhow::anyhow!("Invalid date"))?;

    Ok(DateTime::from_naive_utc_and_offset(naive_datetime, Utc))
}
