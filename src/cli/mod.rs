pub mod accounts;
pub mod categorize;
pub mod clients;
pub mod init;
pub mod journal;
pub mod reconcile;
pub mod rules;
pub mod split;
pub mod status;
pub mod txn;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use chrono::{Local, NaiveDate};
use clap::{Parser, Subcommand};
use rusqlite::Connection;

use crate::accounts::{category_id_by_name, require_category, resolve_account};
use crate::audit::SqliteAuditSink;
use crate::categorizer::{Categorizer, HistoryClassifier};
use crate::db::{get_connection, DB_FILE};
use crate::error::parse_date;
use crate::money::Money;
use crate::settings::{load_settings, Settings};

/// An open database plus the audit sink writing next to it.
pub(crate) struct Books {
    pub conn: Connection,
    pub audit: SqliteAuditSink,
    pub settings: Settings,
}

impl Books {
    pub fn open() -> anyhow::Result<Self> {
        let settings = load_settings();
        let db_path = PathBuf::from(&settings.data_dir).join(DB_FILE);
        if !db_path.exists() {
            bail!("No database at {}. Run `iolta init` first.", db_path.display());
        }
        let conn = get_connection(&db_path)
            .with_context(|| format!("opening {}", db_path.display()))?;
        Ok(Self {
            conn,
            audit: SqliteAuditSink::new(db_path),
            settings,
        })
    }

    pub fn categorizer(&self) -> Categorizer<'_> {
        Categorizer::new(&self.conn, &self.audit, self.settings.user_id)
    }

    /// Rules first, then past categorizations of the same vendor.
    pub fn auto_categorizer(&self) -> anyhow::Result<Categorizer<'_>> {
        let history = HistoryClassifier::load(&self.conn).context("loading categorization history")?;
        Ok(self
            .categorizer()
            .with_classifier(Arc::new(history), Duration::from_millis(self.settings.classifier_timeout_ms)))
    }
}

pub(crate) fn today() -> NaiveDate {
    Local::now().date_naive()
}

/// Accepts a category id or name.
pub(crate) fn resolve_category(conn: &Connection, key: &str) -> anyhow::Result<i64> {
    match key.trim().parse::<i64>() {
        Ok(id) => {
            require_category(conn, id)?;
            Ok(id)
        }
        Err(_) => Ok(category_id_by_name(conn, key)?),
    }
}

/// Splits `NAME=AMOUNT` on the last `=`, so names may contain `=`.
pub(crate) fn parse_allocation(raw: &str) -> anyhow::Result<(String, Money)> {
    let (name, amount) = raw
        .rsplit_once('=')
        .ok_or_else(|| anyhow!("expected NAME=AMOUNT, got '{raw}'"))?;
    let name = name.trim();
    if name.is_empty() {
        bail!("missing name in '{raw}'");
    }
    Ok((name.to_string(), amount.parse()?))
}

pub(crate) fn account_id(conn: &Connection, key: &str) -> anyhow::Result<i64> {
    Ok(resolve_account(conn, key)?.id)
}

#[derive(Parser)]
#[command(
    name = "iolta",
    about = "Double-entry ledger, trust reconciliation and cost tracking for small law practices."
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Choose a data directory and initialize the database.
    Init {
        /// Path for data (default: ~/Documents/iolta)
        #[arg(long = "data-dir")]
        data_dir: Option<String>,
        /// Firm name shown in report headers
        #[arg(long)]
        firm: Option<String>,
    },
    /// Show current database and summary statistics.
    Status,
    /// Manage ledger and bank accounts.
    Accounts {
        #[command(subcommand)]
        command: AccountsCommands,
    },
    /// Manage clients.
    Clients {
        #[command(subcommand)]
        command: ClientsCommands,
    },
    /// Post and inspect journal entries.
    Journal {
        #[command(subcommand)]
        command: JournalCommands,
    },
    /// Show the journal balance of one account.
    Balance {
        /// Account name or id
        account: String,
        /// Only count journals dated on or before this day
        #[arg(long = "as-of", value_parser = parse_date)]
        as_of: Option<NaiveDate>,
    },
    /// Debit and credit totals for every account.
    TrialBalance {
        #[arg(long = "as-of", value_parser = parse_date)]
        as_of: Option<NaiveDate>,
    },
    /// List journals whose lines do not balance.
    Verify,
    /// Record and manage register transactions.
    Txn {
        #[command(subcommand)]
        command: TxnCommands,
    },
    /// Allocate one transaction across clients or categories.
    Split {
        #[command(subcommand)]
        command: SplitCommands,
    },
    /// Reconcile a statement account against a bank statement.
    Reconcile {
        #[command(subcommand)]
        command: ReconcileCommands,
    },
    /// Manage categorization rules.
    Rules {
        #[command(subcommand)]
        command: RulesCommands,
    },
    /// Re-run categorization on uncategorized transactions.
    Categorize,
}

#[derive(Subcommand)]
pub enum AccountsCommands {
    /// Add a new account.
    Add {
        /// Account name, e.g. 'Operating Checking'
        name: String,
        /// asset, liability, equity, income, expense, checking, savings, credit_card, cash, trust
        #[arg(long = "type")]
        account_type: String,
    },
    /// List accounts.
    List {
        /// Include deactivated accounts
        #[arg(long)]
        all: bool,
    },
    /// Deactivate an account. History is kept.
    Deactivate {
        /// Account name or id
        account: String,
    },
    /// Journal and register balances of active accounts.
    Summary,
}

#[derive(Subcommand)]
pub enum ClientsCommands {
    /// Add a client.
    Add { name: String },
    /// List clients with their running balances.
    List,
}

#[derive(Subcommand)]
pub enum JournalCommands {
    /// Post a multi-line journal entry.
    Post {
        #[arg(long)]
        description: String,
        #[arg(long, value_parser = parse_date)]
        date: Option<NaiveDate>,
        /// Debit line as ACCOUNT=AMOUNT (repeatable)
        #[arg(long = "debit")]
        debits: Vec<String>,
        /// Credit line as ACCOUNT=AMOUNT (repeatable)
        #[arg(long = "credit")]
        credits: Vec<String>,
        /// standard, adjustment, opening, closing
        #[arg(long = "type", default_value = "standard")]
        journal_type: String,
    },
    /// Debit an expense account, credit the paying account.
    Expense {
        amount: Money,
        #[arg(long)]
        expense: String,
        #[arg(long)]
        from: String,
        #[arg(long)]
        description: String,
        #[arg(long, value_parser = parse_date)]
        date: Option<NaiveDate>,
    },
    /// Debit a bank account, credit an income account.
    Income {
        amount: Money,
        #[arg(long)]
        to: String,
        #[arg(long)]
        from: String,
        #[arg(long)]
        description: String,
        #[arg(long, value_parser = parse_date)]
        date: Option<NaiveDate>,
    },
    /// Move money between two accounts.
    Transfer {
        amount: Money,
        #[arg(long)]
        from: String,
        #[arg(long)]
        to: String,
        #[arg(long)]
        description: String,
        #[arg(long, value_parser = parse_date)]
        date: Option<NaiveDate>,
    },
    /// Post the mirror image of a journal.
    Reverse {
        journal_id: String,
        #[arg(long)]
        reason: String,
    },
    /// Show one journal with its lines.
    Show { journal_id: String },
    /// Recent journals, newest first.
    List {
        #[arg(long, default_value = "20")]
        limit: usize,
    },
}

#[derive(Subcommand)]
pub enum TxnCommands {
    /// Record a transaction. Negative amounts are money out.
    Add {
        /// Account name or id
        account: String,
        #[arg(allow_hyphen_values = true)]
        amount: Money,
        description: String,
        #[arg(long, value_parser = parse_date)]
        date: Option<NaiveDate>,
        /// Client name or id
        #[arg(long)]
        client: Option<String>,
        /// Category name or id; skips the rules
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        vendor: Option<String>,
        #[arg(long)]
        memo: Option<String>,
        #[arg(long = "check")]
        check_number: Option<String>,
    },
    /// List transactions, newest first.
    List {
        #[arg(long)]
        account: Option<String>,
        #[arg(long, default_value = "50")]
        limit: usize,
    },
    /// Move a transaction to printed or void.
    Status { id: i64, status: String },
    /// Void a transaction and undo its client effect.
    Void {
        id: i64,
        #[arg(long, default_value = "")]
        reason: String,
    },
}

#[derive(Subcommand)]
pub enum SplitCommands {
    /// Record a new transaction already allocated across targets.
    Create {
        /// Account name or id
        account: String,
        #[arg(allow_hyphen_values = true)]
        total: Money,
        description: String,
        #[arg(long, value_parser = parse_date)]
        date: Option<NaiveDate>,
        #[arg(long = "check")]
        check_number: Option<String>,
        /// Allocation as client:NAME=AMOUNT or category:NAME=AMOUNT (repeatable, in order)
        #[arg(long = "line", required = true, allow_hyphen_values = true)]
        lines: Vec<String>,
    },
    /// Split an existing transaction.
    Apply {
        id: i64,
        #[arg(long = "line", required = true, allow_hyphen_values = true)]
        lines: Vec<String>,
    },
    /// Show a split parent and its children.
    Show { id: i64 },
    /// Delete a split and undo every child's effect.
    Delete { id: i64 },
}

#[derive(Subcommand)]
pub enum ReconcileCommands {
    /// Open a session for one statement.
    Start {
        /// Account name or id
        account: String,
        /// Statement date
        #[arg(long, value_parser = parse_date)]
        date: NaiveDate,
        /// Statement ending balance
        #[arg(long, allow_hyphen_values = true)]
        balance: Money,
    },
    /// Save the tentatively cleared set without completing.
    Save {
        id: i64,
        /// Transaction ids, comma separated
        #[arg(long, value_delimiter = ',')]
        clear: Vec<i64>,
    },
    /// Complete the session. Without --clear the saved set is used.
    Complete {
        id: i64,
        #[arg(long, value_delimiter = ',')]
        clear: Option<Vec<i64>>,
    },
    /// Change the statement date or ending balance of an open session.
    Update {
        id: i64,
        #[arg(long, value_parser = parse_date)]
        date: Option<NaiveDate>,
        #[arg(long, allow_hyphen_values = true)]
        balance: Option<Money>,
    },
    /// Discard an open session.
    Delete { id: i64 },
    /// Show the worksheet of a session.
    Show { id: i64 },
    /// Session history of one account.
    List { account: String },
}

#[derive(Subcommand)]
pub enum RulesCommands {
    /// Add a categorization rule.
    Add {
        /// Text, regex, or amount pattern (e.g. '>100', '50-75')
        pattern: String,
        /// Category name or id to assign
        #[arg(long)]
        category: String,
        /// description, vendor, memo, amount, any
        #[arg(long, default_value = "description")]
        field: String,
        /// contains, starts_with, ends_with, exact, regex
        #[arg(long = "match-type", default_value = "contains")]
        match_type: String,
        #[arg(long = "case-sensitive")]
        case_sensitive: bool,
        /// Normalized vendor name
        #[arg(long)]
        vendor: Option<String>,
        /// Lower runs first
        #[arg(long, default_value_t = crate::categorizer::DEFAULT_PRIORITY)]
        priority: i64,
    },
    /// List active rules in evaluation order.
    List,
    /// Update an existing rule.
    Update {
        /// Rule ID (shown in `iolta rules list`)
        id: i64,
        #[arg(long)]
        pattern: Option<String>,
        #[arg(long)]
        category: Option<String>,
        #[arg(long)]
        field: Option<String>,
        #[arg(long = "match-type")]
        match_type: Option<String>,
        #[arg(long = "case-sensitive")]
        case_sensitive: Option<bool>,
        #[arg(long)]
        priority: Option<i64>,
    },
    /// Delete (deactivate) a rule by ID.
    Delete {
        /// Rule ID (shown in `iolta rules list`)
        id: i64,
    },
}
