use std::path::Path;
use std::time::Duration;

use rusqlite::{Connection, OptionalExtension, Transaction, TransactionBehavior};
use tracing::{debug, error};

use crate::error::{ErrorKind, Result};

pub const DB_FILE: &str = "iolta.db";

/// Category every transaction falls back to when no rule matches.
pub const UNCATEGORIZED: &str = "Uncategorized";

pub const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS accounts (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    account_type TEXT NOT NULL,
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS clients (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    balance INTEGER NOT NULL DEFAULT 0,
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS categories (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    category_type TEXT NOT NULL,
    description TEXT,
    is_active INTEGER NOT NULL DEFAULT 1
);

CREATE TABLE IF NOT EXISTS journal_lines (
    id INTEGER PRIMARY KEY,
    journal_id TEXT NOT NULL,
    line_number INTEGER NOT NULL,
    journal_date TEXT NOT NULL,
    journal_type TEXT NOT NULL,
    description TEXT NOT NULL,
    account_id INTEGER NOT NULL,
    debit INTEGER NOT NULL DEFAULT 0 CHECK (debit >= 0),
    credit INTEGER NOT NULL DEFAULT 0 CHECK (credit >= 0),
    memo TEXT,
    source_type TEXT,
    source_id INTEGER,
    reverses_journal_id TEXT,
    created_at TEXT DEFAULT (datetime('now')),
    CHECK (debit = 0 OR credit = 0),
    UNIQUE (journal_id, line_number),
    FOREIGN KEY (account_id) REFERENCES accounts(id)
);

CREATE INDEX IF NOT EXISTS idx_journal_lines_account ON journal_lines(account_id, journal_date);
CREATE INDEX IF NOT EXISTS idx_journal_lines_reverses ON journal_lines(reverses_journal_id);

CREATE TRIGGER IF NOT EXISTS journal_lines_no_update BEFORE UPDATE ON journal_lines
BEGIN
    SELECT RAISE(ABORT, 'journal lines are immutable');
END;

CREATE TRIGGER IF NOT EXISTS journal_lines_no_delete BEFORE DELETE ON journal_lines
BEGIN
    SELECT RAISE(ABORT, 'journal lines are immutable');
END;

CREATE TABLE IF NOT EXISTS reconciliations (
    id INTEGER PRIMARY KEY,
    account_id INTEGER NOT NULL,
    statement_date TEXT NOT NULL,
    statement_ending_balance INTEGER NOT NULL,
    beginning_balance INTEGER NOT NULL DEFAULT 0,
    cleared_checks_count INTEGER NOT NULL DEFAULT 0,
    cleared_checks_total INTEGER NOT NULL DEFAULT 0,
    cleared_deposits_count INTEGER NOT NULL DEFAULT 0,
    cleared_deposits_total INTEGER NOT NULL DEFAULT 0,
    difference INTEGER NOT NULL DEFAULT 0,
    status TEXT NOT NULL DEFAULT 'in_progress',
    created_at TEXT DEFAULT (datetime('now')),
    completed_at TEXT,
    FOREIGN KEY (account_id) REFERENCES accounts(id)
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_reconciliations_one_open
    ON reconciliations(account_id) WHERE status = 'in_progress';

CREATE TABLE IF NOT EXISTS transactions (
    id INTEGER PRIMARY KEY,
    account_id INTEGER NOT NULL,
    client_id INTEGER,
    category_id INTEGER,
    date TEXT NOT NULL,
    amount INTEGER NOT NULL,
    description TEXT NOT NULL,
    original_description TEXT,
    vendor TEXT,
    memo TEXT,
    status TEXT NOT NULL DEFAULT 'pending',
    check_number TEXT,
    is_split INTEGER NOT NULL DEFAULT 0,
    -- 'created' by create_split, or 'converted' from a plain transaction
    split_origin TEXT,
    presplit_client_id INTEGER,
    presplit_category_id INTEGER,
    presplit_categorized_by TEXT,
    parent_transaction_id INTEGER,
    reconciliation_id INTEGER,
    cleared_date TEXT,
    categorized_by TEXT,
    created_at TEXT DEFAULT (datetime('now')),
    FOREIGN KEY (account_id) REFERENCES accounts(id),
    FOREIGN KEY (client_id) REFERENCES clients(id),
    FOREIGN KEY (category_id) REFERENCES categories(id),
    FOREIGN KEY (parent_transaction_id) REFERENCES transactions(id),
    FOREIGN KEY (reconciliation_id) REFERENCES reconciliations(id)
);

CREATE INDEX IF NOT EXISTS idx_transactions_account ON transactions(account_id, date);
CREATE INDEX IF NOT EXISTS idx_transactions_parent ON transactions(parent_transaction_id);

CREATE TABLE IF NOT EXISTS reconciliation_items (
    reconciliation_id INTEGER NOT NULL,
    transaction_id INTEGER NOT NULL,
    PRIMARY KEY (reconciliation_id, transaction_id),
    FOREIGN KEY (reconciliation_id) REFERENCES reconciliations(id),
    FOREIGN KEY (transaction_id) REFERENCES transactions(id)
);

CREATE TABLE IF NOT EXISTS rules (
    id INTEGER PRIMARY KEY,
    user_id INTEGER,
    category_id INTEGER NOT NULL,
    match_field TEXT NOT NULL DEFAULT 'description',
    match_type TEXT NOT NULL DEFAULT 'contains',
    match_value TEXT NOT NULL,
    case_sensitive INTEGER NOT NULL DEFAULT 0,
    vendor TEXT,
    priority INTEGER NOT NULL DEFAULT 100,
    hit_count INTEGER NOT NULL DEFAULT 0,
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT DEFAULT (datetime('now')),
    FOREIGN KEY (category_id) REFERENCES categories(id)
);

CREATE TABLE IF NOT EXISTS audit_log (
    id INTEGER PRIMARY KEY,
    action TEXT NOT NULL,
    entity_type TEXT NOT NULL,
    entity_id TEXT,
    old_values TEXT,
    new_values TEXT,
    reason TEXT,
    created_at TEXT DEFAULT (datetime('now'))
);

CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
";

// (name, category_type, description)
const DEFAULT_CATEGORIES: &[(&str, &str, &str)] = &[
    // Income
    ("Legal Fees Earned", "income", "Fees transferred from trust once earned"),
    ("Retainers", "income", "Advance fee deposits held in trust"),
    ("Cost Reimbursements", "income", "Client repayments of advanced costs"),
    ("Interest Income", "income", "Operating account interest"),
    ("Other Income", "income", "Anything else"),
    // Expenses
    ("Court Filing Fees", "expense", "Filing, motion and appeal fees"),
    ("Service of Process", "expense", "Process servers, sheriff fees"),
    ("Deposition & Transcripts", "expense", "Court reporters, transcripts, videography"),
    ("Expert Witness", "expense", "Expert retention and testimony fees"),
    ("Records Requests", "expense", "Medical, police and public records"),
    ("Postage & Courier", "expense", "Mail, overnight, messenger"),
    ("Copying & Printing", "expense", "Copies, exhibits, binders"),
    ("Travel", "expense", "Mileage, parking, hotels"),
    ("Legal Research", "expense", "Research databases and subscriptions"),
    ("Office Expense", "expense", "Supplies, minor equipment"),
    ("Software & Subscriptions", "expense", "Practice management, SaaS"),
    ("Bank & Merchant Fees", "expense", "Card processing, wire fees"),
    ("Bar Dues & CLE", "expense", "Licensing, continuing education"),
    ("Insurance", "expense", "Malpractice, general liability"),
    ("Rent / Lease", "expense", "Office rent"),
    ("Transfer", "expense", "Transfers between own accounts"),
    (UNCATEGORIZED, "expense", "Needs review"),
];

pub fn get_connection(db_path: &Path) -> Result<Connection> {
    let conn = Connection::open(db_path)?;
    conn.busy_timeout(Duration::from_secs(5))?;
    conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
    Ok(conn)
}

pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(SCHEMA)?;

    let count: i64 = conn.query_row("SELECT count(*) FROM categories", [], |row| row.get(0))?;
    if count == 0 {
        for (name, category_type, description) in DEFAULT_CATEGORIES {
            conn.execute(
                "INSERT INTO categories (name, category_type, description) VALUES (?1, ?2, ?3)",
                rusqlite::params![name, category_type, description],
            )?;
        }
    }
    Ok(())
}

/// Runs `work` inside one IMMEDIATE transaction.
///
/// Commits when `work` returns `Ok`. Any `Err`, or a panic unwinding through
/// here, drops the transaction guard and everything `work` wrote is rolled
/// back. IMMEDIATE takes the write lock up front, so check-then-insert
/// sequences inside `work` are serialized against other writers.
pub fn unit_of_work<T, F>(conn: &Connection, operation: &'static str, work: F) -> Result<T>
where
    F: FnOnce(&Transaction<'_>) -> Result<T>,
{
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    match work(&tx) {
        Ok(value) => {
            tx.commit().map_err(|e| {
                error!(operation, error = %e, "commit failed; rolled back");
                e
            })?;
            Ok(value)
        }
        Err(e) => {
            if e.kind() == ErrorKind::Storage {
                error!(operation, error = %e, "storage failure; rolled back");
            } else {
                debug!(operation, error = %e, "rejected; rolled back");
            }
            Err(e)
        }
    }
}

/// True when `e` is a UNIQUE constraint failure (including partial unique indexes).
pub fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(err, _)
            if err.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

pub fn get_metadata(conn: &Connection, key: &str) -> Option<String> {
    conn.query_row("SELECT value FROM metadata WHERE key = ?1", [key], |r| r.get(0))
        .optional()
        .ok()
        .flatten()
}

pub fn set_metadata(conn: &Connection, key: &str, value: &str) -> Result<()> {
    conn.execute(
        "INSERT INTO metadata (key, value) VALUES (?1, ?2) \
         ON CONFLICT(key) DO UPDATE SET value = excluded.value",
        [key, value],
    )?;
    Ok(())
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;

    pub fn test_db() -> (tempfile::TempDir, Connection) {
        let dir = tempfile::tempdir().unwrap();
        let conn = get_connection(&dir.path().join("test.db")).unwrap();
        init_db(&conn).unwrap();
        (dir, conn)
    }
}
