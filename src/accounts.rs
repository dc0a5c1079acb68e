use rusqlite::{Connection, OptionalExtension};
use serde_json::json;

use crate::audit::{emit, AuditEntry, AuditSink};
use crate::db::is_unique_violation;
use crate::error::{LedgerError, Result};
use crate::ledger;
use crate::models::{Account, AccountType, Client};
use crate::money::Money;

pub fn create_account(
    conn: &Connection,
    audit: &dyn AuditSink,
    name: &str,
    account_type: AccountType,
) -> Result<i64> {
    let name = name.trim();
    if name.is_empty() {
        return Err(LedgerError::InvalidValue {
            field: "account name",
            value: String::new(),
        });
    }
    conn.execute(
        "INSERT INTO accounts (name, account_type) VALUES (?1, ?2)",
        rusqlite::params![name, account_type],
    )
    .map_err(|e| {
        if is_unique_violation(&e) {
            LedgerError::DuplicateName(name.to_string())
        } else {
            e.into()
        }
    })?;
    let id = conn.last_insert_rowid();
    emit(
        audit,
        AuditEntry::new("account.create", "account", id)
            .new_values(json!({"name": name, "account_type": account_type})),
    );
    Ok(id)
}

pub fn get_account(conn: &Connection, id: i64) -> Result<Account> {
    conn.query_row(
        &format!("SELECT {} FROM accounts WHERE id = ?1", Account::COLUMNS),
        [id],
        Account::from_row,
    )
    .optional()?
    .ok_or_else(|| LedgerError::AccountNotFound(id.to_string()))
}

pub fn find_account_by_name(conn: &Connection, name: &str) -> Result<Account> {
    conn.query_row(
        &format!("SELECT {} FROM accounts WHERE name = ?1", Account::COLUMNS),
        [name],
        Account::from_row,
    )
    .optional()?
    .ok_or_else(|| LedgerError::AccountNotFound(name.to_string()))
}

/// Looks an account up by numeric id first, then by exact name.
pub fn resolve_account(conn: &Connection, key: &str) -> Result<Account> {
    match key.parse::<i64>() {
        Ok(id) => get_account(conn, id),
        Err(_) => find_account_by_name(conn, key),
    }
}

/// Fails unless the account exists and is active.
pub fn require_active(conn: &Connection, id: i64) -> Result<Account> {
    let account = get_account(conn, id)?;
    if !account.is_active {
        return Err(LedgerError::AccountInactive(id));
    }
    Ok(account)
}

pub fn list_accounts(conn: &Connection, include_inactive: bool) -> Result<Vec<Account>> {
    let sql = if include_inactive {
        format!("SELECT {} FROM accounts ORDER BY name", Account::COLUMNS)
    } else {
        format!("SELECT {} FROM accounts WHERE is_active = 1 ORDER BY name", Account::COLUMNS)
    };
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], Account::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Soft delete. Entries already posted to the account stay untouched.
pub fn deactivate_account(conn: &Connection, audit: &dyn AuditSink, id: i64) -> Result<()> {
    let account = get_account(conn, id)?;
    if !account.is_active {
        return Ok(());
    }
    conn.execute("UPDATE accounts SET is_active = 0 WHERE id = ?1", [id])?;
    emit(
        audit,
        AuditEntry::new("account.deactivate", "account", id)
            .old(json!({"is_active": true}))
            .new_values(json!({"is_active": false})),
    );
    Ok(())
}

pub struct AccountSummary {
    pub account: Account,
    /// Net debit balance from journal lines.
    pub journal_balance: Money,
    /// Sum of non-void flat transactions, split parents excluded.
    pub register_balance: Money,
}

/// Dashboard totals. Inactive accounts are left out.
pub fn account_summary(conn: &Connection) -> Result<Vec<AccountSummary>> {
    let mut summaries = Vec::new();
    for account in list_accounts(conn, false)? {
        let journal_balance = ledger::balance_of(conn, account.id, None)?.balance;
        let register_balance = register_balance(conn, account.id)?;
        summaries.push(AccountSummary {
            account,
            journal_balance,
            register_balance,
        });
    }
    Ok(summaries)
}

pub fn register_balance(conn: &Connection, account_id: i64) -> Result<Money> {
    Ok(conn.query_row(
        "SELECT COALESCE(SUM(amount), 0) FROM transactions \
         WHERE account_id = ?1 AND status != 'void' AND is_split = 0",
        [account_id],
        |r| r.get(0),
    )?)
}

// ---------------------------------------------------------------------------
// Clients
// ---------------------------------------------------------------------------

pub fn create_client(conn: &Connection, audit: &dyn AuditSink, name: &str) -> Result<i64> {
    let name = name.trim();
    if name.is_empty() {
        return Err(LedgerError::InvalidValue {
            field: "client name",
            value: String::new(),
        });
    }
    conn.execute("INSERT INTO clients (name) VALUES (?1)", [name])
        .map_err(|e| {
            if is_unique_violation(&e) {
                LedgerError::DuplicateName(name.to_string())
            } else {
                e.into()
            }
        })?;
    let id = conn.last_insert_rowid();
    emit(
        audit,
        AuditEntry::new("client.create", "client", id).new_values(json!({"name": name})),
    );
    Ok(id)
}

pub fn get_client(conn: &Connection, id: i64) -> Result<Client> {
    conn.query_row(
        &format!("SELECT {} FROM clients WHERE id = ?1", Client::COLUMNS),
        [id],
        Client::from_row,
    )
    .optional()?
    .ok_or_else(|| LedgerError::ClientNotFound(id.to_string()))
}

pub fn resolve_client(conn: &Connection, key: &str) -> Result<Client> {
    if let Ok(id) = key.parse::<i64>() {
        return get_client(conn, id);
    }
    conn.query_row(
        &format!("SELECT {} FROM clients WHERE name = ?1", Client::COLUMNS),
        [key],
        Client::from_row,
    )
    .optional()?
    .ok_or_else(|| LedgerError::ClientNotFound(key.to_string()))
}

pub fn list_clients(conn: &Connection) -> Result<Vec<Client>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM clients WHERE is_active = 1 ORDER BY name",
        Client::COLUMNS
    ))?;
    let rows = stmt
        .query_map([], Client::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Adds `delta` to the client's running balance. Callers run this inside
/// their own unit of work.
pub(crate) fn adjust_client_balance(conn: &Connection, client_id: i64, delta: Money) -> Result<()> {
    let changed = conn.execute(
        "UPDATE clients SET balance = balance + ?1 WHERE id = ?2",
        rusqlite::params![delta, client_id],
    )?;
    if changed == 0 {
        return Err(LedgerError::ClientNotFound(client_id.to_string()));
    }
    Ok(())
}

pub fn category_id_by_name(conn: &Connection, name: &str) -> Result<i64> {
    conn.query_row("SELECT id FROM categories WHERE name = ?1", [name], |r| r.get(0))
        .optional()?
        .ok_or_else(|| LedgerError::CategoryNotFound(name.to_string()))
}

pub fn require_category(conn: &Connection, category_id: i64) -> Result<()> {
    let found: Option<i64> = conn
        .query_row("SELECT id FROM categories WHERE id = ?1", [category_id], |r| r.get(0))
        .optional()?;
    found
        .map(|_| ())
        .ok_or_else(|| LedgerError::CategoryNotFound(category_id.to_string()))
}
