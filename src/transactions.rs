//! Flat transaction register for statement accounts.
//!
//! Amounts are signed relative to the account: negative is money out.
//! Status only moves forward, and `cleared` is written by reconciliation
//! completion alone.

use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use tracing::{info, warn};

use crate::accounts::{adjust_client_balance, get_client, require_active, require_category};
use crate::audit::{emit, AuditEntry, AuditSink};
use crate::categorizer::{record_hit, Categorization, Categorizer, TransactionFields};
use crate::db::unit_of_work;
use crate::error::{LedgerError, Result};
use crate::models::{CategorizedBy, Transaction, TransactionStatus};
use crate::money::Money;

#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub account_id: i64,
    pub client_id: Option<i64>,
    pub category_id: Option<i64>,
    pub date: NaiveDate,
    pub amount: Money,
    pub description: String,
    pub original_description: Option<String>,
    pub vendor: Option<String>,
    pub memo: Option<String>,
    pub check_number: Option<String>,
}

impl NewTransaction {
    pub fn new(account_id: i64, date: NaiveDate, amount: Money, description: impl Into<String>) -> Self {
        Self {
            account_id,
            client_id: None,
            category_id: None,
            date,
            amount,
            description: description.into(),
            original_description: None,
            vendor: None,
            memo: None,
            check_number: None,
        }
    }
}

pub(crate) fn load_transaction(conn: &Connection, id: i64) -> Result<Transaction> {
    conn.query_row(
        &format!("SELECT {} FROM transactions WHERE id = ?1", Transaction::COLUMNS),
        [id],
        Transaction::from_row,
    )
    .optional()?
    .ok_or(LedgerError::TransactionNotFound(id))
}

/// The open reconciliation session tentatively holding `transaction_id`, if any.
pub(crate) fn open_session_holding(conn: &Connection, transaction_id: i64) -> Result<Option<i64>> {
    Ok(conn
        .query_row(
            "SELECT r.id FROM reconciliation_items ri \
             JOIN reconciliations r ON r.id = ri.reconciliation_id \
             WHERE ri.transaction_id = ?1 AND r.status = 'in_progress'",
            [transaction_id],
            |r| r.get(0),
        )
        .optional()?)
}

pub struct Register<'a> {
    conn: &'a Connection,
    audit: &'a dyn AuditSink,
    categorizer: Option<Categorizer<'a>>,
}

impl<'a> Register<'a> {
    pub fn new(conn: &'a Connection, audit: &'a dyn AuditSink) -> Self {
        Self {
            conn,
            audit,
            categorizer: None,
        }
    }

    /// Transactions created without a category go through `categorizer`.
    pub fn with_categorizer(mut self, categorizer: Categorizer<'a>) -> Self {
        self.categorizer = Some(categorizer);
        self
    }

    pub fn create_transaction(&self, new: NewTransaction) -> Result<i64> {
        if new.amount.is_zero() {
            return Err(LedgerError::InvalidValue {
                field: "amount",
                value: new.amount.to_string(),
            });
        }
        if new.description.trim().is_empty() {
            return Err(LedgerError::InvalidValue {
                field: "description",
                value: String::new(),
            });
        }

        // Classification happens before the write lock is taken, so a slow
        // classifier never holds up other writers.
        let categorization: Option<Categorization> = match (new.category_id, &self.categorizer) {
            (Some(_), _) | (None, None) => None,
            (None, Some(c)) => Some(c.categorize(&TransactionFields {
                description: new.description.clone(),
                original_description: new.original_description.clone(),
                vendor: new.vendor.clone(),
                memo: new.memo.clone(),
                amount: new.amount,
            })?),
        };
        let (category_id, categorized_by) = match (&categorization, new.category_id) {
            (_, Some(id)) => (Some(id), Some(CategorizedBy::Manual)),
            (Some(c), None) => (Some(c.category_id), Some(c.categorized_by)),
            (None, None) => (None, None),
        };
        let vendor = new
            .vendor
            .clone()
            .or_else(|| categorization.as_ref().and_then(|c| c.vendor.clone()));

        let id = unit_of_work(self.conn, "create_transaction", |tx| {
            require_active(tx, new.account_id)?;
            if let Some(client_id) = new.client_id {
                get_client(tx, client_id)?;
            }
            if let Some(category_id) = category_id {
                require_category(tx, category_id)?;
            }
            tx.execute(
                "INSERT INTO transactions (account_id, client_id, category_id, date, amount, description, \
                 original_description, vendor, memo, check_number, status, categorized_by) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                rusqlite::params![
                    new.account_id,
                    new.client_id,
                    category_id,
                    new.date,
                    new.amount,
                    new.description,
                    new.original_description,
                    vendor,
                    new.memo,
                    new.check_number,
                    TransactionStatus::Pending,
                    categorized_by,
                ],
            )?;
            let id = tx.last_insert_rowid();
            if let Some(client_id) = new.client_id {
                adjust_client_balance(tx, client_id, new.amount)?;
            }
            if let Some(rule_id) = categorization.as_ref().and_then(|c| c.rule_id) {
                record_hit(tx, rule_id)?;
            }
            Ok(id)
        })?;

        info!(transaction_id = id, account_id = new.account_id, amount = %new.amount, "transaction recorded");
        emit(
            self.audit,
            AuditEntry::new("transaction.create", "transaction", id).new_values(json!({
                "account_id": new.account_id,
                "client_id": new.client_id,
                "amount": new.amount.to_string(),
                "category_id": category_id,
                "categorized_by": categorized_by,
            })),
        );
        Ok(id)
    }

    pub fn get_transaction(&self, id: i64) -> Result<Transaction> {
        load_transaction(self.conn, id)
    }

    /// Newest first. `account_id` of `None` lists every account.
    pub fn list_transactions(&self, account_id: Option<i64>, limit: usize) -> Result<Vec<Transaction>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM transactions WHERE (?1 IS NULL OR account_id = ?1) \
             ORDER BY date DESC, id DESC LIMIT ?2",
            Transaction::COLUMNS
        ))?;
        let rows = stmt
            .query_map(rusqlite::params![account_id, limit as i64], Transaction::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    /// Moves a transaction forward. `cleared` is refused here; `void` goes
    /// through [`Register::void_transaction`].
    pub fn set_status(&self, id: i64, status: TransactionStatus) -> Result<()> {
        if status == TransactionStatus::Void {
            return self.void_transaction(id, "status change");
        }
        let current = load_transaction(self.conn, id)?;
        if status == TransactionStatus::Cleared || !current.status.can_transition_to(status) {
            warn!(transaction_id = id, from = %current.status, to = %status, "status change refused");
            return Err(LedgerError::InvalidStatusTransition {
                id,
                from: current.status.as_str(),
                to: status.as_str(),
            });
        }
        self.conn.execute(
            "UPDATE transactions SET status = ?1 WHERE id = ?2",
            rusqlite::params![status, id],
        )?;
        emit(
            self.audit,
            AuditEntry::new("transaction.status", "transaction", id)
                .old(json!({"status": current.status}))
                .new_values(json!({"status": status})),
        );
        Ok(())
    }

    /// Voids a transaction and takes its amount back off the client balance.
    pub fn void_transaction(&self, id: i64, reason: &str) -> Result<()> {
        let txn = unit_of_work(self.conn, "void_transaction", |tx| {
            let txn = load_transaction(tx, id)?;
            if txn.status == TransactionStatus::Cleared {
                return Err(LedgerError::TransactionLocked(id));
            }
            if !txn.status.can_transition_to(TransactionStatus::Void) {
                return Err(LedgerError::InvalidStatusTransition {
                    id,
                    from: txn.status.as_str(),
                    to: TransactionStatus::Void.as_str(),
                });
            }
            if txn.is_split || txn.parent_transaction_id.is_some() {
                return Err(LedgerError::SplitMember(id));
            }
            if let Some(session_id) = open_session_holding(tx, id)? {
                return Err(LedgerError::InOpenReconciliation {
                    transaction_id: id,
                    session_id,
                });
            }
            tx.execute(
                "UPDATE transactions SET status = ?1 WHERE id = ?2",
                rusqlite::params![TransactionStatus::Void, id],
            )?;
            if let Some(client_id) = txn.client_id {
                adjust_client_balance(tx, client_id, -txn.amount)?;
            }
            Ok(txn)
        })?;

        info!(transaction_id = id, amount = %txn.amount, "transaction voided");
        emit(
            self.audit,
            AuditEntry::new("transaction.void", "transaction", id)
                .old(json!({"status": txn.status, "amount": txn.amount.to_string()}))
                .new_values(json!({"status": TransactionStatus::Void}))
                .reason(reason),
        );
        Ok(())
    }
}
