//! Bank reconciliation.
//!
//! One session per statement period, `in_progress` until `complete` succeeds.
//! `save` only recomputes the scratchpad totals; `complete` is the single
//! place that writes `cleared` onto transactions. Completed sessions are
//! never edited or removed.

use std::collections::{BTreeSet, HashMap};

use chrono::{NaiveDate, Utc};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::accounts::require_active;
use crate::audit::{emit, AuditEntry, AuditSink};
use crate::db::{is_unique_violation, unit_of_work};
use crate::error::{LedgerError, Result};
use crate::models::{ReconciliationSession, ReconciliationStatus, Transaction, TransactionStatus};
use crate::money::Money;

/// A session with its candidate transactions split by sign.
#[derive(Debug, Clone, Serialize)]
pub struct Worksheet {
    pub session: ReconciliationSession,
    /// Negative amounts: checks and other disbursements.
    pub checks: Vec<Transaction>,
    /// Positive amounts.
    pub deposits: Vec<Transaction>,
    /// Ids currently marked cleared on the scratchpad.
    pub cleared_ids: Vec<i64>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct ClearedTotals {
    checks_count: i64,
    /// Stored as a positive magnitude.
    checks_total: Money,
    deposits_count: i64,
    deposits_total: Money,
}

fn load_session(conn: &Connection, id: i64) -> Result<ReconciliationSession> {
    conn.query_row(
        &format!("SELECT {} FROM reconciliations WHERE id = ?1", ReconciliationSession::COLUMNS),
        [id],
        ReconciliationSession::from_row,
    )
    .optional()?
    .ok_or(LedgerError::SessionNotFound(id))
}

fn load_open_session(conn: &Connection, id: i64) -> Result<ReconciliationSession> {
    let session = load_session(conn, id)?;
    if session.is_completed() {
        warn!(session_id = id, "completed reconciliation is read-only");
        return Err(LedgerError::ReconciliationCompleted(id));
    }
    Ok(session)
}

/// Transactions that can still be cleared in `session`: not cleared, not
/// void, not a split parent, or already linked to this session. Ordered by
/// date then id.
fn load_candidates(conn: &Connection, session: &ReconciliationSession) -> Result<Vec<Transaction>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM transactions \
         WHERE account_id = ?1 AND is_split = 0 \
         AND ((status IS NULL OR status NOT IN ('cleared', 'void')) OR reconciliation_id = ?2) \
         ORDER BY date ASC, id ASC",
        Transaction::COLUMNS
    ))?;
    let rows = stmt
        .query_map(rusqlite::params![session.account_id, session.id], Transaction::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn load_cleared_ids(conn: &Connection, session_id: i64) -> Result<Vec<i64>> {
    let mut stmt = conn.prepare(
        "SELECT transaction_id FROM reconciliation_items WHERE reconciliation_id = ?1 ORDER BY transaction_id",
    )?;
    let ids = stmt
        .query_map([session_id], |r| r.get(0))?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(ids)
}

fn build_worksheet(conn: &Connection, session: ReconciliationSession) -> Result<Worksheet> {
    let candidates = load_candidates(conn, &session)?;
    let cleared_ids = load_cleared_ids(conn, session.id)?;
    let (checks, deposits): (Vec<_>, Vec<_>) = candidates.into_iter().partition(|t| t.amount.is_negative());
    Ok(Worksheet {
        session,
        checks,
        deposits,
        cleared_ids,
    })
}

fn totals_for(candidates: &HashMap<i64, Money>, ids: &BTreeSet<i64>) -> ClearedTotals {
    let mut totals = ClearedTotals::default();
    for &amount in ids.iter().filter_map(|id| candidates.get(id)) {
        if amount.is_negative() {
            totals.checks_count += 1;
            totals.checks_total += amount.abs();
        } else {
            totals.deposits_count += 1;
            totals.deposits_total += amount;
        }
    }
    totals
}

/// Rebuilds the scratchpad for `session` from `cleared_ids` and stores the
/// new totals. Runs inside the caller's unit of work.
fn recompute(
    conn: &Connection,
    session: &ReconciliationSession,
    cleared_ids: &[i64],
) -> Result<ReconciliationSession> {
    let candidates: HashMap<i64, Money> = load_candidates(conn, session)?
        .into_iter()
        .map(|t| (t.id, t.amount))
        .collect();
    let ids: BTreeSet<i64> = cleared_ids.iter().copied().collect();
    if let Some(&bad) = ids.iter().find(|id| !candidates.contains_key(id)) {
        return Err(LedgerError::NotACandidate {
            transaction_id: bad,
            account_id: session.account_id,
        });
    }

    let totals = totals_for(&candidates, &ids);
    let mut updated = session.clone();
    updated.cleared_checks_count = totals.checks_count;
    updated.cleared_checks_total = totals.checks_total;
    updated.cleared_deposits_count = totals.deposits_count;
    updated.cleared_deposits_total = totals.deposits_total;
    updated.difference = updated.statement_ending_balance - updated.cleared_balance();
    debug!(
        session_id = session.id,
        cleared = ids.len(),
        cleared_balance = %updated.cleared_balance(),
        difference = %updated.difference,
        "reconciliation totals"
    );

    conn.execute(
        "DELETE FROM reconciliation_items WHERE reconciliation_id = ?1",
        [session.id],
    )?;
    let mut insert = conn.prepare(
        "INSERT INTO reconciliation_items (reconciliation_id, transaction_id) VALUES (?1, ?2)",
    )?;
    for id in &ids {
        insert.execute([session.id, *id])?;
    }
    conn.execute(
        "UPDATE reconciliations SET cleared_checks_count = ?1, cleared_checks_total = ?2, \
         cleared_deposits_count = ?3, cleared_deposits_total = ?4, difference = ?5 WHERE id = ?6",
        rusqlite::params![
            updated.cleared_checks_count,
            updated.cleared_checks_total,
            updated.cleared_deposits_count,
            updated.cleared_deposits_total,
            updated.difference,
            session.id,
        ],
    )?;
    Ok(updated)
}

pub struct Reconciler<'a> {
    conn: &'a Connection,
    audit: &'a dyn AuditSink,
}

impl<'a> Reconciler<'a> {
    pub fn new(conn: &'a Connection, audit: &'a dyn AuditSink) -> Self {
        Self { conn, audit }
    }

    /// Opens a session for one statement. The beginning balance is the
    /// ending balance of the latest completed session, or zero.
    pub fn start(
        &self,
        account_id: i64,
        statement_date: NaiveDate,
        statement_ending_balance: Money,
    ) -> Result<Worksheet> {
        let worksheet = unit_of_work(self.conn, "start_reconciliation", |tx| {
            let account = require_active(tx, account_id)?;
            if !account.account_type.is_statement_account() {
                return Err(LedgerError::NotStatementAccount(account_id));
            }
            let open: Option<i64> = tx
                .query_row(
                    "SELECT id FROM reconciliations WHERE account_id = ?1 AND status = ?2",
                    rusqlite::params![account_id, ReconciliationStatus::InProgress],
                    |r| r.get(0),
                )
                .optional()?;
            if open.is_some() {
                return Err(LedgerError::ReconciliationInProgress(account_id));
            }
            let beginning: Money = tx
                .query_row(
                    "SELECT statement_ending_balance FROM reconciliations \
                     WHERE account_id = ?1 AND status = ?2 \
                     ORDER BY statement_date DESC, completed_at DESC, id DESC LIMIT 1",
                    rusqlite::params![account_id, ReconciliationStatus::Completed],
                    |r| r.get(0),
                )
                .optional()?
                .unwrap_or(Money::ZERO);

            tx.execute(
                "INSERT INTO reconciliations (account_id, statement_date, statement_ending_balance, \
                 beginning_balance, difference, status) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                rusqlite::params![
                    account_id,
                    statement_date,
                    statement_ending_balance,
                    beginning,
                    statement_ending_balance - beginning,
                    ReconciliationStatus::InProgress,
                ],
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    LedgerError::ReconciliationInProgress(account_id)
                } else {
                    e.into()
                }
            })?;
            let session = load_session(tx, tx.last_insert_rowid())?;
            build_worksheet(tx, session)
        })
        .map_err(|e| {
            warn!(account_id, error = %e, "reconciliation not started");
            e
        })?;

        info!(
            session_id = worksheet.session.id,
            account_id,
            beginning = %worksheet.session.beginning_balance,
            ending = %statement_ending_balance,
            "reconciliation started"
        );
        emit(
            self.audit,
            AuditEntry::new("reconciliation.start", "reconciliation", worksheet.session.id).new_values(json!({
                "account_id": account_id,
                "statement_date": statement_date,
                "statement_ending_balance": statement_ending_balance.to_string(),
                "beginning_balance": worksheet.session.beginning_balance.to_string(),
            })),
        );
        Ok(worksheet)
    }

    /// Stores the cleared set and its totals. Transaction status is untouched,
    /// so this can be called as often as the selection changes.
    pub fn save(&self, session_id: i64, cleared_ids: &[i64]) -> Result<ReconciliationSession> {
        let session = unit_of_work(self.conn, "save_reconciliation", |tx| {
            let session = load_open_session(tx, session_id)?;
            recompute(tx, &session, cleared_ids)
        })?;
        emit(
            self.audit,
            AuditEntry::new("reconciliation.save", "reconciliation", session_id).new_values(json!({
                "cleared": cleared_ids.len(),
                "difference": session.difference.to_string(),
            })),
        );
        Ok(session)
    }

    /// Finalizes the session when the difference is within one cent. On
    /// success every cleared id is stamped `cleared` with the statement date.
    pub fn complete(&self, session_id: i64, cleared_ids: &[i64]) -> Result<ReconciliationSession> {
        let session = unit_of_work(self.conn, "complete_reconciliation", |tx| {
            let open = load_open_session(tx, session_id)?;
            let mut session = recompute(tx, &open, cleared_ids)?;
            if !session.difference.within_tolerance(Money::ZERO) {
                return Err(LedgerError::ReconciliationMismatch {
                    difference: session.difference,
                });
            }

            let mut stamp = tx.prepare(
                "UPDATE transactions SET status = ?1, cleared_date = ?2, reconciliation_id = ?3 WHERE id = ?4",
            )?;
            for id in load_cleared_ids(tx, session_id)? {
                stamp.execute(rusqlite::params![
                    TransactionStatus::Cleared,
                    session.statement_date,
                    session_id,
                    id
                ])?;
            }

            let completed_at = Utc::now();
            tx.execute(
                "UPDATE reconciliations SET status = ?1, difference = 0, completed_at = ?2 WHERE id = ?3",
                rusqlite::params![ReconciliationStatus::Completed, completed_at, session_id],
            )?;
            session.status = ReconciliationStatus::Completed;
            session.difference = Money::ZERO;
            session.completed_at = Some(completed_at);
            Ok(session)
        })
        .map_err(|e| {
            warn!(session_id, error = %e, "reconciliation not completed");
            e
        })?;

        info!(
            session_id,
            account_id = session.account_id,
            cleared = cleared_ids.len(),
            "reconciliation completed"
        );
        emit(
            self.audit,
            AuditEntry::new("reconciliation.complete", "reconciliation", session_id).new_values(json!({
                "cleared_ids": cleared_ids,
                "statement_ending_balance": session.statement_ending_balance.to_string(),
                "cleared_checks_total": session.cleared_checks_total.to_string(),
                "cleared_deposits_total": session.cleared_deposits_total.to_string(),
            })),
        );
        Ok(session)
    }

    /// Changes the statement details of an open session and refreshes the
    /// difference against the stored totals.
    pub fn update(
        &self,
        session_id: i64,
        statement_date: Option<NaiveDate>,
        statement_ending_balance: Option<Money>,
    ) -> Result<ReconciliationSession> {
        let (before, after) = unit_of_work(self.conn, "update_reconciliation", |tx| {
            let before = load_open_session(tx, session_id)?;
            let mut after = before.clone();
            if let Some(date) = statement_date {
                after.statement_date = date;
            }
            if let Some(balance) = statement_ending_balance {
                after.statement_ending_balance = balance;
            }
            after.difference = after.statement_ending_balance - after.cleared_balance();
            tx.execute(
                "UPDATE reconciliations SET statement_date = ?1, statement_ending_balance = ?2, \
                 difference = ?3 WHERE id = ?4",
                rusqlite::params![
                    after.statement_date,
                    after.statement_ending_balance,
                    after.difference,
                    session_id
                ],
            )?;
            Ok((before, after))
        })?;

        emit(
            self.audit,
            AuditEntry::new("reconciliation.update", "reconciliation", session_id)
                .old(json!({
                    "statement_date": before.statement_date,
                    "statement_ending_balance": before.statement_ending_balance.to_string(),
                }))
                .new_values(json!({
                    "statement_date": after.statement_date,
                    "statement_ending_balance": after.statement_ending_balance.to_string(),
                })),
        );
        Ok(after)
    }

    /// Discards an open session and its scratchpad.
    pub fn delete(&self, session_id: i64) -> Result<()> {
        let session = unit_of_work(self.conn, "delete_reconciliation", |tx| {
            let session = load_open_session(tx, session_id)?;
            tx.execute(
                "DELETE FROM reconciliation_items WHERE reconciliation_id = ?1",
                [session_id],
            )?;
            tx.execute("DELETE FROM reconciliations WHERE id = ?1", [session_id])?;
            Ok(session)
        })?;

        info!(session_id, account_id = session.account_id, "reconciliation discarded");
        emit(
            self.audit,
            AuditEntry::new("reconciliation.delete", "reconciliation", session_id).old(json!(session)),
        );
        Ok(())
    }

    pub fn worksheet(&self, session_id: i64) -> Result<Worksheet> {
        let session = load_session(self.conn, session_id)?;
        build_worksheet(self.conn, session)
    }

    pub fn get_session(&self, session_id: i64) -> Result<ReconciliationSession> {
        load_session(self.conn, session_id)
    }

    /// Sessions for one account, newest statement first.
    pub fn list_sessions(&self, account_id: i64) -> Result<Vec<ReconciliationSession>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {} FROM reconciliations WHERE account_id = ?1 ORDER BY statement_date DESC, id DESC",
            ReconciliationSession::COLUMNS
        ))?;
        let rows = stmt
            .query_map([account_id], ReconciliationSession::from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        Ok(rows)
    }
}
