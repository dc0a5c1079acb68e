//! Split transactions: one parent row carrying the full amount, one child per
//! allocation. Children behave like ordinary transactions everywhere else.

use chrono::NaiveDate;
use rusqlite::Connection;
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};

use crate::accounts::{adjust_client_balance, get_client, require_active, require_category};
use crate::audit::{emit, AuditEntry, AuditSink};
use crate::db::unit_of_work;
use crate::error::{LedgerError, Result};
use crate::models::{CategorizedBy, Transaction, TransactionStatus};
use crate::money::Money;
use crate::transactions::{load_transaction, open_session_holding};

#[derive(Debug, Clone)]
pub struct SplitLine {
    pub client_id: Option<i64>,
    pub category_id: Option<i64>,
    pub amount: Money,
    pub memo: Option<String>,
}

impl SplitLine {
    pub fn client(client_id: i64, amount: Money) -> Self {
        Self {
            client_id: Some(client_id),
            category_id: None,
            amount,
            memo: None,
        }
    }

    pub fn category(category_id: i64, amount: Money) -> Self {
        Self {
            client_id: None,
            category_id: Some(category_id),
            amount,
            memo: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewSplit {
    pub account_id: i64,
    pub date: NaiveDate,
    pub description: String,
    pub total_amount: Money,
    pub check_number: Option<String>,
    pub lines: Vec<SplitLine>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Split {
    pub parent: Transaction,
    pub children: Vec<Transaction>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SplitCreated {
    pub parent_id: i64,
    pub children: Vec<i64>,
}

/// Validates the allocation and returns line amounts that sum exactly to
/// `total`. A difference within tolerance is absorbed by the last line.
fn allocate(total: Money, lines: &[SplitLine]) -> Result<Vec<Money>> {
    if total.is_zero() {
        return Err(LedgerError::InvalidValue {
            field: "amount",
            value: total.to_string(),
        });
    }
    if lines.len() < 2 {
        return Err(LedgerError::TooFewSplitLines(lines.len()));
    }
    for (i, line) in lines.iter().enumerate() {
        if line.client_id.is_none() && line.category_id.is_none() {
            return Err(LedgerError::SplitLineMissingTarget { line: i + 1 });
        }
        if line.amount.is_zero() {
            return Err(LedgerError::SplitLineZeroAmount { line: i + 1 });
        }
    }
    let sum = Money::checked_sum(lines.iter().map(|l| l.amount)).ok_or_else(|| LedgerError::InvalidValue {
        field: "amount",
        value: "split lines total out of range".to_string(),
    })?;
    if !sum.within_tolerance(total) {
        return Err(LedgerError::SplitMismatch {
            total,
            lines: sum,
            difference: total - sum,
        });
    }
    let mut amounts: Vec<Money> = lines.iter().map(|l| l.amount).collect();
    if let Some(last) = amounts.last_mut() {
        *last += total - sum;
    }
    Ok(amounts)
}

/// Inserts one child per line under `parent` and applies each to its
/// client's running balance.
fn write_children(
    conn: &Connection,
    parent: &Transaction,
    lines: &[SplitLine],
    amounts: &[Money],
) -> Result<Vec<i64>> {
    let mut children = Vec::with_capacity(lines.len());
    for (line, amount) in lines.iter().zip(amounts) {
        if let Some(client_id) = line.client_id {
            get_client(conn, client_id)?;
        }
        if let Some(category_id) = line.category_id {
            require_category(conn, category_id)?;
        }
        let description = line.memo.clone().unwrap_or_else(|| parent.description.clone());
        conn.execute(
            "INSERT INTO transactions (account_id, client_id, category_id, date, amount, description, \
             memo, check_number, status, parent_transaction_id, categorized_by) \
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            rusqlite::params![
                parent.account_id,
                line.client_id,
                line.category_id,
                parent.date,
                amount,
                description,
                line.memo,
                parent.check_number,
                parent.status,
                parent.id,
                line.category_id.map(|_| CategorizedBy::Manual),
            ],
        )?;
        children.push(conn.last_insert_rowid());
        if let Some(client_id) = line.client_id {
            adjust_client_balance(conn, client_id, *amount)?;
        }
    }
    Ok(children)
}

/// Target fields a converted parent carried before it was split.
struct Presplit {
    client_id: Option<i64>,
    category_id: Option<i64>,
    categorized_by: Option<CategorizedBy>,
}

/// `None` when the parent was created as a split rather than converted.
fn load_presplit(conn: &Connection, parent_id: i64) -> Result<Option<Presplit>> {
    let (origin, client_id, category_id, categorized_by): (
        Option<String>,
        Option<i64>,
        Option<i64>,
        Option<CategorizedBy>,
    ) = conn.query_row(
        "SELECT split_origin, presplit_client_id, presplit_category_id, presplit_categorized_by \
         FROM transactions WHERE id = ?1",
        [parent_id],
        |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?)),
    )?;
    Ok((origin.as_deref() == Some("converted")).then_some(Presplit {
        client_id,
        category_id,
        categorized_by,
    }))
}

fn load_children(conn: &Connection, parent_id: i64) -> Result<Vec<Transaction>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM transactions WHERE parent_transaction_id = ?1 ORDER BY id",
        Transaction::COLUMNS
    ))?;
    let rows = stmt
        .query_map([parent_id], Transaction::from_row)?
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub struct Splitter<'a> {
    conn: &'a Connection,
    audit: &'a dyn AuditSink,
}

impl<'a> Splitter<'a> {
    pub fn new(conn: &'a Connection, audit: &'a dyn AuditSink) -> Self {
        Self { conn, audit }
    }

    /// Records a new transaction already divided across targets.
    pub fn create_split(&self, split: NewSplit) -> Result<SplitCreated> {
        let amounts = allocate(split.total_amount, &split.lines).map_err(|e| {
            warn!(error = %e, "split rejected");
            e
        })?;

        let created = unit_of_work(self.conn, "create_split", |tx| {
            require_active(tx, split.account_id)?;
            tx.execute(
                "INSERT INTO transactions (account_id, date, amount, description, check_number, status, \
                 is_split, split_origin) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, 'created')",
                rusqlite::params![
                    split.account_id,
                    split.date,
                    split.total_amount,
                    split.description,
                    split.check_number,
                    TransactionStatus::Pending,
                ],
            )?;
            let parent = load_transaction(tx, tx.last_insert_rowid())?;
            let children = write_children(tx, &parent, &split.lines, &amounts)?;
            Ok(SplitCreated {
                parent_id: parent.id,
                children,
            })
        })?;

        info!(
            parent_id = created.parent_id,
            children = created.children.len(),
            total = %split.total_amount,
            "split created"
        );
        emit(
            self.audit,
            AuditEntry::new("split.create", "transaction", created.parent_id).new_values(json!({
                "total": split.total_amount.to_string(),
                "children": created.children,
            })),
        );
        Ok(created)
    }

    /// Turns an existing plain transaction into a split parent. Its own
    /// client effect, if any, moves onto the children.
    pub fn split_transaction(&self, transaction_id: i64, lines: Vec<SplitLine>) -> Result<SplitCreated> {
        let created = unit_of_work(self.conn, "split_transaction", |tx| {
            let original = load_transaction(tx, transaction_id)?;
            if original.parent_transaction_id.is_some() || original.is_split {
                return Err(LedgerError::AlreadySplitChild(transaction_id));
            }
            match original.status {
                TransactionStatus::Cleared => return Err(LedgerError::TransactionLocked(transaction_id)),
                TransactionStatus::Void => {
                    return Err(LedgerError::InvalidStatusTransition {
                        id: transaction_id,
                        from: TransactionStatus::Void.as_str(),
                        to: "split",
                    })
                }
                TransactionStatus::Pending | TransactionStatus::Printed => {}
            }
            if let Some(session_id) = open_session_holding(tx, transaction_id)? {
                return Err(LedgerError::InOpenReconciliation {
                    transaction_id,
                    session_id,
                });
            }
            let amounts = allocate(original.amount, &lines)?;

            if let Some(client_id) = original.client_id {
                adjust_client_balance(tx, client_id, -original.amount)?;
            }
            tx.execute(
                "UPDATE transactions SET is_split = 1, split_origin = 'converted', \
                 presplit_client_id = client_id, presplit_category_id = category_id, \
                 presplit_categorized_by = categorized_by, \
                 client_id = NULL, category_id = NULL, categorized_by = NULL WHERE id = ?1",
                [transaction_id],
            )?;
            let children = write_children(tx, &original, &lines, &amounts)?;
            Ok(SplitCreated {
                parent_id: transaction_id,
                children,
            })
        })?;

        info!(parent_id = transaction_id, children = created.children.len(), "transaction split");
        emit(
            self.audit,
            AuditEntry::new("split.create", "transaction", transaction_id)
                .new_values(json!({"children": created.children})),
        );
        Ok(created)
    }

    pub fn get_split(&self, parent_id: i64) -> Result<Split> {
        let parent = load_transaction(self.conn, parent_id)?;
        if !parent.is_split {
            return Err(LedgerError::NotASplit(parent_id));
        }
        let children = load_children(self.conn, parent_id)?;
        debug!(parent_id, children = children.len(), "split loaded");
        Ok(Split { parent, children })
    }

    /// Reverses every child's balance effect and removes the children. A
    /// parent made by `create_split` is removed too; one converted by
    /// `split_transaction` goes back to the plain transaction it was.
    pub fn delete_split(&self, parent_id: i64) -> Result<()> {
        let removed = unit_of_work(self.conn, "delete_split", |tx| {
            let parent = load_transaction(tx, parent_id)?;
            if !parent.is_split {
                return Err(LedgerError::NotASplit(parent_id));
            }
            let children = load_children(tx, parent_id)?;
            for child in &children {
                if child.status == TransactionStatus::Cleared {
                    return Err(LedgerError::TransactionLocked(child.id));
                }
                if let Some(session_id) = open_session_holding(tx, child.id)? {
                    return Err(LedgerError::InOpenReconciliation {
                        transaction_id: child.id,
                        session_id,
                    });
                }
            }
            for child in &children {
                if let Some(client_id) = child.client_id {
                    adjust_client_balance(tx, client_id, -child.amount)?;
                }
            }
            tx.execute("DELETE FROM transactions WHERE parent_transaction_id = ?1", [parent_id])?;
            let presplit = load_presplit(tx, parent_id)?;
            let restored = presplit.is_some();
            match presplit {
                Some(original) => {
                    tx.execute(
                        "UPDATE transactions SET is_split = 0, split_origin = NULL, \
                         client_id = ?1, category_id = ?2, categorized_by = ?3, \
                         presplit_client_id = NULL, presplit_category_id = NULL, \
                         presplit_categorized_by = NULL WHERE id = ?4",
                        rusqlite::params![
                            original.client_id,
                            original.category_id,
                            original.categorized_by,
                            parent_id
                        ],
                    )?;
                    if let Some(client_id) = original.client_id {
                        adjust_client_balance(tx, client_id, parent.amount)?;
                    }
                }
                None => {
                    tx.execute("DELETE FROM transactions WHERE id = ?1", [parent_id])?;
                }
            }
            Ok((parent, children, restored))
        })?;

        let (parent, children, restored) = removed;
        info!(parent_id, children = children.len(), restored, "split deleted");
        emit(
            self.audit,
            AuditEntry::new("split.delete", "transaction", parent_id).old(json!({
                "total": parent.amount.to_string(),
                "restored_parent": restored,
                "children": children.iter().map(|c| json!({
                    "id": c.id,
                    "client_id": c.client_id,
                    "category_id": c.category_id,
                    "amount": c.amount.to_string(),
                })).collect::<Vec<_>>(),
            })),
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::{category_id_by_name, create_account, create_client};
    use crate::audit::test_support::MemoryAuditSink;
    use crate::db::test_support::test_db;
    use crate::models::AccountType;
    use crate::transactions::{NewTransaction, Register};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn usd(d: Decimal) -> Money {
        Money::from_decimal(d).unwrap()
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 5, 9).unwrap()
    }

    fn tx_count(conn: &Connection) -> i64 {
        conn.query_row("SELECT count(*) FROM transactions", [], |r| r.get(0)).unwrap()
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        conn: Connection,
        account: i64,
        a: i64,
        b: i64,
    }

    fn fixture() -> Fixture {
        let (dir, conn) = test_db();
        let audit = MemoryAuditSink::default();
        let account = create_account(&conn, &audit, "Trust", AccountType::Trust).unwrap();
        let a = create_client(&conn, &audit, "Client A").unwrap();
        let b = create_client(&conn, &audit, "Client B").unwrap();
        Fixture {
            _dir: dir,
            conn,
            account,
            a,
            b,
        }
    }

    fn split_of(f: &Fixture, total: Decimal, lines: Vec<SplitLine>) -> NewSplit {
        NewSplit {
            account_id: f.account,
            date: day(),
            description: "Deposit".to_string(),
            total_amount: usd(total),
            check_number: None,
            lines,
        }
    }

    #[test]
    fn test_create_and_delete_restores_balances() {
        let f = fixture();
        let audit = MemoryAuditSink::default();
        let splitter = Splitter::new(&f.conn, &audit);

        let created = splitter
            .create_split(split_of(
                &f,
                dec!(150.00),
                vec![
                    SplitLine::client(f.a, usd(dec!(100.00))),
                    SplitLine::client(f.b, usd(dec!(50.00))),
                ],
            ))
            .unwrap();
        assert_eq!(created.children.len(), 2);
        assert_eq!(get_client(&f.conn, f.a).unwrap().balance, usd(dec!(100.00)));
        assert_eq!(get_client(&f.conn, f.b).unwrap().balance, usd(dec!(50.00)));

        let split = splitter.get_split(created.parent_id).unwrap();
        assert!(split.parent.is_split);
        assert_eq!(split.parent.amount, usd(dec!(150.00)));
        let sum: Money = split.children.iter().map(|c| c.amount).sum();
        assert_eq!(sum, split.parent.amount);
        assert!(split
            .children
            .iter()
            .all(|c| c.parent_transaction_id == Some(created.parent_id)));

        splitter.delete_split(created.parent_id).unwrap();
        assert_eq!(get_client(&f.conn, f.a).unwrap().balance, Money::ZERO);
        assert_eq!(get_client(&f.conn, f.b).unwrap().balance, Money::ZERO);
        assert_eq!(tx_count(&f.conn), 0);
        assert_eq!(audit.actions(), vec!["split.create", "split.delete"]);
    }

    #[test]
    fn test_mismatched_lines_write_nothing() {
        let f = fixture();
        let audit = MemoryAuditSink::default();
        let splitter = Splitter::new(&f.conn, &audit);

        let err = splitter
            .create_split(split_of(
                &f,
                dec!(150.00),
                vec![
                    SplitLine::client(f.a, usd(dec!(100.00))),
                    SplitLine::client(f.b, usd(dec!(40.00))),
                ],
            ))
            .unwrap_err();
        match err {
            LedgerError::SplitMismatch { difference, .. } => assert_eq!(difference, usd(dec!(10.00))),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(tx_count(&f.conn), 0);
        assert_eq!(get_client(&f.conn, f.a).unwrap().balance, Money::ZERO);
    }

    #[test]
    fn test_overflowing_lines_rejected() {
        let f = fixture();
        let audit = MemoryAuditSink::default();
        let splitter = Splitter::new(&f.conn, &audit);

        let err = splitter
            .create_split(split_of(
                &f,
                dec!(1.00),
                vec![
                    SplitLine::client(f.a, Money::from_cents(i64::MAX)),
                    SplitLine::client(f.b, Money::from_cents(1)),
                ],
            ))
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidValue { field: "amount", .. }));
        assert_eq!(tx_count(&f.conn), 0);
    }

    #[test]
    fn test_cent_difference_absorbed_by_last_line() {
        let f = fixture();
        let audit = MemoryAuditSink::default();
        let splitter = Splitter::new(&f.conn, &audit);

        let created = splitter
            .create_split(split_of(
                &f,
                dec!(100.00),
                vec![
                    SplitLine::client(f.a, usd(dec!(33.33))),
                    SplitLine::client(f.b, usd(dec!(66.66))),
                ],
            ))
            .unwrap();
        let split = splitter.get_split(created.parent_id).unwrap();
        let sum: Money = split.children.iter().map(|c| c.amount).sum();
        assert_eq!(sum, usd(dec!(100.00)));
        assert_eq!(get_client(&f.conn, f.b).unwrap().balance, usd(dec!(66.67)));
    }

    #[test]
    fn test_line_validation() {
        let f = fixture();
        let audit = MemoryAuditSink::default();
        let splitter = Splitter::new(&f.conn, &audit);

        let one = split_of(&f, dec!(10), vec![SplitLine::client(f.a, usd(dec!(10)))]);
        assert!(matches!(splitter.create_split(one), Err(LedgerError::TooFewSplitLines(1))));

        let untargeted = SplitLine {
            client_id: None,
            category_id: None,
            amount: usd(dec!(5)),
            memo: None,
        };
        let missing = split_of(&f, dec!(10), vec![SplitLine::client(f.a, usd(dec!(5))), untargeted]);
        assert!(matches!(
            splitter.create_split(missing),
            Err(LedgerError::SplitLineMissingTarget { line: 2 })
        ));

        let zero = split_of(
            &f,
            dec!(10),
            vec![SplitLine::client(f.a, usd(dec!(10))), SplitLine::client(f.b, Money::ZERO)],
        );
        assert!(matches!(
            splitter.create_split(zero),
            Err(LedgerError::SplitLineZeroAmount { line: 2 })
        ));
    }

    #[test]
    fn test_unknown_client_rolls_back_parent() {
        let f = fixture();
        let audit = MemoryAuditSink::default();
        let splitter = Splitter::new(&f.conn, &audit);
        let err = splitter
            .create_split(split_of(
                &f,
                dec!(20),
                vec![SplitLine::client(f.a, usd(dec!(10))), SplitLine::client(999, usd(dec!(10)))],
            ))
            .unwrap_err();
        assert!(matches!(err, LedgerError::ClientNotFound(_)));
        assert_eq!(tx_count(&f.conn), 0);
        assert_eq!(get_client(&f.conn, f.a).unwrap().balance, Money::ZERO);
    }

    #[test]
    fn test_category_lines() {
        let f = fixture();
        let audit = MemoryAuditSink::default();
        let splitter = Splitter::new(&f.conn, &audit);
        let postage = category_id_by_name(&f.conn, "Postage & Courier").unwrap();
        let created = splitter
            .create_split(split_of(
                &f,
                dec!(-30),
                vec![SplitLine::client(f.a, usd(dec!(-20))), SplitLine::category(postage, usd(dec!(-10)))],
            ))
            .unwrap();
        let split = splitter.get_split(created.parent_id).unwrap();
        assert_eq!(split.children[1].category_id, Some(postage));
        assert_eq!(split.children[1].categorized_by, Some(CategorizedBy::Manual));
        assert_eq!(get_client(&f.conn, f.a).unwrap().balance, usd(dec!(-20)));
    }

    #[test]
    fn test_delete_requires_split_parent() {
        let f = fixture();
        let audit = MemoryAuditSink::default();
        let register = Register::new(&f.conn, &audit);
        let plain = register
            .create_transaction(NewTransaction::new(f.account, day(), usd(dec!(5)), "plain"))
            .unwrap();
        let splitter = Splitter::new(&f.conn, &audit);
        assert!(matches!(splitter.delete_split(plain), Err(LedgerError::NotASplit(_))));
        assert!(matches!(splitter.delete_split(404), Err(LedgerError::TransactionNotFound(404))));
        assert_eq!(tx_count(&f.conn), 1);
    }

    #[test]
    fn test_delete_refused_when_child_cleared() {
        let f = fixture();
        let audit = MemoryAuditSink::default();
        let splitter = Splitter::new(&f.conn, &audit);
        let created = splitter
            .create_split(split_of(
                &f,
                dec!(30),
                vec![SplitLine::client(f.a, usd(dec!(10))), SplitLine::client(f.b, usd(dec!(20)))],
            ))
            .unwrap();
        f.conn
            .execute("UPDATE transactions SET status = 'cleared' WHERE id = ?1", [created.children[0]])
            .unwrap();

        assert!(matches!(
            splitter.delete_split(created.parent_id),
            Err(LedgerError::TransactionLocked(_))
        ));
        assert_eq!(tx_count(&f.conn), 3);
        assert_eq!(get_client(&f.conn, f.b).unwrap().balance, usd(dec!(20)));
    }

    #[test]
    fn test_split_existing_transaction() {
        let f = fixture();
        let audit = MemoryAuditSink::default();
        let register = Register::new(&f.conn, &audit);
        let mut deposit = NewTransaction::new(f.account, day(), usd(dec!(90)), "Joint retainer");
        deposit.client_id = Some(f.a);
        let id = register.create_transaction(deposit).unwrap();
        assert_eq!(get_client(&f.conn, f.a).unwrap().balance, usd(dec!(90)));

        let splitter = Splitter::new(&f.conn, &audit);
        let created = splitter
            .split_transaction(
                id,
                vec![SplitLine::client(f.a, usd(dec!(60))), SplitLine::client(f.b, usd(dec!(30)))],
            )
            .unwrap();
        assert_eq!(created.parent_id, id);
        assert_eq!(get_client(&f.conn, f.a).unwrap().balance, usd(dec!(60)));
        assert_eq!(get_client(&f.conn, f.b).unwrap().balance, usd(dec!(30)));

        // no multi-level split trees
        let err = splitter
            .split_transaction(
                created.children[0],
                vec![SplitLine::client(f.a, usd(dec!(30))), SplitLine::client(f.b, usd(dec!(30)))],
            )
            .unwrap_err();
        assert!(matches!(err, LedgerError::AlreadySplitChild(_)));
    }

    #[test]
    fn test_delete_converted_split_restores_original() {
        let f = fixture();
        let audit = MemoryAuditSink::default();
        let register = Register::new(&f.conn, &audit);
        let retainer = category_id_by_name(&f.conn, "Retainers").unwrap();
        let mut deposit = NewTransaction::new(f.account, day(), usd(dec!(90)), "Joint retainer");
        deposit.client_id = Some(f.a);
        deposit.category_id = Some(retainer);
        let id = register.create_transaction(deposit).unwrap();
        let before = get_client(&f.conn, f.a).unwrap().balance;

        let splitter = Splitter::new(&f.conn, &audit);
        splitter
            .split_transaction(
                id,
                vec![SplitLine::client(f.a, usd(dec!(60))), SplitLine::client(f.b, usd(dec!(30)))],
            )
            .unwrap();
        splitter.delete_split(id).unwrap();

        assert_eq!(get_client(&f.conn, f.a).unwrap().balance, before);
        assert_eq!(get_client(&f.conn, f.b).unwrap().balance, Money::ZERO);
        assert_eq!(tx_count(&f.conn), 1);
        let original = register.get_transaction(id).unwrap();
        assert!(!original.is_split);
        assert_eq!(original.client_id, Some(f.a));
        assert_eq!(original.category_id, Some(retainer));
        assert_eq!(original.categorized_by, Some(CategorizedBy::Manual));
        assert_eq!(original.amount, usd(dec!(90)));

        // a restored transaction can be split again
        splitter
            .split_transaction(
                id,
                vec![SplitLine::client(f.a, usd(dec!(45))), SplitLine::client(f.b, usd(dec!(45)))],
            )
            .unwrap();
        assert_eq!(get_client(&f.conn, f.a).unwrap().balance, usd(dec!(45)));
    }
}
