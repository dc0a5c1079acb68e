//! Double-entry journal posting.
//!
//! A journal is a group of `journal_lines` rows sharing one opaque journal id.
//! Lines are written once, inside a single unit of work, and never updated;
//! corrections go through [`Ledger::create_reversal_entry`].

use chrono::{Local, NaiveDate};
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::accounts::require_active;
use crate::audit::{emit, AuditEntry, AuditSink};
use crate::db::unit_of_work;
use crate::error::{LedgerError, Result};
use crate::models::{AccountType, Journal, JournalLine, JournalType};
use crate::money::Money;

#[derive(Debug, Clone)]
pub struct NewLine {
    pub account_id: i64,
    pub debit: Money,
    pub credit: Money,
    pub memo: Option<String>,
}

impl NewLine {
    pub fn debit(account_id: i64, amount: Money) -> Self {
        Self {
            account_id,
            debit: amount,
            credit: Money::ZERO,
            memo: None,
        }
    }

    pub fn credit(account_id: i64, amount: Money) -> Self {
        Self {
            account_id,
            debit: Money::ZERO,
            credit: amount,
            memo: None,
        }
    }

    pub fn memo(mut self, memo: impl Into<String>) -> Self {
        self.memo = Some(memo.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct NewJournal {
    pub date: NaiveDate,
    pub journal_type: JournalType,
    pub description: String,
    pub lines: Vec<NewLine>,
    pub source_type: Option<String>,
    pub source_id: Option<i64>,
    pub reverses_journal_id: Option<String>,
}

impl NewJournal {
    pub fn new(date: NaiveDate, description: impl Into<String>, lines: Vec<NewLine>) -> Self {
        Self {
            date,
            journal_type: JournalType::Standard,
            description: description.into(),
            lines,
            source_type: None,
            source_id: None,
            reverses_journal_id: None,
        }
    }

    pub fn source(mut self, source_type: impl Into<String>, source_id: i64) -> Self {
        self.source_type = Some(source_type.into());
        self.source_id = Some(source_id);
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct AccountBalance {
    pub debit_total: Money,
    pub credit_total: Money,
    /// debit_total - credit_total; positive is a net debit balance.
    pub balance: Money,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrialBalanceRow {
    pub account_id: i64,
    pub name: String,
    pub account_type: AccountType,
    pub debit_total: Money,
    pub credit_total: Money,
}

#[derive(Debug, Clone, Serialize)]
pub struct TrialBalance {
    pub rows: Vec<TrialBalanceRow>,
    pub total_debit: Money,
    pub total_credit: Money,
    pub is_balanced: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UnbalancedJournal {
    pub journal_id: String,
    pub debit: Money,
    pub credit: Money,
}

/// Checks line shape and the debit == credit invariant. Returns the total.
fn validate_lines(lines: &[NewLine]) -> Result<Money> {
    if lines.len() < 2 {
        return Err(LedgerError::TooFewLines(lines.len()));
    }
    for (i, line) in lines.iter().enumerate() {
        let n = i + 1;
        if line.debit.is_negative() || line.credit.is_negative() {
            return Err(LedgerError::NegativeLineAmount { line: n });
        }
        if !line.debit.is_zero() && !line.credit.is_zero() {
            return Err(LedgerError::DegenerateLine { line: n });
        }
        if line.debit.is_zero() && line.credit.is_zero() {
            return Err(LedgerError::EmptyLine { line: n });
        }
    }
    let debit = Money::checked_sum(lines.iter().map(|l| l.debit)).ok_or_else(|| amount_overflow("debit"))?;
    let credit = Money::checked_sum(lines.iter().map(|l| l.credit)).ok_or_else(|| amount_overflow("credit"))?;
    // Exact cents, no tolerance.
    if debit != credit {
        return Err(LedgerError::UnbalancedEntry { debit, credit });
    }
    Ok(debit)
}

fn amount_overflow(side: &str) -> LedgerError {
    LedgerError::InvalidValue {
        field: "amount",
        value: format!("{side} total out of range"),
    }
}

/// Writes every line of an already validated journal. Must run inside the
/// caller's unit of work.
fn write_journal(conn: &Connection, journal: &NewJournal) -> Result<String> {
    for line in &journal.lines {
        require_active(conn, line.account_id)?;
    }
    let journal_id = Uuid::new_v4().to_string();
    let mut stmt = conn.prepare(
        "INSERT INTO journal_lines (journal_id, line_number, journal_date, journal_type, description, \
         account_id, debit, credit, memo, source_type, source_id, reverses_journal_id) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
    )?;
    for (i, line) in journal.lines.iter().enumerate() {
        stmt.execute(rusqlite::params![
            journal_id,
            (i + 1) as i64,
            journal.date,
            journal.journal_type,
            journal.description,
            line.account_id,
            line.debit,
            line.credit,
            line.memo,
            journal.source_type,
            journal.source_id,
            journal.reverses_journal_id,
        ])?;
    }
    Ok(journal_id)
}

pub(crate) fn load_journal(conn: &Connection, journal_id: &str) -> Result<Option<Journal>> {
    let mut stmt = conn.prepare(
        "SELECT line_number, account_id, debit, credit, memo, journal_date, journal_type, \
         description, source_type, source_id, reverses_journal_id \
         FROM journal_lines WHERE journal_id = ?1 ORDER BY line_number",
    )?;
    let mut rows = stmt.query([journal_id])?;
    let mut journal: Option<Journal> = None;
    while let Some(row) = rows.next()? {
        let line = JournalLine {
            line_number: row.get(0)?,
            account_id: row.get(1)?,
            debit: row.get(2)?,
            credit: row.get(3)?,
            memo: row.get(4)?,
        };
        match journal.as_mut() {
            Some(j) => j.lines.push(line),
            None => {
                journal = Some(Journal {
                    journal_id: journal_id.to_string(),
                    date: row.get(5)?,
                    journal_type: row.get(6)?,
                    description: row.get(7)?,
                    source_type: row.get(8)?,
                    source_id: row.get(9)?,
                    reverses_journal_id: row.get(10)?,
                    lines: vec![line],
                })
            }
        }
    }
    Ok(journal)
}

fn reversal_of(conn: &Connection, journal_id: &str) -> Result<Option<String>> {
    Ok(conn
        .query_row(
            "SELECT journal_id FROM journal_lines WHERE reverses_journal_id = ?1 LIMIT 1",
            [journal_id],
            |r| r.get(0),
        )
        .optional()?)
}

/// Sums journal lines for one account up to and including `as_of`.
pub(crate) fn balance_of(
    conn: &Connection,
    account_id: i64,
    as_of: Option<NaiveDate>,
) -> Result<AccountBalance> {
    let (debit_total, credit_total): (Money, Money) = conn.query_row(
        "SELECT COALESCE(SUM(debit), 0), COALESCE(SUM(credit), 0) FROM journal_lines \
         WHERE account_id = ?1 AND (?2 IS NULL OR journal_date <= ?2)",
        rusqlite::params![account_id, as_of],
        |r| Ok((r.get(0)?, r.get(1)?)),
    )?;
    Ok(AccountBalance {
        debit_total,
        credit_total,
        balance: debit_total - credit_total,
    })
}

pub struct Ledger<'a> {
    conn: &'a Connection,
    audit: &'a dyn AuditSink,
}

impl<'a> Ledger<'a> {
    pub fn new(conn: &'a Connection, audit: &'a dyn AuditSink) -> Self {
        Self { conn, audit }
    }

    /// Validates and posts a journal atomically. Nothing is written unless
    /// the whole journal balances and every account is active.
    pub fn create_journal_entry(&self, journal: NewJournal) -> Result<String> {
        let total = validate_lines(&journal.lines).map_err(|e| {
            warn!(error = %e, "journal rejected");
            e
        })?;
        let journal_id = unit_of_work(self.conn, "create_journal_entry", |tx| write_journal(tx, &journal))?;
        info!(
            journal_id = %journal_id,
            lines = journal.lines.len(),
            total = %total,
            "journal posted"
        );
        emit(
            self.audit,
            AuditEntry::new("journal.create", "journal", &journal_id).new_values(json!({
                "journal_type": journal.journal_type,
                "lines": journal.lines.len(),
                "total": total.to_string(),
                "reverses_journal_id": journal.reverses_journal_id,
            })),
        );
        Ok(journal_id)
    }

    /// Canonical two-line journal: `amount` debited to one account and
    /// credited to another.
    pub fn create_simple_entry(
        &self,
        debit_account: i64,
        credit_account: i64,
        amount: Money,
        date: NaiveDate,
        description: &str,
        source: Option<(&str, i64)>,
    ) -> Result<String> {
        if !amount.is_positive() {
            return Err(LedgerError::NonPositiveAmount);
        }
        let mut journal = NewJournal::new(
            date,
            description,
            vec![
                NewLine::debit(debit_account, amount),
                NewLine::credit(credit_account, amount),
            ],
        );
        if let Some((source_type, source_id)) = source {
            journal = journal.source(source_type, source_id);
        }
        self.create_journal_entry(journal)
    }

    pub fn record_expense(
        &self,
        expense_account: i64,
        payment_account: i64,
        amount: Money,
        date: NaiveDate,
        description: &str,
    ) -> Result<String> {
        self.create_simple_entry(expense_account, payment_account, amount, date, description, None)
    }

    pub fn record_income(
        &self,
        bank_account: i64,
        income_account: i64,
        amount: Money,
        date: NaiveDate,
        description: &str,
    ) -> Result<String> {
        self.create_simple_entry(bank_account, income_account, amount, date, description, None)
    }

    pub fn record_transfer(
        &self,
        from_account: i64,
        to_account: i64,
        amount: Money,
        date: NaiveDate,
        description: &str,
    ) -> Result<String> {
        self.create_simple_entry(to_account, from_account, amount, date, description, None)
    }

    /// Posts a journal dated today whose lines are the original's with debit
    /// and credit swapped. A journal can be reversed once.
    pub fn create_reversal_entry(&self, journal_id: &str, reason: &str) -> Result<String> {
        let (reversal_id, lines) = unit_of_work(self.conn, "create_reversal_entry", |tx| {
            let original = load_journal(tx, journal_id)?
                .ok_or_else(|| LedgerError::JournalNotFound(journal_id.to_string()))?;
            if reversal_of(tx, journal_id)?.is_some() {
                return Err(LedgerError::AlreadyReversed(journal_id.to_string()));
            }
            let lines: Vec<NewLine> = original
                .lines
                .iter()
                .map(|l| NewLine {
                    account_id: l.account_id,
                    debit: l.credit,
                    credit: l.debit,
                    memo: l.memo.clone(),
                })
                .collect();
            let reversal = NewJournal {
                date: Local::now().date_naive(),
                journal_type: JournalType::Reversal,
                description: format!("Reversal of {}: {}", original.description, reason),
                lines,
                source_type: original.source_type.clone(),
                source_id: original.source_id,
                reverses_journal_id: Some(journal_id.to_string()),
            };
            validate_lines(&reversal.lines)?;
            let id = write_journal(tx, &reversal)?;
            Ok((id, reversal.lines.len()))
        })
        .map_err(|e| {
            warn!(journal_id, error = %e, "reversal rejected");
            e
        })?;

        info!(journal_id, reversal_id = %reversal_id, lines, "journal reversed");
        emit(
            self.audit,
            AuditEntry::new("journal.reverse", "journal", journal_id)
                .new_values(json!({"reversal_journal_id": reversal_id}))
                .reason(reason),
        );
        Ok(reversal_id)
    }

    pub fn get_journal(&self, journal_id: &str) -> Result<Journal> {
        load_journal(self.conn, journal_id)?
            .ok_or_else(|| LedgerError::JournalNotFound(journal_id.to_string()))
    }

    pub fn is_reversed(&self, journal_id: &str) -> Result<bool> {
        Ok(reversal_of(self.conn, journal_id)?.is_some())
    }

    /// Most recently posted journals first.
    pub fn list_journals(&self, limit: usize) -> Result<Vec<Journal>> {
        let mut stmt = self.conn.prepare(
            "SELECT journal_id FROM journal_lines GROUP BY journal_id ORDER BY MAX(id) DESC LIMIT ?1",
        )?;
        let ids = stmt
            .query_map([limit as i64], |r| r.get::<_, String>(0))?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let mut journals = Vec::with_capacity(ids.len());
        for id in ids {
            journals.push(self.get_journal(&id)?);
        }
        Ok(journals)
    }

    pub fn get_account_balance(&self, account_id: i64, as_of: Option<NaiveDate>) -> Result<AccountBalance> {
        let balance = balance_of(self.conn, account_id, as_of)?;
        debug!(account_id, balance = %balance.balance, "account balance");
        Ok(balance)
    }

    /// Per-account totals for every account with activity, inactive ones
    /// included.
    pub fn get_trial_balance(&self, as_of: Option<NaiveDate>) -> Result<TrialBalance> {
        let mut stmt = self.conn.prepare(
            "SELECT a.id, a.name, a.account_type, SUM(jl.debit), SUM(jl.credit) \
             FROM journal_lines jl JOIN accounts a ON a.id = jl.account_id \
             WHERE ?1 IS NULL OR jl.journal_date <= ?1 \
             GROUP BY a.id \
             HAVING SUM(jl.debit) != 0 OR SUM(jl.credit) != 0 \
             ORDER BY a.name",
        )?;
        let rows = stmt
            .query_map([as_of], |r| {
                Ok(TrialBalanceRow {
                    account_id: r.get(0)?,
                    name: r.get(1)?,
                    account_type: r.get(2)?,
                    debit_total: r.get(3)?,
                    credit_total: r.get(4)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let total_debit: Money = rows.iter().map(|r| r.debit_total).sum();
        let total_credit: Money = rows.iter().map(|r| r.credit_total).sum();
        let is_balanced = total_debit == total_credit;
        if is_balanced {
            debug!(total = %total_debit, accounts = rows.len(), "trial balance");
        } else {
            warn!(debit = %total_debit, credit = %total_credit, "trial balance is out of balance");
        }
        Ok(TrialBalance {
            rows,
            total_debit,
            total_credit,
            is_balanced,
        })
    }

    /// Every journal whose lines do not balance. Empty on a healthy ledger.
    pub fn verify_ledger_integrity(&self) -> Result<Vec<UnbalancedJournal>> {
        let mut stmt = self.conn.prepare(
            "SELECT journal_id, SUM(debit), SUM(credit) FROM journal_lines \
             GROUP BY journal_id HAVING SUM(debit) != SUM(credit)",
        )?;
        let bad = stmt
            .query_map([], |r| {
                Ok(UnbalancedJournal {
                    journal_id: r.get(0)?,
                    debit: r.get(1)?,
                    credit: r.get(2)?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;
        if !bad.is_empty() {
            warn!(count = bad.len(), "unbalanced journals found");
        }
        Ok(bad)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::accounts::{create_account, deactivate_account};
    use crate::audit::test_support::{BrokenAuditSink, MemoryAuditSink};
    use crate::db::test_support::test_db;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn usd(d: Decimal) -> Money {
        Money::from_decimal(d).unwrap()
    }

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 1).unwrap()
    }

    fn line_count(conn: &Connection) -> i64 {
        conn.query_row("SELECT count(*) FROM journal_lines", [], |r| r.get(0)).unwrap()
    }

    fn setup(conn: &Connection) -> (i64, i64) {
        let audit = MemoryAuditSink::default();
        let office = create_account(conn, &audit, "Expense:Office", AccountType::Expense).unwrap();
        let bank = create_account(conn, &audit, "Bank", AccountType::Asset).unwrap();
        (office, bank)
    }

    #[test]
    fn test_post_balanced_journal() {
        let (_dir, conn) = test_db();
        let (office, bank) = setup(&conn);
        let audit = MemoryAuditSink::default();
        let ledger = Ledger::new(&conn, &audit);

        let id = ledger
            .record_expense(office, bank, usd(dec!(100.00)), day(), "Paper")
            .unwrap();

        assert_eq!(ledger.get_account_balance(bank, None).unwrap().balance, usd(dec!(-100.00)));
        assert_eq!(ledger.get_account_balance(office, None).unwrap().balance, usd(dec!(100.00)));
        let journal = ledger.get_journal(&id).unwrap();
        assert_eq!(journal.lines.len(), 2);
        assert_eq!(journal.total_debit(), journal.total_credit());
        assert_eq!(audit.actions(), vec!["journal.create"]);
    }

    #[test]
    fn test_unbalanced_journal_writes_nothing() {
        let (_dir, conn) = test_db();
        let (a, b) = setup(&conn);
        let audit = MemoryAuditSink::default();
        let ledger = Ledger::new(&conn, &audit);

        let err = ledger
            .create_journal_entry(NewJournal::new(
                day(),
                "Off by a cent",
                vec![
                    NewLine::debit(a, usd(dec!(100.00))),
                    NewLine::credit(b, usd(dec!(99.99))),
                ],
            ))
            .unwrap_err();

        match err {
            LedgerError::UnbalancedEntry { debit, credit } => {
                assert_eq!(debit, usd(dec!(100.00)));
                assert_eq!(credit, usd(dec!(99.99)));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(line_count(&conn), 0);
        assert!(audit.actions().is_empty());
    }

    #[test]
    fn test_line_shape_rules() {
        let (_dir, conn) = test_db();
        let (a, b) = setup(&conn);
        let audit = MemoryAuditSink::default();
        let ledger = Ledger::new(&conn, &audit);

        let one_line = NewJournal::new(day(), "x", vec![NewLine::debit(a, Money::from_cents(5))]);
        assert!(matches!(ledger.create_journal_entry(one_line), Err(LedgerError::TooFewLines(1))));

        let both = NewJournal::new(
            day(),
            "x",
            vec![
                NewLine { account_id: a, debit: Money::from_cents(5), credit: Money::from_cents(5), memo: None },
                NewLine::credit(b, Money::ZERO),
            ],
        );
        assert!(matches!(
            ledger.create_journal_entry(both),
            Err(LedgerError::DegenerateLine { line: 1 })
        ));

        let empty = NewJournal::new(
            day(),
            "x",
            vec![NewLine::debit(a, Money::from_cents(5)), NewLine::credit(b, Money::ZERO)],
        );
        assert!(matches!(
            ledger.create_journal_entry(empty),
            Err(LedgerError::EmptyLine { line: 2 })
        ));
        assert_eq!(line_count(&conn), 0);
    }

    #[test]
    fn test_overflowing_totals_rejected() {
        let (_dir, conn) = test_db();
        let (a, b) = setup(&conn);
        let audit = MemoryAuditSink::default();
        let ledger = Ledger::new(&conn, &audit);

        let huge = NewJournal::new(
            day(),
            "x",
            vec![
                NewLine::debit(a, Money::from_cents(i64::MAX)),
                NewLine::debit(a, Money::from_cents(1)),
                NewLine::credit(b, Money::from_cents(i64::MAX)),
            ],
        );
        assert!(matches!(
            ledger.create_journal_entry(huge),
            Err(LedgerError::InvalidValue { field: "amount", .. })
        ));
        assert_eq!(line_count(&conn), 0);
    }

    #[test]
    fn test_inactive_account_rolls_back_whole_journal() {
        let (_dir, conn) = test_db();
        let (a, b) = setup(&conn);
        let audit = MemoryAuditSink::default();
        deactivate_account(&conn, &audit, b).unwrap();
        let ledger = Ledger::new(&conn, &audit);

        let err = ledger
            .create_simple_entry(a, b, Money::from_cents(500), day(), "x", None)
            .unwrap_err();
        assert!(matches!(err, LedgerError::AccountInactive(id) if id == b));
        assert_eq!(line_count(&conn), 0);
    }

    #[test]
    fn test_reversal_swaps_lines_and_restores_balances() {
        let (_dir, conn) = test_db();
        let (office, bank) = setup(&conn);
        let audit = MemoryAuditSink::default();
        let ledger = Ledger::new(&conn, &audit);

        let before_bank = ledger.get_account_balance(bank, None).unwrap();
        let before_office = ledger.get_account_balance(office, None).unwrap();
        let id = ledger
            .record_expense(office, bank, usd(dec!(42.50)), day(), "Toner")
            .unwrap();
        let rev = ledger.create_reversal_entry(&id, "entered twice").unwrap();

        let original = ledger.get_journal(&id).unwrap();
        let reversal = ledger.get_journal(&rev).unwrap();
        assert_eq!(reversal.journal_type, JournalType::Reversal);
        assert_eq!(reversal.reverses_journal_id.as_deref(), Some(id.as_str()));
        assert!(reversal.description.starts_with("Reversal of"));
        for (o, r) in original.lines.iter().zip(&reversal.lines) {
            assert_eq!(o.account_id, r.account_id);
            assert_eq!(o.debit, r.credit);
            assert_eq!(o.credit, r.debit);
        }
        assert_eq!(
            ledger.get_account_balance(bank, None).unwrap().balance,
            before_bank.balance
        );
        assert_eq!(
            ledger.get_account_balance(office, None).unwrap().balance,
            before_office.balance
        );
        assert!(ledger.is_reversed(&id).unwrap());
        assert!(!ledger.is_reversed(&rev).unwrap());
    }

    #[test]
    fn test_second_reversal_is_a_conflict() {
        let (_dir, conn) = test_db();
        let (office, bank) = setup(&conn);
        let audit = MemoryAuditSink::default();
        let ledger = Ledger::new(&conn, &audit);

        let id = ledger
            .record_expense(office, bank, Money::from_cents(1_000), day(), "x")
            .unwrap();
        ledger.create_reversal_entry(&id, "first").unwrap();
        let lines = line_count(&conn);

        let err = ledger.create_reversal_entry(&id, "second").unwrap_err();
        assert!(matches!(err, LedgerError::AlreadyReversed(_)));
        assert_eq!(line_count(&conn), lines);
    }

    #[test]
    fn test_reverse_unknown_journal() {
        let (_dir, conn) = test_db();
        let audit = MemoryAuditSink::default();
        let ledger = Ledger::new(&conn, &audit);
        let err = ledger.create_reversal_entry("missing", "x").unwrap_err();
        assert!(matches!(err, LedgerError::JournalNotFound(_)));
    }

    #[test]
    fn test_balance_as_of_date() {
        let (_dir, conn) = test_db();
        let (office, bank) = setup(&conn);
        let audit = MemoryAuditSink::default();
        let ledger = Ledger::new(&conn, &audit);

        let jan = NaiveDate::from_ymd_opt(2025, 1, 10).unwrap();
        let feb = NaiveDate::from_ymd_opt(2025, 2, 10).unwrap();
        ledger.record_expense(office, bank, Money::from_cents(100), jan, "a").unwrap();
        ledger.record_expense(office, bank, Money::from_cents(250), feb, "b").unwrap();

        let as_of_jan = ledger.get_account_balance(office, Some(jan)).unwrap();
        assert_eq!(as_of_jan.debit_total, Money::from_cents(100));
        let all = ledger.get_account_balance(office, None).unwrap();
        assert_eq!(all.balance, Money::from_cents(350));
    }

    #[test]
    fn test_trial_balance_and_integrity() {
        let (_dir, conn) = test_db();
        let (office, bank) = setup(&conn);
        let audit = MemoryAuditSink::default();
        let income = create_account(&conn, &audit, "Fees", AccountType::Income).unwrap();
        create_account(&conn, &audit, "Idle", AccountType::Asset).unwrap();
        let ledger = Ledger::new(&conn, &audit);

        ledger.record_income(bank, income, usd(dec!(1500.00)), day(), "Fee").unwrap();
        ledger.record_expense(office, bank, usd(dec!(99.95)), day(), "Supplies").unwrap();

        let tb = ledger.get_trial_balance(None).unwrap();
        assert!(tb.is_balanced);
        assert_eq!(tb.rows.len(), 3, "accounts without activity are left out");
        assert_eq!(tb.total_debit, usd(dec!(1599.95)));
        assert!(ledger.verify_ledger_integrity().unwrap().is_empty());
    }

    #[test]
    fn test_integrity_flags_unbalanced_rows() {
        let (_dir, conn) = test_db();
        let (office, _bank) = setup(&conn);
        conn.execute(
            "INSERT INTO journal_lines (journal_id, line_number, journal_date, journal_type, description, account_id, debit) \
             VALUES ('bad', 1, '2025-01-01', 'standard', 'raw insert', ?1, 700)",
            [office],
        )
        .unwrap();
        let audit = MemoryAuditSink::default();
        let ledger = Ledger::new(&conn, &audit);

        let bad = ledger.verify_ledger_integrity().unwrap();
        assert_eq!(bad.len(), 1);
        assert_eq!(bad[0].journal_id, "bad");
        assert!(!ledger.get_trial_balance(None).unwrap().is_balanced);
    }

    #[test]
    fn test_transfer_and_list_journals() {
        let (_dir, conn) = test_db();
        let audit = MemoryAuditSink::default();
        let trust = create_account(&conn, &audit, "Trust", AccountType::Trust).unwrap();
        let operating = create_account(&conn, &audit, "Operating", AccountType::Checking).unwrap();
        let ledger = Ledger::new(&conn, &audit);

        ledger.record_transfer(trust, operating, usd(dec!(250)), day(), "Earned fee").unwrap();
        let second = ledger.record_transfer(operating, trust, usd(dec!(10)), day(), "Refund").unwrap();

        assert_eq!(ledger.get_account_balance(operating, None).unwrap().balance, usd(dec!(240)));
        let recent = ledger.list_journals(1).unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].journal_id, second);
    }

    #[test]
    fn test_non_positive_simple_entry() {
        let (_dir, conn) = test_db();
        let (a, b) = setup(&conn);
        let audit = MemoryAuditSink::default();
        let ledger = Ledger::new(&conn, &audit);
        assert!(matches!(
            ledger.create_simple_entry(a, b, Money::ZERO, day(), "x", None),
            Err(LedgerError::NonPositiveAmount)
        ));
    }

    #[test]
    fn test_broken_audit_sink_does_not_block_posting() {
        let (_dir, conn) = test_db();
        let (a, b) = setup(&conn);
        let ledger = Ledger::new(&conn, &BrokenAuditSink);
        ledger.create_simple_entry(a, b, Money::from_cents(100), day(), "x", None).unwrap();
        assert_eq!(line_count(&conn), 2);
    }
}
