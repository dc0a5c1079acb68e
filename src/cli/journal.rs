use std::collections::HashMap;

use anyhow::bail;
use chrono::NaiveDate;
use colored::Colorize;
use comfy_table::{Cell, Table};
use rusqlite::Connection;

use super::{account_id, parse_allocation, today, Books};
use crate::accounts::{list_accounts, resolve_account};
use crate::fmt::{money, money_or_blank};
use crate::ledger::{Ledger, NewJournal, NewLine};
use crate::models::{Journal, JournalType};
use crate::money::Money;

fn account_names(conn: &Connection) -> anyhow::Result<HashMap<i64, String>> {
    Ok(list_accounts(conn, true)?
        .into_iter()
        .map(|a| (a.id, a.name))
        .collect())
}

pub fn post(
    description: &str,
    date: Option<NaiveDate>,
    debits: &[String],
    credits: &[String],
    journal_type: &str,
) -> anyhow::Result<()> {
    let books = Books::open()?;
    let journal_type: JournalType = journal_type.parse()?;
    if journal_type == JournalType::Reversal {
        bail!("use `iolta journal reverse` to post a reversal");
    }

    let mut lines = Vec::with_capacity(debits.len() + credits.len());
    for raw in debits {
        let (name, amount) = parse_allocation(raw)?;
        lines.push(NewLine::debit(account_id(&books.conn, &name)?, amount));
    }
    for raw in credits {
        let (name, amount) = parse_allocation(raw)?;
        lines.push(NewLine::credit(account_id(&books.conn, &name)?, amount));
    }

    let mut journal = NewJournal::new(date.unwrap_or_else(today), description, lines);
    journal.journal_type = journal_type;
    let journal_id = Ledger::new(&books.conn, &books.audit).create_journal_entry(journal)?;
    println!("Posted journal {journal_id}");
    Ok(())
}

pub enum SimpleKind {
    Expense,
    Income,
    Transfer,
}

/// `first`/`second` are (expense, paid-from), (bank, income source) or (from, to).
pub fn simple(
    kind: SimpleKind,
    amount: Money,
    first: &str,
    second: &str,
    description: &str,
    date: Option<NaiveDate>,
) -> anyhow::Result<()> {
    let books = Books::open()?;
    let ledger = Ledger::new(&books.conn, &books.audit);
    let first = account_id(&books.conn, first)?;
    let second = account_id(&books.conn, second)?;
    let date = date.unwrap_or_else(today);
    let journal_id = match kind {
        SimpleKind::Expense => ledger.record_expense(first, second, amount, date, description)?,
        SimpleKind::Income => ledger.record_income(first, second, amount, date, description)?,
        SimpleKind::Transfer => ledger.record_transfer(first, second, amount, date, description)?,
    };
    println!("Posted journal {journal_id} for {}", money(amount));
    Ok(())
}

pub fn reverse(journal_id: &str, reason: &str) -> anyhow::Result<()> {
    let books = Books::open()?;
    let reversal = Ledger::new(&books.conn, &books.audit).create_reversal_entry(journal_id, reason)?;
    println!("Reversed {journal_id} with journal {reversal}");
    Ok(())
}

fn print_journal(journal: &Journal, names: &HashMap<i64, String>) {
    println!("Journal {}", journal.journal_id);
    println!("Date:         {}", journal.date);
    println!("Type:         {}", journal.journal_type);
    println!("Description:  {}", journal.description);
    if let Some(reverses) = &journal.reverses_journal_id {
        println!("Reverses:     {reverses}");
    }
    if let (Some(source_type), Some(source_id)) = (&journal.source_type, journal.source_id) {
        println!("Source:       {source_type} {source_id}");
    }

    let mut table = Table::new();
    table.set_header(vec!["#", "Account", "Debit", "Credit", "Memo"]);
    for line in &journal.lines {
        table.add_row(vec![
            Cell::new(line.line_number),
            Cell::new(names.get(&line.account_id).cloned().unwrap_or_else(|| line.account_id.to_string())),
            Cell::new(money_or_blank(line.debit)),
            Cell::new(money_or_blank(line.credit)),
            Cell::new(line.memo.as_deref().unwrap_or_default()),
        ]);
    }
    table.add_row(vec![
        Cell::new(""),
        Cell::new("Total"),
        Cell::new(money(journal.total_debit())),
        Cell::new(money(journal.total_credit())),
        Cell::new(""),
    ]);
    println!("{table}");
}

pub fn show(journal_id: &str) -> anyhow::Result<()> {
    let books = Books::open()?;
    let ledger = Ledger::new(&books.conn, &books.audit);
    let journal = ledger.get_journal(journal_id)?;
    print_journal(&journal, &account_names(&books.conn)?);
    if ledger.is_reversed(journal_id)? {
        println!("{}", "This journal has been reversed.".yellow());
    }
    Ok(())
}

pub fn list(limit: usize) -> anyhow::Result<()> {
    let books = Books::open()?;
    let journals = Ledger::new(&books.conn, &books.audit).list_journals(limit)?;

    let mut table = Table::new();
    table.set_header(vec!["Journal", "Date", "Type", "Description", "Amount"]);
    for journal in journals {
        table.add_row(vec![
            Cell::new(&journal.journal_id),
            Cell::new(journal.date),
            Cell::new(journal.journal_type),
            Cell::new(&journal.description),
            Cell::new(money(journal.total_debit())),
        ]);
    }
    println!("Journals\n{table}");
    Ok(())
}

pub fn balance(key: &str, as_of: Option<NaiveDate>) -> anyhow::Result<()> {
    let books = Books::open()?;
    let account = resolve_account(&books.conn, key)?;
    let balance = Ledger::new(&books.conn, &books.audit).get_account_balance(account.id, as_of)?;
    println!("{} ({})", account.name, account.account_type);
    println!("Debits:   {}", money(balance.debit_total));
    println!("Credits:  {}", money(balance.credit_total));
    println!("Balance:  {}", money(balance.balance));
    Ok(())
}

pub fn trial_balance(as_of: Option<NaiveDate>) -> anyhow::Result<()> {
    let books = Books::open()?;
    let trial = Ledger::new(&books.conn, &books.audit).get_trial_balance(as_of)?;

    let mut table = Table::new();
    table.set_header(vec!["Account", "Type", "Debit", "Credit"]);
    for row in &trial.rows {
        table.add_row(vec![
            Cell::new(&row.name),
            Cell::new(row.account_type),
            Cell::new(money_or_blank(row.debit_total)),
            Cell::new(money_or_blank(row.credit_total)),
        ]);
    }
    table.add_row(vec![
        Cell::new("TOTAL"),
        Cell::new(""),
        Cell::new(money(trial.total_debit)),
        Cell::new(money(trial.total_credit)),
    ]);
    println!("Trial Balance\n{table}");
    if trial.is_balanced {
        println!("{}", "Balanced".green());
    } else {
        println!("{}", "OUT OF BALANCE".red().bold());
    }
    Ok(())
}

pub fn verify() -> anyhow::Result<()> {
    let books = Books::open()?;
    let broken = Ledger::new(&books.conn, &books.audit).verify_ledger_integrity()?;
    if broken.is_empty() {
        println!("{}", "All journals balance.".green());
        return Ok(());
    }
    let mut table = Table::new();
    table.set_header(vec!["Journal", "Debit", "Credit"]);
    for journal in &broken {
        table.add_row(vec![
            Cell::new(&journal.journal_id),
            Cell::new(money(journal.debit)),
            Cell::new(money(journal.credit)),
        ]);
    }
    println!("Unbalanced Journals\n{table}");
    bail!("{} unbalanced journal(s)", broken.len())
}
