use chrono::NaiveDate;
use colored::Colorize;
use comfy_table::{Cell, Table};

use super::{account_id, Books};
use crate::fmt::money;
use crate::models::{ReconciliationSession, Transaction};
use crate::money::Money;
use crate::reconciler::{Reconciler, Worksheet};

fn print_totals(session: &ReconciliationSession) {
    println!("Statement date:     {}", session.statement_date);
    println!("Beginning balance:  {}", money(session.beginning_balance));
    println!(
        "Cleared deposits:   {} ({})",
        money(session.cleared_deposits_total),
        session.cleared_deposits_count
    );
    println!(
        "Cleared checks:     {} ({})",
        money(session.cleared_checks_total),
        session.cleared_checks_count
    );
    println!("Cleared balance:    {}", money(session.cleared_balance()));
    println!("Statement balance:  {}", money(session.statement_ending_balance));
    let difference = money(session.difference);
    if session.difference.within_tolerance(Money::ZERO) {
        println!("Difference:         {}", difference.green());
    } else {
        println!("Difference:         {}", difference.red().bold());
    }
}

fn bucket_table(transactions: &[Transaction], cleared: &[i64]) -> Table {
    let mut table = Table::new();
    table.set_header(vec!["", "ID", "Date", "Check", "Description", "Amount"]);
    for txn in transactions {
        table.add_row(vec![
            Cell::new(if cleared.contains(&txn.id) { "x" } else { "" }),
            Cell::new(txn.id),
            Cell::new(txn.date),
            Cell::new(txn.check_number.as_deref().unwrap_or_default()),
            Cell::new(&txn.description),
            Cell::new(money(txn.amount)),
        ]);
    }
    table
}

fn print_worksheet(worksheet: &Worksheet) {
    let session = &worksheet.session;
    println!("Reconciliation {} ({})", session.id, session.status);
    print_totals(session);
    println!("\nChecks and withdrawals\n{}", bucket_table(&worksheet.checks, &worksheet.cleared_ids));
    println!("Deposits\n{}", bucket_table(&worksheet.deposits, &worksheet.cleared_ids));
}

pub fn start(account: &str, date: NaiveDate, balance: Money) -> anyhow::Result<()> {
    let books = Books::open()?;
    let account_id = account_id(&books.conn, account)?;
    let worksheet = Reconciler::new(&books.conn, &books.audit).start(account_id, date, balance)?;
    print_worksheet(&worksheet);
    Ok(())
}

pub fn save(id: i64, clear: &[i64]) -> anyhow::Result<()> {
    let books = Books::open()?;
    let session = Reconciler::new(&books.conn, &books.audit).save(id, clear)?;
    println!("Saved reconciliation {id}");
    print_totals(&session);
    Ok(())
}

pub fn complete(id: i64, clear: Option<&[i64]>) -> anyhow::Result<()> {
    let books = Books::open()?;
    let reconciler = Reconciler::new(&books.conn, &books.audit);
    let saved;
    let clear: &[i64] = match clear {
        Some(ids) => ids,
        None => {
            saved = reconciler.worksheet(id)?.cleared_ids;
            saved.as_slice()
        }
    };
    let session = reconciler.complete(id, clear)?;
    println!("{}", format!("Reconciliation {id} completed.").green());
    print_totals(&session);
    Ok(())
}

pub fn update(id: i64, date: Option<NaiveDate>, balance: Option<Money>) -> anyhow::Result<()> {
    let books = Books::open()?;
    let session = Reconciler::new(&books.conn, &books.audit).update(id, date, balance)?;
    println!("Updated reconciliation {id}");
    print_totals(&session);
    Ok(())
}

pub fn delete(id: i64) -> anyhow::Result<()> {
    let books = Books::open()?;
    Reconciler::new(&books.conn, &books.audit).delete(id)?;
    println!("Deleted reconciliation {id}");
    Ok(())
}

pub fn show(id: i64) -> anyhow::Result<()> {
    let books = Books::open()?;
    let worksheet = Reconciler::new(&books.conn, &books.audit).worksheet(id)?;
    print_worksheet(&worksheet);
    Ok(())
}

pub fn list(account: &str) -> anyhow::Result<()> {
    let books = Books::open()?;
    let account_id = account_id(&books.conn, account)?;
    let sessions = Reconciler::new(&books.conn, &books.audit).list_sessions(account_id)?;

    let mut table = Table::new();
    table.set_header(vec!["ID", "Statement", "Beginning", "Ending", "Difference", "Status"]);
    for session in sessions {
        table.add_row(vec![
            Cell::new(session.id),
            Cell::new(session.statement_date),
            Cell::new(money(session.beginning_balance)),
            Cell::new(money(session.statement_ending_balance)),
            Cell::new(money(session.difference)),
            Cell::new(session.status),
        ]);
    }
    println!("Reconciliations\n{table}");
    Ok(())
}
