use colored::Colorize;
use comfy_table::{Cell, Table};

use super::Books;
use crate::accounts::{account_summary, create_account, deactivate_account, list_accounts, resolve_account};
use crate::fmt::money;
use crate::models::AccountType;

pub fn add(name: &str, account_type: &str) -> anyhow::Result<()> {
    let books = Books::open()?;
    let account_type: AccountType = account_type.parse()?;
    let id = create_account(&books.conn, &books.audit, name, account_type)?;
    println!("Added account {id}: {name} ({account_type})");
    Ok(())
}

pub fn list(include_inactive: bool) -> anyhow::Result<()> {
    let books = Books::open()?;
    let accounts = list_accounts(&books.conn, include_inactive)?;

    let mut table = Table::new();
    table.set_header(vec!["ID", "Name", "Type", "Active"]);
    for account in accounts {
        table.add_row(vec![
            Cell::new(account.id),
            Cell::new(&account.name),
            Cell::new(account.account_type),
            Cell::new(if account.is_active { "yes" } else { "no" }),
        ]);
    }
    println!("Accounts\n{table}");
    Ok(())
}

pub fn deactivate(key: &str) -> anyhow::Result<()> {
    let books = Books::open()?;
    let account = resolve_account(&books.conn, key)?;
    deactivate_account(&books.conn, &books.audit, account.id)?;
    println!("Deactivated account {}: {}", account.id, account.name);
    Ok(())
}

pub fn summary() -> anyhow::Result<()> {
    let books = Books::open()?;
    let rows = account_summary(&books.conn)?;

    let mut table = Table::new();
    table.set_header(vec!["ID", "Name", "Type", "Journal", "Register"]);
    for row in rows {
        let register = if row.account.account_type.is_statement_account() {
            money(row.register_balance)
        } else {
            String::new()
        };
        let journal = if row.journal_balance.is_negative() {
            money(row.journal_balance).red().to_string()
        } else {
            money(row.journal_balance)
        };
        table.add_row(vec![
            Cell::new(row.account.id),
            Cell::new(&row.account.name),
            Cell::new(row.account.account_type),
            Cell::new(journal),
            Cell::new(register),
        ]);
    }
    println!("Account Summary\n{table}");
    Ok(())
}
