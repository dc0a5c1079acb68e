use std::collections::HashMap;

use chrono::NaiveDate;
use comfy_table::{Cell, Table};
use rusqlite::Connection;

use super::{account_id, resolve_category, today, Books};
use crate::accounts::resolve_client;
use crate::fmt::money;
use crate::models::{Transaction, TransactionStatus};
use crate::money::Money;
use crate::transactions::{NewTransaction, Register};

pub(crate) fn category_names(conn: &Connection) -> anyhow::Result<HashMap<i64, String>> {
    let mut stmt = conn.prepare("SELECT id, name FROM categories")?;
    let names = stmt
        .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
        .collect::<rusqlite::Result<HashMap<i64, String>>>()?;
    Ok(names)
}

pub(crate) fn transaction_table(transactions: &[Transaction], categories: &HashMap<i64, String>) -> Table {
    let mut table = Table::new();
    table.set_header(vec!["ID", "Date", "Description", "Amount", "Category", "Status", "Check"]);
    for txn in transactions {
        let category = txn
            .category_id
            .and_then(|id| categories.get(&id).cloned())
            .unwrap_or_default();
        let status = if txn.is_split {
            "split".to_string()
        } else {
            txn.status.to_string()
        };
        table.add_row(vec![
            Cell::new(txn.id),
            Cell::new(txn.date),
            Cell::new(&txn.description),
            Cell::new(money(txn.amount)),
            Cell::new(category),
            Cell::new(status),
            Cell::new(txn.check_number.as_deref().unwrap_or_default()),
        ]);
    }
    table
}

pub struct AddArgs {
    pub account: String,
    pub amount: Money,
    pub description: String,
    pub date: Option<NaiveDate>,
    pub client: Option<String>,
    pub category: Option<String>,
    pub vendor: Option<String>,
    pub memo: Option<String>,
    pub check_number: Option<String>,
}

pub fn add(args: AddArgs) -> anyhow::Result<()> {
    let books = Books::open()?;
    let mut new = NewTransaction::new(
        account_id(&books.conn, &args.account)?,
        args.date.unwrap_or_else(today),
        args.amount,
        args.description,
    );
    if let Some(client) = &args.client {
        new.client_id = Some(resolve_client(&books.conn, client)?.id);
    }
    if let Some(category) = &args.category {
        new.category_id = Some(resolve_category(&books.conn, category)?);
    }
    new.vendor = args.vendor;
    new.memo = args.memo;
    new.check_number = args.check_number;

    let register = Register::new(&books.conn, &books.audit).with_categorizer(books.auto_categorizer()?);
    let id = register.create_transaction(new)?;
    let txn = register.get_transaction(id)?;
    let category = txn
        .category_id
        .and_then(|c| category_names(&books.conn).ok()?.remove(&c))
        .unwrap_or_default();
    println!("Added transaction {id}: {} \u{2192} {category}", money(txn.amount));
    Ok(())
}

pub fn list(account: Option<&str>, limit: usize) -> anyhow::Result<()> {
    let books = Books::open()?;
    let account_id = account.map(|key| account_id(&books.conn, key)).transpose()?;
    let transactions = Register::new(&books.conn, &books.audit).list_transactions(account_id, limit)?;
    let table = transaction_table(&transactions, &category_names(&books.conn)?);
    println!("Transactions\n{table}");
    Ok(())
}

pub fn status(id: i64, status: &str) -> anyhow::Result<()> {
    let books = Books::open()?;
    let status: TransactionStatus = status.parse()?;
    Register::new(&books.conn, &books.audit).set_status(id, status)?;
    println!("Transaction {id} is now {status}");
    Ok(())
}

pub fn void(id: i64, reason: &str) -> anyhow::Result<()> {
    let books = Books::open()?;
    Register::new(&books.conn, &books.audit).void_transaction(id, reason)?;
    println!("Voided transaction {id}");
    Ok(())
}
