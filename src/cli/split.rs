use anyhow::bail;
use chrono::NaiveDate;
use comfy_table::{Cell, Table};
use rusqlite::Connection;

use super::txn::{category_names, transaction_table};
use super::{account_id, parse_allocation, resolve_category, today, Books};
use crate::accounts::{list_clients, resolve_client};
use crate::fmt::money;
use crate::money::Money;
use crate::splitter::{NewSplit, SplitLine, Splitter};

/// Parses `client:NAME=AMOUNT` or `category:NAME=AMOUNT`.
fn parse_line(conn: &Connection, raw: &str) -> anyhow::Result<SplitLine> {
    let Some((target, rest)) = raw.split_once(':') else {
        bail!("expected client:NAME=AMOUNT or category:NAME=AMOUNT, got '{raw}'");
    };
    let (name, amount) = parse_allocation(rest)?;
    match target.trim() {
        "client" => Ok(SplitLine::client(resolve_client(conn, &name)?.id, amount)),
        "category" => Ok(SplitLine::category(resolve_category(conn, &name)?, amount)),
        other => bail!("unknown split target '{other}' (use client or category)"),
    }
}

fn parse_lines(conn: &Connection, raw: &[String]) -> anyhow::Result<Vec<SplitLine>> {
    raw.iter().map(|line| parse_line(conn, line)).collect()
}

pub struct CreateArgs {
    pub account: String,
    pub total: Money,
    pub description: String,
    pub date: Option<NaiveDate>,
    pub check_number: Option<String>,
    pub lines: Vec<String>,
}

pub fn create(args: CreateArgs) -> anyhow::Result<()> {
    let books = Books::open()?;
    let split = NewSplit {
        account_id: account_id(&books.conn, &args.account)?,
        date: args.date.unwrap_or_else(today),
        description: args.description,
        total_amount: args.total,
        check_number: args.check_number,
        lines: parse_lines(&books.conn, &args.lines)?,
    };
    let created = Splitter::new(&books.conn, &books.audit).create_split(split)?;
    println!(
        "Created split {} with {} children",
        created.parent_id,
        created.children.len()
    );
    Ok(())
}

pub fn apply(id: i64, lines: &[String]) -> anyhow::Result<()> {
    let books = Books::open()?;
    let lines = parse_lines(&books.conn, lines)?;
    let created = Splitter::new(&books.conn, &books.audit).split_transaction(id, lines)?;
    println!("Split transaction {id} into {} children", created.children.len());
    Ok(())
}

pub fn show(id: i64) -> anyhow::Result<()> {
    let books = Books::open()?;
    let split = Splitter::new(&books.conn, &books.audit).get_split(id)?;
    let categories = category_names(&books.conn)?;
    let clients = list_clients(&books.conn)?;

    println!("Split {}: {}", split.parent.id, split.parent.description);
    println!("{}", transaction_table(std::slice::from_ref(&split.parent), &categories));

    let mut table = Table::new();
    table.set_header(vec!["ID", "Client", "Category", "Amount", "Status"]);
    for child in &split.children {
        let client = child
            .client_id
            .and_then(|c| clients.iter().find(|cl| cl.id == c))
            .map(|cl| cl.name.clone())
            .unwrap_or_default();
        let category = child
            .category_id
            .and_then(|c| categories.get(&c).cloned())
            .unwrap_or_default();
        table.add_row(vec![
            Cell::new(child.id),
            Cell::new(client),
            Cell::new(category),
            Cell::new(money(child.amount)),
            Cell::new(child.status),
        ]);
    }
    println!("Allocations\n{table}");
    Ok(())
}

pub fn delete(id: i64) -> anyhow::Result<()> {
    let books = Books::open()?;
    Splitter::new(&books.conn, &books.audit).delete_split(id)?;
    println!("Deleted split {id}");
    Ok(())
}
