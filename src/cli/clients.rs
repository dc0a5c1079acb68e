use comfy_table::{Cell, Table};

use super::Books;
use crate::accounts::{create_client, list_clients};
use crate::fmt::money;

pub fn add(name: &str) -> anyhow::Result<()> {
    let books = Books::open()?;
    let id = create_client(&books.conn, &books.audit, name)?;
    println!("Added client {id}: {name}");
    Ok(())
}

pub fn list() -> anyhow::Result<()> {
    let books = Books::open()?;
    let clients = list_clients(&books.conn)?;

    let mut table = Table::new();
    table.set_header(vec!["ID", "Name", "Balance"]);
    for client in clients {
        table.add_row(vec![
            Cell::new(client.id),
            Cell::new(&client.name),
            Cell::new(money(client.balance)),
        ]);
    }
    println!("Clients\n{table}");
    Ok(())
}
