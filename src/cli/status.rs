use std::path::PathBuf;

use crate::db::{get_connection, get_metadata, DB_FILE};
use crate::fmt::format_bytes;
use crate::settings::load_settings;

pub fn run() -> anyhow::Result<()> {
    let settings = load_settings();
    let data_dir = PathBuf::from(&settings.data_dir);
    let db_path = data_dir.join(DB_FILE);

    println!("User:       {}", if settings.user_name.is_empty() { "(not set)" } else { &settings.user_name });
    println!("Data dir:   {}", data_dir.display());
    println!("Database:   {}", db_path.display());

    if db_path.exists() {
        let size = std::fs::metadata(&db_path)?.len();
        println!("DB size:    {}", format_bytes(size));

        let conn = get_connection(&db_path)?;

        let firm = get_metadata(&conn, "firm_name");
        println!("Firm:       {}", firm.as_deref().unwrap_or("(not set)"));

        let count = |sql: &str| -> rusqlite::Result<i64> { conn.query_row(sql, [], |r| r.get(0)) };
        let accounts = count("SELECT count(*) FROM accounts WHERE is_active = 1")?;
        let clients = count("SELECT count(*) FROM clients")?;
        let journals = count("SELECT count(DISTINCT journal_id) FROM journal_lines")?;
        let transactions = count("SELECT count(*) FROM transactions")?;
        let uncategorized = count(
            "SELECT count(*) FROM transactions \
             WHERE (category_id IS NULL OR categorized_by = 'default') \
             AND is_split = 0 AND status != 'void'",
        )?;
        let open_sessions = count("SELECT count(*) FROM reconciliations WHERE status = 'in_progress'")?;
        let rules = count("SELECT count(*) FROM rules WHERE is_active = 1")?;

        println!();
        println!("Accounts:        {accounts}");
        println!("Clients:         {clients}");
        println!("Journals:        {journals}");
        println!("Transactions:    {transactions}");
        println!("Uncategorized:   {uncategorized}");
        println!("Open sessions:   {open_sessions}");
        println!("Rules:           {rules}");
    } else {
        println!();
        println!("Database not found. Run `iolta init` to set up.");
    }

    Ok(())
}
