use std::path::PathBuf;

use crate::db::{get_connection, init_db, set_metadata, DB_FILE};
use crate::settings::{load_settings, save_settings, shellexpand_path};

pub fn run(data_dir: Option<String>, firm: Option<String>) -> anyhow::Result<()> {
    let mut settings = load_settings();
    if let Some(dir) = data_dir {
        settings.data_dir = shellexpand_path(&dir);
    }
    save_settings(&settings)?;

    let resolved = PathBuf::from(&settings.data_dir);
    std::fs::create_dir_all(&resolved)?;

    let conn = get_connection(&resolved.join(DB_FILE))?;
    init_db(&conn)?;
    if let Some(firm) = firm {
        set_metadata(&conn, "firm_name", firm.trim())?;
    }

    println!("Initialized iolta at {}", resolved.display());
    Ok(())
}
