use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::config::load_config;
use crate::router;
use crate::store::DuckDbStore;

fn split_row(raw: &str) -> Vec<String> {
    raw.split('\t').map(|s| s.to_string()).collect()
}

pub fn run_insert(db_dir: PathBuf, table_path: PathBuf, table: String, row: String) -> Result<()> {
    let config = load_config(&table_path)
        .with_context(|| format!("failed to load configuration from {}", table_path.display()))?;
    let table_config = config
        .get_table(&table)
        .with_context(|| format!("no such table '{}'", table))?;
    let store = DuckDbStore::open(&db_dir)
        .with_context(|| format!("failed to open database at {}", db_dir.display()))?;

    let row_number = router::insert_new_row(&store, &config, table_config, &split_row(&row))?;
    println!("inserted row {} into '{}'", row_number, table);
    Ok(())
}

pub fn run_update(db_dir: PathBuf, table_path: PathBuf, table: String, row_number: u64, row: String) -> Result<()> {
    let config = load_config(&table_path)
        .with_context(|| format!("failed to load configuration from {}", table_path.display()))?;
    let table_config = config
        .get_table(&table)
        .with_context(|| format!("no such table '{}'", table))?;
    let store = DuckDbStore::open(&db_dir)
        .with_context(|| format!("failed to open database at {}", db_dir.display()))?;

    router::update_row(&store, &config, table_config, row_number, &split_row(&row))?;
    println!("updated row {} of '{}'", row_number, table);
    Ok(())
}
