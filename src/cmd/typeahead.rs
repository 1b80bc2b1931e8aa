use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::config::load_config;
use crate::store::DuckDbStore;
use crate::validate::typeahead::get_matching_values;

pub fn run(db_dir: PathBuf, table_path: PathBuf, table: String, column: String, matching: Option<String>) -> Result<()> {
    let config = load_config(&table_path)
        .with_context(|| format!("failed to load configuration from {}", table_path.display()))?;
    let store = DuckDbStore::open(&db_dir)
        .with_context(|| format!("failed to open database at {}", db_dir.display()))?;

    let suggestions = get_matching_values(&store, &config, &table, &column, matching.as_deref().unwrap_or(""))?;
    for suggestion in suggestions {
        println!("{}\t{}\t{}", suggestion.id, suggestion.label, suggestion.order);
    }
    Ok(())
}
