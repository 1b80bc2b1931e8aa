use std::path::PathBuf;

use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use log::info;

use crate::config::load_config;
use crate::{graph, postload, scheduler, schema};
use crate::store::{DuckDbStore, Store};

pub fn run(table_path: PathBuf, db_dir: PathBuf, chunk_size: usize, progress: bool) -> Result<()> {
    let config = load_config(&table_path)
        .with_context(|| format!("failed to load configuration from {}", table_path.display()))?;

    for table in config.iter_tables() {
        graph::check_tree_cycles(&config, table.id)?;
    }
    let order = graph::resolve_order(&config)?;
    let data_tables: Vec<_> = order
        .iter()
        .filter(|&&id| config.table(id).map(|t| t.table_type.is_empty()).unwrap_or(false))
        .collect();

    let store = DuckDbStore::open(&db_dir)
        .with_context(|| format!("failed to open database at {}", db_dir.display()))?;
    let pool_size = scheduler::default_pool_size();
    info!("loading {} table(s) with a {}-wide worker pool", data_tables.len(), pool_size);

    let pb = if progress {
        let bar = ProgressBar::new(data_tables.len() as u64);
        bar.set_style(
            ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} tables {msg}")
                .unwrap()
                .progress_chars("█▓▒░  "),
        );
        Some(bar)
    } else {
        None
    };

    for table_id in order {
        let table = config.table(table_id).expect("resolve_order only returns valid table ids");
        if !table.table_type.is_empty() {
            // Special tables (type table/column/datatype/rule) describe the
            // configuration itself and are not bulk-loaded as data.
            continue;
        }

        let ddl = schema::generate_ddl(&config, table)?;
        for statement in ddl.statements() {
            store.exec_script(statement)?;
        }

        let stats = scheduler::load_table(&store, &config, table, chunk_size, pool_size)?;
        info!("table '{}': loaded {} row(s) in {} chunk(s)", table.name, stats.rows_loaded, stats.chunks);

        postload::check_table(&store, &config, table)?;

        if let Some(bar) = &pb {
            bar.set_message(table.name.clone());
            bar.inc(1);
        }
    }

    if let Some(bar) = pb {
        bar.finish_with_message("done");
    }

    Ok(())
}
