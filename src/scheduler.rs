//! Chunk scheduler: reads a table's TSV source lazily, groups rows into
//! fixed-size chunks, and runs Phase A over them with a worker pool sized
//! to the available CPUs. Completed chunks are forwarded to the router in
//! strictly ascending chunk order, since row numbering and conflict
//! routing both depend on it.

use anyhow::{Context, Result};
use log::{debug, info};
use rayon::prelude::*;

use crate::cell::Row;
use crate::config::{Config, TableConfig};
use crate::router;
use crate::store::Store;
use crate::tsv::{TsvReader, TsvRow};
use crate::validate;

/// Default rows per chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 300;

/// Outcome of loading one table end to end.
#[derive(Debug, Clone, Copy)]
pub struct TableLoadStats {
    pub rows_loaded: usize,
    pub chunks: usize,
}

/// Row `n` (1-based) within chunk `k` (0-based) gets `row_number = n + k *
/// chunk_size`.
fn row_number(chunk_number: usize, index_in_chunk: usize, chunk_size: usize) -> u64 {
    (index_in_chunk + 1) as u64 + (chunk_number as u64) * (chunk_size as u64)
}

fn read_chunks(table: &TableConfig, chunk_size: usize) -> Result<Vec<Vec<TsvRow>>> {
    let mut reader = TsvReader::open(&table.path)
        .with_context(|| format!("failed to open source file for table '{}'", table.name))?;
    let mut chunks = Vec::new();
    let mut current: Vec<TsvRow> = Vec::with_capacity(chunk_size);
    while let Some(row) = reader.read_row()? {
        current.push(row);
        if current.len() == chunk_size {
            chunks.push(std::mem::replace(&mut current, Vec::with_capacity(chunk_size)));
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    Ok(chunks)
}

fn validate_chunk(config: &Config, table: &TableConfig, chunk_number: usize, chunk_size: usize, raw_rows: &[TsvRow]) -> Vec<Row> {
    raw_rows
        .iter()
        .enumerate()
        .map(|(i, raw)| validate::validate_intra_row(config, table, row_number(chunk_number, i, chunk_size), raw))
        .collect()
}

/// Load one table fully: Phase A over a worker pool, then Phase B/C/D and
/// persistence serially, chunk by chunk, in ascending order.
pub fn load_table(store: &dyn Store, config: &Config, table: &TableConfig, chunk_size: usize, pool_size: usize) -> Result<TableLoadStats> {
    let chunks = read_chunks(table, chunk_size)?;
    info!("table '{}': read {} chunk(s) of up to {} rows", table.name, chunks.len(), chunk_size);

    // `par_iter().enumerate().collect()` preserves source order regardless
    // of which worker finishes first.
    let validated: Vec<Vec<Row>> = if pool_size <= 1 {
        chunks
            .iter()
            .enumerate()
            .map(|(k, raw)| validate_chunk(config, table, k, chunk_size, raw))
            .collect()
    } else {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(pool_size)
            .build()
            .context("failed to build the Phase A worker pool")?;
        pool.install(|| {
            chunks
                .par_iter()
                .enumerate()
                .map(|(k, raw)| validate_chunk(config, table, k, chunk_size, raw))
                .collect()
        })
    };

    let mut rows_loaded = 0;
    for (chunk_number, mut rows) in validated.into_iter().enumerate() {
        debug!("table '{}': persisting chunk {} ({} rows)", table.name, chunk_number, rows.len());
        rows_loaded += rows.len();
        router::persist_chunk(store, config, table, &mut rows)?;
    }

    Ok(TableLoadStats {
        rows_loaded,
        chunks: chunks_len(rows_loaded, chunk_size),
    })
}

/// Number of chunks implied by the rows actually loaded — recomputed rather
/// than captured earlier so the stat reflects what was persisted.
fn chunks_len(rows_loaded: usize, chunk_size: usize) -> usize {
    if rows_loaded == 0 {
        0
    } else {
        (rows_loaded + chunk_size - 1) / chunk_size
    }
}

/// The worker pool size: CPU count, falling back to 4 when it cannot be
/// determined.
pub fn default_pool_size() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}
