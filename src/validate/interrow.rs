//! Inter-row constraint checking: foreign keys and uniqueness, against
//! both persisted rows and the rest of the current chunk.
//!
//! One common design bulk-inserts optimistically and only re-validates a
//! row against this module when the plain insert fails on an integrity
//! violation. This implementation instead runs these checks up front for
//! every row: the router still calls this module at the same point in the
//! pipeline, so the calling convention matches, but the optimization of
//! skipping the check on the common all-valid-data path is not
//! implemented.

use ahash::{AHashMap, AHashSet};
use anyhow::Result;

use crate::cell::{Message, Row};
use crate::config::{Config, TableConfig};
use crate::store::{Param, Store};

/// Accumulated state for one chunk's worth of Phase C checks: values seen
/// so far in the chunk itself, keyed by column name, plus a cache of
/// persisted foreign-table value sets so repeated lookups don't re-query.
#[derive(Default)]
pub struct InterRowContext {
    seen_in_chunk: AHashMap<String, AHashSet<String>>,
    foreign_cache: AHashMap<(String, String), AHashSet<String>>,
}

impl InterRowContext {
    pub fn new() -> Self {
        Self::default()
    }
}

fn load_foreign_values(store: &dyn Store, ftable: &str, fcolumn: &str) -> Result<AHashSet<String>> {
    let sql = format!("SELECT \"{}\" FROM \"{}\" WHERE \"{}\" IS NOT NULL;", fcolumn, ftable, fcolumn);
    let rows = store.query_rows(&sql, &[])?;
    Ok(rows.into_iter().filter_map(|r| r.into_iter().next().flatten()).collect())
}

/// Check every row in the chunk for uniqueness violations (primary, unique,
/// tree-child columns) and foreign-key violations, in that order. Mutates
/// cells in place, same convention as the earlier phases. `exclude_row_number`
/// omits one persisted row from the uniqueness comparison set: for row
/// updates, the check excludes the row being updated.
pub fn check_inter_row(
    store: &dyn Store,
    config: &Config,
    table: &TableConfig,
    ctx: &mut InterRowContext,
    rows: &mut [Row],
    exclude_row_number: Option<u64>,
) -> Result<()> {
    check_uniqueness(store, table, ctx, rows, exclude_row_number)?;
    check_foreign_keys(store, config, table, ctx, rows)?;
    Ok(())
}

fn check_uniqueness(
    store: &dyn Store,
    table: &TableConfig,
    ctx: &mut InterRowContext,
    rows: &mut [Row],
    exclude_row_number: Option<u64>,
) -> Result<()> {
    for col_id in table.constraints.uniqueness_columns() {
        let column = table.column(col_id).expect("uniqueness constraint names a real column");
        let tag = if table.constraints.primary == Some(col_id) {
            "key:primary"
        } else if table.constraints.tree.iter().any(|t| t.child == col_id) {
            "tree:child-unique"
        } else {
            "key:unique"
        };

        let persisted = {
            let (sql, params): (String, Vec<Param>) = match exclude_row_number {
                Some(n) => (
                    format!(
                        "SELECT \"{0}\" FROM \"{1}\" WHERE \"{0}\" IS NOT NULL AND \"row_number\" != ?;",
                        column.name, table.name
                    ),
                    vec![Param::Integer(n as i64)],
                ),
                None => (
                    format!("SELECT \"{0}\" FROM \"{1}\" WHERE \"{0}\" IS NOT NULL;", column.name, table.name),
                    Vec::new(),
                ),
            };
            let found = store.query_rows(&sql, &params)?;
            found.into_iter().filter_map(|r| r.into_iter().next().flatten()).collect::<AHashSet<_>>()
        };
        let chunk_seen = ctx.seen_in_chunk.entry(column.name.clone()).or_default();

        for row in rows.iter_mut() {
            let Some(value) = row.get(&column.name).filter(|c| c.valid && c.nulltype.is_none()).map(|c| c.value.clone()) else {
                continue;
            };
            if persisted.contains(&value) || chunk_seen.contains(&value) {
                if let Some(cell) = row.get_mut(&column.name) {
                    cell.invalidate(Message::error(tag, format!("value '{}' is not unique", value)));
                }
            } else {
                chunk_seen.insert(value);
            }
        }
    }
    Ok(())
}

fn check_foreign_keys(
    store: &dyn Store,
    config: &Config,
    table: &TableConfig,
    ctx: &mut InterRowContext,
    rows: &mut [Row],
) -> Result<()> {
    for fk in table.constraints.foreign.clone() {
        let column = table.column(fk.column).expect("foreign constraint names a real column");
        let ftable = config.table(fk.ftable).expect("foreign constraint names a real table");
        let fcolumn = ftable.column(fk.fcolumn).expect("foreign constraint names a real foreign column");

        let cache_key = (ftable.name.clone(), fcolumn.name.clone());
        if !ctx.foreign_cache.contains_key(&cache_key) {
            let values = load_foreign_values(store, &ftable.name, &fcolumn.name)?;
            ctx.foreign_cache.insert(cache_key.clone(), values);
        }
        let allowed = &ctx.foreign_cache[&cache_key];

        for row in rows.iter_mut() {
            let Some(value) = row.get(&column.name).filter(|c| c.valid && c.nulltype.is_none()).map(|c| c.value.clone()) else {
                continue;
            };
            if !allowed.contains(&value) {
                if let Some(cell) = row.get_mut(&column.name) {
                    cell.invalidate(Message::error(
                        "key:foreign",
                        format!("value '{}' does not exist in {}.{}", value, ftable.name, fcolumn.name),
                    ));
                }
            }
        }
    }
    Ok(())
}
