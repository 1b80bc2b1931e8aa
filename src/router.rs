//! Row router and persister: decides main vs. conflict table for each
//! validated row, builds parameterized multi-row inserts, and exposes the
//! single-row `insert_new_row`/`update_row` entry points the CLI
//! (`src/cmd`) drives directly.

use anyhow::{Context, Result};
use log::debug;

use crate::cell::Row;
use crate::config::{Column, Config, TableConfig};
use crate::store::{Param, Store};
use crate::tsv::TsvRow;
use crate::validate::{self, check_inter_row, check_tree_phase, InterRowContext};

fn uniqueness_column_names(table: &TableConfig) -> Vec<String> {
    table
        .constraints
        .uniqueness_columns()
        .into_iter()
        .map(|id| table.column(id).expect("uniqueness constraint names a real column").name.clone())
        .collect()
}

/// The SQL parameter for one cell's typed column: NULL whenever the cell is
/// invalid (the original value still survives in `_meta`), otherwise
/// coerced to the column's resolved SQL storage type.
fn cell_value_param(config: &Config, column: &Column, cell: &crate::cell::Cell) -> Param {
    if !cell.valid {
        return Param::Null;
    }
    match config.resolve_sql_type(column.datatype) {
        Some("integer") => cell
            .value
            .parse::<i64>()
            .map(Param::Integer)
            .unwrap_or(Param::Text(cell.value.clone())),
        _ => Param::Text(cell.value.clone()),
    }
}

fn cell_meta_param(cell: &crate::cell::Cell) -> Param {
    match cell.to_meta_json() {
        Some(json) => Param::Text(json.to_string()),
        None => Param::Null,
    }
}

/// Build and execute one multi-row `INSERT INTO target (...) VALUES (...),
/// (...), ...`. No-op on an empty row set.
fn insert_rows(store: &dyn Store, config: &Config, table: &TableConfig, target: &str, rows: &[&Row]) -> Result<()> {
    if rows.is_empty() {
        return Ok(());
    }

    let mut columns = vec!["\"row_number\"".to_string()];
    for column in &table.columns {
        columns.push(format!("\"{}\"", column.name));
        columns.push(format!("\"{}_meta\"", column.name));
    }

    let mut placeholders = Vec::with_capacity(rows.len());
    let mut params: Vec<Param> = Vec::with_capacity(rows.len() * columns.len());
    for row in rows {
        let mut slots = vec!["?".to_string()];
        params.push(Param::Integer(row.row_number as i64));
        for column in &table.columns {
            let cell = row
                .get(&column.name)
                .expect("validated row has a cell for every configured column");
            slots.push("?".to_string());
            slots.push("?".to_string());
            params.push(cell_value_param(config, column, cell));
            params.push(cell_meta_param(cell));
        }
        placeholders.push(format!("({})", slots.join(", ")));
    }

    let sql = format!(
        "INSERT INTO \"{}\" ({}) VALUES {};",
        target,
        columns.join(", "),
        placeholders.join(", ")
    );
    store
        .exec_with_params(&sql, &params)
        .with_context(|| format!("failed to insert {} row(s) into '{}'", rows.len(), target))?;
    Ok(())
}

/// Run the tree and inter-row checks over one already-validated chunk,
/// route each row to main or conflict, and persist both partitions in one
/// transaction.
pub fn persist_chunk(store: &dyn Store, config: &Config, table: &TableConfig, rows: &mut [Row]) -> Result<()> {
    check_tree_phase(store, table, rows)?;
    let mut ctx = InterRowContext::new();
    check_inter_row(store, config, table, &mut ctx, rows, None)?;

    let uniqueness_cols = uniqueness_column_names(table);
    let (main_rows, conflict_rows): (Vec<&Row>, Vec<&Row>) =
        rows.iter().partition(|row| !row.is_conflicting(&uniqueness_cols));
    debug!(
        "table '{}': routing {} row(s) to main, {} to conflict",
        table.name,
        main_rows.len(),
        conflict_rows.len()
    );

    store.begin()?;
    let result = (|| {
        insert_rows(store, config, table, &table.name, &main_rows)?;
        insert_rows(store, config, table, &format!("{}_conflict", table.name), &conflict_rows)?;
        Ok::<(), anyhow::Error>(())
    })();
    match result {
        Ok(()) => store.commit(),
        Err(e) => {
            store.rollback().ok();
            Err(e)
        }
    }
}

fn next_row_number(store: &dyn Store, table: &TableConfig) -> Result<u64> {
    let rows = store.query_rows(&format!("SELECT MAX(\"row_number\") FROM \"{}\";", table.name), &[])?;
    let max = rows
        .first()
        .and_then(|r| r.first())
        .and_then(|v| v.clone())
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(0);
    Ok(max + 1)
}

/// Allocate `MAX(row_number)+1` (or 1 if empty), validate as a fresh row,
/// and persist it to whichever partition it routes to.
pub fn insert_new_row(store: &dyn Store, config: &Config, table: &TableConfig, raw: &TsvRow) -> Result<u64> {
    let row_number = next_row_number(store, table)?;
    let mut rows = vec![validate::validate_intra_row(config, table, row_number, raw)];

    check_tree_phase(store, table, &mut rows)?;
    let mut ctx = InterRowContext::new();
    check_inter_row(store, config, table, &mut ctx, &mut rows, None)?;

    let uniqueness_cols = uniqueness_column_names(table);
    let target = if rows[0].is_conflicting(&uniqueness_cols) {
        format!("{}_conflict", table.name)
    } else {
        table.name.clone()
    };

    store.begin()?;
    let row_ref = [&rows[0]];
    match insert_rows(store, config, table, &target, &row_ref) {
        Ok(()) => store.commit()?,
        Err(e) => {
            store.rollback().ok();
            return Err(e);
        }
    }
    Ok(row_number)
}

/// Re-validate the row at `row_number` against the new values, excluding
/// its own previous value from uniqueness checks, then overwrite every
/// column's value and `_meta` in place.
pub fn update_row(store: &dyn Store, config: &Config, table: &TableConfig, row_number: u64, raw: &TsvRow) -> Result<()> {
    let mut rows = vec![validate::validate_intra_row(config, table, row_number, raw)];

    check_tree_phase(store, table, &mut rows)?;
    let mut ctx = InterRowContext::new();
    check_inter_row(store, config, table, &mut ctx, &mut rows, Some(row_number))?;

    let row = &rows[0];
    let mut assignments = Vec::with_capacity(table.columns.len() * 2);
    let mut params: Vec<Param> = Vec::with_capacity(table.columns.len() * 2 + 1);
    for column in &table.columns {
        let cell = row
            .get(&column.name)
            .expect("validated row has a cell for every configured column");
        assignments.push(format!("\"{0}\" = ?, \"{0}_meta\" = ?", column.name));
        params.push(cell_value_param(config, column, cell));
        params.push(cell_meta_param(cell));
    }
    params.push(Param::Integer(row_number as i64));

    let uniqueness_cols = uniqueness_column_names(table);
    let target = if row.is_conflicting(&uniqueness_cols) {
        format!("{}_conflict", table.name)
    } else {
        table.name.clone()
    };
    let other = if target == table.name {
        format!("{}_conflict", table.name)
    } else {
        table.name.clone()
    };
    let sql = format!(
        "UPDATE \"{}\" SET {} WHERE \"row_number\" = ?;",
        target,
        assignments.join(", ")
    );

    store.begin()?;
    let result = (|| -> Result<()> {
        let affected = store.exec_with_params(&sql, &params)?;
        if affected == 0 {
            // The row's conflict-routing status changed since it was last
            // persisted: it no longer lives in `target`, so the UPDATE above
            // touched nothing. Move it from wherever it actually is instead.
            store.exec_with_params(
                &format!("DELETE FROM \"{}\" WHERE \"row_number\" = ?;", other),
                &[Param::Integer(row_number as i64)],
            )?;
            insert_rows(store, config, table, &target, &[row])?;
        }
        Ok(())
    })();
    match result {
        Ok(()) => store.commit(),
        Err(e) => {
            store.rollback().ok();
            Err(e).with_context(|| format!("failed to update row {} of '{}'", row_number, table.name))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::loader::load_config;
    use crate::schema::generate_ddl;
    use crate::store::DuckDbStore;

    fn write_config(dir: &std::path::Path) -> std::path::PathBuf {
        let table_path = dir.join("table.tsv");
        std::fs::write(
            &table_path,
            "table\tpath\ttype\n\
             table\ttable.tsv\ttable\n\
             column\tcolumn.tsv\tcolumn\n\
             datatype\tdatatype.tsv\tdatatype\n\
             item\titem.tsv\t\n",
        )
        .unwrap();
        std::fs::write(
            dir.join("column.tsv"),
            "table\tcolumn\tnulltype\tdatatype\tstructure\tdescription\n\
             item\tid\t\tword\tprimary\tid\n",
        )
        .unwrap();
        std::fs::write(
            dir.join("datatype.tsv"),
            "datatype\tparent\tcondition\tSQL type\tdescription\n\
             text\t\t\ttext\tany text\n\
             word\ttext\texclude(/\\s/)\t\tword\n",
        )
        .unwrap();
        std::fs::write(dir.join("item.tsv"), "id\na\nb\n").unwrap();
        table_path
    }

    fn open_store(config: &Config, table: &TableConfig) -> DuckDbStore {
        let store = DuckDbStore::open_in_memory().unwrap();
        let ddl = generate_ddl(config, table).unwrap();
        for stmt in ddl.statements() {
            store.exec_script(stmt).unwrap();
        }
        store
    }

    #[test]
    fn insert_new_row_allocates_next_row_number() {
        let dir = tempfile::tempdir().unwrap();
        let table_path = write_config(dir.path());
        let config = load_config(&table_path).unwrap();
        let table = config.get_table("item").unwrap();
        let store = open_store(&config, table);

        let n1 = insert_new_row(&store, &config, table, &vec!["first".to_string()]).unwrap();
        let n2 = insert_new_row(&store, &config, table, &vec!["second".to_string()]).unwrap();
        assert_eq!(n1, 1);
        assert_eq!(n2, 2);
    }

    #[test]
    fn duplicate_primary_key_routes_to_conflict() {
        let dir = tempfile::tempdir().unwrap();
        let table_path = write_config(dir.path());
        let config = load_config(&table_path).unwrap();
        let table = config.get_table("item").unwrap();
        let store = open_store(&config, table);

        insert_new_row(&store, &config, table, &vec!["dup".to_string()]).unwrap();
        insert_new_row(&store, &config, table, &vec!["dup".to_string()]).unwrap();

        let main = store.query_rows("SELECT row_number FROM item;", &[]).unwrap();
        let conflict = store.query_rows("SELECT row_number FROM item_conflict;", &[]).unwrap();
        assert_eq!(main.len(), 1);
        assert_eq!(conflict.len(), 1);
    }

    #[test]
    fn update_row_excludes_its_own_previous_value() {
        let dir = tempfile::tempdir().unwrap();
        let table_path = write_config(dir.path());
        let config = load_config(&table_path).unwrap();
        let table = config.get_table("item").unwrap();
        let store = open_store(&config, table);

        let n = insert_new_row(&store, &config, table, &vec!["original".to_string()]).unwrap();
        update_row(&store, &config, table, n, &vec!["original".to_string()]).unwrap();

        let rows = store.query_rows("SELECT id FROM item WHERE row_number = ?;", &[Param::Integer(n as i64)]).unwrap();
        assert_eq!(rows[0][0].as_deref(), Some("original"));
    }

    #[test]
    fn update_row_moves_row_when_conflict_status_changes() {
        let dir = tempfile::tempdir().unwrap();
        let table_path = write_config(dir.path());
        let config = load_config(&table_path).unwrap();
        let table = config.get_table("item").unwrap();
        let store = open_store(&config, table);

        let n1 = insert_new_row(&store, &config, table, &vec!["a".to_string()]).unwrap();
        insert_new_row(&store, &config, table, &vec!["b".to_string()]).unwrap();
        assert_eq!(store.query_rows("SELECT row_number FROM item;", &[]).unwrap().len(), 2);

        // n1's new value duplicates the other row's value, so it should move
        // out of the main table and into the conflict table, not sit there
        // untouched because the UPDATE against the main table affected 0 rows.
        update_row(&store, &config, table, n1, &vec!["b".to_string()]).unwrap();

        let main = store.query_rows("SELECT row_number, id FROM item;", &[]).unwrap();
        assert_eq!(main.len(), 1);
        assert_eq!(main[0][1].as_deref(), Some("b"));

        let conflict = store.query_rows("SELECT row_number, id, id_meta FROM item_conflict;", &[]).unwrap();
        assert_eq!(conflict.len(), 1);
        assert_eq!(conflict[0][0].as_deref(), Some(n1.to_string().as_str()));
        assert_eq!(conflict[0][1], None);
        assert!(conflict[0][2].as_ref().unwrap().contains("key:primary"));
    }
}
