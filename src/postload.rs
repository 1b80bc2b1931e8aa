//! Post-load checker: whole-table invariants that cannot be checked until
//! every chunk is persisted — tree foreign-key completeness and `under`
//! subtree containment. Runs once per table after all of its chunks have
//! gone through the scheduler and router.

use ahash::AHashSet;
use anyhow::{Context, Result};
use log::info;
use serde_json::json;

use crate::config::{Config, TableConfig};
use crate::store::{Param, Store};

/// Resolve a candidate cell's effective value for a whole-table check: the
/// typed column's value when present, otherwise the `value` recorded in its
/// `_meta` (set whenever the column was nulled out by an unrelated
/// validation failure). Returns `None` when the row should be skipped
/// entirely, either because it carries no usable value at all or because
/// its `_meta` records a matched nulltype — legitimately empty, not a stray
/// NULL from an unrelated failure.
fn resolve_cell_value(value: Option<String>, meta: Option<String>) -> Option<String> {
    if let Some(meta_text) = &meta {
        if let Ok(parsed) = serde_json::from_str::<serde_json::Value>(meta_text) {
            if parsed.get("nulltype").is_some() {
                return None;
            }
        }
    }
    if value.is_some() {
        return value;
    }
    let parsed: serde_json::Value = serde_json::from_str(&meta?).ok()?;
    parsed.get("value").and_then(|v| v.as_str()).map(|s| s.to_string())
}

fn patch_meta(store: &dyn Store, target: &str, column: &str, row_number: &str, original_value: &str, rule: &str, message: String) -> Result<()> {
    let meta = json!({
        "valid": false,
        "value": original_value,
        "messages": [{"rule": rule, "level": "error", "message": message}],
    });
    let sql = format!(
        "UPDATE \"{0}\" SET \"{1}\" = NULL, \"{1}_meta\" = ? WHERE \"row_number\" = ?;",
        target, column
    );
    let row_num: i64 = row_number.parse().unwrap_or(0);
    store
        .exec_with_params(&sql, &[Param::Text(meta.to_string()), Param::Integer(row_num)])
        .with_context(|| format!("failed to patch {}.{} for row {}", target, column, row_number))?;
    Ok(())
}

/// Every non-null value in a tree's `parent` column must also appear in its
/// `child` column.
fn check_tree_foreign_key(store: &dyn Store, table: &TableConfig) -> Result<()> {
    for tree in &table.constraints.tree {
        let child = table.column(tree.child).expect("tree constraint names a real child column");
        let parent = table.column(tree.parent).expect("tree constraint names a real parent column");

        for target in [table.name.clone(), format!("{}_conflict", table.name)] {
            let children_sql = format!(
                "SELECT \"{0}\", \"{0}_meta\" FROM \"{1}\";",
                child.name, target
            );
            let known_children: AHashSet<String> = store
                .query_rows(&children_sql, &[])?
                .into_iter()
                .filter_map(|mut r| resolve_cell_value(r.first_mut().and_then(|v| v.take()), r.get_mut(1).and_then(|v| v.take())))
                .collect();

            let offenders_sql = format!(
                "SELECT \"row_number\", \"{0}\", \"{0}_meta\" FROM \"{1}\";",
                parent.name, target
            );
            for mut row in store.query_rows(&offenders_sql, &[])? {
                let Some(Some(row_num)) = row.first().cloned() else {
                    continue;
                };
                let column_value = row.get_mut(1).and_then(|v| v.take());
                let meta_value = row.get_mut(2).and_then(|v| v.take());
                let Some(value) = resolve_cell_value(column_value, meta_value) else {
                    continue;
                };
                if !known_children.contains(&value) {
                    patch_meta(
                        store,
                        &target,
                        &parent.name,
                        &row_num,
                        &value,
                        "tree:foreign",
                        format!("value '{}' does not appear in child column '{}'", value, child.name),
                    )?;
                }
            }
        }
    }
    Ok(())
}

/// Compute the set of values in the inclusive subtree rooted at `root` over
/// a table's `(child, parent)` tree, using a recursive CTE (the same shape
/// as the typeahead subtree lookup).
fn subtree_values(store: &dyn Store, tree_table: &str, child_col: &str, parent_col: &str, root: &str) -> Result<AHashSet<String>> {
    let sql = format!(
        "WITH RECURSIVE tree AS ( \
            SELECT \"{child}\", \"{parent}\" FROM \"{table}\" WHERE \"{child}\" = ? \
            UNION ALL \
            SELECT t1.\"{child}\", t1.\"{parent}\" FROM \"{table}\" AS t1 \
            JOIN tree AS t2 ON t2.\"{parent}\" = t1.\"{child}\" \
        ) SELECT \"{child}\" FROM tree;",
        child = child_col,
        parent = parent_col,
        table = tree_table,
    );
    let rows = store.query_rows(&sql, &[Param::Text(root.to_string())])?;
    Ok(rows.into_iter().filter_map(|r| r.into_iter().next().flatten()).collect())
}

/// For every `under(ttable.tcolumn, root_value)` constraint: a value is
/// valid iff it appears in the tree's child column (`under:not-in-tree`
/// otherwise) and lies within the subtree rooted at `root_value`
/// (`under:not-under` otherwise).
fn check_under(store: &dyn Store, config: &Config, table: &TableConfig) -> Result<()> {
    for under in &table.constraints.under {
        let column = table.column(under.column).expect("under constraint names a real column");
        let tree_table = config.table(under.ttable).expect("under constraint names a real tree table");
        let tcolumn = tree_table.column(under.tcolumn).expect("under constraint names a real tree column");
        let tree = tree_table
            .constraints
            .tree
            .iter()
            .find(|t| t.child == under.tcolumn)
            .with_context(|| format!("no tree found for '{}.{}'", tree_table.name, tcolumn.name))?;
        let parent_col = tree_table.column(tree.parent).expect("tree constraint names a real parent column");

        let all_children_sql = format!(
            "SELECT \"{0}\", \"{0}_meta\" FROM \"{1}\";",
            tcolumn.name, tree_table.name
        );
        let known_children: AHashSet<String> = store
            .query_rows(&all_children_sql, &[])?
            .into_iter()
            .filter_map(|mut r| resolve_cell_value(r.first_mut().and_then(|v| v.take()), r.get_mut(1).and_then(|v| v.take())))
            .collect();
        let subtree = subtree_values(store, &tree_table.name, &tcolumn.name, &parent_col.name, &under.value)?;

        for target in [table.name.clone(), format!("{}_conflict", table.name)] {
            let sql = format!(
                "SELECT \"row_number\", \"{0}\", \"{0}_meta\" FROM \"{1}\";",
                column.name, target
            );
            for mut row in store.query_rows(&sql, &[])? {
                let Some(Some(row_num)) = row.first().cloned() else {
                    continue;
                };
                let column_value = row.get_mut(1).and_then(|v| v.take());
                let meta_value = row.get_mut(2).and_then(|v| v.take());
                let Some(value) = resolve_cell_value(column_value, meta_value) else {
                    continue;
                };
                if !known_children.contains(&value) {
                    patch_meta(
                        store,
                        &target,
                        &column.name,
                        &row_num,
                        &value,
                        "under:not-in-tree",
                        format!("value '{}' does not appear in tree column '{}.{}'", value, tree_table.name, tcolumn.name),
                    )?;
                } else if !subtree.contains(&value) {
                    patch_meta(
                        store,
                        &target,
                        &column.name,
                        &row_num,
                        &value,
                        "under:not-under",
                        format!("value '{}' is not under '{}'", value, under.value),
                    )?;
                }
            }
        }
    }
    Ok(())
}

/// Run both post-load invariants for `table` in one transaction: post-load
/// metadata patches commit as one transaction per table.
pub fn check_table(store: &dyn Store, config: &Config, table: &TableConfig) -> Result<()> {
    info!("table '{}': running post-load checks", table.name);
    store.begin()?;
    let result = (|| {
        check_tree_foreign_key(store, table)?;
        check_under(store, config, table)?;
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

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::loader::load_config;
    use crate::schema::generate_ddl;
    use crate::store::DuckDbStore;

    fn write_tree_config(dir: &std::path::Path) -> std::path::PathBuf {
        let table_path = dir.join("table.tsv");
        std::fs::write(
            &table_path,
            "table\tpath\ttype\n\
             table\ttable.tsv\ttable\n\
             column\tcolumn.tsv\tcolumn\n\
             datatype\tdatatype.tsv\tdatatype\n\
             term\tterm.tsv\t\n",
        )
        .unwrap();
        std::fs::write(
            dir.join("column.tsv"),
            "table\tcolumn\tnulltype\tdatatype\tstructure\tdescription\n\
             term\tid\t\tword\tprimary\tid\n\
             term\tparent\tempty\tword\ttree(id)\tparent\n",
        )
        .unwrap();
        std::fs::write(
            dir.join("datatype.tsv"),
            "datatype\tparent\tcondition\tSQL type\tdescription\n\
             text\t\t\ttext\tany text\n\
             empty\ttext\tequals('')\t\tempty\n\
             word\ttext\texclude(/\\s/)\t\tword\n",
        )
        .unwrap();
        table_path
    }

    #[test]
    fn flags_parent_value_missing_from_child_column() {
        let dir = tempfile::tempdir().unwrap();
        let table_path = write_tree_config(dir.path());
        let config = load_config(&table_path).unwrap();
        let table = config.get_table("term").unwrap();
        let store = DuckDbStore::open_in_memory().unwrap();
        let ddl = generate_ddl(&config, table).unwrap();
        for stmt in ddl.statements() {
            store.exec_script(stmt).unwrap();
        }
        store
            .exec_with_params(
                "INSERT INTO term (row_number, id, parent) VALUES (?, ?, ?);",
                &[Param::Integer(1), Param::Text("root".into()), Param::Null],
            )
            .unwrap();
        store
            .exec_with_params(
                "INSERT INTO term (row_number, id, parent) VALUES (?, ?, ?);",
                &[Param::Integer(2), Param::Text("child".into()), Param::Text("ghost".into())],
            )
            .unwrap();

        check_table(&store, &config, table).unwrap();

        let rows = store
            .query_rows("SELECT parent, parent_meta FROM term WHERE row_number = 2;", &[])
            .unwrap();
        assert_eq!(rows[0][0], None);
        assert!(rows[0][1].as_ref().unwrap().contains("tree:foreign"));
    }
}
