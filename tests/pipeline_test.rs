//! End-to-end tests driving the whole pipeline the way `load` does: load a
//! configuration, resolve table order, stand up the schema, run the
//! scheduler, then the post-load checker, against an in-memory store.

use tabvalid::config::load_config;
use tabvalid::store::{DuckDbStore, Store};
use tabvalid::{graph, postload, scheduler, schema};

/// Loads every data table in `dir` (which must contain a `table.tsv`) into
/// a fresh in-memory database, same order and steps as the `load` command.
fn run_pipeline(dir: &std::path::Path) -> DuckDbStore {
    let table_path = dir.join("table.tsv");
    let config = load_config(&table_path).unwrap();

    for table in config.iter_tables() {
        graph::check_tree_cycles(&config, table.id).unwrap();
    }
    let order = graph::resolve_order(&config).unwrap();

    let store = DuckDbStore::open_in_memory().unwrap();
    let pool_size = 1;
    for table_id in order {
        let table = config.table(table_id).unwrap();
        if !table.table_type.is_empty() {
            continue;
        }
        let ddl = schema::generate_ddl(&config, table).unwrap();
        for stmt in ddl.statements() {
            store.exec_script(stmt).unwrap();
        }
        scheduler::load_table(&store, &config, table, scheduler::DEFAULT_CHUNK_SIZE, pool_size).unwrap();
        postload::check_table(&store, &config, table).unwrap();
    }
    store
}

fn write(dir: &std::path::Path, name: &str, contents: &str) {
    std::fs::write(dir.join(name), contents).unwrap();
}

fn base_datatypes() -> &'static str {
    "datatype\tparent\tcondition\tSQL type\tdescription\n\
     text\t\t\ttext\tany text\n\
     empty\ttext\tequals('')\t\tempty\n\
     word\ttext\texclude(/\\s/)\t\tword\n"
}

#[test]
fn cycle_in_tree_routes_offending_row_to_conflict() {
    let dir = tempfile::tempdir().unwrap();
    write(
        &dir.path(),
        "table.tsv",
        "table\tpath\ttype\n\
         table\ttable.tsv\ttable\n\
         column\tcolumn.tsv\tcolumn\n\
         datatype\tdatatype.tsv\tdatatype\n\
         foobar\tfoobar.tsv\t\n",
    );
    write(
        &dir.path(),
        "column.tsv",
        "table\tcolumn\tnulltype\tdatatype\tstructure\tdescription\n\
         foobar\tchild\t\tword\tprimary\ttree child\n\
         foobar\tparent\tempty\tword\ttree(child)\ttree parent\n",
    );
    write(&dir.path(), "datatype.tsv", base_datatypes());
    write(&dir.path(), "foobar.tsv", "child\tparent\nb\tf\nf\tb\n");

    let store = run_pipeline(dir.path());

    let main_count: i64 = store
        .query_rows("SELECT COUNT(*) FROM foobar;", &[])
        .unwrap()[0][0]
        .as_deref()
        .unwrap()
        .parse()
        .unwrap();
    assert_eq!(main_count, 1);

    let conflict = store.query_rows("SELECT child, child_meta FROM foobar_conflict;", &[]).unwrap();
    assert_eq!(conflict.len(), 1);
    assert_eq!(conflict[0][0].as_deref(), Some("f"));
    assert!(conflict[0][1].as_ref().unwrap().contains("tree:cycle"));
}

#[test]
fn undefined_prefix_fails_foreign_key_check() {
    let dir = tempfile::tempdir().unwrap();
    write(
        &dir.path(),
        "table.tsv",
        "table\tpath\ttype\n\
         table\ttable.tsv\ttable\n\
         column\tcolumn.tsv\tcolumn\n\
         datatype\tdatatype.tsv\tdatatype\n\
         prefix\tprefix.tsv\t\n\
         import\timport.tsv\t\n",
    );
    write(
        &dir.path(),
        "column.tsv",
        "table\tcolumn\tnulltype\tdatatype\tstructure\tdescription\n\
         prefix\tprefix\t\tword\tprimary\tknown prefix\n\
         import\tid\t\tword\tprimary\tidentifier\n\
         import\tsource\t\tword\tfrom(prefix.prefix)\tsource prefix\n",
    );
    write(&dir.path(), "datatype.tsv", base_datatypes());
    write(&dir.path(), "prefix.tsv", "prefix\nCOB\n");
    write(&dir.path(), "import.tsv", "id\tsource\nZOB:0000013\tZOB\n");

    let store = run_pipeline(dir.path());

    // `source` isn't a uniqueness column (only `id` is), so the row still
    // lands in the main table with `source` nulled out and its failure
    // recorded in `source_meta`.
    let rows = store
        .query_rows("SELECT source, source_meta FROM import;", &[])
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][0], None);
    let meta: serde_json::Value = serde_json::from_str(rows[0][1].as_ref().unwrap()).unwrap();
    assert_eq!(meta["valid"], false);
    assert_eq!(meta["value"], "ZOB");
    assert_eq!(meta["messages"][0]["rule"], "key:foreign");

    let conflict_count: i64 = store
        .query_rows("SELECT COUNT(*) FROM import_conflict;", &[])
        .unwrap()[0][0]
        .as_deref()
        .unwrap()
        .parse()
        .unwrap();
    assert_eq!(conflict_count, 0);
}

#[test]
fn duplicate_primary_key_routes_second_row_to_conflict() {
    let dir = tempfile::tempdir().unwrap();
    write(
        &dir.path(),
        "table.tsv",
        "table\tpath\ttype\n\
         table\ttable.tsv\ttable\n\
         column\tcolumn.tsv\tcolumn\n\
         datatype\tdatatype.tsv\tdatatype\n\
         item\titem.tsv\t\n",
    );
    write(
        &dir.path(),
        "column.tsv",
        "table\tcolumn\tnulltype\tdatatype\tstructure\tdescription\n\
         item\tlabel\t\tword\tprimary\tlabel\n",
    );
    write(&dir.path(), "datatype.tsv", base_datatypes());
    write(&dir.path(), "item.tsv", "label\ncar\ncar\n");

    let store = run_pipeline(dir.path());

    let main = store.query_rows("SELECT label FROM item;", &[]).unwrap();
    assert_eq!(main.len(), 1);
    assert_eq!(main[0][0].as_deref(), Some("car"));

    let conflict = store.query_rows("SELECT label, label_meta FROM item_conflict;", &[]).unwrap();
    assert_eq!(conflict.len(), 1);
    assert_eq!(conflict[0][0], None);
    assert!(conflict[0][1].as_ref().unwrap().contains("key:primary"));
}

#[test]
fn value_outside_declared_tree_fails_under_check() {
    let dir = tempfile::tempdir().unwrap();
    write(
        &dir.path(),
        "table.tsv",
        "table\tpath\ttype\n\
         table\ttable.tsv\ttable\n\
         column\tcolumn.tsv\tcolumn\n\
         datatype\tdatatype.tsv\tdatatype\n\
         foobar\tfoobar.tsv\t\n",
    );
    write(
        &dir.path(),
        "column.tsv",
        "table\tcolumn\tnulltype\tdatatype\tstructure\tdescription\n\
         foobar\tchild\t\tword\tprimary\ttree child\n\
         foobar\tparent\tempty\tword\ttree(child)\ttree parent\n\
         foobar\txyzzy\t\tword\tunder(foobar.child, 'root')\tmust stay under root\n",
    );
    write(&dir.path(), "datatype.tsv", base_datatypes());
    write(&dir.path(), "foobar.tsv", "child\tparent\txyzzy\nroot\t\tw\n");

    let store = run_pipeline(dir.path());

    let rows = store.query_rows("SELECT xyzzy, xyzzy_meta FROM foobar;", &[]).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][0], None);
    assert!(rows[0][1].as_ref().unwrap().contains("under:not-in-tree"));
}

#[test]
fn rule_firing_invalidates_dependent_column() {
    let dir = tempfile::tempdir().unwrap();
    write(
        &dir.path(),
        "table.tsv",
        "table\tpath\ttype\n\
         table\ttable.tsv\ttable\n\
         column\tcolumn.tsv\tcolumn\n\
         datatype\tdatatype.tsv\tdatatype\n\
         rule\trule.tsv\trule\n\
         item\titem.tsv\t\n",
    );
    write(
        &dir.path(),
        "column.tsv",
        "table\tcolumn\tnulltype\tdatatype\tstructure\tdescription\n\
         item\ta\t\tword\t\tdiscriminator\n\
         item\tb\tempty\tword\t\trequired when a starts with x\n",
    );
    write(&dir.path(), "datatype.tsv", base_datatypes());
    write(
        &dir.path(),
        "rule.tsv",
        "table\twhen column\twhen condition\tthen column\tthen condition\tlevel\tdescription\n\
         item\ta\tmatch(/^x/)\tb\tnot null\twarning\tb is required when a starts with x\n",
    );
    write(&dir.path(), "item.tsv", "a\tb\nxyz\t\n");

    let store = run_pipeline(dir.path());

    // `b` isn't a uniqueness column either, so the rule failure still lands
    // the row in the main table, just with `b` nulled out and its failure
    // recorded in `b_meta`.
    let rows = store.query_rows("SELECT b, b_meta FROM item;", &[]).unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0][0], None);
    let meta: serde_json::Value = serde_json::from_str(rows[0][1].as_ref().unwrap()).unwrap();
    assert_eq!(meta["valid"], false);
    assert_eq!(meta["messages"][0]["rule"], "rule:b-1");
    assert_eq!(meta["messages"][0]["level"], "warning");
}

#[test]
fn view_unions_main_and_conflict_rows_without_duplicate_row_numbers() {
    let dir = tempfile::tempdir().unwrap();
    write(
        &dir.path(),
        "table.tsv",
        "table\tpath\ttype\n\
         table\ttable.tsv\ttable\n\
         column\tcolumn.tsv\tcolumn\n\
         datatype\tdatatype.tsv\tdatatype\n\
         item\titem.tsv\t\n",
    );
    write(
        &dir.path(),
        "column.tsv",
        "table\tcolumn\tnulltype\tdatatype\tstructure\tdescription\n\
         item\tlabel\t\tword\tprimary\tlabel\n",
    );
    write(&dir.path(), "datatype.tsv", base_datatypes());
    write(&dir.path(), "item.tsv", "label\ncar\ncar\ntruck\n");

    let store = run_pipeline(dir.path());

    let view_count: i64 = store
        .query_rows("SELECT COUNT(*) FROM item_view;", &[])
        .unwrap()[0][0]
        .as_deref()
        .unwrap()
        .parse()
        .unwrap();
    assert_eq!(view_count, 3);

    let row_numbers = store.query_rows("SELECT row_number FROM item_view;", &[]).unwrap();
    let mut seen = std::collections::HashSet::new();
    for row in &row_numbers {
        let n = row[0].as_deref().unwrap().to_string();
        assert!(seen.insert(n), "row_number appeared twice in item_view");
    }
}
