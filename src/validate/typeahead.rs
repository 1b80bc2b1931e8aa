//! Typeahead lookups: given a table/column and a partial string, return
//! the set of values a client-side autocomplete widget should offer.
//! Shares its lookup logic closely with the `from`/`under` structure
//! checks Phase A already compiles (`crate::condition::Structure`).

use ahash::AHashSet;
use anyhow::{Context, Result};

use crate::condition::Structure;
use crate::config::Config;
use crate::errors::ConfigError;
use crate::store::{Param, Store};

/// One suggested value, in the shape a typeahead widget expects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suggestion {
    pub id: String,
    pub label: String,
    pub order: u32,
}

fn to_suggestions(values: impl IntoIterator<Item = String>) -> Vec<Suggestion> {
    values
        .into_iter()
        .enumerate()
        .map(|(i, v)| Suggestion {
            id: v.clone(),
            label: v,
            order: (i + 1) as u32,
        })
        .collect()
}

/// Look up matching values for `table.column`, filtered by `matching`
/// (substring match, case-sensitive like the original; empty string means
/// "no filter"). Three sources, in priority order: an `in(...)` datatype's
/// enumerated literals, a `from(...)` structure's foreign column, or an
/// `under(...)` structure's tree subtree.
pub fn get_matching_values(
    store: &dyn Store,
    config: &Config,
    table_name: &str,
    column_name: &str,
    matching: &str,
) -> Result<Vec<Suggestion>> {
    let table = config
        .get_table(table_name)
        .ok_or_else(|| ConfigError::new(format!("no such table '{}'", table_name)))?;
    let column = table
        .get_column(column_name)
        .ok_or_else(|| ConfigError::new(format!("no such column '{}.{}'", table_name, column_name)))?;

    if let Some(dt) = config.datatype(column.datatype) {
        if let Some(predicate) = dt.predicate() {
            if let Some(enumerated) = predicate.enumerated_values() {
                let values = enumerated.iter().filter(|v| v.contains(matching)).cloned();
                return Ok(to_suggestions(values));
            }
        }
    }

    let pattern = if matching.is_empty() {
        "%".to_string()
    } else {
        format!("%{}%", matching)
    };

    match &column.structure {
        Some(Structure::From { ftable, fcolumn }) => {
            let sql = format!("SELECT \"{}\" FROM \"{}\" WHERE \"{}\" LIKE ? ORDER BY \"{}\";", fcolumn, ftable, fcolumn, fcolumn);
            let rows = store
                .query_rows(&sql, &[Param::Text(pattern)])
                .with_context(|| format!("typeahead lookup failed for {}.{}", ftable, fcolumn))?;
            let values = rows.into_iter().filter_map(|r| r.into_iter().next().flatten());
            Ok(to_suggestions(values))
        }
        Some(Structure::Under { ttable, tcolumn, value }) => {
            let tree_table = config
                .get_table(ttable)
                .ok_or_else(|| ConfigError::new(format!("no such tree table '{}'", ttable)))?;
            let tcolumn_id = tree_table
                .get_column_id(tcolumn)
                .ok_or_else(|| ConfigError::new(format!("no such tree column '{}.{}'", ttable, tcolumn)))?;
            let tree = tree_table
                .constraints
                .tree
                .iter()
                .find(|t| t.child == tcolumn_id)
                .ok_or_else(|| ConfigError::new(format!("no tree: '{}.{}' found", ttable, tcolumn)))?;
            let parent_col = tree_table.column(tree.parent).expect("tree constraint names a real parent column").name.clone();

            let sql = format!(
                "WITH RECURSIVE tree AS ( \
                    SELECT \"{child}\", \"{parent}\" FROM \"{table}\" WHERE \"{child}\" = ? \
                    UNION ALL \
                    SELECT t1.\"{child}\", t1.\"{parent}\" FROM \"{table}\" AS t1 \
                    JOIN tree AS t2 ON t2.\"{parent}\" = t1.\"{child}\" \
                ) SELECT \"{child}\" FROM tree WHERE \"{child}\" LIKE ?;",
                child = tcolumn,
                parent = parent_col,
                table = ttable,
            );
            let rows = store
                .query_rows(&sql, &[Param::Text(value.clone()), Param::Text(pattern)])
                .with_context(|| format!("typeahead subtree lookup failed for {}.{}", ttable, tcolumn))?;
            let values: AHashSet<String> = rows.into_iter().filter_map(|r| r.into_iter().next().flatten()).collect();
            let mut values: Vec<String> = values.into_iter().collect();
            values.sort();
            Ok(to_suggestions(values))
        }
        _ => Ok(Vec::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::loader::load_config;
    use crate::store::DuckDbStore;

    fn write_config(dir: &std::path::Path) -> std::path::PathBuf {
        let table_path = dir.join("table.tsv");
        std::fs::write(
            &table_path,
            "table\tpath\ttype\n\
             table\ttable.tsv\ttable\n\
             column\tcolumn.tsv\tcolumn\n\
             datatype\tdatatype.tsv\tdatatype\n\
             species\tspecies.tsv\t\n\
             sample\tsample.tsv\t\n",
        )
        .unwrap();
        std::fs::write(
            dir.join("column.tsv"),
            "table\tcolumn\tnulltype\tdatatype\tstructure\tdescription\n\
             species\tname\t\tword\tprimary\tname\n\
             sample\tcategory\t\tcategory\t\tcategory\n\
             sample\tspecies\t\tword\tfrom(species.name)\tspecies\n",
        )
        .unwrap();
        std::fs::write(
            dir.join("datatype.tsv"),
            "datatype\tparent\tcondition\tSQL type\tdescription\n\
             text\t\t\ttext\tany text\n\
             word\ttext\texclude(/\\s/)\t\tword\n\
             category\ttext\tin('alpha','beta','gamma')\t\tan enumerated category\n",
        )
        .unwrap();
        table_path
    }

    #[test]
    fn returns_enumerated_in_values_filtered_by_substring() {
        let dir = tempfile::tempdir().unwrap();
        let table_path = write_config(dir.path());
        let config = load_config(&table_path).unwrap();
        let store = DuckDbStore::open_in_memory().unwrap();
        let suggestions = get_matching_values(&store, &config, "sample", "category", "a").unwrap();
        let labels: Vec<&str> = suggestions.iter().map(|s| s.label.as_str()).collect();
        assert_eq!(labels, vec!["alpha", "beta", "gamma"]);
    }

    #[test]
    fn returns_foreign_column_values_from_live_table() {
        let dir = tempfile::tempdir().unwrap();
        let table_path = write_config(dir.path());
        let config = load_config(&table_path).unwrap();
        let store = DuckDbStore::open_in_memory().unwrap();
        store.exec_script("CREATE TABLE species (name TEXT);").unwrap();
        store
            .exec_with_params("INSERT INTO species VALUES (?);", &[Param::Text("homo sapiens".into())])
            .unwrap();
        store
            .exec_with_params("INSERT INTO species VALUES (?);", &[Param::Text("mus musculus".into())])
            .unwrap();
        let suggestions = get_matching_values(&store, &config, "sample", "species", "mus").unwrap();
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].label, "mus musculus");
    }
}
