//! Schema generator: emits DDL for each configured table, its shadow
//! conflict table, the union view, and supporting indexes. SQL storage
//! types are restricted to `{text, integer, real, blob}`.

use crate::config::{Config, TableConfig};
use crate::errors::ConfigError;

pub const ALLOWED_SQL_TYPES: &[&str] = &["text", "integer", "real", "blob"];

/// Map a configured SQL storage type to its DuckDB column type keyword.
pub fn duckdb_type_for(sql_type: &str) -> Result<&'static str, ConfigError> {
    match sql_type {
        "text" => Ok("TEXT"),
        "integer" => Ok("INTEGER"),
        "real" => Ok("REAL"),
        "blob" => Ok("BLOB"),
        other => Err(ConfigError::new(format!(
            "unsupported SQL storage type '{}': must be one of {:?}",
            other, ALLOWED_SQL_TYPES
        ))),
    }
}

/// The full set of statements needed to stand up one configured table.
#[derive(Debug, Clone)]
pub struct TableDdl {
    pub main_create: String,
    pub conflict_create: String,
    pub view_create: String,
    pub index_statements: Vec<String>,
}

impl TableDdl {
    /// All statements in the order they must execute: main table, conflict
    /// table, indexes, then the view that unions both.
    pub fn statements(&self) -> Vec<&str> {
        let mut stmts = vec![self.main_create.as_str(), self.conflict_create.as_str()];
        stmts.extend(self.index_statements.iter().map(|s| s.as_str()));
        stmts.push(self.view_create.as_str());
        stmts
    }
}

/// Generate the DDL for one table. `table` must belong to `config`.
pub fn generate_ddl(config: &Config, table: &TableConfig) -> Result<TableDdl, ConfigError> {
    let mut main_cols = vec!["  \"row_number\" INTEGER".to_string()];
    let mut conflict_cols = vec!["  \"row_number\" INTEGER".to_string()];

    for column in &table.columns {
        let dt = config
            .datatype(column.datatype)
            .expect("column.datatype always indexes a loaded datatype");
        let sql_type = config.resolve_sql_type(column.datatype).ok_or_else(|| {
            ConfigError::new(format!(
                "column '{}.{}': datatype '{}' has no SQL type in its ancestor chain",
                table.name, column.name, dt.name
            ))
        })?;
        let duck_type = duckdb_type_for(sql_type)?;
        main_cols.push(format!("  \"{}\" {}", column.name, duck_type));
        main_cols.push(format!("  \"{}_meta\" TEXT", column.name));
        conflict_cols.push(format!("  \"{}\" {}", column.name, duck_type));
        conflict_cols.push(format!("  \"{}_meta\" TEXT", column.name));
    }

    let mut key_clauses = Vec::new();
    if let Some(pk) = table.constraints.primary {
        let col = table.column(pk).expect("primary constraint names a real column");
        key_clauses.push(format!("  PRIMARY KEY (\"{}\")", col.name));
    }
    for &unique in &table.constraints.unique {
        let col = table.column(unique).expect("unique constraint names a real column");
        key_clauses.push(format!("  UNIQUE (\"{}\")", col.name));
    }
    for fk in &table.constraints.foreign {
        let col = table.column(fk.column).expect("foreign constraint names a real column");
        let ftable = config.table(fk.ftable).expect("foreign constraint names a real table");
        let fcol = ftable
            .column(fk.fcolumn)
            .expect("foreign constraint names a real foreign column");
        key_clauses.push(format!(
            "  FOREIGN KEY (\"{}\") REFERENCES \"{}\"(\"{}\")",
            col.name, ftable.name, fcol.name
        ));
    }

    let mut main_body = main_cols.clone();
    main_body.extend(key_clauses);
    let main_create = format!("CREATE TABLE \"{}\" (\n{}\n);", table.name, main_body.join(",\n"));

    // The conflict table shares the column list but drops every key/FK
    // clause so conflicting data can coexist.
    let conflict_create = format!(
        "CREATE TABLE \"{}_conflict\" (\n{}\n);",
        table.name,
        conflict_cols.join(",\n")
    );

    let col_list: Vec<String> = std::iter::once("\"row_number\"".to_string())
        .chain(
            table
                .columns
                .iter()
                .flat_map(|c| vec![format!("\"{}\"", c.name), format!("\"{}_meta\"", c.name)]),
        )
        .collect();
    let view_create = format!(
        "CREATE VIEW \"{0}_view\" AS SELECT {1} FROM \"{0}\" UNION ALL SELECT {1} FROM \"{0}_conflict\";",
        table.name,
        col_list.join(", ")
    );

    let mut index_statements = vec![format!(
        "CREATE UNIQUE INDEX \"{0}_row_number_idx\" ON \"{0}\"(\"row_number\");",
        table.name
    )];
    for tree in &table.constraints.tree {
        let already_unique =
            table.constraints.primary == Some(tree.child) || table.constraints.unique.contains(&tree.child);
        if !already_unique {
            let col = table.column(tree.child).expect("tree constraint names a real child column");
            index_statements.push(format!(
                "CREATE UNIQUE INDEX \"{0}_{1}_idx\" ON \"{0}\"(\"{1}\");",
                table.name, col.name
            ));
        }
    }

    Ok(TableDdl {
        main_create,
        conflict_create,
        view_create,
        index_statements,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::loader::load_config;

    fn write_config(dir: &std::path::Path) -> std::path::PathBuf {
        let table_path = dir.join("table.tsv");
        std::fs::write(
            &table_path,
            "table\tpath\ttype\n\
             table\ttable.tsv\ttable\n\
             column\tcolumn.tsv\tcolumn\n\
             datatype\tdatatype.tsv\tdatatype\n\
             foobar\tfoobar.tsv\t\n",
        )
        .unwrap();
        std::fs::write(
            dir.join("column.tsv"),
            "table\tcolumn\tnulltype\tdatatype\tstructure\tdescription\n\
             foobar\tid\t\tword\tprimary\tid\n\
             foobar\tlabel\t\tword\tunique\tlabel\n",
        )
        .unwrap();
        std::fs::write(
            dir.join("datatype.tsv"),
            "datatype\tparent\tcondition\tSQL type\tdescription\n\
             text\t\t\ttext\tany text\n\
             empty\ttext\tequals('')\t\tempty\n\
             line\ttext\texclude(/\\n/)\t\tline\n\
             word\tline\texclude(/\\s/)\t\tword\n",
        )
        .unwrap();
        table_path
    }

    #[test]
    fn generates_expected_ddl_shape() {
        let dir = tempfile::tempdir().unwrap();
        let table_path = write_config(dir.path());
        let config = load_config(&table_path).unwrap();
        let foobar = config.get_table("foobar").unwrap();
        let ddl = generate_ddl(&config, foobar).unwrap();
        assert!(ddl.main_create.contains("PRIMARY KEY (\"id\")"));
        assert!(ddl.main_create.contains("UNIQUE (\"label\")"));
        assert!(ddl.conflict_create.contains("\"id\" TEXT"));
        assert!(!ddl.conflict_create.contains("PRIMARY KEY"));
        assert!(ddl.view_create.contains("UNION ALL"));
        assert!(ddl.index_statements[0].contains("row_number_idx"));
    }
}
