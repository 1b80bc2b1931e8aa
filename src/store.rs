//! The narrow database abstraction: keeps the SQL surface behind
//! `exec_script`/`exec_with_params`/`query_rows`/`begin`/`commit` so the
//! validation core is testable against an in-memory connection and so any
//! JSON-function differences between drivers stay isolated here. DuckDB
//! is the concrete backend, opened as a single file `db_dir/valve.duckdb`.

use std::path::Path;

use anyhow::{Context, Result};
use duckdb::types::{Value, ValueRef};
use duckdb::Connection;

/// One parameter bound into a prepared statement. `exec_with_params` always
/// binds values this way rather than interpolating strings into SQL text.
#[derive(Debug, Clone)]
pub enum Param {
    Text(String),
    Integer(i64),
    Null,
}

impl From<&str> for Param {
    fn from(s: &str) -> Self {
        Param::Text(s.to_string())
    }
}

impl From<String> for Param {
    fn from(s: String) -> Self {
        Param::Text(s)
    }
}

impl From<i64> for Param {
    fn from(n: i64) -> Self {
        Param::Integer(n)
    }
}

impl From<u64> for Param {
    fn from(n: u64) -> Self {
        Param::Integer(n as i64)
    }
}

impl duckdb::ToSql for Param {
    fn to_sql(&self) -> duckdb::Result<duckdb::types::ToSqlOutput<'_>> {
        let value = match self {
            Param::Text(s) => Value::Text(s.clone()),
            Param::Integer(n) => Value::BigInt(*n),
            Param::Null => Value::Null,
        };
        Ok(duckdb::types::ToSqlOutput::Owned(value))
    }
}

/// A row of loosely-typed scalar results from `query_rows`.
pub type ResultRow = Vec<Option<String>>;

/// The narrow DB surface the validation core is built against.
pub trait Store {
    fn exec_script(&self, sql: &str) -> Result<()>;
    fn exec_with_params(&self, sql: &str, params: &[Param]) -> Result<usize>;
    fn query_rows(&self, sql: &str, params: &[Param]) -> Result<Vec<ResultRow>>;
    fn begin(&self) -> Result<()>;
    fn commit(&self) -> Result<()>;
    fn rollback(&self) -> Result<()>;
}

/// DuckDB-backed `Store`, opened as a single file under the destination
/// directory (`db_dir`).
pub struct DuckDbStore {
    conn: Connection,
}

impl DuckDbStore {
    pub fn open(db_dir: impl AsRef<Path>) -> Result<Self> {
        let db_dir = db_dir.as_ref();
        std::fs::create_dir_all(db_dir)
            .with_context(|| format!("cannot create database directory {}", db_dir.display()))?;
        let path = db_dir.join("valve.duckdb");
        let conn = Connection::open(&path)
            .with_context(|| format!("cannot open DuckDB database at {}", path.display()))?;
        Ok(Self { conn })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory().context("cannot open in-memory DuckDB database")?;
        Ok(Self { conn })
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl Store for DuckDbStore {
    fn exec_script(&self, sql: &str) -> Result<()> {
        self.conn
            .execute_batch(sql)
            .with_context(|| format!("failed to execute script:\n{}", sql))
    }

    fn exec_with_params(&self, sql: &str, params: &[Param]) -> Result<usize> {
        let refs: Vec<&dyn duckdb::ToSql> = params.iter().map(|p| p as &dyn duckdb::ToSql).collect();
        self.conn
            .execute(sql, refs.as_slice())
            .with_context(|| format!("failed to execute statement: {}", sql))
    }

    fn query_rows(&self, sql: &str, params: &[Param]) -> Result<Vec<ResultRow>> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .with_context(|| format!("failed to prepare query: {}", sql))?;
        let refs: Vec<&dyn duckdb::ToSql> = params.iter().map(|p| p as &dyn duckdb::ToSql).collect();
        let mut rows_result = stmt
            .query(refs.as_slice())
            .with_context(|| format!("failed to execute query: {}", sql))?;

        let mut rows = Vec::new();
        while let Some(row) = rows_result.next()? {
            let column_count = row.as_ref().column_count();
            let mut values = Vec::with_capacity(column_count);
            for i in 0..column_count {
                let value = match row.get_ref(i) {
                    Ok(ValueRef::Null) => None,
                    Ok(ValueRef::Text(s)) => Some(String::from_utf8_lossy(s).to_string()),
                    Ok(ValueRef::Int(n)) => Some(n.to_string()),
                    Ok(ValueRef::BigInt(n)) => Some(n.to_string()),
                    Ok(ValueRef::Double(f)) => Some(f.to_string()),
                    Ok(ValueRef::Float(f)) => Some(f.to_string()),
                    Ok(ValueRef::Blob(b)) => Some(format!("<blob {} bytes>", b.len())),
                    Ok(other) => Some(format!("{:?}", other)),
                    Err(e) => return Err(e).context("failed to read column value"),
                };
                values.push(value);
            }
            rows.push(values);
        }
        Ok(rows)
    }

    fn begin(&self) -> Result<()> {
        self.exec_script("BEGIN TRANSACTION;")
    }

    fn commit(&self) -> Result<()> {
        self.exec_script("COMMIT;")
    }

    fn rollback(&self) -> Result<()> {
        self.exec_script("ROLLBACK;")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_values_through_params() {
        let store = DuckDbStore::open_in_memory().unwrap();
        store.exec_script("CREATE TABLE t (a INTEGER, b TEXT);").unwrap();
        store
            .exec_with_params(
                "INSERT INTO t VALUES (?, ?);",
                &[Param::Integer(1), Param::Text("hello".into())],
            )
            .unwrap();
        store
            .exec_with_params("INSERT INTO t VALUES (?, ?);", &[Param::Null, Param::Null])
            .unwrap();
        let rows = store.query_rows("SELECT a, b FROM t ORDER BY a NULLS LAST;", &[]).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], vec![Some("1".to_string()), Some("hello".to_string())]);
        assert_eq!(rows[1], vec![None, None]);
    }

    #[test]
    fn transaction_commit_persists() {
        let store = DuckDbStore::open_in_memory().unwrap();
        store.exec_script("CREATE TABLE t (a INTEGER);").unwrap();
        store.begin().unwrap();
        store.exec_with_params("INSERT INTO t VALUES (?);", &[Param::Integer(5)]).unwrap();
        store.commit().unwrap();
        let rows = store.query_rows("SELECT a FROM t;", &[]).unwrap();
        assert_eq!(rows.len(), 1);
    }
}
