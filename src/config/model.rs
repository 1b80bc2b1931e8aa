//! The compiled configuration: tables, columns, datatypes and rules, held
//! in arena-style registries indexed by name so that references between
//! them (and cycles in user data) are graph-walk problems rather than
//! ownership problems.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use ahash::AHashMap;

use crate::condition::{ConditionNode, Expr, Structure};

/// Identifies a datatype within `Config::datatype_defs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DatatypeId(pub u32);

impl fmt::Display for DatatypeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DatatypeId({})", self.0)
    }
}

/// Identifies a table within `Config::table_configs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TableId(pub u32);

impl fmt::Display for TableId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TableId({})", self.0)
    }
}

/// Identifies a column within its owning `TableConfig::columns`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ColumnId(pub u16);

impl fmt::Display for ColumnId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ColumnId({})", self.0)
    }
}

/// A named type: optional parent (forming a tree rooted at `text`), an
/// optional compiled condition, and a SQL storage type inherited from the
/// nearest ancestor that declares one.
#[derive(Debug, Clone)]
pub struct Datatype {
    pub name: String,
    pub id: DatatypeId,
    pub parent: Option<DatatypeId>,
    pub condition_expr: Option<Expr>,
    pub condition: Option<Arc<ConditionNode>>,
    pub sql_type: Option<String>,
    pub description: String,
}

impl Datatype {
    pub fn predicate(&self) -> Option<&Arc<ConditionNode>> {
        self.condition.as_ref()
    }
}

/// A column belonging to exactly one table.
#[derive(Debug, Clone)]
pub struct Column {
    pub name: String,
    pub id: ColumnId,
    pub table: TableId,
    pub datatype: DatatypeId,
    pub nulltype: Option<DatatypeId>,
    pub structure_expr: Option<Expr>,
    pub structure: Option<Structure>,
    pub description: String,
}

/// `T.col -> ftable.fcol`.
#[derive(Debug, Clone)]
pub struct ForeignConstraint {
    pub column: ColumnId,
    pub ftable: TableId,
    pub fcolumn: ColumnId,
}

/// A self-referential `(child, parent)` edge within one table.
#[derive(Debug, Clone)]
pub struct TreeConstraint {
    pub child: ColumnId,
    pub parent: ColumnId,
}

/// `under(ttable.tcolumn, value)` on `column`.
#[derive(Debug, Clone)]
pub struct UnderConstraint {
    pub column: ColumnId,
    pub ttable: TableId,
    pub tcolumn: ColumnId,
    pub value: String,
}

/// The five named constraint sets per table.
#[derive(Debug, Clone, Default)]
pub struct Constraints {
    pub primary: Option<ColumnId>,
    pub unique: Vec<ColumnId>,
    pub foreign: Vec<ForeignConstraint>,
    pub tree: Vec<TreeConstraint>,
    pub under: Vec<UnderConstraint>,
}

impl Constraints {
    /// Columns whose invalidity routes the row to the conflict table: the
    /// union of primary, unique, and tree-child columns.
    pub fn uniqueness_columns(&self) -> Vec<ColumnId> {
        let mut cols: Vec<ColumnId> = Vec::new();
        cols.extend(self.primary);
        cols.extend(self.unique.iter().copied());
        cols.extend(self.tree.iter().map(|t| t.child));
        cols
    }
}

/// One configured table: its file path, type, columns, and constraints.
#[derive(Debug, Clone)]
pub struct TableConfig {
    pub name: String,
    pub id: TableId,
    pub path: PathBuf,
    pub table_type: String,
    pub columns: Vec<Column>,
    pub constraints: Constraints,
}

impl TableConfig {
    pub fn get_column(&self, name: &str) -> Option<&Column> {
        self.columns.iter().find(|c| c.name == name)
    }

    pub fn get_column_id(&self, name: &str) -> Option<ColumnId> {
        self.get_column(name).map(|c| c.id)
    }

    pub fn column(&self, id: ColumnId) -> Option<&Column> {
        self.columns.get(id.0 as usize)
    }

    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

/// Either side of a `Rule`'s condition: a compiled DSL expression, or one of
/// the literals `null` / `not null`.
#[derive(Debug, Clone)]
pub enum RuleCondition {
    Expr(Arc<ConditionNode>),
    Null,
    NotNull,
}

/// A conditional integrity constraint.
#[derive(Debug, Clone)]
pub struct Rule {
    pub table: TableId,
    pub when_column: ColumnId,
    pub when_condition: RuleCondition,
    pub then_column: ColumnId,
    pub then_condition: RuleCondition,
    pub level: String,
    pub description: String,
}

/// The resolved concrete table names backing the four special roles.
#[derive(Debug, Clone)]
pub struct SpecialTables {
    pub table: TableId,
    pub column: TableId,
    pub datatype: TableId,
    pub rule: Option<TableId>,
}

/// The fully loaded, compiled configuration. Immutable after load and
/// freely shared read-only across validation workers.
#[derive(Debug, Clone)]
pub struct Config {
    pub tables: AHashMap<String, TableId>,
    pub table_configs: Vec<TableConfig>,
    pub datatypes: AHashMap<String, DatatypeId>,
    pub datatype_defs: Vec<Datatype>,
    pub rules: Vec<Rule>,
    pub special: SpecialTables,
}

impl Config {
    pub fn get_table_id(&self, name: &str) -> Option<TableId> {
        self.tables.get(name).copied()
    }

    pub fn table(&self, id: TableId) -> Option<&TableConfig> {
        self.table_configs.get(id.0 as usize)
    }

    pub fn table_mut(&mut self, id: TableId) -> Option<&mut TableConfig> {
        self.table_configs.get_mut(id.0 as usize)
    }

    pub fn get_table(&self, name: &str) -> Option<&TableConfig> {
        self.get_table_id(name).and_then(|id| self.table(id))
    }

    pub fn get_datatype_id(&self, name: &str) -> Option<DatatypeId> {
        self.datatypes.get(name).copied()
    }

    pub fn datatype(&self, id: DatatypeId) -> Option<&Datatype> {
        self.datatype_defs.get(id.0 as usize)
    }

    pub fn get_datatype(&self, name: &str) -> Option<&Datatype> {
        self.get_datatype_id(name).and_then(|id| self.datatype(id))
    }

    /// Walk a datatype's `parent` chain from itself up to the `text` root,
    /// inclusive, nearest ancestor first.
    pub fn ancestor_chain(&self, id: DatatypeId) -> Vec<DatatypeId> {
        let mut chain = Vec::new();
        let mut current = Some(id);
        let mut seen = ahash::AHashSet::new();
        while let Some(cur) = current {
            if !seen.insert(cur) {
                break;
            }
            chain.push(cur);
            current = self.datatype(cur).and_then(|d| d.parent);
        }
        chain
    }

    /// The SQL storage type inherited from the nearest ancestor that
    /// declares one.
    pub fn resolve_sql_type(&self, id: DatatypeId) -> Option<&str> {
        for ancestor in self.ancestor_chain(id) {
            if let Some(dt) = self.datatype(ancestor) {
                if let Some(ref sql_type) = dt.sql_type {
                    return Some(sql_type);
                }
            }
        }
        None
    }

    pub fn len(&self) -> usize {
        self.table_configs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table_configs.is_empty()
    }

    pub fn iter_tables(&self) -> impl Iterator<Item = &TableConfig> {
        self.table_configs.iter()
    }
}
