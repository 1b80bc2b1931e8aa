//! Config loader: reads the `table`, `column`, `datatype`, and optional
//! `rule` special tables, validates every reference, and compiles
//! conditions via the condition DSL. Never touches the target database.

use std::collections::VecDeque;
use std::path::{Path, PathBuf};

use ahash::{AHashMap, AHashSet};
use log::{debug, info};

use crate::condition::{self, ConditionNode, Structure};
use crate::errors::ConfigError;
use crate::tsv::TsvReader;

use super::model::{
    Column, Config, Constraints, Datatype, DatatypeId, ForeignConstraint, Rule, RuleCondition,
    SpecialTables, TableConfig, TableId, TreeConstraint, UnderConstraint,
};

const REQUIRED_DATATYPES: &[&str] = &["text", "empty", "line", "word"];

/// Load the configuration starting from the path to the master `table` TSV.
/// The `table` table itself must reside at the path used to bootstrap the
/// loader.
pub fn load_config(table_path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let table_path = table_path.as_ref();
    let base_dir = table_path.parent().unwrap_or_else(|| Path::new("."));
    info!("loading configuration from {}", table_path.display());

    let table_rows = read_special_table(table_path, &["table", "path", "type"])?;
    let (mut table_configs, tables, special) = build_table_registry(&table_rows, table_path, base_dir)?;

    let column_path = table_configs[special.column.0 as usize].path.clone();
    let column_rows = read_special_table(
        &column_path,
        &["table", "column", "nulltype", "datatype", "structure", "description"],
    )?;

    let datatype_path = table_configs[special.datatype.0 as usize].path.clone();
    let datatype_rows = read_special_table(
        &datatype_path,
        &["datatype", "parent", "condition", "SQL type", "description"],
    )?;

    let (datatypes, datatype_defs) = build_datatypes(&datatype_rows)?;

    populate_columns(&mut table_configs, &tables, &column_rows, &datatypes)?;
    compile_structures(&mut table_configs, &tables, &datatypes)?;
    let table_configs = table_configs; // done mutating columns/structure

    let mut config = Config {
        tables,
        table_configs,
        datatypes,
        datatype_defs,
        rules: Vec::new(),
        special: special.clone(),
    };

    build_constraints(&mut config)?;

    if let Some(rule_table_id) = special.rule {
        let rule_path = config.table_configs[rule_table_id.0 as usize].path.clone();
        let rule_rows = read_special_table(
            &rule_path,
            &[
                "table",
                "when column",
                "when condition",
                "then column",
                "then condition",
                "level",
                "description",
            ],
        )?;
        config.rules = build_rules(&config, &rule_rows)?;
    }

    info!(
        "configuration loaded: {} tables, {} datatypes, {} rules",
        config.table_configs.len(),
        config.datatype_defs.len(),
        config.rules.len()
    );
    Ok(config)
}

struct SpecialRow {
    header: std::sync::Arc<AHashMap<String, usize>>,
    cells: Vec<String>,
}

impl SpecialRow {
    fn get(&self, column: &str) -> &str {
        self.header
            .get(column)
            .and_then(|&i| self.cells.get(i))
            .map(|s| s.as_str())
            .unwrap_or("")
    }
}

/// Read a special table and verify it carries every required column,
/// erroring with `ConfigError` on any that are missing.
fn read_special_table(path: &Path, required: &[&str]) -> Result<Vec<SpecialRow>, ConfigError> {
    let mut reader = TsvReader::open(path)
        .map_err(|e| ConfigError::new(format!("{} (loading {})", e, path.display())))?;

    let mut header = AHashMap::new();
    for (i, name) in reader.header.iter().enumerate() {
        header.insert(name.clone(), i);
    }
    for col in required {
        if !header.contains_key(*col) {
            return Err(ConfigError::new(format!(
                "{}: missing required column '{}'",
                path.display(),
                col
            )));
        }
    }

    let rows = reader
        .read_all()
        .map_err(|e| ConfigError::new(format!("{} (reading {})", e, path.display())))?;

    let header = std::sync::Arc::new(header);
    Ok(rows
        .into_iter()
        .map(|cells| SpecialRow {
            header: header.clone(),
            cells,
        })
        .collect())
}

fn build_table_registry(
    rows: &[SpecialRow],
    bootstrap_path: &Path,
    base_dir: &Path,
) -> Result<(Vec<TableConfig>, AHashMap<String, TableId>, SpecialTables), ConfigError> {
    let mut tables = AHashMap::new();
    let mut table_configs = Vec::new();
    let mut role_table: Option<TableId> = None;
    let mut role_column: Option<TableId> = None;
    let mut role_datatype: Option<TableId> = None;
    let mut role_rule: Option<TableId> = None;

    for row in rows {
        let name = row.get("table");
        if name.is_empty() {
            return Err(ConfigError::new("table row missing required value for 'table'"));
        }
        let raw_path = row.get("path");
        if raw_path.is_empty() {
            return Err(ConfigError::new(format!(
                "table '{}' missing required value for 'path'",
                name
            )));
        }
        let table_type = row.get("type");

        let path = resolve_table_path(base_dir, name, raw_path, table_type, bootstrap_path);

        let id = TableId(table_configs.len() as u32);
        if tables.insert(name.to_string(), id).is_some() {
            return Err(ConfigError::new(format!("duplicate table declaration '{}'", name)));
        }
        table_configs.push(TableConfig {
            name: name.to_string(),
            id,
            path,
            table_type: table_type.to_string(),
            columns: Vec::new(),
            constraints: Constraints::default(),
        });

        match table_type {
            "" => {}
            "table" => assign_role(&mut role_table, id, "table")?,
            "column" => assign_role(&mut role_column, id, "column")?,
            "datatype" => assign_role(&mut role_datatype, id, "datatype")?,
            "rule" => assign_role(&mut role_rule, id, "rule")?,
            other => {
                return Err(ConfigError::new(format!(
                    "table '{}' has unrecognized table type '{}'",
                    name, other
                )))
            }
        }
    }

    let special = SpecialTables {
        table: role_table.ok_or_else(|| ConfigError::new("no table declares type 'table'"))?,
        column: role_column.ok_or_else(|| ConfigError::new("no table declares type 'column'"))?,
        datatype: role_datatype
            .ok_or_else(|| ConfigError::new("no table declares type 'datatype'"))?,
        rule: role_rule,
    };

    Ok((table_configs, tables, special))
}

fn assign_role(slot: &mut Option<TableId>, id: TableId, role: &str) -> Result<(), ConfigError> {
    if slot.replace(id).is_some() {
        return Err(ConfigError::new(format!("duplicate role declaration for type '{}'", role)));
    }
    Ok(())
}

fn resolve_table_path(
    base_dir: &Path,
    name: &str,
    raw_path: &str,
    table_type: &str,
    bootstrap_path: &Path,
) -> PathBuf {
    if table_type == "table" {
        // The master table's own declared path must agree with the
        // bootstrap path used to invoke the loader; prefer the bootstrap
        // path since it is what was actually opened.
        debug!("table '{}' resolves to the bootstrap path {}", name, bootstrap_path.display());
        return bootstrap_path.to_path_buf();
    }
    let p = Path::new(raw_path);
    if p.is_absolute() {
        p.to_path_buf()
    } else {
        base_dir.join(p)
    }
}

fn build_datatypes(
    rows: &[SpecialRow],
) -> Result<(AHashMap<String, DatatypeId>, Vec<Datatype>), ConfigError> {
    struct Raw {
        name: String,
        parent: Option<String>,
        condition: String,
        sql_type: Option<String>,
        description: String,
    }

    let mut by_name: AHashMap<String, Raw> = AHashMap::new();
    let mut order: Vec<String> = Vec::new();
    for row in rows {
        let name = row.get("datatype").to_string();
        if name.is_empty() {
            return Err(ConfigError::new("datatype row missing required value for 'datatype'"));
        }
        let parent = row.get("parent").trim().to_string();
        let sql_type = row.get("SQL type").trim().to_string();
        if by_name
            .insert(
                name.clone(),
                Raw {
                    name: name.clone(),
                    parent: if parent.is_empty() { None } else { Some(parent) },
                    condition: row.get("condition").trim().to_string(),
                    sql_type: if sql_type.is_empty() { None } else { Some(sql_type) },
                    description: row.get("description").to_string(),
                },
            )
            .is_some()
        {
            return Err(ConfigError::new(format!("duplicate datatype declaration '{}'", name)));
        }
        order.push(name);
    }

    for required in REQUIRED_DATATYPES {
        if !by_name.contains_key(*required) {
            return Err(ConfigError::new(format!("missing required datatype '{}'", required)));
        }
    }

    for raw in by_name.values() {
        if let Some(ref parent) = raw.parent {
            if !by_name.contains_key(parent) {
                return Err(ConfigError::new(format!(
                    "datatype '{}' has undefined parent '{}'",
                    raw.name, parent
                )));
            }
        }
    }

    // Topological order (parent before child) via Kahn's algorithm, so the
    // condition compiler always has the parent's compiled predicate on hand
    // when it needs to reuse it.
    let mut indegree: AHashMap<&str, usize> = AHashMap::new();
    let mut children: AHashMap<&str, Vec<&str>> = AHashMap::new();
    for name in &order {
        indegree.entry(name.as_str()).or_insert(0);
    }
    for raw in by_name.values() {
        if let Some(ref parent) = raw.parent {
            *indegree.entry(raw.name.as_str()).or_insert(0) += 1;
            children.entry(parent.as_str()).or_default().push(raw.name.as_str());
        }
    }

    let mut queue: VecDeque<&str> = order
        .iter()
        .map(|s| s.as_str())
        .filter(|n| indegree[n] == 0)
        .collect();
    let mut topo: Vec<String> = Vec::new();
    let mut indegree = indegree;
    while let Some(node) = queue.pop_front() {
        topo.push(node.to_string());
        if let Some(kids) = children.get(node) {
            for &kid in kids {
                let d = indegree.get_mut(kid).unwrap();
                *d -= 1;
                if *d == 0 {
                    queue.push_back(kid);
                }
            }
        }
    }
    if topo.len() != order.len() {
        return Err(ConfigError::new("datatype parent graph contains a cycle"));
    }

    let mut datatypes = AHashMap::new();
    let mut datatype_defs: Vec<Datatype> = Vec::new();
    let mut compiled: AHashMap<String, std::sync::Arc<ConditionNode>> = AHashMap::new();

    for name in &topo {
        let raw = &by_name[name];
        let id = DatatypeId(datatype_defs.len() as u32);
        let parent_id = raw.parent.as_ref().map(|p| datatypes[p.as_str()]);

        let (condition_expr, condition) = if raw.condition.is_empty() {
            (None, None)
        } else {
            let expr = condition::parse(&raw.condition)
                .map_err(|e| ConfigError::new(format!("datatype '{}': {}", name, e)))?;
            let lookup = |n: &str| compiled.get(n).cloned();
            let node = condition::compile_condition(&expr, &lookup)
                .map_err(|e| ConfigError::new(format!("datatype '{}': {}", name, e)))?;
            let arc = std::sync::Arc::new(node);
            (Some(expr), Some(arc))
        };

        if let Some(ref arc) = condition {
            compiled.insert(name.clone(), arc.clone());
        }

        datatypes.insert(name.clone(), id);
        datatype_defs.push(Datatype {
            name: name.clone(),
            id,
            parent: parent_id,
            condition_expr,
            condition,
            sql_type: raw.sql_type.clone(),
            description: raw.description.clone(),
        });
    }

    Ok((datatypes, datatype_defs))
}

fn populate_columns(
    table_configs: &mut [TableConfig],
    tables: &AHashMap<String, TableId>,
    rows: &[SpecialRow],
    datatypes: &AHashMap<String, DatatypeId>,
) -> Result<(), ConfigError> {
    let mut seen: AHashSet<(String, String)> = AHashSet::new();
    for row in rows {
        let table_name = row.get("table");
        let column_name = row.get("column");
        if table_name.is_empty() || column_name.is_empty() {
            return Err(ConfigError::new("column row missing required 'table' or 'column' value"));
        }
        let table_id = *tables
            .get(table_name)
            .ok_or_else(|| ConfigError::new(format!("column row references undefined table '{}'", table_name)))?;

        if !seen.insert((table_name.to_string(), column_name.to_string())) {
            return Err(ConfigError::new(format!(
                "duplicate column declaration '{}.{}'",
                table_name, column_name
            )));
        }

        let datatype_name = row.get("datatype");
        let datatype_id = *datatypes.get(datatype_name).ok_or_else(|| {
            ConfigError::new(format!(
                "column '{}.{}' references undefined datatype '{}'",
                table_name, column_name, datatype_name
            ))
        })?;

        let nulltype_name = row.get("nulltype").trim();
        let nulltype = if nulltype_name.is_empty() {
            None
        } else {
            Some(*datatypes.get(nulltype_name).ok_or_else(|| {
                ConfigError::new(format!(
                    "column '{}.{}' references undefined nulltype '{}'",
                    table_name, column_name, nulltype_name
                ))
            })?)
        };

        let structure_text = row.get("structure").trim().to_string();
        let structure_expr = if structure_text.is_empty() {
            None
        } else {
            Some(
                condition::parse(&structure_text)
                    .map_err(|e| ConfigError::new(format!("column '{}.{}': {}", table_name, column_name, e)))?,
            )
        };

        let table = &mut table_configs[table_id.0 as usize];
        let column_id = crate::config::model::ColumnId(table.columns.len() as u16);
        table.columns.push(Column {
            name: column_name.to_string(),
            id: column_id,
            table: table_id,
            datatype: datatype_id,
            nulltype,
            structure_expr,
            structure: None,
            description: row.get("description").to_string(),
        });
    }
    Ok(())
}

fn compile_structures(
    table_configs: &mut [TableConfig],
    tables: &AHashMap<String, TableId>,
    _datatypes: &AHashMap<String, DatatypeId>,
) -> Result<(), ConfigError> {
    for t in 0..table_configs.len() {
        for c in 0..table_configs[t].columns.len() {
            let expr = table_configs[t].columns[c].structure_expr.clone();
            let Some(expr) = expr else { continue };
            let structure = condition::compile_structure(&expr).map_err(|e| {
                ConfigError::new(format!(
                    "column '{}.{}': {}",
                    table_configs[t].name, table_configs[t].columns[c].name, e
                ))
            })?;
            validate_structure_refs(&table_configs[t], &structure, tables)?;
            table_configs[t].columns[c].structure = Some(structure);
        }
    }
    Ok(())
}

fn validate_structure_refs(
    table: &TableConfig,
    structure: &Structure,
    tables: &AHashMap<String, TableId>,
) -> Result<(), ConfigError> {
    match structure {
        Structure::Primary | Structure::Unique => Ok(()),
        Structure::From { ftable, fcolumn } => {
            let ft = tables
                .get(ftable)
                .ok_or_else(|| ConfigError::new(format!("from(): undefined table '{}'", ftable)))?;
            if ftable == &table.name {
                if !table.columns.iter().any(|c| &c.name == fcolumn) {
                    return Err(ConfigError::new(format!(
                        "from(): undefined column '{}.{}'",
                        ftable, fcolumn
                    )));
                }
            }
            let _ = ft;
            Ok(())
        }
        Structure::Tree { child } => {
            if !table.columns.iter().any(|c| &c.name == child) {
                return Err(ConfigError::new(format!(
                    "tree(): undefined column '{}.{}'",
                    table.name, child
                )));
            }
            Ok(())
        }
        Structure::Under { ttable, tcolumn, .. } => {
            tables
                .get(ttable)
                .ok_or_else(|| ConfigError::new(format!("under(): undefined table '{}'", ttable)))?;
            let _ = tcolumn;
            Ok(())
        }
    }
}

/// Fill each table's `Constraints` from its columns' compiled structures.
/// Deferred until every table's columns exist, since `from`/`under` can
/// reference sibling tables.
fn build_constraints(config: &mut Config) -> Result<(), ConfigError> {
    let table_count = config.table_configs.len();
    for t in 0..table_count {
        let table_name = config.table_configs[t].name.clone();
        let mut constraints = Constraints::default();
        let columns = config.table_configs[t].columns.clone();
        for column in &columns {
            match &column.structure {
                None => {}
                Some(Structure::Primary) => {
                    if constraints.primary.replace(column.id).is_some() {
                        return Err(ConfigError::new(format!(
                            "table '{}' declares more than one primary column",
                            table_name
                        )));
                    }
                }
                Some(Structure::Unique) => constraints.unique.push(column.id),
                Some(Structure::From { ftable, fcolumn }) => {
                    let ftable_id = config.get_table_id(ftable).ok_or_else(|| {
                        ConfigError::new(format!("from(): undefined table '{}'", ftable))
                    })?;
                    let fcolumn_id = config
                        .table(ftable_id)
                        .and_then(|t| t.get_column_id(fcolumn))
                        .ok_or_else(|| {
                            ConfigError::new(format!("from(): undefined column '{}.{}'", ftable, fcolumn))
                        })?;
                    constraints.foreign.push(ForeignConstraint {
                        column: column.id,
                        ftable: ftable_id,
                        fcolumn: fcolumn_id,
                    });
                }
                Some(Structure::Tree { child }) => {
                    let child_id = config.table_configs[t].get_column_id(child).ok_or_else(|| {
                        ConfigError::new(format!("tree(): undefined column '{}.{}'", table_name, child))
                    })?;
                    constraints.tree.push(TreeConstraint {
                        child: child_id,
                        parent: column.id,
                    });
                }
                Some(Structure::Under { ttable, tcolumn, value }) => {
                    let ttable_id = config.get_table_id(ttable).ok_or_else(|| {
                        ConfigError::new(format!("under(): undefined table '{}'", ttable))
                    })?;
                    let tcolumn_id = config
                        .table(ttable_id)
                        .and_then(|t| t.get_column_id(tcolumn))
                        .ok_or_else(|| {
                            ConfigError::new(format!("under(): undefined column '{}.{}'", ttable, tcolumn))
                        })?;
                    // Constraints for `ttable` may not be built yet in this
                    // same pass, so check directly against its columns'
                    // already-compiled structures: every `under` must refer
                    // to an existing `tree` whose child column is the named
                    // tree column.
                    let has_matching_tree = config
                        .table(ttable_id)
                        .map(|t| {
                            t.columns.iter().any(|c| {
                                matches!(&c.structure, Some(Structure::Tree { child })
                                    if t.get_column_id(child) == Some(tcolumn_id))
                            })
                        })
                        .unwrap_or(false);
                    if !has_matching_tree {
                        return Err(ConfigError::new(format!(
                            "under(): '{}.{}' is not declared as a tree child column",
                            ttable, tcolumn
                        )));
                    }
                    constraints.under.push(UnderConstraint {
                        column: column.id,
                        ttable: ttable_id,
                        tcolumn: tcolumn_id,
                        value: value.clone(),
                    });
                }
            }
        }
        config.table_configs[t].constraints = constraints;
    }
    Ok(())
}

fn build_rules(config: &Config, rows: &[SpecialRow]) -> Result<Vec<Rule>, ConfigError> {
    let mut rules = Vec::new();
    for row in rows {
        let table_name = row.get("table");
        let table_id = config
            .get_table_id(table_name)
            .ok_or_else(|| ConfigError::new(format!("rule references undefined table '{}'", table_name)))?;
        let table = config.table(table_id).expect("table_id resolved above");

        let when_column_name = row.get("when column");
        let when_column = table.get_column_id(when_column_name).ok_or_else(|| {
            ConfigError::new(format!(
                "rule references undefined column '{}.{}'",
                table_name, when_column_name
            ))
        })?;
        let then_column_name = row.get("then column");
        let then_column = table.get_column_id(then_column_name).ok_or_else(|| {
            ConfigError::new(format!(
                "rule references undefined column '{}.{}'",
                table_name, then_column_name
            ))
        })?;

        let when_condition = parse_rule_condition(config, row.get("when condition"))?;
        let then_condition = parse_rule_condition(config, row.get("then condition"))?;

        let level = row.get("level").to_string();
        let level = if level.is_empty() { "error".to_string() } else { level };

        rules.push(Rule {
            table: table_id,
            when_column,
            when_condition,
            then_column,
            then_condition,
            level,
            description: row.get("description").to_string(),
        });
    }
    Ok(rules)
}

fn parse_rule_condition(config: &Config, text: &str) -> Result<RuleCondition, ConfigError> {
    let trimmed = text.trim();
    match trimmed {
        "null" => return Ok(RuleCondition::Null),
        "not null" => return Ok(RuleCondition::NotNull),
        _ => {}
    }
    let expr = condition::parse(trimmed)?;
    let lookup = |name: &str| {
        config
            .get_datatype(name)
            .and_then(|dt| dt.condition.clone())
    };
    let node = condition::compile_condition(&expr, &lookup)?;
    Ok(RuleCondition::Expr(std::sync::Arc::new(node)))
}
