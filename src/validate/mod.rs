//! Validator: four phases with strict input/output contracts. Phase A is
//! pure and parallelizable (driven by the chunk scheduler); Phases B-D
//! run serially per chunk.

pub mod tree;
pub mod typeahead;
pub mod interrow;

use ahash::AHashMap;

use crate::cell::{Cell, Message, Row};
use crate::config::{Column, Config, RuleCondition, TableConfig};
use crate::tsv::TsvRow;

pub use interrow::{check_inter_row, InterRowContext};
pub use tree::check_tree_phase;

/// Phase A: nulltype, rule, then datatype checks per cell. Reads only the
/// current row and the configuration; never touches the database, so it
/// is safe to run from any worker thread.
pub fn validate_intra_row(config: &Config, table: &TableConfig, row_number: u64, raw: &TsvRow) -> Row {
    let mut row = Row::new(row_number);

    // Pass 1: nulltype is a pure function of the cell's own value, so it can
    // be resolved for every column before any rule or datatype check runs.
    // Rule/datatype precedence needs every cell's nulltype state up front,
    // since a rule's `then_condition` may be the literal `null`/`not null`
    // against a *different* column.
    for (column, value) in table.columns.iter().zip(raw.iter()) {
        let mut cell = Cell::new(value.clone());
        if let Some(nt_id) = column.nulltype {
            if let Some(dt) = config.datatype(nt_id) {
                if let Some(pred) = dt.predicate() {
                    if pred.eval(value) {
                        cell.nulltype = Some(dt.name.clone());
                    }
                }
            }
        }
        row.cells.insert(column.name.clone(), cell);
    }

    // Pass 2: rule then datatype checks, skipped entirely for columns whose
    // nulltype matched — a matching nulltype stops further cell checks.
    for column in &table.columns {
        let has_nulltype = row.get(&column.name).map(|c| c.nulltype.is_some()).unwrap_or(false);
        if has_nulltype {
            continue;
        }
        apply_rules(config, table, column, &mut row);
        apply_datatype(config, column, &mut row);
    }

    row
}

fn rule_condition_holds(cond: &RuleCondition, cell: &Cell) -> bool {
    match cond {
        RuleCondition::Null => cell.nulltype.is_some(),
        RuleCondition::NotNull => cell.nulltype.is_none(),
        RuleCondition::Expr(predicate) => predicate.eval(&cell.value),
    }
}

fn apply_rules(config: &Config, table: &TableConfig, when_column: &Column, row: &mut Row) {
    let mut ordinal: AHashMap<u16, u32> = AHashMap::new();
    for rule in &config.rules {
        if rule.table != table.id || rule.when_column != when_column.id {
            continue;
        }
        let n = ordinal.entry(rule.then_column.0).or_insert(0);
        *n += 1;

        let when_cell = match row.get(&when_column.name) {
            Some(c) => c.clone(),
            None => continue,
        };
        if !rule_condition_holds(&rule.when_condition, &when_cell) {
            continue;
        }

        let then_column = match table.column(rule.then_column) {
            Some(c) => c,
            None => continue,
        };
        let then_cell_snapshot = match row.get(&then_column.name) {
            Some(c) => c.clone(),
            None => continue,
        };
        if rule_condition_holds(&rule.then_condition, &then_cell_snapshot) {
            continue;
        }

        let rule_tag = format!("rule:{}-{}", then_column.name, *n);
        if let Some(cell) = row.get_mut(&then_column.name) {
            cell.invalidate(Message::new(rule_tag, rule.level.clone(), rule.description.clone()));
        }
    }
}

fn apply_datatype(config: &Config, column: &Column, row: &mut Row) {
    let dt = match config.datatype(column.datatype) {
        Some(dt) => dt,
        None => return,
    };
    let Some(predicate) = dt.predicate() else {
        return;
    };
    let value = match row.get(&column.name) {
        Some(c) => c.value.clone(),
        None => return,
    };
    if predicate.eval(&value) {
        return;
    }

    let mut messages = Vec::new();
    for ancestor_id in config.ancestor_chain(column.datatype).into_iter().skip(1) {
        if let Some(ancestor) = config.datatype(ancestor_id) {
            if let Some(ancestor_pred) = ancestor.predicate() {
                if !ancestor_pred.eval(&value) {
                    messages.push(Message::error(
                        format!("datatype:{}", ancestor.name),
                        format!("'{}' violates datatype '{}'", value, ancestor.name),
                    ));
                }
            }
        }
    }
    messages.push(Message::error(
        format!("datatype:{}", dt.name),
        format!("'{}' violates datatype '{}'", value, dt.name),
    ));

    if let Some(cell) = row.get_mut(&column.name) {
        cell.valid = false;
        cell.messages.extend(messages);
    }
}
