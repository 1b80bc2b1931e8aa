//! Tree-cycle simulation during live validation.
//!
//! `check_tree_cycles` (`crate::graph`) only rejects cycles declared in the
//! configuration itself. This module catches cycles *created by data*: row
//! 5 sets its parent to row 9, and row 9 (loaded earlier in the same or an
//! earlier chunk) sets its parent to row 5. Detecting this needs the
//! already-persisted parent/child pairs plus every pair validated so far in
//! the current chunk, so it runs serially per chunk against an in-memory
//! snapshot seeded from the database.

use ahash::AHashMap;
use anyhow::Result;

use crate::cell::{Message, Row};
use crate::config::{TableConfig, TreeConstraint};
use crate::store::Store;

/// `child_value -> parent_value` across every tree constraint on the table,
/// seeded from persisted rows and extended as the chunk is walked.
type TreeMap = AHashMap<String, String>;

fn load_tree_map(store: &dyn Store, table: &TableConfig, tree: &TreeConstraint) -> Result<TreeMap> {
    let child = table.column(tree.child).expect("tree constraint names a real child column");
    let parent = table.column(tree.parent).expect("tree constraint names a real parent column");
    let sql = format!(
        "SELECT \"{0}\", \"{1}\" FROM \"{2}\" WHERE \"{0}\" IS NOT NULL AND \"{1}\" IS NOT NULL;",
        child.name, parent.name, table.name
    );
    let rows = store.query_rows(&sql, &[])?;
    let mut map = TreeMap::new();
    for row in rows {
        if let (Some(Some(c)), Some(Some(p))) = (row.first(), row.get(1)) {
            map.insert(c.clone(), p.clone());
        }
    }
    Ok(map)
}

/// Would adding `child -> parent` to `map` create a cycle? Walks upward from
/// `parent` looking for `child`. `seen` guards against pre-existing bad data
/// (a cycle already present among persisted rows) turning this into an
/// infinite loop.
fn would_create_cycle(map: &TreeMap, child: &str, parent: &str) -> bool {
    if child == parent {
        return true;
    }
    let mut current = parent.to_string();
    let mut seen = ahash::AHashSet::new();
    loop {
        if current == child {
            return true;
        }
        if !seen.insert(current.clone()) {
            return false;
        }
        match map.get(&current) {
            Some(next) => current = next.clone(),
            None => return false,
        }
    }
}

fn build_cycle_trace(map: &TreeMap, child: &str, parent: &str) -> String {
    let mut trace = vec![child.to_string()];
    let mut current = parent.to_string();
    loop {
        trace.push(current.clone());
        if current == child {
            break;
        }
        match map.get(&current) {
            Some(next) => current = next.clone(),
            None => break,
        }
    }
    trace.join(" -> ")
}

/// Run Phase B over one chunk's already-intra-row-validated rows, in order.
/// Rows that would close a cycle have their child cell invalidated with a
/// `tree:cycle` message; the tree map is updated with every *accepted*
/// parent/child pair so later rows in the same chunk see earlier ones.
pub fn check_tree_phase(store: &dyn Store, table: &TableConfig, rows: &mut [Row]) -> Result<()> {
    for tree in table.constraints.tree.clone() {
        let child_col = table.column(tree.child).expect("tree constraint names a real child column").name.clone();
        let parent_col = table.column(tree.parent).expect("tree constraint names a real parent column").name.clone();
        let mut map = load_tree_map(store, table, &tree)?;

        for row in rows.iter_mut() {
            let (child_value, child_valid) = match row.get(&child_col) {
                Some(c) if c.valid && c.nulltype.is_none() => (c.value.clone(), true),
                _ => (String::new(), false),
            };
            if !child_valid {
                continue;
            }
            let parent_value = match row.get(&parent_col) {
                Some(c) if c.valid && c.nulltype.is_none() => Some(c.value.clone()),
                _ => None,
            };
            let Some(parent_value) = parent_value else {
                continue;
            };

            if would_create_cycle(&map, &child_value, &parent_value) {
                let trace = build_cycle_trace(&map, &child_value, &parent_value);
                if let Some(cell) = row.get_mut(&child_col) {
                    cell.invalidate(Message::error(
                        "tree:cycle",
                        format!("setting parent to '{}' would create a cycle: {}", parent_value, trace),
                    ));
                }
            } else {
                map.insert(child_value, parent_value);
            }
        }
    }
    Ok(())
}

/// Seed a fresh in-memory tree map for tests without a live `Store`.
#[cfg(test)]
fn test_map(pairs: &[(&str, &str)]) -> TreeMap {
    pairs.iter().map(|(c, p)| (c.to_string(), p.to_string())).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn detects_direct_self_cycle() {
        let map = test_map(&[]);
        assert!(would_create_cycle(&map, "a", "a"));
    }

    #[test]
    fn detects_indirect_cycle() {
        let map = test_map(&[("b", "a"), ("c", "b")]);
        // c -> b -> a already; proposing a -> c would close the loop.
        assert!(would_create_cycle(&map, "a", "c"));
    }

    #[test]
    fn accepts_non_cyclic_parent() {
        let map = test_map(&[("b", "a")]);
        assert!(!would_create_cycle(&map, "c", "b"));
    }

    #[test]
    fn tolerates_pre_existing_bad_cycle_without_looping() {
        let map = test_map(&[("x", "y"), ("y", "x")]);
        assert!(!would_create_cycle(&map, "z", "x"));
    }
}
