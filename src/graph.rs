//! Dependency resolver: orders tables for loading by foreign/under edges,
//! and checks each table's tree constraints for cycles. Built the same way
//! as a SQL schema's table-load order is usually resolved: Tarjan for
//! per-table cycle detection, Kahn's algorithm for the cross-table
//! topological sort.

use std::collections::VecDeque;

use ahash::{AHashMap, AHashSet};

use crate::config::{Config, TableId};
use crate::errors::CycleError;

/// Per-table tree check: build a graph of
/// `child -> parent` edges from every `tree` constraint on the table and
/// reject it if cyclic.
pub fn check_tree_cycles(config: &Config, table_id: TableId) -> Result<(), CycleError> {
    let table = config
        .table(table_id)
        .expect("table_id must be valid within config");

    let mut adjacency: AHashMap<u16, Vec<u16>> = AHashMap::new();
    for constraint in &table.constraints.tree {
        adjacency
            .entry(constraint.child.0)
            .or_default()
            .push(constraint.parent.0);
    }

    if adjacency.is_empty() {
        return Ok(());
    }

    let mut finder = TarjanSCC::new(&adjacency);
    let sccs = finder.find_sccs();

    for scc in sccs {
        let is_self_loop = scc.len() == 1
            && adjacency
                .get(&scc[0])
                .map(|kids| kids.contains(&scc[0]))
                .unwrap_or(false);
        if scc.len() > 1 || is_self_loop {
            let names: Vec<String> = scc
                .iter()
                .map(|&cid| table.column(crate::config::ColumnId(cid)).map(|c| c.name.clone()).unwrap_or_default())
                .collect();
            return Err(CycleError::new(
                names,
                format!("tree cycle in table '{}'", table.name),
            ));
        }
    }
    Ok(())
}

/// Cross-table order: topologically sort tables by
/// foreign-key and under-key dependency edges. If table A has a foreign key
/// into table B, B precedes A in the returned order.
pub fn resolve_order(config: &Config) -> Result<Vec<TableId>, CycleError> {
    let n = config.len();
    let mut dependencies: Vec<AHashSet<u32>> = vec![AHashSet::new(); n];
    let mut dependents: Vec<Vec<u32>> = vec![Vec::new(); n];

    for table in config.iter_tables() {
        let me = table.id.0;
        for fk in &table.constraints.foreign {
            if fk.ftable.0 != me {
                dependencies[me as usize].insert(fk.ftable.0);
            }
        }
        for under in &table.constraints.under {
            if under.ttable.0 != me {
                dependencies[me as usize].insert(under.ttable.0);
            }
        }
    }
    for (me, deps) in dependencies.iter().enumerate() {
        for &dep in deps {
            dependents[dep as usize].push(me as u32);
        }
    }

    let mut indegree: Vec<usize> = dependencies.iter().map(|d| d.len()).collect();
    let mut queue: VecDeque<u32> = (0..n as u32).filter(|&i| indegree[i as usize] == 0).collect();
    let mut order = Vec::with_capacity(n);

    while let Some(id) = queue.pop_front() {
        order.push(TableId(id));
        for &dependent in &dependents[id as usize] {
            indegree[dependent as usize] -= 1;
            if indegree[dependent as usize] == 0 {
                queue.push_back(dependent);
            }
        }
    }

    if order.len() != n {
        let stuck: Vec<String> = (0..n)
            .filter(|&i| indegree[i] > 0)
            .map(|i| config.table(TableId(i as u32)).map(|t| t.name.clone()).unwrap_or_default())
            .collect();
        return Err(CycleError::new(
            stuck,
            "foreign/under dependency cycle across tables",
        ));
    }

    Ok(order)
}

/// Tarjan's Strongly Connected Components algorithm over a small `u16`-keyed
/// adjacency map (column ids within one table).
struct TarjanSCC<'a> {
    adjacency: &'a AHashMap<u16, Vec<u16>>,
    index_counter: usize,
    stack: Vec<u16>,
    on_stack: AHashSet<u16>,
    indices: AHashMap<u16, usize>,
    lowlinks: AHashMap<u16, usize>,
    sccs: Vec<Vec<u16>>,
}

impl<'a> TarjanSCC<'a> {
    fn new(adjacency: &'a AHashMap<u16, Vec<u16>>) -> Self {
        Self {
            adjacency,
            index_counter: 0,
            stack: Vec::new(),
            on_stack: AHashSet::new(),
            indices: AHashMap::new(),
            lowlinks: AHashMap::new(),
            sccs: Vec::new(),
        }
    }

    fn find_sccs(&mut self) -> Vec<Vec<u16>> {
        let mut nodes: AHashSet<u16> = AHashSet::new();
        for (&k, v) in self.adjacency {
            nodes.insert(k);
            for &w in v {
                nodes.insert(w);
            }
        }
        let nodes: Vec<u16> = nodes.into_iter().collect();
        for node in nodes {
            if !self.indices.contains_key(&node) {
                self.strongconnect(node);
            }
        }
        std::mem::take(&mut self.sccs)
    }

    fn strongconnect(&mut self, v: u16) {
        self.indices.insert(v, self.index_counter);
        self.lowlinks.insert(v, self.index_counter);
        self.index_counter += 1;
        self.stack.push(v);
        self.on_stack.insert(v);

        let neighbors = self.adjacency.get(&v).cloned().unwrap_or_default();
        for w in neighbors {
            if !self.indices.contains_key(&w) {
                self.strongconnect(w);
                let v_low = self.lowlinks[&v];
                let w_low = self.lowlinks[&w];
                self.lowlinks.insert(v, v_low.min(w_low));
            } else if self.on_stack.contains(&w) {
                let v_low = self.lowlinks[&v];
                let w_index = self.indices[&w];
                self.lowlinks.insert(v, v_low.min(w_index));
            }
        }

        if self.lowlinks[&v] == self.indices[&v] {
            let mut scc = Vec::new();
            loop {
                let w = self.stack.pop().unwrap();
                self.on_stack.remove(&w);
                scc.push(w);
                if w == v {
                    break;
                }
            }
            self.sccs.push(scc);
        }
    }
}
