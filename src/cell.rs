//! `Cell` and `Row`: the ephemeral records produced by validation.

use ahash::AHashMap;
use serde::Serialize;
use serde_json::{json, Value};

/// One validation message attached to a cell, tagged with the rule/check
/// that produced it (`rule:<column>-<n>`, `datatype:<name>`, `tree:cycle`,
/// `key:foreign`, `key:primary`, `key:unique`, `tree:child-unique`,
/// `tree:foreign`, `under:not-in-tree`, `under:not-under`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Message {
    pub rule: String,
    pub level: String,
    pub message: String,
}

impl Message {
    pub fn new(rule: impl Into<String>, level: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            rule: rule.into(),
            level: level.into(),
            message: message.into(),
        }
    }

    pub fn error(rule: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(rule, "error", message)
    }
}

/// A single validated cell.
#[derive(Debug, Clone)]
pub struct Cell {
    pub value: String,
    pub valid: bool,
    pub nulltype: Option<String>,
    pub messages: Vec<Message>,
}

impl Cell {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            valid: true,
            nulltype: None,
            messages: Vec::new(),
        }
    }

    pub fn invalidate(&mut self, message: Message) {
        self.valid = false;
        self.messages.push(message);
    }

    /// A "plain valid" cell has no metadata: valid, no nulltype, no messages.
    pub fn is_plain_valid(&self) -> bool {
        self.valid && self.nulltype.is_none() && self.messages.is_empty()
    }

    /// JSON sidecar for the `_meta` column, or `None` when the cell is plain
    /// valid (in which case `_meta` is stored as SQL NULL).
    pub fn to_meta_json(&self) -> Option<Value> {
        if self.is_plain_valid() {
            return None;
        }

        let mut obj = json!({
            "valid": self.valid,
            "messages": self.messages,
        });
        let map = obj.as_object_mut().expect("object literal");
        if !self.valid {
            map.insert("value".to_string(), json!(self.value));
        }
        if let Some(ref nt) = self.nulltype {
            map.insert("nulltype".to_string(), json!(nt));
        }
        Some(obj)
    }
}

/// An ordered mapping from column name to `Cell`, plus the row's assigned,
/// globally-1-based `row_number`.
#[derive(Debug, Clone)]
pub struct Row {
    pub row_number: u64,
    pub cells: AHashMap<String, Cell>,
}

impl Row {
    pub fn new(row_number: u64) -> Self {
        Self {
            row_number,
            cells: AHashMap::new(),
        }
    }

    pub fn get(&self, column: &str) -> Option<&Cell> {
        self.cells.get(column)
    }

    pub fn get_mut(&mut self, column: &str) -> Option<&mut Cell> {
        self.cells.get_mut(column)
    }

    /// True iff any cell in `uniqueness_columns` is invalid.
    pub fn is_conflicting(&self, uniqueness_columns: &[String]) -> bool {
        uniqueness_columns.iter().any(|c| {
            self.cells
                .get(c)
                .map(|cell| !cell.valid)
                .unwrap_or(false)
        })
    }
}
