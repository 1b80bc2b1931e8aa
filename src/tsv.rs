//! Streaming reader for UTF-8 TSV with a header row. Quoting is disabled
//! and no escape processing is performed: cells are split on a literal
//! tab, full stop. No ecosystem crate parses strictly less than this, so
//! splitting is hand-rolled rather than reaching for a generic grammar
//! crate.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::errors::TsvReadError;

/// One data row: cells in header-column order.
pub type TsvRow = Vec<String>;

/// Lazily reads one TSV row at a time so the chunk scheduler can
/// materialize fixed-size chunks without holding the whole file in memory.
pub struct TsvReader<R> {
    lines: std::io::Lines<R>,
    pub header: Vec<String>,
    line_number: u64,
}

impl TsvReader<BufReader<File>> {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TsvReadError> {
        let path = path.as_ref();
        let file = File::open(path)
            .map_err(|e| TsvReadError(format!("cannot open {}: {}", path.display(), e)))?;
        Self::new(BufReader::new(file))
    }
}

impl<R: BufRead> TsvReader<R> {
    pub fn new(reader: R) -> Result<Self, TsvReadError> {
        let mut lines = reader.lines();
        let header_line = lines
            .next()
            .ok_or_else(|| TsvReadError("empty TSV input: missing header row".to_string()))?
            .map_err(|e| TsvReadError(format!("error reading header row: {}", e)))?;
        let header = split_row(&header_line);
        Ok(Self {
            lines,
            header,
            line_number: 1,
        })
    }

    pub fn column_count(&self) -> usize {
        self.header.len()
    }

    /// Read the next row, or `None` at EOF. Blank lines are skipped, matching
    /// the original loader's tolerance for trailing newlines.
    pub fn read_row(&mut self) -> Result<Option<TsvRow>, TsvReadError> {
        loop {
            let raw = match self.lines.next() {
                None => return Ok(None),
                Some(line) => {
                    line.map_err(|e| TsvReadError(format!("error reading TSV row: {}", e)))?
                }
            };
            self.line_number += 1;
            if raw.is_empty() {
                continue;
            }
            let cells = split_row(&raw);
            if cells.len() != self.header.len() {
                return Err(TsvReadError(format!(
                    "line {}: expected {} columns, found {}",
                    self.line_number,
                    self.header.len(),
                    cells.len()
                )));
            }
            return Ok(Some(cells));
        }
    }

    /// Read every remaining row eagerly. Used for small special tables
    /// (`table`, `column`, `datatype`, `rule`) where the whole file is
    /// needed up front to build the configuration; the chunk scheduler
    /// uses `read_row` directly instead for data tables.
    pub fn read_all(&mut self) -> Result<Vec<TsvRow>, TsvReadError> {
        let mut rows = Vec::new();
        while let Some(row) = self.read_row()? {
            rows.push(row);
        }
        Ok(rows)
    }
}

fn split_row(line: &str) -> Vec<String> {
    line.split('\t').map(|s| s.to_string()).collect()
}
