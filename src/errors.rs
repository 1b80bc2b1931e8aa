//! Fatal error kinds raised before any database write.
//!
//! Per-cell validation failures are never raised as errors — they are data,
//! carried on `Cell` (see `crate::cell`). Everything here is startup-time or
//! per-table fatal and is expected to be wrapped in `anyhow::Result` with
//! `.context(...)` at call sites, layering `anyhow::Context` over
//! `duckdb`/`regex` errors rather than growing a matching variant for each.

use std::fmt;

/// Raised by the condition DSL compiler and config loader.
#[derive(Debug, Clone)]
pub struct ConfigError(pub String);

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "configuration error: {}", self.0)
    }
}

impl std::error::Error for ConfigError {}

impl ConfigError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Raised by the dependency resolver when a tree or cross-table dependency
/// graph contains a cycle.
#[derive(Debug, Clone)]
pub struct CycleError {
    pub nodes: Vec<String>,
    pub detail: String,
}

impl CycleError {
    pub fn new(nodes: Vec<String>, detail: impl Into<String>) -> Self {
        Self {
            nodes,
            detail: detail.into(),
        }
    }

    /// Render the cycle as `a -> b -> c -> a`.
    pub fn display_cycle(&self) -> String {
        if self.nodes.len() == 1 {
            format!("{} -> {} (self-reference)", self.nodes[0], self.nodes[0])
        } else {
            let mut parts = self.nodes.clone();
            parts.push(self.nodes[0].clone());
            parts.join(" -> ")
        }
    }
}

impl fmt::Display for CycleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cycle detected ({}): {}", self.display_cycle(), self.detail)
    }
}

impl std::error::Error for CycleError {}

/// Raised by the config loader and chunk scheduler on malformed TSV
/// input.
#[derive(Debug, Clone)]
pub struct TsvReadError(pub String);

impl fmt::Display for TsvReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TSV read error: {}", self.0)
    }
}

impl std::error::Error for TsvReadError {}

/// Process exit code for a fatal error, used by `main.rs` to exit nonzero
/// with a human-readable message while still distinguishing the failure
/// class for scripts that check `$?`.
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    if err.downcast_ref::<ConfigError>().is_some() {
        2
    } else if err.downcast_ref::<CycleError>().is_some() {
        3
    } else if err.downcast_ref::<TsvReadError>().is_some() {
        4
    } else {
        1
    }
}
