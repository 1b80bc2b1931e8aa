//! Configuration model and loader.

pub mod loader;
pub mod model;

pub use loader::load_config;
pub use model::{
    Column, ColumnId, Config, Constraints, Datatype, DatatypeId, ForeignConstraint, Rule,
    RuleCondition, SpecialTables, TableConfig, TableId, TreeConstraint, UnderConstraint,
};
