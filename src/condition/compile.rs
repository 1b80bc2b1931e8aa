//! Compiling a parsed condition `Expr` into a predicate closure and/or a
//! structural descriptor.

use std::sync::Arc;

use regex::{Regex, RegexBuilder};

use super::ast::Expr;
use crate::errors::ConfigError;

/// Which regex function produced a `Regex` node, since `match`/`search`/
/// `exclude` differ only in how the match result is interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegexKind {
    Match,
    Search,
    Exclude,
}

/// A compiled, evaluable condition. Cheap to clone (the regex and the
/// `in(...)` set are behind `Arc`), so it can be shared across the
/// validation worker pool without recompiling anything.
#[derive(Debug, Clone)]
pub enum ConditionNode {
    Equals(String),
    Regex { regex: Arc<Regex>, kind: RegexKind },
    In(Arc<Vec<String>>),
    /// A condition that is just another datatype's name: the compiler
    /// reuses that datatype's already-compiled predicate directly.
    DatatypeRef(String, Arc<ConditionNode>),
    /// `true` for everything — the implicit root datatype `text`.
    Always,
}

impl ConditionNode {
    pub fn eval(&self, value: &str) -> bool {
        match self {
            ConditionNode::Always => true,
            ConditionNode::Equals(lit) => value == lit,
            ConditionNode::Regex { regex, kind } => {
                let is_match = regex.is_match(value);
                match kind {
                    RegexKind::Match => {
                        // Full-string match: is_match alone only tells us a
                        // substring matched, so require the match to span
                        // the whole value.
                        regex
                            .find(value)
                            .map(|m| m.start() == 0 && m.end() == value.len())
                            .unwrap_or(false)
                    }
                    RegexKind::Search => is_match,
                    RegexKind::Exclude => !is_match,
                }
            }
            ConditionNode::In(values) => values.iter().any(|v| v == value),
            ConditionNode::DatatypeRef(_, inner) => inner.eval(value),
        }
    }

    /// The enumerated set for `in(...)` datatypes, used by typeahead.
    pub fn enumerated_values(&self) -> Option<&[String]> {
        match self {
            ConditionNode::In(values) => Some(values),
            ConditionNode::DatatypeRef(_, inner) => inner.enumerated_values(),
            _ => None,
        }
    }
}

/// The structural role of a column's `structure` expression.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Structure {
    Primary,
    Unique,
    From { ftable: String, fcolumn: String },
    /// Declared on the parent column; `child` names the child column.
    Tree { child: String },
    Under {
        ttable: String,
        tcolumn: String,
        value: String,
    },
}

fn parse_flags(flags: &str) -> Result<(bool, bool), ConfigError> {
    let mut case_insensitive = false;
    let mut multi_line = false;
    for c in flags.chars() {
        match c {
            'i' => case_insensitive = true,
            'm' => multi_line = true,
            other => {
                return Err(ConfigError::new(format!(
                    "unsupported regex flag '{}'",
                    other
                )))
            }
        }
    }
    Ok((case_insensitive, multi_line))
}

fn build_regex(pattern: &str, flags: &str) -> Result<Regex, ConfigError> {
    let (ci, ml) = parse_flags(flags)?;
    RegexBuilder::new(pattern)
        .case_insensitive(ci)
        .multi_line(ml)
        .build()
        .map_err(|e| ConfigError::new(format!("invalid regex /{}/{}: {}", pattern, flags, e)))
}

/// Compile a datatype's `condition` expression into a predicate.
///
/// `lookup` resolves a bare label to an already-compiled datatype
/// condition; it must cover every datatype compiled so far in dependency
/// (parent-then-child) order.
pub fn compile_condition(
    expr: &Expr,
    lookup: &dyn Fn(&str) -> Option<Arc<ConditionNode>>,
) -> Result<ConditionNode, ConfigError> {
    match expr {
        Expr::Label(name) => {
            let referenced = lookup(name).ok_or_else(|| {
                ConfigError::new(format!("condition references undefined datatype '{}'", name))
            })?;
            Ok(ConditionNode::DatatypeRef(name.clone(), referenced))
        }
        Expr::Function(name, args) => match name.as_str() {
            "equals" => {
                let lit = expect_str(args, 1, "equals")?;
                Ok(ConditionNode::Equals(lit))
            }
            "match" | "search" | "exclude" => {
                let (pattern, flags) = expect_regex(args, "match/search/exclude")?;
                let regex = build_regex(&pattern, &flags)?;
                let kind = match name.as_str() {
                    "match" => RegexKind::Match,
                    "search" => RegexKind::Search,
                    _ => RegexKind::Exclude,
                };
                Ok(ConditionNode::Regex {
                    regex: Arc::new(regex),
                    kind,
                })
            }
            "in" => {
                if args.is_empty() {
                    return Err(ConfigError::new("'in' requires at least one argument"));
                }
                let mut values = Vec::with_capacity(args.len());
                for a in args {
                    values.push(expect_str_expr(a, "in")?);
                }
                Ok(ConditionNode::In(Arc::new(values)))
            }
            other => Err(ConfigError::new(format!(
                "unknown condition function '{}'",
                other
            ))),
        },
        Expr::Str(lit) => Ok(ConditionNode::Equals(lit.clone())),
        Expr::Field(_, _) => Err(ConfigError::new(
            "a table.column field cannot be used as a datatype condition",
        )),
        Expr::Regex { .. } => Err(ConfigError::new(
            "a bare regex literal cannot be used as a datatype condition; wrap it in match/search/exclude",
        )),
    }
}

/// Compile a column's `structure` expression.
pub fn compile_structure(expr: &Expr) -> Result<Structure, ConfigError> {
    match expr {
        Expr::Label(name) => match name.as_str() {
            "primary" => Ok(Structure::Primary),
            "unique" => Ok(Structure::Unique),
            other => Err(ConfigError::new(format!(
                "unknown structure keyword '{}'",
                other
            ))),
        },
        Expr::Function(name, args) => match name.as_str() {
            "from" => {
                let (ftable, fcolumn) = expect_field(args, "from")?;
                Ok(Structure::From { ftable, fcolumn })
            }
            "tree" => {
                let child = expect_label(args, "tree")?;
                Ok(Structure::Tree { child })
            }
            "under" => {
                if args.len() != 2 {
                    return Err(ConfigError::new("'under' requires exactly 2 arguments"));
                }
                let (ttable, tcolumn) = match &args[0] {
                    Expr::Field(t, c) => (t.clone(), c.clone()),
                    _ => return Err(ConfigError::new("'under' first argument must be table.column")),
                };
                let value = expect_str_expr(&args[1], "under")?;
                Ok(Structure::Under {
                    ttable,
                    tcolumn,
                    value,
                })
            }
            other => Err(ConfigError::new(format!(
                "unknown structure function '{}'",
                other
            ))),
        },
        _ => Err(ConfigError::new("invalid structure expression")),
    }
}

fn expect_str(args: &[Expr], arity: usize, func: &str) -> Result<String, ConfigError> {
    if args.len() != arity {
        return Err(ConfigError::new(format!(
            "'{}' expects {} argument(s), got {}",
            func,
            arity,
            args.len()
        )));
    }
    expect_str_expr(&args[0], func)
}

fn expect_str_expr(expr: &Expr, func: &str) -> Result<String, ConfigError> {
    match expr {
        Expr::Str(s) => Ok(s.clone()),
        Expr::Label(s) => Ok(s.clone()),
        _ => Err(ConfigError::new(format!(
            "'{}' expects a string literal argument",
            func
        ))),
    }
}

fn expect_regex(args: &[Expr], func: &str) -> Result<(String, String), ConfigError> {
    if args.len() != 1 {
        return Err(ConfigError::new(format!(
            "'{}' expects exactly one regex argument",
            func
        )));
    }
    match &args[0] {
        Expr::Regex { pattern, flags } => Ok((pattern.clone(), flags.clone())),
        _ => Err(ConfigError::new(format!(
            "'{}' expects a /regex/ argument",
            func
        ))),
    }
}

fn expect_field(args: &[Expr], func: &str) -> Result<(String, String), ConfigError> {
    if args.len() != 1 {
        return Err(ConfigError::new(format!(
            "'{}' expects exactly one table.column argument",
            func
        )));
    }
    match &args[0] {
        Expr::Field(t, c) => Ok((t.clone(), c.clone())),
        _ => Err(ConfigError::new(format!(
            "'{}' expects a table.column argument",
            func
        ))),
    }
}

fn expect_label(args: &[Expr], func: &str) -> Result<String, ConfigError> {
    if args.len() != 1 {
        return Err(ConfigError::new(format!(
            "'{}' expects exactly one column-name argument",
            func
        )));
    }
    match &args[0] {
        Expr::Label(s) => Ok(s.clone()),
        _ => Err(ConfigError::new(format!(
            "'{}' expects a bare column name argument",
            func
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::ast::parse;

    fn no_lookup(_: &str) -> Option<Arc<ConditionNode>> {
        None
    }

    #[test]
    fn compiles_equals() {
        let expr = parse("equals('car')").unwrap();
        let node = compile_condition(&expr, &no_lookup).unwrap();
        assert!(node.eval("car"));
        assert!(!node.eval("cars"));
    }

    #[test]
    fn compiles_match_full_string() {
        let expr = parse("match(/[a-z]+/)").unwrap();
        let node = compile_condition(&expr, &no_lookup).unwrap();
        assert!(node.eval("abc"));
        assert!(!node.eval("abc123"));
    }

    #[test]
    fn compiles_search_partial() {
        let expr = parse("search(/[0-9]+/)").unwrap();
        let node = compile_condition(&expr, &no_lookup).unwrap();
        assert!(node.eval("abc123"));
        assert!(!node.eval("abc"));
    }

    #[test]
    fn compiles_exclude() {
        let expr = parse("exclude(/[0-9]+/)").unwrap();
        let node = compile_condition(&expr, &no_lookup).unwrap();
        assert!(!node.eval("abc123"));
        assert!(node.eval("abc"));
    }

    #[test]
    fn compiles_in() {
        let expr = parse("in('red', 'green', 'blue')").unwrap();
        let node = compile_condition(&expr, &no_lookup).unwrap();
        assert!(node.eval("green"));
        assert!(!node.eval("purple"));
        assert_eq!(node.enumerated_values().unwrap().len(), 3);
    }

    #[test]
    fn datatype_ref_reuses_predicate() {
        let word_node = Arc::new(ConditionNode::Regex {
            regex: Arc::new(Regex::new(r"^\w+$").unwrap()),
            kind: RegexKind::Match,
        });
        let lookup = |name: &str| -> Option<Arc<ConditionNode>> {
            if name == "word" {
                Some(word_node.clone())
            } else {
                None
            }
        };
        let expr = parse("word").unwrap();
        let node = compile_condition(&expr, &lookup).unwrap();
        assert!(node.eval("hello"));
        assert!(!node.eval("hello world"));
    }

    #[test]
    fn rejects_unknown_function() {
        let expr = parse("frobnicate('x')").unwrap();
        assert!(compile_condition(&expr, &no_lookup).is_err());
    }

    #[test]
    fn compiles_structure_from() {
        let expr = parse("from(prefix.prefix)").unwrap();
        assert_eq!(
            compile_structure(&expr).unwrap(),
            Structure::From {
                ftable: "prefix".to_string(),
                fcolumn: "prefix".to_string()
            }
        );
    }

    #[test]
    fn compiles_structure_tree() {
        let expr = parse("tree(parent)").unwrap();
        assert_eq!(
            compile_structure(&expr).unwrap(),
            Structure::Tree {
                child: "parent".to_string()
            }
        );
    }

    #[test]
    fn compiles_structure_under() {
        let expr = parse("under(foobar.child, 'BFO:0000001')").unwrap();
        assert_eq!(
            compile_structure(&expr).unwrap(),
            Structure::Under {
                ttable: "foobar".to_string(),
                tcolumn: "child".to_string(),
                value: "BFO:0000001".to_string()
            }
        );
    }

    #[test]
    fn compiles_structure_primary_unique() {
        assert_eq!(
            compile_structure(&parse("primary").unwrap()).unwrap(),
            Structure::Primary
        );
        assert_eq!(
            compile_structure(&parse("unique").unwrap()).unwrap(),
            Structure::Unique
        );
    }
}
