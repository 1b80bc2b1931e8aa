//! Parser for the condition DSL.
//!
//! Grammar (minimal):
//!
//! ```text
//! expr     := function | field | label
//! function := name '(' (arg (',' arg)*)? ')'
//! arg      := string | regex | field | label
//! field    := ident '.' ident
//! label    := ident | string
//! string   := "'" ... "'" | '"' ... '"'
//! regex    := '/' ... '/' flags?
//! ```
//!
//! The same grammar backs both datatype conditions and column structure
//! expressions (structure expressions evaluate to one of: primary, unique,
//! from(...), tree(...), under(...)).

use crate::errors::ConfigError;

/// One parsed argument or top-level expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// A bare or quoted identifier: a datatype reference (as a condition),
    /// a structural keyword (`primary`, `unique`), or a column name used as
    /// a function argument (e.g. the child column in `tree(child)`).
    Label(String),
    /// `table.column`.
    Field(String, String),
    /// A quoted string literal used as a function argument, e.g. `'lit'` in
    /// `equals('lit')` or the root value in `under(t.c, 'value')`.
    Str(String),
    /// `/pattern/flags`.
    Regex { pattern: String, flags: String },
    /// `name(args...)`.
    Function(String, Vec<Expr>),
}

/// Parse a single condition/structure expression from its textual form.
pub fn parse(input: &str) -> Result<Expr, ConfigError> {
    let mut parser = Parser::new(input);
    let expr = parser.parse_expr()?;
    parser.skip_ws();
    if !parser.at_end() {
        return Err(ConfigError::new(format!(
            "trailing input after condition expression: {:?}",
            &input[parser.pos..]
        )));
    }
    Ok(expr)
}

struct Parser<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            pos: 0,
        }
    }

    fn at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn peek(&self) -> Option<u8> {
        self.bytes.get(self.pos).copied()
    }

    fn skip_ws(&mut self) {
        while let Some(b) = self.peek() {
            if b.is_ascii_whitespace() {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    fn parse_expr(&mut self) -> Result<Expr, ConfigError> {
        self.skip_ws();
        match self.peek() {
            Some(b'\'') | Some(b'"') => {
                let s = self.parse_quoted()?;
                self.try_function_or_label(s)
            }
            Some(b'/') => {
                let (pattern, flags) = self.parse_regex()?;
                Ok(Expr::Regex { pattern, flags })
            }
            Some(c) if c.is_ascii_alphanumeric() || c == b'_' => {
                let ident = self.parse_ident();
                self.try_function_or_field(ident)
            }
            other => Err(ConfigError::new(format!(
                "unexpected character in condition: {:?}",
                other.map(|b| b as char)
            ))),
        }
    }

    /// After parsing a quoted string, check whether it's actually a function
    /// name immediately followed by `(` (quoted function names are allowed
    /// so reserved words can be used as a bare, possibly-quoted identifier);
    /// otherwise it's a bare label/literal.
    fn try_function_or_label(&mut self, name: String) -> Result<Expr, ConfigError> {
        self.skip_ws();
        if self.peek() == Some(b'(') {
            self.parse_function_args(name)
        } else {
            Ok(Expr::Label(name))
        }
    }

    fn try_function_or_field(&mut self, ident: String) -> Result<Expr, ConfigError> {
        self.skip_ws();
        match self.peek() {
            Some(b'(') => self.parse_function_args(ident),
            Some(b'.') => {
                self.pos += 1;
                self.skip_ws();
                let col = self.parse_ident_or_quoted()?;
                Ok(Expr::Field(ident, col))
            }
            _ => Ok(Expr::Label(ident)),
        }
    }

    fn parse_function_args(&mut self, name: String) -> Result<Expr, ConfigError> {
        // self.pos is at '('
        self.pos += 1;
        let mut args = Vec::new();
        self.skip_ws();
        if self.peek() == Some(b')') {
            self.pos += 1;
            return Ok(Expr::Function(name, args));
        }
        loop {
            let arg = self.parse_expr()?;
            args.push(arg);
            self.skip_ws();
            match self.peek() {
                Some(b',') => {
                    self.pos += 1;
                    self.skip_ws();
                }
                Some(b')') => {
                    self.pos += 1;
                    break;
                }
                other => {
                    return Err(ConfigError::new(format!(
                        "expected ',' or ')' in arguments to '{}', found {:?}",
                        name,
                        other.map(|b| b as char)
                    )))
                }
            }
        }
        Ok(Expr::Function(name, args))
    }

    fn parse_ident(&mut self) -> String {
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b.is_ascii_alphanumeric() || b == b'_' || b == b'-' {
                self.pos += 1;
            } else {
                break;
            }
        }
        self.src[start..self.pos].to_string()
    }

    fn parse_ident_or_quoted(&mut self) -> Result<String, ConfigError> {
        match self.peek() {
            Some(b'\'') | Some(b'"') => self.parse_quoted(),
            Some(c) if c.is_ascii_alphanumeric() || c == b'_' => Ok(self.parse_ident()),
            other => Err(ConfigError::new(format!(
                "expected identifier, found {:?}",
                other.map(|b| b as char)
            ))),
        }
    }

    fn parse_quoted(&mut self) -> Result<String, ConfigError> {
        let quote = self.peek().unwrap();
        self.pos += 1;
        let start = self.pos;
        while let Some(b) = self.peek() {
            if b == quote {
                let s = self.src[start..self.pos].to_string();
                self.pos += 1;
                return Ok(s);
            }
            self.pos += 1;
        }
        Err(ConfigError::new("unterminated quoted string in condition"))
    }

    fn parse_regex(&mut self) -> Result<(String, String), ConfigError> {
        // self.pos is at '/'
        self.pos += 1;
        let start = self.pos;
        loop {
            match self.peek() {
                Some(b'\\') => self.pos += 2,
                Some(b'/') => break,
                Some(_) => self.pos += 1,
                None => return Err(ConfigError::new("unterminated regex literal in condition")),
            }
        }
        let pattern = self.src[start..self.pos].to_string();
        self.pos += 1; // closing '/'
        let flags_start = self.pos;
        while let Some(b) = self.peek() {
            if b.is_ascii_alphabetic() {
                self.pos += 1;
            } else {
                break;
            }
        }
        let flags = self.src[flags_start..self.pos].to_string();
        Ok((pattern, flags))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_label() {
        assert_eq!(parse("word").unwrap(), Expr::Label("word".to_string()));
    }

    #[test]
    fn parses_equals() {
        assert_eq!(
            parse("equals('foo')").unwrap(),
            Expr::Function("equals".to_string(), vec![Expr::Str("foo".to_string())])
        );
    }

    #[test]
    fn parses_match_with_flags() {
        let e = parse("match(/^[A-Z]+$/i)").unwrap();
        match e {
            Expr::Function(name, args) => {
                assert_eq!(name, "match");
                assert_eq!(
                    args,
                    vec![Expr::Regex {
                        pattern: "^[A-Z]+$".to_string(),
                        flags: "i".to_string()
                    }]
                );
            }
            _ => panic!("expected function"),
        }
    }

    #[test]
    fn parses_in_list() {
        let e = parse("in('a', 'b', 'c')").unwrap();
        match e {
            Expr::Function(name, args) => {
                assert_eq!(name, "in");
                assert_eq!(args.len(), 3);
            }
            _ => panic!("expected function"),
        }
    }

    #[test]
    fn parses_from_field() {
        let e = parse("from(prefix.prefix)").unwrap();
        assert_eq!(
            e,
            Expr::Function(
                "from".to_string(),
                vec![Expr::Field("prefix".to_string(), "prefix".to_string())]
            )
        );
    }

    #[test]
    fn parses_under_with_value() {
        let e = parse("under(foobar.child, 'root')").unwrap();
        assert_eq!(
            e,
            Expr::Function(
                "under".to_string(),
                vec![
                    Expr::Field("foobar".to_string(), "child".to_string()),
                    Expr::Str("root".to_string())
                ]
            )
        );
    }

    #[test]
    fn parses_tree() {
        let e = parse("tree(child_col)").unwrap();
        assert_eq!(
            e,
            Expr::Function("tree".to_string(), vec![Expr::Label("child_col".to_string())])
        );
    }

    #[test]
    fn rejects_trailing_garbage() {
        assert!(parse("equals('a') extra").is_err());
    }

    #[test]
    fn rejects_unterminated_string() {
        assert!(parse("equals('a").is_err());
    }
}
