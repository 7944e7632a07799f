use std::fmt::{Display, Formatter};

use pest::iterators::Pair;
use pest::Parser;
use serde::{Deserialize, Serialize};

use crate::wire::quote;

#[allow(missing_docs)]
mod parser {
    #[derive(pest_derive::Parser)]
    #[grammar = "expr.pest"]
    pub struct ExprParser;
}

use parser::{ExprParser, Rule};

const CAST_PREFIX: &str = "__cast__:";
const FIELD_PREFIX: &str = "__attr__:";

/// The operator of a unary node.
///
/// Casts and cross-type field reads travel as unary nodes with a reserved operator spelling, so
/// they round-trip through the same `(un "op" E)` form as the ordinary prefix operators.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum UnaryOp {
    /// An ordinary prefix operator, e.g. `-`, `!`, `~`, `not`.
    Prefix(String),
    /// View the operand as the given user type.
    Cast(String),
    /// Read the named field of the operand.
    Field(String),
}

impl UnaryOp {
    /// Decode the wire spelling of a unary operator.
    pub fn from_wire(op: &str) -> Self {
        if let Some(ty) = op.strip_prefix(CAST_PREFIX).filter(|s| !s.is_empty()) {
            UnaryOp::Cast(ty.to_string())
        } else if let Some(field) = op.strip_prefix(FIELD_PREFIX).filter(|s| !s.is_empty()) {
            UnaryOp::Field(field.to_string())
        } else {
            UnaryOp::Prefix(op.to_string())
        }
    }

    /// The wire spelling of this operator.
    pub fn to_wire(&self) -> String {
        match self {
            UnaryOp::Prefix(op) => op.clone(),
            UnaryOp::Cast(ty) => format!("{CAST_PREFIX}{ty}"),
            UnaryOp::Field(field) => format!("{FIELD_PREFIX}{field}"),
        }
    }
}

/// An expression tree.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Expr {
    Int(i64),
    Bool(bool),
    /// A reference to an attr, an instance, or a local binding such as the repeat item `_`.
    Name(String),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    /// Binary operators are kept as written, so that unknown operators survive a round trip.
    Binary {
        op: String,
        lhs: Box<Expr>,
        rhs: Box<Expr>,
    },
}

impl Expr {
    pub fn name(name: impl Into<String>) -> Self {
        Expr::Name(name.into())
    }

    pub fn unary(op: impl Into<String>, operand: Expr) -> Self {
        Expr::Unary {
            op: UnaryOp::from_wire(&op.into()),
            operand: Box::new(operand),
        }
    }

    pub fn binary(op: impl Into<String>, lhs: Expr, rhs: Expr) -> Self {
        Expr::Binary {
            op: op.into(),
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
        }
    }

    /// `operand` viewed as the user type `ty`.
    pub fn cast(ty: impl Into<String>, operand: Expr) -> Self {
        Expr::Unary {
            op: UnaryOp::Cast(ty.into()),
            operand: Box::new(operand),
        }
    }

    /// The field `field` of `operand`.
    pub fn field(operand: Expr, field: impl Into<String>) -> Self {
        Expr::Unary {
            op: UnaryOp::Field(field.into()),
            operand: Box::new(operand),
        }
    }

    /// Parse the wire form of an expression, e.g. `(bin "+" (name "len") (int 4))`.
    pub fn parse(text: &str) -> Result<Self, String> {
        if !text.trim_start().starts_with('(') {
            return Err("expression must start with '('".into());
        }
        let mut pairs = ExprParser::parse(Rule::file, text).map_err(|e| {
            let (line, col) = match e.line_col {
                pest::error::LineColLocation::Pos(pos) => pos,
                pest::error::LineColLocation::Span(start, _) => start,
            };
            if col > text.trim_end().len() {
                "expression missing closing ')'".to_string()
            } else {
                format!("malformed expression at {line}:{col}")
            }
        })?;
        let file = pairs.next().ok_or("empty expression")?;
        let expr = file
            .into_inner()
            .find(|p| p.as_rule() == Rule::expr)
            .ok_or("empty expression")?;
        Self::from_pair(expr)
    }

    fn from_pair(pair: Pair<Rule>) -> Result<Self, String> {
        let mut inner = pair.into_inner();
        let tag = inner.next().ok_or("missing expression tag")?.as_str();
        let args: Vec<_> = inner.collect();
        let arity = |n: usize| -> Result<(), String> {
            if args.len() == n {
                Ok(())
            } else {
                Err(format!(
                    "expression '{tag}' takes {n} arguments, {} given",
                    args.len()
                ))
            }
        };
        let string_arg = |pair: &Pair<Rule>, what: &str| -> Result<String, String> {
            match pair.as_rule() {
                Rule::string => Ok(unescape(pair.as_str())),
                _ => Err(format!("invalid {what}: {}", pair.as_str())),
            }
        };
        let expr_arg = |pair: &Pair<Rule>| -> Result<Expr, String> {
            match pair.as_rule() {
                Rule::expr => Expr::from_pair(pair.clone()),
                _ => Err(format!("expected an expression, found: {}", pair.as_str())),
            }
        };

        match tag {
            "int" => {
                arity(1)?;
                let text = args[0].as_str();
                text.parse()
                    .map(Expr::Int)
                    .map_err(|_| format!("invalid int literal: {text}"))
            }
            "bool" => {
                arity(1)?;
                match args[0].as_str() {
                    "true" => Ok(Expr::Bool(true)),
                    "false" => Ok(Expr::Bool(false)),
                    other => Err(format!("invalid bool literal: {other}")),
                }
            }
            "name" => {
                arity(1)?;
                Ok(Expr::Name(string_arg(&args[0], "name literal")?))
            }
            "un" => {
                arity(2)?;
                let op = string_arg(&args[0], "unary operator")?;
                Ok(Expr::Unary {
                    op: UnaryOp::from_wire(&op),
                    operand: Box::new(expr_arg(&args[1])?),
                })
            }
            "bin" => {
                arity(3)?;
                let op = string_arg(&args[0], "binary operator")?;
                Ok(Expr::binary(op, expr_arg(&args[1])?, expr_arg(&args[2])?))
            }
            _ => Err(format!("unknown expression tag: {tag}")),
        }
    }

    /// Visit this node and all its descendants, parents first.
    pub fn walk<'a>(&'a self, f: &mut impl FnMut(&'a Expr)) {
        f(self);
        match self {
            Expr::Int(_) | Expr::Bool(_) | Expr::Name(_) => {}
            Expr::Unary { operand, .. } => operand.walk(f),
            Expr::Binary { lhs, rhs, .. } => {
                lhs.walk(f);
                rhs.walk(f);
            }
        }
    }

    /// Whether this is an integer literal, possibly negated.
    pub fn as_int_literal(&self) -> Option<i64> {
        match self {
            Expr::Int(value) => Some(*value),
            Expr::Unary {
                op: UnaryOp::Prefix(op),
                operand,
            } if op == "-" => match operand.as_ref() {
                Expr::Int(value) => value.checked_neg(),
                _ => None,
            },
            _ => None,
        }
    }
}

/// Strip the surrounding quotes of a grammar string and resolve its escapes.
fn unescape(quoted: &str) -> String {
    let body = &quoted[1..quoted.len() - 1];
    let mut out = String::with_capacity(body.len());
    let mut chars = body.chars();
    while let Some(c) = chars.next() {
        if c == '\\' {
            if let Some(escaped) = chars.next() {
                out.push(escaped);
            }
        } else {
            out.push(c);
        }
    }
    out
}

impl Display for Expr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Expr::Int(value) => write!(f, "(int {value})"),
            Expr::Bool(value) => write!(f, "(bool {value})"),
            Expr::Name(name) => write!(f, "(name {})", quote(name)),
            Expr::Unary { op, operand } => write!(f, "(un {} {operand})", quote(&op.to_wire())),
            Expr::Binary { op, lhs, rhs } => write!(f, "(bin {} {lhs} {rhs})", quote(op)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use speculoos::prelude::*;

    #[test]
    fn test_parse_nested() {
        let expr = Expr::parse(r#"(bin "+" (name "len") (int 4))"#).unwrap();
        assert_eq!(
            expr,
            Expr::binary("+", Expr::name("len"), Expr::Int(4))
        );
        assert_eq!(expr.to_string(), r#"(bin "+" (name "len") (int 4))"#);
    }

    #[test]
    fn test_parse_sentinels() {
        let expr = Expr::parse(r#"(un "__attr__:len" (un "__cast__:header" (name "hdr")))"#)
            .unwrap();
        assert_eq!(
            expr,
            Expr::field(Expr::cast("header", Expr::name("hdr")), "len")
        );
    }

    #[test]
    fn test_parse_escaped_name() {
        let expr = Expr::parse(r#"(name "a\"b\\c")"#).unwrap();
        assert_eq!(expr, Expr::name("a\"b\\c"));
        assert_eq!(Expr::parse(&expr.to_string()).unwrap(), expr);
    }

    #[test]
    fn test_parse_whitespace() {
        let expr = Expr::parse("  ( bool   false )\n").unwrap();
        assert_eq!(expr, Expr::Bool(false));
    }

    #[test]
    fn test_parse_errors() {
        assert_that!(Expr::parse("int 4"))
            .is_err_containing("expression must start with '('".to_string());
        assert_that!(Expr::parse("(float 4)"))
            .is_err_containing("unknown expression tag: float".to_string());
        assert_that!(Expr::parse("(bool yes)"))
            .is_err_containing("invalid bool literal: yes".to_string());
        assert_that!(Expr::parse("(int 4"))
            .is_err_containing("expression missing closing ')'".to_string());
        assert!(Expr::parse("(int x)").is_err());
        assert!(Expr::parse(r#"(bin "+" (int 1))"#).is_err());
    }

    #[test]
    fn test_negative_literal() {
        assert_eq!(Expr::parse("(int -3)").unwrap().as_int_literal(), Some(-3));
        assert_eq!(
            Expr::unary("-", Expr::Int(3)).as_int_literal(),
            Some(-3)
        );
        assert_eq!(Expr::name("x").as_int_literal(), None);
    }
}
