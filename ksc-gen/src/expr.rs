//! Precedence-aware rendering of IR expressions.
//!
//! Every backend renders expressions with the same algorithm and supplies an [`ExprStyle`] for
//! the parts that differ: literal and operator spellings, and what a name turns into.

use ksc_ir::{Expr, UnaryOp};

use crate::gen::*;

/// The context of a top-level expression: never parenthesized.
pub const TOP: i32 = -1;
/// The context of the operand of a unary operator, tighter than any binary operator.
pub const UNARY: i32 = 90;

/// The canonical spelling of an operator, mapping the keyword forms to the symbolic ones.
pub fn normalize_op(op: &str) -> &str {
    match op {
        "and" => "&&",
        "or" => "||",
        "xor" => "^",
        "not" => "!",
        other => other,
    }
}

/// The binding strength of a normalized binary operator. Unknown operators bind loosest.
pub fn precedence(op: &str) -> i32 {
    match op {
        "||" => 10,
        "&&" => 20,
        "|" => 30,
        "^" => 35,
        "&" => 40,
        "==" | "!=" => 45,
        "<" | "<=" | ">" | ">=" => 50,
        "<<" | ">>" => 55,
        "+" | "-" => 60,
        "*" | "/" | "%" => 70,
        _ => 5,
    }
}

/// Whether a normalized operator yields a boolean.
pub fn is_boolean_op(op: &str) -> bool {
    matches!(op, "&&" | "||" | "==" | "!=" | "<" | "<=" | ">" | ">=" | "!")
}

fn is_logical(op: &str) -> bool {
    matches!(op, "&&" | "||")
}

/// How a backend spells expressions.
pub trait ExprStyle {
    fn bool_literal(&self, value: bool) -> &'static str;

    /// A reference to `name`: an accessor when it is a member, the bound repeat item for `_`,
    /// the name itself otherwise.
    fn name(&self, name: &str) -> String;

    /// The spelling of a normalized binary operator.
    fn binary_op<'o>(&self, op: &'o str) -> &'o str {
        op
    }

    /// The spelling of a normalized prefix operator, including any separating space.
    fn prefix_op<'o>(&self, op: &'o str) -> &'o str {
        op
    }

    /// `operand` viewed as the user type `ty`. Dynamic backends need no cast.
    fn cast(&self, _ty: &str, operand: String) -> String {
        operand
    }

    /// The field `field` of the structure `operand`.
    fn field(&self, operand: String, field: &str) -> String {
        format!("{operand}.{field}")
    }
}

/// An expression in the context of a parent operator of precedence `parent`.
pub struct Operand<'e> {
    pub expr: &'e Expr,
    pub parent: i32,
}

impl<'e> Operand<'e> {
    pub fn new(expr: &'e Expr, parent: i32) -> Self {
        Self { expr, parent }
    }
}

impl<L: ExprStyle> Gen<L> for Operand<'_> {
    fn gen(&self, ctx: GenContext<L>) -> Result {
        let lang = ctx.lang;
        match self.expr {
            Expr::Int(value) => ctx.append(value),
            Expr::Bool(value) => ctx.append(lang.bool_literal(*value)),
            Expr::Name(name) => ctx.append(lang.name(name)),
            Expr::Unary { op, operand } => {
                let operand = Operand::new(operand, UNARY);
                match op {
                    UnaryOp::Prefix(op) => {
                        let op = Raw(lang.prefix_op(normalize_op(op)));
                        gen!(ctx, "({}{})" % (&op, &operand))
                    }
                    UnaryOp::Cast(ty) => {
                        let inner = gen_string(&operand, lang, ctx.unit)?;
                        ctx.append(lang.cast(ty, inner))
                    }
                    UnaryOp::Field(field) => {
                        let inner = gen_string(&operand, lang, ctx.unit)?;
                        ctx.append(lang.field(inner, field))
                    }
                }
            }
            Expr::Binary { op, lhs, rhs } => {
                let op = normalize_op(op);
                let prec = precedence(op);
                let lhs = Operand::new(lhs, prec);
                let rhs = Operand::new(rhs, prec + 1);
                let spelled = Raw(lang.binary_op(op));
                if is_logical(op) {
                    gen!(ctx, "(({}) {} ({}))" % (&lhs, &spelled, &rhs))
                } else if prec <= self.parent {
                    gen!(ctx, "({} {} {})" % (&lhs, &spelled, &rhs))
                } else {
                    gen!(ctx, "{} {} {}" % (&lhs, &spelled, &rhs))
                }
            }
        }
    }
}

impl<L: ExprStyle> Gen<L> for Expr {
    fn gen(&self, ctx: GenContext<L>) -> Result {
        Operand::new(self, TOP).gen(ctx)
    }
}

/// A top-level expression in which `_` stands for the local `item`.
pub struct WithItem<'e> {
    pub expr: &'e Expr,
    pub item: &'static str,
}

impl<L: ExprStyle> Gen<L> for WithItem<'_> {
    fn gen(&self, ctx: GenContext<L>) -> Result {
        let lang = ItemBinding {
            inner: ctx.lang,
            item: self.item,
        };
        self.expr.gen(&mut ctx.with_lang(&lang))
    }
}

struct ItemBinding<'a, L> {
    inner: &'a L,
    item: &'static str,
}

impl<L: ExprStyle> ExprStyle for ItemBinding<'_, L> {
    fn bool_literal(&self, value: bool) -> &'static str {
        self.inner.bool_literal(value)
    }

    fn name(&self, name: &str) -> String {
        if name == "_" {
            self.item.to_string()
        } else {
            self.inner.name(name)
        }
    }

    fn binary_op<'o>(&self, op: &'o str) -> &'o str {
        self.inner.binary_op(op)
    }

    fn prefix_op<'o>(&self, op: &'o str) -> &'o str {
        self.inner.prefix_op(op)
    }

    fn cast(&self, ty: &str, operand: String) -> String {
        self.inner.cast(ty, operand)
    }

    fn field(&self, operand: String, field: &str) -> String {
        self.inner.field(operand, field)
    }
}

/// Render a top-level expression.
pub fn render<L: ExprStyle>(expr: &Expr, lang: &L) -> std::result::Result<String, std::fmt::Error> {
    gen_string(expr, lang, "")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    /// Members are called as methods, `_` is the item just read.
    struct Methods;

    impl ExprStyle for Methods {
        fn bool_literal(&self, value: bool) -> &'static str {
            if value {
                "true"
            } else {
                "false"
            }
        }

        fn name(&self, name: &str) -> String {
            match name {
                "_" => "item".into(),
                "a" | "b" | "lit" => format!("{name}()"),
                other => other.into(),
            }
        }

        fn cast(&self, ty: &str, operand: String) -> String {
            format!("static_cast<{ty}_t*>({operand})")
        }

        fn field(&self, operand: String, field: &str) -> String {
            format!("{operand}->{field}()")
        }
    }

    /// Keyword logic operators.
    struct Keywords;

    impl ExprStyle for Keywords {
        fn bool_literal(&self, value: bool) -> &'static str {
            if value {
                "True"
            } else {
                "False"
            }
        }

        fn name(&self, name: &str) -> String {
            format!("self.{name}")
        }

        fn binary_op<'o>(&self, op: &'o str) -> &'o str {
            match op {
                "&&" => "and",
                "||" => "or",
                other => other,
            }
        }

        fn prefix_op<'o>(&self, op: &'o str) -> &'o str {
            match op {
                "!" => "not ",
                other => other,
            }
        }
    }

    fn bin(op: &str, lhs: Expr, rhs: Expr) -> Expr {
        Expr::binary(op, lhs, rhs)
    }

    #[test]
    fn test_precedence_table() {
        assert!(precedence("||") < precedence("&&"));
        assert!(precedence("==") < precedence("<"));
        assert!(precedence("+") < precedence("*"));
        assert_eq!(precedence("**"), 5);
        assert_eq!(precedence(normalize_op("xor")), precedence("^"));
    }

    #[test]
    fn test_arithmetic_minimal_parens() {
        // a + b * 3 - 2, parsed left-associatively.
        let expr = bin(
            "-",
            bin("+", Expr::name("a"), bin("*", Expr::name("b"), Expr::Int(3))),
            Expr::Int(2),
        );
        assert_eq!(render(&expr, &Methods).unwrap(), "(a() + b() * 3) - 2");
        let expr = bin("*", bin("+", Expr::name("a"), Expr::Int(1)), Expr::name("b"));
        assert_eq!(render(&expr, &Methods).unwrap(), "(a() + 1) * b()");
    }

    #[test]
    fn test_logical_grouping() {
        let expr = bin(
            "and",
            bin(">", Expr::name("a"), Expr::name("b")),
            bin("==", Expr::name("lit"), Expr::Int(7)),
        );
        assert_eq!(
            render(&expr, &Methods).unwrap(),
            "((a() > b()) && (lit() == 7))"
        );
        assert_eq!(
            render(&expr, &Keywords).unwrap(),
            "((self.a > self.b) and (self.lit == 7))"
        );
    }

    #[test]
    fn test_unary() {
        let expr = Expr::unary("not", Expr::name("a"));
        assert_eq!(render(&expr, &Methods).unwrap(), "(!a())");
        assert_eq!(render(&expr, &Keywords).unwrap(), "(not self.a)");
        let expr = Expr::unary("-", bin("+", Expr::Int(1), Expr::Int(2)));
        assert_eq!(render(&expr, &Methods).unwrap(), "(-(1 + 2))");
    }

    #[test]
    fn test_cast_and_field() {
        let expr = Expr::field(Expr::cast("chunk", Expr::name("a")), "tag");
        assert_eq!(
            render(&expr, &Methods).unwrap(),
            "static_cast<chunk_t*>(a())->tag()"
        );
        assert_eq!(render(&expr, &Keywords).unwrap(), "self.a.tag");
    }

    #[test]
    fn test_repeat_item_and_locals() {
        let expr = bin("==", Expr::name("_"), Expr::name("i"));
        assert_eq!(render(&expr, &Methods).unwrap(), "item == i");
        let bound = WithItem {
            expr: &bin("==", Expr::name("_"), Expr::name("a")),
            item: "repeat_item",
        };
        assert_eq!(
            gen_string(&bound, &Keywords, "").unwrap(),
            "repeat_item == self.a"
        );
    }
}
