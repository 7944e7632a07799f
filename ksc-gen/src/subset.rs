//! The constructs the backends know how to lower.
//!
//! The check runs on every scope before anything is rendered, so a backend never has to fall back
//! to a guess: whatever it meets has been accepted here.

use std::collections::HashSet;

use ksc_diagnostics::{CodeSpan, Diagnostic, DiagnosticContext};
use ksc_ir::{Expr, InstanceKind, PrimitiveType, Process, UnaryOp};

use crate::error::Error;
use crate::resolve::{Module, Scope};

/// The binary operators the expression renderer lowers.
pub const BINARY_OPS: &[&str] = &[
    "+", "-", "*", "/", "%", "==", "!=", ">", ">=", "<", "<=", "&&", "||", "and", "or", "&", "|",
    "^", "xor", "<<", ">>",
];

/// The prefix operators the expression renderer lowers.
pub const UNARY_OPS: &[&str] = &["-", "!", "not", "~"];

/// The name bound to the item just read inside a repeat-until condition.
pub const REPEAT_ITEM: &str = "_";

/// Check that every scope of `module` stays within the supported subset.
pub fn check_supported(module: &Module) -> Result<(), Error> {
    for scope in module.scopes() {
        check_scope(&scope)?;
    }
    Ok(())
}

fn check_scope(scope: &Scope) -> Result<(), Error> {
    let spec = scope.spec;
    for attr in &spec.attrs {
        if scope.attr_user_type(attr).is_some() {
            if attr.encoding.is_some() || attr.process.is_some() || attr.enum_name.is_some() {
                return Err(Error::unsupported(
                    "complex user-type attrs in this migration slice",
                ));
            }
            continue;
        }
        for case in &attr.switch_cases {
            if scope.primitive(&case.ty).is_none() {
                return Err(Error::unsupported(
                    "switch-on case type must resolve to primitive type",
                ));
            }
        }
        let Some(primitive) = scope.attr_primitive(attr) else {
            return Err(Error::unsupported("attr type must resolve to primitive type"));
        };
        if attr.encoding.is_some() && primitive != PrimitiveType::Str {
            return Err(Error::unsupported("encoding outside str attrs"));
        }
        if let Some(Process::XorConst(_)) = attr.process {
            if primitive != PrimitiveType::Bytes || attr.switch_on.is_some() {
                return Err(Error::unsupported("process outside bytes attrs"));
            }
        }
        if let Some(enum_name) = &attr.enum_name {
            if scope.enum_owner(enum_name).is_none() {
                return Err(Error::unsupported(
                    "attr.enum_name references unknown enum",
                ));
            }
            if !primitive.is_integer() {
                return Err(Error::unsupported("enum attrs must be integer-backed"));
            }
        }
    }

    let mut known: HashSet<&str> = spec.attrs.iter().map(|a| a.id.as_str()).collect();
    for instance in &spec.instances {
        match &instance.kind {
            InstanceKind::Value(expr) => check_expr(expr, &known)?,
            InstanceKind::Parse(parse) => {
                if scope.user_type(&parse.ty).is_some() && parse.encoding.is_some() {
                    return Err(Error::unsupported(
                        "encoding on user-type parse instances",
                    ));
                }
                for expr in parse.pos.iter().chain(&parse.size) {
                    check_expr(expr, &known)?;
                }
            }
        }
        known.insert(instance.id.as_str());
    }

    for validation in &spec.validations {
        if !known.contains(validation.target.as_str()) {
            return Err(Error::unsupported(format!(
                "validation target outside attrs/instances: {}",
                validation.target
            )));
        }
        check_expr(&validation.condition, &known)?;
    }

    for attr in &spec.attrs {
        let exprs = attr
            .if_expr
            .iter()
            .chain(&attr.size)
            .chain(&attr.repeat_expr)
            .chain(&attr.switch_on)
            .chain(attr.switch_cases.iter().filter_map(|c| c.matches.as_ref()));
        for expr in exprs {
            check_expr(expr, &known)?;
        }
    }
    Ok(())
}

fn check_expr(expr: &Expr, known: &HashSet<&str>) -> Result<(), Error> {
    let mut result = Ok(());
    expr.walk(&mut |node| {
        if result.is_err() {
            return;
        }
        result = match node {
            Expr::Int(_) | Expr::Bool(_) => Ok(()),
            Expr::Name(name) if name == REPEAT_ITEM || known.contains(name.as_str()) => Ok(()),
            Expr::Name(name) => Err(Error::unsupported(format!(
                "expression name reference outside attrs/instances: {name}"
            ))),
            Expr::Unary {
                op: UnaryOp::Prefix(op),
                ..
            } if !UNARY_OPS.contains(&op.as_str()) => Err(Error::unsupported(format!(
                "unary operator \"{op}\""
            ))),
            Expr::Unary { .. } => Ok(()),
            Expr::Binary { op, .. } if !BINARY_OPS.contains(&op.as_str()) => Err(
                Error::unsupported(format!("binary operator \"{op}\"")),
            ),
            Expr::Binary { .. } => Ok(()),
        };
    });
    result
}

/// Warn about the documented limitations the generated code carries.
///
/// A `str` field without a size cannot be read yet: it is emitted as an always-empty string.
pub fn lint(module: &Module, ir_file: Option<&std::path::Path>, diagnostics: &mut DiagnosticContext) {
    for scope in module.scopes() {
        let owner = if scope.is_root() {
            module.name().to_string()
        } else {
            format!("{}::{}", module.name(), scope.path)
        };
        let mut sizeless = vec![];
        for attr in &scope.spec.attrs {
            if attr.size.is_none()
                && scope.attr_user_type(attr).is_none()
                && scope.attr_primitive(attr) == Some(PrimitiveType::Str)
            {
                sizeless.push(("attr", attr.id.as_str()));
            }
        }
        for instance in &scope.spec.instances {
            if let Some(parse) = instance.as_parse() {
                if parse.size.is_none() && scope.primitive(&parse.ty) == Some(PrimitiveType::Str) {
                    sizeless.push(("instance", instance.id.as_str()));
                }
            }
        }
        for (kind, id) in sizeless {
            warn!("{} {} of {} is a str without size", kind, id, owner);
            let mut diagnostic = Diagnostic::warning(format!(
                "str {kind} `{id}` of `{owner}` has no size"
            ))
            .with_note("it is emitted as an always-empty string")
            .with_help("give the field a size");
            if let Some(span) = ir_file.and_then(|file| row_span(file, kind, id)) {
                diagnostic = diagnostic.with_code_span(span);
            }
            diagnostics.add_diagnostic(diagnostic);
        }
    }
}

/// The span of the row declaring `id`, when the IR file can be read back.
fn row_span(file: &std::path::Path, kind: &str, id: &str) -> Option<CodeSpan> {
    let content = std::fs::read_to_string(file).ok()?;
    let prefix = format!("{kind} \"{id}\"");
    let (index, line) = content
        .lines()
        .enumerate()
        .find(|(_, line)| line.starts_with(&prefix))?;
    CodeSpan::from_line(file, index + 1, line, 0, prefix.len()).ok()
}
