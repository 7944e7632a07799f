use std::collections::{HashMap, HashSet};
use std::path::Path;

use thiserror::Error;

use crate::alias::AliasTable;
use crate::model::*;

/// A violated structural rule of a spec.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("spec.name is required")]
    MissingSpecName,
    #[error("type.name is required")]
    MissingTypeName,
    #[error("duplicate type declaration: {0}")]
    DuplicateType(String),
    #[error("{0}user type reference requires user_type")]
    EmptyUserType(&'static str),
    #[error("enum.name is required")]
    MissingEnumName,
    #[error("duplicate enum declaration: {0}")]
    DuplicateEnum(String),
    #[error("enum.values must not be empty: {0}")]
    EmptyEnum(String),
    #[error("enum value name is required in enum: {0}")]
    MissingEnumValueName(String),
    #[error("duplicate enum value name in enum {0}: {1}")]
    DuplicateEnumValueName(String, String),
    #[error("duplicate enum value in enum {0}: {1}")]
    DuplicateEnumValue(String, i64),
    #[error("attr.id is required")]
    MissingAttrId,
    #[error("attr references unknown user type: {0}")]
    UnknownAttrType(String),
    #[error("attr.encoding is only allowed for primitive str type")]
    EncodingOnNonString,
    #[error("attr.repeat_expr is required when repeat={}", .0.as_str())]
    MissingRepeatExpr(RepeatKind),
    #[error("attr.repeat_expr is only allowed when repeat=expr/until")]
    UnexpectedRepeatExpr,
    #[error("attr.switch_cases requires attr.switch_on")]
    SwitchCasesWithoutSwitchOn,
    #[error("attr.switch_on requires at least one switch case")]
    SwitchOnWithoutCases,
    #[error("attr.switch_cases has duplicate switch else case")]
    DuplicateSwitchElse,
    #[error("switch case user-defined types are not supported in this migration slice")]
    UserTypeSwitchCase,
    #[error("attr.enum_name requires primitive integer type")]
    EnumOnNonInteger,
    #[error("attr references unknown enum: {0}")]
    UnknownEnum(String),
    #[error("instance.id is required")]
    MissingInstanceId,
    #[error("instance references unknown user type: {0}")]
    UnknownInstanceType(String),
    #[error("validation.target is required")]
    MissingValidationTarget,
    #[error("type alias cycle detected at: {0}")]
    AliasCycle(String),
    #[error("type \"{0}\" references unknown user type: {1}")]
    UnknownAliasTarget(String, String),
}

/// The file stem of an import, e.g. `common` for `../lib/common.ksir`.
pub fn import_stem(import: &str) -> &str {
    let file = import.rsplit(['/', '\\']).next().unwrap_or(import);
    Path::new(file)
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or(file)
}

/// Check the structural rules of a spec, stopping at the first violation.
///
/// A user type reference is known when it names the spec itself, one of its type declarations,
/// or the stem of one of its imports (a structure defined by the imported file).
pub fn validate(spec: &Spec) -> Result<(), ValidationError> {
    if spec.name.is_empty() {
        return Err(ValidationError::MissingSpecName);
    }

    let mut declared: HashSet<&str> = HashSet::new();
    declared.insert(&spec.name);
    let mut alias_edges: Vec<(&str, &str)> = vec![];
    for ty in &spec.types {
        if ty.name.is_empty() {
            return Err(ValidationError::MissingTypeName);
        }
        if !declared.insert(&ty.name) {
            return Err(ValidationError::DuplicateType(ty.name.clone()));
        }
        if let TypeRef::User(target) = &ty.ty {
            if target.is_empty() {
                return Err(ValidationError::EmptyUserType(""));
            }
            if ty.ty.embedded_payload().is_none() {
                alias_edges.push((ty.name.as_str(), target.as_str()));
            }
        }
    }
    let imported: HashSet<&str> = spec.imports.iter().map(|i| import_stem(i)).collect();
    let is_known = |name: &str| declared.contains(name) || imported.contains(name);

    let mut enum_names: HashSet<&str> = HashSet::new();
    for e in &spec.enums {
        if e.name.is_empty() {
            return Err(ValidationError::MissingEnumName);
        }
        if !enum_names.insert(&e.name) {
            return Err(ValidationError::DuplicateEnum(e.name.clone()));
        }
        if e.values.is_empty() {
            return Err(ValidationError::EmptyEnum(e.name.clone()));
        }
        let mut value_names = HashSet::new();
        let mut values = HashSet::new();
        for v in &e.values {
            if v.name.is_empty() {
                return Err(ValidationError::MissingEnumValueName(e.name.clone()));
            }
            if !value_names.insert(&v.name) {
                return Err(ValidationError::DuplicateEnumValueName(
                    e.name.clone(),
                    v.name.clone(),
                ));
            }
            if !values.insert(v.value) {
                return Err(ValidationError::DuplicateEnumValue(e.name.clone(), v.value));
            }
        }
    }

    let aliases = AliasTable::new(&spec.types);
    for attr in &spec.attrs {
        if attr.id.is_empty() {
            return Err(ValidationError::MissingAttrId);
        }
        if let TypeRef::User(name) = &attr.ty {
            if name.is_empty() {
                return Err(ValidationError::EmptyUserType("attr "));
            }
            if !is_known(name.as_str()) {
                return Err(ValidationError::UnknownAttrType(name.clone()));
            }
        }
        let primitive = aliases.resolve_primitive(&attr.ty);
        if attr.encoding.is_some() && primitive.is_some_and(|p| p != PrimitiveType::Str) {
            return Err(ValidationError::EncodingOnNonString);
        }
        match (attr.repeat.takes_expr(), &attr.repeat_expr) {
            (true, None) => return Err(ValidationError::MissingRepeatExpr(attr.repeat)),
            (false, Some(_)) => return Err(ValidationError::UnexpectedRepeatExpr),
            _ => {}
        }
        if !attr.switch_cases.is_empty() && attr.switch_on.is_none() {
            return Err(ValidationError::SwitchCasesWithoutSwitchOn);
        }
        if attr.switch_on.is_some() && attr.switch_cases.is_empty() {
            return Err(ValidationError::SwitchOnWithoutCases);
        }
        let mut has_else = false;
        for case in &attr.switch_cases {
            if case.matches.is_none() {
                if has_else {
                    return Err(ValidationError::DuplicateSwitchElse);
                }
                has_else = true;
            }
            // Cases may differ in width, the storage of the field is the widest of them.
            if aliases.resolve_primitive(&case.ty).is_none() {
                return Err(ValidationError::UserTypeSwitchCase);
            }
        }
        if let Some(enum_name) = &attr.enum_name {
            if !primitive.is_some_and(|p| p.is_integer()) {
                return Err(ValidationError::EnumOnNonInteger);
            }
            if !enum_names.iter().any(|e| matches_qualified(e, enum_name)) {
                return Err(ValidationError::UnknownEnum(enum_name.clone()));
            }
        }
    }

    for inst in &spec.instances {
        if inst.id.is_empty() {
            return Err(ValidationError::MissingInstanceId);
        }
        if let Some(TypeRef::User(name)) = inst.as_parse().map(|p| &p.ty) {
            if !is_known(name.as_str()) {
                return Err(ValidationError::UnknownInstanceType(name.clone()));
            }
        }
    }

    if spec.validations.iter().any(|v| v.target.is_empty()) {
        return Err(ValidationError::MissingValidationTarget);
    }

    check_alias_graph(&alias_edges, &is_known)
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum VisitState {
    Visiting,
    Visited,
}

/// Walk the alias graph in declaration order, failing at the first back edge or dangling edge.
///
/// Every alias has a single outgoing edge, so the depth-first visit is a walk along a chain.
fn check_alias_graph(
    edges: &[(&str, &str)],
    is_known: &dyn Fn(&str) -> bool,
) -> Result<(), ValidationError> {
    let targets: HashMap<&str, &str> = edges.iter().copied().collect();
    let mut state: HashMap<&str, VisitState> = HashMap::new();
    for &(start, _) in edges {
        let mut chain = vec![];
        let mut current = start;
        loop {
            match state.get(current) {
                Some(VisitState::Visited) => break,
                Some(VisitState::Visiting) => {
                    return Err(ValidationError::AliasCycle(current.to_string()))
                }
                None => {}
            }
            let Some(&target) = targets.get(current) else {
                break;
            };
            state.insert(current, VisitState::Visiting);
            chain.push(current);
            if !is_known(target) {
                return Err(ValidationError::UnknownAliasTarget(
                    current.to_string(),
                    target.to_string(),
                ));
            }
            current = target;
        }
        for name in chain {
            state.insert(name, VisitState::Visited);
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Expr;
    use speculoos::prelude::*;

    fn spec() -> Spec {
        Spec::new("s", Endian::Le)
    }

    #[test]
    fn test_missing_name() {
        assert_that!(validate(&Spec::default())).is_err_containing(ValidationError::MissingSpecName);
    }

    #[test]
    fn test_unknown_user_type() {
        let mut spec = spec();
        spec.attrs.push(Attr::new("a", TypeRef::user("nope")));
        let err = validate(&spec).unwrap_err();
        assert_eq!(err.to_string(), "attr references unknown user type: nope");
    }

    #[test]
    fn test_empty_user_type() {
        let mut spec = spec();
        spec.attrs.push(Attr::new("a", TypeRef::user("")));
        assert_that!(validate(&spec))
            .is_err_containing(ValidationError::EmptyUserType("attr "));
    }

    #[test]
    fn test_self_and_import_references() {
        let mut spec = spec();
        spec.imports.push("lib/common.ksir".into());
        spec.attrs.push(Attr::new("me", TypeRef::user("s")));
        spec.attrs.push(Attr::new("other", TypeRef::user("common")));
        assert_that!(validate(&spec)).is_ok();
    }

    #[test]
    fn test_alias_cycle() {
        let mut spec = spec();
        spec.types.push(TypeDef::new("a_t", TypeRef::user("b_t")));
        spec.types.push(TypeDef::new("b_t", TypeRef::user("a_t")));
        let err = validate(&spec).unwrap_err();
        assert_eq!(err, ValidationError::AliasCycle("a_t".into()));
        assert!(err.to_string().contains("cycle"));
    }

    #[test]
    fn test_alias_dangling() {
        let mut spec = spec();
        spec.types.push(TypeDef::new("a_t", TypeRef::user("b_t")));
        spec.types.push(TypeDef::new("b_t", TypeRef::user("c_t")));
        assert_eq!(
            validate(&spec).unwrap_err().to_string(),
            "type \"b_t\" references unknown user type: c_t"
        );
    }

    #[test]
    fn test_shared_alias_tail_is_not_a_cycle() {
        let mut spec = spec();
        spec.types.push(TypeDef::new("a_t", TypeRef::user("c_t")));
        spec.types.push(TypeDef::new("b_t", TypeRef::user("c_t")));
        spec.types.push(TypeDef::new("c_t", PrimitiveType::U2));
        assert_that!(validate(&spec)).is_ok();
    }

    #[test]
    fn test_enums() {
        let mut spec = spec();
        spec.enums.push(EnumDef::new("e", [(1, "a"), (2, "a")]));
        assert_that!(validate(&spec)).is_err_containing(
            ValidationError::DuplicateEnumValueName("e".into(), "a".into()),
        );
        spec.enums[0] = EnumDef::new("e", [(1, "a"), (1, "b")]);
        assert_that!(validate(&spec))
            .is_err_containing(ValidationError::DuplicateEnumValue("e".into(), 1));
        spec.enums[0] = EnumDef::new("e", Vec::<(i64, &str)>::new());
        assert_that!(validate(&spec)).is_err_containing(ValidationError::EmptyEnum("e".into()));
    }

    #[test]
    fn test_enum_reference() {
        let mut spec = spec();
        spec.types.push(TypeDef::new("byte_t", PrimitiveType::U1));
        spec.enums.push(EnumDef::new("zoo::animal", [(1, "cat")]));
        spec.attrs.push(Attr::new("pet", TypeRef::user("byte_t")).with_enum("animal"));
        assert_that!(validate(&spec)).is_ok();

        spec.attrs[0].enum_name = Some("plant".into());
        assert_that!(validate(&spec))
            .is_err_containing(ValidationError::UnknownEnum("plant".into()));

        spec.attrs[0] = Attr::new("pet", PrimitiveType::F4).with_enum("animal");
        assert_that!(validate(&spec)).is_err_containing(ValidationError::EnumOnNonInteger);
    }

    #[test]
    fn test_repeat_rules() {
        let mut spec = spec();
        spec.attrs
            .push(Attr::new("a", PrimitiveType::U1).with_repeat(RepeatKind::Until, None));
        assert_eq!(
            validate(&spec).unwrap_err().to_string(),
            "attr.repeat_expr is required when repeat=until"
        );
        spec.attrs[0] = Attr::new("a", PrimitiveType::U1).with_repeat(RepeatKind::Eos, Some(Expr::Int(1)));
        assert_that!(validate(&spec)).is_err_containing(ValidationError::UnexpectedRepeatExpr);
    }

    #[test]
    fn test_switch_rules() {
        let mut spec = spec();
        let on = Expr::name("tag");
        spec.attrs.push(Attr::new("body", PrimitiveType::U1).with_switch(
            on.clone(),
            vec![
                SwitchCase::on(Expr::Int(1), PrimitiveType::U1),
                SwitchCase::on(Expr::Int(2), PrimitiveType::U4),
            ],
        ));
        assert_that!(validate(&spec)).is_ok();

        spec.attrs[0] = Attr::new("body", PrimitiveType::U1).with_switch(
            on.clone(),
            vec![
                SwitchCase::otherwise(PrimitiveType::U1),
                SwitchCase::otherwise(PrimitiveType::U2),
            ],
        );
        assert_that!(validate(&spec)).is_err_containing(ValidationError::DuplicateSwitchElse);

        spec.attrs[0] = Attr::new("body", PrimitiveType::U1)
            .with_switch(on, vec![SwitchCase::otherwise(TypeRef::user("s"))]);
        assert_that!(validate(&spec)).is_err_containing(ValidationError::UserTypeSwitchCase);

        spec.attrs[0] = Attr::new("body", PrimitiveType::U1);
        spec.attrs[0].switch_cases = vec![SwitchCase::otherwise(PrimitiveType::U1)];
        assert_that!(validate(&spec))
            .is_err_containing(ValidationError::SwitchCasesWithoutSwitchOn);
    }

    #[test]
    fn test_encoding() {
        let mut spec = spec();
        spec.attrs
            .push(Attr::new("n", PrimitiveType::U2).with_encoding("UTF-8"));
        assert_that!(validate(&spec)).is_err_containing(ValidationError::EncodingOnNonString);
    }

    #[test]
    fn test_import_stem() {
        assert_eq!(import_stem("common.ksir"), "common");
        assert_eq!(import_stem("../lib/common.ksir"), "common");
        assert_eq!(import_stem(r"lib\common"), "common");
    }
}
