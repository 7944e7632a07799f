use std::collections::{HashMap, HashSet};

use crate::model::{PrimitiveType, TypeDef, TypeRef};

/// What a type reference stands for once its aliases are followed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolved<'a> {
    /// The chain ends at a primitive.
    Primitive(PrimitiveType),
    /// The chain ends at a name that is not an alias of anything else: a user-defined structure.
    Opaque(&'a str),
}

/// Lookup table from alias name to aliased type.
#[derive(Debug, Clone, Default)]
pub struct AliasTable<'a> {
    aliases: HashMap<&'a str, &'a TypeRef>,
}

impl<'a> AliasTable<'a> {
    /// Build the table from type declarations. Later declarations shadow earlier ones.
    pub fn new(types: impl IntoIterator<Item = &'a TypeDef>) -> Self {
        let aliases = types
            .into_iter()
            .filter(|t| t.ty.embedded_payload().is_none())
            .map(|t| (t.name.as_str(), &t.ty))
            .collect();
        Self { aliases }
    }

    /// Whether `name` is an alias.
    pub fn contains(&self, name: &str) -> bool {
        self.aliases.contains_key(name)
    }

    /// Follow the alias chain of `ty`.
    ///
    /// A cycle, which the validator rejects, resolves to the name at which it was detected.
    pub fn resolve(&self, ty: &'a TypeRef) -> Resolved<'a> {
        let mut current = match ty {
            TypeRef::Primitive(p) => return Resolved::Primitive(*p),
            TypeRef::User(name) => name.as_str(),
        };
        let mut seen = HashSet::new();
        loop {
            if !seen.insert(current) {
                return Resolved::Opaque(current);
            }
            let Some(target) = self.aliases.get(current).copied() else {
                return Resolved::Opaque(current);
            };
            match target {
                TypeRef::Primitive(p) => return Resolved::Primitive(*p),
                TypeRef::User(next) => current = next.as_str(),
            }
        }
    }

    /// The primitive `ty` stands for, `None` for user-defined structures.
    pub fn resolve_primitive(&self, ty: &'a TypeRef) -> Option<PrimitiveType> {
        match self.resolve(ty) {
            Resolved::Primitive(p) => Some(p),
            Resolved::Opaque(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use speculoos::prelude::*;

    #[test]
    fn test_chain() {
        let types = vec![
            TypeDef::new("a_t", TypeRef::user("b_t")),
            TypeDef::new("b_t", PrimitiveType::U4),
            TypeDef::new("c_t", TypeRef::user("outer")),
        ];
        let table = AliasTable::new(&types);
        let a = TypeRef::user("a_t");
        let c = TypeRef::user("c_t");
        assert_that!(table.resolve_primitive(&a)).is_equal_to(Some(PrimitiveType::U4));
        assert_that!(table.resolve(&c)).is_equal_to(Resolved::Opaque("outer"));
    }

    #[test]
    fn test_cycle_terminates() {
        let types = vec![
            TypeDef::new("a_t", TypeRef::user("b_t")),
            TypeDef::new("b_t", TypeRef::user("a_t")),
        ];
        let table = AliasTable::new(&types);
        let a = TypeRef::user("a_t");
        assert_that!(table.resolve_primitive(&a)).is_none();
    }
}
