//! Name resolution for code generation: embedded scopes, user types and enums.
//!
//! A [`Module`] is the root spec together with all the nested scopes decoded from its embedded
//! type declarations. Scopes are keyed by their path relative to the root (`outer::inner`), the
//! root itself having the empty path.

use std::collections::BTreeMap;

use ksc_ir::{
    decode_embedded, import_stem, matches_qualified, short_name, AliasTable, Attr, EnumDef,
    PrimitiveType, Resolved, Spec, TypeRef,
};

use crate::error::Error;

/// The separator of scope paths.
pub const SCOPE_SEP: &str = "::";

/// The segments of a scope path. The root path has none.
pub fn split_path(path: &str) -> Vec<&str> {
    if path.is_empty() {
        return vec![];
    }
    path.split(SCOPE_SEP).collect()
}

/// The path of the enclosing scope, the root for top-level scopes.
pub fn parent_path(path: &str) -> &str {
    path.rsplit_once(SCOPE_SEP).map(|(parent, _)| parent).unwrap_or("")
}

/// The last segment of a scope path.
pub fn last_segment(path: &str) -> &str {
    short_name(path)
}

/// The root spec and its decoded nested scopes.
#[derive(Debug)]
pub struct Module<'a> {
    root: &'a Spec,
    nested: BTreeMap<String, Spec>,
}

impl<'a> Module<'a> {
    /// Decode all the embedded scopes of `root`.
    ///
    /// Scope keys are the type declaration names, with a leading `<root name>::` removed.
    pub fn new(root: &'a Spec) -> Result<Self, Error> {
        let mut nested = BTreeMap::new();
        let rooted = format!("{}{SCOPE_SEP}", root.name);
        for ty in &root.types {
            let Some(payload) = ty.ty.embedded_payload() else {
                continue;
            };
            let scope = decode_embedded(&ty.name, payload)?;
            let key = ty.name.strip_prefix(&rooted).unwrap_or(&ty.name);
            debug!("Decoded scope {} of {}", key, root.name);
            nested.insert(key.to_string(), scope);
        }
        Ok(Self { root, nested })
    }

    /// The root spec.
    pub fn root(&self) -> &'a Spec {
        self.root
    }

    /// The name of the root spec.
    pub fn name(&self) -> &'a str {
        &self.root.name
    }

    /// Whether the module has nested scopes at all.
    pub fn has_nested(&self) -> bool {
        !self.nested.is_empty()
    }

    /// The spec of the scope at `path`.
    pub fn spec(&self, path: &str) -> Option<&Spec> {
        if path.is_empty() {
            Some(self.root)
        } else {
            self.nested.get(path)
        }
    }

    /// A view of the scope at `path`.
    pub fn scope<'m>(&'m self, path: &'m str) -> Option<Scope<'m>> {
        let spec = self.spec(path)?;
        let aliases = if path.is_empty() {
            AliasTable::new(&self.root.types)
        } else {
            AliasTable::new(self.root.types.iter().chain(&spec.types))
        };
        Some(Scope {
            module: self,
            path,
            spec,
            aliases,
        })
    }

    /// The root scope.
    pub fn root_scope(&self) -> Scope<'_> {
        Scope {
            module: self,
            path: "",
            spec: self.root,
            aliases: AliasTable::new(&self.root.types),
        }
    }

    /// All the scopes, root first, then nested ones in path order.
    pub fn scopes(&self) -> impl Iterator<Item = Scope<'_>> {
        std::iter::once(self.root_scope())
            .chain(self.nested.keys().filter_map(|path| self.scope(path)))
    }

    /// The scopes directly nested in `path`, sorted.
    pub fn children(&self, path: &str) -> Vec<&str> {
        self.nested
            .keys()
            .filter(|key| parent_path(key) == path)
            .map(|key| key.as_str())
            .collect()
    }

    /// The nested scope a user type name refers to.
    ///
    /// An exact key wins, then the key with the root name prefix removed, then the first scope
    /// whose path ends with `::reference`.
    pub fn resolve_scope_ref(&self, reference: &str) -> Option<&str> {
        if let Some((key, _)) = self.nested.get_key_value(reference) {
            return Some(key);
        }
        let rooted = format!("{}{SCOPE_SEP}", self.root.name);
        if let Some(relative) = reference.strip_prefix(&rooted) {
            if let Some((key, _)) = self.nested.get_key_value(relative) {
                return Some(key);
            }
        }
        self.nested
            .keys()
            .find(|key| matches_qualified(key, reference))
            .map(|key| key.as_str())
    }

    /// The innermost scope, starting from `from` and walking outwards, that declares an enum
    /// with the same short name as `reference`.
    pub fn enum_owner(&self, from: &str, reference: &str) -> Option<(&str, &EnumDef)> {
        let wanted = short_name(reference);
        let mut current = from;
        loop {
            if let Some(spec) = self.spec(current) {
                if let Some(def) = spec.enums.iter().find(|e| e.short_name() == wanted) {
                    let path = if current.is_empty() {
                        ""
                    } else {
                        self.nested.get_key_value(current).map(|(k, _)| k.as_str())?
                    };
                    return Some((path, def));
                }
            }
            if current.is_empty() {
                return None;
            }
            current = parent_path(current);
        }
    }

    /// The stem of the import defining the external type `name`, if any.
    pub fn import_for(&self, name: &str) -> Option<&'a str> {
        self.root
            .imports
            .iter()
            .map(|import| import_stem(import))
            .find(|stem| matches_qualified(name, stem))
    }
}

/// What a non-primitive type reference designates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserType<'m> {
    /// A nested scope of the module, by path.
    Nested(&'m str),
    /// A structure defined elsewhere, e.g. by an imported file.
    External(&'m str),
}

/// A scope of a [`Module`] with its alias table.
///
/// Inside a nested scope the aliases of the root are visible, shadowed by the scope's own.
#[derive(Debug, Clone)]
pub struct Scope<'m> {
    pub module: &'m Module<'m>,
    pub path: &'m str,
    pub spec: &'m Spec,
    aliases: AliasTable<'m>,
}

impl<'m> Scope<'m> {
    pub fn is_root(&self) -> bool {
        self.path.is_empty()
    }

    /// The unqualified name of the structure of this scope.
    pub fn name(&self) -> &'m str {
        if self.is_root() {
            self.module.name()
        } else {
            last_segment(self.path)
        }
    }

    /// The primitive `ty` stands for, following aliases.
    pub fn primitive(&self, ty: &'m TypeRef) -> Option<PrimitiveType> {
        self.aliases.resolve_primitive(ty)
    }

    /// Classify a reference that is not a primitive.
    pub fn user_type(&self, ty: &'m TypeRef) -> Option<UserType<'m>> {
        match self.aliases.resolve(ty) {
            Resolved::Primitive(_) => None,
            Resolved::Opaque(name) => Some(match self.module.resolve_scope_ref(name) {
                Some(path) => UserType::Nested(path),
                None => UserType::External(name),
            }),
        }
    }

    /// The user type of an attr read as a sub-structure. Switch attrs are never sub-structures.
    pub fn attr_user_type(&self, attr: &'m Attr) -> Option<UserType<'m>> {
        if attr.switch_on.is_some() {
            return None;
        }
        self.user_type(&attr.ty)
    }

    /// The primitive an attr is read as. For a switch this is the widest case, the first one
    /// winning ties.
    pub fn attr_primitive(&self, attr: &'m Attr) -> Option<PrimitiveType> {
        if attr.switch_on.is_none() || attr.switch_cases.is_empty() {
            return self.primitive(&attr.ty);
        }
        let mut selected: Option<PrimitiveType> = None;
        for case in &attr.switch_cases {
            let primitive = self.primitive(&case.ty)?;
            if selected.map_or(true, |s| primitive.storage_rank() > s.storage_rank()) {
                selected = Some(primitive);
            }
        }
        selected
    }

    /// The primitive of a switch case, defaulting to `u1` for anything the subset check rejects.
    pub fn case_primitive(&self, ty: &'m TypeRef) -> PrimitiveType {
        self.primitive(ty).unwrap_or(PrimitiveType::U1)
    }

    /// Whether `name` is an attr or an instance of this scope.
    pub fn is_member(&self, name: &str) -> bool {
        self.spec.attr(name).is_some() || self.spec.instance(name).is_some()
    }

    /// The scope declaring the enum `reference` and its definition, by lexical lookup.
    pub fn enum_owner(&self, reference: &str) -> Option<(&'m str, &'m EnumDef)> {
        self.module.enum_owner(self.path, reference)
    }

    /// The 0-based position of the attr `id` in the sequence.
    pub fn attr_index(&self, id: &str) -> Option<usize> {
        self.spec.attrs.iter().position(|a| a.id == id)
    }
}
