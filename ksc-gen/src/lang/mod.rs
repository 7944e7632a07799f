//! The code generation targets.
//!
//! Every target is a [`Backend`] registered in the [`BackendManager`]. A backend turns a
//! [`Module`] that passed the supported-subset check into the text of one or more artifacts.

use std::path::PathBuf;
use std::sync::Arc;

use heck::ToUpperCamelCase;
use ksc_ir::{Endian, Expr, PrimitiveType, Validation};

use crate::emit::{Artifact, EmitOptions};
use crate::error::Error;
use crate::gen::{gen_string, Gen};
use crate::resolve::{Module, Scope, UserType};

pub(crate) mod cpp;
pub(crate) mod lua;
pub(crate) mod python;
pub(crate) mod ruby;

/// A code generation target.
pub trait Backend: std::fmt::Debug + Send + Sync {
    /// Name of the target, unique between all the backends.
    fn name(&self) -> &'static str;

    /// Render all the artifacts of `module`, with paths relative to the output directory.
    fn render(&self, module: &Module, options: &EmitOptions) -> Result<Vec<Artifact>, Error>;
}

/// Entry point for the known backends.
#[derive(Debug)]
pub struct BackendManager {
    backends: Vec<Arc<dyn Backend>>,
}

impl BackendManager {
    fn new() -> BackendManager {
        BackendManager {
            backends: vec![
                Arc::new(cpp::CppStl),
                Arc::new(python::Python),
                Arc::new(ruby::Ruby),
                Arc::new(lua::Lua { wireshark: false }),
                Arc::new(lua::Lua { wireshark: true }),
            ],
        }
    }

    /// Search between the known backends the one with the specified name.
    pub fn from_name<S: AsRef<str>>(name: S) -> Option<Arc<dyn Backend>> {
        let manager = &BACKEND_MANAGER_SINGL;
        manager
            .backends
            .iter()
            .find(|backend| backend.name() == name.as_ref())
            .cloned()
    }

    /// The names of all the backends, in registration order.
    pub fn names() -> Vec<&'static str> {
        BACKEND_MANAGER_SINGL
            .backends
            .iter()
            .map(|backend| backend.name())
            .collect()
    }
}

lazy_static! {
    /// The singleton instance of the `BackendManager`.
    static ref BACKEND_MANAGER_SINGL: BackendManager = BackendManager::new();
}

/// The class name of a structure in the dynamic backends: `my_format` becomes `MyFormat`.
pub fn class_name(name: &str) -> String {
    let camel = name.to_upper_camel_case();
    if camel.is_empty() || camel.starts_with(|c: char| c.is_ascii_digit()) {
        format!("_{camel}")
    } else {
        camel
    }
}

/// The runtime stream method reading `primitive` with the given byte order.
pub fn read_method(primitive: PrimitiveType, endian: Endian) -> &'static str {
    let be = endian == Endian::Be;
    match primitive {
        PrimitiveType::U1 => "read_u1",
        PrimitiveType::S1 => "read_s1",
        PrimitiveType::U2 if be => "read_u2be",
        PrimitiveType::U2 => "read_u2le",
        PrimitiveType::U4 if be => "read_u4be",
        PrimitiveType::U4 => "read_u4le",
        PrimitiveType::U8 if be => "read_u8be",
        PrimitiveType::U8 => "read_u8le",
        PrimitiveType::S2 if be => "read_s2be",
        PrimitiveType::S2 => "read_s2le",
        PrimitiveType::S4 if be => "read_s4be",
        PrimitiveType::S4 => "read_s4le",
        PrimitiveType::S8 if be => "read_s8be",
        PrimitiveType::S8 => "read_s8le",
        PrimitiveType::F4 if be => "read_f4be",
        PrimitiveType::F4 => "read_f4le",
        PrimitiveType::F8 if be => "read_f8be",
        PrimitiveType::F8 => "read_f8le",
        PrimitiveType::Bytes | PrimitiveType::Str => "read_u1",
    }
}

/// The encoding of a `str` field without an explicit one.
pub const DEFAULT_ENCODING: &str = "UTF-8";

/// The expected value of a validation of the shape `target == literal` on a sequence attr.
///
/// Such checks raise the dedicated "not equal" error instead of the generic one.
pub fn expected_literal(scope: &Scope, validation: &Validation) -> Option<i64> {
    scope.spec.attr(&validation.target)?;
    let Expr::Binary { op, lhs, rhs } = &validation.condition else {
        return None;
    };
    if op != "==" {
        return None;
    }
    let is_target = |e: &Expr| matches!(e, Expr::Name(name) if *name == validation.target);
    match (lhs.as_ref(), rhs.as_ref()) {
        (target, Expr::Int(value)) if is_target(target) => Some(*value),
        (Expr::Int(value), target) if is_target(target) => Some(*value),
        _ => None,
    }
}

/// Whether every non-else case of a switch matches an integer literal.
pub fn has_literal_cases(cases: &[ksc_ir::SwitchCase]) -> bool {
    cases
        .iter()
        .filter_map(|case| case.matches.as_ref())
        .all(|matches| matches!(matches, Expr::Int(_)))
}

/// The external types used anywhere in `module` that an import provides, paired with the stem
/// of that import, in import order.
pub(crate) fn imported_types<'m>(module: &'m Module<'m>) -> Vec<(&'m str, &'m str)> {
    let mut used = vec![];
    for scope in module.scopes() {
        let attrs = scope
            .spec
            .attrs
            .iter()
            .filter_map(|attr| scope.attr_user_type(attr));
        let instances = scope
            .spec
            .instances
            .iter()
            .filter_map(|instance| instance.as_parse())
            .filter_map(|parse| scope.user_type(&parse.ty));
        for user in attrs.chain(instances) {
            if let UserType::External(name) = user {
                if !used.contains(&name) {
                    used.push(name);
                }
            }
        }
    }
    let mut imported = vec![];
    for import in &module.root().imports {
        let stem = ksc_ir::import_stem(import);
        for name in &used {
            if module.import_for(name) == Some(stem) && !imported.contains(&(stem, *name)) {
                imported.push((stem, *name));
            }
        }
    }
    imported
}

/// Render `item` into an artifact at `path`.
pub(crate) fn artifact<L, T: Gen<L> + ?Sized>(
    target: &str,
    path: PathBuf,
    item: &T,
    lang: &L,
    unit: &'static str,
) -> Result<Artifact, Error> {
    let content = gen_string(item, lang, unit).map_err(|_| Error::Render {
        target: target.to_string(),
    })?;
    debug!("Rendered {} ({} bytes)", path.display(), content.len());
    Ok(Artifact { path, content })
}
