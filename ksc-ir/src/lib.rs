//! The intermediate representation of a binary format description.
//!
//! A [`Spec`] describes one structure: its sequence of fields ([`Attr`]), lazily computed or
//! parsed fields ([`Instance`]), enums, type aliases and post-read checks. Specs are stored in a
//! line-oriented textual format (see [`wire`]), may import other specs (see
//! [`load_with_imports`]) and are checked by [`validate`] before any code is generated from them.

#[macro_use]
extern crate log;

mod alias;
mod error;
mod expr;
mod import;
mod model;
mod scope;
mod validate;
pub mod wire;

pub use alias::{AliasTable, Resolved};
pub use error::{Error, SymbolKind};
pub use expr::{Expr, UnaryOp};
pub use import::{load_from_file, load_with_imports, resolve_import};
pub use model::*;
pub use scope::{decode_embedded, SCOPE_PREFIX};
pub use validate::{import_stem, validate, ValidationError};
pub use wire::{deserialize, deserialize_unchecked, serialize};
