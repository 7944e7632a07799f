//! Code generation from the IR of a binary format description.
//!
//! A [`Spec`](ksc_ir::Spec) is first wrapped in a [`Module`], which decodes its nested scopes
//! and resolves names. The module goes through the supported-subset check and is then handed to
//! a [`Backend`], found by target name in the [`BackendManager`]. [`render`] keeps the result in
//! memory, [`emit`] writes it to the output directory.

#[macro_use]
extern crate log;
#[macro_use]
extern crate lazy_static;

mod emit;
mod error;
mod expr;
mod gen;
pub mod lang;
pub mod resolve;
mod subset;

pub use emit::{emit, render, Artifact, EmitOptions};
pub use error::Error;
pub use lang::{Backend, BackendManager};
pub use resolve::Module;
pub use subset::{check_supported, lint};
