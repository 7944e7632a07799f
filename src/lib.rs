//! # ksc-rust
//!
//! The middle stage of a binary format compiler: it reads the textual IR produced by a front-end,
//! follows its imports, validates it and generates parsers for C++, Python, Ruby, Lua and
//! Wireshark.
//!
//! ```no_run
//! use ksc_rust::{compile, CompileOptions, NiceError};
//!
//! let options = CompileOptions::from_env().nice_unwrap();
//! let compilation = compile("packet.ksir", &options).nice_unwrap();
//! for diagnostic in compilation.diagnostics.diagnostics() {
//!     eprintln!("{diagnostic}");
//! }
//! ```

#[macro_use]
extern crate log;

mod compile;
mod error;
mod opt;

pub use compile::*;
pub use error::*;
pub use opt::*;
