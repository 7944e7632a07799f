use std::path::PathBuf;

use thiserror::Error;

/// Errors of code generation.
#[derive(Error, Debug)]
pub enum Error {
    /// The IR is well-formed but uses something no backend lowers yet.
    #[error("not yet supported: {0}")]
    Unsupported(String),
    #[error("unknown target: {0}")]
    UnknownTarget(String),
    #[error("failed to create output directory: {}", .path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write output file: {}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to render {target} output")]
    Render { target: String },
    #[error(transparent)]
    Ir(#[from] ksc_ir::Error),
}

impl Error {
    pub(crate) fn unsupported(what: impl Into<String>) -> Self {
        Error::Unsupported(what.into())
    }
}
