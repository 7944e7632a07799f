use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

use itertools::Itertools;
use thiserror::Error;

use crate::validate::ValidationError;

/// The kind of a symbol merged from an imported spec.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SymbolKind {
    Type,
    Enum,
}

impl Display for SymbolKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            SymbolKind::Type => f.write_str("type"),
            SymbolKind::Enum => f.write_str("enum"),
        }
    }
}

/// Errors of loading, decoding and merging IR.
#[derive(Error, Debug)]
pub enum Error {
    /// A row of the textual format could not be understood.
    #[error("{}line {line}: {message}", location(.path))]
    Malformed {
        path: Option<PathBuf>,
        /// 1-based line number.
        line: usize,
        /// The content of the offending line.
        text: String,
        message: String,
    },
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("failed to open IR file: {}", .path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to resolve import: {name} from {}", .from.display())]
    UnresolvedImport { name: String, from: PathBuf },
    #[error("import cycle detected: {}", .chain.iter().map(|p| p.display()).join(" -> "))]
    ImportCycle { chain: Vec<PathBuf> },
    #[error("duplicate symbol across imports: {kind} {name}")]
    DuplicateSymbol { kind: SymbolKind, name: String },
    #[error("invalid embedded scope {name}: {message}")]
    EmbeddedScope { name: String, message: String },
}

fn location(path: &Option<PathBuf>) -> String {
    match path {
        Some(path) => format!("{}: ", path.display()),
        None => String::new(),
    }
}

impl Error {
    pub(crate) fn malformed(line: usize, text: &str, message: impl Into<String>) -> Self {
        Error::Malformed {
            path: None,
            line,
            text: text.to_string(),
            message: message.into(),
        }
    }

    /// Attach the path of the file being read to a format error.
    pub(crate) fn in_file(self, file: &Path) -> Self {
        match self {
            Error::Malformed {
                path: None,
                line,
                text,
                message,
            } => Error::Malformed {
                path: Some(file.to_path_buf()),
                line,
                text,
                message,
            },
            other => other,
        }
    }
}
