use std::path::PathBuf;

use anyhow::{Context, Error};
use ksc_gen::EmitOptions;
use serde::{Deserialize, Serialize};

/// Environment variable with the output directory.
pub const OUT_DIR_VAR: &str = "KSC_OUT_DIR";
/// Environment variable with the targets to generate, shell-style separated.
pub const TARGETS_VAR: &str = "KSC_TARGETS";
/// Environment variable with the import search roots, shell-style separated.
pub const IMPORT_PATHS_VAR: &str = "KSC_IMPORT_PATHS";
/// Environment variable with the dotted package of the Python output.
pub const PYTHON_PACKAGE_VAR: &str = "KSC_PYTHON_PACKAGE";

/// The configuration of a compilation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileOptions {
    /// Directory where the generated files are written.
    pub out_dir: PathBuf,
    /// Names of the targets to generate, in order.
    pub targets: Vec<String>,
    /// Where imports are searched after the directory of the importing file.
    pub import_paths: Vec<PathBuf>,
    /// Dotted package of the Python output, e.g. `formats.net`.
    pub python_package: Option<String>,
}

impl Default for CompileOptions {
    fn default() -> Self {
        CompileOptions {
            out_dir: PathBuf::from("."),
            targets: vec!["cpp_stl".to_string()],
            import_paths: vec![],
            python_package: None,
        }
    }
}

impl CompileOptions {
    /// The default options, overridden by the `KSC_*` environment variables that are set.
    pub fn from_env() -> Result<Self, Error> {
        Self::from_vars(|name| std::env::var(name).ok())
    }

    fn from_vars<F: Fn(&str) -> Option<String>>(var: F) -> Result<Self, Error> {
        let mut options = CompileOptions::default();
        if let Some(out_dir) = var(OUT_DIR_VAR) {
            options.out_dir = out_dir.into();
        }
        if let Some(targets) = var(TARGETS_VAR) {
            options.targets = shell_words::split(&targets)
                .with_context(|| format!("Invalid ${TARGETS_VAR}"))?;
        }
        if let Some(paths) = var(IMPORT_PATHS_VAR) {
            options.import_paths = shell_words::split(&paths)
                .with_context(|| format!("Invalid ${IMPORT_PATHS_VAR}"))?
                .into_iter()
                .map(PathBuf::from)
                .collect();
        }
        if let Some(package) = var(PYTHON_PACKAGE_VAR) {
            options.python_package = Some(package).filter(|p| !p.is_empty());
        }
        debug!("Compile options: {:?}", options);
        Ok(options)
    }

    /// The part of the options the code generators care about.
    pub fn emit_options(&self) -> EmitOptions {
        EmitOptions {
            out_dir: self.out_dir.clone(),
            python_package: self.python_package.clone(),
        }
    }
}
