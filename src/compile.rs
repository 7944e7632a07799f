use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Error};
use ksc_diagnostics::{CodeSpan, Diagnostic, DiagnosticContext};
use ksc_gen::{BackendManager, Module};
use ksc_ir::Spec;

use crate::opt::CompileOptions;

/// The outcome of a successful compilation.
#[derive(Debug)]
pub struct Compilation {
    /// The root spec with the declarations of its imports merged in.
    pub spec: Spec,
    /// The generated files, in target order.
    pub written: Vec<PathBuf>,
    /// Warnings about the generated code.
    pub diagnostics: DiagnosticContext,
}

/// Load the IR file at `path` with its imports, validate it and generate the code of every
/// configured target.
///
/// The target names are checked before anything is loaded, so an unknown target never leaves
/// partial output behind.
pub fn compile(path: impl AsRef<Path>, options: &CompileOptions) -> Result<Compilation, Error> {
    let path = path.as_ref();
    if options.targets.is_empty() {
        bail!("No target selected");
    }
    for target in &options.targets {
        if BackendManager::from_name(target).is_none() {
            bail!(
                "Unknown target {} (known targets: {})",
                target,
                BackendManager::names().join(", ")
            );
        }
    }

    let spec = ksc_ir::load_with_imports(path, &options.import_paths)
        .with_context(|| format!("Failed to load {}", path.display()))?;

    let mut diagnostics = DiagnosticContext::new();
    {
        let module = Module::new(&spec).context("Failed to decode the nested scopes")?;
        ksc_gen::lint(&module, Some(path), &mut diagnostics);
    }

    let emit_options = options.emit_options();
    let mut written = vec![];
    for target in &options.targets {
        let paths = ksc_gen::emit(&spec, target, &emit_options)
            .with_context(|| format!("Failed to generate the {target} output"))?;
        written.extend(paths);
    }
    info!(
        "Compiled {} into {} files ({} warnings)",
        path.display(),
        written.len(),
        diagnostics.diagnostics().len()
    );
    Ok(Compilation {
        spec,
        written,
        diagnostics,
    })
}

/// The diagnostic pointing at the offending row of a malformed IR file, if `error` comes from
/// one.
pub fn error_diagnostic(error: &Error) -> Option<Diagnostic> {
    let ir_error = error.chain().find_map(|e| e.downcast_ref::<ksc_ir::Error>())?;
    let ksc_ir::Error::Malformed {
        path,
        line,
        text,
        message,
    } = ir_error
    else {
        return None;
    };
    let mut diagnostic = Diagnostic::error(message.clone());
    if let Some(path) = path {
        if let Ok(span) = CodeSpan::from_line(path, *line, text.clone(), 0, text.len()) {
            diagnostic = diagnostic.with_code_span(span);
        }
    }
    Some(diagnostic)
}
