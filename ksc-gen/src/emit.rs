//! Rendering a spec for a target and writing the artifacts to disk.

use std::io::Write;
use std::path::{Path, PathBuf};

use ksc_ir::Spec;
use serde::{Deserialize, Serialize};

use crate::error::Error;
use crate::lang::BackendManager;
use crate::resolve::Module;
use crate::subset::check_supported;

/// Where and how the artifacts are written.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmitOptions {
    /// The directory the artifact paths are relative to. Created if missing.
    pub out_dir: PathBuf,
    /// Dotted package the Python module is placed in, e.g. `formats.net`.
    pub python_package: Option<String>,
}

/// A generated file, fully rendered in memory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Artifact {
    /// Path relative to the output directory.
    pub path: PathBuf,
    pub content: String,
}

/// Render all the artifacts of `spec` for `target` without touching the disk.
///
/// The spec is expected to be valid. Every scope goes through the supported-subset check before
/// anything is rendered.
pub fn render(spec: &Spec, target: &str, options: &EmitOptions) -> Result<Vec<Artifact>, Error> {
    let backend = BackendManager::from_name(target)
        .ok_or_else(|| Error::UnknownTarget(target.to_string()))?;
    let module = Module::new(spec)?;
    check_supported(&module)?;
    backend.render(&module, options)
}

/// Render `spec` for `target` and write the artifacts under the output directory, returning the
/// written paths.
///
/// Nothing is written unless every artifact rendered. Each file is written next to its
/// destination and renamed over it, so a reader never sees a partial file.
pub fn emit(spec: &Spec, target: &str, options: &EmitOptions) -> Result<Vec<PathBuf>, Error> {
    let artifacts = render(spec, target, options)?;
    artifacts
        .iter()
        .map(|artifact| write_artifact(&options.out_dir, artifact))
        .collect()
}

fn write_artifact(out_dir: &Path, artifact: &Artifact) -> Result<PathBuf, Error> {
    let dest = out_dir.join(&artifact.path);
    let dir = dest.parent().unwrap_or(out_dir);
    std::fs::create_dir_all(dir).map_err(|source| Error::CreateDir {
        path: dir.to_path_buf(),
        source,
    })?;
    let write_error = |source: std::io::Error| Error::Write {
        path: dest.clone(),
        source,
    };
    let mut file = tempfile::NamedTempFile::new_in(dir).map_err(write_error)?;
    file.write_all(artifact.content.as_bytes())
        .map_err(write_error)?;
    file.persist(&dest).map_err(|e| write_error(e.error))?;
    debug!("Wrote {} ({} bytes)", dest.display(), artifact.content.len());
    Ok(dest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ksc_ir::{Attr, Endian, PrimitiveType};
    use speculoos::prelude::*;
    use tempfile::TempDir;

    fn spec() -> Spec {
        let mut spec = Spec::new("hdr", Endian::Le);
        spec.attrs.push(Attr::new("magic", PrimitiveType::U4));
        spec
    }

    #[test]
    fn test_unknown_target() {
        let err = render(&spec(), "java", &EmitOptions::default()).unwrap_err();
        assert_that!(err.to_string()).is_equal_to("unknown target: java".to_string());
    }

    #[test]
    fn test_emit_creates_out_dir() {
        let _ = env_logger::builder().is_test(true).try_init();
        let tmpdir = TempDir::new().unwrap();
        let options = EmitOptions {
            out_dir: tmpdir.path().join("out/cpp"),
            python_package: None,
        };
        let written = emit(&spec(), "cpp_stl", &options).unwrap();
        assert_eq!(
            written,
            vec![
                tmpdir.path().join("out/cpp/hdr.h"),
                tmpdir.path().join("out/cpp/hdr.cpp"),
            ]
        );
        for path in &written {
            assert!(path.is_file(), "{} missing", path.display());
        }
        let leftovers = std::fs::read_dir(tmpdir.path().join("out/cpp"))
            .unwrap()
            .count();
        assert_eq!(leftovers, 2);
    }

    #[test]
    fn test_emit_into_file_fails() {
        let tmpdir = TempDir::new().unwrap();
        let blocker = tmpdir.path().join("blocker");
        std::fs::write(&blocker, "").unwrap();
        let options = EmitOptions {
            out_dir: blocker.join("out"),
            python_package: None,
        };
        let err = emit(&spec(), "ruby", &options).unwrap_err();
        assert!(matches!(err, Error::CreateDir { .. }), "{err:?}");
    }
}
