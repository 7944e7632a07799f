use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use crate::error::{Error, SymbolKind};
use crate::model::Spec;
use crate::validate::validate;
use crate::wire::deserialize_unchecked;

fn read_spec(path: &Path) -> Result<Spec, Error> {
    let text = std::fs::read_to_string(path).map_err(|source| Error::Open {
        path: path.to_path_buf(),
        source,
    })?;
    deserialize_unchecked(&text).map_err(|e| e.in_file(path))
}

/// Load and validate a single IR file. Its imports are not followed.
pub fn load_from_file(path: impl AsRef<Path>) -> Result<Spec, Error> {
    let path = path.as_ref();
    let spec = read_spec(path)?;
    validate(&spec)?;
    Ok(spec)
}

/// Load an IR file together with everything it imports, transitively, and merge the type and
/// enum declarations of the imported files into it.
///
/// Imports are searched next to the importing file first, then in each of `search_roots`, in
/// order. The files are not validated one by one: the merged spec is validated once.
pub fn load_with_imports(
    path: impl AsRef<Path>,
    search_roots: &[PathBuf],
) -> Result<Spec, Error> {
    let path = path.as_ref();
    let root = path.canonicalize().map_err(|source| Error::Open {
        path: path.to_path_buf(),
        source,
    })?;

    let mut graph = ImportGraph {
        search_roots,
        loaded: HashMap::new(),
        edges: HashMap::new(),
        stack: vec![],
    };
    graph.visit(&root)?;

    let merged = graph.merge(&root)?;
    validate(&merged)?;
    info!(
        "Loaded {} with {} imported files",
        path.display(),
        graph.loaded.len() - 1
    );
    Ok(merged)
}

/// Normalize an import name written by the front-end: backslashes become slashes.
fn normalize_import(name: &str) -> PathBuf {
    PathBuf::from(name.replace('\\', "/"))
}

/// Find the file an import refers to: relative to the importing file first, then relative to
/// each search root. Absolute imports are used as they are.
pub fn resolve_import(
    name: &str,
    importing_file: &Path,
    search_roots: &[PathBuf],
) -> Result<PathBuf, Error> {
    let normalized = normalize_import(name);
    let candidates: Vec<PathBuf> = if normalized.is_absolute() {
        vec![normalized]
    } else {
        let parent = importing_file.parent().unwrap_or(Path::new(""));
        std::iter::once(parent.join(&normalized))
            .chain(
                search_roots
                    .iter()
                    .filter(|root| !root.as_os_str().is_empty())
                    .map(|root| root.join(&normalized)),
            )
            .collect()
    };
    for candidate in candidates {
        trace!("Trying import candidate {}", candidate.display());
        if candidate.is_file() {
            if let Ok(canonical) = candidate.canonicalize() {
                debug!("Import {:?} resolved to {}", name, canonical.display());
                return Ok(canonical);
            }
        }
    }
    Err(Error::UnresolvedImport {
        name: name.to_string(),
        from: importing_file.to_path_buf(),
    })
}

struct ImportGraph<'a> {
    search_roots: &'a [PathBuf],
    /// Parsed files, keyed by canonical path.
    loaded: HashMap<PathBuf, Spec>,
    /// Resolved imports of each loaded file, in declaration order.
    edges: HashMap<PathBuf, Vec<PathBuf>>,
    /// The files on the active depth-first path.
    stack: Vec<PathBuf>,
}

impl ImportGraph<'_> {
    fn visit(&mut self, file: &Path) -> Result<(), Error> {
        if self.loaded.contains_key(file) {
            return Ok(());
        }
        if self.stack.iter().any(|f| f == file) {
            let mut chain = self.stack.clone();
            chain.push(file.to_path_buf());
            return Err(Error::ImportCycle { chain });
        }
        debug!("Loading IR file {}", file.display());
        let spec = read_spec(file)?;

        self.stack.push(file.to_path_buf());
        let mut deps = vec![];
        for import in &spec.imports {
            let dep = match resolve_import(import, file, self.search_roots) {
                Ok(dep) => dep,
                Err(e) => {
                    self.stack.pop();
                    return Err(e);
                }
            };
            if let Err(e) = self.visit(&dep) {
                self.stack.pop();
                return Err(e);
            }
            deps.push(dep);
        }
        self.stack.pop();

        self.edges.insert(file.to_path_buf(), deps);
        self.loaded.insert(file.to_path_buf(), spec);
        Ok(())
    }

    /// Merge the declarations of every file reachable from `root` into a copy of the root spec.
    fn merge(&self, root: &Path) -> Result<Spec, Error> {
        let mut merged = self.loaded[root].clone();
        let mut merger = Merger {
            graph: self,
            merged_files: HashSet::new(),
            types: HashSet::new(),
            enums: HashSet::new(),
        };
        merger.types.insert(merged.name.clone());
        merger.types.extend(merged.types.iter().map(|t| t.name.clone()));
        merger.enums.extend(merged.enums.iter().map(|e| e.name.clone()));
        merger.merge_deps(root, &mut merged)?;
        Ok(merged)
    }
}

struct Merger<'a> {
    graph: &'a ImportGraph<'a>,
    merged_files: HashSet<&'a Path>,
    types: HashSet<String>,
    enums: HashSet<String>,
}

impl<'a> Merger<'a> {
    /// A dependency's own imports are merged before the dependency itself.
    fn merge_deps(&mut self, file: &Path, merged: &mut Spec) -> Result<(), Error> {
        let graph = self.graph;
        for dep in &graph.edges[file] {
            if !self.merged_files.insert(dep.as_path()) {
                continue;
            }
            self.merge_deps(dep, merged)?;

            let spec = &graph.loaded[dep];
            debug!("Merging {} from {}", spec.name, dep.display());
            if !self.types.insert(spec.name.clone()) {
                return Err(duplicate(SymbolKind::Type, &spec.name));
            }
            for ty in &spec.types {
                if !self.types.insert(ty.name.clone()) {
                    return Err(duplicate(SymbolKind::Type, &ty.name));
                }
                merged.types.push(ty.clone());
            }
            for e in &spec.enums {
                if !self.enums.insert(e.name.clone()) {
                    return Err(duplicate(SymbolKind::Enum, &e.name));
                }
                merged.enums.push(e.clone());
            }
        }
        Ok(())
    }
}

fn duplicate(kind: SymbolKind, name: &str) -> Error {
    Error::DuplicateSymbol {
        kind,
        name: name.to_string(),
    }
}
