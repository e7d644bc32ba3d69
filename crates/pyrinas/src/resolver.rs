//! The module resolver: an external collaborator interface (§4.2/§9) plus a
//! filesystem-only reference implementation (§6.4), grounded in the original
//! `module_resolver.py` but stripped of the URL-fetch and on-disk-cache
//! concerns that belong to a caller, not to this crate's core.

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use indexmap::IndexMap;

use crate::diagnostics::CompileError;
use crate::scope::ScopeStack;
use crate::symbol::{Symbol, SymbolKind};
use crate::types::Type;

/// The exportable symbols of a successfully analyzed module.
#[derive(Debug, Clone, Default)]
pub struct ModuleExports {
    pub symbols: IndexMap<String, Symbol>,
}

/// Abstract collaborator the analyzer consumes to resolve `@module_import`
/// and `@module_from_import` decorators. Implementations own caching and
/// cycle detection; the analyzer treats this as a black box (§9).
pub trait ModuleResolver {
    fn resolve_and_analyze(&mut self, path: &str, current_file: Option<&str>) -> Result<ModuleExports, CompileError>;
}

/// A resolver that never succeeds, for analyzing a module in isolation
/// (e.g. in unit tests) where imports are not expected to be exercised.
#[derive(Default)]
pub struct NoImports;

impl ModuleResolver for NoImports {
    fn resolve_and_analyze(&mut self, path: &str, _current_file: Option<&str>) -> Result<ModuleExports, CompileError> {
        Err(CompileError::import(format!("no module resolver configured; cannot import '{path}'")))
    }
}

/// Resolves imports against the local filesystem, following the original's
/// search-path convention: the importing file's own directory first, then
/// the base directory, then `modules/`, `lib/`, `src/` beneath it.
pub struct FsModuleResolver {
    base_path: PathBuf,
    search_paths: Vec<PathBuf>,
    loaded: HashMap<PathBuf, ModuleExports>,
    loading: HashSet<PathBuf>,
}

impl FsModuleResolver {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        let base_path = base_path.into();
        let search_paths =
            vec![base_path.clone(), base_path.join("modules"), base_path.join("lib"), base_path.join("src")];
        Self { base_path, search_paths, loaded: HashMap::new(), loading: HashSet::new() }
    }

    fn with_pyr_suffix(path: &str) -> String {
        if path.ends_with(".pyr") { path.to_owned() } else { format!("{path}.pyr") }
    }

    fn resolve_path(&self, import_path: &str, current_file: Option<&str>) -> Result<PathBuf, CompileError> {
        if import_path.starts_with("http://") || import_path.starts_with("https://") {
            return Err(CompileError::import(format!(
                "remote module imports are not supported by the filesystem resolver: {import_path}"
            )));
        }

        if let Some(candidate) = import_path.strip_prefix('/') {
            let path = PathBuf::from("/").join(Self::with_pyr_suffix(candidate));
            return canonicalize_or_not_found(&path, import_path);
        }

        if import_path.starts_with("./") || import_path.starts_with("../") || import_path.contains('/') {
            let dir = current_file
                .and_then(|f| Path::new(f).parent())
                .map(Path::to_path_buf)
                .unwrap_or_else(|| self.base_path.clone());
            let path = dir.join(Self::with_pyr_suffix(import_path));
            return canonicalize_or_not_found(&path, import_path);
        }

        self.resolve_module_name(import_path, current_file)
    }

    fn resolve_module_name(&self, name: &str, current_file: Option<&str>) -> Result<PathBuf, CompileError> {
        let candidates =
            [format!("{name}.pyr"), format!("{name}/main.pyr"), format!("{name}/index.pyr"), format!("{name}/{name}.pyr")];

        let mut dirs = self.search_paths.clone();
        if let Some(parent) = current_file.and_then(|f| Path::new(f).parent()) {
            dirs.insert(0, parent.to_path_buf());
        }

        for dir in &dirs {
            for candidate in &candidates {
                let path = dir.join(candidate);
                if path.exists() {
                    return path
                        .canonicalize()
                        .map_err(|err| CompileError::import(format!("module '{name}' could not be resolved: {err}")));
                }
            }
        }

        Err(CompileError::import(format!("module '{name}' not found in search paths: {dirs:?}")))
    }
}

fn canonicalize_or_not_found(path: &Path, import_path: &str) -> Result<PathBuf, CompileError> {
    path.canonicalize().map_err(|_| CompileError::import(format!("module not found: {import_path}")))
}

impl ModuleResolver for FsModuleResolver {
    fn resolve_and_analyze(&mut self, path: &str, current_file: Option<&str>) -> Result<ModuleExports, CompileError> {
        let resolved = self.resolve_path(path, current_file)?;

        if let Some(exports) = self.loaded.get(&resolved) {
            return Ok(exports.clone());
        }

        // Cycle: the other module is in the middle of its own first pass.
        // We cannot see its partially-registered signatures from here, so we
        // surface an empty export set; any name actually needed from it will
        // fail naturally with a NameError, matching the cycle-tolerance
        // contract in §5 ("any export referenced at analysis time must
        // already be registered, otherwise a name-resolution failure
        // surfaces naturally").
        if self.loading.contains(&resolved) {
            return Ok(ModuleExports::default());
        }

        self.loading.insert(resolved.clone());
        let source = fs::read_to_string(&resolved)
            .map_err(|err| CompileError::import(format!("failed to read module '{path}': {err}")))?;
        let body = crate::parse::parse_source(&source)
            .map_err(|err| CompileError::import(format!("failed to parse module '{path}': {err}")))?;
        let file_path = resolved.to_string_lossy().into_owned();
        let analysis = crate::analyzer::analyze(&body, &file_path, self);
        self.loading.remove(&resolved);
        let analysis = analysis.map_err(|err| CompileError::import(format!("failed to analyze module '{path}': {err}")))?;

        let exports = module_exports(&analysis.symbols);
        self.loaded.insert(resolved, exports.clone());
        Ok(exports)
    }
}

/// Extracts the exportable subset of a module's global scope: functions,
/// structs, interfaces, enums, and non-underscore-prefixed constants.
fn module_exports(symbols: &ScopeStack) -> ModuleExports {
    let mut exports = IndexMap::new();
    for (name, symbol) in symbols.global_scope() {
        let exportable = match &symbol.kind {
            SymbolKind::Function { .. } | SymbolKind::Struct { .. } | SymbolKind::Interface { .. } | SymbolKind::Enum { .. } => {
                true
            }
            SymbolKind::Variable { ty, .. } => {
                matches!(ty.without_final(), Type::Int | Type::Float | Type::Str | Type::Bool) && !name.starts_with('_')
            }
            SymbolKind::Module { .. } => false,
        };
        if exportable {
            exports.insert(name.clone(), symbol.clone());
        }
    }
    ModuleExports { symbols: exports }
}
