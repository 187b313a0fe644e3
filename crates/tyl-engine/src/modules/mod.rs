//! Module loading: path resolution, parse cache, qualified-import
//! handling, export extraction and circular-import detection.
//!
//! Modules form a DAG. The loader keeps an import-chain stack while
//! descending; re-entering a module that is already on the stack reports
//! the concrete cycle (`Circular import detected: a.tyl -> b.tyl ->
//! a.tyl`).

use crate::parser::ast::{Program, Statement};
use crate::parser::token::Span;
use crate::parser::{Lexer, Parser};
use rustc_hash::{FxHashMap, FxHashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Source file extension for Tyl modules.
pub const SOURCE_EXTENSION: &str = "tyl";

/// What kind of item an export refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    Function,
    Record,
    Enum,
    Constant,
    Type,
    Module,
}

/// One exported item of a module.
#[derive(Debug, Clone)]
pub struct Export {
    pub name: String,
    pub qualified_name: String,
    pub public: bool,
    pub kind: ExportKind,
    pub span: Span,
}

/// A loaded module.
#[derive(Debug)]
pub struct Module {
    pub name: String,
    pub path: PathBuf,
    pub exports: Vec<Export>,
    pub imports: Vec<String>,
    pub ast: Option<Program>,
    pub loaded: bool,
    pub builtin: bool,
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ModuleError {
    #[error("Circular import detected: {cycle}")]
    CircularImport { cycle: String, span: Span },
    #[error("Cannot find module: {name}")]
    NotFound { name: String, span: Span },
    #[error("Cannot open file: {path}")]
    Io { path: String, span: Span },
    #[error("Failed to parse module '{name}'")]
    ParseFailed { name: String, span: Span },
}

impl ModuleError {
    pub fn span(&self) -> Span {
        match self {
            ModuleError::CircularImport { span, .. }
            | ModuleError::NotFound { span, .. }
            | ModuleError::Io { span, .. }
            | ModuleError::ParseFailed { span, .. } => *span,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ModuleError::CircularImport { .. } => "E3010",
            ModuleError::NotFound { .. } => "E3011",
            ModuleError::Io { .. } => "E9001",
            ModuleError::ParseFailed { .. } => "E3012",
        }
    }
}

/// The module loader and cache.
#[derive(Debug, Default)]
pub struct ModuleSystem {
    modules: FxHashMap<String, Module>,
    load_stack: FxHashSet<String>,
    import_chain: Vec<String>,
    imported_files: FxHashSet<PathBuf>,
    search_paths: Vec<PathBuf>,
    errors: Vec<ModuleError>,
}

impl ModuleSystem {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_search_path(&mut self, path: impl Into<PathBuf>) {
        self.search_paths.push(path.into());
    }

    pub fn errors(&self) -> &[ModuleError] {
        &self.errors
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn take_errors(&mut self) -> Vec<ModuleError> {
        std::mem::take(&mut self.errors)
    }

    pub fn get_module(&self, name: &str) -> Option<&Module> {
        self.modules.get(name)
    }

    /// `a::b::c` → `a/b/c.tyl`
    pub fn module_name_to_path(name: &str) -> String {
        format!("{}.{}", name.replace("::", "/"), SOURCE_EXTENSION)
    }

    /// Derive a module name from a file path (`math/calculus.tyl` →
    /// `math::calculus`).
    pub fn path_to_module_name(path: &Path) -> String {
        let mut parts: Vec<String> = path
            .parent()
            .map(|p| {
                p.components()
                    .filter_map(|c| match c {
                        std::path::Component::Normal(os) => {
                            Some(os.to_string_lossy().into_owned())
                        }
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default();
        if let Some(stem) = path.file_stem() {
            parts.push(stem.to_string_lossy().into_owned());
        }
        parts.join("::")
    }

    /// Resolve a module name or file path to an on-disk file.
    ///
    /// Names containing a path separator or ending in the source
    /// extension are treated as file paths (relative to the importing
    /// file first, then the search paths). Qualified names translate to
    /// `a/b/c.tyl` and finally to a directory containing `mod.tyl`.
    pub fn resolve_module_path(&self, name: &str, from_file: &str) -> Option<PathBuf> {
        let looks_like_file = name.contains('/')
            || name.contains('\\')
            || name.ends_with(&format!(".{}", SOURCE_EXTENSION));

        if looks_like_file {
            if !from_file.is_empty() {
                if let Some(parent) = Path::new(from_file).parent() {
                    let candidate = parent.join(name);
                    if candidate.exists() {
                        return Some(candidate);
                    }
                }
            }
            let direct = PathBuf::from(name);
            if direct.exists() {
                return Some(direct);
            }
            for search in &self.search_paths {
                let candidate = search.join(name);
                if candidate.exists() {
                    return Some(candidate);
                }
            }
            return None;
        }

        let rel = Self::module_name_to_path(name);
        if !from_file.is_empty() {
            if let Some(parent) = Path::new(from_file).parent() {
                let candidate = parent.join(&rel);
                if candidate.exists() {
                    return Some(candidate);
                }
            }
        }
        for search in &self.search_paths {
            let candidate = search.join(&rel);
            if candidate.exists() {
                return Some(candidate);
            }
            // Directory module: `a/b/mod.tyl`
            let dir = search.join(name.replace("::", "/"));
            let mod_file = dir.join(format!("mod.{}", SOURCE_EXTENSION));
            if mod_file.exists() {
                return Some(mod_file);
            }
        }
        None
    }

    /// Load (or fetch from cache) a module by name.
    pub fn load_module(&mut self, name: &str, from_file: &str, span: Span) -> Option<&Module> {
        if self.modules.contains_key(name) {
            return self.modules.get(name);
        }

        if self.load_stack.contains(name) {
            let cycle = self.cycle_path(name);
            self.errors.push(ModuleError::CircularImport { cycle, span });
            return None;
        }

        let path = match self.resolve_module_path(name, from_file) {
            Some(path) => path,
            None => {
                self.errors.push(ModuleError::NotFound {
                    name: name.to_string(),
                    span,
                });
                return None;
            }
        };

        self.load_stack.insert(name.to_string());
        self.import_chain.push(name.to_string());

        let result = self.parse_module_file(name, &path, span);

        self.load_stack.remove(name);
        self.import_chain.pop();

        match result {
            Some(mut module) => {
                Self::extract_exports(&mut module);
                let path_str = path.to_string_lossy().into_owned();
                if let Some(mut ast) = module.ast.take() {
                    self.process_imports(&mut ast, &path_str);
                    module.ast = Some(ast);
                }
                self.modules.insert(name.to_string(), module);
                self.modules.get(name)
            }
            None => None,
        }
    }

    fn parse_module_file(&mut self, name: &str, path: &Path, span: Span) -> Option<Module> {
        let source = match std::fs::read_to_string(path) {
            Ok(source) => source,
            Err(_) => {
                self.errors.push(ModuleError::Io {
                    path: path.to_string_lossy().into_owned(),
                    span,
                });
                return None;
            }
        };

        let filename = path.to_string_lossy().into_owned();
        let tokens = match Lexer::new(&source, &filename).tokenize() {
            Ok(tokens) => tokens,
            Err(_) => {
                self.errors.push(ModuleError::ParseFailed {
                    name: name.to_string(),
                    span,
                });
                return None;
            }
        };
        let ast = match Parser::new(tokens, &source, &filename).parse() {
            Ok(ast) => ast,
            Err(_) => {
                self.errors.push(ModuleError::ParseFailed {
                    name: name.to_string(),
                    span,
                });
                return None;
            }
        };

        Some(Module {
            name: name.to_string(),
            path: path.to_path_buf(),
            exports: Vec::new(),
            imports: Vec::new(),
            ast: Some(ast),
            loaded: true,
            builtin: false,
        })
    }

    /// Render the concrete cycle path, e.g. `a.tyl -> b.tyl -> a.tyl`.
    /// Chain entries may be module names or file paths; paths compare
    /// canonically so relative/absolute spellings still close the cycle.
    fn cycle_path(&self, name: &str) -> String {
        let target = canonical(Path::new(name));
        let mut parts = Vec::new();
        let mut in_cycle = false;
        for entry in &self.import_chain {
            if entry == name || canonical(Path::new(entry)) == target {
                in_cycle = true;
            }
            if in_cycle {
                parts.push(display_name(entry));
            }
        }
        parts.push(display_name(name));
        if parts.len() == 1 {
            parts.push(display_name(name));
        }
        parts.join(" -> ")
    }

    /// Walk a program's `use` statements: file imports are loaded and
    /// their statements merged in place; qualified imports load the
    /// target module into the cache and stay as statements for name
    /// resolution.
    pub fn process_imports(&mut self, program: &mut Program, current_file: &str) {
        // The entry file itself anchors the import chain
        let root_pushed = if self.import_chain.is_empty() {
            let root = PathBuf::from(current_file);
            self.imported_files.insert(canonical(&root));
            self.import_chain.push(current_file.to_string());
            self.load_stack.insert(current_file.to_string());
            true
        } else {
            false
        };

        let statements = std::mem::take(&mut program.statements);
        let mut merged = Vec::with_capacity(statements.len());

        for statement in statements {
            let use_decl = match &statement {
                Statement::Use(u) if !u.is_layer => u.clone(),
                _ => {
                    merged.push(statement);
                    continue;
                }
            };

            if use_decl.is_file_import {
                let resolved = match self.resolve_module_path(&use_decl.path, current_file) {
                    Some(path) => path,
                    None => {
                        self.errors.push(ModuleError::NotFound {
                            name: use_decl.path.clone(),
                            span: use_decl.span,
                        });
                        continue;
                    }
                };
                let canon = canonical(&resolved);
                let chain_key = resolved.to_string_lossy().into_owned();

                // Cycle: the file is somewhere up the current chain
                if self.load_stack.contains(&chain_key)
                    || self
                        .import_chain
                        .iter()
                        .any(|entry| canonical(Path::new(entry)) == canon)
                {
                    let cycle = self.cycle_path(&chain_key);
                    self.errors.push(ModuleError::CircularImport {
                        cycle,
                        span: use_decl.span,
                    });
                    continue;
                }

                // Already merged elsewhere: nothing further to do
                if self.imported_files.contains(&canon) {
                    continue;
                }
                self.imported_files.insert(canon);

                self.load_stack.insert(chain_key.clone());
                self.import_chain.push(chain_key.clone());
                if let Some(mut module) =
                    self.parse_module_file(&use_decl.path, &resolved, use_decl.span)
                {
                    if let Some(mut ast) = module.ast.take() {
                        self.process_imports(&mut ast, &chain_key);
                        merged.extend(ast.statements);
                    }
                }
                self.import_chain.pop();
                self.load_stack.remove(&chain_key);
            } else {
                // Qualified import: load into the cache, keep the
                // statement for later name resolution
                self.load_module(&use_decl.path, current_file, use_decl.span);
                merged.push(statement);
            }
        }

        program.statements = merged;

        if root_pushed {
            self.import_chain.pop();
            self.load_stack.remove(current_file);
        }
    }

    /// Collect the exported items of a module: public records/functions,
    /// plus enums, constants and type aliases (public by default).
    fn extract_exports(module: &mut Module) {
        let Some(ast) = &module.ast else {
            return;
        };
        let qualify = |name: &str| format!("{}::{}", module.name, name);

        for statement in &ast.statements {
            match statement {
                Statement::Fn(f) => module.exports.push(Export {
                    name: f.name.clone(),
                    qualified_name: qualify(&f.name),
                    public: f.is_public,
                    kind: ExportKind::Function,
                    span: f.span,
                }),
                Statement::Record(r) => module.exports.push(Export {
                    name: r.name.clone(),
                    qualified_name: qualify(&r.name),
                    public: r.is_public,
                    kind: ExportKind::Record,
                    span: r.span,
                }),
                Statement::Enum(e) => module.exports.push(Export {
                    name: e.name.clone(),
                    qualified_name: qualify(&e.name),
                    public: true,
                    kind: ExportKind::Enum,
                    span: e.span,
                }),
                Statement::VarDecl(v) if v.is_const => module.exports.push(Export {
                    name: v.name.clone(),
                    qualified_name: qualify(&v.name),
                    public: true,
                    kind: ExportKind::Constant,
                    span: v.span,
                }),
                Statement::TypeAlias(t) => module.exports.push(Export {
                    name: t.name.clone(),
                    qualified_name: qualify(&t.name),
                    public: true,
                    kind: ExportKind::Type,
                    span: t.span,
                }),
                _ => {}
            }
        }
    }

    /// Public exports of a loaded module.
    pub fn visible_exports(&self, name: &str) -> Vec<&Export> {
        self.modules
            .get(name)
            .map(|m| m.exports.iter().filter(|e| e.public).collect())
            .unwrap_or_default()
    }
}

fn canonical(path: &Path) -> PathBuf {
    path.canonicalize().unwrap_or_else(|_| path.to_path_buf())
}

fn display_name(entry: &str) -> String {
    Path::new(entry)
        .file_name()
        .map(|f| f.to_string_lossy().into_owned())
        .unwrap_or_else(|| entry.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write(dir: &Path, name: &str, content: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, content).unwrap();
        path
    }

    fn parse_file(path: &Path) -> Program {
        let source = fs::read_to_string(path).unwrap();
        Parser::parse_source(&source, &path.to_string_lossy()).unwrap()
    }

    #[test]
    fn file_import_merges_statements() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "util.tyl", "fn helper() -> int:\n    return 1\n");
        let main = write(
            dir.path(),
            "main.tyl",
            "use \"util.tyl\"\nfn main() -> int:\n    return helper()\n",
        );

        let mut system = ModuleSystem::new();
        let mut program = parse_file(&main);
        system.process_imports(&mut program, &main.to_string_lossy());

        assert!(!system.has_errors(), "{:?}", system.errors());
        assert!(program.find_function("helper").is_some());
        assert!(program.find_function("main").is_some());
    }

    #[test]
    fn circular_import_reports_cycle_path() {
        let dir = tempfile::tempdir().unwrap();
        let a = write(dir.path(), "a.tyl", "use \"b.tyl\"\nfn fa() -> int:\n    return 1\n");
        write(dir.path(), "b.tyl", "use \"a.tyl\"\nfn fb() -> int:\n    return 2\n");

        let mut system = ModuleSystem::new();
        let mut program = parse_file(&a);
        system.process_imports(&mut program, &a.to_string_lossy());

        assert!(system.has_errors());
        let message = system.errors()[0].to_string();
        assert!(message.contains("Circular import detected"), "{}", message);
        assert!(message.contains("a.tyl"), "{}", message);
        assert!(message.contains("b.tyl"), "{}", message);
    }

    #[test]
    fn duplicate_import_is_merged_once() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "c.tyl", "fn shared() -> int:\n    return 1\n");
        write(dir.path(), "d.tyl", "use \"c.tyl\"\nfn fd() -> int:\n    return 2\n");
        let main = write(
            dir.path(),
            "main.tyl",
            "use \"c.tyl\"\nuse \"d.tyl\"\nfn main() -> int:\n    return 0\n",
        );

        let mut system = ModuleSystem::new();
        let mut program = parse_file(&main);
        system.process_imports(&mut program, &main.to_string_lossy());

        assert!(!system.has_errors(), "{:?}", system.errors());
        let shared_count = program
            .functions()
            .filter(|f| f.name == "shared")
            .count();
        assert_eq!(shared_count, 1);
    }

    #[test]
    fn qualified_module_resolution() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("math")).unwrap();
        write(
            dir.path(),
            "math/calculus.tyl",
            "pub fn integrate() -> int:\n    return 0\nconst E :: 2\n",
        );

        let mut system = ModuleSystem::new();
        system.add_search_path(dir.path());
        let module = system
            .load_module("math::calculus", "", Span::synthetic())
            .expect("module loads");

        assert_eq!(module.name, "math::calculus");
        let names: Vec<_> = module.exports.iter().map(|e| e.name.as_str()).collect();
        assert!(names.contains(&"integrate"));
        assert!(names.contains(&"E"));
        let exp = module
            .exports
            .iter()
            .find(|e| e.name == "integrate")
            .unwrap();
        assert_eq!(exp.qualified_name, "math::calculus::integrate");
        assert_eq!(exp.kind, ExportKind::Function);
    }

    #[test]
    fn mod_file_directory_resolution() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("net")).unwrap();
        write(dir.path(), "net/mod.tyl", "pub fn listen() -> int:\n    return 0\n");

        let mut system = ModuleSystem::new();
        system.add_search_path(dir.path());
        assert!(system
            .load_module("net", "", Span::synthetic())
            .is_some());
    }

    #[test]
    fn missing_module_reports_not_found() {
        let mut system = ModuleSystem::new();
        assert!(system
            .load_module("no::such::module", "", Span::synthetic())
            .is_none());
        assert!(matches!(
            system.errors()[0],
            ModuleError::NotFound { .. }
        ));
    }
}
