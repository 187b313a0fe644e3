//! The artifact boundary between the code generator and the external
//! writers.
//!
//! The PE32+ image writer, the COFF object writer and the linker live
//! outside this crate; they consume a [`CodeArtifact`] through the traits
//! below. The externalised type checker plugs in through [`TypeCheck`].

use crate::codegen::buffer::Reloc;
use crate::codegen::imports::ImportEntry;
use crate::diagnostics::Diagnostic;
use crate::parser::ast::Program;
use std::path::Path;

/// Kind of image an artifact is destined for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ImageKind {
    #[default]
    Executable,
    Dll,
    Object,
}

/// A symbol defined in the artifact's code section.
#[derive(Debug, Clone)]
pub struct SymbolDef {
    pub name: String,
    pub offset: usize,
    pub exported: bool,
}

/// Everything the backend produces for one compilation: machine bytes,
/// read-only data, symbols, relocations and the import list. Bytes are
/// position-independent within their section; data and import references
/// are RIP-relative through the relocation list.
#[derive(Debug, Default)]
pub struct CodeArtifact {
    pub code: Vec<u8>,
    /// Read-only data section (string/float constant pools).
    pub rdata: Vec<u8>,
    /// Offsets of named blobs inside `rdata`.
    pub data_symbols: Vec<SymbolDef>,
    pub symbols: Vec<SymbolDef>,
    pub relocs: Vec<Reloc>,
    pub imports: Vec<ImportEntry>,
    /// Symbols to place in the export table (DLL mode).
    pub exports: Vec<String>,
    /// Offset of the entry point within `code`.
    pub entry: usize,
    /// Human-readable assembly listing for `--asm`.
    pub assembly: Vec<String>,
}

impl CodeArtifact {
    pub fn find_symbol(&self, name: &str) -> Option<&SymbolDef> {
        self.symbols.iter().find(|s| s.name == name)
    }
}

/// Writes a Microsoft COFF object file. External collaborator.
pub trait ObjectWriter {
    fn write_object(&mut self, artifact: &CodeArtifact, output: &Path) -> std::io::Result<()>;
}

/// Writes a PE32+ executable or DLL. External collaborator.
pub trait ImageWriter {
    fn write_image(
        &mut self,
        artifact: &CodeArtifact,
        kind: ImageKind,
        output: &Path,
    ) -> std::io::Result<()>;
}

/// Combines object files and static libraries into an image. External
/// collaborator.
pub trait Linker {
    fn add_object(&mut self, path: &Path) -> std::io::Result<()>;
    fn add_static_lib(&mut self, path: &Path) -> std::io::Result<()>;
    fn link(&mut self, kind: ImageKind, output: &Path) -> Result<(), Vec<Diagnostic>>;
}

/// The externalised type checker: consumes the AST and reports
/// diagnostics; it annotates nothing the backend depends on.
pub trait TypeCheck {
    fn check(&mut self, program: &Program) -> Vec<Diagnostic>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn symbol_lookup() {
        let artifact = CodeArtifact {
            symbols: vec![SymbolDef {
                name: "main".into(),
                offset: 0x40,
                exported: false,
            }],
            ..Default::default()
        };
        assert_eq!(artifact.find_symbol("main").unwrap().offset, 0x40);
        assert!(artifact.find_symbol("other").is_none());
    }
}
