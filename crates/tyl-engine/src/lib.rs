//! Tyl Language Engine
//!
//! This crate provides the complete Tyl compiler core:
//! - **Parser**: indentation-sensitive lexer, Pratt parser and typed AST
//!   (`parser` module)
//! - **Expansion**: declarative macros, user infix operators and DSL
//!   blocks (`expand` module)
//! - **Modules**: path resolution, parse cache and cycle detection
//!   (`modules` module)
//! - **Optimizer**: the multi-tier pass pipeline with CTFE and SSA
//!   (`optimize` module)
//! - **Codegen**: Windows x86-64 machine-code emission (`codegen` module)
//! - **Artifact**: the boundary types for the external PE/COFF writers
//!   and linker (`artifact` module)
//!
//! # Example
//!
//! ```ignore
//! use tyl_engine::parser::{Lexer, Parser};
//! use tyl_engine::expand::MacroExpander;
//! use tyl_engine::optimize::{OptLevel, Optimizer};
//! use tyl_engine::codegen::CodeGen;
//!
//! let source = "fn main() -> int:\n    return 2 + 3 * 4\n";
//! let tokens = Lexer::new(source, "main.tyl").tokenize().unwrap();
//! let mut program = Parser::new(tokens, source, "main.tyl").parse().unwrap();
//!
//! let mut expander = MacroExpander::new();
//! expander.expand(&mut program);
//!
//! let mut optimizer = Optimizer::new(OptLevel::O2);
//! optimizer.optimize(&mut program);
//!
//! let artifact = CodeGen::new("main.tyl", OptLevel::O2).compile(&program).unwrap();
//! ```

#![warn(rust_2018_idioms)]

// ============================================================================
// Core Modules
// ============================================================================

/// Artifact boundary: code/data/symbols/relocations plus the collaborator
/// traits for the PE/COFF writers, the linker and the type checker
pub mod artifact;

/// Code generation: x86-64 emission for Windows
pub mod codegen;

/// Structured diagnostics shared by every stage
pub mod diagnostics;

/// Macro and DSL expansion
pub mod expand;

/// Module loading and cycle detection
pub mod modules;

/// The optimizer pipeline
pub mod optimize;

/// Front end: lexer, tokens, AST, parser
pub mod parser;

// ============================================================================
// Re-exports
// ============================================================================

pub use artifact::{CodeArtifact, ImageKind, ImageWriter, Linker, ObjectWriter, TypeCheck};
pub use codegen::{CodeGen, CodegenError};
pub use diagnostics::{Category, Diagnostic, DiagnosticBag, Level};
pub use expand::{ExpandError, MacroExpander, MacroRegistry};
pub use modules::{Export, ExportKind, Module, ModuleError, ModuleSystem, SOURCE_EXTENSION};
pub use optimize::{OptLevel, OptimizationPass, Optimizer};
pub use parser::{LexError, Lexer, ParseError, Parser, Span, Token, TokenKind};

use parser::ast::Program;

/// Convert a lexer error into a diagnostic against `filename`.
pub fn lex_error_to_diagnostic(error: &LexError, filename: &str) -> Diagnostic {
    Diagnostic::error(
        Category::Lexer,
        error.code(),
        error.to_string(),
        filename,
        error.span(),
    )
}

/// Convert a parser error into a diagnostic against `filename`.
pub fn parse_error_to_diagnostic(error: &ParseError, filename: &str) -> Diagnostic {
    Diagnostic::error(
        Category::Parser,
        error.code(),
        error.to_string(),
        filename,
        error.span(),
    )
}

/// Convert an expansion error into a diagnostic against `filename`.
pub fn expand_error_to_diagnostic(error: &ExpandError, filename: &str) -> Diagnostic {
    Diagnostic::error(
        Category::Semantic,
        error.code(),
        error.to_string(),
        filename,
        error.span(),
    )
}

/// Convert a module error into a diagnostic against `filename`.
pub fn module_error_to_diagnostic(error: &ModuleError, filename: &str) -> Diagnostic {
    Diagnostic::error(
        Category::Semantic,
        error.code(),
        error.to_string(),
        filename,
        error.span(),
    )
}

/// Convert a codegen error into a diagnostic against `filename`.
pub fn codegen_error_to_diagnostic(error: &CodegenError, filename: &str) -> Diagnostic {
    Diagnostic::error(
        Category::Codegen,
        error.code(),
        error.to_string(),
        filename,
        error.span(),
    )
}

/// Front-end convenience: lex and parse one source string.
pub fn parse_program(source: &str, filename: &str) -> Result<Program, Vec<Diagnostic>> {
    let tokens = Lexer::new(source, filename)
        .tokenize()
        .map_err(|errors| {
            errors
                .iter()
                .map(|e| lex_error_to_diagnostic(e, filename))
                .collect::<Vec<_>>()
        })?;
    Parser::new(tokens, source, filename).parse().map_err(|errors| {
        errors
            .iter()
            .map(|e| parse_error_to_diagnostic(e, filename))
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_program_reports_diagnostics() {
        let errors = parse_program("let = 1\n", "bad.tyl").unwrap_err();
        assert!(!errors.is_empty());
        assert_eq!(errors[0].category, Category::Parser);
        assert!(errors[0].code.starts_with("E1"));
    }

    #[test]
    fn full_pipeline_smoke() {
        let source = "fn main() -> int:\n    return 2 + 3 * 4\n";
        let mut program = parse_program(source, "main.tyl").unwrap();

        let mut expander = MacroExpander::new();
        expander.expand(&mut program);
        assert!(!expander.has_errors());

        let mut optimizer = Optimizer::new(OptLevel::O1);
        optimizer.optimize(&mut program);

        let artifact = CodeGen::new("main.tyl", OptLevel::O1)
            .compile(&program)
            .unwrap();
        assert!(artifact.find_symbol("main").is_some());
        // The folded constant 14 appears as an immediate
        assert!(artifact
            .code
            .windows(7)
            .any(|w| w == [0x48, 0xC7, 0xC0, 0x0E, 0x00, 0x00, 0x00]));
    }
}
