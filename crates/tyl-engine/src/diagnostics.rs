//! Structured diagnostics for every compiler stage.
//!
//! Each stage error (lex, parse, expand, module, codegen) converts into a
//! [`Diagnostic`] carrying a severity level, a category, a stable `Exxxx`
//! code, the primary span, and optional suggestion/hint/notes. Rendering
//! goes through `codespan-reporting`, which owns source-line display,
//! carets and colour.

use crate::parser::token::Span;
use codespan_reporting::diagnostic as csr;

/// Error severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Note,
    Warning,
    Error,
    Fatal,
}

/// Error categories, one per pipeline stage plus runtime/IO.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Category {
    Lexer,
    Parser,
    Type,
    Semantic,
    Codegen,
    Linker,
    Runtime,
    Io,
}

impl Category {
    /// The code prefix digit for this category (`E0xxx` lexer, `E1xxx`
    /// parser, ...).
    pub fn code_prefix(&self) -> char {
        match self {
            Category::Lexer => '0',
            Category::Parser => '1',
            Category::Type => '2',
            Category::Semantic => '3',
            Category::Codegen => '4',
            Category::Linker => '5',
            Category::Runtime => '6',
            Category::Io => '9',
        }
    }
}

/// A single diagnostic message.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub level: Level,
    pub category: Category,
    /// Stable code, e.g. `E1002`.
    pub code: String,
    pub message: String,
    /// File the span refers to.
    pub filename: String,
    pub span: Span,
    pub suggestion: Option<String>,
    pub hint: Option<String>,
    pub notes: Vec<Diagnostic>,
}

impl Diagnostic {
    pub fn error(
        category: Category,
        code: impl Into<String>,
        message: impl Into<String>,
        filename: impl Into<String>,
        span: Span,
    ) -> Self {
        Self {
            level: Level::Error,
            category,
            code: code.into(),
            message: message.into(),
            filename: filename.into(),
            span,
            suggestion: None,
            hint: None,
            notes: Vec::new(),
        }
    }

    pub fn warning(
        category: Category,
        code: impl Into<String>,
        message: impl Into<String>,
        filename: impl Into<String>,
        span: Span,
    ) -> Self {
        Self {
            level: Level::Warning,
            ..Self::error(category, code, message, filename, span)
        }
    }

    pub fn with_suggestion(mut self, suggestion: impl Into<String>) -> Self {
        self.suggestion = Some(suggestion.into());
        self
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn with_note(mut self, note: Diagnostic) -> Self {
        self.notes.push(note);
        self
    }

    /// Convert into a codespan-reporting diagnostic against a file id.
    pub fn to_codespan(&self, file_id: usize) -> csr::Diagnostic<usize> {
        let severity = match self.level {
            Level::Note => csr::Severity::Note,
            Level::Warning => csr::Severity::Warning,
            Level::Error => csr::Severity::Error,
            Level::Fatal => csr::Severity::Bug,
        };
        let mut diag = csr::Diagnostic::new(severity)
            .with_code(self.code.clone())
            .with_message(self.message.clone())
            .with_labels(vec![csr::Label::primary(
                file_id,
                self.span.start..self.span.end.max(self.span.start),
            )]);
        let mut notes = Vec::new();
        if let Some(suggestion) = &self.suggestion {
            notes.push(format!("suggestion: {}", suggestion));
        }
        if let Some(hint) = &self.hint {
            notes.push(format!("help: {}", hint));
        }
        for note in &self.notes {
            notes.push(note.message.clone());
        }
        if !notes.is_empty() {
            diag = diag.with_notes(notes);
        }
        diag
    }
}

/// Accumulates diagnostics across stages and tracks error/warning counts.
#[derive(Debug, Default)]
pub struct DiagnosticBag {
    diagnostics: Vec<Diagnostic>,
    errors: usize,
    warnings: usize,
}

impl DiagnosticBag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, diag: Diagnostic) {
        match diag.level {
            Level::Error | Level::Fatal => self.errors += 1,
            Level::Warning => self.warnings += 1,
            Level::Note => {}
        }
        self.diagnostics.push(diag);
    }

    pub fn extend(&mut self, diags: impl IntoIterator<Item = Diagnostic>) {
        for diag in diags {
            self.push(diag);
        }
    }

    pub fn has_errors(&self) -> bool {
        self.errors > 0
    }

    pub fn error_count(&self) -> usize {
        self.errors
    }

    pub fn warning_count(&self) -> usize {
        self.warnings
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics.iter()
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.diagnostics
    }

    pub fn clear(&mut self) {
        self.diagnostics.clear();
        self.errors = 0;
        self.warnings = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bag_counts_by_level() {
        let mut bag = DiagnosticBag::new();
        bag.push(Diagnostic::error(
            Category::Parser,
            "E1001",
            "bad",
            "a.tyl",
            Span::synthetic(),
        ));
        bag.push(Diagnostic::warning(
            Category::Codegen,
            "E4001",
            "meh",
            "a.tyl",
            Span::synthetic(),
        ));
        assert!(bag.has_errors());
        assert_eq!(bag.error_count(), 1);
        assert_eq!(bag.warning_count(), 1);
    }

    #[test]
    fn category_prefixes() {
        assert_eq!(Category::Lexer.code_prefix(), '0');
        assert_eq!(Category::Runtime.code_prefix(), '6');
        assert_eq!(Category::Io.code_prefix(), '9');
    }

    #[test]
    fn codespan_conversion_carries_notes() {
        let diag = Diagnostic::error(
            Category::Parser,
            "E1002",
            "expected expression",
            "a.tyl",
            Span::new(3, 5, 1, 4),
        )
        .with_suggestion("insert an operand")
        .with_hint("expressions may not end with an operator");
        let cs = diag.to_codespan(0);
        assert_eq!(cs.notes.len(), 2);
        assert_eq!(cs.code.as_deref(), Some("E1002"));
    }
}
