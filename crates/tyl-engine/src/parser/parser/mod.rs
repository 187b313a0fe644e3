//! Pratt parser for the Tyl programming language.
//!
//! The parser consumes the lexer's token vector (including the synthetic
//! INDENT/DEDENT/NEWLINE layout tokens) and produces a [`Program`]. Parse
//! errors synchronise at statement boundaries so several diagnostics can
//! be reported per run.

pub mod decl;
pub mod expr;
pub mod recovery;
pub mod stmt;
pub mod types;

use crate::parser::ast::{Program, Statement};
use crate::parser::token::{Span, Token, TokenKind};
use rustc_hash::{FxHashMap, FxHashSet};
use thiserror::Error;

/// Maximum statement/expression nesting depth. Deeply nested synthetic
/// inputs otherwise blow the stack long before memory runs out.
pub(crate) const MAX_PARSE_DEPTH: usize = 256;

/// Parse error types. Each maps to a diagnostic code in the E1xxx range.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ParseError {
    #[error("Expected {expected}, found {found}")]
    ExpectedToken {
        expected: String,
        found: String,
        span: Span,
    },
    #[error("Expected expression, found {found}")]
    ExpectedExpression { found: String, span: Span },
    #[error("Expected function body")]
    ExpectedFunctionBody { span: Span },
    #[error("Unexpected token {found}")]
    UnexpectedToken { found: String, span: Span },
    #[error("Invalid assignment target")]
    InvalidAssignmentTarget { span: Span },
    #[error("{message}")]
    ParserLimitExceeded { message: String, span: Span },
    #[error("Ambiguous 'scope' header: expected a label or 'timeout <ms>'")]
    AmbiguousScopeHeader { span: Span },
}

impl ParseError {
    pub fn span(&self) -> Span {
        match self {
            ParseError::ExpectedToken { span, .. }
            | ParseError::ExpectedExpression { span, .. }
            | ParseError::ExpectedFunctionBody { span }
            | ParseError::UnexpectedToken { span, .. }
            | ParseError::InvalidAssignmentTarget { span }
            | ParseError::ParserLimitExceeded { span, .. }
            | ParseError::AmbiguousScopeHeader { span } => *span,
        }
    }

    /// Diagnostic code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            ParseError::ExpectedToken { .. } => "E1001",
            ParseError::ExpectedExpression { .. } => "E1002",
            ParseError::ExpectedFunctionBody { .. } => "E1003",
            ParseError::UnexpectedToken { .. } => "E1004",
            ParseError::InvalidAssignmentTarget { .. } => "E1005",
            ParseError::ParserLimitExceeded { .. } => "E1006",
            ParseError::AmbiguousScopeHeader { .. } => "E1007",
        }
    }
}

/// Operator precedence levels, low to high.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
    None,
    Assignment,
    Ternary,
    NullCoalesce,
    Pipe,
    Or,
    And,
    BitOr,
    BitXor,
    BitAnd,
    Equality,
    Comparison,
    Range,
    Term,
    Factor,
    Unary,
    Postfix,
    Primary,
}

/// Names registered by the pre-scan so the main parse can recognise user
/// DSL blocks and user infix operators without a second pass.
#[derive(Debug, Default)]
pub struct PreScan {
    /// `syntax NAME` declarations seen in this unit.
    pub dsl_names: FxHashSet<String>,
    /// `macro infix "op" prec` operator symbols → precedence.
    pub infix_ops: FxHashMap<String, u8>,
}

/// The parser state: a token cursor plus the context flags the grammar
/// needs (record-literal suppression in control-flow headers, constraint
/// contexts where `_` is not a lambda placeholder).
pub struct Parser {
    source: String,
    filename: String,
    tokens: Vec<Token>,
    pos: usize,
    pub(crate) depth: usize,
    pub(crate) errors: Vec<ParseError>,
    pub(crate) prescan: PreScan,
    /// While true, `{` after an expression is a block, not record
    /// construction (set while parsing `if`/`while`/... conditions).
    pub(crate) no_record_literal: bool,
    /// While true, `_` stays a placeholder (refinement constraints).
    pub(crate) in_constraint: bool,
}

impl Parser {
    pub fn new(tokens: Vec<Token>, source: impl Into<String>, filename: impl Into<String>) -> Self {
        let mut parser = Self {
            source: source.into(),
            filename: filename.into(),
            tokens,
            pos: 0,
            depth: 0,
            errors: Vec::new(),
            prescan: PreScan::default(),
            no_record_literal: false,
            in_constraint: false,
        };
        parser.prescan();
        parser
    }

    /// Lex and parse a source snippet in one step. Used by the
    /// interpolated-string re-parse and by tests.
    pub fn parse_source(source: &str, filename: &str) -> Result<Program, Vec<ParseError>> {
        let tokens = match crate::parser::lexer::Lexer::new(source, filename).tokenize() {
            Ok(tokens) => tokens,
            Err(errors) => {
                // Surface lex failures as a single parse-level error; the
                // driver reports lex errors from its own stage.
                let span = errors.first().map(|e| e.span()).unwrap_or_default();
                return Err(vec![ParseError::UnexpectedToken {
                    found: "invalid token".into(),
                    span,
                }]);
            }
        };
        Parser::new(tokens, source, filename).parse()
    }

    /// Parse the whole unit. Errors are collected with statement-boundary
    /// recovery; if any were recorded the full list is returned.
    pub fn parse(mut self) -> Result<Program, Vec<ParseError>> {
        let mut program = Program::new();

        while !self.at_eof() {
            self.skip_layout();
            if self.at_eof() {
                break;
            }
            match stmt::parse_statement(&mut self) {
                Ok(statement) => program.statements.push(statement),
                Err(err) => {
                    self.errors.push(err);
                    recovery::sync_to_statement_boundary(&mut self);
                }
            }
        }

        if self.errors.is_empty() {
            Ok(program)
        } else {
            Err(self.errors)
        }
    }

    /// Register `syntax NAME` and `macro infix "op" prec` before the main
    /// parse so call sites can be recognised in the same unit.
    fn prescan(&mut self) {
        let mut i = 0;
        while i + 1 < self.tokens.len() {
            match self.tokens[i].kind {
                TokenKind::Syntax => {
                    if self.tokens[i + 1].kind == TokenKind::Identifier {
                        self.prescan
                            .dsl_names
                            .insert(self.tokens[i + 1].lexeme.clone());
                    }
                }
                TokenKind::Macro => {
                    // macro infix "op" <prec>
                    if self.tokens[i + 1].kind == TokenKind::Identifier
                        && self.tokens[i + 1].lexeme == "infix"
                        && i + 3 < self.tokens.len()
                        && self.tokens[i + 2].kind == TokenKind::Str
                    {
                        let op = self.tokens[i + 2]
                            .literal
                            .as_str()
                            .unwrap_or_default()
                            .to_string();
                        let prec = self.tokens[i + 3].literal.as_int().unwrap_or(5) as u8;
                        self.prescan.infix_ops.insert(op, prec);
                    }
                }
                _ => {}
            }
            i += 1;
        }
    }

    pub(crate) fn filename(&self) -> &str {
        &self.filename
    }

    pub(crate) fn source(&self) -> &str {
        &self.source
    }

    pub(crate) fn current(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    pub(crate) fn current_kind(&self) -> TokenKind {
        self.current().kind
    }

    pub(crate) fn current_span(&self) -> Span {
        self.current().span
    }

    pub(crate) fn peek_at(&self, offset: usize) -> &Token {
        let idx = (self.pos + offset).min(self.tokens.len() - 1);
        &self.tokens[idx]
    }

    pub(crate) fn previous(&self) -> &Token {
        &self.tokens[self.pos.saturating_sub(1)]
    }

    pub(crate) fn at_eof(&self) -> bool {
        self.current_kind() == TokenKind::Eof
    }

    pub(crate) fn advance(&mut self) -> Token {
        let token = self.current().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    pub(crate) fn check(&self, kind: TokenKind) -> bool {
        self.current_kind() == kind
    }

    /// Consume the current token if it matches; returns whether it did.
    pub(crate) fn eat(&mut self, kind: TokenKind) -> bool {
        if self.check(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    pub(crate) fn consume(&mut self, kind: TokenKind, expected: &str) -> Result<Token, ParseError> {
        if self.check(kind) {
            Ok(self.advance())
        } else {
            Err(ParseError::ExpectedToken {
                expected: expected.to_string(),
                found: self.current().lexeme.clone(),
                span: self.current_span(),
            })
        }
    }

    pub(crate) fn consume_identifier(&mut self, expected: &str) -> Result<String, ParseError> {
        let token = self.consume(TokenKind::Identifier, expected)?;
        Ok(token.lexeme)
    }

    /// Skip NEWLINE tokens (statement separators).
    pub(crate) fn skip_newlines(&mut self) {
        while self.check(TokenKind::Newline) {
            self.advance();
        }
    }

    /// Skip NEWLINE plus stray DEDENTs at the top level.
    pub(crate) fn skip_layout(&mut self) {
        while matches!(self.current_kind(), TokenKind::Newline | TokenKind::Dedent) {
            self.advance();
        }
    }

    /// Save/restore for backtracking decisions (labelled loops).
    pub(crate) fn mark(&self) -> usize {
        self.pos
    }

    pub(crate) fn rewind(&mut self, mark: usize) {
        self.pos = mark;
    }

    pub(crate) fn depth_guard(&mut self) -> Result<(), ParseError> {
        if self.depth > MAX_PARSE_DEPTH {
            return Err(ParseError::ParserLimitExceeded {
                message: format!("Maximum nesting depth ({}) exceeded", MAX_PARSE_DEPTH),
                span: self.current_span(),
            });
        }
        Ok(())
    }
}

/// True when the token after a `?` can start an expression, meaning the
/// `?` belongs to a ternary rather than marking a nullable type.
pub(crate) fn expr_follows_question(parser: &Parser) -> bool {
    expr::can_start_expression(parser.peek_at(1).kind)
}

/// How a block was opened; closing must match.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum BlockStyle {
    /// `:` NEWLINE INDENT ... DEDENT
    Indent,
    /// `:` followed by a statement on the same line
    Inline,
    /// `{ ... }`
    Brace,
    /// `then ... end` / `do ... end`
    LuaEnd,
}

/// Open a block in any of the three equivalent forms.
pub(crate) fn open_block(parser: &mut Parser) -> Result<BlockStyle, ParseError> {
    match parser.current_kind() {
        TokenKind::Colon => {
            parser.advance();
            if parser.check(TokenKind::Newline) {
                parser.skip_newlines();
                parser.consume(TokenKind::Indent, "an indented block")?;
                Ok(BlockStyle::Indent)
            } else {
                Ok(BlockStyle::Inline)
            }
        }
        TokenKind::LBrace => {
            parser.advance();
            Ok(BlockStyle::Brace)
        }
        TokenKind::Then | TokenKind::Do => {
            parser.advance();
            Ok(BlockStyle::LuaEnd)
        }
        _ => Err(ParseError::ExpectedToken {
            expected: "':', '{', 'then' or 'do' to open a block".to_string(),
            found: parser.current().lexeme.clone(),
            span: parser.current_span(),
        }),
    }
}

/// True when the current token terminates a block of the given style.
/// `stop_on_else` lets `if`-family statements keep `else`/`elif` for the
/// caller in the Lua-style form.
pub(crate) fn block_finished(parser: &Parser, style: BlockStyle, stop_on_else: bool) -> bool {
    if parser.at_eof() {
        return true;
    }
    match style {
        BlockStyle::Indent => parser.check(TokenKind::Dedent),
        BlockStyle::Inline => parser.check(TokenKind::Newline),
        BlockStyle::Brace => parser.check(TokenKind::RBrace),
        BlockStyle::LuaEnd => {
            parser.check(TokenKind::End)
                || (stop_on_else
                    && (parser.check(TokenKind::Else) || parser.check(TokenKind::Elif)))
        }
    }
}

/// Consume the block terminator (`DEDENT`, `}` or `end`). For the inline
/// form there is nothing to consume; for Lua-style blocks followed by
/// `else`/`elif` the caller passes `expect_end = false`.
pub(crate) fn close_block(
    parser: &mut Parser,
    style: BlockStyle,
    expect_end: bool,
) -> Result<(), ParseError> {
    match style {
        BlockStyle::Indent => {
            parser.consume(TokenKind::Dedent, "end of indented block")?;
        }
        BlockStyle::Inline => {}
        BlockStyle::Brace => {
            parser.consume(TokenKind::RBrace, "'}' to close block")?;
        }
        BlockStyle::LuaEnd => {
            if expect_end {
                parser.consume(TokenKind::End, "'end' to close block")?;
            }
        }
    }
    Ok(())
}

/// Parse a full block in any form and return its statements.
pub(crate) fn parse_block(parser: &mut Parser) -> Result<Vec<Statement>, ParseError> {
    let style = open_block(parser)?;
    let mut statements = Vec::new();

    if style == BlockStyle::Inline {
        statements.push(stmt::parse_statement(parser)?);
        return Ok(statements);
    }

    loop {
        parser.skip_newlines();
        if block_finished(parser, style, false) {
            break;
        }
        statements.push(stmt::parse_statement(parser)?);
    }
    close_block(parser, style, true)?;
    Ok(statements)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_ok(source: &str) -> Program {
        Parser::parse_source(source, "test.tyl").expect("parse ok")
    }

    #[test]
    fn parses_empty_program() {
        let program = parse_ok("");
        assert!(program.statements.is_empty());
    }

    #[test]
    fn prescan_registers_dsl_and_infix() {
        let tokens = crate::parser::lexer::Lexer::new(
            "syntax sql\nmacro infix \"<+>\" 6 => vec_add\n",
            "t.tyl",
        )
        .tokenize()
        .unwrap();
        let parser = Parser::new(tokens, "", "t.tyl");
        assert!(parser.prescan.dsl_names.contains("sql"));
        assert_eq!(parser.prescan.infix_ops.get("<+>"), Some(&6));
    }

    #[test]
    fn recovers_and_reports_multiple_errors() {
        let errs = Parser::parse_source("let = 1\nlet = 2\n", "t.tyl").unwrap_err();
        assert!(errs.len() >= 2);
    }
}
