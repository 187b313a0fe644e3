//! Lexer for the Tyl programming language.
//!
//! Tyl is indentation-sensitive, so the lexer runs a manual scanning loop
//! that owns line starts (INDENT/DEDENT synthesis), newline coalescing,
//! comments, strings with `{expr}` interpolation, char/byte-string/
//! lifetime/attribute literals and user-defined operator runs. Everything
//! else — keywords, identifiers, numbers, fixed operators — is recognised
//! by a logos-generated sub-lexer invoked at the current position.

use crate::parser::token::{Literal, Span, Token, TokenKind};
use logos::Logos;
use thiserror::Error;

/// Logos-based token enum for the regular (non-layout) part of the grammar.
///
/// This enum is used internally for efficient tokenization and is converted
/// to the public [`TokenKind`] after matching.
#[derive(Logos, Debug, Clone, PartialEq)]
enum LogosToken {
    // Keywords (must come before identifiers)
    #[token("fn")]
    Fn,
    #[token("let")]
    Let,
    #[token("mut")]
    Mut,
    #[token("const")]
    Const,
    #[token("var")]
    Var,
    #[token("record")]
    Record,
    #[token("enum")]
    Enum,
    #[token("union")]
    Union,
    #[token("type")]
    Type,
    #[token("alias")]
    Alias,
    #[token("trait")]
    Trait,
    #[token("impl")]
    Impl,
    #[token("concept")]
    Concept,
    #[token("effect")]
    Effect,
    #[token("macro")]
    Macro,
    #[token("syntax")]
    Syntax,
    #[token("layer")]
    Layer,
    #[token("extern")]
    Extern,
    #[token("use")]
    Use,
    #[token("import")]
    Import,
    #[token("module")]
    Module,
    #[token("from")]
    From,
    #[token("if")]
    If,
    #[token("else")]
    Else,
    #[token("elif")]
    Elif,
    #[token("unless")]
    Unless,
    #[token("match")]
    Match,
    #[token("while")]
    While,
    #[token("for")]
    For,
    #[token("loop")]
    Loop,
    #[token("return")]
    Return,
    #[token("break")]
    Break,
    #[token("continue")]
    Continue,
    #[token("try")]
    Try,
    #[token("true")]
    True,
    #[token("false")]
    False,
    #[token("nil")]
    Nil,
    #[token("and")]
    And,
    #[token("or")]
    Or,
    #[token("not")]
    Not,
    #[token("in")]
    In,
    #[token("to")]
    To,
    #[token("by")]
    By,
    #[token("is")]
    Is,
    #[token("async")]
    Async,
    #[token("await")]
    Await,
    #[token("spawn")]
    Spawn,
    #[token("chan")]
    Chan,
    #[token("Mutex")]
    Mutex,
    #[token("RWLock")]
    RwLock,
    #[token("Cond")]
    Cond,
    #[token("Semaphore")]
    Semaphore,
    #[token("lock")]
    Lock,
    #[token("Atomic")]
    Atomic,
    #[token("handle")]
    Handle,
    #[token("perform")]
    Perform,
    #[token("resume")]
    Resume,
    #[token("Box")]
    Box,
    #[token("Rc")]
    Rc,
    #[token("Arc")]
    Arc,
    #[token("Weak")]
    WeakPtr,
    #[token("Cell")]
    Cell,
    #[token("RefCell")]
    RefCell,
    #[token("unsafe")]
    Unsafe,
    #[token("ptr")]
    Ptr,
    #[token("ref")]
    Ref,
    #[token("new")]
    New,
    #[token("delete")]
    Delete,
    #[token("asm")]
    Asm,
    #[token("pub")]
    Pub,
    #[token("priv")]
    Priv,
    #[token("self")]
    SelfKw,
    #[token("super")]
    Super,
    #[token("comptime")]
    Comptime,
    #[token("assert")]
    Assert,
    #[token("require")]
    Require,
    #[token("ensure")]
    Ensure,
    #[token("invariant")]
    Invariant,
    #[token("where")]
    Where,
    #[token("scope")]
    Scope,
    #[token("with")]
    With,
    #[token("export")]
    Export,
    #[token("inline")]
    Inline,
    #[token("noinline")]
    Noinline,
    #[token("packed")]
    Packed,
    #[token("align")]
    Align,
    #[token("repr")]
    Repr,
    #[token("hidden")]
    Hidden,
    #[token("weak")]
    Weak,
    #[token("cdecl")]
    Cdecl,
    #[token("stdcall")]
    Stdcall,
    #[token("fastcall")]
    Fastcall,
    #[token("naked")]
    Naked,
    #[token("end")]
    End,
    #[token("then")]
    Then,
    #[token("do")]
    Do,

    // Placeholder (wins over the identifier regex at equal length)
    #[token("_", priority = 3)]
    Underscore,

    // Identifiers (must come after keywords)
    #[regex(r"[a-zA-Z_][a-zA-Z0-9_]*", |lex| lex.slice().to_string())]
    Identifier(String),

    // Numbers. A float suffix on a plain integer forces FLOAT; an invalid
    // suffix simply fails to match and is lexed as a separate identifier.
    #[regex(
        r"[0-9]+\.[0-9]+([eE][+-]?[0-9]+)?(f16|f32|f64|f128)?",
        parse_float
    )]
    #[regex(r"[0-9]+[eE][+-]?[0-9]+(f16|f32|f64|f128)?", parse_float)]
    #[regex(r"[0-9]+(f16|f32|f64|f128)", parse_float)]
    FloatLiteral(f64),

    #[regex(r"[0-9]+(i8|i16|i32|i64|i128|u8|u16|u32|u64|u128)?", parse_int)]
    IntLiteral(i64),

    // Operators (longest-match resolves 3-char before 2-char before 1-char)
    #[token("<=>")]
    Spaceship,
    #[token("..=")]
    DotDotEq,
    #[token("..")]
    DotDot,
    #[token(".")]
    Dot,
    #[token("->")]
    Arrow,
    #[token("=>")]
    DoubleArrow,
    #[token("==")]
    Eq,
    #[token("!=")]
    Ne,
    #[token("<=")]
    Le,
    #[token(">=")]
    Ge,
    #[token("<-")]
    ChanSend,
    #[token("<")]
    Lt,
    #[token(">")]
    Gt,
    #[token("=")]
    Assign,
    #[token("+=")]
    PlusAssign,
    #[token("-=")]
    MinusAssign,
    #[token("*=")]
    StarAssign,
    #[token("/=")]
    SlashAssign,
    #[token("%=")]
    PercentAssign,
    #[token("+")]
    Plus,
    #[token("-")]
    Minus,
    #[token("*")]
    Star,
    #[token("/")]
    Slash,
    #[token("%")]
    Percent,
    #[token("&&")]
    AmpAmp,
    #[token("||")]
    PipePipe,
    #[token("|>")]
    PipeGt,
    #[token("&")]
    Amp,
    #[token("|")]
    Pipe,
    #[token("^")]
    Caret,
    #[token("~")]
    Tilde,
    #[token("??")]
    QuestionQuestion,
    #[token("?.")]
    QuestionDot,
    #[token("?")]
    Question,
    #[token("!")]
    Bang,
    #[token("@")]
    At,
    #[token("::")]
    DoubleColon,
    #[token(":=")]
    Walrus,
    #[token(":")]
    Colon,
    #[token(",")]
    Comma,
    #[token(";")]
    Semicolon,
    #[token("(")]
    LParen,
    #[token(")")]
    RParen,
    #[token("[")]
    LBracket,
    #[token("]")]
    RBracket,
    #[token("{")]
    LBrace,
    #[token("}")]
    RBrace,
}

const FLOAT_SUFFIXES: [&str; 4] = ["f128", "f64", "f32", "f16"];
const INT_SUFFIXES: [&str; 10] = [
    "i128", "u128", "i64", "u64", "i32", "u32", "i16", "u16", "i8", "u8",
];

fn strip_suffix<'a>(s: &'a str, suffixes: &[&str]) -> &'a str {
    for suffix in suffixes {
        if let Some(stripped) = s.strip_suffix(suffix) {
            return stripped;
        }
    }
    s
}

fn parse_float(lex: &mut logos::Lexer<'_, LogosToken>) -> Option<f64> {
    strip_suffix(lex.slice(), &FLOAT_SUFFIXES).parse().ok()
}

fn parse_int(lex: &mut logos::Lexer<'_, LogosToken>) -> Option<i64> {
    strip_suffix(lex.slice(), &INT_SUFFIXES).parse().ok()
}

/// Lexer error types. Each maps to a diagnostic code in the E0xxx range.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LexError {
    #[error("Unexpected character '{ch}'")]
    UnexpectedCharacter { ch: char, span: Span },
    #[error("Unterminated string literal")]
    UnterminatedString { span: Span },
    #[error("Unterminated string interpolation")]
    UnterminatedInterpolation { span: Span },
    #[error("Inconsistent indentation")]
    InconsistentIndentation { span: Span },
    #[error("Invalid numeric literal '{text}'")]
    InvalidNumber { text: String, span: Span },
    #[error("String literal contains a reserved control byte")]
    ReservedControlByte { span: Span },
}

impl LexError {
    pub fn span(&self) -> Span {
        match self {
            LexError::UnexpectedCharacter { span, .. }
            | LexError::UnterminatedString { span }
            | LexError::UnterminatedInterpolation { span }
            | LexError::InconsistentIndentation { span }
            | LexError::InvalidNumber { span, .. }
            | LexError::ReservedControlByte { span } => *span,
        }
    }

    /// Diagnostic code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            LexError::UnexpectedCharacter { .. } => "E0001",
            LexError::UnterminatedString { .. } => "E0002",
            LexError::UnterminatedInterpolation { .. } => "E0003",
            LexError::InconsistentIndentation { .. } => "E0004",
            LexError::InvalidNumber { .. } => "E0005",
            LexError::ReservedControlByte { .. } => "E0006",
        }
    }
}

/// Delimiters used to encode interpolation segments inside a STRING
/// token's literal: `\x01 <expression source> \x02`.
pub const INTERP_START: char = '\u{1}';
/// Closing delimiter of an interpolation segment.
pub const INTERP_END: char = '\u{2}';

/// Main lexer structure.
pub struct Lexer<'a> {
    source: &'a str,
    bytes: &'a [u8],
    filename: String,
    tokens: Vec<Token>,
    errors: Vec<LexError>,
    pos: usize,
    line: u32,
    column: u32,
    at_line_start: bool,
    indent_stack: Vec<u32>,
}

impl<'a> Lexer<'a> {
    pub fn new(source: &'a str, filename: impl Into<String>) -> Self {
        Self {
            source,
            bytes: source.as_bytes(),
            filename: filename.into(),
            tokens: Vec::new(),
            errors: Vec::new(),
            pos: 0,
            line: 1,
            column: 1,
            at_line_start: true,
            indent_stack: vec![0],
        }
    }

    /// Name of the file being lexed (used by callers building diagnostics).
    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// Tokenize the whole source. On success the token stream is terminated
    /// by EOF with all open indentation levels flushed back to column zero.
    pub fn tokenize(mut self) -> Result<Vec<Token>, Vec<LexError>> {
        while !self.is_at_end() {
            if self.at_line_start {
                self.handle_indentation();
                if self.is_at_end() {
                    break;
                }
                continue;
            }
            self.scan_token();
        }

        // Flush remaining indentation levels
        while self.indent_stack.len() > 1 {
            self.indent_stack.pop();
            let span = self.here(0);
            self.tokens.push(Token::new(TokenKind::Dedent, "", span));
        }

        let span = self.here(0);
        self.tokens.push(Token::new(TokenKind::Eof, "", span));

        if self.errors.is_empty() {
            Ok(self.tokens)
        } else {
            Err(self.errors)
        }
    }

    fn is_at_end(&self) -> bool {
        self.pos >= self.bytes.len()
    }

    fn peek(&self) -> u8 {
        if self.pos < self.bytes.len() {
            self.bytes[self.pos]
        } else {
            0
        }
    }

    fn peek_at(&self, offset: usize) -> u8 {
        if self.pos + offset < self.bytes.len() {
            self.bytes[self.pos + offset]
        } else {
            0
        }
    }

    fn bump(&mut self) -> u8 {
        let b = self.bytes[self.pos];
        self.pos += 1;
        if b == b'\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        b
    }

    fn here(&self, len: usize) -> Span {
        Span::new(self.pos, self.pos + len, self.line, self.column)
    }

    fn span_from(&self, start: usize, start_line: u32, start_col: u32) -> Span {
        Span::new(start, self.pos, start_line, start_col)
    }

    /// Compute the indentation width of the current line and emit
    /// INDENT/DEDENT tokens against the indent stack. Blank lines and
    /// comment-only lines never alter indentation.
    fn handle_indentation(&mut self) {
        let mut indent: u32 = 0;
        while !self.is_at_end() && (self.peek() == b' ' || self.peek() == b'\t') {
            indent += if self.peek() == b' ' { 1 } else { 4 };
            self.bump();
        }

        // Blank or comment-only lines leave the stack untouched
        if self.is_at_end()
            || self.peek() == b'\n'
            || (self.peek() == b'/' && self.peek_at(1) == b'/')
            || (self.peek() == b'#' && self.peek_at(1) != b'[')
        {
            self.at_line_start = false;
            return;
        }

        let current = *self.indent_stack.last().unwrap();
        if indent > current {
            self.indent_stack.push(indent);
            let span = Span::new(self.pos, self.pos, self.line, 1);
            self.tokens.push(Token::new(TokenKind::Indent, "", span));
        } else if indent < current {
            while indent < *self.indent_stack.last().unwrap() {
                self.indent_stack.pop();
                let span = Span::new(self.pos, self.pos, self.line, 1);
                self.tokens.push(Token::new(TokenKind::Dedent, "", span));
            }
            if indent != *self.indent_stack.last().unwrap() {
                self.errors.push(LexError::InconsistentIndentation {
                    span: Span::new(self.pos, self.pos, self.line, 1),
                });
                // Adopt the new width so lexing can continue
                self.indent_stack.push(indent);
            }
        }
        self.at_line_start = false;
    }

    fn push_newline(&mut self) {
        // Successive NEWLINEs coalesce; a NEWLINE right after INDENT is
        // suppressed so blocks start cleanly.
        match self.tokens.last().map(|t| t.kind) {
            Some(TokenKind::Newline) | Some(TokenKind::Indent) | None => {}
            _ => {
                let span = self.here(0);
                self.tokens.push(Token::new(TokenKind::Newline, "\n", span));
            }
        }
    }

    fn scan_token(&mut self) {
        let b = self.peek();
        match b {
            b' ' | b'\t' | b'\r' => {
                self.bump();
            }
            b'\n' => {
                self.push_newline();
                self.bump();
                self.at_line_start = true;
            }
            b'/' if self.peek_at(1) == b'/' => self.scan_comment(),
            b'#' => {
                if self.peek_at(1) == b'[' {
                    self.scan_bracket_attribute();
                } else {
                    // Script-style line comment
                    while !self.is_at_end() && self.peek() != b'\n' {
                        self.bump();
                    }
                }
            }
            b'"' => self.scan_string(),
            b'\'' => self.scan_char_or_lifetime(),
            b'b' if self.peek_at(1) == b'"' || self.peek_at(1) == b'\'' => {
                self.scan_byte_string(false)
            }
            b'b' if self.peek_at(1) == b'r'
                && (self.peek_at(2) == b'"' || self.peek_at(2) == b'\'') =>
            {
                self.scan_byte_string(true)
            }
            b'@' => {
                if self.peek_at(1).is_ascii_alphabetic() {
                    self.scan_at_attribute();
                } else if self.peek_at(1) == b'@' {
                    self.scan_custom_run(b'@');
                } else {
                    self.emit_simple(TokenKind::At, 1);
                }
            }
            b'$' if self.peek_at(1).is_ascii_alphabetic() || self.peek_at(1) == b'_' => {
                self.scan_template_var();
            }
            b'+' | b'-' | b'%' | b'^' if self.peek_at(1) == b => self.scan_custom_run(b),
            b'*' if self.peek_at(1) == b'*' => self.scan_star_custom(),
            _ => self.scan_with_logos(),
        }
    }

    fn emit_simple(&mut self, kind: TokenKind, len: usize) {
        let start = self.pos;
        let (line, col) = (self.line, self.column);
        for _ in 0..len {
            self.bump();
        }
        let lexeme = &self.source[start..self.pos];
        self.tokens
            .push(Token::new(kind, lexeme, self.span_from(start, line, col)));
    }

    fn scan_comment(&mut self) {
        // `///` opens a block comment closed by `///`; `//` runs to newline.
        if self.peek_at(2) == b'/' {
            self.bump();
            self.bump();
            self.bump();
            while !self.is_at_end() {
                if self.peek() == b'/' && self.peek_at(1) == b'/' && self.peek_at(2) == b'/' {
                    self.bump();
                    self.bump();
                    self.bump();
                    return;
                }
                self.bump();
            }
            return; // unterminated block comment: tolerated
        }
        while !self.is_at_end() && self.peek() != b'\n' {
            self.bump();
        }
    }

    /// Scan a run of a single repeated operator character (`++`, `--`,
    /// `%%`, `^^`, `@@`) into a CUSTOM_OP token.
    fn scan_custom_run(&mut self, ch: u8) {
        let start = self.pos;
        let (line, col) = (self.line, self.column);
        while !self.is_at_end() && self.peek() == ch {
            self.bump();
        }
        let lexeme = self.source[start..self.pos].to_string();
        self.tokens.push(Token::with_str(
            TokenKind::CustomOp,
            lexeme.clone(),
            self.span_from(start, line, col),
            lexeme,
        ));
    }

    /// `**` and anything operator-like after it form a CUSTOM_OP (`**`,
    /// `***`, `**=`, ...).
    fn scan_star_custom(&mut self) {
        let start = self.pos;
        let (line, col) = (self.line, self.column);
        self.bump();
        self.bump();
        while !self.is_at_end() && is_operator_char(self.peek()) {
            self.bump();
        }
        let lexeme = self.source[start..self.pos].to_string();
        self.tokens.push(Token::with_str(
            TokenKind::CustomOp,
            lexeme.clone(),
            self.span_from(start, line, col),
            lexeme,
        ));
    }

    fn scan_template_var(&mut self) {
        let start = self.pos;
        let (line, col) = (self.line, self.column);
        self.bump(); // $
        while !self.is_at_end() && (self.peek().is_ascii_alphanumeric() || self.peek() == b'_') {
            self.bump();
        }
        let lexeme = self.source[start..self.pos].to_string();
        self.tokens.push(Token::with_str(
            TokenKind::Identifier,
            lexeme.clone(),
            self.span_from(start, line, col),
            lexeme,
        ));
    }

    fn scan_at_attribute(&mut self) {
        let start = self.pos;
        let (line, col) = (self.line, self.column);
        self.bump(); // @
        let content_start = self.pos;
        while !self.is_at_end() && (self.peek().is_ascii_alphanumeric() || self.peek() == b'_') {
            self.bump();
        }
        let mut content = self.source[content_start..self.pos].to_string();
        if self.peek() == b'(' {
            let args_start = self.pos;
            self.bump();
            while !self.is_at_end() && self.peek() != b')' && self.peek() != b'\n' {
                self.bump();
            }
            if self.peek() == b')' {
                self.bump();
            }
            content.push_str(&self.source[args_start..self.pos]);
        }
        let lexeme = self.source[start..self.pos].to_string();
        self.tokens.push(Token::with_str(
            TokenKind::Attribute,
            lexeme,
            self.span_from(start, line, col),
            content,
        ));
    }

    fn scan_bracket_attribute(&mut self) {
        let start = self.pos;
        let (line, col) = (self.line, self.column);
        self.bump(); // #
        self.bump(); // [
        let content_start = self.pos;
        while !self.is_at_end() && self.peek() != b']' {
            self.bump();
        }
        let content = self.source[content_start..self.pos].to_string();
        if !self.is_at_end() {
            self.bump(); // ]
        }
        let lexeme = self.source[start..self.pos].to_string();
        self.tokens.push(Token::with_str(
            TokenKind::Attribute,
            lexeme,
            self.span_from(start, line, col),
            content,
        ));
    }

    fn scan_string(&mut self) {
        let start = self.pos;
        let (line, col) = (self.line, self.column);
        self.bump(); // opening quote
        let mut value = String::new();
        let mut has_interpolation = false;

        loop {
            if self.is_at_end() || self.peek() == b'\n' {
                self.errors.push(LexError::UnterminatedString {
                    span: self.span_from(start, line, col),
                });
                return;
            }
            match self.peek() {
                b'"' => {
                    self.bump();
                    break;
                }
                0x01 | 0x02 => {
                    // Reserved for the interpolation encoding
                    self.errors.push(LexError::ReservedControlByte {
                        span: self.here(1),
                    });
                    self.bump();
                }
                b'\\' => {
                    self.bump();
                    let esc = self.peek();
                    match esc {
                        b'n' => value.push('\n'),
                        b't' => value.push('\t'),
                        b'r' => value.push('\r'),
                        b'\\' => value.push('\\'),
                        b'"' => value.push('"'),
                        b'\'' => value.push('\''),
                        b'{' => value.push('{'),
                        _ => value.push(esc as char),
                    }
                    self.bump();
                }
                b'{' => {
                    self.bump();
                    has_interpolation = true;
                    let mut expr = String::new();
                    let mut depth = 1;
                    while !self.is_at_end() && depth > 0 {
                        match self.peek() {
                            b'{' => depth += 1,
                            b'}' => depth -= 1,
                            _ => {}
                        }
                        if depth > 0 {
                            expr.push(self.bump() as char);
                        }
                    }
                    if depth > 0 {
                        self.errors.push(LexError::UnterminatedInterpolation {
                            span: self.span_from(start, line, col),
                        });
                        return;
                    }
                    self.bump(); // closing }
                    value.push(INTERP_START);
                    value.push_str(&expr);
                    value.push(INTERP_END);
                }
                b => {
                    if b < 0x80 {
                        value.push(b as char);
                        self.bump();
                    } else {
                        // Copy a full UTF-8 sequence
                        let ch_start = self.pos;
                        self.bump();
                        while !self.is_at_end() && (self.peek() & 0xC0) == 0x80 {
                            self.bump();
                        }
                        value.push_str(&self.source[ch_start..self.pos]);
                    }
                }
            }
        }

        let _ = has_interpolation;
        let lexeme = self.source[start..self.pos].to_string();
        self.tokens.push(Token::with_str(
            TokenKind::Str,
            lexeme,
            self.span_from(start, line, col),
            value,
        ));
    }

    /// `'a` is a lifetime; `'x'` (with escapes and UTF-8 decoding) is a
    /// 32-bit char scalar.
    fn scan_char_or_lifetime(&mut self) {
        let start = self.pos;
        let (line, col) = (self.line, self.column);
        self.bump(); // opening quote

        // Lifetime: ' followed by an identifier with no closing quote
        if (self.peek().is_ascii_alphabetic() || self.peek() == b'_')
            && !(self.peek_at(1) == b'\'')
        {
            let name_start = self.pos;
            while !self.is_at_end() && (self.peek().is_ascii_alphanumeric() || self.peek() == b'_')
            {
                self.bump();
            }
            let lexeme = self.source[start..self.pos].to_string();
            let name = self.source[name_start..self.pos].to_string();
            self.tokens.push(Token::with_str(
                TokenKind::Lifetime,
                lexeme,
                self.span_from(start, line, col),
                format!("'{}", name),
            ));
            return;
        }

        let mut value: u32 = 0;
        if self.peek() == b'\\' {
            self.bump();
            match self.peek() {
                b'n' => {
                    value = '\n' as u32;
                    self.bump();
                }
                b't' => {
                    value = '\t' as u32;
                    self.bump();
                }
                b'r' => {
                    value = '\r' as u32;
                    self.bump();
                }
                b'\\' => {
                    value = '\\' as u32;
                    self.bump();
                }
                b'\'' => {
                    value = '\'' as u32;
                    self.bump();
                }
                b'"' => {
                    value = '"' as u32;
                    self.bump();
                }
                b'0' => {
                    value = 0;
                    self.bump();
                }
                b'x' => {
                    self.bump();
                    let mut hex = String::new();
                    for _ in 0..2 {
                        if self.peek().is_ascii_hexdigit() {
                            hex.push(self.bump() as char);
                        }
                    }
                    if hex.len() == 2 {
                        value = u32::from_str_radix(&hex, 16).unwrap_or(0);
                    }
                }
                b'u' => {
                    self.bump();
                    if self.peek() == b'{' {
                        self.bump();
                        let mut hex = String::new();
                        while !self.is_at_end()
                            && self.peek() != b'}'
                            && self.peek().is_ascii_hexdigit()
                        {
                            hex.push(self.bump() as char);
                        }
                        if self.peek() == b'}' {
                            self.bump();
                            if !hex.is_empty() && hex.len() <= 6 {
                                value = u32::from_str_radix(&hex, 16).unwrap_or(0);
                            }
                        }
                    }
                }
                other => {
                    value = other as u32;
                    self.bump();
                }
            }
        } else if self.peek() != b'\'' && !self.is_at_end() {
            // Decode one UTF-8 scalar
            let ch_start = self.pos;
            self.bump();
            while !self.is_at_end() && (self.peek() & 0xC0) == 0x80 {
                self.bump();
            }
            if let Some(c) = self.source[ch_start..self.pos].chars().next() {
                value = c as u32;
            }
        }

        if self.peek() != b'\'' {
            self.errors.push(LexError::UnterminatedString {
                span: self.span_from(start, line, col),
            });
            return;
        }
        self.bump(); // closing quote

        let lexeme = self.source[start..self.pos].to_string();
        self.tokens.push(Token::with_int(
            TokenKind::Char,
            lexeme,
            self.span_from(start, line, col),
            value as i64,
        ));
    }

    /// `b"…"` honours escapes; `br"…"` passes everything through. Bytes
    /// are stored one-per-char in the literal payload (latin-1 mapping),
    /// which the code generator folds back to raw bytes.
    fn scan_byte_string(&mut self, raw: bool) {
        let start = self.pos;
        let (line, col) = (self.line, self.column);
        self.bump(); // b
        if raw {
            self.bump(); // r
        }
        let quote = self.bump(); // opening quote
        let mut value = String::new();

        loop {
            if self.is_at_end() || self.peek() == b'\n' {
                self.errors.push(LexError::UnterminatedString {
                    span: self.span_from(start, line, col),
                });
                return;
            }
            let b = self.peek();
            if b == quote {
                self.bump();
                break;
            }
            if !raw && b == b'\\' {
                self.bump();
                match self.peek() {
                    b'n' => {
                        value.push('\n');
                        self.bump();
                    }
                    b't' => {
                        value.push('\t');
                        self.bump();
                    }
                    b'r' => {
                        value.push('\r');
                        self.bump();
                    }
                    b'\\' => {
                        value.push('\\');
                        self.bump();
                    }
                    b'"' => {
                        value.push('"');
                        self.bump();
                    }
                    b'\'' => {
                        value.push('\'');
                        self.bump();
                    }
                    b'0' => {
                        value.push('\0');
                        self.bump();
                    }
                    b'x' => {
                        self.bump();
                        let mut hex = String::new();
                        for _ in 0..2 {
                            if self.peek().is_ascii_hexdigit() {
                                hex.push(self.bump() as char);
                            }
                        }
                        if hex.len() == 2 {
                            let byte = u8::from_str_radix(&hex, 16).unwrap_or(0);
                            value.push(char::from_u32(byte as u32).unwrap_or('\0'));
                        }
                    }
                    other => {
                        value.push(other as char);
                        self.bump();
                    }
                }
            } else {
                value.push(char::from_u32(b as u32).unwrap_or('\0'));
                self.bump();
            }
        }

        let kind = if raw {
            TokenKind::RawByteString
        } else {
            TokenKind::ByteString
        };
        let lexeme = self.source[start..self.pos].to_string();
        self.tokens
            .push(Token::with_str(kind, lexeme, self.span_from(start, line, col), value));
    }

    /// Delegate keyword / identifier / number / fixed-operator recognition
    /// to the logos sub-lexer at the current position.
    fn scan_with_logos(&mut self) {
        let (line, col) = (self.line, self.column);
        let mut logos_lexer = LogosToken::lexer(&self.source[self.pos..]);

        match logos_lexer.next() {
            Some(Ok(logos_token)) => {
                let range = logos_lexer.span();
                let abs_start = self.pos + range.start;
                let abs_end = self.pos + range.end;
                let lexeme = self.source[abs_start..abs_end].to_string();

                // Advance position/columns past the consumed slice
                for _ in 0..(abs_end - self.pos) {
                    self.bump();
                }

                let span = Span::new(abs_start, abs_end, line, col);
                let token = convert_token(logos_token, lexeme, span);
                self.tokens.push(token);
            }
            Some(Err(_)) | None => {
                let ch = self.source[self.pos..].chars().next().unwrap_or('\0');
                self.errors.push(LexError::UnexpectedCharacter {
                    ch,
                    span: self.here(ch.len_utf8()),
                });
                for _ in 0..ch.len_utf8() {
                    self.bump();
                }
            }
        }
    }
}

fn is_operator_char(b: u8) -> bool {
    matches!(
        b,
        b'+' | b'-' | b'*' | b'/' | b'%' | b'^' | b'&' | b'|' | b'<' | b'>' | b'=' | b'!' | b'?'
            | b'@' | b'~'
    )
}

fn convert_token(logos_token: LogosToken, lexeme: String, span: Span) -> Token {
    use TokenKind as K;
    let kind = match logos_token {
        LogosToken::Fn => K::Fn,
        LogosToken::Let => K::Let,
        LogosToken::Mut => K::Mut,
        LogosToken::Const => K::Const,
        LogosToken::Var => K::Var,
        LogosToken::Record => K::Record,
        LogosToken::Enum => K::Enum,
        LogosToken::Union => K::Union,
        LogosToken::Type => K::Type,
        LogosToken::Alias => K::Alias,
        LogosToken::Trait => K::Trait,
        LogosToken::Impl => K::Impl,
        LogosToken::Concept => K::Concept,
        LogosToken::Effect => K::Effect,
        LogosToken::Macro => K::Macro,
        LogosToken::Syntax => K::Syntax,
        LogosToken::Layer => K::Layer,
        LogosToken::Extern => K::Extern,
        LogosToken::Use => K::Use,
        LogosToken::Import => K::Import,
        LogosToken::Module => K::Module,
        LogosToken::From => K::From,
        LogosToken::If => K::If,
        LogosToken::Else => K::Else,
        LogosToken::Elif => K::Elif,
        LogosToken::Unless => K::Unless,
        LogosToken::Match => K::Match,
        LogosToken::While => K::While,
        LogosToken::For => K::For,
        LogosToken::Loop => K::Loop,
        LogosToken::Return => K::Return,
        LogosToken::Break => K::Break,
        LogosToken::Continue => K::Continue,
        LogosToken::Try => K::Try,
        LogosToken::True => K::True,
        LogosToken::False => K::False,
        LogosToken::Nil => K::Nil,
        LogosToken::And => K::And,
        LogosToken::Or => K::Or,
        LogosToken::Not => K::Not,
        LogosToken::In => K::In,
        LogosToken::To => K::To,
        LogosToken::By => K::By,
        LogosToken::Is => K::Is,
        LogosToken::Async => K::Async,
        LogosToken::Await => K::Await,
        LogosToken::Spawn => K::Spawn,
        LogosToken::Chan => K::Chan,
        LogosToken::Mutex => K::Mutex,
        LogosToken::RwLock => K::RwLock,
        LogosToken::Cond => K::Cond,
        LogosToken::Semaphore => K::Semaphore,
        LogosToken::Lock => K::Lock,
        LogosToken::Atomic => K::Atomic,
        LogosToken::Handle => K::Handle,
        LogosToken::Perform => K::Perform,
        LogosToken::Resume => K::Resume,
        LogosToken::Box => K::Box,
        LogosToken::Rc => K::Rc,
        LogosToken::Arc => K::Arc,
        LogosToken::WeakPtr => K::WeakPtr,
        LogosToken::Cell => K::Cell,
        LogosToken::RefCell => K::RefCell,
        LogosToken::Unsafe => K::Unsafe,
        LogosToken::Ptr => K::Ptr,
        LogosToken::Ref => K::Ref,
        LogosToken::New => K::New,
        LogosToken::Delete => K::Delete,
        LogosToken::Asm => K::Asm,
        LogosToken::Pub => K::Pub,
        LogosToken::Priv => K::Priv,
        LogosToken::SelfKw => K::SelfKw,
        LogosToken::Super => K::Super,
        LogosToken::Comptime => K::Comptime,
        LogosToken::Assert => K::Assert,
        LogosToken::Require => K::Require,
        LogosToken::Ensure => K::Ensure,
        LogosToken::Invariant => K::Invariant,
        LogosToken::Where => K::Where,
        LogosToken::Scope => K::Scope,
        LogosToken::With => K::With,
        LogosToken::Export => K::Export,
        LogosToken::Inline => K::Inline,
        LogosToken::Noinline => K::Noinline,
        LogosToken::Packed => K::Packed,
        LogosToken::Align => K::Align,
        LogosToken::Repr => K::Repr,
        LogosToken::Hidden => K::Hidden,
        LogosToken::Weak => K::Weak,
        LogosToken::Cdecl => K::Cdecl,
        LogosToken::Stdcall => K::Stdcall,
        LogosToken::Fastcall => K::Fastcall,
        LogosToken::Naked => K::Naked,
        LogosToken::End => K::End,
        LogosToken::Then => K::Then,
        LogosToken::Do => K::Do,
        LogosToken::Underscore => K::Underscore,
        LogosToken::Identifier(name) => {
            return Token::with_str(K::Identifier, lexeme, span, name);
        }
        LogosToken::IntLiteral(v) => {
            return Token::with_int(K::Integer, lexeme, span, v);
        }
        LogosToken::FloatLiteral(v) => {
            return Token::with_float(K::Float, lexeme, span, v);
        }
        LogosToken::Spaceship => K::Spaceship,
        LogosToken::DotDotEq => K::DotDotEq,
        LogosToken::DotDot => K::DotDot,
        LogosToken::Dot => K::Dot,
        LogosToken::Arrow => K::Arrow,
        LogosToken::DoubleArrow => K::DoubleArrow,
        LogosToken::Eq => K::Eq,
        LogosToken::Ne => K::Ne,
        LogosToken::Le => K::Le,
        LogosToken::Ge => K::Ge,
        LogosToken::ChanSend => K::ChanSend,
        LogosToken::Lt => K::Lt,
        LogosToken::Gt => K::Gt,
        LogosToken::Assign => K::Assign,
        LogosToken::PlusAssign => K::PlusAssign,
        LogosToken::MinusAssign => K::MinusAssign,
        LogosToken::StarAssign => K::StarAssign,
        LogosToken::SlashAssign => K::SlashAssign,
        LogosToken::PercentAssign => K::PercentAssign,
        LogosToken::Plus => K::Plus,
        LogosToken::Minus => K::Minus,
        LogosToken::Star => K::Star,
        LogosToken::Slash => K::Slash,
        LogosToken::Percent => K::Percent,
        LogosToken::AmpAmp => K::AmpAmp,
        LogosToken::PipePipe => K::PipePipe,
        LogosToken::PipeGt => K::PipeGt,
        LogosToken::Amp => K::Amp,
        LogosToken::Pipe => K::Pipe,
        LogosToken::Caret => K::Caret,
        LogosToken::Tilde => K::Tilde,
        LogosToken::QuestionQuestion => K::QuestionQuestion,
        LogosToken::QuestionDot => K::QuestionDot,
        LogosToken::Question => K::Question,
        LogosToken::Bang => K::Bang,
        LogosToken::At => K::At,
        LogosToken::DoubleColon => K::DoubleColon,
        LogosToken::Walrus => K::Walrus,
        LogosToken::Colon => K::Colon,
        LogosToken::Comma => K::Comma,
        LogosToken::Semicolon => K::Semicolon,
        LogosToken::LParen => K::LParen,
        LogosToken::RParen => K::RParen,
        LogosToken::LBracket => K::LBracket,
        LogosToken::RBracket => K::RBracket,
        LogosToken::LBrace => K::LBrace,
        LogosToken::RBrace => K::RBrace,
    };
    Token::new(kind, lexeme, span)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lex(source: &str) -> Vec<Token> {
        Lexer::new(source, "test.tyl").tokenize().expect("lex ok")
    }

    fn kinds(source: &str) -> Vec<TokenKind> {
        lex(source).into_iter().map(|t| t.kind).collect()
    }

    #[test]
    fn lexes_keywords_and_identifiers() {
        let toks = lex("fn main");
        assert_eq!(toks[0].kind, TokenKind::Fn);
        assert_eq!(toks[1].kind, TokenKind::Identifier);
        assert_eq!(toks[1].literal.as_str(), Some("main"));
    }

    #[test]
    fn indent_dedent_balance() {
        let source = "fn main():\n    let x = 1\n    if x:\n        x\nlet y = 2\n";
        let toks = lex(source);
        let indents = toks.iter().filter(|t| t.kind == TokenKind::Indent).count();
        let dedents = toks.iter().filter(|t| t.kind == TokenKind::Dedent).count();
        assert_eq!(indents, dedents);
        assert_eq!(indents, 2);
    }

    #[test]
    fn dedents_flushed_at_eof() {
        let source = "fn main():\n    let x = 1";
        let toks = lex(source);
        let indents = toks.iter().filter(|t| t.kind == TokenKind::Indent).count();
        let dedents = toks.iter().filter(|t| t.kind == TokenKind::Dedent).count();
        assert_eq!(indents, dedents);
    }

    #[test]
    fn blank_and_comment_lines_ignore_indentation() {
        let source = "fn main():\n    let x = 1\n\n      // deeper comment\n    let y = 2\n";
        let toks = lex(source);
        let indents = toks.iter().filter(|t| t.kind == TokenKind::Indent).count();
        let dedents = toks.iter().filter(|t| t.kind == TokenKind::Dedent).count();
        assert_eq!(indents, 1);
        assert_eq!(indents, dedents);
    }

    #[test]
    fn inconsistent_indentation_reported() {
        let source = "fn main():\n        let x = 1\n    let y = 2\n";
        let errs = Lexer::new(source, "t.tyl").tokenize().unwrap_err();
        assert!(errs
            .iter()
            .any(|e| matches!(e, LexError::InconsistentIndentation { .. })));
    }

    #[test]
    fn numbers_with_suffixes() {
        let toks = lex("1 2i32 3.5 1e3 7f64");
        assert_eq!(toks[0].kind, TokenKind::Integer);
        assert_eq!(toks[1].kind, TokenKind::Integer);
        assert_eq!(toks[1].literal.as_int(), Some(2));
        assert_eq!(toks[2].kind, TokenKind::Float);
        assert_eq!(toks[3].kind, TokenKind::Float);
        assert_eq!(toks[3].literal.as_float(), Some(1000.0));
        // Float suffix on an integer forces FLOAT
        assert_eq!(toks[4].kind, TokenKind::Float);
        assert_eq!(toks[4].literal.as_float(), Some(7.0));
    }

    #[test]
    fn string_interpolation_encoding() {
        let toks = lex(r#""hello {name}!""#);
        assert_eq!(toks[0].kind, TokenKind::Str);
        let value = toks[0].literal.as_str().unwrap();
        assert_eq!(value, "hello \u{1}name\u{2}!");
    }

    #[test]
    fn escaped_brace_is_literal() {
        let toks = lex(r#""a \{b}""#);
        assert_eq!(toks[0].literal.as_str(), Some("a {b}"));
    }

    #[test]
    fn unterminated_string_is_error() {
        let errs = Lexer::new("\"abc", "t.tyl").tokenize().unwrap_err();
        assert!(errs
            .iter()
            .any(|e| matches!(e, LexError::UnterminatedString { .. })));
    }

    #[test]
    fn unterminated_interpolation_is_error() {
        let errs = Lexer::new("\"abc {x", "t.tyl").tokenize().unwrap_err();
        assert!(errs
            .iter()
            .any(|e| matches!(e, LexError::UnterminatedInterpolation { .. })));
    }

    #[test]
    fn char_literals() {
        let toks = lex(r"'A' '\n' '\x41' '\u{1F600}'");
        assert_eq!(toks[0].kind, TokenKind::Char);
        assert_eq!(toks[0].literal.as_int(), Some(65));
        assert_eq!(toks[1].literal.as_int(), Some(10));
        assert_eq!(toks[2].literal.as_int(), Some(0x41));
        assert_eq!(toks[3].literal.as_int(), Some(0x1F600));
    }

    #[test]
    fn lifetime_is_not_a_char() {
        let toks = lex("'a 'static");
        assert_eq!(toks[0].kind, TokenKind::Lifetime);
        assert_eq!(toks[0].literal.as_str(), Some("'a"));
        assert_eq!(toks[1].kind, TokenKind::Lifetime);
    }

    #[test]
    fn byte_strings() {
        let toks = lex(r#"b"ab\x00" br"\x00""#);
        assert_eq!(toks[0].kind, TokenKind::ByteString);
        assert_eq!(toks[0].literal.as_str(), Some("ab\0"));
        assert_eq!(toks[1].kind, TokenKind::RawByteString);
        assert_eq!(toks[1].literal.as_str(), Some("\\x00"));
    }

    #[test]
    fn custom_operator_runs() {
        let toks = lex("a ** b ++ c <=> d");
        let ops: Vec<_> = toks
            .iter()
            .filter(|t| t.kind == TokenKind::CustomOp || t.kind == TokenKind::Spaceship)
            .map(|t| t.lexeme.clone())
            .collect();
        assert_eq!(ops, vec!["**", "++", "<=>"]);
    }

    #[test]
    fn chan_send_and_ranges() {
        assert!(kinds("ch <- v").contains(&TokenKind::ChanSend));
        let k = kinds("1..5 1..=5");
        assert!(k.contains(&TokenKind::DotDot));
        assert!(k.contains(&TokenKind::DotDotEq));
    }

    #[test]
    fn attributes() {
        let toks = lex("@repr(C) @inline #[derive(Debug)]");
        assert_eq!(toks[0].kind, TokenKind::Attribute);
        assert_eq!(toks[0].literal.as_str(), Some("repr(C)"));
        assert_eq!(toks[1].kind, TokenKind::Attribute);
        assert_eq!(toks[1].literal.as_str(), Some("inline"));
        assert_eq!(toks[2].kind, TokenKind::Attribute);
        assert_eq!(toks[2].literal.as_str(), Some("derive(Debug)"));
    }

    #[test]
    fn newlines_coalesce() {
        let toks = lex("a\n\n\nb");
        let newlines = toks.iter().filter(|t| t.kind == TokenKind::Newline).count();
        assert_eq!(newlines, 1);
    }

    #[test]
    fn block_comment_spans_lines() {
        let toks = lex("a /// comment\nstill comment /// b");
        let idents: Vec<_> = toks
            .iter()
            .filter(|t| t.kind == TokenKind::Identifier)
            .map(|t| t.lexeme.clone())
            .collect();
        assert_eq!(idents, vec!["a", "b"]);
    }

    #[test]
    fn reserved_control_byte_rejected() {
        let source = "\"a\u{1}b\"";
        let errs = Lexer::new(source, "t.tyl").tokenize().unwrap_err();
        assert!(errs
            .iter()
            .any(|e| matches!(e, LexError::ReservedControlByte { .. })));
    }
}
