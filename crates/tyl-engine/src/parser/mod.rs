//! Front end: lexer, tokens, AST and the Pratt parser.
//!
//! # Example
//!
//! ```ignore
//! use tyl_engine::parser::{Lexer, Parser};
//!
//! let source = "fn main() -> int:\n    return 2 + 3 * 4\n";
//! let tokens = Lexer::new(source, "main.tyl").tokenize().unwrap();
//! let program = Parser::new(tokens, source, "main.tyl").parse().unwrap();
//! ```

pub mod ast;
pub mod lexer;
#[allow(clippy::module_inception)]
pub mod parser;
pub mod token;

// Re-exports for convenience
pub use lexer::{LexError, Lexer};
pub use parser::{ParseError, Parser, Precedence};
pub use token::{Literal, Span, Token, TokenKind};
