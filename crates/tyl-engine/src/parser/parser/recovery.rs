//! Error recovery strategies for the parser.
//!
//! After a parse error the parser skips tokens until a point where
//! statement parsing can resume, so several errors are reported per run.

use super::Parser;
use crate::parser::token::TokenKind;

/// Synchronize to the next statement boundary: a NEWLINE, a DEDENT, or a
/// token that starts a declaration.
pub fn sync_to_statement_boundary(parser: &mut Parser) {
    let mut steps = 0usize;
    while !parser.at_eof() {
        // Emergency stop if recovery itself fails to make progress
        steps += 1;
        if steps > 10_000 {
            return;
        }

        let kind = parser.current_kind();
        if kind.starts_declaration() {
            return;
        }
        match kind {
            TokenKind::Newline | TokenKind::Semicolon => {
                parser.advance();
                return;
            }
            TokenKind::Dedent => {
                parser.advance();
                return;
            }
            TokenKind::If
            | TokenKind::While
            | TokenKind::For
            | TokenKind::Loop
            | TokenKind::Match
            | TokenKind::Return
            | TokenKind::Break
            | TokenKind::Continue => return,
            _ => {
                parser.advance();
            }
        }
    }
}

/// Synchronize to the next expression boundary (argument lists, index
/// brackets, record fields).
pub fn sync_to_expression_boundary(parser: &mut Parser) {
    let mut steps = 0usize;
    while !parser.at_eof() {
        steps += 1;
        if steps > 10_000 {
            return;
        }
        match parser.current_kind() {
            TokenKind::Newline
            | TokenKind::Comma
            | TokenKind::Semicolon
            | TokenKind::RParen
            | TokenKind::RBrace
            | TokenKind::RBracket => return,
            _ => {
                parser.advance();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn syncs_to_declaration_keyword() {
        let source = "$ @ fn main():\n    return 0\n";
        let tokens = crate::parser::lexer::Lexer::new("junk tokens fn main", "t.tyl")
            .tokenize()
            .unwrap();
        let _ = source;
        let mut parser = Parser::new(tokens, "", "t.tyl");
        parser.advance();
        sync_to_statement_boundary(&mut parser);
        assert_eq!(parser.current_kind(), TokenKind::Fn);
    }
}
