//! Type syntax parsing.
//!
//! Types are represented as canonical strings (`int`, `*T`, `&'a mut T`,
//! `[T; N]`, `fn(T1, T2) -> R`, `Box[T]`, `chan[T, N]`, trailing `?` for
//! nullable). The backend classifies variables by matching these shapes,
//! so the canonical form matters more than a structural representation.

use super::{ParseError, Parser};
use crate::parser::token::TokenKind;

/// Parse a type and return its canonical string form.
pub fn parse_type(parser: &mut Parser) -> Result<String, ParseError> {
    let mut ty = parse_base_type(parser)?;

    // Trailing `?` marks a nullable type
    if parser.check(TokenKind::Question) && !super::expr_follows_question(parser) {
        parser.advance();
        ty.push('?');
    }
    Ok(ty)
}

fn parse_base_type(parser: &mut Parser) -> Result<String, ParseError> {
    match parser.current_kind() {
        TokenKind::Star => {
            parser.advance();
            let inner = parse_base_type(parser)?;
            Ok(format!("*{}", inner))
        }
        TokenKind::Amp => {
            parser.advance();
            let mut parts = String::from("&");
            if parser.check(TokenKind::Lifetime) {
                let lt = parser.advance();
                parts.push_str(lt.literal.as_str().unwrap_or(&lt.lexeme));
                parts.push(' ');
            }
            if parser.eat(TokenKind::Mut) {
                parts.push_str("mut ");
            }
            let inner = parse_base_type(parser)?;
            parts.push_str(&inner);
            Ok(parts)
        }
        TokenKind::LBracket => {
            parser.advance();
            let elem = parse_type(parser)?;
            if parser.eat(TokenKind::Semicolon) {
                let size = match parser.current_kind() {
                    TokenKind::Integer => parser.advance().literal.as_int().unwrap_or(0).to_string(),
                    TokenKind::Identifier => parser.advance().lexeme,
                    _ => {
                        return Err(ParseError::ExpectedToken {
                            expected: "array size".to_string(),
                            found: parser.current().lexeme.clone(),
                            span: parser.current_span(),
                        })
                    }
                };
                parser.consume(TokenKind::RBracket, "']' after array size")?;
                Ok(format!("[{}; {}]", elem, size))
            } else {
                parser.consume(TokenKind::RBracket, "']' after element type")?;
                Ok(format!("[{}]", elem))
            }
        }
        TokenKind::Fn => {
            parser.advance();
            parser.consume(TokenKind::LParen, "'(' in function type")?;
            let mut params = Vec::new();
            if !parser.check(TokenKind::RParen) {
                loop {
                    params.push(parse_type(parser)?);
                    if !parser.eat(TokenKind::Comma) {
                        break;
                    }
                }
            }
            parser.consume(TokenKind::RParen, "')' in function type")?;
            let ret = if parser.eat(TokenKind::Arrow) {
                parse_type(parser)?
            } else {
                "()".to_string()
            };
            Ok(format!("fn({}) -> {}", params.join(", "), ret))
        }
        TokenKind::Chan => {
            parser.advance();
            parser.consume(TokenKind::LBracket, "'[' after 'chan'")?;
            let elem = parse_type(parser)?;
            let out = if parser.eat(TokenKind::Comma) {
                let cap = parser
                    .consume(TokenKind::Integer, "channel capacity")?
                    .literal
                    .as_int()
                    .unwrap_or(0);
                format!("chan[{}, {}]", elem, cap)
            } else {
                format!("chan[{}]", elem)
            };
            parser.consume(TokenKind::RBracket, "']' after channel type")?;
            Ok(out)
        }
        TokenKind::Mutex => parse_generic_keyword(parser, "Mutex"),
        TokenKind::RwLock => parse_generic_keyword(parser, "RWLock"),
        TokenKind::Cond => {
            parser.advance();
            Ok("Cond".to_string())
        }
        TokenKind::Semaphore => {
            parser.advance();
            Ok("Semaphore".to_string())
        }
        TokenKind::Atomic => parse_generic_keyword(parser, "Atomic"),
        TokenKind::Box => parse_generic_keyword(parser, "Box"),
        TokenKind::Rc => parse_generic_keyword(parser, "Rc"),
        TokenKind::Arc => parse_generic_keyword(parser, "Arc"),
        TokenKind::WeakPtr => parse_generic_keyword(parser, "Weak"),
        TokenKind::Cell => parse_generic_keyword(parser, "Cell"),
        TokenKind::RefCell => parse_generic_keyword(parser, "RefCell"),
        TokenKind::SelfKw => {
            parser.advance();
            Ok("Self".to_string())
        }
        TokenKind::LParen => {
            // `()` unit type
            parser.advance();
            parser.consume(TokenKind::RParen, "')' in unit type")?;
            Ok("()".to_string())
        }
        TokenKind::Identifier => {
            let name = parser.advance().lexeme;
            // Generic arguments: `Name[T1, T2]`
            if parser.check(TokenKind::LBracket) {
                parser.advance();
                let mut args = Vec::new();
                loop {
                    // Integer size parameters are allowed in generic slots
                    if parser.check(TokenKind::Integer) {
                        args.push(parser.advance().literal.as_int().unwrap_or(0).to_string());
                    } else {
                        args.push(parse_type(parser)?);
                    }
                    if !parser.eat(TokenKind::Comma) {
                        break;
                    }
                }
                parser.consume(TokenKind::RBracket, "']' after type arguments")?;
                Ok(format!("{}[{}]", name, args.join(", ")))
            } else {
                Ok(name)
            }
        }
        _ => Err(ParseError::ExpectedToken {
            expected: "a type".to_string(),
            found: parser.current().lexeme.clone(),
            span: parser.current_span(),
        }),
    }
}

fn parse_generic_keyword(parser: &mut Parser, name: &str) -> Result<String, ParseError> {
    parser.advance();
    if parser.eat(TokenKind::LBracket) {
        let inner = parse_type(parser)?;
        parser.consume(TokenKind::RBracket, "']' after type argument")?;
        Ok(format!("{}[{}]", name, inner))
    } else {
        Ok(name.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> String {
        let tokens = crate::parser::lexer::Lexer::new(source, "t.tyl")
            .tokenize()
            .expect("lex ok");
        let mut parser = Parser::new(tokens, source, "t.tyl");
        parse_type(&mut parser).expect("type ok")
    }

    #[test]
    fn primitive_and_pointer_types() {
        assert_eq!(parse("int"), "int");
        assert_eq!(parse("*int"), "*int");
        assert_eq!(parse("**byte"), "**byte");
    }

    #[test]
    fn reference_types() {
        assert_eq!(parse("&int"), "&int");
        assert_eq!(parse("&mut int"), "&mut int");
        assert_eq!(parse("&'a mut T"), "&'a mut T");
    }

    #[test]
    fn array_types() {
        assert_eq!(parse("[int]"), "[int]");
        assert_eq!(parse("[int; 4]"), "[int; 4]");
        assert_eq!(parse("[float; SIZE]"), "[float; SIZE]");
        assert_eq!(parse("[[int; 3]; 3]"), "[[int; 3]; 3]");
    }

    #[test]
    fn function_types() {
        assert_eq!(parse("fn(int, int) -> int"), "fn(int, int) -> int");
        assert_eq!(parse("*fn(int) -> int"), "*fn(int) -> int");
        assert_eq!(parse("fn()"), "fn() -> ()");
    }

    #[test]
    fn smart_pointer_and_sync_types() {
        assert_eq!(parse("Box[int]"), "Box[int]");
        assert_eq!(parse("Arc[str]"), "Arc[str]");
        assert_eq!(parse("Atomic[int]"), "Atomic[int]");
        assert_eq!(parse("Mutex[int]"), "Mutex[int]");
        assert_eq!(parse("chan[int]"), "chan[int]");
        assert_eq!(parse("chan[int, 16]"), "chan[int, 16]");
    }

    #[test]
    fn generic_and_nullable_types() {
        assert_eq!(parse("Map[str, int]"), "Map[str, int]");
        assert_eq!(parse("List[T]"), "List[T]");
        assert_eq!(parse("str?"), "str?");
    }
}
