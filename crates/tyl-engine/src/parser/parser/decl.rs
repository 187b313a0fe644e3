//! Declaration parsing: functions, records, enums, traits, impls,
//! concepts, effects, imports, extern blocks, macros, syntax macros and
//! layers, plus `@attribute` application (`@cfg`, `@derive`, `@repr`,
//! calling conventions, linkage flags).

use super::expr::parse_expression;
use super::types::parse_type;
use super::{parse_block, ParseError, Parser};
use crate::parser::ast::*;
use crate::parser::token::{Span, TokenKind};

/// A parsed `@name(args)` attribute.
#[derive(Debug, Clone)]
struct AttrSpec {
    name: String,
    args: Vec<String>,
    span: Span,
}

fn parse_attr_content(content: &str, span: Span) -> AttrSpec {
    match content.find('(') {
        Some(open) => {
            let name = content[..open].trim().to_string();
            let inner = content[open + 1..].trim_end_matches(')');
            let args = inner
                .split(',')
                .map(|a| a.trim().to_string())
                .filter(|a| !a.is_empty())
                .collect();
            AttrSpec { name, args, span }
        }
        None => AttrSpec {
            name: content.trim().to_string(),
            args: Vec::new(),
            span,
        },
    }
}

/// Evaluate a `@cfg(...)` condition against the fixed compilation target
/// (Windows x86-64, release).
fn cfg_condition_holds(args: &[String]) -> bool {
    args.iter().all(|arg| match arg.as_str() {
        "windows" => true,
        "linux" | "macos" | "unix" => false,
        "x86_64" => true,
        "x86" => false,
        "release" => true,
        "debug" => false,
        _ => false,
    })
}

/// Entry point for statements that begin with attribute tokens.
pub fn parse_attributed_declaration(parser: &mut Parser) -> Result<Statement, ParseError> {
    let mut attrs = Vec::new();
    while parser.check(TokenKind::Attribute) {
        let token = parser.advance();
        let content = token.literal.as_str().unwrap_or(&token.lexeme).to_string();
        attrs.push(parse_attr_content(&content, token.span));
        parser.skip_newlines();
    }

    // A false @cfg consumes the following declaration entirely
    let cfg_enabled = attrs
        .iter()
        .filter(|a| a.name == "cfg")
        .all(|a| cfg_condition_holds(&a.args));

    let decl = super::stmt::parse_statement(parser)?;
    if !cfg_enabled {
        let span = decl.span();
        return Ok(Statement::Block(BlockStmt {
            statements: Vec::new(),
            span,
        }));
    }

    Ok(apply_attributes(decl, &attrs))
}

fn apply_attributes(mut decl: Statement, attrs: &[AttrSpec]) -> Statement {
    for attr in attrs {
        match &mut decl {
            Statement::Fn(f) => match attr.name.as_str() {
                "naked" => f.flags.naked = true,
                "comptime" => f.flags.comptime = true,
                "export" => f.flags.export = true,
                "hidden" => f.flags.hidden = true,
                "weak" => f.flags.weak = true,
                "inline" => f.flags.inline_hint = Some(true),
                "noinline" => f.flags.inline_hint = Some(false),
                "cdecl" => f.calling_conv = CallingConv::Cdecl,
                "stdcall" => f.calling_conv = CallingConv::Stdcall,
                "fastcall" => f.calling_conv = CallingConv::Fastcall,
                "win64" => f.calling_conv = CallingConv::Win64,
                _ => {}
            },
            Statement::Record(r) => match attr.name.as_str() {
                "derive" => r.derives.extend(attr.args.iter().cloned()),
                "repr" => {
                    r.repr = match attr.args.first().map(|s| s.as_str()) {
                        Some("C") => ReprKind::C,
                        Some("packed") => ReprKind::Packed,
                        Some(other) => other
                            .strip_prefix("align(")
                            .and_then(|a| a.trim_end_matches(')').parse().ok())
                            .map(ReprKind::Align)
                            .unwrap_or(ReprKind::Default),
                        None => ReprKind::Default,
                    }
                }
                _ => {}
            },
            Statement::Enum(e) => {
                if attr.name == "derive" {
                    e.derives.extend(attr.args.iter().cloned());
                }
            }
            _ => {}
        }
    }
    decl
}

/// Dispatch for statements that begin with a declaration keyword.
pub fn parse_declaration(parser: &mut Parser) -> Result<Statement, ParseError> {
    let is_public = parser.eat(TokenKind::Pub);
    let statement = match parser.current_kind() {
        TokenKind::Async => {
            parser.advance();
            let mut decl = parse_fn(parser, is_public)?;
            if let Statement::Fn(f) = &mut decl {
                f.flags.is_async = true;
            }
            decl
        }
        TokenKind::Fn => parse_fn(parser, is_public)?,
        TokenKind::Record => parse_record(parser, is_public)?,
        TokenKind::Union => parse_union(parser)?,
        TokenKind::Enum => parse_enum(parser, is_public)?,
        TokenKind::Type => parse_type_alias(parser)?,
        TokenKind::Trait => parse_trait(parser)?,
        TokenKind::Impl => parse_impl(parser)?,
        TokenKind::Concept => parse_concept(parser)?,
        TokenKind::Effect => parse_effect(parser)?,
        TokenKind::Use | TokenKind::Import => parse_use(parser)?,
        TokenKind::Module => parse_module(parser)?,
        TokenKind::Extern => parse_extern_block(parser)?,
        TokenKind::Macro => parse_macro(parser)?,
        TokenKind::Syntax => parse_syntax_macro(parser)?,
        TokenKind::Layer => parse_layer(parser)?,
        _ => {
            return Err(ParseError::UnexpectedToken {
                found: parser.current().lexeme.clone(),
                span: parser.current_span(),
            })
        }
    };
    parser.eat(TokenKind::Newline);
    Ok(statement)
}

fn parse_generic_params(parser: &mut Parser) -> Result<Vec<GenericParam>, ParseError> {
    let mut generics = Vec::new();
    if !parser.eat(TokenKind::LBracket) {
        return Ok(generics);
    }
    loop {
        match parser.current_kind() {
            TokenKind::Lifetime => {
                let token = parser.advance();
                let name = token
                    .literal
                    .as_str()
                    .unwrap_or(&token.lexeme)
                    .to_string();
                generics.push(GenericParam::Lifetime(name));
            }
            TokenKind::Identifier => {
                let name = parser.advance().lexeme;
                // Higher-kinded: `F[_]`
                if parser.check(TokenKind::LBracket)
                    && parser.peek_at(1).kind == TokenKind::Underscore
                    && parser.peek_at(2).kind == TokenKind::RBracket
                {
                    parser.advance();
                    parser.advance();
                    parser.advance();
                    generics.push(GenericParam::HigherKinded { name });
                } else if parser.eat(TokenKind::Colon) {
                    // Constrained: `T: Concept + Other`
                    let mut bounds = vec![parser.consume_identifier("constraint name")?];
                    while parser.eat(TokenKind::Plus) {
                        bounds.push(parser.consume_identifier("constraint name")?);
                    }
                    generics.push(GenericParam::Type { name, bounds });
                } else {
                    generics.push(GenericParam::Type {
                        name,
                        bounds: Vec::new(),
                    });
                }
            }
            _ => {
                return Err(ParseError::ExpectedToken {
                    expected: "generic parameter".to_string(),
                    found: parser.current().lexeme.clone(),
                    span: parser.current_span(),
                })
            }
        }
        if !parser.eat(TokenKind::Comma) {
            break;
        }
    }
    parser.consume(TokenKind::RBracket, "']' after generic parameters")?;
    Ok(generics)
}

fn parse_params(parser: &mut Parser) -> Result<Vec<Param>, ParseError> {
    parser.consume(TokenKind::LParen, "'(' before parameters")?;
    let mut params = Vec::new();
    if !parser.check(TokenKind::RParen) {
        loop {
            let span = parser.current_span();
            let name = if parser.check(TokenKind::SelfKw) {
                parser.advance();
                "self".to_string()
            } else {
                parser.consume_identifier("parameter name")?
            };
            let ty = if parser.eat(TokenKind::Colon) {
                parse_type(parser)?
            } else {
                String::new()
            };
            let mut param = Param::new(name, ty, span);
            if parser.eat(TokenKind::Assign) {
                param.default = Some(parse_expression(parser)?);
            }
            params.push(param);
            if !parser.eat(TokenKind::Comma) {
                break;
            }
        }
    }
    parser.consume(TokenKind::RParen, "')' after parameters")?;
    Ok(params)
}

pub(crate) fn parse_fn(parser: &mut Parser, is_public: bool) -> Result<Statement, ParseError> {
    let span = parser.current_span();
    parser.consume(TokenKind::Fn, "'fn'")?;
    let name = parser.consume_identifier("function name")?;
    let generics = parse_generic_params(parser)?;
    let params = parse_params(parser)?;

    let return_type = if parser.eat(TokenKind::Arrow) {
        parse_type(parser)?
    } else {
        String::new()
    };

    // Body forms: `:` block, `{ ... }`, `=> expr`, `= expr`, or none
    // (trait signatures / extern declarations).
    let body = match parser.current_kind() {
        TokenKind::Colon | TokenKind::LBrace | TokenKind::Then | TokenKind::Do => {
            Some(parse_block(parser)?)
        }
        TokenKind::DoubleArrow | TokenKind::Assign => {
            parser.advance();
            let value = parse_expression(parser)?;
            let value_span = value.span();
            Some(vec![Statement::Return(ReturnStmt {
                value: Some(value),
                span: value_span,
            })])
        }
        TokenKind::Newline | TokenKind::Eof | TokenKind::Dedent => None,
        _ => {
            return Err(ParseError::ExpectedFunctionBody {
                span: parser.current_span(),
            })
        }
    };

    Ok(Statement::Fn(FnDecl {
        name,
        generics,
        params,
        return_type,
        body,
        flags: FnFlags::default(),
        calling_conv: CallingConv::Default,
        is_public,
        derive_source: None,
        span,
    }))
}

fn parse_record(parser: &mut Parser, is_public: bool) -> Result<Statement, ParseError> {
    let span = parser.current_span();
    parser.advance(); // record
    let name = parser.consume_identifier("record name")?;
    let generics = parse_generic_params(parser)?;

    let mut fields = Vec::new();
    let style = super::open_block(parser)?;
    loop {
        parser.skip_newlines();
        if super::block_finished(parser, style, false) {
            break;
        }
        let field_span = parser.current_span();
        let field_name = parser.consume_identifier("field name")?;
        parser.consume(TokenKind::Colon, "':' after field name")?;
        let type_name = parse_type(parser)?;
        let default = if parser.eat(TokenKind::Assign) {
            Some(parse_expression(parser)?)
        } else {
            None
        };
        fields.push(RecordField {
            name: field_name,
            type_name,
            default,
            span: field_span,
        });
        parser.eat(TokenKind::Comma);
    }
    super::close_block(parser, style, true)?;

    Ok(Statement::Record(RecordDecl {
        name,
        generics,
        fields,
        derives: Vec::new(),
        repr: ReprKind::Default,
        is_public,
        span,
    }))
}

fn parse_union(parser: &mut Parser) -> Result<Statement, ParseError> {
    let span = parser.current_span();
    parser.advance(); // union
    let name = parser.consume_identifier("union name")?;

    let mut fields = Vec::new();
    let style = super::open_block(parser)?;
    loop {
        parser.skip_newlines();
        if super::block_finished(parser, style, false) {
            break;
        }
        let field_span = parser.current_span();
        let field_name = parser.consume_identifier("field name")?;
        parser.consume(TokenKind::Colon, "':' after field name")?;
        let type_name = parse_type(parser)?;
        fields.push(RecordField {
            name: field_name,
            type_name,
            default: None,
            span: field_span,
        });
        parser.eat(TokenKind::Comma);
    }
    super::close_block(parser, style, true)?;

    Ok(Statement::Union(UnionDecl { name, fields, span }))
}

fn parse_enum(parser: &mut Parser, is_public: bool) -> Result<Statement, ParseError> {
    let span = parser.current_span();
    parser.advance(); // enum
    let name = parser.consume_identifier("enum name")?;

    let mut variants = Vec::new();
    let style = super::open_block(parser)?;
    loop {
        parser.skip_newlines();
        if super::block_finished(parser, style, false) {
            break;
        }
        let variant_span = parser.current_span();
        let variant_name = parser.consume_identifier("variant name")?;
        let discriminant = if parser.eat(TokenKind::Assign) {
            let negative = parser.eat(TokenKind::Minus);
            let value = parser
                .consume(TokenKind::Integer, "integer discriminant")?
                .literal
                .as_int()
                .unwrap_or(0);
            Some(if negative { -value } else { value })
        } else {
            None
        };
        variants.push(EnumVariant {
            name: variant_name,
            discriminant,
            span: variant_span,
        });
        parser.eat(TokenKind::Comma);
    }
    super::close_block(parser, style, true)?;

    Ok(Statement::Enum(EnumDecl {
        name,
        variants,
        derives: Vec::new(),
        is_public,
        span,
    }))
}

fn parse_type_alias(parser: &mut Parser) -> Result<Statement, ParseError> {
    let span = parser.current_span();
    parser.advance(); // type
    let name = parser.consume_identifier("type alias name")?;
    parser.consume(TokenKind::Assign, "'=' after type alias name")?;
    let target = parse_type(parser)?;

    // Refinement: `type Positive = int where _ > 0`
    let constraint = if parser.eat(TokenKind::Where) {
        let saved = parser.in_constraint;
        parser.in_constraint = true;
        let expr = parse_expression(parser);
        parser.in_constraint = saved;
        Some(expr?)
    } else {
        None
    };

    Ok(Statement::TypeAlias(TypeAliasDecl {
        name,
        target,
        constraint,
        span,
    }))
}

fn parse_trait(parser: &mut Parser) -> Result<Statement, ParseError> {
    let span = parser.current_span();
    parser.advance(); // trait
    let name = parser.consume_identifier("trait name")?;
    let generics = parse_generic_params(parser)?;

    // `trait Foo: Bar, Baz:` — a colon followed by an identifier lists
    // super-traits; a bare colon opens the body.
    let mut super_traits = Vec::new();
    let mark = parser.mark();
    if parser.eat(TokenKind::Colon) && parser.check(TokenKind::Identifier) {
        loop {
            super_traits.push(parser.consume_identifier("super trait name")?);
            if !parser.eat(TokenKind::Comma) {
                break;
            }
        }
    } else {
        parser.rewind(mark);
    }

    let methods = parse_fn_body_block(parser)?;
    Ok(Statement::Trait(TraitDecl {
        name,
        generics,
        super_traits,
        methods,
        span,
    }))
}

fn parse_impl(parser: &mut Parser) -> Result<Statement, ParseError> {
    let span = parser.current_span();
    parser.advance(); // impl
    let first = parser.consume_identifier("trait or type name")?;

    let (trait_name, type_name) = if parser.eat(TokenKind::For) {
        let type_name = parser.consume_identifier("type name")?;
        (Some(first), type_name)
    } else {
        (None, first)
    };
    let _generics = parse_generic_params(parser)?;

    let methods = parse_fn_body_block(parser)?;
    Ok(Statement::Impl(ImplDecl {
        trait_name,
        type_name,
        methods,
        span,
    }))
}

/// A block containing only `fn` declarations (trait/impl/concept bodies).
fn parse_fn_body_block(parser: &mut Parser) -> Result<Vec<FnDecl>, ParseError> {
    let style = super::open_block(parser)?;
    let mut methods = Vec::new();
    loop {
        parser.skip_newlines();
        if super::block_finished(parser, style, false) {
            break;
        }
        match parse_fn(parser, false)? {
            Statement::Fn(f) => methods.push(f),
            _ => unreachable!("parse_fn returns Statement::Fn"),
        }
        parser.eat(TokenKind::Newline);
    }
    super::close_block(parser, style, true)?;
    Ok(methods)
}

fn parse_concept(parser: &mut Parser) -> Result<Statement, ParseError> {
    let span = parser.current_span();
    parser.advance(); // concept
    let name = parser.consume_identifier("concept name")?;
    let generics = parse_generic_params(parser)?;
    let requirements = parse_fn_body_block(parser)?;
    Ok(Statement::Concept(ConceptDecl {
        name,
        generics,
        requirements,
        span,
    }))
}

fn parse_effect(parser: &mut Parser) -> Result<Statement, ParseError> {
    let span = parser.current_span();
    parser.advance(); // effect
    let name = parser.consume_identifier("effect name")?;

    let style = super::open_block(parser)?;
    let mut operations = Vec::new();
    loop {
        parser.skip_newlines();
        if super::block_finished(parser, style, false) {
            break;
        }
        let op_span = parser.current_span();
        parser.consume(TokenKind::Fn, "'fn' in effect body")?;
        let op_name = parser.consume_identifier("operation name")?;
        let params = parse_params(parser)?;
        let return_type = if parser.eat(TokenKind::Arrow) {
            parse_type(parser)?
        } else {
            String::new()
        };
        operations.push(EffectOperation {
            name: op_name,
            params,
            return_type,
            span: op_span,
        });
        parser.eat(TokenKind::Newline);
    }
    super::close_block(parser, style, true)?;

    Ok(Statement::Effect(EffectDecl {
        name,
        operations,
        span,
    }))
}

fn parse_use(parser: &mut Parser) -> Result<Statement, ParseError> {
    let span = parser.current_span();
    parser.advance(); // use / import

    // `use layer "name"`
    if parser.eat(TokenKind::Layer) {
        let token = parser.consume(TokenKind::Str, "layer name string")?;
        let path = token.literal.as_str().unwrap_or_default().to_string();
        return Ok(Statement::Use(UseDecl {
            path,
            alias: None,
            items: Vec::new(),
            glob: false,
            is_file_import: false,
            is_layer: true,
            span,
        }));
    }

    // `use "file.tyl" [as x]`
    if parser.check(TokenKind::Str) {
        let token = parser.advance();
        let path = token.literal.as_str().unwrap_or_default().to_string();
        let alias = parse_use_alias(parser)?;
        return Ok(Statement::Use(UseDecl {
            path,
            alias,
            items: Vec::new(),
            glob: false,
            is_file_import: true,
            is_layer: false,
            span,
        }));
    }

    // `use a::b::{c, d}` / `use a::b::*` / `use a::b [as x]`
    let mut path = parser.consume_identifier("module path")?;
    let mut items = Vec::new();
    let mut glob = false;
    while parser.eat(TokenKind::DoubleColon) {
        if parser.eat(TokenKind::Star) {
            glob = true;
            break;
        }
        if parser.eat(TokenKind::LBrace) {
            loop {
                items.push(parser.consume_identifier("imported item")?);
                if !parser.eat(TokenKind::Comma) {
                    break;
                }
            }
            parser.consume(TokenKind::RBrace, "'}' after import list")?;
            break;
        }
        path.push_str("::");
        path.push_str(&parser.consume_identifier("module path segment")?);
    }
    let alias = parse_use_alias(parser)?;

    Ok(Statement::Use(UseDecl {
        path,
        alias,
        items,
        glob,
        is_file_import: false,
        is_layer: false,
        span,
    }))
}

fn parse_use_alias(parser: &mut Parser) -> Result<Option<String>, ParseError> {
    if parser.check(TokenKind::Identifier) && parser.current().lexeme == "as" {
        parser.advance();
        Ok(Some(parser.consume_identifier("import alias")?))
    } else {
        Ok(None)
    }
}

fn parse_module(parser: &mut Parser) -> Result<Statement, ParseError> {
    let span = parser.current_span();
    parser.advance(); // module
    let name = parser.consume_identifier("module name")?;
    let body = if matches!(
        parser.current_kind(),
        TokenKind::Colon | TokenKind::LBrace | TokenKind::Then | TokenKind::Do
    ) {
        parse_block(parser)?
    } else {
        Vec::new()
    };
    Ok(Statement::Module(ModuleDecl { name, body, span }))
}

fn parse_extern_block(parser: &mut Parser) -> Result<Statement, ParseError> {
    let span = parser.current_span();
    parser.advance(); // extern
    let abi = if parser.check(TokenKind::Str) {
        parser
            .advance()
            .literal
            .as_str()
            .unwrap_or("C")
            .to_string()
    } else {
        "C".to_string()
    };

    // Optional `from "library.dll"`
    let library = if parser.eat(TokenKind::From) {
        let token = parser.consume(TokenKind::Str, "library name string")?;
        Some(token.literal.as_str().unwrap_or_default().to_string())
    } else {
        None
    };

    let style = super::open_block(parser)?;
    let mut functions = Vec::new();
    loop {
        parser.skip_newlines();
        if super::block_finished(parser, style, false) {
            break;
        }
        match parse_fn(parser, false)? {
            Statement::Fn(mut f) => {
                f.flags.is_extern = true;
                functions.push(f);
            }
            _ => unreachable!(),
        }
        parser.eat(TokenKind::Newline);
    }
    super::close_block(parser, style, true)?;

    Ok(Statement::ExternBlock(ExternBlockDecl {
        abi,
        library,
        functions,
        span,
    }))
}

fn parse_macro(parser: &mut Parser) -> Result<Statement, ParseError> {
    let span = parser.current_span();
    parser.advance(); // macro

    // `macro infix "op" prec => function`
    if parser.check(TokenKind::Identifier) && parser.current().lexeme == "infix" {
        parser.advance();
        let op_token = parser.consume(TokenKind::Str, "operator string")?;
        let op = op_token.literal.as_str().unwrap_or_default().to_string();
        let precedence = parser
            .consume(TokenKind::Integer, "operator precedence")?
            .literal
            .as_int()
            .unwrap_or(5) as u8;
        parser.consume(TokenKind::DoubleArrow, "'=>' after precedence")?;
        let function = parser.consume_identifier("operator function name")?;
        return Ok(Statement::InfixMacro(InfixMacroDecl {
            op,
            precedence,
            function,
            span,
        }));
    }

    let name = parser.consume_identifier("macro name")?;
    let mut params = Vec::new();
    if parser.eat(TokenKind::LParen) {
        if !parser.check(TokenKind::RParen) {
            loop {
                params.push(parser.consume_identifier("macro parameter")?);
                if !parser.eat(TokenKind::Comma) {
                    break;
                }
            }
        }
        parser.consume(TokenKind::RParen, "')' after macro parameters")?;
    }
    let body = parse_block(parser)?;
    Ok(Statement::Macro(MacroDecl {
        name,
        params,
        body,
        span,
    }))
}

fn parse_syntax_macro(parser: &mut Parser) -> Result<Statement, ParseError> {
    let span = parser.current_span();
    parser.advance(); // syntax
    let name = parser.consume_identifier("syntax macro name")?;
    let transformer = if parser.eat(TokenKind::DoubleArrow) {
        Some(parser.consume_identifier("transformer function name")?)
    } else {
        None
    };
    Ok(Statement::SyntaxMacro(SyntaxMacroDecl {
        name,
        transformer,
        span,
    }))
}

fn parse_layer(parser: &mut Parser) -> Result<Statement, ParseError> {
    let span = parser.current_span();
    parser.advance(); // layer
    let name = parser.consume_identifier("layer name")?;
    let body = parse_block(parser)?;
    Ok(Statement::Layer(LayerDecl { name, body, span }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> Program {
        Parser::parse_source(source, "t.tyl").expect("parse ok")
    }

    #[test]
    fn fn_forms() {
        let program = parse("fn a() -> int:\n    return 1\nfn b() => 2\nfn c() = 3\n");
        assert_eq!(program.statements.len(), 3);
        for statement in &program.statements {
            assert!(matches!(statement, Statement::Fn(f) if f.body.is_some()));
        }
    }

    #[test]
    fn fn_with_generics_and_defaults() {
        let program = parse("fn map[T, 'a, F[_]](x: T, n: int = 10) -> T:\n    return x\n");
        if let Statement::Fn(f) = &program.statements[0] {
            assert_eq!(f.generics.len(), 3);
            assert!(matches!(f.generics[1], GenericParam::Lifetime(_)));
            assert!(matches!(f.generics[2], GenericParam::HigherKinded { .. }));
            assert!(f.params[1].default.is_some());
        } else {
            panic!("expected fn");
        }
    }

    #[test]
    fn constrained_generics() {
        let program = parse("fn sum[T: Numeric + Copy](xs: [T]) -> T:\n    return xs[0]\n");
        if let Statement::Fn(f) = &program.statements[0] {
            assert!(matches!(
                &f.generics[0],
                GenericParam::Type { bounds, .. } if bounds.len() == 2
            ));
        } else {
            panic!("expected fn");
        }
    }

    #[test]
    fn record_with_derive_and_repr() {
        let program = parse("@derive(Debug, Clone)\n@repr(C)\nrecord Point:\n    x: int\n    y: int\n");
        if let Statement::Record(r) = &program.statements[0] {
            assert_eq!(r.derives, vec!["Debug", "Clone"]);
            assert_eq!(r.repr, ReprKind::C);
            assert_eq!(r.fields.len(), 2);
        } else {
            panic!("expected record, got {:?}", program.statements[0]);
        }
    }

    #[test]
    fn cfg_false_skips_declaration() {
        let program = parse("@cfg(linux)\nfn only_linux():\n    return\nfn kept():\n    return\n");
        // The skipped declaration collapses into an empty block
        assert!(matches!(
            &program.statements[0],
            Statement::Block(b) if b.statements.is_empty()
        ));
        assert!(matches!(&program.statements[1], Statement::Fn(f) if f.name == "kept"));
    }

    #[test]
    fn cfg_true_keeps_declaration() {
        let program = parse("@cfg(windows)\nfn win():\n    return\n");
        assert!(matches!(&program.statements[0], Statement::Fn(f) if f.name == "win"));
    }

    #[test]
    fn enum_with_discriminants() {
        let program = parse("enum Color:\n    Red = 1\n    Green\n    Blue = 4\n");
        if let Statement::Enum(e) = &program.statements[0] {
            assert_eq!(e.variants.len(), 3);
            assert_eq!(e.variants[0].discriminant, Some(1));
            assert_eq!(e.variants[1].discriminant, None);
        } else {
            panic!("expected enum");
        }
    }

    #[test]
    fn refinement_type_alias() {
        let program = parse("type Positive = int where _ > 0\n");
        if let Statement::TypeAlias(alias) = &program.statements[0] {
            assert_eq!(alias.name, "Positive");
            assert_eq!(alias.target, "int");
            assert!(alias.constraint.is_some());
            // The placeholder must not be lifted into a lambda here
            assert!(matches!(
                alias.constraint.as_ref().unwrap(),
                Expression::Binary(_)
            ));
        } else {
            panic!("expected type alias");
        }
    }

    #[test]
    fn trait_with_super_traits() {
        let program = parse("trait Ord: Eq, PartialOrd:\n    fn cmp(self, other: Self) -> int\n");
        if let Statement::Trait(t) = &program.statements[0] {
            assert_eq!(t.super_traits, vec!["Eq", "PartialOrd"]);
            assert_eq!(t.methods.len(), 1);
            assert!(t.methods[0].body.is_none());
        } else {
            panic!("expected trait");
        }
    }

    #[test]
    fn impl_for_type() {
        let program = parse("impl Drop for File:\n    fn drop(self):\n        close(self)\n");
        if let Statement::Impl(i) = &program.statements[0] {
            assert_eq!(i.trait_name.as_deref(), Some("Drop"));
            assert_eq!(i.type_name, "File");
            assert_eq!(i.methods.len(), 1);
        } else {
            panic!("expected impl");
        }
    }

    #[test]
    fn effect_declaration() {
        let program = parse("effect IO:\n    fn read() -> str\n    fn write(s: str)\n");
        if let Statement::Effect(e) = &program.statements[0] {
            assert_eq!(e.operations.len(), 2);
        } else {
            panic!("expected effect");
        }
    }

    #[test]
    fn use_forms() {
        let program = parse("use \"util.tyl\"\nuse math::calculus\nuse pkg::mod::{a, b}\nuse pkg::*\nuse layer \"tracing\"\n");
        assert!(matches!(
            &program.statements[0],
            Statement::Use(u) if u.is_file_import && u.path == "util.tyl"
        ));
        assert!(matches!(
            &program.statements[1],
            Statement::Use(u) if u.path == "math::calculus"
        ));
        assert!(matches!(
            &program.statements[2],
            Statement::Use(u) if u.items.len() == 2
        ));
        assert!(matches!(&program.statements[3], Statement::Use(u) if u.glob));
        assert!(matches!(&program.statements[4], Statement::Use(u) if u.is_layer));
    }

    #[test]
    fn extern_block() {
        let program =
            parse("extern \"C\" from \"kernel32.dll\":\n    fn ExitProcess(code: int)\n");
        if let Statement::ExternBlock(b) = &program.statements[0] {
            assert_eq!(b.abi, "C");
            assert_eq!(b.library.as_deref(), Some("kernel32.dll"));
            assert!(b.functions[0].flags.is_extern);
        } else {
            panic!("expected extern block");
        }
    }

    #[test]
    fn macro_declarations() {
        let program = parse(
            "macro square(x):\n    return $x * $x\nmacro infix \"<+>\" 6 => vec_add\nsyntax sql => run_sql\n",
        );
        assert!(matches!(&program.statements[0], Statement::Macro(m) if m.params.len() == 1));
        assert!(matches!(
            &program.statements[1],
            Statement::InfixMacro(m) if m.op == "<+>" && m.precedence == 6
        ));
        assert!(matches!(
            &program.statements[2],
            Statement::SyntaxMacro(s) if s.transformer.as_deref() == Some("run_sql")
        ));
    }

    #[test]
    fn calling_convention_attribute() {
        let program = parse("@stdcall\nfn callback() -> int:\n    return 0\n");
        assert!(matches!(
            &program.statements[0],
            Statement::Fn(f) if f.calling_conv == CallingConv::Stdcall
        ));
    }

    #[test]
    fn comptime_attribute_on_fn() {
        let program = parse("@comptime\nfn fact(n: int) -> int:\n    return 1\n");
        assert!(matches!(
            &program.statements[0],
            Statement::Fn(f) if f.flags.comptime
        ));
    }
}
