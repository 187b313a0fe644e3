//! Statement parsing.

use super::expr::parse_expression;
use super::types::parse_type;
use super::{
    block_finished, close_block, decl, open_block, parse_block, BlockStyle, ParseError, Parser,
};
use crate::parser::ast::*;
use crate::parser::token::{Span, TokenKind};

/// Built-in DSL block names; user `syntax NAME` declarations extend this
/// set via the pre-scan.
const BUILTIN_DSL_NAMES: [&str; 4] = ["sql", "html", "regex", "json"];

/// Parse a statement.
pub fn parse_statement(parser: &mut Parser) -> Result<Statement, ParseError> {
    parser.depth += 1;
    if let Err(err) = parser.depth_guard() {
        parser.depth -= 1;
        return Err(err);
    }
    let result = parse_statement_inner(parser);
    parser.depth -= 1;
    result
}

fn parse_statement_inner(parser: &mut Parser) -> Result<Statement, ParseError> {
    let span = parser.current_span();
    let statement = match parser.current_kind() {
        TokenKind::Attribute => return decl::parse_attributed_declaration(parser),
        TokenKind::Pub
        | TokenKind::Fn
        | TokenKind::Record
        | TokenKind::Enum
        | TokenKind::Union
        | TokenKind::Type
        | TokenKind::Trait
        | TokenKind::Impl
        | TokenKind::Concept
        | TokenKind::Effect
        | TokenKind::Macro
        | TokenKind::Syntax
        | TokenKind::Layer
        | TokenKind::Extern
        | TokenKind::Use
        | TokenKind::Import
        | TokenKind::Module
        | TokenKind::Async => return decl::parse_declaration(parser),

        TokenKind::Let | TokenKind::Mut | TokenKind::Var => parse_var_decl(parser)?,
        TokenKind::Const => parse_const_decl(parser)?,
        TokenKind::If => parse_if(parser)?,
        TokenKind::Unless => parse_unless(parser)?,
        TokenKind::While => parse_while(parser, None)?,
        TokenKind::For => parse_for(parser, None)?,
        TokenKind::Loop => parse_loop(parser, None)?,
        TokenKind::Match => parse_match(parser)?,
        TokenKind::Return => parse_return(parser)?,
        TokenKind::Break => {
            parser.advance();
            let label = eat_label(parser);
            Statement::Break(BreakStmt { label, span })
        }
        TokenKind::Continue => {
            parser.advance();
            let label = eat_label(parser);
            Statement::Continue(ContinueStmt { label, span })
        }
        TokenKind::Delete => {
            parser.advance();
            let target = parse_expression(parser)?;
            Statement::Delete(DeleteStmt { target, span })
        }
        TokenKind::Lock => parse_lock(parser)?,
        TokenKind::With => parse_with(parser)?,
        TokenKind::Scope => parse_scope(parser)?,
        TokenKind::Require => {
            parser.advance();
            let condition = parse_expression(parser)?;
            Statement::Require(RequireStmt { condition, span })
        }
        TokenKind::Ensure => {
            parser.advance();
            let condition = parse_expression(parser)?;
            Statement::Ensure(EnsureStmt { condition, span })
        }
        TokenKind::Comptime => parse_comptime(parser)?,
        TokenKind::Handle => parse_handle(parser)?,
        TokenKind::Unsafe => {
            parser.advance();
            let body = parse_block(parser)?;
            Statement::Unsafe(UnsafeBlockStmt { body, span })
        }
        TokenKind::Asm => {
            parser.advance();
            let content = capture_indented_raw(parser)?;
            Statement::InlineAsm(InlineAsmStmt { content, span })
        }
        TokenKind::LBrace => {
            let statements = parse_block(parser)?;
            Statement::Block(BlockStmt { statements, span })
        }
        TokenKind::Identifier => {
            if let Some(statement) = try_parse_dsl_block(parser)? {
                statement
            } else if let Some(statement) = try_parse_labelled_loop(parser)? {
                statement
            } else {
                parse_expression_statement(parser)?
            }
        }
        _ => parse_expression_statement(parser)?,
    };

    end_statement(parser);
    Ok(statement)
}

/// Consume a trailing semicolon and/or newline after a statement.
fn end_statement(parser: &mut Parser) {
    parser.eat(TokenKind::Semicolon);
    parser.eat(TokenKind::Newline);
}

fn eat_label(parser: &mut Parser) -> Option<String> {
    if parser.check(TokenKind::Identifier) {
        Some(parser.advance().lexeme)
    } else {
        None
    }
}

/// `if cond`-style headers suppress the record-construction reading of a
/// following `{`.
pub(crate) fn parse_condition(parser: &mut Parser) -> Result<Expression, ParseError> {
    let saved = parser.no_record_literal;
    parser.no_record_literal = true;
    let result = parse_expression(parser);
    parser.no_record_literal = saved;
    result
}

fn parse_var_decl(parser: &mut Parser) -> Result<Statement, ParseError> {
    let span = parser.current_span();
    let mutable = matches!(parser.current_kind(), TokenKind::Mut | TokenKind::Var);
    parser.advance(); // let / mut / var

    // Destructuring declarations
    if parser.check(TokenKind::LParen) || parser.check(TokenKind::LBrace) {
        return parse_destructuring(parser, mutable, span);
    }

    let name = parser.consume_identifier("variable name")?;
    let type_name = if parser.eat(TokenKind::Colon) {
        parse_type(parser)?
    } else {
        String::new()
    };

    if !parser.check(TokenKind::Assign) {
        // Declaration without initializer
        return Ok(Statement::VarDecl(VarDecl {
            name,
            type_name,
            initializer: None,
            mutable,
            is_const: false,
            span,
        }));
    }
    parser.advance(); // =

    // Chained declaration: `mut x = mut y = v`
    if mutable && parser.check(TokenKind::Mut) {
        let mut names = vec![name];
        while parser.eat(TokenKind::Mut) {
            names.push(parser.consume_identifier("variable name")?);
            parser.consume(TokenKind::Assign, "'=' in chained declaration")?;
        }
        let initializer = parse_expression(parser)?;
        return Ok(Statement::MultiVarDecl(MultiVarDecl {
            names,
            mutable: true,
            is_const: false,
            initializer,
            span,
        }));
    }

    let initializer = parse_expression(parser)?;
    Ok(Statement::VarDecl(VarDecl {
        name,
        type_name,
        initializer: Some(initializer),
        mutable,
        is_const: false,
        span,
    }))
}

fn parse_destructuring(
    parser: &mut Parser,
    mutable: bool,
    span: Span,
) -> Result<Statement, ParseError> {
    let pattern = if parser.eat(TokenKind::LParen) {
        let mut names = Vec::new();
        loop {
            names.push(parser.consume_identifier("binding name")?);
            if !parser.eat(TokenKind::Comma) {
                break;
            }
        }
        parser.consume(TokenKind::RParen, "')' after tuple pattern")?;
        DestructurePattern::Tuple(names)
    } else {
        parser.consume(TokenKind::LBrace, "'{' to open record pattern")?;
        let mut names = Vec::new();
        loop {
            names.push(parser.consume_identifier("field name")?);
            if !parser.eat(TokenKind::Comma) {
                break;
            }
        }
        parser.consume(TokenKind::RBrace, "'}' after record pattern")?;
        DestructurePattern::Record(names)
    };

    parser.consume(TokenKind::Assign, "'=' after destructuring pattern")?;
    let initializer = parse_expression(parser)?;
    Ok(Statement::Destructuring(DestructuringDecl {
        pattern,
        initializer,
        mutable,
        span,
    }))
}

fn parse_const_decl(parser: &mut Parser) -> Result<Statement, ParseError> {
    let span = parser.current_span();
    parser.advance(); // const
    let first = parser.consume_identifier("constant name")?;
    parser.consume(TokenKind::DoubleColon, "'::' after constant name")?;

    // Chain: `const A :: B :: C :: v`
    let mut names = vec![first];
    while parser.check(TokenKind::Identifier) && parser.peek_at(1).kind == TokenKind::DoubleColon {
        names.push(parser.advance().lexeme);
        parser.advance(); // ::
    }

    let initializer = parse_expression(parser)?;
    if names.len() == 1 {
        Ok(Statement::VarDecl(VarDecl {
            name: names.pop().unwrap(),
            type_name: String::new(),
            initializer: Some(initializer),
            mutable: false,
            is_const: true,
            span,
        }))
    } else {
        Ok(Statement::MultiVarDecl(MultiVarDecl {
            names,
            mutable: false,
            is_const: true,
            initializer,
            span,
        }))
    }
}

fn parse_if(parser: &mut Parser) -> Result<Statement, ParseError> {
    let span = parser.current_span();
    parser.advance(); // if

    if parser.eat(TokenKind::Let) {
        return parse_if_let(parser, span);
    }

    let condition = parse_condition(parser)?;
    let style = open_block(parser)?;
    let mut then_branch = Vec::new();

    if style == BlockStyle::Inline {
        then_branch.push(parse_statement(parser)?);
    } else {
        loop {
            parser.skip_newlines();
            if block_finished(parser, style, true) {
                break;
            }
            then_branch.push(parse_statement(parser)?);
        }
        close_block(parser, style, false)?;
    }

    let mut elif_branches = Vec::new();
    let mut else_branch = None;

    if style == BlockStyle::LuaEnd {
        loop {
            if parser.eat(TokenKind::Elif) {
                let elif_cond = parse_condition(parser)?;
                parser.eat(TokenKind::Then);
                let mut body = Vec::new();
                loop {
                    parser.skip_newlines();
                    if block_finished(parser, BlockStyle::LuaEnd, true) {
                        break;
                    }
                    body.push(parse_statement(parser)?);
                }
                elif_branches.push((elif_cond, body));
            } else if parser.eat(TokenKind::Else) {
                let mut body = Vec::new();
                loop {
                    parser.skip_newlines();
                    if block_finished(parser, BlockStyle::LuaEnd, false) {
                        break;
                    }
                    body.push(parse_statement(parser)?);
                }
                else_branch = Some(body);
            } else {
                break;
            }
        }
        parser.consume(TokenKind::End, "'end' to close if statement")?;
    } else {
        parser.skip_newlines();
        while parser.check(TokenKind::Elif) {
            parser.advance();
            let elif_cond = parse_condition(parser)?;
            let body = parse_block(parser)?;
            elif_branches.push((elif_cond, body));
            parser.skip_newlines();
        }
        if parser.check(TokenKind::Else) {
            parser.advance();
            // `else if` chains fold into elif branches
            if parser.check(TokenKind::If) {
                let nested = parse_if(parser)?;
                else_branch = Some(vec![nested]);
            } else {
                else_branch = Some(parse_block(parser)?);
            }
        }
    }

    Ok(Statement::If(IfStmt {
        condition,
        then_branch,
        elif_branches,
        else_branch,
        span,
    }))
}

fn parse_if_let(parser: &mut Parser, span: Span) -> Result<Statement, ParseError> {
    let pattern = parse_match_pattern(parser)?;
    parser.consume(TokenKind::Assign, "'=' in if-let")?;
    let value = parse_condition(parser)?;
    let then_branch = parse_block(parser)?;
    parser.skip_newlines();
    let else_branch = if parser.eat(TokenKind::Else) {
        Some(parse_block(parser)?)
    } else {
        None
    };
    Ok(Statement::IfLet(IfLetStmt {
        pattern,
        value,
        then_branch,
        else_branch,
        span,
    }))
}

fn parse_unless(parser: &mut Parser) -> Result<Statement, ParseError> {
    let span = parser.current_span();
    parser.advance(); // unless
    let condition = parse_condition(parser)?;
    let body = parse_block(parser)?;
    Ok(Statement::Unless(UnlessStmt {
        condition,
        body,
        span,
    }))
}

fn parse_while(parser: &mut Parser, label: Option<String>) -> Result<Statement, ParseError> {
    let span = parser.current_span();
    parser.advance(); // while
    let condition = parse_condition(parser)?;
    let body = parse_block(parser)?;
    Ok(Statement::While(WhileStmt {
        condition,
        body,
        label,
        span,
    }))
}

fn parse_for(parser: &mut Parser, label: Option<String>) -> Result<Statement, ParseError> {
    let span = parser.current_span();
    parser.advance(); // for
    let var = parser.consume_identifier("loop variable")?;
    parser.consume(TokenKind::In, "'in' after loop variable")?;
    let iterable = parse_condition(parser)?;
    let body = parse_block(parser)?;
    Ok(Statement::For(ForStmt {
        var,
        iterable,
        body,
        label,
        span,
    }))
}

fn parse_loop(parser: &mut Parser, label: Option<String>) -> Result<Statement, ParseError> {
    let span = parser.current_span();
    parser.advance(); // loop
    let body = parse_block(parser)?;
    Ok(Statement::Loop(LoopStmt { body, label, span }))
}

/// `label: for/while/loop` headers; anything else rewinds.
fn try_parse_labelled_loop(parser: &mut Parser) -> Result<Option<Statement>, ParseError> {
    if parser.peek_at(1).kind != TokenKind::Colon {
        return Ok(None);
    }
    let loop_kind = parser.peek_at(2).kind;
    if !matches!(
        loop_kind,
        TokenKind::For | TokenKind::While | TokenKind::Loop
    ) {
        return Ok(None);
    }
    let label = parser.advance().lexeme;
    parser.advance(); // :
    let statement = match parser.current_kind() {
        TokenKind::For => parse_for(parser, Some(label))?,
        TokenKind::While => parse_while(parser, Some(label))?,
        _ => parse_loop(parser, Some(label))?,
    };
    Ok(Some(statement))
}

fn parse_match(parser: &mut Parser) -> Result<Statement, ParseError> {
    let span = parser.current_span();
    parser.advance(); // match
    let scrutinee = parse_condition(parser)?;
    let style = open_block(parser)?;

    let mut arms = Vec::new();
    loop {
        parser.skip_newlines();
        if block_finished(parser, style, false) {
            break;
        }
        arms.push(parse_match_arm(parser)?);
    }
    close_block(parser, style, true)?;

    Ok(Statement::Match(MatchStmt {
        scrutinee,
        arms,
        span,
    }))
}

fn parse_match_arm(parser: &mut Parser) -> Result<MatchArm, ParseError> {
    let span = parser.current_span();
    let pattern = parse_match_pattern(parser)?;
    let guard = if parser.eat(TokenKind::If) {
        Some(parse_condition(parser)?)
    } else {
        None
    };
    parser.consume(TokenKind::DoubleArrow, "'=>' after match pattern")?;

    let body = if matches!(
        parser.current_kind(),
        TokenKind::Colon | TokenKind::LBrace | TokenKind::Then | TokenKind::Do
    ) {
        parse_block(parser)?
    } else {
        vec![parse_statement(parser)?]
    };

    Ok(MatchArm {
        pattern,
        guard,
        body,
        span,
    })
}

fn parse_match_pattern(parser: &mut Parser) -> Result<MatchPattern, ParseError> {
    if parser.eat(TokenKind::Underscore) {
        return Ok(MatchPattern::Wildcard);
    }

    // Literal or range pattern
    if parser.current_kind().is_literal() || parser.check(TokenKind::Minus) {
        let lo = super::expr::parse_precedence(parser, super::Precedence::Range)?;
        if let Expression::Range(range) = lo {
            return Ok(MatchPattern::Range {
                lo: *range.start,
                hi: *range.end,
                inclusive: range.inclusive,
            });
        }
        return Ok(MatchPattern::Literal(lo));
    }

    let name = parser.consume_identifier("pattern")?;
    Ok(MatchPattern::Binding(name))
}

fn parse_return(parser: &mut Parser) -> Result<Statement, ParseError> {
    let span = parser.current_span();
    parser.advance(); // return
    let value = if matches!(
        parser.current_kind(),
        TokenKind::Newline
            | TokenKind::Semicolon
            | TokenKind::Dedent
            | TokenKind::RBrace
            | TokenKind::End
            | TokenKind::Eof
    ) {
        None
    } else {
        Some(parse_expression(parser)?)
    };
    Ok(Statement::Return(ReturnStmt { value, span }))
}

fn parse_lock(parser: &mut Parser) -> Result<Statement, ParseError> {
    let span = parser.current_span();
    parser.advance(); // lock
    let mutex = parse_condition(parser)?;
    let body = parse_block(parser)?;
    Ok(Statement::Lock(LockStmt { mutex, body, span }))
}

fn parse_with(parser: &mut Parser) -> Result<Statement, ParseError> {
    let span = parser.current_span();
    parser.advance(); // with
    let acquired = parse_condition(parser)?;
    // `with acquire as name` parses `as name` as a cast; unfold it.
    let (acquire, binding) = match acquired {
        Expression::Cast(cast) => (*cast.expr, Some(cast.target_type)),
        other => (other, None),
    };
    let body = parse_block(parser)?;
    Ok(Statement::With(WithStmt {
        acquire,
        binding,
        body,
        span,
    }))
}

fn parse_scope(parser: &mut Parser) -> Result<Statement, ParseError> {
    let span = parser.current_span();
    parser.advance(); // scope

    let mut label = None;
    let mut timeout = None;
    if parser.check(TokenKind::Identifier) {
        if parser.current().lexeme == "timeout" {
            parser.advance();
            timeout = Some(parse_condition(parser)?);
        } else if parser.peek_at(1).kind == TokenKind::Colon {
            label = Some(parser.advance().lexeme);
        } else {
            return Err(ParseError::AmbiguousScopeHeader {
                span: parser.current_span(),
            });
        }
    }

    let body = parse_block(parser)?;
    Ok(Statement::Scope(ScopeStmt {
        label,
        timeout,
        body,
        span,
    }))
}

fn parse_comptime(parser: &mut Parser) -> Result<Statement, ParseError> {
    let span = parser.current_span();
    parser.advance(); // comptime

    if parser.eat(TokenKind::Assert) {
        let condition = parse_expression(parser)?;
        let message = if parser.eat(TokenKind::Comma) {
            let token = parser.consume(TokenKind::Str, "assertion message string")?;
            token.literal.as_str().map(|s| s.to_string())
        } else {
            None
        };
        return Ok(Statement::ComptimeAssert(ComptimeAssertStmt {
            condition,
            message,
            span,
        }));
    }

    let body = parse_block(parser)?;
    Ok(Statement::ComptimeBlock(ComptimeBlockStmt { body, span }))
}

/// `handle Effect:` installs handler arms (`op(params) => body`) around
/// the remaining statements of the block.
fn parse_handle(parser: &mut Parser) -> Result<Statement, ParseError> {
    let span = parser.current_span();
    parser.advance(); // handle
    let effect = parser.consume_identifier("effect name after 'handle'")?;

    let style = open_block(parser)?;
    let mut handlers = Vec::new();
    let mut body = Vec::new();
    loop {
        parser.skip_newlines();
        if block_finished(parser, style, false) {
            break;
        }
        if let Some(arm) = try_parse_handler_arm(parser)? {
            handlers.push(arm);
        } else {
            body.push(parse_statement(parser)?);
        }
    }
    close_block(parser, style, true)?;

    Ok(Statement::Handle(HandleStmt {
        effect,
        handlers,
        body,
        span,
    }))
}

/// `op(a, b) => body` inside a handle block; anything else rewinds.
fn try_parse_handler_arm(parser: &mut Parser) -> Result<Option<HandlerArm>, ParseError> {
    if parser.current_kind() != TokenKind::Identifier
        || parser.peek_at(1).kind != TokenKind::LParen
    {
        return Ok(None);
    }
    // Scan past the parameter list for the arrow
    let mut offset = 2;
    loop {
        match parser.peek_at(offset).kind {
            TokenKind::RParen => break,
            TokenKind::Identifier | TokenKind::Comma => offset += 1,
            _ => return Ok(None),
        }
        if offset > 64 {
            return Ok(None);
        }
    }
    if parser.peek_at(offset + 1).kind != TokenKind::DoubleArrow {
        return Ok(None);
    }

    let span = parser.current_span();
    let operation = parser.advance().lexeme;
    parser.advance(); // (
    let mut params = Vec::new();
    while !parser.check(TokenKind::RParen) {
        let p_span = parser.current_span();
        let name = parser.consume_identifier("handler parameter")?;
        params.push(Param::new(name, "", p_span));
        if !parser.eat(TokenKind::Comma) {
            break;
        }
    }
    parser.consume(TokenKind::RParen, "')' after handler parameters")?;
    parser.consume(TokenKind::DoubleArrow, "'=>' after handler parameters")?;

    let body = if matches!(
        parser.current_kind(),
        TokenKind::Colon | TokenKind::LBrace | TokenKind::Then | TokenKind::Do
    ) {
        parse_block(parser)?
    } else {
        vec![parse_statement(parser)?]
    };

    Ok(Some(HandlerArm {
        operation,
        params,
        body,
        span,
    }))
}

/// `sql:` / `html:` / user `syntax` blocks: capture the raw source between
/// INDENT and the matching DEDENT without parsing it.
fn try_parse_dsl_block(parser: &mut Parser) -> Result<Option<Statement>, ParseError> {
    let name = &parser.current().lexeme;
    let registered =
        parser.prescan.dsl_names.contains(name) || BUILTIN_DSL_NAMES.contains(&name.as_str());
    if !registered || parser.peek_at(1).kind != TokenKind::Colon {
        return Ok(None);
    }
    let span = parser.current_span();
    let name = parser.advance().lexeme;
    let content = capture_indented_raw(parser)?;
    Ok(Some(Statement::DslBlock(DslBlockStmt {
        name,
        content,
        span,
    })))
}

/// Consume `: NEWLINE INDENT ... DEDENT` and return the verbatim source
/// between the INDENT and its matching DEDENT.
fn capture_indented_raw(parser: &mut Parser) -> Result<String, ParseError> {
    parser.consume(TokenKind::Colon, "':' to open block")?;
    parser.skip_newlines();
    parser.consume(TokenKind::Indent, "an indented block")?;

    let start = parser.current_span().start;
    let mut end = start;
    let mut depth = 1usize;
    while !parser.at_eof() {
        match parser.current_kind() {
            TokenKind::Indent => depth += 1,
            TokenKind::Dedent => {
                depth -= 1;
                if depth == 0 {
                    end = parser.current_span().start;
                    parser.advance();
                    break;
                }
            }
            _ => {}
        }
        parser.advance();
    }

    Ok(parser.source()[start..end].to_string())
}

fn parse_expression_statement(parser: &mut Parser) -> Result<Statement, ParseError> {
    let span = parser.current_span();
    let expression = parse_expression(parser)?;

    // `x = y = z = v` chains of plain identifiers declare all targets
    if let Some(multi) = as_multi_decl(&expression, span) {
        return Ok(multi);
    }

    Ok(Statement::Expression(ExpressionStmt { expression, span }))
}

fn as_multi_decl(expr: &Expression, span: Span) -> Option<Statement> {
    let mut names = Vec::new();
    let mut current = expr;
    loop {
        match current {
            Expression::Assign(assign) if assign.op == AssignOp::Assign => {
                let name = assign.target.as_identifier()?;
                names.push(name.to_string());
                current = assign.value.as_ref();
            }
            _ => break,
        }
    }
    if names.len() >= 2 {
        Some(Statement::MultiVarDecl(MultiVarDecl {
            names,
            mutable: false,
            is_const: false,
            initializer: current.clone(),
            span,
        }))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> Program {
        Parser::parse_source(source, "t.tyl").expect("parse ok")
    }

    #[test]
    fn var_declarations() {
        let program = parse("let x = 1\nmut y: int = 2\nconst N :: 10\n");
        assert_eq!(program.statements.len(), 3);
        assert!(matches!(
            &program.statements[0],
            Statement::VarDecl(v) if !v.mutable && v.name == "x"
        ));
        assert!(matches!(
            &program.statements[1],
            Statement::VarDecl(v) if v.mutable && v.type_name == "int"
        ));
        assert!(matches!(
            &program.statements[2],
            Statement::VarDecl(v) if v.is_const && v.name == "N"
        ));
    }

    #[test]
    fn chained_mut_declaration() {
        let program = parse("mut x = mut y = mut z = 0\n");
        if let Statement::MultiVarDecl(decl) = &program.statements[0] {
            assert_eq!(decl.names, vec!["x", "y", "z"]);
            assert!(decl.mutable);
        } else {
            panic!("expected multi declaration");
        }
    }

    #[test]
    fn chained_const_declaration() {
        let program = parse("const A :: B :: C :: 7\n");
        if let Statement::MultiVarDecl(decl) = &program.statements[0] {
            assert_eq!(decl.names, vec!["A", "B", "C"]);
            assert!(decl.is_const);
        } else {
            panic!("expected multi declaration");
        }
    }

    #[test]
    fn chained_plain_assignment_becomes_declaration() {
        let program = parse("x = y = z = 5\n");
        assert!(matches!(
            &program.statements[0],
            Statement::MultiVarDecl(d) if d.names.len() == 3 && !d.mutable
        ));
    }

    #[test]
    fn destructuring_declarations() {
        let program = parse("let (a, b) = pair()\nlet {x, y} = point\n");
        assert!(matches!(
            &program.statements[0],
            Statement::Destructuring(d) if matches!(&d.pattern, DestructurePattern::Tuple(n) if n.len() == 2)
        ));
        assert!(matches!(
            &program.statements[1],
            Statement::Destructuring(d) if matches!(&d.pattern, DestructurePattern::Record(n) if n.len() == 2)
        ));
    }

    #[test]
    fn if_elif_else_indented() {
        let program = parse("if a:\n    x = 1\nelif b:\n    x = 2\nelse:\n    x = 3\n");
        if let Statement::If(stmt) = &program.statements[0] {
            assert_eq!(stmt.elif_branches.len(), 1);
            assert!(stmt.else_branch.is_some());
        } else {
            panic!("expected if statement");
        }
    }

    #[test]
    fn lua_style_blocks() {
        let program = parse("if a then\n    x = 1\nelse\n    x = 2\nend\n");
        if let Statement::If(stmt) = &program.statements[0] {
            assert!(stmt.else_branch.is_some());
        } else {
            panic!("expected if statement");
        }
        let program = parse("while a do\n    x = 1\nend\n");
        assert!(matches!(program.statements[0], Statement::While(_)));
    }

    #[test]
    fn labelled_loops_and_break() {
        let program = parse("outer: for i in 1..10:\n    break outer\n");
        if let Statement::For(stmt) = &program.statements[0] {
            assert_eq!(stmt.label.as_deref(), Some("outer"));
            assert!(matches!(
                &stmt.body[0],
                Statement::Break(b) if b.label.as_deref() == Some("outer")
            ));
        } else {
            panic!("expected for statement");
        }
    }

    #[test]
    fn match_with_guards_and_ranges() {
        let program = parse(
            "match x:\n    0 => return 0\n    1..=9 if ok => return 1\n    _ => return 2\n",
        );
        if let Statement::Match(stmt) = &program.statements[0] {
            assert_eq!(stmt.arms.len(), 3);
            assert!(matches!(stmt.arms[0].pattern, MatchPattern::Literal(_)));
            assert!(matches!(
                stmt.arms[1].pattern,
                MatchPattern::Range { inclusive: true, .. }
            ));
            assert!(stmt.arms[1].guard.is_some());
            assert!(matches!(stmt.arms[2].pattern, MatchPattern::Wildcard));
        } else {
            panic!("expected match statement");
        }
    }

    #[test]
    fn scope_label_and_timeout() {
        let program = parse("scope cleanup:\n    x = 1\nscope timeout 500:\n    y = 2\n");
        assert!(matches!(
            &program.statements[0],
            Statement::Scope(s) if s.label.as_deref() == Some("cleanup") && s.timeout.is_none()
        ));
        assert!(matches!(
            &program.statements[1],
            Statement::Scope(s) if s.label.is_none() && s.timeout.is_some()
        ));
    }

    #[test]
    fn with_binding() {
        let program = parse("with open_file() as f:\n    read(f)\n");
        if let Statement::With(stmt) = &program.statements[0] {
            assert_eq!(stmt.binding.as_deref(), Some("f"));
        } else {
            panic!("expected with statement");
        }
    }

    #[test]
    fn dsl_block_captures_raw_content() {
        let program = parse("sql:\n    SELECT * FROM users\n    WHERE id = 1\nlet x = 1\n");
        if let Statement::DslBlock(block) = &program.statements[0] {
            assert_eq!(block.name, "sql");
            assert!(block.content.contains("SELECT * FROM users"));
            assert!(block.content.contains("WHERE id = 1"));
        } else {
            panic!("expected dsl block, got {:?}", program.statements[0]);
        }
        assert!(matches!(program.statements[1], Statement::VarDecl(_)));
    }

    #[test]
    fn comptime_forms() {
        let program = parse("comptime assert 1 + 1 == 2\ncomptime:\n    let x = 1\n");
        assert!(matches!(
            program.statements[0],
            Statement::ComptimeAssert(_)
        ));
        assert!(matches!(program.statements[1], Statement::ComptimeBlock(_)));
    }

    #[test]
    fn lock_with_scope_statements() {
        let program = parse("lock m:\n    x = 1\n");
        assert!(matches!(program.statements[0], Statement::Lock(_)));
    }

    #[test]
    fn handle_block_with_arms() {
        let program = parse(
            "handle IO:\n    read() => resume \"stub\"\n    write(s) => log(s)\n    run()\n",
        );
        if let Statement::Handle(h) = &program.statements[0] {
            assert_eq!(h.effect, "IO");
            assert_eq!(h.handlers.len(), 2);
            assert_eq!(h.handlers[1].params.len(), 1);
            assert_eq!(h.body.len(), 1);
        } else {
            panic!("expected handle statement, got {:?}", program.statements[0]);
        }
    }
}
