//! Expression parsing (Pratt).
//!
//! Each token kind registers an infix precedence; prefix forms are handled
//! directly. The placeholder `_` is lifted into a `|_it| ...` lambda at
//! the outermost expression level unless a constraint context suppresses
//! it.

use super::types::parse_type;
use super::{ParseError, Parser, Precedence};
use crate::parser::ast::*;
use crate::parser::lexer::{INTERP_END, INTERP_START};
use crate::parser::token::{Span, TokenKind};

/// Parse a full expression, lifting `_` placeholders into a lambda when
/// the result is a binary/member/call shape outside a constraint context.
pub fn parse_expression(parser: &mut Parser) -> Result<Expression, ParseError> {
    let expr = parse_precedence(parser, Precedence::Assignment)?;
    if !parser.in_constraint && should_lift_placeholder(&expr) {
        return Ok(lift_placeholder(expr));
    }
    Ok(expr)
}

fn infix_precedence(parser: &Parser, kind: TokenKind) -> Precedence {
    match kind {
        TokenKind::Assign
        | TokenKind::PlusAssign
        | TokenKind::MinusAssign
        | TokenKind::StarAssign
        | TokenKind::SlashAssign
        | TokenKind::PercentAssign
        | TokenKind::Walrus => Precedence::Assignment,
        // ch <- value binds loosely
        TokenKind::ChanSend => Precedence::Assignment,
        TokenKind::DoubleArrow => Precedence::Assignment,
        TokenKind::Question => Precedence::Ternary,
        TokenKind::QuestionQuestion => Precedence::NullCoalesce,
        TokenKind::PipeGt => Precedence::Pipe,
        TokenKind::Or | TokenKind::PipePipe => Precedence::Or,
        TokenKind::And | TokenKind::AmpAmp => Precedence::And,
        TokenKind::Pipe => Precedence::BitOr,
        TokenKind::Caret => Precedence::BitXor,
        TokenKind::Amp => Precedence::BitAnd,
        TokenKind::Eq | TokenKind::Ne => Precedence::Equality,
        TokenKind::Lt
        | TokenKind::Gt
        | TokenKind::Le
        | TokenKind::Ge
        | TokenKind::Spaceship
        | TokenKind::Is => Precedence::Comparison,
        TokenKind::DotDot | TokenKind::DotDotEq => Precedence::Range,
        TokenKind::Plus | TokenKind::Minus => Precedence::Term,
        TokenKind::Star | TokenKind::Slash | TokenKind::Percent => Precedence::Factor,
        TokenKind::CustomOp => Precedence::Factor,
        TokenKind::Dot
        | TokenKind::QuestionDot
        | TokenKind::LBracket
        | TokenKind::LParen => Precedence::Postfix,
        TokenKind::LBrace if !parser.no_record_literal => Precedence::Postfix,
        // `a dot b` with a registered identifier operator
        TokenKind::Identifier
            if parser
                .prescan
                .infix_ops
                .contains_key(&parser.current().lexeme) =>
        {
            Precedence::Comparison
        }
        _ => Precedence::None,
    }
}

pub(crate) fn parse_precedence(
    parser: &mut Parser,
    min_prec: Precedence,
) -> Result<Expression, ParseError> {
    parser.depth += 1;
    parser.depth_guard().inspect_err(|_| {
        parser.depth -= 1;
    })?;
    let result = parse_precedence_inner(parser, min_prec);
    parser.depth -= 1;
    result
}

fn parse_precedence_inner(
    parser: &mut Parser,
    min_prec: Precedence,
) -> Result<Expression, ParseError> {
    let mut left = parse_prefix(parser)?;

    while !parser.at_eof() {
        // `a if c else b` ternary form
        if parser.check(TokenKind::If) && min_prec <= Precedence::Ternary {
            left = parse_suffix_ternary(parser, left)?;
            continue;
        }

        // `expr as T` cast (`as` is an ordinary identifier in the lexer)
        if parser.check(TokenKind::Identifier) && parser.current().lexeme == "as" {
            let span = parser.current_span();
            parser.advance();
            let target_type = parse_type(parser)?;
            left = Expression::Cast(CastExpr {
                expr: Box::new(left),
                target_type,
                span,
            });
            continue;
        }

        let prec = infix_precedence(parser, parser.current_kind());
        if prec == Precedence::None || prec < min_prec {
            break;
        }
        left = parse_infix(parser, left, prec)?;
    }

    Ok(left)
}

fn parse_prefix(parser: &mut Parser) -> Result<Expression, ParseError> {
    let span = parser.current_span();
    match parser.current_kind() {
        TokenKind::Minus => {
            parser.advance();
            let operand = parse_precedence(parser, Precedence::Unary)?;
            Ok(Expression::Unary(UnaryExpr {
                op: UnOp::Neg,
                operand: Box::new(operand),
                span,
            }))
        }
        TokenKind::Bang | TokenKind::Not => {
            parser.advance();
            let operand = parse_precedence(parser, Precedence::Unary)?;
            Ok(Expression::Unary(UnaryExpr {
                op: UnOp::Not,
                operand: Box::new(operand),
                span,
            }))
        }
        TokenKind::Tilde => {
            parser.advance();
            let operand = parse_precedence(parser, Precedence::Unary)?;
            Ok(Expression::Unary(UnaryExpr {
                op: UnOp::BitNot,
                operand: Box::new(operand),
                span,
            }))
        }
        TokenKind::Amp => {
            parser.advance();
            if parser.eat(TokenKind::Mut) {
                let operand = parse_precedence(parser, Precedence::Unary)?;
                Ok(Expression::Borrow(BorrowExpr {
                    operand: Box::new(operand),
                    mutable: true,
                    span,
                }))
            } else {
                let operand = parse_precedence(parser, Precedence::Unary)?;
                Ok(Expression::AddressOf(AddressOfExpr {
                    operand: Box::new(operand),
                    span,
                }))
            }
        }
        TokenKind::Star => {
            parser.advance();
            let operand = parse_precedence(parser, Precedence::Unary)?;
            Ok(Expression::Deref(DerefExpr {
                operand: Box::new(operand),
                span,
            }))
        }
        TokenKind::Await => {
            parser.advance();
            let operand = parse_precedence(parser, Precedence::Unary)?;
            Ok(Expression::Await(AwaitExpr {
                operand: Box::new(operand),
                span,
            }))
        }
        TokenKind::Spawn => {
            parser.advance();
            let operand = parse_precedence(parser, Precedence::Unary)?;
            Ok(Expression::Spawn(SpawnExpr {
                operand: Box::new(operand),
                span,
            }))
        }
        // Prefix `<- ch` receives
        TokenKind::ChanSend => {
            parser.advance();
            let channel = parse_precedence(parser, Precedence::Unary)?;
            Ok(Expression::ChanRecv(ChanRecvExpr {
                channel: Box::new(channel),
                span,
            }))
        }
        TokenKind::New => {
            parser.advance();
            parse_new(parser, span)
        }
        _ => parse_primary(parser),
    }
}

fn parse_suffix_ternary(
    parser: &mut Parser,
    then_expr: Expression,
) -> Result<Expression, ParseError> {
    let span = then_expr.span();
    parser.advance(); // if
    let condition = parse_precedence(parser, Precedence::Ternary)?;
    parser.consume(TokenKind::Else, "'else' in ternary expression")?;
    let else_expr = parse_precedence(parser, Precedence::Ternary)?;
    Ok(Expression::Ternary(TernaryExpr {
        condition: Box::new(condition),
        then_expr: Box::new(then_expr),
        else_expr: Box::new(else_expr),
        span,
    }))
}

fn assign_op(kind: TokenKind) -> AssignOp {
    match kind {
        TokenKind::PlusAssign => AssignOp::Add,
        TokenKind::MinusAssign => AssignOp::Sub,
        TokenKind::StarAssign => AssignOp::Mul,
        TokenKind::SlashAssign => AssignOp::Div,
        TokenKind::PercentAssign => AssignOp::Mod,
        _ => AssignOp::Assign,
    }
}

fn is_valid_assign_target(expr: &Expression) -> bool {
    matches!(
        expr,
        Expression::Identifier(_)
            | Expression::Member(_)
            | Expression::Index(_)
            | Expression::Deref(_)
    )
}

fn parse_infix(
    parser: &mut Parser,
    left: Expression,
    prec: Precedence,
) -> Result<Expression, ParseError> {
    let kind = parser.current_kind();
    let span = parser.current_span();
    match kind {
        TokenKind::Assign
        | TokenKind::PlusAssign
        | TokenKind::MinusAssign
        | TokenKind::StarAssign
        | TokenKind::SlashAssign
        | TokenKind::PercentAssign
        | TokenKind::Walrus => {
            parser.advance();
            if !is_valid_assign_target(&left) {
                return Err(ParseError::InvalidAssignmentTarget { span: left.span() });
            }
            // Right-associative
            let value = parse_precedence(parser, Precedence::Assignment)?;
            Ok(Expression::Assign(AssignExpr {
                target: Box::new(left),
                op: assign_op(kind),
                value: Box::new(value),
                span,
            }))
        }
        TokenKind::ChanSend => {
            parser.advance();
            let value = parse_precedence(parser, Precedence::Ternary)?;
            Ok(Expression::ChanSend(ChanSendExpr {
                channel: Box::new(left),
                value: Box::new(value),
                span,
            }))
        }
        TokenKind::DoubleArrow => {
            parser.advance();
            parse_arrow_lambda(parser, left, span)
        }
        TokenKind::Question => {
            // `c ? a : b` when something expression-like follows; plain
            // postfix `?` propagation otherwise.
            if can_start_expression(parser.peek_at(1).kind) && question_is_ternary(parser) {
                parser.advance();
                let then_expr = parse_precedence(parser, Precedence::Ternary)?;
                parser.consume(TokenKind::Colon, "':' in ternary expression")?;
                let else_expr = parse_precedence(parser, Precedence::Ternary)?;
                Ok(Expression::Ternary(TernaryExpr {
                    condition: Box::new(left),
                    then_expr: Box::new(then_expr),
                    else_expr: Box::new(else_expr),
                    span,
                }))
            } else {
                parser.advance();
                Ok(Expression::Propagate(PropagateExpr {
                    operand: Box::new(left),
                    span,
                }))
            }
        }
        TokenKind::QuestionQuestion => {
            parser.advance();
            let right = parse_precedence(parser, Precedence::Pipe)?;
            Ok(Expression::binary(BinOp::NullCoalesce, left, right, span))
        }
        TokenKind::PipeGt => {
            parser.advance();
            let right = parse_precedence(parser, Precedence::Or)?;
            Ok(Expression::binary(BinOp::Pipe, left, right, span))
        }
        TokenKind::Is => {
            parser.advance();
            let ty = parse_type(parser)?;
            Ok(Expression::TypeCheck(TypeCheckExpr {
                expr: Box::new(left),
                ty,
                span,
            }))
        }
        TokenKind::DotDot | TokenKind::DotDotEq => {
            parser.advance();
            let end = parse_precedence(parser, Precedence::Term)?;
            Ok(Expression::Range(RangeExpr {
                start: Box::new(left),
                end: Box::new(end),
                inclusive: kind == TokenKind::DotDotEq,
                span,
            }))
        }
        TokenKind::Dot | TokenKind::QuestionDot => {
            parser.advance();
            let field = parser.consume_identifier("member name after '.'")?;
            Ok(Expression::Member(MemberExpr {
                object: Box::new(left),
                field,
                safe: kind == TokenKind::QuestionDot,
                span,
            }))
        }
        TokenKind::LBracket => parse_index_or_type_args(parser, left, span),
        TokenKind::LParen => parse_call(parser, left, Vec::new(), span),
        TokenKind::LBrace => parse_record_init(parser, left, span),
        TokenKind::CustomOp => {
            let op = parser.advance().lexeme;
            let right = parse_precedence(parser, next_precedence(prec))?;
            Ok(Expression::binary(BinOp::Custom(op), left, right, span))
        }
        TokenKind::Identifier => {
            // Registered identifier infix operator: `a dot b`
            let op = parser.advance().lexeme;
            let right = parse_precedence(parser, next_precedence(prec))?;
            Ok(Expression::binary(BinOp::Custom(op), left, right, span))
        }
        _ => {
            let op = match kind {
                TokenKind::Plus => BinOp::Add,
                TokenKind::Minus => BinOp::Sub,
                TokenKind::Star => BinOp::Mul,
                TokenKind::Slash => BinOp::Div,
                TokenKind::Percent => BinOp::Mod,
                TokenKind::Eq => BinOp::Eq,
                TokenKind::Ne => BinOp::Ne,
                TokenKind::Lt => BinOp::Lt,
                TokenKind::Gt => BinOp::Gt,
                TokenKind::Le => BinOp::Le,
                TokenKind::Ge => BinOp::Ge,
                TokenKind::And | TokenKind::AmpAmp => BinOp::And,
                TokenKind::Or | TokenKind::PipePipe => BinOp::Or,
                TokenKind::Amp => BinOp::BitAnd,
                TokenKind::Pipe => BinOp::BitOr,
                TokenKind::Caret => BinOp::BitXor,
                TokenKind::Spaceship => BinOp::Spaceship,
                _ => {
                    return Err(ParseError::UnexpectedToken {
                        found: parser.current().lexeme.clone(),
                        span,
                    })
                }
            };
            parser.advance();
            let right = parse_precedence(parser, next_precedence(prec))?;
            Ok(Expression::binary(op, left, right, span))
        }
    }
}

/// The next-higher precedence level, for left-associative binary parsing.
fn next_precedence(prec: Precedence) -> Precedence {
    use Precedence::*;
    match prec {
        None => Assignment,
        Assignment => Ternary,
        Ternary => NullCoalesce,
        NullCoalesce => Pipe,
        Pipe => Or,
        Or => And,
        And => BitOr,
        BitOr => BitXor,
        BitXor => BitAnd,
        BitAnd => Equality,
        Equality => Comparison,
        Comparison => Range,
        Range => Term,
        Term => Factor,
        Factor => Unary,
        Unary => Postfix,
        Postfix | Primary => Primary,
    }
}

pub(crate) fn can_start_expression(kind: TokenKind) -> bool {
    matches!(
        kind,
        TokenKind::Integer
            | TokenKind::Float
            | TokenKind::Str
            | TokenKind::Char
            | TokenKind::ByteString
            | TokenKind::RawByteString
            | TokenKind::Identifier
            | TokenKind::True
            | TokenKind::False
            | TokenKind::Nil
            | TokenKind::LParen
            | TokenKind::LBracket
            | TokenKind::LBrace
            | TokenKind::Minus
            | TokenKind::Bang
            | TokenKind::Not
            | TokenKind::Tilde
            | TokenKind::Amp
            | TokenKind::Star
            | TokenKind::Await
            | TokenKind::Spawn
            | TokenKind::New
            | TokenKind::Underscore
            | TokenKind::SelfKw
            | TokenKind::ChanSend
            | TokenKind::Pipe
            | TokenKind::PipePipe
    )
}

/// Distinguish `c ? a : b` from postfix `?` by scanning ahead for the `:`
/// at bracket depth zero before the expression can end.
fn question_is_ternary(parser: &Parser) -> bool {
    let mut depth = 0i32;
    let mut offset = 1;
    loop {
        let kind = parser.peek_at(offset).kind;
        match kind {
            TokenKind::LParen | TokenKind::LBracket | TokenKind::LBrace => depth += 1,
            TokenKind::RParen | TokenKind::RBracket | TokenKind::RBrace => {
                if depth == 0 {
                    return false;
                }
                depth -= 1;
            }
            TokenKind::Colon if depth == 0 => return true,
            TokenKind::Newline
            | TokenKind::Eof
            | TokenKind::Comma
            | TokenKind::Semicolon
            | TokenKind::Indent
            | TokenKind::Dedent => return false,
            _ => {}
        }
        offset += 1;
        if offset > 256 {
            return false;
        }
    }
}

fn parse_arrow_lambda(
    parser: &mut Parser,
    params_expr: Expression,
    span: Span,
) -> Result<Expression, ParseError> {
    let mut params = Vec::new();
    match params_expr {
        Expression::Identifier(id) => params.push(Param::new(id.name, "", id.span)),
        other => {
            return Err(ParseError::InvalidAssignmentTarget { span: other.span() });
        }
    }
    let body = parse_precedence(parser, Precedence::Assignment)?;
    Ok(Expression::Lambda(LambdaExpr {
        params,
        body: Box::new(body),
        span,
    }))
}

/// `f[T](x)` type arguments vs `xs[i]` indexing: brackets directly after
/// an identifier followed by a call are type arguments.
fn parse_index_or_type_args(
    parser: &mut Parser,
    left: Expression,
    span: Span,
) -> Result<Expression, ParseError> {
    if left.as_identifier().is_some() {
        let mark = parser.mark();
        parser.advance(); // [
        let mut type_args = Vec::new();
        let mut ok = true;
        loop {
            match parse_type(parser) {
                Ok(ty) => type_args.push(ty),
                Err(_) => {
                    ok = false;
                    break;
                }
            }
            if !parser.eat(TokenKind::Comma) {
                break;
            }
        }
        if ok && parser.check(TokenKind::RBracket) && parser.peek_at(1).kind == TokenKind::LParen {
            parser.advance(); // ]
            return parse_call(parser, left, type_args, span);
        }
        parser.rewind(mark);
    }

    parser.advance(); // [
    let index = parse_expression(parser)?;
    parser.consume(TokenKind::RBracket, "']' after index")?;
    Ok(Expression::Index(IndexExpr {
        object: Box::new(left),
        index: Box::new(index),
        span,
    }))
}

fn parse_call(
    parser: &mut Parser,
    callee: Expression,
    type_args: Vec<String>,
    span: Span,
) -> Result<Expression, ParseError> {
    parser.consume(TokenKind::LParen, "'(' to open call")?;
    let mut args = Vec::new();
    let mut named_args = Vec::new();

    let was_suppressed = parser.no_record_literal;
    parser.no_record_literal = false;
    let result = (|| -> Result<(), ParseError> {
        if !parser.check(TokenKind::RParen) {
            loop {
                parser.skip_newlines();
                // Named argument: `name: expr`
                if parser.check(TokenKind::Identifier)
                    && parser.peek_at(1).kind == TokenKind::Colon
                    && parser.peek_at(2).kind != TokenKind::Colon
                {
                    let name = parser.advance().lexeme;
                    parser.advance(); // :
                    let value = parse_expression(parser)?;
                    named_args.push((name, value));
                } else {
                    args.push(parse_expression(parser)?);
                }
                parser.skip_newlines();
                if !parser.eat(TokenKind::Comma) {
                    break;
                }
            }
        }
        parser.consume(TokenKind::RParen, "')' after call arguments")?;
        Ok(())
    })();
    parser.no_record_literal = was_suppressed;
    result?;

    // Type metadata queries keep their dedicated node
    if let Some(name) = callee.as_identifier() {
        let query = match name {
            "sizeof" => Some(MetaQuery::SizeOf),
            "alignof" => Some(MetaQuery::AlignOf),
            "is_pod" => Some(MetaQuery::IsPod),
            "is_primitive" => Some(MetaQuery::IsPrimitive),
            _ => None,
        };
        if let Some(query) = query {
            if args.len() == 1 && named_args.is_empty() {
                let ty = match &args[0] {
                    Expression::Identifier(id) => Some(id.name.clone()),
                    Expression::TypeCheck(tc) => Some(tc.ty.clone()),
                    _ => None,
                };
                if let Some(ty) = ty {
                    return Ok(Expression::TypeMetadata(TypeMetadataExpr { query, ty, span }));
                }
            }
        }

        // Concurrency constructor calls
        let sync = match name {
            "make_future" => Some(SyncPrimitive::Future),
            "make_thread_pool" => Some(SyncPrimitive::ThreadPool),
            "make_cancel_token" => Some(SyncPrimitive::CancelToken),
            _ => None,
        };
        if let Some(kind) = sync {
            return Ok(Expression::MakeSync(MakeSyncExpr {
                kind,
                type_arg: type_args.first().cloned(),
                args,
                span,
            }));
        }
    }

    Ok(Expression::Call(CallExpr {
        callee: Box::new(callee),
        args,
        named_args,
        type_args,
        span,
    }))
}

fn parse_record_init(
    parser: &mut Parser,
    left: Expression,
    span: Span,
) -> Result<Expression, ParseError> {
    let name = match left.as_identifier() {
        Some(name) => name.to_string(),
        None => {
            return Err(ParseError::UnexpectedToken {
                found: "{".into(),
                span,
            })
        }
    };
    parser.advance(); // {
    let mut fields = Vec::new();
    parser.skip_newlines();
    if !parser.check(TokenKind::RBrace) {
        loop {
            parser.skip_newlines();
            let field = parser.consume_identifier("field name")?;
            parser.consume(TokenKind::Colon, "':' after field name")?;
            let value = parse_expression(parser)?;
            fields.push((field, value));
            parser.skip_newlines();
            if !parser.eat(TokenKind::Comma) {
                break;
            }
            parser.skip_newlines();
            if parser.check(TokenKind::RBrace) {
                break;
            }
        }
    }
    parser.skip_newlines();
    parser.consume(TokenKind::RBrace, "'}' after record fields")?;
    Ok(Expression::RecordInit(RecordInitExpr { name, fields, span }))
}

fn parse_new(parser: &mut Parser, span: Span) -> Result<Expression, ParseError> {
    let type_name = parser.consume_identifier("type name after 'new'")?;
    let mut args = Vec::new();
    if parser.eat(TokenKind::LParen) {
        if !parser.check(TokenKind::RParen) {
            loop {
                args.push(parse_expression(parser)?);
                if !parser.eat(TokenKind::Comma) {
                    break;
                }
            }
        }
        parser.consume(TokenKind::RParen, "')' after new arguments")?;
    } else if parser.eat(TokenKind::LBrace) {
        if !parser.check(TokenKind::RBrace) {
            loop {
                args.push(parse_expression(parser)?);
                if !parser.eat(TokenKind::Comma) {
                    break;
                }
            }
        }
        parser.consume(TokenKind::RBrace, "'}' after new initializer")?;
    }
    Ok(Expression::New(NewExpr {
        type_name,
        args,
        span,
    }))
}

fn parse_primary(parser: &mut Parser) -> Result<Expression, ParseError> {
    let span = parser.current_span();
    match parser.current_kind() {
        TokenKind::Integer => {
            let token = parser.advance();
            Ok(Expression::int(token.literal.as_int().unwrap_or(0), span))
        }
        TokenKind::Float => {
            let token = parser.advance();
            Ok(Expression::float(
                token.literal.as_float().unwrap_or(0.0),
                span,
            ))
        }
        TokenKind::True => {
            parser.advance();
            Ok(Expression::boolean(true, span))
        }
        TokenKind::False => {
            parser.advance();
            Ok(Expression::boolean(false, span))
        }
        TokenKind::Nil => {
            parser.advance();
            Ok(Expression::NilLiteral(span))
        }
        TokenKind::Char => {
            let token = parser.advance();
            Ok(Expression::CharLiteral(CharLiteral {
                value: token.literal.as_int().unwrap_or(0),
                span,
            }))
        }
        TokenKind::ByteString | TokenKind::RawByteString => {
            let token = parser.advance();
            Ok(Expression::ByteStringLiteral(ByteStringLiteral {
                value: token.literal.as_str().unwrap_or_default().to_string(),
                raw: token.kind == TokenKind::RawByteString,
                span,
            }))
        }
        TokenKind::Str => {
            let token = parser.advance();
            let value = token.literal.as_str().unwrap_or_default().to_string();
            if value.contains(INTERP_START) {
                parse_interpolated(parser, &value, span)
            } else {
                Ok(Expression::string(value, span))
            }
        }
        TokenKind::Identifier => {
            let token = parser.advance();
            Ok(Expression::ident(token.lexeme, span))
        }
        TokenKind::SelfKw => {
            parser.advance();
            Ok(Expression::ident("self", span))
        }
        TokenKind::Underscore => {
            parser.advance();
            Ok(Expression::Placeholder(span))
        }
        TokenKind::LParen => {
            parser.advance();
            // `(a, b) => body` lambda heads are recognised by scanning for
            // the arrow after the matching paren.
            if let Some(lambda) = try_parse_paren_lambda(parser, span)? {
                return Ok(lambda);
            }
            let expr = parse_expression(parser)?;
            parser.consume(TokenKind::RParen, "')' after expression")?;
            Ok(expr)
        }
        TokenKind::LBracket => parse_list_or_comprehension(parser, span),
        TokenKind::LBrace => parse_map_literal(parser, span),
        TokenKind::Pipe => parse_bar_lambda(parser, span),
        TokenKind::PipePipe => {
            parser.advance();
            let body = parse_precedence(parser, Precedence::Assignment)?;
            Ok(Expression::Lambda(LambdaExpr {
                params: Vec::new(),
                body: Box::new(body),
                span,
            }))
        }
        TokenKind::Chan => parse_chan_constructor(parser, span),
        TokenKind::Mutex => parse_sync_constructor(parser, SyncPrimitive::Mutex, span),
        TokenKind::RwLock => parse_sync_constructor(parser, SyncPrimitive::RwLock, span),
        TokenKind::Cond => parse_sync_constructor(parser, SyncPrimitive::Cond, span),
        TokenKind::Semaphore => parse_sync_constructor(parser, SyncPrimitive::Semaphore, span),
        TokenKind::Atomic => parse_atomic_constructor(parser, span),
        TokenKind::Box => parse_smart_ptr(parser, SmartPtrKind::Box, span),
        TokenKind::Rc => parse_smart_ptr(parser, SmartPtrKind::Rc, span),
        TokenKind::Arc => parse_smart_ptr(parser, SmartPtrKind::Arc, span),
        TokenKind::WeakPtr => parse_smart_ptr(parser, SmartPtrKind::Weak, span),
        TokenKind::Cell => parse_smart_ptr(parser, SmartPtrKind::Cell, span),
        TokenKind::RefCell => parse_smart_ptr(parser, SmartPtrKind::RefCell, span),
        TokenKind::Perform => parse_perform(parser, span),
        TokenKind::Resume => {
            parser.advance();
            let value = if can_start_expression(parser.current_kind()) {
                Some(Box::new(parse_precedence(parser, Precedence::Ternary)?))
            } else {
                None
            };
            Ok(Expression::Resume(ResumeExpr { value, span }))
        }
        _ => Err(ParseError::ExpectedExpression {
            found: parser.current().lexeme.clone(),
            span,
        }),
    }
}

/// Decode the `\x01 expr \x02` interpolation segments, re-lexing each
/// embedded expression source.
fn parse_interpolated(
    parser: &mut Parser,
    encoded: &str,
    span: Span,
) -> Result<Expression, ParseError> {
    let mut parts = Vec::new();
    let mut text = String::new();
    let mut chars = encoded.chars();
    while let Some(c) = chars.next() {
        if c == INTERP_START {
            if !text.is_empty() {
                parts.push(InterpPart::Text(std::mem::take(&mut text)));
            }
            let mut expr_src = String::new();
            for e in chars.by_ref() {
                if e == INTERP_END {
                    break;
                }
                expr_src.push(e);
            }
            let expr = parse_embedded_expression(parser, &expr_src, span)?;
            parts.push(InterpPart::Expr(Box::new(expr)));
        } else {
            text.push(c);
        }
    }
    if !text.is_empty() {
        parts.push(InterpPart::Text(text));
    }
    Ok(Expression::Interpolated(InterpolatedString { parts, span }))
}

fn parse_embedded_expression(
    parser: &Parser,
    source: &str,
    span: Span,
) -> Result<Expression, ParseError> {
    let tokens = crate::parser::lexer::Lexer::new(source, parser.filename())
        .tokenize()
        .map_err(|_| ParseError::ExpectedExpression {
            found: source.to_string(),
            span,
        })?;
    let mut sub = Parser::new(tokens, source, parser.filename());
    let expr = parse_expression(&mut sub)?;
    Ok(expr)
}

fn try_parse_paren_lambda(
    parser: &mut Parser,
    span: Span,
) -> Result<Option<Expression>, ParseError> {
    // Look ahead: identifiers separated by commas, ')' then '=>'.
    let mut offset = 0;
    loop {
        let kind = parser.peek_at(offset).kind;
        if kind == TokenKind::RParen {
            if parser.peek_at(offset + 1).kind == TokenKind::DoubleArrow {
                break;
            }
            return Ok(None);
        }
        match kind {
            TokenKind::Identifier | TokenKind::Comma | TokenKind::Underscore => offset += 1,
            _ => return Ok(None),
        }
        if offset > 64 {
            return Ok(None);
        }
    }

    let mut params = Vec::new();
    while !parser.check(TokenKind::RParen) {
        let p_span = parser.current_span();
        let name = if parser.check(TokenKind::Underscore) {
            parser.advance();
            "_".to_string()
        } else {
            parser.consume_identifier("lambda parameter")?
        };
        params.push(Param::new(name, "", p_span));
        if !parser.eat(TokenKind::Comma) {
            break;
        }
    }
    parser.consume(TokenKind::RParen, "')' after lambda parameters")?;
    parser.consume(TokenKind::DoubleArrow, "'=>' after lambda parameters")?;
    let body = parse_precedence(parser, Precedence::Assignment)?;
    Ok(Some(Expression::Lambda(LambdaExpr {
        params,
        body: Box::new(body),
        span,
    })))
}

fn parse_bar_lambda(parser: &mut Parser, span: Span) -> Result<Expression, ParseError> {
    parser.advance(); // |
    let mut params = Vec::new();
    if !parser.check(TokenKind::Pipe) {
        loop {
            let p_span = parser.current_span();
            let name = if parser.check(TokenKind::Underscore) {
                parser.advance();
                "_".to_string()
            } else {
                parser.consume_identifier("lambda parameter")?
            };
            let ty = if parser.eat(TokenKind::Colon) {
                parse_type(parser)?
            } else {
                String::new()
            };
            params.push(Param::new(name, ty, p_span));
            if !parser.eat(TokenKind::Comma) {
                break;
            }
        }
    }
    parser.consume(TokenKind::Pipe, "'|' after lambda parameters")?;
    let body = parse_precedence(parser, Precedence::Assignment)?;
    Ok(Expression::Lambda(LambdaExpr {
        params,
        body: Box::new(body),
        span,
    }))
}

fn parse_list_or_comprehension(parser: &mut Parser, span: Span) -> Result<Expression, ParseError> {
    parser.advance(); // [
    parser.skip_newlines();
    if parser.eat(TokenKind::RBracket) {
        return Ok(Expression::List(ListExpr {
            elements: Vec::new(),
            span,
        }));
    }

    let first = parse_expression(parser)?;

    // `[expr for x in iter if cond]`
    if parser.eat(TokenKind::For) {
        let var = parser.consume_identifier("comprehension variable")?;
        parser.consume(TokenKind::In, "'in' in list comprehension")?;
        let iterable = parse_expression(parser)?;
        let condition = if parser.eat(TokenKind::If) {
            Some(Box::new(parse_expression(parser)?))
        } else {
            None
        };
        parser.consume(TokenKind::RBracket, "']' after comprehension")?;
        return Ok(Expression::ListComprehension(ListComprehensionExpr {
            element: Box::new(first),
            var,
            iterable: Box::new(iterable),
            condition,
            span,
        }));
    }

    let mut elements = vec![first];
    while parser.eat(TokenKind::Comma) {
        parser.skip_newlines();
        if parser.check(TokenKind::RBracket) {
            break;
        }
        elements.push(parse_expression(parser)?);
    }
    parser.skip_newlines();
    parser.consume(TokenKind::RBracket, "']' after list")?;
    Ok(Expression::List(ListExpr { elements, span }))
}

fn parse_map_literal(parser: &mut Parser, span: Span) -> Result<Expression, ParseError> {
    parser.advance(); // {
    let mut entries = Vec::new();
    parser.skip_newlines();
    if !parser.check(TokenKind::RBrace) {
        loop {
            parser.skip_newlines();
            let key = parse_expression(parser)?;
            parser.consume(TokenKind::Colon, "':' after map key")?;
            let value = parse_expression(parser)?;
            entries.push((key, value));
            parser.skip_newlines();
            if !parser.eat(TokenKind::Comma) {
                break;
            }
            parser.skip_newlines();
            if parser.check(TokenKind::RBrace) {
                break;
            }
        }
    }
    parser.skip_newlines();
    parser.consume(TokenKind::RBrace, "'}' after map literal")?;
    Ok(Expression::MapLiteral(MapLiteralExpr { entries, span }))
}

fn parse_chan_constructor(parser: &mut Parser, span: Span) -> Result<Expression, ParseError> {
    parser.advance(); // chan
    parser.consume(TokenKind::LBracket, "'[' after 'chan'")?;
    let elem_type = parse_type(parser)?;
    let capacity = if parser.eat(TokenKind::Comma) {
        Some(Box::new(parse_expression(parser)?))
    } else {
        None
    };
    parser.consume(TokenKind::RBracket, "']' after channel type")?;
    // Optional trailing `()` constructor call form
    if parser.eat(TokenKind::LParen) {
        parser.consume(TokenKind::RParen, "')' after channel constructor")?;
    }
    Ok(Expression::MakeChannel(MakeChannelExpr {
        elem_type,
        capacity,
        span,
    }))
}

fn parse_sync_constructor(
    parser: &mut Parser,
    kind: SyncPrimitive,
    span: Span,
) -> Result<Expression, ParseError> {
    parser.advance();
    let type_arg = if parser.eat(TokenKind::LBracket) {
        let ty = parse_type(parser)?;
        parser.consume(TokenKind::RBracket, "']' after type argument")?;
        Some(ty)
    } else {
        None
    };
    let mut args = Vec::new();
    if parser.eat(TokenKind::LParen) {
        if !parser.check(TokenKind::RParen) {
            loop {
                args.push(parse_expression(parser)?);
                if !parser.eat(TokenKind::Comma) {
                    break;
                }
            }
        }
        parser.consume(TokenKind::RParen, "')' after constructor arguments")?;
    }
    Ok(Expression::MakeSync(MakeSyncExpr {
        kind,
        type_arg,
        args,
        span,
    }))
}

fn parse_atomic_constructor(parser: &mut Parser, span: Span) -> Result<Expression, ParseError> {
    parser.advance(); // Atomic
    parser.consume(TokenKind::LBracket, "'[' after 'Atomic'")?;
    let elem_type = parse_type(parser)?;
    parser.consume(TokenKind::RBracket, "']' after atomic type")?;
    parser.consume(TokenKind::LParen, "'(' after atomic type")?;
    let initial = parse_expression(parser)?;
    parser.consume(TokenKind::RParen, "')' after atomic initialiser")?;
    Ok(Expression::MakeAtomic(MakeAtomicExpr {
        elem_type,
        initial: Box::new(initial),
        span,
    }))
}

fn parse_smart_ptr(
    parser: &mut Parser,
    kind: SmartPtrKind,
    span: Span,
) -> Result<Expression, ParseError> {
    parser.advance();
    let elem_type = if parser.eat(TokenKind::LBracket) {
        let ty = parse_type(parser)?;
        parser.consume(TokenKind::RBracket, "']' after type argument")?;
        Some(ty)
    } else {
        None
    };
    parser.consume(TokenKind::LParen, "'(' after smart pointer constructor")?;
    let value = parse_expression(parser)?;
    parser.consume(TokenKind::RParen, "')' after smart pointer value")?;
    Ok(Expression::MakeSmartPtr(MakeSmartPtrExpr {
        kind,
        elem_type,
        value: Box::new(value),
        span,
    }))
}

fn parse_perform(parser: &mut Parser, span: Span) -> Result<Expression, ParseError> {
    parser.advance(); // perform
    let effect = parser.consume_identifier("effect name after 'perform'")?;
    parser.consume(TokenKind::Dot, "'.' after effect name")?;
    let operation = parser.consume_identifier("operation name")?;
    let mut args = Vec::new();
    if parser.eat(TokenKind::LParen) {
        if !parser.check(TokenKind::RParen) {
            loop {
                args.push(parse_expression(parser)?);
                if !parser.eat(TokenKind::Comma) {
                    break;
                }
            }
        }
        parser.consume(TokenKind::RParen, "')' after operation arguments")?;
    }
    Ok(Expression::Perform(PerformExpr {
        effect,
        operation,
        args,
        span,
    }))
}

/// Whether a parsed expression should be lifted into a `|_it| ...` lambda
/// because it contains the `_` placeholder in a binary/member/call shape.
fn should_lift_placeholder(expr: &Expression) -> bool {
    match expr {
        Expression::Binary(_) | Expression::Member(_) | Expression::Call(_) => {
            contains_placeholder(expr)
        }
        _ => false,
    }
}

fn contains_placeholder(expr: &Expression) -> bool {
    match expr {
        Expression::Placeholder(_) => true,
        Expression::Binary(b) => contains_placeholder(&b.left) || contains_placeholder(&b.right),
        Expression::Unary(u) => contains_placeholder(&u.operand),
        Expression::Member(m) => contains_placeholder(&m.object),
        Expression::Index(i) => contains_placeholder(&i.object) || contains_placeholder(&i.index),
        Expression::Call(c) => {
            contains_placeholder(&c.callee) || c.args.iter().any(contains_placeholder)
        }
        _ => false,
    }
}

fn lift_placeholder(expr: Expression) -> Expression {
    let span = expr.span();
    let body = replace_placeholder(expr, span);
    Expression::Lambda(LambdaExpr {
        params: vec![Param::new("_it", "", span)],
        body: Box::new(body),
        span,
    })
}

fn replace_placeholder(expr: Expression, span: Span) -> Expression {
    match expr {
        Expression::Placeholder(p_span) => Expression::ident("_it", p_span),
        Expression::Binary(mut b) => {
            b.left = Box::new(replace_placeholder(*b.left, span));
            b.right = Box::new(replace_placeholder(*b.right, span));
            Expression::Binary(b)
        }
        Expression::Unary(mut u) => {
            u.operand = Box::new(replace_placeholder(*u.operand, span));
            Expression::Unary(u)
        }
        Expression::Member(mut m) => {
            m.object = Box::new(replace_placeholder(*m.object, span));
            Expression::Member(m)
        }
        Expression::Index(mut i) => {
            i.object = Box::new(replace_placeholder(*i.object, span));
            i.index = Box::new(replace_placeholder(*i.index, span));
            Expression::Index(i)
        }
        Expression::Call(mut c) => {
            c.callee = Box::new(replace_placeholder(*c.callee, span));
            c.args = c
                .args
                .into_iter()
                .map(|a| replace_placeholder(a, span))
                .collect();
            Expression::Call(c)
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_expr(source: &str) -> Expression {
        let tokens = crate::parser::lexer::Lexer::new(source, "t.tyl")
            .tokenize()
            .expect("lex ok");
        let mut parser = Parser::new(tokens, source, "t.tyl");
        parse_expression(&mut parser).expect("parse ok")
    }

    #[test]
    fn precedence_of_mul_over_add() {
        let expr = parse_expr("2 + 3 * 4");
        if let Expression::Binary(b) = &expr {
            assert_eq!(b.op, BinOp::Add);
            assert!(matches!(b.right.as_ref(), Expression::Binary(inner) if inner.op == BinOp::Mul));
        } else {
            panic!("expected binary expression");
        }
    }

    #[test]
    fn suffix_ternary() {
        let expr = parse_expr("1 if x else 2");
        assert!(matches!(expr, Expression::Ternary(_)));
    }

    #[test]
    fn classic_ternary_vs_propagate() {
        assert!(matches!(parse_expr("c ? a : b"), Expression::Ternary(_)));
        assert!(matches!(parse_expr("f(x)?"), Expression::Propagate(_)));
    }

    #[test]
    fn ranges() {
        let expr = parse_expr("1..=5");
        if let Expression::Range(r) = expr {
            assert!(r.inclusive);
        } else {
            panic!("expected range");
        }
    }

    #[test]
    fn safe_navigation() {
        let expr = parse_expr("a?.b");
        if let Expression::Member(m) = expr {
            assert!(m.safe);
            assert_eq!(m.field, "b");
        } else {
            panic!("expected member");
        }
    }

    #[test]
    fn pipe_operator() {
        let expr = parse_expr("xs |> sum");
        assert!(matches!(expr, Expression::Binary(b) if b.op == BinOp::Pipe));
    }

    #[test]
    fn spaceship() {
        let expr = parse_expr("a <=> b");
        assert!(matches!(expr, Expression::Binary(b) if b.op == BinOp::Spaceship));
    }

    #[test]
    fn chan_send_and_recv() {
        assert!(matches!(parse_expr("ch <- 1"), Expression::ChanSend(_)));
        assert!(matches!(parse_expr("<- ch"), Expression::ChanRecv(_)));
    }

    #[test]
    fn placeholder_lifts_to_lambda() {
        let expr = parse_expr("_ > 3");
        if let Expression::Lambda(l) = expr {
            assert_eq!(l.params.len(), 1);
            assert_eq!(l.params[0].name, "_it");
            assert!(matches!(l.body.as_ref(), Expression::Binary(_)));
        } else {
            panic!("expected lambda, got {:?}", expr);
        }
    }

    #[test]
    fn bar_lambda() {
        let expr = parse_expr("|x, y| x + y");
        if let Expression::Lambda(l) = expr {
            assert_eq!(l.params.len(), 2);
        } else {
            panic!("expected lambda");
        }
    }

    #[test]
    fn interpolated_string_recovers_expression() {
        let expr = parse_expr(r#""sum: {a + b}!""#);
        if let Expression::Interpolated(interp) = expr {
            assert_eq!(interp.parts.len(), 3);
            assert!(matches!(interp.parts[0], InterpPart::Text(ref t) if t == "sum: "));
            assert!(matches!(interp.parts[1], InterpPart::Expr(_)));
            assert!(matches!(interp.parts[2], InterpPart::Text(ref t) if t == "!"));
        } else {
            panic!("expected interpolated string");
        }
    }

    #[test]
    fn record_construction_after_identifier() {
        let expr = parse_expr("Point { x: 1, y: 2 }");
        if let Expression::RecordInit(init) = expr {
            assert_eq!(init.name, "Point");
            assert_eq!(init.fields.len(), 2);
        } else {
            panic!("expected record init");
        }
    }

    #[test]
    fn call_with_type_args_vs_index() {
        let expr = parse_expr("max[int](1, 2)");
        if let Expression::Call(call) = expr {
            assert_eq!(call.type_args, vec!["int".to_string()]);
        } else {
            panic!("expected call");
        }
        assert!(matches!(parse_expr("xs[0]"), Expression::Index(_)));
    }

    #[test]
    fn named_call_arguments() {
        let expr = parse_expr("f(x: 1, 2)");
        if let Expression::Call(call) = expr {
            assert_eq!(call.named_args.len(), 1);
            assert_eq!(call.args.len(), 1);
        } else {
            panic!("expected call");
        }
    }

    #[test]
    fn smart_pointer_constructors() {
        assert!(matches!(
            parse_expr("Box(42)"),
            Expression::MakeSmartPtr(p) if p.kind == SmartPtrKind::Box
        ));
        assert!(matches!(
            parse_expr("Rc[int](1)"),
            Expression::MakeSmartPtr(p) if p.kind == SmartPtrKind::Rc && p.elem_type.as_deref() == Some("int")
        ));
    }

    #[test]
    fn atomic_and_channel_constructors() {
        assert!(matches!(
            parse_expr("Atomic[int](0)"),
            Expression::MakeAtomic(a) if a.elem_type == "int"
        ));
        let chan = parse_expr("chan[int, 8]");
        if let Expression::MakeChannel(c) = chan {
            assert_eq!(c.elem_type, "int");
            assert!(c.capacity.is_some());
        } else {
            panic!("expected channel constructor");
        }
    }

    #[test]
    fn type_metadata_queries() {
        assert!(matches!(
            parse_expr("sizeof(int)"),
            Expression::TypeMetadata(m) if m.query == MetaQuery::SizeOf && m.ty == "int"
        ));
    }

    #[test]
    fn list_comprehension() {
        let expr = parse_expr("[x * 2 for x in xs if x > 0]");
        assert!(matches!(expr, Expression::ListComprehension(_)));
    }

    #[test]
    fn cast_expression() {
        let expr = parse_expr("x as float");
        assert!(matches!(expr, Expression::Cast(c) if c.target_type == "float"));
    }

    #[test]
    fn is_type_check() {
        let expr = parse_expr("x is int");
        assert!(matches!(expr, Expression::TypeCheck(t) if t.ty == "int"));
    }
}
