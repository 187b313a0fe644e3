//! Expression AST nodes.
//!
//! Includes the literal kinds, operators, calls and member access,
//! ranges/lists/records/maps, lambdas and comprehensions, pointer and
//! borrow forms, concurrency constructors, effect primitives, and the
//! compile-time type metadata queries.

use super::Param;
use crate::parser::token::Span;

/// Binary operators. User-defined infix operators ride through as
/// [`BinOp::Custom`] until the macro expander rewrites them into calls.
#[derive(Debug, Clone, PartialEq)]
pub enum BinOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
    And,
    Or,
    BitAnd,
    BitOr,
    BitXor,
    /// Shifts are produced by strength reduction, not by the grammar.
    Shl,
    Shr,
    NullCoalesce,
    Pipe,
    Spaceship,
    Custom(String),
}

impl BinOp {
    /// True for operators where `a op b == b op a` over integers; used by
    /// CSE hashing to normalise operand order.
    pub fn is_commutative(&self) -> bool {
        matches!(
            self,
            BinOp::Add | BinOp::Mul | BinOp::Eq | BinOp::Ne | BinOp::And | BinOp::Or
                | BinOp::BitAnd
                | BinOp::BitOr
                | BinOp::BitXor
        )
    }
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnOp {
    Neg,
    /// Both `!x` and `not x`.
    Not,
    BitNot,
}

/// Assignment operators (simple and compound).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AssignOp {
    Assign,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

/// One segment of an interpolated string.
#[derive(Debug, Clone, PartialEq)]
pub enum InterpPart {
    Text(String),
    Expr(Box<Expression>),
}

/// Concurrency primitive constructors (`make_future()`, `chan[T]`, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPrimitive {
    Future,
    ThreadPool,
    CancelToken,
    Mutex,
    RwLock,
    Cond,
    Semaphore,
}

/// Smart pointer families with dedicated memory layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SmartPtrKind {
    Box,
    Rc,
    Arc,
    Weak,
    Cell,
    RefCell,
}

impl SmartPtrKind {
    pub fn name(&self) -> &'static str {
        match self {
            SmartPtrKind::Box => "Box",
            SmartPtrKind::Rc => "Rc",
            SmartPtrKind::Arc => "Arc",
            SmartPtrKind::Weak => "Weak",
            SmartPtrKind::Cell => "Cell",
            SmartPtrKind::RefCell => "RefCell",
        }
    }
}

/// Compile-time type metadata queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetaQuery {
    SizeOf,
    AlignOf,
    IsPod,
    IsPrimitive,
}

/// Expression (produces a value).
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// Integer literal: `42`, `7i32`
    IntLiteral(IntLiteral),
    /// Float literal: `3.14`, `1e10`
    FloatLiteral(FloatLiteral),
    /// `true` / `false`
    BoolLiteral(BoolLiteral),
    /// `nil`
    NilLiteral(Span),
    /// Char literal as a 32-bit scalar: `'A'`, `'\u{1F600}'`
    CharLiteral(CharLiteral),
    /// String literal without interpolation
    StringLiteral(StringLiteral),
    /// `b"..."` / `br"..."`
    ByteStringLiteral(ByteStringLiteral),
    /// String with `{expr}` segments
    Interpolated(InterpolatedString),
    /// Identifier reference
    Identifier(Identifier),
    /// `a + b`, `x |> f`, user `a ⊕ b`
    Binary(BinaryExpr),
    /// `-x`, `!x`, `not x`, `~x`
    Unary(UnaryExpr),
    /// `c ? a : b` and `a if c else b` both normalise here
    Ternary(TernaryExpr),
    /// `x = v`, `x += v`, ...
    Assign(AssignExpr),
    /// `f(a, b)`, `f[T](a)`, `f(x: 1)`
    Call(CallExpr),
    /// `obj.field` / `obj?.field`
    Member(MemberExpr),
    /// `xs[i]`
    Index(IndexExpr),
    /// `a..b` / `a..=b`
    Range(RangeExpr),
    /// `[a, b, c]`
    List(ListExpr),
    /// `Point { x: 1, y: 2 }`
    RecordInit(RecordInitExpr),
    /// `{ "k": v, ... }`
    MapLiteral(MapLiteralExpr),
    /// `|x| x + 1` and `x => x + 1`
    Lambda(LambdaExpr),
    /// `[f(x) for x in xs if p(x)]`
    ListComprehension(ListComprehensionExpr),
    /// `&expr` (plain address-of)
    AddressOf(AddressOfExpr),
    /// `&mut expr`
    Borrow(BorrowExpr),
    /// `*expr`
    Deref(DerefExpr),
    /// `expr as T`
    Cast(CastExpr),
    /// `new T(args)` / `new T{...}`
    New(NewExpr),
    /// Postfix `expr?`
    Propagate(PropagateExpr),
    /// `expr is T`
    TypeCheck(TypeCheckExpr),
    /// `ch <- v`
    ChanSend(ChanSendExpr),
    /// `<- ch`
    ChanRecv(ChanRecvExpr),
    /// `await expr`
    Await(AwaitExpr),
    /// `spawn expr`
    Spawn(SpawnExpr),
    /// `chan[T]` / `chan[T, N]`
    MakeChannel(MakeChannelExpr),
    /// `make_future()`, `make_thread_pool(n)`, `Mutex[T](v)`, ...
    MakeSync(MakeSyncExpr),
    /// `Atomic[T](v)`
    MakeAtomic(MakeAtomicExpr),
    /// `Box(v)`, `Rc[T](v)`, ...
    MakeSmartPtr(MakeSmartPtrExpr),
    /// `perform Effect.op(args)`
    Perform(PerformExpr),
    /// `resume value`
    Resume(ResumeExpr),
    /// `_` placeholder (rewritten into a lambda by the parser outside
    /// constraint contexts)
    Placeholder(Span),
    /// `sizeof(T)`, `alignof(T)`, `is_pod(T)`, `is_primitive(T)`
    TypeMetadata(TypeMetadataExpr),
}

#[derive(Debug, Clone, PartialEq)]
pub struct IntLiteral {
    pub value: i64,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FloatLiteral {
    pub value: f64,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BoolLiteral {
    pub value: bool,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CharLiteral {
    /// Unicode scalar value.
    pub value: i64,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StringLiteral {
    pub value: String,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ByteStringLiteral {
    /// Bytes stored one-per-char (latin-1 mapping).
    pub value: String,
    pub raw: bool,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InterpolatedString {
    /// Alternating text fragments and embedded expressions, in order.
    pub parts: Vec<InterpPart>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Identifier {
    pub name: String,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BinaryExpr {
    pub op: BinOp,
    pub left: Box<Expression>,
    pub right: Box<Expression>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnaryExpr {
    pub op: UnOp,
    pub operand: Box<Expression>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TernaryExpr {
    pub condition: Box<Expression>,
    pub then_expr: Box<Expression>,
    pub else_expr: Box<Expression>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AssignExpr {
    pub target: Box<Expression>,
    pub op: AssignOp,
    pub value: Box<Expression>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CallExpr {
    pub callee: Box<Expression>,
    pub args: Vec<Expression>,
    /// `f(x: 1, y: 2)` named arguments, in source order.
    pub named_args: Vec<(String, Expression)>,
    /// Raw type-argument strings for `f[T](..)` calls.
    pub type_args: Vec<String>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MemberExpr {
    pub object: Box<Expression>,
    pub field: String,
    /// True for `?.` safe navigation.
    pub safe: bool,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IndexExpr {
    pub object: Box<Expression>,
    pub index: Box<Expression>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RangeExpr {
    pub start: Box<Expression>,
    pub end: Box<Expression>,
    pub inclusive: bool,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListExpr {
    pub elements: Vec<Expression>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordInitExpr {
    pub name: String,
    pub fields: Vec<(String, Expression)>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MapLiteralExpr {
    pub entries: Vec<(Expression, Expression)>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LambdaExpr {
    pub params: Vec<Param>,
    pub body: Box<Expression>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ListComprehensionExpr {
    pub element: Box<Expression>,
    pub var: String,
    pub iterable: Box<Expression>,
    pub condition: Option<Box<Expression>>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AddressOfExpr {
    pub operand: Box<Expression>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BorrowExpr {
    pub operand: Box<Expression>,
    pub mutable: bool,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DerefExpr {
    pub operand: Box<Expression>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CastExpr {
    pub expr: Box<Expression>,
    pub target_type: String,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewExpr {
    pub type_name: String,
    pub args: Vec<Expression>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PropagateExpr {
    pub operand: Box<Expression>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeCheckExpr {
    pub expr: Box<Expression>,
    pub ty: String,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChanSendExpr {
    pub channel: Box<Expression>,
    pub value: Box<Expression>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChanRecvExpr {
    pub channel: Box<Expression>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AwaitExpr {
    pub operand: Box<Expression>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SpawnExpr {
    pub operand: Box<Expression>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MakeChannelExpr {
    pub elem_type: String,
    pub capacity: Option<Box<Expression>>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MakeSyncExpr {
    pub kind: SyncPrimitive,
    pub type_arg: Option<String>,
    pub args: Vec<Expression>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MakeAtomicExpr {
    pub elem_type: String,
    pub initial: Box<Expression>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MakeSmartPtrExpr {
    pub kind: SmartPtrKind,
    pub elem_type: Option<String>,
    pub value: Box<Expression>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PerformExpr {
    pub effect: String,
    pub operation: String,
    pub args: Vec<Expression>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResumeExpr {
    pub value: Option<Box<Expression>>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeMetadataExpr {
    pub query: MetaQuery,
    pub ty: String,
    pub span: Span,
}

impl Expression {
    /// Get the span of this expression.
    pub fn span(&self) -> Span {
        match self {
            Expression::IntLiteral(e) => e.span,
            Expression::FloatLiteral(e) => e.span,
            Expression::BoolLiteral(e) => e.span,
            Expression::NilLiteral(span) => *span,
            Expression::CharLiteral(e) => e.span,
            Expression::StringLiteral(e) => e.span,
            Expression::ByteStringLiteral(e) => e.span,
            Expression::Interpolated(e) => e.span,
            Expression::Identifier(e) => e.span,
            Expression::Binary(e) => e.span,
            Expression::Unary(e) => e.span,
            Expression::Ternary(e) => e.span,
            Expression::Assign(e) => e.span,
            Expression::Call(e) => e.span,
            Expression::Member(e) => e.span,
            Expression::Index(e) => e.span,
            Expression::Range(e) => e.span,
            Expression::List(e) => e.span,
            Expression::RecordInit(e) => e.span,
            Expression::MapLiteral(e) => e.span,
            Expression::Lambda(e) => e.span,
            Expression::ListComprehension(e) => e.span,
            Expression::AddressOf(e) => e.span,
            Expression::Borrow(e) => e.span,
            Expression::Deref(e) => e.span,
            Expression::Cast(e) => e.span,
            Expression::New(e) => e.span,
            Expression::Propagate(e) => e.span,
            Expression::TypeCheck(e) => e.span,
            Expression::ChanSend(e) => e.span,
            Expression::ChanRecv(e) => e.span,
            Expression::Await(e) => e.span,
            Expression::Spawn(e) => e.span,
            Expression::MakeChannel(e) => e.span,
            Expression::MakeSync(e) => e.span,
            Expression::MakeAtomic(e) => e.span,
            Expression::MakeSmartPtr(e) => e.span,
            Expression::Perform(e) => e.span,
            Expression::Resume(e) => e.span,
            Expression::Placeholder(span) => *span,
            Expression::TypeMetadata(e) => e.span,
        }
    }

    /// Check if this expression is a scalar literal (int, float, bool,
    /// string, char, nil).
    pub fn is_literal(&self) -> bool {
        matches!(
            self,
            Expression::IntLiteral(_)
                | Expression::FloatLiteral(_)
                | Expression::BoolLiteral(_)
                | Expression::CharLiteral(_)
                | Expression::StringLiteral(_)
                | Expression::NilLiteral(_)
        )
    }

    /// The identifier name, if this is a plain identifier.
    pub fn as_identifier(&self) -> Option<&str> {
        match self {
            Expression::Identifier(id) => Some(&id.name),
            _ => None,
        }
    }

    /// Integer value, if this is an integer literal.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Expression::IntLiteral(lit) => Some(lit.value),
            _ => None,
        }
    }

    /// `obj.method(args)` decomposition: a call whose callee is a member
    /// access. Returns (object, method name, args).
    pub fn as_method_call(&self) -> Option<(&Expression, &str, &[Expression])> {
        if let Expression::Call(call) = self {
            if let Expression::Member(member) = call.callee.as_ref() {
                return Some((member.object.as_ref(), &member.field, &call.args));
            }
        }
        None
    }

    /// Convenience constructors for synthesised nodes.
    pub fn int(value: i64, span: Span) -> Expression {
        Expression::IntLiteral(IntLiteral { value, span })
    }

    pub fn float(value: f64, span: Span) -> Expression {
        Expression::FloatLiteral(FloatLiteral { value, span })
    }

    pub fn boolean(value: bool, span: Span) -> Expression {
        Expression::BoolLiteral(BoolLiteral { value, span })
    }

    pub fn string(value: impl Into<String>, span: Span) -> Expression {
        Expression::StringLiteral(StringLiteral {
            value: value.into(),
            span,
        })
    }

    pub fn ident(name: impl Into<String>, span: Span) -> Expression {
        Expression::Identifier(Identifier {
            name: name.into(),
            span,
        })
    }

    pub fn binary(op: BinOp, left: Expression, right: Expression, span: Span) -> Expression {
        Expression::Binary(BinaryExpr {
            op,
            left: Box::new(left),
            right: Box::new(right),
            span,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn method_call_decomposition() {
        let span = Span::synthetic();
        let expr = Expression::Call(CallExpr {
            callee: Box::new(Expression::Member(MemberExpr {
                object: Box::new(Expression::ident("p", span)),
                field: "clone".into(),
                safe: false,
                span,
            })),
            args: vec![],
            named_args: vec![],
            type_args: vec![],
            span,
        });
        let (obj, method, args) = expr.as_method_call().unwrap();
        assert_eq!(obj.as_identifier(), Some("p"));
        assert_eq!(method, "clone");
        assert!(args.is_empty());
    }

    #[test]
    fn commutativity() {
        assert!(BinOp::Add.is_commutative());
        assert!(BinOp::Mul.is_commutative());
        assert!(!BinOp::Sub.is_commutative());
        assert!(!BinOp::Div.is_commutative());
    }
}
