//! Statement and declaration AST nodes.
//!
//! Declarations are statements in Tyl: a compilation unit is an ordered
//! statement list, and `fn`/`record`/`trait`/... may appear anywhere a
//! statement may.

use super::{CallingConv, Expression, FnFlags, GenericParam, Param, ReprKind};
use crate::parser::token::Span;

/// Statement (performs an action or declares something).
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// `{ ... }` or indented block used as a statement
    Block(BlockStmt),
    /// Bare expression in statement position
    Expression(ExpressionStmt),
    /// `let x = v`, `mut x = v`, `const X :: v`
    VarDecl(VarDecl),
    /// `mut x = mut y = v` chains collapsed into one declaration
    MultiVarDecl(MultiVarDecl),
    /// `let (a, b) = v` / `let {x, y} = v`
    Destructuring(DestructuringDecl),
    /// `if` / `elif` / `else`
    If(IfStmt),
    /// `if let pat = v:`
    IfLet(IfLetStmt),
    /// `unless cond:` (sugar for `if not cond`)
    Unless(UnlessStmt),
    While(WhileStmt),
    For(ForStmt),
    /// `loop:` infinite loop
    Loop(LoopStmt),
    Match(MatchStmt),
    Return(ReturnStmt),
    Break(BreakStmt),
    Continue(ContinueStmt),
    /// `delete expr`
    Delete(DeleteStmt),
    /// `lock m: body` — acquire/release on every exit path
    Lock(LockStmt),
    /// `with acquire as name: body`
    With(WithStmt),
    /// `scope label: body` / `scope timeout N: body`
    Scope(ScopeStmt),
    /// `require cond` contract
    Require(RequireStmt),
    /// `ensure cond` contract
    Ensure(EnsureStmt),
    /// `comptime: body`
    ComptimeBlock(ComptimeBlockStmt),
    /// `comptime assert cond`
    ComptimeAssert(ComptimeAssertStmt),
    /// `handle Effect: body` — install handlers for an effect's
    /// operations around the body
    Handle(HandleStmt),
    /// Captured DSL block (`sql:`, `html:`, user `syntax` names) before
    /// expansion
    DslBlock(DslBlockStmt),
    /// `unsafe: body`
    Unsafe(UnsafeBlockStmt),
    /// `asm: ...` raw inline assembly text
    InlineAsm(InlineAsmStmt),

    // Declarations
    Fn(FnDecl),
    Record(RecordDecl),
    Union(UnionDecl),
    Enum(EnumDecl),
    TypeAlias(TypeAliasDecl),
    Trait(TraitDecl),
    Impl(ImplDecl),
    Concept(ConceptDecl),
    Effect(EffectDecl),
    Use(UseDecl),
    Module(ModuleDecl),
    ExternBlock(ExternBlockDecl),
    Macro(MacroDecl),
    /// `macro infix "op" prec => fn`
    InfixMacro(InfixMacroDecl),
    /// `syntax NAME [=> transformer]`
    SyntaxMacro(SyntaxMacroDecl),
    Layer(LayerDecl),
}

#[derive(Debug, Clone, PartialEq)]
pub struct BlockStmt {
    pub statements: Vec<Statement>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExpressionStmt {
    pub expression: Expression,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VarDecl {
    pub name: String,
    /// Declared canonical type string; empty when inferred.
    pub type_name: String,
    pub initializer: Option<Expression>,
    pub mutable: bool,
    pub is_const: bool,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MultiVarDecl {
    pub names: Vec<String>,
    pub mutable: bool,
    pub is_const: bool,
    pub initializer: Expression,
    pub span: Span,
}

/// Destructuring target shape.
#[derive(Debug, Clone, PartialEq)]
pub enum DestructurePattern {
    /// `let (a, b) = ...`
    Tuple(Vec<String>),
    /// `let {x, y} = ...`
    Record(Vec<String>),
}

#[derive(Debug, Clone, PartialEq)]
pub struct DestructuringDecl {
    pub pattern: DestructurePattern,
    pub initializer: Expression,
    pub mutable: bool,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct IfStmt {
    pub condition: Expression,
    pub then_branch: Vec<Statement>,
    /// `elif` chains, in order.
    pub elif_branches: Vec<(Expression, Vec<Statement>)>,
    pub else_branch: Option<Vec<Statement>>,
    pub span: Span,
}

/// Patterns usable in `match` arms and `if let`.
#[derive(Debug, Clone, PartialEq)]
pub enum MatchPattern {
    Literal(Expression),
    Range {
        lo: Expression,
        hi: Expression,
        inclusive: bool,
    },
    Wildcard,
    Binding(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct IfLetStmt {
    pub pattern: MatchPattern,
    pub value: Expression,
    pub then_branch: Vec<Statement>,
    pub else_branch: Option<Vec<Statement>>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnlessStmt {
    pub condition: Expression,
    pub body: Vec<Statement>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WhileStmt {
    pub condition: Expression,
    pub body: Vec<Statement>,
    pub label: Option<String>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ForStmt {
    pub var: String,
    pub iterable: Expression,
    pub body: Vec<Statement>,
    pub label: Option<String>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoopStmt {
    pub body: Vec<Statement>,
    pub label: Option<String>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchArm {
    pub pattern: MatchPattern,
    pub guard: Option<Expression>,
    pub body: Vec<Statement>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MatchStmt {
    pub scrutinee: Expression,
    pub arms: Vec<MatchArm>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReturnStmt {
    pub value: Option<Expression>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BreakStmt {
    pub label: Option<String>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContinueStmt {
    pub label: Option<String>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeleteStmt {
    pub target: Expression,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LockStmt {
    pub mutex: Expression,
    pub body: Vec<Statement>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WithStmt {
    pub acquire: Expression,
    pub binding: Option<String>,
    pub body: Vec<Statement>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScopeStmt {
    pub label: Option<String>,
    /// Millisecond timeout for `scope timeout N:`.
    pub timeout: Option<Expression>,
    pub body: Vec<Statement>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RequireStmt {
    pub condition: Expression,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnsureStmt {
    pub condition: Expression,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComptimeBlockStmt {
    pub body: Vec<Statement>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComptimeAssertStmt {
    pub condition: Expression,
    pub message: Option<String>,
    pub span: Span,
}

/// One handler arm of a `handle` block: an effect operation name plus
/// the statements run when it is performed (which may `resume`).
#[derive(Debug, Clone, PartialEq)]
pub struct HandlerArm {
    pub operation: String,
    pub params: Vec<Param>,
    pub body: Vec<Statement>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HandleStmt {
    pub effect: String,
    pub handlers: Vec<HandlerArm>,
    pub body: Vec<Statement>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DslBlockStmt {
    pub name: String,
    /// Verbatim source between INDENT and the matching DEDENT.
    pub content: String,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnsafeBlockStmt {
    pub body: Vec<Statement>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InlineAsmStmt {
    pub content: String,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FnDecl {
    pub name: String,
    pub generics: Vec<GenericParam>,
    pub params: Vec<Param>,
    /// Canonical return type string; empty for no return type.
    pub return_type: String,
    /// `None` for bodiless trait/extern signatures.
    pub body: Option<Vec<Statement>>,
    pub flags: FnFlags,
    pub calling_conv: CallingConv,
    pub is_public: bool,
    /// Set when this function was materialised from a `@derive`.
    pub derive_source: Option<String>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordField {
    pub name: String,
    pub type_name: String,
    pub default: Option<Expression>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RecordDecl {
    pub name: String,
    pub generics: Vec<GenericParam>,
    pub fields: Vec<RecordField>,
    /// Trait names recorded by `@derive(...)`.
    pub derives: Vec<String>,
    pub repr: ReprKind,
    pub is_public: bool,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UnionDecl {
    pub name: String,
    pub fields: Vec<RecordField>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumVariant {
    pub name: String,
    pub discriminant: Option<i64>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EnumDecl {
    pub name: String,
    pub variants: Vec<EnumVariant>,
    pub derives: Vec<String>,
    pub is_public: bool,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeAliasDecl {
    pub name: String,
    pub target: String,
    /// Refinement constraint (`type N = T where P(_)`), with `_` as the
    /// value placeholder.
    pub constraint: Option<Expression>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TraitDecl {
    pub name: String,
    pub generics: Vec<GenericParam>,
    pub super_traits: Vec<String>,
    pub methods: Vec<FnDecl>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImplDecl {
    /// `impl Trait for Type` when `Some`, inherent `impl Type` otherwise.
    pub trait_name: Option<String>,
    pub type_name: String,
    pub methods: Vec<FnDecl>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConceptDecl {
    pub name: String,
    pub generics: Vec<GenericParam>,
    pub requirements: Vec<FnDecl>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EffectOperation {
    pub name: String,
    pub params: Vec<Param>,
    pub return_type: String,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EffectDecl {
    pub name: String,
    pub operations: Vec<EffectOperation>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UseDecl {
    /// File path, module path (`a::b`), or layer name.
    pub path: String,
    pub alias: Option<String>,
    /// Items of `use pkg::{a, b}`.
    pub items: Vec<String>,
    /// True for `use pkg::*`.
    pub glob: bool,
    /// True for `use "file.tyl"`.
    pub is_file_import: bool,
    /// True for `use layer "name"`.
    pub is_layer: bool,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ModuleDecl {
    pub name: String,
    pub body: Vec<Statement>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ExternBlockDecl {
    pub abi: String,
    pub library: Option<String>,
    pub functions: Vec<FnDecl>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MacroDecl {
    pub name: String,
    pub params: Vec<String>,
    pub body: Vec<Statement>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InfixMacroDecl {
    pub op: String,
    pub precedence: u8,
    pub function: String,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SyntaxMacroDecl {
    pub name: String,
    /// Function the captured content is passed to; `None` wraps the
    /// content as a string literal.
    pub transformer: Option<String>,
    pub span: Span,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LayerDecl {
    pub name: String,
    pub body: Vec<Statement>,
    pub span: Span,
}

impl Statement {
    /// Get the span of this statement.
    pub fn span(&self) -> Span {
        match self {
            Statement::Block(s) => s.span,
            Statement::Expression(s) => s.span,
            Statement::VarDecl(s) => s.span,
            Statement::MultiVarDecl(s) => s.span,
            Statement::Destructuring(s) => s.span,
            Statement::If(s) => s.span,
            Statement::IfLet(s) => s.span,
            Statement::Unless(s) => s.span,
            Statement::While(s) => s.span,
            Statement::For(s) => s.span,
            Statement::Loop(s) => s.span,
            Statement::Match(s) => s.span,
            Statement::Return(s) => s.span,
            Statement::Break(s) => s.span,
            Statement::Continue(s) => s.span,
            Statement::Delete(s) => s.span,
            Statement::Lock(s) => s.span,
            Statement::With(s) => s.span,
            Statement::Scope(s) => s.span,
            Statement::Require(s) => s.span,
            Statement::Ensure(s) => s.span,
            Statement::ComptimeBlock(s) => s.span,
            Statement::ComptimeAssert(s) => s.span,
            Statement::Handle(s) => s.span,
            Statement::DslBlock(s) => s.span,
            Statement::Unsafe(s) => s.span,
            Statement::InlineAsm(s) => s.span,
            Statement::Fn(s) => s.span,
            Statement::Record(s) => s.span,
            Statement::Union(s) => s.span,
            Statement::Enum(s) => s.span,
            Statement::TypeAlias(s) => s.span,
            Statement::Trait(s) => s.span,
            Statement::Impl(s) => s.span,
            Statement::Concept(s) => s.span,
            Statement::Effect(s) => s.span,
            Statement::Use(s) => s.span,
            Statement::Module(s) => s.span,
            Statement::ExternBlock(s) => s.span,
            Statement::Macro(s) => s.span,
            Statement::InfixMacro(s) => s.span,
            Statement::SyntaxMacro(s) => s.span,
            Statement::Layer(s) => s.span,
        }
    }

    /// True for declaration statements (functions, types, imports, ...).
    pub fn is_declaration(&self) -> bool {
        matches!(
            self,
            Statement::Fn(_)
                | Statement::Record(_)
                | Statement::Union(_)
                | Statement::Enum(_)
                | Statement::TypeAlias(_)
                | Statement::Trait(_)
                | Statement::Impl(_)
                | Statement::Concept(_)
                | Statement::Effect(_)
                | Statement::Use(_)
                | Statement::Module(_)
                | Statement::ExternBlock(_)
                | Statement::Macro(_)
                | Statement::InfixMacro(_)
                | Statement::SyntaxMacro(_)
                | Statement::Layer(_)
        )
    }
}
