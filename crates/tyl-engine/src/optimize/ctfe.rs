//! Compile-time function execution.
//!
//! A tree-walking interpreter over a sub-language of Tyl: scalar and
//! string arithmetic, comparisons, list literals with 1-based indexing,
//! `if`/`elif`/`else`, `while`, `for` over ranges or lists, scoped
//! variables with compound assignment, and calls to other pure functions
//! (verified by a fixed-point purity analysis).
//!
//! Bounds: recursion depth ≤ 100, total interpreted steps ≤ 10 000.
//! Overflow, division by zero, out-of-bounds indexing or any construct
//! outside the sub-language aborts evaluation and leaves the call as-is.

use super::{for_each_block, visit_stmt_exprs, OptimizationPass};
use crate::parser::ast::*;
use crate::parser::token::Span;
use rustc_hash::FxHashMap;
use std::cell::RefCell;
use std::rc::Rc;

const MAX_RECURSION_DEPTH: usize = 100;
const MAX_ITERATIONS: usize = 10_000;

/// Values the interpreter can produce. Lists are shared, matching the
/// runtime's reference semantics.
#[derive(Debug, Clone)]
pub enum CtfeValue {
    Int(i64),
    Float(f64),
    Bool(bool),
    Str(String),
    Nil,
    List(Rc<RefCell<Vec<CtfeValue>>>),
}

impl CtfeValue {
    fn truthy(&self) -> Option<bool> {
        match self {
            CtfeValue::Bool(b) => Some(*b),
            CtfeValue::Int(v) => Some(*v != 0),
            CtfeValue::Nil => Some(false),
            _ => None,
        }
    }

    fn to_literal(&self, span: Span) -> Option<Expression> {
        Some(match self {
            CtfeValue::Int(v) => Expression::int(*v, span),
            CtfeValue::Float(v) => Expression::float(*v, span),
            CtfeValue::Bool(v) => Expression::boolean(*v, span),
            CtfeValue::Str(v) => Expression::string(v.clone(), span),
            CtfeValue::Nil => Expression::NilLiteral(span),
            CtfeValue::List(items) => {
                let elements = items
                    .borrow()
                    .iter()
                    .map(|v| v.to_literal(span))
                    .collect::<Option<Vec<_>>>()?;
                Expression::List(ListExpr { elements, span })
            }
        })
    }
}

/// Abort marker: evaluation fell outside the supported sub-language or
/// exceeded a resource bound. The call site is left untouched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Abort;

type EvalResult<T> = Result<T, Abort>;

/// Control flow out of a statement.
enum Flow {
    Normal,
    Break,
    Continue,
    Return(CtfeValue),
}

#[derive(Debug, Clone)]
struct FunctionEntry {
    decl: FnDecl,
    is_pure: bool,
}

#[derive(Debug, Default)]
pub struct CtfePass {
    functions: FxHashMap<String, FunctionEntry>,
    transformations: usize,
}

impl CtfePass {
    pub fn new() -> Self {
        Self::default()
    }
}

impl OptimizationPass for CtfePass {
    fn name(&self) -> &'static str {
        "CTFE"
    }

    fn run(&mut self, program: &mut Program) -> usize {
        self.collect(program);
        self.analyze_purity();

        let mut count = 0usize;
        let functions = self.functions.clone();
        for_each_block(program, &mut |statements| {
            for statement in statements.iter_mut() {
                visit_stmt_exprs(statement, &mut |expr| {
                    if let Some(folded) = try_evaluate_site(expr, &functions) {
                        *expr = folded;
                        count += 1;
                    }
                });
            }
        });

        self.transformations = count;
        count
    }
}

impl CtfePass {
    fn collect(&mut self, program: &Program) {
        self.functions.clear();
        for statement in &program.statements {
            if let Statement::Fn(decl) = statement {
                if decl.body.is_none() || decl.flags.is_extern || decl.flags.is_async {
                    continue;
                }
                self.functions.insert(
                    decl.name.clone(),
                    FunctionEntry {
                        is_pure: false,
                        decl: decl.clone(),
                    },
                );
            }
        }
    }

    /// Basic purity, then propagate: a function that calls an impure
    /// function loses purity, iterated to a fixed point.
    fn analyze_purity(&mut self) {
        let names: Vec<String> = self.functions.keys().cloned().collect();
        for name in &names {
            let body = self.functions[name].decl.body.clone().unwrap_or_default();
            let pure = body.iter().all(statement_in_sublanguage);
            self.functions.get_mut(name).unwrap().is_pure = pure;
        }
        loop {
            let snapshot: FxHashMap<String, bool> = self
                .functions
                .iter()
                .map(|(k, v)| (k.clone(), v.is_pure))
                .collect();
            let mut changed = false;
            for name in &names {
                if !self.functions[name].is_pure {
                    continue;
                }
                let body = self.functions[name].decl.body.clone().unwrap_or_default();
                let callees_pure = body.iter().all(|s| calls_are_pure(s, &snapshot));
                if !callees_pure {
                    self.functions.get_mut(name).unwrap().is_pure = false;
                    changed = true;
                }
            }
            if !changed {
                break;
            }
        }
    }
}

/// A call (or metadata query) eligible for compile-time evaluation.
fn try_evaluate_site(
    expr: &Expression,
    functions: &FxHashMap<String, FunctionEntry>,
) -> Option<Expression> {
    if let Expression::TypeMetadata(meta) = expr {
        return eval_type_metadata(meta.query, &meta.ty, meta.span);
    }

    let Expression::Call(call) = expr else {
        return None;
    };
    let name = call.callee.as_identifier()?;
    let entry = functions.get(name)?;
    // `@comptime` requests evaluation but the body must still be pure for
    // the interpreter to run it
    if !entry.is_pure {
        return None;
    }
    if !call.named_args.is_empty() || call.args.len() != entry.decl.params.len() {
        return None;
    }

    // All arguments must already be literal
    let mut args = Vec::with_capacity(call.args.len());
    for arg in &call.args {
        args.push(literal_value(arg)?);
    }

    let mut interp = Interpreter::new(functions);
    let value = interp.call_function(&entry.decl, args, 0).ok()?;
    value.to_literal(call.span)
}

fn literal_value(expr: &Expression) -> Option<CtfeValue> {
    match expr {
        Expression::IntLiteral(v) => Some(CtfeValue::Int(v.value)),
        Expression::FloatLiteral(v) => Some(CtfeValue::Float(v.value)),
        Expression::BoolLiteral(v) => Some(CtfeValue::Bool(v.value)),
        Expression::StringLiteral(v) => Some(CtfeValue::Str(v.value.clone())),
        Expression::NilLiteral(_) => Some(CtfeValue::Nil),
        Expression::List(list) => {
            let items = list
                .elements
                .iter()
                .map(literal_value)
                .collect::<Option<Vec<_>>>()?;
            Some(CtfeValue::List(Rc::new(RefCell::new(items))))
        }
        Expression::Unary(u) if u.op == UnOp::Neg => match literal_value(&u.operand)? {
            CtfeValue::Int(v) => Some(CtfeValue::Int(-v)),
            CtfeValue::Float(v) => Some(CtfeValue::Float(-v)),
            _ => None,
        },
        _ => None,
    }
}

// ============================================================================
// Sub-language checks (purity analysis)
// ============================================================================

fn statement_in_sublanguage(statement: &Statement) -> bool {
    match statement {
        Statement::Expression(s) => expr_in_sublanguage(&s.expression),
        Statement::VarDecl(s) => s
            .initializer
            .as_ref()
            .map(|e| expr_in_sublanguage(e))
            .unwrap_or(true),
        Statement::Return(s) => s
            .value
            .as_ref()
            .map(|e| expr_in_sublanguage(e))
            .unwrap_or(true),
        Statement::If(s) => {
            expr_in_sublanguage(&s.condition)
                && s.then_branch.iter().all(statement_in_sublanguage)
                && s.elif_branches.iter().all(|(c, b)| {
                    expr_in_sublanguage(c) && b.iter().all(statement_in_sublanguage)
                })
                && s.else_branch
                    .as_ref()
                    .map(|b| b.iter().all(statement_in_sublanguage))
                    .unwrap_or(true)
        }
        Statement::While(s) => {
            expr_in_sublanguage(&s.condition) && s.body.iter().all(statement_in_sublanguage)
        }
        Statement::For(s) => {
            expr_in_sublanguage(&s.iterable) && s.body.iter().all(statement_in_sublanguage)
        }
        Statement::Block(s) => s.statements.iter().all(statement_in_sublanguage),
        Statement::Break(_) | Statement::Continue(_) => true,
        _ => false,
    }
}

fn expr_in_sublanguage(expr: &Expression) -> bool {
    match expr {
        Expression::IntLiteral(_)
        | Expression::FloatLiteral(_)
        | Expression::BoolLiteral(_)
        | Expression::StringLiteral(_)
        | Expression::NilLiteral(_)
        | Expression::Identifier(_)
        | Expression::Placeholder(_)
        | Expression::TypeMetadata(_) => true,
        Expression::Binary(b) => expr_in_sublanguage(&b.left) && expr_in_sublanguage(&b.right),
        Expression::Unary(u) => expr_in_sublanguage(&u.operand),
        Expression::Ternary(t) => {
            expr_in_sublanguage(&t.condition)
                && expr_in_sublanguage(&t.then_expr)
                && expr_in_sublanguage(&t.else_expr)
        }
        Expression::Assign(a) => expr_in_sublanguage(&a.target) && expr_in_sublanguage(&a.value),
        Expression::List(l) => l.elements.iter().all(expr_in_sublanguage),
        Expression::Index(i) => expr_in_sublanguage(&i.object) && expr_in_sublanguage(&i.index),
        Expression::Range(r) => expr_in_sublanguage(&r.start) && expr_in_sublanguage(&r.end),
        Expression::Call(c) => {
            // Builtins and (potentially) other user functions; purity of
            // callees is settled by the fixed point.
            c.callee.as_identifier().is_some() && c.args.iter().all(expr_in_sublanguage)
        }
        _ => false,
    }
}

fn calls_are_pure(statement: &Statement, purity: &FxHashMap<String, bool>) -> bool {
    let mut pure = true;
    let mut clone = statement.clone();
    visit_stmt_exprs(&mut clone, &mut |expr| {
        if let Expression::Call(call) = expr {
            if let Some(name) = call.callee.as_identifier() {
                if !is_builtin(name) && !purity.get(name).copied().unwrap_or(false) {
                    pure = false;
                }
            } else {
                pure = false;
            }
        }
    });
    pure
}

fn is_builtin(name: &str) -> bool {
    matches!(
        name,
        "len"
            | "abs"
            | "min"
            | "max"
            | "pow"
            | "sqrt"
            | "floor"
            | "ceil"
            | "str"
            | "int"
            | "float"
            | "sizeof"
            | "alignof"
            | "is_pod"
            | "is_trivially_copyable"
            | "is_primitive"
            | "range"
    )
}

// ============================================================================
// Type metadata
// ============================================================================

fn type_size(ty: &str) -> Option<i64> {
    Some(match ty {
        "i8" | "u8" | "bool" | "byte" => 1,
        "i16" | "u16" => 2,
        "i32" | "u32" | "f32" | "char" => 4,
        "int" | "i64" | "u64" | "float" | "f64" | "str" => 8,
        _ if ty.starts_with('*') || ty.starts_with('&') || ty.starts_with("fn(") => 8,
        _ => return None,
    })
}

fn type_align(ty: &str) -> Option<i64> {
    type_size(ty)
}

fn is_primitive_type(ty: &str) -> bool {
    matches!(
        ty,
        "int" | "float" | "bool" | "char" | "byte" | "i8" | "i16" | "i32" | "i64" | "u8" | "u16"
            | "u32"
            | "u64"
            | "f32"
            | "f64"
    )
}

fn eval_type_metadata(query: MetaQuery, ty: &str, span: Span) -> Option<Expression> {
    match query {
        MetaQuery::SizeOf => type_size(ty).map(|v| Expression::int(v, span)),
        MetaQuery::AlignOf => type_align(ty).map(|v| Expression::int(v, span)),
        MetaQuery::IsPod => Some(Expression::boolean(is_primitive_type(ty), span)),
        MetaQuery::IsPrimitive => Some(Expression::boolean(is_primitive_type(ty), span)),
    }
}

// ============================================================================
// The interpreter
// ============================================================================

struct Interpreter<'a> {
    functions: &'a FxHashMap<String, FunctionEntry>,
    iterations: usize,
}

impl<'a> Interpreter<'a> {
    fn new(functions: &'a FxHashMap<String, FunctionEntry>) -> Self {
        Self {
            functions,
            iterations: 0,
        }
    }

    fn step(&mut self) -> EvalResult<()> {
        self.iterations += 1;
        if self.iterations > MAX_ITERATIONS {
            Err(Abort)
        } else {
            Ok(())
        }
    }

    fn call_function(
        &mut self,
        decl: &FnDecl,
        args: Vec<CtfeValue>,
        depth: usize,
    ) -> EvalResult<CtfeValue> {
        if depth > MAX_RECURSION_DEPTH {
            return Err(Abort);
        }
        let body = decl.body.as_ref().ok_or(Abort)?;

        let mut env: FxHashMap<String, CtfeValue> = FxHashMap::default();
        for (param, value) in decl.params.iter().zip(args) {
            env.insert(param.name.clone(), value);
        }

        for statement in body {
            match self.exec_statement(statement, &mut env, depth)? {
                Flow::Return(value) => return Ok(value),
                Flow::Normal => {}
                // break/continue outside a loop is outside the
                // sub-language
                Flow::Break | Flow::Continue => return Err(Abort),
            }
        }
        Ok(CtfeValue::Nil)
    }

    fn exec_block(
        &mut self,
        statements: &[Statement],
        env: &mut FxHashMap<String, CtfeValue>,
        depth: usize,
    ) -> EvalResult<Flow> {
        for statement in statements {
            match self.exec_statement(statement, env, depth)? {
                Flow::Normal => {}
                other => return Ok(other),
            }
        }
        Ok(Flow::Normal)
    }

    fn exec_statement(
        &mut self,
        statement: &Statement,
        env: &mut FxHashMap<String, CtfeValue>,
        depth: usize,
    ) -> EvalResult<Flow> {
        self.step()?;
        match statement {
            Statement::VarDecl(decl) => {
                let value = match &decl.initializer {
                    Some(init) => self.eval(init, env, depth)?,
                    None => CtfeValue::Nil,
                };
                env.insert(decl.name.clone(), value);
                Ok(Flow::Normal)
            }
            Statement::Expression(stmt) => {
                self.eval(&stmt.expression, env, depth)?;
                Ok(Flow::Normal)
            }
            Statement::Return(ret) => {
                let value = match &ret.value {
                    Some(expr) => self.eval(expr, env, depth)?,
                    None => CtfeValue::Nil,
                };
                Ok(Flow::Return(value))
            }
            Statement::If(if_stmt) => {
                let cond = self.eval(&if_stmt.condition, env, depth)?;
                if cond.truthy().ok_or(Abort)? {
                    return self.exec_block(&if_stmt.then_branch, env, depth);
                }
                for (cond, branch) in &if_stmt.elif_branches {
                    let value = self.eval(cond, env, depth)?;
                    if value.truthy().ok_or(Abort)? {
                        return self.exec_block(branch, env, depth);
                    }
                }
                if let Some(branch) = &if_stmt.else_branch {
                    return self.exec_block(branch, env, depth);
                }
                Ok(Flow::Normal)
            }
            Statement::While(while_stmt) => {
                loop {
                    self.step()?;
                    let cond = self.eval(&while_stmt.condition, env, depth)?;
                    if !cond.truthy().ok_or(Abort)? {
                        break;
                    }
                    match self.exec_block(&while_stmt.body, env, depth)? {
                        Flow::Break => break,
                        Flow::Continue | Flow::Normal => {}
                        flow @ Flow::Return(_) => return Ok(flow),
                    }
                }
                Ok(Flow::Normal)
            }
            Statement::For(for_stmt) => {
                let items = self.eval_iterable(&for_stmt.iterable, env, depth)?;
                for item in items {
                    self.step()?;
                    env.insert(for_stmt.var.clone(), item);
                    match self.exec_block(&for_stmt.body, env, depth)? {
                        Flow::Break => break,
                        Flow::Continue | Flow::Normal => {}
                        flow @ Flow::Return(_) => return Ok(flow),
                    }
                }
                Ok(Flow::Normal)
            }
            Statement::Block(block) => self.exec_block(&block.statements, env, depth),
            Statement::Break(_) => Ok(Flow::Break),
            Statement::Continue(_) => Ok(Flow::Continue),
            _ => Err(Abort),
        }
    }

    fn eval_iterable(
        &mut self,
        expr: &Expression,
        env: &mut FxHashMap<String, CtfeValue>,
        depth: usize,
    ) -> EvalResult<Vec<CtfeValue>> {
        match expr {
            Expression::Range(range) => {
                let start = self.eval_int(&range.start, env, depth)?;
                let end = self.eval_int(&range.end, env, depth)?;
                let end = if range.inclusive { end + 1 } else { end };
                Ok((start..end).map(CtfeValue::Int).collect())
            }
            Expression::Call(call) if call.callee.as_identifier() == Some("range") => {
                let mut bounds = Vec::new();
                for arg in &call.args {
                    bounds.push(self.eval_int(arg, env, depth)?);
                }
                let (start, end, step) = match bounds.as_slice() {
                    [end] => (0, *end, 1),
                    [start, end] => (*start, *end, 1),
                    [start, end, step] if *step != 0 => (*start, *end, *step),
                    _ => return Err(Abort),
                };
                let mut items = Vec::new();
                let mut v = start;
                while (step > 0 && v < end) || (step < 0 && v > end) {
                    items.push(CtfeValue::Int(v));
                    v += step;
                    if items.len() > MAX_ITERATIONS {
                        return Err(Abort);
                    }
                }
                Ok(items)
            }
            other => match self.eval(other, env, depth)? {
                CtfeValue::List(items) => Ok(items.borrow().clone()),
                _ => Err(Abort),
            },
        }
    }

    fn eval_int(
        &mut self,
        expr: &Expression,
        env: &mut FxHashMap<String, CtfeValue>,
        depth: usize,
    ) -> EvalResult<i64> {
        match self.eval(expr, env, depth)? {
            CtfeValue::Int(v) => Ok(v),
            _ => Err(Abort),
        }
    }

    fn eval(
        &mut self,
        expr: &Expression,
        env: &mut FxHashMap<String, CtfeValue>,
        depth: usize,
    ) -> EvalResult<CtfeValue> {
        self.step()?;
        match expr {
            Expression::IntLiteral(v) => Ok(CtfeValue::Int(v.value)),
            Expression::FloatLiteral(v) => Ok(CtfeValue::Float(v.value)),
            Expression::BoolLiteral(v) => Ok(CtfeValue::Bool(v.value)),
            Expression::StringLiteral(v) => Ok(CtfeValue::Str(v.value.clone())),
            Expression::NilLiteral(_) => Ok(CtfeValue::Nil),
            Expression::Identifier(id) => env.get(&id.name).cloned().ok_or(Abort),
            Expression::List(list) => {
                let mut items = Vec::with_capacity(list.elements.len());
                for element in &list.elements {
                    items.push(self.eval(element, env, depth)?);
                }
                Ok(CtfeValue::List(Rc::new(RefCell::new(items))))
            }
            Expression::Index(index) => {
                let object = self.eval(&index.object, env, depth)?;
                let idx = self.eval_int(&index.index, env, depth)?;
                match object {
                    CtfeValue::List(items) => {
                        let items = items.borrow();
                        // Lists are 1-based, matching the runtime
                        if idx < 1 || idx as usize > items.len() {
                            return Err(Abort);
                        }
                        Ok(items[(idx - 1) as usize].clone())
                    }
                    _ => Err(Abort),
                }
            }
            Expression::Unary(unary) => {
                let operand = self.eval(&unary.operand, env, depth)?;
                match (unary.op, operand) {
                    (UnOp::Neg, CtfeValue::Int(v)) => {
                        v.checked_neg().map(CtfeValue::Int).ok_or(Abort)
                    }
                    (UnOp::Neg, CtfeValue::Float(v)) => Ok(CtfeValue::Float(-v)),
                    (UnOp::Not, CtfeValue::Bool(v)) => Ok(CtfeValue::Bool(!v)),
                    (UnOp::BitNot, CtfeValue::Int(v)) => Ok(CtfeValue::Int(!v)),
                    _ => Err(Abort),
                }
            }
            Expression::Binary(binary) => self.eval_binary(binary, env, depth),
            Expression::Ternary(ternary) => {
                let cond = self.eval(&ternary.condition, env, depth)?;
                if cond.truthy().ok_or(Abort)? {
                    self.eval(&ternary.then_expr, env, depth)
                } else {
                    self.eval(&ternary.else_expr, env, depth)
                }
            }
            Expression::Assign(assign) => {
                let name = assign.target.as_identifier().ok_or(Abort)?.to_string();
                let value = self.eval(&assign.value, env, depth)?;
                let new_value = if assign.op == AssignOp::Assign {
                    value
                } else {
                    let current = env.get(&name).cloned().ok_or(Abort)?;
                    let op = match assign.op {
                        AssignOp::Add => BinOp::Add,
                        AssignOp::Sub => BinOp::Sub,
                        AssignOp::Mul => BinOp::Mul,
                        AssignOp::Div => BinOp::Div,
                        AssignOp::Mod => BinOp::Mod,
                        AssignOp::Assign => unreachable!(),
                    };
                    apply_binop(&op, current, value)?
                };
                env.insert(name, new_value.clone());
                Ok(new_value)
            }
            Expression::Call(call) => self.eval_call(call, env, depth),
            Expression::TypeMetadata(meta) => match eval_type_metadata(meta.query, &meta.ty, meta.span)
            {
                Some(Expression::IntLiteral(v)) => Ok(CtfeValue::Int(v.value)),
                Some(Expression::BoolLiteral(v)) => Ok(CtfeValue::Bool(v.value)),
                _ => Err(Abort),
            },
            _ => Err(Abort),
        }
    }

    fn eval_binary(
        &mut self,
        binary: &BinaryExpr,
        env: &mut FxHashMap<String, CtfeValue>,
        depth: usize,
    ) -> EvalResult<CtfeValue> {
        // Short-circuit forms first
        match binary.op {
            BinOp::And => {
                let left = self.eval(&binary.left, env, depth)?;
                if !left.truthy().ok_or(Abort)? {
                    return Ok(CtfeValue::Bool(false));
                }
                let right = self.eval(&binary.right, env, depth)?;
                return Ok(CtfeValue::Bool(right.truthy().ok_or(Abort)?));
            }
            BinOp::Or => {
                let left = self.eval(&binary.left, env, depth)?;
                if left.truthy().ok_or(Abort)? {
                    return Ok(CtfeValue::Bool(true));
                }
                let right = self.eval(&binary.right, env, depth)?;
                return Ok(CtfeValue::Bool(right.truthy().ok_or(Abort)?));
            }
            _ => {}
        }
        let left = self.eval(&binary.left, env, depth)?;
        let right = self.eval(&binary.right, env, depth)?;
        apply_binop(&binary.op, left, right)
    }

    fn eval_call(
        &mut self,
        call: &CallExpr,
        env: &mut FxHashMap<String, CtfeValue>,
        depth: usize,
    ) -> EvalResult<CtfeValue> {
        let name = call.callee.as_identifier().ok_or(Abort)?;
        let mut args = Vec::with_capacity(call.args.len());
        for arg in &call.args {
            args.push(self.eval(arg, env, depth)?);
        }

        if is_builtin(name) {
            return eval_builtin(name, &args);
        }

        let entry = self.functions.get(name).ok_or(Abort)?;
        if !entry.is_pure {
            return Err(Abort);
        }
        if args.len() != entry.decl.params.len() {
            return Err(Abort);
        }
        let decl = entry.decl.clone();
        self.call_function(&decl, args, depth + 1)
    }
}

fn apply_binop(op: &BinOp, left: CtfeValue, right: CtfeValue) -> EvalResult<CtfeValue> {
    use CtfeValue as V;
    // Integer/float cross-promotion
    let value = match (op, left, right) {
        (BinOp::Add, V::Int(a), V::Int(b)) => V::Int(a.checked_add(b).ok_or(Abort)?),
        (BinOp::Sub, V::Int(a), V::Int(b)) => V::Int(a.checked_sub(b).ok_or(Abort)?),
        (BinOp::Mul, V::Int(a), V::Int(b)) => V::Int(a.checked_mul(b).ok_or(Abort)?),
        (BinOp::Div, V::Int(a), V::Int(b)) => V::Int(a.checked_div(b).ok_or(Abort)?),
        (BinOp::Mod, V::Int(a), V::Int(b)) => V::Int(a.checked_rem(b).ok_or(Abort)?),
        (BinOp::BitAnd, V::Int(a), V::Int(b)) => V::Int(a & b),
        (BinOp::BitOr, V::Int(a), V::Int(b)) => V::Int(a | b),
        (BinOp::BitXor, V::Int(a), V::Int(b)) => V::Int(a ^ b),
        (BinOp::Shl, V::Int(a), V::Int(b)) => V::Int(a.checked_shl((b & 63) as u32).ok_or(Abort)?),
        (BinOp::Shr, V::Int(a), V::Int(b)) => V::Int(a.checked_shr((b & 63) as u32).ok_or(Abort)?),
        (BinOp::Eq, V::Int(a), V::Int(b)) => V::Bool(a == b),
        (BinOp::Ne, V::Int(a), V::Int(b)) => V::Bool(a != b),
        (BinOp::Lt, V::Int(a), V::Int(b)) => V::Bool(a < b),
        (BinOp::Le, V::Int(a), V::Int(b)) => V::Bool(a <= b),
        (BinOp::Gt, V::Int(a), V::Int(b)) => V::Bool(a > b),
        (BinOp::Ge, V::Int(a), V::Int(b)) => V::Bool(a >= b),
        (BinOp::Spaceship, V::Int(a), V::Int(b)) => V::Int((a.cmp(&b) as i8) as i64),

        (op, V::Int(a), V::Float(b)) => return apply_binop(op, V::Float(a as f64), V::Float(b)),
        (op, V::Float(a), V::Int(b)) => return apply_binop(op, V::Float(a), V::Float(b as f64)),

        (BinOp::Add, V::Float(a), V::Float(b)) => V::Float(a + b),
        (BinOp::Sub, V::Float(a), V::Float(b)) => V::Float(a - b),
        (BinOp::Mul, V::Float(a), V::Float(b)) => V::Float(a * b),
        (BinOp::Div, V::Float(a), V::Float(b)) => V::Float(a / b),
        (BinOp::Mod, V::Float(a), V::Float(b)) => V::Float(a % b),
        (BinOp::Eq, V::Float(a), V::Float(b)) => V::Bool(a == b),
        (BinOp::Ne, V::Float(a), V::Float(b)) => V::Bool(a != b),
        (BinOp::Lt, V::Float(a), V::Float(b)) => V::Bool(a < b),
        (BinOp::Le, V::Float(a), V::Float(b)) => V::Bool(a <= b),
        (BinOp::Gt, V::Float(a), V::Float(b)) => V::Bool(a > b),
        (BinOp::Ge, V::Float(a), V::Float(b)) => V::Bool(a >= b),

        (BinOp::Add, V::Str(a), V::Str(b)) => V::Str(format!("{}{}", a, b)),
        (BinOp::Eq, V::Str(a), V::Str(b)) => V::Bool(a == b),
        (BinOp::Ne, V::Str(a), V::Str(b)) => V::Bool(a != b),

        (BinOp::Eq, V::Bool(a), V::Bool(b)) => V::Bool(a == b),
        (BinOp::Ne, V::Bool(a), V::Bool(b)) => V::Bool(a != b),

        _ => return Err(Abort),
    };
    Ok(value)
}

fn eval_builtin(name: &str, args: &[CtfeValue]) -> EvalResult<CtfeValue> {
    use CtfeValue as V;
    let value = match (name, args) {
        ("len", [V::Str(s)]) => V::Int(s.chars().count() as i64),
        ("len", [V::List(items)]) => V::Int(items.borrow().len() as i64),
        ("abs", [V::Int(v)]) => V::Int(v.checked_abs().ok_or(Abort)?),
        ("abs", [V::Float(v)]) => V::Float(v.abs()),
        ("min", [V::Int(a), V::Int(b)]) => V::Int(*a.min(b)),
        ("min", [V::Float(a), V::Float(b)]) => V::Float(a.min(*b)),
        ("max", [V::Int(a), V::Int(b)]) => V::Int(*a.max(b)),
        ("max", [V::Float(a), V::Float(b)]) => V::Float(a.max(*b)),
        ("pow", [V::Int(a), V::Int(b)]) if *b >= 0 => {
            V::Int(a.checked_pow((*b).try_into().map_err(|_| Abort)?).ok_or(Abort)?)
        }
        ("pow", [V::Float(a), V::Float(b)]) => V::Float(a.powf(*b)),
        ("sqrt", [V::Int(v)]) if *v >= 0 => V::Float((*v as f64).sqrt()),
        ("sqrt", [V::Float(v)]) if *v >= 0.0 => V::Float(v.sqrt()),
        ("floor", [V::Float(v)]) => V::Int(v.floor() as i64),
        ("floor", [V::Int(v)]) => V::Int(*v),
        ("ceil", [V::Float(v)]) => V::Int(v.ceil() as i64),
        ("ceil", [V::Int(v)]) => V::Int(*v),
        ("str", [V::Int(v)]) => V::Str(v.to_string()),
        ("str", [V::Float(v)]) => V::Str(v.to_string()),
        ("str", [V::Bool(v)]) => V::Str(v.to_string()),
        ("str", [V::Str(s)]) => V::Str(s.clone()),
        ("int", [V::Int(v)]) => V::Int(*v),
        ("int", [V::Float(v)]) => V::Int(*v as i64),
        ("int", [V::Str(s)]) => V::Int(s.trim().parse().map_err(|_| Abort)?),
        ("int", [V::Bool(v)]) => V::Int(*v as i64),
        ("float", [V::Int(v)]) => V::Float(*v as f64),
        ("float", [V::Float(v)]) => V::Float(*v),
        ("float", [V::Str(s)]) => V::Float(s.trim().parse().map_err(|_| Abort)?),
        _ => return Err(Abort),
    };
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Parser;

    fn run(source: &str) -> Program {
        let mut program = Parser::parse_source(source, "t.tyl").unwrap();
        let mut pass = CtfePass::new();
        pass.run(&mut program);
        program
    }

    fn main_return(program: &Program) -> Option<&Expression> {
        let body = program.find_function("main")?.body.as_ref()?;
        match body.last()? {
            Statement::Return(r) => r.value.as_ref(),
            _ => None,
        }
    }

    #[test]
    fn evaluates_recursive_factorial() {
        let program = run(
            "fn fact(n: int) -> int:\n    return 1 if n <= 1 else n * fact(n - 1)\nfn main() -> int:\n    return fact(5)\n",
        );
        assert_eq!(main_return(&program).and_then(|e| e.as_int()), Some(120));
    }

    #[test]
    fn evaluates_loops_and_lists() {
        let program = run(
            "fn sum_to(n: int) -> int:\n    mut total = 0\n    for i in 1..=n:\n        total = total + i\n    return total\nfn main() -> int:\n    return sum_to(10)\n",
        );
        assert_eq!(main_return(&program).and_then(|e| e.as_int()), Some(55));
    }

    #[test]
    fn one_based_list_indexing() {
        let program = run(
            "fn pick() -> int:\n    let xs = [10, 20, 30]\n    return xs[2]\nfn main() -> int:\n    return pick()\n",
        );
        assert_eq!(main_return(&program).and_then(|e| e.as_int()), Some(20));
    }

    #[test]
    fn impure_functions_are_left_alone() {
        let program = run(
            "fn noisy(n: int) -> int:\n    print(n)\n    return n\nfn main() -> int:\n    return noisy(3)\n",
        );
        assert!(matches!(main_return(&program), Some(Expression::Call(_))));
    }

    #[test]
    fn recursion_bound_aborts() {
        // Unbounded self-recursion must leave the call intact
        let program = run(
            "fn forever(n: int) -> int:\n    return forever(n + 1)\nfn main() -> int:\n    return forever(0)\n",
        );
        assert!(matches!(main_return(&program), Some(Expression::Call(_))));
    }

    #[test]
    fn iteration_bound_aborts() {
        let program = run(
            "fn spin() -> int:\n    mut i = 0\n    while i < 1000000:\n        i = i + 1\n    return i\nfn main() -> int:\n    return spin()\n",
        );
        assert!(matches!(main_return(&program), Some(Expression::Call(_))));
    }

    #[test]
    fn overflow_aborts() {
        let program = run(
            "fn big(n: int) -> int:\n    return n * 9223372036854775807\nfn main() -> int:\n    return big(2)\n",
        );
        assert!(matches!(main_return(&program), Some(Expression::Call(_))));
    }

    #[test]
    fn division_by_zero_aborts() {
        let program = run(
            "fn bad() -> int:\n    return 1 / 0\nfn main() -> int:\n    return bad()\n",
        );
        assert!(matches!(main_return(&program), Some(Expression::Call(_))));
    }

    #[test]
    fn builtins_fold() {
        let program = run(
            "fn calc() -> int:\n    return max(abs(0 - 4), min(2, 9)) + len(\"abc\")\nfn main() -> int:\n    return calc()\n",
        );
        assert_eq!(main_return(&program).and_then(|e| e.as_int()), Some(7));
    }

    #[test]
    fn type_metadata_queries_fold() {
        let program = run("fn main() -> int:\n    return sizeof(int) + alignof(bool)\n");
        let body = program.find_function("main").unwrap().body.as_ref().unwrap();
        if let Statement::Return(ret) = &body[0] {
            // sizeof/alignof fold to literals; the sum folds later
            let Expression::Binary(b) = ret.value.as_ref().unwrap() else {
                panic!("expected binary");
            };
            assert_eq!(b.left.as_int(), Some(8));
            assert_eq!(b.right.as_int(), Some(1));
        } else {
            panic!("expected return");
        }
    }

    #[test]
    fn string_results_fold() {
        let program = run(
            "fn greet(name: str) -> str:\n    return \"hi \" + name\nfn main() -> str:\n    return greet(\"tyl\")\n",
        );
        assert!(matches!(
            main_return(&program),
            Some(Expression::StringLiteral(s)) if s.value == "hi tyl"
        ));
    }
}
