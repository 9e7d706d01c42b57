//! Takes a program tree and executes it.
//!
//! This module provides:
//! - [`ExecContext`]: the state of one script run — the scope arena, the call
//!   trace, and the injected host services
//! - [`TermOp`], [`Traversal`]: the control-flow signalling used while walking
//!   the tree
//! - [`value`]: the representation of values in the runtime
//!
//! # Control flow
//!
//! `continue`, `break`, `return` and `reply` are not errors: they are
//! [`TermOp`] variants carried through the `Err` side of [`Traversal`] so
//! `?` unwinds statement execution to the construct that handles them.
//! `Reply` is the one variant allowed to unwind all the way out of a run —
//! including through native collection methods that are mid-callback — and
//! carries the script's final output. This reuse of the error channel for
//! `Reply` is intentional: it is the only signal that must cross arbitrarily
//! deep native frames in one motion.

use std::collections::HashMap;
use std::time::Duration as StdDuration;

use chrono::Duration as TimeDelta;
use tracing::debug;

use crate::ast::{self, op, Located};
use crate::bridge::storage::StorageEngine;
use crate::bridge::{PlatformBridge, Sleeper};
use crate::err::{Cursor, FullScriptErr, ScriptErr};
use crate::snapshot::InvocationSnapshot;
use crate::span::Span;

pub mod value;

mod globals;
mod proto;
mod vars;

use value::{FunValue, PropKey, Value};
use vars::ScopeArena;

pub use vars::FrameId;

/// The hard ceiling on iterations of a single loop. A loop whose condition
/// is still true past this many iterations fails the script: this is the
/// sandbox guarantee that a user script cannot hang the host.
pub const MAX_LOOP_ITERATIONS: usize = 100_000;

/// The ceiling on nested function calls, bounding host stack usage.
pub const MAX_CALL_DEPTH: usize = 250;

/// How many call frames an error report shows by default.
pub const DEFAULT_TRACE_DEPTH: usize = 20;

/// The host facilities one script run executes against.
///
/// These are injected per run — the interpreter holds no global connection
/// state, so init and teardown belong to whoever owns the executor.
pub struct HostServices<'a> {
    /// Resolves live platform objects over the request/response transport.
    pub bridge: &'a dyn PlatformBridge,
    /// Persistent per-guild key-value storage.
    pub storage: &'a StorageEngine,
    /// Implementation of the `sleep` statement's pause.
    pub sleeper: &'a dyn Sleeper,
}

/// One frame of the call trace kept for error reporting: the called
/// function's name and the call site.
#[derive(Debug, Clone, PartialEq)]
pub struct TraceFrame {
    /// The name of the called function.
    pub name: String,
    /// The position of the call site.
    pub pos: Cursor,
}

impl TraceFrame {
    /// Renders this frame the way stack traces show it.
    pub fn render(&self) -> String {
        let (line, col) = self.pos;
        format!("at {} ({}:{})", self.name, line + 1, col + 1)
    }
}

/// Operations that interrupt normal statement flow.
///
/// See the module docs for why these travel on the `Err` side of a `Result`.
pub enum TermOp<E> {
    /// An error occurred (this is propagated out of the whole run).
    Err(E),

    /// `continue` was executed (propagated to the innermost loop).
    Continue,

    /// `break` was executed (propagated to the innermost loop).
    Break,

    /// `return` was executed (propagated to the innermost function call).
    Return(Value),

    /// `reply` was executed (propagated out of the whole run; the carried
    /// value is the script's output).
    Reply(Value),
}

impl<E: Into<FullRuntimeErr>> From<E> for TermOp<FullRuntimeErr> {
    fn from(e: E) -> Self {
        TermOp::Err(e.into())
    }
}

/// An evaluation type for operations in runtime whose normal flow may be
/// interrupted. If the flow is interrupted, [`TermOp`] is returned.
pub type Traversal<T> = Result<T, TermOp<FullRuntimeErr>>;

/// The state of one script execution.
///
/// Created once per run and discarded afterwards; [`ExecContext::cleanup`]
/// clears both runtime stacks on every exit path so a pooled context never
/// leaks scope frames into the next run.
pub struct ExecContext<'h> {
    scopes: ScopeArena,
    trace: Vec<TraceFrame>,
    host: &'h HostServices<'h>,
    snapshot: &'h InvocationSnapshot,
    /// Call site of the native currently executing, so natives can attribute
    /// the callbacks they invoke to a source position.
    native_at: Span,
}

impl<'h> ExecContext<'h> {
    /// Create a context for one run, binding the invocation snapshot and
    /// the host globals into the outermost scope.
    pub fn new(host: &'h HostServices<'h>, snapshot: &'h InvocationSnapshot) -> Self {
        let mut bindings: HashMap<String, Value> = globals::global_frame();
        bindings.extend(globals::snapshot_bindings(snapshot));

        Self {
            scopes: ScopeArena::new(bindings),
            trace: vec![],
            host,
            snapshot,
            native_at: Span::none(),
        }
    }

    /// The call site of the native currently executing.
    pub fn native_at(&self) -> Span {
        self.native_at
    }

    /// The snapshot of the triggering invocation.
    pub fn snapshot(&self) -> &InvocationSnapshot {
        self.snapshot
    }

    /// The injected host services.
    pub fn host(&self) -> &'h HostServices<'h> {
        self.host
    }

    /// The guild the triggering message belongs to.
    pub fn guild_id(&self) -> &str {
        &self.snapshot.guild.id
    }

    /// A snapshot of the live call trace, innermost frame first,
    /// capped at `depth` frames.
    pub fn trace_snapshot(&self, depth: usize) -> Vec<TraceFrame> {
        self.trace.iter().rev().take(depth).cloned().collect()
    }

    /// Clear both runtime stacks. Runs on success and failure exits alike.
    pub fn cleanup(&mut self) {
        debug!(frames = self.scopes.frame_count(), "clearing execution context");
        self.scopes.cleanup();
        self.trace.clear();
    }

    /// Execute a whole program.
    ///
    /// Returns the reply payload when the script executed `reply`, or `None`
    /// when it ran to completion without one. A top-level `return` (or a
    /// stray `break`/`continue`) ends its statement but not the script;
    /// only `reply` terminates the run.
    pub fn run_program(&mut self, prog: &ast::Program) -> Result<Option<Value>, FullRuntimeErr> {
        for stmt in &prog.0 {
            match self.exec_stmt(stmt) {
                Ok(()) => {}
                Err(TermOp::Reply(v)) => return Ok(Some(v)),
                Err(TermOp::Return(_)) | Err(TermOp::Break) | Err(TermOp::Continue) => {}
                Err(TermOp::Err(e)) => return Err(e),
            }
        }

        Ok(None)
    }

    fn exec_stmts(&mut self, stmts: &[ast::Stmt]) -> Traversal<()> {
        for stmt in stmts {
            self.exec_stmt(stmt)?;
        }
        Ok(())
    }

    /// Execute a statement in a fresh child scope (block and branch bodies).
    fn exec_in_child(&mut self, stmt: &ast::Stmt) -> Traversal<()> {
        self.scopes.push_child();
        let result = self.exec_stmt(stmt);
        self.scopes.pop();
        result
    }

    fn exec_stmt(&mut self, stmt: &ast::Stmt) -> Traversal<()> {
        match stmt {
            ast::Stmt::Empty => Ok(()),
            ast::Stmt::Expr(e) => self.eval(e).map(drop),
            ast::Stmt::Block(b) => {
                self.scopes.push_child();
                let result = self.exec_stmts(&b.0);
                self.scopes.pop();
                result
            }
            ast::Stmt::If { cond, then_branch, else_branch } => {
                if self.eval(cond)?.truth() {
                    self.exec_in_child(then_branch)
                } else if let Some(els) = else_branch {
                    self.exec_in_child(els)
                } else {
                    Ok(())
                }
            }
            ast::Stmt::While { cond, body } => {
                let mut iterations = 0usize;
                while self.eval(cond)?.truth() {
                    iterations += 1;
                    if iterations > MAX_LOOP_ITERATIONS {
                        Err(ValueErr::IterationLimit.at_range(cond.range().cursor_range()))?
                    }

                    match self.exec_in_child(body) {
                        Ok(()) => {}
                        Err(TermOp::Break) => break,
                        Err(TermOp::Continue) => continue,
                        e => e?,
                    }
                }
                Ok(())
            }
            ast::Stmt::For { init, cond, update, body } => {
                // the header clauses get their own scope
                self.scopes.push_child();
                let result = self.exec_classic_for(init, cond, update, body);
                self.scopes.pop();
                result
            }
            ast::Stmt::ForOf { var, iter, body } => self.exec_for_of(var, iter, body),
            ast::Stmt::Continue(_) => Err(TermOp::Continue),
            ast::Stmt::Break(_) => Err(TermOp::Break),
            ast::Stmt::Return(_, value) => {
                let v = match value {
                    Some(e) => self.eval(e)?,
                    None => Value::Null,
                };
                Err(TermOp::Return(v))
            }
            ast::Stmt::Sleep(span, expr) => self.exec_sleep(*span, expr),
            ast::Stmt::Reply(_, expr) => {
                let v = self.eval(expr)?;
                Err(TermOp::Reply(v))
            }
            ast::Stmt::FunDecl(decl) => {
                let fun = FunValue {
                    name: Some(decl.name.0.clone()),
                    params: std::rc::Rc::new(decl.params.iter().map(|p| p.0.clone()).collect()),
                    body: decl.body.clone(),
                    scope: self.scopes.current(),
                };
                self.scopes
                    .declare(decl.name.0.clone(), Value::Fun(fun))
                    .map_err(|e| e.at_range(decl.name.range().cursor_range()))?;
                Ok(())
            }
        }
    }

    fn exec_classic_for(
        &mut self,
        init: &Option<Located<ast::Expr>>,
        cond: &Option<Located<ast::Expr>>,
        update: &Option<Located<ast::Expr>>,
        body: &ast::Stmt,
    ) -> Traversal<()> {
        if let Some(e) = init {
            self.eval(e)?;
        }

        let mut iterations = 0usize;
        loop {
            let proceed = match cond {
                Some(e) => self.eval(e)?.truth(),
                None => true,
            };
            if !proceed {
                break;
            }

            iterations += 1;
            if iterations > MAX_LOOP_ITERATIONS {
                let range = cond
                    .as_ref()
                    .map_or((0, 0)..=(0, 0), |e| e.range().cursor_range());
                Err(ValueErr::IterationLimit.at_range(range))?
            }

            match self.exec_in_child(body) {
                Ok(()) | Err(TermOp::Continue) => {}
                Err(TermOp::Break) => break,
                e => e?,
            }

            // continue still runs the update clause, like C
            if let Some(e) = update {
                self.eval(e)?;
            }
        }

        Ok(())
    }

    fn exec_for_of(
        &mut self,
        var: &Located<String>,
        iter: &Located<ast::Expr>,
        body: &ast::Stmt,
    ) -> Traversal<()> {
        let it_val = self.eval(iter)?;

        match &it_val {
            // numbers iterate the integers of [0, n); the loop condition is
            // `i < n`, so a fractional bound rounds the count up
            Value::Number(n) => {
                if !n.is_finite() {
                    Err(ValueErr::NonFiniteIterBound.at_range(iter.range().cursor_range()))?
                }

                let size = *n;
                let mut i = 0.0f64;
                let mut iterations = 0usize;
                while i < size {
                    iterations += 1;
                    if iterations > MAX_LOOP_ITERATIONS {
                        Err(ValueErr::IterationLimit.at_range(iter.range().cursor_range()))?
                    }

                    match self.run_for_of_iteration(var, Value::Number(i), body)? {
                        LoopFlow::Next => {}
                        LoopFlow::Stop => break,
                    }
                    i += 1.0;
                }
                Ok(())
            }
            Value::Str(_) | Value::List(_) | Value::Map(_) => {
                let items: Vec<Value> = match &it_val {
                    Value::Str(s) => s.chars().map(|c| Value::Str(c.to_string())).collect(),
                    Value::List(l) => l.borrow().clone(),
                    Value::Map(m) => m.borrow().keys().map(|k| Value::Str(k.clone())).collect(),
                    _ => unreachable!(),
                };

                let mut iterations = 0usize;
                for item in items {
                    iterations += 1;
                    if iterations > MAX_LOOP_ITERATIONS {
                        Err(ValueErr::IterationLimit.at_range(iter.range().cursor_range()))?
                    }

                    match self.run_for_of_iteration(var, item, body)? {
                        LoopFlow::Next => {}
                        LoopFlow::Stop => break,
                    }
                }
                Ok(())
            }
            v => Err(TypeErr::NotIterable(v.ty()).at_range(iter.range().cursor_range()))?,
        }
    }

    /// One `for..of` iteration: fresh scope, loop variable declared inside it.
    fn run_for_of_iteration(
        &mut self,
        var: &Located<String>,
        item: Value,
        body: &ast::Stmt,
    ) -> Traversal<LoopFlow> {
        self.scopes.push_child();
        let declared = self
            .scopes
            .declare(var.0.clone(), item)
            .map_err(|e| e.at_range(var.range().cursor_range()));

        let result = match declared {
            Ok(()) => self.exec_stmt(body),
            Err(e) => Err(e.into()),
        };
        self.scopes.pop();

        match result {
            Ok(()) | Err(TermOp::Continue) => Ok(LoopFlow::Next),
            Err(TermOp::Break) => Ok(LoopFlow::Stop),
            Err(e) => Err(e),
        }
    }

    fn exec_sleep(&mut self, span: Span, expr: &Located<ast::Expr>) -> Traversal<()> {
        let v = self.eval(expr)?;
        let range = span.cursor_range();

        let ms = match v {
            Value::Number(n) if !n.is_finite() => {
                Err(ValueErr::SleepNotFinite.at_range(range))?
            }
            Value::Number(n) if n < 0.0 => Err(ValueErr::SleepNegative.at_range(range))?,
            Value::Number(n) => n,
            Value::Duration(d) if d < TimeDelta::zero() => {
                Err(ValueErr::SleepNegative.at_range(range))?
            }
            Value::Duration(d) => d.num_milliseconds() as f64,
            v => Err(TypeErr::ExpectedType {
                expected: value::ValueType::Duration,
                got: v.ty(),
            }
            .at_range(range))?,
        };

        debug!(ms, "script sleeping");
        self.host.sleeper.sleep(StdDuration::from_millis(ms as u64));
        Ok(())
    }

    // === expressions ===

    /// Evaluate an expression node.
    pub fn eval(&mut self, expr: &Located<ast::Expr>) -> Traversal<Value> {
        let Located(e, span) = expr;
        let range = span.cursor_range();

        match e {
            ast::Expr::Ident(name) => self
                .scopes
                .get(name)
                .cloned()
                .ok_or_else(|| NameErr::NotDeclared(name.clone()).at_range(range).into()),
            ast::Expr::Literal(lit) => self.eval_literal(lit, *span),
            ast::Expr::ListLiteral(items) => {
                let mut vec = Vec::with_capacity(items.len());
                for item in items {
                    vec.push(self.eval(item)?);
                }
                Ok(Value::new_list(vec))
            }
            ast::Expr::MapLiteral(entries) => {
                let mut map = indexmap::IndexMap::with_capacity(entries.len());
                for (key, value) in entries {
                    let v = self.eval(value)?;
                    map.insert(key.0.clone(), v);
                }
                Ok(Value::new_map(map))
            }
            ast::Expr::FunExpr { name, params, body } => Ok(Value::Fun(FunValue {
                name: name.clone(),
                params: std::rc::Rc::new(params.iter().map(|p| p.0.clone()).collect()),
                body: body.clone(),
                scope: self.scopes.current(),
            })),
            ast::Expr::Assign { target, op, value } => self.eval_assign(target, *op, value),
            ast::Expr::Conditional { cond, then_val, else_val } => {
                if self.eval(cond)?.truth() {
                    self.eval(then_val)
                } else {
                    self.eval(else_val)
                }
            }
            ast::Expr::LogAnd { left, right } => {
                let l = self.eval(left)?;
                if l.truth() { self.eval(right) } else { Ok(l) }
            }
            ast::Expr::LogOr { left, right } => {
                let l = self.eval(left)?;
                if l.truth() { Ok(l) } else { self.eval(right) }
            }
            ast::Expr::UnaryOp { op, expr } => {
                let v = self.eval(expr)?;
                v.apply_unary(*op).map_err(|e| e.at_range(range).into())
            }
            ast::Expr::BinaryOp { op, left, right } => {
                let l = self.eval(left)?;
                let r = self.eval(right)?;
                l.apply_binary(*op, r).map_err(|e| e.at_range(range).into())
            }
            ast::Expr::Cmp { op, left, right } => {
                let l = self.eval(left)?;
                let r = self.eval(right)?;
                l.apply_cmp(*op, &r)
                    .map(Value::Bool)
                    .map_err(|e| e.at_range(range).into())
            }
            ast::Expr::Update { op, prefix, target } => self.eval_update(*op, *prefix, target),
            ast::Expr::Member { obj, prop } => {
                let parent = self.eval(obj)?;
                let key = PropKey::Name(prop.0.clone());
                self.read_prop(&parent, &key, prop.range())
            }
            ast::Expr::Index { obj, index } => {
                let parent = self.eval(obj)?;
                let key = PropKey::Computed(self.eval(index)?);
                self.read_prop(&parent, &key, index.range())
            }
            ast::Expr::Call { func, args } => {
                let callee = self.eval(func)?;
                let mut arg_values = Vec::with_capacity(args.len());
                for a in args {
                    arg_values.push(self.eval(a)?);
                }
                self.call_value(&callee, arg_values, func.range())
            }
        }
    }

    fn eval_literal(&mut self, lit: &ast::Literal, span: Span) -> Traversal<Value> {
        Ok(match lit {
            ast::Literal::Null => Value::Null,
            ast::Literal::Bool(b) => Value::Bool(*b),
            ast::Literal::Number(n) => Value::Number(*n),
            ast::Literal::Str(s) => Value::Str(s.clone()),
            ast::Literal::Regex { pattern, flags } => {
                let compiled = value::RegexValue::compile(pattern, flags)
                    .map_err(|e| e.at_range(span.cursor_range()))?;
                Value::Regex(std::rc::Rc::new(compiled))
            }
        })
    }

    /// Read a property, dispatching own data → method table → Null.
    ///
    /// Reads on Null fail immediately, naming the property.
    pub(crate) fn read_prop(&mut self, parent: &Value, key: &PropKey, at: Span) -> Traversal<Value> {
        if let Value::Null = parent {
            Err(ValueErr::PropertyOfNull(key.as_name()).at_range(at.cursor_range()))?
        }

        if let Some(v) = parent.get_own(key) {
            return Ok(v);
        }

        if let PropKey::Name(_) | PropKey::Computed(Value::Str(_)) = key {
            if let Some(method) = proto::lookup(parent, &key.as_name()) {
                return Ok(Value::Native(method));
            }
        }

        // absent properties read as Null, never as an error
        Ok(Value::Null)
    }

    /// Assignment, both plain and compound, for both target kinds.
    ///
    /// The Variable and Member paths are deliberately kept as two separate
    /// branches with the same operator handling; the original engine treats
    /// them separately and the tests pin both down.
    fn eval_assign(
        &mut self,
        target: &Located<ast::Expr>,
        op: Option<op::Binary>,
        value: &Located<ast::Expr>,
    ) -> Traversal<Value> {
        match &target.0 {
            ast::Expr::Ident(name) => match op {
                None => {
                    let v = self.eval(value)?;
                    // assigning an undeclared name declares it in the
                    // innermost frame
                    if !self.scopes.assign(name, v.clone()) {
                        self.scopes.declare_implicit(name.clone(), v.clone());
                    }
                    Ok(v)
                }
                Some(op) => {
                    // compound assignment reads first: undeclared is an error
                    let old = self.scopes.get(name).cloned().ok_or_else(|| {
                        NameErr::NotDeclared(name.clone())
                            .at_range(target.range().cursor_range())
                    })?;
                    let rhs = self.eval(value)?;
                    let new = old
                        .apply_binary(op, rhs)
                        .map_err(|e| e.at_range(target.range().cursor_range()))?;
                    self.scopes.assign(name, new.clone());
                    Ok(new)
                }
            },
            ast::Expr::Member { .. } | ast::Expr::Index { .. } => {
                let (parent, key, key_at) = self.resolve_member_target(target)?;

                if let Value::Null = parent {
                    Err(ValueErr::PropertyOfNull(key.as_name())
                        .at_range(key_at.cursor_range()))?
                }

                let new = match op {
                    None => self.eval(value)?,
                    Some(op) => {
                        let old = self.read_prop(&parent, &key, key_at)?;
                        let rhs = self.eval(value)?;
                        old.apply_binary(op, rhs)
                            .map_err(|e| e.at_range(target.range().cursor_range()))?
                    }
                };

                parent
                    .set_prop(&key, new.clone())
                    .map_err(|e| e.at_range(target.range().cursor_range()))?;
                Ok(new)
            }
            // the parser only produces the three target shapes above
            _ => unreachable!("invalid assignment target"),
        }
    }

    fn eval_update(
        &mut self,
        op: op::Update,
        prefix: bool,
        target: &Located<ast::Expr>,
    ) -> Traversal<Value> {
        let range = target.range().cursor_range();
        let delta = match op {
            op::Update::Inc => 1.0,
            op::Update::Dec => -1.0,
        };

        match &target.0 {
            ast::Expr::Ident(name) => {
                let old = self.scopes.get(name).cloned().ok_or_else(|| {
                    NameErr::NotDeclared(name.clone()).at_range(range.clone())
                })?;
                let Value::Number(n) = old else {
                    return Err(TypeErr::ExpectedType {
                        expected: value::ValueType::Number,
                        got: old.ty(),
                    }
                    .at_range(range)
                    .into());
                };

                let new = Value::Number(n + delta);
                self.scopes.assign(name, new.clone());
                Ok(if prefix { new } else { Value::Number(n) })
            }
            ast::Expr::Member { .. } | ast::Expr::Index { .. } => {
                let (parent, key, key_at) = self.resolve_member_target(target)?;

                if let Value::Null = parent {
                    Err(ValueErr::PropertyOfNull(key.as_name())
                        .at_range(key_at.cursor_range()))?
                }

                let old = self.read_prop(&parent, &key, key_at)?;
                let Value::Number(n) = old else {
                    return Err(TypeErr::ExpectedType {
                        expected: value::ValueType::Number,
                        got: old.ty(),
                    }
                    .at_range(range)
                    .into());
                };

                let new = Value::Number(n + delta);
                parent.set_prop(&key, new.clone()).map_err(|e| e.at_range(range))?;
                Ok(if prefix { new } else { Value::Number(n) })
            }
            _ => unreachable!("invalid update target"),
        }
    }

    /// Evaluate the parent and key of a Member/Index target.
    fn resolve_member_target(
        &mut self,
        target: &Located<ast::Expr>,
    ) -> Traversal<(Value, PropKey, Span)> {
        match &target.0 {
            ast::Expr::Member { obj, prop } => {
                let parent = self.eval(obj)?;
                Ok((parent, PropKey::Name(prop.0.clone()), prop.range()))
            }
            ast::Expr::Index { obj, index } => {
                let parent = self.eval(obj)?;
                let key = PropKey::Computed(self.eval(index)?);
                Ok((parent, key, index.range()))
            }
            _ => unreachable!("not a member target"),
        }
    }

    /// Call any callable value with computed arguments.
    ///
    /// This is the single entry point for calls — the `()` expression and
    /// every native collection method that invokes a user callback both go
    /// through here, so scope resolution and the call trace stay correct
    /// regardless of where the call originates.
    pub fn call_value(&mut self, callee: &Value, args: Vec<Value>, at: Span) -> Traversal<Value> {
        match callee {
            Value::Fun(f) => {
                let f = f.clone();
                self.call_user_fun(&f, args, at)
            }
            Value::Native(f) => {
                let f = f.clone();
                self.push_trace_frame(f.name.to_string(), at)?;
                let prev_at = std::mem::replace(&mut self.native_at, at);
                let result = f.call(self, args);
                self.native_at = prev_at;
                if !matches!(result, Err(TermOp::Err(_))) {
                    self.trace.pop();
                }
                result
            }
            v => Err(TypeErr::CannotCall(v.ty()).at_range(at.cursor_range()))?,
        }
    }

    fn call_user_fun(&mut self, f: &FunValue, args: Vec<Value>, at: Span) -> Traversal<Value> {
        self.push_trace_frame(f.trace_name(), at)?;

        // branch off the frame the function captured, not the caller's
        let caller = self.scopes.current();
        self.scopes.push_child_of(f.scope);

        let mut bind_err = None;
        for (i, param) in f.params.iter().enumerate() {
            // missing arguments bind as Null; excess arguments are dropped
            let v = args.get(i).cloned().unwrap_or(Value::Null);
            if let Err(e) = self.scopes.declare(param.clone(), v) {
                bind_err = Some(e.at_range(at.cursor_range()));
                break;
            }
        }

        let result = match bind_err {
            Some(e) => Err(e.into()),
            None => self.exec_stmts(&f.body.0),
        };
        self.scopes.set_current(caller);

        match result {
            Ok(()) => {
                self.trace.pop();
                Ok(Value::Null)
            }
            Err(TermOp::Return(v)) => {
                self.trace.pop();
                Ok(v)
            }
            // loop signals never escape a function body
            Err(TermOp::Break) | Err(TermOp::Continue) => {
                self.trace.pop();
                Ok(Value::Null)
            }
            // errors keep their frame so the trace survives to the report;
            // reply unwinds everything and cleanup() reclaims the stack
            Err(e @ (TermOp::Err(_) | TermOp::Reply(_))) => Err(e),
        }
    }

    fn push_trace_frame(&mut self, name: String, at: Span) -> Traversal<()> {
        if self.trace.len() >= MAX_CALL_DEPTH {
            Err(ValueErr::CallDepthExceeded.at_range(at.cursor_range()))?
        }
        self.trace.push(TraceFrame { name, pos: at.start });
        Ok(())
    }
}

/// What a finished loop iteration tells the loop driver.
enum LoopFlow {
    Next,
    Stop,
}

/// Runtime errors.
///
/// The most general error is [`RuntimeErr`].
pub mod err {
    use crate::ast::op;
    use crate::bridge::storage::StorageErr;
    use crate::bridge::BridgeErr;
    use crate::err::full_script_cast_impl;
    use crate::err::ScriptErr;

    use super::value::{RvErr, ValueType};
    use super::{MAX_CALL_DEPTH, MAX_LOOP_ITERATIONS};

    macro_rules! rt_err {
        ($($e:ident),*) => {
            /// Errors that occur during runtime evaluation.
            #[derive(Debug)]
            pub enum RuntimeErr {
                $(
                    #[allow(missing_docs)]
                    $e($e)
                ),*
            }

            $(
                impl From<$e> for RuntimeErr {
                    fn from(e: $e) -> Self {
                        Self::$e(e)
                    }
                }

                impl From<$e> for $crate::err::FullScriptErr<RuntimeErr> {
                    fn from(e: $e) -> Self {
                        ScriptErr::at_unknown(RuntimeErr::from(e))
                    }
                }

                full_script_cast_impl!($e, RuntimeErr);
            )*

            impl ScriptErr for RuntimeErr {
                fn err_name(&self) -> &'static str {
                    match self {
                        $(
                            Self::$e(e) => e.err_name()
                        ),*
                    }
                }

                fn message(&self) -> String {
                    match self {
                        $(
                            Self::$e(e) => e.message()
                        ),*
                    }
                }
            }
        }
    }

    rt_err! { TypeErr, ValueErr, NameErr, RvErr, HostErr }

    /// An error caused by type mismatches.
    #[derive(Debug)]
    pub enum TypeErr {
        /// The unary operator cannot be applied to this type.
        CannotUnary(op::Unary, ValueType),

        /// The binary operator cannot be applied between these two types.
        CannotBinary(op::Binary, ValueType, ValueType),

        /// These two types can't be compared using the given operation.
        CannotCmp(op::Cmp, ValueType, ValueType),

        /// Cannot iterate over this type.
        NotIterable(ValueType),

        /// Cannot call this type.
        CannotCall(ValueType),

        /// Cannot assign to properties of this type.
        CannotSetProp(ValueType),

        /// A specific type was expected here.
        ExpectedType {
            /// The type the operation needs.
            expected: ValueType,
            /// The type it was given.
            got: ValueType,
        },
    }

    impl ScriptErr for TypeErr {
        fn err_name(&self) -> &'static str {
            "type error"
        }

        fn message(&self) -> String {
            match self {
                TypeErr::CannotUnary(op, t1) => format!("cannot apply '{op}' to {t1}"),
                TypeErr::CannotBinary(op, t1, t2) => {
                    format!("cannot apply '{op}' to {t1} and {t2}")
                }
                TypeErr::CannotCmp(op, t1, t2) => {
                    format!("cannot compare '{op}' between {t1} and {t2}")
                }
                TypeErr::NotIterable(t1) => format!("{t1} is not iterable"),
                TypeErr::CannotCall(t1) => format!("{t1} is not callable"),
                TypeErr::CannotSetProp(t1) => format!("cannot assign to properties of {t1}"),
                TypeErr::ExpectedType { expected, got } => format!("expected {expected}, got {got}"),
            }
        }
    }

    /// An error caused by invalid values or exhausted execution budgets.
    #[derive(Debug)]
    pub enum ValueErr {
        /// A property was read (or written) on Null.
        PropertyOfNull(String),

        /// A loop ran past the iteration ceiling with its condition still true.
        IterationLimit,

        /// Function calls nested past the depth ceiling.
        CallDepthExceeded,

        /// `sleep` was given a negative duration.
        SleepNegative,

        /// `sleep` was given a non-finite number.
        SleepNotFinite,

        /// `for (x of n)` was given a non-finite bound.
        NonFiniteIterBound,

        /// An array was indexed with something that is not a valid index.
        BadListIndex(String),

        /// A regex literal failed to compile.
        BadRegex(String),

        /// A regex literal carried an unknown flag.
        BadRegexFlag(char),

        /// Time arithmetic left the representable range.
        TimeOutOfRange,

        /// Duration arithmetic left the representable range.
        DurationOutOfRange,

        /// The value has no JSON form (functions).
        Unserializable(ValueType),

        /// The value cannot be put into storage (functions).
        Unstorable(ValueType),

        /// A `Time(...)` constructor argument did not parse.
        BadTime(String),

        /// A `Duration(...)` constructor argument did not parse.
        BadDuration(String),

        /// A native function was given an argument it cannot use.
        InvalidArg(&'static str, &'static str),
    }

    impl ScriptErr for ValueErr {
        fn err_name(&self) -> &'static str {
            "value error"
        }

        fn message(&self) -> String {
            match self {
                ValueErr::PropertyOfNull(prop) => {
                    format!("cannot read property '{prop}' of null")
                }
                ValueErr::IterationLimit => {
                    format!("loop exceeded {MAX_LOOP_ITERATIONS} iterations")
                }
                ValueErr::CallDepthExceeded => {
                    format!("call depth exceeded {MAX_CALL_DEPTH} nested calls")
                }
                ValueErr::SleepNegative => String::from("sleep duration must be positive"),
                ValueErr::SleepNotFinite => String::from("sleep duration must be finite"),
                ValueErr::NonFiniteIterBound => {
                    String::from("cannot iterate up to a non-finite number")
                }
                ValueErr::BadListIndex(k) => format!("'{k}' is not a valid array index"),
                ValueErr::BadRegex(msg) => format!("invalid regular expression: {msg}"),
                ValueErr::BadRegexFlag(f) => format!("unknown regular expression flag '{f}'"),
                ValueErr::TimeOutOfRange => String::from("time value out of range"),
                ValueErr::DurationOutOfRange => String::from("duration value out of range"),
                ValueErr::Unserializable(t) => format!("a {t} cannot be converted to JSON"),
                ValueErr::Unstorable(t) => format!("a {t} cannot be stored"),
                ValueErr::BadTime(s) => format!("'{s}' is not a valid time"),
                ValueErr::BadDuration(s) => format!("'{s}' is not a valid duration"),
                ValueErr::InvalidArg(fun, what) => format!("{fun} expects {what}"),
            }
        }
    }

    /// An error caused by variable name conflicts.
    #[derive(Debug)]
    pub enum NameErr {
        /// Variable was read before any assignment declared it.
        NotDeclared(String),

        /// Variable was already declared in the same scope.
        AlreadyDeclared(String),
    }

    impl ScriptErr for NameErr {
        fn err_name(&self) -> &'static str {
            "name error"
        }

        fn message(&self) -> String {
            match self {
                NameErr::NotDeclared(name) => format!("'{name}' is not declared yet"),
                NameErr::AlreadyDeclared(name) => format!("cannot redeclare '{name}'"),
            }
        }
    }

    impl ScriptErr for RvErr {
        fn err_name(&self) -> &'static str {
            "value error"
        }

        fn message(&self) -> String {
            match self {
                RvErr::BorrowConcur => {
                    String::from("container is being iterated and cannot be read")
                }
                RvErr::BorrowMutConcur => {
                    String::from("container is being iterated and cannot be changed")
                }
            }
        }
    }

    /// An error surfaced from the host boundary: the platform bridge or
    /// the storage engine. Both arrive as ordinary script errors.
    #[derive(Debug)]
    pub enum HostErr {
        #[allow(missing_docs)]
        Bridge(BridgeErr),
        #[allow(missing_docs)]
        Storage(StorageErr),
    }

    impl ScriptErr for HostErr {
        fn err_name(&self) -> &'static str {
            match self {
                HostErr::Bridge(_) => "platform error",
                HostErr::Storage(_) => "storage error",
            }
        }

        fn message(&self) -> String {
            match self {
                HostErr::Bridge(e) => e.to_string(),
                HostErr::Storage(e) => e.to_string(),
            }
        }
    }

    impl From<BridgeErr> for RuntimeErr {
        fn from(e: BridgeErr) -> Self {
            RuntimeErr::HostErr(HostErr::Bridge(e))
        }
    }
    impl From<StorageErr> for RuntimeErr {
        fn from(e: StorageErr) -> Self {
            RuntimeErr::HostErr(HostErr::Storage(e))
        }
    }
}

pub use err::*;

/// A [`RuntimeErr`] with position information attached.
pub type FullRuntimeErr = FullScriptErr<RuntimeErr>;
