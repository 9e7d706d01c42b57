//! Function values: user-defined script functions and host natives.

use std::rc::Rc;

use crate::ast;
use crate::interpreter::runtime::vars::FrameId;
use crate::interpreter::runtime::{ExecContext, Traversal};

use super::Value;

/// A user-defined function in runtime.
///
/// The body is shared with the syntax tree; `scope` is the frame the function
/// was defined in, which a call branches off of (lexical scoping).
#[derive(Debug, Clone)]
pub struct FunValue {
    /// The function's name, if it has one.
    pub name: Option<String>,
    /// Declared parameter names.
    pub params: Rc<Vec<String>>,
    /// The function body.
    pub body: Rc<ast::Block>,
    /// The frame captured at definition time.
    pub scope: FrameId,
}

impl PartialEq for FunValue {
    fn eq(&self, other: &Self) -> bool {
        // identity: two functions are the same function, not equal-looking ones
        Rc::ptr_eq(&self.body, &other.body) && self.scope == other.scope
    }
}

impl FunValue {
    /// The name shown in stack traces.
    pub fn trace_name(&self) -> String {
        self.name.clone().unwrap_or_else(|| String::from("<anonymous>"))
    }
}

/// The signature of a host-defined function.
///
/// Natives receive the live execution context so they can call back into
/// the interpreter (collection methods invoking user callbacks) and reach
/// the host bridge.
pub type NativeFnPtr = fn(&mut ExecContext, Option<&Value>, Vec<Value>) -> Traversal<Value>;

/// A host-defined function, optionally bound to a receiver.
///
/// Prototype methods are handed out bound: `xs.map` is a `NativeFun` whose
/// `this` is the array it was read from.
#[derive(Clone)]
pub struct NativeFun {
    /// Name shown in errors and traces.
    pub name: &'static str,
    pub(crate) fun: NativeFnPtr,
    pub(crate) this: Option<Rc<Value>>,
}

impl NativeFun {
    /// An unbound host function (a global).
    pub fn new(name: &'static str, fun: NativeFnPtr) -> Self {
        Self { name, fun, this: None }
    }

    /// A host function bound to a receiver (a prototype method).
    pub fn bound(name: &'static str, fun: NativeFnPtr, this: Value) -> Self {
        Self { name, fun, this: Some(Rc::new(this)) }
    }

    /// Invoke the native with the same argument contract as script functions.
    pub fn call(&self, ctx: &mut ExecContext, args: Vec<Value>) -> Traversal<Value> {
        (self.fun)(ctx, self.this.as_deref(), args)
    }
}

impl PartialEq for NativeFun {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self.fun as *const (), other.fun as *const ()) && self.name == other.name
    }
}

impl std::fmt::Debug for NativeFun {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeFun")
            .field("name", &self.name)
            .field("bound", &self.this.is_some())
            .finish()
    }
}
