//! The statement stack: an arena of scope frames used for variable resolution.
//!
//! Scoping is not tied to the host call stack. Every lexical block gets a frame
//! in the arena, identified by index, and a frame chain is walked innermost-first
//! through parent indices. Function values capture the index of their defining
//! frame, so a callback invoked later (e.g. from inside `map`) re-enters the
//! scope chain it closed over, no matter how deep the host stack is at that point.
//!
//! Frames are appended for the lifetime of one script run and released all at
//! once by [`ScopeArena::cleanup`]; popping a scope only moves the cursor back
//! to the parent frame.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use super::err::NameErr;
use super::value::Value;

/// Index of a frame within a [`ScopeArena`].
pub type FrameId = usize;

#[derive(Debug)]
struct Frame {
    vars: HashMap<String, Value>,
    parent: Option<FrameId>,
}

/// Stores the variables of every scope of the current run.
///
/// This also provides read/write access to variables in parent scopes.
#[derive(Debug)]
pub struct ScopeArena {
    frames: Vec<Frame>,
    current: FrameId,
}

impl ScopeArena {
    /// Create a new arena with a single root frame seeded with
    /// the given bindings (the script's globals).
    pub fn new(globals: HashMap<String, Value>) -> Self {
        Self {
            frames: vec![Frame { vars: globals, parent: None }],
            current: 0,
        }
    }

    /// The frame the interpreter is currently executing in.
    pub fn current(&self) -> FrameId {
        self.current
    }

    /// Enter a child scope of the current frame.
    pub fn push_child(&mut self) -> FrameId {
        self.push_child_of(self.current)
    }

    /// Enter a child scope branching off an arbitrary frame.
    ///
    /// This is how a function call switches to its lexical scope: the child
    /// branches off the frame the function captured, not the caller's frame.
    pub fn push_child_of(&mut self, parent: FrameId) -> FrameId {
        let id = self.frames.len();
        self.frames.push(Frame { vars: HashMap::new(), parent: Some(parent) });
        self.current = id;
        id
    }

    /// Leave the current scope. The frame stays in the arena (a closure may
    /// have captured it); only the cursor moves.
    pub fn pop(&mut self) {
        if let Some(parent) = self.frames[self.current].parent {
            self.current = parent;
        }
    }

    /// Move the cursor to an arbitrary frame (restoring the caller's scope
    /// after a function call returns).
    pub fn set_current(&mut self, id: FrameId) {
        debug_assert!(id < self.frames.len());
        self.current = id;
    }

    /// Query a variable, walking the chain innermost-first.
    pub fn get(&self, ident: &str) -> Option<&Value> {
        self.chain().find_map(|f| f.vars.get(ident))
    }

    /// Declares a variable in the current frame.
    ///
    /// Explicit declarations (function names, parameters, loop variables)
    /// reject a name already declared in the same frame.
    pub fn declare(&mut self, ident: String, v: Value) -> Result<(), NameErr> {
        match self.frames[self.current].vars.entry(ident) {
            Entry::Occupied(ent) => Err(NameErr::AlreadyDeclared(ent.key().clone())),
            Entry::Vacant(ent) => {
                ent.insert(v);
                Ok(())
            }
        }
    }

    /// Declare a variable in the current frame without a redeclaration check.
    ///
    /// This is the implicit first-assignment declaration: `x = 1` with no `x`
    /// in scope binds `x` in the innermost frame.
    pub fn declare_implicit(&mut self, ident: String, v: Value) {
        self.frames[self.current].vars.insert(ident, v);
    }

    /// Set an existing variable, resolving to the innermost frame that
    /// declares it. Returns `false` when no frame in the chain declares it.
    pub fn assign(&mut self, ident: &str, v: Value) -> bool {
        let mut cursor = Some(self.current);
        while let Some(id) = cursor {
            let frame = &mut self.frames[id];
            if let Some(slot) = frame.vars.get_mut(ident) {
                *slot = v;
                return true;
            }
            cursor = frame.parent;
        }

        false
    }

    /// Release every frame of this run and restart from an empty root.
    ///
    /// Runs on every exit path of a script so a pooled interpreter
    /// never leaks scope state into the next run.
    pub fn cleanup(&mut self) {
        self.frames.clear();
        self.frames.push(Frame { vars: HashMap::new(), parent: None });
        self.current = 0;
    }

    /// The number of frames allocated by this run.
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    fn chain(&self) -> impl Iterator<Item = &Frame> {
        let mut cursor = Some(self.current);
        std::iter::from_fn(move || {
            let id = cursor?;
            let frame = &self.frames[id];
            cursor = frame.parent;
            Some(frame)
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::super::value::Value;
    use super::ScopeArena;

    #[test]
    fn inner_frames_see_outer_variables() {
        let mut a = ScopeArena::new(HashMap::new());
        a.declare(String::from("a"), Value::Number(1.0)).unwrap();

        a.push_child();
        a.declare(String::from("b"), Value::Number(2.0)).unwrap();

        assert_eq!(a.get("a"), Some(&Value::Number(1.0)));
        assert_eq!(a.get("b"), Some(&Value::Number(2.0)));

        a.pop();
        assert_eq!(a.get("b"), None);
    }

    #[test]
    fn assign_resolves_to_outer_binding() {
        let mut a = ScopeArena::new(HashMap::new());
        a.declare(String::from("x"), Value::Number(1.0)).unwrap();

        a.push_child();
        assert!(a.assign("x", Value::Number(5.0)));
        a.pop();

        assert_eq!(a.get("x"), Some(&Value::Number(5.0)));
    }

    #[test]
    fn redeclaration_in_same_frame_rejected() {
        let mut a = ScopeArena::new(HashMap::new());
        a.declare(String::from("x"), Value::Null).unwrap();
        assert!(a.declare(String::from("x"), Value::Null).is_err());
    }

    #[test]
    fn closure_frame_survives_pop() {
        let mut a = ScopeArena::new(HashMap::new());
        let outer = a.current();

        let captured = a.push_child_of(outer);
        a.declare(String::from("n"), Value::Number(42.0)).unwrap();
        a.pop();

        // a later call branching off the captured frame still sees `n`
        a.push_child_of(captured);
        assert_eq!(a.get("n"), Some(&Value::Number(42.0)));
    }
}
