#![warn(missing_docs)]

//! The custom-command scripting engine: a small C-like language that guild
//! staff use to script server automation, executed in a sandbox.
//!
//! # Parsing
//!
//! Parsing of a string to a program tree is done with the [`lexer`] and
//! [`parser`] modules.
//!
//! These modules provide:
//! - [`Lexer`][`lexer::Lexer`]: A struct that scans strings into sequences of tokens,
//!   collecting lexical errors instead of aborting.
//! - [`Parser`][`parser::Parser`]: A struct that processes sequences of tokens into a
//!   tree, collecting syntax errors per statement.
//! - [`ast`]: The components of the tree.
//!
//! # Running
//!
//! The [`interpreter`] module walks the tree directly. Scripts run to
//! completion under hard budgets (loop iteration ceiling, call depth
//! ceiling) and end either quietly or through a `reply`, which carries the
//! script's output. The [`bridge`] module is the boundary to the live chat
//! platform and to persistent storage; both are injected into the
//! [`Executor`][`interpreter::Executor`], never global.
//!
//! ```
//! use ccscript::interpreter::{compile, Executor, RunRequest};
//! use ccscript::bridge::storage::{MemoryStorage, StorageEngine};
//! use ccscript::bridge::StaticBridge;
//! use ccscript::snapshot::InvocationSnapshot;
//!
//! let executor = Executor::new(
//!     Box::new(StaticBridge::new()),
//!     StorageEngine::new(Box::new(MemoryStorage::new())),
//! );
//!
//! let snapshot = InvocationSnapshot::default();
//! let out = executor
//!     .run(RunRequest { id: "demo", code: "reply 5 + 3;", program: None }, &snapshot)
//!     .unwrap();
//! assert_eq!(out.content.as_deref(), Some("8"));
//! ```

pub mod ast;
pub mod bridge;
pub mod err;
pub mod interpreter;
pub mod lexer;
pub mod parser;
pub mod snapshot;
pub mod span;

pub use interpreter::{compile, lint, Executor, RunOutput, RunRequest, ScriptError, SyntaxError};
