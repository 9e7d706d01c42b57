//! Converts text into a running script and exposes the engine's three
//! operations: compile, lint, and run.
//!
//! This module provides:
//! - [`compile`]: source → tree plus collected syntax errors
//! - [`lint`]: source → syntax errors only, for pre-save validation
//! - [`Executor`]: the owner of the injected host services, which runs
//!   compiled scripts against an invocation snapshot
//!
//! The executor guarantees context cleanup on every exit path — success,
//! script error, or reply — so pooled reuse never observes leaked scope
//! frames.

use serde::Serialize;
use tracing::{debug, info_span};

use crate::ast;
use crate::bridge::storage::StorageEngine;
use crate::bridge::{PlatformBridge, Sleeper, ThreadSleeper};
use crate::err::{FullScriptErr, ScriptErr};
use crate::lexer;
use crate::parser;
use crate::snapshot::InvocationSnapshot;

pub mod runtime;

use runtime::value::{value_to_json, Value};
use runtime::{ExecContext, HostServices, DEFAULT_TRACE_DEPTH};

/// A syntax error in the editor-facing shape: 1-based positions plus a
/// human-readable message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyntaxError {
    #[allow(missing_docs)]
    pub start_line_number: u32,
    #[allow(missing_docs)]
    pub start_column: u32,
    #[allow(missing_docs)]
    pub end_line_number: u32,
    #[allow(missing_docs)]
    pub end_column: u32,
    /// What went wrong, including the valid continuations where known.
    pub message: String,
}

impl SyntaxError {
    fn from_err<E: ScriptErr>(e: &FullScriptErr<E>) -> Self {
        let (sl, sc) = e.first_pos().unwrap_or((0, 0));
        let (el, ec) = e.last_pos().unwrap_or((sl, sc));

        SyntaxError {
            start_line_number: sl as u32 + 1,
            start_column: sc as u32 + 1,
            end_line_number: el as u32 + 1,
            end_column: ec as u32 + 2,
            message: e.inner().message(),
        }
    }
}

/// The result of compiling a script: the tree when the source was clean,
/// otherwise every syntax error found.
#[derive(Debug)]
pub struct CompileOutput {
    /// The compiled program; `None` when any error was found.
    pub program: Option<ast::Program>,
    /// Tokenizer and parser errors together, in source order.
    pub errors: Vec<SyntaxError>,
}

/// Compile script source into a program tree.
///
/// Lexical and syntax errors are batch-collected, never thrown: a script
/// with several independent mistakes reports them all in one pass.
pub fn compile(source: &str) -> CompileOutput {
    let lexed = lexer::tokenize(source);
    let parsed = parser::parse(lexed.tokens);

    let mut errors: Vec<SyntaxError> = vec![];
    errors.extend(lexed.errors.iter().map(SyntaxError::from_err));
    errors.extend(parsed.errors.iter().map(SyntaxError::from_err));

    CompileOutput {
        program: if errors.is_empty() { parsed.program } else { None },
        errors,
    }
}

/// Validate a script without keeping the tree. Used before saving a
/// custom command.
pub fn lint(source: &str) -> Vec<SyntaxError> {
    compile(source).errors
}

/// What a finished run hands back to the command dispatcher.
///
/// A reply that was an object becomes an embed; anything else becomes
/// plain message content. A script that never replied produces neither.
#[derive(Debug, Default, PartialEq, Serialize)]
pub struct RunOutput {
    /// Plain text output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    /// Rich embed output.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub embed: Option<serde_json::Value>,
}

/// A failed run, shaped for display to the script's author.
#[derive(Debug)]
pub enum ScriptError {
    /// The script did not compile.
    Syntax(Vec<SyntaxError>),
    /// The script failed while executing.
    Runtime {
        /// The positioned message, with a pointer into the source.
        message: String,
        /// The call stack at failure, innermost frame first, rendered.
        stack: Vec<String>,
    },
}

impl std::fmt::Display for ScriptError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScriptError::Syntax(errors) => {
                writeln!(f, "the script failed to compile:")?;
                for e in errors {
                    writeln!(
                        f,
                        "  {}:{} {}",
                        e.start_line_number, e.start_column, e.message
                    )?;
                }
                Ok(())
            }
            ScriptError::Runtime { message, stack } => {
                write!(f, "{message}")?;
                if !stack.is_empty() {
                    write!(f, "\nstack:")?;
                    for frame in stack {
                        write!(f, "\n  {frame}")?;
                    }
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for ScriptError {}

/// One run request: the script's identity and source, plus its optional
/// pre-compiled tree (saved commands cache their tree between runs).
pub struct RunRequest<'a> {
    /// Identifier of the custom command, for logs.
    pub id: &'a str,
    /// The script source, used for error excerpts (and compiled on the
    /// fly when `program` is absent).
    pub code: &'a str,
    /// A previously compiled tree for `code`, if the caller kept one.
    pub program: Option<&'a ast::Program>,
}

/// Runs scripts against injected host services.
///
/// The bridge and storage are constructor parameters — there is no
/// module-level connection state — so the embedding process controls
/// their lifecycle and tests can substitute both.
pub struct Executor {
    bridge: Box<dyn PlatformBridge>,
    storage: StorageEngine,
    sleeper: Box<dyn Sleeper>,
    trace_depth: usize,
}

impl Executor {
    /// Build an executor over a platform bridge and a storage engine.
    pub fn new(bridge: Box<dyn PlatformBridge>, storage: StorageEngine) -> Self {
        Self {
            bridge,
            storage,
            sleeper: Box::new(ThreadSleeper),
            trace_depth: DEFAULT_TRACE_DEPTH,
        }
    }

    /// Replace the sleep implementation (tests use a recorder).
    pub fn with_sleeper(mut self, sleeper: Box<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    /// Change how many stack frames error reports show.
    pub fn with_trace_depth(mut self, depth: usize) -> Self {
        self.trace_depth = depth;
        self
    }

    /// Run one script to completion.
    ///
    /// The script's `reply` payload becomes the output: objects turn into
    /// embeds, everything else into message content. Completion without a
    /// reply produces an empty output.
    pub fn run(
        &self,
        req: RunRequest<'_>,
        snapshot: &InvocationSnapshot,
    ) -> Result<RunOutput, ScriptError> {
        let span = info_span!("script_run", id = req.id, guild = %snapshot.guild.id);
        let _guard = span.enter();

        let compiled;
        let program = match req.program {
            Some(p) => p,
            None => {
                let out = compile(req.code);
                if !out.errors.is_empty() {
                    debug!(errors = out.errors.len(), "script failed to compile");
                    return Err(ScriptError::Syntax(out.errors));
                }
                compiled = out.program.expect("no errors implies a program");
                &compiled
            }
        };

        let host = HostServices {
            bridge: self.bridge.as_ref(),
            storage: &self.storage,
            sleeper: self.sleeper.as_ref(),
        };

        let mut ctx = ExecContext::new(&host, snapshot);
        let result = ctx.run_program(program);

        // convert before cleanup: the trace snapshot lives in the context
        let output = match result {
            Ok(reply) => Ok(Self::format_reply(reply)),
            Err(e) => {
                let stack = ctx
                    .trace_snapshot(self.trace_depth)
                    .iter()
                    .map(runtime::TraceFrame::render)
                    .collect();
                Err(ScriptError::Runtime {
                    message: e.full_msg(req.code),
                    stack,
                })
            }
        };

        // both stacks are cleared on every exit path
        ctx.cleanup();
        output
    }

    /// Shape a reply value into the dispatcher-facing output.
    fn format_reply(reply: Option<Value>) -> RunOutput {
        let Some(value) = reply else {
            return RunOutput::default();
        };

        match &value {
            // objects reply as embeds; a failed conversion (functions
            // nested in the object) degrades to the text form
            Value::Map(_) => match value_to_json(&value) {
                Ok(json) => RunOutput { content: None, embed: Some(json) },
                Err(_) => RunOutput {
                    content: Some(value.to_display_string()),
                    embed: None,
                },
            },
            v => RunOutput {
                content: Some(v.to_display_string()),
                embed: None,
            },
        }
    }
}
