//! Command line front end: lint a script, or run one against a snapshot
//! file with canned platform responses and in-memory storage.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use ccscript::bridge::storage::{MemoryStorage, StorageEngine};
use ccscript::bridge::StaticBridge;
use ccscript::interpreter::{lint, Executor, RunRequest};
use ccscript::snapshot::InvocationSnapshot;

#[derive(Parser)]
#[command(name = "ccscript", about = "Custom-command script engine", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check a script for syntax errors without running it
    Lint {
        /// Path to the script
        file: PathBuf,
    },
    /// Run a script and print its reply
    Run {
        /// Path to the script
        file: PathBuf,

        /// JSON file with the invocation snapshot
        #[arg(long)]
        snapshot: Option<PathBuf>,

        /// Raw argument text for the script's `args`/`argsRaw` bindings
        #[arg(long, default_value = "")]
        args: String,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    match Cli::parse().command {
        Command::Lint { file } => cmd_lint(file),
        Command::Run { file, snapshot, args } => cmd_run(file, snapshot, args),
    }
}

fn cmd_lint(file: PathBuf) -> ExitCode {
    let source = match std::fs::read_to_string(&file) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("cannot read {}: {e}", file.display());
            return ExitCode::FAILURE;
        }
    };

    let errors = lint(&source);
    if errors.is_empty() {
        println!("ok");
        return ExitCode::SUCCESS;
    }

    for e in &errors {
        println!(
            "{}:{}-{}:{} {}",
            e.start_line_number, e.start_column, e.end_line_number, e.end_column, e.message
        );
    }
    ExitCode::FAILURE
}

fn cmd_run(file: PathBuf, snapshot_path: Option<PathBuf>, args: String) -> ExitCode {
    let source = match std::fs::read_to_string(&file) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("cannot read {}: {e}", file.display());
            return ExitCode::FAILURE;
        }
    };

    let mut snapshot = match snapshot_path {
        None => InvocationSnapshot::default(),
        Some(p) => {
            let raw = match std::fs::read_to_string(&p) {
                Ok(s) => s,
                Err(e) => {
                    eprintln!("cannot read {}: {e}", p.display());
                    return ExitCode::FAILURE;
                }
            };
            match serde_json::from_str(&raw) {
                Ok(s) => s,
                Err(e) => {
                    eprintln!("bad snapshot file: {e}");
                    return ExitCode::FAILURE;
                }
            }
        }
    };
    if !args.is_empty() {
        snapshot.args_raw = args;
    }

    let executor = Executor::new(
        Box::new(StaticBridge::new()),
        StorageEngine::new(Box::new(MemoryStorage::new())),
    );

    let name = file.display().to_string();
    match executor.run(RunRequest { id: &name, code: &source, program: None }, &snapshot) {
        Ok(output) => {
            if let Some(content) = output.content {
                println!("{content}");
            }
            if let Some(embed) = output.embed {
                println!("{}", serde_json::to_string_pretty(&embed).unwrap_or_default());
            }
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("{e}");
            ExitCode::FAILURE
        }
    }
}
