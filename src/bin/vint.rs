use std::{path::PathBuf, process::ExitCode, sync::Once};

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use vint::{ExecutionContext, Interpreter, Repl, VintError};

static TRACING_INIT: Once = Once::new();

#[derive(Parser)]
#[command(author, version, about = "Vint language interpreter")]
struct Args {
    /// Extra directory searched by `import`; may be repeated
    #[arg(long = "path", global = true, env = "VINT_PATH", value_delimiter = PATH_SEPARATOR)]
    paths: Vec<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[cfg(windows)]
const PATH_SEPARATOR: char = ';';
#[cfg(not(windows))]
const PATH_SEPARATOR: char = ':';

#[derive(Subcommand)]
enum Command {
    /// Run a Vint script file
    Run { script: PathBuf },
    /// Start an interactive REPL session
    Repl,
    /// Evaluate a snippet of Vint code
    Eval { source: String },
}

/// Logs go to stderr, filtered by `VINT_LOG` (default `warn`).
fn init_tracing() {
    TRACING_INIT.call_once(|| {
        let filter = EnvFilter::try_from_env("VINT_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
        tracing_subscriber::registry()
            .with(fmt::layer().with_writer(std::io::stderr).with_target(false))
            .with(filter)
            .init();
    });
}

fn main() -> ExitCode {
    init_tracing();
    let args = Args::parse();
    let context = args
        .paths
        .into_iter()
        .filter(|path| !path.as_os_str().is_empty())
        .fold(ExecutionContext::default(), ExecutionContext::with_search_path);

    let outcome = match args.command.unwrap_or(Command::Repl) {
        Command::Run { script } => Interpreter::with_context(context).run_file(script).map(drop),
        Command::Eval { source } => Interpreter::with_context(context)
            .eval_source(&source)
            .map(drop),
        Command::Repl => Repl::with_context(context).run(),
    };
    match outcome {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            report(&err);
            ExitCode::FAILURE
        }
    }
}

fn report(err: &VintError) {
    match err {
        VintError::Diagnostic(diag) => eprintln!("{:?} error: {}", diag.kind, diag.message),
        VintError::Io(io) => eprintln!("error: {io}"),
    }
}
