use std::io;

use rustyline::{error::ReadlineError, DefaultEditor};

use crate::{
    diagnostics::{Result, VintError},
    runtime::{ExecutionContext, Interpreter},
};

/// Line-at-a-time session over one interpreter, so bindings persist between
/// inputs.
pub struct Repl {
    interpreter: Interpreter,
}

impl Repl {
    pub fn new() -> Self {
        Self::with_context(ExecutionContext::default())
    }

    pub fn with_context(context: ExecutionContext) -> Self {
        Self {
            interpreter: Interpreter::with_context(context),
        }
    }

    pub fn run(&mut self) -> Result<()> {
        let mut editor = DefaultEditor::new().map_err(readline_error)?;
        loop {
            match editor.readline(">>> ") {
                Ok(line) => {
                    let trimmed = line.trim();
                    if trimmed == ":quit" || trimmed == ":exit" {
                        break;
                    }
                    if trimmed.is_empty() {
                        continue;
                    }
                    editor.add_history_entry(trimmed).ok();
                    match self.interpreter.eval_source(trimmed) {
                        Ok(value) if value.is_null() => {}
                        Ok(value) => println!("{value}"),
                        Err(VintError::Diagnostic(diag)) => {
                            eprintln!("{:?}: {}", diag.kind, diag.message);
                        }
                        Err(other) => eprintln!("error: {other}"),
                    }
                }
                Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
                Err(err) => return Err(readline_error(err)),
            }
        }
        Ok(())
    }
}

impl Default for Repl {
    fn default() -> Self {
        Self::new()
    }
}

fn readline_error(err: ReadlineError) -> VintError {
    VintError::from(io::Error::new(io::ErrorKind::Other, err))
}
