//! Core library for the Vint scripting language: front end, tree-walking
//! evaluator, runtime values and REPL utilities.

pub mod ast;
pub mod concurrency;
pub mod diagnostics;
pub mod environment;
pub mod lexer;
pub mod output;
pub mod parser;
pub mod repl;
pub mod runtime;
pub mod stdlib;
pub mod value;

pub use diagnostics::{Diagnostic, DiagnosticKind, SourceSpan, VintError};
pub use output::Output;
pub use repl::Repl;
pub use runtime::{Evaluator, ExecutionContext, Interpreter, ModuleResolver};
pub use value::Value;
