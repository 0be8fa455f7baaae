//! Tree-walking evaluator for Vint programs.
//!
//! Control flow travels as ordinary values: `return`, `break`, `continue`
//! and runtime errors come back from `eval_*` like any other result and stop
//! the enclosing statement sequence. Only the [`Interpreter`] driver turns an
//! escaping error into a [`VintError`].

use std::{
    cell::{Cell, RefCell},
    fmt, fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use indexmap::IndexMap;
use tracing::{debug, info, warn};

/// Returns early from the current evaluation when `$value` is a control
/// signal (return, break, continue or error).
macro_rules! propagate {
    ($value:expr) => {{
        let value = $value;
        if value.is_signal() {
            return value;
        }
        value
    }};
}

mod call;
mod control;
mod encapsulation;
mod imports;
mod operators;

pub use imports::ModuleResolver;

use crate::{
    ast::{Declarative, Expr, ExprKind, Literal, Program, Stmt, StmtKind},
    concurrency::{spawn_detached, Channel},
    diagnostics::{Result, SourceSpan, VintError},
    environment::{Environment, EnvironmentRef, ScopeError},
    output::{Output, SharedOutput},
    parser,
    stdlib,
    value::{Dict, EnumValue, ErrorType, Host, Value, ValueKind},
};

/// Nested user-function calls allowed before evaluation gives up.
pub const MAX_CALL_DEPTH: usize = 2048;

const STACK_RED_ZONE: usize = 100 * 1024;
const STACK_GROWTH: usize = 1024 * 1024;

fn ensure_sufficient_stack<R>(f: impl FnOnce() -> R) -> R {
    stacker::maybe_grow(STACK_RED_ZONE, STACK_GROWTH, f)
}

/// An error value prefixed with the source line, `Line N: ...`.
pub(crate) fn error_at(span: SourceSpan, message: impl fmt::Display) -> Value {
    if span.line == 0 {
        Value::error(message.to_string())
    } else {
        Value::error(format!("Line {}: {message}", span.line))
    }
}

/// The value of a finished program or function body: `return` is unwrapped,
/// and a `break` or `continue` that escaped this far had no enclosing loop.
fn unwrap_body(result: Value) -> Value {
    match result.kind() {
        ValueKind::Return(value) => value.clone(),
        ValueKind::Break => Value::error("`break` outside loop"),
        ValueKind::Continue => Value::error("`continue` outside loop"),
        _ => result,
    }
}

#[derive(Clone)]
pub struct ExecutionContext {
    pub module_name: Option<String>,
    /// Directories searched, in order, by `import` for `<name>.vint` files.
    pub search_paths: Vec<PathBuf>,
    pub output: SharedOutput,
}

impl ExecutionContext {
    pub fn with_output(mut self, output: SharedOutput) -> Self {
        self.output = output;
        self
    }

    pub fn with_search_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.search_paths.push(path.into());
        self
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self {
            module_name: None,
            search_paths: Vec::new(),
            output: Output::stdout(),
        }
    }
}

pub struct Interpreter {
    env: EnvironmentRef,
    evaluator: Evaluator,
    context: ExecutionContext,
}

impl Interpreter {
    pub fn new() -> Self {
        Self::with_context(ExecutionContext::default())
    }

    pub fn with_context(context: ExecutionContext) -> Self {
        let evaluator = Evaluator::new(&context);
        Self {
            env: Environment::new(),
            evaluator,
            context,
        }
    }

    pub fn eval_source(&mut self, source: &str) -> Result<Value> {
        let program = parser::parse_program(source)?;
        self.eval_program(&program)
    }

    pub fn eval_program(&mut self, program: &Program) -> Result<Value> {
        let value = self.evaluator.eval(program, &self.env);
        match value.kind() {
            ValueKind::Error(message) => Err(VintError::runtime(message.clone())),
            _ => Ok(value),
        }
    }

    /// Runs a script file; its directory is searched first by `import`.
    pub fn run_file(&mut self, path: impl AsRef<Path>) -> Result<Value> {
        let path = path.as_ref();
        let source = fs::read_to_string(path)?;
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        self.evaluator.shared.resolver.prepend_search_path(dir);
        if self.context.module_name.is_none() {
            self.context.module_name = path
                .file_stem()
                .map(|stem| stem.to_string_lossy().into_owned());
        }
        debug!(script = %path.display(), "running script");
        self.eval_source(&source)
    }

    pub fn output(&self) -> &SharedOutput {
        &self.context.output
    }

    pub fn env(&self) -> &EnvironmentRef {
        &self.env
    }

    pub fn context(&self) -> &ExecutionContext {
        &self.context
    }
}

impl Default for Interpreter {
    fn default() -> Self {
        Self::new()
    }
}

/// State every evaluator of one interpreter shares, including those running
/// async and `go` tasks on other threads.
struct Shared {
    builtins: IndexMap<&'static str, Value>,
    modules: IndexMap<&'static str, Value>,
    resolver: ModuleResolver,
    output: SharedOutput,
}

/// A call captured by `defer`, with its callee and arguments already
/// evaluated.
enum DeferredCall {
    Call {
        function: Value,
        args: Vec<Value>,
        keywords: Vec<(String, Value)>,
    },
    Method {
        target: Value,
        name: String,
        args: Vec<Value>,
        keywords: Vec<(String, Value)>,
        env: EnvironmentRef,
    },
}

/// Evaluates AST nodes against an environment. One evaluator serves one
/// thread; [`Evaluator::fork`] hands a fresh one to each spawned task.
pub struct Evaluator {
    shared: Arc<Shared>,
    depth: Cell<usize>,
    deferred: RefCell<Vec<Vec<DeferredCall>>>,
}

impl Evaluator {
    pub fn new(context: &ExecutionContext) -> Self {
        let shared = Shared {
            builtins: stdlib::builtins(),
            modules: stdlib::modules(),
            resolver: ModuleResolver::new(context.search_paths.clone()),
            output: Arc::clone(&context.output),
        };
        Self {
            shared: Arc::new(shared),
            depth: Cell::new(0),
            deferred: RefCell::new(Vec::new()),
        }
    }

    /// An evaluator for another thread, sharing builtins, modules and output.
    pub fn fork(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
            depth: Cell::new(0),
            deferred: RefCell::new(Vec::new()),
        }
    }

    /// Evaluates a whole program. A top-level `return` ends it early with the
    /// returned value; deferred calls run before this returns.
    pub fn eval(&self, program: &Program, env: &EnvironmentRef) -> Value {
        self.deferred.borrow_mut().push(Vec::new());
        let result = self.eval_block(&program.statements, env);
        self.flush_deferred();
        unwrap_body(result)
    }

    /// Runs `block` directly in `env`; callers decide whether it gets a
    /// fresh scope. Yields the last statement's value or the first signal.
    pub(crate) fn eval_block(&self, block: &[Stmt], env: &EnvironmentRef) -> Value {
        let mut result = Value::null();
        for stmt in block {
            result = self.eval_stmt(stmt, env);
            if result.is_signal() {
                return result;
            }
        }
        result
    }

    pub(crate) fn eval_scoped_block(&self, block: &[Stmt], env: &EnvironmentRef) -> Value {
        self.eval_block(block, &Environment::with_parent(Arc::clone(env)))
    }

    fn eval_stmt(&self, stmt: &Stmt, env: &EnvironmentRef) -> Value {
        match &stmt.kind {
            StmtKind::Let { name, value } => {
                let value = propagate!(self.eval_expr(value, env));
                let defined = env.write().define(name.clone(), value);
                declared(defined, stmt.span)
            }
            StmtKind::Const { name, value } => {
                let value = propagate!(self.eval_expr(value, env));
                let defined = env.write().define_const(name.clone(), value);
                declared(defined, stmt.span)
            }
            StmtKind::Expr(expr) => self.eval_expr(expr, env),
            StmtKind::Block(block) => self.eval_scoped_block(block, env),
            StmtKind::While { condition, body } => self.eval_while(condition, body, env),
            StmtKind::For {
                first,
                second,
                iterable,
                body,
            } => self.eval_for(first, second.as_deref(), iterable, body, env, stmt.span),
            StmtKind::Repeat { count, body } => self.eval_repeat(count, body, env, stmt.span),
            StmtKind::Return(expr) => {
                let value = match expr {
                    Some(expr) => propagate!(self.eval_expr(expr, env)),
                    None => Value::null(),
                };
                Value::new(ValueKind::Return(value))
            }
            StmtKind::Break => Value::new(ValueKind::Break),
            StmtKind::Continue => Value::new(ValueKind::Continue),
            StmtKind::Package { name, body } => self.declare_package(name, body, env, stmt.span),
            StmtKind::Import(names) => self.import_modules(names, env, stmt.span),
            StmtKind::Include(path) => self.include_file(path, env, stmt.span),
            StmtKind::Enum { name, members } => self.declare_enum(name, members, env, stmt.span),
            StmtKind::ErrorType { name, params } => {
                let value = Value::new(ValueKind::ErrorType(ErrorType {
                    name: name.clone(),
                    params: params.clone(),
                }));
                let defined = env.write().define(name.clone(), value);
                declared(defined, stmt.span)
            }
            StmtKind::Raise(expr) => {
                let value = propagate!(self.eval_expr(expr, env));
                Value::error(value.inspect())
            }
            StmtKind::Throw(expr) => {
                let value = propagate!(self.eval_expr(expr, env));
                Value::error(format!("thrown: {}", value.inspect()))
            }
            StmtKind::Defer(expr) => self.defer_call(expr, env),
            StmtKind::Go(expr) => self.spawn_go(expr, env, stmt.span),
            StmtKind::Declarative { kind, value } => {
                let value = propagate!(self.eval_expr(value, env));
                self.declare(*kind, &value, stmt.span);
                Value::null()
            }
        }
    }

    pub(crate) fn eval_expr(&self, expr: &Expr, env: &EnvironmentRef) -> Value {
        ensure_sufficient_stack(|| self.eval_expr_inner(expr, env))
    }

    fn eval_expr_inner(&self, expr: &Expr, env: &EnvironmentRef) -> Value {
        match &expr.kind {
            ExprKind::Literal(literal) => literal_value(literal),
            ExprKind::Variable(name) => self.lookup(name, env, expr.span),
            ExprKind::At => Environment::get(env, "@")
                .unwrap_or_else(|| error_at(expr.span, "'@' is only available inside package methods")),
            ExprKind::Binary { op, left, right } => {
                let left = propagate!(self.eval_expr(left, env));
                let right = propagate!(self.eval_expr(right, env));
                operators::infix(*op, &left, &right, expr.span)
            }
            ExprKind::Unary { op, expr: operand } => {
                let value = propagate!(self.eval_expr(operand, env));
                operators::prefix(*op, value, expr.span)
            }
            ExprKind::Postfix { op, target } => self.eval_postfix(*op, target, env, expr.span),
            ExprKind::Assign { op, target, value } => {
                self.eval_assign(*op, target, value, env, expr.span)
            }
            ExprKind::Call { callee, args } => self.eval_call(callee, args, env, expr.span),
            ExprKind::Method { target, name, args } => {
                let receiver = propagate!(self.eval_expr(target, env));
                let (args, keywords) = match self.eval_arguments(args, env) {
                    Ok(evaluated) => evaluated,
                    Err(signal) => return signal,
                };
                self.invoke_method(&receiver, name, args, keywords, env, expr.span)
            }
            ExprKind::Property { target, name } => {
                let receiver = propagate!(self.eval_expr(target, env));
                self.read_property(&receiver, name, env, expr.span)
            }
            ExprKind::Index { target, index } => {
                let target = propagate!(self.eval_expr(target, env));
                let index = propagate!(self.eval_expr(index, env));
                operators::index(&target, &index, expr.span)
            }
            ExprKind::Slice { target, start, end } => {
                let target = propagate!(self.eval_expr(target, env));
                let start = match start {
                    Some(start) => Some(propagate!(self.eval_expr(start, env))),
                    None => None,
                };
                let end = match end {
                    Some(end) => Some(propagate!(self.eval_expr(end, env))),
                    None => None,
                };
                operators::slice(&target, start.as_ref(), end.as_ref(), expr.span)
            }
            ExprKind::ArrayLiteral(elements) => {
                let mut values = Vec::with_capacity(elements.len());
                for element in elements {
                    values.push(propagate!(self.eval_expr(element, env)));
                }
                Value::array(values)
            }
            ExprKind::DictLiteral(entries) => {
                let mut dict = Dict::new();
                for (key_expr, value_expr) in entries {
                    let key = propagate!(self.eval_expr(key_expr, env));
                    let value = propagate!(self.eval_expr(value_expr, env));
                    if let Err(message) = dict.insert(key, value) {
                        return error_at(key_expr.span, message);
                    }
                }
                Value::dict(dict)
            }
            ExprKind::Group(inner) => self.eval_expr(inner, env),
            ExprKind::Function(literal) => Value::function(Arc::clone(literal), Arc::clone(env)),
            ExprKind::If {
                condition,
                then_branch,
                else_branch,
            } => self.eval_if(condition, then_branch, else_branch.as_deref(), env),
            ExprKind::Switch {
                subject,
                cases,
                default,
            } => self.eval_switch(subject, cases, default.as_deref(), env),
            ExprKind::Match { subject, arms } => self.eval_match(subject, arms, env),
            ExprKind::Await(inner) => {
                let value = propagate!(self.eval_expr(inner, env));
                match value.kind() {
                    ValueKind::Promise(promise) => match promise.wait() {
                        Ok(resolved) => resolved,
                        Err(rejected) if rejected.is_error() => rejected,
                        Err(rejected) => Value::error(rejected.inspect()),
                    },
                    _ => error_at(
                        expr.span,
                        format!("await can only be used with promises, got {}", value.type_name()),
                    ),
                }
            }
            ExprKind::Channel(capacity) => {
                let capacity = match capacity {
                    Some(capacity) => {
                        let value = propagate!(self.eval_expr(capacity, env));
                        match value.as_int() {
                            Some(n) if n >= 0 => n as usize,
                            _ => {
                                return error_at(
                                    expr.span,
                                    format!(
                                        "channel capacity must be a non-negative integer, got {}",
                                        value.inspect()
                                    ),
                                )
                            }
                        }
                    }
                    None => 0,
                };
                Channel::value(capacity)
            }
        }
    }

    fn lookup(&self, name: &str, env: &EnvironmentRef, span: SourceSpan) -> Value {
        if let Some(value) = Environment::get(env, name) {
            return value;
        }
        if let Some(builtin) = self.shared.builtins.get(name) {
            return builtin.clone();
        }
        error_at(span, format!("Identifier not found: {name}"))
    }

    fn declare_enum(
        &self,
        name: &str,
        members: &[(String, Option<Expr>)],
        env: &EnvironmentRef,
        span: SourceSpan,
    ) -> Value {
        let mut values = IndexMap::new();
        let mut next = 0i64;
        for (member, expr) in members {
            let value = match expr {
                Some(expr) => propagate!(self.eval_expr(expr, env)),
                None => Value::int(next),
            };
            if let Some(n) = value.as_int() {
                next = n.wrapping_add(1);
            }
            values.insert(member.clone(), value);
        }
        let value = Value::new(ValueKind::Enum(EnumValue {
            name: name.to_string(),
            members: values,
        }));
        let defined = env.write().define_const(name.to_string(), value);
        declared(defined, span)
    }

    fn declare(&self, kind: Declarative, value: &Value, span: SourceSpan) {
        let text = value.inspect();
        self.shared
            .output
            .println(&format!("[{}]: {text}", kind.tag()));
        match kind {
            Declarative::Warn => warn!(line = span.line, "{text}"),
            Declarative::Debug => debug!(line = span.line, "{text}"),
            _ => info!(line = span.line, tag = kind.tag(), "{text}"),
        }
    }

    fn defer_call(&self, expr: &Expr, env: &EnvironmentRef) -> Value {
        let call = match &expr.kind {
            ExprKind::Call { callee, args } => {
                let function = propagate!(self.eval_expr(callee, env));
                let (args, keywords) = match self.eval_arguments(args, env) {
                    Ok(evaluated) => evaluated,
                    Err(signal) => return signal,
                };
                DeferredCall::Call {
                    function,
                    args,
                    keywords,
                }
            }
            ExprKind::Method { target, name, args } => {
                let target = propagate!(self.eval_expr(target, env));
                let (args, keywords) = match self.eval_arguments(args, env) {
                    Ok(evaluated) => evaluated,
                    Err(signal) => return signal,
                };
                DeferredCall::Method {
                    target,
                    name: name.clone(),
                    args,
                    keywords,
                    env: Arc::clone(env),
                }
            }
            _ => return error_at(expr.span, "defer expects a function call"),
        };
        if let Some(frame) = self.deferred.borrow_mut().last_mut() {
            frame.push(call);
        }
        Value::null()
    }

    /// Runs the innermost frame of deferred calls, last registered first.
    fn flush_deferred(&self) {
        let frame = self.deferred.borrow_mut().pop();
        let Some(frame) = frame else {
            return;
        };
        if !frame.is_empty() {
            debug!(count = frame.len(), "running deferred calls");
        }
        for call in frame.into_iter().rev() {
            let result = match call {
                DeferredCall::Call {
                    function,
                    args,
                    keywords,
                } => self.apply_call(&function, args, keywords, SourceSpan::default()),
                DeferredCall::Method {
                    target,
                    name,
                    args,
                    keywords,
                    env,
                } => self.invoke_method(&target, &name, args, keywords, &env, SourceSpan::default()),
            };
            if let Some(message) = result.error_message() {
                warn!(error = message, "deferred call failed");
            }
        }
    }

    fn spawn_go(&self, expr: &Expr, env: &EnvironmentRef, span: SourceSpan) -> Value {
        let task = expr.clone();
        let scope = Arc::clone(env);
        debug!(line = span.line, "spawning go task");
        match spawn_detached(self.fork(), move |host: &Evaluator| host.eval_expr(&task, &scope)) {
            Ok(()) => Value::null(),
            Err(err) => error_at(span, format!("failed to spawn go task: {err}")),
        }
    }
}

impl Host for Evaluator {
    fn call(&self, function: &Value, args: Vec<Value>) -> Value {
        self.apply_call(function, args, Vec::new(), SourceSpan::default())
    }

    fn output(&self) -> &Output {
        &self.shared.output
    }
}

fn declared(outcome: std::result::Result<(), ScopeError>, span: SourceSpan) -> Value {
    match outcome {
        Ok(()) => Value::null(),
        Err(err) => error_at(span, err),
    }
}

fn literal_value(literal: &Literal) -> Value {
    match literal {
        Literal::Int(n) => Value::int(*n),
        Literal::Float(n) => Value::float(*n),
        Literal::Bool(b) => Value::bool(*b),
        Literal::String(s) => Value::string(s.clone()),
        Literal::Null => Value::null(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(source: &str) -> (Value, SharedOutput) {
        let output = Output::buffer();
        let context = ExecutionContext::default().with_output(Arc::clone(&output));
        let evaluator = Evaluator::new(&context);
        let program = parser::parse_program(source).expect("parse");
        let value = evaluator.eval(&program, &Environment::new());
        (value, output)
    }

    #[test]
    fn block_stops_at_first_signal() {
        let (value, output) = run("println(1); return 2; println(3)");
        assert_eq!(value.inspect(), "2");
        assert_eq!(output.captured(), "1\n");
    }

    #[test]
    fn deferred_calls_run_last_in_first_out() {
        let (_, output) = run("defer println(\"a\"); defer println(\"b\"); println(\"body\")");
        assert_eq!(output.captured(), "body\nb\na\n");
    }

    #[test]
    fn unknown_identifier_reports_line() {
        let (value, _) = run("let a = 1\n\nmissing + a");
        assert_eq!(value.error_message(), Some("Line 3: Identifier not found: missing"));
    }

    #[test]
    fn break_outside_loop_is_an_error() {
        let (value, _) = run("break");
        assert!(value.is_error());
    }

    #[test]
    fn declaratives_write_tagged_lines() {
        let (_, output) = run("todo \"wire up cache\"");
        assert_eq!(output.captured(), "[TODO]: wire up cache\n");
    }
}
