use std::sync::Arc;

use tracing::debug;

use crate::{
    ast::{Argument, Expr, ExprKind},
    concurrency::{spawn_async, Promise},
    diagnostics::SourceSpan,
    environment::{Environment, EnvironmentRef},
    value::{methods, CustomError, Function, Value, ValueKind},
};

use super::{error_at, unwrap_body, Evaluator, MAX_CALL_DEPTH};

type Keywords = Vec<(String, Value)>;

impl Evaluator {
    pub(super) fn eval_call(
        &self,
        callee: &Expr,
        args: &[Argument],
        env: &EnvironmentRef,
        span: SourceSpan,
    ) -> Value {
        let function = propagate!(self.eval_expr(callee, env));
        let (args, keywords) = match self.eval_arguments(args, env) {
            Ok(evaluated) => evaluated,
            Err(signal) => return signal,
        };
        let function = match &callee.kind {
            ExprKind::Variable(name) => {
                propagate!(select_overload(name, function, args.len() + keywords.len(), env, span))
            }
            _ => function,
        };
        self.apply_call(&function, args, keywords, span)
    }

    /// Evaluates call arguments left to right, splitting off `name = value`
    /// keyword arguments. A signal from any argument aborts the call.
    pub(super) fn eval_arguments(
        &self,
        args: &[Argument],
        env: &EnvironmentRef,
    ) -> Result<(Vec<Value>, Keywords), Value> {
        let mut positional = Vec::with_capacity(args.len());
        let mut keywords = Vec::new();
        for arg in args {
            let value = self.eval_expr(&arg.value, env);
            if value.is_signal() {
                return Err(value);
            }
            match &arg.name {
                Some(name) => keywords.push((name.clone(), value)),
                None => positional.push(value),
            }
        }
        Ok((positional, keywords))
    }

    pub(crate) fn apply_call(
        &self,
        function: &Value,
        args: Vec<Value>,
        keywords: Keywords,
        span: SourceSpan,
    ) -> Value {
        match function.kind() {
            ValueKind::Function(function) => self.call_function(function, args, keywords, span),
            ValueKind::AsyncFunction(function) => self.call_async(function, args, keywords, span),
            ValueKind::Builtin(builtin) => {
                if let Some((name, _)) = keywords.first() {
                    return error_at(
                        span,
                        format!(
                            "builtin function `{}` does not accept keyword argument '{name}'",
                            builtin.name
                        ),
                    );
                }
                builtin.call(self, &args)
            }
            ValueKind::ErrorType(error_type) => {
                let given = args.len() + keywords.len();
                if !keywords.is_empty() || given != error_type.params.len() {
                    return Value::error(format!(
                        "error {} expects {} arguments, got {given}",
                        error_type.name,
                        error_type.params.len()
                    ));
                }
                Value::new(ValueKind::CustomError(CustomError {
                    name: error_type.name.clone(),
                    params: error_type.params.clone(),
                    args,
                }))
            }
            ValueKind::Package(_) => self.construct(function, args, keywords, span),
            _ => error_at(span, format!("not a function: {}", function.type_name())),
        }
    }

    fn call_function(
        &self,
        function: &Function,
        args: Vec<Value>,
        keywords: Keywords,
        span: SourceSpan,
    ) -> Value {
        match self.bind_arguments(function, args, keywords, span) {
            Ok(scope) => self.run_function_body(function, &scope),
            Err(signal) => signal,
        }
    }

    /// Binds arguments on the caller's thread, then runs the body on a task
    /// thread. The caller gets the pending promise straight away.
    fn call_async(
        &self,
        function: &Function,
        args: Vec<Value>,
        keywords: Keywords,
        span: SourceSpan,
    ) -> Value {
        let scope = match self.bind_arguments(function, args, keywords, span) {
            Ok(scope) => scope,
            Err(signal) => return signal,
        };
        let promise = Promise::pending();
        let label = function.name().unwrap_or("anonymous").to_string();
        let task = function.clone();
        debug!(task = %label, "spawning async task");
        let spawned = spawn_async(&label, self.fork(), promise.clone(), move |host: &Evaluator| {
            host.run_function_body(&task, &scope)
        });
        match spawned {
            Ok(()) => promise,
            Err(err) => error_at(span, format!("failed to spawn async task: {err}")),
        }
    }

    /// Builds the call scope: positional arguments first, then keywords by
    /// parameter name, then defaults evaluated inside the new scope.
    fn bind_arguments(
        &self,
        function: &Function,
        args: Vec<Value>,
        keywords: Keywords,
        span: SourceSpan,
    ) -> Result<EnvironmentRef, Value> {
        let params = &function.literal.params;
        if args.len() > params.len() {
            return Err(error_at(
                span,
                format!(
                    "function '{}' takes {} arguments but {} were given",
                    function.name().unwrap_or("anonymous"),
                    params.len(),
                    args.len()
                ),
            ));
        }

        let mut bound: Vec<Option<Value>> = vec![None; params.len()];
        for (slot, value) in bound.iter_mut().zip(args) {
            *slot = Some(value);
        }
        for (name, value) in keywords {
            let Some(idx) = params.iter().position(|param| param.name == name) else {
                return Err(error_at(span, format!("Unexpected keyword argument '{name}'")));
            };
            if bound[idx].is_some() {
                return Err(error_at(
                    span,
                    format!("Multiple arguments for a single parameter '{name}'"),
                ));
            }
            bound[idx] = Some(value);
        }

        let scope = Environment::with_parent(Arc::clone(&function.env));
        for (param, value) in params.iter().zip(bound) {
            let value = match (value, &param.default) {
                (Some(value), _) => value,
                (None, Some(default)) => {
                    let value = self.eval_expr(default, &scope);
                    if value.is_signal() {
                        return Err(value);
                    }
                    value
                }
                (None, None) => {
                    return Err(error_at(
                        span,
                        format!("Missing argument for parameter '{}'", param.name),
                    ))
                }
            };
            let defined = scope.write().define(param.name.clone(), value);
            if let Err(err) = defined {
                return Err(error_at(param.span, err));
            }
        }
        Ok(scope)
    }

    /// Runs a bound function body with its own defer frame and unwraps the
    /// returned value.
    pub(super) fn run_function_body(&self, function: &Function, scope: &EnvironmentRef) -> Value {
        let depth = self.depth.get();
        if depth >= MAX_CALL_DEPTH {
            return Value::error("maximum recursion depth exceeded");
        }
        self.depth.set(depth + 1);
        self.deferred.borrow_mut().push(Vec::new());
        let result = self.eval_block(&function.literal.body, scope);
        self.flush_deferred();
        self.depth.set(depth);
        unwrap_body(result)
    }

    /// `target.name(args)`: package members get `@` bound, everything else
    /// goes through the per-kind method tables.
    pub(super) fn invoke_method(
        &self,
        target: &Value,
        name: &str,
        args: Vec<Value>,
        keywords: Keywords,
        env: &EnvironmentRef,
        span: SourceSpan,
    ) -> Value {
        match target.kind() {
            ValueKind::Instance(_) | ValueKind::Package(_) => {
                self.call_member(target, name, args, keywords, env, span)
            }
            _ => {
                if let Some((keyword, _)) = keywords.first() {
                    return error_at(
                        span,
                        format!("method '{name}' does not accept keyword argument '{keyword}'"),
                    );
                }
                let result = methods::call_method(self, target, name, &args);
                match result.error_message() {
                    Some(message) if !message.starts_with("Line ") => error_at(span, message),
                    _ => result,
                }
            }
        }
    }
}

/// Picks the first overload registered under `name` that accepts `count`
/// arguments. Names with a single definition pass through unchanged.
fn select_overload(
    name: &str,
    function: Value,
    count: usize,
    env: &EnvironmentRef,
    span: SourceSpan,
) -> Value {
    let overloads = Environment::overloads(env, name);
    if overloads.len() <= 1 {
        return function;
    }
    overloads
        .into_iter()
        .find(|candidate| match candidate.kind() {
            ValueKind::Function(function) => function.accepts(count),
            _ => false,
        })
        .unwrap_or_else(|| {
            error_at(
                span,
                format!("no overload of '{name}' accepts {count} arguments"),
            )
        })
}
