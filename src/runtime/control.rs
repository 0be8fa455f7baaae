use std::sync::Arc;

use crate::{
    ast::{Block, CaseKind, Expr, ExprKind, MatchArm, Pattern, Stmt, SwitchCase},
    diagnostics::SourceSpan,
    environment::{Environment, EnvironmentRef},
    value::{Value, ValueKind},
};

use super::{error_at, Evaluator};

/// What a loop does after one pass over its body.
enum LoopStep {
    Next,
    Exit,
    Escape(Value),
}

fn loop_step(result: Value) -> LoopStep {
    match result.kind() {
        ValueKind::Break => LoopStep::Exit,
        ValueKind::Continue => LoopStep::Next,
        ValueKind::Return(_) | ValueKind::Error(_) => LoopStep::Escape(result),
        _ => LoopStep::Next,
    }
}

impl Evaluator {
    pub(super) fn eval_if(
        &self,
        condition: &Expr,
        then_branch: &Block,
        else_branch: Option<&[Stmt]>,
        env: &EnvironmentRef,
    ) -> Value {
        let condition = propagate!(self.eval_expr(condition, env));
        if condition.is_truthy() {
            self.eval_scoped_block(then_branch, env)
        } else if let Some(branch) = else_branch {
            self.eval_scoped_block(branch, env)
        } else {
            Value::null()
        }
    }

    pub(super) fn eval_while(&self, condition: &Expr, body: &Block, env: &EnvironmentRef) -> Value {
        loop {
            let test = propagate!(self.eval_expr(condition, env));
            if !test.is_truthy() {
                return Value::null();
            }
            match loop_step(self.eval_scoped_block(body, env)) {
                LoopStep::Next => {}
                LoopStep::Exit => return Value::null(),
                LoopStep::Escape(signal) => return signal,
            }
        }
    }

    /// `for v in xs` binds the element (the key for dicts); `for k, v in xs`
    /// binds both. Each pass gets a fresh scope.
    pub(super) fn eval_for(
        &self,
        first: &str,
        second: Option<&str>,
        iterable: &Expr,
        body: &Block,
        env: &EnvironmentRef,
        span: SourceSpan,
    ) -> Value {
        let subject = propagate!(self.eval_expr(iterable, env));
        let Some(items) = subject.iter() else {
            return error_at(
                span,
                format!(
                    "for..in loop requires an iterable object, but got {}",
                    subject.type_name()
                ),
            );
        };
        let keyed = matches!(subject.kind(), ValueKind::Dict(_));
        for (key, value) in items {
            let scope = Environment::with_parent(Arc::clone(env));
            let bound = {
                let mut guard = scope.write();
                match second {
                    Some(second) => guard
                        .define(first, key)
                        .and_then(|_| guard.define(second, value)),
                    None if keyed => guard.define(first, key),
                    None => guard.define(first, value),
                }
            };
            if let Err(err) = bound {
                return error_at(span, err);
            }
            match loop_step(self.eval_block(body, &scope)) {
                LoopStep::Next => {}
                LoopStep::Exit => break,
                LoopStep::Escape(signal) => return signal,
            }
        }
        Value::null()
    }

    /// `repeat n { }` with `i` counting passes from zero.
    pub(super) fn eval_repeat(
        &self,
        count: &Expr,
        body: &Block,
        env: &EnvironmentRef,
        span: SourceSpan,
    ) -> Value {
        let count = propagate!(self.eval_expr(count, env));
        let Some(times) = count.as_int() else {
            return error_at(
                span,
                format!("repeat expects an integer count, got {}", count.type_name()),
            );
        };
        for pass in 0..times.max(0) {
            let scope = Environment::with_parent(Arc::clone(env));
            let bound = scope.write().define("i", Value::int(pass));
            if let Err(err) = bound {
                return error_at(span, err);
            }
            match loop_step(self.eval_block(body, &scope)) {
                LoopStep::Next => {}
                LoopStep::Exit => break,
                LoopStep::Escape(signal) => return signal,
            }
        }
        Value::null()
    }

    pub(super) fn eval_switch(
        &self,
        subject: &Expr,
        cases: &[SwitchCase],
        default: Option<&[Stmt]>,
        env: &EnvironmentRef,
    ) -> Value {
        let subject = propagate!(self.eval_expr(subject, env));
        for case in cases {
            match &case.kind {
                CaseKind::Values(candidates) => {
                    for candidate in candidates {
                        let candidate = propagate!(self.eval_expr(candidate, env));
                        if candidate.same_rendering(&subject) {
                            return self.eval_scoped_block(&case.body, env);
                        }
                    }
                }
                CaseKind::Binding { name, guard } => {
                    let scope = Environment::with_parent(Arc::clone(env));
                    let bound = scope.write().define(name.clone(), subject.clone());
                    if let Err(err) = bound {
                        return error_at(case.span, err);
                    }
                    let accepted = match guard {
                        Some(guard) => propagate!(self.eval_expr(guard, &scope)).is_truthy(),
                        None => true,
                    };
                    if accepted {
                        return self.eval_block(&case.body, &scope);
                    }
                }
            }
        }
        match default {
            Some(block) => self.eval_scoped_block(block, env),
            None => Value::null(),
        }
    }

    /// Tries arms in order, holding wildcard arms back until every other arm
    /// has been rejected.
    pub(super) fn eval_match(
        &self,
        subject: &Expr,
        arms: &[MatchArm],
        env: &EnvironmentRef,
    ) -> Value {
        let subject = propagate!(self.eval_expr(subject, env));
        let (fallbacks, specific): (Vec<&MatchArm>, Vec<&MatchArm>) = arms
            .iter()
            .partition(|arm| matches!(arm.pattern, Pattern::Wildcard));
        for arm in specific.into_iter().chain(fallbacks) {
            let scope = Environment::with_parent(Arc::clone(env));
            match self.bind_pattern(&arm.pattern, &subject, &scope) {
                Ok(true) => {}
                Ok(false) => continue,
                Err(signal) => return signal,
            }
            if let Some(guard) = &arm.guard {
                if !propagate!(self.eval_expr(guard, &scope)).is_truthy() {
                    continue;
                }
            }
            return self.eval_block(&arm.body, &scope);
        }
        Value::null()
    }

    /// Matches `value` against `pattern`, binding names into `scope` as it
    /// goes. `Err` carries a signal raised while evaluating a sub-pattern.
    fn bind_pattern(
        &self,
        pattern: &Pattern,
        value: &Value,
        scope: &EnvironmentRef,
    ) -> Result<bool, Value> {
        match pattern {
            Pattern::Wildcard => Ok(true),
            Pattern::Binding(name) => {
                let bound = scope.write().set_scoped(name.clone(), value.clone());
                bound.map(|_| true).map_err(|err| Value::error(err.to_string()))
            }
            Pattern::Value(expr) => {
                let expected = self.eval_expr(expr, scope);
                if expected.is_signal() {
                    return Err(expected);
                }
                Ok(expected.same_rendering(value))
            }
            Pattern::Array { elements, rest } => {
                let Some(items) = value.array_items() else {
                    return Ok(false);
                };
                let fits = match rest {
                    Some(_) => items.len() >= elements.len(),
                    None => items.len() == elements.len(),
                };
                if !fits {
                    return Ok(false);
                }
                for (element, item) in elements.iter().zip(&items) {
                    if !self.bind_pattern(element, item, scope)? {
                        return Ok(false);
                    }
                }
                if let Some(rest) = rest {
                    let remainder = Value::array(items[elements.len()..].to_vec());
                    let bound = scope.write().set_scoped(rest.clone(), remainder);
                    bound.map_err(|err| Value::error(err.to_string()))?;
                }
                Ok(true)
            }
            Pattern::Dict(entries) => {
                let ValueKind::Dict(dict) = value.kind() else {
                    return Ok(false);
                };
                for (key_expr, sub_pattern) in entries {
                    let key = self.pattern_key(key_expr, scope)?;
                    let entry = dict.read().get(&key);
                    let Some(entry) = entry else {
                        return Ok(false);
                    };
                    if !self.bind_pattern(sub_pattern, &entry, scope)? {
                        return Ok(false);
                    }
                }
                Ok(true)
            }
        }
    }

    /// Dict pattern keys are expressions; a bare name that is not bound
    /// anywhere stands for the string key of the same name.
    fn pattern_key(&self, key: &Expr, scope: &EnvironmentRef) -> Result<Value, Value> {
        if let ExprKind::Variable(name) = &key.kind {
            if Environment::get(scope, name).is_none() {
                return Ok(Value::string(name.clone()));
            }
        }
        let value = self.eval_expr(key, scope);
        if value.is_signal() {
            Err(value)
        } else {
            Ok(value)
        }
    }
}
