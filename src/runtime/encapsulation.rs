//! Packages, instances and the `@` receiver.
//!
//! A package body runs once in its own scope. Calling the package builds an
//! instance whose scope sits on top of the package scope, so instance fields
//! shadow package members. Methods see `@` through a per-call receiver scope
//! that is dropped when the call returns.

use std::{collections::HashSet, sync::Arc};

use tracing::debug;

use crate::{
    ast::{Stmt, StmtKind},
    diagnostics::SourceSpan,
    environment::{Environment, EnvironmentRef},
    value::{Function, Instance, Package, Value, ValueKind},
};

use super::{error_at, Evaluator};

const RECEIVER: &str = "@";

impl Evaluator {
    /// Runs the package body, binds the package and calls a zero-argument
    /// `init` if the body defines one.
    pub(super) fn declare_package(
        &self,
        name: &str,
        body: &[Stmt],
        env: &EnvironmentRef,
        span: SourceSpan,
    ) -> Value {
        let scope = Environment::with_parent(Arc::clone(env));
        let mut private_names = HashSet::new();
        for stmt in body {
            if let StmtKind::Let { name, .. } | StmtKind::Const { name, .. } = &stmt.kind {
                if name.starts_with('_') {
                    private_names.insert(name.clone());
                }
            }
            propagate!(self.eval_stmt(stmt, &scope));
        }

        let package = Value::new(ValueKind::Package(Package {
            name: name.to_string(),
            env: Arc::clone(env),
            scope: Arc::clone(&scope),
            private_names,
        }));
        let defined = env.write().define(name.to_string(), package.clone());
        if let Err(err) = defined {
            return error_at(span, err);
        }
        debug!(package = name, "declared package");

        let init = scope.read().local("init");
        if let Some(init) = init {
            let runs_bare = match init.kind() {
                ValueKind::Function(function) => function.accepts(0),
                _ => false,
            };
            if runs_bare {
                propagate!(self.call_with_receiver(&init, &package, Vec::new(), Vec::new(), span));
            }
        }
        Value::null()
    }

    /// `Package(args)`: a new instance initialised by the package's `init`.
    pub(super) fn construct(
        &self,
        package_value: &Value,
        args: Vec<Value>,
        keywords: Vec<(String, Value)>,
        span: SourceSpan,
    ) -> Value {
        let ValueKind::Package(package) = package_value.kind() else {
            return error_at(span, format!("not a package: {}", package_value.type_name()));
        };
        let init = package.scope.read().local("init");
        let Some(init) = init else {
            return error_at(span, "Package does not have 'init'");
        };
        let instance = Value::new(ValueKind::Instance(Instance {
            package: package_value.clone(),
            env: Environment::with_parent(Arc::clone(&package.scope)),
        }));
        debug!(package = %package.name, "constructing instance");
        propagate!(self.call_with_receiver(&init, &instance, args, keywords, span));
        instance
    }

    /// Calls `method` with `@` bound to `receiver` for the duration of the
    /// call.
    pub(super) fn call_with_receiver(
        &self,
        method: &Value,
        receiver: &Value,
        args: Vec<Value>,
        keywords: Vec<(String, Value)>,
        span: SourceSpan,
    ) -> Value {
        let (function, is_async) = match method.kind() {
            ValueKind::Function(function) => (function, false),
            ValueKind::AsyncFunction(function) => (function, true),
            _ => return self.apply_call(method, args, keywords, span),
        };
        let receiver_env = Environment::with_parent(Arc::clone(&function.env));
        let defined = receiver_env.write().define(RECEIVER, receiver.clone());
        if let Err(err) = defined {
            return error_at(span, err);
        }
        let bound = Function {
            literal: Arc::clone(&function.literal),
            env: Arc::clone(&receiver_env),
        };
        let bound = Value::new(if is_async {
            ValueKind::AsyncFunction(bound)
        } else {
            ValueKind::Function(bound)
        });
        let result = self.apply_call(&bound, args, keywords, span);
        // An async body may still be running and reading `@`.
        if !is_async {
            receiver_env.write().del(RECEIVER);
        }
        result
    }

    /// `target.member(args)` on a package or instance.
    pub(super) fn call_member(
        &self,
        target: &Value,
        name: &str,
        args: Vec<Value>,
        keywords: Vec<(String, Value)>,
        env: &EnvironmentRef,
        span: SourceSpan,
    ) -> Value {
        let Some(package) = owning_package(target) else {
            return error_at(span, format!("Sorry, {target} does not have a function '{name}()'"));
        };
        if package.is_private(name) && !Environment::encloses(env, &package.scope) {
            return error_at(
                span,
                format!(
                    "Cannot access private member '{name}' from outside package '{}'",
                    package.name
                ),
            );
        }
        match member(target, package, name) {
            Some(method) if method.is_callable() => {
                self.call_with_receiver(&method, target, args, keywords, span)
            }
            _ => error_at(span, format!("Sorry, {target} does not have a function '{name}()'")),
        }
    }

    pub(super) fn read_property(
        &self,
        target: &Value,
        name: &str,
        env: &EnvironmentRef,
        span: SourceSpan,
    ) -> Value {
        if let Some(package) = owning_package(target) {
            if package.is_private(name) && !Environment::encloses(env, &package.scope) {
                return error_at(
                    span,
                    format!(
                        "Cannot access private member '{name}' from outside package '{}'",
                        package.name
                    ),
                );
            }
            return member(target, package, name)
                .unwrap_or_else(|| error_at(span, format!("Value {name} is not valid for {target}")));
        }
        let found = match target.kind() {
            ValueKind::Enum(enumeration) => enumeration.members.get(name).cloned(),
            ValueKind::Module(module) => module.members.get(name).cloned(),
            ValueKind::CustomError(error) => error
                .params
                .iter()
                .position(|param| param == name)
                .and_then(|idx| error.args.get(idx).cloned()),
            ValueKind::Dict(dict) => dict.read().get(&Value::string(name)),
            _ => None,
        };
        found.unwrap_or_else(|| error_at(span, format!("Value {name} is not valid for {target}")))
    }

    pub(super) fn assign_property(
        &self,
        target: &Value,
        name: &str,
        value: Value,
        env: &EnvironmentRef,
        span: SourceSpan,
    ) -> Value {
        let (package, scope) = match target.kind() {
            ValueKind::Instance(instance) => match owning_package(target) {
                Some(package) => (package, &instance.env),
                None => return error_at(span, format!("Failed to set in package {}", target.type_name())),
            },
            ValueKind::Package(package) => (package, &package.scope),
            ValueKind::Dict(dict) => {
                return match dict.write().insert(Value::string(name), value) {
                    Ok(()) => Value::null(),
                    Err(message) => error_at(span, message),
                }
            }
            _ => return error_at(span, format!("Failed to set in package {}", target.type_name())),
        };
        if package.is_private(name) && !Environment::encloses(env, &package.scope) {
            return error_at(
                span,
                format!(
                    "Cannot assign to private member '{name}' from outside package '{}'",
                    package.name
                ),
            );
        }
        let assigned = scope.write().set_scoped(name.to_string(), value);
        match assigned {
            Ok(()) => Value::null(),
            Err(err) => error_at(span, err),
        }
    }
}

/// The package behind a package or instance value.
fn owning_package(target: &Value) -> Option<&Package> {
    match target.kind() {
        ValueKind::Package(package) => Some(package),
        ValueKind::Instance(instance) => match instance.package.kind() {
            ValueKind::Package(package) => Some(package),
            _ => None,
        },
        _ => None,
    }
}

/// Instance fields first, then members of the package scope.
fn member(target: &Value, package: &Package, name: &str) -> Option<Value> {
    if let ValueKind::Instance(instance) = target.kind() {
        let own = instance.env.read().local(name);
        if own.is_some() {
            return own;
        }
    }
    package.scope.read().local(name)
}
