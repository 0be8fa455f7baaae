use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;
use thiserror::Error;

use crate::value::{Value, ValueKind};

pub type EnvironmentRef = Arc<RwLock<Environment>>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ScopeError {
    #[error("Identifier '{0}' has already been declared")]
    AlreadyDeclared(String),
    #[error("Cannot assign to constant '{0}'")]
    Constant(String),
    #[error("assignment to undeclared variable '{0}'")]
    Undeclared(String),
}

#[derive(Default)]
pub struct Environment {
    parent: Option<EnvironmentRef>,
    bindings: IndexMap<String, Binding>,
    /// Every function defined under a name in this scope, in declaration order.
    overloads: IndexMap<String, Vec<Value>>,
}

impl Environment {
    pub fn new() -> EnvironmentRef {
        Arc::new(RwLock::new(Self::default()))
    }

    pub fn with_parent(parent: EnvironmentRef) -> EnvironmentRef {
        Arc::new(RwLock::new(Self {
            parent: Some(parent),
            ..Self::default()
        }))
    }

    pub fn parent(&self) -> Option<EnvironmentRef> {
        self.parent.clone()
    }

    /// Binds `name` in this scope. Redefining a function name registers an
    /// overload instead of failing.
    pub fn define(&mut self, name: impl Into<String>, value: Value) -> Result<(), ScopeError> {
        let name = name.into();
        if let Some(existing) = self.bindings.get(&name) {
            let both_functions = matches!(&*existing.value.0, ValueKind::Function(_))
                && matches!(&*value.0, ValueKind::Function(_));
            if both_functions && !existing.constant {
                self.overloads.entry(name).or_default().push(value);
                return Ok(());
            }
            return Err(ScopeError::AlreadyDeclared(name));
        }
        if matches!(&*value.0, ValueKind::Function(_)) {
            self.overloads.insert(name.clone(), vec![value.clone()]);
        }
        self.bindings.insert(
            name,
            Binding {
                value,
                constant: false,
            },
        );
        Ok(())
    }

    pub fn define_const(&mut self, name: impl Into<String>, value: Value) -> Result<(), ScopeError> {
        let name = name.into();
        if self.bindings.contains_key(&name) {
            return Err(ScopeError::AlreadyDeclared(name));
        }
        self.bindings.insert(
            name,
            Binding {
                value,
                constant: true,
            },
        );
        Ok(())
    }

    /// Writes `name` in this scope only, creating it when absent.
    pub fn set_scoped(&mut self, name: impl Into<String>, value: Value) -> Result<(), ScopeError> {
        let name = name.into();
        match self.bindings.get_mut(&name) {
            Some(binding) if binding.constant => Err(ScopeError::Constant(name)),
            Some(binding) => {
                binding.value = value;
                self.overloads.shift_remove(&name);
                Ok(())
            }
            None => {
                self.bindings.insert(
                    name,
                    Binding {
                        value,
                        constant: false,
                    },
                );
                Ok(())
            }
        }
    }

    /// Removes `name` from this scope only.
    pub fn del(&mut self, name: &str) -> bool {
        self.overloads.shift_remove(name);
        self.bindings.shift_remove(name).is_some()
    }

    pub fn contains_local(&self, name: &str) -> bool {
        self.bindings.contains_key(name)
    }

    pub fn local(&self, name: &str) -> Option<Value> {
        self.bindings.get(name).map(|binding| binding.value.clone())
    }

    /// Names bound directly in this scope, in definition order.
    pub fn names(&self) -> Vec<String> {
        self.bindings.keys().cloned().collect()
    }

    pub fn get(env: &EnvironmentRef, name: &str) -> Option<Value> {
        let mut scope = Arc::clone(env);
        loop {
            let parent = {
                let guard = scope.read();
                if let Some(binding) = guard.bindings.get(name) {
                    return Some(binding.value.clone());
                }
                guard.parent.clone()
            };
            scope = parent?;
        }
    }

    /// All overloads registered under `name` in the nearest scope that binds it.
    pub fn overloads(env: &EnvironmentRef, name: &str) -> Vec<Value> {
        let mut scope = Arc::clone(env);
        loop {
            let parent = {
                let guard = scope.read();
                if guard.bindings.contains_key(name) {
                    return guard.overloads.get(name).cloned().unwrap_or_default();
                }
                guard.parent.clone()
            };
            match parent {
                Some(parent) => scope = parent,
                None => return Vec::new(),
            }
        }
    }

    /// Rewrites `name` in the nearest scope that owns it.
    pub fn assign(env: &EnvironmentRef, name: &str, value: Value) -> Result<(), ScopeError> {
        let mut scope = Arc::clone(env);
        loop {
            let parent = {
                let mut guard = scope.write();
                if let Some(binding) = guard.bindings.get_mut(name) {
                    if binding.constant {
                        return Err(ScopeError::Constant(name.to_string()));
                    }
                    binding.value = value;
                    guard.overloads.shift_remove(name);
                    return Ok(());
                }
                guard.parent.clone()
            };
            match parent {
                Some(parent) => scope = parent,
                None => return Err(ScopeError::Undeclared(name.to_string())),
            }
        }
    }

    /// True when `target` is `env` or one of its ancestors.
    pub fn encloses(env: &EnvironmentRef, target: &EnvironmentRef) -> bool {
        let mut scope = Some(Arc::clone(env));
        while let Some(current) = scope {
            if Arc::ptr_eq(&current, target) {
                return true;
            }
            scope = current.read().parent.clone();
        }
        false
    }
}

#[derive(Debug, Clone)]
pub struct Binding {
    pub value: Value,
    pub constant: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn define_twice_in_one_scope_fails() {
        let env = Environment::new();
        env.write().define("x", Value::int(1)).expect("first define");
        let err = env.write().define("x", Value::int(2)).expect_err("second define");
        assert_eq!(err.to_string(), "Identifier 'x' has already been declared");
    }

    #[test]
    fn shadowing_does_not_touch_parent() {
        let parent = Environment::new();
        parent.write().define("x", Value::int(1)).expect("define");
        let child = Environment::with_parent(Arc::clone(&parent));
        child.write().define("x", Value::int(2)).expect("shadow");
        assert_eq!(Environment::get(&child, "x").map(|v| v.to_string()), Some("2".into()));
        assert_eq!(Environment::get(&parent, "x").map(|v| v.to_string()), Some("1".into()));
    }

    #[test]
    fn assign_rewrites_nearest_owner() {
        let parent = Environment::new();
        parent.write().define("x", Value::int(1)).expect("define");
        let child = Environment::with_parent(Arc::clone(&parent));
        Environment::assign(&child, "x", Value::int(5)).expect("assign");
        assert!(!child.read().contains_local("x"));
        assert_eq!(Environment::get(&parent, "x").map(|v| v.to_string()), Some("5".into()));
    }

    #[test]
    fn constants_and_undeclared_names_reject_assignment() {
        let env = Environment::new();
        env.write().define_const("PI", Value::float(3.14)).expect("define");
        assert_eq!(
            Environment::assign(&env, "PI", Value::int(3)),
            Err(ScopeError::Constant("PI".into()))
        );
        assert_eq!(
            Environment::assign(&env, "missing", Value::int(3)),
            Err(ScopeError::Undeclared("missing".into()))
        );
    }

    #[test]
    fn del_only_touches_current_scope() {
        let parent = Environment::new();
        parent.write().define("@", Value::int(1)).expect("define");
        let child = Environment::with_parent(Arc::clone(&parent));
        assert!(!child.write().del("@"));
        assert!(Environment::get(&child, "@").is_some());
        assert!(parent.write().del("@"));
        assert!(Environment::get(&child, "@").is_none());
    }
}
