use std::{collections::HashSet, fmt, sync::Arc};

use chrono::{DateTime, Local, TimeDelta};
use indexmap::IndexMap;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::{
    ast::FunctionLiteral,
    concurrency::{Channel, Promise},
    environment::EnvironmentRef,
    output::Output,
};

pub mod methods;

/// Accepted by builtins that take any number of arguments.
pub const VARIADIC: usize = usize::MAX;

#[derive(Clone)]
pub struct Value(pub Arc<ValueKind>);

impl Value {
    pub fn new(kind: ValueKind) -> Self {
        Self(Arc::new(kind))
    }

    pub fn null() -> Self {
        Self::new(ValueKind::Null)
    }

    pub fn bool(value: bool) -> Self {
        Self::new(ValueKind::Bool(value))
    }

    pub fn int(value: i64) -> Self {
        Self::new(ValueKind::Int(value))
    }

    pub fn float(value: f64) -> Self {
        Self::new(ValueKind::Float(value))
    }

    /// Float result that collapses to an Integer when it has no fractional part.
    pub fn number(value: f64) -> Self {
        if value.is_finite() && value.fract() == 0.0 && value.abs() < i64::MAX as f64 {
            Self::int(value as i64)
        } else {
            Self::float(value)
        }
    }

    pub fn string(value: impl Into<String>) -> Self {
        Self::new(ValueKind::String(value.into()))
    }

    pub fn array(values: Vec<Value>) -> Self {
        Self::new(ValueKind::Array(RwLock::new(values)))
    }

    pub fn dict(dict: Dict) -> Self {
        Self::new(ValueKind::Dict(RwLock::new(dict)))
    }

    pub fn range(start: i64, end: i64) -> Self {
        Self::new(ValueKind::Range { start, end })
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(ValueKind::Error(message.into()))
    }

    pub fn duration(delta: TimeDelta) -> Self {
        Self::new(ValueKind::Duration(delta))
    }

    pub fn time(at: DateTime<Local>) -> Self {
        Self::new(ValueKind::Time(at))
    }

    pub fn builtin(name: &'static str, arity: usize, callback: BuiltinFn) -> Self {
        Self::new(ValueKind::Builtin(Builtin {
            name,
            arity,
            callback,
        }))
    }

    pub fn module(name: impl Into<String>, members: IndexMap<String, Value>) -> Self {
        Self::new(ValueKind::Module(Module {
            name: name.into(),
            members,
        }))
    }

    pub fn function(literal: Arc<FunctionLiteral>, env: EnvironmentRef) -> Self {
        let is_async = literal.is_async;
        let function = Function { literal, env };
        if is_async {
            Self::new(ValueKind::AsyncFunction(function))
        } else {
            Self::new(ValueKind::Function(function))
        }
    }

    pub fn kind(&self) -> &ValueKind {
        &self.0
    }

    pub fn type_name(&self) -> &'static str {
        match &*self.0 {
            ValueKind::Null => "NULL",
            ValueKind::Bool(_) => "BOOLEAN",
            ValueKind::Int(_) => "INTEGER",
            ValueKind::Float(_) => "FLOAT",
            ValueKind::String(_) => "STRING",
            ValueKind::Array(_) => "ARRAY",
            ValueKind::Dict(_) => "DICT",
            ValueKind::Range { .. } => "RANGE",
            ValueKind::Function(_) => "FUNCTION",
            ValueKind::AsyncFunction(_) => "ASYNC_FUNCTION",
            ValueKind::Builtin(_) => "BUILTIN",
            ValueKind::Module(_) => "MODULE",
            ValueKind::Package(_) => "PACKAGE",
            ValueKind::Instance(_) => "INSTANCE",
            ValueKind::Enum(_) => "ENUM",
            ValueKind::Error(_) => "ERROR",
            ValueKind::ErrorType(_) => "ERROR_TYPE",
            ValueKind::CustomError(_) => "CUSTOM_ERROR",
            ValueKind::Duration(_) => "DURATION",
            ValueKind::Time(_) => "TIME",
            ValueKind::Channel(_) => "CHANNEL",
            ValueKind::Promise(_) => "PROMISE",
            ValueKind::Pointer(_) => "POINTER",
            ValueKind::Return(_) => "RETURN_VALUE",
            ValueKind::Break => "BREAK",
            ValueKind::Continue => "CONTINUE",
        }
    }

    /// Only `null` and `false` are falsy.
    pub fn is_truthy(&self) -> bool {
        !matches!(&*self.0, ValueKind::Null | ValueKind::Bool(false))
    }

    pub fn is_null(&self) -> bool {
        matches!(&*self.0, ValueKind::Null)
    }

    pub fn is_error(&self) -> bool {
        matches!(&*self.0, ValueKind::Error(_))
    }

    /// Return, break, continue and error values stop statement sequencing.
    pub fn is_signal(&self) -> bool {
        matches!(
            &*self.0,
            ValueKind::Return(_) | ValueKind::Break | ValueKind::Continue | ValueKind::Error(_)
        )
    }

    pub fn is_callable(&self) -> bool {
        matches!(
            &*self.0,
            ValueKind::Function(_)
                | ValueKind::AsyncFunction(_)
                | ValueKind::Builtin(_)
                | ValueKind::ErrorType(_)
                | ValueKind::Package(_)
        )
    }

    pub fn as_int(&self) -> Option<i64> {
        match &*self.0 {
            ValueKind::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match &*self.0 {
            ValueKind::Int(n) => Some(*n as f64),
            ValueKind::Float(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match &*self.0 {
            ValueKind::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match &*self.0 {
            ValueKind::Error(message) => Some(message),
            _ => None,
        }
    }

    pub fn inspect(&self) -> String {
        self.to_string()
    }

    /// Same type tag and same rendering; used by `switch`, `match`, `in` and
    /// the value-based array helpers.
    pub fn same_rendering(&self, other: &Value) -> bool {
        self.type_name() == other.type_name() && self.inspect() == other.inspect()
    }

    pub fn ptr_eq(&self, other: &Value) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    pub fn hash_key(&self) -> Option<HashKey> {
        match &*self.0 {
            ValueKind::Int(n) => Some(HashKey::Int(*n)),
            ValueKind::Float(n) => Some(HashKey::Float(n.to_bits())),
            ValueKind::String(s) => Some(HashKey::Str(s.clone())),
            ValueKind::Bool(b) => Some(HashKey::Bool(*b)),
            _ => None,
        }
    }

    /// Snapshot of the iterable contents, or `None` for non-iterable values.
    pub fn iter(&self) -> Option<ValueIter> {
        let items = match &*self.0 {
            ValueKind::Array(elements) => elements
                .read()
                .iter()
                .enumerate()
                .map(|(idx, value)| (Value::int(idx as i64), value.clone()))
                .collect(),
            ValueKind::String(text) => text
                .chars()
                .enumerate()
                .map(|(idx, ch)| (Value::int(idx as i64), Value::string(ch.to_string())))
                .collect(),
            ValueKind::Dict(dict) => {
                let mut pairs: Vec<_> = dict
                    .read()
                    .iter()
                    .map(|pair| (pair.key.clone(), pair.value.clone()))
                    .collect();
                pairs.sort_by_cached_key(|(key, _)| key.inspect());
                pairs
            }
            ValueKind::Range { start, end } => {
                return Some(ValueIter::Range {
                    start: *start,
                    end: *end,
                    current: (start <= end).then_some(*start),
                })
            }
            _ => return None,
        };
        Some(ValueIter::Snapshot { items, offset: 0 })
    }

    pub fn array_guard(&self) -> Option<RwLockReadGuard<'_, Vec<Value>>> {
        match &*self.0 {
            ValueKind::Array(elements) => Some(elements.read()),
            _ => None,
        }
    }

    pub fn array_guard_mut(&self) -> Option<RwLockWriteGuard<'_, Vec<Value>>> {
        match &*self.0 {
            ValueKind::Array(elements) => Some(elements.write()),
            _ => None,
        }
    }

    /// Copy of the elements of an Array value.
    pub fn array_items(&self) -> Option<Vec<Value>> {
        self.array_guard().map(|elements| elements.clone())
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &*self.0 {
            ValueKind::Null => write!(f, "null"),
            ValueKind::Bool(b) => write!(f, "{b}"),
            ValueKind::Int(n) => write!(f, "{n}"),
            ValueKind::Float(n) => write!(f, "{n}"),
            ValueKind::String(s) => write!(f, "{s}"),
            ValueKind::Array(elements) => {
                write!(f, "[")?;
                for (idx, value) in elements.read().iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{value}")?;
                }
                write!(f, "]")
            }
            ValueKind::Dict(dict) => {
                write!(f, "{{")?;
                for (idx, pair) in dict.read().iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", pair.key, pair.value)?;
                }
                write!(f, "}}")
            }
            ValueKind::Range { start, end } => write!(f, "{start}..{end}"),
            ValueKind::Function(function) => write!(f, "func{}", function.signature()),
            ValueKind::AsyncFunction(function) => write!(f, "async func{}", function.signature()),
            ValueKind::Builtin(builtin) => write!(f, "builtin function {}", builtin.name),
            ValueKind::Module(module) => write!(f, "Module: {}", module.name),
            ValueKind::Package(package) => write!(f, "package: {}", package.name),
            ValueKind::Instance(instance) => match &*instance.package.0 {
                ValueKind::Package(package) => write!(f, "Package: {}", package.name),
                _ => write!(f, "Package: ?"),
            },
            ValueKind::Enum(value) => {
                write!(f, "enum {} {{ ", value.name)?;
                for (idx, (name, member)) in value.members.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name} = {member}")?;
                }
                write!(f, " }}")
            }
            ValueKind::Error(message) => write!(f, "Error: {message}"),
            ValueKind::ErrorType(error_type) => write!(
                f,
                "error type: {}({})",
                error_type.name,
                error_type.params.join(", ")
            ),
            ValueKind::CustomError(error) => {
                let args: Vec<String> = error.args.iter().map(Value::inspect).collect();
                write!(f, "{}: {}({})", error.name, error.name, args.join(", "))
            }
            ValueKind::Duration(delta) => write!(f, "{}", format_duration(*delta)),
            ValueKind::Time(at) => write!(f, "{}", at.format("%Y-%m-%d %H:%M:%S")),
            ValueKind::Channel(channel) => write!(f, "{channel}"),
            ValueKind::Promise(promise) => write!(f, "{promise}"),
            ValueKind::Pointer(target) => write!(f, "Pointer({target})"),
            ValueKind::Return(value) => write!(f, "{value}"),
            ValueKind::Break => write!(f, "break"),
            ValueKind::Continue => write!(f, "continue"),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.type_name(), self)
    }
}

pub enum ValueKind {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(RwLock<Vec<Value>>),
    Dict(RwLock<Dict>),
    Range { start: i64, end: i64 },
    Function(Function),
    AsyncFunction(Function),
    Builtin(Builtin),
    Module(Module),
    Package(Package),
    Instance(Instance),
    Enum(EnumValue),
    Error(String),
    ErrorType(ErrorType),
    CustomError(CustomError),
    Duration(TimeDelta),
    Time(DateTime<Local>),
    Channel(Channel),
    Promise(Promise),
    Pointer(Value),
    Return(Value),
    Break,
    Continue,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum HashKey {
    Int(i64),
    Float(u64),
    Str(String),
    Bool(bool),
}

#[derive(Debug, Clone)]
pub struct DictPair {
    pub key: Value,
    pub value: Value,
}

/// Insertion-ordered map from hashable values to values.
#[derive(Debug, Clone, Default)]
pub struct Dict {
    entries: IndexMap<HashKey, DictPair>,
}

impl Dict {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: Value, value: Value) -> Result<(), String> {
        let hash = key
            .hash_key()
            .ok_or_else(|| format!("unusable as dict key: {}", key.type_name()))?;
        self.entries.insert(hash, DictPair { key, value });
        Ok(())
    }

    pub fn insert_str(&mut self, key: &str, value: Value) {
        self.entries.insert(
            HashKey::Str(key.to_string()),
            DictPair {
                key: Value::string(key),
                value,
            },
        );
    }

    pub fn get(&self, key: &Value) -> Option<Value> {
        let hash = key.hash_key()?;
        self.entries.get(&hash).map(|pair| pair.value.clone())
    }

    pub fn contains(&self, key: &Value) -> bool {
        key.hash_key()
            .is_some_and(|hash| self.entries.contains_key(&hash))
    }

    pub fn remove(&mut self, key: &Value) -> Option<Value> {
        let hash = key.hash_key()?;
        self.entries.shift_remove(&hash).map(|pair| pair.value)
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &DictPair> {
        self.entries.values()
    }

    pub fn keys(&self) -> Vec<Value> {
        self.iter().map(|pair| pair.key.clone()).collect()
    }

    pub fn values(&self) -> Vec<Value> {
        self.iter().map(|pair| pair.value.clone()).collect()
    }

    /// Copies every pair of `other` over `self`; `other` wins on collisions.
    pub fn merge(&mut self, other: &Dict) {
        for (hash, pair) in &other.entries {
            self.entries.insert(hash.clone(), pair.clone());
        }
    }
}

/// Key/value cursor used by `for-in`; arrays and strings yield
/// (index, element), dicts (key, value) sorted by key rendering and ranges
/// (n, n). Ranges count on the fly instead of holding their elements.
pub enum ValueIter {
    Snapshot {
        items: Vec<(Value, Value)>,
        offset: usize,
    },
    Range {
        start: i64,
        end: i64,
        current: Option<i64>,
    },
}

impl ValueIter {
    pub fn reset(&mut self) {
        match self {
            ValueIter::Snapshot { offset, .. } => *offset = 0,
            ValueIter::Range {
                start,
                end,
                current,
            } => *current = (*start <= *end).then_some(*start),
        }
    }

    /// Items left to yield, saturating at `usize::MAX`.
    pub fn len(&self) -> usize {
        match self {
            ValueIter::Snapshot { items, offset } => items.len().saturating_sub(*offset),
            ValueIter::Range { end, current, .. } => current
                .map(|n| i128::from(*end) - i128::from(n) + 1)
                .map_or(0, |left| usize::try_from(left).unwrap_or(usize::MAX)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Iterator for ValueIter {
    type Item = (Value, Value);

    fn next(&mut self) -> Option<Self::Item> {
        match self {
            ValueIter::Snapshot { items, offset } => {
                let item = items.get(*offset).cloned()?;
                *offset += 1;
                Some(item)
            }
            ValueIter::Range { end, current, .. } => {
                let n = (*current)?;
                *current = n.checked_add(1).filter(|next| *next <= *end);
                Some((Value::int(n), Value::int(n)))
            }
        }
    }
}

/// Element count of the inclusive range `start..end`, or `None` when it
/// does not fit an Integer.
pub fn range_len(start: i64, end: i64) -> Option<i64> {
    let count = (i128::from(end) - i128::from(start) + 1).max(0);
    i64::try_from(count).ok()
}

/// A user function closed over the environment it was defined in.
#[derive(Clone)]
pub struct Function {
    pub literal: Arc<FunctionLiteral>,
    pub env: EnvironmentRef,
}

impl Function {
    pub fn name(&self) -> Option<&str> {
        self.literal.name.as_deref()
    }

    /// Number of parameters without a default value.
    pub fn required_params(&self) -> usize {
        self.literal
            .params
            .iter()
            .filter(|param| param.default.is_none())
            .count()
    }

    pub fn accepts(&self, count: usize) -> bool {
        count >= self.required_params() && count <= self.literal.params.len()
    }

    fn signature(&self) -> String {
        let params: Vec<&str> = self
            .literal
            .params
            .iter()
            .map(|param| param.name.as_str())
            .collect();
        match self.name() {
            Some(name) => format!(" {name}({})", params.join(", ")),
            None => format!("({})", params.join(", ")),
        }
    }
}

pub type BuiltinFn = fn(&dyn Host, &[Value]) -> Value;

#[derive(Clone)]
pub struct Builtin {
    pub name: &'static str,
    pub arity: usize,
    pub callback: BuiltinFn,
}

impl Builtin {
    pub fn call(&self, host: &dyn Host, args: &[Value]) -> Value {
        if self.arity != VARIADIC && args.len() != self.arity {
            return Value::error(format!(
                "function `{}` expected {} arguments but received {}",
                self.name,
                self.arity,
                args.len()
            ));
        }
        (self.callback)(host, args)
    }
}

pub struct Module {
    pub name: String,
    pub members: IndexMap<String, Value>,
}

/// A namespace with its own scope; `_`-prefixed names are private to it.
pub struct Package {
    pub name: String,
    pub env: EnvironmentRef,
    pub scope: EnvironmentRef,
    pub private_names: HashSet<String>,
}

impl Package {
    pub fn is_private(&self, name: &str) -> bool {
        self.private_names.contains(name) || name.starts_with('_')
    }
}

pub struct Instance {
    pub package: Value,
    pub env: EnvironmentRef,
}

pub struct EnumValue {
    pub name: String,
    pub members: IndexMap<String, Value>,
}

pub struct ErrorType {
    pub name: String,
    pub params: Vec<String>,
}

pub struct CustomError {
    pub name: String,
    pub params: Vec<String>,
    pub args: Vec<Value>,
}

/// What builtins and method tables may ask of the running evaluator.
pub trait Host {
    fn call(&self, function: &Value, args: Vec<Value>) -> Value;
    fn output(&self) -> &Output;
}

/// Renders like `1h30m0s`, `1.5s` or `250ms`.
pub fn format_duration(delta: TimeDelta) -> String {
    let negative = delta < TimeDelta::zero();
    let delta = if negative { -delta } else { delta };
    let total_nanos = delta.num_nanoseconds().unwrap_or(i64::MAX);
    let sign = if negative { "-" } else { "" };
    if total_nanos == 0 {
        return "0s".into();
    }
    if total_nanos < 1_000 {
        return format!("{sign}{total_nanos}ns");
    }
    if total_nanos < 1_000_000 {
        return format!("{sign}{}µs", trim_fraction(total_nanos as f64 / 1_000.0));
    }
    if total_nanos < 1_000_000_000 {
        return format!("{sign}{}ms", trim_fraction(total_nanos as f64 / 1_000_000.0));
    }
    let hours = total_nanos / 3_600_000_000_000;
    let minutes = (total_nanos / 60_000_000_000) % 60;
    let seconds = (total_nanos % 60_000_000_000) as f64 / 1_000_000_000.0;
    let mut out = String::from(sign);
    if hours > 0 {
        out.push_str(&format!("{hours}h"));
    }
    if hours > 0 || minutes > 0 {
        out.push_str(&format!("{minutes}m"));
    }
    out.push_str(&format!("{}s", trim_fraction(seconds)));
    out
}

fn trim_fraction(value: f64) -> String {
    let text = format!("{value:.9}");
    text.trim_end_matches('0').trim_end_matches('.').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_null_and_false_are_falsy() {
        assert!(!Value::null().is_truthy());
        assert!(!Value::bool(false).is_truthy());
        assert!(Value::int(0).is_truthy());
        assert!(Value::string("").is_truthy());
        assert!(Value::array(Vec::new()).is_truthy());
    }

    #[test]
    fn containers_render_strings_raw() {
        let mut dict = Dict::new();
        dict.insert_str("name", Value::string("vint"));
        let value = Value::array(vec![Value::int(1), Value::string("a"), Value::dict(dict)]);
        assert_eq!(value.inspect(), "[1, a, {name: vint}]");
    }

    #[test]
    fn number_collapses_integral_floats() {
        assert_eq!(Value::number(3.0).type_name(), "INTEGER");
        assert_eq!(Value::number(3.5).type_name(), "FLOAT");
        assert_eq!(Value::float(2.0).inspect(), "2");
    }

    #[test]
    fn dict_iteration_sorts_by_rendering() {
        let mut dict = Dict::new();
        dict.insert_str("b", Value::int(2));
        dict.insert_str("a", Value::int(1));
        let keys: Vec<String> = Value::dict(dict)
            .iter()
            .expect("dicts iterate")
            .map(|(key, _)| key.inspect())
            .collect();
        assert_eq!(keys, vec!["a", "b"]);
    }

    #[test]
    fn int_and_float_keys_are_distinct() {
        let mut dict = Dict::new();
        dict.insert(Value::int(1), Value::string("int")).expect("hashable");
        dict.insert(Value::float(1.0), Value::string("float")).expect("hashable");
        assert_eq!(dict.len(), 2);
        assert!(dict.insert(Value::array(Vec::new()), Value::null()).is_err());
    }

    #[test]
    fn iterator_resets() {
        let mut iter = Value::range(1, 3).iter().expect("ranges iterate");
        assert_eq!(iter.by_ref().count(), 3);
        assert!(iter.next().is_none());
        iter.reset();
        assert_eq!(iter.next().map(|(_, v)| v.inspect()), Some("1".into()));
    }

    #[test]
    fn wide_ranges_iterate_without_materialising() {
        let mut iter = Value::range(0, i64::MAX).iter().expect("ranges iterate");
        assert_eq!(iter.len(), usize::MAX);
        assert_eq!(iter.next().map(|(_, v)| v.inspect()), Some("0".into()));

        let mut tail = Value::range(i64::MAX - 1, i64::MAX).iter().expect("ranges iterate");
        assert_eq!(tail.by_ref().count(), 2);
        assert!(tail.next().is_none());
        assert!(Value::range(3, 1).iter().expect("ranges iterate").is_empty());
    }

    #[test]
    fn range_len_reports_overflow() {
        assert_eq!(range_len(1, 3), Some(3));
        assert_eq!(range_len(5, 1), Some(0));
        assert_eq!(range_len(i64::MIN, i64::MAX), None);
    }

    #[test]
    fn durations_render_compactly() {
        assert_eq!(format_duration(TimeDelta::milliseconds(250)), "250ms");
        assert_eq!(format_duration(TimeDelta::milliseconds(1500)), "1.5s");
        assert_eq!(format_duration(TimeDelta::minutes(90)), "1h30m0s");
    }
}
