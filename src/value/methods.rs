//! Per-kind method tables behind `value.method(args)`.
//!
//! Packages, instances and enums resolve their members through the runtime;
//! everything else lands here.

use crate::{
    concurrency::ChannelError,
    value::{range_len, Host, Value, ValueKind},
};

mod array;
mod boolean;
mod dict;
mod number;
mod string;
mod time;

pub(crate) type MethodResult = Result<Value, String>;

pub fn call_method(host: &dyn Host, target: &Value, name: &str, args: &[Value]) -> Value {
    let result = match target.kind() {
        ValueKind::String(text) => string::call(text, name, args),
        ValueKind::Array(_) => array::call(host, target, name, args),
        ValueKind::Dict(_) => dict::call(host, target, name, args),
        ValueKind::Int(n) => number::call_int(*n, name, args),
        ValueKind::Float(n) => number::call_float(*n, name, args),
        ValueKind::Bool(b) => boolean::call(*b, name, args),
        ValueKind::Null => boolean::call_null(name, args),
        ValueKind::Duration(delta) => time::call_duration(*delta, name, args),
        ValueKind::Time(at) => time::call_time(*at, name, args),
        ValueKind::Range { start, end } => call_range(*start, *end, name, args),
        ValueKind::Channel(_) => call_channel(target, name, args),
        ValueKind::Promise(promise) => match name {
            "is_done" => arity(name, args, 0).map(|_| Value::bool(promise.is_done())),
            "then" => arity(name, args, 1).and_then(|_| settle(promise.then(host, args[0].clone()))),
            _ => Err(unknown(name, "promises")),
        },
        ValueKind::Module(module) => match module.members.get(name) {
            Some(member) => settle(host.call(member, args.to_vec())),
            None => Err(format!(
                "Module '{}' has no function '{name}()'",
                module.name
            )),
        },
        ValueKind::CustomError(error) => match name {
            "message" | "string" => arity(name, args, 0).map(|_| Value::string(target.inspect())),
            "name" => arity(name, args, 0).map(|_| Value::string(error.name.clone())),
            _ => Err(unknown(name, "errors")),
        },
        _ => Err(format!(
            "Method '{name}' is not supported on {}",
            target.type_name()
        )),
    };
    result.unwrap_or_else(Value::error)
}

fn call_range(start: i64, end: i64, name: &str, args: &[Value]) -> MethodResult {
    match name {
        "to_array" => {
            arity(name, args, 0)?;
            Ok(Value::array((start..=end).map(Value::int).collect()))
        }
        "contains" => {
            arity(name, args, 1)?;
            let n = int_arg(name, args, 0)?;
            Ok(Value::bool((start..=end).contains(&n)))
        }
        "length" => {
            arity(name, args, 0)?;
            range_len(start, end)
                .map(Value::int)
                .ok_or_else(|| format!("range {start}..{end} is too large to measure"))
        }
        _ => Err(unknown(name, "ranges")),
    }
}

/// Shared by `ch.send(v)` and the `send(ch, v)` builtin family.
pub fn call_channel(target: &Value, name: &str, args: &[Value]) -> MethodResult {
    let ValueKind::Channel(channel) = target.kind() else {
        return Err(format!("{name}() expects a CHANNEL, got {}", target.type_name()));
    };
    match name {
        "send" => {
            arity(name, args, 1)?;
            channel
                .send(args[0].clone())
                .map(|_| Value::null())
                .map_err(|err: ChannelError| err.to_string())
        }
        "receive" => {
            arity(name, args, 0)?;
            Ok(channel.receive().unwrap_or_else(Value::null))
        }
        "close" => {
            arity(name, args, 0)?;
            channel.close();
            Ok(Value::null())
        }
        "is_closed" => {
            arity(name, args, 0)?;
            Ok(Value::bool(channel.is_closed()))
        }
        _ => Err(unknown(name, "channels")),
    }
}

pub(crate) fn unknown(name: &str, kind: &str) -> String {
    format!("Method '{name}' is not supported on {kind}")
}

pub(crate) fn arity(name: &str, args: &[Value], expected: usize) -> Result<(), String> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(format!(
            "{name}() expects {expected} arguments, got {}",
            args.len()
        ))
    }
}

pub(crate) fn arity_between(name: &str, args: &[Value], min: usize, max: usize) -> Result<(), String> {
    if (min..=max).contains(&args.len()) {
        Ok(())
    } else {
        Err(format!(
            "{name}() expects {min} to {max} arguments, got {}",
            args.len()
        ))
    }
}

pub(crate) fn int_arg(name: &str, args: &[Value], idx: usize) -> Result<i64, String> {
    args.get(idx)
        .and_then(Value::as_int)
        .ok_or_else(|| type_error(name, args, idx, "INTEGER"))
}

pub(crate) fn num_arg(name: &str, args: &[Value], idx: usize) -> Result<f64, String> {
    args.get(idx)
        .and_then(Value::as_f64)
        .ok_or_else(|| type_error(name, args, idx, "number"))
}

pub(crate) fn str_arg<'a>(name: &str, args: &'a [Value], idx: usize) -> Result<&'a str, String> {
    args.get(idx)
        .and_then(Value::as_str)
        .ok_or_else(|| type_error(name, args, idx, "STRING"))
}

pub(crate) fn callable_arg<'a>(name: &str, args: &'a [Value], idx: usize) -> Result<&'a Value, String> {
    args.get(idx)
        .filter(|value| value.is_callable())
        .ok_or_else(|| type_error(name, args, idx, "function"))
}

fn type_error(name: &str, args: &[Value], idx: usize, expected: &str) -> String {
    let found = args.get(idx).map_or("nothing", Value::type_name);
    format!("{name}() expects a {expected} as argument {}, got {found}", idx + 1)
}

/// Turns an Error value produced by a callback into the method's failure.
pub(crate) fn settle(result: Value) -> MethodResult {
    match result.error_message() {
        Some(message) => Err(message.to_string()),
        None => Ok(result),
    }
}

pub(crate) fn invoke(host: &dyn Host, function: &Value, args: Vec<Value>) -> MethodResult {
    settle(host.call(function, args))
}
