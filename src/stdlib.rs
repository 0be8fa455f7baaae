//! Native functions available to every script, and the built-in modules
//! `import` can bind without touching the filesystem.

use std::{thread, time::Duration as StdDuration};

use chrono::{Local, TimeDelta};
use indexmap::IndexMap;

use crate::value::{
    methods::{self, call_channel},
    range_len, Host, Value, ValueKind, VARIADIC,
};

type Outcome = Result<Value, String>;

/// Registers a native function whose body reports failures as `Err(message)`.
macro_rules! native {
    ($name:literal, $arity:expr, $body:path) => {
        Value::builtin($name, $arity, |host, args| finish($body(host, args)))
    };
}

/// A module member that forwards to the method of the same kind on its first
/// argument, so `strings.upper(s)` behaves like `s.upper()`.
macro_rules! forward {
    ($name:literal, $method:literal) => {
        Value::builtin($name, VARIADIC, |host, args| match args.split_first() {
            Some((target, rest)) => methods::call_method(host, target, $method, rest),
            None => Value::error(format!("{}() expects at least 1 argument, got 0", $name)),
        })
    };
}

pub fn builtins() -> IndexMap<&'static str, Value> {
    let entries = [
        ("print", native!("print", VARIADIC, io_print)),
        ("println", native!("println", VARIADIC, io_println)),
        ("type", native!("type", 1, core_type)),
        ("len", native!("len", 1, collections_len)),
        ("range", native!("range", VARIADIC, collections_range)),
        ("append", native!("append", VARIADIC, collections_append)),
        ("keys", native!("keys", 1, collections_keys)),
        ("values", native!("values", 1, collections_values)),
        ("has_key", native!("has_key", 2, collections_has_key)),
        ("string", native!("string", 1, convert_string)),
        ("int", native!("int", 1, convert_int)),
        ("float", native!("float", 1, convert_float)),
        ("bool", native!("bool", 1, convert_bool)),
        ("abs", native!("abs", 1, math_abs)),
        ("min", native!("min", VARIADIC, math_min)),
        ("max", native!("max", VARIADIC, math_max)),
        ("is_error", native!("is_error", 1, core_is_error)),
        ("sleep", native!("sleep", 1, time_sleep)),
        ("now", native!("now", 0, time_now)),
        ("duration", native!("duration", VARIADIC, time_duration)),
        ("send", native!("send", 2, channel_send)),
        ("receive", native!("receive", 1, channel_receive)),
        ("close", native!("close", 1, channel_close)),
    ];
    entries.into_iter().collect()
}

/// The module mapper consulted by `import` before any file lookup.
pub fn modules() -> IndexMap<&'static str, Value> {
    let mut math = IndexMap::new();
    math.insert("PI".to_string(), Value::float(std::f64::consts::PI));
    math.insert("E".to_string(), Value::float(std::f64::consts::E));
    math.insert("abs".to_string(), native!("abs", 1, math_abs));
    math.insert("sqrt".to_string(), native!("sqrt", 1, math_sqrt));
    math.insert("pow".to_string(), native!("pow", 2, math_pow));
    math.insert("floor".to_string(), native!("floor", 1, math_floor));
    math.insert("ceil".to_string(), native!("ceil", 1, math_ceil));
    math.insert("round".to_string(), native!("round", 1, math_round));
    math.insert("min".to_string(), native!("min", VARIADIC, math_min));
    math.insert("max".to_string(), native!("max", VARIADIC, math_max));

    let mut time = IndexMap::new();
    time.insert("now".to_string(), native!("now", 0, time_now));
    time.insert("sleep".to_string(), native!("sleep", 1, time_sleep));
    time.insert("since".to_string(), native!("since", 1, time_since));
    time.insert("duration".to_string(), native!("duration", VARIADIC, time_duration));

    let mut strings = IndexMap::new();
    strings.insert("upper".to_string(), forward!("upper", "upper"));
    strings.insert("lower".to_string(), forward!("lower", "lower"));
    strings.insert("trim".to_string(), forward!("trim", "trim"));
    strings.insert("split".to_string(), forward!("split", "split"));
    strings.insert("replace".to_string(), forward!("replace", "replace"));
    strings.insert("contains".to_string(), forward!("contains", "contains"));
    strings.insert("repeat".to_string(), forward!("repeat", "repeat"));
    strings.insert("starts_with".to_string(), forward!("starts_with", "startsWith"));
    strings.insert("ends_with".to_string(), forward!("ends_with", "endsWith"));
    strings.insert("join".to_string(), native!("join", 2, strings_join));

    let mut mapper = IndexMap::new();
    mapper.insert("math", Value::module("math", math));
    mapper.insert("time", Value::module("time", time));
    mapper.insert("strings", Value::module("strings", strings));
    mapper
}

fn finish(outcome: Outcome) -> Value {
    outcome.unwrap_or_else(Value::error)
}

fn ensure_between(args: &[Value], min: usize, max: usize, name: &str) -> Result<(), String> {
    if args.len() < min || args.len() > max {
        return Err(format!(
            "{name}() expects {min} to {max} arguments, got {}",
            args.len()
        ));
    }
    Ok(())
}

fn expect_string<'a>(value: &'a Value, name: &str) -> Result<&'a str, String> {
    value
        .as_str()
        .ok_or_else(|| format!("{name}() expects a STRING, got {}", value.type_name()))
}

fn expect_int(value: &Value, name: &str) -> Result<i64, String> {
    value
        .as_int()
        .ok_or_else(|| format!("{name}() expects an INTEGER, got {}", value.type_name()))
}

fn expect_number(value: &Value, name: &str) -> Result<f64, String> {
    value
        .as_f64()
        .ok_or_else(|| format!("{name}() expects a number, got {}", value.type_name()))
}

fn joined(args: &[Value]) -> String {
    args.iter().map(Value::inspect).collect::<Vec<_>>().join(" ")
}

fn io_print(host: &dyn Host, args: &[Value]) -> Outcome {
    host.output().print(&joined(args));
    Ok(Value::null())
}

fn io_println(host: &dyn Host, args: &[Value]) -> Outcome {
    host.output().println(&joined(args));
    Ok(Value::null())
}

fn core_type(_: &dyn Host, args: &[Value]) -> Outcome {
    Ok(Value::string(args[0].type_name()))
}

fn core_is_error(_: &dyn Host, args: &[Value]) -> Outcome {
    Ok(Value::bool(matches!(
        args[0].kind(),
        ValueKind::Error(_) | ValueKind::CustomError(_)
    )))
}

fn collections_len(_: &dyn Host, args: &[Value]) -> Outcome {
    let len = match args[0].kind() {
        ValueKind::String(text) => text.chars().count(),
        ValueKind::Array(elements) => elements.read().len(),
        ValueKind::Dict(dict) => dict.read().len(),
        ValueKind::Range { start, end } => {
            return range_len(*start, *end)
                .map(Value::int)
                .ok_or_else(|| format!("range {start}..{end} is too large to measure"))
        }
        _ => {
            return Err(format!(
                "argument to `len` not supported, got {}",
                args[0].type_name()
            ))
        }
    };
    Ok(Value::int(len as i64))
}

/// `range(end)`, `range(start, end)` or `range(start, end, step)`; the end
/// is exclusive.
fn collections_range(_: &dyn Host, args: &[Value]) -> Outcome {
    let ints = args
        .iter()
        .map(|arg| expect_int(arg, "range"))
        .collect::<Result<Vec<_>, _>>()?;
    let (start, end, step) = match ints.as_slice() {
        [end] => (0, *end, 1),
        [start, end] => (*start, *end, 1),
        [start, end, step] => (*start, *end, *step),
        _ => {
            return Err(format!(
                "range() expects 1 to 3 arguments, got {}",
                ints.len()
            ))
        }
    };
    if step == 0 {
        return Err("Step cannot be zero".into());
    }
    let mut elements = Vec::new();
    let mut current = start;
    while (step > 0 && current < end) || (step < 0 && current > end) {
        elements.push(Value::int(current));
        current = match current.checked_add(step) {
            Some(next) => next,
            None => break,
        };
    }
    Ok(Value::array(elements))
}

fn collections_append(_: &dyn Host, args: &[Value]) -> Outcome {
    let Some((target, extra)) = args.split_first() else {
        return Err("append() expects at least 2 arguments, got 0".into());
    };
    let Some(mut elements) = target.array_items() else {
        return Err(format!(
            "first argument to `append` must be an array, got {}",
            target.type_name()
        ));
    };
    elements.extend(extra.iter().cloned());
    Ok(Value::array(elements))
}

fn collections_keys(_: &dyn Host, args: &[Value]) -> Outcome {
    match args[0].kind() {
        ValueKind::Dict(dict) => Ok(Value::array(dict.read().keys())),
        _ => Err(format!("keys() expects a DICT, got {}", args[0].type_name())),
    }
}

fn collections_values(_: &dyn Host, args: &[Value]) -> Outcome {
    match args[0].kind() {
        ValueKind::Dict(dict) => Ok(Value::array(dict.read().values())),
        _ => Err(format!("values() expects a DICT, got {}", args[0].type_name())),
    }
}

fn collections_has_key(_: &dyn Host, args: &[Value]) -> Outcome {
    let ValueKind::Dict(dict) = args[0].kind() else {
        return Err(format!("has_key() expects a DICT, got {}", args[0].type_name()));
    };
    if args[1].hash_key().is_none() {
        return Err(format!(
            "argument to `has_key` must be hashable, got {}",
            args[1].type_name()
        ));
    }
    Ok(Value::bool(dict.read().contains(&args[1])))
}

fn convert_string(_: &dyn Host, args: &[Value]) -> Outcome {
    Ok(Value::string(args[0].inspect()))
}

fn convert_int(_: &dyn Host, args: &[Value]) -> Outcome {
    match args[0].kind() {
        ValueKind::Int(n) => Ok(Value::int(*n)),
        ValueKind::Float(n) => Ok(Value::int(n.trunc() as i64)),
        ValueKind::Bool(b) => Ok(Value::int(i64::from(*b))),
        ValueKind::String(text) => {
            let text = text.trim();
            text.parse::<i64>()
                .ok()
                .or_else(|| text.parse::<f64>().ok().map(|n| n.trunc() as i64))
                .map(Value::int)
                .ok_or_else(|| format!("int() cannot convert '{text}' to an integer"))
        }
        _ => Err(format!("int() cannot convert {}", args[0].type_name())),
    }
}

fn convert_float(_: &dyn Host, args: &[Value]) -> Outcome {
    match args[0].kind() {
        ValueKind::Int(n) => Ok(Value::float(*n as f64)),
        ValueKind::Float(n) => Ok(Value::float(*n)),
        ValueKind::Bool(b) => Ok(Value::float(if *b { 1.0 } else { 0.0 })),
        ValueKind::String(text) => text
            .trim()
            .parse::<f64>()
            .map(Value::float)
            .map_err(|_| format!("float() cannot convert '{}' to a float", text.trim())),
        _ => Err(format!("float() cannot convert {}", args[0].type_name())),
    }
}

fn convert_bool(_: &dyn Host, args: &[Value]) -> Outcome {
    Ok(Value::bool(args[0].is_truthy()))
}

fn math_abs(_: &dyn Host, args: &[Value]) -> Outcome {
    match args[0].kind() {
        ValueKind::Int(n) => Ok(Value::int(n.wrapping_abs())),
        ValueKind::Float(n) => Ok(Value::float(n.abs())),
        _ => Err(format!("abs() expects a number, got {}", args[0].type_name())),
    }
}

fn math_sqrt(_: &dyn Host, args: &[Value]) -> Outcome {
    let n = expect_number(&args[0], "sqrt")?;
    if n < 0.0 {
        return Err("sqrt() of a negative number".into());
    }
    Ok(Value::number(n.sqrt()))
}

fn math_pow(_: &dyn Host, args: &[Value]) -> Outcome {
    if let (Some(base), Some(exp)) = (args[0].as_int(), args[1].as_int()) {
        if let Ok(exp) = u32::try_from(exp) {
            return Ok(Value::int(base.wrapping_pow(exp)));
        }
    }
    let base = expect_number(&args[0], "pow")?;
    let exp = expect_number(&args[1], "pow")?;
    Ok(Value::float(base.powf(exp)))
}

fn math_floor(_: &dyn Host, args: &[Value]) -> Outcome {
    Ok(Value::int(expect_number(&args[0], "floor")?.floor() as i64))
}

fn math_ceil(_: &dyn Host, args: &[Value]) -> Outcome {
    Ok(Value::int(expect_number(&args[0], "ceil")?.ceil() as i64))
}

fn math_round(_: &dyn Host, args: &[Value]) -> Outcome {
    Ok(Value::int(expect_number(&args[0], "round")?.round() as i64))
}

/// `min(a, b, ...)` or `min([a, b, ...])`.
fn math_min(_: &dyn Host, args: &[Value]) -> Outcome {
    extreme(args, "min", |candidate, best| candidate < best)
}

fn math_max(_: &dyn Host, args: &[Value]) -> Outcome {
    extreme(args, "max", |candidate, best| candidate > best)
}

fn extreme(args: &[Value], name: &str, better: fn(f64, f64) -> bool) -> Outcome {
    let items = match args {
        [single] => single.array_items().unwrap_or_else(|| vec![single.clone()]),
        _ => args.to_vec(),
    };
    let mut best: Option<(f64, Value)> = None;
    for item in items {
        let n = expect_number(&item, name)?;
        let replace = match &best {
            Some((current, _)) => better(n, *current),
            None => true,
        };
        if replace {
            best = Some((n, item));
        }
    }
    best.map(|(_, item)| item)
        .ok_or_else(|| format!("{name}() expects at least one number"))
}

/// Milliseconds as an integer, or a Duration value.
fn time_sleep(_: &dyn Host, args: &[Value]) -> Outcome {
    let pause = match args[0].kind() {
        ValueKind::Int(ms) => StdDuration::from_millis(u64::try_from(*ms).unwrap_or(0)),
        ValueKind::Duration(delta) => delta.to_std().unwrap_or_default(),
        _ => {
            return Err(format!(
                "argument to `sleep` must be an integer, got {}",
                args[0].type_name()
            ))
        }
    };
    thread::sleep(pause);
    Ok(Value::null())
}

fn time_now(_: &dyn Host, _: &[Value]) -> Outcome {
    Ok(Value::time(Local::now()))
}

fn time_since(_: &dyn Host, args: &[Value]) -> Outcome {
    match args[0].kind() {
        ValueKind::Time(at) => Ok(Value::duration(Local::now().signed_duration_since(*at))),
        _ => Err(format!("since() expects a TIME, got {}", args[0].type_name())),
    }
}

/// `duration(amount, unit)` with unit one of `ns`, `us`, `ms` (default),
/// `s`, `m` or `h`.
fn time_duration(_: &dyn Host, args: &[Value]) -> Outcome {
    ensure_between(args, 1, 2, "duration")?;
    let amount = expect_number(&args[0], "duration")?;
    let unit = match args.get(1) {
        Some(unit) => expect_string(unit, "duration")?,
        None => "ms",
    };
    let nanos_per_unit = match unit {
        "ns" => 1.0,
        "us" => 1e3,
        "ms" => 1e6,
        "s" => 1e9,
        "m" => 60e9,
        "h" => 3600e9,
        other => return Err(format!("duration() got an unknown unit '{other}'")),
    };
    Ok(Value::duration(TimeDelta::nanoseconds(
        (amount * nanos_per_unit) as i64,
    )))
}

fn channel_send(_: &dyn Host, args: &[Value]) -> Outcome {
    call_channel(&args[0], "send", &args[1..])
}

fn channel_receive(_: &dyn Host, args: &[Value]) -> Outcome {
    call_channel(&args[0], "receive", &[])
}

fn channel_close(_: &dyn Host, args: &[Value]) -> Outcome {
    call_channel(&args[0], "close", &[])
}

fn strings_join(host: &dyn Host, args: &[Value]) -> Outcome {
    let glue = expect_string(&args[1], "join")?;
    if args[0].array_items().is_none() {
        return Err(format!("join() expects an ARRAY, got {}", args[0].type_name()));
    }
    let result = methods::call_method(host, &args[0], "join", &[Value::string(glue)]);
    match result.error_message() {
        Some(message) => Err(message.to_string()),
        None => Ok(result),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::Output;

    struct Quiet(Output);

    impl Host for Quiet {
        fn call(&self, _: &Value, _: Vec<Value>) -> Value {
            Value::null()
        }

        fn output(&self) -> &Output {
            &self.0
        }
    }

    fn call(name: &str, args: &[Value]) -> Value {
        let host = Quiet(Output::Buffer(Default::default()));
        match builtins().get(name).map(Value::kind) {
            Some(ValueKind::Builtin(builtin)) => builtin.call(&host, args),
            _ => panic!("missing builtin {name}"),
        }
    }

    #[test]
    fn range_is_end_exclusive() {
        assert_eq!(call("range", &[Value::int(3)]).inspect(), "[0, 1, 2]");
        assert_eq!(
            call("range", &[Value::int(5), Value::int(0), Value::int(-2)]).inspect(),
            "[5, 3, 1]"
        );
        assert!(call("range", &[Value::int(0), Value::int(3), Value::int(0)]).is_error());
    }

    #[test]
    fn conversions() {
        assert_eq!(call("int", &[Value::string(" 42 ")]).inspect(), "42");
        assert_eq!(call("float", &[Value::int(2)]).type_name(), "FLOAT");
        assert_eq!(call("string", &[Value::bool(true)]).inspect(), "true");
        assert!(call("int", &[Value::string("forty")]).is_error());
    }

    #[test]
    fn min_and_max_accept_arrays() {
        let list = Value::array(vec![Value::int(4), Value::float(1.5), Value::int(9)]);
        assert_eq!(call("min", &[list.clone()]).inspect(), "1.5");
        assert_eq!(call("max", &[list]).inspect(), "9");
    }

    #[test]
    fn arity_is_enforced_by_the_registry() {
        assert_eq!(
            call("len", &[]).error_message(),
            Some("function `len` expected 1 arguments but received 0")
        );
    }

    #[test]
    fn module_mapper_exposes_builtin_modules() {
        let mapper = modules();
        assert_eq!(mapper.keys().copied().collect::<Vec<_>>(), ["math", "time", "strings"]);
    }
}
