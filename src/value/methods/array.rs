use std::cmp::Ordering;

use super::{
    arity, arity_between, callable_arg, int_arg, invoke, str_arg, unknown, MethodResult,
};
use crate::value::{Host, Value, ValueKind};

pub(super) fn call(host: &dyn Host, target: &Value, name: &str, args: &[Value]) -> MethodResult {
    // Arms that run callbacks work from a snapshot, since the callback may
    // touch the same array; the rest read or write under the lock.
    let snapshot = || target.array_items().unwrap_or_default();
    match name {
        "length" => {
            arity(name, args, 0)?;
            Ok(Value::int(with_items(target, |items| items.len()) as i64))
        }
        "isEmpty" => {
            arity(name, args, 0)?;
            Ok(Value::bool(with_items(target, <[Value]>::is_empty)))
        }
        "push" => {
            if let Some(mut elements) = target.array_guard_mut() {
                elements.extend(args.iter().cloned());
            }
            Ok(target.clone())
        }
        "pop" => {
            arity(name, args, 0)?;
            Ok(target
                .array_guard_mut()
                .and_then(|mut elements| elements.pop())
                .unwrap_or_else(Value::null))
        }
        "shift" => {
            arity(name, args, 0)?;
            let first = target.array_guard_mut().and_then(|mut elements| {
                if elements.is_empty() {
                    None
                } else {
                    Some(elements.remove(0))
                }
            });
            Ok(first.unwrap_or_else(Value::null))
        }
        "unshift" => {
            if args.is_empty() {
                return Err("unshift() expects at least 1 argument, got 0".into());
            }
            if let Some(mut elements) = target.array_guard_mut() {
                elements.splice(0..0, args.iter().cloned());
            }
            Ok(target.clone())
        }
        "first" => {
            arity(name, args, 0)?;
            Ok(with_items(target, |items| items.first().cloned()).unwrap_or_else(Value::null))
        }
        "last" => {
            arity(name, args, 0)?;
            Ok(with_items(target, |items| items.last().cloned()).unwrap_or_else(Value::null))
        }
        "join" => {
            arity_between(name, args, 0, 1)?;
            let glue = if args.is_empty() {
                ""
            } else {
                str_arg(name, args, 0)?
            };
            let parts: Vec<String> =
                with_items(target, |items| items.iter().map(Value::inspect).collect());
            Ok(Value::string(parts.join(glue)))
        }
        "reverse" => {
            arity(name, args, 0)?;
            if let Some(mut elements) = target.array_guard_mut() {
                elements.reverse();
            }
            Ok(target.clone())
        }
        "sort" => {
            arity_between(name, args, 0, 1)?;
            let sorted = match args.first() {
                Some(comparator) => sort_with(host, snapshot(), comparator)?,
                None => sort_natural(snapshot())?,
            };
            if let Some(mut elements) = target.array_guard_mut() {
                *elements = sorted;
            }
            Ok(target.clone())
        }
        "map" => {
            arity(name, args, 1)?;
            let function = callable_arg(name, args, 0)?;
            let mapped = snapshot()
                .into_iter()
                .map(|item| invoke(host, function, vec![item]))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(Value::array(mapped))
        }
        "filter" => {
            arity(name, args, 1)?;
            let mut kept = Vec::new();
            for item in snapshot() {
                if matches(host, &args[0], &item)? {
                    kept.push(item);
                }
            }
            Ok(Value::array(kept))
        }
        "find" => {
            arity(name, args, 1)?;
            for item in snapshot() {
                if matches(host, &args[0], &item)? {
                    return Ok(item);
                }
            }
            Ok(Value::null())
        }
        "every" => {
            arity(name, args, 1)?;
            let function = callable_arg(name, args, 0)?;
            for item in snapshot() {
                if !invoke(host, function, vec![item])?.is_truthy() {
                    return Ok(Value::bool(false));
                }
            }
            Ok(Value::bool(true))
        }
        "some" => {
            arity(name, args, 1)?;
            let function = callable_arg(name, args, 0)?;
            for item in snapshot() {
                if invoke(host, function, vec![item])?.is_truthy() {
                    return Ok(Value::bool(true));
                }
            }
            Ok(Value::bool(false))
        }
        "reduce" => {
            arity_between(name, args, 1, 2)?;
            let function = callable_arg(name, args, 0)?;
            let mut rest = snapshot().into_iter();
            let mut accumulator = match args.get(1) {
                Some(initial) => initial.clone(),
                None => match rest.next() {
                    Some(first) => first,
                    None => return Err("reduce() of empty array with no initial value".into()),
                },
            };
            for item in rest {
                accumulator = invoke(host, function, vec![accumulator, item])?;
            }
            Ok(accumulator)
        }
        "includes" => {
            arity(name, args, 1)?;
            Ok(Value::bool(with_items(target, |items| {
                items.iter().any(|item| item.same_rendering(&args[0]))
            })))
        }
        "indexOf" => {
            arity(name, args, 1)?;
            let index = with_items(target, |items| {
                items.iter().position(|item| item.same_rendering(&args[0]))
            });
            Ok(Value::int(index.map_or(-1, |idx| idx as i64)))
        }
        "lastIndexOf" => {
            arity(name, args, 1)?;
            let index = with_items(target, |items| {
                items.iter().rposition(|item| item.same_rendering(&args[0]))
            });
            Ok(Value::int(index.map_or(-1, |idx| idx as i64)))
        }
        "slice" => {
            arity_between(name, args, 1, 2)?;
            let from = int_arg(name, args, 0)?;
            let to = match args.get(1) {
                Some(_) => Some(int_arg(name, args, 1)?),
                None => None,
            };
            let sliced = with_items(target, |items| {
                let len = items.len() as i64;
                let start = clamp_index(from, len);
                let end = to.map_or(len as usize, |to| clamp_index(to, len));
                items.get(start..end.max(start)).unwrap_or(&[]).to_vec()
            });
            Ok(Value::array(sliced))
        }
        "concat" => {
            let mut joined = snapshot();
            for (idx, arg) in args.iter().enumerate() {
                match arg.array_items() {
                    Some(more) => joined.extend(more),
                    None => {
                        return Err(format!(
                            "concat() expects arrays, got {} as argument {}",
                            arg.type_name(),
                            idx + 1
                        ))
                    }
                }
            }
            Ok(Value::array(joined))
        }
        "flatten" => {
            arity_between(name, args, 0, 1)?;
            let depth = if args.is_empty() {
                1
            } else {
                int_arg(name, args, 0)?
            };
            Ok(Value::array(flatten(snapshot(), depth)))
        }
        "unique" => {
            arity(name, args, 0)?;
            let mut seen: Vec<Value> = Vec::new();
            for item in snapshot() {
                if !seen.iter().any(|kept| kept.same_rendering(&item)) {
                    seen.push(item);
                }
            }
            Ok(Value::array(seen))
        }
        "sum" => {
            arity(name, args, 0)?;
            with_items(target, |items| sum(name, items))
        }
        "average" => {
            arity(name, args, 0)?;
            with_items(target, |items| {
                if items.is_empty() {
                    return Ok(Value::int(0));
                }
                let total = sum(name, items)?.as_f64().unwrap_or_default();
                Ok(Value::float(total / items.len() as f64))
            })
        }
        "min" | "max" => {
            arity(name, args, 0)?;
            let mut best: Option<(f64, Value)> = None;
            for item in snapshot() {
                let n = item
                    .as_f64()
                    .ok_or_else(|| format!("{name}() only supports numeric arrays"))?;
                let better = match &best {
                    None => true,
                    Some((current, _)) if name == "min" => n < *current,
                    Some((current, _)) => n > *current,
                };
                if better {
                    best = Some((n, item));
                }
            }
            Ok(best.map(|(_, item)| item).unwrap_or_else(Value::null))
        }
        _ => Err(unknown(name, "arrays")),
    }
}

/// Runs `f` over the elements under the read lock; non-arrays read as empty.
fn with_items<R>(target: &Value, f: impl FnOnce(&[Value]) -> R) -> R {
    match target.array_guard() {
        Some(items) => f(&items),
        None => f(&[]),
    }
}

/// A callable predicate is invoked; any other value is compared by rendering.
fn matches(host: &dyn Host, probe: &Value, item: &Value) -> Result<bool, String> {
    if probe.is_callable() {
        Ok(invoke(host, probe, vec![item.clone()])?.is_truthy())
    } else {
        Ok(item.same_rendering(probe))
    }
}

fn clamp_index(index: i64, len: i64) -> usize {
    let index = if index < 0 { len + index } else { index };
    index.clamp(0, len) as usize
}

fn flatten(items: Vec<Value>, depth: i64) -> Vec<Value> {
    if depth == 0 {
        return items;
    }
    let mut out = Vec::new();
    for item in items {
        match item.array_items() {
            Some(inner) => out.extend(flatten(inner, depth - 1)),
            None => out.push(item),
        }
    }
    out
}

fn sum(name: &str, items: &[Value]) -> MethodResult {
    let mut int_total: i64 = 0;
    let mut float_total = 0.0;
    let mut saw_float = false;
    for item in items {
        match item.kind() {
            ValueKind::Int(n) => int_total = int_total.wrapping_add(*n),
            ValueKind::Float(n) => {
                float_total += n;
                saw_float = true;
            }
            _ => return Err(format!("{name}() only supports numeric arrays")),
        }
    }
    if saw_float {
        Ok(Value::float(float_total + int_total as f64))
    } else {
        Ok(Value::int(int_total))
    }
}

fn sort_natural(mut items: Vec<Value>) -> Result<Vec<Value>, String> {
    const UNSUPPORTED: &str = "sort() only supports arrays of integers, floats, or strings";
    if items.iter().all(|item| item.as_f64().is_some()) {
        items.sort_by(|a, b| {
            let (a, b) = (a.as_f64().unwrap_or_default(), b.as_f64().unwrap_or_default());
            a.partial_cmp(&b).unwrap_or(Ordering::Equal)
        });
        Ok(items)
    } else if items.iter().all(|item| item.as_str().is_some()) {
        items.sort_by(|a, b| a.as_str().cmp(&b.as_str()));
        Ok(items)
    } else {
        Err(UNSUPPORTED.into())
    }
}

/// `comparator(a, b)` returns a negative, zero or positive number.
fn sort_with(host: &dyn Host, items: Vec<Value>, comparator: &Value) -> Result<Vec<Value>, String> {
    let mut sorted: Vec<Value> = Vec::with_capacity(items.len());
    for item in items {
        let mut position = sorted.len();
        for (idx, existing) in sorted.iter().enumerate() {
            let order = invoke(host, comparator, vec![item.clone(), existing.clone()])?;
            if order.as_f64().is_some_and(|n| n < 0.0) {
                position = idx;
                break;
            }
        }
        sorted.insert(position, item);
    }
    Ok(sorted)
}
