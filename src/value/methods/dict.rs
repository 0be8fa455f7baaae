use super::{arity, arity_between, callable_arg, invoke, unknown, MethodResult};
use crate::value::{Dict, Host, Value, ValueKind};

pub(super) fn call(host: &dyn Host, target: &Value, name: &str, args: &[Value]) -> MethodResult {
    let ValueKind::Dict(cell) = target.kind() else {
        return Err(unknown(name, "dicts"));
    };
    let snapshot = cell.read().clone();
    match name {
        "keys" => {
            arity(name, args, 0)?;
            Ok(Value::array(snapshot.keys()))
        }
        "values" => {
            arity(name, args, 0)?;
            Ok(Value::array(snapshot.values()))
        }
        "size" => {
            arity(name, args, 0)?;
            Ok(Value::int(snapshot.len() as i64))
        }
        "isEmpty" => {
            arity(name, args, 0)?;
            Ok(Value::bool(snapshot.is_empty()))
        }
        "has" => {
            arity(name, args, 1)?;
            Ok(Value::bool(snapshot.contains(&args[0])))
        }
        "get" => {
            arity_between(name, args, 1, 2)?;
            require_hashable(&args[0])?;
            Ok(snapshot
                .get(&args[0])
                .or_else(|| args.get(1).cloned())
                .unwrap_or_else(Value::null))
        }
        "set" => {
            arity(name, args, 2)?;
            cell.write().insert(args[0].clone(), args[1].clone())?;
            Ok(target.clone())
        }
        "remove" => {
            arity(name, args, 1)?;
            require_hashable(&args[0])?;
            Ok(cell.write().remove(&args[0]).unwrap_or_else(Value::null))
        }
        "clear" => {
            arity(name, args, 0)?;
            cell.write().clear();
            Ok(target.clone())
        }
        "merge" => {
            arity(name, args, 1)?;
            let ValueKind::Dict(other) = args[0].kind() else {
                return Err(format!("merge() expects a DICT, got {}", args[0].type_name()));
            };
            let other = other.read().clone();
            cell.write().merge(&other);
            Ok(target.clone())
        }
        "copy" => {
            arity(name, args, 0)?;
            Ok(Value::dict(snapshot))
        }
        "entries" => {
            arity(name, args, 0)?;
            Ok(Value::array(
                snapshot
                    .iter()
                    .map(|pair| Value::array(vec![pair.key.clone(), pair.value.clone()]))
                    .collect(),
            ))
        }
        "pick" | "omit" => {
            let keep = name == "pick";
            let mut picked = Dict::new();
            for pair in snapshot.iter() {
                let listed = args.iter().any(|key| key.same_rendering(&pair.key));
                if listed == keep {
                    picked.insert(pair.key.clone(), pair.value.clone())?;
                }
            }
            Ok(Value::dict(picked))
        }
        "filter" => {
            arity(name, args, 1)?;
            let function = callable_arg(name, args, 0)?;
            let mut kept = Dict::new();
            for pair in snapshot.iter() {
                let verdict = invoke(host, function, vec![pair.key.clone(), pair.value.clone()])?;
                if verdict.is_truthy() {
                    kept.insert(pair.key.clone(), pair.value.clone())?;
                }
            }
            Ok(Value::dict(kept))
        }
        "map" => {
            arity(name, args, 1)?;
            let function = callable_arg(name, args, 0)?;
            let mut mapped = Dict::new();
            for pair in snapshot.iter() {
                let value = invoke(host, function, vec![pair.key.clone(), pair.value.clone()])?;
                mapped.insert(pair.key.clone(), value)?;
            }
            Ok(Value::dict(mapped))
        }
        "forEach" => {
            arity(name, args, 1)?;
            let function = callable_arg(name, args, 0)?;
            for pair in snapshot.iter() {
                invoke(host, function, vec![pair.key.clone(), pair.value.clone()])?;
            }
            Ok(Value::null())
        }
        _ => Err(unknown(name, "dicts")),
    }
}

fn require_hashable(key: &Value) -> Result<(), String> {
    match key.hash_key() {
        Some(_) => Ok(()),
        None => Err(format!("unusable as dict key: {}", key.type_name())),
    }
}
