use super::{arity, unknown, MethodResult};
use crate::value::{Value, ValueKind};

pub(super) fn call(b: bool, name: &str, args: &[Value]) -> MethodResult {
    match name {
        "to_string" => {
            arity(name, args, 0)?;
            Ok(Value::string(b.to_string()))
        }
        "to_int" => {
            arity(name, args, 0)?;
            Ok(Value::int(i64::from(b)))
        }
        "negate" => {
            arity(name, args, 0)?;
            Ok(Value::bool(!b))
        }
        "and" | "or" | "xor" => {
            arity(name, args, 1)?;
            let ValueKind::Bool(other) = args[0].kind() else {
                return Err(format!(
                    "{name}() expects a BOOLEAN, got {}",
                    args[0].type_name()
                ));
            };
            let result = match name {
                "and" => b && *other,
                "or" => b || *other,
                _ => b ^ *other,
            };
            Ok(Value::bool(result))
        }
        _ => Err(unknown(name, "booleans")),
    }
}

pub(super) fn call_null(name: &str, args: &[Value]) -> MethodResult {
    match name {
        "isNull" => {
            arity(name, args, 0)?;
            Ok(Value::bool(true))
        }
        "coalesce" => Ok(args
            .iter()
            .find(|arg| !arg.is_null())
            .cloned()
            .unwrap_or_else(Value::null)),
        "toString" => {
            arity(name, args, 0)?;
            Ok(Value::string("null"))
        }
        _ => Err(unknown(name, "null")),
    }
}
