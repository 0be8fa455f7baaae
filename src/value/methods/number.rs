use super::{arity, arity_between, int_arg, num_arg, unknown, MethodResult};
use crate::value::Value;

pub(super) fn call_int(n: i64, name: &str, args: &[Value]) -> MethodResult {
    match name {
        "abs" => {
            arity(name, args, 0)?;
            Ok(Value::int(n.wrapping_abs()))
        }
        "is_even" => {
            arity(name, args, 0)?;
            Ok(Value::bool(n % 2 == 0))
        }
        "is_odd" => {
            arity(name, args, 0)?;
            Ok(Value::bool(n % 2 != 0))
        }
        "to_string" => {
            arity(name, args, 0)?;
            Ok(Value::string(n.to_string()))
        }
        "to_float" => {
            arity(name, args, 0)?;
            Ok(Value::float(n as f64))
        }
        "sign" => {
            arity(name, args, 0)?;
            Ok(Value::int(n.signum()))
        }
        "pow" => {
            arity(name, args, 1)?;
            match args[0].as_int() {
                Some(exp) if exp >= 0 => Ok(Value::int(n.wrapping_pow(exp.min(u32::MAX as i64) as u32))),
                _ => Ok(Value::float((n as f64).powf(num_arg(name, args, 0)?))),
            }
        }
        "clamp" => {
            arity(name, args, 2)?;
            let low = int_arg(name, args, 0)?;
            let high = int_arg(name, args, 1)?;
            if low > high {
                return Err(format!("clamp() lower bound {low} exceeds upper bound {high}"));
            }
            Ok(Value::int(n.clamp(low, high)))
        }
        _ => Err(unknown(name, "integers")),
    }
}

pub(super) fn call_float(x: f64, name: &str, args: &[Value]) -> MethodResult {
    match name {
        "abs" => {
            arity(name, args, 0)?;
            Ok(Value::float(x.abs()))
        }
        "ceil" => {
            arity(name, args, 0)?;
            Ok(Value::int(x.ceil() as i64))
        }
        "floor" => {
            arity(name, args, 0)?;
            Ok(Value::int(x.floor() as i64))
        }
        "round" => {
            arity_between(name, args, 0, 1)?;
            if args.is_empty() {
                return Ok(Value::float(x.round()));
            }
            let digits = int_arg(name, args, 0)?.clamp(0, 15) as i32;
            let scale = 10f64.powi(digits);
            Ok(Value::float((x * scale).round() / scale))
        }
        "sqrt" => {
            arity(name, args, 0)?;
            if x < 0.0 {
                return Err("sqrt() of a negative number".into());
            }
            Ok(Value::float(x.sqrt()))
        }
        "pow" => {
            arity(name, args, 1)?;
            Ok(Value::float(x.powf(num_arg(name, args, 0)?)))
        }
        "is_nan" => {
            arity(name, args, 0)?;
            Ok(Value::bool(x.is_nan()))
        }
        "is_infinite" => {
            arity(name, args, 0)?;
            Ok(Value::bool(x.is_infinite()))
        }
        "to_string" => {
            arity(name, args, 0)?;
            Ok(Value::string(x.to_string()))
        }
        "to_int" => {
            arity(name, args, 0)?;
            Ok(Value::int(x.trunc() as i64))
        }
        "sign" => {
            arity(name, args, 0)?;
            if x.is_nan() {
                return Ok(Value::float(f64::NAN));
            }
            let sign = if x > 0.0 {
                1.0
            } else if x < 0.0 {
                -1.0
            } else {
                0.0
            };
            Ok(Value::float(sign))
        }
        _ => Err(unknown(name, "floats")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_pow_stays_integral() {
        let result = call_int(2, "pow", &[Value::int(10)]).expect("pow");
        assert_eq!(result.type_name(), "INTEGER");
        assert_eq!(result.inspect(), "1024");
    }

    #[test]
    fn float_rounding_to_digits() {
        let result = call_float(3.14159, "round", &[Value::int(2)]).expect("round");
        assert_eq!(result.inspect(), "3.14");
    }

    #[test]
    fn arity_is_checked() {
        assert_eq!(
            call_int(1, "abs", &[Value::int(1)]).map(|v| v.inspect()),
            Err("abs() expects 0 arguments, got 1".into())
        );
    }
}
