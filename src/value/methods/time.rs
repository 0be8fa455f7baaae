use chrono::{DateTime, Datelike, Local, TimeDelta, Timelike};

use super::{arity, num_arg, str_arg, unknown, MethodResult};
use crate::value::{format_duration, Value, ValueKind};

pub(super) fn call_duration(delta: TimeDelta, name: &str, args: &[Value]) -> MethodResult {
    let seconds = delta.num_nanoseconds().unwrap_or(i64::MAX) as f64 / 1e9;
    match name {
        "hours" => {
            arity(name, args, 0)?;
            Ok(Value::float(seconds / 3600.0))
        }
        "minutes" => {
            arity(name, args, 0)?;
            Ok(Value::float(seconds / 60.0))
        }
        "seconds" => {
            arity(name, args, 0)?;
            Ok(Value::float(seconds))
        }
        "milliseconds" => {
            arity(name, args, 0)?;
            Ok(Value::int(delta.num_milliseconds()))
        }
        "nanoseconds" => {
            arity(name, args, 0)?;
            Ok(Value::int(delta.num_nanoseconds().unwrap_or(i64::MAX)))
        }
        "string" => {
            arity(name, args, 0)?;
            Ok(Value::string(format_duration(delta)))
        }
        "add" | "subtract" => {
            arity(name, args, 1)?;
            let other = duration_arg(name, &args[0])?;
            let result = if name == "add" {
                delta.checked_add(&other)
            } else {
                delta.checked_sub(&other)
            };
            result
                .map(Value::duration)
                .ok_or_else(|| format!("{name}() overflowed the duration range"))
        }
        "multiply" | "divide" => {
            arity(name, args, 1)?;
            let factor = num_arg(name, args, 0)?;
            if name == "divide" && factor == 0.0 {
                return Err("divide() by zero".into());
            }
            let nanos = delta.num_nanoseconds().unwrap_or(i64::MAX) as f64;
            let scaled = if name == "multiply" {
                nanos * factor
            } else {
                nanos / factor
            };
            Ok(Value::duration(TimeDelta::nanoseconds(scaled as i64)))
        }
        _ => Err(unknown(name, "durations")),
    }
}

pub(super) fn call_time(at: DateTime<Local>, name: &str, args: &[Value]) -> MethodResult {
    match name {
        "year" => {
            arity(name, args, 0)?;
            Ok(Value::int(i64::from(at.year())))
        }
        "month" => {
            arity(name, args, 0)?;
            Ok(Value::int(i64::from(at.month())))
        }
        "day" => {
            arity(name, args, 0)?;
            Ok(Value::int(i64::from(at.day())))
        }
        "hour" => {
            arity(name, args, 0)?;
            Ok(Value::int(i64::from(at.hour())))
        }
        "minute" => {
            arity(name, args, 0)?;
            Ok(Value::int(i64::from(at.minute())))
        }
        "second" => {
            arity(name, args, 0)?;
            Ok(Value::int(i64::from(at.second())))
        }
        "weekday" => {
            arity(name, args, 0)?;
            Ok(Value::string(at.format("%A").to_string()))
        }
        "timestamp" => {
            arity(name, args, 0)?;
            Ok(Value::int(at.timestamp()))
        }
        "format" => {
            arity(name, args, 1)?;
            let layout = str_arg(name, args, 0)?;
            let items: Vec<_> = chrono::format::StrftimeItems::new(layout).collect();
            if items.iter().any(|item| matches!(item, chrono::format::Item::Error)) {
                return Err(format!("format() got an invalid layout '{layout}'"));
            }
            Ok(Value::string(at.format_with_items(items.iter()).to_string()))
        }
        "add" => {
            arity(name, args, 1)?;
            let delta = duration_arg(name, &args[0])?;
            at.checked_add_signed(delta)
                .map(Value::time)
                .ok_or_else(|| "add() moved the time out of range".to_string())
        }
        "since" => {
            arity(name, args, 1)?;
            let ValueKind::Time(earlier) = args[0].kind() else {
                return Err(format!("since() expects a TIME, got {}", args[0].type_name()));
            };
            Ok(Value::duration(at.signed_duration_since(*earlier)))
        }
        _ => Err(unknown(name, "times")),
    }
}

/// A Duration value, or a dict of `days`/`hours`/`minutes`/`seconds` amounts.
fn duration_arg(name: &str, value: &Value) -> Result<TimeDelta, String> {
    match value.kind() {
        ValueKind::Duration(delta) => Ok(*delta),
        ValueKind::Dict(dict) => {
            let mut total = TimeDelta::zero();
            for pair in dict.read().iter() {
                let amount = pair
                    .value
                    .as_f64()
                    .ok_or_else(|| format!("{name}() amounts must be numbers"))?;
                let unit_seconds = match pair.key.as_str() {
                    Some("days") => 86_400.0,
                    Some("hours") => 3_600.0,
                    Some("minutes") => 60.0,
                    Some("seconds") => 1.0,
                    _ => return Err(format!("{name}() got an unknown unit '{}'", pair.key)),
                };
                total = total + TimeDelta::nanoseconds((amount * unit_seconds * 1e9) as i64);
            }
            Ok(total)
        }
        _ => Err(format!(
            "{name}() expects a DURATION, got {}",
            value.type_name()
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn durations_add_and_scale() {
        let sum = call_duration(
            TimeDelta::seconds(90),
            "add",
            &[Value::duration(TimeDelta::seconds(30))],
        )
        .expect("add");
        assert_eq!(sum.inspect(), "2m0s");
        let half = call_duration(TimeDelta::seconds(2), "divide", &[Value::int(4)]).expect("divide");
        assert_eq!(half.inspect(), "500ms");
    }

    #[test]
    fn time_accepts_unit_dicts() {
        let start = Local::now();
        let mut units = crate::value::Dict::new();
        units.insert_str("hours", Value::int(2));
        let later = call_time(start, "add", &[Value::dict(units)]).expect("add");
        let ValueKind::Time(later) = later.kind() else {
            panic!("add() should return a TIME");
        };
        let elapsed = call_time(*later, "since", &[Value::time(start)]).expect("since");
        assert_eq!(elapsed.inspect(), "2h0m0s");
    }
}
