use super::{arity, arity_between, int_arg, str_arg, unknown, MethodResult};
use crate::value::Value;

pub(super) fn call(text: &str, name: &str, args: &[Value]) -> MethodResult {
    match name {
        "len" => {
            arity(name, args, 0)?;
            Ok(Value::int(text.chars().count() as i64))
        }
        "upper" => {
            arity(name, args, 0)?;
            Ok(Value::string(text.to_uppercase()))
        }
        "lower" => {
            arity(name, args, 0)?;
            Ok(Value::string(text.to_lowercase()))
        }
        "trim" => {
            arity(name, args, 0)?;
            Ok(Value::string(text.trim()))
        }
        "split" => {
            arity_between(name, args, 0, 1)?;
            let separator = if args.is_empty() {
                " "
            } else {
                str_arg(name, args, 0)?
            };
            let parts: Vec<Value> = if separator.is_empty() {
                text.chars().map(|ch| Value::string(ch.to_string())).collect()
            } else {
                text.split(separator).map(Value::string).collect()
            };
            Ok(Value::array(parts))
        }
        "replace" => {
            arity(name, args, 2)?;
            let from = str_arg(name, args, 0)?;
            let to = str_arg(name, args, 1)?;
            Ok(Value::string(text.replace(from, to)))
        }
        "contains" => {
            arity(name, args, 1)?;
            Ok(Value::bool(text.contains(str_arg(name, args, 0)?)))
        }
        "startsWith" => {
            arity(name, args, 1)?;
            Ok(Value::bool(text.starts_with(str_arg(name, args, 0)?)))
        }
        "endsWith" => {
            arity(name, args, 1)?;
            Ok(Value::bool(text.ends_with(str_arg(name, args, 0)?)))
        }
        "indexOf" => {
            arity(name, args, 1)?;
            let needle = str_arg(name, args, 0)?;
            let index = text
                .find(needle)
                .map_or(-1, |byte| text[..byte].chars().count() as i64);
            Ok(Value::int(index))
        }
        "reverse" => {
            arity(name, args, 0)?;
            Ok(Value::string(text.chars().rev().collect::<String>()))
        }
        "repeat" => {
            arity(name, args, 1)?;
            let count = int_arg(name, args, 0)?;
            Ok(Value::string(text.repeat(count.max(0) as usize)))
        }
        "chars" => {
            arity(name, args, 0)?;
            Ok(Value::array(
                text.chars().map(|ch| Value::string(ch.to_string())).collect(),
            ))
        }
        "format" => format(text, args).map(Value::string),
        "toInt" => {
            arity(name, args, 0)?;
            text.trim()
                .parse::<i64>()
                .map(Value::int)
                .map_err(|_| format!("cannot convert '{text}' to INTEGER"))
        }
        "toFloat" => {
            arity(name, args, 0)?;
            text.trim()
                .parse::<f64>()
                .map(Value::float)
                .map_err(|_| format!("cannot convert '{text}' to FLOAT"))
        }
        _ => Err(unknown(name, "strings")),
    }
}

/// Replaces `{0}`, `{1}`, ... with the rendered arguments. `\{` and `\}` are
/// literal braces. Every argument must be used.
pub(crate) fn format(template: &str, args: &[Value]) -> Result<String, String> {
    let mut out = String::new();
    let mut placeholder = String::new();
    let mut in_placeholder = false;
    let mut escaped = false;
    let mut used = vec![false; args.len()];

    for ch in template.chars() {
        if !escaped && ch == '\\' {
            escaped = true;
            continue;
        }
        if ch == '{' && !escaped {
            in_placeholder = true;
            continue;
        }
        if escaped {
            if ch != '{' && ch != '}' {
                out.push('\\');
            }
            escaped = false;
        }
        if in_placeholder && ch == '}' {
            let index: usize = placeholder
                .trim()
                .parse()
                .map_err(|_| format!("invalid placeholder: `{placeholder}` is not a number"))?;
            let value = args.get(index).ok_or_else(|| {
                format!(
                    "placeholder index {index} exceeds available arguments ({})",
                    args.len()
                )
            })?;
            out.push_str(&value.inspect());
            used[index] = true;
            placeholder.clear();
            in_placeholder = false;
            continue;
        }
        if in_placeholder {
            placeholder.push(ch);
        } else {
            out.push(ch);
        }
    }

    if in_placeholder {
        return Err(format!("unmatched '{{' detected: `{placeholder}`"));
    }
    if let Some(idx) = used.iter().position(|used| !used) {
        return Err(format!(
            "argument at index {idx} ({}) was provided but not used",
            args[idx]
        ));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_fills_placeholders_by_index() {
        let args = [Value::string("vint"), Value::int(2)];
        assert_eq!(format("{1} {0}", &args), Ok("2 vint".into()));
    }

    #[test]
    fn format_rejects_unused_arguments() {
        let args = [Value::int(1), Value::int(2)];
        assert_eq!(
            format("{0}", &args),
            Err("argument at index 1 (2) was provided but not used".into())
        );
    }

    #[test]
    fn split_defaults_to_spaces() {
        let parts = call("a b c", "split", &[]).expect("split");
        assert_eq!(parts.inspect(), "[a, b, c]");
    }

    #[test]
    fn unknown_method_is_an_error_message() {
        assert_eq!(
            call("x", "shout", &[]).map(|v| v.inspect()),
            Err("Method 'shout' is not supported on strings".into())
        );
    }
}
