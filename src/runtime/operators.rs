use crate::{
    ast::{AssignOp, BinaryOp, Expr, ExprKind, PostfixOp, UnaryOp},
    diagnostics::SourceSpan,
    environment::{Environment, EnvironmentRef},
    value::{Dict, Value, ValueKind},
};

use super::{error_at, Evaluator};

/// Combines two evaluated operands. Both sides are always evaluated first,
/// so `&&`, `||` and `??` never short-circuit.
pub(super) fn infix(op: BinaryOp, left: &Value, right: &Value, span: SourceSpan) -> Value {
    use ValueKind as K;

    match op {
        BinaryOp::In => return membership(left, right, span),
        BinaryOp::Coalesce => {
            return if left.is_null() {
                right.clone()
            } else {
                left.clone()
            }
        }
        BinaryOp::And => return Value::bool(left.is_truthy() && right.is_truthy()),
        BinaryOp::Or => return Value::bool(left.is_truthy() || right.is_truthy()),
        BinaryOp::Range => {
            return match (left.kind(), right.kind()) {
                (K::Int(start), K::Int(end)) => Value::range(*start, *end),
                _ => error_at(
                    span,
                    format!(
                        "range bounds must be integers, got {} and {}",
                        left.type_name(),
                        right.type_name()
                    ),
                ),
            }
        }
        _ => {}
    }

    match (left.kind(), right.kind()) {
        (K::String(a), K::String(b)) => string_infix(op, a, b, span),
        (K::Dict(a), K::Dict(b)) if op == BinaryOp::Add => {
            let mut merged: Dict = a.read().clone();
            merged.merge(&b.read());
            Value::dict(merged)
        }
        (K::Array(a), K::Array(b)) if op == BinaryOp::Add => {
            let mut joined = a.read().clone();
            joined.extend(b.read().iter().cloned());
            Value::array(joined)
        }
        (K::Array(items), K::Int(n)) | (K::Int(n), K::Array(items)) if op == BinaryOp::Mul => {
            let items = items.read();
            let times = usize::try_from(*n).unwrap_or(0);
            let mut repeated = Vec::with_capacity(items.len().saturating_mul(times));
            for _ in 0..times {
                repeated.extend(items.iter().cloned());
            }
            Value::array(repeated)
        }
        (K::String(text), K::Int(n)) | (K::Int(n), K::String(text)) if op == BinaryOp::Mul => {
            Value::string(text.repeat(usize::try_from(*n).unwrap_or(0)))
        }
        (K::Int(a), K::Int(b)) => integer_infix(op, *a, *b, span),
        (K::Float(a), K::Float(b)) => float_infix(op, *a, *b, span),
        (K::Int(a), K::Float(b)) => mixed_infix(op, *a as f64, *b, span),
        (K::Float(a), K::Int(b)) => mixed_infix(op, *a, *b as f64, span),
        _ if op == BinaryOp::Equal => Value::bool(equals(left, right)),
        _ if op == BinaryOp::NotEqual => Value::bool(!equals(left, right)),
        (K::Bool(_), K::Bool(_)) => error_at(
            span,
            format!(
                "Unsupported boolean operation: '{}' operator cannot be used with boolean values",
                op.symbol()
            ),
        ),
        _ if left.type_name() != right.type_name() => error_at(
            span,
            format!(
                "Type mismatch: cannot use '{}' operator between {} and {}. Consider type conversion",
                op.symbol(),
                left.type_name(),
                right.type_name()
            ),
        ),
        _ => error_at(
            span,
            format!(
                "Unsupported operation: '{}' operator is not supported for {} and {} types",
                op.symbol(),
                left.type_name(),
                right.type_name()
            ),
        ),
    }
}

/// Null and booleans compare by value; every other kind by identity.
fn equals(left: &Value, right: &Value) -> bool {
    match (left.kind(), right.kind()) {
        (ValueKind::Null, ValueKind::Null) => true,
        (ValueKind::Bool(a), ValueKind::Bool(b)) => a == b,
        _ => left.ptr_eq(right),
    }
}

fn string_infix(op: BinaryOp, a: &str, b: &str, span: SourceSpan) -> Value {
    match op {
        BinaryOp::Add => Value::string(format!("{a}{b}")),
        BinaryOp::Equal => Value::bool(a == b),
        BinaryOp::NotEqual => Value::bool(a != b),
        BinaryOp::Less => Value::bool(a < b),
        BinaryOp::LessEqual => Value::bool(a <= b),
        BinaryOp::Greater => Value::bool(a > b),
        BinaryOp::GreaterEqual => Value::bool(a >= b),
        _ => error_at(
            span,
            format!(
                "Unsupported string operation: '{}' operator cannot be used with strings",
                op.symbol()
            ),
        ),
    }
}

fn integer_infix(op: BinaryOp, a: i64, b: i64, span: SourceSpan) -> Value {
    match op {
        BinaryOp::Add => Value::int(a.wrapping_add(b)),
        BinaryOp::Sub => Value::int(a.wrapping_sub(b)),
        BinaryOp::Mul => Value::int(a.wrapping_mul(b)),
        BinaryOp::Pow => match u32::try_from(b) {
            Ok(exp) => Value::int(a.wrapping_pow(exp)),
            Err(_) => Value::float((a as f64).powf(b as f64)),
        },
        BinaryOp::Div => {
            if b == 0 {
                return error_at(span, "division by zero");
            }
            if a.wrapping_rem(b) == 0 {
                Value::int(a.wrapping_div(b))
            } else {
                Value::float(a as f64 / b as f64)
            }
        }
        BinaryOp::Mod => {
            if b == 0 {
                return error_at(span, "modulo by zero");
            }
            Value::int(a.wrapping_rem(b))
        }
        BinaryOp::Less => Value::bool(a < b),
        BinaryOp::LessEqual => Value::bool(a <= b),
        BinaryOp::Greater => Value::bool(a > b),
        BinaryOp::GreaterEqual => Value::bool(a >= b),
        BinaryOp::Equal => Value::bool(a == b),
        BinaryOp::NotEqual => Value::bool(a != b),
        _ => error_at(
            span,
            format!(
                "Unsupported integer operation: '{}' operator cannot be used with integer values",
                op.symbol()
            ),
        ),
    }
}

fn float_infix(op: BinaryOp, a: f64, b: f64, span: SourceSpan) -> Value {
    match op {
        BinaryOp::Add => Value::float(a + b),
        BinaryOp::Sub => Value::float(a - b),
        BinaryOp::Mul => Value::float(a * b),
        BinaryOp::Div => Value::float(a / b),
        BinaryOp::Mod => Value::float(a % b),
        BinaryOp::Pow => Value::float(a.powf(b)),
        BinaryOp::Less => Value::bool(a < b),
        BinaryOp::LessEqual => Value::bool(a <= b),
        BinaryOp::Greater => Value::bool(a > b),
        BinaryOp::GreaterEqual => Value::bool(a >= b),
        BinaryOp::Equal => Value::bool(a == b),
        BinaryOp::NotEqual => Value::bool(a != b),
        _ => error_at(
            span,
            format!(
                "Unsupported float operation: '{}' operator cannot be used with floating point numbers",
                op.symbol()
            ),
        ),
    }
}

/// Integer and float operands: arithmetic results collapse back to an
/// integer when they have no fractional part.
fn mixed_infix(op: BinaryOp, a: f64, b: f64, span: SourceSpan) -> Value {
    match op {
        BinaryOp::Add => Value::number(a + b),
        BinaryOp::Sub => Value::number(a - b),
        BinaryOp::Mul => Value::number(a * b),
        BinaryOp::Div => Value::number(a / b),
        BinaryOp::Mod => Value::number(a % b),
        BinaryOp::Pow => Value::number(a.powf(b)),
        BinaryOp::Less => Value::bool(a < b),
        BinaryOp::LessEqual => Value::bool(a <= b),
        BinaryOp::Greater => Value::bool(a > b),
        BinaryOp::GreaterEqual => Value::bool(a >= b),
        BinaryOp::Equal => Value::bool(a == b),
        BinaryOp::NotEqual => Value::bool(a != b),
        _ => error_at(
            span,
            format!(
                "Unsupported numeric operation: '{}' operator cannot be used with mixed numbers",
                op.symbol()
            ),
        ),
    }
}

fn membership(needle: &Value, haystack: &Value, span: SourceSpan) -> Value {
    match haystack.kind() {
        ValueKind::String(text) => match needle.as_str() {
            Some(part) => Value::bool(text.contains(part)),
            None => error_at(
                span,
                format!(
                    "'in' on a STRING expects a STRING, got {}",
                    needle.type_name()
                ),
            ),
        },
        ValueKind::Array(elements) => Value::bool(
            elements
                .read()
                .iter()
                .any(|element| element.same_rendering(needle)),
        ),
        ValueKind::Dict(dict) => Value::bool(dict.read().contains(needle)),
        ValueKind::Range { start, end } => {
            Value::bool(needle.as_int().is_some_and(|n| (*start..=*end).contains(&n)))
        }
        _ => error_at(
            span,
            format!("'in' operator is not supported for {}", haystack.type_name()),
        ),
    }
}

pub(super) fn prefix(op: UnaryOp, value: Value, span: SourceSpan) -> Value {
    match op {
        UnaryOp::Not => Value::bool(!value.is_truthy()),
        UnaryOp::Negate => match value.kind() {
            ValueKind::Int(n) => Value::int(n.wrapping_neg()),
            ValueKind::Float(n) => Value::float(-n),
            _ => error_at(span, format!("Unknown operation: -{}", value.type_name())),
        },
        UnaryOp::Plus => match value.kind() {
            ValueKind::Int(_) | ValueKind::Float(_) => value,
            _ => error_at(span, format!("Unknown operation: +{}", value.type_name())),
        },
        UnaryOp::AddressOf => Value::new(ValueKind::Pointer(value)),
        UnaryOp::Deref => match value.kind() {
            ValueKind::Pointer(inner) => inner.clone(),
            _ => error_at(span, "cannot dereference non-pointer"),
        },
    }
}

/// Maps a possibly negative index onto `0..len`.
fn resolve_index(index: i64, len: usize) -> Option<usize> {
    let len = len as i64;
    let index = if index < 0 { len + index } else { index };
    (0..len).contains(&index).then_some(index as usize)
}

/// Reads `target[index]`. Out-of-range positions and missing keys are null.
pub(super) fn index(target: &Value, index: &Value, span: SourceSpan) -> Value {
    match (target.kind(), index.kind()) {
        (ValueKind::Array(elements), ValueKind::Int(i)) => {
            let elements = elements.read();
            resolve_index(*i, elements.len())
                .and_then(|idx| elements.get(idx).cloned())
                .unwrap_or_else(Value::null)
        }
        (ValueKind::String(text), ValueKind::Int(i)) => {
            let chars: Vec<char> = text.chars().collect();
            resolve_index(*i, chars.len())
                .map(|idx| Value::string(chars[idx].to_string()))
                .unwrap_or_else(Value::null)
        }
        (ValueKind::Dict(dict), _) => {
            if index.hash_key().is_none() {
                return error_at(span, format!("unusable as dict key: {}", index.type_name()));
            }
            dict.read().get(index).unwrap_or_else(Value::null)
        }
        _ => error_at(
            span,
            format!(
                "index operator not supported: {}[{}]",
                target.type_name(),
                index.type_name()
            ),
        ),
    }
}

pub(super) fn slice(
    target: &Value,
    start: Option<&Value>,
    end: Option<&Value>,
    span: SourceSpan,
) -> Value {
    let mut bounds = [None, None];
    for (slot, bound) in bounds.iter_mut().zip([start, end]) {
        if let Some(bound) = bound {
            match bound.as_int() {
                Some(n) => *slot = Some(n),
                None => {
                    return error_at(
                        span,
                        format!("slice bounds must be integers, got {}", bound.type_name()),
                    )
                }
            }
        }
    }
    let [start, end] = bounds;
    match target.kind() {
        ValueKind::Array(elements) => {
            let elements = elements.read();
            let (from, to) = clamp_bounds(start, end, elements.len());
            Value::array(elements[from..to].to_vec())
        }
        ValueKind::String(text) => {
            let chars: Vec<char> = text.chars().collect();
            let (from, to) = clamp_bounds(start, end, chars.len());
            Value::string(chars[from..to].iter().collect::<String>())
        }
        _ => error_at(
            span,
            format!("slice operator not supported: {}", target.type_name()),
        ),
    }
}

fn clamp_bounds(start: Option<i64>, end: Option<i64>, len: usize) -> (usize, usize) {
    let len = len as i64;
    let clamp = |n: i64| (if n < 0 { len + n } else { n }).clamp(0, len) as usize;
    let from = start.map_or(0, clamp);
    let to = end.map_or(len as usize, clamp);
    (from, to.max(from))
}

fn store_index(owner: &Value, index: &Value, value: Value, span: SourceSpan) -> Value {
    match (owner.kind(), index.kind()) {
        (ValueKind::Array(elements), ValueKind::Int(i)) => {
            let mut elements = elements.write();
            match resolve_index(*i, elements.len()) {
                Some(idx) => {
                    elements[idx] = value;
                    Value::null()
                }
                None => error_at(
                    span,
                    format!(
                        "index {i} out of range for array of length {}",
                        elements.len()
                    ),
                ),
            }
        }
        (ValueKind::Dict(dict), _) => match dict.write().insert(index.clone(), value) {
            Ok(()) => Value::null(),
            Err(message) => error_at(span, message),
        },
        _ => error_at(
            span,
            format!(
                "index assignment not supported: {}[{}]",
                owner.type_name(),
                index.type_name()
            ),
        ),
    }
}

impl Evaluator {
    /// `target = value` or a compound form; yields the stored value.
    pub(super) fn eval_assign(
        &self,
        op: AssignOp,
        target: &Expr,
        value: &Expr,
        env: &EnvironmentRef,
        span: SourceSpan,
    ) -> Value {
        let value = match op {
            AssignOp::Assign => propagate!(self.eval_expr(value, env)),
            AssignOp::Compound(binary) => {
                let current = propagate!(self.eval_expr(target, env));
                let operand = propagate!(self.eval_expr(value, env));
                propagate!(infix(binary, &current, &operand, span))
            }
        };
        propagate!(self.store(target, value.clone(), env, span));
        value
    }

    /// `x++` / `x--`; yields the value before the update.
    pub(super) fn eval_postfix(
        &self,
        op: PostfixOp,
        target: &Expr,
        env: &EnvironmentRef,
        span: SourceSpan,
    ) -> Value {
        let current = propagate!(self.eval_expr(target, env));
        let updated = match (op, current.kind()) {
            (PostfixOp::Increment, ValueKind::Int(n)) => Value::int(n.wrapping_add(1)),
            (PostfixOp::Decrement, ValueKind::Int(n)) => Value::int(n.wrapping_sub(1)),
            (PostfixOp::Increment, ValueKind::Float(n)) => Value::float(n + 1.0),
            (PostfixOp::Decrement, ValueKind::Float(n)) => Value::float(n - 1.0),
            _ => {
                let symbol = if op == PostfixOp::Increment { "++" } else { "--" };
                return error_at(
                    span,
                    format!("Unsupported postfix operation: '{symbol}' on {}", current.type_name()),
                );
            }
        };
        propagate!(self.store(target, updated, env, span));
        current
    }

    fn store(&self, target: &Expr, value: Value, env: &EnvironmentRef, span: SourceSpan) -> Value {
        match &target.kind {
            ExprKind::Variable(name) => match Environment::assign(env, name, value) {
                Ok(()) => Value::null(),
                Err(err) => error_at(span, err),
            },
            ExprKind::Index {
                target: owner,
                index,
            } => {
                let owner = propagate!(self.eval_expr(owner, env));
                let index = propagate!(self.eval_expr(index, env));
                store_index(&owner, &index, value, span)
            }
            ExprKind::Property {
                target: owner,
                name,
            } => {
                let owner = propagate!(self.eval_expr(owner, env));
                self.assign_property(&owner, name, value, env, span)
            }
            ExprKind::Unary {
                op: UnaryOp::Deref, ..
            } => error_at(span, "cannot assign through a pointer"),
            ExprKind::Group(inner) => self.store(inner, value, env, span),
            _ => error_at(span, "invalid assignment target"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const AT: SourceSpan = SourceSpan::new(0, 0, 7);

    #[test]
    fn integer_division_demotes_exact_results() {
        assert_eq!(infix(BinaryOp::Div, &Value::int(6), &Value::int(3), AT).type_name(), "INTEGER");
        assert_eq!(infix(BinaryOp::Div, &Value::int(7), &Value::int(2), AT).inspect(), "3.5");
        assert_eq!(
            infix(BinaryOp::Div, &Value::int(1), &Value::int(0), AT).error_message(),
            Some("Line 7: division by zero")
        );
    }

    #[test]
    fn repetition_works_from_either_side() {
        assert_eq!(infix(BinaryOp::Mul, &Value::string("ab"), &Value::int(3), AT).inspect(), "ababab");
        assert_eq!(infix(BinaryOp::Mul, &Value::int(2), &Value::array(vec![Value::int(1)]), AT).inspect(), "[1, 1]");
    }

    #[test]
    fn mismatched_types_are_reported() {
        let result = infix(BinaryOp::Add, &Value::string("a"), &Value::int(1), AT);
        assert_eq!(
            result.error_message(),
            Some("Line 7: Type mismatch: cannot use '+' operator between STRING and INTEGER. Consider type conversion")
        );
    }

    #[test]
    fn equality_is_identity_for_containers() {
        let list = Value::array(vec![]);
        assert_eq!(infix(BinaryOp::Equal, &list, &list.clone(), AT).inspect(), "true");
        assert_eq!(infix(BinaryOp::Equal, &list, &Value::array(vec![]), AT).inspect(), "false");
        assert_eq!(infix(BinaryOp::Equal, &Value::int(1), &Value::string("1"), AT).inspect(), "false");
    }

    #[test]
    fn negative_indices_count_from_the_end() {
        let list = Value::array(vec![Value::int(1), Value::int(2), Value::int(3)]);
        assert_eq!(index(&list, &Value::int(-1), AT).inspect(), "3");
        assert!(index(&list, &Value::int(9), AT).is_null());
        let part = slice(&list, Some(&Value::int(1)), Some(&Value::int(10)), AT);
        assert_eq!(part.inspect(), "[2, 3]");
    }
}
