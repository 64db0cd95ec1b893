use super::parser::{BinaryOp, Expr, PathSeg};
use super::truthy;
use crate::error::{WeaveError, WeaveResult};
use crate::scripting::PARAMETER_BINDING;
use serde_json::{Map, Value};
use std::cmp::Ordering;

/// Evaluate a parsed expression against the binding map.
pub fn eval(expr: &Expr, bindings: &Map<String, Value>) -> WeaveResult<Value> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Path(segments) => Ok(resolve_path(segments, bindings)),
        Expr::Not(inner) => Ok(Value::Bool(!truthy(&eval(inner, bindings)?))),
        Expr::Binary(op, left, right) => eval_binary(*op, left, right, bindings),
    }
}

fn eval_binary(
    op: BinaryOp,
    left: &Expr,
    right: &Expr,
    bindings: &Map<String, Value>,
) -> WeaveResult<Value> {
    // Short-circuit the boolean operators before evaluating the right side.
    match op {
        BinaryOp::And => {
            let l = eval(left, bindings)?;
            if !truthy(&l) {
                return Ok(Value::Bool(false));
            }
            return Ok(Value::Bool(truthy(&eval(right, bindings)?)));
        }
        BinaryOp::Or => {
            let l = eval(left, bindings)?;
            if truthy(&l) {
                return Ok(Value::Bool(true));
            }
            return Ok(Value::Bool(truthy(&eval(right, bindings)?)));
        }
        _ => {}
    }

    let l = eval(left, bindings)?;
    let r = eval(right, bindings)?;
    let result = match op {
        BinaryOp::Eq => loose_eq(&l, &r),
        BinaryOp::NotEq => !loose_eq(&l, &r),
        BinaryOp::Lt => compare(&l, &r)? == Ordering::Less,
        BinaryOp::LtEq => compare(&l, &r)? != Ordering::Greater,
        BinaryOp::Gt => compare(&l, &r)? == Ordering::Greater,
        BinaryOp::GtEq => compare(&l, &r)? != Ordering::Less,
        BinaryOp::Add => return add(&l, &r),
        BinaryOp::Sub => return arith(&l, &r, "-", |a, b| a - b),
        BinaryOp::And | BinaryOp::Or => unreachable!("handled above"),
    };
    Ok(Value::Bool(result))
}

/// `+` concatenates when either side is a string, adds otherwise.
fn add(l: &Value, r: &Value) -> WeaveResult<Value> {
    if l.is_string() || r.is_string() {
        let mut out = concat_text(l);
        out.push_str(&concat_text(r));
        return Ok(Value::String(out));
    }
    arith(l, r, "+", |a, b| a + b)
}

fn concat_text(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn arith(l: &Value, r: &Value, op: &str, f: impl Fn(f64, f64) -> f64) -> WeaveResult<Value> {
    match (l.as_f64(), r.as_f64()) {
        (Some(a), Some(b)) => {
            let result = f(a, b);
            // keep integer arithmetic integral
            if result.fract() == 0.0 && result.abs() < i64::MAX as f64 {
                Ok(Value::from(result as i64))
            } else {
                Ok(Value::from(result))
            }
        }
        _ => Err(WeaveError::expression(format!(
            "cannot apply '{op}' to {l} and {r}"
        ))),
    }
}

/// Equality with numeric coercion: `21 == 21.0` holds.
fn loose_eq(l: &Value, r: &Value) -> bool {
    match (l.as_f64(), r.as_f64()) {
        (Some(a), Some(b)) => a == b,
        _ => l == r,
    }
}

/// Ordering for relational operators.
///
/// Numbers compare numerically (null coerces to zero against a number,
/// matching the usual guard idiom `age > 18` when `age` is absent);
/// strings compare lexicographically; anything else is an error.
fn compare(l: &Value, r: &Value) -> WeaveResult<Ordering> {
    let as_num = |v: &Value| -> Option<f64> {
        match v {
            Value::Null => Some(0.0),
            _ => v.as_f64(),
        }
    };
    if l.is_number() || r.is_number() {
        if let (Some(a), Some(b)) = (as_num(l), as_num(r)) {
            return a
                .partial_cmp(&b)
                .ok_or_else(|| WeaveError::expression("NaN is not comparable"));
        }
    }
    if let (Value::String(a), Value::String(b)) = (l, r) {
        return Ok(a.cmp(b));
    }
    Err(WeaveError::expression(format!(
        "cannot order {l} against {r}"
    )))
}

/// Walk a property path. The head segment reads the binding map directly
/// and falls back through the reserved root-parameter slot; missing
/// segments resolve to `Null`.
fn resolve_path(segments: &[PathSeg], bindings: &Map<String, Value>) -> Value {
    let (head, rest) = match segments.split_first() {
        Some(parts) => parts,
        None => return Value::Null,
    };
    let root = match head {
        PathSeg::Key(name) => match bindings.get(name) {
            Some(value) => value,
            None => match bindings.get(PARAMETER_BINDING) {
                Some(Value::Object(param)) => match param.get(name) {
                    Some(value) => value,
                    None => return Value::Null,
                },
                _ => return Value::Null,
            },
        },
        PathSeg::Index(_) => return Value::Null,
    };
    let mut current = root;
    for segment in rest {
        current = match (segment, current) {
            (PathSeg::Key(name), Value::Object(map)) => match map.get(name) {
                Some(value) => value,
                None => return Value::Null,
            },
            (PathSeg::Index(i), Value::Array(items)) => match items.get(*i) {
                Some(value) => value,
                None => return Value::Null,
            },
            _ => return Value::Null,
        };
    }
    current.clone()
}
