//! Binary and unary operators over runtime values.
//!
//! A series on either side switches to element-wise evaluation, with scalars
//! broadcast. Element-wise results never fail on bad numbers: division by
//! zero and comparisons against warm-up `NaN` both yield `NaN`. Scalar
//! division by zero is an error.
//!
//! `and`/`or` short-circuit in the evaluator; the scalar cases here only run
//! once both sides are known.

use std::sync::Arc;

use crate::domain::ast::{BinaryOp, UnaryOp};
use crate::domain::value::{check_array_len, render_joined, Value};

/// Tolerance for numeric equality.
pub const EPSILON: f64 = 1e-9;

pub fn evaluate_binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, String> {
    if matches!(left, Value::Series(_)) || matches!(right, Value::Series(_)) {
        return series_binary(op, left, right);
    }

    match op {
        BinaryOp::Add => add(left, right),
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod => {
            let (a, b) = numbers(op, left, right)?;
            if matches!(op, BinaryOp::Div | BinaryOp::Mod) && b == 0.0 {
                return Err(if op == BinaryOp::Div {
                    "Division by zero".to_string()
                } else {
                    "Modulo by zero".to_string()
                });
            }
            Ok(Value::Number(arith(op, a, b)))
        }
        BinaryOp::Eq => Ok(Value::Bool(values_equal(left, right))),
        BinaryOp::NotEq => Ok(Value::Bool(!values_equal(left, right))),
        BinaryOp::Lt | BinaryOp::LtEq | BinaryOp::Gt | BinaryOp::GtEq => compare(op, left, right),
        BinaryOp::And => Ok(Value::Bool(left.truthy(0) && right.truthy(0))),
        BinaryOp::Or => Ok(Value::Bool(left.truthy(0) || right.truthy(0))),
    }
}

pub fn evaluate_unary(op: UnaryOp, operand: &Value) -> Result<Value, String> {
    match (op, operand) {
        (UnaryOp::Neg, Value::Number(n)) => Ok(Value::Number(-n)),
        (UnaryOp::Neg, Value::Series(values)) => {
            Ok(Value::series(values.iter().map(|v| -v).collect()))
        }
        (UnaryOp::Neg, other) => Err(format!("Cannot negate {}", other.type_name())),
        (UnaryOp::Not, Value::Series(values)) => Ok(Value::series(
            values
                .iter()
                .map(|&v| if v.is_nan() { f64::NAN } else { bool_num(v == 0.0) })
                .collect(),
        )),
        (UnaryOp::Not, other) => Ok(Value::Bool(!other.truthy(0))),
    }
}

/// Structural equality; numbers compare within `EPSILON`.
pub fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Null, Value::Null) => true,
        (Value::Bool(a), Value::Bool(b)) => a == b,
        (Value::Number(a), Value::Number(b)) => numbers_equal(*a, *b),
        (Value::Str(a), Value::Str(b)) => a == b,
        (Value::Array(a), Value::Array(b)) => {
            a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| values_equal(x, y))
        }
        (Value::Series(a), Value::Series(b)) => {
            a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| numbers_equal(*x, *y))
        }
        (Value::Dict(a), Value::Dict(b)) => {
            a.len() == b.len()
                && a
                    .iter()
                    .zip(b.iter())
                    .all(|((ka, va), (kb, vb))| ka == kb && values_equal(va, vb))
        }
        _ => false,
    }
}

fn numbers_equal(a: f64, b: f64) -> bool {
    (a - b).abs() < EPSILON
}

fn bool_num(b: bool) -> f64 {
    if b { 1.0 } else { 0.0 }
}

fn arith(op: BinaryOp, a: f64, b: f64) -> f64 {
    match op {
        BinaryOp::Add => a + b,
        BinaryOp::Sub => a - b,
        BinaryOp::Mul => a * b,
        BinaryOp::Div => a / b,
        BinaryOp::Mod => a % b,
        _ => f64::NAN,
    }
}

fn numbers(op: BinaryOp, left: &Value, right: &Value) -> Result<(f64, f64), String> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => Ok((*a, *b)),
        _ => Err(mismatch(op, left, right)),
    }
}

fn mismatch(op: BinaryOp, left: &Value, right: &Value) -> String {
    format!(
        "Cannot apply '{}' to {} and {}",
        op,
        left.type_name(),
        right.type_name()
    )
}

fn add(left: &Value, right: &Value) -> Result<Value, String> {
    match (left, right) {
        (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
        (Value::Str(_), _) | (_, Value::Str(_)) => {
            Ok(Value::string(render_joined([left, right], "")?))
        }
        (Value::Array(a), Value::Array(b)) => {
            check_array_len(a.len() + b.len())?;
            let mut joined = Vec::with_capacity(a.len() + b.len());
            joined.extend(a.iter().cloned());
            joined.extend(b.iter().cloned());
            Ok(Value::Array(Arc::new(joined)))
        }
        _ => Err(mismatch(BinaryOp::Add, left, right)),
    }
}

fn compare(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, String> {
    let ordering = match (left, right) {
        (Value::Number(a), Value::Number(b)) => match a.partial_cmp(b) {
            Some(ordering) => ordering,
            None => return Ok(Value::Bool(false)),
        },
        (Value::Str(a), Value::Str(b)) => a.cmp(b),
        _ => return Err(mismatch(op, left, right)),
    };
    let result = match op {
        BinaryOp::Lt => ordering.is_lt(),
        BinaryOp::LtEq => ordering.is_le(),
        BinaryOp::Gt => ordering.is_gt(),
        _ => ordering.is_ge(),
    };
    Ok(Value::Bool(result))
}

/// One side of an element-wise operation.
enum Lane<'a> {
    Many(&'a [f64]),
    One(f64),
}

impl Lane<'_> {
    fn at(&self, i: usize) -> f64 {
        match self {
            Lane::Many(values) => values[i],
            Lane::One(v) => *v,
        }
    }
}

fn lane<'a>(op: BinaryOp, value: &'a Value, left: &Value, right: &Value) -> Result<Lane<'a>, String> {
    match value {
        Value::Series(values) => Ok(Lane::Many(&values[..])),
        Value::Number(n) => Ok(Lane::One(*n)),
        Value::Bool(b) => Ok(Lane::One(bool_num(*b))),
        Value::Null => Ok(Lane::One(f64::NAN)),
        _ => Err(mismatch(op, left, right)),
    }
}

fn series_binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, String> {
    let a = lane(op, left, left, right)?;
    let b = lane(op, right, left, right)?;
    let len = match (&a, &b) {
        (Lane::Many(x), Lane::Many(y)) if x.len() != y.len() => {
            return Err(format!(
                "Series length mismatch in '{}': {} vs {}",
                op,
                x.len(),
                y.len()
            ));
        }
        (Lane::Many(x), _) => x.len(),
        (_, Lane::Many(y)) => y.len(),
        _ => 0,
    };

    let out = (0..len)
        .map(|i| element(op, a.at(i), b.at(i)))
        .collect();
    Ok(Value::series(out))
}

fn element(op: BinaryOp, a: f64, b: f64) -> f64 {
    match op {
        BinaryOp::Add | BinaryOp::Sub | BinaryOp::Mul => arith(op, a, b),
        BinaryOp::Div | BinaryOp::Mod => {
            if b == 0.0 {
                f64::NAN
            } else {
                arith(op, a, b)
            }
        }
        BinaryOp::And => bool_num(truthy(a) && truthy(b)),
        BinaryOp::Or => bool_num(truthy(a) || truthy(b)),
        _ if a.is_nan() || b.is_nan() => f64::NAN,
        BinaryOp::Eq => bool_num(numbers_equal(a, b)),
        BinaryOp::NotEq => bool_num(!numbers_equal(a, b)),
        BinaryOp::Lt => bool_num(a < b),
        BinaryOp::LtEq => bool_num(a <= b),
        BinaryOp::Gt => bool_num(a > b),
        BinaryOp::GtEq => bool_num(a >= b),
    }
}

fn truthy(v: f64) -> bool {
    v != 0.0 && !v.is_nan()
}
