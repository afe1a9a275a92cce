//! Operators on values.
//!
//! Nothing in here runs submission code, so these are plain functions over
//! values; membership tests on iterators live on the interpreter.

use std::cmp::Ordering;
use std::rc::Rc;

use chrono::TimeDelta;
use indexmap::IndexMap;

use crate::interp::exception::{ExcKind, Exec, raise, type_error, value_error};
use crate::interp::format::percent_format;
use crate::interp::modules::datetime::timedelta_parts;
use crate::interp::value::{HashKey, MAX_VALUE_DEPTH, Value};
use crate::lang::ast::{BinOp, CmpOp, UnaryOp};

const OVERFLOW: &str = "integer result does not fit in 64 bits";

pub(crate) fn overflow<T>() -> Exec<T> {
    raise(ExcKind::OverflowError, OVERFLOW)
}

/// Fail with `MemoryError` when a result would hold more than `max` items.
pub fn check_len(len: usize, max: usize) -> Exec<()> {
    if len > max {
        return raise(
            ExcKind::MemoryError,
            format!("result would have {len} items, more than the limit of {max}"),
        );
    }
    Ok(())
}

fn unsupported<T>(op: BinOp, left: &Value, right: &Value) -> Exec<T> {
    type_error(format!(
        "unsupported operand type(s) for {}: '{}' and '{}'",
        op.symbol(),
        left.type_name(),
        right.type_name()
    ))
}

/// `left op right`. `max_len` bounds the size of built sequences.
pub fn binary(op: BinOp, left: &Value, right: &Value, max_len: usize) -> Exec<Value> {
    if let (Some(a), Some(b)) = (int_operand(left), int_operand(right)) {
        if let (Value::Bool(x), Value::Bool(y)) = (left, right) {
            match op {
                BinOp::BitAnd => return Ok(Value::Bool(*x & *y)),
                BinOp::BitOr => return Ok(Value::Bool(*x | *y)),
                BinOp::BitXor => return Ok(Value::Bool(*x ^ *y)),
                _ => {}
            }
        }
        return int_binary(op, a, b, left, right);
    }
    if let (Some(a), Some(b)) = (float_operand(left), float_operand(right)) {
        return float_binary(op, a, b, left, right);
    }

    match (op, left, right) {
        (BinOp::Add, Value::Str(a), Value::Str(b)) => {
            check_len(a.len() + b.len(), max_len)?;
            let mut text = String::with_capacity(a.len() + b.len());
            text.push_str(a);
            text.push_str(b);
            Ok(Value::str(text))
        }
        (BinOp::Add, Value::Str(_), other) => type_error(format!(
            "can only concatenate str (not \"{}\") to str",
            other.type_name()
        )),
        (BinOp::Mul, Value::Str(s), n) | (BinOp::Mul, n, Value::Str(s))
            if n.as_int().is_some() =>
        {
            let count = repeat_count(n);
            check_len(s.len().saturating_mul(count), max_len)?;
            Ok(Value::str(s.repeat(count)))
        }
        (BinOp::Mod, Value::Str(template), args) => Ok(Value::str(percent_format(template, args)?)),

        (BinOp::Add, Value::List(a), Value::List(b)) => {
            let mut items = a.snapshot();
            check_len(items.len() + b.borrow().len(), max_len)?;
            items.extend(b.snapshot());
            Ok(Value::list(items))
        }
        (BinOp::Add, Value::List(_), other) => type_error(format!(
            "can only concatenate list (not \"{}\") to list",
            other.type_name()
        )),
        (BinOp::Add, Value::Tuple(a), Value::Tuple(b)) => {
            check_len(a.items().len() + b.items().len(), max_len)?;
            let mut items = a.items().to_vec();
            items.extend(b.items().iter().cloned());
            Ok(Value::tuple(items))
        }
        (BinOp::Add, Value::Tuple(_), other) => type_error(format!(
            "can only concatenate tuple (not \"{}\") to tuple",
            other.type_name()
        )),
        (BinOp::Mul, Value::List(list), n) | (BinOp::Mul, n, Value::List(list))
            if n.as_int().is_some() =>
        {
            let items = list.snapshot();
            Ok(Value::list(repeat_items(&items, repeat_count(n), max_len)?))
        }
        (BinOp::Mul, Value::Tuple(tuple), n) | (BinOp::Mul, n, Value::Tuple(tuple))
            if n.as_int().is_some() =>
        {
            Ok(Value::tuple(repeat_items(
                tuple.items(),
                repeat_count(n),
                max_len,
            )?))
        }

        (_, Value::Set(a), Value::Set(b)) => {
            let a = a.borrow().clone();
            let b = b.borrow().clone();
            let result: IndexMap<HashKey, Value> = match op {
                BinOp::BitOr => {
                    let mut merged = a;
                    for (key, value) in b {
                        merged.entry(key).or_insert(value);
                    }
                    merged
                }
                BinOp::BitAnd => a.into_iter().filter(|(k, _)| b.contains_key(k)).collect(),
                BinOp::Sub => a.into_iter().filter(|(k, _)| !b.contains_key(k)).collect(),
                BinOp::BitXor => {
                    let mut result: IndexMap<HashKey, Value> =
                        a.iter().filter(|(k, _)| !b.contains_key(*k)).map(|(k, v)| (k.clone(), v.clone())).collect();
                    result.extend(b.into_iter().filter(|(k, _)| !a.contains_key(k)));
                    result
                }
                _ => return unsupported(op, left, right),
            };
            Ok(Value::set(result))
        }
        (BinOp::BitOr, Value::Dict(a), Value::Dict(b)) => {
            let mut merged = a.borrow().clone();
            for (key, (key_value, value)) in b.borrow().iter() {
                match merged.get_mut(key) {
                    Some(slot) => slot.1 = value.clone(),
                    None => {
                        merged.insert(key.clone(), (key_value.clone(), value.clone()));
                    }
                }
            }
            Ok(Value::dict(merged))
        }

        _ => date_binary(op, left, right),
    }
}

fn int_operand(value: &Value) -> Option<i64> {
    match value {
        Value::Int(_) | Value::Bool(_) => value.as_int(),
        _ => None,
    }
}

fn float_operand(value: &Value) -> Option<f64> {
    match value {
        Value::Int(_) | Value::Bool(_) | Value::Float(_) => value.as_float(),
        _ => None,
    }
}

fn repeat_count(n: &Value) -> usize {
    n.as_int().map_or(0, |n| usize::try_from(n).unwrap_or(0))
}

fn repeat_items(items: &[Value], count: usize, max_len: usize) -> Exec<Vec<Value>> {
    check_len(items.len().saturating_mul(count), max_len)?;
    let mut out = Vec::with_capacity(items.len() * count);
    for _ in 0..count {
        out.extend(items.iter().cloned());
    }
    Ok(out)
}

fn int_binary(op: BinOp, a: i64, b: i64, left: &Value, right: &Value) -> Exec<Value> {
    let result = match op {
        BinOp::Add => a.checked_add(b),
        BinOp::Sub => a.checked_sub(b),
        BinOp::Mul => a.checked_mul(b),
        BinOp::Div => {
            if b == 0 {
                return raise(ExcKind::ZeroDivisionError, "division by zero");
            }
            return Ok(Value::Float(a as f64 / b as f64));
        }
        BinOp::FloorDiv => {
            if b == 0 {
                return raise(
                    ExcKind::ZeroDivisionError,
                    "integer division or modulo by zero",
                );
            }
            floor_div(a, b)
        }
        BinOp::Mod => {
            if b == 0 {
                return raise(ExcKind::ZeroDivisionError, "integer modulo by zero");
            }
            floor_mod(a, b)
        }
        BinOp::Pow => {
            if b < 0 {
                if a == 0 {
                    return raise(
                        ExcKind::ZeroDivisionError,
                        "0.0 cannot be raised to a negative power",
                    );
                }
                return Ok(Value::Float((a as f64).powf(b as f64)));
            }
            int_pow(a, b)
        }
        BinOp::LShift => {
            if b < 0 {
                return value_error("negative shift count");
            }
            if a == 0 {
                Some(0)
            } else if b >= 63 {
                None
            } else {
                let shifted = a << b;
                (shifted >> b == a).then_some(shifted)
            }
        }
        BinOp::RShift => {
            if b < 0 {
                return value_error("negative shift count");
            }
            Some(if b >= 64 { if a < 0 { -1 } else { 0 } } else { a >> b })
        }
        BinOp::BitAnd => Some(a & b),
        BinOp::BitOr => Some(a | b),
        BinOp::BitXor => Some(a ^ b),
        BinOp::MatMul => return unsupported(op, left, right),
    };
    match result {
        Some(value) => Ok(Value::Int(value)),
        None => overflow(),
    }
}

pub fn floor_div(a: i64, b: i64) -> Option<i64> {
    let q = a.checked_div(b)?;
    if a % b != 0 && ((a < 0) != (b < 0)) {
        q.checked_sub(1)
    } else {
        Some(q)
    }
}

pub fn floor_mod(a: i64, b: i64) -> Option<i64> {
    let r = a.checked_rem(b)?;
    if r != 0 && ((r < 0) != (b < 0)) {
        Some(r + b)
    } else {
        Some(r)
    }
}

pub fn int_pow(base: i64, exponent: i64) -> Option<i64> {
    match base {
        0 => Some(if exponent == 0 { 1 } else { 0 }),
        1 => Some(1),
        -1 => Some(if exponent % 2 == 0 { 1 } else { -1 }),
        _ => base.checked_pow(u32::try_from(exponent).ok()?),
    }
}

fn float_binary(op: BinOp, a: f64, b: f64, left: &Value, right: &Value) -> Exec<Value> {
    let value = match op {
        BinOp::Add => a + b,
        BinOp::Sub => a - b,
        BinOp::Mul => a * b,
        BinOp::Div => {
            if b == 0.0 {
                return raise(ExcKind::ZeroDivisionError, "float division by zero");
            }
            a / b
        }
        BinOp::FloorDiv => {
            if b == 0.0 {
                return raise(ExcKind::ZeroDivisionError, "float floor division by zero");
            }
            float_divmod(a, b).0
        }
        BinOp::Mod => {
            if b == 0.0 {
                return raise(ExcKind::ZeroDivisionError, "float modulo by zero");
            }
            float_divmod(a, b).1
        }
        BinOp::Pow => float_pow(a, b)?,
        _ => return unsupported(op, left, right),
    };
    Ok(Value::Float(value))
}

/// Floor quotient and remainder with the sign of the divisor.
pub fn float_divmod(a: f64, b: f64) -> (f64, f64) {
    let mut rem = a % b;
    let mut div = (a - rem) / b;
    if rem != 0.0 {
        if (b < 0.0) != (rem < 0.0) {
            rem += b;
            div -= 1.0;
        }
    } else {
        rem = 0.0_f64.copysign(b);
    }
    let floor = if div != 0.0 {
        let mut floor = div.floor();
        if div - floor > 0.5 {
            floor += 1.0;
        }
        floor
    } else {
        0.0_f64.copysign(a / b)
    };
    (floor, rem)
}

pub fn float_pow(a: f64, b: f64) -> Exec<f64> {
    if a == 0.0 && b < 0.0 {
        return raise(
            ExcKind::ZeroDivisionError,
            "0.0 cannot be raised to a negative power",
        );
    }
    if a < 0.0 && b.fract() != 0.0 && b.is_finite() {
        return value_error("negative number cannot be raised to a fractional power");
    }
    let result = a.powf(b);
    if result.is_infinite() && a.is_finite() && b.is_finite() {
        return raise(ExcKind::OverflowError, "(34, 'Numerical result out of range')");
    }
    Ok(result)
}

fn date_binary(op: BinOp, left: &Value, right: &Value) -> Exec<Value> {
    let out_of_range = || raise(ExcKind::OverflowError, "date value out of range");
    match (op, left, right) {
        (BinOp::Add, Value::Date(d), Value::TimeDelta(t))
        | (BinOp::Add, Value::TimeDelta(t), Value::Date(d)) => {
            let days = TimeDelta::try_days(timedelta_parts(t).0);
            days.and_then(|days| d.checked_add_signed(days))
                .map(Value::Date)
                .map_or_else(out_of_range, Ok)
        }
        (BinOp::Sub, Value::Date(d), Value::TimeDelta(t)) => {
            let days = TimeDelta::try_days(timedelta_parts(t).0);
            days.and_then(|days| d.checked_sub_signed(days))
                .map(Value::Date)
                .map_or_else(out_of_range, Ok)
        }
        (BinOp::Sub, Value::Date(a), Value::Date(b)) => Ok(Value::TimeDelta(*a - *b)),
        (BinOp::Add, Value::DateTime(d), Value::TimeDelta(t))
        | (BinOp::Add, Value::TimeDelta(t), Value::DateTime(d)) => d
            .checked_add_signed(*t)
            .map(Value::DateTime)
            .map_or_else(out_of_range, Ok),
        (BinOp::Sub, Value::DateTime(d), Value::TimeDelta(t)) => d
            .checked_sub_signed(*t)
            .map(Value::DateTime)
            .map_or_else(out_of_range, Ok),
        (BinOp::Sub, Value::DateTime(a), Value::DateTime(b)) => {
            Ok(Value::TimeDelta(a.signed_duration_since(*b)))
        }
        (BinOp::Add, Value::TimeDelta(a), Value::TimeDelta(b)) => {
            a.checked_add(b).map(Value::TimeDelta).map_or_else(out_of_range, Ok)
        }
        (BinOp::Sub, Value::TimeDelta(a), Value::TimeDelta(b)) => {
            a.checked_sub(b).map(Value::TimeDelta).map_or_else(out_of_range, Ok)
        }
        (BinOp::Mul, Value::TimeDelta(t), n) | (BinOp::Mul, n, Value::TimeDelta(t))
            if n.as_float().is_some() =>
        {
            scale_delta(t, n.as_float().unwrap_or(0.0))
        }
        (BinOp::Div, Value::TimeDelta(a), Value::TimeDelta(b)) => {
            let divisor = delta_micros(b);
            if divisor == 0 {
                return raise(ExcKind::ZeroDivisionError, "division by zero");
            }
            Ok(Value::Float(delta_micros(a) as f64 / divisor as f64))
        }
        (BinOp::FloorDiv, Value::TimeDelta(a), Value::TimeDelta(b)) => {
            let divisor = delta_micros(b);
            if divisor == 0 {
                return raise(
                    ExcKind::ZeroDivisionError,
                    "integer division or modulo by zero",
                );
            }
            Ok(Value::Int(
                i64::try_from(delta_micros(a).div_euclid(divisor)).unwrap_or(i64::MAX),
            ))
        }
        (BinOp::Div, Value::TimeDelta(t), n) if n.as_float().is_some() => {
            let divisor = n.as_float().unwrap_or(0.0);
            if divisor == 0.0 {
                return raise(ExcKind::ZeroDivisionError, "division by zero");
            }
            scale_delta(t, 1.0 / divisor)
        }
        _ => unsupported(op, left, right),
    }
}

fn delta_micros(delta: &TimeDelta) -> i128 {
    i128::from(delta.num_seconds()) * 1_000_000 + i128::from(delta.subsec_nanos() / 1000)
}

fn scale_delta(delta: &TimeDelta, factor: f64) -> Exec<Value> {
    let micros = (delta_micros(delta) as f64 * factor).round();
    if !micros.is_finite() || micros.abs() > 8.64e19 {
        return raise(ExcKind::OverflowError, "timedelta value out of range");
    }
    Ok(Value::TimeDelta(TimeDelta::microseconds(micros as i64)))
}

pub fn unary(op: UnaryOp, value: &Value) -> Exec<Value> {
    match (op, value) {
        (UnaryOp::Not, v) => Ok(Value::Bool(!v.truthy())),
        (UnaryOp::Neg, Value::Float(x)) => Ok(Value::Float(-x)),
        (UnaryOp::Neg, v) if v.as_int().is_some() => v
            .as_int()
            .and_then(i64::checked_neg)
            .map(Value::Int)
            .map_or_else(overflow, Ok),
        (UnaryOp::Neg, Value::TimeDelta(t)) => Ok(Value::TimeDelta(-*t)),
        (UnaryOp::Pos, Value::Float(x)) => Ok(Value::Float(*x)),
        (UnaryOp::Pos, v) if v.as_int().is_some() => Ok(Value::Int(v.as_int().unwrap_or(0))),
        (UnaryOp::Pos, Value::TimeDelta(t)) => Ok(Value::TimeDelta(*t)),
        (UnaryOp::Invert, v) if v.as_int().is_some() => Ok(Value::Int(!v.as_int().unwrap_or(0))),
        (op, v) => {
            let symbol = match op {
                UnaryOp::Neg => "-",
                UnaryOp::Pos => "+",
                _ => "~",
            };
            type_error(format!(
                "bad operand type for unary {symbol}: '{}'",
                v.type_name()
            ))
        }
    }
}

// ---- comparison ----

/// `a == b`.
pub fn equals(a: &Value, b: &Value) -> Exec<bool> {
    equals_at(a, b, 0)
}

fn depth_exceeded<T>() -> Exec<T> {
    raise(
        ExcKind::RecursionError,
        "maximum recursion depth exceeded in comparison",
    )
}

fn equals_at(a: &Value, b: &Value, depth: usize) -> Exec<bool> {
    if depth > MAX_VALUE_DEPTH {
        return depth_exceeded();
    }
    if let (Some(x), Some(y)) = (int_operand(a), int_operand(b)) {
        return Ok(x == y);
    }
    if let (Some(x), Some(y)) = (float_operand(a), float_operand(b)) {
        return Ok(x == y);
    }
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => Ok(x == y),
        (Value::List(x), Value::List(y)) => {
            if Rc::ptr_eq(x, y) {
                return Ok(true);
            }
            sequences_equal(&x.snapshot(), &y.snapshot(), depth)
        }
        (Value::Tuple(x), Value::Tuple(y)) => sequences_equal(x.items(), y.items(), depth),
        (Value::Dict(x), Value::Dict(y)) => {
            if x.len() != y.len() {
                return Ok(false);
            }
            for (key, (_, value)) in x.borrow().iter() {
                let Some(other) = y.get(key) else {
                    return Ok(false);
                };
                if !equals_at(value, &other, depth + 1)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        (Value::Set(x), Value::Set(y)) => {
            let (x, y) = (x.borrow(), y.borrow());
            Ok(x.len() == y.len() && x.keys().all(|key| y.contains_key(key)))
        }
        (Value::Range(x), Value::Range(y)) => {
            let len = x.len();
            Ok(len == y.len()
                && (len == 0 || (x.start == y.start && (len == 1 || x.step == y.step))))
        }
        (Value::Date(x), Value::Date(y)) => Ok(x == y),
        (Value::DateTime(x), Value::DateTime(y)) => Ok(x == y),
        (Value::TimeDelta(x), Value::TimeDelta(y)) => Ok(x == y),
        (Value::Exception(x), Value::Exception(y)) => Ok(Rc::ptr_eq(x, y)),
        _ => Ok(a.is(b)),
    }
}

fn sequences_equal(a: &[Value], b: &[Value], depth: usize) -> Exec<bool> {
    if a.len() != b.len() {
        return Ok(false);
    }
    for (x, y) in a.iter().zip(b) {
        if !x.is(y) && !equals_at(x, y, depth + 1)? {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Ordering of two values; `None` when unordered (NaN).
pub fn order(a: &Value, b: &Value, symbol: &str) -> Exec<Option<Ordering>> {
    order_at(a, b, symbol, 0)
}

fn order_at(a: &Value, b: &Value, symbol: &str, depth: usize) -> Exec<Option<Ordering>> {
    if depth > MAX_VALUE_DEPTH {
        return depth_exceeded();
    }
    if let (Some(x), Some(y)) = (int_operand(a), int_operand(b)) {
        return Ok(Some(x.cmp(&y)));
    }
    if let (Some(x), Some(y)) = (float_operand(a), float_operand(b)) {
        return Ok(x.partial_cmp(&y));
    }
    match (a, b) {
        (Value::Str(x), Value::Str(y)) => Ok(Some(x.cmp(y))),
        (Value::List(x), Value::List(y)) => {
            sequence_order(&x.snapshot(), &y.snapshot(), symbol, depth)
        }
        (Value::Tuple(x), Value::Tuple(y)) => sequence_order(x.items(), y.items(), symbol, depth),
        (Value::Date(x), Value::Date(y)) => Ok(Some(x.cmp(y))),
        (Value::DateTime(x), Value::DateTime(y)) => Ok(Some(x.cmp(y))),
        (Value::TimeDelta(x), Value::TimeDelta(y)) => Ok(Some(x.cmp(y))),
        _ => type_error(format!(
            "'{symbol}' not supported between instances of '{}' and '{}'",
            a.type_name(),
            b.type_name()
        )),
    }
}

fn sequence_order(
    a: &[Value],
    b: &[Value],
    symbol: &str,
    depth: usize,
) -> Exec<Option<Ordering>> {
    for (x, y) in a.iter().zip(b) {
        if x.is(y) || equals_at(x, y, depth + 1)? {
            continue;
        }
        return order_at(x, y, symbol, depth + 1);
    }
    Ok(Some(a.len().cmp(&b.len())))
}

/// Rich comparison for the ordering and equality operators. Membership and
/// identity are handled by the caller.
pub fn compare(op: CmpOp, a: &Value, b: &Value) -> Exec<bool> {
    match op {
        CmpOp::Eq => equals(a, b),
        CmpOp::NotEq => Ok(!equals(a, b)?),
        CmpOp::Is => Ok(a.is(b)),
        CmpOp::IsNot => Ok(!a.is(b)),
        CmpOp::Lt | CmpOp::LtE | CmpOp::Gt | CmpOp::GtE => {
            if let (Value::Set(x), Value::Set(y)) = (a, b) {
                let (x, y) = (x.borrow(), y.borrow());
                let subset = |small: &IndexMap<HashKey, Value>, big: &IndexMap<HashKey, Value>| {
                    small.keys().all(|key| big.contains_key(key))
                };
                return Ok(match op {
                    CmpOp::Lt => x.len() < y.len() && subset(&x, &y),
                    CmpOp::LtE => subset(&x, &y),
                    CmpOp::Gt => x.len() > y.len() && subset(&y, &x),
                    _ => subset(&y, &x),
                });
            }
            let ordering = order(a, b, op.symbol())?;
            Ok(match ordering {
                None => false,
                Some(ordering) => match op {
                    CmpOp::Lt => ordering.is_lt(),
                    CmpOp::LtE => ordering.is_le(),
                    CmpOp::Gt => ordering.is_gt(),
                    _ => ordering.is_ge(),
                },
            })
        }
        CmpOp::In | CmpOp::NotIn => type_error("membership is not a rich comparison"),
    }
}

/// `a < b`, the only comparison sorting uses.
pub fn less_than(a: &Value, b: &Value) -> Exec<bool> {
    compare(CmpOp::Lt, a, b)
}

/// Stable merge sort with a fallible `<`. The slice is sorted by
/// `keys`; `items` are permuted alongside.
pub fn sort_by_keys(
    keys: Vec<Value>,
    items: Vec<Value>,
    mut less: impl FnMut(&Value, &Value) -> Exec<bool>,
) -> Exec<Vec<Value>> {
    let mut pairs: Vec<(Value, Value)> = keys.into_iter().zip(items).collect();
    let mut buffer: Vec<(Value, Value)> = Vec::with_capacity(pairs.len());
    let len = pairs.len();
    let mut width = 1;
    while width < len {
        let mut start = 0;
        let mut source = std::mem::take(&mut pairs).into_iter();
        while start < len {
            let mid = (start + width).min(len);
            let end = (start + 2 * width).min(len);
            let left: Vec<_> = source.by_ref().take(mid - start).collect();
            let right: Vec<_> = source.by_ref().take(end - mid).collect();
            merge(left, right, &mut buffer, &mut less)?;
            start = end;
        }
        pairs = std::mem::take(&mut buffer);
        width *= 2;
    }
    Ok(pairs.into_iter().map(|(_, item)| item).collect())
}

fn merge(
    left: Vec<(Value, Value)>,
    right: Vec<(Value, Value)>,
    out: &mut Vec<(Value, Value)>,
    less: &mut impl FnMut(&Value, &Value) -> Exec<bool>,
) -> Exec<()> {
    let mut left = left.into_iter().peekable();
    let mut right = right.into_iter().peekable();
    loop {
        let take_right = match (left.peek(), right.peek()) {
            (Some(l), Some(r)) => less(&r.0, &l.0)?,
            (Some(_), None) => false,
            (None, Some(_)) => true,
            (None, None) => return Ok(()),
        };
        let next = if take_right { right.next() } else { left.next() };
        out.extend(next);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yare::parameterized;

    const MAX: usize = 1_000_000;

    fn int(value: &Value) -> i64 {
        match value {
            Value::Int(i) => *i,
            other => panic!("expected int, got {other:?}"),
        }
    }

    #[parameterized(
        floor_div_negative = { BinOp::FloorDiv, -7, 2, -4 },
        floor_div_positive = { BinOp::FloorDiv, 7, 2, 3 },
        mod_negative_dividend = { BinOp::Mod, -7, 3, 2 },
        mod_negative_divisor = { BinOp::Mod, 7, -3, -2 },
        power = { BinOp::Pow, 2, 10, 1024 },
        shift_left = { BinOp::LShift, 1, 10, 1024 },
        shift_right_negative = { BinOp::RShift, -8, 1, -4 },
        xor = { BinOp::BitXor, 6, 3, 5 },
    )]
    fn integer_arithmetic(op: BinOp, a: i64, b: i64, expected: i64) {
        let result = binary(op, &Value::Int(a), &Value::Int(b), MAX).unwrap();
        assert_eq!(int(&result), expected);
    }

    #[test]
    fn overflow_is_reported() {
        let result = binary(BinOp::Mul, &Value::Int(i64::MAX), &Value::Int(2), MAX);
        assert!(matches!(result, Err(crate::interp::exception::Flow::Exception(_))));
        assert!(binary(BinOp::Pow, &Value::Int(10), &Value::Int(40), MAX).is_err());
    }

    #[test]
    fn division_by_zero_messages() {
        for (op, left, message) in [
            (BinOp::Div, Value::Int(1), "division by zero"),
            (BinOp::FloorDiv, Value::Int(1), "integer division or modulo by zero"),
            (BinOp::Mod, Value::Int(1), "integer modulo by zero"),
            (BinOp::Div, Value::Float(1.0), "float division by zero"),
        ] {
            let Err(crate::interp::exception::Flow::Exception(raised)) =
                binary(op, &left, &Value::Int(0), MAX)
            else {
                panic!("expected ZeroDivisionError");
            };
            assert_eq!(raised.exc.kind, ExcKind::ZeroDivisionError);
            assert!(matches!(&raised.exc.args[0], Value::Str(s) if s.as_ref() == message));
        }
    }

    #[test]
    fn float_floor_semantics() {
        assert_eq!(float_divmod(-7.5, 2.0), (-4.0, 0.5));
        assert_eq!(float_divmod(7.5, -2.0), (-4.0, -0.5));
    }

    #[test]
    fn true_division_yields_float() {
        let result = binary(BinOp::Div, &Value::Int(7), &Value::Int(2), MAX).unwrap();
        assert!(matches!(result, Value::Float(x) if x == 3.5));
    }

    #[test]
    fn string_concatenation_type_error() {
        assert!(binary(BinOp::Add, &Value::str("a"), &Value::Int(1), MAX).is_err());
        let repeated = binary(BinOp::Mul, &Value::str("ab"), &Value::Int(3), MAX).unwrap();
        assert_eq!(repeated.as_str(), Some("ababab"));
    }

    #[test]
    fn repetition_respects_limit() {
        let list = Value::list(vec![Value::Int(0); 10]);
        assert!(binary(BinOp::Mul, &list, &Value::Int(1_000_000), 1000).is_err());
    }

    #[test]
    fn mixed_numeric_equality() {
        assert!(equals(&Value::Int(1), &Value::Float(1.0)).unwrap());
        assert!(equals(&Value::Bool(true), &Value::Int(1)).unwrap());
        assert!(!equals(&Value::Int(1), &Value::str("1")).unwrap());
        let a = Value::list(vec![Value::Int(1), Value::tuple(vec![Value::str("x")])]);
        let b = Value::list(vec![Value::Float(1.0), Value::tuple(vec![Value::str("x")])]);
        assert!(equals(&a, &b).unwrap());
    }

    #[test]
    fn ordering_rules() {
        assert!(less_than(&Value::Int(1), &Value::Float(1.5)).unwrap());
        assert!(less_than(&Value::str("apple"), &Value::str("banana")).unwrap());
        let short = Value::tuple(vec![Value::Int(1)]);
        let long = Value::tuple(vec![Value::Int(1), Value::Int(0)]);
        assert!(less_than(&short, &long).unwrap());
        assert!(less_than(&Value::Int(1), &Value::str("a")).is_err());
        assert!(!less_than(&Value::Float(f64::NAN), &Value::Float(1.0)).unwrap());
    }

    #[test]
    fn merge_sort_is_stable() {
        let keys = vec![Value::Int(2), Value::Int(1), Value::Int(2), Value::Int(0)];
        let items = vec![Value::str("a"), Value::str("b"), Value::str("c"), Value::str("d")];
        let sorted = sort_by_keys(keys, items, less_than).unwrap();
        let text: Vec<_> = sorted.iter().filter_map(Value::as_str).collect();
        assert_eq!(text, vec!["d", "b", "a", "c"]);
    }

    #[test]
    fn sort_propagates_comparison_errors() {
        let keys = vec![Value::Int(1), Value::str("x")];
        let items = keys.clone();
        assert!(sort_by_keys(keys, items, less_than).is_err());
    }
}
