//! Builtin functions and type constructors.

use std::collections::HashMap;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

use indexmap::IndexMap;

use crate::capability::SAFE_BUILTINS;
use crate::interp::Interpreter;
use crate::interp::exception::{
    ExcKind, ExceptionValue, Exec, Flow, raise, type_error, value_error,
};
use crate::interp::format::{format_value, quote, repr, str_of};
use crate::interp::modules;
use crate::interp::ops;
use crate::interp::value::{Args, Class, HashKey, IterState, Native, Range, TypeKind, Value};
use crate::lang::ast::BinOp;

static NATIVES: &[Native] = &[
    Native { name: "abs", func: abs },
    Native { name: "all", func: all },
    Native { name: "any", func: any },
    Native { name: "bin", func: bin },
    Native { name: "callable", func: callable },
    Native { name: "chr", func: chr },
    Native { name: "divmod", func: divmod },
    Native { name: "enumerate", func: enumerate },
    Native { name: "filter", func: filter },
    Native { name: "format", func: format },
    Native { name: "hash", func: hash },
    Native { name: "hex", func: hex },
    Native { name: "isinstance", func: isinstance },
    Native { name: "iter", func: iter },
    Native { name: "len", func: len },
    Native { name: "map", func: map },
    Native { name: "max", func: max },
    Native { name: "min", func: min },
    Native { name: "next", func: next },
    Native { name: "oct", func: oct },
    Native { name: "ord", func: ord },
    Native { name: "pow", func: pow },
    Native { name: "print", func: print },
    Native { name: "repr", func: repr_builtin },
    Native { name: "reversed", func: reversed },
    Native { name: "round", func: round },
    Native { name: "sorted", func: sorted },
    Native { name: "sum", func: sum },
    Native { name: "zip", func: zip },
];

fn type_kind(name: &str) -> Option<TypeKind> {
    Some(match name {
        "bool" => TypeKind::Bool,
        "int" => TypeKind::Int,
        "float" => TypeKind::Float,
        "str" => TypeKind::Str,
        "list" => TypeKind::List,
        "tuple" => TypeKind::Tuple,
        "dict" => TypeKind::Dict,
        "set" => TypeKind::Set,
        "range" => TypeKind::Range,
        "type" => TypeKind::Type,
        _ => return None,
    })
}

/// Resolve a builtin by name.
pub fn lookup(name: &str) -> Option<Value> {
    if let Some(kind) = type_kind(name) {
        return Some(Value::Class(Class::Type(kind)));
    }
    if let Some(native) = NATIVES.iter().find(|native| native.name == name) {
        return Some(Value::Native(native));
    }
    ExcKind::from_name(name)
        .filter(|kind| ExcKind::BUILTIN.contains(kind))
        .map(|kind| Value::Class(Class::Exception(kind)))
}

/// The builtin namespace every submission starts with.
pub fn namespace() -> HashMap<&'static str, Value> {
    SAFE_BUILTINS
        .iter()
        .copied()
        .chain(ExcKind::BUILTIN.iter().map(|kind| kind.name()))
        .filter_map(|name| lookup(name).map(|value| (name, value)))
        .collect()
}

// ---- constructors ----

/// Call a builtin type.
pub fn construct(interp: &mut Interpreter, kind: TypeKind, mut args: Args) -> Exec<Value> {
    match kind {
        TypeKind::Int => {
            let base = args.take(1, "base");
            args.finish("int")?;
            args.expect("int", 0, 2)?;
            match (args.get(0), base) {
                (None, _) => Ok(Value::Int(0)),
                (Some(value), None) => to_int(value),
                (Some(Value::Str(text)), Some(base)) => {
                    let Some(base) = base.as_int() else {
                        return type_error(format!(
                            "'{}' object cannot be interpreted as an integer",
                            base.type_name()
                        ));
                    };
                    if base != 0 && !(2..=36).contains(&base) {
                        return value_error("int() base must be >= 2 and <= 36, or 0");
                    }
                    parse_int(text, base as u32)
                }
                (Some(_), Some(_)) => type_error("int() can't convert non-string with explicit base"),
            }
        }
        TypeKind::Float => {
            args.finish("float")?;
            args.expect("float", 0, 1)?;
            match args.get(0) {
                None => Ok(Value::Float(0.0)),
                Some(value) => to_float(value),
            }
        }
        TypeKind::Str => {
            args.finish("str")?;
            args.expect("str", 0, 1)?;
            match args.get(0) {
                None => Ok(Value::str("")),
                Some(value) => Ok(Value::str(str_of(value)?)),
            }
        }
        TypeKind::Bool => {
            args.finish("bool")?;
            args.expect("bool", 0, 1)?;
            Ok(Value::Bool(args.get(0).is_some_and(Value::truthy)))
        }
        TypeKind::List => {
            args.finish("list")?;
            args.expect("list", 0, 1)?;
            match args.get(0) {
                None => Ok(Value::list(Vec::new())),
                Some(value) => Ok(Value::list(interp.collect(value)?)),
            }
        }
        TypeKind::Tuple => {
            args.finish("tuple")?;
            args.expect("tuple", 0, 1)?;
            match args.get(0) {
                None => Ok(Value::tuple(Vec::new())),
                Some(Value::Tuple(tuple)) => Ok(Value::Tuple(tuple.clone())),
                Some(value) => Ok(Value::tuple(interp.collect(value)?)),
            }
        }
        TypeKind::Set => {
            args.finish("set")?;
            args.expect("set", 0, 1)?;
            let items = match args.get(0) {
                None => Vec::new(),
                Some(value) => interp.collect(value)?,
            };
            Ok(Value::set(hash_all(items)?))
        }
        TypeKind::Dict => {
            args.expect("dict", 0, 1)?;
            let mut map = IndexMap::new();
            if let Some(source) = args.get(0) {
                update_dict(interp, &mut map, source)?;
            }
            for (key, value) in std::mem::take(&mut args.keywords) {
                map.insert(HashKey::Str(key.clone()), (Value::Str(key), value));
            }
            Ok(Value::dict(map))
        }
        TypeKind::Range => {
            args.finish("range")?;
            args.expect("range", 1, 3)?;
            let mut bounds = Vec::with_capacity(3);
            for value in &args.positional {
                bounds.push(index_arg(value)?);
            }
            let (start, stop, step) = match bounds.as_slice() {
                [stop] => (0, *stop, 1),
                [start, stop] => (*start, *stop, 1),
                [start, stop, step, ..] => (*start, *stop, *step),
                [] => (0, 0, 1),
            };
            if step == 0 {
                return value_error("range() arg 3 must not be zero");
            }
            Ok(Value::Range(Range { start, stop, step }))
        }
        TypeKind::Type => {
            args.finish("type")?;
            match args.positional.as_slice() {
                [value] => Ok(Value::Class(value.class())),
                [_, _, _] => Err(Flow::violation(
                    "creating classes with type() is not permitted",
                )),
                _ => type_error("type() takes 1 or 3 arguments"),
            }
        }
        TypeKind::Date | TypeKind::DateTime | TypeKind::TimeDelta => {
            modules::datetime::construct(interp, kind, args)
        }
        other => type_error(format!("cannot create '{}' instances", other.name())),
    }
}

/// Merge `source` (a dict or an iterable of pairs) into `map`.
pub(crate) fn update_dict(
    interp: &mut Interpreter,
    map: &mut IndexMap<HashKey, (Value, Value)>,
    source: &Value,
) -> Exec<()> {
    if let Value::Dict(dict) = source {
        for (key, value) in dict.items() {
            insert_pair(map, key, value)?;
        }
        return Ok(());
    }
    for (index, item) in interp.collect(source)?.into_iter().enumerate() {
        let pair = match &item {
            Value::Str(_) | Value::List(_) | Value::Tuple(_) => interp.collect(&item)?,
            _ => {
                return type_error(format!(
                    "cannot convert dictionary update sequence element #{index} to a sequence"
                ));
            }
        };
        let [key, value]: [Value; 2] = pair.try_into().map_err(|pair: Vec<Value>| {
            Flow::raise(
                ExcKind::ValueError,
                format!(
                    "dictionary update sequence element #{index} has length {}; 2 is required",
                    pair.len()
                ),
            )
        })?;
        insert_pair(map, key, value)?;
    }
    Ok(())
}

fn insert_pair(map: &mut IndexMap<HashKey, (Value, Value)>, key: Value, value: Value) -> Exec<()> {
    let hash = key.hash_key()?;
    match map.get_mut(&hash) {
        Some(slot) => slot.1 = value,
        None => {
            map.insert(hash, (key, value));
        }
    }
    Ok(())
}

pub(crate) fn hash_all(items: Vec<Value>) -> Exec<IndexMap<HashKey, Value>> {
    let mut map = IndexMap::with_capacity(items.len());
    for item in items {
        map.entry(item.hash_key()?).or_insert(item);
    }
    Ok(map)
}

/// An `int` argument, as required by `range`, `chr` and friends.
pub(crate) fn index_arg(value: &Value) -> Exec<i64> {
    value.as_int().map_or_else(
        || {
            type_error(format!(
                "'{}' object cannot be interpreted as an integer",
                value.type_name()
            ))
        },
        Ok,
    )
}

fn to_int(value: &Value) -> Exec<Value> {
    match value {
        Value::Int(i) => Ok(Value::Int(*i)),
        Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
        Value::Float(x) => float_to_int(x.trunc()).map(Value::Int),
        Value::Str(text) => parse_int(text, 10),
        other => type_error(format!(
            "int() argument must be a string, a bytes-like object or a real number, not '{}'",
            other.type_name()
        )),
    }
}

/// Convert an integral float, failing the way Python does for NaN, infinity
/// and values outside the integer range.
pub(crate) fn float_to_int(x: f64) -> Exec<i64> {
    if x.is_nan() {
        return value_error("cannot convert float NaN to integer");
    }
    if x.is_infinite() {
        return raise(ExcKind::OverflowError, "cannot convert float infinity to integer");
    }
    if x < -9.223_372_036_854_776e18 || x >= 9.223_372_036_854_776e18 {
        return raise(ExcKind::OverflowError, "integer result does not fit in 64 bits");
    }
    Ok(x as i64)
}

/// `int(text, base)`; base 0 infers the base from the prefix.
pub(crate) fn parse_int(text: &str, base: u32) -> Exec<Value> {
    let invalid = || {
        Flow::raise(
            ExcKind::ValueError,
            format!(
                "invalid literal for int() with base {base}: {}",
                quote(text)
            ),
        )
    };
    let trimmed = text.trim();
    let (negative, unsigned) = match trimmed.as_bytes().first() {
        Some(b'-') => (true, &trimmed[1..]),
        Some(b'+') => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };
    let lower = unsigned.to_ascii_lowercase();
    let prefix = [("0x", 16), ("0o", 8), ("0b", 2)]
        .into_iter()
        .find(|(prefix, radix)| lower.starts_with(prefix) && (base == 0 || base == *radix));
    let (radix, digits) = match prefix {
        // A single underscore may follow the prefix.
        Some((_, radix)) => {
            let rest = &unsigned[2..];
            (radix, rest.strip_prefix('_').unwrap_or(rest))
        }
        None => (if base == 0 { 10 } else { base }, unsigned),
    };

    if digits.is_empty() || digits.starts_with('_') || digits.ends_with('_') || digits.contains("__")
    {
        return Err(invalid());
    }
    if base == 0 && radix == 10 && digits.starts_with('0') && digits.chars().any(|c| c != '0' && c != '_')
    {
        return Err(invalid());
    }
    let mut total: i128 = 0;
    for ch in digits.chars().filter(|c| *c != '_') {
        let digit = ch.to_digit(radix).ok_or_else(invalid)?;
        total = total
            .checked_mul(i128::from(radix))
            .and_then(|t| t.checked_add(i128::from(digit)))
            .ok_or_else(|| {
                Flow::raise(ExcKind::OverflowError, "integer result does not fit in 64 bits")
            })?;
    }
    let total = if negative { -total } else { total };
    i64::try_from(total).map(Value::Int).map_err(|_| {
        Flow::raise(ExcKind::OverflowError, "integer result does not fit in 64 bits")
    })
}

fn to_float(value: &Value) -> Exec<Value> {
    match value {
        Value::Str(text) => parse_float(text).map(Value::Float),
        other => other.as_float().map(Value::Float).map_or_else(
            || {
                type_error(format!(
                    "float() argument must be a string or a real number, not '{}'",
                    other.type_name()
                ))
            },
            Ok,
        ),
    }
}

pub(crate) fn parse_float(text: &str) -> Exec<f64> {
    let invalid = || {
        Flow::raise(
            ExcKind::ValueError,
            format!("could not convert string to float: {}", quote(text)),
        )
    };
    let trimmed = text.trim();
    let bytes = trimmed.as_bytes();
    let misplaced_underscore = bytes.iter().enumerate().any(|(i, b)| {
        *b == b'_'
            && !(i > 0
                && bytes[i - 1].is_ascii_digit()
                && bytes.get(i + 1).is_some_and(u8::is_ascii_digit))
    });
    if trimmed.is_empty() || misplaced_underscore {
        return Err(invalid());
    }
    trimmed.replace('_', "").parse::<f64>().map_err(|_| invalid())
}

// ---- natives ----

fn optional_str(value: Option<Value>, default: &str, what: &str) -> Exec<String> {
    match value {
        None | Some(Value::None) => Ok(default.to_string()),
        Some(Value::Str(s)) => Ok(s.to_string()),
        Some(other) => type_error(format!(
            "{what} must be None or a string, not {}",
            other.type_name()
        )),
    }
}

fn print(interp: &mut Interpreter, mut args: Args) -> Exec<Value> {
    let sep = optional_str(args.take_keyword("sep"), " ", "sep")?;
    let end = optional_str(args.take_keyword("end"), "\n", "end")?;
    args.take_keyword("flush");
    args.finish("print")?;
    let mut out = String::new();
    for (index, value) in args.positional.iter().enumerate() {
        if index > 0 {
            out.push_str(&sep);
        }
        out.push_str(&str_of(value)?);
    }
    out.push_str(&end);
    interp.write_stdout(&out)?;
    Ok(Value::None)
}

fn len(_: &mut Interpreter, args: Args) -> Exec<Value> {
    args.finish("len")?;
    args.expect("len", 1, 1)?;
    let len = match &args.positional[0] {
        Value::Str(s) => s.chars().count(),
        Value::List(list) => list.borrow().len(),
        Value::Tuple(tuple) => tuple.items().len(),
        Value::Dict(dict) => dict.len(),
        Value::Set(set) => set.borrow().len(),
        Value::Range(range) => {
            return i64::try_from(range.len()).map(Value::Int).map_err(|_| {
                Flow::raise(ExcKind::OverflowError, "range length does not fit in 64 bits")
            });
        }
        other => {
            return type_error(format!(
                "object of type '{}' has no len()",
                other.type_name()
            ));
        }
    };
    Ok(Value::Int(len as i64))
}

fn min(interp: &mut Interpreter, args: Args) -> Exec<Value> {
    extreme(interp, args, "min", true)
}

fn max(interp: &mut Interpreter, args: Args) -> Exec<Value> {
    extreme(interp, args, "max", false)
}

fn extreme(interp: &mut Interpreter, mut args: Args, name: &str, smallest: bool) -> Exec<Value> {
    let key = args.take_keyword("key").filter(|key| !key.is_none());
    let default = args.take_keyword("default");
    args.finish(name)?;
    let iterator = match args.positional.len() {
        0 => return type_error(format!("{name} expected at least 1 argument, got 0")),
        1 => interp.iterate(&args.positional[0])?,
        _ if default.is_some() => {
            return type_error(format!(
                "Cannot specify a default for {name}() with multiple positional arguments"
            ));
        }
        _ => interp.iterate(&Value::tuple(std::mem::take(&mut args.positional)))?,
    };

    let mut best: Option<(Value, Value)> = None;
    while let Some(item) = interp.next_item(&iterator)? {
        interp.tick()?;
        let item_key = match &key {
            Some(key) => interp.call(key, Args::new(vec![item.clone()]))?,
            None => item.clone(),
        };
        let replace = match &best {
            None => true,
            Some((best_key, _)) if smallest => ops::less_than(&item_key, best_key)?,
            Some((best_key, _)) => ops::less_than(best_key, &item_key)?,
        };
        if replace {
            best = Some((item_key, item));
        }
    }
    match (best, default) {
        (Some((_, item)), _) => Ok(item),
        (None, Some(default)) => Ok(default),
        (None, None) => value_error(format!("{name}() iterable argument is empty")),
    }
}

fn sum(interp: &mut Interpreter, mut args: Args) -> Exec<Value> {
    let start = args.take(1, "start");
    args.finish("sum")?;
    args.expect("sum", 1, 2)?;
    let mut total = start.unwrap_or(Value::Int(0));
    if matches!(total, Value::Str(_)) {
        return type_error("sum() can't sum strings [use ''.join(seq) instead]");
    }
    let iterator = interp.iterate(&args.positional[0])?;
    let max_len = interp.max_len();
    while let Some(item) = interp.next_item(&iterator)? {
        interp.tick()?;
        total = ops::binary(BinOp::Add, &total, &item, max_len)?;
    }
    Ok(total)
}

/// Sort `items` in place order, optionally by `key`; used by `sorted` and
/// `list.sort`.
pub(crate) fn sort_values(
    interp: &mut Interpreter,
    items: Vec<Value>,
    key: Option<Value>,
    reverse: bool,
) -> Exec<Vec<Value>> {
    let mut items = items;
    let mut keys = match &key {
        Some(key) => {
            let mut keys = Vec::with_capacity(items.len());
            for item in &items {
                interp.tick()?;
                keys.push(interp.call(key, Args::new(vec![item.clone()]))?);
            }
            keys
        }
        None => items.clone(),
    };
    // Reversing before and after a stable sort keeps equal items in their
    // original order.
    if reverse {
        items.reverse();
        keys.reverse();
    }
    let mut sorted = ops::sort_by_keys(keys, items, ops::less_than)?;
    if reverse {
        sorted.reverse();
    }
    Ok(sorted)
}

fn sort_options(args: &mut Args, name: &str) -> Exec<(Option<Value>, bool)> {
    let key = args.take_keyword("key").filter(|key| !key.is_none());
    let reverse = args.take_keyword("reverse").is_some_and(|r| r.truthy());
    args.finish(name)?;
    Ok((key, reverse))
}

fn sorted(interp: &mut Interpreter, mut args: Args) -> Exec<Value> {
    let (key, reverse) = sort_options(&mut args, "sorted")?;
    args.expect("sorted", 1, 1)?;
    let items = interp.collect(&args.positional[0])?;
    Ok(Value::list(sort_values(interp, items, key, reverse)?))
}

pub(crate) fn list_sort(interp: &mut Interpreter, list: &Value, mut args: Args) -> Exec<Value> {
    let (key, reverse) = sort_options(&mut args, "sort")?;
    args.expect("sort", 0, 0)?;
    let Value::List(list) = list else {
        return type_error("sort() needs a list");
    };
    let sorted = sort_values(interp, list.snapshot(), key, reverse)?;
    let old = std::mem::replace(&mut *list.borrow_mut(), sorted);
    drop(old);
    Ok(Value::None)
}

fn enumerate(interp: &mut Interpreter, mut args: Args) -> Exec<Value> {
    let start = args.take(1, "start");
    args.finish("enumerate")?;
    args.expect("enumerate", 1, 2)?;
    let count = match start {
        Some(start) => index_arg(&start)?,
        None => 0,
    };
    let inner = interp.iterate(&args.positional[0])?;
    Ok(Value::iterator(IterState::Enumerate { inner, count }))
}

fn zip(interp: &mut Interpreter, args: Args) -> Exec<Value> {
    args.finish("zip")?;
    let mut inners = Vec::with_capacity(args.len());
    for value in &args.positional {
        inners.push(interp.iterate(value)?);
    }
    if inners.is_empty() {
        return Ok(Value::iterator(IterState::Exhausted));
    }
    Ok(Value::iterator(IterState::Zip { inners }))
}

fn map(interp: &mut Interpreter, args: Args) -> Exec<Value> {
    args.finish("map")?;
    if args.len() < 2 {
        return type_error("map() must have at least two arguments.");
    }
    let mut inners = Vec::with_capacity(args.len() - 1);
    for value in &args.positional[1..] {
        inners.push(interp.iterate(value)?);
    }
    Ok(Value::iterator(IterState::Map {
        func: args.positional[0].clone(),
        inners,
    }))
}

fn filter(interp: &mut Interpreter, args: Args) -> Exec<Value> {
    args.finish("filter")?;
    args.expect("filter", 2, 2)?;
    let inner = interp.iterate(&args.positional[1])?;
    Ok(Value::iterator(IterState::Filter {
        func: args.positional[0].clone(),
        inner,
    }))
}

fn abs(_: &mut Interpreter, args: Args) -> Exec<Value> {
    args.finish("abs")?;
    args.expect("abs", 1, 1)?;
    match &args.positional[0] {
        Value::Int(i) => i.checked_abs().map(Value::Int).map_or_else(
            || raise(ExcKind::OverflowError, "integer result does not fit in 64 bits"),
            Ok,
        ),
        Value::Bool(b) => Ok(Value::Int(i64::from(*b))),
        Value::Float(x) => Ok(Value::Float(x.abs())),
        Value::TimeDelta(delta) => Ok(Value::TimeDelta(delta.abs())),
        other => type_error(format!(
            "bad operand type for abs(): '{}'",
            other.type_name()
        )),
    }
}

fn round(_: &mut Interpreter, mut args: Args) -> Exec<Value> {
    let ndigits = args.take(1, "ndigits").filter(|n| !n.is_none());
    args.finish("round")?;
    args.expect("round", 1, 2)?;
    let ndigits = ndigits.as_ref().map(index_arg).transpose()?;
    match (&args.positional[0], ndigits) {
        (Value::Int(_) | Value::Bool(_), None) => Ok(Value::Int(args.positional[0].as_int().unwrap_or(0))),
        (Value::Int(i), Some(n)) => round_int(*i, n).map(Value::Int),
        (Value::Bool(b), Some(n)) => round_int(i64::from(*b), n).map(Value::Int),
        (Value::Float(x), None) => float_to_int(x.round_ties_even()).map(Value::Int),
        (Value::Float(x), Some(n)) => Ok(Value::Float(round_float(*x, n))),
        (other, _) => type_error(format!(
            "type {} doesn't define __round__ method",
            other.type_name()
        )),
    }
}

fn round_int(value: i64, ndigits: i64) -> Exec<i64> {
    if ndigits >= 0 {
        return Ok(value);
    }
    let Some(scale) = u32::try_from(-ndigits).ok().and_then(|n| 10i128.checked_pow(n)) else {
        return Ok(0);
    };
    let value = i128::from(value);
    let quotient = value.div_euclid(scale);
    let remainder = value.rem_euclid(scale);
    let rounded = match (remainder * 2).cmp(&scale) {
        std::cmp::Ordering::Less => quotient,
        std::cmp::Ordering::Greater => quotient + 1,
        std::cmp::Ordering::Equal => quotient + (quotient & 1),
    };
    i64::try_from(rounded * scale).or_else(|_| ops::overflow())
}

fn round_float(x: f64, ndigits: i64) -> f64 {
    if !x.is_finite() || ndigits > 300 {
        return x;
    }
    if ndigits >= 0 {
        return format!("{x:.*}", ndigits as usize).parse().unwrap_or(x);
    }
    if ndigits < -308 {
        return 0.0 * x;
    }
    let scale = 10f64.powi((-ndigits) as i32);
    (x / scale).round_ties_even() * scale
}

fn reversed(interp: &mut Interpreter, args: Args) -> Exec<Value> {
    args.finish("reversed")?;
    args.expect("reversed", 1, 1)?;
    let state = match &args.positional[0] {
        Value::Range(range) => {
            let len = range.len();
            if len == 0 {
                IterState::Exhausted
            } else {
                let step = i128::from(range.step);
                let last = i128::from(range.start) + (len - 1) * step;
                IterState::Range {
                    next: last,
                    stop: i128::from(range.start) - step,
                    step: -step,
                }
            }
        }
        value @ (Value::List(_) | Value::Tuple(_) | Value::Str(_) | Value::Dict(_)) => {
            let mut items = interp.collect(value)?;
            items.reverse();
            IterState::Values(items.into_iter())
        }
        other => {
            return type_error(format!(
                "'{}' object is not reversible",
                other.type_name()
            ));
        }
    };
    Ok(Value::iterator(state))
}

fn any(interp: &mut Interpreter, args: Args) -> Exec<Value> {
    args.finish("any")?;
    args.expect("any", 1, 1)?;
    let iterator = interp.iterate(&args.positional[0])?;
    while let Some(item) = interp.next_item(&iterator)? {
        interp.tick()?;
        if item.truthy() {
            return Ok(Value::Bool(true));
        }
    }
    Ok(Value::Bool(false))
}

fn all(interp: &mut Interpreter, args: Args) -> Exec<Value> {
    args.finish("all")?;
    args.expect("all", 1, 1)?;
    let iterator = interp.iterate(&args.positional[0])?;
    while let Some(item) = interp.next_item(&iterator)? {
        interp.tick()?;
        if !item.truthy() {
            return Ok(Value::Bool(false));
        }
    }
    Ok(Value::Bool(true))
}

fn isinstance(_: &mut Interpreter, args: Args) -> Exec<Value> {
    args.finish("isinstance")?;
    args.expect("isinstance", 2, 2)?;
    let classes = match &args.positional[1] {
        Value::Tuple(tuple) => tuple.items().to_vec(),
        other => vec![other.clone()],
    };
    for class in classes {
        let Value::Class(class) = class else {
            return type_error(
                "isinstance() arg 2 must be a type, a tuple of types, or a union",
            );
        };
        if class.matches(&args.positional[0]) {
            return Ok(Value::Bool(true));
        }
    }
    Ok(Value::Bool(false))
}

fn repr_builtin(_: &mut Interpreter, args: Args) -> Exec<Value> {
    args.finish("repr")?;
    args.expect("repr", 1, 1)?;
    Ok(Value::str(repr(&args.positional[0])?))
}

fn chr(_: &mut Interpreter, args: Args) -> Exec<Value> {
    args.finish("chr")?;
    args.expect("chr", 1, 1)?;
    let code = index_arg(&args.positional[0])?;
    u32::try_from(code)
        .ok()
        .and_then(char::from_u32)
        .map(|ch| Value::str(ch.to_string()))
        .map_or_else(|| value_error("chr() arg not in range(0x110000)"), Ok)
}

fn ord(_: &mut Interpreter, args: Args) -> Exec<Value> {
    args.finish("ord")?;
    args.expect("ord", 1, 1)?;
    let Value::Str(text) = &args.positional[0] else {
        return type_error(format!(
            "ord() expected string of length 1, but {} found",
            args.positional[0].type_name()
        ));
    };
    let mut chars = text.chars();
    match (chars.next(), chars.next()) {
        (Some(ch), None) => Ok(Value::Int(i64::from(u32::from(ch)))),
        _ => type_error(format!(
            "ord() expected a character, but string of length {} found",
            text.chars().count()
        )),
    }
}

fn divmod(interp: &mut Interpreter, args: Args) -> Exec<Value> {
    args.finish("divmod")?;
    args.expect("divmod", 2, 2)?;
    let (a, b) = (&args.positional[0], &args.positional[1]);
    let max_len = interp.max_len();
    let quotient = ops::binary(BinOp::FloorDiv, a, b, max_len)?;
    let remainder = ops::binary(BinOp::Mod, a, b, max_len)?;
    Ok(Value::tuple(vec![quotient, remainder]))
}

fn pow(interp: &mut Interpreter, mut args: Args) -> Exec<Value> {
    let modulus = args.take(2, "mod").filter(|m| !m.is_none());
    args.finish("pow")?;
    args.expect("pow", 2, 3)?;
    let (base, exponent) = (&args.positional[0], &args.positional[1]);
    let Some(modulus) = modulus else {
        return ops::binary(BinOp::Pow, base, exponent, interp.max_len());
    };
    let (Some(base), Some(exponent), Some(modulus)) =
        (base.as_int(), exponent.as_int(), modulus.as_int())
    else {
        return type_error("pow() 3rd argument not allowed unless all arguments are integers");
    };
    if modulus == 0 {
        return value_error("pow() 3rd argument cannot be 0");
    }
    if exponent < 0 {
        return value_error("base is not invertible for the given modulus");
    }
    let m = i128::from(modulus);
    let mut result: i128 = 1;
    let mut factor = i128::from(base).rem_euclid(m.abs());
    let mut exponent = exponent;
    while exponent > 0 {
        if exponent & 1 == 1 {
            result = (result * factor).rem_euclid(m.abs());
        }
        factor = (factor * factor).rem_euclid(m.abs());
        exponent >>= 1;
    }
    if m < 0 && result != 0 {
        result += m;
    }
    Ok(Value::Int(result as i64))
}

fn radix(args: &Args, name: &str, prefix: &str, digits: fn(u64) -> String) -> Exec<Value> {
    args.finish(name)?;
    args.expect(name, 1, 1)?;
    let value = index_arg(&args.positional[0])?;
    let sign = if value < 0 { "-" } else { "" };
    Ok(Value::str(format!(
        "{sign}{prefix}{}",
        digits(value.unsigned_abs())
    )))
}

fn hex(_: &mut Interpreter, args: Args) -> Exec<Value> {
    radix(&args, "hex", "0x", |v| format!("{v:x}"))
}

fn oct(_: &mut Interpreter, args: Args) -> Exec<Value> {
    radix(&args, "oct", "0o", |v| format!("{v:o}"))
}

fn bin(_: &mut Interpreter, args: Args) -> Exec<Value> {
    radix(&args, "bin", "0b", |v| format!("{v:b}"))
}

fn iter(interp: &mut Interpreter, args: Args) -> Exec<Value> {
    args.finish("iter")?;
    args.expect("iter", 1, 1)?;
    Ok(Value::Iterator(interp.iterate(&args.positional[0])?))
}

fn next(interp: &mut Interpreter, args: Args) -> Exec<Value> {
    args.finish("next")?;
    args.expect("next", 1, 2)?;
    let Value::Iterator(iterator) = &args.positional[0] else {
        return type_error(format!(
            "'{}' object is not an iterator",
            args.positional[0].type_name()
        ));
    };
    match (interp.next_item(iterator)?, args.get(1)) {
        (Some(item), _) => Ok(item),
        (None, Some(default)) => Ok(default.clone()),
        (None, None) => Err(Flow::from_exception(Rc::new(ExceptionValue::new(
            ExcKind::StopIteration,
            Vec::new(),
        )))),
    }
}

fn hash(_: &mut Interpreter, args: Args) -> Exec<Value> {
    args.finish("hash")?;
    args.expect("hash", 1, 1)?;
    match args.positional[0].hash_key()? {
        HashKey::Int(i) => Ok(Value::Int(i)),
        HashKey::None => Ok(Value::Int(0)),
        key => {
            let mut hasher = DefaultHasher::new();
            key.hash(&mut hasher);
            Ok(Value::Int(hasher.finish() as i64))
        }
    }
}

fn format(_: &mut Interpreter, args: Args) -> Exec<Value> {
    args.finish("format")?;
    args.expect("format", 1, 2)?;
    let spec = match args.get(1) {
        None => "",
        Some(Value::Str(spec)) => spec,
        Some(other) => {
            return type_error(format!(
                "format() argument 2 must be str, not {}",
                other.type_name()
            ));
        }
    };
    Ok(Value::str(format_value(&args.positional[0], spec)?))
}

fn callable(_: &mut Interpreter, args: Args) -> Exec<Value> {
    args.finish("callable")?;
    args.expect("callable", 1, 1)?;
    Ok(Value::Bool(matches!(
        args.positional[0],
        Value::Function(_) | Value::Native(_) | Value::Method(_) | Value::Class(_)
    )))
}
