//! Attributes and methods of builtin values.
//!
//! `dict.keys()`, `dict.values()` and `dict.items()` return lists rather
//! than live views.

use std::rc::Rc;

use indexmap::IndexMap;

use crate::interp::Interpreter;
use crate::interp::builtins::{self, hash_all, index_arg};
use crate::interp::exception::{ExcKind, ExceptionValue, Exec, Flow, raise, type_error, value_error};
use crate::interp::format::{repr, str_format};
use crate::interp::modules::datetime;
use crate::interp::ops;
use crate::interp::value::{
    Args, BoundMethod, Class, DictObj, HashKey, ListObj, Native, SetObj, TupleObj, TypeKind, Value,
};

const STR_METHODS: &[&str] = &[
    "capitalize", "casefold", "center", "count", "endswith", "find", "format", "index", "isalnum",
    "isalpha", "isdecimal", "isdigit", "isidentifier", "islower", "isnumeric", "isspace",
    "istitle", "isupper", "join", "ljust", "lower", "lstrip", "partition", "removeprefix",
    "removesuffix", "replace", "rfind", "rindex", "rjust", "rpartition", "rsplit", "rstrip",
    "split", "splitlines", "startswith", "strip", "swapcase", "title", "upper", "zfill",
];

const LIST_METHODS: &[&str] = &[
    "append", "clear", "copy", "count", "extend", "index", "insert", "pop", "remove", "reverse",
    "sort",
];

const DICT_METHODS: &[&str] = &[
    "clear", "copy", "get", "items", "keys", "pop", "popitem", "setdefault", "update", "values",
];

const SET_METHODS: &[&str] = &[
    "add",
    "clear",
    "copy",
    "difference",
    "difference_update",
    "discard",
    "intersection",
    "intersection_update",
    "isdisjoint",
    "issubset",
    "issuperset",
    "pop",
    "remove",
    "symmetric_difference",
    "union",
    "update",
];

const TUPLE_METHODS: &[&str] = &["count", "index"];
const INT_METHODS: &[&str] = &["bit_length", "is_integer"];
const FLOAT_METHODS: &[&str] = &["is_integer"];

static FROMKEYS: Native = Native {
    name: "fromkeys",
    func: dict_fromkeys,
};

fn method_names(value: &Value) -> &'static [&'static str] {
    match value {
        Value::Str(_) => STR_METHODS,
        Value::List(_) => LIST_METHODS,
        Value::Dict(_) => DICT_METHODS,
        Value::Set(_) => SET_METHODS,
        Value::Tuple(_) => TUPLE_METHODS,
        Value::Int(_) | Value::Bool(_) => INT_METHODS,
        Value::Float(_) => FLOAT_METHODS,
        Value::Date(_) | Value::DateTime(_) | Value::TimeDelta(_) => datetime::method_names(value),
        _ => &[],
    }
}

/// Resolve `object.attr`, binding methods to their receiver.
pub fn lookup(object: &Value, attr: &str) -> Option<Value> {
    let data = match object {
        Value::Exception(exc) if attr == "args" => Some(Value::tuple(exc.args.clone())),
        Value::Range(range) => match attr {
            "start" => Some(Value::Int(range.start)),
            "stop" => Some(Value::Int(range.stop)),
            "step" => Some(Value::Int(range.step)),
            _ => None,
        },
        Value::Date(_) | Value::DateTime(_) | Value::TimeDelta(_) => {
            datetime::attribute(object, attr)
        }
        Value::Class(Class::Type(TypeKind::Dict)) if attr == "fromkeys" => {
            Some(Value::Native(&FROMKEYS))
        }
        Value::Class(Class::Type(kind)) => datetime::class_attribute(*kind, attr),
        _ => None,
    };
    if data.is_some() {
        return data;
    }
    method_names(object)
        .iter()
        .find(|name| **name == attr)
        .map(|name| {
            Value::Method(Rc::new(BoundMethod {
                receiver: object.clone(),
                name: *name,
            }))
        })
}

/// Invoke the method `name` bound to `receiver`.
pub fn call_method(
    interp: &mut Interpreter,
    receiver: &Value,
    name: &str,
    args: Args,
) -> Exec<Value> {
    match receiver {
        Value::Str(text) => str_method(interp, text, name, args),
        Value::List(list) => list_method(interp, receiver, list, name, args),
        Value::Dict(dict) => dict_method(interp, dict, name, args),
        Value::Set(set) => set_method(interp, set, name, args),
        Value::Tuple(tuple) => tuple_method(tuple, name, args),
        Value::Int(_) | Value::Bool(_) => {
            args.finish(name)?;
            args.expect(name, 0, 0)?;
            let value = receiver.as_int().unwrap_or(0);
            match name {
                "bit_length" => Ok(Value::Int(i64::from(64 - value.unsigned_abs().leading_zeros()))),
                _ => Ok(Value::Bool(true)),
            }
        }
        Value::Float(x) => {
            args.finish(name)?;
            args.expect(name, 0, 0)?;
            Ok(Value::Bool(x.is_finite() && x.fract() == 0.0))
        }
        Value::Date(_) | Value::DateTime(_) | Value::TimeDelta(_) => {
            datetime::call_method(interp, receiver, name, args)
        }
        other => raise(
            ExcKind::AttributeError,
            format!("'{}' object has no attribute '{name}'", other.type_name()),
        ),
    }
}

// ---- str ----

fn str_arg<'a>(value: &'a Value, method: &str) -> Exec<&'a str> {
    match value {
        Value::Str(s) => Ok(s),
        other => type_error(format!(
            "{method}() argument must be str, not {}",
            other.type_name()
        )),
    }
}

fn optional_chars<'a>(value: Option<&'a Value>, method: &str) -> Exec<Option<&'a str>> {
    match value {
        None | Some(Value::None) => Ok(None),
        Some(value) => str_arg(value, method).map(Some),
    }
}

/// Byte offsets of the character window `start..end`, with slice semantics.
fn byte_window(text: &str, start: Option<&Value>, end: Option<&Value>) -> Exec<(usize, usize)> {
    let count = text.chars().count() as i64;
    let clamp = |value: i64| {
        if value < 0 {
            (value + count).max(0)
        } else {
            value.min(count)
        }
    };
    let bound = |value: Option<&Value>, default: i64| -> Exec<i64> {
        match value {
            None | Some(Value::None) => Ok(default),
            Some(value) => index_arg(value).map(clamp),
        }
    };
    let start = bound(start, 0)?;
    let end = bound(end, count)?.max(start);
    let to_byte = |index: i64| {
        text.char_indices()
            .nth(index as usize)
            .map_or(text.len(), |(byte, _)| byte)
    };
    Ok((to_byte(start), to_byte(end)))
}

fn char_index(text: &str, byte: usize) -> i64 {
    text[..byte].chars().count() as i64
}

fn strs(items: Vec<&str>) -> Value {
    Value::list(items.into_iter().map(Value::str).collect())
}

fn str_method(interp: &mut Interpreter, text: &Rc<str>, name: &str, mut args: Args) -> Exec<Value> {
    let max_len = interp.max_len();
    if name == "format" {
        return Ok(Value::str(str_format(text, &args.positional, &args.keywords)?));
    }
    if matches!(name, "split" | "rsplit") {
        let sep = args.take(0, "sep");
        let maxsplit = args.take(1, "maxsplit");
        args.finish(name)?;
        args.expect(name, 0, 2)?;
        let sep = optional_chars(sep.as_ref(), name)?;
        let maxsplit = maxsplit.as_ref().map(index_arg).transpose()?.unwrap_or(-1);
        return split(text, sep, maxsplit, name == "rsplit").map(strs);
    }
    if name == "splitlines" {
        let keepends = args.take(0, "keepends").is_some_and(|v| v.truthy());
        args.finish(name)?;
        return Ok(strs(splitlines(text, keepends)));
    }
    args.finish(name)?;
    let arg = |index: usize| args.positional.get(index);

    let result = match name {
        "upper" | "lower" | "casefold" | "swapcase" | "title" | "capitalize" => {
            args.expect(name, 0, 0)?;
            Value::str(change_case(text, name))
        }
        "strip" | "lstrip" | "rstrip" => {
            args.expect(name, 0, 1)?;
            let chars = optional_chars(arg(0), name)?;
            let matcher = |c: char| match chars {
                Some(chars) => chars.contains(c),
                None => c.is_whitespace(),
            };
            let stripped = match name {
                "strip" => text.trim_matches(matcher),
                "lstrip" => text.trim_start_matches(matcher),
                _ => text.trim_end_matches(matcher),
            };
            Value::str(stripped)
        }
        "join" => {
            args.expect(name, 1, 1)?;
            let items = interp.collect(&args.positional[0])?;
            let mut out = String::new();
            for (index, item) in items.iter().enumerate() {
                let Value::Str(part) = item else {
                    return type_error(format!(
                        "sequence item {index}: expected str instance, {} found",
                        item.type_name()
                    ));
                };
                if index > 0 {
                    out.push_str(text);
                }
                out.push_str(part);
                ops::check_len(out.len(), max_len)?;
            }
            Value::str(out)
        }
        "replace" => {
            args.expect(name, 2, 3)?;
            let old = str_arg(&args.positional[0], name)?;
            let new = str_arg(&args.positional[1], name)?;
            let count = arg(2).map(index_arg).transpose()?.unwrap_or(-1);
            let occurrences = if old.is_empty() {
                text.chars().count() + 1
            } else {
                text.matches(old).count()
            };
            let replaced = if count < 0 {
                occurrences
            } else {
                occurrences.min(count as usize)
            };
            let grown = text.len() + replaced.saturating_mul(new.len());
            ops::check_len(grown, max_len)?;
            if count < 0 {
                Value::str(text.replace(old, new))
            } else {
                Value::str(text.replacen(old, new, count as usize))
            }
        }
        "find" | "rfind" | "index" | "rindex" => {
            args.expect(name, 1, 3)?;
            let sub = str_arg(&args.positional[0], name)?;
            let (start, end) = byte_window(text, arg(1), arg(2))?;
            let window = &text[start..end];
            let found = if name.starts_with('r') {
                window.rfind(sub)
            } else {
                window.find(sub)
            };
            match found {
                Some(byte) => Value::Int(char_index(text, start + byte)),
                None if name.ends_with("find") => Value::Int(-1),
                None => return value_error("substring not found"),
            }
        }
        "count" => {
            args.expect(name, 1, 3)?;
            let sub = str_arg(&args.positional[0], name)?;
            let (start, end) = byte_window(text, arg(1), arg(2))?;
            let window = &text[start..end];
            let count = if sub.is_empty() {
                window.chars().count() + 1
            } else {
                window.matches(sub).count()
            };
            Value::Int(count as i64)
        }
        "startswith" | "endswith" => {
            args.expect(name, 1, 3)?;
            let (start, end) = byte_window(text, arg(1), arg(2))?;
            let window = &text[start..end];
            let candidates = match &args.positional[0] {
                Value::Tuple(tuple) => tuple.items().to_vec(),
                other => vec![other.clone()],
            };
            let mut matched = false;
            for candidate in &candidates {
                let Value::Str(affix) = candidate else {
                    return type_error(format!(
                        "{name} first arg must be str or a tuple of str, not {}",
                        candidate.type_name()
                    ));
                };
                matched |= if name == "startswith" {
                    window.starts_with(&**affix)
                } else {
                    window.ends_with(&**affix)
                };
            }
            Value::Bool(matched)
        }
        "isalnum" | "isalpha" | "isdecimal" | "isdigit" | "isnumeric" | "isspace" | "islower"
        | "isupper" | "istitle" | "isidentifier" => {
            args.expect(name, 0, 0)?;
            Value::Bool(predicate(text, name))
        }
        "center" | "ljust" | "rjust" => {
            args.expect(name, 1, 2)?;
            let width = index_arg(&args.positional[0])?;
            let fill = match arg(1) {
                None => ' ',
                Some(value) => {
                    let fill = str_arg(value, name)?;
                    let mut chars = fill.chars();
                    match (chars.next(), chars.next()) {
                        (Some(c), None) => c,
                        _ => {
                            return type_error(
                                "The fill character must be exactly one character long",
                            );
                        }
                    }
                }
            };
            ops::check_len(usize::try_from(width).unwrap_or(0), max_len)?;
            Value::str(justify(text, width, fill, name))
        }
        "zfill" => {
            args.expect(name, 1, 1)?;
            let width = index_arg(&args.positional[0])?;
            ops::check_len(usize::try_from(width).unwrap_or(0), max_len)?;
            let len = text.chars().count() as i64;
            if width <= len {
                Value::Str(text.clone())
            } else {
                let zeros = "0".repeat((width - len) as usize);
                match text.strip_prefix(['+', '-']) {
                    Some(rest) => Value::str(format!("{}{zeros}{rest}", &text[..1])),
                    None => Value::str(format!("{zeros}{text}")),
                }
            }
        }
        "partition" | "rpartition" => {
            args.expect(name, 1, 1)?;
            let sep = str_arg(&args.positional[0], name)?;
            if sep.is_empty() {
                return value_error("empty separator");
            }
            let found = if name == "partition" {
                text.find(sep)
            } else {
                text.rfind(sep)
            };
            let parts = match found {
                Some(at) => [&text[..at], sep, &text[at + sep.len()..]],
                None if name == "partition" => [&**text, "", ""],
                None => ["", "", &**text],
            };
            Value::tuple(parts.into_iter().map(Value::str).collect())
        }
        "removeprefix" | "removesuffix" => {
            args.expect(name, 1, 1)?;
            let affix = str_arg(&args.positional[0], name)?;
            let trimmed = if name == "removeprefix" {
                text.strip_prefix(affix)
            } else {
                text.strip_suffix(affix)
            };
            Value::str(trimmed.unwrap_or(&**text))
        }
        _ => {
            return raise(
                ExcKind::AttributeError,
                format!("'str' object has no attribute '{name}'"),
            );
        }
    };
    Ok(result)
}

fn change_case(text: &str, name: &str) -> String {
    match name {
        "upper" => text.to_uppercase(),
        "lower" | "casefold" => text.to_lowercase(),
        "swapcase" => text
            .chars()
            .flat_map(|c| -> Box<dyn Iterator<Item = char>> {
                if c.is_uppercase() {
                    Box::new(c.to_lowercase())
                } else {
                    Box::new(c.to_uppercase())
                }
            })
            .collect(),
        "title" => {
            let mut out = String::with_capacity(text.len());
            let mut previous_cased = false;
            for c in text.chars() {
                if previous_cased {
                    out.extend(c.to_lowercase());
                } else {
                    out.extend(c.to_uppercase());
                }
                previous_cased = c.is_alphabetic();
            }
            out
        }
        _ => {
            let mut chars = text.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(char::to_lowercase))
                    .collect(),
                None => String::new(),
            }
        }
    }
}

fn predicate(text: &str, name: &str) -> bool {
    let mut chars = text.chars();
    match name {
        "isalnum" => !text.is_empty() && chars.all(char::is_alphanumeric),
        "isalpha" => !text.is_empty() && chars.all(char::is_alphabetic),
        "isdecimal" | "isdigit" => !text.is_empty() && chars.all(|c| c.is_ascii_digit()),
        "isnumeric" => !text.is_empty() && chars.all(char::is_numeric),
        "isspace" => !text.is_empty() && chars.all(char::is_whitespace),
        "islower" => text.chars().any(char::is_lowercase) && !text.chars().any(char::is_uppercase),
        "isupper" => text.chars().any(char::is_uppercase) && !text.chars().any(char::is_lowercase),
        "isidentifier" => {
            chars.next().is_some_and(|c| c == '_' || c.is_alphabetic())
                && chars.all(|c| c == '_' || c.is_alphanumeric())
        }
        _ => {
            let mut cased = false;
            let mut previous_cased = false;
            for c in chars {
                if c.is_uppercase() {
                    if previous_cased {
                        return false;
                    }
                    previous_cased = true;
                    cased = true;
                } else if c.is_lowercase() {
                    if !previous_cased {
                        return false;
                    }
                    previous_cased = true;
                    cased = true;
                } else {
                    previous_cased = false;
                }
            }
            cased
        }
    }
}

fn justify(text: &str, width: i64, fill: char, name: &str) -> String {
    let len = text.chars().count() as i64;
    if width <= len {
        return text.to_string();
    }
    let pad = width - len;
    let left = match name {
        "ljust" => 0,
        "rjust" => pad,
        _ => pad / 2 + (pad & width & 1),
    };
    let fill_run = |n: i64| std::iter::repeat_n(fill, n as usize);
    fill_run(left)
        .chain(text.chars())
        .chain(fill_run(pad - left))
        .collect()
}

fn split<'a>(text: &'a str, sep: Option<&str>, maxsplit: i64, from_right: bool) -> Exec<Vec<&'a str>> {
    let limit = usize::try_from(maxsplit).ok();
    let Some(sep) = sep else {
        return Ok(split_whitespace(text, limit, from_right));
    };
    if sep.is_empty() {
        return value_error("empty separator");
    }
    Ok(match (limit, from_right) {
        (None, _) => text.split(sep).collect(),
        (Some(n), false) => text.splitn(n + 1, sep).collect(),
        (Some(n), true) => {
            let mut parts: Vec<&str> = text.rsplitn(n + 1, sep).collect();
            parts.reverse();
            parts
        }
    })
}

fn split_whitespace(text: &str, limit: Option<usize>, from_right: bool) -> Vec<&str> {
    let mut parts = Vec::new();
    if !from_right {
        let mut rest = text.trim_start();
        while !rest.is_empty() {
            if limit == Some(parts.len()) {
                parts.push(rest);
                break;
            }
            match rest.find(char::is_whitespace) {
                Some(at) => {
                    parts.push(&rest[..at]);
                    rest = rest[at..].trim_start();
                }
                None => {
                    parts.push(rest);
                    break;
                }
            }
        }
        return parts;
    }
    let mut rest = text.trim_end();
    while !rest.is_empty() {
        if limit == Some(parts.len()) {
            parts.push(rest);
            break;
        }
        match rest.rfind(char::is_whitespace) {
            Some(at) => {
                let width = rest[at..].chars().next().map_or(1, char::len_utf8);
                parts.push(&rest[at + width..]);
                rest = rest[..at].trim_end();
            }
            None => {
                parts.push(rest);
                break;
            }
        }
    }
    parts.reverse();
    parts
}

fn splitlines(text: &str, keepends: bool) -> Vec<&str> {
    let mut lines = Vec::new();
    let mut start = 0;
    let mut chars = text.char_indices().peekable();
    while let Some((at, c)) = chars.next() {
        let is_break = matches!(
            c,
            '\n' | '\r'
                | '\x0b'
                | '\x0c'
                | '\x1c'
                | '\x1d'
                | '\x1e'
                | '\u{85}'
                | '\u{2028}'
                | '\u{2029}'
        );
        if !is_break {
            continue;
        }
        let mut end = at + c.len_utf8();
        if c == '\r' && chars.peek().is_some_and(|(_, next)| *next == '\n') {
            chars.next();
            end += 1;
        }
        lines.push(if keepends { &text[start..end] } else { &text[start..at] });
        start = end;
    }
    if start < text.len() {
        lines.push(&text[start..]);
    }
    lines
}

// ---- list ----

fn position(items: &[Value], target: &Value) -> Exec<Option<usize>> {
    for (index, item) in items.iter().enumerate() {
        if item.is(target) || ops::equals(item, target)? {
            return Ok(Some(index));
        }
    }
    Ok(None)
}

fn occurrences(items: &[Value], target: &Value) -> Exec<i64> {
    let mut count = 0;
    for item in items {
        if item.is(target) || ops::equals(item, target)? {
            count += 1;
        }
    }
    Ok(count)
}

/// Index range for `list.index(x, start, end)`.
fn search_range(len: usize, start: Option<&Value>, end: Option<&Value>) -> Exec<(usize, usize)> {
    let len = len as i64;
    let clamp = |value: i64| {
        if value < 0 {
            (value + len).max(0)
        } else {
            value.min(len)
        }
    };
    let start = start.map(index_arg).transpose()?.map_or(0, clamp);
    let end = end.map(index_arg).transpose()?.map_or(len, clamp);
    Ok((start as usize, end.max(start) as usize))
}

fn list_method(
    interp: &mut Interpreter,
    receiver: &Value,
    list: &Rc<ListObj>,
    name: &str,
    mut args: Args,
) -> Exec<Value> {
    if name == "sort" {
        return builtins::list_sort(interp, receiver, args);
    }
    args.finish(name)?;
    let max_len = interp.max_len();
    match name {
        "append" => {
            args.expect(name, 1, 1)?;
            ops::check_len(list.borrow().len() + 1, max_len)?;
            let item = args.positional.swap_remove(0);
            list.borrow_mut().push(item);
            Ok(Value::None)
        }
        "extend" => {
            args.expect(name, 1, 1)?;
            let items = interp.collect(&args.positional[0])?;
            ops::check_len(list.borrow().len() + items.len(), max_len)?;
            list.borrow_mut().extend(items);
            Ok(Value::None)
        }
        "insert" => {
            args.expect(name, 2, 2)?;
            let index = index_arg(&args.positional[0])?;
            ops::check_len(list.borrow().len() + 1, max_len)?;
            let item = args.positional.swap_remove(1);
            let mut items = list.borrow_mut();
            let len = items.len() as i64;
            let at = if index < 0 { (index + len).max(0) } else { index.min(len) };
            items.insert(at as usize, item);
            Ok(Value::None)
        }
        "pop" => {
            args.expect(name, 0, 1)?;
            let index = args.get(0).map(index_arg).transpose()?.unwrap_or(-1);
            let mut items = list.borrow_mut();
            if items.is_empty() {
                return raise(ExcKind::IndexError, "pop from empty list");
            }
            let len = items.len() as i64;
            let at = if index < 0 { index + len } else { index };
            if !(0..len).contains(&at) {
                return raise(ExcKind::IndexError, "pop index out of range");
            }
            Ok(items.remove(at as usize))
        }
        "remove" => {
            args.expect(name, 1, 1)?;
            let snapshot = list.snapshot();
            let Some(at) = position(&snapshot, &args.positional[0])? else {
                return value_error("list.remove(x): x not in list");
            };
            let removed = {
                let mut items = list.borrow_mut();
                (at < items.len()).then(|| items.remove(at))
            };
            drop(removed);
            Ok(Value::None)
        }
        "index" => {
            args.expect(name, 1, 3)?;
            let snapshot = list.snapshot();
            let (start, end) = search_range(snapshot.len(), args.get(1), args.get(2))?;
            match position(&snapshot[start..end], &args.positional[0])? {
                Some(at) => Ok(Value::Int((start + at) as i64)),
                None => value_error(format!("{} is not in list", repr(&args.positional[0])?)),
            }
        }
        "count" => {
            args.expect(name, 1, 1)?;
            Ok(Value::Int(occurrences(&list.snapshot(), &args.positional[0])?))
        }
        "clear" => {
            args.expect(name, 0, 0)?;
            let old = std::mem::take(&mut *list.borrow_mut());
            drop(old);
            Ok(Value::None)
        }
        "copy" => {
            args.expect(name, 0, 0)?;
            Ok(Value::list(list.snapshot()))
        }
        "reverse" => {
            args.expect(name, 0, 0)?;
            list.borrow_mut().reverse();
            Ok(Value::None)
        }
        _ => raise(
            ExcKind::AttributeError,
            format!("'list' object has no attribute '{name}'"),
        ),
    }
}

// ---- tuple ----

fn tuple_method(tuple: &Rc<TupleObj>, name: &str, args: Args) -> Exec<Value> {
    args.finish(name)?;
    let items = tuple.items();
    match name {
        "count" => {
            args.expect(name, 1, 1)?;
            Ok(Value::Int(occurrences(items, &args.positional[0])?))
        }
        "index" => {
            args.expect(name, 1, 3)?;
            let (start, end) = search_range(items.len(), args.get(1), args.get(2))?;
            match position(&items[start..end], &args.positional[0])? {
                Some(at) => Ok(Value::Int((start + at) as i64)),
                None => value_error("tuple.index(x): x not in tuple"),
            }
        }
        _ => raise(
            ExcKind::AttributeError,
            format!("'tuple' object has no attribute '{name}'"),
        ),
    }
}

// ---- dict ----

fn key_error(key: Value) -> Flow {
    Flow::from_exception(Rc::new(ExceptionValue::new(ExcKind::KeyError, vec![key])))
}

fn dict_method(interp: &mut Interpreter, dict: &Rc<DictObj>, name: &str, mut args: Args) -> Exec<Value> {
    if name == "update" {
        args.expect(name, 0, 1)?;
        let mut incoming = IndexMap::new();
        if let Some(source) = args.get(0) {
            builtins::update_dict(interp, &mut incoming, source)?;
        }
        for (key, value) in std::mem::take(&mut args.keywords) {
            incoming.insert(HashKey::Str(key.clone()), (Value::Str(key), value));
        }
        let max_len = interp.max_len();
        for (hash, (key, value)) in incoming {
            if !dict.borrow().contains_key(&hash) {
                ops::check_len(dict.len() + 1, max_len)?;
            }
            dict.insert(hash, key, value);
        }
        return Ok(Value::None);
    }
    args.finish(name)?;
    match name {
        "keys" => {
            args.expect(name, 0, 0)?;
            Ok(Value::list(dict.keys()))
        }
        "values" => {
            args.expect(name, 0, 0)?;
            Ok(Value::list(dict.values()))
        }
        "items" => {
            args.expect(name, 0, 0)?;
            Ok(Value::list(
                dict.items()
                    .into_iter()
                    .map(|(key, value)| Value::tuple(vec![key, value]))
                    .collect(),
            ))
        }
        "get" => {
            args.expect(name, 1, 2)?;
            let hash = args.positional[0].hash_key()?;
            Ok(dict
                .get(&hash)
                .or_else(|| args.get(1).cloned())
                .unwrap_or(Value::None))
        }
        "pop" => {
            args.expect(name, 1, 2)?;
            let hash = args.positional[0].hash_key()?;
            match (dict.remove(&hash), args.get(1)) {
                (Some(value), _) => Ok(value),
                (None, Some(default)) => Ok(default.clone()),
                (None, None) => Err(key_error(args.positional[0].clone())),
            }
        }
        "popitem" => {
            args.expect(name, 0, 0)?;
            let popped = dict.borrow_mut().pop();
            match popped {
                Some((_, (key, value))) => Ok(Value::tuple(vec![key, value])),
                None => raise(ExcKind::KeyError, "popitem(): dictionary is empty"),
            }
        }
        "setdefault" => {
            args.expect(name, 1, 2)?;
            let hash = args.positional[0].hash_key()?;
            if let Some(existing) = dict.get(&hash) {
                return Ok(existing);
            }
            ops::check_len(dict.len() + 1, interp.max_len())?;
            let default = args.get(1).cloned().unwrap_or(Value::None);
            dict.insert(hash, args.positional[0].clone(), default.clone());
            Ok(default)
        }
        "clear" => {
            args.expect(name, 0, 0)?;
            let old = std::mem::take(&mut *dict.borrow_mut());
            drop(old);
            Ok(Value::None)
        }
        "copy" => {
            args.expect(name, 0, 0)?;
            Ok(Value::dict(dict.borrow().clone()))
        }
        _ => raise(
            ExcKind::AttributeError,
            format!("'dict' object has no attribute '{name}'"),
        ),
    }
}

fn dict_fromkeys(interp: &mut Interpreter, args: Args) -> Exec<Value> {
    args.finish("fromkeys")?;
    args.expect("fromkeys", 1, 2)?;
    let value = args.get(1).cloned().unwrap_or(Value::None);
    let mut map = IndexMap::new();
    for key in interp.collect(&args.positional[0])? {
        map.entry(key.hash_key()?)
            .or_insert_with(|| (key, value.clone()));
    }
    Ok(Value::dict(map))
}

// ---- set ----

fn set_method(interp: &mut Interpreter, set: &Rc<SetObj>, name: &str, args: Args) -> Exec<Value> {
    args.finish(name)?;
    let mut others = Vec::with_capacity(args.len());
    if !matches!(name, "add" | "remove" | "discard") {
        for value in &args.positional {
            others.push(hash_all(interp.collect(value)?)?);
        }
    }
    let current = || set.borrow().clone();
    let replace = |map: IndexMap<HashKey, Value>| {
        let old = std::mem::replace(&mut *set.borrow_mut(), map);
        drop(old);
    };
    let max_len = interp.max_len();

    match name {
        "add" => {
            args.expect(name, 1, 1)?;
            let item = &args.positional[0];
            let hash = item.hash_key()?;
            if !set.contains(&hash) {
                ops::check_len(set.borrow().len() + 1, max_len)?;
                set.borrow_mut().insert(hash, item.clone());
            }
            Ok(Value::None)
        }
        "remove" | "discard" => {
            args.expect(name, 1, 1)?;
            let item = &args.positional[0];
            let removed = set.borrow_mut().shift_remove(&item.hash_key()?);
            if removed.is_none() && name == "remove" {
                return Err(key_error(item.clone()));
            }
            Ok(Value::None)
        }
        "pop" => {
            args.expect(name, 0, 0)?;
            let popped = set.borrow_mut().shift_remove_index(0);
            match popped {
                Some((_, item)) => Ok(item),
                None => raise(ExcKind::KeyError, "pop from an empty set"),
            }
        }
        "clear" => {
            args.expect(name, 0, 0)?;
            replace(IndexMap::new());
            Ok(Value::None)
        }
        "copy" => {
            args.expect(name, 0, 0)?;
            Ok(Value::set(current()))
        }
        "union" | "update" => {
            let mut map = current();
            for other in others {
                for (hash, item) in other {
                    map.entry(hash).or_insert(item);
                }
                ops::check_len(map.len(), max_len)?;
            }
            if name == "update" {
                replace(map);
                return Ok(Value::None);
            }
            Ok(Value::set(map))
        }
        "intersection" | "intersection_update" => {
            let mut map = current();
            for other in &others {
                map.retain(|hash, _| other.contains_key(hash));
            }
            if name == "intersection_update" {
                replace(map);
                return Ok(Value::None);
            }
            Ok(Value::set(map))
        }
        "difference" | "difference_update" => {
            let mut map = current();
            for other in &others {
                map.retain(|hash, _| !other.contains_key(hash));
            }
            if name == "difference_update" {
                replace(map);
                return Ok(Value::None);
            }
            Ok(Value::set(map))
        }
        "symmetric_difference" => {
            args.expect(name, 1, 1)?;
            let mine = current();
            let theirs = others.swap_remove(0);
            let mut map: IndexMap<HashKey, Value> = mine
                .iter()
                .filter(|(hash, _)| !theirs.contains_key(*hash))
                .map(|(hash, item)| (hash.clone(), item.clone()))
                .collect();
            for (hash, item) in theirs {
                if !mine.contains_key(&hash) {
                    map.insert(hash, item);
                }
            }
            Ok(Value::set(map))
        }
        "issubset" | "issuperset" | "isdisjoint" => {
            args.expect(name, 1, 1)?;
            let mine = set.borrow();
            let theirs = &others[0];
            let result = match name {
                "issubset" => mine.keys().all(|hash| theirs.contains_key(hash)),
                "issuperset" => theirs.keys().all(|hash| mine.contains_key(hash)),
                _ => !mine.keys().any(|hash| theirs.contains_key(hash)),
            };
            Ok(Value::Bool(result))
        }
        _ => raise(
            ExcKind::AttributeError,
            format!("'set' object has no attribute '{name}'"),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yare::parameterized;

    fn words(items: Vec<&str>) -> Vec<String> {
        items.into_iter().map(String::from).collect()
    }

    #[parameterized(
        whitespace = { "  a b\t c  ", None, -1, false, &["a", "b", "c"] },
        whitespace_limited = { "a b  c ", None, 1, false, &["a", "b  c "] },
        whitespace_from_right = { " a b  c", None, 1, true, &[" a b", "c"] },
        separator = { "a,b,,c", Some(","), -1, false, &["a", "b", "", "c"] },
        separator_limited = { "a,b,c", Some(","), 1, false, &["a", "b,c"] },
        separator_from_right = { "a,b,c", Some(","), 1, true, &["a,b", "c"] },
        empty_text = { "", None, -1, false, &[] },
    )]
    fn splitting(text: &str, sep: Option<&str>, maxsplit: i64, from_right: bool, expected: &[&str]) {
        let parts = split(text, sep, maxsplit, from_right).unwrap();
        assert_eq!(words(parts), words(expected.to_vec()));
    }

    #[test]
    fn whitespace_from_right_keeps_leading_text() {
        let parts = split_whitespace("  a b", Some(1), true);
        assert_eq!(parts, vec!["  a", "b"]);
    }

    #[test]
    fn empty_separator_is_rejected() {
        assert!(split("abc", Some(""), -1, false).is_err());
    }

    #[test]
    fn line_splitting() {
        assert_eq!(splitlines("a\nb\r\nc", false), vec!["a", "b", "c"]);
        assert_eq!(splitlines("a\nb\n", true), vec!["a\n", "b\n"]);
        assert!(splitlines("", false).is_empty());
    }

    #[parameterized(
        upper = { "upper", "Hello World", "HELLO WORLD" },
        lower = { "lower", "Hello World", "hello world" },
        title = { "title", "hello wORLD 2go", "Hello World 2Go" },
        capitalize = { "capitalize", "hELLO", "Hello" },
        swapcase = { "swapcase", "Hello", "hELLO" },
    )]
    fn case_changes(method: &str, text: &str, expected: &str) {
        assert_eq!(change_case(text, method), expected);
    }

    #[test]
    fn justification_matches_python() {
        assert_eq!(justify("ab", 5, '*', "center"), "**ab*");
        assert_eq!(justify("abc", 6, '*', "center"), "*abc**");
        assert_eq!(justify("ab", 4, '-', "ljust"), "ab--");
        assert_eq!(justify("ab", 4, '-', "rjust"), "--ab");
        assert_eq!(justify("abcdef", 3, ' ', "center"), "abcdef");
    }

    #[test]
    fn predicates() {
        assert!(predicate("abc", "isalpha"));
        assert!(!predicate("", "isalpha"));
        assert!(predicate("123", "isdigit"));
        assert!(predicate("Hello World", "istitle"));
        assert!(!predicate("Hello world", "istitle"));
        assert!(predicate("abc1", "islower"));
        assert!(predicate("_name1", "isidentifier"));
        assert!(!predicate("1name", "isidentifier"));
    }

    #[test]
    fn methods_bind_to_receiver() {
        let Some(Value::Method(method)) = lookup(&Value::str("x"), "upper") else {
            panic!("expected a bound method");
        };
        assert_eq!(method.name, "upper");
        assert!(lookup(&Value::str("x"), "nope").is_none());
        assert!(matches!(
            lookup(&Value::Class(Class::Type(TypeKind::Dict)), "fromkeys"),
            Some(Value::Native(_))
        ));
    }
}
