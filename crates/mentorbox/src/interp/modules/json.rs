//! The `json` module: `dumps` formats like Python's encoder, `loads` parses
//! with `serde_json`.

use std::fmt::Write;

use indexmap::IndexMap;

use crate::interp::Interpreter;
use crate::interp::builtins::index_arg;
use crate::interp::exception::{ExcKind, ExceptionValue, Exec, Flow, raise, type_error, value_error};
use crate::interp::format::float_repr;
use crate::interp::modules::{Member, ModuleDef};
use crate::interp::ops;
use crate::interp::value::{Args, Class, MAX_VALUE_DEPTH, Native, Value};

pub static MODULE: ModuleDef = ModuleDef {
    name: "json",
    members: &[
        ("JSONDecodeError", Member::Class(Class::Exception(ExcKind::JSONDecodeError))),
        ("dumps", Member::Func(Native { name: "dumps", func: dumps })),
        ("loads", Member::Func(Native { name: "loads", func: loads })),
    ],
};

/// Encoded text beyond this size fails with `MemoryError`.
const ENCODE_LIMIT: usize = 1 << 24;

struct Encoder<'a> {
    interp: &'a mut Interpreter,
    out: String,
    indent: Option<String>,
    item_separator: String,
    key_separator: String,
    sort_keys: bool,
    ensure_ascii: bool,
    default: Option<Value>,
    active: Vec<usize>,
}

impl Encoder<'_> {
    fn encode(&mut self, value: &Value, depth: usize) -> Exec<()> {
        if depth > MAX_VALUE_DEPTH {
            return raise(
                ExcKind::RecursionError,
                "maximum recursion depth exceeded while encoding a JSON object",
            );
        }
        if self.out.len() > ENCODE_LIMIT {
            return raise(ExcKind::MemoryError, "JSON result is too large");
        }
        match value {
            Value::None => self.out.push_str("null"),
            Value::Bool(true) => self.out.push_str("true"),
            Value::Bool(false) => self.out.push_str("false"),
            Value::Int(i) => {
                let _ = write!(self.out, "{i}");
            }
            Value::Float(x) => self.out.push_str(&float_text(*x)),
            Value::Str(text) => self.string(text),
            Value::List(_) | Value::Tuple(_) => {
                let items = match value {
                    Value::List(list) => list.snapshot(),
                    Value::Tuple(tuple) => tuple.items().to_vec(),
                    _ => Vec::new(),
                };
                self.enter(value)?;
                self.array(&items, depth)?;
                self.active.pop();
            }
            Value::Dict(dict) => {
                let items = dict.items();
                self.enter(value)?;
                self.object(items, depth)?;
                self.active.pop();
            }
            other => {
                let Some(default) = self.default.clone() else {
                    return type_error(format!(
                        "Object of type {} is not JSON serializable",
                        other.type_name()
                    ));
                };
                let replacement = self.interp.call(&default, Args::new(vec![other.clone()]))?;
                self.encode(&replacement, depth + 1)?;
            }
        }
        Ok(())
    }

    fn enter(&mut self, value: &Value) -> Exec<()> {
        if let Some(id) = value.container_id() {
            if self.active.contains(&id) {
                return value_error("Circular reference detected");
            }
            self.active.push(id);
        }
        Ok(())
    }

    fn newline(&mut self, depth: usize) {
        if let Some(indent) = &self.indent {
            self.out.push('\n');
            for _ in 0..depth {
                self.out.push_str(indent);
            }
        }
    }

    fn array(&mut self, items: &[Value], depth: usize) -> Exec<()> {
        if items.is_empty() {
            self.out.push_str("[]");
            return Ok(());
        }
        self.out.push('[');
        for (index, item) in items.iter().enumerate() {
            if index > 0 {
                let separator = self.item_separator.clone();
                self.out.push_str(&separator);
            }
            self.newline(depth + 1);
            self.encode(item, depth + 1)?;
        }
        self.newline(depth);
        self.out.push(']');
        Ok(())
    }

    fn object(&mut self, items: Vec<(Value, Value)>, depth: usize) -> Exec<()> {
        if items.is_empty() {
            self.out.push_str("{}");
            return Ok(());
        }
        let mut entries = Vec::with_capacity(items.len());
        for (key, value) in items {
            entries.push((key_text(&key)?, value));
        }
        if self.sort_keys {
            entries.sort_by(|a, b| a.0.cmp(&b.0));
        }
        self.out.push('{');
        for (index, (key, value)) in entries.iter().enumerate() {
            if index > 0 {
                let separator = self.item_separator.clone();
                self.out.push_str(&separator);
            }
            self.newline(depth + 1);
            self.string(key);
            let separator = self.key_separator.clone();
            self.out.push_str(&separator);
            self.encode(value, depth + 1)?;
        }
        self.newline(depth);
        self.out.push('}');
        Ok(())
    }

    fn string(&mut self, text: &str) {
        self.out.push('"');
        for ch in text.chars() {
            match ch {
                '"' => self.out.push_str("\\\""),
                '\\' => self.out.push_str("\\\\"),
                '\n' => self.out.push_str("\\n"),
                '\r' => self.out.push_str("\\r"),
                '\t' => self.out.push_str("\\t"),
                '\u{8}' => self.out.push_str("\\b"),
                '\u{c}' => self.out.push_str("\\f"),
                c if (c as u32) < 0x20 || (self.ensure_ascii && !c.is_ascii()) => {
                    let mut units = [0u16; 2];
                    for unit in c.encode_utf16(&mut units) {
                        let _ = write!(self.out, "\\u{unit:04x}");
                    }
                }
                c => self.out.push(c),
            }
        }
        self.out.push('"');
    }
}

fn float_text(x: f64) -> String {
    if x.is_nan() {
        "NaN".to_string()
    } else if x.is_infinite() {
        if x > 0.0 { "Infinity" } else { "-Infinity" }.to_string()
    } else {
        float_repr(x)
    }
}

/// Object keys are coerced to strings the way Python's encoder does.
fn key_text(key: &Value) -> Exec<String> {
    Ok(match key {
        Value::Str(text) => text.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(x) => float_text(*x),
        Value::Bool(b) => b.to_string(),
        Value::None => "null".to_string(),
        other => {
            return type_error(format!(
                "keys must be str, int, float, bool or None, not {}",
                other.type_name()
            ));
        }
    })
}

fn separators(value: Value) -> Exec<(String, String)> {
    let parts = match &value {
        Value::Tuple(tuple) => tuple.items().to_vec(),
        Value::List(list) => list.snapshot(),
        _ => Vec::new(),
    };
    match parts.as_slice() {
        [Value::Str(item), Value::Str(key)] => Ok((item.to_string(), key.to_string())),
        _ => type_error("separators must be a (item_separator, key_separator) pair of strings"),
    }
}

fn dumps(interp: &mut Interpreter, mut args: Args) -> Exec<Value> {
    let indent = args.take_keyword("indent");
    let sort_keys = args.take_keyword("sort_keys").is_some_and(|v| v.truthy());
    let ensure_ascii = args.take_keyword("ensure_ascii").is_none_or(|v| v.truthy());
    let separator_arg = args.take_keyword("separators");
    let default = args.take_keyword("default").filter(|v| !v.is_none());
    args.finish("dumps")?;
    args.expect("dumps", 1, 1)?;

    let indent = match indent {
        None | Some(Value::None) => None,
        Some(Value::Str(text)) => Some(text.to_string()),
        Some(value) => Some(" ".repeat(index_arg(&value)?.clamp(0, 64) as usize)),
    };
    let (item_separator, key_separator) = match separator_arg {
        Some(value) if !value.is_none() => separators(value)?,
        _ if indent.is_some() => (",".to_string(), ": ".to_string()),
        _ => (", ".to_string(), ": ".to_string()),
    };

    let mut encoder = Encoder {
        interp,
        out: String::new(),
        indent,
        item_separator,
        key_separator,
        sort_keys,
        ensure_ascii,
        default,
        active: Vec::new(),
    };
    encoder.encode(&args.positional[0], 0)?;
    Ok(Value::str(encoder.out))
}

fn loads(interp: &mut Interpreter, args: Args) -> Exec<Value> {
    args.finish("loads")?;
    args.expect("loads", 1, 1)?;
    let Value::Str(text) = &args.positional[0] else {
        return type_error(format!(
            "the JSON object must be str, bytes or bytearray, not {}",
            args.positional[0].type_name()
        ));
    };
    let parsed: serde_json::Value = match serde_json::from_str(text) {
        Ok(parsed) => parsed,
        Err(err) => return Err(decode_error(text, &err)),
    };
    from_json(parsed, interp.max_len())
}

/// Python reports decode errors with 1-based line/column and a 0-based
/// character offset.
fn decode_error(text: &str, err: &serde_json::Error) -> Flow {
    let message = err.to_string();
    let message = message.split(" at line ").next().unwrap_or(&message);
    let (line, column) = (err.line().max(1), err.column().max(1));
    let offset: usize = text
        .split('\n')
        .take(line - 1)
        .map(|l| l.chars().count() + 1)
        .sum::<usize>()
        + column
        - 1;
    Flow::from_exception(std::rc::Rc::new(ExceptionValue::with_message(
        ExcKind::JSONDecodeError,
        format!("{message}: line {line} column {column} (char {offset})"),
    )))
}

fn from_json(value: serde_json::Value, max_len: usize) -> Exec<Value> {
    Ok(match value {
        serde_json::Value::Null => Value::None,
        serde_json::Value::Bool(b) => Value::Bool(b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        serde_json::Value::String(s) => Value::str(s),
        serde_json::Value::Array(items) => {
            ops::check_len(items.len(), max_len)?;
            Value::list(
                items
                    .into_iter()
                    .map(|item| from_json(item, max_len))
                    .collect::<Exec<Vec<_>>>()?,
            )
        }
        serde_json::Value::Object(entries) => {
            ops::check_len(entries.len(), max_len)?;
            let mut map = IndexMap::with_capacity(entries.len());
            for (key, value) in entries {
                let key = Value::str(key);
                map.insert(key.hash_key()?, (key, from_json(value, max_len)?));
            }
            Value::dict(map)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::{CancelToken, Limits, OutputBuffer};

    fn interpreter() -> Interpreter {
        Interpreter::new(
            OutputBuffer::new(1024),
            OutputBuffer::new(1024),
            CancelToken::new(),
            Limits {
                max_recursion_depth: 50,
                max_collection_len: 1000,
            },
            vec!["json"],
        )
    }

    fn dumps_with(value: Value, keywords: Vec<(&str, Value)>) -> Exec<String> {
        let mut args = Args::new(vec![value]);
        args.keywords = keywords
            .into_iter()
            .map(|(key, value)| (key.into(), value))
            .collect();
        match dumps(&mut interpreter(), args)? {
            Value::Str(text) => Ok(text.to_string()),
            other => panic!("dumps returned {other:?}"),
        }
    }

    fn sample_dict() -> Value {
        let mut map = IndexMap::new();
        for (key, value) in [
            ("b", Value::list(vec![Value::Int(1), Value::Float(2.5)])),
            ("a", Value::None),
        ] {
            let key = Value::str(key);
            map.insert(key.hash_key().unwrap(), (key, value));
        }
        Value::dict(map)
    }

    #[test]
    fn dumps_uses_python_separators() {
        assert_eq!(
            dumps_with(sample_dict(), Vec::new()).unwrap(),
            r#"{"b": [1, 2.5], "a": null}"#
        );
    }

    #[test]
    fn dumps_indents_and_sorts() {
        let text = dumps_with(
            sample_dict(),
            vec![("indent", Value::Int(2)), ("sort_keys", Value::Bool(true))],
        )
        .unwrap();
        assert_eq!(text, "{\n  \"a\": null,\n  \"b\": [\n    1,\n    2.5\n  ]\n}");
    }

    #[test]
    fn dumps_escapes_non_ascii() {
        assert_eq!(
            dumps_with(Value::str("é\n"), Vec::new()).unwrap(),
            r#""\u00e9\n""#
        );
        assert_eq!(
            dumps_with(Value::str("é"), vec![("ensure_ascii", Value::Bool(false))]).unwrap(),
            "\"é\""
        );
    }

    #[test]
    fn dumps_rejects_unserializable_values() {
        let range = Value::Range(crate::interp::value::Range {
            start: 0,
            stop: 1,
            step: 1,
        });
        let result = dumps_with(range, Vec::new());
        assert!(matches!(result, Err(Flow::Exception(raised)) if raised.exc.kind == ExcKind::TypeError));
    }

    #[test]
    fn dumps_detects_cycles() {
        let list = Value::list(Vec::new());
        if let Value::List(inner) = &list {
            inner.borrow_mut().push(list.clone());
        }
        let result = dumps_with(list.clone(), Vec::new());
        if let Value::List(inner) = &list {
            inner.borrow_mut().clear();
        }
        assert!(matches!(result, Err(Flow::Exception(raised)) if raised.exc.kind == ExcKind::ValueError));
    }

    #[test]
    fn loads_builds_values() {
        let mut interp = interpreter();
        let parsed = loads(&mut interp, Args::new(vec![Value::str(r#"{"x": [1, 2.0, "s"]}"#)]));
        let Ok(Value::Dict(dict)) = parsed else {
            panic!("loads did not return a dict");
        };
        let Some(Value::List(items)) = dict.get(&Value::str("x").hash_key().unwrap()) else {
            panic!("missing key");
        };
        assert_eq!(items.borrow().len(), 3);
    }

    #[test]
    fn loads_reports_position() {
        let mut interp = interpreter();
        let result = loads(&mut interp, Args::new(vec![Value::str("[1,\n 2,")]));
        let Err(Flow::Exception(raised)) = result else {
            panic!("expected JSONDecodeError");
        };
        assert_eq!(raised.exc.kind, ExcKind::JSONDecodeError);
        let Some(Value::Str(message)) = raised.exc.args.first() else {
            panic!("missing message");
        };
        assert!(message.contains("line 2"), "{message}");
    }
}
