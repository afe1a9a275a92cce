//! Text conversion of values: `repr`, `str`, format specs, `%` and
//! `str.format`.

use std::fmt::Write as _;

use chrono::{Datelike, Timelike};

use crate::interp::exception::{ExcKind, Exec, raise, type_error, value_error};
use crate::interp::modules::datetime::{strftime, timedelta_parts};
use crate::interp::value::{Class, MAX_VALUE_DEPTH, Value};

/// Largest string `repr`/`str` will build.
const REPR_LIMIT: usize = 16 * 1024 * 1024;

pub fn repr(value: &Value) -> Exec<String> {
    let mut writer = ReprWriter::default();
    writer.write(value, 0)?;
    Ok(writer.out)
}

/// Python `str()`.
pub fn str_of(value: &Value) -> Exec<String> {
    match value {
        Value::Str(s) => Ok(s.to_string()),
        Value::Exception(exc) => exception_message(&exc.kind, &exc.args),
        Value::Date(date) => Ok(date.format("%Y-%m-%d").to_string()),
        Value::DateTime(dt) => Ok(datetime_str(dt, ' ')),
        Value::TimeDelta(delta) => Ok(timedelta_str(delta)),
        other => repr(other),
    }
}

/// `repr` that never fails, for diagnostics.
pub fn repr_lossy(value: &Value) -> String {
    repr(value).unwrap_or_else(|_| format!("<{} object>", value.type_name()))
}

/// Message part of `Kind: message` for an exception.
pub fn exception_message(kind: &ExcKind, args: &[Value]) -> Exec<String> {
    match args {
        [] => Ok(String::new()),
        [single] if *kind == ExcKind::KeyError => repr(single),
        [single] => str_of(single),
        many => repr(&Value::tuple(many.to_vec())),
    }
}

#[derive(Default)]
struct ReprWriter {
    out: String,
    active: Vec<usize>,
}

impl ReprWriter {
    fn write(&mut self, value: &Value, depth: usize) -> Exec<()> {
        if depth > MAX_VALUE_DEPTH {
            return raise(
                ExcKind::RecursionError,
                "maximum recursion depth exceeded while getting the repr of an object",
            );
        }
        if self.out.len() > REPR_LIMIT {
            return raise(ExcKind::MemoryError, "repr result is too large");
        }

        if let Some(id) = value.container_id() {
            if self.active.contains(&id) {
                self.out.push_str(match value {
                    Value::Dict(_) => "{...}",
                    Value::List(_) => "[...]",
                    _ => "(...)",
                });
                return Ok(());
            }
            self.active.push(id);
            let result = self.write_container(value, depth);
            self.active.pop();
            return result;
        }

        match value {
            Value::None => self.out.push_str("None"),
            Value::Ellipsis => self.out.push_str("Ellipsis"),
            Value::Bool(true) => self.out.push_str("True"),
            Value::Bool(false) => self.out.push_str("False"),
            Value::Int(i) => {
                let _ = write!(self.out, "{i}");
            }
            Value::Float(x) => self.out.push_str(&float_repr(*x)),
            Value::Str(s) => self.out.push_str(&quote(s)),
            Value::Range(r) => {
                if r.step == 1 {
                    let _ = write!(self.out, "range({}, {})", r.start, r.stop);
                } else {
                    let _ = write!(self.out, "range({}, {}, {})", r.start, r.stop, r.step);
                }
            }
            Value::Function(f) => {
                let _ = write!(self.out, "<function {}>", f.def.name);
            }
            Value::Native(n) => {
                let _ = write!(self.out, "<built-in function {}>", n.name);
            }
            Value::Method(m) => {
                let _ = write!(
                    self.out,
                    "<built-in method {} of {} object>",
                    m.name,
                    m.receiver.type_name()
                );
            }
            Value::Module(m) => {
                let _ = write!(self.out, "<module '{}' (built-in)>", m.name);
            }
            Value::Class(Class::Type(kind)) => {
                let _ = write!(self.out, "<class '{}'>", kind.qualified_name());
            }
            Value::Class(Class::Exception(kind)) => {
                let _ = write!(self.out, "<class '{}'>", kind.name());
            }
            Value::Exception(exc) => {
                self.out.push_str(exc.kind.name());
                if exc.args.len() == 1 {
                    self.out.push('(');
                    self.write(&exc.args[0], depth + 1)?;
                    self.out.push(')');
                } else {
                    self.write_sequence(&exc.args, '(', ')', depth)?;
                }
            }
            Value::Iterator(_) => self.out.push_str("<iterator object>"),
            Value::Date(d) => {
                let _ = write!(
                    self.out,
                    "datetime.date({}, {}, {})",
                    d.year(),
                    d.month(),
                    d.day()
                );
            }
            Value::DateTime(dt) => {
                let _ = write!(
                    self.out,
                    "datetime.datetime({}, {}, {}, {}, {}",
                    dt.year(),
                    dt.month(),
                    dt.day(),
                    dt.hour(),
                    dt.minute()
                );
                let micros = dt.nanosecond() / 1000;
                if dt.second() != 0 || micros != 0 {
                    let _ = write!(self.out, ", {}", dt.second());
                }
                if micros != 0 {
                    let _ = write!(self.out, ", {micros}");
                }
                self.out.push(')');
            }
            Value::TimeDelta(delta) => {
                let (days, seconds, micros) = timedelta_parts(delta);
                let mut fields = Vec::new();
                if days != 0 {
                    fields.push(format!("days={days}"));
                }
                if seconds != 0 {
                    fields.push(format!("seconds={seconds}"));
                }
                if micros != 0 {
                    fields.push(format!("microseconds={micros}"));
                }
                if fields.is_empty() {
                    fields.push("0".to_string());
                }
                let _ = write!(self.out, "datetime.timedelta({})", fields.join(", "));
            }
            Value::List(_) | Value::Tuple(_) | Value::Dict(_) | Value::Set(_) => {}
        }
        Ok(())
    }

    fn write_container(&mut self, value: &Value, depth: usize) -> Exec<()> {
        match value {
            Value::List(list) => {
                let items = list.borrow();
                self.write_sequence(&items, '[', ']', depth)
            }
            Value::Tuple(tuple) => {
                let items = tuple.items();
                if items.len() == 1 {
                    self.out.push('(');
                    self.write(&items[0], depth + 1)?;
                    self.out.push_str(",)");
                    Ok(())
                } else {
                    self.write_sequence(items, '(', ')', depth)
                }
            }
            Value::Set(set) => {
                let items = set.snapshot();
                if items.is_empty() {
                    self.out.push_str("set()");
                    Ok(())
                } else {
                    self.write_sequence(&items, '{', '}', depth)
                }
            }
            Value::Dict(dict) => {
                let entries = dict.items();
                self.out.push('{');
                for (index, (key, value)) in entries.iter().enumerate() {
                    if index > 0 {
                        self.out.push_str(", ");
                    }
                    self.write(key, depth + 1)?;
                    self.out.push_str(": ");
                    self.write(value, depth + 1)?;
                }
                self.out.push('}');
                Ok(())
            }
            _ => Ok(()),
        }
    }

    fn write_sequence(
        &mut self,
        items: &[Value],
        open: char,
        close: char,
        depth: usize,
    ) -> Exec<()> {
        self.out.push(open);
        for (index, item) in items.iter().enumerate() {
            if index > 0 {
                self.out.push_str(", ");
            }
            self.write(item, depth + 1)?;
        }
        self.out.push(close);
        Ok(())
    }
}

/// Quote a string the way Python's `repr` does.
pub fn quote(s: &str) -> String {
    let delimiter = if s.contains('\'') && !s.contains('"') {
        '"'
    } else {
        '\''
    };
    let mut out = String::with_capacity(s.len() + 2);
    out.push(delimiter);
    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if c == delimiter => {
                out.push('\\');
                out.push(c);
            }
            c if (c as u32) < 0x20 || c as u32 == 0x7f => {
                let _ = write!(out, "\\x{:02x}", c as u32);
            }
            c if c.is_control() => {
                if (c as u32) <= 0xff {
                    let _ = write!(out, "\\x{:02x}", c as u32);
                } else {
                    let _ = write!(out, "\\u{:04x}", c as u32);
                }
            }
            c => out.push(c),
        }
    }
    out.push(delimiter);
    out
}

/// Shortest round-tripping float text, switching to exponent notation
/// outside `1e-4 <= |x| < 1e16`.
pub fn float_repr(x: f64) -> String {
    if x.is_nan() {
        return "nan".to_string();
    }
    if x.is_infinite() {
        return if x > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if x == 0.0 {
        return if x.is_sign_negative() { "-0.0" } else { "0.0" }.to_string();
    }

    let sci = format!("{:e}", x.abs());
    let Some((mantissa, exponent)) = sci.split_once('e') else {
        return format!("{x}");
    };
    let exponent: i32 = exponent.parse().unwrap_or(0);
    let digits: String = mantissa.chars().filter(|c| *c != '.').collect();
    let sign = if x < 0.0 { "-" } else { "" };

    if (-4..16).contains(&exponent) {
        let (int_part, frac_part) = if exponent >= 0 {
            let int_len = exponent as usize + 1;
            if digits.len() <= int_len {
                (
                    format!("{digits}{}", "0".repeat(int_len - digits.len())),
                    "0".to_string(),
                )
            } else {
                (digits[..int_len].to_string(), digits[int_len..].to_string())
            }
        } else {
            (
                "0".to_string(),
                format!("{}{digits}", "0".repeat((-exponent - 1) as usize)),
            )
        };
        format!("{sign}{int_part}.{frac_part}")
    } else {
        let mantissa = if digits.len() == 1 {
            digits
        } else {
            format!("{}.{}", &digits[..1], &digits[1..])
        };
        let exp_sign = if exponent < 0 { '-' } else { '+' };
        format!("{sign}{mantissa}e{exp_sign}{:02}", exponent.abs())
    }
}

pub fn datetime_str(dt: &chrono::NaiveDateTime, separator: char) -> String {
    let mut text = dt.format(&format!("%Y-%m-%d{separator}%H:%M:%S")).to_string();
    let micros = dt.nanosecond() / 1000;
    if micros != 0 {
        let _ = write!(text, ".{micros:06}");
    }
    text
}

pub fn timedelta_str(delta: &chrono::TimeDelta) -> String {
    let (days, seconds, micros) = timedelta_parts(delta);
    let mut text = String::new();
    if days != 0 {
        let plural = if days.abs() == 1 { "" } else { "s" };
        let _ = write!(text, "{days} day{plural}, ");
    }
    let _ = write!(
        text,
        "{}:{:02}:{:02}",
        seconds / 3600,
        (seconds % 3600) / 60,
        seconds % 60
    );
    if micros != 0 {
        let _ = write!(text, ".{micros:06}");
    }
    text
}

// ---- format spec mini-language ----

#[derive(Debug, Clone)]
pub struct Spec {
    fill: char,
    align: Option<char>,
    sign: char,
    alternate: bool,
    zero: bool,
    width: usize,
    grouping: Option<char>,
    precision: Option<usize>,
    kind: Option<char>,
}

impl Default for Spec {
    fn default() -> Self {
        Self {
            fill: ' ',
            align: None,
            sign: '-',
            alternate: false,
            zero: false,
            width: 0,
            grouping: None,
            precision: None,
            kind: None,
        }
    }
}

pub fn parse_spec(text: &str) -> Exec<Spec> {
    let chars: Vec<char> = text.chars().collect();
    let mut spec = Spec::default();
    let mut i = 0;
    let is_align = |c: char| matches!(c, '<' | '>' | '^' | '=');

    if chars.len() >= 2 && is_align(chars[1]) {
        spec.fill = chars[0];
        spec.align = Some(chars[1]);
        i = 2;
    } else if chars.first().is_some_and(|c| is_align(*c)) {
        spec.align = Some(chars[0]);
        i = 1;
    }
    if let Some(&c) = chars.get(i)
        && matches!(c, '+' | '-' | ' ')
    {
        spec.sign = c;
        i += 1;
    }
    if chars.get(i) == Some(&'#') {
        spec.alternate = true;
        i += 1;
    }
    if chars.get(i) == Some(&'0') {
        spec.zero = true;
        i += 1;
    }
    let start = i;
    while chars.get(i).is_some_and(char::is_ascii_digit) {
        i += 1;
    }
    if i > start {
        spec.width = digits_value(&chars[start..i])?;
    }
    if let Some(&c) = chars.get(i)
        && matches!(c, ',' | '_')
    {
        spec.grouping = Some(c);
        i += 1;
    }
    if chars.get(i) == Some(&'.') {
        i += 1;
        let start = i;
        while chars.get(i).is_some_and(char::is_ascii_digit) {
            i += 1;
        }
        if i == start {
            return value_error("Format specifier missing precision");
        }
        spec.precision = Some(digits_value(&chars[start..i])?);
    }
    if i < chars.len() {
        spec.kind = Some(chars[i]);
        i += 1;
    }
    if i < chars.len() {
        return value_error("Invalid format specifier");
    }
    Ok(spec)
}

fn digits_value(digits: &[char]) -> Exec<usize> {
    let text: String = digits.iter().collect();
    match text.parse::<usize>() {
        Ok(n) if n <= 1_000_000 => Ok(n),
        _ => value_error("Too many decimal digits in format string"),
    }
}

/// Python `format(value, spec)`.
pub fn format_value(value: &Value, spec_text: &str) -> Exec<String> {
    if spec_text.is_empty() {
        return str_of(value);
    }
    match value {
        Value::Date(_) | Value::DateTime(_) => return strftime(value, spec_text),
        _ => {}
    }
    let spec = parse_spec(spec_text)?;
    match value {
        Value::Bool(b) if spec.kind.is_none() => format_str(if *b { "True" } else { "False" }, &spec),
        Value::Int(_) | Value::Bool(_) => format_int(value.as_int().unwrap_or(0), &spec),
        Value::Float(x) => format_float(*x, &spec),
        Value::Str(s) => format_str(s, &spec),
        other if spec.kind.is_none() && spec.precision.is_none() && spec.sign == '-' => {
            format_str(&str_of(other)?, &spec)
        }
        other => type_error(format!(
            "unsupported format string passed to {}.__format__",
            other.type_name()
        )),
    }
}

fn format_str(text: &str, spec: &Spec) -> Exec<String> {
    if let Some(kind) = spec.kind
        && kind != 's'
    {
        return value_error(format!(
            "Unknown format code '{kind}' for object of type 'str'"
        ));
    }
    if spec.sign != '-' {
        return value_error("Sign not allowed in string format specifier");
    }
    if spec.align == Some('=') {
        return value_error("'=' alignment not allowed in string format specifier");
    }
    let body: String = match spec.precision {
        Some(p) => text.chars().take(p).collect(),
        None => text.to_string(),
    };
    Ok(pad("", &body, spec, '<'))
}

fn format_int(value: i64, spec: &Spec) -> Exec<String> {
    let kind = spec.kind.unwrap_or('d');
    if matches!(kind, 'e' | 'E' | 'f' | 'F' | 'g' | 'G' | '%') {
        return format_float(value as f64, spec);
    }
    if spec.precision.is_some() {
        return value_error("Precision not allowed in integer format specifier");
    }

    let magnitude = i128::from(value).unsigned_abs();
    let (digits, prefix, group_size) = match kind {
        'd' | 'n' => (magnitude.to_string(), "", 3),
        'b' => (format!("{magnitude:b}"), "0b", 4),
        'o' => (format!("{magnitude:o}"), "0o", 4),
        'x' => (format!("{magnitude:x}"), "0x", 4),
        'X' => (format!("{magnitude:X}"), "0X", 4),
        'c' => {
            let ch = u32::try_from(value)
                .ok()
                .and_then(char::from_u32)
                .ok_or(())
                .or_else(|_| raise(ExcKind::OverflowError, "%c arg not in range(0x110000)"))?;
            return Ok(pad("", &ch.to_string(), spec, '<'));
        }
        other => {
            return value_error(format!(
                "Unknown format code '{other}' for object of type 'int'"
            ));
        }
    };

    let digits = match spec.grouping {
        Some(',') if group_size == 4 => {
            return value_error(format!("Cannot specify ',' with '{kind}'."));
        }
        Some(separator) => group_digits(&digits, separator, group_size),
        None => digits,
    };

    let mut head = sign_text(value < 0, spec.sign).to_string();
    if spec.alternate {
        head.push_str(prefix);
    }
    Ok(pad(&head, &digits, spec, '>'))
}

fn format_float(value: f64, spec: &Spec) -> Exec<String> {
    let negative = value.is_sign_negative() && !value.is_nan();
    let magnitude = value.abs();
    let upper = spec.kind.is_some_and(|k| k.is_ascii_uppercase());

    let mut body = if !magnitude.is_finite() {
        let text = if magnitude.is_nan() { "nan" } else { "inf" };
        let text = if upper {
            text.to_uppercase()
        } else {
            text.to_string()
        };
        if spec.kind == Some('%') {
            format!("{text}%")
        } else {
            text
        }
    } else {
        match spec.kind {
            Some('f') | Some('F') => format!("{:.*}", spec.precision.unwrap_or(6), magnitude),
            Some('e') | Some('E') => {
                let text = exponent_notation(magnitude, spec.precision.unwrap_or(6));
                if upper { text.to_uppercase() } else { text }
            }
            Some('g') | Some('G') => {
                let text = general_notation(magnitude, spec.precision.unwrap_or(6), spec.alternate);
                if upper { text.to_uppercase() } else { text }
            }
            Some('%') => format!("{:.*}%", spec.precision.unwrap_or(6), magnitude * 100.0),
            None => match spec.precision {
                None => float_repr(magnitude),
                Some(precision) => {
                    let text = general_notation(magnitude, precision, spec.alternate);
                    if text.contains(['.', 'e']) {
                        text
                    } else {
                        format!("{text}.0")
                    }
                }
            },
            Some(other) => {
                return value_error(format!(
                    "Unknown format code '{other}' for object of type 'float'"
                ));
            }
        }
    };

    if let Some(separator) = spec.grouping {
        let split = body.find(|c: char| !c.is_ascii_digit()).unwrap_or(body.len());
        let (int_part, rest) = body.split_at(split);
        body = format!("{}{rest}", group_digits(int_part, separator, 3));
    }

    let head = sign_text(negative, spec.sign);
    Ok(pad(head, &body, spec, '>'))
}

/// `d.dddde+XX` with Python's two-digit minimum exponent.
fn exponent_notation(magnitude: f64, precision: usize) -> String {
    let text = format!("{magnitude:.precision$e}");
    match text.split_once('e') {
        Some((mantissa, exponent)) => {
            let exponent: i32 = exponent.parse().unwrap_or(0);
            let sign = if exponent < 0 { '-' } else { '+' };
            format!("{mantissa}e{sign}{:02}", exponent.abs())
        }
        None => text,
    }
}

fn general_notation(magnitude: f64, precision: usize, alternate: bool) -> String {
    let precision = precision.max(1);
    let exponent = if magnitude == 0.0 {
        0
    } else {
        let text = format!("{:.*e}", precision - 1, magnitude);
        text.split_once('e')
            .and_then(|(_, e)| e.parse::<i32>().ok())
            .unwrap_or(0)
    };

    let text = if exponent >= -4 && exponent < precision as i32 {
        let decimals = (precision as i32 - 1 - exponent).max(0) as usize;
        format!("{magnitude:.decimals$}")
    } else {
        exponent_notation(magnitude, precision - 1)
    };
    if alternate {
        return text;
    }

    match text.split_once('e') {
        Some((mantissa, exponent)) => format!("{}e{exponent}", strip_zeros(mantissa)),
        None => strip_zeros(&text).to_string(),
    }
}

fn strip_zeros(text: &str) -> &str {
    if text.contains('.') {
        text.trim_end_matches('0').trim_end_matches('.')
    } else {
        text
    }
}

fn group_digits(digits: &str, separator: char, size: usize) -> String {
    let count = digits.chars().count();
    let mut out = String::with_capacity(digits.len() + count / size);
    for (index, ch) in digits.chars().enumerate() {
        if index > 0 && (count - index) % size == 0 {
            out.push(separator);
        }
        out.push(ch);
    }
    out
}

fn sign_text(negative: bool, sign: char) -> &'static str {
    match (negative, sign) {
        (true, _) => "-",
        (false, '+') => "+",
        (false, ' ') => " ",
        _ => "",
    }
}

fn pad(head: &str, body: &str, spec: &Spec, default_align: char) -> String {
    let (fill, align) = match (spec.align, spec.zero) {
        (Some(align), _) => (spec.fill, align),
        (None, true) if default_align == '>' => ('0', '='),
        (None, _) => (spec.fill, default_align),
    };
    let len = head.chars().count() + body.chars().count();
    if len >= spec.width {
        return format!("{head}{body}");
    }
    let padding = spec.width - len;
    let fill_text = |n: usize| fill.to_string().repeat(n);
    match align {
        '<' => format!("{head}{body}{}", fill_text(padding)),
        '^' => format!(
            "{}{head}{body}{}",
            fill_text(padding / 2),
            fill_text(padding - padding / 2)
        ),
        '=' => format!("{head}{}{body}", fill_text(padding)),
        _ => format!("{}{head}{body}", fill_text(padding)),
    }
}

// ---- printf-style formatting ----

/// `template % args`.
pub fn percent_format(template: &str, args: &Value) -> Exec<String> {
    let (items, mapping): (Vec<Value>, Option<&Value>) = match args {
        Value::Tuple(tuple) => (tuple.items().to_vec(), None),
        Value::Dict(_) => (vec![args.clone()], Some(args)),
        other => (vec![other.clone()], None),
    };
    let mut next_item = 0usize;
    let mut used_mapping = false;
    let chars: Vec<char> = template.chars().collect();
    let mut out = String::with_capacity(template.len());
    let mut i = 0;

    let take = |next_item: &mut usize| -> Exec<Value> {
        let item = items
            .get(*next_item)
            .cloned()
            .ok_or(())
            .or_else(|_| type_error("not enough arguments for format string"))?;
        *next_item += 1;
        Ok(item)
    };

    while i < chars.len() {
        if chars[i] != '%' {
            out.push(chars[i]);
            i += 1;
            continue;
        }
        i += 1;
        if chars.get(i) == Some(&'%') {
            out.push('%');
            i += 1;
            continue;
        }

        let mut keyed: Option<Value> = None;
        if chars.get(i) == Some(&'(') {
            let Some(dict) = mapping else {
                return type_error("format requires a mapping");
            };
            let close = chars[i..]
                .iter()
                .position(|c| *c == ')')
                .ok_or(())
                .or_else(|_| value_error("incomplete format key"))?;
            let key: String = chars[i + 1..i + close].iter().collect();
            i += close + 1;
            let Value::Dict(dict) = dict else {
                return type_error("format requires a mapping");
            };
            let value = dict
                .get(&Value::str(key.as_str()).hash_key()?)
                .ok_or(())
                .or_else(|_| raise(ExcKind::KeyError, quote(&key)))?;
            keyed = Some(value);
            used_mapping = true;
        }

        let mut spec = Spec::default();
        let mut left = false;
        while let Some(&flag) = chars.get(i) {
            match flag {
                '-' => left = true,
                '+' => spec.sign = '+',
                ' ' if spec.sign != '+' => spec.sign = ' ',
                '0' => spec.zero = true,
                '#' => spec.alternate = true,
                _ => break,
            }
            i += 1;
        }
        if chars.get(i) == Some(&'*') {
            spec.width = take(&mut next_item)?
                .as_int()
                .ok_or(())
                .or_else(|_| type_error("* wants int"))?
                .max(0) as usize;
            i += 1;
        } else {
            let start = i;
            while chars.get(i).is_some_and(char::is_ascii_digit) {
                i += 1;
            }
            if i > start {
                spec.width = digits_value(&chars[start..i])?;
            }
        }
        if chars.get(i) == Some(&'.') {
            i += 1;
            let start = i;
            while chars.get(i).is_some_and(char::is_ascii_digit) {
                i += 1;
            }
            spec.precision = Some(if i > start {
                digits_value(&chars[start..i])?
            } else {
                0
            });
        }
        while chars.get(i).is_some_and(|c| matches!(c, 'h' | 'l' | 'L')) {
            i += 1;
        }
        let Some(&conversion) = chars.get(i) else {
            return value_error("incomplete format");
        };
        i += 1;

        if left {
            spec.align = Some('<');
            spec.zero = false;
        }
        let value = match keyed {
            Some(value) => value,
            None => take(&mut next_item)?,
        };

        let text = match conversion {
            's' | 'r' | 'a' => {
                let text = if conversion == 's' {
                    str_of(&value)?
                } else {
                    repr(&value)?
                };
                let mut spec = spec.clone();
                spec.sign = '-';
                if !left {
                    spec.align = Some('>');
                }
                format_str(&text, &spec)?
            }
            'd' | 'i' | 'u' => {
                let number = match &value {
                    Value::Float(x) => {
                        if !x.is_finite() {
                            return raise(
                                ExcKind::OverflowError,
                                "cannot convert float infinity to integer",
                            );
                        }
                        x.trunc() as i64
                    }
                    other => other.as_int().ok_or(()).or_else(|_| {
                        type_error(format!(
                            "%{conversion} format: a real number is required, not {}",
                            other.type_name()
                        ))
                    })?,
                };
                spec.precision = None;
                spec.kind = Some('d');
                format_int(number, &spec)?
            }
            'x' | 'X' | 'o' => {
                let number = value.as_int().ok_or(()).or_else(|_| {
                    type_error(format!(
                        "%{conversion} format: an integer is required, not {}",
                        value.type_name()
                    ))
                })?;
                spec.precision = None;
                spec.kind = Some(conversion);
                format_int(number, &spec)?
            }
            'f' | 'F' | 'e' | 'E' | 'g' | 'G' => {
                let number = value.as_float().ok_or(()).or_else(|_| {
                    type_error(format!(
                        "must be real number, not {}",
                        value.type_name()
                    ))
                })?;
                spec.kind = Some(conversion);
                format_float(number, &spec)?
            }
            'c' => match &value {
                Value::Str(s) if s.chars().count() == 1 => format_str(s, &Spec {
                    align: Some(if left { '<' } else { '>' }),
                    ..spec.clone()
                })?,
                other => {
                    let number = other.as_int().ok_or(()).or_else(|_| {
                        type_error("%c requires int or char")
                    })?;
                    spec.kind = Some('c');
                    format_int(number, &spec)?
                }
            },
            other => {
                return value_error(format!(
                    "unsupported format character '{other}' (0x{:x})",
                    other as u32
                ));
            }
        };
        out.push_str(&text);
    }

    if !used_mapping && mapping.is_none() && next_item < items.len() {
        return type_error("not all arguments converted during string formatting");
    }
    Ok(out)
}

// ---- str.format ----

/// `template.format(*positional, **keywords)`.
pub fn str_format(
    template: &str,
    positional: &[Value],
    keywords: &[(std::rc::Rc<str>, Value)],
) -> Exec<String> {
    let mut formatter = FieldFormatter {
        positional,
        keywords,
        auto_index: 0,
        manual: false,
    };
    formatter.render(template, 0)
}

struct FieldFormatter<'a> {
    positional: &'a [Value],
    keywords: &'a [(std::rc::Rc<str>, Value)],
    auto_index: usize,
    manual: bool,
}

impl FieldFormatter<'_> {
    fn render(&mut self, template: &str, nesting: usize) -> Exec<String> {
        if nesting > 2 {
            return value_error("Max string recursion exceeded");
        }
        let chars: Vec<char> = template.chars().collect();
        let mut out = String::with_capacity(template.len());
        let mut i = 0;
        while i < chars.len() {
            match chars[i] {
                '{' if chars.get(i + 1) == Some(&'{') => {
                    out.push('{');
                    i += 2;
                }
                '}' if chars.get(i + 1) == Some(&'}') => {
                    out.push('}');
                    i += 2;
                }
                '}' => return value_error("Single '}' encountered in format string"),
                '{' => {
                    let mut depth = 1;
                    let mut j = i + 1;
                    while j < chars.len() {
                        match chars[j] {
                            '{' => depth += 1,
                            '}' => {
                                depth -= 1;
                                if depth == 0 {
                                    break;
                                }
                            }
                            _ => {}
                        }
                        j += 1;
                    }
                    if j >= chars.len() {
                        return value_error("Single '{' encountered in format string");
                    }
                    let field: String = chars[i + 1..j].iter().collect();
                    out.push_str(&self.render_field(&field, nesting)?);
                    i = j + 1;
                }
                c => {
                    out.push(c);
                    i += 1;
                }
            }
        }
        Ok(out)
    }

    fn render_field(&mut self, field: &str, nesting: usize) -> Exec<String> {
        let (head, spec) = match field.find(':') {
            Some(index) => (&field[..index], &field[index + 1..]),
            None => (field, ""),
        };
        let (name, conversion) = match head.find('!') {
            Some(index) => {
                let conversion: Vec<char> = head[index + 1..].chars().collect();
                if conversion.len() != 1 || !matches!(conversion[0], 'r' | 's' | 'a') {
                    return value_error("Unknown conversion specifier");
                }
                (&head[..index], Some(conversion[0]))
            }
            None => (head, None),
        };

        if name.contains(['.', '[']) {
            return value_error(
                "attribute and index lookups in format fields are not supported in the sandbox",
            );
        }
        let value = self.lookup(name)?;
        let spec = if spec.contains('{') {
            self.render(spec, nesting + 1)?
        } else {
            spec.to_string()
        };

        match conversion {
            Some('s') => format_value(&Value::str(str_of(&value)?), &spec),
            Some(_) => format_value(&Value::str(repr(&value)?), &spec),
            None => format_value(&value, &spec),
        }
    }

    fn lookup(&mut self, name: &str) -> Exec<Value> {
        if name.is_empty() {
            if self.manual {
                return value_error(
                    "cannot switch from manual field specification to automatic field numbering",
                );
            }
            let index = self.auto_index;
            self.auto_index += 1;
            return self.positional_at(index);
        }
        if let Ok(index) = name.parse::<usize>() {
            if self.auto_index > 0 {
                return value_error(
                    "cannot switch from automatic field numbering to manual field specification",
                );
            }
            self.manual = true;
            return self.positional_at(index);
        }
        self.keywords
            .iter()
            .find(|(key, _)| key.as_ref() == name)
            .map(|(_, value)| value.clone())
            .ok_or(())
            .or_else(|_| raise(ExcKind::KeyError, quote(name)))
    }

    fn positional_at(&self, index: usize) -> Exec<Value> {
        self.positional.get(index).cloned().ok_or(()).or_else(|_| {
            raise(
                ExcKind::IndexError,
                format!("Replacement index {index} out of range for positional args tuple"),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use yare::parameterized;

    #[parameterized(
        integral = { 4.0, "4.0" },
        fraction = { 0.1, "0.1" },
        third = { 1.0 / 3.0, "0.3333333333333333" },
        large = { 1e16, "1e+16" },
        below_threshold = { 1e15, "1000000000000000.0" },
        small = { 0.0001, "0.0001" },
        tiny = { 1.5e-7, "1.5e-07" },
        negative = { -2.5, "-2.5" },
        negative_zero = { -0.0, "-0.0" },
        infinity = { f64::INFINITY, "inf" },
        sum_rounding = { 0.1 + 0.2, "0.30000000000000004" },
    )]
    fn float_repr_matches_python(value: f64, expected: &str) {
        assert_eq!(float_repr(value), expected);
    }

    #[parameterized(
        fixed = { Value::Float(3.14159), ".2f", "3.14" },
        width_fixed = { Value::Float(2.5), "8.3f", "   2.500" },
        percent = { Value::Float(0.256), ".1%", "25.6%" },
        exponent = { Value::Float(12345.678), ".2e", "1.23e+04" },
        general = { Value::Float(0.00001234), "g", "1.234e-05" },
        general_fixed = { Value::Float(1234.5), "g", "1234.5" },
        grouping = { Value::Int(1234567), ",", "1,234,567" },
        zero_pad = { Value::Int(42), "05d", "00042" },
        negative_zero_pad = { Value::Int(-42), "05d", "-0042" },
        hex_alternate = { Value::Int(255), "#x", "0xff" },
        binary = { Value::Int(5), "08b", "00000101" },
        left_align = { Value::str("ab"), "<5", "ab   " },
        center = { Value::str("ab"), "*^6", "**ab**" },
        truncate = { Value::str("abcdef"), ".3", "abc" },
        plus_sign = { Value::Int(7), "+d", "+7" },
        int_as_float = { Value::Int(3), ".1f", "3.0" },
        bool_plain = { Value::Bool(true), ">5", " True" },
    )]
    fn format_spec(value: Value, spec: &str, expected: &str) {
        assert_eq!(format_value(&value, spec).unwrap(), expected);
    }

    #[test]
    fn invalid_spec_is_value_error() {
        assert!(format_value(&Value::str("x"), "d").is_err());
        assert!(format_value(&Value::Int(1), ".2d").is_err());
    }

    #[test]
    fn repr_of_containers() {
        let list = Value::list(vec![Value::Int(1), Value::str("a"), Value::None]);
        assert_eq!(repr(&list).unwrap(), "[1, 'a', None]");
        assert_eq!(repr(&Value::tuple(vec![Value::Int(1)])).unwrap(), "(1,)");
        assert_eq!(repr(&Value::tuple(vec![])).unwrap(), "()");
        assert_eq!(repr(&Value::set(Default::default())).unwrap(), "set()");
    }

    #[test]
    fn repr_of_self_referencing_list() {
        let list = Value::list(vec![Value::Int(1)]);
        if let Value::List(inner) = &list {
            inner.borrow_mut().push(list.clone());
        }
        assert_eq!(repr(&list).unwrap(), "[1, [...]]");
        if let Value::List(inner) = &list {
            inner.borrow_mut().clear();
        }
    }

    #[test]
    fn string_quoting() {
        assert_eq!(quote("it's"), "\"it's\"");
        assert_eq!(quote("a\nb"), "'a\\nb'");
        assert_eq!(quote("both ' and \""), "'both \\' and \"'");
    }

    #[test]
    fn percent_formatting() {
        let args = Value::tuple(vec![Value::str("x"), Value::Int(3), Value::Float(2.5)]);
        assert_eq!(
            percent_format("%s=%d (%.2f) 100%%", &args).unwrap(),
            "x=3 (2.50) 100%"
        );
        assert_eq!(
            percent_format("%5d|%-5s|", &Value::tuple(vec![Value::Int(42), Value::str("ab")]))
                .unwrap(),
            "   42|ab   |"
        );
        assert!(percent_format("%d %d", &Value::Int(1)).is_err());
        assert!(percent_format("%d", &Value::tuple(vec![Value::Int(1), Value::Int(2)])).is_err());
    }

    #[test]
    fn str_format_fields() {
        let positional = vec![Value::str("Ada"), Value::Int(36)];
        let keywords = vec![(std::rc::Rc::from("unit"), Value::str("years"))];
        assert_eq!(
            str_format("{} is {} {unit}", &positional, &keywords).unwrap(),
            "Ada is 36 years"
        );
        assert_eq!(
            str_format("{1}-{0}-{1}", &positional, &[]).unwrap(),
            "36-Ada-36"
        );
        assert_eq!(
            str_format("{0!r:>6}", &positional, &[]).unwrap(),
            " 'Ada'"
        );
        assert!(str_format("{2}", &positional, &[]).is_err());
        assert!(str_format("{0.__class__}", &positional, &[]).is_err());
    }
}
