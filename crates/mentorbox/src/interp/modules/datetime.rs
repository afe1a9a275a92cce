//! The `datetime` module: naive `date`, `datetime` and `timedelta`.
//!
//! Values are backed by chrono's naive types. Python's field ranges are
//! enforced at construction; arithmetic that leaves chrono's range raises
//! `OverflowError` in `ops`.

use std::fmt::Write;

use chrono::format::{Item, StrftimeItems};
use chrono::{Datelike, Local, NaiveDate, NaiveDateTime, NaiveTime, TimeDelta, Timelike};

use crate::interp::Interpreter;
use crate::interp::builtins::index_arg;
use crate::interp::exception::{ExcKind, Exec, raise, type_error, value_error};
use crate::interp::format::datetime_str;
use crate::interp::modules::{Member, ModuleDef};
use crate::interp::value::{Args, Class, Native, TypeKind, Value};

pub static MODULE: ModuleDef = ModuleDef {
    name: "datetime",
    members: &[
        ("MINYEAR", Member::Int(MIN_YEAR as i64)),
        ("MAXYEAR", Member::Int(MAX_YEAR as i64)),
        ("date", Member::Class(Class::Type(TypeKind::Date))),
        ("datetime", Member::Class(Class::Type(TypeKind::DateTime))),
        ("timedelta", Member::Class(Class::Type(TypeKind::TimeDelta))),
    ],
};

const MIN_YEAR: i32 = 1;
const MAX_YEAR: i32 = 9999;
const MAX_DELTA_DAYS: i128 = 999_999_999;
const MICROS_PER_SECOND: i128 = 1_000_000;
const MICROS_PER_DAY: i128 = 86_400 * MICROS_PER_SECOND;

const DATE_METHODS: &[&str] = &[
    "isoformat",
    "isoweekday",
    "replace",
    "strftime",
    "toordinal",
    "weekday",
];
const DATETIME_METHODS: &[&str] = &[
    "date",
    "isoformat",
    "isoweekday",
    "replace",
    "strftime",
    "toordinal",
    "weekday",
];
const TIMEDELTA_METHODS: &[&str] = &["total_seconds"];

static DATE_TODAY: Native = Native {
    name: "today",
    func: date_today,
};
static DATE_FROMISOFORMAT: Native = Native {
    name: "fromisoformat",
    func: date_fromisoformat,
};
static DATE_FROMORDINAL: Native = Native {
    name: "fromordinal",
    func: date_fromordinal,
};
static DATETIME_NOW: Native = Native {
    name: "now",
    func: datetime_now,
};
static DATETIME_FROMISOFORMAT: Native = Native {
    name: "fromisoformat",
    func: datetime_fromisoformat,
};
static DATETIME_STRPTIME: Native = Native {
    name: "strptime",
    func: datetime_strptime,
};

/// Python's `(days, seconds, microseconds)` normalization: only `days` may be
/// negative, `seconds` is in `0..86400` and `microseconds` in `0..1000000`.
pub fn timedelta_parts(delta: &TimeDelta) -> (i64, i64, i64) {
    let total = total_micros(delta);
    let days = total.div_euclid(MICROS_PER_DAY);
    let rest = total.rem_euclid(MICROS_PER_DAY);
    (
        days as i64,
        (rest / MICROS_PER_SECOND) as i64,
        (rest % MICROS_PER_SECOND) as i64,
    )
}

fn total_micros(delta: &TimeDelta) -> i128 {
    i128::from(delta.num_seconds()) * MICROS_PER_SECOND
        + i128::from(delta.subsec_nanos() / 1000)
}

fn delta_from_micros(micros: i128) -> Exec<TimeDelta> {
    let days = micros.div_euclid(MICROS_PER_DAY);
    if days.abs() > MAX_DELTA_DAYS {
        return raise(
            ExcKind::OverflowError,
            format!("days={days}; must have magnitude <= {MAX_DELTA_DAYS}"),
        );
    }
    let seconds = micros.div_euclid(MICROS_PER_SECOND) as i64;
    let nanos = (micros.rem_euclid(MICROS_PER_SECOND) * 1000) as u32;
    match TimeDelta::new(seconds, nanos) {
        Some(delta) => Ok(delta),
        None => raise(ExcKind::OverflowError, "timedelta out of range"),
    }
}

/// Format a date or datetime with Python `strftime` directives.
pub fn strftime(value: &Value, format: &str) -> Exec<String> {
    let dt = match value {
        Value::Date(date) => date.and_time(NaiveTime::MIN),
        Value::DateTime(dt) => *dt,
        other => {
            return type_error(format!(
                "descriptor 'strftime' requires a 'datetime.date' object but received a '{}'",
                other.type_name()
            ));
        }
    };
    let format = translate_format(format);
    let items: Vec<Item<'_>> = StrftimeItems::new(&format).collect();
    if items.iter().any(|item| matches!(item, Item::Error)) {
        return value_error("Invalid format string");
    }
    let mut out = String::new();
    if write!(out, "{}", dt.format_with_items(items.into_iter())).is_err() {
        return value_error("Invalid format string");
    }
    Ok(out)
}

/// Map Python directives onto chrono's where they differ: `%f` is always
/// six digits of microseconds.
fn translate_format(format: &str) -> String {
    let mut out = String::with_capacity(format.len());
    let mut chars = format.chars();
    while let Some(c) = chars.next() {
        if c != '%' {
            out.push(c);
            continue;
        }
        match chars.next() {
            Some('f') => out.push_str("%6f"),
            Some(next) => {
                out.push('%');
                out.push(next);
            }
            None => out.push('%'),
        }
    }
    out
}

fn check_range(name: &str, value: i64, low: i64, high: i64) -> Exec<u32> {
    if !(low..=high).contains(&value) {
        return value_error(format!("{name} must be in {low}..{high}"));
    }
    Ok(value as u32)
}

fn make_date(year: i64, month: i64, day: i64) -> Exec<NaiveDate> {
    if !(i64::from(MIN_YEAR)..=i64::from(MAX_YEAR)).contains(&year) {
        return value_error(format!("year {year} is out of range"));
    }
    let month = check_range("month", month, 1, 12)?;
    match NaiveDate::from_ymd_opt(year as i32, month, u32::try_from(day).unwrap_or(0)) {
        Some(date) => Ok(date),
        None => value_error("day is out of range for month"),
    }
}

fn make_time(hour: i64, minute: i64, second: i64, micros: i64) -> Exec<NaiveTime> {
    let hour = check_range("hour", hour, 0, 23)?;
    let minute = check_range("minute", minute, 0, 59)?;
    let second = check_range("second", second, 0, 59)?;
    let micros = check_range("microsecond", micros, 0, 999_999)?;
    match NaiveTime::from_hms_micro_opt(hour, minute, second, micros) {
        Some(time) => Ok(time),
        None => value_error("time out of range"),
    }
}

fn int_field(args: &mut Args, index: usize, key: &str, default: Option<i64>) -> Exec<i64> {
    match args.take(index, key) {
        Some(value) => index_arg(&value),
        None => match default {
            Some(default) => Ok(default),
            None => type_error(format!("function missing required argument '{key}'")),
        },
    }
}

const DATE_FIELDS: [&str; 3] = ["year", "month", "day"];
const TIME_FIELDS: [&str; 4] = ["hour", "minute", "second", "microsecond"];

/// `date(...)`, `datetime(...)` and `timedelta(...)`.
pub fn construct(_: &mut Interpreter, kind: TypeKind, mut args: Args) -> Exec<Value> {
    match kind {
        TypeKind::Date => {
            args.expect("date", 0, 3)?;
            let mut fields = [0; 3];
            for (index, key) in DATE_FIELDS.iter().enumerate() {
                fields[index] = int_field(&mut args, index, key, None)?;
            }
            args.finish("date")?;
            make_date(fields[0], fields[1], fields[2]).map(Value::Date)
        }
        TypeKind::DateTime => {
            args.expect("datetime", 0, 7)?;
            let mut date = [0; 3];
            for (index, key) in DATE_FIELDS.iter().enumerate() {
                date[index] = int_field(&mut args, index, key, None)?;
            }
            let mut time = [0; 4];
            for (index, key) in TIME_FIELDS.iter().enumerate() {
                time[index] = int_field(&mut args, index + 3, key, Some(0))?;
            }
            args.finish("datetime")?;
            let date = make_date(date[0], date[1], date[2])?;
            let time = make_time(time[0], time[1], time[2], time[3])?;
            Ok(Value::DateTime(date.and_time(time)))
        }
        TypeKind::TimeDelta => construct_timedelta(args),
        other => type_error(format!("cannot create '{}' instances", other.name())),
    }
}

/// Positional order and unit (in microseconds) of timedelta's arguments.
const DELTA_UNITS: [(&str, i128); 7] = [
    ("days", MICROS_PER_DAY),
    ("seconds", MICROS_PER_SECOND),
    ("microseconds", 1),
    ("milliseconds", 1000),
    ("minutes", 60 * MICROS_PER_SECOND),
    ("hours", 3600 * MICROS_PER_SECOND),
    ("weeks", 7 * MICROS_PER_DAY),
];

fn construct_timedelta(mut args: Args) -> Exec<Value> {
    args.expect("timedelta", 0, DELTA_UNITS.len())?;
    let mut exact: i128 = 0;
    let mut fractional = 0.0f64;
    for (index, (key, unit)) in DELTA_UNITS.iter().enumerate() {
        match args.take(index, key) {
            None => {}
            Some(Value::Float(x)) => {
                if !x.is_finite() {
                    return value_error(format!("cannot convert float {x} to integer"));
                }
                fractional += x * *unit as f64;
            }
            Some(value) => {
                let n = index_arg(&value).or_else(|_| {
                    type_error(format!(
                        "unsupported type for timedelta {key} component: {}",
                        value.type_name()
                    ))
                })?;
                exact += i128::from(n) * unit;
            }
        }
    }
    args.finish("timedelta")?;
    let rounded = fractional.round_ties_even();
    if rounded.abs() > (MAX_DELTA_DAYS * MICROS_PER_DAY * 2) as f64 {
        return raise(ExcKind::OverflowError, "timedelta out of range");
    }
    delta_from_micros(exact + rounded as i128).map(Value::TimeDelta)
}

/// Data attributes of date, datetime and timedelta values.
pub fn attribute(value: &Value, attr: &str) -> Option<Value> {
    let field = match (value, attr) {
        (Value::Date(d), "year") => d.year() as i64,
        (Value::Date(d), "month") => i64::from(d.month()),
        (Value::Date(d), "day") => i64::from(d.day()),
        (Value::DateTime(dt), "year") => dt.year() as i64,
        (Value::DateTime(dt), "month") => i64::from(dt.month()),
        (Value::DateTime(dt), "day") => i64::from(dt.day()),
        (Value::DateTime(dt), "hour") => i64::from(dt.hour()),
        (Value::DateTime(dt), "minute") => i64::from(dt.minute()),
        (Value::DateTime(dt), "second") => i64::from(dt.second()),
        (Value::DateTime(dt), "microsecond") => i64::from(dt.nanosecond() / 1000),
        (Value::TimeDelta(delta), "days") => timedelta_parts(delta).0,
        (Value::TimeDelta(delta), "seconds") => timedelta_parts(delta).1,
        (Value::TimeDelta(delta), "microseconds") => timedelta_parts(delta).2,
        _ => return None,
    };
    Some(Value::Int(field))
}

pub fn method_names(value: &Value) -> &'static [&'static str] {
    match value {
        Value::Date(_) => DATE_METHODS,
        Value::DateTime(_) => DATETIME_METHODS,
        Value::TimeDelta(_) => TIMEDELTA_METHODS,
        _ => &[],
    }
}

/// Class-level constructors such as `date.today` and `datetime.strptime`.
pub fn class_attribute(kind: TypeKind, attr: &str) -> Option<Value> {
    let native = match (kind, attr) {
        (TypeKind::Date, "today") => &DATE_TODAY,
        (TypeKind::Date, "fromisoformat") => &DATE_FROMISOFORMAT,
        (TypeKind::Date, "fromordinal") => &DATE_FROMORDINAL,
        (TypeKind::DateTime, "now" | "today") => &DATETIME_NOW,
        (TypeKind::DateTime, "fromisoformat") => &DATETIME_FROMISOFORMAT,
        (TypeKind::DateTime, "strptime") => &DATETIME_STRPTIME,
        _ => return None,
    };
    Some(Value::Native(native))
}

pub fn call_method(
    _: &mut Interpreter,
    receiver: &Value,
    name: &str,
    mut args: Args,
) -> Exec<Value> {
    if let Value::TimeDelta(delta) = receiver {
        args.finish(name)?;
        args.expect(name, 0, 0)?;
        return Ok(Value::Float(total_micros(delta) as f64 / 1e6));
    }
    let (date, time) = match receiver {
        Value::Date(date) => (*date, None),
        Value::DateTime(dt) => (dt.date(), Some(dt.time())),
        other => {
            return raise(
                ExcKind::AttributeError,
                format!("'{}' object has no attribute '{name}'", other.type_name()),
            );
        }
    };
    match name {
        "replace" => replace(date, time, args),
        "strftime" => {
            let format = args.take(0, "format");
            args.finish(name)?;
            args.expect(name, 0, 1)?;
            match format {
                Some(Value::Str(format)) => strftime(receiver, &format).map(Value::str),
                Some(other) => type_error(format!(
                    "strftime() argument 1 must be str, not {}",
                    other.type_name()
                )),
                None => type_error("strftime() missing required argument 'format' (pos 1)"),
            }
        }
        "isoformat" => {
            let separator = args.take(0, "sep");
            args.finish(name)?;
            args.expect(name, 0, 1)?;
            let text = match (time, separator) {
                (None, None) => date.format("%Y-%m-%d").to_string(),
                (None, Some(_)) => return type_error("isoformat() takes no arguments"),
                (Some(time), separator) => {
                    let separator = match separator {
                        None => 'T',
                        Some(Value::Str(s)) if s.chars().count() == 1 => {
                            s.chars().next().unwrap_or('T')
                        }
                        Some(_) => {
                            return type_error("isoformat() argument 1 must be a unicode character");
                        }
                    };
                    datetime_str(&date.and_time(time), separator)
                }
            };
            Ok(Value::str(text))
        }
        _ => {
            args.finish(name)?;
            args.expect(name, 0, 0)?;
            Ok(match name {
                "weekday" => Value::Int(i64::from(date.weekday().num_days_from_monday())),
                "isoweekday" => Value::Int(i64::from(date.weekday().number_from_monday())),
                "toordinal" => Value::Int(i64::from(date.num_days_from_ce())),
                _ => Value::Date(date),
            })
        }
    }
}

fn replace(date: NaiveDate, time: Option<NaiveTime>, mut args: Args) -> Exec<Value> {
    let max = if time.is_some() { 7 } else { 3 };
    args.expect("replace", 0, max)?;
    let year = int_field(&mut args, 0, "year", Some(date.year() as i64))?;
    let month = int_field(&mut args, 1, "month", Some(i64::from(date.month())))?;
    let day = int_field(&mut args, 2, "day", Some(i64::from(date.day())))?;
    let new_date = make_date(year, month, day)?;
    let Some(time) = time else {
        args.finish("replace")?;
        return Ok(Value::Date(new_date));
    };
    let hour = int_field(&mut args, 3, "hour", Some(i64::from(time.hour())))?;
    let minute = int_field(&mut args, 4, "minute", Some(i64::from(time.minute())))?;
    let second = int_field(&mut args, 5, "second", Some(i64::from(time.second())))?;
    let micros = int_field(
        &mut args,
        6,
        "microsecond",
        Some(i64::from(time.nanosecond() / 1000)),
    )?;
    args.finish("replace")?;
    let new_time = make_time(hour, minute, second, micros)?;
    Ok(Value::DateTime(new_date.and_time(new_time)))
}

fn now() -> NaiveDateTime {
    let now = Local::now().naive_local();
    // Python carries microseconds only.
    now.with_nanosecond(now.nanosecond() / 1000 * 1000).unwrap_or(now)
}

fn date_today(_: &mut Interpreter, args: Args) -> Exec<Value> {
    args.finish("today")?;
    args.expect("today", 0, 0)?;
    Ok(Value::Date(now().date()))
}

fn datetime_now(_: &mut Interpreter, args: Args) -> Exec<Value> {
    args.finish("now")?;
    args.expect("now", 0, 0)?;
    Ok(Value::DateTime(now()))
}

fn str_arg<'a>(args: &'a Args, name: &str, index: usize) -> Exec<&'a str> {
    match args.get(index) {
        Some(Value::Str(text)) => Ok(&**text),
        Some(other) => type_error(format!(
            "{name}: argument must be str, not {}",
            other.type_name()
        )),
        None => type_error(format!("{name}() missing required argument")),
    }
}

fn invalid_isoformat<T>(text: &str) -> Exec<T> {
    value_error(format!("Invalid isoformat string: '{text}'"))
}

fn date_fromisoformat(_: &mut Interpreter, args: Args) -> Exec<Value> {
    args.finish("fromisoformat")?;
    args.expect("fromisoformat", 1, 1)?;
    let text = str_arg(&args, "fromisoformat", 0)?;
    match NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        Ok(date) => Ok(Value::Date(date)),
        Err(_) => invalid_isoformat(text),
    }
}

const ISO_DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M",
    "%Y-%m-%d %H:%M",
];

fn datetime_fromisoformat(_: &mut Interpreter, args: Args) -> Exec<Value> {
    args.finish("fromisoformat")?;
    args.expect("fromisoformat", 1, 1)?;
    let text = str_arg(&args, "fromisoformat", 0)?;
    for format in ISO_DATETIME_FORMATS {
        if let Ok(dt) = NaiveDateTime::parse_from_str(text, format) {
            return Ok(Value::DateTime(dt));
        }
    }
    match NaiveDate::parse_from_str(text, "%Y-%m-%d") {
        Ok(date) => Ok(Value::DateTime(date.and_time(NaiveTime::MIN))),
        Err(_) => invalid_isoformat(text),
    }
}

fn datetime_strptime(_: &mut Interpreter, args: Args) -> Exec<Value> {
    args.finish("strptime")?;
    args.expect("strptime", 2, 2)?;
    let text = str_arg(&args, "strptime", 0)?;
    let format = str_arg(&args, "strptime", 1)?;
    let translated = translate_format(format);
    if let Ok(dt) = NaiveDateTime::parse_from_str(text, &translated) {
        return Ok(Value::DateTime(dt));
    }
    match NaiveDate::parse_from_str(text, &translated) {
        Ok(date) => Ok(Value::DateTime(date.and_time(NaiveTime::MIN))),
        Err(_) => value_error(format!(
            "time data '{text}' does not match format '{format}'"
        )),
    }
}

fn date_fromordinal(_: &mut Interpreter, args: Args) -> Exec<Value> {
    args.finish("fromordinal")?;
    args.expect("fromordinal", 1, 1)?;
    let ordinal = index_arg(&args.positional[0])?;
    let date = i32::try_from(ordinal)
        .ok()
        .filter(|ordinal| *ordinal >= 1)
        .and_then(NaiveDate::from_num_days_from_ce_opt)
        .filter(|date| date.year() <= MAX_YEAR);
    match date {
        Some(date) => Ok(Value::Date(date)),
        None => value_error(format!("ordinal must be >= 1 (got {ordinal})")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interp::exception::Flow;
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
            Vec::new(),
        )
    }

    fn ints(values: &[i64]) -> Args {
        Args::new(values.iter().copied().map(Value::Int).collect())
    }

    fn error_message(result: Exec<Value>) -> String {
        match result {
            Err(Flow::Exception(raised)) => match raised.exc.args.first() {
                Some(Value::Str(message)) => message.to_string(),
                _ => String::new(),
            },
            other => panic!("expected an exception, got {:?}", other.ok()),
        }
    }

    #[test]
    fn timedelta_parts_normalize_like_python() {
        assert_eq!(timedelta_parts(&TimeDelta::seconds(-1)), (-1, 86_399, 0));
        assert_eq!(
            timedelta_parts(&TimeDelta::microseconds(90_000_000_001)),
            (1, 3_600, 1)
        );
    }

    #[test]
    fn date_fields_are_validated() {
        let mut interp = interpreter();
        let date = construct(&mut interp, TypeKind::Date, ints(&[2024, 2, 29]));
        assert!(matches!(date, Ok(Value::Date(d)) if d.day() == 29));
        assert_eq!(
            error_message(construct(&mut interp, TypeKind::Date, ints(&[2023, 2, 29]))),
            "day is out of range for month"
        );
        assert_eq!(
            error_message(construct(&mut interp, TypeKind::Date, ints(&[2023, 13, 1]))),
            "month must be in 1..12"
        );
    }

    #[test]
    fn timedelta_accepts_mixed_units() {
        let mut interp = interpreter();
        let mut args = Args::default();
        args.keywords.push(("hours".into(), Value::Float(1.5)));
        args.keywords.push(("minutes".into(), Value::Int(2)));
        let Ok(Value::TimeDelta(delta)) = construct(&mut interp, TypeKind::TimeDelta, args) else {
            panic!("timedelta failed");
        };
        assert_eq!(timedelta_parts(&delta), (0, 5_520, 0));
    }

    #[test]
    fn strftime_uses_python_directives() {
        let dt = NaiveDate::from_ymd_opt(2024, 3, 5)
            .and_then(|d| d.and_hms_micro_opt(7, 8, 9, 42))
            .map(Value::DateTime)
            .unwrap();
        assert_eq!(
            strftime(&dt, "%Y/%m/%d %H:%M:%S.%f").unwrap(),
            "2024/03/05 07:08:09.000042"
        );
        let date = Value::Date(NaiveDate::from_ymd_opt(2024, 3, 5).unwrap());
        assert_eq!(strftime(&date, "%A %H").unwrap(), "Tuesday 00");
    }

    #[test]
    fn methods_and_attributes() {
        let mut interp = interpreter();
        let date = Value::Date(NaiveDate::from_ymd_opt(2024, 3, 5).unwrap());
        assert!(matches!(
            call_method(&mut interp, &date, "weekday", Args::default()),
            Ok(Value::Int(1))
        ));
        assert!(matches!(attribute(&date, "month"), Some(Value::Int(3))));
        let mut args = Args::default();
        args.keywords.push(("day".into(), Value::Int(31)));
        let replaced = call_method(&mut interp, &date, "replace", args);
        assert!(matches!(replaced, Ok(Value::Date(d)) if d.day() == 31));
    }

    #[test]
    fn strptime_parses_dates_without_times() {
        let mut interp = interpreter();
        let args = Args::new(vec![Value::str("05/03/2024"), Value::str("%d/%m/%Y")]);
        let parsed = datetime_strptime(&mut interp, args);
        assert!(matches!(parsed, Ok(Value::DateTime(dt)) if dt.month() == 3 && dt.hour() == 0));
        let args = Args::new(vec![Value::str("nope"), Value::str("%Y")]);
        assert_eq!(
            error_message(datetime_strptime(&mut interp, args)),
            "time data 'nope' does not match format '%Y'"
        );
    }
}
