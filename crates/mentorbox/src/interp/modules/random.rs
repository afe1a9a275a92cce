//! The `random` module, backed by the interpreter's own [`fastrand::Rng`].
//!
//! Seeding is reproducible within this interpreter but does not reproduce
//! CPython's Mersenne Twister sequences.

use fastrand::Rng;

use crate::interp::Interpreter;
use crate::interp::builtins::index_arg;
use crate::interp::exception::{ExcKind, Exec, raise, type_error, value_error};
use crate::interp::modules::{Member, ModuleDef};
use crate::interp::ops;
use crate::interp::value::{Args, Native, Value};

pub static MODULE: ModuleDef = ModuleDef {
    name: "random",
    members: &[
        ("choice", func("choice", choice)),
        ("choices", func("choices", choices)),
        ("gauss", func("gauss", gauss)),
        ("randint", func("randint", randint)),
        ("random", func("random", random)),
        ("randrange", func("randrange", randrange)),
        ("sample", func("sample", sample)),
        ("seed", func("seed", seed)),
        ("shuffle", func("shuffle", shuffle)),
        ("uniform", func("uniform", uniform)),
    ],
};

const fn func(name: &'static str, func: fn(&mut Interpreter, Args) -> Exec<Value>) -> Member {
    Member::Func(Native { name, func })
}

fn real(value: &Value) -> Exec<f64> {
    match value.as_float() {
        Some(x) => Ok(x),
        None => type_error(format!(
            "must be real number, not {}",
            value.type_name()
        )),
    }
}

/// FNV-1a, so string seeds are stable across runs.
fn seed_bytes(bytes: &[u8]) -> u64 {
    bytes.iter().fold(0xcbf2_9ce4_8422_2325, |hash, byte| {
        (hash ^ u64::from(*byte)).wrapping_mul(0x0000_0100_0000_01b3)
    })
}

fn seed(interp: &mut Interpreter, mut args: Args) -> Exec<Value> {
    let value = args.take(0, "a");
    args.finish("seed")?;
    args.expect("seed", 0, 2)?;
    let rng = match value {
        None | Some(Value::None) => Rng::new(),
        Some(Value::Int(n)) => Rng::with_seed(n as u64),
        Some(Value::Bool(b)) => Rng::with_seed(u64::from(b)),
        Some(Value::Float(x)) => Rng::with_seed(x.to_bits()),
        Some(Value::Str(text)) => Rng::with_seed(seed_bytes(text.as_bytes())),
        Some(other) => {
            return type_error(format!(
                "The only supported seed types are: None, int, float, str, bytes, and bytearray. Got '{}'",
                other.type_name()
            ));
        }
    };
    *interp.rng() = rng;
    Ok(Value::None)
}

fn random(interp: &mut Interpreter, args: Args) -> Exec<Value> {
    args.finish("random")?;
    args.expect("random", 0, 0)?;
    Ok(Value::Float(interp.rng().f64()))
}

fn uniform(interp: &mut Interpreter, args: Args) -> Exec<Value> {
    args.finish("uniform")?;
    args.expect("uniform", 2, 2)?;
    let a = real(&args.positional[0])?;
    let b = real(&args.positional[1])?;
    let t = interp.rng().f64();
    Ok(Value::Float(a + (b - a) * t))
}

fn gauss(interp: &mut Interpreter, mut args: Args) -> Exec<Value> {
    let mu = args.take(0, "mu").map(|v| real(&v)).transpose()?.unwrap_or(0.0);
    let sigma = args.take(1, "sigma").map(|v| real(&v)).transpose()?.unwrap_or(1.0);
    args.finish("gauss")?;
    args.expect("gauss", 0, 2)?;
    // Box-Muller; `u1` is kept away from zero so the log is finite.
    let rng = interp.rng();
    let u1 = 1.0 - rng.f64();
    let u2 = rng.f64();
    let z = (-2.0 * u1.ln()).sqrt() * (std::f64::consts::TAU * u2).cos();
    Ok(Value::Float(mu + sigma * z))
}

fn randint(interp: &mut Interpreter, args: Args) -> Exec<Value> {
    args.finish("randint")?;
    args.expect("randint", 2, 2)?;
    let a = index_arg(&args.positional[0])?;
    let b = index_arg(&args.positional[1])?;
    if a > b {
        return value_error(format!("empty range in randint({a}, {b})"));
    }
    Ok(Value::Int(interp.rng().i64(a..=b)))
}

fn randrange(interp: &mut Interpreter, args: Args) -> Exec<Value> {
    args.finish("randrange")?;
    args.expect("randrange", 1, 3)?;
    let first = index_arg(&args.positional[0])?;
    let (start, stop) = match args.get(1) {
        Some(stop) => (first, index_arg(stop)?),
        None => (0, first),
    };
    let step = match args.get(2) {
        Some(step) => index_arg(step)?,
        None => 1,
    };
    if step == 0 {
        return value_error("zero step for randrange()");
    }
    let span = i128::from(stop) - i128::from(start);
    let count = if step > 0 {
        (span + i128::from(step) - 1).div_euclid(i128::from(step))
    } else {
        (span + i128::from(step) + 1).div_euclid(i128::from(step))
    };
    if count <= 0 {
        return value_error(format!("empty range in randrange({start}, {stop}, {step})"));
    }
    let pick = interp.rng().i128(0..count);
    Ok(Value::Int((i128::from(start) + pick * i128::from(step)) as i64))
}

/// Items of a sequence argument; sets and dicts are rejected like Python.
fn population(interp: &mut Interpreter, value: &Value, name: &str) -> Exec<Vec<Value>> {
    match value {
        Value::List(_) | Value::Tuple(_) | Value::Str(_) | Value::Range(_) => {
            interp.collect(value)
        }
        other => type_error(format!(
            "{name}: population must be a sequence, not '{}'",
            other.type_name()
        )),
    }
}

fn choice(interp: &mut Interpreter, args: Args) -> Exec<Value> {
    args.finish("choice")?;
    args.expect("choice", 1, 1)?;
    if let Value::Range(range) = &args.positional[0] {
        let len = range.len();
        if len == 0 {
            return raise(ExcKind::IndexError, "Cannot choose from an empty sequence");
        }
        let index = interp.rng().i128(0..len);
        return Ok(Value::Int(range.get(index)));
    }
    let items = population(interp, &args.positional[0], "choice")?;
    if items.is_empty() {
        return raise(ExcKind::IndexError, "Cannot choose from an empty sequence");
    }
    let index = interp.rng().usize(0..items.len());
    Ok(items[index].clone())
}

fn choices(interp: &mut Interpreter, mut args: Args) -> Exec<Value> {
    let weights = args.take(1, "weights");
    let cum_weights = args.take_keyword("cum_weights");
    let k = args.take_keyword("k");
    args.finish("choices")?;
    args.expect("choices", 1, 2)?;
    let items = population(interp, &args.positional[0], "choices")?;
    let k = match k {
        Some(k) => index_arg(&k)?.max(0) as usize,
        None => 1,
    };
    ops::check_len(k, interp.max_len())?;

    let cumulative = match (weights, cum_weights) {
        (Some(Value::None) | None, Some(Value::None) | None) => None,
        (Some(weights), None | Some(Value::None)) => {
            let mut total = 0.0;
            let mut cumulative = Vec::new();
            for weight in interp.collect(&weights)? {
                total += real(&weight)?;
                cumulative.push(total);
            }
            Some(cumulative)
        }
        (None | Some(Value::None), Some(cum_weights)) => Some(
            interp
                .collect(&cum_weights)?
                .iter()
                .map(real)
                .collect::<Exec<Vec<f64>>>()?,
        ),
        (Some(_), Some(_)) => {
            return type_error("Cannot specify both weights and cumulative weights");
        }
    };

    if items.is_empty() {
        if k == 0 {
            return Ok(Value::list(Vec::new()));
        }
        return raise(ExcKind::IndexError, "Cannot choose from an empty sequence");
    }
    let mut chosen = Vec::with_capacity(k);
    match cumulative {
        None => {
            for _ in 0..k {
                let index = interp.rng().usize(0..items.len());
                chosen.push(items[index].clone());
            }
        }
        Some(cumulative) => {
            if cumulative.len() != items.len() {
                return value_error("The number of weights does not match the population");
            }
            let total = cumulative.last().copied().unwrap_or(0.0);
            if !(total > 0.0 && total.is_finite()) {
                return value_error("Total of weights must be greater than zero");
            }
            for _ in 0..k {
                let point = interp.rng().f64() * total;
                let index = cumulative
                    .partition_point(|bound| *bound <= point)
                    .min(items.len() - 1);
                chosen.push(items[index].clone());
            }
        }
    }
    Ok(Value::list(chosen))
}

fn sample(interp: &mut Interpreter, mut args: Args) -> Exec<Value> {
    let k = args.take(1, "k");
    args.finish("sample")?;
    args.expect("sample", 1, 2)?;
    let Some(k) = k else {
        return type_error("sample() missing 1 required positional argument: 'k'");
    };
    let k = index_arg(&k)?;
    let mut items = population(interp, &args.positional[0], "sample")?;
    if k < 0 || k as usize > items.len() {
        return value_error("Sample larger than population or is negative");
    }
    // Partial Fisher-Yates: the first `k` slots end up a uniform sample.
    let k = k as usize;
    let rng = interp.rng();
    for i in 0..k {
        let j = rng.usize(i..items.len());
        items.swap(i, j);
    }
    items.truncate(k);
    Ok(Value::list(items))
}

fn shuffle(interp: &mut Interpreter, args: Args) -> Exec<Value> {
    args.finish("shuffle")?;
    args.expect("shuffle", 1, 1)?;
    let Value::List(list) = &args.positional[0] else {
        return type_error(format!(
            "'{}' object does not support item assignment",
            args.positional[0].type_name()
        ));
    };
    let mut items = list.snapshot();
    interp.rng().shuffle(&mut items);
    *list.borrow_mut() = items;
    Ok(Value::None)
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
            vec!["random"],
        )
    }

    fn call(interp: &mut Interpreter, name: &str, args: Vec<Value>) -> Exec<Value> {
        let Some(Value::Native(native)) = MODULE.attribute(name) else {
            panic!("random.{name} is missing");
        };
        (native.func)(interp, Args::new(args))
    }

    fn ints(interp: &mut Interpreter, name: &str, args: Vec<Value>, n: usize) -> Vec<i64> {
        (0..n)
            .map(|_| match call(interp, name, args.clone()) {
                Ok(Value::Int(i)) => i,
                _ => panic!("{name} did not return an int"),
            })
            .collect()
    }

    #[test]
    fn seeding_is_reproducible() {
        let mut interp = interpreter();
        call(&mut interp, "seed", vec![Value::Int(42)]).unwrap();
        let first = ints(&mut interp, "randint", vec![Value::Int(1), Value::Int(100)], 10);
        call(&mut interp, "seed", vec![Value::Int(42)]).unwrap();
        let second = ints(&mut interp, "randint", vec![Value::Int(1), Value::Int(100)], 10);
        assert_eq!(first, second);
        assert!(first.iter().all(|n| (1..=100).contains(n)));
    }

    #[test]
    fn randrange_respects_step() {
        let mut interp = interpreter();
        let values = ints(
            &mut interp,
            "randrange",
            vec![Value::Int(10), Value::Int(0), Value::Int(-3)],
            50,
        );
        assert!(values.iter().all(|n| [10, 7, 4, 1].contains(n)));
    }

    #[test]
    fn empty_ranges_raise() {
        let mut interp = interpreter();
        assert!(matches!(
            call(&mut interp, "randint", vec![Value::Int(5), Value::Int(1)]),
            Err(Flow::Exception(raised)) if raised.exc.kind == ExcKind::ValueError
        ));
        assert!(matches!(
            call(&mut interp, "choice", vec![Value::list(Vec::new())]),
            Err(Flow::Exception(raised)) if raised.exc.kind == ExcKind::IndexError
        ));
    }

    #[test]
    fn sample_draws_distinct_items() {
        let mut interp = interpreter();
        let population = Value::Range(crate::interp::value::Range {
            start: 0,
            stop: 20,
            step: 1,
        });
        let Ok(Value::List(picked)) = call(&mut interp, "sample", vec![population, Value::Int(20)])
        else {
            panic!("sample failed");
        };
        let mut values: Vec<i64> = picked.snapshot().iter().filter_map(Value::as_int).collect();
        values.sort_unstable();
        assert_eq!(values, (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn shuffle_keeps_elements() {
        let mut interp = interpreter();
        let list = Value::list((0..10).map(Value::Int).collect());
        call(&mut interp, "shuffle", vec![list.clone()]).unwrap();
        let Value::List(list) = list else { unreachable!() };
        let mut values: Vec<i64> = list.snapshot().iter().filter_map(Value::as_int).collect();
        values.sort_unstable();
        assert_eq!(values, (0..10).collect::<Vec<_>>());
    }
}
