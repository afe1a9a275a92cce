//! The `time` module. Clocks only; `sleep` blocks the worker thread but
//! stays responsive to cancellation.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::interp::Interpreter;
use crate::interp::exception::{Exec, type_error, value_error};
use crate::interp::modules::{Member, ModuleDef};
use crate::interp::value::{Args, Native, Value};

pub static MODULE: ModuleDef = ModuleDef {
    name: "time",
    members: &[
        ("monotonic", func("monotonic", monotonic)),
        ("perf_counter", func("perf_counter", monotonic)),
        ("sleep", func("sleep", sleep)),
        ("time", func("time", time)),
    ],
};

/// Longest uninterrupted stretch of a `sleep`.
const SLEEP_SLICE: Duration = Duration::from_millis(10);

const fn func(name: &'static str, func: fn(&mut Interpreter, Args) -> Exec<Value>) -> Member {
    Member::Func(Native { name, func })
}

fn time(_: &mut Interpreter, args: Args) -> Exec<Value> {
    args.finish("time")?;
    args.expect("time", 0, 0)?;
    let seconds = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or(0.0);
    Ok(Value::Float(seconds))
}

/// Seconds since the interpreter started; only differences are meaningful.
fn monotonic(interp: &mut Interpreter, args: Args) -> Exec<Value> {
    args.finish("monotonic")?;
    args.expect("monotonic", 0, 0)?;
    Ok(Value::Float(interp.started().elapsed().as_secs_f64()))
}

fn sleep(interp: &mut Interpreter, args: Args) -> Exec<Value> {
    args.finish("sleep")?;
    args.expect("sleep", 1, 1)?;
    let seconds = match args.positional[0].as_float() {
        Some(seconds) => seconds,
        None => {
            return type_error(format!(
                "'{}' object cannot be interpreted as an integer",
                args.positional[0].type_name()
            ));
        }
    };
    if seconds.is_nan() || seconds < 0.0 {
        return value_error("sleep length must be non-negative");
    }
    let total = Duration::try_from_secs_f64(seconds).unwrap_or(Duration::MAX);
    let mut remaining = total;
    while !remaining.is_zero() {
        interp.tick()?;
        let slice = remaining.min(SLEEP_SLICE);
        std::thread::sleep(slice);
        remaining -= slice;
    }
    interp.tick()?;
    Ok(Value::None)
}

#[cfg(test)]
mod tests {
    use std::time::Instant;

    use super::*;
    use crate::interp::exception::Flow;
    use crate::interp::{CancelToken, Limits, OutputBuffer};

    fn interpreter(cancel: CancelToken) -> Interpreter {
        Interpreter::new(
            OutputBuffer::new(1024),
            OutputBuffer::new(1024),
            cancel,
            Limits {
                max_recursion_depth: 50,
                max_collection_len: 1000,
            },
            vec!["time"],
        )
    }

    #[test]
    fn sleep_waits_at_least_the_requested_time() {
        let mut interp = interpreter(CancelToken::new());
        let started = Instant::now();
        sleep(&mut interp, Args::new(vec![Value::Float(0.03)])).unwrap();
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn cancelled_sleep_returns_promptly() {
        let cancel = CancelToken::new();
        let mut interp = interpreter(cancel.clone());
        let trip = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            cancel.cancel();
        });
        let started = Instant::now();
        let result = sleep(&mut interp, Args::new(vec![Value::Int(30)]));
        trip.join().unwrap();
        assert!(matches!(result, Err(Flow::Cancelled)));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn negative_sleep_is_rejected() {
        let mut interp = interpreter(CancelToken::new());
        assert!(matches!(
            sleep(&mut interp, Args::new(vec![Value::Int(-1)])),
            Err(Flow::Exception(_))
        ));
    }

    #[test]
    fn monotonic_does_not_go_backwards() {
        let mut interp = interpreter(CancelToken::new());
        let Ok(Value::Float(a)) = monotonic(&mut interp, Args::default()) else {
            panic!("monotonic failed");
        };
        let Ok(Value::Float(b)) = monotonic(&mut interp, Args::default()) else {
            panic!("monotonic failed");
        };
        assert!(b >= a);
    }
}
