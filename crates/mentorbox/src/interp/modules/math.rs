//! The `math` module.

use crate::interp::Interpreter;
use crate::interp::builtins::{float_to_int, index_arg};
use crate::interp::exception::{ExcKind, Exec, raise, type_error, value_error};
use crate::interp::modules::{Member, ModuleDef};
use crate::interp::ops;
use crate::interp::value::{Args, Native, Value};
use crate::lang::ast::BinOp;

pub static MODULE: ModuleDef = ModuleDef {
    name: "math",
    members: &[
        ("pi", Member::Float(std::f64::consts::PI)),
        ("e", Member::Float(std::f64::consts::E)),
        ("tau", Member::Float(std::f64::consts::TAU)),
        ("inf", Member::Float(f64::INFINITY)),
        ("nan", Member::Float(f64::NAN)),
        ("acos", func("acos", acos)),
        ("asin", func("asin", asin)),
        ("atan", func("atan", atan)),
        ("atan2", func("atan2", atan2)),
        ("ceil", func("ceil", ceil)),
        ("comb", func("comb", comb)),
        ("copysign", func("copysign", copysign)),
        ("cos", func("cos", cos)),
        ("cosh", func("cosh", cosh)),
        ("degrees", func("degrees", degrees)),
        ("dist", func("dist", dist)),
        ("exp", func("exp", exp)),
        ("fabs", func("fabs", fabs)),
        ("factorial", func("factorial", factorial)),
        ("floor", func("floor", floor)),
        ("fmod", func("fmod", fmod)),
        ("fsum", func("fsum", fsum)),
        ("gcd", func("gcd", gcd)),
        ("hypot", func("hypot", hypot)),
        ("isclose", func("isclose", isclose)),
        ("isfinite", func("isfinite", isfinite)),
        ("isinf", func("isinf", isinf)),
        ("isnan", func("isnan", isnan)),
        ("isqrt", func("isqrt", isqrt)),
        ("lcm", func("lcm", lcm)),
        ("log", func("log", log)),
        ("log10", func("log10", log10)),
        ("log2", func("log2", log2)),
        ("modf", func("modf", modf)),
        ("perm", func("perm", perm)),
        ("pow", func("pow", pow)),
        ("prod", func("prod", prod)),
        ("radians", func("radians", radians)),
        ("sin", func("sin", sin)),
        ("sinh", func("sinh", sinh)),
        ("sqrt", func("sqrt", sqrt)),
        ("tan", func("tan", tan)),
        ("tanh", func("tanh", tanh)),
        ("trunc", func("trunc", trunc)),
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

fn domain_error<T>() -> Exec<T> {
    value_error("math domain error")
}

fn range_error<T>() -> Exec<T> {
    raise(ExcKind::OverflowError, "math range error")
}

/// What an infinite result from a finite argument means.
#[derive(Clone, Copy)]
enum Pole {
    /// Finite input mapped to infinity is a domain error (`log(0)`).
    Domain,
    /// Finite input overflowed (`exp(1000)`).
    Range,
}

fn unary(args: &Args, name: &str, op: fn(f64) -> f64, pole: Pole) -> Exec<Value> {
    args.finish(name)?;
    args.expect(name, 1, 1)?;
    let x = real(&args.positional[0])?;
    let result = op(x);
    if result.is_nan() && !x.is_nan() {
        return domain_error();
    }
    if result.is_infinite() && x.is_finite() {
        return match pole {
            Pole::Domain => domain_error(),
            Pole::Range => range_error(),
        };
    }
    Ok(Value::Float(result))
}

fn binary_args(args: &Args, name: &str) -> Exec<(f64, f64)> {
    args.finish(name)?;
    args.expect(name, 2, 2)?;
    Ok((real(&args.positional[0])?, real(&args.positional[1])?))
}

fn sqrt(_: &mut Interpreter, args: Args) -> Exec<Value> {
    unary(&args, "sqrt", f64::sqrt, Pole::Domain)
}

fn exp(_: &mut Interpreter, args: Args) -> Exec<Value> {
    unary(&args, "exp", f64::exp, Pole::Range)
}

fn log10(_: &mut Interpreter, args: Args) -> Exec<Value> {
    unary(&args, "log10", f64::log10, Pole::Domain)
}

fn log2(_: &mut Interpreter, args: Args) -> Exec<Value> {
    unary(&args, "log2", f64::log2, Pole::Domain)
}

fn sin(_: &mut Interpreter, args: Args) -> Exec<Value> {
    unary(&args, "sin", f64::sin, Pole::Domain)
}

fn cos(_: &mut Interpreter, args: Args) -> Exec<Value> {
    unary(&args, "cos", f64::cos, Pole::Domain)
}

fn tan(_: &mut Interpreter, args: Args) -> Exec<Value> {
    unary(&args, "tan", f64::tan, Pole::Domain)
}

fn asin(_: &mut Interpreter, args: Args) -> Exec<Value> {
    unary(&args, "asin", f64::asin, Pole::Domain)
}

fn acos(_: &mut Interpreter, args: Args) -> Exec<Value> {
    unary(&args, "acos", f64::acos, Pole::Domain)
}

fn atan(_: &mut Interpreter, args: Args) -> Exec<Value> {
    unary(&args, "atan", f64::atan, Pole::Domain)
}

fn sinh(_: &mut Interpreter, args: Args) -> Exec<Value> {
    unary(&args, "sinh", f64::sinh, Pole::Range)
}

fn cosh(_: &mut Interpreter, args: Args) -> Exec<Value> {
    unary(&args, "cosh", f64::cosh, Pole::Range)
}

fn tanh(_: &mut Interpreter, args: Args) -> Exec<Value> {
    unary(&args, "tanh", f64::tanh, Pole::Domain)
}

fn fabs(_: &mut Interpreter, args: Args) -> Exec<Value> {
    unary(&args, "fabs", f64::abs, Pole::Domain)
}

fn degrees(_: &mut Interpreter, args: Args) -> Exec<Value> {
    unary(&args, "degrees", f64::to_degrees, Pole::Range)
}

fn radians(_: &mut Interpreter, args: Args) -> Exec<Value> {
    unary(&args, "radians", f64::to_radians, Pole::Range)
}

fn log(_: &mut Interpreter, args: Args) -> Exec<Value> {
    args.finish("log")?;
    args.expect("log", 1, 2)?;
    let x = real(&args.positional[0])?;
    if x <= 0.0 {
        return domain_error();
    }
    match args.get(1) {
        None => Ok(Value::Float(x.ln())),
        Some(base) => {
            let base = real(base)?;
            if base <= 0.0 {
                return domain_error();
            }
            if base == 1.0 {
                return raise(ExcKind::ZeroDivisionError, "float division by zero");
            }
            Ok(Value::Float(x.ln() / base.ln()))
        }
    }
}

fn pow(_: &mut Interpreter, args: Args) -> Exec<Value> {
    let (x, y) = binary_args(&args, "pow")?;
    let result = x.powf(y);
    if result.is_nan() && !x.is_nan() && !y.is_nan() {
        return domain_error();
    }
    if result.is_infinite() && x.is_finite() && y.is_finite() {
        return if x == 0.0 { domain_error() } else { range_error() };
    }
    Ok(Value::Float(result))
}

fn atan2(_: &mut Interpreter, args: Args) -> Exec<Value> {
    let (y, x) = binary_args(&args, "atan2")?;
    Ok(Value::Float(y.atan2(x)))
}

fn copysign(_: &mut Interpreter, args: Args) -> Exec<Value> {
    let (x, y) = binary_args(&args, "copysign")?;
    Ok(Value::Float(x.copysign(y)))
}

fn fmod(_: &mut Interpreter, args: Args) -> Exec<Value> {
    let (x, y) = binary_args(&args, "fmod")?;
    if y == 0.0 || x.is_infinite() {
        return domain_error();
    }
    Ok(Value::Float(x % y))
}

fn modf(_: &mut Interpreter, args: Args) -> Exec<Value> {
    args.finish("modf")?;
    args.expect("modf", 1, 1)?;
    let x = real(&args.positional[0])?;
    let whole = x.trunc();
    let fraction = if x.is_infinite() { 0.0f64.copysign(x) } else { x - whole };
    Ok(Value::tuple(vec![Value::Float(fraction), Value::Float(whole)]))
}

fn rounding(args: &Args, name: &str, op: fn(f64) -> f64) -> Exec<Value> {
    args.finish(name)?;
    args.expect(name, 1, 1)?;
    match &args.positional[0] {
        value @ (Value::Int(_) | Value::Bool(_)) => Ok(Value::Int(value.as_int().unwrap_or(0))),
        value => float_to_int(op(real(value)?)).map(Value::Int),
    }
}

fn floor(_: &mut Interpreter, args: Args) -> Exec<Value> {
    rounding(&args, "floor", f64::floor)
}

fn ceil(_: &mut Interpreter, args: Args) -> Exec<Value> {
    rounding(&args, "ceil", f64::ceil)
}

fn trunc(_: &mut Interpreter, args: Args) -> Exec<Value> {
    rounding(&args, "trunc", f64::trunc)
}

fn float_check(args: &Args, name: &str, op: fn(f64) -> bool) -> Exec<Value> {
    args.finish(name)?;
    args.expect(name, 1, 1)?;
    Ok(Value::Bool(op(real(&args.positional[0])?)))
}

fn isfinite(_: &mut Interpreter, args: Args) -> Exec<Value> {
    float_check(&args, "isfinite", f64::is_finite)
}

fn isinf(_: &mut Interpreter, args: Args) -> Exec<Value> {
    float_check(&args, "isinf", f64::is_infinite)
}

fn isnan(_: &mut Interpreter, args: Args) -> Exec<Value> {
    float_check(&args, "isnan", f64::is_nan)
}

fn isclose(_: &mut Interpreter, mut args: Args) -> Exec<Value> {
    let rel_tol = args.take_keyword("rel_tol").map(|v| real(&v)).transpose()?;
    let abs_tol = args.take_keyword("abs_tol").map(|v| real(&v)).transpose()?;
    let (a, b) = binary_args(&args, "isclose")?;
    let rel_tol = rel_tol.unwrap_or(1e-9);
    let abs_tol = abs_tol.unwrap_or(0.0);
    if rel_tol < 0.0 || abs_tol < 0.0 {
        return value_error("tolerances must be non-negative");
    }
    if a == b {
        return Ok(Value::Bool(true));
    }
    if a.is_infinite() || b.is_infinite() {
        return Ok(Value::Bool(false));
    }
    let diff = (a - b).abs();
    Ok(Value::Bool(
        diff <= (rel_tol * b.abs()).max(rel_tol * a.abs()) || diff <= abs_tol,
    ))
}

fn non_negative(value: &Value, name: &str) -> Exec<i64> {
    let n = index_arg(value)?;
    if n < 0 {
        return value_error(format!("{name}() not defined for negative values"));
    }
    Ok(n)
}

fn overflowed<T>() -> Exec<T> {
    raise(ExcKind::OverflowError, "integer result does not fit in 64 bits")
}

fn factorial(interp: &mut Interpreter, args: Args) -> Exec<Value> {
    args.finish("factorial")?;
    args.expect("factorial", 1, 1)?;
    let n = non_negative(&args.positional[0], "factorial")?;
    let mut total: i64 = 1;
    for k in 2..=n {
        interp.tick()?;
        total = match total.checked_mul(k) {
            Some(total) => total,
            None => return overflowed(),
        };
    }
    Ok(Value::Int(total))
}

fn gcd_pair(a: i64, b: i64) -> i64 {
    let (mut a, mut b) = (a.unsigned_abs(), b.unsigned_abs());
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a as i64
}

fn gcd(_: &mut Interpreter, args: Args) -> Exec<Value> {
    args.finish("gcd")?;
    let mut result = 0;
    for value in &args.positional {
        result = gcd_pair(result, index_arg(value)?);
    }
    Ok(Value::Int(result))
}

fn lcm(_: &mut Interpreter, args: Args) -> Exec<Value> {
    args.finish("lcm")?;
    let mut result: i64 = 1;
    for value in &args.positional {
        let n = index_arg(value)?;
        if n == 0 || result == 0 {
            result = 0;
            continue;
        }
        let step = (result / gcd_pair(result, n)).checked_mul(n.abs());
        result = match step {
            Some(step) => step.abs(),
            None => return overflowed(),
        };
    }
    Ok(Value::Int(result))
}

fn comb(_: &mut Interpreter, args: Args) -> Exec<Value> {
    args.finish("comb")?;
    args.expect("comb", 2, 2)?;
    let n = non_negative(&args.positional[0], "comb")?;
    let k = non_negative(&args.positional[1], "comb")?;
    if k > n {
        return Ok(Value::Int(0));
    }
    let k = k.min(n - k);
    let mut total: i128 = 1;
    for i in 0..k {
        total = total * i128::from(n - i) / i128::from(i + 1);
        if total > i128::from(i64::MAX) {
            return overflowed();
        }
    }
    Ok(Value::Int(total as i64))
}

fn perm(_: &mut Interpreter, args: Args) -> Exec<Value> {
    args.finish("perm")?;
    args.expect("perm", 1, 2)?;
    let n = non_negative(&args.positional[0], "perm")?;
    let k = match args.get(1) {
        None | Some(Value::None) => n,
        Some(k) => non_negative(k, "perm")?,
    };
    if k > n {
        return Ok(Value::Int(0));
    }
    let mut total: i64 = 1;
    for i in 0..k {
        total = match total.checked_mul(n - i) {
            Some(total) => total,
            None => return overflowed(),
        };
    }
    Ok(Value::Int(total))
}

fn isqrt(_: &mut Interpreter, args: Args) -> Exec<Value> {
    args.finish("isqrt")?;
    args.expect("isqrt", 1, 1)?;
    let n = index_arg(&args.positional[0])?;
    if n < 0 {
        return value_error("isqrt() argument must be nonnegative");
    }
    let mut root = (n as f64).sqrt() as i64;
    while root.checked_mul(root).is_none_or(|square| square > n) {
        root -= 1;
    }
    while (root + 1).checked_mul(root + 1).is_some_and(|square| square <= n) {
        root += 1;
    }
    Ok(Value::Int(root))
}

fn hypot(_: &mut Interpreter, args: Args) -> Exec<Value> {
    args.finish("hypot")?;
    let mut total = 0.0f64;
    for value in &args.positional {
        total = total.hypot(real(value)?);
    }
    Ok(Value::Float(total))
}

fn dist(interp: &mut Interpreter, args: Args) -> Exec<Value> {
    args.finish("dist")?;
    args.expect("dist", 2, 2)?;
    let p = interp.collect(&args.positional[0])?;
    let q = interp.collect(&args.positional[1])?;
    if p.len() != q.len() {
        return value_error("both points must have the same number of dimensions");
    }
    let mut total = 0.0f64;
    for (a, b) in p.iter().zip(&q) {
        total = total.hypot(real(a)? - real(b)?);
    }
    Ok(Value::Float(total))
}

/// Compensated (Neumaier) summation.
fn fsum(interp: &mut Interpreter, args: Args) -> Exec<Value> {
    args.finish("fsum")?;
    args.expect("fsum", 1, 1)?;
    let mut sum = 0.0f64;
    let mut compensation = 0.0f64;
    for value in interp.collect(&args.positional[0])? {
        let x = real(&value)?;
        let t = sum + x;
        if sum.abs() >= x.abs() {
            compensation += (sum - t) + x;
        } else {
            compensation += (x - t) + sum;
        }
        sum = t;
    }
    Ok(Value::Float(sum + compensation))
}

fn prod(interp: &mut Interpreter, mut args: Args) -> Exec<Value> {
    let start = args.take_keyword("start");
    args.finish("prod")?;
    args.expect("prod", 1, 1)?;
    let max_len = interp.max_len();
    let mut total = start.unwrap_or(Value::Int(1));
    for value in interp.collect(&args.positional[0])? {
        interp.tick()?;
        total = ops::binary(BinOp::Mul, &total, &value, max_len)?;
    }
    Ok(total)
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

    fn call(name: &str, args: Vec<Value>) -> Exec<Value> {
        let Some(Value::Native(native)) = MODULE.attribute(name) else {
            panic!("math.{name} is missing");
        };
        (native.func)(&mut interpreter(), Args::new(args))
    }

    fn kind_of(result: Exec<Value>) -> ExcKind {
        match result {
            Err(Flow::Exception(raised)) => raised.exc.kind,
            other => panic!("expected an exception, got {:?}", other.ok()),
        }
    }

    #[test]
    fn sqrt_and_domain_errors() {
        assert!(matches!(call("sqrt", vec![Value::Int(16)]), Ok(Value::Float(x)) if x == 4.0));
        assert_eq!(kind_of(call("sqrt", vec![Value::Int(-1)])), ExcKind::ValueError);
        assert_eq!(kind_of(call("log", vec![Value::Int(0)])), ExcKind::ValueError);
        assert_eq!(kind_of(call("exp", vec![Value::Int(1000)])), ExcKind::OverflowError);
    }

    #[test]
    fn rounding_returns_ints() {
        assert!(matches!(call("floor", vec![Value::Float(-2.5)]), Ok(Value::Int(-3))));
        assert!(matches!(call("ceil", vec![Value::Float(2.1)]), Ok(Value::Int(3))));
        assert!(matches!(call("trunc", vec![Value::Float(-2.7)]), Ok(Value::Int(-2))));
    }

    #[test]
    fn integer_functions() {
        assert!(matches!(call("factorial", vec![Value::Int(5)]), Ok(Value::Int(120))));
        assert_eq!(kind_of(call("factorial", vec![Value::Int(-1)])), ExcKind::ValueError);
        assert_eq!(kind_of(call("factorial", vec![Value::Int(30)])), ExcKind::OverflowError);
        assert!(matches!(call("gcd", vec![Value::Int(12), Value::Int(-18)]), Ok(Value::Int(6))));
        assert!(matches!(call("lcm", vec![Value::Int(4), Value::Int(6)]), Ok(Value::Int(12))));
        assert!(matches!(call("comb", vec![Value::Int(5), Value::Int(2)]), Ok(Value::Int(10))));
        assert!(matches!(call("perm", vec![Value::Int(5), Value::Int(2)]), Ok(Value::Int(20))));
        assert!(matches!(call("isqrt", vec![Value::Int(17)]), Ok(Value::Int(4))));
    }

    #[test]
    fn log_with_base() {
        let Ok(Value::Float(x)) = call("log", vec![Value::Int(8), Value::Int(2)]) else {
            panic!("log failed");
        };
        assert!((x - 3.0).abs() < 1e-12);
    }

    #[test]
    fn fsum_compensates() {
        let values = Value::list(vec![Value::Float(0.1); 10]);
        assert!(matches!(call("fsum", vec![values]), Ok(Value::Float(x)) if x == 1.0));
    }

    #[test]
    fn isclose_tolerances() {
        assert!(matches!(
            call("isclose", vec![Value::Float(1.0), Value::Float(1.0 + 1e-10)]),
            Ok(Value::Bool(true))
        ));
        assert!(matches!(
            call("isclose", vec![Value::Float(1.0), Value::Float(1.1)]),
            Ok(Value::Bool(false))
        ));
    }
}
