//! The functions every program can call without declaring them.

use std::io::Write;

use bigdecimal::BigDecimal;
use itertools::Itertools;
use num_bigint::BigInt;
use num_traits::{One, Signed, ToPrimitive, Zero};
use tracing::debug;

use crate::vm::{round, ConversionError, Value, ValueType, MAX_PRECISION};

use super::{unpack, Builtins, BuiltinArgumentResult, BuiltinError, Host, Mode};

const ROOT_ITERATIONS: usize = 500;

pub fn register(builtins: &mut Builtins) {
    builtins.register(Mode::Sync, "print", print);
    builtins.register(Mode::Sync, "concat", concat);
    builtins.register(Mode::Sync, "now", now);
    builtins.register(Mode::Sync, "root", root);
    builtins.register(Mode::Sync, "setPrecision", set_precision);
    builtins.register(Mode::Sync, "sine", sine);
    builtins.register(Mode::Sync, "cosine", cosine);
    builtins.register(Mode::Sync, "raise", raise);
    builtins.register(Mode::Blocking, "input", input);
}

fn print(host: &mut Host<'_>, args: Vec<Value>) -> Result<Option<Value>, BuiltinError> {
    writeln!(host.stdout, "{}", args.iter().join(""))?;
    Ok(None)
}

fn concat(_: &mut Host<'_>, args: Vec<Value>) -> Result<Option<Value>, BuiltinError> {
    Ok(Some(Value::String(args.iter().join(""))))
}

fn now(host: &mut Host<'_>, args: Vec<Value>) -> Result<Option<Value>, BuiltinError> {
    let [] = unpack::<0>("now", args, 0)?;
    Ok(Some(Value::Number(host.started.elapsed().as_millis() as f64)))
}

fn set_precision(host: &mut Host<'_>, args: Vec<Value>) -> Result<Option<Value>, BuiltinError> {
    let [value] = unpack::<1>("setPrecision", args, 1)?;
    let as_integer: Result<BigInt, _> = value.clone().try_into();
    let precision = as_integer
        .ok()
        .and_then(|p| p.to_u64())
        .filter(|p| (1..=MAX_PRECISION).contains(p));
    let Some(precision) = precision else {
        return Err(BuiltinError::InvalidPrecision { value });
    };
    debug!(precision, "decimal precision changed");
    host.config.precision = precision;
    Ok(None)
}

fn sine(_: &mut Host<'_>, args: Vec<Value>) -> Result<Option<Value>, BuiltinError> {
    let [x] = unpack::<1>("sine", args, 1)?;
    let x: f64 = x.at_index(0)?;
    Ok(Some(Value::Number(x.sin())))
}

fn cosine(_: &mut Host<'_>, args: Vec<Value>) -> Result<Option<Value>, BuiltinError> {
    let [x] = unpack::<1>("cosine", args, 1)?;
    let x: f64 = x.at_index(0)?;
    Ok(Some(Value::Number(x.cos())))
}

fn input(host: &mut Host<'_>, args: Vec<Value>) -> Result<Option<Value>, BuiltinError> {
    write!(host.stdout, "{}", args.iter().join(""))?;
    host.stdout.flush()?;

    let mut line = String::new();
    if host.stdin.read_line(&mut line)? == 0 {
        return Ok(None);
    }
    let line = line.trim_end_matches(['\n', '\r']);
    Ok(Some(host.resolve(line)))
}

/// `base ** exponent` where `exponent` is a non-negative integer, rounding
/// after every multiplication.
fn pow_decimal(base: &BigDecimal, exponent: u64, precision: u64) -> BigDecimal {
    let mut res = BigDecimal::one();
    let mut square = base.clone();
    let mut e = exponent;
    while e > 0 {
        if e & 1 == 1 {
            res = round(&res * &square, precision);
        }
        square = round(&square * &square, precision);
        e >>= 1;
    }
    res
}

/// Newton's method for the `n`th root of a non-negative decimal.
fn nth_root(base: &BigDecimal, n: u64, precision: u64) -> BigDecimal {
    let working = precision + 5;
    let tolerance = BigDecimal::new(BigInt::one(), (precision + 2) as i64);
    let n_dec = BigDecimal::from(n);

    let guess = base
        .to_f64()
        .map(|b| b.powf(1.0 / n as f64))
        .filter(|g| g.is_finite() && *g > 0.0)
        .and_then(|g| BigDecimal::try_from(g).ok());
    let mut x = guess.unwrap_or_else(BigDecimal::one);

    for _ in 0..ROOT_ITERATIONS {
        let correction = round(base / pow_decimal(&x, n - 1, working), working);
        let next = round((&x * (&n_dec - BigDecimal::one()) + correction) / &n_dec, working);
        let done = (&next - &x).abs() < tolerance;
        x = next;
        if done {
            break;
        }
    }
    round(x, precision)
}

fn root(host: &mut Host<'_>, args: Vec<Value>) -> Result<Option<Value>, BuiltinError> {
    let [base, n, scientific] = unpack::<3>("root", args, 2)?;
    let base: BigDecimal = base.at_index(0)?;
    let n_value = n.clone();
    let n: BigInt = n.at_index(1)?;
    let Some(n) = n.to_u64().filter(|n| *n > 0) else {
        return Err(BuiltinError::Domain {
            function: "root",
            value: n_value,
        });
    };

    let precision = host.config.precision.min(MAX_PRECISION);
    let res = if base.is_one() || n == 1 {
        base
    } else if base.is_negative() {
        if n % 2 == 0 {
            return Err(BuiltinError::Domain {
                function: "root",
                value: Value::Decimal(base),
            });
        }
        -nth_root(&-base, n, precision)
    } else if base.is_zero() {
        base
    } else {
        nth_root(&base, n, precision)
    };

    if scientific.is_truthy() {
        return Ok(Some(Value::Number(res.to_f64().unwrap_or(f64::NAN))));
    }
    Ok(Some(Value::Decimal(res)))
}

fn raise(host: &mut Host<'_>, args: Vec<Value>) -> Result<Option<Value>, BuiltinError> {
    let [base, exponent, scientific] = unpack::<3>("raise", args, 2)?;
    if !base.is_numeric() {
        return Err(not_a_number(base, 0));
    }
    if !exponent.is_numeric() {
        return Err(not_a_number(exponent, 1));
    }

    if base.is_zero() && exponent.is_zero() {
        return Err(BuiltinError::ZeroToZero);
    }
    if base.is_zero() {
        return Ok(Some(Value::Number(0.0)));
    }
    let base_is_one = matches!(&base, Value::Number(n) if *n == 1.0)
        || matches!(&base, Value::Integer(i) if i.is_one())
        || matches!(&base, Value::Decimal(d) if d.is_one());
    if base_is_one {
        return Ok(Some(Value::Number(1.0)));
    }

    if scientific.is_truthy() {
        let b: f64 = base.at_index(0)?;
        let e: f64 = exponent.at_index(1)?;
        return Ok(Some(Value::Number(b.powf(e))));
    }

    let integral_base = match &base {
        Value::Number(n) => n.fract() == 0.0,
        Value::Integer(_) => true,
        _ => false,
    };
    let integral_exponent: Option<BigInt> = exponent.clone().try_into().ok();
    let precision = host.config.precision.min(MAX_PRECISION);
    match (integral_base, integral_exponent) {
        (true, Some(e)) => {
            let b: BigInt = base.at_index(0)?;
            if e.is_negative() {
                return Err(BuiltinError::NegativeExponent { exponent: e });
            }
            let e_small = e
                .to_u32()
                .ok_or(BuiltinError::ExponentTooLarge { exponent: e.clone() })?;
            Ok(Some(Value::Integer(b.pow(e_small))))
        }
        (_, Some(e)) => {
            let b: BigDecimal = base.at_index(0)?;
            let magnitude = e
                .abs()
                .to_u64()
                .ok_or(BuiltinError::ExponentTooLarge { exponent: e.clone() })?;
            let res = pow_decimal(&b, magnitude, precision + 5);
            let res = if e.is_negative() {
                BigDecimal::one() / res
            } else {
                res
            };
            Ok(Some(Value::Decimal(round(res, precision))))
        }
        (_, None) => {
            let b: f64 = base.at_index(0)?;
            let e: f64 = exponent.at_index(1)?;
            let res = b.powf(e);
            let res = BigDecimal::try_from(res).map_err(|_| BuiltinError::Domain {
                function: "raise",
                value: Value::Number(res),
            })?;
            Ok(Some(Value::Decimal(round(res, precision))))
        }
    }
}

fn not_a_number(value: Value, index: usize) -> BuiltinError {
    BuiltinError::InvalidArgument {
        index,
        conversion_error: ConversionError {
            value,
            r#type: ValueType::Number,
        },
    }
}

#[cfg(test)]
mod tests {
    use std::{
        io::{BufRead, Cursor},
        str::FromStr,
        time::Instant,
    };

    use crate::vm::{Config, ScopeStack, Stack};

    use super::*;

    struct Fixture {
        stack: Stack,
        scopes: ScopeStack,
        stdin: Box<dyn BufRead>,
        stdout: Box<dyn Write>,
        config: Config,
    }

    impl Fixture {
        fn new(stdin: &str) -> Self {
            Fixture {
                stack: Stack::default(),
                scopes: ScopeStack::new(),
                stdin: Box::new(Cursor::new(stdin.as_bytes().to_vec())),
                stdout: Box::new(Vec::new()),
                config: Config::default(),
            }
        }

        fn call(&mut self, name: &str, args: Vec<Value>) -> Result<Option<Value>, BuiltinError> {
            let (_, f) = Builtins::standard().lookup(name).unwrap();
            let mut host = Host {
                stack: &mut self.stack,
                scopes: &self.scopes,
                stdin: &mut self.stdin,
                stdout: &mut self.stdout,
                config: &mut self.config,
                started: Instant::now(),
            };
            f(&mut host, args)
        }
    }

    fn num(n: f64) -> Value {
        Value::Number(n)
    }

    fn decimal(s: &str) -> Value {
        Value::Decimal(BigDecimal::from_str(s).unwrap())
    }

    #[test]
    fn concat_joins_display_forms() {
        let mut fx = Fixture::new("");
        let res = fx
            .call(
                "concat",
                vec![Value::String("a".to_owned()), num(1.0), decimal("2.50"), Value::Null],
            )
            .unwrap();
        assert_eq!(res, Some(Value::String("a12.5null".to_owned())));
    }

    #[test]
    fn roots() {
        let mut fx = Fixture::new("");
        assert_eq!(fx.call("root", vec![num(27.0), num(3.0)]).unwrap(), Some(decimal("3")));
        assert_eq!(fx.call("root", vec![num(1.0), num(5.0)]).unwrap(), Some(decimal("1")));
        assert_eq!(fx.call("root", vec![num(7.0), num(1.0)]).unwrap(), Some(decimal("7")));
        assert_eq!(
            fx.call("root", vec![num(2.0), num(2.0)]).unwrap(),
            Some(decimal("1.4142135623730950488"))
        );
        assert_eq!(fx.call("root", vec![num(-8.0), num(3.0)]).unwrap(), Some(decimal("-2")));
        assert!(matches!(
            fx.call("root", vec![num(-4.0), num(2.0)]),
            Err(BuiltinError::Domain { .. })
        ));
        assert_eq!(
            fx.call("root", vec![num(16.0), num(2.0), num(1.0)]).unwrap(),
            Some(num(4.0))
        );
        assert!(matches!(
            fx.call("root", vec![num(1.0), num(2.0), num(0.0), num(0.0)]),
            Err(BuiltinError::TooManyArguments { max: 3, .. })
        ));
    }

    #[test]
    fn raising() {
        let mut fx = Fixture::new("");
        assert_eq!(
            fx.call("raise", vec![num(2.0), num(64.0)]).unwrap(),
            Some(Value::Integer(BigInt::from(2).pow(64u32)))
        );
        assert_eq!(
            fx.call("raise", vec![num(2.0), num(3.0), num(1.0)]).unwrap(),
            Some(num(8.0))
        );
        assert_eq!(fx.call("raise", vec![decimal("1.5"), num(2.0)]).unwrap(), Some(decimal("2.25")));
        assert_eq!(fx.call("raise", vec![decimal("2.0"), num(-1.0)]).unwrap(), Some(decimal("0.5")));
        assert_eq!(fx.call("raise", vec![num(0.0), num(5.0)]).unwrap(), Some(num(0.0)));
        assert_eq!(fx.call("raise", vec![num(1.0), num(1e9)]).unwrap(), Some(num(1.0)));

        let err = fx.call("raise", vec![num(0.0), num(0.0)]).unwrap_err();
        assert_eq!(err.to_string(), "0 raised to 0 can't be evaluated");
        assert!(matches!(
            fx.call("raise", vec![num(2.0), num(-1.0)]),
            Err(BuiltinError::NegativeExponent { .. })
        ));
        assert!(matches!(
            fx.call("raise", vec![Value::String("2".to_owned()), num(1.0)]),
            Err(BuiltinError::InvalidArgument { index: 0, .. })
        ));
    }

    #[test]
    fn precision_is_host_config() {
        let mut fx = Fixture::new("");
        fx.call("setPrecision", vec![num(5.0)]).unwrap();
        assert_eq!(fx.config.precision, 5);
        assert_eq!(
            fx.call("root", vec![num(2.0), num(2.0)]).unwrap(),
            Some(decimal("1.4142"))
        );
        assert!(matches!(
            fx.call("setPrecision", vec![num(0.0)]),
            Err(BuiltinError::InvalidPrecision { .. })
        ));
        assert!(matches!(
            fx.call("setPrecision", vec![num(2.5)]),
            Err(BuiltinError::InvalidPrecision { .. })
        ));
        let huge = Value::Integer(BigInt::from(u64::MAX));
        assert!(matches!(
            fx.call("setPrecision", vec![huge]),
            Err(BuiltinError::InvalidPrecision { .. })
        ));
        assert_eq!(fx.config.precision, 5);
    }

    #[test]
    fn oversized_config_precision_is_clamped() {
        let mut fx = Fixture::new("");
        fx.config.precision = u64::MAX;
        assert_eq!(
            fx.call("raise", vec![decimal("1.5"), num(2.0)]).unwrap(),
            Some(decimal("2.25"))
        );
        assert_eq!(
            fx.call("root", vec![num(16.0), num(2.0)]).unwrap(),
            Some(decimal("4"))
        );
    }

    #[test]
    fn trigonometry() {
        let mut fx = Fixture::new("");
        assert_eq!(fx.call("sine", vec![num(0.0)]).unwrap(), Some(num(0.0)));
        assert_eq!(fx.call("cosine", vec![Value::Integer(BigInt::from(0))]).unwrap(), Some(num(1.0)));
        assert!(matches!(
            fx.call("sine", vec![Value::Null]),
            Err(BuiltinError::InvalidArgument { index: 0, .. })
        ));
    }

    #[test]
    fn input_reads_a_line() {
        let mut fx = Fixture::new("42\r\nhello\n");
        assert_eq!(
            fx.call("input", vec![Value::String("n? ".to_owned())]).unwrap(),
            Some(num(42.0))
        );
        assert_eq!(
            fx.call("input", vec![]).unwrap(),
            Some(Value::String("hello".to_owned()))
        );
        assert_eq!(fx.call("input", vec![]).unwrap(), None);
    }
}
