use std::{
    collections::BTreeMap,
    io::{BufRead, Write},
    time::Instant,
};

use num_bigint::BigInt;

use crate::vm::{Config, ConversionError, ScopeStack, Stack, Value};

pub mod stdlib;

/// Host functions receive the popped call arguments in call order and
/// return `None` for `null`.
pub type BuiltinFn = fn(&mut Host<'_>, Vec<Value>) -> Result<Option<Value>, BuiltinError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Mode {
    Sync,
    /// Waits on the host, e.g. for a line of input. Runs inline on the
    /// dispatch loop so program order is preserved.
    Blocking,
}

#[derive(Clone, Default)]
pub struct Builtins {
    sync: BTreeMap<&'static str, BuiltinFn>,
    blocking: BTreeMap<&'static str, BuiltinFn>,
}

impl Builtins {
    /// The standard library.
    pub fn standard() -> Self {
        let mut builtins = Self::default();
        stdlib::register(&mut builtins);
        builtins
    }

    pub fn register(&mut self, mode: Mode, name: &'static str, f: BuiltinFn) {
        match mode {
            Mode::Sync => self.sync.insert(name, f),
            Mode::Blocking => self.blocking.insert(name, f),
        };
    }

    /// Synchronous functions shadow blocking ones of the same name.
    pub fn lookup(&self, name: &str) -> Option<(Mode, BuiltinFn)> {
        if let Some(f) = self.sync.get(name) {
            return Some((Mode::Sync, *f));
        }
        self.blocking.get(name).map(|f| (Mode::Blocking, *f))
    }
}

/// What a host function may touch while it runs.
pub struct Host<'a> {
    pub stack: &'a mut Stack,
    pub scopes: &'a ScopeStack,
    pub stdin: &'a mut Box<dyn BufRead>,
    pub stdout: &'a mut Box<dyn Write>,
    pub config: &'a mut Config,
    pub started: Instant,
}

impl Host<'_> {
    /// Resolves text to a value: a bound variable name yields its value,
    /// numeric text a number, anything else a string.
    pub fn resolve(&self, text: &str) -> Value {
        match self.scopes.get(text) {
            Some(v) => v.clone(),
            None => Value::from_text(text),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BuiltinError {
    #[error("FunctionArgumentError: Function \"{function}\" only takes {max} argument(s)")]
    TooManyArguments { function: &'static str, max: usize },

    #[error("FunctionArgumentError: Function \"{function}\" needs at least {min} argument(s)")]
    MissingArguments { function: &'static str, min: usize },

    #[error("while converting argument {index}: {conversion_error}")]
    InvalidArgument {
        index: usize,
        conversion_error: ConversionError,
    },

    #[error("Exponent \"{exponent}\" must not be negative when raising an integer")]
    NegativeExponent { exponent: BigInt },

    #[error("Exponent \"{exponent}\" is too large")]
    ExponentTooLarge { exponent: BigInt },

    #[error("0 raised to 0 can't be evaluated")]
    ZeroToZero,

    #[error("{function} is undefined for {value}")]
    Domain { function: &'static str, value: Value },

    #[error(
        "Decimal precision must be an integer from 1 to {}, got {value}",
        crate::vm::MAX_PRECISION
    )]
    InvalidPrecision { value: Value },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub(crate) trait BuiltinArgumentResult<T>: Sized {
    fn into_result(self) -> Result<T, ConversionError>;

    fn at_index(self, index: usize) -> Result<T, BuiltinError> {
        self.into_result()
            .map_err(|e| BuiltinError::InvalidArgument {
                index,
                conversion_error: e,
            })
    }
}

impl<T, U> BuiltinArgumentResult<T> for U
where
    U: TryInto<T, Error = ConversionError>,
{
    fn into_result(self) -> Result<T, ConversionError> {
        self.try_into()
    }
}

/// Checks the argument count and pads missing optional arguments with
/// `undefined`.
pub(crate) fn unpack<const N: usize>(
    function: &'static str,
    mut args: Vec<Value>,
    required: usize,
) -> Result<[Value; N], BuiltinError> {
    if args.len() > N {
        return Err(BuiltinError::TooManyArguments { function, max: N });
    }
    if args.len() < required {
        return Err(BuiltinError::MissingArguments {
            function,
            min: required,
        });
    }
    args.resize(N, Value::Undefined);
    args.try_into()
        .map_err(|_| BuiltinError::TooManyArguments { function, max: N })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop(_: &mut Host<'_>, _: Vec<Value>) -> Result<Option<Value>, BuiltinError> {
        Ok(None)
    }

    #[test]
    fn sync_table_wins() {
        let mut builtins = Builtins::default();
        builtins.register(Mode::Blocking, "f", noop);
        assert_eq!(builtins.lookup("f").map(|(m, _)| m), Some(Mode::Blocking));
        builtins.register(Mode::Sync, "f", noop);
        assert_eq!(builtins.lookup("f").map(|(m, _)| m), Some(Mode::Sync));
        assert!(builtins.lookup("g").is_none());
    }

    #[test]
    fn standard_library_names() {
        let builtins = Builtins::standard();
        for name in [
            "print",
            "concat",
            "now",
            "root",
            "setPrecision",
            "sine",
            "cosine",
            "raise",
            "input",
        ] {
            assert!(builtins.lookup(name).is_some(), "missing {name}");
        }
        assert_eq!(
            builtins.lookup("input").map(|(m, _)| m),
            Some(Mode::Blocking)
        );
    }

    #[test]
    fn unpack_pads_and_limits() {
        let [a, b] = unpack::<2>("f", vec![Value::Null], 1).unwrap();
        assert_eq!((a, b), (Value::Null, Value::Undefined));

        let err = unpack::<1>("sine", vec![Value::Null, Value::Null], 1).unwrap_err();
        assert_eq!(
            err.to_string(),
            "FunctionArgumentError: Function \"sine\" only takes 1 argument(s)"
        );
        assert!(matches!(
            unpack::<2>("f", vec![], 1),
            Err(BuiltinError::MissingArguments { .. })
        ));
    }

    #[test]
    fn resolve_prefers_bound_names() {
        let mut stack = Stack::default();
        let mut scopes = ScopeStack::new();
        scopes.declare("x", Value::Number(3.0)).unwrap();
        let mut stdin: Box<dyn BufRead> = Box::new(std::io::empty());
        let mut stdout: Box<dyn Write> = Box::new(std::io::sink());
        let mut config = Config::default();
        let host = Host {
            stack: &mut stack,
            scopes: &scopes,
            stdin: &mut stdin,
            stdout: &mut stdout,
            config: &mut config,
            started: Instant::now(),
        };
        assert_eq!(host.resolve("x"), Value::Number(3.0));
        assert_eq!(host.resolve("4"), Value::Number(4.0));
        assert_eq!(host.resolve("y"), Value::String("y".to_owned()));
    }
}
