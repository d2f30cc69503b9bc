use std::{rc::Rc, str::FromStr};

use bigdecimal::BigDecimal;
use num_bigint::BigInt;
use num_traits::{FromPrimitive, Signed, ToPrimitive, Zero};

use crate::bytecode::{Constant, Function};

#[derive(Clone, PartialEq, Debug)]
pub enum Value {
    Null,
    /// Bound to parameters the caller did not supply.
    Undefined,
    Number(f64),
    Integer(BigInt),
    Decimal(BigDecimal),
    String(String),
    Function(Rc<Function>),
}

impl Value {
    pub fn r#type(&self) -> ValueType {
        match self {
            Value::Null => ValueType::Null,
            Value::Undefined => ValueType::Undefined,
            Value::Number(_) => ValueType::Number,
            Value::Integer(_) => ValueType::Integer,
            Value::Decimal(_) => ValueType::Decimal,
            Value::String(_) => ValueType::String,
            Value::Function(_) => ValueType::Function,
        }
    }

    pub fn is_numeric(&self) -> bool {
        matches!(self, Value::Number(_) | Value::Integer(_) | Value::Decimal(_))
    }

    pub fn is_zero(&self) -> bool {
        match self {
            Value::Number(n) => *n == 0.0,
            Value::Integer(i) => i.is_zero(),
            Value::Decimal(d) => d.is_zero(),
            _ => false,
        }
    }

    /// Anything but numeric zero, `null` and `undefined`.
    pub fn is_truthy(&self) -> bool {
        !(self.is_zero() || matches!(self, Value::Null | Value::Undefined))
    }

    /// Equality for operands that are not both numeric. Functions compare
    /// by identity.
    pub fn same(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) | (Value::Undefined, Value::Undefined) => true,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Function(a), Value::Function(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub fn from_bool(b: bool) -> Value {
        Value::Number(if b { 1.0 } else { 0.0 })
    }

    /// Resolves host-supplied text the same way a literal would be: numeric
    /// text becomes a number, anything else stays a string.
    pub fn from_text(text: &str) -> Value {
        match Constant::parse_numeric(text) {
            Some(c) => c.into(),
            None => Value::String(text.to_owned()),
        }
    }
}

impl From<Constant> for Value {
    fn from(value: Constant) -> Self {
        match value {
            Constant::Null => Value::Null,
            Constant::Number(n) => Value::Number(n),
            Constant::Integer(i) => Value::Integer(i),
            Constant::Decimal(d) => Value::Decimal(d),
            Constant::String(s) => Value::String(s),
            Constant::Function(f) => Value::Function(f),
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Value::Null => f.write_str("null"),
            Value::Undefined => f.write_str("undefined"),
            Value::Number(n) => f.write_str(&format_number(*n)),
            Value::Integer(i) => write!(f, "{}", i),
            Value::Decimal(d) => f.write_str(&format_decimal(d)),
            Value::String(s) => f.write_str(s),
            Value::Function(func) => write!(f, "[function {}]", func.name),
        }
    }
}

pub fn format_number(n: f64) -> String {
    if n == 0.0 {
        "0".to_owned()
    } else if n.is_nan() {
        "NaN".to_owned()
    } else if n.is_infinite() {
        let text = if n > 0.0 { "Infinity" } else { "-Infinity" };
        text.to_owned()
    } else {
        n.to_string()
    }
}

/// Plain positional notation with trailing zeros removed; never
/// scientific.
pub fn format_decimal(d: &BigDecimal) -> String {
    let (digits, scale) = d.normalized().as_bigint_and_exponent();
    let mut text = digits.abs().to_string();
    if scale <= 0 {
        text.push_str(&"0".repeat(scale.unsigned_abs() as usize));
    } else {
        let scale = scale as usize;
        if text.len() <= scale {
            text = format!("{}{}", "0".repeat(scale - text.len() + 1), text);
        }
        text.insert(text.len() - scale, '.');
    }
    if digits.is_negative() {
        text.insert(0, '-');
    }
    text
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Hash)]
pub enum ValueType {
    Null,
    Undefined,
    Number,
    Integer,
    Decimal,
    String,
    Function,
}

impl std::fmt::Display for ValueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValueType::Null => write!(f, "null"),
            ValueType::Undefined => write!(f, "undefined"),
            ValueType::Number => write!(f, "number"),
            ValueType::Integer => write!(f, "bigint"),
            ValueType::Decimal => write!(f, "decimal"),
            ValueType::String => write!(f, "string"),
            ValueType::Function => write!(f, "function"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("could not convert to {r#type}: {value}")]
pub struct ConversionError {
    pub value: Value,
    pub r#type: ValueType,
}

impl TryInto<f64> for Value {
    type Error = ConversionError;
    fn try_into(self) -> Result<f64, Self::Error> {
        let converted = match &self {
            Value::Number(n) => Some(*n),
            Value::Integer(i) => i.to_f64(),
            Value::Decimal(d) => d.to_f64(),
            _ => None,
        };
        converted.ok_or(ConversionError {
            value: self,
            r#type: ValueType::Number,
        })
    }
}

impl TryInto<BigInt> for Value {
    type Error = ConversionError;
    fn try_into(self) -> Result<BigInt, Self::Error> {
        let converted = match &self {
            Value::Number(n) if n.fract() == 0.0 => BigInt::from_f64(*n),
            Value::Integer(i) => Some(i.clone()),
            Value::Decimal(d) if d.is_integer() => Some(d.with_scale(0).as_bigint_and_exponent().0),
            _ => None,
        };
        converted.ok_or(ConversionError {
            value: self,
            r#type: ValueType::Integer,
        })
    }
}

impl TryInto<BigDecimal> for Value {
    type Error = ConversionError;
    fn try_into(self) -> Result<BigDecimal, Self::Error> {
        let converted = match &self {
            Value::Number(n) if n.is_finite() => BigDecimal::from_str(&n.to_string()).ok(),
            Value::Integer(i) => Some(BigDecimal::new(i.clone(), 0)),
            Value::Decimal(d) => Some(d.clone()),
            _ => None,
        };
        converted.ok_or(ConversionError {
            value: self,
            r#type: ValueType::Decimal,
        })
    }
}
