use std::cmp::Ordering;

use bigdecimal::BigDecimal;
use num_bigint::BigInt;
use num_traits::{FromPrimitive, Zero};

use crate::bytecode::{Op, MAX_SAFE_INTEGER};

use super::{EvalError, Value};

/// Both operands of a binary operator after promotion to one
/// representation.
#[derive(Debug, Clone, PartialEq)]
pub enum Operands {
    Integers(BigInt, BigInt),
    Decimals(BigDecimal, BigDecimal),
}

/// Chooses the common representation for two numeric operands, first
/// matching rule wins:
///
/// 1. either is a decimal: both become decimals;
/// 2. either is a non-integral number: both become decimals;
/// 3. either is a number: both become integers, infinities clamped to
///    ±[`MAX_SAFE_INTEGER`];
/// 4. both are already integers.
///
/// Returns `None` when either operand is not numeric.
pub fn promote(left: &Value, right: &Value) -> Result<Option<Operands>, EvalError> {
    if !left.is_numeric() || !right.is_numeric() {
        return Ok(None);
    }
    let wants_decimal = |v: &Value| match v {
        Value::Decimal(_) => true,
        Value::Number(n) => n.is_finite() && n.fract() != 0.0,
        _ => false,
    };
    if wants_decimal(left) || wants_decimal(right) {
        return Ok(Some(Operands::Decimals(
            to_decimal(left)?,
            to_decimal(right)?,
        )));
    }
    Ok(Some(Operands::Integers(to_integer(left)?, to_integer(right)?)))
}

fn to_integer(value: &Value) -> Result<BigInt, EvalError> {
    let not_finite = || EvalError::NotFinite {
        value: value.clone(),
    };
    match value {
        Value::Number(n) if n.is_infinite() => {
            let max = BigInt::from(MAX_SAFE_INTEGER);
            Ok(if *n > 0.0 { max } else { -max })
        }
        Value::Number(n) => BigInt::from_f64(*n).ok_or_else(not_finite),
        Value::Integer(i) => Ok(i.clone()),
        Value::Decimal(d) => Ok(truncate(d)),
        _ => Err(not_finite()),
    }
}

fn to_decimal(value: &Value) -> Result<BigDecimal, EvalError> {
    value.clone().try_into().map_err(|_| EvalError::NotFinite {
        value: value.clone(),
    })
}

fn truncate(d: &BigDecimal) -> BigInt {
    d.with_scale(0).as_bigint_and_exponent().0
}

/// Keeps decimal results to `precision` significant digits.
pub fn round(value: BigDecimal, precision: u64) -> BigDecimal {
    if value.digits() > precision {
        value.with_prec(precision)
    } else {
        value
    }
}

/// `ADD`, `SUB`, `MUL`, `DIV` and `MOD`. A string on either side of `ADD`
/// concatenates display forms.
pub fn arithmetic(op: Op, left: &Value, right: &Value, precision: u64) -> Result<Value, EvalError> {
    if op == Op::Add && (matches!(left, Value::String(_)) || matches!(right, Value::String(_))) {
        return Ok(Value::String(format!("{}{}", left, right)));
    }

    let mismatch = || EvalError::TypeMismatch {
        operation: op,
        left: left.r#type(),
        right: right.r#type(),
    };
    let division_by_zero = || EvalError::DivisionByZero {
        left: left.clone(),
        right: right.clone(),
    };

    match promote(left, right)?.ok_or_else(mismatch)? {
        Operands::Integers(a, b) => {
            let res = match op {
                Op::Add => a + b,
                Op::Sub => a - b,
                Op::Mul => a * b,
                Op::Div | Op::Mod if b.is_zero() => return Err(division_by_zero()),
                Op::Div => a / b,
                Op::Mod => a % b,
                _ => return Err(mismatch()),
            };
            Ok(Value::Integer(res))
        }
        Operands::Decimals(a, b) => {
            let res = match op {
                Op::Add => a + b,
                Op::Sub => a - b,
                Op::Mul => a * b,
                Op::Div | Op::Mod if b.is_zero() => return Err(division_by_zero()),
                Op::Div => a / b,
                Op::Mod => a % b,
                _ => return Err(mismatch()),
            };
            Ok(Value::Decimal(round(res, precision)))
        }
    }
}

/// `EQ`, `NE`, `GT`, `LT`, `GTE` and `LTE`.
pub fn compare(op: Op, left: &Value, right: &Value) -> Result<bool, EvalError> {
    let ordering = match promote(left, right)? {
        Some(Operands::Integers(a, b)) => a.cmp(&b),
        Some(Operands::Decimals(a, b)) => a.cmp(&b),
        None => match (op, left, right) {
            (Op::Eq, _, _) => return Ok(left.same(right)),
            (Op::Ne, _, _) => return Ok(!left.same(right)),
            (_, Value::String(a), Value::String(b)) => a.cmp(b),
            _ => {
                return Err(EvalError::TypeMismatch {
                    operation: op,
                    left: left.r#type(),
                    right: right.r#type(),
                })
            }
        },
    };
    Ok(match op {
        Op::Eq => ordering == Ordering::Equal,
        Op::Ne => ordering != Ordering::Equal,
        Op::Gt => ordering == Ordering::Greater,
        Op::Lt => ordering == Ordering::Less,
        Op::Gte => ordering != Ordering::Less,
        Op::Lte => ordering != Ordering::Greater,
        _ => {
            return Err(EvalError::TypeMismatch {
                operation: op,
                left: left.r#type(),
                right: right.r#type(),
            })
        }
    })
}

pub fn negate(value: &Value) -> Result<Value, EvalError> {
    match value {
        Value::Number(n) => Ok(Value::Number(-n)),
        Value::Integer(i) => Ok(Value::Integer(-i)),
        Value::Decimal(d) => Ok(Value::Decimal(-d)),
        _ => Err(EvalError::InvalidOperand {
            operation: Op::Neg,
            r#type: value.r#type(),
        }),
    }
}

/// `NOT`: true for numeric zero, `null` and `undefined`.
pub fn logical_not(value: &Value) -> bool {
    !value.is_truthy()
}

/// `BITNOT` on the integer part of the operand.
pub fn bit_not(value: &Value) -> Result<Value, EvalError> {
    let i = match value {
        Value::Number(n) if n.is_finite() => BigInt::from_f64(n.trunc()).unwrap_or_default(),
        Value::Number(_) => {
            return Err(EvalError::NotFinite {
                value: value.clone(),
            })
        }
        Value::Integer(i) => i.clone(),
        Value::Decimal(d) => truncate(d),
        _ => {
            return Err(EvalError::InvalidOperand {
                operation: Op::BitNot,
                r#type: value.r#type(),
            })
        }
    };
    Ok(Value::Integer(-i - 1))
}
