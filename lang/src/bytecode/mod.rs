use std::{fmt::Display, rc::Rc, str::FromStr};

use bigdecimal::BigDecimal;
use itertools::Itertools;
use num_bigint::BigInt;
use num_traits::{Num, ToPrimitive};
use serde::{Deserialize, Serialize};

use crate::vm::{format_decimal, format_number};

pub mod cache;

/// Largest integer an `f64` represents exactly.
pub const MAX_SAFE_INTEGER: i64 = 9_007_199_254_740_991;

macro_rules! opcodes {
    {
        $(($ident:ident, $code:literal, $name:literal, $operands:literal),)*
    } => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum Op {
            $($ident = $code,)*
        }

        impl Op {
            pub const ALL: &'static [Op] = &[
                $(Op::$ident,)*
            ];

            pub fn name(self) -> &'static str {
                match self {
                    $(Op::$ident => $name,)*
                }
            }

            /// Number of operand words following the opcode word.
            pub fn operand_count(self) -> usize {
                match self {
                    $(Op::$ident => $operands,)*
                }
            }

            pub fn from_code(code: u8) -> Option<Op> {
                match code {
                    $($code => Some(Op::$ident),)*
                    _ => None,
                }
            }
        }
    };
}

opcodes! {
    (Push, 1, "PUSH", 1),
    (Load, 2, "LOAD", 1),
    (Store, 3, "STORE", 1),
    (Alloc, 4, "ALLOC", 1),
    (Add, 5, "ADD", 0),
    (Sub, 6, "SUB", 0),
    (Mul, 7, "MUL", 0),
    (Div, 8, "DIV", 0),
    (Mod, 9, "MOD", 0),
    (Call, 10, "CALL", 2),
    (Neg, 11, "NEG", 0),
    (Not, 12, "NOT", 0),
    (BitNot, 13, "BITNOT", 0),
    (Jmp, 14, "JMP", 1),
    (Jz, 15, "JZ", 1),
    (Eq, 16, "EQ", 0),
    (Ne, 17, "NE", 0),
    (Gt, 18, "GT", 0),
    (Lt, 19, "LT", 0),
    (Gte, 20, "GTE", 0),
    (Lte, 21, "LTE", 0),
    (Pop, 22, "POP", 0),
    (PushScope, 23, "PUSHSCP", 0),
    (PopScope, 24, "POPSCP", 0),
    (Return, 25, "RETURN", 0),
    (Halt, 26, "HALT", 0),
}

impl Op {
    pub fn code(self) -> u8 {
        self as u8
    }
}

impl Display for Op {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Constant {
    Null,
    Number(f64),
    Integer(BigInt),
    Decimal(BigDecimal),
    String(String),
    Function(Rc<Function>),
}

impl Constant {
    /// An integer as a `Number` when it is exactly representable, otherwise
    /// as an arbitrary-precision `Integer`.
    pub fn integer(value: BigInt) -> Constant {
        match value.to_i64() {
            Some(i) if (-MAX_SAFE_INTEGER..=MAX_SAFE_INTEGER).contains(&i) => {
                Constant::Number(i as f64)
            }
            _ => Constant::Integer(value),
        }
    }

    /// The single parser for numeric text: decimal, `0b` binary and `0x`
    /// hex integers, and decimal fractions. Returns `None` for anything
    /// else.
    pub fn parse_numeric(text: &str) -> Option<Constant> {
        let text = text.trim();
        let (negative, body) = match text.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, text.strip_prefix('+').unwrap_or(text)),
        };

        let radix_integer = |digits: &str, radix: u32| {
            if digits.is_empty() || !digits.chars().all(|c| c.is_digit(radix)) {
                return None;
            }
            BigInt::from_str_radix(digits, radix).ok()
        };
        let sign = |i: BigInt| if negative { -i } else { i };

        if let Some(digits) = body.strip_prefix("0b") {
            return radix_integer(digits, 2).map(sign).map(Constant::integer);
        }
        if let Some(digits) = body.strip_prefix("0x") {
            return radix_integer(digits, 16).map(sign).map(Constant::integer);
        }
        if let Some(i) = radix_integer(body, 10) {
            return Some(Constant::integer(sign(i)));
        }

        let (whole, fraction) = body.split_once('.')?;
        let is_digits = |s: &str| !s.is_empty() && s.chars().all(|c| c.is_ascii_digit());
        if !is_digits(whole) || !is_digits(fraction) {
            return None;
        }
        let decimal = BigDecimal::from_str(body).ok()?;
        Some(Constant::Decimal(if negative { -decimal } else { decimal }))
    }
}

impl Display for Constant {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Constant::Null => f.write_str("null"),
            Constant::Number(n) => f.write_str(&format_number(*n)),
            Constant::Integer(i) => write!(f, "{}", i),
            Constant::Decimal(d) => f.write_str(&format_decimal(d)),
            Constant::String(s) => write!(f, "{:?}", s),
            Constant::Function(func) => write!(f, "<function {}>", func.name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Function {
    pub name: String,
    pub parameters: Vec<String>,
    pub code: Code,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Word {
    Op(u8),
    Const(Constant),
    Name(String),
    Target(usize),
    Count(usize),
}

impl Word {
    pub fn op(op: Op) -> Word {
        Word::Op(op.code())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("Unknown operator code: \"{code}\" at {pc}")]
    UnknownOpcode { code: u8, pc: usize },

    #[error("expected an opcode at {pc}")]
    ExpectedOpcode { pc: usize },

    #[error("{op} at {pc} is missing its operands")]
    Truncated { op: Op, pc: usize },

    #[error("{op} at {pc} expects a {expected} operand")]
    WrongOperand {
        op: Op,
        pc: usize,
        expected: &'static str,
    },
}

/// One decoded opcode with its operand words.
#[derive(Debug, Clone, Copy)]
pub struct Instruction<'c> {
    pub op: Op,
    pub pc: usize,
    pub operands: &'c [Word],
}

impl<'c> Instruction<'c> {
    pub fn next_pc(&self) -> usize {
        self.pc + 1 + self.operands.len()
    }

    fn wrong(&self, expected: &'static str) -> DecodeError {
        DecodeError::WrongOperand {
            op: self.op,
            pc: self.pc,
            expected,
        }
    }

    pub fn constant(&self, idx: usize) -> Result<&'c Constant, DecodeError> {
        match self.operands.get(idx) {
            Some(Word::Const(c)) => Ok(c),
            _ => Err(self.wrong("constant")),
        }
    }

    pub fn name(&self, idx: usize) -> Result<&'c str, DecodeError> {
        match self.operands.get(idx) {
            Some(Word::Name(n)) => Ok(n),
            _ => Err(self.wrong("name")),
        }
    }

    pub fn target(&self, idx: usize) -> Result<usize, DecodeError> {
        match self.operands.get(idx) {
            Some(Word::Target(t)) => Ok(*t),
            _ => Err(self.wrong("jump target")),
        }
    }

    pub fn count(&self, idx: usize) -> Result<usize, DecodeError> {
        match self.operands.get(idx) {
            Some(Word::Count(n)) => Ok(*n),
            _ => Err(self.wrong("count")),
        }
    }
}

/// A flat instruction stream. Jump targets are absolute indices into
/// `words`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Code {
    pub words: Vec<Word>,
}

impl Code {
    pub fn len(&self) -> usize {
        self.words.len()
    }

    pub fn is_empty(&self) -> bool {
        self.words.is_empty()
    }

    pub fn fetch(&self, pc: usize) -> Result<Instruction<'_>, DecodeError> {
        let op = match self.words.get(pc) {
            Some(Word::Op(code)) => {
                Op::from_code(*code).ok_or(DecodeError::UnknownOpcode { code: *code, pc })?
            }
            _ => return Err(DecodeError::ExpectedOpcode { pc }),
        };
        let end = pc + 1 + op.operand_count();
        let operands = self
            .words
            .get(pc + 1..end)
            .ok_or(DecodeError::Truncated { op, pc })?;
        Ok(Instruction { op, pc, operands })
    }

    /// Decodes the whole stream, stopping at the first malformed word.
    pub fn instructions(&self) -> impl Iterator<Item = Result<Instruction<'_>, DecodeError>> {
        let mut pc = 0;
        let mut failed = false;
        std::iter::from_fn(move || {
            if failed || pc >= self.words.len() {
                return None;
            }
            let res = self.fetch(pc);
            match &res {
                Ok(instr) => pc = instr.next_pc(),
                Err(_) => failed = true,
            }
            Some(res)
        })
    }

    /// Function constants pushed anywhere in this stream.
    pub fn functions(&self) -> impl Iterator<Item = &Rc<Function>> {
        self.words.iter().filter_map(|w| match w {
            Word::Const(Constant::Function(f)) => Some(f),
            _ => None,
        })
    }

    fn disassemble(&self, f: &mut std::fmt::Formatter<'_>, indent: usize) -> std::fmt::Result {
        let pad = " ".repeat(indent);
        for instr in self.instructions() {
            let instr = match instr {
                Ok(instr) => instr,
                Err(e) => return writeln!(f, "{pad}!! {e}"),
            };
            let operands = instr
                .operands
                .iter()
                .map(|w| match w {
                    Word::Op(code) => format!("<op {code}>"),
                    Word::Const(c) => c.to_string(),
                    Word::Name(n) => n.clone(),
                    Word::Target(t) => format!("@{t}"),
                    Word::Count(n) => n.to_string(),
                })
                .join(" ");
            writeln!(f, "{pad}{:04} {:<8}{}", instr.pc, instr.op.name(), operands)?;
        }

        for func in self.functions() {
            writeln!(
                f,
                "\n{pad}function {}({}):",
                func.name,
                func.parameters.iter().join(", ")
            )?;
            func.code.disassemble(f, indent + 2)?;
        }
        Ok(())
    }
}

impl Display for Code {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.disassemble(f, 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn opcode_table_is_consistent() {
        for op in Op::ALL {
            assert_eq!(Op::from_code(op.code()), Some(*op));
        }
        assert_eq!(Op::Push.code(), 1);
        assert_eq!(Op::Return.code(), 25);
        assert_eq!(Op::Call.operand_count(), 2);
        assert_eq!(Op::from_code(0), None);
    }

    #[test]
    fn parses_numeric_text() {
        assert_eq!(Constant::parse_numeric("42"), Some(Constant::Number(42.0)));
        assert_eq!(Constant::parse_numeric(" -7 "), Some(Constant::Number(-7.0)));
        assert_eq!(Constant::parse_numeric("0b101"), Some(Constant::Number(5.0)));
        assert_eq!(Constant::parse_numeric("0xff"), Some(Constant::Number(255.0)));
        assert_eq!(
            Constant::parse_numeric("9007199254740993"),
            Some(Constant::Integer(BigInt::from(9_007_199_254_740_993_i64)))
        );
        assert_eq!(
            Constant::parse_numeric("9007199254740991"),
            Some(Constant::Number(9_007_199_254_740_991.0))
        );
        assert_eq!(
            Constant::parse_numeric("1.50"),
            Some(Constant::Decimal(BigDecimal::from_str("1.5").unwrap()))
        );
        assert_eq!(Constant::parse_numeric("1."), None);
        assert_eq!(Constant::parse_numeric("abc"), None);
        assert_eq!(Constant::parse_numeric("0b"), None);
        assert_eq!(Constant::parse_numeric(""), None);
    }

    #[test]
    fn fetch_reports_malformed_streams() {
        let code = Code {
            words: vec![Word::Op(99)],
        };
        assert_eq!(
            code.fetch(0).unwrap_err(),
            DecodeError::UnknownOpcode { code: 99, pc: 0 }
        );

        let code = Code {
            words: vec![Word::op(Op::Push)],
        };
        assert!(matches!(code.fetch(0), Err(DecodeError::Truncated { .. })));

        let code = Code {
            words: vec![Word::op(Op::Jmp), Word::Name("x".to_owned())],
        };
        let instr = code.fetch(0).unwrap();
        assert!(matches!(instr.target(0), Err(DecodeError::WrongOperand { .. })));

        let code = Code {
            words: vec![Word::Count(1)],
        };
        assert_eq!(code.fetch(0).unwrap_err(), DecodeError::ExpectedOpcode { pc: 0 });
    }

    #[test]
    fn disassembles_nested_functions() {
        let inner = Function {
            name: "f".to_owned(),
            parameters: vec!["a".to_owned()],
            code: Code {
                words: vec![
                    Word::op(Op::Load),
                    Word::Name("a".to_owned()),
                    Word::op(Op::Return),
                ],
            },
        };
        let code = Code {
            words: vec![
                Word::op(Op::Alloc),
                Word::Name("f".to_owned()),
                Word::op(Op::Push),
                Word::Const(Constant::Function(Rc::new(inner))),
                Word::op(Op::Store),
                Word::Name("f".to_owned()),
                Word::op(Op::Jz),
                Word::Target(0),
            ],
        };
        let listing = code.to_string();
        assert!(listing.contains("0002 PUSH    <function f>"));
        assert!(listing.contains("0006 JZ      @0"));
        assert!(listing.contains("function f(a):"));
        assert!(listing.contains("  0000 LOAD    a"));
    }
}
