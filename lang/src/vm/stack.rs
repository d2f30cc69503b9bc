use crate::{
    bytecode::{DecodeError, Op},
    runtime::BuiltinError,
    vm::value::{Value, ValueType},
};

#[derive(Debug, Default, Clone)]
pub struct Stack {
    inner: Vec<Value>,
}

#[derive(Debug, thiserror::Error)]
pub enum EvalError {
    #[error("POP on empty stack")]
    EmptyStack,

    #[error("stack underflow: needed {needed} values, found {found}")]
    StackUnderflow { needed: usize, found: usize },

    #[error("{name} is not defined")]
    UndefinedVariable { name: String },

    #[error("Identifier \"{name}\" already declared in this scope")]
    Redeclaration { name: String },

    #[error("Assignment to a constant \"{name}\"")]
    ConstantAssignment { name: String },

    #[error("Cannot pop global scope")]
    PopGlobalScope,

    #[error("Function \"{name}\" does not exist")]
    UndefinedFunction { name: String },

    #[error("\"{name}\" is a {r#type}, not a function")]
    NotCallable { name: String, r#type: ValueType },

    #[error("Operands must not divide by 0: {left}/{right}")]
    DivisionByZero { left: Value, right: Value },

    #[error("cannot apply {operation} to {left} and {right}")]
    TypeMismatch {
        operation: Op,
        left: ValueType,
        right: ValueType,
    },

    #[error("cannot apply {operation} to {r#type}")]
    InvalidOperand { operation: Op, r#type: ValueType },

    #[error("{value} is not a finite number")]
    NotFinite { value: Value },

    #[error("maximum call depth of {depth} exceeded")]
    StackOverflow { depth: usize },

    #[error("jump target {target} is outside the instruction stream (length {len})")]
    InvalidJumpTarget { target: usize, len: usize },

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error("{source}")]
    Builtin { name: String, source: BuiltinError },
}

impl Stack {
    pub fn pop(&mut self) -> Result<Value, EvalError> {
        self.inner.pop().ok_or(EvalError::EmptyStack)
    }

    pub fn push(&mut self, value: Value) {
        self.inner.push(value)
    }

    /// Pops `count` values, returned in the order they were pushed.
    pub fn pop_n(&mut self, count: usize) -> Result<Vec<Value>, EvalError> {
        self.check_size(count)?;
        Ok(self.inner.split_off(self.inner.len() - count))
    }

    pub fn check_size(&self, size: usize) -> Result<(), EvalError> {
        if self.len() < size {
            Err(EvalError::StackUnderflow {
                needed: size,
                found: self.len(),
            })
        } else {
            Ok(())
        }
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Value> {
        self.inner.iter()
    }

    pub fn len(&self) -> usize {
        self.inner.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pop_n_keeps_push_order() {
        let mut stack = Stack::default();
        for i in 0..4 {
            stack.push(Value::Number(i as f64));
        }
        let args = stack.pop_n(3).unwrap();
        assert_eq!(
            args,
            vec![Value::Number(1.0), Value::Number(2.0), Value::Number(3.0)]
        );
        assert_eq!(stack.len(), 1);
        assert!(matches!(
            stack.pop_n(2),
            Err(EvalError::StackUnderflow { needed: 2, found: 1 })
        ));
    }

    #[test]
    fn pop_on_empty() {
        let mut stack = Stack::default();
        let err = stack.pop().unwrap_err();
        assert_eq!(err.to_string(), "POP on empty stack");
    }
}
