use std::{
    io::{stdin, stdout, BufRead, BufReader, Read, Write},
    time::Instant,
};

use tracing::{debug, trace};

use crate::{
    bytecode::{Code, Function, Op},
    runtime::{Builtins, Host},
};

mod numeric;
mod scope;
mod stack;
mod value;

pub use numeric::{promote, round, Operands};
pub use scope::*;
pub use stack::*;
pub use value::*;

pub const DEFAULT_MAX_CALL_DEPTH: usize = 256;
pub const DEFAULT_PRECISION: u64 = 20;
/// Largest significant-digit count `setPrecision` and `--precision` accept.
pub const MAX_PRECISION: u64 = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Nested user-function calls allowed before `StackOverflow`.
    pub max_call_depth: usize,
    /// Significant digits kept by decimal arithmetic, at most
    /// [`MAX_PRECISION`].
    pub precision: u64,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            max_call_depth: DEFAULT_MAX_CALL_DEPTH,
            precision: DEFAULT_PRECISION,
        }
    }
}

pub struct Vm {
    pub stack: Stack,
    pub scopes: ScopeStack,
    pub pc: usize,
    pub config: Config,
    pub builtins: Builtins,

    pub stdin: Box<dyn BufRead>,
    pub stdout: Box<dyn Write>,

    call_depth: usize,
    started: Instant,
}

/// How a stream stopped running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    /// Ran off the end or hit `HALT`.
    Finished,
    /// Hit `RETURN`; the return value is on top of the stack.
    Returned,
}

impl Default for Vm {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl Vm {
    pub fn new(config: Config) -> Self {
        Vm {
            stack: Stack::default(),
            scopes: ScopeStack::new(),
            pc: 0,
            config,
            builtins: Builtins::standard(),
            stdin: Box::new(BufReader::new(stdin())),
            stdout: Box::new(stdout()),
            call_depth: 0,
            started: Instant::now(),
        }
    }

    pub fn with_stdin(mut self, stdin: impl Read + 'static) -> Self {
        self.stdin = Box::new(BufReader::new(stdin));
        self
    }

    pub fn with_stdout(mut self, stdout: impl Write + 'static) -> Self {
        self.stdout = Box::new(stdout);
        self
    }

    /// Runs a top-level stream to completion. Whatever the program leaves on
    /// the operand stack and in the global scope stays there for inspection.
    pub fn execute(&mut self, code: &Code) -> Result<(), EvalError> {
        self.pc = 0;
        let flow = self.run_stream(code)?;
        debug!(
            ?flow,
            stack = self.stack.len(),
            scopes = self.scopes.depth(),
            "execution finished"
        );
        Ok(())
    }

    fn run_stream(&mut self, code: &Code) -> Result<Flow, EvalError> {
        while self.pc < code.len() {
            let instr = code.fetch(self.pc)?;
            self.pc = instr.next_pc();

            match instr.op {
                Op::Push => self.stack.push(instr.constant(0)?.clone().into()),
                Op::Load => {
                    let value = self.scopes.lookup(instr.name(0)?)?.clone();
                    self.stack.push(value);
                }
                Op::Store => {
                    let value = self.stack.pop()?;
                    self.scopes.assign(instr.name(0)?, value)?;
                }
                Op::Alloc => self.scopes.declare(instr.name(0)?, Value::Null)?,

                Op::Add | Op::Sub | Op::Mul | Op::Div | Op::Mod => {
                    let right = self.stack.pop()?;
                    let left = self.stack.pop()?;
                    let res = numeric::arithmetic(instr.op, &left, &right, self.config.precision)?;
                    self.stack.push(res);
                }
                Op::Eq | Op::Ne | Op::Gt | Op::Lt | Op::Gte | Op::Lte => {
                    let right = self.stack.pop()?;
                    let left = self.stack.pop()?;
                    let res = numeric::compare(instr.op, &left, &right)?;
                    self.stack.push(Value::from_bool(res));
                }
                Op::Neg => {
                    let value = self.stack.pop()?;
                    self.stack.push(numeric::negate(&value)?);
                }
                Op::Not => {
                    let value = self.stack.pop()?;
                    self.stack.push(Value::from_bool(numeric::logical_not(&value)));
                }
                Op::BitNot => {
                    let value = self.stack.pop()?;
                    self.stack.push(numeric::bit_not(&value)?);
                }

                Op::Jmp => self.pc = jump_target(code, instr.target(0)?)?,
                Op::Jz => {
                    let target = jump_target(code, instr.target(0)?)?;
                    if self.stack.pop()?.is_zero() {
                        self.pc = target;
                    }
                }

                Op::Pop => {
                    self.stack.pop()?;
                }
                Op::PushScope => {
                    self.scopes.push();
                }
                Op::PopScope => self.scopes.pop()?,

                Op::Call => self.call(instr.name(0)?, instr.count(1)?)?,
                Op::Return => {
                    self.stack.check_size(1)?;
                    return Ok(Flow::Returned);
                }
                Op::Halt => return Ok(Flow::Finished),
            }
        }
        Ok(Flow::Finished)
    }

    /// Built-ins first (synchronous, then blocking), then a function value
    /// bound to `name`. The caller's counter and scope depth are restored
    /// whether or not the call succeeds.
    fn call(&mut self, name: &str, argc: usize) -> Result<(), EvalError> {
        if let Some((mode, f)) = self.builtins.lookup(name) {
            let args = self.stack.pop_n(argc)?;
            trace!(function = name, ?mode, argc, "built-in call");
            let mut host = Host {
                stack: &mut self.stack,
                scopes: &self.scopes,
                stdin: &mut self.stdin,
                stdout: &mut self.stdout,
                config: &mut self.config,
                started: self.started,
            };
            let res = f(&mut host, args).map_err(|source| EvalError::Builtin {
                name: name.to_owned(),
                source,
            })?;
            self.stack.push(res.unwrap_or(Value::Null));
            return Ok(());
        }

        let function = match self.scopes.get(name) {
            Some(Value::Function(f)) => f.clone(),
            Some(other) => {
                return Err(EvalError::NotCallable {
                    name: name.to_owned(),
                    r#type: other.r#type(),
                })
            }
            None => {
                return Err(EvalError::UndefinedFunction {
                    name: name.to_owned(),
                })
            }
        };
        if self.call_depth >= self.config.max_call_depth {
            return Err(EvalError::StackOverflow {
                depth: self.config.max_call_depth,
            });
        }

        let args = self.stack.pop_n(argc)?;
        let saved_pc = self.pc;
        let base = self.scopes.depth();
        self.call_depth += 1;
        trace!(function = name, argc, depth = self.call_depth, "call");

        let res = self.invoke(&function, args);

        self.call_depth -= 1;
        self.pc = saved_pc;
        self.scopes.truncate(base);
        trace!(function = name, ok = res.is_ok(), "return");
        res
    }

    fn invoke(&mut self, function: &Function, args: Vec<Value>) -> Result<(), EvalError> {
        self.scopes.push();
        let mut args = args.into_iter();
        for param in &function.parameters {
            let value = args.next().unwrap_or(Value::Undefined);
            self.scopes.declare(param, value)?;
        }

        self.pc = 0;
        if self.run_stream(&function.code)? == Flow::Finished {
            self.stack.push(Value::Null);
        }
        Ok(())
    }
}

fn jump_target(code: &Code, target: usize) -> Result<usize, EvalError> {
    if target < code.len() {
        Ok(target)
    } else {
        Err(EvalError::InvalidJumpTarget {
            target,
            len: code.len(),
        })
    }
}
