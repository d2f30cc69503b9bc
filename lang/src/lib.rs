pub mod ast;
pub mod bytecode;
pub mod compiler;
pub mod lexer;
pub mod parser;
pub mod runtime;
pub mod source;
pub mod vm;

use std::io::Write;

use tracing::{debug, info_span};

pub use bytecode::{cache::Cache, Code};
pub use vm::{Config, Value, Vm};

use bytecode::cache::CacheError;
use compiler::CompileError;
use parser::ParseError;
use source::LoadError;
use vm::EvalError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Load(#[from] LoadError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Compile(#[from] CompileError),

    #[error(transparent)]
    Eval(#[from] EvalError),

    #[error(transparent)]
    Cache(#[from] CacheError),
}

/// Lexes, parses, and compiles `source` into a top-level stream.
pub fn build(source: &str) -> Result<Code, Error> {
    let _span = info_span!("build").entered();

    let tokens = lexer::tokenize(source);
    debug!(tokens = tokens.len(), "lexed");

    let program = parser::parse(&tokens)?;
    debug!(statements = program.body.len(), "parsed");

    let code = compiler::compile(&program)?;
    debug!(words = code.len(), "compiled");
    Ok(code)
}

/// Builds and runs `source` on a fresh VM that prints to `stdout`. The VM
/// is handed back so callers can inspect what the program left behind; on
/// failure it is dropped along with the error.
pub fn run_source(
    source: &str,
    config: Config,
    stdout: impl Write + 'static,
) -> Result<Vm, Error> {
    let code = build(source)?;
    let mut vm = Vm::new(config).with_stdout(stdout);
    vm.execute(&code)?;
    vm.stdout.flush().map_err(|e| EvalError::Builtin {
        name: "print".to_owned(),
        source: e.into(),
    })?;
    Ok(vm)
}
