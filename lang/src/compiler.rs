use std::rc::Rc;

use tracing::debug;

use crate::{
    ast::{Block, Expr, Operator, Program, Stmt},
    bytecode::{Code, Constant, Function, Op, Word},
    lexer::unquote,
    source::Location,
};

/// Prefix of the hidden variables that hold a postfix operand's old value.
pub const TEMP_PREFIX: &str = "__$temp";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CompileError {
    #[error("Break statement outside of loop at {location}")]
    BreakOutsideLoop { location: Location },

    #[error("Continue statement outside of loop at {location}")]
    ContinueOutsideLoop { location: Location },

    #[error("Unknown {kind} operator \"{operator}\" at {location}")]
    UnknownOperator {
        kind: &'static str,
        operator: Operator,
        location: Location,
    },

    #[error("Cannot apply \"{operator}\" to a {kind} at {location}")]
    InvalidUpdateTarget {
        operator: Operator,
        kind: &'static str,
        location: Location,
    },

    #[error("Invalid numeric literal \"{text}\" at {location}")]
    InvalidLiteral { text: String, location: Location },
}

/// Pending jumps out of one loop. `depth` is the static scope depth at
/// which the loop's `break` and `continue` land.
#[derive(Debug, Default)]
struct LoopContext {
    depth: usize,
    breaks: Vec<usize>,
    continues: Vec<usize>,
}

/// One instruction stream under construction. Every function body gets its
/// own, so loop contexts never leak into nested functions.
#[derive(Debug, Default)]
struct CodeBuilder {
    words: Vec<Word>,
    loops: Vec<LoopContext>,
    depth: usize,
}

impl CodeBuilder {
    fn here(&self) -> usize {
        self.words.len()
    }

    fn emit(&mut self, op: Op) {
        self.words.push(Word::op(op));
    }

    fn emit_name(&mut self, op: Op, name: &str) {
        self.emit(op);
        self.words.push(Word::Name(name.to_owned()));
    }

    fn emit_push(&mut self, constant: Constant) {
        self.emit(Op::Push);
        self.words.push(Word::Const(constant));
    }

    fn emit_call(&mut self, name: &str, argc: usize) {
        self.emit_name(Op::Call, name);
        self.words.push(Word::Count(argc));
    }

    /// Emits a jump with a placeholder target and returns the index of the
    /// target word for [`CodeBuilder::patch`].
    fn emit_jump(&mut self, op: Op) -> usize {
        self.emit(op);
        let site = self.here();
        self.words.push(Word::Target(usize::MAX));
        site
    }

    fn emit_jump_to(&mut self, op: Op, target: usize) {
        self.emit(op);
        self.words.push(Word::Target(target));
    }

    fn patch(&mut self, site: usize, target: usize) {
        self.words[site] = Word::Target(target);
    }

    fn push_scope(&mut self) {
        self.emit(Op::PushScope);
        self.depth += 1;
    }

    fn pop_scope(&mut self) {
        self.emit(Op::PopScope);
        self.depth -= 1;
    }

    /// Pops scopes down to `depth` for a jump that leaves them. The static
    /// depth is unchanged since the code after the jump is still inside.
    fn unwind_to(&mut self, depth: usize) {
        for _ in depth..self.depth {
            self.emit(Op::PopScope);
        }
    }

    /// Pops the innermost loop context and patches its pending jumps.
    fn close_loop(&mut self, next: usize, end: usize) {
        let Some(ctx) = self.loops.pop() else {
            return;
        };
        for site in ctx.breaks {
            self.patch(site, end);
        }
        for site in ctx.continues {
            self.patch(site, next);
        }
    }

    /// `name = name + 1` (or `- 1`), leaving nothing on the stack.
    fn emit_step(&mut self, operator: Operator, name: &str) {
        self.emit_name(Op::Load, name);
        self.emit_push(Constant::Number(1.0));
        self.emit(step(operator));
        self.emit_name(Op::Store, name);
    }

    fn discard(&mut self, keep: bool) {
        if !keep {
            self.emit(Op::Pop);
        }
    }

    fn finish(self) -> Code {
        Code { words: self.words }
    }
}

#[derive(Debug, Default)]
pub struct Compiler {
    temp_counter: usize,
}

pub fn compile(program: &Program) -> Result<Code, CompileError> {
    Compiler::new().compile(program)
}

impl Compiler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn compile(&mut self, program: &Program) -> Result<Code, CompileError> {
        let mut b = CodeBuilder::default();
        self.block(&mut b, &program.body)?;
        b.emit(Op::Halt);
        let code = b.finish();
        debug!(
            words = code.len(),
            functions = code.functions().count(),
            "compiled program"
        );
        Ok(code)
    }

    fn temp_name(&mut self) -> String {
        let name = format!("{}{}", TEMP_PREFIX, self.temp_counter);
        self.temp_counter += 1;
        name
    }

    fn block(&mut self, b: &mut CodeBuilder, body: &Block) -> Result<(), CompileError> {
        for stmt in body {
            self.stmt(b, stmt)?;
        }
        Ok(())
    }

    fn scoped_block(&mut self, b: &mut CodeBuilder, body: &Block) -> Result<(), CompileError> {
        b.push_scope();
        self.block(b, body)?;
        b.pop_scope();
        Ok(())
    }

    fn stmt(&mut self, b: &mut CodeBuilder, stmt: &Stmt) -> Result<(), CompileError> {
        match stmt {
            Stmt::Expr(e) => self.expr(b, e, false),
            Stmt::NewDeclaration { name, .. } => {
                b.emit_name(Op::Alloc, name);
                Ok(())
            }
            Stmt::NewAssignment { name, value, .. } => {
                b.emit_name(Op::Alloc, name);
                self.expr(b, value, true)?;
                b.emit_name(Op::Store, name);
                Ok(())
            }
            Stmt::FunctionDeclaration {
                name,
                parameters,
                body,
                ..
            } => {
                let function = self.function(name, parameters, body)?;
                b.emit_name(Op::Alloc, name);
                b.emit_push(Constant::Function(Rc::new(function)));
                b.emit_name(Op::Store, name);
                Ok(())
            }
            Stmt::Return { argument, .. } => {
                match argument {
                    Some(argument) => self.expr(b, argument, true)?,
                    None => b.emit_push(Constant::Null),
                }
                b.emit(Op::Return);
                Ok(())
            }
            Stmt::If {
                condition,
                body,
                otherwise,
                ..
            } => {
                self.expr(b, condition, true)?;
                let to_else = b.emit_jump(Op::Jz);
                self.scoped_block(b, body)?;
                match otherwise {
                    Some(otherwise) => {
                        let to_end = b.emit_jump(Op::Jmp);
                        b.patch(to_else, b.here());
                        self.scoped_block(b, otherwise)?;
                        b.patch(to_end, b.here());
                    }
                    None => b.patch(to_else, b.here()),
                }
                Ok(())
            }
            Stmt::While {
                condition, body, ..
            } => {
                let start = b.here();
                self.expr(b, condition, true)?;
                let exit = b.emit_jump(Op::Jz);
                b.loops.push(LoopContext {
                    depth: b.depth,
                    ..Default::default()
                });
                self.scoped_block(b, body)?;
                b.emit_jump_to(Op::Jmp, start);
                let end = b.here();
                b.close_loop(start, end);
                b.patch(exit, end);
                Ok(())
            }
            Stmt::For {
                initial,
                condition,
                update,
                body,
                ..
            } => {
                b.push_scope();
                self.stmt(b, initial)?;
                let start = b.here();
                let exit = match condition {
                    Some(condition) => {
                        self.expr(b, condition, true)?;
                        Some(b.emit_jump(Op::Jz))
                    }
                    None => None,
                };
                b.loops.push(LoopContext {
                    depth: b.depth,
                    ..Default::default()
                });
                self.scoped_block(b, body)?;
                let next = b.here();
                if let Some(update) = update {
                    self.expr(b, update, false)?;
                }
                b.emit_jump_to(Op::Jmp, start);
                let end = b.here();
                b.close_loop(next, end);
                if let Some(exit) = exit {
                    b.patch(exit, end);
                }
                b.pop_scope();
                Ok(())
            }
            Stmt::Break { location } => {
                let Some(depth) = b.loops.last().map(|l| l.depth) else {
                    return Err(CompileError::BreakOutsideLoop {
                        location: *location,
                    });
                };
                b.unwind_to(depth);
                let site = b.emit_jump(Op::Jmp);
                if let Some(ctx) = b.loops.last_mut() {
                    ctx.breaks.push(site);
                }
                Ok(())
            }
            Stmt::Continue { location } => {
                let Some(depth) = b.loops.last().map(|l| l.depth) else {
                    return Err(CompileError::ContinueOutsideLoop {
                        location: *location,
                    });
                };
                b.unwind_to(depth);
                let site = b.emit_jump(Op::Jmp);
                if let Some(ctx) = b.loops.last_mut() {
                    ctx.continues.push(site);
                }
                Ok(())
            }
        }
    }

    fn function(
        &mut self,
        name: &str,
        parameters: &[String],
        body: &Block,
    ) -> Result<Function, CompileError> {
        let mut inner = CodeBuilder::default();
        self.block(&mut inner, body)?;
        inner.emit_push(Constant::Null);
        inner.emit(Op::Return);
        Ok(Function {
            name: name.to_owned(),
            parameters: parameters.to_vec(),
            code: inner.finish(),
        })
    }

    /// Lowers `e`, leaving its value on the stack only when `keep` is set.
    fn expr(&mut self, b: &mut CodeBuilder, e: &Expr, keep: bool) -> Result<(), CompileError> {
        match e {
            Expr::Literal { text, location } => {
                let constant =
                    Constant::parse_numeric(text).ok_or_else(|| CompileError::InvalidLiteral {
                        text: text.clone(),
                        location: *location,
                    })?;
                if keep {
                    b.emit_push(constant);
                }
            }
            Expr::String { text, .. } => {
                if keep {
                    b.emit_push(Constant::String(unquote(text)));
                }
            }
            Expr::Variable { name, .. } => {
                b.emit_name(Op::Load, name);
                b.discard(keep);
            }
            Expr::Binary {
                operator,
                left,
                right,
                location,
            } => {
                let op = match operator {
                    Operator::Add => Op::Add,
                    Operator::Sub => Op::Sub,
                    Operator::Mul => Op::Mul,
                    Operator::Div => Op::Div,
                    Operator::Mod => Op::Mod,
                    Operator::Eq => Op::Eq,
                    Operator::Ne => Op::Ne,
                    Operator::Gt => Op::Gt,
                    Operator::Lt => Op::Lt,
                    Operator::Ge => Op::Gte,
                    Operator::Le => Op::Lte,
                    other => {
                        return Err(CompileError::UnknownOperator {
                            kind: "binary",
                            operator: *other,
                            location: *location,
                        })
                    }
                };
                self.expr(b, left, true)?;
                self.expr(b, right, true)?;
                b.emit(op);
                b.discard(keep);
            }
            Expr::Logical {
                operator,
                left,
                right,
                location,
            } => {
                match operator {
                    Operator::And => self.and(b, left, right)?,
                    Operator::Or => self.or(b, left, right)?,
                    other => {
                        return Err(CompileError::UnknownOperator {
                            kind: "logical",
                            operator: *other,
                            location: *location,
                        })
                    }
                }
                b.discard(keep);
            }
            Expr::Unary {
                operator,
                argument,
                location,
            } => match operator {
                Operator::Plus => self.expr(b, argument, keep)?,
                Operator::Minus | Operator::Not | Operator::BitNot => {
                    self.expr(b, argument, true)?;
                    b.emit(match operator {
                        Operator::Minus => Op::Neg,
                        Operator::Not => Op::Not,
                        _ => Op::BitNot,
                    });
                    b.discard(keep);
                }
                Operator::Increment | Operator::Decrement => {
                    let name = update_target(*operator, argument)?;
                    b.emit_step(*operator, name);
                    if keep {
                        b.emit_name(Op::Load, name);
                    }
                }
                other => {
                    return Err(CompileError::UnknownOperator {
                        kind: "unary",
                        operator: *other,
                        location: *location,
                    })
                }
            },
            Expr::Postfix {
                operator,
                argument,
                location,
            } => {
                if !matches!(operator, Operator::Increment | Operator::Decrement) {
                    return Err(CompileError::UnknownOperator {
                        kind: "postfix",
                        operator: *operator,
                        location: *location,
                    });
                }
                let name = update_target(*operator, argument)?;
                if keep {
                    // The temporary lives in its own scope so repeated
                    // evaluation never redeclares it.
                    let temp = self.temp_name();
                    b.push_scope();
                    b.emit_name(Op::Alloc, &temp);
                    b.emit_name(Op::Load, name);
                    b.emit_name(Op::Store, &temp);
                    b.emit_step(*operator, name);
                    b.emit_name(Op::Load, &temp);
                    b.pop_scope();
                } else {
                    b.emit_step(*operator, name);
                }
            }
            Expr::Assignment { name, value, .. } => {
                self.expr(b, value, true)?;
                b.emit_name(Op::Store, name);
                if keep {
                    b.emit_name(Op::Load, name);
                }
            }
            Expr::Call {
                name, arguments, ..
            } => {
                for argument in arguments {
                    self.expr(b, argument, true)?;
                }
                b.emit_call(name, arguments.len());
                b.discard(keep);
            }
        }
        Ok(())
    }

    /// `left && right` as 1 or 0, skipping `right` when `left` is zero.
    fn and(&mut self, b: &mut CodeBuilder, left: &Expr, right: &Expr) -> Result<(), CompileError> {
        self.expr(b, left, true)?;
        let left_false = b.emit_jump(Op::Jz);
        self.expr(b, right, true)?;
        let right_false = b.emit_jump(Op::Jz);
        b.emit_push(Constant::Number(1.0));
        let to_end = b.emit_jump(Op::Jmp);
        b.patch(left_false, b.here());
        b.patch(right_false, b.here());
        b.emit_push(Constant::Number(0.0));
        b.patch(to_end, b.here());
        Ok(())
    }

    /// `left || right` as 1 or 0, skipping `right` when `left` is non-zero.
    fn or(&mut self, b: &mut CodeBuilder, left: &Expr, right: &Expr) -> Result<(), CompileError> {
        self.expr(b, left, true)?;
        let try_right = b.emit_jump(Op::Jz);
        b.emit_push(Constant::Number(1.0));
        let left_true = b.emit_jump(Op::Jmp);
        b.patch(try_right, b.here());
        self.expr(b, right, true)?;
        let right_false = b.emit_jump(Op::Jz);
        b.emit_push(Constant::Number(1.0));
        let right_true = b.emit_jump(Op::Jmp);
        b.patch(right_false, b.here());
        b.emit_push(Constant::Number(0.0));
        b.patch(left_true, b.here());
        b.patch(right_true, b.here());
        Ok(())
    }
}

fn step(operator: Operator) -> Op {
    match operator {
        Operator::Decrement => Op::Sub,
        _ => Op::Add,
    }
}

fn update_target(operator: Operator, argument: &Expr) -> Result<&str, CompileError> {
    argument
        .as_variable()
        .ok_or_else(|| CompileError::InvalidUpdateTarget {
            operator,
            kind: argument.kind(),
            location: argument.location(),
        })
}

#[cfg(test)]
mod tests {
    use itertools::Itertools;

    use super::*;
    use crate::{lexer::tokenize, parser::parse};

    fn compile_source(source: &str) -> Result<Code, CompileError> {
        compile(&parse(&tokenize(source)).unwrap())
    }

    /// Renders a stream as space-separated words, e.g. `PUSH 1 STORE x`.
    fn words(code: &Code) -> String {
        code.words
            .iter()
            .map(|w| match w {
                Word::Op(c) => Op::from_code(*c).map_or("?".to_owned(), |op| op.name().to_owned()),
                Word::Const(c) => c.to_string(),
                Word::Name(n) => n.clone(),
                Word::Target(t) => format!("@{t}"),
                Word::Count(n) => format!("#{n}"),
            })
            .join(" ")
    }

    #[test]
    fn declarations() {
        let code = compile_source("new x = 1 + 2; new y;").unwrap();
        assert_eq!(
            words(&code),
            "ALLOC x PUSH 1 PUSH 2 ADD STORE x ALLOC y HALT"
        );
    }

    #[test]
    fn discarded_values_are_popped() {
        let code = compile_source("x; 5; f(1); x = 2;").unwrap();
        assert_eq!(
            words(&code),
            "LOAD x POP PUSH 1 CALL f #1 POP PUSH 2 STORE x HALT"
        );
    }

    #[test]
    fn if_else_jumps() {
        let code = compile_source("if (a) { b; } else { c; }").unwrap();
        assert_eq!(
            words(&code),
            "LOAD a JZ @11 PUSHSCP LOAD b POP POPSCP JMP @16 PUSHSCP LOAD c POP POPSCP HALT"
        );
    }

    #[test]
    fn break_and_continue_unwind_block_scopes() {
        let code = compile_source("while (a) { if (b) { break; } continue; }").unwrap();
        assert_eq!(
            words(&code),
            "LOAD a JZ @21 PUSHSCP \
             LOAD b JZ @15 PUSHSCP POPSCP POPSCP JMP @21 POPSCP \
             POPSCP JMP @0 POPSCP JMP @0 HALT"
        );
    }

    #[test]
    fn for_loop_continue_runs_the_update() {
        let code = compile_source("for (new i = 0; i < 3; i++) { continue; }").unwrap();
        assert_eq!(
            words(&code),
            "PUSHSCP ALLOC i PUSH 0 STORE i \
             LOAD i PUSH 3 LT JZ @28 \
             PUSHSCP POPSCP JMP @19 POPSCP \
             LOAD i PUSH 1 ADD STORE i JMP @7 \
             POPSCP HALT"
        );
    }

    #[test]
    fn short_circuit_layouts() {
        let code = compile_source("a && b;").unwrap();
        assert_eq!(
            words(&code),
            "LOAD a JZ @12 LOAD b JZ @12 PUSH 1 JMP @14 PUSH 0 POP HALT"
        );
        let code = compile_source("a || b;").unwrap();
        assert_eq!(
            words(&code),
            "LOAD a JZ @8 PUSH 1 JMP @18 LOAD b JZ @16 PUSH 1 JMP @18 PUSH 0 POP HALT"
        );
    }

    #[test]
    fn postfix_keeps_the_old_value_in_a_scoped_temporary() {
        let code = compile_source("new y = x++; x--;").unwrap();
        assert_eq!(
            words(&code),
            "ALLOC y PUSHSCP ALLOC __$temp0 LOAD x STORE __$temp0 \
             LOAD x PUSH 1 ADD STORE x LOAD __$temp0 POPSCP STORE y \
             LOAD x PUSH 1 SUB STORE x HALT"
        );
    }

    #[test]
    fn functions_get_their_own_stream() {
        let code = compile_source("function f(a) { return a; } function g() { return; }").unwrap();
        let functions = code.functions().collect_vec();
        assert_eq!(functions.len(), 2);
        assert_eq!(functions[0].parameters, vec!["a".to_owned()]);
        assert_eq!(words(&functions[0].code), "LOAD a RETURN PUSH null RETURN");
        assert_eq!(words(&functions[1].code), "PUSH null RETURN PUSH null RETURN");
        assert!(words(&code).starts_with("ALLOC f PUSH <function f> STORE f"));
    }

    #[test]
    fn loop_control_outside_loops() {
        let err = compile_source("break;").unwrap_err();
        assert_eq!(err.to_string(), "Break statement outside of loop at row 1, char 1");
        let err = compile_source("while (1) { function f() { continue; } }").unwrap_err();
        assert!(matches!(err, CompileError::ContinueOutsideLoop { .. }));
    }

    #[test]
    fn literals_are_parsed_once() {
        let code = compile_source("new big = 9007199254740993; new d = 0.5; new s = 'a\\tb';").unwrap();
        let listing = words(&code);
        assert!(listing.contains("PUSH 9007199254740993 STORE big"));
        assert!(listing.contains("PUSH 0.5 STORE d"));
        assert!(listing.contains("PUSH \"a\\tb\" STORE s"));
        assert!(matches!(code.words[3], Word::Const(Constant::Integer(_))));
    }
}
