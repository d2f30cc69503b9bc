use itertools::Itertools;

use crate::{
    ast::{Expr, Operator},
    lexer::{Token, TokenKind},
    source::Location,
};

use super::{ParseError, Parser};

const UNARY: u8 = 30;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Assoc {
    Left,
    Right,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Binary,
    Logical,
    Assignment,
}

#[derive(Debug, Clone, Copy)]
struct Infix {
    operator: Operator,
    precedence: u8,
    assoc: Assoc,
    kind: Kind,
}

impl Infix {
    fn of(token: &Token) -> Option<Infix> {
        use Assoc::*;
        use Kind::*;

        if token.kind != TokenKind::Operator {
            return None;
        }
        let (operator, precedence, assoc, kind) = match token.text.as_str() {
            "=" => (Operator::Assign, 1, Right, Assignment),
            "+=" => (Operator::AddAssign, 1, Right, Assignment),
            "-=" => (Operator::SubAssign, 1, Right, Assignment),
            "*=" => (Operator::MulAssign, 1, Right, Assignment),
            "/=" => (Operator::DivAssign, 1, Right, Assignment),

            "&&" => (Operator::And, 2, Right, Logical),
            "||" => (Operator::Or, 3, Right, Logical),

            "==" => (Operator::Eq, 7, Left, Binary),
            "!=" => (Operator::Ne, 7, Left, Binary),
            "<" => (Operator::Lt, 8, Left, Binary),
            ">" => (Operator::Gt, 8, Left, Binary),
            "<=" => (Operator::Le, 8, Left, Binary),
            ">=" => (Operator::Ge, 8, Left, Binary),

            "+" => (Operator::Add, 10, Left, Binary),
            "-" => (Operator::Sub, 10, Left, Binary),

            "*" => (Operator::Mul, 20, Left, Binary),
            "/" => (Operator::Div, 20, Left, Binary),
            "%" => (Operator::Mod, 20, Left, Binary),
            _ => return None,
        };
        Some(Infix {
            operator,
            precedence,
            assoc,
            kind,
        })
    }

    /// Whether an operator already on the stack must be reduced before
    /// `self` is pushed.
    fn yields_to(&self, top: &Infix) -> bool {
        match self.assoc {
            Assoc::Left => self.precedence <= top.precedence,
            Assoc::Right => self.precedence < top.precedence,
        }
    }
}

impl<'t> Parser<'t> {
    pub(super) fn require_operand(&self, after: &Token) -> Result<(), ParseError> {
        if self.peek().is_none() {
            Err(ParseError::MissingRightSide {
                after: after.text.clone(),
                location: after.location,
            })
        } else {
            Ok(())
        }
    }

    /// Shunting-yard over binary operators. Operands, including prefix
    /// operators and their arguments, come from [`Parser::operand`].
    pub(super) fn expression(&mut self, min_precedence: u8) -> Result<Expr, ParseError> {
        let mut output = vec![self.operand()?];
        let mut operators: Vec<(Infix, Location)> = vec![];

        while let Some(token) = self.peek() {
            let Some(info) = Infix::of(token) else {
                break;
            };
            if info.precedence < min_precedence {
                break;
            }
            self.position += 1;

            while let Some((top, _)) = operators.last() {
                if !info.yields_to(top) {
                    break;
                }
                reduce(&mut output, &mut operators, token.location)?;
            }

            if info.kind == Kind::Assignment {
                let target = output.pop().ok_or(ParseError::UnexpectedEnd {
                    location: token.location,
                })?;
                let Some(name) = target.as_variable().map(str::to_owned) else {
                    return Err(ParseError::Assignment {
                        operator: info.operator,
                        location: token.location,
                    });
                };

                self.require_operand(token)?;
                let right = self.expression(info.precedence)?;
                let value = match info.operator.compound_base() {
                    Some(base) => Expr::Binary {
                        operator: base,
                        left: Box::new(target),
                        right: Box::new(right),
                        location: token.location,
                    },
                    None => right,
                };
                output.push(Expr::Assignment {
                    name,
                    value: Box::new(value),
                    location: token.location,
                });
                break;
            }

            operators.push((info, token.location));
            self.require_operand(token)?;
            output.push(self.operand()?);
        }

        let end = self.here();
        while !operators.is_empty() {
            reduce(&mut output, &mut operators, end)?;
        }
        output
            .into_iter()
            .exactly_one()
            .map_err(|_| ParseError::UnexpectedEnd { location: end })
    }

    fn operand(&mut self) -> Result<Expr, ParseError> {
        let Some(token) = self.next() else {
            return Err(ParseError::UnexpectedEnd {
                location: self.here(),
            });
        };
        let node = self.primary(token)?;
        self.postfix(node)
    }

    fn primary(&mut self, token: &'t Token) -> Result<Expr, ParseError> {
        let location = token.location;
        match token.kind {
            TokenKind::Literal => Ok(Expr::Literal {
                text: token.text.clone(),
                location,
            }),
            TokenKind::StringLiteral => Ok(Expr::String {
                text: token.text.clone(),
                location,
            }),
            TokenKind::Identifier => {
                if self.peek_is(|t| t.is_operator("(")) {
                    self.call(token)
                } else {
                    Ok(Expr::Variable {
                        name: token.text.clone(),
                        location,
                    })
                }
            }
            TokenKind::Operator if token.text == "(" => {
                let inner = self.expression(0)?;
                self.expect_operator(")")?;
                Ok(inner)
            }
            TokenKind::Operator => {
                let operator = match token.text.as_str() {
                    "+" if self.unary_context() => Operator::Plus,
                    "-" if self.unary_context() => Operator::Minus,
                    "!" => Operator::Not,
                    "~" => Operator::BitNot,
                    "++" => Operator::Increment,
                    "--" => Operator::Decrement,
                    _ => {
                        return Err(ParseError::UnexpectedToken {
                            text: token.text.clone(),
                            location,
                        })
                    }
                };

                self.require_operand(token)?;
                let argument = self.expression(UNARY)?;
                if matches!(operator, Operator::Increment | Operator::Decrement)
                    && argument.as_variable().is_none()
                {
                    return Err(ParseError::InvalidPrefix {
                        operator,
                        kind: argument.kind(),
                        location,
                    });
                }
                Ok(Expr::Unary {
                    operator,
                    argument: Box::new(argument),
                    location,
                })
            }
            _ => Err(ParseError::UnexpectedToken {
                text: token.text.clone(),
                location,
            }),
        }
    }

    /// Decides whether the `+`/`-` just consumed is a sign rather than a
    /// binary operator, from the token before it.
    fn unary_context(&self) -> bool {
        let Some(previous) = self
            .position
            .checked_sub(2)
            .and_then(|i| self.tokens.get(i))
        else {
            return true;
        };
        match previous.kind {
            TokenKind::Operator => !matches!(previous.text.as_str(), ")" | "++" | "--"),
            TokenKind::Separator | TokenKind::Keyword => true,
            _ => false,
        }
    }

    fn postfix(&mut self, mut node: Expr) -> Result<Expr, ParseError> {
        while let Some(token) = self.peek() {
            let operator = if token.is_operator("++") {
                Operator::Increment
            } else if token.is_operator("--") {
                Operator::Decrement
            } else {
                break;
            };

            if matches!(node, Expr::Postfix { .. }) {
                return Err(ParseError::ChainedIncDec {
                    location: token.location,
                });
            }
            if node.as_variable().is_none() {
                return Err(ParseError::InvalidPostfix {
                    operator,
                    kind: node.kind(),
                    location: node.location(),
                });
            }

            self.position += 1;
            node = Expr::Postfix {
                operator,
                argument: Box::new(node),
                location: token.location,
            };
        }
        Ok(node)
    }

    fn call(&mut self, name: &'t Token) -> Result<Expr, ParseError> {
        self.expect_operator("(")?;

        let mut arguments = vec![];
        if self.peek_is(|t| t.is_operator(")")) {
            self.position += 1;
        } else {
            loop {
                arguments.push(self.expression(0)?);
                match self.peek() {
                    Some(t) if t.is_separator(",") => self.position += 1,
                    Some(t) if t.is_operator(")") => {
                        self.position += 1;
                        break;
                    }
                    _ => {
                        return Err(ParseError::FunctionCall {
                            name: name.text.clone(),
                            location: self.here(),
                        })
                    }
                }
            }
        }

        if let Some(paren) = self.peek().filter(|t| t.is_operator("(")) {
            return Err(ParseError::ChainedFunctionCall {
                name: name.text.clone(),
                location: paren.location,
            });
        }

        Ok(Expr::Call {
            name: name.text.clone(),
            arguments,
            location: name.location,
        })
    }
}

fn reduce(
    output: &mut Vec<Expr>,
    operators: &mut Vec<(Infix, Location)>,
    at: Location,
) -> Result<(), ParseError> {
    let missing = ParseError::UnexpectedEnd { location: at };
    let (info, location) = operators.pop().ok_or(missing.clone())?;
    let right = Box::new(output.pop().ok_or(missing.clone())?);
    let left = Box::new(output.pop().ok_or(missing)?);

    output.push(match info.kind {
        Kind::Logical => Expr::Logical {
            operator: info.operator,
            left,
            right,
            location,
        },
        _ => Expr::Binary {
            operator: info.operator,
            left,
            right,
            location,
        },
    });
    Ok(())
}
