use crate::{
    ast::{Block, Operator, Program, Stmt},
    lexer::{Token, TokenKind},
    source::Location,
};

mod expression;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("Unexpected token \"{text}\" at {location}")]
    UnexpectedToken { text: String, location: Location },

    #[error("Unexpected end of input at {location}")]
    UnexpectedEnd { location: Location },

    #[error("Expected \"{expected}\" at {location}")]
    MissingToken {
        expected: &'static str,
        location: Location,
    },

    #[error("Expected an expression or value after \"{after}\" at {location}")]
    MissingRightSide { after: String, location: Location },

    #[error("Left side of \"{operator}\" must be a variable at {location}")]
    Assignment {
        operator: Operator,
        location: Location,
    },

    #[error("Missing \")\" in function call for name \"{name}\" at {location}")]
    FunctionCall { name: String, location: Location },

    #[error("Chained function calls are not allowed: \"{name}(...)()\" at {location}")]
    ChainedFunctionCall { name: String, location: Location },

    #[error("Chained increment/decrement operators are not allowed at {location}")]
    ChainedIncDec { location: Location },

    #[error("Cannot apply \"{operator}\" to {kind} at {location}")]
    InvalidPostfix {
        operator: Operator,
        kind: &'static str,
        location: Location,
    },

    #[error("Cannot apply prefix \"{operator}\" to {kind} at {location}")]
    InvalidPrefix {
        operator: Operator,
        kind: &'static str,
        location: Location,
    },

    #[error("Expected an identifier after keyword \"{after}\" at {location}")]
    ExpectedIdentifier {
        after: &'static str,
        location: Location,
    },

    #[error("Invalid for-loop initializer at {location}")]
    InvalidForInitializer { location: Location },

    #[error("Expected parameter in function \"{function}\" but got \"{text}\" at {location}")]
    ExpectedParameter {
        function: String,
        text: String,
        location: Location,
    },

    #[error("Duplicate parameter \"{name}\" in function \"{function}\" at {location}")]
    DuplicateParameter {
        name: String,
        function: String,
        location: Location,
    },

    #[error("Trailing comma in parameters of function \"{function}\" at {location}")]
    TrailingComma { function: String, location: Location },
}

impl ParseError {
    pub fn location(&self) -> Location {
        match self {
            ParseError::UnexpectedToken { location, .. }
            | ParseError::UnexpectedEnd { location }
            | ParseError::MissingToken { location, .. }
            | ParseError::MissingRightSide { location, .. }
            | ParseError::Assignment { location, .. }
            | ParseError::FunctionCall { location, .. }
            | ParseError::ChainedFunctionCall { location, .. }
            | ParseError::ChainedIncDec { location }
            | ParseError::InvalidPostfix { location, .. }
            | ParseError::InvalidPrefix { location, .. }
            | ParseError::ExpectedIdentifier { location, .. }
            | ParseError::InvalidForInitializer { location }
            | ParseError::ExpectedParameter { location, .. }
            | ParseError::DuplicateParameter { location, .. }
            | ParseError::TrailingComma { location, .. } => *location,
        }
    }
}

pub struct Parser<'t> {
    tokens: &'t [Token],
    position: usize,
}

impl<'t> Parser<'t> {
    pub fn new(tokens: &'t [Token]) -> Self {
        Parser {
            tokens,
            position: 0,
        }
    }

    fn peek(&self) -> Option<&'t Token> {
        self.tokens.get(self.position)
    }

    fn next(&mut self) -> Option<&'t Token> {
        let token = self.tokens.get(self.position)?;
        self.position += 1;
        Some(token)
    }

    fn peek_is(&self, pred: impl FnOnce(&Token) -> bool) -> bool {
        self.peek().is_some_and(pred)
    }

    /// Where the next token starts, or where the last one did at end of
    /// input.
    fn here(&self) -> Location {
        self.peek()
            .or(self.tokens.last())
            .map(|t| t.location)
            .unwrap_or(Location::new(1, 1))
    }

    fn expect_operator(&mut self, expected: &'static str) -> Result<&'t Token, ParseError> {
        match self.peek() {
            Some(token) if token.is_operator(expected) => {
                self.position += 1;
                Ok(token)
            }
            _ => Err(ParseError::MissingToken {
                expected,
                location: self.here(),
            }),
        }
    }

    fn expect_semicolon(&mut self) -> Result<(), ParseError> {
        match self.peek() {
            Some(token) if token.is_separator(";") => {
                self.position += 1;
                Ok(())
            }
            _ => Err(ParseError::MissingToken {
                expected: ";",
                location: self.here(),
            }),
        }
    }

    fn expect_identifier(&mut self, after: &'static str) -> Result<&'t Token, ParseError> {
        match self.peek() {
            Some(token) if token.kind == TokenKind::Identifier => {
                self.position += 1;
                Ok(token)
            }
            _ => Err(ParseError::ExpectedIdentifier {
                after,
                location: self.here(),
            }),
        }
    }

    pub fn program(&mut self) -> Result<Program, ParseError> {
        let mut body = vec![];
        while self.peek().is_some() {
            if let Some(stmt) = self.statement()? {
                body.push(stmt);
            }
        }
        Ok(Program { body })
    }

    /// Parses one statement. A bare `;` is an empty statement and yields
    /// `None`.
    fn statement(&mut self) -> Result<Option<Stmt>, ParseError> {
        let Some(token) = self.peek() else {
            return Ok(None);
        };

        if token.is_separator(";") {
            self.position += 1;
            return Ok(None);
        }

        if token.kind == TokenKind::Keyword {
            let stmt = match token.text.as_str() {
                "new" => Some(self.declaration()?),
                "if" => Some(self.if_statement()?),
                "while" => Some(self.while_statement()?),
                "for" => Some(self.for_statement()?),
                "function" => Some(self.function_declaration()?),
                "return" => Some(self.return_statement()?),
                "break" => {
                    self.position += 1;
                    Some(Stmt::Break {
                        location: token.location,
                    })
                }
                "continue" => {
                    self.position += 1;
                    Some(Stmt::Continue {
                        location: token.location,
                    })
                }
                _ => None,
            };
            if stmt.is_some() {
                return Ok(stmt);
            }
        }

        Ok(Some(Stmt::Expr(self.expression(0)?)))
    }

    fn block(&mut self) -> Result<Block, ParseError> {
        self.expect_operator("{")?;
        let mut body = vec![];
        loop {
            match self.peek() {
                None => {
                    return Err(ParseError::MissingToken {
                        expected: "}",
                        location: self.here(),
                    })
                }
                Some(token) if token.is_operator("}") => {
                    self.position += 1;
                    return Ok(body);
                }
                Some(_) => {
                    if let Some(stmt) = self.statement()? {
                        body.push(stmt);
                    }
                }
            }
        }
    }

    fn parenthesized(&mut self) -> Result<crate::ast::Expr, ParseError> {
        self.expect_operator("(")?;
        let condition = self.expression(0)?;
        self.expect_operator(")")?;
        Ok(condition)
    }

    fn declaration(&mut self) -> Result<Stmt, ParseError> {
        let Some(keyword) = self.next() else {
            return Err(ParseError::UnexpectedEnd {
                location: self.here(),
            });
        };
        let name = self.expect_identifier("new")?.text.clone();

        match self.peek() {
            Some(eq) if eq.is_operator("=") => {
                self.position += 1;
                self.require_operand(eq)?;
                let value = self.expression(0)?;
                Ok(Stmt::NewAssignment {
                    name,
                    value,
                    location: keyword.location,
                })
            }
            _ => Ok(Stmt::NewDeclaration {
                name,
                location: keyword.location,
            }),
        }
    }

    fn if_statement(&mut self) -> Result<Stmt, ParseError> {
        let location = self.here();
        self.position += 1;

        let condition = self.parenthesized()?;
        let body = self.block()?;

        let mut otherwise = None;
        if self.peek_is(|t| t.is_keyword("else")) {
            self.position += 1;
            if self.peek_is(|t| t.is_keyword("if")) {
                otherwise = Some(vec![self.if_statement()?]);
            } else {
                otherwise = Some(self.block()?);
            }
        }

        Ok(Stmt::If {
            condition,
            body,
            otherwise,
            location,
        })
    }

    fn while_statement(&mut self) -> Result<Stmt, ParseError> {
        let location = self.here();
        self.position += 1;

        let condition = self.parenthesized()?;
        let body = self.block()?;
        Ok(Stmt::While {
            condition,
            body,
            location,
        })
    }

    fn for_statement(&mut self) -> Result<Stmt, ParseError> {
        let location = self.here();
        self.position += 1;
        self.expect_operator("(")?;

        let Some(initial) = self.statement()? else {
            return Err(ParseError::InvalidForInitializer {
                location: self.here(),
            });
        };
        self.expect_semicolon()?;

        let condition = if self.peek_is(|t| t.is_separator(";")) {
            None
        } else {
            Some(self.expression(0)?)
        };
        self.expect_semicolon()?;

        let update = if self.peek_is(|t| t.is_operator(")")) {
            None
        } else {
            Some(self.expression(0)?)
        };
        self.expect_operator(")")?;

        let body = self.block()?;
        Ok(Stmt::For {
            initial: Box::new(initial),
            condition,
            update,
            body,
            location,
        })
    }

    fn function_declaration(&mut self) -> Result<Stmt, ParseError> {
        let location = self.here();
        self.position += 1;

        let name = self.expect_identifier("function")?.text.clone();
        self.expect_operator("(")?;

        let mut parameters: Vec<String> = vec![];
        if !self.peek_is(|t| t.is_operator(")")) {
            loop {
                let Some(token) = self.next() else {
                    return Err(ParseError::MissingToken {
                        expected: ")",
                        location: self.here(),
                    });
                };
                if token.kind != TokenKind::Identifier {
                    return Err(if token.is_operator(")") && !parameters.is_empty() {
                        ParseError::TrailingComma {
                            function: name,
                            location: token.location,
                        }
                    } else {
                        ParseError::ExpectedParameter {
                            function: name,
                            text: token.text.clone(),
                            location: token.location,
                        }
                    });
                }
                if parameters.contains(&token.text) {
                    return Err(ParseError::DuplicateParameter {
                        name: token.text.clone(),
                        function: name,
                        location: token.location,
                    });
                }
                parameters.push(token.text.clone());

                if self.peek_is(|t| t.is_separator(",")) {
                    self.position += 1;
                } else {
                    break;
                }
            }
        }
        self.expect_operator(")")?;

        let body = self.block()?;
        Ok(Stmt::FunctionDeclaration {
            name,
            parameters,
            body,
            location,
        })
    }

    fn return_statement(&mut self) -> Result<Stmt, ParseError> {
        let location = self.here();
        self.position += 1;

        let argument = if self.peek_is(|t| t.is_separator(";")) {
            None
        } else {
            Some(self.expression(0)?)
        };
        self.expect_semicolon()?;

        Ok(Stmt::Return { argument, location })
    }
}

pub fn parse(tokens: &[Token]) -> Result<Program, ParseError> {
    Parser::new(tokens).program()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ast::Expr, lexer::tokenize};

    fn parse_str(source: &str) -> Result<Program, ParseError> {
        parse(&tokenize(source))
    }

    fn only_expr(source: &str) -> Expr {
        let program = parse_str(source).unwrap();
        match program.body.as_slice() {
            [Stmt::Expr(e)] => e.clone(),
            other => panic!("expected a single expression, got {other:?}"),
        }
    }

    /// Renders an expression with explicit grouping.
    fn sexp(e: &Expr) -> String {
        match e {
            Expr::Literal { text, .. } | Expr::String { text, .. } => text.clone(),
            Expr::Variable { name, .. } => name.clone(),
            Expr::Binary {
                operator,
                left,
                right,
                ..
            }
            | Expr::Logical {
                operator,
                left,
                right,
                ..
            } => format!("({} {} {})", operator, sexp(left), sexp(right)),
            Expr::Unary {
                operator, argument, ..
            } => format!("({}u {})", operator, sexp(argument)),
            Expr::Postfix {
                operator, argument, ..
            } => format!("({} {}p)", operator, sexp(argument)),
            Expr::Assignment { name, value, .. } => format!("(= {} {})", name, sexp(value)),
            Expr::Call {
                name, arguments, ..
            } => format!(
                "{}({})",
                name,
                arguments.iter().map(sexp).collect::<Vec<_>>().join(", ")
            ),
        }
    }

    #[test]
    fn precedence_and_associativity() {
        assert_eq!(sexp(&only_expr("1 + 2 * 3 - 4")), "(- (+ 1 (* 2 3)) 4)");
        assert_eq!(sexp(&only_expr("a < b == c >= d")), "(== (< a b) (>= c d))");
        assert_eq!(sexp(&only_expr("a || b && c")), "(&& (|| a b) c)");
        assert_eq!(sexp(&only_expr("a && b || c")), "(&& a (|| b c))");
        assert_eq!(sexp(&only_expr("a && b && c")), "(&& a (&& b c))");
        assert_eq!(sexp(&only_expr("(1 + 2) * 3")), "(* (+ 1 2) 3)");
    }

    #[test]
    fn assignment_is_right_associative_and_loosest() {
        assert_eq!(sexp(&only_expr("x = y = 1 + 2")), "(= x (= y (+ 1 2)))");
        assert_eq!(sexp(&only_expr("x = a && b")), "(= x (&& a b))");
    }

    #[test]
    fn compound_assignment_desugars() {
        assert_eq!(sexp(&only_expr("x += 2 * y")), "(= x (+ x (* 2 y)))");
        assert_eq!(sexp(&only_expr("x /= 2")), "(= x (/ x 2))");
    }

    #[test]
    fn unary_disambiguation() {
        assert_eq!(sexp(&only_expr("-a * -b")), "(* (-u a) (-u b))");
        assert_eq!(sexp(&only_expr("a - -b")), "(- a (-u b))");
        assert_eq!(sexp(&only_expr("f(-1, +2)")), "f((-u 1), (+u 2))");
        assert_eq!(sexp(&only_expr("!a == ~b")), "(== (!u a) (~u b))");

        let program = parse_str("function f() { return -1; }").unwrap();
        let Stmt::FunctionDeclaration { body, .. } = &program.body[0] else {
            panic!()
        };
        let Stmt::Return {
            argument: Some(argument),
            ..
        } = &body[0]
        else {
            panic!()
        };
        assert_eq!(sexp(argument), "(-u 1)");
    }

    #[test]
    fn minus_after_a_call_is_binary() {
        assert_eq!(sexp(&only_expr("f(1)\n-2")), "(- f(1) 2)");
        assert_eq!(sexp(&only_expr("x++ -2")), "(- (++ xp) 2)");
    }

    #[test]
    fn prefix_and_postfix_updates() {
        assert_eq!(sexp(&only_expr("x++ + ++y")), "(+ (++ xp) (++u y))");
        assert_eq!(sexp(&only_expr("-x--")), "(-u (-- xp))");
    }

    #[test]
    fn update_errors() {
        assert!(matches!(
            parse_str("x++--").unwrap_err(),
            ParseError::ChainedIncDec { .. }
        ));
        assert!(matches!(
            parse_str("f()++").unwrap_err(),
            ParseError::InvalidPostfix {
                kind: "function call",
                ..
            }
        ));
        assert!(matches!(
            parse_str("++5").unwrap_err(),
            ParseError::InvalidPrefix { .. }
        ));
    }

    #[test]
    fn assignment_target_must_be_a_variable() {
        let err = parse_str("a + b = 3").unwrap_err();
        assert_eq!(err.to_string(), "Left side of \"=\" must be a variable at row 1, char 7");
    }

    #[test]
    fn calls() {
        assert_eq!(sexp(&only_expr("f(1, g(2), x = 3)")), "f(1, g(2), (= x 3))");
        assert!(matches!(
            parse_str("f(1)(2)").unwrap_err(),
            ParseError::ChainedFunctionCall { ref name, .. } if name == "f"
        ));
        assert!(matches!(
            parse_str("f(1 2)").unwrap_err(),
            ParseError::FunctionCall { .. }
        ));
    }

    #[test]
    fn statements() {
        let program = parse_str(
            "new a; new b = 1;\n\
             if (a) { b = 2; } else if (b) { b = 3; } else { b = 4; }\n\
             while (b < 10) { b++; if (b == 5) { break; } continue; }\n\
             for (new i = 0; i < 3; i++) { }\n\
             for (i = 0; ;) { break; }\n\
             function add(x, y) { return x + y; }\n\
             return;",
        )
        .unwrap();

        let kinds = program
            .body
            .iter()
            .map(|s| match s {
                Stmt::NewDeclaration { .. } => "decl",
                Stmt::NewAssignment { .. } => "new",
                Stmt::If { .. } => "if",
                Stmt::While { .. } => "while",
                Stmt::For { .. } => "for",
                Stmt::FunctionDeclaration { .. } => "function",
                Stmt::Return { .. } => "return",
                _ => "other",
            })
            .collect::<Vec<_>>();
        assert_eq!(
            kinds,
            vec!["decl", "new", "if", "while", "for", "for", "function", "return"]
        );

        let Stmt::If {
            otherwise: Some(otherwise),
            ..
        } = &program.body[2]
        else {
            panic!()
        };
        assert!(matches!(otherwise.as_slice(), [Stmt::If { otherwise: Some(_), .. }]));

        let Stmt::For {
            condition, update, ..
        } = &program.body[5]
        else {
            panic!()
        };
        assert!(condition.is_none() && update.is_none());
    }

    #[test]
    fn missing_braces() {
        let err = parse_str("if (x) print(x);").unwrap_err();
        assert_eq!(
            err,
            ParseError::MissingToken {
                expected: "{",
                location: Location::new(1, 8),
            }
        );

        let err = parse_str("while (x) {\n  x = 0;").unwrap_err();
        assert_eq!(
            err,
            ParseError::MissingToken {
                expected: "}",
                location: Location::new(2, 8),
            }
        );
    }

    #[test]
    fn for_needs_an_initializer() {
        assert!(matches!(
            parse_str("for (; x; x++) {}").unwrap_err(),
            ParseError::InvalidForInitializer { .. }
        ));
    }

    #[test]
    fn parameters() {
        assert!(matches!(
            parse_str("function f(a, a) {}").unwrap_err(),
            ParseError::DuplicateParameter { ref name, .. } if name == "a"
        ));
        assert!(matches!(
            parse_str("function f(a,) {}").unwrap_err(),
            ParseError::TrailingComma { .. }
        ));
        assert!(matches!(
            parse_str("function f(1) {}").unwrap_err(),
            ParseError::ExpectedParameter { .. }
        ));
    }

    #[test]
    fn return_needs_a_semicolon() {
        assert!(matches!(
            parse_str("function f() { return 1 }").unwrap_err(),
            ParseError::MissingToken { expected: ";", .. }
        ));
    }

    #[test]
    fn dangling_operator() {
        assert_eq!(
            parse_str("x = 1 +").unwrap_err().to_string(),
            "Expected an expression or value after \"+\" at row 1, char 7"
        );
    }

    #[test]
    fn unknown_tokens_are_rejected() {
        assert!(matches!(
            parse_str("x = 'open").unwrap_err(),
            ParseError::UnexpectedToken { ref text, .. } if text == "'"
        ));
    }
}
