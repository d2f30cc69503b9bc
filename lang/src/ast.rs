use std::fmt::Display;

use crate::source::Location;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Operator {
    Add,
    Sub,
    Mul,
    Div,
    Mod,

    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,

    And,
    Or,

    Assign,
    AddAssign,
    SubAssign,
    MulAssign,
    DivAssign,

    Not,
    BitNot,
    Plus,
    Minus,
    Increment,
    Decrement,
}

impl Operator {
    pub fn symbol(self) -> &'static str {
        match self {
            Operator::Add | Operator::Plus => "+",
            Operator::Sub | Operator::Minus => "-",
            Operator::Mul => "*",
            Operator::Div => "/",
            Operator::Mod => "%",
            Operator::Eq => "==",
            Operator::Ne => "!=",
            Operator::Lt => "<",
            Operator::Gt => ">",
            Operator::Le => "<=",
            Operator::Ge => ">=",
            Operator::And => "&&",
            Operator::Or => "||",
            Operator::Assign => "=",
            Operator::AddAssign => "+=",
            Operator::SubAssign => "-=",
            Operator::MulAssign => "*=",
            Operator::DivAssign => "/=",
            Operator::Not => "!",
            Operator::BitNot => "~",
            Operator::Increment => "++",
            Operator::Decrement => "--",
        }
    }

    /// The operator a compound assignment applies before storing.
    pub fn compound_base(self) -> Option<Operator> {
        match self {
            Operator::AddAssign => Some(Operator::Add),
            Operator::SubAssign => Some(Operator::Sub),
            Operator::MulAssign => Some(Operator::Mul),
            Operator::DivAssign => Some(Operator::Div),
            _ => None,
        }
    }
}

impl Display for Operator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.symbol())
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Program {
    pub body: Vec<Stmt>,
}

pub type Block = Vec<Stmt>;

#[derive(Debug, Clone, PartialEq)]
pub enum Stmt {
    Expr(Expr),
    NewDeclaration {
        name: String,
        location: Location,
    },
    NewAssignment {
        name: String,
        value: Expr,
        location: Location,
    },
    FunctionDeclaration {
        name: String,
        parameters: Vec<String>,
        body: Block,
        location: Location,
    },
    Return {
        argument: Option<Expr>,
        location: Location,
    },
    If {
        condition: Expr,
        body: Block,
        otherwise: Option<Block>,
        location: Location,
    },
    While {
        condition: Expr,
        body: Block,
        location: Location,
    },
    For {
        initial: Box<Stmt>,
        condition: Option<Expr>,
        update: Option<Expr>,
        body: Block,
        location: Location,
    },
    Break {
        location: Location,
    },
    Continue {
        location: Location,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Numeric literal, kept as written until compilation.
    Literal {
        text: String,
        location: Location,
    },
    /// String literal including its quotes.
    String {
        text: String,
        location: Location,
    },
    Variable {
        name: String,
        location: Location,
    },
    Binary {
        operator: Operator,
        left: Box<Expr>,
        right: Box<Expr>,
        location: Location,
    },
    Logical {
        operator: Operator,
        left: Box<Expr>,
        right: Box<Expr>,
        location: Location,
    },
    Unary {
        operator: Operator,
        argument: Box<Expr>,
        location: Location,
    },
    Postfix {
        operator: Operator,
        argument: Box<Expr>,
        location: Location,
    },
    Assignment {
        name: String,
        value: Box<Expr>,
        location: Location,
    },
    Call {
        name: String,
        arguments: Vec<Expr>,
        location: Location,
    },
}

impl Expr {
    pub fn location(&self) -> Location {
        match self {
            Expr::Literal { location, .. }
            | Expr::String { location, .. }
            | Expr::Variable { location, .. }
            | Expr::Binary { location, .. }
            | Expr::Logical { location, .. }
            | Expr::Unary { location, .. }
            | Expr::Postfix { location, .. }
            | Expr::Assignment { location, .. }
            | Expr::Call { location, .. } => *location,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Expr::Literal { .. } => "literal",
            Expr::String { .. } => "string literal",
            Expr::Variable { .. } => "variable",
            Expr::Binary { .. } => "binary expression",
            Expr::Logical { .. } => "logical expression",
            Expr::Unary { .. } => "unary expression",
            Expr::Postfix { .. } => "postfix expression",
            Expr::Assignment { .. } => "assignment",
            Expr::Call { .. } => "function call",
        }
    }

    pub fn as_variable(&self) -> Option<&str> {
        match self {
            Expr::Variable { name, .. } => Some(name),
            _ => None,
        }
    }
}
