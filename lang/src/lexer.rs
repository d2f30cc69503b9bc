use std::fmt::Display;

use crate::source::Location;

pub const KEYWORDS: &[&str] = &[
    "new", "if", "else", "while", "continue", "break", "for", "function", "return",
];

const LONG_OPERATORS: &[&str] = &[
    "&&", "||", "!=", "<=", ">=", "==", "--", "++", "-=", "+=", "/=", "*=",
];

const SHORT_OPERATORS: &str = "+-*/=()&^%$@!<>?:~{}";

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum TokenKind {
    Keyword,
    Identifier,
    /// Numeric literal.
    Literal,
    StringLiteral,
    Operator,
    Separator,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub location: Location,
}

impl Token {
    pub fn is(&self, kind: TokenKind, text: &str) -> bool {
        self.kind == kind && self.text == text
    }

    pub fn is_operator(&self, text: &str) -> bool {
        self.is(TokenKind::Operator, text)
    }

    pub fn is_separator(&self, text: &str) -> bool {
        self.is(TokenKind::Separator, text)
    }

    pub fn is_keyword(&self, text: &str) -> bool {
        self.is(TokenKind::Keyword, text)
    }
}

impl Display for Token {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}:{}\t{:?}\t{:?}",
            self.location.row, self.location.column, self.kind, self.text
        )
    }
}

struct Scanner<'a> {
    source: &'a str,
    offset: usize,
    row: usize,
    column: usize,
    tokens: Vec<Token>,
}

impl<'a> Scanner<'a> {
    fn new(source: &'a str) -> Self {
        Scanner {
            source,
            offset: 0,
            row: 1,
            column: 1,
            tokens: vec![],
        }
    }

    fn rest(&self) -> &'a str {
        &self.source[self.offset..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        self.rest().chars().nth(1)
    }

    fn bump(&mut self) -> Option<char> {
        let c = self.peek()?;
        self.offset += c.len_utf8();
        if c == '\n' {
            self.row += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(c)
    }

    fn bump_while(&mut self, pred: impl Fn(char) -> bool) {
        while self.peek().is_some_and(&pred) {
            self.bump();
        }
    }

    fn push(&mut self, kind: TokenKind, start: usize, location: Location) {
        self.tokens.push(Token {
            kind,
            text: self.source[start..self.offset].to_owned(),
            location,
        });
    }

    fn scan(mut self) -> Vec<Token> {
        while let Some(c) = self.peek() {
            let start = self.offset;
            let location = Location::new(self.row, self.column);

            match c {
                ' ' | '\t' | '\r' | '\n' => {
                    self.bump();
                }
                '#' => self.bump_while(|c| c != '\n'),
                ',' | ';' => {
                    self.bump();
                    self.push(TokenKind::Separator, start, location);
                }
                '"' | '\'' | '`' => {
                    let kind = self.string(c);
                    self.push(kind, start, location);
                }
                '0'..='9' => {
                    self.number();
                    self.push(TokenKind::Literal, start, location);
                }
                c if c.is_ascii_alphabetic() || c == '_' => {
                    self.identifier();
                    let kind = if KEYWORDS.contains(&&self.source[start..self.offset]) {
                        TokenKind::Keyword
                    } else {
                        TokenKind::Identifier
                    };
                    self.push(kind, start, location);
                }
                _ => {
                    let kind = self.operator();
                    self.push(kind, start, location);
                }
            }
        }
        self.tokens
    }

    /// Consumes a quoted string. An unterminated quote yields a lone
    /// Unknown token and scanning resumes right after it.
    fn string(&mut self, quote: char) -> TokenKind {
        let mut chars = self.rest().char_indices().skip(1);
        let mut end = None;
        while let Some((i, c)) = chars.next() {
            if c == '\\' {
                chars.next();
            } else if c == quote {
                end = Some(i + c.len_utf8());
                break;
            }
        }

        match end {
            Some(len) => {
                let stop = self.offset + len;
                while self.offset < stop {
                    self.bump();
                }
                TokenKind::StringLiteral
            }
            None => {
                self.bump();
                TokenKind::Unknown
            }
        }
    }

    fn number(&mut self) {
        let radix_digit = match (self.peek(), self.peek_second()) {
            (Some('0'), Some('b')) => Some(2),
            (Some('0'), Some('x')) => Some(16),
            _ => None,
        };
        if let Some(radix) = radix_digit {
            let first = self.rest().chars().nth(2);
            if first.is_some_and(|c| c.is_digit(radix)) {
                self.bump();
                self.bump();
                self.bump_while(|c| c.is_digit(radix));
                return;
            }
        }

        self.bump_while(|c| c.is_ascii_digit());
        if self.peek() == Some('.') && self.peek_second().is_some_and(|c| c.is_ascii_digit()) {
            self.bump();
            self.bump_while(|c| c.is_ascii_digit());
        }
    }

    fn identifier(&mut self) {
        let word = |c: char| c.is_ascii_alphanumeric() || c == '_';
        self.bump_while(word);
        while self.peek() == Some('.')
            && self
                .peek_second()
                .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        {
            self.bump();
            self.bump_while(word);
        }
    }

    fn operator(&mut self) -> TokenKind {
        if let Some(op) = LONG_OPERATORS.iter().find(|op| self.rest().starts_with(**op)) {
            for _ in 0..op.len() {
                self.bump();
            }
            return TokenKind::Operator;
        }

        match self.bump() {
            Some(c) if SHORT_OPERATORS.contains(c) => TokenKind::Operator,
            _ => TokenKind::Unknown,
        }
    }
}

/// Splits source text into classified tokens. Never fails: text that
/// matches no rule becomes a [`TokenKind::Unknown`] token.
pub fn tokenize(source: &str) -> Vec<Token> {
    Scanner::new(source).scan()
}

/// Strips the quotes from a string literal and resolves backslash escapes
/// in a single pass.
pub fn unquote(text: &str) -> String {
    let mut chars = text.chars();
    chars.next();
    chars.next_back();

    let mut res = String::with_capacity(text.len());
    while let Some(c) = chars.next() {
        if c != '\\' {
            res.push(c);
            continue;
        }
        match chars.next() {
            Some('n') => res.push('\n'),
            Some('t') => res.push('\t'),
            Some('r') => res.push('\r'),
            Some('0') => res.push('\0'),
            Some(other) => res.push(other),
            None => res.push('\\'),
        }
    }
    res
}
