//! Formula lexer and Pratt parser.
//!
//! # Invariants
//! - Parsing is pure and allocation-bounded by input length.
//! - `^` is right-associative and binds tighter than unary minus
//!   (`-2^2 == -4`).

use std::error::Error;
use std::fmt::{Display, Formatter};

/// Parse failure for one formula string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormulaError {
    Empty,
    UnexpectedChar { ch: char, offset: usize },
    UnexpectedToken { token: String, offset: usize },
    UnexpectedEnd,
    UnknownFunction(String),
}

impl Display for FormulaError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "formula is empty"),
            Self::UnexpectedChar { ch, offset } => {
                write!(f, "unexpected character `{ch}` at offset {offset}")
            }
            Self::UnexpectedToken { token, offset } => {
                write!(f, "unexpected token `{token}` at offset {offset}")
            }
            Self::UnexpectedEnd => write!(f, "unexpected end of formula"),
            Self::UnknownFunction(name) => write!(f, "unknown function: {name}"),
        }
    }
}

impl Error for FormulaError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Plus,
    Minus,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Rem => "%",
            Self::Pow => "^",
        }
    }
}

/// Parsed formula syntax tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Variable(String),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
    Call {
        name: String,
        args: Vec<Expr>,
    },
}

#[derive(Debug, Clone, PartialEq)]
enum TokenKind {
    Number(f64),
    Ident(String),
    Op(char),
    LParen,
    RParen,
    Comma,
}

#[derive(Debug, Clone, PartialEq)]
struct Token {
    kind: TokenKind,
    offset: usize,
}

impl Token {
    fn describe(&self) -> String {
        match &self.kind {
            TokenKind::Number(value) => value.to_string(),
            TokenKind::Ident(name) => name.clone(),
            TokenKind::Op(ch) => ch.to_string(),
            TokenKind::LParen => "(".to_string(),
            TokenKind::RParen => ")".to_string(),
            TokenKind::Comma => ",".to_string(),
        }
    }
}

/// Function names accepted in formulas.
pub const KNOWN_FUNCTIONS: &[&str] = &[
    "abs", "sqrt", "cbrt", "exp", "ln", "log", "log10", "log2", "sin", "cos", "tan", "asin",
    "acos", "atan", "sinh", "cosh", "tanh", "floor", "ceil", "round", "trunc", "sign", "min",
    "max", "pow", "atan2", "hypot",
];

/// Parses one formula into an expression tree.
///
/// # Errors
/// - Returns `FormulaError::Empty` for blank input.
/// - Returns positional errors for unexpected characters or tokens.
/// - Returns `FormulaError::UnknownFunction` for calls outside
///   `KNOWN_FUNCTIONS`.
pub fn parse_formula(source: &str) -> Result<Expr, FormulaError> {
    let tokens = lex(source)?;
    if tokens.is_empty() {
        return Err(FormulaError::Empty);
    }
    let mut parser = Parser { tokens, pos: 0 };
    let expr = parser.parse_expression(0)?;
    if let Some(token) = parser.peek() {
        return Err(FormulaError::UnexpectedToken {
            token: token.describe(),
            offset: token.offset,
        });
    }
    Ok(expr)
}

fn lex(source: &str) -> Result<Vec<Token>, FormulaError> {
    let chars: Vec<(usize, char)> = source.char_indices().collect();
    let mut tokens = Vec::new();
    let mut i = 0;
    while i < chars.len() {
        let (offset, ch) = chars[i];
        if ch.is_whitespace() {
            i += 1;
            continue;
        }
        if ch.is_ascii_digit() || (ch == '.' && next_is_digit(&chars, i)) {
            let start = i;
            while i < chars.len() && (chars[i].1.is_ascii_digit() || chars[i].1 == '.') {
                i += 1;
            }
            if i < chars.len() && matches!(chars[i].1, 'e' | 'E') {
                let mut j = i + 1;
                if j < chars.len() && matches!(chars[j].1, '+' | '-') {
                    j += 1;
                }
                if j < chars.len() && chars[j].1.is_ascii_digit() {
                    i = j;
                    while i < chars.len() && chars[i].1.is_ascii_digit() {
                        i += 1;
                    }
                }
            }
            let text: String = chars[start..i].iter().map(|(_, c)| *c).collect();
            let value = text
                .parse::<f64>()
                .map_err(|_| FormulaError::UnexpectedToken {
                    token: text.clone(),
                    offset,
                })?;
            tokens.push(Token {
                kind: TokenKind::Number(value),
                offset,
            });
            continue;
        }
        if ch.is_alphabetic() || ch == '_' {
            let start = i;
            while i < chars.len() && (chars[i].1.is_alphanumeric() || chars[i].1 == '_') {
                i += 1;
            }
            let name: String = chars[start..i].iter().map(|(_, c)| *c).collect();
            tokens.push(Token {
                kind: TokenKind::Ident(name),
                offset,
            });
            continue;
        }
        let kind = match ch {
            '+' | '-' | '*' | '/' | '%' | '^' => TokenKind::Op(ch),
            '(' => TokenKind::LParen,
            ')' => TokenKind::RParen,
            ',' => TokenKind::Comma,
            other => return Err(FormulaError::UnexpectedChar { ch: other, offset }),
        };
        tokens.push(Token { kind, offset });
        i += 1;
    }
    Ok(tokens)
}

fn next_is_digit(chars: &[(usize, char)], i: usize) -> bool {
    chars.get(i + 1).is_some_and(|(_, c)| c.is_ascii_digit())
}

const PREFIX_BP: u8 = 25;

fn infix_binding_power(op: BinaryOp) -> (u8, u8) {
    match op {
        BinaryOp::Add | BinaryOp::Sub => (10, 11),
        BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => (20, 21),
        BinaryOp::Pow => (31, 30),
    }
}

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn expect(&mut self, kind: TokenKind) -> Result<(), FormulaError> {
        match self.next() {
            Some(token) if token.kind == kind => Ok(()),
            Some(token) => Err(FormulaError::UnexpectedToken {
                token: token.describe(),
                offset: token.offset,
            }),
            None => Err(FormulaError::UnexpectedEnd),
        }
    }

    fn parse_expression(&mut self, min_bp: u8) -> Result<Expr, FormulaError> {
        let mut lhs = self.parse_prefix()?;

        loop {
            let op = match self.peek().map(|token| &token.kind) {
                Some(TokenKind::Op('+')) => BinaryOp::Add,
                Some(TokenKind::Op('-')) => BinaryOp::Sub,
                Some(TokenKind::Op('*')) => BinaryOp::Mul,
                Some(TokenKind::Op('/')) => BinaryOp::Div,
                Some(TokenKind::Op('%')) => BinaryOp::Rem,
                Some(TokenKind::Op('^')) => BinaryOp::Pow,
                _ => break,
            };
            let (l_bp, r_bp) = infix_binding_power(op);
            if l_bp < min_bp {
                break;
            }
            self.next();
            let rhs = self.parse_expression(r_bp)?;
            lhs = Expr::Binary {
                op,
                left: Box::new(lhs),
                right: Box::new(rhs),
            };
        }

        Ok(lhs)
    }

    fn parse_prefix(&mut self) -> Result<Expr, FormulaError> {
        let token = self.next().ok_or(FormulaError::UnexpectedEnd)?;
        match token.kind {
            TokenKind::Number(value) => Ok(Expr::Number(value)),
            TokenKind::Op('-') => self.parse_unary(UnaryOp::Minus),
            TokenKind::Op('+') => self.parse_unary(UnaryOp::Plus),
            TokenKind::LParen => {
                let inner = self.parse_expression(0)?;
                self.expect(TokenKind::RParen)?;
                Ok(inner)
            }
            TokenKind::Ident(name) => {
                if matches!(self.peek().map(|t| &t.kind), Some(TokenKind::LParen)) {
                    self.next();
                    self.parse_call(name)
                } else {
                    Ok(Expr::Variable(name))
                }
            }
            kind => Err(FormulaError::UnexpectedToken {
                token: Token {
                    kind,
                    offset: token.offset,
                }
                .describe(),
                offset: token.offset,
            }),
        }
    }

    fn parse_unary(&mut self, op: UnaryOp) -> Result<Expr, FormulaError> {
        let operand = self.parse_expression(PREFIX_BP)?;
        Ok(Expr::Unary {
            op,
            operand: Box::new(operand),
        })
    }

    fn parse_call(&mut self, name: String) -> Result<Expr, FormulaError> {
        if !KNOWN_FUNCTIONS.contains(&name.as_str()) {
            return Err(FormulaError::UnknownFunction(name));
        }
        let mut args = Vec::new();
        if matches!(self.peek().map(|t| &t.kind), Some(TokenKind::RParen)) {
            self.next();
            return Ok(Expr::Call { name, args });
        }
        loop {
            args.push(self.parse_expression(0)?);
            match self.next() {
                Some(Token {
                    kind: TokenKind::Comma,
                    ..
                }) => continue,
                Some(Token {
                    kind: TokenKind::RParen,
                    ..
                }) => break,
                Some(token) => {
                    return Err(FormulaError::UnexpectedToken {
                        token: token.describe(),
                        offset: token.offset,
                    })
                }
                None => return Err(FormulaError::UnexpectedEnd),
            }
        }
        Ok(Expr::Call { name, args })
    }
}

#[cfg(test)]
mod tests {
    use super::{parse_formula, BinaryOp, Expr, FormulaError, UnaryOp};

    fn num(value: f64) -> Box<Expr> {
        Box::new(Expr::Number(value))
    }

    #[test]
    fn respects_precedence_and_associativity() {
        let expr = parse_formula("1 + 2 * 3").expect("formula should parse");
        assert_eq!(
            expr,
            Expr::Binary {
                op: BinaryOp::Add,
                left: num(1.0),
                right: Box::new(Expr::Binary {
                    op: BinaryOp::Mul,
                    left: num(2.0),
                    right: num(3.0),
                }),
            }
        );

        let expr = parse_formula("2^3^2").expect("formula should parse");
        assert_eq!(
            expr,
            Expr::Binary {
                op: BinaryOp::Pow,
                left: num(2.0),
                right: Box::new(Expr::Binary {
                    op: BinaryOp::Pow,
                    left: num(3.0),
                    right: num(2.0),
                }),
            }
        );
    }

    #[test]
    fn unary_minus_binds_looser_than_power() {
        let expr = parse_formula("-x^2").expect("formula should parse");
        assert_eq!(
            expr,
            Expr::Unary {
                op: UnaryOp::Minus,
                operand: Box::new(Expr::Binary {
                    op: BinaryOp::Pow,
                    left: Box::new(Expr::Variable("x".to_string())),
                    right: num(2.0),
                }),
            }
        );
    }

    #[test]
    fn parses_calls_and_exponents() {
        let expr = parse_formula("max(1.5e1, x)").expect("formula should parse");
        assert_eq!(
            expr,
            Expr::Call {
                name: "max".to_string(),
                args: vec![Expr::Number(15.0), Expr::Variable("x".to_string())],
            }
        );
    }

    #[test]
    fn reports_structured_errors() {
        assert_eq!(parse_formula("   "), Err(FormulaError::Empty));
        assert_eq!(parse_formula("1 +"), Err(FormulaError::UnexpectedEnd));
        assert_eq!(
            parse_formula("x $ 2"),
            Err(FormulaError::UnexpectedChar { ch: '$', offset: 2 })
        );
        assert_eq!(
            parse_formula("frob(x)"),
            Err(FormulaError::UnknownFunction("frob".to_string()))
        );
        assert!(matches!(
            parse_formula("(1 + 2"),
            Err(FormulaError::UnexpectedEnd)
        ));
        assert!(matches!(
            parse_formula("1 2"),
            Err(FormulaError::UnexpectedToken { .. })
        ));
    }
}
