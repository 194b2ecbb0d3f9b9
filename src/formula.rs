//! Restricted arithmetic evaluator for calculated-field formulas.
//!
//! Formulas arrive inside server-authored schemas, so this is deliberately
//! not a general-purpose evaluator: a tokenizer, a recursive-descent parser
//! producing a tagged AST, and a tree walk. Only the four arithmetic
//! operators, unary minus, parentheses, numeric literals and named variables
//! are accepted.
//!
//! Pure functions, no async — easily testable.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::error::FormulaError;

fn ident_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[A-Za-z_][A-Za-z0-9_]*").expect("static identifier pattern"))
}

/// Unique identifier tokens in the formula, in first-occurrence order.
/// These bind positionally to the caller's bindings list.
pub fn extract_variables(formula: &str) -> Vec<String> {
    let mut seen = Vec::new();
    for m in ident_regex().find_iter(formula) {
        let name = m.as_str();
        if !seen.iter().any(|v| v == name) {
            seen.push(name.to_string());
        }
    }
    seen
}

/// Evaluate `formula` against positional `bindings`.
///
/// The number of unique variable tokens in the formula must equal
/// `bindings.len()`, otherwise `ArityMismatch` is returned and the caller
/// treats the result as indeterminate. Binding names are informational; the
/// i-th unique formula variable takes the i-th binding's value. Returns full
/// precision; display rounding is the caller's concern.
pub fn evaluate(formula: &str, bindings: &[(String, f64)]) -> Result<f64, FormulaError> {
    let variables = extract_variables(formula);
    if variables.len() != bindings.len() {
        return Err(FormulaError::ArityMismatch {
            found: variables.len(),
            provided: bindings.len(),
        });
    }

    let env: HashMap<&str, f64> = variables
        .iter()
        .map(String::as_str)
        .zip(bindings.iter().map(|(_, value)| *value))
        .collect();

    let expr = parse(formula)?;
    Ok(eval(&expr, &env))
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Num(f64),
    Var(String),
    Neg(Box<Expr>),
    Bin(Op, Box<Expr>, Box<Expr>),
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Op {
    Add,
    Sub,
    Mul,
    Div,
}

fn eval(expr: &Expr, env: &HashMap<&str, f64>) -> f64 {
    match expr {
        Expr::Num(n) => *n,
        // unbound variables coerce to 0, same as non-numeric form values
        Expr::Var(name) => env.get(name.as_str()).copied().unwrap_or(0.0),
        Expr::Neg(inner) => -eval(inner, env),
        Expr::Bin(op, lhs, rhs) => {
            let (l, r) = (eval(lhs, env), eval(rhs, env));
            match op {
                Op::Add => l + r,
                Op::Sub => l - r,
                Op::Mul => l * r,
                Op::Div => l / r,
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Num(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    LParen,
    RParen,
}

fn tokenize(formula: &str) -> Result<Vec<(Token, usize)>, FormulaError> {
    let mut tokens = Vec::new();
    let bytes = formula.as_bytes();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i] as char;
        match c {
            ' ' | '\t' | '\r' | '\n' => i += 1,
            '+' => {
                tokens.push((Token::Plus, i));
                i += 1;
            }
            '-' => {
                tokens.push((Token::Minus, i));
                i += 1;
            }
            '*' => {
                tokens.push((Token::Star, i));
                i += 1;
            }
            '/' => {
                tokens.push((Token::Slash, i));
                i += 1;
            }
            '(' => {
                tokens.push((Token::LParen, i));
                i += 1;
            }
            ')' => {
                tokens.push((Token::RParen, i));
                i += 1;
            }
            '0'..='9' | '.' => {
                let start = i;
                while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
                    i += 1;
                }
                let literal = &formula[start..i];
                let value = literal.parse::<f64>().map_err(|_| FormulaError::Parse {
                    at: start,
                    message: format!("invalid number literal '{literal}'"),
                })?;
                tokens.push((Token::Num(value), start));
            }
            'a'..='z' | 'A'..='Z' | '_' => {
                let start = i;
                while i < bytes.len()
                    && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_')
                {
                    i += 1;
                }
                tokens.push((Token::Ident(formula[start..i].to_string()), start));
            }
            other => {
                return Err(FormulaError::Parse {
                    at: i,
                    message: format!("unexpected character '{other}'"),
                });
            }
        }
    }

    Ok(tokens)
}

/// Grammar:
///   expr   := term (('+' | '-') term)*
///   term   := factor (('*' | '/') factor)*
///   factor := NUMBER | IDENT | '(' expr ')' | '-' factor
fn parse(formula: &str) -> Result<Expr, FormulaError> {
    let tokens = tokenize(formula)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        len: formula.len(),
    };
    let expr = parser.expr()?;
    parser.expect_end()?;
    Ok(expr)
}

struct Parser {
    tokens: Vec<(Token, usize)>,
    pos: usize,
    len: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|(t, _)| t)
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map(|(_, at)| *at).unwrap_or(self.len)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|(t, _)| t.clone());
        self.pos += 1;
        token
    }

    fn expr(&mut self) -> Result<Expr, FormulaError> {
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => Op::Add,
                Some(Token::Minus) => Op::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.term()?;
            lhs = Expr::Bin(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Expr, FormulaError> {
        let mut lhs = self.factor()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => Op::Mul,
                Some(Token::Slash) => Op::Div,
                _ => break,
            };
            self.advance();
            let rhs = self.factor()?;
            lhs = Expr::Bin(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn factor(&mut self) -> Result<Expr, FormulaError> {
        let at = self.offset();
        match self.advance() {
            Some(Token::Num(n)) => Ok(Expr::Num(n)),
            Some(Token::Ident(name)) => Ok(Expr::Var(name)),
            Some(Token::Minus) => Ok(Expr::Neg(Box::new(self.factor()?))),
            Some(Token::LParen) => {
                let inner = self.expr()?;
                match self.advance() {
                    Some(Token::RParen) => Ok(inner),
                    _ => Err(FormulaError::Parse {
                        at: self.offset(),
                        message: "expected ')'".to_string(),
                    }),
                }
            }
            Some(token) => Err(FormulaError::Parse {
                at,
                message: format!("unexpected token {token:?}"),
            }),
            None => Err(FormulaError::Parse {
                at,
                message: "unexpected end of formula".to_string(),
            }),
        }
    }

    fn expect_end(&mut self) -> Result<(), FormulaError> {
        if self.pos < self.tokens.len() {
            return Err(FormulaError::Parse {
                at: self.offset(),
                message: "trailing input after expression".to_string(),
            });
        }
        Ok(())
    }
}
