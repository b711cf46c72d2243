//! Arithmetic expression parsing and evaluation.
//!
//! Grammar (lowest to highest precedence):
//!
//! ```text
//! expr    := term (('+' | '-') term)*
//! term    := unary (('*' | '/' | '%') unary)*
//! unary   := ('+' | '-') unary | power
//! power   := primary (('^' | '**') unary)?
//! primary := number | constant | function '(' expr (',' expr)* ')' | '(' expr ')'
//! ```
//!
//! `^` is right-associative and binds tighter than a leading minus, so
//! `-2^2` is `-4`.

use std::fmt;

use thiserror::Error;

const MAX_DEPTH: usize = 64;

/// Syntax error with the byte offset where it was detected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message} at position {position}")]
pub struct ParseError {
    pub position: usize,
    pub message: String,
}

impl ParseError {
    fn new(position: usize, message: impl Into<String>) -> Self {
        Self {
            position,
            message: message.into(),
        }
    }
}

/// Evaluation failure: the expression is well formed but has no finite value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EvalError {
    #[error("Division by zero")]
    DivisionByZero,

    #[error("Modulo by zero")]
    ModuloByZero,

    #[error("Numeric overflow: result is not representable")]
    Overflow,

    #[error("Undefined result: {0}")]
    Undefined(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Power,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Subtract => "-",
            Self::Multiply => "*",
            Self::Divide => "/",
            Self::Modulo => "%",
            Self::Power => "^",
        }
    }

    /// Apply the operator, rejecting undefined and non-finite results.
    pub fn apply(&self, lhs: f64, rhs: f64) -> Result<f64, EvalError> {
        let value = match self {
            Self::Add => lhs + rhs,
            Self::Subtract => lhs - rhs,
            Self::Multiply => lhs * rhs,
            Self::Divide => {
                if rhs == 0.0 {
                    return Err(EvalError::DivisionByZero);
                }
                lhs / rhs
            }
            Self::Modulo => {
                if rhs == 0.0 {
                    return Err(EvalError::ModuloByZero);
                }
                lhs % rhs
            }
            Self::Power => lhs.powf(rhs),
        };
        finite(value, || format!("{} {} {}", lhs, self.symbol(), rhs))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Function {
    Sqrt,
    Sin,
    Cos,
    Tan,
    Asin,
    Acos,
    Atan,
    Log,
    Ln,
    Abs,
    Ceil,
    Floor,
    Round,
    Pow,
    Min,
    Max,
}

impl Function {
    fn from_name(name: &str) -> Option<Self> {
        let function = match name {
            "sqrt" => Self::Sqrt,
            "sin" => Self::Sin,
            "cos" => Self::Cos,
            "tan" => Self::Tan,
            "asin" => Self::Asin,
            "acos" => Self::Acos,
            "atan" => Self::Atan,
            "log" => Self::Log,
            "ln" => Self::Ln,
            "abs" => Self::Abs,
            "ceil" => Self::Ceil,
            "floor" => Self::Floor,
            "round" => Self::Round,
            "pow" => Self::Pow,
            "min" => Self::Min,
            "max" => Self::Max,
            _ => return None,
        };
        Some(function)
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Sqrt => "sqrt",
            Self::Sin => "sin",
            Self::Cos => "cos",
            Self::Tan => "tan",
            Self::Asin => "asin",
            Self::Acos => "acos",
            Self::Atan => "atan",
            Self::Log => "log",
            Self::Ln => "ln",
            Self::Abs => "abs",
            Self::Ceil => "ceil",
            Self::Floor => "floor",
            Self::Round => "round",
            Self::Pow => "pow",
            Self::Min => "min",
            Self::Max => "max",
        }
    }

    fn arity(&self) -> usize {
        match self {
            Self::Pow | Self::Min | Self::Max => 2,
            _ => 1,
        }
    }

    fn apply(&self, args: &[f64]) -> Result<f64, EvalError> {
        let x = args.first().copied().unwrap_or(f64::NAN);
        let y = args.get(1).copied().unwrap_or(f64::NAN);
        let value = match self {
            Self::Sqrt => x.sqrt(),
            Self::Sin => x.sin(),
            Self::Cos => x.cos(),
            Self::Tan => x.tan(),
            Self::Asin => x.asin(),
            Self::Acos => x.acos(),
            Self::Atan => x.atan(),
            Self::Log => x.log10(),
            Self::Ln => x.ln(),
            Self::Abs => x.abs(),
            Self::Ceil => x.ceil(),
            Self::Floor => x.floor(),
            Self::Round => x.round(),
            Self::Pow => x.powf(y),
            Self::Min => x.min(y),
            Self::Max => x.max(y),
        };
        finite(value, || format!("{}({})", self.name(), join(args)))
    }
}

/// Parsed expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Number(f64),
    Negate(Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Call(Function, Vec<Expr>),
}

impl Expr {
    /// Evaluate the tree.
    pub fn evaluate(&self) -> Result<f64, EvalError> {
        match self {
            Self::Number(value) => finite(*value, || value.to_string()),
            Self::Negate(inner) => Ok(-inner.evaluate()?),
            Self::Binary(op, lhs, rhs) => op.apply(lhs.evaluate()?, rhs.evaluate()?),
            Self::Call(function, args) => {
                let values = args
                    .iter()
                    .map(Expr::evaluate)
                    .collect::<Result<Vec<_>, _>>()?;
                function.apply(&values)
            }
        }
    }
}

fn finite(value: f64, describe: impl FnOnce() -> String) -> Result<f64, EvalError> {
    if value.is_nan() {
        Err(EvalError::Undefined(describe()))
    } else if value.is_infinite() {
        Err(EvalError::Overflow)
    } else {
        Ok(value)
    }
}

fn join(values: &[f64]) -> String {
    values
        .iter()
        .map(f64::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Parse an expression into a tree.
pub fn parse(input: &str) -> Result<Expr, ParseError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser {
        tokens,
        position: 0,
        end: input.len(),
        depth: 0,
    };
    let expr = parser.expression()?;
    match parser.peek() {
        None => Ok(expr),
        Some((offset, token)) => Err(ParseError::new(
            *offset,
            format!("unexpected {}", token),
        )),
    }
}

/// Parse and evaluate in one step.
pub fn evaluate(input: &str) -> Result<f64, EvaluateError> {
    Ok(parse(input)?.evaluate()?)
}

/// Either failure of [`evaluate`].
#[derive(Debug, Error)]
pub enum EvaluateError {
    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Eval(#[from] EvalError),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Op(BinaryOp),
    LParen,
    RParen,
    Comma,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(n) => write!(f, "number {}", n),
            Self::Ident(name) => write!(f, "identifier '{}'", name),
            Self::Op(op) => write!(f, "operator '{}'", op.symbol()),
            Self::LParen => f.write_str("'('"),
            Self::RParen => f.write_str("')'"),
            Self::Comma => f.write_str("','"),
        }
    }
}

fn tokenize(input: &str) -> Result<Vec<(usize, Token)>, ParseError> {
    let bytes = input.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i];
        let start = i;
        match c {
            b' ' | b'\t' | b'\n' | b'\r' => {
                i += 1;
                continue;
            }
            b'0'..=b'9' | b'.' => {
                while i < bytes.len() && (bytes[i].is_ascii_digit() || bytes[i] == b'.') {
                    i += 1;
                }
                // Exponent only when digits follow; a bare `e` stays an identifier.
                if i < bytes.len() && (bytes[i] == b'e' || bytes[i] == b'E') {
                    let mut j = i + 1;
                    if j < bytes.len() && (bytes[j] == b'+' || bytes[j] == b'-') {
                        j += 1;
                    }
                    if j < bytes.len() && bytes[j].is_ascii_digit() {
                        while j < bytes.len() && bytes[j].is_ascii_digit() {
                            j += 1;
                        }
                        i = j;
                    }
                }
                let literal = &input[start..i];
                let value: f64 = literal
                    .parse()
                    .map_err(|_| ParseError::new(start, format!("invalid number '{}'", literal)))?;
                tokens.push((start, Token::Number(value)));
                continue;
            }
            b'a'..=b'z' | b'A'..=b'Z' | b'_' => {
                while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
                    i += 1;
                }
                tokens.push((start, Token::Ident(input[start..i].to_ascii_lowercase())));
                continue;
            }
            b'+' => tokens.push((start, Token::Op(BinaryOp::Add))),
            b'-' => tokens.push((start, Token::Op(BinaryOp::Subtract))),
            b'*' => {
                if bytes.get(i + 1) == Some(&b'*') {
                    i += 1;
                    tokens.push((start, Token::Op(BinaryOp::Power)));
                } else {
                    tokens.push((start, Token::Op(BinaryOp::Multiply)));
                }
            }
            b'/' => tokens.push((start, Token::Op(BinaryOp::Divide))),
            b'%' => tokens.push((start, Token::Op(BinaryOp::Modulo))),
            b'^' => tokens.push((start, Token::Op(BinaryOp::Power))),
            b'(' => tokens.push((start, Token::LParen)),
            b')' => tokens.push((start, Token::RParen)),
            b',' => tokens.push((start, Token::Comma)),
            _ => {
                let ch = input[start..].chars().next().unwrap_or('?');
                return Err(ParseError::new(start, format!("unexpected character '{}'", ch)));
            }
        }
        i += 1;
    }

    Ok(tokens)
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    position: usize,
    end: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> Option<&(usize, Token)> {
        self.tokens.get(self.position)
    }

    fn next(&mut self) -> Option<(usize, Token)> {
        let token = self.tokens.get(self.position).cloned();
        if token.is_some() {
            self.position += 1;
        }
        token
    }

    fn offset(&self) -> usize {
        self.peek().map(|(offset, _)| *offset).unwrap_or(self.end)
    }

    fn eat_op(&mut self, ops: &[BinaryOp]) -> Option<BinaryOp> {
        match self.peek() {
            Some((_, Token::Op(op))) if ops.contains(op) => {
                let op = *op;
                self.position += 1;
                Some(op)
            }
            _ => None,
        }
    }

    fn expect(&mut self, expected: Token) -> Result<(), ParseError> {
        match self.next() {
            Some((_, token)) if token == expected => Ok(()),
            Some((offset, token)) => Err(ParseError::new(
                offset,
                format!("expected {}, found {}", expected, token),
            )),
            None => Err(ParseError::new(
                self.end,
                format!("expected {}, found end of input", expected),
            )),
        }
    }

    fn descend(&mut self) -> Result<(), ParseError> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(ParseError::new(self.offset(), "expression nested too deeply"));
        }
        Ok(())
    }

    fn expression(&mut self) -> Result<Expr, ParseError> {
        self.descend()?;
        let mut lhs = self.term()?;
        while let Some(op) = self.eat_op(&[BinaryOp::Add, BinaryOp::Subtract]) {
            let rhs = self.term()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        self.depth -= 1;
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Expr, ParseError> {
        let mut lhs = self.unary()?;
        while let Some(op) =
            self.eat_op(&[BinaryOp::Multiply, BinaryOp::Divide, BinaryOp::Modulo])
        {
            let rhs = self.unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr, ParseError> {
        if let Some(op) = self.eat_op(&[BinaryOp::Add, BinaryOp::Subtract]) {
            self.descend()?;
            let operand = self.unary()?;
            self.depth -= 1;
            return Ok(match op {
                BinaryOp::Subtract => Expr::Negate(Box::new(operand)),
                _ => operand,
            });
        }
        self.power()
    }

    fn power(&mut self) -> Result<Expr, ParseError> {
        let base = self.primary()?;
        if self.eat_op(&[BinaryOp::Power]).is_some() {
            self.descend()?;
            let exponent = self.unary()?;
            self.depth -= 1;
            return Ok(Expr::Binary(BinaryOp::Power, Box::new(base), Box::new(exponent)));
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<Expr, ParseError> {
        match self.next() {
            Some((_, Token::Number(value))) => Ok(Expr::Number(value)),
            Some((_, Token::LParen)) => {
                let inner = self.expression()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Some((offset, Token::Ident(name))) => self.identifier(offset, &name),
            Some((offset, token)) => Err(ParseError::new(offset, format!("unexpected {}", token))),
            None => Err(ParseError::new(self.end, "unexpected end of input")),
        }
    }

    fn identifier(&mut self, offset: usize, name: &str) -> Result<Expr, ParseError> {
        match name {
            "pi" => return Ok(Expr::Number(std::f64::consts::PI)),
            "e" => return Ok(Expr::Number(std::f64::consts::E)),
            _ => {}
        }

        let function = Function::from_name(name)
            .ok_or_else(|| ParseError::new(offset, format!("unknown identifier '{}'", name)))?;

        self.expect(Token::LParen)?;
        let mut args = vec![self.expression()?];
        while matches!(self.peek(), Some((_, Token::Comma))) {
            self.position += 1;
            args.push(self.expression()?);
        }
        self.expect(Token::RParen)?;

        if args.len() != function.arity() {
            return Err(ParseError::new(
                offset,
                format!(
                    "function '{}' takes {} argument(s), got {}",
                    function.name(),
                    function.arity(),
                    args.len()
                ),
            ));
        }

        Ok(Expr::Call(function, args))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eval(input: &str) -> f64 {
        evaluate(input).unwrap_or_else(|e| panic!("{} failed: {}", input, e))
    }

    fn approx(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_basic_operations() {
        assert_eq!(eval("5 + 3"), 8.0);
        assert_eq!(eval("-5 + (-3)"), -8.0);
        assert_eq!(eval("10 - 4"), 6.0);
        assert_eq!(eval("6 * 7"), 42.0);
        assert_eq!(eval("15 / 3"), 5.0);
        assert_eq!(eval("(-12) / (-3)"), 4.0);
        assert_eq!(eval("17 % 5"), 2.0);
    }

    #[test]
    fn test_precedence_and_associativity() {
        assert_eq!(eval("2 + 3 * 4"), 14.0);
        assert_eq!(eval("(2 + 3) * 4"), 20.0);
        assert_eq!(eval("2 ^ 3 ^ 2"), 512.0);
        assert_eq!(eval("-2 ^ 2"), -4.0);
        assert_eq!(eval("2 ^ -1"), 0.5);
        assert_eq!(eval("2 ** 10"), 1024.0);
        assert_eq!(eval("10 - 4 - 3"), 3.0);
        assert_eq!(eval("100 / 10 / 5"), 2.0);
    }

    #[test]
    fn test_functions_and_constants() {
        assert_eq!(eval("sqrt(16)"), 4.0);
        assert!(approx(eval("sin(pi/2)"), 1.0));
        assert!(approx(eval("cos(0)"), 1.0));
        assert_eq!(eval("log(1000)"), 3.0);
        assert!(approx(eval("ln(e)"), 1.0));
        assert_eq!(eval("abs(-7.5)"), 7.5);
        assert_eq!(eval("ceil(1.2) + floor(1.8) + round(2.5)"), 6.0);
        assert_eq!(eval("pow(2, 8)"), 256.0);
        assert_eq!(eval("max(3, min(10, 7))"), 7.0);
        assert_eq!(eval("1.5e3"), 1500.0);
    }

    #[test]
    fn test_division_by_zero() {
        let err = parse("10 / 0").unwrap().evaluate().unwrap_err();
        assert_eq!(err, EvalError::DivisionByZero);
        let err = parse("10 % 0").unwrap().evaluate().unwrap_err();
        assert_eq!(err, EvalError::ModuloByZero);
    }

    #[test]
    fn test_overflow_and_undefined() {
        assert_eq!(
            parse("10 ^ 400").unwrap().evaluate().unwrap_err(),
            EvalError::Overflow
        );
        assert!(matches!(
            parse("sqrt(-1)").unwrap().evaluate().unwrap_err(),
            EvalError::Undefined(_)
        ));
        assert!(matches!(
            parse("ln(0)").unwrap().evaluate().unwrap_err(),
            EvalError::Overflow
        ));
    }

    #[test]
    fn test_overflowing_literal() {
        for input in ["1e999", "-1e400", "2 * 1e309"] {
            let tree = parse(input).unwrap();
            assert!(matches!(tree.evaluate().unwrap_err(), EvalError::Overflow), "{}", input);
        }
    }

    #[test]
    fn test_syntax_errors() {
        assert!(parse("").is_err());
        assert!(parse("2 +").is_err());
        assert!(parse("(1 + 2").is_err());
        assert!(parse("1 + 2)").is_err());
        assert!(parse("foo(1)").is_err());
        assert!(parse("sqrt(1, 2)").is_err());
        assert!(parse("pow(2)").is_err());
        assert!(parse("2 $ 3").is_err());
        assert!(parse("1..2").is_err());
    }

    #[test]
    fn test_parse_error_position() {
        let err = parse("1 + $").unwrap_err();
        assert_eq!(err.position, 4);
    }

    #[test]
    fn test_nesting_limit() {
        let deep = format!("{}1{}", "(".repeat(200), ")".repeat(200));
        assert!(parse(&deep).is_err());
    }
}
