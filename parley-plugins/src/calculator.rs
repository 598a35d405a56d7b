//! Calculator plugin: safe arithmetic expression evaluation.
//!
//! Expressions are parsed by a small recursive-descent parser rather than
//! handed to anything that can execute code. Supported: `+ - * / % ^`,
//! unary minus, parentheses, the constants `pi` and `e`, and a fixed set
//! of math functions.

use crate::traits::{required_str, Plugin, PluginSchema};
use async_trait::async_trait;
use serde_json::{json, Value};

/// Plugin evaluating arithmetic expressions.
#[derive(Default)]
pub struct CalculatorPlugin;

impl CalculatorPlugin {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Plugin for CalculatorPlugin {
    fn name(&self) -> &str {
        "calculator"
    }

    fn description(&self) -> &str {
        "Safely evaluates math expressions with basic operators and functions"
    }

    fn version(&self) -> &str {
        "1.0.0"
    }

    async fn execute(&self, context: &Value) -> anyhow::Result<Value> {
        let expression = required_str(context, "expression")?.trim();
        tracing::debug!(expression, "Evaluating expression");

        let result = evaluate(expression)?;
        tracing::info!(expression, result, "Expression evaluated");

        Ok(json!({
            "result": result,
            "expression": expression,
        }))
    }

    fn schema(&self) -> anyhow::Result<PluginSchema> {
        Ok(PluginSchema {
            name: "calculate".to_string(),
            description: "Performs math calculations. Supports basic operators \
                          (+, -, *, /, ^, %) and math functions (sqrt, sin, cos, \
                          tan, log, exp, abs, round, floor, ceil)."
                .to_string(),
            parameters: json!({
                "type": "object",
                "properties": {
                    "expression": {
                        "type": "string",
                        "description": "Math expression to evaluate. \
                                        Examples: '2 + 3 * 4', 'sqrt(16)', 'sin(pi/2)'"
                    }
                },
                "required": ["expression"]
            }),
        })
    }
}

/// Evaluate an expression, requiring a finite result.
pub fn evaluate(expression: &str) -> anyhow::Result<f64> {
    let tokens = tokenize(expression)?;
    let mut parser = Parser { tokens, pos: 0 };
    let value = parser.expr()?;
    if parser.pos != parser.tokens.len() {
        anyhow::bail!("unexpected trailing input in expression");
    }
    if !value.is_finite() {
        anyhow::bail!("expression does not evaluate to a finite number");
    }
    Ok(value)
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
    LParen,
    RParen,
    Comma,
}

fn tokenize(input: &str) -> anyhow::Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&c) = chars.peek() {
        match c {
            ' ' | '\t' => {
                chars.next();
            }
            '0'..='9' | '.' => {
                let mut literal = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_digit() || c == '.' {
                        literal.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let number = literal
                    .parse::<f64>()
                    .map_err(|_| anyhow::anyhow!("invalid number: {literal}"))?;
                tokens.push(Token::Number(number));
            }
            'a'..='z' | 'A'..='Z' | '_' => {
                let mut ident = String::new();
                while let Some(&c) = chars.peek() {
                    if c.is_ascii_alphanumeric() || c == '_' {
                        ident.push(c);
                        chars.next();
                    } else {
                        break;
                    }
                }
                tokens.push(Token::Ident(ident));
            }
            '+' => {
                chars.next();
                tokens.push(Token::Plus);
            }
            '-' => {
                chars.next();
                tokens.push(Token::Minus);
            }
            '*' => {
                chars.next();
                tokens.push(Token::Star);
            }
            '/' => {
                chars.next();
                tokens.push(Token::Slash);
            }
            '%' => {
                chars.next();
                tokens.push(Token::Percent);
            }
            '^' => {
                chars.next();
                tokens.push(Token::Caret);
            }
            '(' => {
                chars.next();
                tokens.push(Token::LParen);
            }
            ')' => {
                chars.next();
                tokens.push(Token::RParen);
            }
            ',' => {
                chars.next();
                tokens.push(Token::Comma);
            }
            other => anyhow::bail!("unexpected character in expression: {other:?}"),
        }
    }

    if tokens.is_empty() {
        anyhow::bail!("empty expression");
    }
    Ok(tokens)
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

    fn expect(&mut self, expected: Token) -> anyhow::Result<()> {
        match self.next() {
            Some(t) if t == expected => Ok(()),
            Some(t) => anyhow::bail!("expected {expected:?}, found {t:?}"),
            None => anyhow::bail!("expected {expected:?}, found end of expression"),
        }
    }

    fn expr(&mut self) -> anyhow::Result<f64> {
        let mut value = self.term()?;
        while let Some(op) = self.peek() {
            match op {
                Token::Plus => {
                    self.next();
                    value += self.term()?;
                }
                Token::Minus => {
                    self.next();
                    value -= self.term()?;
                }
                _ => break,
            }
        }
        Ok(value)
    }

    fn term(&mut self) -> anyhow::Result<f64> {
        let mut value = self.unary()?;
        while let Some(op) = self.peek() {
            match op {
                Token::Star => {
                    self.next();
                    value *= self.unary()?;
                }
                Token::Slash => {
                    self.next();
                    let rhs = self.unary()?;
                    if rhs == 0.0 {
                        anyhow::bail!("division by zero");
                    }
                    value /= rhs;
                }
                Token::Percent => {
                    self.next();
                    let rhs = self.unary()?;
                    if rhs == 0.0 {
                        anyhow::bail!("modulo by zero");
                    }
                    value %= rhs;
                }
                _ => break,
            }
        }
        Ok(value)
    }

    fn unary(&mut self) -> anyhow::Result<f64> {
        match self.peek() {
            Some(Token::Minus) => {
                self.next();
                Ok(-self.unary()?)
            }
            Some(Token::Plus) => {
                self.next();
                self.unary()
            }
            _ => self.power(),
        }
    }

    // Exponentiation is right-associative and binds tighter than unary
    // minus on its left operand, so -2^2 == -4. The exponent re-enters
    // unary so 2^-3 parses.
    fn power(&mut self) -> anyhow::Result<f64> {
        let base = self.primary()?;
        if let Some(Token::Caret) = self.peek() {
            self.next();
            let exponent = self.unary()?;
            return Ok(base.powf(exponent));
        }
        Ok(base)
    }

    fn primary(&mut self) -> anyhow::Result<f64> {
        match self.next() {
            Some(Token::Number(n)) => Ok(n),
            Some(Token::LParen) => {
                let value = self.expr()?;
                self.expect(Token::RParen)?;
                Ok(value)
            }
            Some(Token::Ident(name)) => {
                if let Some(Token::LParen) = self.peek() {
                    self.next();
                    let mut args = vec![self.expr()?];
                    while let Some(Token::Comma) = self.peek() {
                        self.next();
                        args.push(self.expr()?);
                    }
                    self.expect(Token::RParen)?;
                    call_function(&name, &args)
                } else {
                    constant(&name)
                }
            }
            Some(t) => anyhow::bail!("unexpected token: {t:?}"),
            None => anyhow::bail!("unexpected end of expression"),
        }
    }
}

fn constant(name: &str) -> anyhow::Result<f64> {
    match name {
        "pi" => Ok(std::f64::consts::PI),
        "e" => Ok(std::f64::consts::E),
        other => anyhow::bail!("unknown identifier: {other}"),
    }
}

fn call_function(name: &str, args: &[f64]) -> anyhow::Result<f64> {
    let unary = |f: fn(f64) -> f64| -> anyhow::Result<f64> {
        if args.len() != 1 {
            anyhow::bail!("{name} takes exactly one argument, got {}", args.len());
        }
        Ok(f(args[0]))
    };

    match name {
        "sqrt" => {
            if args.len() != 1 {
                anyhow::bail!("sqrt takes exactly one argument, got {}", args.len());
            }
            if args[0] < 0.0 {
                anyhow::bail!("sqrt of a negative number");
            }
            Ok(args[0].sqrt())
        }
        "log" => {
            if args.len() != 1 {
                anyhow::bail!("log takes exactly one argument, got {}", args.len());
            }
            if args[0] <= 0.0 {
                anyhow::bail!("log of a non-positive number");
            }
            Ok(args[0].ln())
        }
        "sin" => unary(f64::sin),
        "cos" => unary(f64::cos),
        "tan" => unary(f64::tan),
        "exp" => unary(f64::exp),
        "abs" => unary(f64::abs),
        "round" => unary(f64::round),
        "floor" => unary(f64::floor),
        "ceil" => unary(f64::ceil),
        other => anyhow::bail!("unknown function: {other}"),
    }
}
