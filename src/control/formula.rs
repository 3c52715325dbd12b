//! Restricted arithmetic expressions for the expected water temperature
//!
//! Supported syntax: decimal numbers, variables (`outerAvg`,
//! `config.referenceInnerT`), `+ - * / % ^`, unary `+`/`-`, parentheses and
//! the functions `min`, `max`, `abs`, `round`, `floor`, `ceil`. `^` binds
//! tighter than unary minus and is right-associative, so `-2^2` is `-4`.
//!
//! Nothing else is reachable from a formula: variables resolve only against
//! the [`Scope`] built for the cycle.

use crate::config::ControllerConfig;
use crate::control::tokens::TokenSet;
use crate::error::{BoilerError, Result};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

const MAX_DEPTH: usize = 64;
const MAX_TOKENS: usize = 1024;

/// Variables visible to a formula
#[derive(Debug, Clone, Default)]
pub struct Scope {
    vars: HashMap<String, f64>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scope of one control cycle: the token set plus `config.*` fields
    pub fn for_cycle(tokens: &TokenSet, config: &ControllerConfig) -> Self {
        let mut scope = Self::new();
        for (name, value) in tokens.iter() {
            scope.set(name, value);
        }
        for (name, value) in config.formula_fields() {
            scope.set(format!("config.{name}"), value);
        }
        scope
    }

    pub fn set<S: Into<String>>(&mut self, name: S, value: f64) {
        self.vars.insert(name.into(), value);
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.vars.get(name).copied()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Pow,
}

#[derive(Debug, Clone, PartialEq)]
enum Expr {
    Number(f64),
    Variable(String),
    Negate(Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Number(f64),
    Ident(String),
    Op(char),
    LParen,
    RParen,
    Comma,
    End,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Number(n) => write!(f, "number {n}"),
            Token::Ident(name) => write!(f, "'{name}'"),
            Token::Op(op) => write!(f, "'{op}'"),
            Token::LParen => f.write_str("'('"),
            Token::RParen => f.write_str("')'"),
            Token::Comma => f.write_str("','"),
            Token::End => f.write_str("end of formula"),
        }
    }
}

fn tokenize(source: &str) -> Result<Vec<(usize, Token)>> {
    let chars: Vec<char> = source.chars().collect();
    let mut tokens = Vec::new();
    let mut pos = 0;

    while pos < chars.len() {
        let c = chars[pos];
        let start = pos;

        if c.is_whitespace() {
            pos += 1;
            continue;
        }

        if c.is_ascii_digit() || (c == '.' && chars.get(pos + 1).is_some_and(|d| d.is_ascii_digit())) {
            while pos < chars.len() && (chars[pos].is_ascii_digit() || chars[pos] == '.') {
                pos += 1;
            }
            if pos < chars.len() && (chars[pos] == 'e' || chars[pos] == 'E') {
                let mut look = pos + 1;
                if look < chars.len() && (chars[look] == '+' || chars[look] == '-') {
                    look += 1;
                }
                if look < chars.len() && chars[look].is_ascii_digit() {
                    pos = look;
                    while pos < chars.len() && chars[pos].is_ascii_digit() {
                        pos += 1;
                    }
                }
            }
            let text: String = chars[start..pos].iter().collect();
            let value = text.parse::<f64>().map_err(|_| {
                BoilerError::formula(format!("invalid number '{text}' at position {start}"))
            })?;
            tokens.push((start, Token::Number(value)));
            continue;
        }

        if c.is_ascii_alphabetic() || c == '_' {
            loop {
                while pos < chars.len() && (chars[pos].is_ascii_alphanumeric() || chars[pos] == '_') {
                    pos += 1;
                }
                let dotted = pos + 1 < chars.len()
                    && chars[pos] == '.'
                    && (chars[pos + 1].is_ascii_alphabetic() || chars[pos + 1] == '_');
                if !dotted {
                    break;
                }
                pos += 1;
            }
            tokens.push((start, Token::Ident(chars[start..pos].iter().collect())));
            continue;
        }

        let token = match c {
            '+' | '-' | '*' | '/' | '%' | '^' => Token::Op(c),
            '(' => Token::LParen,
            ')' => Token::RParen,
            ',' => Token::Comma,
            _ => {
                return Err(BoilerError::formula(format!(
                    "unexpected character '{c}' at position {start}"
                )))
            }
        };
        tokens.push((start, token));
        pos += 1;
    }

    // Bounds the length of left-leaning operator chains, which the parser
    // builds in a loop but `eval` walks recursively.
    if tokens.len() > MAX_TOKENS {
        return Err(BoilerError::formula(format!(
            "formula is too long ({} tokens, at most {MAX_TOKENS})",
            tokens.len()
        )));
    }

    tokens.push((chars.len(), Token::End));
    Ok(tokens)
}

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    depth: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].1
    }

    fn position(&self) -> usize {
        self.tokens[self.pos.min(self.tokens.len() - 1)].0
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn unexpected(&self) -> BoilerError {
        BoilerError::formula(format!(
            "unexpected {} at position {}",
            self.peek(),
            self.position()
        ))
    }

    fn expect(&mut self, expected: Token) -> Result<()> {
        if *self.peek() == expected {
            self.advance();
            Ok(())
        } else {
            Err(BoilerError::formula(format!(
                "expected {expected} but found {} at position {}",
                self.peek(),
                self.position()
            )))
        }
    }

    fn enter(&mut self) -> Result<()> {
        self.depth += 1;
        if self.depth > MAX_DEPTH {
            return Err(BoilerError::formula("formula is nested too deeply"));
        }
        Ok(())
    }

    fn expression(&mut self) -> Result<Expr> {
        self.enter()?;
        let mut lhs = self.term()?;
        loop {
            let op = match self.peek() {
                Token::Op('+') => BinaryOp::Add,
                Token::Op('-') => BinaryOp::Sub,
                _ => break,
            };
            self.advance();
            let rhs = self.term()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        self.depth -= 1;
        Ok(lhs)
    }

    fn term(&mut self) -> Result<Expr> {
        let mut lhs = self.unary()?;
        loop {
            let op = match self.peek() {
                Token::Op('*') => BinaryOp::Mul,
                Token::Op('/') => BinaryOp::Div,
                Token::Op('%') => BinaryOp::Rem,
                _ => break,
            };
            self.advance();
            let rhs = self.unary()?;
            lhs = Expr::Binary(op, Box::new(lhs), Box::new(rhs));
        }
        Ok(lhs)
    }

    fn unary(&mut self) -> Result<Expr> {
        match self.peek() {
            Token::Op('-') => {
                self.advance();
                self.enter()?;
                let operand = self.unary()?;
                self.depth -= 1;
                Ok(Expr::Negate(Box::new(operand)))
            }
            Token::Op('+') => {
                self.advance();
                self.enter()?;
                let operand = self.unary()?;
                self.depth -= 1;
                Ok(operand)
            }
            _ => self.power(),
        }
    }

    fn power(&mut self) -> Result<Expr> {
        let base = self.primary()?;
        if *self.peek() == Token::Op('^') {
            self.advance();
            self.enter()?;
            let exponent = self.unary()?;
            self.depth -= 1;
            return Ok(Expr::Binary(BinaryOp::Pow, Box::new(base), Box::new(exponent)));
        }
        Ok(base)
    }

    fn primary(&mut self) -> Result<Expr> {
        if matches!(self.peek(), Token::Op(_) | Token::RParen | Token::Comma | Token::End) {
            return Err(self.unexpected());
        }

        match self.advance() {
            Token::Number(value) => Ok(Expr::Number(value)),
            Token::Ident(name) => {
                if *self.peek() != Token::LParen {
                    return Ok(Expr::Variable(name));
                }
                self.advance();
                let mut args = Vec::new();
                if *self.peek() != Token::RParen {
                    args.push(self.expression()?);
                    while *self.peek() == Token::Comma {
                        self.advance();
                        args.push(self.expression()?);
                    }
                }
                self.expect(Token::RParen)?;
                Ok(Expr::Call(name, args))
            }
            Token::LParen => {
                let inner = self.expression()?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            _ => Err(self.unexpected()),
        }
    }
}

fn call(name: &str, args: &[f64]) -> Result<f64> {
    let unary = |f: fn(f64) -> f64| -> Result<f64> {
        match args {
            [x] => Ok(f(*x)),
            _ => Err(BoilerError::formula(format!(
                "{name}() takes 1 argument, got {}",
                args.len()
            ))),
        }
    };

    match name {
        "abs" => unary(f64::abs),
        "round" => unary(f64::round),
        "floor" => unary(f64::floor),
        "ceil" => unary(f64::ceil),
        "min" | "max" => {
            if args.is_empty() {
                return Err(BoilerError::formula(format!(
                    "{name}() needs at least one argument"
                )));
            }
            let fold: fn(f64, f64) -> f64 = if name == "min" { f64::min } else { f64::max };
            Ok(args[1..].iter().fold(args[0], |acc, v| fold(acc, *v)))
        }
        _ => Err(BoilerError::formula(format!("unknown function '{name}'"))),
    }
}

fn eval(expr: &Expr, scope: &Scope) -> Result<f64> {
    match expr {
        Expr::Number(value) => Ok(*value),
        Expr::Variable(name) => scope
            .get(name)
            .ok_or_else(|| BoilerError::formula(format!("undefined symbol '{name}'"))),
        Expr::Negate(operand) => Ok(-eval(operand, scope)?),
        Expr::Binary(op, lhs, rhs) => {
            let (a, b) = (eval(lhs, scope)?, eval(rhs, scope)?);
            Ok(match op {
                BinaryOp::Add => a + b,
                BinaryOp::Sub => a - b,
                BinaryOp::Mul => a * b,
                BinaryOp::Div => a / b,
                BinaryOp::Rem => a % b,
                BinaryOp::Pow => a.powf(b),
            })
        }
        Expr::Call(name, args) => {
            let values = args
                .iter()
                .map(|arg| eval(arg, scope))
                .collect::<Result<Vec<_>>>()?;
            call(name, &values)
        }
    }
}

fn collect_variables<'a>(expr: &'a Expr, out: &mut BTreeSet<&'a str>) {
    match expr {
        Expr::Number(_) => {}
        Expr::Variable(name) => {
            out.insert(name.as_str());
        }
        Expr::Negate(operand) => collect_variables(operand, out),
        Expr::Binary(_, lhs, rhs) => {
            collect_variables(lhs, out);
            collect_variables(rhs, out);
        }
        Expr::Call(_, args) => args.iter().for_each(|arg| collect_variables(arg, out)),
    }
}

/// A parsed expected-temperature formula
#[derive(Debug, Clone, PartialEq)]
pub struct Formula {
    source: String,
    expr: Expr,
}

impl Formula {
    /// Parse a formula; syntax errors are reported with their position
    pub fn parse(source: &str) -> Result<Self> {
        let mut parser = Parser {
            tokens: tokenize(source)?,
            pos: 0,
            depth: 0,
        };

        if *parser.peek() == Token::End {
            return Err(BoilerError::formula("formula is empty"));
        }

        let expr = parser.expression()?;
        if *parser.peek() != Token::End {
            return Err(parser.unexpected());
        }

        Ok(Self {
            source: source.to_string(),
            expr,
        })
    }

    /// Evaluate against a scope; the result must be a finite number
    pub fn evaluate(&self, scope: &Scope) -> Result<f64> {
        let value = eval(&self.expr, scope)?;
        if !value.is_finite() {
            return Err(BoilerError::formula(format!(
                "'{}' evaluated to {value}",
                self.source
            )));
        }
        Ok(value)
    }

    /// Names of all variables the formula references
    pub fn variables(&self) -> BTreeSet<&str> {
        let mut out = BTreeSet::new();
        collect_variables(&self.expr, &mut out);
        out
    }

    pub fn source(&self) -> &str {
        &self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_FORMULA;
    use rstest::rstest;

    fn eval_str(source: &str, scope: &Scope) -> Result<f64> {
        Formula::parse(source)?.evaluate(scope)
    }

    #[rstest]
    #[case("1 + 2 * 3", 7.0)]
    #[case("(1 + 2) * 3", 9.0)]
    #[case("10 / 4", 2.5)]
    #[case("7 % 4", 3.0)]
    #[case("2 ^ 3 ^ 2", 512.0)]
    #[case("-2 ^ 2", -4.0)]
    #[case("2 ^ -1", 0.5)]
    #[case("--3", 3.0)]
    #[case("+4 - -1", 5.0)]
    #[case(".5 + 1.5e1", 15.5)]
    #[case("max(1, 7, 3) - min(4, 2)", 5.0)]
    #[case("abs(-3) + round(2.6) + floor(1.9) + ceil(0.1)", 8.0)]
    fn test_arithmetic(#[case] source: &str, #[case] expected: f64) {
        assert_eq!(eval_str(source, &Scope::new()).unwrap(), expected);
    }

    #[test]
    fn test_default_formula_with_config_scope() {
        let mut scope = Scope::new();
        scope.set("outerAvg", -4.0);
        scope.set("innerAvg", 19.0);
        scope.set("config.referenceInnerT", 20.0);

        // -0.5 * -4 + 37 + (20 - 19) * 1.5
        assert_eq!(eval_str(DEFAULT_FORMULA, &scope).unwrap(), 40.5);
    }

    #[test]
    fn test_scope_for_cycle_exposes_tokens_and_whitelisted_fields() {
        let config = ControllerConfig::default();
        let tokens = TokenSet::default();
        let scope = Scope::for_cycle(&tokens, &config);

        assert_eq!(scope.get("config.referenceInnerT"), Some(20.0));
        assert_eq!(scope.get("config.maximumAllowedWaterT"), Some(70.0));
        assert_eq!(scope.get("config.readIntervalS"), None);
    }

    #[test]
    fn test_variables_lists_references() {
        let formula = Formula::parse(DEFAULT_FORMULA).unwrap();
        let vars: Vec<_> = formula.variables().into_iter().collect();
        assert_eq!(vars, vec!["config.referenceInnerT", "innerAvg", "outerAvg"]);
    }

    #[rstest]
    #[case("")]
    #[case("1 +")]
    #[case("(1 + 2")]
    #[case("1 2")]
    #[case("3 $ 4")]
    #[case("max(1,)")]
    #[case("config.")]
    fn test_malformed_formulas_fail_to_parse(#[case] source: &str) {
        assert!(matches!(
            Formula::parse(source),
            Err(BoilerError::FormulaEvaluation(_))
        ));
    }

    #[test]
    fn test_undefined_variable_never_defaults_to_zero() {
        let err = eval_str("waterAvg + 1", &Scope::new()).unwrap_err();
        assert!(err.to_string().contains("undefined symbol 'waterAvg'"));
    }

    #[test]
    fn test_non_finite_result_is_rejected() {
        assert!(eval_str("1 / 0", &Scope::new()).is_err());
        assert!(eval_str("0 / 0", &Scope::new()).is_err());
    }

    #[test]
    fn test_unknown_function_and_arity() {
        assert!(eval_str("exec(1)", &Scope::new()).is_err());
        assert!(eval_str("abs(1, 2)", &Scope::new()).is_err());
        assert!(eval_str("min()", &Scope::new()).is_err());
    }

    #[test]
    fn test_nesting_is_bounded() {
        let deep = format!("{}1{}", "(".repeat(200), ")".repeat(200));
        assert!(Formula::parse(&deep).is_err());

        let shallow = format!("{}1{}", "(".repeat(20), ")".repeat(20));
        assert_eq!(eval_str(&shallow, &Scope::new()).unwrap(), 1.0);
    }

    #[test]
    fn test_repeated_unary_plus_is_bounded() {
        let deep = format!("{}1", "+".repeat(200_000));
        assert!(matches!(
            Formula::parse(&deep),
            Err(BoilerError::FormulaEvaluation(_))
        ));

        let deep_mixed = format!("{}1", "+-".repeat(100));
        assert!(Formula::parse(&deep_mixed).is_err());

        assert_eq!(eval_str("++-+2", &Scope::new()).unwrap(), -2.0);
    }

    #[test]
    fn test_long_operator_chains_are_rejected() {
        let long = format!("1{}", "+1".repeat(200_000));
        let err = Formula::parse(&long).unwrap_err();
        assert!(err.to_string().contains("too long"));

        let within = format!("1{}", "+1".repeat(500));
        assert_eq!(eval_str(&within, &Scope::new()).unwrap(), 501.0);
    }
}
