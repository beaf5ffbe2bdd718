//! Boolean expression language used by criteria.
//!
//! Grammar, lowest precedence first:
//!
//! ```text
//! or      := and ( "||" and )*
//! and     := compare ( "&&" compare )*
//! compare := sum ( ( "==" | "!=" | "<" | "<=" | ">" | ">=" ) sum )?
//! sum     := unary ( "+" unary )*
//! unary   := "!" unary | primary
//! primary := string | number | "true" | "false" | path | "in" "(" or ( "," or )* ")" | "(" or ")"
//! ```
//!
//! Label values are strings; comparisons are numeric when both sides parse as
//! numbers. Unknown identifiers evaluate to null.

use std::cmp::Ordering;
use std::fmt;

use super::{Param, Params};
use crate::error::{Error, Result};

/// Runtime value produced while evaluating an expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Bool(bool),
    Num(f64),
    Str(String),
}

impl Value {
    fn as_num(&self) -> Option<f64> {
        match self {
            Value::Num(n) => Some(*n),
            Value::Str(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    fn as_text(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Bool(b) => b.to_string(),
            Value::Num(n) => n.to_string(),
            Value::Str(s) => s.clone(),
        }
    }

    fn loose_eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Null, _) | (_, Value::Null) => false,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            _ => match (self.as_num(), other.as_num()) {
                (Some(a), Some(b)) => a == b,
                _ => self.as_text() == other.as_text(),
            },
        }
    }

    fn compare(&self, other: &Value) -> std::result::Result<Option<Ordering>, String> {
        if matches!(self, Value::Null) || matches!(other, Value::Null) {
            return Ok(None);
        }
        if let (Some(a), Some(b)) = (self.as_num(), other.as_num()) {
            return Ok(a.partial_cmp(&b));
        }
        match (self, other) {
            (Value::Str(a), Value::Str(b)) => Ok(Some(a.cmp(b))),
            _ => Err(format!("cannot compare {} with {}", self, other)),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Num(n) => write!(f, "{n}"),
            Value::Str(s) => write!(f, "'{s}'"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CompareOp {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
}

#[derive(Debug, Clone, PartialEq)]
enum Node {
    Literal(Value),
    Path(Vec<String>),
    Not(Box<Node>),
    And(Box<Node>, Box<Node>),
    Or(Box<Node>, Box<Node>),
    Compare(CompareOp, Box<Node>, Box<Node>),
    Add(Box<Node>, Box<Node>),
    In(Box<Node>, Vec<Node>),
}

/// A compiled expression.
#[derive(Debug, Clone, PartialEq)]
pub struct Expression {
    text: String,
    root: Node,
}

impl Expression {
    pub fn parse(text: &str) -> Result<Self> {
        let tokens = tokenize(text).map_err(|message| expression_error(text, message))?;
        let mut parser = Parser { tokens, pos: 0 };
        let root = parser
            .parse_or()
            .map_err(|message| expression_error(text, message))?;
        if let Some(token) = parser.peek() {
            return Err(expression_error(
                text,
                format!("unexpected token '{}'", token),
            ));
        }
        Ok(Self {
            text: text.to_string(),
            root,
        })
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn evaluate(&self, params: &Params) -> Result<Value> {
        eval(&self.root, params).map_err(|message| expression_error(&self.text, message))
    }

    /// Evaluate and require a boolean result.
    pub fn evaluate_bool(&self, params: &Params) -> Result<bool> {
        match self.evaluate(params)? {
            Value::Bool(b) => Ok(b),
            other => Err(expression_error(
                &self.text,
                format!("expected a boolean result, got {}", other),
            )),
        }
    }
}

fn expression_error(text: &str, message: impl Into<String>) -> Error {
    Error::Expression {
        expression: text.to_string(),
        message: message.into(),
    }
}

// ---------------------------------------------------------------------------
// Tokenizer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Ident(String),
    Str(String),
    Num(f64),
    Op(&'static str),
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Ident(s) => write!(f, "{s}"),
            Token::Str(s) => write!(f, "'{s}'"),
            Token::Num(n) => write!(f, "{n}"),
            Token::Op(op) => write!(f, "{op}"),
        }
    }
}

const OPERATORS: &[&str] = &[
    "==", "!=", "<=", ">=", "&&", "||", "<", ">", "!", "+", "(", ")", ",",
];

fn tokenize(input: &str) -> std::result::Result<Vec<Token>, String> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_whitespace() {
            i += 1;
            continue;
        }

        if c == '\'' || c == '"' {
            let quote = c;
            let start = i + 1;
            let mut end = start;
            while end < chars.len() && chars[end] != quote {
                end += 1;
            }
            if end >= chars.len() {
                return Err("unterminated string literal".to_string());
            }
            tokens.push(Token::Str(chars[start..end].iter().collect()));
            i = end + 1;
            continue;
        }

        if c.is_ascii_digit() {
            let start = i;
            while i < chars.len() && (chars[i].is_ascii_digit() || chars[i] == '.') {
                i += 1;
            }
            let literal: String = chars[start..i].iter().collect();
            let number = literal
                .parse::<f64>()
                .map_err(|_| format!("invalid number '{}'", literal))?;
            tokens.push(Token::Num(number));
            continue;
        }

        if c.is_alphabetic() || c == '_' {
            let start = i;
            while i < chars.len()
                && (chars[i].is_alphanumeric() || matches!(chars[i], '_' | '.' | '-'))
            {
                i += 1;
            }
            tokens.push(Token::Ident(chars[start..i].iter().collect()));
            continue;
        }

        let rest: String = chars[i..chars.len().min(i + 2)].iter().collect();
        match OPERATORS.iter().find(|op| rest.starts_with(**op)) {
            Some(op) => {
                tokens.push(Token::Op(*op));
                i += op.len();
            }
            None => return Err(format!("unexpected character '{}'", c)),
        }
    }

    Ok(tokens)
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser {
    tokens: Vec<Token>,
    pos: usize,
}

type ParseResult = std::result::Result<Node, String>;

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        self.pos += 1;
        token
    }

    fn eat(&mut self, op: &str) -> bool {
        if matches!(self.peek(), Some(Token::Op(o)) if *o == op) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, op: &str) -> std::result::Result<(), String> {
        if self.eat(op) {
            Ok(())
        } else {
            match self.peek() {
                Some(token) => Err(format!("expected '{}', found '{}'", op, token)),
                None => Err(format!("expected '{}', found end of expression", op)),
            }
        }
    }

    fn parse_or(&mut self) -> ParseResult {
        let mut left = self.parse_and()?;
        while self.eat("||") {
            let right = self.parse_and()?;
            left = Node::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> ParseResult {
        let mut left = self.parse_compare()?;
        while self.eat("&&") {
            let right = self.parse_compare()?;
            left = Node::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_compare(&mut self) -> ParseResult {
        let left = self.parse_sum()?;
        let op = match self.peek() {
            Some(Token::Op("==")) => CompareOp::Eq,
            Some(Token::Op("!=")) => CompareOp::NotEq,
            Some(Token::Op("<")) => CompareOp::Lt,
            Some(Token::Op("<=")) => CompareOp::LtEq,
            Some(Token::Op(">")) => CompareOp::Gt,
            Some(Token::Op(">=")) => CompareOp::GtEq,
            _ => return Ok(left),
        };
        self.pos += 1;
        let right = self.parse_sum()?;
        Ok(Node::Compare(op, Box::new(left), Box::new(right)))
    }

    fn parse_sum(&mut self) -> ParseResult {
        let mut left = self.parse_unary()?;
        while self.eat("+") {
            let right = self.parse_unary()?;
            left = Node::Add(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> ParseResult {
        if self.eat("!") {
            let inner = self.parse_unary()?;
            return Ok(Node::Not(Box::new(inner)));
        }
        self.parse_primary()
    }

    fn parse_primary(&mut self) -> ParseResult {
        match self.next() {
            Some(Token::Str(s)) => Ok(Node::Literal(Value::Str(s))),
            Some(Token::Num(n)) => Ok(Node::Literal(Value::Num(n))),
            Some(Token::Ident(name)) => match name.as_str() {
                "true" => Ok(Node::Literal(Value::Bool(true))),
                "false" => Ok(Node::Literal(Value::Bool(false))),
                "in" if matches!(self.peek(), Some(Token::Op("("))) => self.parse_in(),
                _ => {
                    let segments: Vec<String> = name.split('.').map(str::to_string).collect();
                    if segments.iter().any(|s| s.is_empty()) {
                        return Err(format!("invalid identifier '{}'", name));
                    }
                    Ok(Node::Path(segments))
                }
            },
            Some(Token::Op("(")) => {
                let inner = self.parse_or()?;
                self.expect(")")?;
                Ok(inner)
            }
            Some(token) => Err(format!("unexpected token '{}'", token)),
            None => Err("unexpected end of expression".to_string()),
        }
    }

    fn parse_in(&mut self) -> ParseResult {
        self.expect("(")?;
        let needle = self.parse_or()?;
        let mut candidates = Vec::new();
        while self.eat(",") {
            candidates.push(self.parse_or()?);
        }
        self.expect(")")?;
        if candidates.is_empty() {
            return Err("in() needs at least one candidate".to_string());
        }
        Ok(Node::In(Box::new(needle), candidates))
    }
}

// ---------------------------------------------------------------------------
// Evaluation
// ---------------------------------------------------------------------------

fn eval(node: &Node, params: &Params) -> std::result::Result<Value, String> {
    match node {
        Node::Literal(value) => Ok(value.clone()),
        Node::Path(path) => match params.lookup(path.as_slice()) {
            None => Ok(Value::Null),
            Some(Param::Str(s)) => Ok(Value::Str(s.clone())),
            Some(Param::Map(_)) => Err(format!("'{}' is an object, not a value", path.join("."))),
        },
        Node::Not(inner) => match eval(inner, params)? {
            Value::Bool(b) => Ok(Value::Bool(!b)),
            other => Err(format!("operator '!' expects a boolean, got {}", other)),
        },
        Node::And(left, right) => {
            if !eval_bool(left, params, "&&")? {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(eval_bool(right, params, "&&")?))
        }
        Node::Or(left, right) => {
            if eval_bool(left, params, "||")? {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(eval_bool(right, params, "||")?))
        }
        Node::Compare(op, left, right) => {
            let a = eval(left, params)?;
            let b = eval(right, params)?;
            let result = match op {
                CompareOp::Eq => a.loose_eq(&b),
                CompareOp::NotEq => !a.loose_eq(&b),
                CompareOp::Lt => a.compare(&b)? == Some(Ordering::Less),
                CompareOp::LtEq => matches!(a.compare(&b)?, Some(Ordering::Less | Ordering::Equal)),
                CompareOp::Gt => a.compare(&b)? == Some(Ordering::Greater),
                CompareOp::GtEq => {
                    matches!(a.compare(&b)?, Some(Ordering::Greater | Ordering::Equal))
                }
            };
            Ok(Value::Bool(result))
        }
        Node::Add(left, right) => {
            let a = eval(left, params)?;
            let b = eval(right, params)?;
            match (&a, &b) {
                (Value::Null, _) | (_, Value::Null) => {
                    Err("operator '+' applied to an undefined value".to_string())
                }
                (Value::Num(x), Value::Num(y)) => Ok(Value::Num(x + y)),
                _ => Ok(Value::Str(format!("{}{}", a.as_text(), b.as_text()))),
            }
        }
        Node::In(needle, candidates) => {
            let value = eval(needle, params)?;
            for candidate in candidates {
                if value.loose_eq(&eval(candidate, params)?) {
                    return Ok(Value::Bool(true));
                }
            }
            Ok(Value::Bool(false))
        }
    }
}

fn eval_bool(node: &Node, params: &Params, op: &str) -> std::result::Result<bool, String> {
    match eval(node, params)? {
        Value::Bool(b) => Ok(b),
        other => Err(format!("operator '{}' expects booleans, got {}", op, other)),
    }
}
