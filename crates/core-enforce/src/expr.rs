//! Boolean expression compilation and evaluation for matchers.
//!
//! A matcher expression is compiled once per model definition and
//! evaluated once per candidate rule. Variable references take the form
//! `root.attr` (`r.sub`, `p.obj`, ...) and are resolved through a
//! [`VarResolver`]; deeper paths (`r.obj.price`) descend into map
//! values. Call forms (`keyMatch2(r.obj, p.obj)`, `g(r.sub, p.sub)`)
//! are resolved through a [`FunctionResolver`].
//!
//! ## Grammar
//!
//! ```text
//! expr    ::= or
//! or      ::= and (|| and)*
//! and     ::= cmp (&& cmp)*
//! cmp     ::= unary ((== | != | < | <= | > | >=) unary)?
//! unary   ::= ! unary | primary
//! primary ::= literal | ident (. ident)* | ident ( args ) | ( expr )
//! ```
//!
//! Comparisons require operands of the same type; a mismatch is an
//! evaluation error, not a silent `false`.

use crate::error::{EnforceError, Result};
use crate::functions::Function;
use crate::{MAX_EXPRESSION_DEPTH, MAX_EXPRESSION_LENGTH};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::collections::BTreeSet;
use std::fmt;

/// A dynamically typed expression value.
///
/// Request tuples are slices of `Value`; policy tokens enter the
/// evaluator as `Value::Str`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// UTF-8 string
    Str(String),
    /// Double-precision number
    Num(f64),
    /// Boolean
    Bool(bool),
    /// Attribute map, accessed with dotted paths
    Map(BTreeMap<String, Value>),
}

impl Value {
    /// Type name used in error messages
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Value::Str(_) => "string",
            Value::Num(_) => "number",
            Value::Bool(_) => "bool",
            Value::Map(_) => "map",
        }
    }

    /// Interpret the value as a boolean
    ///
    /// # Errors
    ///
    /// Returns an expression error for non-boolean values; matcher
    /// results never coerce implicitly.
    pub fn as_bool(&self) -> Result<bool> {
        match self {
            Value::Bool(b) => Ok(*b),
            other => Err(EnforceError::expr(format!(
                "expected bool, got {}",
                other.kind()
            ))),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Str(s) => write!(f, "{s}"),
            Value::Num(n) => write!(f, "{n}"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Map(m) => write!(f, "<map[{}]>", m.len()),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Value::Num(n)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Num(n as f64)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Num(f64::from(n))
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(m: BTreeMap<String, Value>) -> Self {
        Value::Map(m)
    }
}

/// Resolves `root.attr` variable references during evaluation
pub(crate) trait VarResolver {
    /// Look up the first two path elements of a variable reference
    fn resolve(&self, root: &str, attr: &str) -> Result<Value>;
}

/// Resolves call forms by name during evaluation
pub(crate) trait FunctionResolver {
    /// Return the callable registered under `name`, if any
    fn lookup(&self, name: &str) -> Option<Function>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BinOp {
    And,
    Or,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl fmt::Display for BinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BinOp::And => "&&",
            BinOp::Or => "||",
            BinOp::Eq => "==",
            BinOp::Ne => "!=",
            BinOp::Lt => "<",
            BinOp::Le => "<=",
            BinOp::Gt => ">",
            BinOp::Ge => ">=",
        };
        write!(f, "{s}")
    }
}

#[derive(Debug, Clone)]
enum Node {
    Lit(Value),
    Var { root: String, path: Vec<String> },
    Call { name: String, args: Vec<Node> },
    Not(Box<Node>),
    Binary { op: BinOp, lhs: Box<Node>, rhs: Box<Node> },
}

/// A compiled boolean expression
#[derive(Debug, Clone)]
pub struct Expression {
    source: String,
    ast: Node,
}

impl Expression {
    /// Compile an expression string
    ///
    /// # Errors
    ///
    /// Returns an expression error on a syntax error or when the input
    /// exceeds [`MAX_EXPRESSION_LENGTH`].
    pub fn parse(input: &str) -> Result<Self> {
        if input.len() > MAX_EXPRESSION_LENGTH {
            return Err(EnforceError::expr(format!(
                "expression exceeds {MAX_EXPRESSION_LENGTH} characters"
            )));
        }
        let tokens = tokenize(input)?;
        let mut parser = Parser::new(&tokens);
        let ast = parser.parse_expr(0)?;
        if parser.current().is_some() {
            return Err(EnforceError::expr("trailing input after expression"));
        }
        Ok(Self {
            source: input.to_string(),
            ast,
        })
    }

    /// The source text this expression was compiled from
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    /// Distinct roots of all variable references (`r`, `p2`, ...)
    pub(crate) fn roots(&self) -> BTreeSet<String> {
        let mut roots = BTreeSet::new();
        collect_roots(&self.ast, &mut roots);
        roots
    }

    /// Evaluate against bound variables and a function table
    pub(crate) fn eval(
        &self,
        vars: &dyn VarResolver,
        funcs: &dyn FunctionResolver,
    ) -> Result<Value> {
        eval_node(&self.ast, vars, funcs)
    }
}

fn collect_roots(node: &Node, out: &mut BTreeSet<String>) {
    match node {
        Node::Lit(_) => {}
        Node::Var { root, .. } => {
            out.insert(root.clone());
        }
        Node::Call { args, .. } => {
            for arg in args {
                collect_roots(arg, out);
            }
        }
        Node::Not(inner) => collect_roots(inner, out),
        Node::Binary { lhs, rhs, .. } => {
            collect_roots(lhs, out);
            collect_roots(rhs, out);
        }
    }
}

fn eval_node(
    node: &Node,
    vars: &dyn VarResolver,
    funcs: &dyn FunctionResolver,
) -> Result<Value> {
    match node {
        Node::Lit(v) => Ok(v.clone()),
        Node::Var { root, path } => {
            let mut iter = path.iter();
            let attr = iter
                .next()
                .ok_or_else(|| EnforceError::expr(format!("undefined symbol `{root}`")))?;
            let mut value = vars.resolve(root, attr)?;
            for part in iter {
                value = match value {
                    Value::Map(mut map) => map.remove(part).ok_or_else(|| {
                        EnforceError::expr(format!("no attribute `{part}` on `{root}.{attr}`"))
                    })?,
                    other => {
                        return Err(EnforceError::expr(format!(
                            "cannot access `{part}` on a {}",
                            other.kind()
                        )))
                    }
                };
            }
            Ok(value)
        }
        Node::Call { name, args } => {
            let func = funcs
                .lookup(name)
                .ok_or_else(|| EnforceError::expr(format!("unknown function `{name}`")))?;
            let mut values = Vec::with_capacity(args.len());
            for arg in args {
                values.push(eval_node(arg, vars, funcs)?);
            }
            (*func)(&values)
        }
        Node::Not(inner) => {
            let v = eval_node(inner, vars, funcs)?.as_bool()?;
            Ok(Value::Bool(!v))
        }
        Node::Binary { op, lhs, rhs } => match op {
            BinOp::And => {
                if !eval_node(lhs, vars, funcs)?.as_bool()? {
                    return Ok(Value::Bool(false));
                }
                Ok(Value::Bool(eval_node(rhs, vars, funcs)?.as_bool()?))
            }
            BinOp::Or => {
                if eval_node(lhs, vars, funcs)?.as_bool()? {
                    return Ok(Value::Bool(true));
                }
                Ok(Value::Bool(eval_node(rhs, vars, funcs)?.as_bool()?))
            }
            _ => {
                let left = eval_node(lhs, vars, funcs)?;
                let right = eval_node(rhs, vars, funcs)?;
                compare(*op, &left, &right)
            }
        },
    }
}

fn compare(op: BinOp, left: &Value, right: &Value) -> Result<Value> {
    let result = match (op, left, right) {
        (BinOp::Eq, l, r) if l.kind() == r.kind() => l == r,
        (BinOp::Ne, l, r) if l.kind() == r.kind() => l != r,
        (BinOp::Lt, Value::Num(l), Value::Num(r)) => l < r,
        (BinOp::Le, Value::Num(l), Value::Num(r)) => l <= r,
        (BinOp::Gt, Value::Num(l), Value::Num(r)) => l > r,
        (BinOp::Ge, Value::Num(l), Value::Num(r)) => l >= r,
        (BinOp::Lt, Value::Str(l), Value::Str(r)) => l < r,
        (BinOp::Le, Value::Str(l), Value::Str(r)) => l <= r,
        (BinOp::Gt, Value::Str(l), Value::Str(r)) => l > r,
        (BinOp::Ge, Value::Str(l), Value::Str(r)) => l >= r,
        (op, l, r) => {
            return Err(EnforceError::expr(format!(
                "cannot apply `{op}` to {} and {}",
                l.kind(),
                r.kind()
            )))
        }
    };
    Ok(Value::Bool(result))
}

// ===== TOKENIZER =====

#[derive(Debug, Clone, PartialEq)]
enum Token {
    AndAnd,
    OrOr,
    Bang,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    LParen,
    RParen,
    Comma,
    Dot,
    Ident(String),
    StrLit(String),
    NumLit(f64),
    BoolLit(bool),
}

fn tokenize(input: &str) -> Result<Vec<Token>> {
    let mut tokens = Vec::new();
    let mut chars = input.chars().peekable();

    while let Some(&ch) = chars.peek() {
        match ch {
            ' ' | '\t' | '\n' | '\r' => {
                chars.next();
            }
            '(' => {
                tokens.push(Token::LParen);
                chars.next();
            }
            ')' => {
                tokens.push(Token::RParen);
                chars.next();
            }
            ',' => {
                tokens.push(Token::Comma);
                chars.next();
            }
            '.' => {
                tokens.push(Token::Dot);
                chars.next();
            }
            '&' => {
                chars.next();
                if chars.peek() == Some(&'&') {
                    chars.next();
                    tokens.push(Token::AndAnd);
                } else {
                    return Err(EnforceError::expr("single '&' not allowed, use '&&'"));
                }
            }
            '|' => {
                chars.next();
                if chars.peek() == Some(&'|') {
                    chars.next();
                    tokens.push(Token::OrOr);
                } else {
                    return Err(EnforceError::expr("single '|' not allowed, use '||'"));
                }
            }
            '=' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Eq);
                } else {
                    return Err(EnforceError::expr("single '=' not allowed, use '=='"));
                }
            }
            '!' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Ne);
                } else {
                    tokens.push(Token::Bang);
                }
            }
            '<' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Le);
                } else {
                    tokens.push(Token::Lt);
                }
            }
            '>' => {
                chars.next();
                if chars.peek() == Some(&'=') {
                    chars.next();
                    tokens.push(Token::Ge);
                } else {
                    tokens.push(Token::Gt);
                }
            }
            quote @ ('"' | '\'') => {
                chars.next();
                let mut value = String::new();
                let mut escaped = false;
                loop {
                    match chars.next() {
                        Some('\\') if !escaped => escaped = true,
                        Some(c) if c == quote && !escaped => break,
                        Some(c) => {
                            value.push(c);
                            escaped = false;
                        }
                        None => {
                            return Err(EnforceError::expr("unterminated string literal"))
                        }
                    }
                }
                tokens.push(Token::StrLit(value));
            }
            c if c.is_ascii_digit() => {
                let mut num = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_ascii_digit() || ch == '.' {
                        num.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let parsed = num
                    .parse::<f64>()
                    .map_err(|_| EnforceError::expr(format!("invalid number `{num}`")))?;
                tokens.push(Token::NumLit(parsed));
            }
            c if c.is_alphabetic() || c == '_' => {
                let mut ident = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_alphanumeric() || ch == '_' {
                        ident.push(ch);
                        chars.next();
                    } else {
                        break;
                    }
                }
                let token = match ident.as_str() {
                    "true" => Token::BoolLit(true),
                    "false" => Token::BoolLit(false),
                    _ => Token::Ident(ident),
                };
                tokens.push(token);
            }
            _ => {
                return Err(EnforceError::expr(format!("unexpected character '{ch}'")));
            }
        }
    }

    Ok(tokens)
}

// ===== PARSER =====

struct Parser<'a> {
    tokens: &'a [Token],
    pos: usize,
}

impl<'a> Parser<'a> {
    fn new(tokens: &'a [Token]) -> Self {
        Self { tokens, pos: 0 }
    }

    fn current(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn advance(&mut self) -> Option<&Token> {
        let token = self.tokens.get(self.pos);
        self.pos += 1;
        token
    }

    fn expect(&mut self, expected: &Token) -> Result<()> {
        match self.advance() {
            Some(token) if token == expected => Ok(()),
            Some(token) => Err(EnforceError::expr(format!(
                "expected {expected:?}, got {token:?}"
            ))),
            None => Err(EnforceError::expr(format!("expected {expected:?}, got EOF"))),
        }
    }

    fn parse_expr(&mut self, depth: usize) -> Result<Node> {
        if depth > MAX_EXPRESSION_DEPTH {
            return Err(EnforceError::expr(format!(
                "expression exceeds depth {MAX_EXPRESSION_DEPTH}"
            )));
        }
        self.parse_or(depth)
    }

    fn parse_or(&mut self, depth: usize) -> Result<Node> {
        let mut left = self.parse_and(depth)?;
        while matches!(self.current(), Some(Token::OrOr)) {
            self.advance();
            let right = self.parse_and(depth)?;
            left = Node::Binary {
                op: BinOp::Or,
                lhs: Box::new(left),
                rhs: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_and(&mut self, depth: usize) -> Result<Node> {
        let mut left = self.parse_cmp(depth)?;
        while matches!(self.current(), Some(Token::AndAnd)) {
            self.advance();
            let right = self.parse_cmp(depth)?;
            left = Node::Binary {
                op: BinOp::And,
                lhs: Box::new(left),
                rhs: Box::new(right),
            };
        }
        Ok(left)
    }

    fn parse_cmp(&mut self, depth: usize) -> Result<Node> {
        let left = self.parse_unary(depth)?;
        let op = match self.current() {
            Some(Token::Eq) => BinOp::Eq,
            Some(Token::Ne) => BinOp::Ne,
            Some(Token::Lt) => BinOp::Lt,
            Some(Token::Le) => BinOp::Le,
            Some(Token::Gt) => BinOp::Gt,
            Some(Token::Ge) => BinOp::Ge,
            _ => return Ok(left),
        };
        self.advance();
        let right = self.parse_unary(depth)?;
        Ok(Node::Binary {
            op,
            lhs: Box::new(left),
            rhs: Box::new(right),
        })
    }

    fn parse_unary(&mut self, depth: usize) -> Result<Node> {
        if depth > MAX_EXPRESSION_DEPTH {
            return Err(EnforceError::expr(format!(
                "expression exceeds depth {MAX_EXPRESSION_DEPTH}"
            )));
        }
        if matches!(self.current(), Some(Token::Bang)) {
            self.advance();
            let inner = self.parse_unary(depth + 1)?;
            return Ok(Node::Not(Box::new(inner)));
        }
        self.parse_primary(depth)
    }

    fn parse_primary(&mut self, depth: usize) -> Result<Node> {
        match self.advance() {
            Some(Token::BoolLit(b)) => Ok(Node::Lit(Value::Bool(*b))),
            Some(Token::NumLit(n)) => Ok(Node::Lit(Value::Num(*n))),
            Some(Token::StrLit(s)) => Ok(Node::Lit(Value::Str(s.clone()))),
            Some(Token::LParen) => {
                let inner = self.parse_expr(depth + 1)?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Some(Token::Ident(name)) => {
                let name = name.clone();
                if matches!(self.current(), Some(Token::LParen)) {
                    self.advance();
                    let args = self.parse_args(depth + 1)?;
                    return Ok(Node::Call { name, args });
                }
                let mut path = Vec::new();
                while matches!(self.current(), Some(Token::Dot)) {
                    self.advance();
                    match self.advance() {
                        Some(Token::Ident(part)) => path.push(part.clone()),
                        other => {
                            return Err(EnforceError::expr(format!(
                                "expected attribute name after '.', got {other:?}"
                            )))
                        }
                    }
                }
                Ok(Node::Var { root: name, path })
            }
            other => Err(EnforceError::expr(format!(
                "expected expression, got {other:?}"
            ))),
        }
    }

    fn parse_args(&mut self, depth: usize) -> Result<Vec<Node>> {
        let mut args = Vec::new();
        if matches!(self.current(), Some(Token::RParen)) {
            self.advance();
            return Ok(args);
        }
        loop {
            args.push(self.parse_expr(depth)?);
            match self.advance() {
                Some(Token::Comma) => continue,
                Some(Token::RParen) => break,
                other => {
                    return Err(EnforceError::expr(format!(
                        "expected ',' or ')' in argument list, got {other:?}"
                    )))
                }
            }
        }
        Ok(args)
    }
}
