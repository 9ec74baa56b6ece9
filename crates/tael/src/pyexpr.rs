// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! The Python-flavoured expression sub-language.
//!
//! This is the payload language of `python:` expressions (and the
//! default when no prefix is written). It covers literals, names,
//! attribute access with item fallback, subscripts, calls, the usual
//! operators at Python precedence and the conditional expression.
//!
//! The module has three parts:
//!
//! 1. A lexer and a Pratt-style parser producing [`PyExpr`].
//! 2. An evaluator over [`Value`] with the typed failure set the pipe
//!    operator relies on (attribute, lookup, type, name errors).
//! 3. A statement-line parser for `<?python ... ?>` code blocks
//!    (simple `name = expr` assignments).
//!
//! The AST is serde-serializable so compiled programs can persist to
//! the disk cache.

use crate::error::{EvalError, Result, TalError};
use crate::value::{
    compare_values, get_attr_with_item_fallback, get_item, values_equal, Value, ValueMap,
};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Resolves bare names during evaluation.
///
/// Implemented by the render scope; the evaluator raises a name error
/// for anything the resolver does not know.
pub trait NameResolver {
    /// Looks up a name, outermost-shadowing layer first.
    fn resolve_name(&self, name: &str) -> Option<Value>;
}

/// Binary arithmetic and sequence operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BinOp {
    /// `+`
    Add,
    /// `-`
    Sub,
    /// `*`
    Mul,
    /// `/`
    Div,
    /// `//`
    FloorDiv,
    /// `%`
    Mod,
}

/// Comparison operators, including membership.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CmpOp {
    /// `==`
    Eq,
    /// `!=`
    Ne,
    /// `<`
    Lt,
    /// `<=`
    Le,
    /// `>`
    Gt,
    /// `>=`
    Ge,
    /// `in`
    In,
    /// `not in`
    NotIn,
}

/// Unary operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum UnaryOp {
    /// `-`
    Neg,
    /// `+`
    Pos,
    /// `not`
    Not,
}

/// A parsed expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PyExpr {
    /// Integer literal.
    Int(i64),
    /// Float literal.
    Float(f64),
    /// String literal.
    Str(String),
    /// `True` / `False`.
    Bool(bool),
    /// `None`.
    None,
    /// A bare name.
    Name(String),
    /// `[a, b]`
    List(Vec<PyExpr>),
    /// `(a, b)`
    Tuple(Vec<PyExpr>),
    /// `{k: v}`
    Dict(Vec<(PyExpr, PyExpr)>),
    /// `value.attr` with item fallback.
    Attr(Box<PyExpr>, String),
    /// `value[key]`
    Index(Box<PyExpr>, Box<PyExpr>),
    /// `func(args...)`
    Call(Box<PyExpr>, Vec<PyExpr>),
    /// Unary operation.
    Unary(UnaryOp, Box<PyExpr>),
    /// Binary arithmetic operation.
    Binary(BinOp, Box<PyExpr>, Box<PyExpr>),
    /// `a and b and c` / `a or b or c`, short-circuiting.
    BoolChain {
        /// True for `and`, false for `or`.
        is_and: bool,
        /// Operands in order.
        operands: Vec<PyExpr>,
    },
    /// Chained comparison: `a < b <= c`.
    Compare {
        /// Leftmost operand.
        left: Box<PyExpr>,
        /// Operator and right operand, pairwise.
        rest: Vec<(CmpOp, PyExpr)>,
    },
    /// `body if test else orelse`.
    Cond {
        /// The condition.
        test: Box<PyExpr>,
        /// Value when the condition is truthy.
        body: Box<PyExpr>,
        /// Value when the condition is falsy.
        orelse: Box<PyExpr>,
    },
}

/// One `name = expr` line of a `<?python ... ?>` code block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Assignment {
    /// The target name.
    pub target: String,
    /// The assigned expression.
    pub expr: PyExpr,
}

// ---------------------------------------------------------------------
// Lexer

#[derive(Debug, Clone, PartialEq)]
enum Tok {
    Int(i64),
    Float(f64),
    Str(String),
    Name(String),
    // punctuation and operators
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Dot,
    Plus,
    Minus,
    Star,
    Slash,
    DoubleSlash,
    Percent,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
}

fn lex(src: &str) -> std::result::Result<Vec<Tok>, String> {
    let mut toks = Vec::new();
    let chars: Vec<char> = src.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match c {
            ' ' | '\t' | '\r' | '\n' => i += 1,
            '(' => {
                toks.push(Tok::LParen);
                i += 1;
            }
            ')' => {
                toks.push(Tok::RParen);
                i += 1;
            }
            '[' => {
                toks.push(Tok::LBracket);
                i += 1;
            }
            ']' => {
                toks.push(Tok::RBracket);
                i += 1;
            }
            '{' => {
                toks.push(Tok::LBrace);
                i += 1;
            }
            '}' => {
                toks.push(Tok::RBrace);
                i += 1;
            }
            ',' => {
                toks.push(Tok::Comma);
                i += 1;
            }
            ':' => {
                toks.push(Tok::Colon);
                i += 1;
            }
            '+' => {
                toks.push(Tok::Plus);
                i += 1;
            }
            '-' => {
                toks.push(Tok::Minus);
                i += 1;
            }
            '*' => {
                toks.push(Tok::Star);
                i += 1;
            }
            '%' => {
                toks.push(Tok::Percent);
                i += 1;
            }
            '/' => {
                if chars.get(i + 1) == Some(&'/') {
                    toks.push(Tok::DoubleSlash);
                    i += 2;
                } else {
                    toks.push(Tok::Slash);
                    i += 1;
                }
            }
            '=' => {
                if chars.get(i + 1) == Some(&'=') {
                    toks.push(Tok::EqEq);
                    i += 2;
                } else {
                    return Err("unexpected '='".to_string());
                }
            }
            '!' => {
                if chars.get(i + 1) == Some(&'=') {
                    toks.push(Tok::NotEq);
                    i += 2;
                } else {
                    return Err("unexpected '!'".to_string());
                }
            }
            '<' => {
                if chars.get(i + 1) == Some(&'=') {
                    toks.push(Tok::Le);
                    i += 2;
                } else {
                    toks.push(Tok::Lt);
                    i += 1;
                }
            }
            '>' => {
                if chars.get(i + 1) == Some(&'=') {
                    toks.push(Tok::Ge);
                    i += 2;
                } else {
                    toks.push(Tok::Gt);
                    i += 1;
                }
            }
            '\'' | '"' => {
                let quote = c;
                let mut value = String::new();
                i += 1;
                loop {
                    match chars.get(i) {
                        None => return Err("unterminated string literal".to_string()),
                        Some(&ch) if ch == quote => {
                            i += 1;
                            break;
                        }
                        Some(&'\\') => {
                            let escaped = *chars
                                .get(i + 1)
                                .ok_or_else(|| "unterminated escape".to_string())?;
                            value.push(match escaped {
                                'n' => '\n',
                                't' => '\t',
                                'r' => '\r',
                                '0' => '\0',
                                other => other,
                            });
                            i += 2;
                        }
                        Some(&ch) => {
                            value.push(ch);
                            i += 1;
                        }
                    }
                }
                toks.push(Tok::Str(value));
            }
            '.' => {
                // A leading dot may start a float (.5); otherwise it is
                // attribute access.
                if chars.get(i + 1).map(|c| c.is_ascii_digit()).unwrap_or(false) {
                    let (tok, next) = lex_number(&chars, i)?;
                    toks.push(tok);
                    i = next;
                } else {
                    toks.push(Tok::Dot);
                    i += 1;
                }
            }
            c if c.is_ascii_digit() => {
                let (tok, next) = lex_number(&chars, i)?;
                toks.push(tok);
                i = next;
            }
            c if c.is_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                let name: String = chars[start..i].iter().collect();
                toks.push(Tok::Name(name));
            }
            other => return Err(format!("unexpected character {:?}", other)),
        }
    }
    Ok(toks)
}

fn lex_number(chars: &[char], start: usize) -> std::result::Result<(Tok, usize), String> {
    let mut i = start;
    let mut seen_dot = false;
    let mut seen_exp = false;
    while i < chars.len() {
        let c = chars[i];
        if c.is_ascii_digit() {
            i += 1;
        } else if c == '.' && !seen_dot && !seen_exp {
            // Don't swallow a trailing attribute access like `1 .real`;
            // a dot only continues the number when a digit follows or
            // the number started with digits (Python allows `1.`).
            seen_dot = true;
            i += 1;
        } else if (c == 'e' || c == 'E')
            && !seen_exp
            && chars
                .get(i + 1)
                .map(|n| n.is_ascii_digit() || *n == '-' || *n == '+')
                .unwrap_or(false)
        {
            seen_exp = true;
            i += 2;
        } else {
            break;
        }
    }
    let text: String = chars[start..i].iter().collect();
    if seen_dot || seen_exp {
        text.parse::<f64>()
            .map(|f| (Tok::Float(f), i))
            .map_err(|_| format!("invalid number literal {:?}", text))
    } else {
        text.parse::<i64>()
            .map(|n| (Tok::Int(n), i))
            .map_err(|_| format!("invalid number literal {:?}", text))
    }
}

// ---------------------------------------------------------------------
// Parser

struct ExprParser {
    toks: Vec<Tok>,
    index: usize,
}

impl ExprParser {
    fn peek(&self) -> Option<&Tok> {
        self.toks.get(self.index)
    }

    fn next(&mut self) -> Option<Tok> {
        let tok = self.toks.get(self.index).cloned();
        if tok.is_some() {
            self.index += 1;
        }
        tok
    }

    fn eat(&mut self, tok: &Tok) -> bool {
        if self.peek() == Some(tok) {
            self.index += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, tok: &Tok, what: &str) -> std::result::Result<(), String> {
        if self.eat(tok) {
            Ok(())
        } else {
            Err(format!("expected {}", what))
        }
    }

    fn at_keyword(&self, kw: &str) -> bool {
        matches!(self.peek(), Some(Tok::Name(n)) if n == kw)
    }

    fn eat_keyword(&mut self, kw: &str) -> bool {
        if self.at_keyword(kw) {
            self.index += 1;
            true
        } else {
            false
        }
    }

    fn parse_expression(&mut self) -> std::result::Result<PyExpr, String> {
        let body = self.parse_or()?;
        if self.eat_keyword("if") {
            let test = self.parse_or()?;
            if !self.eat_keyword("else") {
                return Err("expected 'else' in conditional expression".to_string());
            }
            let orelse = self.parse_expression()?;
            return Ok(PyExpr::Cond {
                test: Box::new(test),
                body: Box::new(body),
                orelse: Box::new(orelse),
            });
        }
        Ok(body)
    }

    fn parse_or(&mut self) -> std::result::Result<PyExpr, String> {
        let first = self.parse_and()?;
        if !self.at_keyword("or") {
            return Ok(first);
        }
        let mut operands = vec![first];
        while self.eat_keyword("or") {
            operands.push(self.parse_and()?);
        }
        Ok(PyExpr::BoolChain {
            is_and: false,
            operands,
        })
    }

    fn parse_and(&mut self) -> std::result::Result<PyExpr, String> {
        let first = self.parse_not()?;
        if !self.at_keyword("and") {
            return Ok(first);
        }
        let mut operands = vec![first];
        while self.eat_keyword("and") {
            operands.push(self.parse_not()?);
        }
        Ok(PyExpr::BoolChain {
            is_and: true,
            operands,
        })
    }

    fn parse_not(&mut self) -> std::result::Result<PyExpr, String> {
        if self.eat_keyword("not") {
            let operand = self.parse_not()?;
            return Ok(PyExpr::Unary(UnaryOp::Not, Box::new(operand)));
        }
        self.parse_comparison()
    }

    fn comparison_op(&mut self) -> Option<CmpOp> {
        let (op, advance) = match self.peek()? {
            Tok::EqEq => (CmpOp::Eq, 1),
            Tok::NotEq => (CmpOp::Ne, 1),
            Tok::Lt => (CmpOp::Lt, 1),
            Tok::Le => (CmpOp::Le, 1),
            Tok::Gt => (CmpOp::Gt, 1),
            Tok::Ge => (CmpOp::Ge, 1),
            Tok::Name(n) if n == "in" => (CmpOp::In, 1),
            Tok::Name(n) if n == "not" => {
                if matches!(self.toks.get(self.index + 1), Some(Tok::Name(m)) if m == "in") {
                    (CmpOp::NotIn, 2)
                } else {
                    return None;
                }
            }
            _ => return None,
        };
        self.index += advance;
        Some(op)
    }

    fn parse_comparison(&mut self) -> std::result::Result<PyExpr, String> {
        let left = self.parse_arith()?;
        let mut rest = Vec::new();
        while let Some(op) = self.comparison_op() {
            rest.push((op, self.parse_arith()?));
        }
        if rest.is_empty() {
            Ok(left)
        } else {
            Ok(PyExpr::Compare {
                left: Box::new(left),
                rest,
            })
        }
    }

    fn parse_arith(&mut self) -> std::result::Result<PyExpr, String> {
        let mut left = self.parse_term()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Plus) => BinOp::Add,
                Some(Tok::Minus) => BinOp::Sub,
                _ => break,
            };
            self.index += 1;
            let right = self.parse_term()?;
            left = PyExpr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_term(&mut self) -> std::result::Result<PyExpr, String> {
        let mut left = self.parse_factor()?;
        loop {
            let op = match self.peek() {
                Some(Tok::Star) => BinOp::Mul,
                Some(Tok::Slash) => BinOp::Div,
                Some(Tok::DoubleSlash) => BinOp::FloorDiv,
                Some(Tok::Percent) => BinOp::Mod,
                _ => break,
            };
            self.index += 1;
            let right = self.parse_factor()?;
            left = PyExpr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_factor(&mut self) -> std::result::Result<PyExpr, String> {
        if self.eat(&Tok::Minus) {
            let operand = self.parse_factor()?;
            return Ok(PyExpr::Unary(UnaryOp::Neg, Box::new(operand)));
        }
        if self.eat(&Tok::Plus) {
            let operand = self.parse_factor()?;
            return Ok(PyExpr::Unary(UnaryOp::Pos, Box::new(operand)));
        }
        self.parse_postfix()
    }

    fn parse_postfix(&mut self) -> std::result::Result<PyExpr, String> {
        let mut value = self.parse_atom()?;
        loop {
            if self.eat(&Tok::Dot) {
                match self.next() {
                    Some(Tok::Name(name)) => {
                        value = PyExpr::Attr(Box::new(value), name);
                    }
                    _ => return Err("expected attribute name after '.'".to_string()),
                }
            } else if self.eat(&Tok::LBracket) {
                let key = self.parse_expression()?;
                self.expect(&Tok::RBracket, "']'")?;
                value = PyExpr::Index(Box::new(value), Box::new(key));
            } else if self.eat(&Tok::LParen) {
                let mut args = Vec::new();
                if !self.eat(&Tok::RParen) {
                    loop {
                        args.push(self.parse_expression()?);
                        if self.eat(&Tok::Comma) {
                            if self.peek() == Some(&Tok::RParen) {
                                self.index += 1;
                                break;
                            }
                            continue;
                        }
                        self.expect(&Tok::RParen, "')'")?;
                        break;
                    }
                }
                value = PyExpr::Call(Box::new(value), args);
            } else {
                break;
            }
        }
        Ok(value)
    }

    fn parse_atom(&mut self) -> std::result::Result<PyExpr, String> {
        match self.next() {
            Some(Tok::Int(n)) => Ok(PyExpr::Int(n)),
            Some(Tok::Float(f)) => Ok(PyExpr::Float(f)),
            Some(Tok::Str(s)) => Ok(PyExpr::Str(s)),
            Some(Tok::Name(name)) => match name.as_str() {
                "True" => Ok(PyExpr::Bool(true)),
                "False" => Ok(PyExpr::Bool(false)),
                "None" => Ok(PyExpr::None),
                "not" | "and" | "or" | "in" | "if" | "else" => {
                    Err(format!("unexpected keyword {:?}", name))
                }
                _ => Ok(PyExpr::Name(name)),
            },
            Some(Tok::LParen) => {
                if self.eat(&Tok::RParen) {
                    return Ok(PyExpr::Tuple(vec![]));
                }
                let first = self.parse_expression()?;
                if self.eat(&Tok::Comma) {
                    let mut items = vec![first];
                    while self.peek() != Some(&Tok::RParen) {
                        items.push(self.parse_expression()?);
                        if !self.eat(&Tok::Comma) {
                            break;
                        }
                    }
                    self.expect(&Tok::RParen, "')'")?;
                    Ok(PyExpr::Tuple(items))
                } else {
                    self.expect(&Tok::RParen, "')'")?;
                    Ok(first)
                }
            }
            Some(Tok::LBracket) => {
                let mut items = Vec::new();
                while self.peek() != Some(&Tok::RBracket) {
                    items.push(self.parse_expression()?);
                    if !self.eat(&Tok::Comma) {
                        break;
                    }
                }
                self.expect(&Tok::RBracket, "']'")?;
                Ok(PyExpr::List(items))
            }
            Some(Tok::LBrace) => {
                let mut entries = Vec::new();
                while self.peek() != Some(&Tok::RBrace) {
                    let key = self.parse_expression()?;
                    self.expect(&Tok::Colon, "':'")?;
                    let value = self.parse_expression()?;
                    entries.push((key, value));
                    if !self.eat(&Tok::Comma) {
                        break;
                    }
                }
                self.expect(&Tok::RBrace, "'}'")?;
                Ok(PyExpr::Dict(entries))
            }
            Some(other) => Err(format!("unexpected token {:?}", other)),
            None => Err("unexpected end of expression".to_string()),
        }
    }
}

/// Parses one expression, requiring all input to be consumed.
pub fn parse_py_expression(src: &str) -> Result<PyExpr> {
    let toks = lex(src).map_err(|m| TalError::expression(m, src))?;
    if toks.is_empty() {
        return Err(TalError::expression("empty expression", src));
    }
    let mut parser = ExprParser { toks, index: 0 };
    let expr = parser
        .parse_expression()
        .map_err(|m| TalError::expression(m, src))?;
    if parser.index != parser.toks.len() {
        return Err(TalError::expression("trailing input after expression", src));
    }
    Ok(expr)
}

/// Parses a `<?python ... ?>` code block into assignment statements.
///
/// Each non-empty line must be `name = expr`; `#` comments and blank
/// lines are allowed. Anything else is an expression error.
pub fn parse_assignments(src: &str) -> Result<Vec<Assignment>> {
    let mut out = Vec::new();
    for line in src.lines() {
        let line = match line.find('#') {
            Some(i) if !line[..i].contains(['\'', '"']) => &line[..i],
            _ => line,
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some((target, rhs)) = split_assignment(line) else {
            return Err(TalError::expression(
                "only simple 'name = expression' statements are supported in code blocks",
                line,
            ));
        };
        let expr = parse_py_expression(rhs)?;
        out.push(Assignment {
            target: target.to_string(),
            expr,
        });
    }
    Ok(out)
}

/// Splits `name = expr`, rejecting `==` and non-identifier targets.
fn split_assignment(line: &str) -> Option<(&str, &str)> {
    let eq = line.find('=')?;
    if line.as_bytes().get(eq + 1) == Some(&b'=') {
        return None;
    }
    let target = line[..eq].trim();
    let valid = !target.is_empty()
        && target
            .chars()
            .enumerate()
            .all(|(i, c)| c == '_' || if i == 0 { c.is_alphabetic() } else { c.is_alphanumeric() });
    if !valid {
        return None;
    }
    Some((target, line[eq + 1..].trim()))
}

// ---------------------------------------------------------------------
// Evaluator

/// Evaluates an expression against a name resolver.
pub fn eval(expr: &PyExpr, names: &dyn NameResolver) -> std::result::Result<Value, EvalError> {
    match expr {
        PyExpr::Int(n) => Ok(Value::Int(*n)),
        PyExpr::Float(f) => Ok(Value::Float(*f)),
        PyExpr::Str(s) => Ok(Value::Str(s.clone())),
        PyExpr::Bool(b) => Ok(Value::Bool(*b)),
        PyExpr::None => Ok(Value::None),
        PyExpr::Name(name) => names
            .resolve_name(name)
            .ok_or_else(|| EvalError::name(format!("name '{}' is not defined", name))),
        PyExpr::List(items) => Ok(Value::Seq(
            items
                .iter()
                .map(|e| eval(e, names))
                .collect::<std::result::Result<_, _>>()?,
        )),
        PyExpr::Tuple(items) => Ok(Value::Seq(
            items
                .iter()
                .map(|e| eval(e, names))
                .collect::<std::result::Result<_, _>>()?,
        )),
        PyExpr::Dict(entries) => {
            let mut map = ValueMap::new();
            for (k, v) in entries {
                map.insert(eval(k, names)?, eval(v, names)?);
            }
            Ok(Value::Map(map))
        }
        PyExpr::Attr(value, name) => {
            let value = eval(value, names)?;
            get_attr_with_item_fallback(&value, name)
        }
        PyExpr::Index(value, key) => {
            let value = eval(value, names)?;
            let key = eval(key, names)?;
            get_item(&value, &key)
        }
        PyExpr::Call(func, args) => {
            let func = eval(func, names)?;
            let args: Vec<Value> = args
                .iter()
                .map(|e| eval(e, names))
                .collect::<std::result::Result<_, _>>()?;
            call_value(&func, &args)
        }
        PyExpr::Unary(op, operand) => {
            let value = eval(operand, names)?;
            match op {
                UnaryOp::Not => Ok(Value::Bool(!value.truthy())),
                UnaryOp::Neg => match value {
                    Value::Int(n) => Ok(Value::Int(-n)),
                    Value::Float(f) => Ok(Value::Float(-f)),
                    other => Err(EvalError::type_error(format!(
                        "bad operand type for unary -: '{}'",
                        other.type_name()
                    ))),
                },
                UnaryOp::Pos => match value {
                    Value::Int(_) | Value::Float(_) => Ok(value),
                    other => Err(EvalError::type_error(format!(
                        "bad operand type for unary +: '{}'",
                        other.type_name()
                    ))),
                },
            }
        }
        PyExpr::Binary(op, left, right) => {
            let left = eval(left, names)?;
            let right = eval(right, names)?;
            binary_op(*op, &left, &right)
        }
        PyExpr::BoolChain { is_and, operands } => {
            let mut last = Value::None;
            for operand in operands {
                last = eval(operand, names)?;
                if *is_and && !last.truthy() {
                    return Ok(last);
                }
                if !*is_and && last.truthy() {
                    return Ok(last);
                }
            }
            Ok(last)
        }
        PyExpr::Compare { left, rest } => {
            let mut current = eval(left, names)?;
            for (op, right_expr) in rest {
                let right = eval(right_expr, names)?;
                if !compare(*op, &current, &right)? {
                    return Ok(Value::Bool(false));
                }
                current = right;
            }
            Ok(Value::Bool(true))
        }
        PyExpr::Cond { test, body, orelse } => {
            if eval(test, names)?.truthy() {
                eval(body, names)
            } else {
                eval(orelse, names)
            }
        }
    }
}

/// Calls a callable value: builtin, bound method or host object.
pub fn call_value(func: &Value, args: &[Value]) -> std::result::Result<Value, EvalError> {
    match func {
        Value::Builtin(builtin) => builtin.invoke(args),
        Value::Object(obj) => obj.call(args),
        Value::Method(recv, name) => call_method(recv, name, args),
        other => Err(EvalError::type_error(format!(
            "'{}' object is not callable",
            other.type_name()
        ))),
    }
}

fn call_method(recv: &Value, name: &str, args: &[Value]) -> std::result::Result<Value, EvalError> {
    match recv {
        Value::Str(s) | Value::Markup(s) => str_method(s, name, args),
        Value::Map(map) => map_method(map, name, args),
        other => Err(EvalError::type_error(format!(
            "'{}' object has no method '{}'",
            other.type_name(),
            name
        ))),
    }
}

fn want_str(value: &Value, method: &str) -> std::result::Result<String, EvalError> {
    match value {
        Value::Str(s) | Value::Markup(s) => Ok(s.clone()),
        other => Err(EvalError::type_error(format!(
            "{}() argument must be str, not '{}'",
            method,
            other.type_name()
        ))),
    }
}

fn str_method(s: &str, name: &str, args: &[Value]) -> std::result::Result<Value, EvalError> {
    match (name, args) {
        ("upper", []) => Ok(Value::Str(s.to_uppercase())),
        ("lower", []) => Ok(Value::Str(s.to_lowercase())),
        ("strip", []) => Ok(Value::Str(s.trim().to_string())),
        ("lstrip", []) => Ok(Value::Str(s.trim_start().to_string())),
        ("rstrip", []) => Ok(Value::Str(s.trim_end().to_string())),
        ("capitalize", []) => {
            let mut chars = s.chars();
            let capitalized = match chars.next() {
                Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                None => String::new(),
            };
            Ok(Value::Str(capitalized))
        }
        ("split", []) => Ok(Value::Seq(
            s.split_whitespace()
                .map(|p| Value::Str(p.to_string()))
                .collect(),
        )),
        ("split", [sep]) => {
            let sep = want_str(sep, "split")?;
            Ok(Value::Seq(
                s.split(sep.as_str())
                    .map(|p| Value::Str(p.to_string()))
                    .collect(),
            ))
        }
        ("join", [Value::Seq(items)]) => {
            let parts: Vec<String> = items
                .iter()
                .map(|v| want_str(v, "join"))
                .collect::<std::result::Result<_, _>>()?;
            Ok(Value::Str(parts.join(s)))
        }
        ("replace", [from, to]) => {
            let from = want_str(from, "replace")?;
            let to = want_str(to, "replace")?;
            Ok(Value::Str(s.replace(from.as_str(), to.as_str())))
        }
        ("startswith", [prefix]) => {
            let prefix = want_str(prefix, "startswith")?;
            Ok(Value::Bool(s.starts_with(prefix.as_str())))
        }
        ("endswith", [suffix]) => {
            let suffix = want_str(suffix, "endswith")?;
            Ok(Value::Bool(s.ends_with(suffix.as_str())))
        }
        _ => Err(EvalError::type_error(format!(
            "invalid arguments for str.{}()",
            name
        ))),
    }
}

fn map_method(
    map: &ValueMap,
    name: &str,
    args: &[Value],
) -> std::result::Result<Value, EvalError> {
    match (name, args) {
        ("get", [key]) => Ok(map.get(key).cloned().unwrap_or(Value::None)),
        ("get", [key, default]) => Ok(map.get(key).cloned().unwrap_or_else(|| default.clone())),
        ("keys", []) => Ok(Value::Seq(map.iter().map(|(k, _)| k.clone()).collect())),
        ("values", []) => Ok(Value::Seq(map.iter().map(|(_, v)| v.clone()).collect())),
        ("items", []) => Ok(Value::Seq(
            map.iter()
                .map(|(k, v)| Value::Seq(vec![k.clone(), v.clone()]))
                .collect(),
        )),
        _ => Err(EvalError::type_error(format!(
            "invalid arguments for dict.{}()",
            name
        ))),
    }
}

fn binary_op(op: BinOp, left: &Value, right: &Value) -> std::result::Result<Value, EvalError> {
    use Value::{Float, Int, Markup, Seq, Str};
    match op {
        BinOp::Add => match (left, right) {
            (Int(a), Int(b)) => Ok(Int(a.wrapping_add(*b))),
            (Float(a), Float(b)) => Ok(Float(a + b)),
            (Int(a), Float(b)) => Ok(Float(*a as f64 + b)),
            (Float(a), Int(b)) => Ok(Float(a + *b as f64)),
            (Str(a) | Markup(a), Str(b) | Markup(b)) => Ok(Str(format!("{}{}", a, b))),
            (Seq(a), Seq(b)) => {
                let mut out = a.clone();
                out.extend(b.iter().cloned());
                Ok(Seq(out))
            }
            _ => Err(binop_type_error("+", left, right)),
        },
        BinOp::Sub => match (left, right) {
            (Int(a), Int(b)) => Ok(Int(a.wrapping_sub(*b))),
            (Float(a), Float(b)) => Ok(Float(a - b)),
            (Int(a), Float(b)) => Ok(Float(*a as f64 - b)),
            (Float(a), Int(b)) => Ok(Float(a - *b as f64)),
            _ => Err(binop_type_error("-", left, right)),
        },
        BinOp::Mul => match (left, right) {
            (Int(a), Int(b)) => Ok(Int(a.wrapping_mul(*b))),
            (Float(a), Float(b)) => Ok(Float(a * b)),
            (Int(a), Float(b)) => Ok(Float(*a as f64 * b)),
            (Float(a), Int(b)) => Ok(Float(a * *b as f64)),
            (Str(s), Int(n)) | (Int(n), Str(s)) => {
                Ok(Str(s.repeat((*n).max(0) as usize)))
            }
            (Seq(items), Int(n)) | (Int(n), Seq(items)) => {
                let mut out = Vec::new();
                for _ in 0..(*n).max(0) {
                    out.extend(items.iter().cloned());
                }
                Ok(Seq(out))
            }
            _ => Err(binop_type_error("*", left, right)),
        },
        BinOp::Div => {
            let (a, b) = both_floats(left, right, "/")?;
            if b == 0.0 {
                return Err(EvalError::new(
                    crate::error::ErrorKind::ZeroDivision,
                    "division by zero",
                ));
            }
            Ok(Float(a / b))
        }
        BinOp::FloorDiv => match (left, right) {
            (Int(_), Int(0)) => Err(EvalError::new(
                crate::error::ErrorKind::ZeroDivision,
                "integer division by zero",
            )),
            (Int(a), Int(b)) => Ok(Int(floor_div(*a, *b))),
            _ => {
                let (a, b) = both_floats(left, right, "//")?;
                if b == 0.0 {
                    return Err(EvalError::new(
                        crate::error::ErrorKind::ZeroDivision,
                        "float floor division by zero",
                    ));
                }
                Ok(Float((a / b).floor()))
            }
        },
        BinOp::Mod => match (left, right) {
            (Int(_), Int(0)) => Err(EvalError::new(
                crate::error::ErrorKind::ZeroDivision,
                "integer modulo by zero",
            )),
            (Int(a), Int(b)) => Ok(Int(floor_mod(*a, *b))),
            _ => {
                let (a, b) = both_floats(left, right, "%")?;
                if b == 0.0 {
                    return Err(EvalError::new(
                        crate::error::ErrorKind::ZeroDivision,
                        "float modulo by zero",
                    ));
                }
                Ok(Float(a - b * (a / b).floor()))
            }
        },
    }
}

/// Floor division: the quotient rounds toward negative infinity
/// (`7 // -2 == -4`), unlike Rust's truncating `/`.
fn floor_div(a: i64, b: i64) -> i64 {
    let q = a.wrapping_div(b);
    let r = a.wrapping_rem(b);
    if r != 0 && (r < 0) != (b < 0) {
        q - 1
    } else {
        q
    }
}

/// Modulo with the divisor's sign (`7 % -2 == -1`), matching floor
/// division so that `a == b * (a // b) + a % b` holds.
fn floor_mod(a: i64, b: i64) -> i64 {
    a.wrapping_rem(b).wrapping_add(b).wrapping_rem(b)
}

fn both_floats(
    left: &Value,
    right: &Value,
    op: &str,
) -> std::result::Result<(f64, f64), EvalError> {
    let coerce = |v: &Value| match v {
        Value::Int(n) => Some(*n as f64),
        Value::Float(f) => Some(*f),
        _ => None,
    };
    match (coerce(left), coerce(right)) {
        (Some(a), Some(b)) => Ok((a, b)),
        _ => Err(binop_type_error(op, left, right)),
    }
}

fn binop_type_error(op: &str, left: &Value, right: &Value) -> EvalError {
    EvalError::type_error(format!(
        "unsupported operand type(s) for {}: '{}' and '{}'",
        op,
        left.type_name(),
        right.type_name()
    ))
}

fn compare(op: CmpOp, left: &Value, right: &Value) -> std::result::Result<bool, EvalError> {
    match op {
        CmpOp::Eq => Ok(values_equal(left, right)),
        CmpOp::Ne => Ok(!values_equal(left, right)),
        CmpOp::Lt => Ok(compare_values(left, right)? == Ordering::Less),
        CmpOp::Le => Ok(compare_values(left, right)? != Ordering::Greater),
        CmpOp::Gt => Ok(compare_values(left, right)? == Ordering::Greater),
        CmpOp::Ge => Ok(compare_values(left, right)? != Ordering::Less),
        CmpOp::In => contains(right, left),
        CmpOp::NotIn => contains(right, left).map(|b| !b),
    }
}

fn contains(container: &Value, item: &Value) -> std::result::Result<bool, EvalError> {
    match container {
        Value::Seq(items) => Ok(items.iter().any(|v| values_equal(v, item))),
        Value::Map(map) => Ok(map.get(item).is_some()),
        Value::Str(s) | Value::Markup(s) => match item {
            Value::Str(sub) | Value::Markup(sub) => Ok(s.contains(sub.as_str())),
            other => Err(EvalError::type_error(format!(
                "'in <string>' requires string as left operand, not '{}'",
                other.type_name()
            ))),
        },
        other => Err(EvalError::type_error(format!(
            "argument of type '{}' is not iterable",
            other.type_name()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Builtin;
    use std::collections::HashMap;

    struct Names(HashMap<String, Value>);

    impl NameResolver for Names {
        fn resolve_name(&self, name: &str) -> Option<Value> {
            self.0.get(name).cloned()
        }
    }

    fn names(pairs: &[(&str, Value)]) -> Names {
        let mut map: HashMap<String, Value> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        for b in Builtin::all() {
            map.insert(b.name().to_string(), Value::Builtin(*b));
        }
        Names(map)
    }

    fn run(src: &str, bindings: &[(&str, Value)]) -> Value {
        let expr = parse_py_expression(src).unwrap();
        eval(&expr, &names(bindings)).unwrap()
    }

    #[test]
    fn test_arithmetic_precedence() {
        assert_eq!(run("1 + 2 * 3", &[]), Value::Int(7));
        assert_eq!(run("(1 + 2) * 3", &[]), Value::Int(9));
        assert_eq!(run("7 // 2", &[]), Value::Int(3));
        assert_eq!(run("7 % 2", &[]), Value::Int(1));
        assert_eq!(run("-7 % 2", &[]), Value::Int(1));
        assert_eq!(run("1 / 2", &[]), Value::Float(0.5));
    }

    #[test]
    fn test_floor_division_with_negative_operands() {
        // Quotient rounds toward negative infinity, remainder takes
        // the divisor's sign.
        assert_eq!(run("-7 // 2", &[]), Value::Int(-4));
        assert_eq!(run("7 // -2", &[]), Value::Int(-4));
        assert_eq!(run("-7 // -2", &[]), Value::Int(3));
        assert_eq!(run("7 % -2", &[]), Value::Int(-1));
        assert_eq!(run("-7 % -2", &[]), Value::Int(-1));
        assert_eq!(run("-8 // 2", &[]), Value::Int(-4));
        assert_eq!(run("-8 % 2", &[]), Value::Int(0));
    }

    #[test]
    fn test_string_concat_and_methods() {
        assert_eq!(
            run("'Hello, ' + name", &[("name", Value::Str("World".into()))]),
            Value::Str("Hello, World".into())
        );
        assert_eq!(run("'ab'.upper()", &[]), Value::Str("AB".into()));
        assert_eq!(
            run("', '.join(['a', 'b'])", &[]),
            Value::Str("a, b".into())
        );
        assert_eq!(
            run("'a-b-c'.split('-')", &[]),
            Value::Seq(vec![
                Value::Str("a".into()),
                Value::Str("b".into()),
                Value::Str("c".into())
            ])
        );
    }

    #[test]
    fn test_short_circuit() {
        // `or` returns the first truthy operand without evaluating the rest.
        assert_eq!(run("0 or 'x'", &[]), Value::Str("x".into()));
        assert_eq!(run("missing if False else 2", &[]), Value::Int(2));
        let expr = parse_py_expression("1 or missing").unwrap();
        assert_eq!(eval(&expr, &names(&[])).unwrap(), Value::Int(1));
    }

    #[test]
    fn test_chained_comparison() {
        assert_eq!(run("1 < 2 < 3", &[]), Value::Bool(true));
        assert_eq!(run("1 < 2 > 5", &[]), Value::Bool(false));
        assert_eq!(run("'a' in 'cat'", &[]), Value::Bool(true));
        assert_eq!(run("4 not in [1, 2, 3]", &[]), Value::Bool(true));
    }

    #[test]
    fn test_attribute_with_item_fallback() {
        let mut map = ValueMap::new();
        map.insert_str("name", Value::Str("x".into()));
        assert_eq!(
            run("obj.name", &[("obj", Value::Map(map))]),
            Value::Str("x".into())
        );
    }

    #[test]
    fn test_name_error() {
        let expr = parse_py_expression("missing").unwrap();
        let err = eval(&expr, &names(&[])).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Name);
    }

    #[test]
    fn test_division_by_zero() {
        let expr = parse_py_expression("1 // 0").unwrap();
        let err = eval(&expr, &names(&[])).unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::ZeroDivision);
    }

    #[test]
    fn test_literals() {
        assert_eq!(run("[1, 2][1]", &[]), Value::Int(2));
        assert_eq!(run("{'a': 1}['a']", &[]), Value::Int(1));
        assert_eq!(run("(1, 2)[0]", &[]), Value::Int(1));
        assert_eq!(run("1.5e2", &[]), Value::Float(150.0));
        assert_eq!(run("'it\\'s'", &[]), Value::Str("it's".into()));
    }

    #[test]
    fn test_conditional_expression() {
        assert_eq!(run("'y' if 1 else 'n'", &[]), Value::Str("y".into()));
        assert_eq!(run("'y' if 0 else 'n'", &[]), Value::Str("n".into()));
    }

    #[test]
    fn test_code_block_assignments() {
        let block = "\n  total = 1 + 2\n  # a comment\n  label = 'n=' + str(total)\n";
        let assignments = parse_assignments(block).unwrap();
        assert_eq!(assignments.len(), 2);
        assert_eq!(assignments[0].target, "total");
        assert!(parse_assignments("if x:\n  y = 1").is_err());
    }

    #[test]
    fn test_trailing_input_is_rejected() {
        assert!(parse_py_expression("1 2").is_err());
        assert!(parse_py_expression("").is_err());
    }
}
