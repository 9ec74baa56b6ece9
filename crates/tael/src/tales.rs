// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! The typed expression layer.
//!
//! An attribute expression is an optional type prefix (`python:`,
//! `string:`, `exists:`, `not:`, `import:`, `load:`, `structure:`)
//! followed by a payload; without a prefix the configured default type
//! applies. The pipe operator (`|`) outside brackets splits an
//! expression into an ordered fallback chain; each candidate compiles
//! independently and the runtime tries them in order. A literal `|`
//! is written `||`.
//!
//! Compilers are pluggable: the [`ExpressionRegistry`] maps a prefix to
//! an [`ExpressionCompiler`], and hosts may register their own types.
//!
//! Before compilation the expression source has the four markup
//! entities `&amp;`, `&lt;`, `&gt;`, `&quot;` decoded, so expressions
//! written in attribute values read naturally.

use crate::error::{Result, TalError};
use crate::pyexpr::{parse_py_expression, PyExpr};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

lazy_static! {
    /// A leading expression-type prefix. The `//` guard keeps URL-like
    /// payloads (`http://...`) from reading as a prefix.
    static ref PREFIX_RE: Regex =
        Regex::new(r"^\s*([A-Za-z][A-Za-z0-9_-]*):(?:[^/]|/[^/]|$)").unwrap();
}

/// A compiled expression, ready for the code generator.
///
/// Serde-serializable so compiled programs can persist to the disk
/// cache.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Expr {
    /// A `python:` expression (also the usual default type).
    Py(PyExpr),
    /// A `string:` template: literal parts and `${...}` substitutions.
    StringTpl(Vec<StrPart>),
    /// `exists:`: true when the inner expression evaluates without
    /// raising from the fallback catch set.
    Exists(Box<Expr>),
    /// `not:`: inverted truth of the inner expression.
    NotExpr(Box<Expr>),
    /// `import:`: resolve a dotted module path at render time.
    Import {
        /// The dotted path.
        path: String,
    },
    /// `load:`: resolve a template path relative to the current
    /// template and yield a reference usable as a macro source.
    Load {
        /// The template path.
        path: String,
    },
    /// `structure:`: mark the inner result as pre-escaped.
    Structure(Box<Expr>),
    /// A pipe fallback chain, tried in order.
    Fallback(Vec<Expr>),
}

/// One part of a `string:` template.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum StrPart {
    /// Literal text.
    Literal(String),
    /// A `${...}` or `$name` substitution.
    Sub(PyExpr),
}

/// Decodes the fixed entity set inside expression source.
///
/// Historically `lt`, `gt`, `quot` and `amp`; exactly that set is
/// decoded, nothing else.
pub fn decode_expression_entities(src: &str) -> String {
    if !src.contains('&') {
        return src.to_string();
    }
    src.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&amp;", "&")
}

/// Compiles one expression type.
pub trait ExpressionCompiler: Send + Sync {
    /// Compiles the payload (prefix already stripped).
    fn compile(&self, payload: &str, registry: &ExpressionRegistry) -> Result<Expr>;
}

/// Maps type prefixes to compilers and drives expression compilation.
#[derive(Clone)]
pub struct ExpressionRegistry {
    compilers: HashMap<String, Arc<dyn ExpressionCompiler>>,
    default_type: String,
}

impl std::fmt::Debug for ExpressionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.compilers.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("ExpressionRegistry")
            .field("types", &names)
            .field("default_type", &self.default_type)
            .finish()
    }
}

impl ExpressionRegistry {
    /// Creates a registry with the standard expression types installed.
    pub fn with_defaults(default_type: impl Into<String>) -> Self {
        let mut registry = Self {
            compilers: HashMap::new(),
            default_type: default_type.into(),
        };
        registry.register("python", Arc::new(PythonCompiler));
        registry.register("string", Arc::new(StringCompiler));
        registry.register("exists", Arc::new(ExistsCompiler));
        registry.register("not", Arc::new(NotCompiler));
        registry.register("import", Arc::new(ImportCompiler));
        registry.register("load", Arc::new(LoadCompiler));
        registry.register("structure", Arc::new(StructureCompiler));
        registry
    }

    /// Registers (or replaces) a compiler for a prefix.
    pub fn register(&mut self, prefix: impl Into<String>, compiler: Arc<dyn ExpressionCompiler>) {
        self.compilers.insert(prefix.into(), compiler);
    }

    /// The configured default expression type.
    pub fn default_type(&self) -> &str {
        &self.default_type
    }

    /// Compiles a full expression: entity decoding, pipe fallback
    /// splitting, prefix dispatch.
    pub fn compile(&self, expression: &str) -> Result<Expr> {
        let decoded = decode_expression_entities(expression);
        let candidates = split_fallback(&decoded);
        if candidates.len() == 1 {
            return self.compile_single(&candidates[0]);
        }
        let compiled: Vec<Expr> = candidates
            .iter()
            .map(|c| self.compile_single(c))
            .collect::<Result<_>>()?;
        Ok(Expr::Fallback(compiled))
    }

    /// Compiles one candidate (no pipe handling).
    pub fn compile_single(&self, expression: &str) -> Result<Expr> {
        let trimmed = expression.trim();
        let (type_name, payload) = match PREFIX_RE.captures(trimmed) {
            Some(caps) => {
                let name = caps.get(1).unwrap().as_str();
                let rest = &trimmed[caps.get(1).unwrap().end() + 1..];
                (name.to_string(), rest)
            }
            None => (self.default_type.clone(), trimmed),
        };
        match self.compilers.get(&type_name) {
            Some(compiler) => compiler.compile(payload, self),
            None => Err(TalError::expression(
                format!("unknown expression type '{}'", type_name),
                expression,
            )),
        }
    }
}

/// Splits an expression on `|` outside brackets and quotes.
///
/// A doubled `||` is the escaped literal pipe and does not split; it is
/// reduced to a single `|` in the candidate text.
pub fn split_fallback(expression: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let chars: Vec<char> = expression.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        match quote {
            Some(q) => {
                current.push(c);
                if c == '\\' && i + 1 < chars.len() {
                    current.push(chars[i + 1]);
                    i += 2;
                    continue;
                }
                if c == q {
                    quote = None;
                }
            }
            None => match c {
                '\'' | '"' => {
                    quote = Some(c);
                    current.push(c);
                }
                '(' | '[' | '{' => {
                    depth += 1;
                    current.push(c);
                }
                ')' | ']' | '}' => {
                    depth = depth.saturating_sub(1);
                    current.push(c);
                }
                '|' if chars.get(i + 1) == Some(&'|') => {
                    current.push('|');
                    i += 2;
                    continue;
                }
                '|' if depth == 0 => {
                    parts.push(std::mem::take(&mut current));
                }
                _ => current.push(c),
            },
        }
        i += 1;
    }
    parts.push(current);
    parts
}

struct PythonCompiler;

impl ExpressionCompiler for PythonCompiler {
    fn compile(&self, payload: &str, _registry: &ExpressionRegistry) -> Result<Expr> {
        Ok(Expr::Py(parse_py_expression(payload.trim())?))
    }
}

struct StringCompiler;

impl ExpressionCompiler for StringCompiler {
    fn compile(&self, payload: &str, _registry: &ExpressionRegistry) -> Result<Expr> {
        Ok(Expr::StringTpl(parse_string_template(payload)?))
    }
}

/// Parses a `string:` payload into literal and substitution parts.
///
/// `${expr}` substitutes a full expression, `$name` a bare variable,
/// and `$$` is the literal dollar sign.
pub fn parse_string_template(payload: &str) -> Result<Vec<StrPart>> {
    let mut parts = Vec::new();
    let mut literal = String::new();
    let chars: Vec<char> = payload.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] != '$' {
            literal.push(chars[i]);
            i += 1;
            continue;
        }
        match chars.get(i + 1) {
            Some('$') => {
                literal.push('$');
                i += 2;
            }
            Some('{') => {
                let start = i + 2;
                let mut depth = 1usize;
                let mut j = start;
                while j < chars.len() && depth > 0 {
                    match chars[j] {
                        '{' => depth += 1,
                        '}' => depth -= 1,
                        _ => {}
                    }
                    j += 1;
                }
                if depth > 0 {
                    return Err(TalError::expression("unclosed '${'", payload));
                }
                let inner: String = chars[start..j - 1].iter().collect();
                if !literal.is_empty() {
                    parts.push(StrPart::Literal(std::mem::take(&mut literal)));
                }
                parts.push(StrPart::Sub(parse_py_expression(inner.trim())?));
                i = j;
            }
            Some(&c) if c.is_alphabetic() || c == '_' => {
                let start = i + 1;
                let mut j = start;
                while j < chars.len() && (chars[j].is_alphanumeric() || chars[j] == '_') {
                    j += 1;
                }
                let name: String = chars[start..j].iter().collect();
                if !literal.is_empty() {
                    parts.push(StrPart::Literal(std::mem::take(&mut literal)));
                }
                parts.push(StrPart::Sub(PyExpr::Name(name)));
                i = j;
            }
            _ => {
                literal.push('$');
                i += 1;
            }
        }
    }
    if !literal.is_empty() {
        parts.push(StrPart::Literal(literal));
    }
    Ok(parts)
}

struct ExistsCompiler;

impl ExpressionCompiler for ExistsCompiler {
    fn compile(&self, payload: &str, registry: &ExpressionRegistry) -> Result<Expr> {
        Ok(Expr::Exists(Box::new(registry.compile(payload)?)))
    }
}

struct NotCompiler;

impl ExpressionCompiler for NotCompiler {
    fn compile(&self, payload: &str, registry: &ExpressionRegistry) -> Result<Expr> {
        Ok(Expr::NotExpr(Box::new(registry.compile(payload)?)))
    }
}

struct ImportCompiler;

impl ExpressionCompiler for ImportCompiler {
    fn compile(&self, payload: &str, _registry: &ExpressionRegistry) -> Result<Expr> {
        let path = payload.trim();
        let valid = !path.is_empty()
            && path.split('.').all(|part| {
                !part.is_empty()
                    && part
                        .chars()
                        .enumerate()
                        .all(|(i, c)| {
                            c == '_' || if i == 0 { c.is_alphabetic() } else { c.is_alphanumeric() }
                        })
            });
        if !valid {
            return Err(TalError::expression("invalid dotted import path", payload));
        }
        Ok(Expr::Import {
            path: path.to_string(),
        })
    }
}

struct LoadCompiler;

impl ExpressionCompiler for LoadCompiler {
    fn compile(&self, payload: &str, _registry: &ExpressionRegistry) -> Result<Expr> {
        let path = payload.trim();
        if path.is_empty() {
            return Err(TalError::expression("empty template path", payload));
        }
        Ok(Expr::Load {
            path: path.to_string(),
        })
    }
}

struct StructureCompiler;

impl ExpressionCompiler for StructureCompiler {
    fn compile(&self, payload: &str, registry: &ExpressionRegistry) -> Result<Expr> {
        Ok(Expr::Structure(Box::new(registry.compile(payload)?)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn registry() -> ExpressionRegistry {
        ExpressionRegistry::with_defaults("python")
    }

    #[test]
    fn test_default_type_is_python() {
        let expr = registry().compile("1 + 1").unwrap();
        assert!(matches!(expr, Expr::Py(_)));
    }

    #[test]
    fn test_explicit_prefixes() {
        let r = registry();
        assert!(matches!(r.compile("python: 1").unwrap(), Expr::Py(_)));
        assert!(matches!(
            r.compile("string:Hello").unwrap(),
            Expr::StringTpl(_)
        ));
        assert!(matches!(r.compile("exists: x").unwrap(), Expr::Exists(_)));
        assert!(matches!(r.compile("not: x").unwrap(), Expr::NotExpr(_)));
        assert!(matches!(
            r.compile("import: os.path").unwrap(),
            Expr::Import { .. }
        ));
        assert!(matches!(
            r.compile("load: ../main.pt").unwrap(),
            Expr::Load { .. }
        ));
        assert!(matches!(
            r.compile("structure: body").unwrap(),
            Expr::Structure(_)
        ));
    }

    #[test]
    fn test_unknown_prefix_is_an_error() {
        assert!(registry().compile("bogus: x").is_err());
    }

    #[test]
    fn test_pipe_fallback_chain() {
        let expr = registry().compile("a | b | 'c'").unwrap();
        let Expr::Fallback(candidates) = expr else {
            panic!("expected fallback");
        };
        assert_eq!(candidates.len(), 3);
    }

    #[test]
    fn test_pipe_inside_brackets_does_not_split() {
        let parts = split_fallback("f([1, 2] | g) | h");
        // The bracketed pipe splits, the nested one does not.
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[0].trim(), "f([1, 2] | g)");
        assert_eq!(parts[1].trim(), "h");
    }

    #[test]
    fn test_doubled_pipe_is_literal() {
        let parts = split_fallback("'a' + '||' | b");
        // Quoted pipes don't split, and the doubled pipe outside quotes
        // reduces to one.
        assert_eq!(split_fallback("a || b"), vec!["a | b".to_string()]);
        assert_eq!(parts.len(), 2);
    }

    #[test]
    fn test_string_template_parts() {
        let parts = parse_string_template("Hello ${name}, you owe $$5 to $creditor!").unwrap();
        assert_eq!(
            parts,
            vec![
                StrPart::Literal("Hello ".to_string()),
                StrPart::Sub(PyExpr::Name("name".to_string())),
                StrPart::Literal(", you owe $5 to ".to_string()),
                StrPart::Sub(PyExpr::Name("creditor".to_string())),
                StrPart::Literal("!".to_string()),
            ]
        );
    }

    #[test]
    fn test_expression_entities_are_decoded() {
        let expr = registry().compile("1 &lt; 2 and 3 &gt; 2").unwrap();
        assert!(matches!(expr, Expr::Py(_)));
        assert_eq!(decode_expression_entities("a &amp;&amp; b"), "a && b");
    }

    #[test]
    fn test_url_payload_is_not_a_prefix() {
        // `http://...` must not be misread as expression type `http`.
        let err_or_ok = registry().compile("string:http://example.com/${page}");
        assert!(matches!(err_or_ok.unwrap(), Expr::StringTpl(_)));
    }

    #[test]
    fn test_import_path_validation() {
        assert!(registry().compile("import: os.path").is_ok());
        assert!(registry().compile("import: 1bad.path").is_err());
        assert!(registry().compile("import: ").is_err());
    }

    #[test]
    fn test_nested_prefixes() {
        let expr = registry().compile("not:exists:x").unwrap();
        let Expr::NotExpr(inner) = expr else { panic!() };
        assert!(matches!(*inner, Expr::Exists(_)));
    }
}
