// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Error types for the tael template engine.
//!
//! This module defines [`TalError`], the main error enum, and helper types
//! for rich error reporting with source context.
//!
//! # Error Categories
//!
//! - **Parse errors**: invalid markup in the template source
//! - **Language errors**: illegal statement combinations and ordering
//! - **Expression errors**: invalid expression payloads
//! - **Render errors**: expression failures at render time
//! - **Resolution errors**: template file not found
//! - **Cache errors**: caching operation failures
//!
//! # Source Context
//!
//! Parse and render errors include [`SourceContext`] for rich error
//! messages showing the problematic template text with line numbers and
//! a caret pointing to the exact error location.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Maximum display width for template filenames in error reports.
const FILENAME_DISPLAY_WIDTH: usize = 60;

/// Maximum length of a single variable preview in a render-error snapshot.
const SNAPSHOT_PREVIEW_WIDTH: usize = 80;

/// Lines of template source retained on either side of a failing line.
const CONTEXT_LINES: usize = 2;

/// A template-source excerpt around an error location.
///
/// Built once when the error is raised; only the window around the
/// failing line is retained, each line paired with its 1-indexed
/// number, so errors stay cheap to keep and to serialize even for
/// large templates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceContext {
    /// The retained lines with their 1-indexed numbers.
    pub excerpt: Vec<(usize, String)>,
    /// The failing line (1-indexed).
    pub error_line: usize,
    /// The failing column (1-indexed).
    pub error_column: usize,
}

impl SourceContext {
    /// Captures the window around `line` from the template source.
    pub fn from_source(source: &str, line: usize, column: usize) -> Self {
        let first = line.saturating_sub(CONTEXT_LINES + 1);
        let excerpt = source
            .lines()
            .enumerate()
            .skip(first)
            .take(2 * CONTEXT_LINES + 1)
            .map(|(index, text)| (index + 1, text.to_string()))
            .collect();
        Self {
            excerpt,
            error_line: line,
            error_column: column,
        }
    }
}

impl fmt::Display for SourceContext {
    /// Renders the excerpt with a line-number gutter and a caret under
    /// the failing column:
    ///
    /// ```text
    ///  9 | <div class="container">
    /// 10 |   <span tal:content="invalid syntax">x</span>
    ///    |                      ^
    /// 11 | </div>
    /// ```
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let gutter = self
            .excerpt
            .iter()
            .map(|(number, _)| number.to_string().len())
            .max()
            .unwrap_or(1);
        for (number, text) in &self.excerpt {
            writeln!(f, "{:>gutter$} | {}", number, text)?;
            if *number == self.error_line {
                let offset = self.error_column.saturating_sub(1);
                writeln!(f, "{:>gutter$} | {:offset$}^", "", "")?;
            }
        }
        Ok(())
    }
}

/// The excerpt on its own line, or nothing, for error messages.
fn opt_context(context: &Option<SourceContext>) -> String {
    match context {
        Some(context) => format!("\n{}", context),
        None => String::new(),
    }
}

/// The kind of failure an expression raised at render time.
///
/// The engine has no exception hierarchy to multiply inherit from, so a
/// wrapped [`RenderError`] instead carries the kind of the original
/// failure; callers pattern-match on it the way they would catch the
/// original exception class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Attribute access failed (no such attribute).
    Attribute,
    /// Mapping or sequence lookup failed (missing key / index out of range).
    Lookup,
    /// Operation applied to a value of the wrong type.
    Type,
    /// Name not found in scope.
    Name,
    /// Invalid literal or conversion failure.
    Value,
    /// Division or modulo by zero.
    ZeroDivision,
    /// Module import failed.
    Import,
    /// Internal runtime failure; never swallowed and never wrapped.
    Runtime,
    /// Anything else.
    Other,
}

impl ErrorKind {
    /// Whether a pipe-operator fallback chain (and `exists:`) swallows
    /// this kind and moves on to the next candidate.
    pub fn caught_by_fallback(self) -> bool {
        matches!(
            self,
            ErrorKind::Attribute | ErrorKind::Lookup | ErrorKind::Type | ErrorKind::Name
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Attribute => "AttributeError",
            ErrorKind::Lookup => "LookupError",
            ErrorKind::Type => "TypeError",
            ErrorKind::Name => "NameError",
            ErrorKind::Value => "ValueError",
            ErrorKind::ZeroDivision => "ZeroDivisionError",
            ErrorKind::Import => "ImportError",
            ErrorKind::Runtime => "RuntimeError",
            ErrorKind::Other => "Error",
        };
        write!(f, "{}", name)
    }
}

/// A failure raised while evaluating an expression.
///
/// This is the raw, unlocated form produced by the expression evaluator;
/// the renderer wraps it into a [`RenderError`] that adds the expression
/// source slice, the template location and a variables snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvalError {
    /// The kind of the failure.
    pub kind: ErrorKind,
    /// Human-readable message.
    pub message: String,
}

impl EvalError {
    /// Creates a new evaluation error.
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Shorthand for an attribute-access failure.
    pub fn attribute(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Attribute, message)
    }

    /// Shorthand for a lookup failure.
    pub fn lookup(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Lookup, message)
    }

    /// Shorthand for a type failure.
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Type, message)
    }

    /// Shorthand for an unknown-name failure.
    pub fn name(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Name, message)
    }

    /// Shorthand for a value failure.
    pub fn value(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Value, message)
    }
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// A render-time expression failure with full diagnostic context.
///
/// Carries the offending expression's literal source slice, the element's
/// location and a bounded snapshot of the variables that were in scope.
/// The original failure kind is preserved so that callers can match on it
/// via [`RenderError::original_kind`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderError {
    /// The kind of the original failure.
    pub kind: ErrorKind,
    /// Message of the original failure.
    pub message: String,
    /// The literal expression text from the template.
    pub expression: String,
    /// The template filename, if known.
    pub filename: Option<String>,
    /// 1-indexed line of the failing expression.
    pub line: usize,
    /// 1-indexed column of the failing expression.
    pub column: usize,
    /// Bounded single-line previews of the variables in scope.
    pub variables: Vec<(String, String)>,
    /// Source context for rich display.
    pub source_context: Option<SourceContext>,
    /// Wrapping chain, innermost last.
    pub chain: Vec<String>,
}

impl RenderError {
    /// The kind of the original failure, for `except OriginalKind`-style
    /// matching through the wrapper.
    pub fn original_kind(&self) -> ErrorKind {
        self.kind
    }

    /// Truncates a variable value to a bounded single-line preview.
    pub fn preview(value: &str) -> String {
        let one_line: String = value
            .chars()
            .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
            .collect();
        if one_line.len() > SNAPSHOT_PREVIEW_WIDTH {
            let mut cut = SNAPSHOT_PREVIEW_WIDTH;
            while !one_line.is_char_boundary(cut) {
                cut -= 1;
            }
            format!("{}...", &one_line[..cut])
        } else {
            one_line
        }
    }

    fn display_filename(&self) -> String {
        match &self.filename {
            Some(name) if name.len() > FILENAME_DISPLAY_WIDTH => {
                let tail_start = name.len() - (FILENAME_DISPLAY_WIDTH - 3);
                let mut cut = tail_start;
                while !name.is_char_boundary(cut) {
                    cut += 1;
                }
                format!("...{}", &name[cut..])
            }
            Some(name) => name.clone(),
            None => "<string>".to_string(),
        }
    }
}

impl fmt::Display for RenderError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "{} while evaluating {:?} in {} at line {}, column {}",
            self.kind,
            self.expression,
            self.display_filename(),
            self.line,
            self.column
        )?;
        writeln!(f, " - {}", self.message)?;
        for entry in &self.chain {
            writeln!(f, " - wrapped by: {}", entry)?;
        }
        if let Some(ctx) = &self.source_context {
            write!(f, "{}", ctx)?;
        }
        if !self.variables.is_empty() {
            writeln!(f, " Variables:")?;
            for (name, value) in &self.variables {
                writeln!(f, "   {} = {}", name, value)?;
            }
        }
        Ok(())
    }
}

/// The main error type for tael operations.
///
/// All tael functions return `Result<T, TalError>` to provide detailed
/// error information for debugging and user feedback.
#[derive(Error, Debug)]
pub enum TalError {
    /// Template parsing failed due to invalid markup.
    #[error("Parse error in {file:?}: {message} at line {line}, column {column}{}", opt_context(source_context))]
    ParseError {
        /// Description of the parse error.
        message: String,
        /// Line number where the error occurred.
        line: usize,
        /// Column number where the error occurred.
        column: usize,
        /// The file path, if known.
        file: Option<String>,
        /// Source context for rich error display.
        source_context: Option<SourceContext>,
    },

    /// Illegal statement combination, ordering conflict or unknown
    /// control-namespace attribute in strict mode.
    #[error("Language error: {message} at line {line}, column {column}")]
    LanguageError {
        /// Description of the language error.
        message: String,
        /// Line number of the offending statement.
        line: usize,
        /// Column number of the offending statement.
        column: usize,
    },

    /// Invalid expression payload.
    #[error("Expression error: {message} in {expression:?}")]
    ExpressionError {
        /// Description of the expression error.
        message: String,
        /// The offending expression text.
        expression: String,
    },

    /// An expression failed at render time.
    #[error("{0}")]
    RenderError(Box<RenderError>),

    /// File I/O error.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Template file could not be found or resolved.
    #[error("Resolution error: {0}")]
    ResolutionError(String),

    /// Cache operation failed.
    #[error("Cache error: {0}")]
    CacheError(String),

    /// A template whose compilation already failed was rendered again;
    /// the original failure is terminal until the source changes.
    #[error("Template failed to compile: {0}")]
    CookError(String),
}

impl TalError {
    /// Creates a parse error without file context.
    pub fn parse(message: impl Into<String>, line: usize, column: usize) -> Self {
        TalError::ParseError {
            message: message.into(),
            line,
            column,
            file: None,
            source_context: None,
        }
    }

    /// Creates a language error.
    pub fn language(message: impl Into<String>, line: usize, column: usize) -> Self {
        TalError::LanguageError {
            message: message.into(),
            line,
            column,
        }
    }

    /// Creates an expression error.
    pub fn expression(message: impl Into<String>, expression: impl Into<String>) -> Self {
        TalError::ExpressionError {
            message: message.into(),
            expression: expression.into(),
        }
    }

    /// Attaches file name and source context to a parse error.
    ///
    /// Other error variants pass through unchanged.
    pub fn with_source(self, source: &str, file: Option<&str>) -> Self {
        match self {
            TalError::ParseError {
                message,
                line,
                column,
                ..
            } => TalError::ParseError {
                message,
                line,
                column,
                file: file.map(String::from),
                source_context: Some(SourceContext::from_source(source, line, column)),
            },
            other => other,
        }
    }
}

/// Convenience type alias for Results with [`TalError`].
pub type Result<T> = std::result::Result<T, TalError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_context_excerpt() {
        let source = "line one\nline two\nline three\nline four\nline five\nline six";
        let ctx = SourceContext::from_source(source, 3, 6);

        // Only the window around the failing line is retained.
        let numbers: Vec<usize> = ctx.excerpt.iter().map(|(n, _)| *n).collect();
        assert_eq!(numbers, vec![1, 2, 3, 4, 5]);

        let rendered = ctx.to_string();
        assert!(rendered.contains("3 | line three"));
        assert!(rendered.contains("  |      ^"));
        assert!(!rendered.contains("line six"));
    }

    #[test]
    fn test_source_context_gutter_alignment() {
        let source: String = (1..=12).map(|n| format!("row {}\n", n)).collect();
        let ctx = SourceContext::from_source(&source, 10, 1);
        let rendered = ctx.to_string();

        // Two-digit numbers widen the gutter for the whole excerpt.
        assert!(rendered.contains(" 8 | row 8"));
        assert!(rendered.contains("10 | row 10"));
        assert!(rendered.contains("   | ^"));
    }

    #[test]
    fn test_fallback_catch_set() {
        assert!(ErrorKind::Attribute.caught_by_fallback());
        assert!(ErrorKind::Lookup.caught_by_fallback());
        assert!(ErrorKind::Type.caught_by_fallback());
        assert!(ErrorKind::Name.caught_by_fallback());
        assert!(!ErrorKind::Runtime.caught_by_fallback());
        assert!(!ErrorKind::ZeroDivision.caught_by_fallback());
    }

    #[test]
    fn test_render_error_preview_is_bounded() {
        let long = "x".repeat(500);
        let preview = RenderError::preview(&long);
        assert!(preview.len() <= 83);
        assert!(preview.ends_with("..."));

        let multiline = "a\nb\r\nc";
        assert_eq!(RenderError::preview(multiline), "a b  c");
    }

    #[test]
    fn test_render_error_roundtrips_through_serde() {
        let err = RenderError {
            kind: ErrorKind::Name,
            message: "name 'x' is not defined".to_string(),
            expression: "x + 1".to_string(),
            filename: Some("page.pt".to_string()),
            line: 4,
            column: 12,
            variables: vec![("y".to_string(), "2".to_string())],
            source_context: None,
            chain: vec![],
        };

        let json = serde_json::to_string(&err).unwrap();
        let back: RenderError = serde_json::from_str(&json).unwrap();
        assert_eq!(back.original_kind(), ErrorKind::Name);
        assert_eq!(back.expression, "x + 1");
    }
}
