// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Statement payload parsing and semantic checks.
//!
//! Attribute payloads arrive from the binder as raw strings; this
//! module parses the little grammars inside them (`define` bindings
//! with tuple unpacking, `repeat` specs, the `text`/`structure`
//! insertion modes, `attributes` pairs, `i18n:attributes` pairs) and
//! enforces the per-element rules the code generator relies on: at
//! most one of `content`/`replace`, no reserved-name defines in strict
//! mode, no star unpacking.
//!
//! The canonical execution order itself (`define` → `switch` →
//! `condition` → `repeat` → `case` → `content`/`replace` →
//! `omit-tag` → `attributes` → `on-error`) is realized structurally by
//! the code generator; nothing here depends on attribute source order.

use crate::config::Settings;
use crate::error::{Result, TalError};
use crate::program::DefineScope;
use crate::runtime::RESERVED_NAMES;
use crate::statements::{split_statement_items, BoundStatements, Statement};
use crate::token::Span;
use crate::value::Builtin;

/// One parsed `tal:define` binding.
#[derive(Debug, Clone, PartialEq)]
pub struct DefineItem {
    /// Local or global.
    pub scope: DefineScope,
    /// Target names; several names mean tuple unpacking.
    pub targets: Vec<String>,
    /// The defining expression source.
    pub expr_source: String,
}

/// A parsed `tal:repeat` specification.
#[derive(Debug, Clone, PartialEq)]
pub struct RepeatSpec {
    /// Loop variable names; several names mean tuple unpacking.
    pub targets: Vec<String>,
    /// The iterable expression source.
    pub expr_source: String,
}

/// A parsed `tal:content` / `tal:replace` / `tal:on-error` payload.
#[derive(Debug, Clone, PartialEq)]
pub struct InsertionSpec {
    /// True for the `structure` insertion mode.
    pub structure: bool,
    /// The expression source.
    pub expr_source: String,
}

/// One parsed `tal:attributes` item.
#[derive(Debug, Clone, PartialEq)]
pub struct AttrItem {
    /// The attribute name; `None` for a whole-mapping contribution.
    pub name: Option<String>,
    /// The expression source.
    pub expr_source: String,
}

fn is_identifier(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .enumerate()
            .all(|(i, c)| c == '_' || if i == 0 { c.is_alphabetic() } else { c.is_alphanumeric() })
}

fn looks_like_attr_name(s: &str) -> bool {
    !s.is_empty()
        && s.chars().next().map(|c| c.is_alphabetic() || c == '_' || c == ':').unwrap_or(false)
        && s.chars()
            .all(|c| c.is_alphanumeric() || matches!(c, '_' | ':' | '-' | '.'))
}

/// Splits `(a, b, c) expr` into targets and expression, or a single
/// `name expr`. The star form is not supported.
fn parse_targets<'a>(item: &'a str, span: Span, what: &str) -> Result<(Vec<String>, &'a str)> {
    let item = item.trim();
    if let Some(rest) = item.strip_prefix('(') {
        let close = rest.find(')').ok_or_else(|| {
            TalError::language(format!("unclosed target tuple in {}", what), span.line, span.column)
        })?;
        let names: Vec<String> = rest[..close]
            .split(',')
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .collect();
        if names.is_empty() {
            return Err(TalError::language(
                format!("empty target tuple in {}", what),
                span.line,
                span.column,
            ));
        }
        for name in &names {
            if name.starts_with('*') {
                return Err(TalError::language(
                    format!("star unpacking is not supported in {}", what),
                    span.line,
                    span.column,
                ));
            }
            if !is_identifier(name) {
                return Err(TalError::language(
                    format!("invalid target name {:?} in {}", name, what),
                    span.line,
                    span.column,
                ));
            }
        }
        Ok((names, rest[close + 1..].trim_start()))
    } else {
        let mut split = item.splitn(2, char::is_whitespace);
        let name = split.next().unwrap_or_default();
        let rest = split.next().unwrap_or_default().trim_start();
        if !is_identifier(name) {
            return Err(TalError::language(
                format!("invalid target name {:?} in {}", name, what),
                span.line,
                span.column,
            ));
        }
        Ok((vec![name.to_string()], rest))
    }
}

/// Rejects defines that target builtins or compiler-internal names.
///
/// Collisions are compile-time errors in strict mode, silently
/// shadowed otherwise.
pub fn check_define_targets(targets: &[String], settings: &Settings, span: Span) -> Result<()> {
    if !settings.strict {
        return Ok(());
    }
    for name in targets {
        let is_builtin = Builtin::all().iter().any(|b| b.name() == name)
            || matches!(name.as_str(), "default" | "nothing" | "repeat");
        if is_builtin || RESERVED_NAMES.contains(&name.as_str()) {
            return Err(TalError::language(
                format!("cannot redefine reserved name '{}'", name),
                span.line,
                span.column,
            ));
        }
    }
    Ok(())
}

/// Parses a `tal:define` payload.
pub fn parse_define_payload(
    payload: &str,
    settings: &Settings,
    span: Span,
) -> Result<Vec<DefineItem>> {
    let mut items = Vec::new();
    for raw in split_statement_items(payload) {
        let (scope, rest) = if let Some(rest) = raw.strip_prefix("global ") {
            (DefineScope::Global, rest)
        } else if let Some(rest) = raw.strip_prefix("local ") {
            (DefineScope::Local, rest)
        } else {
            (DefineScope::Local, raw.as_str())
        };
        let (targets, expr_source) = parse_targets(rest, span, "tal:define")?;
        if expr_source.is_empty() {
            return Err(TalError::language(
                "tal:define item is missing an expression",
                span.line,
                span.column,
            ));
        }
        check_define_targets(&targets, settings, span)?;
        items.push(DefineItem {
            scope,
            targets,
            expr_source: expr_source.to_string(),
        });
    }
    if items.is_empty() {
        return Err(TalError::language(
            "empty tal:define",
            span.line,
            span.column,
        ));
    }
    Ok(items)
}

/// Parses a `tal:repeat` payload.
pub fn parse_repeat_payload(payload: &str, settings: &Settings, span: Span) -> Result<RepeatSpec> {
    let (targets, expr_source) = parse_targets(payload, span, "tal:repeat")?;
    if expr_source.is_empty() {
        return Err(TalError::language(
            "tal:repeat is missing an expression",
            span.line,
            span.column,
        ));
    }
    check_define_targets(&targets, settings, span)?;
    Ok(RepeatSpec {
        targets,
        expr_source: expr_source.to_string(),
    })
}

/// Parses a `text`/`structure` insertion payload.
pub fn parse_insertion_payload(payload: &str, span: Span) -> Result<InsertionSpec> {
    let trimmed = payload.trim();
    let (structure, rest) = if let Some(rest) = trimmed.strip_prefix("structure ") {
        (true, rest)
    } else if let Some(rest) = trimmed.strip_prefix("text ") {
        (false, rest)
    } else {
        (false, trimmed)
    };
    let expr_source = rest.trim();
    if expr_source.is_empty() {
        return Err(TalError::language(
            "insertion statement is missing an expression",
            span.line,
            span.column,
        ));
    }
    Ok(InsertionSpec {
        structure,
        expr_source: expr_source.to_string(),
    })
}

/// Parses a `tal:attributes` payload.
///
/// Items are `name expr` pairs; an item whose first word is not an
/// attribute name contributes a whole mapping.
pub fn parse_attributes_payload(payload: &str, span: Span) -> Result<Vec<AttrItem>> {
    let mut items = Vec::new();
    for raw in split_statement_items(payload) {
        let mut split = raw.splitn(2, char::is_whitespace);
        let first = split.next().unwrap_or_default();
        let rest = split.next().unwrap_or_default().trim_start();
        if looks_like_attr_name(first) && !rest.is_empty() {
            items.push(AttrItem {
                name: Some(first.to_string()),
                expr_source: rest.to_string(),
            });
        } else {
            items.push(AttrItem {
                name: None,
                expr_source: raw.clone(),
            });
        }
    }
    if items.is_empty() {
        return Err(TalError::language(
            "empty tal:attributes",
            span.line,
            span.column,
        ));
    }
    Ok(items)
}

/// Parses an `i18n:attributes` payload into `(attribute, msgid)` pairs.
pub fn parse_i18n_attributes_payload(payload: &str) -> Vec<(String, Option<String>)> {
    split_statement_items(payload)
        .into_iter()
        .map(|item| {
            let mut split = item.splitn(2, char::is_whitespace);
            let attr = split.next().unwrap_or_default().to_string();
            let msgid = split
                .next()
                .map(|m| m.trim().to_string())
                .filter(|m| !m.is_empty());
            (attr, msgid)
        })
        .filter(|(attr, _)| !attr.is_empty())
        .collect()
}

/// Per-element statement checks that don't depend on tree position.
pub fn validate_statements(bound: &BoundStatements) -> Result<()> {
    let mut insertion_seen = false;
    for statement in &bound.statements {
        if let Statement::Content { span, .. } | Statement::Replace { span, .. } = statement {
            if insertion_seen {
                return Err(TalError::language(
                    "tal:content and tal:replace cannot appear on the same element",
                    span.line,
                    span.column,
                ));
            }
            insertion_seen = true;
        }
    }

    let locate = |name: &str| {
        bound
            .statements
            .iter()
            .find(|s| s.kind_name() == name)
            .map(statement_span)
    };
    if let (Some(_), Some(span)) = (locate("metal:use-macro"), locate("metal:extend-macro")) {
        return Err(TalError::language(
            "metal:use-macro and metal:extend-macro cannot appear on the same element",
            span.line,
            span.column,
        ));
    }
    if let (Some(span), None) = (locate("metal:extend-macro"), locate("metal:define-macro")) {
        return Err(TalError::language(
            "metal:extend-macro requires metal:define-macro on the same element",
            span.line,
            span.column,
        ));
    }
    Ok(())
}

/// The source span of any statement.
pub fn statement_span(statement: &Statement) -> Span {
    match statement {
        Statement::Define { span, .. }
        | Statement::Switch { span, .. }
        | Statement::Condition { span, .. }
        | Statement::Repeat { span, .. }
        | Statement::Case { span, .. }
        | Statement::Content { span, .. }
        | Statement::Replace { span, .. }
        | Statement::OmitTag { span, .. }
        | Statement::Attributes { span, .. }
        | Statement::OnError { span, .. }
        | Statement::DefineMacro { span, .. }
        | Statement::UseMacro { span, .. }
        | Statement::ExtendMacro { span, .. }
        | Statement::DefineSlot { span, .. }
        | Statement::FillSlot { span, .. }
        | Statement::Translate { span, .. }
        | Statement::Domain { span, .. }
        | Statement::Source { span, .. }
        | Statement::Target { span, .. }
        | Statement::Name { span, .. }
        | Statement::I18nAttributes { span, .. }
        | Statement::Data { span, .. }
        | Statement::Context { span, .. }
        | Statement::Interpolation { span, .. } => *span,
    }
}
