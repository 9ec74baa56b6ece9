// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Translation interface.
//!
//! The engine does not ship a translation backend; it consumes one
//! through the [`Translator`] trait. The renderer invokes it for
//! `i18n:translate` captures, translated attributes and message-like
//! inserted values, then substitutes `${name}` placeholders from the
//! capture mapping into the result.

use crate::value::{Value, ValueMap};
use std::collections::HashMap;

/// Translation metadata attached to a message-like object.
///
/// Objects exposed to expressions may carry one of these (see
/// [`crate::value::ObjectValue::message`]); the renderer then routes
/// the object through the translation callable instead of plain
/// stringification.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MessageDescriptor {
    /// The message identifier.
    pub id: String,
    /// Translation domain.
    pub domain: Option<String>,
    /// Default text when no translation exists.
    pub default: Option<String>,
    /// `${name}` substitutions.
    pub mapping: Option<ValueMap>,
    /// Message context (disambiguator).
    pub context: Option<String>,
}

impl MessageDescriptor {
    /// Creates a descriptor with just an id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }
}

/// A translation callable.
///
/// Must be re-entrant: parallel renders may invoke it concurrently.
/// Returning `None` means "no translation"; the caller falls back to
/// the default text or the message id.
pub trait Translator: Send + Sync {
    /// Translates a message id.
    #[allow(clippy::too_many_arguments)]
    fn translate(
        &self,
        msgid: &str,
        domain: Option<&str>,
        mapping: Option<&ValueMap>,
        context: Option<&str>,
        target_language: Option<&str>,
        default: Option<&str>,
    ) -> Option<String>;
}

/// The identity translator: translates nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullTranslator;

impl Translator for NullTranslator {
    fn translate(
        &self,
        _msgid: &str,
        _domain: Option<&str>,
        _mapping: Option<&ValueMap>,
        _context: Option<&str>,
        _target_language: Option<&str>,
        _default: Option<&str>,
    ) -> Option<String> {
        None
    }
}

/// A table-backed translator, keyed by `(domain, msgid)`.
///
/// Mostly useful in tests and small deployments; a real backend would
/// dispatch to a catalog by target language.
#[derive(Debug, Clone, Default)]
pub struct TableTranslator {
    entries: HashMap<(Option<String>, String), String>,
}

impl TableTranslator {
    /// Creates an empty table.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a translation in the default domain.
    pub fn insert(&mut self, msgid: impl Into<String>, text: impl Into<String>) {
        self.entries.insert((None, msgid.into()), text.into());
    }

    /// Adds a translation in a specific domain.
    pub fn insert_domain(
        &mut self,
        domain: impl Into<String>,
        msgid: impl Into<String>,
        text: impl Into<String>,
    ) {
        self.entries
            .insert((Some(domain.into()), msgid.into()), text.into());
    }
}

impl Translator for TableTranslator {
    fn translate(
        &self,
        msgid: &str,
        domain: Option<&str>,
        _mapping: Option<&ValueMap>,
        _context: Option<&str>,
        _target_language: Option<&str>,
        _default: Option<&str>,
    ) -> Option<String> {
        if let Some(domain) = domain {
            if let Some(text) = self
                .entries
                .get(&(Some(domain.to_string()), msgid.to_string()))
            {
                return Some(text.clone());
            }
        }
        self.entries.get(&(None, msgid.to_string())).cloned()
    }
}

/// Normalizes a derived message id: surrounding whitespace stripped,
/// interior runs collapsed to a single space.
pub fn normalize_msgid(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_ws = false;
    for c in text.trim().chars() {
        if c.is_whitespace() {
            in_ws = true;
        } else {
            if in_ws {
                out.push(' ');
                in_ws = false;
            }
            out.push(c);
        }
    }
    out
}

/// Substitutes `${name}` placeholders from a mapping.
///
/// Unknown names are left as written.
pub fn substitute_mapping(text: &str, mapping: &ValueMap) -> String {
    if !text.contains("${") {
        return text.to_string();
    }
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        match tail.find('}') {
            Some(end) => {
                let name = tail[2..end].trim();
                match mapping.get_str(name) {
                    Some(value) => out.push_str(&value.as_string()),
                    None => out.push_str(&tail[..end + 1]),
                }
                rest = &tail[end + 1..];
            }
            None => {
                out.push_str(tail);
                return out;
            }
        }
    }
    out.push_str(rest);
    out
}

/// Invokes the translation callable with the engine's coercion rules.
///
/// - An empty string is never translated.
/// - Numbers are stringified and used as their own message id.
/// - A message-like object contributes its own descriptor fields where
///   the call site left them unset.
/// - A `None` return falls back to the default text, then the id, with
///   `${name}` substitution applied either way.
#[allow(clippy::too_many_arguments)]
pub fn invoke_translation(
    translator: &dyn Translator,
    msgid: &Value,
    domain: Option<&str>,
    mapping: Option<&ValueMap>,
    context: Option<&str>,
    target_language: Option<&str>,
    default: Option<&str>,
) -> String {
    let descriptor = match msgid {
        Value::Object(obj) => obj.message(),
        _ => None,
    };

    let id = match (&descriptor, msgid) {
        (Some(d), _) => d.id.clone(),
        (None, other) => other.as_string(),
    };
    if id.is_empty() {
        return String::new();
    }

    let own = descriptor.unwrap_or_default();
    let domain = domain.or(own.domain.as_deref());
    let context = context.or(own.context.as_deref());
    let default = default.or(own.default.as_deref());
    let merged_mapping: Option<&ValueMap> = mapping.or(own.mapping.as_ref());

    let translated = translator.translate(
        &id,
        domain,
        merged_mapping,
        context,
        target_language,
        default,
    );
    let text = translated.unwrap_or_else(|| default.unwrap_or(&id).to_string());
    match merged_mapping {
        Some(mapping) => substitute_mapping(&text, mapping),
        None => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_msgid() {
        assert_eq!(normalize_msgid("  Hello\n   big \t world  "), "Hello big world");
        assert_eq!(normalize_msgid(""), "");
    }

    #[test]
    fn test_substitute_mapping() {
        let mut mapping = ValueMap::new();
        mapping.insert_str("name", Value::Str("Ana".into()));
        assert_eq!(
            substitute_mapping("Hi ${name}, ${missing}!", &mapping),
            "Hi Ana, ${missing}!"
        );
    }

    #[test]
    fn test_empty_string_is_never_translated() {
        let mut table = TableTranslator::new();
        table.insert("", "should not appear");
        let out = invoke_translation(
            &table,
            &Value::Str(String::new()),
            None,
            None,
            None,
            None,
            None,
        );
        assert_eq!(out, "");
    }

    #[test]
    fn test_table_translator_domains() {
        let mut table = TableTranslator::new();
        table.insert("greet", "hello");
        table.insert_domain("fr", "greet", "bonjour");
        let out = invoke_translation(
            &table,
            &Value::Str("greet".into()),
            Some("fr"),
            None,
            None,
            None,
            None,
        );
        assert_eq!(out, "bonjour");
        let out = invoke_translation(
            &table,
            &Value::Str("greet".into()),
            None,
            None,
            None,
            None,
            None,
        );
        assert_eq!(out, "hello");
    }

    #[test]
    fn test_fallback_to_default_then_id() {
        let null = NullTranslator;
        let out = invoke_translation(
            &null,
            &Value::Str("msg-id".into()),
            None,
            None,
            None,
            None,
            Some("Default text"),
        );
        assert_eq!(out, "Default text");
        let out =
            invoke_translation(&null, &Value::Str("msg-id".into()), None, None, None, None, None);
        assert_eq!(out, "msg-id");
    }
}
