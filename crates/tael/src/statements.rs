// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Namespace filter and statement binder.
//!
//! Walks an element's attributes, recognizes the control namespaces
//! (TAL, METAL, I18N, META plus the engine's own default namespace) and
//! turns each control attribute into a typed [`Statement`]. Control
//! attributes and `xmlns` declarations for control namespaces are
//! stripped from the output; everything else passes through.
//!
//! The well-known prefixes work without an `xmlns` declaration, which
//! is what permissive HTML input relies on. With
//! `enable_data_attributes`, HTML5 `data-tal-*` spellings are accepted
//! as well. In strict mode an unknown name inside a control namespace
//! is a language error; otherwise the attribute passes through.

use crate::ast::{AttributeRec, Element};
use crate::config::Settings;
use crate::error::{Result, TalError};
use crate::token::Span;

/// The TAL namespace.
pub const TAL_NS: &str = "http://xml.zope.org/namespaces/tal";
/// The METAL namespace.
pub const METAL_NS: &str = "http://xml.zope.org/namespaces/metal";
/// The I18N namespace.
pub const I18N_NS: &str = "http://xml.zope.org/namespaces/i18n";
/// The META namespace.
pub const META_NS: &str = "http://xml.zope.org/namespaces/meta";
/// The engine's own namespace.
pub const TAEL_NS: &str = "http://maravilla-labs.com/namespaces/tael";

/// The control-namespace family an attribute belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlNs {
    /// Flow-control attributes.
    Tal,
    /// Macro layer.
    Metal,
    /// Translation layer.
    I18n,
    /// Compiler directives.
    Meta,
}

/// Whether a namespace URI belongs to the recognized set.
pub fn known_namespace(uri: &str) -> bool {
    matches!(
        uri,
        TAL_NS | METAL_NS | I18N_NS | META_NS | TAEL_NS
            | "http://www.w3.org/XML/1998/namespace"
            | "http://www.w3.org/1999/xhtml"
    )
}

fn ns_of_uri(uri: &str) -> Option<ControlNs> {
    match uri {
        TAL_NS | TAEL_NS => Some(ControlNs::Tal),
        METAL_NS => Some(ControlNs::Metal),
        I18N_NS => Some(ControlNs::I18n),
        META_NS => Some(ControlNs::Meta),
        _ => None,
    }
}

fn ns_of_prefix(prefix: &str) -> Option<ControlNs> {
    match prefix {
        "tal" => Some(ControlNs::Tal),
        "metal" => Some(ControlNs::Metal),
        "i18n" => Some(ControlNs::I18n),
        "meta" => Some(ControlNs::Meta),
        _ => None,
    }
}

/// A typed control statement bound to an element.
///
/// Expression payloads are raw strings at this stage; the compiler
/// parses them.
#[derive(Debug, Clone, PartialEq)]
pub enum Statement {
    /// `tal:define="[local|global] name expr; ..."`.
    Define {
        /// Raw payload.
        payload: String,
        /// Statement location.
        span: Span,
    },
    /// `tal:switch="expr"`.
    Switch {
        /// Subject expression.
        expr: String,
        /// Statement location.
        span: Span,
    },
    /// `tal:condition="expr"`.
    Condition {
        /// Condition expression.
        expr: String,
        /// Statement location.
        span: Span,
    },
    /// `tal:repeat="name expr"`.
    Repeat {
        /// Raw payload.
        payload: String,
        /// Statement location.
        span: Span,
    },
    /// `tal:case="expr"`.
    Case {
        /// Case expression.
        expr: String,
        /// Statement location.
        span: Span,
    },
    /// `tal:content="[text|structure] expr"`.
    Content {
        /// Raw payload.
        payload: String,
        /// Statement location.
        span: Span,
    },
    /// `tal:replace="[text|structure] expr"`.
    Replace {
        /// Raw payload.
        payload: String,
        /// Statement location.
        span: Span,
    },
    /// `tal:omit-tag="expr"` (empty means always omit).
    OmitTag {
        /// Condition expression, possibly empty.
        expr: String,
        /// Statement location.
        span: Span,
    },
    /// `tal:attributes="name expr; ..."`.
    Attributes {
        /// Raw payload.
        payload: String,
        /// Statement location.
        span: Span,
    },
    /// `tal:on-error="[text|structure] expr"`.
    OnError {
        /// Raw payload.
        payload: String,
        /// Statement location.
        span: Span,
    },
    /// `metal:define-macro="name"`.
    DefineMacro {
        /// Macro name.
        name: String,
        /// Statement location.
        span: Span,
    },
    /// `metal:use-macro="expr"`.
    UseMacro {
        /// Macro expression.
        expr: String,
        /// Statement location.
        span: Span,
    },
    /// `metal:extend-macro="expr"`.
    ExtendMacro {
        /// Parent macro expression.
        expr: String,
        /// Statement location.
        span: Span,
    },
    /// `metal:define-slot="name"`.
    DefineSlot {
        /// Slot name.
        name: String,
        /// Statement location.
        span: Span,
    },
    /// `metal:fill-slot="name"`.
    FillSlot {
        /// Slot name.
        name: String,
        /// Statement location.
        span: Span,
    },
    /// `i18n:translate="msgid"` (empty derives the id from content).
    Translate {
        /// Explicit message id, possibly empty.
        msgid: String,
        /// Statement location.
        span: Span,
    },
    /// `i18n:domain="name"`.
    Domain {
        /// Domain name.
        name: String,
        /// Statement location.
        span: Span,
    },
    /// `i18n:source="lang"`.
    Source {
        /// Source language.
        lang: String,
        /// Statement location.
        span: Span,
    },
    /// `i18n:target="lang"`.
    Target {
        /// Target language.
        lang: String,
        /// Statement location.
        span: Span,
    },
    /// `i18n:name="name"`.
    Name {
        /// Substitution name.
        name: String,
        /// Statement location.
        span: Span,
    },
    /// `i18n:attributes="attr msgid; ..."`.
    I18nAttributes {
        /// Raw payload.
        payload: String,
        /// Statement location.
        span: Span,
    },
    /// `i18n:data="expr"`.
    Data {
        /// Data expression.
        expr: String,
        /// Statement location.
        span: Span,
    },
    /// `i18n:context="name"`.
    Context {
        /// Message context.
        name: String,
        /// Statement location.
        span: Span,
    },
    /// `meta:interpolation="on|off"`.
    Interpolation {
        /// Whether interpolation is enabled for the subtree.
        enabled: bool,
        /// Statement location.
        span: Span,
    },
}

impl Statement {
    /// A short diagnostic name for the statement.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Statement::Define { .. } => "tal:define",
            Statement::Switch { .. } => "tal:switch",
            Statement::Condition { .. } => "tal:condition",
            Statement::Repeat { .. } => "tal:repeat",
            Statement::Case { .. } => "tal:case",
            Statement::Content { .. } => "tal:content",
            Statement::Replace { .. } => "tal:replace",
            Statement::OmitTag { .. } => "tal:omit-tag",
            Statement::Attributes { .. } => "tal:attributes",
            Statement::OnError { .. } => "tal:on-error",
            Statement::DefineMacro { .. } => "metal:define-macro",
            Statement::UseMacro { .. } => "metal:use-macro",
            Statement::ExtendMacro { .. } => "metal:extend-macro",
            Statement::DefineSlot { .. } => "metal:define-slot",
            Statement::FillSlot { .. } => "metal:fill-slot",
            Statement::Translate { .. } => "i18n:translate",
            Statement::Domain { .. } => "i18n:domain",
            Statement::Source { .. } => "i18n:source",
            Statement::Target { .. } => "i18n:target",
            Statement::Name { .. } => "i18n:name",
            Statement::I18nAttributes { .. } => "i18n:attributes",
            Statement::Data { .. } => "i18n:data",
            Statement::Context { .. } => "i18n:context",
            Statement::Interpolation { .. } => "meta:interpolation",
        }
    }
}

/// The binder's result for one element.
#[derive(Debug, Clone, Default)]
pub struct BoundStatements {
    /// Recognized statements, in source order.
    pub statements: Vec<Statement>,
    /// Indices (into the element's attribute list) stripped from the
    /// output: control attributes and control `xmlns` declarations.
    pub stripped: Vec<usize>,
}

impl BoundStatements {
    /// Finds the single statement matched by the predicate.
    pub fn find<F: Fn(&Statement) -> bool>(&self, pred: F) -> Option<&Statement> {
        self.statements.iter().find(|s| pred(s))
    }
}

/// Whether an element is itself in a control namespace
/// (`<tal:block>`-style), which implies tag omission and lets its
/// unprefixed attributes bind as statements.
pub fn element_control_ns(el: &Element) -> Option<ControlNs> {
    if let Some(uri) = &el.name.ns_uri {
        if let Some(ns) = ns_of_uri(uri) {
            return Some(ns);
        }
    }
    el.name.prefix.as_deref().and_then(ns_of_prefix)
}

fn classify(attr: &AttributeRec, el_ns: Option<ControlNs>, settings: &Settings) -> Option<(ControlNs, String)> {
    if let Some(uri) = &attr.name.ns_uri {
        if let Some(ns) = ns_of_uri(uri) {
            return Some((ns, attr.name.local.clone()));
        }
    }
    if let Some(prefix) = &attr.name.prefix {
        if attr.name.ns_uri.is_none() {
            if let Some(ns) = ns_of_prefix(prefix) {
                return Some((ns, attr.name.local.clone()));
            }
        }
    }
    if settings.enable_data_attributes && attr.name.prefix.is_none() {
        for (marker, ns) in [
            ("data-tal-", ControlNs::Tal),
            ("data-metal-", ControlNs::Metal),
            ("data-i18n-", ControlNs::I18n),
            ("data-meta-", ControlNs::Meta),
        ] {
            if let Some(local) = attr.raw_name.strip_prefix(marker) {
                return Some((ns, local.to_string()));
            }
        }
    }
    // On a control element, unprefixed statement names bind to the
    // element's own namespace.
    if attr.name.prefix.is_none() {
        if let Some(ns) = el_ns {
            if local_is_known(ns, &attr.name.local) {
                return Some((ns, attr.name.local.clone()));
            }
        }
    }
    None
}

fn local_is_known(ns: ControlNs, local: &str) -> bool {
    let locals: &[&str] = match ns {
        ControlNs::Tal => &[
            "define",
            "switch",
            "condition",
            "repeat",
            "case",
            "content",
            "replace",
            "omit-tag",
            "attributes",
            "on-error",
        ],
        ControlNs::Metal => &[
            "define-macro",
            "use-macro",
            "extend-macro",
            "define-slot",
            "fill-slot",
        ],
        ControlNs::I18n => &[
            "translate",
            "domain",
            "source",
            "target",
            "name",
            "attributes",
            "data",
            "context",
        ],
        ControlNs::Meta => &["interpolation"],
    };
    locals.contains(&local)
}

fn make_statement(
    ns: ControlNs,
    local: &str,
    value: &str,
    span: Span,
) -> Option<Statement> {
    let value = value.to_string();
    let statement = match (ns, local) {
        (ControlNs::Tal, "define") => Statement::Define {
            payload: value,
            span,
        },
        (ControlNs::Tal, "switch") => Statement::Switch { expr: value, span },
        (ControlNs::Tal, "condition") => Statement::Condition { expr: value, span },
        (ControlNs::Tal, "repeat") => Statement::Repeat {
            payload: value,
            span,
        },
        (ControlNs::Tal, "case") => Statement::Case { expr: value, span },
        (ControlNs::Tal, "content") => Statement::Content {
            payload: value,
            span,
        },
        (ControlNs::Tal, "replace") => Statement::Replace {
            payload: value,
            span,
        },
        (ControlNs::Tal, "omit-tag") => Statement::OmitTag { expr: value, span },
        (ControlNs::Tal, "attributes") => Statement::Attributes {
            payload: value,
            span,
        },
        (ControlNs::Tal, "on-error") => Statement::OnError {
            payload: value,
            span,
        },
        (ControlNs::Metal, "define-macro") => Statement::DefineMacro {
            name: value.trim().to_string(),
            span,
        },
        (ControlNs::Metal, "use-macro") => Statement::UseMacro { expr: value, span },
        (ControlNs::Metal, "extend-macro") => Statement::ExtendMacro { expr: value, span },
        (ControlNs::Metal, "define-slot") => Statement::DefineSlot {
            name: value.trim().to_string(),
            span,
        },
        (ControlNs::Metal, "fill-slot") => Statement::FillSlot {
            name: value.trim().to_string(),
            span,
        },
        (ControlNs::I18n, "translate") => Statement::Translate {
            msgid: value.trim().to_string(),
            span,
        },
        (ControlNs::I18n, "domain") => Statement::Domain {
            name: value.trim().to_string(),
            span,
        },
        (ControlNs::I18n, "source") => Statement::Source {
            lang: value.trim().to_string(),
            span,
        },
        (ControlNs::I18n, "target") => Statement::Target {
            lang: value.trim().to_string(),
            span,
        },
        (ControlNs::I18n, "name") => Statement::Name {
            name: value.trim().to_string(),
            span,
        },
        (ControlNs::I18n, "attributes") => Statement::I18nAttributes {
            payload: value,
            span,
        },
        (ControlNs::I18n, "data") => Statement::Data { expr: value, span },
        (ControlNs::I18n, "context") => Statement::Context {
            name: value.trim().to_string(),
            span,
        },
        (ControlNs::Meta, "interpolation") => {
            let enabled = match value.trim() {
                "on" | "true" => true,
                "off" | "false" => false,
                _ => return None,
            };
            Statement::Interpolation { enabled, span }
        }
        _ => return None,
    };
    Some(statement)
}

/// Extracts the control statements of an element.
///
/// # Errors
///
/// - A duplicated statement on one element is a language error.
/// - In strict mode, an unknown name inside a control namespace is a
///   language error; non-strict mode passes the attribute through.
/// - With `restricted_namespace`, an attribute namespace outside the
///   recognized set is a language error.
pub fn bind(el: &Element, settings: &Settings) -> Result<BoundStatements> {
    let el_ns = element_control_ns(el);
    let mut bound = BoundStatements::default();

    for (index, attr) in el.attributes.iter().enumerate() {
        // xmlns declarations for control namespaces never reach output.
        if attr.raw_name == "xmlns" || attr.raw_name.starts_with("xmlns:") {
            if ns_of_uri(&attr.value).is_some() {
                bound.stripped.push(index);
            } else if settings.restricted_namespace
                && !attr.value.is_empty()
                && !known_namespace(&attr.value)
            {
                return Err(TalError::language(
                    format!("namespace not allowed here: {}", attr.value),
                    attr.span.line,
                    attr.span.column,
                ));
            }
            continue;
        }

        let Some((ns, local)) = classify(attr, el_ns, settings) else {
            if settings.restricted_namespace {
                if let Some(uri) = &attr.name.ns_uri {
                    if !known_namespace(uri) {
                        return Err(TalError::language(
                            format!("namespace not allowed here: {}", uri),
                            attr.span.line,
                            attr.span.column,
                        ));
                    }
                }
            }
            continue;
        };

        match make_statement(ns, &local, &attr.value, attr.span) {
            Some(statement) => {
                if bound
                    .statements
                    .iter()
                    .any(|s| s.kind_name() == statement.kind_name())
                {
                    return Err(TalError::language(
                        format!("duplicate {} statement", statement.kind_name()),
                        attr.span.line,
                        attr.span.column,
                    ));
                }
                bound.statements.push(statement);
                bound.stripped.push(index);
            }
            None => {
                if settings.strict {
                    return Err(TalError::language(
                        format!("unknown control attribute '{}'", attr.raw_name),
                        attr.span.line,
                        attr.span.column,
                    ));
                }
                // Non-strict: pass through to the output.
            }
        }
    }

    Ok(bound)
}

/// Splits a multi-statement attribute payload on `;`.
///
/// `;;` is the escaped literal semicolon and does not split.
pub fn split_statement_items(payload: &str) -> Vec<String> {
    let mut items = Vec::new();
    let mut current = String::new();
    let chars: Vec<char> = payload.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        if chars[i] == ';' {
            if chars.get(i + 1) == Some(&';') {
                current.push(';');
                i += 2;
                continue;
            }
            items.push(std::mem::take(&mut current));
            i += 1;
        } else {
            current.push(chars[i]);
            i += 1;
        }
    }
    items.push(current);
    items
        .into_iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::Node;
    use crate::parser::parse;

    fn first_element(source: &str) -> Element {
        let doc = parse(source).unwrap();
        for node in doc.nodes {
            if let Node::Element(el) = node {
                return el;
            }
        }
        panic!("no element in {:?}", source);
    }

    #[test]
    fn test_binds_well_known_prefixes_without_xmlns() {
        let el = first_element(r#"<p tal:content="x" i18n:translate="">y</p>"#);
        let bound = bind(&el, &Settings::default()).unwrap();
        assert_eq!(bound.statements.len(), 2);
        assert!(matches!(bound.statements[0], Statement::Content { .. }));
        assert!(matches!(bound.statements[1], Statement::Translate { .. }));
        assert_eq!(bound.stripped, vec![0, 1]);
    }

    #[test]
    fn test_declared_namespace_binding() {
        let el = first_element(
            r#"<p xmlns:t="http://xml.zope.org/namespaces/tal" t:condition="x">y</p>"#,
        );
        let bound = bind(&el, &Settings::default()).unwrap();
        assert!(matches!(bound.statements[0], Statement::Condition { .. }));
        // Both the declaration and the statement are stripped.
        assert_eq!(bound.stripped, vec![0, 1]);
    }

    #[test]
    fn test_duplicate_statement_is_an_error() {
        let el = first_element(r#"<p tal:content="x" tal:content="y">z</p>"#);
        assert!(bind(&el, &Settings::default()).is_err());
    }

    #[test]
    fn test_unknown_control_attribute() {
        let el = first_element(r#"<p tal:bogus="x">y</p>"#);
        // Non-strict: passes through.
        let bound = bind(&el, &Settings::default()).unwrap();
        assert!(bound.statements.is_empty());
        assert!(bound.stripped.is_empty());
        // Strict: compile error.
        let mut strict = Settings::default();
        strict.strict = true;
        assert!(bind(&el, &strict).is_err());
    }

    #[test]
    fn test_data_attributes_mode() {
        let el = first_element(r#"<p data-tal-content="x">y</p>"#);
        assert!(bind(&el, &Settings::default())
            .unwrap()
            .statements
            .is_empty());

        let mut settings = Settings::default();
        settings.enable_data_attributes = true;
        let bound = bind(&el, &settings).unwrap();
        assert!(matches!(bound.statements[0], Statement::Content { .. }));
    }

    #[test]
    fn test_control_element_unprefixed_attributes() {
        let el = first_element(r#"<tal:block repeat="i items">x</tal:block>"#);
        let bound = bind(&el, &Settings::default()).unwrap();
        assert!(matches!(bound.statements[0], Statement::Repeat { .. }));
        assert_eq!(element_control_ns(&el), Some(ControlNs::Tal));
    }

    #[test]
    fn test_meta_interpolation_values() {
        let el = first_element(r#"<div meta:interpolation="off">x</div>"#);
        let bound = bind(&el, &Settings::default()).unwrap();
        assert!(matches!(
            bound.statements[0],
            Statement::Interpolation { enabled: false, .. }
        ));
    }

    #[test]
    fn test_semicolon_splitting() {
        assert_eq!(
            split_statement_items("a x; b y"),
            vec!["a x".to_string(), "b y".to_string()]
        );
        assert_eq!(
            split_statement_items("msg 'a;;b'; other c"),
            vec!["msg 'a;b'".to_string(), "other c".to_string()]
        );
        assert_eq!(split_statement_items("  one  "), vec!["one".to_string()]);
    }

    #[test]
    fn test_restricted_namespace() {
        let mut settings = Settings::default();
        settings.restricted_namespace = true;
        let el = first_element(
            r#"<p xmlns:odd="http://example.com/unknown" odd:x="1">y</p>"#,
        );
        assert!(bind(&el, &settings).is_err());
    }
}
