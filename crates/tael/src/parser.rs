// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Markup parser: token stream to element tree.
//!
//! The parser is permissive. Unknown namespace attributes pass through;
//! `<` and `>` inside quoted attribute values are accepted; HTML void
//! elements close themselves. Two failures are unrecoverable: `--`
//! inside a comment (rejected by the tokenizer) and an unexpected end
//! tag.
//!
//! # Encoding
//!
//! Byte input is negotiated from an explicit XML declaration, else
//! UTF-8. Decoding errors degrade to the replacement character rather
//! than failing the parse.

use crate::ast::{decode_entities, AttributeRec, Document, Element, Node, QName};
use crate::error::{Result, TalError};
use crate::token::{tokenize, Span, Token, TokenKind};
use std::collections::HashMap;

/// HTML elements that never have content and close themselves.
const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "param",
    "source", "track", "wbr",
];

/// Parses template source into a [`Document`].
pub fn parse(source: &str) -> Result<Document> {
    let tokens = tokenize(source)?;
    Parser::new(source, tokens).run()
}

/// Decodes byte input and parses it.
///
/// The encoding comes from `encoding` if given, else from an XML
/// declaration in the leading bytes, else UTF-8. Unknown encodings fall
/// back to UTF-8; malformed sequences decode to the replacement
/// character.
pub fn parse_bytes(bytes: &[u8], encoding: Option<&str>) -> Result<Document> {
    let negotiated = encoding
        .map(str::to_string)
        .or_else(|| sniff_declared_encoding(bytes));
    let text = decode_bytes(bytes, negotiated.as_deref());
    let mut doc = parse(&text)?;
    if doc.encoding.is_none() {
        doc.encoding = negotiated;
    }
    Ok(doc)
}

/// Extracts `encoding="..."` from an XML declaration in the byte prefix.
fn sniff_declared_encoding(bytes: &[u8]) -> Option<String> {
    let prefix_len = bytes.len().min(256);
    let prefix = String::from_utf8_lossy(&bytes[..prefix_len]);
    let decl_start = prefix.find("<?xml")?;
    let decl_end = prefix[decl_start..].find("?>")? + decl_start;
    let decl = &prefix[decl_start..decl_end];
    let key = decl.find("encoding")?;
    let after = &decl[key + "encoding".len()..];
    let eq = after.find('=')?;
    let rest = after[eq + 1..].trim_start();
    let quote = rest.chars().next()?;
    if quote != '"' && quote != '\'' {
        return None;
    }
    let inner = &rest[1..];
    let close = inner.find(quote)?;
    Some(inner[..close].to_string())
}

/// Decodes bytes under the negotiated encoding, degrading to
/// replacement characters on error.
fn decode_bytes(bytes: &[u8], encoding: Option<&str>) -> String {
    match encoding.map(|e| e.to_ascii_lowercase()) {
        Some(e) if e == "latin-1" || e == "iso-8859-1" || e == "latin1" => {
            bytes.iter().map(|&b| b as char).collect()
        }
        Some(e) if e == "ascii" || e == "us-ascii" => bytes
            .iter()
            .map(|&b| if b < 0x80 { b as char } else { '\u{FFFD}' })
            .collect(),
        // utf-8 and anything unrecognized
        _ => String::from_utf8_lossy(bytes).into_owned(),
    }
}

struct OpenElement {
    name: QName,
    raw_name: String,
    attributes: Vec<AttributeRec>,
    close_text: String,
    children: Vec<Node>,
    span_start: Span,
}

struct Parser<'a> {
    source: &'a str,
    tokens: Vec<Token>,
    index: usize,
    stack: Vec<OpenElement>,
    top_level: Vec<Node>,
    /// Prefix -> URI bindings, innermost last.
    ns_stack: Vec<HashMap<String, String>>,
    /// Default-namespace overrides, innermost last.
    default_ns_stack: Vec<Option<String>>,
    encoding: Option<String>,
}

impl<'a> Parser<'a> {
    fn new(source: &'a str, tokens: Vec<Token>) -> Self {
        Self {
            source,
            tokens,
            index: 0,
            stack: Vec::new(),
            top_level: Vec::new(),
            ns_stack: vec![HashMap::new()],
            default_ns_stack: vec![None],
            encoding: None,
        }
    }

    fn lookup_prefix(&self, prefix: &str) -> Option<String> {
        if prefix == "xml" {
            return Some("http://www.w3.org/XML/1998/namespace".to_string());
        }
        for frame in self.ns_stack.iter().rev() {
            if let Some(uri) = frame.get(prefix) {
                return Some(uri.clone());
            }
        }
        None
    }

    fn default_ns(&self) -> Option<String> {
        self.default_ns_stack.last().cloned().flatten()
    }

    fn push_child(&mut self, node: Node) {
        match self.stack.last_mut() {
            Some(open) => open.children.push(node),
            None => self.top_level.push(node),
        }
    }

    fn run(mut self) -> Result<Document> {
        while self.index < self.tokens.len() {
            let token = self.tokens[self.index].clone();
            self.index += 1;
            match token.kind {
                TokenKind::Text => {
                    let content = token.text(self.source).to_string();
                    self.push_child(Node::Text {
                        content,
                        span: token.span,
                    });
                }
                TokenKind::EntityRef => {
                    let text = token.text(self.source).to_string();
                    self.push_child(Node::EntityRef {
                        text,
                        span: token.span,
                    });
                }
                TokenKind::Comment { variant } => {
                    let full = token.text(self.source);
                    let mut body = &full[4..full.len() - 3];
                    if !matches!(variant, crate::token::CommentVariant::Standard) {
                        body = &body[1..];
                    }
                    self.push_child(Node::Comment {
                        body: body.to_string(),
                        variant,
                        span: token.span,
                    });
                }
                TokenKind::ProcessingInstruction { target } => {
                    let full = token.text(self.source);
                    let target_text = target.text(self.source).to_string();
                    let content = full[2 + target_text.len()..full.len() - 2].to_string();
                    self.push_child(Node::Pi {
                        target: target_text,
                        content,
                        span: token.span,
                    });
                }
                TokenKind::CData => {
                    let text = token.text(self.source).to_string();
                    self.push_child(Node::CData {
                        text,
                        span: token.span,
                    });
                }
                TokenKind::Doctype => {
                    let text = token.text(self.source).to_string();
                    self.push_child(Node::Doctype {
                        text,
                        span: token.span,
                    });
                }
                TokenKind::XmlDeclaration => {
                    let text = token.text(self.source).to_string();
                    if self.encoding.is_none() {
                        self.encoding = sniff_declared_encoding(text.as_bytes());
                    }
                    self.push_child(Node::XmlDecl {
                        text,
                        span: token.span,
                    });
                }
                TokenKind::StartTagOpen { name } => {
                    self.start_element(token.span, name)?;
                }
                TokenKind::EndTag { name } => {
                    self.end_element(token.span, name)?;
                }
                TokenKind::Attribute { .. } | TokenKind::TagClose { .. } => {
                    // Only reachable on a tokenizer bug.
                    return Err(TalError::parse(
                        "attribute outside start tag",
                        token.span.line,
                        token.span.column,
                    ));
                }
            }
        }

        if let Some(open) = self.stack.last() {
            return Err(TalError::parse(
                format!("unclosed element <{}>", open.raw_name),
                open.span_start.line,
                open.span_start.column,
            ));
        }

        Ok(Document {
            nodes: self.top_level,
            encoding: self.encoding,
        })
    }

    /// Consumes attribute and tag-close tokens following a start-tag
    /// open, resolving namespaces declared on the element itself.
    fn start_element(&mut self, open_span: Span, name_span: Span) -> Result<()> {
        let raw_name = name_span.text(self.source).to_string();

        // First pass: collect the raw attributes.
        let mut raw_attrs: Vec<(Span, Span, Option<Span>, Option<char>)> = Vec::new();
        let (close_span, self_closing) = loop {
            let token = self
                .tokens
                .get(self.index)
                .cloned()
                .ok_or_else(|| {
                    TalError::parse("unterminated start tag", open_span.line, open_span.column)
                })?;
            self.index += 1;
            match token.kind {
                TokenKind::Attribute { name, value, quote } => {
                    raw_attrs.push((token.span, name, value, quote));
                }
                TokenKind::TagClose { self_closing } => break (token.span, self_closing),
                _ => {
                    return Err(TalError::parse(
                        "malformed start tag",
                        token.span.line,
                        token.span.column,
                    ))
                }
            }
        };

        // Namespace declarations on this element take effect for the
        // element itself and everything below it.
        let mut bindings = HashMap::new();
        let mut default_override: Option<Option<String>> = None;
        for (_, name, value, _) in &raw_attrs {
            let attr_name = name.text(self.source);
            let attr_value = value
                .map(|v| decode_entities(v.text(self.source)))
                .unwrap_or_default();
            if attr_name == "xmlns" {
                default_override = Some(if attr_value.is_empty() {
                    None
                } else {
                    Some(attr_value.clone())
                });
            } else if let Some(prefix) = attr_name.strip_prefix("xmlns:") {
                bindings.insert(prefix.to_string(), attr_value.clone());
            }
        }
        self.ns_stack.push(bindings);
        let default_ns = match default_override {
            Some(over) => over,
            None => self.default_ns(),
        };
        self.default_ns_stack.push(default_ns);

        let name = self.resolve_name(&raw_name, true);

        let mut attributes = Vec::with_capacity(raw_attrs.len());
        for (attr_span, name_span, value_span, quote) in raw_attrs {
            let raw = attr_span.text(self.source).to_string();
            let attr_raw_name = name_span.text(self.source).to_string();
            let leading = self.source[attr_span.start..name_span.start].to_string();
            let (raw_value, value, has_value) = match value_span {
                Some(v) => {
                    let raw_v = v.text(self.source).to_string();
                    let decoded = decode_entities(&raw_v);
                    (raw_v, decoded, true)
                }
                None => (String::new(), String::new(), false),
            };
            attributes.push(AttributeRec {
                name: self.resolve_name(&attr_raw_name, false),
                raw_name: attr_raw_name,
                raw,
                leading,
                quote,
                raw_value,
                value,
                has_value,
                span: attr_span,
            });
        }

        let close_text = close_span.text(self.source).to_string();
        let is_void = VOID_ELEMENTS.contains(&name.local.to_ascii_lowercase().as_str());

        let open = OpenElement {
            name,
            raw_name,
            attributes,
            close_text,
            children: Vec::new(),
            span_start: open_span,
        };

        if self_closing || is_void {
            let span = Span::new(
                open_span.start,
                close_span.end,
                open_span.line,
                open_span.column,
            );
            let element = Element {
                name: open.name,
                raw_name: open.raw_name,
                attributes: open.attributes,
                children: vec![],
                close_text: open.close_text,
                self_closing,
                end_tag: None,
                span,
            };
            self.ns_stack.pop();
            self.default_ns_stack.pop();
            self.push_child(Node::Element(element));
        } else {
            self.stack.push(open);
        }
        Ok(())
    }

    fn end_element(&mut self, end_span: Span, name_span: Span) -> Result<()> {
        let end_name = name_span.text(self.source);
        let open = match self.stack.pop() {
            Some(open) if open.raw_name == end_name => open,
            Some(open) => {
                return Err(TalError::parse(
                    format!(
                        "unexpected end tag </{}>, expected </{}>",
                        end_name, open.raw_name
                    ),
                    end_span.line,
                    end_span.column,
                ))
            }
            None => {
                return Err(TalError::parse(
                    format!("unexpected end tag </{}>", end_name),
                    end_span.line,
                    end_span.column,
                ))
            }
        };

        self.ns_stack.pop();
        self.default_ns_stack.pop();

        let span = Span::new(
            open.span_start.start,
            end_span.end,
            open.span_start.line,
            open.span_start.column,
        );
        let element = Element {
            name: open.name,
            raw_name: open.raw_name,
            attributes: open.attributes,
            children: open.children,
            close_text: open.close_text,
            self_closing: false,
            end_tag: Some(end_span.text(self.source).to_string()),
            span,
        };
        self.push_child(Node::Element(element));
        Ok(())
    }

    fn resolve_name(&self, raw: &str, is_element: bool) -> QName {
        match raw.split_once(':') {
            Some((prefix, local)) if !prefix.is_empty() && !local.is_empty() => QName {
                ns_uri: self.lookup_prefix(prefix),
                prefix: Some(prefix.to_string()),
                local: local.to_string(),
            },
            _ => QName {
                prefix: None,
                local: raw.to_string(),
                // Unprefixed attribute names have no namespace.
                ns_uri: if is_element { self.default_ns() } else { None },
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::serialize_nodes;

    fn roundtrip(source: &str) -> String {
        let doc = parse(source).unwrap();
        let mut out = String::new();
        serialize_nodes(&doc.nodes, &mut out);
        out
    }

    #[test]
    fn test_roundtrip_is_lossless() {
        let sources = [
            "<p>hello</p>",
            "<ul>\n  <li class='a'>1</li>\n  <li class=\"b\">2</li>\n</ul>",
            "<br />",
            "<input type=checkbox checked>",
            "<!DOCTYPE html>\n<html><body>&amp; text</body></html>",
            "<!-- c --><!--! d --><!--? e -->",
            "<?python x = 1 ?>",
            "<a href=\"/q?x=<y>\">link</a>",
            "<div  a = '1'   b=\"2\" >x</div>",
        ];
        for source in sources {
            assert_eq!(roundtrip(source), source, "source: {}", source);
        }
    }

    #[test]
    fn test_nesting_and_spans() {
        let source = "<div><p>a</p><p>b</p></div>";
        let doc = parse(source).unwrap();
        let Node::Element(div) = &doc.nodes[0] else {
            panic!("expected element");
        };
        assert_eq!(div.children.len(), 2);
        for child in &div.children {
            assert!(div.span.contains(&child.span()));
        }
    }

    #[test]
    fn test_namespace_resolution() {
        let source = r#"<html xmlns:tal="http://xml.zope.org/namespaces/tal"><p tal:content="x">y</p></html>"#;
        let doc = parse(source).unwrap();
        let Node::Element(html) = &doc.nodes[0] else {
            panic!();
        };
        let Node::Element(p) = &html.children[0] else {
            panic!();
        };
        let attr = &p.attributes[0];
        assert_eq!(attr.name.prefix.as_deref(), Some("tal"));
        assert_eq!(attr.name.local, "content");
        assert_eq!(
            attr.name.ns_uri.as_deref(),
            Some("http://xml.zope.org/namespaces/tal")
        );
    }

    #[test]
    fn test_default_namespace_applies_to_elements_only() {
        let source = r#"<html xmlns="http://www.w3.org/1999/xhtml"><p class="c">x</p></html>"#;
        let doc = parse(source).unwrap();
        let Node::Element(html) = &doc.nodes[0] else {
            panic!();
        };
        assert_eq!(
            html.name.ns_uri.as_deref(),
            Some("http://www.w3.org/1999/xhtml")
        );
        let Node::Element(p) = &html.children[0] else {
            panic!();
        };
        assert_eq!(p.name.ns_uri.as_deref(), Some("http://www.w3.org/1999/xhtml"));
        assert_eq!(p.attributes[0].name.ns_uri, None);
    }

    #[test]
    fn test_unexpected_end_tag_is_unrecoverable() {
        assert!(parse("<div></span>").is_err());
        assert!(parse("</p>").is_err());
        assert!(parse("<div><p>x</div></p>").is_err());
    }

    #[test]
    fn test_void_elements_close_themselves() {
        let source = "<div><br><img src='x'></div>";
        let doc = parse(source).unwrap();
        let Node::Element(div) = &doc.nodes[0] else {
            panic!();
        };
        assert_eq!(div.children.len(), 2);
        assert_eq!(roundtrip(source), source);
    }

    #[test]
    fn test_encoding_negotiation_from_declaration() {
        let bytes = b"<?xml version=\"1.0\" encoding=\"latin-1\"?><p>caf\xe9</p>";
        let doc = parse_bytes(bytes, None).unwrap();
        assert_eq!(doc.encoding.as_deref(), Some("latin-1"));
        let Node::Element(p) = &doc.nodes[1] else {
            panic!();
        };
        let Node::Text { content, .. } = &p.children[0] else {
            panic!();
        };
        assert_eq!(content, "café");
    }

    #[test]
    fn test_bad_utf8_degrades_to_replacement() {
        let bytes = b"<p>a\xffb</p>";
        let doc = parse_bytes(bytes, None).unwrap();
        let Node::Element(p) = &doc.nodes[0] else {
            panic!();
        };
        let Node::Text { content, .. } = &p.children[0] else {
            panic!();
        };
        assert!(content.contains('\u{FFFD}'));
    }

    #[test]
    fn test_attribute_entities_are_decoded() {
        let source = r#"<a title="A &amp; B &lt;x&gt;">t</a>"#;
        let doc = parse(source).unwrap();
        let Node::Element(a) = &doc.nodes[0] else {
            panic!();
        };
        assert_eq!(a.attributes[0].value, "A & B <x>");
        assert_eq!(a.attributes[0].raw_value, "A &amp; B &lt;x&gt;");
    }
}
