// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Markup tokenizer.
//!
//! A single-pass scanner over decoded template text. The scanner
//! recognizes angle-bracket structures, attribute values quoted by either
//! single or double quotes, unquoted attribute values, entity references,
//! CDATA blocks, processing instructions (including `<?python ... ?>`
//! code blocks), comments (including the drop variant `<!--! ... -->` and
//! the verbatim variant `<!--? ... -->`), doctypes and XML declarations.
//!
//! Every token carries an exact source slice (byte offsets plus line and
//! column) so that every later diagnostic can cite literal template text,
//! and so that re-serializing the token stream reproduces the source
//! byte-for-byte.

use crate::error::{Result, TalError};
use serde::{Deserialize, Serialize};

/// Source location information for error reporting and lossless output.
///
/// Tracks the position of a syntax element within the source template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    /// Byte offset from the start of the source.
    pub start: usize,
    /// Byte offset of the end (exclusive).
    pub end: usize,
    /// 1-indexed line number of the start.
    pub line: usize,
    /// 1-indexed column number of the start.
    pub column: usize,
}

impl Span {
    /// Creates a new source span.
    pub fn new(start: usize, end: usize, line: usize, column: usize) -> Self {
        Self {
            start,
            end,
            line,
            column,
        }
    }

    /// The source text this span covers.
    pub fn text<'a>(&self, source: &'a str) -> &'a str {
        &source[self.start..self.end]
    }

    /// Whether this span fully contains another span.
    pub fn contains(&self, other: &Span) -> bool {
        self.start <= other.start && other.end <= self.end
    }
}

/// The comment flavor, selected by the character after `<!--`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommentVariant {
    /// A regular comment, kept in the output (and interpolated unless
    /// comment interpolation is disabled).
    Standard,
    /// `<!--! ... -->`: dropped from the output entirely.
    Drop,
    /// `<!--? ... -->`: kept verbatim, never interpolated.
    Verbatim,
}

/// A lexical token.
///
/// Tagged variant per recognized structure. Payload spans point into the
/// same source string as the token's own span.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    /// `<name` opening a start tag. Payload is the tag-name span.
    StartTagOpen { name: Span },
    /// One attribute inside a start tag, leading whitespace included.
    Attribute {
        /// Span of the attribute name.
        name: Span,
        /// Span of the value text between the quotes (or the bare word).
        value: Option<Span>,
        /// The quote character, if the value was quoted.
        quote: Option<char>,
    },
    /// `>` or `/>` closing a start tag, leading whitespace included.
    TagClose {
        /// True for `/>`.
        self_closing: bool,
    },
    /// `</name>`. Payload is the tag-name span.
    EndTag { name: Span },
    /// A run of character data between markup.
    Text,
    /// `<!-- ... -->` in one of its three variants.
    Comment { variant: CommentVariant },
    /// `<?target ... ?>`. Payload is the target-name span.
    ProcessingInstruction { target: Span },
    /// `<![CDATA[ ... ]]>`.
    CData,
    /// `<!DOCTYPE ... >`.
    Doctype,
    /// `<?xml ... ?>`.
    XmlDeclaration,
    /// `&name;` or `&#nn;` in text flow.
    EntityRef,
}

/// A token with its exact source slice.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    /// What was recognized.
    pub kind: TokenKind,
    /// The exact source slice of the whole token.
    pub span: Span,
}

impl Token {
    /// The source text of this token.
    pub fn text<'a>(&self, source: &'a str) -> &'a str {
        self.span.text(source)
    }
}

/// Whitespace accepted anywhere whitespace may appear.
#[inline]
pub(crate) fn is_ws(c: char) -> bool {
    matches!(c, ' ' | '\t' | '\r' | '\n')
}

fn is_name_start(c: char) -> bool {
    c.is_alphabetic() || c == '_' || c == ':'
}

fn is_name_char(c: char) -> bool {
    c.is_alphanumeric() || matches!(c, '_' | ':' | '-' | '.')
}

/// Tokenizes template source into a stream of [`Token`]s.
///
/// The concatenation of all token slices reproduces the input exactly.
///
/// # Errors
///
/// Returns a [`TalError::ParseError`] citing the literal input on
/// malformed comments, unterminated structures and bad tag syntax.
pub fn tokenize(source: &str) -> Result<Vec<Token>> {
    Tokenizer::new(source).run()
}

struct Tokenizer<'a> {
    src: &'a str,
    pos: usize,
    line: usize,
    column: usize,
    tokens: Vec<Token>,
}

impl<'a> Tokenizer<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            pos: 0,
            line: 1,
            column: 1,
            tokens: Vec::new(),
        }
    }

    fn rest(&self) -> &'a str {
        &self.src[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn starts_with(&self, pat: &str) -> bool {
        self.rest().starts_with(pat)
    }

    /// Advances the cursor to `new_pos`, updating line/column.
    fn bump_to(&mut self, new_pos: usize) {
        debug_assert!(new_pos >= self.pos && new_pos <= self.src.len());
        for c in self.src[self.pos..new_pos].chars() {
            if c == '\n' {
                self.line += 1;
                self.column = 1;
            } else {
                self.column += 1;
            }
        }
        self.pos = new_pos;
    }

    fn mark(&self) -> (usize, usize, usize) {
        (self.pos, self.line, self.column)
    }

    fn span_from(&self, mark: (usize, usize, usize)) -> Span {
        Span::new(mark.0, self.pos, mark.1, mark.2)
    }

    fn push(&mut self, kind: TokenKind, mark: (usize, usize, usize)) {
        let span = self.span_from(mark);
        self.tokens.push(Token { kind, span });
    }

    fn error(&self, message: impl Into<String>) -> TalError {
        TalError::parse(message, self.line, self.column)
    }

    /// Finds `pat` at or after the cursor; returns its byte offset.
    fn find(&self, pat: &str) -> Option<usize> {
        self.rest().find(pat).map(|i| self.pos + i)
    }

    fn run(mut self) -> Result<Vec<Token>> {
        while self.pos < self.src.len() {
            if self.starts_with("<") {
                self.scan_markup()?;
            } else {
                self.scan_text();
            }
        }
        Ok(self.tokens)
    }

    /// Scans character data up to the next `<`, splitting out entity
    /// references as their own tokens.
    fn scan_text(&mut self) {
        let mut mark = self.mark();
        while let Some(c) = self.peek() {
            if c == '<' {
                break;
            }
            if c == '&' {
                if let Some(entity_end) = self.entity_end() {
                    if self.pos > mark.0 {
                        self.push(TokenKind::Text, mark);
                    }
                    let entity_mark = self.mark();
                    self.bump_to(entity_end);
                    self.push(TokenKind::EntityRef, entity_mark);
                    mark = self.mark();
                    continue;
                }
            }
            self.bump_to(self.pos + c.len_utf8());
        }
        if self.pos > mark.0 {
            self.push(TokenKind::Text, mark);
        }
    }

    /// If the cursor sits on a well-formed entity reference, returns the
    /// offset just past its `;`.
    fn entity_end(&self) -> Option<usize> {
        let rest = self.rest();
        let mut chars = rest.char_indices().skip(1).peekable();
        let (_, first) = chars.peek().copied()?;
        if first == '#' {
            chars.next();
        } else if !first.is_alphabetic() {
            return None;
        }
        for (i, c) in chars {
            if c == ';' {
                // An entity needs at least one character between & and ;
                return if i > 1 { Some(self.pos + i + 1) } else { None };
            }
            if !c.is_alphanumeric() {
                return None;
            }
            if i > 16 {
                return None;
            }
        }
        None
    }

    fn scan_markup(&mut self) -> Result<()> {
        if self.starts_with("<!--") {
            return self.scan_comment();
        }
        if self.starts_with("<![CDATA[") {
            return self.scan_cdata();
        }
        if self.starts_with("<!") {
            return self.scan_doctype();
        }
        if self.starts_with("<?") {
            return self.scan_pi();
        }
        if self.starts_with("</") {
            return self.scan_end_tag();
        }
        // `<` followed by a name starts a tag; a stray `<` is text.
        let after = self.src[self.pos + 1..].chars().next();
        match after {
            Some(c) if is_name_start(c) => self.scan_start_tag(),
            _ => {
                let mark = self.mark();
                self.bump_to(self.pos + 1);
                self.push(TokenKind::Text, mark);
                Ok(())
            }
        }
    }

    fn scan_comment(&mut self) -> Result<()> {
        let mark = self.mark();
        let body_start = self.pos + 4;
        let variant = match self.src[body_start..].chars().next() {
            Some('!') => CommentVariant::Drop,
            Some('?') => CommentVariant::Verbatim,
            _ => CommentVariant::Standard,
        };
        let close = self.src[body_start..]
            .find("-->")
            .map(|i| body_start + i)
            .ok_or_else(|| self.error("unterminated comment"))?;
        let body = &self.src[body_start..close];
        // Strip the variant marker before checking for the forbidden `--`.
        let body_proper = match variant {
            CommentVariant::Standard => body,
            _ => &body[1..],
        };
        if body_proper.contains("--") {
            return Err(self.error(format!("'--' not allowed inside comment: <!--{}-->", body)));
        }
        self.bump_to(close + 3);
        self.push(TokenKind::Comment { variant }, mark);
        Ok(())
    }

    fn scan_cdata(&mut self) -> Result<()> {
        let mark = self.mark();
        let close = self
            .find("]]>")
            .ok_or_else(|| self.error("unterminated CDATA section"))?;
        self.bump_to(close + 3);
        self.push(TokenKind::CData, mark);
        Ok(())
    }

    fn scan_doctype(&mut self) -> Result<()> {
        let mark = self.mark();
        // Permissive scan to `>`, honoring an internal subset in brackets.
        let mut depth = 0usize;
        let mut end = None;
        for (i, c) in self.rest().char_indices() {
            match c {
                '[' => depth += 1,
                ']' => depth = depth.saturating_sub(1),
                '>' if depth == 0 => {
                    end = Some(self.pos + i + 1);
                    break;
                }
                _ => {}
            }
        }
        let end = end.ok_or_else(|| self.error("unterminated doctype"))?;
        self.bump_to(end);
        self.push(TokenKind::Doctype, mark);
        Ok(())
    }

    fn scan_pi(&mut self) -> Result<()> {
        let mark = self.mark();
        let target_mark_pos = self.pos + 2;
        let mut target_end = target_mark_pos;
        for (i, c) in self.src[target_mark_pos..].char_indices() {
            if is_name_char(c) || is_name_start(c) {
                target_end = target_mark_pos + i + c.len_utf8();
            } else {
                break;
            }
        }
        let target = Span::new(target_mark_pos, target_end, mark.1, mark.2 + 2);
        let target_text = target.text(self.src);
        let close = self
            .find("?>")
            .ok_or_else(|| self.error("unterminated processing instruction"))?;
        self.bump_to(close + 2);
        if target_text.eq_ignore_ascii_case("xml") {
            self.push(TokenKind::XmlDeclaration, mark);
        } else {
            self.push(TokenKind::ProcessingInstruction { target }, mark);
        }
        Ok(())
    }

    fn scan_end_tag(&mut self) -> Result<()> {
        let mark = self.mark();
        self.bump_to(self.pos + 2);
        let name_mark = self.mark();
        self.scan_name()?;
        let name = self.span_from(name_mark);
        while self.peek().map(is_ws).unwrap_or(false) {
            let c = self.peek().unwrap();
            self.bump_to(self.pos + c.len_utf8());
        }
        if self.peek() != Some('>') {
            return Err(self.error(format!(
                "malformed end tag: </{}",
                name.text(self.src)
            )));
        }
        self.bump_to(self.pos + 1);
        self.push(TokenKind::EndTag { name }, mark);
        Ok(())
    }

    fn scan_name(&mut self) -> Result<()> {
        match self.peek() {
            Some(c) if is_name_start(c) => self.bump_to(self.pos + c.len_utf8()),
            _ => return Err(self.error("expected a name")),
        }
        while let Some(c) = self.peek() {
            if is_name_char(c) {
                self.bump_to(self.pos + c.len_utf8());
            } else {
                break;
            }
        }
        Ok(())
    }

    fn scan_start_tag(&mut self) -> Result<()> {
        let open_mark = self.mark();
        self.bump_to(self.pos + 1);
        let name_mark = self.mark();
        self.scan_name()?;
        let name = self.span_from(name_mark);
        self.push(TokenKind::StartTagOpen { name }, open_mark);

        loop {
            let item_mark = self.mark();
            while self.peek().map(is_ws).unwrap_or(false) {
                let c = self.peek().unwrap();
                self.bump_to(self.pos + c.len_utf8());
            }
            match self.peek() {
                None => return Err(self.error("unterminated start tag")),
                Some('>') => {
                    self.bump_to(self.pos + 1);
                    self.push(TokenKind::TagClose { self_closing: false }, item_mark);
                    return Ok(());
                }
                Some('/') => {
                    if !self.starts_with("/>") {
                        return Err(self.error("expected '/>' in start tag"));
                    }
                    self.bump_to(self.pos + 2);
                    self.push(TokenKind::TagClose { self_closing: true }, item_mark);
                    return Ok(());
                }
                Some(_) => self.scan_attribute(item_mark)?,
            }
        }
    }

    fn scan_attribute(&mut self, item_mark: (usize, usize, usize)) -> Result<()> {
        let name_mark = self.mark();
        self.scan_name()?;
        let name = self.span_from(name_mark);

        // Optional whitespace around `=`.
        let eq_probe = self.pos;
        let (eq_line, eq_col) = (self.line, self.column);
        while self.peek().map(is_ws).unwrap_or(false) {
            let c = self.peek().unwrap();
            self.bump_to(self.pos + c.len_utf8());
        }
        if self.peek() != Some('=') {
            // Minimized attribute (no value). Rewind the whitespace so it
            // belongs to the next item.
            self.pos = eq_probe;
            self.line = eq_line;
            self.column = eq_col;
            self.push(
                TokenKind::Attribute {
                    name,
                    value: None,
                    quote: None,
                },
                item_mark,
            );
            return Ok(());
        }
        self.bump_to(self.pos + 1);
        while self.peek().map(is_ws).unwrap_or(false) {
            let c = self.peek().unwrap();
            self.bump_to(self.pos + c.len_utf8());
        }

        match self.peek() {
            Some(q @ ('"' | '\'')) => {
                self.bump_to(self.pos + 1);
                let value_mark = self.mark();
                // `<` and `>` inside quoted values are accepted.
                let close = self
                    .rest()
                    .find(q)
                    .map(|i| self.pos + i)
                    .ok_or_else(|| self.error("unterminated attribute value"))?;
                self.bump_to(close);
                let value = self.span_from(value_mark);
                self.bump_to(self.pos + 1);
                self.push(
                    TokenKind::Attribute {
                        name,
                        value: Some(value),
                        quote: Some(q),
                    },
                    item_mark,
                );
            }
            Some(c) if !is_ws(c) && c != '>' => {
                // Unquoted value: runs to whitespace or tag end.
                let value_mark = self.mark();
                while let Some(c) = self.peek() {
                    if is_ws(c) || c == '>' || (c == '/' && self.starts_with("/>")) {
                        break;
                    }
                    self.bump_to(self.pos + c.len_utf8());
                }
                let value = self.span_from(value_mark);
                self.push(
                    TokenKind::Attribute {
                        name,
                        value: Some(value),
                        quote: None,
                    },
                    item_mark,
                );
            }
            _ => {
                return Err(self.error(format!(
                    "missing attribute value for '{}'",
                    name.text(self.src)
                )))
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(source: &str) -> Vec<String> {
        tokenize(source)
            .unwrap()
            .iter()
            .map(|t| t.text(source).to_string())
            .collect()
    }

    #[test]
    fn test_simple_element() {
        let source = r#"<p class="x">hi</p>"#;
        let tokens = tokenize(source).unwrap();
        assert!(matches!(tokens[0].kind, TokenKind::StartTagOpen { .. }));
        assert!(matches!(tokens[1].kind, TokenKind::Attribute { .. }));
        assert!(matches!(
            tokens[2].kind,
            TokenKind::TagClose { self_closing: false }
        ));
        assert!(matches!(tokens[3].kind, TokenKind::Text));
        assert!(matches!(tokens[4].kind, TokenKind::EndTag { .. }));
    }

    #[test]
    fn test_token_stream_is_lossless() {
        let source = "<!DOCTYPE html>\n<ul>\n  <li id='a' checked>A &amp; B</li>\n  <br />\n</ul>\n<!-- note -->";
        assert_eq!(texts(source).join(""), source);
    }

    #[test]
    fn test_attribute_value_spans() {
        let source = r#"<a href="/x?a=<1>">k</a>"#;
        let tokens = tokenize(source).unwrap();
        let TokenKind::Attribute { value, quote, .. } = &tokens[1].kind else {
            panic!("expected attribute token");
        };
        assert_eq!(value.unwrap().text(source), "/x?a=<1>");
        assert_eq!(*quote, Some('"'));
    }

    #[test]
    fn test_comment_variants() {
        let source = "<!-- a --><!--! b --><!--? c -->";
        let tokens = tokenize(source).unwrap();
        let variants: Vec<_> = tokens
            .iter()
            .map(|t| match t.kind {
                TokenKind::Comment { variant } => variant,
                _ => panic!("expected comment"),
            })
            .collect();
        assert_eq!(
            variants,
            vec![
                CommentVariant::Standard,
                CommentVariant::Drop,
                CommentVariant::Verbatim
            ]
        );
    }

    #[test]
    fn test_double_hyphen_in_comment_is_an_error() {
        let err = tokenize("<!-- a -- b -->").unwrap_err();
        assert!(err.to_string().contains("--"));
    }

    #[test]
    fn test_python_code_block_pi() {
        let source = "<?python x = 1 ?><?xml version=\"1.0\"?>";
        let tokens = tokenize(source).unwrap();
        let TokenKind::ProcessingInstruction { target } = tokens[0].kind else {
            panic!("expected PI");
        };
        assert_eq!(target.text(source), "python");
        assert!(matches!(tokens[1].kind, TokenKind::XmlDeclaration));
    }

    #[test]
    fn test_entity_reference_in_text() {
        let source = "a &amp; b &#160; c & d";
        let tokens = tokenize(source).unwrap();
        let entities: Vec<_> = tokens
            .iter()
            .filter(|t| matches!(t.kind, TokenKind::EntityRef))
            .map(|t| t.text(source))
            .collect();
        assert_eq!(entities, vec!["&amp;", "&#160;"]);
        // The bare ampersand stays in text.
        assert_eq!(texts(source).join(""), source);
    }

    #[test]
    fn test_cdata_and_doctype() {
        let source = "<![CDATA[ <raw> ]]><!DOCTYPE doc [ <!ENTITY x \"y\"> ]>";
        let tokens = tokenize(source).unwrap();
        assert!(matches!(tokens[0].kind, TokenKind::CData));
        assert!(matches!(tokens[1].kind, TokenKind::Doctype));
        assert_eq!(texts(source).join(""), source);
    }

    #[test]
    fn test_unquoted_and_minimized_attributes() {
        let source = "<input type=checkbox checked>";
        let tokens = tokenize(source).unwrap();
        let TokenKind::Attribute { value, quote, .. } = &tokens[1].kind else {
            panic!();
        };
        assert_eq!(value.unwrap().text(source), "checkbox");
        assert_eq!(*quote, None);
        let TokenKind::Attribute { value, .. } = &tokens[2].kind else {
            panic!();
        };
        assert!(value.is_none());
    }

    #[test]
    fn test_unterminated_tag_is_an_error() {
        assert!(tokenize("<p class=\"x\"").is_err());
        assert!(tokenize("<!-- never closed").is_err());
    }

    #[test]
    fn test_spans_carry_line_and_column() {
        let source = "<p>\n  <b>x</b>\n</p>";
        let tokens = tokenize(source).unwrap();
        let b_open = tokens
            .iter()
            .find(|t| matches!(t.kind, TokenKind::StartTagOpen { name } if name.text(source) == "b"))
            .unwrap();
        assert_eq!(b_open.span.line, 2);
        assert_eq!(b_open.span.column, 3);
    }
}
