// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Render-time support: the scope object, the repeat machinery and the
//! HTML escaping helpers.
//!
//! # Scope
//!
//! [`Scope`] layers four kinds of bindings, looked up in this order:
//! local frames (innermost first), explicit globals, render-time
//! keyword arguments, builtins. Keyword arguments shadow builtins but
//! never survive into macro invocations; locals vanish with their
//! frame. The scope is iterable so user expressions can introspect it.
//!
//! # Repeat
//!
//! Each active `tal:repeat` loop owns a [`RepeatState`] registered in
//! the [`RepeatDict`] under the loop variable's name. Entries exist
//! only while their loop runs; nested loops shadow outer entries only
//! on name collision.

use crate::error::RenderError;
use crate::value::{get_attr_with_item_fallback, values_equal, ObjectValue, Value};
use std::sync::Arc;

/// Compiler-internal names kept disjoint from user scope.
///
/// Defining one of these is a compile-time error in strict mode and a
/// silent shadow otherwise.
pub const RESERVED_NAMES: &[&str] = &["econtext", "rcontext", "translate", "decode", "convert"];

#[derive(Debug, Clone, Default)]
struct Frame {
    entries: Vec<(String, Value)>,
}

/// The layered, ordered, iterable variable scope.
#[derive(Debug, Clone, Default)]
pub struct Scope {
    builtins: Vec<(String, Value)>,
    globals: Vec<(String, Value)>,
    args: Vec<(String, Value)>,
    frames: Vec<Frame>,
}

impl Scope {
    /// Creates a scope seeded with builtins.
    pub fn new(builtins: Vec<(String, Value)>) -> Self {
        Self {
            builtins,
            globals: Vec::new(),
            args: Vec::new(),
            frames: vec![Frame::default()],
        }
    }

    /// Whether a name belongs to the non-redefinable builtin layer.
    pub fn is_builtin(&self, name: &str) -> bool {
        self.builtins.iter().any(|(n, _)| n == name)
    }

    /// Installs the render-time keyword-argument layer.
    pub fn set_args(&mut self, args: Vec<(String, Value)>) {
        self.args = args;
    }

    /// Opens a new local frame.
    pub fn push_frame(&mut self) {
        self.frames.push(Frame::default());
    }

    /// Closes the innermost local frame, dropping its bindings.
    pub fn pop_frame(&mut self) {
        self.frames.pop();
        debug_assert!(!self.frames.is_empty(), "root frame must stay");
    }

    /// Binds a name in the innermost frame.
    pub fn define_local(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        let frame = self.frames.last_mut().expect("scope has a root frame");
        for (n, v) in &mut frame.entries {
            if *n == name {
                *v = value;
                return;
            }
        }
        frame.entries.push((name, value));
    }

    /// Binds a name in the global layer.
    pub fn define_global(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        for (n, v) in &mut self.globals {
            if *n == name {
                *v = value;
                return;
            }
        }
        self.globals.push((name, value));
    }

    /// Looks a name up through the layers.
    pub fn lookup(&self, name: &str) -> Option<Value> {
        for frame in self.frames.iter().rev() {
            for (n, v) in frame.entries.iter().rev() {
                if n == name {
                    return Some(v.clone());
                }
            }
        }
        for (n, v) in self.globals.iter().rev() {
            if n == name {
                return Some(v.clone());
            }
        }
        for (n, v) in self.args.iter().rev() {
            if n == name {
                return Some(v.clone());
            }
        }
        for (n, v) in self.builtins.iter().rev() {
            if n == name {
                return Some(v.clone());
            }
        }
        None
    }

    /// Visible names, shadowed entries reported once.
    ///
    /// Order: builtins, arguments, globals, then local frames from the
    /// outside in, each layer in insertion order.
    pub fn names(&self) -> Vec<String> {
        let mut seen = Vec::new();
        let mut push = |name: &str| {
            if !seen.iter().any(|s: &String| s == name) {
                seen.push(name.to_string());
            }
        };
        for (n, _) in &self.builtins {
            push(n);
        }
        for (n, _) in &self.args {
            push(n);
        }
        for (n, _) in &self.globals {
            push(n);
        }
        for frame in &self.frames {
            for (n, _) in &frame.entries {
                push(n);
            }
        }
        seen
    }

    /// Bounded single-line previews of the non-builtin bindings, for
    /// render-error snapshots.
    pub fn snapshot(&self) -> Vec<(String, String)> {
        let mut out = Vec::new();
        for name in self.names() {
            if self.is_builtin(&name) {
                continue;
            }
            if let Some(value) = self.lookup(&name) {
                out.push((name, RenderError::preview(&value.repr())));
            }
        }
        out
    }
}

/// Loop state for one active `tal:repeat`.
///
/// The record exposes `index`, `number`, `even`, `odd`, `start`, `end`,
/// `first`, `last`, `length`, `letter`, `Letter`, `roman` and `Roman`
/// to expressions. `first` and `last` compare the current item against
/// its neighbours (grouping semantics), optionally under a dotted key
/// path via [`RepeatState::first_keyed`] / [`RepeatState::last_keyed`].
#[derive(Debug, Clone)]
pub struct RepeatState {
    /// 0-based position.
    pub index: usize,
    /// Total number of items.
    pub length: usize,
    /// The current item.
    pub item: Value,
    /// The previous item, if any.
    pub prev: Option<Value>,
    /// The next item, if any.
    pub next: Option<Value>,
}

impl RepeatState {
    /// 1-based position.
    pub fn number(&self) -> i64 {
        self.index as i64 + 1
    }

    /// True on the first iteration.
    pub fn start(&self) -> bool {
        self.index == 0
    }

    /// True on the last iteration.
    pub fn end(&self) -> bool {
        self.index + 1 == self.length
    }

    /// True when the item (under the key path) differs from its
    /// predecessor.
    pub fn first_keyed(&self, key: Option<&str>) -> bool {
        match &self.prev {
            None => true,
            Some(prev) => !keyed_equal(&self.item, prev, key),
        }
    }

    /// True when the item (under the key path) differs from its
    /// successor.
    pub fn last_keyed(&self, key: Option<&str>) -> bool {
        match &self.next {
            None => true,
            Some(next) => !keyed_equal(&self.item, next, key),
        }
    }

    /// Lowercase alphabetic rendition of the index (a, b, ..., aa).
    pub fn letter(&self) -> String {
        index_letter(self.index)
    }

    /// Lowercase roman rendition of the number.
    pub fn roman(&self) -> String {
        roman_numeral(self.number())
    }
}

fn keyed_equal(a: &Value, b: &Value, key: Option<&str>) -> bool {
    match key {
        None => values_equal(a, b),
        Some(path) => {
            let ka = follow_key_path(a, path);
            let kb = follow_key_path(b, path);
            match (ka, kb) {
                (Some(x), Some(y)) => values_equal(&x, &y),
                _ => values_equal(a, b),
            }
        }
    }
}

fn follow_key_path(value: &Value, path: &str) -> Option<Value> {
    let mut current = value.clone();
    for part in path.split('.') {
        current = get_attr_with_item_fallback(&current, part).ok()?;
    }
    Some(current)
}

/// Bijective base-26 letters: 0 is `a`, 25 is `z`, 26 is `aa`.
fn index_letter(mut index: usize) -> String {
    let mut digits = Vec::new();
    loop {
        digits.push(b'a' + (index % 26) as u8);
        index /= 26;
        if index == 0 {
            break;
        }
        index -= 1;
    }
    digits.reverse();
    String::from_utf8(digits).expect("ascii letters")
}

/// Roman numerals; values outside 1..=3999 fall back to decimal.
fn roman_numeral(number: i64) -> String {
    if !(1..=3999).contains(&number) {
        return number.to_string();
    }
    const TABLE: &[(i64, &str)] = &[
        (1000, "m"),
        (900, "cm"),
        (500, "d"),
        (400, "cd"),
        (100, "c"),
        (90, "xc"),
        (50, "l"),
        (40, "xl"),
        (10, "x"),
        (9, "ix"),
        (5, "v"),
        (4, "iv"),
        (1, "i"),
    ];
    let mut n = number;
    let mut out = String::new();
    for (value, digits) in TABLE {
        while n >= *value {
            out.push_str(digits);
            n -= value;
        }
    }
    out
}

impl ObjectValue for RepeatState {
    fn attr(&self, name: &str) -> Option<Value> {
        let value = match name {
            "index" => Value::Int(self.index as i64),
            "number" => Value::Int(self.number()),
            "even" => Value::Bool(self.index % 2 == 0),
            "odd" => Value::Bool(self.index % 2 == 1),
            "start" => Value::Bool(self.start()),
            "end" => Value::Bool(self.end()),
            "first" => Value::Bool(self.first_keyed(None)),
            "last" => Value::Bool(self.last_keyed(None)),
            "length" => Value::Int(self.length as i64),
            "letter" => Value::Str(self.letter()),
            "Letter" => Value::Str(self.letter().to_uppercase()),
            "roman" => Value::Str(self.roman()),
            "Roman" => Value::Str(self.roman().to_uppercase()),
            _ => return None,
        };
        Some(value)
    }

    fn item(&self, key: &Value) -> Option<Value> {
        match key {
            Value::Str(name) | Value::Markup(name) => self.attr(name),
            _ => None,
        }
    }

    fn repr(&self) -> String {
        format!("<repeat item {}/{}>", self.number(), self.length)
    }

    fn type_name(&self) -> &'static str {
        "repeat"
    }
}

/// The render-time mapping from loop-variable name to repeat record.
#[derive(Debug, Clone, Default)]
pub struct RepeatDict {
    entries: Vec<(String, Arc<RepeatState>)>,
}

impl RepeatDict {
    /// Creates an empty dictionary.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the record for a loop iteration.
    pub fn push(&mut self, name: impl Into<String>, state: Arc<RepeatState>) {
        self.entries.push((name.into(), state));
    }

    /// Removes the innermost record for the name on loop exit.
    pub fn pop(&mut self, name: &str) {
        if let Some(pos) = self.entries.iter().rposition(|(n, _)| n == name) {
            self.entries.remove(pos);
        }
    }

    /// The innermost record for a loop variable.
    pub fn get(&self, name: &str) -> Option<Arc<RepeatState>> {
        self.entries
            .iter()
            .rev()
            .find(|(n, _)| n == name)
            .map(|(_, s)| s.clone())
    }

    /// Whether any loop is active.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl ObjectValue for RepeatDict {
    fn attr(&self, name: &str) -> Option<Value> {
        self.get(name)
            .map(|state| Value::Object(state as Arc<dyn ObjectValue>))
    }

    fn item(&self, key: &Value) -> Option<Value> {
        match key {
            Value::Str(name) | Value::Markup(name) => self.attr(name),
            _ => None,
        }
    }

    fn truthy(&self) -> bool {
        !self.is_empty()
    }

    fn repr(&self) -> String {
        let names: Vec<&str> = self.entries.iter().map(|(n, _)| n.as_str()).collect();
        format!("<repeat dict {:?}>", names)
    }

    fn type_name(&self) -> &'static str {
        "repeatdict"
    }
}

/// Escapes content for insertion: `&`, `<`, `>`, `"` become entities.
pub fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            other => out.push(other),
        }
    }
    out
}

/// Escapes an attribute value, re-escaping `&` only where it does not
/// already begin a valid entity reference.
pub fn escape_attribute(text: &str) -> String {
    let bytes = text.as_bytes();
    let mut out = String::with_capacity(text.len());
    for (i, c) in text.char_indices() {
        match c {
            '&' if !is_entity_start(bytes, i) => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            other => out.push(other),
        }
    }
    out
}

/// Whether position `i` (an `&`) begins a well-formed entity reference.
fn is_entity_start(bytes: &[u8], i: usize) -> bool {
    let mut j = i + 1;
    if j < bytes.len() && bytes[j] == b'#' {
        j += 1;
    }
    let body_start = j;
    while j < bytes.len() && j - i <= 16 {
        match bytes[j] {
            b';' => return j > body_start,
            c if c.is_ascii_alphanumeric() => j += 1,
            _ => return false,
        }
    }
    false
}
