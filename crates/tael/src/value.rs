// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Dynamic value model for template expressions.
//!
//! Expressions operate on [`Value`], a variant covering none, booleans,
//! numbers, strings, pre-escaped markup, sequences, mappings and opaque
//! host objects. Host objects implement [`ObjectValue`], which exposes
//! the duck-typed capabilities the engine relies on: attribute access,
//! item access, an optional "already escaped HTML" marker and optional
//! translation metadata.
//!
//! Attribute access in expressions goes through a two-phase accessor:
//! attribute first, then item access with the same key, reraising the
//! original attribute error when both fail.

use crate::error::{ErrorKind, EvalError};
use crate::i18n::MessageDescriptor;
use crate::program::MacroDef;
use std::cmp::Ordering;
use std::fmt;
use std::sync::Arc;

/// Capabilities of an opaque host object exposed to expressions.
///
/// The defaults make an object truthy, attribute-less, non-callable and
/// plain (no HTML marker, no translation metadata); implementations
/// override what they support.
pub trait ObjectValue: Send + Sync + fmt::Debug {
    /// Attribute access. `None` raises an attribute error upstream.
    fn attr(&self, _name: &str) -> Option<Value> {
        None
    }

    /// Item access. `None` raises a lookup error upstream.
    fn item(&self, _key: &Value) -> Option<Value> {
        None
    }

    /// Calls the object. The default is a type error.
    fn call(&self, _args: &[Value]) -> Result<Value, EvalError> {
        Err(EvalError::type_error(format!(
            "'{}' object is not callable",
            self.type_name()
        )))
    }

    /// Pre-escaped HTML rendition, if the object provides one.
    ///
    /// The contract is that of an `__html__`-style method: the returned
    /// string is inserted without further escaping.
    fn html(&self) -> Option<String> {
        None
    }

    /// Translation metadata, if this object is a message descriptor.
    fn message(&self) -> Option<MessageDescriptor> {
        None
    }

    /// Truth value.
    fn truthy(&self) -> bool {
        true
    }

    /// Number of items, if the object is sized.
    fn length(&self) -> Option<usize> {
        None
    }

    /// Display form for previews and `str()` coercion.
    fn repr(&self) -> String;

    /// Short type name used in error messages.
    fn type_name(&self) -> &'static str {
        "object"
    }
}

/// Built-in callables injected into the root scope.
///
/// These names are non-redefinable; the compiler rejects defines that
/// target them in strict mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Builtin {
    /// `len(x)`
    Len,
    /// `int(x)`
    Int,
    /// `float(x)`
    Float,
    /// `str(x)`
    Str,
    /// `bool(x)`
    Bool,
    /// `range(stop)` / `range(start, stop[, step])`
    Range,
    /// `abs(x)`
    Abs,
    /// `min(seq)` / `min(a, b, ...)`
    Min,
    /// `max(seq)` / `max(a, b, ...)`
    Max,
    /// `sorted(seq)`
    Sorted,
    /// `repr(x)`
    Repr,
}

impl Builtin {
    /// The scope name of this builtin.
    pub fn name(self) -> &'static str {
        match self {
            Builtin::Len => "len",
            Builtin::Int => "int",
            Builtin::Float => "float",
            Builtin::Str => "str",
            Builtin::Bool => "bool",
            Builtin::Range => "range",
            Builtin::Abs => "abs",
            Builtin::Min => "min",
            Builtin::Max => "max",
            Builtin::Sorted => "sorted",
            Builtin::Repr => "repr",
        }
    }

    /// All builtins, for scope seeding.
    pub fn all() -> &'static [Builtin] {
        &[
            Builtin::Len,
            Builtin::Int,
            Builtin::Float,
            Builtin::Str,
            Builtin::Bool,
            Builtin::Range,
            Builtin::Abs,
            Builtin::Min,
            Builtin::Max,
            Builtin::Sorted,
            Builtin::Repr,
        ]
    }

    /// Invokes the builtin.
    pub fn invoke(self, args: &[Value]) -> Result<Value, EvalError> {
        match self {
            Builtin::Len => {
                let [arg] = args else {
                    return Err(arity_error("len", 1, args.len()));
                };
                arg.length()
                    .map(|n| Value::Int(n as i64))
                    .ok_or_else(|| {
                        EvalError::type_error(format!(
                            "object of type '{}' has no len()",
                            arg.type_name()
                        ))
                    })
            }
            Builtin::Int => {
                let [arg] = args else {
                    return Err(arity_error("int", 1, args.len()));
                };
                match arg {
                    Value::Int(n) => Ok(Value::Int(*n)),
                    Value::Float(f) => Ok(Value::Int(*f as i64)),
                    Value::Bool(b) => Ok(Value::Int(*b as i64)),
                    Value::Str(s) | Value::Markup(s) => s
                        .trim()
                        .parse::<i64>()
                        .map(Value::Int)
                        .map_err(|_| {
                            EvalError::value(format!(
                                "invalid literal for int(): {:?}",
                                s
                            ))
                        }),
                    other => Err(EvalError::type_error(format!(
                        "int() argument must be a string or a number, not '{}'",
                        other.type_name()
                    ))),
                }
            }
            Builtin::Float => {
                let [arg] = args else {
                    return Err(arity_error("float", 1, args.len()));
                };
                match arg {
                    Value::Int(n) => Ok(Value::Float(*n as f64)),
                    Value::Float(f) => Ok(Value::Float(*f)),
                    Value::Bool(b) => Ok(Value::Float(*b as i64 as f64)),
                    Value::Str(s) | Value::Markup(s) => s
                        .trim()
                        .parse::<f64>()
                        .map(Value::Float)
                        .map_err(|_| {
                            EvalError::value(format!(
                                "could not convert string to float: {:?}",
                                s
                            ))
                        }),
                    other => Err(EvalError::type_error(format!(
                        "float() argument must be a string or a number, not '{}'",
                        other.type_name()
                    ))),
                }
            }
            Builtin::Str => {
                let [arg] = args else {
                    return Err(arity_error("str", 1, args.len()));
                };
                Ok(Value::Str(arg.as_string()))
            }
            Builtin::Bool => {
                let [arg] = args else {
                    return Err(arity_error("bool", 1, args.len()));
                };
                Ok(Value::Bool(arg.truthy()))
            }
            Builtin::Range => {
                let ints: Vec<i64> = args
                    .iter()
                    .map(|a| match a {
                        Value::Int(n) => Ok(*n),
                        other => Err(EvalError::type_error(format!(
                            "range() argument must be an integer, not '{}'",
                            other.type_name()
                        ))),
                    })
                    .collect::<Result<_, _>>()?;
                let (start, stop, step) = match ints.as_slice() {
                    [stop] => (0, *stop, 1),
                    [start, stop] => (*start, *stop, 1),
                    [start, stop, step] => (*start, *stop, *step),
                    _ => return Err(arity_error("range", 3, args.len())),
                };
                if step == 0 {
                    return Err(EvalError::value("range() arg 3 must not be zero"));
                }
                let mut items = Vec::new();
                let mut i = start;
                while (step > 0 && i < stop) || (step < 0 && i > stop) {
                    items.push(Value::Int(i));
                    i += step;
                }
                Ok(Value::Seq(items))
            }
            Builtin::Abs => {
                let [arg] = args else {
                    return Err(arity_error("abs", 1, args.len()));
                };
                match arg {
                    Value::Int(n) => Ok(Value::Int(n.abs())),
                    Value::Float(f) => Ok(Value::Float(f.abs())),
                    other => Err(EvalError::type_error(format!(
                        "bad operand type for abs(): '{}'",
                        other.type_name()
                    ))),
                }
            }
            Builtin::Min | Builtin::Max => {
                let items: Vec<Value> = match args {
                    [Value::Seq(items)] => items.clone(),
                    [] => return Err(arity_error(self.name(), 1, 0)),
                    _ => args.to_vec(),
                };
                if items.is_empty() {
                    return Err(EvalError::value(format!("{}() arg is an empty sequence", self.name())));
                }
                let mut best = items[0].clone();
                for item in &items[1..] {
                    let ord = compare_values(item, &best)?;
                    let better = match self {
                        Builtin::Min => ord == Ordering::Less,
                        _ => ord == Ordering::Greater,
                    };
                    if better {
                        best = item.clone();
                    }
                }
                Ok(best)
            }
            Builtin::Sorted => {
                let [Value::Seq(items)] = args else {
                    return Err(EvalError::type_error("sorted() expects a sequence"));
                };
                let mut sorted = items.clone();
                let mut failure = None;
                sorted.sort_by(|a, b| match compare_values(a, b) {
                    Ok(ord) => ord,
                    Err(e) => {
                        failure.get_or_insert(e);
                        Ordering::Equal
                    }
                });
                match failure {
                    Some(e) => Err(e),
                    None => Ok(Value::Seq(sorted)),
                }
            }
            Builtin::Repr => {
                let [arg] = args else {
                    return Err(arity_error("repr", 1, args.len()));
                };
                Ok(Value::Str(arg.repr()))
            }
        }
    }
}

fn arity_error(name: &str, expected: usize, got: usize) -> EvalError {
    EvalError::type_error(format!(
        "{}() takes {} argument(s), {} given",
        name, expected, got
    ))
}

/// An ordered mapping with value keys.
///
/// Iteration follows insertion order; inserting an existing key replaces
/// the value in place. Lookup is a linear scan, which is appropriate for
/// the small mappings templates build.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValueMap {
    entries: Vec<(Value, Value)>,
}

impl ValueMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces a key.
    pub fn insert(&mut self, key: Value, value: Value) {
        for (k, v) in &mut self.entries {
            if values_equal(k, &key) {
                *v = value;
                return;
            }
        }
        self.entries.push((key, value));
    }

    /// Inserts with a string key.
    pub fn insert_str(&mut self, key: impl Into<String>, value: Value) {
        self.insert(Value::Str(key.into()), value);
    }

    /// Looks up a key.
    pub fn get(&self, key: &Value) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(k, _)| values_equal(k, key))
            .map(|(_, v)| v)
    }

    /// Looks up a string key.
    pub fn get_str(&self, key: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(k, _)| matches!(k, Value::Str(s) | Value::Markup(s) if s == key))
            .map(|(_, v)| v)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the map is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates entries in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &(Value, Value)> {
        self.entries.iter()
    }
}

impl FromIterator<(String, Value)> for ValueMap {
    fn from_iter<T: IntoIterator<Item = (String, Value)>>(iter: T) -> Self {
        let mut map = Self::new();
        for (k, v) in iter {
            map.insert_str(k, v);
        }
        map
    }
}

/// A dynamic value.
#[derive(Debug, Clone)]
pub enum Value {
    /// The absent value.
    None,
    /// The default sentinel: "use the literal template text here".
    ///
    /// A single distinguished variant, so its identity is preserved
    /// across templates by construction.
    Default,
    /// A boolean.
    Bool(bool),
    /// An integer.
    Int(i64),
    /// A float.
    Float(f64),
    /// A plain string; escaped on insertion.
    Str(String),
    /// A pre-escaped markup string; inserted without escaping.
    Markup(String),
    /// A sequence.
    Seq(Vec<Value>),
    /// An ordered mapping.
    Map(ValueMap),
    /// An opaque host object.
    Object(Arc<dyn ObjectValue>),
    /// A macro reference, usable with `metal:use-macro`.
    Macro(Arc<MacroDef>),
    /// A built-in callable.
    Builtin(Builtin),
    /// A method bound to a receiver, produced by attribute access and
    /// consumed by a call.
    Method(Box<Value>, String),
}

impl Value {
    /// Truth value, with mapping/sequence emptiness and object opinion.
    pub fn truthy(&self) -> bool {
        match self {
            Value::None => false,
            Value::Default => true,
            Value::Bool(b) => *b,
            Value::Int(n) => *n != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) | Value::Markup(s) => !s.is_empty(),
            Value::Seq(items) => !items.is_empty(),
            Value::Map(map) => !map.is_empty(),
            Value::Object(obj) => obj.truthy(),
            Value::Macro(_) | Value::Builtin(_) | Value::Method(..) => true,
        }
    }

    /// Length, if the value is sized.
    pub fn length(&self) -> Option<usize> {
        match self {
            Value::Str(s) | Value::Markup(s) => Some(s.chars().count()),
            Value::Seq(items) => Some(items.len()),
            Value::Map(map) => Some(map.len()),
            Value::Object(obj) => obj.length(),
            _ => None,
        }
    }

    /// Short type name for error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::None => "NoneType",
            Value::Default => "default",
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "str",
            Value::Markup(_) => "markup",
            Value::Seq(_) => "list",
            Value::Map(_) => "dict",
            Value::Object(obj) => obj.type_name(),
            Value::Macro(_) => "macro",
            Value::Builtin(_) => "builtin",
            Value::Method(..) => "method",
        }
    }

    /// `str()` coercion.
    pub fn as_string(&self) -> String {
        match self {
            Value::None => "None".to_string(),
            Value::Default => "default".to_string(),
            Value::Bool(true) => "True".to_string(),
            Value::Bool(false) => "False".to_string(),
            Value::Int(n) => n.to_string(),
            Value::Float(f) => format_float(*f),
            Value::Str(s) | Value::Markup(s) => s.clone(),
            Value::Seq(_) | Value::Map(_) => self.repr(),
            Value::Object(obj) => obj.repr(),
            Value::Macro(m) => format!("<macro {}>", m.name),
            Value::Builtin(b) => format!("<builtin {}>", b.name()),
            Value::Method(_, name) => format!("<method {}>", name),
        }
    }

    /// `repr()` coercion.
    pub fn repr(&self) -> String {
        match self {
            Value::Str(s) => format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")),
            Value::Seq(items) => {
                let parts: Vec<String> = items.iter().map(|v| v.repr()).collect();
                format!("[{}]", parts.join(", "))
            }
            Value::Map(map) => {
                let parts: Vec<String> = map
                    .iter()
                    .map(|(k, v)| format!("{}: {}", k.repr(), v.repr()))
                    .collect();
                format!("{{{}}}", parts.join(", "))
            }
            _ => self.as_string(),
        }
    }

    /// Pre-escaped HTML rendition if the value carries the marker.
    pub fn html(&self) -> Option<String> {
        match self {
            Value::Markup(s) => Some(s.clone()),
            Value::Object(obj) => obj.html(),
            _ => None,
        }
    }
}

/// Formats a float the way expression output expects (`2.0`, not `2`).
pub fn format_float(f: f64) -> String {
    if f.is_finite() && f.fract() == 0.0 && f.abs() < 1e16 {
        format!("{:.1}", f)
    } else {
        format!("{}", f)
    }
}

/// Structural equality with numeric cross-type comparison.
///
/// Objects and macros compare by identity.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::None, Value::None) => true,
        (Value::Default, Value::Default) => true,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Int(x), Value::Int(y)) => x == y,
        (Value::Float(x), Value::Float(y)) => x == y,
        (Value::Int(x), Value::Float(y)) | (Value::Float(y), Value::Int(x)) => {
            *x as f64 == *y
        }
        (Value::Bool(x), Value::Int(y)) | (Value::Int(y), Value::Bool(x)) => {
            (*x as i64) == *y
        }
        (Value::Str(x) | Value::Markup(x), Value::Str(y) | Value::Markup(y)) => x == y,
        (Value::Seq(x), Value::Seq(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(a, b)| values_equal(a, b))
        }
        (Value::Map(x), Value::Map(y)) => {
            x.len() == y.len()
                && x.iter().all(|(k, v)| {
                    y.get(k).map(|other| values_equal(v, other)).unwrap_or(false)
                })
        }
        (Value::Object(x), Value::Object(y)) => Arc::ptr_eq(x, y),
        (Value::Macro(x), Value::Macro(y)) => Arc::ptr_eq(x, y),
        (Value::Builtin(x), Value::Builtin(y)) => x == y,
        _ => false,
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        values_equal(self, other)
    }
}

/// Ordering for comparison operators; a type error when the pair is
/// unordered.
pub fn compare_values(a: &Value, b: &Value) -> Result<Ordering, EvalError> {
    match (a, b) {
        (Value::Int(x), Value::Int(y)) => Ok(x.cmp(y)),
        (Value::Float(x), Value::Float(y)) => x
            .partial_cmp(y)
            .ok_or_else(|| EvalError::value("cannot order NaN")),
        (Value::Int(x), Value::Float(y)) => (*x as f64)
            .partial_cmp(y)
            .ok_or_else(|| EvalError::value("cannot order NaN")),
        (Value::Float(x), Value::Int(y)) => x
            .partial_cmp(&(*y as f64))
            .ok_or_else(|| EvalError::value("cannot order NaN")),
        (Value::Str(x) | Value::Markup(x), Value::Str(y) | Value::Markup(y)) => Ok(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Ok(x.cmp(y)),
        (Value::Seq(x), Value::Seq(y)) => {
            for (a, b) in x.iter().zip(y.iter()) {
                match compare_values(a, b)? {
                    Ordering::Equal => continue,
                    other => return Ok(other),
                }
            }
            Ok(x.len().cmp(&y.len()))
        }
        _ => Err(EvalError::type_error(format!(
            "'<' not supported between instances of '{}' and '{}'",
            a.type_name(),
            b.type_name()
        ))),
    }
}

/// Attribute access (phase one of the two-phase accessor).
pub fn get_attr(value: &Value, name: &str) -> Result<Value, EvalError> {
    match value {
        Value::Object(obj) => obj.attr(name).ok_or_else(|| {
            EvalError::attribute(format!(
                "'{}' object has no attribute '{}'",
                obj.type_name(),
                name
            ))
        }),
        Value::Str(_) | Value::Markup(_) => {
            if STR_METHODS.contains(&name) {
                Ok(Value::Method(Box::new(value.clone()), name.to_string()))
            } else {
                Err(EvalError::attribute(format!(
                    "'str' object has no attribute '{}'",
                    name
                )))
            }
        }
        Value::Map(_) => {
            if MAP_METHODS.contains(&name) {
                Ok(Value::Method(Box::new(value.clone()), name.to_string()))
            } else {
                Err(EvalError::attribute(format!(
                    "'dict' object has no attribute '{}'",
                    name
                )))
            }
        }
        other => Err(EvalError::attribute(format!(
            "'{}' object has no attribute '{}'",
            other.type_name(),
            name
        ))),
    }
}

/// String methods available to expressions.
pub const STR_METHODS: &[&str] = &[
    "upper",
    "lower",
    "strip",
    "lstrip",
    "rstrip",
    "split",
    "join",
    "replace",
    "startswith",
    "endswith",
    "capitalize",
];

/// Mapping methods available to expressions.
pub const MAP_METHODS: &[&str] = &["get", "keys", "values", "items"];

/// Item access (phase two of the two-phase accessor).
pub fn get_item(value: &Value, key: &Value) -> Result<Value, EvalError> {
    match value {
        Value::Seq(items) => {
            let index = match key {
                Value::Int(n) => *n,
                other => {
                    return Err(EvalError::type_error(format!(
                        "list indices must be integers, not '{}'",
                        other.type_name()
                    )))
                }
            };
            let effective = if index < 0 {
                index + items.len() as i64
            } else {
                index
            };
            if effective < 0 || effective as usize >= items.len() {
                return Err(EvalError::lookup(format!(
                    "list index out of range: {}",
                    index
                )));
            }
            Ok(items[effective as usize].clone())
        }
        Value::Map(map) => map.get(key).cloned().ok_or_else(|| {
            EvalError::lookup(format!("key not found: {}", key.repr()))
        }),
        Value::Str(s) | Value::Markup(s) => {
            let index = match key {
                Value::Int(n) => *n,
                other => {
                    return Err(EvalError::type_error(format!(
                        "string indices must be integers, not '{}'",
                        other.type_name()
                    )))
                }
            };
            let chars: Vec<char> = s.chars().collect();
            let effective = if index < 0 {
                index + chars.len() as i64
            } else {
                index
            };
            if effective < 0 || effective as usize >= chars.len() {
                return Err(EvalError::lookup(format!(
                    "string index out of range: {}",
                    index
                )));
            }
            Ok(Value::Str(chars[effective as usize].to_string()))
        }
        Value::Object(obj) => obj.item(key).ok_or_else(|| {
            EvalError::lookup(format!("key not found: {}", key.repr()))
        }),
        other => Err(EvalError::type_error(format!(
            "'{}' object is not subscriptable",
            other.type_name()
        ))),
    }
}

/// The two-phase accessor: attribute access, then item access with the
/// same key, reraising the original attribute error when both fail.
pub fn get_attr_with_item_fallback(value: &Value, name: &str) -> Result<Value, EvalError> {
    match get_attr(value, name) {
        Ok(v) => Ok(v),
        Err(attr_err) if attr_err.kind == ErrorKind::Attribute => {
            let key = Value::Str(name.to_string());
            match get_item(value, &key) {
                Ok(v) => Ok(v),
                Err(_) => Err(attr_err),
            }
        }
        Err(other) => Err(other),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthiness() {
        assert!(!Value::None.truthy());
        assert!(Value::Default.truthy());
        assert!(!Value::Str(String::new()).truthy());
        assert!(Value::Int(-1).truthy());
        assert!(!Value::Seq(vec![]).truthy());
    }

    #[test]
    fn test_string_coercion() {
        assert_eq!(Value::Bool(true).as_string(), "True");
        assert_eq!(Value::Float(2.0).as_string(), "2.0");
        assert_eq!(Value::Float(2.5).as_string(), "2.5");
        assert_eq!(
            Value::Seq(vec![Value::Int(1), Value::Str("a".into())]).repr(),
            "[1, 'a']"
        );
    }

    #[test]
    fn test_two_phase_accessor_falls_back_to_item() {
        let mut map = ValueMap::new();
        map.insert_str("title", Value::Str("Home".into()));
        let value = Value::Map(map);

        let got = get_attr_with_item_fallback(&value, "title").unwrap();
        assert_eq!(got, Value::Str("Home".into()));

        // Both phases fail: the original attribute error is reraised.
        let err = get_attr_with_item_fallback(&value, "missing").unwrap_err();
        assert_eq!(err.kind, ErrorKind::Attribute);
    }

    #[test]
    fn test_negative_indexing() {
        let seq = Value::Seq(vec![Value::Int(1), Value::Int(2), Value::Int(3)]);
        assert_eq!(get_item(&seq, &Value::Int(-1)).unwrap(), Value::Int(3));
        assert!(get_item(&seq, &Value::Int(3)).is_err());
    }

    #[test]
    fn test_range_builtin() {
        let out = Builtin::Range.invoke(&[Value::Int(3)]).unwrap();
        assert_eq!(
            out,
            Value::Seq(vec![Value::Int(0), Value::Int(1), Value::Int(2)])
        );
        let out = Builtin::Range
            .invoke(&[Value::Int(3), Value::Int(0), Value::Int(-1)])
            .unwrap();
        assert_eq!(
            out,
            Value::Seq(vec![Value::Int(3), Value::Int(2), Value::Int(1)])
        );
    }

    #[test]
    fn test_map_preserves_insertion_order() {
        let mut map = ValueMap::new();
        map.insert_str("b", Value::Int(1));
        map.insert_str("a", Value::Int(2));
        map.insert_str("b", Value::Int(3));
        let keys: Vec<String> = map.iter().map(|(k, _)| k.as_string()).collect();
        assert_eq!(keys, vec!["b", "a"]);
        assert_eq!(map.get_str("b"), Some(&Value::Int(3)));
    }

    #[test]
    fn test_numeric_cross_type_equality() {
        assert!(values_equal(&Value::Int(2), &Value::Float(2.0)));
        assert!(!values_equal(&Value::Int(2), &Value::Str("2".into())));
    }
}
