// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Command implementations for the tael CLI.

/// CLI subcommands.
pub mod commands {
    /// `tael check`: compile a template and report diagnostics.
    pub mod check;
    /// `tael macros`: list macro names.
    pub mod macros;
    /// `tael render`: compile and render with a JSON scope.
    pub mod render;
}

use tael::{Value, ValueMap};

/// Converts a JSON document into the engine's value model.
///
/// Objects become ordered mappings, arrays become sequences, numbers
/// become integers where they fit and floats otherwise.
pub fn json_to_value(json: &serde_json::Value) -> Value {
    match json {
        serde_json::Value::Null => Value::None,
        serde_json::Value::Bool(b) => Value::Bool(*b),
        serde_json::Value::Number(n) => match n.as_i64() {
            Some(i) => Value::Int(i),
            None => Value::Float(n.as_f64().unwrap_or(f64::NAN)),
        },
        serde_json::Value::String(s) => Value::Str(s.clone()),
        serde_json::Value::Array(items) => {
            Value::Seq(items.iter().map(json_to_value).collect())
        }
        serde_json::Value::Object(entries) => {
            let mut map = ValueMap::new();
            for (k, v) in entries {
                map.insert_str(k.clone(), json_to_value(v));
            }
            Value::Map(map)
        }
    }
}

/// Converts a top-level JSON object into a scope mapping.
pub fn json_to_scope(json: &serde_json::Value) -> anyhow::Result<ValueMap> {
    match json_to_value(json) {
        Value::Map(map) => Ok(map),
        _ => anyhow::bail!("template data must be a JSON object"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_conversion() {
        let json: serde_json::Value =
            serde_json::from_str(r#"{"n": 3, "f": 1.5, "s": "x", "l": [1, null], "m": {"a": true}}"#)
                .unwrap();
        let scope = json_to_scope(&json).unwrap();
        assert_eq!(scope.get_str("n"), Some(&Value::Int(3)));
        assert_eq!(scope.get_str("f"), Some(&Value::Float(1.5)));
        assert_eq!(scope.get_str("s"), Some(&Value::Str("x".into())));
        assert_eq!(
            scope.get_str("l"),
            Some(&Value::Seq(vec![Value::Int(1), Value::None]))
        );
        assert!(matches!(scope.get_str("m"), Some(Value::Map(_))));
    }

    #[test]
    fn test_scope_requires_object() {
        let json: serde_json::Value = serde_json::from_str("[1, 2]").unwrap();
        assert!(json_to_scope(&json).is_err());
    }
}
