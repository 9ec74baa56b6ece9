// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Engine configuration.
//!
//! All knobs live in one [`Settings`] record threaded through the
//! compiler and driver; there is no process-global state. An
//! environment-variable layer populates a default record at startup
//! (see [`Settings::from_env`]).
//!
//! Settings that affect code generation contribute to
//! [`Settings::digest`], which is part of every cache key together
//! with a revision marker for the runtime itself, so a changed
//! runtime invalidates cached artifacts.

use crate::error::RenderError;
use crate::value::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Bumped whenever the interpreter changes observable behavior, so
/// cached programs from an older runtime are not reused.
pub const RUNTIME_REVISION: u32 = 1;

/// Environment variable names consulted by [`Settings::from_env`].
pub mod env_vars {
    /// Booleanish: enables debug mode.
    pub const DEBUG: &str = "TAEL_DEBUG";
    /// Booleanish: enables eager cooking.
    pub const EAGER: &str = "TAEL_EAGER";
    /// Path: enables the disk cache in the given directory.
    pub const CACHE: &str = "TAEL_CACHE";
    /// Booleanish: enables auto-reload.
    pub const RELOAD: &str = "TAEL_RELOAD";
    /// Booleanish: enables structure validation.
    pub const VALIDATE: &str = "TAEL_VALIDATE";
}

/// Callback invoked by `tal:on-error` before substitution.
pub type OnErrorHandler = Arc<dyn Fn(&RenderError) + Send + Sync>;

/// Engine settings.
#[derive(Clone)]
pub struct Settings {
    /// Re-cook when the source file changes.
    pub auto_reload: bool,
    /// Keep source for diagnostics and cook eagerly.
    pub debug: bool,
    /// Cook at construction time instead of first render.
    pub eager: bool,
    /// Unknown expression types / control attributes are compile-time
    /// errors, and reserved-name defines are rejected.
    pub strict: bool,
    /// Byte-input decoding override.
    pub encoding: Option<String>,
    /// Attribute names subject to boolean rendering.
    pub boolean_attributes: BTreeSet<String>,
    /// Translate unmarked text by default.
    pub implicit_i18n_translate: bool,
    /// Attribute names translated by default.
    pub implicit_i18n_attributes: BTreeSet<String>,
    /// Collapse whitespace before attributes to a single space.
    pub trim_attribute_space: bool,
    /// Accept `data-tal-*` control attributes.
    pub enable_data_attributes: bool,
    /// Evaluate `${...}` inside comments.
    pub enable_comment_interpolation: bool,
    /// Reject namespaces outside the recognized set.
    pub restricted_namespace: bool,
    /// Extra names injected into the builtin scope layer.
    pub extra_builtins: Vec<(String, Value)>,
    /// Template loader search roots.
    pub search_path: Vec<PathBuf>,
    /// Default expression type prefix.
    pub default_expression: String,
    /// Callback observed by `tal:on-error` before substitution.
    pub on_error_handler: Option<OnErrorHandler>,
    /// Disk cache directory; `None` disables the disk cache.
    pub cache_dir: Option<PathBuf>,
    /// Validate re-serialized structure after parsing.
    pub validate: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            auto_reload: false,
            debug: false,
            eager: false,
            strict: false,
            encoding: None,
            boolean_attributes: default_boolean_attributes(),
            implicit_i18n_translate: false,
            implicit_i18n_attributes: BTreeSet::new(),
            trim_attribute_space: false,
            enable_data_attributes: false,
            enable_comment_interpolation: true,
            restricted_namespace: false,
            extra_builtins: Vec::new(),
            search_path: Vec::new(),
            default_expression: "python".to_string(),
            on_error_handler: None,
            cache_dir: None,
            validate: false,
        }
    }
}

impl fmt::Debug for Settings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Settings")
            .field("auto_reload", &self.auto_reload)
            .field("debug", &self.debug)
            .field("eager", &self.eager)
            .field("strict", &self.strict)
            .field("encoding", &self.encoding)
            .field("boolean_attributes", &self.boolean_attributes)
            .field("implicit_i18n_translate", &self.implicit_i18n_translate)
            .field("implicit_i18n_attributes", &self.implicit_i18n_attributes)
            .field("trim_attribute_space", &self.trim_attribute_space)
            .field("enable_data_attributes", &self.enable_data_attributes)
            .field(
                "enable_comment_interpolation",
                &self.enable_comment_interpolation,
            )
            .field("restricted_namespace", &self.restricted_namespace)
            .field("search_path", &self.search_path)
            .field("default_expression", &self.default_expression)
            .field("on_error_handler", &self.on_error_handler.is_some())
            .field("cache_dir", &self.cache_dir)
            .field("validate", &self.validate)
            .finish()
    }
}

/// The historical boolean-attribute set for HTML output.
pub fn default_boolean_attributes() -> BTreeSet<String> {
    [
        "compact", "nowrap", "ismap", "declare", "noshade", "checked", "disabled", "readonly",
        "multiple", "selected", "noresize", "defer",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

/// Parses a booleanish environment value: `1`, `true`, `on` enable;
/// `0`, `false`, `off` disable (case-insensitive). Anything else
/// returns `None`.
pub fn parse_booleanish(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" => Some(true),
        "0" | "false" | "off" => Some(false),
        _ => None,
    }
}

impl Settings {
    /// Default settings with the environment layer applied.
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        let booleanish = |name: &str| std::env::var(name).ok().and_then(|v| parse_booleanish(&v));
        if let Some(v) = booleanish(env_vars::DEBUG) {
            settings.debug = v;
        }
        if let Some(v) = booleanish(env_vars::EAGER) {
            settings.eager = v;
        }
        if let Some(v) = booleanish(env_vars::RELOAD) {
            settings.auto_reload = v;
        }
        if let Some(v) = booleanish(env_vars::VALIDATE) {
            settings.validate = v;
        }
        if let Ok(dir) = std::env::var(env_vars::CACHE) {
            if !dir.trim().is_empty() {
                settings.cache_dir = Some(PathBuf::from(dir));
            }
        }
        settings
    }

    /// Digest of every setting that affects code generation, plus the
    /// crate version and runtime revision.
    ///
    /// Two templates compile identically exactly when their source
    /// digests and settings digests both match; the cache key is the
    /// pair.
    pub fn digest(&self) -> String {
        let mut hasher = Sha256::new();
        let mut feed = |line: String| {
            hasher.update(line.as_bytes());
            hasher.update(b"\n");
        };
        feed(format!("version={}", env!("CARGO_PKG_VERSION")));
        feed(format!("runtime={}", RUNTIME_REVISION));
        feed(format!("strict={}", self.strict));
        feed(format!("debug={}", self.debug));
        feed(format!("trim_attribute_space={}", self.trim_attribute_space));
        feed(format!(
            "boolean_attributes={}",
            self.boolean_attributes
                .iter()
                .cloned()
                .collect::<Vec<_>>()
                .join(",")
        ));
        feed(format!(
            "implicit_i18n_translate={}",
            self.implicit_i18n_translate
        ));
        feed(format!(
            "implicit_i18n_attributes={}",
            self.implicit_i18n_attributes
                .iter()
                .cloned()
                .collect::<Vec<_>>()
                .join(",")
        ));
        feed(format!(
            "enable_data_attributes={}",
            self.enable_data_attributes
        ));
        feed(format!(
            "enable_comment_interpolation={}",
            self.enable_comment_interpolation
        ));
        feed(format!(
            "restricted_namespace={}",
            self.restricted_namespace
        ));
        feed(format!("default_expression={}", self.default_expression));
        format!("{:x}", hasher.finalize())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_booleanish_parsing() {
        assert_eq!(parse_booleanish("1"), Some(true));
        assert_eq!(parse_booleanish("TRUE"), Some(true));
        assert_eq!(parse_booleanish("On"), Some(true));
        assert_eq!(parse_booleanish("0"), Some(false));
        assert_eq!(parse_booleanish("off"), Some(false));
        assert_eq!(parse_booleanish("maybe"), None);
    }

    #[test]
    fn test_digest_tracks_codegen_settings() {
        let base = Settings::default();
        let mut strict = Settings::default();
        strict.strict = true;

        assert_eq!(base.digest(), Settings::default().digest());
        assert_ne!(base.digest(), strict.digest());

        // Render-only settings don't disturb the digest.
        let mut reload = Settings::default();
        reload.auto_reload = true;
        assert_eq!(base.digest(), reload.digest());
    }

    #[test]
    fn test_default_boolean_attributes() {
        let set = default_boolean_attributes();
        assert!(set.contains("checked"));
        assert!(set.contains("selected"));
        assert!(!set.contains("class"));
    }
}
