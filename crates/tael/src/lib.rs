// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

// Warn on missing documentation for public items
#![warn(missing_docs)]

// Allow large error types - TalError carries rich context for debugging
// (source snippets, variable snapshots). This is an intentional design
// choice for better DX.
#![allow(clippy::result_large_err)]

//! # TAEL
//!
//! Attribute-language template compiler and renderer for Rust.
//!
//! TAEL compiles XML/HTML documents annotated with TAL, METAL and I18N
//! control attributes into executable programs that render with a
//! variable binding.
//!
//! ## Features
//!
//! - TAL flow control (`tal:define`, `tal:condition`, `tal:repeat`,
//!   `tal:switch`/`tal:case`, `tal:content`, `tal:replace`,
//!   `tal:attributes`, `tal:omit-tag`, `tal:on-error`)
//! - `${...}` interpolation in text, attributes and comments
//! - Typed expression prefixes (`python:`, `string:`, `exists:`,
//!   `not:`, `import:`, `load:`, `structure:`) with pipe fallbacks
//! - METAL macros with slots, fills and nested extension
//! - I18N message capture and pluggable translation
//! - Built-in caching (memory or filesystem) and auto-reload
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use tael::{Settings, Template, Value, ValueMap};
//!
//! let template = Template::new(
//!     r#"<ul><li tal:repeat="i range(3)" tal:content="repeat.i.number"/></ul>"#,
//!     Settings::default(),
//! )?;
//! let html = template.render(ValueMap::new())?;
//! assert_eq!(html, "<ul><li>1</li><li>2</li><li>3</li></ul>");
//! ```

/// Element tree produced by the markup parser.
pub mod ast;
/// Compiled program caching.
pub mod cache;
/// Code generation: annotated tree to compiled program.
pub mod codegen;
/// Engine configuration.
pub mod config;
/// Template driver: lazy cooking, reload, macros.
pub mod engine;
/// Error types and reporting.
pub mod error;
/// Translation interface.
pub mod i18n;
/// `${...}` interpolation lowering.
pub mod interp;
/// Markup parser.
pub mod parser;
/// The compiled instruction tree.
pub mod program;
/// The Python-flavoured expression sub-language.
pub mod pyexpr;
/// The program interpreter.
pub mod render;
/// Template resource resolution.
pub mod resolver;
/// Render-time support: scope, repeat, escaping.
pub mod runtime;
/// Namespace filter and statement binder.
pub mod statements;
/// The typed expression layer.
pub mod tales;
/// Markup tokenizer.
pub mod token;
/// Statement payload parsing and semantic checks.
pub mod transform;
/// Dynamic value model for template expressions.
pub mod value;

pub use cache::{Cache, FileSystemCache, MemoryCache, NoOpCache};
pub use config::Settings;
pub use engine::{MacroSet, Template};
pub use error::{ErrorKind, RenderError, Result, SourceContext, TalError};
pub use i18n::{MessageDescriptor, NullTranslator, TableTranslator, Translator};
pub use program::Program;
pub use resolver::{FileSystemResolver, MemoryResolver, TemplateResolver};
pub use value::{ObjectValue, Value, ValueMap};

#[cfg(test)]
mod tests;
