// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! The template driver.
//!
//! [`Template`] owns the complete lifecycle: source loading, lazy
//! cooking on first render, caching, auto-reload and rendering. A
//! template instance moves through the states
//!
//! ```text
//! uncooked -> cooking -> cooked
//!                \-> failed (terminal until the source changes)
//! ```
//!
//! The `cooking -> cooked` transition happens under an exclusive lock,
//! so concurrent first renders serialize on the compile and install
//! exactly one artifact; subsequent renders read the installed program
//! through a read lock and share it read-only.
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use tael::{Settings, Template, Value, ValueMap};
//!
//! let template = Template::new("<p tal:content=\"name\">x</p>", Settings::default())?;
//! let mut vars = ValueMap::new();
//! vars.insert_str("name", Value::Str("World".into()));
//! assert_eq!(template.render(vars)?, "<p>World</p>");
//! ```

use crate::cache::{cache_key, source_digest, Cache, FileSystemCache};
use crate::codegen::compile_document;
use crate::config::Settings;
use crate::error::{Result, TalError};
use crate::i18n::{NullTranslator, Translator};
use crate::parser::parse_bytes;
use crate::program::Program;
use crate::render::{render_macro, render_program, ProgramLoader, RenderParams};
use crate::resolver::{path_to_string, FileSystemResolver, TemplateResolver};
use crate::tales::ExpressionRegistry;
use crate::value::ValueMap;
use std::path::Path;
use std::sync::{Arc, Mutex, RwLock};

/// A cooked artifact together with reload bookkeeping.
#[derive(Debug, Clone)]
struct Cooked {
    program: Arc<Program>,
    source_digest: String,
    /// Source text, kept in debug mode for rich error context.
    source: Option<Arc<String>>,
}

#[derive(Debug)]
enum CookState {
    Uncooked,
    Cooking,
    Cooked(Cooked),
    Failed(String),
}

struct TemplateInner {
    settings: Settings,
    registry: ExpressionRegistry,
    /// Resolved file path; `None` for inline templates.
    path: Option<String>,
    /// Inline source; `None` for file templates.
    inline_source: Option<String>,
    resolver: Box<dyn TemplateResolver>,
    cache: Option<Box<dyn Cache>>,
    state: RwLock<CookState>,
    cook_lock: Mutex<()>,
}

impl std::fmt::Debug for TemplateInner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Template")
            .field("path", &self.path)
            .field("inline", &self.inline_source.is_some())
            .field("settings", &self.settings)
            .finish()
    }
}

/// A compiled template: accepts source as string or path, cooks lazily
/// on first render (unless eager mode is configured), and renders with
/// a scope mapping, a translation callable and keyword arguments.
///
/// Cloning is cheap and shares the compiled artifact.
#[derive(Debug, Clone)]
pub struct Template {
    inner: Arc<TemplateInner>,
}

impl Template {
    /// Creates a template from inline source.
    ///
    /// With `eager` or `debug` configured the template cooks here
    /// rather than on first render.
    pub fn new(source: impl Into<String>, settings: Settings) -> Result<Self> {
        let template = Self::build(None, Some(source.into()), settings)?;
        template.maybe_cook_eagerly()?;
        Ok(template)
    }

    /// Creates a template from a file path.
    pub fn from_file<P: AsRef<Path>>(path: P, settings: Settings) -> Result<Self> {
        let path = path.as_ref();
        if !path.is_file() {
            return Err(TalError::ResolutionError(format!(
                "no such template file: {}",
                path_to_string(path)
            )));
        }
        let template = Self::build(Some(path_to_string(path)), None, settings)?;
        template.maybe_cook_eagerly()?;
        Ok(template)
    }

    fn build(path: Option<String>, inline_source: Option<String>, settings: Settings) -> Result<Self> {
        let registry = ExpressionRegistry::with_defaults(&settings.default_expression);
        let resolver = Box::new(FileSystemResolver::with_search_path(
            settings.search_path.clone(),
        ));
        let cache: Option<Box<dyn Cache>> = match &settings.cache_dir {
            Some(dir) => Some(Box::new(FileSystemCache::new(dir.clone(), 64)?)),
            None => None,
        };
        Ok(Self {
            inner: Arc::new(TemplateInner {
                settings,
                registry,
                path,
                inline_source,
                resolver,
                cache,
                state: RwLock::new(CookState::Uncooked),
                cook_lock: Mutex::new(()),
            }),
        })
    }

    /// Replaces the resolver consulted by `load:` expressions.
    ///
    /// Only meaningful before the first render of any `load:` site.
    pub fn with_resolver<R: TemplateResolver>(self, resolver: R) -> Self {
        // The template is freshly built here, so the Arc is unique
        // unless the caller already cloned it.
        match Arc::try_unwrap(self.inner) {
            Ok(mut inner) => {
                inner.resolver = Box::new(resolver);
                Self {
                    inner: Arc::new(inner),
                }
            }
            Err(inner) => Self { inner },
        }
    }

    /// The engine settings of this template.
    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    fn maybe_cook_eagerly(&self) -> Result<()> {
        if self.inner.settings.eager || self.inner.settings.debug {
            self.cooked()?;
        }
        Ok(())
    }

    /// Renders with an empty translator and no keyword arguments.
    pub fn render(&self, vars: ValueMap) -> Result<String> {
        self.render_with(vars, &NullTranslator, ValueMap::new())
    }

    /// Renders with a scope mapping, a translation callable and
    /// render-time keyword arguments (the argument scope layer).
    pub fn render_with(
        &self,
        vars: ValueMap,
        translator: &dyn Translator,
        kwargs: ValueMap,
    ) -> Result<String> {
        let cooked = self.cooked()?;
        let loader = EngineLoader {
            inner: self.inner.as_ref(),
        };
        render_program(
            &cooked.program,
            &RenderParams {
                vars: &vars,
                translator,
                kwargs: &kwargs,
                loader: Some(&loader),
                source: cooked.source.as_ref().map(|s| s.as_str()),
                settings: &self.inner.settings,
            },
        )
    }

    /// The template's macros, by name.
    ///
    /// Cooks the template if needed.
    pub fn macros(&self) -> Result<MacroSet> {
        let cooked = self.cooked()?;
        Ok(MacroSet {
            template: self.clone(),
            program: cooked.program,
        })
    }

    /// The compiled program (cooking on demand).
    pub fn program(&self) -> Result<Arc<Program>> {
        Ok(self.cooked()?.program)
    }

    // -----------------------------------------------------------------
    // Cooking

    fn cooked(&self) -> Result<Cooked> {
        if self.inner.settings.auto_reload {
            self.check_reload();
        }

        // Fast path: a cooked artifact is read lock-only.
        {
            let state = self.inner.state.read().expect("template state lock");
            if let CookState::Cooked(cooked) = &*state {
                return Ok(cooked.clone());
            }
            if let CookState::Failed(message) = &*state {
                return Err(TalError::CookError(message.clone()));
            }
        }

        // Slow path: exactly one thread cooks.
        let _guard = self.inner.cook_lock.lock().expect("template cook lock");
        {
            let state = self.inner.state.read().expect("template state lock");
            match &*state {
                CookState::Cooked(cooked) => return Ok(cooked.clone()),
                CookState::Failed(message) => {
                    return Err(TalError::CookError(message.clone()))
                }
                _ => {}
            }
        }
        *self.inner.state.write().expect("template state lock") = CookState::Cooking;

        match self.cook() {
            Ok(cooked) => {
                *self.inner.state.write().expect("template state lock") =
                    CookState::Cooked(cooked.clone());
                Ok(cooked)
            }
            Err(e) => {
                *self.inner.state.write().expect("template state lock") =
                    CookState::Failed(e.to_string());
                Err(e)
            }
        }
    }

    /// Drops a cooked artifact whose source file changed.
    fn check_reload(&self) {
        let Some(path) = &self.inner.path else {
            return;
        };
        let current = {
            let state = self.inner.state.read().expect("template state lock");
            match &*state {
                CookState::Cooked(cooked) => cooked.source_digest.clone(),
                // A failed cook retries when the file changes too; the
                // digest of the failing source is unknown, so retry on
                // every render.
                CookState::Failed(_) => String::new(),
                _ => return,
            }
        };
        let on_disk = match std::fs::read(path) {
            Ok(bytes) => source_digest(&bytes),
            Err(_) => return,
        };
        if on_disk != current {
            tracing::info!(template = %path, "source changed, re-cooking");
            let _guard = self.inner.cook_lock.lock().expect("template cook lock");
            let mut state = self.inner.state.write().expect("template state lock");
            let stale = match &*state {
                CookState::Cooked(cooked) => cooked.source_digest != on_disk,
                CookState::Failed(_) => true,
                _ => false,
            };
            if stale {
                *state = CookState::Uncooked;
            }
        }
    }

    fn cook(&self) -> Result<Cooked> {
        let (source_bytes, filename) = match (&self.inner.path, &self.inner.inline_source) {
            (Some(path), _) => (std::fs::read(path)?, Some(path.clone())),
            (None, Some(source)) => (source.clone().into_bytes(), None),
            (None, None) => unreachable!("template has a path or inline source"),
        };
        let digest = source_digest(&source_bytes);
        let source_text = String::from_utf8_lossy(&source_bytes).into_owned();

        let program = compile_source(
            &self.inner.settings,
            &self.inner.registry,
            &source_bytes,
            &source_text,
            filename.as_deref(),
            self.inner.cache.as_deref(),
        )?;

        tracing::debug!(
            template = filename.as_deref().unwrap_or("<string>"),
            macros = program.macros.len(),
            "template cooked"
        );
        Ok(Cooked {
            program,
            source_digest: digest,
            source: self
                .inner
                .settings
                .debug
                .then(|| Arc::new(source_text)),
        })
    }
}

/// Compiles source through the cache, if one is configured.
fn compile_source(
    settings: &Settings,
    registry: &ExpressionRegistry,
    source_bytes: &[u8],
    source_text: &str,
    filename: Option<&str>,
    cache: Option<&dyn Cache>,
) -> Result<Arc<Program>> {
    let key = cache_key(source_text, &settings.digest());
    if let Some(cache) = cache {
        if let Some(program) = cache.get(&key)? {
            tracing::debug!(key = %key, "compiled template served from cache");
            return Ok(program);
        }
    }

    let doc = parse_bytes(source_bytes, settings.encoding.as_deref())
        .map_err(|e| e.with_source(source_text, filename))?;

    if settings.validate {
        let mut reserialized = String::new();
        crate::ast::serialize_nodes(&doc.nodes, &mut reserialized);
        if reserialized != source_text {
            tracing::warn!(
                template = filename.unwrap_or("<string>"),
                "re-serialized structure differs from source"
            );
        }
    }

    let program = Arc::new(compile_document(&doc, settings, registry, filename)?);
    if let Some(cache) = cache {
        cache.set(&key, program.clone(), filename)?;
    }
    Ok(program)
}

/// Resolves `load:` expressions through the template's resolver and
/// compiles the result with the same settings and cache.
struct EngineLoader<'t> {
    inner: &'t TemplateInner,
}

impl<'t> ProgramLoader for EngineLoader<'t> {
    fn load(&self, path: &str) -> Result<Arc<Program>> {
        let importer = self.inner.path.clone().unwrap_or_default();
        let resolved = self.inner.resolver.resolve(&importer, path)?;
        compile_source(
            &self.inner.settings,
            &self.inner.registry,
            resolved.source.as_bytes(),
            &resolved.source,
            Some(&resolved.path),
            self.inner.cache.as_deref(),
        )
    }
}

/// The macros of a compiled template.
///
/// Each macro renders with the same signature as the template itself.
#[derive(Debug, Clone)]
pub struct MacroSet {
    template: Template,
    program: Arc<Program>,
}

impl MacroSet {
    /// Macro names in definition order.
    pub fn names(&self) -> Vec<String> {
        self.program
            .macros
            .iter()
            .map(|m| m.name.clone())
            .collect()
    }

    /// Whether a macro exists.
    pub fn contains(&self, name: &str) -> bool {
        self.program.macro_named(name).is_some()
    }

    /// Renders one macro with an empty translator.
    pub fn render(&self, name: &str, vars: ValueMap) -> Result<String> {
        self.render_with(name, vars, &NullTranslator, ValueMap::new())
    }

    /// Renders one macro with a translator and keyword arguments.
    pub fn render_with(
        &self,
        name: &str,
        vars: ValueMap,
        translator: &dyn Translator,
        kwargs: ValueMap,
    ) -> Result<String> {
        let def = self.program.macro_named(name).ok_or_else(|| {
            TalError::ResolutionError(format!("no such macro: {:?}", name))
        })?;
        let loader = EngineLoader {
            inner: self.template.inner.as_ref(),
        };
        render_macro(
            &self.program,
            def,
            Vec::new(),
            &RenderParams {
                vars: &vars,
                translator,
                kwargs: &kwargs,
                loader: Some(&loader),
                source: None,
                settings: &self.template.inner.settings,
            },
        )
    }
}

impl<'a> IntoIterator for &'a MacroSet {
    type Item = String;
    type IntoIter = std::vec::IntoIter<String>;

    fn into_iter(self) -> Self::IntoIter {
        self.names().into_iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::value::Value;
    use std::fs;
    use tempfile::TempDir;

    fn vars(pairs: &[(&str, Value)]) -> ValueMap {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    #[test]
    fn test_inline_template_render() {
        let template =
            Template::new(r#"<p tal:content="name">x</p>"#, Settings::default()).unwrap();
        let out = template
            .render(vars(&[("name", Value::Str("World".into()))]))
            .unwrap();
        assert_eq!(out, "<p>World</p>");
    }

    #[test]
    fn test_cook_is_lazy_and_shared() {
        let template = Template::new(r#"<p>${1 + 1}</p>"#, Settings::default()).unwrap();
        {
            let state = template.inner.state.read().unwrap();
            assert!(matches!(&*state, CookState::Uncooked));
        }
        assert_eq!(template.render(ValueMap::new()).unwrap(), "<p>2</p>");
        let program_a = template.program().unwrap();
        let program_b = template.program().unwrap();
        assert!(Arc::ptr_eq(&program_a, &program_b));
    }

    #[test]
    fn test_failed_cook_is_terminal() {
        let template = Template::new("<p></div>", Settings::default()).unwrap();
        assert!(matches!(
            template.render(ValueMap::new()),
            Err(TalError::ParseError { .. })
        ));
        // The second attempt reports the stored failure.
        assert!(matches!(
            template.render(ValueMap::new()),
            Err(TalError::CookError(_))
        ));
    }

    #[test]
    fn test_eager_mode_cooks_in_constructor() {
        let mut settings = Settings::default();
        settings.eager = true;
        assert!(Template::new("<p></div>", settings).is_err());
    }

    #[test]
    fn test_file_template_and_macros() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("layout.pt");
        fs::write(
            &path,
            r#"<html metal:define-macro="main"><body><div metal:define-slot="content">d</div></body></html>"#,
        )
        .unwrap();

        let template = Template::from_file(&path, Settings::default()).unwrap();
        let macros = template.macros().unwrap();
        assert_eq!(macros.names(), vec!["main"]);
        assert!(macros.contains("main"));
        let out = macros.render("main", ValueMap::new()).unwrap();
        assert_eq!(out, "<html><body><div>d</div></body></html>");
    }

    #[test]
    fn test_auto_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("page.pt");
        fs::write(&path, "<p>one</p>").unwrap();

        let mut settings = Settings::default();
        settings.auto_reload = true;
        let template = Template::from_file(&path, settings).unwrap();
        assert_eq!(template.render(ValueMap::new()).unwrap(), "<p>one</p>");

        fs::write(&path, "<p>two</p>").unwrap();
        assert_eq!(template.render(ValueMap::new()).unwrap(), "<p>two</p>");
    }

    #[test]
    fn test_load_expression_via_search_path() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("layout.pt"),
            r#"<html metal:define-macro="main"><div metal:define-slot="content">d</div></html>"#,
        )
        .unwrap();
        let page_path = dir.path().join("page.pt");
        // The loaded template is held in a define; its macro table
        // feeds use-macro.
        fs::write(
            &page_path,
            concat!(
                r#"<div tal:define="layout load: layout.pt">"#,
                r#"<x metal:use-macro="layout.macros['main']">"#,
                r#"<p metal:fill-slot="content">mine</p></x></div>"#,
            ),
        )
        .unwrap();

        let template = Template::from_file(&page_path, Settings::default()).unwrap();
        let out = template.render(ValueMap::new()).unwrap();
        assert_eq!(out, "<div><html><p>mine</p></html></div>");
    }

    #[test]
    fn test_disk_cache_roundtrip() {
        let dir = TempDir::new().unwrap();
        let cache_dir = TempDir::new().unwrap();
        let path = dir.path().join("page.pt");
        fs::write(&path, r#"<p tal:content="x">y</p>"#).unwrap();

        let mut settings = Settings::default();
        settings.cache_dir = Some(cache_dir.path().to_path_buf());

        let first = Template::from_file(&path, settings.clone()).unwrap();
        assert_eq!(
            first.render(vars(&[("x", Value::Int(1))])).unwrap(),
            "<p>1</p>"
        );
        // One artifact file plus its sidecar.
        let artifacts: Vec<_> = fs::read_dir(cache_dir.path())
            .unwrap()
            .flatten()
            .filter(|e| e.path().extension().map(|x| x == "json").unwrap_or(false))
            .collect();
        assert_eq!(artifacts.len(), 1);

        // A fresh template instance renders from the cached artifact.
        let second = Template::from_file(&path, settings).unwrap();
        assert_eq!(
            second.render(vars(&[("x", Value::Int(2))])).unwrap(),
            "<p>2</p>"
        );
    }
}
