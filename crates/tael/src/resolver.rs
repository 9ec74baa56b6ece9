// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Template resource resolution.
//!
//! This module provides the [`TemplateResolver`] trait and
//! implementations for locating and loading template sources. The core
//! consumes a resolver for two things: loading a template by path at
//! driver level, and resolving `load:` expressions relative to the
//! current template at render time.
//!
//! # Resolver Implementations
//!
//! - [`FileSystemResolver`]: loads templates from search roots
//! - [`MemoryResolver`]: in-memory storage for tests and embedding
//!
//! # Resolution Algorithm
//!
//! 1. **Absolute paths** resolve directly.
//! 2. **Explicit relative** (`./nav.pt`, `../shared/page.pt`) resolve
//!    against the importing template's directory.
//! 3. **Bare names** try the importer's directory first, then each
//!    search root in order.

use crate::error::{Result, TalError};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

/// Converts a path to a normalized string with forward slashes.
#[inline]
pub fn path_to_string<P: AsRef<Path>>(path: P) -> String {
    #[cfg(windows)]
    {
        use std::path::Component;
        let path = path.as_ref();
        let mut result = String::new();
        for (i, component) in path.components().enumerate() {
            if i > 0 {
                result.push('/');
            }
            match component {
                Component::Prefix(p) => result.push_str(&p.as_os_str().to_string_lossy()),
                Component::RootDir => result.push('/'),
                Component::CurDir => result.push('.'),
                Component::ParentDir => result.push_str(".."),
                Component::Normal(s) => result.push_str(&s.to_string_lossy()),
            }
        }
        result
    }
    #[cfg(not(windows))]
    {
        path.as_ref().to_string_lossy().to_string()
    }
}

/// A resolved template with its canonical path and source text.
#[derive(Debug, Clone)]
pub struct ResolvedTemplate {
    /// The resolved path (canonical where the backend has one).
    pub path: String,
    /// The template source.
    pub source: String,
}

/// Locates and loads template sources.
///
/// Implementations must be thread-safe; one resolver serves parallel
/// renders.
pub trait TemplateResolver: Send + Sync + 'static {
    /// Resolves a template reference and returns its source.
    ///
    /// # Arguments
    ///
    /// * `importer_path` - Path of the referencing template (empty for
    ///   the entry template)
    /// * `name` - The template path to resolve
    fn resolve(&self, importer_path: &str, name: &str) -> Result<ResolvedTemplate>;

    /// Returns the resolved path without loading the source.
    fn get_resolved_path(&self, importer_path: &str, name: &str) -> Result<String>;

    /// Creates a boxed clone (for use in closures).
    fn clone_box(&self) -> Box<dyn TemplateResolver>;
}

impl Clone for Box<dyn TemplateResolver> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// Filesystem-backed resolver with ordered search roots.
#[derive(Debug, Clone, Default)]
pub struct FileSystemResolver {
    /// Search roots tried in order for bare names.
    pub search_path: Vec<PathBuf>,
}

impl FileSystemResolver {
    /// Creates a resolver with a single search root.
    pub fn new<P: AsRef<Path>>(root: P) -> Self {
        Self {
            search_path: vec![root.as_ref().to_path_buf()],
        }
    }

    /// Creates a resolver with several search roots.
    pub fn with_search_path(search_path: Vec<PathBuf>) -> Self {
        Self { search_path }
    }

    fn candidates(&self, importer_path: &str, name: &str) -> Vec<PathBuf> {
        let name_path = Path::new(name);
        if name_path.is_absolute() {
            return vec![name_path.to_path_buf()];
        }

        let importer_dir = if importer_path.is_empty() {
            None
        } else {
            Path::new(importer_path).parent().map(Path::to_path_buf)
        };

        if name.starts_with("./") || name.starts_with("../") {
            return match importer_dir {
                Some(dir) => vec![dir.join(name_path)],
                None => vec![name_path.to_path_buf()],
            };
        }

        let mut candidates = Vec::new();
        if let Some(dir) = importer_dir {
            candidates.push(dir.join(name_path));
        }
        for root in &self.search_path {
            candidates.push(root.join(name_path));
        }
        if candidates.is_empty() {
            candidates.push(name_path.to_path_buf());
        }
        candidates
    }

    fn locate(&self, importer_path: &str, name: &str) -> Result<PathBuf> {
        let candidates = self.candidates(importer_path, name);
        for candidate in &candidates {
            if candidate.is_file() {
                return Ok(candidate.clone());
            }
        }
        Err(TalError::ResolutionError(format!(
            "cannot resolve template {:?} (tried {})",
            name,
            candidates
                .iter()
                .map(path_to_string)
                .collect::<Vec<_>>()
                .join(", ")
        )))
    }
}

impl TemplateResolver for FileSystemResolver {
    fn resolve(&self, importer_path: &str, name: &str) -> Result<ResolvedTemplate> {
        let path = self.locate(importer_path, name)?;
        let source = std::fs::read_to_string(&path).map_err(|e| {
            TalError::ResolutionError(format!("cannot read {:?}: {}", path_to_string(&path), e))
        })?;
        Ok(ResolvedTemplate {
            path: path_to_string(&path),
            source,
        })
    }

    fn get_resolved_path(&self, importer_path: &str, name: &str) -> Result<String> {
        self.locate(importer_path, name).map(path_to_string)
    }

    fn clone_box(&self) -> Box<dyn TemplateResolver> {
        Box::new(self.clone())
    }
}

/// In-memory resolver for tests and embedded templates.
#[derive(Debug, Clone, Default)]
pub struct MemoryResolver {
    templates: Arc<Mutex<HashMap<String, String>>>,
}

impl MemoryResolver {
    /// Creates an empty resolver.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a template under a name.
    pub fn add_template(&self, name: impl Into<String>, source: impl Into<String>) {
        self.templates
            .lock()
            .expect("memory resolver lock")
            .insert(name.into(), source.into());
    }
}

impl TemplateResolver for MemoryResolver {
    fn resolve(&self, _importer_path: &str, name: &str) -> Result<ResolvedTemplate> {
        let templates = self.templates.lock().expect("memory resolver lock");
        templates
            .get(name)
            .map(|source| ResolvedTemplate {
                path: name.to_string(),
                source: source.clone(),
            })
            .ok_or_else(|| TalError::ResolutionError(format!("no such template: {:?}", name)))
    }

    fn get_resolved_path(&self, _importer_path: &str, name: &str) -> Result<String> {
        let templates = self.templates.lock().expect("memory resolver lock");
        if templates.contains_key(name) {
            Ok(name.to_string())
        } else {
            Err(TalError::ResolutionError(format!(
                "no such template: {:?}",
                name
            )))
        }
    }

    fn clone_box(&self) -> Box<dyn TemplateResolver> {
        Box::new(self.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_filesystem_resolution_order() {
        let root = TempDir::new().unwrap();
        let shared = TempDir::new().unwrap();
        fs::write(root.path().join("page.pt"), "<p>root</p>").unwrap();
        fs::write(shared.path().join("nav.pt"), "<p>shared</p>").unwrap();
        fs::create_dir(root.path().join("sub")).unwrap();
        fs::write(root.path().join("sub/nav.pt"), "<p>sub</p>").unwrap();

        let resolver = FileSystemResolver::with_search_path(vec![
            root.path().to_path_buf(),
            shared.path().to_path_buf(),
        ]);

        // Entry template by bare name.
        let page = resolver.resolve("", "page.pt").unwrap();
        assert_eq!(page.source, "<p>root</p>");

        // Importer directory beats search roots.
        let importer = path_to_string(root.path().join("sub/page.pt"));
        let nav = resolver.resolve(&importer, "nav.pt").unwrap();
        assert_eq!(nav.source, "<p>sub</p>");

        // Search roots serve what the importer directory lacks.
        let nav = resolver.resolve(&importer, "../nav.pt");
        assert!(nav.is_err());
        let nav = resolver.resolve(&path_to_string(root.path().join("page.pt")), "nav.pt");
        assert_eq!(nav.unwrap().source, "<p>shared</p>");
    }

    #[test]
    fn test_explicit_relative_resolution() {
        let root = TempDir::new().unwrap();
        fs::create_dir(root.path().join("a")).unwrap();
        fs::write(root.path().join("a/inner.pt"), "<p>inner</p>").unwrap();
        fs::write(root.path().join("outer.pt"), "<p>outer</p>").unwrap();

        let resolver = FileSystemResolver::new(root.path());
        let importer = path_to_string(root.path().join("a/inner.pt"));
        let outer = resolver.resolve(&importer, "../outer.pt").unwrap();
        assert_eq!(outer.source, "<p>outer</p>");
    }

    #[test]
    fn test_memory_resolver() {
        let resolver = MemoryResolver::new();
        resolver.add_template("hello.pt", "<p>hi</p>");
        assert_eq!(resolver.resolve("", "hello.pt").unwrap().source, "<p>hi</p>");
        assert!(resolver.resolve("", "missing.pt").is_err());
    }
}
