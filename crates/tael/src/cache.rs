// Copyright 2019-2026 Maravilla Labs, operated by SOLUTAS GmbH, Switzerland
// SPDX-License-Identifier: Apache-2.0
// SPDX-License-Identifier: MIT

//! Compiled program caching.
//!
//! Avoids repeated parsing and compilation of unchanged templates.
//!
//! # Cache Implementations
//!
//! - [`MemoryCache`]: in-memory LRU cache (recommended for most uses)
//! - [`FileSystemCache`]: persistent disk cache shared across
//!   processes; writers use atomic rename, readers tolerate partially
//!   written files
//! - [`NoOpCache`]: development mode, always compiles fresh
//!
//! # Keys
//!
//! A cache key is the pair of the source digest and the settings
//! digest (see [`crate::config::Settings::digest`]), so any option
//! that affects code generation, as well as a changed runtime,
//! invalidates prior artifacts.

use crate::error::{Result, TalError};
use crate::program::Program;
use lru::LruCache;
use sha2::{Digest, Sha256};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Computes the cache key for a source/settings pair.
pub fn cache_key(source: &str, settings_digest: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(source.as_bytes());
    hasher.update(b"\x00");
    hasher.update(settings_digest.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Digest of raw source bytes, used for auto-reload comparison.
pub fn source_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Trait for compiled program caches.
///
/// Implementations must be thread-safe; one cache serves parallel
/// renders and compiles.
pub trait Cache: Send + Sync + std::fmt::Debug {
    /// Retrieves a program from the cache.
    fn get(&self, key: &str) -> Result<Option<Arc<Program>>>;
    /// Stores a program in the cache. `source_path` feeds the debug
    /// sidecar where the backend keeps one.
    fn set(&self, key: &str, program: Arc<Program>, source_path: Option<&str>) -> Result<()>;
    /// Removes a program from the cache.
    fn remove(&self, key: &str) -> Result<()>;
    /// Clears all cached programs.
    fn clear(&self) -> Result<()>;
    /// Checks if a key exists in the cache.
    fn contains_key(&self, key: &str) -> bool;
    /// Creates a boxed clone (for use in closures).
    fn clone_box(&self) -> Box<dyn Cache>;
}

impl Clone for Box<dyn Cache> {
    fn clone(&self) -> Self {
        self.clone_box()
    }
}

/// In-memory LRU (Least Recently Used) cache.
#[derive(Debug, Clone)]
pub struct MemoryCache {
    cache: Arc<Mutex<LruCache<String, Arc<Program>>>>,
}

impl MemoryCache {
    /// Creates a new memory cache with the given capacity.
    pub fn new(capacity: usize) -> Self {
        let capacity = std::num::NonZeroUsize::new(capacity.max(1)).expect("non-zero");
        Self {
            cache: Arc::new(Mutex::new(LruCache::new(capacity))),
        }
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, LruCache<String, Arc<Program>>>> {
        self.cache
            .lock()
            .map_err(|_| TalError::CacheError("failed to acquire cache lock".to_string()))
    }
}

impl Cache for MemoryCache {
    fn get(&self, key: &str) -> Result<Option<Arc<Program>>> {
        Ok(self.lock()?.get(key).cloned())
    }

    fn set(&self, key: &str, program: Arc<Program>, _source_path: Option<&str>) -> Result<()> {
        self.lock()?.put(key.to_string(), program);
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.lock()?.pop(key);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.lock()?.clear();
        Ok(())
    }

    fn contains_key(&self, key: &str) -> bool {
        self.lock().map(|c| c.contains(key)).unwrap_or(false)
    }

    fn clone_box(&self) -> Box<dyn Cache> {
        Box::new(Self {
            cache: Arc::clone(&self.cache),
        })
    }
}

/// No-op cache that never stores or retrieves anything.
///
/// Useful for development mode where every render compiles fresh.
#[derive(Debug, Clone, Default)]
pub struct NoOpCache;

impl NoOpCache {
    /// Creates a new no-op cache.
    pub fn new() -> Self {
        Self
    }
}

impl Cache for NoOpCache {
    fn get(&self, _key: &str) -> Result<Option<Arc<Program>>> {
        Ok(None)
    }

    fn set(&self, _key: &str, _program: Arc<Program>, _source_path: Option<&str>) -> Result<()> {
        Ok(())
    }

    fn remove(&self, _key: &str) -> Result<()> {
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        Ok(())
    }

    fn contains_key(&self, _key: &str) -> bool {
        false
    }

    fn clone_box(&self) -> Box<dyn Cache> {
        Box::new(NoOpCache)
    }
}

/// Persistent filesystem-backed cache with a memory layer.
///
/// One file per cache key, named by the key itself (a content digest),
/// written via a temporary file and an atomic rename so that parallel
/// processes sharing the directory never observe torn writes. A
/// `.src` sidecar records the originating source path for debugging.
#[derive(Debug)]
pub struct FileSystemCache {
    cache_dir: PathBuf,
    memory: MemoryCache,
}

impl FileSystemCache {
    /// Creates a filesystem cache in `cache_dir` with a memory layer
    /// of `memory_capacity` entries.
    ///
    /// # Errors
    ///
    /// Returns an error if the cache directory cannot be created.
    pub fn new<P: Into<PathBuf>>(cache_dir: P, memory_capacity: usize) -> Result<Self> {
        let cache_dir = cache_dir.into();
        std::fs::create_dir_all(&cache_dir).map_err(|e| {
            TalError::CacheError(format!("failed to create cache directory: {}", e))
        })?;
        Ok(Self {
            cache_dir,
            memory: MemoryCache::new(memory_capacity),
        })
    }

    fn artifact_path(&self, key: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.json", key))
    }

    fn sidecar_path(&self, key: &str) -> PathBuf {
        self.cache_dir.join(format!("{}.src", key))
    }
}

impl Cache for FileSystemCache {
    fn get(&self, key: &str) -> Result<Option<Arc<Program>>> {
        if let Some(program) = self.memory.get(key)? {
            return Ok(Some(program));
        }
        let path = self.artifact_path(key);
        let data = match std::fs::read(&path) {
            Ok(data) => data,
            Err(_) => return Ok(None),
        };
        // A torn or truncated artifact reads as a miss, never an error.
        let program: Program = match serde_json::from_slice(&data) {
            Ok(program) => program,
            Err(e) => {
                tracing::warn!(key, error = %e, "discarding unreadable cache artifact");
                return Ok(None);
            }
        };
        let program = Arc::new(program);
        self.memory.set(key, program.clone(), None)?;
        Ok(Some(program))
    }

    fn set(&self, key: &str, program: Arc<Program>, source_path: Option<&str>) -> Result<()> {
        self.memory.set(key, program.clone(), source_path)?;

        let data = serde_json::to_vec(program.as_ref())
            .map_err(|e| TalError::CacheError(format!("failed to serialize program: {}", e)))?;
        let path = self.artifact_path(key);
        let tmp = self
            .cache_dir
            .join(format!("{}.json.tmp.{}", key, std::process::id()));
        std::fs::write(&tmp, &data)
            .map_err(|e| TalError::CacheError(format!("failed to write cache file: {}", e)))?;
        std::fs::rename(&tmp, &path)
            .map_err(|e| TalError::CacheError(format!("failed to commit cache file: {}", e)))?;

        if let Some(source_path) = source_path {
            // Best effort: the sidecar is debugging aid only.
            let _ = std::fs::write(self.sidecar_path(key), source_path);
        }
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<()> {
        self.memory.remove(key)?;
        let _ = std::fs::remove_file(self.artifact_path(key));
        let _ = std::fs::remove_file(self.sidecar_path(key));
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        self.memory.clear()?;
        let entries = std::fs::read_dir(&self.cache_dir)
            .map_err(|e| TalError::CacheError(format!("failed to read cache directory: {}", e)))?;
        for entry in entries.flatten() {
            let path = entry.path();
            let is_ours = path
                .extension()
                .map(|ext| ext == "json" || ext == "src")
                .unwrap_or(false);
            if path.is_file() && is_ours {
                let _ = std::fs::remove_file(&path);
            }
        }
        Ok(())
    }

    fn contains_key(&self, key: &str) -> bool {
        self.memory.contains_key(key) || self.artifact_path(key).is_file()
    }

    fn clone_box(&self) -> Box<dyn Cache> {
        Box::new(Self {
            cache_dir: self.cache_dir.clone(),
            memory: self.memory.clone(),
        })
    }
}
