//! Bounded LRU cache of compiled statement templates
//!
//! Keys are hashes of a query's structural shape, so two queries that differ
//! only in literal values share one entry. A template holds no literals; the
//! plan builder re-derives parameters for every call. Caching is purely an
//! optimization: a disabled cache compiles every call and returns the same
//! results.

use std::fmt;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use lru::LruCache;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use crate::error::{QueryError, QueryResult};
use crate::observability::{Event, MetricsRegistry};

/// SHA-256 of a structural shape string
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct StructuralKey([u8; 32]);

impl StructuralKey {
    pub fn from_shape(shape: &str) -> Self {
        let digest = Sha256::digest(shape.as_bytes());
        let mut bytes = [0u8; 32];
        bytes.copy_from_slice(&digest);
        Self(bytes)
    }

    /// First 12 hex characters, for logs
    pub fn short(&self) -> String {
        self.to_string()[..12].to_string()
    }
}

impl fmt::Display for StructuralKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for StructuralKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StructuralKey({})", self.short())
    }
}

/// Literal-free compiled statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompiledTemplate {
    /// SQL with `?` placeholders
    pub sql: String,
    /// Number of placeholders, in binding order
    pub param_count: usize,
    /// Description of how rows are shaped after fetch
    pub result_shape: String,
}

/// Cache counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub len: usize,
    pub capacity: usize,
}

/// LRU of compiled templates, owned by one collection
pub struct StatementCache {
    entries: Mutex<LruCache<StructuralKey, Arc<CompiledTemplate>>>,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl fmt::Debug for StatementCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StatementCache")
            .field("stats", &self.stats())
            .finish()
    }
}

impl StatementCache {
    /// Creates a cache holding at most `capacity` templates
    pub fn new(capacity: usize) -> QueryResult<Self> {
        let capacity = NonZeroUsize::new(capacity)
            .ok_or_else(|| QueryError::config("statement cache capacity must be positive"))?;
        Ok(Self {
            entries: Mutex::new(LruCache::new(capacity)),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            metrics: None,
        })
    }

    /// Mirrors hit/miss/eviction counts into a metrics registry
    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Looks up a template, marking it most recently used
    pub fn get(&self, key: &StructuralKey) -> Option<Arc<CompiledTemplate>> {
        let found = self.entries.lock().get(key).cloned();
        match &found {
            Some(_) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                if let Some(metrics) = &self.metrics {
                    metrics.increment_cache_hits();
                }
            }
            None => {
                self.misses.fetch_add(1, Ordering::Relaxed);
                if let Some(metrics) = &self.metrics {
                    metrics.increment_cache_misses();
                }
            }
        }
        found
    }

    /// Inserts a template, evicting the least recently used entry when full
    pub fn insert(&self, key: StructuralKey, template: CompiledTemplate) -> Arc<CompiledTemplate> {
        let template = Arc::new(template);
        let evicted = self.entries.lock().push(key, Arc::clone(&template));
        if let Some((old_key, _)) = evicted {
            // `push` also returns the previous value when the key was present
            if old_key != key {
                self.evictions.fetch_add(1, Ordering::Relaxed);
                if let Some(metrics) = &self.metrics {
                    metrics.increment_cache_evictions();
                }
                Event::StatementCacheEvict.emit(&[("key", old_key.short().as_str())]);
            }
        }
        template
    }

    /// Returns the cached template for `key`, compiling and caching it on a miss.
    ///
    /// The boolean is true on a cache hit. Compile errors are never cached.
    pub fn get_or_compile<F>(
        &self,
        key: StructuralKey,
        compile: F,
    ) -> QueryResult<(Arc<CompiledTemplate>, bool)>
    where
        F: FnOnce() -> QueryResult<CompiledTemplate>,
    {
        if let Some(template) = self.get(&key) {
            return Ok((template, true));
        }
        let template = compile()?;
        Ok((self.insert(key, template), false))
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn capacity(&self) -> usize {
        self.entries.lock().cap().get()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn stats(&self) -> CacheStats {
        let entries = self.entries.lock();
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            len: entries.len(),
            capacity: entries.cap().get(),
        }
    }
}
