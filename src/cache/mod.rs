//! Result cache - content-addressed images with deduplicated concurrent builds
//!
//! Every fingerprint is in one of three states: absent, `InFlight` while a
//! producer runs, or `Complete` once its bytes are known. The in-flight
//! placeholder is installed under the map's entry lock before the producer
//! starts, so two requests for the same fingerprint never both build.

pub mod fingerprint;
pub mod store;

pub use fingerprint::{normalize_prompt, Fingerprint};
pub use store::FileStore;

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::error::{AppError, Result};

type BuildFuture = Shared<BoxFuture<'static, std::result::Result<Bytes, Arc<AppError>>>>;

/// State of one fingerprint in memory
#[derive(Clone)]
pub enum CacheRecord {
    InFlight(BuildFuture),
    Complete(Bytes),
}

/// Cache statistics
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub records: usize,
    pub in_flight: usize,
    pub builds: u64,
}

struct CacheInner {
    records: DashMap<String, CacheRecord>,
    /// Completed keys, oldest first, for memory eviction
    completed: Mutex<VecDeque<String>>,
    store: Option<FileStore>,
    memory_capacity: usize,
    builds: AtomicU64,
}

/// Content-addressed cache of generated images
#[derive(Clone)]
pub struct ResultCache {
    inner: Arc<CacheInner>,
}

impl ResultCache {
    /// Create a cache from configuration
    pub fn new(config: &CacheConfig) -> Self {
        let store = config.persist.then(|| FileStore::new(&config.dir));
        Self::with_store(store, config.memory_capacity)
    }

    /// Create a cache that only lives in memory
    pub fn in_memory(memory_capacity: usize) -> Self {
        Self::with_store(None, memory_capacity)
    }

    pub fn with_store(store: Option<FileStore>, memory_capacity: usize) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                records: DashMap::new(),
                completed: Mutex::new(VecDeque::new()),
                store,
                memory_capacity,
                builds: AtomicU64::new(0),
            }),
        }
    }

    /// Find a finished image, waiting on a build already in flight
    ///
    /// Returns `None` on a total miss or if the in-flight build fails.
    pub async fn lookup(&self, fingerprint: &Fingerprint) -> Option<Bytes> {
        if fingerprint.bypasses_cache() {
            return None;
        }

        match self.record(fingerprint.key()) {
            Some(CacheRecord::Complete(bytes)) => return Some(bytes),
            Some(CacheRecord::InFlight(build)) => return build.await.ok(),
            None => {}
        }

        self.read_store(fingerprint).await
    }

    /// Return the cached image or build it with `producer`
    ///
    /// Concurrent callers with the same fingerprint share one build. The
    /// producer runs on its own task, so it finishes and populates the cache
    /// even if every caller goes away. A failed build leaves nothing behind.
    pub async fn get_or_create<F, Fut>(&self, fingerprint: &Fingerprint, producer: F) -> Result<Bytes>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<Bytes>> + Send + 'static,
    {
        if fingerprint.bypasses_cache() {
            debug!(fingerprint = %fingerprint, "Cache bypassed");
            return producer().await;
        }

        match self.record(fingerprint.key()) {
            Some(CacheRecord::Complete(bytes)) => return Ok(bytes),
            Some(CacheRecord::InFlight(build)) => return build.await.map_err(AppError::Shared),
            None => {}
        }

        if let Some(bytes) = self.read_store(fingerprint).await {
            return Ok(bytes);
        }

        let build = match self.inner.records.entry(fingerprint.key().to_string()) {
            Entry::Occupied(entry) => match entry.get() {
                CacheRecord::Complete(bytes) => return Ok(bytes.clone()),
                CacheRecord::InFlight(build) => {
                    debug!(fingerprint = %fingerprint, "Attached to in-flight build");
                    build.clone()
                }
            },
            Entry::Vacant(entry) => {
                let build = self.spawn_build(fingerprint.clone(), producer());
                entry.insert(CacheRecord::InFlight(build.clone()));
                build
            }
        };

        build.await.map_err(AppError::Shared)
    }

    /// Cache statistics
    pub fn stats(&self) -> CacheStats {
        let in_flight = self
            .inner
            .records
            .iter()
            .filter(|r| matches!(r.value(), CacheRecord::InFlight(_)))
            .count();

        CacheStats {
            records: self.inner.records.len(),
            in_flight,
            builds: self.inner.builds.load(Ordering::Relaxed),
        }
    }

    fn record(&self, key: &str) -> Option<CacheRecord> {
        self.inner.records.get(key).map(|r| r.value().clone())
    }

    async fn read_store(&self, fingerprint: &Fingerprint) -> Option<Bytes> {
        let store = self.inner.store.as_ref()?;

        match store.read(&fingerprint.file_name()).await {
            Ok(Some(bytes)) => {
                debug!(fingerprint = %fingerprint, "Loaded image from disk");
                self.inner.remember_if_absent(fingerprint.key(), bytes.clone());
                Some(bytes)
            }
            Ok(None) => None,
            Err(e) => {
                warn!(fingerprint = %fingerprint, error = %e, "Failed to read cached image");
                None
            }
        }
    }

    fn spawn_build<Fut>(&self, fingerprint: Fingerprint, producer: Fut) -> BuildFuture
    where
        Fut: Future<Output = Result<Bytes>> + Send + 'static,
    {
        self.inner.builds.fetch_add(1, Ordering::Relaxed);
        debug!(fingerprint = %fingerprint, "Starting build");

        let inner = self.inner.clone();
        let key = fingerprint.key().to_string();
        let handle = tokio::spawn(async move {
            match producer.await {
                Ok(bytes) => {
                    inner.persist(&fingerprint, &bytes).await;
                    inner.complete(fingerprint.key(), bytes.clone());
                    Ok(bytes)
                }
                Err(e) => {
                    inner.forget_in_flight(fingerprint.key());
                    warn!(fingerprint = %fingerprint, error = %e, "Build failed, nothing cached");
                    Err(Arc::new(e))
                }
            }
        });

        let inner = self.inner.clone();
        async move {
            match handle.await {
                Ok(result) => result,
                Err(e) => {
                    inner.forget_in_flight(&key);
                    Err(Arc::new(AppError::Internal(format!("Build task failed: {}", e))))
                }
            }
        }
        .boxed()
        .shared()
    }
}

impl CacheInner {
    async fn persist(&self, fingerprint: &Fingerprint, bytes: &[u8]) {
        let Some(store) = &self.store else {
            return;
        };
        if let Err(e) = store.write(&fingerprint.file_name(), bytes).await {
            warn!(fingerprint = %fingerprint, error = %e, "Failed to persist image");
        }
    }

    /// Replace the in-flight placeholder with the finished bytes
    fn complete(&self, key: &str, bytes: Bytes) {
        let previous = self.records.insert(key.to_string(), CacheRecord::Complete(bytes));
        if !matches!(previous, Some(CacheRecord::Complete(_))) {
            self.track_completed(key);
        }
    }

    fn remember_if_absent(&self, key: &str, bytes: Bytes) {
        let inserted = match self.records.entry(key.to_string()) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                entry.insert(CacheRecord::Complete(bytes));
                true
            }
        };
        if inserted {
            self.track_completed(key);
        }
    }

    fn forget_in_flight(&self, key: &str) {
        self.records
            .remove_if(key, |_, record| matches!(record, CacheRecord::InFlight(_)));
    }

    fn track_completed(&self, key: &str) {
        let evicted: Vec<String> = {
            let mut completed = self.completed.lock();
            completed.push_back(key.to_string());
            let excess = completed.len().saturating_sub(self.memory_capacity);
            completed.drain(..excess).collect()
        };

        for key in evicted {
            self.records
                .remove_if(&key, |_, record| matches!(record, CacheRecord::Complete(_)));
        }
    }
}
