//! Two-tier analysis result cache.
//!
//! Lookups hit a fast in-memory tier first and fall back to a durable
//! on-disk tier, hydrating durable hits back into memory. Writes land in the
//! fast tier synchronously and reach the durable tier on a fire-and-forget
//! basis, so callers never wait on disk. Entries expire lazily by TTL and
//! the fast tier evicts its least-recently-used entry when full.
//!
//! Caching is an optimization, never a correctness requirement: if the
//! durable tier cannot be initialized the cache opens disabled, every lookup
//! misses, and analyses simply recompute.

mod key;
mod store;
mod warmer;

pub use key::generate_key;
pub use store::{CacheEntry, DurableStore, JsonFileStore};
pub use warmer::{CacheWarmer, WarmStats};

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::config::CacheConfig;
use crate::errors::DispatchResult;
use crate::observability::{metric_names, MetricsCollector, NoopMetricsCollector};

/// Point-in-time cache counters, serializable for diagnostics output.
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    /// Entries currently resident in the fast tier.
    pub size: usize,
    /// Fast-tier capacity.
    pub max_size: usize,
    /// Configured entry lifetime.
    pub ttl: Duration,
    /// Lifetime hit count.
    pub hits: u64,
    /// Lifetime miss count.
    pub misses: u64,
    /// `hits / (hits + misses)`, `0.0` before any lookup.
    pub hit_rate: f64,
    /// Whether the cache is serving lookups at all.
    pub enabled: bool,
}

struct FastTier {
    entries: HashMap<String, CacheEntry>,
    access_times: HashMap<String, Instant>,
}

impl FastTier {
    fn new() -> Self {
        Self {
            entries: HashMap::new(),
            access_times: HashMap::new(),
        }
    }

    fn remove(&mut self, key: &str) {
        self.entries.remove(key);
        self.access_times.remove(key);
    }
}

/// The two-tier result cache.
///
/// Cheap to share behind an [`Arc`]; all methods take `&self`.
pub struct ResultCache {
    config: CacheConfig,
    fast: Mutex<FastTier>,
    durable: Option<Arc<dyn DurableStore>>,
    enabled: bool,
    hits: AtomicU64,
    misses: AtomicU64,
    pending_writes: Mutex<Vec<JoinHandle<()>>>,
    metrics: Arc<dyn MetricsCollector>,
}

impl ResultCache {
    /// Opens the cache described by `config`.
    ///
    /// A durable-tier initialization failure does not propagate: the cache
    /// comes up disabled with a single warning logged, and every later
    /// operation is a cheap no-op.
    pub async fn open(config: CacheConfig) -> Self {
        if !config.enabled {
            debug!("result cache disabled by configuration");
            return Self::disabled_with(config);
        }

        match JsonFileStore::open(config.cache_dir.clone()).await {
            Ok(fs_store) => Self::with_store(config, Arc::new(fs_store)),
            Err(err) => {
                warn!(
                    error = %err,
                    dir = %config.cache_dir.display(),
                    "durable cache tier unavailable, caching disabled"
                );
                Self::disabled_with(config)
            }
        }
    }

    /// Builds a cache over a caller-supplied durable store.
    pub fn with_store(config: CacheConfig, durable: Arc<dyn DurableStore>) -> Self {
        if !config.enabled {
            return Self::disabled_with(config);
        }
        Self {
            config,
            fast: Mutex::new(FastTier::new()),
            durable: Some(durable),
            enabled: true,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            pending_writes: Mutex::new(Vec::new()),
            metrics: Arc::new(NoopMetricsCollector),
        }
    }

    fn disabled_with(config: CacheConfig) -> Self {
        Self {
            config,
            fast: Mutex::new(FastTier::new()),
            durable: None,
            enabled: false,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            pending_writes: Mutex::new(Vec::new()),
            metrics: Arc::new(NoopMetricsCollector),
        }
    }

    /// Replaces the metrics collector. Intended for wiring at startup.
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Looks up `key`, consulting the fast tier and then the durable tier.
    ///
    /// Expired entries are removed from both tiers on observation and count
    /// as misses. A durable hit is hydrated into the fast tier so the next
    /// lookup stays in memory.
    pub async fn get(&self, key: &str) -> Option<Value> {
        if !self.enabled {
            return None;
        }

        enum FastOutcome {
            Hit(Value),
            Expired,
            Absent,
        }

        let outcome = {
            let mut fast = self.fast.lock();
            match fast.entries.get(key) {
                Some(entry) if !entry.is_expired(self.config.ttl) => {
                    let value = entry.value.clone();
                    fast.access_times.insert(key.to_string(), Instant::now());
                    FastOutcome::Hit(value)
                }
                Some(_) => {
                    fast.remove(key);
                    FastOutcome::Expired
                }
                None => FastOutcome::Absent,
            }
        };

        match outcome {
            FastOutcome::Hit(value) => {
                self.record_hit();
                return Some(value);
            }
            FastOutcome::Expired => {
                // Expired in memory means expired on disk too.
                if let Some(durable) = &self.durable {
                    let _ = durable.remove(key).await;
                }
                self.record_miss();
                return None;
            }
            FastOutcome::Absent => {}
        }

        let Some(durable) = &self.durable else {
            self.record_miss();
            return None;
        };

        match durable.load(key).await {
            Ok(Some(entry)) if !entry.is_expired(self.config.ttl) => {
                let value = entry.value.clone();
                self.hydrate(entry);
                self.record_hit();
                Some(value)
            }
            Ok(Some(_)) => {
                let _ = durable.remove(key).await;
                self.record_miss();
                None
            }
            Ok(None) => {
                self.record_miss();
                None
            }
            Err(err) => {
                // Corrupt entries have already been dropped by the store;
                // either way the caller just sees a miss.
                debug!(key, error = %err, "durable tier read failed");
                self.record_miss();
                None
            }
        }
    }

    /// Stores `value` under `key`.
    ///
    /// The fast tier is updated before this returns; the durable write is
    /// spawned fire-and-forget and a failure there is logged, not surfaced.
    /// Call [`close`](Self::close) to wait for in-flight writes.
    pub async fn set(&self, key: &str, value: Value, analyzer_tag: &str, source_path: &str) {
        if !self.enabled {
            return;
        }

        let entry = CacheEntry::new(key, value, analyzer_tag, source_path);

        {
            let mut fast = self.fast.lock();
            if fast.entries.len() >= self.config.max_entries && !fast.entries.contains_key(key) {
                self.evict_lru_locked(&mut fast);
            }
            fast.access_times.insert(key.to_string(), Instant::now());
            fast.entries.insert(key.to_string(), entry.clone());
        }

        if let Some(durable) = &self.durable {
            let durable = Arc::clone(durable);
            self.track_write(tokio::spawn(async move {
                if let Err(err) = durable.persist(&entry).await {
                    warn!(key = %entry.key, error = %err, "durable cache write failed");
                }
            }));
        }
    }

    /// Returns the cached value for `key`, computing and storing it on a
    /// miss.
    ///
    /// Compute errors propagate to the caller and nothing is cached. When
    /// the cache is disabled this simply runs `compute`.
    pub async fn get_or_compute<F, Fut>(&self, key: &str, compute: F) -> DispatchResult<Value>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = DispatchResult<Value>>,
    {
        if !self.enabled {
            return compute().await;
        }
        if let Some(value) = self.get(key).await {
            return Ok(value);
        }
        let value = compute().await?;
        self.set(key, value.clone(), "", "").await;
        Ok(value)
    }

    /// Removes every entry whose key contains `pattern` from both tiers.
    ///
    /// Keys embed the analyzer tag and a source-path hash, so passing either
    /// fragment drops all entries for that analyzer or file.
    pub async fn invalidate(&self, pattern: &str) {
        if !self.enabled {
            return;
        }

        let fast_removed = {
            let mut fast = self.fast.lock();
            let matching: Vec<String> = fast
                .entries
                .keys()
                .filter(|k| k.contains(pattern))
                .cloned()
                .collect();
            for key in &matching {
                fast.remove(key);
            }
            matching.len()
        };

        // The durable tier can hold keys the fast tier already evicted, so
        // match against its full key set rather than what was just removed.
        if let Some(durable) = &self.durable {
            match durable.keys().await {
                Ok(keys) => {
                    for key in keys.iter().filter(|k| k.contains(pattern)) {
                        let _ = durable.remove(key).await;
                    }
                }
                Err(err) => {
                    debug!(error = %err, "durable key listing failed during invalidation");
                }
            }
        }

        debug!(pattern, fast_removed, "cache entries invalidated");
    }

    /// Empties both tiers. Hit/miss counters are lifetime totals and are not
    /// reset.
    pub async fn clear(&self) {
        if !self.enabled {
            return;
        }

        {
            let mut fast = self.fast.lock();
            fast.entries.clear();
            fast.access_times.clear();
        }

        if let Some(durable) = &self.durable {
            if let Err(err) = durable.clear().await {
                warn!(error = %err, "durable cache clear failed");
            }
        }
    }

    /// Whether either tier currently holds a fresh entry for `key`.
    ///
    /// Expired entries count as absent and are reaped on observation, like
    /// [`get`](Self::get); unlike `get`, access times and the hit/miss
    /// counters are left untouched.
    pub async fn contains(&self, key: &str) -> bool {
        if !self.enabled {
            return false;
        }

        enum Presence {
            Fresh,
            Expired,
            Absent,
        }

        let presence = {
            let mut fast = self.fast.lock();
            match fast.entries.get(key) {
                Some(entry) if !entry.is_expired(self.config.ttl) => Presence::Fresh,
                Some(_) => {
                    fast.remove(key);
                    Presence::Expired
                }
                None => Presence::Absent,
            }
        };

        match presence {
            Presence::Fresh => return true,
            Presence::Expired => {
                if let Some(durable) = &self.durable {
                    let _ = durable.remove(key).await;
                }
                return false;
            }
            Presence::Absent => {}
        }

        let Some(durable) = &self.durable else {
            return false;
        };

        match durable.load(key).await {
            Ok(Some(entry)) if !entry.is_expired(self.config.ttl) => true,
            Ok(Some(_)) => {
                let _ = durable.remove(key).await;
                false
            }
            _ => false,
        }
    }

    /// Current counters.
    pub fn stats(&self) -> CacheStats {
        let size = self.fast.lock().entries.len();
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        };
        CacheStats {
            size,
            max_size: self.config.max_entries,
            ttl: self.config.ttl,
            hits,
            misses,
            hit_rate,
            enabled: self.enabled,
        }
    }

    /// Waits for every in-flight durable write to settle.
    ///
    /// [`set`](Self::set) is fire-and-forget; call this before process exit
    /// when persisted entries must survive into the next run.
    pub async fn close(&self) {
        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.pending_writes.lock());
        for handle in handles {
            let _ = handle.await;
        }
    }

    fn hydrate(&self, entry: CacheEntry) {
        let mut fast = self.fast.lock();
        if fast.entries.len() >= self.config.max_entries && !fast.entries.contains_key(&entry.key)
        {
            self.evict_lru_locked(&mut fast);
        }
        fast.access_times.insert(entry.key.clone(), Instant::now());
        fast.entries.insert(entry.key.clone(), entry);
    }

    /// Drops the least-recently-used entry from the fast tier and schedules
    /// its durable removal. Caller holds the fast-tier lock.
    fn evict_lru_locked(&self, fast: &mut FastTier) {
        let Some(oldest) = fast
            .access_times
            .iter()
            .min_by_key(|(_, at)| **at)
            .map(|(k, _)| k.clone())
        else {
            return;
        };

        fast.remove(&oldest);
        debug!(key = %oldest, "evicting least-recently-used cache entry");
        self.metrics
            .increment_counter(metric_names::CACHE_EVICTIONS, 1, &[]);

        if let Some(durable) = &self.durable {
            let durable = Arc::clone(durable);
            self.track_write(tokio::spawn(async move {
                let _ = durable.remove(&oldest).await;
            }));
        }
    }

    fn track_write(&self, handle: JoinHandle<()>) {
        let mut pending = self.pending_writes.lock();
        pending.retain(|h| !h.is_finished());
        pending.push(handle);
    }

    fn record_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
        self.metrics
            .increment_counter(metric_names::CACHE_HITS, 1, &[]);
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
        self.metrics
            .increment_counter(metric_names::CACHE_MISSES, 1, &[]);
    }
}
