//! Integration tests for the two-tier result cache: persistence across
//! restarts, expiry, eviction, and key-addressed invalidation.

use integrations_dispatch::cache::{generate_key, ResultCache};
use integrations_dispatch::config::CacheConfig;
use pretty_assertions::{assert_eq, assert_ne};
use serde_json::json;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

fn cache_config(dir: &Path) -> CacheConfig {
    CacheConfig {
        ttl: Duration::from_secs(300),
        max_entries: 50,
        cache_dir: dir.join("cache"),
        enabled: true,
    }
}

#[tokio::test]
async fn test_cache_round_trips_structured_results() {
    // Arrange
    let dir = tempfile::tempdir().unwrap();
    let cache = ResultCache::open(cache_config(dir.path())).await;
    let result = json!({
        "analyzer": "security",
        "findings": [
            {"line": 14, "severity": "high", "message": "hardcoded credential"},
            {"line": 52, "severity": "low", "message": "shadowed variable"}
        ],
        "elapsed_ms": 1843
    });

    // Act
    cache.set("security:aa:bb", result.clone(), "security", "src/auth.rs").await;
    let loaded = cache.get("security:aa:bb").await;

    // Assert - Deep equality, not just presence
    assert_eq!(loaded, Some(result));
}

#[tokio::test]
async fn test_results_survive_restart() {
    // Arrange
    let dir = tempfile::tempdir().unwrap();
    let result = json!({"findings": []});

    {
        let cache = ResultCache::open(cache_config(dir.path())).await;
        cache.set("style:11:22", result.clone(), "style", "src/lib.rs").await;
        cache.close().await;
    }

    // Act - A new cache instance over the same directory
    let cache = ResultCache::open(cache_config(dir.path())).await;
    let loaded = cache.get("style:11:22").await;

    // Assert - Served from the durable tier and hydrated into memory
    assert_eq!(loaded, Some(result));
    let stats = cache.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.size, 1);
}

#[tokio::test]
async fn test_expiry_applies_across_restart() {
    // Arrange - The creation timestamp is persisted with the entry.
    let dir = tempfile::tempdir().unwrap();
    let mut config = cache_config(dir.path());
    config.ttl = Duration::from_millis(100);

    {
        let cache = ResultCache::open(config.clone()).await;
        cache.set("short-lived", json!(1), "style", "a.rs").await;
        cache.close().await;
    }

    tokio::time::sleep(Duration::from_millis(150)).await;

    // Act
    let cache = ResultCache::open(config).await;
    let loaded = cache.get("short-lived").await;

    // Assert - Expired on disk, removed on observation
    assert!(loaded.is_none());
    assert!(!cache.contains("short-lived").await);
    assert_eq!(cache.stats().misses, 1);
}

#[tokio::test]
async fn test_fresh_entry_hits_before_ttl() {
    // Arrange
    let dir = tempfile::tempdir().unwrap();
    let mut config = cache_config(dir.path());
    config.ttl = Duration::from_millis(200);
    let cache = ResultCache::open(config).await;

    // Act
    cache.set("fresh", json!("still here"), "style", "a.rs").await;
    tokio::time::sleep(Duration::from_millis(50)).await;

    // Assert
    assert_eq!(cache.get("fresh").await, Some(json!("still here")));
}

#[tokio::test]
async fn test_generated_keys_address_results() {
    // Arrange
    let dir = tempfile::tempdir().unwrap();
    let cache = ResultCache::open(cache_config(dir.path())).await;
    let key_v1 = generate_key("src/lib.rs", "pub fn run() {}", "style");
    let key_v2 = generate_key("src/lib.rs", "pub fn run() { init(); }", "style");
    assert_ne!(key_v1, key_v2);

    // Act - Cache a result for the first version of the file
    cache.set(&key_v1, json!({"clean": true}), "style", "src/lib.rs").await;

    // Assert - The edited file misses; the original still hits
    assert_eq!(cache.get(&key_v1).await, Some(json!({"clean": true})));
    assert!(cache.get(&key_v2).await.is_none());
    assert_eq!(key_v1, generate_key("src/lib.rs", "pub fn run() {}", "style"));
}

#[tokio::test]
async fn test_oldest_entry_is_evicted_from_both_tiers() {
    // Arrange - Capacity of two
    let dir = tempfile::tempdir().unwrap();
    let mut config = cache_config(dir.path());
    config.max_entries = 2;

    {
        let cache = ResultCache::open(config.clone()).await;
        cache.set("first", json!(1), "t", "a.rs").await;
        tokio::time::sleep(Duration::from_millis(5)).await;
        cache.set("second", json!(2), "t", "b.rs").await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        // Act - The third insert evicts the least-recently-used entry
        cache.set("third", json!(3), "t", "c.rs").await;
        cache.close().await;
    }

    // Assert - Eviction reached the durable tier too
    let cache = ResultCache::open(config).await;
    assert!(cache.get("first").await.is_none());
    assert_eq!(cache.get("second").await, Some(json!(2)));
    assert_eq!(cache.get("third").await, Some(json!(3)));
}

#[tokio::test]
async fn test_get_or_compute_computes_once() {
    // Arrange
    let dir = tempfile::tempdir().unwrap();
    let cache = ResultCache::open(cache_config(dir.path())).await;
    let computations = AtomicU32::new(0);

    // Act
    for _ in 0..5 {
        let value = cache
            .get_or_compute("expensive", || async {
                computations.fetch_add(1, Ordering::SeqCst);
                Ok(json!({"verdict": "approve"}))
            })
            .await
            .unwrap();
        assert_eq!(value, json!({"verdict": "approve"}));
    }

    // Assert
    assert_eq!(computations.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_get_or_compute_recomputes_after_invalidation() {
    // Arrange
    let dir = tempfile::tempdir().unwrap();
    let cache = ResultCache::open(cache_config(dir.path())).await;
    let computations = AtomicU32::new(0);
    let compute = || async {
        computations.fetch_add(1, Ordering::SeqCst);
        Ok(json!("result"))
    };

    // Act
    cache.get_or_compute("style:key", compute).await.unwrap();
    cache.close().await;
    cache.invalidate("style:").await;
    cache.get_or_compute("style:key", compute).await.unwrap();

    // Assert
    assert_eq!(computations.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_invalidate_clears_one_analyzer_only() {
    // Arrange - Keys generated the way analyzers produce them
    let dir = tempfile::tempdir().unwrap();
    let cache = ResultCache::open(cache_config(dir.path())).await;
    let security_key = generate_key("src/auth.rs", "fn check() {}", "security");
    let style_key = generate_key("src/auth.rs", "fn check() {}", "style");

    cache.set(&security_key, json!("sec"), "security", "src/auth.rs").await;
    cache.set(&style_key, json!("sty"), "style", "src/auth.rs").await;
    cache.close().await;

    // Act
    cache.invalidate("security:").await;

    // Assert
    assert!(cache.get(&security_key).await.is_none());
    assert_eq!(cache.get(&style_key).await, Some(json!("sty")));
}

#[tokio::test]
async fn test_hit_rate_reflects_lookup_history() {
    // Arrange
    let dir = tempfile::tempdir().unwrap();
    let cache = ResultCache::open(cache_config(dir.path())).await;
    assert_eq!(cache.stats().hit_rate, 0.0);

    // Act - One hit, three misses
    cache.set("present", json!(1), "t", "a.rs").await;
    cache.get("present").await;
    for key in ["gone-1", "gone-2", "gone-3"] {
        cache.get(key).await;
    }

    // Assert
    let stats = cache.stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 3);
    assert!((stats.hit_rate - 0.25).abs() < f64::EPSILON);
    assert!(stats.enabled);
}

#[tokio::test]
async fn test_disabled_cache_always_computes() {
    // Arrange
    let dir = tempfile::tempdir().unwrap();
    let mut config = cache_config(dir.path());
    config.enabled = false;
    let cache = ResultCache::open(config).await;
    let computations = AtomicU32::new(0);

    // Act
    for _ in 0..3 {
        cache
            .get_or_compute("k", || async {
                computations.fetch_add(1, Ordering::SeqCst);
                Ok(json!(1))
            })
            .await
            .unwrap();
    }

    // Assert - Every call computed; nothing was stored or counted
    assert_eq!(computations.load(Ordering::SeqCst), 3);
    let stats = cache.stats();
    assert!(!stats.enabled);
    assert_eq!(stats.size, 0);
    assert_eq!(stats.hits + stats.misses, 0);
}
