//! # Integrations Dispatch
//!
//! Resilient provider dispatch and result caching for code analysis
//! pipelines.
//!
//! ## Features
//!
//! - Per-provider FIFO queues with rate pacing and exponential-backoff retries
//! - Circuit breakers that shield failing providers and self-heal via probes
//! - Two-tier result cache: fast in-memory plus durable on-disk persistence
//! - Cache warming from glob patterns, git changes, and dependency manifests
//! - Comprehensive observability (tracing, logging, metrics)
//! - Type-safe configuration with builder and environment overrides
//! - Mockable storage seam for testing
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use integrations_dispatch::{create_dispatcher, DispatchConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let dispatcher = create_dispatcher(DispatchConfig::default()).await?;
//!
//!     // Schedule work on a provider's paced queue.
//!     let review: String = dispatcher
//!         .scheduler()
//!         .schedule("anthropic", || async { Ok("no findings".to_string()) })
//!         .await?;
//!     println!("{review}");
//!
//!     dispatcher.close().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! - `dispatcher` - Assembled facade and factory functions
//! - `scheduler` - Per-provider queues, pacing, retries, circuit breakers
//! - `cache` - Tiered result cache, key derivation, and warmup
//! - `config` - Configuration types and builder
//! - `errors` - Error types and taxonomy
//! - `observability` - Logging and metrics

#![warn(missing_docs)]
#![warn(clippy::all)]

// Public modules
pub mod cache;
pub mod config;
pub mod dispatcher;
pub mod errors;
pub mod observability;
pub mod scheduler;

// Re-exports for convenience
pub use cache::{
    generate_key, CacheEntry, CacheStats, CacheWarmer, DurableStore, JsonFileStore, ResultCache,
    WarmStats,
};
pub use config::{
    CacheConfig, DispatchConfig, DispatchConfigBuilder, ProviderLimits, SchedulerConfig,
};
pub use dispatcher::{
    create_dispatcher, create_dispatcher_from_env, create_dispatcher_with_metrics, Dispatcher,
};
pub use errors::{DispatchError, DispatchResult};
pub use observability::{
    InMemoryMetricsCollector, LogFormat, LogLevel, LoggingConfig, MetricsCollector,
    NoopMetricsCollector,
};
pub use scheduler::{
    CircuitBreaker, CircuitBreakerConfig, CircuitBreakerHook, CircuitState, ProviderScheduler,
    ProviderStats, ScheduleOptions,
};

/// The default dispatch rate for providers without explicit limits
pub const DEFAULT_REQUESTS_PER_SECOND: f64 = 2.0;

/// The default maximum number of in-queue retry attempts
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// The default base delay for exponential backoff (milliseconds)
pub const DEFAULT_BASE_DELAY_MS: u64 = 1_000;

/// Ceiling applied to exponential backoff delays (milliseconds)
pub const MAX_RETRY_DELAY_MS: u64 = 30_000;

/// Consecutive failures that open a provider's circuit
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;

/// How long an open circuit waits before admitting a probe (milliseconds)
pub const DEFAULT_RESET_TIMEOUT_MS: u64 = 30_000;

/// The default cache entry lifetime (seconds)
pub const DEFAULT_CACHE_TTL_SECS: u64 = 86_400;

/// The default fast-tier capacity
pub const DEFAULT_CACHE_MAX_ENTRIES: usize = 1_000;

/// The default durable cache directory
pub const DEFAULT_CACHE_DIR: &str = ".dispatch-cache";
