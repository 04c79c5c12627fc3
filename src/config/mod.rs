//! Configuration types for the dispatch subsystem.

use crate::errors::{DispatchError, DispatchResult};
use crate::scheduler::CircuitBreakerConfig;
use crate::{
    DEFAULT_BASE_DELAY_MS, DEFAULT_CACHE_DIR, DEFAULT_CACHE_MAX_ENTRIES, DEFAULT_CACHE_TTL_SECS,
    DEFAULT_MAX_RETRIES, DEFAULT_REQUESTS_PER_SECOND,
};
use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

/// Pacing and retry limits for a single provider.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderLimits {
    /// Maximum dispatch rate for the provider
    pub requests_per_second: f64,
    /// Maximum number of in-queue retries per job
    pub max_retries: u32,
    /// Base delay for exponential backoff between retries
    pub base_delay: Duration,
}

impl Default for ProviderLimits {
    fn default() -> Self {
        Self {
            requests_per_second: DEFAULT_REQUESTS_PER_SECOND,
            max_retries: DEFAULT_MAX_RETRIES,
            base_delay: Duration::from_millis(DEFAULT_BASE_DELAY_MS),
        }
    }
}

impl ProviderLimits {
    /// Creates limits with the given rate and default retry settings
    pub fn with_rate(requests_per_second: f64) -> Self {
        Self {
            requests_per_second,
            ..Self::default()
        }
    }

    /// Minimum spacing between consecutive dispatches at this rate.
    ///
    /// Computed as `ceil(1000 / requests_per_second)` milliseconds, so a
    /// provider at 2 rps is dispatched at most once every 500ms. Non-finite
    /// or non-positive rates are paced as [`DEFAULT_REQUESTS_PER_SECOND`];
    /// [`DispatchConfig::validate`] rejects them up front, but a hand-built
    /// [`SchedulerConfig`] never passes through `validate`.
    pub fn min_interval(&self) -> Duration {
        let rate = if self.requests_per_second.is_finite() && self.requests_per_second > 0.0 {
            self.requests_per_second
        } else {
            DEFAULT_REQUESTS_PER_SECOND
        };
        Duration::from_millis((1000.0 / rate).ceil() as u64)
    }
}

/// Configuration for the provider scheduler.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Limits applied to providers without an explicit entry
    pub default_limits: ProviderLimits,
    /// Static per-provider overrides keyed by provider id
    pub provider_limits: HashMap<String, ProviderLimits>,
    /// Circuit breaker settings, shared by every provider's breaker
    pub circuit_breaker: CircuitBreakerConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        let mut provider_limits = HashMap::new();
        provider_limits.insert("anthropic".to_string(), ProviderLimits::with_rate(2.0));
        provider_limits.insert("openai".to_string(), ProviderLimits::with_rate(3.0));
        provider_limits.insert("cohere".to_string(), ProviderLimits::with_rate(2.0));
        provider_limits.insert("gemini".to_string(), ProviderLimits::with_rate(1.0));
        provider_limits.insert("groq".to_string(), ProviderLimits::with_rate(5.0));
        provider_limits.insert("mistral".to_string(), ProviderLimits::with_rate(2.0));

        Self {
            default_limits: ProviderLimits::default(),
            provider_limits,
            circuit_breaker: CircuitBreakerConfig::default(),
        }
    }
}

impl SchedulerConfig {
    /// Returns the limits configured for a provider, falling back to the
    /// default limits for unknown ids.
    pub fn limits_for(&self, provider: &str) -> ProviderLimits {
        self.provider_limits
            .get(provider)
            .cloned()
            .unwrap_or_else(|| self.default_limits.clone())
    }
}

/// Configuration for the tiered result cache.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Entry lifetime; entries older than this are treated as absent
    pub ttl: Duration,
    /// Fast-tier capacity; the least-recently-used entry is evicted on overflow
    pub max_entries: usize,
    /// Directory backing the durable tier
    pub cache_dir: PathBuf,
    /// When false the cache is constructed disabled and every lookup misses
    pub enabled: bool,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(DEFAULT_CACHE_TTL_SECS),
            max_entries: DEFAULT_CACHE_MAX_ENTRIES,
            cache_dir: PathBuf::from(DEFAULT_CACHE_DIR),
            enabled: true,
        }
    }
}

/// Top-level configuration for the dispatch subsystem.
#[derive(Debug, Clone)]
pub struct DispatchConfig {
    /// Scheduler pacing, retry, and breaker settings
    pub scheduler: SchedulerConfig,
    /// Result cache settings
    pub cache: CacheConfig,
    /// Root directory for warm-up scans and manifest discovery
    pub project_root: PathBuf,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            scheduler: SchedulerConfig::default(),
            cache: CacheConfig::default(),
            project_root: PathBuf::from("."),
        }
    }
}

impl DispatchConfig {
    /// Creates a new configuration builder
    pub fn builder() -> DispatchConfigBuilder {
        DispatchConfigBuilder::default()
    }

    /// Creates a configuration from environment variables.
    ///
    /// `DISPATCH_DEFAULT_RPS` overrides the default requests-per-second for
    /// providers without a static entry; everything else takes its default.
    pub fn from_env() -> DispatchResult<Self> {
        let mut config = Self::default();

        if let Some(rate) = std::env::var("DISPATCH_DEFAULT_RPS")
            .ok()
            .and_then(|s| s.parse::<f64>().ok())
        {
            config.scheduler.default_limits.requests_per_second = rate;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration, rejecting values the scheduler or cache
    /// cannot operate with.
    pub fn validate(&self) -> DispatchResult<()> {
        validate_rate(
            "default",
            self.scheduler.default_limits.requests_per_second,
        )?;
        for (provider, limits) in &self.scheduler.provider_limits {
            validate_rate(provider, limits.requests_per_second)?;
        }

        if self.scheduler.circuit_breaker.failure_threshold == 0 {
            return Err(DispatchError::Configuration {
                message: "failure_threshold must be at least 1".to_string(),
            });
        }

        if self.cache.max_entries == 0 {
            return Err(DispatchError::Configuration {
                message: "cache max_entries must be at least 1".to_string(),
            });
        }

        if self.cache.ttl.is_zero() {
            return Err(DispatchError::Configuration {
                message: "cache ttl must be positive".to_string(),
            });
        }

        Ok(())
    }
}

fn validate_rate(provider: &str, rate: f64) -> DispatchResult<()> {
    if !rate.is_finite() || rate <= 0.0 {
        return Err(DispatchError::Configuration {
            message: format!(
                "requests_per_second for {} must be finite and positive, got {}",
                provider, rate
            ),
        });
    }
    Ok(())
}

/// Builder for DispatchConfig
#[derive(Default)]
pub struct DispatchConfigBuilder {
    scheduler: Option<SchedulerConfig>,
    cache: Option<CacheConfig>,
    project_root: Option<PathBuf>,
}

impl DispatchConfigBuilder {
    /// Sets the scheduler configuration
    pub fn scheduler(mut self, scheduler: SchedulerConfig) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Sets the cache configuration
    pub fn cache(mut self, cache: CacheConfig) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Sets the project root used by warm-up scans
    pub fn project_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.project_root = Some(root.into());
        self
    }

    /// Adds or replaces the limits for one provider
    pub fn provider_limits(mut self, provider: impl Into<String>, limits: ProviderLimits) -> Self {
        self.scheduler
            .get_or_insert_with(SchedulerConfig::default)
            .provider_limits
            .insert(provider.into(), limits);
        self
    }

    /// Builds the configuration
    pub fn build(self) -> DispatchResult<DispatchConfig> {
        let config = DispatchConfig {
            scheduler: self.scheduler.unwrap_or_default(),
            cache: self.cache.unwrap_or_default(),
            project_root: self.project_root.unwrap_or_else(|| PathBuf::from(".")),
        };

        config.validate()?;
        Ok(config)
    }
}
