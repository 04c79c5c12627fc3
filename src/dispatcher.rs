//! Assembled dispatch facade.
//!
//! [`Dispatcher`] bundles the provider scheduler, the result cache, and the
//! cache warmer behind a single constructor so embedders wire one object at
//! startup instead of three.

use std::sync::Arc;

use tracing::info;

use crate::cache::{CacheWarmer, ResultCache};
use crate::config::DispatchConfig;
use crate::errors::DispatchResult;
use crate::observability::MetricsCollector;
use crate::scheduler::ProviderScheduler;

/// The scheduler, cache, and warmer wired together from one configuration.
pub struct Dispatcher {
    scheduler: ProviderScheduler,
    cache: Arc<ResultCache>,
    warmer: CacheWarmer,
}

impl Dispatcher {
    /// The provider scheduler.
    pub fn scheduler(&self) -> &ProviderScheduler {
        &self.scheduler
    }

    /// The shared result cache.
    pub fn cache(&self) -> &Arc<ResultCache> {
        &self.cache
    }

    /// The cache warmer, rooted at the configured project root.
    pub fn warmer(&self) -> &CacheWarmer {
        &self.warmer
    }

    /// Flushes in-flight durable cache writes. Call before process exit so
    /// cached results survive into the next run.
    pub async fn close(&self) {
        self.cache.close().await;
        info!("dispatcher closed");
    }
}

/// Creates a dispatcher from an explicit configuration.
///
/// # Examples
///
/// ```no_run
/// use integrations_dispatch::config::DispatchConfig;
/// use integrations_dispatch::create_dispatcher;
/// use integrations_dispatch::errors::DispatchResult;
///
/// # async fn run() -> DispatchResult<()> {
/// let dispatcher = create_dispatcher(DispatchConfig::default()).await?;
/// let summary: String = dispatcher
///     .scheduler()
///     .schedule("anthropic", || async { Ok("done".to_string()) })
///     .await?;
/// dispatcher.close().await;
/// # Ok(())
/// # }
/// ```
pub async fn create_dispatcher(config: DispatchConfig) -> DispatchResult<Dispatcher> {
    build(config, None).await
}

/// Creates a dispatcher that reports into the given metrics collector.
pub async fn create_dispatcher_with_metrics(
    config: DispatchConfig,
    metrics: Arc<dyn MetricsCollector>,
) -> DispatchResult<Dispatcher> {
    build(config, Some(metrics)).await
}

/// Creates a dispatcher from environment variables and defaults.
pub async fn create_dispatcher_from_env() -> DispatchResult<Dispatcher> {
    create_dispatcher(DispatchConfig::from_env()?).await
}

async fn build(
    config: DispatchConfig,
    metrics: Option<Arc<dyn MetricsCollector>>,
) -> DispatchResult<Dispatcher> {
    config.validate()?;

    let mut cache = ResultCache::open(config.cache.clone()).await;
    let mut scheduler = ProviderScheduler::new(config.scheduler.clone());
    if let Some(metrics) = &metrics {
        cache = cache.with_metrics(Arc::clone(metrics));
        scheduler = scheduler.with_metrics(Arc::clone(metrics));
    }

    let cache = Arc::new(cache);
    let mut warmer = CacheWarmer::new(Arc::clone(&cache)).with_root(&config.project_root);
    if let Some(metrics) = metrics {
        warmer = warmer.with_metrics(metrics);
    }

    info!(
        providers = config.scheduler.provider_limits.len(),
        cache_enabled = config.cache.enabled,
        project_root = %config.project_root.display(),
        "dispatcher initialized"
    );

    Ok(Dispatcher {
        scheduler,
        cache,
        warmer,
    })
}
