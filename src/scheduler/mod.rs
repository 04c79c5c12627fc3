//! Provider-keyed job scheduling.
//!
//! The scheduler routes each unit of work to a per-provider FIFO queue that
//! paces dispatches, retries transient failures with exponential backoff, and
//! shields unhealthy providers behind a circuit breaker. Queues and breakers
//! are created lazily on first use and live for the process lifetime.

mod circuit_breaker;
mod queue;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitBreakerHook, CircuitState};

use crate::config::SchedulerConfig;
use crate::errors::{DispatchError, DispatchResult};
use crate::observability::{metric_names, MetricsCollector, NoopMetricsCollector};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use queue::{retry_delay, Job, ProviderQueue};
use serde::Serialize;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::debug;

/// Per-call overrides for [`ProviderScheduler::schedule_with_opts`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ScheduleOptions {
    /// Overrides the provider's configured retry budget
    pub max_retries: Option<u32>,
    /// Overrides the provider's configured backoff base delay
    pub base_delay: Option<Duration>,
}

/// Point-in-time snapshot of one provider's queue and breaker.
#[derive(Debug, Clone, Serialize)]
pub struct ProviderStats {
    /// Provider id the snapshot describes
    pub provider: String,
    /// Jobs waiting in the queue (excludes the in-flight job)
    pub queue_size: usize,
    /// Configured dispatch rate
    pub requests_per_second: f64,
    /// Whether the drain task is currently active
    pub is_draining: bool,
    /// Current circuit breaker state
    pub circuit_state: CircuitState,
    /// Failures recorded since the circuit last closed
    pub failure_count: u32,
    /// Wall-clock time of the most recent failure
    pub last_failure_at: Option<DateTime<Utc>>,
}

/// Routes jobs to per-provider queues, creating them on demand.
///
/// # Examples
///
/// ```no_run
/// use integrations_dispatch::config::SchedulerConfig;
/// use integrations_dispatch::scheduler::ProviderScheduler;
/// use integrations_dispatch::errors::DispatchResult;
///
/// # async fn run() -> DispatchResult<()> {
/// let scheduler = ProviderScheduler::new(SchedulerConfig::default());
/// let review: String = scheduler
///     .schedule("anthropic", || async { Ok("LGTM".to_string()) })
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct ProviderScheduler {
    config: SchedulerConfig,
    queues: RwLock<HashMap<String, Arc<ProviderQueue>>>,
    metrics: Arc<dyn MetricsCollector>,
    breaker_hook: Option<Arc<dyn CircuitBreakerHook>>,
}

impl ProviderScheduler {
    /// Creates a scheduler with the given configuration
    pub fn new(config: SchedulerConfig) -> Self {
        Self {
            config,
            queues: RwLock::new(HashMap::new()),
            metrics: Arc::new(NoopMetricsCollector),
            breaker_hook: None,
        }
    }

    /// Attach a metrics collector
    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsCollector>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Attach a hook observing every circuit breaker transition.
    ///
    /// Applies only to queues created after the call, so install hooks before
    /// scheduling work.
    pub fn with_breaker_hook(mut self, hook: Arc<dyn CircuitBreakerHook>) -> Self {
        self.breaker_hook = Some(hook);
        self
    }

    /// Schedules `f` on the named provider's queue with its configured
    /// retry budget.
    ///
    /// The returned future settles when the job finally succeeds, exhausts
    /// its retries, or is rejected because the provider's circuit is open.
    /// There is no way to cancel a job once scheduled; dropping the returned
    /// future does not dequeue it.
    pub async fn schedule<F, Fut, T>(&self, provider: &str, f: F) -> DispatchResult<T>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = DispatchResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        self.schedule_with_opts(provider, f, ScheduleOptions::default())
            .await
    }

    /// Schedules `f` with per-call retry overrides.
    pub async fn schedule_with_opts<F, Fut, T>(
        &self,
        provider: &str,
        f: F,
        opts: ScheduleOptions,
    ) -> DispatchResult<T>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = DispatchResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let queue = self.queue_for(provider);
        let limits = self.config.limits_for(provider);
        let max_retries = opts.max_retries.unwrap_or(limits.max_retries);
        let base_delay = opts.base_delay.unwrap_or(limits.base_delay);

        self.metrics.increment_counter(
            metric_names::JOBS_SCHEDULED,
            1,
            &[("provider", provider)],
        );

        let (job, rx) = Job::from_fn(f, max_retries, base_delay);
        queue.enqueue(job);

        let result = match rx.await {
            Ok(result) => result,
            Err(_) => Err(DispatchError::Internal {
                message: format!("job for provider {} dropped before settling", provider),
            }),
        };

        let outcome = match &result {
            Ok(_) => metric_names::JOBS_SUCCEEDED,
            Err(DispatchError::CircuitOpen { .. }) => metric_names::JOBS_REJECTED,
            Err(_) => metric_names::JOBS_FAILED,
        };
        self.metrics
            .increment_counter(outcome, 1, &[("provider", provider)]);

        result
    }

    /// Schedules `f`, re-attempting even terminal failures.
    ///
    /// Unlike the in-queue retries, the outer loop also re-attempts after a
    /// circuit rejection, waiting out the longer of the backoff delay and the
    /// breaker's reported cooldown. The retry budget from `opts` (or the
    /// provider's limits) caps the outer attempts as well.
    pub async fn schedule_with_retry<F, Fut, T>(
        &self,
        provider: &str,
        f: F,
        opts: ScheduleOptions,
    ) -> DispatchResult<T>
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = DispatchResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let limits = self.config.limits_for(provider);
        let max_retries = opts.max_retries.unwrap_or(limits.max_retries);
        let base_delay = opts.base_delay.unwrap_or(limits.base_delay);

        let f = Arc::new(f);
        let mut attempt = 0u32;
        loop {
            let call = Arc::clone(&f);
            match self
                .schedule_with_opts(provider, move || (call)(), opts)
                .await
            {
                Ok(value) => return Ok(value),
                Err(err) if attempt < max_retries => {
                    let backoff = retry_delay(base_delay, attempt);
                    let delay = match err.retry_after() {
                        Some(cooldown) if cooldown > backoff => cooldown,
                        _ => backoff,
                    };
                    attempt += 1;
                    debug!(
                        provider,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "re-attempting after terminal failure"
                    );
                    sleep(delay).await;
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Snapshot of one provider's queue, or `None` if no work has been
    /// scheduled for it yet.
    pub fn stats_for(&self, provider: &str) -> Option<ProviderStats> {
        self.queues
            .read()
            .get(provider)
            .map(|queue| self.snapshot(provider, queue))
    }

    /// Snapshots every provider queue created so far.
    pub fn stats(&self) -> HashMap<String, ProviderStats> {
        self.queues
            .read()
            .iter()
            .map(|(provider, queue)| (provider.clone(), self.snapshot(provider, queue)))
            .collect()
    }

    fn snapshot(&self, provider: &str, queue: &Arc<ProviderQueue>) -> ProviderStats {
        let breaker = queue.breaker();
        ProviderStats {
            provider: provider.to_string(),
            queue_size: queue.queue_size(),
            requests_per_second: queue.requests_per_second(),
            is_draining: queue.is_draining(),
            circuit_state: breaker.state(),
            failure_count: breaker.failure_count(),
            last_failure_at: breaker.last_failure_at(),
        }
    }

    fn queue_for(&self, provider: &str) -> Arc<ProviderQueue> {
        if let Some(queue) = self.queues.read().get(provider) {
            return Arc::clone(queue);
        }

        let mut queues = self.queues.write();
        let queue = queues.entry(provider.to_string()).or_insert_with(|| {
            debug!(provider, "creating provider queue");
            let limits = self.config.limits_for(provider);
            let observer = Arc::new(BreakerObserver {
                metrics: Arc::clone(&self.metrics),
                user_hook: self.breaker_hook.clone(),
            });
            let breaker = Arc::new(
                CircuitBreaker::new(provider, self.config.circuit_breaker.clone())
                    .with_hook(observer),
            );
            Arc::new(ProviderQueue::new(
                provider,
                limits,
                breaker,
                Arc::clone(&self.metrics),
            ))
        });
        Arc::clone(queue)
    }
}

/// Bridges breaker transitions into the metrics collector (and a user hook
/// when one is installed).
struct BreakerObserver {
    metrics: Arc<dyn MetricsCollector>,
    user_hook: Option<Arc<dyn CircuitBreakerHook>>,
}

impl CircuitBreakerHook for BreakerObserver {
    fn on_state_change(&self, provider: &str, old: CircuitState, new: CircuitState) {
        // 0=closed, 1=open, 2=half-open
        let gauge = match new {
            CircuitState::Closed => 0.0,
            CircuitState::Open => 1.0,
            CircuitState::HalfOpen => 2.0,
        };
        self.metrics.set_gauge(
            metric_names::CIRCUIT_STATE,
            gauge,
            &[("provider", provider)],
        );
        if let Some(hook) = &self.user_hook {
            hook.on_state_change(provider, old, new);
        }
    }
}
