//! Per-provider FIFO queue with paced, breaker-guarded dispatch.

use crate::config::ProviderLimits;
use crate::errors::{DispatchError, DispatchResult};
use crate::observability::{metric_names, MetricsCollector};
use crate::MAX_RETRY_DELAY_MS;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::oneshot;
use tokio::time::sleep;
use tracing::{debug, warn};

use super::circuit_breaker::CircuitBreaker;

type RunFn = Box<dyn FnMut() -> BoxFuture<'static, DispatchResult<()>> + Send>;
type FailFn = Box<dyn FnOnce(DispatchError) + Send>;

/// One unit of scheduled work, owned by its provider's queue until it
/// settles.
///
/// The success value travels through a oneshot captured by the `run`
/// closure, so the queue itself only sees `DispatchResult<()>` and can stay
/// untyped across jobs.
pub(crate) struct Job {
    run: RunFn,
    fail: Option<FailFn>,
    retry_count: u32,
    max_retries: u32,
    base_delay: Duration,
}

impl Job {
    /// Wraps a caller-supplied async closure into a queueable job plus the
    /// receiver its terminal result is delivered on.
    pub(crate) fn from_fn<F, Fut, T>(
        mut f: F,
        max_retries: u32,
        base_delay: Duration,
    ) -> (Self, oneshot::Receiver<DispatchResult<T>>)
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = DispatchResult<T>> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let tx = Arc::new(Mutex::new(Some(tx)));
        let fail_tx = Arc::clone(&tx);

        let run: RunFn = Box::new(move || {
            let fut = f();
            let tx = Arc::clone(&tx);
            Box::pin(async move {
                match fut.await {
                    Ok(value) => {
                        if let Some(tx) = tx.lock().take() {
                            let _ = tx.send(Ok(value));
                        }
                        Ok(())
                    }
                    Err(err) => Err(err),
                }
            })
        });

        let fail: FailFn = Box::new(move |err| {
            if let Some(tx) = fail_tx.lock().take() {
                let _ = tx.send(Err(err));
            }
        });

        let job = Self {
            run,
            fail: Some(fail),
            retry_count: 0,
            max_retries,
            base_delay,
        };
        (job, rx)
    }

    fn reject(mut self, err: DispatchError) {
        if let Some(fail) = self.fail.take() {
            fail(err);
        }
    }
}

struct QueueState {
    pending: VecDeque<Job>,
    is_draining: bool,
    last_dispatch: Option<Instant>,
}

/// FIFO queue for a single provider.
///
/// Consecutive dispatches are separated by at least `ceil(1000 / rps)` ms,
/// measured on a monotonic clock. A single drain task per queue serializes
/// dispatch, so at most one job per provider is in flight; the task is
/// spawned lazily on enqueue and exits when the queue empties.
pub(crate) struct ProviderQueue {
    provider: String,
    limits: ProviderLimits,
    min_interval: Duration,
    breaker: Arc<CircuitBreaker>,
    metrics: Arc<dyn MetricsCollector>,
    state: Mutex<QueueState>,
}

impl ProviderQueue {
    pub(crate) fn new(
        provider: impl Into<String>,
        limits: ProviderLimits,
        breaker: Arc<CircuitBreaker>,
        metrics: Arc<dyn MetricsCollector>,
    ) -> Self {
        let min_interval = limits.min_interval();
        Self {
            provider: provider.into(),
            limits,
            min_interval,
            breaker,
            metrics,
            state: Mutex::new(QueueState {
                pending: VecDeque::new(),
                is_draining: false,
                last_dispatch: None,
            }),
        }
    }

    pub(crate) fn enqueue(self: &Arc<Self>, job: Job) {
        let mut state = self.state.lock();
        state.pending.push_back(job);
        self.publish_depth(&state);
        self.ensure_draining(&mut state);
    }

    fn requeue_front(self: &Arc<Self>, job: Job) {
        let mut state = self.state.lock();
        state.pending.push_front(job);
        self.publish_depth(&state);
        self.ensure_draining(&mut state);
    }

    /// Publishes the pending length to the depth gauge. Called at every
    /// point the queue grows or shrinks, under the state lock.
    fn publish_depth(&self, state: &QueueState) {
        self.metrics.set_gauge(
            metric_names::QUEUE_DEPTH,
            state.pending.len() as f64,
            &[("provider", self.provider.as_str())],
        );
    }

    fn ensure_draining(self: &Arc<Self>, state: &mut QueueState) {
        if state.is_draining {
            return;
        }
        state.is_draining = true;
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            queue.drain().await;
        });
    }

    /// Drains the queue one job at a time until it is empty.
    ///
    /// Each iteration pops the head, waits out the pacing interval, stamps
    /// `last_dispatch`, and runs the job through the circuit breaker. Failed
    /// jobs with retry budget left are re-inserted at the front of the queue
    /// after their backoff delay so retries are not starved behind later
    /// arrivals.
    async fn drain(self: Arc<Self>) {
        loop {
            let mut job = {
                let mut state = self.state.lock();
                match state.pending.pop_front() {
                    Some(job) => {
                        self.publish_depth(&state);
                        job
                    }
                    None => {
                        state.is_draining = false;
                        return;
                    }
                }
            };

            let wait = {
                let state = self.state.lock();
                state
                    .last_dispatch
                    .map(|at| self.min_interval.saturating_sub(at.elapsed()))
                    .unwrap_or(Duration::ZERO)
            };
            if !wait.is_zero() {
                sleep(wait).await;
            }

            self.state.lock().last_dispatch = Some(Instant::now());
            self.metrics.increment_counter(
                metric_names::JOBS_DISPATCHED,
                1,
                &[("provider", self.provider.as_str())],
            );

            match self.breaker.execute(|| (job.run)()).await {
                Ok(()) => {}
                Err(err @ DispatchError::CircuitOpen { .. }) => {
                    // The breaker, not the job, owns recovery.
                    debug!(provider = %self.provider, "job rejected, circuit open");
                    job.reject(err);
                }
                Err(err) if job.retry_count < job.max_retries => {
                    let delay = retry_delay(job.base_delay, job.retry_count);
                    job.retry_count += 1;
                    warn!(
                        provider = %self.provider,
                        attempt = job.retry_count,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "job failed, retrying"
                    );
                    self.metrics.increment_counter(
                        metric_names::JOBS_RETRIED,
                        1,
                        &[("provider", self.provider.as_str())],
                    );
                    let queue = Arc::clone(&self);
                    tokio::spawn(async move {
                        sleep(delay).await;
                        queue.requeue_front(job);
                    });
                }
                Err(err) => {
                    warn!(
                        provider = %self.provider,
                        error = %err,
                        "job failed, retries exhausted"
                    );
                    job.reject(err);
                }
            }
        }
    }

    pub(crate) fn queue_size(&self) -> usize {
        self.state.lock().pending.len()
    }

    pub(crate) fn is_draining(&self) -> bool {
        self.state.lock().is_draining
    }

    pub(crate) fn requests_per_second(&self) -> f64 {
        self.limits.requests_per_second
    }

    pub(crate) fn breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }
}

/// Exponential backoff delay for the given retry ordinal, capped at
/// [`MAX_RETRY_DELAY_MS`]. The first retry waits the base delay, each
/// subsequent retry doubles it.
pub(crate) fn retry_delay(base_delay: Duration, retry_count: u32) -> Duration {
    let delay_ms = base_delay.as_millis() as f64 * 2f64.powi(retry_count as i32);
    Duration::from_millis(delay_ms.min(MAX_RETRY_DELAY_MS as f64) as u64)
}
