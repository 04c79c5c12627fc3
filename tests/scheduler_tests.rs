//! Integration tests for provider scheduling: pacing, retries, and circuit
//! breaking through the public API.

use integrations_dispatch::config::{ProviderLimits, SchedulerConfig};
use integrations_dispatch::errors::{DispatchError, DispatchResult};
use integrations_dispatch::scheduler::{
    CircuitBreakerConfig, CircuitState, ProviderScheduler, ScheduleOptions,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

fn scheduler_config(threshold: u32, reset_ms: u64) -> SchedulerConfig {
    SchedulerConfig {
        default_limits: ProviderLimits {
            requests_per_second: 50.0,
            max_retries: 3,
            base_delay: Duration::from_millis(20),
        },
        provider_limits: HashMap::new(),
        circuit_breaker: CircuitBreakerConfig {
            failure_threshold: threshold,
            reset_timeout: Duration::from_millis(reset_ms),
        },
    }
}

fn provider_error(provider: &str) -> DispatchError {
    DispatchError::Provider {
        provider: provider.to_string(),
        message: "upstream returned 503".to_string(),
        status_code: Some(503),
    }
}

async fn fail_once(scheduler: &ProviderScheduler, provider: &str) -> DispatchResult<()> {
    let name = provider.to_string();
    scheduler
        .schedule_with_opts(
            provider,
            move || {
                let name = name.clone();
                async move { Err(provider_error(&name)) }
            },
            ScheduleOptions {
                max_retries: Some(0),
                base_delay: None,
            },
        )
        .await
}

#[tokio::test]
async fn test_jobs_are_paced_at_provider_rate() {
    // Arrange - 4 rps means one dispatch every 250ms.
    let mut provider_limits = HashMap::new();
    provider_limits.insert(
        "paced".to_string(),
        ProviderLimits {
            requests_per_second: 4.0,
            max_retries: 0,
            base_delay: Duration::from_millis(10),
        },
    );
    let config = SchedulerConfig {
        default_limits: ProviderLimits::default(),
        provider_limits,
        circuit_breaker: CircuitBreakerConfig::default(),
    };
    let scheduler = Arc::new(ProviderScheduler::new(config));
    let timestamps = Arc::new(Mutex::new(Vec::new()));
    let start = Instant::now();

    // Act - Submit four jobs at once
    let mut handles = Vec::new();
    for _ in 0..4 {
        let stamps = Arc::clone(&timestamps);
        let scheduler = Arc::clone(&scheduler);
        handles.push(tokio::spawn(async move {
            scheduler
                .schedule("paced", move || {
                    let stamps = Arc::clone(&stamps);
                    async move {
                        stamps.lock().unwrap().push(Instant::now());
                        Ok(())
                    }
                })
                .await
        }));
    }
    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    // Assert - Three inter-dispatch gaps of ~250ms each
    let stamps = timestamps.lock().unwrap();
    assert_eq!(stamps.len(), 4);
    assert!(
        start.elapsed() >= Duration::from_millis(700),
        "four jobs finished too quickly: {:?}",
        start.elapsed()
    );
    for pair in stamps.windows(2) {
        let gap = pair[1] - pair[0];
        assert!(
            gap >= Duration::from_millis(230),
            "consecutive dispatches only {:?} apart",
            gap
        );
    }
}

#[tokio::test]
async fn test_jobs_run_in_submission_order() {
    // Arrange
    let scheduler = Arc::new(ProviderScheduler::new(scheduler_config(5, 10_000)));
    let order = Arc::new(Mutex::new(Vec::new()));

    let schedule_tagged = |tag: &'static str| {
        let scheduler = Arc::clone(&scheduler);
        let order = Arc::clone(&order);
        async move {
            scheduler
                .schedule("ordered", move || {
                    let order = Arc::clone(&order);
                    async move {
                        order.lock().unwrap().push(tag);
                        Ok(())
                    }
                })
                .await
        }
    };

    // Act - Submit three jobs in one task so enqueue order is fixed
    let (a, b, c) = tokio::join!(
        schedule_tagged("first"),
        schedule_tagged("second"),
        schedule_tagged("third")
    );
    a.unwrap();
    b.unwrap();
    c.unwrap();

    // Assert
    assert_eq!(*order.lock().unwrap(), vec!["first", "second", "third"]);
}

#[tokio::test]
async fn test_providers_are_paced_independently() {
    // Arrange - A backed-up slow queue must not delay other providers.
    let mut provider_limits = HashMap::new();
    provider_limits.insert("slow".to_string(), ProviderLimits::with_rate(2.0));
    provider_limits.insert("fast".to_string(), ProviderLimits::with_rate(100.0));
    let config = SchedulerConfig {
        default_limits: ProviderLimits::default(),
        provider_limits,
        circuit_breaker: CircuitBreakerConfig::default(),
    };
    let scheduler = Arc::new(ProviderScheduler::new(config));

    for _ in 0..2 {
        let scheduler = Arc::clone(&scheduler);
        tokio::spawn(async move { scheduler.schedule("slow", || async { Ok(()) }).await });
    }
    tokio::time::sleep(Duration::from_millis(10)).await;

    // Act
    let start = Instant::now();
    scheduler
        .schedule("fast", || async { Ok(()) })
        .await
        .unwrap();

    // Assert - The fast job never waited behind the slow queue
    assert!(
        start.elapsed() < Duration::from_millis(200),
        "fast provider was delayed by {:?}",
        start.elapsed()
    );
}

#[tokio::test]
async fn test_failed_jobs_retry_with_exponential_backoff() {
    // Arrange
    let scheduler = ProviderScheduler::new(scheduler_config(10, 10_000));
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempts);
    let start = Instant::now();

    // Act - Fail twice, then succeed
    let value = scheduler
        .schedule_with_opts(
            "flaky",
            move || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n < 2 {
                        Err(provider_error("flaky"))
                    } else {
                        Ok("eventually")
                    }
                }
            },
            ScheduleOptions {
                max_retries: Some(3),
                base_delay: Some(Duration::from_millis(50)),
            },
        )
        .await;

    // Assert - Two backoff delays of 50ms and 100ms before success
    assert_eq!(value.unwrap(), "eventually");
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
    assert!(
        start.elapsed() >= Duration::from_millis(140),
        "retries came back too fast: {:?}",
        start.elapsed()
    );
}

#[tokio::test]
async fn test_retries_exhaust_to_the_last_error() {
    // Arrange
    let scheduler = ProviderScheduler::new(scheduler_config(10, 10_000));
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempts);

    // Act - Always fail with a retryable error
    let result: DispatchResult<()> = scheduler
        .schedule_with_opts(
            "down",
            move || {
                counter.fetch_add(1, Ordering::SeqCst);
                async { Err(provider_error("down")) }
            },
            ScheduleOptions {
                max_retries: Some(2),
                base_delay: Some(Duration::from_millis(5)),
            },
        )
        .await;

    // Assert - Initial attempt plus two retries
    assert!(matches!(result, Err(DispatchError::Provider { .. })));
    assert_eq!(attempts.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn test_circuit_opens_after_consecutive_failures() {
    // Arrange
    let scheduler = ProviderScheduler::new(scheduler_config(3, 10_000));

    // Act - Three failures reach the threshold
    for _ in 0..3 {
        assert!(fail_once(&scheduler, "broken").await.is_err());
    }

    // Assert
    let stats = scheduler.stats_for("broken").unwrap();
    assert_eq!(stats.circuit_state, CircuitState::Open);
    assert!(stats.failure_count >= 3);
    assert!(stats.last_failure_at.is_some());

    // The next job is rejected without ever being invoked.
    let invoked = Arc::new(AtomicBool::new(false));
    let flag = Arc::clone(&invoked);
    let result: DispatchResult<()> = scheduler
        .schedule("broken", move || {
            flag.store(true, Ordering::SeqCst);
            async { Ok(()) }
        })
        .await;

    match result {
        Err(DispatchError::CircuitOpen {
            provider,
            retry_after,
        }) => {
            assert_eq!(provider, "broken");
            assert!(retry_after.is_some());
        }
        other => panic!("expected an open-circuit rejection, got {:?}", other),
    }
    assert!(!invoked.load(Ordering::SeqCst));
}

#[tokio::test]
async fn test_circuit_recovers_through_half_open_probe() {
    // Arrange - Threshold 2, cooldown 150ms
    let scheduler = ProviderScheduler::new(scheduler_config(2, 150));
    for _ in 0..2 {
        let _ = fail_once(&scheduler, "healing").await;
    }
    assert_eq!(
        scheduler.stats_for("healing").unwrap().circuit_state,
        CircuitState::Open
    );

    // Before the cooldown elapses the provider stays shielded.
    let early: DispatchResult<()> = scheduler.schedule("healing", || async { Ok(()) }).await;
    assert!(matches!(early, Err(DispatchError::CircuitOpen { .. })));

    // Act - Wait out the cooldown; the next job runs as the probe
    tokio::time::sleep(Duration::from_millis(200)).await;
    let value = scheduler
        .schedule("healing", || async { Ok("healed") })
        .await
        .unwrap();

    // Assert - A successful probe closes the circuit and resets the count
    assert_eq!(value, "healed");
    let stats = scheduler.stats_for("healing").unwrap();
    assert_eq!(stats.circuit_state, CircuitState::Closed);
    assert_eq!(stats.failure_count, 0);
}

#[tokio::test]
async fn test_failed_probe_reopens_the_circuit() {
    // Arrange
    let scheduler = ProviderScheduler::new(scheduler_config(1, 80));
    let _ = fail_once(&scheduler, "relapsing").await;
    assert_eq!(
        scheduler.stats_for("relapsing").unwrap().circuit_state,
        CircuitState::Open
    );

    // Act - The probe itself fails
    tokio::time::sleep(Duration::from_millis(120)).await;
    let probe = fail_once(&scheduler, "relapsing").await;

    // Assert - Back to open, without another full cooldown having elapsed
    assert!(matches!(probe, Err(DispatchError::Provider { .. })));
    let stats = scheduler.stats_for("relapsing").unwrap();
    assert_eq!(stats.circuit_state, CircuitState::Open);

    let rejected: DispatchResult<()> =
        scheduler.schedule("relapsing", || async { Ok(()) }).await;
    assert!(matches!(rejected, Err(DispatchError::CircuitOpen { .. })));
}

#[tokio::test]
async fn test_schedule_with_retry_survives_open_circuit() {
    // Arrange - One failure opens the circuit; cooldown 60ms
    let scheduler = ProviderScheduler::new(scheduler_config(1, 60));
    let attempts = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&attempts);
    let start = Instant::now();

    // Act - The outer retry loop waits out the breaker cooldown
    let value = scheduler
        .schedule_with_retry(
            "fragile",
            move || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                async move {
                    if n == 0 {
                        Err(provider_error("fragile"))
                    } else {
                        Ok("back online")
                    }
                }
            },
            ScheduleOptions {
                max_retries: Some(2),
                base_delay: Some(Duration::from_millis(10)),
            },
        )
        .await;

    // Assert - Second invocation was the successful half-open probe
    assert_eq!(value.unwrap(), "back online");
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
    assert!(
        start.elapsed() >= Duration::from_millis(55),
        "cooldown was not respected: {:?}",
        start.elapsed()
    );
    assert_eq!(
        scheduler.stats_for("fragile").unwrap().circuit_state,
        CircuitState::Closed
    );
}

#[tokio::test]
async fn test_stats_snapshot_all_providers() {
    // Arrange
    let scheduler = ProviderScheduler::new(scheduler_config(5, 10_000));
    scheduler
        .schedule("anthropic", || async { Ok(()) })
        .await
        .unwrap();
    let _ = fail_once(&scheduler, "openai").await;

    // Act
    let stats = scheduler.stats();

    // Assert
    assert_eq!(stats.len(), 2);
    assert_eq!(stats["anthropic"].circuit_state, CircuitState::Closed);
    assert_eq!(stats["anthropic"].failure_count, 0);
    assert_eq!(stats["openai"].failure_count, 1);
    assert_eq!(stats["openai"].requests_per_second, 50.0);
}
