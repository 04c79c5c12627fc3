//! Observability module providing metrics and logging capabilities.
//!
//! This module provides observability features for monitoring and debugging
//! the dispatch subsystem:
//!
//! - **Metrics**: scheduler and cache metrics (counters, histograms, gauges)
//! - **Logging**: structured logging with multiple formats
//!
//! ## Examples
//!
//! ```rust,no_run
//! use integrations_dispatch::observability::{
//!     InMemoryMetricsCollector, LogFormat, LogLevel, LoggingConfig, MetricsCollector,
//! };
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Initialize logging
//! LoggingConfig::new()
//!     .with_level(LogLevel::Info)
//!     .with_format(LogFormat::Pretty)
//!     .init()?;
//!
//! // Create metrics collector
//! let metrics = InMemoryMetricsCollector::new();
//! metrics.increment_counter("dispatch.jobs.scheduled", 1, &[("provider", "anthropic")]);
//! # Ok(())
//! # }
//! ```

mod logging;
mod metrics;

pub use logging::*;
pub use metrics::*;
