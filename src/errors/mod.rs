//! Error types for the dispatch subsystem.
//!
//! This module provides the error taxonomy shared by the scheduler, the
//! circuit breaker, and the result cache.

mod error;

pub use error::{DispatchError, DispatchResult};
