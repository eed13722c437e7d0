//! # Pact Telemetry
//!
//! In-process observability for the promise execution subsystem:
//!
//! - [`Counter`], [`Gauge`], [`Histogram`] -- atomic metric primitives
//! - [`MetricsRegistry`] -- name-keyed instrument registry
//! - [`instruments`] -- the well-known instrument names the subsystem emits
//! - [`LogCapture`] -- a `tracing` layer that records emitted events so
//!   behavioural tests can assert on log output
//!
//! Values live in memory; exporting them is an external concern.

pub mod capture;
pub mod metrics;

pub use capture::{LogCapture, LogRecord};
pub use metrics::{Counter, Gauge, Histogram, MetricsRegistry};

/// Well-known instrument names.
pub mod instruments {
    /// Counter: promises fulfilled and removed on the attempt that saw them.
    pub const PROMISE_FULFILLER_SUCCESSES: &str = "promise_fulfiller_successes";
    /// Counter: successes that needed more than one attempt.
    pub const PROMISE_FULFILLER_DELAYED_SUCCESSES: &str = "promise_fulfiller_delayed_successes";
    /// Counter: fulfillment attempts that failed and were deferred.
    pub const PROMISE_FULFILLER_ERRORS: &str = "promise_fulfiller_errors";
    /// Histogram: 1-based attempt number, sampled on every conflict retry.
    pub const CONCURRENCY_CONFLICT_RETRIES: &str = "concurrency_conflict_retries";
}
