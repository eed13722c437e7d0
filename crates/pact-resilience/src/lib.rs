//! # Pact Resilience
//!
//! Retry support for operations racing on etag-conditional writes.
//!
//! The subsystem deliberately retries only [`ConcurrencyConflict`] errors
//! here: the store client is assumed to retry transient read failures on its
//! own, and a failed write may have partially succeeded, so write retries
//! stay the caller's responsibility.
//!
//! [`ConcurrencyConflict`]: pact_core::Error::ConcurrencyConflict

mod retry;

pub use retry::{retry, ResiliencePipeline, RetryStrategy};
