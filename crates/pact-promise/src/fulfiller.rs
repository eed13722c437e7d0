//! Fulfillment: run the action, then delete the promise.

use tokio_util::sync::CancellationToken;
use tracing::{error, warn};

use pact_core::{Error, Result};
use pact_resilience::ResiliencePipeline;
use pact_store::{Repository, StoredEntity};
use pact_telemetry::{instruments, Counter, MetricsRegistry};

use crate::entity::Promise;
use crate::registry::FulfillmentRegistry;

/// Attempts above this log failed fulfillments at `error` instead of `warn`.
const NOISY_ATTEMPT_THRESHOLD: u32 = 20;

/// Executes the registered action for a promise and removes the promise on
/// success.
#[derive(Clone)]
pub struct PromiseFulfiller {
    registry: FulfillmentRegistry,
    repository: Repository,
    pipeline: ResiliencePipeline,
    successes: Counter,
    delayed_successes: Counter,
    errors: Counter,
}

impl PromiseFulfiller {
    /// A fulfiller over the registry and repository.
    pub fn new(
        registry: FulfillmentRegistry,
        repository: Repository,
        metrics: &MetricsRegistry,
    ) -> Self {
        Self {
            registry,
            repository,
            pipeline: ResiliencePipeline::new(metrics),
            successes: metrics.counter(instruments::PROMISE_FULFILLER_SUCCESSES),
            delayed_successes: metrics.counter(instruments::PROMISE_FULFILLER_DELAYED_SUCCESSES),
            errors: metrics.counter(instruments::PROMISE_FULFILLER_ERRORS),
        }
    }

    /// Try to fulfill one promise whose attempt this caller holds.
    ///
    /// Consumes the attempt, runs the registered action, and deletes the
    /// promise document -- the delete runs with a fresh non-cancelable
    /// context so a completed action is always cleaned up.
    ///
    /// Only the programmer-error `InvalidState` of consuming the attempt
    /// propagates. Cancellation of `ct` exits silently (the salvager will
    /// retry); every other failure is counted, logged, and swallowed --
    /// rethrowing could make an outer resilience wrapper redo committed
    /// work, and a failure here is only ever a deferral.
    pub async fn try_fulfill(&self, promise: &mut Promise, ct: &CancellationToken) -> Result<()> {
        promise.consume_attempt()?;

        match self.fulfill_and_delete(promise, ct).await {
            Ok(()) => {
                self.successes.inc();
                if promise.attempt_count() > 1 {
                    self.delayed_successes.inc();
                }
                Ok(())
            }
            Err((_, error)) if error.is_canceled() && ct.is_cancelled() => Ok(()),
            Err((step, error)) => {
                self.errors.inc();
                if promise.attempt_count() <= NOISY_ATTEMPT_THRESHOLD {
                    warn!(
                        step,
                        action = promise.action_name(),
                        id = %promise.id(),
                        attempt = promise.attempt_count(),
                        error = %error,
                        "promise fulfillment failed; the salvager will retry"
                    );
                } else {
                    error!(
                        step,
                        action = promise.action_name(),
                        id = %promise.id(),
                        attempt = promise.attempt_count(),
                        error = %error,
                        "promise fulfillment keeps failing"
                    );
                }
                Ok(())
            }
        }
    }

    async fn fulfill_and_delete(
        &self,
        promise: &Promise,
        ct: &CancellationToken,
    ) -> std::result::Result<(), (&'static str, Error)> {
        let handler = self
            .registry
            .get(promise.action_name())
            .ok_or_else(|| {
                let error = Error::invalid_state(format!(
                    "no fulfillment handler is registered for action {:?}",
                    promise.action_name()
                ));
                ("fulfill", error)
            })?;

        self.pipeline
            .execute(|| handler.fulfill(promise, ct))
            .await
            .map_err(|error| ("fulfill", error))?;

        let repository = self.repository.clone();
        let id = promise.id().as_str().to_owned();
        let partition = promise.partition_key();
        self.pipeline
            .execute(move || {
                let repository = repository.clone();
                let id = id.clone();
                let partition = partition.clone();
                async move {
                    let mut tx = repository.create_transaction(partition);
                    tx.delete_by_id(id)?;
                    tx.commit().await
                }
            })
            .await
            .map_err(|error| ("delete", error))?;
        Ok(())
    }
}
