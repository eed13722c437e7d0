//! Fulfiller behaviour: success, action failure, cancellation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use tokio_util::sync::CancellationToken;
use tracing::Level;

use pact_core::clock::ClockScope;
use pact_core::{Error, Result};
use pact_promise::{
    FulfillmentHandler, FulfillmentRegistry, Promise, PromiseFactory, PromiseFulfiller,
};
use pact_store::{MemoryStore, Repository, StoredEntity};
use pact_telemetry::{instruments, LogCapture, MetricsRegistry};

const ACTION: &str = "Test.Archive";

#[derive(Default)]
struct RecordingHandler {
    invocations: AtomicUsize,
    outcome: Option<fn() -> Error>,
}

impl RecordingHandler {
    fn failing(outcome: fn() -> Error) -> Self {
        Self { invocations: AtomicUsize::new(0), outcome: Some(outcome) }
    }

    fn invocations(&self) -> usize {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FulfillmentHandler for RecordingHandler {
    async fn fulfill(&self, _promise: &Promise, _ct: &CancellationToken) -> Result<()> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        match self.outcome {
            Some(make_error) => Err(make_error()),
            None => Ok(()),
        }
    }
}

struct Fixture {
    store: Arc<MemoryStore>,
    repository: Repository,
    factory: PromiseFactory,
    fulfiller: PromiseFulfiller,
    metrics: MetricsRegistry,
    handler: Arc<RecordingHandler>,
}

fn fixture(handler: RecordingHandler) -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let repository = Repository::new(store.clone());
    let handler = Arc::new(handler);
    let registry = FulfillmentRegistry::builder()
        .register(ACTION, handler.clone() as Arc<dyn FulfillmentHandler>)
        .unwrap()
        .build();
    let metrics = MetricsRegistry::new();
    Fixture {
        store,
        repository: repository.clone(),
        factory: PromiseFactory::new(registry.clone()),
        fulfiller: PromiseFulfiller::new(registry, repository, &metrics),
        metrics,
        handler,
    }
}

async fn committed_promise(fixture: &Fixture) -> Promise {
    let mut promise = fixture.factory.create(ACTION, "payload").unwrap();
    let mut tx = fixture.repository.create_transaction(promise.partition_key());
    tx.create(&mut promise).unwrap();
    tx.commit().await.unwrap();
    promise
}

#[tokio::test]
async fn successful_fulfillment_removes_the_promise() {
    let capture = LogCapture::new();
    let _guard = capture.install();
    let _clock = ClockScope::fixed(Utc.with_ymd_and_hms(2024, 4, 1, 12, 0, 0).unwrap());
    let fixture = fixture(RecordingHandler::default());

    let mut promise = committed_promise(&fixture).await;
    assert_eq!(fixture.store.document_count(), 1);

    fixture.fulfiller.try_fulfill(&mut promise, &CancellationToken::new()).await.unwrap();

    assert_eq!(fixture.handler.invocations(), 1);
    assert_eq!(fixture.store.document_count(), 0);
    assert_eq!(capture.count_at(Level::WARN), 0);
    assert_eq!(capture.count_at(Level::ERROR), 0);
    assert_eq!(fixture.metrics.counter(instruments::PROMISE_FULFILLER_SUCCESSES).get(), 1);
    assert_eq!(
        fixture.metrics.counter(instruments::PROMISE_FULFILLER_DELAYED_SUCCESSES).get(),
        0
    );
}

#[tokio::test]
async fn a_failing_action_defers_with_a_single_warning() {
    let capture = LogCapture::new();
    let _guard = capture.install();
    let _clock = ClockScope::fixed(Utc.with_ymd_and_hms(2024, 4, 1, 12, 0, 0).unwrap());
    let fixture = fixture(RecordingHandler::failing(|| Error::storage("Test exception.")));

    let mut promise = committed_promise(&fixture).await;
    fixture.fulfiller.try_fulfill(&mut promise, &CancellationToken::new()).await.unwrap();

    assert_eq!(fixture.handler.invocations(), 1);
    // The promise survives for the salvager.
    assert_eq!(fixture.store.document_count(), 1);
    assert_eq!(capture.count_at(Level::WARN), 1);
    assert!(capture.contains(Level::WARN, ACTION));
    assert!(capture.contains(Level::WARN, "Test exception."));
    assert_eq!(capture.count_at(Level::ERROR), 0);
    assert_eq!(fixture.metrics.counter(instruments::PROMISE_FULFILLER_ERRORS).get(), 1);
    assert_eq!(fixture.metrics.counter(instruments::PROMISE_FULFILLER_SUCCESSES).get(), 0);
}

#[tokio::test]
async fn cancellation_exits_silently() {
    let capture = LogCapture::new();
    let _guard = capture.install();
    let _clock = ClockScope::fixed(Utc.with_ymd_and_hms(2024, 4, 1, 12, 0, 0).unwrap());
    let fixture = fixture(RecordingHandler::failing(|| Error::Canceled));

    let ct = CancellationToken::new();
    ct.cancel();

    let mut promise = committed_promise(&fixture).await;
    fixture.fulfiller.try_fulfill(&mut promise, &ct).await.unwrap();

    // No noise, no metrics movement; the salvager will repeat the attempt.
    assert_eq!(fixture.store.document_count(), 1);
    assert_eq!(capture.count_at(Level::WARN), 0);
    assert_eq!(capture.count_at(Level::ERROR), 0);
    assert_eq!(fixture.metrics.counter(instruments::PROMISE_FULFILLER_ERRORS).get(), 0);
}

#[tokio::test]
async fn consuming_without_a_committed_attempt_is_a_programmer_error() {
    let _clock = ClockScope::fixed(Utc.with_ymd_and_hms(2024, 4, 1, 12, 0, 0).unwrap());
    let fixture = fixture(RecordingHandler::default());

    // Never committed: no etag, no available attempt.
    let mut promise = fixture.factory.create(ACTION, "payload").unwrap();
    let result = fixture.fulfiller.try_fulfill(&mut promise, &CancellationToken::new()).await;
    assert!(matches!(result.unwrap_err(), Error::InvalidState(_)));
    assert_eq!(fixture.handler.invocations(), 0);
}

#[tokio::test]
async fn a_failed_delete_is_logged_with_its_step() {
    let capture = LogCapture::new();
    let _guard = capture.install();
    let _clock = ClockScope::fixed(Utc.with_ymd_and_hms(2024, 4, 1, 12, 0, 0).unwrap());
    let fixture = fixture(RecordingHandler::default());

    let mut promise = committed_promise(&fixture).await;
    // The action succeeds, then the delete hits a broken store.
    fixture.store.fail_next(1);
    fixture.fulfiller.try_fulfill(&mut promise, &CancellationToken::new()).await.unwrap();

    assert_eq!(fixture.handler.invocations(), 1);
    assert_eq!(capture.count_at(Level::WARN), 1);
    assert!(capture.contains(Level::WARN, "step=delete"));
    assert_eq!(fixture.metrics.counter(instruments::PROMISE_FULFILLER_ERRORS).get(), 1);
}
