//! The background salvager: finds due promises and re-drives them.

use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::error;

use pact_core::{clock, Error, Result};
use pact_resilience::ResiliencePipeline;
use pact_store::{
    rfc3339, Consistency, ContinuationToken, Filter, Query, Repository, SortOrder, StoredEntity,
};
use pact_telemetry::MetricsRegistry;

use crate::entity::Promise;
use crate::fulfiller::PromiseFulfiller;

/// Mean pause between salvage passes.
const AVERAGE_DELAY: Duration = Duration::from_secs(60);

/// Due promises fetched per page; a short page ends the pass.
const BATCH_SIZE: usize = 10;

/// Lifecycle of the background task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SalvagerState {
    Stopped,
    Running,
    Stopping,
}

const STATE_STOPPED: u8 = 0;
const STATE_RUNNING: u8 = 1;
const STATE_STOPPING: u8 = 2;

/// Background loop that claims neglected promises and hands them to the
/// fulfiller.
///
/// Started at host start, stopped at host stop. Each pass drains every due
/// promise it can claim; passes are spaced by a jittered delay so competing
/// replicas spread out. Every failure is a deferral -- there is no poison
/// state.
#[derive(Clone)]
pub struct PromiseSalvager {
    inner: Arc<Inner>,
}

struct Inner {
    repository: Repository,
    fulfiller: PromiseFulfiller,
    pipeline: ResiliencePipeline,
    state: AtomicU8,
    stop: CancellationToken,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl PromiseSalvager {
    /// A salvager over the repository and fulfiller.
    pub fn new(
        repository: Repository,
        fulfiller: PromiseFulfiller,
        metrics: &MetricsRegistry,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                repository,
                fulfiller,
                pipeline: ResiliencePipeline::new(metrics),
                state: AtomicU8::new(STATE_STOPPED),
                stop: CancellationToken::new(),
                handle: Mutex::new(None),
            }),
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SalvagerState {
        match self.inner.state.load(Ordering::Acquire) {
            STATE_RUNNING => SalvagerState::Running,
            STATE_STOPPING => SalvagerState::Stopping,
            _ => SalvagerState::Stopped,
        }
    }

    /// Spawn the background loop. A second start is a no-op.
    pub fn start(&self) {
        let was = self.inner.state.compare_exchange(
            STATE_STOPPED,
            STATE_RUNNING,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        if was.is_err() {
            return;
        }
        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move { run(inner).await });
        *self.inner.handle.lock().expect("salvager handle lock") = Some(handle);
    }

    /// Cancel the loop and wait for it to finish the pass it is in.
    pub async fn stop(&self) {
        self.inner.state.store(STATE_STOPPING, Ordering::Release);
        self.inner.stop.cancel();
        let handle = self.inner.handle.lock().expect("salvager handle lock").take();
        if let Some(handle) = handle {
            let _ = handle.await;
        }
        self.inner.state.store(STATE_STOPPED, Ordering::Release);
    }

    /// Run one salvage pass now.
    ///
    /// Fetches due promises oldest first, claims each through the
    /// etag-conditional update, and fulfills the claims it wins. A
    /// cancellation matching `ct` exits silently; any other failure is
    /// logged at `error` and the promises it orphaned stay due for the next
    /// pass.
    pub async fn try_fulfill_due_promises(&self, ct: &CancellationToken) {
        self.inner.drain_and_log(ct).await;
    }
}

async fn run(inner: Arc<Inner>) {
    while !inner.stop.is_cancelled() {
        let delay = jittered(AVERAGE_DELAY);
        let pause = async {
            tokio::select! {
                () = tokio::time::sleep(delay) => (),
                () = inner.stop.cancelled() => (),
            }
        };
        let drain = inner.drain_and_log(&inner.stop);
        tokio::join!(pause, drain);
    }
}

/// `average ± average/4`, uniformly.
fn jittered(average: Duration) -> Duration {
    let quarter = (average / 4).as_millis() as u64;
    let low = average - Duration::from_millis(quarter);
    low + Duration::from_millis(rand::thread_rng().gen_range(0..=2 * quarter))
}

impl Inner {
    async fn drain_and_log(&self, ct: &CancellationToken) {
        match self.drain(ct).await {
            Ok(()) => {}
            Err(error) if error.is_canceled() && ct.is_cancelled() => {}
            Err(error) => {
                error!(
                    error = %error,
                    "Background fulfillment of neglected promises encountered an error"
                );
            }
        }
    }

    async fn drain(&self, ct: &CancellationToken) -> Result<()> {
        loop {
            if ct.is_cancelled() {
                return Err(Error::Canceled);
            }

            let query = Query::<Promise>::new()
                .filter(Filter::due_on_or_before("Promise_Due", clock::utc_now()))
                .order_by("Promise_Due", SortOrder::Ascending)
                .page_size(BATCH_SIZE)
                .consistency(Consistency::ConsistentPrefix);
            let batch = self
                .pipeline
                .execute(|| {
                    let repository = self.repository.clone();
                    let query = query.clone();
                    async move {
                        let mut token = ContinuationToken::new();
                        repository.enumerate(&query, &mut token).await
                    }
                })
                .await?;
            let fetched = batch.len();

            for mut promise in batch {
                if ct.is_cancelled() {
                    return Err(Error::Canceled);
                }
                promise.claim_for_attempt()?;
                if self.try_claim(&mut promise).await? {
                    self.fulfiller.try_fulfill(&mut promise, ct).await?;
                }
                // A lost claim means another worker snatched the promise.
            }

            if fetched < BATCH_SIZE {
                return Ok(());
            }
        }
    }

    /// Persist a claim with the etag-conditional patch of `Promise_Due` and
    /// `Promise_AtpCnt`. Returns `false` when another worker won the race.
    async fn try_claim(&self, promise: &mut Promise) -> Result<bool> {
        let Some(etag) = promise.etag().map(str::to_owned) else {
            return Err(Error::invalid_state(format!(
                "promise {} was fetched without an etag",
                promise.id()
            )));
        };
        let store = self.repository.store();
        let partition = promise.partition_key().value().to_owned();
        let id = promise.id().as_str().to_owned();
        let sets = vec![
            ("Promise_Due".to_owned(), rfc3339::format(&promise.due()).into()),
            ("Promise_AtpCnt".to_owned(), promise.attempt_count().into()),
        ];

        let outcome = self
            .pipeline
            .execute(|| {
                let store = Arc::clone(&store);
                let partition = partition.clone();
                let id = id.clone();
                let sets = sets.clone();
                let etag = etag.clone();
                async move { store.patch(&partition, &id, sets, Some(&etag)).await }
            })
            .await;
        match outcome {
            Ok(stamp) => {
                promise.set_etag(stamp.etag);
                Ok(true)
            }
            Err(error) if error.is_conflict() => Ok(false),
            Err(error) => Err(error),
        }
    }
}
