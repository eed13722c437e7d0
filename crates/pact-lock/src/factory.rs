//! Acquisition and holding of momentary locks.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use pact_core::{clock, Error, Result};
use pact_resilience::RetryStrategy;
use pact_store::{Repository, StoredEntity as _};

use crate::key::{UniqueKey, UNIQUE_KEY_TIME_TO_LIVE_SECS};
use crate::synchronizer::{LockSynchronizer, WaitOutcome};

/// How long an unreleased lock lives before the store sweeps it.
pub const LOCK_TIME_TO_LIVE: Duration = Duration::from_secs(UNIQUE_KEY_TIME_TO_LIVE_SECS as u64);

const MAX_ACQUIRE_ATTEMPTS: usize = 10;
const BACKOFF_BASE: Duration = Duration::from_millis(30);

/// Factory for short-lived global locks.
///
/// Cheap to clone; clones share the repository client.
#[derive(Clone)]
pub struct MomentaryLockFactory {
    repository: Repository,
    backoff: Arc<RetryStrategy>,
}

impl MomentaryLockFactory {
    /// A factory over the given repository.
    pub fn new(repository: Repository) -> Self {
        Self {
            repository,
            backoff: Arc::new(RetryStrategy::exponential(MAX_ACQUIRE_ATTEMPTS, BACKOFF_BASE)),
        }
    }

    /// Acquire a single lock, retrying contention with jittered exponential
    /// backoff until the attempt budget runs out.
    ///
    /// Re-entry is forbidden: a caller already holding a lock must not
    /// acquire it again, or it deadlocks against TTL expiry.
    pub async fn wait(&self, key: UniqueKey, ct: &CancellationToken) -> Result<MomentaryLock> {
        let mut attempt = 1;
        loop {
            if ct.is_cancelled() {
                return Err(Error::Canceled);
            }
            let mut claim = key.clone();
            let mut tx = self.repository.create_transaction(claim.partition_key());
            tx.create(&mut claim)?;
            match tx.commit().await {
                Ok(()) => {
                    return Ok(MomentaryLock {
                        repository: self.repository.clone(),
                        key: claim,
                        acquired_at: clock::utc_now(),
                        released: false,
                    })
                }
                Err(error) if error.is_conflict() => {
                    if attempt >= self.backoff.max_attempts() {
                        return Err(Error::LockUnavailable(key.id().to_owned()));
                    }
                    let delay = self.backoff.delay_for(attempt);
                    tokio::select! {
                        () = ct.cancelled() => return Err(Error::Canceled),
                        () = sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// Acquire several locks at once.
    ///
    /// Keys are acquired sequentially in their natural (id) order to avoid
    /// deadlocks with unrelated processes requesting the same set. Every
    /// acquired member is parked with a holder task that keeps it alive with
    /// TTL refreshes until the whole set is held; the returned set holds all
    /// members simultaneously. On failure or cancellation mid-way,
    /// already-held locks are released in reverse order.
    pub async fn wait_range(
        &self,
        mut keys: Vec<UniqueKey>,
        ct: &CancellationToken,
    ) -> Result<MomentaryLockSet> {
        keys.sort_by(|a, b| a.id().cmp(b.id()));
        if keys.is_empty() {
            return Ok(MomentaryLockSet { locks: Vec::new(), acquired_at: clock::utc_now() });
        }

        let sync = Arc::new(LockSynchronizer::new(keys.len()));
        let mut holders = Vec::with_capacity(keys.len());
        let mut failure = None;

        for key in keys {
            match self.wait(key, ct).await {
                Ok(lock) => holders.push(tokio::spawn(hold(lock, Arc::clone(&sync)))),
                Err(error) => {
                    failure = Some(error);
                    break;
                }
            }
        }

        if let Some(error) = failure {
            sync.abandon();
            let mut held = Vec::with_capacity(holders.len());
            for holder in holders {
                if let Ok(lock) = holder.await {
                    held.push(lock);
                }
            }
            for lock in held.into_iter().rev() {
                lock.release().await;
            }
            return Err(error);
        }

        let mut locks = Vec::with_capacity(holders.len());
        for holder in holders {
            let lock = holder
                .await
                .map_err(|e| Error::storage(format!("lock holder task failed: {e}")))?;
            locks.push(lock);
        }
        Ok(MomentaryLockSet { locks, acquired_at: clock::utc_now() })
    }
}

/// Park one acquired lock until the whole set is held.
async fn hold(mut lock: MomentaryLock, sync: Arc<LockSynchronizer>) -> MomentaryLock {
    loop {
        sync.arrive();
        match sync.wait(LOCK_TIME_TO_LIVE / 2).await {
            WaitOutcome::AllAcquired | WaitOutcome::Abandoned => return lock,
            WaitOutcome::TimedOut => {
                sync.depart();
                if let Err(error) = lock.refresh().await {
                    warn!(
                        key = lock.key().id(),
                        error = %error,
                        "failed to refresh momentary lock while the set is being acquired"
                    );
                }
            }
        }
    }
}

/// One held lock. Release it explicitly; the TTL is only the safety net for
/// dead holders.
pub struct MomentaryLock {
    repository: Repository,
    key: UniqueKey,
    acquired_at: DateTime<Utc>,
    released: bool,
}

impl MomentaryLock {
    /// The claimed key.
    pub fn key(&self) -> &UniqueKey {
        &self.key
    }

    /// Wall-clock time since acquisition.
    pub fn elapsed(&self) -> chrono::Duration {
        clock::utc_now() - self.acquired_at
    }

    /// Release the lock by deleting its document.
    ///
    /// A late release (the TTL already elapsed) and a failed delete both log
    /// a warning instead of failing: the sweep makes the document disappear
    /// either way.
    pub async fn release(mut self) {
        self.released = true;
        if self.elapsed() >= chrono::Duration::seconds(UNIQUE_KEY_TIME_TO_LIVE_SECS) {
            warn!(key = self.key.id(), "momentary lock released after its time to live");
        }
        let mut key = self.key.clone();
        let mut tx = self.repository.create_transaction(key.partition_key());
        let staged = tx.delete_unchecked(&mut key);
        let outcome = match staged {
            Ok(()) => tx.commit().await,
            Err(error) => Err(error),
        };
        if let Err(error) = outcome {
            warn!(
                key = self.key.id(),
                error = %error,
                "failed to release momentary lock; the TTL sweep will remove it"
            );
        }
    }

    /// Restart the document's TTL window with an unconditional patch.
    pub(crate) async fn refresh(&mut self) -> Result<()> {
        let stamp = self
            .repository
            .store()
            .patch(
                self.key.partition_key().value(),
                self.key.id(),
                vec![("ttl".to_owned(), UNIQUE_KEY_TIME_TO_LIVE_SECS.into())],
                None,
            )
            .await?;
        self.key.set_etag(stamp.etag);
        self.key.set_storage_timestamp_secs(stamp.timestamp_secs);
        Ok(())
    }
}

impl Drop for MomentaryLock {
    fn drop(&mut self) {
        if !self.released && !std::thread::panicking() {
            warn!(
                key = self.key.id(),
                "momentary lock dropped without release; the TTL sweep will remove it"
            );
        }
    }
}

impl std::fmt::Debug for MomentaryLock {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MomentaryLock")
            .field("key", &self.key)
            .field("acquired_at", &self.acquired_at)
            .field("released", &self.released)
            .finish()
    }
}

/// Several locks held simultaneously, as returned by
/// [`MomentaryLockFactory::wait_range`].
pub struct MomentaryLockSet {
    locks: Vec<MomentaryLock>,
    acquired_at: DateTime<Utc>,
}

impl std::fmt::Debug for MomentaryLockSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MomentaryLockSet")
            .field("locks", &self.locks)
            .field("acquired_at", &self.acquired_at)
            .finish()
    }
}

impl MomentaryLockSet {
    /// Number of held locks.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    /// `true` for the empty set.
    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    /// The held keys, in acquisition order.
    pub fn keys(&self) -> impl Iterator<Item = &UniqueKey> {
        self.locks.iter().map(MomentaryLock::key)
    }

    /// Release every member, in reverse acquisition order.
    ///
    /// Returns `true` when the set expired before disposal: more than half
    /// the TTL passed since every member was held, so mutual exclusion can
    /// no longer be vouched for.
    pub async fn release(self) -> bool {
        let expired = clock::utc_now() - self.acquired_at
            >= chrono::Duration::seconds(UNIQUE_KEY_TIME_TO_LIVE_SECS / 2);
        if expired {
            warn!("momentary lock set expired before release");
        }
        for lock in self.locks.into_iter().rev() {
            lock.release().await;
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::key::JsonPath;
    use chrono::TimeZone;
    use pact_store::MemoryStore;
    use pact_telemetry::LogCapture;
    use tracing::Level;

    fn factory() -> (MomentaryLockFactory, Arc<MemoryStore>) {
        let store = Arc::new(MemoryStore::new());
        (MomentaryLockFactory::new(Repository::new(store.clone())), store)
    }

    fn key(value: &str) -> UniqueKey {
        UniqueKey::create(&JsonPath::of(["Ord_Data", "Itm"]), value).unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn acquire_and_release_round_trip() {
        let (factory, store) = factory();
        let ct = CancellationToken::new();

        let lock = factory.wait(key("widget"), &ct).await.unwrap();
        assert_eq!(store.document_count(), 1);

        lock.release().await;
        assert_eq!(store.document_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn contention_is_retried_then_fails_lock_unavailable() {
        let (factory, _) = factory();
        let ct = CancellationToken::new();

        let held = factory.wait(key("widget"), &ct).await.unwrap();
        let result = factory.wait(key("widget"), &ct).await;
        assert!(matches!(result.unwrap_err(), Error::LockUnavailable(_)));

        held.release().await;
        let lock = factory.wait(key("widget"), &ct).await.unwrap();
        lock.release().await;
    }

    #[tokio::test(start_paused = true)]
    async fn waiters_win_once_the_holder_releases() {
        let (factory, _) = factory();
        let ct = CancellationToken::new();

        let held = factory.wait(key("widget"), &ct).await.unwrap();

        let contender = {
            let factory = factory.clone();
            let ct = ct.clone();
            tokio::spawn(async move { factory.wait(key("widget"), &ct).await })
        };

        // Give the contender a couple of failed attempts, then release.
        tokio::time::sleep(Duration::from_millis(40)).await;
        held.release().await;

        let lock = contender.await.unwrap().unwrap();
        lock.release().await;
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_interrupts_the_backoff() {
        let (factory, _) = factory();
        let ct = CancellationToken::new();

        let held = factory.wait(key("widget"), &ct).await.unwrap();

        let contender = {
            let factory = factory.clone();
            let ct = ct.clone();
            tokio::spawn(async move { factory.wait(key("widget"), &ct).await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        ct.cancel();

        assert!(contender.await.unwrap().unwrap_err().is_canceled());
        held.release().await;
    }

    #[tokio::test(start_paused = true)]
    async fn wait_range_holds_every_member_at_once() {
        let (factory, store) = factory();
        let ct = CancellationToken::new();

        let keys = vec![key("d"), key("b"), key("c")];
        let set = factory.wait_range(keys, &ct).await.unwrap();
        assert_eq!(set.len(), 3);
        assert_eq!(store.document_count(), 3);

        // Acquisition order is the sorted id order.
        let ids: Vec<&str> = set.keys().map(UniqueKey::id).collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);

        let expired = set.release().await;
        assert!(!expired);
        assert_eq!(store.document_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn wait_range_releases_held_members_when_one_is_unavailable() {
        let (factory, store) = factory();
        let ct = CancellationToken::new();

        // "c" is taken by someone else; "a" and "b" get acquired first and
        // must be released on failure.
        let blocker = factory.wait(key("c"), &ct).await.unwrap();

        let result = factory.wait_range(vec![key("a"), key("b"), key("c")], &ct).await;
        assert!(matches!(result.unwrap_err(), Error::LockUnavailable(_)));
        assert_eq!(store.document_count(), 1);

        blocker.release().await;
        assert_eq!(store.document_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn overlapping_sets_exclude_each_other() {
        let (factory, _) = factory();
        let ct = CancellationToken::new();

        let first = factory.wait_range(vec![key("x"), key("y")], &ct).await.unwrap();

        let second = {
            let factory = factory.clone();
            let ct = ct.clone();
            tokio::spawn(async move { factory.wait_range(vec![key("y"), key("z")], &ct).await })
        };

        tokio::time::sleep(Duration::from_millis(40)).await;
        let expired = first.release().await;
        assert!(!expired);

        let set = second.await.unwrap().unwrap();
        assert_eq!(set.len(), 2);
        set.release().await;
    }

    #[tokio::test(start_paused = true)]
    async fn late_release_warns_instead_of_failing() {
        let capture = LogCapture::new();
        let _guard = capture.install();
        let scope = pact_core::clock::ClockScope::fixed(
            Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        );
        let (factory, _) = factory();
        let ct = CancellationToken::new();

        let lock = factory.wait(key("slow"), &ct).await.unwrap();
        scope.advance(chrono::Duration::seconds(25));
        lock.release().await;

        assert!(capture.contains(Level::WARN, "after its time to live"));
    }
}
