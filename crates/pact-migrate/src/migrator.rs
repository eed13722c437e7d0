//! The migration coordinator.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use pact_core::{Error, Result};
use pact_lock::{JsonPath, MomentaryLockFactory, UniqueKey};
use pact_resilience::ResiliencePipeline;
use pact_store::{Consistency, ContainerProperties, Filter, Query, Repository, StoredEntity};
use pact_telemetry::MetricsRegistry;

use crate::record::{MigrationRecord, MIGRATIONS_PARTITION};

/// One registered migration: a stable key and a deterministic mutation of
/// the container's schema properties.
///
/// Keys are ordered and stable; once a record for a key exists, neither the
/// key nor its position may change.
#[derive(Clone)]
pub struct Migration {
    key: String,
    apply: Arc<dyn Fn(&mut ContainerProperties) + Send + Sync>,
}

impl Migration {
    /// A migration from its stable key and mutation.
    pub fn new(
        key: impl Into<String>,
        apply: impl Fn(&mut ContainerProperties) + Send + Sync + 'static,
    ) -> Self {
        Self { key: key.into(), apply: Arc::new(apply) }
    }

    /// The stable key, also used as the record description.
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl std::fmt::Debug for Migration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migration").field("key", &self.key).finish()
    }
}

/// Applies pending migrations at host start, concurrency-safe across
/// replicas.
///
/// The catch-up loop re-counts the applied records (at strong consistency,
/// so prior creations are always observed), takes a momentary lock to
/// serialize starters, re-checks under the lock, and applies exactly the
/// next pending migration before releasing. Replicas that lose the lock
/// race simply observe a higher count on their next pass.
#[derive(Clone)]
pub struct Migrator {
    repository: Repository,
    locks: MomentaryLockFactory,
    pipeline: ResiliencePipeline,
    migrations: Vec<Migration>,
}

impl Migrator {
    /// A coordinator for an ordered, stable migration list.
    pub fn new(
        repository: Repository,
        locks: MomentaryLockFactory,
        migrations: Vec<Migration>,
        metrics: &MetricsRegistry,
    ) -> Self {
        Self { repository, locks, pipeline: ResiliencePipeline::new(metrics), migrations }
    }

    /// Bring the container schema up to date.
    pub async fn migrate(&self, ct: &CancellationToken) -> Result<()> {
        info!("Migrating");
        loop {
            if ct.is_cancelled() {
                return Err(Error::Canceled);
            }
            let applied = self.count_applied().await?;
            if applied >= self.migrations.len() {
                break;
            }

            // Serialize starters; the zero value is the conventional claim
            // token for "who gets to run the next migration".
            let key = UniqueKey::create(&JsonPath::of(["Migration_Cnt"]), "0")?;
            let lock = self.locks.wait(key, ct).await?;

            let applied = self.count_applied().await?;
            if applied >= self.migrations.len() {
                lock.release().await;
                break;
            }
            let outcome = self.apply_one(applied).await;
            lock.release().await;
            outcome?;
        }
        info!("Migrated");
        Ok(())
    }

    /// Number of migration records present, read at strong consistency.
    async fn count_applied(&self) -> Result<usize> {
        let query = Query::<MigrationRecord>::new()
            .in_partition(MIGRATIONS_PARTITION)
            .filter(Filter::ge("Migration_Cnt", 1))
            .consistency(Consistency::Strong);
        Ok(self.repository.list(&query).await?.len())
    }

    async fn apply_one(&self, index: usize) -> Result<()> {
        let migration = &self.migrations[index];
        let number = index + 1;
        info!("Migrating to #{}: {}", number, migration.key());

        let store = self.repository.store();
        let mut properties = store.read_container_properties().await?;
        (migration.apply)(&mut properties);

        self.pipeline
            .execute(|| {
                let store = Arc::clone(&store);
                let properties = properties.clone();
                async move { store.replace_container_properties(properties).await }
            })
            .await?;

        // Record creation runs on a fresh context: once the container change
        // is in flight, the record must land even if the caller goes away.
        self.pipeline
            .execute(|| {
                let repository = self.repository.clone();
                let key = migration.key().to_owned();
                async move {
                    let mut record = MigrationRecord::new(number as u32, key);
                    let mut tx = repository.create_transaction(record.partition_key());
                    tx.create(&mut record)?;
                    tx.commit().await
                }
            })
            .await?;

        info!("Migrated to #{}: {}", number, migration.key());
        Ok(())
    }
}
