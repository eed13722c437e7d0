//! Staged single-partition batches.

use std::sync::Arc;

use pact_core::{Error, Id, PartitionKey, Result};

use crate::document::StoredEntity;
use crate::store::{BatchOp, DocumentStore, MAX_BATCH_OPERATIONS};

enum StagedKind {
    Create,
    Update,
    /// Etag-conditional delete.
    Delete,
    /// Delete with concurrency protection explicitly ignored.
    DeleteUnchecked,
}

struct Staged<'a> {
    kind: StagedKind,
    id: String,
    entity: Option<&'a mut dyn StoredEntity>,
}

/// A batch of up to [`MAX_BATCH_OPERATIONS`] operations against one
/// partition.
///
/// The transaction borrows the entities it stages so a successful commit can
/// back-fill their storage-assigned etags and timestamps in submission
/// order. Dropping a transaction without committing rolls back: the batch
/// was never sent.
pub struct Transaction<'a> {
    store: Arc<dyn DocumentStore>,
    partition: PartitionKey,
    ops: Vec<Staged<'a>>,
}

impl<'a> Transaction<'a> {
    pub(crate) fn new(store: Arc<dyn DocumentStore>, partition: PartitionKey) -> Self {
        Self { store, partition, ops: Vec::new() }
    }

    /// The partition every staged entity must live in.
    pub fn partition(&self) -> &PartitionKey {
        &self.partition
    }

    /// Number of staged operations.
    pub fn len(&self) -> usize {
        self.ops.len()
    }

    /// `true` when nothing is staged.
    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Stage an insert of a never-stored entity.
    pub fn create(&mut self, entity: &'a mut dyn StoredEntity) -> Result<()> {
        if entity.etag().is_some() {
            return Err(Error::invalid_state(format!(
                "{} {:?} is already stored",
                entity.type_name(),
                entity.document_id()
            )));
        }
        self.stage(StagedKind::Create, entity)
    }

    /// Stage inserts for a batch of never-stored entities.
    pub fn create_range(
        &mut self,
        entities: impl IntoIterator<Item = &'a mut dyn StoredEntity>,
    ) -> Result<()> {
        for entity in entities {
            self.create(entity)?;
        }
        Ok(())
    }

    /// Stage an etag-conditional replace.
    pub fn update(&mut self, entity: &'a mut dyn StoredEntity) -> Result<()> {
        self.require_etag(&*entity)?;
        self.stage(StagedKind::Update, entity)
    }

    /// Stage an etag-conditional delete.
    pub fn delete(&mut self, entity: &'a mut dyn StoredEntity) -> Result<()> {
        self.require_etag(&*entity)?;
        self.stage(StagedKind::Delete, entity)
    }

    /// Stage a delete that ignores concurrency protection: the document goes
    /// away regardless of intervening writes.
    pub fn delete_unchecked(&mut self, entity: &'a mut dyn StoredEntity) -> Result<()> {
        self.stage(StagedKind::DeleteUnchecked, entity)
    }

    /// Stage a delete by id alone. There is no etag to check, so this always
    /// ignores concurrency protection; the id must belong to this
    /// transaction's partition.
    pub fn delete_by_id(&mut self, id: impl Into<String>) -> Result<()> {
        let id = id.into();
        if let Ok(parsed) = Id::parse(&id) {
            if parsed.partition_suffix() != self.partition.value() {
                return Err(Error::invalid_state(format!(
                    "id {id:?} lives in partition {:?}, not {:?}",
                    parsed.partition_suffix(),
                    self.partition.value()
                )));
            }
        }
        self.ensure_capacity()?;
        self.ops.push(Staged { kind: StagedKind::DeleteUnchecked, id, entity: None });
        Ok(())
    }

    /// Send the batch atomically.
    ///
    /// On success the staged entities receive their fresh etags in
    /// submission order. Storage timestamps are deliberately not written
    /// back: a zero timestamp is what marks an instance as constructed in
    /// memory rather than loaded, and committing does not change that. An
    /// etag mismatch anywhere fails the whole batch with
    /// `ConcurrencyConflict` and nothing is applied.
    pub async fn commit(mut self) -> Result<()> {
        if self.ops.is_empty() {
            return Ok(());
        }

        let mut batch = Vec::with_capacity(self.ops.len());
        for staged in &self.ops {
            let op = match (&staged.kind, &staged.entity) {
                (StagedKind::Create, Some(entity)) => BatchOp::Create {
                    id: staged.id.clone(),
                    document: entity.to_document()?,
                    ttl_secs: entity.time_to_live_secs(),
                },
                (StagedKind::Update, Some(entity)) => BatchOp::Replace {
                    id: staged.id.clone(),
                    document: entity.to_document()?,
                    if_etag: entity.etag().map(str::to_owned),
                    ttl_secs: entity.time_to_live_secs(),
                },
                (StagedKind::Delete, Some(entity)) => BatchOp::Delete {
                    id: staged.id.clone(),
                    if_etag: entity.etag().map(str::to_owned),
                },
                (StagedKind::DeleteUnchecked, _) => {
                    BatchOp::Delete { id: staged.id.clone(), if_etag: None }
                }
                _ => {
                    return Err(Error::invalid_state(
                        "staged operation lost its entity".to_owned(),
                    ))
                }
            };
            batch.push(op);
        }

        let stamps = self.store.commit_batch(self.partition.value(), batch).await?;
        for (staged, stamp) in self.ops.iter_mut().zip(stamps) {
            if let (Some(entity), Some(stamp)) = (staged.entity.as_mut(), stamp) {
                entity.set_etag(stamp.etag);
            }
        }
        Ok(())
    }

    /// Discard the batch without sending it.
    pub fn rollback(self) {
        drop(self);
    }

    fn stage(&mut self, kind: StagedKind, entity: &'a mut dyn StoredEntity) -> Result<()> {
        if entity.partition_key() != self.partition {
            return Err(Error::invalid_state(format!(
                "{} {:?} lives in partition {:?}, not {:?}",
                entity.type_name(),
                entity.document_id(),
                entity.partition_key().value(),
                self.partition.value()
            )));
        }
        self.ensure_capacity()?;
        self.ops.push(Staged { kind, id: entity.document_id(), entity: Some(entity) });
        Ok(())
    }

    fn require_etag(&self, entity: &dyn StoredEntity) -> Result<()> {
        if entity.etag().is_none() {
            return Err(Error::invalid_state(format!(
                "{} {:?} has no etag; only stored entities can be modified",
                entity.type_name(),
                entity.document_id()
            )));
        }
        Ok(())
    }

    fn ensure_capacity(&self) -> Result<()> {
        if self.ops.len() >= MAX_BATCH_OPERATIONS {
            return Err(Error::invalid_state(format!(
                "a transaction holds at most {MAX_BATCH_OPERATIONS} operations"
            )));
        }
        Ok(())
    }
}
