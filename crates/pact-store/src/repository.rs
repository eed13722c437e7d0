//! Typed reads and transaction creation.

use std::sync::Arc;

use pact_core::{Error, Id, PartitionKey, Result};

use crate::document::Entity;
use crate::query::{ContinuationToken, Query};
use crate::store::DocumentStore;
use crate::transaction::Transaction;

/// Typed facade over the raw [`DocumentStore`].
///
/// Cheap to clone; clones share the underlying store client.
#[derive(Clone)]
pub struct Repository {
    store: Arc<dyn DocumentStore>,
}

impl Repository {
    /// A repository over the given store client.
    pub fn new(store: Arc<dyn DocumentStore>) -> Self {
        Self { store }
    }

    /// The underlying store client.
    pub fn store(&self) -> Arc<dyn DocumentStore> {
        Arc::clone(&self.store)
    }

    /// Point read.
    ///
    /// When `id` is a 22-character identifier, `partition` must be the
    /// partition derived from it.
    pub async fn get<E: Entity>(&self, id: &str, partition: &PartitionKey) -> Result<Option<E>> {
        if let Ok(parsed) = Id::parse(id) {
            if parsed.partition_suffix() != partition.value() {
                return Err(Error::invalid_state(format!(
                    "id {id:?} lives in partition {:?}, not {:?}",
                    parsed.partition_suffix(),
                    partition.value()
                )));
            }
        }
        match self.store.read(partition.value(), id).await? {
            Some(doc) => E::from_document(&doc).map(Some),
            None => Ok(None),
        }
    }

    /// `true` when at least one document matches. Runs as an unordered
    /// page-of-1 query.
    pub async fn exists<E: Entity>(&self, query: &Query<E>) -> Result<bool> {
        Self::validate(query)?;
        let mut spec = query.to_spec();
        spec.order_by = None;
        spec.page_size = 1;
        Ok(!self.store.query(&spec, None).await?.documents.is_empty())
    }

    /// The single match, if any. Runs as a page-of-2 query; two hits fail
    /// `MultipleMatches`.
    pub async fn load<E: Entity>(&self, query: &Query<E>) -> Result<Option<E>> {
        Self::validate(query)?;
        let mut spec = query.to_spec();
        spec.page_size = 2;
        let page = self.store.query(&spec, None).await?;
        match page.documents.as_slice() {
            [] => Ok(None),
            [doc] => E::from_document(doc).map(Some),
            _ => Err(Error::MultipleMatches),
        }
    }

    /// Every match, draining all pages in query order.
    pub async fn list<E: Entity>(&self, query: &Query<E>) -> Result<Vec<E>> {
        let mut token = ContinuationToken::new();
        let mut all = Vec::new();
        while !token.is_exhausted() {
            all.extend(self.enumerate(query, &mut token).await?);
        }
        Ok(all)
    }

    /// One page of matches, advancing the caller-owned token.
    ///
    /// Iterating to exhaustion visits every match exactly once; deletions of
    /// already-visited documents neither duplicate nor skip later ones.
    pub async fn enumerate<E: Entity>(
        &self,
        query: &Query<E>,
        token: &mut ContinuationToken,
    ) -> Result<Vec<E>> {
        Self::validate(query)?;
        if token.exhausted {
            return Ok(Vec::new());
        }
        let page = self.store.query(&query.to_spec(), token.cursor.as_ref()).await?;
        token.cursor = page.next;
        if token.cursor.is_none() {
            token.exhausted = true;
        }
        page.documents.iter().map(E::from_document).collect()
    }

    /// Open a batch against one partition.
    pub fn create_transaction<'a>(&self, partition: PartitionKey) -> Transaction<'a> {
        Transaction::new(Arc::clone(&self.store), partition)
    }

    /// Reject queries that could match across entity types.
    fn validate<E: Entity>(query: &Query<E>) -> Result<()> {
        if !query.discriminates() {
            return Err(Error::invalid_state(format!(
                "query does not discriminate the entity type: reference `id` or a property \
                 prefixed {:?}",
                E::DISCRIMINATOR
            )));
        }
        Ok(())
    }
}
