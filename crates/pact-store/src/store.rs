//! The raw document-store capability.

use async_trait::async_trait;
use serde_json::Value;

use pact_core::Result;

use crate::document::{EtagStamp, RawDocument};
use crate::query::{Cursor, QueryPage, QuerySpec};

/// Upper bound on operations in one transactional batch.
pub const MAX_BATCH_OPERATIONS: usize = 100;

/// One operation inside a transactional batch.
///
/// `if_etag: None` means the write is unconditional (concurrency protection
/// explicitly ignored by the caller).
#[derive(Debug)]
pub enum BatchOp {
    Create {
        id: String,
        document: Value,
        ttl_secs: Option<i64>,
    },
    Replace {
        id: String,
        document: Value,
        if_etag: Option<String>,
        ttl_secs: Option<i64>,
    },
    Delete {
        id: String,
        if_etag: Option<String>,
    },
}

impl BatchOp {
    /// `true` for operations the store stamps with a fresh etag.
    pub fn mutates_document(&self) -> bool {
        !matches!(self, Self::Delete { .. })
    }
}

/// Schema-level properties of the backing container (index paths, default
/// TTL, and whatever else the store exposes). Opaque to everything but the
/// migration coordinator.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ContainerProperties {
    properties: serde_json::Map<String, Value>,
}

impl ContainerProperties {
    /// Empty properties.
    pub fn new() -> Self {
        Self::default()
    }

    /// Read one property.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.properties.get(key)
    }

    /// Set one property.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.properties.insert(key.into(), value.into());
    }

    /// Number of properties present.
    pub fn len(&self) -> usize {
        self.properties.len()
    }

    /// `true` when no properties are set.
    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }
}

/// The store capability the subsystem runs on.
///
/// Required of any backing product: per-partition transactional batches of
/// up to [`MAX_BATCH_OPERATIONS`] operations, etag-conditional
/// replace/delete/patch, TTL sweeping on a per-document seconds field,
/// filtered and ordered queries with consistent-prefix and strong read
/// levels. Implementations are process-wide singletons, safe for concurrent
/// use.
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Point read of one document.
    async fn read(&self, partition: &str, id: &str) -> Result<Option<RawDocument>>;

    /// Run one page of a query. `cursor` continues a previous page.
    async fn query(&self, spec: &QuerySpec, cursor: Option<&Cursor>) -> Result<QueryPage>;

    /// Atomically apply a batch to one partition.
    ///
    /// On success returns one stamp per operation, in submission order
    /// (`None` for deletes). Any etag precondition failure fails the whole
    /// batch with `ConcurrencyConflict`; any other failure with `Storage`.
    async fn commit_batch(
        &self,
        partition: &str,
        ops: Vec<BatchOp>,
    ) -> Result<Vec<Option<EtagStamp>>>;

    /// Partially update named top-level properties of one document.
    ///
    /// With `if_etag` set, a changed or missing document fails
    /// `ConcurrencyConflict`. Like any write, a patch restarts the
    /// document's TTL window (expiry counts from the last write); setting
    /// the `ttl` property adjusts the window length itself.
    async fn patch(
        &self,
        partition: &str,
        id: &str,
        sets: Vec<(String, Value)>,
        if_etag: Option<&str>,
    ) -> Result<EtagStamp>;

    /// Current container schema properties.
    async fn read_container_properties(&self) -> Result<ContainerProperties>;

    /// Replace the container schema properties. The store may apply parts of
    /// the change asynchronously (index transformations continue
    /// server-side).
    async fn replace_container_properties(&self, properties: ContainerProperties) -> Result<()>;
}
