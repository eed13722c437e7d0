//! Document shapes and the persisted-entity contract.

use pact_core::{Error, PartitionKey, Result};
use serde::de::DeserializeOwned;
use serde_json::Value;

/// Storage-assigned version and write time for one mutated document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EtagStamp {
    /// Opaque version token.
    pub etag: String,
    /// Write instant in whole seconds since the Unix epoch.
    pub timestamp_secs: i64,
}

/// One document as the store holds it: the JSON body plus the metadata the
/// store assigns on every write.
#[derive(Debug, Clone)]
pub struct RawDocument {
    /// Document id, unique within its partition.
    pub id: String,
    /// Partition label.
    pub partition: String,
    /// Opaque version token.
    pub etag: String,
    /// Last write in whole seconds since the Unix epoch.
    pub timestamp_secs: i64,
    /// Seconds until the store sweeps the document, when set.
    pub ttl_secs: Option<i64>,
    /// The serialized entity, including `id` and `part`.
    pub body: Value,
}

/// Contract every persisted entity implements.
///
/// Object-safe so transactions can stage heterogeneous entities. The typed
/// read side lives on [`Entity`].
///
/// An entity is authoritative only once it carries an etag; a zero storage
/// timestamp marks an instance that was constructed in memory and never
/// loaded.
pub trait StoredEntity: Send {
    /// Entity name for diagnostics.
    fn type_name(&self) -> &'static str;

    /// The JSON property prefix that discriminates this entity type
    /// (for example `"Promise_"`).
    fn discriminator(&self) -> &'static str;

    /// Document id.
    fn document_id(&self) -> String;

    /// Partition the entity lives in.
    fn partition_key(&self) -> PartitionKey;

    /// Version token, present once stored.
    fn etag(&self) -> Option<&str>;

    /// Overwrite the version token after a write or load.
    fn set_etag(&mut self, etag: String);

    /// Storage write time in seconds; zero for never-stored instances.
    fn storage_timestamp_secs(&self) -> i64;

    /// Overwrite the storage write time after a write or load.
    fn set_storage_timestamp_secs(&mut self, secs: i64);

    /// Seconds until the store may sweep the document. `None` for durable
    /// entities.
    fn time_to_live_secs(&self) -> Option<i64> {
        None
    }

    /// Serialize into the persisted JSON shape.
    fn to_document(&self) -> Result<Value>;
}

/// Typed side of the persisted-entity contract: deserialization and the
/// compile-time discriminator used for query validation.
pub trait Entity: StoredEntity + DeserializeOwned + Sized {
    /// The JSON property prefix that discriminates this entity type.
    const DISCRIMINATOR: &'static str;

    /// Rehydrate an entity from a stored document, restoring the
    /// storage-assigned etag and timestamp.
    fn from_document(doc: &RawDocument) -> Result<Self> {
        let mut entity: Self = serde_json::from_value(doc.body.clone())
            .map_err(|e| Error::storage(format!("malformed document {:?}: {e}", doc.id)))?;
        entity.set_etag(doc.etag.clone());
        entity.set_storage_timestamp_secs(doc.timestamp_secs);
        Ok(entity)
    }
}

/// Serde helpers for due-time fields.
///
/// Persists `chrono::DateTime<Utc>` as RFC 3339 with a fixed six-digit
/// fraction, so the stored strings order lexicographically the way the
/// instants order chronologically.
pub mod rfc3339 {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";

    /// Format an instant the way due-time fields are persisted.
    pub fn format(instant: &DateTime<Utc>) -> String {
        instant.format(FORMAT).to_string()
    }

    /// Serialize with the fixed-precision format.
    pub fn serialize<S: Serializer>(
        instant: &DateTime<Utc>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&format(instant))
    }

    /// Deserialize any RFC 3339 spelling.
    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<DateTime<Utc>, D::Error> {
        let text = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&text)
            .map(|t| t.with_timezone(&Utc))
            .map_err(serde::de::Error::custom)
    }
}
