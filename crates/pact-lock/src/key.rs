//! Unique-key documents: path-qualified values used as global claim tokens.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use pact_core::{Error, PartitionKey, Result, MAX_PARTITION_KEY_BYTES};
use pact_store::{Entity, StoredEntity};

/// Seconds until the store sweeps an unreleased unique-key document.
pub const UNIQUE_KEY_TIME_TO_LIVE_SECS: i64 = 20;

/// A `|`-joined JSON path naming the property a unique value belongs to.
///
/// Paths are compile-time-known strings; the `|`-joined spelling with a
/// leading separator (`|Ord_Data|Itm`) is the on-wire contract.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JsonPath(String);

impl JsonPath {
    /// A path from its property segments, outermost first.
    pub fn of<S: AsRef<str>>(segments: impl IntoIterator<Item = S>) -> Self {
        let mut path = String::new();
        for segment in segments {
            path.push('|');
            path.push_str(segment.as_ref());
        }
        Self(path)
    }

    /// The `|`-joined spelling.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for JsonPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// An ephemeral claim on one path-qualified value.
///
/// Inserting the document acquires the claim for its TTL; the partition is
/// the encoded value itself, so claims on the same value always collide.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UniqueKey {
    id: String,
    part: String,
    ttl: i64,
    #[serde(rename = "Uniq_Path")]
    path: String,
    #[serde(rename = "Uniq_Val")]
    value: String,
    #[serde(skip)]
    etag: Option<String>,
    #[serde(skip)]
    storage_timestamp_secs: i64,
}

impl UniqueKey {
    /// Build the claim token for a candidate value of a property.
    ///
    /// The value's UTF-8 bytes are truncated to `2 * MAX_PARTITION_KEY_BYTES`
    /// and base64url-encoded without padding.
    pub fn create(path: &JsonPath, value: &str) -> Result<Self> {
        let bytes = value.as_bytes();
        let truncated = &bytes[..bytes.len().min(2 * MAX_PARTITION_KEY_BYTES)];
        let encoded = URL_SAFE_NO_PAD.encode(truncated);
        // Charset and length both hold by construction; the check guards the
        // invariant all partitions share.
        PartitionKey::for_unique_value(&encoded)?;
        Ok(Self {
            id: format!("Uniq{}|{}", path.as_str(), encoded),
            part: encoded.clone(),
            ttl: UNIQUE_KEY_TIME_TO_LIVE_SECS,
            path: path.as_str().to_owned(),
            value: encoded,
            etag: None,
            storage_timestamp_secs: 0,
        })
    }

    /// Document id (`Uniq<path>|<value>`).
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The `|`-joined owning path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// The base64url-encoded candidate value.
    pub fn value(&self) -> &str {
        &self.value
    }

    /// Seconds until the store sweeps an unreleased claim.
    pub fn time_to_live(&self) -> i64 {
        self.ttl
    }
}

impl StoredEntity for UniqueKey {
    fn type_name(&self) -> &'static str {
        "UniqueKey"
    }
    fn discriminator(&self) -> &'static str {
        Self::DISCRIMINATOR
    }
    fn document_id(&self) -> String {
        self.id.clone()
    }
    fn partition_key(&self) -> PartitionKey {
        PartitionKey::for_unique_value(&self.part).expect("value validated at construction")
    }
    fn etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }
    fn set_etag(&mut self, etag: String) {
        self.etag = Some(etag);
    }
    fn storage_timestamp_secs(&self) -> i64 {
        self.storage_timestamp_secs
    }
    fn set_storage_timestamp_secs(&mut self, secs: i64) {
        self.storage_timestamp_secs = secs;
    }
    fn time_to_live_secs(&self) -> Option<i64> {
        Some(self.ttl)
    }
    fn to_document(&self) -> Result<Value> {
        serde_json::to_value(self).map_err(|e| Error::storage(e.to_string()))
    }
}

impl Entity for UniqueKey {
    const DISCRIMINATOR: &'static str = "Uniq_";
}
