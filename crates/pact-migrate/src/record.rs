//! Append-only records of applied migrations.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use pact_core::{Error, PartitionKey, Result};
use pact_store::{Entity, StoredEntity};

/// The fixed partition every migration record lives in.
pub const MIGRATIONS_PARTITION: &str = "Migrations";

/// One applied migration.
#[derive(Debug, Serialize, Deserialize)]
pub struct MigrationRecord {
    id: String,
    part: String,
    #[serde(rename = "Migration_Cnt")]
    count: u32,
    #[serde(rename = "Migration_Dscr")]
    description: String,
    #[serde(skip)]
    etag: Option<String>,
    #[serde(skip)]
    storage_timestamp_secs: i64,
}

impl MigrationRecord {
    /// A record for the `count`-th migration (1-based).
    pub fn new(count: u32, description: impl Into<String>) -> Self {
        Self {
            id: format!("Migration{count:05}"),
            part: MIGRATIONS_PARTITION.to_owned(),
            count,
            description: description.into(),
            etag: None,
            storage_timestamp_secs: 0,
        }
    }

    /// 1-based ordinal of the migration.
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Stable human-readable migration name.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Document id (`Migration` + zero-padded count).
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl StoredEntity for MigrationRecord {
    fn type_name(&self) -> &'static str {
        "MigrationRecord"
    }
    fn discriminator(&self) -> &'static str {
        Self::DISCRIMINATOR
    }
    fn document_id(&self) -> String {
        self.id.clone()
    }
    fn partition_key(&self) -> PartitionKey {
        PartitionKey::for_string(&self.part).expect("the migrations partition label is valid")
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
    fn to_document(&self) -> Result<Value> {
        serde_json::to_value(self).map_err(|e| Error::storage(e.to_string()))
    }
}

impl Entity for MigrationRecord {
    const DISCRIMINATOR: &'static str = "Migration_";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_zero_padded_ordinals() {
        assert_eq!(MigrationRecord::new(1, "add index").id(), "Migration00001");
        assert_eq!(MigrationRecord::new(42, "drop path").id(), "Migration00042");
    }

    #[test]
    fn document_shape_matches_the_wire_contract() {
        let record = MigrationRecord::new(1, "add composite index");
        let doc = record.to_document().unwrap();
        assert_eq!(doc["id"], "Migration00001");
        assert_eq!(doc["part"], "Migrations");
        assert_eq!(doc["Migration_Cnt"], 1);
        assert_eq!(doc["Migration_Dscr"], "add composite index");
    }
}
