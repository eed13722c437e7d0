//! The promise entity and its claim protocol.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use pact_core::{clock, Error, Id, PartitionKey, Result};
use pact_store::{rfc3339, Entity, StoredEntity};

/// Seconds a claimant has to fulfill before another worker may retry.
pub const CLAIM_DURATION_SECS: i64 = 60;

/// [`CLAIM_DURATION_SECS`] as a duration.
pub fn claim_duration() -> Duration {
    Duration::seconds(CLAIM_DURATION_SECS)
}

/// A persisted intent to eventually invoke a named idempotent action.
///
/// Lifecycle: a use case creates the promise and commits it with its domain
/// writes; the creator then either consumes the attempt (opportunistic
/// fulfillment) or suppresses it (deferring to the salvager). A neglected
/// promise is later claimed through an etag-conditional update that moves
/// `due` forward and increments the attempt counter -- exactly one claimant
/// wins per `(id, etag)` pair. Successful fulfillment deletes the document.
///
/// The instance tracks whether it was constructed locally or loaded from
/// storage (zero storage timestamp ⇔ never loaded); several operations are
/// only legal on one side of that divide.
#[derive(Debug, Serialize, Deserialize)]
pub struct Promise {
    id: Id,
    part: String,
    #[serde(rename = "Promise_Due", with = "rfc3339")]
    due: DateTime<Utc>,
    #[serde(rename = "Promise_AtpCnt")]
    attempt_count: u32,
    #[serde(rename = "Promise_Act")]
    action_name: String,
    #[serde(rename = "Promise_Dta")]
    data: String,
    #[serde(skip)]
    etag: Option<String>,
    #[serde(skip)]
    storage_timestamp_secs: i64,
    #[serde(skip)]
    available_attempts: u8,
    #[serde(skip)]
    created_locally: bool,
}

impl Promise {
    /// A fresh promise: first attempt, due one claim duration from now.
    pub(crate) fn new(id: Id, action_name: impl Into<String>, data: impl Into<String>) -> Self {
        let part = id.partition_suffix().to_owned();
        Self {
            id,
            part,
            due: clock::utc_now() + claim_duration(),
            attempt_count: 1,
            action_name: action_name.into(),
            data: data.into(),
            etag: None,
            storage_timestamp_secs: 0,
            available_attempts: 0,
            created_locally: true,
        }
    }

    /// The promise identifier.
    pub fn id(&self) -> &Id {
        &self.id
    }

    /// Next instant the promise is eligible for an attempt.
    pub fn due(&self) -> DateTime<Utc> {
        self.due
    }

    /// 1-based attempt counter; incremented by every claim.
    pub fn attempt_count(&self) -> u32 {
        self.attempt_count
    }

    /// Name of the registered action to invoke.
    pub fn action_name(&self) -> &str {
        &self.action_name
    }

    /// Opaque payload handed to the action.
    pub fn data(&self) -> &str {
        &self.data
    }

    /// 0 or 1: whether the holder may consume an attempt right now.
    pub fn available_attempt_count(&self) -> u8 {
        self.available_attempts
    }

    /// `true` until the first claim.
    pub fn is_first_attempt(&self) -> bool {
        self.attempt_count == 1
    }

    /// `true` while at least half the claim window remains.
    pub fn has_time_to_fulfill(&self) -> bool {
        self.due - clock::utc_now() >= claim_duration() / 2
    }

    /// `true` when the instance came from storage rather than a local
    /// constructor.
    pub fn was_loaded(&self) -> bool {
        self.storage_timestamp_secs != 0
    }

    /// Defer fulfillment to the salvager instead of consuming the attempt.
    ///
    /// Only legal on a locally constructed instance; a loaded promise
    /// already belongs to whoever claimed it.
    pub fn suppress_immediate_fulfillment(&mut self) -> Result<()> {
        if self.was_loaded() {
            return Err(Error::invalid_state(format!(
                "promise {} was loaded from storage; only its creator may suppress fulfillment",
                self.id
            )));
        }
        self.available_attempts = 0;
        self.suppressed_or_consumed();
        Ok(())
    }

    /// Move `due` forward by one claim duration and count the attempt.
    ///
    /// Legal only on an instance loaded from storage whose due time has
    /// passed. The attempt becomes available when the etag-conditional
    /// update refreshes the etag, not on this call.
    pub fn claim_for_attempt(&mut self) -> Result<()> {
        if !self.was_loaded() {
            return Err(Error::invalid_state(format!(
                "promise {} was never stored; claims work on loaded instances",
                self.id
            )));
        }
        if self.due > clock::utc_now() {
            return Err(Error::invalid_state(format!(
                "promise {} is not due until {}",
                self.id, self.due
            )));
        }
        self.due = clock::utc_now() + claim_duration();
        self.attempt_count += 1;
        self.available_attempts = 0;
        Ok(())
    }

    /// Take the available attempt ahead of running the action.
    ///
    /// Requires a stored promise (etag present), an available attempt, and a
    /// fresh-enough claim: either more than half the claim window remains or
    /// this is the first attempt.
    pub fn consume_attempt(&mut self) -> Result<()> {
        if self.etag.is_none() {
            return Err(Error::invalid_state(format!(
                "promise {} has no etag; commit it before consuming an attempt",
                self.id
            )));
        }
        if self.available_attempts == 0 {
            return Err(Error::invalid_state(format!(
                "promise {} has no available attempt",
                self.id
            )));
        }
        if !self.has_time_to_fulfill() && !self.is_first_attempt() {
            return Err(Error::invalid_state(format!(
                "promise {} lost its claim window; re-claim before consuming",
                self.id
            )));
        }
        self.available_attempts = 0;
        self.suppressed_or_consumed();
        Ok(())
    }

    /// Push the due time to `now + delay`.
    ///
    /// Zero is accepted deliberately: it makes the promise due immediately,
    /// so the salvager's next pass picks it up.
    pub fn delay(&mut self, delay: Duration) -> Result<()> {
        if delay < Duration::zero() {
            return Err(Error::invalid_state(format!(
                "promise {} cannot be delayed by a negative duration",
                self.id
            )));
        }
        self.due = clock::utc_now() + delay;
        Ok(())
    }

    fn suppressed_or_consumed(&mut self) {
        // Once the creator has decided, the drop guard stands down.
        self.created_locally = false;
    }
}

impl StoredEntity for Promise {
    fn type_name(&self) -> &'static str {
        "Promise"
    }
    fn discriminator(&self) -> &'static str {
        Self::DISCRIMINATOR
    }
    fn document_id(&self) -> String {
        self.id.as_str().to_owned()
    }
    fn partition_key(&self) -> PartitionKey {
        PartitionKey::from_id(&self.id)
    }
    fn etag(&self) -> Option<&str> {
        self.etag.as_deref()
    }
    fn set_etag(&mut self, etag: String) {
        self.etag = Some(etag);
        // An etag (re)assignment always hands its holder one attempt.
        self.available_attempts = 1;
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

impl Entity for Promise {
    const DISCRIMINATOR: &'static str = "Promise_";
}

impl Drop for Promise {
    /// The forgotten-promise guard: a committed, never-consumed,
    /// never-suppressed first-attempt promise indicates its creator walked
    /// away without deciding how it gets fulfilled.
    fn drop(&mut self) {
        if self.created_locally
            && self.etag.is_some()
            && self.available_attempts > 0
            && self.is_first_attempt()
            && !std::thread::panicking()
        {
            panic!(
                "forgotten promise {}: consume or suppress the attempt right after committing",
                self.id
            );
        }
    }
}
