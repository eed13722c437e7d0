//! 22-character base62 identifiers.
//!
//! An [`Id`] is the base62 encoding of a 128-bit value, zero-padded to
//! exactly 22 ASCII-alphanumeric characters. The last three characters form
//! the partition suffix (~18 bits of entropy, 238,328 partitions). The
//! default generator produces v7-UUID-style time-ordered values; because the
//! encoding is fixed-width and the alphabet is ASCII-ordered, lexicographic
//! order matches generation order.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

use crate::clock;
use crate::error::{Error, Result, ValidationCode};
use crate::partition::PARTITION_SUFFIX_LEN;

/// Exact length of every identifier.
pub const ID_LENGTH: usize = 22;

const BASE62: &[u8; 62] = b"0123456789ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz";

/// A 22-character alphanumeric identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Id(String);

impl Id {
    /// Validate an externally supplied identifier.
    pub fn parse(value: &str) -> Result<Self> {
        if value.is_empty() {
            return Err(Error::validation(
                ValidationCode::ExternalIdValueEmpty,
                "an identifier must not be empty",
            ));
        }
        if value.len() > ID_LENGTH {
            return Err(Error::validation(
                ValidationCode::ExternalIdValueTooLong,
                format!("an identifier has exactly {ID_LENGTH} characters, got {}", value.len()),
            ));
        }
        if value.len() < ID_LENGTH || !value.bytes().all(|b| b.is_ascii_alphanumeric()) {
            return Err(Error::validation(
                ValidationCode::ExternalIdValueInvalid,
                format!("an identifier is {ID_LENGTH} ASCII-alphanumeric characters, got {value:?}"),
            ));
        }
        Ok(Self(value.to_owned()))
    }

    /// The identifier text.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The trailing three characters naming the owning partition.
    pub fn partition_suffix(&self) -> &str {
        &self.0[ID_LENGTH - PARTITION_SUFFIX_LEN..]
    }

    /// Encode a 128-bit value as a zero-padded base62 identifier.
    pub(crate) fn from_u128(mut value: u128) -> Self {
        let mut buf = [b'0'; ID_LENGTH];
        let mut index = ID_LENGTH;
        while value > 0 {
            index -= 1;
            buf[index] = BASE62[(value % 62) as usize];
            value /= 62;
        }
        Self(String::from_utf8(buf.to_vec()).expect("base62 output is ASCII"))
    }

    /// A copy of this identifier with the partition suffix replaced.
    ///
    /// The suffix must already be validated as three alphanumeric characters;
    /// at least 40 random bits remain, so the result stays unique with
    /// overwhelming probability.
    pub(crate) fn with_partition_suffix(&self, suffix: &str) -> Self {
        debug_assert_eq!(suffix.len(), PARTITION_SUFFIX_LEN);
        let mut value = self.0[..ID_LENGTH - PARTITION_SUFFIX_LEN].to_owned();
        value.push_str(suffix);
        Self(value)
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for Id {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Serialize for Id {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for Id {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let value = String::deserialize(deserializer)?;
        Id::parse(&value).map_err(serde::de::Error::custom)
    }
}

/// Source of fresh identifiers.
///
/// Implementations are process-wide and shared; `next` must be safe to call
/// from concurrent tasks.
pub trait IdGenerator: Send + Sync {
    /// Generate the next identifier.
    fn next(&self) -> Id;
}

/// Default generator: v7-UUID semantics, time-ordered with a random tail.
#[derive(Debug, Default)]
pub struct TimeOrderedIdGenerator;

impl IdGenerator for TimeOrderedIdGenerator {
    fn next(&self) -> Id {
        let now = clock::utc_now();
        let ts = uuid::Timestamp::from_unix(
            uuid::NoContext,
            now.timestamp().max(0) as u64,
            now.timestamp_subsec_nanos(),
        );
        Id::from_u128(Uuid::new_v7(ts).as_u128())
    }
}

/// Strictly incremental generator for deterministic tests.
///
/// The n-th identifier's numeric body is `n * 100_000_000`, zero-padded to 19
/// digits, followed by the partition suffix (`000` until a scope pins one).
#[derive(Debug, Default)]
pub struct IncrementalIdGenerator {
    counter: AtomicU64,
}

impl IncrementalIdGenerator {
    /// A generator starting at 1.
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdGenerator for IncrementalIdGenerator {
    fn next(&self) -> Id {
        let n = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        Id(format!("{:019}000", n * 100_000_000))
    }
}
