//! Partition keys.
//!
//! A partition key is either derived from an [`Id`] (its last three
//! characters) or built from an arbitrary validated string. The two compare
//! equal only when the full strings match.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result, ValidationCode};
use crate::id::Id;

/// Maximum UTF-8 length of an arbitrary partition key, in bytes.
pub const MAX_PARTITION_KEY_BYTES: usize = 100;

/// Length of the partition suffix carried by every identifier.
pub const PARTITION_SUFFIX_LEN: usize = 3;

/// A validated partition label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PartitionKey(String);

impl PartitionKey {
    /// The partition an identifier lives in: exactly its last three
    /// characters.
    pub fn from_id(id: &Id) -> Self {
        Self(id.partition_suffix().to_owned())
    }

    /// Validate an arbitrary string as a partition key.
    ///
    /// Rejected: values longer than [`MAX_PARTITION_KEY_BYTES`] bytes, and
    /// values containing `/ \ # ? "`, control characters, line or paragraph
    /// separators, private-use code points, or noncharacters.
    pub fn for_string(value: &str) -> Result<Self> {
        if value.len() > MAX_PARTITION_KEY_BYTES {
            return Err(Error::validation(
                ValidationCode::PartitionKeyValueTooLong,
                format!(
                    "a partition key has at most {MAX_PARTITION_KEY_BYTES} bytes, got {}",
                    value.len()
                ),
            ));
        }
        if let Some(c) = value.chars().find(|c| is_forbidden(*c)) {
            return Err(Error::validation(
                ValidationCode::PartitionKeyValueInvalid,
                format!("a partition key must not contain {c:?}"),
            ));
        }
        Ok(Self(value.to_owned()))
    }

    /// Partition label for an ephemeral unique-key document: its own encoded
    /// value.
    ///
    /// Unique-key values are base64url text and may run up to twice the
    /// arbitrary-key byte limit; the character rules still apply.
    pub fn for_unique_value(value: &str) -> Result<Self> {
        if value.len() > 2 * MAX_PARTITION_KEY_BYTES {
            return Err(Error::validation(
                ValidationCode::PartitionKeyValueTooLong,
                format!(
                    "a unique-key partition has at most {} bytes, got {}",
                    2 * MAX_PARTITION_KEY_BYTES,
                    value.len()
                ),
            ));
        }
        if let Some(c) = value.chars().find(|c| is_forbidden(*c)) {
            return Err(Error::validation(
                ValidationCode::PartitionKeyValueInvalid,
                format!("a partition key must not contain {c:?}"),
            ));
        }
        Ok(Self(value.to_owned()))
    }

    /// The partition label text.
    pub fn value(&self) -> &str {
        &self.0
    }

    /// `true` when this key can serve as an identifier suffix.
    pub fn is_id_suffix(&self) -> bool {
        self.0.len() == PARTITION_SUFFIX_LEN && self.0.bytes().all(|b| b.is_ascii_alphanumeric())
    }
}

fn is_forbidden(c: char) -> bool {
    let code = c as u32;
    matches!(c, '/' | '\\' | '#' | '?' | '"')
        || c.is_control()
        || matches!(c, '\u{2028}' | '\u{2029}')
        || matches!(code, 0xE000..=0xF8FF | 0xF0000..=0xFFFFD | 0x100000..=0x10FFFD)
        || matches!(code, 0xFDD0..=0xFDEF)
        || code & 0xFFFE == 0xFFFE
}

/// The strict identifier cast: only a full 22-character alphanumeric
/// identifier converts, yielding its partition suffix. Arbitrary strings,
/// including ones `for_string` would accept, are rejected -- use
/// [`PartitionKey::for_string`] for those.
impl TryFrom<&str> for PartitionKey {
    type Error = Error;

    fn try_from(value: &str) -> Result<Self> {
        let id = Id::parse(value).map_err(|_| {
            Error::invalid_state(format!(
                "only a 22-character identifier casts to a partition key, got {value:?}"
            ))
        })?;
        Ok(Self::from_id(&id))
    }
}

impl fmt::Display for PartitionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PartitionKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
