//! # Pact Core
//!
//! Shared foundation for the Pact promise execution subsystem:
//!
//! - [`Id`] -- 22-character base62, time-ordered identifiers whose last three
//!   characters name the owning partition
//! - [`PartitionKey`] -- validated partition labels, either derived from an
//!   id or built from an arbitrary string
//! - [`clock`] -- the ambient, swappable UTC clock all due-time math uses
//! - [`scope`] -- ambient id-generation scopes (replacement generators and
//!   pinned partitions) for use cases and tests
//! - [`Error`] -- the workspace error taxonomy with stable validation codes

pub mod clock;
pub mod error;
pub mod id;
pub mod partition;
pub mod scope;

pub use error::{Error, Result, ValidationCode};
pub use id::{Id, IdGenerator, IncrementalIdGenerator, TimeOrderedIdGenerator, ID_LENGTH};
pub use partition::{PartitionKey, MAX_PARTITION_KEY_BYTES, PARTITION_SUFFIX_LEN};
pub use scope::{new_id, new_id_in_partition, IdScope};
