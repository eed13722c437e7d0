//! # Pact Lock
//!
//! Short-lived global locks over unique-key documents.
//!
//! A momentary lock is a TTL-swept document whose id encodes a path-qualified
//! value; inserting it claims the value globally, deleting it releases the
//! claim, and the 20-second TTL is the safety net when a holder dies. The
//! factory acquires one key ([`MomentaryLockFactory::wait`]) or several at
//! once ([`MomentaryLockFactory::wait_range`]), keeping every held member
//! alive with TTL refreshes until the whole set is acquired.
//!
//! Discipline: multi-key requests acquire in sorted order, single-key
//! acquisitions must never nest (re-entry can deadlock against TTL expiry).

pub mod factory;
pub mod key;
pub mod synchronizer;

pub use factory::{MomentaryLock, MomentaryLockFactory, MomentaryLockSet, LOCK_TIME_TO_LIVE};
pub use key::{JsonPath, UniqueKey, UNIQUE_KEY_TIME_TO_LIVE_SECS};
pub use synchronizer::{LockSynchronizer, WaitOutcome};
