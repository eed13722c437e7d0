//! # Pact Promise
//!
//! Durable, at-least-once execution of named idempotent actions.
//!
//! A [`Promise`] is a persisted intent to eventually invoke a registered
//! action. Use cases create promises inside the same transaction as their
//! domain writes; committed promises are either fulfilled opportunistically
//! right away or picked up later by the background [`PromiseSalvager`],
//! which claims neglected promises through etag-conditional updates so that
//! competing workers never double-run an attempt.
//!
//! - [`Promise`] -- claim state, attempt counter, due time, action, data
//! - [`PromiseFactory`] -- creation against the registered action set
//! - [`FulfillmentRegistry`] -- the explicit name-to-handler map, frozen at
//!   startup
//! - [`PromiseFulfiller`] -- runs the action, then deletes the promise
//! - [`PromiseSalvager`] -- background loop re-driving due promises

pub mod entity;
pub mod factory;
pub mod fulfiller;
pub mod registry;
pub mod salvager;

pub use entity::{claim_duration, Promise, CLAIM_DURATION_SECS};
pub use factory::PromiseFactory;
pub use fulfiller::PromiseFulfiller;
pub use registry::{FulfillmentHandler, FulfillmentRegistry, FulfillmentRegistryBuilder};
pub use salvager::{PromiseSalvager, SalvagerState};
