//! # Pact Store
//!
//! Single-partition document repository over a pluggable store capability.
//!
//! The document store is treated as a capability, not a product: anything
//! offering per-partition ACID batches of up to 100 operations,
//! etag-conditional writes, TTL sweeping, and filtered ordered queries can
//! back the [`DocumentStore`] trait. [`MemoryStore`] is the in-process
//! implementation used by tests and local tooling.
//!
//! Layers, bottom up:
//!
//! - [`document`] -- the wire shape and the [`StoredEntity`] contract
//! - [`store`] -- the raw capability trait ([`DocumentStore`], batches,
//!   patches, container properties)
//! - [`query`] -- typed query building and cursor pagination
//! - [`repository`] -- typed reads ([`Repository::get`], `exists`, `load`,
//!   `list`, `enumerate`) and transaction creation
//! - [`transaction`] -- staged single-partition batches with etag back-fill

pub mod config;
pub mod document;
pub mod memory;
pub mod query;
pub mod repository;
pub mod store;
pub mod transaction;

pub use config::StoreConfig;
pub use document::{rfc3339, Entity, EtagStamp, RawDocument, StoredEntity};
pub use memory::MemoryStore;
pub use query::{
    Consistency, ContinuationToken, Cursor, Filter, Query, QueryPage, QuerySpec, SortOrder,
};
pub use repository::Repository;
pub use store::{BatchOp, ContainerProperties, DocumentStore, MAX_BATCH_OPERATIONS};
pub use transaction::Transaction;
