//! Typed query building and cursor pagination.

use std::marker::PhantomData;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::document::{Entity, RawDocument};

/// Read consistency for a query.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Consistency {
    /// Session consistency, the default.
    #[default]
    Session,
    /// Stale-but-ordered reads; what the salvager scans with.
    ConsistentPrefix,
    /// The strongest level the store offers; required wherever a count must
    /// observe prior writes (migrations).
    Strong,
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// One property comparison.
#[derive(Debug, Clone)]
pub struct Filter {
    pub(crate) property: String,
    pub(crate) comparison: Comparison,
    pub(crate) value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Comparison {
    Eq,
    Le,
    Ge,
    StartsWith,
}

impl Filter {
    /// `property == value`.
    pub fn eq(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Self { property: property.into(), comparison: Comparison::Eq, value: value.into() }
    }

    /// `property <= value`.
    pub fn le(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Self { property: property.into(), comparison: Comparison::Le, value: value.into() }
    }

    /// `property >= value`.
    pub fn ge(property: impl Into<String>, value: impl Into<Value>) -> Self {
        Self { property: property.into(), comparison: Comparison::Ge, value: value.into() }
    }

    /// String prefix match.
    pub fn starts_with(property: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self {
            property: property.into(),
            comparison: Comparison::StartsWith,
            value: Value::String(prefix.into()),
        }
    }

    /// `property <= instant`, using the fixed-precision due-time spelling.
    pub fn due_on_or_before(property: impl Into<String>, instant: DateTime<Utc>) -> Self {
        Self::le(property, crate::document::rfc3339::format(&instant))
    }
}

/// A typed query over one entity type.
#[derive(Debug)]
pub struct Query<E: Entity> {
    pub(crate) partition: Option<String>,
    pub(crate) filters: Vec<Filter>,
    pub(crate) order_by: Option<(String, SortOrder)>,
    pub(crate) page_size: usize,
    pub(crate) consistency: Consistency,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> Default for Query<E> {
    fn default() -> Self {
        Self::new()
    }
}

// Manual impl: a query is clonable whether or not the entity itself is.
impl<E: Entity> Clone for Query<E> {
    fn clone(&self) -> Self {
        Self {
            partition: self.partition.clone(),
            filters: self.filters.clone(),
            order_by: self.order_by.clone(),
            page_size: self.page_size,
            consistency: self.consistency,
            _entity: PhantomData,
        }
    }
}

impl<E: Entity> Query<E> {
    /// An unfiltered query (the repository will still demand a
    /// discriminating filter before running it).
    pub fn new() -> Self {
        Self {
            partition: None,
            filters: Vec::new(),
            order_by: None,
            page_size: 100,
            consistency: Consistency::default(),
            _entity: PhantomData,
        }
    }

    /// Restrict to a single partition.
    #[must_use]
    pub fn in_partition(mut self, partition: impl Into<String>) -> Self {
        self.partition = Some(partition.into());
        self
    }

    /// Add a filter conjunct.
    #[must_use]
    pub fn filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Order results by a property.
    #[must_use]
    pub fn order_by(mut self, property: impl Into<String>, order: SortOrder) -> Self {
        self.order_by = Some((property.into(), order));
        self
    }

    /// Page size for `enumerate`; also the fetch size `list` uses.
    #[must_use]
    pub fn page_size(mut self, size: usize) -> Self {
        self.page_size = size.max(1);
        self
    }

    /// Read consistency.
    #[must_use]
    pub fn consistency(mut self, consistency: Consistency) -> Self {
        self.consistency = consistency;
        self
    }

    /// `true` when at least one filter references `id` or a property
    /// carrying this entity's discriminator prefix.
    pub(crate) fn discriminates(&self) -> bool {
        self.filters.iter().any(|f| {
            f.property == "id" || f.property.starts_with(E::DISCRIMINATOR)
        })
    }

    /// The untyped spec handed to the store.
    pub(crate) fn to_spec(&self) -> QuerySpec {
        QuerySpec {
            partition: self.partition.clone(),
            filters: self.filters.clone(),
            order_by: self.order_by.clone(),
            page_size: self.page_size,
            consistency: self.consistency,
        }
    }
}

/// Untyped query description consumed by [`DocumentStore::query`].
///
/// [`DocumentStore::query`]: crate::store::DocumentStore::query
#[derive(Debug, Clone)]
pub struct QuerySpec {
    pub partition: Option<String>,
    pub filters: Vec<Filter>,
    pub order_by: Option<(String, SortOrder)>,
    pub page_size: usize,
    pub consistency: Consistency,
}

/// Cursor identifying where the previous page ended.
///
/// Cursors name the last visited `(order value, id)` pair rather than an
/// offset, so deletions behind the cursor neither duplicate nor skip
/// documents.
#[derive(Debug, Clone, PartialEq)]
pub struct Cursor {
    /// Order-by value of the last visited document, when the query orders.
    pub order_value: Option<Value>,
    /// Id of the last visited document.
    pub id: String,
    /// Partition of the last visited document.
    pub partition: String,
}

/// One page of raw results.
#[derive(Debug)]
pub struct QueryPage {
    /// Documents in query order.
    pub documents: Vec<RawDocument>,
    /// Where the next page starts; `None` when the page was short.
    pub next: Option<Cursor>,
}

/// Caller-owned pagination state for [`Repository::enumerate`].
///
/// [`Repository::enumerate`]: crate::repository::Repository::enumerate
#[derive(Debug, Default)]
pub struct ContinuationToken {
    pub(crate) cursor: Option<Cursor>,
    pub(crate) exhausted: bool,
}

impl ContinuationToken {
    /// A token positioned at the start.
    pub fn new() -> Self {
        Self::default()
    }

    /// `true` once every page has been returned.
    pub fn is_exhausted(&self) -> bool {
        self.exhausted
    }
}
