//! In-memory document store for tests and local tooling.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde_json::Value;

use pact_core::{clock, Error, Result};

use crate::document::{EtagStamp, RawDocument};
use crate::query::{Comparison, Cursor, Filter, QueryPage, QuerySpec, SortOrder};
use crate::store::{BatchOp, ContainerProperties, DocumentStore, MAX_BATCH_OPERATIONS};

#[derive(Debug, Clone)]
struct VersionedDoc {
    body: Value,
    etag: String,
    written_secs: i64,
    ttl_secs: Option<i64>,
}

impl VersionedDoc {
    fn is_expired(&self, now_secs: i64) -> bool {
        self.ttl_secs.is_some_and(|ttl| now_secs >= self.written_secs + ttl)
    }
}

/// [`DocumentStore`] over process memory.
///
/// Partition batches are atomic (the batch applies to a staged copy of the
/// partition and swaps in only when every precondition held). TTL expiry is
/// evaluated lazily against the ambient clock. `fail_next` injects storage
/// failures for error-path tests.
#[derive(Debug, Default)]
pub struct MemoryStore {
    partitions: DashMap<String, BTreeMap<String, VersionedDoc>>,
    container: RwLock<ContainerProperties>,
    fault_budget: AtomicUsize,
    etag_counter: AtomicU64,
}

impl MemoryStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` store operations fail with a `Storage` error.
    pub fn fail_next(&self, n: usize) {
        self.fault_budget.store(n, Ordering::SeqCst);
    }

    /// Number of live (unexpired) documents across all partitions.
    pub fn document_count(&self) -> usize {
        let now_secs = clock::utc_now().timestamp();
        self.partitions
            .iter()
            .map(|entry| entry.value().values().filter(|d| !d.is_expired(now_secs)).count())
            .sum()
    }

    /// All live documents in one partition, in id order.
    pub fn documents_in_partition(&self, partition: &str) -> Vec<RawDocument> {
        let now_secs = clock::utc_now().timestamp();
        self.partitions
            .get(partition)
            .map(|map| {
                map.iter()
                    .filter(|(_, doc)| !doc.is_expired(now_secs))
                    .map(|(id, doc)| to_raw(partition, id, doc))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Remove every document and reset container properties.
    pub fn clear(&self) {
        self.partitions.clear();
        *self.container.write() = ContainerProperties::new();
    }

    fn take_fault(&self) -> Result<()> {
        let taken = self
            .fault_budget
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if taken {
            return Err(Error::storage("injected fault"));
        }
        Ok(())
    }

    fn next_etag(&self) -> String {
        format!("\"{:016x}\"", self.etag_counter.fetch_add(1, Ordering::Relaxed) + 1)
    }

    fn now(&self) -> DateTime<Utc> {
        clock::utc_now()
    }
}

fn to_raw(partition: &str, id: &str, doc: &VersionedDoc) -> RawDocument {
    RawDocument {
        id: id.to_owned(),
        partition: partition.to_owned(),
        etag: doc.etag.clone(),
        timestamp_secs: doc.written_secs,
        ttl_secs: doc.ttl_secs,
        body: doc.body.clone(),
    }
}

/// Total order used for sorting and cursors: order value, then partition,
/// then id.
fn position_key(spec: &QuerySpec, raw: &RawDocument) -> (Option<Value>, String, String) {
    let order_value = spec
        .order_by
        .as_ref()
        .and_then(|(property, _)| raw.body.get(property).cloned());
    (order_value, raw.partition.clone(), raw.id.clone())
}

fn compare_positions(
    spec: &QuerySpec,
    a: &(Option<Value>, String, String),
    b: &(Option<Value>, String, String),
) -> std::cmp::Ordering {
    use std::cmp::Ordering as O;
    let by_value = match (&a.0, &b.0) {
        (Some(x), Some(y)) => compare_values(x, y),
        (None, None) => O::Equal,
        (None, Some(_)) => O::Less,
        (Some(_), None) => O::Greater,
    };
    let by_value = match spec.order_by {
        Some((_, SortOrder::Descending)) => by_value.reverse(),
        _ => by_value,
    };
    by_value.then_with(|| a.1.cmp(&b.1)).then_with(|| a.2.cmp(&b.2))
}

fn compare_values(a: &Value, b: &Value) -> std::cmp::Ordering {
    use std::cmp::Ordering as O;
    match (a, b) {
        (Value::String(x), Value::String(y)) => {
            // Due-time strings may arrive in mixed RFC 3339 spellings.
            match (
                DateTime::parse_from_rfc3339(x),
                DateTime::parse_from_rfc3339(y),
            ) {
                (Ok(t), Ok(u)) => t.cmp(&u),
                _ => x.cmp(y),
            }
        }
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(O::Equal),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (Value::Null, Value::Null) => O::Equal,
        (Value::Null, _) => O::Less,
        (_, Value::Null) => O::Greater,
        _ => format!("{a}").cmp(&format!("{b}")),
    }
}

fn matches_filter(body: &Value, filter: &Filter) -> bool {
    let Some(actual) = body.get(&filter.property) else {
        return false;
    };
    match filter.comparison {
        Comparison::Eq => compare_values(actual, &filter.value).is_eq(),
        Comparison::Le => compare_values(actual, &filter.value).is_le(),
        Comparison::Ge => compare_values(actual, &filter.value).is_ge(),
        Comparison::StartsWith => match (actual.as_str(), filter.value.as_str()) {
            (Some(text), Some(prefix)) => text.starts_with(prefix),
            _ => false,
        },
    }
}

#[async_trait]
impl DocumentStore for MemoryStore {
    async fn read(&self, partition: &str, id: &str) -> Result<Option<RawDocument>> {
        self.take_fault()?;
        let now_secs = self.now().timestamp();
        Ok(self.partitions.get(partition).and_then(|map| {
            map.get(id)
                .filter(|doc| !doc.is_expired(now_secs))
                .map(|doc| to_raw(partition, id, doc))
        }))
    }

    async fn query(&self, spec: &QuerySpec, cursor: Option<&Cursor>) -> Result<QueryPage> {
        self.take_fault()?;
        let now_secs = self.now().timestamp();

        let mut matches: Vec<RawDocument> = Vec::new();
        for entry in self.partitions.iter() {
            if let Some(pk) = &spec.partition {
                if entry.key() != pk {
                    continue;
                }
            }
            for (id, doc) in entry.value().iter() {
                if doc.is_expired(now_secs) {
                    continue;
                }
                if spec.filters.iter().all(|f| matches_filter(&doc.body, f)) {
                    matches.push(to_raw(entry.key(), id, doc));
                }
            }
        }

        matches.sort_by(|a, b| {
            compare_positions(spec, &position_key(spec, a), &position_key(spec, b))
        });

        if let Some(cursor) = cursor {
            let after = (cursor.order_value.clone(), cursor.partition.clone(), cursor.id.clone());
            matches.retain(|raw| {
                compare_positions(spec, &position_key(spec, raw), &after).is_gt()
            });
        }

        let page_size = spec.page_size.max(1);
        let page: Vec<RawDocument> = matches.into_iter().take(page_size).collect();
        let next = (page.len() == page_size).then(|| {
            let last = page.last().expect("page size is at least 1");
            let (order_value, partition, id) = position_key(spec, last);
            Cursor { order_value, id, partition }
        });
        Ok(QueryPage { documents: page, next })
    }

    async fn commit_batch(
        &self,
        partition: &str,
        ops: Vec<BatchOp>,
    ) -> Result<Vec<Option<EtagStamp>>> {
        self.take_fault()?;
        if ops.len() > MAX_BATCH_OPERATIONS {
            return Err(Error::storage(format!(
                "a batch holds at most {MAX_BATCH_OPERATIONS} operations, got {}",
                ops.len()
            )));
        }
        let now_secs = self.now().timestamp();

        let mut entry = self.partitions.entry(partition.to_owned()).or_default();
        // All-or-nothing: apply to a staged copy, swap in only on success.
        let mut staged = entry.clone();
        let mut stamps = Vec::with_capacity(ops.len());

        for op in ops {
            match op {
                BatchOp::Create { id, document, ttl_secs } => {
                    if staged.get(&id).is_some_and(|doc| !doc.is_expired(now_secs)) {
                        return Err(Error::ConcurrencyConflict);
                    }
                    let etag = self.next_etag();
                    staged.insert(
                        id,
                        VersionedDoc { body: document, etag: etag.clone(), written_secs: now_secs, ttl_secs },
                    );
                    stamps.push(Some(EtagStamp { etag, timestamp_secs: now_secs }));
                }
                BatchOp::Replace { id, document, if_etag, ttl_secs } => {
                    let current = staged.get(&id).filter(|doc| !doc.is_expired(now_secs));
                    match (current, &if_etag) {
                        (None, Some(_)) => return Err(Error::ConcurrencyConflict),
                        (None, None) => {
                            return Err(Error::storage(format!("document {id:?} not found")))
                        }
                        (Some(doc), Some(expected)) if &doc.etag != expected => {
                            return Err(Error::ConcurrencyConflict)
                        }
                        _ => {}
                    }
                    let etag = self.next_etag();
                    staged.insert(
                        id,
                        VersionedDoc { body: document, etag: etag.clone(), written_secs: now_secs, ttl_secs },
                    );
                    stamps.push(Some(EtagStamp { etag, timestamp_secs: now_secs }));
                }
                BatchOp::Delete { id, if_etag } => {
                    let current = staged.get(&id).filter(|doc| !doc.is_expired(now_secs));
                    match (current, &if_etag) {
                        (None, Some(_)) => return Err(Error::ConcurrencyConflict),
                        (None, None) => {
                            return Err(Error::storage(format!("document {id:?} not found")))
                        }
                        (Some(doc), Some(expected)) if &doc.etag != expected => {
                            return Err(Error::ConcurrencyConflict)
                        }
                        _ => {}
                    }
                    staged.remove(&id);
                    stamps.push(None);
                }
            }
        }

        *entry = staged;
        Ok(stamps)
    }

    async fn patch(
        &self,
        partition: &str,
        id: &str,
        sets: Vec<(String, Value)>,
        if_etag: Option<&str>,
    ) -> Result<EtagStamp> {
        self.take_fault()?;
        let now_secs = self.now().timestamp();

        let mut entry = self
            .partitions
            .get_mut(partition)
            .ok_or_else(|| missing_on_patch(id, if_etag))?;
        let doc = entry
            .get_mut(id)
            .filter(|doc| !doc.is_expired(now_secs))
            .ok_or_else(|| missing_on_patch(id, if_etag))?;
        if let Some(expected) = if_etag {
            if doc.etag != expected {
                return Err(Error::ConcurrencyConflict);
            }
        }

        for (property, value) in sets {
            if property == "ttl" {
                doc.ttl_secs = value.as_i64();
            }
            if let Value::Object(body) = &mut doc.body {
                body.insert(property, value);
            }
        }
        doc.etag = self.next_etag();
        doc.written_secs = now_secs;
        Ok(EtagStamp { etag: doc.etag.clone(), timestamp_secs: now_secs })
    }

    async fn read_container_properties(&self) -> Result<ContainerProperties> {
        self.take_fault()?;
        Ok(self.container.read().clone())
    }

    async fn replace_container_properties(&self, properties: ContainerProperties) -> Result<()> {
        self.take_fault()?;
        *self.container.write() = properties;
        Ok(())
    }
}

fn missing_on_patch(id: &str, if_etag: Option<&str>) -> Error {
    if if_etag.is_some() {
        // The precondition can no longer hold: the document changed or went
        // away since it was read.
        Error::ConcurrencyConflict
    } else {
        Error::storage(format!("document {id:?} not found"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pact_core::clock::ClockScope;
    use chrono::TimeZone;
    use serde_json::json;

    fn doc(id: &str, due: &str) -> Value {
        json!({ "id": id, "part": "par", "Test_Due": due, "Test_Name": id })
    }

    fn spec() -> QuerySpec {
        QuerySpec {
            partition: None,
            filters: vec![Filter::starts_with("Test_Name", "")],
            order_by: Some(("Test_Due".to_owned(), SortOrder::Ascending)),
            page_size: 2,
            consistency: Default::default(),
        }
    }

    async fn seed(store: &MemoryStore, ids: &[(&str, &str)]) {
        let ops = ids
            .iter()
            .map(|(id, due)| BatchOp::Create {
                id: (*id).to_owned(),
                document: doc(id, due),
                ttl_secs: None,
            })
            .collect();
        store.commit_batch("par", ops).await.unwrap();
    }

    #[tokio::test]
    async fn batch_assigns_etags_in_order() {
        let store = MemoryStore::new();
        let stamps = store
            .commit_batch(
                "par",
                vec![
                    BatchOp::Create { id: "a".into(), document: doc("a", "1"), ttl_secs: None },
                    BatchOp::Create { id: "b".into(), document: doc("b", "2"), ttl_secs: None },
                ],
            )
            .await
            .unwrap();
        assert_eq!(stamps.len(), 2);
        assert!(stamps.iter().all(|s| s.is_some()));
        assert_ne!(stamps[0], stamps[1]);
    }

    #[tokio::test]
    async fn batch_is_all_or_nothing() {
        let store = MemoryStore::new();
        seed(&store, &[("a", "1")]).await;
        let err = store
            .commit_batch(
                "par",
                vec![
                    BatchOp::Create { id: "b".into(), document: doc("b", "2"), ttl_secs: None },
                    // Fails: "a" already exists.
                    BatchOp::Create { id: "a".into(), document: doc("a", "9"), ttl_secs: None },
                ],
            )
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert!(store.read("par", "b").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn replace_checks_the_etag() {
        let store = MemoryStore::new();
        seed(&store, &[("a", "1")]).await;
        let current = store.read("par", "a").await.unwrap().unwrap();

        let err = store
            .commit_batch(
                "par",
                vec![BatchOp::Replace {
                    id: "a".into(),
                    document: doc("a", "5"),
                    if_etag: Some("\"stale\"".into()),
                    ttl_secs: None,
                }],
            )
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        store
            .commit_batch(
                "par",
                vec![BatchOp::Replace {
                    id: "a".into(),
                    document: doc("a", "5"),
                    if_etag: Some(current.etag),
                    ttl_secs: None,
                }],
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn conditional_patch_conflicts_on_change_or_absence() {
        let store = MemoryStore::new();
        seed(&store, &[("a", "1")]).await;
        let current = store.read("par", "a").await.unwrap().unwrap();

        let stamp = store
            .patch("par", "a", vec![("Test_Due".into(), json!("7"))], Some(&current.etag))
            .await
            .unwrap();
        assert_ne!(stamp.etag, current.etag);

        // Stale etag now conflicts.
        let err = store
            .patch("par", "a", vec![("Test_Due".into(), json!("8"))], Some(&current.etag))
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        // Conditional patch of a missing document also reads as a conflict.
        let err = store
            .patch("par", "gone", vec![("Test_Due".into(), json!("8"))], Some(&stamp.etag))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
    }

    #[tokio::test]
    async fn query_pages_in_due_order() {
        let store = MemoryStore::new();
        seed(&store, &[("c", "3"), ("a", "1"), ("b", "2")]).await;

        let first = store.query(&spec(), None).await.unwrap();
        let ids: Vec<_> = first.documents.iter().map(|d| d.id.clone()).collect();
        assert_eq!(ids, vec!["a", "b"]);
        let cursor = first.next.unwrap();

        let second = store.query(&spec(), Some(&cursor)).await.unwrap();
        let ids: Vec<_> = second.documents.iter().map(|d| d.id.clone()).collect();
        assert_eq!(ids, vec!["c"]);
        assert!(second.next.is_none());
    }

    #[tokio::test]
    async fn deletion_behind_the_cursor_skips_nothing() {
        let store = MemoryStore::new();
        seed(&store, &[("a", "1"), ("b", "2"), ("c", "3"), ("d", "4")]).await;

        let first = store.query(&spec(), None).await.unwrap();
        let cursor = first.next.unwrap();

        // Delete an already-visited document between pages.
        store
            .commit_batch("par", vec![BatchOp::Delete { id: "a".into(), if_etag: None }])
            .await
            .unwrap();

        let second = store.query(&spec(), Some(&cursor)).await.unwrap();
        let ids: Vec<_> = second.documents.iter().map(|d| d.id.clone()).collect();
        assert_eq!(ids, vec!["c", "d"]);
    }

    #[tokio::test]
    async fn ttl_expires_documents_lazily() {
        let scope = ClockScope::fixed(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let store = MemoryStore::new();
        store
            .commit_batch(
                "k",
                vec![BatchOp::Create { id: "lock".into(), document: json!({"id": "lock"}), ttl_secs: Some(20) }],
            )
            .await
            .unwrap();
        assert!(store.read("k", "lock").await.unwrap().is_some());

        scope.advance(chrono::Duration::seconds(20));
        assert!(store.read("k", "lock").await.unwrap().is_none());
        assert_eq!(store.document_count(), 0);

        // An expired document no longer blocks a create.
        store
            .commit_batch(
                "k",
                vec![BatchOp::Create { id: "lock".into(), document: json!({"id": "lock"}), ttl_secs: Some(20) }],
            )
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn patch_restarts_the_ttl_window() {
        let scope = ClockScope::fixed(Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap());
        let store = MemoryStore::new();
        store
            .commit_batch(
                "k",
                vec![BatchOp::Create { id: "lock".into(), document: json!({"id": "lock", "ttl": 20}), ttl_secs: Some(20) }],
            )
            .await
            .unwrap();

        scope.advance(chrono::Duration::seconds(15));
        store.patch("k", "lock", vec![("ttl".into(), json!(20))], None).await.unwrap();

        scope.advance(chrono::Duration::seconds(15));
        assert!(store.read("k", "lock").await.unwrap().is_some());

        scope.advance(chrono::Duration::seconds(5));
        assert!(store.read("k", "lock").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn injected_faults_surface_as_storage_errors() {
        let store = MemoryStore::new();
        store.fail_next(1);
        let err = store.read("par", "a").await.unwrap_err();
        assert!(matches!(err, Error::Storage(_)));
        // Budget consumed; the next call succeeds.
        assert!(store.read("par", "a").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn container_properties_round_trip() {
        let store = MemoryStore::new();
        let mut props = store.read_container_properties().await.unwrap();
        assert!(props.is_empty());
        props.set("indexing/includedPaths", json!(["/Promise_Due/?"]));
        store.replace_container_properties(props.clone()).await.unwrap();
        assert_eq!(store.read_container_properties().await.unwrap(), props);
    }
}
