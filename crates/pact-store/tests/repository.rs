//! Repository and transaction behaviour over the in-memory store.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use pact_core::{Error, PartitionKey, Result};
use pact_store::{
    ContinuationToken, Entity, Filter, MemoryStore, Query, Repository, SortOrder, StoredEntity,
};

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Gadget {
    id: String,
    part: String,
    #[serde(rename = "Gadget_Name")]
    name: String,
    #[serde(rename = "Gadget_Rank")]
    rank: i64,
    #[serde(skip)]
    etag: Option<String>,
    #[serde(skip)]
    storage_timestamp_secs: i64,
}

impl Gadget {
    fn new(id: &str, part: &str, name: &str, rank: i64) -> Self {
        Self {
            id: id.to_owned(),
            part: part.to_owned(),
            name: name.to_owned(),
            rank,
            etag: None,
            storage_timestamp_secs: 0,
        }
    }
}

impl StoredEntity for Gadget {
    fn type_name(&self) -> &'static str {
        "Gadget"
    }
    fn discriminator(&self) -> &'static str {
        Self::DISCRIMINATOR
    }
    fn document_id(&self) -> String {
        self.id.clone()
    }
    fn partition_key(&self) -> PartitionKey {
        PartitionKey::for_string(&self.part).expect("test partition is valid")
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

impl Entity for Gadget {
    const DISCRIMINATOR: &'static str = "Gadget_";
}

fn repository() -> (Repository, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::new());
    (Repository::new(store.clone()), store)
}

fn pk(value: &str) -> PartitionKey {
    PartitionKey::for_string(value).unwrap()
}

async fn seed(repo: &Repository, gadgets: &mut [Gadget]) {
    for gadget in gadgets {
        let mut tx = repo.create_transaction(gadget.partition_key());
        tx.create(gadget).unwrap();
        tx.commit().await.unwrap();
    }
}

#[tokio::test]
async fn commit_backfills_etags_in_submission_order() {
    let (repo, _) = repository();
    let mut a = Gadget::new("a", "par", "first", 1);
    let mut b = Gadget::new("b", "par", "second", 2);

    let mut tx = repo.create_transaction(pk("par"));
    tx.create(&mut a).unwrap();
    tx.create(&mut b).unwrap();
    tx.commit().await.unwrap();

    assert!(a.etag.is_some());
    assert!(b.etag.is_some());
    assert_ne!(a.etag, b.etag);
    // A commit does not mark the instance as loaded.
    assert_eq!(a.storage_timestamp_secs, 0);
}

#[tokio::test]
async fn get_reads_what_was_committed() {
    let (repo, _) = repository();
    let mut gadget = Gadget::new("a", "par", "first", 1);
    seed(&repo, std::slice::from_mut(&mut gadget)).await;

    let loaded: Gadget = repo.get("a", &pk("par")).await.unwrap().unwrap();
    assert_eq!(loaded.name, "first");
    assert_eq!(loaded.etag, gadget.etag);
    assert!(loaded.storage_timestamp_secs > 0);

    let missing: Option<Gadget> = repo.get("zz", &pk("par")).await.unwrap();
    assert!(missing.is_none());
}

#[tokio::test]
async fn get_rejects_a_mismatched_partition_for_full_ids() {
    let (repo, _) = repository();
    let result: Result<Option<Gadget>> =
        repo.get("0000000000100000000par", &pk("xyz")).await;
    assert!(matches!(result.unwrap_err(), Error::InvalidState(_)));
}

#[tokio::test]
async fn queries_must_discriminate_the_entity_type() {
    let (repo, _) = repository();
    let query = Query::<Gadget>::new().filter(Filter::eq("SomethingElse", 1));
    assert!(matches!(repo.exists(&query).await.unwrap_err(), Error::InvalidState(_)));

    let query = Query::<Gadget>::new().filter(Filter::eq("id", "a"));
    assert!(!repo.exists(&query).await.unwrap());
}

#[tokio::test]
async fn load_fails_on_multiple_matches() {
    let (repo, _) = repository();
    let mut gadgets =
        vec![Gadget::new("a", "par", "dup", 1), Gadget::new("b", "par", "dup", 2)];
    seed(&repo, &mut gadgets).await;

    let query = Query::<Gadget>::new().filter(Filter::eq("Gadget_Name", "dup"));
    assert!(matches!(repo.load(&query).await.unwrap_err(), Error::MultipleMatches));

    let query = Query::<Gadget>::new().filter(Filter::eq("Gadget_Rank", 2));
    let loaded = repo.load(&query).await.unwrap().unwrap();
    assert_eq!(loaded.id, "b");

    let query = Query::<Gadget>::new().filter(Filter::eq("Gadget_Rank", 9));
    assert!(repo.load(&query).await.unwrap().is_none());
}

#[tokio::test]
async fn list_visits_every_match_exactly_once() {
    let (repo, _) = repository();
    let mut gadgets: Vec<Gadget> = (0..25)
        .map(|i| Gadget::new(&format!("g{i:02}"), "par", "bulk", i))
        .collect();
    seed(&repo, &mut gadgets).await;

    let query = Query::<Gadget>::new()
        .filter(Filter::eq("Gadget_Name", "bulk"))
        .order_by("Gadget_Rank", SortOrder::Ascending)
        .page_size(4);
    let all = repo.list(&query).await.unwrap();
    assert_eq!(all.len(), 25);
    let ranks: Vec<i64> = all.iter().map(|g| g.rank).collect();
    assert_eq!(ranks, (0..25).collect::<Vec<_>>());
}

#[tokio::test]
async fn enumerate_with_concurrent_deletions_neither_duplicates_nor_skips() {
    let (repo, _) = repository();
    let mut gadgets: Vec<Gadget> =
        (0..10).map(|i| Gadget::new(&format!("g{i}"), "par", "page", i)).collect();
    seed(&repo, &mut gadgets).await;

    let query = Query::<Gadget>::new()
        .filter(Filter::eq("Gadget_Name", "page"))
        .order_by("Gadget_Rank", SortOrder::Ascending)
        .page_size(3);

    let mut token = ContinuationToken::new();
    let mut seen = Vec::new();

    let first = repo.enumerate(&query, &mut token).await.unwrap();
    seen.extend(first.iter().map(|g| g.id.clone()));

    // Delete two already-visited documents between pages.
    let mut tx = repo.create_transaction(pk("par"));
    tx.delete_by_id(seen[0].clone()).unwrap();
    tx.delete_by_id(seen[1].clone()).unwrap();
    tx.commit().await.unwrap();

    while !token.is_exhausted() {
        let page = repo.enumerate(&query, &mut token).await.unwrap();
        seen.extend(page.iter().map(|g| g.id.clone()));
    }

    let expected: Vec<String> = (0..10).map(|i| format!("g{i}")).collect();
    assert_eq!(seen, expected);
}

#[tokio::test]
async fn update_is_etag_conditional() {
    let (repo, _) = repository();
    let mut gadget = Gadget::new("a", "par", "first", 1);
    seed(&repo, std::slice::from_mut(&mut gadget)).await;

    // A stale copy loses the race.
    let mut stale: Gadget = repo.get("a", &pk("par")).await.unwrap().unwrap();

    gadget.rank = 5;
    let mut tx = repo.create_transaction(pk("par"));
    tx.update(&mut gadget).unwrap();
    tx.commit().await.unwrap();

    stale.rank = 9;
    let mut tx = repo.create_transaction(pk("par"));
    tx.update(&mut stale).unwrap();
    assert!(tx.commit().await.unwrap_err().is_conflict());

    let current: Gadget = repo.get("a", &pk("par")).await.unwrap().unwrap();
    assert_eq!(current.rank, 5);
}

#[tokio::test]
async fn never_stored_entities_cannot_be_updated_or_deleted_conditionally() {
    let (repo, _) = repository();
    let mut fresh = Gadget::new("a", "par", "first", 1);

    let mut tx = repo.create_transaction(pk("par"));
    assert!(matches!(tx.update(&mut fresh).unwrap_err(), Error::InvalidState(_)));
    let mut tx = repo.create_transaction(pk("par"));
    assert!(matches!(tx.delete(&mut fresh).unwrap_err(), Error::InvalidState(_)));
}

#[tokio::test]
async fn transactions_reject_foreign_partitions() {
    let (repo, _) = repository();
    let mut gadget = Gadget::new("a", "other", "first", 1);
    let mut tx = repo.create_transaction(pk("par"));
    assert!(matches!(tx.create(&mut gadget).unwrap_err(), Error::InvalidState(_)));
}

#[tokio::test]
async fn delete_by_id_checks_the_id_partition() {
    let (repo, _) = repository();
    let mut tx = repo.create_transaction(pk("par"));
    assert!(tx.delete_by_id("0000000000100000000xyz").is_err());
    // Non-identifier ids carry no derivable partition and pass through.
    tx.delete_by_id("Migration00001").unwrap();
}

#[tokio::test]
async fn uncommitted_transactions_send_nothing() {
    let (repo, store) = repository();
    let mut gadget = Gadget::new("a", "par", "first", 1);
    {
        let mut tx = repo.create_transaction(pk("par"));
        tx.create(&mut gadget).unwrap();
        // Dropped without commit.
    }
    assert_eq!(store.document_count(), 0);
    assert!(gadget.etag.is_none());
}

#[tokio::test]
async fn delete_unchecked_ignores_intervening_writes() {
    let (repo, store) = repository();
    let mut gadget = Gadget::new("a", "par", "first", 1);
    seed(&repo, std::slice::from_mut(&mut gadget)).await;

    // Another writer bumps the document.
    let mut other: Gadget = repo.get("a", &pk("par")).await.unwrap().unwrap();
    other.rank = 3;
    let mut tx = repo.create_transaction(pk("par"));
    tx.update(&mut other).unwrap();
    tx.commit().await.unwrap();

    // Unconditional delete still succeeds with the stale instance.
    let mut tx = repo.create_transaction(pk("par"));
    tx.delete_unchecked(&mut gadget).unwrap();
    tx.commit().await.unwrap();
    assert_eq!(store.document_count(), 0);
}
