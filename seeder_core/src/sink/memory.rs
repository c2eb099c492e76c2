//! In-memory implementation of the bulk sink.
//!
//! Documents are kept in a map keyed by id, so it honours the same upsert
//! semantics as a real index. Faults can be injected to exercise the retry and
//! overload paths, which makes it useful for tests and dry runs.

use std::{
    collections::HashMap,
    sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering},
};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::RwLock;

use super::{
    BulkDocument, BulkItemFailure, BulkItemResult, BulkSink, CollectionStatus, Result, SinkError,
};

#[derive(Debug, Default)]
struct Collection {
    mapping: Value,
    documents: HashMap<String, Value>,
    /// Number of documents visible to searches, updated on refresh.
    visible: usize,
}

#[derive(Debug, Default)]
pub struct InMemorySink {
    collections: RwLock<HashMap<String, Collection>>,
    unreachable: AtomicBool,
    fail_refresh: AtomicBool,
    overloaded_requests: AtomicUsize,
    rejected_items: AtomicUsize,
    bulk_requests: AtomicU64,
    write_attempts: AtomicU64,
}

impl InMemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every ping, as if the store was down.
    pub fn with_unreachable(self) -> Self {
        self.unreachable.store(true, Ordering::Relaxed);
        self
    }

    /// Fail every refresh request.
    pub fn with_failing_refresh(self) -> Self {
        self.fail_refresh.store(true, Ordering::Relaxed);
        self
    }

    /// Reject the next `count` bulk requests as a whole with an overload error.
    pub fn with_overloaded_requests(self, count: usize) -> Self {
        self.overloaded_requests.store(count, Ordering::Relaxed);
        self
    }

    /// Reject the next `count` documents with an item-level overload error.
    pub fn with_rejected_items(self, count: usize) -> Self {
        self.rejected_items.store(count, Ordering::Relaxed);
        self
    }

    /// Number of bulk requests received, including rejected ones.
    pub fn bulk_requests(&self) -> u64 {
        self.bulk_requests.load(Ordering::Relaxed)
    }

    /// Number of documents received, including rejected and replayed ones.
    pub fn write_attempts(&self) -> u64 {
        self.write_attempts.load(Ordering::Relaxed)
    }

    pub async fn document(&self, collection: &str, id: &str) -> Option<Value> {
        let collections = self.collections.read().await;
        collections.get(collection)?.documents.get(id).cloned()
    }

    /// All documents in the collection, in no particular order.
    pub async fn documents(&self, collection: &str) -> Vec<Value> {
        let collections = self.collections.read().await;
        collections
            .get(collection)
            .map(|c| c.documents.values().cloned().collect())
            .unwrap_or_default()
    }

    pub async fn count(&self, collection: &str) -> usize {
        let collections = self.collections.read().await;
        collections
            .get(collection)
            .map(|c| c.documents.len())
            .unwrap_or_default()
    }

    /// Number of documents a search would see, as of the last refresh.
    pub async fn visible_count(&self, collection: &str) -> usize {
        let collections = self.collections.read().await;
        collections
            .get(collection)
            .map(|c| c.visible)
            .unwrap_or_default()
    }

    pub async fn mapping(&self, collection: &str) -> Option<Value> {
        let collections = self.collections.read().await;
        collections.get(collection).map(|c| c.mapping.clone())
    }

    fn take_fault(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl BulkSink for InMemorySink {
    async fn ping(&self) -> Result<()> {
        if self.unreachable.load(Ordering::Relaxed) {
            return Err(SinkError::Unavailable {
                message: "in-memory sink marked unreachable".to_string(),
            });
        }

        Ok(())
    }

    async fn create_collection(&self, name: &str, mapping: &Value) -> Result<CollectionStatus> {
        let mut collections = self.collections.write().await;

        if collections.contains_key(name) {
            return Ok(CollectionStatus::AlreadyExists);
        }

        collections.insert(
            name.to_string(),
            Collection {
                mapping: mapping.clone(),
                ..Default::default()
            },
        );

        Ok(CollectionStatus::Created)
    }

    async fn bulk_write(
        &self,
        collection: &str,
        documents: Vec<BulkDocument>,
    ) -> Result<Vec<BulkItemResult>> {
        self.bulk_requests.fetch_add(1, Ordering::Relaxed);
        self.write_attempts
            .fetch_add(documents.len() as u64, Ordering::Relaxed);

        if Self::take_fault(&self.overloaded_requests) {
            return Err(SinkError::Overloaded {
                message: "too many requests".to_string(),
            });
        }

        let mut collections = self.collections.write().await;
        // Like an index with dynamic mapping, writing creates the collection.
        let target = collections.entry(collection.to_string()).or_default();

        let results = documents
            .into_iter()
            .map(|document| {
                if Self::take_fault(&self.rejected_items) {
                    return Err(BulkItemFailure::overloaded("rejected execution"));
                }

                match serde_json::from_slice::<Value>(&document.body) {
                    Ok(value) => {
                        target.documents.insert(document.id, value);
                        Ok(())
                    }
                    Err(err) => Err(BulkItemFailure {
                        status: 400,
                        error_type: "mapper_parsing_exception".to_string(),
                        reason: err.to_string(),
                    }),
                }
            })
            .collect();

        Ok(results)
    }

    async fn refresh(&self, collection: &str) -> Result<()> {
        if self.fail_refresh.load(Ordering::Relaxed) {
            return Err(SinkError::Unavailable {
                message: "refresh failed".to_string(),
            });
        }

        let mut collections = self.collections.write().await;
        let Some(target) = collections.get_mut(collection) else {
            return Err(SinkError::Rejected {
                status: 404,
                message: format!("no such index [{collection}]"),
            });
        };

        target.visible = target.documents.len();

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn document(id: &str, value: u64) -> BulkDocument {
        BulkDocument::new(id, serde_json::to_vec(&json!({ "value": value })).unwrap())
    }

    #[tokio::test]
    async fn test_create_collection_is_idempotent() {
        let sink = InMemorySink::new();
        let mapping = json!({ "mappings": {} });

        let first = sink.create_collection("test", &mapping).await.unwrap();
        let second = sink.create_collection("test", &mapping).await.unwrap();

        assert_eq!(first, CollectionStatus::Created);
        assert_eq!(second, CollectionStatus::AlreadyExists);
        assert_eq!(sink.mapping("test").await, Some(mapping));
    }

    #[tokio::test]
    async fn test_bulk_write_upserts_by_id() {
        let sink = InMemorySink::new();

        let results = sink
            .bulk_write("test", vec![document("a", 1), document("b", 2)])
            .await
            .unwrap();
        assert!(results.iter().all(|r| r.is_ok()));

        sink.bulk_write("test", vec![document("a", 3)])
            .await
            .unwrap();

        assert_eq!(sink.count("test").await, 2);
        assert_eq!(sink.write_attempts(), 3);
        assert_eq!(
            sink.document("test", "a").await,
            Some(json!({ "value": 3 }))
        );
    }

    #[tokio::test]
    async fn test_refresh_updates_visibility() {
        let sink = InMemorySink::new();
        sink.bulk_write("test", vec![document("a", 1)])
            .await
            .unwrap();
        assert_eq!(sink.visible_count("test").await, 0);

        sink.refresh("test").await.unwrap();
        assert_eq!(sink.visible_count("test").await, 1);

        assert!(sink.refresh("missing").await.is_err());
    }

    #[tokio::test]
    async fn test_injected_faults() {
        let sink = InMemorySink::new()
            .with_overloaded_requests(1)
            .with_rejected_items(1);

        let err = sink
            .bulk_write("test", vec![document("a", 1)])
            .await
            .unwrap_err();
        assert!(err.is_overloaded());

        let results = sink
            .bulk_write("test", vec![document("a", 1), document("b", 2)])
            .await
            .unwrap();
        assert!(results[0].as_ref().unwrap_err().is_overloaded());
        assert!(results[1].is_ok());
        assert_eq!(sink.count("test").await, 1);
        assert_eq!(sink.bulk_requests(), 2);
    }

    #[tokio::test]
    async fn test_unparseable_document_is_rejected() {
        let sink = InMemorySink::new();
        let results = sink
            .bulk_write("test", vec![BulkDocument::new("a", "not json")])
            .await
            .unwrap();

        let failure = results[0].as_ref().unwrap_err();
        assert_eq!(failure.status, 400);
        assert!(!failure.is_overloaded());
    }
}
