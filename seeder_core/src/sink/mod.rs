//! The document store the pipeline writes into.

mod error;
mod memory;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

use crate::error_kind::ErrorKind;

pub use self::error::{Result, SinkError};
pub use self::memory::InMemorySink;

/// Item-level error type reported by Elasticsearch when a node sheds load.
pub const REJECTED_EXECUTION: &str = "es_rejected_execution_exception";

/// Bulk-write capable document store.
///
/// Writes are upserts keyed by document id, so replaying a document never
/// creates a duplicate.
#[async_trait]
pub trait BulkSink: Send + Sync {
    /// Check that the sink is reachable.
    async fn ping(&self) -> Result<()>;

    /// Create a collection with the given mapping.
    ///
    /// Returns [`CollectionStatus::AlreadyExists`] rather than an error if the
    /// collection is already there.
    async fn create_collection(&self, name: &str, mapping: &Value) -> Result<CollectionStatus>;

    /// Index the documents in one request.
    ///
    /// On success, returns one result per document in the same order as `documents`.
    async fn bulk_write(
        &self,
        collection: &str,
        documents: Vec<BulkDocument>,
    ) -> Result<Vec<BulkItemResult>>;

    /// Make every acknowledged write visible to searches.
    async fn refresh(&self, collection: &str) -> Result<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionStatus {
    Created,
    AlreadyExists,
}

/// A serialized document and its key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkDocument {
    pub id: String,
    pub body: Bytes,
}

pub type BulkItemResult = std::result::Result<(), BulkItemFailure>;

/// Failure of a single document inside an otherwise successful bulk request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BulkItemFailure {
    pub status: u16,
    pub error_type: String,
    pub reason: String,
}

impl BulkDocument {
    pub fn new(id: impl Into<String>, body: impl Into<Bytes>) -> Self {
        Self {
            id: id.into(),
            body: body.into(),
        }
    }

    /// Size of the document as counted against the flush threshold.
    pub fn size(&self) -> usize {
        self.body.len() + self.id.len()
    }
}

impl BulkItemFailure {
    pub fn overloaded(reason: impl Into<String>) -> Self {
        Self {
            status: 429,
            error_type: REJECTED_EXECUTION.to_string(),
            reason: reason.into(),
        }
    }

    pub fn is_overloaded(&self) -> bool {
        self.status == 429 || self.error_type == REJECTED_EXECUTION
    }

    pub fn kind(&self) -> ErrorKind {
        if self.is_overloaded() {
            ErrorKind::Temporary
        } else {
            ErrorKind::from_status(self.status)
        }
    }
}
