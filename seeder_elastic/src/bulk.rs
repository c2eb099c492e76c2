//! Bulk API request and response encoding.
use bytes::{BufMut, Bytes, BytesMut};
use seeder_core::sink::{BulkDocument, BulkItemFailure, BulkItemResult};
use serde::{Deserialize, Serialize};

/// Error object returned by Elasticsearch, both at request and item level.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ErrorCause {
    #[serde(rename = "type", default)]
    pub error_type: String,
    #[serde(default)]
    pub reason: String,
}

#[derive(Debug, Deserialize)]
pub struct ErrorResponse {
    pub error: ErrorCause,
}

#[derive(Debug, Deserialize)]
pub struct BulkResponse {
    pub items: Vec<BulkResponseItem>,
}

/// One entry of the `items` array, keyed by the action that produced it.
#[derive(Debug, Deserialize)]
pub struct BulkResponseItem {
    #[serde(alias = "create", alias = "update", alias = "delete")]
    pub index: ItemStatus,
}

#[derive(Debug, Deserialize)]
pub struct ItemStatus {
    pub status: u16,
    #[serde(default)]
    pub error: Option<ErrorCause>,
}

#[derive(Serialize)]
struct IndexAction<'a> {
    index: ActionMeta<'a>,
}

#[derive(Serialize)]
struct ActionMeta<'a> {
    #[serde(rename = "_index")]
    index: &'a str,
    #[serde(rename = "_id")]
    id: &'a str,
}

/// Encodes documents as an NDJSON bulk body of `index` actions.
pub fn encode_bulk_body(
    index: &str,
    documents: &[BulkDocument],
) -> Result<Bytes, serde_json::Error> {
    let capacity = documents.iter().map(|d| d.size() + index.len() + 40).sum();
    let mut body = BytesMut::with_capacity(capacity).writer();

    for document in documents {
        serde_json::to_writer(
            &mut body,
            &IndexAction {
                index: ActionMeta {
                    index,
                    id: &document.id,
                },
            },
        )?;
        let buf = body.get_mut();
        buf.put_u8(b'\n');
        buf.put_slice(&document.body);
        buf.put_u8(b'\n');
    }

    Ok(body.into_inner().freeze())
}

impl ItemStatus {
    pub fn into_result(self) -> BulkItemResult {
        match self.error {
            None if self.status < 300 => Ok(()),
            error => {
                let error = error.unwrap_or_default();
                Err(BulkItemFailure {
                    status: self.status,
                    error_type: error.error_type,
                    reason: error.reason,
                })
            }
        }
    }
}

impl BulkResponse {
    pub fn into_results(self) -> Vec<BulkItemResult> {
        self.items
            .into_iter()
            .map(|item| item.index.into_result())
            .collect()
    }
}
