use crate::{error::ItemError, sink::BulkDocument};

/// Callback invoked once the batch holding the item has been written.
pub type ItemCallback = Box<dyn FnOnce(Result<(), ItemError>) + Send + 'static>;

/// A document waiting to be written, with the callback reporting its outcome.
pub struct BulkItem {
    pub document: BulkDocument,
    pub on_complete: ItemCallback,
}

impl BulkItem {
    pub fn new(
        document: BulkDocument,
        on_complete: impl FnOnce(Result<(), ItemError>) + Send + 'static,
    ) -> Self {
        Self {
            document,
            on_complete: Box::new(on_complete),
        }
    }

    /// An item nobody waits on.
    pub fn detached(document: BulkDocument) -> Self {
        Self::new(document, |_| {})
    }
}

impl std::fmt::Debug for BulkItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BulkItem")
            .field("id", &self.document.id)
            .field("size", &self.document.size())
            .finish_non_exhaustive()
    }
}

/// Items buffered for the next bulk request.
#[derive(Default)]
pub struct PendingBatch {
    documents: Vec<BulkDocument>,
    callbacks: Vec<ItemCallback>,
    size: usize,
}

impl std::fmt::Debug for PendingBatch {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PendingBatch")
            .field("documents", &self.documents.len())
            .field("size", &self.size)
            .finish_non_exhaustive()
    }
}

impl PendingBatch {
    pub fn push(&mut self, item: BulkItem) {
        self.size += item.document.size();
        self.documents.push(item.document);
        self.callbacks.push(item.on_complete);
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Takes the buffered items, leaving the batch empty.
    pub fn take(&mut self) -> Self {
        std::mem::take(self)
    }

    pub fn into_parts(self) -> (Vec<BulkDocument>, Vec<ItemCallback>) {
        (self.documents, self.callbacks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pending_batch_tracks_size() {
        let mut batch = PendingBatch::default();
        batch.push(BulkItem::detached(BulkDocument::new("a", "{}")));
        batch.push(BulkItem::detached(BulkDocument::new("bb", "{\"x\":1}")));

        assert_eq!(batch.len(), 2);
        assert_eq!(batch.size(), 3 + 9);

        assert_eq!(
            format!("{batch:?}"),
            "PendingBatch { documents: 2, size: 12, .. }"
        );

        let taken = batch.take();
        assert!(batch.is_empty());
        assert_eq!(batch.size(), 0);

        let (documents, callbacks) = taken.into_parts();
        assert_eq!(documents[1].id, "bb");
        assert_eq!(callbacks.len(), 2);
    }
}
