//! Buffers documents and writes them to the sink in bulk requests.
//!
//! A batch is flushed when its size crosses the flush threshold or when the
//! flush interval elapses, whichever comes first. Up to `workers` bulk
//! requests are in flight at the same time; while they are all busy the
//! accumulator stops reading its queue, so a slow sink pushes back on the
//! submitters.
use std::{
    fmt,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use bytesize::ByteSize;
use futures::{StreamExt, stream::FuturesUnordered};
use seeder_observability::KeyValue;
use tokio::{
    sync::mpsc,
    time::{Instant, sleep_until},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    error::{ItemError, QueueFullSnafu, SubmitError},
    sink::{BulkItemResult, BulkSink, SinkError},
};

use self::metrics::BulkMetrics;

pub use self::pending::{BulkItem, ItemCallback, PendingBatch};

mod metrics;
mod pending;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccumulatorOptions {
    /// The buffered size at which a bulk request is sent.
    pub flush_size: ByteSize,
    /// The maximum time a document waits in the buffer.
    pub flush_interval: Duration,
    /// The maximum number of bulk requests in flight.
    pub workers: usize,
    /// The number of submissions the queue holds before submitters wait.
    pub queue_capacity: usize,
    /// If set, a submission waiting longer than this for queue space fails.
    pub enqueue_timeout: Option<Duration>,
    /// The pause before resending a request the sink rejected as overloaded.
    pub overload_pause: Duration,
    /// How many times an overloaded request is resent.
    pub overload_retries: u32,
}

pub struct BulkAccumulator {
    tx: mpsc::Sender<BulkItem>,
    rx: mpsc::Receiver<BulkItem>,
    sink: Arc<dyn BulkSink>,
    collection: Arc<str>,
    options: AccumulatorOptions,
    stats: Arc<BulkStats>,
}

#[derive(Clone)]
pub struct BulkAccumulatorClient {
    tx: mpsc::Sender<BulkItem>,
    enqueue_timeout: Option<Duration>,
    stats: Arc<BulkStats>,
}

/// Batch-level counters, shared between the accumulator and its clients.
#[derive(Debug, Default)]
pub struct BulkStats {
    added: AtomicU64,
    flushed: AtomicU64,
    indexed: AtomicU64,
    failed: AtomicU64,
    requests: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BulkStatsSnapshot {
    /// Items accepted into the queue.
    pub added: u64,
    /// Batches flushed, whatever their outcome.
    pub flushed: u64,
    /// Items the sink acknowledged.
    pub indexed: u64,
    /// Items that failed.
    pub failed: u64,
    /// Bulk requests sent, resends included.
    pub requests: u64,
}

/// Runs the accumulator until every client is dropped or `ct` is cancelled.
///
/// Either way, buffered documents are flushed and in-flight requests are
/// awaited before returning.
pub async fn run_background_accumulator(accumulator: BulkAccumulator, ct: CancellationToken) {
    accumulator.run(ct).await
}

impl Default for AccumulatorOptions {
    fn default() -> Self {
        Self {
            flush_size: ByteSize::mb(2),
            flush_interval: Duration::from_secs(10),
            workers: 4,
            queue_capacity: 1024,
            enqueue_timeout: None,
            overload_pause: Duration::from_secs(2),
            overload_retries: 2,
        }
    }
}

impl AccumulatorOptions {
    /// Change the size at which a bulk request is sent.
    pub fn with_flush_size(mut self, flush_size: ByteSize) -> Self {
        self.flush_size = flush_size;
        self
    }

    /// Change the maximum time a document waits in the buffer.
    pub fn with_flush_interval(mut self, flush_interval: Duration) -> Self {
        self.flush_interval = flush_interval;
        self
    }

    /// Change the number of concurrent bulk requests. Zero is raised to one.
    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    /// Change the queue capacity. Zero is raised to one.
    pub fn with_queue_capacity(mut self, queue_capacity: usize) -> Self {
        self.queue_capacity = queue_capacity.max(1);
        self
    }

    pub fn with_enqueue_timeout(mut self, enqueue_timeout: Option<Duration>) -> Self {
        self.enqueue_timeout = enqueue_timeout;
        self
    }

    /// Change how overloaded bulk requests are resent.
    pub fn with_overload_retry(mut self, pause: Duration, retries: u32) -> Self {
        self.overload_pause = pause;
        self.overload_retries = retries;
        self
    }
}

impl BulkAccumulator {
    pub fn new(
        sink: Arc<dyn BulkSink>,
        collection: impl Into<Arc<str>>,
        options: AccumulatorOptions,
    ) -> Self {
        let (tx, rx) = mpsc::channel(options.queue_capacity.max(1));

        Self {
            tx,
            rx,
            sink,
            collection: collection.into(),
            options,
            stats: Arc::default(),
        }
    }

    pub fn client(&self) -> BulkAccumulatorClient {
        BulkAccumulatorClient {
            tx: self.tx.clone(),
            enqueue_timeout: self.options.enqueue_timeout,
            stats: self.stats.clone(),
        }
    }

    pub fn stats(&self) -> Arc<BulkStats> {
        self.stats.clone()
    }

    async fn run(self, ct: CancellationToken) {
        let Self {
            tx,
            mut rx,
            sink,
            collection,
            options,
            stats,
        } = self;

        // Only clients keep the queue open from now on.
        drop(tx);

        let flusher = Flusher {
            sink,
            collection,
            overload_pause: options.overload_pause,
            overload_retries: options.overload_retries,
            stats,
            metrics: Arc::new(BulkMetrics::default()),
        };

        let flush_size = options.flush_size.as_u64() as usize;
        let workers = options.workers.max(1);
        let mut pending = PendingBatch::default();
        let mut deadline = Instant::now() + options.flush_interval;
        let mut flush_tasks = FuturesUnordered::new();
        let mut closing = false;

        loop {
            let has_worker = flush_tasks.len() < workers;

            tokio::select! {
                _ = ct.cancelled(), if !closing => {
                    debug!("accumulator cancelled, draining queue");
                    // Reject new submissions but keep what is already queued.
                    rx.close();
                    closing = true;
                }
                _ = sleep_until(deadline), if has_worker => {
                    if !pending.is_empty() {
                        flush_tasks.push(flusher.clone().flush(pending.take()));
                    }
                    deadline = Instant::now() + options.flush_interval;
                }
                item = rx.recv(), if has_worker => {
                    let Some(item) = item else {
                        break;
                    };

                    pending.push(item);

                    if pending.size() >= flush_size {
                        flush_tasks.push(flusher.clone().flush(pending.take()));
                        deadline = Instant::now() + options.flush_interval;
                    }
                }
                _ = flush_tasks.next(), if !flush_tasks.is_empty() => {}
            }
        }

        if !pending.is_empty() {
            flush_tasks.push(flusher.clone().flush(pending.take()));
        }

        while flush_tasks.next().await.is_some() {}

        let stats = flusher.stats.snapshot();
        info!(
            batches = stats.flushed,
            indexed = stats.indexed,
            failed = stats.failed,
            requests = stats.requests,
            "accumulator closed"
        );
    }
}

impl BulkAccumulatorClient {
    /// Queues an item for the next bulk request.
    ///
    /// Waits while the queue is full. The item's callback runs once its
    /// batch has been written, and never runs if this returns an error.
    pub async fn add(&self, item: BulkItem) -> Result<(), SubmitError> {
        let permit = match self.enqueue_timeout {
            None => self.tx.reserve().await.map_err(|_| SubmitError::Closed)?,
            Some(timeout) => match tokio::time::timeout(timeout, self.tx.reserve()).await {
                Ok(permit) => permit.map_err(|_| SubmitError::Closed)?,
                Err(_) => return QueueFullSnafu { timeout }.fail(),
            },
        };

        permit.send(item);
        self.stats.added.fetch_add(1, Ordering::Relaxed);

        Ok(())
    }
}

#[derive(Clone)]
struct Flusher {
    sink: Arc<dyn BulkSink>,
    collection: Arc<str>,
    overload_pause: Duration,
    overload_retries: u32,
    stats: Arc<BulkStats>,
    metrics: Arc<BulkMetrics>,
}

impl Flusher {
    async fn flush(self, batch: PendingBatch) {
        let size = batch.size();
        let (documents, callbacks) = batch.into_parts();
        let count = documents.len();
        let attributes = [KeyValue::new("collection", self.collection.to_string())];

        debug!(documents = count, bytes = size, "flushing batch");

        let mut resends = 0;
        let response = loop {
            self.stats.requests.fetch_add(1, Ordering::Relaxed);
            self.metrics.requests.add(1, &attributes);
            self.metrics.request_bytes.add(size as u64, &attributes);

            match self
                .sink
                .bulk_write(&self.collection, documents.clone())
                .await
            {
                Err(error) if error.is_overloaded() && resends < self.overload_retries => {
                    self.metrics.overloaded.add(1, &attributes);
                    resends += 1;
                    warn!(
                        error = %error,
                        pause = ?self.overload_pause,
                        resend = resends,
                        "sink overloaded, pausing before resending bulk request"
                    );
                    tokio::time::sleep(self.overload_pause).await;
                }
                other => break other,
            }
        };

        self.stats.flushed.fetch_add(1, Ordering::Relaxed);

        let results = match response {
            Ok(results) if results.len() == count => results,
            Ok(results) => {
                let error = SinkError::InvalidResponse {
                    message: format!("expected {count} item results, got {}", results.len()),
                };
                return self.fail_all(callbacks, error);
            }
            Err(error) => return self.fail_all(callbacks, error),
        };

        for (result, callback) in results.into_iter().zip(callbacks) {
            self.complete(result, callback);
        }
    }

    fn complete(&self, result: BulkItemResult, callback: ItemCallback) {
        match result {
            Ok(()) => {
                self.stats.indexed.fetch_add(1, Ordering::Relaxed);
                callback(Ok(()));
            }
            Err(failure) => {
                self.stats.failed.fetch_add(1, Ordering::Relaxed);
                callback(Err(ItemError::Rejected {
                    kind: failure.kind(),
                    status: failure.status,
                    reason: format!("{}: {}", failure.error_type, failure.reason),
                }));
            }
        }
    }

    fn fail_all(&self, callbacks: Vec<ItemCallback>, error: SinkError) {
        warn!(error = %error, documents = callbacks.len(), "bulk request failed");

        self.stats
            .failed
            .fetch_add(callbacks.len() as u64, Ordering::Relaxed);

        for callback in callbacks {
            callback(Err(ItemError::Request {
                source: error.clone(),
            }));
        }
    }
}

impl BulkStats {
    pub fn snapshot(&self) -> BulkStatsSnapshot {
        BulkStatsSnapshot {
            added: self.added.load(Ordering::Relaxed),
            flushed: self.flushed.load(Ordering::Relaxed),
            indexed: self.indexed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            requests: self.requests.load(Ordering::Relaxed),
        }
    }
}

impl fmt::Display for BulkStatsSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "added={} flushed={} indexed={} failed={} requests={}",
            self.added, self.flushed, self.indexed, self.failed, self.requests
        )
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use tokio::sync::oneshot;

    use super::*;
    use crate::sink::{BulkDocument, InMemorySink};

    fn document(id: &str) -> BulkDocument {
        BulkDocument::new(id, format!("{{\"id\":\"{id}\"}}"))
    }

    fn tracked(id: &str) -> (BulkItem, oneshot::Receiver<Result<(), ItemError>>) {
        let (tx, rx) = oneshot::channel();
        let item = BulkItem::new(document(id), move |result| {
            let _ = tx.send(result);
        });
        (item, rx)
    }

    fn start(
        sink: Arc<InMemorySink>,
        options: AccumulatorOptions,
    ) -> (
        BulkAccumulatorClient,
        Arc<BulkStats>,
        tokio::task::JoinHandle<()>,
        CancellationToken,
    ) {
        let accumulator = BulkAccumulator::new(sink, "test", options);
        let client = accumulator.client();
        let stats = accumulator.stats();
        let ct = CancellationToken::new();
        let handle = tokio::spawn(run_background_accumulator(accumulator, ct.clone()));
        (client, stats, handle, ct)
    }

    #[tokio::test]
    async fn test_flush_on_size() {
        let sink = Arc::new(InMemorySink::new());
        let options = AccumulatorOptions::default()
            .with_flush_size(ByteSize::b(1))
            .with_flush_interval(Duration::from_secs(3600));
        let (client, stats, handle, _ct) = start(sink.clone(), options);

        let (item, rx) = tracked("a");
        client.add(item).await.unwrap();

        // Flushed right away, long before the interval.
        rx.await.unwrap().unwrap();
        assert_eq!(sink.count("test").await, 1);

        drop(client);
        handle.await.unwrap();
        assert_eq!(stats.snapshot().flushed, 1);
    }

    #[tokio::test]
    async fn test_flush_on_interval() {
        tokio::time::pause();
        let sink = Arc::new(InMemorySink::new());
        let options = AccumulatorOptions::default().with_flush_interval(Duration::from_secs(10));
        let (client, _stats, handle, _ct) = start(sink.clone(), options);

        let (item, mut rx) = tracked("a");
        client.add(item).await.unwrap();

        tokio::time::advance(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());

        // With time paused, awaiting the callback lets the flush timer fire.
        rx.await.unwrap().unwrap();
        assert_eq!(sink.count("test").await, 1);

        drop(client);
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_close_flushes_residual_items() {
        let sink = Arc::new(InMemorySink::new());
        let options = AccumulatorOptions::default().with_flush_interval(Duration::from_secs(3600));
        let (client, stats, handle, _ct) = start(sink.clone(), options);

        let mut receivers = Vec::new();
        for i in 0..10 {
            let (item, rx) = tracked(&format!("doc-{i}"));
            client.add(item).await.unwrap();
            receivers.push(rx);
        }

        drop(client);
        handle.await.unwrap();

        for rx in receivers {
            rx.await.unwrap().unwrap();
        }

        assert_eq!(sink.count("test").await, 10);
        let stats = stats.snapshot();
        assert_eq!(stats.added, 10);
        assert_eq!(stats.indexed, 10);
        assert_eq!(stats.flushed, 1);
    }

    #[tokio::test]
    async fn test_cancel_drains_queue() {
        let sink = Arc::new(InMemorySink::new());
        let options = AccumulatorOptions::default().with_flush_interval(Duration::from_secs(3600));
        let (client, stats, handle, ct) = start(sink.clone(), options);

        for i in 0..5 {
            client
                .add(BulkItem::detached(document(&format!("doc-{i}"))))
                .await
                .unwrap();
        }

        ct.cancel();
        handle.await.unwrap();

        assert_eq!(sink.count("test").await, 5);
        assert_eq!(stats.snapshot().indexed, 5);
        assert!(matches!(
            client.add(BulkItem::detached(document("late"))).await,
            Err(SubmitError::Closed)
        ));
    }

    #[tokio::test]
    async fn test_overloaded_request_is_resent_after_pause() {
        tokio::time::pause();
        let sink = Arc::new(InMemorySink::new().with_overloaded_requests(2));
        let options = AccumulatorOptions::default()
            .with_flush_size(ByteSize::b(1))
            .with_overload_retry(Duration::from_secs(2), 2);
        let (client, stats, handle, _ct) = start(sink.clone(), options);

        let started = Instant::now();
        let (item, rx) = tracked("a");
        client.add(item).await.unwrap();
        rx.await.unwrap().unwrap();

        assert!(started.elapsed() >= Duration::from_secs(4));
        assert_eq!(sink.bulk_requests(), 3);
        assert_eq!(sink.count("test").await, 1);

        drop(client);
        handle.await.unwrap();
        assert_eq!(stats.snapshot().requests, 3);
    }

    #[tokio::test]
    async fn test_persistent_overload_fails_batch() {
        tokio::time::pause();
        let sink = Arc::new(InMemorySink::new().with_overloaded_requests(10));
        let options = AccumulatorOptions::default()
            .with_flush_size(ByteSize::b(1))
            .with_overload_retry(Duration::from_secs(2), 2);
        let (client, stats, handle, _ct) = start(sink.clone(), options);

        let (item, rx) = tracked("a");
        client.add(item).await.unwrap();

        let err = rx.await.unwrap().unwrap_err();
        assert!(err.kind().is_retryable());
        assert!(matches!(err, ItemError::Request { .. }));

        drop(client);
        handle.await.unwrap();
        assert_eq!(stats.snapshot().failed, 1);
        assert_eq!(sink.bulk_requests(), 3);
    }

    #[tokio::test]
    async fn test_item_failures_reach_their_callback() {
        let sink = Arc::new(InMemorySink::new().with_rejected_items(1));
        let options = AccumulatorOptions::default().with_flush_interval(Duration::from_secs(3600));
        let (client, stats, handle, _ct) = start(sink.clone(), options);

        let (first, first_rx) = tracked("a");
        let (second, second_rx) = tracked("b");
        client.add(first).await.unwrap();
        client.add(second).await.unwrap();

        drop(client);
        handle.await.unwrap();

        let err = first_rx.await.unwrap().unwrap_err();
        assert!(matches!(err, ItemError::Rejected { status: 429, .. }));
        second_rx.await.unwrap().unwrap();

        let stats = stats.snapshot();
        assert_eq!(stats.indexed, 1);
        assert_eq!(stats.failed, 1);
    }

    #[tokio::test]
    async fn test_full_queue_times_out() {
        let sink = Arc::new(InMemorySink::new());
        let options = AccumulatorOptions::default()
            .with_queue_capacity(1)
            .with_enqueue_timeout(Some(Duration::from_millis(10)));

        // Never run, so the queue is never drained.
        let accumulator = BulkAccumulator::new(sink, "test", options);
        let client = accumulator.client();

        client
            .add(BulkItem::detached(document("a")))
            .await
            .unwrap();
        let err = client
            .add(BulkItem::detached(document("b")))
            .await
            .unwrap_err();

        assert!(matches!(err, SubmitError::QueueFull { .. }));
        assert!(err.kind().is_retryable());
    }

    #[tokio::test]
    async fn test_resubmitting_an_id_does_not_duplicate() {
        let sink = Arc::new(InMemorySink::new());
        let options = AccumulatorOptions::default().with_flush_size(ByteSize::b(1));
        let (client, _stats, handle, _ct) = start(sink.clone(), options);

        let outcomes = Arc::new(Mutex::new(Vec::new()));
        for _ in 0..3 {
            let outcomes = outcomes.clone();
            client
                .add(BulkItem::new(document("same"), move |result| {
                    outcomes.lock().unwrap().push(result.is_ok());
                }))
                .await
                .unwrap();
        }

        drop(client);
        handle.await.unwrap();

        assert_eq!(*outcomes.lock().unwrap(), vec![true, true, true]);
        assert_eq!(sink.write_attempts(), 3);
        assert_eq!(sink.count("test").await, 1);
    }
}
