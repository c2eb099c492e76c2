//! Drives a seeding run from connection to final report.
use std::{fmt, sync::Arc, time::Instant};

use snafu::ResultExt;
use tokio::{sync::mpsc, task::JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    batcher::{
        AccumulatorOptions, BulkAccumulator, BulkAccumulatorClient, BulkItem,
        run_background_accumulator,
    },
    error::{
        AccumulatorSnafu, ConnectSnafu, CreateCollectionSnafu, ItemError, RecordError, Result,
        SerializationSnafu,
    },
    generator::RecordGenerator,
    limiter::ConcurrencyLimiter,
    metrics::{DEFAULT_PROGRESS_INTERVAL, ProgressMetrics, RunReport},
    receivable::index_mapping,
    retry::{RetryError, RetryPolicy, retry},
    sink::{BulkDocument, BulkSink, CollectionStatus},
};

pub const DEFAULT_COLLECTION: &str = "ciclo_vida_recebivel";
pub const DEFAULT_TOTAL_RECORDS: u64 = 10_000_000;
pub const DEFAULT_CONCURRENCY: usize = 50;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOptions {
    /// The collection records are written to.
    pub collection: String,
    /// The number of records to generate.
    pub total_records: u64,
    /// The maximum number of records generated and submitted at once.
    pub concurrency: usize,
    /// Number of successes between two progress lines.
    pub progress_interval: u64,
    pub accumulator: AccumulatorOptions,
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Connecting,
    Verifying,
    Generating,
    Draining,
    Reporting,
    Done,
}

/// The outcome of one record, published on the outcome channel if any.
#[derive(Debug, Clone)]
pub struct RecordOutcome {
    pub id: String,
    pub index: u64,
    pub result: std::result::Result<(), RecordError>,
}

pub struct Orchestrator {
    sink: Arc<dyn BulkSink>,
    generator: RecordGenerator,
    options: RunOptions,
    outcomes: Option<mpsc::UnboundedSender<RecordOutcome>>,
}

/// Everything a record task needs, shared by all of them.
struct RecordContext {
    generator: RecordGenerator,
    client: BulkAccumulatorClient,
    retry: RetryPolicy,
    total: u64,
    metrics: Arc<ProgressMetrics>,
    outcomes: Option<mpsc::UnboundedSender<RecordOutcome>>,
    /// Interrupts submission backoffs. Only cancelled once every record task
    /// has finished, or when the run itself is dropped.
    submit_ct: CancellationToken,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            collection: DEFAULT_COLLECTION.to_string(),
            total_records: DEFAULT_TOTAL_RECORDS,
            concurrency: DEFAULT_CONCURRENCY,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            accumulator: AccumulatorOptions::default(),
            retry: RetryPolicy::default(),
        }
    }
}

impl RunOptions {
    /// Change the collection records are written to.
    pub fn with_collection(mut self, collection: impl Into<String>) -> Self {
        self.collection = collection.into();
        self
    }

    /// Change the number of records to generate.
    pub fn with_total_records(mut self, total_records: u64) -> Self {
        self.total_records = total_records;
        self
    }

    /// Change the concurrency cap. Zero is raised to one.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_progress_interval(mut self, progress_interval: u64) -> Self {
        self.progress_interval = progress_interval;
        self
    }

    pub fn with_accumulator(mut self, accumulator: AccumulatorOptions) -> Self {
        self.accumulator = accumulator;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

impl Orchestrator {
    pub fn new(sink: Arc<dyn BulkSink>, generator: RecordGenerator, options: RunOptions) -> Self {
        Self {
            sink,
            generator,
            options,
            outcomes: None,
        }
    }

    /// Publish the outcome of every record on `outcomes`.
    pub fn with_outcomes(mut self, outcomes: mpsc::UnboundedSender<RecordOutcome>) -> Self {
        self.outcomes = Some(outcomes);
        self
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    /// Runs the pipeline to completion.
    ///
    /// Cancelling `ct` stops spawning new records; records already started are
    /// submitted and the accumulator is drained before the report is built.
    /// Only setup failures are returned as errors, per-record failures are
    /// counted in the report.
    pub async fn run(self, ct: CancellationToken) -> Result<RunReport> {
        let Self {
            sink,
            generator,
            options,
            outcomes,
        } = self;

        let started = Instant::now();
        let collection = options.collection.as_str();

        enter(RunPhase::Connecting);
        sink.ping().await.context(ConnectSnafu {})?;

        enter(RunPhase::Verifying);
        let status = sink
            .create_collection(collection, &index_mapping())
            .await
            .context(CreateCollectionSnafu { collection })?;
        match status {
            CollectionStatus::Created => info!(collection, "collection created"),
            CollectionStatus::AlreadyExists => info!(collection, "collection already exists"),
        }

        enter(RunPhase::Generating);
        let accumulator =
            BulkAccumulator::new(sink.clone(), collection, options.accumulator.clone());
        let batch_stats = accumulator.stats();
        // Not tied to `ct`: records already started must still reach the sink,
        // including those waiting out a submission backoff.
        let accumulator_ct = CancellationToken::new();
        let _accumulator_guard = accumulator_ct.clone().drop_guard();

        let context = Arc::new(RecordContext {
            generator,
            client: accumulator.client(),
            retry: options.retry.clone(),
            total: options.total_records,
            metrics: Arc::new(
                ProgressMetrics::new(collection)
                    .with_progress_interval(options.progress_interval)
                    .with_target(options.total_records),
            ),
            outcomes,
            submit_ct: accumulator_ct.clone(),
        });

        let accumulator_task =
            tokio::spawn(run_background_accumulator(accumulator, accumulator_ct.clone()));

        let limiter = ConcurrencyLimiter::new(options.concurrency);
        let mut tasks = JoinSet::new();
        let mut spawned = 0;

        info!(
            total = options.total_records,
            concurrency = limiter.capacity(),
            customers = context.generator.customers().len(),
            "generating records"
        );

        for index in 0..options.total_records {
            let Some(slot) = limiter.acquire(&ct).await else {
                warn!(spawned, "run cancelled, no new records will be generated");
                break;
            };

            let task_context = context.clone();
            tasks.spawn(async move {
                let _slot = slot;
                task_context.process(index).await;
            });
            spawned += 1;

            while let Some(joined) = tasks.try_join_next() {
                reap(joined, &context);
            }
        }

        enter(RunPhase::Draining);
        while let Some(joined) = tasks.join_next().await {
            reap(joined, &context);
        }

        // Every record is queued by now, close the accumulator and wait for
        // the last batches.
        let metrics = context.metrics.clone();
        drop(context);
        accumulator_ct.cancel();
        accumulator_task.await.map_err(|err| {
            AccumulatorSnafu {
                message: err.to_string(),
            }
            .build()
        })?;

        enter(RunPhase::Reporting);
        let report = metrics.report(
            spawned,
            started.elapsed(),
            limiter.high_watermark(),
            batch_stats.snapshot(),
        );
        info!(
            total = report.total,
            succeeded = report.succeeded,
            failed = report.failed,
            elapsed = ?report.elapsed,
            rate = report.rate(),
            "run finished"
        );

        enter(RunPhase::Done);
        if let Err(err) = sink.refresh(collection).await {
            warn!(collection, error = %err, "failed to refresh collection");
        }

        Ok(report)
    }
}

impl RecordContext {
    async fn process(&self, index: u64) {
        let record = self.generator.generate(index, self.total);
        let id = record.id.clone();

        let body = match serde_json::to_vec(&record).context(SerializationSnafu {}) {
            Ok(body) => body,
            Err(source) => {
                return self.fail(id, index, RecordError::Submit {
                    attempts: 0,
                    source,
                });
            }
        };

        let document = BulkDocument::new(id.clone(), body);

        let submitted = retry(&self.retry, &self.submit_ct, |_attempt| {
            let item = BulkItem::new(document.clone(), self.on_complete(id.clone(), index));
            self.client.add(item)
        })
        .await;

        if let Err(err) = submitted {
            let error = match err {
                RetryError::Exhausted { attempts, source }
                | RetryError::Permanent { attempts, source } => {
                    RecordError::Submit { attempts, source }
                }
                RetryError::Cancelled { attempts } => RecordError::Cancelled { attempts },
            };
            self.fail(id, index, error);
        }
    }

    /// Builds the callback reporting the record once its batch is written.
    fn on_complete(
        &self,
        id: String,
        index: u64,
    ) -> impl FnOnce(std::result::Result<(), ItemError>) + Send + 'static {
        let metrics = self.metrics.clone();
        let outcomes = self.outcomes.clone();

        move |result| {
            let result = match result {
                Ok(()) => {
                    metrics.record_success();
                    Ok(())
                }
                Err(source) => {
                    metrics.record_failure();
                    warn!(id = %id, index, error = %source, "failed to index record");
                    Err(RecordError::Index { source })
                }
            };

            publish(outcomes.as_ref(), RecordOutcome { id, index, result });
        }
    }

    fn fail(&self, id: String, index: u64, error: RecordError) {
        self.metrics.record_failure();
        warn!(id = %id, index, error = %error, "failed to submit record");
        publish(
            self.outcomes.as_ref(),
            RecordOutcome {
                id,
                index,
                result: Err(error),
            },
        );
    }
}

fn publish(outcomes: Option<&mpsc::UnboundedSender<RecordOutcome>>, outcome: RecordOutcome) {
    if let Some(outcomes) = outcomes {
        // The receiver going away only means nobody listens anymore.
        let _ = outcomes.send(outcome);
    }
}

/// Accounts for a record task that did not run to completion.
fn reap(joined: std::result::Result<(), tokio::task::JoinError>, context: &RecordContext) {
    if let Err(err) = joined {
        error!(error = %err, "record task failed");
        context.metrics.record_failure();
    }
}

fn enter(phase: RunPhase) {
    debug!(%phase, "entering phase");
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunPhase::Connecting => "connecting",
            RunPhase::Verifying => "verifying",
            RunPhase::Generating => "generating",
            RunPhase::Draining => "draining",
            RunPhase::Reporting => "reporting",
            RunPhase::Done => "done",
        };
        write!(f, "{name}")
    }
}
