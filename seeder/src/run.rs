use std::{sync::Arc, time::Duration};

use bytesize::ByteSize;
use clap::{Args, ValueEnum};
use seeder_core::{
    AccumulatorOptions, BulkSink, InMemorySink, Orchestrator, RetryMode, RetryPolicy, RunOptions,
    pipeline::{DEFAULT_COLLECTION, DEFAULT_CONCURRENCY, DEFAULT_TOTAL_RECORDS},
};
use seeder_elastic::ElasticsearchSink;
use snafu::{ResultExt, ensure};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    error::{ElasticSnafu, IncompleteSnafu, InvalidArgumentSnafu, Result, SeedSnafu},
    generator_args::GeneratorArgs,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum SinkType {
    /// Index into an Elasticsearch cluster.
    Elasticsearch,
    /// Keep documents in memory and discard them at exit.
    Memory,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RetryModeArg {
    /// Retry every failed submission.
    AnyError,
    /// Retry only failures that may succeed on a later attempt.
    TransientOnly,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Where records are written.
    #[arg(long, value_enum, default_value = "elasticsearch")]
    pub sink: SinkType,
    /// Elasticsearch address.
    #[arg(long, default_value = "http://localhost:9200", env = "ELASTICSEARCH_URL")]
    pub es_url: String,
    /// Elasticsearch basic auth user.
    #[arg(long, env = "ELASTICSEARCH_USERNAME", requires = "es_password")]
    pub es_username: Option<String>,
    /// Elasticsearch basic auth password.
    #[arg(long, env = "ELASTICSEARCH_PASSWORD", hide_env_values = true)]
    pub es_password: Option<String>,
    /// Timeout of a single Elasticsearch request, in seconds.
    #[arg(long, default_value = "60")]
    pub es_timeout_secs: u64,
    /// The index records are written to.
    #[arg(long, default_value = DEFAULT_COLLECTION)]
    pub index: String,
    /// How many records to generate.
    #[arg(long, default_value_t = DEFAULT_TOTAL_RECORDS)]
    pub total: u64,
    /// How many records are generated and submitted at once.
    #[arg(long, default_value_t = DEFAULT_CONCURRENCY)]
    pub concurrency: usize,
    /// Flush a bulk request once its body reaches this size (e.g. 2MB).
    #[arg(long, default_value = "2MB")]
    pub flush_bytes: ByteSize,
    /// Flush a bulk request at least this often, in milliseconds.
    #[arg(long, default_value = "10000")]
    pub flush_interval_ms: u64,
    /// Number of bulk requests in flight at once.
    #[arg(long, default_value = "4")]
    pub workers: usize,
    /// Number of records buffered before submissions wait.
    #[arg(long, default_value = "1024")]
    pub queue_capacity: usize,
    /// Give up on a submission that waited this long for queue space, in
    /// milliseconds. Submissions wait indefinitely when missing.
    #[arg(long)]
    pub enqueue_timeout_ms: Option<u64>,
    /// Pause before resending a bulk request the sink rejected as overloaded,
    /// in milliseconds.
    #[arg(long, default_value = "2000")]
    pub overload_pause_ms: u64,
    /// How many times an overloaded bulk request is resent before its records
    /// fail.
    #[arg(long, default_value = "2")]
    pub overload_retries: u32,
    /// Maximum number of submission attempts per record.
    #[arg(long, default_value = "3")]
    pub max_attempts: u32,
    /// Backoff before the second attempt, doubled on each following one, in
    /// milliseconds.
    #[arg(long, default_value = "100")]
    pub base_backoff_ms: u64,
    /// Which submission failures are retried.
    #[arg(long, value_enum, default_value = "any-error")]
    pub retry_mode: RetryModeArg,
    /// Log a progress line every this many indexed records. 0 disables them.
    #[arg(long, default_value = "10000")]
    pub progress_every: u64,
    /// Exit with a non-zero code when any record failed.
    #[arg(long)]
    pub fail_on_error: bool,
    #[clap(flatten)]
    pub generator: GeneratorArgs,
}

impl RunArgs {
    pub async fn run(self, ct: CancellationToken) -> Result<()> {
        ensure!(
            self.total > 0,
            InvalidArgumentSnafu {
                name: "total",
                message: "must be greater than zero",
            }
        );

        let generator = self.generator.generator()?;
        let sink = self.sink()?;
        let options = self.run_options();

        info!(
            sink = ?self.sink,
            index = %options.collection,
            total = options.total_records,
            concurrency = options.concurrency,
            customers = generator.customers().len(),
            "starting seeder"
        );

        let report = Orchestrator::new(sink, generator, options)
            .run(ct)
            .await
            .context(SeedSnafu {})?;

        println!("{report}");

        if report.failed > 0 {
            warn!(failed = report.failed, "some records were not indexed");
            ensure!(
                !self.fail_on_error,
                IncompleteSnafu {
                    failed: report.failed,
                    total: report.total,
                }
            );
        }

        Ok(())
    }

    fn sink(&self) -> Result<Arc<dyn BulkSink>> {
        match self.sink {
            SinkType::Memory => Ok(Arc::new(InMemorySink::new())),
            SinkType::Elasticsearch => {
                let mut sink = ElasticsearchSink::with_timeout(
                    &self.es_url,
                    Duration::from_secs(self.es_timeout_secs),
                )
                .context(ElasticSnafu {})?;

                if let (Some(username), Some(password)) = (&self.es_username, &self.es_password) {
                    sink = sink.with_basic_auth(username, password);
                }

                Ok(Arc::new(sink))
            }
        }
    }

    fn run_options(&self) -> RunOptions {
        let accumulator = AccumulatorOptions::default()
            .with_flush_size(self.flush_bytes)
            .with_flush_interval(Duration::from_millis(self.flush_interval_ms))
            .with_workers(self.workers)
            .with_queue_capacity(self.queue_capacity)
            .with_enqueue_timeout(self.enqueue_timeout_ms.map(Duration::from_millis))
            .with_overload_retry(
                Duration::from_millis(self.overload_pause_ms),
                self.overload_retries,
            );

        let mode = match self.retry_mode {
            RetryModeArg::AnyError => RetryMode::AnyError,
            RetryModeArg::TransientOnly => RetryMode::TransientOnly,
        };
        let retry = RetryPolicy::default()
            .with_max_attempts(self.max_attempts)
            .with_base_backoff(Duration::from_millis(self.base_backoff_ms))
            .with_mode(mode);

        RunOptions::default()
            .with_collection(&self.index)
            .with_total_records(self.total)
            .with_concurrency(self.concurrency)
            .with_progress_interval(self.progress_every)
            .with_accumulator(accumulator)
            .with_retry(retry)
    }
}
