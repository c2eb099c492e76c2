#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use bytesize::ByteSize;
use seeder_core::{
    AccumulatorOptions, InMemorySink, Receivable, RecordGenerator, RecordOutcome, Result,
    RetryPolicy, RunOptions, RunReport, default_customers, pipeline::Orchestrator,
};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

pub const COLLECTION: &str = "test_receivables";

pub fn test_options(total: u64, concurrency: usize) -> RunOptions {
    RunOptions::default()
        .with_collection(COLLECTION)
        .with_total_records(total)
        .with_concurrency(concurrency)
        .with_accumulator(
            AccumulatorOptions::default()
                .with_flush_size(ByteSize::kb(8))
                .with_flush_interval(Duration::from_millis(50))
                .with_overload_retry(Duration::from_millis(5), 2),
        )
        .with_retry(RetryPolicy::default().with_base_backoff(Duration::from_millis(1)))
}

pub fn test_generator() -> RecordGenerator {
    RecordGenerator::new(default_customers()).expect("generator")
}

/// Runs the pipeline and collects every record outcome.
pub async fn run_collecting(
    sink: Arc<InMemorySink>,
    generator: RecordGenerator,
    options: RunOptions,
    ct: CancellationToken,
) -> (Result<RunReport>, Vec<RecordOutcome>) {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let orchestrator = Orchestrator::new(sink, generator, options).with_outcomes(tx);

    let report = orchestrator.run(ct).await;

    let mut outcomes = Vec::new();
    while let Some(outcome) = rx.recv().await {
        outcomes.push(outcome);
    }
    outcomes.sort_by_key(|o| o.index);

    (report, outcomes)
}

pub async fn stored_receivable(sink: &InMemorySink, id: &str) -> Receivable {
    let document = sink
        .document(COLLECTION, id)
        .await
        .unwrap_or_else(|| panic!("document {id} not found"));
    serde_json::from_value(document).expect("stored document is a receivable")
}
