pub mod batcher;
pub mod dates;
pub mod distribution;
pub mod error;
pub mod error_kind;
pub mod generator;
pub mod limiter;
pub mod metrics;
pub mod pipeline;
pub mod receivable;
pub mod retry;
pub mod sink;

pub use batcher::{
    AccumulatorOptions, BulkAccumulator, BulkAccumulatorClient, BulkItem, BulkStatsSnapshot,
    run_background_accumulator,
};
pub use error::{RecordError, Result, SeedError};
pub use error_kind::ErrorKind;
pub use generator::{RecordGenerator, SeedSource, customer_range, default_customers};
pub use metrics::RunReport;
pub use pipeline::{Orchestrator, RecordOutcome, RunOptions, RunPhase};
pub use receivable::{Cancellation, Negotiation, Receivable};
pub use retry::{RetryMode, RetryPolicy};
pub use sink::{BulkSink, InMemorySink};
