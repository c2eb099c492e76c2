//! Per-record progress counters and the end-of-run report.
use std::{
    fmt,
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};

use seeder_observability::{Counter, KeyValue};
use tracing::info;

use crate::batcher::BulkStatsSnapshot;

/// Default number of successes between two progress lines.
pub const DEFAULT_PROGRESS_INTERVAL: u64 = 10_000;

/// Success and failure counters, each record counted exactly once.
pub struct ProgressMetrics {
    succeeded: AtomicU64,
    failed: AtomicU64,
    progress_interval: u64,
    /// Records the run means to generate, for progress percentages.
    target: u64,
    attributes: [KeyValue; 1],
    indexed_counter: Counter<u64>,
    failed_counter: Counter<u64>,
}

/// Indexed records against the run's target, shown as `done/target (pct%)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Progress {
    pub done: u64,
    pub target: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    /// Records the run attempted.
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub elapsed: Duration,
    /// Most records being generated or submitted at the same time.
    pub peak_concurrency: usize,
    pub batches: BulkStatsSnapshot,
}

impl ProgressMetrics {
    pub fn new(collection: &str) -> Self {
        let meter = seeder_observability::meter("seeder");
        Self {
            succeeded: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            target: 0,
            attributes: [KeyValue::new("collection", collection.to_string())],
            indexed_counter: meter
                .u64_counter("seeder.records.indexed")
                .with_unit("{record}")
                .with_description("records acknowledged by the sink")
                .build(),
            failed_counter: meter
                .u64_counter("seeder.records.failed")
                .with_unit("{record}")
                .with_description("records that could not be indexed")
                .build(),
        }
    }

    /// Change how many successes separate two progress lines. Zero disables them.
    pub fn with_progress_interval(mut self, progress_interval: u64) -> Self {
        self.progress_interval = progress_interval;
        self
    }

    pub fn with_target(mut self, target: u64) -> Self {
        self.target = target;
        self
    }

    pub fn record_success(&self) {
        let succeeded = self.succeeded.fetch_add(1, Ordering::Relaxed) + 1;
        self.indexed_counter.add(1, &self.attributes);

        if self.progress_interval > 0 && succeeded % self.progress_interval == 0 {
            let progress = Progress {
                done: succeeded,
                target: self.target,
            };
            info!(
                indexed = succeeded,
                target = self.target,
                failed = self.failed(),
                "indexing progress {progress}"
            );
        }
    }

    pub fn progress(&self) -> Progress {
        Progress {
            done: self.succeeded(),
            target: self.target,
        }
    }

    pub fn record_failure(&self) {
        self.failed.fetch_add(1, Ordering::Relaxed);
        self.failed_counter.add(1, &self.attributes);
    }

    pub fn succeeded(&self) -> u64 {
        self.succeeded.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn report(
        &self,
        total: u64,
        elapsed: Duration,
        peak_concurrency: usize,
        batches: BulkStatsSnapshot,
    ) -> RunReport {
        RunReport {
            total,
            succeeded: self.succeeded(),
            failed: self.failed(),
            elapsed,
            peak_concurrency,
            batches,
        }
    }
}

impl Progress {
    pub fn percent(&self) -> f64 {
        if self.target == 0 {
            return 0.0;
        }
        self.done as f64 / self.target as f64 * 100.0
    }
}

impl fmt::Display for Progress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{} ({:.2}%)", self.done, self.target, self.percent())
    }
}

impl RunReport {
    /// Records attempted per second of wall-clock time.
    pub fn rate(&self) -> f64 {
        let seconds = self.elapsed.as_secs_f64();
        if seconds > 0.0 {
            self.total as f64 / seconds
        } else {
            0.0
        }
    }

    /// Whether every attempted record has an outcome.
    pub fn is_complete(&self) -> bool {
        self.succeeded + self.failed == self.total
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "records:     {}", self.total)?;
        writeln!(f, "succeeded:   {}", self.succeeded)?;
        writeln!(f, "failed:      {}", self.failed)?;
        writeln!(f, "elapsed:     {:.2?}", self.elapsed)?;
        writeln!(f, "rate:        {:.0} records/s", self.rate())?;
        writeln!(f, "concurrency: {} peak", self.peak_concurrency)?;
        write!(f, "batches:     {}", self.batches)
    }
}
