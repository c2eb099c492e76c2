use std::{sync::Arc, time::Duration};

use snafu::Snafu;

use crate::{error_kind::ErrorKind, sink::SinkError};

/// Errors that abort a seeding run before or while it starts.
///
/// Per-record errors never end up here, they are counted and logged instead.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum SeedError {
    #[snafu(display("invalid configuration: {message}"))]
    Configuration { message: String },
    #[snafu(display("failed to connect to the sink"))]
    Connect { source: SinkError },
    #[snafu(display("failed to create collection {collection}"))]
    CreateCollection {
        collection: String,
        source: SinkError,
    },
    #[snafu(display("bulk accumulator terminated unexpectedly: {message}"))]
    Accumulator { message: String },
}

/// Errors returned when handing a record to the bulk accumulator.
#[derive(Debug, Clone, Snafu)]
#[snafu(visibility(pub))]
pub enum SubmitError {
    #[snafu(display("failed to serialize record"))]
    Serialization {
        #[snafu(source(from(serde_json::Error, Arc::new)))]
        source: Arc<serde_json::Error>,
    },
    #[snafu(display("accumulator queue still full after {timeout:?}"))]
    QueueFull { timeout: Duration },
    #[snafu(display("accumulator is closed"))]
    Closed,
}

/// The reason a single item failed once its batch was written.
#[derive(Debug, Clone, Snafu)]
#[snafu(visibility(pub))]
pub enum ItemError {
    #[snafu(display("bulk request failed"))]
    Request { source: SinkError },
    #[snafu(display("item rejected with status {status}: {reason}"))]
    Rejected {
        status: u16,
        reason: String,
        kind: ErrorKind,
    },
}

/// Why a single record did not make it into the sink.
#[derive(Debug, Clone, Snafu)]
#[snafu(visibility(pub))]
pub enum RecordError {
    #[snafu(display("failed to submit record after {attempts} attempts"))]
    Submit { attempts: u32, source: SubmitError },
    #[snafu(display("submission cancelled after {attempts} attempts"))]
    Cancelled { attempts: u32 },
    #[snafu(display("failed to index record"))]
    Index { source: ItemError },
}

pub type Result<T, E = SeedError> = std::result::Result<T, E>;

impl SeedError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SeedError::Configuration { .. } => ErrorKind::Configuration,
            SeedError::Connect { source } => source.kind(),
            SeedError::CreateCollection { source, .. } => source.kind(),
            SeedError::Accumulator { .. } => ErrorKind::Internal,
        }
    }
}

impl SubmitError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SubmitError::Serialization { .. } => ErrorKind::Validation,
            SubmitError::QueueFull { .. } => ErrorKind::Temporary,
            SubmitError::Closed => ErrorKind::Internal,
        }
    }
}

impl RecordError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RecordError::Submit { source, .. } => source.kind(),
            RecordError::Cancelled { .. } => ErrorKind::Temporary,
            RecordError::Index { source } => source.kind(),
        }
    }
}

impl ItemError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ItemError::Request { source } => source.kind(),
            ItemError::Rejected { kind, .. } => *kind,
        }
    }
}
