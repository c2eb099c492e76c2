use seeder_core::{ErrorKind, SeedError};
use seeder_elastic::ElasticError;
use seeder_observability::ObservabilityError;
use snafu::Snafu;

use crate::helpers::RangeParserError;

/// CLI error types.
#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum CliError {
    #[snafu(display("Invalid customer range"))]
    InvalidRange { source: RangeParserError },
    #[snafu(display("Invalid argument {name}: {message}"))]
    InvalidArgument { name: &'static str, message: String },
    #[snafu(display("Failed to configure Elasticsearch client"))]
    Elastic { source: ElasticError },
    #[snafu(display("Failed to set up observability"))]
    Observability { source: ObservabilityError },
    #[snafu(display("Seeding failed"))]
    Seed { source: SeedError },
    #[snafu(display("Failed to serialize record"))]
    Serialize { source: serde_json::Error },
    #[snafu(display("{failed} of {total} records failed"))]
    Incomplete { failed: u64, total: u64 },
}

pub type Result<T, E = CliError> = std::result::Result<T, E>;

impl CliError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidRange { .. } | Self::InvalidArgument { .. } | Self::Elastic { .. } => {
                ErrorKind::Configuration
            }
            Self::Seed { source } => source.kind(),
            Self::Incomplete { .. } => ErrorKind::Temporary,
            Self::Observability { .. } | Self::Serialize { .. } => ErrorKind::Internal,
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.kind().exit_code()
    }
}
