use snafu::Snafu;

use crate::error_kind::ErrorKind;

#[derive(Debug, Clone, Snafu)]
#[snafu(visibility(pub))]
pub enum SinkError {
    #[snafu(display("sink unreachable: {message}"))]
    Unavailable { message: String },
    #[snafu(display("sink overloaded: {message}"))]
    Overloaded { message: String },
    #[snafu(display("request rejected with status {status}: {message}"))]
    Rejected { status: u16, message: String },
    #[snafu(display("invalid sink response: {message}"))]
    InvalidResponse { message: String },
    #[snafu(display("internal error: {message}"))]
    Internal { message: String },
}

pub type Result<T, E = SinkError> = ::std::result::Result<T, E>;

impl SinkError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SinkError::Unavailable { .. } | SinkError::Overloaded { .. } => ErrorKind::Temporary,
            SinkError::Rejected { status, .. } => ErrorKind::from_status(*status),
            SinkError::InvalidResponse { .. } | SinkError::Internal { .. } => ErrorKind::Internal,
        }
    }

    pub fn is_overloaded(&self) -> bool {
        matches!(self, SinkError::Overloaded { .. })
    }
}
