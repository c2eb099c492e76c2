use std::fmt;

/// How an error should be handled: retried, reported to the user, or treated
/// as a bug.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    /// The run is misconfigured, e.g. no customers or bad credentials.
    Configuration,
    /// The sink refused the document and will refuse it again.
    Validation,
    /// A document or index with the same key already exists.
    Conflict,
    /// The sink is overloaded or unreachable, a later attempt may succeed.
    Temporary,
    Internal,
}

impl ErrorKind {
    /// Classifies a failed HTTP status returned by the sink.
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => Self::Configuration,
            408 | 429 | 500..=599 => Self::Temporary,
            409 => Self::Conflict,
            400..=499 => Self::Validation,
            _ => Self::Internal,
        }
    }

    pub fn is_retryable(self) -> bool {
        matches!(self, Self::Temporary)
    }

    /// Process exit code, from `sysexits.h`.
    pub fn exit_code(self) -> u8 {
        match self {
            Self::Configuration => 78,
            Self::Validation => 65,
            Self::Temporary => 75,
            Self::Conflict | Self::Internal => 70,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Configuration => "configuration",
            Self::Validation => "validation",
            Self::Conflict => "conflict",
            Self::Temporary => "temporary",
            Self::Internal => "internal",
        };
        f.write_str(name)
    }
}
