//! Bounded exponential-backoff retry loop.
use std::{future::Future, time::Duration};

use snafu::Snafu;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    error::{ItemError, SubmitError},
    error_kind::ErrorKind,
    sink::SinkError,
};

/// Which failures the retry loop tries again.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RetryMode {
    /// Retry every failure until the attempts are exhausted.
    #[default]
    AnyError,
    /// Retry only failures classified as temporary, give up on anything else.
    TransientOnly,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub max_attempts: u32,
    /// Wait after the first failed attempt. Doubles after each failure.
    pub base_backoff: Duration,
    pub mode: RetryMode,
}

/// Errors that can tell the retry loop whether they are worth retrying.
pub trait Classify {
    fn kind(&self) -> ErrorKind;
}

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum RetryError<E>
where
    E: std::error::Error + 'static,
{
    #[snafu(display("giving up after {attempts} attempts"))]
    Exhausted { attempts: u32, source: E },
    #[snafu(display("permanent failure on attempt {attempts}"))]
    Permanent { attempts: u32, source: E },
    #[snafu(display("cancelled after {attempts} attempts"))]
    Cancelled { attempts: u32 },
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_backoff: Duration::from_millis(100),
            mode: RetryMode::AnyError,
        }
    }
}

impl RetryPolicy {
    /// Change the maximum number of attempts. Values below one are raised to one.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Change the wait after the first failed attempt.
    pub fn with_base_backoff(mut self, base_backoff: Duration) -> Self {
        self.base_backoff = base_backoff;
        self
    }

    pub fn with_mode(mut self, mode: RetryMode) -> Self {
        self.mode = mode;
        self
    }

    /// Wait after the failed attempt number `attempt`, starting at zero.
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_backoff
            .saturating_mul(2u32.saturating_pow(attempt))
    }

    pub fn should_retry(&self, kind: ErrorKind) -> bool {
        match self.mode {
            RetryMode::AnyError => true,
            RetryMode::TransientOnly => kind.is_retryable(),
        }
    }
}

/// Runs `operation` until it succeeds, the policy gives up, or `ct` is cancelled.
///
/// The first attempt always runs; cancellation interrupts the wait before the
/// next one. The operation receives the zero-based attempt number.
pub async fn retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    ct: &CancellationToken,
    mut operation: F,
) -> Result<T, RetryError<E>>
where
    E: std::error::Error + Classify + 'static,
    F: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        let error = match operation(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) => error,
        };

        let attempts = attempt + 1;

        if !policy.should_retry(error.kind()) {
            return Err(RetryError::Permanent {
                attempts,
                source: error,
            });
        }

        if attempts >= max_attempts {
            return Err(RetryError::Exhausted {
                attempts,
                source: error,
            });
        }

        let backoff = policy.backoff(attempt);
        debug!(attempt = attempts, ?backoff, error = %error, "retrying");

        tokio::select! {
            _ = ct.cancelled() => {
                return Err(RetryError::Cancelled { attempts });
            }
            _ = tokio::time::sleep(backoff) => {}
        }

        attempt = attempts;
    }
}

impl<E> RetryError<E>
where
    E: std::error::Error + 'static,
{
    pub fn attempts(&self) -> u32 {
        match self {
            RetryError::Exhausted { attempts, .. }
            | RetryError::Permanent { attempts, .. }
            | RetryError::Cancelled { attempts } => *attempts,
        }
    }

    /// The last error returned by the operation, if it ran at all.
    pub fn last_error(&self) -> Option<&E> {
        match self {
            RetryError::Exhausted { source, .. } | RetryError::Permanent { source, .. } => {
                Some(source)
            }
            RetryError::Cancelled { .. } => None,
        }
    }
}

impl Classify for SubmitError {
    fn kind(&self) -> ErrorKind {
        SubmitError::kind(self)
    }
}

impl Classify for ItemError {
    fn kind(&self) -> ErrorKind {
        ItemError::kind(self)
    }
}

impl Classify for SinkError {
    fn kind(&self) -> ErrorKind {
        SinkError::kind(self)
    }
}
