//! Error types for fnpool-core.

use std::time::Duration;

use thiserror::Error;

/// Result type for fnpool-core operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in fnpool-core.
#[derive(Debug, Error)]
pub enum Error {
    /// Invoke was called without an absolute deadline.
    #[error("missing deadline: invocations require an absolute deadline")]
    MissingDeadline,

    /// Request or execution context could not be delivered to the backend.
    #[error("write failure: {0}")]
    Write(String),

    /// Backend reply was malformed, truncated, or absent.
    #[error("decode failure: {0}")]
    Decode(String),

    /// Backend did not reply before the deadline.
    #[error("execution timed out: backend did not reply before its deadline")]
    ExecutionTimeout,

    /// No pool worker became free within the configured wait.
    #[error("no invoker became available within {0:?}")]
    AvailabilityTimeout(Duration),

    /// A backend instance could not be constructed or started.
    #[error("failed to create invoker: {0}")]
    Factory(String),

    /// Invoke was called on an invoker that already failed.
    #[error("invoker was terminated by an earlier failure")]
    Terminated,

    /// Every worker of the pool was lost to failed replacements.
    #[error("invoker pool exhausted: all {0} workers were lost")]
    PoolExhausted(usize),

    /// Configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Render the error together with a recovery hint, when one applies.
    pub fn with_hint(&self) -> String {
        let hint = match self {
            Error::MissingDeadline => {
                Some("set a timeout on the call or configure max_runnable_time on the pool")
            }
            Error::ExecutionTimeout => Some("raise the timeout or check the backend for hangs"),
            Error::AvailabilityTimeout(_) => {
                Some("increase max_invoker_count or max_wait, or lower concurrency")
            }
            Error::Factory(_) => Some("check that the backend program exists and is executable"),
            Error::PoolExhausted(_) => Some("recreate the pool once the backend can start again"),
            Error::Decode(_) => {
                Some("the backend must write exactly one length-prefixed result per request")
            }
            _ => None,
        };

        match hint {
            Some(hint) => format!("{}\n  hint: {}", self, hint),
            None => self.to_string(),
        }
    }

    /// Whether this error came from the backend side of an invocation.
    ///
    /// The invoker that hit it was discarded; whether the pool kept its size
    /// depends on the replacement, see [`crate::InvokerPool::live_count`].
    pub fn is_backend_failure(&self) -> bool {
        matches!(
            self,
            Error::Write(_) | Error::Decode(_) | Error::ExecutionTimeout | Error::Factory(_)
        )
    }
}
