use std::time::Duration;

use thiserror::Error;

/// Errors produced by backends and the retry machinery.
///
/// The public [`PubSubManager`](crate::PubSubManager) operations never hand
/// these to the caller; they are logged and folded into a no-op or a
/// [`PublishOutcome`](crate::PublishOutcome). Lower layers (backend traits,
/// [`connect`](crate::connect)) return them normally.
#[derive(Error, Debug)]
pub enum Error {
    /// Could not establish a connection to the backend.
    #[error("connection failed: {0}")]
    Connection(String),

    /// The backend did not answer within its internal time bound.
    ///
    /// During consumption this is the expected "nothing arrived" result.
    #[error("operation timed out")]
    Timeout,

    /// Any other backend failure (protocol error, dropped stream, ...).
    #[error("backend error: {0}")]
    Backend(String),

    /// No publish connection became free within the pool wait timeout.
    #[error("no pooled connection available after {0:?}")]
    PoolTimeout(Duration),

    /// The operation needs a backend connection and there is none.
    #[error("not connected to a pub/sub backend")]
    NotConnected,

    /// Configuration rejected before any connection was attempted.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// A retried operation failed on every attempt.
    #[error("gave up after {attempts} attempts: {last}")]
    RetriesExhausted {
        attempts: u32,
        #[source]
        last: Box<Error>,
    },
}

impl Error {
    /// True for the timeout class the consumer loop ignores silently.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Timeout)
    }

    /// True if trying the same operation again may succeed.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Error::InvalidConfig(_) | Error::NotConnected | Error::RetriesExhausted { .. }
        )
    }
}

#[cfg(feature = "backend_redis")]
impl From<redis::RedisError> for Error {
    fn from(err: redis::RedisError) -> Self {
        // ---
        if err.is_timeout() {
            Error::Timeout
        } else {
            Error::Backend(err.to_string())
        }
    }
}

/// Result type alias for backend operations
pub type Result<T> = std::result::Result<T, Error>;
