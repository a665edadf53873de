//! Error types for the pool

use std::time::Duration;

use thiserror::Error;

/// Failures surfaced by pool operations.
///
/// `E` is the factory's error type; it rides along inside
/// [`PoolError::Poisoned`] when a claim surfaces a captured allocation
/// failure.
#[derive(Error, Debug)]
pub enum PoolError<E: std::error::Error + 'static> {
    /// The claim or completion deadline was reached. Non-fatal, retry.
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// The claimed slot carried a failure from its last allocation
    /// attempt. Non-fatal; the slot is already queued for retry.
    #[error("claimed object is poisoned: {0}")]
    Poisoned(#[source] E),

    /// The pool is shutting down. Terminal for this pool.
    #[error("pool is shut down")]
    Shutdown,

    /// The caller violated the pool contract at construction time.
    #[error("structural misuse: {0}")]
    Structural(&'static str),
}

pub type PoolResult<T, E> = Result<T, PoolError<E>>;

impl<E: std::error::Error + 'static> PoolError<E> {
    /// True for the failures a caller is expected to retry through.
    pub fn is_transient(&self) -> bool {
        matches!(self, PoolError::Timeout(_) | PoolError::Poisoned(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn poisoned_carries_the_cause() {
        let err: PoolError<io::Error> =
            PoolError::Poisoned(io::Error::new(io::ErrorKind::ConnectionReset, "net"));
        assert!(err.to_string().contains("net"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn transient_classification() {
        let timeout: PoolError<io::Error> = PoolError::Timeout(Duration::from_secs(1));
        let shutdown: PoolError<io::Error> = PoolError::Shutdown;
        assert!(timeout.is_transient());
        assert!(!shutdown.is_transient());
    }
}
