//! Crate-wide error taxonomy.
//!
//! Components don't share one big error enum; each owns the kind of
//! failure it can produce, following §7 of the design notes. `TransportError`
//! is the one type every Chain Transport call returns, since callers
//! (Supervisor, Reconciler, Dispatcher) all need to know whether a failure
//! is worth retrying.

use std::fmt;

/// Error returned by every `ChainTransport` method.
///
/// `retryable` tells the caller whether to back off and try again, or
/// whether the failure is something that needs to propagate (bad request,
/// insufficient funds, ...).
#[derive(Debug)]
pub struct TransportError {
    pub retryable: bool,
    pub cause: anyhow::Error,
}

impl TransportError {
    pub fn retryable(cause: impl Into<anyhow::Error>) -> Self {
        Self { retryable: true, cause: cause.into() }
    }

    pub fn fatal(cause: impl Into<anyhow::Error>) -> Self {
        Self { retryable: false, cause: cause.into() }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "transport error (retryable={}): {}", self.retryable, self.cause)
    }
}

impl std::error::Error for TransportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.cause.source()
    }
}

/// Top-level error enum for the few call sites that need to distinguish
/// startup-fatal failures from the log-and-continue failures everything
/// else absorbs.
#[derive(Debug, thiserror::Error)]
pub enum SettlerError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("event store error: {0}")]
    Store(#[from] sqlx::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
