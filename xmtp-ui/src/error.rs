//! Unified error types for the binding layer.

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Top-level error type for the binding layer.
///
/// Errors are cloneable so they can be preserved inside an
/// [`AsyncState::Error`](crate::AsyncState::Error) snapshot and still be
/// returned to the caller that triggered the failing operation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// A client is already live for this address.
    #[error("a client already exists for this address")]
    ClientAlreadyExists,

    /// No client is live for this address.
    #[error("no client exists for this address")]
    ClientNotFound,

    /// A stream is already live for this key.
    #[error("a stream already exists for this key")]
    StreamAlreadyExists,

    /// No stream is live for this key.
    #[error("no stream exists for this key")]
    StreamNotFound,

    /// An argument passed to an operation was invalid.
    #[error("{0}")]
    BadArguments(String),

    /// A signing operation failed.
    #[error("signing: {0}")]
    Signing(String),

    /// The persistent key store failed to read or write.
    #[error("key store: {0}")]
    KeyStore(String),

    /// An error surfaced by the underlying protocol service.
    #[error("service: {0}")]
    Service(String),

    /// The worker behind a bridge is no longer running.
    #[error("bridge closed")]
    BridgeClosed,
}
