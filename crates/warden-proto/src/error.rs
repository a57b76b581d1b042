//! Protocol error types.

use thiserror::Error;

/// Failure kinds of the trusted object codec.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The embedded type identifier is not on the allow-list.
    #[error("untrusted type: {0}")]
    UntrustedType(String),

    /// The byte stream could not be parsed.
    #[error("malformed payload: {0}")]
    Malformed(String),
}

/// Result type for codec operations.
pub type CodecResult<T> = Result<T, CodecError>;

/// Protocol-level errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Serialization failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Deserialization failed.
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// Invalid message format.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Request failed validation.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Trusted object codec failure.
    #[error(transparent)]
    Codec(#[from] CodecError),
}

impl From<Error> for CodecError {
    fn from(err: Error) -> Self {
        match err {
            Error::Codec(inner) => inner,
            other => CodecError::Malformed(other.to_string()),
        }
    }
}
