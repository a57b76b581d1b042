//! Server error types.

use thiserror::Error;

/// Misuse of a request channel.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// The channel was already answered.
    #[error("request channel already completed")]
    AlreadyCompleted,
}

/// Server errors.
#[derive(Debug, Error)]
pub enum Error {
    /// Request channel error.
    #[error("channel error: {0}")]
    Channel(#[from] ChannelError),

    /// Security error.
    #[error("security error: {0}")]
    Security(#[from] warden_core::SecurityError),

    /// Core storage error.
    #[error("storage error: {0}")]
    Storage(#[from] warden_core::Error),

    /// Protocol error.
    #[error("protocol error: {0}")]
    Protocol(#[from] warden_proto::Error),

    /// Search engine error.
    #[error("search engine error: {0}")]
    Engine(String),

    /// Node communication error.
    #[error("node error: {0}")]
    Node(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
