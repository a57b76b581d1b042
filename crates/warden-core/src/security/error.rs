//! Security-specific error types.

use thiserror::Error;
use warden_proto::{CodecError, ConfigType};

/// Why a caller could not be identified.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    /// The request carried no credentials this authenticator understands.
    #[error("no credentials")]
    NoCredentials,

    /// Credentials were present but did not verify.
    #[error("bad credentials")]
    BadCredentials,

    /// The identity backend could not be reached.
    #[error("authentication backend unavailable: {0}")]
    BackendUnavailable(String),
}

/// Why an authenticated caller was denied.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthorizationError {
    /// No role grants the cluster action.
    #[error("no permissions for [{0}]")]
    MissingClusterPermission(String),

    /// No role grants the action on one of the target indices.
    #[error("no permissions for [{action}] on [{index}]")]
    MissingIndexPermission {
        /// Requested action.
        action: String,
        /// First index that was not covered.
        index: String,
    },
}

/// Config load and install failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Loaded content is not newer than what is installed, or below the minimum.
    #[error(
        "stale {config_type}: loaded {loaded}, installed {installed}, minimum {minimum:?}"
    )]
    StaleSequence {
        /// Category.
        config_type: ConfigType,
        /// Sequence id already installed.
        installed: u64,
        /// Sequence id returned by the store.
        loaded: u64,
        /// Minimum the coordinator asked for.
        minimum: Option<u64>,
    },

    /// The store failed or returned content that does not parse.
    #[error("failed to load {config_type}: {reason}")]
    LoadError {
        /// Category.
        config_type: ConfigType,
        /// Failure detail.
        reason: String,
    },
}

/// Security-related errors.
#[derive(Debug, Error)]
pub enum SecurityError {
    /// Identity resolution failed.
    #[error(transparent)]
    Identity(#[from] IdentityError),

    /// Authorization denied.
    #[error(transparent)]
    Authorization(#[from] AuthorizationError),

    /// Config convergence failure.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Trusted object codec failure.
    #[error(transparent)]
    Codec(#[from] CodecError),

    /// A role definition could not be parsed.
    #[error("invalid role '{role}': {reason}")]
    InvalidRole {
        /// Role name.
        role: String,
        /// Parse failure.
        reason: String,
    },

    /// An index or field pattern could not be compiled.
    #[error("invalid pattern '{pattern}': {reason}")]
    InvalidPattern {
        /// Pattern source.
        pattern: String,
        /// Compile failure.
        reason: String,
    },

    /// A masked-field expression could not be parsed.
    #[error("invalid masked field '{0}'")]
    InvalidMaskedField(String),

    /// A DLS template is not a JSON object.
    #[error("invalid DLS query: {0}")]
    InvalidDlsQuery(String),

    /// Storage error during config operations.
    #[error("storage error: {0}")]
    Storage(#[from] crate::error::Error),
}

/// Result type for security operations.
pub type SecurityResult<T> = Result<T, SecurityError>;
