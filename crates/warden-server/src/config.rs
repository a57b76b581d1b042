//! Server configuration.

use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use warden_proto::CodecMode;

use crate::convergence::{DEFAULT_BROADCAST_RETRIES, DEFAULT_BROADCAST_TIMEOUT};
use crate::error::Error;

/// Default node identifier.
pub const DEFAULT_NODE_ID: &str = "warden-0";

/// Default data directory.
pub const DEFAULT_DATA_PATH: &str = "./data";

/// Minimum masking salt length in bytes.
pub const MIN_SALT_LENGTH: usize = 16;

/// Warden server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Identifier of this node in reload reports.
    pub node_id: String,

    /// Path to the sled directory holding the config store.
    pub data_path: PathBuf,

    /// Salt keying the masking functions. Must be identical on every node.
    pub masking_salt: Vec<u8>,

    /// Principal names or backend roles that bypass privilege evaluation.
    pub admin_principals: Vec<String>,

    /// Certificate subject patterns identifying peer nodes.
    pub node_subjects: Vec<String>,

    /// Let requests without credentials through as the anonymous principal.
    pub anonymous_access: bool,

    /// Authenticate in the connection handler before dispatch.
    pub early_authentication: bool,

    /// Time a node gets to answer one reload attempt.
    pub broadcast_timeout: Duration,

    /// Reload retries per node.
    pub broadcast_retries: u32,

    /// Trusted object codec mode.
    pub codec_mode: CodecMode,
}

impl ServerConfig {
    /// Configuration over `data_path` keyed with the cluster masking salt.
    pub fn new(data_path: impl Into<PathBuf>, masking_salt: impl Into<Vec<u8>>) -> Self {
        Self {
            node_id: DEFAULT_NODE_ID.to_string(),
            data_path: data_path.into(),
            masking_salt: masking_salt.into(),
            admin_principals: Vec::new(),
            node_subjects: Vec::new(),
            anonymous_access: false,
            early_authentication: false,
            broadcast_timeout: DEFAULT_BROADCAST_TIMEOUT,
            broadcast_retries: DEFAULT_BROADCAST_RETRIES,
            codec_mode: CodecMode::Strict,
        }
    }

    /// Set the node identifier.
    pub fn with_node_id(mut self, node_id: impl Into<String>) -> Self {
        self.node_id = node_id.into();
        self
    }

    /// Add an administrator.
    pub fn with_admin_principal(mut self, principal: impl Into<String>) -> Self {
        self.admin_principals.push(principal.into());
        self
    }

    /// Trust certificates whose subject matches `pattern` as peer nodes.
    pub fn with_node_subject(mut self, pattern: impl Into<String>) -> Self {
        self.node_subjects.push(pattern.into());
        self
    }

    /// Enable or disable anonymous access.
    pub fn with_anonymous_access(mut self, enabled: bool) -> Self {
        self.anonymous_access = enabled;
        self
    }

    /// Enable or disable authentication before dispatch.
    pub fn with_early_authentication(mut self, enabled: bool) -> Self {
        self.early_authentication = enabled;
        self
    }

    /// Set the per-attempt broadcast timeout.
    pub fn with_broadcast_timeout(mut self, timeout: Duration) -> Self {
        self.broadcast_timeout = timeout;
        self
    }

    /// Set the number of broadcast retries.
    pub fn with_broadcast_retries(mut self, retries: u32) -> Self {
        self.broadcast_retries = retries;
        self
    }

    /// Set the codec mode.
    pub fn with_codec_mode(mut self, mode: CodecMode) -> Self {
        self.codec_mode = mode;
        self
    }

    /// Check settings every node must get right before serving.
    pub fn validate(&self) -> Result<(), Error> {
        if self.masking_salt.len() < MIN_SALT_LENGTH {
            return Err(Error::Config(format!(
                "masking salt must be at least {} bytes, got {}",
                MIN_SALT_LENGTH,
                self.masking_salt.len()
            )));
        }
        Ok(())
    }
}

/// Command-line arguments for the server.
#[derive(Parser, Debug)]
#[command(name = "warden-server")]
#[command(version, about = "Warden search authorization gateway", long_about = None)]
pub struct Args {
    /// Node identifier.
    #[arg(long, default_value = DEFAULT_NODE_ID)]
    pub node_id: String,

    /// Path to the config store directory.
    #[arg(short, long, default_value = DEFAULT_DATA_PATH)]
    pub data_path: PathBuf,

    /// Cluster-wide masking salt as hex. Every node must use the same value.
    #[arg(long)]
    pub masking_salt: String,

    /// Administrator principal names or backend roles (comma-separated).
    #[arg(long, value_delimiter = ',')]
    pub admin: Vec<String>,

    /// Certificate subject patterns of peer nodes (comma-separated).
    #[arg(long, value_delimiter = ',')]
    pub node_dn: Vec<String>,

    /// Allow unauthenticated requests as the anonymous principal.
    #[arg(long)]
    pub anonymous: bool,

    /// Authenticate in the connection handler before dispatch.
    #[arg(long)]
    pub early_auth: bool,

    /// Broadcast timeout per node attempt in seconds.
    #[arg(long, default_value_t = DEFAULT_BROADCAST_TIMEOUT.as_secs())]
    pub broadcast_timeout: u64,

    /// Broadcast retries per node.
    #[arg(long, default_value_t = DEFAULT_BROADCAST_RETRIES)]
    pub broadcast_retries: u32,

    /// Accept legacy type identifiers in the trusted object codec.
    #[arg(long)]
    pub codec_compat: bool,
}

impl Args {
    /// Convert command-line arguments to server configuration.
    pub fn into_config(self) -> Result<ServerConfig, Error> {
        let masking_salt = hex::decode(self.masking_salt.trim())
            .map_err(|e| Error::Config(format!("masking salt is not hex: {}", e)))?;

        let config = ServerConfig {
            node_id: self.node_id,
            data_path: self.data_path,
            masking_salt,
            admin_principals: self.admin,
            node_subjects: self.node_dn,
            anonymous_access: self.anonymous,
            early_authentication: self.early_auth,
            broadcast_timeout: Duration::from_secs(self.broadcast_timeout),
            broadcast_retries: self.broadcast_retries,
            codec_mode: if self.codec_compat {
                CodecMode::Compat
            } else {
                CodecMode::Strict
            },
        };
        config.validate()?;
        Ok(config)
    }
}
