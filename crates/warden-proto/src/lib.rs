//! Warden wire types.
//!
//! This crate defines what Warden nodes exchange with each other: the
//! authenticated [`Principal`], the allow-listed trusted object codec used to
//! carry it in request metadata, and the config reload broadcast.
//!
//! # Modules
//!
//! - [`principal`] - Authenticated caller identity
//! - [`codec`] - Allow-listed encoder/decoder for cross-node objects
//! - [`config_update`] - Config reload broadcast and per-node status
//! - [`framing`] - Length-prefixed field framing
//! - [`error`] - Protocol error types
//!
//! # Example
//!
//! ```ignore
//! use warden_proto::{Codec, Principal};
//!
//! let codec = Codec::strict();
//! let bytes = codec.encode_principal(&Principal::new("alice"))?;
//! let principal = codec.decode_principal(&bytes)?;
//! ```

pub mod codec;
pub mod config_update;
pub mod error;
pub mod framing;
pub mod principal;

pub use error::{CodecError, CodecResult, Error};

// Re-export commonly used types at crate root
pub use codec::{Codec, CodecMode, FieldsContext, RemoteAddress, TrustedValue};
pub use config_update::{ConfigType, ConfigUpdateRequest, ConfigUpdateResponse, ReloadStatus};
pub use principal::{Attribute, Principal};

/// Request metadata header carrying a base64-encoded principal from a preceding node.
pub const PRINCIPAL_HEADER: &str = "x-warden-principal";
