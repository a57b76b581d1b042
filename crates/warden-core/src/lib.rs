//! Warden Core - role registry, privilege evaluation, and DLS/FLS rewriting.
//!
//! This crate holds everything a node needs to decide and enforce what an
//! authenticated principal may see. It performs no network I/O.

pub mod config;
pub mod error;
pub mod security;

pub use error::Error;

// Config exports
pub use config::{ConfigEntry, ConfigStore, MemoryConfigStore, NodeConfigApplier, SledConfigStore};

// Security exports
pub use security::{
    AuthorizationDecision, AuthorizationError, ConfigError, DlsDirective, FieldFilter,
    FlsDirective, IdentityError, PrivilegeEvaluator, Role, RoleRegistry, SecurityError,
    SecurityResult, SecuritySnapshot,
};

/// Re-export protocol types.
pub use warden_proto as proto;
