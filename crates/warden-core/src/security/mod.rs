//! Security model for Warden.
//!
//! This module decides what an authenticated principal may do:
//! - Role and role-mapping definitions compiled from config content
//! - Index, action, and field patterns (`*`, `?`, `/regex/`, `-exclusion`)
//! - A lock-free role registry holding immutable snapshots
//! - Privilege evaluation producing DLS and FLS directives
//! - Query rewriting (DLS) and document filtering and masking (FLS)
//!
//! # Example
//!
//! ```ignore
//! use warden_core::security::{PrivilegeEvaluator, RoleRegistry};
//! use warden_proto::Principal;
//!
//! let registry = RoleRegistry::new();
//! let snapshot = registry.snapshot();
//! let principal = Principal::new("alice").with_backend_role("readers");
//!
//! let decision = PrivilegeEvaluator::new().evaluate(
//!     &snapshot,
//!     &principal,
//!     "indices:data/read/search",
//!     &["songs".to_string()],
//! );
//! if decision.is_allowed() {
//!     // rewrite the query and filter results...
//! }
//! ```

pub mod dls;
pub mod error;
pub mod evaluator;
pub mod field_security;
pub mod pattern;
pub mod registry;
pub mod role;

// Error types
pub use error::{AuthorizationError, ConfigError, IdentityError, SecurityError, SecurityResult};

// Pattern types
pub use pattern::{wildcard_match, Pattern, PatternSet, WILDCARD_INCLUDES_SYSTEM_INDICES};

// Role types
pub use role::{
    IndexPermission, IndexPermissionDefinition, InternalUser, Role, RoleDefinition, RoleMapping,
    RoleMappingDefinition,
};

// Registry types
pub use registry::{RoleRegistry, SecuritySnapshot};

// Evaluation types
pub use evaluator::{
    AuthorizationDecision, DlsDirective, DlsFragment, IndexDirectives, PrivilegeEvaluator,
};

// Rewriting
pub use dls::{rewrite_for_decision, rewrite_query};
pub use field_security::{
    FieldFilter, FieldRuleMode, FieldRules, FlsDirective, MaskRule, MaskedField, MaskingFunction,
};
