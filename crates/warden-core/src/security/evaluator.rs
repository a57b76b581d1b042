//! Privilege evaluation.
//!
//! [`PrivilegeEvaluator::evaluate`] is a pure function of the principal, the
//! action, the target indices, and the [`SecuritySnapshot`] it is handed.
//!
//! Multiple roles combine as follows:
//! - DLS: fragments from every granting entry are OR-combined. An entry that
//!   grants the index without a DLS query makes the index unrestricted
//!   (rule `UNRESTRICTED_GRANT_DOMINATES`).
//! - FLS: a field is hidden only if every granting entry hides it.
//! - Masking: a field is masked if any granting entry masks it. When several
//!   roles mask the same field, the role with the lexicographically smallest
//!   name supplies the function (rule `MASK_TIE_BREAK_LOWEST_ROLE_NAME`).

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde_json::Value;
use warden_proto::Principal;

use super::error::AuthorizationError;
use super::field_security::{FlsDirective, MaskRule};
use super::registry::SecuritySnapshot;
use super::role::Role;

/// One role's DLS query for an index.
#[derive(Debug, Clone, PartialEq)]
pub struct DlsFragment {
    /// Contributing role.
    pub role: String,
    /// The role's query, unmodified.
    pub query: Value,
}

/// Document restriction for one index.
#[derive(Debug, Clone, PartialEq)]
pub enum DlsDirective {
    /// Every document is visible.
    Unrestricted,
    /// Documents matching any fragment are visible.
    Restricted(Vec<DlsFragment>),
}

impl DlsDirective {
    /// Whether the directive restricts documents.
    pub fn is_restricted(&self) -> bool {
        matches!(self, DlsDirective::Restricted(_))
    }

    /// The fragments to OR together (empty when unrestricted).
    pub fn fragments(&self) -> &[DlsFragment] {
        match self {
            DlsDirective::Unrestricted => &[],
            DlsDirective::Restricted(fragments) => fragments,
        }
    }
}

/// DLS and FLS for one index.
#[derive(Debug, Clone)]
pub struct IndexDirectives {
    /// Document restriction.
    pub dls: DlsDirective,
    /// Field restriction.
    pub fls: FlsDirective,
}

impl IndexDirectives {
    /// No restriction at all.
    pub fn unrestricted() -> Self {
        Self {
            dls: DlsDirective::Unrestricted,
            fls: FlsDirective::unrestricted(),
        }
    }
}

/// Outcome of one evaluation.
#[derive(Debug, Clone)]
pub struct AuthorizationDecision {
    allowed: bool,
    admin: bool,
    roles: Vec<String>,
    missing_permissions: BTreeSet<String>,
    denial: Option<AuthorizationError>,
    indices: BTreeMap<String, IndexDirectives>,
}

impl AuthorizationDecision {
    fn denied(roles: Vec<String>, action: &str, denial: AuthorizationError) -> Self {
        Self {
            allowed: false,
            admin: false,
            roles,
            missing_permissions: BTreeSet::from([action.to_string()]),
            denial: Some(denial),
            indices: BTreeMap::new(),
        }
    }

    /// Whether the request may proceed.
    pub fn is_allowed(&self) -> bool {
        self.allowed
    }

    /// Whether the caller bypassed evaluation as an administrator.
    pub fn is_admin(&self) -> bool {
        self.admin
    }

    /// Names of the roles the caller resolved to.
    pub fn roles(&self) -> &[String] {
        &self.roles
    }

    /// Actions that were not granted.
    pub fn missing_permissions(&self) -> &BTreeSet<String> {
        &self.missing_permissions
    }

    /// Why the request was denied.
    pub fn denial(&self) -> Option<&AuthorizationError> {
        self.denial.as_ref()
    }

    /// Directives for one target index.
    pub fn directives(&self, index: &str) -> Option<&IndexDirectives> {
        self.indices.get(index)
    }

    /// Directives per target index.
    pub fn index_directives(&self) -> &BTreeMap<String, IndexDirectives> {
        &self.indices
    }

    /// Whether any target index carries a DLS or FLS restriction.
    pub fn is_restricted(&self) -> bool {
        self.indices
            .values()
            .any(|d| d.dls.is_restricted() || d.fls.is_restricted())
    }
}

/// Evaluates requests against a snapshot.
#[derive(Debug, Clone, Default)]
pub struct PrivilegeEvaluator {
    admin_principals: BTreeSet<String>,
}

impl PrivilegeEvaluator {
    /// Create an evaluator with no administrators.
    pub fn new() -> Self {
        Self::default()
    }

    /// Names or backend roles that bypass evaluation.
    pub fn with_admin_principals<I, S>(mut self, admins: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.admin_principals.extend(admins.into_iter().map(Into::into));
        self
    }

    /// Whether the principal is an administrator.
    pub fn is_admin(&self, principal: &Principal) -> bool {
        self.admin_principals.contains(principal.name())
            || principal
                .backend_roles()
                .iter()
                .any(|r| self.admin_principals.contains(r))
    }

    /// Evaluate `action` on `targets`. No targets means a cluster action.
    pub fn evaluate(
        &self,
        snapshot: &SecuritySnapshot,
        principal: &Principal,
        action: &str,
        targets: &[String],
    ) -> AuthorizationDecision {
        if self.is_admin(principal) {
            tracing::debug!(principal = %principal.name(), action, "administrator bypass");
            return AuthorizationDecision {
                allowed: true,
                admin: true,
                roles: Vec::new(),
                missing_permissions: BTreeSet::new(),
                denial: None,
                indices: targets
                    .iter()
                    .map(|t| (t.clone(), IndexDirectives::unrestricted()))
                    .collect(),
            };
        }

        let roles = snapshot.resolve_roles(principal);
        let role_names: Vec<String> = roles.iter().map(|r| r.name().to_string()).collect();

        if targets.is_empty() {
            return self.evaluate_cluster(&roles, role_names, action);
        }

        let mut indices = BTreeMap::new();
        for index in targets {
            match combine_index(&roles, action, index) {
                Some(directives) => {
                    indices.insert(index.clone(), directives);
                }
                None => {
                    tracing::debug!(
                        principal = %principal.name(),
                        action,
                        index = %index,
                        roles = ?role_names,
                        "missing index permission"
                    );
                    return AuthorizationDecision::denied(
                        role_names,
                        action,
                        AuthorizationError::MissingIndexPermission {
                            action: action.to_string(),
                            index: index.clone(),
                        },
                    );
                }
            }
        }

        AuthorizationDecision {
            allowed: true,
            admin: false,
            roles: role_names,
            missing_permissions: BTreeSet::new(),
            denial: None,
            indices,
        }
    }

    fn evaluate_cluster(
        &self,
        roles: &[Arc<Role>],
        role_names: Vec<String>,
        action: &str,
    ) -> AuthorizationDecision {
        if roles.iter().any(|r| r.allows_cluster_action(action)) {
            return AuthorizationDecision {
                allowed: true,
                admin: false,
                roles: role_names,
                missing_permissions: BTreeSet::new(),
                denial: None,
                indices: BTreeMap::new(),
            };
        }
        tracing::debug!(action, roles = ?role_names, "missing cluster permission");
        AuthorizationDecision::denied(
            role_names,
            action,
            AuthorizationError::MissingClusterPermission(action.to_string()),
        )
    }
}

/// Combine every entry granting `action` on `index`. `None` if nothing grants it.
fn combine_index(roles: &[Arc<Role>], action: &str, index: &str) -> Option<IndexDirectives> {
    let mut granted = false;
    let mut unrestricted = false;
    let mut fragments = Vec::new();
    let mut fls = FlsDirective::default();
    let mut masks = Vec::new();

    for role in roles {
        for entry in role.grants(action, index) {
            granted = true;
            match entry.dls() {
                Some(query) => fragments.push(DlsFragment {
                    role: role.name().to_string(),
                    query: query.clone(),
                }),
                None => unrestricted = true,
            }
            fls.add_role_rules(entry.fls().cloned());
            masks.extend(entry.masked_fields().iter().map(|field| MaskRule {
                role: role.name().to_string(),
                field: field.clone(),
            }));
        }
    }

    if !granted {
        return None;
    }

    fls.set_masks(masks);
    let dls = if unrestricted {
        DlsDirective::Unrestricted
    } else {
        DlsDirective::Restricted(fragments)
    };
    Some(IndexDirectives { dls, fls })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::security::registry::RoleRegistry;
    use serde_json::json;
    use warden_proto::ConfigType;

    const SEARCH: &str = "indices:data/read/search";

    const ROLES: &str = r#"{
        "rock": {"index_permissions": [{"index_patterns": ["songs"], "allowed_actions": ["indices:data/read/*"],
                 "dls": "{\"term\":{\"genre\":\"rock\"}}", "fls": ["~lyrics"], "masked_fields": ["artist::SHA-512"]}]},
        "jazz": {"index_permissions": [{"index_patterns": ["songs"], "allowed_actions": ["indices:data/read/*"],
                 "dls": "{\"term\":{\"genre\":\"jazz\"}}", "fls": ["title", "artist", "genre"], "masked_fields": ["artist::SHA-256"]}]},
        "open": {"cluster_permissions": ["cluster:monitor/*"],
                 "index_permissions": [{"index_patterns": ["*"], "allowed_actions": ["indices:data/read/*"]}]}
    }"#;

    const MAPPING: &str = r#"{
        "rock": {"backend_roles": ["rock"]},
        "jazz": {"backend_roles": ["jazz"]},
        "open": {"backend_roles": ["open"]}
    }"#;

    fn snapshot() -> Arc<SecuritySnapshot> {
        let registry = RoleRegistry::new();
        registry.install(ConfigType::Roles, ROLES, 1).unwrap();
        registry.install(ConfigType::RolesMapping, MAPPING, 1).unwrap();
        registry.snapshot()
    }

    fn targets(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_dls_fragments_from_two_roles() {
        let principal = Principal::new("u").with_backend_roles(["rock", "jazz"]);
        let decision = PrivilegeEvaluator::new().evaluate(&snapshot(), &principal, SEARCH, &targets(&["songs"]));

        assert!(decision.is_allowed());
        let dls = &decision.directives("songs").unwrap().dls;
        let queries: Vec<_> = dls.fragments().iter().map(|f| f.query.clone()).collect();
        assert_eq!(
            queries,
            vec![json!({"term": {"genre": "jazz"}}), json!({"term": {"genre": "rock"}})]
        );
    }

    #[test]
    fn test_unrestricted_grant_dominates() {
        let principal = Principal::new("u").with_backend_roles(["rock", "open"]);
        let decision = PrivilegeEvaluator::new().evaluate(&snapshot(), &principal, SEARCH, &targets(&["songs"]));

        let directives = decision.directives("songs").unwrap();
        assert_eq!(directives.dls, DlsDirective::Unrestricted);
        assert!(directives.fls.is_visible("lyrics"));
    }

    #[test]
    fn test_fls_union_and_mask_tie_break() {
        let principal = Principal::new("u").with_backend_roles(["rock", "jazz"]);
        let decision = PrivilegeEvaluator::new().evaluate(&snapshot(), &principal, SEARCH, &targets(&["songs"]));
        let fls = &decision.directives("songs").unwrap().fls;

        // jazz reveals only title/artist/genre, rock hides only lyrics
        assert!(fls.is_visible("album"));
        assert!(!fls.is_visible("lyrics"));
        let rule = fls.mask_for("artist").unwrap();
        assert_eq!(rule.role, "jazz");
        assert_eq!(rule.field.function().id(), "SHA-256");
    }

    #[test]
    fn test_missing_index_permission() {
        let principal = Principal::new("u").with_backend_role("rock");
        let decision = PrivilegeEvaluator::new().evaluate(
            &snapshot(),
            &principal,
            SEARCH,
            &targets(&["songs", "movies"]),
        );

        assert!(!decision.is_allowed());
        assert!(decision.missing_permissions().contains(SEARCH));
        assert!(matches!(
            decision.denial(),
            Some(AuthorizationError::MissingIndexPermission { index, .. }) if index == "movies"
        ));
    }

    #[test]
    fn test_action_not_granted() {
        let principal = Principal::new("u").with_backend_role("open");
        let decision = PrivilegeEvaluator::new().evaluate(
            &snapshot(),
            &principal,
            "indices:data/write/index",
            &targets(&["songs"]),
        );
        assert!(!decision.is_allowed());
    }

    #[test]
    fn test_cluster_actions() {
        let evaluator = PrivilegeEvaluator::new();
        let open = Principal::new("u").with_backend_role("open");
        assert!(evaluator.evaluate(&snapshot(), &open, "cluster:monitor/health", &[]).is_allowed());

        let decision = evaluator.evaluate(&snapshot(), &open, "cluster:admin/settings/update", &[]);
        assert!(!decision.is_allowed());
        assert_eq!(
            decision.denial(),
            Some(&AuthorizationError::MissingClusterPermission(
                "cluster:admin/settings/update".to_string()
            ))
        );
    }

    #[test]
    fn test_no_roles_is_denied() {
        let decision = PrivilegeEvaluator::new().evaluate(
            &snapshot(),
            &Principal::new("nobody"),
            SEARCH,
            &targets(&["songs"]),
        );
        assert!(!decision.is_allowed());
        assert!(decision.roles().is_empty());
    }

    #[test]
    fn test_admin_bypass() {
        let evaluator = PrivilegeEvaluator::new().with_admin_principals(["admin", "superusers"]);
        let by_name = Principal::new("admin");
        let by_role = Principal::new("x").with_backend_role("superusers");

        for principal in [by_name, by_role] {
            let decision = evaluator.evaluate(&snapshot(), &principal, "cluster:admin/anything", &[]);
            assert!(decision.is_allowed());
            assert!(decision.is_admin());
        }

        let decision = evaluator.evaluate(&snapshot(), &Principal::new("admin"), SEARCH, &targets(&[".security"]));
        assert!(!decision.is_restricted());
    }

    #[test]
    fn test_star_covers_system_index() {
        let principal = Principal::new("u").with_backend_role("open");
        let decision = PrivilegeEvaluator::new().evaluate(&snapshot(), &principal, SEARCH, &targets(&[".kibana"]));
        assert!(decision.is_allowed());
    }
}
