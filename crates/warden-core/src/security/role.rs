//! Roles, role mappings, and internal users.
//!
//! Definitions are read from the JSON content of the `roles`, `rolesmapping`
//! and `internalusers` config categories and compiled once per snapshot.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use warden_proto::Principal;

use super::error::{SecurityError, SecurityResult};
use super::field_security::{FieldRules, MaskedField};
use super::pattern::PatternSet;

/// Role as stored in the `roles` category.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoleDefinition {
    #[serde(default)]
    pub cluster_permissions: Vec<String>,
    #[serde(default)]
    pub index_permissions: Vec<IndexPermissionDefinition>,
}

/// One index permission entry as stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexPermissionDefinition {
    #[serde(default)]
    pub index_patterns: Vec<String>,
    #[serde(default)]
    pub allowed_actions: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dls: Option<String>,
    #[serde(default)]
    pub fls: Vec<String>,
    #[serde(default)]
    pub masked_fields: Vec<String>,
}

/// Mapping as stored in the `rolesmapping` category.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RoleMappingDefinition {
    #[serde(default)]
    pub backend_roles: Vec<String>,
    #[serde(default)]
    pub users: Vec<String>,
}

/// User as stored in the `internalusers` category.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InternalUser {
    /// Password hash, verified by an external collaborator.
    pub hash: String,
    #[serde(default)]
    pub backend_roles: Vec<String>,
    #[serde(default)]
    pub attributes: BTreeMap<String, String>,
}

impl InternalUser {
    /// Build the principal for this user.
    pub fn to_principal(&self, name: &str) -> Principal {
        let mut principal = Principal::new(name).with_backend_roles(self.backend_roles.iter().cloned());
        for (key, value) in &self.attributes {
            principal = principal.with_attribute(format!("attr.internal.{}", key), value.clone());
        }
        principal
    }
}

/// A compiled index permission entry.
#[derive(Debug, Clone)]
pub struct IndexPermission {
    indices: PatternSet,
    actions: PatternSet,
    dls: Option<Value>,
    fls: Option<FieldRules>,
    masked_fields: Vec<MaskedField>,
}

impl IndexPermission {
    fn compile(role: &str, def: &IndexPermissionDefinition) -> SecurityResult<Self> {
        let dls = match def.dls.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(text) => {
                let query: Value = serde_json::from_str(text).map_err(|e| SecurityError::InvalidRole {
                    role: role.to_string(),
                    reason: format!("DLS query is not valid JSON: {}", e),
                })?;
                if !query.is_object() {
                    return Err(SecurityError::InvalidRole {
                        role: role.to_string(),
                        reason: "DLS query must be a JSON object".to_string(),
                    });
                }
                Some(query)
            }
        };

        Ok(Self {
            indices: PatternSet::parse(&def.index_patterns)?,
            actions: PatternSet::parse(&def.allowed_actions)?,
            dls,
            fls: FieldRules::parse(&def.fls)?,
            masked_fields: def
                .masked_fields
                .iter()
                .map(|m| MaskedField::parse(m))
                .collect::<SecurityResult<Vec<_>>>()?,
        })
    }

    /// Whether the entry covers this index.
    pub fn matches_index(&self, index: &str) -> bool {
        self.indices.matches(index)
    }

    /// Whether the entry grants this action.
    pub fn allows_action(&self, action: &str) -> bool {
        self.actions.matches(action)
    }

    /// DLS query template, if the entry restricts documents.
    pub fn dls(&self) -> Option<&Value> {
        self.dls.as_ref()
    }

    /// FLS rules, if the entry restricts fields.
    pub fn fls(&self) -> Option<&FieldRules> {
        self.fls.as_ref()
    }

    /// Masked fields.
    pub fn masked_fields(&self) -> &[MaskedField] {
        &self.masked_fields
    }
}

/// A compiled role.
#[derive(Debug, Clone)]
pub struct Role {
    name: String,
    cluster_permissions: PatternSet,
    index_permissions: Vec<IndexPermission>,
}

impl Role {
    /// Compile a stored definition.
    pub fn compile(name: impl Into<String>, def: &RoleDefinition) -> SecurityResult<Self> {
        let name = name.into();
        let index_permissions = def
            .index_permissions
            .iter()
            .map(|entry| IndexPermission::compile(&name, entry))
            .collect::<SecurityResult<Vec<_>>>()?;
        Ok(Self {
            cluster_permissions: PatternSet::parse(&def.cluster_permissions)?,
            index_permissions,
            name,
        })
    }

    /// Role name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether a cluster permission covers the action.
    pub fn allows_cluster_action(&self, action: &str) -> bool {
        self.cluster_permissions.matches(action)
    }

    /// Index permission entries, in definition order.
    pub fn index_permissions(&self) -> &[IndexPermission] {
        &self.index_permissions
    }

    /// Entries that grant `action` on `index`.
    pub fn grants<'a>(&'a self, action: &'a str, index: &'a str) -> impl Iterator<Item = &'a IndexPermission> + 'a {
        self.index_permissions
            .iter()
            .filter(move |p| p.matches_index(index) && p.allows_action(action))
    }
}

/// A compiled role mapping.
#[derive(Debug, Clone)]
pub struct RoleMapping {
    role: String,
    backend_roles: PatternSet,
    users: PatternSet,
}

impl RoleMapping {
    /// Compile a stored mapping for `role`.
    pub fn compile(role: impl Into<String>, def: &RoleMappingDefinition) -> SecurityResult<Self> {
        Ok(Self {
            role: role.into(),
            backend_roles: PatternSet::parse(&def.backend_roles)?,
            users: PatternSet::parse(&def.users)?,
        })
    }

    /// The role this mapping grants.
    pub fn role(&self) -> &str {
        &self.role
    }

    /// Whether the principal's name or any backend role is mapped.
    pub fn applies_to(&self, principal: &Principal) -> bool {
        self.users.matches(principal.name())
            || principal
                .backend_roles()
                .iter()
                .any(|r| self.backend_roles.matches(r))
    }
}

/// Parse the `roles` category.
pub fn parse_roles(content: &str) -> SecurityResult<BTreeMap<String, Role>> {
    let defs: BTreeMap<String, RoleDefinition> = parse_category(content)?;
    defs.iter()
        .map(|(name, def)| Ok((name.clone(), Role::compile(name.clone(), def)?)))
        .collect()
}

/// Parse the `rolesmapping` category.
pub fn parse_role_mappings(content: &str) -> SecurityResult<Vec<RoleMapping>> {
    let defs: BTreeMap<String, RoleMappingDefinition> = parse_category(content)?;
    defs.iter()
        .map(|(role, def)| RoleMapping::compile(role.clone(), def))
        .collect()
}

/// Parse the `internalusers` category.
pub fn parse_internal_users(content: &str) -> SecurityResult<BTreeMap<String, InternalUser>> {
    parse_category(content)
}

fn parse_category<T: serde::de::DeserializeOwned + Default>(content: &str) -> SecurityResult<T> {
    if content.trim().is_empty() {
        return Ok(T::default());
    }
    serde_json::from_str(content).map_err(|e| {
        SecurityError::Storage(crate::error::Error::Deserialization(e.to_string()))
    })
}
